//! Automation-driver seam.
//!
//! The lifecycle manager is written against these traits; the production
//! Chrome implementation lives in [`chrome`].

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use webbridge_core::Result;

pub mod chrome;

/// Options passed to [`AutomationDriver::launch`]. The caller supplies the
/// full flag list; the driver may append binary-specific hygiene flags.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub headless: bool,
    pub args: Vec<String>,
}

/// Options for a new browsing context. The bridge opens its context with no
/// viewport override, so the launched window size is what the page gets.
#[derive(Debug, Clone, Default)]
pub struct ContextOptions {
    pub viewport: Option<(u32, u32)>,
}

#[async_trait]
pub trait AutomationDriver: Send + Sync {
    async fn launch(&self, opts: LaunchOptions) -> Result<Arc<dyn BrowserHandle>>;
}

#[async_trait]
pub trait BrowserHandle: Send + Sync {
    /// Liveness predicate: does this handle still front a usable browser?
    fn is_connected(&self) -> bool;

    async fn new_context(&self, opts: ContextOptions) -> Result<Arc<dyn BrowserContext>>;

    /// Graceful shutdown. Never called by the lifecycle stages themselves;
    /// only the external close path uses it.
    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait BrowserContext: Send + Sync {
    async fn new_page(&self) -> Result<Arc<dyn Page>>;
}

#[async_trait]
pub trait Page: Send + Sync {
    /// Run `function` in the page, passing `args` as one structured call
    /// argument. Implementations bind `args` on the driver side; callers
    /// never splice values into the function source.
    async fn evaluate(&self, function: &str, args: Value) -> Result<Value>;

    async fn url(&self) -> Result<String>;
}
