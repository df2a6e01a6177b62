//! Connection lifecycle manager.
//!
//! Reconciles the allocated port, the browser process, and the protocol
//! client into one ready state, and hands out the page and client handles.
//! The whole ensure runs under the session mutex, so concurrent callers
//! converge on a single allocation, launch, and registration instead of
//! racing between the stored-state check and the store.

use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};
use webbridge_core::{Config, Error, Paths, Result};

use crate::driver::chrome::ChromeDriver;
use crate::driver::{AutomationDriver, ContextOptions, LaunchOptions, Page};
use crate::port::{OsPortAllocator, PortAllocator};
use crate::protocol::mcp::McpRegistry;
use crate::protocol::{client_name, ClientStatus, ProtocolClient, ProtocolRegistry, ServerSpec};
use crate::state::ConnState;

/// One session: at most one port, one browser, one page, one client, all
/// owned exclusively by this instance.
pub struct BridgeSession {
    config: Config,
    allocator: Arc<dyn PortAllocator>,
    driver: Arc<dyn AutomationDriver>,
    registry: Arc<dyn ProtocolRegistry>,
    state: Mutex<ConnState>,
}

impl BridgeSession {
    /// Session backed by the production collaborators: OS port allocator,
    /// Chrome driver, MCP registry.
    pub fn new(config: Config, paths: &Paths) -> Self {
        let driver = ChromeDriver::new(config.browser.clone(), paths);
        Self::with_collaborators(
            config,
            Arc::new(OsPortAllocator),
            Arc::new(driver),
            Arc::new(McpRegistry::new()),
        )
    }

    pub fn with_collaborators(
        config: Config,
        allocator: Arc<dyn PortAllocator>,
        driver: Arc<dyn AutomationDriver>,
        registry: Arc<dyn ProtocolRegistry>,
    ) -> Self {
        Self {
            config,
            allocator,
            driver,
            registry,
            state: Mutex::new(ConnState::default()),
        }
    }

    /// Bring port, browser, and client to ready. Idempotent and callable
    /// from any state; already-satisfied stages are skipped.
    pub async fn ensure_ready(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.ensure_ready_locked(&mut state).await
    }

    async fn ensure_ready_locked(&self, state: &mut ConnState) -> Result<()> {
        // Port stage. Allocated at most once per session and reused
        // unconditionally afterwards, even when a later stage failed.
        let port = match state.port {
            Some(port) => port,
            None => {
                let port = self.allocator.allocate().await?;
                info!(port, "allocated debug port");
                state.port = Some(port);
                port
            }
        };

        // Browser stage. Relaunch only when absent or dead; a dead browser
        // takes its page with it.
        if !state.browser_alive() {
            if state.browser.is_some() {
                warn!(port, "browser no longer connected, relaunching");
            }
            state.page = None;
            state.browser = None;

            let opts = LaunchOptions {
                headless: self.config.browser.headless,
                args: self.launch_args(port),
            };
            let browser = self.driver.launch(opts).await?;
            let context = browser.new_context(ContextOptions::default()).await?;
            let page = context.new_page().await?;
            state.browser = Some(browser);
            state.page = Some(page);
        }

        // Client stage. One registration per port-derived name; reconnect
        // when the resolved client reports itself disconnected.
        let name = client_name(port);
        let client = match self.registry.get(&name).await {
            Some(client) => client,
            None => {
                self.registry
                    .register(&name, self.attach_spec(port))
                    .await?;
                self.registry.get(&name).await.ok_or_else(|| {
                    Error::ClientInit(format!("{} missing after registration", name))
                })?
            }
        };
        if client.status() != ClientStatus::Connected {
            client.connect().await?;
        }
        state.client = Some(client);

        Ok(())
    }

    /// Protocol-client accessor. A stored, connected client is returned
    /// without touching the browser stages at all.
    pub async fn client(&self) -> Result<Arc<dyn ProtocolClient>> {
        let mut state = self.state.lock().await;
        if !state.client_connected() {
            self.ensure_ready_locked(&mut state).await?;
        }
        state
            .client
            .clone()
            .ok_or_else(|| Error::NotAvailable("protocol client".to_string()))
    }

    /// Page accessor.
    pub async fn page(&self) -> Result<Arc<dyn Page>> {
        let mut state = self.state.lock().await;
        if state.page.is_none() {
            self.ensure_ready_locked(&mut state).await?;
        }
        state
            .page
            .clone()
            .ok_or_else(|| Error::NotAvailable("page".to_string()))
    }

    /// External shutdown path. The lifecycle stages never close anything;
    /// this does. The port number is kept, so a later ensure relaunches on
    /// the same port.
    pub async fn close(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.page = None;
        state.client = None;
        if let Some(browser) = state.browser.take() {
            browser.close().await?;
        }
        Ok(())
    }

    fn launch_args(&self, port: u16) -> Vec<String> {
        let mut args = vec![
            format!("--remote-debugging-port={}", port),
            format!(
                "--window-size={},{}",
                self.config.browser.window_width, self.config.browser.window_height
            ),
        ];
        args.extend(self.config.browser.extra_args.iter().cloned());
        args
    }

    /// Spec for a client that attaches to the browser we launched. The
    /// server must never bring up a browser of its own.
    fn attach_spec(&self, port: u16) -> ServerSpec {
        ServerSpec {
            command: self.config.client.command.clone(),
            args: vec![
                "--browser-url".to_string(),
                format!("http://127.0.0.1:{}", port),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{MockAllocator, MockDriver, MockRegistry};

    fn session(
        allocator: Arc<MockAllocator>,
        driver: Arc<MockDriver>,
        registry: Arc<MockRegistry>,
    ) -> BridgeSession {
        BridgeSession::with_collaborators(Config::default(), allocator, driver, registry)
    }

    fn fresh() -> (Arc<MockAllocator>, Arc<MockDriver>, Arc<MockRegistry>, BridgeSession) {
        let allocator = Arc::new(MockAllocator::fixed(54213));
        let driver = Arc::new(MockDriver::new());
        let registry = Arc::new(MockRegistry::new());
        let s = session(allocator.clone(), driver.clone(), registry.clone());
        (allocator, driver, registry, s)
    }

    #[tokio::test]
    async fn test_port_allocated_exactly_once() {
        let (allocator, _, _, s) = fresh();
        s.ensure_ready().await.unwrap();
        s.ensure_ready().await.unwrap();
        s.ensure_ready().await.unwrap();
        assert_eq!(allocator.calls(), 1);
    }

    #[tokio::test]
    async fn test_connected_browser_not_relaunched() {
        let (_, driver, _, s) = fresh();
        s.ensure_ready().await.unwrap();
        s.ensure_ready().await.unwrap();
        assert_eq!(driver.launch_count(), 1);
    }

    #[tokio::test]
    async fn test_dead_browser_relaunched_once_and_page_discarded() {
        let (_, driver, _, s) = fresh();
        s.ensure_ready().await.unwrap();
        let first = s.page().await.unwrap();

        driver.set_connected(false);
        s.ensure_ready().await.unwrap();
        assert_eq!(driver.launch_count(), 2);

        let second = s.page().await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_client_accessor_fast_path_has_no_side_effects() {
        let (allocator, driver, registry, s) = fresh();
        s.ensure_ready().await.unwrap();

        let client = s.client().await.unwrap();
        assert_eq!(client.status(), ClientStatus::Connected);
        assert_eq!(allocator.calls(), 1);
        assert_eq!(driver.launch_count(), 1);
        assert_eq!(registry.registrations(), 1);
    }

    #[tokio::test]
    async fn test_allocation_failure_stops_the_pipeline() {
        let allocator = Arc::new(MockAllocator::failing());
        let driver = Arc::new(MockDriver::new());
        let registry = Arc::new(MockRegistry::new());
        let s = session(allocator, driver.clone(), registry.clone());

        let err = s.ensure_ready().await.unwrap_err();
        assert!(matches!(err, Error::Allocation(_)));
        assert_eq!(driver.launch_count(), 0);
        assert_eq!(registry.registrations(), 0);
    }

    #[tokio::test]
    async fn test_launch_failure_keeps_the_port() {
        let (allocator, driver, registry, s) = fresh();
        driver.fail_next_launch();

        let err = s.ensure_ready().await.unwrap_err();
        assert!(matches!(err, Error::Launch(_)));
        assert_eq!(registry.registrations(), 0);

        // Retry reuses the stored port; only browser and client run again.
        s.ensure_ready().await.unwrap();
        assert_eq!(allocator.calls(), 1);
        assert_eq!(driver.launch_count(), 2);
        assert_eq!(registry.registrations(), 1);
    }

    #[tokio::test]
    async fn test_registration_failure_leaves_browser_live() {
        let (allocator, driver, registry, s) = fresh();
        registry.fail_next_register();

        let err = s.ensure_ready().await.unwrap_err();
        assert!(matches!(err, Error::ClientInit(_)));
        assert_eq!(driver.launch_count(), 1);

        // Retry skips port and browser, repeats only the client stage.
        s.ensure_ready().await.unwrap();
        assert_eq!(allocator.calls(), 1);
        assert_eq!(driver.launch_count(), 1);
        assert_eq!(registry.registrations(), 1);
    }

    #[tokio::test]
    async fn test_client_registered_with_browser_url_then_connected() {
        let (_, _, registry, s) = fresh();
        s.ensure_ready().await.unwrap();

        let specs = registry.recorded_specs();
        assert_eq!(specs.len(), 1);
        let (name, spec) = &specs[0];
        assert_eq!(name, "browser-54213");
        assert!(spec.args.contains(&"--browser-url".to_string()));
        assert!(spec.args.contains(&"http://127.0.0.1:54213".to_string()));

        let client = registry.client("browser-54213").unwrap();
        assert_eq!(client.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_connected_client_not_reconnected() {
        let (_, _, registry, s) = fresh();
        s.ensure_ready().await.unwrap();
        s.ensure_ready().await.unwrap();

        let client = registry.client("browser-54213").unwrap();
        assert_eq!(client.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_page_accessor_on_fresh_session_launches() {
        let (_, driver, _, s) = fresh();
        let page = s.page().await.unwrap();
        drop(page);

        assert_eq!(driver.launch_count(), 1);
        let opts = driver.last_launch().unwrap();
        assert!(!opts.headless);
        assert!(opts
            .args
            .contains(&"--remote-debugging-port=54213".to_string()));
        assert!(opts.args.contains(&"--window-size=1280,720".to_string()));
    }

    #[tokio::test]
    async fn test_page_accessor_returns_same_page() {
        let (_, driver, _, s) = fresh();
        let first = s.page().await.unwrap();
        let second = s.page().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(driver.launch_count(), 1);
    }

    #[tokio::test]
    async fn test_headless_from_config() {
        let allocator = Arc::new(MockAllocator::fixed(54213));
        let driver = Arc::new(MockDriver::new());
        let registry = Arc::new(MockRegistry::new());
        let mut config = Config::default();
        config.browser.headless = true;
        let s = BridgeSession::with_collaborators(config, allocator, driver.clone(), registry);

        s.ensure_ready().await.unwrap();
        assert!(driver.last_launch().unwrap().headless);
    }

    #[tokio::test]
    async fn test_close_then_ensure_relaunches_on_same_port() {
        let (allocator, driver, _, s) = fresh();
        s.ensure_ready().await.unwrap();
        s.close().await.unwrap();

        s.ensure_ready().await.unwrap();
        assert_eq!(allocator.calls(), 1);
        assert_eq!(driver.launch_count(), 2);
        assert!(driver
            .last_launch()
            .unwrap()
            .args
            .contains(&"--remote-debugging-port=54213".to_string()));
    }

    #[tokio::test]
    async fn test_concurrent_ensures_converge() {
        let (allocator, driver, registry, s) = fresh();
        let (a, b, c) = tokio::join!(s.ensure_ready(), s.ensure_ready(), s.ensure_ready());
        a.unwrap();
        b.unwrap();
        c.unwrap();

        assert_eq!(allocator.calls(), 1);
        assert_eq!(driver.launch_count(), 1);
        assert_eq!(registry.registrations(), 1);
    }
}
