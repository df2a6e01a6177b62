//! Mock collaborators for lifecycle and action tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use webbridge_core::{Error, Result};

use crate::driver::{
    AutomationDriver, BrowserContext, BrowserHandle, ContextOptions, LaunchOptions, Page,
};
use crate::port::PortAllocator;
use crate::protocol::{ClientStatus, ProtocolClient, ProtocolRegistry, ServerSpec, ToolOutput};

// ─── Port allocator ──────────────────────────────────────────────────

pub struct MockAllocator {
    port: Option<u16>,
    calls: AtomicUsize,
}

impl MockAllocator {
    pub fn fixed(port: u16) -> Self {
        Self {
            port: Some(port),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            port: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PortAllocator for MockAllocator {
    async fn allocate(&self) -> Result<u16> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.port
            .ok_or_else(|| Error::Allocation("no port (mock)".to_string()))
    }
}

// ─── Driver ──────────────────────────────────────────────────────────

pub struct MockDriver {
    launches: AtomicUsize,
    last_launch: Mutex<Option<LaunchOptions>>,
    fail_next: AtomicBool,
    connected: Arc<AtomicBool>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self {
            launches: AtomicUsize::new(0),
            last_launch: Mutex::new(None),
            fail_next: AtomicBool::new(false),
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn launch_count(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn last_launch(&self) -> Option<LaunchOptions> {
        self.last_launch.lock().unwrap().clone()
    }

    pub fn fail_next_launch(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Flip the liveness every launched handle reports.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }
}

#[async_trait]
impl AutomationDriver for MockDriver {
    async fn launch(&self, opts: LaunchOptions) -> Result<Arc<dyn BrowserHandle>> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        *self.last_launch.lock().unwrap() = Some(opts);
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(Error::Launch("launch failed (mock)".to_string()));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(Arc::new(MockBrowser {
            connected: self.connected.clone(),
        }))
    }
}

pub struct MockBrowser {
    connected: Arc<AtomicBool>,
}

#[async_trait]
impl BrowserHandle for MockBrowser {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn new_context(&self, _opts: ContextOptions) -> Result<Arc<dyn BrowserContext>> {
        Ok(Arc::new(MockContext))
    }

    async fn close(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

pub struct MockContext;

#[async_trait]
impl BrowserContext for MockContext {
    async fn new_page(&self) -> Result<Arc<dyn Page>> {
        Ok(Arc::new(MockPage))
    }
}

pub struct MockPage;

#[async_trait]
impl Page for MockPage {
    async fn evaluate(&self, function: &str, args: Value) -> Result<Value> {
        Ok(json!({ "function": function, "args": args }))
    }

    async fn url(&self) -> Result<String> {
        Ok("about:blank".to_string())
    }
}

// ─── Protocol registry / client ──────────────────────────────────────

pub struct MockRegistry {
    clients: Mutex<std::collections::HashMap<String, Arc<MockClient>>>,
    specs: Mutex<Vec<(String, ServerSpec)>>,
    fail_register: AtomicBool,
}

impl MockRegistry {
    pub fn new() -> Self {
        Self {
            clients: Mutex::new(std::collections::HashMap::new()),
            specs: Mutex::new(Vec::new()),
            fail_register: AtomicBool::new(false),
        }
    }

    pub fn registrations(&self) -> usize {
        self.specs.lock().unwrap().len()
    }

    pub fn recorded_specs(&self) -> Vec<(String, ServerSpec)> {
        self.specs.lock().unwrap().clone()
    }

    pub fn client(&self, name: &str) -> Option<Arc<MockClient>> {
        self.clients.lock().unwrap().get(name).cloned()
    }

    pub fn fail_next_register(&self) {
        self.fail_register.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ProtocolRegistry for MockRegistry {
    async fn get(&self, name: &str) -> Option<Arc<dyn ProtocolClient>> {
        self.clients
            .lock()
            .unwrap()
            .get(name)
            .map(|c| c.clone() as Arc<dyn ProtocolClient>)
    }

    async fn register(&self, name: &str, spec: ServerSpec) -> Result<()> {
        if self.fail_register.swap(false, Ordering::SeqCst) {
            return Err(Error::ClientInit("registry down (mock)".to_string()));
        }
        self.specs.lock().unwrap().push((name.to_string(), spec));
        self.clients
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MockClient::new()));
        Ok(())
    }
}

pub struct MockClient {
    connected: AtomicBool,
    connects: AtomicUsize,
    calls: Mutex<Vec<(String, Value)>>,
}

impl MockClient {
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
            connects: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn recorded_calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProtocolClient for MockClient {
    fn status(&self) -> ClientStatus {
        if self.connected.load(Ordering::SeqCst) {
            ClientStatus::Connected
        } else {
            ClientStatus::Disconnected
        }
    }

    async fn connect(&self) -> Result<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn call_tool(&self, tool: &str, args: Value) -> Result<ToolOutput> {
        self.calls.lock().unwrap().push((tool.to_string(), args));
        let output: ToolOutput = serde_json::from_value(json!({
            "content": [{ "type": "text", "text": "ok" }]
        }))?;
        Ok(output)
    }
}
