//! Process-backed Chrome driver.
//!
//! Launches a Chrome/Chromium process with the caller-supplied flag list,
//! waits for its DevTools endpoint to come up, and exposes the browser,
//! context, and page handles over CDP.

use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use webbridge_core::{BrowserConfig, Error, Paths, Result};

use super::{AutomationDriver, BrowserContext, BrowserHandle, ContextOptions, LaunchOptions, Page};
use crate::cdp::CdpClient;

const READY_TIMEOUT_SECS: u64 = 15;

/// Anything that fails while producing a live browser/page is a launch
/// failure from the caller's point of view.
fn launch_err(e: Error) -> Error {
    Error::Launch(e.to_string())
}

pub struct ChromeDriver {
    config: BrowserConfig,
    profile_dir: PathBuf,
}

impl ChromeDriver {
    pub fn new(config: BrowserConfig, paths: &Paths) -> Self {
        Self {
            config,
            profile_dir: paths.profile_dir(),
        }
    }
}

#[async_trait]
impl AutomationDriver for ChromeDriver {
    async fn launch(&self, opts: LaunchOptions) -> Result<Arc<dyn BrowserHandle>> {
        let binary = self
            .config
            .binary
            .clone()
            .or_else(find_browser_binary)
            .ok_or_else(|| Error::Launch("no Chrome or Chromium binary found".to_string()))?;

        let port = debug_port_from_args(&opts.args).ok_or_else(|| {
            Error::Launch("launch args carry no --remote-debugging-port flag".to_string())
        })?;

        std::fs::create_dir_all(&self.profile_dir)
            .map_err(|e| Error::Launch(format!("profile dir: {}", e)))?;

        let mut args = opts.args.clone();
        args.push(format!("--user-data-dir={}", self.profile_dir.display()));
        args.push("--no-first-run".to_string());
        args.push("--no-default-browser-check".to_string());
        args.push("--disable-background-networking".to_string());
        if opts.headless {
            args.push("--headless=new".to_string());
        }
        args.push("about:blank".to_string());

        info!(port, headless = opts.headless, binary = %binary, "Launching browser");

        let child = Command::new(&binary)
            .args(&args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Launch(format!("spawn {}: {}", binary, e)))?;

        let ws_url = wait_for_ready(port, READY_TIMEOUT_SECS).await?;
        debug!(ws_url = %ws_url, "DevTools endpoint up");

        let cdp = CdpClient::connect(&ws_url).await.map_err(launch_err)?;

        Ok(Arc::new(ChromeBrowser {
            cdp: Arc::new(cdp),
            port,
            child: Mutex::new(child),
        }))
    }
}

pub struct ChromeBrowser {
    cdp: Arc<CdpClient>,
    port: u16,
    child: Mutex<Child>,
}

#[async_trait]
impl BrowserHandle for ChromeBrowser {
    fn is_connected(&self) -> bool {
        self.cdp.is_connected()
    }

    async fn new_context(&self, _opts: ContextOptions) -> Result<Arc<dyn BrowserContext>> {
        let context_id = self.cdp.create_browser_context().await.map_err(launch_err)?;
        Ok(Arc::new(ChromeContext {
            cdp: self.cdp.clone(),
            context_id,
            port: self.port,
        }))
    }

    async fn close(&self) -> Result<()> {
        if let Err(e) = self.cdp.close_browser().await {
            debug!("Browser.close failed (may already be gone): {}", e);
        }
        let mut child = self.child.lock().await;
        let _ = child.kill().await;
        Ok(())
    }
}

pub struct ChromeContext {
    cdp: Arc<CdpClient>,
    context_id: String,
    port: u16,
}

#[async_trait]
impl BrowserContext for ChromeContext {
    async fn new_page(&self) -> Result<Arc<dyn Page>> {
        let target_id = self
            .cdp
            .create_target("about:blank", Some(&self.context_id))
            .await
            .map_err(launch_err)?;

        let ws_url = page_ws_url(self.port, &target_id).await?;
        let page_cdp = CdpClient::connect(&ws_url).await.map_err(launch_err)?;

        page_cdp.enable_domain("Page").await.map_err(launch_err)?;
        page_cdp.enable_domain("Runtime").await.map_err(launch_err)?;
        page_cdp.enable_domain("DOM").await.map_err(launch_err)?;

        info!(target_id = %target_id, "Page target ready");
        Ok(Arc::new(ChromePage { cdp: page_cdp }))
    }
}

pub struct ChromePage {
    cdp: CdpClient,
}

#[async_trait]
impl Page for ChromePage {
    async fn evaluate(&self, function: &str, args: Value) -> Result<Value> {
        self.cdp.call_function(function, args).await
    }

    async fn url(&self) -> Result<String> {
        let value = self.cdp.evaluate_expression("window.location.href").await?;
        value
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| Error::Cdp("location.href was not a string".to_string()))
    }
}

/// Find a Chrome/Chromium binary: well-known install paths first, then $PATH.
pub fn find_browser_binary() -> Option<String> {
    let candidates: &[&str] = if cfg!(target_os = "macos") {
        &[
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
        ]
    } else if cfg!(target_os = "linux") {
        &[
            "google-chrome",
            "google-chrome-stable",
            "chromium",
            "chromium-browser",
            "/usr/bin/google-chrome",
            "/usr/bin/chromium",
        ]
    } else {
        &[
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
        ]
    };

    for candidate in candidates {
        if std::path::Path::new(candidate).exists() {
            return Some(candidate.to_string());
        }
        if !candidate.contains('/') && !candidate.contains('\\') && which::which(candidate).is_ok() {
            return Some(candidate.to_string());
        }
    }
    None
}

/// Read the debug port back out of the launch flag list.
fn debug_port_from_args(args: &[String]) -> Option<u16> {
    args.iter()
        .find_map(|a| a.strip_prefix("--remote-debugging-port="))
        .and_then(|p| p.parse().ok())
}

/// Poll /json/version until the browser-level WebSocket URL appears.
async fn wait_for_ready(port: u16, timeout_secs: u64) -> Result<String> {
    let url = format!("http://127.0.0.1:{}/json/version", port);
    let start = std::time::Instant::now();
    let timeout = std::time::Duration::from_secs(timeout_secs);

    loop {
        if start.elapsed() > timeout {
            return Err(Error::Launch(format!(
                "DevTools endpoint not ready after {}s on port {}",
                timeout_secs, port
            )));
        }

        if let Ok(resp) = reqwest::get(&url).await {
            if let Ok(body) = resp.json::<Value>().await {
                if let Some(ws) = body.get("webSocketDebuggerUrl").and_then(|v| v.as_str()) {
                    return Ok(ws.to_string());
                }
            }
        }

        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    }
}

/// Resolve a target id to its WebSocket URL via /json/list. The target may
/// take a moment to show up after creation, so a few retries are needed.
async fn page_ws_url(port: u16, target_id: &str) -> Result<String> {
    let url = format!("http://127.0.0.1:{}/json/list", port);

    for attempt in 0..10 {
        if attempt > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        }

        let resp = match reqwest::get(&url).await {
            Ok(r) => r,
            Err(e) => {
                warn!("target list fetch failed: {}", e);
                continue;
            }
        };
        let targets: Vec<Value> = match resp.json().await {
            Ok(t) => t,
            Err(_) => continue,
        };

        for target in &targets {
            if target.get("id").and_then(|v| v.as_str()) == Some(target_id) {
                if let Some(ws) = target.get("webSocketDebuggerUrl").and_then(|v| v.as_str()) {
                    return Ok(ws.to_string());
                }
            }
        }
    }

    Err(Error::Launch(format!(
        "no WebSocket URL for target '{}' after retries",
        target_id
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_port_from_args() {
        let args = vec![
            "--window-size=1280,720".to_string(),
            "--remote-debugging-port=54213".to_string(),
        ];
        assert_eq!(debug_port_from_args(&args), Some(54213));
        assert_eq!(debug_port_from_args(&["--headless".to_string()]), None);
    }
}
