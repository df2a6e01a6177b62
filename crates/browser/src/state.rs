//! Lazily-created connection state.

use std::sync::Arc;

use crate::driver::{BrowserHandle, Page};
use crate::protocol::{ClientStatus, ProtocolClient};

/// The session's three independently-failing resources plus the page derived
/// from the browser. All slots start empty; the lifecycle stages fill them in
/// dependency order. The port, once set, is never cleared or replaced.
#[derive(Default)]
pub struct ConnState {
    pub port: Option<u16>,
    pub browser: Option<Arc<dyn BrowserHandle>>,
    pub page: Option<Arc<dyn Page>>,
    pub client: Option<Arc<dyn ProtocolClient>>,
}

impl ConnState {
    pub fn browser_alive(&self) -> bool {
        self.browser.as_ref().is_some_and(|b| b.is_connected())
    }

    pub fn client_connected(&self) -> bool {
        self.client
            .as_ref()
            .is_some_and(|c| c.status() == ClientStatus::Connected)
    }
}
