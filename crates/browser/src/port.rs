//! Ephemeral TCP port discovery.

use async_trait::async_trait;
use tokio::net::TcpListener;
use webbridge_core::{Error, Result};

#[async_trait]
pub trait PortAllocator: Send + Sync {
    async fn allocate(&self) -> Result<u16>;
}

/// OS-backed allocator used by production sessions.
pub struct OsPortAllocator;

#[async_trait]
impl PortAllocator for OsPortAllocator {
    async fn allocate(&self) -> Result<u16> {
        allocate().await
    }
}

/// Ask the OS for a currently-free TCP port.
///
/// Binds a transient listener to port 0, reads back the assigned port, and
/// closes the socket before returning; only the number is kept. A single
/// attempt per call; retrying is the caller's decision.
pub async fn allocate() -> Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .map_err(|e| Error::Allocation(format!("bind failed: {}", e)))?;
    let addr = listener
        .local_addr()
        .map_err(|e| Error::Allocation(format!("no local address: {}", e)))?;
    let port = addr.port();
    if port == 0 {
        return Err(Error::Allocation("OS reported port 0".to_string()));
    }
    drop(listener);
    Ok(port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_allocate_returns_nonzero_port() {
        let port = allocate().await.unwrap();
        assert!(port > 0);
    }

    #[tokio::test]
    async fn test_port_is_released_after_probe() {
        let port = allocate().await.unwrap();
        // The probe socket is closed, so the port must be bindable again.
        let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
        assert_eq!(listener.local_addr().unwrap().port(), port);
    }
}
