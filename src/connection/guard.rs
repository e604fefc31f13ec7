use std::{net::SocketAddr, sync::Arc};

use super::ConnectionManager;

/// RAII guard for an accepted TCP connection. Releases its connection-limit
/// permits and decrements the live count on drop.
#[derive(Debug)]
pub struct ConnectionGuard {
    pub(super) manager: Arc<ConnectionManager>,
    pub(super) addr: SocketAddr,
    pub(super) _global_permit: tokio::sync::OwnedSemaphorePermit,
    pub(super) _per_ip_permit: Option<tokio::sync::OwnedSemaphorePermit>,
}

impl ConnectionGuard {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let manager = Arc::clone(&self.manager);
        let addr = self.addr;
        tokio::spawn(async move {
            manager.on_guard_drop(addr).await;
        });
    }
}
