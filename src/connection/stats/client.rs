use std::time::Instant;

/// Per-client bookkeeping tracked by the connection manager
#[derive(Debug, Clone)]
pub struct Stats {
    pub active_connections: usize,
    pub last_active: Instant,
    pub total_requests: u64,
    pub error_count: u64,
    pub last_error: Option<Instant>,
}
