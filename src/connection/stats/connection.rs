use std::{collections::HashMap, net::SocketAddr};

use super::IpStats;

/// Aggregate snapshot returned by [`crate::connection::ConnectionManager::get_stats`]
#[derive(Debug)]
pub struct Stats {
    pub total_connections: u64,
    pub active_connections: usize,
    pub total_requests: u64,
    pub total_errors: u64,
    pub requests_per_second: f64,
    pub avg_response_time_ms: u64,
    pub per_ip_stats: HashMap<SocketAddr, IpStats>,
}
