use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use tokio::sync::{Mutex, Semaphore};
use tracing::info;

use crate::{config::ConnectionConfig, errors::ConnectionError, ModbusError};

use super::{ClientStats, ConnectionGuard, ConnectionStats, IpStats};

/// Tracks concurrently open TCP clients on the slave side: global and
/// per-IP connection limits, idle/error eviction, and basic throughput
/// counters.
#[derive(Debug)]
pub struct Manager {
    per_ip_semaphores: Arc<Mutex<HashMap<SocketAddr, Arc<Semaphore>>>>,
    global_semaphore: Arc<Semaphore>,
    stats: Arc<Mutex<HashMap<SocketAddr, ClientStats>>>,
    config: ConnectionConfig,
    total_connections: Arc<AtomicU64>,
    total_requests: AtomicU64,
    error_count: AtomicU64,
    start_time: Instant,
}

impl Manager {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            per_ip_semaphores: Arc::new(Mutex::new(HashMap::new())),
            global_semaphore: Arc::new(Semaphore::new(config.max_connections)),
            stats: Arc::new(Mutex::new(HashMap::new())),
            config,
            total_connections: Arc::new(AtomicU64::new(0)),
            total_requests: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Attempt to establish a new connection, enforcing the global and
    /// per-IP limits. The returned guard decrements the live count on drop.
    pub async fn accept_connection(
        self: &Arc<Self>,
        addr: SocketAddr,
    ) -> Result<ConnectionGuard, ModbusError> {
        let per_ip_permit = if let Some(per_ip_limit) = self.config.per_ip_limits {
            let mut semaphores = self.per_ip_semaphores.lock().await;

            let semaphore = semaphores
                .entry(addr)
                .or_insert_with(|| Arc::new(Semaphore::new(per_ip_limit)));

            Some(semaphore.clone().try_acquire_owned().map_err(|_| {
                ModbusError::from(ConnectionError::limit_exceeded(format!(
                    "per-IP limit ({}) reached for {}",
                    per_ip_limit, addr
                )))
            })?)
        } else {
            None
        };

        let global_permit = self
            .global_semaphore
            .clone()
            .try_acquire_owned()
            .map_err(|_| {
                ModbusError::from(ConnectionError::limit_exceeded(
                    "global connection limit reached",
                ))
            })?;

        {
            let mut stats = self.stats.lock().await;
            let client_stats = stats.entry(addr).or_insert_with(|| ClientStats {
                active_connections: 0,
                last_active: Instant::now(),
                total_requests: 0,
                error_count: 0,
                last_error: None,
            });
            client_stats.active_connections += 1;
            client_stats.last_active = Instant::now();
        }

        self.total_connections.fetch_add(1, Ordering::Relaxed);

        Ok(ConnectionGuard {
            manager: Arc::clone(self),
            addr,
            _global_permit: global_permit,
            _per_ip_permit: per_ip_permit,
        })
    }

    pub async fn record_client_error(&self, addr: &SocketAddr) {
        let mut stats = self.stats.lock().await;
        let client_stats = stats.entry(*addr).or_insert_with(|| ClientStats {
            active_connections: 0,
            last_active: Instant::now(),
            total_requests: 0,
            error_count: 0,
            last_error: None,
        });
        client_stats.error_count += 1;
        client_stats.last_error = Some(Instant::now());
        self.error_count.fetch_add(1, Ordering::Relaxed);
    }

    pub async fn record_request(&self, addr: SocketAddr, success: bool) {
        let mut stats = self.stats.lock().await;
        if let Some(client_stats) = stats.get_mut(&addr) {
            client_stats.total_requests += 1;
            client_stats.last_active = Instant::now();
            if !success {
                client_stats.error_count += 1;
                client_stats.last_error = Some(Instant::now());
            }
        }
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    fn should_evict(stats: &ClientStats, now: Instant, idle: Duration, error: Duration) -> bool {
        now.duration_since(stats.last_active) >= idle
            || (stats.error_count > 0 && now.duration_since(stats.last_error.unwrap_or(now)) >= error)
    }

    /// Drops bookkeeping for clients that have gone idle or kept erroring.
    /// Does not close sockets — that is the caller's job once it observes
    /// the client missing from `get_stats`.
    pub async fn cleanup_idle_connections(&self) {
        let now = Instant::now();
        let mut stats = self.stats.lock().await;
        let to_clean: Vec<SocketAddr> = stats
            .iter()
            .filter(|(_, s)| {
                Self::should_evict(s, now, self.config.idle_timeout, self.config.error_timeout)
            })
            .map(|(addr, _)| *addr)
            .collect();

        for addr in to_clean {
            if let Some(s) = stats.remove(&addr) {
                info!(
                    %addr,
                    active = s.active_connections,
                    errors = s.error_count,
                    "evicted idle or erroring connection"
                );
            }
        }
    }

    pub async fn get_stats(&self) -> ConnectionStats {
        let stats = self.stats.lock().await;
        let mut total_active = 0usize;
        let mut total_requests = 0u64;
        let mut total_errors = 0u64;
        let mut per_ip_stats = HashMap::new();

        for (addr, client_stats) in stats.iter() {
            total_active += client_stats.active_connections;
            total_requests += client_stats.total_requests;
            total_errors += client_stats.error_count;

            per_ip_stats.insert(
                *addr,
                IpStats {
                    active_connections: client_stats.active_connections,
                    total_requests: client_stats.total_requests,
                    error_count: client_stats.error_count,
                    last_active: client_stats.last_active,
                    last_error: client_stats.last_error,
                },
            );
        }

        ConnectionStats {
            total_connections: self.total_connections.load(Ordering::Relaxed),
            active_connections: total_active,
            total_requests,
            total_errors,
            requests_per_second: self.requests_per_second(),
            avg_response_time_ms: 0,
            per_ip_stats,
        }
    }

    pub async fn connection_count(&self, addr: &SocketAddr) -> usize {
        self.stats
            .lock()
            .await
            .get(addr)
            .map(|s| s.active_connections)
            .unwrap_or(0)
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    pub fn requests_per_second(&self) -> f64 {
        let total = self.total_requests.load(Ordering::Relaxed) as f64;
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            total / elapsed
        } else {
            0.0
        }
    }

    pub(super) async fn on_guard_drop(&self, addr: SocketAddr) {
        let mut stats = self.stats.lock().await;
        if let Some(client_stats) = stats.get_mut(&addr) {
            client_stats.active_connections = client_stats.active_connections.saturating_sub(1);
        }
    }
}
