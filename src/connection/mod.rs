mod backoff_strategy;
mod guard;
mod manager;
mod stats;

pub use backoff_strategy::BackoffStrategy;
pub use guard::ConnectionGuard;
pub use manager::Manager as ConnectionManager;
pub use stats::ClientStats;
pub use stats::ConnectionStats;
pub use stats::IpStats;

#[cfg(test)]
mod tests {
    use std::{
        net::{IpAddr, Ipv4Addr, SocketAddr},
        sync::Arc,
        time::Duration,
    };

    use tokio::time::sleep;

    use crate::config::{BackoffConfig, ConnectionConfig};

    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), port)
    }

    #[tokio::test]
    async fn per_ip_limit_rejects_second_connection() {
        let config = ConnectionConfig {
            max_connections: 2,
            per_ip_limits: Some(1),
            ..Default::default()
        };
        let manager = Arc::new(ConnectionManager::new(config));
        let a = addr(1234);

        let conn1 = manager.accept_connection(a).await;
        assert!(conn1.is_ok());

        let conn2 = manager.accept_connection(a).await;
        assert!(conn2.is_err());
    }

    #[tokio::test]
    async fn stats_reflect_active_and_total_connections() {
        let config = ConnectionConfig {
            max_connections: 1,
            per_ip_limits: Some(1),
            ..Default::default()
        };
        let manager = Arc::new(ConnectionManager::new(config));
        let a = addr(1234);

        let conn = manager.accept_connection(a).await.unwrap();
        let _err = manager.accept_connection(a).await.unwrap_err();

        let stats = manager.get_stats().await;
        assert_eq!(stats.active_connections, 1);
        assert_eq!(stats.total_connections, 1);

        drop(conn);
    }

    #[tokio::test]
    async fn idle_connections_are_evicted() {
        let config = ConnectionConfig {
            idle_timeout: Duration::from_millis(50),
            ..Default::default()
        };
        let manager = Arc::new(ConnectionManager::new(config));
        let a = addr(1234);

        let _conn = manager.accept_connection(a).await.unwrap();
        assert_eq!(manager.get_stats().await.active_connections, 1);

        sleep(Duration::from_millis(100)).await;
        manager.cleanup_idle_connections().await;

        assert_eq!(manager.get_stats().await.active_connections, 0);
    }

    #[tokio::test]
    async fn guard_drop_releases_the_slot() {
        let config = ConnectionConfig::default();
        let manager = Arc::new(ConnectionManager::new(config));
        let a = addr(8080);

        {
            let guard = manager.accept_connection(a).await.unwrap();
            assert_eq!(manager.get_stats().await.active_connections, 1);
            drop(guard);
        }

        sleep(Duration::from_millis(50)).await;
        assert_eq!(manager.connection_count(&a).await, 0);
    }

    #[tokio::test]
    async fn backoff_strategy_doubles_until_exhausted_then_resets() {
        let config = BackoffConfig {
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(1),
            multiplier: 2.0,
            max_retries: 3,
        };
        let mut strategy = BackoffStrategy::new(config);

        assert_eq!(strategy.next_backoff().unwrap().as_millis(), 100);
        assert_eq!(strategy.next_backoff().unwrap().as_millis(), 200);
        assert_eq!(strategy.next_backoff().unwrap().as_millis(), 400);
        assert!(strategy.next_backoff().is_none());

        strategy.reset();
        assert_eq!(strategy.next_backoff().unwrap().as_millis(), 100);
    }
}
