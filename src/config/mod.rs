mod backoff;
mod connection;
mod logging;
mod serial;
mod station;
mod tcp;
mod types;

pub use backoff::Config as BackoffConfig;
pub use connection::Config as ConnectionConfig;
pub use logging::Config as LoggingConfig;
pub use serial::Config as SerialConfig;
pub use station::Config as StationConfig;
pub use tcp::Config as TcpConfig;
pub use types::{DataBits, Parity, StopBits};
