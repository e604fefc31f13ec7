pub mod bitops;
pub mod codec;
pub mod config;
pub mod connection;
pub mod crc;
pub mod errors;
pub mod logging;
pub mod master;
pub mod pdu;
pub mod slave;
pub mod transport;
mod utils;

pub use config::{
    BackoffConfig, ConnectionConfig, LoggingConfig, SerialConfig, StationConfig, TcpConfig,
};
pub use config::{DataBits, Parity, StopBits};
pub use connection::BackoffStrategy;
pub use connection::{ClientStats, ConnectionStats, IpStats};
pub use connection::{ConnectionGuard, ConnectionManager};
pub use errors::{
    BackoffError, ConfigValidationError, ConnectionError, FrameErrorKind, IoOperation,
    ModbusError, ProtocolErrorKind, SerialErrorKind, TransportError,
};
pub use logging::setup_logging;
pub use master::Master;
pub use slave::{DataMap, BROADCAST_ADDRESS, MAX_REPORT_SLAVE_ID_LEN};
pub use transport::{RtuTransport, TcpTransport};
