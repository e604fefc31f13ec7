mod backoff;
mod config;
mod connection;
mod frame;
mod init;
mod io_operation;
mod kinds;
mod transport;
mod usage;

pub use kinds::FrameErrorKind;
pub use kinds::FrameFormatKind;
pub use kinds::FrameSizeKind;
pub use kinds::ProtocolErrorKind;
pub use kinds::SerialErrorKind;

pub use backoff::BackoffError;
pub use config::ConfigValidationError;
pub use connection::ConnectionError;
pub use frame::FrameError;
pub use init::InitializationError;
pub use io_operation::IoOperation;
pub use transport::TransportError;
pub use usage::UsageError;

use thiserror::Error;

/// Top-level error returned by every fallible master and slave operation.
#[derive(Error, Debug)]
pub enum ModbusError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("protocol exception: {kind} - {details}")]
    Protocol {
        kind: ProtocolErrorKind,
        details: String,
    },

    #[error("usage error: {0}")]
    Usage(#[from] UsageError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigValidationError),

    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("initialization error: {0}")]
    Init(#[from] InitializationError),
}

impl ModbusError {
    pub fn protocol(kind: ProtocolErrorKind, details: impl Into<String>) -> Self {
        ModbusError::Protocol {
            kind,
            details: details.into(),
        }
    }

    /// Builds a framing error from a `FrameErrorKind`, the taxonomy used at
    /// the codec's validation call sites (§7 "Framing error").
    pub fn frame(
        kind: FrameErrorKind,
        details: impl Into<String>,
        frame_data: Option<Vec<u8>>,
    ) -> Self {
        let details = details.into();
        match kind {
            FrameErrorKind::TooShort | FrameErrorKind::TooLong => {
                ModbusError::Frame(FrameError::Size {
                    kind: match kind {
                        FrameErrorKind::TooShort => FrameSizeKind::TooShort,
                        FrameErrorKind::TooLong => FrameSizeKind::TooLong,
                        _ => unreachable!(),
                    },
                    details,
                    frame_data,
                })
            }
            FrameErrorKind::InvalidFormat
            | FrameErrorKind::InvalidUnitId
            | FrameErrorKind::InvalidHeader
            | FrameErrorKind::UnexpectedResponse => ModbusError::Frame(FrameError::Format {
                kind: match kind {
                    FrameErrorKind::InvalidFormat => FrameFormatKind::InvalidFormat,
                    FrameErrorKind::InvalidHeader => FrameFormatKind::InvalidHeader,
                    FrameErrorKind::UnexpectedResponse => FrameFormatKind::UnexpectedResponse,
                    FrameErrorKind::InvalidUnitId => FrameFormatKind::InvalidFormat,
                    _ => unreachable!(),
                },
                details,
                frame_data,
            }),
            FrameErrorKind::InvalidCrc => ModbusError::Frame(FrameError::Crc {
                calculated: 0,
                received: 0,
                frame_hex: frame_data.map(hex::encode).unwrap_or_default(),
            }),
        }
    }

    pub fn crc(calculated: u16, received: u16, frame: &[u8]) -> Self {
        ModbusError::Frame(FrameError::Crc {
            calculated,
            received,
            frame_hex: hex::encode(frame),
        })
    }
}
