use thiserror::Error;

/// Rejected before any I/O takes place — a caller mistake, not a wire fault.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UsageError {
    #[error("quantity {quantity} out of range [{min}, {max}] for this function")]
    QuantityOutOfRange { quantity: u16, min: u16, max: u16 },

    #[error("request would exceed the 253-byte PDU limit ({len} bytes)")]
    PduTooLarge { len: usize },

    #[error("connection context is not connected")]
    NotConnected,

    #[error("{0} buffer is empty")]
    EmptyBuffer(&'static str),
}
