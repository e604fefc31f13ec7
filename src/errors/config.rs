use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigValidationError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("TCP configuration error: {0}")]
    Tcp(String),

    #[error("serial configuration error: {0}")]
    Serial(String),

    #[error("connection configuration error: {0}")]
    Connection(String),

    #[error("logging configuration error: {0}")]
    Logging(String),
}

impl ConfigValidationError {
    pub fn config(details: impl Into<String>) -> Self {
        Self::Config(details.into())
    }

    pub fn tcp(details: impl Into<String>) -> Self {
        Self::Tcp(details.into())
    }

    pub fn serial(details: impl Into<String>) -> Self {
        Self::Serial(details.into())
    }

    pub fn connection(details: impl Into<String>) -> Self {
        Self::Connection(details.into())
    }

    pub fn logging(details: impl Into<String>) -> Self {
        Self::Logging(details.into())
    }
}
