//! TCP master transport: connects once, then frames each MBAP exchange by
//! its own declared length field rather than guessing a fixed size.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::trace;

use crate::codec::MBAP_HEADER_LEN;
use crate::config::TcpConfig;
use crate::errors::{IoOperation, TransportError};
use crate::ModbusError;

pub struct TcpTransport {
    stream: Mutex<TcpStream>,
    request_timeout: std::time::Duration,
    debug: AtomicBool,
}

impl TcpTransport {
    pub async fn connect(config: &TcpConfig) -> Result<Self, ModbusError> {
        let stream = timeout(config.connect_timeout, TcpStream::connect(config.addr()))
            .await
            .map_err(|_| TransportError::timeout(config.connect_timeout, config.connect_timeout))?
            .map_err(TransportError::Network)?;

        Ok(Self {
            stream: Mutex::new(stream),
            request_timeout: config.request_timeout,
            debug: AtomicBool::new(false),
        })
    }

    /// Raises this connection's own trace level for frame logging,
    /// independent of the global `tracing` filter.
    pub fn set_debug(&self, debug: bool) {
        self.debug.store(debug, Ordering::Relaxed);
    }

    pub async fn exchange(&self, request: &[u8]) -> Result<Vec<u8>, ModbusError> {
        timeout(self.request_timeout, self.exchange_inner(request))
            .await
            .map_err(|_| TransportError::timeout(self.request_timeout, self.request_timeout))?
    }

    async fn exchange_inner(&self, request: &[u8]) -> Result<Vec<u8>, ModbusError> {
        let mut stream = self.stream.lock().await;

        if self.debug.load(Ordering::Relaxed) {
            trace!(frame = %hex::encode(request), "tcp frame sent");
        }

        stream
            .write_all(request)
            .await
            .map_err(|e| TransportError::Io {
                operation: IoOperation::Write,
                details: e.to_string(),
                source: e,
            })?;

        let mut header = [0u8; MBAP_HEADER_LEN];
        stream
            .read_exact(&mut header)
            .await
            .map_err(|e| TransportError::Io {
                operation: IoOperation::Read,
                details: e.to_string(),
                source: e,
            })?;

        let declared_length = u16::from_be_bytes([header[4], header[5]]) as usize;
        if declared_length == 0 {
            return Err(TransportError::Eof {
                operation: IoOperation::Read,
            }
            .into());
        }

        let mut rest = vec![0u8; declared_length - 1];
        stream
            .read_exact(&mut rest)
            .await
            .map_err(|e| TransportError::Io {
                operation: IoOperation::Read,
                details: e.to_string(),
                source: e,
            })?;

        let mut frame = Vec::with_capacity(MBAP_HEADER_LEN + rest.len());
        frame.extend_from_slice(&header);
        frame.extend_from_slice(&rest);

        if self.debug.load(Ordering::Relaxed) {
            trace!(frame = %hex::encode(&frame), "tcp frame received");
        }

        Ok(frame)
    }
}
