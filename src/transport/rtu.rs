//! Serial transport: frames one request/reply exchange over an RTU line.
//!
//! Drives a blocking `Box<dyn SerialPort>` from inside an async fn rather
//! than via `spawn_blocking`, polling for the begin-of-frame / end-of-frame
//! silence the RTU wire format uses to mark frame boundaries.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use serialport::SerialPort;
use tokio::sync::Mutex;
use tracing::trace;

use crate::config::SerialConfig;
use crate::errors::{IoOperation, TransportError};
use crate::ModbusError;

/// The line settings in effect right after `open()`, captured so `close`
/// (here, `Drop`) can put the port back the way it found it rather than
/// leaving it in whatever state the last request configured.
struct PortSettings {
    baud_rate: u32,
    data_bits: serialport::DataBits,
    parity: serialport::Parity,
    stop_bits: serialport::StopBits,
}

pub struct RtuTransport {
    port: Mutex<Box<dyn SerialPort>>,
    begin_frame_timeout: Duration,
    end_frame_timeout: Duration,
    opened_with: PortSettings,
    debug: AtomicBool,
}

impl RtuTransport {
    pub fn open(config: &SerialConfig) -> Result<Self, ModbusError> {
        let port = serialport::new(&config.device, config.baud_rate)
            .data_bits(config.data_bits.into())
            .parity(config.parity.into())
            .stop_bits(config.stop_bits.into())
            .timeout(Duration::from_millis(20))
            .open()
            .map_err(TransportError::from)?;

        let opened_with = PortSettings {
            baud_rate: port.baud_rate().unwrap_or(config.baud_rate),
            data_bits: port.data_bits().unwrap_or_else(|_| config.data_bits.into()),
            parity: port.parity().unwrap_or_else(|_| config.parity.into()),
            stop_bits: port.stop_bits().unwrap_or_else(|_| config.stop_bits.into()),
        };

        Ok(Self {
            port: Mutex::new(port),
            begin_frame_timeout: config.begin_frame_timeout,
            end_frame_timeout: config.end_frame_timeout,
            opened_with,
            debug: AtomicBool::new(false),
        })
    }

    /// Raises this connection's own trace level for frame logging,
    /// independent of the global `tracing` filter.
    pub fn set_debug(&self, debug: bool) {
        self.debug.store(debug, Ordering::Relaxed);
    }

    fn debug_enabled(&self) -> bool {
        self.debug.load(Ordering::Relaxed)
    }

    /// Discards whatever is sitting in the input buffer. Called before every
    /// request so a reply left over from a previous, abandoned transaction
    /// can't be mistaken for the next one's.
    pub async fn flush(&self) -> Result<(), ModbusError> {
        let port = self.port.lock().await;
        port.clear(serialport::ClearBuffer::Input)
            .map_err(TransportError::from)?;
        Ok(())
    }

    /// Sends `request` and waits for a full reply frame. The reply length is
    /// unknown up front (it may be a normal or exception PDU) so the frame
    /// boundary is the line falling silent for `end_frame_timeout`, as the
    /// wire format intends.
    pub async fn exchange(&self, request: &[u8]) -> Result<Vec<u8>, ModbusError> {
        self.flush().await?;

        let mut port = self.port.lock().await;

        if self.debug_enabled() {
            trace!(frame = %hex::encode(request), "rtu frame sent");
        }

        port.write_all(request).map_err(|e| {
            TransportError::Io {
                operation: IoOperation::Write,
                details: e.to_string(),
                source: e,
            }
        })?;
        port.flush().map_err(|e| TransportError::Io {
            operation: IoOperation::Flush,
            details: e.to_string(),
            source: e,
        })?;

        let frame = read_frame(
            port.as_mut(),
            self.begin_frame_timeout,
            self.end_frame_timeout,
        )
        .await?;

        if self.debug_enabled() {
            trace!(frame = %hex::encode(&frame), "rtu frame received");
        } else {
            trace!(len = frame.len(), "rtu frame received");
        }
        Ok(frame)
    }
}

impl Drop for RtuTransport {
    fn drop(&mut self) {
        let port = self.port.get_mut();
        let _ = port.set_baud_rate(self.opened_with.baud_rate);
        let _ = port.set_data_bits(self.opened_with.data_bits);
        let _ = port.set_parity(self.opened_with.parity);
        let _ = port.set_stop_bits(self.opened_with.stop_bits);
    }
}

async fn read_frame(
    port: &mut dyn SerialPort,
    begin_frame_timeout: Duration,
    end_frame_timeout: Duration,
) -> Result<Vec<u8>, TransportError> {
    let mut frame = Vec::new();
    let mut byte = [0u8; 1];

    let deadline = Instant::now() + begin_frame_timeout;
    loop {
        match read_one(port, &mut byte)? {
            Some(()) => {
                frame.push(byte[0]);
                break;
            }
            None => {
                if Instant::now() >= deadline {
                    return Err(TransportError::timeout(begin_frame_timeout, begin_frame_timeout));
                }
                tokio::task::yield_now().await;
            }
        }
    }

    loop {
        let deadline = Instant::now() + end_frame_timeout;
        loop {
            match read_one(port, &mut byte)? {
                Some(()) => {
                    frame.push(byte[0]);
                    break;
                }
                None => {
                    if Instant::now() >= deadline {
                        return Ok(frame);
                    }
                    tokio::task::yield_now().await;
                }
            }
        }
    }
}

fn read_one(port: &mut dyn SerialPort, byte: &mut [u8; 1]) -> Result<Option<()>, TransportError> {
    match port.read(byte) {
        Ok(n) if n > 0 => Ok(Some(())),
        Ok(_) => Ok(None),
        Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(None),
        Err(e) => Err(TransportError::Io {
            operation: IoOperation::Read,
            details: e.to_string(),
            source: e,
        }),
    }
}
