//! Transaction engine: the ten public master operations, one per supported
//! function code, built on top of [`crate::codec`] and [`crate::transport`].
//!
//! Grounded in the relay's TCP<->RTU conversion (`handle_client`) for the
//! overall build/send/parse shape, generalized here into typed operations
//! that validate their own inputs and translate protocol exceptions.

use tracing::{debug, warn};

use crate::bitops::{pack_bits, unpack_bits};
use crate::codec::{self, FrameAddress, TransportKind};
use crate::config::{SerialConfig, TcpConfig};
use crate::errors::{FrameError, ProtocolErrorKind, UsageError};
use crate::pdu::{Pdu, PduBuilder};
use crate::transport::{RtuTransport, TcpTransport};
use crate::utils::generate_request_id;
use crate::ModbusError;

const FC_READ_COILS: u8 = 0x01;
const FC_READ_DISCRETE_INPUTS: u8 = 0x02;
const FC_READ_HOLDING_REGISTERS: u8 = 0x03;
const FC_READ_INPUT_REGISTERS: u8 = 0x04;
const FC_WRITE_COIL: u8 = 0x05;
const FC_WRITE_REGISTER: u8 = 0x06;
const FC_READ_EXCEPTION_STATUS: u8 = 0x07;
const FC_WRITE_MULTIPLE_COILS: u8 = 0x0F;
const FC_WRITE_MULTIPLE_REGISTERS: u8 = 0x10;
const FC_REPORT_SLAVE_ID: u8 = 0x11;

const COIL_ON: u16 = 0xFF00;
const COIL_OFF: u16 = 0x0000;

enum Backend {
    Rtu(RtuTransport),
    Tcp {
        transport: TcpTransport,
        config: TcpConfig,
    },
}

/// A connected master-side session: one transport, one peer address, one
/// transaction id counter. Not `Sync` by design — the data model treats a
/// connection context as exclusive to a single caller at a time.
pub struct Master {
    backend: Backend,
    slave_or_unit: u8,
    tx_id: u16,
    error_recovery: bool,
}

impl Master {
    pub fn connect_rtu(config: &SerialConfig) -> Result<Self, ModbusError> {
        let transport = RtuTransport::open(config)?;
        Ok(Self {
            backend: Backend::Rtu(transport),
            slave_or_unit: config.slave_id,
            tx_id: 0,
            error_recovery: false,
        })
    }

    pub async fn connect_tcp(config: &TcpConfig, unit_id: u8) -> Result<Self, ModbusError> {
        let transport = TcpTransport::connect(config).await?;
        Ok(Self {
            backend: Backend::Tcp {
                transport,
                config: config.clone(),
            },
            slave_or_unit: unit_id,
            tx_id: 0,
            error_recovery: config.error_recovery,
        })
    }

    fn transport_kind(&self) -> TransportKind {
        match &self.backend {
            Backend::Rtu(_) => TransportKind::Rtu,
            Backend::Tcp { .. } => TransportKind::Tcp,
        }
    }

    /// Raises this connection's own trace level for frame logging, on top of
    /// whatever the global `tracing` filter already allows.
    pub fn set_debug(&self, debug: bool) {
        match &self.backend {
            Backend::Rtu(transport) => transport.set_debug(debug),
            Backend::Tcp { transport, .. } => transport.set_debug(debug),
        }
    }

    fn next_address(&mut self) -> FrameAddress {
        if matches!(self.backend, Backend::Tcp { .. }) {
            self.tx_id = self.tx_id.wrapping_add(1);
        }
        FrameAddress {
            slave_or_unit: self.slave_or_unit,
            transaction_id: self.tx_id,
        }
    }

    async fn send_raw(&mut self, frame: &[u8]) -> Result<Vec<u8>, ModbusError> {
        match &mut self.backend {
            Backend::Rtu(transport) => transport.exchange(frame).await,
            Backend::Tcp { transport, config } => match transport.exchange(frame).await {
                Ok(reply) => Ok(reply),
                Err(ModbusError::Transport(source)) if self.error_recovery => {
                    warn!(error = %source, "tcp transaction failed, reconnecting and retrying once");
                    *transport = TcpTransport::connect(config).await?;
                    transport.exchange(frame).await
                }
                Err(e) => Err(e),
            },
        }
    }

    async fn transact(&mut self, pdu: Pdu, function: u8, nb: u16) -> Result<Pdu, ModbusError> {
        let kind = self.transport_kind();
        let addr = self.next_address();
        let (frame, _expected_len) = codec::build_request(kind, addr, &pdu, nb)?;

        let request_id = generate_request_id();
        debug!(
            request_id,
            ?kind,
            function,
            len = frame.len(),
            "sending request"
        );
        let reply = self.send_raw(&frame).await?;

        let (_peer, decoded) = codec::parse_reply(kind, &reply, addr, function)?;
        if decoded.pdu.is_exception() {
            let code = decoded.pdu.exception_code().unwrap_or(0);
            return Err(translate_exception(code));
        }
        Ok(decoded.pdu)
    }

    async fn read_bits(
        &mut self,
        function: u8,
        start: u16,
        nb: u16,
    ) -> Result<Vec<bool>, ModbusError> {
        check_quantity(nb, 1, 2000)?;
        let pdu = PduBuilder::new(function)?.address(start)?.quantity(nb)?.build();
        let reply = self.transact(pdu, function, nb).await?;
        let payload = codec::validate_read_byte_count_exact(&reply, (nb as usize).div_ceil(8))?;
        Ok(unpack_bits(payload, nb as usize))
    }

    async fn read_registers(
        &mut self,
        function: u8,
        start: u16,
        nb: u16,
    ) -> Result<Vec<u16>, ModbusError> {
        check_quantity(nb, 1, 125)?;
        let pdu = PduBuilder::new(function)?.address(start)?.quantity(nb)?.build();
        let reply = self.transact(pdu, function, nb).await?;
        let payload = codec::validate_read_byte_count_exact(&reply, nb as usize * 2)?;
        Ok(payload.chunks_exact(2).map(|c| u16::from_be_bytes([c[0], c[1]])).collect())
    }

    pub async fn read_coils(&mut self, start: u16, nb: u16) -> Result<Vec<bool>, ModbusError> {
        self.read_bits(FC_READ_COILS, start, nb).await
    }

    pub async fn read_discrete_inputs(
        &mut self,
        start: u16,
        nb: u16,
    ) -> Result<Vec<bool>, ModbusError> {
        self.read_bits(FC_READ_DISCRETE_INPUTS, start, nb).await
    }

    pub async fn read_holding_registers(
        &mut self,
        start: u16,
        nb: u16,
    ) -> Result<Vec<u16>, ModbusError> {
        self.read_registers(FC_READ_HOLDING_REGISTERS, start, nb).await
    }

    pub async fn read_input_registers(
        &mut self,
        start: u16,
        nb: u16,
    ) -> Result<Vec<u16>, ModbusError> {
        self.read_registers(FC_READ_INPUT_REGISTERS, start, nb).await
    }

    pub async fn write_coil(&mut self, addr: u16, on: bool) -> Result<(), ModbusError> {
        let value = if on { COIL_ON } else { COIL_OFF };
        let pdu = PduBuilder::new(FC_WRITE_COIL)?.address(addr)?.quantity(value)?.build();
        let reply = self.transact(pdu, FC_WRITE_COIL, 1).await?;
        codec::validate_write_echo(&reply, addr, value)
    }

    pub async fn write_register(&mut self, addr: u16, value: u16) -> Result<(), ModbusError> {
        let pdu = PduBuilder::new(FC_WRITE_REGISTER)?
            .address(addr)?
            .quantity(value)?
            .build();
        let reply = self.transact(pdu, FC_WRITE_REGISTER, 1).await?;
        codec::validate_write_echo(&reply, addr, value)
    }

    pub async fn read_exception_status(&mut self) -> Result<u8, ModbusError> {
        let pdu = PduBuilder::new(FC_READ_EXCEPTION_STATUS)?.build();
        let reply = self.transact(pdu, FC_READ_EXCEPTION_STATUS, 0).await?;
        reply
            .as_slice()
            .get(1)
            .copied()
            .ok_or_else(|| ModbusError::Usage(UsageError::EmptyBuffer("exception status reply")))
    }

    pub async fn write_multiple_coils(
        &mut self,
        start: u16,
        bits: &[bool],
    ) -> Result<(), ModbusError> {
        let nb = bits.len() as u16;
        check_quantity(nb, 1, 1968)?;
        let packed = pack_bits(bits);
        let pdu = PduBuilder::new(FC_WRITE_MULTIPLE_COILS)?
            .address(start)?
            .quantity(nb)?
            .byte(packed.len() as u8)?
            .data(&packed)?
            .build();
        let reply = self.transact(pdu, FC_WRITE_MULTIPLE_COILS, nb).await?;
        codec::validate_write_echo(&reply, start, nb)
    }

    pub async fn write_multiple_registers(
        &mut self,
        start: u16,
        values: &[u16],
    ) -> Result<(), ModbusError> {
        let nb = values.len() as u16;
        check_quantity(nb, 1, 123)?;
        let mut bytes = Vec::with_capacity(values.len() * 2);
        for v in values {
            bytes.extend_from_slice(&v.to_be_bytes());
        }
        let pdu = PduBuilder::new(FC_WRITE_MULTIPLE_REGISTERS)?
            .address(start)?
            .quantity(nb)?
            .byte(bytes.len() as u8)?
            .data(&bytes)?
            .build();
        let reply = self.transact(pdu, FC_WRITE_MULTIPLE_REGISTERS, nb).await?;
        codec::validate_write_echo(&reply, start, nb)
    }

    pub async fn report_slave_id(&mut self) -> Result<Vec<u8>, ModbusError> {
        let pdu = PduBuilder::new(FC_REPORT_SLAVE_ID)?.build();
        let reply = self.transact(pdu, FC_REPORT_SLAVE_ID, 0).await?;
        Ok(codec::validate_read_byte_count(&reply)?.to_vec())
    }
}

fn check_quantity(nb: u16, min: u16, max: u16) -> Result<(), UsageError> {
    if nb < min || nb > max {
        return Err(UsageError::QuantityOutOfRange {
            quantity: nb,
            min,
            max,
        });
    }
    Ok(())
}

fn translate_exception(code: u8) -> ModbusError {
    match ProtocolErrorKind::from_exception_code(code) {
        Some(kind) => ModbusError::protocol(kind, format!("exception code {:#04X}", code)),
        None => ModbusError::Frame(FrameError::UnknownException { code }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantity_bounds_match_spec_table() {
        assert!(check_quantity(1, 1, 2000).is_ok());
        assert!(check_quantity(2000, 1, 2000).is_ok());
        assert!(check_quantity(2001, 1, 2000).is_err());
        assert!(check_quantity(0, 1, 2000).is_err());
        assert!(check_quantity(125, 1, 125).is_ok());
        assert!(check_quantity(126, 1, 125).is_err());
    }

    #[test]
    fn translate_exception_maps_known_codes() {
        let err = translate_exception(0x02);
        assert!(matches!(
            err,
            ModbusError::Protocol {
                kind: ProtocolErrorKind::InvalidDataAddress,
                ..
            }
        ));
    }

    #[test]
    fn translate_exception_surfaces_out_of_range_code_as_unknown() {
        let err = translate_exception(0x99);
        assert!(matches!(
            err,
            ModbusError::Frame(FrameError::UnknownException { code: 0x99 })
        ));
    }
}
