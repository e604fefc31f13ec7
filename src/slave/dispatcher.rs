//! Slave request dispatcher: decode a query, enforce address/quantity
//! bounds, act on the data map, build the reply. State-free beyond the map
//! itself — every fault path ends in either an exception PDU or a silent
//! drop, never a panic.

use crate::bitops::{pack_bits, unpack_bits};
use crate::codec::{self, DecodedQuery, FrameAddress, QueryParseError, TransportKind};
use crate::errors::ProtocolErrorKind;
use crate::pdu::{Pdu, PduBuilder};
use crate::ModbusError;

use super::DataMap;

pub const BROADCAST_ADDRESS: u8 = 255;

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

/// Answers one query frame against `data_map`. `Ok(None)` means no reply
/// should be sent (RTU noise, address mismatch, or a broadcast write);
/// `Err` means the transport session itself is no longer usable (malformed
/// TCP MBAP) and should be closed by the caller.
pub fn manage(
    kind: TransportKind,
    local_slave_id: u8,
    query_frame: &[u8],
    data_map: &mut DataMap,
) -> Result<Option<Vec<u8>>, ModbusError> {
    let query = match codec::parse_query(kind, query_frame) {
        Ok(q) => q,
        Err(QueryParseError::Silent) => return Ok(None),
        Err(QueryParseError::SessionFatal(e)) => return Err(e),
    };

    let is_broadcast = kind == TransportKind::Rtu && query.slave_or_unit == BROADCAST_ADDRESS;
    if kind == TransportKind::Rtu && query.slave_or_unit != local_slave_id && !is_broadcast {
        return Ok(None);
    }

    let addr = FrameAddress {
        slave_or_unit: query.slave_or_unit,
        transaction_id: query.transaction_id,
    };

    let outcome = handle(&query, data_map);

    match outcome {
        Outcome::Reply(pdu) => {
            if is_broadcast {
                Ok(None)
            } else {
                Ok(Some(codec::build_reply(kind, addr, &pdu)))
            }
        }
        Outcome::Exception { function, code } => {
            if is_broadcast {
                Ok(None)
            } else {
                Ok(Some(codec::build_exception(kind, addr, function, code)))
            }
        }
    }
}

enum Outcome {
    Reply(Pdu),
    Exception { function: u8, code: u8 },
}

fn exception(function: u8, kind: ProtocolErrorKind) -> Outcome {
    Outcome::Exception {
        function,
        code: kind.to_exception_code(),
    }
}

fn handle(query: &DecodedQuery, map: &mut DataMap) -> Outcome {
    let Some(function) = query.pdu.function_code() else {
        return exception(0, ProtocolErrorKind::InvalidFunction);
    };
    let data = query.pdu.as_slice();

    match function {
        FC_READ_COILS => read_bits(function, data, &map.coils),
        FC_READ_DISCRETE_INPUTS => read_bits(function, data, &map.discrete_inputs),
        FC_READ_HOLDING_REGISTERS => read_registers(function, data, &map.holding_registers),
        FC_READ_INPUT_REGISTERS => read_registers(function, data, &map.input_registers),
        FC_WRITE_COIL => write_coil(function, data, &mut map.coils),
        FC_WRITE_REGISTER => write_register(function, data, &mut map.holding_registers),
        FC_READ_EXCEPTION_STATUS => {
            let pdu = PduBuilder::new(function)
                .and_then(|b| b.byte(map.exception_status))
                .map(|b| b.build())
                .unwrap_or_else(|_| Pdu::new());
            Outcome::Reply(pdu)
        }
        FC_WRITE_MULTIPLE_COILS => write_multiple_coils(function, data, &mut map.coils),
        FC_WRITE_MULTIPLE_REGISTERS => write_multiple_registers(function, data, &mut map.holding_registers),
        FC_REPORT_SLAVE_ID => {
            let pdu = PduBuilder::new(function)
                .and_then(|b| b.byte(map.slave_id_data.len() as u8))
                .and_then(|b| b.data(&map.slave_id_data))
                .map(|b| b.build())
                .unwrap_or_else(|_| Pdu::new());
            Outcome::Reply(pdu)
        }
        _ => exception(function, ProtocolErrorKind::InvalidFunction),
    }
}

fn read_bits(function: u8, data: &[u8], array: &[bool]) -> Outcome {
    let Some((start, nb)) = read_address_quantity(data) else {
        return exception(function, ProtocolErrorKind::InvalidDataValue);
    };
    if !(1..=2000).contains(&nb) {
        return exception(function, ProtocolErrorKind::InvalidDataValue);
    }
    if start as usize + nb as usize > array.len() {
        return exception(function, ProtocolErrorKind::InvalidDataAddress);
    }
    let bits = &array[start as usize..start as usize + nb as usize];
    let packed = pack_bits(bits);
    let pdu = PduBuilder::new(function)
        .and_then(|b| b.byte(packed.len() as u8))
        .and_then(|b| b.data(&packed))
        .map(|b| b.build())
        .unwrap_or_else(|_| Pdu::new());
    Outcome::Reply(pdu)
}

fn read_registers(function: u8, data: &[u8], array: &[u16]) -> Outcome {
    let Some((start, nb)) = read_address_quantity(data) else {
        return exception(function, ProtocolErrorKind::InvalidDataValue);
    };
    if !(1..=125).contains(&nb) {
        return exception(function, ProtocolErrorKind::InvalidDataValue);
    }
    if start as usize + nb as usize > array.len() {
        return exception(function, ProtocolErrorKind::InvalidDataAddress);
    }
    let mut bytes = Vec::with_capacity(nb as usize * 2);
    for v in &array[start as usize..start as usize + nb as usize] {
        bytes.extend_from_slice(&v.to_be_bytes());
    }
    let pdu = PduBuilder::new(function)
        .and_then(|b| b.byte(bytes.len() as u8))
        .and_then(|b| b.data(&bytes))
        .map(|b| b.build())
        .unwrap_or_else(|_| Pdu::new());
    Outcome::Reply(pdu)
}

fn write_coil(function: u8, data: &[u8], coils: &mut [bool]) -> Outcome {
    if data.len() < 5 {
        return exception(function, ProtocolErrorKind::InvalidDataValue);
    }
    let addr = u16::from_be_bytes([data[1], data[2]]);
    let value = u16::from_be_bytes([data[3], data[4]]);
    if value != COIL_ON && value != COIL_OFF {
        return exception(function, ProtocolErrorKind::InvalidDataValue);
    }
    if addr as usize >= coils.len() {
        return exception(function, ProtocolErrorKind::InvalidDataAddress);
    }
    coils[addr as usize] = value == COIL_ON;
    Outcome::Reply(Pdu::from_vec(data.to_vec()).unwrap_or_else(|_| Pdu::new()))
}

fn write_register(function: u8, data: &[u8], registers: &mut [u16]) -> Outcome {
    if data.len() < 5 {
        return exception(function, ProtocolErrorKind::InvalidDataValue);
    }
    let addr = u16::from_be_bytes([data[1], data[2]]);
    let value = u16::from_be_bytes([data[3], data[4]]);
    if addr as usize >= registers.len() {
        return exception(function, ProtocolErrorKind::InvalidDataAddress);
    }
    registers[addr as usize] = value;
    Outcome::Reply(Pdu::from_vec(data.to_vec()).unwrap_or_else(|_| Pdu::new()))
}

fn write_multiple_coils(function: u8, data: &[u8], coils: &mut [bool]) -> Outcome {
    let Some((start, nb)) = read_address_quantity(data) else {
        return exception(function, ProtocolErrorKind::InvalidDataValue);
    };
    if !(1..=1968).contains(&nb) {
        return exception(function, ProtocolErrorKind::InvalidDataValue);
    }
    if data.len() < 6 {
        return exception(function, ProtocolErrorKind::InvalidDataValue);
    }
    let byte_count = data[5] as usize;
    let payload = &data[6..];
    if payload.len() != byte_count || byte_count != (nb as usize).div_ceil(8) {
        return exception(function, ProtocolErrorKind::InvalidDataValue);
    }
    if start as usize + nb as usize > coils.len() {
        return exception(function, ProtocolErrorKind::InvalidDataAddress);
    }
    let bits = unpack_bits(payload, nb as usize);
    coils[start as usize..start as usize + nb as usize].copy_from_slice(&bits);

    let pdu = PduBuilder::new(function)
        .and_then(|b| b.address(start))
        .and_then(|b| b.quantity(nb))
        .map(|b| b.build())
        .unwrap_or_else(|_| Pdu::new());
    Outcome::Reply(pdu)
}

fn write_multiple_registers(function: u8, data: &[u8], registers: &mut [u16]) -> Outcome {
    let Some((start, nb)) = read_address_quantity(data) else {
        return exception(function, ProtocolErrorKind::InvalidDataValue);
    };
    if !(1..=123).contains(&nb) {
        return exception(function, ProtocolErrorKind::InvalidDataValue);
    }
    if data.len() < 6 {
        return exception(function, ProtocolErrorKind::InvalidDataValue);
    }
    let byte_count = data[5] as usize;
    let payload = &data[6..];
    if payload.len() != byte_count || byte_count != nb as usize * 2 {
        return exception(function, ProtocolErrorKind::InvalidDataValue);
    }
    if start as usize + nb as usize > registers.len() {
        return exception(function, ProtocolErrorKind::InvalidDataAddress);
    }
    for (i, chunk) in payload.chunks_exact(2).enumerate() {
        registers[start as usize + i] = u16::from_be_bytes([chunk[0], chunk[1]]);
    }

    let pdu = PduBuilder::new(function)
        .and_then(|b| b.address(start))
        .and_then(|b| b.quantity(nb))
        .map(|b| b.build())
        .unwrap_or_else(|_| Pdu::new());
    Outcome::Reply(pdu)
}

fn read_address_quantity(data: &[u8]) -> Option<(u16, u16)> {
    if data.len() < 5 {
        return None;
    }
    let start = u16::from_be_bytes([data[1], data[2]]);
    let nb = u16::from_be_bytes([data[3], data[4]]);
    Some((start, nb))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crc::append_crc16;

    fn rtu_request(slave: u8, function: u8, payload: &[u8]) -> Vec<u8> {
        let mut frame = vec![slave, function];
        frame.extend_from_slice(payload);
        append_crc16(&mut frame);
        frame
    }

    #[test]
    fn read_holding_registers_happy_path() {
        let mut map = DataMap::new(0, 0, 4, 0);
        map.holding_registers = vec![0x1234, 0x5678, 0, 0];
        let frame = rtu_request(1, FC_READ_HOLDING_REGISTERS, &[0x00, 0x00, 0x00, 0x02]);

        let reply = manage(TransportKind::Rtu, 1, &frame, &mut map).unwrap().unwrap();
        // slave(1) fn(1) byte_count(1) data(4) crc(2)
        assert_eq!(&reply[0..3], &[0x01, 0x03, 0x04]);
        assert_eq!(&reply[3..7], &[0x12, 0x34, 0x56, 0x78]);
    }

    #[test]
    fn out_of_range_address_yields_illegal_data_address() {
        let mut map = DataMap::new(0, 0, 4, 0);
        let frame = rtu_request(1, FC_READ_HOLDING_REGISTERS, &[0x00, 0x00, 0x00, 0x0A]);

        let reply = manage(TransportKind::Rtu, 1, &frame, &mut map).unwrap().unwrap();
        assert_eq!(reply[1], FC_READ_HOLDING_REGISTERS | 0x80);
        assert_eq!(reply[2], ProtocolErrorKind::InvalidDataAddress.to_exception_code());
    }

    #[test]
    fn quantity_out_of_range_yields_illegal_data_value_and_no_mutation() {
        let mut map = DataMap::new(0, 0, 4, 0);
        map.holding_registers = vec![1, 2, 3, 4];
        let frame = rtu_request(1, FC_READ_HOLDING_REGISTERS, &[0x00, 0x00, 0x00, 0x00]);

        let reply = manage(TransportKind::Rtu, 1, &frame, &mut map).unwrap().unwrap();
        assert_eq!(reply[2], ProtocolErrorKind::InvalidDataValue.to_exception_code());
        assert_eq!(map.holding_registers, vec![1, 2, 3, 4]);
    }

    #[test]
    fn write_single_coil_bad_value_is_illegal_data_value() {
        let mut map = DataMap::new(8, 0, 0, 0);
        let frame = rtu_request(1, FC_WRITE_COIL, &[0x00, 0xAC, 0x12, 0x34]);

        let reply = manage(TransportKind::Rtu, 1, &frame, &mut map).unwrap().unwrap();
        assert_eq!(reply[2], ProtocolErrorKind::InvalidDataValue.to_exception_code());
    }

    #[test]
    fn write_single_coil_echoes_request_on_success() {
        let mut map = DataMap::new(8, 0, 0, 0);
        let frame = rtu_request(1, FC_WRITE_COIL, &[0x00, 0x01, 0xFF, 0x00]);

        let reply = manage(TransportKind::Rtu, 1, &frame, &mut map).unwrap().unwrap();
        assert_eq!(&reply[0..6], &[0x01, 0x05, 0x00, 0x01, 0xFF, 0x00]);
        assert!(map.coils[1]);
    }

    #[test]
    fn mismatched_slave_id_drops_silently() {
        let mut map = DataMap::new(8, 0, 0, 0);
        let frame = rtu_request(9, FC_WRITE_COIL, &[0x00, 0x01, 0xFF, 0x00]);

        assert!(manage(TransportKind::Rtu, 1, &frame, &mut map).unwrap().is_none());
        assert!(!map.coils[1]);
    }

    #[test]
    fn broadcast_write_mutates_but_sends_no_reply() {
        let mut map = DataMap::new(8, 0, 0, 0);
        let frame = rtu_request(BROADCAST_ADDRESS, FC_WRITE_COIL, &[0x00, 0x01, 0xFF, 0x00]);

        let reply = manage(TransportKind::Rtu, 1, &frame, &mut map).unwrap();
        assert!(reply.is_none());
        assert!(map.coils[1]);
    }

    #[test]
    fn bad_rtu_crc_is_dropped_silently() {
        let mut map = DataMap::new(8, 0, 0, 0);
        let mut frame = rtu_request(1, FC_WRITE_COIL, &[0x00, 0x01, 0xFF, 0x00]);
        let last = frame.len() - 1;
        frame[last] ^= 0x01;

        assert!(manage(TransportKind::Rtu, 1, &frame, &mut map).unwrap().is_none());
    }

    #[test]
    fn unknown_function_is_illegal_function() {
        let mut map = DataMap::new(0, 0, 0, 0);
        let frame = rtu_request(1, 0x2B, &[]);

        let reply = manage(TransportKind::Rtu, 1, &frame, &mut map).unwrap().unwrap();
        assert_eq!(reply[1], 0x2B | 0x80);
        assert_eq!(reply[2], ProtocolErrorKind::InvalidFunction.to_exception_code());
    }

    #[test]
    fn malformed_tcp_mbap_is_session_fatal() {
        let mut map = DataMap::new(0, 0, 4, 0);
        let frame = [0x00, 0x01, 0x00, 0x00, 0x00, 0x09, 0x01, 0x03, 0x00, 0x00, 0x00, 0x02];
        assert!(manage(TransportKind::Tcp, 1, &frame, &mut map).is_err());
    }
}
