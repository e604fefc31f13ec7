//! Frame codec: builds request/reply/exception frames and validates headers.
//!
//! Pure and allocation-light by design — no I/O happens here.

use crate::crc::{append_crc16, crc16, split_crc16};
use crate::errors::{FrameErrorKind, FrameFormatKind, FrameSizeKind, ModbusError};
use crate::pdu::Pdu;

pub const MBAP_HEADER_LEN: usize = 7;
pub const RTU_MIN_FRAME_LEN: usize = 4; // address + function + 2-byte CRC

/// Which wire framing a request/reply pair uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Rtu,
    Tcp,
}

/// Addressing context threaded through build/parse: the RTU slave address or
/// the TCP unit identifier, plus the transaction id on TCP.
#[derive(Debug, Clone, Copy)]
pub struct FrameAddress {
    pub slave_or_unit: u8,
    pub transaction_id: u16,
}

/// A decoded reply, ready for the transaction engine to interpret.
#[derive(Debug, Clone)]
pub struct DecodedReply {
    pub pdu: Pdu,
}

fn data_bytes_for_bits(nb: u16) -> usize {
    ((nb as usize) + 7) / 8
}

/// The length of a PDU's normal-response payload (function byte included),
/// per the table in the spec's frame codec section.
fn normal_response_pdu_len(function: u8, nb: u16) -> usize {
    match function {
        0x01 | 0x02 => 1 + 1 + data_bytes_for_bits(nb),
        0x03 | 0x04 => 1 + 1 + (nb as usize) * 2,
        0x05 | 0x06 => 1 + 2 + 2,
        0x07 => 1 + 1,
        0x0F | 0x10 => 1 + 2 + 2,
        0x11 => 1 + 1 + 75, // upper bound; report_slave_id byte count is variable
        _ => 1,
    }
}

/// Expected full-frame reply length for a normal (non-exception) response.
pub fn expected_reply_len(kind: TransportKind, function: u8, nb: u16) -> usize {
    let pdu_len = normal_response_pdu_len(function, nb);
    match kind {
        TransportKind::Rtu => 1 + pdu_len + 2,
        TransportKind::Tcp => MBAP_HEADER_LEN + pdu_len,
    }
}

/// Expected full-frame length of an exception reply (function byte + 1-byte
/// exception code), for the same transport.
pub fn expected_exception_len(kind: TransportKind) -> usize {
    match kind {
        TransportKind::Rtu => 1 + 2 + 2,
        TransportKind::Tcp => MBAP_HEADER_LEN + 2,
    }
}

/// Builds the wire frame for a request, returning `(frame, expected_reply_len)`.
pub fn build_request(
    kind: TransportKind,
    addr: FrameAddress,
    pdu: &Pdu,
    nb: u16,
) -> Result<(Vec<u8>, usize), ModbusError> {
    let function = pdu.function_code().unwrap_or(0);
    let frame = match kind {
        TransportKind::Rtu => {
            let mut frame = Vec::with_capacity(1 + pdu.len() + 2);
            frame.push(addr.slave_or_unit);
            frame.extend_from_slice(pdu.as_slice());
            append_crc16(&mut frame);
            frame
        }
        TransportKind::Tcp => {
            let length = (pdu.len() + 1) as u16;
            let mut frame = Vec::with_capacity(MBAP_HEADER_LEN + pdu.len());
            frame.extend_from_slice(&addr.transaction_id.to_be_bytes());
            frame.extend_from_slice(&0u16.to_be_bytes());
            frame.extend_from_slice(&length.to_be_bytes());
            frame.push(addr.slave_or_unit);
            frame.extend_from_slice(pdu.as_slice());
            frame
        }
    };
    Ok((frame, expected_reply_len(kind, function, nb)))
}

/// Builds an exception reply PDU wrapped in the given transport's framing.
pub fn build_exception(
    kind: TransportKind,
    addr: FrameAddress,
    function: u8,
    exception_code: u8,
) -> Vec<u8> {
    match kind {
        TransportKind::Rtu => {
            let mut frame = Vec::with_capacity(5);
            frame.push(addr.slave_or_unit);
            frame.push(function | 0x80);
            frame.push(exception_code);
            append_crc16(&mut frame);
            frame
        }
        TransportKind::Tcp => {
            let mut frame = Vec::with_capacity(MBAP_HEADER_LEN + 2);
            frame.extend_from_slice(&addr.transaction_id.to_be_bytes());
            frame.extend_from_slice(&0u16.to_be_bytes());
            frame.extend_from_slice(&3u16.to_be_bytes());
            frame.push(addr.slave_or_unit);
            frame.push(function | 0x80);
            frame.push(exception_code);
            frame
        }
    }
}

/// Builds a normal reply PDU wrapped in the given transport's framing.
pub fn build_reply(kind: TransportKind, addr: FrameAddress, pdu: &Pdu) -> Vec<u8> {
    match kind {
        TransportKind::Rtu => {
            let mut frame = Vec::with_capacity(1 + pdu.len() + 2);
            frame.push(addr.slave_or_unit);
            frame.extend_from_slice(pdu.as_slice());
            append_crc16(&mut frame);
            frame
        }
        TransportKind::Tcp => {
            let length = (pdu.len() + 1) as u16;
            let mut frame = Vec::with_capacity(MBAP_HEADER_LEN + pdu.len());
            frame.extend_from_slice(&addr.transaction_id.to_be_bytes());
            frame.extend_from_slice(&0u16.to_be_bytes());
            frame.extend_from_slice(&length.to_be_bytes());
            frame.push(addr.slave_or_unit);
            frame.extend_from_slice(pdu.as_slice());
            frame
        }
    }
}

/// Validates and strips transport framing from a reply, returning the PDU
/// and the slave/unit id it was addressed to.
///
/// `expected_function` is the function code of the issued request; a normal
/// reply must echo it, an exception reply must echo it with the high bit set.
pub fn parse_reply(
    kind: TransportKind,
    frame: &[u8],
    addr: FrameAddress,
    expected_function: u8,
) -> Result<(u8, DecodedReply), ModbusError> {
    match kind {
        TransportKind::Rtu => parse_rtu_reply(frame, expected_function),
        TransportKind::Tcp => parse_tcp_reply(frame, addr, expected_function),
    }
}

fn parse_rtu_reply(frame: &[u8], expected_function: u8) -> Result<(u8, DecodedReply), ModbusError> {
    if frame.len() < RTU_MIN_FRAME_LEN {
        return Err(ModbusError::frame(
            FrameErrorKind::TooShort,
            format!("RTU reply too short: {} bytes", frame.len()),
            Some(frame.to_vec()),
        ));
    }

    let (payload, received_crc) = split_crc16(frame).expect("checked length above");
    let calculated_crc = crc16(payload);
    if calculated_crc != received_crc {
        return Err(ModbusError::crc(calculated_crc, received_crc, payload));
    }

    let slave = payload[0];
    let pdu = Pdu::from_vec(payload[1..].to_vec())
        .map_err(|e| ModbusError::frame(FrameErrorKind::TooLong, e.to_string(), None))?;

    validate_function_echo(&pdu, expected_function)?;
    Ok((slave, DecodedReply { pdu }))
}

fn parse_tcp_reply(
    frame: &[u8],
    addr: FrameAddress,
    expected_function: u8,
) -> Result<(u8, DecodedReply), ModbusError> {
    if frame.len() < MBAP_HEADER_LEN + 1 {
        return Err(ModbusError::frame(
            FrameErrorKind::TooShort,
            format!("TCP reply too short: {} bytes", frame.len()),
            Some(frame.to_vec()),
        ));
    }

    let transaction_id = u16::from_be_bytes([frame[0], frame[1]]);
    let protocol_id = u16::from_be_bytes([frame[2], frame[3]]);
    let length = u16::from_be_bytes([frame[4], frame[5]]) as usize;
    let unit_id = frame[6];

    if protocol_id != 0 {
        return Err(ModbusError::frame(
            FrameErrorKind::InvalidHeader,
            format!("invalid protocol id: {}", protocol_id),
            Some(frame.to_vec()),
        ));
    }

    if transaction_id != addr.transaction_id {
        return Err(ModbusError::frame(
            FrameErrorKind::InvalidHeader,
            format!(
                "transaction id mismatch: expected {:04X}, got {:04X}",
                addr.transaction_id, transaction_id
            ),
            Some(frame.to_vec()),
        ));
    }

    if MBAP_HEADER_LEN + length - 1 != frame.len() {
        return Err(ModbusError::frame(
            FrameErrorKind::InvalidFormat,
            format!(
                "declared MBAP length {} does not match frame of {} bytes",
                length,
                frame.len()
            ),
            Some(frame.to_vec()),
        ));
    }

    let pdu = Pdu::from_vec(frame[MBAP_HEADER_LEN..].to_vec())
        .map_err(|e| ModbusError::frame(FrameErrorKind::TooLong, e.to_string(), None))?;

    validate_function_echo(&pdu, expected_function)?;
    Ok((unit_id, DecodedReply { pdu }))
}

fn validate_function_echo(pdu: &Pdu, expected_function: u8) -> Result<(), ModbusError> {
    let got = pdu.function_code().ok_or_else(|| {
        ModbusError::frame(FrameErrorKind::TooShort, "empty reply PDU".to_string(), None)
    })?;

    if pdu.is_exception() {
        if got & 0x7F != expected_function {
            return Err(ModbusError::frame(
                FrameErrorKind::UnexpectedResponse,
                format!(
                    "exception reply echoes function {:#04X}, expected {:#04X}",
                    got & 0x7F,
                    expected_function
                ),
                None,
            ));
        }
    } else if got != expected_function {
        return Err(ModbusError::frame(
            FrameErrorKind::UnexpectedResponse,
            format!(
                "reply echoes function {:#04X}, expected {:#04X}",
                got, expected_function
            ),
            None,
        ));
    }

    Ok(())
}

/// Validates a normal read reply's byte-count field against its payload.
pub fn validate_read_byte_count(pdu: &Pdu) -> Result<&[u8], ModbusError> {
    let data = pdu.as_slice();
    if data.len() < 2 {
        return Err(ModbusError::frame(
            FrameErrorKind::TooShort,
            "read reply missing byte-count field".to_string(),
            None,
        ));
    }
    let byte_count = data[1] as usize;
    let rest = &data[2..];
    if rest.len() != byte_count {
        return Err(ModbusError::frame(
            FrameErrorKind::InvalidFormat,
            format!(
                "byte count {} does not match {} payload bytes",
                byte_count,
                rest.len()
            ),
            None,
        ));
    }
    Ok(rest)
}

/// As [`validate_read_byte_count`], but additionally requires the payload be
/// exactly `expected_len` bytes. A byte-count field can be internally
/// consistent with the rest of the frame and still be shorter than what the
/// request's quantity demands — e.g. a reply claiming `byte_count = 1` for a
/// 19-coil read. Callers that know the requested quantity up front (the
/// master, which chose it) must use this instead of the bare check, or an
/// under-length payload reaches `unpack_bits`/register decoding and indexes
/// past its end.
pub fn validate_read_byte_count_exact(pdu: &Pdu, expected_len: usize) -> Result<&[u8], ModbusError> {
    let rest = validate_read_byte_count(pdu)?;
    if rest.len() != expected_len {
        return Err(ModbusError::frame(
            FrameErrorKind::InvalidFormat,
            format!(
                "byte count {} does not match the {} bytes the request quantity requires",
                rest.len(),
                expected_len
            ),
            None,
        ));
    }
    Ok(rest)
}

/// Validates that a single/multi-write reply echoes the address and
/// value/quantity that was sent.
pub fn validate_write_echo(pdu: &Pdu, address: u16, value_or_quantity: u16) -> Result<(), ModbusError> {
    let data = pdu.as_slice();
    if data.len() < 5 {
        return Err(ModbusError::frame(
            FrameErrorKind::TooShort,
            "write reply missing address/value fields".to_string(),
            None,
        ));
    }
    let got_address = u16::from_be_bytes([data[1], data[2]]);
    let got_value = u16::from_be_bytes([data[3], data[4]]);
    if got_address != address || got_value != value_or_quantity {
        return Err(ModbusError::frame(
            FrameErrorKind::InvalidFormat,
            format!(
                "write echo mismatch: sent addr={:#06X} val={:#06X}, got addr={:#06X} val={:#06X}",
                address, value_or_quantity, got_address, got_value
            ),
            None,
        ));
    }
    Ok(())
}

/// A query frame the dispatcher can act on, stripped of transport framing.
#[derive(Debug, Clone)]
pub struct DecodedQuery {
    pub slave_or_unit: u8,
    pub transaction_id: u16,
    pub pdu: Pdu,
}

/// How a query frame failed to parse: silently dropped frames never get a
/// reply attempt; session-fatal ones mean the transport session (TCP) should
/// be torn down because the peer is no longer speaking the protocol.
#[derive(Debug)]
pub enum QueryParseError {
    Silent,
    SessionFatal(ModbusError),
}

/// Parses an inbound query frame for the slave dispatcher. RTU frames with a
/// bad CRC (or that are too short to contain one) are dropped silently, per
/// the wire convention of treating line noise as absence of a query. TCP
/// frames with a malformed MBAP header are session-fatal since there is no
/// reliable way to resynchronize a stream transport.
pub fn parse_query(kind: TransportKind, frame: &[u8]) -> Result<DecodedQuery, QueryParseError> {
    match kind {
        TransportKind::Rtu => parse_query_rtu(frame),
        TransportKind::Tcp => parse_query_tcp(frame),
    }
}

fn parse_query_rtu(frame: &[u8]) -> Result<DecodedQuery, QueryParseError> {
    if frame.len() < RTU_MIN_FRAME_LEN {
        return Err(QueryParseError::Silent);
    }
    let (payload, received_crc) = split_crc16(frame).ok_or(QueryParseError::Silent)?;
    if crc16(payload) != received_crc {
        return Err(QueryParseError::Silent);
    }
    let slave_or_unit = payload[0];
    let pdu = Pdu::from_vec(payload[1..].to_vec()).map_err(|_| QueryParseError::Silent)?;
    Ok(DecodedQuery {
        slave_or_unit,
        transaction_id: 0,
        pdu,
    })
}

fn parse_query_tcp(frame: &[u8]) -> Result<DecodedQuery, QueryParseError> {
    if frame.len() < MBAP_HEADER_LEN + 1 {
        return Err(QueryParseError::SessionFatal(ModbusError::frame(
            FrameErrorKind::TooShort,
            format!("TCP query too short: {} bytes", frame.len()),
            Some(frame.to_vec()),
        )));
    }

    let transaction_id = u16::from_be_bytes([frame[0], frame[1]]);
    let protocol_id = u16::from_be_bytes([frame[2], frame[3]]);
    let length = u16::from_be_bytes([frame[4], frame[5]]) as usize;
    let unit_id = frame[6];

    if protocol_id != 0 {
        return Err(QueryParseError::SessionFatal(ModbusError::frame(
            FrameErrorKind::InvalidHeader,
            format!("invalid protocol id: {}", protocol_id),
            Some(frame.to_vec()),
        )));
    }

    if MBAP_HEADER_LEN + length.saturating_sub(1) != frame.len() {
        return Err(QueryParseError::SessionFatal(ModbusError::frame(
            FrameErrorKind::InvalidFormat,
            format!(
                "declared MBAP length {} does not match frame of {} bytes",
                length,
                frame.len()
            ),
            Some(frame.to_vec()),
        )));
    }

    let pdu = Pdu::from_vec(frame[MBAP_HEADER_LEN..].to_vec()).map_err(|e| {
        QueryParseError::SessionFatal(ModbusError::frame(FrameErrorKind::TooLong, e.to_string(), None))
    })?;

    Ok(DecodedQuery {
        slave_or_unit: unit_id,
        transaction_id,
        pdu,
    })
}
