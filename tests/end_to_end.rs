//! End-to-end scenarios driving the codec, slave dispatcher, and master
//! transaction engine together, independent of any real serial line or
//! socket (for the frame-level scenarios) and over a loopback TCP socket
//! (for the reconnect scenario).

use modbus_station::codec::{self, FrameAddress, TransportKind};
use modbus_station::config::TcpConfig;
use modbus_station::errors::ProtocolErrorKind;
use modbus_station::pdu::PduBuilder;
use modbus_station::slave::{self, DataMap};
use modbus_station::{Master, ModbusError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

#[test]
fn tcp_read_holding_registers_round_trip() {
    let addr = FrameAddress {
        slave_or_unit: 1,
        transaction_id: 1,
    };
    let request_pdu = PduBuilder::new(0x03)
        .unwrap()
        .address(0x0000)
        .unwrap()
        .quantity(2)
        .unwrap()
        .build();
    let (request_frame, _) = codec::build_request(TransportKind::Tcp, addr, &request_pdu, 2).unwrap();
    assert_eq!(
        request_frame,
        vec![0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x02]
    );

    let mut map = DataMap::new(0, 0, 4, 0);
    map.holding_registers[0] = 0x1234;
    map.holding_registers[1] = 0x5678;

    let reply_frame = slave::manage(TransportKind::Tcp, 1, &request_frame, &mut map)
        .unwrap()
        .expect("tcp reply is never silent");
    assert_eq!(
        reply_frame,
        vec![0x00, 0x01, 0x00, 0x00, 0x00, 0x07, 0x01, 0x03, 0x04, 0x12, 0x34, 0x56, 0x78]
    );

    let (_, decoded) = codec::parse_reply(TransportKind::Tcp, &reply_frame, addr, 0x03).unwrap();
    let payload = codec::validate_read_byte_count(&decoded.pdu).unwrap();
    let registers: Vec<u16> = payload
        .chunks_exact(2)
        .map(|c| u16::from_be_bytes([c[0], c[1]]))
        .collect();
    assert_eq!(registers, vec![0x1234, 0x5678]);
}

#[test]
fn rtu_read_coils_round_trip() {
    let addr = FrameAddress {
        slave_or_unit: 0x11,
        transaction_id: 0,
    };
    let request_pdu = PduBuilder::new(0x01)
        .unwrap()
        .address(0x0013)
        .unwrap()
        .quantity(0x0013)
        .unwrap()
        .build();
    let (request_frame, _) = codec::build_request(TransportKind::Rtu, addr, &request_pdu, 0x13).unwrap();
    assert_eq!(
        request_frame,
        vec![0x11, 0x01, 0x00, 0x13, 0x00, 0x13, 0x8E, 0x92]
    );

    // Coils 0x13..0x26 set so that the slave answers 0xCD 0x6B 0x05 (spec's
    // worked example), LSB-first within each byte.
    let mut map = DataMap::new(0x30, 0, 0, 0);
    let expected_bits = [
        true, false, true, true, false, false, true, true, true, true, false, true, false, true,
        true, false, true, false, true,
    ];
    for (i, bit) in expected_bits.iter().enumerate() {
        map.coils[0x13 + i] = *bit;
    }

    let reply_frame = slave::manage(TransportKind::Rtu, 0x11, &request_frame, &mut map)
        .unwrap()
        .expect("rtu reply is not silent when addressed correctly");
    assert_eq!(
        reply_frame,
        vec![0x11, 0x01, 0x03, 0xCD, 0x6B, 0x05, 0x40, 0x12]
    );
}

#[test]
fn write_single_coil_exception_on_bad_value() {
    let addr = FrameAddress {
        slave_or_unit: 1,
        transaction_id: 7,
    };

    // Good value: 0xFF00 echoes back identically.
    let good_pdu = PduBuilder::new(0x05)
        .unwrap()
        .address(0x00AC)
        .unwrap()
        .quantity(0xFF00)
        .unwrap()
        .build();
    let (good_frame, _) = codec::build_request(TransportKind::Tcp, addr, &good_pdu, 1).unwrap();
    let mut map = DataMap::new(256, 0, 0, 0);
    let reply = slave::manage(TransportKind::Tcp, 1, &good_frame, &mut map)
        .unwrap()
        .unwrap();
    assert_eq!(reply[7..], good_frame[7..]);
    assert!(map.coils[0x00AC]);

    // Bad value: 0x1234 is neither 0x0000 nor 0xFF00.
    let bad_pdu = PduBuilder::new(0x05)
        .unwrap()
        .address(0x00AC)
        .unwrap()
        .quantity(0x1234)
        .unwrap()
        .build();
    let (bad_frame, _) = codec::build_request(TransportKind::Tcp, addr, &bad_pdu, 1).unwrap();
    let mut map = DataMap::new(256, 0, 0, 0);
    let reply = slave::manage(TransportKind::Tcp, 1, &bad_frame, &mut map)
        .unwrap()
        .unwrap();
    assert_eq!(reply[7], 0x85);
    assert_eq!(reply[8], 0x03);
    assert!(!map.coils[0x00AC]);
}

#[test]
fn tcp_short_exception_frame_surfaces_illegal_data_address() {
    let addr = FrameAddress {
        slave_or_unit: 1,
        transaction_id: 3,
    };
    let exception_frame = codec::build_exception(TransportKind::Tcp, addr, 0x03, 0x02);
    assert_eq!(exception_frame.len(), 9);

    let (_, decoded) = codec::parse_reply(TransportKind::Tcp, &exception_frame, addr, 0x03).unwrap();
    assert!(decoded.pdu.is_exception());
    assert_eq!(decoded.pdu.exception_code(), Some(0x02));

    let err = match ProtocolErrorKind::from_exception_code(decoded.pdu.exception_code().unwrap()) {
        Some(kind) => ModbusError::protocol(kind, "mapped from exception"),
        None => panic!("0x02 is a known exception code"),
    };
    assert!(matches!(
        err,
        ModbusError::Protocol {
            kind: ProtocolErrorKind::InvalidDataAddress,
            ..
        }
    ));
}

#[test]
fn rtu_crc_fault_surfaces_as_frame_error_not_retried() {
    let addr = FrameAddress {
        slave_or_unit: 1,
        transaction_id: 0,
    };
    let reply_pdu = PduBuilder::new(0x03)
        .unwrap()
        .byte(2)
        .unwrap()
        .data(&[0x00, 0x2A])
        .unwrap()
        .build();
    let mut reply_frame = codec::build_reply(TransportKind::Rtu, addr, &reply_pdu);

    // Flip a payload bit without recomputing the CRC.
    let corrupt_index = reply_frame.len() - 3;
    reply_frame[corrupt_index] ^= 0x01;

    let err = codec::parse_reply(TransportKind::Rtu, &reply_frame, addr, 0x03).unwrap_err();
    match err {
        ModbusError::Frame(modbus_station::errors::FrameError::Crc { .. }) => {}
        other => panic!("expected a CRC framing error, got {other:?}"),
    }
}

/// A reply whose byte-count field is internally consistent with its own
/// payload but shorter than the requested quantity demands must be rejected
/// before it reaches bit/register unpacking — otherwise a malicious or buggy
/// TCP peer (no CRC to catch it on that transport) can crash the master.
#[test]
fn short_byte_count_reply_is_rejected_not_unpacked() {
    let addr = FrameAddress {
        slave_or_unit: 1,
        transaction_id: 9,
    };
    // fc=0x01 read of 19 coils; reply claims byte_count=1 (one data byte),
    // which is self-consistent but far short of the 3 bytes 19 coils need.
    let reply_pdu = PduBuilder::new(0x01)
        .unwrap()
        .byte(1)
        .unwrap()
        .data(&[0xCD])
        .unwrap()
        .build();
    let reply_frame = codec::build_reply(TransportKind::Tcp, addr, &reply_pdu);

    let (_, decoded) = codec::parse_reply(TransportKind::Tcp, &reply_frame, addr, 0x01).unwrap();
    let err = codec::validate_read_byte_count_exact(&decoded.pdu, 3).unwrap_err();
    assert!(matches!(err, ModbusError::Frame(_)));
}

/// Scenario 6: the peer drops the connection between request and reply;
/// with error recovery enabled the master reconnects and retries exactly
/// once, succeeding against a fresh connection to the same listener.
#[tokio::test]
async fn master_reconnects_once_after_peer_drops_connection() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let (first_dropped_tx, first_dropped_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        // First connection: accept and immediately drop, simulating a killed peer.
        let (first, _) = listener.accept().await.unwrap();
        drop(first);
        let _ = first_dropped_tx.send(());

        // Second connection: answer the retried request for real.
        let (mut second, _) = listener.accept().await.unwrap();
        let mut header = [0u8; 7];
        second.read_exact(&mut header).await.unwrap();
        let length = u16::from_be_bytes([header[4], header[5]]) as usize;
        let mut rest = vec![0u8; length - 1];
        second.read_exact(&mut rest).await.unwrap();

        let addr = FrameAddress {
            slave_or_unit: header[6],
            transaction_id: u16::from_be_bytes([header[0], header[1]]),
        };
        let reply_pdu = PduBuilder::new(0x03)
            .unwrap()
            .byte(2)
            .unwrap()
            .data(&[0x00, 0x2A])
            .unwrap()
            .build();
        let reply_frame = codec::build_reply(TransportKind::Tcp, addr, &reply_pdu);
        second.write_all(&reply_frame).await.unwrap();
    });

    let config = TcpConfig {
        host: "127.0.0.1".to_string(),
        port,
        error_recovery: true,
        ..TcpConfig::default()
    };

    let mut master = Master::connect_tcp(&config, 1).await.unwrap();
    first_dropped_rx.await.unwrap();

    let registers = master.read_holding_registers(0, 1).await.unwrap();
    assert_eq!(registers, vec![0x002A]);
}
