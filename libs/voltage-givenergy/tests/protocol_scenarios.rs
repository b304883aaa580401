//! Protocol Scenario Tests
//!
//! End-to-end checks through the public API:
//! - Framing and resynchronisation on raw byte streams
//! - Write gate to wire bytes
//! - Cache to typed views and diagnostic exports
//! - Configuration files

#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

use std::io::Write;

use voltage_givenergy::codec::{decode_adu_request, FramedRequest};
use voltage_givenergy::{
    decode_response, encode_adu, ClientConfig, DecodeError, DeviceIdentity, DeviceKind, FrameAssembler,
    FrameEvent, Inverter, ModbusError, Plant, RegisterBank, RegisterCache, RegisterKey, Request, Response,
    WriteRejected,
};

fn read_input_reply(transaction_id: u16, values: &[u16]) -> Vec<u8> {
    let mut frame = transaction_id.to_be_bytes().to_vec();
    frame.extend_from_slice(&[0x00, 0x00]);
    frame.extend_from_slice(&(3 + values.len() as u16 * 2).to_be_bytes());
    frame.extend_from_slice(&[0x11, 0x04, (values.len() * 2) as u8]);
    for value in values {
        frame.extend_from_slice(&value.to_be_bytes());
    }
    frame
}

// ============================================================================
// Framing
// ============================================================================

#[test]
fn test_documented_read_request_bytes() {
    let bytes = [0x00, 0x01, 0x00, 0x00, 0x00, 0x05, 0x01, 0x03, 0x02, 0x00, 0x10];
    let framed = decode_adu_request(&bytes).unwrap();
    assert_eq!(
        framed,
        FramedRequest {
            transaction_id: 1,
            unit_id: 1,
            request: Request::ReadHolding { start: 0x0010, count: 2 },
        }
    );
    assert_eq!(&encode_adu(1, 1, &framed.request).unwrap()[..], &bytes);
}

#[test]
fn test_garbage_prefix_costs_one_sync_loss() {
    for garbage_len in [1usize, 5, 13, 100] {
        let mut stream: Vec<u8> = (0..garbage_len).map(|i| 0xA0 | (i as u8 & 0x0F)).collect();
        let reply = read_input_reply(7, &[1, 2, 3]);
        stream.extend_from_slice(&reply);

        let mut assembler = FrameAssembler::default();
        let events = assembler.push(&stream);
        assert_eq!(events.len(), 2, "garbage of {} bytes", garbage_len);
        assert_eq!(events[0], FrameEvent::SyncLoss { discarded: garbage_len });
        match &events[1] {
            FrameEvent::Adu(adu) => assert_eq!(&adu.to_bytes()[..], &reply[..]),
            other => panic!("expected ADU, got {:?}", other),
        }
        assert_eq!(assembler.buffered(), 0);
    }
}

#[test]
fn test_short_body_is_held_until_complete() {
    // Length 10 declares unit id + 9 PDU bytes
    let mut assembler = FrameAssembler::default();
    let mut partial = vec![0x00, 0x03, 0x00, 0x00, 0x00, 0x0A, 0x11];
    partial.extend_from_slice(&[0x04, 0x06, 0x00, 0x01, 0x00]);
    assert!(assembler.push(&partial).is_empty());
    assert!(assembler.is_mid_frame());

    assert!(assembler.push(&[0x02, 0x00, 0x03]).is_empty(), "one byte still missing");

    // Last body byte plus the start of the next frame
    let events = assembler.push(&[0x00, 0x00, 0x04, 0x00]);
    assert_eq!(events.len(), 1);
    assert!(!assembler.is_mid_frame());
    assert_eq!(assembler.buffered(), 3);
}

#[test]
fn test_response_decoding_against_request() {
    let request = Request::ReadInput { start: 59, count: 2 };
    let reply = read_input_reply(1, &[80, 81]);
    let response = decode_response(&request, &reply[7..]).unwrap();
    assert_eq!(
        response,
        Response::ReadInput {
            start: 59,
            values: vec![80, 81]
        }
    );

    // Device answered with one register instead of two
    let short = read_input_reply(1, &[80]);
    assert!(matches!(
        decode_response(&request, &short[7..]),
        Err(DecodeError::RegisterCountMismatch { .. })
    ));
}

// ============================================================================
// Write gate
// ============================================================================

#[test]
fn test_write_gate_to_wire() {
    let request = voltage_givenergy::write_gate::validated_write_request(27, 1).unwrap();
    let frame = encode_adu(3, 0x11, &request).unwrap();
    assert_eq!(
        &frame[..],
        &[0x00, 0x03, 0x00, 0x00, 0x00, 0x06, 0x11, 0x06, 0x00, 0x1B, 0x00, 0x01]
    );

    let rejected = voltage_givenergy::write_gate::validated_write_request(0, 1);
    assert_eq!(rejected, Err(WriteRejected::NotWhitelisted { address: 0 }));
    let err: ModbusError = rejected.unwrap_err().into();
    assert!(!err.is_retryable());
}

// ============================================================================
// Views and exports
// ============================================================================

#[test]
fn test_partial_inverter_record() {
    let mut cache = RegisterCache::new();
    cache.merge_block(RegisterBank::Holding, 110, &[4, 50, 50, 0, 4, 0, 100]);
    cache.merge(RegisterBank::Holding, 27, 1);
    let full = Inverter::from_cache(&cache);

    // Same registers with HR111 never observed
    let without_limit: RegisterCache = cache
        .iter()
        .filter(|(key, _)| *key != RegisterKey::holding(111))
        .collect();
    let partial = Inverter::from_cache(&without_limit);

    assert_eq!(full.battery_charge_limit, Some(50));
    assert_eq!(partial.battery_charge_limit, None);
    assert_eq!(
        Inverter {
            battery_charge_limit: Some(50),
            ..partial.clone()
        },
        full
    );
    assert!(partial.missing_fields().contains(&"battery_charge_limit".to_string()));
    assert!(!full.missing_fields().contains(&"battery_charge_limit".to_string()));

    assert_eq!(
        voltage_givenergy::model::require(partial.battery_charge_limit, "battery_charge_limit"),
        Err(ModbusError::PartialData {
            field: "battery_charge_limit"
        })
    );
}

#[test]
fn test_plant_exports() {
    let mut plant = Plant::new(DeviceIdentity::INVERTER);
    plant
        .refresh(
            DeviceIdentity::INVERTER,
            DeviceKind::Inverter,
            &Response::ReadHolding {
                start: 116,
                values: vec![85],
            },
        )
        .unwrap();
    plant
        .refresh(
            DeviceIdentity::battery(0),
            DeviceKind::Battery,
            &Response::ReadInput {
                start: 100,
                values: vec![64],
            },
        )
        .unwrap();

    let flat = plant.cache(DeviceIdentity::INVERTER).unwrap().to_flat_map();
    assert_eq!(flat.len(), 1);
    assert_eq!(flat["HR:0116"], 85);

    let json: serde_json::Value = serde_json::from_str(&plant.to_json().unwrap()).unwrap();
    assert_eq!(json["inverter"]["charge_target_soc"], 85);
    assert_eq!(json["batteries"][0]["soc"], 64);
}

// ============================================================================
// Configuration
// ============================================================================

#[test]
fn test_config_file_round_trip() {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    writeln!(file, "host: 10.0.0.5\nbattery_unit_ids: [50, 51, 52]\nlog:\n  level: debug").unwrap();

    let config = ClientConfig::load(Some(file.path())).unwrap();
    assert_eq!(config.address(), "10.0.0.5:8899");
    assert_eq!(
        config.battery_identities(),
        vec![DeviceIdentity(0x32), DeviceIdentity(0x33), DeviceIdentity(0x34)]
    );
    assert_eq!(config.log.level, "debug");

    let mut plant = Plant::new(config.inverter_identity());
    for identity in config.battery_identities() {
        plant.add_battery(identity).unwrap();
    }
    assert_eq!(plant.refresh_requests(false).len(), 2 + 3);
}
