//! Request handler tests at PDU byte level: the scenarios a well-behaved
//! slave must satisfy, without the TCP layer.

use std::sync::Arc;

use modsim_points::{
    AccessMode, BitField, DeviceId, GeneratorConfig, ModbusMapping, OverrideMode, PointDefinition,
    PointStore, Region, SemanticType, Value, ValueSource,
};

use crate::address_map::AddressMap;
use crate::engine::RequestHandler;

fn point(key: &str, semantic: SemanticType, region: Region, address: u16) -> PointDefinition {
    PointDefinition {
        key: key.to_string(),
        semantic,
        access: AccessMode::READ_WRITE,
        modbus: ModbusMapping {
            region,
            address,
            scale: 1.0,
            bit_field: None,
        },
        generator: GeneratorConfig::default(),
        override_mode: OverrideMode::None,
        override_duration_seconds: 0,
        display_map: Default::default(),
    }
}

fn handler(defs: &[PointDefinition]) -> (RequestHandler, Arc<PointStore>, DeviceId) {
    let device = DeviceId::alloc();
    let store = Arc::new(PointStore::new());
    store.initialize(device, defs);
    let map = Arc::new(AddressMap::build(defs).unwrap());
    (
        RequestHandler::new(map, store.clone(), device),
        store,
        device,
    )
}

#[test]
fn single_coil_round_trip() {
    let (h, _store, _dev) = handler(&[point("c", SemanticType::Bool, Region::Coil, 100)]);

    // Force ON, then read one bit back.
    let resp = h.handle_pdu(&[0x05, 0x00, 0x64, 0xFF, 0x00]);
    assert_eq!(resp, vec![0x05, 0x00, 0x64, 0xFF, 0x00]);
    let resp = h.handle_pdu(&[0x01, 0x00, 0x64, 0x00, 0x01]);
    assert_eq!(resp, vec![0x01, 0x01, 0x01]);

    // Force OFF, read again.
    let resp = h.handle_pdu(&[0x05, 0x00, 0x64, 0x00, 0x00]);
    assert_eq!(resp, vec![0x05, 0x00, 0x64, 0x00, 0x00]);
    let resp = h.handle_pdu(&[0x01, 0x00, 0x64, 0x00, 0x01]);
    assert_eq!(resp, vec![0x01, 0x01, 0x00]);
}

#[test]
fn unmapped_holding_read_answers_exception_2() {
    let (h, _store, _dev) = handler(&[point("c", SemanticType::Bool, Region::Coil, 0)]);
    let resp = h.handle_pdu(&[0x03, 0x27, 0x0F, 0x00, 0x01]); // address 9999
    assert_eq!(resp, vec![0x83, 0x02]);
}

#[test]
fn read_only_register_write_answers_exception_3() {
    let mut def = point("sp", SemanticType::Uint16, Region::HoldingRegister, 20);
    def.access = AccessMode::READ;
    let (h, store, dev) = handler(&[def]);
    store.set(dev, "sp", Value::Numeric(55.0), ValueSource::Manual, None);

    let resp = h.handle_pdu(&[0x06, 0x00, 0x14, 0x03, 0xE7]); // write 999
    assert_eq!(resp, vec![0x86, 0x03]);
    assert_eq!(store.get(dev, "sp").value, Value::Numeric(55.0));
}

#[test]
fn multi_register_write_then_read_back() {
    let (h, _store, _dev) = handler(&[
        point("h10", SemanticType::Uint16, Region::HoldingRegister, 10),
        point("h11", SemanticType::Uint16, Region::HoldingRegister, 11),
    ]);

    let resp = h.handle_pdu(&[0x10, 0x00, 0x0A, 0x00, 0x02, 0x04, 0x00, 0x7B, 0x01, 0xC8]);
    assert_eq!(resp, vec![0x10, 0x00, 0x0A, 0x00, 0x02]);

    let resp = h.handle_pdu(&[0x03, 0x00, 0x0A, 0x00, 0x02]);
    assert_eq!(resp, vec![0x03, 0x04, 0x00, 0x7B, 0x01, 0xC8]);
}

#[test]
fn packed_bool_register_round_trip() {
    let mut a = point("a", SemanticType::Bool, Region::HoldingRegister, 10);
    a.modbus.bit_field = Some(BitField { start_bit: 0, bit_length: 1 });
    let mut b = point("b", SemanticType::Bool, Region::HoldingRegister, 10);
    b.modbus.bit_field = Some(BitField { start_bit: 1, bit_length: 1 });
    let mut c = point("c", SemanticType::Bool, Region::HoldingRegister, 10);
    c.modbus.bit_field = Some(BitField { start_bit: 2, bit_length: 1 });
    let (h, store, dev) = handler(&[a, b, c]);

    store.set(dev, "a", Value::Bool(true), ValueSource::Manual, None);
    store.set(dev, "b", Value::Bool(false), ValueSource::Manual, None);
    store.set(dev, "c", Value::Bool(true), ValueSource::Manual, None);
    let resp = h.handle_pdu(&[0x03, 0x00, 0x0A, 0x00, 0x01]);
    assert_eq!(resp, vec![0x03, 0x02, 0x00, 0b101]);

    let resp = h.handle_pdu(&[0x06, 0x00, 0x0A, 0x00, 0b010]);
    assert_eq!(resp, vec![0x06, 0x00, 0x0A, 0x00, 0b010]);
    assert_eq!(store.get(dev, "a").value, Value::Bool(false));
    assert_eq!(store.get(dev, "b").value, Value::Bool(true));
    assert_eq!(store.get(dev, "c").value, Value::Bool(false));
}

#[test]
fn discrete_inputs_read_like_coils_but_stay_read_only() {
    let (h, store, dev) = handler(&[point("d", SemanticType::Bool, Region::DiscreteInput, 7)]);
    store.set(dev, "d", Value::Bool(true), ValueSource::Simulation, None);

    let resp = h.handle_pdu(&[0x02, 0x00, 0x05, 0x00, 0x04]);
    assert_eq!(resp, vec![0x02, 0x01, 0b0100]);

    // There is no write function for discrete inputs; FC 05 aims at coils
    // and must miss.
    let resp = h.handle_pdu(&[0x05, 0x00, 0x07, 0xFF, 0x00]);
    assert_eq!(resp, vec![0x85, 0x02]);
}

#[test]
fn unsupported_function_answers_exception_1() {
    let (h, _store, _dev) = handler(&[point("c", SemanticType::Bool, Region::Coil, 0)]);
    let resp = h.handle_pdu(&[0x2B, 0x0E, 0x01, 0x00]);
    assert_eq!(resp, vec![0xAB, 0x01]);
}

#[test]
fn malformed_quantity_answers_exception_3() {
    let (h, _store, _dev) = handler(&[point("c", SemanticType::Bool, Region::Coil, 0)]);
    let resp = h.handle_pdu(&[0x03, 0x00, 0x00, 0x00, 0x7E]); // 126 > max
    assert_eq!(resp, vec![0x83, 0x03]);
}

#[test]
fn input_registers_are_not_writable_via_fc16() {
    let (h, _store, _dev) = handler(&[point("i", SemanticType::Uint16, Region::InputRegister, 0)]);
    // FC 16 touches holding space only; the input point does not map there.
    let resp = h.handle_pdu(&[0x10, 0x00, 0x00, 0x00, 0x01, 0x02, 0x00, 0x01]);
    assert_eq!(resp, vec![0x90, 0x02]);
}

#[test]
fn float_pair_reads_high_word_at_lower_address() {
    let (h, store, dev) = handler(&[point("f", SemanticType::Float, Region::HoldingRegister, 30)]);
    store.set(dev, "f", Value::Numeric(12.5), ValueSource::Manual, None);

    let resp = h.handle_pdu(&[0x03, 0x00, 0x1E, 0x00, 0x02]);
    assert_eq!(resp, vec![0x03, 0x04, 0x41, 0x48, 0x00, 0x00]);
}
