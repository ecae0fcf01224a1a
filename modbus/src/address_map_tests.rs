//! Address map construction and validation tests.

use modsim_points::{
    AccessMode, BitField, GeneratorConfig, ModbusMapping, OverrideMode, PointDefinition, Region,
    SemanticType,
};

use crate::address_map::{AddressMap, MapError};

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

fn bit_point(key: &str, address: u16, start_bit: u8, bit_length: u8) -> PointDefinition {
    let mut def = point(key, SemanticType::Bool, Region::HoldingRegister, address);
    def.modbus.bit_field = Some(BitField {
        start_bit,
        bit_length,
    });
    def
}

#[test]
fn maps_each_region_independently() {
    let map = AddressMap::build(&[
        point("c", SemanticType::Bool, Region::Coil, 5),
        point("d", SemanticType::Bool, Region::DiscreteInput, 5),
        point("h", SemanticType::Uint16, Region::HoldingRegister, 5),
        point("i", SemanticType::Int16, Region::InputRegister, 5),
    ])
    .unwrap();

    assert!(map.bit_point(Region::Coil, 5).is_some());
    assert!(map.bit_point(Region::DiscreteInput, 5).is_some());
    assert_eq!(map.register_points(Region::HoldingRegister, 5).unwrap().len(), 1);
    assert_eq!(map.register_points(Region::InputRegister, 5).unwrap().len(), 1);
    assert!(map.bit_point(Region::Coil, 6).is_none());
    assert!(map.register_points(Region::HoldingRegister, 6).is_none());
}

#[test]
fn double_wide_points_occupy_two_addresses() {
    let map = AddressMap::build(&[point(
        "flow",
        SemanticType::Float,
        Region::HoldingRegister,
        100,
    )])
    .unwrap();

    let high = map.register_points(Region::HoldingRegister, 100).unwrap();
    let low = map.register_points(Region::HoldingRegister, 101).unwrap();
    assert_eq!(high, low);
    assert!(map.register_points(Region::HoldingRegister, 102).is_none());
}

#[test]
fn shared_register_allows_disjoint_bitfields() {
    let map = AddressMap::build(&[
        bit_point("a", 10, 0, 1),
        bit_point("b", 10, 1, 1),
        bit_point("c", 10, 4, 4),
    ])
    .unwrap();
    assert_eq!(map.register_points(Region::HoldingRegister, 10).unwrap().len(), 3);
}

#[test]
fn overlapping_bitfields_are_rejected() {
    let err = AddressMap::build(&[bit_point("a", 10, 0, 4), bit_point("b", 10, 3, 2)]).unwrap_err();
    assert_eq!(
        err,
        MapError::BitFieldOverlap {
            region: Region::HoldingRegister,
            address: 10,
        }
    );
}

#[test]
fn duplicate_keys_are_rejected() {
    let err = AddressMap::build(&[
        point("x", SemanticType::Uint16, Region::HoldingRegister, 1),
        point("x", SemanticType::Uint16, Region::HoldingRegister, 2),
    ])
    .unwrap_err();
    assert_eq!(err, MapError::DuplicateKey { key: "x".into() });
}

#[test]
fn zero_or_non_finite_scale_is_rejected() {
    let mut def = point("x", SemanticType::Uint16, Region::HoldingRegister, 1);
    def.modbus.scale = 0.0;
    assert_eq!(
        AddressMap::build(std::slice::from_ref(&def)).unwrap_err(),
        MapError::InvalidScale { key: "x".into() }
    );
    def.modbus.scale = f64::NAN;
    assert!(matches!(
        AddressMap::build(&[def]).unwrap_err(),
        MapError::InvalidScale { .. }
    ));
}

#[test]
fn whole_register_and_bitfield_cannot_share_an_address() {
    let err = AddressMap::build(&[
        point("whole", SemanticType::Uint16, Region::HoldingRegister, 10),
        bit_point("bit", 10, 0, 1),
    ])
    .unwrap_err();
    assert_eq!(
        err,
        MapError::AddressConflict {
            region: Region::HoldingRegister,
            address: 10,
        }
    );

    // Same conflict with the bitfield first.
    let err = AddressMap::build(&[
        bit_point("bit", 10, 0, 1),
        point("whole", SemanticType::Uint16, Region::HoldingRegister, 10),
    ])
    .unwrap_err();
    assert!(matches!(err, MapError::AddressConflict { .. }));
}

#[test]
fn double_wide_second_word_collisions_are_rejected() {
    let err = AddressMap::build(&[
        point("wide", SemanticType::Int32, Region::HoldingRegister, 10),
        point("narrow", SemanticType::Uint16, Region::HoldingRegister, 11),
    ])
    .unwrap_err();
    assert_eq!(
        err,
        MapError::AddressConflict {
            region: Region::HoldingRegister,
            address: 11,
        }
    );
}

#[test]
fn double_wide_at_end_of_region_is_rejected() {
    let err = AddressMap::build(&[point(
        "wide",
        SemanticType::Uint32,
        Region::HoldingRegister,
        u16::MAX,
    )])
    .unwrap_err();
    assert!(matches!(err, MapError::AddressOverflow { .. }));
}

#[test]
fn malformed_bitfields_are_rejected() {
    assert!(matches!(
        AddressMap::build(&[bit_point("bad", 10, 12, 8)]).unwrap_err(),
        MapError::InvalidBitField { .. }
    ));

    // Bitfields make no sense on bit regions or 32-bit points.
    let mut coil_bf = point("c", SemanticType::Bool, Region::Coil, 0);
    coil_bf.modbus.bit_field = Some(BitField {
        start_bit: 0,
        bit_length: 1,
    });
    assert!(matches!(
        AddressMap::build(&[coil_bf]).unwrap_err(),
        MapError::InvalidBitField { .. }
    ));

    let mut wide_bf = point("w", SemanticType::Float, Region::HoldingRegister, 0);
    wide_bf.modbus.bit_field = Some(BitField {
        start_bit: 0,
        bit_length: 4,
    });
    assert!(matches!(
        AddressMap::build(&[wide_bf]).unwrap_err(),
        MapError::InvalidBitField { .. }
    ));
}

#[test]
fn duplicate_coil_addresses_are_rejected() {
    let err = AddressMap::build(&[
        point("a", SemanticType::Bool, Region::Coil, 3),
        point("b", SemanticType::Bool, Region::Coil, 3),
    ])
    .unwrap_err();
    assert_eq!(
        err,
        MapError::AddressConflict {
            region: Region::Coil,
            address: 3,
        }
    );
}
