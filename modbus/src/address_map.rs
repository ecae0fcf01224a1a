//! Per-device wire address index, derived from point definitions at start.
//!
//! Definitions live in one arena `Vec`; each region maps an occupied
//! address to the indices of the definitions contributing to it. Register
//! addresses carry a *list* because a single register may be a bitfield
//! mosaic of several points; bit addresses carry exactly one point.
//!
//! Construction doubles as configuration validation: duplicate keys,
//! degenerate scales, malformed or overlapping bit windows, and address
//! collisions are all rejected here, before the device starts.

use std::collections::{BTreeMap, HashSet};

use modsim_points::{PointDefinition, Region};
use thiserror::Error;

/// Configuration error detected while building the map.
///
/// A device whose definitions fail to build refuses to start.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum MapError {
    #[error("duplicate point key {key:?}")]
    DuplicateKey { key: String },
    #[error("point {key:?} has a zero or non-finite scale")]
    InvalidScale { key: String },
    #[error("point {key:?} has an invalid bit field")]
    InvalidBitField { key: String },
    #[error("point {key:?} does not fit its region at address {address}")]
    AddressOverflow { key: String, address: u16 },
    #[error("{region:?} address {address} is claimed by more than one point")]
    AddressConflict { region: Region, address: u16 },
    #[error("overlapping bit fields at {region:?} address {address}")]
    BitFieldOverlap { region: Region, address: u16 },
}

/// Index from wire addresses to definition-arena indices.
#[derive(Debug)]
pub struct AddressMap {
    defs: Vec<PointDefinition>,
    coils: BTreeMap<u16, usize>,
    discrete_inputs: BTreeMap<u16, usize>,
    holding: BTreeMap<u16, Vec<usize>>,
    input: BTreeMap<u16, Vec<usize>>,
}

impl AddressMap {
    /// Build and validate the map for one device.
    pub fn build(definitions: &[PointDefinition]) -> Result<Self, MapError> {
        let mut coils: BTreeMap<u16, usize> = BTreeMap::new();
        let mut discrete_inputs: BTreeMap<u16, usize> = BTreeMap::new();
        let mut holding: BTreeMap<u16, Vec<usize>> = BTreeMap::new();
        let mut input: BTreeMap<u16, Vec<usize>> = BTreeMap::new();

        let mut keys: HashSet<&str> = HashSet::with_capacity(definitions.len());
        for (idx, def) in definitions.iter().enumerate() {
            if !keys.insert(def.key.as_str()) {
                return Err(MapError::DuplicateKey {
                    key: def.key.clone(),
                });
            }
            if def.modbus.scale == 0.0 || !def.modbus.scale.is_finite() {
                return Err(MapError::InvalidScale {
                    key: def.key.clone(),
                });
            }

            let region = def.modbus.region;
            let address = def.modbus.address;
            if region.is_bit() {
                // Bit entities are plain booleans: no windows, no pairs.
                if def.modbus.bit_field.is_some() || def.semantic.is_double_wide() {
                    return Err(MapError::InvalidBitField {
                        key: def.key.clone(),
                    });
                }
                let table = match region {
                    Region::Coil => &mut coils,
                    _ => &mut discrete_inputs,
                };
                if table.insert(address, idx).is_some() {
                    return Err(MapError::AddressConflict { region, address });
                }
                continue;
            }

            let table = match region {
                Region::HoldingRegister => &mut holding,
                _ => &mut input,
            };
            if def.semantic.is_double_wide() {
                if def.modbus.bit_field.is_some() {
                    return Err(MapError::InvalidBitField {
                        key: def.key.clone(),
                    });
                }
                let high = address;
                let low = address.checked_add(1).ok_or(MapError::AddressOverflow {
                    key: def.key.clone(),
                    address,
                })?;
                for word in [high, low] {
                    if table.contains_key(&word) {
                        return Err(MapError::AddressConflict {
                            region,
                            address: word,
                        });
                    }
                }
                table.insert(high, vec![idx]);
                table.insert(low, vec![idx]);
            } else if let Some(bf) = def.modbus.bit_field {
                if !bf.is_valid() {
                    return Err(MapError::InvalidBitField {
                        key: def.key.clone(),
                    });
                }
                let entry = table.entry(address).or_default();
                let mut occupied: u16 = 0;
                for &other in entry.iter() {
                    match definitions[other].modbus.bit_field {
                        Some(other_bf) => occupied |= other_bf.register_mask(),
                        // Register already claimed whole by a non-bitfield point.
                        None => {
                            return Err(MapError::AddressConflict { region, address });
                        }
                    }
                }
                if occupied & bf.register_mask() != 0 {
                    return Err(MapError::BitFieldOverlap { region, address });
                }
                entry.push(idx);
            } else {
                if table.contains_key(&address) {
                    return Err(MapError::AddressConflict { region, address });
                }
                table.insert(address, vec![idx]);
            }
        }

        Ok(Self {
            defs: definitions.to_vec(),
            coils,
            discrete_inputs,
            holding,
            input,
        })
    }

    /// The definition arena, in input order.
    #[inline]
    pub fn defs(&self) -> &[PointDefinition] {
        &self.defs
    }

    /// A definition by arena index.
    #[inline]
    pub fn def(&self, idx: usize) -> &PointDefinition {
        &self.defs[idx]
    }

    /// The point behind a coil/discrete-input address, if mapped.
    pub fn bit_point(&self, region: Region, address: u16) -> Option<usize> {
        match region {
            Region::Coil => self.coils.get(&address).copied(),
            Region::DiscreteInput => self.discrete_inputs.get(&address).copied(),
            _ => None,
        }
    }

    /// The points behind a holding/input register address, if mapped.
    pub fn register_points(&self, region: Region, address: u16) -> Option<&[usize]> {
        match region {
            Region::HoldingRegister => self.holding.get(&address).map(Vec::as_slice),
            Region::InputRegister => self.input.get(&address).map(Vec::as_slice),
            _ => None,
        }
    }
}
