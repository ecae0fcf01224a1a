//! Translation between wire registers/bits and logical point values.
//!
//! Read side: bit regions are sparse-tolerant (unmapped addresses read as
//! `false`), register regions require full coverage. A register is either
//! one whole point (scaled 16-bit, or one word of a 32-bit pair) or a
//! mosaic of bitfield points OR-ed together.
//!
//! Write side: access is enforced before anything is stored; multi-write
//! requests validate their whole range first so a rejected request leaves
//! the store untouched. 32-bit pairs use big-endian word order (high word
//! at the lower address); writing a single word of a pair is a
//! read-modify-write of the stored value.

use modsim_points::{DeviceId, PointDefinition, PointStore, Region, SemanticType, Value, ValueSource};

use crate::address_map::AddressMap;
use crate::exception::ExceptionCode;

/// FC 01/02: read a run of bits.
pub fn read_bits(
    map: &AddressMap,
    store: &PointStore,
    device: DeviceId,
    region: Region,
    start: u16,
    count: u16,
) -> Result<Vec<bool>, ExceptionCode> {
    check_range(start, count)?;
    let mut bits = Vec::with_capacity(count as usize);
    for off in 0..count {
        let address = start + off;
        let bit = map
            .bit_point(region, address)
            .map(|idx| store.get(device, &map.def(idx).key).value.as_bool())
            .unwrap_or(false);
        bits.push(bit);
    }
    Ok(bits)
}

/// FC 03/04: read a run of registers. Every address must be mapped.
pub fn read_registers(
    map: &AddressMap,
    store: &PointStore,
    device: DeviceId,
    region: Region,
    start: u16,
    count: u16,
) -> Result<Vec<u16>, ExceptionCode> {
    check_range(start, count)?;
    let mut registers = Vec::with_capacity(count as usize);
    for off in 0..count {
        let address = start + off;
        let idxs = map
            .register_points(region, address)
            .ok_or(ExceptionCode::IllegalDataAddress)?;
        registers.push(encode_register(map, store, device, address, idxs));
    }
    Ok(registers)
}

/// FC 05: write one coil.
pub fn write_coil(
    map: &AddressMap,
    store: &PointStore,
    device: DeviceId,
    address: u16,
    value: bool,
) -> Result<(), ExceptionCode> {
    let idx = map
        .bit_point(Region::Coil, address)
        .ok_or(ExceptionCode::IllegalDataAddress)?;
    let def = map.def(idx);
    if !def.access.writable() {
        return Err(ExceptionCode::IllegalDataValue);
    }
    store.set(device, &def.key, Value::Bool(value), ValueSource::RemoteWrite, None);
    Ok(())
}

/// FC 15: write a run of coils. The whole range is validated first.
pub fn write_coils(
    map: &AddressMap,
    store: &PointStore,
    device: DeviceId,
    start: u16,
    values: &[bool],
) -> Result<(), ExceptionCode> {
    check_range(start, values.len() as u16)?;
    let mut targets = Vec::with_capacity(values.len());
    for off in 0..values.len() {
        let idx = map
            .bit_point(Region::Coil, start + off as u16)
            .ok_or(ExceptionCode::IllegalDataAddress)?;
        if !map.def(idx).access.writable() {
            return Err(ExceptionCode::IllegalDataValue);
        }
        targets.push(idx);
    }
    for (&idx, &value) in targets.iter().zip(values) {
        let def = map.def(idx);
        store.set(device, &def.key, Value::Bool(value), ValueSource::RemoteWrite, None);
    }
    Ok(())
}

/// FC 06: write one holding register.
pub fn write_register(
    map: &AddressMap,
    store: &PointStore,
    device: DeviceId,
    address: u16,
    raw: u16,
) -> Result<(), ExceptionCode> {
    let idxs = map
        .register_points(Region::HoldingRegister, address)
        .ok_or(ExceptionCode::IllegalDataAddress)?;
    ensure_writable(map, idxs)?;

    let def0 = map.def(idxs[0]);
    if idxs.len() == 1 && def0.modbus.bit_field.is_none() && def0.semantic.is_double_wide() {
        rmw_wide(store, device, def0, address, raw);
    } else {
        apply_narrow(map, store, device, idxs, raw);
    }
    Ok(())
}

/// FC 16: write a run of holding registers.
///
/// The whole range is validated first. A 32-bit pair fully covered by the
/// request is decoded from both words and stored as one write; a pair
/// only half covered falls back to read-modify-write of that word.
pub fn write_registers(
    map: &AddressMap,
    store: &PointStore,
    device: DeviceId,
    start: u16,
    values: &[u16],
) -> Result<(), ExceptionCode> {
    check_range(start, values.len() as u16)?;
    let mut targets = Vec::with_capacity(values.len());
    for off in 0..values.len() {
        let idxs = map
            .register_points(Region::HoldingRegister, start + off as u16)
            .ok_or(ExceptionCode::IllegalDataAddress)?;
        ensure_writable(map, idxs)?;
        targets.push(idxs);
    }

    let mut off = 0usize;
    while off < values.len() {
        let address = start + off as u16;
        let idxs = targets[off];
        let def0 = map.def(idxs[0]);
        if idxs.len() == 1 && def0.modbus.bit_field.is_none() && def0.semantic.is_double_wide() {
            if address == def0.modbus.address && off + 1 < values.len() {
                let bits = (u32::from(values[off]) << 16) | u32::from(values[off + 1]);
                let decoded = decode_wide(def0, bits);
                store.set(
                    device,
                    &def0.key,
                    Value::Numeric(decoded),
                    ValueSource::RemoteWrite,
                    None,
                );
                off += 2;
                continue;
            }
            rmw_wide(store, device, def0, address, values[off]);
        } else {
            apply_narrow(map, store, device, idxs, values[off]);
        }
        off += 1;
    }
    Ok(())
}

fn check_range(start: u16, count: u16) -> Result<(), ExceptionCode> {
    if u32::from(start) + u32::from(count) > 0x1_0000 {
        return Err(ExceptionCode::IllegalDataAddress);
    }
    Ok(())
}

fn ensure_writable(map: &AddressMap, idxs: &[usize]) -> Result<(), ExceptionCode> {
    for &idx in idxs {
        if !map.def(idx).access.writable() {
            return Err(ExceptionCode::IllegalDataValue);
        }
    }
    Ok(())
}

/// Encode the register at `address` from the points behind it.
fn encode_register(
    map: &AddressMap,
    store: &PointStore,
    device: DeviceId,
    address: u16,
    idxs: &[usize],
) -> u16 {
    let def0 = map.def(idxs[0]);
    if idxs.len() == 1 && def0.modbus.bit_field.is_none() {
        let value = store.get(device, &def0.key).value.as_f64();
        if def0.semantic.is_double_wide() {
            let bits = encode_wide(def0, value);
            return if address == def0.modbus.address {
                (bits >> 16) as u16
            } else {
                bits as u16
            };
        }
        return encode_narrow(def0, value);
    }

    // Bitfield mosaic: OR every contributing window together.
    let mut register = 0u16;
    for &idx in idxs {
        let def = map.def(idx);
        if let Some(bf) = def.modbus.bit_field {
            let raw = store.get(device, &def.key).value.as_f64().round() as i64;
            register |= bf.insert(raw as u16);
        }
    }
    register
}

/// Scaled 16-bit encoding; signed types go through two's complement.
fn encode_narrow(def: &PointDefinition, value: f64) -> u16 {
    let raw = (value * def.modbus.scale).round() as i64;
    match def.semantic {
        SemanticType::Int16 => raw as i16 as u16,
        _ => raw as u16,
    }
}

/// 32-bit encoding of the stored value, scale applied. Only meaningful
/// for double-wide semantic types.
fn encode_wide(def: &PointDefinition, value: f64) -> u32 {
    let scaled = value * def.modbus.scale;
    match def.semantic {
        SemanticType::Float => (scaled as f32).to_bits(),
        SemanticType::Int32 => scaled.round() as i64 as i32 as u32,
        _ => scaled.round() as i64 as u32,
    }
}

/// Inverse of [`encode_wide`]: wire bits back to the stored value.
fn decode_wide(def: &PointDefinition, bits: u32) -> f64 {
    let raw = match def.semantic {
        SemanticType::Float => f64::from(f32::from_bits(bits)),
        SemanticType::Int32 => f64::from(bits as i32),
        _ => f64::from(bits),
    };
    raw / def.modbus.scale
}

/// Apply an incoming 16-bit register word to the point(s) at one address:
/// every bitfield point extracts its own window (unscaled); a whole
/// register point descales; a bool point coerces on nonzero.
fn apply_narrow(
    map: &AddressMap,
    store: &PointStore,
    device: DeviceId,
    idxs: &[usize],
    raw: u16,
) {
    for &idx in idxs {
        let def = map.def(idx);
        let value = match def.modbus.bit_field {
            Some(bf) => Value::Numeric(f64::from(bf.extract(raw))),
            None => match def.semantic {
                SemanticType::Bool => Value::Bool(raw != 0),
                SemanticType::Int16 => Value::Numeric(f64::from(raw as i16) / def.modbus.scale),
                _ => Value::Numeric(f64::from(raw) / def.modbus.scale),
            },
        };
        store.set(device, &def.key, value, ValueSource::RemoteWrite, None);
    }
}

/// Replace one word of a stored 32-bit value and write the result back.
fn rmw_wide(store: &PointStore, device: DeviceId, def: &PointDefinition, address: u16, raw: u16) {
    let current = encode_wide(def, store.get(device, &def.key).value.as_f64());
    let bits = if address == def.modbus.address {
        (current & 0x0000_FFFF) | (u32::from(raw) << 16)
    } else {
        (current & 0xFFFF_0000) | u32::from(raw)
    };
    store.set(
        device,
        &def.key,
        Value::Numeric(decode_wide(def, bits)),
        ValueSource::RemoteWrite,
        None,
    );
}
