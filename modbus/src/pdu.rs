//! PDU parsing and response building.
//!
//! Parsing validates everything the Modbus application protocol fixes
//! before the address map is consulted: function-code support, quantity
//! ranges, byte counts, and the FC 05 coil constants. Failures map
//! directly to exception codes.

use crate::exception::ExceptionCode;

pub const FC_READ_COILS: u8 = 0x01;
pub const FC_READ_DISCRETE_INPUTS: u8 = 0x02;
pub const FC_READ_HOLDING_REGISTERS: u8 = 0x03;
pub const FC_READ_INPUT_REGISTERS: u8 = 0x04;
pub const FC_WRITE_SINGLE_COIL: u8 = 0x05;
pub const FC_WRITE_SINGLE_REGISTER: u8 = 0x06;
pub const FC_WRITE_MULTIPLE_COILS: u8 = 0x0F;
pub const FC_WRITE_MULTIPLE_REGISTERS: u8 = 0x10;

/// Maximum bit quantity of an FC 01/02 read.
pub const MAX_READ_BITS: u16 = 2000;
/// Maximum register quantity of an FC 03/04 read.
pub const MAX_READ_REGISTERS: u16 = 125;
/// Maximum bit quantity of an FC 15 write.
pub const MAX_WRITE_BITS: u16 = 1968;
/// Maximum register quantity of an FC 16 write.
pub const MAX_WRITE_REGISTERS: u16 = 123;

/// A parsed, validated request PDU.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Request {
    ReadCoils { start: u16, count: u16 },
    ReadDiscreteInputs { start: u16, count: u16 },
    ReadHoldingRegisters { start: u16, count: u16 },
    ReadInputRegisters { start: u16, count: u16 },
    WriteSingleCoil { address: u16, value: bool },
    WriteSingleRegister { address: u16, value: u16 },
    WriteMultipleCoils { start: u16, values: Vec<bool> },
    WriteMultipleRegisters { start: u16, values: Vec<u16> },
}

/// Parse a request PDU (function byte first).
///
/// The returned exception code is ready to be sent back under
/// `pdu[0] | 0x80`.
pub fn parse_request(pdu: &[u8]) -> Result<Request, ExceptionCode> {
    let (&fc, body) = pdu
        .split_first()
        .ok_or(ExceptionCode::IllegalDataValue)?;
    match fc {
        FC_READ_COILS | FC_READ_DISCRETE_INPUTS => {
            let (start, count) = parse_addr_qty(body)?;
            if count == 0 || count > MAX_READ_BITS {
                return Err(ExceptionCode::IllegalDataValue);
            }
            Ok(if fc == FC_READ_COILS {
                Request::ReadCoils { start, count }
            } else {
                Request::ReadDiscreteInputs { start, count }
            })
        }
        FC_READ_HOLDING_REGISTERS | FC_READ_INPUT_REGISTERS => {
            let (start, count) = parse_addr_qty(body)?;
            if count == 0 || count > MAX_READ_REGISTERS {
                return Err(ExceptionCode::IllegalDataValue);
            }
            Ok(if fc == FC_READ_HOLDING_REGISTERS {
                Request::ReadHoldingRegisters { start, count }
            } else {
                Request::ReadInputRegisters { start, count }
            })
        }
        FC_WRITE_SINGLE_COIL => {
            let (address, raw) = parse_addr_qty(body)?;
            let value = match raw {
                0xFF00 => true,
                0x0000 => false,
                _ => return Err(ExceptionCode::IllegalDataValue),
            };
            Ok(Request::WriteSingleCoil { address, value })
        }
        FC_WRITE_SINGLE_REGISTER => {
            let (address, value) = parse_addr_qty(body)?;
            Ok(Request::WriteSingleRegister { address, value })
        }
        FC_WRITE_MULTIPLE_COILS => {
            if body.len() < 5 {
                return Err(ExceptionCode::IllegalDataValue);
            }
            let start = u16::from_be_bytes([body[0], body[1]]);
            let count = u16::from_be_bytes([body[2], body[3]]);
            let byte_count = body[4] as usize;
            if count == 0 || count > MAX_WRITE_BITS {
                return Err(ExceptionCode::IllegalDataValue);
            }
            if byte_count != (count as usize).div_ceil(8) || body.len() != 5 + byte_count {
                return Err(ExceptionCode::IllegalDataValue);
            }
            let values = (0..count as usize)
                .map(|i| body[5 + i / 8] & (1 << (i % 8)) != 0)
                .collect();
            Ok(Request::WriteMultipleCoils { start, values })
        }
        FC_WRITE_MULTIPLE_REGISTERS => {
            if body.len() < 5 {
                return Err(ExceptionCode::IllegalDataValue);
            }
            let start = u16::from_be_bytes([body[0], body[1]]);
            let count = u16::from_be_bytes([body[2], body[3]]);
            let byte_count = body[4] as usize;
            if count == 0 || count > MAX_WRITE_REGISTERS {
                return Err(ExceptionCode::IllegalDataValue);
            }
            if byte_count != count as usize * 2 || body.len() != 5 + byte_count {
                return Err(ExceptionCode::IllegalDataValue);
            }
            let values = (0..count as usize)
                .map(|i| u16::from_be_bytes([body[5 + 2 * i], body[6 + 2 * i]]))
                .collect();
            Ok(Request::WriteMultipleRegisters { start, values })
        }
        _ => Err(ExceptionCode::IllegalFunction),
    }
}

fn parse_addr_qty(body: &[u8]) -> Result<(u16, u16), ExceptionCode> {
    if body.len() != 4 {
        return Err(ExceptionCode::IllegalDataValue);
    }
    Ok((
        u16::from_be_bytes([body[0], body[1]]),
        u16::from_be_bytes([body[2], body[3]]),
    ))
}

/// FC 01/02 response: byte count, then bits packed LSB-first.
pub fn bits_response(fc: u8, bits: &[bool]) -> Vec<u8> {
    let byte_count = bits.len().div_ceil(8);
    let mut pdu = vec![0u8; 2 + byte_count];
    pdu[0] = fc;
    pdu[1] = byte_count as u8;
    for (i, &bit) in bits.iter().enumerate() {
        if bit {
            pdu[2 + i / 8] |= 1 << (i % 8);
        }
    }
    pdu
}

/// FC 03/04 response: byte count, then big-endian register words.
pub fn registers_response(fc: u8, registers: &[u16]) -> Vec<u8> {
    let mut pdu = Vec::with_capacity(2 + registers.len() * 2);
    pdu.push(fc);
    pdu.push((registers.len() * 2) as u8);
    for reg in registers {
        pdu.extend_from_slice(&reg.to_be_bytes());
    }
    pdu
}

/// FC 05/06 response: echo of address and raw value.
pub fn echo_response(fc: u8, address: u16, raw: u16) -> Vec<u8> {
    let a = address.to_be_bytes();
    let v = raw.to_be_bytes();
    vec![fc, a[0], a[1], v[0], v[1]]
}

/// FC 15/16 response: start address and quantity written.
pub fn write_multiple_response(fc: u8, start: u16, count: u16) -> Vec<u8> {
    let a = start.to_be_bytes();
    let c = count.to_be_bytes();
    vec![fc, a[0], a[1], c[0], c[1]]
}

/// Exception response: `fc | 0x80` followed by the exception code.
pub fn exception_response(fc: u8, code: ExceptionCode) -> Vec<u8> {
    vec![fc | 0x80, code.code()]
}
