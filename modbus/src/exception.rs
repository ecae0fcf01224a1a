//! Modbus application-level exception codes.

use core::fmt;

/// The exception codes this engine emits.
///
/// An exception response carries the request's function byte with the
/// high bit set (`fc | 0x80`) followed by one of these codes.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExceptionCode {
    /// Function code not supported by this server.
    IllegalFunction = 0x01,
    /// A requested address falls outside the device's map.
    IllegalDataAddress = 0x02,
    /// Malformed request field, or a write aimed at a read-only point.
    IllegalDataValue = 0x03,
    /// Unexpected internal failure while handling the request.
    ServerDeviceFailure = 0x04,
}

impl ExceptionCode {
    /// Wire value of the code.
    #[inline]
    pub const fn code(self) -> u8 {
        self as u8
    }

    pub const fn description(self) -> &'static str {
        match self {
            ExceptionCode::IllegalFunction => "Illegal Function",
            ExceptionCode::IllegalDataAddress => "Illegal Data Address",
            ExceptionCode::IllegalDataValue => "Illegal Data Value",
            ExceptionCode::ServerDeviceFailure => "Server Device Failure",
        }
    }
}

impl fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:#04x})", self.description(), self.code())
    }
}
