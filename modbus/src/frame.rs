//! MBAP framing over a TCP stream.
//!
//! A Modbus/TCP request is a 7-byte MBAP header followed by the PDU. All
//! integers are big-endian. Responses echo the transaction id and unit id,
//! always carry protocol id 0, and set the length field to `1 + pdu_len`
//! (the unit id counts toward the length).
//!
//! Framing errors (wrong protocol id, nonsense length) are not answerable
//! on the wire: the caller closes the connection without a response.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use thiserror::Error;

/// Size of the MBAP header on the wire.
pub const MBAP_HEADER_LEN: usize = 7;

/// Largest PDU the protocol allows (function byte + 252 data bytes).
pub const MAX_PDU_LEN: usize = 253;

/// Largest valid MBAP length field: unit id + maximal PDU.
pub const MAX_LENGTH_FIELD: u16 = MAX_PDU_LEN as u16 + 1;

/// Modbus Application Protocol header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MbapHeader {
    pub transaction_id: u16,
    pub protocol_id: u16,
    /// Byte count of everything after this field: unit id + PDU.
    pub length: u16,
    pub unit_id: u8,
}

impl MbapHeader {
    /// Decode from the 7 wire bytes.
    pub fn parse(bytes: &[u8; MBAP_HEADER_LEN]) -> Self {
        Self {
            transaction_id: u16::from_be_bytes([bytes[0], bytes[1]]),
            protocol_id: u16::from_be_bytes([bytes[2], bytes[3]]),
            length: u16::from_be_bytes([bytes[4], bytes[5]]),
            unit_id: bytes[6],
        }
    }

    /// Encode to the 7 wire bytes.
    pub fn encode(&self) -> [u8; MBAP_HEADER_LEN] {
        let t = self.transaction_id.to_be_bytes();
        let p = self.protocol_id.to_be_bytes();
        let l = self.length.to_be_bytes();
        [t[0], t[1], p[0], p[1], l[0], l[1], self.unit_id]
    }

    /// Header for a response PDU of `pdu_len` bytes to this request.
    pub fn response_header(&self, pdu_len: usize) -> Self {
        Self {
            transaction_id: self.transaction_id,
            protocol_id: 0,
            length: pdu_len as u16 + 1,
            unit_id: self.unit_id,
        }
    }
}

/// Why frame assembly stopped.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Peer closed the connection (clean EOF).
    #[error("connection closed by peer")]
    Closed,
    /// No complete frame arrived within the idle window.
    #[error("idle timeout waiting for a frame")]
    IdleTimeout,
    /// The device is stopping; the handler should exit.
    #[error("cancelled")]
    Cancelled,
    /// MBAP protocol id was not 0.
    #[error("bad MBAP protocol id {0:#06x}")]
    BadProtocolId(u16),
    /// MBAP length field outside `2..=254`.
    #[error("bad MBAP length field {0}")]
    BadLength(u16),
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
}

/// Read one complete request frame.
///
/// The stream must have a short read timeout configured; each timeout is
/// used as a poll point for `cancel` and the idle deadline. Returns the
/// header and the PDU bytes (function byte first).
pub fn read_request(
    stream: &mut TcpStream,
    cancel: &AtomicBool,
    idle_timeout: Duration,
) -> Result<(MbapHeader, Vec<u8>), FrameError> {
    let deadline = Instant::now() + idle_timeout;

    let mut head = [0u8; MBAP_HEADER_LEN];
    read_exact_polled(stream, &mut head, cancel, deadline)?;
    let header = MbapHeader::parse(&head);

    if header.protocol_id != 0 {
        return Err(FrameError::BadProtocolId(header.protocol_id));
    }
    if header.length < 2 || header.length > MAX_LENGTH_FIELD {
        return Err(FrameError::BadLength(header.length));
    }

    let mut pdu = vec![0u8; header.length as usize - 1];
    read_exact_polled(stream, &mut pdu, cancel, deadline)?;
    Ok((header, pdu))
}

/// Write one response frame for `request` carrying `pdu`.
pub fn write_response(
    stream: &mut TcpStream,
    request: &MbapHeader,
    pdu: &[u8],
) -> io::Result<()> {
    let header = request.response_header(pdu.len());
    let mut out = Vec::with_capacity(MBAP_HEADER_LEN + pdu.len());
    out.extend_from_slice(&header.encode());
    out.extend_from_slice(pdu);
    stream.write_all(&out)
}

fn read_exact_polled(
    stream: &mut TcpStream,
    buf: &mut [u8],
    cancel: &AtomicBool,
    deadline: Instant,
) -> Result<(), FrameError> {
    let mut filled = 0;
    while filled < buf.len() {
        match stream.read(&mut buf[filled..]) {
            Ok(0) => return Err(FrameError::Closed),
            Ok(n) => filled += n,
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                if cancel.load(Ordering::Relaxed) {
                    return Err(FrameError::Cancelled);
                }
                if Instant::now() >= deadline {
                    return Err(FrameError::IdleTimeout);
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(FrameError::Io(e)),
        }
    }
    Ok(())
}
