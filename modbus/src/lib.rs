//! Modbus/TCP wire layer: framing, dispatch, and the per-device address
//! map that translates between wire registers and logical points.
//!
//! # Architecture
//!
//! Requests flow through four stages, each its own module:
//!
//! 1. [`frame`]: MBAP header assembly from a TCP stream. Malformed frames
//!    close the connection without a response.
//! 2. [`pdu`]: function-code parsing into a typed [`pdu::Request`] and
//!    byte-exact response building. Validation failures here already map
//!    to Modbus exception codes.
//! 3. [`codec`]: the value layer. Scaling, bitfield mosaics, 32-bit
//!    register pairs, and access enforcement, against the [`AddressMap`]
//!    and the point store.
//! 4. [`engine`]: glue. One [`engine::RequestHandler`] per running
//!    device turns request PDUs into response PDUs.
//!
//! [`server`] owns the TCP side: one listener per device, one handler
//! thread per connection, no session state.

pub mod address_map;
pub mod codec;
pub mod engine;
pub mod exception;
pub mod frame;
pub mod pdu;
pub mod server;

pub use address_map::{AddressMap, MapError};
pub use engine::RequestHandler;
pub use exception::ExceptionCode;
pub use server::SlaveListener;

#[cfg(test)]
mod address_map_tests;
#[cfg(test)]
mod engine_tests;
