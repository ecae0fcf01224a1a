//! Request dispatch: one handler per running device.

use std::sync::Arc;

use modsim_points::{DeviceId, PointStore, Region};

use crate::address_map::AddressMap;
use crate::codec;
use crate::exception::ExceptionCode;
use crate::pdu::{self, Request};

/// Turns request PDUs into response PDUs for one device.
///
/// Handlers are shared by every connection of the device; all state lives
/// in the address map (immutable) and the point store (concurrent), so a
/// handler itself is stateless.
pub struct RequestHandler {
    map: Arc<AddressMap>,
    store: Arc<PointStore>,
    device: DeviceId,
}

impl RequestHandler {
    pub fn new(map: Arc<AddressMap>, store: Arc<PointStore>, device: DeviceId) -> Self {
        Self { map, store, device }
    }

    pub fn device(&self) -> DeviceId {
        self.device
    }

    /// Handle one request PDU, always producing a response PDU: either
    /// the function's normal response or an exception response.
    pub fn handle_pdu(&self, request: &[u8]) -> Vec<u8> {
        let fc = request.first().copied().unwrap_or(0);
        let result = pdu::parse_request(request).and_then(|req| self.execute(req));
        match result {
            Ok(response) => response,
            Err(code) => {
                log::debug!(
                    "{}: fc {fc:#04x} rejected with {code}",
                    self.device
                );
                pdu::exception_response(fc, code)
            }
        }
    }

    fn execute(&self, request: Request) -> Result<Vec<u8>, ExceptionCode> {
        let (map, store, dev) = (&*self.map, &*self.store, self.device);
        match request {
            Request::ReadCoils { start, count } => {
                codec::read_bits(map, store, dev, Region::Coil, start, count)
                    .map(|bits| pdu::bits_response(pdu::FC_READ_COILS, &bits))
            }
            Request::ReadDiscreteInputs { start, count } => {
                codec::read_bits(map, store, dev, Region::DiscreteInput, start, count)
                    .map(|bits| pdu::bits_response(pdu::FC_READ_DISCRETE_INPUTS, &bits))
            }
            Request::ReadHoldingRegisters { start, count } => {
                codec::read_registers(map, store, dev, Region::HoldingRegister, start, count)
                    .map(|regs| pdu::registers_response(pdu::FC_READ_HOLDING_REGISTERS, &regs))
            }
            Request::ReadInputRegisters { start, count } => {
                codec::read_registers(map, store, dev, Region::InputRegister, start, count)
                    .map(|regs| pdu::registers_response(pdu::FC_READ_INPUT_REGISTERS, &regs))
            }
            Request::WriteSingleCoil { address, value } => {
                codec::write_coil(map, store, dev, address, value).map(|()| {
                    let raw = if value { 0xFF00 } else { 0x0000 };
                    pdu::echo_response(pdu::FC_WRITE_SINGLE_COIL, address, raw)
                })
            }
            Request::WriteSingleRegister { address, value } => {
                codec::write_register(map, store, dev, address, value)
                    .map(|()| pdu::echo_response(pdu::FC_WRITE_SINGLE_REGISTER, address, value))
            }
            Request::WriteMultipleCoils { start, values } => {
                codec::write_coils(map, store, dev, start, &values).map(|()| {
                    pdu::write_multiple_response(
                        pdu::FC_WRITE_MULTIPLE_COILS,
                        start,
                        values.len() as u16,
                    )
                })
            }
            Request::WriteMultipleRegisters { start, values } => {
                codec::write_registers(map, store, dev, start, &values).map(|()| {
                    pdu::write_multiple_response(
                        pdu::FC_WRITE_MULTIPLE_REGISTERS,
                        start,
                        values.len() as u16,
                    )
                })
            }
        }
    }
}
