//! Device lifecycle, signal generators, and the external-write override
//! controller.
//!
//! # Architecture
//!
//! The [`DeviceManager`] owns every simulated device and serializes its
//! lifecycle (`Stopped → Starting → Running → Stopping → Stopped`, with a
//! `Faulted` sink) behind a per-device mutex. Starting a device builds its
//! address map, seeds the point store, binds the TCP listener, and spawns
//! the generator tick loop; stopping cancels all of it and waits out a
//! bounded grace period.
//!
//! Generators write through the point store as `Simulation`; external
//! Modbus writes arrive as `RemoteWrite` store events and are reconciled
//! with the generators by the override controller on its own worker
//! thread, never on the store's notifying path.

pub mod generator;
pub mod manager;
mod overrides;

pub use generator::{GenRuntime, TICK_INTERVAL};
pub use manager::{
    DeviceError, DeviceEvent, DeviceInfo, DeviceListener, DeviceManager, DeviceState,
};

#[cfg(test)]
mod generator_tests;
#[cfg(test)]
mod manager_tests;
