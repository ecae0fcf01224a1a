//! Point model and live-value store for the Modbus device simulator.
//!
//! This crate is the leaf of the workspace: it defines what a *point* is
//! (its semantic type, wire mapping, generator and override policy) and
//! owns the [`PointStore`], the single source of truth for live values,
//! shared by the protocol engine, the generator loops, and any UI host.
//!
//! Nothing in here touches the network or spawns threads; higher layers
//! drive the store and react to its change events.

pub mod definition;
pub mod id;
pub mod store;
pub mod value;

pub use definition::{
    AccessMode, BitField, DeviceConfig, GeneratorConfig, GeneratorKind, ModbusMapping,
    OverrideMode, PointDefinition, Region, SemanticType,
};
pub use id::DeviceId;
pub use store::{ChangeEvent, ChangeKind, ChangeListener, PointSlot, PointStore, SubscriberId};
pub use value::{Kind, Value, ValueSource};
