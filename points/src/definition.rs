//! Static per-device point metadata.
//!
//! A [`PointDefinition`] describes one logical point: how it appears on the
//! Modbus wire, which generator drives it, and how external writes interact
//! with that generator. Definitions are immutable while their device is
//! running; the address map derives from them at every start.

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};

use bitflags::bitflags;
use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

use crate::id::DeviceId;
use crate::value::Kind;

/// Semantic type of a point's value.
///
/// 32-bit types occupy two consecutive register addresses (the mapping's
/// base and base+1).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SemanticType {
    Bool,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Float,
}

impl SemanticType {
    /// The slot kind this semantic type seeds in the store.
    #[inline]
    pub const fn kind(&self) -> Kind {
        match self {
            SemanticType::Bool => Kind::Bool,
            _ => Kind::Numeric,
        }
    }

    /// `true` for types that span a register pair.
    #[inline]
    pub const fn is_double_wide(&self) -> bool {
        matches!(
            self,
            SemanticType::Int32 | SemanticType::Uint32 | SemanticType::Float
        )
    }
}

bitflags! {
    /// Access rights of a point as seen from the Modbus wire.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct AccessMode: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const READ_WRITE = Self::READ.bits() | Self::WRITE.bits();
    }
}

impl AccessMode {
    /// `true` if protocol writes are allowed.
    #[inline]
    pub const fn writable(&self) -> bool {
        self.contains(AccessMode::WRITE)
    }
}

impl Serialize for AccessMode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let text = if self.contains(AccessMode::READ_WRITE) {
            "readwrite"
        } else if self.contains(AccessMode::WRITE) {
            "write"
        } else {
            "read"
        };
        serializer.serialize_str(text)
    }
}

impl<'de> Deserialize<'de> for AccessMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        match text.as_str() {
            "read" => Ok(AccessMode::READ),
            "write" => Ok(AccessMode::WRITE),
            "readwrite" => Ok(AccessMode::READ_WRITE),
            other => Err(de::Error::unknown_variant(
                other,
                &["read", "write", "readwrite"],
            )),
        }
    }
}

/// Modbus data region a point lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Region {
    Coil,
    DiscreteInput,
    HoldingRegister,
    InputRegister,
}

impl Region {
    /// `true` for the single-bit regions (coils, discrete inputs).
    #[inline]
    pub const fn is_bit(&self) -> bool {
        matches!(self, Region::Coil | Region::DiscreteInput)
    }

    /// `true` for regions the protocol may write (coils, holding registers).
    #[inline]
    pub const fn protocol_writable(&self) -> bool {
        matches!(self, Region::Coil | Region::HoldingRegister)
    }
}

/// A contiguous bit window within a single 16-bit register.
///
/// Several points may share one register address as long as their windows
/// do not overlap; the address map validates this at device start.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitField {
    /// First bit of the window, 0 = least significant. Valid range 0..=15.
    pub start_bit: u8,
    /// Window width in bits. Valid range 1..=16, with
    /// `start_bit + bit_length <= 16`.
    pub bit_length: u8,
}

impl BitField {
    /// `true` if the window lies within a 16-bit register.
    #[inline]
    pub const fn is_valid(&self) -> bool {
        self.bit_length >= 1
            && self.bit_length <= 16
            && self.start_bit <= 15
            && self.start_bit as u16 + self.bit_length as u16 <= 16
    }

    /// Unshifted mask of the window (`bit_length` low bits set).
    #[inline]
    pub const fn mask(&self) -> u16 {
        if self.bit_length >= 16 {
            u16::MAX
        } else {
            (1u16 << self.bit_length) - 1
        }
    }

    /// Mask positioned at the window's location in the register.
    #[inline]
    pub const fn register_mask(&self) -> u16 {
        self.mask() << self.start_bit
    }

    /// Extract this window from a register value.
    #[inline]
    pub const fn extract(&self, register: u16) -> u16 {
        (register >> self.start_bit) & self.mask()
    }

    /// Place `value` into this window (masked, shifted, other bits zero).
    #[inline]
    pub const fn insert(&self, value: u16) -> u16 {
        (value & self.mask()) << self.start_bit
    }
}

/// How a point appears on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModbusMapping {
    pub region: Region,
    /// 0-based raw address within the region.
    pub address: u16,
    /// Wire value = `scale × point value` for registers. Must be nonzero.
    #[serde(default = "default_scale")]
    pub scale: f64,
    /// Present when the point occupies a bit window of a shared register.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bit_field: Option<BitField>,
}

fn default_scale() -> f64 {
    1.0
}

/// Which waveform drives a point between external writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeneratorKind {
    Static,
    Sine,
    Ramp,
    Random,
}

/// Generator parameters for one point.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeneratorConfig {
    #[serde(rename = "type")]
    pub kind: GeneratorKind,
    #[serde(default)]
    pub min: f64,
    #[serde(default = "default_max")]
    pub max: f64,
    #[serde(default = "default_period")]
    pub period_seconds: f64,
    /// Advisory granularity for ramps; the linear form is authoritative.
    #[serde(default = "default_step")]
    pub step: f64,
}

fn default_max() -> f64 {
    100.0
}

fn default_period() -> f64 {
    10.0
}

fn default_step() -> f64 {
    1.0
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            kind: GeneratorKind::Static,
            min: 0.0,
            max: default_max(),
            period_seconds: default_period(),
            step: default_step(),
        }
    }
}

/// Policy for reconciling external writes with an active generator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideMode {
    /// External writes land in the store and the generator keeps running.
    #[default]
    None,
    /// The first external write flips the generator to `static` for good.
    ForceStatic,
    /// External writes flip the generator to `static` for a bounded hold;
    /// the original generator type is restored on expiry.
    HoldForSeconds,
}

/// Immutable (while running) description of one logical point.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PointDefinition {
    /// Unique within a device.
    pub key: String,
    #[serde(rename = "type")]
    pub semantic: SemanticType,
    #[serde(default = "default_access")]
    pub access: AccessMode,
    pub modbus: ModbusMapping,
    #[serde(default)]
    pub generator: GeneratorConfig,
    #[serde(default)]
    pub override_mode: OverrideMode,
    /// Hold duration for [`OverrideMode::HoldForSeconds`]; `0` means the
    /// default of 10 seconds.
    #[serde(default)]
    pub override_duration_seconds: u64,
    /// Optional enum labels: nearest integer value → display text.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub display_map: BTreeMap<i64, String>,
}

fn default_access() -> AccessMode {
    AccessMode::READ_WRITE
}

impl PointDefinition {
    /// Effective hold duration in seconds (configured, or 10).
    #[inline]
    pub fn hold_duration(&self) -> u64 {
        if self.override_duration_seconds == 0 {
            10
        } else {
            self.override_duration_seconds
        }
    }
}

/// A device as loaded from a host template.
///
/// Runtime fields (lifecycle state, last error) are deliberately absent:
/// every loaded device starts `Stopped` with no error.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Pinned id; allocated by the manager when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<DeviceId>,
    pub name: String,
    #[serde(default = "default_bind_ip")]
    pub bind_ip: IpAddr,
    pub port: u16,
    #[serde(default)]
    pub points: Vec<PointDefinition>,
}

fn default_bind_ip() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}
