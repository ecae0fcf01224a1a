//! Deterministic signal generators and the per-device tick loop.
//!
//! Waveforms are pure functions of wall-clock time so that concurrently
//! running devices stay phase-coherent and a restarted device resumes the
//! same trajectory. Only `random` consults an RNG.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::Rng;
use rand::rngs::SmallRng;
use spin::RwLock;

use modsim_points::{
    DeviceId, GeneratorConfig, GeneratorKind, Kind, PointDefinition, PointStore, Value,
    ValueSource,
};

/// Cadence of the per-device generator loop.
pub const TICK_INTERVAL: Duration = Duration::from_millis(500);

struct GenSlot {
    current: GeneratorKind,
    /// Generator type to restore when a hold expires. Recorded by the
    /// first hold and preserved across back-to-back holds.
    original: Option<GeneratorKind>,
}

/// Live per-point generator state of one device.
///
/// The definitions are immutable while the device runs; this tracks the
/// one thing the override controller may flip at runtime, the effective
/// generator type.
pub struct GenRuntime {
    slots: RwLock<HashMap<String, GenSlot>>,
}

impl GenRuntime {
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
        }
    }

    /// Re-seed from definitions at device start.
    pub fn reset(&self, definitions: &[PointDefinition]) {
        let mut slots = self.slots.write();
        slots.clear();
        for def in definitions {
            slots.insert(
                def.key.clone(),
                GenSlot {
                    current: def.generator.kind,
                    original: None,
                },
            );
        }
    }

    /// Effective generator type of a point.
    pub fn current(&self, key: &str) -> Option<GeneratorKind> {
        self.slots.read().get(key).map(|s| s.current)
    }

    /// Flip a point to `static` for good, forgetting any recorded
    /// original.
    pub fn force_static(&self, key: &str) {
        if let Some(slot) = self.slots.write().get_mut(key) {
            slot.current = GeneratorKind::Static;
            slot.original = None;
        }
    }

    /// Begin (or extend) a hold: record the original type once, then flip
    /// to `static`.
    pub fn begin_hold(&self, key: &str) {
        if let Some(slot) = self.slots.write().get_mut(key) {
            if slot.original.is_none() {
                slot.original = Some(slot.current);
            }
            slot.current = GeneratorKind::Static;
        }
    }

    /// End a hold: restore the original type if the point is still
    /// `static`, and clear the recorded original either way. Returns
    /// `true` if a restore happened.
    pub fn end_hold(&self, key: &str) -> bool {
        let mut slots = self.slots.write();
        let Some(slot) = slots.get_mut(key) else {
            return false;
        };
        let original = slot.original.take();
        if slot.current == GeneratorKind::Static {
            if let Some(orig) = original {
                slot.current = orig;
                return true;
            }
        }
        false
    }
}

impl Default for GenRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// Compute the waveform value at wall-clock second `t`.
pub fn waveform(kind: GeneratorKind, cfg: &GeneratorConfig, t: f64, rng: &mut SmallRng) -> f64 {
    let span = cfg.max - cfg.min;
    match kind {
        GeneratorKind::Static => cfg.min,
        GeneratorKind::Ramp => {
            if cfg.period_seconds <= 0.0 {
                return cfg.min;
            }
            let progress = (t % cfg.period_seconds) / cfg.period_seconds;
            cfg.min + progress * span
        }
        GeneratorKind::Sine => {
            if cfg.period_seconds <= 0.0 {
                return (cfg.max + cfg.min) / 2.0;
            }
            (cfg.max + cfg.min) / 2.0
                + span / 2.0 * (2.0 * core::f64::consts::PI * t / cfg.period_seconds).sin()
        }
        GeneratorKind::Random => cfg.min + rng.gen_range(0.0..1.0) * span,
    }
}

/// Display text for a committed value: enum label when the point has one,
/// two fraction digits for plain numerics, nothing for plain booleans.
pub(crate) fn display_for(def: &PointDefinition, value: f64) -> Option<String> {
    if let Some(label) = def.display_map.get(&(value.round() as i64)) {
        return Some(label.clone());
    }
    if def.semantic.kind() == Kind::Bool {
        None
    } else {
        Some(format!("{value:.2}"))
    }
}

/// The per-device tick loop. Runs until `cancel` is raised.
pub(crate) fn run_loop(
    store: Arc<PointStore>,
    device: DeviceId,
    definitions: Arc<Vec<PointDefinition>>,
    runtime: Arc<GenRuntime>,
    cancel: Arc<AtomicBool>,
) {
    use rand::SeedableRng;
    let mut rng = SmallRng::from_entropy();

    while !cancel.load(Ordering::Relaxed) {
        let t = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();

        for def in definitions.iter() {
            let kind = runtime.current(&def.key).unwrap_or(def.generator.kind);
            if kind == GeneratorKind::Static {
                continue;
            }
            let raw = waveform(kind, &def.generator, t, &mut rng);
            let (value, display) = if def.semantic.kind() == Kind::Bool {
                let b = raw >= 0.5;
                (Value::Bool(b), display_for(def, if b { 1.0 } else { 0.0 }))
            } else {
                (Value::Numeric(raw), display_for(def, raw))
            };
            store.set(device, &def.key, value, ValueSource::Simulation, display);
        }

        thread::sleep(TICK_INTERVAL);
    }
    log::debug!("{device}: generator loop exited");
}
