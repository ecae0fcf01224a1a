//! Concurrent live-value store.
//!
//! The store is the only mutable state shared between a device's protocol
//! handlers, its generator loop, and UI observers. It maps
//! `(device, point key) → slot` with a fixed kind tag per slot and emits a
//! change event after every mutation.
//!
//! # Concurrency
//!
//! Each device owns its own slot map behind a `spin::RwLock`. Change
//! events carry a snapshot of the slot (a listener never observes a
//! half-written slot) and are delivered before the slot lock is released,
//! so for any one key the event order matches the write order.
//!
//! Listeners are invoked on whatever thread performed the mutation and
//! MUST NOT call back into the store synchronously from the notifying
//! path; hand the event to a channel or worker instead. This contract is
//! what makes under-lock delivery deadlock-free.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use spin::RwLock;

use crate::definition::PointDefinition;
use crate::id::DeviceId;
use crate::value::{Kind, Value, ValueSource};

/// One live runtime value with its metadata.
#[derive(Clone, Debug, PartialEq)]
pub struct PointSlot {
    pub value: Value,
    /// Fixed at initialization; writes of the wrong kind are rejected.
    pub expected_kind: Kind,
    pub source: ValueSource,
    /// UTC timestamp of the last accepted write. `UNIX_EPOCH` for a slot
    /// that has never been written.
    pub last_updated: SystemTime,
    pub display_value: Option<String>,
    pub override_status: Option<String>,
}

impl PointSlot {
    /// A never-written slot holding the type-appropriate zero.
    pub fn zeroed(kind: Kind) -> Self {
        Self {
            value: kind.zero(),
            expected_kind: kind,
            source: ValueSource::Manual,
            last_updated: SystemTime::UNIX_EPOCH,
            display_value: None,
            override_status: None,
        }
    }
}

/// What a change event reports.
///
/// Status-only updates are distinguished so that listeners reacting to
/// remote *writes* (the override controller) are not re-triggered by the
/// status text those reactions produce.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeKind {
    /// The slot's value was written.
    Value,
    /// Only the override status text changed.
    OverrideStatus,
}

/// Snapshot delivered to change listeners.
#[derive(Clone, Debug)]
pub struct ChangeEvent {
    pub device: DeviceId,
    pub key: String,
    pub kind: ChangeKind,
    pub slot: PointSlot,
}

/// Change listener callback.
pub type ChangeListener = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

/// Handle returned by [`PointStore::subscribe`], used to unsubscribe.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubscriberId(u64);

struct DeviceSlots {
    slots: RwLock<HashMap<String, PointSlot>>,
}

/// The authoritative `(device, key) → slot` mapping.
pub struct PointStore {
    devices: RwLock<HashMap<DeviceId, Arc<DeviceSlots>>>,
    listeners: RwLock<Vec<(SubscriberId, ChangeListener)>>,
    next_subscriber: AtomicU64,
}

impl PointStore {
    pub fn new() -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
            listeners: RwLock::new(Vec::new()),
            next_subscriber: AtomicU64::new(1),
        }
    }

    /// Seed (or re-seed) a device's slots from its definitions.
    ///
    /// Every slot starts at the type-appropriate zero; any prior state for
    /// the device is discarded. Idempotent across restarts.
    pub fn initialize(&self, device: DeviceId, definitions: &[PointDefinition]) {
        let mut slots = HashMap::with_capacity(definitions.len());
        for def in definitions {
            slots.insert(def.key.clone(), PointSlot::zeroed(def.semantic.kind()));
        }
        self.devices.write().insert(
            device,
            Arc::new(DeviceSlots {
                slots: RwLock::new(slots),
            }),
        );
    }

    /// Write a value through the type guard.
    ///
    /// Returns `true` if the write was accepted. A kind mismatch is
    /// dropped silently (logged at debug) with no change event, except
    /// that a numeric value aimed at a bool slot is coerced by
    /// truthiness. `display` replaces the slot's display text; `None`
    /// clears it.
    pub fn set(
        &self,
        device: DeviceId,
        key: &str,
        value: Value,
        source: ValueSource,
        display: Option<String>,
    ) -> bool {
        let Some(space) = self.device_space(device) else {
            log::debug!("store: set on unknown device {device}, key {key:?} dropped");
            return false;
        };

        let mut slots = space.slots.write();
        let Some(slot) = slots.get_mut(key) else {
            log::debug!("store: set on unknown key {key:?} of {device} dropped");
            return false;
        };

        let accepted = match (slot.expected_kind, value) {
            (Kind::Bool, Value::Bool(b)) => Value::Bool(b),
            (Kind::Bool, Value::Numeric(n)) => Value::Bool(n != 0.0),
            (Kind::Numeric, Value::Numeric(n)) => Value::Numeric(n),
            (Kind::Numeric, Value::Bool(_)) => {
                log::debug!("store: type guard dropped bool write to numeric slot {key:?}");
                return false;
            }
        };

        slot.value = accepted;
        slot.source = source;
        slot.last_updated = SystemTime::now();
        slot.display_value = display;
        let event = ChangeEvent {
            device,
            key: key.to_string(),
            kind: ChangeKind::Value,
            slot: slot.clone(),
        };
        // Delivered under the slot lock: per-key event order is write
        // order.
        self.notify(&event);
        true
    }

    /// Snapshot read. A missing entry reads as a zero-initialized numeric
    /// slot.
    pub fn get(&self, device: DeviceId, key: &str) -> PointSlot {
        self.try_get(device, key)
            .unwrap_or_else(|| PointSlot::zeroed(Kind::Numeric))
    }

    /// Snapshot read that signals absence.
    pub fn try_get(&self, device: DeviceId, key: &str) -> Option<PointSlot> {
        let space = self.device_space(device)?;
        let slots = space.slots.read();
        slots.get(key).cloned()
    }

    /// Replace only the slot's override status text and notify.
    pub fn update_override_status(&self, device: DeviceId, key: &str, status: Option<String>) {
        let Some(space) = self.device_space(device) else {
            return;
        };
        let mut slots = space.slots.write();
        let Some(slot) = slots.get_mut(key) else {
            return;
        };
        slot.override_status = status;
        let event = ChangeEvent {
            device,
            key: key.to_string(),
            kind: ChangeKind::OverrideStatus,
            slot: slot.clone(),
        };
        self.notify(&event);
    }

    /// Drop the device's whole subspace.
    pub fn remove_device(&self, device: DeviceId) {
        self.devices.write().remove(&device);
    }

    /// All slots of a device, unordered. Empty for unknown devices.
    pub fn snapshot_device(&self, device: DeviceId) -> Vec<(String, PointSlot)> {
        match self.device_space(device) {
            Some(space) => {
                let slots = space.slots.read();
                slots.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
            }
            None => Vec::new(),
        }
    }

    /// Register a change listener. Delivery may happen from any thread.
    pub fn subscribe(&self, listener: ChangeListener) -> SubscriberId {
        let id = SubscriberId(self.next_subscriber.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, listener));
        id
    }

    /// Remove a previously registered listener.
    pub fn unsubscribe(&self, id: SubscriberId) {
        self.listeners.write().retain(|(lid, _)| *lid != id);
    }

    fn device_space(&self, device: DeviceId) -> Option<Arc<DeviceSlots>> {
        self.devices.read().get(&device).cloned()
    }

    fn notify(&self, event: &ChangeEvent) {
        // Snapshot the listener list so a listener may (un)subscribe
        // without deadlocking delivery.
        let listeners: Vec<ChangeListener> = {
            let guard = self.listeners.read();
            guard.iter().map(|(_, l)| l.clone()).collect()
        };
        for listener in listeners {
            listener(event);
        }
    }
}

impl Default for PointStore {
    fn default() -> Self {
        Self::new()
    }
}
