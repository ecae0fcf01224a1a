//! Stable device identifiers.

use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Process-stable identifier for a simulated device.
///
/// Ids are handed out by a monotonically increasing counter and are never
/// reused within a process. Hosts that load device templates may pin
/// explicit ids (see [`DeviceId::reserve`]) so their references stay stable
/// across reloads.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub u64);

static NEXT_DEVICE_ID: AtomicU64 = AtomicU64::new(1);

impl DeviceId {
    /// Allocate a fresh, never-before-seen id.
    pub fn alloc() -> Self {
        Self(NEXT_DEVICE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Make sure the allocator never hands out `id` (or anything below it)
    /// again. Called when a host pins explicit ids from a template.
    pub fn reserve(id: DeviceId) {
        NEXT_DEVICE_ID.fetch_max(id.0 + 1, Ordering::Relaxed);
    }
}

impl fmt::Debug for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dev{}", self.0)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dev{}", self.0)
    }
}
