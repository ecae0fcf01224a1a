//! External-write override controller.
//!
//! Remote writes surface as store change events; the manager forwards the
//! `RemoteWrite` ones into this controller's channel, and a single worker
//! thread applies the point's override policy. Active holds each get a
//! countdown worker with an opaque cancellation handle; holds are
//! cancelled when their device stops, when a new hold starts on the same
//! point, or when the point's configuration changes.
//!
//! The worker never runs on the store's notifying path, so it is free to
//! write override status back through the store.

use std::collections::HashMap;
use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use modsim_points::{DeviceId, GeneratorKind, OverrideMode, PointStore};

use crate::generator::GenRuntime;
use crate::manager::{DeviceState, ManagerShared};

pub(crate) enum OverrideMsg {
    /// A `RemoteWrite` landed on `key` of `device`.
    RemoteWrite { device: DeviceId, key: String },
    /// Cancel every hold of a device (device stopping or removed).
    CancelDevice(DeviceId),
    /// Cancel the hold of one point (its configuration changed).
    CancelPoint { device: DeviceId, key: String },
    Shutdown,
}

/// Cancellable one-second wait, shared between the controller and a
/// countdown worker.
struct HoldCancel {
    cancelled: Mutex<bool>,
    cv: Condvar,
}

impl HoldCancel {
    fn new() -> Self {
        Self {
            cancelled: Mutex::new(false),
            cv: Condvar::new(),
        }
    }

    fn cancel(&self) {
        *self.cancelled.lock().unwrap() = true;
        self.cv.notify_all();
    }

    /// Wait up to `dur`; returns `true` if cancelled.
    fn wait_cancelled_for(&self, dur: Duration) -> bool {
        let guard = self.cancelled.lock().unwrap();
        let (guard, _timeout) = self
            .cv
            .wait_timeout_while(guard, dur, |cancelled| !*cancelled)
            .unwrap();
        *guard
    }
}

struct HoldHandle {
    cancel: Arc<HoldCancel>,
    // Countdown threads are detached; they exit within one wait interval
    // of cancellation.
    _thread: JoinHandle<()>,
}

pub(crate) struct OverrideController {
    tx: Sender<OverrideMsg>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl OverrideController {
    pub(crate) fn spawn(shared: Weak<ManagerShared>, store: Arc<PointStore>) -> Self {
        let (tx, rx) = channel();
        let worker = thread::Builder::new()
            .name("modsim-override".to_string())
            .spawn(move || worker_loop(rx, shared, store))
            .expect("spawning the override worker cannot fail at startup");
        Self {
            tx,
            worker: Mutex::new(Some(worker)),
        }
    }

    pub(crate) fn sender(&self) -> Sender<OverrideMsg> {
        self.tx.clone()
    }

    pub(crate) fn cancel_device(&self, device: DeviceId) {
        let _ = self.tx.send(OverrideMsg::CancelDevice(device));
    }

    pub(crate) fn cancel_point(&self, device: DeviceId, key: &str) {
        let _ = self.tx.send(OverrideMsg::CancelPoint {
            device,
            key: key.to_string(),
        });
    }

    pub(crate) fn shutdown(&self) {
        let _ = self.tx.send(OverrideMsg::Shutdown);
        if let Some(worker) = self.worker.lock().unwrap().take() {
            let _ = worker.join();
        }
    }
}

fn worker_loop(rx: Receiver<OverrideMsg>, shared: Weak<ManagerShared>, store: Arc<PointStore>) {
    let mut holds: HashMap<(DeviceId, String), HoldHandle> = HashMap::new();

    while let Ok(msg) = rx.recv() {
        match msg {
            OverrideMsg::RemoteWrite { device, key } => {
                let Some(shared) = shared.upgrade() else { break };
                handle_remote_write(&shared, &store, &mut holds, device, key);
            }
            OverrideMsg::CancelDevice(device) => {
                let keys: Vec<_> = holds
                    .keys()
                    .filter(|(d, _)| *d == device)
                    .cloned()
                    .collect();
                for entry in keys {
                    if let Some(hold) = holds.remove(&entry) {
                        hold.cancel.cancel();
                    }
                    store.update_override_status(entry.0, &entry.1, None);
                }
            }
            OverrideMsg::CancelPoint { device, key } => {
                if let Some(hold) = holds.remove(&(device, key.clone())) {
                    hold.cancel.cancel();
                    store.update_override_status(device, &key, None);
                }
            }
            OverrideMsg::Shutdown => break,
        }
    }

    for (_, hold) in holds.drain() {
        hold.cancel.cancel();
    }
}

fn handle_remote_write(
    shared: &Arc<ManagerShared>,
    store: &Arc<PointStore>,
    holds: &mut HashMap<(DeviceId, String), HoldHandle>,
    device_id: DeviceId,
    key: String,
) {
    let Some(device) = shared.device(device_id) else {
        return;
    };

    let (mode, duration) = {
        let rt = device.lifecycle.lock().unwrap();
        if rt.state != DeviceState::Running {
            return;
        }
        let Some(def) = rt.points.iter().find(|d| d.key == key) else {
            return;
        };
        (def.override_mode, def.hold_duration())
    };

    match mode {
        OverrideMode::None => {}
        OverrideMode::ForceStatic => {
            if let Some(hold) = holds.remove(&(device_id, key.clone())) {
                hold.cancel.cancel();
            }
            device.gen_state.force_static(&key);
            // The flip is permanent: it survives the next start.
            {
                let mut rt = device.lifecycle.lock().unwrap();
                if let Some(def) = rt.points.iter_mut().find(|d| d.key == key) {
                    def.generator.kind = GeneratorKind::Static;
                }
            }
            store.update_override_status(device_id, &key, None);
            log::debug!("{device_id}: {key} forced static by remote write");
        }
        OverrideMode::HoldForSeconds => {
            if let Some(hold) = holds.remove(&(device_id, key.clone())) {
                hold.cancel.cancel();
            }
            device.gen_state.begin_hold(&key);

            let cancel = Arc::new(HoldCancel::new());
            let thread = {
                let store = store.clone();
                let gen_runtime = device.gen_state.clone();
                let cancel = cancel.clone();
                let key = key.clone();
                thread::Builder::new()
                    .name(format!("modsim-hold-{device_id}"))
                    .spawn(move || {
                        hold_countdown(store, gen_runtime, device_id, key, duration, cancel)
                    })
            };
            match thread {
                Ok(thread) => {
                    holds.insert(
                        (device_id, key),
                        HoldHandle {
                            cancel,
                            _thread: thread,
                        },
                    );
                }
                Err(e) => {
                    log::error!("{device_id}: could not spawn hold timer for {key}: {e}");
                    // Leave the point static rather than half-held.
                }
            }
        }
    }
}

fn hold_countdown(
    store: Arc<PointStore>,
    gen_runtime: Arc<GenRuntime>,
    device: DeviceId,
    key: String,
    seconds: u64,
    cancel: Arc<HoldCancel>,
) {
    for remaining in (1..=seconds).rev() {
        store.update_override_status(device, &key, Some(format!("Override ({remaining}s)")));
        if cancel.wait_cancelled_for(Duration::from_secs(1)) {
            return;
        }
    }
    if gen_runtime.end_hold(&key) {
        log::debug!("{device}: {key} restored after hold");
    }
    store.update_override_status(device, &key, None);
}
