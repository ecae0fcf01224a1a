//! Device ownership and lifecycle.
//!
//! One [`DeviceManager`] owns every simulated device. Lifecycle
//! transitions of a device are serialized by that device's own mutex;
//! concurrent `start`/`stop`/`remove` calls queue behind it while other
//! devices proceed independently.
//!
//! # Events
//!
//! Hosts observe the manager through [`DeviceEvent`]s: `Updated` on every
//! state or configuration change, `Removed` on removal, and `Error` with
//! an actionable message on lifecycle faults. Events are delivered after
//! the device's mutex is released; listeners must not call back into the
//! manager synchronously from the delivering thread.

use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use thiserror::Error;

use modsim_modbus::address_map::AddressMap;
use modsim_modbus::engine::RequestHandler;
use modsim_modbus::server::SlaveListener;
use modsim_points::{
    ChangeEvent, ChangeKind, DeviceConfig, DeviceId, GeneratorConfig, GeneratorKind,
    PointDefinition, PointStore, SubscriberId, ValueSource,
};

use crate::generator::{self, GenRuntime};
use crate::overrides::{OverrideController, OverrideMsg};

/// How long `stop` waits for a device's workers before abandoning them.
const STOP_GRACE: Duration = Duration::from_secs(3);

/// Lifecycle state of a device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceState {
    Stopped,
    Starting,
    Running,
    Stopping,
    /// Start or runtime failure; `last_error` carries the reason. A new
    /// `start` attempt leaves this state.
    Faulted,
}

impl core::fmt::Display for DeviceState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let text = match self {
            DeviceState::Stopped => "Stopped",
            DeviceState::Starting => "Starting",
            DeviceState::Running => "Running",
            DeviceState::Stopping => "Stopping",
            DeviceState::Faulted => "Faulted",
        };
        f.write_str(text)
    }
}

/// Snapshot of a device handed to hosts.
#[derive(Clone, Debug)]
pub struct DeviceInfo {
    pub id: DeviceId,
    pub name: String,
    pub bind_ip: IpAddr,
    pub port: u16,
    pub state: DeviceState,
    pub last_error: Option<String>,
    /// Actual listening address while running (relevant with port 0).
    pub bound_addr: Option<SocketAddr>,
    pub point_count: usize,
}

/// Manager-level event stream.
#[derive(Clone, Debug)]
pub enum DeviceEvent {
    Updated(DeviceInfo),
    Removed(DeviceId),
    Error {
        device: Option<DeviceId>,
        title: String,
        message: String,
    },
}

/// Event listener callback.
pub type DeviceListener = Arc<dyn Fn(&DeviceEvent) + Send + Sync>;

/// Why a manager call failed.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("unknown device {0}")]
    Unknown(DeviceId),
    #[error("device id {0} is already registered")]
    Duplicate(DeviceId),
    #[error("device {0} must be stopped first")]
    NotStopped(DeviceId),
    #[error("device {device} has no point {key:?}")]
    UnknownPoint { device: DeviceId, key: String },
    #[error(transparent)]
    Config(#[from] modsim_modbus::MapError),
    #[error("{0}")]
    Lifecycle(String),
}

pub(crate) struct DeviceRuntime {
    pub(crate) name: String,
    pub(crate) bind_ip: IpAddr,
    pub(crate) port: u16,
    pub(crate) points: Vec<PointDefinition>,
    pub(crate) state: DeviceState,
    pub(crate) last_error: Option<String>,
    pub(crate) bound_addr: Option<SocketAddr>,
    cancel: Option<Arc<AtomicBool>>,
    listener: Option<SlaveListener>,
    gen_thread: Option<JoinHandle<()>>,
}

pub(crate) struct ManagedDevice {
    pub(crate) id: DeviceId,
    pub(crate) gen_state: Arc<GenRuntime>,
    pub(crate) lifecycle: Mutex<DeviceRuntime>,
}

pub(crate) struct ManagerShared {
    pub(crate) store: Arc<PointStore>,
    devices: spin::RwLock<HashMap<DeviceId, Arc<ManagedDevice>>>,
    listeners: spin::RwLock<Vec<(u64, DeviceListener)>>,
    next_listener: AtomicU64,
}

impl ManagerShared {
    pub(crate) fn device(&self, id: DeviceId) -> Option<Arc<ManagedDevice>> {
        self.devices.read().get(&id).cloned()
    }
}

/// Owner of all simulated devices.
pub struct DeviceManager {
    shared: Arc<ManagerShared>,
    overrides: OverrideController,
    store_sub: SubscriberId,
    shut_down: AtomicBool,
}

impl DeviceManager {
    pub fn new() -> Self {
        Self::with_store(Arc::new(PointStore::new()))
    }

    /// Build on an externally owned store (shared with a UI host).
    pub fn with_store(store: Arc<PointStore>) -> Self {
        let shared = Arc::new(ManagerShared {
            store: store.clone(),
            devices: spin::RwLock::new(HashMap::new()),
            listeners: spin::RwLock::new(Vec::new()),
            next_listener: AtomicU64::new(1),
        });
        let overrides = OverrideController::spawn(Arc::downgrade(&shared), store.clone());

        // Remote writes feed the override controller through a channel so
        // the reaction never runs on the store's notifying path.
        let tx: Sender<OverrideMsg> = overrides.sender();
        let store_sub = store.subscribe(Arc::new(move |ev: &ChangeEvent| {
            if ev.kind == ChangeKind::Value && ev.slot.source == ValueSource::RemoteWrite {
                let _ = tx.send(OverrideMsg::RemoteWrite {
                    device: ev.device,
                    key: ev.key.clone(),
                });
            }
        }));

        Self {
            shared,
            overrides,
            store_sub,
            shut_down: AtomicBool::new(false),
        }
    }

    /// The store this manager writes through.
    pub fn store(&self) -> &Arc<PointStore> {
        &self.shared.store
    }

    /// Register a new device and seed its store subspace. The device
    /// starts `Stopped`.
    pub fn add_device(&self, config: DeviceConfig) -> Result<DeviceId, DeviceError> {
        let id = match config.id {
            Some(id) => {
                DeviceId::reserve(id);
                id
            }
            None => DeviceId::alloc(),
        };

        let device = Arc::new(ManagedDevice {
            id,
            gen_state: Arc::new(GenRuntime::new()),
            lifecycle: Mutex::new(DeviceRuntime {
                name: config.name,
                bind_ip: config.bind_ip,
                port: config.port,
                points: config.points,
                state: DeviceState::Stopped,
                last_error: None,
                bound_addr: None,
                cancel: None,
                listener: None,
                gen_thread: None,
            }),
        });

        {
            let mut devices = self.shared.devices.write();
            if devices.contains_key(&id) {
                return Err(DeviceError::Duplicate(id));
            }
            devices.insert(id, device.clone());
        }

        let info = {
            let rt = device.lifecycle.lock().unwrap();
            self.shared.store.initialize(id, &rt.points);
            runtime_info(id, &rt)
        };
        self.emit(&DeviceEvent::Updated(info));
        log::info!("{id}: registered device");
        Ok(id)
    }

    /// Stop (if needed) and forget a device, dropping its store subspace.
    pub fn remove_device(&self, id: DeviceId) -> Result<(), DeviceError> {
        let device = self.device(id)?;
        let mut events = Vec::new();
        self.stop_locked(&device, &mut events);
        self.shared.devices.write().remove(&id);
        self.shared.store.remove_device(id);
        events.push(DeviceEvent::Removed(id));
        self.emit_all(events);
        log::info!("{id}: removed device");
        Ok(())
    }

    /// Bring a device to `Running`. A no-op when already running.
    pub fn start(&self, id: DeviceId) -> Result<(), DeviceError> {
        let device = self.device(id)?;
        let mut events = Vec::new();
        let result = self.start_locked(&device, &mut events);
        self.emit_all(events);
        result
    }

    /// Bring a device to `Stopped`, waiting out the grace period.
    pub fn stop(&self, id: DeviceId) -> Result<(), DeviceError> {
        let device = self.device(id)?;
        let mut events = Vec::new();
        self.stop_locked(&device, &mut events);
        self.emit_all(events);
        Ok(())
    }

    /// Snapshots of all devices, ordered by id.
    pub fn list(&self) -> Vec<DeviceInfo> {
        let mut infos: Vec<DeviceInfo> = {
            let devices = self.shared.devices.read();
            devices.values().cloned().collect::<Vec<_>>()
        }
        .into_iter()
        .map(|d| {
            let rt = d.lifecycle.lock().unwrap();
            runtime_info(d.id, &rt)
        })
        .collect();
        infos.sort_by_key(|i| i.id);
        infos
    }

    /// Snapshot of one device.
    pub fn info(&self, id: DeviceId) -> Result<DeviceInfo, DeviceError> {
        let device = self.device(id)?;
        let rt = device.lifecycle.lock().unwrap();
        Ok(runtime_info(id, &rt))
    }

    /// Replace a stopped device's point definitions.
    pub fn set_points(
        &self,
        id: DeviceId,
        points: Vec<PointDefinition>,
    ) -> Result<(), DeviceError> {
        let device = self.device(id)?;
        let info = {
            let mut rt = device.lifecycle.lock().unwrap();
            if !matches!(rt.state, DeviceState::Stopped | DeviceState::Faulted) {
                return Err(DeviceError::NotStopped(id));
            }
            rt.points = points;
            self.shared.store.initialize(id, &rt.points);
            runtime_info(id, &rt)
        };
        self.overrides.cancel_device(id);
        self.emit(&DeviceEvent::Updated(info));
        Ok(())
    }

    /// Change one stopped point's generator configuration. Any recorded
    /// hold on the point is cancelled.
    pub fn set_generator(
        &self,
        id: DeviceId,
        key: &str,
        config: GeneratorConfig,
    ) -> Result<(), DeviceError> {
        let device = self.device(id)?;
        let info = {
            let mut rt = device.lifecycle.lock().unwrap();
            if !matches!(rt.state, DeviceState::Stopped | DeviceState::Faulted) {
                return Err(DeviceError::NotStopped(id));
            }
            let def = rt
                .points
                .iter_mut()
                .find(|d| d.key == key)
                .ok_or_else(|| DeviceError::UnknownPoint {
                    device: id,
                    key: key.to_string(),
                })?;
            def.generator = config;
            runtime_info(id, &rt)
        };
        self.overrides.cancel_point(id, key);
        self.emit(&DeviceEvent::Updated(info));
        Ok(())
    }

    /// Effective generator type of a point: the runtime state while the
    /// device runs, the configured type otherwise.
    pub fn generator_kind(&self, id: DeviceId, key: &str) -> Option<GeneratorKind> {
        let device = self.shared.device(id)?;
        if let Some(kind) = device.gen_state.current(key) {
            return Some(kind);
        }
        let rt = device.lifecycle.lock().unwrap();
        rt.points
            .iter()
            .find(|d| d.key == key)
            .map(|d| d.generator.kind)
    }

    /// Register an event listener.
    pub fn subscribe_events(&self, listener: DeviceListener) -> u64 {
        let id = self.shared.next_listener.fetch_add(1, Ordering::Relaxed);
        self.shared.listeners.write().push((id, listener));
        id
    }

    /// Remove an event listener.
    pub fn unsubscribe_events(&self, id: u64) {
        self.shared.listeners.write().retain(|(lid, _)| *lid != id);
    }

    /// Stop every device and the override worker. Idempotent; also runs
    /// on drop.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let ids: Vec<DeviceId> = self.shared.devices.read().keys().copied().collect();
        for id in ids {
            let _ = self.stop(id);
        }
        self.overrides.shutdown();
        self.shared.store.unsubscribe(self.store_sub);
    }

    fn device(&self, id: DeviceId) -> Result<Arc<ManagedDevice>, DeviceError> {
        self.shared.device(id).ok_or(DeviceError::Unknown(id))
    }

    fn start_locked(
        &self,
        device: &Arc<ManagedDevice>,
        events: &mut Vec<DeviceEvent>,
    ) -> Result<(), DeviceError> {
        let id = device.id;
        let mut rt = device.lifecycle.lock().unwrap();
        match rt.state {
            DeviceState::Running | DeviceState::Starting => return Ok(()),
            DeviceState::Stopping => {
                return Err(DeviceError::Lifecycle(format!("{id} is still stopping")));
            }
            DeviceState::Stopped | DeviceState::Faulted => {}
        }

        // Definitions validate by building the wire map.
        let map = match AddressMap::build(&rt.points) {
            Ok(map) => Arc::new(map),
            Err(e) => {
                let message = e.to_string();
                fault(id, &mut rt, events, "Invalid point configuration", &message);
                return Err(e.into());
            }
        };

        self.shared.store.initialize(id, &rt.points);
        rt.state = DeviceState::Starting;
        rt.last_error = None;
        events.push(DeviceEvent::Updated(runtime_info(id, &rt)));

        let cancel = Arc::new(AtomicBool::new(false));
        let handler = Arc::new(RequestHandler::new(map, self.shared.store.clone(), id));
        let bind = SocketAddr::new(rt.bind_ip, rt.port);
        let listener = match SlaveListener::spawn(bind, handler, cancel.clone()) {
            Ok(listener) => listener,
            Err(e) => {
                let message = bind_error_message(rt.port, &e);
                fault(id, &mut rt, events, "Could not start listener", &message);
                return Err(DeviceError::Lifecycle(message));
            }
        };
        rt.bound_addr = Some(listener.local_addr());

        device.gen_state.reset(&rt.points);
        let gen_thread = thread::Builder::new()
            .name(format!("modsim-gen-{}", id.0))
            .spawn({
                let store = self.shared.store.clone();
                let definitions = Arc::new(rt.points.clone());
                let runtime = device.gen_state.clone();
                let cancel = cancel.clone();
                move || generator::run_loop(store, id, definitions, runtime, cancel)
            });
        let gen_thread = match gen_thread {
            Ok(handle) => handle,
            Err(e) => {
                cancel.store(true, Ordering::Relaxed);
                listener.join(STOP_GRACE);
                let message = format!("Could not spawn the generator loop: {e}");
                fault(id, &mut rt, events, "Could not start device", &message);
                return Err(DeviceError::Lifecycle(message));
            }
        };

        rt.cancel = Some(cancel);
        rt.listener = Some(listener);
        rt.gen_thread = Some(gen_thread);
        rt.state = DeviceState::Running;
        events.push(DeviceEvent::Updated(runtime_info(id, &rt)));
        log::info!("{id}: running on {}", rt.bound_addr.unwrap_or(bind));
        Ok(())
    }

    fn stop_locked(&self, device: &Arc<ManagedDevice>, events: &mut Vec<DeviceEvent>) {
        let id = device.id;
        let mut rt = device.lifecycle.lock().unwrap();
        match rt.state {
            DeviceState::Stopped => return,
            DeviceState::Faulted => {
                // Nothing is running; just leave the fault cycle.
                rt.state = DeviceState::Stopped;
                events.push(DeviceEvent::Updated(runtime_info(id, &rt)));
                return;
            }
            _ => {}
        }

        rt.state = DeviceState::Stopping;
        events.push(DeviceEvent::Updated(runtime_info(id, &rt)));

        if let Some(cancel) = rt.cancel.take() {
            cancel.store(true, Ordering::Relaxed);
        }
        self.overrides.cancel_device(id);

        let deadline = Instant::now() + STOP_GRACE;
        if let Some(listener) = rt.listener.take() {
            if !listener.join(deadline.saturating_duration_since(Instant::now())) {
                log::warn!("{id}: listener did not stop in time; abandoning it");
            }
        }
        if let Some(handle) = rt.gen_thread.take() {
            if !join_with_grace(handle, deadline.saturating_duration_since(Instant::now())) {
                log::warn!("{id}: generator loop did not stop in time; abandoning it");
            }
        }

        rt.bound_addr = None;
        rt.state = DeviceState::Stopped;
        events.push(DeviceEvent::Updated(runtime_info(id, &rt)));
        log::info!("{id}: stopped");
    }

    fn emit(&self, event: &DeviceEvent) {
        let listeners: Vec<DeviceListener> = {
            let guard = self.shared.listeners.read();
            guard.iter().map(|(_, l)| l.clone()).collect()
        };
        for listener in listeners {
            listener(event);
        }
    }

    fn emit_all(&self, events: Vec<DeviceEvent>) {
        for event in &events {
            self.emit(event);
        }
    }
}

impl Default for DeviceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DeviceManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn runtime_info(id: DeviceId, rt: &DeviceRuntime) -> DeviceInfo {
    DeviceInfo {
        id,
        name: rt.name.clone(),
        bind_ip: rt.bind_ip,
        port: rt.port,
        state: rt.state,
        last_error: rt.last_error.clone(),
        bound_addr: rt.bound_addr,
        point_count: rt.points.len(),
    }
}

fn fault(
    id: DeviceId,
    rt: &mut DeviceRuntime,
    events: &mut Vec<DeviceEvent>,
    title: &str,
    message: &str,
) {
    rt.state = DeviceState::Faulted;
    rt.last_error = Some(message.to_string());
    rt.bound_addr = None;
    events.push(DeviceEvent::Updated(runtime_info(id, rt)));
    events.push(DeviceEvent::Error {
        device: Some(id),
        title: title.to_string(),
        message: message.to_string(),
    });
    log::error!("{id}: {title}: {message}");
}

fn bind_error_message(port: u16, e: &io::Error) -> String {
    match e.kind() {
        io::ErrorKind::AddrInUse => {
            format!("Port {port} is already in use by another listener")
        }
        io::ErrorKind::PermissionDenied => format!(
            "Port {port} requires elevated privileges; try {}",
            u32::from(port) + 1000
        ),
        _ => format!("Failed to bind port {port}: {e}"),
    }
}

fn join_with_grace(handle: JoinHandle<()>, grace: Duration) -> bool {
    let deadline = Instant::now() + grace;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(10));
    }
    handle.join().is_ok()
}
