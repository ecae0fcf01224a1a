//! Device manager lifecycle tests (no wire traffic; see `e2e_tests` for
//! socket-level scenarios).

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use modsim_points::{
    AccessMode, DeviceConfig, DeviceId, GeneratorConfig, GeneratorKind, ModbusMapping,
    OverrideMode, PointDefinition, Region, SemanticType,
};

use crate::manager::{DeviceError, DeviceEvent, DeviceManager, DeviceState};

fn point(key: &str, region: Region, address: u16) -> PointDefinition {
    PointDefinition {
        key: key.to_string(),
        semantic: SemanticType::Uint16,
        access: AccessMode::READ_WRITE,
        modbus: ModbusMapping {
            region,
            address,
            scale: 1.0,
            bit_field: None,
        },
        generator: GeneratorConfig::default(),
        override_mode: OverrideMode::None,
        override_duration_seconds: 0,
        display_map: Default::default(),
    }
}

fn loopback_device(name: &str, points: Vec<PointDefinition>) -> DeviceConfig {
    DeviceConfig {
        id: None,
        name: name.to_string(),
        bind_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
        port: 0, // ephemeral
        points,
    }
}

#[test]
fn add_list_and_info() {
    let manager = DeviceManager::new();
    let id = manager
        .add_device(loopback_device("pump", vec![point("speed", Region::HoldingRegister, 0)]))
        .unwrap();

    let infos = manager.list();
    assert_eq!(infos.len(), 1);
    assert_eq!(infos[0].id, id);
    assert_eq!(infos[0].name, "pump");
    assert_eq!(infos[0].state, DeviceState::Stopped);
    assert_eq!(infos[0].point_count, 1);

    // The store subspace is seeded on registration.
    assert!(manager.store().try_get(id, "speed").is_some());
    manager.shutdown();
}

#[test]
fn pinned_ids_are_kept_and_duplicates_rejected() {
    let manager = DeviceManager::new();
    let pinned = DeviceId(90_001);
    let mut cfg = loopback_device("a", vec![]);
    cfg.id = Some(pinned);
    assert_eq!(manager.add_device(cfg.clone()).unwrap(), pinned);
    assert!(matches!(
        manager.add_device(cfg).unwrap_err(),
        DeviceError::Duplicate(_)
    ));
    manager.shutdown();
}

#[test]
fn start_stop_cycle_emits_lifecycle_events() {
    let manager = DeviceManager::new();
    let id = manager
        .add_device(loopback_device("d", vec![point("x", Region::HoldingRegister, 0)]))
        .unwrap();

    let states = Arc::new(spin::Mutex::new(Vec::new()));
    let sink = states.clone();
    manager.subscribe_events(Arc::new(move |ev: &DeviceEvent| {
        if let DeviceEvent::Updated(info) = ev {
            sink.lock().push(info.state);
        }
    }));

    manager.start(id).unwrap();
    assert_eq!(manager.info(id).unwrap().state, DeviceState::Running);
    assert!(manager.info(id).unwrap().bound_addr.is_some());

    // Starting again is a no-op.
    manager.start(id).unwrap();

    manager.stop(id).unwrap();
    assert_eq!(manager.info(id).unwrap().state, DeviceState::Stopped);
    assert!(manager.info(id).unwrap().bound_addr.is_none());

    let seen = states.lock().clone();
    assert_eq!(
        seen,
        vec![
            DeviceState::Starting,
            DeviceState::Running,
            DeviceState::Stopping,
            DeviceState::Stopped,
        ]
    );
    manager.shutdown();
}

#[test]
fn invalid_configuration_faults_the_device() {
    let manager = DeviceManager::new();
    let id = manager
        .add_device(loopback_device(
            "broken",
            vec![
                point("a", Region::HoldingRegister, 5),
                point("a", Region::HoldingRegister, 6), // duplicate key
            ],
        ))
        .unwrap();

    let errors = Arc::new(spin::Mutex::new(Vec::new()));
    let sink = errors.clone();
    manager.subscribe_events(Arc::new(move |ev: &DeviceEvent| {
        if let DeviceEvent::Error { message, .. } = ev {
            sink.lock().push(message.clone());
        }
    }));

    assert!(matches!(
        manager.start(id).unwrap_err(),
        DeviceError::Config(_)
    ));
    let info = manager.info(id).unwrap();
    assert_eq!(info.state, DeviceState::Faulted);
    assert!(info.last_error.unwrap().contains("duplicate point key"));
    assert_eq!(errors.lock().len(), 1);

    // A faulted device can be stopped back to Stopped and edited.
    manager.stop(id).unwrap();
    assert_eq!(manager.info(id).unwrap().state, DeviceState::Stopped);
    manager.shutdown();
}

#[test]
fn port_collision_faults_the_second_device() {
    let manager = DeviceManager::new();
    let first = manager
        .add_device(loopback_device("first", vec![point("x", Region::HoldingRegister, 0)]))
        .unwrap();
    manager.start(first).unwrap();
    let taken = manager.info(first).unwrap().bound_addr.unwrap().port();

    let mut cfg = loopback_device("second", vec![point("y", Region::HoldingRegister, 0)]);
    cfg.port = taken;
    let second = manager.add_device(cfg).unwrap();

    assert!(matches!(
        manager.start(second).unwrap_err(),
        DeviceError::Lifecycle(_)
    ));
    let info = manager.info(second).unwrap();
    assert_eq!(info.state, DeviceState::Faulted);
    assert!(info.last_error.unwrap().contains("already in use"));
    manager.shutdown();
}

#[test]
fn definition_mutation_requires_a_stopped_device() {
    let manager = DeviceManager::new();
    let id = manager
        .add_device(loopback_device("d", vec![point("x", Region::HoldingRegister, 0)]))
        .unwrap();
    manager.start(id).unwrap();

    assert!(matches!(
        manager.set_points(id, vec![]).unwrap_err(),
        DeviceError::NotStopped(_)
    ));
    assert!(matches!(
        manager
            .set_generator(id, "x", GeneratorConfig::default())
            .unwrap_err(),
        DeviceError::NotStopped(_)
    ));

    manager.stop(id).unwrap();
    manager.set_points(id, vec![point("y", Region::InputRegister, 3)]).unwrap();
    assert!(manager.store().try_get(id, "x").is_none());
    assert!(manager.store().try_get(id, "y").is_some());

    let mut ramp = GeneratorConfig::default();
    ramp.kind = GeneratorKind::Ramp;
    manager.set_generator(id, "y", ramp).unwrap();
    assert_eq!(manager.generator_kind(id, "y"), Some(GeneratorKind::Ramp));
    assert!(matches!(
        manager
            .set_generator(id, "missing", GeneratorConfig::default())
            .unwrap_err(),
        DeviceError::UnknownPoint { .. }
    ));
    manager.shutdown();
}

#[test]
fn remove_stops_and_forgets() {
    let manager = DeviceManager::new();
    let id = manager
        .add_device(loopback_device("d", vec![point("x", Region::HoldingRegister, 0)]))
        .unwrap();
    manager.start(id).unwrap();

    let removed = Arc::new(spin::Mutex::new(Vec::new()));
    let sink = removed.clone();
    manager.subscribe_events(Arc::new(move |ev: &DeviceEvent| {
        if let DeviceEvent::Removed(id) = ev {
            sink.lock().push(*id);
        }
    }));

    manager.remove_device(id).unwrap();
    assert!(manager.info(id).is_err());
    assert!(manager.store().try_get(id, "x").is_none());
    assert_eq!(removed.lock().as_slice(), &[id]);

    assert!(matches!(
        manager.start(id).unwrap_err(),
        DeviceError::Unknown(_)
    ));
    manager.shutdown();
}

#[test]
fn unknown_device_operations_fail_cleanly() {
    let manager = DeviceManager::new();
    let ghost = DeviceId(777_777);
    assert!(matches!(manager.start(ghost).unwrap_err(), DeviceError::Unknown(_)));
    assert!(matches!(manager.stop(ghost).unwrap_err(), DeviceError::Unknown(_)));
    assert!(manager.info(ghost).is_err());
    manager.shutdown();
}
