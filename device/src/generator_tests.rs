//! Waveform math and generator runtime tests.

use rand::SeedableRng;
use rand::rngs::SmallRng;

use modsim_points::{
    AccessMode, GeneratorConfig, GeneratorKind, ModbusMapping, OverrideMode, PointDefinition,
    Region, SemanticType,
};

use crate::generator::{GenRuntime, display_for, waveform};

fn cfg(kind: GeneratorKind, min: f64, max: f64, period: f64) -> GeneratorConfig {
    GeneratorConfig {
        kind,
        min,
        max,
        period_seconds: period,
        step: 1.0,
    }
}

fn rng() -> SmallRng {
    SmallRng::seed_from_u64(0x5EED)
}

#[test]
fn ramp_is_linear_over_its_period() {
    let c = cfg(GeneratorKind::Ramp, 10.0, 110.0, 20.0);
    let mut r = rng();
    assert_eq!(waveform(GeneratorKind::Ramp, &c, 0.0, &mut r), 10.0);
    assert_eq!(waveform(GeneratorKind::Ramp, &c, 5.0, &mut r), 35.0);
    assert_eq!(waveform(GeneratorKind::Ramp, &c, 15.0, &mut r), 85.0);
    // Wraps at the period boundary.
    assert_eq!(waveform(GeneratorKind::Ramp, &c, 25.0, &mut r), 35.0);
}

#[test]
fn sine_hits_midpoint_and_extremes() {
    let c = cfg(GeneratorKind::Sine, 0.0, 10.0, 8.0);
    let mut r = rng();
    let at = |t: f64, r: &mut SmallRng| waveform(GeneratorKind::Sine, &c, t, r);
    assert!((at(0.0, &mut r) - 5.0).abs() < 1e-9);
    assert!((at(2.0, &mut r) - 10.0).abs() < 1e-9); // quarter period
    assert!((at(6.0, &mut r) - 0.0).abs() < 1e-9); // three quarters
}

#[test]
fn random_stays_within_bounds() {
    let c = cfg(GeneratorKind::Random, -5.0, 5.0, 1.0);
    let mut r = rng();
    for i in 0..1000 {
        let v = waveform(GeneratorKind::Random, &c, i as f64, &mut r);
        assert!((-5.0..5.0).contains(&v), "sample {i} out of range: {v}");
    }
}

#[test]
fn degenerate_periods_do_not_divide_by_zero() {
    let mut r = rng();
    let ramp = cfg(GeneratorKind::Ramp, 1.0, 2.0, 0.0);
    assert_eq!(waveform(GeneratorKind::Ramp, &ramp, 3.0, &mut r), 1.0);
    let sine = cfg(GeneratorKind::Sine, 0.0, 4.0, 0.0);
    assert_eq!(waveform(GeneratorKind::Sine, &sine, 3.0, &mut r), 2.0);
}

fn def_with(display: &[(i64, &str)], semantic: SemanticType) -> PointDefinition {
    PointDefinition {
        key: "p".to_string(),
        semantic,
        access: AccessMode::READ_WRITE,
        modbus: ModbusMapping {
            region: Region::HoldingRegister,
            address: 0,
            scale: 1.0,
            bit_field: None,
        },
        generator: GeneratorConfig::default(),
        override_mode: OverrideMode::None,
        override_duration_seconds: 0,
        display_map: display
            .iter()
            .map(|(k, v)| (*k, v.to_string()))
            .collect(),
    }
}

#[test]
fn display_prefers_enum_labels_over_numeric_format() {
    let plain = def_with(&[], SemanticType::Float);
    assert_eq!(display_for(&plain, 12.345).as_deref(), Some("12.35"));

    let labeled = def_with(&[(0, "Off"), (1, "On"), (2, "Tripped")], SemanticType::Uint16);
    assert_eq!(display_for(&labeled, 1.2).as_deref(), Some("On"));
    assert_eq!(display_for(&labeled, 2.0).as_deref(), Some("Tripped"));
    // Out-of-map values fall back to the numeric form.
    assert_eq!(display_for(&labeled, 7.0).as_deref(), Some("7.00"));

    let flag = def_with(&[], SemanticType::Bool);
    assert_eq!(display_for(&flag, 1.0), None);
}

#[test]
fn hold_records_original_once_and_restores_once() {
    let runtime = GenRuntime::new();
    let mut def = def_with(&[], SemanticType::Float);
    def.generator.kind = GeneratorKind::Sine;
    runtime.reset(std::slice::from_ref(&def));
    assert_eq!(runtime.current("p"), Some(GeneratorKind::Sine));

    runtime.begin_hold("p");
    assert_eq!(runtime.current("p"), Some(GeneratorKind::Static));

    // A back-to-back hold must not overwrite the recorded original.
    runtime.begin_hold("p");
    assert!(runtime.end_hold("p"));
    assert_eq!(runtime.current("p"), Some(GeneratorKind::Sine));

    // A second expiry has nothing left to restore.
    assert!(!runtime.end_hold("p"));
}

#[test]
fn force_static_discards_the_recorded_original() {
    let runtime = GenRuntime::new();
    let mut def = def_with(&[], SemanticType::Float);
    def.generator.kind = GeneratorKind::Ramp;
    runtime.reset(std::slice::from_ref(&def));

    runtime.begin_hold("p");
    runtime.force_static("p");
    assert!(!runtime.end_hold("p"));
    assert_eq!(runtime.current("p"), Some(GeneratorKind::Static));
}

#[test]
fn reset_rebuilds_runtime_from_definitions() {
    let runtime = GenRuntime::new();
    let mut a = def_with(&[], SemanticType::Float);
    a.key = "a".into();
    a.generator.kind = GeneratorKind::Random;
    runtime.reset(std::slice::from_ref(&a));
    runtime.force_static("a");

    runtime.reset(std::slice::from_ref(&a));
    assert_eq!(runtime.current("a"), Some(GeneratorKind::Random));
    assert_eq!(runtime.current("gone"), None);
}
