//! Host binary: loads a device template, starts every device, and logs
//! store and lifecycle events until the process is killed.

use std::fs;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use getopts::Options;
use log::LevelFilter;

use modsim_device::{DeviceEvent, DeviceManager};
use modsim_points::{
    ChangeEvent, DeviceConfig, GeneratorConfig, GeneratorKind, ModbusMapping, OverrideMode,
    PointDefinition, Region, SemanticType,
};

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let mut opts = Options::new();
    opts.optopt("c", "config", "device template file (JSON)", "FILE");
    opts.optflagmulti("v", "verbose", "increase log verbosity (repeatable)");
    opts.optflag("", "sample", "print a sample device template and exit");
    opts.optflag("h", "help", "print this help");

    let matches = match opts.parse(&args[1..]) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("{e}");
            eprintln!("{}", opts.short_usage(&args[0]));
            return ExitCode::FAILURE;
        }
    };

    if matches.opt_present("h") {
        print!("{}", opts.usage(&format!("Usage: {} -c devices.json [-v]", args[0])));
        return ExitCode::SUCCESS;
    }
    if matches.opt_present("sample") {
        println!("{}", sample_template());
        return ExitCode::SUCCESS;
    }

    let level = match matches.opt_count("v") {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new().filter_level(level).init();

    match run(matches.opt_str("c")) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(config_path: Option<String>) -> Result<()> {
    let path = config_path.context("no device template given; use -c FILE (or --sample)")?;
    let raw = fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
    let configs: Vec<DeviceConfig> =
        serde_json::from_str(&raw).with_context(|| format!("parsing {path}"))?;

    let manager = DeviceManager::new();
    manager.subscribe_events(Arc::new(|event: &DeviceEvent| match event {
        DeviceEvent::Updated(info) => {
            log::info!("{}: {} [{}]", info.id, info.name, info.state);
        }
        DeviceEvent::Removed(id) => log::info!("{id}: removed"),
        DeviceEvent::Error { title, message, .. } => log::error!("{title}: {message}"),
    }));
    manager.store().subscribe(Arc::new(|event: &ChangeEvent| {
        log::debug!(
            "{}/{} = {}{} ({:?})",
            event.device,
            event.key,
            event.slot.value,
            event
                .slot
                .display_value
                .as_deref()
                .map(|d| format!(" [{d}]"))
                .unwrap_or_default(),
            event.slot.source,
        );
    }));

    let mut started = 0usize;
    for config in configs {
        let name = config.name.clone();
        let id = manager
            .add_device(config)
            .with_context(|| format!("registering device {name:?}"))?;
        match manager.start(id) {
            Ok(()) => started += 1,
            Err(e) => log::error!("{id}: failed to start: {e}"),
        }
    }
    if started == 0 {
        anyhow::bail!("no device could be started");
    }
    log::info!("{started} device(s) running; press Ctrl-C to exit");

    loop {
        thread::sleep(Duration::from_secs(60));
    }
}

fn sample_template() -> String {
    let sample = vec![DeviceConfig {
        id: None,
        name: "boiler-1".to_string(),
        bind_ip: "0.0.0.0".parse().unwrap(),
        port: 1502,
        points: vec![
            PointDefinition {
                key: "supply_temp".to_string(),
                semantic: SemanticType::Float,
                access: modsim_points::AccessMode::READ_WRITE,
                modbus: ModbusMapping {
                    region: Region::HoldingRegister,
                    address: 10,
                    scale: 1.0,
                    bit_field: None,
                },
                generator: GeneratorConfig {
                    kind: GeneratorKind::Sine,
                    min: 20.0,
                    max: 80.0,
                    period_seconds: 60.0,
                    step: 1.0,
                },
                override_mode: OverrideMode::HoldForSeconds,
                override_duration_seconds: 30,
                display_map: Default::default(),
            },
            PointDefinition {
                key: "pump_on".to_string(),
                semantic: SemanticType::Bool,
                access: modsim_points::AccessMode::READ_WRITE,
                modbus: ModbusMapping {
                    region: Region::Coil,
                    address: 0,
                    scale: 1.0,
                    bit_field: None,
                },
                generator: GeneratorConfig::default(),
                override_mode: OverrideMode::None,
                override_duration_seconds: 0,
                display_map: [(0, "Off".to_string()), (1, "On".to_string())]
                    .into_iter()
                    .collect(),
            },
        ],
    }];
    serde_json::to_string_pretty(&sample).expect("sample template always serializes")
}
