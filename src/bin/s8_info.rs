/// SenseAir S8 Information Tool
///
/// Reads the identity registers and the ABC period of a sensor.
///
/// Usage: s8_info [config.yaml] [--simulate] [--json]

use std::path::PathBuf;

use anyhow::{Context, Result};
use senseair_s8::{
    utils::format::format_id_hex, S8Sensor, SensorConfig, SensorPort, SerialTransport,
    SimulatedSensor,
};

fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Warn)
        .parse_default_env()
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let simulate = args.iter().any(|arg| arg == "--simulate");
    let json = args.iter().any(|arg| arg == "--json");
    let config_path = args.iter().find(|arg| !arg.starts_with("--")).map(PathBuf::from);

    let config = SensorConfig::load(config_path.as_deref()).context("loading configuration")?;
    let port: Box<dyn SensorPort> = if simulate {
        Box::new(SimulatedSensor::new())
    } else {
        Box::new(SerialTransport::from_config(&config).with_context(|| format!("opening {}", config.port))?)
    };
    let mut sensor = S8Sensor::with_config(port, &config)?;

    if !json {
        println!("🔎 {}", senseair_s8::info());
        println!("=====================================");
    }

    sensor.read_identity().context("reading sensor identity")?;
    sensor.get_abc_period().context("reading ABC period")?;

    let snapshot = sensor.snapshot();
    if json {
        println!("{}", serde_json::to_string_pretty(snapshot)?);
        return Ok(());
    }

    println!("  Firmware version:   {}", snapshot.firmware_version.as_deref().unwrap_or("-"));
    if let Some(type_id) = snapshot.sensor_type_id {
        println!("  Sensor type ID:     {}", format_id_hex(type_id));
    }
    if let Some(sensor_id) = snapshot.sensor_id {
        println!("  Sensor ID:          {}", format_id_hex(sensor_id));
    }
    if let Some(version) = snapshot.memory_map_version {
        println!("  Memory map version: {}", version);
    }
    match snapshot.abc_period_hours {
        Some(0) => println!("  ABC period:         disabled"),
        Some(hours) => println!("  ABC period:         {} hours ({:.1} days)", hours, hours as f64 / 24.0),
        None => {}
    }

    Ok(())
}
