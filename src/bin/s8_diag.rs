/// SenseAir S8 Diagnostics
///
/// Health report built from the meter, alarm and output status registers.
///
/// Usage: s8_diag [config.yaml] [--simulate]

use std::path::PathBuf;

use anyhow::{Context, Result};
use senseair_s8::{
    utils::format::{format_binary, format_metrics},
    MeterStatus, OperationTimer, OutputStatus, S8Sensor, SensorConfig, SensorPort,
    SerialTransport, SimulatedSensor,
};

fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let simulate = args.iter().any(|arg| arg == "--simulate");
    let config_path = args.iter().find(|arg| !arg.starts_with("--")).map(PathBuf::from);

    let config = SensorConfig::load(config_path.as_deref()).context("loading configuration")?;
    let port: Box<dyn SensorPort> = if simulate {
        Box::new(SimulatedSensor::new())
    } else {
        Box::new(SerialTransport::from_config(&config).with_context(|| format!("opening {}", config.port))?)
    };
    let mut sensor = S8Sensor::with_config(port, &config)?;

    println!("🩺 SenseAir S8 Diagnostics");
    println!("==========================");

    let timer = OperationTimer::start("status read");
    let meter = MeterStatus(sensor.get_meter_status().context("reading meter status")?);
    let alarm = sensor.get_alarm_status().context("reading alarm status")?;
    let output = OutputStatus(sensor.get_output_status().context("reading output status")?);
    timer.stop_and_log(true);

    println!("  Meter status:  {}", format_binary(meter.bits()));
    println!("  Alarm status:  {}", format_binary(alarm));
    println!("  Output status: {}", format_binary(output.bits()));
    println!(
        "  Alarm output:  {}",
        if output.alarm_active() { "ON" } else { "OFF" }
    );
    println!(
        "  PWM output:    {}",
        if output.pwm_enabled() { "enabled" } else { "disabled" }
    );

    if meter.is_ok() {
        println!("\n✅ Sensor healthy");
    } else {
        println!("\n❌ Sensor reports errors:");
        for error in meter.errors() {
            println!("   - {}", error);
        }
    }

    println!("\n{}", format_metrics(sensor.metrics()));
    Ok(())
}
