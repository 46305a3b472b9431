/// SenseAir S8 Monitor
///
/// Prints CO2 and the PWM-derived concentration at a fixed interval. Failed
/// reads are reported and the loop carries on.
///
/// Usage: s8_monitor [config.yaml] [--simulate] [--interval=SECONDS] [--count=N]

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use senseair_s8::{S8Sensor, SensorConfig, SensorPort, SerialTransport, SimulatedSensor};

fn flag_value(args: &[String], name: &str) -> Option<String> {
    let prefix = format!("--{}=", name);
    args.iter()
        .find_map(|arg| arg.strip_prefix(&prefix).map(str::to_string))
}

fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Warn)
        .parse_default_env()
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let simulate = args.iter().any(|arg| arg == "--simulate");
    let config_path = args.iter().find(|arg| !arg.starts_with("--")).map(PathBuf::from);
    let interval: u64 = flag_value(&args, "interval")
        .map(|value| value.parse())
        .transpose()
        .context("--interval must be a number of seconds")?
        .unwrap_or(4);
    let count: Option<u64> = flag_value(&args, "count")
        .map(|value| value.parse())
        .transpose()
        .context("--count must be a number")?;

    let config = SensorConfig::load(config_path.as_deref()).context("loading configuration")?;
    let port: Box<dyn SensorPort> = if simulate {
        let mut simulator = SimulatedSensor::new();
        simulator.set_co2_jitter(25);
        Box::new(simulator)
    } else {
        Box::new(SerialTransport::from_config(&config).with_context(|| format!("opening {}", config.port))?)
    };
    let mut sensor = S8Sensor::with_config(port, &config)?;

    println!("📈 SenseAir S8 Monitor (every {}s, Ctrl+C to stop)", interval);

    let mut sample = 0u64;
    while count.map_or(true, |limit| sample < limit) {
        sample += 1;
        let timestamp = chrono::Local::now().format("%H:%M:%S");
        match (sensor.get_co2(), sensor.get_pwm_output_ppm()) {
            (Ok(co2), Ok(pwm_ppm)) => {
                println!("[{}] CO2: {:5} ppm | PWM: {:7.1} ppm", timestamp, co2, pwm_ppm)
            }
            (Err(e), _) | (_, Err(e)) => println!("[{}] ❌ read failed: {}", timestamp, e),
        }
        if count.map_or(true, |limit| sample < limit) {
            std::thread::sleep(Duration::from_secs(interval));
        }
    }

    let stats = sensor.stats();
    println!(
        "\n📊 {} requests, {} errors, {} timeouts",
        stats.requests_sent, stats.errors, stats.timeouts
    );
    Ok(())
}
