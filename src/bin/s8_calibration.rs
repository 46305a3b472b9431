/// SenseAir S8 Calibration Tool
///
/// `manual`: waits for the sensor to settle in fresh outdoor air, starts a
/// background calibration and polls the acknowledgement register until it
/// reports completion.
///
/// `abc <hours>`: sets the automatic background calibration period
/// (0 disables ABC, at most 4800).
///
/// Usage: s8_calibration [config.yaml] [--simulate] manual [--settle=SECONDS]
///        s8_calibration [config.yaml] [--simulate] abc <hours>

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use senseair_s8::{S8Sensor, SensorConfig, SensorPort, SerialTransport, SimulatedSensor};

/// Time the sensor needs in fresh air before the command is sent
const DEFAULT_SETTLE_SECONDS: u64 = 5 * 60;

/// Polls of the acknowledgement register before giving up
const MAX_POLLS: u32 = 30;

fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let simulate = args.iter().any(|arg| arg == "--simulate");
    let positional: Vec<&String> = args.iter().filter(|arg| !arg.starts_with("--")).collect();
    let settle = args
        .iter()
        .find_map(|arg| arg.strip_prefix("--settle="))
        .map(|value| value.parse::<u64>())
        .transpose()
        .context("--settle must be a number of seconds")?;

    // An optional config path comes before the command
    let (config_path, command) = match positional.as_slice() {
        [path, command, rest @ ..] if path.ends_with(".yaml") || path.ends_with(".yml") || path.ends_with(".json") => {
            (Some(PathBuf::from(path.as_str())), Some((command.as_str(), rest.to_vec())))
        }
        [command, rest @ ..] => (None, Some((command.as_str(), rest.to_vec()))),
        [] => (None, None),
    };

    let config = SensorConfig::load(config_path.as_deref()).context("loading configuration")?;
    let port: Box<dyn SensorPort> = if simulate {
        Box::new(SimulatedSensor::new())
    } else {
        Box::new(SerialTransport::from_config(&config).with_context(|| format!("opening {}", config.port))?)
    };
    let mut sensor = S8Sensor::with_config(port, &config)?;

    match command {
        Some(("manual", _)) => {
            let settle = settle.unwrap_or(if simulate { 3 } else { DEFAULT_SETTLE_SECONDS });
            manual_calibration(&mut sensor, settle)
        }
        Some(("abc", rest)) => {
            let hours: u16 = match rest.first() {
                Some(value) => value.parse().context("ABC period must be a number of hours")?,
                None => bail!("usage: s8_calibration abc <hours>"),
            };
            sensor.set_abc_period(hours).context("setting ABC period")?;
            let confirmed = sensor.get_abc_period().context("reading ABC period back")?;
            if confirmed == 0 {
                println!("✅ ABC disabled");
            } else {
                println!("✅ ABC period is now {} hours", confirmed);
            }
            Ok(())
        }
        Some((other, _)) => bail!("unknown command '{}', expected 'manual' or 'abc <hours>'", other),
        None => bail!("usage: s8_calibration [config] [--simulate] manual | abc <hours>"),
    }
}

fn manual_calibration<P: SensorPort>(sensor: &mut S8Sensor<P>, settle: u64) -> Result<()> {
    println!("🌬️  Place the sensor in fresh outdoor air (~400 ppm).");
    for remaining in (1..=settle).rev() {
        if remaining % 30 == 0 || remaining <= 10 {
            println!("   starting in {}s", remaining);
        }
        std::thread::sleep(Duration::from_secs(1));
    }

    sensor.start_manual_calibration().context("starting calibration")?;
    println!("⏳ Calibration started, waiting for acknowledgement...");

    for poll in 1..=MAX_POLLS {
        std::thread::sleep(Duration::from_secs(1));
        if sensor.is_background_calibration_done().context("polling acknowledgement")? {
            println!("✅ Calibration complete after {} polls", poll);
            println!("   CO2 now reads {} ppm", sensor.get_co2()?);
            return Ok(());
        }
    }

    bail!("calibration not acknowledged after {} polls", MAX_POLLS)
}
