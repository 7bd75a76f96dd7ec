//! Calibrate an IMU from a CSV log
//!
//! The log holds one row per sample with a shared timestamp, the raw
//! accelerometer and gyroscope readings and the static interval id assigned
//! by a static detector (`-1` while moving):
//!
//! ```text
//! Time (s),Accelerometer X,Accelerometer Y,Accelerometer Z,Gyroscope X,Gyroscope Y,Gyroscope Z,Interval
//! ```
//!
//! The fitted calibrations are written next to the log as `<log>.acc.calib`
//! and `<log>.gyro.calib`.
//!
//! Run with: `RUST_LOG=debug cargo run --example calibrate_csv -- <log.csv> [gravity] [sample_period]`

use imu_multipos::{CalibrationSettings, MultiPosCalibration, TriadSample};
use serde::Deserialize;
use std::error::Error;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Deserialize)]
struct LogRecord {
    #[serde(rename = "Time (s)")]
    time: f64,
    #[serde(rename = "Accelerometer X")]
    acc_x: f64,
    #[serde(rename = "Accelerometer Y")]
    acc_y: f64,
    #[serde(rename = "Accelerometer Z")]
    acc_z: f64,
    #[serde(rename = "Gyroscope X")]
    gyro_x: f64,
    #[serde(rename = "Gyroscope Y")]
    gyro_y: f64,
    #[serde(rename = "Gyroscope Z")]
    gyro_z: f64,
    #[serde(rename = "Interval")]
    interval: i32,
}

const DEFAULT_GRAVITY: f64 = 9.81;

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let log_path = PathBuf::from(
        args.next()
            .ok_or("usage: calibrate_csv <log.csv> [gravity] [sample_period]")?,
    );
    let gravity = match args.next() {
        Some(value) => value.parse()?,
        None => DEFAULT_GRAVITY,
    };
    let period = args.next().map(|value| value.parse()).transpose()?;

    // Load the log
    let mut reader = csv::Reader::from_path(&log_path)?;
    let mut acc_samples = Vec::new();
    let mut gyro_samples = Vec::new();
    let mut interval_ids = Vec::new();
    for result in reader.deserialize() {
        let record: LogRecord = result?;
        acc_samples.push(TriadSample::from_xyz(
            record.time,
            record.acc_x,
            record.acc_y,
            record.acc_z,
        ));
        gyro_samples.push(TriadSample::from_xyz(
            record.time,
            record.gyro_x,
            record.gyro_y,
            record.gyro_z,
        ));
        interval_ids.push(record.interval);
    }
    println!("Loaded {} samples from {}", acc_samples.len(), log_path.display());

    let settings = CalibrationSettings {
        gyro_data_period: period,
        verbose_output: true,
        ..CalibrationSettings::new(gravity)
    };
    let mut calibration = MultiPosCalibration::new(settings)?;
    let result =
        calibration.calibrate_accelerometer_gyroscope(&acc_samples, &interval_ids, &gyro_samples)?;

    println!(
        "Used {} static intervals, accelerometer cost {:.3e}",
        result.static_intervals.len(),
        result.acc_summary.final_cost
    );
    println!("Accelerometer:\n{}", result.acc_calibration);
    println!("Gyroscope:\n{}", result.gyro_calibration);

    let acc_path = log_path.with_extension("acc.calib");
    let gyro_path = log_path.with_extension("gyro.calib");
    result.acc_calibration.save(&acc_path)?;
    result.gyro_calibration.save(&gyro_path)?;
    println!("Saved {} and {}", acc_path.display(), gyro_path.display());

    Ok(())
}
