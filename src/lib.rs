//! IMU Multi-Position Calibration - accelerometer and gyroscope calibration without external equipment
//!
//! The sensor is placed in a sequence of different static orientations,
//! moved by hand between them. The accelerometer is calibrated by requiring
//! every static reading to have the local gravity magnitude. The gyroscope
//! is then calibrated by requiring the integrated rotation between two
//! static positions to carry the first gravity direction into the second.
//!
//! Both sensors use the model `X' = T * K * (X - B)`, with `T` a
//! misalignment matrix, `K` a diagonal scale matrix and `B` a bias vector.
//! See [`CalibratedTriad`].
//!
//! # Features
//!
//! - Accelerometer misalignment, scale and bias from gravity alone
//! - Gyroscope misalignment, scale and bias from gravity direction changes
//! - Selection among several static interval labellings by residual cost
//! - Plain text calibration files compatible across runs
//! - Generic over `f32` and `f64`
//!
//! Static interval detection itself is not part of this crate: every sample
//! carries an interval id assigned by an external detector, with
//! [`UNASSIGNED_INTERVAL`] marking motion.
//!
//! # Quick Start
//!
//! ```rust
//! use imu_multipos::{CalibratedTriad, CalibrationSettings, MultiPosCalibration, TriadSample};
//! use nalgebra::Vector3;
//!
//! // Twelve static positions of a sensor whose X axis reads 2% high
//! let directions = [
//!     [0.0, 0.0, 1.0], [0.0, 0.0, -1.0], [1.0, 0.0, 0.0], [-1.0, 0.0, 0.0],
//!     [0.0, 1.0, 0.0], [0.0, -1.0, 0.0], [1.0, 1.0, 1.0], [-1.0, 1.0, -1.0],
//!     [1.0, -1.0, 0.5], [-0.3, -1.0, 1.0], [0.7, 0.2, -1.0], [-1.0, 0.4, 0.6],
//! ];
//! let mut samples = Vec::new();
//! let mut interval_ids = Vec::new();
//! for (id, d) in directions.iter().enumerate() {
//!     let g = Vector3::new(d[0], d[1], d[2]).normalize() * 9.81;
//!     for _ in 0..10 {
//!         let t = samples.len() as f64 * 0.01;
//!         samples.push(TriadSample::from_xyz(t, g.x * 1.02, g.y, g.z));
//!         interval_ids.push(id as i32);
//!     }
//! }
//!
//! let settings = CalibrationSettings {
//!     num_init_samples: 10,
//!     interval_num_samples: 5,
//!     ..CalibrationSettings::new(9.81)
//! };
//! let mut calibration = MultiPosCalibration::new(settings)?;
//! let result = calibration.calibrate_accelerometer(&samples, &interval_ids)?;
//!
//! let acc: &CalibratedTriad<f64> = &result.acc_calibration;
//! assert!((acc.scale_x() - 1.0 / 1.02).abs() < 1e-6);
//! # Ok::<(), imu_multipos::CalibrationError>(())
//! ```

pub mod calibration;
mod error;
mod intervals;
mod math;
pub mod solver;
mod triad;
mod types;

// Re-export all public types and functions
pub use calibration::{CalibrationResult, MultiPosCalibration};
pub use error::{CalibrationError, Result};
pub use intervals::{centered_window, detect_static_intervals, samples_mean, samples_variance};
pub use math::{integrate_gyro_interval, quaternion_rk4_step};
pub use solver::{LeastSquaresProblem, SolverSummary, Termination, levenberg_marquardt};
pub use triad::{CalibratedTriad, Misalignment};
pub use types::*;
