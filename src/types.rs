//! Core types and settings for the multi-position calibration library

use core::fmt;
use core::str::FromStr;

use nalgebra::{RealField, Vector3};

use crate::error::{CalibrationError, Result};
use crate::triad::CalibratedTriad;

/// Interval id marking a sample that belongs to no static interval
///
/// Samples recorded while the sensor was moving (or that the external
/// static detector could not classify) carry this id.
pub const UNASSIGNED_INTERVAL: i32 = -1;

/// Lower bound for [`CalibrationSettings::min_num_intervals`]
///
/// The accelerometer model has 9 free parameters and every static interval
/// contributes one residual.
pub const MIN_STATIC_INTERVALS: usize = 9;

/// Floating point type the calibration code is generic over
///
/// Implemented for every type that nalgebra treats as a real field and that
/// can be printed and parsed, in practice `f32` and `f64`.
pub trait Real: RealField + Copy + FromStr + fmt::Display {}

impl<T> Real for T where T: RealField + Copy + FromStr + fmt::Display {}

/// A timestamped reading from a 3-axis sensor
///
/// # Example
/// ```
/// use nalgebra::Vector3;
/// use imu_multipos::TriadSample;
///
/// let sample = TriadSample::new(0.01, Vector3::new(0.0, 0.0, 9.81));
/// assert_eq!(sample.timestamp(), 0.01);
/// assert_eq!(sample.z(), 9.81);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriadSample<T: Real> {
    timestamp: T,
    data: Vector3<T>,
}

impl<T: Real> TriadSample<T> {
    pub fn new(timestamp: T, data: Vector3<T>) -> Self {
        Self { timestamp, data }
    }

    pub fn from_xyz(timestamp: T, x: T, y: T, z: T) -> Self {
        Self::new(timestamp, Vector3::new(x, y, z))
    }

    /// Sample time in seconds
    pub fn timestamp(&self) -> T {
        self.timestamp
    }

    pub fn data(&self) -> &Vector3<T> {
        &self.data
    }

    pub fn x(&self) -> T {
        self.data.x
    }

    pub fn y(&self) -> T {
        self.data.y
    }

    pub fn z(&self) -> T {
        self.data.z
    }
}

/// Inclusive range of sample indices
///
/// # Example
/// ```
/// use imu_multipos::Interval;
///
/// let interval = Interval::new(3, 7).unwrap();
/// assert_eq!(interval.len(), 5);
/// assert!(Interval::new(7, 3).is_none());
/// ```
///
/// The bounds can only be set through [`Interval::new`]:
/// ```compile_fail
/// use imu_multipos::Interval;
///
/// let inverted = Interval { start: 7, end: 3 };
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Interval {
    start: usize,
    end: usize,
}

impl Interval {
    /// Create an interval, or `None` when `start > end`
    pub fn new(start: usize, end: usize) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    /// First index in the range
    pub fn start(&self) -> usize {
        self.start
    }

    /// Last index in the range (inclusive)
    pub fn end(&self) -> usize {
        self.end
    }

    /// The leading `num_samples` samples of a sequence: `[0, num_samples - 1]`
    pub fn initial(num_samples: usize) -> Option<Self> {
        num_samples.checked_sub(1).and_then(|end| Self::new(0, end))
    }

    /// Number of samples covered by the interval
    pub fn len(&self) -> usize {
        self.end - self.start + 1
    }

    /// Always false; an interval covers at least one sample
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn contains(&self, index: usize) -> bool {
        (self.start..=self.end).contains(&index)
    }
}

/// Levenberg-Marquardt solver settings
///
/// Tolerances are relative and dimensionless; they are converted to the
/// calibration scalar type when the solver runs.
///
/// # Example
/// ```
/// use imu_multipos::SolverSettings;
///
/// let settings = SolverSettings {
///     max_iterations: 50,
///     ..Default::default()
/// };
/// assert_eq!(settings.max_iterations, 50);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverSettings {
    /// Iteration cap, rejected steps included
    pub max_iterations: usize,
    /// Stop when an accepted step lowers the cost by less than this fraction
    pub function_tolerance: f64,
    /// Stop when the step norm falls below this fraction of the parameter norm
    pub parameter_tolerance: f64,
    /// Stop when the max-norm of the gradient falls below this value
    pub gradient_tolerance: f64,
    /// Damping factor of the first iteration
    pub initial_lambda: f64,
    /// Damping beyond which no further descent is attempted
    pub max_lambda: f64,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            function_tolerance: 1e-12,
            parameter_tolerance: 1e-12,
            gradient_tolerance: 1e-14,
            initial_lambda: 1e-4,
            max_lambda: 1e16,
        }
    }
}

/// Multi-position calibration settings
///
/// There is no `Default`: the local gravity magnitude has no meaningful
/// default and must be supplied through [`CalibrationSettings::new`]. The
/// remaining fields can be overridden with struct update syntax.
///
/// # Example
/// ```
/// use imu_multipos::CalibrationSettings;
///
/// let settings = CalibrationSettings {
///     num_init_samples: 500,      // 5 s at 100 Hz
///     interval_num_samples: 50,   // 0.5 s per static position
///     acc_use_means: true,
///     gyro_data_period: Some(0.01),
///     ..CalibrationSettings::new(9.81)
/// };
/// assert!(settings.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationSettings<T: Real> {
    /// Local gravity magnitude, in the units the calibrated accelerometer
    /// should report
    pub gravity_magnitude: T,
    /// Minimum number of usable static intervals, at least
    /// [`MIN_STATIC_INTERVALS`]
    pub min_num_intervals: usize,
    /// Length of the leading window used to bootstrap scale and gyroscope
    /// bias. The sensor must be static during it.
    pub num_init_samples: usize,
    /// Samples taken from the centre of each static interval
    ///
    /// Shorter intervals are discarded.
    pub interval_num_samples: usize,
    /// Use the mean of each static window as its measurement, otherwise the
    /// window's centre sample
    pub acc_use_means: bool,
    /// Fit the accelerometer bias. When disabled the bias of
    /// `init_acc_calibration` is held fixed.
    pub optimize_acc_bias: bool,
    /// Fixed gyroscope sample period in seconds
    ///
    /// `None` integrates with the difference between sample timestamps.
    pub gyro_data_period: Option<T>,
    /// Jointly fit a residual gyroscope bias on top of the bootstrap estimate
    pub optimize_gyro_bias: bool,
    /// Initial guess for the accelerometer parameters
    pub init_acc_calibration: CalibratedTriad<T>,
    /// Initial guess for the gyroscope misalignment and scale
    pub init_gyro_calibration: CalibratedTriad<T>,
    /// Solver iteration cap and tolerances
    pub solver: SolverSettings,
    /// Report per-run summaries at `info` level instead of `debug`
    pub verbose_output: bool,
}

impl<T: Real> CalibrationSettings<T> {
    pub fn new(gravity_magnitude: T) -> Self {
        Self {
            gravity_magnitude,
            min_num_intervals: 12,
            num_init_samples: 3000,
            interval_num_samples: 100,
            acc_use_means: false,
            optimize_acc_bias: true,
            gyro_data_period: None,
            optimize_gyro_bias: false,
            init_acc_calibration: CalibratedTriad::default(),
            init_gyro_calibration: CalibratedTriad::default(),
            solver: SolverSettings::default(),
            verbose_output: false,
        }
    }

    /// Check the settings for values the calibration cannot work with
    pub fn validate(&self) -> Result<()> {
        let g = self.gravity_magnitude;
        if !g.is_finite() || g <= T::zero() {
            return Err(CalibrationError::InvalidSettings(format!(
                "gravity magnitude must be positive and finite, got {g}"
            )));
        }
        if self.min_num_intervals < MIN_STATIC_INTERVALS {
            return Err(CalibrationError::InvalidSettings(format!(
                "at least {MIN_STATIC_INTERVALS} static intervals are required, got {}",
                self.min_num_intervals
            )));
        }
        if self.num_init_samples == 0 {
            return Err(CalibrationError::InvalidSettings(
                "num_init_samples must be non-zero".into(),
            ));
        }
        if self.interval_num_samples == 0 {
            return Err(CalibrationError::InvalidSettings(
                "interval_num_samples must be non-zero".into(),
            ));
        }
        if let Some(dt) = self.gyro_data_period {
            if !dt.is_finite() || dt <= T::zero() {
                return Err(CalibrationError::InvalidSettings(format!(
                    "gyro data period must be positive, got {dt}"
                )));
            }
        }
        if self.solver.max_iterations == 0 {
            return Err(CalibrationError::InvalidSettings(
                "solver max_iterations must be non-zero".into(),
            ));
        }
        Ok(())
    }
}
