//! Multi-position calibration of accelerometer and gyroscope triads
//!
//! The sensor is held still in a number of different orientations separated
//! by motion. In every static interval the accelerometer measures gravity
//! only, so its calibrated reading must have the known gravity magnitude.
//! Between two consecutive static intervals the integrated gyroscope rates
//! must rotate the first gravity direction into the second.
//!
//! # Example
//! ```no_run
//! use imu_multipos::{CalibrationSettings, MultiPosCalibration, TriadSample};
//!
//! # fn load_log() -> (Vec<TriadSample<f64>>, Vec<i32>, Vec<TriadSample<f64>>) { unimplemented!() }
//! let (acc_samples, interval_ids, gyro_samples) = load_log();
//!
//! let settings = CalibrationSettings {
//!     gyro_data_period: Some(0.01),
//!     ..CalibrationSettings::new(9.81)
//! };
//! let mut calibration = MultiPosCalibration::new(settings)?;
//! let result = calibration.calibrate_accelerometer_gyroscope(
//!     &acc_samples,
//!     &interval_ids,
//!     &gyro_samples,
//! )?;
//!
//! result.acc_calibration.save("acc.calib")?;
//! result.gyro_calibration.save("gyro.calib")?;
//! # Ok::<(), imu_multipos::CalibrationError>(())
//! ```

use nalgebra::{DVector, Matrix3, Vector3};
use tracing::{debug, info, warn};

use crate::error::{CalibrationError, Result};
use crate::intervals::{centered_window, detect_static_intervals, samples_mean, samples_variance};
use crate::math::integrate_gyro_samples;
use crate::solver::{LeastSquaresProblem, SolverSummary, levenberg_marquardt};
use crate::triad::{CalibratedTriad, Misalignment};
use crate::types::{CalibrationSettings, Interval, Real, TriadSample};

/// Body frame misalignment (3) and scale (3)
const ACC_SHAPE_PARAMETERS: usize = 6;
/// Full misalignment (6) and scale (3)
const GYRO_SHAPE_PARAMETERS: usize = 9;
/// Minimum ratio between the smallest and largest eigenvalue of the
/// orientation scatter matrix
const MIN_ORIENTATION_SPREAD: f64 = 1e-4;

/// Output of a successful calibration run
#[derive(Debug, Clone)]
pub struct CalibrationResult<T: Real> {
    /// Fitted accelerometer calibration
    pub acc_calibration: CalibratedTriad<T>,
    /// Fitted gyroscope calibration, identity after an accelerometer-only run
    pub gyro_calibration: CalibratedTriad<T>,
    /// Every input accelerometer sample, bias and scale corrected
    pub calibrated_acc_samples: Vec<TriadSample<T>>,
    /// Every input gyroscope sample, bias and scale corrected; empty after an
    /// accelerometer-only run
    pub calibrated_gyro_samples: Vec<TriadSample<T>>,
    /// Centre windows of the static intervals used by the fit
    pub static_intervals: Vec<Interval>,
    pub acc_summary: SolverSummary<T>,
    pub gyro_summary: Option<SolverSummary<T>>,
}

/// Multi-position calibrator
///
/// Holds the settings and the result of the last successful run. Each
/// `calibrate_*` call clears the previous result first, so a failed call
/// leaves no result behind.
#[derive(Debug, Clone)]
pub struct MultiPosCalibration<T: Real> {
    settings: CalibrationSettings<T>,
    result: Option<CalibrationResult<T>>,
}

/// Accelerometer fit before it is turned into a [`CalibrationResult`]
struct AccelerometerFit<T: Real> {
    calibration: CalibratedTriad<T>,
    windows: Vec<Interval>,
    summary: SolverSummary<T>,
}

impl<T: Real> MultiPosCalibration<T> {
    pub fn new(settings: CalibrationSettings<T>) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            settings,
            result: None,
        })
    }

    pub fn settings(&self) -> &CalibrationSettings<T> {
        &self.settings
    }

    /// Replace the settings; the previous result is kept
    pub fn set_settings(&mut self, settings: CalibrationSettings<T>) -> Result<()> {
        settings.validate()?;
        self.settings = settings;
        Ok(())
    }

    /// Result of the last successful calibration
    pub fn result(&self) -> Option<&CalibrationResult<T>> {
        self.result.as_ref()
    }

    /// Calibrate the accelerometer from samples labelled with interval ids
    ///
    /// `interval_ids[i]` is the static interval of `samples[i]`, or
    /// [`UNASSIGNED_INTERVAL`](crate::UNASSIGNED_INTERVAL) during motion.
    pub fn calibrate_accelerometer(
        &mut self,
        samples: &[TriadSample<T>],
        interval_ids: &[i32],
    ) -> Result<&CalibrationResult<T>> {
        self.result = None;
        let fit = self.fit_accelerometer(samples, interval_ids)?;
        self.report("accelerometer", &fit.calibration, &fit.summary);
        Ok(&*self.result.insert(acc_only_result(fit, samples)))
    }

    /// Calibrate the accelerometer with the best of several labellings
    ///
    /// Each candidate is a full set of interval ids, for example produced by
    /// a static detector run at different thresholds. Candidates without
    /// enough usable intervals, with degenerate orientations or on which the
    /// solver does not converge are skipped; the fit with the lowest final
    /// cost wins.
    pub fn calibrate_accelerometer_candidates(
        &mut self,
        samples: &[TriadSample<T>],
        candidates: &[&[i32]],
    ) -> Result<&CalibrationResult<T>> {
        self.result = None;

        let mut best: Option<AccelerometerFit<T>> = None;
        let mut last_error = CalibrationError::InsufficientIntervals {
            found: 0,
            required: self.settings.min_num_intervals,
        };
        for (index, interval_ids) in candidates.iter().enumerate() {
            match self.fit_accelerometer(samples, interval_ids) {
                Ok(fit) => {
                    debug!(
                        "candidate {}: {} intervals, final cost {}",
                        index,
                        fit.windows.len(),
                        fit.summary.final_cost
                    );
                    if best
                        .as_ref()
                        .is_none_or(|b| fit.summary.final_cost < b.summary.final_cost)
                    {
                        best = Some(fit);
                    }
                }
                Err(
                    err @ (CalibrationError::InsufficientIntervals { .. }
                    | CalibrationError::DegenerateOrientations
                    | CalibrationError::NotConverged { .. }),
                ) => {
                    warn!("skipping candidate {}: {}", index, err);
                    last_error = err;
                }
                Err(err) => return Err(err),
            }
        }

        let fit = best.ok_or(last_error)?;
        self.report("accelerometer", &fit.calibration, &fit.summary);
        Ok(&*self.result.insert(acc_only_result(fit, samples)))
    }

    /// Calibrate the accelerometer, then the gyroscope
    ///
    /// Gyroscope samples are matched to the accelerometer static intervals by
    /// timestamp, so both logs must share a time base.
    pub fn calibrate_accelerometer_gyroscope(
        &mut self,
        acc_samples: &[TriadSample<T>],
        interval_ids: &[i32],
        gyro_samples: &[TriadSample<T>],
    ) -> Result<&CalibrationResult<T>> {
        self.result = None;

        let acc_fit = self.fit_accelerometer(acc_samples, interval_ids)?;
        self.report("accelerometer", &acc_fit.calibration, &acc_fit.summary);
        let calibrated_acc_samples = calibrate_all(&acc_fit.calibration, acc_samples);

        // Gravity direction and time of every static window
        let anchors: Vec<(T, Vector3<T>)> = acc_fit
            .windows
            .iter()
            .map(|window| {
                let centre = &calibrated_acc_samples[window.start() + window.len() / 2];
                let gravity = samples_mean(&calibrated_acc_samples, window);
                (centre.timestamp(), gravity.normalize())
            })
            .collect();

        let bootstrap = self.bootstrap_interval(gyro_samples.len())?;
        let gyro_bias = samples_mean(gyro_samples, &bootstrap);
        debug!(
            "gyroscope bootstrap bias {:?}, variance {:?}",
            gyro_bias.as_slice(),
            samples_variance(gyro_samples, &bootstrap).as_slice()
        );
        let unbiased: Vec<TriadSample<T>> = gyro_samples
            .iter()
            .map(|sample| TriadSample::new(sample.timestamp(), sample.data() - gyro_bias))
            .collect();

        let pairs = gyro_pairs(&anchors, &unbiased);
        let covered = covered_intervals(&pairs);
        if covered < self.settings.min_num_intervals {
            return Err(CalibrationError::InsufficientIntervals {
                found: covered,
                required: self.settings.min_num_intervals,
            });
        }

        let problem = GyroscopeProblem {
            pairs,
            period: self.settings.gyro_data_period,
            optimize_bias: self.settings.optimize_gyro_bias,
        };
        let initial = problem.initial_parameters(&self.settings.init_gyro_calibration);
        let (params, gyro_summary) = levenberg_marquardt(&problem, initial, &self.settings.solver)?;

        let shape = problem.triad(&params);
        let gyro_calibration = shape.with_bias(gyro_bias + shape.bias_vector());
        self.report("gyroscope", &gyro_calibration, &gyro_summary);

        let result = CalibrationResult {
            calibrated_gyro_samples: calibrate_all(&gyro_calibration, gyro_samples),
            gyro_calibration,
            acc_calibration: acc_fit.calibration,
            calibrated_acc_samples,
            static_intervals: acc_fit.windows,
            acc_summary: acc_fit.summary,
            gyro_summary: Some(gyro_summary),
        };
        Ok(&*self.result.insert(result))
    }

    fn fit_accelerometer(
        &self,
        samples: &[TriadSample<T>],
        interval_ids: &[i32],
    ) -> Result<AccelerometerFit<T>> {
        if samples.len() != interval_ids.len() {
            return Err(CalibrationError::LengthMismatch {
                samples: samples.len(),
                labels: interval_ids.len(),
            });
        }

        let required = self.settings.min_num_intervals;
        let intervals = detect_static_intervals(interval_ids)?;
        if intervals.len() < required {
            return Err(CalibrationError::InsufficientIntervals {
                found: intervals.len(),
                required,
            });
        }

        let windows: Vec<Interval> = intervals
            .iter()
            .filter_map(|interval| centered_window(interval, self.settings.interval_num_samples))
            .collect();
        debug!(
            "{} static intervals, {} with at least {} samples",
            intervals.len(),
            windows.len(),
            self.settings.interval_num_samples
        );
        if windows.len() < intervals.len() {
            warn!(
                "discarding {} static intervals shorter than {} samples",
                intervals.len() - windows.len(),
                self.settings.interval_num_samples
            );
        }
        if windows.len() < required {
            return Err(CalibrationError::InsufficientIntervals {
                found: windows.len(),
                required,
            });
        }

        let measurements: Vec<Vector3<T>> = windows
            .iter()
            .map(|window| self.interval_measurement(samples, window))
            .collect();

        let initial_calibration = self.bootstrap_accelerometer(samples)?;
        check_orientation_spread(&measurements)?;

        let problem = AccelerometerProblem {
            gravity: self.settings.gravity_magnitude,
            measurements: &measurements,
            fixed_bias: (!self.settings.optimize_acc_bias)
                .then(|| *initial_calibration.bias_vector()),
        };
        let initial = problem.initial_parameters(&initial_calibration);
        let (params, summary) = levenberg_marquardt(&problem, initial, &self.settings.solver)?;

        Ok(AccelerometerFit {
            calibration: problem.triad(&params),
            windows,
            summary,
        })
    }

    /// Representative reading of a static window
    fn interval_measurement(&self, samples: &[TriadSample<T>], window: &Interval) -> Vector3<T> {
        if self.settings.acc_use_means {
            samples_mean(samples, window)
        } else {
            *samples[window.start() + window.len() / 2].data()
        }
    }

    /// Initial accelerometer guess from the leading static window
    ///
    /// The configured initial calibration is rescaled so that the window's
    /// mean reads exactly the gravity magnitude.
    fn bootstrap_accelerometer(&self, samples: &[TriadSample<T>]) -> Result<CalibratedTriad<T>> {
        let bootstrap = self.bootstrap_interval(samples.len())?;
        let mean = samples_mean(samples, &bootstrap);
        debug!(
            "accelerometer bootstrap mean {:?}, variance {:?}",
            mean.as_slice(),
            samples_variance(samples, &bootstrap).as_slice()
        );

        let initial = &self.settings.init_acc_calibration;
        let magnitude = initial.unbias_normalize(&mean).norm();
        if magnitude > T::zero() && magnitude.is_finite() {
            let factor = self.settings.gravity_magnitude / magnitude;
            Ok(initial.with_scale(initial.scale() * factor))
        } else {
            Ok(initial.clone())
        }
    }

    fn bootstrap_interval(&self, available: usize) -> Result<Interval> {
        let required = self.settings.num_init_samples;
        if available < required {
            return Err(CalibrationError::InsufficientSamples {
                found: available,
                required,
            });
        }
        Interval::initial(required).ok_or_else(|| {
            CalibrationError::InvalidSettings("num_init_samples must be non-zero".into())
        })
    }

    fn report(&self, sensor: &str, calibration: &CalibratedTriad<T>, summary: &SolverSummary<T>) {
        if self.settings.verbose_output {
            info!(
                "{} calibrated in {} iterations, cost {} -> {}\n{}",
                sensor, summary.iterations, summary.initial_cost, summary.final_cost, calibration
            );
        } else {
            debug!(
                "{} calibrated in {} iterations, cost {} -> {}",
                sensor, summary.iterations, summary.initial_cost, summary.final_cost
            );
        }
    }
}

fn acc_only_result<T: Real>(
    fit: AccelerometerFit<T>,
    samples: &[TriadSample<T>],
) -> CalibrationResult<T> {
    CalibrationResult {
        calibrated_acc_samples: calibrate_all(&fit.calibration, samples),
        acc_calibration: fit.calibration,
        gyro_calibration: CalibratedTriad::default(),
        calibrated_gyro_samples: Vec::new(),
        static_intervals: fit.windows,
        acc_summary: fit.summary,
        gyro_summary: None,
    }
}

fn calibrate_all<T: Real>(
    calibration: &CalibratedTriad<T>,
    samples: &[TriadSample<T>],
) -> Vec<TriadSample<T>> {
    samples
        .iter()
        .map(|sample| calibration.unbias_normalize_sample(sample))
        .collect()
}

/// Reject measurement sets whose directions do not span three dimensions
fn check_orientation_spread<T: Real>(measurements: &[Vector3<T>]) -> Result<()> {
    let scatter = measurements
        .iter()
        .filter_map(|m| m.try_normalize(T::zero()))
        .fold(Matrix3::zeros(), |acc, u| acc + u * u.transpose());
    let eigenvalues = scatter.symmetric_eigenvalues();
    let largest = eigenvalues.max();
    let smallest = eigenvalues.min();

    let spread: T = nalgebra::convert(MIN_ORIENTATION_SPREAD);
    if largest > T::zero() && smallest > largest * spread {
        Ok(())
    } else {
        Err(CalibrationError::DegenerateOrientations)
    }
}

/// Gravity magnitude residuals over the static windows
struct AccelerometerProblem<'a, T: Real> {
    gravity: T,
    measurements: &'a [Vector3<T>],
    fixed_bias: Option<Vector3<T>>,
}

impl<T: Real> AccelerometerProblem<'_, T> {
    /// Parameters: `[mis_yz, mis_zy, mis_zx, s_x, s_y, s_z, (b_x, b_y, b_z)]`
    fn initial_parameters(&self, initial: &CalibratedTriad<T>) -> DVector<T> {
        let mut params = vec![
            initial.mis_yz(),
            initial.mis_zy(),
            initial.mis_zx(),
            initial.scale_x(),
            initial.scale_y(),
            initial.scale_z(),
        ];
        if self.fixed_bias.is_none() {
            params.extend(initial.bias_vector().iter().copied());
        }
        DVector::from_vec(params)
    }

    fn triad(&self, params: &DVector<T>) -> CalibratedTriad<T> {
        let bias = self
            .fixed_bias
            .unwrap_or_else(|| Vector3::new(params[6], params[7], params[8]));
        CalibratedTriad::new(
            Misalignment::body_frame(params[0], params[1], params[2]),
            Vector3::new(params[3], params[4], params[5]),
            bias,
        )
    }
}

impl<T: Real> LeastSquaresProblem<T> for AccelerometerProblem<'_, T> {
    fn num_parameters(&self) -> usize {
        match self.fixed_bias {
            Some(_) => ACC_SHAPE_PARAMETERS,
            None => ACC_SHAPE_PARAMETERS + 3,
        }
    }

    fn num_residuals(&self) -> usize {
        self.measurements.len()
    }

    fn residuals(&self, params: &DVector<T>) -> DVector<T> {
        let triad = self.triad(params);
        DVector::from_iterator(
            self.measurements.len(),
            self.measurements
                .iter()
                .map(|m| self.gravity - triad.unbias_normalize(m).norm()),
        )
    }
}

/// Two consecutive static windows and the gyroscope samples between them
struct GyroPair<'a, T: Real> {
    /// Index of the earlier static window
    first_window: usize,
    gravity_start: Vector3<T>,
    gravity_end: Vector3<T>,
    samples: &'a [TriadSample<T>],
}

/// Pair each consecutive pair of static windows with its gyroscope samples
///
/// A pair spans from the first sample at or after the start anchor time up
/// to the last sample before the end anchor time. Timestamps are assumed to
/// be monotonic.
fn gyro_pairs<'a, T: Real>(
    anchors: &[(T, Vector3<T>)],
    samples: &'a [TriadSample<T>],
) -> Vec<GyroPair<'a, T>> {
    let mut pairs = Vec::new();
    let mut cursor = 0;

    for (index, anchor) in anchors.windows(2).enumerate() {
        let (start_time, gravity_start) = anchor[0];
        let (end_time, gravity_end) = anchor[1];

        let Some(start) = first_at_or_after(samples, cursor, start_time) else {
            warn!("gyroscope log ends before static interval {}", index);
            break;
        };
        let Some(end) = first_at_or_after(samples, start, end_time) else {
            warn!("gyroscope log ends before static interval {}", index + 1);
            break;
        };
        cursor = end;

        if end - start < 2 {
            warn!(
                "skipping static intervals {}-{}: fewer than two gyroscope samples",
                index,
                index + 1
            );
            continue;
        }
        pairs.push(GyroPair {
            first_window: index,
            gravity_start,
            gravity_end,
            samples: &samples[start..end],
        });
    }
    pairs
}

/// Number of distinct static windows touched by `pairs`
fn covered_intervals<T: Real>(pairs: &[GyroPair<'_, T>]) -> usize {
    let mut covered = 0;
    let mut last_window = None;
    for pair in pairs {
        covered += if last_window == Some(pair.first_window) { 1 } else { 2 };
        last_window = Some(pair.first_window + 1);
    }
    covered
}

fn first_at_or_after<T: Real>(samples: &[TriadSample<T>], from: usize, time: T) -> Option<usize> {
    samples
        .get(from..)?
        .iter()
        .position(|sample| sample.timestamp() >= time)
        .map(|offset| from + offset)
}

/// Gravity direction residuals over pairs of consecutive static windows
struct GyroscopeProblem<'a, T: Real> {
    pairs: Vec<GyroPair<'a, T>>,
    period: Option<T>,
    optimize_bias: bool,
}

impl<T: Real> GyroscopeProblem<'_, T> {
    /// Parameters: `[mis_yz, mis_zy, mis_zx, mis_xz, mis_xy, mis_yx, s_x, s_y, s_z, (b_x, b_y, b_z)]`
    ///
    /// The bias terms are a correction on top of the bootstrap bias and
    /// start at zero.
    fn initial_parameters(&self, initial: &CalibratedTriad<T>) -> DVector<T> {
        let mis = initial.misalignment();
        let scale = initial.scale();
        let mut params = vec![
            mis.yz, mis.zy, mis.zx, mis.xz, mis.xy, mis.yx, scale.x, scale.y, scale.z,
        ];
        if self.optimize_bias {
            params.extend([T::zero(); 3]);
        }
        DVector::from_vec(params)
    }

    fn triad(&self, params: &DVector<T>) -> CalibratedTriad<T> {
        let bias = if self.optimize_bias {
            Vector3::new(params[9], params[10], params[11])
        } else {
            Vector3::zeros()
        };
        CalibratedTriad::new(
            Misalignment {
                yz: params[0],
                zy: params[1],
                zx: params[2],
                xz: params[3],
                xy: params[4],
                yx: params[5],
            },
            Vector3::new(params[6], params[7], params[8]),
            bias,
        )
    }
}

impl<T: Real> LeastSquaresProblem<T> for GyroscopeProblem<'_, T> {
    fn num_parameters(&self) -> usize {
        if self.optimize_bias {
            GYRO_SHAPE_PARAMETERS + 3
        } else {
            GYRO_SHAPE_PARAMETERS
        }
    }

    fn num_residuals(&self) -> usize {
        self.pairs.len() * 3
    }

    fn residuals(&self, params: &DVector<T>) -> DVector<T> {
        let triad = self.triad(params);
        let mut residuals = DVector::zeros(self.num_residuals());
        for (i, pair) in self.pairs.iter().enumerate() {
            let rotation = integrate_gyro_samples(
                pair.samples
                    .iter()
                    .map(|sample| triad.unbias_normalize_sample(sample)),
                self.period,
            );
            let predicted = rotation.inverse_transform_vector(&pair.gravity_start);
            residuals
                .fixed_rows_mut::<3>(i * 3)
                .copy_from(&(predicted - pair.gravity_end));
        }
        residuals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UNASSIGNED_INTERVAL;
    use nalgebra::UnitQuaternion;

    const G: f64 = 9.81;

    fn true_acc() -> CalibratedTriad<f64> {
        CalibratedTriad::new(
            Misalignment::body_frame(0.01, -0.02, 0.015),
            Vector3::new(1.03, 0.98, 1.01),
            Vector3::new(0.2, -0.1, 0.3),
        )
    }

    /// Raw reading that `calibration` maps onto `calibrated`
    fn raw_from(calibration: &CalibratedTriad<f64>, calibrated: Vector3<f64>) -> Vector3<f64> {
        calibration.transform_matrix().try_inverse().unwrap() * calibrated
            + calibration.bias_vector()
    }

    fn directions() -> Vec<Vector3<f64>> {
        vec![
            Vector3::new(0.0, 0.0, 1.0),
            Vector3::new(0.0, 0.0, -1.0),
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(-1.0, 0.0, 0.0),
            Vector3::new(0.0, 1.0, 0.0),
            Vector3::new(0.0, -1.0, 0.0),
            Vector3::new(1.0, 1.0, 1.0).normalize(),
            Vector3::new(-1.0, 1.0, -1.0).normalize(),
            Vector3::new(1.0, -1.0, 0.5).normalize(),
            Vector3::new(-0.3, -1.0, 1.0).normalize(),
            Vector3::new(0.7, 0.2, -1.0).normalize(),
            Vector3::new(-1.0, 0.4, 0.6).normalize(),
        ]
    }

    #[test]
    fn test_accelerometer_residuals_vanish_at_truth() {
        let truth = true_acc();
        let measurements: Vec<_> = directions()
            .into_iter()
            .map(|d| raw_from(&truth, d * G))
            .collect();
        let problem = AccelerometerProblem {
            gravity: G,
            measurements: &measurements,
            fixed_bias: None,
        };

        let params = problem.initial_parameters(&truth);
        assert_eq!(params.len(), problem.num_parameters());
        assert!(problem.residuals(&params).amax() < 1e-12);
        assert_eq!(problem.triad(&params), truth);
    }

    #[test]
    fn test_fixed_bias_removes_parameters() {
        let measurements = vec![Vector3::new(0.0, 0.0, G)];
        let bias = Vector3::new(0.5, 0.0, 0.0);
        let problem = AccelerometerProblem {
            gravity: G,
            measurements: &measurements,
            fixed_bias: Some(bias),
        };

        let params = problem.initial_parameters(&CalibratedTriad::default());
        assert_eq!(params.len(), ACC_SHAPE_PARAMETERS);
        assert_eq!(*problem.triad(&params).bias_vector(), bias);
    }

    #[test]
    fn test_orientation_spread() {
        let spread: Vec<_> = directions().into_iter().map(|d| d * G).collect();
        assert!(check_orientation_spread(&spread).is_ok());

        let parallel = vec![Vector3::new(0.0, 0.0, G); 12];
        assert!(matches!(
            check_orientation_spread(&parallel),
            Err(CalibrationError::DegenerateOrientations)
        ));

        // Rotations about a single axis keep gravity in one plane
        let planar: Vec<_> = (0..12)
            .map(|i| {
                let angle = i as f64 * 0.5;
                Vector3::new(angle.cos(), angle.sin(), 0.0) * G
            })
            .collect();
        assert!(check_orientation_spread(&planar).is_err());
    }

    #[test]
    fn test_gyro_pairs_windowing() {
        let samples: Vec<_> = (0..10)
            .map(|i| TriadSample::from_xyz(i as f64, 0.0, 0.0, 0.0))
            .collect();
        let anchors = vec![
            (1.0, Vector3::z()),
            (4.5, Vector3::x()),
            (8.0, Vector3::y()),
        ];

        let pairs = gyro_pairs(&anchors, &samples);
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].samples.first().unwrap().timestamp(), 1.0);
        assert_eq!(pairs[0].samples.last().unwrap().timestamp(), 4.0);
        assert_eq!(pairs[1].samples.first().unwrap().timestamp(), 5.0);
        assert_eq!(pairs[1].samples.last().unwrap().timestamp(), 7.0);
        assert_eq!(pairs[1].gravity_end, Vector3::y());
    }

    #[test]
    fn test_gyro_pairs_stop_when_log_ends() {
        let samples: Vec<_> = (0..5)
            .map(|i| TriadSample::from_xyz(i as f64, 0.0, 0.0, 0.0))
            .collect();
        let anchors = vec![(0.0, Vector3::z()), (3.0, Vector3::x()), (9.0, Vector3::y())];

        let pairs = gyro_pairs(&anchors, &samples);
        assert_eq!(pairs.len(), 1);
    }

    #[test]
    fn test_covered_intervals_with_skipped_pair() {
        let samples: Vec<_> = (0..10)
            .map(|i| TriadSample::from_xyz(i as f64, 0.0, 0.0, 0.0))
            .collect();
        // The 3.0 to 3.5 pair holds a single sample and is skipped
        let anchors = vec![
            (0.0, Vector3::z()),
            (3.0, Vector3::x()),
            (3.5, Vector3::y()),
            (7.0, Vector3::z()),
        ];

        let pairs = gyro_pairs(&anchors, &samples);
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].first_window, 0);
        assert_eq!(pairs[1].first_window, 2);
        assert_eq!(covered_intervals(&pairs), 4);

        let chained = gyro_pairs(&anchors[..2], &samples);
        assert_eq!(covered_intervals(&chained), 2);
        assert_eq!(covered_intervals::<f64>(&[]), 0);
    }

    #[test]
    fn test_gyroscope_residuals_vanish_for_consistent_rotation() {
        // Quarter turn about X over one second, sampled at 100 Hz
        let rate = Vector3::new(core::f64::consts::FRAC_PI_2, 0.0, 0.0);
        let samples: Vec<_> = (0..=100)
            .map(|i| TriadSample::new(i as f64 * 0.01, rate))
            .collect();
        let gravity_start = Vector3::z();
        let rotation = UnitQuaternion::from_scaled_axis(rate);
        let gravity_end = rotation.inverse_transform_vector(&gravity_start);

        let problem = GyroscopeProblem {
            pairs: vec![GyroPair {
                first_window: 0,
                gravity_start,
                gravity_end,
                samples: &samples,
            }],
            period: Some(0.01),
            optimize_bias: true,
        };
        let params = problem.initial_parameters(&CalibratedTriad::default());
        assert_eq!(params.len(), GYRO_SHAPE_PARAMETERS + 3);
        assert!(problem.residuals(&params).amax() < 1e-9);
    }

    #[test]
    fn test_bootstrap_rescales_to_gravity() {
        let settings = CalibrationSettings {
            num_init_samples: 10,
            ..CalibrationSettings::new(G)
        };
        let calibration = MultiPosCalibration::new(settings).unwrap();
        let samples = vec![TriadSample::from_xyz(0.0, 0.0, 0.0, 4000.0); 10];

        let initial = calibration.bootstrap_accelerometer(&samples).unwrap();
        let reading = initial.unbias_normalize(samples[0].data());
        assert!((reading.norm() - G).abs() < 1e-9);

        let too_short = &samples[..5];
        assert!(matches!(
            calibration.bootstrap_accelerometer(too_short),
            Err(CalibrationError::InsufficientSamples {
                found: 5,
                required: 10
            })
        ));
    }

    #[test]
    fn test_failed_call_clears_previous_result() {
        let settings = CalibrationSettings {
            num_init_samples: 1,
            interval_num_samples: 1,
            ..CalibrationSettings::new(G)
        };
        let mut calibration = MultiPosCalibration::new(settings).unwrap();

        let truth = true_acc();
        let samples: Vec<_> = directions()
            .into_iter()
            .enumerate()
            .map(|(i, d)| TriadSample::new(i as f64, raw_from(&truth, d * G)))
            .collect();
        let ids: Vec<i32> = (0..samples.len() as i32).collect();
        assert!(calibration.calibrate_accelerometer(&samples, &ids).is_ok());
        assert!(calibration.result().is_some());

        let unassigned = vec![UNASSIGNED_INTERVAL; samples.len()];
        assert!(calibration.calibrate_accelerometer(&samples, &unassigned).is_err());
        assert!(calibration.result().is_none());
    }

    #[test]
    fn test_length_mismatch() {
        let mut calibration = MultiPosCalibration::new(CalibrationSettings::new(G)).unwrap();
        let samples = vec![TriadSample::from_xyz(0.0, 0.0, 0.0, G); 3];
        assert!(matches!(
            calibration.calibrate_accelerometer(&samples, &[0, 0]),
            Err(CalibrationError::LengthMismatch {
                samples: 3,
                labels: 2
            })
        ));
    }
}
