//! Static interval segmentation and per-interval statistics
//!
//! Interval ids are assigned to samples by an external static/motion
//! detector. This module groups consecutive samples that share an id into
//! [`Interval`]s and computes the statistics the calibration needs from them.
//!
//! # Example
//! ```
//! use imu_multipos::{Interval, UNASSIGNED_INTERVAL, detect_static_intervals};
//!
//! const S: i32 = UNASSIGNED_INTERVAL;
//! let intervals = detect_static_intervals(&[1, 1, 1, 2, 2, S, S, 3, 3, 3]).unwrap();
//!
//! assert_eq!(
//!     intervals,
//!     vec![
//!         Interval::new(0, 2).unwrap(),
//!         Interval::new(3, 4).unwrap(),
//!         Interval::new(7, 9).unwrap(),
//!     ]
//! );
//! ```

use nalgebra::Vector3;

use crate::error::{CalibrationError, Result};
use crate::types::{Interval, Real, TriadSample, UNASSIGNED_INTERVAL};

/// Group consecutive samples sharing an interval id into intervals
///
/// Samples labelled [`UNASSIGNED_INTERVAL`] are ignored when deciding
/// boundaries: they neither open nor extend an interval, and an open interval
/// stays open until a sample with a different id is seen. Any other negative
/// id is reported as [`CalibrationError::InvalidIntervalId`].
///
/// The returned intervals are ordered and do not overlap. An empty input
/// gives an empty list.
pub fn detect_static_intervals(interval_ids: &[i32]) -> Result<Vec<Interval>> {
    let mut intervals = Vec::new();
    // Start and end of the open run
    let mut current: Option<(usize, usize)> = None;
    let mut previous_id = UNASSIGNED_INTERVAL;

    for (index, &id) in interval_ids.iter().enumerate() {
        if id == UNASSIGNED_INTERVAL {
            continue;
        }
        if id < 0 {
            return Err(CalibrationError::InvalidIntervalId { index, id });
        }

        match current.as_mut() {
            Some((_, end)) if id == previous_id => *end = index,
            _ => {
                intervals.extend(current.and_then(|(start, end)| Interval::new(start, end)));
                current = Some((index, index));
                previous_id = id;
            }
        }
    }
    intervals.extend(current.and_then(|(start, end)| Interval::new(start, end)));

    Ok(intervals)
}

/// The `num_samples` long window at the centre of `interval`
///
/// Returns `None` when the interval is shorter than `num_samples`.
///
/// # Example
/// ```
/// use imu_multipos::{Interval, centered_window};
///
/// let interval = Interval::new(10, 19).unwrap();
/// assert_eq!(centered_window(&interval, 4), Interval::new(13, 16));
/// assert_eq!(centered_window(&interval, 11), None);
/// ```
pub fn centered_window(interval: &Interval, num_samples: usize) -> Option<Interval> {
    if num_samples == 0 || interval.len() < num_samples {
        return None;
    }
    let start = interval.start() + (interval.len() - num_samples) / 2;
    Interval::new(start, start + num_samples - 1)
}

/// Per-axis mean of the samples in `interval`
///
/// The interval must lie inside `samples`.
pub fn samples_mean<T: Real>(samples: &[TriadSample<T>], interval: &Interval) -> Vector3<T> {
    let window = &samples[interval.start()..=interval.end()];
    let sum = window
        .iter()
        .fold(Vector3::zeros(), |acc, sample| acc + sample.data());
    sum / count_as::<T>(window.len())
}

/// Per-axis unbiased sample variance of the samples in `interval`
///
/// A single-sample interval has zero variance.
pub fn samples_variance<T: Real>(samples: &[TriadSample<T>], interval: &Interval) -> Vector3<T> {
    if interval.len() < 2 {
        return Vector3::zeros();
    }
    let mean = samples_mean(samples, interval);
    let window = &samples[interval.start()..=interval.end()];
    let squares = window.iter().fold(Vector3::zeros(), |acc, sample| {
        let diff = sample.data() - mean;
        acc + diff.component_mul(&diff)
    });
    squares / count_as::<T>(window.len() - 1)
}

pub(crate) fn count_as<T: Real>(count: usize) -> T {
    nalgebra::convert(count as f64)
}
