//! Error type shared by every fallible calibration operation

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failures reported by segmentation, calibration and calibration file I/O
#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("cannot access calibration file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed calibration data: {0}")]
    Parse(String),
    #[error("sample {index} carries invalid interval id {id}")]
    InvalidIntervalId { index: usize, id: i32 },
    #[error("{samples} samples but {labels} interval ids")]
    LengthMismatch { samples: usize, labels: usize },
    #[error("found {found} usable static intervals, at least {required} required")]
    InsufficientIntervals { found: usize, required: usize },
    #[error("found {found} samples, at least {required} required")]
    InsufficientSamples { found: usize, required: usize },
    #[error("static orientations do not span three dimensions")]
    DegenerateOrientations,
    #[error("solver did not converge within {iterations} iterations")]
    NotConverged { iterations: usize },
    #[error("solver produced a non-finite cost")]
    NumericalFailure,
    #[error("invalid settings: {0}")]
    InvalidSettings(String),
}

pub type Result<T> = core::result::Result<T, CalibrationError>;
