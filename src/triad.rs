//! Calibrated triad model: misalignment, scale and bias of a 3-axis sensor
//!
//! Given a raw reading `X`, the calibrated reading is
//!
//! ```text
//! X' = T * K * (X - B)
//! ```
//!
//! with the misalignment matrix `T`, the diagonal scale matrix `K` and the
//! bias vector `B`:
//!
//! ```text
//!     [    1     -mis_yz   mis_zy  ]        [ s_x   0    0  ]        [ b_x ]
//! T = [  mis_xz     1     -mis_zx  ]    K = [  0   s_y   0  ]    B = [ b_y ]
//!     [ -mis_xy   mis_yx     1     ]        [  0    0   s_z ]        [ b_z ]
//! ```
//!
//! In the "body frame" case the lower triangle of `T` is zero, which is the
//! form the accelerometer calibration estimates.

use core::fmt;
use core::str::FromStr;
use std::fs;
use std::path::Path;

use nalgebra::{Matrix3, Vector3};

use crate::error::{CalibrationError, Result};
use crate::types::{Real, TriadSample};

/// Number of values in a calibration file: `T` (9), `K` (9), `B` (3)
const FILE_VALUE_COUNT: usize = 21;

/// The six off-diagonal misalignment terms of `T`
///
/// # Example
/// ```
/// use imu_multipos::Misalignment;
///
/// let body = Misalignment::body_frame(0.01, -0.02, 0.005);
/// let t = body.matrix();
/// assert_eq!(t[(0, 1)], -0.01);
/// assert_eq!(t[(1, 0)], 0.0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Misalignment<T: Real> {
    pub yz: T,
    pub zy: T,
    pub zx: T,
    pub xz: T,
    pub xy: T,
    pub yx: T,
}

impl<T: Real> Misalignment<T> {
    /// Upper triangular misalignment, the lower triangle terms are zero
    pub fn body_frame(yz: T, zy: T, zx: T) -> Self {
        Self {
            yz,
            zy,
            zx,
            ..Self::default()
        }
    }

    /// Build the misalignment matrix `T`
    pub fn matrix(&self) -> Matrix3<T> {
        let one = T::one();
        Matrix3::new(
            one, -self.yz, self.zy, //
            self.xz, one, -self.zx, //
            -self.xy, self.yx, one,
        )
    }
}

impl<T: Real> Default for Misalignment<T> {
    fn default() -> Self {
        let zero = T::zero();
        Self {
            yz: zero,
            zy: zero,
            zx: zero,
            xz: zero,
            xy: zero,
            yx: zero,
        }
    }
}

/// Misalignment, scale and bias of a 3-axis sensor
///
/// The product `T * K` is cached; every constructor and mutator refreshes
/// it before returning.
///
/// # Example
/// ```
/// use nalgebra::Vector3;
/// use imu_multipos::{CalibratedTriad, Misalignment};
///
/// let triad = CalibratedTriad::new(
///     Misalignment::default(),
///     Vector3::new(2.0, 2.0, 2.0),
///     Vector3::new(1.0, 0.0, 0.0),
/// );
///
/// let raw = Vector3::new(2.0, 1.0, 0.5);
/// assert_eq!(triad.unbias(&raw), Vector3::new(1.0, 1.0, 0.5));
/// assert_eq!(triad.normalize(&raw), Vector3::new(4.0, 2.0, 1.0));
/// assert_eq!(triad.unbias_normalize(&raw), Vector3::new(2.0, 2.0, 1.0));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct CalibratedTriad<T: Real> {
    misalignment: Matrix3<T>,
    scale: Matrix3<T>,
    bias: Vector3<T>,
    /// Cached `misalignment * scale`
    transform: Matrix3<T>,
}

impl<T: Real> CalibratedTriad<T> {
    pub fn new(misalignment: Misalignment<T>, scale: Vector3<T>, bias: Vector3<T>) -> Self {
        Self::from_matrices(misalignment.matrix(), Matrix3::from_diagonal(&scale), bias)
    }

    /// Build a triad from explicit `T`, `K` and `B`
    ///
    /// The matrices are taken as given, which is how calibration files are
    /// read back.
    pub fn from_matrices(misalignment: Matrix3<T>, scale: Matrix3<T>, bias: Vector3<T>) -> Self {
        Self {
            misalignment,
            scale,
            bias,
            transform: misalignment * scale,
        }
    }

    pub fn mis_yz(&self) -> T {
        -self.misalignment[(0, 1)]
    }

    pub fn mis_zy(&self) -> T {
        self.misalignment[(0, 2)]
    }

    pub fn mis_zx(&self) -> T {
        -self.misalignment[(1, 2)]
    }

    pub fn mis_xz(&self) -> T {
        self.misalignment[(1, 0)]
    }

    pub fn mis_xy(&self) -> T {
        -self.misalignment[(2, 0)]
    }

    pub fn mis_yx(&self) -> T {
        self.misalignment[(2, 1)]
    }

    /// All six misalignment terms
    pub fn misalignment(&self) -> Misalignment<T> {
        Misalignment {
            yz: self.mis_yz(),
            zy: self.mis_zy(),
            zx: self.mis_zx(),
            xz: self.mis_xz(),
            xy: self.mis_xy(),
            yx: self.mis_yx(),
        }
    }

    pub fn scale_x(&self) -> T {
        self.scale[(0, 0)]
    }

    pub fn scale_y(&self) -> T {
        self.scale[(1, 1)]
    }

    pub fn scale_z(&self) -> T {
        self.scale[(2, 2)]
    }

    /// Diagonal of the scale matrix
    pub fn scale(&self) -> Vector3<T> {
        self.scale.diagonal()
    }

    pub fn bias_x(&self) -> T {
        self.bias.x
    }

    pub fn bias_y(&self) -> T {
        self.bias.y
    }

    pub fn bias_z(&self) -> T {
        self.bias.z
    }

    pub fn misalignment_matrix(&self) -> &Matrix3<T> {
        &self.misalignment
    }

    pub fn scale_matrix(&self) -> &Matrix3<T> {
        &self.scale
    }

    pub fn bias_vector(&self) -> &Vector3<T> {
        &self.bias
    }

    /// The combined transform `T * K`
    pub fn transform_matrix(&self) -> &Matrix3<T> {
        &self.transform
    }

    /// Copy of this triad with a new per-axis scale
    pub fn with_scale(&self, scale: Vector3<T>) -> Self {
        Self::from_matrices(self.misalignment, Matrix3::from_diagonal(&scale), self.bias)
    }

    /// Copy of this triad with a new bias
    pub fn with_bias(&self, bias: Vector3<T>) -> Self {
        Self::from_matrices(self.misalignment, self.scale, bias)
    }

    /// Replace the per-axis scale, refreshing the cached transform
    pub fn set_scale(&mut self, scale: Vector3<T>) {
        *self = self.with_scale(scale);
    }

    /// Replace the bias
    pub fn set_bias(&mut self, bias: Vector3<T>) {
        self.bias = bias;
    }

    /// Apply scale and misalignment correction only: `T * K * X`
    pub fn normalize(&self, raw: &Vector3<T>) -> Vector3<T> {
        self.transform * raw
    }

    /// Full correction: `T * K * (X - B)`
    pub fn unbias_normalize(&self, raw: &Vector3<T>) -> Vector3<T> {
        self.transform * (raw - self.bias)
    }

    /// Bias removal only: `X - B`
    pub fn unbias(&self, raw: &Vector3<T>) -> Vector3<T> {
        raw - self.bias
    }

    pub fn normalize_sample(&self, raw: &TriadSample<T>) -> TriadSample<T> {
        TriadSample::new(raw.timestamp(), self.normalize(raw.data()))
    }

    pub fn unbias_normalize_sample(&self, raw: &TriadSample<T>) -> TriadSample<T> {
        TriadSample::new(raw.timestamp(), self.unbias_normalize(raw.data()))
    }

    pub fn unbias_sample(&self, raw: &TriadSample<T>) -> TriadSample<T> {
        TriadSample::new(raw.timestamp(), self.unbias(raw.data()))
    }

    /// Write the calibration to a text file
    ///
    /// Layout: the rows of `T`, a blank line, the rows of `K`, a blank line,
    /// then the bias as a column.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        fs::write(path, self.to_file_text()).map_err(|source| CalibrationError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Read a calibration written by [`CalibratedTriad::save`]
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| CalibrationError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        text.parse()
    }

    /// Calibration file contents, see [`CalibratedTriad::save`]
    pub fn to_file_text(&self) -> String {
        let mut text = String::new();
        for matrix in [&self.misalignment, &self.scale] {
            for row in matrix.row_iter() {
                text.push_str(&format!("{} {} {}\n", row[0], row[1], row[2]));
            }
            text.push('\n');
        }
        for value in self.bias.iter() {
            text.push_str(&format!("{value}\n"));
        }
        text.push('\n');
        text
    }
}

impl<T: Real> Default for CalibratedTriad<T> {
    fn default() -> Self {
        Self::new(
            Misalignment::default(),
            Vector3::repeat(T::one()),
            Vector3::zeros(),
        )
    }
}

impl<T: Real> FromStr for CalibratedTriad<T> {
    type Err = CalibrationError;

    fn from_str(text: &str) -> Result<Self> {
        let mut values = Vec::with_capacity(FILE_VALUE_COUNT);
        for token in text.split_whitespace() {
            if values.len() == FILE_VALUE_COUNT {
                return Err(CalibrationError::Parse(format!(
                    "unexpected trailing value '{token}'"
                )));
            }
            let value = token
                .parse::<T>()
                .map_err(|_| CalibrationError::Parse(format!("invalid number '{token}'")))?;
            values.push(value);
        }
        if values.len() < FILE_VALUE_COUNT {
            return Err(CalibrationError::Parse(format!(
                "expected {FILE_VALUE_COUNT} values, found {}",
                values.len()
            )));
        }

        let misalignment = Matrix3::from_row_slice(&values[0..9]);
        let scale = Matrix3::from_row_slice(&values[9..18]);
        let bias = Vector3::from_column_slice(&values[18..21]);
        Ok(Self::from_matrices(misalignment, scale, bias))
    }
}

impl<T: Real> fmt::Display for CalibratedTriad<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Misalignment Matrix")?;
        writeln!(f, "{}", self.misalignment)?;
        writeln!(f, "Scale Matrix")?;
        writeln!(f, "{}", self.scale)?;
        writeln!(f, "Bias Vector")?;
        write!(f, "{}", self.bias)
    }
}
