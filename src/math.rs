//! Gyroscope integration utilities

use nalgebra::{Quaternion, UnitQuaternion, Vector3};

use crate::types::{Real, TriadSample};

/// Advance an orientation by one gyroscope sample period
///
/// Fourth order Runge-Kutta integration of `q' = 0.5 * q * (0, w)`, with the
/// body rate `w` interpolated linearly from `w0` to `w1` over `dt`. Rates
/// are in radians per second.
pub fn quaternion_rk4_step<T: Real>(
    q: &UnitQuaternion<T>,
    w0: &Vector3<T>,
    w1: &Vector3<T>,
    dt: T,
) -> UnitQuaternion<T> {
    let half: T = nalgebra::convert(0.5);
    let two: T = nalgebra::convert(2.0);
    let six: T = nalgebra::convert(6.0);

    let derivative =
        |q: &Quaternion<T>, w: &Vector3<T>| q * Quaternion::from_imag(*w) * half;
    let w_mid = (w0 + w1) * half;
    let q0 = *q.quaternion();

    let k1 = derivative(&q0, w0);
    let k2 = derivative(&(q0 + k1 * (dt * half)), &w_mid);
    let k3 = derivative(&(q0 + k2 * (dt * half)), &w_mid);
    let k4 = derivative(&(q0 + k3 * dt), w1);

    UnitQuaternion::new_normalize(q0 + (k1 + k2 * two + k3 * two + k4) * (dt / six))
}

/// Rotation accumulated over a sequence of gyroscope samples
///
/// Integrates every consecutive pair of samples, using `period` as the step
/// or, when `None`, the difference between the sample timestamps. The
/// result maps vectors from the frame of the last sample to the frame of the
/// first one. Fewer than two samples give the identity.
///
/// # Example
/// ```
/// use imu_multipos::{TriadSample, integrate_gyro_interval};
///
/// // Quarter turn about Z over one second
/// let rate = core::f64::consts::FRAC_PI_2;
/// let samples: Vec<_> = (0..=100)
///     .map(|i| TriadSample::from_xyz(i as f64 * 0.01, 0.0, 0.0, rate))
///     .collect();
///
/// let rotation = integrate_gyro_interval(&samples, Some(0.01));
/// assert!((rotation.angle() - rate).abs() < 1e-9);
/// ```
pub fn integrate_gyro_interval<T: Real>(
    samples: &[TriadSample<T>],
    period: Option<T>,
) -> UnitQuaternion<T> {
    integrate_gyro_samples(samples.iter().copied(), period)
}

pub(crate) fn integrate_gyro_samples<T, I>(samples: I, period: Option<T>) -> UnitQuaternion<T>
where
    T: Real,
    I: IntoIterator<Item = TriadSample<T>>,
{
    let mut samples = samples.into_iter();
    let Some(mut previous) = samples.next() else {
        return UnitQuaternion::identity();
    };

    let mut orientation = UnitQuaternion::identity();
    for sample in samples {
        let dt = period.unwrap_or(sample.timestamp() - previous.timestamp());
        orientation = quaternion_rk4_step(&orientation, previous.data(), sample.data(), dt);
        previous = sample;
    }
    orientation
}
