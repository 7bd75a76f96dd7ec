//! Synthetic multi-position logs with known sensor errors
#![allow(dead_code)]

use imu_multipos::{
    CalibratedTriad, CalibrationSettings, Misalignment, TriadSample, UNASSIGNED_INTERVAL,
    quaternion_rk4_step,
};
use nalgebra::{UnitQuaternion, Vector3};
use rand::prelude::*;
use rand_pcg::Pcg64;
use std::f64::consts::PI;

pub const G: f64 = 9.81;
pub const DT: f64 = 0.01; // 100Hz sample rate
pub const INIT_SAMPLES: usize = 300;
pub const MOTION_SAMPLES: usize = 100;
pub const STATIC_SAMPLES: usize = 150;

/// Uniform noise half-widths added to the raw readings
#[derive(Debug, Clone, Copy)]
pub struct Noise {
    pub acc: f64,
    pub gyro: f64,
}

/// Raw accelerometer and gyroscope logs sharing one time base
pub struct SyntheticLog {
    pub acc: Vec<TriadSample<f64>>,
    pub gyro: Vec<TriadSample<f64>>,
    pub interval_ids: Vec<i32>,
}

impl SyntheticLog {
    /// Static intervals in the log: the leading one plus one per pose
    pub fn num_static_intervals(&self) -> usize {
        1 + (self.acc.len() - INIT_SAMPLES) / (MOTION_SAMPLES + STATIC_SAMPLES)
    }
}

pub fn true_acc_calibration() -> CalibratedTriad<f64> {
    CalibratedTriad::new(
        Misalignment::body_frame(0.012, -0.008, 0.015),
        Vector3::new(1.02, 0.97, 1.01),
        Vector3::new(0.25, -0.18, 0.31),
    )
}

pub fn true_gyro_calibration() -> CalibratedTriad<f64> {
    CalibratedTriad::new(
        Misalignment {
            yz: 0.011,
            zy: -0.007,
            zx: 0.009,
            xz: -0.012,
            xy: 0.006,
            yx: 0.010,
        },
        Vector3::new(1.03, 0.96, 1.02),
        Vector3::new(0.02, -0.01, 0.015),
    )
}

/// Settings matching the synthetic log layout
pub fn settings() -> CalibrationSettings<f64> {
    CalibrationSettings {
        num_init_samples: 200,
        interval_num_samples: 100,
        gyro_data_period: Some(DT),
        ..CalibrationSettings::new(G)
    }
}

/// Raw reading that `calibration` maps onto `calibrated`
pub fn raw_reading(calibration: &CalibratedTriad<f64>, calibrated: &Vector3<f64>) -> Vector3<f64> {
    let inverse = calibration
        .transform_matrix()
        .try_inverse()
        .expect("calibration transform is invertible");
    inverse * calibrated + calibration.bias_vector()
}

/// Simulate a leading static period followed by `num_poses` moves, each a
/// smooth rotation about a random axis and a static pause
pub fn generate_log(seed: u64, num_poses: usize, noise: Option<Noise>) -> SyntheticLog {
    let mut rng = Pcg64::seed_from_u64(seed);

    let mut rates = vec![Vector3::zeros(); INIT_SAMPLES];
    let mut interval_ids = vec![0; INIT_SAMPLES];
    let duration = MOTION_SAMPLES as f64 * DT;
    for pose in 1..=num_poses {
        let axis = random_axis(&mut rng);
        let angle = rng.random_range(60.0f64..150.0).to_radians();
        for i in 0..MOTION_SAMPLES {
            let t = i as f64 * DT;
            // Half-sine rate profile integrating to `angle`
            let magnitude = angle * PI / (2.0 * duration) * (PI * t / duration).sin();
            rates.push(axis * magnitude);
            interval_ids.push(UNASSIGNED_INTERVAL);
        }
        rates.extend(std::iter::repeat_n(Vector3::zeros(), STATIC_SAMPLES));
        interval_ids.extend(std::iter::repeat_n(pose as i32, STATIC_SAMPLES));
    }

    let acc_truth = true_acc_calibration();
    let gyro_truth = true_gyro_calibration();
    let up = Vector3::new(0.0, 0.0, G);

    let mut orientation = UnitQuaternion::identity();
    let mut acc = Vec::with_capacity(rates.len());
    let mut gyro = Vec::with_capacity(rates.len());
    for (k, rate) in rates.iter().enumerate() {
        if k > 0 {
            orientation = quaternion_rk4_step(&orientation, &rates[k - 1], rate, DT);
        }
        let t = k as f64 * DT;
        let gravity = orientation.inverse_transform_vector(&up);

        let (acc_noise, gyro_noise) = match noise {
            Some(noise) => (
                jitter(&mut rng, noise.acc),
                jitter(&mut rng, noise.gyro),
            ),
            None => (Vector3::zeros(), Vector3::zeros()),
        };
        acc.push(TriadSample::new(
            t,
            raw_reading(&acc_truth, &gravity) + acc_noise,
        ));
        gyro.push(TriadSample::new(
            t,
            raw_reading(&gyro_truth, rate) + gyro_noise,
        ));
    }

    SyntheticLog {
        acc,
        gyro,
        interval_ids,
    }
}

fn random_axis(rng: &mut Pcg64) -> Vector3<f64> {
    loop {
        let v = Vector3::new(
            rng.random_range(-1.0..1.0),
            rng.random_range(-1.0..1.0),
            rng.random_range(-1.0..1.0),
        );
        let norm = v.norm();
        if norm > 0.1 && norm <= 1.0 {
            return v / norm;
        }
    }
}

fn jitter(rng: &mut Pcg64, amplitude: f64) -> Vector3<f64> {
    if amplitude == 0.0 {
        return Vector3::zeros();
    }
    Vector3::new(
        rng.random_range(-amplitude..amplitude),
        rng.random_range(-amplitude..amplitude),
        rng.random_range(-amplitude..amplitude),
    )
}

/// Assert every parameter of `actual` is within `tolerance` of `expected`
pub fn assert_triad_close(
    actual: &CalibratedTriad<f64>,
    expected: &CalibratedTriad<f64>,
    tolerance: f64,
) {
    let misalignment = (actual.misalignment_matrix() - expected.misalignment_matrix()).amax();
    let scale = (actual.scale_matrix() - expected.scale_matrix()).amax();
    let bias = (actual.bias_vector() - expected.bias_vector()).amax();

    assert!(
        misalignment < tolerance && scale < tolerance && bias < tolerance,
        "misalignment error {misalignment:e}, scale error {scale:e}, bias error {bias:e}\n\
         actual:\n{actual}\nexpected:\n{expected}"
    );
}
