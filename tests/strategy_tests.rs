use std::time::{Duration, Instant};

use nalgebra::{Matrix4, UnitQuaternion, Vector3};
use orientation_fusion::{
    ComplementaryFusion, FilterKind, FusionSettings, KalmanFusion, MeasurementModel,
    ProcessModel, QuaternionExt, STANDARD_GRAVITY, euler_to_quaternion,
    orientation_from_accel_mag,
};
use rand::prelude::*;
use rand_pcg::Pcg64;

const TEN_MS: i64 = 10_000_000;
const FIELD: Vector3<f32> = Vector3::new(0.0, 22.0, -40.0);

/// Sensor readings of a device at rest in `pose`
fn readings(pose: &UnitQuaternion<f32>) -> (Vector3<f32>, Vector3<f32>) {
    let accel = pose.inverse_transform_vector(&Vector3::new(0.0, 0.0, STANDARD_GRAVITY));
    let mag = pose.inverse_transform_vector(&FIELD);
    (accel, mag)
}

fn random_pose(rng: &mut Pcg64) -> UnitQuaternion<f32> {
    euler_to_quaternion(Vector3::new(
        rng.random_range(-3.0..3.0),
        rng.random_range(-1.2..1.2),
        rng.random_range(-1.2..1.2),
    ))
}

fn noise(rng: &mut Pcg64, amplitude: f32) -> Vector3<f32> {
    Vector3::new(
        rng.random_range(-amplitude..amplitude),
        rng.random_range(-amplitude..amplitude),
        rng.random_range(-amplitude..amplitude),
    )
}

#[test]
fn test_accel_mag_recovers_random_poses() {
    let mut rng = Pcg64::seed_from_u64(11);

    for _ in 0..200 {
        let pose = random_pose(&mut rng);
        let (accel, mag) = readings(&pose);
        let estimate = orientation_from_accel_mag(accel, mag).unwrap();
        assert!(estimate.angle_to(&pose) < 1e-3, "{:?}", pose.to_euler());
    }
}

/// Both strategies pull a wrong starting orientation onto the true pose
#[test]
fn test_strategies_converge_from_wrong_base() {
    let mut rng = Pcg64::seed_from_u64(5);

    for _ in 0..20 {
        let pose = random_pose(&mut rng);
        let (accel, mag) = readings(&pose);
        let wrong = pose * UnitQuaternion::from_axis_angle(&Vector3::x_axis(), 0.6);

        let mut complementary = ComplementaryFusion::new(0.18);
        complementary.set_base_orientation(wrong);
        let mut kalman = KalmanFusion::new();
        kalman.set_base_orientation(wrong);

        for _ in 0..400 {
            complementary.step(Vector3::zeros(), TEN_MS, accel, mag).unwrap();
            kalman.step(Vector3::zeros(), TEN_MS, accel, mag).unwrap();
        }

        assert!(complementary.orientation().unwrap().angle_to(&pose) < 1e-3);
        assert!(kalman.orientation().unwrap().angle_to(&pose) < 1e-3);
    }
}

/// A rotating device with truthful sensors stays on track
#[test]
fn test_strategies_track_rotation() {
    let rate = Vector3::new(0.2, -0.1, 0.4);
    let dt = 0.01;
    let mut pose = euler_to_quaternion(Vector3::new(0.3, 0.2, -0.1));

    let mut complementary = ComplementaryFusion::new(0.18);
    complementary.set_base_orientation(pose);
    let mut kalman = KalmanFusion::new();
    kalman.set_base_orientation(pose);

    for _ in 0..300 {
        pose *= UnitQuaternion::from_scaled_axis(rate * dt);
        let (accel, mag) = readings(&pose);
        complementary.step(rate, TEN_MS, accel, mag).unwrap();
        kalman.step(rate, TEN_MS, accel, mag).unwrap();
    }

    assert!(complementary.orientation().unwrap().angle_to(&pose) < 1e-3);
    // The identity process carries the previous state into each prediction,
    // so the estimate trails a moving pose by a fraction of a step
    assert!(kalman.orientation().unwrap().angle_to(&pose) < 1e-2);
}

/// Gyroscope bias is removed by the accelerometer and magnetometer
#[test]
fn test_strategies_bound_gyroscope_drift() {
    let bias = Vector3::new(0.02, -0.03, 0.05);
    let pose = euler_to_quaternion(Vector3::new(-1.0, 0.4, 0.2));
    let (accel, mag) = readings(&pose);

    let mut complementary = ComplementaryFusion::new(0.18);
    complementary.set_base_orientation(pose);
    let mut kalman = KalmanFusion::new();
    kalman.set_base_orientation(pose);

    for _ in 0..3000 {
        complementary.step(bias, TEN_MS, accel, mag).unwrap();
        kalman.step(bias, TEN_MS, accel, mag).unwrap();
    }

    // Thirty seconds of bias alone would be several degrees
    assert!(complementary.orientation().unwrap().angle_to(&pose) < 0.02);
    assert!(kalman.orientation().unwrap().angle_to(&pose) < 0.02);
}

#[test]
fn test_kalman_with_custom_models() {
    let process = ProcessModel {
        process_noise: Matrix4::from_diagonal_element(0.001),
        ..Default::default()
    };
    let measurement = MeasurementModel::with_noise(1.0);
    let settings = FusionSettings::default();
    let mut kalman = KalmanFusion::with_models(process, measurement, settings.gyroscope_epsilon);

    let pose = euler_to_quaternion(Vector3::new(0.5, 0.0, 0.0));
    let (accel, mag) = readings(&pose);
    kalman.set_base_orientation(UnitQuaternion::identity());

    let first = kalman.step(Vector3::zeros(), TEN_MS, accel, mag).unwrap();
    // Distrusted measurement moves the estimate only part of the way
    assert!(first.angle_to(&pose) > 0.1, "angle {}", first.angle_to(&pose));

    for _ in 0..2000 {
        kalman.step(Vector3::zeros(), TEN_MS, accel, mag).unwrap();
    }
    assert!(kalman.orientation().unwrap().angle_to(&pose) < 1e-2);
}

#[test]
fn test_filters_reduce_noise() {
    let mut rng = Pcg64::seed_from_u64(21);
    let truth = Vector3::new(0.5, -1.0, 9.7);
    let period = Duration::from_millis(10);

    for kind in [FilterKind::LowPass, FilterKind::Mean, FilterKind::Median] {
        let mut filter = kind.build(0.5);
        let start = Instant::now();
        let mut raw_error = 0.0;
        let mut filtered_error = 0.0;

        for i in 0..1000u32 {
            let sample = truth + noise(&mut rng, 1.0);
            let output = filter.filter_at(sample, start + period * i);
            if i >= 200 {
                raw_error += (sample - truth).norm();
                filtered_error += (output - truth).norm();
            }
        }

        assert!(
            filtered_error < raw_error * 0.5,
            "{:?}: filtered {} raw {}",
            kind,
            filtered_error,
            raw_error
        );
    }
}

#[test]
fn test_filters_zero_time_constant_is_identity() {
    let mut rng = Pcg64::seed_from_u64(8);
    let period = Duration::from_millis(10);

    for kind in [FilterKind::Mean, FilterKind::Median] {
        let mut filter = kind.build(0.0);
        let start = Instant::now();
        for i in 0..100u32 {
            let sample = noise(&mut rng, 5.0);
            assert_eq!(filter.filter_at(sample, start + period * i), sample, "{:?}", kind);
        }
    }
}
