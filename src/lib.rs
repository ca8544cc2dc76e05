//! [![license]](https://opensource.org/licenses/MIT)
//!
//! [license]: https://img.shields.io/badge/License-MIT-blue.svg?style=for-the-badge&labelColor=555555
//!
//! Orientation Fusion - device orientation from accelerometer, magnetometer and gyroscope
//!
//! This library estimates the 3-D orientation of a device from three noisy,
//! independently clocked sensor streams. Two strategies share one interface:
//! a quaternion complementary filter and a quaternion-state Kalman filter.
//!
//! # Features
//!
//! - Complementary fusion blending gyroscope integration with an
//!   accelerometer/magnetometer estimate
//! - Kalman fusion on a fixed-period worker thread, decoupled from sensor timing
//! - Orchestrator that synchronises the streams and establishes the base orientation
//! - Adaptive low-pass, mean and median smoothing filters
//! - Gravity, linear acceleration and tilt-compensated compass helpers
//! - Singularity-safe `[azimuth, pitch, roll]` output
//!
//! # Conventions
//!
//! Device frame X right, Y towards the top edge, Z out of the screen; world
//! frame East-North-Up. Accelerations are in m/s², magnetic fields in µT,
//! angular rates in rad/s and timestamps in nanoseconds.
//!
//! # Quick Start
//!
//! ```rust
//! use nalgebra::Vector3;
//! use orientation_fusion::{FusionOrchestrator, FusionSettings};
//!
//! let mut fusion = FusionOrchestrator::new(FusionSettings::default()).unwrap();
//!
//! // Sensor readings
//! let accelerometer = Vector3::new(0.0, 0.0, 9.81);  // m/s²
//! let magnetometer = Vector3::new(0.0, 22.0, -40.0); // µT
//! let gyroscope = Vector3::new(0.0, 0.0, 0.0);       // rad/s
//!
//! fusion.on_acceleration(accelerometer);
//! fusion.on_magnetic(magnetometer);
//! fusion.on_gyroscope(gyroscope, 0).unwrap();
//! fusion.on_gyroscope(gyroscope, 10_000_000).unwrap(); // 10 ms later
//!
//! // [azimuth, pitch, roll] in radians
//! let euler = fusion.orientation().unwrap();
//! assert!(euler.norm() < 1e-4);
//! ```
//!
//! The library logs through [`tracing`] and installs no subscriber.

pub mod acceleration;
pub mod calibration;
pub mod compass;
pub mod complementary;
mod error;
pub mod filter;
mod gyroscope;
pub mod kalman;
mod math;
mod orchestrator;
mod types;
pub mod worker;

// Re-export all public types and functions
pub use acceleration::FilteredLinearAcceleration;
pub use calibration::CalibrationTransform;
pub use compass::calculate_heading;
pub use complementary::ComplementaryFusion;
pub use error::FusionError;
pub use filter::{
    FilterKind, LowPassFilter, MeanFilter, MedianFilter, SampleRateEstimator, SmoothingFilter,
};
pub use gyroscope::GyroscopeOrientation;
pub use kalman::{KalmanFilter, KalmanFusion, MeasurementModel, ProcessModel};
pub use math::{
    DEFAULT_GYROSCOPE_EPSILON, DEG_TO_RAD, NS_TO_S, QuaternionExt, RAD_TO_DEG, STANDARD_GRAVITY,
    Vector3Ext, euler_to_quaternion, integrate_gyroscope, orientation_from_accel_mag,
    quaternion_from_vector4, quaternion_to_euler, vector_from_slice,
};
pub use orchestrator::{FusionOrchestrator, Phase};
pub use types::*;
pub use worker::KalmanWorker;
