//! Quaternion-state Kalman filter
//!
//! The state is the four quaternion components `[w, x, y, z]`. The default
//! models treat the gyroscope-integrated quaternion as the control input of an
//! identity process and the accelerometer/magnetometer quaternion as a direct
//! measurement of the state. Since the state is only ever read back
//! normalised, its magnitude carries no meaning.

use nalgebra::{Matrix4, Quaternion, UnitQuaternion, Vector3, Vector4};
use tracing::debug;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::FusionError;
use crate::math::{
    QuaternionExt, align_hemisphere, integrate_gyroscope, orientation_from_accel_mag,
    quaternion_from_vector4,
};
use crate::types::{DEFAULT_NOISE_VARIANCE, FusionSettings, FusionState, interval_seconds};

/// Diagonal of the default initial error covariance
const INITIAL_COVARIANCE: f32 = 0.1;

/// State norm below which the read-back estimate is considered degenerate
const MIN_STATE_NORM: f32 = 1.0e-6;

/// Process side of the filter
///
/// `x = A x + B u`, `P = A P Aᵀ + Q`.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ProcessModel {
    /// State transition `A`
    pub transition: Matrix4<f32>,
    /// Control input `B`
    pub control: Matrix4<f32>,
    /// Process noise covariance `Q`
    pub process_noise: Matrix4<f32>,
    /// State after construction or reset
    pub initial_state: Vector4<f32>,
    /// Error covariance after construction or reset
    pub initial_covariance: Matrix4<f32>,
}

impl ProcessModel {
    /// Identity model with the given diagonal process noise
    pub fn with_noise(variance: f32) -> Self {
        Self {
            transition: Matrix4::identity(),
            control: Matrix4::identity(),
            process_noise: Matrix4::from_diagonal_element(variance),
            initial_state: Vector4::zeros(),
            initial_covariance: Matrix4::from_diagonal_element(INITIAL_COVARIANCE),
        }
    }
}

impl Default for ProcessModel {
    fn default() -> Self {
        Self::with_noise(DEFAULT_NOISE_VARIANCE)
    }
}

/// Measurement side of the filter
///
/// `z = H x + v` with `v ~ N(0, R)`.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MeasurementModel {
    /// Measurement matrix `H`
    pub measurement_matrix: Matrix4<f32>,
    /// Measurement noise covariance `R`
    pub measurement_noise: Matrix4<f32>,
}

impl MeasurementModel {
    /// Identity model with the given diagonal measurement noise
    pub fn with_noise(variance: f32) -> Self {
        Self {
            measurement_matrix: Matrix4::identity(),
            measurement_noise: Matrix4::from_diagonal_element(variance),
        }
    }
}

impl Default for MeasurementModel {
    fn default() -> Self {
        Self::with_noise(DEFAULT_NOISE_VARIANCE)
    }
}

/// Linear discrete Kalman filter over a 4-component state
#[derive(Debug, Clone, PartialEq)]
pub struct KalmanFilter {
    process: ProcessModel,
    measurement: MeasurementModel,
    state: Vector4<f32>,
    covariance: Matrix4<f32>,
}

impl KalmanFilter {
    /// Create a filter at the process model's initial state
    pub fn new(process: ProcessModel, measurement: MeasurementModel) -> Self {
        Self {
            state: process.initial_state,
            covariance: process.initial_covariance,
            process,
            measurement,
        }
    }

    /// Time update with control input `u`
    pub fn predict(&mut self, control: &Vector4<f32>) {
        let a = &self.process.transition;
        self.state = a * self.state + self.process.control * control;
        self.covariance = a * self.covariance * a.transpose() + self.process.process_noise;
    }

    /// Measurement update with observation `z`
    ///
    /// # Errors
    /// [`FusionError::SingularInnovation`] when `H P Hᵀ + R` cannot be
    /// inverted. The filter is left unchanged.
    pub fn correct(&mut self, measurement: &Vector4<f32>) -> Result<(), FusionError> {
        let h = &self.measurement.measurement_matrix;
        let innovation_covariance =
            h * self.covariance * h.transpose() + self.measurement.measurement_noise;
        let inverse = innovation_covariance
            .try_inverse()
            .ok_or(FusionError::SingularInnovation)?;

        let gain = self.covariance * h.transpose() * inverse;
        let innovation = measurement - h * self.state;

        self.state += gain * innovation;
        self.covariance = (Matrix4::identity() - gain * h) * self.covariance;
        Ok(())
    }

    /// State estimate
    pub fn state(&self) -> &Vector4<f32> {
        &self.state
    }

    /// Error covariance estimate
    pub fn covariance(&self) -> &Matrix4<f32> {
        &self.covariance
    }

    /// Overwrites the state, keeping the covariance
    pub fn set_state(&mut self, state: Vector4<f32>) {
        self.state = state;
    }

    /// Returns to the process model's initial state and covariance
    pub fn reset(&mut self) {
        self.state = self.process.initial_state;
        self.covariance = self.process.initial_covariance;
    }
}

/// Kalman fusion of gyroscope integration and accelerometer/magnetometer
/// orientation
///
/// Runs synchronously; [`crate::worker::KalmanWorker`] drives it from a
/// fixed-period thread. Each step integrates the gyroscope onto the current
/// estimate, feeds that quaternion as the prediction input and the accel/mag
/// quaternion as the measurement, then reads the state back normalised.
#[derive(Debug, Clone)]
pub struct KalmanFusion {
    filter: KalmanFilter,
    gyroscope_epsilon: f32,
    state: FusionState,
}

impl KalmanFusion {
    /// Create an uninitialised fusion with the default models
    pub fn new() -> Self {
        Self::with_settings(&FusionSettings::default())
    }

    /// Create an uninitialised fusion with identity models and the noise
    /// variances from `settings`
    pub fn with_settings(settings: &FusionSettings) -> Self {
        Self::with_models(
            ProcessModel::with_noise(settings.process_noise),
            MeasurementModel::with_noise(settings.measurement_noise),
            settings.gyroscope_epsilon,
        )
    }

    /// Create an uninitialised fusion with custom models
    pub fn with_models(
        process: ProcessModel,
        measurement: MeasurementModel,
        gyroscope_epsilon: f32,
    ) -> Self {
        Self {
            filter: KalmanFilter::new(process, measurement),
            gyroscope_epsilon,
            state: FusionState::default(),
        }
    }

    /// Installs the starting orientation and restarts the filter
    pub fn set_base_orientation(&mut self, base: UnitQuaternion<f32>) {
        self.filter.reset();
        self.state.initialize(base);
    }

    /// Whether a base orientation has been set
    pub fn is_initialized(&self) -> bool {
        self.state.is_initialized()
    }

    /// Current orientation estimate
    pub fn orientation(&self) -> Option<UnitQuaternion<f32>> {
        self.state.quaternion()
    }

    /// Underlying Kalman filter
    pub fn filter(&self) -> &KalmanFilter {
        &self.filter
    }

    /// Returns to the uninitialised state
    pub fn reset(&mut self) {
        self.filter.reset();
        self.state.reset();
    }

    /// Runs one predict/correct cycle over an interval of `dt_nanos`
    ///
    /// Without a usable accel/mag estimate the correction is skipped and the
    /// gyroscope integration becomes the estimate.
    ///
    /// # Errors
    /// - [`FusionError::NotInitialized`] before a base orientation is set
    /// - [`FusionError::InvalidTimeStep`] when `dt_nanos` is not positive
    /// - [`FusionError::SingularInnovation`] with a degenerate measurement model
    pub fn step(
        &mut self,
        gyroscope: Vector3<f32>,
        dt_nanos: i64,
        acceleration: Vector3<f32>,
        magnetic: Vector3<f32>,
    ) -> Result<UnitQuaternion<f32>, FusionError> {
        let current = self.state.require()?;
        let dt = interval_seconds(dt_nanos)?;

        let gyro = integrate_gyroscope(&current, gyroscope, dt, self.gyroscope_epsilon);

        let Some(accel_mag) = orientation_from_accel_mag(acceleration, magnetic) else {
            debug!(?acceleration, ?magnetic, "no accel/mag estimate, skipping correction");
            let magnitude = self.filter.state().norm().max(1.0);
            self.filter.set_state(gyro.to_vector4() * magnitude);
            self.state.set_quaternion(gyro);
            return Ok(gyro);
        };
        let measurement = align_hemisphere(&gyro, accel_mag);

        let mut filter = self.filter.clone();
        filter.predict(&gyro.to_vector4());
        filter.correct(&wxyz(&measurement))?;

        let estimate = quaternion_from_vector4(filter.state());
        let fused = if estimate.norm() > MIN_STATE_NORM {
            UnitQuaternion::from_quaternion(estimate)
        } else {
            gyro
        };

        self.filter = filter;
        self.state.set_quaternion(fused);
        Ok(fused)
    }
}

impl Default for KalmanFusion {
    fn default() -> Self {
        Self::new()
    }
}

fn wxyz(quaternion: &Quaternion<f32>) -> Vector4<f32> {
    Vector4::new(quaternion.w, quaternion.i, quaternion.j, quaternion.k)
}
