//! Quaternion complementary filter

use nalgebra::{UnitQuaternion, Vector3};
use tracing::debug;

use crate::error::FusionError;
use crate::math::{align_hemisphere, integrate_gyroscope, orientation_from_accel_mag};
use crate::types::{FusionSettings, FusionState, interval_seconds, validate_time_constant};

/// Weight given to the gyroscope estimate for a step of `dt` seconds
///
/// `alpha = tau / (tau + dt)`. For a fixed `dt` it grows monotonically towards
/// 1 as the time constant grows.
///
/// # Example
/// ```
/// use orientation_fusion::complementary::blend_weight;
///
/// assert!((blend_weight(0.18, 0.02) - 0.9).abs() < 1e-6);
/// assert!(blend_weight(1.0, 0.02) > blend_weight(0.18, 0.02));
/// ```
pub fn blend_weight(time_constant: f32, dt: f32) -> f32 {
    time_constant / (time_constant + dt)
}

/// Complementary fusion of gyroscope integration and accelerometer/magnetometer
/// orientation
///
/// Each step integrates the angular rate onto the current orientation and
/// blends the result with the absolute accel/mag estimate:
/// `normalize(alpha * q_gyro + (1 - alpha) * q_accel_mag)`. The gyroscope
/// dominates at short time scales and the accel/mag estimate removes drift at
/// long ones.
///
/// # Example
/// ```
/// use nalgebra::Vector3;
/// use orientation_fusion::{ComplementaryFusion, orientation_from_accel_mag};
///
/// let accel = Vector3::new(0.0, 0.0, 9.81);
/// let mag = Vector3::new(0.0, 22.0, -40.0);
///
/// let mut fusion = ComplementaryFusion::new(0.18);
/// fusion.set_base_orientation(orientation_from_accel_mag(accel, mag).unwrap());
///
/// let q = fusion.step(Vector3::zeros(), 10_000_000, accel, mag).unwrap();
/// assert!(q.angle() < 1e-5);
/// ```
#[derive(Debug, Clone)]
pub struct ComplementaryFusion {
    time_constant: f32,
    gyroscope_epsilon: f32,
    state: FusionState,
}

impl ComplementaryFusion {
    /// Create an uninitialised filter with the given time constant in seconds
    pub fn new(time_constant: f32) -> Self {
        Self::with_settings(&FusionSettings {
            time_constant,
            ..Default::default()
        })
    }

    /// Create an uninitialised filter from fusion settings
    pub fn with_settings(settings: &FusionSettings) -> Self {
        Self {
            time_constant: settings.time_constant,
            gyroscope_epsilon: settings.gyroscope_epsilon,
            state: FusionState::default(),
        }
    }

    /// Time constant in seconds
    pub fn time_constant(&self) -> f32 {
        self.time_constant
    }

    /// Changes the time constant
    pub fn set_time_constant(&mut self, time_constant: f32) -> Result<(), FusionError> {
        validate_time_constant(time_constant)?;
        self.time_constant = time_constant;
        Ok(())
    }

    /// Installs the starting orientation
    pub fn set_base_orientation(&mut self, base: UnitQuaternion<f32>) {
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

    /// Underlying fusion state
    pub fn state(&self) -> &FusionState {
        &self.state
    }

    /// Returns to the uninitialised state
    pub fn reset(&mut self) {
        self.state.reset();
    }

    /// Records the gyroscope timestamp the next [`ComplementaryFusion::update`]
    /// measures its interval from
    pub(crate) fn record_timestamp(&mut self, timestamp_nanos: i64) {
        self.state.advance_timestamp(timestamp_nanos);
    }

    /// Runs one fusion step over an interval of `dt_nanos`
    ///
    /// When the accelerometer and magnetometer give no usable estimate the step
    /// falls back to the gyroscope integration alone.
    ///
    /// # Errors
    /// - [`FusionError::NotInitialized`] before a base orientation is set
    /// - [`FusionError::InvalidTimeStep`] when `dt_nanos` is not positive
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

        let fused = match orientation_from_accel_mag(acceleration, magnetic) {
            Some(accel_mag) => {
                let alpha = blend_weight(self.time_constant, dt);
                let accel_mag = align_hemisphere(&gyro, accel_mag);
                let blended = gyro.into_inner() * alpha + accel_mag * (1.0 - alpha);
                UnitQuaternion::from_quaternion(blended)
            }
            None => {
                debug!(?acceleration, ?magnetic, "no accel/mag estimate, gyroscope only");
                gyro
            }
        };

        self.state.set_quaternion(fused);
        Ok(fused)
    }

    /// Runs one fusion step for a gyroscope sample stamped `timestamp_nanos`
    ///
    /// The first sample after initialisation only records its timestamp and
    /// returns the base orientation.
    ///
    /// # Errors
    /// As [`ComplementaryFusion::step`]; a timestamp that does not advance is
    /// rejected with [`FusionError::InvalidTimeStep`] and leaves the state
    /// untouched.
    pub fn update(
        &mut self,
        gyroscope: Vector3<f32>,
        timestamp_nanos: i64,
        acceleration: Vector3<f32>,
        magnetic: Vector3<f32>,
    ) -> Result<UnitQuaternion<f32>, FusionError> {
        let current = self.state.require()?;

        let Some(previous) = self.state.last_timestamp_nanos() else {
            self.state.advance_timestamp(timestamp_nanos);
            return Ok(current);
        };

        let dt_nanos = timestamp_nanos.saturating_sub(previous);
        let fused = self.step(gyroscope, dt_nanos, acceleration, magnetic)?;
        self.state.advance_timestamp(timestamp_nanos);
        Ok(fused)
    }
}

impl Default for ComplementaryFusion {
    fn default() -> Self {
        Self::with_settings(&FusionSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::{QuaternionExt, euler_to_quaternion};

    const ACCEL: Vector3<f32> = Vector3::new(0.0, 0.0, 9.81);
    const MAG_NORTH: Vector3<f32> = Vector3::new(0.0, 22.0, -40.0);
    const TEN_MS: i64 = 10_000_000;

    fn initialised(time_constant: f32) -> ComplementaryFusion {
        let mut fusion = ComplementaryFusion::new(time_constant);
        fusion.set_base_orientation(orientation_from_accel_mag(ACCEL, MAG_NORTH).unwrap());
        fusion
    }

    #[test]
    fn test_blend_weight_monotonic_in_time_constant() {
        let dt = 0.01;
        let mut previous = blend_weight(0.0, dt);
        assert_eq!(previous, 0.0);

        for tau in [0.01, 0.05, 0.18, 1.0, 10.0, 1000.0] {
            let alpha = blend_weight(tau, dt);
            assert!(alpha > previous, "alpha {} not above {}", alpha, previous);
            assert!(alpha < 1.0);
            previous = alpha;
        }
        assert!(previous > 0.9999);
    }

    #[test]
    fn test_step_requires_initialisation() {
        let mut fusion = ComplementaryFusion::new(0.18);
        assert_eq!(
            fusion.step(Vector3::zeros(), TEN_MS, ACCEL, MAG_NORTH),
            Err(FusionError::NotInitialized)
        );
        assert_eq!(
            fusion.update(Vector3::zeros(), 0, ACCEL, MAG_NORTH),
            Err(FusionError::NotInitialized)
        );
    }

    #[test]
    fn test_step_rejects_non_positive_interval() {
        let mut fusion = initialised(0.18);
        let before = fusion.orientation();
        assert!(matches!(
            fusion.step(Vector3::zeros(), 0, ACCEL, MAG_NORTH),
            Err(FusionError::InvalidTimeStep(_))
        ));
        assert!(matches!(
            fusion.step(Vector3::zeros(), -TEN_MS, ACCEL, MAG_NORTH),
            Err(FusionError::InvalidTimeStep(_))
        ));
        assert_eq!(fusion.orientation(), before);
    }

    #[test]
    fn test_stationary_device_keeps_orientation() {
        let mut fusion = initialised(0.18);
        let base = fusion.orientation().unwrap();

        for _ in 0..100 {
            fusion.step(Vector3::zeros(), TEN_MS, ACCEL, MAG_NORTH).unwrap();
        }

        assert!(fusion.orientation().unwrap().angle_to(&base) < 1e-5);
    }

    #[test]
    fn test_accel_mag_corrects_wrong_base() {
        let mut fusion = ComplementaryFusion::new(0.18);
        fusion.set_base_orientation(euler_to_quaternion(Vector3::new(0.8, 0.2, -0.3)));

        for _ in 0..500 {
            fusion.step(Vector3::zeros(), TEN_MS, ACCEL, MAG_NORTH).unwrap();
        }

        let euler = fusion.orientation().unwrap().to_euler();
        assert!(euler.norm() < 1e-3, "euler {:?}", euler);
    }

    #[test]
    fn test_zero_time_constant_follows_accel_mag() {
        let mut fusion = ComplementaryFusion::new(0.0);
        fusion.set_base_orientation(euler_to_quaternion(Vector3::new(1.0, 0.0, 0.0)));

        let q = fusion.step(Vector3::new(0.3, 0.0, 0.0), TEN_MS, ACCEL, MAG_NORTH).unwrap();
        assert!(q.angle() < 1e-5);
    }

    #[test]
    fn test_dead_reckoning_without_accel_mag() {
        let mut fusion = initialised(0.18);
        let rate = Vector3::new(0.0, 0.0, 1.0);

        for _ in 0..50 {
            fusion.step(rate, TEN_MS, Vector3::zeros(), MAG_NORTH).unwrap();
        }

        let expected = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), 0.5);
        assert!(fusion.orientation().unwrap().angle_to(&expected) < 1e-4);
    }

    #[test]
    fn test_update_first_sample_only_records_timestamp() {
        let mut fusion = initialised(0.18);
        let base = fusion.orientation().unwrap();

        let q = fusion.update(Vector3::new(5.0, 5.0, 5.0), 1_000, ACCEL, MAG_NORTH).unwrap();
        assert_eq!(q, base);
        assert_eq!(fusion.state().last_timestamp_nanos(), Some(1_000));

        fusion.update(Vector3::zeros(), 1_000 + TEN_MS, ACCEL, MAG_NORTH).unwrap();
        assert_eq!(fusion.state().last_timestamp_nanos(), Some(1_000 + TEN_MS));
    }

    #[test]
    fn test_update_rejects_stale_timestamp() {
        let mut fusion = initialised(0.18);
        fusion.update(Vector3::zeros(), 5_000, ACCEL, MAG_NORTH).unwrap();

        assert!(fusion.update(Vector3::zeros(), 4_000, ACCEL, MAG_NORTH).is_err());
        assert_eq!(fusion.state().last_timestamp_nanos(), Some(5_000));
    }

    #[test]
    fn test_recorded_timestamp_starts_next_interval() {
        let mut fusion = initialised(0.18);
        fusion.record_timestamp(TEN_MS);
        assert_eq!(fusion.state().last_timestamp_nanos(), Some(TEN_MS));

        // One second at 1 rad/s with no accel/mag correction
        let q = fusion
            .update(Vector3::new(0.0, 0.0, 1.0), 101 * TEN_MS, Vector3::zeros(), MAG_NORTH)
            .unwrap();
        let expected = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), 1.0);
        assert!(q.angle_to(&expected) < 1e-4);
    }

    #[test]
    fn test_reset_returns_to_uninitialised() {
        let mut fusion = initialised(0.18);
        fusion.reset();
        assert!(!fusion.is_initialized());
        assert_eq!(fusion.orientation(), None);
    }

    #[test]
    fn test_set_time_constant_validates() {
        let mut fusion = ComplementaryFusion::default();
        assert!(fusion.set_time_constant(0.5).is_ok());
        assert_eq!(fusion.time_constant(), 0.5);
        assert!(fusion.set_time_constant(f32::NAN).is_err());
        assert_eq!(fusion.time_constant(), 0.5);
    }
}
