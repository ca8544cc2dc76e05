//! Gyroscope-only dead reckoning

use nalgebra::{UnitQuaternion, Vector3};

use crate::error::FusionError;
use crate::math::{DEFAULT_GYROSCOPE_EPSILON, integrate_gyroscope};
use crate::types::{FusionState, interval_seconds};

/// Orientation from angular rate integration alone
///
/// Drifts without bound; useful as a reference when comparing the fused
/// estimates against the raw gyroscope.
///
/// # Example
/// ```
/// use nalgebra::Vector3;
/// use orientation_fusion::GyroscopeOrientation;
///
/// let mut gyro = GyroscopeOrientation::new();
/// gyro.update(Vector3::new(0.0, 0.0, 1.0), 0).unwrap();
/// let q = gyro.update(Vector3::new(0.0, 0.0, 1.0), 500_000_000).unwrap();
/// assert!((q.angle() - 0.5).abs() < 1e-5);
/// ```
#[derive(Debug, Clone)]
pub struct GyroscopeOrientation {
    base: UnitQuaternion<f32>,
    epsilon: f32,
    state: FusionState,
}

impl GyroscopeOrientation {
    /// Start from the identity orientation
    pub fn new() -> Self {
        Self::with_base(UnitQuaternion::identity())
    }

    /// Start from `base`
    pub fn with_base(base: UnitQuaternion<f32>) -> Self {
        let mut state = FusionState::default();
        state.initialize(base);
        Self {
            base,
            epsilon: DEFAULT_GYROSCOPE_EPSILON,
            state,
        }
    }

    /// Changes the rate magnitude below which the axis is not normalised
    pub fn set_epsilon(&mut self, epsilon: f32) {
        self.epsilon = epsilon;
    }

    /// Integrates a gyroscope sample stamped `timestamp_nanos`
    ///
    /// The first sample only records its timestamp.
    ///
    /// # Errors
    /// [`FusionError::InvalidTimeStep`] when the timestamp does not advance.
    pub fn update(
        &mut self,
        rate: Vector3<f32>,
        timestamp_nanos: i64,
    ) -> Result<UnitQuaternion<f32>, FusionError> {
        let current = self.state.require()?;
        let Some(previous) = self.state.last_timestamp_nanos() else {
            self.state.advance_timestamp(timestamp_nanos);
            return Ok(current);
        };

        let dt = interval_seconds(timestamp_nanos.saturating_sub(previous))?;
        let next = integrate_gyroscope(&current, rate, dt, self.epsilon);
        self.state.set_quaternion(next);
        self.state.advance_timestamp(timestamp_nanos);
        Ok(next)
    }

    /// Current orientation
    pub fn orientation(&self) -> UnitQuaternion<f32> {
        self.state.quaternion().unwrap_or(self.base)
    }

    /// Returns to the base orientation
    pub fn reset(&mut self) {
        self.state.initialize(self.base);
    }
}

impl Default for GyroscopeOrientation {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEN_MS: i64 = 10_000_000;

    #[test]
    fn test_integrates_from_base() {
        let base = UnitQuaternion::from_axis_angle(&Vector3::x_axis(), 0.2);
        let mut gyro = GyroscopeOrientation::with_base(base);
        let rate = Vector3::new(0.0, 1.0, 0.0);

        for i in 0..=100 {
            gyro.update(rate, i * TEN_MS).unwrap();
        }

        let expected = base * UnitQuaternion::from_axis_angle(&Vector3::y_axis(), 1.0);
        assert!(gyro.orientation().angle_to(&expected) < 1e-4);
    }

    #[test]
    fn test_rejects_stale_timestamp() {
        let mut gyro = GyroscopeOrientation::new();
        gyro.update(Vector3::zeros(), TEN_MS).unwrap();
        assert!(matches!(
            gyro.update(Vector3::zeros(), TEN_MS),
            Err(FusionError::InvalidTimeStep(_))
        ));
    }

    #[test]
    fn test_reset_returns_to_base() {
        let mut gyro = GyroscopeOrientation::new();
        gyro.update(Vector3::new(1.0, 0.0, 0.0), 0).unwrap();
        gyro.update(Vector3::new(1.0, 0.0, 0.0), 50 * TEN_MS).unwrap();
        assert!(gyro.orientation().angle() > 0.4);

        gyro.reset();
        assert_eq!(gyro.orientation(), UnitQuaternion::identity());

        // Timestamp history is cleared too
        let q = gyro.update(Vector3::new(1.0, 0.0, 0.0), 0).unwrap();
        assert_eq!(q, UnitQuaternion::identity());
    }
}
