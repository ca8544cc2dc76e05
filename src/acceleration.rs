//! Gravity and linear acceleration estimates

use std::fmt;
use std::time::Instant;

use nalgebra::{UnitQuaternion, Vector3};

use crate::filter::{FilterKind, SmoothingFilter};
use crate::math::STANDARD_GRAVITY;

/// Accelerometer reading of a device at rest in the given orientation
///
/// The world-frame reaction to gravity, `[0, 0, g]` in East-North-Up, rotated
/// into device coordinates.
///
/// # Example
/// ```
/// use nalgebra::{UnitQuaternion, Vector3};
/// use orientation_fusion::acceleration::gravity_from_orientation;
///
/// let gravity = gravity_from_orientation(&UnitQuaternion::identity());
/// assert!((gravity - Vector3::new(0.0, 0.0, 9.80665)).norm() < 1e-6);
/// ```
pub fn gravity_from_orientation(orientation: &UnitQuaternion<f32>) -> Vector3<f32> {
    orientation.inverse_transform_vector(&Vector3::new(0.0, 0.0, STANDARD_GRAVITY))
}

/// Acceleration with the gravity component removed
pub fn linear_acceleration(acceleration: Vector3<f32>, gravity: Vector3<f32>) -> Vector3<f32> {
    acceleration - gravity
}

/// Linear acceleration using a smoothing filter as the gravity estimator
///
/// The low-frequency part of the accelerometer signal is taken as gravity,
/// which holds as long as the linear acceleration changes faster than the
/// filter's time constant.
pub struct FilteredLinearAcceleration {
    gravity: Box<dyn SmoothingFilter>,
}

impl FilteredLinearAcceleration {
    /// Create an estimator around a filter of the given kind
    pub fn new(kind: FilterKind, time_constant: f32) -> Self {
        Self::with_filter(kind.build(time_constant))
    }

    /// Create an estimator around an existing filter
    pub fn with_filter(gravity: Box<dyn SmoothingFilter>) -> Self {
        Self { gravity }
    }

    /// Linear acceleration of a sample delivered now
    pub fn update(&mut self, acceleration: Vector3<f32>) -> Vector3<f32> {
        self.update_at(acceleration, Instant::now())
    }

    /// Linear acceleration of a sample delivered at `now`
    pub fn update_at(&mut self, acceleration: Vector3<f32>, now: Instant) -> Vector3<f32> {
        let gravity = self.gravity.filter_at(acceleration, now);
        linear_acceleration(acceleration, gravity)
    }

    /// Changes the gravity filter's time constant
    pub fn set_time_constant(&mut self, time_constant: f32) {
        self.gravity.set_time_constant(time_constant);
    }

    /// Forgets the gravity estimate
    pub fn reset(&mut self) {
        self.gravity.reset();
    }
}

impl fmt::Debug for FilteredLinearAcceleration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilteredLinearAcceleration")
            .field("time_constant", &self.gravity.time_constant())
            .finish_non_exhaustive()
    }
}
