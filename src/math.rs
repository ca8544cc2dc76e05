//! Rotation mathematics for the orientation fusion library
//!
//! Conventions used throughout the crate:
//!
//! - Device frame: X to the right of the screen, Y towards the top edge, Z out
//!   of the screen.
//! - World frame: East-North-Up.
//! - A quaternion rotates device-frame vectors into the world frame.
//! - Euler output is `[azimuth, pitch, roll]` in radians with
//!   `R = Rz(-azimuth) * Rx(-pitch) * Ry(roll)`.

use nalgebra::{Matrix3, Quaternion, Rotation3, UnitQuaternion, Vector3, Vector4};
use tracing::trace;

use crate::error::FusionError;

/// Mathematical constants
pub const DEG_TO_RAD: f32 = core::f32::consts::PI / 180.0;
pub const RAD_TO_DEG: f32 = 180.0 / core::f32::consts::PI;

/// Standard gravity in m/s²
pub const STANDARD_GRAVITY: f32 = 9.806_65;

/// Nanosecond to second conversion
pub const NS_TO_S: f32 = 1.0e-9;

/// Angular rates at or below this magnitude are not normalised to an axis
pub const DEFAULT_GYROSCOPE_EPSILON: f32 = 1.0e-9;

/// Below this fraction of standard gravity the device is considered in free-fall
const FREE_FALL_GRAVITY_RATIO: f32 = 0.1;

/// Above this multiple of standard gravity the accelerometer no longer measures gravity
const HIGH_ACCELERATION_GRAVITY_RATIO: f32 = 2.0;

/// Minimum norm of `magnetic × gravity` (µT·m/s²) for a usable horizontal field
const MIN_HORIZONTAL_FIELD: f32 = 0.1;

/// Singularity test threshold on `y*z + w*x` (half of `R21`)
const SINGULARITY_THRESHOLD: f32 = 0.499;

/// Extension trait for Vector3 operations
pub trait Vector3Ext {
    /// Normalize the vector, returning zero vector if magnitude is zero
    fn safe_normalize(&self) -> Vector3<f32>;

    /// Convert degrees to radians
    fn deg_to_rad(&self) -> Vector3<f32>;

    /// Convert radians to degrees
    fn rad_to_deg(&self) -> Vector3<f32>;
}

impl Vector3Ext for Vector3<f32> {
    fn safe_normalize(&self) -> Vector3<f32> {
        let mag = self.norm();
        if mag > 0.0 {
            *self / mag
        } else {
            Vector3::zeros()
        }
    }

    fn deg_to_rad(&self) -> Vector3<f32> {
        *self * DEG_TO_RAD
    }

    fn rad_to_deg(&self) -> Vector3<f32> {
        *self * RAD_TO_DEG
    }
}

/// Extension trait for UnitQuaternion operations
pub trait QuaternionExt {
    /// Convert quaternion to `[azimuth, pitch, roll]` in radians
    fn to_euler(&self) -> Vector3<f32>;

    /// Convert quaternion to `[azimuth, pitch, roll]` in degrees
    fn to_euler_degrees(&self) -> Vector3<f32>;

    /// Create quaternion from azimuth, pitch and roll in radians
    fn from_euler(azimuth: f32, pitch: f32, roll: f32) -> UnitQuaternion<f32>;

    /// Quaternion components as `[w, x, y, z]`
    fn to_vector4(&self) -> Vector4<f32>;
}

impl QuaternionExt for UnitQuaternion<f32> {
    fn to_euler(&self) -> Vector3<f32> {
        quaternion_to_euler(self)
    }

    fn to_euler_degrees(&self) -> Vector3<f32> {
        self.to_euler().rad_to_deg()
    }

    fn from_euler(azimuth: f32, pitch: f32, roll: f32) -> UnitQuaternion<f32> {
        euler_to_quaternion(Vector3::new(azimuth, pitch, roll))
    }

    fn to_vector4(&self) -> Vector4<f32> {
        Vector4::new(self.w, self.i, self.j, self.k)
    }
}

/// Builds a quaternion from `[w, x, y, z]` components without normalising.
pub fn quaternion_from_vector4(v: &Vector4<f32>) -> Quaternion<f32> {
    Quaternion::new(v[0], v[1], v[2], v[3])
}

/// Converts a raw three-axis sample into a vector.
///
/// # Errors
/// [`FusionError::InvalidDimension`] when `values` does not hold exactly three axes.
///
/// # Example
/// ```
/// use orientation_fusion::vector_from_slice;
///
/// let v = vector_from_slice(&[0.0, 9.81, 0.0]).unwrap();
/// assert_eq!(v.y, 9.81);
/// assert!(vector_from_slice(&[1.0, 2.0]).is_err());
/// ```
pub fn vector_from_slice(values: &[f32]) -> Result<Vector3<f32>, FusionError> {
    match values {
        [x, y, z] => Ok(Vector3::new(*x, *y, *z)),
        _ => Err(FusionError::InvalidDimension {
            expected: 3,
            actual: values.len(),
        }),
    }
}

/// Integrates an angular rate over `dt` seconds onto `previous`.
///
/// The rate is turned into an axis-angle increment (angle = `|rate| * dt`),
/// converted to a quaternion from its half-angle and composed as
/// `previous * delta`. The axis is only normalised when `|rate| > epsilon`.
///
/// `dt` is not validated: a negative interval integrates backwards and NaN
/// propagates into the result.
///
/// # Example
/// ```
/// use nalgebra::{UnitQuaternion, Vector3};
/// use orientation_fusion::integrate_gyroscope;
///
/// let q = UnitQuaternion::identity();
/// let rate = Vector3::new(0.0, 0.0, std::f32::consts::FRAC_PI_2); // rad/s about Z
/// let q = integrate_gyroscope(&q, rate, 1.0, 1e-9);
/// assert!((q.angle() - std::f32::consts::FRAC_PI_2).abs() < 1e-5);
/// ```
pub fn integrate_gyroscope(
    previous: &UnitQuaternion<f32>,
    rate: Vector3<f32>,
    dt: f32,
    epsilon: f32,
) -> UnitQuaternion<f32> {
    let magnitude = rate.norm();
    let axis = if magnitude > epsilon {
        rate / magnitude
    } else {
        rate
    };

    let half_theta = magnitude * dt / 2.0;
    let (sin_half_theta, cos_half_theta) = half_theta.sin_cos();

    let delta = Quaternion::new(
        cos_half_theta,
        sin_half_theta * axis.x,
        sin_half_theta * axis.y,
        sin_half_theta * axis.z,
    );

    UnitQuaternion::from_quaternion(previous.quaternion() * delta)
}

/// Estimates orientation from a gravity and a magnetic field reading.
///
/// Builds the East (`magnetic × gravity`), North (`gravity × east`) and Up
/// (`gravity`) axes in device coordinates and converts that basis into a
/// quaternion.
///
/// Returns `None` when the accelerometer magnitude is far from standard
/// gravity (free-fall or strong linear acceleration) or when the magnetic
/// field has almost no component perpendicular to gravity (near a magnetic
/// pole or a saturated sensor).
///
/// # Example
/// ```
/// use nalgebra::Vector3;
/// use orientation_fusion::orientation_from_accel_mag;
///
/// // Device lying flat with its top edge pointing north
/// let accel = Vector3::new(0.0, 0.0, 9.81);
/// let mag = Vector3::new(0.0, 22.0, -40.0);
/// let q = orientation_from_accel_mag(accel, mag).unwrap();
/// assert!(q.angle() < 1e-5);
///
/// assert!(orientation_from_accel_mag(Vector3::zeros(), mag).is_none());
/// ```
pub fn orientation_from_accel_mag(
    acceleration: Vector3<f32>,
    magnetic: Vector3<f32>,
) -> Option<UnitQuaternion<f32>> {
    let gravity_squared = acceleration.norm_squared();
    let free_fall = (FREE_FALL_GRAVITY_RATIO * STANDARD_GRAVITY).powi(2);
    let high_acceleration = (HIGH_ACCELERATION_GRAVITY_RATIO * STANDARD_GRAVITY).powi(2);
    if !(free_fall..=high_acceleration).contains(&gravity_squared) {
        return None;
    }

    let east = magnetic.cross(&acceleration);
    let east_norm = east.norm();
    if !(east_norm >= MIN_HORIZONTAL_FIELD) {
        return None;
    }
    let east = east / east_norm;
    let up = acceleration / gravity_squared.sqrt();
    let north = up.cross(&east);

    // Rows are the world axes expressed in device coordinates
    let matrix = Matrix3::new(
        east.x, east.y, east.z, //
        north.x, north.y, north.z, //
        up.x, up.y, up.z,
    );

    Some(UnitQuaternion::from_rotation_matrix(
        &Rotation3::from_matrix_unchecked(matrix),
    ))
}

/// Converts a quaternion into `[azimuth, pitch, roll]` radians.
///
/// Near the poles (`y*z + w*x` beyond ±0.499) pitch is pinned to ∓π/2, roll
/// to zero and the combined rotation is reported as azimuth, so the result
/// is always finite.
pub fn quaternion_to_euler(quaternion: &UnitQuaternion<f32>) -> Vector3<f32> {
    let (w, x, y, z) = (quaternion.w, quaternion.i, quaternion.j, quaternion.k);
    let rotation = quaternion.to_rotation_matrix();
    let r = rotation.matrix();

    let test = y * z + w * x;
    if test > SINGULARITY_THRESHOLD {
        trace!(test, "euler singularity, pitch -90 degrees");
        let azimuth = -r[(1, 0)].atan2(r[(0, 0)]);
        return Vector3::new(azimuth, -core::f32::consts::FRAC_PI_2, 0.0);
    }
    if test < -SINGULARITY_THRESHOLD {
        trace!(test, "euler singularity, pitch +90 degrees");
        let azimuth = -r[(1, 0)].atan2(r[(0, 0)]);
        return Vector3::new(azimuth, core::f32::consts::FRAC_PI_2, 0.0);
    }

    let azimuth = r[(0, 1)].atan2(r[(1, 1)]);
    let pitch = (-r[(2, 1)]).clamp(-1.0, 1.0).asin();
    let roll = (-r[(2, 0)]).atan2(r[(2, 2)]);

    Vector3::new(azimuth, pitch, roll)
}

/// Converts `[azimuth, pitch, roll]` radians into a quaternion.
///
/// Inverse of [`quaternion_to_euler`] away from the poles.
pub fn euler_to_quaternion(euler: Vector3<f32>) -> UnitQuaternion<f32> {
    let azimuth = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), -euler.x);
    let pitch = UnitQuaternion::from_axis_angle(&Vector3::x_axis(), -euler.y);
    let roll = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), euler.z);

    azimuth * pitch * roll
}

/// Returns `candidate` negated if needed so that it lies in the same
/// hemisphere as `reference`. Both represent the same rotation.
pub(crate) fn align_hemisphere(
    reference: &UnitQuaternion<f32>,
    candidate: UnitQuaternion<f32>,
) -> Quaternion<f32> {
    let candidate = candidate.into_inner();
    if reference.coords.dot(&candidate.coords) < 0.0 {
        -candidate
    } else {
        candidate
    }
}
