//! Tilt-compensated compass helpers for the orientation fusion library

use nalgebra::Vector3;

use crate::math::{RAD_TO_DEG, Vector3Ext};

/// Tilt angles `[roll, pitch, 0]` in radians from an accelerometer reading
///
/// Only meaningful while the device is not accelerating, so that the reading
/// is gravity alone.
pub fn tilt_from_acceleration(acceleration: Vector3<f32>) -> Vector3<f32> {
    let roll = acceleration.y.atan2(acceleration.z);
    let pitch = (-acceleration.x).atan2(acceleration.z);
    Vector3::new(roll, pitch, 0.0)
}

/// De-rotates a magnetic field reading onto the horizontal plane
///
/// `tilt` is `[roll, pitch, _]` as returned by [`tilt_from_acceleration`]. The
/// roll is removed first, then the pitch.
///
/// # Example
/// ```
/// use nalgebra::Vector3;
/// use orientation_fusion::compass::{compensate_tilt, tilt_from_acceleration};
///
/// let level = Vector3::new(0.0, 0.0, 9.81);
/// let field = Vector3::new(0.0, 22.0, -40.0);
/// let compensated = compensate_tilt(field, tilt_from_acceleration(level));
/// assert!((compensated - field).norm() < 1e-5);
/// ```
pub fn compensate_tilt(magnetic: Vector3<f32>, tilt: Vector3<f32>) -> Vector3<f32> {
    let (sin_roll, cos_roll) = tilt.x.sin_cos();
    let y = magnetic.y * cos_roll - magnetic.z * sin_roll;
    let z = magnetic.y * sin_roll + magnetic.z * cos_roll;

    let (sin_pitch, cos_pitch) = tilt.y.sin_cos();
    let x = magnetic.x * cos_pitch + z * sin_pitch;
    let z = -magnetic.x * sin_pitch + z * cos_pitch;

    Vector3::new(x, y, z)
}

/// Calculate tilt-compensated magnetic heading
///
/// Builds the horizontal East (`magnetic × acceleration`) and North
/// (`acceleration × east`) axes in device coordinates and returns the angle of
/// the device's top edge clockwise from magnetic north.
///
/// # Returns
/// Heading angle in degrees (range: -180° to +180°, 0° = North, 90° = East)
///
/// # Example
/// ```
/// use nalgebra::Vector3;
/// use orientation_fusion::compass::calculate_heading;
///
/// let accel = Vector3::new(0.0, 0.0, 9.81);   // Level device
/// let mag = Vector3::new(-22.0, 0.0, -40.0);  // North lies along device -X
/// let heading = calculate_heading(accel, mag);
/// assert!((heading - 90.0).abs() < 1e-3);    // Top edge points East
/// ```
pub fn calculate_heading(acceleration: Vector3<f32>, magnetic: Vector3<f32>) -> f32 {
    let east = magnetic.cross(&acceleration).safe_normalize();
    let north = acceleration.cross(&east).safe_normalize();

    east.y.atan2(north.y) * RAD_TO_DEG
}

/// Corrects a magnetic azimuth in degrees by the local declination
///
/// The result is wrapped into `[0, 360)`.
///
/// # Example
/// ```
/// use orientation_fusion::compass::compensate_declination;
///
/// assert_eq!(compensate_declination(350.0, 15.0), 5.0);
/// assert_eq!(compensate_declination(10.0, -20.0), 350.0);
/// ```
pub fn compensate_declination(azimuth_degrees: f32, declination_degrees: f32) -> f32 {
    (azimuth_degrees + declination_degrees).rem_euclid(360.0)
}
