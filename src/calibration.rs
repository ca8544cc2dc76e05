//! Sensor calibration transforms for the orientation fusion library
//!
//! The transforms themselves come from an external ellipsoid fit. This module
//! only applies them to raw samples before those reach the rotation math.

use nalgebra::{Matrix3, Vector3};

/// Hard/soft-iron (magnetometer) or offset/skew (accelerometer) correction
///
/// Maps an ellipsoid of raw readings onto a sphere centred at the origin:
/// `scalar * (raw - offset)`.
///
/// # Example
/// ```
/// use nalgebra::{Matrix3, Vector3};
/// use orientation_fusion::CalibrationTransform;
///
/// let transform = CalibrationTransform::new(
///     Matrix3::from_diagonal(&Vector3::new(0.5, 1.0, 2.0)),
///     Vector3::new(10.0, 20.0, 30.0),
/// );
///
/// let corrected = transform.apply(Vector3::new(12.0, 21.0, 30.5));
/// assert_eq!(corrected, Vector3::new(1.0, 1.0, 1.0));
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationTransform {
    /// Scaling and skew correction
    pub scalar: Matrix3<f32>,
    /// Centre of the raw-reading ellipsoid
    pub offset: Vector3<f32>,
}

impl CalibrationTransform {
    /// Create a transform from its scalar matrix and offset
    pub fn new(scalar: Matrix3<f32>, offset: Vector3<f32>) -> Self {
        Self { scalar, offset }
    }

    /// Transform that leaves samples untouched
    pub fn identity() -> Self {
        Self::new(Matrix3::identity(), Vector3::zeros())
    }

    /// Corrects a raw sample
    pub fn apply(&self, raw: Vector3<f32>) -> Vector3<f32> {
        apply(raw, self)
    }
}

impl Default for CalibrationTransform {
    fn default() -> Self {
        Self::identity()
    }
}

/// Applies a calibration transform to a raw sample
pub fn apply(raw: Vector3<f32>, transform: &CalibrationTransform) -> Vector3<f32> {
    transform.scalar * (raw - transform.offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_calibration() {
        let raw = Vector3::new(1.0, -2.0, 3.0);
        assert_eq!(CalibrationTransform::identity().apply(raw), raw);
    }

    #[test]
    fn test_hard_iron_offset() {
        let offset = Vector3::new(10.0, 20.0, 30.0);
        let transform = CalibrationTransform::new(Matrix3::identity(), offset);
        let calibrated = apply(Vector3::new(100.0, 200.0, 300.0), &transform);
        let expected = Vector3::new(90.0, 180.0, 270.0);

        assert!((calibrated - expected).norm() < 1e-6);
    }

    #[test]
    fn test_soft_iron_scaling_applied_after_offset() {
        let scalar = Matrix3::new(
            0.5, 0.0, 0.0, //
            0.0, 0.25, 0.0, //
            0.0, 0.0, 2.0,
        );
        let transform = CalibrationTransform::new(scalar, Vector3::new(1.0, 1.0, 1.0));
        let calibrated = transform.apply(Vector3::new(3.0, 5.0, 2.0));

        // (2, 4, 1) scaled per axis
        assert!((calibrated - Vector3::new(1.0, 1.0, 2.0)).norm() < 1e-6);
    }
}
