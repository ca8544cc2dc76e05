//! Error type for the orientation fusion library

use thiserror::Error;

/// Errors raised by the fusion core.
///
/// Every variant describes a misuse by the caller. Degenerate sensor
/// conditions (free-fall, a vanishing horizontal magnetic field, gimbal lock)
/// are expected at runtime and are reported through `Option` instead.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum FusionError {
    /// A fusion step or orientation query was made before a base orientation
    /// was established from an accelerometer and magnetometer triad.
    #[error("fusion has no base orientation yet")]
    NotInitialized,

    /// A raw sensor sample did not have the expected number of axes.
    #[error("sensor sample has {actual} values, expected {expected}")]
    InvalidDimension { expected: usize, actual: usize },

    /// The integration interval handed to a fusion step was not a positive,
    /// finite number of seconds.
    #[error("invalid time step: {0} s")]
    InvalidTimeStep(f32),

    /// A time constant was negative or not finite.
    #[error("invalid time constant: {0} s")]
    InvalidTimeConstant(f32),

    /// A noise parameter was negative or not finite.
    #[error("invalid noise variance: {0}")]
    InvalidNoise(f32),

    /// The worker period was zero.
    #[error("worker period must be greater than zero")]
    InvalidWorkerPeriod,

    /// The Kalman worker thread could not be spawned.
    #[error("failed to spawn the kalman worker thread")]
    WorkerSpawn,

    /// The Kalman innovation covariance could not be inverted.
    #[error("innovation covariance is singular")]
    SingularInnovation,
}
