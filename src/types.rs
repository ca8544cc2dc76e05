//! Core types and settings for the orientation fusion library

use core::time::Duration;

use nalgebra::UnitQuaternion;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::FusionError;
use crate::math::DEFAULT_GYROSCOPE_EPSILON;

/// Default smoothing and blend time constant in seconds
pub const DEFAULT_TIME_CONSTANT: f32 = 0.18;

/// Default diagonal variance of the Kalman process and measurement noise
pub const DEFAULT_NOISE_VARIANCE: f32 = 0.01;

/// Default period of the Kalman worker
pub const DEFAULT_WORKER_PERIOD: Duration = Duration::from_millis(20);

/// Fusion algorithm used by the orchestrator
///
/// # Example
/// ```
/// use orientation_fusion::{FusionSettings, FusionStrategy};
///
/// let settings = FusionSettings {
///     strategy: FusionStrategy::Kalman,
///     ..Default::default()
/// };
/// assert_eq!(settings.time_constant, 0.18);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum FusionStrategy {
    /// Quaternion complementary filter, run synchronously on every gyroscope sample
    #[default]
    Complementary,
    /// Quaternion-state Kalman filter, run on a fixed-period worker thread
    Kalman,
}

/// Requested sensor delivery rate
///
/// Carried through to the host sensor API untouched. The fusion core does not
/// interpret it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SensorDelay {
    /// As fast as the hardware delivers
    Fastest,
    /// Rate suitable for games
    Game,
    /// Rate suitable for screen orientation changes
    #[default]
    Normal,
    /// Rate suitable for the user interface
    Ui,
}

impl SensorDelay {
    /// Platform constant conventionally used for this delay
    pub fn as_raw(self) -> i32 {
        match self {
            SensorDelay::Fastest => 0,
            SensorDelay::Game => 1,
            SensorDelay::Ui => 2,
            SensorDelay::Normal => 3,
        }
    }
}

/// Source of a sensor sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SensorKind {
    /// Accelerometer in m/s²
    Accelerometer,
    /// Magnetometer in µT
    Magnetometer,
    /// Gyroscope in rad/s
    Gyroscope,
}

/// Fusion settings
///
/// # Example
/// ```
/// use std::time::Duration;
/// use orientation_fusion::{FusionSettings, FusionStrategy, SensorDelay};
///
/// let settings = FusionSettings {
///     strategy: FusionStrategy::Kalman,
///     time_constant: 0.5,
///     process_noise: 0.02,
///     measurement_noise: 0.05,
///     worker_period: Duration::from_millis(10),
///     gyroscope_epsilon: 1e-9,
///     sensor_delay: SensorDelay::Game,
/// };
/// assert!(settings.validate().is_ok());
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FusionSettings {
    /// Fusion algorithm driven by the orchestrator
    pub strategy: FusionStrategy,
    /// Time constant in seconds
    ///
    /// Sets the complementary blend weight `tau / (tau + dt)` and the cutoff or
    /// window length of every smoothing filter built from these settings.
    pub time_constant: f32,
    /// Diagonal variance of the Kalman process noise
    pub process_noise: f32,
    /// Diagonal variance of the Kalman measurement noise
    pub measurement_noise: f32,
    /// Wake-up period of the Kalman worker
    pub worker_period: Duration,
    /// Angular rate magnitude below which the rotation axis is not normalised
    pub gyroscope_epsilon: f32,
    /// Requested delivery rate, forwarded to the host
    pub sensor_delay: SensorDelay,
}

impl Default for FusionSettings {
    fn default() -> Self {
        Self {
            strategy: FusionStrategy::default(),
            time_constant: DEFAULT_TIME_CONSTANT,
            process_noise: DEFAULT_NOISE_VARIANCE,
            measurement_noise: DEFAULT_NOISE_VARIANCE,
            worker_period: DEFAULT_WORKER_PERIOD,
            gyroscope_epsilon: DEFAULT_GYROSCOPE_EPSILON,
            sensor_delay: SensorDelay::default(),
        }
    }
}

impl FusionSettings {
    /// Checks that every numeric setting is usable.
    pub fn validate(&self) -> Result<(), FusionError> {
        validate_time_constant(self.time_constant)?;
        for noise in [self.process_noise, self.measurement_noise] {
            if !noise.is_finite() || noise < 0.0 {
                return Err(FusionError::InvalidNoise(noise));
            }
        }
        if self.worker_period.is_zero() {
            return Err(FusionError::InvalidWorkerPeriod);
        }
        Ok(())
    }
}

pub(crate) fn validate_time_constant(time_constant: f32) -> Result<(), FusionError> {
    if time_constant.is_finite() && time_constant >= 0.0 {
        Ok(())
    } else {
        Err(FusionError::InvalidTimeConstant(time_constant))
    }
}

/// Orientation state owned by one fusion strategy instance
///
/// Uninitialised until a base orientation is set, advanced on every gyroscope
/// sample afterwards, and returned to uninitialised by [`FusionState::reset`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FusionState {
    quaternion: Option<UnitQuaternion<f32>>,
    last_timestamp_nanos: Option<i64>,
}

impl FusionState {
    /// Whether a base orientation has been set
    pub fn is_initialized(&self) -> bool {
        self.quaternion.is_some()
    }

    /// Current orientation, if initialised
    pub fn quaternion(&self) -> Option<UnitQuaternion<f32>> {
        self.quaternion
    }

    /// Timestamp of the last gyroscope sample consumed
    pub fn last_timestamp_nanos(&self) -> Option<i64> {
        self.last_timestamp_nanos
    }

    /// Installs the base orientation and forgets any previous timestamp
    pub fn initialize(&mut self, base: UnitQuaternion<f32>) {
        self.quaternion = Some(base);
        self.last_timestamp_nanos = None;
    }

    /// Returns to the uninitialised state
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// The orientation, or [`FusionError::NotInitialized`]
    pub(crate) fn require(&self) -> Result<UnitQuaternion<f32>, FusionError> {
        self.quaternion.ok_or(FusionError::NotInitialized)
    }

    pub(crate) fn set_quaternion(&mut self, quaternion: UnitQuaternion<f32>) {
        self.quaternion = Some(quaternion);
    }

    /// Records `timestamp_nanos` as the last gyroscope sample consumed
    pub(crate) fn advance_timestamp(&mut self, timestamp_nanos: i64) {
        self.last_timestamp_nanos = Some(timestamp_nanos);
    }
}

/// Converts a nanosecond interval into seconds, rejecting non-positive values.
pub(crate) fn interval_seconds(dt_nanos: i64) -> Result<f32, FusionError> {
    let dt = dt_nanos as f32 * crate::math::NS_TO_S;
    if dt_nanos > 0 && dt.is_finite() {
        Ok(dt)
    } else {
        Err(FusionError::InvalidTimeStep(dt))
    }
}
