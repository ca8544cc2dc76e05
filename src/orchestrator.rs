//! Stream synchronisation and strategy selection
//!
//! The orchestrator receives the three sensor streams independently, waits
//! until each has delivered at least one sample, establishes the base
//! orientation from the accelerometer and magnetometer, and from then on runs
//! one fusion cycle per gyroscope sample.

use std::time::Duration;

use nalgebra::{UnitQuaternion, Vector3, Vector4};
use tracing::{debug, info};

use crate::acceleration::{gravity_from_orientation, linear_acceleration};
use crate::calibration::CalibrationTransform;
use crate::complementary::ComplementaryFusion;
use crate::error::FusionError;
use crate::filter::SampleRateEstimator;
use crate::math::{QuaternionExt, orientation_from_accel_mag, vector_from_slice};
use crate::types::{FusionSettings, FusionStrategy, SensorKind};
use crate::worker::KalmanWorker;

/// Lifecycle of the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for a joint accelerometer, magnetometer and gyroscope snapshot
    /// that yields a base orientation
    Uninitialized,
    /// Base orientation established; gyroscope samples drive the fusion
    Ready,
}

/// The configured fusion strategy
#[derive(Debug)]
enum Engine {
    Complementary(ComplementaryFusion),
    Kalman(KalmanWorker),
}

impl Engine {
    fn new(settings: &FusionSettings) -> Self {
        match settings.strategy {
            FusionStrategy::Complementary => {
                Engine::Complementary(ComplementaryFusion::with_settings(settings))
            }
            FusionStrategy::Kalman => Engine::Kalman(KalmanWorker::new(settings)),
        }
    }

    fn orientation(&self) -> Option<UnitQuaternion<f32>> {
        match self {
            Engine::Complementary(fusion) => fusion.orientation(),
            Engine::Kalman(worker) => worker.orientation(),
        }
    }

    fn reset(&mut self) {
        match self {
            Engine::Complementary(fusion) => fusion.reset(),
            Engine::Kalman(worker) => worker.reset(),
        }
    }
}

/// Which streams have delivered since the last initialisation attempt
#[derive(Debug, Clone, Copy, Default)]
struct Arrivals {
    acceleration: bool,
    magnetic: bool,
    gyroscope: bool,
}

impl Arrivals {
    fn complete(&self) -> bool {
        self.acceleration && self.magnetic && self.gyroscope
    }
}

/// Drives the configured fusion strategy from three asynchronous sensor
/// streams and republishes the orientation as Euler angles
///
/// # Example
/// ```
/// use nalgebra::Vector3;
/// use orientation_fusion::{FusionOrchestrator, FusionSettings, Phase};
///
/// let mut fusion = FusionOrchestrator::new(FusionSettings::default()).unwrap();
/// fusion.on_acceleration(Vector3::new(0.0, 0.0, 9.81));
/// fusion.on_magnetic(Vector3::new(0.0, 22.0, -40.0));
/// fusion.on_gyroscope(Vector3::zeros(), 0).unwrap();
/// assert_eq!(fusion.phase(), Phase::Ready);
///
/// for i in 1..=10 {
///     fusion.on_gyroscope(Vector3::zeros(), i * 10_000_000).unwrap();
/// }
/// let output = fusion.output().unwrap();
/// assert!(output.xyz().norm() < 1e-4);      // [azimuth, pitch, roll]
/// assert!((output.w - 100.0).abs() < 1.0);  // sample rate in Hz
/// ```
#[derive(Debug)]
pub struct FusionOrchestrator {
    settings: FusionSettings,
    engine: Engine,
    phase: Phase,
    arrivals: Arrivals,
    acceleration: Option<Vector3<f32>>,
    magnetic: Option<Vector3<f32>>,
    accelerometer_calibration: Option<CalibrationTransform>,
    magnetometer_calibration: Option<CalibrationTransform>,
    rate: SampleRateEstimator,
    first_gyroscope_timestamp: Option<i64>,
    output: Option<Vector4<f32>>,
}

impl FusionOrchestrator {
    /// Create an orchestrator for the strategy in `settings`
    ///
    /// # Errors
    /// Any error returned by [`FusionSettings::validate`].
    pub fn new(settings: FusionSettings) -> Result<Self, FusionError> {
        settings.validate()?;
        Ok(Self::with_engine(settings, Engine::new(&settings)))
    }

    /// Create a Kalman orchestrator around a pre-built worker, e.g. one with
    /// custom process and measurement models
    ///
    /// # Errors
    /// Any error returned by [`FusionSettings::validate`].
    pub fn with_kalman_worker(
        settings: FusionSettings,
        worker: KalmanWorker,
    ) -> Result<Self, FusionError> {
        settings.validate()?;
        let settings = FusionSettings {
            strategy: FusionStrategy::Kalman,
            ..settings
        };
        Ok(Self::with_engine(settings, Engine::Kalman(worker)))
    }

    fn with_engine(settings: FusionSettings, engine: Engine) -> Self {
        Self {
            settings,
            engine,
            phase: Phase::Uninitialized,
            arrivals: Arrivals::default(),
            acceleration: None,
            magnetic: None,
            accelerometer_calibration: None,
            magnetometer_calibration: None,
            rate: SampleRateEstimator::new(),
            first_gyroscope_timestamp: None,
            output: None,
        }
    }

    /// Settings the orchestrator was built with
    pub fn settings(&self) -> &FusionSettings {
        &self.settings
    }

    /// Configured fusion strategy
    pub fn strategy(&self) -> FusionStrategy {
        self.settings.strategy
    }

    /// Current lifecycle phase
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Installs a calibration applied to every subsequent sample of `kind`
    ///
    /// Gyroscope calibration is not supported; the transform is ignored.
    pub fn set_calibration(&mut self, kind: SensorKind, transform: Option<CalibrationTransform>) {
        match kind {
            SensorKind::Accelerometer => self.accelerometer_calibration = transform,
            SensorKind::Magnetometer => self.magnetometer_calibration = transform,
            SensorKind::Gyroscope => debug!("gyroscope calibration ignored"),
        }
    }

    /// Starts the strategy's worker, if any, from a reset state
    ///
    /// Idempotent while running.
    ///
    /// # Errors
    /// [`FusionError::WorkerSpawn`] when the Kalman worker cannot be started.
    pub fn start(&mut self) -> Result<(), FusionError> {
        if self.is_running() {
            return Ok(());
        }
        self.reset();
        if let Engine::Kalman(worker) = &mut self.engine {
            worker.start()?;
        }
        Ok(())
    }

    /// Requests the strategy's worker, if any, to stop without waiting
    pub fn stop(&mut self) {
        if let Engine::Kalman(worker) = &mut self.engine {
            worker.stop();
        }
    }

    /// Whether the strategy's worker is running
    ///
    /// Always `false` for the complementary strategy, which runs on the
    /// caller's thread.
    pub fn is_running(&self) -> bool {
        matches!(&self.engine, Engine::Kalman(worker) if worker.is_running())
    }

    /// Returns to [`Phase::Uninitialized`], clearing all strategy state
    pub fn reset(&mut self) {
        self.engine.reset();
        self.phase = Phase::Uninitialized;
        self.arrivals = Arrivals::default();
        self.acceleration = None;
        self.magnetic = None;
        self.rate.reset();
        self.first_gyroscope_timestamp = None;
        self.output = None;
        debug!(strategy = ?self.settings.strategy, "orchestrator reset");
    }

    /// Feeds a raw sample of `kind`
    ///
    /// # Errors
    /// - [`FusionError::InvalidDimension`] unless `values` holds three axes
    /// - any error of [`FusionOrchestrator::on_gyroscope`]
    pub fn on_sensor_values(
        &mut self,
        kind: SensorKind,
        values: &[f32],
        timestamp_nanos: i64,
    ) -> Result<(), FusionError> {
        let sample = vector_from_slice(values)?;
        match kind {
            SensorKind::Accelerometer => self.on_acceleration(sample),
            SensorKind::Magnetometer => self.on_magnetic(sample),
            SensorKind::Gyroscope => self.on_gyroscope(sample, timestamp_nanos)?,
        }
        Ok(())
    }

    /// Feeds an accelerometer sample in m/s²
    pub fn on_acceleration(&mut self, acceleration: Vector3<f32>) {
        let acceleration = calibrate(acceleration, self.accelerometer_calibration.as_ref());
        self.acceleration = Some(acceleration);
        self.arrivals.acceleration = true;

        if let Engine::Kalman(worker) = &self.engine {
            worker.post_acceleration(acceleration);
        }
    }

    /// Feeds a magnetometer sample in µT
    pub fn on_magnetic(&mut self, magnetic: Vector3<f32>) {
        let magnetic = calibrate(magnetic, self.magnetometer_calibration.as_ref());
        self.magnetic = Some(magnetic);
        self.arrivals.magnetic = true;

        if let Engine::Kalman(worker) = &self.engine {
            worker.post_magnetic(magnetic);
        }
    }

    /// Feeds a gyroscope sample in rad/s
    ///
    /// While uninitialised the sample only counts towards the joint snapshot.
    /// Once ready it runs one fusion cycle and republishes the output.
    ///
    /// # Errors
    /// [`FusionError::InvalidTimeStep`] when the complementary strategy sees a
    /// timestamp that does not advance.
    pub fn on_gyroscope(
        &mut self,
        rate: Vector3<f32>,
        timestamp_nanos: i64,
    ) -> Result<(), FusionError> {
        match self.phase {
            Phase::Uninitialized => {
                self.arrivals.gyroscope = true;
                if self.arrivals.complete() {
                    self.arrivals = Arrivals::default();
                    self.try_initialize(rate, timestamp_nanos);
                }
                Ok(())
            }
            Phase::Ready => self.fuse(rate, timestamp_nanos),
        }
    }

    fn try_initialize(&mut self, rate: Vector3<f32>, timestamp_nanos: i64) {
        let (Some(acceleration), Some(magnetic)) = (self.acceleration, self.magnetic) else {
            return;
        };
        let Some(base) = orientation_from_accel_mag(acceleration, magnetic) else {
            debug!(?acceleration, ?magnetic, "no base orientation from snapshot");
            return;
        };

        match &mut self.engine {
            Engine::Complementary(fusion) => {
                fusion.set_base_orientation(base);
                fusion.record_timestamp(timestamp_nanos);
            }
            Engine::Kalman(worker) => {
                worker.set_base_orientation(base);
                worker.post_acceleration(acceleration);
                worker.post_magnetic(magnetic);
                worker.post_gyroscope(rate, timestamp_nanos);
            }
        }

        self.phase = Phase::Ready;
        let euler = base.to_euler();
        info!(
            strategy = ?self.settings.strategy,
            azimuth = euler.x,
            pitch = euler.y,
            roll = euler.z,
            "base orientation established"
        );
        self.publish(timestamp_nanos);
    }

    fn fuse(&mut self, rate: Vector3<f32>, timestamp_nanos: i64) -> Result<(), FusionError> {
        match &mut self.engine {
            Engine::Complementary(fusion) => {
                let acceleration = self.acceleration.unwrap_or_else(Vector3::zeros);
                let magnetic = self.magnetic.unwrap_or_else(Vector3::zeros);
                fusion.update(rate, timestamp_nanos, acceleration, magnetic)?;
            }
            Engine::Kalman(worker) => worker.post_gyroscope(rate, timestamp_nanos),
        }
        self.publish(timestamp_nanos);
        Ok(())
    }

    fn publish(&mut self, timestamp_nanos: i64) {
        let first = *self.first_gyroscope_timestamp.get_or_insert(timestamp_nanos);
        let elapsed_nanos = timestamp_nanos.saturating_sub(first);
        let elapsed = Duration::from_nanos(u64::try_from(elapsed_nanos).unwrap_or(0));
        let hz = self.rate.record_elapsed(elapsed);

        if let Some(orientation) = self.engine.orientation() {
            let euler = orientation.to_euler();
            self.output = Some(Vector4::new(euler.x, euler.y, euler.z, hz));
        }
    }

    /// Last published `[azimuth, pitch, roll, hz]`
    ///
    /// `None` until the base orientation is established. With the Kalman
    /// strategy the angles are those the worker had published at the time of
    /// the last gyroscope sample.
    pub fn output(&self) -> Option<Vector4<f32>> {
        self.output
    }

    /// Current orientation
    ///
    /// # Errors
    /// [`FusionError::NotInitialized`] before the base orientation is established.
    pub fn quaternion(&self) -> Result<UnitQuaternion<f32>, FusionError> {
        match self.phase {
            Phase::Uninitialized => Err(FusionError::NotInitialized),
            Phase::Ready => self.engine.orientation().ok_or(FusionError::NotInitialized),
        }
    }

    /// Current `[azimuth, pitch, roll]` in radians
    ///
    /// # Errors
    /// [`FusionError::NotInitialized`] before the base orientation is established.
    pub fn orientation(&self) -> Result<Vector3<f32>, FusionError> {
        self.quaternion().map(|q| q.to_euler())
    }

    /// Removes gravity, as seen from the current orientation, from a
    /// calibrated acceleration
    ///
    /// # Errors
    /// [`FusionError::NotInitialized`] before the base orientation is established.
    pub fn linear_acceleration(
        &self,
        acceleration: Vector3<f32>,
    ) -> Result<Vector3<f32>, FusionError> {
        let orientation = self.quaternion()?;
        Ok(linear_acceleration(acceleration, gravity_from_orientation(&orientation)))
    }
}

fn calibrate(sample: Vector3<f32>, transform: Option<&CalibrationTransform>) -> Vector3<f32> {
    transform.map_or(sample, |transform| transform.apply(sample))
}
