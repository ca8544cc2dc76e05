//! Fixed-period worker driving the Kalman fusion
//!
//! Sensor delivery threads only overwrite last-known-value slots in a
//! mailbox. A background thread wakes every period, takes a snapshot of the
//! mailbox, runs one predict/correct cycle outside of any lock and publishes
//! the result.
//!
//! Two counters keep the hand-off consistent:
//!
//! - `generation` identifies the current run. A thread left over from an
//!   earlier run exits at its next wake-up instead of competing with the
//!   new one.
//! - `epoch` is bumped whenever the fusion state is replaced. A cycle that
//!   started under an older epoch discards its result.
//!
//! Cycles are serialised, so a [`KalmanWorker::tick`] on the caller's thread
//! and the worker thread never step from the same estimate.

use std::mem;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use nalgebra::{UnitQuaternion, Vector3};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::error::FusionError;
use crate::kalman::KalmanFusion;
use crate::types::FusionSettings;

/// Commands accepted by the worker thread
#[derive(Debug)]
enum WorkerCommand {
    Shutdown,
}

/// Latest samples posted by the delivery threads
#[derive(Debug, Clone, Copy, Default)]
struct Mailbox {
    gyroscope: Option<Vector3<f32>>,
    acceleration: Option<Vector3<f32>>,
    magnetic: Option<Vector3<f32>>,
    accumulated_dt_nanos: i64,
    last_gyroscope_timestamp: Option<i64>,
}

/// Inputs of one fusion cycle
#[derive(Debug, Clone, Copy)]
struct Snapshot {
    gyroscope: Vector3<f32>,
    acceleration: Vector3<f32>,
    magnetic: Vector3<f32>,
    dt_nanos: i64,
}

impl Mailbox {
    /// Takes the pending gyroscope interval, zeroing it.
    fn take(&mut self) -> Option<Snapshot> {
        let dt_nanos = mem::take(&mut self.accumulated_dt_nanos);
        if dt_nanos <= 0 {
            return None;
        }

        Some(Snapshot {
            gyroscope: self.gyroscope?,
            acceleration: self.acceleration.unwrap_or_else(Vector3::zeros),
            magnetic: self.magnetic.unwrap_or_else(Vector3::zeros),
            dt_nanos,
        })
    }
}

#[derive(Debug)]
struct Shared {
    mailbox: Mutex<Mailbox>,
    fusion: Mutex<KalmanFusion>,
    cycle: Mutex<()>,
    epoch: AtomicU64,
    generation: AtomicU64,
}

impl Shared {
    /// Runs one cycle. Returns the committed orientation, or `None` when
    /// nothing was pending or the result was discarded.
    fn run_cycle(&self) -> Result<Option<UnitQuaternion<f32>>, FusionError> {
        let _cycle = self.cycle.lock();
        let Some((epoch, snapshot, mut fusion)) = self.prepare() else {
            return Ok(None);
        };

        let orientation = fusion.step(
            snapshot.gyroscope,
            snapshot.dt_nanos,
            snapshot.acceleration,
            snapshot.magnetic,
        )?;

        Ok(self.commit(epoch, fusion).then_some(orientation))
    }

    /// Takes the pending inputs together with a private copy of the fusion.
    fn prepare(&self) -> Option<(u64, Snapshot, KalmanFusion)> {
        let epoch = self.epoch.load(Ordering::Acquire);
        let snapshot = self.mailbox.lock().take()?;

        let fusion = self.fusion.lock().clone();
        fusion.is_initialized().then_some((epoch, snapshot, fusion))
    }

    /// Publishes `fusion` unless the state was replaced since `epoch`.
    fn commit(&self, epoch: u64, fusion: KalmanFusion) -> bool {
        let mut current = self.fusion.lock();
        if self.epoch.load(Ordering::Acquire) != epoch {
            debug!(epoch, "fusion state replaced during cycle, discarding result");
            return false;
        }
        *current = fusion;
        true
    }

    /// Replaces the fusion state under the fusion lock and invalidates
    /// in-flight cycles.
    fn replace_state(&self, update: impl FnOnce(&mut KalmanFusion)) {
        let mut fusion = self.fusion.lock();
        self.epoch.fetch_add(1, Ordering::AcqRel);
        update(&mut fusion);
        *self.mailbox.lock() = Mailbox::default();
    }
}

/// Handle to a running worker thread
#[derive(Debug)]
struct Control {
    commands: Sender<WorkerCommand>,
}

/// Kalman fusion decoupled from sensor delivery timing
///
/// # Example
/// ```
/// use nalgebra::{UnitQuaternion, Vector3};
/// use orientation_fusion::{FusionSettings, KalmanWorker};
///
/// let mut worker = KalmanWorker::new(&FusionSettings::default());
/// worker.set_base_orientation(UnitQuaternion::identity());
///
/// worker.post_gyroscope(Vector3::zeros(), 0);
/// worker.post_gyroscope(Vector3::zeros(), 10_000_000);
/// let q = worker.tick().unwrap().unwrap();
/// assert!(q.angle() < 1e-6);
/// ```
#[derive(Debug)]
pub struct KalmanWorker {
    shared: Arc<Shared>,
    period: Duration,
    control: Option<Control>,
}

impl KalmanWorker {
    /// Create a stopped worker around a fresh Kalman fusion
    pub fn new(settings: &FusionSettings) -> Self {
        Self::with_fusion(KalmanFusion::with_settings(settings), settings.worker_period)
    }

    /// Create a stopped worker around an existing fusion, e.g. one with custom
    /// process and measurement models
    pub fn with_fusion(fusion: KalmanFusion, period: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                mailbox: Mutex::new(Mailbox::default()),
                fusion: Mutex::new(fusion),
                cycle: Mutex::new(()),
                epoch: AtomicU64::new(0),
                generation: AtomicU64::new(0),
            }),
            period,
            control: None,
        }
    }

    /// Wake-up period of the worker thread
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Whether a worker thread is running
    pub fn is_running(&self) -> bool {
        self.control.is_some()
    }

    /// Resets the fusion and starts the worker thread
    ///
    /// Does nothing when already running.
    ///
    /// # Errors
    /// [`FusionError::WorkerSpawn`] when the thread cannot be created.
    pub fn start(&mut self) -> Result<(), FusionError> {
        if self.control.is_some() {
            return Ok(());
        }

        self.reset();
        let generation = self.shared.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let (commands, receiver) = bounded(1);
        let shared = Arc::clone(&self.shared);
        let period = self.period;

        thread::Builder::new()
            .name("kalman-fusion".to_string())
            .spawn(move || run(shared, receiver, period, generation))
            .map_err(|error| {
                error!(%error, "failed to spawn kalman worker");
                FusionError::WorkerSpawn
            })?;

        info!(generation, period_ms = period.as_millis() as u64, "kalman worker started");
        self.control = Some(Control { commands });
        Ok(())
    }

    /// Requests the worker thread to stop without waiting for it
    ///
    /// Does nothing when not running.
    pub fn stop(&mut self) {
        let Some(control) = self.control.take() else {
            return;
        };

        let generation = self.shared.generation.fetch_add(1, Ordering::AcqRel);
        // A full channel already holds a shutdown request
        let _ = control.commands.try_send(WorkerCommand::Shutdown);
        info!(generation, "kalman worker stop requested");
    }

    /// Records the latest angular rate and accumulates the interval since the
    /// previous gyroscope timestamp.
    pub fn post_gyroscope(&self, rate: Vector3<f32>, timestamp_nanos: i64) {
        let mut mailbox = self.shared.mailbox.lock();
        mailbox.gyroscope = Some(rate);

        match mailbox.last_gyroscope_timestamp {
            Some(previous) if timestamp_nanos <= previous => {
                debug!(previous, timestamp_nanos, "gyroscope timestamp did not advance");
            }
            Some(previous) => {
                let dt_nanos = timestamp_nanos.saturating_sub(previous);
                mailbox.accumulated_dt_nanos =
                    mailbox.accumulated_dt_nanos.saturating_add(dt_nanos);
                mailbox.last_gyroscope_timestamp = Some(timestamp_nanos);
            }
            None => mailbox.last_gyroscope_timestamp = Some(timestamp_nanos),
        }
    }

    /// Records the latest acceleration
    pub fn post_acceleration(&self, acceleration: Vector3<f32>) {
        self.shared.mailbox.lock().acceleration = Some(acceleration);
    }

    /// Records the latest magnetic field
    pub fn post_magnetic(&self, magnetic: Vector3<f32>) {
        self.shared.mailbox.lock().magnetic = Some(magnetic);
    }

    /// Installs the starting orientation and clears pending samples
    pub fn set_base_orientation(&self, base: UnitQuaternion<f32>) {
        self.shared.replace_state(|fusion| fusion.set_base_orientation(base));
    }

    /// Whether a base orientation has been set
    pub fn is_initialized(&self) -> bool {
        self.shared.fusion.lock().is_initialized()
    }

    /// Most recently published orientation
    pub fn orientation(&self) -> Option<UnitQuaternion<f32>> {
        self.shared.fusion.lock().orientation()
    }

    /// Runs one cycle on the calling thread
    ///
    /// Returns the published orientation, or `None` when no gyroscope
    /// interval was pending, the fusion is not initialised, or a reset
    /// overtook the cycle.
    pub fn tick(&self) -> Result<Option<UnitQuaternion<f32>>, FusionError> {
        self.shared.run_cycle()
    }

    /// Returns the fusion to the uninitialised state and discards any cycle
    /// in flight
    pub fn reset(&self) {
        self.shared.replace_state(KalmanFusion::reset);
        debug!("kalman fusion reset");
    }
}

impl Drop for KalmanWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(shared: Arc<Shared>, commands: Receiver<WorkerCommand>, period: Duration, generation: u64) {
    loop {
        match commands.recv_timeout(period) {
            Ok(WorkerCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        if shared.generation.load(Ordering::Acquire) != generation {
            break;
        }

        if let Err(error) = shared.run_cycle() {
            warn!(%error, "kalman cycle failed");
        }
    }

    debug!(generation, "kalman worker exited");
}
