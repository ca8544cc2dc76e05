//! Adaptive smoothing filters for the orientation fusion library
//!
//! Every filter estimates the delivery rate of the samples it sees and derives
//! its behaviour from a time constant rather than a fixed sample count, so it
//! keeps the same cutoff when the host delivers samples with jitter.
//!
//! The filters are typically used as gravity estimators: low-pass filtering
//! the accelerometer leaves the gravity component.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use nalgebra::Vector3;

use crate::types::DEFAULT_TIME_CONSTANT;

/// Shared contract of the smoothing filters
pub trait SmoothingFilter: Send {
    /// Filters a sample using the current wall-clock time
    fn filter(&mut self, sample: Vector3<f32>) -> Vector3<f32> {
        self.filter_at(sample, Instant::now())
    }

    /// Filters a sample delivered at `now`
    fn filter_at(&mut self, sample: Vector3<f32>, now: Instant) -> Vector3<f32>;

    /// Changes the time constant in seconds
    fn set_time_constant(&mut self, time_constant: f32);

    /// Current time constant in seconds
    fn time_constant(&self) -> f32;

    /// Forgets the rate estimate and any buffered samples
    fn reset(&mut self);
}

/// Filter variant chosen at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterKind {
    /// Single-pole IIR low-pass
    #[default]
    LowPass,
    /// Windowed arithmetic mean
    Mean,
    /// Windowed per-axis median
    Median,
}

impl FilterKind {
    /// Builds a filter of this kind with the given time constant
    ///
    /// # Example
    /// ```
    /// use nalgebra::Vector3;
    /// use orientation_fusion::FilterKind;
    ///
    /// let mut filter = FilterKind::Median.build(0.18);
    /// let first = filter.filter(Vector3::new(0.0, 0.0, 9.81));
    /// assert_eq!(first, Vector3::new(0.0, 0.0, 9.81));
    /// ```
    pub fn build(self, time_constant: f32) -> Box<dyn SmoothingFilter> {
        match self {
            FilterKind::LowPass => Box::new(LowPassFilter::new(time_constant)),
            FilterKind::Mean => Box::new(MeanFilter::new(time_constant)),
            FilterKind::Median => Box::new(MedianFilter::new(time_constant)),
        }
    }
}

/// Online sample-rate estimate
///
/// Reports `samples seen so far / seconds since the first sample`. The first
/// sample, and any sample arriving with no elapsed time, yields 0 Hz.
#[derive(Debug, Clone, Copy, Default)]
pub struct SampleRateEstimator {
    start: Option<Instant>,
    count: u64,
    hz: f32,
}

impl SampleRateEstimator {
    /// Create an estimator with no samples
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a sample delivered at `now` and returns the updated estimate
    pub fn record(&mut self, now: Instant) -> f32 {
        let start = *self.start.get_or_insert(now);
        self.record_elapsed(now.saturating_duration_since(start))
    }

    /// Records a sample delivered `elapsed` after the first one
    pub fn record_elapsed(&mut self, elapsed: Duration) -> f32 {
        let seconds = elapsed.as_secs_f32();
        self.hz = if seconds > 0.0 {
            self.count as f32 / seconds
        } else {
            0.0
        };
        self.count += 1;
        self.hz
    }

    /// Most recent estimate in Hz
    pub fn hz(&self) -> f32 {
        self.hz
    }

    /// Number of samples recorded
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Forgets all samples
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Window length for a rate and time constant, never less than one sample
fn window_length(hz: f32, time_constant: f32) -> usize {
    let target = (hz * time_constant).ceil();
    if target.is_finite() && target >= 1.0 {
        target as usize
    } else {
        1
    }
}

/// Single-pole IIR low-pass filter
///
/// `y = alpha * y_prev + (1 - alpha) * x` with `alpha = tau / (tau + dt)` and
/// `dt` the reciprocal of the estimated delivery rate. The first sample is
/// returned unchanged and seeds the output.
#[derive(Debug, Clone)]
pub struct LowPassFilter {
    time_constant: f32,
    rate: SampleRateEstimator,
    output: Option<Vector3<f32>>,
}

impl LowPassFilter {
    /// Create a low-pass filter with the given time constant in seconds
    pub fn new(time_constant: f32) -> Self {
        Self {
            time_constant,
            rate: SampleRateEstimator::new(),
            output: None,
        }
    }
}

impl Default for LowPassFilter {
    fn default() -> Self {
        Self::new(DEFAULT_TIME_CONSTANT)
    }
}

impl SmoothingFilter for LowPassFilter {
    fn filter_at(&mut self, sample: Vector3<f32>, now: Instant) -> Vector3<f32> {
        let hz = self.rate.record(now);

        let output = match self.output {
            Some(previous) if hz > 0.0 => {
                let dt = 1.0 / hz;
                let alpha = self.time_constant / (self.time_constant + dt);
                previous * alpha + sample * (1.0 - alpha)
            }
            _ => sample,
        };

        self.output = Some(output);
        output
    }

    fn set_time_constant(&mut self, time_constant: f32) {
        self.time_constant = time_constant;
    }

    fn time_constant(&self) -> f32 {
        self.time_constant
    }

    fn reset(&mut self) {
        self.rate.reset();
        self.output = None;
    }
}

/// Sample window sized from the delivery rate and a time constant
#[derive(Debug, Clone)]
struct SmoothingWindow {
    time_constant: f32,
    rate: SampleRateEstimator,
    samples: VecDeque<Vector3<f32>>,
}

impl SmoothingWindow {
    fn new(time_constant: f32) -> Self {
        Self {
            time_constant,
            rate: SampleRateEstimator::new(),
            samples: VecDeque::new(),
        }
    }

    /// Appends the sample and trims the oldest ones down to the target length
    fn push(&mut self, sample: Vector3<f32>, now: Instant) {
        let hz = self.rate.record(now);
        let length = window_length(hz, self.time_constant);

        self.samples.push_back(sample);
        while self.samples.len() > length {
            self.samples.pop_front();
        }
    }

    fn reset(&mut self) {
        self.rate.reset();
        self.samples.clear();
    }
}

/// Windowed arithmetic mean
#[derive(Debug, Clone)]
pub struct MeanFilter {
    window: SmoothingWindow,
}

impl MeanFilter {
    /// Create a mean filter with the given time constant in seconds
    pub fn new(time_constant: f32) -> Self {
        Self {
            window: SmoothingWindow::new(time_constant),
        }
    }

    /// Number of samples currently averaged
    pub fn window_len(&self) -> usize {
        self.window.samples.len()
    }
}

impl Default for MeanFilter {
    fn default() -> Self {
        Self::new(DEFAULT_TIME_CONSTANT)
    }
}

impl SmoothingFilter for MeanFilter {
    fn filter_at(&mut self, sample: Vector3<f32>, now: Instant) -> Vector3<f32> {
        self.window.push(sample, now);

        let samples = &self.window.samples;
        if samples.is_empty() {
            return sample;
        }
        // f64 keeps long windows from accumulating rounding error
        let sum = samples.iter().fold(Vector3::<f64>::zeros(), |sum, s| sum + s.cast::<f64>());
        (sum / samples.len() as f64).cast::<f32>()
    }

    fn set_time_constant(&mut self, time_constant: f32) {
        self.window.time_constant = time_constant;
    }

    fn time_constant(&self) -> f32 {
        self.window.time_constant
    }

    fn reset(&mut self) {
        self.window.reset();
    }
}

/// Windowed per-axis median
#[derive(Debug, Clone)]
pub struct MedianFilter {
    window: SmoothingWindow,
}

impl MedianFilter {
    /// Create a median filter with the given time constant in seconds
    pub fn new(time_constant: f32) -> Self {
        Self {
            window: SmoothingWindow::new(time_constant),
        }
    }

    /// Number of samples the median is taken over
    pub fn window_len(&self) -> usize {
        self.window.samples.len()
    }
}

impl Default for MedianFilter {
    fn default() -> Self {
        Self::new(DEFAULT_TIME_CONSTANT)
    }
}

impl SmoothingFilter for MedianFilter {
    fn filter_at(&mut self, sample: Vector3<f32>, now: Instant) -> Vector3<f32> {
        self.window.push(sample, now);

        let samples = &self.window.samples;
        if samples.is_empty() {
            return sample;
        }

        let mut axis = Vec::with_capacity(samples.len());
        Vector3::from_fn(|i, _| {
            axis.clear();
            axis.extend(samples.iter().map(|s| s[i]));
            median(&mut axis)
        })
    }

    fn set_time_constant(&mut self, time_constant: f32) {
        self.window.time_constant = time_constant;
    }

    fn time_constant(&self) -> f32 {
        self.window.time_constant
    }

    fn reset(&mut self) {
        self.window.reset();
    }
}

/// Median of a non-empty slice; even lengths average the two middle values.
fn median(values: &mut [f32]) -> f32 {
    values.sort_unstable_by(f32::total_cmp);
    let middle = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[middle - 1] + values[middle]) / 2.0
    } else {
        values[middle]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PERIOD: Duration = Duration::from_millis(10); // 100 Hz

    /// Feeds `samples` at a fixed period and returns the last output
    fn run(
        filter: &mut dyn SmoothingFilter,
        samples: impl IntoIterator<Item = Vector3<f32>>,
    ) -> Vector3<f32> {
        run_from(filter, Instant::now(), 0, samples)
    }

    /// Continues a timeline begun at `start`, the first sample being tick `first`
    fn run_from(
        filter: &mut dyn SmoothingFilter,
        start: Instant,
        first: u32,
        samples: impl IntoIterator<Item = Vector3<f32>>,
    ) -> Vector3<f32> {
        let mut output = Vector3::zeros();
        for (tick, sample) in (first..).zip(samples) {
            output = filter.filter_at(sample, start + PERIOD * tick);
        }
        output
    }

    #[test]
    fn test_rate_estimator() {
        let mut rate = SampleRateEstimator::new();
        let start = Instant::now();

        assert_eq!(rate.record(start), 0.0);
        for i in 1..=100 {
            rate.record(start + PERIOD * i);
        }
        assert!((rate.hz() - 100.0).abs() < 0.5, "hz {}", rate.hz());
        assert_eq!(rate.count(), 101);

        rate.reset();
        assert_eq!(rate.count(), 0);
        assert_eq!(rate.record(start), 0.0);
    }

    #[test]
    fn test_window_length_clamps_to_one() {
        assert_eq!(window_length(0.0, 0.18), 1);
        assert_eq!(window_length(100.0, 0.0), 1);
        assert_eq!(window_length(f32::NAN, 0.18), 1);
        assert_eq!(window_length(100.0, 0.18), 18);
        assert_eq!(window_length(50.0, 0.05), 3);
    }

    #[test]
    fn test_low_pass_first_sample_passes_through() {
        let mut filter = LowPassFilter::new(0.18);
        let sample = Vector3::new(1.0, 2.0, 3.0);
        assert_eq!(filter.filter_at(sample, Instant::now()), sample);
    }

    #[test]
    fn test_low_pass_smooths_step() {
        let mut filter = LowPassFilter::new(0.18);
        let start = Instant::now();
        filter.filter_at(Vector3::zeros(), start);

        let output = filter.filter_at(Vector3::new(1.0, 1.0, 1.0), start + PERIOD);
        // alpha = 0.18 / (0.18 + 0.01)
        let expected = 1.0 - 0.18 / 0.19;
        assert!((output.x - expected).abs() < 1e-4, "output {}", output.x);
    }

    #[test]
    fn test_low_pass_converges_to_constant() {
        let mut filter = LowPassFilter::new(0.18);
        let constant = Vector3::new(0.1, 0.2, 9.81);
        let mut samples = vec![Vector3::zeros()];
        samples.extend(std::iter::repeat_n(constant, 500));

        let output = run(&mut filter, samples);
        assert!((output - constant).norm() < 1e-3);
    }

    #[test]
    fn test_mean_zero_time_constant_is_identity() {
        let mut filter = MeanFilter::new(0.0);
        let output = run(&mut filter, (0..50).map(|i| Vector3::new(i as f32, 0.0, 0.0)));
        assert_eq!(output, Vector3::new(49.0, 0.0, 0.0));
        assert_eq!(filter.window_len(), 1);
    }

    #[test]
    fn test_mean_window_tracks_rate() {
        let mut filter = MeanFilter::new(0.18);
        let start = Instant::now();
        run_from(&mut filter, start, 0, std::iter::repeat_n(Vector3::zeros(), 200));
        assert_eq!(filter.window_len(), 18);

        filter.set_time_constant(0.05);
        run_from(&mut filter, start, 200, std::iter::repeat_n(Vector3::zeros(), 1));
        assert!(filter.window_len() <= 5, "window {}", filter.window_len());
    }

    #[test]
    fn test_mean_averages_window() {
        let mut filter = MeanFilter::new(0.04);
        let samples = (0..100).map(|i| Vector3::new((i % 2) as f32, 1.0, 0.0));
        let output = run(&mut filter, samples);
        assert!((output.x - 0.5).abs() < 1e-6, "output {}", output.x);
        assert!((output.y - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_mean_converges_to_constant() {
        let mut filter = MeanFilter::new(5.0);
        let constant = Vector3::new(-1.0, 0.5, 9.81);
        let output = run(&mut filter, std::iter::repeat_n(constant, 300));
        assert_eq!(filter.window_len(), 300);
        assert!((output - constant).norm() <= constant.norm() * 1e-6, "output {:?}", output);
    }

    #[test]
    fn test_mean_long_window_keeps_precision() {
        let mut filter = MeanFilter::new(100.0);
        let constant = Vector3::new(0.1, -0.3, 9.81);
        let output = run(&mut filter, std::iter::repeat_n(constant, 5000));
        assert!((output - constant).norm() <= constant.norm() * 1e-6, "output {:?}", output);
    }

    #[test]
    fn test_median_zero_time_constant_is_identity() {
        let mut filter = MedianFilter::new(0.0);
        let output = run(&mut filter, (0..50).map(|i| Vector3::new(0.0, i as f32, 0.0)));
        assert_eq!(output, Vector3::new(0.0, 49.0, 0.0));
    }

    #[test]
    fn test_median_rejects_spikes() {
        let mut filter = MedianFilter::new(0.05);
        let mut samples: Vec<_> = std::iter::repeat_n(Vector3::new(1.0, 2.0, 3.0), 99).collect();
        samples.push(Vector3::new(100.0, -100.0, 50.0));

        let output = run(&mut filter, samples);
        assert_eq!(output, Vector3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn test_median_converges_to_constant() {
        let mut filter = MedianFilter::new(5.0);
        let constant = Vector3::new(0.3, -0.2, 9.7);
        let output = run(&mut filter, std::iter::repeat_n(constant, 300));
        assert_eq!(output, constant);
    }

    #[test]
    fn test_median_even_window() {
        let mut values = [4.0, 1.0, 3.0, 2.0];
        assert_eq!(median(&mut values), 2.5);
        let mut values = [5.0, -1.0, 3.0];
        assert_eq!(median(&mut values), 3.0);
    }

    #[test]
    fn test_reset_restarts_rate_estimate() {
        for kind in [FilterKind::LowPass, FilterKind::Mean, FilterKind::Median] {
            let mut filter = kind.build(0.18);
            run(filter.as_mut(), std::iter::repeat_n(Vector3::zeros(), 50));

            filter.reset();
            let sample = Vector3::new(7.0, 8.0, 9.0);
            assert_eq!(filter.filter_at(sample, Instant::now()), sample, "{:?}", kind);
        }
    }
}
