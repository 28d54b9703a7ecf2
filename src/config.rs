use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::Error;

/// Number of samples that may wait in the queue before new samples are dropped.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;
/// Fraction of `target_bins` the bucket list may exceed before an insertion forces a
/// reduction.
pub const DEFAULT_OVERAGE_RATIO: f64 = 0.2;
/// Buckets lighter than `prune_threshold / target_bins` are discarded on reduction.
pub const DEFAULT_PRUNE_THRESHOLD: f64 = 0.5;
/// Grid spacing used to decide whether a sample lands in an existing bucket.
pub const DEFAULT_RESOLUTION: f64 = 1.0;
/// Default name of the worker thread.
pub const DEFAULT_THREAD_NAME: &str = "streaming-insight";

const DEFAULT_TARGET_BINS: usize = 100;
const DEFAULT_TIME_CONSTANT: Duration = Duration::from_secs(10);

/// Decay never ticks less often than this.
pub const MAX_TICK_INTERVAL: Duration = Duration::from_secs(1);
/// Decay ticks at least this many times per time constant.
pub const TICKS_PER_TIME_CONSTANT: u32 = 10;

/// Estimator configuration.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct InsightConfig {
    /// Number of buckets the reducer compresses toward.
    target_bins: usize,

    /// Half-life of a sample's weight.
    time_constant: Duration,

    /// Depth of the sample queue feeding the worker.
    queue_capacity: usize,

    /// Tolerated overage before insertion triggers a reduction.
    overage_ratio: f64,

    /// Numerator of the per-bucket prune threshold.
    prune_threshold: f64,

    /// Match grid spacing.
    resolution: f64,

    /// Name given to the worker thread.
    thread_name: String,
}

impl InsightConfig {
    /// Creates a configuration with the given bucket target and decay time constant, and defaults for everything
    /// else.
    ///
    /// Typical values are 50 to 100 bins and a time constant of seconds to minutes.
    pub fn new(target_bins: usize, time_constant: Duration) -> Self {
        Self {
            target_bins,
            time_constant,
            ..Self::default()
        }
    }

    /// Sets the number of buckets the reducer compresses toward.
    pub fn with_target_bins(mut self, target_bins: usize) -> Self {
        self.target_bins = target_bins;
        self
    }

    /// Sets the decay time constant: the weight of a sample halves every `time_constant`.
    pub fn with_time_constant(mut self, time_constant: Duration) -> Self {
        self.time_constant = time_constant;
        self
    }

    /// Sets the depth of the sample queue.
    ///
    /// When the queue is full, newly added samples are dropped.
    ///
    /// Defaults to 1000.
    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    /// Sets how far past `target_bins` (as a fraction) the bucket list may grow before an insertion reduces it.
    ///
    /// Larger values amortize compression better at high insertion rates, at the cost of memory.
    ///
    /// Defaults to 0.2.
    pub fn with_overage_ratio(mut self, overage_ratio: f64) -> Self {
        self.overage_ratio = overage_ratio;
        self
    }

    /// Sets the prune threshold. Buckets whose weight has decayed below `prune_threshold / target_bins` are
    /// discarded during reduction.
    ///
    /// Defaults to 0.5.
    pub fn with_prune_threshold(mut self, prune_threshold: f64) -> Self {
        self.prune_threshold = prune_threshold;
        self
    }

    /// Sets the match resolution.
    ///
    /// Samples are snapped to multiples of `resolution`, and a sample accumulates into an existing bucket when
    /// both snap to the same multiple. With the default of 1.0, integer samples are tracked exactly until the
    /// reducer has to merge buckets.
    ///
    /// Defaults to 1.0.
    pub fn with_resolution(mut self, resolution: f64) -> Self {
        self.resolution = resolution;
        self
    }

    /// Sets the name of the worker thread.
    ///
    /// Defaults to `streaming-insight`.
    pub fn with_thread_name(mut self, thread_name: impl Into<String>) -> Self {
        self.thread_name = thread_name.into();
        self
    }

    pub fn target_bins(&self) -> usize {
        self.target_bins
    }

    pub fn time_constant(&self) -> Duration {
        self.time_constant
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    pub fn overage_ratio(&self) -> f64 {
        self.overage_ratio
    }

    pub fn prune_threshold(&self) -> f64 {
        self.prune_threshold
    }

    pub fn resolution(&self) -> f64 {
        self.resolution
    }

    pub fn thread_name(&self) -> &str {
        &self.thread_name
    }

    /// Interval between decay ticks: a tenth of the time constant, capped at one second.
    pub fn tick_interval(&self) -> Duration {
        (self.time_constant / TICKS_PER_TIME_CONSTANT).min(MAX_TICK_INTERVAL)
    }

    /// Multiplicative decay applied at every tick, chosen so that weight halves once per time constant.
    pub fn decay_factor(&self) -> f64 {
        if self.time_constant.is_zero() {
            return 0.0;
        }
        0.5f64.powf(self.tick_interval().as_secs_f64() / self.time_constant.as_secs_f64())
    }

    /// Bucket count above which an insertion triggers a reduction.
    pub fn overage_limit(&self) -> usize {
        // float-to-int casts saturate
        self.target_bins.saturating_add((self.target_bins as f64 * self.overage_ratio) as usize)
    }

    /// Weight below which a bucket is pruned during reduction.
    pub fn epsilon(&self) -> f64 {
        self.prune_threshold / self.target_bins as f64
    }

    /// Checks that every parameter is usable.
    pub fn validate(&self) -> Result<(), Error> {
        if self.target_bins == 0 {
            return Err(Error::InvalidTargetBins);
        }
        if self.tick_interval().is_zero() {
            return Err(Error::InvalidTimeConstant);
        }
        if self.queue_capacity == 0 {
            return Err(Error::InvalidQueueCapacity);
        }
        if !self.resolution.is_finite() || self.resolution <= 0.0 {
            return Err(Error::InvalidResolution(self.resolution));
        }
        for (name, value) in [("overage_ratio", self.overage_ratio), ("prune_threshold", self.prune_threshold)] {
            if !value.is_finite() || value < 0.0 {
                return Err(Error::InvalidParameter { name, value });
            }
        }
        Ok(())
    }
}

impl Default for InsightConfig {
    fn default() -> Self {
        Self {
            target_bins: DEFAULT_TARGET_BINS,
            time_constant: DEFAULT_TIME_CONSTANT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            overage_ratio: DEFAULT_OVERAGE_RATIO,
            prune_threshold: DEFAULT_PRUNE_THRESHOLD,
            resolution: DEFAULT_RESOLUTION,
            thread_name: DEFAULT_THREAD_NAME.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::*;

    #[test]
    fn tick_interval() {
        assert_eq!(InsightConfig::new(50, Duration::from_secs(1)).tick_interval(), Duration::from_millis(100));
        assert_eq!(InsightConfig::new(50, Duration::from_secs(10)).tick_interval(), Duration::from_secs(1));
        assert_eq!(InsightConfig::new(50, Duration::from_secs(300)).tick_interval(), Duration::from_secs(1));
    }

    #[test]
    fn decay_factor_halves_per_time_constant() {
        for secs in [1, 10, 60, 600] {
            let config = InsightConfig::new(100, Duration::from_secs(secs));
            let ticks = config.time_constant().as_secs_f64() / config.tick_interval().as_secs_f64();
            assert_relative_eq!(config.decay_factor().powf(ticks), 0.5, epsilon = 1e-9);
        }
        assert_relative_eq!(InsightConfig::new(100, Duration::from_secs(1)).decay_factor(), 0.5f64.powf(0.1));
    }

    #[test]
    fn derived_limits() {
        let config = InsightConfig::new(100, Duration::from_secs(1));
        assert_eq!(config.overage_limit(), 120);
        assert_relative_eq!(config.epsilon(), 0.005);
        assert_eq!(InsightConfig::new(7, Duration::from_secs(1)).overage_limit(), 8);
    }

    #[test]
    fn huge_overage_ratio_saturates() {
        let config = InsightConfig::new(100, Duration::from_secs(1)).with_overage_ratio(1e20);
        assert!(config.validate().is_ok());
        assert_eq!(config.overage_limit(), usize::MAX);
        assert_eq!(config.clone().with_target_bins(usize::MAX).overage_limit(), usize::MAX);

        let mut h = crate::Histogram::from_config(&config);
        for v in 0..300 {
            h.record(v as f64);
        }
        assert_eq!(h.len(), 300);
    }

    #[test]
    fn validation() {
        let ok = InsightConfig::new(100, Duration::from_secs(1));
        assert!(ok.validate().is_ok());
        assert!(matches!(ok.clone().with_target_bins(0).validate(), Err(Error::InvalidTargetBins)));
        assert!(matches!(
            ok.clone().with_time_constant(Duration::ZERO).validate(),
            Err(Error::InvalidTimeConstant)
        ));
        // too short to tick
        assert!(matches!(
            ok.clone().with_time_constant(Duration::from_nanos(9)).validate(),
            Err(Error::InvalidTimeConstant)
        ));
        assert!(matches!(ok.clone().with_queue_capacity(0).validate(), Err(Error::InvalidQueueCapacity)));
        assert!(matches!(ok.clone().with_resolution(0.0).validate(), Err(Error::InvalidResolution(_))));
        assert!(matches!(ok.clone().with_resolution(f64::NAN).validate(), Err(Error::InvalidResolution(_))));
        assert!(matches!(
            ok.clone().with_overage_ratio(-0.1).validate(),
            Err(Error::InvalidParameter { name: "overage_ratio", .. })
        ));
        assert!(matches!(
            ok.with_prune_threshold(f64::INFINITY).validate(),
            Err(Error::InvalidParameter { name: "prune_threshold", .. })
        ));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn deserialize_partial() {
        let config: InsightConfig =
            serde_json::from_str(r#"{"target_bins": 64, "time_constant": {"secs": 30, "nanos": 0}}"#).unwrap();
        assert_eq!(config.target_bins(), 64);
        assert_eq!(config.time_constant(), Duration::from_secs(30));
        assert_eq!(config.queue_capacity(), DEFAULT_QUEUE_CAPACITY);
        assert_eq!(config.thread_name(), DEFAULT_THREAD_NAME);
    }
}
