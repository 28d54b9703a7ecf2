use super::bucket::Bucket;
use super::config::InsightConfig;
use std::fmt;
use tracing::trace;

/// Width, in characters, of the longest bar drawn by `Display`.
pub const DEFAULT_RENDER_WIDTH: usize = 80;

#[doc(hidden)]
#[macro_export]
macro_rules! hv {
    ($h:ident, ($value:expr, $n:expr)) => ( for _ in 0..$n { $h.insert(($value) as f64); } );
    ($h:ident, ($value:expr)) => ( $h.insert(($value) as f64) );
    ($h:ident, $value:expr) => ( $h.insert(($value) as f64) )
}
/// hist! macro will turn a list of samples into a non-decaying [Histogram].
///
/// The samples can be of the form `value`, `(value)`, or `(value, repeat)`.
/// In the first two forms, the omitted `repeat` defaults to 1.  A leading
/// `bins;` sets the target bin count, which otherwise defaults to 100.
///
/// ```
/// use streaming_insight::hist;
///
/// let h = hist![4; 1, (2, 3), 7.5];
/// assert_eq!(h.target_bins(), 4);
/// assert_eq!(h.count(), 5.0);
/// ```
#[macro_export]
macro_rules! hist {
    () => ( $crate::Histogram::new(100, 1.0) );
    ($bins:expr; ) => ( $crate::Histogram::new($bins, 1.0) );
    ($bins:expr; $($hv:tt),+ $(,)?) => ( {
        let mut h = $crate::Histogram::new($bins, 1.0);
        $($crate::hv!(h, $hv);)+
        h
    } );
    ($($hv:tt),+ $(,)?) => ( $crate::hist![100; $($hv),+] );
}

#[derive(Debug, Clone)]
/// An adaptive histogram of exponentially decaying [Bucket]s.
///
/// The [Histogram] is the deterministic core of the estimator: nothing here
/// happens on its own.  Callers (or the [Insight](crate::Insight) worker) feed it
/// samples with [insert](Histogram::insert), age it with
/// [decay](Histogram::decay) and bound its size with
/// [reduce](Histogram::reduce).
pub struct Histogram {
    target_bins: usize,
    decay_factor: f64,
    resolution: f64,
    overage_limit: usize,
    epsilon: f64,
    pub(crate) buckets: Vec<Bucket>,
    /// `value` holds the weighted sum, `count` the weighted sample count.
    pub(crate) total: Bucket,
}

impl Histogram {
    /// This function creates a new, empty histogram that compresses toward
    /// `target_bins` buckets and multiplies every weight by `decay_factor` on
    /// each call to [decay](Histogram::decay).
    ///
    /// Every other parameter takes its default from [InsightConfig].
    ///
    /// # Panics
    ///
    /// Panics if `target_bins` is zero or `decay_factor` is outside `[0, 1]`.
    pub fn new(target_bins: usize, decay_factor: f64) -> Histogram {
        assert!(target_bins > 0, "target_bins must be positive");
        assert!(
            (0.0..=1.0).contains(&decay_factor),
            "decay_factor must be in [0, 1], got {}",
            decay_factor
        );
        let config = InsightConfig::default().with_target_bins(target_bins);
        Histogram {
            decay_factor,
            ..Histogram::from_config(&config)
        }
    }
    /// This function creates a new, empty histogram from a configuration.
    ///
    /// The decay factor is derived from the configured time constant and tick
    /// interval.  The configuration is expected to be
    /// [validated](InsightConfig::validate).
    pub fn from_config(config: &InsightConfig) -> Histogram {
        Histogram {
            target_bins: config.target_bins(),
            decay_factor: config.decay_factor(),
            resolution: config.resolution(),
            overage_limit: config.overage_limit(),
            epsilon: config.epsilon(),
            buckets: Vec::with_capacity(config.target_bins() * 5 / 4),
            total: Bucket::default(),
        }
    }
    pub fn target_bins(&self) -> usize {
        self.target_bins
    }
    pub fn decay_factor(&self) -> f64 {
        self.decay_factor
    }
    pub fn resolution(&self) -> f64 {
        self.resolution
    }
    /// The buckets, in ascending order of value.
    pub fn buckets(&self) -> &[Bucket] {
        &self.buckets
    }
    /// The number of buckets currently held.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
    fn key(&self, v: f64) -> f64 {
        (v / self.resolution).round()
    }
    /// This function will record one sample of `v` at unit weight.
    ///
    /// The sample is added to the running total and then to the bucket whose
    /// value snaps to the same multiple of the resolution.  When there is no
    /// such bucket, a new singleton bucket is inserted in order.  Insertion
    /// never merges buckets.  Non-finite samples are ignored.
    ///
    /// ```
    /// use streaming_insight::Histogram;
    ///
    /// let mut h = Histogram::new(10, 1.0);
    /// h.insert(2.0);
    /// h.insert(2.2);
    /// h.insert(1.0);
    /// assert_eq!(h.len(), 2);
    /// assert_eq!(h.buckets()[1].count(), 2.0);
    /// ```
    pub fn insert(&mut self, v: f64) {
        if !v.is_finite() {
            return;
        }
        self.total.count += 1.0;
        self.total.value += v;

        let key = self.key(v);
        let resolution = self.resolution;
        let idx = self.buckets.partition_point(|b| (b.value / resolution).round() < key);
        if let Some(bucket) = self.buckets.get_mut(idx) {
            if (bucket.value / resolution).round() == key {
                bucket.count += 1.0;
                return;
            }
        }
        self.buckets.insert(idx, Bucket::new(key * resolution, 1.0));
    }
    /// This function inserts `v` and then reduces the histogram if it has grown
    /// past its tolerated overage.
    pub fn record(&mut self, v: f64) {
        self.insert(v);
        if self.buckets.len() > self.overage_limit {
            self.reduce();
        }
    }
    /// This function ages every bucket and the running total by one tick.
    pub fn decay(&mut self) {
        self.decay_by(self.decay_factor);
    }
    /// This function multiplies every weight, and the weighted sum, by `factor`.
    pub fn decay_by(&mut self, factor: f64) {
        self.buckets.iter_mut().for_each(|b| b.count *= factor);
        self.total.count *= factor;
        self.total.value *= factor;
    }
    /// This function compresses the histogram back down to its target bin count.
    ///
    /// Nothing happens unless there are more buckets than the target.  Otherwise
    /// buckets whose weight decayed below the prune threshold are dropped
    /// (their weight stays in the running total), and then the closest adjacent
    /// pair is merged until the target is met.
    pub fn reduce(&mut self) {
        let before = self.buckets.len();
        if before <= self.target_bins {
            return;
        }

        let epsilon = self.epsilon;
        self.buckets.retain(|b| b.count >= epsilon);
        let pruned = before - self.buckets.len();

        while self.buckets.len() > self.target_bins {
            let i = self.closest();
            self.buckets[i] = self.buckets[i].merge(&self.buckets[i + 1]);
            self.buckets.remove(i + 1);
        }
        trace!(before, pruned, after = self.buckets.len(), "Reduced histogram.");
    }
    /// Index of the left bucket of the adjacent pair with the smallest gap.
    /// Ties go to the leftmost pair.
    fn closest(&self) -> usize {
        let mut ci = 0;
        let mut cv = f64::INFINITY;
        for (i, pair) in self.buckets.windows(2).enumerate() {
            let gap = pair[1].value - pair[0].value;
            if gap < cv {
                cv = gap;
                ci = i;
            }
        }
        ci
    }
    /// This function will empty the histogram of all recorded samples.
    pub fn clear(&mut self) {
        self.buckets.clear();
        self.total = Bucket::default();
    }
}

impl fmt::Display for Histogram {
    /// Draws the histogram as a bar chart, one bucket per line.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(DEFAULT_RENDER_WIDTH))
    }
}
