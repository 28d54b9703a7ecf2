use super::Histogram;

impl Histogram {
    /// The decayed weight of all samples recorded so far.
    ///
    /// Weight pruned from the buckets during reduction still counts here.
    pub fn count(&self) -> f64 {
        self.total.count
    }
    /// Calculate the decay-weighted mean of all samples.
    ///
    /// An empty or fully decayed histogram has a mean of 0.
    pub fn mean(&self) -> f64 {
        if self.total.count <= 0.0 {
            0.0
        } else {
            self.total.value / self.total.count
        }
    }
    /// Calculate an approximate percentile, `pct` in the range (0,100).
    ///
    /// This walks the buckets in ascending order until `pct` percent of the
    /// total weight has been passed and returns the value of the bucket where
    /// that happened.  If the walk runs out (rounding near 100, or weight lost
    /// to pruning), the largest bucket value is returned.  An empty histogram
    /// yields 0.  `pct` is not validated; values outside (0,100) resolve to the
    /// boundary buckets.
    ///
    /// ```
    /// use streaming_insight::hist;
    ///
    /// let h = hist![(1, 50), (2, 40), (3, 10)];
    /// assert_eq!(h.percentile(50.0), 1.0);
    /// assert_eq!(h.percentile(90.0), 2.0);
    /// assert_eq!(h.percentile(95.0), 3.0);
    /// ```
    pub fn percentile(&self, pct: f64) -> f64 {
        let last = match self.buckets.last() {
            Some(bucket) => bucket.value,
            None => return 0.0,
        };
        let mut limit = self.total.count * pct / 100.0;
        for bucket in self.buckets.iter() {
            limit -= bucket.count;
            if limit <= 0.0 {
                return bucket.value;
            }
        }
        last
    }
    /// Calculate a set of approximate percentiles.
    pub fn percentiles<const N: usize>(&self, pcts: &[f64; N]) -> [f64; N] {
        let mut out = [0.0; N];
        for (o, pct) in out.iter_mut().zip(pcts.iter()) {
            *o = self.percentile(*pct);
        }
        out
    }
    /// Draw a bar chart of the buckets.
    ///
    /// Each line holds the bucket value (truncated to an integer) and a bar of
    /// `#` scaled so that the heaviest bucket spans `width` characters.  An
    /// empty histogram renders as an empty string.
    pub fn render(&self, width: usize) -> String {
        let mut out = String::new();
        let max = self.buckets.iter().fold(0.0f64, |m, b| m.max(b.count));
        let scale = if max > 0.0 { width as f64 / max } else { 0.0 };
        for bucket in self.buckets.iter() {
            let bar = (bucket.count * scale) as usize;
            out.push_str(&format!("{:8} {}\n", bucket.value as i64, "#".repeat(bar)));
        }
        out
    }
}
