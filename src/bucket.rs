use std::fmt;

/// A [Bucket] is a representative sample value carrying a decayable weight.
///
/// The `count` is not an integer tally: decay shrinks it fractionally, and merges
/// add the counts of both parents.  A histogram keeps its buckets strictly
/// ascending by `value`.
#[derive(PartialEq, Debug, Copy, Clone, Default)]
pub struct Bucket {
    pub(crate) value: f64,
    pub(crate) count: f64,
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{:.3}", self.value, self.count)
    }
}

impl Bucket {
    /// This function creates a bucket at `value` with weight `count`.
    pub fn new(value: f64, count: f64) -> Bucket {
        Bucket { value, count }
    }
    /// The representative value of the bucket.
    pub fn value(&self) -> f64 {
        self.value
    }
    /// The (decayed) weight of the bucket.
    pub fn count(&self) -> f64 {
        self.count
    }
    /// This function combines two buckets into one.
    ///
    /// The merged count is the sum of both counts and the merged value is the
    /// count-weighted average of both values, so the total weight and the
    /// weighted sum are conserved.  Two weightless buckets merge at their midpoint.
    pub fn merge(&self, other: &Bucket) -> Bucket {
        let count = self.count + other.count;
        let value = if count > 0.0 {
            (self.count * self.value + other.count * other.value) / count
        } else {
            (self.value + other.value) / 2.0
        };
        Bucket { value, count }
    }
}

impl From<(f64, f64)> for Bucket {
    fn from((value, count): (f64, f64)) -> Self {
        Bucket::new(value, count)
    }
}

impl From<&Bucket> for (f64, f64) {
    fn from(bucket: &Bucket) -> Self {
        (bucket.value, bucket.count)
    }
}
