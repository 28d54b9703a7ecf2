//! A bounded-memory, moving estimator of a stream's mean and percentiles.
//!
//! Samples are kept in a small adaptive histogram of `(value, weight)` buckets.
//! Weights decay exponentially with a configurable half-life, and neighbouring
//! buckets are merged whenever the histogram grows past its target size, so the
//! statistics follow recent behaviour while memory stays fixed.
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//! use streaming_insight::Insight;
//!
//! // 100 buckets, weight halves every 30 seconds
//! let latency = Insight::new(100, Duration::from_secs(30))?;
//!
//! // Record from any thread; this never blocks
//! latency.add(12.0);
//! latency.add(17.0);
//!
//! // Query from any thread
//! println!("mean: {}ms, p99: {}ms", latency.mean(), latency.percentile(99.0));
//! latency.close();
//! # Ok::<(), streaming_insight::Error>(())
//! ```
//!
//! The [Histogram] underneath is usable on its own when the caller drives decay
//! and reduction:
//!
//! ```
//! use streaming_insight::Histogram;
//!
//! let mut h = Histogram::new(10, 0.5);
//! for v in [3.0, 1.0, 2.0, 2.0] {
//!     h.insert(v);
//! }
//! assert_eq!(h.len(), 3);
//! assert_eq!(h.mean(), 2.0);
//! h.decay();
//! assert_eq!(h.count(), 2.0);
//! ```
mod bucket;
mod config;
#[macro_use]
mod histogram;
mod analysis;
mod insight;

pub use bucket::Bucket;
pub use config::{
    InsightConfig, DEFAULT_OVERAGE_RATIO, DEFAULT_PRUNE_THRESHOLD, DEFAULT_QUEUE_CAPACITY, DEFAULT_RESOLUTION,
    DEFAULT_THREAD_NAME, MAX_TICK_INTERVAL, TICKS_PER_TIME_CONSTANT,
};
pub use histogram::{Histogram, DEFAULT_RENDER_WIDTH};
pub use insight::Insight;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("target bin count must be positive")]
    InvalidTargetBins,
    #[error("decay time constant must be long enough to tick (at least 10ns)")]
    InvalidTimeConstant,
    #[error("queue capacity must be positive")]
    InvalidQueueCapacity,
    #[error("resolution must be finite and positive, got {}", .0)]
    InvalidResolution(f64),
    #[error("{} must be finite and non-negative, got {}", .name, .value)]
    InvalidParameter { name: &'static str, value: f64 },
    #[error("failed to spawn worker thread")]
    Spawn(#[from] std::io::Error),
}
