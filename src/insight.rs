use std::{
    fmt,
    sync::{
        atomic::{
            AtomicBool,
            Ordering::{AcqRel, Acquire},
        },
        mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender, TrySendError},
        Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use tracing::{debug, error, warn};

use super::{Error, Histogram, InsightConfig};

enum Message {
    Sample(f64),
    Stop,
}

/// A thread-safe, continuously decaying estimator of a stream's mean and percentiles.
///
/// Each `Insight` owns a background worker thread, which is the only thing that mutates the underlying
/// [Histogram]. Samples reach it through a bounded queue: [add](Insight::add) never blocks, and when the queue is
/// full the sample is dropped. The worker also wakes on a fixed tick to decay every weight and compress the
/// histogram.
///
/// Queries take a shared lock, so any number of readers can run at once, but never while the worker is in the
/// middle of an update.
///
/// Once [closed](Insight::close) (or dropped), the worker is gone: queries keep answering from the last state, and
/// new samples are discarded.
pub struct Insight {
    state: Arc<RwLock<Histogram>>,
    samples_tx: SyncSender<Message>,
    worker: Mutex<Option<JoinHandle<()>>>,
    closed: Arc<AtomicBool>,
    dropping: AtomicBool,
}

impl Insight {
    /// Creates a new estimator with `target_bins` buckets whose sample weights halve every `time_constant`.
    ///
    /// Typical values are 50 to 100 bins, and a time constant of seconds to minutes.
    ///
    /// # Errors
    ///
    /// If either parameter is zero, or the worker thread cannot be spawned, an error is returned.
    pub fn new(target_bins: usize, time_constant: Duration) -> Result<Self, Error> {
        Self::with_config(InsightConfig::new(target_bins, time_constant))
    }

    /// Creates a new estimator from the given configuration.
    ///
    /// # Errors
    ///
    /// If the configuration is invalid, or the worker thread cannot be spawned, an error is returned.
    pub fn with_config(config: InsightConfig) -> Result<Self, Error> {
        config.validate()?;

        let state = Arc::new(RwLock::new(Histogram::from_config(&config)));
        let closed = Arc::new(AtomicBool::new(false));
        let (samples_tx, samples_rx) = sync_channel(config.queue_capacity());

        let worker = Worker {
            state: Arc::clone(&state),
            samples_rx,
            closed: Arc::clone(&closed),
            tick_interval: config.tick_interval(),
        };
        let handle = thread::Builder::new()
            .name(config.thread_name().to_string())
            .spawn(move || worker.run())?;

        debug!(
            target_bins = config.target_bins(),
            time_constant = ?config.time_constant(),
            tick_interval = ?config.tick_interval(),
            decay_factor = config.decay_factor(),
            queue_capacity = config.queue_capacity(),
            "Spawned insight worker."
        );

        Ok(Self {
            state,
            samples_tx,
            worker: Mutex::new(Some(handle)),
            closed,
            dropping: AtomicBool::new(false),
        })
    }

    /// Adds a sample.
    ///
    /// This never blocks. If the worker has fallen behind and the queue is full, or the estimator is closed, the
    /// sample is silently dropped.
    pub fn add(&self, value: f64) {
        match self.samples_tx.try_send(Message::Sample(value)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                // We only want to log about this once, since otherwise we'd be logging at the sample rate.
                if !self.dropping.swap(true, AcqRel) {
                    warn!("Insight sample queue is full. Samples are being dropped.");
                }
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    /// Stops the worker thread and waits for it to exit.
    ///
    /// Samples still queued may or may not be applied. Calling this more than once, or from several threads at
    /// the same time, is harmless: only the first call does anything.
    pub fn close(&self) {
        if self.closed.swap(true, AcqRel) {
            return;
        }

        // Wakes the worker if it is waiting on an empty queue. If it has already exited, there is nobody to tell.
        let _ = self.samples_tx.send(Message::Stop);

        let handle = self.worker.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("Insight worker thread panicked.");
            }
        }
    }

    /// Returns `true` if the estimator has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Acquire)
    }

    fn read(&self) -> RwLockReadGuard<'_, Histogram> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the decay-weighted mean, or 0 if there is no (remaining) weight.
    pub fn mean(&self) -> f64 {
        self.read().mean()
    }

    /// Returns the approximate value at percentile `pct`, which should be in the range (0,100).
    ///
    /// See [Histogram::percentile].
    pub fn percentile(&self, pct: f64) -> f64 {
        self.read().percentile(pct)
    }

    /// Returns several percentiles computed against the same state.
    pub fn percentiles<const N: usize>(&self, pcts: &[f64; N]) -> [f64; N] {
        self.read().percentiles(pcts)
    }

    /// Returns the decayed weight of all samples applied so far.
    pub fn count(&self) -> f64 {
        self.read().count()
    }

    /// Returns a bar chart of the current buckets, for diagnostics.
    pub fn render(&self) -> String {
        self.read().to_string()
    }

    /// Returns a copy of the current histogram.
    pub fn snapshot(&self) -> Histogram {
        self.read().clone()
    }
}

impl fmt::Display for Insight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.read(), f)
    }
}

impl fmt::Debug for Insight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Insight")
            .field("state", &*self.read())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Drop for Insight {
    fn drop(&mut self) {
        self.close();
    }
}

struct Worker {
    state: Arc<RwLock<Histogram>>,
    samples_rx: Receiver<Message>,
    closed: Arc<AtomicBool>,
    tick_interval: Duration,
}

impl Worker {
    fn write(&self) -> RwLockWriteGuard<'_, Histogram> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn run(self) {
        debug!("Insight worker running.");

        let mut next_tick = Instant::now() + self.tick_interval;
        while !self.closed.load(Acquire) {
            // At most one tick per pass, so queued samples always get a turn. Missed ticks are dropped rather than
            // replayed in a burst.
            let now = Instant::now();
            if now >= next_tick {
                let mut state = self.write();
                state.decay();
                state.reduce();
                next_tick = next_deadline(next_tick, Instant::now(), self.tick_interval);
            }

            match self.samples_rx.recv_timeout(next_tick.saturating_duration_since(Instant::now())) {
                Ok(Message::Sample(value)) => self.write().record(value),
                Ok(Message::Stop) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {}
            }
        }

        debug!("Insight worker stopped.");
    }
}

/// Deadline of the tick after the one due at `due`, measured from `now`.
///
/// A worker that has fallen more than one interval behind skips the missed ticks.
fn next_deadline(due: Instant, now: Instant, interval: Duration) -> Instant {
    let next = due + interval;
    if next <= now {
        now + interval
    } else {
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::*;

    const SETTLE_TIMEOUT: Duration = Duration::from_secs(10);

    fn wait_for(insight: &Insight, mut cond: impl FnMut(&Insight) -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < SETTLE_TIMEOUT {
            if cond(insight) {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn rejects_invalid_parameters() {
        assert!(matches!(Insight::new(0, Duration::from_secs(1)), Err(Error::InvalidTargetBins)));
        assert!(matches!(Insight::new(10, Duration::ZERO), Err(Error::InvalidTimeConstant)));
        let config = InsightConfig::new(10, Duration::from_secs(1)).with_queue_capacity(0);
        assert!(matches!(Insight::with_config(config), Err(Error::InvalidQueueCapacity)));
    }

    #[test]
    fn empty() {
        let insight = Insight::new(50, Duration::from_secs(60)).unwrap();
        assert_eq!(insight.mean(), 0.0);
        assert_eq!(insight.percentile(95.0), 0.0);
        assert_eq!(insight.render(), "");
        assert_eq!(insight.to_string(), "");
        insight.close();
    }

    #[test]
    fn samples_reach_worker() {
        let insight = Insight::new(50, Duration::from_secs(3600)).unwrap();
        for v in 0..100 {
            insight.add((v % 10) as f64);
        }
        assert!(wait_for(&insight, |i| i.count() > 99.0));
        assert_relative_eq!(insight.mean(), 4.5, epsilon = 1e-9);
        assert_eq!(insight.percentile(1.0), 0.0);
        assert_eq!(insight.percentile(99.0), 9.0);
        assert_eq!(insight.percentiles(&[45.0, 95.0]), [4.0, 9.0]);
        assert_eq!(insight.snapshot().len(), 10);
        assert_eq!(insight.render().lines().count(), 10);
    }

    #[test]
    fn worker_decays_over_time() {
        let insight = Insight::new(50, Duration::from_millis(100)).unwrap();
        for _ in 0..10 {
            insight.add(7.0);
        }
        assert!(wait_for(&insight, |i| !i.snapshot().is_empty()));
        let count = insight.count();
        assert!(count <= 10.0);
        thread::sleep(Duration::from_millis(500));
        assert!(insight.count() < 1.0);
        assert_relative_eq!(insight.mean(), 7.0, epsilon = 1e-9);
    }

    #[test]
    fn close_is_idempotent() {
        let insight = Insight::new(50, Duration::from_secs(60)).unwrap();
        assert!(!insight.is_closed());
        insight.close();
        assert!(insight.is_closed());
        insight.close();

        insight.add(3.0);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(insight.count(), 0.0);
        assert_eq!(insight.mean(), 0.0);
    }

    #[test]
    fn frozen_after_close() {
        let insight = Insight::new(50, Duration::from_millis(100)).unwrap();
        insight.add(2.0);
        insight.add(4.0);
        assert!(wait_for(&insight, |i| i.snapshot().len() == 2));
        insight.close();

        let count = insight.count();
        thread::sleep(Duration::from_millis(300));
        assert_eq!(insight.count(), count);
        assert_relative_eq!(insight.mean(), 3.0, epsilon = 1e-9);
    }

    #[test]
    fn full_queue_drops_without_blocking() {
        const CAPACITY: usize = 8;
        let config = InsightConfig::new(10, Duration::from_secs(1_000_000)).with_queue_capacity(CAPACITY);
        let insight = Insight::with_config(config).unwrap();
        assert!(!insight.dropping.load(Acquire));

        // Stall the worker: it can take at most one sample off the queue before blocking on the lock.
        let guard = insight.state.write().unwrap();
        for _ in 0..10 * CAPACITY {
            insight.add(1.0);
        }
        assert!(insight.dropping.load(Acquire));
        assert_eq!(guard.count(), 0.0);
        drop(guard);

        assert!(wait_for(&insight, |i| i.count() > CAPACITY as f64 - 0.5));
        thread::sleep(Duration::from_millis(50));
        let count = insight.count();
        let accepted = count.round();
        assert!(accepted == CAPACITY as f64 || accepted == CAPACITY as f64 + 1.0, "count {}", count);
        assert_relative_eq!(count, accepted, epsilon = 1e-3);
        assert_relative_eq!(insight.mean(), 1.0, epsilon = 1e-9);

        // the flag stays set, so later drops do not log again
        for _ in 0..10 * CAPACITY {
            insight.add(2.0);
        }
        assert!(insight.dropping.load(Acquire));
        insight.close();
    }

    #[test]
    fn tiny_tick_still_applies_samples() {
        let insight = Insight::new(10, Duration::from_nanos(20)).unwrap();
        for _ in 0..5 {
            insight.add(5.0);
        }
        assert!(wait_for(&insight, |i| !i.snapshot().is_empty()));
        assert_eq!(insight.snapshot().buckets()[0].value(), 5.0);
        insight.close();
    }

    #[test]
    fn next_deadline_skips_missed_ticks() {
        let interval = Duration::from_millis(10);
        let due = Instant::now();
        assert_eq!(next_deadline(due, due + Duration::from_millis(3), interval), due + interval);
        let late = due + Duration::from_millis(35);
        assert_eq!(next_deadline(due, late, interval), late + interval);
        assert_eq!(next_deadline(due, due + interval, interval), due + 2 * interval);
    }

    #[test]
    fn concurrent_producers_and_readers() {
        let insight = Arc::new(Insight::new(64, Duration::from_secs(3600)).unwrap());

        let producers = (0..4)
            .map(|_| {
                let insight = Arc::clone(&insight);
                thread::spawn(move || {
                    for v in 0..200 {
                        insight.add((v % 100) as f64);
                    }
                })
            })
            .collect::<Vec<_>>();
        let readers = (0..2)
            .map(|_| {
                let insight = Arc::clone(&insight);
                thread::spawn(move || {
                    for _ in 0..200 {
                        let mean = insight.mean();
                        assert!((0.0..100.0).contains(&mean));
                        let p = insight.percentile(90.0);
                        assert!((0.0..100.0).contains(&p));
                        let _ = insight.render();
                    }
                })
            })
            .collect::<Vec<_>>();
        for handle in producers.into_iter().chain(readers) {
            handle.join().unwrap();
        }

        assert!(wait_for(&insight, |i| i.count() > 790.0));
        let mean = insight.mean();
        assert!((45.0..=55.0).contains(&mean), "mean {}", mean);
        let snapshot = insight.snapshot();
        assert!(snapshot.len() <= 64 + 64 / 5);
        insight.close();
    }
}
