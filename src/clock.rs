//! The simulated clock.
//!
//! Every time-driven part of the runtime — the chrono service, task
//! statistics, trace timestamps — reads time through [`SimulatedClock`]
//! rather than [`std::time::Instant`] directly, so that tests can run a
//! `Every<10ms>` reaction to completion in microseconds of wall-clock time by
//! calling [`SimulatedClock::adjust_clock`].
//!
//! A small ring of clock versions, with an atomic "active" index selecting
//! the current one. Readers take a non-torn, lock-free load off the active
//! slot; writers publish a new slot and swing the index over with a CAS loop
//! rather than a mutex, since a currently-active slot is only ever read, not
//! mutated in place.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::atomic::AtomicCell;
use once_cell::sync::OnceCell;

const RING_SIZE: usize = 3;

static GLOBAL_CLOCK: OnceCell<Arc<SimulatedClock>> = OnceCell::new();

/// Register the process-wide clock: exactly one powerplant lives per
/// process, and its clock becomes the global one at construction. Called
/// once by [`crate::powerplant::PowerPlant::new`]; a second call is a no-op,
/// since a second powerplant cannot be constructed anyway.
pub fn install_global(clock: Arc<SimulatedClock>) {
    let _ = GLOBAL_CLOCK.set(clock);
}

/// The current simulated time from the process-wide clock, or `0` if no
/// powerplant has been constructed yet (e.g. in unit tests that exercise a
/// reaction outside of a running powerplant).
pub fn current_sim_time() -> SimNanos {
    GLOBAL_CLOCK.get().map(|clock| clock.now()).unwrap_or(0)
}

/// A point in simulated time, expressed as signed nanoseconds since the
/// clock's construction. Signed so that [`SimulatedClock::adjust_clock`] can
/// move the clock backwards (used by tests that want to re-run a window).
pub type SimNanos = i64;

#[derive(Clone, Copy)]
struct ClockData {
    /// Real-time instant this version became active.
    base_from: Instant,
    /// Simulated time at `base_from`.
    epoch: SimNanos,
    /// Rate of time: simulated nanoseconds per real nanosecond.
    rate_of_time: f64,
}

impl ClockData {
    fn initial(now: Instant) -> Self {
        Self {
            base_from: now,
            epoch: 0,
            rate_of_time: 1.0,
        }
    }
}

/// Monotonic, user-adjustable clock. One instance lives on the
/// [`crate::powerplant::PowerPlant`] and is shared (via `Arc`) with the
/// scheduler, chrono service, and statistics fabric.
pub struct SimulatedClock {
    data: [AtomicCell<ClockData>; RING_SIZE],
    active: AtomicUsize,
}

impl std::fmt::Debug for SimulatedClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedClock")
            .field("now", &self.now())
            .field("rate_of_time", &self.rate_of_time())
            .finish()
    }
}

impl Default for SimulatedClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedClock {
    pub fn new() -> Self {
        let now = Instant::now();
        let first = ClockData::initial(now);
        Self {
            data: [
                AtomicCell::new(first),
                AtomicCell::new(first),
                AtomicCell::new(first),
            ],
            active: AtomicUsize::new(0),
        }
    }

    /// Current simulated time. Wait-free: a single atomic index load plus a
    /// lock-free `AtomicCell` load.
    pub fn now(&self) -> SimNanos {
        let current = self.data[self.active.load(Ordering::Acquire)].load();
        Self::project(&current, Instant::now())
    }

    /// The current rate of time (simulated nanoseconds per real nanosecond).
    pub fn rate_of_time(&self) -> f64 {
        self.data[self.active.load(Ordering::Acquire)].load().rate_of_time
    }

    fn project(data: &ClockData, real_now: Instant) -> SimNanos {
        let elapsed_real = real_now.saturating_duration_since(data.base_from);
        let elapsed_sim = (elapsed_real.as_nanos() as f64) * data.rate_of_time;
        data.epoch.saturating_add(elapsed_sim as i64)
    }

    /// Shift simulated time forward (or backward) by `adjustment` and set a
    /// new rate of time. Serialized through an implicit compare-and-swap
    /// loop over `active` so concurrent adjusters never observe a
    /// half-written ring slot (the C++ original serializes with a mutex;
    /// a CAS loop over three pre-allocated slots gives the same exclusion
    /// without a blocking lock on this rarely-contended path).
    pub fn adjust_clock(&self, adjustment: Duration, rate_of_time: f64) {
        self.adjust_clock_signed(adjustment.as_nanos() as i64, rate_of_time)
    }

    /// As [`Self::adjust_clock`], but the adjustment may be negative.
    pub fn adjust_clock_signed(&self, adjustment_nanos: i64, rate_of_time: f64) {
        loop {
            let current_idx = self.active.load(Ordering::Acquire);
            let current = self.data[current_idx].load();
            let next_idx = (current_idx + 1) % RING_SIZE;

            let base = Instant::now();
            let next = ClockData {
                base_from: base,
                epoch: Self::project(&current, base).saturating_add(adjustment_nanos),
                rate_of_time,
            };
            self.data[next_idx].store(next);

            if self
                .active
                .compare_exchange(
                    current_idx,
                    next_idx,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                return;
            }
            // Lost the race with a concurrent adjuster; retry against the
            // now-current slot.
        }
    }

    /// Set simulated time to an absolute value and a new rate of time.
    pub fn set_clock(&self, time: SimNanos, rate_of_time: f64) {
        loop {
            let current_idx = self.active.load(Ordering::Acquire);
            let next_idx = (current_idx + 1) % RING_SIZE;
            let base = Instant::now();
            self.data[next_idx].store(ClockData {
                base_from: base,
                epoch: time,
                rate_of_time,
            });
            if self
                .active
                .compare_exchange(
                    current_idx,
                    next_idx,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                return;
            }
        }
    }

    /// The real-time duration that corresponds to a simulated-time interval
    /// at the current rate of time. Used by the chrono service to compute
    /// how long to sleep for. A `rate_of_time` of `0.0` yields `None`
    /// (never fires on its own; an explicit clock adjustment is required).
    pub fn sim_to_real(&self, sim_interval: Duration) -> Option<Duration> {
        let rtf = self.rate_of_time();
        if rtf <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(sim_interval.as_secs_f64() / rtf))
    }
}
