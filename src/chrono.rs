//! The chrono service: a sorted step list, a dedicated thread, and a
//! scan → fire → re-sort → sleep loop driven by the simulated clock rather
//! than wall time.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::clock::{SimNanos, SimulatedClock};

type OneShotCallback = Box<dyn FnOnce() + Send>;
type PeriodicCallback = Arc<dyn Fn() + Send + Sync>;

/// Identifies a periodic step so repeated `Every<period, T>` declarations
/// share one wheel: idempotent per `(period, message-type)` key.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
struct PeriodicKey {
    period_nanos: u64,
    message_type: std::any::TypeId,
}

enum StepBody {
    Periodic {
        key: PeriodicKey,
        period: Duration,
        callback: PeriodicCallback,
    },
    OneShot {
        callback: Mutex<Option<OneShotCallback>>,
    },
}

struct Step {
    id: u64,
    next_fire: SimNanos,
    body: StepBody,
}

/// Ordered by `next_fire` ascending so the front of the heap (via `Reverse`)
/// is always the next step due.
#[derive(Clone, Copy)]
struct HeapEntry {
    next_fire: SimNanos,
    id: u64,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.next_fire == other.next_fire && self.id == other.id
    }
}
impl Eq for HeapEntry {}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.next_fire, self.id).cmp(&(other.next_fire, other.id))
    }
}

struct ChronoState {
    steps: Vec<Step>,
    heap: BinaryHeap<Reverse<HeapEntry>>,
}

impl ChronoState {
    fn new() -> Self {
        Self {
            steps: Vec::new(),
            heap: BinaryHeap::new(),
        }
    }

    fn push(&mut self, id: u64, next_fire: SimNanos, body: StepBody) {
        self.heap.push(Reverse(HeapEntry { next_fire, id }));
        self.steps.push(Step {
            id,
            next_fire,
            body,
        });
    }

    fn find_periodic(&self, key: PeriodicKey) -> Option<u64> {
        self.steps.iter().find_map(|step| match &step.body {
            StepBody::Periodic { key: k, .. } if *k == key => Some(step.id),
            _ => None,
        })
    }
}

/// Maintains the step list and runs the dedicated chrono thread.
pub struct ChronoService {
    clock: Arc<SimulatedClock>,
    state: Arc<Mutex<ChronoState>>,
    wake: Arc<Condvar>,
    shutting_down: Arc<AtomicBool>,
    next_id: AtomicU64,
    thread: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl ChronoService {
    pub fn new(clock: Arc<SimulatedClock>) -> Self {
        Self {
            clock,
            state: Arc::new(Mutex::new(ChronoState::new())),
            wake: Arc::new(Condvar::new()),
            shutting_down: Arc::new(AtomicBool::new(false)),
            next_id: AtomicU64::new(0),
            thread: Mutex::new(None),
        }
    }

    pub fn clock(&self) -> &SimulatedClock {
        &self.clock
    }

    /// Start the dedicated chrono thread. Idempotent: a second call while
    /// already running is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut thread_slot = self.thread.lock();
        if thread_slot.is_some() {
            return;
        }
        let service = self.clone();
        *thread_slot = Some(std::thread::spawn(move || service.run_loop()));
    }

    /// Register a periodic step firing every `period`, keyed by
    /// `(period, message_type)` so repeated registration for the same pair
    /// shares one wheel. `callback` is invoked on the chrono thread each
    /// time the step fires; at most once per wake even if multiple periods
    /// elapsed (missed fires are coalesced, see `fire_and_reschedule`).
    pub fn register_every(
        &self,
        period: Duration,
        message_type: std::any::TypeId,
        callback: PeriodicCallback,
    ) {
        let key = PeriodicKey {
            period_nanos: period.as_nanos() as u64,
            message_type,
        };
        let mut state = self.state.lock();
        if state.find_periodic(key).is_some() {
            return;
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let next_fire = self.clock.now() + period.as_nanos() as i64;
        state.push(
            id,
            next_fire,
            StepBody::Periodic {
                key,
                period,
                callback,
            },
        );
        drop(state);
        self.wake.notify_all();
    }

    /// Schedule a one-shot callback at simulated time `at`, used by
    /// `emit::<DELAY>`/`emit::<AT>`.
    pub fn schedule_once(&self, at: SimNanos, callback: OneShotCallback) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.lock();
        state.push(
            id,
            at,
            StepBody::OneShot {
                callback: Mutex::new(Some(callback)),
            },
        );
        drop(state);
        self.wake.notify_all();
    }

    fn run_loop(self: Arc<Self>) {
        loop {
            if self.shutting_down.load(Ordering::Acquire) {
                return;
            }

            let mut due_ids = Vec::new();
            let sleep_target;
            {
                let mut state = self.state.lock();
                let now = self.clock.now();

                while let Some(Reverse(top)) = state.heap.peek().copied() {
                    if top.next_fire > now {
                        break;
                    }
                    state.heap.pop();
                    due_ids.push(top.id);
                }

                sleep_target = state
                    .heap
                    .peek()
                    .map(|Reverse(entry)| entry.next_fire);
            }

            for id in &due_ids {
                self.fire_and_reschedule(*id);
            }

            if !due_ids.is_empty() {
                continue;
            }

            let mut state = self.state.lock();
            if self.shutting_down.load(Ordering::Acquire) {
                return;
            }
            match sleep_target {
                None => {
                    self.wake.wait(&mut state);
                }
                Some(target) => {
                    let now = self.clock.now();
                    let sim_remaining = (target - now).max(0);
                    let real_remaining = self
                        .clock
                        .sim_to_real(Duration::from_nanos(sim_remaining as u64))
                        .unwrap_or(Duration::from_millis(50))
                        .min(Duration::from_millis(50));
                    self.wake.wait_for(&mut state, real_remaining);
                }
            }
        }
    }

    fn fire_and_reschedule(&self, id: u64) {
        let mut state = self.state.lock();
        let Some(index) = state.steps.iter().position(|s| s.id == id) else {
            return;
        };

        match &state.steps[index].body {
            StepBody::OneShot { callback } => {
                let callback = callback.lock().take();
                state.steps.remove(index);
                drop(state);
                if let Some(callback) = callback {
                    callback();
                }
            }
            StepBody::Periodic { period, callback, .. } => {
                let period = *period;
                let callback = callback.clone();
                // Coalesced catch-up: advance past `now` to the first
                // future instant rather than firing once per missed period.
                let now = self.clock.now();
                let mut next_fire = state.steps[index].next_fire;
                while next_fire <= now {
                    next_fire += period.as_nanos() as i64;
                }
                state.steps[index].next_fire = next_fire;
                state.heap.push(Reverse(HeapEntry { next_fire, id }));
                drop(state);
                callback();
            }
        }
    }

    /// Stop the chrono thread and join it. Idempotent.
    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);
        self.wake.notify_all();
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn every_registration_is_idempotent_per_key() {
        let clock = Arc::new(SimulatedClock::new());
        let chrono = ChronoService::new(clock);
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = fired.clone();
        chrono.register_every(
            Duration::from_millis(10),
            std::any::TypeId::of::<u32>(),
            Arc::new(move || {
                fired_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );
        chrono.register_every(
            Duration::from_millis(10),
            std::any::TypeId::of::<u32>(),
            Arc::new(|| panic!("second registration should be a no-op")),
        );
        let state = chrono.state.lock();
        assert_eq!(state.steps.len(), 1);
    }

    #[test]
    fn schedule_once_fires_after_clock_advance() {
        let clock = Arc::new(SimulatedClock::new());
        let chrono = Arc::new(ChronoService::new(clock.clone()));
        chrono.start();

        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = fired.clone();
        let at = clock.now() + Duration::from_millis(5).as_nanos() as i64;
        chrono.schedule_once(
            at,
            Box::new(move || {
                fired_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );

        clock.adjust_clock(Duration::from_millis(10), 1.0);
        std::thread::sleep(Duration::from_millis(100));
        chrono.shutdown();

        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
