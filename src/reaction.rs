//! Reactions and reaction tasks.
//!
//! A `Reaction` owns its fused hooks and a monotonic id source. `notify()`
//! allocates a task, captures cause from the thread-local "currently
//! running task", evaluates `get` immediately, and records the `created`
//! event before handing the task to a word's `reschedule` hook and then on
//! to the scheduler. `ReactionTask::run` is where a task actually executes.

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use crate::dsl::fusion::FusedReaction;
use crate::dsl::word::GetContext;
use crate::dsl::GetValue;
use crate::ids::{PoolId, ReactionId, TaskId};
use crate::stats::{StatisticsRecord, StatsPublisher, TaskOutcome};
use crate::stores::Stores;

/// The identity of whatever task caused a later one to be created: the
/// reaction that ran plus which task of that reaction it was.
pub type Cause = Option<(ReactionId, TaskId)>;

thread_local! {
    static CURRENT_TASK: Cell<Cause> = const { Cell::new(None) };
    static INLINE_EMIT: Cell<bool> = const { Cell::new(false) };
}

/// Whether the calling thread is currently inside an `Scope::Inline` emit
/// (see `emit.rs`). `Reaction::notify` consults this to decide whether to
/// hand its task to the scheduler or run it synchronously right here.
pub(crate) fn is_inline_emit() -> bool {
    INLINE_EMIT.with(|cell| cell.get())
}

/// Run `f` with the inline-emit thread-local set, so every notify closure
/// invoked by `f` runs its resulting task synchronously instead of
/// submitting to the scheduler.
pub(crate) fn with_inline_emit<R>(f: impl FnOnce() -> R) -> R {
    INLINE_EMIT.with(|cell| cell.set(true));
    let result = f();
    INLINE_EMIT.with(|cell| cell.set(false));
    result
}

/// The reaction and task id of whatever reaction task is running on the
/// calling thread, or `None` on a thread with no task in flight (e.g. the
/// thread that called `emit` directly from outside any reaction). The sole
/// source of cause-chain propagation.
pub fn current_cause() -> Cause {
    CURRENT_TASK.with(|cell| cell.get())
}

fn set_current_task(id: Cause) -> Cause {
    CURRENT_TASK.with(|cell| cell.replace(id))
}

/// A handle to a bound reaction returned from [`crate::reactor::ReactorContext::on`].
/// Distinct from the `Arc<Reaction>` the scheduler and DSL words hold
/// internally: this is the surface a reactor's own code uses to toggle a
/// reaction it already installed, without being able to reach into its
/// fused hooks or callback.
#[derive(Clone)]
pub struct ReactionHandle(pub(crate) Arc<Reaction>);

impl ReactionHandle {
    pub fn id(&self) -> ReactionId {
        self.0.id
    }

    /// Allow this reaction to produce tasks again after a prior `disable()`.
    pub fn enable(&self) {
        self.0.enabled.store(true, AtomicOrdering::Release);
    }

    /// Stop this reaction from producing new tasks. Has no effect on a task
    /// already running or queued; it only gates future notifications.
    pub fn disable(&self) {
        self.0.enabled.store(false, AtomicOrdering::Release);
    }

    /// Permanently stop this reaction from producing new tasks. Idempotent:
    /// calling it more than once, or after `disable`/`enable`, has the same
    /// effect as calling it once. Does not abort in-flight work.
    pub fn unbind(&self) {
        self.0.unbound.store(true, AtomicOrdering::Release);
    }
}

/// A bound reaction: its identity, its fused DSL hooks, its user callback,
/// and a sink the resulting tasks are submitted to. One `Reaction` is
/// created per `on<...>()` declaration in a reactor's constructor.
pub struct Reaction {
    pub id: ReactionId,
    pub reactor_name: Arc<str>,
    pub name: Arc<str>,
    fused: FusedReaction,
    callback: Arc<dyn Fn(Vec<GetValue>) + Send + Sync>,
    stores: Arc<Stores>,
    submit: Arc<dyn Fn(ReactionTask) + Send + Sync>,
    stats: Arc<StatsPublisher>,
    /// Set while a `Single` reaction has a task queued or running; cleared
    /// when that task finishes. Unused for reactions that don't declare
    /// `Single`.
    in_flight: AtomicBool,
    enabled: AtomicBool,
    unbound: AtomicBool,
}

impl Reaction {
    pub fn new(
        reactor_name: impl Into<Arc<str>>,
        name: impl Into<Arc<str>>,
        fused: FusedReaction,
        callback: Arc<dyn Fn(Vec<GetValue>) + Send + Sync>,
        stores: Arc<Stores>,
        submit: Arc<dyn Fn(ReactionTask) + Send + Sync>,
        stats: Arc<StatsPublisher>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: ReactionId::next(),
            reactor_name: reactor_name.into(),
            name: name.into(),
            fused,
            callback,
            stores,
            submit,
            stats,
            in_flight: AtomicBool::new(false),
            enabled: AtomicBool::new(true),
            unbound: AtomicBool::new(false),
        })
    }

    pub fn bind(self: &Arc<Self>) {
        let notify_target = self.clone();
        let resubmit_target = self.clone();
        let ctx = crate::dsl::word::BindContext {
            stores: &self.stores,
            reaction: self.id,
            notify: Arc::new(move |cause| notify_target.notify(cause)),
            resubmit: Arc::new(move |task| resubmit_target.submit_task(task)),
        };
        self.fused.bind(&ctx);
    }

    /// Whether this reaction declared `Single`.
    pub fn is_single(&self) -> bool {
        self.fused.is_single()
    }

    pub fn priority(&self) -> i32 {
        self.fused.priority()
    }

    pub fn pool(&self) -> Option<PoolId> {
        self.fused.pool()
    }

    /// Hand an already-constructed task straight to the scheduler, bypassing
    /// `get`/`precondition`/`reschedule`. Used by words (like `Sync`) that
    /// hold a task they previously received via `reschedule` and release it
    /// later from their own `postcondition`.
    pub(crate) fn submit_task(&self, task: ReactionTask) {
        (self.submit)(task);
    }

    fn publish_denied(&self, cause: Cause, outcome: TaskOutcome) {
        let mut stats = StatisticsRecord::created(
            TaskId::next(),
            self.id,
            self.reactor_name.clone(),
            self.name.clone(),
            cause,
        );
        match outcome {
            TaskOutcome::Blocked => stats.mark_blocked(),
            TaskOutcome::MissingData => stats.mark_missing_data(),
            _ => unreachable!("publish_denied is only used for Blocked/MissingData"),
        }
        self.stats.publish(&stats);
    }

    /// Called (from whatever thread emitted the triggering value) to ask
    /// this reaction for a new task: allocate an id, capture cause,
    /// evaluate `get` now, record `created`, offer the task to
    /// `reschedule`, then hand whatever comes back to `submit`.
    pub(crate) fn notify(self: &Arc<Self>, cause: Cause) {
        if self.unbound.load(AtomicOrdering::Acquire) || !self.enabled.load(AtomicOrdering::Acquire) {
            return;
        }

        let ctx = GetContext {
            stores: &self.stores,
        };

        if !self.fused.precondition(&ctx) {
            self.publish_denied(cause, TaskOutcome::MissingData);
            return;
        }

        if self.is_single() && self.in_flight.swap(true, AtomicOrdering::AcqRel) {
            // Already has a task queued or running; this notification is
            // dropped rather than queued behind it.
            self.publish_denied(cause, TaskOutcome::Blocked);
            return;
        }

        let args = self.fused.get(&ctx);
        let task_id = TaskId::next();
        let stats = StatisticsRecord::created(
            task_id,
            self.id,
            self.reactor_name.clone(),
            self.name.clone(),
            cause,
        );

        let task = ReactionTask {
            task_id,
            cause,
            reaction: self.clone(),
            args: Some(args),
            stats,
        };

        let task = match self.fused.reschedule(task) {
            Some(task) => task,
            None => return,
        };

        if is_inline_emit() {
            task.run();
        } else {
            (self.submit)(task);
        }
    }
}

/// One scheduled unit of work: a reaction plus its already-captured
/// arguments. Produced by [`Reaction::notify`], consumed by a scheduler
/// worker (or, for `INLINE` emits, run synchronously on the emitting
/// thread — see `emit.rs`).
pub struct ReactionTask {
    pub task_id: TaskId,
    pub cause: Cause,
    pub reaction: Arc<Reaction>,
    args: Option<Vec<GetValue>>,
    pub stats: StatisticsRecord,
}

impl ReactionTask {
    pub fn priority(&self) -> i32 {
        self.reaction.priority()
    }

    pub fn pool(&self) -> Option<PoolId> {
        self.reaction.pool()
    }

    pub fn groups(&self) -> Vec<crate::dsl::GroupDescriptor> {
        self.reaction.fused.groups()
    }

    /// Run this task to completion on the calling (worker, main, or
    /// inline-emitting) thread: record `started`; fused `pre_run`; user
    /// callback; fused `post_run`; record `finished`; fused
    /// `postcondition`. A callback panic is caught and recorded rather than
    /// propagated, so `post_run`/`postcondition` still run.
    pub fn run(mut self) -> StatisticsRecord {
        let previous = set_current_task(Some((self.reaction.id, self.task_id)));
        self.stats.mark_started();

        self.reaction.fused.pre_run();

        let args = self.args.take().unwrap_or_default();
        let callback = self.reaction.callback.clone();
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            callback(args);
        }));

        self.reaction.fused.post_run();
        self.stats.mark_finished(match outcome {
            Ok(()) => TaskOutcome::Success,
            Err(payload) => TaskOutcome::Panicked(panic_message(payload)),
        });
        self.reaction.fused.postcondition();
        if self.reaction.is_single() {
            self.reaction.in_flight.store(false, AtomicOrdering::Release);
        }

        set_current_task(previous);
        self.stats
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "reaction callback panicked with a non-string payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::fusion::FusedReaction;
    use crate::dsl::words::Trigger;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn make_reaction(
        stores: Arc<Stores>,
        submit: Arc<dyn Fn(ReactionTask) + Send + Sync>,
        callback: Arc<dyn Fn(Vec<GetValue>) + Send + Sync>,
    ) -> Arc<Reaction> {
        let fused = FusedReaction::new(vec![Trigger::<u32>::new()]).unwrap();
        Reaction::new(
            "TestReactor",
            "on_u32",
            fused,
            callback,
            stores,
            submit,
            Arc::new(StatsPublisher::new()),
        )
    }

    #[test]
    fn emit_creates_and_submits_a_task() {
        let stores = Arc::new(Stores::new());
        let submitted = Arc::new(AtomicUsize::new(0));
        let submitted_clone = submitted.clone();
        let submit: Arc<dyn Fn(ReactionTask) + Send + Sync> = Arc::new(move |task: ReactionTask| {
            submitted_clone.fetch_add(1, Ordering::SeqCst);
            task.run();
        });
        let ran = Arc::new(AtomicUsize::new(0));
        let ran_clone = ran.clone();
        let reaction = make_reaction(
            stores.clone(),
            submit,
            Arc::new(move |_args| {
                ran_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );
        reaction.bind();

        stores.emit_latest(Arc::new(5u32));
        for sub in stores.subscribers::<u32>() {
            sub(Arc::new(5u32));
        }

        assert_eq!(submitted.load(Ordering::SeqCst), 1);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_callback_is_caught_and_recorded() {
        let stores = Arc::new(Stores::new());
        let submit: Arc<dyn Fn(ReactionTask) + Send + Sync> = Arc::new(|task: ReactionTask| {
            let stats = task.run();
            assert!(matches!(stats.outcome(), Some(TaskOutcome::Panicked(_))));
        });
        let reaction = make_reaction(
            stores.clone(),
            submit,
            Arc::new(|_args| panic!("boom")),
        );
        reaction.bind();

        stores.emit_latest(Arc::new(1u32));
        for sub in stores.subscribers::<u32>() {
            sub(Arc::new(1u32));
        }
    }

    #[test]
    fn single_reaction_drops_notifications_while_a_task_is_in_flight() {
        use crate::dsl::words::Single;

        let stores = Arc::new(Stores::new());
        let submitted = Arc::new(AtomicUsize::new(0));
        let submitted_clone = submitted.clone();
        // Tasks are submitted but never run, so the first one stays
        // "in flight" for the rest of the test.
        let submit: Arc<dyn Fn(ReactionTask) + Send + Sync> =
            Arc::new(move |_task: ReactionTask| {
                submitted_clone.fetch_add(1, Ordering::SeqCst);
            });

        let fused = FusedReaction::new(vec![Trigger::<u32>::new(), Single::new()]).unwrap();
        let reaction = Reaction::new(
            "TestReactor",
            "on_u32_single",
            fused,
            Arc::new(|_args| {}),
            stores.clone(),
            submit,
            Arc::new(StatsPublisher::new()),
        );
        reaction.bind();

        stores.emit_latest(Arc::new(1u32));
        for sub in stores.subscribers::<u32>() {
            sub(Arc::new(1u32));
        }
        stores.emit_latest(Arc::new(2u32));
        for sub in stores.subscribers::<u32>() {
            sub(Arc::new(2u32));
        }

        assert_eq!(submitted.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unbind_stops_future_notifications() {
        let stores = Arc::new(Stores::new());
        let submitted = Arc::new(AtomicUsize::new(0));
        let submitted_clone = submitted.clone();
        let submit: Arc<dyn Fn(ReactionTask) + Send + Sync> = Arc::new(move |task: ReactionTask| {
            submitted_clone.fetch_add(1, Ordering::SeqCst);
            task.run();
        });
        let reaction = make_reaction(stores.clone(), submit, Arc::new(|_args| {}));
        reaction.bind();
        let handle = ReactionHandle(reaction.clone());

        stores.emit_latest(Arc::new(1u32));
        for sub in stores.subscribers::<u32>() {
            sub(Arc::new(1u32));
        }
        handle.unbind();
        stores.emit_latest(Arc::new(2u32));
        for sub in stores.subscribers::<u32>() {
            sub(Arc::new(2u32));
        }
        // A second unbind is a no-op, not an error.
        handle.unbind();

        assert_eq!(submitted.load(Ordering::SeqCst), 1);
    }
}
