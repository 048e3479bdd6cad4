//! The [`DslWord`] trait: one hook-set per DSL word.
//!
//! A reaction is declared as a list of words (`Trigger<T>`, `Priority`,
//! `Sync`, ...), each contributing whatever subset of this trait's hooks it
//! needs; the rest fall back to a neutral default. `dsl/fusion.rs` folds a
//! reaction's word list into one `FusedReaction` once, at bind time, so
//! nothing downstream has to branch on word *type* again — just iterate the
//! hooks that were actually selected.

use std::any::Any;
use std::sync::Arc;

use crate::ids::{GroupId, PoolId};
use crate::reaction::ReactionTask;
use crate::stores::Stores;

/// One value produced by a word's `get` hook, type-erased so words with
/// different output types can be tuple-concatenated into a single argument
/// list. The user callback downcasts each entry back to its concrete type;
/// see `dsl/words.rs` for the concrete words' get implementations and
/// `reaction.rs` for how a callback consumes them.
pub type GetValue = Box<dyn Any + Send>;

/// A group token requirement produced by a word's `group` hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupDescriptor {
    pub group: GroupId,
}

/// Context available to `bind`: the stores to subscribe against, the
/// reaction id being bound, a `notify` callback a word calls (from whatever
/// thread an emit happens on) to ask the owning [`crate::reaction::Reaction`]
/// to create and submit a new task, and a `resubmit` callback that hands an
/// already-created task straight back to the scheduler without re-running
/// `get`/`precondition` — used by words that hold tasks back and release
/// them later (see `Sync` in `dsl/words.rs`).
pub struct BindContext<'a> {
    pub stores: &'a Stores,
    pub reaction: crate::ids::ReactionId,
    pub notify: Arc<dyn Fn(Option<(crate::ids::ReactionId, crate::ids::TaskId)>) + Send + Sync>,
    pub resubmit: Arc<dyn Fn(ReactionTask) + Send + Sync>,
}

/// Context available to `get`/`precondition`: read-only access to the
/// stores, evaluated once per emitted event at task-creation time so the
/// task captures a stable snapshot.
pub struct GetContext<'a> {
    pub stores: &'a Stores,
}

/// One DSL word. Every hook defaults to a no-op / neutral value so a word
/// can opt into only the hooks it needs — `Trigger<T>` implements `bind`
/// and `get`; `Priority` implements only `priority`; `Sync` implements
/// `pre_run`... no, `Sync` implements `bind`/`reschedule`/`postcondition`.
pub trait DslWord: Send + Sync {
    /// Subscribe the reaction to whatever this word reacts to. Called once
    /// per word at bind time, in declaration order. May register a closure
    /// with a [`Stores`] `TypeList` that the emit pipeline invokes later.
    fn bind(&self, _ctx: &BindContext<'_>) {}

    /// Produce zero or more values to append to the callback's argument
    /// tuple. Called once per task, at task-creation time.
    fn get(&self, _ctx: &GetContext<'_>) -> Vec<GetValue> {
        Vec::new()
    }

    /// Veto task execution. `true` (the default) never vetoes; fusion ANDs
    /// every word's answer, short-circuiting in declaration order.
    fn precondition(&self, _ctx: &GetContext<'_>) -> bool {
        true
    }

    /// This word's contribution to the task's priority, if any. Fusion
    /// takes the maximum across words that provide one, defaulting to
    /// `NORMAL` (0) if none do.
    fn priority(&self) -> Option<i32> {
        None
    }

    /// The pool this word pins the reaction to, if any. Fusion requires at
    /// most one word across the whole reaction to answer `Some`.
    fn pool(&self) -> Option<PoolId> {
        None
    }

    /// Group tokens this word's task must hold before running.
    fn groups(&self) -> Vec<GroupDescriptor> {
        Vec::new()
    }

    /// Offer to take ownership of a freshly-created `task` instead of
    /// letting it run now. Called once per task, right after it is built
    /// and before it is handed to the scheduler (or run inline). The
    /// default passes the task straight through unchanged. `Sync` is the
    /// only word here that takes ownership: it holds the task on a private
    /// FIFO when another task under the same word instance is already
    /// running, and resubmits it from `postcondition` once that slot frees
    /// up, so the thread that would otherwise have run it is freed
    /// immediately instead of blocking.
    fn reschedule(&self, task: ReactionTask) -> Option<ReactionTask> {
        Some(task)
    }

    /// Run on the worker thread immediately before the user callback.
    fn pre_run(&self) {}

    /// Run on the worker thread immediately after the user callback.
    fn post_run(&self) {}

    /// Observe task completion, after `post_run`. Used by `Sync` to release
    /// the next queued task on its private FIFO.
    fn postcondition(&self) {}

    /// Type-erased self, so fusion can detect marker words like `Single`
    /// without every hook needing a dedicated flag.
    fn as_any(&self) -> &dyn Any
    where
        Self: 'static,
    {
        self
    }
}

/// Priority band constants for the `Priority` word.
pub mod priority {
    pub const LOW: i32 = -100;
    pub const NORMAL: i32 = 0;
    pub const HIGH: i32 = 100;
    /// The maximum ordering priority. Tasks at this band always run before
    /// any other band, but otherwise share the same worker pool as
    /// everything else — there is no dedicated spawn-on-demand thread for
    /// it.
    pub const REALTIME: i32 = i32::MAX;
}

/// Marker trait for types usable as the argument to `With<T>`/`Trigger<T>`.
pub trait Datum: Any + Send + Sync {}
impl<T: Any + Send + Sync> Datum for T {}

pub(crate) fn downcast<T: Any>(value: GetValue) -> T {
    *value
        .downcast::<T>()
        .unwrap_or_else(|_| panic!("DSL get() produced the wrong type for this callback slot"))
}

pub(crate) fn boxed<T: Any + Send>(value: T) -> GetValue {
    Box::new(value)
}

use std::marker::PhantomData;

/// Convenience: a [`DslWord`] that does nothing but exists so user code can
/// be written against a uniform `Arc<dyn DslWord>` list even for words that
/// contribute no hooks (e.g. a purely-documentary marker word).
pub struct NoOpWord<T>(PhantomData<T>);

impl<T> NoOpWord<T> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self(PhantomData))
    }
}

impl<T: Send + Sync> DslWord for NoOpWord<T> {}
