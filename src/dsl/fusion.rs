//! Runtime fusion of a word list into a single [`FusedReaction`]. A
//! reaction's word list is folded once, at [`FusedReaction::new`] (itself
//! called once per reaction, at install time), producing a struct of plain
//! data plus one `Vec<Arc<dyn DslWord>>` that `get`/`precondition`/`pre_run`/
//! etc. iterate — no per-task branching on word *type*, only a loop over
//! already-selected words.

use std::sync::Arc;

use super::word::{BindContext, DslWord, GetContext, GetValue, GroupDescriptor};
use crate::error::MultiplePoolSnafu;
use crate::ids::PoolId;
use crate::reaction::ReactionTask;

/// The fused hook set for one reaction, built once from its declared word
/// list.
pub struct FusedReaction {
    words: Vec<Arc<dyn DslWord>>,
    pool: Option<PoolId>,
    is_single: bool,
}

impl FusedReaction {
    /// Fuse `words` in declaration order. Fails if more than one word
    /// provides a pool; that's a configuration error reported at bind time.
    pub fn new(words: Vec<Arc<dyn DslWord>>) -> Result<Self, crate::error::BindError> {
        let mut pool = None;
        for word in &words {
            if let Some(candidate) = word.pool() {
                if pool.replace(candidate).is_some() {
                    return MultiplePoolSnafu.fail();
                }
            }
        }
        let is_single = words
            .iter()
            .any(|w| w.as_any().is::<super::words::Single>());
        Ok(Self {
            words,
            pool,
            is_single,
        })
    }

    /// Run every word's `bind` hook, in declaration order.
    pub fn bind(&self, ctx: &BindContext<'_>) {
        for word in &self.words {
            word.bind(ctx);
        }
    }

    /// Tuple-concatenate every word's `get` output, in declaration order.
    pub fn get(&self, ctx: &GetContext<'_>) -> Vec<GetValue> {
        let mut values = Vec::new();
        for word in &self.words {
            values.extend(word.get(ctx));
        }
        values
    }

    /// Logical AND of every word's `precondition`, short-circuiting in
    /// declaration order.
    pub fn precondition(&self, ctx: &GetContext<'_>) -> bool {
        self.words.iter().all(|w| w.precondition(ctx))
    }

    /// Maximum priority across words that provide one, else `NORMAL`.
    pub fn priority(&self) -> i32 {
        self.words
            .iter()
            .filter_map(|w| w.priority())
            .max()
            .unwrap_or(super::word::priority::NORMAL)
    }

    /// The single pool this reaction is pinned to, if any word declared one.
    pub fn pool(&self) -> Option<PoolId> {
        self.pool
    }

    /// Union of group descriptors across all words.
    pub fn groups(&self) -> Vec<GroupDescriptor> {
        let mut groups = Vec::new();
        for word in &self.words {
            groups.extend(word.groups());
        }
        groups
    }

    /// Whether this reaction declared `Single` (at most one in-flight or
    /// queued task at a time).
    pub fn is_single(&self) -> bool {
        self.is_single
    }

    /// Run every word's `pre_run`, in declaration order.
    pub fn pre_run(&self) {
        for word in &self.words {
            word.pre_run();
        }
    }

    /// Run every word's `post_run`, in declaration order.
    pub fn post_run(&self) {
        for word in &self.words {
            word.post_run();
        }
    }

    /// Run every word's `postcondition`, in declaration order.
    pub fn postcondition(&self) {
        for word in &self.words {
            word.postcondition();
        }
    }

    /// Offer `task` to each word's `reschedule` hook in turn, stopping as
    /// soon as one word takes ownership (returns `None`). A reaction with
    /// no rescheduling word (the common case) passes the task through
    /// every hook unchanged.
    pub fn reschedule(&self, task: ReactionTask) -> Option<ReactionTask> {
        let mut task = task;
        for word in &self.words {
            match word.reschedule(task) {
                Some(next) => task = next,
                None => return None,
            }
        }
        Some(task)
    }
}
