//! Group admission control.
//!
//! An id-keyed registry of token-bounded resources, looked up once and
//! reused. Each [`Group`] holds `C` tokens and ranks waiters by
//! `(priority desc, task_id asc)`.
//!
//! Admission could be modeled as a callback invoked when a waiting slot
//! transitions to grantable. This implementation uses a
//! `parking_lot::Condvar` broadcast instead: every waiter blocks on the
//! group's condvar and re-checks its own `held` flag on wake. This is
//! coarser than calling exactly the newly-grantable waiters' callbacks, but
//! observably equivalent (every transition still results in the correct
//! waiter proceeding) and considerably simpler than threading closures
//! through a registry.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::dsl::GroupDescriptor;
use crate::ids::{GroupId, TaskId};

struct Waiter {
    task_id: TaskId,
    priority: i32,
    held: bool,
}

struct GroupState {
    waiters: Vec<Waiter>,
}

/// `C` tokens shared by every task that declares this group.
pub struct Group {
    pub id: GroupId,
    capacity: usize,
    state: Mutex<GroupState>,
    condvar: Condvar,
}

impl Group {
    fn new(id: GroupId, capacity: usize) -> Self {
        Self {
            id,
            capacity: capacity.max(1),
            state: Mutex::new(GroupState { waiters: Vec::new() }),
            condvar: Condvar::new(),
        }
    }

    /// Recompute which waiters hold a token: walk waiters in
    /// `(priority desc, task_id asc)` order, counting already-held waiters
    /// ahead; a not-yet-held waiter with fewer than `capacity` held ahead
    /// of it is granted. Already-held waiters are never revoked — a higher
    /// priority waiter never displaces an existing holder.
    fn recompute(&self, state: &mut GroupState) {
        let mut order: Vec<usize> = (0..state.waiters.len()).collect();
        order.sort_by(|&a, &b| {
            let wa = &state.waiters[a];
            let wb = &state.waiters[b];
            wb.priority.cmp(&wa.priority).then(wa.task_id.cmp(&wb.task_id))
        });

        let mut held_ahead = 0usize;
        for idx in order {
            if state.waiters[idx].held {
                held_ahead += 1;
                continue;
            }
            if held_ahead < self.capacity {
                state.waiters[idx].held = true;
                held_ahead += 1;
            }
        }
    }

    /// Block the calling thread until a token for `task_id` is granted.
    /// This is one of the runtime's worker suspension points: the pool
    /// worker thread parks here, not on the pool queue.
    pub fn acquire(&self, task_id: TaskId, priority: i32) {
        let mut state = self.state.lock();
        state.waiters.push(Waiter {
            task_id,
            priority,
            held: false,
        });
        self.recompute(&mut state);

        loop {
            let granted = state
                .waiters
                .iter()
                .find(|w| w.task_id == task_id)
                .map(|w| w.held)
                .unwrap_or(false);
            if granted {
                return;
            }
            self.condvar.wait(&mut state);
        }
    }

    /// Release `task_id`'s token and wake every waiter so the ones that
    /// just became grantable can proceed.
    pub fn release(&self, task_id: TaskId) {
        let mut state = self.state.lock();
        state.waiters.retain(|w| w.task_id != task_id);
        self.recompute(&mut state);
        self.condvar.notify_all();
    }
}

/// Registry of groups by id, created lazily on first reference with a
/// default capacity of 1 (mutual exclusion) unless declared otherwise via
/// [`GroupRegistry::declare`].
#[derive(Default)]
pub struct GroupRegistry {
    groups: Mutex<HashMap<GroupId, Arc<Group>>>,
}

impl GroupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the token capacity for `id` before it is first referenced.
    /// A no-op if `id` already has a group (first reference wins).
    pub fn declare(&self, id: GroupId, capacity: usize) {
        self.groups
            .lock()
            .entry(id)
            .or_insert_with(|| Arc::new(Group::new(id, capacity)));
    }

    fn get_or_create(&self, id: GroupId) -> Arc<Group> {
        self.groups
            .lock()
            .entry(id)
            .or_insert_with(|| Arc::new(Group::new(id, 1)))
            .clone()
    }

    /// Acquire a token from every group in `descriptors`, in ascending
    /// group-id order — a total order across multi-group tasks avoids
    /// deadlock. Blocks until all are held. Returns the groups held, so the
    /// caller can release them after running the task.
    pub fn acquire_all(
        &self,
        descriptors: &[GroupDescriptor],
        task_id: TaskId,
        priority: i32,
    ) -> Vec<Arc<Group>> {
        let mut groups: Vec<Arc<Group>> =
            descriptors.iter().map(|d| self.get_or_create(d.group)).collect();
        groups.sort_by_key(|g| g.id);
        groups.dedup_by_key(|g| g.id);
        for group in &groups {
            group.acquire(task_id, priority);
        }
        groups
    }

    /// Release tokens acquired by [`Self::acquire_all`], in reverse order.
    pub fn release_all(held: &[Arc<Group>], task_id: TaskId) {
        for group in held.iter().rev() {
            group.release(task_id);
        }
    }
}
