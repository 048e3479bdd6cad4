//! Per-pool task queue and worker threads.
//!
//! Submit/pop/shutdown semantics realized with a `BinaryHeap` ordered by
//! `(priority desc, task_id asc)` under a `parking_lot::Mutex` + `Condvar`,
//! rather than a channel, since the scheduler needs priority reordering a
//! channel can't give it for free.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::ids::PoolId;
use crate::reaction::ReactionTask;
use crate::scheduler::group::GroupRegistry;
use crate::stats::StatsPublisher;

/// Stable description of a pool: id, display name, worker count (`0`
/// meaning "main thread only"), whether it counts toward the
/// scheduler's idle signal, and whether it survives `shutdown()` to serve
/// late tasks such as trace close-out.
#[derive(Debug, Clone)]
pub struct PoolDescriptor {
    pub id: PoolId,
    pub name: Arc<str>,
    pub concurrency: usize,
    pub counts_for_idle: bool,
    pub persistent: bool,
}

struct QueuedTask(ReactionTask);

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}
impl Eq for QueuedTask {}
impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}
impl Ord for QueuedTask {
    /// `(priority desc, task_id asc)`: a max-heap on priority, FIFO within
    /// a priority band by strictly monotonic task id.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.0
            .priority()
            .cmp(&other.0.priority())
            .then_with(|| other.0.task_id.cmp(&self.0.task_id))
    }
}

struct PoolState {
    queue: BinaryHeap<QueuedTask>,
    running: usize,
}

/// One named pool: a priority queue plus (for non-main pools) a fixed set
/// of worker threads.
pub struct Pool {
    pub descriptor: PoolDescriptor,
    state: Mutex<PoolState>,
    condvar: Condvar,
    draining: AtomicBool,
    workers: Mutex<Vec<std::thread::JoinHandle<()>>>,
}

impl Pool {
    pub fn new(descriptor: PoolDescriptor) -> Arc<Self> {
        Arc::new(Self {
            descriptor,
            state: Mutex::new(PoolState {
                queue: BinaryHeap::new(),
                running: 0,
            }),
            condvar: Condvar::new(),
            draining: AtomicBool::new(false),
            workers: Mutex::new(Vec::new()),
        })
    }

    /// Enqueue `task`. Rejected (dropped) once the pool is draining, unless
    /// it is `persistent`: no new non-persistent pool tasks are accepted
    /// during `Draining`.
    pub fn submit(&self, task: ReactionTask) {
        if self.draining.load(Ordering::Acquire) && !self.descriptor.persistent {
            return;
        }
        self.state.lock().queue.push(QueuedTask(task));
        self.condvar.notify_one();
    }

    /// Pop the highest-priority task and acquire its group tokens (this
    /// call blocks here until every required token is granted), blocking
    /// first while the queue is empty and the pool is still live. Returns
    /// `None` once draining with an empty queue (the worker's exit signal).
    fn pop(&self, groups: &GroupRegistry) -> Option<(ReactionTask, Vec<Arc<super::group::Group>>)> {
        let mut state = self.state.lock();
        loop {
            if let Some(QueuedTask(task)) = state.queue.pop() {
                state.running += 1;
                drop(state);
                let held = groups.acquire_all(&task.groups(), task.task_id, task.priority());
                return Some((task, held));
            }
            if self.draining.load(Ordering::Acquire) {
                return None;
            }
            self.condvar.wait(&mut state);
        }
    }

    fn mark_idle(&self) {
        let mut state = self.state.lock();
        state.running = state.running.saturating_sub(1);
    }

    pub fn is_idle(&self) -> bool {
        let state = self.state.lock();
        state.running == 0 && state.queue.is_empty()
    }

    /// Spawn `concurrency` worker threads. `concurrency == 0` ("main
    /// thread only") spawns none; the application thread drives
    /// [`Self::run_main_loop`] instead.
    pub fn start_workers(self: &Arc<Self>, groups: Arc<GroupRegistry>, stats: Arc<StatsPublisher>) {
        let mut workers = self.workers.lock();
        for index in 0..self.descriptor.concurrency {
            let pool = self.clone();
            let groups = groups.clone();
            let stats = stats.clone();
            let name = format!("{}-{}", pool.descriptor.name, index);
            workers.push(
                std::thread::Builder::new()
                    .name(name)
                    .spawn(move || pool.worker_loop(&groups, &stats))
                    .expect("failed to spawn pool worker thread"),
            );
        }
    }

    fn worker_loop(&self, groups: &GroupRegistry, stats: &StatsPublisher) {
        while let Some((task, held)) = self.pop(groups) {
            let task_id = task.task_id;
            let record = task.run();
            stats.publish(&record);
            GroupRegistry::release_all(&held, task_id);
            self.mark_idle();
        }
    }

    /// Drive the main pool's queue on the calling thread until shutdown:
    /// the application thread that called `start()` is the "main" pool
    /// worker.
    pub fn run_main_loop(&self, groups: &GroupRegistry, stats: &StatsPublisher) {
        while let Some((task, held)) = self.pop(groups) {
            let task_id = task.task_id;
            let record = task.run();
            stats.publish(&record);
            GroupRegistry::release_all(&held, task_id);
            self.mark_idle();
        }
    }

    /// Flip to draining: stop accepting non-persistent submissions and
    /// wake every waiting worker so they observe the drained queue and
    /// exit.
    pub fn drain(&self) {
        self.draining.store(true, Ordering::Release);
        self.condvar.notify_all();
    }

    /// Join all worker threads. Call after [`Self::drain`].
    pub fn join(&self) {
        let handles = std::mem::take(&mut *self.workers.lock());
        for handle in handles {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::fusion::FusedReaction;
    use crate::dsl::words::{PriorityWord, Trigger};
    use crate::reaction::Reaction;
    use crate::stores::Stores;

    fn make_pool(concurrency: usize) -> Arc<Pool> {
        Pool::new(PoolDescriptor {
            id: PoolId::next(),
            name: Arc::from("test"),
            concurrency,
            counts_for_idle: true,
            persistent: false,
        })
    }

    #[test]
    fn pool_reports_idle_when_empty_and_no_running_tasks() {
        let pool = make_pool(0);
        assert!(pool.is_idle());
    }

    #[test]
    fn draining_pool_rejects_new_submissions() {
        let pool = make_pool(0);
        pool.drain();
        assert_eq!(pool.state.lock().queue.len(), 0);
    }

    #[test]
    fn higher_priority_task_runs_before_lower_priority() {
        let stores = Arc::new(Stores::new());
        let pool = make_pool(0);
        let groups = GroupRegistry::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let submit: Arc<dyn Fn(ReactionTask) + Send + Sync> = {
            let pool = pool.clone();
            Arc::new(move |task: ReactionTask| pool.submit(task))
        };

        let stats = Arc::new(crate::stats::StatsPublisher::new());
        let make_reaction = |priority: i32, label: u32| {
            let order = order.clone();
            let fused =
                FusedReaction::new(vec![Trigger::<u32>::new(), PriorityWord::new(priority)])
                    .unwrap();
            Reaction::new(
                "Test",
                "r",
                fused,
                Arc::new(move |_args| order.lock().push(label)),
                stores.clone(),
                submit.clone(),
                stats.clone(),
            )
        };

        let low = make_reaction(-1, 1);
        let high = make_reaction(1, 2);
        low.bind();
        high.bind();

        stores.emit_latest(Arc::new(5u32));
        for subscriber in stores.subscribers::<u32>() {
            subscriber(Arc::new(5u32));
        }

        pool.drain();
        pool.run_main_loop(&groups, &stats);

        assert_eq!(*order.lock(), vec![2, 1]);
    }

    #[test]
    fn same_priority_tasks_run_in_submission_order() {
        let stores = Arc::new(Stores::new());
        let pool = make_pool(0);
        let groups = GroupRegistry::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let submit: Arc<dyn Fn(ReactionTask) + Send + Sync> = {
            let pool = pool.clone();
            Arc::new(move |task: ReactionTask| pool.submit(task))
        };

        let stats = Arc::new(crate::stats::StatsPublisher::new());
        let make_reaction = |label: u32| {
            let order = order.clone();
            let fused =
                FusedReaction::new(vec![Trigger::<u32>::new(), PriorityWord::normal()]).unwrap();
            Reaction::new(
                "Test",
                "r",
                fused,
                Arc::new(move |_args| order.lock().push(label)),
                stores.clone(),
                submit.clone(),
                stats.clone(),
            )
        };

        // Three reactions at the same priority band, bound in order so
        // their task ids land in ascending order once all three fire from
        // a single emit.
        let first = make_reaction(1);
        let second = make_reaction(2);
        let third = make_reaction(3);
        first.bind();
        second.bind();
        third.bind();

        stores.emit_latest(Arc::new(5u32));
        for subscriber in stores.subscribers::<u32>() {
            subscriber(Arc::new(5u32));
        }

        pool.drain();
        pool.run_main_loop(&groups, &stats);

        assert_eq!(*order.lock(), vec![1, 2, 3]);
    }
}
