//! Top-level scheduler: pool registry, group admission, idle tracking, and
//! the drain/terminate half of the PowerPlant lifecycle. A name-keyed
//! lookup over a set of long-lived worker pools, declared dynamically by
//! name rather than fixed at startup.

pub mod group;
pub mod pool;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::ids::PoolId;
use crate::reaction::ReactionTask;
use crate::stats::StatsPublisher;

pub use group::{Group, GroupRegistry};
pub use pool::{Pool, PoolDescriptor};

pub const MAIN_POOL_NAME: &str = "main";
pub const DEFAULT_POOL_NAME: &str = "default";

pub struct Scheduler {
    pools: RwLock<HashMap<PoolId, Arc<Pool>>>,
    names: RwLock<HashMap<String, PoolId>>,
    groups: Arc<GroupRegistry>,
    stats: Arc<StatsPublisher>,
    pub main_pool: PoolId,
    pub default_pool: PoolId,
}

impl Scheduler {
    pub fn new(default_pool_concurrency: usize, stats: Arc<StatsPublisher>) -> Arc<Self> {
        let scheduler = Arc::new(Self {
            pools: RwLock::new(HashMap::new()),
            names: RwLock::new(HashMap::new()),
            groups: Arc::new(GroupRegistry::new()),
            stats,
            main_pool: PoolId::next(),
            default_pool: PoolId::next(),
        });

        scheduler.register_pool(PoolDescriptor {
            id: scheduler.main_pool,
            name: Arc::from(MAIN_POOL_NAME),
            concurrency: 0,
            counts_for_idle: true,
            persistent: false,
        });
        scheduler.register_pool(PoolDescriptor {
            id: scheduler.default_pool,
            name: Arc::from(DEFAULT_POOL_NAME),
            concurrency: default_pool_concurrency.max(1),
            counts_for_idle: true,
            persistent: false,
        });
        scheduler
    }

    fn register_pool(&self, descriptor: PoolDescriptor) {
        let id = descriptor.id;
        let name = descriptor.name.to_string();
        self.pools.write().insert(id, Pool::new(descriptor));
        self.names.write().insert(name, id);
    }

    /// Look up (or create) a named pool, returning its id for use with
    /// `Pool<P>`. Declaring the same name twice returns the same id; the
    /// first declaration's concurrency/flags win.
    pub fn declare_pool(
        &self,
        name: &str,
        concurrency: usize,
        counts_for_idle: bool,
        persistent: bool,
    ) -> PoolId {
        if let Some(&id) = self.names.read().get(name) {
            return id;
        }
        let id = PoolId::next();
        self.register_pool(PoolDescriptor {
            id,
            name: Arc::from(name),
            concurrency,
            counts_for_idle,
            persistent,
        });
        id
    }

    fn pool(&self, id: PoolId) -> Arc<Pool> {
        self.pools
            .read()
            .get(&id)
            .cloned()
            .expect("pool id not registered with this scheduler")
    }

    /// Start worker threads for every pool except `main` (driven instead
    /// by [`Self::run_main`] on the `start()`-calling thread).
    pub fn start_workers(&self) {
        for pool in self.pools.read().values() {
            if pool.descriptor.id != self.main_pool {
                pool.start_workers(self.groups.clone(), self.stats.clone());
            }
        }
    }

    /// A closure suitable as a [`crate::reaction::Reaction`]'s `submit`
    /// sink: routes a task to its declared pool, defaulting to the shared
    /// default pool when none was declared.
    pub fn submit_fn(self: &Arc<Self>) -> Arc<dyn Fn(ReactionTask) + Send + Sync> {
        let scheduler = self.clone();
        Arc::new(move |task: ReactionTask| {
            let pool_id = task.pool().unwrap_or(scheduler.default_pool);
            scheduler.pool(pool_id).submit(task);
        })
    }

    /// Run the main pool's queue on the calling thread. Blocks until the
    /// powerplant drains; the thread that calls `start()` is the main-pool
    /// worker.
    pub fn run_main(&self) {
        self.pool(self.main_pool).run_main_loop(&self.groups, &self.stats);
    }

    /// Whether every `counts_for_idle` pool has no running tasks and an
    /// empty queue.
    pub fn is_idle(&self) -> bool {
        self.pools
            .read()
            .values()
            .filter(|pool| pool.descriptor.counts_for_idle)
            .all(|pool| pool.is_idle())
    }

    /// Enter `Draining`: stop non-persistent pools from accepting new
    /// tasks and wake their workers so they drain and exit.
    pub fn enter_draining(&self) {
        for pool in self.pools.read().values() {
            if !pool.descriptor.persistent {
                pool.drain();
            }
        }
    }

    /// Join every non-persistent pool's workers. Call after
    /// [`Self::enter_draining`] and after [`Self::run_main`] returns.
    pub fn join_non_persistent(&self) {
        for pool in self.pools.read().values() {
            if !pool.descriptor.persistent {
                pool.join();
            }
        }
    }

    /// `Terminated`: drain and join persistent pools last.
    pub fn terminate_persistent(&self) {
        for pool in self.pools.read().values() {
            if pool.descriptor.persistent {
                pool.drain();
                pool.join();
            }
        }
    }

    pub fn groups(&self) -> &Arc<GroupRegistry> {
        &self.groups
    }

    pub fn stats(&self) -> &Arc<StatsPublisher> {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_scheduler(default_pool_concurrency: usize) -> Arc<Scheduler> {
        Scheduler::new(default_pool_concurrency, Arc::new(StatsPublisher::new()))
    }

    #[test]
    fn declaring_the_same_pool_name_twice_returns_the_same_id() {
        let scheduler = test_scheduler(1);
        let a = scheduler.declare_pool("sensors", 2, true, false);
        let b = scheduler.declare_pool("sensors", 9, false, true);
        assert_eq!(a, b);
    }

    #[test]
    fn fresh_scheduler_is_idle() {
        let scheduler = test_scheduler(1);
        assert!(scheduler.is_idle());
    }
}
