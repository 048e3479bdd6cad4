//! Four reactions at different priorities, all sharing one pool, queued
//! before the pool's worker exists and drained once it starts — verifies
//! the scheduler's `(priority desc, task id asc)` ordering end to end.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use nuclear::dsl::words::{PriorityWord, Trigger};
use nuclear::emit::Scope;
use nuclear::error::BindError;
use nuclear::reactor::ReactorContext;
use nuclear::{PowerPlant, PowerPlantConfig, Reactor};

struct Ping;

struct PriorityFan {
    pub order: Arc<Mutex<Vec<&'static str>>>,
}

impl Reactor for PriorityFan {
    fn install(ctx: &ReactorContext) -> Result<Self, BindError> {
        let order = Arc::new(Mutex::new(Vec::new()));
        let bind_one = |label: &'static str, priority: Arc<PriorityWord>, order: Arc<Mutex<Vec<&'static str>>>| {
            ctx.on(vec![Trigger::<Ping>::new(), priority], label, move |_args| {
                order.lock().push(label);
            })
        };

        bind_one("low", PriorityWord::low(), order.clone())?;
        bind_one("realtime", PriorityWord::realtime(), order.clone())?;
        bind_one("normal", PriorityWord::normal(), order.clone())?;
        bind_one("high", PriorityWord::high(), order.clone())?;

        Ok(Self { order })
    }
}

#[test]
fn higher_priority_reactions_run_before_lower_priority_ones() {
    let mut config = PowerPlantConfig::default();
    config.default_pool_concurrency = 1;
    let powerplant = PowerPlant::new(config).unwrap();
    let reactor = powerplant.install::<PriorityFan>().unwrap();

    // Queue all four tasks before the default pool's single worker thread
    // is spawned (that only happens inside `start()`), so the worker drains
    // a queue that is already fully populated and ordering is deterministic.
    powerplant.emit(Ping, Scope::Local);

    let driver = powerplant.clone();
    let handle = std::thread::spawn(move || driver.start());
    std::thread::sleep(Duration::from_millis(30));
    powerplant.shutdown();
    handle.join().unwrap();

    assert_eq!(*reactor.order.lock(), vec!["realtime", "high", "normal", "low"]);
}

struct SamePriorityFan {
    pub order: Arc<Mutex<Vec<&'static str>>>,
}

impl Reactor for SamePriorityFan {
    fn install(ctx: &ReactorContext) -> Result<Self, BindError> {
        let order = Arc::new(Mutex::new(Vec::new()));
        let bind_one = |label: &'static str, order: Arc<Mutex<Vec<&'static str>>>| {
            ctx.on(
                vec![Trigger::<Ping>::new(), PriorityWord::normal()],
                label,
                move |_args| {
                    order.lock().push(label);
                },
            )
        };

        // All three bound at the same priority band; task ids (and so queue
        // order) follow bind order, so ties resolve to submission order.
        bind_one("first", order.clone())?;
        bind_one("second", order.clone())?;
        bind_one("third", order.clone())?;

        Ok(Self { order })
    }
}

#[test]
fn same_priority_reactions_run_in_submission_order() {
    let mut config = PowerPlantConfig::default();
    config.default_pool_concurrency = 1;
    let powerplant = PowerPlant::new(config).unwrap();
    let reactor = powerplant.install::<SamePriorityFan>().unwrap();

    powerplant.emit(Ping, Scope::Local);

    let driver = powerplant.clone();
    let handle = std::thread::spawn(move || driver.start());
    std::thread::sleep(Duration::from_millis(30));
    powerplant.shutdown();
    handle.join().unwrap();

    assert_eq!(*reactor.order.lock(), vec!["first", "second", "third"]);
}
