//! The PowerPlant lifecycle: `Constructed → Starting → Running → Draining →
//! Terminated`. Owns every other subsystem — stores, scheduler, chrono, the
//! emit pipeline, and statistics — and is the sole entry point applications
//! construct.
//!
//! The "exactly one powerplant per process" invariant is a process-wide
//! `AtomicBool` guard rather than a leaked `'static`: a `PowerPlant` is owned
//! by `main` and torn down on `Drop`, so a process can construct a second one
//! after the first is dropped (tests rely on this).

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use snafu::{ensure, ResultExt};

use crate::chrono::ChronoService;
use crate::clock::{self, SimulatedClock};
use crate::config::PowerPlantConfig;
use crate::dsl::words::{ShutdownEvent, StartupEvent};
use crate::emit::{self, EmitContext, InitializeQueue, MulticastNetworkSink, NetworkSink, NullNetworkSink, Scope};
use crate::error::{AlreadyConstructedSnafu, InstallAfterStartSnafu, InstallBindSnafu, PowerPlantError};
use crate::reactor::{Reactor, ReactorContext};
use crate::scheduler::Scheduler;
use crate::stats::StatsPublisher;
use crate::stores::Stores;

static POWERPLANT_LIVE: AtomicBool = AtomicBool::new(false);

/// Severity passed to [`PowerPlant::log`], forwarded to the matching
/// `tracing` macro.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// The CLI-capture message emitted `INITIALIZE` at construction, making the
/// raw argv available to any reactor that triggers on it at startup.
#[derive(Debug, Clone)]
pub struct CommandLineArguments {
    pub argv: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LifecycleState {
    Constructed,
    Starting,
    Running,
    Draining,
    Terminated,
}

/// Owns every runtime subsystem for one process. Construct with
/// [`PowerPlant::new`], install reactors with [`PowerPlant::install`], then
/// call [`PowerPlant::start`] from the thread that should drive the "main"
/// pool; some other reactor or thread calls [`PowerPlant::shutdown`] to
/// unwind it.
pub struct PowerPlant {
    config: PowerPlantConfig,
    clock: Arc<SimulatedClock>,
    stores: Arc<Stores>,
    scheduler: Arc<Scheduler>,
    chrono: Arc<ChronoService>,
    emit_ctx: Arc<EmitContext>,
    stats: Arc<StatsPublisher>,
    state: Mutex<LifecycleState>,
    shutting_down: AtomicBool,
    // Keeps installed reactors alive for the powerplant's lifetime; their
    // reactions hold the real behavior via `Arc<Reaction>` clones captured
    // in closures, but a reactor may also own its own state a callback
    // borrows, so the reactor itself must outlive the powerplant too.
    reactors: Mutex<Vec<Box<dyn Any + Send + Sync>>>,
}

impl PowerPlant {
    /// Construct a new powerplant. Fails with
    /// [`PowerPlantError::AlreadyConstructed`] if one is already live in
    /// this process.
    pub fn new(config: PowerPlantConfig) -> Result<Arc<Self>, PowerPlantError> {
        ensure!(
            POWERPLANT_LIVE
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok(),
            AlreadyConstructedSnafu
        );

        let clock = Arc::new(SimulatedClock::new());
        clock::install_global(clock.clone());

        let stores = Arc::new(Stores::new());
        let stats = Arc::new(StatsPublisher::new());
        let scheduler = Scheduler::new(config.default_pool_concurrency, stats.clone());
        for pool in &config.pools {
            scheduler.declare_pool(&pool.name, pool.concurrency, pool.counts_for_idle, pool.persistent);
        }

        let chrono = Arc::new(ChronoService::new(clock.clone()));

        let network: Arc<dyn NetworkSink> = match &config.network {
            Some(net) => Arc::new(MulticastNetworkSink {
                group: net.multicast_group,
                port: net.port,
            }),
            None => Arc::new(NullNetworkSink),
        };

        let emit_ctx = Arc::new(EmitContext {
            stores: stores.clone(),
            chrono: chrono.clone(),
            initialize_queue: Arc::new(InitializeQueue::new()),
            network,
        });
        stats.set_emit_ctx(emit_ctx.clone());

        let powerplant = Arc::new(Self {
            config,
            clock,
            stores,
            scheduler,
            chrono,
            emit_ctx,
            stats,
            state: Mutex::new(LifecycleState::Constructed),
            shutting_down: AtomicBool::new(false),
            reactors: Mutex::new(Vec::new()),
        });

        powerplant.emit(
            CommandLineArguments {
                argv: std::env::args().collect(),
            },
            Scope::Initialize,
        );

        Ok(powerplant)
    }

    pub fn config(&self) -> &PowerPlantConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<SimulatedClock> {
        &self.clock
    }

    pub fn stores(&self) -> &Arc<Stores> {
        &self.stores
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Register an additional [`crate::stats::TraceSink`] (e.g. a
    /// [`crate::stats::JsonLinesTraceSink`]) to receive every finished
    /// task's [`crate::stats::StatisticsRecord`].
    pub fn add_trace_sink(&self, sink: Arc<dyn crate::stats::TraceSink>) {
        self.stats.add_sink(sink);
    }

    /// Construct and bind a reactor. Only valid while `Constructed`; returns
    /// [`PowerPlantError::InstallAfterStart`] once `start()` has been
    /// called.
    pub fn install<R: Reactor>(self: &Arc<Self>) -> Result<Arc<R>, PowerPlantError> {
        ensure!(
            *self.state.lock() == LifecycleState::Constructed,
            InstallAfterStartSnafu
        );

        let ctx = ReactorContext {
            reactor_name: Arc::from(std::any::type_name::<R>()),
            stores: self.stores.clone(),
            scheduler: self.scheduler.clone(),
            chrono: self.chrono.clone(),
            emit_ctx: self.emit_ctx.clone(),
        };

        let reactor_name = std::any::type_name::<R>().to_string();
        let reactor = R::install(&ctx).context(InstallBindSnafu { reactor: reactor_name })?;
        let reactor = Arc::new(reactor);
        self.reactors.lock().push(Box::new(reactor.clone()));
        Ok(reactor)
    }

    /// `emit::<Scope>(value)`.
    pub fn emit<T: Any + Send + Sync>(&self, value: T, scope: Scope) {
        emit::emit(&self.emit_ctx, value, scope);
    }

    /// `log<Level>(args…)` — forwards through the `tracing` macros
    /// `log.rs` configures as the global subscriber.
    pub fn log(&self, level: LogLevel, message: impl std::fmt::Display) {
        match level {
            LogLevel::Trace => tracing::trace!("{}", message),
            LogLevel::Debug => tracing::debug!("{}", message),
            LogLevel::Info => tracing::info!("{}", message),
            LogLevel::Warn => tracing::warn!("{}", message),
            LogLevel::Error => tracing::error!("{}", message),
        }
    }

    /// Flush `INITIALIZE` emits, transition to `Running`, start worker
    /// threads and the chrono thread, then drive the main pool's queue on
    /// the calling thread until [`Self::shutdown`] drains it. Blocks the
    /// caller as the main-pool thread; returns after `shutdown` completes.
    pub fn start(self: &Arc<Self>) {
        {
            let mut state = self.state.lock();
            if *state != LifecycleState::Constructed {
                return;
            }
            *state = LifecycleState::Starting;
        }

        self.emit_ctx.initialize_queue.flush();
        self.emit(StartupEvent, Scope::Local);

        *self.state.lock() = LifecycleState::Running;
        self.chrono.start();
        self.scheduler.start_workers();
        self.scheduler.run_main();

        // `run_main` only returns once the main pool has drained, which
        // only happens after `shutdown()` has called `enter_draining`.
        *self.state.lock() = LifecycleState::Terminated;
        self.scheduler.terminate_persistent();
        self.chrono.shutdown();
    }

    /// Enter `Draining`: emit `Shutdown`, stop non-persistent pools from
    /// accepting new work, and join their workers. Idempotent: calling this
    /// twice is a no-op the second time.
    pub fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }
        *self.state.lock() = LifecycleState::Draining;
        self.emit(ShutdownEvent, Scope::Local);
        self.scheduler.enter_draining();
        self.scheduler.join_non_persistent();
    }
}

impl Drop for PowerPlant {
    fn drop(&mut self) {
        POWERPLANT_LIVE.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::word::downcast;
    use crate::dsl::words::Trigger;
    use crate::error::BindError;
    use parking_lot::Mutex as PMutex;

    struct CountingReactor {
        seen: Arc<PMutex<Vec<u32>>>,
    }

    impl Reactor for CountingReactor {
        fn install(ctx: &ReactorContext) -> Result<Self, BindError> {
            let seen = Arc::new(PMutex::new(Vec::new()));
            let seen_clone = seen.clone();
            ctx.on(
                vec![Trigger::<u32>::new()],
                "on_u32",
                move |args| {
                    let value: Arc<u32> = downcast(args.into_iter().next().unwrap());
                    seen_clone.lock().push(*value);
                },
            )?;
            Ok(Self { seen })
        }
    }

    #[test]
    fn single_powerplant_at_a_time() {
        let first = PowerPlant::new(PowerPlantConfig::default()).unwrap();
        let second = PowerPlant::new(PowerPlantConfig::default());
        assert!(matches!(second, Err(PowerPlantError::AlreadyConstructed)));
        drop(first);
        let third = PowerPlant::new(PowerPlantConfig::default());
        assert!(third.is_ok());
    }

    #[test]
    fn start_runs_emitted_events_then_shutdown_unblocks() {
        let powerplant = PowerPlant::new(PowerPlantConfig::default()).unwrap();
        let reactor = powerplant.install::<CountingReactor>().unwrap();

        let pp = powerplant.clone();
        let handle = std::thread::spawn(move || pp.start());

        // Give the main pool loop a moment to enter `Running`, then drive
        // a few emits and shut down.
        std::thread::sleep(std::time::Duration::from_millis(20));
        powerplant.emit(1u32, Scope::Local);
        powerplant.emit(2u32, Scope::Local);
        powerplant.emit(3u32, Scope::Local);
        std::thread::sleep(std::time::Duration::from_millis(20));
        powerplant.shutdown();
        handle.join().unwrap();

        assert_eq!(*reactor.seen.lock(), vec![1, 2, 3]);
    }
}
