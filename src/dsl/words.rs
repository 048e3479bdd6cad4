//! Concrete DSL words.
//!
//! Each word is a small, mostly-stateless struct implementing whatever
//! subset of [`DslWord`]'s hooks it needs.

use std::any::Any;
use std::collections::VecDeque;
use std::marker::PhantomData;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::word::{boxed, priority, BindContext, DslWord, GetContext, GetValue, GroupDescriptor};
use crate::ids::{GroupId, PoolId};
use crate::reaction::ReactionTask;

/// `Trigger<T>` — subscribes to `T`; `get` returns the current `Latest(T)`.
/// A task is only created when `T` is emitted (unlike `With<U>`, which only
/// ever contributes a value, never triggers on its own).
pub struct Trigger<T>(PhantomData<T>);

impl<T> Trigger<T> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self(PhantomData))
    }
}

impl<T: Any + Send + Sync> DslWord for Trigger<T> {
    fn bind(&self, ctx: &BindContext<'_>) {
        let notify = ctx.notify.clone();
        ctx.stores.subscribe::<T, _>(move |_value: Arc<T>| {
            notify(crate::reaction::current_cause());
        });
    }

    fn get(&self, ctx: &GetContext<'_>) -> Vec<GetValue> {
        vec![boxed(ctx.stores.get_latest::<T>().expect("precondition guarantees a value"))]
    }

    fn precondition(&self, ctx: &GetContext<'_>) -> bool {
        ctx.stores.get_latest::<T>().is_some()
    }
}

/// `With<U>` — contributes the current `Latest(U)` without subscribing; a
/// reaction with only `With` words never fires on its own.
pub struct With<U>(PhantomData<U>);

impl<U> With<U> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self(PhantomData))
    }
}

impl<U: Any + Send + Sync> DslWord for With<U> {
    fn get(&self, ctx: &GetContext<'_>) -> Vec<GetValue> {
        vec![boxed(ctx.stores.get_latest::<U>().expect("precondition guarantees a value"))]
    }

    fn precondition(&self, ctx: &GetContext<'_>) -> bool {
        ctx.stores.get_latest::<U>().is_some()
    }
}

/// `Optional<X>` — wraps another word so its `get`/`precondition` never
/// veto: a missing value becomes `None` in the callback tuple rather than
/// blocking the task.
pub struct Optional<X>(Arc<X>);

impl<X> Optional<X> {
    pub fn new(inner: Arc<X>) -> Arc<Self> {
        Arc::new(Self(inner))
    }
}

impl<X: DslWord + 'static> DslWord for Optional<X> {
    fn bind(&self, ctx: &BindContext<'_>) {
        self.0.bind(ctx)
    }

    fn get(&self, ctx: &GetContext<'_>) -> Vec<GetValue> {
        self.0.get(ctx)
    }

    fn precondition(&self, _ctx: &GetContext<'_>) -> bool {
        true
    }
}

/// `Last<N, T>` — contributes up to the `N` most recent values of `T` as a
/// `Vec<Arc<T>>`, and raises `T`'s history depth requirement to `N`.
pub struct Last<T> {
    depth: usize,
    _marker: PhantomData<T>,
}

impl<T: Any + Send + Sync> Last<T> {
    pub fn new(depth: usize) -> Arc<Self> {
        Arc::new(Self {
            depth,
            _marker: PhantomData,
        })
    }
}

impl<T: Any + Send + Sync> DslWord for Last<T> {
    fn bind(&self, ctx: &BindContext<'_>) {
        ctx.stores.set_history_depth::<T>(self.depth);
        let notify = ctx.notify.clone();
        ctx.stores.subscribe::<T, _>(move |_value: Arc<T>| {
            notify(crate::reaction::current_cause());
        });
    }

    fn get(&self, ctx: &GetContext<'_>) -> Vec<GetValue> {
        vec![boxed(ctx.stores.get_history::<T>())]
    }
}

/// The value delivered to every reaction bound to an `Every` word, once per
/// wheel tick. `bind` filters on `period` so a reaction only wakes for the
/// wheel it actually declared, even though every `Every` reaction of every
/// period shares this one message type.
#[derive(Debug, Clone, Copy)]
pub struct EveryTick {
    pub period: Duration,
}

/// `Every<period>` — fires periodically. Subscribes like any other word:
/// `reactor.rs` registers one deduped chrono wheel per distinct period
/// (via `ChronoService::register_every`) that emits `EveryTick` locally on
/// each fire, and this word's `bind` filters those ticks down to the ones
/// matching its own period. Two reactions declaring the same period share
/// one wheel; this also lets `Every` combine with `With<U>`/`Last<T>` like
/// any other triggering word, since it is one.
pub struct Every {
    pub period: Duration,
}

impl Every {
    pub fn new(period: Duration) -> Arc<Self> {
        Arc::new(Self { period })
    }
}

impl DslWord for Every {
    fn bind(&self, ctx: &BindContext<'_>) {
        let notify = ctx.notify.clone();
        let period = self.period;
        ctx.stores.subscribe::<EveryTick, _>(move |tick: Arc<EveryTick>| {
            if tick.period == period {
                notify(crate::reaction::current_cause());
            }
        });
    }
}

/// `Priority` — fixes a task's priority band.
pub struct PriorityWord(i32);

impl PriorityWord {
    pub fn new(level: i32) -> Arc<Self> {
        Arc::new(Self(level))
    }

    pub fn low() -> Arc<Self> {
        Self::new(priority::LOW)
    }

    pub fn normal() -> Arc<Self> {
        Self::new(priority::NORMAL)
    }

    pub fn high() -> Arc<Self> {
        Self::new(priority::HIGH)
    }

    pub fn realtime() -> Arc<Self> {
        Self::new(priority::REALTIME)
    }
}

impl DslWord for PriorityWord {
    fn priority(&self) -> Option<i32> {
        Some(self.0)
    }
}

/// `Pool<P>` — pins the reaction's tasks to a named pool.
pub struct PoolWord(PoolId);

impl PoolWord {
    pub fn new(pool: PoolId) -> Arc<Self> {
        Arc::new(Self(pool))
    }
}

impl DslWord for PoolWord {
    fn pool(&self) -> Option<PoolId> {
        Some(self.0)
    }
}

/// `Group<G>` — requires a token from group `G` before the task may run.
pub struct GroupWord(GroupId);

impl GroupWord {
    pub fn new(group: GroupId) -> Arc<Self> {
        Arc::new(Self(group))
    }
}

impl DslWord for GroupWord {
    fn groups(&self) -> Vec<GroupDescriptor> {
        vec![GroupDescriptor { group: self.0 }]
    }
}

/// `Single` — enforced by `Reaction::notify` (at most one in-flight or
/// queued task per reaction), not by a hook; this word exists purely so it
/// can appear in a reaction's word list and be detected by
/// [`crate::dsl::fusion::FusedReaction::is_single`].
pub struct Single;

impl Single {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

impl DslWord for Single {}

/// `Sync` — serializes this reaction's own tasks: only one may be mid-run at
/// a time, even when its pool has several worker threads. Later tasks are
/// held on a private FIFO by `reschedule` rather than occupying a worker
/// thread, and released from `postcondition` once the running task finishes.
pub struct Sync {
    queue: Mutex<VecDeque<ReactionTask>>,
    running: AtomicUsize,
    resubmit: Mutex<Option<Arc<dyn Fn(ReactionTask) + Send + Sync>>>,
}

impl Sync {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(VecDeque::new()),
            running: AtomicUsize::new(0),
            resubmit: Mutex::new(None),
        })
    }
}

impl DslWord for Sync {
    fn bind(&self, ctx: &BindContext<'_>) {
        *self.resubmit.lock() = Some(ctx.resubmit.clone());
    }

    fn reschedule(&self, task: ReactionTask) -> Option<ReactionTask> {
        if self.running.fetch_add(1, Ordering::AcqRel) == 0 {
            Some(task)
        } else {
            self.queue.lock().push_back(task);
            None
        }
    }

    fn postcondition(&self) {
        self.running.fetch_sub(1, Ordering::AcqRel);
        if let Some(next) = self.queue.lock().pop_front() {
            if let Some(resubmit) = self.resubmit.lock().clone() {
                resubmit(next);
            }
        }
    }
}

/// `Network<T>` — distributed delivery itself is out of scope for this
/// crate's `NetworkSink` stub (see `emit.rs`), but a reaction may still
/// declare `Network<T>` to receive locally-emitted `T` the same way
/// `Trigger<T>` would.
pub struct Network<T>(PhantomData<T>);

impl<T> Network<T> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self(PhantomData))
    }
}

impl<T: Any + Send + Sync> DslWord for Network<T> {
    fn bind(&self, ctx: &BindContext<'_>) {
        let notify = ctx.notify.clone();
        ctx.stores.subscribe::<T, _>(move |_value: Arc<T>| {
            notify(crate::reaction::current_cause());
        });
    }

    fn get(&self, ctx: &GetContext<'_>) -> Vec<GetValue> {
        vec![boxed(ctx.stores.get_latest::<T>().expect("precondition guarantees a value"))]
    }
}

/// Raw readiness notification for a file descriptor, delivered by `Io`.
/// Real epoll/kqueue delivery is not wired up; this is the payload shape a
/// future poller would publish.
#[derive(Debug, Clone, Copy)]
pub struct IoReadiness {
    pub fd: i32,
    pub readable: bool,
    pub writable: bool,
}

/// `IO` — wakes on raw file-descriptor readiness. Unlike `Network<T>`,
/// which is generic over the delivered payload, this mirrors the
/// original's non-generic `IOConfiguration` shape: one fixed event type
/// regardless of which fd it concerns, since the fd itself is part of the
/// payload.
pub struct Io;

impl Io {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

impl DslWord for Io {
    fn bind(&self, ctx: &BindContext<'_>) {
        let notify = ctx.notify.clone();
        ctx.stores.subscribe::<IoReadiness, _>(move |_value: Arc<IoReadiness>| {
            notify(crate::reaction::current_cause());
        });
    }

    fn get(&self, ctx: &GetContext<'_>) -> Vec<GetValue> {
        vec![boxed(ctx.stores.get_latest::<IoReadiness>().expect("precondition guarantees a value"))]
    }

    fn precondition(&self, ctx: &GetContext<'_>) -> bool {
        ctx.stores.get_latest::<IoReadiness>().is_some()
    }
}

/// One datagram delivered by `Udp`. No socket is actually bound; a future
/// implementation would publish these from a background poller thread.
#[derive(Debug, Clone)]
pub struct UdpPacket {
    pub from: SocketAddr,
    pub data: Vec<u8>,
}

/// `UDP` — wakes on inbound datagrams. Fixed payload shape, same reasoning
/// as `Io`.
pub struct Udp;

impl Udp {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

impl DslWord for Udp {
    fn bind(&self, ctx: &BindContext<'_>) {
        let notify = ctx.notify.clone();
        ctx.stores.subscribe::<UdpPacket, _>(move |_value: Arc<UdpPacket>| {
            notify(crate::reaction::current_cause());
        });
    }

    fn get(&self, ctx: &GetContext<'_>) -> Vec<GetValue> {
        vec![boxed(ctx.stores.get_latest::<UdpPacket>().expect("precondition guarantees a value"))]
    }

    fn precondition(&self, ctx: &GetContext<'_>) -> bool {
        ctx.stores.get_latest::<UdpPacket>().is_some()
    }
}

/// One inbound chunk delivered by `Tcp`, or a closed-connection marker.
#[derive(Debug, Clone)]
pub struct TcpEvent {
    pub from: SocketAddr,
    pub data: Vec<u8>,
    pub closed: bool,
}

/// `TCP` — wakes on inbound stream data or connection close. Fixed payload
/// shape, same reasoning as `Io`.
pub struct Tcp;

impl Tcp {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

impl DslWord for Tcp {
    fn bind(&self, ctx: &BindContext<'_>) {
        let notify = ctx.notify.clone();
        ctx.stores.subscribe::<TcpEvent, _>(move |_value: Arc<TcpEvent>| {
            notify(crate::reaction::current_cause());
        });
    }

    fn get(&self, ctx: &GetContext<'_>) -> Vec<GetValue> {
        vec![boxed(ctx.stores.get_latest::<TcpEvent>().expect("precondition guarantees a value"))]
    }

    fn precondition(&self, ctx: &GetContext<'_>) -> bool {
        ctx.stores.get_latest::<TcpEvent>().is_some()
    }
}

/// Marker emitted once, during the `Starting` → `Running` transition.
pub struct StartupEvent;
/// Marker emitted once, at the beginning of `Draining`.
pub struct ShutdownEvent;

/// `Startup` — fires once when the powerplant transitions to `Running`.
pub struct Startup;

impl Startup {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

impl DslWord for Startup {
    fn bind(&self, ctx: &BindContext<'_>) {
        let notify = ctx.notify.clone();
        ctx.stores
            .subscribe::<StartupEvent, _>(move |_value: Arc<StartupEvent>| {
                notify(crate::reaction::current_cause());
            });
    }
}

/// `Shutdown` — fires once when the powerplant enters `Draining`.
pub struct Shutdown;

impl Shutdown {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

impl DslWord for Shutdown {
    fn bind(&self, ctx: &BindContext<'_>) {
        let notify = ctx.notify.clone();
        ctx.stores
            .subscribe::<ShutdownEvent, _>(move |_value: Arc<ShutdownEvent>| {
                notify(crate::reaction::current_cause());
            });
    }
}

