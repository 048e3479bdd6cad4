//! The emit pipeline: `emit::<Scope>(value)`, the single entry point for
//! producing data into the runtime.
//!
//! `LOCAL` writes into the stores and fans out to every subscriber's
//! notify closure (installed by `DslWord::bind`, see `dsl/words.rs`);
//! `INLINE` does the same but forces those notify closures to run their
//! resulting task synchronously instead of handing it to the scheduler
//! (see the inline-mode thread-local toggle in `reaction.rs`);
//! `INITIALIZE` defers to a startup queue; `DELAY`/`AT` hand off to the
//! chrono service; `NETWORK` hands off to a [`NetworkSink`] collaborator
//! that this crate stubs out — distributed delivery is out of scope for the
//! runtime core.

use std::any::Any;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::chrono::ChronoService;
use crate::clock::SimNanos;
use crate::stores::Stores;

/// Where an emitted value is delivered.
pub enum Scope {
    Local,
    Inline,
    Initialize,
    Delay(Duration),
    At(SimNanos),
    Network {
        target: Option<String>,
        reliable: bool,
    },
}

/// A collaborator that takes locally-emitted values destined for `NETWORK`
/// scope and puts them on the wire. The wire protocol and peer discovery
/// are out of scope for this crate; this trait is the seam an application
/// (or a future crate) plugs a real transport into.
pub trait NetworkSink: Send + Sync {
    fn send(&self, type_name: &'static str, value: Arc<dyn Any + Send + Sync>, target: Option<&str>, reliable: bool);
}

/// Drops everything. The default when no [`NetworkSink`] is configured.
pub struct NullNetworkSink;

impl NetworkSink for NullNetworkSink {
    fn send(&self, _type_name: &'static str, _value: Arc<dyn Any + Send + Sync>, _target: Option<&str>, _reliable: bool) {}
}

/// Multicast-group addressed network sink placeholder: records the
/// destination but still does not put bytes on a wire. Mirrors
/// `NetworkConfig`'s `name`/`multicast_group`/`port` fields; a real
/// implementation would bind a UDP socket here.
pub struct MulticastNetworkSink {
    pub group: Ipv4Addr,
    pub port: u16,
}

impl NetworkSink for MulticastNetworkSink {
    fn send(&self, _type_name: &'static str, _value: Arc<dyn Any + Send + Sync>, _target: Option<&str>, _reliable: bool) {}
}

/// Values queued by an `INITIALIZE` emit, flushed as `LOCAL` once the
/// powerplant transitions `Starting` → `Running`.
#[derive(Default)]
pub struct InitializeQueue {
    pending: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
    flushed: AtomicBool,
}

impl InitializeQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, action: Box<dyn FnOnce() + Send>) {
        self.pending.lock().push(action);
    }

    /// Flush queued emits as `LOCAL`, in submission order. Idempotent: a
    /// second call after the first is a no-op, since `Starting` is only
    /// entered once per powerplant lifetime.
    pub fn flush(&self) {
        if self.flushed.swap(true, Ordering::AcqRel) {
            return;
        }
        let actions = std::mem::take(&mut *self.pending.lock());
        for action in actions {
            action();
        }
    }
}

/// Everything `emit` needs: the stores to write into, the chrono service
/// for delayed emits, the startup queue, and (optionally) a network sink.
pub struct EmitContext {
    pub stores: Arc<Stores>,
    pub chrono: Arc<ChronoService>,
    pub initialize_queue: Arc<InitializeQueue>,
    pub network: Arc<dyn NetworkSink>,
}

/// Write `value` into the `Latest`/`History` stores for `T` and run every
/// subscriber's notify closure, in bind order: for each subscriber in
/// `TypeList(T)`, ask the reaction for a task.
fn publish_local<T: Any + Send + Sync>(stores: &Stores, value: Arc<T>) {
    stores.emit_latest(value.clone());
    stores.push_history(value.clone());
    for subscriber in stores.subscribers::<T>() {
        subscriber(value.clone());
    }
}

/// `emit::<Scope>(value)` — see module docs for what each [`Scope`] does.
pub fn emit<T: Any + Send + Sync>(ctx: &EmitContext, value: T, scope: Scope) {
    let value = Arc::new(value);
    match scope {
        Scope::Local => publish_local(&ctx.stores, value),
        Scope::Inline => {
            crate::reaction::with_inline_emit(|| publish_local(&ctx.stores, value));
        }
        Scope::Initialize => {
            let stores = ctx.stores.clone();
            ctx.initialize_queue.push(Box::new(move || publish_local(&stores, value)));
        }
        Scope::Delay(duration) => {
            let stores = ctx.stores.clone();
            let target = ctx.chrono.clock().now() + duration.as_nanos() as i64;
            ctx.chrono.schedule_once(target, Box::new(move || publish_local(&stores, value)));
        }
        Scope::At(time) => {
            let stores = ctx.stores.clone();
            ctx.chrono.schedule_once(time, Box::new(move || publish_local(&stores, value)));
        }
        Scope::Network { target, reliable } => {
            ctx.network.send(std::any::type_name::<T>(), value, target.as_deref(), reliable);
        }
    }
}
