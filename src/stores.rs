//! Type-indexed data stores.
//!
//! Three store kinds, each keyed by [`TypeId`]: a `Latest(T)` single-slot
//! cache, a `History(T, N)` bounded ring, and a `TypeList(T)` append-mostly
//! subscriber list. All three are multi-reader/single-writer via an
//! immutable value behind a shared pointer, swapped atomically on write —
//! a name-keyed `RwLock<HashMap<..>>` with typed accessors, generalized
//! here to typed pub/sub slots rather than named resources.
//!
//! `Stores` owns one heterogeneous registry per store kind; a first `get`/
//! `emit` for a type lazily inserts its slot.

use std::any::{Any, TypeId};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::RwLock;

type AnyBox = Box<dyn Any + Send + Sync>;

fn registry_get_or_init<T, F>(
    registry: &RwLock<HashMap<TypeId, AnyBox>>,
    init: F,
) -> Arc<T>
where
    T: Any + Send + Sync,
    F: FnOnce() -> T,
{
    {
        let read = registry.read();
        if let Some(slot) = read.get(&TypeId::of::<T>()) {
            return slot.downcast_ref::<Arc<T>>().expect("type-keyed slot").clone();
        }
    }
    let mut write = registry.write();
    write
        .entry(TypeId::of::<T>())
        .or_insert_with(|| Box::new(Arc::new(init())))
        .downcast_ref::<Arc<T>>()
        .expect("type-keyed slot")
        .clone()
}

/// `Latest(T)` — the most recent value emitted for `T`, or empty before the
/// first emit. Reads never block: a read is an `RwLock::read` over a single
/// `Option<Arc<T>>` slot, held only long enough to clone the `Arc`.
struct LatestSlot<T>(RwLock<Option<Arc<T>>>);

impl<T> Default for LatestSlot<T> {
    fn default() -> Self {
        Self(RwLock::new(None))
    }
}

/// `History(T, N)` — up to `N` most recent values, newest first. `N` is the
/// max depth requested across every binder that declared a historical view
/// of `T`; see [`Stores::set_history_depth`].
struct HistorySlot<T> {
    depth: RwLock<usize>,
    values: RwLock<VecDeque<Arc<T>>>,
}

impl<T> Default for HistorySlot<T> {
    fn default() -> Self {
        Self {
            depth: RwLock::new(1),
            values: RwLock::new(VecDeque::new()),
        }
    }
}

/// `TypeList(T)` — the reactions subscribed to `T`, in bind order. Append
/// happens at bind time (single-threaded, under PowerPlant construction or
/// while holding the install lock); removal happens at unbind. Reads (by
/// the emit pipeline, on the emitting thread) take a read lock.
struct TypeListSlot<T> {
    _marker: std::marker::PhantomData<T>,
    entries: RwLock<Vec<Arc<dyn Fn(Arc<T>) + Send + Sync>>>,
}

impl<T> Default for TypeListSlot<T> {
    fn default() -> Self {
        Self {
            _marker: std::marker::PhantomData,
            entries: RwLock::new(Vec::new()),
        }
    }
}

/// The process-wide (really: per-[`crate::powerplant::PowerPlant`]) set of
/// typed data stores.
#[derive(Default)]
pub struct Stores {
    latest: RwLock<HashMap<TypeId, AnyBox>>,
    history: RwLock<HashMap<TypeId, AnyBox>>,
    subscribers: RwLock<HashMap<TypeId, AnyBox>>,
}

impl Stores {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the latest value of `T`. Returns the value that was current
    /// before this write, if any.
    pub fn emit_latest<T: Any + Send + Sync>(&self, value: Arc<T>) -> Option<Arc<T>> {
        let slot = registry_get_or_init::<LatestSlot<T>, _>(&self.latest, LatestSlot::default);
        slot.0.write().replace(value)
    }

    /// Read the latest value of `T`, or `None` if `T` has never been
    /// emitted. No blocking on a writer beyond the brief critical section
    /// of a single `Arc` clone.
    pub fn get_latest<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let slot = registry_get_or_init::<LatestSlot<T>, _>(&self.latest, LatestSlot::default);
        slot.0.read().clone()
    }

    /// Ensure `T`'s history ring holds at least `depth` entries; called once
    /// per binder at bind time with that binder's requested depth. The slot
    /// depth is the max across all calls.
    pub fn set_history_depth<T: Any + Send + Sync>(&self, depth: usize) {
        let slot = registry_get_or_init::<HistorySlot<T>, _>(&self.history, HistorySlot::default);
        let mut current = slot.depth.write();
        if depth > *current {
            *current = depth;
        }
    }

    /// Push a new value to the front of `T`'s history ring, dropping the
    /// tail once the ring exceeds its configured depth.
    pub fn push_history<T: Any + Send + Sync>(&self, value: Arc<T>) {
        let slot = registry_get_or_init::<HistorySlot<T>, _>(&self.history, HistorySlot::default);
        let depth = *slot.depth.read();
        let mut values = slot.values.write();
        values.push_front(value);
        while values.len() > depth {
            values.pop_back();
        }
    }

    /// Snapshot of `T`'s history ring, newest first.
    pub fn get_history<T: Any + Send + Sync>(&self) -> Vec<Arc<T>> {
        let slot = registry_get_or_init::<HistorySlot<T>, _>(&self.history, HistorySlot::default);
        slot.values.read().iter().cloned().collect()
    }

    /// Register a subscriber callback for `T`, invoked by the emit pipeline
    /// for every `LOCAL`/`INLINE` emit of `T`. Called once per binder at
    /// bind time.
    pub fn subscribe<T, F>(&self, callback: F)
    where
        T: Any + Send + Sync,
        F: Fn(Arc<T>) + Send + Sync + 'static,
    {
        let slot =
            registry_get_or_init::<TypeListSlot<T>, _>(&self.subscribers, TypeListSlot::default);
        slot.entries.write().push(Arc::new(callback));
    }

    /// The subscriber callbacks currently registered for `T`, in bind order.
    pub fn subscribers<T: Any + Send + Sync>(&self) -> Vec<Arc<dyn Fn(Arc<T>) + Send + Sync>> {
        let slot =
            registry_get_or_init::<TypeListSlot<T>, _>(&self.subscribers, TypeListSlot::default);
        slot.entries.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latest_is_empty_before_first_emit() {
        let stores = Stores::new();
        assert!(stores.get_latest::<u32>().is_none());
    }

    #[test]
    fn latest_replaces_on_each_emit() {
        let stores = Stores::new();
        stores.emit_latest(Arc::new(1u32));
        stores.emit_latest(Arc::new(2u32));
        assert_eq!(*stores.get_latest::<u32>().unwrap(), 2);
    }

    #[test]
    fn history_drops_tail_beyond_depth() {
        let stores = Stores::new();
        stores.set_history_depth::<u32>(2);
        stores.push_history(Arc::new(1u32));
        stores.push_history(Arc::new(2u32));
        stores.push_history(Arc::new(3u32));
        let history: Vec<u32> = stores.get_history::<u32>().into_iter().map(|v| *v).collect();
        assert_eq!(history, vec![3, 2]);
    }

    #[test]
    fn history_depth_is_max_across_binders() {
        let stores = Stores::new();
        stores.set_history_depth::<u32>(2);
        stores.set_history_depth::<u32>(5);
        stores.set_history_depth::<u32>(3);
        for i in 0..10u32 {
            stores.push_history(Arc::new(i));
        }
        assert_eq!(stores.get_history::<u32>().len(), 5);
    }

    #[test]
    fn subscribers_are_called_in_bind_order() {
        let stores = Stores::new();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        for id in 0..3 {
            let order = order.clone();
            stores.subscribe::<u32, _>(move |_| order.lock().push(id));
        }
        for sub in stores.subscribers::<u32>() {
            sub(Arc::new(0));
        }
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }
}
