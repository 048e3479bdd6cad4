//! Process-wide identifiers.
//!
//! `ReactionId` and `TaskId` are strictly monotonic; `PoolId` and `GroupId`
//! are assigned the first time a name is seen by the scheduler (see
//! `scheduler/mod.rs`). All four are cheap `Copy` newtypes over `u64` so
//! they can be used as `BinaryHeap`/map keys without indirection.

use std::sync::atomic::{AtomicU64, Ordering};

macro_rules! monotonic_id {
    ($name:ident, $counter:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(u64);

        impl $name {
            pub fn next() -> Self {
                static $counter: AtomicU64 = AtomicU64::new(0);
                Self($counter.fetch_add(1, Ordering::Relaxed))
            }

            pub fn value(self) -> u64 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }
    };
}

monotonic_id!(ReactionId, REACTION_ID_COUNTER);
monotonic_id!(TaskId, TASK_ID_COUNTER);
monotonic_id!(PoolId, POOL_ID_COUNTER);
monotonic_id!(GroupId, GROUP_ID_COUNTER);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_strictly_monotonic() {
        let a = TaskId::next();
        let b = TaskId::next();
        assert!(b.value() > a.value());
    }
}
