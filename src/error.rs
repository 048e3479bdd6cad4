//! Crate-wide error types.
//!
//! Only bind-time and lifecycle errors are represented here. Runtime errors
//! that the scheduler encounters while dispatching a task (missing data, a
//! vetoed precondition, a callback panic, submission during shutdown) never
//! propagate out of the scheduler — they are recorded on the task's
//! [`crate::stats::StatisticsRecord`] instead (see `stats.rs`).

use snafu::Snafu;

/// Errors raised while fusing a reaction's DSL words into a [`crate::dsl::fusion::FusedReaction`].
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum BindError {
    #[snafu(display("DSL arguments do not map to any word"))]
    DslMapping,

    #[snafu(display("more than one word in this reaction provides a pool"))]
    MultiplePool,
}

/// Errors raised by [`crate::powerplant::PowerPlant`] lifecycle operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum PowerPlantError {
    #[snafu(display("a PowerPlant is already constructed in this process"))]
    AlreadyConstructed,

    #[snafu(display("cannot install a reactor after the powerplant has started"))]
    InstallAfterStart,

    #[snafu(display("failed to bind reaction for reactor {}: {}", reactor, source))]
    InstallBind {
        reactor: String,
        source: BindError,
    },
}

/// Aggregate crate error type, returned from the public, fallible entry points.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("{}", source))]
    PowerPlant {
        source: PowerPlantError,
    },

    #[snafu(display("{}", source))]
    Bind {
        source: BindError,
    },
}

impl From<PowerPlantError> for Error {
    fn from(source: PowerPlantError) -> Self {
        Error::PowerPlant {
            source,
        }
    }
}

impl From<BindError> for Error {
    fn from(source: BindError) -> Self {
        Error::Bind {
            source,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
