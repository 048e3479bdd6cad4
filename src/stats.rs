//! Statistics and tracing.
//!
//! Every reaction task produces *created*, *started*, and *finished* events
//! (plus *blocked*/*missing_data* for tasks the runtime denied before they
//! ever ran); each event carries simulated time, steady time, per-thread CPU
//! time, and the running thread's id. A [`TraceSink`] consumes finished
//! [`StatisticsRecord`]s; [`JsonLinesTraceSink`] is the one concrete sink
//! this crate ships.
//!
//! `StatsPublisher` is also where cause-chain cycle-breaking lives: the
//! reactor that consumes statistics events is itself a reaction, and running
//! it produces a statistics event of its own. Left unchecked that is "stats
//! about stats" recursing forever. A publisher tracks the id of whichever
//! reaction(s) are registered as trace consumers and skips re-publishing
//! their own task records.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::clock::{current_sim_time, SimNanos};
use crate::emit::{self, EmitContext, Scope};
use crate::ids::{PoolId, ReactionId, TaskId};
use crate::reaction::Cause;

/// How a task's user callback concluded.
#[derive(Debug, Clone)]
pub enum TaskOutcome {
    Success,
    Panicked(String),
    /// Denied by a `precondition` before it was ever scheduled.
    Blocked,
    /// Denied because a required `Trigger`/`With` input had no value yet.
    MissingData,
}

#[derive(Debug, Clone, Copy)]
pub struct EventTimestamp {
    pub simulated: SimNanos,
    pub steady: Instant,
    pub cpu_time: Duration,
    pub thread_id: std::thread::ThreadId,
}

impl EventTimestamp {
    fn capture() -> Self {
        Self {
            simulated: current_sim_time(),
            steady: Instant::now(),
            cpu_time: thread_cpu_time(),
            thread_id: std::thread::current().id(),
        }
    }
}

#[cfg(target_os = "linux")]
fn thread_cpu_time() -> Duration {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: `ts` is a valid, uniquely-owned timespec and
    // CLOCK_THREAD_CPUTIME_ID never fails for the calling thread.
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_THREAD_CPUTIME_ID, &mut ts) };
    if rc != 0 {
        return Duration::ZERO;
    }
    Duration::new(ts.tv_sec as u64, ts.tv_nsec as u32)
}

#[cfg(not(target_os = "linux"))]
fn thread_cpu_time() -> Duration {
    Duration::ZERO
}

/// One reaction task's full event record. `created` is always present;
/// `started`/`finished` are filled in as the task progresses, and absent
/// for tasks that never ran (`blocked`/`missing_data`).
#[derive(Debug, Clone)]
pub struct StatisticsRecord {
    pub task_id: TaskId,
    pub reaction_id: ReactionId,
    pub reactor_name: Arc<str>,
    pub reaction_name: Arc<str>,
    pub cause: Cause,
    pub pool: Option<PoolId>,
    pub created: EventTimestamp,
    pub started: Option<EventTimestamp>,
    pub finished: Option<EventTimestamp>,
    outcome: Option<TaskOutcome>,
}

impl StatisticsRecord {
    pub fn created(
        task_id: TaskId,
        reaction_id: ReactionId,
        reactor_name: Arc<str>,
        reaction_name: Arc<str>,
        cause: Cause,
    ) -> Self {
        Self {
            task_id,
            reaction_id,
            reactor_name,
            reaction_name,
            cause,
            pool: None,
            created: EventTimestamp::capture(),
            started: None,
            finished: None,
            outcome: None,
        }
    }

    pub fn mark_started(&mut self) {
        self.started = Some(EventTimestamp::capture());
    }

    pub fn mark_finished(&mut self, outcome: TaskOutcome) {
        self.finished = Some(EventTimestamp::capture());
        self.outcome = Some(outcome);
    }

    pub fn mark_blocked(&mut self) {
        self.finished = Some(EventTimestamp::capture());
        self.outcome = Some(TaskOutcome::Blocked);
    }

    pub fn mark_missing_data(&mut self) {
        self.finished = Some(EventTimestamp::capture());
        self.outcome = Some(TaskOutcome::MissingData);
    }

    pub fn outcome(&self) -> Option<&TaskOutcome> {
        self.outcome.as_ref()
    }
}

/// Consumes finished task records. Implemented by the crate's own
/// [`JsonLinesTraceSink`] and by any application-defined sink.
pub trait TraceSink: Send + Sync {
    fn record(&self, record: &StatisticsRecord);
}

#[derive(Serialize)]
struct CauseDto {
    reaction_id: u64,
    task_id: u64,
}

#[derive(Serialize)]
struct TraceEventDto<'a> {
    task_id: u64,
    reaction_id: u64,
    reactor: &'a str,
    reaction: &'a str,
    cause: Option<CauseDto>,
    pool: Option<u64>,
    created_sim_nanos: SimNanos,
    started_sim_nanos: Option<SimNanos>,
    finished_sim_nanos: Option<SimNanos>,
    cpu_nanos: Option<u128>,
    outcome: &'a str,
    error: Option<&'a str>,
}

impl<'a> TraceEventDto<'a> {
    fn from_record(record: &'a StatisticsRecord) -> Self {
        let (outcome, error): (&str, Option<&str>) = match &record.outcome {
            None => ("pending", None),
            Some(TaskOutcome::Success) => ("success", None),
            Some(TaskOutcome::Panicked(message)) => ("panicked", Some(message.as_str())),
            Some(TaskOutcome::Blocked) => ("blocked", None),
            Some(TaskOutcome::MissingData) => ("missing_data", None),
        };
        Self {
            task_id: record.task_id.value(),
            reaction_id: record.reaction_id.value(),
            reactor: &record.reactor_name,
            reaction: &record.reaction_name,
            cause: record.cause.map(|(reaction_id, task_id)| CauseDto {
                reaction_id: reaction_id.value(),
                task_id: task_id.value(),
            }),
            pool: record.pool.map(|p| p.value()),
            created_sim_nanos: record.created.simulated,
            started_sim_nanos: record.started.map(|t| t.simulated),
            finished_sim_nanos: record.finished.map(|t| t.simulated),
            cpu_nanos: record
                .finished
                .map(|t| t.cpu_time.as_nanos().saturating_sub(record.created.cpu_time.as_nanos())),
            outcome,
            error,
        }
    }
}

/// Appends one JSON object per line to a writer, behind a mutex (writes
/// come from whichever worker thread finished a task).
pub struct JsonLinesTraceSink<W: std::io::Write + Send> {
    writer: Mutex<W>,
}

impl<W: std::io::Write + Send> JsonLinesTraceSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }
}

impl<W: std::io::Write + Send> TraceSink for JsonLinesTraceSink<W> {
    fn record(&self, record: &StatisticsRecord) {
        let dto = TraceEventDto::from_record(record);
        let mut writer = self.writer.lock();
        if let Ok(line) = serde_json::to_string(&dto) {
            let _ = writeln!(writer, "{}", line);
        }
    }
}

/// Fans finished task records out to zero or more [`TraceSink`]s, and also
/// back into the emit pipeline as a `StatisticsRecord` so a reactor can
/// subscribe to `Trigger<StatisticsRecord>` the same way it would to any
/// other type. Skips records produced by reactions registered as trace
/// consumers themselves (cause-chain cycle-breaking, see module docs).
#[derive(Default)]
pub struct StatsPublisher {
    sinks: RwLock<Vec<Arc<dyn TraceSink>>>,
    exempt_reactions: RwLock<HashSet<ReactionId>>,
    emit_ctx: RwLock<Option<Arc<EmitContext>>>,
}

impl StatsPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sink(&self, sink: Arc<dyn TraceSink>) {
        self.sinks.write().push(sink);
    }

    /// Mark a reaction (typically a trace/statistics-consuming reactor's
    /// own reaction) as exempt from triggering further publication.
    pub fn exempt(&self, reaction: ReactionId) {
        self.exempt_reactions.write().insert(reaction);
    }

    /// Wire this publisher into the emit pipeline so `publish` also emits
    /// `StatisticsRecord` as `Scope::Local`. Called once, from
    /// `PowerPlant::new`, after the powerplant's own `EmitContext` exists.
    pub fn set_emit_ctx(&self, ctx: Arc<EmitContext>) {
        *self.emit_ctx.write() = Some(ctx);
    }

    pub fn publish(&self, record: &StatisticsRecord) {
        if self.exempt_reactions.read().contains(&record.reaction_id) {
            return;
        }
        for sink in self.sinks.read().iter() {
            sink.record(record);
        }
        let ctx = self.emit_ctx.read().clone();
        if let Some(ctx) = ctx {
            emit::emit(&ctx, record.clone(), Scope::Local);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record(reaction_id: ReactionId) -> StatisticsRecord {
        let mut record = StatisticsRecord::created(
            TaskId::next(),
            reaction_id,
            Arc::from("Reactor"),
            Arc::from("on_thing"),
            None,
        );
        record.mark_started();
        record.mark_finished(TaskOutcome::Success);
        record
    }

    #[test]
    fn json_sink_writes_one_line_per_record() {
        let buffer: Vec<u8> = Vec::new();
        let sink = JsonLinesTraceSink::new(buffer);
        sink.record(&sample_record(ReactionId::next()));
        sink.record(&sample_record(ReactionId::next()));
        let written = sink.writer.lock();
        let text = String::from_utf8_lossy(&written);
        assert_eq!(text.lines().count(), 2);
        assert!(text.contains("\"outcome\":\"success\""));
    }

    #[test]
    fn exempt_reaction_does_not_publish() {
        let publisher = StatsPublisher::new();
        let reaction_id = ReactionId::next();
        publisher.exempt(reaction_id);

        struct CountingSink(Mutex<usize>);
        impl TraceSink for CountingSink {
            fn record(&self, _record: &StatisticsRecord) {
                *self.0.lock() += 1;
            }
        }
        let sink = Arc::new(CountingSink(Mutex::new(0)));
        publisher.add_sink(sink.clone());

        publisher.publish(&sample_record(reaction_id));
        assert_eq!(*sink.0.lock(), 0);

        publisher.publish(&sample_record(ReactionId::next()));
        assert_eq!(*sink.0.lock(), 1);
    }

    #[test]
    fn cause_round_trips_through_the_json_sink() {
        let buffer: Vec<u8> = Vec::new();
        let sink = JsonLinesTraceSink::new(buffer);
        let causing_reaction = ReactionId::next();
        let causing_task = TaskId::next();
        let mut record = StatisticsRecord::created(
            TaskId::next(),
            ReactionId::next(),
            Arc::from("Reactor"),
            Arc::from("on_thing"),
            Some((causing_reaction, causing_task)),
        );
        record.mark_started();
        record.mark_finished(TaskOutcome::Success);
        sink.record(&record);
        let written = sink.writer.lock();
        let text = String::from_utf8_lossy(&written);
        assert!(text.contains(&format!("\"reaction_id\":{}", causing_reaction.value())));
        assert!(text.contains(&format!("\"task_id\":{}", causing_task.value())));
    }
}
