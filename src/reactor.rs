//! Reactor installation and the `on()` builder reactors use to declare
//! reactions.
//!
//! A reactor's constructor calls `ctx.on(words, name, callback)` once per
//! reaction; stable Rust's lack of variadic generics rules out a
//! type-level `on::<(Trigger<T>, Priority<High>)>()`, so reactors instead
//! pass an explicit `Vec<Arc<dyn DslWord>>`, built with the word
//! constructors in `dsl::words`.

use std::sync::Arc;

use crate::chrono::ChronoService;
use crate::dsl::fusion::FusedReaction;
use crate::dsl::word::GetValue;
use crate::dsl::words::{Every, EveryTick};
use crate::dsl::DslWord;
use crate::emit::{self, EmitContext, Scope};
use crate::error::BindError;
use crate::reaction::{Reaction, ReactionHandle};
use crate::scheduler::Scheduler;
use crate::stats::StatisticsRecord;
use crate::stores::Stores;

/// A user type that declares reactions at construction. `install`
/// constructs `Self` via [`Reactor::install`], handed a [`ReactorContext`]
/// borrowed from the owning [`crate::powerplant::PowerPlant`].
pub trait Reactor: Send + Sync + 'static {
    fn install(ctx: &ReactorContext) -> Result<Self, BindError>
    where
        Self: Sized;
}

/// What a reactor's constructor needs: the stores/scheduler/chrono handles
/// to bind reactions against, and an emit entry point for reactions whose
/// callbacks produce further values. One context is built per reactor at
/// [`crate::powerplant::PowerPlant::install`] time; reactions may hold onto
/// a clone of the `Arc<EmitContext>` inside their callbacks.
pub struct ReactorContext {
    pub(crate) reactor_name: Arc<str>,
    pub(crate) stores: Arc<Stores>,
    pub(crate) scheduler: Arc<Scheduler>,
    pub(crate) chrono: Arc<ChronoService>,
    pub(crate) emit_ctx: Arc<EmitContext>,
}

impl ReactorContext {
    pub fn stores(&self) -> &Arc<Stores> {
        &self.stores
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// `emit::<Scope>(value)` for use inside a reaction callback or a
    /// reactor's own setup code.
    pub fn emit<T: std::any::Any + Send + Sync>(&self, value: T, scope: Scope) {
        emit::emit(&self.emit_ctx, value, scope);
    }

    pub fn emit_ctx(&self) -> &Arc<EmitContext> {
        &self.emit_ctx
    }

    /// Declare one reaction: fuse `words`, bind it against the stores, wire
    /// its tasks to the scheduler, and register any `Every` word's chrono
    /// wheel. `name` is the reaction's display name, used in logs, traces,
    /// and statistics records.
    ///
    /// `callback` receives the tuple-concatenated `get` output; each entry
    /// is downcast with [`crate::dsl::word::downcast`] by words' documented
    /// output type.
    pub fn on(
        &self,
        words: Vec<Arc<dyn DslWord>>,
        name: &str,
        callback: impl Fn(Vec<GetValue>) + Send + Sync + 'static,
    ) -> Result<ReactionHandle, BindError> {
        let every_periods: Vec<std::time::Duration> = words
            .iter()
            .filter_map(|word| word.as_any().downcast_ref::<Every>().map(|every| every.period))
            .collect();
        let consumes_statistics = words
            .iter()
            .any(|word| word.as_any().is::<crate::dsl::words::Trigger<StatisticsRecord>>());

        let fused = FusedReaction::new(words)?;
        let submit = self.scheduler.submit_fn();
        let reaction = Reaction::new(
            self.reactor_name.clone(),
            name,
            fused,
            Arc::new(callback),
            self.stores.clone(),
            submit,
            self.scheduler.stats().clone(),
        );
        reaction.bind();

        if consumes_statistics {
            self.scheduler.stats().exempt(reaction.id);
        }

        for period in every_periods {
            let chrono = self.chrono.clone();
            let emit_ctx = self.emit_ctx.clone();
            chrono.register_every(
                period,
                std::any::TypeId::of::<EveryTick>(),
                Arc::new(move || {
                    emit::emit(&emit_ctx, EveryTick { period }, Scope::Local);
                }),
            );
        }

        Ok(ReactionHandle(reaction))
    }
}
