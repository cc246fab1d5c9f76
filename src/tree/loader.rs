//! Wave-ordered load and unload.
//!
//! # Responsibilities
//! - Drive a subtree through `Loading`/`Loaded` and `Unloading`/`Unloaded`
//! - Run siblings of equal priority concurrently, waves one after another
//! - Swap config-source layers into the store once per wave
//! - Unwind everything an aborted load did, newest first
//!
//! # Design Decisions
//! - A unit's own load runs before its children, its own unload after them
//! - Wave members are marked `Loading` before any of them starts, so a
//!   same-wave dependency is waited on rather than reported missing
//! - Non-required failures are recorded as `false` and loading continues
//! - Unload is best effort: a failing unit is marked `Failed` and its
//!   siblings are still unloaded

use futures_util::future::{join_all, BoxFuture, FutureExt};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::Instrument;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::arena::NodeRuntime;
use super::wave::{partition, Direction};
use super::{LoadReport, ModuleTree, NodeId, RepeatLoadPolicy};
use crate::aggregator::{Layer, LayerKey};
use crate::error::{RuntimeError, RuntimeResult};
use crate::inject::Dependencies;
use crate::observability::metrics;
use crate::resilience::{retry, within, RetryPolicy};
use crate::unit::{ConfigSource, SourceError, Unit, UnitContext, UnitKind, UnitState};

/// State shared by every unit touched by one load call.
struct Invocation<'c> {
    id: Uuid,
    cancel: &'c CancellationToken,
    /// Units whose own load succeeded, in completion order.
    journal: Mutex<Vec<Arc<NodeRuntime>>>,
}

impl<'c> Invocation<'c> {
    fn new(cancel: &'c CancellationToken) -> Self {
        Self {
            id: Uuid::new_v4(),
            cancel,
            journal: Mutex::new(Vec::new()),
        }
    }

    fn record(&self, node: Arc<NodeRuntime>) {
        self.journal.lock().expect("load journal mutex poisoned").push(node);
    }

    fn take_journal(&self) -> Vec<Arc<NodeRuntime>> {
        std::mem::take(&mut *self.journal.lock().expect("load journal mutex poisoned"))
    }
}

/// Result of loading one subtree.
struct Loaded {
    report: LoadReport,
    layer: Option<Layer>,
}

fn label(node: &NodeRuntime) -> &'static str {
    node.kind().unwrap_or(UnitKind::Service).report_label()
}

fn layer_key(node: &NodeRuntime) -> Option<LayerKey> {
    (node.kind() == Some(UnitKind::ConfigSource))
        .then(|| LayerKey::new(node.spec.priority, node.path.clone()))
}

impl ModuleTree {
    /// Load `id` and its subtree.
    pub async fn load(&self, id: NodeId) -> RuntimeResult<LoadReport> {
        self.load_with(id, &CancellationToken::new()).await
    }

    /// Load `id`, stopping between waves once `cancel` is set.
    pub async fn load_with(&self, id: NodeId, cancel: &CancellationToken) -> RuntimeResult<LoadReport> {
        let _guard = self.begin(id, "load")?;
        self.load_claimed(id, cancel).await
    }

    /// Unload `id` and its subtree.
    pub async fn unload(&self, id: NodeId) -> RuntimeResult<LoadReport> {
        let _guard = self.begin(id, "unload")?;
        self.unload_claimed(id).await
    }

    /// Unload (if loaded) then load, without releasing the subtree in between.
    pub async fn reload(&self, id: NodeId) -> RuntimeResult<LoadReport> {
        let _guard = self.begin(id, "reload")?;
        if self.runtime(id)?.state.get() == UnitState::Loaded {
            self.unload_claimed(id).await?;
        }
        self.load_claimed(id, &CancellationToken::new()).await
    }

    async fn load_claimed(&self, id: NodeId, cancel: &CancellationToken) -> RuntimeResult<LoadReport> {
        let node = self.runtime(id)?;
        match node.state.get() {
            UnitState::Unloaded => {}
            UnitState::Loaded => return self.repeat_load(&node),
            state => {
                return Err(RuntimeError::violation(&node.path, "load", state, "unit is not unloaded"));
            }
        }

        let invocation = Invocation::new(cancel);
        let span = tracing::info_span!("load", invocation = %invocation.id, unit = %node.path);
        let started = Instant::now();

        let result: RuntimeResult<Loaded> = async {
            tracing::info!("Load started");
            node.instance();
            self.advance(&node, UnitState::Unloaded, UnitState::Loading)
                .map_err(|actual| RuntimeError::violation(&node.path, "load", actual, "state changed"))?;
            self.load_node(node.clone(), &invocation).await
        }
        .instrument(span.clone())
        .await;

        let result = match result {
            Ok(loaded) => {
                if let Some(layer) = loaded.layer {
                    self.store().apply(vec![layer]);
                }
                tracing::info!(
                    parent: &span,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    failures = loaded.report.failures().len(),
                    "Load finished"
                );
                Ok(loaded.report)
            }
            Err(err) => Err(self.rollback(&invocation, err).instrument(span).await),
        };
        metrics::record_operation("load", result.is_ok(), started);
        result
    }

    fn repeat_load(&self, node: &NodeRuntime) -> RuntimeResult<LoadReport> {
        let generation = self.arena().generation(node.id);
        match (self.settings().repeat_load, node.cached_report(generation)) {
            (RepeatLoadPolicy::Idempotent, Some(report)) => {
                tracing::debug!(unit = %node.path, "Already loaded, returning cached report");
                Ok(report)
            }
            (RepeatLoadPolicy::Idempotent, None) => Err(RuntimeError::violation(
                &node.path,
                "load",
                UnitState::Loaded,
                "children changed since the last load; unload first",
            )),
            (RepeatLoadPolicy::Reject, _) => Err(RuntimeError::violation(
                &node.path,
                "load",
                UnitState::Loaded,
                "unit is already loaded",
            )),
        }
    }

    /// Load a unit already marked `Loading`, then its children.
    fn load_node<'a>(
        &'a self,
        node: Arc<NodeRuntime>,
        invocation: &'a Invocation<'a>,
    ) -> BoxFuture<'a, RuntimeResult<Loaded>> {
        async move {
            let generation = self.arena().generation(node.id);

            let dependencies = match self.injector.bind(self, &node).await {
                Ok(deps) => deps,
                Err(err) => {
                    self.fail(&node, &err);
                    return Err(err);
                }
            };

            let instance = node.instance();
            let layer = match self.load_own(&node, &instance, dependencies).await {
                Ok(layer) => layer,
                Err(err) => {
                    self.fail(&node, &err);
                    return Err(err);
                }
            };
            invocation.record(node.clone());

            let mut report = instance
                .leaf()
                .and_then(|leaf| leaf.report())
                .unwrap_or_default();
            let mut level = LoadReport::new();
            let mut nested = LoadReport::new();

            let children = self.arena().children_of(node.id);
            for wave in partition(children, Direction::Ascending) {
                if invocation.cancel.is_cancelled() {
                    return Err(RuntimeError::Cancelled { unit: node.path.clone() });
                }

                let mut candidates = Vec::new();
                for member in wave.members {
                    match member.state.get() {
                        UnitState::Loaded => level.record(label(&member), member.name(), true),
                        UnitState::Unloaded => candidates.push(member),
                        state => {
                            level.record(label(&member), member.name(), false);
                            let err = RuntimeError::violation(
                                &member.path,
                                "load",
                                state,
                                "unit must be reset before it can load again",
                            );
                            if member.spec.required {
                                let err = RuntimeError::RequiredUnitFailed {
                                    unit: member.path.clone(),
                                    source: Box::new(err),
                                };
                                self.fail(&node, &err);
                                return Err(err);
                            }
                            tracing::warn!(unit = %member.path, %state, "Skipping unit that is not unloaded");
                        }
                    }
                }

                let mut runnable = Vec::with_capacity(candidates.len());
                for member in candidates {
                    member.instance();
                    match self.advance(&member, UnitState::Unloaded, UnitState::Loading) {
                        Ok(()) => runnable.push(member),
                        Err(state) => {
                            tracing::warn!(unit = %member.path, %state, "Unit changed state before its wave");
                            level.record(label(&member), member.name(), false);
                        }
                    }
                }

                tracing::debug!(
                    unit = %node.path,
                    priority = wave.priority,
                    members = runnable.len(),
                    "Loading wave"
                );
                let results = join_all(runnable.iter().map(|m| self.load_node(m.clone(), invocation))).await;

                let mut layers = Vec::new();
                let mut fatal = None;
                for (member, result) in runnable.iter().zip(results) {
                    match result {
                        Ok(loaded) => {
                            level.record(label(member), member.name(), true);
                            nested.extend(loaded.report);
                            layers.extend(loaded.layer);
                        }
                        Err(err) => {
                            level.record(label(member), member.name(), false);
                            if err.is_fatal() {
                                fatal.get_or_insert(err);
                            } else if member.spec.required {
                                fatal.get_or_insert(RuntimeError::RequiredUnitFailed {
                                    unit: member.path.clone(),
                                    source: Box::new(err),
                                });
                            } else {
                                tracing::warn!(unit = %member.path, error = %err, "Optional unit failed to load");
                            }
                        }
                    }
                }

                if let Some(err) = fatal {
                    if !matches!(err, RuntimeError::Cancelled { .. }) {
                        self.fail(&node, &err);
                    }
                    return Err(err);
                }
                self.store().apply(layers);
            }

            if invocation.cancel.is_cancelled() {
                return Err(RuntimeError::Cancelled { unit: node.path.clone() });
            }

            self.advance(&node, UnitState::Loading, UnitState::Loaded)
                .map_err(|actual| RuntimeError::violation(&node.path, "load", actual, "state changed"))?;

            report.extend(level);
            report.extend(nested);
            node.cache_report(generation, report.clone());
            Ok(Loaded { report, layer })
        }
        .boxed()
    }

    async fn load_own(
        &self,
        node: &NodeRuntime,
        instance: &Unit,
        dependencies: Dependencies,
    ) -> RuntimeResult<Option<Layer>> {
        match instance {
            Unit::ConfigSource(source) => {
                let tree = self.fetch_source(node, source).await?;
                Ok(Some(Layer::new(node.spec.priority, node.path.clone(), tree)))
            }
            Unit::Service(leaf) | Unit::Middleware(leaf) | Unit::Component(leaf) | Unit::Utility(leaf) => {
                let ctx = UnitContext::new(
                    node.name(),
                    node.path.clone(),
                    dependencies,
                    self.store().slice(node.name()),
                    self.store().snapshot(),
                );
                within(self.settings().unit_timeout, leaf.load(ctx))
                    .await
                    .map_err(|limit| RuntimeError::Timeout {
                        unit: node.path.clone(),
                        millis: limit.as_millis() as u64,
                    })?
                    .map_err(|source| RuntimeError::UnitFailed {
                        unit: node.path.clone(),
                        source,
                    })?;
                Ok(None)
            }
        }
    }

    async fn fetch_source(&self, node: &NodeRuntime, source: &Arc<dyn ConfigSource>) -> RuntimeResult<Value> {
        let settings = self.settings();
        let policy = RetryPolicy {
            attempts: node.spec.retries.saturating_add(1),
            base_delay: settings.retry_base_delay,
            max_delay: settings.retry_max_delay,
        };
        let limit = settings.unit_timeout;

        let result = retry(policy, &node.path, |_| async move {
            within(limit, source.fetch()).await.unwrap_or_else(|elapsed| {
                Err(SourceError::Unavailable(format!(
                    "fetch timed out after {} ms",
                    elapsed.as_millis()
                )))
            })
        })
        .await;

        metrics::record_source_fetch(node.name(), result.is_ok());
        result.map_err(|source| RuntimeError::ConfigSourceUnavailable {
            source_name: node.name().to_string(),
            source,
        })
    }

    async fn unload_claimed(&self, id: NodeId) -> RuntimeResult<LoadReport> {
        let node = self.runtime(id)?;
        let state = node.state.get();
        if state != UnitState::Loaded {
            return Err(RuntimeError::violation(&node.path, "unload", state, "unit is not loaded"));
        }

        let span = tracing::info_span!("unload", invocation = %Uuid::new_v4(), unit = %node.path);
        let started = Instant::now();
        let key = layer_key(&node);

        let result: RuntimeResult<LoadReport> = async {
            tracing::info!("Unload started");
            self.advance(&node, UnitState::Loaded, UnitState::Unloading)
                .map_err(|actual| RuntimeError::violation(&node.path, "unload", actual, "state changed"))?;
            self.unload_node(node.clone()).await
        }
        .instrument(span.clone())
        .await;

        if let Some(key) = key {
            self.store().remove(&[key]);
        }
        match &result {
            Ok(report) => tracing::info!(
                parent: &span,
                elapsed_ms = started.elapsed().as_millis() as u64,
                failures = report.failures().len(),
                "Unload finished"
            ),
            Err(err) => tracing::error!(parent: &span, error = %err, "Unload failed"),
        }
        metrics::record_operation("unload", result.is_ok(), started);
        result
    }

    /// Unload a unit already marked `Unloading`: children first, then itself.
    fn unload_node(&self, node: Arc<NodeRuntime>) -> BoxFuture<'_, RuntimeResult<LoadReport>> {
        async move {
            let mut level = LoadReport::new();
            let mut nested = LoadReport::new();

            let children = self.arena().children_of(node.id);
            for wave in partition(children, Direction::Descending) {
                let mut runnable = Vec::new();
                for member in wave.members {
                    match member.state.get() {
                        UnitState::Loaded => {
                            if self.advance(&member, UnitState::Loaded, UnitState::Unloading).is_ok() {
                                runnable.push(member);
                            }
                        }
                        UnitState::Failed => {
                            member.discard();
                            if self.advance(&member, UnitState::Failed, UnitState::Unloaded).is_ok() {
                                tracing::debug!(unit = %member.path, "Reset failed unit during unload");
                            }
                        }
                        _ => {}
                    }
                }

                tracing::debug!(
                    unit = %node.path,
                    priority = wave.priority,
                    members = runnable.len(),
                    "Unloading wave"
                );
                let keys: Vec<LayerKey> = runnable.iter().filter_map(|m| layer_key(m)).collect();
                let results = join_all(runnable.iter().map(|m| self.unload_node(m.clone()))).await;

                for (member, result) in runnable.iter().zip(results) {
                    match result {
                        Ok(report) => {
                            level.record(label(member), member.name(), true);
                            nested.extend(report);
                        }
                        Err(err) => {
                            level.record(label(member), member.name(), false);
                            tracing::warn!(unit = %member.path, error = %err, "Unit failed to unload");
                        }
                    }
                }
                self.store().remove(&keys);
            }

            let own = self.unload_own(&node).await;
            let mut report = node
                .existing_instance()
                .and_then(|unit| unit.leaf().and_then(|leaf| leaf.report()))
                .unwrap_or_default();
            node.discard();

            match own {
                Ok(()) => {
                    self.advance(&node, UnitState::Unloading, UnitState::Unloaded)
                        .map_err(|actual| RuntimeError::violation(&node.path, "unload", actual, "state changed"))?;
                }
                Err(err) => {
                    let _ = self.advance(&node, UnitState::Unloading, UnitState::Failed);
                    return Err(err);
                }
            }

            report.extend(level);
            report.extend(nested);
            Ok(report)
        }
        .boxed()
    }

    async fn unload_own(&self, node: &NodeRuntime) -> RuntimeResult<()> {
        let Some(instance) = node.existing_instance() else {
            return Ok(());
        };
        match instance {
            Unit::ConfigSource(source) => {
                source
                    .release()
                    .await
                    .map_err(|source| RuntimeError::ConfigSourceUnavailable {
                        source_name: node.name().to_string(),
                        source,
                    })
            }
            Unit::Service(leaf) | Unit::Middleware(leaf) | Unit::Component(leaf) | Unit::Utility(leaf) => {
                within(self.settings().unit_timeout, leaf.unload())
                    .await
                    .map_err(|limit| RuntimeError::Timeout {
                        unit: node.path.clone(),
                        millis: limit.as_millis() as u64,
                    })?
                    .map_err(|source| RuntimeError::UnitFailed {
                        unit: node.path.clone(),
                        source,
                    })
            }
        }
    }

    /// Unload everything the invocation loaded, newest first.
    async fn rollback(&self, invocation: &Invocation<'_>, cause: RuntimeError) -> RuntimeError {
        let journal = invocation.take_journal();
        let cancelled = matches!(cause, RuntimeError::Cancelled { .. });
        tracing::warn!(units = journal.len(), error = %cause, "Load aborted, rolling back");
        metrics::record_rollback(journal.len());

        let mut failures = Vec::new();
        let mut removed = Vec::new();
        for node in journal.into_iter().rev() {
            removed.extend(layer_key(&node));
            if node.state.get() == UnitState::Loaded {
                let _ = self.advance(&node, UnitState::Loaded, UnitState::Unloading);
            }

            let own = self.unload_own(&node).await;
            node.discard();
            if let Err(err) = &own {
                failures.push(format!("{}: {}", node.path, err));
            }

            match (node.state.get(), own.is_ok()) {
                (UnitState::Unloading, true) => {
                    let _ = self.advance(&node, UnitState::Unloading, UnitState::Unloaded);
                }
                (UnitState::Unloading, false) => {
                    let _ = self.advance(&node, UnitState::Unloading, UnitState::Failed);
                }
                (UnitState::Loading, _) => {
                    let next = if cancelled && own.is_ok() {
                        UnitState::Unloaded
                    } else {
                        UnitState::Failed
                    };
                    let _ = self.advance(&node, UnitState::Loading, next);
                }
                _ => {}
            }
        }
        self.store().remove(&removed);

        if failures.is_empty() {
            cause
        } else {
            tracing::error!(failures = failures.len(), "Rollback incomplete");
            RuntimeError::RollbackFailed {
                cause: Box::new(cause),
                failures,
            }
        }
    }

    fn fail(&self, node: &NodeRuntime, err: &RuntimeError) {
        if self.advance(node, UnitState::Loading, UnitState::Failed).is_ok() {
            tracing::warn!(unit = %node.path, error = %err, "Unit failed");
        }
    }

    /// Checked state change with logging and metrics.
    fn advance(&self, node: &NodeRuntime, from: UnitState, to: UnitState) -> Result<(), UnitState> {
        node.state.transition(from, to)?;
        let kind = node.kind().map(|k| k.as_str()).unwrap_or("unbuilt");
        tracing::trace!(unit = %node.path, %from, %to, "Transition");
        metrics::record_transition(kind, to);
        Ok(())
    }
}
