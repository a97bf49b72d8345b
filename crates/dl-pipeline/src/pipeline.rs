//! Per-entity run orchestration.
//!
//! A run moves through extract, normalize, quality gate, merge or load and
//! checkpoint in that order. Cancellation is observed between phases only;
//! each write phase is one warehouse transaction.

use crate::cancel::CancellationFlag;
use crate::error::{PipelineError, PipelineResult};
use crate::events::{EventSink, LogEventSink, Phase, PipelineEvent};
use crate::tracker::RunTracker;
use chrono::{DateTime, SubsecRound, Utc};
use dl_core::{
    merge_dimension, normalize_batch, resolve_facts, Config, DimensionKeys, EntityDescriptor,
    FactError, LoadMode, NormalizedRecord,
};
use dl_db::{Extractor, Warehouse};
use dl_meta::{
    Advance, Checkpoint, CheckpointStore, MetaDb, RejectPhase, Rejection, RunCounts, RunRecord,
    RunStatus,
};
use dl_quality::{QualityReport, QualityScorer};
use futures::future::join_all;
use std::sync::{Arc, Mutex};

/// Outcome of one entity run
#[derive(Debug)]
pub struct RunReport {
    /// The closed run row
    pub run: RunRecord,
    pub quality: Option<QualityReport>,
    /// Why the run failed, if it did
    pub error: Option<PipelineError>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.run.status == RunStatus::Succeeded
    }
}

/// State threaded through the phases of one run
struct RunState<'a> {
    run_id: String,
    entity: &'a EntityDescriptor,
    mode: LoadMode,
    counts: RunCounts,
    quality: Option<QualityReport>,
}

impl RunState<'_> {
    fn quality_score(&self) -> Option<f64> {
        self.quality.as_ref().map(|q| q.score)
    }
}

/// Runs entities of one configuration against a warehouse and meta database
pub struct Pipeline {
    config: Arc<Config>,
    warehouse: Arc<dyn Warehouse>,
    extractor: Arc<dyn Extractor>,
    meta: Arc<MetaDb>,
    checkpoints: CheckpointStore,
    tracker: RunTracker,
    events: Arc<dyn EventSink>,
    cancel: CancellationFlag,
    /// Surrogate keys produced by dimension merges in this session
    session_keys: Mutex<DimensionKeys>,
}

impl Pipeline {
    pub fn new(
        config: Config,
        warehouse: Arc<dyn Warehouse>,
        extractor: Arc<dyn Extractor>,
        meta: Arc<MetaDb>,
    ) -> PipelineResult<Self> {
        let checksum = config.checksum()?;
        let checkpoints =
            CheckpointStore::new(Arc::clone(&meta), config.checkpoint.default_timestamp);
        let tracker = RunTracker::new(Arc::clone(&meta), &config.name, &checksum);
        Ok(Self {
            config: Arc::new(config),
            warehouse,
            extractor,
            meta,
            checkpoints,
            tracker,
            events: Arc::new(LogEventSink),
            cancel: CancellationFlag::new(),
            session_keys: Mutex::new(DimensionKeys::new()),
        })
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn tracker(&self) -> &RunTracker {
        &self.tracker
    }

    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    pub fn cancellation(&self) -> &CancellationFlag {
        &self.cancel
    }

    /// Run `names` (every entity when empty): dimensions concurrently, then
    /// facts concurrently, so facts resolve against this session's merges.
    pub async fn run_many(
        &self,
        names: &[String],
        mode: LoadMode,
    ) -> PipelineResult<Vec<PipelineResult<RunReport>>> {
        for name in names {
            self.config.require_entity(name)?;
        }
        let selected =
            |e: &&EntityDescriptor| names.is_empty() || names.iter().any(|n| e.name == n.as_str());

        let dimensions: Vec<&EntityDescriptor> =
            self.config.dimensions().filter(selected).collect();
        let facts: Vec<&EntityDescriptor> = self.config.facts().filter(selected).collect();

        let mut reports =
            join_all(dimensions.iter().map(|e| self.run_entity(&e.name, mode))).await;
        reports.extend(join_all(facts.iter().map(|e| self.run_entity(&e.name, mode))).await);
        Ok(reports)
    }

    /// Run one entity end to end.
    ///
    /// Errors before the run row exists (unknown entity, a run already in
    /// progress) are returned as `Err`; failures inside the run close it as
    /// `failed` and are reported in [`RunReport::error`].
    pub async fn run_entity(&self, name: &str, mode: LoadMode) -> PipelineResult<RunReport> {
        let entity = self.config.require_entity(name)?;
        let run = self.tracker.start(&entity.name, mode)?;
        self.emit(PipelineEvent::RunStarted {
            run_id: run.run_id.clone(),
            entity: entity.name.to_string(),
            mode,
        });

        let mut state = RunState {
            run_id: run.run_id.clone(),
            entity,
            mode,
            counts: RunCounts::default(),
            quality: None,
        };
        let outcome = self.execute(&mut state).await;

        let closed = match &outcome {
            Ok(()) => self
                .tracker
                .succeed(&state.run_id, &state.counts, state.quality_score()),
            Err(err) => self.tracker.fail(
                &state.run_id,
                &state.counts,
                state.quality_score(),
                &err.to_string(),
            ),
        };
        let closed = match closed {
            Ok(run) => run,
            Err(close_err) => {
                self.close_failed(&state, outcome.as_ref().err(), &close_err);
                return Err(close_err);
            }
        };

        self.emit(PipelineEvent::RunFinished {
            run_id: closed.run_id.clone(),
            entity: entity.name.to_string(),
            status: closed.status,
            error: closed.error_message.clone(),
        });
        Ok(RunReport {
            run: closed,
            quality: state.quality,
            error: outcome.err(),
        })
    }

    async fn execute(&self, state: &mut RunState<'_>) -> PipelineResult<()> {
        let entity = state.entity;

        // Extract
        self.cancel.check()?;
        self.phase_started(state, Phase::Extract);
        let start = match state.mode {
            LoadMode::Full => None,
            LoadMode::Incremental => self.checkpoints.get(entity.name.as_str())?,
        };
        let bounds = self.checkpoints.get_bounds(entity.name.as_str(), state.mode)?;
        self.warehouse.ensure_table(entity).await?;
        let raw = self.extractor.extract(entity, &bounds).await?;
        state.counts.extracted = raw.len() as u64;
        self.phase_finished(state, Phase::Extract, state.counts.extracted);

        // Normalize
        self.cancel.check()?;
        self.phase_started(state, Phase::Normalize);
        let batch = normalize_batch(&raw, entity, now());
        let rejections: Vec<Rejection> = batch
            .rejected
            .iter()
            .map(|r| Rejection {
                entity: entity.name.to_string(),
                phase: RejectPhase::Normalize,
                source_key: r.source_key.clone(),
                error_message: r.error.to_string(),
                record_json: r.raw.to_json(),
            })
            .collect();
        self.reject(state, &rejections)?;
        state.counts.normalized = batch.records.len() as u64;
        state.counts.rejected = batch.rejected.len() as u64;
        self.tracker.progress(&state.run_id, &state.counts, None)?;
        self.phase_finished(state, Phase::Normalize, state.counts.normalized);

        // Quality gate
        self.cancel.check()?;
        self.quality_gate(state, &batch.records)?;

        // Merge or load
        self.cancel.check()?;
        let loaded = if entity.is_dimension() {
            self.merge(state, &batch.records).await?
        } else {
            self.load(state, &batch.records).await?
        };
        self.tracker
            .progress(&state.run_id, &state.counts, state.quality_score())?;

        // Checkpoint
        self.cancel.check()?;
        self.advance_checkpoint(state, start.as_ref(), &batch.records, loaded)?;
        Ok(())
    }

    fn quality_gate(
        &self,
        state: &mut RunState<'_>,
        records: &[NormalizedRecord],
    ) -> PipelineResult<()> {
        self.phase_started(state, Phase::QualityGate);
        let scorer = QualityScorer::new(state.entity, &self.config.quality)?;
        let report = scorer.score(records);

        self.meta
            .record_quality_results(&state.run_id, &report.results, now())?;
        for result in &report.results {
            self.emit(PipelineEvent::QualityResult {
                run_id: state.run_id.clone(),
                entity: state.entity.name.to_string(),
                rule: result.rule.to_string(),
                score: result.score,
                passed: result.passed,
                gates: result.gates(),
            });
        }

        let passed = report.passed();
        let failure = (!passed).then(|| PipelineError::QualityGateFailure {
            entity: state.entity.name.to_string(),
            score: report.score,
            min_score: report.min_score,
            failed_rules: report
                .failed_rules()
                .filter(|r| r.gates())
                .map(|r| r.rule.to_string())
                .collect(),
        });
        state.quality = Some(report);
        match failure {
            Some(err) => Err(err),
            None => {
                self.phase_finished(state, Phase::QualityGate, records.len() as u64);
                Ok(())
            }
        }
    }

    /// Returns the number of records merged
    async fn merge(
        &self,
        state: &mut RunState<'_>,
        records: &[NormalizedRecord],
    ) -> PipelineResult<u64> {
        let entity = state.entity;
        self.phase_started(state, Phase::Merge);
        let snapshot = self.warehouse.dimension_snapshot(entity).await?;
        let as_of = now();
        let plan = merge_dimension(entity, &snapshot, records, as_of)?;
        self.warehouse.apply_merge(entity, &plan, as_of).await?;
        self.session_keys
            .lock()
            .map_err(|_| PipelineError::LockPoisoned)?
            .record_merge(&plan);

        state.counts.inserted = plan.inserted() as u64;
        state.counts.updated = plan.updated() as u64;
        state.counts.expired = plan.expired() as u64;
        state.counts.unchanged = plan.unchanged as u64;
        self.phase_finished(state, Phase::Merge, plan.ops.len() as u64);
        Ok(records.len() as u64)
    }

    /// Returns the number of fact rows resolved and written
    async fn load(
        &self,
        state: &mut RunState<'_>,
        records: &[NormalizedRecord],
    ) -> PipelineResult<u64> {
        let entity = state.entity;
        self.phase_started(state, Phase::Load);

        let mut keys = self
            .session_keys
            .lock()
            .map_err(|_| PipelineError::LockPoisoned)?
            .clone();
        let mut dimensions: Vec<&EntityDescriptor> = Vec::new();
        for reference in &entity.references {
            let dimension = self.config.require_entity(&reference.dimension)?;
            if dimensions.iter().any(|d| d.name == dimension.name) {
                continue;
            }
            self.warehouse.ensure_table(dimension).await?;
            let persisted = self.warehouse.current_keys(dimension).await?;
            keys.set_persisted(dimension.name.clone(), persisted);
            dimensions.push(dimension);
        }

        let resolution = resolve_facts(entity, records, &keys);
        let rejections: Vec<Rejection> = resolution
            .failures
            .iter()
            .map(|f| Rejection {
                entity: entity.name.to_string(),
                phase: RejectPhase::Resolve,
                source_key: Some(f.record.source_key.to_string()),
                error_message: f.error.to_string(),
                record_json: serde_json::to_string(&f.record.attributes)
                    .unwrap_or_else(|_| "{}".to_string()),
            })
            .collect();
        self.reject(state, &rejections)?;
        state.counts.unresolved = resolution.unresolved() as u64;
        state.counts.rejected += resolution
            .failures
            .iter()
            .filter(|f| !matches!(f.error, FactError::UnresolvedReference { .. }))
            .count() as u64;

        let summary = self
            .warehouse
            .write_facts(entity, &dimensions, &resolution.rows, now())
            .await?;
        state.counts.facts_written = summary.inserted as u64;
        state.counts.duplicates = summary.duplicates as u64;
        self.phase_finished(state, Phase::Load, state.counts.facts_written);
        Ok(resolution.resolved() as u64)
    }

    fn advance_checkpoint(
        &self,
        state: &RunState<'_>,
        start: Option<&Checkpoint>,
        records: &[NormalizedRecord],
        loaded: u64,
    ) -> PipelineResult<()> {
        let entity = state.entity;
        if entity.watermark_field.is_none() {
            return Ok(());
        }
        let Some(high) = records.iter().map(NormalizedRecord::watermark).max() else {
            log::debug!("{}: empty batch, checkpoint unchanged", entity.name);
            return Ok(());
        };

        self.phase_started(state, Phase::Checkpoint);
        self.checkpoints.advance(
            Advance {
                entity: &entity.name,
                mode: state.mode,
                expected: start.map(|c| &c.watermark),
                watermark: high,
                records_loaded: loaded,
                run_id: &state.run_id,
            },
            now(),
        )?;
        self.phase_finished(state, Phase::Checkpoint, loaded);
        Ok(())
    }

    fn reject(&self, state: &RunState<'_>, rejections: &[Rejection]) -> PipelineResult<()> {
        self.meta
            .record_rejections(&state.run_id, rejections, now())?;
        for rejection in rejections {
            self.emit(PipelineEvent::RecordRejected {
                run_id: state.run_id.clone(),
                entity: rejection.entity.clone(),
                phase: rejection.phase,
                source_key: rejection.source_key.clone(),
                error: rejection.error_message.clone(),
            });
        }
        Ok(())
    }

    /// Last attempt at closing a run whose outcome could not be recorded,
    /// so the entity is not left blocked behind a `running` row
    fn close_failed(
        &self,
        state: &RunState<'_>,
        outcome: Option<&PipelineError>,
        close_err: &PipelineError,
    ) {
        log::error!(
            "Failed to close run {} for {}: {}",
            state.run_id,
            state.entity.name,
            close_err
        );
        let message = match outcome {
            Some(err) => format!("{err}; closing the run failed: {close_err}"),
            None => format!("closing the run failed: {close_err}"),
        };
        if let Err(err) =
            self.tracker
                .fail(&state.run_id, &state.counts, state.quality_score(), &message)
        {
            log::error!(
                "Run {} may be left running, abort it with `dl runs abort`: {}",
                state.run_id,
                err
            );
        }
    }

    fn emit(&self, event: PipelineEvent) {
        self.events.emit(&event);
    }

    fn phase_started(&self, state: &RunState<'_>, phase: Phase) {
        self.emit(PipelineEvent::PhaseStarted {
            run_id: state.run_id.clone(),
            entity: state.entity.name.to_string(),
            phase,
        });
    }

    fn phase_finished(&self, state: &RunState<'_>, phase: Phase, records: u64) {
        self.emit(PipelineEvent::PhaseFinished {
            run_id: state.run_id.clone(),
            entity: state.entity.name.to_string(),
            phase,
            records,
        });
    }
}

/// Wall clock at the warehouse's microsecond precision
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}
