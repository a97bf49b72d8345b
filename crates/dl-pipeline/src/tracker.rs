//! Run lifecycle: `running` to `succeeded` or `failed`, once.

use crate::error::PipelineResult;
use chrono::{SubsecRound, Utc};
use dl_core::{EntityName, LoadMode};
use dl_meta::{MetaDb, NewRun, RunCounts, RunRecord, RunStatus};
use std::sync::Arc;

/// Creates and closes run rows for one pipeline configuration
#[derive(Clone)]
pub struct RunTracker {
    meta: Arc<MetaDb>,
    pipeline_name: String,
    config_checksum: String,
}

impl RunTracker {
    pub fn new(meta: Arc<MetaDb>, pipeline_name: &str, config_checksum: &str) -> Self {
        Self {
            meta,
            pipeline_name: pipeline_name.to_string(),
            config_checksum: config_checksum.to_string(),
        }
    }

    /// Open a run; fails with `RunAlreadyInProgress` if the entity has one
    pub fn start(&self, entity: &EntityName, mode: LoadMode) -> PipelineResult<RunRecord> {
        let run = NewRun {
            run_id: uuid::Uuid::new_v4().to_string(),
            pipeline_name: self.pipeline_name.clone(),
            entity: entity.clone(),
            load_mode: mode,
            config_checksum: self.config_checksum.clone(),
            started_at: Utc::now().trunc_subsecs(6),
        };
        Ok(self.meta.begin_run(&run)?)
    }

    /// Persist counts at a phase boundary
    pub fn progress(
        &self,
        run_id: &str,
        counts: &RunCounts,
        quality_score: Option<f64>,
    ) -> PipelineResult<()> {
        Ok(self.meta.update_run_counts(run_id, counts, quality_score)?)
    }

    pub fn succeed(
        &self,
        run_id: &str,
        counts: &RunCounts,
        quality_score: Option<f64>,
    ) -> PipelineResult<RunRecord> {
        self.close(run_id, RunStatus::Succeeded, counts, quality_score, None)
    }

    pub fn fail(
        &self,
        run_id: &str,
        counts: &RunCounts,
        quality_score: Option<f64>,
        error: &str,
    ) -> PipelineResult<RunRecord> {
        self.close(run_id, RunStatus::Failed, counts, quality_score, Some(error))
    }

    /// Mark a run left `running` by a crashed process as failed.
    ///
    /// Counts recorded at its last phase boundary are kept.
    pub fn abort_run(&self, run_id: &str, reason: &str) -> PipelineResult<RunRecord> {
        let run = self
            .meta
            .get_run(run_id)?
            .ok_or_else(|| dl_meta::MetaError::RunNotFound(run_id.to_string()))?;
        log::warn!("Aborting run {run_id} for {}: {reason}", run.entity);
        self.close(
            run_id,
            RunStatus::Failed,
            &run.counts,
            run.quality_score,
            Some(&format!("aborted: {reason}")),
        )
    }

    pub fn recent_runs(&self, limit: usize) -> PipelineResult<Vec<RunRecord>> {
        Ok(self.meta.recent_runs(limit)?)
    }

    pub fn get_run(&self, run_id: &str) -> PipelineResult<Option<RunRecord>> {
        Ok(self.meta.get_run(run_id)?)
    }

    fn close(
        &self,
        run_id: &str,
        status: RunStatus,
        counts: &RunCounts,
        quality_score: Option<f64>,
        error: Option<&str>,
    ) -> PipelineResult<RunRecord> {
        let finished_at = Utc::now().trunc_subsecs(6);
        Ok(self
            .meta
            .finish_run(run_id, status, counts, quality_score, error, finished_at)?)
    }
}
