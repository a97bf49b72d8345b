//! Structured run events.
//!
//! The pipeline only produces events; formatting and shipping them is the
//! sink's business. [`LogEventSink`] forwards to the `log` facade.

use dl_core::LoadMode;
use dl_meta::{RejectPhase, RunStatus};
use serde::Serialize;
use std::fmt;
use std::sync::Mutex;

/// Run phases in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Extract,
    Normalize,
    QualityGate,
    Merge,
    Load,
    Checkpoint,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Extract => "extract",
            Phase::Normalize => "normalize",
            Phase::QualityGate => "quality_gate",
            Phase::Merge => "merge",
            Phase::Load => "load",
            Phase::Checkpoint => "checkpoint",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    RunStarted {
        run_id: String,
        entity: String,
        mode: LoadMode,
    },
    PhaseStarted {
        run_id: String,
        entity: String,
        phase: Phase,
    },
    /// `records` is the phase's output count
    PhaseFinished {
        run_id: String,
        entity: String,
        phase: Phase,
        records: u64,
    },
    RecordRejected {
        run_id: String,
        entity: String,
        phase: RejectPhase,
        source_key: Option<String>,
        error: String,
    },
    QualityResult {
        run_id: String,
        entity: String,
        rule: String,
        score: f64,
        passed: bool,
        gates: bool,
    },
    RunFinished {
        run_id: String,
        entity: String,
        status: RunStatus,
        error: Option<String>,
    },
}

/// Consumer of pipeline events
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &PipelineEvent);
}

/// Forwards events to the `log` facade
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEventSink;

impl EventSink for LogEventSink {
    fn emit(&self, event: &PipelineEvent) {
        match event {
            PipelineEvent::RunStarted { run_id, entity, mode } => {
                log::info!("Run {run_id} started for {entity} ({mode})")
            }
            PipelineEvent::PhaseStarted { entity, phase, .. } => {
                log::debug!("{entity}: {phase} started")
            }
            PipelineEvent::PhaseFinished {
                entity,
                phase,
                records,
                ..
            } => log::debug!("{entity}: {phase} finished ({records} records)"),
            PipelineEvent::RecordRejected {
                entity,
                phase,
                source_key,
                error,
                ..
            } => log::warn!(
                "{entity}: record {} rejected during {phase}: {error}",
                source_key.as_deref().unwrap_or("<unknown>")
            ),
            PipelineEvent::QualityResult {
                entity,
                rule,
                score,
                passed,
                ..
            } => {
                if *passed {
                    log::debug!("{entity}: rule {rule} scored {score:.2}")
                } else {
                    log::warn!("{entity}: rule {rule} failed with score {score:.2}")
                }
            }
            PipelineEvent::RunFinished {
                run_id,
                entity,
                status,
                error,
            } => match error {
                Some(error) => log::error!("Run {run_id} for {entity} {status}: {error}"),
                None => log::info!("Run {run_id} for {entity} {status}"),
            },
        }
    }
}

/// Keeps every event in memory
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: Mutex<Vec<PipelineEvent>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events seen so far
    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl EventSink for CollectingSink {
    fn emit(&self, event: &PipelineEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}
