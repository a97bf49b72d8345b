//! dl-pipeline - Run orchestration for dimload
//!
//! Drives one run per entity through extract, normalize, quality gate,
//! merge or fact load and checkpoint advance, recording the run lifecycle,
//! quality results and rejected records in the meta database.

pub mod cancel;
pub mod error;
pub mod events;
pub mod pipeline;
pub mod tracker;

pub use cancel::CancellationFlag;
pub use error::{PipelineError, PipelineResult};
pub use events::{CollectingSink, EventSink, LogEventSink, Phase, PipelineEvent};
pub use pipeline::{Pipeline, RunReport};
pub use tracker::RunTracker;
