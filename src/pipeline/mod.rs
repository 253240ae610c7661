//! Phase-ordered pipeline engine
//!
//! A pipeline groups stages under the fixed phases CONNECT, DUMP, PROCESS and
//! STORE. Phases run in that order; stages inside a phase run one after the
//! other against a shared [`PipelineContext`]. Each stage returns a tri-state
//! [`StageResult`] and a message, and the run produces a [`PipelineReport`].
//!
//! # Example
//! ```
//! use etl_pipeline::params::Parameters;
//! use etl_pipeline::pipeline::{Phase, Pipeline, PipelineContext, Stage, StageOutcome};
//!
//! struct Download;
//!
//! impl Stage<serde_json::Value> for Download {
//!     fn run(&self, context: &mut PipelineContext<serde_json::Value>) -> StageOutcome {
//!         context.add_artifact("raw", vec!["a,b", "1,2"]);
//!         StageOutcome::success("downloaded 1 file")
//!     }
//!
//!     fn name(&self) -> &str {
//!         "Download"
//!     }
//! }
//!
//! let mut pipeline = Pipeline::builder()
//!     .add_stage(Phase::Dump, Download)
//!     .build(PipelineContext::new(Parameters::new()));
//!
//! let report = pipeline.run(true);
//! assert!(report.succeeded());
//! assert!(pipeline.context().has_artifact("raw"));
//! ```

pub mod context;
pub mod core;
pub mod executor;

// Re-export main types
pub use context::PipelineContext;
pub use core::{
    Phase, PipelineReport, Stage, StageOutcome, StageRecord, StageResult, NO_STAGE_MARKER,
};
pub use executor::{Pipeline, PipelineBuilder};
