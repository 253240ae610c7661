//! Phase-ordered ETL pipelines with schema-typed storage
//!
//! - [`pipeline`]: the CONNECT -> DUMP -> PROCESS -> STORE engine and its run context
//! - [`storage`]: partitioned CSV and SQLite table backends behind [`SchemaStorage`]
//! - [`scheduler`]: running a single stage as an externally scheduled task
//! - [`params`], [`logger`], [`error`]: configuration, run logging and the error type

pub mod error;
pub mod logger;
pub mod params;
pub mod pipeline;
pub mod scheduler;
pub mod schema;
pub mod storage;

pub use error::{EtlError, EtlResult};
pub use logger::{init_tracing, LogLevel, RunLogger};
pub use params::Parameters;
pub use pipeline::{
    Phase, Pipeline, PipelineBuilder, PipelineContext, PipelineReport, Stage, StageOutcome,
    StageRecord, StageResult,
};
pub use scheduler::{ScheduledStage, TaskInstance};
pub use schema::{Batch, Filters, Row, SchemaRecord, TabularView};
pub use storage::{PartitionedFileStorage, SchemaStorage, StorageFactory, TableStorage};
