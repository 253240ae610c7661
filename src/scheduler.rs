//! Running single stages as externally scheduled tasks
//!
//! A workflow scheduler (Airflow-style: DAGs of tasks with an execution date)
//! invokes one stage per task. [`ScheduledStage`] builds a fresh context from the
//! scheduler's [`TaskInstance`], runs the stage and turns a `FAIL` result into an
//! error the scheduler treats as a task failure.

use crate::error::{EtlError, EtlResult};
use crate::logger::RunLogger;
use crate::params::Parameters;
use crate::pipeline::{PipelineContext, Stage};
use crate::schema::SchemaRecord;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;

pub const UNKNOWN_DAG: &str = "unknown_dag";
pub const UNKNOWN_TASK: &str = "unknown_task";

/// Execution metadata handed over by the scheduler
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskInstance {
    pub dag_id: Option<String>,
    pub task_id: Option<String>,
    pub execution_date: Option<DateTime<Utc>>,
    /// Parameter file to load into the context
    pub configuration_file: Option<PathBuf>,
}

impl TaskInstance {
    pub fn new(dag_id: impl Into<String>, task_id: impl Into<String>) -> Self {
        Self {
            dag_id: Some(dag_id.into()),
            task_id: Some(task_id.into()),
            ..Self::default()
        }
    }

    pub fn with_execution_date(mut self, execution_date: DateTime<Utc>) -> Self {
        self.execution_date = Some(execution_date);
        self
    }

    pub fn with_configuration_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.configuration_file = Some(path.into());
        self
    }

    pub fn dag_id(&self) -> &str {
        self.dag_id.as_deref().unwrap_or(UNKNOWN_DAG)
    }

    pub fn task_id(&self) -> &str {
        self.task_id.as_deref().unwrap_or(UNKNOWN_TASK)
    }
}

/// Builds the run context for a scheduled task
pub type ContextFactory<T> =
    Box<dyn Fn(&TaskInstance) -> EtlResult<PipelineContext<T>> + Send + Sync>;

/// Default context factory
///
/// The logger is named `<dag_id>.<task_id>`, parameters come from the task's
/// configuration file (empty when none is given) and the task identity is
/// recorded in the context metadata.
pub fn context_from_task<T: SchemaRecord>(task: &TaskInstance) -> EtlResult<PipelineContext<T>> {
    let params = match &task.configuration_file {
        Some(path) => Parameters::from_file(path)?,
        None => Parameters::new(),
    };
    let execution_date = task.execution_date.unwrap_or_else(Utc::now);
    let logger = Arc::new(RunLogger::new(format!("{}.{}", task.dag_id(), task.task_id())));

    let mut context = PipelineContext::new(params).with_logger(logger);
    context.set_metadata("dag_id", task.dag_id())?;
    context.set_metadata("task_id", task.task_id())?;
    context.set_metadata("execution_date", execution_date.to_rfc3339())?;
    Ok(context)
}

/// A stage packaged as a scheduler task
pub struct ScheduledStage<T: SchemaRecord, S: Stage<T>> {
    stage: S,
    context_factory: ContextFactory<T>,
}

impl<T: SchemaRecord + 'static, S: Stage<T>> ScheduledStage<T, S> {
    pub fn new(stage: S) -> Self {
        Self {
            stage,
            context_factory: Box::new(context_from_task::<T>),
        }
    }

    /// Replace the context factory, e.g. to attach storage
    pub fn with_context_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(&TaskInstance) -> EtlResult<PipelineContext<T>> + Send + Sync + 'static,
    {
        self.context_factory = Box::new(factory);
        self
    }

    /// Task identifier registered with the scheduler
    pub fn task_id(&self) -> &str {
        self.stage.name()
    }

    pub fn stage(&self) -> &S {
        &self.stage
    }

    /// Run the stage once for a task instance
    ///
    /// Returns the stage message unless the stage reports `FAIL`.
    pub fn execute(&self, task: &TaskInstance) -> EtlResult<String> {
        let mut context = (self.context_factory)(task)?;
        tracing::info!(
            dag_id = %task.dag_id(),
            task_id = %self.task_id(),
            run_id = %context.run_id(),
            "executing scheduled stage"
        );

        let outcome = self.stage.run(&mut context);
        if outcome.result.is_failure() {
            context
                .logger()
                .error(&format!("Stage {} failed: {}", self.task_id(), outcome.message));
            return Err(EtlError::StageFailed {
                stage: self.task_id().to_string(),
                message: outcome.message,
            });
        }

        context.logger().info(&format!(
            "Stage {} -> {}: {}",
            self.task_id(),
            outcome.result,
            outcome.message
        ));
        Ok(outcome.message)
    }
}
