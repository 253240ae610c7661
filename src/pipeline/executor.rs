use super::context::PipelineContext;
use super::core::{Phase, PipelineReport, Stage, StageRecord, StageResult};
use crate::schema::SchemaRecord;
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

/// Phase-ordered pipeline executor
///
/// Phases always run in [`Phase::ALL`] order; stages within a phase run
/// sequentially in registration order against the pipeline's context.
///
/// # Example
/// ```
/// use etl_pipeline::params::Parameters;
/// use etl_pipeline::pipeline::{Phase, Pipeline, PipelineContext, Stage, StageOutcome};
///
/// struct Hello;
///
/// impl Stage<serde_json::Value> for Hello {
///     fn run(&self, _context: &mut PipelineContext<serde_json::Value>) -> StageOutcome {
///         StageOutcome::success("hello")
///     }
///
///     fn name(&self) -> &str {
///         "Hello"
///     }
/// }
///
/// let mut pipeline = Pipeline::builder()
///     .add_stage(Phase::Connect, Hello)
///     .build(PipelineContext::new(Parameters::new()));
///
/// let report = pipeline.run(true);
/// assert!(report.succeeded());
/// assert_eq!(report.phases.len(), 4);
/// ```
pub struct Pipeline<T: SchemaRecord> {
    stages: BTreeMap<Phase, Vec<Box<dyn Stage<T>>>>,
    context: PipelineContext<T>,
}

impl<T: SchemaRecord> Pipeline<T> {
    /// Create a pipeline from a phase -> stages mapping
    pub fn new(stages: HashMap<Phase, Vec<Box<dyn Stage<T>>>>, context: PipelineContext<T>) -> Self {
        Self {
            stages: stages.into_iter().collect(),
            context,
        }
    }

    pub fn builder() -> PipelineBuilder<T> {
        PipelineBuilder::new()
    }

    /// Number of registered stages across all phases
    pub fn stage_count(&self) -> usize {
        self.stages.values().map(Vec::len).sum()
    }

    /// Names of the stages registered for a phase, in execution order
    pub fn stage_names(&self, phase: Phase) -> Vec<&str> {
        self.stages
            .get(&phase)
            .map(|stages| stages.iter().map(|s| s.name()).collect())
            .unwrap_or_default()
    }

    pub fn context(&self) -> &PipelineContext<T> {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut PipelineContext<T> {
        &mut self.context
    }

    pub fn into_context(self) -> PipelineContext<T> {
        self.context
    }

    /// Run every phase and collect the per-stage results
    ///
    /// With `stop_on_fail`, the first `Fail` ends the run: the report then
    /// holds the phases up to and including the failing stage only. Without it
    /// every registered stage is attempted.
    pub fn run(&mut self, stop_on_fail: bool) -> PipelineReport {
        let logger = self.context.logger_handle();
        let run_id = self.context.run_id().to_string();
        let pipeline_start = Instant::now();
        let mut report = PipelineReport::new(run_id.as_str());

        logger.info(&format!("Pipeline started (run_id={})", run_id));

        for phase in Phase::ALL {
            let stages = match self.stages.get(&phase) {
                Some(stages) if !stages.is_empty() => stages,
                _ => {
                    logger.warn(&format!("[{}] No stages registered", phase));
                    report.phases.insert(phase, vec![StageRecord::no_stages()]);
                    continue;
                }
            };

            let mut records = Vec::with_capacity(stages.len());
            for stage in stages {
                let stage_name = stage.name();
                logger.info(&format!("[{}] Running stage {}", phase, stage_name));

                let stage_start = Instant::now();
                let outcome = stage.run(&mut self.context);
                let duration = stage_start.elapsed();

                let line = format!(
                    "[{}] {} -> {}: {}",
                    phase, stage_name, outcome.result, outcome.message
                );
                match outcome.result {
                    StageResult::Success => logger.info(&line),
                    StageResult::SuccessWithWarnings => logger.warn(&line),
                    StageResult::Fail => logger.error(&line),
                }

                let failed = outcome.result.is_failure();
                records.push(StageRecord::new(stage_name, outcome, duration));

                if stop_on_fail && failed {
                    logger.error(&format!("Stopping pipeline due to failure in {}", stage_name));
                    report.phases.insert(phase, records);
                    report.halted = true;
                    report.total_duration = pipeline_start.elapsed();
                    return report;
                }
            }
            report.phases.insert(phase, records);
        }

        report.total_duration = pipeline_start.elapsed();
        logger.info(&format!(
            "Pipeline completed (run_id={}) in {:.2}s: {} stages, {} failed",
            run_id,
            report.total_duration.as_secs_f64(),
            report.stage_count(),
            report.failed_stages().len()
        ));

        report
    }
}

/// Builder for constructing pipelines
pub struct PipelineBuilder<T: SchemaRecord> {
    stages: HashMap<Phase, Vec<Box<dyn Stage<T>>>>,
}

impl<T: SchemaRecord> Default for PipelineBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: SchemaRecord> PipelineBuilder<T> {
    pub fn new() -> Self {
        Self {
            stages: HashMap::new(),
        }
    }

    /// Append a stage to a phase
    pub fn add_stage<S: Stage<T> + 'static>(self, phase: Phase, stage: S) -> Self {
        self.add_boxed_stage(phase, Box::new(stage))
    }

    pub fn add_boxed_stage(mut self, phase: Phase, stage: Box<dyn Stage<T>>) -> Self {
        self.stages.entry(phase).or_default().push(stage);
        self
    }

    pub fn build(self, context: PipelineContext<T>) -> Pipeline<T> {
        Pipeline::new(self.stages, context)
    }
}
