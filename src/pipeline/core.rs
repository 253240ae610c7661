use super::context::PipelineContext;
use crate::error::EtlResult;
use crate::schema::SchemaRecord;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Stage name recorded for a phase that has no registered stages
pub const NO_STAGE_MARKER: &str = "__none__";

/// Message recorded for a phase that has no registered stages
pub const NO_STAGE_MESSAGE: &str = "No stages";

/// Fixed pipeline phases, ordered by execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    Connect,
    Dump,
    Process,
    Store,
}

impl Phase {
    /// All phases in execution order
    pub const ALL: [Phase; 4] = [Phase::Connect, Phase::Dump, Phase::Process, Phase::Store];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Connect => "CONNECT",
            Phase::Dump => "DUMP",
            Phase::Process => "PROCESS",
            Phase::Store => "STORE",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tri-state outcome of one stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageResult {
    Success,
    SuccessWithWarnings,
    Fail,
}

impl StageResult {
    /// Only `Fail` can halt a pipeline
    pub fn is_failure(&self) -> bool {
        matches!(self, StageResult::Fail)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StageResult::Success => "SUCCESS",
            StageResult::SuccessWithWarnings => "SUCCESS_WITH_WARNINGS",
            StageResult::Fail => "FAIL",
        }
    }
}

impl fmt::Display for StageResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result and message returned by [`Stage::run`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageOutcome {
    pub result: StageResult,
    pub message: String,
}

impl StageOutcome {
    pub fn new(result: StageResult, message: impl Into<String>) -> Self {
        Self {
            result,
            message: message.into(),
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(StageResult::Success, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(StageResult::SuccessWithWarnings, message)
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self::new(StageResult::Fail, message)
    }

    /// Map a plain success flag onto `Success`/`Fail`
    pub fn from_bool(ok: bool, message: impl Into<String>) -> Self {
        if ok {
            Self::success(message)
        } else {
            Self::fail(message)
        }
    }

    /// Map a fallible operation onto `Success`/`Fail`, keeping the error text
    pub fn from_result(result: EtlResult<String>) -> Self {
        match result {
            Ok(message) => Self::success(message),
            Err(e) => Self::fail(e.to_string()),
        }
    }
}

/// A single unit of work in a pipeline phase
///
/// Stages report problems through the returned [`StageOutcome`]; storage and
/// other errors are caught inside `run` and mapped to `StageResult::Fail`.
///
/// # Example
/// ```
/// use etl_pipeline::pipeline::{PipelineContext, Stage, StageOutcome};
///
/// struct CountRows;
///
/// impl Stage<serde_json::Value> for CountRows {
///     fn run(&self, context: &mut PipelineContext<serde_json::Value>) -> StageOutcome {
///         let rows = context.artifact::<Vec<u32>>("rows").map(|r| r.len());
///         StageOutcome::from_result(rows.map(|n| format!("{} rows", n)))
///     }
///
///     fn name(&self) -> &str {
///         "CountRows"
///     }
/// }
/// ```
pub trait Stage<T: SchemaRecord>: Send + Sync {
    /// Execute this stage against the shared run context
    fn run(&self, context: &mut PipelineContext<T>) -> StageOutcome;

    /// Stage name for logging and reporting
    fn name(&self) -> &str;
}

/// Report entry for one executed stage
#[derive(Debug, Clone, PartialEq)]
pub struct StageRecord {
    pub stage_name: String,
    pub result: StageResult,
    pub message: String,
    pub duration: Duration,
}

impl StageRecord {
    pub fn new(
        stage_name: impl Into<String>,
        outcome: StageOutcome,
        duration: Duration,
    ) -> Self {
        Self {
            stage_name: stage_name.into(),
            result: outcome.result,
            message: outcome.message,
            duration,
        }
    }

    /// Placeholder entry for a phase without stages
    pub fn no_stages() -> Self {
        Self {
            stage_name: NO_STAGE_MARKER.to_string(),
            result: StageResult::SuccessWithWarnings,
            message: NO_STAGE_MESSAGE.to_string(),
            duration: Duration::ZERO,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.stage_name == NO_STAGE_MARKER
    }
}

/// Result of a complete pipeline run
///
/// Phases after a halting failure are absent from `phases`.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub run_id: String,
    pub phases: BTreeMap<Phase, Vec<StageRecord>>,
    /// Whether the run stopped early on a failure
    pub halted: bool,
    pub total_duration: Duration,
}

impl PipelineReport {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            phases: BTreeMap::new(),
            halted: false,
            total_duration: Duration::ZERO,
        }
    }

    /// Entries of one phase, `None` if the phase was never reached
    pub fn phase(&self, phase: Phase) -> Option<&[StageRecord]> {
        self.phases.get(&phase).map(Vec::as_slice)
    }

    /// All failed stages in execution order
    pub fn failed_stages(&self) -> Vec<(Phase, &StageRecord)> {
        self.phases
            .iter()
            .flat_map(|(phase, records)| records.iter().map(move |r| (*phase, r)))
            .filter(|(_, r)| r.result.is_failure())
            .collect()
    }

    pub fn first_failure(&self) -> Option<(Phase, &StageRecord)> {
        self.failed_stages().into_iter().next()
    }

    /// True when no stage failed
    pub fn succeeded(&self) -> bool {
        self.first_failure().is_none()
    }

    /// Number of real stages that ran (placeholders excluded)
    pub fn stage_count(&self) -> usize {
        self.phases
            .values()
            .flatten()
            .filter(|r| !r.is_placeholder())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EtlError;

    fn record(name: &str, outcome: StageOutcome) -> StageRecord {
        StageRecord::new(name, outcome, Duration::from_millis(5))
    }

    #[test]
    fn test_phase_order_and_display() {
        let mut phases = vec![Phase::Store, Phase::Connect, Phase::Process, Phase::Dump];
        phases.sort();
        assert_eq!(phases, Phase::ALL.to_vec());
        assert_eq!(Phase::Process.to_string(), "PROCESS");
    }

    #[test]
    fn test_stage_result_display() {
        assert_eq!(StageResult::Success.to_string(), "SUCCESS");
        assert_eq!(
            StageResult::SuccessWithWarnings.to_string(),
            "SUCCESS_WITH_WARNINGS"
        );
        assert_eq!(StageResult::Fail.to_string(), "FAIL");
        assert!(StageResult::Fail.is_failure());
        assert!(!StageResult::SuccessWithWarnings.is_failure());
    }

    #[test]
    fn test_outcome_constructors() {
        assert_eq!(StageOutcome::from_bool(true, "ok").result, StageResult::Success);
        assert_eq!(StageOutcome::from_bool(false, "no").result, StageResult::Fail);
        assert_eq!(StageOutcome::warning("hm").result, StageResult::SuccessWithWarnings);

        let failed = StageOutcome::from_result(Err(EtlError::NotConfigured("no path".to_string())));
        assert_eq!(failed.result, StageResult::Fail);
        assert!(failed.message.contains("no path"));

        let ok = StageOutcome::from_result(Ok("3 rows".to_string()));
        assert_eq!(ok, StageOutcome::success("3 rows"));
    }

    #[test]
    fn test_no_stages_record() {
        let placeholder = StageRecord::no_stages();
        assert_eq!(placeholder.stage_name, NO_STAGE_MARKER);
        assert_eq!(placeholder.result, StageResult::SuccessWithWarnings);
        assert_eq!(placeholder.message, "No stages");
        assert!(placeholder.is_placeholder());
    }

    #[test]
    fn test_report_success() {
        let mut report = PipelineReport::new("run-1");
        report
            .phases
            .insert(Phase::Connect, vec![record("Connect", StageOutcome::success("ok"))]);
        report.phases.insert(Phase::Dump, vec![StageRecord::no_stages()]);

        assert!(report.succeeded());
        assert_eq!(report.stage_count(), 1);
        assert!(report.first_failure().is_none());
        assert!(report.phase(Phase::Store).is_none());
    }

    #[test]
    fn test_report_failure() {
        let mut report = PipelineReport::new("run-1");
        report.phases.insert(
            Phase::Store,
            vec![record("Store", StageOutcome::fail("disk full"))],
        );
        report.phases.insert(
            Phase::Process,
            vec![
                record("Clean", StageOutcome::success("ok")),
                record("Enrich", StageOutcome::fail("bad row")),
            ],
        );

        assert!(!report.succeeded());
        assert_eq!(report.failed_stages().len(), 2);

        let (phase, first) = report.first_failure().unwrap();
        assert_eq!(phase, Phase::Process);
        assert_eq!(first.stage_name, "Enrich");
    }
}
