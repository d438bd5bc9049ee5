use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::path::Path;

use crate::types::{ExtractedRecord, PlanSource, RejectedStep, StepOutcome, StepStatus};

/// Default location of the persisted run trace.
pub const TRACE_FILE: &str = "trace.json";

/// Append-only record of one run.
///
/// Outcomes can only be pushed, never edited or removed. Once
/// [`ExecutionTrace::finish`] stamps `finishedAt`, further records are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionTrace {
    goal: String,
    plan_source: PlanSource,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    steps: Vec<StepOutcome>,
    #[serde(default)]
    rejected: Vec<RejectedStep>,
}

impl ExecutionTrace {
    pub fn new(goal: impl Into<String>, plan_source: PlanSource) -> Self {
        Self {
            goal: goal.into(),
            plan_source,
            started_at: Utc::now(),
            finished_at: None,
            steps: Vec::new(),
            rejected: Vec::new(),
        }
    }

    pub fn record(&mut self, outcome: StepOutcome) {
        if self.finished_at.is_some() {
            tracing::warn!(step = outcome.step.index, "ignoring outcome recorded after finish");
            return;
        }
        self.steps.push(outcome);
    }

    /// Log plan candidates that were dropped before execution.
    pub fn record_rejected(&mut self, rejected: impl IntoIterator<Item = RejectedStep>) {
        if self.finished_at.is_none() {
            self.rejected.extend(rejected);
        }
    }

    pub fn finish(&mut self) {
        if self.finished_at.is_none() {
            self.finished_at = Some(Utc::now());
        }
    }

    pub fn goal(&self) -> &str {
        &self.goal
    }

    pub fn plan_source(&self) -> PlanSource {
        self.plan_source
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    pub fn steps(&self) -> &[StepOutcome] {
        &self.steps
    }

    pub fn rejected(&self) -> &[RejectedStep] {
        &self.rejected
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Records of the last successful extract step that matched anything.
    pub fn last_extraction(&self) -> Option<&[ExtractedRecord]> {
        self.steps
            .iter()
            .rev()
            .filter(|o| o.status == StepStatus::Ok)
            .filter_map(|o| o.extracted.as_deref())
            .find(|records| !records.is_empty())
    }

    /// Write the trace as a single pretty JSON document, replacing any
    /// previous file at `path`.
    pub fn persist(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating trace directory {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .with_context(|| format!("opening trace file {}", path.display()))?;

        serde_json::to_writer_pretty(file, self).context("serializing trace")?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("opening trace file {}", path.display()))?;
        let trace = serde_json::from_reader(std::io::BufReader::new(file))?;
        Ok(trace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Action, PlanStep};

    fn outcome(index: usize, action: Action, extracted: Option<Vec<ExtractedRecord>>) -> StepOutcome {
        let mut step = PlanStep::untargeted(action);
        step.index = index;
        StepOutcome {
            step,
            status: StepStatus::Ok,
            error: None,
            duration_ms: 1,
            attempts: 1,
            extracted,
        }
    }

    #[test]
    fn last_extraction_skips_empty_matches() {
        let hit = ExtractedRecord {
            text: "Laptop $499".into(),
            ..Default::default()
        };
        let mut trace = ExecutionTrace::new("laptop", PlanSource::Fixed);
        trace.record(outcome(0, Action::Extract, Some(vec![hit.clone()])));
        trace.record(outcome(1, Action::Extract, Some(Vec::new())));

        assert_eq!(trace.last_extraction(), Some(&[hit][..]));
    }

    #[test]
    fn finished_trace_is_frozen() {
        let mut trace = ExecutionTrace::new("laptop", PlanSource::Generated);
        trace.record(outcome(0, Action::Scroll, None));
        trace.finish();
        trace.record(outcome(1, Action::Scroll, None));

        assert_eq!(trace.len(), 1);
        assert!(trace.finished_at().is_some_and(|end| end >= trace.started_at()));
    }

    #[test]
    fn persist_writes_camel_case_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runs").join("trace.json");

        let mut trace = ExecutionTrace::new("laptop", PlanSource::Fixed);
        trace.record(outcome(0, Action::Scroll, None));
        trace.finish();
        trace.persist(&path).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["planSource"], "fixed");
        assert_eq!(raw["steps"][0]["durationMs"], 1);
        assert!(raw["finishedAt"].is_string());

        let loaded = ExecutionTrace::load(&path).unwrap();
        assert_eq!(loaded.goal(), "laptop");
        assert_eq!(loaded.len(), 1);
    }
}
