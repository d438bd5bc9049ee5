use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{AgentError, ErrorKind};

/// Maximum number of elements kept in a page context snapshot.
pub const MAX_CONTEXT_ELEMENTS: usize = 100;
/// Upper bound on the serialized context embedded in a generation request.
pub const MAX_CONTEXT_CHARS: usize = 4000;
/// Accessible names and extracted text are clipped to this many characters.
pub const MAX_TEXT_CHARS: usize = 80;

/// The closed set of actions a plan may contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Goto,
    Fill,
    Click,
    WaitFor,
    Scroll,
    Extract,
}

impl Action {
    /// Parse a model-supplied action name. Case, dashes and spaces are
    /// normalized; anything outside the closed set yields `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "goto" => Some(Action::Goto),
            "fill" => Some(Action::Fill),
            "click" => Some(Action::Click),
            "wait_for" | "waitfor" => Some(Action::WaitFor),
            "scroll" => Some(Action::Scroll),
            "extract" => Some(Action::Extract),
            _ => None,
        }
    }

    pub fn requires_target(self) -> bool {
        !matches!(self, Action::Scroll | Action::Extract)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Action::Goto => "goto",
            Action::Fill => "fill",
            Action::Click => "click",
            Action::WaitFor => "wait_for",
            Action::Scroll => "scroll",
            Action::Extract => "extract",
        }
    }
}

/// One validated action within a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanStep {
    pub index: usize,
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    /// Alternate selectors tried in order when `target` matches nothing.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fallbacks: Vec<String>,
    /// For clicks: fields in which pressing Enter stands in for the click
    /// when no click candidate matches.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enter_fallbacks: Vec<String>,
    /// A missing element skips the step instead of failing it.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub optional: bool,
}

impl PlanStep {
    pub fn new(action: Action, target: impl Into<String>) -> Self {
        Self {
            index: 0,
            action,
            target: Some(target.into()),
            ..Self::untargeted(action)
        }
    }

    /// A step with no target (page-level scroll, whole-body extract).
    pub fn untargeted(action: Action) -> Self {
        Self {
            index: 0,
            action,
            target: None,
            value: None,
            timeout_ms: None,
            limit: None,
            fallbacks: Vec::new(),
            enter_fallbacks: Vec::new(),
            optional: false,
        }
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_fallbacks<S: Into<String>>(mut self, selectors: impl IntoIterator<Item = S>) -> Self {
        self.fallbacks.extend(selectors.into_iter().map(Into::into));
        self
    }

    pub fn with_enter_fallbacks<S: Into<String>>(
        mut self,
        selectors: impl IntoIterator<Item = S>,
    ) -> Self {
        self.enter_fallbacks.extend(selectors.into_iter().map(Into::into));
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// `target` followed by the fallbacks, skipping repeats.
    pub fn candidates(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for sel in self.target.iter().chain(&self.fallbacks) {
            let sel = sel.trim();
            if !sel.is_empty() && !out.contains(&sel) {
                out.push(sel);
            }
        }
        out
    }

    /// Short human description used in logs.
    pub fn describe(&self) -> String {
        match &self.target {
            Some(target) => format!("{} {}", self.action.as_str(), target),
            None => self.action.as_str().to_string(),
        }
    }
}

/// An ordered, non-empty list of steps with indices `0..n`.
///
/// A plan can only be built through [`Plan::new`] and has no mutators, so it
/// stays as validated for the rest of the run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Plan {
    steps: Vec<PlanStep>,
}

impl Plan {
    /// Re-index `steps` consecutively. Rejects an empty list.
    pub fn new(steps: Vec<PlanStep>) -> Result<Self, AgentError> {
        if steps.is_empty() {
            return Err(AgentError::PlanGeneration("plan has no steps".into()));
        }
        let steps = steps
            .into_iter()
            .enumerate()
            .map(|(index, step)| PlanStep { index, ..step })
            .collect();
        Ok(Self { steps })
    }

    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Ok,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&AgentError> for StepError {
    fn from(err: &AgentError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Structured data read from one matched element by an `extract` step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedRecord {
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

/// What happened to one plan step. Retries fold into a single outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepOutcome {
    pub step: PlanStep,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
    pub duration_ms: u64,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted: Option<Vec<ExtractedRecord>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanSource {
    Fixed,
    Generated,
}

/// A candidate step the planner dropped before execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedStep {
    /// Position in the raw model output.
    pub position: usize,
    pub raw: serde_json::Value,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundingState {
    Visible,
    Hidden,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementCategory {
    Input,
    Button,
    Link,
    Text,
    Image,
    Landmark,
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementDescriptor {
    pub role: String,
    pub accessible_name: String,
    pub selector_hint: String,
    pub bounding_state: BoundingState,
    pub category: ElementCategory,
}

/// Bounded snapshot of the current page used to ground plan generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageContext {
    pub url: String,
    pub title: String,
    pub elements: Vec<ElementDescriptor>,
    pub truncated: bool,
}

impl PageContext {
    /// Context used when every acquisition strategy failed.
    pub fn degraded(url: String, title: String) -> Self {
        Self {
            url,
            title,
            elements: Vec::new(),
            truncated: true,
        }
    }
}

/// One node as reported by the in-page accessibility walk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AxNode {
    pub tag: String,
    pub role: Option<String>,
    pub name: String,
    pub id: Option<String>,
    pub name_attr: Option<String>,
    pub aria_label: Option<String>,
    pub classes: Vec<String>,
    pub visible: bool,
    pub interactive: bool,
}

/// User-facing data for the selected result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultData {
    pub name: String,
    pub price: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

/// Final answer of one orchestrator call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub success: bool,
    pub message: String,
    pub data: Option<ResultData>,
    pub trace: crate::trace::ExecutionTrace,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_parse_accepts_closed_set_only() {
        assert_eq!(Action::parse("goto"), Some(Action::Goto));
        assert_eq!(Action::parse(" Wait-For "), Some(Action::WaitFor));
        assert_eq!(Action::parse("waitFor"), Some(Action::WaitFor));
        assert_eq!(Action::parse("EXTRACT"), Some(Action::Extract));
        assert_eq!(Action::parse("screenshot"), None);
        assert_eq!(Action::parse(""), None);
    }

    #[test]
    fn plan_reindexes_and_rejects_empty() {
        let mut late = PlanStep::new(Action::Click, "#b");
        late.index = 7;
        let plan = Plan::new(vec![PlanStep::new(Action::Goto, "https://a.test"), late]).unwrap();
        let indices: Vec<usize> = plan.steps().iter().map(|s| s.index).collect();
        assert_eq!(indices, vec![0, 1]);

        assert!(matches!(
            Plan::new(Vec::new()),
            Err(AgentError::PlanGeneration(_))
        ));
    }

    #[test]
    fn plan_step_serializes_camel_case() {
        let step = PlanStep::new(Action::WaitFor, "#results").with_timeout_ms(500);
        let json = serde_json::to_value(&step).unwrap();
        assert_eq!(json["action"], "wait_for");
        assert_eq!(json["timeoutMs"], 500);
        assert!(json.get("value").is_none());
    }

    #[test]
    fn candidates_keep_order_and_drop_repeats() {
        let step = PlanStep::new(Action::Click, "#go")
            .with_fallbacks(["  ", "#submit", "#go", "#submit "])
            .optional();
        assert_eq!(step.candidates(), vec!["#go", "#submit"]);

        let json = serde_json::to_value(&step).unwrap();
        assert_eq!(json["optional"], true);
        assert!(json.get("enterFallbacks").is_none());
    }
}
