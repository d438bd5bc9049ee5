//! The two entry points transport layers may call.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::brain::Brain;
use crate::config::{AgentConfig, DEFAULT_STORE_URL};
use crate::context::PageContextExtractor;
use crate::error::AgentError;
use crate::executor::{RetryPolicy, StepExecutor};
use crate::hands::ChromeLauncher;
use crate::planner::PlanGenerator;
use crate::ranking::{FirstMatch, PriceFilter, Ranking, ranking_for_goal, search_terms, select_best};
use crate::session::{Session, SessionLauncher};
use crate::trace::ExecutionTrace;
use crate::types::{
    Action, ExtractedRecord, Plan, PlanSource, PlanStep, ResultData, StepError, TaskResult,
};

pub const SEARCH_INPUT: &str = "input#twotabsearchtextbox";
pub const SEARCH_SUBMIT: &str = "input#nav-search-submit-button";
pub const RESULT_CARD: &str = "div.s-main-slot div[data-component-type='s-search-result']";

pub const SEARCH_INPUT_FALLBACKS: &[&str] = &["input[name='field-keywords']"];
pub const SEARCH_SUBMIT_FALLBACKS: &[&str] = &["input[type='submit'][value]", "input[type='submit']"];

/// Cookie and delivery-location prompts, first one that shows up is clicked.
pub const POPUP_DISMISS: &[&str] = &[
    "input#sp-cc-accept",
    "button[name='glowDoneButton']",
    "input[name='glowDoneButton']",
    "#glowDoneButton",
];

/// Lifecycle of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    SessionOpen,
    Planning,
    Executing,
    Success,
    Failure,
}

/// Hardcoded baseline plan: search the store for `goal` and read the first
/// result card.
pub fn fixed_plan(goal: &str, store_url: &str) -> Result<Plan, AgentError> {
    let search_inputs = || SEARCH_INPUT_FALLBACKS.iter().copied();
    Plan::new(vec![
        PlanStep::new(Action::Goto, store_url),
        popup_step(),
        PlanStep::new(Action::WaitFor, SEARCH_INPUT).with_fallbacks(search_inputs()),
        PlanStep::new(Action::Fill, SEARCH_INPUT)
            .with_fallbacks(search_inputs())
            .with_value(search_terms(goal)),
        PlanStep::new(Action::Click, SEARCH_SUBMIT)
            .with_fallbacks(SEARCH_SUBMIT_FALLBACKS.iter().copied())
            .with_enter_fallbacks(std::iter::once(SEARCH_INPUT).chain(search_inputs())),
        PlanStep::new(Action::WaitFor, RESULT_CARD).with_timeout_ms(30_000),
        PlanStep::new(Action::Extract, RESULT_CARD).with_limit(1),
    ])
}

/// Optional click on whichever consent popup is present.
fn popup_step() -> PlanStep {
    PlanStep::new(Action::Click, POPUP_DISMISS[0])
        .with_fallbacks(POPUP_DISMISS[1..].iter().copied())
        .with_timeout_ms(3_000)
        .optional()
}

/// Best-effort popup dismissal outside of any plan. Never fails.
async fn dismiss_popups(session: &dyn Session) {
    for selector in POPUP_DISMISS {
        if let Ok(Some(element)) = session.query(selector).await {
            match session.click(&element).await {
                Ok(()) => info!(selector, "closed popup"),
                Err(e) => debug!(selector, error = %e, "could not close popup"),
            }
            return;
        }
    }
}

pub struct TaskOrchestrator {
    launcher: Arc<dyn SessionLauncher>,
    extractor: PageContextExtractor,
    planner: Option<PlanGenerator>,
    executor: StepExecutor,
    run_timeout: Duration,
    trace_path: Option<PathBuf>,
    store_url: String,
    start_url: Option<String>,
}

impl TaskOrchestrator {
    pub fn new(launcher: Arc<dyn SessionLauncher>, extractor: PageContextExtractor) -> Self {
        Self {
            launcher,
            extractor,
            planner: None,
            executor: StepExecutor::new(RetryPolicy::default()),
            run_timeout: Duration::from_secs(180),
            trace_path: None,
            store_url: DEFAULT_STORE_URL.to_string(),
            start_url: None,
        }
    }

    /// Chrome sessions, OpenAI planning when a key is configured, traces
    /// written to the configured path.
    pub fn from_config(config: &AgentConfig) -> Self {
        let planner = match Brain::from_config(config) {
            Ok(brain) => Some(
                PlanGenerator::new(Box::new(brain), config.generation_timeout)
                    .with_max_context_chars(config.max_context_chars),
            ),
            Err(e) => {
                warn!(error = %e, "planned runs disabled");
                None
            }
        };
        let policy = RetryPolicy::default().with_step_timeout(config.step_timeout);

        let mut orchestrator = Self::new(
            Arc::new(ChromeLauncher::from_config(config)),
            PageContextExtractor::from_config(config),
        )
        .with_policy(policy)
        .with_run_timeout(config.run_timeout)
        .with_trace_path(Some(config.trace_path.clone()))
        .with_store_url(config.store_url.clone());
        orchestrator.planner = planner;
        orchestrator.start_url = Some(config.store_url.clone());
        orchestrator
    }

    pub fn with_planner(mut self, planner: PlanGenerator) -> Self {
        self.planner = Some(planner);
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.executor = StepExecutor::new(policy);
        self
    }

    pub fn with_run_timeout(mut self, run_timeout: Duration) -> Self {
        self.run_timeout = run_timeout;
        self
    }

    pub fn with_trace_path(mut self, trace_path: Option<PathBuf>) -> Self {
        self.trace_path = trace_path;
        self
    }

    pub fn with_store_url(mut self, store_url: impl Into<String>) -> Self {
        self.store_url = store_url.into();
        self
    }

    /// Page loaded before the context snapshot of a planned run.
    pub fn with_start_url(mut self, start_url: Option<String>) -> Self {
        self.start_url = start_url;
        self
    }

    pub async fn run_fixed_task(&self, goal: &str, headless: bool) -> TaskResult {
        self.run(goal, headless, PlanSource::Fixed).await
    }

    pub async fn run_planned_task(&self, goal: &str, headless: bool) -> TaskResult {
        self.run(goal, headless, PlanSource::Generated).await
    }

    async fn run(&self, goal: &str, headless: bool, source: PlanSource) -> TaskResult {
        let deadline = Instant::now() + self.run_timeout;
        let mut trace = ExecutionTrace::new(goal, source);
        let mut state = RunState::Idle;
        info!(goal, ?source, headless, "starting run");

        let outcome = match self.launcher.open(headless).await {
            Ok(session) => {
                transition(&mut state, RunState::SessionOpen);
                let outcome = self
                    .pipeline(session.as_ref(), goal, source, &mut trace, &mut state, deadline)
                    .await;
                if let Err(e) = session.close().await {
                    warn!(error = %e, "failed to close session");
                }
                outcome
            }
            Err(e) => Err(e),
        };

        trace.finish();
        let result = self.build_result(goal, source, outcome, trace);
        transition(
            &mut state,
            if result.success {
                RunState::Success
            } else {
                RunState::Failure
            },
        );

        if let Some(path) = &self.trace_path {
            match result.trace.persist(path) {
                Ok(()) => info!(path = %path.display(), "trace written"),
                Err(e) => warn!(path = %path.display(), error = %e, "could not write trace"),
            }
        }
        result
    }

    async fn pipeline(
        &self,
        session: &dyn Session,
        goal: &str,
        source: PlanSource,
        trace: &mut ExecutionTrace,
        state: &mut RunState,
        deadline: Instant,
    ) -> Result<(), AgentError> {
        let plan = match source {
            PlanSource::Fixed => fixed_plan(goal, &self.store_url)?,
            PlanSource::Generated => {
                let planner = self.planner.as_ref().ok_or_else(|| {
                    AgentError::PlanGeneration(
                        "no generation capability configured (set OPENAI_API_KEY)".into(),
                    )
                })?;
                transition(state, RunState::Planning);

                if let Some(url) = &self.start_url {
                    match session.navigate(url).await {
                        Ok(()) => dismiss_popups(session).await,
                        Err(e) => {
                            warn!(%url, error = %e, "could not open start page, planning from current page")
                        }
                    }
                }
                let context = self.extractor.extract(session).await;
                let generated = planner.generate_plan(goal, &context).await?;
                trace.record_rejected(generated.rejected);
                generated.plan
            }
        };

        transition(state, RunState::Executing);
        self.executor
            .execute(session, &plan, trace, Some(deadline))
            .await
    }

    fn build_result(
        &self,
        goal: &str,
        source: PlanSource,
        outcome: Result<(), AgentError>,
        trace: ExecutionTrace,
    ) -> TaskResult {
        let (filter, ranking): (PriceFilter, Box<dyn Ranking>) = match source {
            PlanSource::Fixed => (PriceFilter::default(), Box::new(FirstMatch)),
            PlanSource::Generated => (PriceFilter::from_goal(goal), ranking_for_goal(goal)),
        };
        let data = trace
            .last_extraction()
            .and_then(|records| select_best(records, &filter, ranking.as_ref()))
            .map(to_result_data);

        let (success, message) = match (&outcome, &data) {
            (Err(e), _) => (false, e.tagged_message()),
            (Ok(()), Some(data)) => (true, format!("Success! Found '{}' for ${}", data.name, data.price)),
            (Ok(()), None) => match failed_extract(&trace) {
                Some(error) => (false, format!("{}: {}", error.kind, error.message)),
                None => (false, format!("No results found for '{goal}'.")),
            },
        };

        TaskResult {
            success,
            message,
            data,
            trace,
        }
    }
}

/// The error of the last extract step, when that step failed.
fn failed_extract(trace: &ExecutionTrace) -> Option<&StepError> {
    trace
        .steps()
        .iter()
        .rev()
        .find(|o| o.step.action == Action::Extract)
        .and_then(|o| o.error.as_ref())
}

fn transition(state: &mut RunState, next: RunState) {
    info!(from = ?*state, to = ?next, "run state");
    *state = next;
}

fn to_result_data(record: &ExtractedRecord) -> ResultData {
    let name = record
        .name
        .clone()
        .filter(|n| !n.trim().is_empty())
        .or_else(|| record.text.lines().map(str::trim).find(|l| !l.is_empty()).map(String::from))
        .unwrap_or_else(|| "Unknown Product".to_string());
    let price = record
        .price
        .as_deref()
        .map(|p| p.trim().trim_start_matches('$').trim().replace(['\n', ' '], ""))
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| "Price not available".to_string());
    let extra = record
        .attributes
        .iter()
        .filter(|(k, _)| k.starts_with("data-"))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    ResultData {
        name,
        price,
        url: record.url.clone(),
        extra,
    }
}
