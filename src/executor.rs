//! Runs a [`Plan`] against a live session, one step at a time.

use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::AgentError;
use crate::session::{ElementHandle, Session};
use crate::trace::ExecutionTrace;
use crate::types::{Action, ExtractedRecord, Plan, PlanStep, StepError, StepOutcome, StepStatus};

/// Matches returned by an `extract` step that sets no `limit`.
pub const DEFAULT_EXTRACT_LIMIT: usize = 20;

/// Exponential delay between attempts of the same step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub initial: Duration,
    pub multiplier: u32,
}

impl Backoff {
    pub const NONE: Backoff = Backoff {
        initial: Duration::ZERO,
        multiplier: 1,
    };

    /// Delay before retry number `retry` (0 for the first retry).
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.initial
            .saturating_mul(self.multiplier.saturating_pow(retry))
    }
}

/// Per-step timeout and retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total tries per step, the first one included.
    pub max_attempts: u32,
    pub backoff: Backoff,
    /// Used when the step has no `timeoutMs` of its own.
    pub step_timeout: Duration,
    /// How often `wait_for` re-checks the page.
    pub poll_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff {
                initial: Duration::from_millis(250),
                multiplier: 2,
            },
            step_timeout: Duration::from_millis(15_000),
            poll_interval: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    /// No backoff and short timeouts, for tests against in-memory pages.
    pub fn immediate() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::NONE,
            step_timeout: Duration::from_millis(50),
            poll_interval: Duration::from_millis(5),
        }
    }

    pub fn with_step_timeout(mut self, step_timeout: Duration) -> Self {
        self.step_timeout = step_timeout;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn timeout_for(&self, step: &PlanStep) -> Duration {
        step.timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.step_timeout)
    }
}

pub struct StepExecutor {
    policy: RetryPolicy,
    extract_limit: usize,
}

impl StepExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            extract_limit: DEFAULT_EXTRACT_LIMIT,
        }
    }

    /// Execute `plan` in index order, appending one outcome per attempted step.
    ///
    /// Returns `Err` only for run-ending failures: a failed `goto`, or the
    /// run `deadline` passing before the next step could start. Every other
    /// failure stays inside its step outcome.
    pub async fn execute(
        &self,
        session: &dyn Session,
        plan: &Plan,
        trace: &mut ExecutionTrace,
        deadline: Option<Instant>,
    ) -> Result<(), AgentError> {
        for step in plan.steps() {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                warn!(step = step.index, "run deadline exceeded, stopping");
                return Err(AgentError::Timeout(format!(
                    "run deadline exceeded before step {} ({})",
                    step.index,
                    step.describe()
                )));
            }

            info!(step = step.index, "executing {}", step.describe());
            let outcome = self.run_step(session, step).await;
            let fatal = match (&outcome.error, outcome.status, step.action) {
                (Some(error), StepStatus::Failed, Action::Goto) => Some(AgentError::Navigation(format!(
                    "step {} could not load {}: {}",
                    step.index,
                    step.target.as_deref().unwrap_or_default(),
                    error.message
                ))),
                _ => None,
            };
            trace.record(outcome);

            if let Some(err) = fatal {
                return Err(err);
            }
        }
        Ok(())
    }

    async fn run_step(&self, session: &dyn Session, step: &PlanStep) -> StepOutcome {
        let started = Instant::now();
        let timeout = self.policy.timeout_for(step);
        let max_attempts = if step.optional { 1 } else { self.policy.max_attempts };
        let mut attempts = 0;

        let result = loop {
            attempts += 1;
            let attempt = tokio::time::timeout(timeout, self.attempt(session, step))
                .await
                .unwrap_or_else(|_| {
                    Err(AgentError::Timeout(format!(
                        "{} exceeded {}ms",
                        step.describe(),
                        timeout.as_millis()
                    )))
                });

            match attempt {
                Ok(extracted) => break Ok(extracted),
                Err(e) if e.is_retryable() && attempts < max_attempts => {
                    let delay = self.policy.backoff.delay_for(attempts - 1);
                    debug!(step = step.index, attempts, error = %e, ?delay, "retrying step");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => break Err(e),
            }
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok(extracted) => StepOutcome {
                step: step.clone(),
                status: StepStatus::Ok,
                error: None,
                duration_ms,
                attempts,
                extracted,
            },
            Err(e) if step.optional && e.is_retryable() => {
                info!(step = step.index, error = %e, "optional step skipped");
                StepOutcome {
                    step: step.clone(),
                    status: StepStatus::Skipped,
                    error: Some(StepError::from(&e)),
                    duration_ms,
                    attempts,
                    extracted: None,
                }
            }
            Err(e) => {
                warn!(step = step.index, attempts, error = %e, "step failed");
                StepOutcome {
                    step: step.clone(),
                    status: StepStatus::Failed,
                    error: Some(StepError::from(&e)),
                    duration_ms,
                    attempts,
                    extracted: None,
                }
            }
        }
    }

    async fn attempt(
        &self,
        session: &dyn Session,
        step: &PlanStep,
    ) -> Result<Option<Vec<ExtractedRecord>>, AgentError> {
        match step.action {
            Action::Goto => {
                session.navigate(required_target(step)?).await?;
            }
            Action::Fill => {
                let selector = required_target(step)?;
                let value = step.value.as_deref().ok_or_else(|| {
                    AgentError::Validation(format!("fill {selector} has no value"))
                })?;
                let element = find(session, &step.candidates()).await?;
                session.fill(&element, value).await?;
            }
            Action::Click => {
                required_target(step)?;
                let candidates = step.candidates();
                if let Some(element) = find_first(session, &candidates).await? {
                    session.click(&element).await?;
                } else {
                    let fields: Vec<&str> = step.enter_fallbacks.iter().map(String::as_str).collect();
                    let Some(field) = find_first(session, &fields).await? else {
                        return Err(not_found(&candidates));
                    };
                    debug!(step = step.index, field = %field.selector, "no click target, pressing Enter");
                    session.press_enter(&field).await?;
                }
            }
            Action::WaitFor => {
                required_target(step)?;
                let candidates = step.candidates();
                while find_first(session, &candidates).await?.is_none() {
                    tokio::time::sleep(self.policy.poll_interval).await;
                }
            }
            Action::Scroll => {
                let element = match step.target {
                    Some(_) => Some(find(session, &step.candidates()).await?),
                    None => None,
                };
                session.scroll(element.as_ref()).await?;
            }
            Action::Extract => {
                let selector = step.target.as_deref().unwrap_or("body");
                let limit = step.limit.unwrap_or(self.extract_limit);
                let records = session.extract(selector, limit).await?;
                debug!(step = step.index, matches = records.len(), "extracted");
                if records.is_empty() {
                    match session.block_marker().await {
                        Ok(Some(marker)) => {
                            return Err(AgentError::Extraction(format!(
                                "page is a bot check (matched '{marker}')"
                            )));
                        }
                        Ok(None) => {}
                        Err(e) => debug!(error = %e, "could not check for a bot check"),
                    }
                }
                return Ok(Some(records));
            }
        }
        Ok(None)
    }
}

fn required_target(step: &PlanStep) -> Result<&str, AgentError> {
    step.target
        .as_deref()
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| AgentError::Validation(format!("{} requires a target", step.action.as_str())))
}

/// First candidate selector that matches, in order.
async fn find_first(
    session: &dyn Session,
    candidates: &[&str],
) -> Result<Option<ElementHandle>, AgentError> {
    for selector in candidates {
        if let Some(element) = session.query(selector).await? {
            return Ok(Some(element));
        }
    }
    Ok(None)
}

async fn find(session: &dyn Session, candidates: &[&str]) -> Result<ElementHandle, AgentError> {
    find_first(session, candidates)
        .await?
        .ok_or_else(|| not_found(candidates))
}

fn not_found(candidates: &[&str]) -> AgentError {
    AgentError::ElementNotFound(candidates.join(" | "))
}
