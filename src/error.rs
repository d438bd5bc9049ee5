use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Serializable error category recorded in step outcomes and task messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    NavigationError,
    ElementNotFoundError,
    TimeoutError,
    PlanGenerationError,
    ExtractionError,
    ValidationError,
    BrowserError,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::NavigationError => "NavigationError",
            ErrorKind::ElementNotFoundError => "ElementNotFoundError",
            ErrorKind::TimeoutError => "TimeoutError",
            ErrorKind::PlanGenerationError => "PlanGenerationError",
            ErrorKind::ExtractionError => "ExtractionError",
            ErrorKind::ValidationError => "ValidationError",
            ErrorKind::BrowserError => "BrowserError",
        };
        f.write_str(name)
    }
}

/// Errors raised by the agent core and its browser/generation capabilities.
#[derive(Debug, Clone, Error)]
pub enum AgentError {
    /// Navigation to a URL failed. Fatal to the run.
    #[error("navigation failed: {0}")]
    Navigation(String),

    /// No element matched a selector.
    #[error("element not found: {0}")]
    ElementNotFound(String),

    /// A step, the generation call or the whole run ran out of time.
    #[error("timed out: {0}")]
    Timeout(String),

    /// No usable plan could be produced.
    #[error("plan generation failed: {0}")]
    PlanGeneration(String),

    /// Page context or results could not be read.
    #[error("extraction failed: {0}")]
    Extraction(String),

    /// A plan step is malformed or missing a required field.
    #[error("invalid step: {0}")]
    Validation(String),

    /// Browser launch or in-page script failure.
    #[error("browser error: {0}")]
    Browser(String),
}

impl AgentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AgentError::Navigation(_) => ErrorKind::NavigationError,
            AgentError::ElementNotFound(_) => ErrorKind::ElementNotFoundError,
            AgentError::Timeout(_) => ErrorKind::TimeoutError,
            AgentError::PlanGeneration(_) => ErrorKind::PlanGenerationError,
            AgentError::Extraction(_) => ErrorKind::ExtractionError,
            AgentError::Validation(_) => ErrorKind::ValidationError,
            AgentError::Browser(_) => ErrorKind::BrowserError,
        }
    }

    /// Whether the executor may try the step again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AgentError::Timeout(_) | AgentError::ElementNotFound(_))
    }

    pub fn browser(err: impl std::fmt::Display) -> Self {
        Self::Browser(err.to_string())
    }

    /// Message shown to users: the kind tag followed by the detail.
    pub fn tagged_message(&self) -> String {
        let detail = match self {
            AgentError::Navigation(m)
            | AgentError::ElementNotFound(m)
            | AgentError::Timeout(m)
            | AgentError::PlanGeneration(m)
            | AgentError::Extraction(m)
            | AgentError::Validation(m)
            | AgentError::Browser(m) => m,
        };
        format!("{}: {}", self.kind(), detail)
    }
}
