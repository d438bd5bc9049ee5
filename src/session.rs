//! Browser capability seam.
//!
//! The core only talks to a page through [`Session`]. The real implementation
//! lives in [`crate::hands`]; tests substitute an in-memory page.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::error::AgentError;
use crate::types::{AxNode, ExtractedRecord};

/// A matched element. Handles are re-resolved by selector, so they stay valid
/// only as long as the page keeps matching it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementHandle {
    pub selector: String,
}

/// One open page, exclusively owned by a single run.
#[async_trait]
pub trait Session: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<(), AgentError>;

    async fn url(&self) -> Result<String, AgentError>;

    async fn title(&self) -> Result<String, AgentError>;

    /// Look up the first element matching `selector`. `Ok(None)` means the
    /// page answered but nothing matched.
    async fn query(&self, selector: &str) -> Result<Option<ElementHandle>, AgentError>;

    async fn fill(&self, element: &ElementHandle, value: &str) -> Result<(), AgentError>;

    async fn click(&self, element: &ElementHandle) -> Result<(), AgentError>;

    /// Focus `element` and press Enter, e.g. to submit a search field.
    async fn press_enter(&self, element: &ElementHandle) -> Result<(), AgentError>;

    /// Scroll `element` into view, or the page down by one viewport when `None`.
    async fn scroll(&self, element: Option<&ElementHandle>) -> Result<(), AgentError>;

    /// Read up to `limit` elements matching `selector`, in document order.
    async fn extract(&self, selector: &str, limit: usize)
        -> Result<Vec<ExtractedRecord>, AgentError>;

    async fn read_accessibility_tree(&self) -> Result<Vec<AxNode>, AgentError>;

    /// The bot-check marker found on the current page, if any.
    async fn block_marker(&self) -> Result<Option<String>, AgentError>;

    async fn close(&self) -> Result<(), AgentError>;
}

/// Opens sessions. One call per run.
#[async_trait]
pub trait SessionLauncher: Send + Sync {
    async fn open(&self, headless: bool) -> Result<Box<dyn Session>, AgentError>;
}

/// Runs blocking calls against a shared resource one at a time.
///
/// The permit moves into the blocking task, so a call whose caller stopped
/// waiting (a step timeout) keeps the resource until it actually returns.
/// The next call waits for it instead of overlapping.
pub struct SerialAccess<T> {
    inner: Arc<T>,
    gate: Arc<Semaphore>,
}

impl<T: Send + Sync + 'static> SerialAccess<T> {
    pub fn new(inner: Arc<T>) -> Self {
        Self {
            inner,
            gate: Arc::new(Semaphore::new(1)),
        }
    }

    pub async fn run<R, F>(&self, f: F) -> Result<R, AgentError>
    where
        R: Send + 'static,
        F: FnOnce(&T) -> Result<R, AgentError> + Send + 'static,
    {
        let permit = self
            .gate
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| AgentError::Browser("session is closed".into()))?;
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            f(&inner)
        })
        .await
        .map_err(|e| AgentError::Browser(format!("browser task panicked: {e}")))?
    }
}
