#![allow(dead_code)]

use agentic_rpa::brain::{Generator, PromptPayload};
use agentic_rpa::error::AgentError;
use agentic_rpa::session::{ElementHandle, Session, SessionLauncher};
use agentic_rpa::types::{AxNode, ExtractedRecord};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Mutable state of an in-memory page.
#[derive(Debug, Default, Clone)]
pub struct PageState {
    pub url: String,
    pub title: String,
    /// Selectors that currently match something.
    pub present: HashSet<String>,
    /// Selectors that start matching after this many failed lookups.
    pub appear_after: HashMap<String, usize>,
    /// Clicking the key makes the listed selectors appear.
    pub reveals: HashMap<String, Vec<String>>,
    pub records: HashMap<String, Vec<ExtractedRecord>>,
    pub unreachable: HashSet<String>,
    pub ax_nodes: Option<Vec<AxNode>>,
    pub query_delay: Duration,
    pub calls: Vec<String>,
    pub filled: HashMap<String, String>,
    pub closed: bool,
    /// Bot-check marker reported for the page.
    pub blocked: Option<String>,
    pub misses: HashMap<String, usize>,
}

impl PageState {
    pub fn with_present(mut self, selectors: &[&str]) -> Self {
        self.present.extend(selectors.iter().map(|s| s.to_string()));
        self
    }

    pub fn with_records(mut self, selector: &str, records: Vec<ExtractedRecord>) -> Self {
        self.records.insert(selector.to_string(), records);
        self
    }

    pub fn with_reveal(mut self, clicked: &str, revealed: &[&str]) -> Self {
        self.reveals.insert(
            clicked.to_string(),
            revealed.iter().map(|s| s.to_string()).collect(),
        );
        self
    }
}

pub type SharedPage = Arc<Mutex<PageState>>;

pub struct FakeSession {
    pub page: SharedPage,
}

impl FakeSession {
    pub fn new(state: PageState) -> Self {
        Self {
            page: Arc::new(Mutex::new(state)),
        }
    }

    fn log(&self, call: String) {
        self.page.lock().unwrap().calls.push(call);
    }
}

#[async_trait]
impl Session for FakeSession {
    async fn navigate(&self, url: &str) -> Result<(), AgentError> {
        self.log(format!("navigate {url}"));
        let mut page = self.page.lock().unwrap();
        if page.unreachable.contains(url) {
            return Err(AgentError::Navigation(format!("{url}: net::ERR_NAME_NOT_RESOLVED")));
        }
        page.url = url.to_string();
        page.title = format!("Page at {url}");
        Ok(())
    }

    async fn url(&self) -> Result<String, AgentError> {
        Ok(self.page.lock().unwrap().url.clone())
    }

    async fn title(&self) -> Result<String, AgentError> {
        Ok(self.page.lock().unwrap().title.clone())
    }

    async fn query(&self, selector: &str) -> Result<Option<ElementHandle>, AgentError> {
        let delay = self.page.lock().unwrap().query_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut page = self.page.lock().unwrap();
        if page.present.contains(selector) {
            return Ok(Some(ElementHandle {
                selector: selector.to_string(),
            }));
        }
        if let Some(&needed) = page.appear_after.get(selector) {
            let misses = page.misses.entry(selector.to_string()).or_insert(0);
            if *misses >= needed {
                page.present.insert(selector.to_string());
                return Ok(Some(ElementHandle {
                    selector: selector.to_string(),
                }));
            }
            *misses += 1;
        }
        Ok(None)
    }

    async fn fill(&self, element: &ElementHandle, value: &str) -> Result<(), AgentError> {
        self.log(format!("fill {}", element.selector));
        self.page
            .lock()
            .unwrap()
            .filled
            .insert(element.selector.clone(), value.to_string());
        Ok(())
    }

    async fn click(&self, element: &ElementHandle) -> Result<(), AgentError> {
        self.log(format!("click {}", element.selector));
        let mut page = self.page.lock().unwrap();
        if let Some(revealed) = page.reveals.get(&element.selector).cloned() {
            page.present.extend(revealed);
        }
        Ok(())
    }

    async fn press_enter(&self, element: &ElementHandle) -> Result<(), AgentError> {
        self.log(format!("enter {}", element.selector));
        let mut page = self.page.lock().unwrap();
        if let Some(revealed) = page.reveals.get(&element.selector).cloned() {
            page.present.extend(revealed);
        }
        Ok(())
    }

    async fn scroll(&self, element: Option<&ElementHandle>) -> Result<(), AgentError> {
        let target = element.map(|e| e.selector.as_str()).unwrap_or("page");
        self.log(format!("scroll {target}"));
        Ok(())
    }

    async fn extract(
        &self,
        selector: &str,
        limit: usize,
    ) -> Result<Vec<ExtractedRecord>, AgentError> {
        self.log(format!("extract {selector}"));
        let page = self.page.lock().unwrap();
        Ok(page
            .records
            .get(selector)
            .map(|r| r.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn read_accessibility_tree(&self) -> Result<Vec<AxNode>, AgentError> {
        self.page
            .lock()
            .unwrap()
            .ax_nodes
            .clone()
            .ok_or_else(|| AgentError::Extraction("accessibility tree unavailable".into()))
    }

    async fn block_marker(&self) -> Result<Option<String>, AgentError> {
        Ok(self.page.lock().unwrap().blocked.clone())
    }

    async fn close(&self) -> Result<(), AgentError> {
        self.page.lock().unwrap().closed = true;
        Ok(())
    }
}

/// Hands out sessions that all share one inspectable page.
pub struct FakeLauncher {
    pub page: SharedPage,
    pub fail: bool,
}

impl FakeLauncher {
    pub fn new(state: PageState) -> Self {
        Self {
            page: Arc::new(Mutex::new(state)),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            page: Arc::new(Mutex::new(PageState::default())),
            fail: true,
        }
    }
}

#[async_trait]
impl SessionLauncher for FakeLauncher {
    async fn open(&self, _headless: bool) -> Result<Box<dyn Session>, AgentError> {
        if self.fail {
            return Err(AgentError::Browser("browser launch failed: no chrome".into()));
        }
        Ok(Box::new(FakeSession {
            page: self.page.clone(),
        }))
    }
}

/// Replies with a fixed answer and remembers every prompt it saw.
pub struct ScriptedGenerator {
    reply: Result<String, AgentError>,
    delay: Duration,
    pub prompts: Arc<Mutex<Vec<PromptPayload>>>,
}

impl ScriptedGenerator {
    pub fn replying(text: &str) -> Self {
        Self {
            reply: Ok(text.to_string()),
            delay: Duration::ZERO,
            prompts: Arc::default(),
        }
    }

    pub fn failing(err: AgentError) -> Self {
        Self {
            reply: Err(err),
            delay: Duration::ZERO,
            prompts: Arc::default(),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(&self, prompt: &PromptPayload) -> Result<String, AgentError> {
        self.prompts.lock().unwrap().push(prompt.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.reply.clone()
    }
}

pub fn record(name: &str, price: &str) -> ExtractedRecord {
    ExtractedRecord {
        text: format!("{name}\n{price}"),
        name: Some(name.to_string()),
        price: Some(price.to_string()),
        url: Some(format!("https://store.test/dp/{}", name.replace(' ', "-"))),
        ..Default::default()
    }
}

pub fn ax(tag: &str, name: &str, interactive: bool) -> AxNode {
    AxNode {
        tag: tag.to_string(),
        name: name.to_string(),
        visible: true,
        interactive,
        ..Default::default()
    }
}
