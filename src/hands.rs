use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions, Tab};
use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::AgentConfig;
use crate::dom;
use crate::error::AgentError;
use crate::session::{ElementHandle, SerialAccess, Session, SessionLauncher};
use crate::types::{AxNode, ExtractedRecord};

/// Nodes read per accessibility walk, before the context cap is applied.
const AX_WALK_LIMIT: usize = 1000;

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 13_6) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.0 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
];

fn pick_user_agent() -> &'static str {
    let idx = (rand::random::<u32>() as usize) % USER_AGENTS.len();
    USER_AGENTS[idx]
}

/// Launches a Chrome per run, or attaches to one already listening on a
/// DevTools endpoint.
#[derive(Debug, Clone)]
pub struct ChromeLauncher {
    chrome_path: Option<PathBuf>,
    debug_url: Option<String>,
    call_timeout: Duration,
}

impl ChromeLauncher {
    pub fn new(chrome_path: Option<PathBuf>, debug_url: Option<String>) -> Self {
        Self {
            chrome_path,
            debug_url,
            call_timeout: Duration::from_secs(15),
        }
    }

    /// Upper bound for any single CDP call, navigation waits included.
    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        Self::new(config.chrome_path.clone(), config.chrome_debug_url.clone())
            .with_call_timeout(config.step_timeout)
    }
}

#[async_trait]
impl SessionLauncher for ChromeLauncher {
    async fn open(&self, headless: bool) -> Result<Box<dyn Session>, AgentError> {
        let path = self.chrome_path.clone();
        let debug_url = self.debug_url.clone();
        let call_timeout = self.call_timeout;
        let session = tokio::task::spawn_blocking(move || {
            BrowserSession::launch(headless, path, debug_url, call_timeout)
        })
                .await
                .map_err(|e| AgentError::Browser(format!("browser launch panicked: {e}")))??;
        Ok(Box::new(session))
    }
}

/// One Chrome tab driven over CDP. Calls reach the tab one at a time.
pub struct BrowserSession {
    _browser: Browser,
    tab: SerialAccess<Tab>,
}

impl BrowserSession {
    pub fn launch(
        headless: bool,
        chrome_path: Option<PathBuf>,
        debug_url: Option<String>,
        call_timeout: Duration,
    ) -> Result<Self, AgentError> {
        if let Some(url) = debug_url {
            info!(%url, "attaching to existing Chrome");
            match Browser::connect(url.clone()) {
                Ok(browser) => {
                    let tab = browser.new_tab().map_err(AgentError::browser)?;
                    info!("attached to existing Chrome");
                    return Ok(Self::with_tab(browser, tab, call_timeout));
                }
                Err(e) => warn!(%url, error = %e, "could not attach, launching a new Chrome"),
            }
        }

        let ua_arg = format!("--user-agent={}", pick_user_agent());
        let options = LaunchOptions {
            headless,
            sandbox: false,
            path: chrome_path,
            window_size: Some((1366, 900)),
            args: vec![
                OsStr::new("--no-first-run"),
                OsStr::new("--no-default-browser-check"),
                OsStr::new("--disable-blink-features=AutomationControlled"),
                OsStr::new("--disable-infobars"),
                OsStr::new("--lang=en-US"),
                OsStr::new(ua_arg.as_str()),
            ],
            idle_browser_timeout: Duration::from_secs(300),
            ..Default::default()
        };

        info!(headless, "starting Chrome");
        let browser = Browser::new(options)
            .map_err(|e| AgentError::Browser(format!("browser launch failed: {e:#}")))?;
        let tab = browser.new_tab().map_err(AgentError::browser)?;
        debug!("Chrome ready");

        Ok(Self::with_tab(browser, tab, call_timeout))
    }

    fn with_tab(browser: Browser, tab: Arc<Tab>, call_timeout: Duration) -> Self {
        tab.set_default_timeout(call_timeout);
        Self {
            _browser: browser,
            tab: SerialAccess::new(tab),
        }
    }

    /// Run `f` against the tab on the blocking pool so CDP round trips never
    /// stall the runtime.
    async fn on_tab<T, F>(&self, f: F) -> Result<T, AgentError>
    where
        T: Send + 'static,
        F: FnOnce(&Tab) -> Result<T, AgentError> + Send + 'static,
    {
        self.tab.run(f).await
    }
}

fn evaluate(tab: &Tab, js: &str) -> Result<Option<serde_json::Value>, AgentError> {
    tab.evaluate(js, false)
        .map(|remote| remote.value)
        .map_err(|e| AgentError::Browser(format!("{e:#}")))
}

#[async_trait]
impl Session for BrowserSession {
    async fn navigate(&self, url: &str) -> Result<(), AgentError> {
        let url = url::Url::parse(url)
            .map_err(|e| AgentError::Navigation(format!("{url}: {e}")))?
            .to_string();
        self.on_tab(move |tab| {
            tab.navigate_to(&url)
                .and_then(|tab| tab.wait_until_navigated())
                .map_err(|e| AgentError::Navigation(format!("{url}: {e:#}")))?;
            Ok(())
        })
        .await
    }

    async fn url(&self) -> Result<String, AgentError> {
        self.on_tab(|tab| {
            Ok(evaluate(tab, "window.location.href")?
                .and_then(|v| v.as_str().map(String::from))
                .unwrap_or_default())
        })
        .await
    }

    async fn title(&self) -> Result<String, AgentError> {
        self.on_tab(|tab| {
            Ok(evaluate(tab, "document.title")?
                .and_then(|v| v.as_str().map(String::from))
                .unwrap_or_default())
        })
        .await
    }

    async fn query(&self, selector: &str) -> Result<Option<ElementHandle>, AgentError> {
        let selector = selector.to_string();
        self.on_tab(move |tab| {
            let found = dom::decode_bool(evaluate(tab, &dom::query_js(&selector))?);
            Ok(found.then_some(ElementHandle { selector }))
        })
        .await
    }

    async fn fill(&self, element: &ElementHandle, value: &str) -> Result<(), AgentError> {
        let selector = element.selector.clone();
        let value = value.to_string();
        self.on_tab(move |tab| {
            let el = tab
                .find_element(&selector)
                .map_err(|_| AgentError::ElementNotFound(selector.clone()))?;
            el.click().map_err(AgentError::browser)?;
            if !dom::decode_bool(evaluate(tab, &dom::fill_js(&selector, &value))?) {
                return Err(AgentError::ElementNotFound(selector));
            }
            Ok(())
        })
        .await
    }

    async fn click(&self, element: &ElementHandle) -> Result<(), AgentError> {
        let selector = element.selector.clone();
        self.on_tab(move |tab| {
            let el = tab
                .find_element(&selector)
                .map_err(|_| AgentError::ElementNotFound(selector.clone()))?;
            el.click().map_err(AgentError::browser)?;
            std::thread::sleep(Duration::from_millis(500));
            Ok(())
        })
        .await
    }

    async fn press_enter(&self, element: &ElementHandle) -> Result<(), AgentError> {
        let selector = element.selector.clone();
        self.on_tab(move |tab| {
            let el = tab
                .find_element(&selector)
                .map_err(|_| AgentError::ElementNotFound(selector.clone()))?;
            el.focus().map_err(AgentError::browser)?;
            tab.press_key("Enter").map_err(AgentError::browser)?;
            std::thread::sleep(Duration::from_millis(500));
            Ok(())
        })
        .await
    }

    async fn scroll(&self, element: Option<&ElementHandle>) -> Result<(), AgentError> {
        let selector = element.map(|e| e.selector.clone());
        self.on_tab(move |tab| {
            let js = dom::scroll_js(selector.as_deref());
            if !dom::decode_bool(evaluate(tab, &js)?) {
                return Err(AgentError::ElementNotFound(selector.unwrap_or_default()));
            }
            Ok(())
        })
        .await
    }

    async fn extract(
        &self,
        selector: &str,
        limit: usize,
    ) -> Result<Vec<ExtractedRecord>, AgentError> {
        let js = dom::extract_js(selector, limit);
        self.on_tab(move |tab| dom::decode_json(evaluate(tab, &js)?))
            .await
    }

    async fn read_accessibility_tree(&self) -> Result<Vec<AxNode>, AgentError> {
        let js = dom::accessibility_tree_js(AX_WALK_LIMIT);
        self.on_tab(move |tab| {
            dom::decode_json(evaluate(tab, &js).map_err(|e| AgentError::Extraction(e.to_string()))?)
        })
        .await
    }

    async fn block_marker(&self) -> Result<Option<String>, AgentError> {
        self.on_tab(|tab| {
            Ok(evaluate(tab, &dom::block_marker_js())?
                .and_then(|v| v.as_str().map(String::from)))
        })
        .await
    }

    async fn close(&self) -> Result<(), AgentError> {
        self.on_tab(|tab| {
            tab.close(false).map_err(AgentError::browser)?;
            Ok(())
        })
        .await
    }
}
