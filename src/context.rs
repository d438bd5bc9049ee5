//! Page context acquisition.
//!
//! A [`PageContextExtractor`] holds an ordered list of [`ContextSource`]s and
//! returns the first snapshot one of them produces. When all of them fail it
//! still answers, with a degraded context flagged as truncated.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::session::Session;
use crate::types::{AxNode, BoundingState, ElementCategory, ElementDescriptor, PageContext};

/// One way of turning the live page into a [`PageContext`].
#[async_trait]
pub trait ContextSource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn snapshot(&self, session: &dyn Session) -> Result<PageContext, AgentError>;
}

/// Rich context from an external provider that already understands the page.
pub struct RemoteContextSource {
    client: Client,
    endpoint: String,
    max_elements: usize,
}

impl RemoteContextSource {
    pub fn new(endpoint: impl Into<String>, max_elements: usize, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            endpoint: endpoint.into(),
            max_elements,
        }
    }
}

#[async_trait]
impl ContextSource for RemoteContextSource {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn snapshot(&self, session: &dyn Session) -> Result<PageContext, AgentError> {
        let url = session.url().await?;
        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "url": url }))
            .send()
            .await
            .map_err(|e| AgentError::Extraction(format!("context provider unreachable: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AgentError::Extraction(format!(
                "context provider returned {status}"
            )));
        }

        let mut context: PageContext = response
            .json()
            .await
            .map_err(|e| AgentError::Extraction(format!("malformed provider context: {e}")))?;

        if context.elements.len() > self.max_elements {
            context.elements.truncate(self.max_elements);
            context.truncated = true;
        }
        Ok(context)
    }
}

/// Local walk over the page's accessibility tree.
pub struct AccessibilityWalk {
    max_elements: usize,
}

impl AccessibilityWalk {
    pub fn new(max_elements: usize) -> Self {
        Self { max_elements }
    }
}

#[async_trait]
impl ContextSource for AccessibilityWalk {
    fn name(&self) -> &'static str {
        "accessibility"
    }

    async fn snapshot(&self, session: &dyn Session) -> Result<PageContext, AgentError> {
        let nodes = session.read_accessibility_tree().await?;
        let url = session.url().await?;
        let title = session.title().await?;
        let (elements, truncated) = describe_nodes(&nodes, self.max_elements);
        Ok(PageContext {
            url,
            title,
            elements,
            truncated,
        })
    }
}

/// Map raw nodes to descriptors in document order, keeping at most `cap`.
/// Returns whether the cap cut anything off.
pub fn describe_nodes(nodes: &[AxNode], cap: usize) -> (Vec<ElementDescriptor>, bool) {
    let mut kept = nodes
        .iter()
        .filter(|n| n.interactive || !n.name.trim().is_empty())
        .map(describe);
    let elements: Vec<ElementDescriptor> = kept.by_ref().take(cap).collect();
    let truncated = kept.next().is_some();
    (elements, truncated)
}

fn describe(node: &AxNode) -> ElementDescriptor {
    let category = categorize(node);
    let role = node.role.clone().unwrap_or_else(|| match category {
        ElementCategory::Text => "text".to_string(),
        _ => "none".to_string(),
    });
    ElementDescriptor {
        role,
        accessible_name: node.name.trim().to_string(),
        selector_hint: selector_hint(node),
        bounding_state: if node.visible {
            BoundingState::Visible
        } else {
            BoundingState::Hidden
        },
        category,
    }
}

pub fn categorize(node: &AxNode) -> ElementCategory {
    let role = node.role.as_deref().unwrap_or_default();
    match (node.tag.as_str(), role) {
        ("input" | "textarea" | "select", _) | (_, "textbox" | "searchbox" | "combobox") => {
            ElementCategory::Input
        }
        ("button", _) | (_, "button") => ElementCategory::Button,
        ("a", _) | (_, "link") => ElementCategory::Link,
        ("img", _) | (_, "img") => ElementCategory::Image,
        ("nav" | "main" | "header" | "footer" | "form" | "aside", _)
        | (_, "navigation" | "main" | "banner" | "contentinfo" | "search" | "form") => {
            ElementCategory::Landmark
        }
        _ if !node.interactive && !node.name.trim().is_empty() => ElementCategory::Text,
        _ => ElementCategory::Other,
    }
}

/// Best-effort CSS selector for a node: id, then name, then aria-label,
/// then tag plus classes.
pub fn selector_hint(node: &AxNode) -> String {
    let tag = if node.tag.is_empty() { "*" } else { node.tag.as_str() };

    if let Some(id) = node.id.as_deref().filter(|id| is_css_ident(id)) {
        return format!("#{id}");
    }
    if let Some(name) = node.name_attr.as_deref().filter(|n| !n.is_empty()) {
        return format!("{tag}[name=\"{}\"]", escape_attr(name));
    }
    if let Some(label) = node.aria_label.as_deref().filter(|l| !l.is_empty()) {
        return format!("{tag}[aria-label=\"{}\"]", escape_attr(label));
    }
    let classes: Vec<&str> = node
        .classes
        .iter()
        .map(String::as_str)
        .filter(|c| is_css_ident(c))
        .collect();
    if classes.is_empty() {
        tag.to_string()
    } else {
        format!("{tag}.{}", classes.join("."))
    }
}

/// Identifiers usable unescaped after `#` or `.`. A leading `-` must be
/// followed by a letter or `_`.
fn is_css_ident(raw: &str) -> bool {
    let body = raw.strip_prefix('-').unwrap_or(raw);
    match body.chars().next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    body.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn escape_attr(raw: &str) -> String {
    raw.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Tries each source in order; never fails.
pub struct PageContextExtractor {
    sources: Vec<Box<dyn ContextSource>>,
}

impl PageContextExtractor {
    pub fn new(sources: Vec<Box<dyn ContextSource>>) -> Self {
        Self { sources }
    }

    /// Remote provider first when configured, then the accessibility walk.
    pub fn from_config(config: &AgentConfig) -> Self {
        let mut sources: Vec<Box<dyn ContextSource>> = Vec::new();
        if let Some(endpoint) = &config.context_provider_url {
            sources.push(Box::new(RemoteContextSource::new(
                endpoint.clone(),
                config.max_context_elements,
                config.step_timeout,
            )));
        }
        sources.push(Box::new(AccessibilityWalk::new(config.max_context_elements)));
        Self::new(sources)
    }

    pub async fn extract(&self, session: &dyn Session) -> PageContext {
        for source in &self.sources {
            match source.snapshot(session).await {
                Ok(context) => {
                    debug!(
                        source = source.name(),
                        elements = context.elements.len(),
                        truncated = context.truncated,
                        "page context captured"
                    );
                    return context;
                }
                Err(e) => warn!(source = source.name(), error = %e, "context source failed"),
            }
        }

        warn!("all context sources failed, using degraded context");
        let url = session.url().await.unwrap_or_default();
        let title = session.title().await.unwrap_or_default();
        PageContext::degraded(url, title)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(tag: &str) -> AxNode {
        AxNode {
            tag: tag.to_string(),
            visible: true,
            ..Default::default()
        }
    }

    #[test]
    fn selector_hint_prefers_id_then_name() {
        let mut search = node("input");
        search.id = Some("twotabsearchtextbox".into());
        search.name_attr = Some("field-keywords".into());
        assert_eq!(selector_hint(&search), "#twotabsearchtextbox");

        search.id = Some("1bad id".into());
        assert_eq!(selector_hint(&search), "input[name=\"field-keywords\"]");
    }

    #[test]
    fn ids_that_need_escaping_are_not_used() {
        for bad in ["-1x", "--x", "-", "9lives", "a b", ""] {
            assert!(!is_css_ident(bad), "{bad:?} accepted");
        }
        for good in ["-a", "_x", "nav-search", "a1"] {
            assert!(is_css_ident(good), "{good:?} rejected");
        }

        let mut input = node("input");
        input.id = Some("-1x".into());
        input.name_attr = Some("q".into());
        assert_eq!(selector_hint(&input), "input[name=\"q\"]");
    }

    #[test]
    fn selector_hint_falls_back_to_classes() {
        let mut link = node("a");
        link.classes = vec!["a-link-normal".into(), "md:hidden".into()];
        assert_eq!(selector_hint(&link), "a.a-link-normal");

        link.aria_label = Some("Go to \"cart\"".into());
        assert_eq!(selector_hint(&link), "a[aria-label=\"Go to \\\"cart\\\"\"]");
        assert_eq!(selector_hint(&node("div")), "div");
    }

    #[test]
    fn categories_follow_tag_and_role() {
        let mut div = node("div");
        div.role = Some("button".into());
        div.interactive = true;
        assert_eq!(categorize(&div), ElementCategory::Button);
        assert_eq!(categorize(&node("nav")), ElementCategory::Landmark);

        let mut span = node("span");
        span.name = "Results".into();
        assert_eq!(categorize(&span), ElementCategory::Text);
    }

    #[test]
    fn describe_nodes_caps_and_flags_truncation() {
        let nodes: Vec<AxNode> = (0..5)
            .map(|i| AxNode {
                name: format!("item {i}"),
                ..node("span")
            })
            .chain(std::iter::once(node("div")))
            .collect();

        let (elements, truncated) = describe_nodes(&nodes, 3);
        assert_eq!(elements.len(), 3);
        assert!(truncated);
        assert_eq!(elements[0].accessible_name, "item 0");

        let (elements, truncated) = describe_nodes(&nodes, 10);
        assert_eq!(elements.len(), 5, "nameless non-interactive nodes are dropped");
        assert!(!truncated);
    }
}
