mod common;

use agentic_rpa::context::{
    AccessibilityWalk, ContextSource, PageContextExtractor, RemoteContextSource,
};
use agentic_rpa::error::AgentError;
use agentic_rpa::session::Session;
use agentic_rpa::types::{ElementCategory, PageContext};
use async_trait::async_trait;
use common::{FakeSession, PageState, ax};
use std::time::Duration;

struct Unavailable;

#[async_trait]
impl ContextSource for Unavailable {
    fn name(&self) -> &'static str {
        "unavailable"
    }

    async fn snapshot(&self, _session: &dyn Session) -> Result<PageContext, AgentError> {
        Err(AgentError::Extraction("provider offline".into()))
    }
}

fn session_with_tree(nodes: Option<Vec<agentic_rpa::types::AxNode>>) -> FakeSession {
    let mut page = PageState {
        url: "https://store.test/".into(),
        title: "Store".into(),
        ..Default::default()
    };
    page.ax_nodes = nodes;
    FakeSession::new(page)
}

#[tokio::test]
async fn falls_back_to_the_next_source() {
    let session = session_with_tree(Some(vec![
        ax("input", "Search", true),
        ax("div", "", false),
        ax("a", "Deals", true),
    ]));
    let extractor = PageContextExtractor::new(vec![
        Box::new(Unavailable),
        Box::new(AccessibilityWalk::new(100)),
    ]);

    let context = extractor.extract(&session).await;

    assert_eq!(context.url, "https://store.test/");
    assert_eq!(context.title, "Store");
    assert!(!context.truncated);
    let names: Vec<&str> = context
        .elements
        .iter()
        .map(|e| e.accessible_name.as_str())
        .collect();
    assert_eq!(names, ["Search", "Deals"]);
    assert_eq!(context.elements[0].category, ElementCategory::Input);
}

#[tokio::test]
async fn unreachable_remote_provider_falls_back_to_walk() {
    let session = session_with_tree(Some(vec![ax("button", "Buy", true)]));
    let extractor = PageContextExtractor::new(vec![
        Box::new(RemoteContextSource::new(
            "http://127.0.0.1:9/context",
            100,
            Duration::from_millis(500),
        )),
        Box::new(AccessibilityWalk::new(100)),
    ]);

    let context = extractor.extract(&session).await;

    assert_eq!(context.elements.len(), 1);
    assert_eq!(context.elements[0].accessible_name, "Buy");
}

#[tokio::test]
async fn all_sources_failing_yields_degraded_context() {
    let session = session_with_tree(None);
    let extractor = PageContextExtractor::new(vec![
        Box::new(Unavailable),
        Box::new(AccessibilityWalk::new(100)),
    ]);

    let context = extractor.extract(&session).await;

    assert_eq!(context.url, "https://store.test/");
    assert!(context.elements.is_empty());
    assert!(context.truncated);
}

#[tokio::test]
async fn walk_respects_element_cap() {
    let nodes = (0..10).map(|i| ax("a", &format!("link {i}"), true)).collect();
    let session = session_with_tree(Some(nodes));

    let context = AccessibilityWalk::new(4).snapshot(&session).await.unwrap();

    assert_eq!(context.elements.len(), 4);
    assert!(context.truncated);
    assert_eq!(context.elements[3].accessible_name, "link 3");
}
