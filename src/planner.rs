//! Goal + page context → validated [`Plan`].
//!
//! Model output is never trusted: it goes through parse, one bounded repair
//! pass, then per-step structural validation. Steps that fail validation are
//! returned as [`RejectedStep`]s instead of being executed.

use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::brain::{Generator, PromptPayload};
use crate::error::AgentError;
use crate::types::{Action, MAX_CONTEXT_CHARS, PageContext, Plan, PlanStep, RejectedStep};

const SYSTEM_PROMPT: &str = "You are a web automation planner. \
Given a user's goal and a structured snapshot of the current webpage, output ONLY a JSON array \
of steps that achieve the goal. Each step is an object with an \"action\" and, where needed, a \
\"target\". Supported actions: goto (target = absolute URL), fill (target = CSS selector, value = \
text to type), click (target = CSS selector), wait_for (target = CSS selector), scroll (optional \
target), extract (optional target = CSS selector of the result elements, optional limit). \
Optional \"timeoutMs\" overrides the step timeout, \"fallbacks\" lists alternate selectors for \
the same element, and \"optional\": true marks a step whose element may be absent. Prefer short, stable CSS selectors taken from \
the snapshot's selectorHint values. End with an extract step that reads the answer. \
No explanations, markdown, or prose: output pure JSON only.";

/// A validated plan plus the candidates dropped on the way.
#[derive(Debug, Clone)]
pub struct GeneratedPlan {
    pub plan: Plan,
    pub rejected: Vec<RejectedStep>,
}

pub struct PlanGenerator {
    generator: Box<dyn Generator>,
    timeout: Duration,
    max_context_chars: usize,
}

impl PlanGenerator {
    pub fn new(generator: Box<dyn Generator>, timeout: Duration) -> Self {
        Self {
            generator,
            timeout,
            max_context_chars: MAX_CONTEXT_CHARS,
        }
    }

    pub fn with_max_context_chars(mut self, max_context_chars: usize) -> Self {
        self.max_context_chars = max_context_chars;
        self
    }

    pub fn build_prompt(&self, goal: &str, context: &PageContext) -> PromptPayload {
        let context_json = bounded_context_json(context, self.max_context_chars);
        PromptPayload {
            system: SYSTEM_PROMPT.to_string(),
            user: format!(
                "User goal: {goal}\n\nPage context (JSON):\n{context_json}\n\n\
                 Output a JSON array of steps using only these keys: action, target, value, timeoutMs, limit, \
                 fallbacks, enterFallbacks, optional."
            ),
        }
    }

    pub async fn generate_plan(
        &self,
        goal: &str,
        context: &PageContext,
    ) -> Result<GeneratedPlan, AgentError> {
        let prompt = self.build_prompt(goal, context);

        let raw = tokio::time::timeout(self.timeout, self.generator.generate(&prompt))
            .await
            .map_err(|_| {
                AgentError::PlanGeneration(format!(
                    "generation timed out after {}ms",
                    self.timeout.as_millis()
                ))
            })?
            .map_err(|e| match e {
                AgentError::PlanGeneration(_) => e,
                other => AgentError::PlanGeneration(other.to_string()),
            })?;
        debug!(raw = %raw, "raw plan output");

        let candidates = parse_candidates(&raw)?;
        let total = candidates.len();
        let (steps, rejected) = validate_candidates(candidates, goal);
        for r in &rejected {
            warn!(position = r.position, reason = %r.reason, "dropping plan step");
        }
        info!(total, accepted = steps.len(), rejected = rejected.len(), "plan validated");

        if steps.is_empty() {
            return Err(AgentError::PlanGeneration(format!(
                "no valid steps in model output ({} rejected)",
                rejected.len()
            )));
        }
        Ok(GeneratedPlan {
            plan: Plan::new(steps)?,
            rejected,
        })
    }
}

/// Serialize `context` compactly, dropping trailing elements until it fits in
/// `max_chars`. Dropping anything forces `truncated` on.
pub fn bounded_context_json(context: &PageContext, max_chars: usize) -> String {
    let mut bounded = context.clone();
    loop {
        let json = serde_json::to_string(&bounded).unwrap_or_default();
        if json.len() <= max_chars || bounded.elements.is_empty() {
            return json;
        }
        bounded.elements.pop();
        bounded.truncated = true;
    }
}

/// Parse raw model text into candidate step values, with one repair attempt.
pub fn parse_candidates(raw: &str) -> Result<Vec<Value>, AgentError> {
    let value = match serde_json::from_str::<Value>(raw.trim()) {
        Ok(value) => value,
        Err(first) => {
            let repaired = repair(raw).ok_or_else(|| {
                AgentError::PlanGeneration(format!("model output is not JSON: {first}"))
            })?;
            debug!(repaired = %repaired, "repaired plan output");
            serde_json::from_str(&repaired).map_err(|e| {
                AgentError::PlanGeneration(format!("model output is not JSON even after repair: {e}"))
            })?
        }
    };

    match value {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => match map.remove("steps") {
            Some(Value::Array(items)) => Ok(items),
            Some(_) => Err(AgentError::PlanGeneration("'steps' is not an array".into())),
            None if map.contains_key("action") => Ok(vec![Value::Object(map)]),
            None => Err(AgentError::PlanGeneration("object output has no 'steps'".into())),
        },
        _ => Err(AgentError::PlanGeneration("model output is not a list of steps".into())),
    }
}

/// Strip markdown fences and surrounding prose, keeping the outermost JSON
/// array (or object when there is no array).
fn repair(raw: &str) -> Option<String> {
    let mut text = raw.trim();
    if let Some(rest) = text.strip_prefix("```") {
        text = rest.trim_start_matches(|c: char| c.is_ascii_alphabetic());
        text = text.trim_end().trim_end_matches("```");
    }
    let text = text.trim();

    let slice = |open: char, close: char| {
        let start = text.find(open)?;
        let end = text.rfind(close)?;
        (start < end).then(|| text[start..=end].to_string())
    };
    slice('[', ']').or_else(|| slice('{', '}'))
}

/// Split candidates into accepted steps and rejected ones, preserving order.
pub fn validate_candidates(candidates: Vec<Value>, goal: &str) -> (Vec<PlanStep>, Vec<RejectedStep>) {
    let mut steps = Vec::new();
    let mut rejected = Vec::new();
    for (position, raw) in candidates.into_iter().enumerate() {
        match validate_step(&raw, goal) {
            Ok(step) => steps.push(step),
            Err(reason) => rejected.push(RejectedStep {
                position,
                raw,
                reason,
            }),
        }
    }
    (steps, rejected)
}

fn string_field<'a>(raw: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|k| raw.get(*k))
        .filter_map(Value::as_str)
        .map(str::trim)
        .find(|s| !s.is_empty())
}

fn integer_field(raw: &Value, keys: &[&str]) -> Result<Option<u64>, String> {
    match keys.iter().find_map(|k| raw.get(*k).filter(|v| !v.is_null()).map(|v| (*k, v))) {
        None => Ok(None),
        Some((key, value)) => value
            .as_u64()
            .map(Some)
            .ok_or_else(|| format!("{key} must be a non-negative integer")),
    }
}

fn validate_step(raw: &Value, goal: &str) -> Result<PlanStep, String> {
    if !raw.is_object() {
        return Err("step is not an object".into());
    }
    let name = string_field(raw, &["action"]).ok_or("missing action")?;
    let action = Action::parse(name).ok_or_else(|| format!("unknown action '{name}'"))?;

    let target = string_field(raw, &["target", "selector", "url"]).map(str::to_string);
    if action.requires_target() && target.is_none() {
        return Err(format!("{} requires a target", action.as_str()));
    }
    if action == Action::Goto {
        let url = target.as_deref().unwrap_or_default();
        match url::Url::parse(url) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
            _ => return Err(format!("goto target '{url}' is not an absolute http(s) URL")),
        }
    }

    let mut value = match raw.get("value") {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    };
    if action == Action::Fill && value.is_none() && !goal.trim().is_empty() {
        value = Some(goal.trim().to_string());
    }

    Ok(PlanStep {
        index: 0,
        action,
        target,
        value,
        timeout_ms: integer_field(raw, &["timeoutMs", "timeout_ms"])?,
        limit: integer_field(raw, &["limit"])?.map(|n| n as usize),
        fallbacks: selector_list(raw, &["fallbacks"])?,
        enter_fallbacks: selector_list(raw, &["enterFallbacks", "enter_fallbacks"])?,
        optional: raw.get("optional").and_then(Value::as_bool).unwrap_or(false),
    })
}

fn selector_list(raw: &Value, keys: &[&str]) -> Result<Vec<String>, String> {
    match keys.iter().find_map(|k| raw.get(*k).filter(|v| !v.is_null()).map(|v| (*k, v))) {
        None => Ok(Vec::new()),
        Some((_, Value::Array(items))) => Ok(items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()),
        Some((key, _)) => Err(format!("{key} must be a list of selectors")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BoundingState, ElementCategory, ElementDescriptor};
    use serde_json::json;

    #[test]
    fn parses_bare_array_and_steps_object() {
        assert_eq!(parse_candidates(r#"[{"action":"goto"}]"#).unwrap().len(), 1);
        assert_eq!(
            parse_candidates(r#"{"steps":[{"action":"click"},{"action":"scroll"}]}"#)
                .unwrap()
                .len(),
            2
        );
    }

    #[test]
    fn repairs_fenced_and_wrapped_output() {
        let fenced = "```json\n[{\"action\":\"scroll\"}]\n```";
        assert_eq!(parse_candidates(fenced).unwrap().len(), 1);

        let chatty = "Sure! Here is the plan:\n[{\"action\":\"extract\"}]\nGood luck.";
        assert_eq!(parse_candidates(chatty).unwrap().len(), 1);
    }

    #[test]
    fn unrepairable_output_is_a_generation_error() {
        let err = parse_candidates("I cannot help with that.").unwrap_err();
        assert!(matches!(err, AgentError::PlanGeneration(_)));
        assert!(parse_candidates("[{\"action\": ").is_err());
        assert!(parse_candidates("42").is_err());
    }

    #[test]
    fn validation_drops_unknown_and_incomplete_steps() {
        let candidates = vec![
            json!({"action": "goto", "selector": "https://www.example.com"}),
            json!({"action": "hover", "target": "#menu"}),
            json!({"action": "click"}),
            json!({"action": "goto", "target": "/relative"}),
            json!("click #buy"),
            json!({"action": "Wait_For", "target": "#results", "timeout_ms": 500}),
            json!({"action": "extract", "limit": 3}),
        ];
        let (steps, rejected) = validate_candidates(candidates, "laptop");

        let actions: Vec<Action> = steps.iter().map(|s| s.action).collect();
        assert_eq!(actions, vec![Action::Goto, Action::WaitFor, Action::Extract]);
        assert_eq!(steps[0].target.as_deref(), Some("https://www.example.com"));
        assert_eq!(steps[1].timeout_ms, Some(500));
        assert_eq!(steps[2].limit, Some(3));

        let positions: Vec<usize> = rejected.iter().map(|r| r.position).collect();
        assert_eq!(positions, vec![1, 2, 3, 4]);
        assert!(rejected[0].reason.contains("hover"));
    }

    #[test]
    fn fill_without_value_types_the_goal() {
        let (steps, _) = validate_candidates(vec![json!({"action": "fill", "target": "#q"})], "usb hub");
        assert_eq!(steps[0].value.as_deref(), Some("usb hub"));
    }

    #[test]
    fn fallbacks_and_optional_flag_are_kept() {
        let (steps, rejected) = validate_candidates(
            vec![
                json!({"action": "click", "target": "#go", "fallbacks": ["input[type='submit']", " ", 3],
                       "enterFallbacks": ["#q"], "optional": true}),
                json!({"action": "click", "target": "#go", "fallbacks": "#other"}),
            ],
            "x",
        );
        assert_eq!(steps[0].fallbacks, vec!["input[type='submit']".to_string()]);
        assert_eq!(steps[0].enter_fallbacks, vec!["#q".to_string()]);
        assert!(steps[0].optional);
        assert!(rejected[0].reason.contains("fallbacks"));
    }

    #[test]
    fn bad_timeout_rejects_step() {
        let (steps, rejected) =
            validate_candidates(vec![json!({"action": "scroll", "timeoutMs": "soon"})], "x");
        assert!(steps.is_empty());
        assert!(rejected[0].reason.contains("timeoutMs"));
    }

    #[test]
    fn context_is_trimmed_to_budget() {
        let element = ElementDescriptor {
            role: "link".into(),
            accessible_name: "A fairly long link name for padding".into(),
            selector_hint: "a.result".into(),
            bounding_state: BoundingState::Visible,
            category: ElementCategory::Link,
        };
        let context = PageContext {
            url: "https://www.example.com".into(),
            title: "Example".into(),
            elements: vec![element; 50],
            truncated: false,
        };

        let json = bounded_context_json(&context, 1000);
        assert!(json.len() <= 1000);
        let parsed: PageContext = serde_json::from_str(&json).unwrap();
        assert!(parsed.truncated);
        assert!(parsed.elements.len() < 50);

        let roomy: PageContext = serde_json::from_str(&bounded_context_json(&context, 100_000)).unwrap();
        assert!(!roomy.truncated);
    }

    struct Unused;

    #[async_trait::async_trait]
    impl Generator for Unused {
        async fn generate(&self, _prompt: &PromptPayload) -> Result<String, AgentError> {
            Err(AgentError::PlanGeneration("not called".into()))
        }
    }

    #[test]
    fn prompt_context_follows_configured_budget() {
        let elements = (0..20)
            .map(|i| ElementDescriptor {
                role: "link".into(),
                accessible_name: format!("item-{i}"),
                selector_hint: format!("a#item-{i}"),
                bounding_state: BoundingState::Visible,
                category: ElementCategory::Link,
            })
            .collect();
        let context = PageContext {
            url: "https://www.example.com".into(),
            title: "Example".into(),
            elements,
            truncated: false,
        };
        let tight = PlanGenerator::new(Box::new(Unused), Duration::from_secs(1))
            .with_max_context_chars(300)
            .build_prompt("laptop", &context);
        let roomy = PlanGenerator::new(Box::new(Unused), Duration::from_secs(1))
            .build_prompt("laptop", &context);

        assert!(roomy.user.contains("item-19"));
        assert!(!tight.user.contains("item-19"));
        assert!(tight.user.contains(r#""truncated":true"#));
    }
}
