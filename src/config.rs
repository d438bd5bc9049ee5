use anyhow::{Context, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::trace::TRACE_FILE;
use crate::types::{MAX_CONTEXT_CHARS, MAX_CONTEXT_ELEMENTS};

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_STORE_URL: &str = "https://www.amazon.com";

/// Settings read from the environment (and `.env`, loaded by the binaries).
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub openai_base_url: String,
    pub headless: bool,
    pub trace_path: PathBuf,
    pub context_provider_url: Option<String>,
    pub chrome_path: Option<PathBuf>,
    pub chrome_debug_url: Option<String>,
    pub store_url: String,
    pub run_timeout: Duration,
    pub step_timeout: Duration,
    pub generation_timeout: Duration,
    pub max_context_elements: usize,
    /// Size budget for the serialized context sent to the model.
    pub max_context_chars: usize,
    pub max_concurrent_runs: usize,
    pub bind_addr: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            openai_model: DEFAULT_MODEL.to_string(),
            openai_base_url: DEFAULT_BASE_URL.to_string(),
            headless: true,
            trace_path: PathBuf::from(TRACE_FILE),
            context_provider_url: None,
            chrome_path: None,
            chrome_debug_url: None,
            store_url: DEFAULT_STORE_URL.to_string(),
            run_timeout: Duration::from_secs(180),
            step_timeout: Duration::from_millis(15_000),
            generation_timeout: Duration::from_secs(60),
            max_context_elements: MAX_CONTEXT_ELEMENTS,
            max_context_chars: MAX_CONTEXT_CHARS,
            max_concurrent_runs: 1,
            bind_addr: "127.0.0.1:8000".to_string(),
        }
    }
}

impl AgentConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from any key lookup. Unset or blank keys keep defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Self::default();

        config.openai_api_key = get("OPENAI_API_KEY");
        if let Some(model) = get("OPENAI_MODEL") {
            config.openai_model = model;
        }
        if let Some(base) = get("OPENAI_BASE_URL") {
            config.openai_base_url = base.trim_end_matches('/').to_string();
        }
        if let Some(raw) = get("HEADLESS") {
            config.headless = parse_flag(&raw);
        }
        if let Some(path) = get("TRACE_PATH") {
            config.trace_path = PathBuf::from(path);
        }
        config.context_provider_url = get("CONTEXT_PROVIDER_URL");
        config.chrome_path = get("CHROME_PATH").map(PathBuf::from);
        config.chrome_debug_url = get("CHROME_DEBUG_URL");
        if let Some(url) = get("STORE_URL") {
            config.store_url = url;
        }
        if let Some(secs) = parse_number::<u64>(&get, "RUN_TIMEOUT_SECS")? {
            config.run_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = parse_number::<u64>(&get, "STEP_TIMEOUT_MS")? {
            config.step_timeout = Duration::from_millis(ms);
        }
        if let Some(secs) = parse_number::<u64>(&get, "GENERATION_TIMEOUT_SECS")? {
            config.generation_timeout = Duration::from_secs(secs);
        }
        if let Some(n) = parse_number::<usize>(&get, "MAX_CONTEXT_ELEMENTS")? {
            config.max_context_elements = n.max(1);
        }
        if let Some(n) = parse_number::<usize>(&get, "MAX_CONTEXT_CHARS")? {
            config.max_context_chars = n.max(256);
        }
        if let Some(n) = parse_number::<usize>(&get, "MAX_CONCURRENT_RUNS")? {
            config.max_concurrent_runs = n.max(1);
        }
        if let Some(addr) = get("BIND_ADDR") {
            config.bind_addr = addr;
        }
        Ok(config)
    }
}

/// `1`, `true` and `yes` (any case) are truthy; everything else is false.
pub fn parse_flag(raw: &str) -> bool {
    matches!(raw.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes")
}

fn parse_number<T>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    get(key)
        .map(|raw| raw.parse::<T>().with_context(|| format!("{key} must be a number, got '{raw}'")))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = AgentConfig::from_lookup(lookup(&[])).unwrap();
        assert!(config.headless);
        assert_eq!(config.openai_model, DEFAULT_MODEL);
        assert_eq!(config.trace_path, PathBuf::from("trace.json"));
        assert_eq!(config.max_context_elements, 100);
        assert!(config.openai_api_key.is_none());
    }

    #[test]
    fn overrides_are_parsed() {
        let config = AgentConfig::from_lookup(lookup(&[
            ("HEADLESS", "No"),
            ("STEP_TIMEOUT_MS", "2500"),
            ("MAX_CONTEXT_CHARS", "9000"),
            ("OPENAI_BASE_URL", "http://localhost:8080/v1/"),
            ("CONTEXT_PROVIDER_URL", "  "),
        ]))
        .unwrap();
        assert!(!config.headless);
        assert_eq!(config.step_timeout, Duration::from_millis(2500));
        assert_eq!(config.max_context_chars, 9000);
        assert_eq!(config.openai_base_url, "http://localhost:8080/v1");
        assert!(config.context_provider_url.is_none());
    }

    #[test]
    fn bad_numbers_are_reported() {
        let err = AgentConfig::from_lookup(lookup(&[("RUN_TIMEOUT_SECS", "soon")])).unwrap_err();
        assert!(err.to_string().contains("RUN_TIMEOUT_SECS"));
    }

    #[test]
    fn flags_accept_common_truthy_values() {
        assert!(parse_flag("YES"));
        assert!(parse_flag("1"));
        assert!(!parse_flag("off"));
    }
}
