use agentic_rpa::{TaskOrchestrator, TaskResult};
use anyhow::{Context, Result};
use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::{get, post};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<TaskOrchestrator>,
    /// One permit per concurrently running browser session.
    pub permits: Arc<Semaphore>,
    pub default_headless: bool,
}

#[derive(Deserialize)]
struct RunRequest {
    goal: String,
    headless: Option<bool>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/health", get(|| async { Json(json!({"status": "ok"})) }))
        .route("/run-core", post(run_core_handler))
        .route("/run-ai", post(run_ai_handler))
        .route("/favicon.ico", get(|| async { StatusCode::NO_CONTENT }))
        .with_state(Arc::new(state))
}

pub async fn serve(state: AppState, bind_addr: &str) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("could not bind {bind_addr}"))?;
    info!("API running at http://{}", listener.local_addr()?);
    axum::serve(listener, router(state))
        .await
        .context("server stopped")?;
    Ok(())
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn run_core_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RunRequest>,
) -> Result<Json<TaskResult>, (StatusCode, String)> {
    info!(goal = %req.goal, "POST /run-core");
    let _permit = acquire(&state).await?;
    let headless = req.headless.unwrap_or(state.default_headless);
    Ok(Json(state.orchestrator.run_fixed_task(&req.goal, headless).await))
}

async fn run_ai_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RunRequest>,
) -> Result<Json<TaskResult>, (StatusCode, String)> {
    info!(goal = %req.goal, "POST /run-ai");
    let _permit = acquire(&state).await?;
    let headless = req.headless.unwrap_or(state.default_headless);
    Ok(Json(state.orchestrator.run_planned_task(&req.goal, headless).await))
}

async fn acquire(
    state: &AppState,
) -> Result<tokio::sync::OwnedSemaphorePermit, (StatusCode, String)> {
    state
        .permits
        .clone()
        .acquire_owned()
        .await
        .map_err(|_| (StatusCode::SERVICE_UNAVAILABLE, "server shutting down".to_string()))
}

const INDEX_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>Web Automation Agent</title>
<style>
  body { font: 15px/1.45 system-ui, sans-serif; background: #101014; color: #ddd; max-width: 760px; margin: 32px auto; padding: 0 20px; }
  h1 { font-size: 19px; color: #fafafa; margin: 0 0 14px; }
  form { display: flex; gap: 6px; margin-bottom: 14px; }
  #goal { flex: 1; padding: 10px 12px; border-radius: 6px; border: 1px solid #2a2a33; background: #17171d; color: #fafafa; }
  button { padding: 10px 14px; border-radius: 6px; border: 0; background: #4f46e5; color: #fff; cursor: pointer; }
  button:disabled { opacity: .45; cursor: wait; }
  .entry { margin: 0 0 6px; padding: 8px 12px; border-radius: 6px; border-left: 3px solid; }
  .entry.step { border-color: #3b82f6; background: #15151b; font-family: ui-monospace, monospace; }
  .entry.failed { border-color: #ef4444; background: #1c1012; color: #fca5a5; }
  .entry.done { border-color: #22c55e; background: #0f1a12; color: #86efac; }
</style>
</head>
<body>
  <h1>Web Automation Agent</h1>
  <form onsubmit="return false">
    <input type="text" id="goal" placeholder="e.g. cheapest usb-c hub under $30" autofocus />
    <button onclick="run('/run-core')">Search</button>
    <button onclick="run('/run-ai')">Plan &amp; run</button>
  </form>
  <div id="log"></div>
<script>
  const log = document.getElementById('log');
  const esc = (s) => String(s).replace(/</g, '&lt;');

  const entry = (cls, html) =>
    log.insertAdjacentHTML('beforeend', `<div class="entry ${cls}">${html}</div>`);

  async function run(path) {
    const goal = document.getElementById('goal').value.trim();
    if (!goal) return;
    document.querySelectorAll('button').forEach(b => b.disabled = true);
    log.innerHTML = '';
    entry('step', 'Running...');
    try {
      const res = await fetch(path, {
        method: 'POST',
        headers: {'Content-Type': 'application/json'},
        body: JSON.stringify({goal}),
      });
      const result = await res.json();
      log.innerHTML = '';
      for (const s of result.trace.steps) {
        const cls = s.status === 'failed' ? 'failed' : 'step';
        const err = s.error ? ' - ' + esc(s.error.message) : '';
        entry(cls, esc(s.step.index + ': ' + s.step.action + ' ' + (s.step.target || '')) + ' [' + s.status + ', ' + s.durationMs + 'ms]' + err);
      }
      entry(result.success ? 'done' : 'failed', esc(result.message));
    } catch (e) {
      entry('failed', esc(e));
    }
    document.querySelectorAll('button').forEach(b => b.disabled = false);
  }
</script>
</body>
</html>
"##;
