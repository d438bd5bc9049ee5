//! Goal-driven browser automation.
//!
//! A goal becomes a plan of browser steps ([`planner`]), the plan runs against
//! a live page ([`executor`]), and every run yields a [`TaskResult`] plus a
//! persisted [`ExecutionTrace`]. Callers go through [`TaskOrchestrator`].

pub mod brain;
pub mod config;
pub mod context;
pub mod dom;
pub mod error;
pub mod executor;
pub mod hands;
pub mod orchestrator;
pub mod planner;
pub mod ranking;
pub mod session;
pub mod trace;
pub mod types;

pub use config::AgentConfig;
pub use error::{AgentError, ErrorKind};
pub use orchestrator::TaskOrchestrator;
pub use trace::ExecutionTrace;
pub use types::TaskResult;

/// Install the stderr log subscriber used by the binaries. `RUST_LOG`
/// overrides the default `info` filter.
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
