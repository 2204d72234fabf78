//! Tracing subscriber setup.
//!
//! Logs go to stderr so command output on stdout stays pipeable. The filter
//! comes from `RUST_LOG`, then `LOG_LEVEL`, then defaults to `info`; `sqlx`
//! and `hyper` are capped at `warn` unless `RUST_LOG` says otherwise.

use tracing_subscriber::EnvFilter;

const QUIET_TARGETS: &str = "sqlx=warn,hyper=warn";

/// Filter directives for the given environment values.
pub fn filter_directives(rust_log: Option<&str>, log_level: Option<&str>) -> String {
    if let Some(custom) = rust_log.filter(|s| !s.trim().is_empty()) {
        return custom.to_string();
    }
    let level = log_level
        .map(|l| l.trim().to_ascii_lowercase())
        .filter(|l| !l.is_empty())
        .unwrap_or_else(|| "info".to_string());
    format!("{},{}", level, QUIET_TARGETS)
}

/// Install the global subscriber. Safe to call more than once; later calls
/// are no-ops.
pub fn init_tracing() {
    let rust_log = std::env::var("RUST_LOG").ok();
    let log_level = std::env::var("LOG_LEVEL").ok();
    let directives = filter_directives(rust_log.as_deref(), log_level.as_deref());
    let filter = EnvFilter::try_new(&directives).unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(atty::is(atty::Stream::Stderr))
        .try_init();
}
