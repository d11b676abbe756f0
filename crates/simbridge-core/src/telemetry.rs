//! Tracing initialisation for simbridge binaries.
//!
//! Call [`init_tracing`] once at program start. Later calls are ignored
//! because the global subscriber can only be installed once per process.
//!
//! Filter directives come from `SIMBRIDGE_LOG`, then `RUST_LOG`. Without
//! either, only simbridge crates log at the requested level; HTTP and runtime
//! dependencies stay at `warn`.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

pub const LOG_ENV: &str = "SIMBRIDGE_LOG";

const OWN_TARGETS: [&str; 3] = ["simbridge_core", "simbridged", "simbridge"];

/// Install the global subscriber.
///
/// * `json`: emit newline-delimited JSON, including the enclosing request span.
/// * `level`: verbosity for simbridge targets when no directives are set.
pub fn init_tracing(json: bool, level: Level) {
    let directives = std::env::var(LOG_ENV)
        .or_else(|_| std::env::var(EnvFilter::DEFAULT_ENV))
        .ok();

    tracing_subscriber::registry()
        .with(build_filter(directives.as_deref(), level))
        .with(json.then(|| fmt::layer().with_target(false).json().with_current_span(true)))
        .with((!json).then(|| fmt::layer().with_target(false)))
        .try_init()
        .ok();
}

/// Parse `directives`, falling back to the scoped default when absent or invalid.
fn build_filter(directives: Option<&str>, level: Level) -> EnvFilter {
    directives
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new(default_directives(level)))
}

fn default_directives(level: Level) -> String {
    let level = level.as_str().to_ascii_lowercase();
    let mut out = String::from("warn");
    for target in OWN_TARGETS {
        out.push_str(&format!(",{target}={level}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_twice_is_harmless() {
        init_tracing(false, Level::DEBUG);
        init_tracing(true, Level::INFO);
        tracing::info!("still logging");
    }

    #[test]
    fn test_default_scopes_level_to_own_crates() {
        assert_eq!(
            default_directives(Level::DEBUG),
            "warn,simbridge_core=debug,simbridged=debug,simbridge=debug"
        );
    }

    #[test]
    fn test_explicit_directives_win() {
        let filter = build_filter(Some("simbridged=trace"), Level::INFO).to_string();
        assert!(filter.to_ascii_lowercase().contains("simbridged=trace"));
        assert!(!filter.to_ascii_lowercase().contains("simbridge_core"));
    }

    #[test]
    fn test_invalid_directives_fall_back_to_default() {
        let filter = build_filter(Some("simbridge_core=[{"), Level::INFO).to_string();
        assert!(filter.to_ascii_lowercase().contains("simbridge_core=info"));
    }
}
