//! Logging setup for the `cmdrelay` binary.
//!
//! The default filter enables the server crate and `cmdrelay_core` at the
//! configured `log_level`; `RUST_LOG` replaces it entirely. Every line logged
//! inside a relay session carries the listener's `session` span, so its
//! `session_id` and `peer` fields show up in both the text and the
//! `--log-json` output.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Build the default filter directive for a crate at a given level.
///
/// `filter_for("cmdrelay_server", "debug")` yields
/// `"cmdrelay_server=debug,cmdrelay_core=debug"`.
pub fn filter_for(crate_name: &str, level: &str) -> String {
    format!("{crate_name}={level},cmdrelay_core={level}")
}

/// Initialise the global tracing subscriber.
///
/// * `default_filter` -- default `RUST_LOG` value when the env-var is not set
///   (e.g. `"cmdrelay_server=info"`).
/// * `log_json` -- when `true`, emit structured JSON log lines instead of the
///   human-readable format.
pub fn init_tracing(default_filter: &str, log_json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
    );
    if log_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
