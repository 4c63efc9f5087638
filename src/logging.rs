use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs a global subscriber. `RUST_LOG` overrides the default filter and
/// `MAILEXPORT_LOG_FORMAT=pretty` switches from JSON to human-readable output.
///
/// Returns false if a subscriber was already installed, e.g. by the host
/// application.
pub fn init_logging() -> bool {
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "mailexport=info".to_string());
    let log_format = std::env::var("MAILEXPORT_LOG_FORMAT").unwrap_or_else(|_| "json".to_string());

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_level));

    if log_format == "json" {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json())
            .try_init()
            .is_ok()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().pretty())
            .try_init()
            .is_ok()
    }
}
