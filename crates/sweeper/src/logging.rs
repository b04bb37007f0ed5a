//! Tracing setup.
//!
//! Logs go to stderr: stdout may be carrying the worker frame protocol.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when `RUST_LOG` is unset, from a `SWEEPER_LOG` level.
fn default_filter(level: Option<&str>) -> String {
    let level = match level {
        Some("debug") => "debug",
        Some("warn") | Some("warning") => "warn",
        Some("error") => "error",
        Some("trace") => "trace",
        _ => "info",
    };
    format!("sweeper={level}")
}

/// Install the global subscriber. A second call is a no-op.
///
/// `RUST_LOG` wins when set. Otherwise `SWEEPER_LOG` picks the level for
/// the `sweeper` target. `LOG_FORMAT=json` emits one JSON object per event.
pub fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(default_filter(std::env::var("SWEEPER_LOG").ok().as_deref()))
    };

    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    if use_json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_levels() {
        assert_eq!(default_filter(None), "sweeper=info");
        assert_eq!(default_filter(Some("debug")), "sweeper=debug");
        assert_eq!(default_filter(Some("warning")), "sweeper=warn");
        assert_eq!(default_filter(Some("bogus")), "sweeper=info");
    }

    #[test]
    fn init_twice_is_harmless() {
        init_tracing();
        init_tracing();
        tracing::info!("still alive");
    }
}
