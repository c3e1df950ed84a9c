//! Tracing setup.
//!
//! `RUST_LOG` takes precedence. Otherwise `SLOTGATE_LOG` selects the level for
//! this crate (default info). `LOG_FORMAT=json` switches stderr output to JSON
//! lines.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    fn from_env_value(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Text,
        }
    }

    pub fn from_env() -> Self {
        Self::from_env_value(std::env::var("LOG_FORMAT").ok().as_deref())
    }
}

/// Filter directive for a `SLOTGATE_LOG` value.
fn level_directive(level: Option<&str>) -> String {
    let level = match level.map(str::to_ascii_lowercase).as_deref() {
        Some("trace") => "trace",
        Some("debug") => "debug",
        Some("warn") | Some("warning") => "warn",
        Some("error") => "error",
        _ => "info",
    };
    format!("slotgate={level}")
}

fn filter() -> EnvFilter {
    if std::env::var("RUST_LOG").is_ok() {
        return EnvFilter::from_default_env();
    }
    EnvFilter::new(level_directive(std::env::var("SLOTGATE_LOG").ok().as_deref()))
}

/// Install the global subscriber on stderr. Later calls are ignored.
pub fn init_tracing() {
    let format = LogFormat::from_env();
    let json = (format == LogFormat::Json).then(|| fmt::layer().json().with_writer(std::io::stderr));
    let text = (format == LogFormat::Text).then(|| fmt::layer().with_writer(std::io::stderr));

    let _ = tracing_subscriber::registry()
        .with(filter())
        .with(json)
        .with(text)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_directive_defaults_to_info() {
        assert_eq!(level_directive(None), "slotgate=info");
        assert_eq!(level_directive(Some("verbose")), "slotgate=info");
        assert_eq!(level_directive(Some("DEBUG")), "slotgate=debug");
        assert_eq!(level_directive(Some("warning")), "slotgate=warn");
    }

    #[test]
    fn log_format_selection() {
        assert_eq!(LogFormat::from_env_value(None), LogFormat::Text);
        assert_eq!(LogFormat::from_env_value(Some("json")), LogFormat::Json);
        assert_eq!(LogFormat::from_env_value(Some("JSON")), LogFormat::Json);
        assert_eq!(LogFormat::from_env_value(Some("pretty")), LogFormat::Text);
    }

    #[test]
    fn init_is_idempotent() {
        init_tracing();
        init_tracing();
        tracing::info!("still logging");
    }
}
