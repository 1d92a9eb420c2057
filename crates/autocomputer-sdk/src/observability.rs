use std::path::PathBuf;

use once_cell::sync::OnceCell;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

static INIT: OnceCell<()> = OnceCell::new();

const ENABLED_KEYS: [&str; 2] = [
    "AUTOCOMPUTER_OBSERVABILITY_ENABLED",
    "AUTOCOMPUTER_OBSERVABILITY",
];
const LOG_LEVEL_KEY: &str = "AUTOCOMPUTER_LOG_LEVEL";
const JSON_LOG_PATH_KEY: &str = "AUTOCOMPUTER_JSON_LOG_PATH";
const DEFAULT_JSON_LOG_FILE: &str = "autocomputer.logs.jsonl";

/// Logging setup resolved from the environment.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ObservabilityConfig {
    pub enabled: bool,
    /// `EnvFilter` directive; falls back to `RUST_LOG`, then `info`.
    pub level: Option<String>,
    /// When set, logs are written as JSONL to this file instead of stdout.
    pub json_log_path: Option<PathBuf>,
}

impl ObservabilityConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let enabled = ENABLED_KEYS
            .iter()
            .find_map(|key| lookup(key))
            .map(|value| parse_bool_env(&value).unwrap_or(true))
            .unwrap_or(true);
        Self {
            enabled,
            level: lookup(LOG_LEVEL_KEY).filter(|v| !v.trim().is_empty()),
            json_log_path: lookup(JSON_LOG_PATH_KEY)
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
        }
    }

    fn env_filter(&self) -> tracing_subscriber::EnvFilter {
        if let Some(level) = &self.level
            && let Ok(filter) = tracing_subscriber::EnvFilter::try_new(level)
        {
            return filter;
        }
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    }
}

fn parse_bool_env(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enabled" => Some(true),
        "0" | "false" | "no" | "off" | "disabled" => Some(false),
        _ => None,
    }
}

/// Installs a global `tracing` subscriber once per process.
///
/// Environment variables:
/// - `AUTOCOMPUTER_OBSERVABILITY_ENABLED` / `AUTOCOMPUTER_OBSERVABILITY`: enable flag (default enabled).
/// - `AUTOCOMPUTER_LOG_LEVEL`: level or filter directive (`info`, `autocomputer_sdk=debug`, ...).
/// - `AUTOCOMPUTER_JSON_LOG_PATH`: JSONL log file. Unset means compact console output on stdout.
/// - `RUST_LOG`: filter used when no level is set.
///
/// Applications that install their own subscriber should not call this.
pub fn init_observability() {
    init_with(ObservabilityConfig::from_env());
}

/// Like [`init_observability`] with an explicit configuration.
pub fn init_with(config: ObservabilityConfig) {
    INIT.get_or_init(|| {
        if !config.enabled {
            return;
        }

        let env_filter = config.env_filter();
        match &config.json_log_path {
            Some(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    let _ = std::fs::create_dir_all(parent);
                }
                let dir = path
                    .parent()
                    .filter(|p| !p.as_os_str().is_empty())
                    .unwrap_or_else(|| std::path::Path::new("."));
                let file_name = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or(DEFAULT_JSON_LOG_FILE);
                let writer = tracing_appender::rolling::never(dir, file_name);
                let json_layer = tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_target(false)
                    .with_writer(writer);
                let _ = tracing_subscriber::registry()
                    .with(env_filter)
                    .with(json_layer)
                    .try_init();
            }
            None => {
                let console_layer = tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_writer(std::io::stdout);
                let _ = tracing_subscriber::registry()
                    .with(env_filter)
                    .with(console_layer)
                    .try_init();
            }
        }
    });
}
