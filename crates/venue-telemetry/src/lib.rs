use std::sync::Arc;

use parking_lot::RwLock;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{reload, EnvFilter, Layer, Registry};
use venue_core::ConnectionId;

/// Configuration for the logging subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "venue_server::relay" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// JSON lines instead of the human-readable format.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            json: false,
        }
    }
}

impl TelemetryConfig {
    /// Build from a textual level such as `"debug"`. Unknown levels fall back to INFO.
    pub fn from_level_str(level: &str, json: bool) -> Self {
        Self {
            log_level: level.parse().unwrap_or(Level::INFO),
            json,
            ..Self::default()
        }
    }

    /// Filter directive string, e.g. `info,venue_server::relay=debug`.
    pub fn directives(&self) -> String {
        directives(self.log_level, &self.module_levels)
    }
}

fn directives(base: Level, module_levels: &[(String, Level)]) -> String {
    let mut filter = base.to_string().to_lowercase();
    for (module, level) in module_levels {
        filter.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
    }
    filter
}

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("a global subscriber is already installed: {0}")]
    AlreadyInitialized(String),
    #[error("failed to reload log filter: {0}")]
    Reload(String),
}

/// Handle to the installed subscriber. Keeps per-module levels adjustable
/// while the server runs.
pub struct TelemetryGuard {
    base_level: Level,
    level_filter: Arc<RwLock<Vec<(String, Level)>>>,
    reload: reload::Handle<EnvFilter, Registry>,
}

impl TelemetryGuard {
    /// Change the log level for a specific module at runtime.
    pub fn set_module_level(&self, module: &str, level: Level) -> Result<(), TelemetryError> {
        let mut levels = self.level_filter.write();
        if let Some(entry) = levels.iter_mut().find(|(m, _)| m == module) {
            entry.1 = level;
        } else {
            levels.push((module.to_string(), level));
        }
        let filter = EnvFilter::new(directives(self.base_level, &levels));
        self.reload
            .reload(filter)
            .map_err(|e| TelemetryError::Reload(e.to_string()))
    }

    /// Get current per-module log level overrides.
    pub fn module_levels(&self) -> Vec<(String, Level)> {
        self.level_filter.read().clone()
    }
}

/// Install the global subscriber. Call once at startup.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.directives()));
    let (env_filter, reload) = reload::Layer::new(env_filter);

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer().with_target(true).boxed()
    };

    tracing_subscriber::registry()
        .with(fmt_layer.with_filter(env_filter))
        .try_init()
        .map_err(|e| TelemetryError::AlreadyInitialized(e.to_string()))?;

    Ok(TelemetryGuard {
        base_level: config.log_level,
        level_filter: Arc::new(RwLock::new(config.module_levels.clone())),
        reload,
    })
}

/// Stderr subscriber for warnings raised before settings are loaded, such as a
/// bad `VENUE_*` value. Scope it with `tracing::subscriber::with_default`.
pub fn bootstrap_subscriber() -> impl tracing::Subscriber + Send + Sync + 'static {
    tracing_subscriber::fmt()
        .with_max_level(Level::WARN)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish()
}

/// Span wrapping everything done on behalf of one connection.
pub fn connection_span(connection_id: &ConnectionId) -> tracing::Span {
    tracing::info_span!("connection", connection_id = %connection_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directives_include_module_overrides() {
        let config = TelemetryConfig {
            log_level: Level::WARN,
            module_levels: vec![("venue_server::relay".into(), Level::DEBUG)],
            json: true,
        };
        assert_eq!(config.directives(), "warn,venue_server::relay=debug");
    }

    #[test]
    fn from_level_str_falls_back_to_info() {
        assert_eq!(TelemetryConfig::from_level_str("debug", false).log_level, Level::DEBUG);
        assert_eq!(TelemetryConfig::from_level_str("loud", false).log_level, Level::INFO);
    }

    // The global subscriber can be installed once per test binary, so init,
    // re-init and runtime overrides share one test.
    #[test]
    fn init_once_then_adjust_levels() {
        let config = TelemetryConfig {
            module_levels: vec![("venue_store".into(), Level::WARN)],
            ..TelemetryConfig::default()
        };
        let guard = init_telemetry(&config).unwrap();
        assert!(matches!(
            init_telemetry(&config),
            Err(TelemetryError::AlreadyInitialized(_))
        ));

        guard.set_module_level("venue_server::relay", Level::DEBUG).unwrap();
        guard.set_module_level("venue_store", Level::ERROR).unwrap();
        assert_eq!(
            guard.module_levels(),
            vec![
                ("venue_store".to_string(), Level::ERROR),
                ("venue_server::relay".to_string(), Level::DEBUG),
            ]
        );
    }

    #[test]
    fn bootstrap_subscriber_keeps_warnings_only() {
        tracing::subscriber::with_default(bootstrap_subscriber(), || {
            assert!(tracing::enabled!(Level::WARN));
            assert!(tracing::enabled!(Level::ERROR));
            assert!(!tracing::enabled!(Level::INFO));
        });
    }

    #[test]
    fn connection_span_carries_id() {
        let id = ConnectionId::from_raw("conn_test");
        let span = connection_span(&id);
        // Disabled spans have no metadata when no subscriber is interested.
        if let Some(meta) = span.metadata() {
            assert_eq!(meta.name(), "connection");
        }
    }
}
