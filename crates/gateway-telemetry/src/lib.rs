use std::sync::Arc;

use parking_lot::RwLock;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{reload, EnvFilter, Registry};

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "gateway_kernel" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// JSON lines instead of human-readable output.
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

/// Keeps the live filter handle so levels can change at runtime.
pub struct TelemetryGuard {
    log_level: Level,
    level_filter: Arc<RwLock<Vec<(String, Level)>>>,
    reload: Option<reload::Handle<EnvFilter, Registry>>,
}

impl TelemetryGuard {
    /// Change the log level for a specific module at runtime.
    pub fn set_module_level(&self, module: &str, level: Level) {
        let directives = {
            let mut levels = self.level_filter.write();
            if let Some(entry) = levels.iter_mut().find(|(m, _)| m == module) {
                entry.1 = level;
            } else {
                levels.push((module.to_string(), level));
            }
            filter_directives(self.log_level, &levels)
        };
        if let Some(handle) = &self.reload {
            if let Err(e) = handle.reload(EnvFilter::new(&directives)) {
                tracing::warn!(error = %e, "failed to reload log filter");
            }
        }
    }

    /// Current per-module log level overrides.
    pub fn module_levels(&self) -> Vec<(String, Level)> {
        self.level_filter.read().clone()
    }
}

/// `info,gateway_kernel=debug` style directive string.
pub fn filter_directives(level: Level, modules: &[(String, Level)]) -> String {
    let mut out = level.to_string().to_lowercase();
    for (module, level) in modules {
        out.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
    }
    out
}

/// Initialize the global subscriber. Call once at startup; a second call
/// leaves the first subscriber in place.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let level_filter = Arc::new(RwLock::new(config.module_levels.clone()));
    let directives = filter_directives(config.log_level, &config.module_levels);
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&directives));
    let (filter_layer, handle) = reload::Layer::new(env_filter);

    let json_layer = config.json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
    });
    let text_layer = (!config.json).then(|| tracing_subscriber::fmt::layer().with_target(true));

    let installed = tracing_subscriber::registry()
        .with(filter_layer)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .is_ok();
    if !installed {
        tracing::debug!("tracing subscriber already installed");
    }

    TelemetryGuard {
        log_level: config.log_level,
        level_filter,
        reload: installed.then_some(handle),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directives_include_modules() {
        let modules = vec![
            ("gateway_kernel".to_string(), Level::DEBUG),
            ("hyper".to_string(), Level::WARN),
        ];
        assert_eq!(
            filter_directives(Level::INFO, &modules),
            "info,gateway_kernel=debug,hyper=warn"
        );
        assert_eq!(filter_directives(Level::TRACE, &[]), "trace");
    }

    #[test]
    fn set_module_level_updates_and_replaces() {
        let guard = init_telemetry(TelemetryConfig::default());
        guard.set_module_level("gateway_server", Level::DEBUG);
        guard.set_module_level("gateway_server", Level::TRACE);
        guard.set_module_level("gateway_backend", Level::WARN);
        assert_eq!(
            guard.module_levels(),
            vec![
                ("gateway_server".to_string(), Level::TRACE),
                ("gateway_backend".to_string(), Level::WARN),
            ]
        );
    }

    #[test]
    fn second_init_does_not_panic() {
        let _first = init_telemetry(TelemetryConfig::default());
        let second = init_telemetry(TelemetryConfig {
            json: true,
            ..TelemetryConfig::default()
        });
        assert!(second.module_levels().is_empty());
    }
}
