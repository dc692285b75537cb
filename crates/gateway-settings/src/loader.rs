//! Settings loading with deep merge and environment variable overrides.
//!
//! 1. Start with compiled [`GatewaySettings::default()`]
//! 2. If the settings file exists, deep-merge it over the defaults
//! 3. Apply `IRISGW_*` environment overrides
//! 4. Normalize and validate the server table

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::GatewaySettings;

/// `~/.iris-gateway/settings.json`.
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".iris-gateway").join("settings.json")
}

pub fn load_settings() -> Result<GatewaySettings> {
    load_settings_from_path(&settings_path())
}

/// Load from `path` (defaults when the file is missing), then apply env
/// overrides. Invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<GatewaySettings> {
    let mut settings = read_layered(path)?;
    apply_env_overrides(&mut settings);
    validate_ranges(&settings)?;
    normalize_servers(&mut settings)?;
    Ok(settings)
}

fn read_layered(path: &Path) -> Result<GatewaySettings> {
    let defaults = serde_json::to_value(GatewaySettings::default())?;
    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };
    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
///
/// Objects merge per key, arrays and primitives are replaced, and nulls in
/// `source` leave `target` untouched.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply the env-override bounds to values that came from the file.
fn validate_ranges(settings: &GatewaySettings) -> Result<()> {
    let server = &settings.server;
    let backend = &settings.backend;
    check_range("server.port", u64::from(server.port), 1, 65535)?;
    check_range("server.maxSendQueue", server.max_send_queue as u64, 1, 65_536)?;
    check_range("server.heartbeatIntervalMs", server.heartbeat_interval_ms, 1000, 600_000)?;
    check_range("backend.connectTimeoutMs", backend.connect_timeout_ms, 100, 60_000)?;
    check_range("backend.requestTimeoutMs", backend.request_timeout_ms, 100, 600_000)?;
    Ok(())
}

fn check_range(name: &str, value: u64, min: u64, max: u64) -> Result<()> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(SettingsError::InvalidValue(format!(
            "{name} must be between {min} and {max}, got {value}"
        )))
    }
}

/// Lower-case server keys, fill missing names from the key, reject servers
/// without a web host.
fn normalize_servers(settings: &mut GatewaySettings) -> Result<()> {
    let servers = std::mem::take(&mut settings.servers);
    let mut normalized = BTreeMap::new();
    for (key, mut spec) in servers {
        let key = key.to_lowercase();
        if spec.web_server.host.trim().is_empty() {
            return Err(SettingsError::InvalidValue(format!(
                "server '{key}' has no webServer.host"
            )));
        }
        if spec.name.is_empty() {
            spec.name = key.clone();
        }
        if let Some(password) = read_env_string(&password_var(&key)) {
            spec.password = Some(password);
        }
        let _ = normalized.insert(key, spec);
    }
    settings.servers = normalized;
    Ok(())
}

/// `IRISGW_PASSWORD_<SERVER>`, non-alphanumerics mapped to `_`.
pub fn password_var(server: &str) -> String {
    let suffix: String = server
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    format!("IRISGW_PASSWORD_{suffix}")
}

/// Apply `IRISGW_*` overrides. Unparseable values are logged and ignored.
pub fn apply_env_overrides(settings: &mut GatewaySettings) {
    if let Some(v) = read_env_string("IRISGW_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read_env_u16("IRISGW_PORT", 1, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = read_env_usize("IRISGW_MAX_SEND_QUEUE", 1, 65_536) {
        settings.server.max_send_queue = v;
    }
    if let Some(v) = read_env_u64("IRISGW_HEARTBEAT_INTERVAL_MS", 1000, 600_000) {
        settings.server.heartbeat_interval_ms = v;
    }
    if let Some(v) = read_env_u64("IRISGW_CONNECT_TIMEOUT_MS", 100, 60_000) {
        settings.backend.connect_timeout_ms = v;
    }
    if let Some(v) = read_env_string("IRISGW_STUB_SOURCE") {
        settings.backend.stub_source_path = Some(v);
    }
    if let Some(v) = read_env_bool("IRISGW_INSTALL_STUB") {
        settings.backend.install_stub = v;
    }
    if let Some(v) = read_env_string("IRISGW_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_env_bool("IRISGW_LOG_JSON") {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Accepts (case-insensitive) `true`/`1`/`yes`/`on` and `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers ─────────────────────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_bool(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    let result = parse_bool(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_env_u16(name: &str, min: u16, max: u16) -> Option<u16> {
    let val = std::env::var(name).ok()?;
    let result = parse_u16_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u16 env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

fn read_env_usize(name: &str, min: usize, max: usize) -> Option<usize> {
    let val = std::env::var(name).ok()?;
    let result = parse_usize_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid usize env var, ignoring");
    }
    result
}
