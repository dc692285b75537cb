//! # gateway-settings
//!
//! Layered configuration for the gateway:
//! 1. **Compiled defaults** ([`GatewaySettings::default()`])
//! 2. **User file** `~/.iris-gateway/settings.json`, deep-merged over defaults
//! 3. **Environment** `IRISGW_*` overrides, highest priority
//!
//! Server definitions live under `servers`, keyed by name:
//!
//! ```json
//! { "servers": { "iris": {
//!     "webServer": { "host": "localhost", "port": 52773 },
//!     "superServer": { "port": 1972 },
//!     "username": "_SYSTEM"
//! } } }
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
