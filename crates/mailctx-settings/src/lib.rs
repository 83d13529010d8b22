//! # mailctx-settings
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`MailctxSettings::default()`]
//! 2. **User file**: `~/.mailctx/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `MAILCTX_*` overrides (highest priority)
//!
//! ```no_run
//! use mailctx_settings::get_settings;
//!
//! let settings = get_settings();
//! println!("acceptance threshold: {}", settings.analysis.acceptance_threshold);
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, load_with_env, settings_path};
pub use types::*;

use std::sync::OnceLock;

static SETTINGS: OnceLock<MailctxSettings> = OnceLock::new();

/// Get the global settings instance, loading it on first call. Falls back
/// to compiled defaults if loading fails.
pub fn get_settings() -> &'static MailctxSettings {
    SETTINGS.get_or_init(|| match load_settings() {
        Ok(settings) => settings,
        Err(e) => {
            tracing::warn!(error = %e, "failed to load settings, using defaults");
            MailctxSettings::default()
        }
    })
}

/// Initialize the global settings with a specific value.
///
/// Returns the provided settings back if the global was already initialized.
#[allow(clippy::result_large_err)]
pub fn init_settings(settings: MailctxSettings) -> std::result::Result<(), MailctxSettings> {
    SETTINGS.set(settings)
}
