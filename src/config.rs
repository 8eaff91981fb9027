// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Default lint debounce window in milliseconds.
pub const DEFAULT_DEBOUNCE_MS: u64 = 300;

/// Server configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Quiet period after the last edit before a lint pass runs (default: 300).
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Optional tracing directive (e.g. "debug", "sextant=trace").
    #[serde(default)]
    pub log_level: Option<String>,
}

const fn default_debounce_ms() -> u64 {
    DEFAULT_DEBOUNCE_MS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            log_level: None,
        }
    }
}

impl Config {
    /// Load configuration from standard paths or a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or a value has the wrong type.
    pub fn load(explicit_file: Option<PathBuf>) -> Result<Self> {
        let mut builder = config::Config::builder();

        // 1. Defaults
        builder = builder.set_default("debounce_ms", DEFAULT_DEBOUNCE_MS)?;

        // 2. User config directory (~/.config/sextant/config.toml)
        if let Some(config_dir) = dirs::config_dir() {
            let config_path = config_dir.join("sextant").join("config.toml");
            if config_path.exists() {
                builder = builder.add_source(config::File::from(config_path));
            }
        }

        // 3. Explicit file
        if let Some(path) = explicit_file {
            builder = builder.add_source(config::File::from(path));
        }

        // 4. Environment (SEXTANT_DEBOUNCE_MS, SEXTANT_LOG_LEVEL)
        builder = builder.add_source(config::Environment::with_prefix("SEXTANT"));

        let config = builder.build().context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// The debounce window as a [`Duration`].
    #[must_use]
    pub const fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// Extracts a debounce override from `workspace/didChangeConfiguration` settings.
///
/// Accepts both `{"sextant": {"debounceMs": N}}` and a bare `{"debounceMs": N}`.
#[must_use]
pub fn debounce_from_settings(settings: &serde_json::Value) -> Option<Duration> {
    let section = settings.get("sextant").unwrap_or(settings);
    section
        .get("debounceMs")
        .or_else(|| section.get("debounce_ms"))
        .and_then(serde_json::Value::as_u64)
        .map(Duration::from_millis)
}
