//! Configuration loader for Switchyard.
//!
//! Reads `switchyard.toml` from a directory and deserializes it into
//! [`SwitchyardConfig`]. Falls back to defaults when the file is missing or
//! malformed, and clamps values that would stall the runtime.

use std::path::{Path, PathBuf};

use switchyard_types::config::SwitchyardConfig;

/// File name looked up inside the config directory.
pub const CONFIG_FILE_NAME: &str = "switchyard.toml";

pub fn config_path(dir: &Path) -> PathBuf {
    dir.join(CONFIG_FILE_NAME)
}

/// Load configuration from `{dir}/switchyard.toml`.
///
/// - Missing file: returns [`SwitchyardConfig::default()`].
/// - Unreadable or unparsable file: logs a warning and returns the default.
/// - Otherwise: returns the parsed config after [`sanitize`].
pub async fn load_config(dir: &Path) -> SwitchyardConfig {
    let path = config_path(dir);

    let content = match tokio::fs::read_to_string(&path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No {CONFIG_FILE_NAME} found at {}, using defaults", path.display());
            return SwitchyardConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", path.display());
            return SwitchyardConfig::default();
        }
    };

    match toml::from_str::<SwitchyardConfig>(&content) {
        Ok(config) => sanitize(config),
        Err(err) => {
            tracing::warn!("Failed to parse {}: {err}, using defaults", path.display());
            SwitchyardConfig::default()
        }
    }
}

/// Raise zero capacities and thresholds to 1.
pub fn sanitize(mut config: SwitchyardConfig) -> SwitchyardConfig {
    fn floor(setting: &str, value: &mut usize) {
        if *value == 0 {
            tracing::warn!(setting, "zero is not allowed, using 1");
            *value = 1;
        }
    }

    floor("bus.queue_capacity", &mut config.bus.queue_capacity);
    floor("bus.dead_letter_capacity", &mut config.bus.dead_letter_capacity);
    floor("bus.event_capacity", &mut config.bus.event_capacity);

    if config.circuit_breaker.failure_threshold == 0 {
        tracing::warn!(setting = "circuit_breaker.failure_threshold", "zero is not allowed, using 1");
        config.circuit_breaker.failure_threshold = 1;
    }
    config
}
