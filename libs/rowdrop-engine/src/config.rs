use std::time::Duration;

use serde::Deserialize;

use crate::error::EngineError;

/// Engine settings, parsed from TOML.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EngineSettings {
    /// Re-render periodically after each completed pass.
    #[serde(default)]
    pub auto_refresh: bool,

    /// Delay between the end of a pass and the next refresh.
    #[serde(default = "default_refresh_interval_ms")]
    pub refresh_interval_ms: u64,

    /// Quiet period before an editor change is written back.
    #[serde(default = "default_editor_debounce_ms")]
    pub editor_debounce_ms: u64,

    /// Capacity of the session event channel.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    /// Request read-only attachment tokens.
    #[serde(default = "default_read_only_token")]
    pub read_only_token: bool,
}

fn default_refresh_interval_ms() -> u64 {
    3000
}

fn default_editor_debounce_ms() -> u64 {
    300
}

fn default_event_buffer() -> usize {
    64
}

fn default_read_only_token() -> bool {
    true
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            auto_refresh: false,
            refresh_interval_ms: default_refresh_interval_ms(),
            editor_debounce_ms: default_editor_debounce_ms(),
            event_buffer: default_event_buffer(),
            read_only_token: default_read_only_token(),
        }
    }
}

impl EngineSettings {
    /// Load settings from a TOML file.
    pub fn load(path: &str) -> Result<Self, EngineError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| EngineError::Config(format!("{path}: {e}")))?;
        Self::parse(&content)
    }

    /// Parse settings from a TOML string.
    pub fn parse(toml_str: &str) -> Result<Self, EngineError> {
        let settings: Self =
            toml::from_str(toml_str).map_err(|e| EngineError::Config(e.to_string()))?;
        if settings.event_buffer == 0 {
            return Err(EngineError::Config("event_buffer must be positive".to_string()));
        }
        Ok(settings)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    pub fn editor_debounce(&self) -> Duration {
        Duration::from_millis(self.editor_debounce_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let settings = EngineSettings::parse("").unwrap();
        assert_eq!(settings, EngineSettings::default());
        assert_eq!(settings.refresh_interval(), Duration::from_secs(3));
    }

    #[test]
    fn overrides() {
        let settings = EngineSettings::parse(
            "auto_refresh = true\nrefresh_interval_ms = 500\nread_only_token = false\n",
        )
        .unwrap();
        assert!(settings.auto_refresh);
        assert_eq!(settings.refresh_interval_ms, 500);
        assert!(!settings.read_only_token);
        assert_eq!(settings.editor_debounce_ms, 300);
    }

    #[test]
    fn rejects_zero_buffer() {
        let err = EngineSettings::parse("event_buffer = 0").unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }
}
