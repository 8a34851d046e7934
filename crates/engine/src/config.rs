use std::time::Duration;

use serde::Deserialize;

use crate::error::EngineError;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GridConfig {
    /// How long a deleted row can be restored before the delete is sent.
    pub undo_window_ms: u64,
    /// How long a resolved id stays in the refresh exclusion sets.
    pub tracking_clear_delay_ms: u64,
    pub refresh_interval_ms: u64,
    pub min_column_width: u32,
    pub default_column_width: u32,
    pub custom_field_prefix: String,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            undo_window_ms: 5_000,
            tracking_clear_delay_ms: 2_000,
            refresh_interval_ms: 30_000,
            min_column_width: 60,
            default_column_width: 150,
            custom_field_prefix: "cf_".to_string(),
        }
    }
}

impl GridConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, EngineError> {
        let config: Self = toml::from_str(text).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.min_column_width == 0 {
            return Err(EngineError::Config("min_column_width must be positive".into()));
        }
        if self.default_column_width < self.min_column_width {
            return Err(EngineError::Config(format!(
                "default_column_width {} is below min_column_width {}",
                self.default_column_width, self.min_column_width
            )));
        }
        if self.custom_field_prefix.is_empty() {
            return Err(EngineError::Config("custom_field_prefix must not be empty".into()));
        }
        if self.refresh_interval_ms == 0 {
            return Err(EngineError::Config("refresh_interval_ms must be positive".into()));
        }
        Ok(())
    }

    pub fn undo_window(&self) -> Duration {
        Duration::from_millis(self.undo_window_ms)
    }

    pub fn tracking_clear_delay(&self) -> Duration {
        Duration::from_millis(self.tracking_clear_delay_ms)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }
}
