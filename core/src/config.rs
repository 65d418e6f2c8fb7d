//! Registry configuration
//!
//! Re-exports [`RegistryConfig`] from ktimer-types and adds loading
//! through confy (TOML) plus range validation.

use std::path::Path;

pub use ktimer_types::RegistryConfig;
use ktimer_types::KTIMER_MAX;

use crate::error::ConfigError;

const APP_NAME: &str = "ktimer";
const CONFIG_NAME: &str = "config";

/// Extension trait for RegistryConfig persistence and validation
pub trait RegistryConfigExt: Sized {
    /// Load from the default location, falling back to defaults.
    fn load() -> Self;
    /// Load from an explicit file. A missing file is created with defaults.
    fn load_from(path: &Path) -> Result<Self, ConfigError>;
    fn validate(&self) -> Result<(), ConfigError>;
}

impl RegistryConfigExt for RegistryConfig {
    fn load() -> Self {
        match confy::load::<RegistryConfig>(APP_NAME, CONFIG_NAME) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(error = %e, "failed to load config, using defaults");
                Self::default()
            }
        }
    }

    fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let config: RegistryConfig = confy::load_path(path)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=KTIMER_MAX).contains(&self.initial_capacity) {
            return Err(ConfigError::Invalid {
                reason: format!(
                    "initial_capacity {} must be within 1..={}",
                    self.initial_capacity, KTIMER_MAX
                ),
            });
        }
        if self.request_buffer == 0 {
            return Err(ConfigError::Invalid {
                reason: "request_buffer must be at least 1".to_string(),
            });
        }
        if self.module_name.trim().is_empty() {
            return Err(ConfigError::Invalid {
                reason: "module_name must not be empty".to_string(),
            });
        }
        Ok(())
    }
}
