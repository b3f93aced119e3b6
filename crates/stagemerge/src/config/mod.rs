//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use crate::dialect::DialectId;
use crate::error::{Result, TransferError};
use std::path::Path;

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// Dialect of the configured target.
    pub fn target_dialect(&self) -> Result<DialectId> {
        self.target.r#type.parse()
    }

    /// Table entries to run: all of them, or the one named `only`.
    pub fn select_tables(&self, only: Option<&str>) -> Result<Vec<&TableConfig>> {
        let Some(name) = only else {
            return Ok(self.tables.iter().collect());
        };

        let selected: Vec<&TableConfig> = self
            .tables
            .iter()
            .filter(|t| t.table.eq_ignore_ascii_case(name) || t.display_name().eq_ignore_ascii_case(name))
            .collect();
        if selected.is_empty() {
            return Err(TransferError::Config(format!(
                "table '{}' is not in the configuration",
                name
            )));
        }
        Ok(selected)
    }
}
