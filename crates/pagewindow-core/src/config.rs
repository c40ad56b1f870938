use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Result, WindowError};

/// Tuning knobs shared by the sectioned and flat windows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Items measured per scroll-driven section load.
    pub section_batch_size: usize,
    /// Items measured per step while a reset walks forward to the old tip.
    pub reset_follow_batch_size: usize,
    /// Flat: size of the first page, newest or around a focused item.
    pub initial_load_count: usize,
    /// Flat: items added by each older/newer page.
    pub page_size: usize,
    /// Flat: ceiling on loaded items; the opposite edge is trimmed past it.
    pub max_loaded_count: usize,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            section_batch_size: 20,
            reset_follow_batch_size: 10,
            initial_load_count: 30,
            page_size: 60,
            max_loaded_count: 500,
        }
    }
}

impl WindowConfig {
    /// Parse and validate a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents).map_err(|e| {
            WindowError::Configuration(format!("Failed to parse window config: {e}"))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load from disk, or return defaults if the file is missing or unreadable as TOML.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path).map_err(|e| {
            WindowError::Configuration(format!("Failed to read {}: {e}", path.display()))
        })?;
        match toml::from_str::<Self>(&contents) {
            Ok(config) => {
                config.validate()?;
                Ok(config)
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to parse window config at {:?}: {}. Using defaults.",
                    path,
                    e
                );
                Ok(Self::default())
            }
        }
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| {
            WindowError::Configuration(format!("Failed to serialize window config: {e}"))
        })
    }

    pub fn validate(&self) -> Result<()> {
        let sizes = [
            ("section_batch_size", self.section_batch_size),
            ("reset_follow_batch_size", self.reset_follow_batch_size),
            ("initial_load_count", self.initial_load_count),
            ("page_size", self.page_size),
            ("max_loaded_count", self.max_loaded_count),
        ];
        if let Some((name, _)) = sizes.iter().find(|(_, value)| *value == 0) {
            return Err(WindowError::Configuration(format!("{name} must be positive")));
        }
        if self.initial_load_count > self.max_loaded_count {
            return Err(WindowError::Configuration(format!(
                "initial_load_count ({}) exceeds max_loaded_count ({})",
                self.initial_load_count, self.max_loaded_count
            )));
        }
        if self.page_size > self.max_loaded_count {
            return Err(WindowError::Configuration(format!(
                "page_size ({}) exceeds max_loaded_count ({})",
                self.page_size, self.max_loaded_count
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_documents_fill_in_defaults() {
        let config = WindowConfig::from_toml_str("page_size = 25\n").unwrap();
        assert_eq!(config.page_size, 25);
        assert_eq!(config.max_loaded_count, 500);
        assert_eq!(config.initial_load_count, 30);
    }

    #[test]
    fn zero_sizes_are_rejected() {
        let err = WindowConfig::from_toml_str("section_batch_size = 0\n").unwrap_err();
        assert!(
            matches!(err, WindowError::Configuration(msg) if msg.contains("section_batch_size"))
        );
    }

    #[test]
    fn pages_larger_than_the_ceiling_are_rejected() {
        let err =
            WindowConfig::from_toml_str("page_size = 80\nmax_loaded_count = 50\n").unwrap_err();
        assert!(matches!(err, WindowError::Configuration(_)));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = WindowConfig::load(&dir.path().join("window.toml")).unwrap();
        assert_eq!(config, WindowConfig::default());
    }

    #[test]
    fn unparsable_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("window.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "page_size = \"lots\"").unwrap();

        let config = WindowConfig::load(&path).unwrap();
        assert_eq!(config, WindowConfig::default());
    }

    #[test]
    fn serialized_config_parses_back() {
        let config = WindowConfig {
            page_size: 12,
            ..WindowConfig::default()
        };
        let text = config.to_toml_string().unwrap();
        assert_eq!(WindowConfig::from_toml_str(&text).unwrap(), config);
    }
}
