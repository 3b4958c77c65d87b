//! Strongbox configuration management
//!
//! Handles loading and saving configuration to `~/.config/strongbox/config.toml`.
//! A missing file means defaults; command-line flags override file values.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use strongbox_keychain::{WriteOptions, DEFAULT_SECURITY_PATH};

/// Strongbox configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StrongboxConfig {
    /// Path to the `security` utility
    pub security_path: PathBuf,

    /// Keychain name to search for (None = the user's default keychain)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keychain: Option<String>,

    /// Unlock the keychain around each read/write and lock it afterwards
    pub unlock: bool,

    /// Defaults for `write`
    pub write: WriteOptions,
}

impl Default for StrongboxConfig {
    fn default() -> Self {
        Self {
            security_path: PathBuf::from(DEFAULT_SECURITY_PATH),
            keychain: None,
            unlock: false,
            write: WriteOptions::default(),
        }
    }
}

impl StrongboxConfig {
    /// Get the default config directory path
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("strongbox")
    }

    /// Get the default config file path
    pub fn default_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Load configuration from a specific path
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration, falling back to defaults if the file doesn't exist
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            tracing::debug!("Loading configuration from {:?}", path);
            Self::load(path)
        } else {
            tracing::debug!("No configuration at {:?}, using defaults", path);
            Ok(Self::default())
        }
    }

    /// Save configuration to a specific path
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        tracing::info!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.security_path.as_os_str().is_empty() {
            errors.push("security_path must not be empty".to_string());
        }

        if self.keychain.as_deref().is_some_and(str::is_empty) {
            errors.push("keychain must not be empty when set".to_string());
        }

        if let Err(e) = self.write.resolved_type() {
            errors.push(format!("write.type: {}", e));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = StrongboxConfig::default();
        assert_eq!(config.security_path, PathBuf::from("/usr/bin/security"));
        assert!(config.keychain.is_none());
        assert!(!config.unlock);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: StrongboxConfig = toml::from_str(
            r#"
            keychain = "notes"

            [write]
            account_name = "me"
            "#,
        )
        .unwrap();

        assert_eq!(config.keychain.as_deref(), Some("notes"));
        assert_eq!(config.write.account_name.as_deref(), Some("me"));
        assert_eq!(config.security_path, PathBuf::from("/usr/bin/security"));
    }

    #[test]
    fn test_config_validation() {
        let config: StrongboxConfig = toml::from_str(
            r#"
            security_path = ""
            keychain = ""

            [write]
            type = "password"
            "#,
        )
        .unwrap();

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors.iter().any(|e| e.contains("write.type")));
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let result: Result<StrongboxConfig, _> = toml::from_str("colour = \"blue\"");
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = StrongboxConfig::load_or_default(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, StrongboxConfig::default());
    }

    #[test]
    fn test_config_roundtrip() {
        let config = StrongboxConfig {
            security_path: PathBuf::from("/opt/bin/security"),
            keychain: Some("Project Notes".to_string()),
            unlock: true,
            write: WriteOptions::new().account_name("deploy").label("Deploy"),
        };

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        config.save(&path).unwrap();

        let loaded = StrongboxConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }
}
