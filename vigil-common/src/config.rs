//! Configuration file resolution and loading

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "VIGIL_CONFIG";

/// File name looked up inside the platform config directory
pub const CONFIG_FILE_NAME: &str = "vigil.toml";

/// Logging section shared by every vigil binary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when RUST_LOG is unset (e.g. "info", "vigil_ai=debug")
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Config file resolution following this priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable (`VIGIL_CONFIG`)
/// 3. Platform config directory (`~/.config/vigil/vigil.toml` on Linux)
///
/// Returns `None` when no file is found, in which case callers run on
/// built-in defaults. An explicit path (CLI or env) that does not exist is
/// an error rather than a silent fallback.
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Result<Option<PathBuf>> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return require_exists(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return require_exists(PathBuf::from(path));
        }
    }

    // Priority 3: Platform default
    Ok(default_config_path().filter(|p| p.exists()))
}

fn require_exists(path: PathBuf) -> Result<Option<PathBuf>> {
    if path.exists() {
        Ok(Some(path))
    } else {
        Err(Error::Config(format!("Config file not found: {}", path.display())))
    }
}

/// Platform config file location (may not exist)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("vigil").join(CONFIG_FILE_NAME))
}

/// OS-dependent default data folder (database, preprocessing cache)
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("vigil"))
        .unwrap_or_else(|| PathBuf::from("./vigil_data"))
}

/// Load and parse a TOML file into `T`
pub fn load_toml_config<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
}

/// Write `config` to `path` atomically (temp file + rename)
pub fn write_toml_config<T: Serialize>(config: &T, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp_path = path.with_extension("toml.tmp");
    std::fs::write(&tmp_path, content)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[derive(Debug, Serialize, Deserialize, PartialEq, Default)]
    struct Sample {
        name: String,
        #[serde(default)]
        logging: LoggingConfig,
    }

    #[test]
    #[serial]
    fn test_cli_arg_takes_priority_over_env() {
        let temp_dir = TempDir::new().unwrap();
        let cli_path = temp_dir.path().join("cli.toml");
        let env_path = temp_dir.path().join("env.toml");
        std::fs::write(&cli_path, "name = \"cli\"").unwrap();
        std::fs::write(&env_path, "name = \"env\"").unwrap();

        std::env::set_var(CONFIG_ENV_VAR, &env_path);
        let resolved = resolve_config_path(Some(&cli_path)).unwrap();
        std::env::remove_var(CONFIG_ENV_VAR);

        assert_eq!(resolved, Some(cli_path));
    }

    #[test]
    #[serial]
    fn test_env_var_used_without_cli_arg() {
        let temp_dir = TempDir::new().unwrap();
        let env_path = temp_dir.path().join("env.toml");
        std::fs::write(&env_path, "name = \"env\"").unwrap();

        std::env::set_var(CONFIG_ENV_VAR, &env_path);
        let resolved = resolve_config_path(None).unwrap();
        std::env::remove_var(CONFIG_ENV_VAR);

        assert_eq!(resolved, Some(env_path));
    }

    #[test]
    #[serial]
    fn test_missing_explicit_path_is_error() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("nope.toml");
        let result = resolve_config_path(Some(&missing));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_write_then_load_toml() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("vigil.toml");
        let sample = Sample {
            name: "vigil".to_string(),
            logging: LoggingConfig {
                level: "debug".to_string(),
            },
        };

        write_toml_config(&sample, &path).unwrap();
        let loaded: Sample = load_toml_config(&path).unwrap();
        assert_eq!(loaded, sample);
        assert!(!path.with_extension("toml.tmp").exists());
    }

    #[test]
    fn test_load_invalid_toml_is_config_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bad.toml");
        std::fs::write(&path, "name = ").unwrap();
        let result: Result<Sample> = load_toml_config(&path);
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
