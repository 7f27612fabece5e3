//! # pmosoap Configuration Module
//!
//! This module provides configuration management for pmosoap, including:
//! - Loading configuration from YAML files
//! - Merging with embedded default configuration
//! - Environment variable overrides
//! - Path-based getters and setters for configuration values
//! - Thread-safe singleton access pattern
//!
//! Runtime crates add their own typed accessors through extension traits
//! (see `pmosoap::SoapConfigExt`).
//!
//! ## Usage
//!
//! ```no_run
//! use pmoconfig::get_config;
//! use serde_yaml::Value;
//!
//! // Get the global configuration
//! let config = get_config();
//!
//! // Access configuration values
//! let level = config.get_log_min_level()?;
//!
//! // Update configuration values
//! config.set_value(&["soap", "logging", "dump_messages"], Value::Bool(true))?;
//! # Ok::<(), anyhow::Error>(())
//! ```

use anyhow::{anyhow, Result};
use dirs::home_dir;
use lazy_static::lazy_static;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_yaml::{Mapping, Value};
use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{error, info};

// Configuration par défaut intégrée
const DEFAULT_CONFIG: &str = include_str!("pmosoap.yaml");

lazy_static! {
    static ref CONFIG: Arc<Config> = Arc::new(Config::load_or_default());
}

const ENV_CONFIG_DIR: &str = "PMOSOAP_CONFIG";
const ENV_PREFIX: &str = "PMOSOAP_CONFIG__";
const CONFIG_DIR_NAME: &str = ".pmosoap";
const CONFIG_FILE_NAME: &str = "config.yaml";

const DEFAULT_LOG_MIN_LEVEL: &str = "INFO";
const DEFAULT_LOG_ENABLE_CONSOLE: bool = true;

/// Configuration manager for pmosoap
///
/// This structure manages the application configuration, including:
/// - Loading configuration from YAML files
/// - Merging with default configuration
/// - Handling environment variable overrides
/// - Persisting every change to `config.yaml`
///
/// A configuration built with [`Config::from_yaml_str`] lives in memory
/// only: setters update it but nothing is written to disk.
///
/// # Examples
///
/// ```no_run
/// use pmoconfig::get_config;
///
/// let config = get_config();
/// let level = config.get_log_min_level().unwrap();
/// println!("Log level: {}", level);
/// ```
#[derive(Debug)]
pub struct Config {
    config_dir: Option<PathBuf>,
    path: Option<PathBuf>,
    data: Mutex<Value>,
}

impl Clone for Config {
    fn clone(&self) -> Self {
        let data = self.data.lock().clone();
        Self {
            config_dir: self.config_dir.clone(),
            path: self.path.clone(),
            data: Mutex::new(data),
        }
    }
}

impl Config {
    /// Finds a config directory by trying different locations in order
    fn find_config_dir(directory: &str) -> PathBuf {
        // 1. Try provided directory
        if !directory.is_empty() {
            return PathBuf::from(directory);
        }

        // 2. Try environment variable
        if let Ok(env_path) = env::var(ENV_CONFIG_DIR) {
            info!(env_var = ENV_CONFIG_DIR, path = %env_path, "Trying to load config from env");
            return PathBuf::from(env_path);
        }

        // 3. Try current directory
        if Path::new(CONFIG_DIR_NAME).exists() {
            return PathBuf::from(CONFIG_DIR_NAME);
        }

        // 4. Try home directory
        if let Some(home) = home_dir() {
            let home_config = home.join(CONFIG_DIR_NAME);
            if home_config.exists() {
                return home_config;
            }
        }

        // Default fallback
        PathBuf::from(CONFIG_DIR_NAME)
    }

    /// Validates and prepares a config directory
    fn validate_config_dir(path: &Path) -> Result<()> {
        if !path.exists() {
            fs::create_dir_all(path)?;
        }

        if !path.is_dir() {
            return Err(anyhow!(
                "Configuration path {} is not a directory",
                path.display()
            ));
        }

        // Test write permission
        let test_file = path.join(".write_test");
        fs::write(&test_file, b"test")?;
        fs::remove_file(&test_file)?;

        fs::read_dir(path)?;
        Ok(())
    }

    /// Determines and validates the configuration directory
    ///
    /// The directory is searched in the following order:
    /// 1. The provided `directory` parameter if not empty
    /// 2. The `PMOSOAP_CONFIG` environment variable
    /// 3. `.pmosoap` in the current directory
    /// 4. `.pmosoap` in the user's home directory
    ///
    /// The directory is created if it doesn't exist, and validated for
    /// read/write permissions.
    pub fn config_dir(directory: &str) -> Result<PathBuf> {
        let dir_path = Self::find_config_dir(directory);
        Self::validate_config_dir(&dir_path)?;
        Ok(dir_path)
    }

    /// Loads the configuration from the specified directory
    ///
    /// This method:
    /// 1. Determines the configuration directory
    /// 2. Loads the default embedded configuration
    /// 3. Merges it with the external config.yaml file if present
    /// 4. Applies environment variable overrides
    /// 5. Saves the merged configuration
    ///
    /// # Arguments
    ///
    /// * `directory` - The directory containing the config.yaml file, or empty to use defaults
    ///
    /// # Returns
    ///
    /// Returns a `Result` containing the loaded `Config` or an error
    pub fn load_config(directory: &str) -> Result<Self> {
        let config_dir = Self::config_dir(directory)?;
        info!(config_dir = %config_dir.display(), "Using config directory");

        let path = config_dir.join(CONFIG_FILE_NAME);
        let mut config_value: Value = serde_yaml::from_str(DEFAULT_CONFIG)?;

        match fs::read(&path) {
            Ok(data) => {
                info!(config_file = %path.display(), "Loaded config file");
                let external_value: Value = serde_yaml::from_slice(&data)?;
                merge_yaml(&mut config_value, &external_value);
            }
            Err(_) => {
                info!(config_file = %path.display(), "Config file not found, using default embedded config");
            }
        }

        let mut config_value = lower_keys_value(config_value);
        apply_env_overrides(&mut config_value, env::vars());

        let config = Config {
            config_dir: Some(config_dir),
            path: Some(path),
            data: Mutex::new(config_value),
        };

        config.save()?;
        Ok(config)
    }

    /// Builds an in-memory configuration from a YAML document
    ///
    /// The document is merged over the embedded defaults. Environment
    /// overrides are not applied and nothing is ever written to disk.
    ///
    /// # Arguments
    ///
    /// * `yaml` - A YAML mapping
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let mut config_value: Value = serde_yaml::from_str(DEFAULT_CONFIG)?;
        let external_value: Value = serde_yaml::from_str(yaml)?;
        match external_value {
            Value::Mapping(_) => merge_yaml(&mut config_value, &external_value),
            Value::Null => {}
            _ => return Err(anyhow!("Configuration document must be a mapping")),
        }
        Ok(Config {
            config_dir: None,
            path: None,
            data: Mutex::new(lower_keys_value(config_value)),
        })
    }

    fn load_or_default() -> Self {
        match Self::load_config("") {
            Ok(config) => config,
            Err(err) => {
                error!(error = %err, "Failed to load configuration, using embedded defaults in memory");
                Self::from_yaml_str("").unwrap_or_else(|_| Config {
                    config_dir: None,
                    path: None,
                    data: Mutex::new(Value::Mapping(Mapping::new())),
                })
            }
        }
    }

    /// Directory holding `config.yaml`, if the configuration is file-backed
    pub fn directory(&self) -> Option<&Path> {
        self.config_dir.as_deref()
    }

    /// Path of `config.yaml`, if the configuration is file-backed
    pub fn file_path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Saves the current configuration to the config.yaml file
    ///
    /// Does nothing for an in-memory configuration.
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let yaml = {
            let data = self.data.lock();
            serde_yaml::to_string(&*data)?
        };
        fs::write(path, yaml)?;
        Ok(())
    }

    /// Sets a configuration value at the specified path and saves it
    ///
    /// Intermediate mappings are created as needed.
    ///
    /// # Arguments
    ///
    /// * `path` - Array of keys representing the path (e.g., `&["soap", "version"]`)
    /// * `value` - The YAML value to set
    pub fn set_value(&self, path: &[&str], value: Value) -> Result<()> {
        {
            let mut data = self.data.lock();
            set_value_internal(&mut data, path, value)?;
        }
        self.save()
    }

    /// Gets a configuration value at the specified path
    ///
    /// # Arguments
    ///
    /// * `path` - Array of keys representing the path (e.g., `&["soap", "version"]`)
    ///
    /// # Returns
    ///
    /// Returns a `Result` containing the YAML value or an error if the path doesn't exist
    pub fn get_value(&self, path: &[&str]) -> Result<Value> {
        let data = self.data.lock();
        get_value_internal(&data, path).cloned()
    }

    /// Gets a configuration subtree deserialized into `T`
    pub fn get_as<T: DeserializeOwned>(&self, path: &[&str]) -> Result<T> {
        let value = self.get_value(path)?;
        serde_yaml::from_value(value)
            .map_err(|e| anyhow!("Invalid value at {}: {}", path.join("."), e))
    }

    /// Removes the value at the specified path
    ///
    /// # Returns
    ///
    /// `true` if a value was removed
    pub fn remove_value(&self, path: &[&str]) -> Result<bool> {
        let Some((last, parent)) = path.split_last() else {
            return Err(anyhow!("Cannot remove the configuration root"));
        };
        let removed = {
            let mut data = self.data.lock();
            match get_value_mut(&mut data, parent) {
                Some(Value::Mapping(map)) => map
                    .remove(Value::String(last.to_lowercase()))
                    .is_some(),
                _ => false,
            }
        };
        if removed {
            self.save()?;
        }
        Ok(removed)
    }

    /// Récupère le niveau de log minimum depuis la configuration
    pub fn get_log_min_level(&self) -> Result<String> {
        match self.get_value(&["host", "logger", "min_level"]) {
            Ok(Value::String(s)) => Ok(s),
            _ => Ok(DEFAULT_LOG_MIN_LEVEL.to_string()),
        }
    }

    /// Définit le niveau de log minimum dans la configuration
    pub fn set_log_min_level(&self, level: String) -> Result<()> {
        self.set_value(&["host", "logger", "min_level"], Value::String(level))
    }

    /// Indique si les logs sont écrits sur la console
    pub fn get_log_enable_console(&self) -> Result<bool> {
        match self.get_value(&["host", "logger", "enable_console"]) {
            Ok(Value::Bool(b)) => Ok(b),
            _ => Ok(DEFAULT_LOG_ENABLE_CONSOLE),
        }
    }

    pub fn set_log_enable_console(&self, enabled: bool) -> Result<()> {
        self.set_value(&["host", "logger", "enable_console"], Value::Bool(enabled))
    }
}

/// Returns the global configuration instance
///
/// This function provides access to the singleton configuration instance,
/// which is lazily loaded on first access. When the configuration directory
/// cannot be used, the embedded defaults are kept in memory.
///
/// # Examples
///
/// ```no_run
/// use pmoconfig::get_config;
///
/// let config = get_config();
/// let level = config.get_log_min_level();
/// ```
pub fn get_config() -> Arc<Config> {
    CONFIG.clone()
}

fn set_value_internal(data: &mut Value, path: &[&str], value: Value) -> Result<()> {
    let mut current = data;
    for (i, key) in path.iter().enumerate() {
        if current.is_null() {
            *current = Value::Mapping(Mapping::new());
        }
        let Value::Mapping(map) = current else {
            return Err(anyhow!("Path {} is not a mapping", path[..i].join(".")));
        };
        let key_value = Value::String(key.to_lowercase());
        if i + 1 == path.len() {
            map.insert(key_value, value);
            return Ok(());
        }
        current = map
            .entry(key_value)
            .or_insert(Value::Mapping(Mapping::new()));
    }
    *current = value;
    Ok(())
}

fn get_value_internal<'a>(data: &'a Value, path: &[&str]) -> Result<&'a Value> {
    let mut current = data;
    for (i, key) in path.iter().enumerate() {
        let Value::Mapping(map) = current else {
            return Err(anyhow!("Path {} is not a mapping", path[..i].join(".")));
        };
        current = map
            .get(Value::String(key.to_lowercase()))
            .ok_or_else(|| anyhow!("Path {} does not exist", path[..=i].join(".")))?;
    }
    Ok(current)
}

fn get_value_mut<'a>(data: &'a mut Value, path: &[&str]) -> Option<&'a mut Value> {
    let mut current = data;
    for key in path {
        current = match current {
            Value::Mapping(map) => map.get_mut(Value::String(key.to_lowercase()))?,
            _ => return None,
        };
    }
    Some(current)
}

/// Applies `PMOSOAP_CONFIG__SECTION__KEY=value` overrides
///
/// Values are parsed as YAML, so `true`, `8` or `[a, b]` keep their type.
fn apply_env_overrides(config: &mut Value, vars: impl IntoIterator<Item = (String, String)>) {
    for (key, value) in vars {
        let Some(rest) = key.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let key_path = rest.split("__").collect::<Vec<_>>();
        if key_path.iter().any(|k| k.is_empty()) {
            continue;
        }
        let yaml_value = convert_env_value(&value);
        if let Err(err) = set_value_internal(config, &key_path, yaml_value) {
            error!(variable = %key, error = %err, "Ignoring environment override");
        }
    }
}

fn convert_env_value(value: &str) -> Value {
    serde_yaml::from_str::<Value>(value).unwrap_or_else(|_| Value::String(value.to_string()))
}

fn lower_keys_value(value: Value) -> Value {
    match value {
        Value::Mapping(map) => {
            let mut new_map = Mapping::new();
            for (k, v) in map {
                let new_key = match k {
                    Value::String(s) => Value::String(s.to_lowercase()),
                    other => other,
                };
                new_map.insert(new_key, lower_keys_value(v));
            }
            Value::Mapping(new_map)
        }
        Value::Sequence(seq) => Value::Sequence(seq.into_iter().map(lower_keys_value).collect()),
        _ => value,
    }
}

/// Merges external YAML configuration into default configuration
///
/// - For mappings (objects), it merges keys from external into default
/// - For scalars and sequences, external values replace default values
fn merge_yaml(default: &mut Value, external: &Value) {
    match (default, external) {
        (Value::Mapping(dmap), Value::Mapping(emap)) => {
            for (k, v) in emap {
                match dmap.get_mut(k) {
                    Some(dv) => merge_yaml(dv, v),
                    None => {
                        dmap.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (d, e) => *d = e.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_keeps_unmentioned_defaults() {
        let config = Config::from_yaml_str("soap:\n  mtom:\n    enabled: true\n").unwrap();
        assert_eq!(
            config.get_value(&["soap", "mtom", "enabled"]).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            config.get_value(&["soap", "logging", "dump_limit"]).unwrap(),
            Value::Number(4096.into())
        );
    }

    #[test]
    fn test_keys_are_case_insensitive() {
        let config = Config::from_yaml_str("Custom:\n  Key: 1\n").unwrap();
        assert!(config.get_value(&["custom", "key"]).is_ok());
        assert!(config.get_value(&["CUSTOM", "KEY"]).is_ok());
        assert!(config.get_value(&["custom", "missing"]).is_err());
    }

    #[test]
    fn test_env_overrides_are_typed() {
        let mut value: Value = serde_yaml::from_str(DEFAULT_CONFIG).unwrap();
        apply_env_overrides(
            &mut value,
            vec![
                ("PMOSOAP_CONFIG__SOAP__PIPELINE__POOL_CAPACITY".to_string(), "2".to_string()),
                ("PMOSOAP_CONFIG__SOAP__ADDRESSING__ENABLED".to_string(), "true".to_string()),
                ("PMOSOAP_CONFIG__".to_string(), "ignored".to_string()),
                ("OTHER".to_string(), "x".to_string()),
            ],
        );
        assert_eq!(
            get_value_internal(&value, &["soap", "pipeline", "pool_capacity"]).unwrap(),
            &Value::Number(2.into())
        );
        assert_eq!(
            get_value_internal(&value, &["soap", "addressing", "enabled"]).unwrap(),
            &Value::Bool(true)
        );
    }

    #[test]
    fn test_set_through_scalar_fails() {
        let config = Config::from_yaml_str("").unwrap();
        config.set_value(&["a"], Value::Bool(true)).unwrap();
        assert!(config.set_value(&["a", "b"], Value::Bool(true)).is_err());
    }

    #[test]
    fn test_remove_value() {
        let config = Config::from_yaml_str("").unwrap();
        assert!(config.remove_value(&["soap", "mtom"]).unwrap());
        assert!(!config.remove_value(&["soap", "mtom"]).unwrap());
        assert!(config.remove_value(&[]).is_err());
    }
}
