//! Host and per-module configuration.
//!
//! [`HostConfig`] is layered with figment: built-in defaults, then an optional
//! YAML file, then `MODHOST__*` environment variables (nested keys split on
//! `__`, e.g. `MODHOST__LIFECYCLE__SHUTDOWN_TIMEOUT_MS=500`).
//!
//! Modules never see the whole file. They read their own section through
//! [`ConfigProvider`], either leniently ([`module_config_or_default`]) or
//! strictly ([`module_config_required`]).

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "MODHOST__";

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("module '{module}' not found")]
    ModuleNotFound { module: String },
    #[error("module '{module}' config must be an object")]
    InvalidModuleStructure { module: String },
    #[error("missing 'config' section in module '{module}'")]
    MissingConfigSection { module: String },
    #[error("invalid config for module '{module}': {source}")]
    InvalidConfig {
        module: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("config file does not exist: {path}")]
    MissingFile { path: String },
    #[error("failed to load host configuration: {0}")]
    Load(#[source] Box<figment::Error>),
}

/// Source of raw per-module configuration sections.
pub trait ConfigProvider: Send + Sync {
    /// Raw section for `module_name` (`modules.<name>`), if present.
    fn get_module_config(&self, module_name: &str) -> Option<&serde_json::Value>;
}

/// Provider with no module sections; every module runs on defaults.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyConfigProvider;

impl ConfigProvider for EmptyConfigProvider {
    fn get_module_config(&self, _module_name: &str) -> Option<&serde_json::Value> {
        None
    }
}

/// Load `modules.<name>.config`, falling back to `T::default()` when absent.
///
/// # Errors
/// Returns [`ConfigError::InvalidConfig`] if the section exists but does not deserialize into `T`.
pub fn module_config_or_default<T: DeserializeOwned + Default>(
    provider: &dyn ConfigProvider,
    module_name: &str,
) -> Result<T, ConfigError> {
    let Some(section) = provider
        .get_module_config(module_name)
        .and_then(serde_json::Value::as_object)
        .and_then(|obj| obj.get("config"))
    else {
        return Ok(T::default());
    };

    serde_json::from_value(section.clone()).map_err(|source| ConfigError::InvalidConfig {
        module: module_name.to_owned(),
        source,
    })
}

/// Load `modules.<name>.config`, failing when it is missing.
///
/// # Errors
/// Returns [`ConfigError`] if the module section is missing, is not an object,
/// has no `config` key, or does not deserialize into `T`.
pub fn module_config_required<T: DeserializeOwned>(
    provider: &dyn ConfigProvider,
    module_name: &str,
) -> Result<T, ConfigError> {
    let raw = provider
        .get_module_config(module_name)
        .ok_or_else(|| ConfigError::ModuleNotFound {
            module: module_name.to_owned(),
        })?;
    let obj = raw
        .as_object()
        .ok_or_else(|| ConfigError::InvalidModuleStructure {
            module: module_name.to_owned(),
        })?;
    let section = obj
        .get("config")
        .ok_or_else(|| ConfigError::MissingConfigSection {
            module: module_name.to_owned(),
        })?;

    serde_json::from_value(section.clone()).map_err(|source| ConfigError::InvalidConfig {
        module: module_name.to_owned(),
        source,
    })
}

/// Per-call lifecycle timeouts, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct LifecycleConfig {
    pub initialize_timeout_ms: u64,
    pub activate_timeout_ms: u64,
    /// Applied separately to each `deactivate()` and `cleanup()` call.
    pub shutdown_timeout_ms: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            initialize_timeout_ms: 30_000,
            activate_timeout_ms: 30_000,
            shutdown_timeout_ms: 10_000,
        }
    }
}

impl LifecycleConfig {
    #[must_use]
    pub fn initialize_timeout(&self) -> Duration {
        Duration::from_millis(self.initialize_timeout_ms)
    }

    #[must_use]
    pub fn activate_timeout(&self) -> Duration {
        Duration::from_millis(self.activate_timeout_ms)
    }

    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `info` or `modhost=debug,info`. `RUST_LOG` wins when set.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: LogFormat::Text,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8087".to_owned(),
        }
    }
}

/// Effective configuration of a host process.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct HostConfig {
    pub server: ServerConfig,
    pub lifecycle: LifecycleConfig,
    pub logging: LoggingConfig,
    /// Raw module sections: `modules.<name> = { config: { ... } }`.
    pub modules: BTreeMap<String, serde_json::Value>,
}

impl HostConfig {
    /// Load defaults, then `path` (if any), then `MODHOST__*` environment overrides.
    ///
    /// # Errors
    /// Returns [`ConfigError::MissingFile`] if `path` is not a file, and
    /// [`ConfigError::Load`] if it cannot be parsed or the merged values do not
    /// match the configuration schema.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::new().merge(Serialized::defaults(Self::default()));
        if let Some(path) = path {
            if !path.is_file() {
                return Err(ConfigError::MissingFile {
                    path: path.display().to_string(),
                });
            }
            figment = figment.merge(Yaml::file_exact(path));
        }
        figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|e| ConfigError::Load(Box::new(e)))
    }

    /// Pretty JSON rendering of the effective configuration.
    ///
    /// # Errors
    /// Returns an error if a module section cannot be serialized.
    pub fn to_pretty_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl ConfigProvider for HostConfig {
    fn get_module_config(&self, module_name: &str) -> Option<&serde_json::Value> {
        self.modules.get(module_name)
    }
}
