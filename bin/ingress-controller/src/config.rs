//! Process configuration
//!
//! Read from the YAML file named by `INGRESS_CONTROLLER_CONFIG` when set,
//! then overridden field by field from the environment. Every field has a
//! default, so an empty file (or none) is a valid configuration.

use ingress_apisix::AdminConfig;
use ingress_core::translation::IngressVersion;
use ingress_core::{ControllerConfig, CoreError, EndpointMode};
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

pub const CONFIG_PATH_ENV: &str = "INGRESS_CONTROLLER_CONFIG";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(CoreError::InvalidConfiguration(format!(
                "unknown log format {:?}, expected \"text\" or \"json\"",
                other
            ))),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: String,
    pub log_format: LogFormat,
    pub kubernetes: KubernetesConfig,
    pub apisix: ApisixConfig,
    pub controller: WorkerConfig,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct KubernetesConfig {
    pub watching_namespaces: Vec<String>,
    pub ingress_version: String,
    pub endpoint_mode: String,
    pub ingress_class: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ApisixConfig {
    pub base_url: String,
    pub admin_key: Option<String>,
    pub timeout_seconds: u64,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub workers: usize,
    pub fast_retry_delay_ms: u64,
    pub slow_retry_delay_ms: u64,
    pub max_fast_attempts: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            kubernetes: KubernetesConfig::default(),
            apisix: ApisixConfig::default(),
            controller: WorkerConfig::default(),
        }
    }
}

impl Default for KubernetesConfig {
    fn default() -> Self {
        Self {
            watching_namespaces: Vec::new(),
            ingress_version: IngressVersion::V1.to_string(),
            endpoint_mode: EndpointMode::Endpoints.to_string(),
            ingress_class: "apisix".to_string(),
        }
    }
}

impl Default for ApisixConfig {
    fn default() -> Self {
        let admin = AdminConfig::default();
        Self {
            base_url: admin.base_url,
            admin_key: None,
            timeout_seconds: admin.timeout.as_secs(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        let controller = ControllerConfig::default();
        Self {
            workers: controller.workers,
            fast_retry_delay_ms: controller.fast_retry_delay.as_millis() as u64,
            slow_retry_delay_ms: controller.slow_retry_delay.as_millis() as u64,
            max_fast_attempts: controller.max_fast_attempts,
        }
    }
}

/// Configuration with every mode resolved
#[derive(Clone, Debug)]
pub struct Settings {
    pub log_level: String,
    pub log_format: LogFormat,
    pub ingress_version: IngressVersion,
    pub endpoint_mode: EndpointMode,
    pub ingress_class: String,
    pub admin: AdminConfig,
    pub controller: ControllerConfig,
}

impl Config {
    /// File named by the environment (if any), then environment overrides
    pub fn load() -> Result<Self, CoreError> {
        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.is_empty() => Self::from_file(Path::new(&path))?,
            _ => Self::default(),
        };
        config.apply_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, CoreError> {
        let raw = std::fs::read_to_string(path).map_err(|err| {
            CoreError::InvalidConfiguration(format!("failed to read {}: {}", path.display(), err))
        })?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, CoreError> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw)
            .map_err(|err| CoreError::InvalidConfiguration(format!("invalid config file: {}", err)))
    }

    /// Apply overrides from a variable lookup; unset variables keep the
    /// current value
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), CoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("APISIX_BASE_URL") {
            self.apisix.base_url = url;
        }
        if let Some(key) = lookup("APISIX_ADMIN_KEY") {
            self.apisix.admin_key = Some(key);
        }
        if let Some(namespaces) = lookup("WATCHING_NAMESPACES") {
            self.kubernetes.watching_namespaces = namespaces
                .split(',')
                .map(str::trim)
                .filter(|ns| !ns.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(mode) = lookup("ENDPOINT_MODE") {
            self.kubernetes.endpoint_mode = mode;
        }
        if let Some(version) = lookup("INGRESS_VERSION") {
            self.kubernetes.ingress_version = version;
        }
        if let Some(level) = lookup("LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some(format) = lookup("LOG_FORMAT") {
            self.log_format = format.parse()?;
        }
        Ok(())
    }

    /// Resolve string-valued modes; an unknown value is a startup error
    pub fn validate(&self) -> Result<Settings, CoreError> {
        let endpoint_mode = self.kubernetes.endpoint_mode.parse()?;
        let ingress_version = self.kubernetes.ingress_version.parse()?;

        if self.apisix.base_url.is_empty() {
            return Err(CoreError::InvalidConfiguration(
                "apisix.base_url must not be empty".to_string(),
            ));
        }
        if self.kubernetes.ingress_class.is_empty() {
            return Err(CoreError::InvalidConfiguration(
                "kubernetes.ingress_class must not be empty".to_string(),
            ));
        }
        if self.controller.workers == 0 {
            return Err(CoreError::InvalidConfiguration(
                "controller.workers must be at least 1".to_string(),
            ));
        }

        Ok(Settings {
            log_level: self.log_level.clone(),
            log_format: self.log_format,
            ingress_version,
            endpoint_mode,
            ingress_class: self.kubernetes.ingress_class.clone(),
            admin: AdminConfig {
                base_url: self.apisix.base_url.clone(),
                admin_key: self.apisix.admin_key.clone(),
                timeout: Duration::from_secs(self.apisix.timeout_seconds),
            },
            controller: ControllerConfig {
                workers: self.controller.workers,
                fast_retry_delay: Duration::from_millis(self.controller.fast_retry_delay_ms),
                slow_retry_delay: Duration::from_millis(self.controller.slow_retry_delay_ms),
                max_fast_attempts: self.controller.max_fast_attempts,
                watching_namespaces: self.kubernetes.watching_namespaces.clone(),
            },
        })
    }
}
