// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Client Configuration Types
//
// Kubernetes-style manifest (apiVersion/kind/metadata/spec) covering:
// - Credential invoker scheduling
// - Transport timeouts and the server-side credential requirement
// - Concurrent load defaults
// - Logging

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const API_VERSION: &str = "callcred/v1";
pub const KIND: &str = "ClientConfig";

/// Where a credential plugin runs relative to the calling path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SchedulingMode {
    /// Tokio blocking pool; the plugin may block freely.
    #[default]
    BlockingPool,
    /// A spawned Tokio task; the plugin must not block.
    Task,
    /// A dedicated OS thread per invocation.
    Thread,
}

impl fmt::Display for SchedulingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::BlockingPool => "blocking-pool",
            Self::Task => "task",
            Self::Thread => "thread",
        };
        f.write_str(name)
    }
}

impl FromStr for SchedulingMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "blocking-pool" | "blocking_pool" | "blocking" => Ok(Self::BlockingPool),
            "task" => Ok(Self::Task),
            "thread" => Ok(Self::Thread),
            other => Err(format!(
                "unknown scheduling mode '{}', expected blocking-pool, task or thread",
                other
            )),
        }
    }
}

/// Top-level client configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfigManifest {
    /// API version (must be "callcred/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "ClientConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    #[serde(default)]
    pub spec: ClientConfigSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientConfigSpec {
    #[serde(default)]
    pub invoker: InvokerConfig,

    #[serde(default)]
    pub transport: TransportConfig,

    #[serde(default)]
    pub load: LoadConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvokerConfig {
    #[serde(default)]
    pub scheduling: SchedulingMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Retry connecting until the listener is up
    #[serde(default = "default_true")]
    pub wait_for_ready: bool,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_connect_retry_ms")]
    pub connect_retry_ms: u64,

    /// Per-call deadline, covering credential acquisition. None = no deadline.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_timeout_ms: Option<u64>,

    /// Metadata key the server requires on every call. None = local peers only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub require_metadata_key: Option<String>,

    /// Fixed socket path for the harness. None = fresh temporary directory per run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub socket_path: Option<PathBuf>,
}

impl TransportConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn connect_retry(&self) -> Duration {
        Duration::from_millis(self.connect_retry_ms)
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_ms.map(Duration::from_millis)
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            wait_for_ready: true,
            connect_timeout_ms: default_connect_timeout_ms(),
            connect_retry_ms: default_connect_retry_ms(),
            call_timeout_ms: None,
            require_metadata_key: None,
            socket_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default = "default_calls_per_worker")]
    pub calls_per_worker: usize,

    /// Request payload echoed back by the server
    #[serde(default = "default_payload")]
    pub payload: String,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            calls_per_worker: default_calls_per_worker(),
            payload: default_payload(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g., "info", "debug", "trace")
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format ("text" or "json")
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_connect_retry_ms() -> u64 {
    20
}

fn default_workers() -> usize {
    32
}

fn default_calls_per_worker() -> usize {
    32
}

fn default_payload() -> String {
    "0000".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Default for ClientConfigManifest {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: "callcred".to_string(),
                version: None,
            },
            spec: ClientConfigSpec::default(),
        }
    }
}

impl ClientConfigManifest {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    pub fn to_yaml_string(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Discover configuration file using precedence order
    /// 1. CALLCRED_CONFIG_PATH environment variable
    /// 2. ./callcred.yaml (working directory)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("CALLCRED_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./callcred.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        let mut config = if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            Self::from_yaml_file(&path).map_err(|e| {
                anyhow::anyhow!("Failed to load config at {:?}: {}", path, e)
            })?
        } else if let Some(path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", path);
            Self::from_yaml_file(path)?
        } else {
            tracing::debug!("No configuration file found, using defaults");
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("CALLCRED_SCHEDULING") {
            match val.parse::<SchedulingMode>() {
                Ok(mode) => {
                    tracing::info!("Environment override: CALLCRED_SCHEDULING={}", mode);
                    self.spec.invoker.scheduling = mode;
                }
                Err(e) => tracing::warn!("Ignoring CALLCRED_SCHEDULING: {}", e),
            }
        }

        if let Ok(val) = std::env::var("CALLCRED_LOG_LEVEL") {
            self.spec.logging.level = val;
        }

        if let Ok(val) = std::env::var("CALLCRED_WORKERS") {
            match val.parse::<usize>() {
                Ok(workers) => self.spec.load.workers = workers,
                Err(_) => tracing::warn!(
                    "Invalid CALLCRED_WORKERS value '{}', expected a positive integer; ignoring",
                    val
                ),
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        if self.spec.load.workers == 0 {
            anyhow::bail!("spec.load.workers must be at least 1");
        }

        if self.spec.load.calls_per_worker == 0 {
            anyhow::bail!("spec.load.calls_per_worker must be at least 1");
        }

        if self.spec.transport.connect_retry_ms == 0 {
            anyhow::bail!("spec.transport.connect_retry_ms must be at least 1");
        }

        if let Some(key) = &self.spec.transport.require_metadata_key {
            if key.is_empty() {
                anyhow::bail!("spec.transport.require_metadata_key cannot be empty when set");
            }
        }

        if let Some(path) = &self.spec.transport.socket_path {
            if path.file_name().is_none() {
                anyhow::bail!(
                    "spec.transport.socket_path must name a socket file, got '{}'",
                    path.display()
                );
            }
        }

        match self.spec.logging.format.as_str() {
            "text" | "json" => {}
            other => anyhow::bail!("Invalid logging format: '{}'. Must be 'text' or 'json'", other),
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_manifest() {
        let manifest = ClientConfigManifest::default();
        assert_eq!(manifest.api_version, API_VERSION);
        assert_eq!(manifest.kind, KIND);
        assert_eq!(manifest.spec.invoker.scheduling, SchedulingMode::BlockingPool);
        assert_eq!(manifest.spec.load.workers, 32);
        assert_eq!(manifest.spec.load.calls_per_worker, 32);
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let yaml = r#"
apiVersion: callcred/v1
kind: ClientConfig
metadata:
  name: load-bench
spec:
  invoker:
    scheduling: thread
  transport:
    call_timeout_ms: 2500
    require_metadata_key: x-test-var
  load:
    workers: 8
"#;
        let manifest = ClientConfigManifest::from_yaml_str(yaml).unwrap();

        assert_eq!(manifest.metadata.name, "load-bench");
        assert_eq!(manifest.spec.invoker.scheduling, SchedulingMode::Thread);
        assert_eq!(manifest.spec.transport.call_timeout(), Some(Duration::from_millis(2500)));
        assert!(manifest.spec.transport.wait_for_ready);
        assert_eq!(manifest.spec.transport.require_metadata_key.as_deref(), Some("x-test-var"));
        assert_eq!(manifest.spec.load.workers, 8);
        assert_eq!(manifest.spec.load.calls_per_worker, 32);
        assert_eq!(manifest.spec.logging.format, "text");
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let mut manifest = ClientConfigManifest::default();

        manifest.api_version = "wrong/v1".to_string();
        assert!(manifest.validate().is_err());
        manifest.api_version = API_VERSION.to_string();

        manifest.kind = "NodeConfig".to_string();
        assert!(manifest.validate().is_err());
        manifest.kind = KIND.to_string();

        manifest.spec.load.workers = 0;
        assert!(manifest.validate().is_err());
        manifest.spec.load.workers = 4;

        manifest.spec.logging.format = "xml".to_string();
        assert!(manifest.validate().is_err());
        manifest.spec.logging.format = "json".to_string();

        manifest.spec.transport.socket_path = Some(PathBuf::from("/"));
        assert!(manifest.validate().is_err());
        manifest.spec.transport.socket_path = Some(PathBuf::from("/run/callcred/echo.sock"));

        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_scheduling_mode_parsing() {
        assert_eq!("task".parse::<SchedulingMode>().unwrap(), SchedulingMode::Task);
        assert_eq!(
            "Blocking-Pool".parse::<SchedulingMode>().unwrap(),
            SchedulingMode::BlockingPool
        );
        assert!("fiber".parse::<SchedulingMode>().is_err());
        assert_eq!(SchedulingMode::Thread.to_string(), "thread");
    }
}
