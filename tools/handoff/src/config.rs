use crate::errors::HandoffError;
use crate::logging::DEFAULT_MAX_PAYLOAD_BYTES;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct HarnessConfig {
    pub driver: DriverConfig,
    pub logging: LoggingConfig,
    pub workflow: WorkflowConfig,
}

/// Settings for [`Driver`](crate::driver::Driver) scripts.
///
/// The `handoff` binary answers calls from a stub and runs no driver, so it
/// only validates this section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DriverConfig {
    /// Upper bound for a single `expect_call`; `None` waits forever.
    pub step_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    pub path: Option<PathBuf>,
    pub max_payload_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkflowConfig {
    pub api_base: String,
    pub username: String,
    pub password: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
        }
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            api_base: "/api".to_string(),
            username: "Orion".to_string(),
            password: "secret".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
struct PartialHarnessConfig {
    driver: Option<PartialDriverConfig>,
    logging: Option<PartialLoggingConfig>,
    workflow: Option<PartialWorkflowConfig>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct PartialDriverConfig {
    step_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct PartialLoggingConfig {
    path: Option<PathBuf>,
    max_payload_bytes: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct PartialWorkflowConfig {
    api_base: Option<String>,
    username: Option<String>,
    password: Option<String>,
}

pub fn load_config(path: Option<&Path>) -> Result<HarnessConfig, HandoffError> {
    let mut cfg = HarnessConfig::default();
    if let Some(path) = path {
        let text = std::fs::read_to_string(path)
            .map_err(|e| HandoffError::Io(format!("{}: {e}", path.display())))?;
        merge_toml(&mut cfg, &text)?;
    }
    validate_config(&cfg)?;
    Ok(cfg)
}

pub fn parse_config(text: &str) -> Result<HarnessConfig, HandoffError> {
    let mut cfg = HarnessConfig::default();
    merge_toml(&mut cfg, text)?;
    validate_config(&cfg)?;
    Ok(cfg)
}

fn merge_toml(cfg: &mut HarnessConfig, text: &str) -> Result<(), HandoffError> {
    let partial: PartialHarnessConfig =
        toml::from_str(text).map_err(|e| HandoffError::ConfigParse(e.to_string()))?;
    merge_partial_config(cfg, partial);
    Ok(())
}

fn merge_partial_config(cfg: &mut HarnessConfig, partial: PartialHarnessConfig) {
    if let Some(driver) = partial.driver {
        if let Some(value) = driver.step_timeout_ms {
            cfg.driver.step_timeout_ms = Some(value);
        }
    }

    if let Some(logging) = partial.logging {
        if let Some(path) = logging.path {
            cfg.logging.path = Some(path);
        }
        if let Some(value) = logging.max_payload_bytes {
            cfg.logging.max_payload_bytes = value;
        }
    }

    if let Some(workflow) = partial.workflow {
        if let Some(value) = workflow.api_base {
            cfg.workflow.api_base = value;
        }
        if let Some(value) = workflow.username {
            cfg.workflow.username = value;
        }
        if let Some(value) = workflow.password {
            cfg.workflow.password = value;
        }
    }
}

fn validate_config(cfg: &HarnessConfig) -> Result<(), HandoffError> {
    if cfg.driver.step_timeout_ms == Some(0) {
        return Err(HandoffError::InvalidConfig(
            "driver.step_timeout_ms must be greater than zero".to_string(),
        ));
    }
    if cfg.logging.max_payload_bytes < 16 {
        return Err(HandoffError::InvalidConfig(
            "logging.max_payload_bytes must be at least 16".to_string(),
        ));
    }
    let base = &cfg.workflow.api_base;
    if !base.is_empty() && (!base.starts_with('/') || base.ends_with('/')) {
        return Err(HandoffError::InvalidConfig(format!(
            "workflow.api_base must be empty or start with '/' and not end with '/': {base}"
        )));
    }
    Ok(())
}
