//! Sample item-sync workflow used as the logic under test.

use crate::call::Call;
use crate::cancel::CancelToken;
use crate::client::{get_json, post_json, send_checked};
use crate::config::WorkflowConfig;
use crate::errors::HandoffError;
use crate::logging::append_run_log;
use crate::transport::Transport;
use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    /// Prefix for every target, e.g. `/api`; may be empty.
    pub api_base: String,
    pub credentials: Credentials,
}

impl From<&WorkflowConfig> for SyncOptions {
    fn from(cfg: &WorkflowConfig) -> Self {
        Self {
            api_base: cfg.api_base.clone(),
            credentials: Credentials {
                username: cfg.username.clone(),
                password: cfg.password.clone(),
            },
        }
    }
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self::from(&WorkflowConfig::default())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub uploaded: Vec<String>,
    pub skipped: Vec<String>,
}

/// Log in, list remote items, and upload every local item the remote lacks.
///
/// Items are uploaded in name order. Any non-2xx response aborts the sync.
pub async fn sync_items<T: Transport>(
    transport: &T,
    items: &BTreeMap<String, Vec<u8>>,
    options: &SyncOptions,
    cancel: &CancelToken,
) -> Result<SyncReport, HandoffError> {
    let base = options.api_base.as_str();
    post_json(
        transport,
        &format!("{base}/session"),
        &options.credentials,
        cancel,
    )
    .await?;

    let remote: Vec<String> = get_json(transport, &format!("{base}/items"), cancel).await?;
    let remote = remote.into_iter().collect::<HashSet<_>>();

    let mut report = SyncReport::default();
    for (name, bytes) in items {
        if remote.contains(name) {
            report.skipped.push(name.clone());
            continue;
        }
        let call = Call::post(format!("{base}/items?name={name}")).with_body(bytes.clone());
        send_checked(transport, call, cancel).await?;
        report.uploaded.push(name.clone());
    }

    append_run_log(
        "info",
        "workflow.sync.complete",
        json!({ "uploaded": report.uploaded, "skipped": report.skipped }),
    );
    Ok(report)
}

/// Read every regular file directly under `dir` as an item keyed by file name.
pub fn load_items(dir: &Path) -> Result<BTreeMap<String, Vec<u8>>, HandoffError> {
    let mut items = BTreeMap::new();
    let entries = std::fs::read_dir(dir)
        .map_err(|e| HandoffError::Io(format!("{}: {e}", dir.display())))?;
    for entry in entries {
        let entry = entry.map_err(|e| HandoffError::Io(e.to_string()))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let bytes = std::fs::read(&path)
            .map_err(|e| HandoffError::Io(format!("{}: {e}", path.display())))?;
        items.insert(name.to_string(), bytes);
    }
    Ok(items)
}
