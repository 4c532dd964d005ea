//! Request-log transport: forwards to an inner transport and keeps an ordered
//! record of every call and its outcome.

use crate::call::{Call, Response};
use crate::cancel::CancelToken;
use crate::errors::HandoffError;
use crate::logging::append_run_log;
use crate::transport::Transport;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallRecord {
    /// Issue order, starting at 1.
    pub seq: u64,
    pub method: String,
    pub target: String,
    pub body_len: usize,
    /// `sha256:` plus the first 8 digest bytes in hex, when a body was sent.
    pub body_digest: Option<String>,
    /// Response status, or `None` when the inner transport failed.
    pub status: Option<u16>,
    pub error: Option<String>,
}

pub struct RecordingTransport<T> {
    inner: T,
    next_seq: AtomicU64,
    records: Mutex<Vec<CallRecord>>,
}

impl<T: Transport> RecordingTransport<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            next_seq: AtomicU64::new(1),
            records: Mutex::new(Vec::new()),
        }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    /// Completed calls ordered by `seq`.
    pub fn records(&self) -> Vec<CallRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// One JSON object per line, in call order.
    pub fn to_jsonl(&self) -> Result<String, HandoffError> {
        let mut out = String::new();
        for record in self.records() {
            let line =
                serde_json::to_string(&record).map_err(|e| HandoffError::Json(e.to_string()))?;
            out.push_str(&line);
            out.push('\n');
        }
        Ok(out)
    }

    fn push(&self, seq: u64, call: &Call, outcome: &Result<Response, HandoffError>) {
        let record = {
            let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
            let record = CallRecord {
                seq,
                method: call.method.as_str().to_string(),
                target: call.target.clone(),
                body_len: call.body_len(),
                body_digest: call.body.as_deref().map(body_digest),
                status: outcome.as_ref().ok().map(|response| response.status),
                error: outcome.as_ref().err().map(ToString::to_string),
            };
            let at = records.partition_point(|existing| existing.seq < seq);
            records.insert(at, record.clone());
            record
        };
        let payload = serde_json::to_value(&record).unwrap_or_default();
        append_run_log("info", "transport.call.recorded", payload);
    }
}

impl<T: Transport> Transport for RecordingTransport<T> {
    async fn send(&self, call: Call, cancel: &CancelToken) -> Result<Response, HandoffError> {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let outcome = self.inner.send(call.clone(), cancel).await;
        self.push(seq, &call, &outcome);
        outcome
    }
}

fn body_digest(body: &[u8]) -> String {
    let hash = Sha256::digest(body);
    let prefix = hash[..8]
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<String>();
    format!("sha256:{prefix}")
}
