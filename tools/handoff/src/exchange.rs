//! One call paired with a single-assignment response slot.
//!
//! An exchange is split in two halves that share a one-shot slot:
//! the consumer side ([`Exchange`]) sees the call and may settle it once,
//! the producer side ([`PendingResponse`]) waits for that settlement.

use crate::call::{Call, Response};
use crate::cancel::{block_on, with_deadline, CancelToken};
use crate::errors::HandoffError;
use crate::logging::append_run_log;
use serde_json::json;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;

/// Outcome of a successful settle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The producer was still waiting and received the response.
    Delivered,
    /// The producer gave up (cancelled or dropped) before the response arrived.
    Abandoned,
}

struct ExchangeInner {
    id: u64,
    call: Call,
    responder: Mutex<Option<oneshot::Sender<Response>>>,
}

/// Consumer-side handle. Clones share the same slot.
#[derive(Clone)]
pub struct Exchange {
    inner: Arc<ExchangeInner>,
}

/// Producer-side handle returned by submit.
///
/// Dropping it abandons the exchange: a consumer will never be handed it.
#[derive(Debug)]
#[must_use = "dropping the pending response abandons the exchange"]
pub struct PendingResponse {
    id: u64,
    slot: oneshot::Receiver<Response>,
}

/// Create both halves of a fresh exchange.
pub fn exchange_pair(id: u64, call: Call) -> (Exchange, PendingResponse) {
    let (responder, slot) = oneshot::channel();
    let exchange = Exchange {
        inner: Arc::new(ExchangeInner {
            id,
            call,
            responder: Mutex::new(Some(responder)),
        }),
    };
    (exchange, PendingResponse { id, slot })
}

impl Exchange {
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn call(&self) -> &Call {
        &self.inner.call
    }

    pub fn is_settled(&self) -> bool {
        self.responder().is_none()
    }

    /// True when the producer can no longer observe a response.
    pub fn is_abandoned(&self) -> bool {
        self.responder()
            .as_ref()
            .is_some_and(oneshot::Sender::is_closed)
    }

    /// Fill the response slot. Only the first call succeeds.
    pub fn settle(&self, response: Response) -> Result<Delivery, HandoffError> {
        let responder = self.responder().take();
        let Some(responder) = responder else {
            append_run_log(
                "error",
                "exchange.settle.duplicate",
                json!({ "id": self.id(), "call": self.call().to_string() }),
            );
            return Err(HandoffError::AlreadySettled { id: self.id() });
        };
        let status = response.status;
        match responder.send(response) {
            Ok(()) => {
                append_run_log(
                    "info",
                    "exchange.settled",
                    json!({ "id": self.id(), "status": status }),
                );
                Ok(Delivery::Delivered)
            }
            Err(_) => {
                append_run_log(
                    "warn",
                    "exchange.settled.abandoned",
                    json!({ "id": self.id(), "status": status }),
                );
                Ok(Delivery::Abandoned)
            }
        }
    }

    fn responder(&self) -> std::sync::MutexGuard<'_, Option<oneshot::Sender<Response>>> {
        self.inner
            .responder
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Exchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Exchange")
            .field("id", &self.id())
            .field("call", self.call())
            .field("settled", &self.is_settled())
            .finish()
    }
}

impl PendingResponse {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Suspend until the exchange is settled.
    pub async fn wait(self) -> Result<Response, HandoffError> {
        let id = self.id;
        self.slot
            .await
            .map_err(|_| HandoffError::ExchangeDropped { id })
    }

    /// Like [`wait`](Self::wait), failing with `Cancelled` once `cancel` fires.
    /// A response that is already settled wins over a concurrent cancellation.
    pub async fn wait_cancellable(
        mut self,
        cancel: &CancelToken,
    ) -> Result<Response, HandoffError> {
        let id = self.id;
        tokio::select! {
            biased;
            received = &mut self.slot => {
                received.map_err(|_| HandoffError::ExchangeDropped { id })
            }
            _ = cancel.cancelled() => {
                self.slot.close();
                append_run_log("warn", "exchange.wait.cancelled", json!({ "id": id }));
                Err(HandoffError::Cancelled(format!("response wait for exchange {id}")))
            }
        }
    }

    pub async fn wait_timeout(self, limit: Duration) -> Result<Response, HandoffError> {
        let stage = format!("response wait for exchange {}", self.id);
        with_deadline(limit, &stage, self.wait()).await
    }

    /// Thread-backed variant of [`wait`](Self::wait). Must not be called
    /// from inside an async runtime.
    pub fn blocking_wait(self) -> Result<Response, HandoffError> {
        let id = self.id;
        self.slot
            .blocking_recv()
            .map_err(|_| HandoffError::ExchangeDropped { id })
    }

    pub fn blocking_wait_timeout(self, limit: Duration) -> Result<Response, HandoffError> {
        block_on(self.wait_timeout(limit))?
    }
}
