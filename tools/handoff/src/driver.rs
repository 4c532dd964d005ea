//! Scripting layer over the rendezvous channel.
//!
//! A scenario is an ordered list of `expect_call` / `respond_*` steps standing
//! in for a real backend.

use crate::call::{Call, Method, Response};
use crate::channel::RendezvousChannel;
use crate::config::DriverConfig;
use crate::errors::HandoffError;
use crate::exchange::{Delivery, Exchange};
use crate::logging::append_run_log;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum BodyExpectation {
    /// Byte-for-byte equality.
    Bytes(Vec<u8>),
    /// Equality after decoding the body as JSON.
    Json(Value),
}

/// The expected shape of the next call.
#[derive(Debug, Clone, PartialEq)]
pub struct CallMatcher {
    pub method: Method,
    pub target: String,
    pub body: Option<BodyExpectation>,
}

impl CallMatcher {
    pub fn new(method: Method, target: impl Into<String>) -> Self {
        Self {
            method,
            target: target.into(),
            body: None,
        }
    }

    pub fn get(target: impl Into<String>) -> Self {
        Self::new(Method::Get, target)
    }

    pub fn post(target: impl Into<String>) -> Self {
        Self::new(Method::Post, target)
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(BodyExpectation::Bytes(body.into()));
        self
    }

    pub fn with_json(mut self, body: Value) -> Self {
        self.body = Some(BodyExpectation::Json(body));
        self
    }

    pub fn matches(&self, call: &Call) -> bool {
        if call.method != self.method || call.target != self.target {
            return false;
        }
        match &self.body {
            None => true,
            Some(BodyExpectation::Bytes(expected)) => call.body.as_deref() == Some(expected.as_slice()),
            Some(BodyExpectation::Json(expected)) => call
                .body
                .as_deref()
                .and_then(|body| serde_json::from_slice::<Value>(body).ok())
                .is_some_and(|actual| &actual == expected),
        }
    }
}

impl fmt::Display for CallMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.target)?;
        match &self.body {
            None => Ok(()),
            Some(BodyExpectation::Bytes(body)) => write!(f, " ({} byte body)", body.len()),
            Some(BodyExpectation::Json(body)) => write!(f, " with json {body}"),
        }
    }
}

pub struct Driver {
    channel: Arc<RendezvousChannel>,
    config: DriverConfig,
    // Mismatched exchanges stay unsettled here so their producers keep
    // waiting until the driver is dropped.
    held: Mutex<Vec<Exchange>>,
}

impl Driver {
    pub fn new(channel: Arc<RendezvousChannel>) -> Self {
        Self::with_config(channel, DriverConfig::default())
    }

    pub fn with_config(channel: Arc<RendezvousChannel>, config: DriverConfig) -> Self {
        Self {
            channel,
            config,
            held: Mutex::new(Vec::new()),
        }
    }

    pub fn channel(&self) -> Arc<RendezvousChannel> {
        Arc::clone(&self.channel)
    }

    /// Wait for the next call and check it against `matcher`.
    pub async fn expect_call(&self, matcher: &CallMatcher) -> Result<Exchange, HandoffError> {
        let exchange = match self.config.step_timeout_ms {
            Some(ms) => self.channel.next_timeout(Duration::from_millis(ms)).await?,
            None => self.channel.next().await?,
        };
        self.check(matcher, exchange)
    }

    /// Thread-backed variant of [`expect_call`](Self::expect_call).
    pub fn blocking_expect_call(&self, matcher: &CallMatcher) -> Result<Exchange, HandoffError> {
        let exchange = match self.config.step_timeout_ms {
            Some(ms) => self
                .channel
                .blocking_next_timeout(Duration::from_millis(ms))?,
            None => self.channel.blocking_next()?,
        };
        self.check(matcher, exchange)
    }

    /// Fail if a call is already waiting for an answer.
    ///
    /// When another consumer is parked in `next`, any queued exchange counts
    /// as unexpected, including ones whose producer has already given up.
    pub fn expect_no_more_calls(&self) -> Result<(), HandoffError> {
        match self.channel.try_next() {
            Ok(Some(exchange)) => {
                let call = exchange.call().to_string();
                append_run_log("error", "driver.unexpected_call", json!({ "call": call }));
                self.hold(exchange);
                Err(HandoffError::UnexpectedCall { call })
            }
            Ok(None) | Err(HandoffError::ChannelClosed) => Ok(()),
            // Another consumer holds the queue; count what is still queued.
            Err(HandoffError::ConsumerBusy { pending }) if pending > 0 => {
                let call = format!("{pending} queued call(s) behind another consumer");
                append_run_log("error", "driver.unexpected_call", json!({ "call": call }));
                Err(HandoffError::UnexpectedCall { call })
            }
            Err(HandoffError::ConsumerBusy { .. }) => Ok(()),
            Err(err) => Err(err),
        }
    }

    pub fn respond_ok(&self, exchange: &Exchange) -> Result<Delivery, HandoffError> {
        exchange.settle(Response::ok())
    }

    pub fn respond_with_status(
        &self,
        exchange: &Exchange,
        status: u16,
    ) -> Result<Delivery, HandoffError> {
        exchange.settle(Response::with_status(status))
    }

    pub fn respond_with_body(
        &self,
        exchange: &Exchange,
        body: impl Into<Vec<u8>>,
    ) -> Result<Delivery, HandoffError> {
        exchange.settle(Response::with_body(body))
    }

    pub fn respond_with_json<T: Serialize>(
        &self,
        exchange: &Exchange,
        body: &T,
    ) -> Result<Delivery, HandoffError> {
        let encoded = serde_json::to_vec(body).map_err(|e| HandoffError::Json(e.to_string()))?;
        exchange.settle(Response::with_body(encoded))
    }

    /// Number of mismatched or unexpected exchanges the driver is holding.
    pub fn held_count(&self) -> usize {
        self.held.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn check(&self, matcher: &CallMatcher, exchange: Exchange) -> Result<Exchange, HandoffError> {
        if matcher.matches(exchange.call()) {
            append_run_log(
                "debug",
                "driver.call.matched",
                json!({ "id": exchange.id(), "expected": matcher.to_string() }),
            );
            return Ok(exchange);
        }
        let expected = matcher.to_string();
        let actual = exchange.call().to_string();
        append_run_log(
            "error",
            "driver.call.mismatched",
            json!({ "id": exchange.id(), "expected": expected, "actual": actual }),
        );
        self.hold(exchange);
        Err(HandoffError::MismatchedExpectation { expected, actual })
    }

    fn hold(&self, exchange: Exchange) {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(exchange);
    }
}

/// The raw body of the captured call.
pub fn read_body(exchange: &Exchange) -> Result<&[u8], HandoffError> {
    exchange
        .call()
        .body
        .as_deref()
        .ok_or_else(|| HandoffError::MissingBody {
            call: exchange.call().to_string(),
        })
}

pub fn read_json<T: DeserializeOwned>(exchange: &Exchange) -> Result<T, HandoffError> {
    let body = read_body(exchange)?;
    serde_json::from_slice(body).map_err(|e| HandoffError::Json(e.to_string()))
}
