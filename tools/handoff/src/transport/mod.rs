//! The single capability a workflow under test depends on.
//!
//! # Overview
//!
//! Three implementations ship with the crate:
//! 1. **RendezvousChannel** – every call is handed to a driver that answers it
//! 2. **StubTransport** – static canned responses keyed by method and target
//! 3. **RecordingTransport** – wraps any transport and logs each call in order
//!
//! Workflow code is generic over [`Transport`], so a real network client can
//! be substituted without changing callers.

pub mod recording;
pub mod stub;

use crate::call::{Call, Response};
use crate::cancel::CancelToken;
use crate::errors::HandoffError;
use std::future::Future;
use std::sync::Arc;

pub trait Transport: Send + Sync {
    /// Issue `call` and suspend until its response is available or `cancel` fires.
    fn send(
        &self,
        call: Call,
        cancel: &CancelToken,
    ) -> impl Future<Output = Result<Response, HandoffError>> + Send;
}

impl<T: Transport> Transport for Arc<T> {
    fn send(
        &self,
        call: Call,
        cancel: &CancelToken,
    ) -> impl Future<Output = Result<Response, HandoffError>> + Send {
        (**self).send(call, cancel)
    }
}

impl<T: Transport> Transport for &T {
    fn send(
        &self,
        call: Call,
        cancel: &CancelToken,
    ) -> impl Future<Output = Result<Response, HandoffError>> + Send {
        (**self).send(call, cancel)
    }
}
