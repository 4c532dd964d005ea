//! JSON request helpers layered on any [`Transport`].

use crate::call::{Call, Method, Response};
use crate::cancel::CancelToken;
use crate::errors::HandoffError;
use crate::transport::Transport;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Send `call` and fail with `InvalidResponse` unless the status is 2xx.
pub async fn send_checked<T: Transport>(
    transport: &T,
    call: Call,
    cancel: &CancelToken,
) -> Result<Response, HandoffError> {
    let response = transport.send(call, cancel).await?;
    if !response.is_success() {
        return Err(HandoffError::InvalidResponse {
            status: response.status,
        });
    }
    Ok(response)
}

/// Encode `body` as JSON (omitted when `None`), send, and return the raw
/// successful response.
pub async fn send_json<T, B>(
    transport: &T,
    method: Method,
    target: &str,
    body: Option<&B>,
    cancel: &CancelToken,
) -> Result<Response, HandoffError>
where
    T: Transport,
    B: Serialize + ?Sized,
{
    let mut call = Call::new(method, target);
    if let Some(body) = body {
        call.body = Some(serde_json::to_vec(body).map_err(|e| HandoffError::Json(e.to_string()))?);
    }
    send_checked(transport, call, cancel).await
}

pub async fn get_json<T, R>(
    transport: &T,
    target: &str,
    cancel: &CancelToken,
) -> Result<R, HandoffError>
where
    T: Transport,
    R: DeserializeOwned,
{
    let response = send_json::<T, ()>(transport, Method::Get, target, None, cancel).await?;
    let body = response.body.unwrap_or_default();
    serde_json::from_slice(&body).map_err(|e| HandoffError::Json(e.to_string()))
}

pub async fn post_json<T, B>(
    transport: &T,
    target: &str,
    body: &B,
    cancel: &CancelToken,
) -> Result<(), HandoffError>
where
    T: Transport,
    B: Serialize + ?Sized,
{
    send_json(transport, Method::Post, target, Some(body), cancel).await?;
    Ok(())
}
