//! Static canned-response transport.
//!
//! No rendezvous happens here: every call is answered immediately from a
//! fixed route table, and every received call is kept for later assertions.

use crate::call::{Call, Method, Response};
use crate::cancel::CancelToken;
use crate::errors::HandoffError;
use crate::logging::append_run_log;
use crate::transport::Transport;
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Default)]
pub struct StubTransport {
    routes: BTreeMap<(Method, String), Response>,
    received: Mutex<Vec<Call>>,
}

#[derive(Debug, Deserialize)]
struct StubFile {
    #[serde(default, rename = "route")]
    routes: Vec<StubRoute>,
}

#[derive(Debug, Deserialize)]
struct StubRoute {
    method: String,
    target: String,
    #[serde(default = "default_status")]
    status: u16,
    body: Option<String>,
}

fn default_status() -> u16 {
    200
}

impl StubTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_route(mut self, method: Method, target: impl Into<String>, response: Response) -> Self {
        self.routes.insert((method, target.into()), response);
        self
    }

    /// Parse a route table such as:
    ///
    /// ```toml
    /// [[route]]
    /// method = "GET"
    /// target = "/api/items"
    /// body = '["Item1.txt"]'
    /// ```
    pub fn from_toml_str(text: &str) -> Result<Self, HandoffError> {
        let file: StubFile =
            toml::from_str(text).map_err(|e| HandoffError::ConfigParse(e.to_string()))?;
        let mut stub = Self::new();
        for route in file.routes {
            let method = Method::parse(&route.method).ok_or_else(|| {
                HandoffError::InvalidConfig(format!("unknown stub method {}", route.method))
            })?;
            let key = (method, route.target);
            if stub.routes.contains_key(&key) {
                return Err(HandoffError::InvalidConfig(format!(
                    "duplicate stub route {} {}",
                    key.0, key.1
                )));
            }
            let response = Response {
                status: route.status,
                body: route.body.map(String::into_bytes),
            };
            stub.routes.insert(key, response);
        }
        Ok(stub)
    }

    pub fn load(path: &Path) -> Result<Self, HandoffError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| HandoffError::Io(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    /// Every call received so far, matched or not, in arrival order.
    pub fn received(&self) -> Vec<Call> {
        self.received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn respond(&self, call: Call) -> Result<Response, HandoffError> {
        let found = self
            .routes
            .get(&(call.method, call.target.clone()))
            .cloned();
        let summary = call.to_string();
        self.received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
        match found {
            Some(response) => Ok(response),
            None => {
                append_run_log("warn", "stub.unmatched", json!({ "call": summary }));
                Err(HandoffError::NoCannedResponse { call: summary })
            }
        }
    }
}

impl Transport for StubTransport {
    async fn send(&self, call: Call, cancel: &CancelToken) -> Result<Response, HandoffError> {
        if cancel.is_cancelled() {
            return Err(HandoffError::Cancelled(format!("stub send of {call}")));
        }
        self.respond(call)
    }
}

#[cfg(test)]
mod tests {
    use super::StubTransport;
    use crate::call::{Call, Method, Response};
    use crate::cancel::CancelToken;
    use crate::errors::HandoffError;
    use crate::transport::Transport;

    #[tokio::test]
    async fn matched_routes_answer_and_every_call_is_recorded() {
        let stub = StubTransport::new()
            .with_route(Method::Post, "/api/session", Response::ok())
            .with_route(Method::Get, "/api/items", Response::with_body(b"[]".to_vec()));
        let cancel = CancelToken::new();

        let response = stub.send(Call::get("/api/items"), &cancel).await.expect("send");
        assert_eq!(response.body.as_deref(), Some(&b"[]"[..]));

        let err = stub
            .send(Call::get("/api/unknown"), &cancel)
            .await
            .expect_err("unmatched");
        assert!(matches!(err, HandoffError::NoCannedResponse { ref call } if call == "GET /api/unknown"));
        assert_eq!(
            stub.received()
                .iter()
                .map(|call| call.target.as_str())
                .collect::<Vec<_>>(),
            vec!["/api/items", "/api/unknown"]
        );
    }

    #[test]
    fn method_and_target_both_key_the_route() {
        let stub = StubTransport::new().with_route(Method::Get, "/api/items", Response::ok());
        assert!(stub.respond(Call::post("/api/items")).is_err());
        assert!(stub.respond(Call::get("/api/items?x=1")).is_err());
        assert!(stub.respond(Call::get("/api/items")).is_ok());
    }

    #[test]
    fn toml_route_table_parses_with_default_status() {
        let stub = StubTransport::from_toml_str(
            r#"
            [[route]]
            method = "post"
            target = "/api/session"

            [[route]]
            method = "GET"
            target = "/api/items"
            status = 503
            body = "down"
            "#,
        )
        .expect("parse");
        assert_eq!(stub.route_count(), 2);
        assert_eq!(stub.respond(Call::post("/api/session")).expect("session").status, 200);
        let items = stub.respond(Call::get("/api/items")).expect("items");
        assert_eq!(items.status, 503);
        assert_eq!(items.body.as_deref(), Some(&b"down"[..]));
    }

    #[test]
    fn toml_rejects_unknown_methods_and_duplicates() {
        let err = StubTransport::from_toml_str(
            "[[route]]\nmethod = \"TRACE\"\ntarget = \"/\"\n",
        )
        .expect_err("unknown method");
        assert!(err.to_string().contains("unknown stub method TRACE"));

        let err = StubTransport::from_toml_str(
            "[[route]]\nmethod = \"GET\"\ntarget = \"/a\"\n[[route]]\nmethod = \"get\"\ntarget = \"/a\"\n",
        )
        .expect_err("duplicate");
        assert!(err.to_string().contains("duplicate stub route GET /a"));
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits_without_recording() {
        let stub = StubTransport::new().with_route(Method::Get, "/api/items", Response::ok());
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = stub.send(Call::get("/api/items"), &cancel).await.expect_err("cancelled");
        assert!(err.is_cancelled());
        assert!(stub.received().is_empty());
    }
}
