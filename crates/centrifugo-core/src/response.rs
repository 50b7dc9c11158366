//! Response shapes sent back to clients, API callers and admins.

use serde::Serialize;
use serde_json::Value;

use crate::error::ClientError;

/// An answer to a single command. `body` and `error` are always present
/// (as `null` when empty) to keep the shape stable for clients.
#[derive(Debug, Clone, Serialize)]
pub struct Response {
    pub method: String,
    pub body: Value,
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

impl Response {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            body: Value::Null,
            error: None,
            uid: None,
        }
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = body;
        self
    }

    pub fn with_error(mut self, err: ClientError) -> Self {
        self.error = Some(err.as_str().to_string());
        self
    }

    pub fn set_error(&mut self, err: ClientError) {
        self.error = Some(err.as_str().to_string());
    }
}

/// Responses to a batch frame, in execution order.
pub type MultiResponse = Vec<Response>;

/// Asynchronous server push: `message`, `join` and `leave` notifications.
#[derive(Debug, Serialize)]
pub struct Push<T: Serialize> {
    pub method: &'static str,
    pub body: T,
}

impl<T: Serialize> Push<T> {
    pub fn new(method: &'static str, body: T) -> Self {
        Self { method, body }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn response_serializes_null_body_and_error() {
        let resp = Response::new("ping");
        let s = serde_json::to_string(&resp).unwrap();
        assert_eq!(s, r#"{"method":"ping","body":null,"error":null}"#);
    }

    #[test]
    fn response_with_error_and_uid() {
        let mut resp = Response::new("subscribe").with_body(json!({"channel": "news"}));
        resp.uid = Some("req-1".into());
        resp.set_error(ClientError::PermissionDenied);
        let v: Value = serde_json::from_str(&serde_json::to_string(&resp).unwrap()).unwrap();
        assert_eq!(v["error"], "permission denied");
        assert_eq!(v["uid"], "req-1");
        assert_eq!(v["body"]["channel"], "news");
    }

    #[test]
    fn push_shape() {
        let push = Push::new("message", json!({"channel": "news", "data": {"x": 1}}));
        let v: Value = serde_json::from_str(&serde_json::to_string(&push).unwrap()).unwrap();
        assert_eq!(v["method"], "message");
        assert_eq!(v["body"]["channel"], "news");
    }
}
