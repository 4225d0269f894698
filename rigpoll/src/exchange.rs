//! The outcome of one request sent to one device.

use serde::Serialize;
use serde_json::{json, Value};
use strum::Display;

/// Classification of a failed exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
pub enum ErrorKind {
    /// Connection refused, reset or timed out.
    NetworkError,
    /// The answer was not well formed JSON.
    ParseError,
    /// The answer was JSON but did not match the expected structure.
    SchemaError,
    /// Valid answers could not be reshaped into a record.
    ShapingError,
}

/// Uniform description of a failure, rendered inline in tables.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorObject {
    pub error_type: ErrorKind,
    pub error_data: String,
    pub error_message: String,
}

impl ErrorObject {
    pub fn new(
        error_type: ErrorKind,
        error_data: impl Into<String>,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            error_type,
            error_data: error_data.into(),
            error_message: error_message.into(),
        }
    }

    pub fn to_value(&self) -> Value {
        json!({
            "error_type": self.error_type.to_string(),
            "error_data": self.error_data,
            "error_message": self.error_message,
        })
    }
}

/// One request/response pair.
///
/// Built only through [`Exchange::success`] and [`Exchange::failure`], so
/// `error` is true exactly when the response holds an error object.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Exchange {
    request: Value,
    response: Value,
    error: bool,
}

impl Exchange {
    pub fn success(request: Value, response: Value) -> Self {
        Self {
            request,
            response,
            error: false,
        }
    }

    pub fn failure(request: Value, error: ErrorObject) -> Self {
        Self {
            request,
            response: error.to_value(),
            error: true,
        }
    }

    /// The request payload, as JSON when it parses and as text otherwise.
    pub fn request(&self) -> &Value {
        &self.request
    }

    pub fn response(&self) -> &Value {
        &self.response
    }

    pub fn is_error(&self) -> bool {
        self.error
    }

    /// The error object of a failed exchange.
    pub fn error_object(&self) -> Option<&Value> {
        self.error.then_some(&self.response)
    }
}

/// Render a wire payload the way exchanges record it.
pub fn request_value(payload: &[u8]) -> Value {
    serde_json::from_slice(payload)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(payload).into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_carries_error_object() {
        let request = request_value(br#"{"command": "summary"}"#);
        let exchange = Exchange::failure(
            request.clone(),
            ErrorObject::new(ErrorKind::NetworkError, "", "timed out after 5s"),
        );

        assert!(exchange.is_error());
        assert_eq!(exchange.request(), &request);
        assert_eq!(
            exchange.error_object(),
            Some(&json!({
                "error_type": "NetworkError",
                "error_data": "",
                "error_message": "timed out after 5s",
            }))
        );
    }

    #[test]
    fn success_has_no_error_object() {
        let exchange = Exchange::success(json!("x"), json!({"id": 1}));
        assert!(!exchange.is_error());
        assert_eq!(exchange.error_object(), None);
        assert_eq!(
            serde_json::to_value(&exchange).unwrap(),
            json!({"request": "x", "response": {"id": 1}, "error": false})
        );
    }

    #[test]
    fn request_value_keeps_text_payloads() {
        assert_eq!(request_value(b"{\"id\":0, \"method\":\"getstat\"}\n"), json!({"id": 0, "method": "getstat"}));
        assert_eq!(request_value(b"summary|"), json!("summary|"));
    }
}
