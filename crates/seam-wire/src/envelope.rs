//! JSON-RPC 2.0 envelope types.
//!
//! The relay itself treats every frame as opaque bytes; these types are the
//! producer-side shaping for the venue's JSON-RPC surface, and the reply
//! shapes consumers of the relay's output parse.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

/// Well-known venue methods.
pub mod method {
    pub const QUOTE: &str = "quote";
    pub const TRANSFER: &str = "transfer";
    pub const BALANCES: &str = "balances";
    pub const POSITIONS: &str = "positions";
}

/// Outbound JSON-RPC request.
///
/// The venue keys replies by the request `id`, so callers choose ids with
/// meaning: the RFQ id for quotes, the nonce for transfers, the method name
/// for account queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub jsonrpc: String,
    pub id: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Envelope {
    #[must_use]
    pub fn new(id: impl Into<String>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.into(),
            method: method.into(),
            params,
        }
    }

    /// Encode as a single-line frame ready for the relay's local socket.
    ///
    /// # Errors
    ///
    /// Returns the underlying serialization error.
    pub fn to_frame(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// Inbound JSON-RPC response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reply {
    pub jsonrpc: String,
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorData>,
}

/// JSON-RPC error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorData {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl std::fmt::Display for ErrorData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RPC error {}: {}", self.code, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_shape() {
        let envelope = Envelope::new("rfq-17", method::QUOTE, Some(json!({"price": "125"})));
        let value = serde_json::to_value(&envelope).unwrap();

        assert_eq!(value["jsonrpc"], "2.0");
        assert_eq!(value["id"], "rfq-17");
        assert_eq!(value["method"], "quote");
        assert_eq!(value["params"]["price"], "125");
    }

    #[test]
    fn test_envelope_omits_missing_params() {
        let envelope = Envelope::new("balances", method::BALANCES, None);
        let value = serde_json::to_value(&envelope).unwrap();

        assert!(value.get("params").is_none());
    }

    #[test]
    fn test_envelope_frame_is_single_line() {
        let envelope = Envelope::new("id", "method", Some(json!({"k": "v"})));
        let frame = envelope.to_frame().unwrap();

        assert!(!frame.contains(&b'\n'));
    }

    #[test]
    fn test_reply_with_result() {
        let raw = r#"{"jsonrpc":"2.0","id":"balances","result":{"USDC":"1000"}}"#;
        let reply: Reply = serde_json::from_str(raw).unwrap();

        assert_eq!(reply.id, "balances");
        assert!(reply.result.is_some());
        assert!(reply.error.is_none());
    }

    #[test]
    fn test_reply_with_error() {
        let raw = r#"{"jsonrpc":"2.0","id":"rfq-17","error":{"code":-32001,"message":"stale quote"}}"#;
        let reply: Reply = serde_json::from_str(raw).unwrap();

        let error = reply.error.unwrap();
        assert_eq!(error.code, -32001);
        assert_eq!(error.to_string(), "RPC error -32001: stale quote");
    }
}
