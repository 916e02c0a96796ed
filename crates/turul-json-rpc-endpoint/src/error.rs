use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

use crate::types::RequestId;

/// JSON-RPC error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonRpcErrorCode {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
    /// The peer cancelled the request before it completed
    RequestCancelled,
    /// The request's inputs changed while it was running
    ContentModified,
    ServerError(i64), // -32099 to -32000
}

impl JsonRpcErrorCode {
    pub fn code(&self) -> i64 {
        match self {
            JsonRpcErrorCode::ParseError => crate::error_codes::PARSE_ERROR,
            JsonRpcErrorCode::InvalidRequest => crate::error_codes::INVALID_REQUEST,
            JsonRpcErrorCode::MethodNotFound => crate::error_codes::METHOD_NOT_FOUND,
            JsonRpcErrorCode::InvalidParams => crate::error_codes::INVALID_PARAMS,
            JsonRpcErrorCode::InternalError => crate::error_codes::INTERNAL_ERROR,
            JsonRpcErrorCode::RequestCancelled => crate::error_codes::REQUEST_CANCELLED,
            JsonRpcErrorCode::ContentModified => crate::error_codes::CONTENT_MODIFIED,
            JsonRpcErrorCode::ServerError(code) => *code,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            JsonRpcErrorCode::ParseError => "Parse error",
            JsonRpcErrorCode::InvalidRequest => "Invalid Request",
            JsonRpcErrorCode::MethodNotFound => "Method not found",
            JsonRpcErrorCode::InvalidParams => "Invalid params",
            JsonRpcErrorCode::InternalError => "Internal error",
            JsonRpcErrorCode::RequestCancelled => "Request cancelled",
            JsonRpcErrorCode::ContentModified => "Content modified",
            JsonRpcErrorCode::ServerError(_) => "Server error",
        }
    }

    /// Map a raw wire code back onto a known code.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            crate::error_codes::PARSE_ERROR => Some(JsonRpcErrorCode::ParseError),
            crate::error_codes::INVALID_REQUEST => Some(JsonRpcErrorCode::InvalidRequest),
            crate::error_codes::METHOD_NOT_FOUND => Some(JsonRpcErrorCode::MethodNotFound),
            crate::error_codes::INVALID_PARAMS => Some(JsonRpcErrorCode::InvalidParams),
            crate::error_codes::INTERNAL_ERROR => Some(JsonRpcErrorCode::InternalError),
            crate::error_codes::REQUEST_CANCELLED => Some(JsonRpcErrorCode::RequestCancelled),
            crate::error_codes::CONTENT_MODIFIED => Some(JsonRpcErrorCode::ContentModified),
            code if (crate::error_codes::SERVER_ERROR_START..=crate::error_codes::SERVER_ERROR_END)
                .contains(&code) =>
            {
                Some(JsonRpcErrorCode::ServerError(code))
            }
            _ => None,
        }
    }
}

impl fmt::Display for JsonRpcErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code(), self.message())
    }
}

/// The `error` member of a response envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ResponseError {
    pub fn new(code: JsonRpcErrorCode, message: Option<String>, data: Option<Value>) -> Self {
        Self {
            code: code.code(),
            message: message.unwrap_or_else(|| code.message().to_string()),
            data,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// The known code this error carries, if any
    pub fn known_code(&self) -> Option<JsonRpcErrorCode> {
        JsonRpcErrorCode::from_code(self.code)
    }

    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(JsonRpcErrorCode::ParseError, Some(message.into()), None)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(JsonRpcErrorCode::InvalidRequest, Some(message.into()), None)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            JsonRpcErrorCode::MethodNotFound,
            Some(format!("Unsupported request method: {}", method)),
            None,
        )
    }

    pub fn invalid_params(message: &str) -> Self {
        Self::new(
            JsonRpcErrorCode::InvalidParams,
            Some(message.to_string()),
            None,
        )
    }

    pub fn internal_error(message: Option<String>) -> Self {
        Self::new(JsonRpcErrorCode::InternalError, message, None)
    }

    /// The error sent back when an incoming request is cancelled.
    pub fn request_cancelled(id: &RequestId, method: &str) -> Self {
        Self::new(
            JsonRpcErrorCode::RequestCancelled,
            Some(format!(
                "The request (id: {}, method: '{}') has been cancelled",
                id, method
            )),
            None,
        )
    }

    /// An implementation-defined server error.
    ///
    /// `code` is clamped into the reserved range -32099..=-32000.
    pub fn server_error(code: i64, message: &str, data: Option<Value>) -> Self {
        let code = code.clamp(
            crate::error_codes::SERVER_ERROR_START,
            crate::error_codes::SERVER_ERROR_END,
        );
        Self::new(
            JsonRpcErrorCode::ServerError(code),
            Some(message.to_string()),
            data,
        )
    }
}

impl fmt::Display for ResponseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JSON-RPC Error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for ResponseError {}

/// Errors in the header framing around a message body.
///
/// A framing error drops the offending message; the read loop keeps going.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FramingError {
    #[error("missing Content-Length header")]
    MissingContentLength,

    #[error("invalid Content-Length header: {0}")]
    InvalidContentLength(String),

    #[error("malformed header line: {0}")]
    MalformedHeader(String),

    #[error("message body of {length} bytes exceeds the {max} byte limit")]
    BodyTooLarge { length: usize, max: usize },

    #[error("unsupported charset: {0}")]
    UnsupportedCharset(String),

    #[error("message body is not valid {charset}")]
    InvalidBody { charset: &'static str },
}

/// Transport-level errors (no protocol logic)
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Framing error: {0}")]
    Framing(#[from] FramingError),

    #[error("Connection closed")]
    Closed,
}

/// An incoming envelope that could not be turned into a message.
///
/// When `id` is known the failure can be answered with `error`; otherwise it
/// can only be logged.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{error}")]
pub struct ParseFailure {
    pub id: Option<RequestId>,
    pub error: ResponseError,
}

impl ParseFailure {
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self {
            id: None,
            error: ResponseError::parse_error(message),
        }
    }

    pub fn invalid_request(id: Option<RequestId>, message: impl Into<String>) -> Self {
        Self {
            id,
            error: ResponseError::invalid_request(message),
        }
    }
}

/// Typed decoding failures inside registry codecs and union resolution
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to decode {type_name}: {source}")]
    Decode {
        type_name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("value does not match any variant of {type_name}")]
    NoVariantMatched { type_name: String },

    #[error("expected a JSON array for {type_name}")]
    ExpectedArray { type_name: String },

    #[error("element {index} of {type_name}: {source}")]
    Element {
        type_name: String,
        index: usize,
        #[source]
        source: Box<CodecError>,
    },
}

/// Failure of an outgoing request as seen by the caller
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The peer answered with an error response
    #[error("remote error (code {}): {}", .0.code, .0.message)]
    Response(ResponseError),

    /// The connection went away before a response arrived
    #[error("connection closed before a response arrived")]
    ConnectionClosed,

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

impl RemoteError {
    pub fn code(&self) -> Option<i64> {
        match self {
            RemoteError::Response(error) => Some(error.code),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            RemoteError::Response(error) if error.code == crate::error_codes::REQUEST_CANCELLED
        )
    }
}

/// Bookkeeping errors from the pending-call table
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PendingError {
    #[error("request id {0} is already pending")]
    DuplicateId(RequestId),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(JsonRpcErrorCode::ParseError.code(), -32700);
        assert_eq!(JsonRpcErrorCode::MethodNotFound.code(), -32601);
        assert_eq!(JsonRpcErrorCode::RequestCancelled.code(), -32800);
        assert_eq!(
            JsonRpcErrorCode::from_code(-32050),
            Some(JsonRpcErrorCode::ServerError(-32050))
        );
        assert_eq!(JsonRpcErrorCode::from_code(42), None);
    }

    #[test]
    fn test_error_serialization() {
        let error = ResponseError::method_not_found("test");
        let json = serde_json::to_string(&error).unwrap();
        assert!(json.contains("Unsupported request method: test"));
        assert!(!json.contains("data"));
    }

    #[test]
    fn test_request_cancelled_message() {
        let error = ResponseError::request_cancelled(&RequestId::from("1"), "foo");
        assert_eq!(error.code, -32800);
        assert_eq!(
            error.message,
            "The request (id: 1, method: 'foo') has been cancelled"
        );
    }

    #[test]
    fn test_server_error_code_stays_in_range() {
        let error = ResponseError::server_error(-32001, "busy", None);
        assert_eq!(error.code, -32001);
        assert_eq!(error.message, "busy");

        assert_eq!(ResponseError::server_error(1, "too high", None).code, -32000);
        assert_eq!(ResponseError::server_error(-40000, "too low", None).code, -32099);
    }

    #[test]
    fn test_remote_error_cancelled() {
        let error = RemoteError::Response(ResponseError::request_cancelled(&1.into(), "bar"));
        assert!(error.is_cancelled());
        assert_eq!(error.code(), Some(-32800));
        assert!(!RemoteError::ConnectionClosed.is_cancelled());
    }
}
