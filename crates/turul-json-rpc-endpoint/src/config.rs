//! Configuration types for a JSON-RPC endpoint

use serde::{Deserialize, Serialize};

use crate::frame::Charset;

/// Default reserved cancellation notification
pub const DEFAULT_CANCEL_METHOD: &str = "$/cancelRequest";

/// Default upper bound on an incoming message body (64 MiB)
pub const DEFAULT_MAX_CONTENT_LENGTH: usize = 64 * 1024 * 1024;

/// How outgoing correlation ids are rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdStyle {
    /// `"id": 1`
    #[default]
    Number,
    /// `"id": "1"`
    String,
}

/// Endpoint configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Method name of the cancellation notification
    pub cancel_method: String,

    /// Charset for outgoing message bodies
    pub charset: Charset,

    /// Whether outgoing frames carry a `Content-Type` header
    pub emit_content_type: bool,

    /// Largest accepted incoming body, in bytes
    pub max_content_length: usize,

    /// Representation of outgoing request ids
    pub id_style: IdStyle,

    /// Emit every sent and received envelope at TRACE level
    pub trace_messages: bool,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            cancel_method: DEFAULT_CANCEL_METHOD.to_string(),
            charset: Charset::Utf8,
            emit_content_type: false,
            max_content_length: DEFAULT_MAX_CONTENT_LENGTH,
            id_style: IdStyle::Number,
            trace_messages: false,
        }
    }
}

impl EndpointConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel_method(mut self, method: impl Into<String>) -> Self {
        self.cancel_method = method.into();
        self
    }

    pub fn with_charset(mut self, charset: Charset) -> Self {
        self.charset = charset;
        self
    }

    pub fn with_content_type(mut self, emit: bool) -> Self {
        self.emit_content_type = emit;
        self
    }

    pub fn with_max_content_length(mut self, max: usize) -> Self {
        self.max_content_length = max;
        self
    }

    pub fn with_id_style(mut self, style: IdStyle) -> Self {
        self.id_style = style;
        self
    }

    pub fn with_message_tracing(mut self, enabled: bool) -> Self {
        self.trace_messages = enabled;
        self
    }
}
