//! The three JSON-RPC envelope kinds.
//!
//! Messages serialize straight to their wire form. Parsing goes through
//! [`MessageCodec`](crate::codec::MessageCodec), because typing `params` and
//! `result` needs the method registry.

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

use crate::error::ResponseError;
use crate::payload::Payload;
use crate::types::{JsonRpcVersion, RequestId};

/// A call that expects exactly one response with the same id
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestMessage {
    #[serde(rename = "jsonrpc")]
    pub version: JsonRpcVersion,
    pub id: RequestId,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Payload>,
}

impl RequestMessage {
    pub fn new(id: RequestId, method: impl Into<String>, params: Option<Payload>) -> Self {
        Self {
            version: JsonRpcVersion::V2_0,
            id,
            method: method.into(),
            params,
        }
    }
}

/// A fire-and-forget call (no id, never answered)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationMessage {
    #[serde(rename = "jsonrpc")]
    pub version: JsonRpcVersion,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Payload>,
}

impl NotificationMessage {
    pub fn new(method: impl Into<String>, params: Option<Payload>) -> Self {
        Self {
            version: JsonRpcVersion::V2_0,
            method: method.into(),
            params,
        }
    }
}

/// Outcome carried by a response. Exactly one of `result`/`error` goes on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseOutcome {
    Result(Payload),
    Error(ResponseError),
}

/// The answer to a request
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseMessage {
    pub version: JsonRpcVersion,
    /// `None` only for errors the peer could not correlate (sent as `"id": null`)
    pub id: Option<RequestId>,
    pub outcome: ResponseOutcome,
}

impl ResponseMessage {
    pub fn success(id: RequestId, result: Payload) -> Self {
        Self {
            version: JsonRpcVersion::V2_0,
            id: Some(id),
            outcome: ResponseOutcome::Result(result),
        }
    }

    pub fn error(id: Option<RequestId>, error: ResponseError) -> Self {
        Self {
            version: JsonRpcVersion::V2_0,
            id,
            outcome: ResponseOutcome::Error(error),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome, ResponseOutcome::Error(_))
    }

    pub fn result(&self) -> Option<&Payload> {
        match &self.outcome {
            ResponseOutcome::Result(payload) => Some(payload),
            ResponseOutcome::Error(_) => None,
        }
    }

    pub fn error_object(&self) -> Option<&ResponseError> {
        match &self.outcome {
            ResponseOutcome::Result(_) => None,
            ResponseOutcome::Error(error) => Some(error),
        }
    }
}

impl Serialize for ResponseMessage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("ResponseMessage", 3)?;
        state.serialize_field("jsonrpc", &self.version)?;
        state.serialize_field("id", &self.id)?;
        match &self.outcome {
            ResponseOutcome::Result(payload) => state.serialize_field("result", payload)?,
            ResponseOutcome::Error(error) => state.serialize_field("error", error)?,
        }
        state.end()
    }
}

/// Any JSON-RPC message
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(RequestMessage),
    Notification(NotificationMessage),
    Response(ResponseMessage),
}

impl Message {
    /// The method name, for requests and notifications
    pub fn method(&self) -> Option<&str> {
        match self {
            Message::Request(request) => Some(&request.method),
            Message::Notification(notification) => Some(&notification.method),
            Message::Response(_) => None,
        }
    }

    pub fn id(&self) -> Option<&RequestId> {
        match self {
            Message::Request(request) => Some(&request.id),
            Message::Notification(_) => None,
            Message::Response(response) => response.id.as_ref(),
        }
    }

    pub fn is_request(&self) -> bool {
        matches!(self, Message::Request(_))
    }

    pub fn is_notification(&self) -> bool {
        matches!(self, Message::Notification(_))
    }

    pub fn is_response(&self) -> bool {
        matches!(self, Message::Response(_))
    }
}

impl Serialize for Message {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Message::Request(request) => request.serialize(serializer),
            Message::Notification(notification) => notification.serialize(serializer),
            Message::Response(response) => response.serialize(serializer),
        }
    }
}

impl From<RequestMessage> for Message {
    fn from(request: RequestMessage) -> Self {
        Message::Request(request)
    }
}

impl From<NotificationMessage> for Message {
    fn from(notification: NotificationMessage) -> Self {
        Message::Notification(notification)
    }
}

impl From<ResponseMessage> for Message {
    fn from(response: ResponseMessage) -> Self {
        Message::Response(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_serialization() {
        let request = RequestMessage::new(1.into(), "foo", Some(Payload::json("bar")));
        let json_str = serde_json::to_string(&request).unwrap();
        assert_eq!(
            json_str,
            r#"{"jsonrpc":"2.0","id":1,"method":"foo","params":"bar"}"#
        );
    }

    #[test]
    fn test_notification_json_format() {
        let notification = NotificationMessage::new("ping", None);
        let json_str = serde_json::to_string(&notification).unwrap();

        // Should not contain an "id" field
        assert!(!json_str.contains("\"id\""));
        assert!(!json_str.contains("params"));
        assert!(json_str.contains("\"jsonrpc\":\"2.0\""));
        assert!(json_str.contains("\"method\":\"ping\""));
    }

    #[test]
    fn test_response_carries_exactly_one_outcome() {
        let success = ResponseMessage::success("a".into(), Payload::null());
        let value = serde_json::to_value(&success).unwrap();
        assert_eq!(value, json!({"jsonrpc": "2.0", "id": "a", "result": null}));

        let failure = ResponseMessage::error(
            Some(2.into()),
            ResponseError::method_not_found("nope"),
        );
        let value = serde_json::to_value(&failure).unwrap();
        assert!(value.get("result").is_none());
        assert_eq!(value["error"]["code"], json!(-32601));
        assert!(failure.is_error());
        assert!(failure.result().is_none());
    }

    #[test]
    fn test_uncorrelated_error_has_null_id() {
        let response = ResponseMessage::error(None, ResponseError::parse_error("bad"));
        let value = serde_json::to_value(Message::from(response)).unwrap();
        assert_eq!(value["id"], serde_json::Value::Null);
    }

    #[test]
    fn test_message_accessors() {
        let message: Message = RequestMessage::new("7".into(), "m", None).into();
        assert!(message.is_request());
        assert_eq!(message.method(), Some("m"));
        assert_eq!(message.id(), Some(&RequestId::from("7")));

        let message: Message = NotificationMessage::new("n", None).into();
        assert!(message.is_notification());
        assert_eq!(message.id(), None);
    }
}
