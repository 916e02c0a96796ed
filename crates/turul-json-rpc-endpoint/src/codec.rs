//! Envelope parsing and serialization.
//!
//! Parsing is tree-first: the whole body is read into a JSON tree, the
//! envelope is classified once every member has been seen, and only then are
//! `params`/`result` decoded against the method registry. Member order on the
//! wire therefore never matters.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{ParseFailure, ResponseError};
use crate::message::{Message, NotificationMessage, RequestMessage, ResponseMessage};
use crate::payload::Payload;
use crate::registry::{MethodRegistry, MethodResolver};
use crate::types::{JsonRpcVersion, RequestId};

/// Converts between wire JSON and [`Message`]s using a method registry.
#[derive(Clone)]
pub struct MessageCodec {
    registry: Arc<dyn MethodRegistry>,
    resolver: Option<Arc<dyn MethodResolver>>,
}

impl MessageCodec {
    pub fn new(registry: Arc<dyn MethodRegistry>) -> Self {
        Self {
            registry,
            resolver: None,
        }
    }

    /// Use `resolver` to find the method behind a response id.
    pub fn with_resolver(mut self, resolver: Arc<dyn MethodResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn registry(&self) -> &Arc<dyn MethodRegistry> {
        &self.registry
    }

    /// Parse a complete message body.
    pub fn parse(&self, text: &str) -> Result<Message, ParseFailure> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| ParseFailure::parse_error(format!("Unable to parse message: {}", e)))?;
        self.parse_value(value)
    }

    /// Classify an already parsed envelope and resolve its payload.
    pub fn parse_value(&self, value: Value) -> Result<Message, ParseFailure> {
        let Value::Object(mut envelope) = value else {
            return Err(ParseFailure::invalid_request(
                None,
                "Message must be a JSON object",
            ));
        };

        if let Some(version) = envelope.get("jsonrpc") {
            if version.as_str() != Some(JsonRpcVersion::V2_0.as_str()) {
                debug!(jsonrpc = %version, "Message declares a non-2.0 jsonrpc version");
            }
        }

        let (id, null_id) = match envelope.remove("id") {
            None => (None, false),
            Some(Value::Null) => (None, true),
            Some(raw) => match RequestId::from_json(&raw) {
                Some(id) => (Some(id), false),
                None => {
                    return Err(ParseFailure::invalid_request(
                        None,
                        format!("Invalid message id: {}", raw),
                    ));
                }
            },
        };

        let method = match envelope.remove("method") {
            None => None,
            Some(Value::String(method)) => Some(method),
            Some(other) => {
                return Err(ParseFailure::invalid_request(
                    id,
                    format!("Invalid method name: {}", other),
                ));
            }
        };

        match (id, method) {
            (Some(id), Some(method)) => {
                let params = self.take_params(&mut envelope, &method);
                Ok(Message::Request(RequestMessage::new(id, method, params)))
            }
            (None, Some(method)) => {
                let params = self.take_params(&mut envelope, &method);
                Ok(Message::Notification(NotificationMessage::new(
                    method, params,
                )))
            }
            (Some(id), None) => self.response(Some(id), envelope).map(Message::Response),
            (None, None) if null_id && envelope.contains_key("error") => {
                self.response(None, envelope).map(Message::Response)
            }
            (None, None) => Err(ParseFailure::parse_error(
                "Unable to identify the input message: it has neither an id nor a method",
            )),
        }
    }

    fn take_params(&self, envelope: &mut Map<String, Value>, method: &str) -> Option<Payload> {
        envelope
            .remove("params")
            .map(|params| self.resolve_params(method, params))
    }

    fn response(
        &self,
        id: Option<RequestId>,
        mut envelope: Map<String, Value>,
    ) -> Result<ResponseMessage, ParseFailure> {
        if let Some(error) = envelope.remove("error").filter(|e| !e.is_null()) {
            let error: ResponseError = serde_json::from_value(error).map_err(|e| {
                ParseFailure::invalid_request(None, format!("Invalid error object: {}", e))
            })?;
            return Ok(ResponseMessage::error(id, error));
        }

        let result = envelope.remove("result").unwrap_or(Value::Null);
        match id {
            Some(id) => {
                let payload = self.resolve_result(&id, result);
                Ok(ResponseMessage::success(id, payload))
            }
            None => Err(ParseFailure::invalid_request(
                None,
                "Response without an id must carry an error",
            )),
        }
    }

    /// Decode `params` against the declared parameter types of `method`.
    ///
    /// Anything that cannot be typed stays a JSON tree.
    pub fn resolve_params(&self, method: &str, params: Value) -> Payload {
        let Some(descriptor) = self.registry.lookup(method) else {
            return Payload::Json(params);
        };

        match descriptor.param_types.as_slice() {
            [] => Payload::Json(params),
            [single] => single.decode(params.clone()).unwrap_or_else(|e| {
                debug!(method, error = %e, "Falling back to untyped params");
                Payload::Json(params)
            }),
            declared => {
                let items = match params {
                    Value::Array(items) => items,
                    other => {
                        debug!(
                            method,
                            arity = declared.len(),
                            "Expected positional params, keeping them untyped"
                        );
                        return Payload::Json(other);
                    }
                };
                let len = items.len().max(declared.len());
                let mut items = items.into_iter();
                let mut positional = Vec::with_capacity(len);
                for index in 0..len {
                    let item = items.next();
                    positional.push(match (item, declared.get(index)) {
                        (Some(item), Some(codec)) => {
                            Some(codec.decode(item.clone()).unwrap_or_else(|e| {
                                debug!(method, index, error = %e, "Falling back to untyped param");
                                Payload::Json(item)
                            }))
                        }
                        (Some(item), None) => Some(Payload::Json(item)),
                        (None, _) => None,
                    });
                }
                Payload::Positional(positional)
            }
        }
    }

    /// Decode a response `result` for the method the request id was sent with.
    pub fn resolve_result(&self, id: &RequestId, result: Value) -> Payload {
        let codec = self
            .resolver
            .as_ref()
            .and_then(|resolver| resolver.resolve_method(id))
            .and_then(|method| self.registry.lookup(&method))
            .and_then(|descriptor| descriptor.result_type.as_ref());

        match codec {
            Some(codec) => codec.decode(result.clone()).unwrap_or_else(|e| {
                debug!(%id, error = %e, "Falling back to untyped result");
                Payload::Json(result)
            }),
            None => Payload::Json(result),
        }
    }

    pub fn serialize(&self, message: &Message) -> serde_json::Result<String> {
        serde_json::to_string(message)
    }

    pub fn serialize_to_vec(&self, message: &Message) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(message)
    }
}
