//! # JSON-RPC Endpoint Prelude
//!
//! Re-exports of the types most applications need.
//!
//! ```rust
//! use turul_json_rpc_endpoint::prelude::*;
//! ```

// Connection and dispatch
pub use crate::endpoint::{RemoteEndpoint, ResponseHandle};
pub use crate::pump::{ConnectionBuilder, ListenerHandle};
pub use crate::service::{CallContext, MethodRouter, ServiceDispatcher, ServiceError};

// Messages and payloads
pub use crate::error::{RemoteError, ResponseError, TransportError};
pub use crate::message::Message;
pub use crate::payload::Payload;
pub use crate::types::RequestId;

// Typing
pub use crate::config::EndpointConfig;
pub use crate::either::{Either, EitherCodec, Predicate};
pub use crate::registry::{MethodDescriptor, MethodTable, TypeCodec};

// Standard error codes
pub use crate::error_codes::*;
