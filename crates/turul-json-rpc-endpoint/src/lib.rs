//! # Bidirectional JSON-RPC 2.0 Endpoint
//!
//! Transport and dispatch engine for protocols (such as the Language Server
//! Protocol) in which both peers expose remotely callable methods to each other.
//!
//! ## Features
//! - `Content-Length` framing over any `AsyncRead`/`AsyncWrite` pair
//! - Request/response correlation with cancellable outgoing calls
//! - Cooperative cancellation of incoming calls via `$/cancelRequest`
//! - Method-typed `params`/`result` decoding driven by a static method registry
//! - Either unions resolved by structural discriminators, with a backtracking fallback
//!
//! ```rust,no_run
//! use turul_json_rpc_endpoint::prelude::*;
//!
//! # async fn run() -> Result<(), RemoteError> {
//! let service = MethodRouter::new().request("ping", |_params, _context| async {
//!     Ok(Payload::json("pong"))
//! });
//! let listener = ConnectionBuilder::new(service)
//!     .build(tokio::io::stdin(), tokio::io::stdout())
//!     .listen();
//! let answer = listener.remote().request("initialize", None).await?;
//! # let _ = answer;
//! # Ok(())
//! # }
//! ```

pub mod cancellation;
pub mod codec;
pub mod config;
pub mod either;
pub mod endpoint;
pub mod error;
pub mod frame;
pub mod message;
pub mod payload;
pub mod pending;
pub mod prelude;
pub mod pump;
pub mod registry;
pub mod service;
pub mod types;

// Re-export main types
pub use cancellation::CancellationHandle;
pub use codec::MessageCodec;
pub use config::{EndpointConfig, IdStyle};
pub use either::{Either, Either3, EitherCodec, Predicate};
pub use endpoint::{RemoteEndpoint, ResponseHandle};
pub use error::{
    CodecError, FramingError, JsonRpcErrorCode, ParseFailure, PendingError, RemoteError,
    ResponseError, TransportError,
};
pub use frame::{Charset, Frame, FrameCodec};
pub use message::{Message, NotificationMessage, RequestMessage, ResponseMessage, ResponseOutcome};
pub use payload::{Payload, TypedValue};
pub use pending::PendingCallTable;
pub use pump::{Connection, ConnectionBuilder, ListenerHandle, MessageWriter};
pub use registry::{
    MethodDescriptor, MethodKind, MethodRegistry, MethodResolver, MethodTable, TypeCodec,
};
pub use service::{CallContext, ExceptionHandler, MethodRouter, ServiceDispatcher, ServiceError};
pub use types::{JsonRpcVersion, RequestId};

/// JSON-RPC 2.0 version constant
pub const JSONRPC_VERSION: &str = "2.0";

/// Standard JSON-RPC 2.0 error codes
pub mod error_codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;

    // Server error range: -32099 to -32000
    pub const SERVER_ERROR_START: i64 = -32099;
    pub const SERVER_ERROR_END: i64 = -32000;

    /// An incoming request was cancelled by the peer
    pub const REQUEST_CANCELLED: i64 = -32800;
    /// The inputs of a request changed while it was running
    pub const CONTENT_MODIFIED: i64 = -32801;
}
