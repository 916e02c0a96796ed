//! The local side of a connection: whatever answers the peer's calls.
//!
//! The engine only needs [`ServiceDispatcher`]. [`MethodRouter`] is the usual
//! implementation, routing each method name to its own async handler.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::cancellation::CancellationHandle;
use crate::endpoint::RemoteEndpoint;
use crate::error::ResponseError;
use crate::payload::Payload;
use crate::types::RequestId;

/// How a local handler can fail
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Answer with exactly this error object
    #[error("{0}")]
    Response(ResponseError),

    /// The handler noticed the peer cancelled the call
    #[error("request cancelled")]
    Cancelled,

    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),

    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl ServiceError {
    pub fn internal(message: impl fmt::Display) -> Self {
        ServiceError::Internal(anyhow::anyhow!("{}", message))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ServiceError::Cancelled)
    }

    /// The wire error used when no exception handler overrides it.
    ///
    /// Internal failures carry their diagnostic text in `data`.
    pub fn to_response_error(&self, id: &RequestId, method: &str) -> ResponseError {
        match self {
            ServiceError::Response(error) => error.clone(),
            ServiceError::Cancelled => ResponseError::request_cancelled(id, method),
            ServiceError::InvalidParams(message) => ResponseError::invalid_params(message),
            ServiceError::Internal(error) => internal_error(method, format!("{:?}", error)),
            ServiceError::Panicked(message) => internal_error(method, message.clone()),
        }
    }
}

fn internal_error(method: &str, detail: String) -> ResponseError {
    ResponseError::internal_error(Some(format!(
        "Internal error while handling request '{}'",
        method
    )))
    .with_data(Value::String(detail))
}

impl From<ResponseError> for ServiceError {
    fn from(error: ResponseError) -> Self {
        ServiceError::Response(error)
    }
}

/// Maps handler failures to wire errors. Returning `None` selects the generic
/// InternalError answer.
pub type ExceptionHandler = Arc<dyn Fn(&ServiceError) -> Option<ResponseError> + Send + Sync>;

/// Everything a handler knows about the call it is serving.
#[derive(Clone)]
pub struct CallContext {
    /// `None` for notifications
    pub id: Option<RequestId>,
    pub method: String,
    pub cancellation: CancellationHandle,
    /// The peer, for calling back while handling
    pub peer: RemoteEndpoint,
}

impl CallContext {
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Shorthand for `self.cancellation.check()`
    pub fn check_cancelled(&self) -> Result<(), ServiceError> {
        self.cancellation.check()
    }
}

impl fmt::Debug for CallContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallContext")
            .field("id", &self.id)
            .field("method", &self.method)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Invokes local methods on behalf of the peer.
#[async_trait]
pub trait ServiceDispatcher: Send + Sync {
    /// Answer a request
    async fn handle(
        &self,
        method: &str,
        params: Option<Payload>,
        context: CallContext,
    ) -> Result<Payload, ServiceError>;

    /// Handle a notification (default: ignore it)
    async fn handle_notification(
        &self,
        method: &str,
        params: Option<Payload>,
        context: CallContext,
    ) -> Result<(), ServiceError> {
        let _ = (method, params, context);
        Ok(())
    }

    /// Whether `method` is served at all. Unsupported requests are answered
    /// with MethodNotFound before `handle` is ever called.
    fn supports(&self, method: &str) -> bool {
        let _ = method;
        true
    }
}

type RequestFn =
    dyn Fn(Option<Payload>, CallContext) -> BoxFuture<'static, Result<Payload, ServiceError>>
        + Send
        + Sync;
type NotificationFn =
    dyn Fn(Option<Payload>, CallContext) -> BoxFuture<'static, Result<(), ServiceError>>
        + Send
        + Sync;

/// Per-method routing of requests and notifications to async closures
#[derive(Default, Clone)]
pub struct MethodRouter {
    requests: HashMap<String, Arc<RequestFn>>,
    notifications: HashMap<String, Arc<NotificationFn>>,
    default_dispatcher: Option<Arc<dyn ServiceDispatcher>>,
}

impl MethodRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request handler working on raw payloads
    pub fn request<F, Fut>(mut self, method: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Option<Payload>, CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Payload, ServiceError>> + Send + 'static,
    {
        self.requests.insert(
            method.into(),
            Arc::new(move |params, context| handler(params, context).boxed()),
        );
        self
    }

    /// Register a request handler with serde-typed params and result.
    ///
    /// Params that do not deserialize into `P` are answered with InvalidParams.
    pub fn typed_request<P, R, F, Fut>(self, method: impl Into<String>, handler: F) -> Self
    where
        P: DeserializeOwned + Send + 'static,
        R: Serialize + fmt::Debug + Send + Sync + 'static,
        F: Fn(P, CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, ServiceError>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        self.request(method, move |params, context| {
            let handler = Arc::clone(&handler);
            async move {
                let params = decode_params::<P>(params)?;
                handler(params, context).await.map(Payload::typed)
            }
        })
    }

    /// Register a notification handler working on raw payloads
    pub fn notification<F, Fut>(mut self, method: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Option<Payload>, CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ServiceError>> + Send + 'static,
    {
        self.notifications.insert(
            method.into(),
            Arc::new(move |params, context| handler(params, context).boxed()),
        );
        self
    }

    pub fn typed_notification<P, F, Fut>(self, method: impl Into<String>, handler: F) -> Self
    where
        P: DeserializeOwned + Send + 'static,
        F: Fn(P, CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ServiceError>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        self.notification(method, move |params, context| {
            let handler = Arc::clone(&handler);
            async move { handler(decode_params::<P>(params)?, context).await }
        })
    }

    /// Fall back to `dispatcher` for methods without their own handler
    pub fn with_default(mut self, dispatcher: Arc<dyn ServiceDispatcher>) -> Self {
        self.default_dispatcher = Some(dispatcher);
        self
    }

    pub fn registered_methods(&self) -> Vec<String> {
        self.requests
            .keys()
            .chain(self.notifications.keys())
            .cloned()
            .collect()
    }
}

/// Missing params decode as JSON `null`, so `P = ()` or `Option<_>` accept them.
fn decode_params<P: DeserializeOwned>(params: Option<Payload>) -> Result<P, ServiceError> {
    let params = params.unwrap_or_else(Payload::null);
    params
        .deserialize_into::<P>()
        .map_err(|e| ServiceError::InvalidParams(e.to_string()))
}

#[async_trait]
impl ServiceDispatcher for MethodRouter {
    async fn handle(
        &self,
        method: &str,
        params: Option<Payload>,
        context: CallContext,
    ) -> Result<Payload, ServiceError> {
        if let Some(handler) = self.requests.get(method) {
            return handler(params, context).await;
        }
        match &self.default_dispatcher {
            Some(dispatcher) => dispatcher.handle(method, params, context).await,
            None => Err(ResponseError::method_not_found(method).into()),
        }
    }

    async fn handle_notification(
        &self,
        method: &str,
        params: Option<Payload>,
        context: CallContext,
    ) -> Result<(), ServiceError> {
        if let Some(handler) = self.notifications.get(method) {
            return handler(params, context).await;
        }
        match &self.default_dispatcher {
            Some(dispatcher) => dispatcher.handle_notification(method, params, context).await,
            None => Ok(()),
        }
    }

    fn supports(&self, method: &str) -> bool {
        self.requests.contains_key(method)
            || self.notifications.contains_key(method)
            || self
                .default_dispatcher
                .as_ref()
                .is_some_and(|dispatcher| dispatcher.supports(method))
    }
}
