//! The remote dispatch engine.
//!
//! [`RemoteEndpoint`] sits between the read loop and the local
//! [`ServiceDispatcher`]:
//!
//! - incoming requests run on the injected executor and are answered exactly once
//! - incoming notifications run fire-and-forget, failures are only logged
//! - incoming responses complete the matching outgoing call
//! - the cancellation notification signals the matching incoming request
//!
//! It is also the handle for talking to the peer: `request`, `notify` and
//! friends write through the connection's single writer.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::task::{Context, Poll};

use futures::FutureExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use crate::cancellation::CancellationHandle;
use crate::config::{EndpointConfig, IdStyle};
use crate::error::{ParseFailure, PendingError, RemoteError, ResponseError, TransportError};
use crate::message::{Message, NotificationMessage, RequestMessage, ResponseMessage};
use crate::payload::Payload;
use crate::pending::{CallResult, PendingCallTable};
use crate::pump::MessageWriter;
use crate::service::{CallContext, ExceptionHandler, MethodRouter, ServiceDispatcher, ServiceError};
use crate::types::RequestId;

struct EndpointInner {
    writer: Option<MessageWriter>,
    dispatcher: Arc<dyn ServiceDispatcher>,
    pending: Arc<PendingCallTable>,
    config: EndpointConfig,
    executor: Option<Handle>,
    exception_handler: Option<ExceptionHandler>,
    next_id: AtomicI64,
    closed: AtomicBool,
}

/// One side of a JSON-RPC connection. Cheap to clone.
#[derive(Clone)]
pub struct RemoteEndpoint {
    inner: Arc<EndpointInner>,
}

impl RemoteEndpoint {
    pub(crate) fn new(
        writer: MessageWriter,
        dispatcher: Arc<dyn ServiceDispatcher>,
        pending: Arc<PendingCallTable>,
        config: EndpointConfig,
        executor: Option<Handle>,
        exception_handler: Option<ExceptionHandler>,
    ) -> Self {
        Self {
            inner: Arc::new(EndpointInner {
                writer: Some(writer),
                dispatcher,
                pending,
                config,
                executor,
                exception_handler,
                next_id: AtomicI64::new(1),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// An endpoint attached to no stream. Every write fails with
    /// [`TransportError::Closed`].
    pub fn detached() -> Self {
        Self {
            inner: Arc::new(EndpointInner {
                writer: None,
                dispatcher: Arc::new(MethodRouter::new()),
                pending: Arc::new(PendingCallTable::new()),
                config: EndpointConfig::default(),
                executor: None,
                exception_handler: None,
                next_id: AtomicI64::new(1),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &EndpointConfig {
        &self.inner.config
    }

    /// Outgoing requests still waiting for a response
    pub fn pending_outgoing(&self) -> usize {
        self.inner.pending.outgoing_len()
    }

    /// Incoming requests whose response has not been written yet
    pub fn pending_incoming(&self) -> usize {
        self.inner.pending.incoming_len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    // ---- outgoing ----

    /// Send a request and return a handle to its eventual response.
    pub async fn send_request(
        &self,
        method: impl Into<String>,
        params: Option<Payload>,
    ) -> Result<ResponseHandle, RemoteError> {
        let method = method.into();
        if self.is_closed() {
            return Err(RemoteError::ConnectionClosed);
        }

        let (id, receiver) = self.register_outgoing(&method);
        // close() may have drained the table between the check and the insert
        if self.is_closed() {
            self.inner.pending.remove_outgoing(&id);
            return Err(RemoteError::ConnectionClosed);
        }

        let request = RequestMessage::new(id.clone(), method.clone(), params);
        if let Err(e) = self.send(request.into()).await {
            self.inner.pending.remove_outgoing(&id);
            return Err(RemoteError::Transport(e));
        }

        Ok(ResponseHandle {
            id,
            method,
            receiver,
            endpoint: self.clone(),
        })
    }

    /// Send a request and wait for its result.
    pub async fn request(
        &self,
        method: impl Into<String>,
        params: Option<Payload>,
    ) -> CallResult {
        self.send_request(method, params).await?.await
    }

    /// Send a request with serde-typed params and deserialize its result.
    pub async fn call<P, R>(&self, method: impl Into<String>, params: &P) -> Result<R, RemoteError>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let params = Payload::from_serialize(params).map_err(TransportError::from)?;
        let result = self.request(method, Some(params)).await?;
        result
            .deserialize_into::<R>()
            .map_err(|e| RemoteError::Transport(e.into()))
    }

    /// Send a notification.
    pub async fn notify(
        &self,
        method: impl Into<String>,
        params: Option<Payload>,
    ) -> Result<(), TransportError> {
        self.send(NotificationMessage::new(method, params).into())
            .await
    }

    fn register_outgoing(&self, method: &str) -> (RequestId, oneshot::Receiver<CallResult>) {
        loop {
            let n = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
            let id = match self.inner.config.id_style {
                IdStyle::Number => RequestId::Number(n),
                IdStyle::String => RequestId::String(n.to_string()),
            };
            match self.inner.pending.register_outgoing(id.clone(), method) {
                Ok(receiver) => return (id, receiver),
                Err(PendingError::DuplicateId(id)) => {
                    debug!(%id, "Skipping id that is still pending");
                }
            }
        }
    }

    async fn send(&self, message: Message) -> Result<(), TransportError> {
        match &self.inner.writer {
            Some(writer) => writer.write(&message).await,
            None => Err(TransportError::Closed),
        }
    }

    fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match &self.inner.executor {
            Some(executor) => {
                executor.spawn(task);
            }
            None => {
                tokio::spawn(task);
            }
        }
    }

    // ---- incoming ----

    /// Route one decoded incoming message. Never blocks on handler execution.
    pub fn consume(&self, message: Message) {
        match message {
            Message::Notification(notification) => self.consume_notification(notification),
            Message::Request(request) => self.consume_request(request),
            Message::Response(response) => {
                self.inner.pending.resolve(response);
            }
        }
    }

    /// Answer an envelope that could not be parsed, if it had an id.
    pub fn handle_parse_failure(&self, failure: ParseFailure) {
        let Some(id) = failure.id else {
            warn!(error = %failure.error, "Dropping unparseable message without an id");
            return;
        };
        warn!(%id, error = %failure.error, "Answering unparseable message");
        let endpoint = self.clone();
        let response = ResponseMessage::error(Some(id), failure.error);
        self.spawn(async move {
            if let Err(e) = endpoint.send(response.into()).await {
                error!(error = %e, "Failed to send parse error response");
            }
        });
    }

    /// Signal cancellation of an incoming request. Unknown ids are a no-op.
    pub fn cancel_incoming(&self, id: &RequestId) -> bool {
        let found = self.inner.pending.cancel_incoming(id);
        if !found {
            debug!(%id, "Cancellation for a request that is not running");
        }
        found
    }

    fn consume_notification(&self, notification: NotificationMessage) {
        let NotificationMessage { method, params, .. } = notification;

        if method == self.inner.config.cancel_method {
            self.consume_cancellation(params);
            return;
        }

        if !self.inner.dispatcher.supports(&method) {
            if method.starts_with("$/") {
                debug!(%method, "Ignoring optional notification");
            } else {
                warn!("Unsupported notification method: {}", method);
            }
            return;
        }

        let endpoint = self.clone();
        self.spawn(async move {
            let context = CallContext {
                id: None,
                method: method.clone(),
                cancellation: CancellationHandle::new(),
                peer: endpoint.clone(),
            };
            let call = endpoint
                .inner
                .dispatcher
                .handle_notification(&method, params, context);
            match AssertUnwindSafe(call).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(%method, error = %e, "Notification handler failed"),
                Err(panic) => error!(
                    %method,
                    panic = %panic_message(panic.as_ref()),
                    "Notification handler panicked"
                ),
            }
        });
    }

    fn consume_cancellation(&self, params: Option<Payload>) {
        let id = params
            .as_ref()
            .and_then(|params| params.to_value().ok())
            .and_then(|value| value.get("id").and_then(RequestId::from_json));
        match id {
            Some(id) => {
                self.cancel_incoming(&id);
            }
            None => warn!(?params, "Cancellation notification without a usable id"),
        }
    }

    fn consume_request(&self, request: RequestMessage) {
        let RequestMessage {
            id, method, params, ..
        } = request;

        if !self.inner.dispatcher.supports(&method) {
            debug!(%id, %method, "Unsupported request method");
            let response =
                ResponseMessage::error(Some(id), ResponseError::method_not_found(&method));
            let endpoint = self.clone();
            self.spawn(async move {
                if let Err(e) = endpoint.send(response.into()).await {
                    error!(%method, error = %e, "Failed to send MethodNotFound response");
                }
            });
            return;
        }

        // Registered before the task starts so a cancellation read right
        // after this request is never missed.
        let cancellation = match self.inner.pending.register_incoming(id.clone()) {
            Ok(cancellation) => cancellation,
            Err(PendingError::DuplicateId(id)) => {
                warn!(%id, %method, "Peer reused the id of a request that is still running");
                let response = ResponseMessage::error(
                    Some(id.clone()),
                    ResponseError::invalid_request(format!(
                        "Request id {} is already in use by a running request",
                        id
                    )),
                );
                let endpoint = self.clone();
                self.spawn(async move {
                    if let Err(e) = endpoint.send(response.into()).await {
                        error!(%id, error = %e, "Failed to send InvalidRequest response");
                    }
                });
                return;
            }
        };
        let endpoint = self.clone();
        self.spawn(async move {
            endpoint.serve_request(id, method, params, cancellation).await;
        });
    }

    async fn serve_request(
        &self,
        id: RequestId,
        method: String,
        params: Option<Payload>,
        cancellation: CancellationHandle,
    ) {
        let outcome = if cancellation.is_cancelled() {
            Err(ServiceError::Cancelled)
        } else {
            let context = CallContext {
                id: Some(id.clone()),
                method: method.clone(),
                cancellation: cancellation.clone(),
                peer: self.clone(),
            };
            let call = AssertUnwindSafe(self.inner.dispatcher.handle(&method, params, context))
                .catch_unwind();
            tokio::select! {
                biased;
                result = call => result.unwrap_or_else(|panic| {
                    Err(ServiceError::Panicked(panic_message(panic.as_ref())))
                }),
                _ = cancellation.cancelled() => Err(ServiceError::Cancelled),
            }
        };

        let response = match outcome {
            Ok(result) => ResponseMessage::success(id.clone(), result),
            Err(e) => {
                match &e {
                    ServiceError::Cancelled => debug!(%id, %method, "Request cancelled"),
                    ServiceError::Response(error) => {
                        debug!(%id, %method, code = error.code, "Request answered with an error")
                    }
                    other => error!(%id, %method, error = ?other, "Request handler failed"),
                }
                ResponseMessage::error(Some(id.clone()), self.response_error(&e, &id, &method))
            }
        };

        self.send_response(&id, &method, response).await;
        self.inner.pending.complete_incoming(&id);
    }

    /// Write the one response to an incoming request.
    ///
    /// A result that fails to serialize is replaced by an InternalError, so the
    /// peer is still answered. I/O failures are only logged.
    async fn send_response(&self, id: &RequestId, method: &str, response: ResponseMessage) {
        let text = match serde_json::to_string(&Message::from(response)) {
            Ok(text) => text,
            Err(e) => {
                error!(%id, %method, error = %e, "Failed to serialize response, answering InternalError");
                let fallback = ResponseMessage::error(
                    Some(id.clone()),
                    ResponseError::internal_error(Some(format!(
                        "Failed to serialize the result of request '{}'",
                        method
                    )))
                    .with_data(json!(e.to_string())),
                );
                match serde_json::to_string(&Message::from(fallback)) {
                    Ok(text) => text,
                    Err(e) => {
                        error!(%id, %method, error = %e, "Failed to serialize InternalError response");
                        return;
                    }
                }
            }
        };

        let result = match &self.inner.writer {
            Some(writer) => writer.write_text(text).await,
            None => Err(TransportError::Closed),
        };
        if let Err(e) = result {
            error!(%id, %method, error = %e, "Failed to send response");
        }
    }

    /// Wire error for a failed handler, consulting the exception handler.
    fn response_error(&self, error: &ServiceError, id: &RequestId, method: &str) -> ResponseError {
        let Some(handler) = &self.inner.exception_handler else {
            return error.to_response_error(id, method);
        };
        if matches!(error, ServiceError::Response(_) | ServiceError::Cancelled) {
            return error.to_response_error(id, method);
        }

        match std::panic::catch_unwind(AssertUnwindSafe(|| handler(error))) {
            Ok(Some(mapped)) => mapped,
            Ok(None) => {
                warn!(%id, %method, "Exception handler gave no error, answering InternalError");
                generic_internal_error(method, error)
            }
            Err(panic) => {
                error!(
                    %id,
                    %method,
                    panic = %panic_message(panic.as_ref()),
                    "Exception handler panicked, answering InternalError"
                );
                generic_internal_error(method, error)
            }
        }
    }

    /// Tear down: fail every pending outgoing call and cancel every running
    /// incoming one. Further requests fail with [`RemoteError::ConnectionClosed`].
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let failed = self.inner.pending.close();
        if failed > 0 {
            debug!(failed, "Failed pending requests on close");
        }
    }
}

impl fmt::Debug for RemoteEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteEndpoint")
            .field("pending_outgoing", &self.pending_outgoing())
            .field("pending_incoming", &self.pending_incoming())
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn generic_internal_error(method: &str, error: &ServiceError) -> ResponseError {
    ResponseError::internal_error(Some(format!(
        "Internal error while handling request '{}'",
        method
    )))
    .with_data(json!(error.to_string()))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// The eventual response to one outgoing request.
///
/// Await it for the result. Dropping it does not cancel the remote call; use
/// [`ResponseHandle::cancel`] for that.
#[derive(Debug)]
pub struct ResponseHandle {
    id: RequestId,
    method: String,
    receiver: oneshot::Receiver<CallResult>,
    endpoint: RemoteEndpoint,
}

impl ResponseHandle {
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Ask the peer to cancel this request.
    ///
    /// The notification is sent in the background. The call stays pending
    /// until the peer actually answers (typically with RequestCancelled).
    pub fn cancel(&self) {
        let endpoint = self.endpoint.clone();
        let id = self.id.clone();
        let params = Payload::json(json!({ "id": id.to_json() }));
        self.endpoint.spawn(async move {
            let method = endpoint.inner.config.cancel_method.clone();
            if let Err(e) = endpoint.notify(method, Some(params)).await {
                debug!(%id, error = %e, "Could not send cancellation");
            }
        });
    }
}

impl Future for ResponseHandle {
    type Output = CallResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(RemoteError::ConnectionClosed)))
    }
}
