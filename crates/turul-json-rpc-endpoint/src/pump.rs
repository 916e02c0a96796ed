//! Connection setup and the read loop.
//!
//! One task reads frames in arrival order and hands each decoded message to
//! the [`RemoteEndpoint`]. Handlers run elsewhere on the executor. Every
//! outgoing message goes through one [`MessageWriter`], whose lock makes each
//! frame land on the stream whole.

use std::io;
use std::pin::Pin;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::runtime::Handle;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error, info, trace, warn};

use crate::cancellation::CancellationHandle;
use crate::codec::MessageCodec;
use crate::config::EndpointConfig;
use crate::endpoint::RemoteEndpoint;
use crate::error::{ResponseError, TransportError};
use crate::frame::{Frame, FrameCodec};
use crate::message::Message;
use crate::pending::PendingCallTable;
use crate::registry::{MethodRegistry, MethodResolver, MethodTable};
use crate::service::{ExceptionHandler, ServiceDispatcher, ServiceError};

type BoxedReader = Pin<Box<dyn AsyncRead + Send>>;
type BoxedWriter = Pin<Box<dyn AsyncWrite + Send>>;

/// Serializes messages and writes them as whole frames, one writer at a time.
#[derive(Clone)]
pub struct MessageWriter {
    sink: Arc<Mutex<FramedWrite<BoxedWriter, FrameCodec>>>,
    trace_messages: bool,
}

impl MessageWriter {
    pub fn new<W>(writer: W, config: &EndpointConfig) -> Self
    where
        W: AsyncWrite + Send + 'static,
    {
        let writer: BoxedWriter = Box::pin(writer);
        Self {
            sink: Arc::new(Mutex::new(FramedWrite::new(
                writer,
                FrameCodec::from_config(config),
            ))),
            trace_messages: config.trace_messages,
        }
    }

    /// Write one message and flush it.
    ///
    /// The body is serialized before the lock is taken; header and body are
    /// then written together under it.
    pub async fn write(&self, message: &Message) -> Result<(), TransportError> {
        let text = serde_json::to_string(message)?;
        self.write_text(text).await
    }

    /// Write an already serialized message body as one frame.
    pub async fn write_text(&self, text: String) -> Result<(), TransportError> {
        if self.trace_messages {
            trace!(direction = "send", message = %text);
        }
        let mut sink = self.sink.lock().await;
        sink.send(text).await?;
        Ok(())
    }

    /// Flush and shut down the underlying stream
    pub async fn shutdown(&self) -> Result<(), TransportError> {
        let mut sink = self.sink.lock().await;
        sink.close().await?;
        Ok(())
    }
}

/// Assembles a [`Connection`] from a service, a method registry and a pair of
/// byte streams.
pub struct ConnectionBuilder {
    dispatcher: Arc<dyn ServiceDispatcher>,
    registry: Arc<dyn MethodRegistry>,
    config: EndpointConfig,
    executor: Option<Handle>,
    exception_handler: Option<ExceptionHandler>,
}

impl ConnectionBuilder {
    pub fn new(dispatcher: impl ServiceDispatcher + 'static) -> Self {
        Self::with_dispatcher(Arc::new(dispatcher))
    }

    pub fn with_dispatcher(dispatcher: Arc<dyn ServiceDispatcher>) -> Self {
        Self {
            dispatcher,
            registry: Arc::new(MethodTable::new()),
            config: EndpointConfig::default(),
            executor: None,
            exception_handler: None,
        }
    }

    /// Method shapes used to type incoming params and results
    pub fn registry(mut self, registry: impl MethodRegistry + 'static) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    pub fn shared_registry(mut self, registry: Arc<dyn MethodRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn config(mut self, config: EndpointConfig) -> Self {
        self.config = config;
        self
    }

    /// Runtime that executes handlers and the read loop (default: the current one)
    pub fn executor(mut self, executor: Handle) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Map handler failures to wire errors
    pub fn exception_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&ServiceError) -> Option<ResponseError> + Send + Sync + 'static,
    {
        self.exception_handler = Some(Arc::new(handler));
        self
    }

    pub fn build<R, W>(self, reader: R, writer: W) -> Connection
    where
        R: AsyncRead + Send + 'static,
        W: AsyncWrite + Send + 'static,
    {
        let executor = self.executor.or_else(|| Handle::try_current().ok());
        let pending = Arc::new(PendingCallTable::new());
        let resolver: Arc<dyn MethodResolver> = pending.clone();
        let codec = MessageCodec::new(self.registry).with_resolver(resolver);

        let writer = MessageWriter::new(writer, &self.config);
        let reader: BoxedReader = Box::pin(reader);
        let reader = FramedRead::new(reader, FrameCodec::from_config(&self.config));

        let trace_messages = self.config.trace_messages;
        let endpoint = RemoteEndpoint::new(
            writer,
            self.dispatcher,
            pending,
            self.config,
            executor.clone(),
            self.exception_handler,
        );

        Connection {
            endpoint,
            reader,
            codec,
            executor,
            trace_messages,
        }
    }
}

/// A built but not yet running connection
pub struct Connection {
    endpoint: RemoteEndpoint,
    reader: FramedRead<BoxedReader, FrameCodec>,
    codec: MessageCodec,
    executor: Option<Handle>,
    trace_messages: bool,
}

impl Connection {
    /// Handle for calling the peer
    pub fn remote(&self) -> RemoteEndpoint {
        self.endpoint.clone()
    }

    /// Start the read loop on the executor.
    pub fn listen(self) -> ListenerHandle {
        let shutdown = CancellationHandle::new();
        let remote = self.endpoint.clone();
        let executor = self.executor.clone();
        let run = self.run(shutdown.clone());
        let task = match executor {
            Some(executor) => executor.spawn(run),
            None => tokio::spawn(run),
        };
        ListenerHandle {
            remote,
            shutdown,
            task,
        }
    }

    /// Run the read loop until end of stream, an I/O error, or `shutdown`.
    ///
    /// Pending outgoing calls are failed on the way out.
    pub async fn run(mut self, shutdown: CancellationHandle) -> Result<(), TransportError> {
        info!("JSON-RPC listener started");
        let result = loop {
            let item = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    debug!("Listener closed");
                    break Ok(());
                }
                item = self.reader.next() => item,
            };

            match item {
                None => {
                    debug!("Input stream ended");
                    break Ok(());
                }
                Some(Err(e)) => {
                    error!(error = %e, "Read failed, stopping listener");
                    break Err(TransportError::Io(e));
                }
                Some(Ok(Err(e))) => warn!(error = %e, "Dropping malformed frame"),
                Some(Ok(Ok(frame))) => self.dispatch_frame(frame),
            }
        };

        self.endpoint.close();
        info!("JSON-RPC listener stopped");
        result
    }

    fn dispatch_frame(&self, frame: Frame) {
        let text = match frame.into_text() {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Dropping undecodable message body");
                return;
            }
        };
        if self.trace_messages {
            trace!(direction = "receive", message = %text);
        }
        match self.codec.parse(&text) {
            Ok(message) => self.endpoint.consume(message),
            Err(failure) => self.endpoint.handle_parse_failure(failure),
        }
    }
}

/// A running read loop
#[derive(Debug)]
pub struct ListenerHandle {
    remote: RemoteEndpoint,
    shutdown: CancellationHandle,
    task: JoinHandle<Result<(), TransportError>>,
}

impl ListenerHandle {
    pub fn remote(&self) -> RemoteEndpoint {
        self.remote.clone()
    }

    /// Stop reading. A loop blocked on input notices immediately.
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the read loop to end
    pub async fn join(self) -> Result<(), TransportError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(TransportError::Io(io::Error::other(e))),
        }
    }
}
