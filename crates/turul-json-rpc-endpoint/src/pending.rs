//! In-flight calls in both directions.
//!
//! Outgoing requests wait here for their response; incoming requests keep a
//! cancellation handle here until their response has been written. Both maps
//! sit behind one lock and every operation is a short critical section.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::cancellation::CancellationHandle;
use crate::error::{PendingError, RemoteError};
use crate::message::{ResponseMessage, ResponseOutcome};
use crate::payload::Payload;
use crate::registry::MethodResolver;
use crate::types::RequestId;

/// What a caller eventually receives for an outgoing request
pub type CallResult = Result<Payload, RemoteError>;

#[derive(Debug)]
struct OutgoingCall {
    method: String,
    completion: oneshot::Sender<CallResult>,
}

#[derive(Debug, Default)]
struct Tables {
    outgoing: HashMap<RequestId, OutgoingCall>,
    incoming: HashMap<RequestId, CancellationHandle>,
}

/// The pending-call table of one connection
#[derive(Debug, Default)]
pub struct PendingCallTable {
    tables: Mutex<Tables>,
}

impl PendingCallTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track an outgoing request. The receiver completes exactly once.
    pub fn register_outgoing(
        &self,
        id: RequestId,
        method: impl Into<String>,
    ) -> Result<oneshot::Receiver<CallResult>, PendingError> {
        let mut tables = self.tables.lock();
        if tables.outgoing.contains_key(&id) {
            return Err(PendingError::DuplicateId(id));
        }
        let (completion, receiver) = oneshot::channel();
        tables.outgoing.insert(
            id,
            OutgoingCall {
                method: method.into(),
                completion,
            },
        );
        Ok(receiver)
    }

    /// Complete the outgoing call matching `response`.
    ///
    /// Returns `false` (after logging) when nothing was waiting for it.
    pub fn resolve(&self, response: ResponseMessage) -> bool {
        let Some(id) = response.id else {
            warn!(
                error = ?response.outcome,
                "Unmatched response: received an error response without an id"
            );
            return false;
        };

        let Some(call) = self.tables.lock().outgoing.remove(&id) else {
            warn!(%id, "Unmatched response: no pending request with this id");
            return false;
        };

        let result = match response.outcome {
            ResponseOutcome::Result(payload) => Ok(payload),
            ResponseOutcome::Error(error) => Err(RemoteError::Response(error)),
        };
        if call.completion.send(result).is_err() {
            debug!(%id, method = %call.method, "Caller stopped waiting for the response");
        }
        true
    }

    /// Forget an outgoing call without completing it (e.g. its request never
    /// made it onto the wire).
    pub fn remove_outgoing(&self, id: &RequestId) -> bool {
        self.tables.lock().outgoing.remove(id).is_some()
    }

    /// Method an outgoing request was sent with
    pub fn outgoing_method(&self, id: &RequestId) -> Option<String> {
        self.tables
            .lock()
            .outgoing
            .get(id)
            .map(|call| call.method.clone())
    }

    /// Track an incoming request and hand out its cancellation handle.
    ///
    /// An id that is still running is rejected and the running request keeps
    /// its entry.
    pub fn register_incoming(&self, id: RequestId) -> Result<CancellationHandle, PendingError> {
        let mut tables = self.tables.lock();
        if tables.incoming.contains_key(&id) {
            return Err(PendingError::DuplicateId(id));
        }
        let handle = CancellationHandle::new();
        tables.incoming.insert(id, handle.clone());
        Ok(handle)
    }

    /// Signal cancellation of an incoming request. Unknown ids are a no-op.
    pub fn cancel_incoming(&self, id: &RequestId) -> bool {
        match self.tables.lock().incoming.get(id) {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    /// Drop the entry of an incoming request whose response has been sent.
    pub fn complete_incoming(&self, id: &RequestId) -> bool {
        self.tables.lock().incoming.remove(id).is_some()
    }

    pub fn outgoing_len(&self) -> usize {
        self.tables.lock().outgoing.len()
    }

    pub fn incoming_len(&self) -> usize {
        self.tables.lock().incoming.len()
    }

    /// Connection teardown: fail every outgoing call with
    /// [`RemoteError::ConnectionClosed`] and cancel every incoming one.
    ///
    /// Returns the number of outgoing calls that were failed.
    pub fn close(&self) -> usize {
        let (outgoing, incoming) = {
            let mut tables = self.tables.lock();
            (
                std::mem::take(&mut tables.outgoing),
                std::mem::take(&mut tables.incoming),
            )
        };

        for handle in incoming.values() {
            handle.cancel();
        }
        let failed = outgoing.len();
        for (id, call) in outgoing {
            debug!(%id, method = %call.method, "Failing pending request on close");
            let _ = call.completion.send(Err(RemoteError::ConnectionClosed));
        }
        failed
    }
}

impl MethodResolver for PendingCallTable {
    fn resolve_method(&self, id: &RequestId) -> Option<String> {
        self.outgoing_method(id)
    }
}
