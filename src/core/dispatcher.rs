//! Request/response correlation for in-band RTVI messages.
//!
//! Every outgoing request that expects an answer is registered under its
//! message id together with the response types that settle it. Inbound
//! envelopes are offered to [`MessageDispatcher::resolve`]; the first one
//! whose id matches a pending request settles it exactly once. A
//! [`flush`](MessageDispatcher::flush) rejects everything still open.
//! Dropping a [`PendingResponse`] before it settles removes its request.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::messages::{ActionRequestData, ActionResponse, ExpectedResponse, MessageType, RtviMessage};
use super::transport::Transport;
use crate::errors::{RtviError, RtviResult};

type Settlement = RtviResult<RtviMessage>;
type PendingMap = Mutex<HashMap<String, PendingRequest>>;

struct PendingRequest {
    /// Registration number, distinguishes reuses of the same id
    seq: u64,
    request_type: MessageType,
    expected: ExpectedResponse,
    tx: oneshot::Sender<Settlement>,
}

/// Receiver half of a registered request.
pub struct PendingResponse {
    id: String,
    seq: u64,
    rx: oneshot::Receiver<Settlement>,
    pending: Weak<PendingMap>,
}

impl PendingResponse {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for PendingResponse {
    fn drop(&mut self) {
        let Some(pending) = self.pending.upgrade() else {
            return;
        };
        let mut pending = pending.lock();
        if pending.get(&self.id).is_some_and(|r| r.seq == self.seq) {
            pending.remove(&self.id);
            debug!(message_id = %self.id, "Dropped abandoned request");
        }
    }
}

/// Correlates outgoing requests with their inbound responses.
pub struct MessageDispatcher {
    pending: Arc<PendingMap>,
    next_seq: AtomicU64,
    request_timeout: Option<Duration>,
}

impl MessageDispatcher {
    pub fn new(request_timeout: Option<Duration>) -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_seq: AtomicU64::new(0),
            request_timeout,
        }
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout
    }

    /// Number of requests awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Register `message` as a pending request.
    ///
    /// Fails if the message has no id, is not a request type that expects a
    /// response, or reuses the id of a request that is still open.
    pub fn register(&self, message: &RtviMessage) -> RtviResult<PendingResponse> {
        let id = message.id();
        if id.is_empty() {
            return Err(RtviError::Internal(format!(
                "'{}' request has no message id",
                message.message_type()
            )));
        }

        let request_type = message.kind().ok_or_else(|| {
            RtviError::Internal(format!("unknown request type '{}'", message.message_type()))
        })?;
        let expected = request_type.expected_response().ok_or_else(|| {
            RtviError::Internal(format!("'{request_type}' does not expect a response"))
        })?;

        let (tx, rx) = oneshot::channel();
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let mut pending = self.pending.lock();
        if pending.contains_key(id) {
            return Err(RtviError::Internal(format!(
                "message id '{id}' is already pending"
            )));
        }
        pending.insert(
            id.to_string(),
            PendingRequest {
                seq,
                request_type,
                expected,
                tx,
            },
        );

        debug!(message_id = %id, message_type = %request_type, "Registered pending request");

        Ok(PendingResponse {
            id: id.to_string(),
            seq,
            rx,
            pending: Arc::downgrade(&self.pending),
        })
    }

    /// Drop a pending request without settling it.
    pub fn cancel(&self, id: &str) -> bool {
        self.pending.lock().remove(id).is_some()
    }

    /// Wait for a registered request to settle, applying the request timeout.
    ///
    /// Dropping the returned future before it completes removes the request.
    pub async fn wait(&self, mut response: PendingResponse) -> RtviResult<RtviMessage> {
        let settled = match self.request_timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut response.rx).await {
                Ok(settled) => settled,
                Err(_) => {
                    self.cancel(&response.id);
                    warn!(message_id = %response.id, "Request timed out");
                    return Err(RtviError::RequestTimeout(response.id.clone()));
                }
            },
            None => (&mut response.rx).await,
        };

        // A dropped sender means the request was removed without settling.
        settled.unwrap_or(Err(RtviError::Disconnected))
    }

    /// Register, send and wait for the response to `message`.
    pub async fn dispatch(
        &self,
        transport: &dyn Transport,
        message: RtviMessage,
    ) -> RtviResult<RtviMessage> {
        let pending = self.register(&message)?;

        if let Err(e) = transport.send_message(message).await {
            self.cancel(pending.id());
            return Err(e);
        }

        self.wait(pending).await
    }

    /// Send an action in-band and wait for its `action-response`.
    pub async fn dispatch_action(
        &self,
        transport: &dyn Transport,
        request: &ActionRequestData,
    ) -> RtviResult<ActionResponse> {
        let message = RtviMessage::action(request)?;
        let response = self.dispatch(transport, message).await?;
        Ok(ActionResponse::from_message(&response))
    }

    /// Offer an inbound envelope to the pending requests.
    ///
    /// Returns `true` if the envelope settled a request and must not be
    /// handled further.
    pub fn resolve(&self, message: &RtviMessage) -> bool {
        let id = message.id();
        if id.is_empty() {
            return false;
        }

        let Some(request) = self.pending.lock().remove(id) else {
            return false;
        };

        let settlement = match request.expected.classify(message.message_type()) {
            Some(true) => Ok(message.clone()),
            Some(false) if request.request_type == MessageType::UpdateConfig => {
                Err(RtviError::ConfigUpdate(message.error_text()))
            }
            Some(false) => Err(RtviError::protocol(
                message.message_type(),
                message.error_text(),
            )),
            None => Err(RtviError::protocol(
                message.message_type(),
                format!(
                    "unexpected response to '{}', expected '{}'",
                    request.request_type, request.expected.success
                ),
            )),
        };

        debug!(
            message_id = %id,
            message_type = %message.message_type(),
            ok = settlement.is_ok(),
            "Settled pending request"
        );

        // The caller may have stopped waiting; nothing to do then.
        let _ = request.tx.send(settlement);
        true
    }

    /// Reject every pending request with [`RtviError::Disconnected`].
    ///
    /// Returns the number of requests rejected.
    pub fn flush(&self) -> usize {
        let drained: Vec<_> = self.pending.lock().drain().collect();
        let count = drained.len();
        for (_, request) in drained {
            let _ = request.tx.send(Err(RtviError::Disconnected));
        }
        if count > 0 {
            debug!(count, "Flushed pending requests");
        }
        count
    }
}

impl Default for MessageDispatcher {
    fn default() -> Self {
        Self::new(None)
    }
}
