//! Request/response correlation.
//!
//! Each outgoing request registers a pending entry keyed by its request id
//! together with a timeout task. Whichever comes first, the matching
//! response or the timeout, removes the entry and settles the caller's
//! future; the other one finds nothing and is ignored.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use framelink_core::{MessageOrigin, RequestMessage, ResponseError, ResponseMessage};
use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use uuid::Uuid;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(30_000);

/// How many timed-out request ids are remembered for late-response diagnostics.
const TIMED_OUT_HISTORY: usize = 256;

type Responder = oneshot::Sender<Result<Value, ResponseError>>;

struct PendingRequest {
    namespace: String,
    command: String,
    data: Value,
    responder: Responder,
    timeout: JoinHandle<()>,
}

#[derive(Default)]
struct Pending {
    requests: HashMap<String, PendingRequest>,
    timed_out: VecDeque<String>,
}

impl Pending {
    fn remember_timed_out(&mut self, request_id: String) {
        if self.timed_out.len() == TIMED_OUT_HISTORY {
            self.timed_out.pop_front();
        }
        self.timed_out.push_back(request_id);
    }
}

pub struct RequestManager {
    origin: MessageOrigin,
    pending: Mutex<Pending>,
}

impl RequestManager {
    pub fn new(origin: MessageOrigin) -> Self {
        Self {
            origin,
            pending: Mutex::new(Pending::default()),
        }
    }

    /// Build a request message with a fresh request id.
    pub fn create_request_message(
        &self,
        namespace: impl Into<String>,
        command: impl Into<String>,
        data: Value,
    ) -> RequestMessage {
        RequestMessage {
            namespace: namespace.into(),
            command: command.into(),
            request_id: Uuid::new_v4().to_string(),
            data,
            message_origin: self.origin.clone(),
        }
    }

    /// Register `request` and return a future for its outcome.
    ///
    /// Registration happens before this returns, so the message may be sent
    /// right after. The timeout is clamped to at least one millisecond.
    pub fn process_request(
        self: &Arc<Self>,
        request: &RequestMessage,
        timeout: Duration,
    ) -> BoxFuture<'static, Result<Value, ResponseError>> {
        let timeout = timeout.max(Duration::from_millis(1));
        let (responder, outcome) = oneshot::channel();
        let request_id = request.request_id.clone();

        {
            let mut pending = self.lock();
            let weak: Weak<Self> = Arc::downgrade(self);
            let expiring_id = request_id.clone();
            let timer = tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                if let Some(manager) = weak.upgrade() {
                    manager.expire(&expiring_id, timeout);
                }
            });

            let entry = PendingRequest {
                namespace: request.namespace.clone(),
                command: request.command.clone(),
                data: request.data.clone(),
                responder,
                timeout: timer,
            };
            if let Some(replaced) = pending.requests.insert(request_id.clone(), entry) {
                replaced.timeout.abort();
                warn!(request_id = %request_id, "Duplicate request id, previous request dropped");
            }
        }
        debug!(
            namespace = %request.namespace,
            command = %request.command,
            request_id = %request_id,
            timeout_ms = timeout.as_millis() as u64,
            "Request registered"
        );

        let namespace = request.namespace.clone();
        let command = request.command.clone();
        Box::pin(async move {
            match outcome.await {
                Ok(result) => result,
                Err(_) => Err(ResponseError::dropped(&namespace, &command)),
            }
        })
    }

    /// Settle the pending request matching `response`.
    ///
    /// Returns false when no request was waiting: either it already timed
    /// out (logged as a late response) or the id was never issued.
    pub fn process_response(&self, response: ResponseMessage) -> bool {
        let entry = {
            let mut pending = self.lock();
            match pending.requests.remove(&response.request_id) {
                Some(entry) => entry,
                None => {
                    if pending.timed_out.contains(&response.request_id) {
                        warn!(
                            request_id = %response.request_id,
                            namespace = %response.namespace,
                            "Late response for timed-out request ignored"
                        );
                    } else {
                        error!(
                            request_id = %response.request_id,
                            namespace = %response.namespace,
                            "Response for unknown request id dropped"
                        );
                    }
                    return false;
                }
            }
        };
        entry.timeout.abort();

        let result = response.into_result();
        if let Err(e) = &result {
            debug!(command = %entry.command, error_key = %e.error_key, "Request rejected by subject");
        }
        if entry.responder.send(result).is_err() {
            debug!(command = %entry.command, "Request caller went away before the response");
        }
        true
    }

    fn expire(&self, request_id: &str, timeout: Duration) {
        let entry = {
            let mut pending = self.lock();
            let Some(entry) = pending.requests.remove(request_id) else {
                return;
            };
            pending.remember_timed_out(request_id.to_string());
            entry
        };

        let timeout_ms = timeout.as_millis() as u64;
        warn!(
            namespace = %entry.namespace,
            command = %entry.command,
            request_id,
            timeout_ms,
            "Client timeout"
        );
        let err =
            ResponseError::client_timeout(&entry.namespace, &entry.command, entry.data, timeout_ms);
        let _ = entry.responder.send(Err(err));
    }

    pub fn is_pending(&self, request_id: &str) -> bool {
        self.lock().requests.contains_key(request_id)
    }

    pub fn pending_count(&self) -> usize {
        self.lock().requests.len()
    }

    fn lock(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for RequestManager {
    fn drop(&mut self) {
        let pending = self.pending.get_mut().unwrap_or_else(PoisonError::into_inner);
        for (_, entry) in pending.requests.drain() {
            entry.timeout.abort();
        }
    }
}
