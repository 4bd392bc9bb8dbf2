//! Protocol transport adapter.
//!
//! Assigns request sequence numbers, matches responses to their requests and fans remote
//! events out to subscribers. A reader task owns the inbound stream.
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::error::{Result, SyncError};
use crate::protocol::{Event, Message, RequestMessage, Response};
use crate::transport::Transport;

pub type EventHandler = Arc<dyn Fn(&Event) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    event: String,
    handler: EventHandler,
}

/// State shared between the connection handle and its reader task.
struct Shared {
    pending: DashMap<u64, oneshot::Sender<Response>>,
    subscriptions: Mutex<Vec<Subscription>>,
    running: AtomicBool,
}

impl Shared {
    fn dispatch(&self, event: &Event) {
        let handlers = self
            .subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|s| s.event == event.event)
            .map(|s| Arc::clone(&s.handler))
            .collect::<Vec<_>>();

        trace!(event = %event.event, handlers = handlers.len(), "Dispatching event");
        for handler in handlers {
            handler(event);
        }
    }

    fn set_running(&self, running: bool) {
        if self.running.swap(running, Ordering::SeqCst) != running {
            debug!(running, "Remote running state changed");
            self.dispatch(&Event::synthetic(Event::CHANGE_RUNNING));
        }
    }

    fn resolve(&self, response: Response) {
        if let Some(running) = response.running {
            self.set_running(running);
        }

        match self.pending.remove(&response.request_seq) {
            Some((_, tx)) => {
                if tx.send(response).is_err() {
                    debug!("Requester went away before its response arrived");
                }
            }
            None => debug!(
                request_seq = response.request_seq,
                command = %response.command,
                "Dropping response without a pending request"
            ),
        }
    }

    fn handle(&self, raw: Value) {
        match serde_json::from_value::<Message>(raw) {
            Ok(Message::Response(response)) => self.resolve(response),
            Ok(Message::Event(event)) => {
                if event.event == Event::BREAK || event.event == Event::EXCEPTION {
                    self.set_running(false);
                }
                self.dispatch(&event);
            }
            Ok(Message::Request(request)) => {
                debug!(command = %request.command, "Ignoring request sent by the remote")
            }
            Err(e) => warn!(error = %e, "Dropping malformed protocol message"),
        }
    }
}

/// Live connection to the remote debug endpoint.
pub struct Connection {
    transport: Arc<dyn Transport>,
    next_seq: AtomicU64,
    next_subscription: AtomicU64,
    shared: Arc<Shared>,
    closed: watch::Receiver<bool>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("next_seq", &self.next_seq)
            .field("pending", &self.shared.pending.len())
            .field("running", &self.shared.running)
            .finish()
    }
}

impl Connection {
    /// Starts the reader task over `inbound`. Must be called inside a tokio runtime.
    pub fn new(transport: Arc<dyn Transport>, mut inbound: UnboundedReceiver<Value>) -> Self {
        let shared = Arc::new(Shared {
            pending: DashMap::new(),
            subscriptions: Mutex::new(Vec::new()),
            running: AtomicBool::new(true),
        });
        let (closed_tx, closed) = watch::channel(false);

        let reader_shared = Arc::clone(&shared);
        let reader = tokio::spawn(async move {
            while let Some(raw) = inbound.recv().await {
                trace!(message = %raw, "<-");
                reader_shared.handle(raw);
            }
            debug!("Inbound message stream ended");
            reader_shared.pending.clear();
            let _ = closed_tx.send(true);
        });

        Self {
            transport,
            next_seq: AtomicU64::new(1),
            next_subscription: AtomicU64::new(1),
            shared,
            closed,
            reader: Mutex::new(Some(reader)),
        }
    }

    /// Sends `command` and waits for its correlated response.
    pub async fn request(&self, command: &str, arguments: Option<Value>) -> Result<Response> {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.shared.pending.insert(seq, tx);

        let message = RequestMessage {
            seq,
            command: command.to_string(),
            arguments,
        };
        trace!(seq, command, "->");
        if let Err(e) = self.transport.send(message.to_value()) {
            self.shared.pending.remove(&seq);
            return Err(SyncError::Transport(e));
        }

        let response = rx
            .await
            .map_err(|_| SyncError::Detached(command.to_string()))?;

        if response.success {
            Ok(response)
        } else {
            Err(SyncError::CommandFailed {
                command: command.to_string(),
                message: response
                    .message
                    .unwrap_or_else(|| "unknown remote error".to_string()),
            })
        }
    }

    pub fn subscribe(&self, event: &str, handler: EventHandler) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::SeqCst));
        self.shared
            .subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Subscription {
                id,
                event: event.to_string(),
                handler,
            });
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.shared
            .subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|s| s.id != id);
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn pending_requests(&self) -> usize {
        self.shared.pending.len()
    }

    /// Resolves once the inbound stream has ended or the reader was stopped.
    pub fn closed(&self) -> watch::Receiver<bool> {
        self.closed.clone()
    }

    /// Abandons pending requests, drops every subscription and stops the reader.
    pub fn shutdown(&self) {
        self.shared.pending.clear();
        self.shared
            .subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        if let Some(reader) = self
            .reader
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            reader.abort();
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shutdown();
    }
}
