use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use tracing::warn;

use crate::model::{FrameRecord, ScriptRecord, UiBreakpoint, VariableEntry};
use crate::store::{MemoryStore, Node, Store};

/// Run state of the attached process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Stopped,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Lifecycle notifications published to the host bus.
#[derive(Debug, Clone)]
pub enum Notification {
    Attached,
    /// `None` means no process is attached.
    StateChanged { state: Option<RunState> },
    Break { frame: Option<Node<FrameRecord>> },
    Exception {
        frame: Option<Node<FrameRecord>>,
        exception: VariableEntry,
    },
    FrameChanged { frame: Option<Node<FrameRecord>> },
}

pub trait Notifier: Send + Sync {
    fn publish(&self, notification: Notification);
}

impl Notifier for Sender<Notification> {
    fn publish(&self, notification: Notification) {
        if let Err(e) = self.send(notification) {
            warn!(error = %e, "Notification bus is closed, dropping notification");
        }
    }
}

/// External collaborators the session synchronizes into.
#[derive(Clone)]
pub struct Host {
    pub sources: Arc<dyn Store<ScriptRecord>>,
    pub stack: Arc<dyn Store<FrameRecord>>,
    pub breakpoints: Arc<dyn Store<UiBreakpoint>>,
    pub notifier: Arc<dyn Notifier>,
}

impl Host {
    /// In-memory stores and a channel-backed bus.
    pub fn in_memory() -> (Self, Receiver<Notification>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let host = Self {
            sources: Arc::new(MemoryStore::<ScriptRecord>::new()),
            stack: Arc::new(MemoryStore::<FrameRecord>::new()),
            breakpoints: Arc::new(MemoryStore::<UiBreakpoint>::new()),
            notifier: Arc::new(tx),
        };
        (host, rx)
    }
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host").finish_non_exhaustive()
    }
}
