//! Remote debugger session synchronizer.
//!
//! Attaches to a process's debug protocol endpoint through an injected [`Transport`] and
//! keeps the host's script, stack and breakpoint stores in line with the remote process.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use dbg_sync::{ChannelTransport, Host, SessionConfig, SessionController};
//!
//! # async fn run() -> dbg_sync::Result<()> {
//! let (outbound, _to_remote) = tokio::sync::mpsc::unbounded_channel();
//! let (_from_remote, inbound) = tokio::sync::mpsc::unbounded_channel();
//! let (host, _notifications) = Host::in_memory();
//!
//! let controller = SessionController::new(
//!     SessionConfig::default(),
//!     host,
//!     Arc::new(ChannelTransport::new(outbound, inbound)),
//! );
//! controller.attach().await?;
//! controller.detach().await
//! # }
//! ```
pub mod breakpoints;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
mod inspect;
pub mod log;
pub mod model;
pub mod notify;
pub mod paths;
pub mod protocol;
pub mod scripts;
pub mod serialize;
pub mod session;
pub mod stack;
pub mod store;
pub mod transport;

pub use config::SessionConfig;
pub use error::{Result, SyncError, TransportError};
pub use model::{FrameRecord, ScriptRecord, UiBreakpoint, ValueKind, VariableEntry};
pub use notify::{Host, Notification, Notifier, RunState};
pub use session::{SessionController, SessionPhase};
pub use store::{MemoryStore, Node, Store};
pub use transport::{ChannelTransport, Transport};
