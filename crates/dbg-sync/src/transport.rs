//! Transport capability injected by the host.
//!
//! The synchronizer never opens sockets itself. The host supplies something that can
//! deliver outbound records and hand over a stream of inbound ones.
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tracing::debug;

use crate::error::TransportError;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Opens the channel and returns the inbound message stream.
    async fn attach(&self) -> Result<UnboundedReceiver<Value>, TransportError>;

    fn send(&self, message: Value) -> Result<(), TransportError>;

    async fn detach(&self) -> Result<(), TransportError>;
}

/// Adapts a host message pump (an outbound sender plus the inbound receiver) onto
/// [`Transport`].
#[derive(Debug)]
pub struct ChannelTransport {
    outbound: Mutex<Option<UnboundedSender<Value>>>,
    inbound: Mutex<Option<UnboundedReceiver<Value>>>,
}

impl ChannelTransport {
    pub fn new(outbound: UnboundedSender<Value>, inbound: UnboundedReceiver<Value>) -> Self {
        Self {
            outbound: Mutex::new(Some(outbound)),
            inbound: Mutex::new(Some(inbound)),
        }
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn attach(&self) -> Result<UnboundedReceiver<Value>, TransportError> {
        let inbound = self
            .inbound
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or_else(|| TransportError::Open("message pump already attached".to_string()))?;
        debug!("Channel transport attached");
        Ok(inbound)
    }

    fn send(&self, message: Value) -> Result<(), TransportError> {
        let outbound = self.outbound.lock().unwrap_or_else(|e| e.into_inner());
        match outbound.as_ref() {
            Some(tx) => tx
                .send(message)
                .map_err(|e| TransportError::Send(e.to_string())),
            None => Err(TransportError::Closed),
        }
    }

    async fn detach(&self) -> Result<(), TransportError> {
        let outbound = self
            .outbound
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        match outbound {
            Some(_) => {
                debug!("Channel transport detached");
                Ok(())
            }
            None => Err(TransportError::Closed),
        }
    }
}
