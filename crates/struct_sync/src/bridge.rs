//! Message Bridge
//!
//! Request/response transport between a client and a session. Each side
//! installs a [`RequestHandler`] for the requests its peer sends.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value as JsonValue;

use crate::BridgeError;

/// Handles requests arriving from the peer
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, topic: &str, payload: JsonValue) -> Result<JsonValue, BridgeError>;
}

/// Bidirectional request/response channel
#[async_trait]
pub trait MessageBridge: Send + Sync {
    /// Send a request to the peer and wait for its response
    async fn send_request(&self, topic: &str, payload: JsonValue) -> Result<JsonValue, BridgeError>;

    /// Install the handler for requests from the peer
    fn set_request_handler(&self, handler: Arc<dyn RequestHandler>);

    fn clear_request_handler(&self);
}

// ─────────────────────────────────────────────────────────────────────────────
// Loopback Bridge
// ─────────────────────────────────────────────────────────────────────────────

/// In-process bridge end; requests are handled by the peer end's handler
pub struct LoopbackBridge {
    handler: RwLock<Option<Arc<dyn RequestHandler>>>,
    peer: OnceLock<Weak<LoopbackBridge>>,
    connected: AtomicBool,
}

impl LoopbackBridge {
    fn new() -> Self {
        Self {
            handler: RwLock::new(None),
            peer: OnceLock::new(),
            connected: AtomicBool::new(true),
        }
    }

    /// Create two connected ends
    pub fn pair() -> (Arc<Self>, Arc<Self>) {
        let a = Arc::new(Self::new());
        let b = Arc::new(Self::new());
        let _ = a.peer.set(Arc::downgrade(&b));
        let _ = b.peer.set(Arc::downgrade(&a));
        (a, b)
    }

    /// Drop the connection; requests in either direction fail afterwards
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        tracing::debug!("Loopback bridge disconnected");
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageBridge for LoopbackBridge {
    async fn send_request(&self, topic: &str, payload: JsonValue) -> Result<JsonValue, BridgeError> {
        if !self.is_connected() {
            return Err(BridgeError::Disconnected);
        }
        let peer = self
            .peer
            .get()
            .and_then(Weak::upgrade)
            .filter(|peer| peer.is_connected())
            .ok_or(BridgeError::Disconnected)?;
        let handler = peer
            .handler
            .read()
            .clone()
            .ok_or_else(|| BridgeError::NoHandler(topic.to_string()))?;

        tracing::trace!(topic, "Loopback request");
        handler.handle(topic, payload).await
    }

    fn set_request_handler(&self, handler: Arc<dyn RequestHandler>) {
        *self.handler.write() = Some(handler);
    }

    fn clear_request_handler(&self) {
        *self.handler.write() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl RequestHandler for Echo {
        async fn handle(&self, topic: &str, payload: JsonValue) -> Result<JsonValue, BridgeError> {
            Ok(json!({"topic": topic, "payload": payload}))
        }
    }

    #[tokio::test]
    async fn test_request_reaches_peer_handler() {
        let (a, b) = LoopbackBridge::pair();
        b.set_request_handler(Arc::new(Echo));

        let response = a.send_request("t", json!(1)).await.unwrap();
        assert_eq!(response, json!({"topic": "t", "payload": 1}));

        let err = b.send_request("t", json!(1)).await.unwrap_err();
        assert_eq!(err, BridgeError::NoHandler("t".into()));
    }

    #[tokio::test]
    async fn test_disconnect() {
        let (a, b) = LoopbackBridge::pair();
        b.set_request_handler(Arc::new(Echo));
        b.disconnect();
        assert_eq!(
            a.send_request("t", json!(1)).await.unwrap_err(),
            BridgeError::Disconnected
        );

        let (a, b) = LoopbackBridge::pair();
        drop(b);
        assert_eq!(
            a.send_request("t", json!(1)).await.unwrap_err(),
            BridgeError::Disconnected
        );
    }
}
