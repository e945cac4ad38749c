//! Transport abstraction for the hub connection.

use crate::error::{SyncError, SyncResult};
use armada_sync_protocol::ClientMessage;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// A transport carrying client messages to the dispatch hub.
///
/// This trait abstracts the network layer so different implementations
/// (WebSocket, IPC, in-memory for testing) can back the engine. Incoming
/// server messages are delivered out of band by the host, which feeds them
/// to [`crate::SyncEngine::handle_incoming`].
pub trait HubTransport: Send + Sync {
    /// Establishes the transport connection.
    fn connect(&self) -> SyncResult<()>;

    /// Sends one message to the hub.
    fn send(&self, message: &ClientMessage) -> SyncResult<()>;

    /// Closes the transport connection.
    fn close(&self) -> SyncResult<()>;

    /// Returns true if the transport is currently connected.
    fn is_connected(&self) -> bool;
}

/// A mock transport for testing.
#[derive(Default)]
pub struct MockTransport {
    connected: AtomicBool,
    fail_sends: AtomicBool,
    fail_connects: AtomicBool,
    sent: Mutex<Vec<ClientMessage>>,
}

impl MockTransport {
    /// Creates a disconnected mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent `send` calls fail with a retryable error.
    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Makes subsequent `connect` calls fail with a retryable error.
    pub fn set_fail_connects(&self, fail: bool) {
        self.fail_connects.store(fail, Ordering::SeqCst);
    }

    /// Returns all messages sent so far.
    pub fn sent(&self) -> Vec<ClientMessage> {
        self.sent.lock().clone()
    }

    /// Clears the sent message log.
    pub fn clear_sent(&self) {
        self.sent.lock().clear();
    }

    /// Simulates a transport-level drop.
    pub fn drop_connection(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

impl HubTransport for MockTransport {
    fn connect(&self) -> SyncResult<()> {
        if self.fail_connects.load(Ordering::SeqCst) {
            return Err(SyncError::connection_retryable("mock connect refused"));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn send(&self, message: &ClientMessage) -> SyncResult<()> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(SyncError::connection_retryable("mock send failed"));
        }
        self.sent.lock().push(message.clone());
        Ok(())
    }

    fn close(&self) -> SyncResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use armada_sync_protocol::EntityRef;

    #[test]
    fn connect_and_send() {
        let transport = MockTransport::new();
        assert!(!transport.is_connected());

        transport.connect().unwrap();
        assert!(transport.is_connected());

        let message = ClientMessage::Subscribe {
            entity: EntityRef::server("1"),
        };
        transport.send(&message).unwrap();
        assert_eq!(transport.sent(), vec![message]);
    }

    #[test]
    fn send_requires_connection() {
        let transport = MockTransport::new();
        let message = ClientMessage::Resync {
            entity: EntityRef::server("1"),
        };

        let result = transport.send(&message);
        assert!(matches!(result, Err(SyncError::NotConnected)));
    }

    #[test]
    fn scripted_failures() {
        let transport = MockTransport::new();
        transport.set_fail_connects(true);
        assert!(transport.connect().is_err());

        transport.set_fail_connects(false);
        transport.connect().unwrap();

        transport.set_fail_sends(true);
        let message = ClientMessage::Resync {
            entity: EntityRef::server("1"),
        };
        let result = transport.send(&message);
        assert!(result.unwrap_err().is_retryable());
    }
}
