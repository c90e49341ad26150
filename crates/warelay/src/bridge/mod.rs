//! Seam to the external WhatsApp automation client.
//!
//! Everything that speaks the WhatsApp web protocol lives on the other side
//! of [`BridgeClient`]. The production implementation ([`SidecarClient`])
//! drives a Node.js sidecar subprocess over JSON Lines; tests substitute an
//! in-process stub.

mod handle;
mod sidecar;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use warelay_bridge_protocol::{ChatInfo, DisconnectReason, SessionInfo};

pub use handle::ClientHandle;
pub use sidecar::SidecarClient;

/// Port to the WhatsApp automation client.
#[async_trait]
pub trait BridgeClient: Send + Sync {
    /// Start the session. Resumes stored credentials or triggers pairing.
    async fn initialize(&self) -> Result<(), BridgeError>;

    /// Fetch the full chat listing. Expensive; callers cache the result.
    async fn list_chats(&self) -> Result<Vec<ChatInfo>, BridgeError>;

    /// Send a text message to a chat by serialized id.
    async fn send_message(&self, chat_id: &str, body: &str) -> Result<(), BridgeError>;

    /// Tear down the underlying automation session.
    async fn destroy(&self) -> Result<(), BridgeError>;
}

/// Lifecycle notifications forwarded from the client to the session
/// controller. Command replies are resolved inside the client and never
/// appear here.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    Qr { code: String },
    Authenticated,
    Ready { session: SessionInfo },
    AuthFailure { message: String },
    Disconnected { reason: DisconnectReason },
}

/// Builds a fresh client wired to the given lifecycle event channel.
///
/// The controller invokes this once at startup and again after every forced
/// logout, so the closure must be reusable.
pub type ClientFactory =
    Arc<dyn Fn(mpsc::Sender<ClientEvent>) -> Arc<dyn BridgeClient> + Send + Sync>;

/// Errors surfaced by the automation client.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The automation context was torn down mid-operation. Expected while
    /// the session is logged out or recreated; callers retry or suppress
    /// instead of failing hard.
    #[error("automation context was torn down")]
    ContextTornDown,

    /// The sidecar rejected a command.
    #[error("{code}: {message}")]
    Command { code: String, message: String },

    /// No sidecar process is available to take the command.
    #[error("sidecar unavailable: {0}")]
    Unavailable(String),

    /// The sidecar replied with something the protocol does not allow here.
    #[error("sidecar protocol violation: {0}")]
    Protocol(String),

    /// Failed to spawn or talk to the sidecar process.
    #[error("sidecar io: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Whether this is the expected transient teardown seen during
    /// logout/reconnection.
    pub fn is_transient_teardown(&self) -> bool {
        matches!(self, Self::ContextTornDown)
    }
}

// ============================================================================
// Test support
// ============================================================================

#[cfg(test)]
pub(crate) mod testutil {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::*;

    /// Scriptable in-process [`BridgeClient`] for controller and handler
    /// tests.
    pub(crate) struct StubClient {
        pub chats: Mutex<Vec<ChatInfo>>,
        pub sent: Mutex<Vec<(String, String)>>,
        pub init_calls: AtomicUsize,
        pub list_calls: AtomicUsize,
        pub destroy_calls: AtomicUsize,
        pub fail_next_init: AtomicBool,
        pub fail_sends_with_teardown: AtomicBool,
        events: Option<mpsc::Sender<ClientEvent>>,
    }

    impl StubClient {
        pub fn new(chats: Vec<ChatInfo>) -> Self {
            Self {
                chats: Mutex::new(chats),
                sent: Mutex::new(Vec::new()),
                init_calls: AtomicUsize::new(0),
                list_calls: AtomicUsize::new(0),
                destroy_calls: AtomicUsize::new(0),
                fail_next_init: AtomicBool::new(false),
                fail_sends_with_teardown: AtomicBool::new(false),
                events: None,
            }
        }

        pub fn with_events(chats: Vec<ChatInfo>, events: mpsc::Sender<ClientEvent>) -> Self {
            Self {
                events: Some(events),
                ..Self::new(chats)
            }
        }

        /// Inject a lifecycle event as if the sidecar had emitted it.
        pub async fn emit(&self, event: ClientEvent) {
            self.events
                .as_ref()
                .expect("stub constructed without event channel")
                .send(event)
                .await
                .expect("controller dropped its event receiver");
        }

        pub fn chat(id: &str, name: &str) -> ChatInfo {
            ChatInfo {
                id: id.to_string(),
                name: Some(name.to_string()),
                display_name: None,
            }
        }
    }

    #[async_trait]
    impl BridgeClient for StubClient {
        async fn initialize(&self) -> Result<(), BridgeError> {
            self.init_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_next_init.swap(false, Ordering::SeqCst) {
                return Err(BridgeError::Unavailable("scripted failure".to_string()));
            }
            Ok(())
        }

        async fn list_chats(&self) -> Result<Vec<ChatInfo>, BridgeError> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.chats.lock().unwrap().clone())
        }

        async fn send_message(&self, chat_id: &str, body: &str) -> Result<(), BridgeError> {
            if self.fail_sends_with_teardown.load(Ordering::SeqCst) {
                return Err(BridgeError::ContextTornDown);
            }
            self.sent
                .lock()
                .unwrap()
                .push((chat_id.to_string(), body.to_string()));
            Ok(())
        }

        async fn destroy(&self) -> Result<(), BridgeError> {
            self.destroy_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn teardown_classification() {
        assert!(BridgeError::ContextTornDown.is_transient_teardown());
        assert!(!BridgeError::Unavailable("gone".to_string()).is_transient_teardown());
        assert!(
            !BridgeError::Command {
                code: "send_rejected".to_string(),
                message: "bad id".to_string(),
            }
            .is_transient_teardown()
        );
    }
}
