//! Bridge protocol types for warelay.
//!
//! The relay talks to the WhatsApp automation sidecar over JSON Lines:
//! one [`SidecarCommand`] per line on the sidecar's stdin, one
//! [`SidecarEvent`] per line on its stdout. Commands carry a `request_id`
//! that the matching [`SidecarEvent::ChatList`], [`SidecarEvent::Ack`] or
//! [`SidecarEvent::CommandFailed`] reply echoes back. Lifecycle events
//! (`qr`, `ready`, `disconnected`, ...) are unsolicited and carry no id.

use serde::{Deserialize, Serialize};

/// Commands sent from the relay to the sidecar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SidecarCommand {
    /// Start the automation session. Resumes persisted credentials when
    /// available, otherwise emits a `qr` event for pairing.
    Initialize { request_id: String },
    /// List every chat visible to the authenticated session.
    ListChats { request_id: String },
    /// Send a text message to the chat with the given serialized id.
    SendMessage {
        request_id: String,
        chat_id: String,
        body: String,
    },
    /// Tear the automation session down.
    Destroy { request_id: String },
}

impl SidecarCommand {
    /// The correlation id this command was issued under.
    pub fn request_id(&self) -> &str {
        match self {
            Self::Initialize { request_id }
            | Self::ListChats { request_id }
            | Self::SendMessage { request_id, .. }
            | Self::Destroy { request_id } => request_id,
        }
    }
}

/// Events sent from the sidecar to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SidecarEvent {
    /// A pairing code was generated and must be scanned with the phone app.
    Qr { code: String },
    /// Stored or scanned credentials were accepted.
    Authenticated,
    /// The session is fully connected and can list chats and send messages.
    Ready { session: SessionInfo },
    /// Credentials were rejected; a fresh pairing code is required.
    AuthFailure { message: String },
    /// The session dropped.
    Disconnected { reason: DisconnectReason },
    /// Reply to [`SidecarCommand::ListChats`].
    ChatList {
        request_id: String,
        chats: Vec<ChatInfo>,
    },
    /// Success reply to commands without a payload.
    Ack { request_id: String },
    /// Failure reply to any command. `code` is one of [`error_codes`].
    CommandFailed {
        request_id: String,
        code: String,
        message: String,
    },
}

/// A chat visible to the session, as reported by the sidecar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatInfo {
    /// Stable serialized identifier (e.g. `123456789@c.us`).
    pub id: String,
    /// Chat name, when the chat carries one.
    #[serde(default)]
    pub name: Option<String>,
    /// Display alias of the counterpart contact. Names are not guaranteed
    /// unique, so callers preferring exact matches should use `id`.
    #[serde(default)]
    pub display_name: Option<String>,
}

/// Session details reported once the client is ready.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub pushname: Option<String>,
}

/// Why the session disconnected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    /// The account was logged out remotely; stored credentials are gone.
    Logout,
    /// The hidden browser navigated away from the session page.
    Navigation,
    /// Connectivity loss or any reason this crate does not know about.
    Other,
}

// Sidecars may report reasons newer than this crate; anything unknown folds
// into `Other` instead of failing the whole event.
impl<'de> Deserialize<'de> for DisconnectReason {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(match raw.as_str() {
            "logout" => Self::Logout,
            "navigation" => Self::Navigation,
            _ => Self::Other,
        })
    }
}

impl DisconnectReason {
    /// Whether stored credentials are invalid and a fresh pairing (new QR
    /// scan) is required before the session can work again.
    pub fn requires_relogin(self) -> bool {
        matches!(self, Self::Logout | Self::Navigation)
    }
}

/// Error codes carried by [`SidecarEvent::CommandFailed`].
pub mod error_codes {
    /// The automation context was torn down mid-operation. Expected while
    /// the session is being logged out or recreated; callers retry instead
    /// of treating this as fatal.
    pub const CONTEXT_DESTROYED: &str = "context_destroyed";
    /// The session is not authenticated yet.
    pub const NOT_AUTHENTICATED: &str = "not_authenticated";
    /// The platform rejected the message or chat id.
    pub const SEND_REJECTED: &str = "send_rejected";
}
