//! Destination resolution against the live chat listing, with a dual-keyed
//! cache.

use std::fmt;

use dashmap::DashMap;
use thiserror::Error;
use tracing::{info, warn};

use warelay_bridge_protocol::ChatInfo;

use crate::bridge::{BridgeClient, BridgeError};

/// A logical message destination, from configuration or a request body.
///
/// Either field may be set; the id wins when both are, because display names
/// are not guaranteed unique (non-Latin-script names in particular collide
/// under truncation or font rendering).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Destination {
    pub name: Option<String>,
    pub id: Option<String>,
}

impl Destination {
    /// Build a destination, treating empty or whitespace strings as unset.
    pub fn from_parts(name: Option<String>, id: Option<String>) -> Self {
        Self {
            name: name.filter(|s| !s.trim().is_empty()),
            id: id.filter(|s| !s.trim().is_empty()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.id.is_none()
    }

    /// Human-readable label for logs and error messages, name first.
    pub fn label(&self) -> &str {
        self.name
            .as_deref()
            .or(self.id.as_deref())
            .unwrap_or_default()
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A live chat handle: the serialized id plus display name, cloned out of
/// the client's chat listing. Invalid once the session disconnects.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedChat {
    pub id: String,
    pub name: String,
}

impl ResolvedChat {
    fn from_info(info: &ChatInfo) -> Self {
        Self {
            id: info.id.clone(),
            name: info
                .name
                .clone()
                .or_else(|| info.display_name.clone())
                .unwrap_or_default(),
        }
    }
}

/// Cache of resolved chats, keyed separately by id and by name.
///
/// Names and serialized ids live in different key spaces; two maps rule out
/// a name string colliding with an id string. Entries go in under both keys
/// when both are known, and the whole cache is dropped on disconnect since
/// handles do not survive the session.
#[derive(Default)]
pub struct ChatCache {
    by_id: DashMap<String, ResolvedChat>,
    by_name: DashMap<String, ResolvedChat>,
}

impl ChatCache {
    fn get(&self, destination: &Destination) -> Option<ResolvedChat> {
        if let Some(id) = &destination.id
            && let Some(hit) = self.by_id.get(id)
        {
            return Some(hit.value().clone());
        }
        if let Some(name) = &destination.name
            && let Some(hit) = self.by_name.get(name)
        {
            return Some(hit.value().clone());
        }
        None
    }

    /// Insert under the chat's own id and name, plus the requested name when
    /// the lookup matched a display alias instead.
    fn insert(&self, destination: &Destination, chat: &ResolvedChat) {
        if !chat.id.is_empty() {
            self.by_id.insert(chat.id.clone(), chat.clone());
        }
        if !chat.name.is_empty() {
            self.by_name.insert(chat.name.clone(), chat.clone());
        }
        if let Some(name) = &destination.name
            && name != &chat.name
        {
            self.by_name.insert(name.clone(), chat.clone());
        }
    }

    pub fn clear(&self) {
        self.by_id.clear();
        self.by_name.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty() && self.by_name.is_empty()
    }
}

#[derive(Debug, Error)]
pub enum ResolveError {
    /// No chat matched the requested name or id.
    #[error("chat \"{0}\" not found")]
    NotFound(String),

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

/// Resolves destinations to live chats via the client, memoizing results.
pub struct ChatResolver {
    cache: ChatCache,
    /// Log the full chat listing when a lookup fails.
    debug: bool,
}

impl ChatResolver {
    pub fn new(debug: bool) -> Self {
        Self {
            cache: ChatCache::default(),
            debug,
        }
    }

    pub fn cache(&self) -> &ChatCache {
        &self.cache
    }

    /// Resolve a destination, hitting the cache first and falling back to a
    /// full chat-list fetch with an exact-match linear scan. Matches by id
    /// when the destination has one, otherwise by name against the chat's
    /// name or display alias. No fuzzy matching.
    pub async fn resolve(
        &self,
        destination: &Destination,
        client: &dyn BridgeClient,
    ) -> Result<ResolvedChat, ResolveError> {
        if let Some(hit) = self.cache.get(destination) {
            return Ok(hit);
        }

        let chats = client.list_chats().await?;
        let found = match (&destination.id, &destination.name) {
            (Some(id), _) => chats.iter().find(|c| &c.id == id),
            (None, Some(name)) => chats.iter().find(|c| {
                c.name.as_deref() == Some(name) || c.display_name.as_deref() == Some(name)
            }),
            (None, None) => None,
        };

        let Some(found) = found else {
            warn!(destination = %destination, "could not find chat");
            if self.debug {
                log_chat_listing(&chats);
            }
            return Err(ResolveError::NotFound(destination.label().to_string()));
        };

        let chat = ResolvedChat::from_info(found);
        self.cache.insert(destination, &chat);
        Ok(chat)
    }
}

/// Log every chat the session can currently see.
pub(crate) fn log_chat_listing(chats: &[ChatInfo]) {
    info!("available chats:");
    for chat in chats {
        info!(
            "- {} ID: {}",
            chat.name.as_deref().or(chat.display_name.as_deref()).unwrap_or("<unnamed>"),
            chat.id
        );
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::bridge::testutil::StubClient;

    fn ops_and_oncall() -> Vec<ChatInfo> {
        vec![
            StubClient::chat("111@g.us", "Ops"),
            ChatInfo {
                id: "222@c.us".to_string(),
                name: Some("Alice".to_string()),
                display_name: Some("Ally".to_string()),
            },
        ]
    }

    #[tokio::test]
    async fn resolve_by_id_caches_the_paired_name() {
        let client = StubClient::new(ops_and_oncall());
        let resolver = ChatResolver::new(false);

        let by_id = resolver
            .resolve(
                &Destination::from_parts(None, Some("111@g.us".to_string())),
                &client,
            )
            .await
            .unwrap();
        assert_eq!(by_id.name, "Ops");

        // The paired name key was populated by the same call, so this does
        // not hit the client again.
        let by_name = resolver
            .resolve(
                &Destination::from_parts(Some("Ops".to_string()), None),
                &client,
            )
            .await
            .unwrap();
        assert_eq!(by_name, by_id);
        assert_eq!(client.list_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn resolve_by_display_alias() {
        let client = StubClient::new(ops_and_oncall());
        let resolver = ChatResolver::new(false);

        let chat = resolver
            .resolve(
                &Destination::from_parts(Some("Ally".to_string()), None),
                &client,
            )
            .await
            .unwrap();
        assert_eq!(chat.id, "222@c.us");

        // The alias used for the lookup is cached too.
        let again = resolver
            .resolve(
                &Destination::from_parts(Some("Ally".to_string()), None),
                &client,
            )
            .await
            .unwrap();
        assert_eq!(again, chat);
        assert_eq!(client.list_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn id_lookup_does_not_fall_back_to_name() {
        let client = StubClient::new(ops_and_oncall());
        let resolver = ChatResolver::new(false);

        // Unknown id with a perfectly valid name: the id is authoritative.
        let err = resolver
            .resolve(
                &Destination::from_parts(Some("Ops".to_string()), Some("999@g.us".to_string())),
                &client,
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn clear_forces_a_fresh_fetch() {
        let client = StubClient::new(ops_and_oncall());
        let resolver = ChatResolver::new(false);
        let destination = Destination::from_parts(Some("Ops".to_string()), None);

        resolver.resolve(&destination, &client).await.unwrap();
        assert!(!resolver.cache().is_empty());

        resolver.cache().clear();
        assert!(resolver.cache().is_empty());

        resolver.resolve(&destination, &client).await.unwrap();
        assert_eq!(client.list_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unknown_chat_error_names_the_destination() {
        let client = StubClient::new(ops_and_oncall());
        let resolver = ChatResolver::new(false);

        let err = resolver
            .resolve(
                &Destination::from_parts(Some("Nobody".to_string()), None),
                &client,
            )
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "chat \"Nobody\" not found");
    }

    #[tokio::test]
    async fn empty_destination_resolves_to_not_found() {
        let client = StubClient::new(ops_and_oncall());
        let resolver = ChatResolver::new(false);

        let err = resolver
            .resolve(&Destination::default(), &client)
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::NotFound(_)));
    }

    #[test]
    fn destination_normalizes_blank_parts() {
        let destination =
            Destination::from_parts(Some("  ".to_string()), Some("123@c.us".to_string()));
        assert_eq!(destination.name, None);
        assert_eq!(destination.label(), "123@c.us");
        assert!(Destination::from_parts(None, None).is_empty());
    }
}
