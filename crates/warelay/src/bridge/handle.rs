//! Stable indirection over the replaceable client instance.

use std::sync::Arc;

use tokio::sync::RwLock;

use super::BridgeClient;

/// Handle to the active [`BridgeClient`].
///
/// The controller replaces the inner instance wholesale during forced
/// reconnection. Everything else resolves the client through this handle at
/// call time, so a swap cannot leak a stale instance into new code paths;
/// in-flight calls that already hold the old instance fail with the torn-down
/// error and are retried or surfaced by their callers.
#[derive(Clone, Default)]
pub struct ClientHandle {
    inner: Arc<RwLock<Option<Arc<dyn BridgeClient>>>>,
}

impl ClientHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current client, if one has been installed.
    pub async fn get(&self) -> Option<Arc<dyn BridgeClient>> {
        self.inner.read().await.clone()
    }

    /// Install a new client, returning the one it replaced.
    pub async fn replace(
        &self,
        client: Arc<dyn BridgeClient>,
    ) -> Option<Arc<dyn BridgeClient>> {
        self.inner.write().await.replace(client)
    }

    /// Whether `client` is still the installed instance. Retry loops check
    /// this before re-running against a client a reconnect may have
    /// superseded.
    pub async fn is_current(&self, client: &Arc<dyn BridgeClient>) -> bool {
        self.inner
            .read()
            .await
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, client))
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::StubClient;
    use super::*;

    #[tokio::test]
    async fn replace_swaps_the_instance() {
        let handle = ClientHandle::new();
        assert!(handle.get().await.is_none());

        let first: Arc<dyn BridgeClient> = Arc::new(StubClient::new(vec![]));
        let second: Arc<dyn BridgeClient> = Arc::new(StubClient::new(vec![]));

        assert!(handle.replace(Arc::clone(&first)).await.is_none());
        assert!(handle.is_current(&first).await);

        let replaced = handle.replace(Arc::clone(&second)).await;
        assert!(replaced.is_some_and(|old| Arc::ptr_eq(&old, &first)));
        assert!(!handle.is_current(&first).await);
        assert!(handle.is_current(&second).await);
    }
}
