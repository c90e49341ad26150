//! Session lifecycle: owns the active client, reacts to pairing and
//! disconnect events, and restarts the session when credentials are revoked.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{RwLock, mpsc};
use tracing::{debug, error, info, warn};

use warelay_bridge_protocol::SessionInfo;

use crate::bridge::{BridgeClient, ClientEvent, ClientFactory, ClientHandle};
use crate::notify::PairingNotifier;
use crate::resolver::{ChatResolver, Destination, log_chat_listing};

/// Delay before the client is recreated after a forced logout.
const RESTART_DELAY: Duration = Duration::from_secs(3);
/// Retry delay when initialization fails on the expected transient teardown.
const TEARDOWN_RETRY_DELAY: Duration = Duration::from_secs(5);
/// Retry delay for any other initialization failure.
const INIT_RETRY_DELAY: Duration = Duration::from_secs(10);

const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Authentication lifecycle of the relay's single WhatsApp session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    /// A pairing code has been issued and awaits a scan.
    Authenticating,
    Ready,
    Disconnected,
}

/// Owns one [`BridgeClient`] at a time and drives it through the session
/// lifecycle. On a forced logout the client is destroyed and rebuilt through
/// the injected factory; everything else reaches the client through the
/// shared [`ClientHandle`], so the swap is transparent.
pub struct SessionController {
    factory: ClientFactory,
    handle: ClientHandle,
    state: RwLock<SessionState>,
    resolver: Arc<ChatResolver>,
    notifier: Arc<PairingNotifier>,
    default_destination: Destination,
    debug: bool,
}

impl SessionController {
    pub fn new(
        factory: ClientFactory,
        handle: ClientHandle,
        resolver: Arc<ChatResolver>,
        notifier: Arc<PairingNotifier>,
        default_destination: Destination,
        debug: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            factory,
            handle,
            state: RwLock::new(SessionState::Unauthenticated),
            resolver,
            notifier,
            default_destination,
            debug,
        })
    }

    pub async fn state(&self) -> SessionState {
        *self.state.read().await
    }

    /// Whether the session can take sends right now.
    pub async fn is_ready(&self) -> bool {
        *self.state.read().await == SessionState::Ready && self.handle.get().await.is_some()
    }

    /// Build the client, start initialization, and consume lifecycle events
    /// until the session ends. Runs for the life of the process.
    pub async fn run(self: Arc<Self>) {
        loop {
            let (events, mut rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
            let client = (self.factory)(events);
            self.handle.replace(Arc::clone(&client)).await;
            self.spawn_initialize(client);

            if !self.drive(&mut rx).await {
                // Non-forced disconnects leave the session down until an
                // operator restarts the process.
                return;
            }

            info!(
                "re-authentication required, restarting client in {}s",
                RESTART_DELAY.as_secs()
            );
            tokio::time::sleep(RESTART_DELAY).await;
            if let Some(old) = self.handle.get().await
                && let Err(e) = old.destroy().await
            {
                warn!(error = %e, "error destroying client");
            }
        }
    }

    /// Consume lifecycle events until the channel closes or a forced logout
    /// requires the client to be rebuilt. Returns whether to rebuild.
    async fn drive(&self, rx: &mut mpsc::Receiver<ClientEvent>) -> bool {
        while let Some(event) = rx.recv().await {
            match event {
                ClientEvent::Qr { code } => self.on_qr(code).await,
                ClientEvent::Authenticated => info!("WhatsApp authenticated successfully"),
                ClientEvent::Ready { session } => self.on_ready(session).await,
                ClientEvent::AuthFailure { message } => {
                    error!(message, "authentication failed, QR scan required");
                    self.set_state(SessionState::Unauthenticated).await;
                }
                ClientEvent::Disconnected { reason } => {
                    warn!(?reason, "client disconnected");
                    self.resolver.cache().clear();
                    info!("chat cache cleared");
                    self.set_state(SessionState::Disconnected).await;
                    if reason.requires_relogin() {
                        return true;
                    }
                }
            }
        }
        false
    }

    async fn on_qr(&self, code: String) {
        self.set_state(SessionState::Authenticating).await;
        info!("QR code received, scan it with your phone");
        // Pairing must never block on notification problems.
        let notifier = Arc::clone(&self.notifier);
        tokio::spawn(async move {
            notifier.notify(&code).await;
        });
    }

    async fn on_ready(&self, session: SessionInfo) {
        self.set_state(SessionState::Ready).await;
        info!(
            phone = session.phone_number.as_deref().unwrap_or("unknown"),
            "WhatsApp client is ready"
        );

        let Some(client) = self.handle.get().await else {
            return;
        };
        if self.debug && let Ok(chats) = client.list_chats().await {
            log_chat_listing(&chats);
        }

        // Early validation of the configured destination; failure here is
        // diagnostic only.
        if !self.default_destination.is_empty() {
            match self
                .resolver
                .resolve(&self.default_destination, client.as_ref())
                .await
            {
                Ok(chat) => info!(chat = %chat.name, id = %chat.id, "found destination chat"),
                Err(e) => error!(error = %e, "error resolving destination chat"),
            }
        }
    }

    /// Initialization with unbounded retry. The expected transient teardown
    /// retries faster than real failures.
    fn spawn_initialize(self: &Arc<Self>, client: Arc<dyn BridgeClient>) {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match client.initialize().await {
                    Ok(()) => return,
                    Err(e) if e.is_transient_teardown() => {
                        info!(
                            "initialization hit a torn-down context, retrying in {}s",
                            TEARDOWN_RETRY_DELAY.as_secs()
                        );
                        tokio::time::sleep(TEARDOWN_RETRY_DELAY).await;
                    }
                    Err(e) => {
                        error!(
                            error = %e,
                            "failed to initialize client, retrying in {}s",
                            INIT_RETRY_DELAY.as_secs()
                        );
                        tokio::time::sleep(INIT_RETRY_DELAY).await;
                    }
                }
                if !controller.handle.is_current(&client).await {
                    debug!("client superseded during initialization retry");
                    return;
                }
            }
        });
    }

    async fn set_state(&self, next: SessionState) {
        let mut state = self.state.write().await;
        if *state != next {
            debug!(from = ?*state, to = ?next, "session state transition");
            *state = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::Ordering;

    use warelay_bridge_protocol::{ChatInfo, DisconnectReason};

    use super::*;
    use crate::bridge::testutil::StubClient;

    struct Harness {
        controller: Arc<SessionController>,
        resolver: Arc<ChatResolver>,
        built: Arc<Mutex<Vec<Arc<StubClient>>>>,
    }

    fn harness(chats: Vec<ChatInfo>, default_destination: Destination) -> Harness {
        harness_with(chats, default_destination, false)
    }

    fn harness_with(
        chats: Vec<ChatInfo>,
        default_destination: Destination,
        fail_first_init: bool,
    ) -> Harness {
        let built: Arc<Mutex<Vec<Arc<StubClient>>>> = Arc::default();
        let built_in_factory = Arc::clone(&built);
        let factory: ClientFactory = Arc::new(move |events| {
            let client = Arc::new(StubClient::with_events(chats.clone(), events));
            let mut all = built_in_factory.lock().unwrap();
            if fail_first_init && all.is_empty() {
                client.fail_next_init.store(true, Ordering::SeqCst);
            }
            all.push(Arc::clone(&client));
            client
        });
        let resolver = Arc::new(ChatResolver::new(false));
        let controller = SessionController::new(
            factory,
            ClientHandle::new(),
            Arc::clone(&resolver),
            Arc::new(PairingNotifier::new(None, None)),
            default_destination,
            false,
        );
        Harness {
            controller,
            resolver,
            built,
        }
    }

    fn current(h: &Harness) -> Arc<StubClient> {
        let all = h.built.lock().unwrap();
        Arc::clone(all.last().expect("no client built yet"))
    }

    fn built_count(h: &Harness) -> usize {
        h.built.lock().unwrap().len()
    }

    /// Let spawned tasks make progress under paused time.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn ready_event_marks_ready_and_resolves_default() {
        let h = harness(
            vec![StubClient::chat("111@g.us", "Ops")],
            Destination::from_parts(Some("Ops".to_string()), None),
        );
        tokio::spawn(Arc::clone(&h.controller).run());
        settle().await;

        assert!(!h.controller.is_ready().await);
        assert_eq!(current(&h).init_calls.load(Ordering::SeqCst), 1);

        current(&h)
            .emit(ClientEvent::Ready {
                session: SessionInfo::default(),
            })
            .await;
        settle().await;

        assert!(h.controller.is_ready().await);
        // Early validation warmed the cache.
        assert!(!h.resolver.cache().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn qr_event_moves_to_authenticating() {
        let h = harness(vec![], Destination::default());
        tokio::spawn(Arc::clone(&h.controller).run());
        settle().await;

        current(&h)
            .emit(ClientEvent::Qr {
                code: "2@pairing-code".to_string(),
            })
            .await;
        settle().await;

        assert_eq!(h.controller.state().await, SessionState::Authenticating);
        assert!(!h.controller.is_ready().await);
    }

    #[tokio::test(start_paused = true)]
    async fn auth_failure_returns_to_unauthenticated() {
        let h = harness(vec![], Destination::default());
        tokio::spawn(Arc::clone(&h.controller).run());
        settle().await;

        current(&h)
            .emit(ClientEvent::Qr {
                code: "2@pairing-code".to_string(),
            })
            .await;
        current(&h)
            .emit(ClientEvent::AuthFailure {
                message: "scan rejected".to_string(),
            })
            .await;
        settle().await;

        assert_eq!(h.controller.state().await, SessionState::Unauthenticated);
    }

    #[tokio::test(start_paused = true)]
    async fn forced_logout_rebuilds_the_client_after_the_delay() {
        let h = harness(
            vec![StubClient::chat("111@g.us", "Ops")],
            Destination::from_parts(Some("Ops".to_string()), None),
        );
        tokio::spawn(Arc::clone(&h.controller).run());
        settle().await;

        let first = current(&h);
        first
            .emit(ClientEvent::Ready {
                session: SessionInfo::default(),
            })
            .await;
        settle().await;
        assert!(!h.resolver.cache().is_empty());

        first
            .emit(ClientEvent::Disconnected {
                reason: DisconnectReason::Logout,
            })
            .await;
        settle().await;

        assert_eq!(h.controller.state().await, SessionState::Disconnected);
        assert!(h.resolver.cache().is_empty());
        assert_eq!(built_count(&h), 1);

        tokio::time::sleep(Duration::from_secs(4)).await;

        assert_eq!(built_count(&h), 2);
        assert_eq!(first.destroy_calls.load(Ordering::SeqCst), 1);
        assert_eq!(current(&h).init_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn other_disconnect_reasons_stay_idle() {
        let h = harness(vec![], Destination::default());
        tokio::spawn(Arc::clone(&h.controller).run());
        settle().await;

        current(&h)
            .emit(ClientEvent::Disconnected {
                reason: DisconnectReason::Other,
            })
            .await;
        tokio::time::sleep(Duration::from_secs(15)).await;

        assert_eq!(built_count(&h), 1);
        assert_eq!(h.controller.state().await, SessionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn initialization_failure_is_retried() {
        let h = harness_with(vec![], Destination::default(), true);
        tokio::spawn(Arc::clone(&h.controller).run());
        settle().await;

        let client = current(&h);
        assert_eq!(client.init_calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(client.init_calls.load(Ordering::SeqCst), 2);
    }
}
