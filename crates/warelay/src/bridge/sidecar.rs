//! Sidecar-backed client: a Node.js subprocess driving the hidden browser
//! session, spoken to over JSON Lines on stdio.
//!
//! The process is spawned lazily by `initialize` and respawned by the next
//! `initialize` if it died. Command replies are correlated by request id;
//! lifecycle events are forwarded to the session controller's channel.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::{debug, info, warn};
use ulid::Ulid;

use warelay_bridge_protocol::{ChatInfo, SidecarCommand, SidecarEvent, error_codes};

use super::{BridgeClient, BridgeError, ClientEvent};
use crate::config::SidecarConfig;

/// How long `destroy` waits for the sidecar to acknowledge before the
/// process is killed outright.
const DESTROY_GRACE: Duration = Duration::from_secs(5);

/// Reply routed back to the command that is waiting on it.
#[derive(Debug)]
enum CommandReply {
    Ack,
    Chats(Vec<ChatInfo>),
    Failed { code: String, message: String },
}

type PendingMap = Arc<DashMap<String, oneshot::Sender<CommandReply>>>;

struct Link {
    child: Child,
    stdin: ChildStdin,
}

/// Production [`BridgeClient`] backed by the automation sidecar process.
pub struct SidecarClient {
    settings: SidecarConfig,
    events: mpsc::Sender<ClientEvent>,
    link: Arc<Mutex<Option<Link>>>,
    pending: PendingMap,
}

impl SidecarClient {
    pub fn new(settings: SidecarConfig, events: mpsc::Sender<ClientEvent>) -> Self {
        Self {
            settings,
            events,
            link: Arc::new(Mutex::new(None)),
            pending: Arc::new(DashMap::new()),
        }
    }

    /// Spawn the sidecar process if none is running.
    async fn ensure_spawned(&self) -> Result<(), BridgeError> {
        let mut link = self.link.lock().await;
        if let Some(active) = link.as_mut()
            && matches!(active.child.try_wait(), Ok(None))
        {
            return Ok(());
        }
        if link.take().is_some() {
            warn!("sidecar process died, respawning");
        }

        let dir = resolve_sidecar_dir(self.settings.dir.as_deref())?;
        info!(path = %dir.display(), "starting WhatsApp sidecar process");

        let mut cmd = Command::new("node");
        cmd.arg("index.js")
            .current_dir(&dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(auth_dir) = &self.settings.auth_dir {
            cmd.env("WARELAY_AUTH_DIR", auth_dir);
        }

        let mut child = cmd.spawn()?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| BridgeError::Unavailable("sidecar stdin not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BridgeError::Unavailable("sidecar stdout not captured".to_string()))?;
        if let Some(stderr) = child.stderr.take() {
            spawn_stderr_reader(stderr);
        }
        spawn_stdout_reader(
            stdout,
            Arc::clone(&self.pending),
            self.events.clone(),
            Arc::clone(&self.link),
        );

        *link = Some(Link { child, stdin });
        Ok(())
    }

    /// Issue a command and wait for its correlated reply.
    async fn request(
        &self,
        build: impl FnOnce(String) -> SidecarCommand,
    ) -> Result<CommandReply, BridgeError> {
        let request_id = Ulid::new().to_string();
        let command = build(request_id.clone());
        let (tx, rx) = oneshot::channel();
        self.pending.insert(request_id.clone(), tx);

        if let Err(e) = self.write_command(&command).await {
            self.pending.remove(&request_id);
            return Err(e);
        }

        // A dropped sender means the process went away under us.
        let reply = rx.await.map_err(|_| BridgeError::ContextTornDown)?;
        reply_into_result(reply)
    }

    async fn write_command(&self, command: &SidecarCommand) -> Result<(), BridgeError> {
        let mut line =
            serde_json::to_string(command).map_err(|e| BridgeError::Protocol(e.to_string()))?;
        line.push('\n');

        let mut guard = self.link.lock().await;
        let Some(link) = guard.as_mut() else {
            return Err(BridgeError::Unavailable(
                "sidecar not running; initialize first".to_string(),
            ));
        };
        link.stdin.write_all(line.as_bytes()).await?;
        link.stdin.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl BridgeClient for SidecarClient {
    async fn initialize(&self) -> Result<(), BridgeError> {
        self.ensure_spawned().await?;
        match self
            .request(|request_id| SidecarCommand::Initialize { request_id })
            .await?
        {
            CommandReply::Ack => Ok(()),
            other => Err(BridgeError::Protocol(format!(
                "unexpected reply to initialize: {other:?}"
            ))),
        }
    }

    async fn list_chats(&self) -> Result<Vec<ChatInfo>, BridgeError> {
        match self
            .request(|request_id| SidecarCommand::ListChats { request_id })
            .await?
        {
            CommandReply::Chats(chats) => Ok(chats),
            other => Err(BridgeError::Protocol(format!(
                "unexpected reply to list_chats: {other:?}"
            ))),
        }
    }

    async fn send_message(&self, chat_id: &str, body: &str) -> Result<(), BridgeError> {
        match self
            .request(|request_id| SidecarCommand::SendMessage {
                request_id,
                chat_id: chat_id.to_string(),
                body: body.to_string(),
            })
            .await?
        {
            CommandReply::Ack => Ok(()),
            other => Err(BridgeError::Protocol(format!(
                "unexpected reply to send_message: {other:?}"
            ))),
        }
    }

    async fn destroy(&self) -> Result<(), BridgeError> {
        // Ask for a clean teardown first; if the sidecar is wedged, fall
        // through and kill the process.
        let graceful = tokio::time::timeout(
            DESTROY_GRACE,
            self.request(|request_id| SidecarCommand::Destroy { request_id }),
        )
        .await;
        match &graceful {
            Ok(Ok(_)) => debug!("sidecar acknowledged destroy"),
            Ok(Err(e)) => debug!(error = %e, "sidecar destroy command failed"),
            Err(_) => warn!("sidecar did not acknowledge destroy in time, killing"),
        }

        if let Some(mut link) = self.link.lock().await.take() {
            link.child.kill().await?;
        }
        Ok(())
    }
}

/// Convert a raw reply into the bridge error taxonomy. Failures tagged with
/// the context-destroyed code become the typed transient teardown.
fn reply_into_result(reply: CommandReply) -> Result<CommandReply, BridgeError> {
    match reply {
        CommandReply::Failed { code, .. } if code == error_codes::CONTEXT_DESTROYED => {
            Err(BridgeError::ContextTornDown)
        }
        CommandReply::Failed { code, message } => Err(BridgeError::Command { code, message }),
        other => Ok(other),
    }
}

/// Locate the sidecar package directory.
fn resolve_sidecar_dir(explicit: Option<&Path>) -> Result<PathBuf, BridgeError> {
    if let Some(dir) = explicit {
        if dir.join("index.js").exists() {
            return Ok(dir.to_path_buf());
        }
        return Err(BridgeError::Unavailable(format!(
            "sidecar directory missing index.js: {}",
            dir.display()
        )));
    }
    for candidate in ["sidecar", "../sidecar"] {
        let path = PathBuf::from(candidate);
        if path.join("index.js").exists() {
            return Ok(path);
        }
    }
    Err(BridgeError::Unavailable(
        "WhatsApp sidecar not found; set SIDECAR_DIR or place it in ./sidecar".to_string(),
    ))
}

fn spawn_stdout_reader(
    stdout: ChildStdout,
    pending: PendingMap,
    events: mpsc::Sender<ClientEvent>,
    link: Arc<Mutex<Option<Link>>>,
) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            handle_line(&line, &pending, &events).await;
        }

        warn!("sidecar stdout closed");
        // Every in-flight command fails with the torn-down error once its
        // sender is dropped.
        pending.clear();
        // Drop the link only if it still refers to the dead process; a
        // respawn may already have installed a fresh one.
        let mut guard = link.lock().await;
        if let Some(active) = guard.as_mut()
            && !matches!(active.child.try_wait(), Ok(None))
        {
            *guard = None;
        }
        drop(guard);
        let _ = events
            .send(ClientEvent::Disconnected {
                reason: warelay_bridge_protocol::DisconnectReason::Other,
            })
            .await;
    });
}

fn spawn_stderr_reader(stderr: ChildStderr) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            warn!(target: "whatsapp_sidecar", "{}", line);
        }
    });
}

/// Route one stdout line: command replies resolve their waiter, lifecycle
/// events go to the controller.
async fn handle_line(line: &str, pending: &PendingMap, events: &mpsc::Sender<ClientEvent>) {
    let event: SidecarEvent = match serde_json::from_str(line) {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, line, "unparseable sidecar line");
            return;
        }
    };

    match event {
        SidecarEvent::ChatList { request_id, chats } => {
            resolve_pending(pending, &request_id, CommandReply::Chats(chats));
        }
        SidecarEvent::Ack { request_id } => {
            resolve_pending(pending, &request_id, CommandReply::Ack);
        }
        SidecarEvent::CommandFailed {
            request_id,
            code,
            message,
        } => {
            resolve_pending(pending, &request_id, CommandReply::Failed { code, message });
        }
        SidecarEvent::Qr { code } => forward(events, ClientEvent::Qr { code }).await,
        SidecarEvent::Authenticated => forward(events, ClientEvent::Authenticated).await,
        SidecarEvent::Ready { session } => forward(events, ClientEvent::Ready { session }).await,
        SidecarEvent::AuthFailure { message } => {
            forward(events, ClientEvent::AuthFailure { message }).await;
        }
        SidecarEvent::Disconnected { reason } => {
            forward(events, ClientEvent::Disconnected { reason }).await;
        }
    }
}

fn resolve_pending(pending: &PendingMap, request_id: &str, reply: CommandReply) {
    match pending.remove(request_id) {
        Some((_, tx)) => {
            let _ = tx.send(reply);
        }
        None => warn!(request_id, "sidecar reply for unknown request"),
    }
}

async fn forward(events: &mpsc::Sender<ClientEvent>, event: ClientEvent) {
    if events.send(event).await.is_err() {
        debug!("controller gone, dropping sidecar event");
    }
}
