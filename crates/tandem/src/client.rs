//! The client session.
//!
//! Loads the stored grant for its label, connects to the host and runs the
//! [`ClientProtocol`] in one tokio task. Grants are persisted and purged as
//! the handshake dictates; reconnects and the stale-grant check run on
//! owned timers.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use tandem_core::{DocumentEngine, Label, PeerId};
use tandem_perms::{AuthorizationState, Identity};
use tandem_store::{CapabilityStore, CapabilityStoreExt};
use tandem_sync::{Action, ClientProtocol, Notice, Outbound, Transport};

use crate::config::SessionConfig;
use crate::error::{Result, TandemError};
use crate::timer::TimerHandle;

enum ClientCommand<E: DocumentEngine> {
    Submit {
        doc: E::Doc,
        reply: oneshot::Sender<Result<()>>,
    },
    Document {
        reply: oneshot::Sender<E::Doc>,
    },
    State {
        reply: oneshot::Sender<AuthorizationState>,
    },
    Shutdown,
}

#[derive(Debug, Clone)]
enum ClientEvent {
    HandshakeCheck,
    Reconnect { peer: PeerId },
}

/// Everything a client needs before it connects.
pub struct ClientSession<E, T, C> {
    identity: Identity,
    host: PeerId,
    label: Label,
    engine: E,
    transport: T,
    store: Arc<C>,
    config: SessionConfig,
}

impl<E, T, C> ClientSession<E, T, C>
where
    E: DocumentEngine,
    T: Transport + 'static,
    C: CapabilityStore + 'static,
{
    pub fn new(
        identity: Identity,
        host: impl Into<PeerId>,
        label: impl Into<Label>,
        engine: E,
        transport: T,
        store: Arc<C>,
    ) -> Self {
        Self {
            identity,
            host: host.into(),
            label: label.into(),
            engine,
            transport,
            store,
            config: SessionConfig::default(),
        }
    }

    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Load the stored grant, connect to the host and spawn the event loop.
    pub async fn start(self) -> Result<ClientHandle<E>> {
        let grant = self.store.load_grant(&self.label).await?;
        tracing::info!(
            host = %self.host,
            label = %self.label,
            stored_grant = grant.is_some(),
            "client session starting"
        );

        let protocol = ClientProtocol::new(
            self.host.clone(),
            self.identity,
            self.label,
            grant,
            self.engine,
            self.config.protocol(),
        );

        let capacity = self.config.event_buffer.max(1);
        let (commands_tx, commands) = mpsc::channel(capacity);
        let (events_tx, events) = mpsc::unbounded_channel();
        let (view_tx, view) = watch::channel(protocol.replicator().content());
        let (notices_tx, notices) = broadcast::channel(capacity);

        self.transport.connect(&self.host).await?;

        let client = ClientLoop {
            protocol,
            transport: self.transport,
            store: self.store,
            commands,
            events,
            events_tx,
            view: view_tx,
            notices: notices_tx,
            handshake_check: None,
            reconnect: None,
        };
        let task = tokio::spawn(client.run());

        Ok(ClientHandle {
            host: self.host,
            commands: commands_tx,
            view,
            notices,
            task,
        })
    }
}

struct ClientLoop<E: DocumentEngine, T, C> {
    protocol: ClientProtocol<E>,
    transport: T,
    store: Arc<C>,
    commands: mpsc::Receiver<ClientCommand<E>>,
    events: mpsc::UnboundedReceiver<ClientEvent>,
    events_tx: mpsc::UnboundedSender<ClientEvent>,
    view: watch::Sender<E::Content>,
    notices: broadcast::Sender<Notice>,
    handshake_check: Option<TimerHandle>,
    reconnect: Option<TimerHandle>,
}

impl<E, T, C> ClientLoop<E, T, C>
where
    E: DocumentEngine,
    T: Transport + 'static,
    C: CapabilityStore + 'static,
{
    async fn run(mut self) -> Result<()> {
        loop {
            tokio::select! {
                event = self.transport.next_event() => match event {
                    Some(event) => {
                        let actions = self.protocol.handle_event(event, Instant::now());
                        self.execute(actions).await;
                    }
                    None => {
                        tracing::info!("transport shut down");
                        break;
                    }
                },
                command = self.commands.recv() => match command {
                    Some(ClientCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                Some(event) = self.events.recv() => self.handle_event(event).await,
            }
        }

        let host = self.protocol.host().clone();
        let _ = self.transport.close(&host).await;
        tracing::info!(%host, "client session stopped");
        Ok(())
    }

    async fn handle_command(&mut self, command: ClientCommand<E>) {
        match command {
            ClientCommand::Submit { doc, reply } => {
                let result = match self.protocol.local_edit(&doc) {
                    Ok(actions) => {
                        self.execute(actions).await;
                        Ok(())
                    }
                    Err(e) => Err(e.into()),
                };
                let _ = reply.send(result);
            }
            ClientCommand::Document { reply } => {
                let _ = reply.send(self.protocol.replicator().document().clone());
            }
            ClientCommand::State { reply } => {
                let _ = reply.send(self.protocol.state());
            }
            ClientCommand::Shutdown => {}
        }
    }

    async fn handle_event(&mut self, event: ClientEvent) {
        match event {
            ClientEvent::HandshakeCheck => {
                self.handshake_check = None;
                let actions = self.protocol.on_handshake_check(Instant::now());
                self.execute(actions).await;
            }
            ClientEvent::Reconnect { peer } => {
                self.reconnect = None;
                if let Err(e) = self.transport.connect(&peer).await {
                    tracing::warn!(%peer, error = %e, "reconnect failed");
                }
            }
        }
    }

    async fn execute(&mut self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Send(out) => self.send(out).await,
                Action::Close { peer } => {
                    if let Err(e) = self.transport.close(&peer).await {
                        tracing::warn!(%peer, error = %e, "failed to close link");
                    }
                }
                Action::PersistGrant(grant) => {
                    if let Err(e) = self.store.save_grant(&grant).await {
                        tracing::warn!(label = %grant.label, error = %e, "failed to persist grant");
                    }
                }
                Action::PurgeGrant(label) => {
                    if let Err(e) = self.store.purge_grant(&label).await {
                        tracing::warn!(%label, error = %e, "failed to purge grant");
                    }
                }
                Action::Reconnect {
                    peer,
                    attempt,
                    delay,
                } => {
                    tracing::info!(%peer, attempt, ?delay, "scheduling reconnect");
                    self.reconnect = Some(TimerHandle::after(
                        delay,
                        self.events_tx.clone(),
                        ClientEvent::Reconnect { peer },
                    ));
                }
                Action::ScheduleHandshakeCheck { after } => {
                    self.handshake_check = Some(TimerHandle::after(
                        after,
                        self.events_tx.clone(),
                        ClientEvent::HandshakeCheck,
                    ));
                }
                Action::ViewChanged => {
                    self.view.send_replace(self.protocol.replicator().content());
                }
                Action::Notice(notice) => {
                    let _ = self.notices.send(notice);
                }
                Action::RequestApproval { .. } => {
                    tracing::debug!("ignoring host-side action");
                }
            }
        }
    }

    async fn send(&self, out: Outbound) {
        let bytes = match out.message.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(peer = %out.peer, kind = out.message.kind(), error = %e, "failed to encode");
                return;
            }
        };
        if let Err(e) = self.transport.send(&out.peer, bytes).await {
            tracing::warn!(peer = %out.peer, kind = out.message.kind(), error = %e, "failed to send");
        }
    }
}

/// Control surface of a running client.
pub struct ClientHandle<E: DocumentEngine> {
    host: PeerId,
    commands: mpsc::Sender<ClientCommand<E>>,
    view: watch::Receiver<E::Content>,
    notices: broadcast::Receiver<Notice>,
    task: JoinHandle<Result<()>>,
}

impl<E: DocumentEngine> ClientHandle<E> {
    pub fn host(&self) -> &PeerId {
        &self.host
    }

    async fn request<R>(
        &self,
        command: impl FnOnce(oneshot::Sender<R>) -> ClientCommand<E>,
    ) -> Result<R> {
        let (reply, answer) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| TandemError::SessionClosed)?;
        answer.await.map_err(|_| TandemError::SessionClosed)
    }

    /// Hand in the editor's document. Edits reach the host once authorized.
    pub async fn submit(&self, doc: E::Doc) -> Result<()> {
        self.request(|reply| ClientCommand::Submit { doc, reply }).await?
    }

    /// The current replica, to edit and [`submit`](Self::submit).
    pub async fn document(&self) -> Result<E::Doc> {
        self.request(|reply| ClientCommand::Document { reply }).await
    }

    /// Handshake state of the host link.
    pub async fn state(&self) -> Result<AuthorizationState> {
        self.request(|reply| ClientCommand::State { reply }).await
    }

    pub fn view(&self) -> watch::Receiver<E::Content> {
        self.view.clone()
    }

    pub fn content(&self) -> E::Content {
        self.view.borrow().clone()
    }

    /// A new notice stream, starting now.
    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.notices.resubscribe()
    }

    /// The next notice since the session started. `None` once it stops.
    pub async fn next_notice(&mut self) -> Option<Notice> {
        loop {
            match self.notices.recv().await {
                Ok(notice) => return Some(notice),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "notice receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Close the host link and stop the loop.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.commands.send(ClientCommand::Shutdown).await;
        self.task
            .await
            .map_err(|e| TandemError::Task(e.to_string()))?
    }
}
