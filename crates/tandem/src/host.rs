//! The host session.
//!
//! One tokio task owns the [`HostProtocol`] and multiplexes transport
//! events, commands from the [`HostHandle`], approval decisions and timer
//! ticks. Approval and archive writes run in their own tasks and re-enter
//! the loop as events, so a slow approver only stalls its own connection.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use tandem_core::{DocumentEngine, DocumentId, Label, PeerId};
use tandem_perms::{ApprovalPort, GrantLedger, Identity, Requester};
use tandem_store::DocumentArchive;
use tandem_sync::{Action, HostProtocol, Notice, Outbound, Transport};

use crate::config::SessionConfig;
use crate::error::{Result, TandemError};
use crate::timer::TimerHandle;

enum HostCommand<E: DocumentEngine> {
    Submit {
        doc: E::Doc,
        reply: oneshot::Sender<Result<()>>,
    },
    Document {
        reply: oneshot::Sender<E::Doc>,
    },
    Revoke {
        label: Label,
        reply: oneshot::Sender<usize>,
    },
    AuthorizedPeers {
        reply: oneshot::Sender<Vec<PeerId>>,
    },
    Shutdown,
}

#[derive(Debug, Clone)]
enum HostEvent {
    ChallengeTick,
    SaveTick,
    Approval {
        label: Label,
        requester: Requester,
        approved: bool,
    },
    Saved { result: std::result::Result<(), String> },
}

/// Everything a host needs before it starts.
pub struct HostSession<E, T, A, D> {
    identity: Identity,
    ledger: GrantLedger,
    engine: E,
    transport: T,
    approval: A,
    archive: Arc<D>,
    document: DocumentId,
    config: SessionConfig,
}

impl<E, T, A, D> HostSession<E, T, A, D>
where
    E: DocumentEngine,
    T: Transport + 'static,
    A: ApprovalPort + 'static,
    D: DocumentArchive + 'static,
{
    pub fn new(
        identity: Identity,
        engine: E,
        transport: T,
        approval: A,
        archive: Arc<D>,
        document: DocumentId,
    ) -> Self {
        Self {
            identity,
            ledger: GrantLedger::new(),
            engine,
            transport,
            approval,
            archive,
            document,
            config: SessionConfig::default(),
        }
    }

    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Resume with grants issued earlier.
    pub fn with_ledger(mut self, ledger: GrantLedger) -> Self {
        self.ledger = ledger;
        self
    }

    /// Load the archived document and spawn the event loop.
    pub async fn start(self) -> Result<HostHandle<E>> {
        let mut protocol = HostProtocol::with_ledger(self.identity, self.ledger, self.engine);
        if let Some(snapshot) = self.archive.load_snapshot(&self.document).await? {
            protocol.replicator_mut().restore(&snapshot)?;
            tracing::info!(document = %self.document, "restored archived document");
        }

        let capacity = self.config.event_buffer.max(1);
        let (commands_tx, commands) = mpsc::channel(capacity);
        let (events_tx, events) = mpsc::unbounded_channel();
        let (view_tx, view) = watch::channel(protocol.replicator().content());
        let (notices_tx, notices) = broadcast::channel(capacity);

        let timers = vec![
            TimerHandle::every(
                self.config.challenge_interval,
                events_tx.clone(),
                HostEvent::ChallengeTick,
            ),
            TimerHandle::every(self.config.save_interval, events_tx.clone(), HostEvent::SaveTick),
        ];

        let local = self.transport.local_peer();
        let host = HostLoop {
            protocol,
            transport: self.transport,
            approval: Arc::new(self.approval),
            archive: self.archive,
            document: self.document,
            commands,
            events,
            events_tx,
            view: view_tx,
            notices: notices_tx,
            save_in_flight: false,
            _timers: timers,
        };
        let task = tokio::spawn(host.run());

        tracing::info!(peer = %local, "host session started");
        Ok(HostHandle {
            local,
            commands: commands_tx,
            view,
            notices,
            task,
        })
    }
}

struct HostLoop<E: DocumentEngine, T, A, D> {
    protocol: HostProtocol<E>,
    transport: T,
    approval: Arc<A>,
    archive: Arc<D>,
    document: DocumentId,
    commands: mpsc::Receiver<HostCommand<E>>,
    events: mpsc::UnboundedReceiver<HostEvent>,
    events_tx: mpsc::UnboundedSender<HostEvent>,
    view: watch::Sender<E::Content>,
    notices: broadcast::Sender<Notice>,
    save_in_flight: bool,
    _timers: Vec<TimerHandle>,
}

impl<E, T, A, D> HostLoop<E, T, A, D>
where
    E: DocumentEngine,
    T: Transport + 'static,
    A: ApprovalPort + 'static,
    D: DocumentArchive + 'static,
{
    async fn run(mut self) -> Result<()> {
        loop {
            tokio::select! {
                event = self.transport.next_event() => match event {
                    Some(event) => {
                        let actions = self.protocol.handle_event(event);
                        self.execute(actions).await;
                    }
                    None => {
                        tracing::info!("transport shut down");
                        break;
                    }
                },
                command = self.commands.recv() => match command {
                    Some(HostCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                Some(event) = self.events.recv() => self.handle_event(event).await,
            }
        }

        self.stop().await;
        Ok(())
    }

    async fn handle_command(&mut self, command: HostCommand<E>) {
        match command {
            HostCommand::Submit { doc, reply } => {
                let result = match self.protocol.local_edit(&doc) {
                    Ok(actions) => {
                        self.execute(actions).await;
                        Ok(())
                    }
                    Err(e) => Err(e.into()),
                };
                let _ = reply.send(result);
            }
            HostCommand::Document { reply } => {
                let _ = reply.send(self.protocol.replicator().document().clone());
            }
            HostCommand::Revoke { label, reply } => {
                let actions = self.protocol.revoke(&label);
                let dropped = actions
                    .iter()
                    .find_map(|action| match action {
                        Action::Notice(Notice::GrantRevoked { connections, .. }) => {
                            Some(*connections)
                        }
                        _ => None,
                    })
                    .unwrap_or(0);
                self.execute(actions).await;
                let _ = reply.send(dropped);
            }
            HostCommand::AuthorizedPeers { reply } => {
                let _ = reply.send(self.protocol.registry().authorized_peers());
            }
            HostCommand::Shutdown => {}
        }
    }

    async fn handle_event(&mut self, event: HostEvent) {
        match event {
            HostEvent::ChallengeTick => {
                let actions = self.protocol.on_challenge_tick();
                self.execute(actions).await;
            }
            HostEvent::SaveTick => self.start_save(),
            HostEvent::Approval {
                label,
                requester,
                approved,
            } => {
                let actions = self.protocol.on_approval(&label, &requester, approved);
                self.execute(actions).await;
            }
            HostEvent::Saved { result } => {
                self.save_in_flight = false;
                if let Err(e) = result {
                    tracing::warn!(document = %self.document, error = %e, "archive write failed");
                    self.protocol.replicator_mut().mark_unsaved();
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
                Action::RequestApproval {
                    label, requester, ..
                } => self.request_approval(label, requester),
                Action::ViewChanged => {
                    self.view.send_replace(self.protocol.replicator().content());
                }
                Action::Notice(notice) => {
                    let _ = self.notices.send(notice);
                }
                other => tracing::debug!(action = ?other, "ignoring client-side action"),
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

    fn request_approval(&self, label: Label, requester: Requester) {
        let approval = Arc::clone(&self.approval);
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let approved = approval.request_approval(&label, &requester).await;
            let _ = events.send(HostEvent::Approval {
                label,
                requester,
                approved,
            });
        });
    }

    fn start_save(&mut self) {
        if self.save_in_flight {
            return;
        }
        let Some(snapshot) = self.protocol.replicator_mut().take_unsaved() else {
            return;
        };
        self.save_in_flight = true;

        let archive = Arc::clone(&self.archive);
        let document = self.document.clone();
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let result = archive
                .save_snapshot(&document, &snapshot)
                .await
                .map_err(|e| e.to_string());
            let _ = events.send(HostEvent::Saved { result });
        });
    }

    /// Flush the archive and drop every link.
    async fn stop(&mut self) {
        while self.save_in_flight {
            match self.events.recv().await {
                Some(event @ HostEvent::Saved { .. }) => self.handle_event(event).await,
                Some(_) => {}
                None => break,
            }
        }
        if let Some(snapshot) = self.protocol.replicator_mut().take_unsaved() {
            if let Err(e) = self.archive.save_snapshot(&self.document, &snapshot).await {
                tracing::warn!(document = %self.document, error = %e, "final archive write failed");
            }
        }

        let peers: Vec<PeerId> = self.protocol.registry().iter().map(|c| c.peer.clone()).collect();
        for peer in peers {
            let _ = self.transport.close(&peer).await;
        }
        tracing::info!("host session stopped");
    }
}

/// Control surface of a running host.
pub struct HostHandle<E: DocumentEngine> {
    local: PeerId,
    commands: mpsc::Sender<HostCommand<E>>,
    view: watch::Receiver<E::Content>,
    notices: broadcast::Receiver<Notice>,
    task: JoinHandle<Result<()>>,
}

impl<E: DocumentEngine> HostHandle<E> {
    pub fn local_peer(&self) -> &PeerId {
        &self.local
    }

    async fn request<R>(&self, command: impl FnOnce(oneshot::Sender<R>) -> HostCommand<E>) -> Result<R> {
        let (reply, answer) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| TandemError::SessionClosed)?;
        answer.await.map_err(|_| TandemError::SessionClosed)
    }

    /// Hand in the editor's document; new edits are applied and broadcast.
    pub async fn submit(&self, doc: E::Doc) -> Result<()> {
        self.request(|reply| HostCommand::Submit { doc, reply }).await?
    }

    /// The current replica, to edit and [`submit`](Self::submit).
    pub async fn document(&self) -> Result<E::Doc> {
        self.request(|reply| HostCommand::Document { reply }).await
    }

    /// Revoke every grant under `label`. Returns how many links were dropped.
    pub async fn revoke(&self, label: impl Into<Label>) -> Result<usize> {
        let label = label.into();
        self.request(|reply| HostCommand::Revoke { label, reply }).await
    }

    pub async fn authorized_peers(&self) -> Result<Vec<PeerId>> {
        self.request(|reply| HostCommand::AuthorizedPeers { reply }).await
    }

    /// Watch the materialized document.
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

    /// Stop the loop, flushing unsaved changes to the archive.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.commands.send(HostCommand::Shutdown).await;
        self.task
            .await
            .map_err(|e| TandemError::Task(e.to_string()))?
    }
}
