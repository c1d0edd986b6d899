//! The per-session event loop.
//!
//! User commands, provider callbacks, provider/backend round-trip completions and status events
//! all arrive as discrete inputs and are handled one at a time, so no handler ever observes
//! another's half-applied effects. Provider and backend requests run on spawned tasks; their
//! outcomes come back tagged with the connect attempt or generation that issued them.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use shared::{
    domain::{Generation, JobId, NetworkId, WalletAddress},
    protocol::StatusEvent,
};
use tokio::{
    sync::{broadcast, mpsc, watch},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    backend::{HttpJobBackend, JobBackend},
    channel::{channel_for, StatusChannel},
    config::ClientSettings,
    error::MintError,
    orchestrator::{Applied, JobOrchestrator, JobSnapshot},
    wallet::{
        existing_authorization, request_connection, ConnectOutcome, ConnectionState,
        ProviderEvent, WalletProvider, WalletSession, WalletTransition,
    },
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    Connect,
    Disconnect,
    Submit { prompt: String },
    Shutdown,
}

enum Completion {
    Connect {
        attempt: u64,
        outcome: ConnectOutcome,
    },
    Restore {
        attempt: u64,
        outcome: ConnectOutcome,
    },
    ProviderRefreshed(ConnectOutcome),
    Submission {
        generation: Generation,
        outcome: Result<JobId, MintError>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletSnapshot {
    pub connection: ConnectionState,
    pub address: Option<WalletAddress>,
    pub network: Option<NetworkId>,
}

impl Default for WalletSnapshot {
    fn default() -> Self {
        Self {
            connection: ConnectionState::Disconnected,
            address: None,
            network: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionSnapshot {
    pub wallet: WalletSnapshot,
    pub job: JobSnapshot,
    /// Why the most recent user action was refused, if it was.
    pub notice: Option<MintError>,
}

impl SessionSnapshot {
    /// The one message to show, if any. A refused action outranks the job's own failure.
    pub fn message(&self) -> Option<String> {
        self.notice
            .as_ref()
            .or(self.job.error.as_ref())
            .map(MintError::user_message)
    }
}

/// Cloneable front door for the presentation layer.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<SessionCommand>,
    snapshot: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    pub fn send(&self, command: SessionCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| anyhow!("mint session has shut down"))
    }

    pub fn connect(&self) -> Result<()> {
        self.send(SessionCommand::Connect)
    }

    pub fn disconnect(&self) -> Result<()> {
        self.send(SessionCommand::Disconnect)
    }

    pub fn submit(&self, prompt: impl Into<String>) -> Result<()> {
        self.send(SessionCommand::Submit {
            prompt: prompt.into(),
        })
    }

    pub fn shutdown(&self) -> Result<()> {
        self.send(SessionCommand::Shutdown)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    pub async fn wait_for(
        &self,
        predicate: impl FnMut(&SessionSnapshot) -> bool,
    ) -> Result<SessionSnapshot> {
        let mut rx = self.snapshot.clone();
        let snapshot = rx
            .wait_for(predicate)
            .await
            .map_err(|_| anyhow!("mint session ended before the expected state"))?;
        Ok(snapshot.clone())
    }
}

pub struct MintSession {
    wallet: WalletSession,
    orchestrator: JobOrchestrator,
    backend: Arc<dyn JobBackend>,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions: mpsc::UnboundedReceiver<Completion>,
    statuses: mpsc::UnboundedReceiver<StatusEvent>,
    provider_events: broadcast::Receiver<ProviderEvent>,
    provider_open: bool,
    notice: Option<MintError>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
}

impl MintSession {
    pub fn new(
        provider: Arc<dyn WalletProvider>,
        backend: Arc<dyn JobBackend>,
        channel: Arc<dyn StatusChannel>,
        settings: Arc<ClientSettings>,
    ) -> (Self, SessionHandle) {
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (completions_tx, completions) = mpsc::unbounded_channel();
        let (status_tx, statuses) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::default());
        let provider_events = provider.subscribe_events();

        let session = Self {
            wallet: WalletSession::new(provider),
            orchestrator: JobOrchestrator::new(channel, status_tx, settings),
            backend,
            commands,
            completions_tx,
            completions,
            statuses,
            provider_events,
            provider_open: true,
            notice: None,
            snapshot_tx,
        };
        let handle = SessionHandle {
            commands: commands_tx,
            snapshot: snapshot_rx,
        };
        (session, handle)
    }

    /// Wires the HTTP backend and the configured status transport.
    pub fn from_settings(
        provider: Arc<dyn WalletProvider>,
        settings: ClientSettings,
    ) -> Result<(Self, SessionHandle), MintError> {
        let backend: Arc<dyn JobBackend> =
            Arc::new(HttpJobBackend::new(settings.parsed_backend_url()?));
        let channel = channel_for(&settings, Arc::clone(&backend))?;
        Ok(Self::new(provider, backend, channel, Arc::new(settings)))
    }

    pub fn wallet(&self) -> &WalletSession {
        &self.wallet
    }

    pub fn orchestrator(&self) -> &JobOrchestrator {
        &self.orchestrator
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        self.begin_restore();
        while self.step().await {}
        self.orchestrator.shutdown();
        self.publish();
        info!("session: shut down");
    }

    /// Handles exactly one input. Returns `false` once the session should stop.
    pub async fn step(&mut self) -> bool {
        let keep_running = tokio::select! {
            biased;
            Some(completion) = self.completions.recv() => {
                self.handle_completion(completion);
                true
            }
            event = self.provider_events.recv(), if self.provider_open => {
                self.handle_provider_event(event);
                true
            }
            Some(event) = self.statuses.recv() => {
                self.handle_status(event);
                true
            }
            command = self.commands.recv() => match command {
                Some(command) => self.handle_command(command),
                None => false,
            },
        };
        self.publish();
        keep_running
    }

    /// Silently adopts accounts the provider already authorized.
    pub fn begin_restore(&self) {
        let attempt = self.wallet.restore_attempt();
        let provider = self.wallet.provider();
        let completions = self.completions_tx.clone();
        tokio::spawn(async move {
            let outcome = existing_authorization(provider).await;
            let _ = completions.send(Completion::Restore { attempt, outcome });
        });
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let wallet = WalletSnapshot {
            connection: self.wallet.connection_state(),
            address: self.wallet.address().cloned(),
            network: self.wallet.network().cloned(),
        };
        SessionSnapshot {
            wallet,
            job: self.orchestrator.snapshot(),
            notice: self.notice.clone(),
        }
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.snapshot());
    }

    fn handle_command(&mut self, command: SessionCommand) -> bool {
        debug!(?command, "session: command");
        self.notice = None;
        match command {
            SessionCommand::Connect => {
                if let Some(attempt) = self.wallet.begin_connect() {
                    let provider = self.wallet.provider();
                    let completions = self.completions_tx.clone();
                    tokio::spawn(async move {
                        let outcome = request_connection(provider).await;
                        let _ = completions.send(Completion::Connect { attempt, outcome });
                    });
                }
            }
            SessionCommand::Disconnect => {
                let transition = self.wallet.disconnect();
                self.react(transition);
            }
            SessionCommand::Submit { prompt } => {
                match self.orchestrator.submit(&prompt, &self.wallet) {
                    Ok(ticket) => {
                        let backend = Arc::clone(&self.backend);
                        let completions = self.completions_tx.clone();
                        tokio::spawn(async move {
                            let outcome = backend.submit(ticket.request).await;
                            let _ = completions.send(Completion::Submission {
                                generation: ticket.generation,
                                outcome,
                            });
                        });
                    }
                    Err(err) => {
                        info!(error = %err, "session: submission refused");
                        self.notice = Some(err);
                    }
                }
            }
            SessionCommand::Shutdown => return false,
        }
        true
    }

    fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::Connect { attempt, outcome } => {
                let transition = self.wallet.finish_connect(attempt, outcome);
                self.react(transition);
            }
            Completion::Restore {
                attempt,
                outcome: Ok((accounts, network)),
            } => {
                let transition = self.wallet.restore(attempt, &accounts, &network);
                self.react(transition);
            }
            Completion::Restore { outcome: Err(err), .. } => {
                debug!(error = %err, "session: no existing wallet authorization");
            }
            Completion::ProviderRefreshed(Ok((accounts, network))) => {
                let transition = self.wallet.on_accounts_changed(&accounts);
                self.react(transition);
                let transition = self.wallet.on_network_changed(&network);
                self.react(transition);
            }
            Completion::ProviderRefreshed(Err(err)) => {
                warn!(error = %err, "session: provider refresh failed");
            }
            Completion::Submission {
                generation,
                outcome,
            } => {
                let applied = match outcome {
                    Ok(job_id) => self.orchestrator.on_submission_accepted(generation, job_id),
                    Err(err) => self.orchestrator.on_submission_failed(generation, err),
                };
                debug!(generation = generation.0, ?applied, "session: submission resolved");
            }
        }
    }

    fn handle_provider_event(&mut self, event: Result<ProviderEvent, broadcast::error::RecvError>) {
        match event {
            Ok(ProviderEvent::AccountsChanged(accounts)) => {
                let transition = self.wallet.on_accounts_changed(&accounts);
                self.react(transition);
            }
            Ok(ProviderEvent::NetworkChanged(network)) => {
                let transition = self.wallet.on_network_changed(&network);
                self.react(transition);
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed, "session: provider events lagged; re-reading accounts and network");
                let provider = self.wallet.provider();
                let completions = self.completions_tx.clone();
                tokio::spawn(async move {
                    let outcome = existing_authorization(provider).await;
                    let _ = completions.send(Completion::ProviderRefreshed(outcome));
                });
            }
            Err(broadcast::error::RecvError::Closed) => {
                debug!("session: provider event stream closed");
                self.provider_open = false;
            }
        }
    }

    fn handle_status(&mut self, event: StatusEvent) {
        let generation = event.generation;
        let stage = event.stage;
        match self.orchestrator.apply(event) {
            Applied::Stale | Applied::Ignored => {
                debug!(generation = generation.0, %stage, "session: status event dropped");
            }
            applied => debug!(generation = generation.0, ?applied, "session: status applied"),
        }
    }

    fn react(&mut self, transition: WalletTransition) {
        if let Some((previous, current)) = transition.invalidated_owner() {
            self.orchestrator.invalidate_owner(previous, current);
        }
        if let WalletTransition::ConnectFailed(err) = transition {
            self.notice = Some(err);
        }
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
