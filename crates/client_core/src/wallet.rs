//! Connection state for a browser-style wallet provider.
//!
//! The session never awaits the provider itself. `begin_connect` hands out an attempt number and
//! the caller resolves the provider round-trip elsewhere, feeding the outcome back through
//! `finish_connect`. Outcomes for superseded attempts are dropped.

use std::sync::Arc;

use async_trait::async_trait;
use shared::domain::{NetworkId, WalletAddress};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info};

use crate::error::MintError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    AccountsChanged(Vec<String>),
    NetworkChanged(String),
}

#[async_trait]
pub trait WalletProvider: Send + Sync {
    /// Prompts the user for account access.
    async fn request_accounts(&self) -> Result<Vec<String>, MintError>;
    /// Accounts already authorized for this origin, without prompting.
    async fn get_accounts(&self) -> Result<Vec<String>, MintError>;
    async fn get_network(&self) -> Result<String, MintError>;
    fn subscribe_events(&self) -> broadcast::Receiver<ProviderEvent>;
}

pub struct MissingWalletProvider {
    events: broadcast::Sender<ProviderEvent>,
}

impl MissingWalletProvider {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(1);
        Self { events }
    }
}

impl Default for MissingWalletProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WalletProvider for MissingWalletProvider {
    async fn request_accounts(&self) -> Result<Vec<String>, MintError> {
        Err(MintError::ProviderUnavailable)
    }

    async fn get_accounts(&self) -> Result<Vec<String>, MintError> {
        Err(MintError::ProviderUnavailable)
    }

    async fn get_network(&self) -> Result<String, MintError> {
        Err(MintError::ProviderUnavailable)
    }

    fn subscribe_events(&self) -> broadcast::Receiver<ProviderEvent> {
        self.events.subscribe()
    }
}

struct InjectedState {
    accounts: Vec<String>,
    network: String,
    authorized: bool,
    reject_requests: bool,
}

/// An in-process provider with a fixed account list, for headless use.
///
/// Mutations through `set_accounts` / `set_network` are pushed to subscribers exactly like a
/// browser extension would.
pub struct InjectedWalletProvider {
    state: Mutex<InjectedState>,
    events: broadcast::Sender<ProviderEvent>,
}

impl InjectedWalletProvider {
    pub fn new(accounts: Vec<String>, network: impl Into<String>) -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            state: Mutex::new(InjectedState {
                accounts,
                network: network.into(),
                authorized: false,
                reject_requests: false,
            }),
            events,
        })
    }

    /// Marks the origin as already authorized, so `get_accounts` reports accounts.
    pub async fn authorize(&self) {
        self.state.lock().await.authorized = true;
    }

    pub async fn reject_requests(&self, reject: bool) {
        self.state.lock().await.reject_requests = reject;
    }

    pub async fn set_accounts(&self, accounts: Vec<String>) {
        self.state.lock().await.accounts = accounts.clone();
        let _ = self.events.send(ProviderEvent::AccountsChanged(accounts));
    }

    pub async fn set_network(&self, network: impl Into<String>) {
        let network = network.into();
        self.state.lock().await.network = network.clone();
        let _ = self.events.send(ProviderEvent::NetworkChanged(network));
    }
}

#[async_trait]
impl WalletProvider for InjectedWalletProvider {
    async fn request_accounts(&self) -> Result<Vec<String>, MintError> {
        let mut guard = self.state.lock().await;
        if guard.reject_requests {
            return Err(MintError::UserRejected);
        }
        guard.authorized = true;
        Ok(guard.accounts.clone())
    }

    async fn get_accounts(&self) -> Result<Vec<String>, MintError> {
        let guard = self.state.lock().await;
        if guard.authorized {
            Ok(guard.accounts.clone())
        } else {
            Ok(Vec::new())
        }
    }

    async fn get_network(&self) -> Result<String, MintError> {
        Ok(self.state.lock().await.network.clone())
    }

    fn subscribe_events(&self) -> broadcast::Receiver<ProviderEvent> {
        self.events.subscribe()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletState {
    Disconnected,
    Connecting,
    Connected {
        address: WalletAddress,
        network: NetworkId,
    },
}

/// How a wallet mutation affected the account that owns in-flight jobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletTransition {
    Unchanged,
    Connected(WalletAddress),
    AddressChanged {
        previous: WalletAddress,
        current: WalletAddress,
    },
    NetworkChanged(NetworkId),
    Disconnected {
        previous: Option<WalletAddress>,
    },
    ConnectFailed(MintError),
}

impl WalletTransition {
    /// The address whose jobs must be cancelled, if any.
    pub fn invalidated_owner(&self) -> Option<(&WalletAddress, Option<&WalletAddress>)> {
        match self {
            WalletTransition::AddressChanged { previous, current } => Some((previous, Some(current))),
            WalletTransition::Disconnected {
                previous: Some(previous),
            } => Some((previous, None)),
            _ => None,
        }
    }
}

/// Outcome of one provider round-trip started by `begin_connect`.
pub type ConnectOutcome = Result<(Vec<String>, String), MintError>;

pub struct WalletSession {
    provider: Arc<dyn WalletProvider>,
    state: WalletState,
    attempt: u64,
}

impl WalletSession {
    pub fn new(provider: Arc<dyn WalletProvider>) -> Self {
        Self {
            provider,
            state: WalletState::Disconnected,
            attempt: 0,
        }
    }

    pub fn provider(&self) -> Arc<dyn WalletProvider> {
        Arc::clone(&self.provider)
    }

    pub fn state(&self) -> &WalletState {
        &self.state
    }

    pub fn connection_state(&self) -> ConnectionState {
        match self.state {
            WalletState::Disconnected => ConnectionState::Disconnected,
            WalletState::Connecting => ConnectionState::Connecting,
            WalletState::Connected { .. } => ConnectionState::Connected,
        }
    }

    pub fn address(&self) -> Option<&WalletAddress> {
        match &self.state {
            WalletState::Connected { address, .. } => Some(address),
            _ => None,
        }
    }

    pub fn network(&self) -> Option<&NetworkId> {
        match &self.state {
            WalletState::Connected { network, .. } => Some(network),
            _ => None,
        }
    }

    /// Starts a connect attempt. Returns `None` while already connecting or connected.
    pub fn begin_connect(&mut self) -> Option<u64> {
        if !matches!(self.state, WalletState::Disconnected) {
            debug!(state = ?self.connection_state(), "wallet: connect ignored");
            return None;
        }
        self.attempt += 1;
        self.state = WalletState::Connecting;
        info!(attempt = self.attempt, "wallet: connecting");
        Some(self.attempt)
    }

    pub fn finish_connect(&mut self, attempt: u64, outcome: ConnectOutcome) -> WalletTransition {
        if attempt != self.attempt || !matches!(self.state, WalletState::Connecting) {
            debug!(attempt, current = self.attempt, "wallet: dropping stale connect outcome");
            return WalletTransition::Unchanged;
        }
        let connected = outcome.and_then(|(accounts, network)| {
            let first = accounts.first().ok_or(MintError::UserRejected)?;
            Ok((WalletAddress::parse(first)?, NetworkId::new(&network)))
        });
        match connected {
            Ok((address, network)) => {
                info!(address = %address, network = %network, "wallet: connected");
                self.state = WalletState::Connected {
                    address: address.clone(),
                    network,
                };
                WalletTransition::Connected(address)
            }
            Err(err) => {
                info!(error = %err, "wallet: connect failed");
                self.state = WalletState::Disconnected;
                WalletTransition::ConnectFailed(err)
            }
        }
    }

    /// Tag for a silent restore. Any connect or disconnect after this call makes it stale.
    pub fn restore_attempt(&self) -> u64 {
        self.attempt
    }

    /// Adopts accounts the provider already authorized, without prompting the user.
    pub fn restore(
        &mut self,
        attempt: u64,
        accounts: &[String],
        network: &str,
    ) -> WalletTransition {
        if attempt != self.attempt || !matches!(self.state, WalletState::Disconnected) {
            debug!(attempt, current = self.attempt, "wallet: dropping stale restore");
            return WalletTransition::Unchanged;
        }
        let Some(first) = accounts.first() else {
            return WalletTransition::Unchanged;
        };
        match WalletAddress::parse(first) {
            Ok(address) => {
                let network = NetworkId::new(network);
                info!(address = %address, network = %network, "wallet: restored existing authorization");
                self.state = WalletState::Connected {
                    address: address.clone(),
                    network,
                };
                WalletTransition::Connected(address)
            }
            Err(err) => WalletTransition::ConnectFailed(err.into()),
        }
    }

    /// Clears local state; wallets offer no provider-side revoke.
    pub fn disconnect(&mut self) -> WalletTransition {
        let previous = self.address().cloned();
        // Invalidates any pending connect or restore round-trip.
        self.attempt += 1;
        if matches!(self.state, WalletState::Disconnected) {
            return WalletTransition::Unchanged;
        }
        self.state = WalletState::Disconnected;
        info!(previous = ?previous.as_ref().map(WalletAddress::as_str), "wallet: disconnected");
        WalletTransition::Disconnected { previous }
    }

    pub fn on_accounts_changed(&mut self, accounts: &[String]) -> WalletTransition {
        let Some(first) = accounts.first() else {
            return self.disconnect();
        };
        let (previous, network) = match &self.state {
            WalletState::Connected { address, network } => (address.clone(), network.clone()),
            _ => {
                debug!("wallet: accounts changed while not connected; ignoring");
                return WalletTransition::Unchanged;
            }
        };
        let current = match WalletAddress::parse(first) {
            Ok(current) => current,
            Err(err) => {
                // An account we cannot mint to is no account at all.
                let transition = self.disconnect();
                info!(error = %err, "wallet: provider switched to malformed account");
                return transition;
            }
        };
        if current == previous {
            return WalletTransition::Unchanged;
        }
        info!(previous = %previous, current = %current, "wallet: account changed");
        self.state = WalletState::Connected {
            address: current.clone(),
            network,
        };
        WalletTransition::AddressChanged { previous, current }
    }

    pub fn on_network_changed(&mut self, raw: &str) -> WalletTransition {
        let WalletState::Connected { network, .. } = &mut self.state else {
            return WalletTransition::Unchanged;
        };
        let next = NetworkId::new(raw);
        if *network == next {
            return WalletTransition::Unchanged;
        }
        info!(previous = %network, current = %next, "wallet: network changed");
        *network = next.clone();
        WalletTransition::NetworkChanged(next)
    }
}

/// Performs the provider round-trip for a connect attempt.
pub async fn request_connection(provider: Arc<dyn WalletProvider>) -> ConnectOutcome {
    let accounts = provider.request_accounts().await?;
    let network = provider.get_network().await?;
    Ok((accounts, network))
}

/// Reads accounts the provider already authorized for this origin, without prompting.
pub async fn existing_authorization(provider: Arc<dyn WalletProvider>) -> ConnectOutcome {
    let accounts = provider.get_accounts().await?;
    let network = provider.get_network().await?;
    Ok((accounts, network))
}

#[cfg(test)]
#[path = "tests/wallet_tests.rs"]
mod tests;
