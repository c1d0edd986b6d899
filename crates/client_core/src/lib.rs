//! Client side of prompt-to-NFT minting: wallet session, job orchestration and status delivery.

pub mod backend;
pub mod channel;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod session;
pub mod wallet;

pub use backend::{HttpJobBackend, JobBackend};
pub use channel::{
    channel_for, PollingChannel, PushChannel, ReleaseHandle, StatusChannel, StatusSink,
    Subscription,
};
pub use config::{load_settings, ClientSettings, TransportKind};
pub use error::MintError;
pub use orchestrator::{Applied, Job, JobOrchestrator, JobSnapshot, SubmissionTicket};
pub use session::{MintSession, SessionCommand, SessionHandle, SessionSnapshot, WalletSnapshot};
pub use wallet::{
    ConnectionState, InjectedWalletProvider, MissingWalletProvider, ProviderEvent,
    WalletProvider, WalletSession, WalletState, WalletTransition,
};

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;
