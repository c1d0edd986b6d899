use shared::domain::{AddressError, NetworkId, WalletAddress};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MintError {
    #[error("no wallet provider is available")]
    ProviderUnavailable,
    #[error("wallet request was rejected by the user")]
    UserRejected,
    #[error("wallet provider returned a malformed address: {0}")]
    MalformedAddress(#[from] AddressError),
    #[error("network {network} is not supported")]
    NetworkUnsupported { network: NetworkId },
    #[error("wallet is not connected")]
    WalletDisconnected,
    #[error("invalid prompt: {0}")]
    InvalidPrompt(String),
    #[error("submission rejected: {reason}")]
    SubmissionRejected { reason: String },
    #[error("transport error: {message}")]
    Transport { message: String },
    #[error("wallet owner changed from {previous}")]
    OwnerChanged {
        previous: WalletAddress,
        current: Option<WalletAddress>,
    },
    #[error("backend failed: {reason}")]
    BackendFailed { reason: String },
}

impl MintError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Whether re-submitting the same prompt is a sensible next step.
    pub fn is_retryable(&self) -> bool {
        matches!(self, MintError::Transport { .. } | MintError::OwnerChanged { .. })
    }

    /// The single line shown to the user for this error.
    pub fn user_message(&self) -> String {
        match self {
            MintError::ProviderUnavailable => {
                "No wallet found. Install a browser wallet such as MetaMask to continue.".to_string()
            }
            MintError::UserRejected => "Wallet connection was declined.".to_string(),
            MintError::MalformedAddress(_) => {
                "Wallet returned an account this app cannot use.".to_string()
            }
            MintError::NetworkUnsupported { network } => {
                format!("Network {network} is not supported; switch networks and retry.")
            }
            MintError::WalletDisconnected => "Connect your wallet before generating.".to_string(),
            MintError::InvalidPrompt(reason) => format!("Prompt rejected: {reason}."),
            MintError::SubmissionRejected { reason } => {
                format!("The generator refused this prompt: {reason}")
            }
            MintError::Transport { .. } => {
                "Lost contact with the generator. Please try again.".to_string()
            }
            MintError::OwnerChanged { previous, .. } => format!(
                "Wallet account changed from {}; the job was cancelled before minting.",
                previous.short()
            ),
            MintError::BackendFailed { reason } => format!("Failed to mint NFT: {reason}"),
        }
    }
}
