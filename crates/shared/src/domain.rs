use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifies the currently active job within one session. Bumped on every new submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Generation(pub u64);

impl Generation {
    pub const ZERO: Generation = Generation(0);

    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("wallet address must start with 0x: {0}")]
    MissingPrefix(String),
    #[error("wallet address must have 40 hex digits, got {0}")]
    WrongLength(usize),
    #[error("wallet address contains non-hex characters: {0}")]
    NotHex(String),
}

/// An EVM account address, always stored lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WalletAddress(String);

impl WalletAddress {
    pub fn parse(raw: &str) -> Result<Self, AddressError> {
        let raw = raw.trim();
        let digits = raw
            .strip_prefix("0x")
            .or_else(|| raw.strip_prefix("0X"))
            .ok_or_else(|| AddressError::MissingPrefix(raw.to_string()))?;
        if digits.len() != 40 {
            return Err(AddressError::WrongLength(digits.len()));
        }
        if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(AddressError::NotHex(raw.to_string()));
        }
        Ok(Self(format!("0x{}", digits.to_ascii_lowercase())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `0x1234...abcd`, for display next to a connect button.
    pub fn short(&self) -> String {
        format!("{}...{}", &self.0[..6], &self.0[self.0.len() - 4..])
    }
}

impl TryFrom<String> for WalletAddress {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<WalletAddress> for String {
    fn from(value: WalletAddress) -> Self {
        value.0
    }
}

impl fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Chain id as reported by the wallet provider, normalized to lowercase hex (`0x1`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct NetworkId(String);

pub const MAINNET: &str = "0x1";
pub const SEPOLIA: &str = "0xaa36a7";
pub const HARDHAT_LOCAL: &str = "0x7a69";

impl NetworkId {
    pub fn new(raw: &str) -> Self {
        let raw = raw.trim();
        let lower = raw.to_ascii_lowercase();
        if lower.starts_with("0x") {
            let digits = lower[2..].trim_start_matches('0');
            if digits.is_empty() {
                return Self("0x0".to_string());
            }
            return Self(format!("0x{digits}"));
        }
        match lower.parse::<u64>() {
            Ok(decimal) => Self(format!("{decimal:#x}")),
            Err(_) => Self(lower),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Block explorer link for a transaction; local development chains have none.
    pub fn explorer_tx_url(&self, transaction_hash: &str) -> Option<String> {
        let base = match self.0.as_str() {
            MAINNET => "https://etherscan.io",
            SEPOLIA => "https://sepolia.etherscan.io",
            _ => return None,
        };
        Some(format!("{base}/tx/{transaction_hash}"))
    }
}

impl From<String> for NetworkId {
    fn from(value: String) -> Self {
        Self::new(&value)
    }
}

impl From<NetworkId> for String {
    fn from(value: NetworkId) -> Self {
        value.0
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStage {
    #[default]
    Idle,
    Submitting,
    #[serde(alias = "pending", alias = "processing")]
    Generating,
    #[serde(alias = "pinning")]
    Minting,
    Completed,
    Failed,
}

impl JobStage {
    /// Position in the progress lattice. `Failed` is absorbing and ranks above everything.
    pub fn rank(self) -> u8 {
        match self {
            JobStage::Idle => 0,
            JobStage::Submitting => 1,
            JobStage::Generating => 2,
            JobStage::Minting => 3,
            JobStage::Completed => 4,
            JobStage::Failed => 5,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStage::Completed | JobStage::Failed)
    }

    pub fn is_in_flight(self) -> bool {
        matches!(
            self,
            JobStage::Submitting | JobStage::Generating | JobStage::Minting
        )
    }
}

impl fmt::Display for JobStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            JobStage::Idle => "idle",
            JobStage::Submitting => "submitting",
            JobStage::Generating => "generating",
            JobStage::Minting => "minting",
            JobStage::Completed => "completed",
            JobStage::Failed => "failed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<String>,
}

impl PartialResult {
    pub fn is_empty(&self) -> bool {
        self.image_url.is_none() && self.metadata_url.is_none() && self.transaction_hash.is_none()
    }

    /// Fills fields that are still unknown. Known fields are never overwritten.
    pub fn merge(&mut self, other: &PartialResult) {
        if self.image_url.is_none() {
            self.image_url.clone_from(&other.image_url);
        }
        if self.metadata_url.is_none() {
            self.metadata_url.clone_from(&other.metadata_url);
        }
        if self.transaction_hash.is_none() {
            self.transaction_hash.clone_from(&other.transaction_hash);
        }
    }

    pub fn complete(&self) -> Option<MintResult> {
        Some(MintResult {
            image_url: self.image_url.clone()?,
            metadata_url: self.metadata_url.clone()?,
            transaction_hash: self.transaction_hash.clone()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MintResult {
    pub image_url: String,
    pub metadata_url: String,
    pub transaction_hash: String,
}

#[cfg(test)]
#[path = "tests/domain_tests.rs"]
mod tests;
