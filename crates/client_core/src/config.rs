use std::{collections::HashMap, fs, path::Path, time::Duration};

use serde::Deserialize;
use shared::domain::{NetworkId, HARDHAT_LOCAL, MAINNET, SEPOLIA};
use tracing::warn;
use url::Url;

use crate::error::MintError;

pub const DEFAULT_CONFIG_FILE: &str = "mint-client.toml";
pub const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:8000/";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_PUSH_RECONNECT_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_PUSH_MAX_RECONNECTS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    Poll,
    Push,
}

impl TransportKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "poll" | "polling" => Some(Self::Poll),
            "push" | "ws" | "websocket" => Some(Self::Push),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// Validated when loaded from file or env; parsed again by `parsed_backend_url`.
    pub backend_url: String,
    pub transport: TransportKind,
    pub poll_interval: Duration,
    pub push_reconnect_delay: Duration,
    pub push_max_reconnects: u32,
    pub supported_networks: Vec<NetworkId>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            transport: TransportKind::Poll,
            poll_interval: DEFAULT_POLL_INTERVAL,
            push_reconnect_delay: DEFAULT_PUSH_RECONNECT_DELAY,
            push_max_reconnects: DEFAULT_PUSH_MAX_RECONNECTS,
            supported_networks: vec![
                NetworkId::new(MAINNET),
                NetworkId::new(SEPOLIA),
                NetworkId::new(HARDHAT_LOCAL),
            ],
        }
    }
}

impl ClientSettings {
    pub fn parsed_backend_url(&self) -> Result<Url, MintError> {
        parse_backend_url(&self.backend_url)
    }

    pub fn supports(&self, network: &NetworkId) -> bool {
        self.supported_networks.iter().any(|n| n == network)
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    backend_url: Option<String>,
    transport: Option<String>,
    poll_interval_ms: Option<u64>,
    push_reconnect_delay_ms: Option<u64>,
    push_max_reconnects: Option<u32>,
    supported_networks: Option<Vec<String>>,
}

pub fn load_settings() -> ClientSettings {
    let mut settings = ClientSettings::default();
    apply_file(&mut settings, Path::new(DEFAULT_CONFIG_FILE));
    let env: HashMap<String, String> = std::env::vars().collect();
    apply_env(&mut settings, &env);
    settings
}

pub fn apply_file(settings: &mut ClientSettings, path: &Path) {
    let Ok(raw) = fs::read_to_string(path) else {
        return;
    };
    match toml::from_str::<FileSettings>(&raw) {
        Ok(file_cfg) => apply_file_settings(settings, file_cfg),
        Err(error) => warn!(path = %path.display(), %error, "config: ignoring unreadable settings file"),
    }
}

fn apply_file_settings(settings: &mut ClientSettings, file_cfg: FileSettings) {
    if let Some(v) = file_cfg.backend_url {
        set_backend_url(settings, &v);
    }
    if let Some(v) = file_cfg.transport {
        set_transport(settings, &v);
    }
    if let Some(v) = file_cfg.poll_interval_ms {
        set_poll_interval(settings, v);
    }
    if let Some(v) = file_cfg.push_reconnect_delay_ms {
        settings.push_reconnect_delay = Duration::from_millis(v);
    }
    if let Some(v) = file_cfg.push_max_reconnects {
        settings.push_max_reconnects = v;
    }
    if let Some(v) = file_cfg.supported_networks {
        set_networks(settings, v.iter().map(String::as_str));
    }
}

/// `MINT_*` names win over the `APP__*` spellings when both are set.
pub fn apply_env(settings: &mut ClientSettings, env: &HashMap<String, String>) {
    let lookup = |primary: &str, fallback: &str| env.get(primary).or_else(|| env.get(fallback));

    if let Some(v) = lookup("MINT_BACKEND_URL", "APP__BACKEND_URL") {
        set_backend_url(settings, v);
    }
    if let Some(v) = lookup("MINT_TRANSPORT", "APP__TRANSPORT") {
        set_transport(settings, v);
    }
    if let Some(v) = lookup("MINT_POLL_INTERVAL_MS", "APP__POLL_INTERVAL_MS") {
        match v.parse::<u64>() {
            Ok(parsed) => set_poll_interval(settings, parsed),
            Err(_) => warn!(value = %v, "config: ignoring non-numeric poll interval"),
        }
    }
    if let Some(v) = lookup("MINT_PUSH_RECONNECT_DELAY_MS", "APP__PUSH_RECONNECT_DELAY_MS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.push_reconnect_delay = Duration::from_millis(parsed);
        }
    }
    if let Some(v) = lookup("MINT_PUSH_MAX_RECONNECTS", "APP__PUSH_MAX_RECONNECTS") {
        if let Ok(parsed) = v.parse::<u32>() {
            settings.push_max_reconnects = parsed;
        }
    }
    if let Some(v) = lookup("MINT_SUPPORTED_NETWORKS", "APP__SUPPORTED_NETWORKS") {
        set_networks(settings, v.split(','));
    }
}

fn parse_backend_url(raw: &str) -> Result<Url, MintError> {
    match Url::parse(raw.trim()) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(url),
        Ok(url) => Err(MintError::transport(format!(
            "backend url must be http(s), got {}://",
            url.scheme()
        ))),
        Err(err) => Err(MintError::transport(format!("invalid backend url {raw:?}: {err}"))),
    }
}

fn set_backend_url(settings: &mut ClientSettings, raw: &str) {
    match parse_backend_url(raw) {
        Ok(url) => settings.backend_url = url.to_string(),
        Err(error) => warn!(value = %raw, %error, "config: keeping default backend url"),
    }
}

fn set_transport(settings: &mut ClientSettings, raw: &str) {
    match TransportKind::parse(raw) {
        Some(kind) => settings.transport = kind,
        None => warn!(value = %raw, "config: unknown transport; keeping default"),
    }
}

fn set_poll_interval(settings: &mut ClientSettings, millis: u64) {
    if millis == 0 {
        warn!("config: poll interval must be positive; keeping default");
        return;
    }
    settings.poll_interval = Duration::from_millis(millis);
}

fn set_networks<'a>(settings: &mut ClientSettings, raw: impl Iterator<Item = &'a str>) {
    let networks: Vec<NetworkId> = raw
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(NetworkId::new)
        .collect();
    if networks.is_empty() {
        warn!("config: empty supported network list; keeping default");
        return;
    }
    settings.supported_networks = networks;
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
