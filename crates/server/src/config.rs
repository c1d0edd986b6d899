use std::{collections::HashMap, fs, path::Path, time::Duration};

use serde::Deserialize;
use tracing::warn;

pub const DEFAULT_CONFIG_FILE: &str = "mint-server.toml";
pub const DEFAULT_JOB_RETENTION: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone)]
pub struct Settings {
    pub bind_addr: String,
    /// Delay between pipeline stages of the simulated generator.
    pub stage_delay: Duration,
    pub ipfs_gateway: String,
    /// Prompts containing any of these (case-insensitive) are refused with a content error.
    pub blocked_terms: Vec<String>,
    /// Prompts containing any of these are accepted but fail during generation.
    pub failing_terms: Vec<String>,
    /// How long a finished job stays queryable before it is evicted.
    pub job_retention: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8000".into(),
            stage_delay: Duration::from_millis(1500),
            ipfs_gateway: "https://ipfs.io/ipfs".into(),
            blocked_terms: Vec::new(),
            failing_terms: Vec::new(),
            job_retention: DEFAULT_JOB_RETENTION,
        }
    }
}

impl Settings {
    pub fn is_blocked(&self, prompt: &str) -> bool {
        contains_any(prompt, &self.blocked_terms)
    }

    pub fn should_fail(&self, prompt: &str) -> bool {
        contains_any(prompt, &self.failing_terms)
    }
}

fn contains_any(prompt: &str, terms: &[String]) -> bool {
    let prompt = prompt.to_lowercase();
    terms.iter().any(|term| prompt.contains(term.as_str()))
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    bind_addr: Option<String>,
    stage_delay_ms: Option<u64>,
    ipfs_gateway: Option<String>,
    blocked_terms: Option<Vec<String>>,
    failing_terms: Option<Vec<String>>,
    job_retention_secs: Option<u64>,
}

pub fn load_settings() -> Settings {
    let mut settings = Settings::default();
    apply_file(&mut settings, Path::new(DEFAULT_CONFIG_FILE));
    let env: HashMap<String, String> = std::env::vars().collect();
    apply_env(&mut settings, &env);
    settings
}

pub fn apply_file(settings: &mut Settings, path: &Path) {
    let Ok(raw) = fs::read_to_string(path) else {
        return;
    };
    let file_cfg = match toml::from_str::<FileSettings>(&raw) {
        Ok(file_cfg) => file_cfg,
        Err(error) => {
            warn!(path = %path.display(), %error, "config: ignoring unreadable settings file");
            return;
        }
    };
    if let Some(v) = file_cfg.bind_addr {
        settings.bind_addr = v;
    }
    if let Some(v) = file_cfg.stage_delay_ms {
        settings.stage_delay = Duration::from_millis(v);
    }
    if let Some(v) = file_cfg.ipfs_gateway {
        settings.ipfs_gateway = trim_gateway(&v);
    }
    if let Some(v) = file_cfg.blocked_terms {
        settings.blocked_terms = normalize_terms(v.iter().map(String::as_str));
    }
    if let Some(v) = file_cfg.failing_terms {
        settings.failing_terms = normalize_terms(v.iter().map(String::as_str));
    }
    if let Some(v) = file_cfg.job_retention_secs {
        settings.job_retention = Duration::from_secs(v);
    }
}

/// `APP__*` names win over the bare spellings when both are set.
pub fn apply_env(settings: &mut Settings, env: &HashMap<String, String>) {
    let lookup = |primary: &str, fallback: &str| env.get(primary).or_else(|| env.get(fallback));

    if let Some(v) = lookup("APP__BIND_ADDR", "SERVER_BIND") {
        settings.bind_addr = v.clone();
    }
    if let Some(v) = lookup("APP__STAGE_DELAY_MS", "STAGE_DELAY_MS") {
        match v.parse::<u64>() {
            Ok(parsed) => settings.stage_delay = Duration::from_millis(parsed),
            Err(_) => warn!(value = %v, "config: ignoring non-numeric stage delay"),
        }
    }
    if let Some(v) = lookup("APP__IPFS_GATEWAY", "IPFS_GATEWAY") {
        settings.ipfs_gateway = trim_gateway(v);
    }
    if let Some(v) = lookup("APP__BLOCKED_TERMS", "BLOCKED_TERMS") {
        settings.blocked_terms = normalize_terms(v.split(','));
    }
    if let Some(v) = lookup("APP__FAILING_TERMS", "FAILING_TERMS") {
        settings.failing_terms = normalize_terms(v.split(','));
    }
    if let Some(v) = lookup("APP__JOB_RETENTION_SECS", "JOB_RETENTION_SECS") {
        match v.parse::<u64>() {
            Ok(parsed) => settings.job_retention = Duration::from_secs(parsed),
            Err(_) => warn!(value = %v, "config: ignoring non-numeric job retention"),
        }
    }
}

fn trim_gateway(raw: &str) -> String {
    raw.trim().trim_end_matches('/').to_string()
}

fn normalize_terms<'a>(raw: impl Iterator<Item = &'a str>) -> Vec<String> {
    raw.map(|term| term.trim().to_lowercase())
        .filter(|term| !term.is_empty())
        .collect()
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
