use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use client_core::{
    load_settings, ConnectionState, InjectedWalletProvider, MintSession, SessionHandle,
    SessionSnapshot, TransportKind,
};
use shared::domain::{JobStage, MintResult, NetworkId, HARDHAT_LOCAL};
use tracing::info;
use tracing_subscriber::EnvFilter;
use url::Url;

/// Generate an image from a prompt and mint it as an NFT to the given account.
#[derive(Parser, Debug)]
#[command(name = "mint")]
struct Args {
    /// Generation/mint backend; overrides `mint-client.toml` and `MINT_BACKEND_URL`.
    #[arg(long)]
    backend_url: Option<Url>,
    /// Account that receives the NFT.
    #[arg(long)]
    address: String,
    #[arg(long, default_value = HARDHAT_LOCAL)]
    network: String,
    #[arg(long, value_parser = parse_transport)]
    transport: Option<TransportKind>,
    #[arg(long)]
    poll_interval_ms: Option<u64>,
    prompt: String,
}

fn parse_transport(raw: &str) -> Result<TransportKind, String> {
    TransportKind::parse(raw).ok_or_else(|| format!("unknown transport '{raw}'; use poll or push"))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    let mut settings = load_settings();
    if let Some(url) = args.backend_url {
        settings.backend_url = url.to_string();
    }
    if let Some(transport) = args.transport {
        settings.transport = transport;
    }
    if let Some(millis) = args.poll_interval_ms.filter(|millis| *millis > 0) {
        settings.poll_interval = Duration::from_millis(millis);
    }
    info!(backend = %settings.backend_url, transport = ?settings.transport, "cli: starting session");

    let provider = InjectedWalletProvider::new(vec![args.address], args.network);
    let (session, handle) =
        MintSession::from_settings(provider, settings).context("failed to set up mint session")?;
    let task = session.spawn();

    let outcome = tokio::select! {
        outcome = mint(&handle, args.prompt) => outcome,
        _ = tokio::signal::ctrl_c() => Err(anyhow::anyhow!("interrupted")),
    };

    let _ = handle.shutdown();
    let _ = task.await;

    let snapshot = outcome?;
    for line in completion_lines(&snapshot) {
        println!("{line}");
    }
    Ok(())
}

async fn mint(handle: &SessionHandle, prompt: String) -> Result<SessionSnapshot> {
    handle.connect()?;
    let connected = handle
        .wait_for(|s| s.wallet.connection == ConnectionState::Connected || s.notice.is_some())
        .await?;
    if let Some(message) = connected.message() {
        bail!(message);
    }
    if let (Some(address), Some(network)) = (&connected.wallet.address, &connected.wallet.network)
    {
        println!("Wallet connected: {} on {network}", address.short());
    }

    let mut updates = handle.subscribe();
    handle.submit(prompt)?;
    let mut last_stage = JobStage::Idle;
    loop {
        updates
            .changed()
            .await
            .context("mint session ended before the job finished")?;
        let snapshot = updates.borrow_and_update().clone();
        if let Some(notice) = &snapshot.notice {
            bail!(notice.user_message());
        }
        if snapshot.job.stage != last_stage {
            last_stage = snapshot.job.stage;
            if let Some(line) = stage_line(last_stage) {
                println!("{line}");
            }
        }
        match snapshot.job.stage {
            JobStage::Completed => return Ok(snapshot),
            JobStage::Failed => {
                let message = snapshot
                    .message()
                    .unwrap_or_else(|| "Failed to mint NFT.".to_string());
                if snapshot.job.retryable() {
                    bail!("{message} (retrying may succeed)");
                }
                bail!(message);
            }
            _ => {}
        }
    }
}

fn stage_line(stage: JobStage) -> Option<&'static str> {
    match stage {
        JobStage::Submitting => Some("Submitting prompt..."),
        JobStage::Generating => Some("Generating your artwork..."),
        JobStage::Minting => Some("Minting as an NFT..."),
        JobStage::Completed => Some("Successfully minted as an NFT!"),
        JobStage::Idle | JobStage::Failed => None,
    }
}

fn completion_lines(snapshot: &SessionSnapshot) -> Vec<String> {
    let Some(result) = &snapshot.job.result else {
        return Vec::new();
    };
    result_lines(result, snapshot.wallet.network.as_ref())
}

fn result_lines(result: &MintResult, network: Option<&NetworkId>) -> Vec<String> {
    let mut lines = vec![
        format!("Image:       {}", result.image_url),
        format!("Metadata:    {}", result.metadata_url),
        format!("Transaction: {}", result.transaction_hash),
    ];
    match network.and_then(|n| n.explorer_tx_url(&result.transaction_hash)) {
        Some(link) => lines.push(format!("Explorer:    {link}")),
        None => lines.push(
            "Local development chain; the transaction has no public explorer page.".to_string(),
        ),
    }
    lines
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
