use std::{sync::Arc, time::Duration};

use anyhow::{bail, Context, Result};
use chain_rpc::{RpcClient, RpcVaultBackend};
use clap::Parser;
use shared::domain::parse_account;
use storage::LocalStore;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};
use url::Url;
use vault_core::{
    config::{load_settings, log_directive, prepare_database_url, Settings},
    watchtower::{
        is_placeholder_email, missing_settings, resolve_beneficiary_email, LogNotifier, Notifier,
        Watchtower,
    },
    VaultHandle,
};

mod notifier;

use notifier::WebhookNotifier;

#[derive(Parser, Debug)]
#[command(about = "Watches a vault and alerts the beneficiary once its timer lapses")]
struct Cli {
    /// Beneficiary email; overrides BENEFICIARY_EMAIL and the stored value.
    #[arg(long)]
    email: Option<String>,
    #[arg(long)]
    rpc_url: Option<String>,
    #[arg(long)]
    contract: Option<String>,
    /// Inactivity window in seconds.
    #[arg(long)]
    timeout: Option<u64>,
    #[arg(long)]
    webhook_url: Option<String>,
    /// Log the alert instead of posting it.
    #[arg(long)]
    log_only: bool,
}

fn apply_cli(mut settings: Settings, cli: &Cli) -> Settings {
    if let Some(v) = &cli.rpc_url {
        settings.rpc_url = Some(v.clone());
    }
    if let Some(v) = &cli.contract {
        settings.contract_address = Some(v.clone());
    }
    if let Some(v) = cli.timeout {
        settings.timeout_secs = v;
    }
    if let Some(v) = &cli.webhook_url {
        settings.webhook_url = Some(v.clone());
    }
    settings
}

async fn prompt_email() -> Result<String> {
    let mut stdout = tokio::io::stdout();
    stdout
        .write_all(b"Beneficiary email not configured. Enter beneficiary email: ")
        .await?;
    stdout.flush().await?;
    let mut line = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await?;
    Ok(line.trim().to_string())
}

async fn beneficiary_email(cli: &Cli, settings: &Settings, store: &LocalStore) -> Result<String> {
    let stored = store.load_beneficiary_email().await?;
    if let Some(email) = resolve_beneficiary_email(
        cli.email.as_deref(),
        settings.beneficiary_email.as_deref(),
        stored.as_deref(),
    ) {
        return Ok(email);
    }

    let entered = prompt_email().await?;
    if is_placeholder_email(&entered) {
        bail!("a beneficiary email is required");
    }
    store.save_beneficiary_email(&entered).await?;
    Ok(entered)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(log_directive()).init();
    let cli = Cli::parse();
    let settings = apply_cli(load_settings(), &cli);

    let mut missing = missing_settings(&settings);
    if cli.log_only {
        missing.retain(|name| *name != "WEBHOOK_URL");
    }
    if !missing.is_empty() {
        bail!("missing required settings: {}", missing.join(", "));
    }

    let store = LocalStore::new(&prepare_database_url(&settings.database_url)?).await?;
    let email = beneficiary_email(&cli, &settings, &store).await?;

    let endpoint = settings.rpc_endpoint()?.context("RPC_URL is required")?;
    let raw_contract = settings.contract_address.as_deref().unwrap_or_default();
    let contract = parse_account(raw_contract)
        .with_context(|| format!("invalid contract address '{raw_contract}'"))?;
    let backend = RpcVaultBackend::new(Arc::new(RpcClient::new(endpoint)));
    let handle = VaultHandle::new(contract, Arc::new(backend));

    let notifier: Arc<dyn Notifier> = match settings.webhook_url.as_deref() {
        Some(raw) if !cli.log_only => {
            let url = Url::parse(raw).with_context(|| format!("invalid webhook url '{raw}'"))?;
            Arc::new(WebhookNotifier::new(url))
        }
        _ => {
            warn!("watchtower: alerts go to the log only");
            Arc::new(LogNotifier)
        }
    };

    info!(vault = %contract, to = %email, timeout_secs = settings.timeout_secs, "watchtower: starting");
    Watchtower::new(
        handle,
        email,
        settings.timeout_secs,
        Duration::from_secs(settings.poll_interval_secs.max(1)),
        notifier,
    )
    .run()
    .await
}
