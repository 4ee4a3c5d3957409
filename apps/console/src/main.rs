use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use chain_rpc::{RpcClient, RpcVaultBackend, RpcWallet};
use clap::Parser;
use shared::{domain::parse_account, Address, U256};
use storage::LocalStore;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use vault_core::{
    config::{load_settings, log_directive, prepare_database_url, Settings},
    simulated::SimulatedChain,
    ControllerDependencies, DeploymentArtifact, VaultBackend, VaultController, WalletProvider,
};

mod shell;

use shell::{Shell, Step};

/// Placeholder creation code for the in-memory chain, which never executes it.
const SIMULATED_BYTECODE: &[u8] = &[0x60, 0x80, 0x60, 0x40, 0x52];

#[derive(Parser, Debug)]
#[command(about = "Interactive client for dead man's switch vaults")]
struct Args {
    #[arg(long)]
    rpc_url: Option<String>,
    /// Required chain id, decimal or 0x-prefixed.
    #[arg(long)]
    chain_id: Option<String>,
    #[arg(long)]
    artifact: Option<PathBuf>,
    #[arg(long)]
    database_url: Option<String>,
    /// Run against an in-memory chain instead of a node.
    #[arg(long)]
    simulated: bool,
    /// Account used by the simulated wallet.
    #[arg(long, requires = "simulated")]
    account: Option<String>,
}

fn apply_args(mut settings: Settings, args: &Args) -> Result<Settings> {
    if let Some(rpc_url) = &args.rpc_url {
        settings.rpc_url = Some(rpc_url.clone());
    }
    if let Some(raw) = &args.chain_id {
        settings.required_chain_id = vault_core::config::parse_chain_id(raw)
            .with_context(|| format!("invalid chain id '{raw}'"))?;
    }
    if let Some(artifact) = &args.artifact {
        settings.artifact_path = Some(artifact.clone());
    }
    if let Some(database_url) = &args.database_url {
        settings.database_url = database_url.clone();
    }
    Ok(settings)
}

struct Wiring {
    wallet: Arc<dyn WalletProvider>,
    backend: Arc<dyn VaultBackend>,
    artifact: Option<DeploymentArtifact>,
    chain: Option<SimulatedChain>,
}

fn simulated_wiring(settings: &Settings, account: Option<&str>) -> Result<Wiring> {
    let account = match account {
        Some(raw) => parse_account(raw).with_context(|| format!("invalid account '{raw}'"))?,
        None => Address::repeat_byte(0xbb),
    };
    let chain = SimulatedChain::new(settings.required_chain_id, settings.timeout_secs);
    chain.fund(account, U256::from(100u64) * U256::from(10u64).pow(U256::from(18u64)));
    info!(%account, "console: simulated chain ready; account funded with 100 ether");
    Ok(Wiring {
        wallet: Arc::new(chain.wallet(account)),
        backend: Arc::new(chain.clone()),
        artifact: Some(DeploymentArtifact::new(SIMULATED_BYTECODE.to_vec())),
        chain: Some(chain),
    })
}

fn rpc_wiring(settings: &Settings) -> Result<Wiring> {
    let endpoint = settings
        .rpc_endpoint()?
        .context("no RPC endpoint configured; pass --rpc-url, set RPC_URL or use --simulated")?;
    let client = Arc::new(RpcClient::new(endpoint));
    let artifact = settings
        .artifact_path
        .as_deref()
        .map(DeploymentArtifact::load)
        .transpose()?;
    Ok(Wiring {
        wallet: Arc::new(RpcWallet::new(Arc::clone(&client))),
        backend: Arc::new(RpcVaultBackend::new(client)),
        artifact,
        chain: None,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(log_directive()).init();
    let args = Args::parse();
    let settings = apply_args(load_settings(), &args)?;

    let wiring = if args.simulated {
        simulated_wiring(&settings, args.account.as_deref())?
    } else {
        rpc_wiring(&settings)?
    };
    let store = LocalStore::new(&prepare_database_url(&settings.database_url)?).await?;
    let controller = VaultController::new(ControllerDependencies {
        wallet: Some(wiring.wallet),
        backend: wiring.backend,
        artifact: wiring.artifact,
        store,
        config: settings.controller_config(),
    })
    .await?;

    let printer = tokio::spawn(shell::print_events(controller.subscribe_events()));
    let shell = Shell::new(Arc::clone(&controller), wiring.chain);
    println!("Type `help` for commands.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if shell.execute(&line).await == Step::Quit {
            break;
        }
    }

    controller.disconnect().await;
    printer.abort();
    Ok(())
}
