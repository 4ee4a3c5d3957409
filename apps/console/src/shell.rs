use std::sync::Arc;

use clap::{Parser, Subcommand};
use shared::domain::{DeploymentParameters, VaultSnapshot};
use tokio::sync::broadcast::{self, error::RecvError};
use vault_core::{simulated::SimulatedChain, ControllerEvent, VaultController, VaultError};

#[derive(Parser, Debug, PartialEq, Eq)]
#[command(no_binary_name = true, disable_version_flag = true)]
pub struct ShellLine {
    #[command(subcommand)]
    pub command: ShellCommand,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum ShellCommand {
    /// Bind the wallet account.
    Connect,
    /// Forget the wallet, the vault and its session.
    Disconnect,
    /// Set the beneficiary email kept on this machine.
    Email { address: String },
    /// Deploy a new vault.
    Deploy {
        secondary: String,
        master: String,
        beneficiary: String,
        secret: String,
        withdrawal: String,
    },
    /// Load an existing vault by address.
    Attach { address: String },
    /// Return to the deploy view, keeping the vault for later.
    Leave,
    /// Re-open the dashboard of the current vault.
    Dashboard,
    Status,
    /// Extend the liveness timer.
    Ping {
        #[arg(default_value_t = 0)]
        seconds: u64,
    },
    /// Deposit ether into the vault.
    Deposit { amount: String },
    Withdraw { password: String },
    Claim { password: String },
    /// Move the in-memory chain clock forward (simulated mode only).
    Advance { seconds: u64 },
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    Quit,
}

pub fn parse_line(line: &str) -> Result<Option<ShellLine>, clap::Error> {
    let words: Vec<&str> = line.split_whitespace().collect();
    if words.is_empty() {
        return Ok(None);
    }
    ShellLine::try_parse_from(words).map(Some)
}

pub struct Shell {
    controller: Arc<VaultController>,
    chain: Option<SimulatedChain>,
}

impl Shell {
    pub fn new(controller: Arc<VaultController>, chain: Option<SimulatedChain>) -> Self {
        Self { controller, chain }
    }

    pub async fn execute(&self, line: &str) -> Step {
        match parse_line(line) {
            Ok(Some(parsed)) => self.run(parsed.command).await,
            Ok(None) => Step::Continue,
            Err(err) => {
                println!("{err}");
                Step::Continue
            }
        }
    }

    async fn run(&self, command: ShellCommand) -> Step {
        let controller = &self.controller;
        let outcome: Result<(), VaultError> = match command {
            ShellCommand::Quit => return Step::Quit,
            ShellCommand::Connect => controller.connect().await.map(|identity| {
                println!("connected as {}", identity.address());
            }),
            ShellCommand::Disconnect => {
                controller.disconnect().await;
                Ok(())
            }
            ShellCommand::Email { address } => controller.set_beneficiary_email(&address).await,
            ShellCommand::Deploy {
                secondary,
                master,
                beneficiary,
                secret,
                withdrawal,
            } => {
                let params = DeploymentParameters {
                    secondary_key: secondary,
                    master_key: master,
                    beneficiary,
                    beneficiary_email: controller.beneficiary_email().await,
                    secret_password: secret,
                    withdrawal_password: withdrawal,
                };
                controller.deploy(params).await.map(|handle| {
                    println!("vault deployed at {}", handle.address());
                })
            }
            ShellCommand::Attach { address } => controller.attach(&address).await.map(|handle| {
                println!("vault loaded: {}", handle.address());
            }),
            ShellCommand::Leave => {
                controller.leave_dashboard().await;
                Ok(())
            }
            ShellCommand::Dashboard => controller.open_dashboard().await,
            ShellCommand::Status => {
                println!("{}", self.status().await);
                Ok(())
            }
            ShellCommand::Ping { seconds } => controller.ping(seconds).await,
            ShellCommand::Deposit { amount } => {
                controller.set_deposit_draft(&amount);
                controller.deposit(&amount).await
            }
            ShellCommand::Withdraw { password } => controller.withdraw_owner(&password).await,
            ShellCommand::Claim { password } => controller.claim_beneficiary(&password).await,
            ShellCommand::Advance { seconds } => {
                match &self.chain {
                    Some(chain) => {
                        chain.advance_time(seconds);
                        println!("chain clock now at {}", chain.now());
                    }
                    None => println!("advance is only available with --simulated"),
                }
                Ok(())
            }
        };

        if let Err(err) = outcome {
            println!("error: {err}");
        }
        Step::Continue
    }

    pub async fn status(&self) -> String {
        let controller = &self.controller;
        let identity = controller
            .identity()
            .await
            .map(|identity| identity.address().to_string())
            .unwrap_or_else(|| "not connected".to_string());
        let vault = controller
            .vault_address()
            .await
            .map(|address| address.to_string())
            .unwrap_or_else(|| "none".to_string());
        let command = controller.command_state();
        let mut lines = vec![
            format!("wallet:   {identity}"),
            format!("view:     {:?}", controller.view().await),
            format!("vault:    {vault}"),
            format!("email:    {}", controller.beneficiary_email().await),
        ];
        lines.extend(describe_snapshot(&controller.snapshot().await));
        if let Some(kind) = command.in_flight {
            lines.push(format!("busy:     {kind:?}"));
        }
        if let Some(err) = command.last_error {
            lines.push(format!("error:    {}", err.message));
        }
        lines.join("\n")
    }
}

fn describe_snapshot(snapshot: &VaultSnapshot) -> Vec<String> {
    let key = |key: Option<shared::Address>| {
        key.map(|key| key.to_string())
            .unwrap_or_else(|| "unknown".to_string())
    };
    vec![
        format!("balance:  {} ETH", snapshot.balance_ether()),
        format!("active:   {} (last check-in {})", snapshot.is_active, snapshot.last_active),
        format!("master:   {}", key(snapshot.master_key)),
        format!("secondary:{}", key(snapshot.secondary_key)),
    ]
}

fn boxed(text: &str) -> String {
    let width = text.chars().count() + 2;
    let border = "-".repeat(width);
    format!("+{border}+\n| {text} |\n+{border}+")
}

pub fn render_event(event: &ControllerEvent) -> Option<String> {
    match event {
        ControllerEvent::IdentityChanged(Some(address)) => Some(format!("[wallet] {address}")),
        ControllerEvent::IdentityChanged(None) => Some("[wallet] disconnected".to_string()),
        ControllerEvent::ViewChanged(view) => Some(format!("[view] {view:?}")),
        ControllerEvent::SnapshotUpdated(snapshot) if snapshot.is_active => Some(format!(
            "[vault] balance {} ETH, last check-in {}",
            snapshot.balance_ether(),
            snapshot.last_active
        )),
        ControllerEvent::SnapshotUpdated(_) | ControllerEvent::CommandStateChanged(_) => None,
        ControllerEvent::Error(err) => Some(format!("[error] {}", err.message)),
        ControllerEvent::Acknowledgment(text) => Some(boxed(text)),
        ControllerEvent::Warning(text) => Some(format!("[warning] {text}")),
        ControllerEvent::RefreshFailed(err) => Some(format!("[refresh] {}", err.message)),
    }
}

pub async fn print_events(mut events: broadcast::Receiver<ControllerEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => {
                if let Some(text) = render_event(&event) {
                    println!("{text}");
                }
            }
            Err(RecvError::Lagged(skipped)) => println!("[events] {skipped} skipped"),
            Err(RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
#[path = "tests/shell_tests.rs"]
mod tests;
