use std::{collections::HashMap, fs, path::PathBuf, time::Duration};

use anyhow::{bail, Context};
use serde::Deserialize;
use shared::domain::SEPOLIA_CHAIN_ID;
use url::Url;

use crate::{simulated::DEFAULT_TIMEOUT_SECS, ControllerConfig};

pub const SETTINGS_FILE: &str = "vault.toml";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Settings {
    pub rpc_url: Option<String>,
    pub required_chain_id: u64,
    pub poll_interval_secs: u64,
    pub database_url: String,
    pub artifact_path: Option<PathBuf>,
    pub contract_address: Option<String>,
    pub timeout_secs: u64,
    pub beneficiary_email: Option<String>,
    pub webhook_url: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            rpc_url: None,
            required_chain_id: SEPOLIA_CHAIN_ID,
            poll_interval_secs: 10,
            database_url: "sqlite://./data/vault.db".into(),
            artifact_path: None,
            contract_address: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            beneficiary_email: None,
            webhook_url: None,
        }
    }
}

impl Settings {
    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            required_chain_id: self.required_chain_id,
            poll_interval: Duration::from_secs(self.poll_interval_secs.max(1)),
        }
    }

    pub fn rpc_endpoint(&self) -> anyhow::Result<Option<Url>> {
        self.rpc_url
            .as_deref()
            .map(|raw| Url::parse(raw).with_context(|| format!("invalid rpc url '{raw}'")))
            .transpose()
    }
}

/// Defaults, then `vault.toml` in the working directory, then the process environment.
pub fn load_settings() -> Settings {
    let file = fs::read_to_string(SETTINGS_FILE).ok();
    load_settings_from(file.as_deref(), |key| std::env::var(key).ok())
}

pub fn load_settings_from(
    file_contents: Option<&str>,
    env: impl Fn(&str) -> Option<String>,
) -> Settings {
    let mut settings = Settings::default();

    if let Some(raw) = file_contents {
        if let Ok(file_cfg) = toml::from_str::<HashMap<String, toml::Value>>(raw) {
            let text = |key: &str| file_cfg.get(key).and_then(value_as_string);
            if let Some(v) = text("rpc_url") {
                settings.rpc_url = Some(v);
            }
            if let Some(v) = text("required_chain_id").and_then(|v| parse_chain_id(&v)) {
                settings.required_chain_id = v;
            }
            if let Some(v) = text("poll_interval_secs").and_then(|v| v.parse().ok()) {
                settings.poll_interval_secs = v;
            }
            if let Some(v) = text("database_url") {
                settings.database_url = v;
            }
            if let Some(v) = text("artifact_path") {
                settings.artifact_path = Some(PathBuf::from(v));
            }
            if let Some(v) = text("contract_address") {
                settings.contract_address = Some(v);
            }
            if let Some(v) = text("timeout_secs").and_then(|v| v.parse().ok()) {
                settings.timeout_secs = v;
            }
            if let Some(v) = text("beneficiary_email") {
                settings.beneficiary_email = Some(v);
            }
            if let Some(v) = text("webhook_url") {
                settings.webhook_url = Some(v);
            }
        }
    }

    if let Some(v) = env("RPC_URL") {
        settings.rpc_url = Some(v);
    }
    if let Some(v) = env("APP__RPC_URL") {
        settings.rpc_url = Some(v);
    }

    if let Some(v) = env("REQUIRED_CHAIN_ID").and_then(|v| parse_chain_id(&v)) {
        settings.required_chain_id = v;
    }

    if let Some(v) = env("DATABASE_URL") {
        settings.database_url = v;
    }
    if let Some(v) = env("APP__DATABASE_URL") {
        settings.database_url = v;
    }

    if let Some(v) = env("POLL_INTERVAL_SECS").and_then(|v| v.parse().ok()) {
        settings.poll_interval_secs = v;
    }

    if let Some(v) = env("VAULT_ARTIFACT") {
        settings.artifact_path = Some(PathBuf::from(v));
    }

    if let Some(v) = env("CONTRACT_ADDRESS") {
        settings.contract_address = Some(v);
    }

    if let Some(v) = env("TIMEOUT").and_then(|v| v.trim().parse().ok()) {
        settings.timeout_secs = v;
    }

    if let Some(v) = env("BENEFICIARY_EMAIL") {
        settings.beneficiary_email = Some(v);
    }

    if let Some(v) = env("WEBHOOK_URL") {
        settings.webhook_url = Some(v);
    }

    settings
}

fn value_as_string(value: &toml::Value) -> Option<String> {
    match value {
        toml::Value::String(v) => Some(v.clone()),
        toml::Value::Integer(v) => Some(v.to_string()),
        _ => None,
    }
}

pub const DEFAULT_LOG_DIRECTIVE: &str = "info";

/// Tracing filter directive for the binaries: `RUST_LOG` when set, else `info`.
pub fn log_directive() -> String {
    log_directive_from(|key| std::env::var(key).ok())
}

pub fn log_directive_from(env: impl Fn(&str) -> Option<String>) -> String {
    env("RUST_LOG")
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_LOG_DIRECTIVE.to_string())
}

/// Accepts decimal or `0x`-prefixed hex.
pub fn parse_chain_id(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => raw.parse().ok(),
    }
}

pub fn prepare_database_url(raw_database_url: &str) -> anyhow::Result<String> {
    let database_url = normalize_database_url(raw_database_url);
    if !database_url.starts_with("sqlite:") {
        bail!("unsupported database url '{database_url}'; only sqlite is available");
    }
    Ok(database_url)
}

fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite::memory:") || raw_database_url.contains("://") {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        return format!("sqlite://{}", path.replace('\\', "/"));
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
