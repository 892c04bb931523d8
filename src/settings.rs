use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::api::Address;
use crate::eip712::DecryptionDomain;
use crate::ledger::{ContractGateway, HttpLedger};
use crate::relay::RelayClient;
use crate::session::Decryptor;

pub const DEFAULT_CONFIG_FILE: &str = "shadowbet.toml";
pub const DEVNET_URL: &str = "http://127.0.0.1:8081";
pub const DEVNET_CONTRACT: &str = "0x5FbDB2315678afecb367f032d93F642f64180aa3";
pub const DEVNET_VERIFYING_CONTRACT: &str = "0xb6E160B1ff80D67Bfe90A85eE06Ce0A2613607D1";

/// Where the ledger and relay live and which contract and chains to talk
/// to. Built from defaults, then a TOML file, then `SHADOWBET_*` variables.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Settings {
    pub ledger_url: String,
    pub relay_url: String,
    pub contract_address: Address,
    pub chain_id: u64,
    pub gateway_chain_id: u64,
    pub verifying_contract: Address,
    pub decryption_duration_days: u32,
    pub key_file: String,
    pub relay_timeout_secs: Option<u64>,
}
impl Settings {
    /// Reads `path` if given (it must exist then), or `shadowbet.toml` in
    /// the working directory if there is one.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let file = match path {
            Some(path) => File::with_name(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };
        Config::builder()
            .set_default("ledger_url", DEVNET_URL)?
            .set_default("relay_url", DEVNET_URL)?
            .set_default("contract_address", DEVNET_CONTRACT)?
            .set_default("chain_id", 31337i64)?
            .set_default("gateway_chain_id", 55815i64)?
            .set_default("verifying_contract", DEVNET_VERIFYING_CONTRACT)?
            .set_default("decryption_duration_days", 10i64)?
            .set_default("key_file", "shadowbet.key")?
            .add_source(file)
            .add_source(Environment::with_prefix("SHADOWBET").try_parsing(true))
            .build()
            .context("Couldn't read settings")?
            .try_deserialize()
            .context("Invalid settings")
    }
    pub fn domain(&self) -> DecryptionDomain {
        DecryptionDomain::new(self.gateway_chain_id, self.verifying_contract)
    }
    pub fn relay_timeout(&self) -> Option<Duration> {
        self.relay_timeout_secs.map(Duration::from_secs)
    }
    pub fn gateway(&self) -> ContractGateway {
        ContractGateway::new(Arc::new(HttpLedger::new(
            self.ledger_url.clone(),
            self.contract_address,
        )))
    }
    pub fn decryptor(&self) -> Result<Decryptor> {
        let relay = RelayClient::new(self.relay_url.clone(), self.relay_timeout())?;
        Ok(
            Decryptor::new(Arc::new(relay), self.domain(), self.chain_id)
                .with_duration_days(self.decryption_duration_days),
        )
    }
}
