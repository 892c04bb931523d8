use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use log::debug;
use reqwest::StatusCode;

use super::FheBackend;
use crate::api::*;

/// Obtains handles and proofs from a devnet's coprocessor over HTTP.
pub struct DevnetBackend {
    url: String,
    client: reqwest::Client,
}
impl DevnetBackend {
    pub fn new(url: String) -> Self {
        let client = reqwest::Client::new();
        Self { url, client }
    }
}
#[async_trait]
impl FheBackend for DevnetBackend {
    async fn encrypt(
        &self,
        contract: Address,
        user: Address,
        values: &[ClearValue],
    ) -> Result<EncryptedInput> {
        debug!("Requesting input proof for {} values", values.len());
        let request = InputProofRequest {
            contract_address: contract,
            user_address: user,
            values: values.to_vec(),
        };
        let response = self
            .client
            .post(self.url.clone() + "/v1/input-proof")
            .json(&request)
            .send()
            .await
            .context("input proof request failed")?;
        if response.status() != StatusCode::OK {
            bail!("{}: {}", response.status(), response.text().await?)
        }
        Ok(response.json::<EncryptedInput>().await?)
    }
}
