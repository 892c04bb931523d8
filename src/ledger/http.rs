use anyhow::{bail, Result};
use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::Ledger;
use crate::api::*;
use crate::wallet::{sign_request, WalletSigner};

/// Talks to the devnet ledger over HTTP. Writes travel in a signed envelope.
pub struct HttpLedger {
    url: String,
    contract: Address,
    client: reqwest::Client,
}

async fn parse<R: DeserializeOwned>(response: Response) -> Result<R> {
    if response.status() != StatusCode::OK {
        bail!("{}: {}", response.status(), response.text().await?)
    }
    Ok(response.json::<R>().await?)
}

impl HttpLedger {
    pub fn new(url: String, contract: Address) -> Self {
        let client = reqwest::Client::new();
        Self {
            url,
            contract,
            client,
        }
    }
    async fn get<R: DeserializeOwned>(&self, path: &str) -> Result<R> {
        let response = self.client.get(self.url.clone() + path).send().await?;
        parse(response).await
    }
    async fn post<T: Serialize, R: DeserializeOwned>(&self, path: &str, request: &T) -> Result<R> {
        let response = self
            .client
            .post(self.url.clone() + path)
            .json(request)
            .send()
            .await?;
        parse(response).await
    }
    async fn send<T: Serialize + Send>(
        &self,
        path: &str,
        sender: &dyn WalletSigner,
        data: T,
    ) -> Result<TxReceipt> {
        let request = sign_request(sender, data).await?;
        self.post(path, &request).await
    }
}
#[async_trait]
impl Ledger for HttpLedger {
    fn contract_address(&self) -> Address {
        self.contract
    }
    async fn event_count(&self) -> Result<u64> {
        let response: EventCountResponse = self.get("/v1/event_count").await?;
        Ok(response.count)
    }
    async fn get_event(&self, event_id: EventId) -> Result<PredictionEvent> {
        self.post("/v1/get_event", &EventRequest { event_id }).await
    }
    async fn get_bet(&self, event_id: EventId, user: Address) -> Result<Bet> {
        self.post("/v1/get_bet", &EventUserRequest { event_id, user })
            .await
    }
    async fn get_reward_info(&self, event_id: EventId, user: Address) -> Result<RewardInfo> {
        self.post("/v1/get_reward_info", &EventUserRequest { event_id, user })
            .await
    }
    async fn get_pending_reward(&self, event_id: EventId, user: Address) -> Result<Wei> {
        Ok(self.get_reward_info(event_id, user).await?.pending_amount)
    }
    async fn has_claimed_reward(&self, event_id: EventId, user: Address) -> Result<bool> {
        Ok(self.get_reward_info(event_id, user).await?.claimed)
    }
    async fn get_last_error(&self, user: Address) -> Result<LastError> {
        self.post("/v1/get_last_error", &UserRequest { user }).await
    }
    async fn owner(&self) -> Result<Address> {
        let response: OwnerResponse = self.get("/v1/owner").await?;
        Ok(response.owner)
    }

    async fn create_event(
        &self,
        sender: &dyn WalletSigner,
        request: CreateEventRequest,
    ) -> Result<TxReceipt> {
        self.send("/v1/create_event", sender, request).await
    }
    async fn place_bet(
        &self,
        sender: &dyn WalletSigner,
        request: PlaceBetRequest,
    ) -> Result<TxReceipt> {
        self.send("/v1/place_bet", sender, request).await
    }
    async fn resolve_event(
        &self,
        sender: &dyn WalletSigner,
        request: ResolveEventRequest,
    ) -> Result<TxReceipt> {
        self.send("/v1/resolve_event", sender, request).await
    }
    async fn claim_reward(&self, sender: &dyn WalletSigner, event_id: EventId) -> Result<TxReceipt> {
        self.send("/v1/claim_reward", sender, EventRequest { event_id })
            .await
    }
    async fn withdraw_reward(
        &self,
        sender: &dyn WalletSigner,
        event_id: EventId,
    ) -> Result<TxReceipt> {
        self.send("/v1/withdraw_reward", sender, EventRequest { event_id })
            .await
    }
}
