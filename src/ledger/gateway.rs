use std::sync::Arc;

use anyhow::{Context, Result};
use log::trace;

use super::Ledger;
use crate::api::*;
use crate::wallet::WalletSigner;

/// Thin dispatcher in front of a ledger. Adds no behaviour besides naming
/// and error context.
#[derive(Clone)]
pub struct ContractGateway {
    ledger: Arc<dyn Ledger>,
}
impl ContractGateway {
    pub fn new(ledger: Arc<dyn Ledger>) -> Self {
        Self { ledger }
    }
    pub fn contract_address(&self) -> Address {
        self.ledger.contract_address()
    }

    pub async fn read_event_count(&self) -> Result<u64> {
        self.ledger.event_count().await.context("getEventCount failed")
    }
    pub async fn read_event(&self, event_id: EventId) -> Result<PredictionEvent> {
        trace!("Reading event {}", event_id);
        self.ledger
            .get_event(event_id)
            .await
            .with_context(|| format!("getPredicEvent({}) failed", event_id))
    }
    pub async fn read_bet(&self, event_id: EventId, user: Address) -> Result<Bet> {
        self.ledger
            .get_bet(event_id, user)
            .await
            .with_context(|| format!("getBet({}, {}) failed", event_id, user))
    }
    pub async fn read_reward_info(&self, event_id: EventId, user: Address) -> Result<RewardInfo> {
        self.ledger
            .get_reward_info(event_id, user)
            .await
            .with_context(|| format!("getRewardInfo({}, {}) failed", event_id, user))
    }
    pub async fn read_pending_reward(&self, event_id: EventId, user: Address) -> Result<Wei> {
        self.ledger
            .get_pending_reward(event_id, user)
            .await
            .with_context(|| format!("getPendingReward({}, {}) failed", event_id, user))
    }
    pub async fn read_has_claimed_reward(&self, event_id: EventId, user: Address) -> Result<bool> {
        self.ledger
            .has_claimed_reward(event_id, user)
            .await
            .with_context(|| format!("hasClaimedReward({}, {}) failed", event_id, user))
    }
    pub async fn read_owner(&self) -> Result<Address> {
        self.ledger.owner().await.context("owner failed")
    }
    pub async fn read_last_error_code(&self, user: Address) -> Result<LastError> {
        self.ledger
            .get_last_error(user)
            .await
            .with_context(|| format!("getLastError({}) failed", user))
    }

    pub async fn write_create_event(
        &self,
        sender: &dyn WalletSigner,
        request: CreateEventRequest,
    ) -> Result<TxReceipt> {
        self.ledger
            .create_event(sender, request)
            .await
            .context("createEvent failed")
    }
    pub async fn write_place_bet(
        &self,
        sender: &dyn WalletSigner,
        event_id: EventId,
        shares_handle: Handle,
        direction_handle: Handle,
        input_proof: InputProof,
        value: Wei,
    ) -> Result<TxReceipt> {
        let request = PlaceBetRequest {
            event_id,
            shares_handle,
            direction_handle,
            input_proof,
            value,
        };
        self.ledger
            .place_bet(sender, request)
            .await
            .with_context(|| format!("placeBet({}) failed", event_id))
    }
    pub async fn write_resolve_event(
        &self,
        sender: &dyn WalletSigner,
        event_id: EventId,
        outcome: bool,
    ) -> Result<TxReceipt> {
        self.ledger
            .resolve_event(sender, ResolveEventRequest { event_id, outcome })
            .await
            .with_context(|| format!("resolveEvent({}) failed", event_id))
    }
    pub async fn write_claim_reward(
        &self,
        sender: &dyn WalletSigner,
        event_id: EventId,
    ) -> Result<TxReceipt> {
        self.ledger
            .claim_reward(sender, event_id)
            .await
            .with_context(|| format!("claimReward({}) failed", event_id))
    }
    pub async fn write_withdraw_reward(
        &self,
        sender: &dyn WalletSigner,
        event_id: EventId,
    ) -> Result<TxReceipt> {
        self.ledger
            .withdraw_reward(sender, event_id)
            .await
            .with_context(|| format!("withdrawReward({}) failed", event_id))
    }
}
