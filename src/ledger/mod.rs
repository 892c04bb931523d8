use anyhow::Result;
use async_trait::async_trait;

use crate::api::*;
use crate::wallet::WalletSigner;

mod dev;
mod gateway;
mod http;

pub use dev::DevLedger;
pub use gateway::ContractGateway;
pub use http::HttpLedger;

/// The prediction-market ledger as seen from a client: public reads, plus
/// writes sent on behalf of a wallet.
#[async_trait]
pub trait Ledger: Send + Sync {
    fn contract_address(&self) -> Address;

    async fn event_count(&self) -> Result<u64>;
    async fn get_event(&self, event_id: EventId) -> Result<PredictionEvent>;
    async fn get_bet(&self, event_id: EventId, user: Address) -> Result<Bet>;
    async fn get_reward_info(&self, event_id: EventId, user: Address) -> Result<RewardInfo>;
    async fn get_pending_reward(&self, event_id: EventId, user: Address) -> Result<Wei>;
    async fn has_claimed_reward(&self, event_id: EventId, user: Address) -> Result<bool>;
    async fn get_last_error(&self, user: Address) -> Result<LastError>;
    async fn owner(&self) -> Result<Address>;

    async fn create_event(
        &self,
        sender: &dyn WalletSigner,
        request: CreateEventRequest,
    ) -> Result<TxReceipt>;
    async fn place_bet(
        &self,
        sender: &dyn WalletSigner,
        request: PlaceBetRequest,
    ) -> Result<TxReceipt>;
    async fn resolve_event(
        &self,
        sender: &dyn WalletSigner,
        request: ResolveEventRequest,
    ) -> Result<TxReceipt>;
    async fn claim_reward(&self, sender: &dyn WalletSigner, event_id: EventId) -> Result<TxReceipt>;
    async fn withdraw_reward(
        &self,
        sender: &dyn WalletSigner,
        event_id: EventId,
    ) -> Result<TxReceipt>;
}
