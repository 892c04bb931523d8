use anyhow::Result;
use futures_util::future::join_all;
use log::debug;

use crate::api::*;
use crate::error::ProtocolError;
use crate::ledger::ContractGateway;
use crate::session::Decryptor;
use crate::wallet::WalletSigner;

/// Where a user's reward for one event stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewardState {
    Unclaimed,
    Claimed { pending: Wei, original: Wei },
    Withdrawn { original: Wei },
}
impl RewardState {
    pub fn from_info(info: &RewardInfo) -> Self {
        if info.withdrawn {
            Self::Withdrawn {
                original: info.original_amount,
            }
        } else if info.claimed {
            Self::Claimed {
                pending: info.pending_amount,
                original: info.original_amount,
            }
        } else {
            Self::Unclaimed
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewardAction {
    Claim,
    Withdraw,
}

/// The actions a user can legally take on an event right now.
pub fn available_actions(event: &PredictionEvent, bet: &Bet, reward: &RewardInfo) -> Vec<RewardAction> {
    let mut actions = vec![];
    if event.resolved && event.decryption_done && bet.placed && !bet.claimed && !reward.claimed {
        actions.push(RewardAction::Claim);
    }
    if reward.claimed && !reward.withdrawn && reward.pending_amount > 0 {
        actions.push(RewardAction::Withdraw);
    }
    actions
}

pub struct RewardReconciler {
    gateway: ContractGateway,
}
impl RewardReconciler {
    pub fn new(gateway: ContractGateway) -> Self {
        Self { gateway }
    }
    pub async fn get_reward_info(&self, event_id: EventId, user: Address) -> Result<RewardInfo> {
        self.gateway.read_reward_info(event_id, user).await
    }
    pub async fn pending_reward(&self, event_id: EventId, user: Address) -> Result<Wei> {
        self.gateway.read_pending_reward(event_id, user).await
    }
    pub async fn has_claimed_reward(&self, event_id: EventId, user: Address) -> Result<bool> {
        self.gateway.read_has_claimed_reward(event_id, user).await
    }
    pub async fn reward_state(&self, event_id: EventId, user: Address) -> Result<RewardState> {
        Ok(RewardState::from_info(
            &self.get_reward_info(event_id, user).await?,
        ))
    }
    /// Rewards with something left to withdraw, fetched concurrently.
    pub async fn rewards_for_events(
        &self,
        event_ids: &[EventId],
        user: Address,
    ) -> Result<Vec<(EventId, RewardInfo)>> {
        let results = join_all(
            event_ids
                .iter()
                .map(|event_id| self.get_reward_info(*event_id, user)),
        )
        .await;
        let mut rewards = vec![];
        for (event_id, result) in event_ids.iter().zip(results) {
            let info = result?;
            if info.pending_amount > 0 {
                rewards.push((*event_id, info));
            }
        }
        Ok(rewards)
    }

    /// Sends the claim, but only once the event is resolved and its totals
    /// are decrypted. The outcome arrives later as a reward and an error
    /// code.
    pub async fn claim(&self, wallet: &dyn WalletSigner, event: &PredictionEvent) -> Result<TxReceipt> {
        if !event.resolved {
            return Err(ProtocolError::ClaimNotReady(format!(
                "event {} is not resolved",
                event.id
            ))
            .into());
        }
        if !event.decryption_done {
            return Err(ProtocolError::ClaimNotReady(format!(
                "totals of event {} are still being decrypted",
                event.id
            ))
            .into());
        }
        debug!("Claiming reward on event {} for {}", event.id, wallet.address());
        self.gateway.write_claim_reward(wallet, event.id).await
    }
    pub async fn withdraw(&self, wallet: &dyn WalletSigner, event_id: EventId) -> Result<TxReceipt> {
        debug!("Withdrawing reward on event {} for {}", event_id, wallet.address());
        self.gateway.write_withdraw_reward(wallet, event_id).await
    }

    /// Decrypts the wallet's last error code. A wallet that never touched
    /// the ledger has none.
    pub async fn last_error_code(
        &self,
        wallet: &dyn WalletSigner,
        decryptor: &Decryptor,
    ) -> Result<(LedgerErrorCode, UnixSeconds)> {
        let last = self.gateway.read_last_error_code(wallet.address()).await?;
        if last.handle.is_zero() {
            return Ok((LedgerErrorCode::NoError, last.timestamp));
        }
        let value = decryptor
            .decrypt_one(
                last.handle,
                self.gateway.contract_address(),
                wallet,
                SemanticType::U32,
            )
            .await?;
        let code = LedgerErrorCode::from_code(value.as_u64()).ok_or(
            ProtocolError::MalformedPlaintext(format!("unknown error code {}", value)),
        )?;
        Ok((code, last.timestamp))
    }
}
