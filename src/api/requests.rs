use serde::{Deserialize, Serialize};

use super::util::wei_string;
use super::*;

// Ledger requests
/// Proves who sent a write: a personal-sign signature over the request body
/// and timestamp, checked by the devnet before executing the call.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct TxAuth {
    pub from: Address,
    pub timestamp: UnixSeconds,
    /// Random, so two identical writes in the same second differ.
    pub nonce: u64,
    pub signature: WalletSignature,
}
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PostRequest<T> {
    pub access: TxAuth,
    pub data: T,
}
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CreateEventRequest {
    pub description: String,
    pub start_time: UnixSeconds,
    pub end_time: UnixSeconds,
    #[serde(with = "wei_string")]
    pub price_yes: Wei,
    #[serde(with = "wei_string")]
    pub price_no: Wei,
}
/// `placeBet(eventId, sharesHandle, directionHandle, proof) payable`.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct PlaceBetRequest {
    pub event_id: EventId,
    pub shares_handle: Handle,
    pub direction_handle: Handle,
    pub input_proof: InputProof,
    #[serde(with = "wei_string")]
    pub value: Wei,
}
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq)]
pub struct ResolveEventRequest {
    pub event_id: EventId,
    pub outcome: bool,
}
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq)]
pub struct EventRequest {
    pub event_id: EventId,
}
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq)]
pub struct EventUserRequest {
    pub event_id: EventId,
    pub user: Address,
}
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq)]
pub struct UserRequest {
    pub user: Address,
}

// Relay requests
/// Asks the coprocessor for handles and a proof over `values`, scoped to
/// (`contract_address`, `user_address`). Devnet only: a production backend
/// encrypts on the client.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InputProofRequest {
    pub contract_address: Address,
    pub user_address: Address,
    pub values: Vec<ClearValue>,
}
/// Body of a user decryption request. Window fields travel as strings.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserDecryptRequest {
    pub handle_contract_pairs: Vec<HandleContractPair>,
    pub public_key: String,
    pub signature: String,
    pub contract_addresses: Vec<Address>,
    pub user_address: Address,
    pub start_timestamp: String,
    pub duration_days: String,
}
