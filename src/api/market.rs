use serde::{Deserialize, Serialize};

use super::util::wei_string;

pub type EventId = u64;
/// 18-decimal fixed point amount, denominated in wei.
pub type Wei = u128;
pub type UnixSeconds = i64;

/// 20 byte account or contract address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address(pub [u8; 20]);

/// Opaque reference to a ciphertext held by the ledger's coprocessor.
///
/// Byte 30 carries the [`FheType`] tag of the ciphertext, byte 31 the handle
/// version. Everything else is derived by the coprocessor and meaningless to
/// the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Handle(pub [u8; 32]);

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InputProof(pub Vec<u8>);

/// 32 byte transaction identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TxHash(pub [u8; 32]);

/// 65 byte recoverable ECDSA signature, `r || s || v` with `v` in {27, 28}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WalletSignature(pub [u8; 65]);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FheType {
    Bool,
    U32,
    U64,
}

/// A decrypted (or not yet encrypted) value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClearValue {
    Bool(bool),
    U32(u32),
    U64(u64),
}

/// The type a caller wants a decrypted value coerced into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemanticType {
    Bool,
    U32,
    U64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HandleContractPair {
    pub handle: Handle,
    #[serde(rename = "contractAddress")]
    pub contract_address: Address,
}

/// Ordered handles plus one proof, bound to a (contract, user) pair.
///
/// Single use: the proof authenticates the exact field order and scope, so
/// the whole value has to be submitted in one ledger call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedInput {
    pub handles: Vec<Handle>,
    #[serde(rename = "inputProof")]
    pub input_proof: InputProof,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictionEvent {
    pub id: EventId,
    pub description: String,
    pub start_time: UnixSeconds,
    pub end_time: UnixSeconds,
    #[serde(with = "wei_string")]
    pub price_yes: Wei,
    #[serde(with = "wei_string")]
    pub price_no: Wei,
    pub resolved: bool,
    pub outcome: bool,
    #[serde(with = "wei_string")]
    pub total_eth_pool: Wei,
    pub total_yes_handle: Handle,
    pub total_no_handle: Handle,
    pub decrypted_yes: u64,
    pub decrypted_no: u64,
    pub decryption_done: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bet {
    pub event_id: EventId,
    pub bettor: Address,
    pub shares_handle: Handle,
    pub direction_handle: Handle,
    pub placed: bool,
    pub claimed: bool,
    #[serde(with = "wei_string")]
    pub actual_eth_amount: Wei,
}
impl Bet {
    /// What the ledger returns for a (event, address) pair that never bet.
    pub fn empty(event_id: EventId, bettor: Address) -> Self {
        Self {
            event_id,
            bettor,
            shares_handle: Handle::default(),
            direction_handle: Handle::default(),
            placed: false,
            claimed: false,
            actual_eth_amount: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RewardInfo {
    #[serde(with = "wei_string")]
    pub pending_amount: Wei,
    #[serde(with = "wei_string")]
    pub original_amount: Wei,
    pub claimed: bool,
    pub withdrawn: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastError {
    pub handle: Handle,
    pub timestamp: UnixSeconds,
}

#[derive(PartialEq, Eq, Debug, Clone, Copy, Serialize, Deserialize)]
pub enum EventStatus {
    Upcoming,
    Active,
    Ended,
    Resolved,
}

/// Outcome codes the ledger records, encrypted, instead of reverting.
#[derive(PartialEq, Eq, Debug, Clone, Copy, Serialize, Deserialize)]
pub enum LedgerErrorCode {
    NoError,
    BettingNotActive,
    InsufficientPayment,
    AlreadyBet,
    EventNotResolved,
    NoWinnings,
}

#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
pub enum LedgerLog {
    EventCreated {
        event_id: EventId,
        description: String,
        start_time: UnixSeconds,
        end_time: UnixSeconds,
        #[serde(with = "wei_string")]
        price_yes: Wei,
        #[serde(with = "wei_string")]
        price_no: Wei,
    },
    BetPlaced {
        event_id: EventId,
        bettor: Address,
    },
    EventResolved {
        event_id: EventId,
        outcome: bool,
    },
    RewardCalculated {
        event_id: EventId,
        user: Address,
        #[serde(with = "wei_string")]
        amount: Wei,
    },
    RewardWithdrawn {
        event_id: EventId,
        user: Address,
        #[serde(with = "wei_string")]
        amount: Wei,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub tx_hash: TxHash,
    pub logs: Vec<LedgerLog>,
}
