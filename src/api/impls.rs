use std::{
    fmt::{Display, Formatter},
    str::FromStr,
};

use anyhow::{anyhow, bail};
use secp256k1::PublicKey;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::*;

fn decode_prefixed(s: &str) -> anyhow::Result<Vec<u8>> {
    let stripped = s.strip_prefix("0x").unwrap_or(s);
    Ok(hex::decode(stripped)?)
}

macro_rules! hex_bytes_serde {
    ($name:ident) => {
        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_string())
            }
        }
        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                $name::from_str(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

macro_rules! fixed_hex {
    ($name:ident, $len:expr) => {
        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                write!(f, "0x{}", hex::encode(self.0))
            }
        }
        impl FromStr for $name {
            type Err = anyhow::Error;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let bytes = decode_prefixed(s)?;
                let array: [u8; $len] = bytes.try_into().map_err(|bytes: Vec<u8>| {
                    anyhow!(
                        "{} needs {} bytes but got {}",
                        stringify!($name),
                        $len,
                        bytes.len()
                    )
                })?;
                Ok(Self(array))
            }
        }
        hex_bytes_serde!($name);
    };
}

fixed_hex!(Address, 20);
fixed_hex!(Handle, 32);
fixed_hex!(TxHash, 32);
fixed_hex!(WalletSignature, 65);

impl Display for InputProof {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(&self.0))
    }
}
impl FromStr for InputProof {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(decode_prefixed(s)?))
    }
}
hex_bytes_serde!(InputProof);

impl Address {
    /// Ethereum style address: last 20 bytes of keccak256 over the
    /// uncompressed public key without its 0x04 prefix.
    pub fn from_public_key(public_key: &PublicKey) -> Self {
        let uncompressed = public_key.serialize_uncompressed();
        let digest = keccak256(&uncompressed[1..]);
        let mut address = [0u8; 20];
        address.copy_from_slice(&digest[12..]);
        Self(address)
    }
    /// Left padded to a 32 byte ABI word.
    pub fn to_word(&self) -> [u8; 32] {
        let mut word = [0u8; 32];
        word[12..].copy_from_slice(&self.0);
        word
    }
}

impl Handle {
    pub const VERSION: u8 = 0;

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
    pub fn fhe_type(&self) -> Option<FheType> {
        FheType::from_tag(self.0[30])
    }
    /// Stamps the type tag and version into a freshly derived digest.
    pub fn from_digest(mut digest: [u8; 32], fhe_type: FheType) -> Self {
        digest[30] = fhe_type.tag();
        digest[31] = Self::VERSION;
        Self(digest)
    }
}

impl FheType {
    pub fn tag(&self) -> u8 {
        match self {
            Self::Bool => 0,
            Self::U32 => 4,
            Self::U64 => 5,
        }
    }
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Bool),
            4 => Some(Self::U32),
            5 => Some(Self::U64),
            _ => None,
        }
    }
}
impl Display for FheType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let output = match self {
            Self::Bool => "ebool",
            Self::U32 => "euint32",
            Self::U64 => "euint64",
        };
        write!(f, "{}", output)
    }
}

impl ClearValue {
    pub fn fhe_type(&self) -> FheType {
        match self {
            Self::Bool(_) => FheType::Bool,
            Self::U32(_) => FheType::U32,
            Self::U64(_) => FheType::U64,
        }
    }
    pub fn as_u64(&self) -> u64 {
        match self {
            Self::Bool(value) => *value as u64,
            Self::U32(value) => *value as u64,
            Self::U64(value) => *value,
        }
    }
    /// The zero value of a given type.
    pub fn zero(fhe_type: FheType) -> Self {
        match fhe_type {
            FheType::Bool => Self::Bool(false),
            FheType::U32 => Self::U32(0),
            FheType::U64 => Self::U64(0),
        }
    }
    /// Builds a value of `fhe_type`, truncating like the coprocessor does.
    pub fn from_u64(fhe_type: FheType, value: u64) -> Self {
        match fhe_type {
            FheType::Bool => Self::Bool(value != 0),
            FheType::U32 => Self::U32(value as u32),
            FheType::U64 => Self::U64(value),
        }
    }
    /// Type tag followed by the big endian value.
    pub fn to_bytes(&self) -> [u8; 9] {
        let mut bytes = [0u8; 9];
        bytes[0] = self.fhe_type().tag();
        bytes[1..].copy_from_slice(&self.as_u64().to_be_bytes());
        bytes
    }
    pub fn from_bytes(bytes: &[u8]) -> anyhow::Result<Self> {
        if bytes.len() != 9 {
            bail!("clear value needs 9 bytes but got {}", bytes.len());
        }
        let fhe_type =
            FheType::from_tag(bytes[0]).ok_or(anyhow!("unknown type tag {}", bytes[0]))?;
        let mut value = [0u8; 8];
        value.copy_from_slice(&bytes[1..]);
        let value = u64::from_be_bytes(value);
        match fhe_type {
            FheType::Bool if value > 1 => bail!("boolean out of range: {}", value),
            FheType::U32 if value > u32::MAX as u64 => bail!("u32 out of range: {}", value),
            _ => Ok(Self::from_u64(fhe_type, value)),
        }
    }
}
impl Display for ClearValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(value) => write!(f, "{}", value),
            Self::U32(value) => write!(f, "{}", value),
            Self::U64(value) => write!(f, "{}", value),
        }
    }
}

impl Display for SemanticType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let output = match self {
            Self::Bool => "bool",
            Self::U32 => "u32",
            Self::U64 => "u64",
        };
        write!(f, "{}", output)
    }
}

impl EventStatus {
    /// Resolution dominates every time based state.
    pub fn derive(
        start_time: UnixSeconds,
        end_time: UnixSeconds,
        resolved: bool,
        now: UnixSeconds,
    ) -> Self {
        if resolved {
            Self::Resolved
        } else if now < start_time {
            Self::Upcoming
        } else if now <= end_time {
            Self::Active
        } else {
            Self::Ended
        }
    }
}
impl Display for EventStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let output = match self {
            Self::Upcoming => "upcoming",
            Self::Active => "active",
            Self::Ended => "ended",
            Self::Resolved => "resolved",
        };
        write!(f, "{}", output)
    }
}
impl FromStr for EventStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "upcoming" => Ok(Self::Upcoming),
            "active" => Ok(Self::Active),
            "ended" => Ok(Self::Ended),
            "resolved" => Ok(Self::Resolved),
            e => bail!("Couldn't deserialize to EventStatus: {}", e),
        }
    }
}

impl LedgerErrorCode {
    pub fn code(&self) -> u32 {
        match self {
            Self::NoError => 0,
            Self::BettingNotActive => 1,
            Self::InsufficientPayment => 2,
            Self::AlreadyBet => 3,
            Self::EventNotResolved => 4,
            Self::NoWinnings => 5,
        }
    }
    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(Self::NoError),
            1 => Some(Self::BettingNotActive),
            2 => Some(Self::InsufficientPayment),
            3 => Some(Self::AlreadyBet),
            4 => Some(Self::EventNotResolved),
            5 => Some(Self::NoWinnings),
            _ => None,
        }
    }
    pub fn message(&self) -> &'static str {
        match self {
            Self::NoError => "No error",
            Self::BettingNotActive => "Betting is not active for this event",
            Self::InsufficientPayment => "Insufficient payment for the bet",
            Self::AlreadyBet => "You have already placed a bet on this event",
            Self::EventNotResolved => "Event has not been resolved yet",
            Self::NoWinnings => "No winnings available to claim",
        }
    }
}
impl Display for LedgerErrorCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message(), self.code())
    }
}

impl Display for LedgerLog {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EventCreated {
                event_id,
                description,
                ..
            } => write!(f, "EventCreated({}, {:?})", event_id, description),
            Self::BetPlaced { event_id, bettor } => write!(f, "BetPlaced({}, {})", event_id, bettor),
            Self::EventResolved { event_id, outcome } => {
                write!(f, "EventResolved({}, {})", event_id, outcome)
            }
            Self::RewardCalculated {
                event_id,
                user,
                amount,
            } => write!(f, "RewardCalculated({}, {}, {})", event_id, user, amount),
            Self::RewardWithdrawn {
                event_id,
                user,
                amount,
            } => write!(f, "RewardWithdrawn({}, {}, {})", event_id, user, amount),
        }
    }
}
