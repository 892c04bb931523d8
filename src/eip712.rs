//! Typed-data hashing for decryption authorizations, plus the recoverable
//! signatures wallets produce over them.

use anyhow::{anyhow, Result};
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, SecretKey, SECP256K1};

use crate::api::*;

pub const DOMAIN_TYPE: &str =
    "EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)";
pub const USER_DECRYPT_TYPE: &str = "UserDecryptRequestVerification(bytes publicKey,address[] contractAddresses,uint256 contractsChainId,uint256 startTimestamp,uint256 durationDays)";
pub const USER_DECRYPT_PRIMARY_TYPE: &str = "UserDecryptRequestVerification";

fn uint_word(value: u64) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[24..].copy_from_slice(&value.to_be_bytes());
    word
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptionDomain {
    pub name: String,
    pub version: String,
    pub chain_id: u64,
    pub verifying_contract: Address,
}
impl DecryptionDomain {
    pub fn new(chain_id: u64, verifying_contract: Address) -> Self {
        Self {
            name: "Decryption".to_string(),
            version: "1".to_string(),
            chain_id,
            verifying_contract,
        }
    }
    pub fn separator(&self) -> [u8; 32] {
        let mut encoded = keccak256(DOMAIN_TYPE.as_bytes()).to_vec();
        encoded.extend_from_slice(&keccak256(self.name.as_bytes()));
        encoded.extend_from_slice(&keccak256(self.version.as_bytes()));
        encoded.extend_from_slice(&uint_word(self.chain_id));
        encoded.extend_from_slice(&self.verifying_contract.to_word());
        keccak256(&encoded)
    }
}

/// What the wallet signs to let one session key read its handles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserDecryptAuthorization {
    pub public_key: Vec<u8>,
    pub contract_addresses: Vec<Address>,
    pub contracts_chain_id: u64,
    pub start_timestamp: UnixSeconds,
    pub duration_days: u32,
}
impl UserDecryptAuthorization {
    pub fn struct_hash(&self) -> [u8; 32] {
        let mut addresses = vec![];
        for address in &self.contract_addresses {
            addresses.extend_from_slice(&address.to_word());
        }
        let mut encoded = keccak256(USER_DECRYPT_TYPE.as_bytes()).to_vec();
        encoded.extend_from_slice(&keccak256(&self.public_key));
        encoded.extend_from_slice(&keccak256(&addresses));
        encoded.extend_from_slice(&uint_word(self.contracts_chain_id));
        encoded.extend_from_slice(&uint_word(self.start_timestamp.max(0) as u64));
        encoded.extend_from_slice(&uint_word(self.duration_days as u64));
        keccak256(&encoded)
    }
    pub fn signing_hash(&self, domain: &DecryptionDomain) -> [u8; 32] {
        typed_data_hash(&domain.separator(), &self.struct_hash())
    }
    /// Whether `pair` is covered by the signed contract list.
    pub fn covers(&self, pair: &HandleContractPair) -> bool {
        self.contract_addresses.contains(&pair.contract_address)
    }
}

pub fn typed_data_hash(domain_separator: &[u8; 32], struct_hash: &[u8; 32]) -> [u8; 32] {
    let mut encoded = vec![0x19, 0x01];
    encoded.extend_from_slice(domain_separator);
    encoded.extend_from_slice(struct_hash);
    keccak256(&encoded)
}

/// `personal_sign` digest of an arbitrary message.
pub fn personal_message_hash(message: &[u8]) -> [u8; 32] {
    let mut encoded = format!("\x19Ethereum Signed Message:\n{}", message.len()).into_bytes();
    encoded.extend_from_slice(message);
    keccak256(&encoded)
}

/// Signs a 32 byte digest as `r || s || v`, with `v` in {27, 28}.
pub fn sign_digest(secret_key: &SecretKey, digest: &[u8; 32]) -> Result<WalletSignature> {
    let message = Message::from_slice(digest)?;
    let (recovery_id, compact) = SECP256K1
        .sign_ecdsa_recoverable(&message, secret_key)
        .serialize_compact();
    let mut signature = [0u8; 65];
    signature[..64].copy_from_slice(&compact);
    signature[64] = 27 + recovery_id.to_i32() as u8;
    Ok(WalletSignature(signature))
}

pub fn recover_signer(digest: &[u8; 32], signature: &WalletSignature) -> Result<Address> {
    let v = signature.0[64];
    let recovery_id = match v {
        27 | 28 => RecoveryId::from_i32((v - 27) as i32)?,
        0 | 1 => RecoveryId::from_i32(v as i32)?,
        v => return Err(anyhow!("invalid recovery byte {}", v)),
    };
    let signature = RecoverableSignature::from_compact(&signature.0[..64], recovery_id)?;
    let message = Message::from_slice(digest)?;
    let public_key = SECP256K1.recover_ecdsa(&message, &signature)?;
    Ok(Address::from_public_key(&public_key))
}
