use std::str::FromStr;

use async_trait::async_trait;
use log::{debug, trace};
use secp256k1::{generate_keypair, rand, PublicKey};

use super::{seal, DecryptionRelay};
use crate::api::*;
use crate::clock::Clock;
use crate::eip712::{recover_signer, DecryptionDomain, UserDecryptAuthorization};
use crate::error::ProtocolError;
use crate::fhe::MockCoprocessor;
use crate::wallet::MAX_REQUEST_AGE_SECS;

const SECS_PER_DAY: i64 = 86_400;
pub const MAX_DURATION_DAYS: u32 = 365;

fn denied(reason: impl Into<String>) -> ProtocolError {
    ProtocolError::AuthorizationDenied(reason.into())
}

/// Relay and key management in one process, answering from the mock
/// coprocessor.
pub struct LocalRelay {
    fhe: MockCoprocessor,
    domain: DecryptionDomain,
    contracts_chain_id: u64,
    clock: Clock,
}
impl LocalRelay {
    pub fn new(
        fhe: MockCoprocessor,
        domain: DecryptionDomain,
        contracts_chain_id: u64,
        clock: Clock,
    ) -> Self {
        Self {
            fhe,
            domain,
            contracts_chain_id,
            clock,
        }
    }
    fn check_authorization(
        &self,
        request: &UserDecryptRequest,
    ) -> Result<PublicKey, ProtocolError> {
        let public_key_bytes = hex::decode(request.public_key.trim_start_matches("0x"))
            .map_err(|_| denied("public key is not hex"))?;
        let public_key = PublicKey::from_slice(&public_key_bytes)
            .map_err(|_| denied("public key is not a valid secp256k1 key"))?;
        let signature = WalletSignature::from_str(&request.signature)
            .map_err(|_| denied("malformed signature"))?;
        let start_timestamp = request
            .start_timestamp
            .parse::<UnixSeconds>()
            .map_err(|_| denied("malformed start timestamp"))?;
        let duration_days = request
            .duration_days
            .parse::<u32>()
            .map_err(|_| denied("malformed duration"))?;
        if duration_days == 0 || duration_days > MAX_DURATION_DAYS {
            return Err(denied(format!("duration of {} days", duration_days)));
        }

        let authorization = UserDecryptAuthorization {
            public_key: public_key_bytes,
            contract_addresses: request.contract_addresses.clone(),
            contracts_chain_id: self.contracts_chain_id,
            start_timestamp,
            duration_days,
        };
        let signer = recover_signer(&authorization.signing_hash(&self.domain), &signature)
            .map_err(|e| denied(format!("unrecoverable signature: {}", e)))?;
        if signer != request.user_address {
            debug!(
                "Decryption request for {} was signed by {}",
                request.user_address, signer
            );
            return Err(denied("signature does not belong to the user"));
        }

        let now = self.clock.now();
        let end = start_timestamp + duration_days as i64 * SECS_PER_DAY;
        // a client clock may run a little ahead of ours
        if now + MAX_REQUEST_AGE_SECS < start_timestamp || now > end {
            return Err(denied(format!(
                "authorization valid from {} to {}, now is {}",
                start_timestamp, end, now
            )));
        }

        for pair in &request.handle_contract_pairs {
            if !authorization.covers(pair) {
                return Err(denied(format!(
                    "contract {} is not in the signed scope",
                    pair.contract_address
                )));
            }
            if !self.fhe.is_allowed(&pair.handle, &request.user_address) {
                return Err(denied(format!(
                    "{} may not decrypt {}",
                    request.user_address, pair.handle
                )));
            }
            if !self.fhe.is_allowed(&pair.handle, &pair.contract_address) {
                return Err(denied(format!(
                    "{} is not bound to contract {}",
                    pair.handle, pair.contract_address
                )));
            }
        }
        Ok(public_key)
    }
}
#[async_trait]
impl DecryptionRelay for LocalRelay {
    async fn user_decrypt(
        &self,
        request: UserDecryptRequest,
    ) -> Result<UserDecryptResponse, ProtocolError> {
        let session_public_key = self.check_authorization(&request)?;
        let (relay_key, relay_public_key) = generate_keypair(&mut rand::thread_rng());
        let mut entries = vec![];
        for pair in &request.handle_contract_pairs {
            match self.fhe.kms_decrypt(&pair.handle) {
                Some(value) => entries.push(SealedEntry {
                    handle: pair.handle,
                    sealed: seal(&relay_key, &session_public_key, &pair.handle, &value),
                }),
                None => trace!("No ciphertext behind {}, omitting", pair.handle),
            }
        }
        debug!(
            "Sealed {} of {} handles for {}",
            entries.len(),
            request.handle_contract_pairs.len(),
            request.user_address
        );
        Ok(UserDecryptResponse {
            relay_public_key: hex::encode(relay_public_key.serialize()),
            entries,
        })
    }
}
