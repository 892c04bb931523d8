use anyhow::{anyhow, Result};
use async_trait::async_trait;
use secp256k1::ecdh::SharedSecret;
use secp256k1::{PublicKey, SecretKey};

use crate::api::*;
use crate::error::ProtocolError;

mod client;
mod local;

pub use client::RelayClient;
pub use local::{LocalRelay, MAX_DURATION_DAYS};

/// The decryption relay: checks a signed user-decryption request against the
/// ACL and returns each clear value sealed to the session public key.
#[async_trait]
pub trait DecryptionRelay: Send + Sync {
    async fn user_decrypt(
        &self,
        request: UserDecryptRequest,
    ) -> Result<UserDecryptResponse, ProtocolError>;
}

fn pad(shared: &SharedSecret, handle: &Handle) -> [u8; 32] {
    let mut preimage = shared.secret_bytes().to_vec();
    preimage.extend_from_slice(&handle.0);
    keccak256(&preimage)
}

fn xor_pad(bytes: &[u8; 9], pad: &[u8; 32]) -> [u8; 9] {
    let mut out = [0u8; 9];
    for (i, byte) in bytes.iter().enumerate() {
        out[i] = byte ^ pad[i];
    }
    out
}

/// Seals `value` so only the holder of the session key can open it.
pub fn seal(
    relay_key: &SecretKey,
    session_public_key: &PublicKey,
    handle: &Handle,
    value: &ClearValue,
) -> String {
    let shared = SharedSecret::new(session_public_key, relay_key);
    hex::encode(xor_pad(&value.to_bytes(), &pad(&shared, handle)))
}

pub fn open(
    session_key: &SecretKey,
    relay_public_key: &PublicKey,
    entry: &SealedEntry,
) -> Result<ClearValue> {
    let sealed: [u8; 9] = hex::decode(&entry.sealed)?
        .try_into()
        .map_err(|_| anyhow!("sealed value for {} has the wrong length", entry.handle))?;
    let shared = SharedSecret::new(relay_public_key, session_key);
    ClearValue::from_bytes(&xor_pad(&sealed, &pad(&shared, &entry.handle)))
}

#[cfg(test)]
mod test {
    use secp256k1::{generate_keypair, rand};

    use super::*;

    #[test]
    fn sealed_values_open_only_with_the_session_key() {
        let (relay_sk, relay_pk) = generate_keypair(&mut rand::thread_rng());
        let (session_sk, session_pk) = generate_keypair(&mut rand::thread_rng());
        let (other_sk, _) = generate_keypair(&mut rand::thread_rng());
        let handle = Handle::from_digest([3; 32], FheType::U32);
        let entry = SealedEntry {
            handle,
            sealed: seal(&relay_sk, &session_pk, &handle, &ClearValue::U32(1234)),
        };
        assert_eq!(
            open(&session_sk, &relay_pk, &entry).unwrap(),
            ClearValue::U32(1234)
        );
        assert_ne!(
            open(&other_sk, &relay_pk, &entry).ok(),
            Some(ClearValue::U32(1234))
        );
    }
}
