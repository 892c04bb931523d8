use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use log::debug;
use secp256k1::rand::{self, RngCore};
use secp256k1::{generate_keypair, PublicKey, SecretKey};
use serde::Serialize;
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncWriteExt},
};

use crate::api::*;
use crate::eip712::{
    personal_message_hash, recover_signer, sign_digest, DecryptionDomain,
    UserDecryptAuthorization,
};
use crate::error::ProtocolError;

/// How far a signed request's timestamp may drift from the server clock.
pub const MAX_REQUEST_AGE_SECS: i64 = 300;

/// The connected wallet: an address plus the two kinds of signatures the
/// protocol asks it for. A refusal surfaces as `AuthorizationDenied`.
#[async_trait]
pub trait WalletSigner: Send + Sync {
    fn address(&self) -> Address;
    async fn sign_typed_data(
        &self,
        domain: &DecryptionDomain,
        authorization: &UserDecryptAuthorization,
    ) -> Result<WalletSignature, ProtocolError>;
    async fn sign_message(&self, message: &[u8]) -> Result<WalletSignature, ProtocolError>;
}

/// A wallet backed by a secp256k1 key held in memory.
pub struct LocalWallet {
    secret_key: SecretKey,
    address: Address,
}
impl LocalWallet {
    pub fn new(secret_key: SecretKey) -> Self {
        let public_key = PublicKey::from_secret_key_global(&secret_key);
        Self {
            secret_key,
            address: Address::from_public_key(&public_key),
        }
    }
    pub fn generate() -> Self {
        let (secret_key, _) = generate_keypair(&mut rand::thread_rng());
        Self::new(secret_key)
    }
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut file = File::open(path)
            .await
            .with_context(|| format!("couldn't open key file {}", path.display()))?;
        let mut contents = vec![];
        file.read_to_end(&mut contents).await?;
        let secret_key = SecretKey::from_str(String::from_utf8(contents)?.trim())?;
        Ok(Self::new(secret_key))
    }
    /// Writes the secret key to `path` and the address next to it as `.pub`.
    pub async fn write_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut private = File::create(path).await?;
        private
            .write_all(format!("{}", self.secret_key.display_secret()).as_bytes())
            .await?;
        let mut public = File::create(path.with_extension("pub")).await?;
        public.write_all(self.address.to_string().as_bytes()).await?;
        Ok(())
    }
}
#[async_trait]
impl WalletSigner for LocalWallet {
    fn address(&self) -> Address {
        self.address
    }
    async fn sign_typed_data(
        &self,
        domain: &DecryptionDomain,
        authorization: &UserDecryptAuthorization,
    ) -> Result<WalletSignature, ProtocolError> {
        debug!(
            "Signing decryption authorization for {} contracts",
            authorization.contract_addresses.len()
        );
        sign_digest(&self.secret_key, &authorization.signing_hash(domain))
            .map_err(|e| ProtocolError::AuthorizationDenied(format!("{:#}", e)))
    }
    async fn sign_message(&self, message: &[u8]) -> Result<WalletSignature, ProtocolError> {
        sign_digest(&self.secret_key, &personal_message_hash(message))
            .map_err(|e| ProtocolError::AuthorizationDenied(format!("{:#}", e)))
    }
}

fn request_message<T: Serialize>(
    data: &T,
    timestamp: UnixSeconds,
    nonce: u64,
) -> Result<Vec<u8>> {
    let mut message = serde_json::to_vec(data)?;
    message.extend_from_slice(&timestamp.to_be_bytes());
    message.extend_from_slice(&nonce.to_be_bytes());
    Ok(message)
}

/// Wraps `data` in an envelope signed by `wallet`, the way writes reach the
/// devnet ledger.
pub async fn sign_request<T: Serialize>(
    wallet: &dyn WalletSigner,
    data: T,
) -> Result<PostRequest<T>> {
    let timestamp = Utc::now().timestamp();
    let nonce = rand::thread_rng().next_u64();
    let signature = wallet
        .sign_message(&request_message(&data, timestamp, nonce)?)
        .await?;
    Ok(PostRequest {
        access: TxAuth {
            from: wallet.address(),
            timestamp,
            nonce,
            signature,
        },
        data,
    })
}

/// Returns the sender of a signed envelope once the signature and its age
/// check out.
pub fn check_access<T: Serialize>(request: &PostRequest<T>, now: UnixSeconds) -> Result<Address> {
    verify_envelope(request, now).map(|(signer, _)| signer)
}
fn verify_envelope<T: Serialize>(
    request: &PostRequest<T>,
    now: UnixSeconds,
) -> Result<(Address, [u8; 32])> {
    let access = &request.access;
    if (now - access.timestamp).abs() > MAX_REQUEST_AGE_SECS {
        debug!("Request from {} is too old: {}", access.from, access.timestamp);
        bail!("Request timestamp {} is outside the accepted window", access.timestamp)
    }
    let digest = personal_message_hash(&request_message(
        &request.data,
        access.timestamp,
        access.nonce,
    )?);
    let signer = recover_signer(&digest, &access.signature)?;
    if signer != access.from {
        debug!("Request claims {} but was signed by {}", access.from, signer);
        bail!("Access Denied: signature does not match sender {}", access.from)
    }
    Ok((signer, digest))
}

/// Remembers the envelopes it accepted while they are young enough to pass
/// `check_access`, so each signed write goes through once.
#[derive(Debug, Default)]
pub struct ReplayGuard {
    seen: Mutex<HashMap<[u8; 32], UnixSeconds>>,
}
impl ReplayGuard {
    pub fn check<T: Serialize>(&self, request: &PostRequest<T>, now: UnixSeconds) -> Result<Address> {
        let (signer, digest) = verify_envelope(request, now)?;
        let mut seen = self
            .seen
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        seen.retain(|_, timestamp| (now - *timestamp).abs() <= MAX_REQUEST_AGE_SECS);
        if seen.insert(digest, request.access.timestamp).is_some() {
            debug!("Replayed request from {}", signer);
            bail!("Access Denied: request was already used")
        }
        Ok(signer)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn signed_requests_verify() {
        let wallet = LocalWallet::generate();
        let request = sign_request(&wallet, EventRequest { event_id: 3 })
            .await
            .unwrap();
        let now = request.access.timestamp;
        assert_eq!(check_access(&request, now).unwrap(), wallet.address());
        assert!(check_access(&request, now + MAX_REQUEST_AGE_SECS + 1).is_err());

        let mut tampered = request.clone();
        tampered.data.event_id = 4;
        assert!(check_access(&tampered, now).is_err());

        let mut impersonated = request;
        impersonated.access.from = LocalWallet::generate().address();
        assert!(check_access(&impersonated, now).is_err());
    }

    #[tokio::test]
    async fn envelopes_are_single_use() {
        let wallet = LocalWallet::generate();
        let guard = ReplayGuard::default();
        let request = sign_request(&wallet, EventRequest { event_id: 3 })
            .await
            .unwrap();
        let now = request.access.timestamp;
        assert_eq!(guard.check(&request, now).unwrap(), wallet.address());
        assert!(guard.check(&request, now).is_err());
        // same data signed again gets a fresh nonce
        let again = sign_request(&wallet, EventRequest { event_id: 3 })
            .await
            .unwrap();
        assert_ne!(again.access.nonce, request.access.nonce);
        assert!(guard.check(&again, now).is_ok());
        let mut renonced = request;
        renonced.access.nonce = renonced.access.nonce.wrapping_add(1);
        assert!(guard.check(&renonced, now).is_err());
    }

    #[tokio::test]
    async fn key_file_round_trip() {
        let wallet = LocalWallet::generate();
        let path = std::env::temp_dir().join(format!("shadowbet-{}.key", wallet.address()));
        wallet.write_to_file(&path).await.unwrap();
        let loaded = LocalWallet::from_file(&path).await.unwrap();
        assert_eq!(loaded.address(), wallet.address());
        tokio::fs::remove_file(&path).await.unwrap();
        tokio::fs::remove_file(path.with_extension("pub")).await.unwrap();
    }
}
