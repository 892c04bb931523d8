use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use log::{debug, error};
use secp256k1::{generate_keypair, rand, PublicKey, SecretKey};

use crate::api::*;
use crate::clock::Clock;
use crate::eip712::{DecryptionDomain, UserDecryptAuthorization};
use crate::error::ProtocolError;
use crate::relay::{self, DecryptionRelay, MAX_DURATION_DAYS};
use crate::wallet::WalletSigner;

pub const DEFAULT_DURATION_DAYS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NotAuthorized,
    KeypairReady,
    MessageBuilt,
    Authorized,
    Completed,
    Failed,
}
impl Display for SessionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let output = match self {
            Self::NotAuthorized => "NotAuthorized",
            Self::KeypairReady => "KeypairReady",
            Self::MessageBuilt => "MessageBuilt",
            Self::Authorized => "Authorized",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
        };
        write!(f, "{}", output)
    }
}

/// One user decryption: an ephemeral keypair, the contracts it may read
/// from, the window the wallet signed for and the signature itself.
///
/// Each step is its own call and must come in order. The secret key is
/// dropped as soon as the relay round trip ends, whatever its outcome.
pub struct DecryptionSession {
    state: SessionState,
    contract_addresses: Vec<Address>,
    secret_key: Option<SecretKey>,
    public_key: Option<PublicKey>,
    domain: Option<DecryptionDomain>,
    authorization: Option<UserDecryptAuthorization>,
    signature: Option<WalletSignature>,
    signer: Option<Address>,
}
impl DecryptionSession {
    pub fn new(contract_addresses: Vec<Address>) -> Self {
        Self {
            state: SessionState::NotAuthorized,
            contract_addresses,
            secret_key: None,
            public_key: None,
            domain: None,
            authorization: None,
            signature: None,
            signer: None,
        }
    }
    pub fn state(&self) -> SessionState {
        self.state
    }
    pub fn authorization(&self) -> Option<&UserDecryptAuthorization> {
        self.authorization.as_ref()
    }
    pub fn has_secret_key(&self) -> bool {
        self.secret_key.is_some()
    }
    fn require_state(&self, expected: SessionState) -> Result<(), ProtocolError> {
        if self.state != expected {
            return Err(ProtocolError::InvalidSessionState {
                expected: expected.to_string(),
                actual: self.state.to_string(),
            });
        }
        Ok(())
    }
    fn fail(&mut self, e: ProtocolError) -> ProtocolError {
        error!("Decryption session failed: {}", e);
        self.secret_key = None;
        self.state = SessionState::Failed;
        e
    }

    pub fn generate_keypair(&mut self) -> Result<(), ProtocolError> {
        self.require_state(SessionState::NotAuthorized)?;
        let (secret_key, public_key) = generate_keypair(&mut rand::thread_rng());
        self.secret_key = Some(secret_key);
        self.public_key = Some(public_key);
        self.state = SessionState::KeypairReady;
        Ok(())
    }
    pub fn build_message(
        &mut self,
        domain: DecryptionDomain,
        contracts_chain_id: u64,
        start_timestamp: UnixSeconds,
        duration_days: u32,
    ) -> Result<&UserDecryptAuthorization, ProtocolError> {
        self.require_state(SessionState::KeypairReady)?;
        if duration_days == 0 || duration_days > MAX_DURATION_DAYS {
            return Err(self.fail(ProtocolError::InvalidInput(format!(
                "duration must be 1 to {} days, got {}",
                MAX_DURATION_DAYS, duration_days
            ))));
        }
        if self.contract_addresses.is_empty() {
            return Err(self.fail(ProtocolError::InvalidInput(
                "no contract in scope".to_string(),
            )));
        }
        let Some(public_key) = self.public_key else {
            return Err(self.fail(ProtocolError::InvalidSessionState {
                expected: SessionState::KeypairReady.to_string(),
                actual: "missing keypair".to_string(),
            }));
        };
        self.domain = Some(domain);
        self.state = SessionState::MessageBuilt;
        Ok(self.authorization.insert(UserDecryptAuthorization {
            public_key: public_key.serialize().to_vec(),
            contract_addresses: self.contract_addresses.clone(),
            contracts_chain_id,
            start_timestamp,
            duration_days,
        }))
    }
    pub async fn authorize(&mut self, wallet: &dyn WalletSigner) -> Result<(), ProtocolError> {
        self.require_state(SessionState::MessageBuilt)?;
        let (Some(domain), Some(authorization)) = (self.domain.clone(), self.authorization.clone())
        else {
            return Err(self.fail(ProtocolError::InvalidSessionState {
                expected: SessionState::MessageBuilt.to_string(),
                actual: "missing message".to_string(),
            }));
        };
        match wallet.sign_typed_data(&domain, &authorization).await {
            Ok(signature) => {
                self.signature = Some(signature);
                self.signer = Some(wallet.address());
                self.state = SessionState::Authorized;
                Ok(())
            }
            Err(ProtocolError::AuthorizationDenied(reason)) => {
                Err(self.fail(ProtocolError::AuthorizationDenied(reason)))
            }
            Err(e) => Err(self.fail(ProtocolError::AuthorizationDenied(e.to_string()))),
        }
    }
    /// Sends `pairs` to the relay and opens what comes back. Pairs whose
    /// contract is outside the signed scope are refused before any request.
    pub async fn submit(
        &mut self,
        relay: &dyn DecryptionRelay,
        pairs: &[HandleContractPair],
    ) -> Result<HashMap<Handle, ClearValue>, ProtocolError> {
        self.require_state(SessionState::Authorized)?;
        let (Some(authorization), Some(signature), Some(signer), Some(secret_key)) = (
            self.authorization.clone(),
            self.signature,
            self.signer,
            self.secret_key.take(),
        ) else {
            return Err(self.fail(ProtocolError::InvalidSessionState {
                expected: SessionState::Authorized.to_string(),
                actual: "incomplete session".to_string(),
            }));
        };
        if let Some(pair) = pairs.iter().find(|pair| !authorization.covers(pair)) {
            return Err(self.fail(ProtocolError::AuthorizationDenied(format!(
                "contract {} is outside the signed scope",
                pair.contract_address
            ))));
        }
        let request = UserDecryptRequest {
            handle_contract_pairs: pairs.to_vec(),
            public_key: hex::encode(&authorization.public_key),
            signature: signature.to_string(),
            contract_addresses: authorization.contract_addresses.clone(),
            user_address: signer,
            start_timestamp: authorization.start_timestamp.to_string(),
            duration_days: authorization.duration_days.to_string(),
        };
        let response = match relay.user_decrypt(request).await {
            Ok(response) => response,
            Err(e) => return Err(self.fail(e)),
        };
        let relay_public_key = match hex::decode(&response.relay_public_key)
            .ok()
            .and_then(|bytes| PublicKey::from_slice(&bytes).ok())
        {
            Some(key) => key,
            None => {
                return Err(self.fail(ProtocolError::DecryptionUnavailable(
                    "relay sent an invalid public key".to_string(),
                )))
            }
        };
        let mut values = HashMap::new();
        for entry in &response.entries {
            match relay::open(&secret_key, &relay_public_key, entry) {
                Ok(value) => {
                    values.insert(entry.handle, value);
                }
                Err(e) => {
                    return Err(self.fail(ProtocolError::MalformedPlaintext(format!(
                        "{}: {:#}",
                        entry.handle, e
                    ))))
                }
            }
        }
        self.state = SessionState::Completed;
        debug!("Decrypted {} handles", values.len());
        Ok(values)
    }
}

/// Interprets a decrypted value as `semantic_type`.
pub fn coerce(value: ClearValue, semantic_type: SemanticType) -> Result<ClearValue, ProtocolError> {
    let malformed = || {
        ProtocolError::MalformedPlaintext(format!("{} is not a valid {}", value, semantic_type))
    };
    match (semantic_type, value) {
        (SemanticType::Bool, ClearValue::Bool(v)) => Ok(ClearValue::Bool(v)),
        (SemanticType::Bool, ClearValue::U32(v)) if v <= 1 => Ok(ClearValue::Bool(v == 1)),
        (SemanticType::Bool, ClearValue::U64(v)) if v <= 1 => Ok(ClearValue::Bool(v == 1)),
        (SemanticType::U32, ClearValue::U32(v)) => Ok(ClearValue::U32(v)),
        (SemanticType::U32, ClearValue::U64(v)) => {
            u32::try_from(v).map(ClearValue::U32).map_err(|_| malformed())
        }
        (SemanticType::U64, ClearValue::U32(v)) => Ok(ClearValue::U64(v as u64)),
        (SemanticType::U64, ClearValue::U64(v)) => Ok(ClearValue::U64(v)),
        _ => Err(malformed()),
    }
}

/// Runs whole decryption sessions against one relay.
#[derive(Clone)]
pub struct Decryptor {
    relay: Arc<dyn DecryptionRelay>,
    domain: DecryptionDomain,
    contracts_chain_id: u64,
    duration_days: u32,
    clock: Clock,
}
impl Decryptor {
    pub fn new(
        relay: Arc<dyn DecryptionRelay>,
        domain: DecryptionDomain,
        contracts_chain_id: u64,
    ) -> Self {
        Self {
            relay,
            domain,
            contracts_chain_id,
            duration_days: DEFAULT_DURATION_DAYS,
            clock: Clock::default(),
        }
    }
    pub fn with_duration_days(mut self, duration_days: u32) -> Self {
        self.duration_days = duration_days;
        self
    }
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }
    /// Decrypts every pair under one wallet signature. Every requested
    /// handle must come back.
    pub async fn decrypt_batch(
        &self,
        pairs: &[HandleContractPair],
        wallet: &dyn WalletSigner,
    ) -> Result<HashMap<Handle, ClearValue>, ProtocolError> {
        if pairs.is_empty() {
            return Ok(HashMap::new());
        }
        let mut contracts: Vec<Address> = vec![];
        for pair in pairs {
            if !contracts.contains(&pair.contract_address) {
                contracts.push(pair.contract_address);
            }
        }
        let mut session = DecryptionSession::new(contracts);
        session.generate_keypair()?;
        session.build_message(
            self.domain.clone(),
            self.contracts_chain_id,
            self.clock.now(),
            self.duration_days,
        )?;
        session.authorize(wallet).await?;
        let values = session.submit(self.relay.as_ref(), pairs).await?;
        if let Some(missing) = pairs.iter().find(|pair| !values.contains_key(&pair.handle)) {
            return Err(ProtocolError::DecryptionUnavailable(format!(
                "relay returned no value for {}",
                missing.handle
            )));
        }
        Ok(values)
    }
    pub async fn decrypt_one(
        &self,
        handle: Handle,
        contract_address: Address,
        wallet: &dyn WalletSigner,
        semantic_type: SemanticType,
    ) -> Result<ClearValue, ProtocolError> {
        let pair = HandleContractPair {
            handle,
            contract_address,
        };
        let values = self.decrypt_batch(&[pair], wallet).await?;
        let value = values
            .get(&handle)
            .copied()
            .ok_or(ProtocolError::DecryptionUnavailable(format!(
                "relay returned no value for {}",
                handle
            )))?;
        coerce(value, semantic_type)
    }
}

#[cfg(test)]
mod test {
    use async_trait::async_trait;

    use super::*;
    use crate::fhe::MockCoprocessor;
    use crate::relay::LocalRelay;
    use crate::wallet::{LocalWallet, MAX_REQUEST_AGE_SECS};

    const CHAIN_ID: u64 = 11155111;

    struct RefusingWallet(Address);
    #[async_trait]
    impl WalletSigner for RefusingWallet {
        fn address(&self) -> Address {
            self.0
        }
        async fn sign_typed_data(
            &self,
            _: &DecryptionDomain,
            _: &UserDecryptAuthorization,
        ) -> Result<WalletSignature, ProtocolError> {
            Err(ProtocolError::AuthorizationDenied("user rejected".to_string()))
        }
        async fn sign_message(&self, _: &[u8]) -> Result<WalletSignature, ProtocolError> {
            Err(ProtocolError::AuthorizationDenied("user rejected".to_string()))
        }
    }

    struct Unreachable;
    #[async_trait]
    impl DecryptionRelay for Unreachable {
        async fn user_decrypt(
            &self,
            _: UserDecryptRequest,
        ) -> Result<UserDecryptResponse, ProtocolError> {
            Err(ProtocolError::DecryptionUnavailable("connection refused".to_string()))
        }
    }

    fn domain() -> DecryptionDomain {
        DecryptionDomain::new(55815, Address([0xd0; 20]))
    }

    fn setup() -> (MockCoprocessor, Decryptor, Address) {
        let fhe = MockCoprocessor::default();
        let relay = LocalRelay::new(fhe.clone(), domain(), CHAIN_ID, Clock::default());
        let decryptor = Decryptor::new(Arc::new(relay), domain(), CHAIN_ID);
        (fhe, decryptor, Address([0xc0; 20]))
    }

    fn owned(fhe: &MockCoprocessor, value: ClearValue, user: Address, contract: Address) -> Handle {
        let handle = fhe.trivial_encrypt(value);
        fhe.allow(&handle, user);
        fhe.allow(&handle, contract);
        handle
    }

    #[tokio::test]
    async fn state_machine_order() {
        let mut session = DecryptionSession::new(vec![Address([1; 20])]);
        assert_eq!(session.state(), SessionState::NotAuthorized);
        let err = session
            .build_message(domain(), CHAIN_ID, 0, 10)
            .err()
            .unwrap();
        assert_eq!(
            err,
            ProtocolError::InvalidSessionState {
                expected: "KeypairReady".to_string(),
                actual: "NotAuthorized".to_string()
            }
        );
        session.generate_keypair().unwrap();
        assert!(session.generate_keypair().is_err());
        let authorization = session
            .build_message(domain(), CHAIN_ID, 1_700_000_000, 10)
            .unwrap();
        assert_eq!(authorization.public_key.len(), 33);
        assert_eq!(session.state(), SessionState::MessageBuilt);
        let (_, decryptor, _) = setup();
        assert!(matches!(
            session.submit(decryptor.relay.as_ref(), &[]).await,
            Err(ProtocolError::InvalidSessionState { .. })
        ));
    }

    #[test]
    fn invalid_message_fails_the_session() {
        let mut session = DecryptionSession::new(vec![Address([1; 20])]);
        session.generate_keypair().unwrap();
        assert!(matches!(
            session.build_message(domain(), CHAIN_ID, 0, 0),
            Err(ProtocolError::InvalidInput(_))
        ));
        assert_eq!(session.state(), SessionState::Failed);
        assert!(!session.has_secret_key());

        let mut unscoped = DecryptionSession::new(vec![]);
        unscoped.generate_keypair().unwrap();
        assert!(matches!(
            unscoped.build_message(domain(), CHAIN_ID, 0, 10),
            Err(ProtocolError::InvalidInput(_))
        ));
        assert_eq!(unscoped.state(), SessionState::Failed);
        assert!(!unscoped.has_secret_key());
    }

    #[tokio::test]
    async fn batch_decrypts_own_handles_and_drops_the_key() {
        let (fhe, decryptor, contract) = setup();
        let wallet = LocalWallet::generate();
        let shares = owned(&fhe, ClearValue::U32(42), wallet.address(), contract);
        let direction = owned(&fhe, ClearValue::Bool(true), wallet.address(), contract);
        let pairs = [
            HandleContractPair {
                handle: shares,
                contract_address: contract,
            },
            HandleContractPair {
                handle: direction,
                contract_address: contract,
            },
        ];

        let mut session = DecryptionSession::new(vec![contract]);
        session.generate_keypair().unwrap();
        session
            .build_message(domain(), CHAIN_ID, Clock::default().now(), 10)
            .unwrap();
        session.authorize(&wallet).await.unwrap();
        let values = session
            .submit(decryptor.relay.as_ref(), &pairs)
            .await
            .unwrap();
        assert_eq!(session.state(), SessionState::Completed);
        assert!(!session.has_secret_key());
        assert_eq!(values[&shares], ClearValue::U32(42));
        assert_eq!(values[&direction], ClearValue::Bool(true));

        let single = decryptor
            .decrypt_one(shares, contract, &wallet, SemanticType::U64)
            .await
            .unwrap();
        assert_eq!(single, ClearValue::U64(42));
    }

    #[tokio::test]
    async fn foreign_handles_are_denied() {
        let (fhe, decryptor, contract) = setup();
        let alice = LocalWallet::generate();
        let bob = LocalWallet::generate();
        let secret = owned(&fhe, ClearValue::U32(7), alice.address(), contract);

        let err = decryptor
            .decrypt_one(secret, contract, &bob, SemanticType::U32)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ProtocolError::AuthorizationDenied(_)));

        // aggregate totals are only readable by the contract
        let total = fhe.trivial_encrypt(ClearValue::U64(100));
        fhe.allow(&total, contract);
        let err = decryptor
            .decrypt_one(total, contract, &alice, SemanticType::U64)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ProtocolError::AuthorizationDenied(_)));
    }

    #[tokio::test]
    async fn pairs_outside_scope_never_reach_the_relay() {
        let (fhe, _, contract) = setup();
        let wallet = LocalWallet::generate();
        let handle = owned(&fhe, ClearValue::U32(1), wallet.address(), contract);
        let mut session = DecryptionSession::new(vec![Address([0xee; 20])]);
        session.generate_keypair().unwrap();
        session
            .build_message(domain(), CHAIN_ID, Clock::default().now(), 10)
            .unwrap();
        session.authorize(&wallet).await.unwrap();
        let err = session
            .submit(
                &Unreachable,
                &[HandleContractPair {
                    handle,
                    contract_address: contract,
                }],
            )
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ProtocolError::AuthorizationDenied(_)));
        assert_eq!(session.state(), SessionState::Failed);
        assert!(!session.has_secret_key());
    }

    #[tokio::test]
    async fn refusal_and_unavailability() {
        let (fhe, decryptor, contract) = setup();
        let wallet = LocalWallet::generate();
        let handle = owned(&fhe, ClearValue::U32(1), wallet.address(), contract);
        let err = decryptor
            .decrypt_one(handle, contract, &RefusingWallet(wallet.address()), SemanticType::U32)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ProtocolError::AuthorizationDenied(_)));

        let offline = Decryptor::new(Arc::new(Unreachable), domain(), CHAIN_ID);
        let err = offline
            .decrypt_one(handle, contract, &wallet, SemanticType::U32)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ProtocolError::DecryptionUnavailable(_)));

        // unknown ciphertext is omitted by the relay
        let ghost = Handle::from_digest([9; 32], FheType::U32);
        fhe.allow(&ghost, wallet.address());
        fhe.allow(&ghost, contract);
        let err = decryptor
            .decrypt_one(ghost, contract, &wallet, SemanticType::U32)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ProtocolError::DecryptionUnavailable(_)));
    }

    #[tokio::test]
    async fn expired_authorization_is_denied() {
        let fhe = MockCoprocessor::default();
        let clock = Clock::default();
        clock.set(1_700_000_000);
        let relay = LocalRelay::new(fhe.clone(), domain(), CHAIN_ID, clock.clone());
        let decryptor = Decryptor::new(Arc::new(relay), domain(), CHAIN_ID)
            .with_duration_days(1)
            .with_clock(Clock::default());
        let wallet = LocalWallet::generate();
        let contract = Address([0xc0; 20]);
        let handle = owned(&fhe, ClearValue::U32(1), wallet.address(), contract);
        // signed "now" by the wallet, long after the relay's pinned clock
        let err = decryptor
            .decrypt_one(handle, contract, &wallet, SemanticType::U32)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ProtocolError::AuthorizationDenied(_)));
    }

    #[tokio::test]
    async fn client_clock_may_run_slightly_ahead() {
        let fhe = MockCoprocessor::default();
        let relay_clock = Clock::default();
        relay_clock.set(1_700_000_000);
        let relay = Arc::new(LocalRelay::new(
            fhe.clone(),
            domain(),
            CHAIN_ID,
            relay_clock,
        ));
        let wallet = LocalWallet::generate();
        let contract = Address([0xc0; 20]);
        let handle = owned(&fhe, ClearValue::U32(7), wallet.address(), contract);

        let client_clock = Clock::default();
        client_clock.set(1_700_000_060);
        let ahead = Decryptor::new(relay.clone(), domain(), CHAIN_ID).with_clock(client_clock);
        assert_eq!(
            ahead
                .decrypt_one(handle, contract, &wallet, SemanticType::U32)
                .await
                .unwrap(),
            ClearValue::U32(7)
        );

        let far_clock = Clock::default();
        far_clock.set(1_700_000_000 + MAX_REQUEST_AGE_SECS + 1);
        let far = Decryptor::new(relay, domain(), CHAIN_ID).with_clock(far_clock);
        assert!(matches!(
            far.decrypt_one(handle, contract, &wallet, SemanticType::U32)
                .await,
            Err(ProtocolError::AuthorizationDenied(_))
        ));
    }

    #[test]
    fn coercion() {
        assert_eq!(
            coerce(ClearValue::U64(1), SemanticType::Bool).unwrap(),
            ClearValue::Bool(true)
        );
        assert_eq!(
            coerce(ClearValue::U64(u32::MAX as u64), SemanticType::U32).unwrap(),
            ClearValue::U32(u32::MAX)
        );
        assert!(matches!(
            coerce(ClearValue::U64(u32::MAX as u64 + 1), SemanticType::U32),
            Err(ProtocolError::MalformedPlaintext(_))
        ));
        assert!(matches!(
            coerce(ClearValue::U32(2), SemanticType::Bool),
            Err(ProtocolError::MalformedPlaintext(_))
        ));
        assert!(matches!(
            coerce(ClearValue::Bool(true), SemanticType::U64),
            Err(ProtocolError::MalformedPlaintext(_))
        ));
    }
}
