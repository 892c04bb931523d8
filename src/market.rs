use std::sync::Arc;

use anyhow::Result;
use log::{debug, info};

use crate::api::*;
use crate::clock::Clock;
use crate::encoder::{build_encrypted_bet, required_payment, validate_event_dates};
use crate::error::ProtocolError;
use crate::fhe::BackendCell;
use crate::ledger::ContractGateway;
use crate::registry::{event_status, EventRegistry, FetchReport};
use crate::rewards::{available_actions, RewardAction, RewardReconciler};
use crate::session::{coerce, Decryptor};
use crate::wallet::WalletSigner;

/// A bet with its shares and direction decrypted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevealedBet {
    pub shares: u32,
    pub direction: bool,
}

/// Everything one user does against one prediction market contract.
pub struct Market {
    gateway: ContractGateway,
    backend: &'static BackendCell,
    decryptor: Decryptor,
    registry: EventRegistry,
    rewards: RewardReconciler,
    wallet: Option<Arc<dyn WalletSigner>>,
    clock: Clock,
}
impl Market {
    pub fn new(gateway: ContractGateway, backend: &'static BackendCell, decryptor: Decryptor) -> Self {
        Self {
            registry: EventRegistry::new(gateway.clone()),
            rewards: RewardReconciler::new(gateway.clone()),
            gateway,
            backend,
            decryptor,
            wallet: None,
            clock: Clock::default(),
        }
    }
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }
    pub fn connect(&mut self, wallet: Arc<dyn WalletSigner>) {
        debug!("Wallet {} connected", wallet.address());
        self.wallet = Some(wallet);
    }
    pub fn disconnect(&mut self) {
        self.wallet = None;
    }
    pub fn address(&self) -> Option<Address> {
        self.wallet.as_ref().map(|wallet| wallet.address())
    }
    fn wallet(&self) -> Result<&dyn WalletSigner, ProtocolError> {
        self.wallet
            .as_deref()
            .ok_or(ProtocolError::WalletNotConnected)
    }
    pub fn gateway(&self) -> &ContractGateway {
        &self.gateway
    }
    pub fn rewards(&self) -> &RewardReconciler {
        &self.rewards
    }

    pub async fn refresh_events(&mut self) -> Result<FetchReport, ProtocolError> {
        self.registry.fetch_all().await
    }
    pub fn events(&self) -> &[PredictionEvent] {
        self.registry.events()
    }
    pub fn status(&self, event: &PredictionEvent) -> EventStatus {
        event_status(event, self.clock.now())
    }

    pub async fn owner(&self) -> Result<Address> {
        self.gateway.read_owner().await
    }
    pub async fn create_event(
        &self,
        description: String,
        start_time: UnixSeconds,
        end_time: UnixSeconds,
        price_yes: Wei,
        price_no: Wei,
    ) -> Result<TxReceipt> {
        let wallet = self.wallet()?;
        if description.trim().is_empty() {
            return Err(ProtocolError::InvalidInput("description is empty".to_string()).into());
        }
        if price_yes == 0 || price_no == 0 {
            return Err(ProtocolError::InvalidInput("prices must be positive".to_string()).into());
        }
        validate_event_dates(start_time, end_time, self.clock.now())?;
        let receipt = self
            .gateway
            .write_create_event(
                wallet,
                CreateEventRequest {
                    description,
                    start_time,
                    end_time,
                    price_yes,
                    price_no,
                },
            )
            .await?;
        info!("Created event, tx {}", receipt.tx_hash);
        Ok(receipt)
    }
    pub async fn resolve_event(&self, event_id: EventId, outcome: bool) -> Result<TxReceipt> {
        let wallet = self.wallet()?;
        self.gateway
            .write_resolve_event(wallet, event_id, outcome)
            .await
    }

    /// Encrypts `shares` and `direction` for this contract and wallet and
    /// sends them with the payment in one call. Whether the ledger accepted
    /// the bet is only visible through `last_error`.
    pub async fn place_bet(&self, event_id: EventId, shares: u32, direction: bool) -> Result<TxReceipt> {
        let wallet = self.wallet()?;
        let backend = self.backend.get_instance()?;
        if shares == 0 {
            return Err(ProtocolError::InvalidInput("shares must be positive".to_string()).into());
        }
        let event = self.gateway.read_event(event_id).await?;
        let value = required_payment(&event, shares, direction)?;
        let bet = build_encrypted_bet(
            backend,
            self.gateway.contract_address(),
            wallet.address(),
            shares,
            direction,
        )
        .await?;
        debug!(
            "Placing bet on event {} paying {} ether",
            event_id,
            format_ether(value, 6)
        );
        self.gateway
            .write_place_bet(
                wallet,
                event_id,
                bet.shares_handle,
                bet.direction_handle,
                bet.input_proof,
                value,
            )
            .await
    }

    /// Decrypts one of the wallet's own values. Aggregate totals of known
    /// events are refused here, they belong to the contract alone.
    pub async fn decrypt(&self, handle: Handle, semantic_type: SemanticType) -> Result<ClearValue> {
        let wallet = self.wallet()?;
        if self
            .registry
            .events()
            .iter()
            .any(|event| event.total_yes_handle == handle || event.total_no_handle == handle)
        {
            return Err(ProtocolError::AuthorizationDenied(format!(
                "{} is an aggregate total",
                handle
            ))
            .into());
        }
        Ok(self
            .decryptor
            .decrypt_one(
                handle,
                self.gateway.contract_address(),
                wallet,
                semantic_type,
            )
            .await?)
    }
    pub async fn reveal_bet(&self, event_id: EventId) -> Result<RevealedBet> {
        let wallet = self.wallet()?;
        let bet = self.gateway.read_bet(event_id, wallet.address()).await?;
        let mut revealed = self.reveal_bets(&[bet]).await?;
        Ok(revealed.remove(0).1)
    }
    /// Reveals several bets under a single wallet signature.
    pub async fn reveal_bets(&self, bets: &[Bet]) -> Result<Vec<(Bet, RevealedBet)>> {
        let wallet = self.wallet()?;
        if let Some(bet) = bets.iter().find(|bet| !bet.placed) {
            return Err(ProtocolError::InvalidInput(format!(
                "no bet placed on event {}",
                bet.event_id
            ))
            .into());
        }
        let contract_address = self.gateway.contract_address();
        let pairs: Vec<HandleContractPair> = bets
            .iter()
            .flat_map(|bet| [bet.shares_handle, bet.direction_handle])
            .map(|handle| HandleContractPair {
                handle,
                contract_address,
            })
            .collect();
        let values = self.decryptor.decrypt_batch(&pairs, wallet).await?;
        let value = |handle: &Handle, semantic_type: SemanticType| {
            values
                .get(handle)
                .copied()
                .ok_or(ProtocolError::DecryptionUnavailable(format!(
                    "relay returned no value for {}",
                    handle
                )))
                .and_then(|value| coerce(value, semantic_type))
        };
        let mut revealed = vec![];
        for bet in bets {
            let shares = value(&bet.shares_handle, SemanticType::U32)?;
            let direction = value(&bet.direction_handle, SemanticType::Bool)?;
            revealed.push((
                bet.clone(),
                RevealedBet {
                    shares: shares.as_u64() as u32,
                    direction: direction.as_u64() == 1,
                },
            ));
        }
        Ok(revealed)
    }
    /// Placed bets of the wallet over the events loaded so far.
    pub async fn my_bets(&self) -> Result<Vec<Bet>> {
        let wallet = self.wallet()?;
        self.registry.user_bets(wallet.address()).await
    }

    pub async fn last_error(&self) -> Result<(LedgerErrorCode, UnixSeconds)> {
        let wallet = self.wallet()?;
        self.rewards.last_error_code(wallet, &self.decryptor).await
    }
    pub async fn reward_info(&self, event_id: EventId) -> Result<RewardInfo> {
        let wallet = self.wallet()?;
        self.rewards
            .get_reward_info(event_id, wallet.address())
            .await
    }
    pub async fn actions(&self, event_id: EventId) -> Result<Vec<RewardAction>> {
        let wallet = self.wallet()?;
        let event = self.gateway.read_event(event_id).await?;
        let bet = self.gateway.read_bet(event_id, wallet.address()).await?;
        let reward = self
            .rewards
            .get_reward_info(event_id, wallet.address())
            .await?;
        Ok(available_actions(&event, &bet, &reward))
    }
    pub async fn claim(&self, event_id: EventId) -> Result<TxReceipt> {
        let wallet = self.wallet()?;
        let event = self.gateway.read_event(event_id).await?;
        self.rewards.claim(wallet, &event).await
    }
    pub async fn withdraw(&self, event_id: EventId) -> Result<TxReceipt> {
        let wallet = self.wallet()?;
        self.rewards.withdraw(wallet, event_id).await
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::eip712::DecryptionDomain;
    use crate::error::protocol_error;
    use crate::fhe::{MockCoprocessor, SharedBackend};
    use crate::ledger::DevLedger;
    use crate::relay::LocalRelay;
    use crate::wallet::LocalWallet;

    const CHAIN_ID: u64 = 31337;
    const NOW: UnixSeconds = 1_700_000_000;
    const PRICE: Wei = 100_000_000_000_000_000;

    struct Devnet {
        ledger: Arc<DevLedger>,
        gateway: ContractGateway,
        backend: &'static BackendCell,
        decryptor: Decryptor,
        clock: Clock,
        owner: Arc<LocalWallet>,
    }
    impl Devnet {
        async fn new() -> Self {
            let owner = Arc::new(LocalWallet::generate());
            let fhe = MockCoprocessor::default();
            let clock = Clock::default();
            clock.set(NOW);
            let ledger = Arc::new(
                DevLedger::new(
                    None,
                    owner.address(),
                    Address([0xc0; 20]),
                    fhe.clone(),
                    clock.clone(),
                )
                .await
                .unwrap(),
            );
            let domain = DecryptionDomain::new(CHAIN_ID, Address([0xd0; 20]));
            let relay = LocalRelay::new(fhe.clone(), domain.clone(), CHAIN_ID, clock.clone());
            let decryptor =
                Decryptor::new(Arc::new(relay), domain, CHAIN_ID).with_clock(clock.clone());
            let backend: &'static BackendCell = Box::leak(Box::new(BackendCell::new()));
            backend
                .initialize(|| async move { Ok(Arc::new(fhe) as SharedBackend) })
                .await
                .unwrap();
            Self {
                gateway: ContractGateway::new(ledger.clone()),
                ledger,
                backend,
                decryptor,
                clock,
                owner,
            }
        }
        fn market(&self, wallet: Arc<LocalWallet>) -> Market {
            let mut market = Market::new(self.gateway.clone(), self.backend, self.decryptor.clone())
                .with_clock(self.clock.clone());
            market.connect(wallet);
            market
        }
        async fn event(&self, price_yes: Wei, price_no: Wei) -> EventId {
            let market = self.market(self.owner.clone());
            market
                .create_event(
                    "Will it rain tomorrow?".to_string(),
                    NOW,
                    NOW + 600,
                    price_yes,
                    price_no,
                )
                .await
                .unwrap();
            market.gateway().read_event_count().await.unwrap() - 1
        }
    }

    #[tokio::test]
    async fn preconditions_are_checked_locally() {
        let devnet = Devnet::new().await;
        let event_id = devnet.event(PRICE, PRICE).await;

        let market = Market::new(
            devnet.gateway.clone(),
            devnet.backend,
            devnet.decryptor.clone(),
        );
        let err = market.place_bet(event_id, 1, true).await.unwrap_err();
        assert_eq!(protocol_error(&err), Some(&ProtocolError::WalletNotConnected));

        let uninitialized: &'static BackendCell = Box::leak(Box::new(BackendCell::new()));
        let mut market = Market::new(devnet.gateway.clone(), uninitialized, devnet.decryptor.clone());
        market.connect(Arc::new(LocalWallet::generate()));
        let err = market.place_bet(event_id, 1, true).await.unwrap_err();
        assert_eq!(
            protocol_error(&err),
            Some(&ProtocolError::UninitializedEncryptionBackend)
        );
        market.disconnect();
        assert_eq!(market.address(), None);

        let market = devnet.market(devnet.owner.clone());
        let err = market
            .create_event("Too short".to_string(), NOW, NOW + 60, PRICE, PRICE)
            .await
            .unwrap_err();
        assert!(matches!(
            protocol_error(&err),
            Some(ProtocolError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn encrypt_place_and_decrypt_round_trip() {
        let devnet = Devnet::new().await;
        let event_id = devnet.event(1, 1).await;
        let alice = devnet.market(Arc::new(LocalWallet::generate()));

        alice.place_bet(event_id, u32::MAX, true).await.unwrap();
        assert_eq!(
            alice.reveal_bet(event_id).await.unwrap(),
            RevealedBet {
                shares: u32::MAX,
                direction: true
            }
        );
        assert_eq!(alice.last_error().await.unwrap().0, LedgerErrorCode::NoError);

        let bet = devnet
            .gateway
            .read_bet(event_id, alice.address().unwrap())
            .await
            .unwrap();
        assert!(bet.placed);
        assert_eq!(bet.actual_eth_amount, u32::MAX as Wei);
    }

    #[tokio::test]
    async fn batch_reveal_and_my_bets() {
        let devnet = Devnet::new().await;
        let first = devnet.event(PRICE, PRICE).await;
        let second = devnet.event(PRICE, 2 * PRICE).await;
        let mut alice = devnet.market(Arc::new(LocalWallet::generate()));
        alice.place_bet(first, 3, true).await.unwrap();
        alice.place_bet(second, 7, false).await.unwrap();

        alice.refresh_events().await.unwrap();
        let bets = alice.my_bets().await.unwrap();
        assert_eq!(
            bets.iter().map(|bet| bet.event_id).collect::<Vec<_>>(),
            vec![second, first]
        );
        assert_eq!(bets[0].actual_eth_amount, 14 * PRICE);
        let revealed = alice.reveal_bets(&bets).await.unwrap();
        assert_eq!(
            revealed[0].1,
            RevealedBet {
                shares: 7,
                direction: false
            }
        );
        assert_eq!(
            revealed[1].1,
            RevealedBet {
                shares: 3,
                direction: true
            }
        );
    }

    #[tokio::test]
    async fn foreign_and_aggregate_handles_are_denied() {
        let devnet = Devnet::new().await;
        let event_id = devnet.event(PRICE, PRICE).await;
        let alice = devnet.market(Arc::new(LocalWallet::generate()));
        let mut bob = devnet.market(Arc::new(LocalWallet::generate()));
        alice.place_bet(event_id, 2, true).await.unwrap();

        let alice_bet = devnet
            .gateway
            .read_bet(event_id, alice.address().unwrap())
            .await
            .unwrap();
        let err = bob
            .decrypt(alice_bet.shares_handle, SemanticType::U32)
            .await
            .unwrap_err();
        assert!(matches!(
            protocol_error(&err),
            Some(ProtocolError::AuthorizationDenied(_))
        ));

        bob.refresh_events().await.unwrap();
        let totals = bob.events()[0].total_yes_handle;
        let err = bob.decrypt(totals, SemanticType::U64).await.unwrap_err();
        assert!(matches!(
            protocol_error(&err),
            Some(ProtocolError::AuthorizationDenied(_))
        ));

        let err = bob.reveal_bet(event_id).await.unwrap_err();
        assert!(matches!(
            protocol_error(&err),
            Some(ProtocolError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn status_follows_clock_and_resolution() {
        let devnet = Devnet::new().await;
        let owner = devnet.market(devnet.owner.clone());
        owner
            .create_event("Later".to_string(), NOW + 100, NOW + 1000, PRICE, PRICE)
            .await
            .unwrap();
        let mut market = devnet.market(Arc::new(LocalWallet::generate()));
        market.refresh_events().await.unwrap();
        let event = market.events()[0].clone();
        assert_eq!(market.status(&event), EventStatus::Upcoming);
        devnet.clock.set(NOW + 100);
        assert_eq!(market.status(&event), EventStatus::Active);
        devnet.clock.set(NOW + 1000);
        assert_eq!(market.status(&event), EventStatus::Active);
        devnet.clock.set(NOW + 1001);
        assert_eq!(market.status(&event), EventStatus::Ended);

        owner.resolve_event(event.id, false).await.unwrap();
        market.refresh_events().await.unwrap();
        let event = market.events()[0].clone();
        assert_eq!(market.status(&event), EventStatus::Resolved);
        devnet.clock.set(NOW);
        assert_eq!(market.status(&event), EventStatus::Resolved);
    }

    #[tokio::test]
    async fn second_bet_reports_already_bet() {
        let devnet = Devnet::new().await;
        let event_id = devnet.event(PRICE, PRICE).await;
        let alice = devnet.market(Arc::new(LocalWallet::generate()));
        alice.place_bet(event_id, 2, true).await.unwrap();
        let receipt = alice.place_bet(event_id, 5, false).await.unwrap();
        assert!(receipt.logs.is_empty());
        assert_eq!(alice.last_error().await.unwrap().0, LedgerErrorCode::AlreadyBet);
        assert_eq!(
            alice.reveal_bet(event_id).await.unwrap(),
            RevealedBet {
                shares: 2,
                direction: true
            }
        );
        let event = devnet.gateway.read_event(event_id).await.unwrap();
        assert_eq!(event.total_eth_pool, 2 * PRICE);
    }

    #[tokio::test]
    async fn reward_lifecycle() {
        let devnet = Devnet::new().await;
        let event_id = devnet.event(PRICE, PRICE).await;
        let owner = devnet.market(devnet.owner.clone());
        let alice = devnet.market(Arc::new(LocalWallet::generate()));
        let bob = devnet.market(Arc::new(LocalWallet::generate()));
        alice.place_bet(event_id, 2, true).await.unwrap();
        bob.place_bet(event_id, 1, false).await.unwrap();

        let err = alice.claim(event_id).await.unwrap_err();
        assert!(matches!(
            protocol_error(&err),
            Some(ProtocolError::ClaimNotReady(_))
        ));

        devnet.clock.advance(601);
        owner.resolve_event(event_id, true).await.unwrap();
        devnet.ledger.fulfill_decryptions().await.unwrap();
        let event = devnet.gateway.read_event(event_id).await.unwrap();
        assert_eq!((event.decrypted_yes, event.decrypted_no), (2, 1));

        assert_eq!(alice.reward_info(event_id).await.unwrap(), RewardInfo::default());
        assert_eq!(alice.actions(event_id).await.unwrap(), vec![RewardAction::Claim]);

        alice.claim(event_id).await.unwrap();
        let logs = devnet.ledger.fulfill_decryptions().await.unwrap();
        assert_eq!(
            logs,
            vec![LedgerLog::RewardCalculated {
                event_id,
                user: alice.address().unwrap(),
                amount: 3 * PRICE
            }]
        );
        assert_eq!(alice.last_error().await.unwrap().0, LedgerErrorCode::NoError);
        let claimed = alice.reward_info(event_id).await.unwrap();
        assert!(claimed.claimed && !claimed.withdrawn);
        assert_eq!(claimed.pending_amount, 3 * PRICE);
        assert_eq!(claimed.original_amount, claimed.pending_amount);
        assert_eq!(alice.actions(event_id).await.unwrap(), vec![RewardAction::Withdraw]);

        let receipt = alice.withdraw(event_id).await.unwrap();
        assert_eq!(
            receipt.logs,
            vec![LedgerLog::RewardWithdrawn {
                event_id,
                user: alice.address().unwrap(),
                amount: 3 * PRICE
            }]
        );
        let withdrawn = alice.reward_info(event_id).await.unwrap();
        assert!(withdrawn.claimed && withdrawn.withdrawn);
        assert_eq!(withdrawn.pending_amount, 0);
        assert_eq!(withdrawn.original_amount, 3 * PRICE);
        assert!(alice.actions(event_id).await.unwrap().is_empty());

        bob.claim(event_id).await.unwrap();
        devnet.ledger.fulfill_decryptions().await.unwrap();
        assert_eq!(bob.last_error().await.unwrap().0, LedgerErrorCode::NoWinnings);
        assert_eq!(bob.reward_info(event_id).await.unwrap().pending_amount, 0);
    }
}
