use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use log::{debug, info, trace};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{query, Executor, Row, SqlitePool};
use tokio::sync::Mutex;

use super::Ledger;
use crate::api::*;
use crate::clock::Clock;
use crate::fhe::MockCoprocessor;
use crate::wallet::WalletSigner;

/// In-process prediction-market ledger for development and tests.
///
/// Public state lives in SQLite, encrypted state behind handles in the mock
/// coprocessor. Aggregate and reward decryptions are queued and only land
/// when `fulfill_decryptions` runs, like an oracle callback would.
pub struct DevLedger {
    connection: SqlitePool,
    fhe: MockCoprocessor,
    clock: Clock,
    contract: Address,
    tx_nonce: AtomicU64,
    write_lock: Mutex<()>,
}

fn parse_wei(row: &SqliteRow, column: &str) -> Result<Wei> {
    let value: String = row.try_get(column)?;
    value
        .parse::<Wei>()
        .with_context(|| format!("bad wei value in {}", column))
}
fn parse_handle(row: &SqliteRow, column: &str) -> Result<Handle> {
    let value: String = row.try_get(column)?;
    Handle::from_str(&value)
}
fn parse_u64(row: &SqliteRow, column: &str) -> Result<u64> {
    let value: String = row.try_get(column)?;
    Ok(value.parse::<u64>()?)
}

/// The winner's part of the whole pool, divided last so nothing is lost
/// per share.
fn reward_amount(event: &PredictionEvent, winning_shares: u64) -> Result<Wei> {
    let winning_total = if event.outcome {
        event.decrypted_yes
    } else {
        event.decrypted_no
    };
    if winning_total == 0 {
        return Ok(0);
    }
    let stake = event
        .total_eth_pool
        .checked_mul(winning_shares as Wei)
        .context("reward overflow")?;
    Ok(stake / winning_total as Wei)
}

impl DevLedger {
    /// Opens the ledger on `db` (a SQLite file) or in memory, with `owner`
    /// as the only account allowed to create and resolve events.
    pub async fn new(
        db: Option<&str>,
        owner: Address,
        contract: Address,
        fhe: MockCoprocessor,
        clock: Clock,
    ) -> Result<Self> {
        let url = match db {
            Some(path) => format!("sqlite://{}?mode=rwc", path),
            None => "sqlite::memory:".to_string(),
        };
        // a single long lived connection, an in-memory database dies with it
        let connection = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect(&url)
            .await
            .with_context(|| format!("couldn't open ledger database {}", url))?;
        connection
            .execute(
                "CREATE TABLE IF NOT EXISTS events (\
                id INTEGER PRIMARY KEY,\
                description NOT NULL,\
                start_time NOT NULL,\
                end_time NOT NULL,\
                price_yes NOT NULL,\
                price_no NOT NULL,\
                resolved NOT NULL DEFAULT FALSE,\
                outcome NOT NULL DEFAULT FALSE,\
                total_eth_pool NOT NULL DEFAULT '0',\
                total_yes_handle NOT NULL,\
                total_no_handle NOT NULL,\
                decrypted_yes NOT NULL DEFAULT '0',\
                decrypted_no NOT NULL DEFAULT '0',\
                decryption_done NOT NULL DEFAULT FALSE\
                )",
            )
            .await?;
        connection
            .execute(
                "CREATE TABLE IF NOT EXISTS bets (\
                event_id NOT NULL,\
                bettor NOT NULL,\
                shares_handle NOT NULL,\
                direction_handle NOT NULL,\
                effective_shares_handle NOT NULL,\
                claimed NOT NULL DEFAULT FALSE,\
                actual_eth_amount NOT NULL,\
                PRIMARY KEY (event_id,bettor)\
                )",
            )
            .await?;
        connection
            .execute(
                "CREATE TABLE IF NOT EXISTS rewards (\
                event_id NOT NULL,\
                user NOT NULL,\
                winning_shares_handle NOT NULL,\
                pending_amount NOT NULL DEFAULT '0',\
                original_amount NOT NULL DEFAULT '0',\
                claimed NOT NULL DEFAULT FALSE,\
                withdrawn NOT NULL DEFAULT FALSE,\
                PRIMARY KEY (event_id,user)\
                )",
            )
            .await?;
        connection
            .execute(
                "CREATE TABLE IF NOT EXISTS last_errors (\
                user PRIMARY KEY,\
                handle NOT NULL,\
                timestamp NOT NULL\
                )",
            )
            .await?;
        connection
            .execute(
                "CREATE TABLE IF NOT EXISTS pending_decryptions (\
                id INTEGER PRIMARY KEY AUTOINCREMENT,\
                kind NOT NULL,\
                event_id NOT NULL,\
                user\
                )",
            )
            .await?;
        connection
            .execute(
                "CREATE TABLE IF NOT EXISTS meta (\
                key PRIMARY KEY,\
                value NOT NULL\
                )",
            )
            .await?;
        connection
            .execute(
                query("INSERT OR IGNORE INTO meta (key, value) VALUES ('owner', ?)")
                    .bind(owner.to_string()),
            )
            .await?;
        info!("Dev ledger {} ready, owner {}", contract, owner);
        Ok(Self {
            connection,
            fhe,
            clock,
            contract,
            tx_nonce: AtomicU64::new(0),
            write_lock: Mutex::new(()),
        })
    }
    pub fn clock(&self) -> &Clock {
        &self.clock
    }
    pub fn coprocessor(&self) -> &MockCoprocessor {
        &self.fhe
    }

    fn receipt(&self, logs: Vec<LedgerLog>) -> TxReceipt {
        let nonce = self.tx_nonce.fetch_add(1, Ordering::SeqCst);
        let mut preimage = b"tx".to_vec();
        preimage.extend_from_slice(&self.contract.0);
        preimage.extend_from_slice(&nonce.to_be_bytes());
        TxReceipt {
            tx_hash: TxHash(keccak256(&preimage)),
            logs,
        }
    }
    async fn require_owner(&self, from: Address) -> Result<()> {
        if self.read_owner().await? != from {
            debug!("{} tried an owner-only call", from);
            bail!("Only owner can call this function")
        }
        Ok(())
    }
    /// Grants both the user and this contract access to `handle`.
    fn allow_user(&self, handle: &Handle, user: Address) {
        self.fhe.allow(handle, user);
        self.fhe.allow(handle, self.contract);
    }
    async fn set_last_error(&self, user: Address, code: LedgerErrorCode) -> Result<()> {
        let handle = self.fhe.trivial_encrypt(ClearValue::U32(code.code()));
        self.store_last_error(user, handle).await
    }
    async fn store_last_error(&self, user: Address, handle: Handle) -> Result<()> {
        self.allow_user(&handle, user);
        self.connection
            .execute(
                query(
                    "INSERT INTO last_errors (user, handle, timestamp) VALUES (?,?,?) \
                    ON CONFLICT(user) DO UPDATE SET handle = excluded.handle, timestamp = excluded.timestamp",
                )
                .bind(user.to_string())
                .bind(handle.to_string())
                .bind(self.clock.now()),
            )
            .await?;
        Ok(())
    }

    async fn read_owner(&self) -> Result<Address> {
        let row = self
            .connection
            .fetch_one(query("SELECT value FROM meta WHERE key = 'owner'"))
            .await
            .context("ledger has no owner")?;
        Address::from_str(&row.try_get::<String, _>("value")?)
    }
    async fn read_event(&self, event_id: EventId) -> Result<PredictionEvent> {
        let row = self
            .connection
            .fetch_optional(query("SELECT * FROM events WHERE id = ?").bind(event_id as i64))
            .await?;
        let Some(row) = row else {
            bail!("Event does not exist")
        };
        Ok(PredictionEvent {
            id: row.try_get::<i64, _>("id")? as EventId,
            description: row.try_get("description")?,
            start_time: row.try_get("start_time")?,
            end_time: row.try_get("end_time")?,
            price_yes: parse_wei(&row, "price_yes")?,
            price_no: parse_wei(&row, "price_no")?,
            resolved: row.try_get("resolved")?,
            outcome: row.try_get("outcome")?,
            total_eth_pool: parse_wei(&row, "total_eth_pool")?,
            total_yes_handle: parse_handle(&row, "total_yes_handle")?,
            total_no_handle: parse_handle(&row, "total_no_handle")?,
            decrypted_yes: parse_u64(&row, "decrypted_yes")?,
            decrypted_no: parse_u64(&row, "decrypted_no")?,
            decryption_done: row.try_get("decryption_done")?,
        })
    }
    /// The stored bet and its effective share handle.
    async fn read_bet(&self, event_id: EventId, user: Address) -> Result<Option<(Bet, Handle)>> {
        let row = self
            .connection
            .fetch_optional(
                query("SELECT * FROM bets WHERE event_id = ? AND bettor = ?")
                    .bind(event_id as i64)
                    .bind(user.to_string()),
            )
            .await?;
        let Some(row) = row else { return Ok(None) };
        let bet = Bet {
            event_id,
            bettor: user,
            shares_handle: parse_handle(&row, "shares_handle")?,
            direction_handle: parse_handle(&row, "direction_handle")?,
            placed: true,
            claimed: row.try_get("claimed")?,
            actual_eth_amount: parse_wei(&row, "actual_eth_amount")?,
        };
        Ok(Some((bet, parse_handle(&row, "effective_shares_handle")?)))
    }
    async fn read_reward(&self, event_id: EventId, user: Address) -> Result<RewardInfo> {
        let row = self
            .connection
            .fetch_optional(
                query("SELECT * FROM rewards WHERE event_id = ? AND user = ?")
                    .bind(event_id as i64)
                    .bind(user.to_string()),
            )
            .await?;
        match row {
            None => Ok(RewardInfo::default()),
            Some(row) => Ok(RewardInfo {
                pending_amount: parse_wei(&row, "pending_amount")?,
                original_amount: parse_wei(&row, "original_amount")?,
                claimed: row.try_get("claimed")?,
                withdrawn: row.try_get("withdrawn")?,
            }),
        }
    }

    pub async fn create_event_from(
        &self,
        from: Address,
        request: CreateEventRequest,
    ) -> Result<TxReceipt> {
        let _guard = self.write_lock.lock().await;
        self.require_owner(from).await?;
        if request.end_time <= request.start_time {
            bail!("End time must be after start time")
        }
        if request.price_yes > u64::MAX as Wei || request.price_no > u64::MAX as Wei {
            bail!("Price does not fit in euint64")
        }
        let total_yes = self.fhe.trivial_encrypt(ClearValue::U64(0));
        let total_no = self.fhe.trivial_encrypt(ClearValue::U64(0));
        self.fhe.allow(&total_yes, self.contract);
        self.fhe.allow(&total_no, self.contract);
        let count: i64 = self
            .connection
            .fetch_one(query("SELECT COUNT(*) AS count FROM events"))
            .await?
            .try_get("count")?;
        let event_id = count as EventId;
        self.connection
            .execute(
                query(
                    "INSERT INTO events (\
                    id,\
                    description,\
                    start_time,\
                    end_time,\
                    price_yes,\
                    price_no,\
                    total_yes_handle,\
                    total_no_handle)\
                    VALUES (?,?,?,?,?,?,?,?)",
                )
                .bind(event_id as i64)
                .bind(request.description.clone())
                .bind(request.start_time)
                .bind(request.end_time)
                .bind(request.price_yes.to_string())
                .bind(request.price_no.to_string())
                .bind(total_yes.to_string())
                .bind(total_no.to_string()),
            )
            .await?;
        info!("Created event {}: {}", event_id, request.description);
        Ok(self.receipt(vec![LedgerLog::EventCreated {
            event_id,
            description: request.description,
            start_time: request.start_time,
            end_time: request.end_time,
            price_yes: request.price_yes,
            price_no: request.price_no,
        }]))
    }

    /// Records an encrypted bet. Payment is checked on ciphertexts: an
    /// underpaid bet is stored with zero effective shares and error code 2.
    pub async fn place_bet_from(&self, from: Address, request: PlaceBetRequest) -> Result<TxReceipt> {
        let _guard = self.write_lock.lock().await;
        let event = self.read_event(request.event_id).await?;
        self.fhe
            .verify_input(
                &request.input_proof,
                self.contract,
                from,
                &[
                    (request.shares_handle, FheType::U32),
                    (request.direction_handle, FheType::Bool),
                ],
            )
            .context("Invalid encrypted input")?;

        let status = EventStatus::derive(
            event.start_time,
            event.end_time,
            event.resolved,
            self.clock.now(),
        );
        if status != EventStatus::Active {
            debug!("Bet on event {} while {}", event.id, status);
            self.set_last_error(from, LedgerErrorCode::BettingNotActive)
                .await?;
            return Ok(self.receipt(vec![]));
        }
        if self.read_bet(event.id, from).await?.is_some() {
            debug!("{} already bet on event {}", from, event.id);
            self.set_last_error(from, LedgerErrorCode::AlreadyBet).await?;
            return Ok(self.receipt(vec![]));
        }

        let fhe = &self.fhe;
        let zero = fhe.trivial_encrypt(ClearValue::U64(0));
        let shares = fhe.cast(&request.shares_handle, FheType::U64)?;
        let price_yes = fhe.trivial_encrypt(ClearValue::U64(event.price_yes as u64));
        let price_no = fhe.trivial_encrypt(ClearValue::U64(event.price_no as u64));
        let price = fhe.select(&request.direction_handle, &price_yes, &price_no)?;
        let cost = fhe.mul(&shares, &price)?;
        let overflow = fhe.mul_overflows(&shares, &price)?;
        // a cost that fits is at most u64::MAX, so capping the payment there
        // can't turn an underpayment into a sufficient one
        let paid = fhe.trivial_encrypt(ClearValue::U64(
            u64::try_from(request.value).unwrap_or(u64::MAX),
        ));
        let covered = fhe.le(&cost, &paid)?;
        let sufficient = fhe.select(
            &overflow,
            &fhe.trivial_encrypt(ClearValue::Bool(false)),
            &covered,
        )?;
        let effective = fhe.select(&sufficient, &shares, &zero)?;
        let yes_add = fhe.select(&request.direction_handle, &effective, &zero)?;
        let no_add = fhe.select(&request.direction_handle, &zero, &effective)?;
        let total_yes = fhe.add(&event.total_yes_handle, &yes_add)?;
        let total_no = fhe.add(&event.total_no_handle, &no_add)?;
        fhe.allow(&total_yes, self.contract);
        fhe.allow(&total_no, self.contract);
        let error = fhe.select(
            &sufficient,
            &fhe.trivial_encrypt(ClearValue::U32(LedgerErrorCode::NoError.code())),
            &fhe.trivial_encrypt(ClearValue::U32(
                LedgerErrorCode::InsufficientPayment.code(),
            )),
        )?;
        self.allow_user(&request.shares_handle, from);
        self.allow_user(&request.direction_handle, from);
        self.allow_user(&effective, from);

        self.connection
            .execute(
                query(
                    "INSERT INTO bets (\
                    event_id,\
                    bettor,\
                    shares_handle,\
                    direction_handle,\
                    effective_shares_handle,\
                    actual_eth_amount)\
                    VALUES (?,?,?,?,?,?)",
                )
                .bind(event.id as i64)
                .bind(from.to_string())
                .bind(request.shares_handle.to_string())
                .bind(request.direction_handle.to_string())
                .bind(effective.to_string())
                .bind(request.value.to_string()),
            )
            .await?;
        let pool = event
            .total_eth_pool
            .checked_add(request.value)
            .context("pool overflow")?;
        self.connection
            .execute(
                query(
                    "UPDATE events SET total_eth_pool = ?, total_yes_handle = ?, total_no_handle = ? \
                    WHERE id = ?",
                )
                .bind(pool.to_string())
                .bind(total_yes.to_string())
                .bind(total_no.to_string())
                .bind(event.id as i64),
            )
            .await?;
        self.store_last_error(from, error).await?;
        trace!("Bet of {} on event {} stored", from, event.id);
        Ok(self.receipt(vec![LedgerLog::BetPlaced {
            event_id: event.id,
            bettor: from,
        }]))
    }

    pub async fn resolve_event_from(
        &self,
        from: Address,
        request: ResolveEventRequest,
    ) -> Result<TxReceipt> {
        let _guard = self.write_lock.lock().await;
        self.require_owner(from).await?;
        let event = self.read_event(request.event_id).await?;
        if event.resolved {
            bail!("Event already resolved")
        }
        if self.clock.now() <= event.end_time {
            bail!("Event has not ended yet")
        }
        self.fhe.make_publicly_decryptable(&event.total_yes_handle);
        self.fhe.make_publicly_decryptable(&event.total_no_handle);
        self.connection
            .execute(
                query("UPDATE events SET resolved = TRUE, outcome = ? WHERE id = ?")
                    .bind(request.outcome)
                    .bind(event.id as i64),
            )
            .await?;
        self.connection
            .execute(
                query("INSERT INTO pending_decryptions (kind, event_id) VALUES ('totals', ?)")
                    .bind(event.id as i64),
            )
            .await?;
        info!("Resolved event {} as {}", event.id, request.outcome);
        Ok(self.receipt(vec![LedgerLog::EventResolved {
            event_id: event.id,
            outcome: request.outcome,
        }]))
    }

    /// Selects the caller's winning shares on ciphertexts and queues them for
    /// decryption; the oracle turns them into a share of the pool. A loser's
    /// claim settles to zero with error code 5.
    pub async fn claim_reward_from(&self, from: Address, event_id: EventId) -> Result<TxReceipt> {
        let _guard = self.write_lock.lock().await;
        let event = self.read_event(event_id).await?;
        if !event.resolved || !event.decryption_done {
            self.set_last_error(from, LedgerErrorCode::EventNotResolved)
                .await?;
            return Ok(self.receipt(vec![]));
        }
        let (bet, effective) = match self.read_bet(event_id, from).await? {
            Some((bet, effective)) if !bet.claimed => (bet, effective),
            _ => {
                self.set_last_error(from, LedgerErrorCode::NoWinnings).await?;
                return Ok(self.receipt(vec![]));
            }
        };

        let fhe = &self.fhe;
        let zero = fhe.trivial_encrypt(ClearValue::U64(0));
        let one = fhe.trivial_encrypt(ClearValue::U64(1));
        let won = fhe.eq(
            &bet.direction_handle,
            &fhe.trivial_encrypt(ClearValue::Bool(event.outcome)),
        )?;
        let winning_shares = fhe.select(&won, &effective, &zero)?;
        let has_reward = fhe.le(&one, &winning_shares)?;
        let error = fhe.select(
            &has_reward,
            &fhe.trivial_encrypt(ClearValue::U32(LedgerErrorCode::NoError.code())),
            &fhe.trivial_encrypt(ClearValue::U32(LedgerErrorCode::NoWinnings.code())),
        )?;
        self.allow_user(&winning_shares, from);
        fhe.make_publicly_decryptable(&winning_shares);

        self.connection
            .execute(
                query("UPDATE bets SET claimed = TRUE WHERE event_id = ? AND bettor = ?")
                    .bind(event_id as i64)
                    .bind(from.to_string()),
            )
            .await?;
        self.connection
            .execute(
                query(
                    "INSERT INTO rewards (event_id, user, winning_shares_handle) VALUES (?,?,?) \
                    ON CONFLICT(event_id,user) DO UPDATE \
                    SET winning_shares_handle = excluded.winning_shares_handle",
                )
                .bind(event_id as i64)
                .bind(from.to_string())
                .bind(winning_shares.to_string()),
            )
            .await?;
        self.connection
            .execute(
                query(
                    "INSERT INTO pending_decryptions (kind, event_id, user) VALUES ('reward', ?, ?)",
                )
                .bind(event_id as i64)
                .bind(from.to_string()),
            )
            .await?;
        self.store_last_error(from, error).await?;
        debug!("{} claimed on event {}, reward queued", from, event_id);
        Ok(self.receipt(vec![]))
    }

    pub async fn withdraw_reward_from(&self, from: Address, event_id: EventId) -> Result<TxReceipt> {
        let _guard = self.write_lock.lock().await;
        self.read_event(event_id).await?;
        let reward = self.read_reward(event_id, from).await?;
        if !reward.claimed || reward.pending_amount == 0 {
            self.set_last_error(from, LedgerErrorCode::NoWinnings).await?;
            return Ok(self.receipt(vec![]));
        }
        self.connection
            .execute(
                query(
                    "UPDATE rewards SET pending_amount = '0', withdrawn = TRUE \
                    WHERE event_id = ? AND user = ?",
                )
                .bind(event_id as i64)
                .bind(from.to_string()),
            )
            .await?;
        self.set_last_error(from, LedgerErrorCode::NoError).await?;
        info!(
            "{} withdrew {} wei from event {}",
            from, reward.pending_amount, event_id
        );
        Ok(self.receipt(vec![LedgerLog::RewardWithdrawn {
            event_id,
            user: from,
            amount: reward.pending_amount,
        }]))
    }

    /// Plays the decryption oracle: publishes every queued aggregate and
    /// reward decryption and returns the logs the callbacks emit.
    pub async fn fulfill_decryptions(&self) -> Result<Vec<LedgerLog>> {
        let _guard = self.write_lock.lock().await;
        let rows = self
            .connection
            .fetch_all(query("SELECT * FROM pending_decryptions ORDER BY id"))
            .await?;
        let mut logs = vec![];
        for row in rows {
            let id: i64 = row.try_get("id")?;
            let kind: String = row.try_get("kind")?;
            let event_id = row.try_get::<i64, _>("event_id")? as EventId;
            match kind.as_str() {
                "totals" => {
                    let event = self.read_event(event_id).await?;
                    let yes = self.fhe.public_decrypt(&event.total_yes_handle)?.as_u64();
                    let no = self.fhe.public_decrypt(&event.total_no_handle)?.as_u64();
                    self.connection
                        .execute(
                            query(
                                "UPDATE events SET decrypted_yes = ?, decrypted_no = ?, \
                                decryption_done = TRUE WHERE id = ?",
                            )
                            .bind(yes.to_string())
                            .bind(no.to_string())
                            .bind(event_id as i64),
                        )
                        .await?;
                    debug!("Event {} totals: {} yes, {} no", event_id, yes, no);
                }
                "reward" => {
                    let user = Address::from_str(&row.try_get::<String, _>("user")?)?;
                    let handle: String = self
                        .connection
                        .fetch_one(
                            query(
                                "SELECT winning_shares_handle FROM rewards \
                                WHERE event_id = ? AND user = ?",
                            )
                            .bind(event_id as i64)
                            .bind(user.to_string()),
                        )
                        .await?
                        .try_get("winning_shares_handle")?;
                    let shares = self.fhe.public_decrypt(&Handle::from_str(&handle)?)?.as_u64();
                    let event = self.read_event(event_id).await?;
                    let amount = reward_amount(&event, shares)?;
                    self.connection
                        .execute(
                            query(
                                "UPDATE rewards SET pending_amount = ?, original_amount = ?, \
                                claimed = TRUE WHERE event_id = ? AND user = ?",
                            )
                            .bind(amount.to_string())
                            .bind(amount.to_string())
                            .bind(event_id as i64)
                            .bind(user.to_string()),
                        )
                        .await?;
                    logs.push(LedgerLog::RewardCalculated {
                        event_id,
                        user,
                        amount,
                    });
                }
                kind => bail!("unknown decryption request {}", kind),
            }
            self.connection
                .execute(query("DELETE FROM pending_decryptions WHERE id = ?").bind(id))
                .await?;
        }
        Ok(logs)
    }
}

#[async_trait]
impl Ledger for DevLedger {
    fn contract_address(&self) -> Address {
        self.contract
    }
    async fn event_count(&self) -> Result<u64> {
        let count: i64 = self
            .connection
            .fetch_one(query("SELECT COUNT(*) AS count FROM events"))
            .await?
            .try_get("count")?;
        Ok(count as u64)
    }
    async fn get_event(&self, event_id: EventId) -> Result<PredictionEvent> {
        self.read_event(event_id).await
    }
    async fn get_bet(&self, event_id: EventId, user: Address) -> Result<Bet> {
        Ok(self
            .read_bet(event_id, user)
            .await?
            .map(|(bet, _)| bet)
            .unwrap_or(Bet::empty(event_id, user)))
    }
    async fn get_reward_info(&self, event_id: EventId, user: Address) -> Result<RewardInfo> {
        self.read_reward(event_id, user).await
    }
    async fn get_pending_reward(&self, event_id: EventId, user: Address) -> Result<Wei> {
        Ok(self.read_reward(event_id, user).await?.pending_amount)
    }
    async fn has_claimed_reward(&self, event_id: EventId, user: Address) -> Result<bool> {
        Ok(self.read_reward(event_id, user).await?.claimed)
    }
    async fn get_last_error(&self, user: Address) -> Result<LastError> {
        let row = self
            .connection
            .fetch_optional(
                query("SELECT handle, timestamp FROM last_errors WHERE user = ?")
                    .bind(user.to_string()),
            )
            .await?;
        match row {
            None => Ok(LastError {
                handle: Handle::default(),
                timestamp: 0,
            }),
            Some(row) => Ok(LastError {
                handle: parse_handle(&row, "handle")?,
                timestamp: row.try_get("timestamp")?,
            }),
        }
    }
    async fn owner(&self) -> Result<Address> {
        self.read_owner().await
    }

    async fn create_event(
        &self,
        sender: &dyn WalletSigner,
        request: CreateEventRequest,
    ) -> Result<TxReceipt> {
        self.create_event_from(sender.address(), request).await
    }
    async fn place_bet(
        &self,
        sender: &dyn WalletSigner,
        request: PlaceBetRequest,
    ) -> Result<TxReceipt> {
        self.place_bet_from(sender.address(), request).await
    }
    async fn resolve_event(
        &self,
        sender: &dyn WalletSigner,
        request: ResolveEventRequest,
    ) -> Result<TxReceipt> {
        self.resolve_event_from(sender.address(), request).await
    }
    async fn claim_reward(&self, sender: &dyn WalletSigner, event_id: EventId) -> Result<TxReceipt> {
        self.claim_reward_from(sender.address(), event_id).await
    }
    async fn withdraw_reward(
        &self,
        sender: &dyn WalletSigner,
        event_id: EventId,
    ) -> Result<TxReceipt> {
        self.withdraw_reward_from(sender.address(), event_id).await
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::wallet::LocalWallet;

    const PRICE: Wei = 100_000_000_000_000_000;

    async fn ledger(owner: Address) -> DevLedger {
        DevLedger::new(
            None,
            owner,
            Address([0xc0; 20]),
            MockCoprocessor::default(),
            Clock::default(),
        )
        .await
        .unwrap()
    }

    fn event_request(now: UnixSeconds) -> CreateEventRequest {
        CreateEventRequest {
            description: "Will it rain?".to_string(),
            start_time: now - 300,
            end_time: now + 3600,
            price_yes: PRICE,
            price_no: PRICE,
        }
    }

    async fn bet(ledger: &DevLedger, user: Address, shares: u32, yes: bool, value: Wei) -> TxReceipt {
        let input = ledger
            .coprocessor()
            .encrypt_input(
                ledger.contract,
                user,
                &[ClearValue::U32(shares), ClearValue::Bool(yes)],
            )
            .unwrap();
        ledger
            .place_bet_from(
                user,
                PlaceBetRequest {
                    event_id: 0,
                    shares_handle: input.handles[0],
                    direction_handle: input.handles[1],
                    input_proof: input.input_proof,
                    value,
                },
            )
            .await
            .unwrap()
    }

    async fn last_error(ledger: &DevLedger, user: Address) -> u64 {
        let error = ledger.get_last_error(user).await.unwrap();
        ledger.coprocessor().kms_decrypt(&error.handle).unwrap().as_u64()
    }

    #[tokio::test]
    async fn owner_only_event_creation() {
        let owner = LocalWallet::generate();
        let user = LocalWallet::generate();
        let ledger = ledger(owner.address()).await;
        let now = ledger.clock().now();
        assert!(ledger
            .create_event(&user, event_request(now))
            .await
            .is_err());
        let mut backwards = event_request(now);
        backwards.end_time = backwards.start_time;
        assert!(ledger.create_event(&owner, backwards).await.is_err());

        let receipt = ledger
            .create_event(&owner, event_request(now))
            .await
            .unwrap();
        assert!(matches!(
            receipt.logs[0],
            LedgerLog::EventCreated { event_id: 0, .. }
        ));
        assert_eq!(ledger.event_count().await.unwrap(), 1);
        let event = ledger.get_event(0).await.unwrap();
        assert_eq!(event.price_yes, PRICE);
        assert!(!event.resolved);
        assert!(ledger.get_event(1).await.is_err());
        assert_eq!(ledger.owner().await.unwrap(), owner.address());
    }

    #[tokio::test]
    async fn bets_update_encrypted_totals() {
        let owner = Address([1; 20]);
        let (alice, bob, carol) = (Address([2; 20]), Address([3; 20]), Address([4; 20]));
        let ledger = ledger(owner).await;
        let now = ledger.clock().now();
        ledger
            .create_event_from(owner, event_request(now))
            .await
            .unwrap();

        let receipt = bet(&ledger, alice, 10, true, 10 * PRICE).await;
        assert_eq!(
            receipt.logs,
            vec![LedgerLog::BetPlaced {
                event_id: 0,
                bettor: alice
            }]
        );
        assert_eq!(last_error(&ledger, alice).await, 0);
        bet(&ledger, bob, 15, false, 15 * PRICE).await;
        // one wei short
        bet(&ledger, carol, 5, true, 5 * PRICE - 1).await;
        assert_eq!(last_error(&ledger, carol).await, 2);
        // second bet
        bet(&ledger, alice, 1, true, PRICE).await;
        assert_eq!(last_error(&ledger, alice).await, 3);

        let event = ledger.get_event(0).await.unwrap();
        assert_eq!(event.total_eth_pool, 30 * PRICE - 1);
        let fhe = ledger.coprocessor();
        assert_eq!(
            fhe.kms_decrypt(&event.total_yes_handle),
            Some(ClearValue::U64(10))
        );
        assert_eq!(
            fhe.kms_decrypt(&event.total_no_handle),
            Some(ClearValue::U64(15))
        );
        assert!(!fhe.is_allowed(&event.total_yes_handle, &alice));

        let stored = ledger.get_bet(0, alice).await.unwrap();
        assert!(stored.placed);
        assert!(!stored.claimed);
        assert_eq!(stored.actual_eth_amount, 10 * PRICE);
        assert!(fhe.is_allowed(&stored.shares_handle, &alice));
        assert!(!ledger.get_bet(0, owner).await.unwrap().placed);
    }

    #[tokio::test]
    async fn betting_window_is_enforced() {
        let owner = Address([1; 20]);
        let user = Address([2; 20]);
        let ledger = ledger(owner).await;
        let now = ledger.clock().now();
        ledger
            .create_event_from(owner, event_request(now))
            .await
            .unwrap();
        ledger.clock().advance(3601);
        let receipt = bet(&ledger, user, 1, true, PRICE).await;
        assert!(receipt.logs.is_empty());
        assert_eq!(last_error(&ledger, user).await, 1);
        assert!(!ledger.get_bet(0, user).await.unwrap().placed);
    }

    #[tokio::test]
    async fn resolution_claim_and_withdrawal() {
        let owner = Address([1; 20]);
        let (alice, bob) = (Address([2; 20]), Address([3; 20]));
        let ledger = ledger(owner).await;
        let now = ledger.clock().now();
        ledger
            .create_event_from(owner, event_request(now))
            .await
            .unwrap();
        bet(&ledger, alice, 10, true, 10 * PRICE).await;
        bet(&ledger, bob, 5, false, 5 * PRICE).await;

        let resolve = ResolveEventRequest {
            event_id: 0,
            outcome: true,
        };
        assert!(ledger.resolve_event_from(owner, resolve).await.is_err());
        ledger.clock().advance(3601);
        assert!(ledger.resolve_event_from(alice, resolve).await.is_err());
        ledger.resolve_event_from(owner, resolve).await.unwrap();
        assert!(ledger.resolve_event_from(owner, resolve).await.is_err());

        // aggregate decryption still pending
        ledger.claim_reward_from(alice, 0).await.unwrap();
        assert_eq!(last_error(&ledger, alice).await, 4);

        ledger.fulfill_decryptions().await.unwrap();
        let event = ledger.get_event(0).await.unwrap();
        assert!(event.decryption_done);
        assert_eq!((event.decrypted_yes, event.decrypted_no), (10, 5));

        ledger.claim_reward_from(alice, 0).await.unwrap();
        assert_eq!(last_error(&ledger, alice).await, 0);
        ledger.claim_reward_from(bob, 0).await.unwrap();
        assert_eq!(last_error(&ledger, bob).await, 5);
        assert_eq!(
            ledger.get_reward_info(0, alice).await.unwrap(),
            RewardInfo::default()
        );
        let logs = ledger.fulfill_decryptions().await.unwrap();
        assert_eq!(logs.len(), 2);
        let info = ledger.get_reward_info(0, alice).await.unwrap();
        assert_eq!(info.pending_amount, 15 * PRICE);
        assert_eq!(info.original_amount, 15 * PRICE);
        assert!(info.claimed && !info.withdrawn);

        // twice
        ledger.claim_reward_from(alice, 0).await.unwrap();
        assert_eq!(last_error(&ledger, alice).await, 5);

        let receipt = ledger.withdraw_reward_from(alice, 0).await.unwrap();
        assert_eq!(
            receipt.logs,
            vec![LedgerLog::RewardWithdrawn {
                event_id: 0,
                user: alice,
                amount: 15 * PRICE
            }]
        );
        let info = ledger.get_reward_info(0, alice).await.unwrap();
        assert_eq!(info.pending_amount, 0);
        assert_eq!(info.original_amount, 15 * PRICE);
        assert!(info.withdrawn);
        ledger.withdraw_reward_from(alice, 0).await.unwrap();
        assert_eq!(last_error(&ledger, alice).await, 5);
    }

    #[tokio::test]
    async fn cost_beyond_euint64_is_underpaid() {
        let owner = Address([1; 20]);
        let alice = Address([2; 20]);
        let ledger = ledger(owner).await;
        let now = ledger.clock().now();
        let mut request = event_request(now);
        request.price_yes = 1_000_000_000_000_000_000;
        ledger.create_event_from(owner, request).await.unwrap();

        // 1000 ETH due, the payment only reaches u64::MAX wei
        bet(&ledger, alice, 1000, true, u64::MAX as Wei).await;
        assert_eq!(last_error(&ledger, alice).await, 2);
        let event = ledger.get_event(0).await.unwrap();
        assert_eq!(
            ledger.coprocessor().kms_decrypt(&event.total_yes_handle),
            Some(ClearValue::U64(0))
        );
    }

    #[tokio::test]
    async fn rewards_use_the_full_pool() {
        let owner = Address([1; 20]);
        let (alice, bob, carol, dave) = (
            Address([2; 20]),
            Address([3; 20]),
            Address([4; 20]),
            Address([5; 20]),
        );
        let ledger = ledger(owner).await;
        let now = ledger.clock().now();
        ledger
            .create_event_from(owner, event_request(now))
            .await
            .unwrap();
        // 30 ETH pool, beyond what a euint64 holds
        bet(&ledger, alice, 100, true, 100 * PRICE).await;
        bet(&ledger, bob, 100, false, 100 * PRICE).await;
        bet(&ledger, carol, 100, false, 100 * PRICE).await;
        bet(&ledger, dave, 2, true, 2 * PRICE).await;
        ledger.clock().advance(3601);
        ledger
            .resolve_event_from(
                owner,
                ResolveEventRequest {
                    event_id: 0,
                    outcome: true,
                },
            )
            .await
            .unwrap();
        ledger.fulfill_decryptions().await.unwrap();
        ledger.claim_reward_from(alice, 0).await.unwrap();
        ledger.claim_reward_from(dave, 0).await.unwrap();
        ledger.fulfill_decryptions().await.unwrap();

        let pool = 302 * PRICE;
        let alice_info = ledger.get_reward_info(0, alice).await.unwrap();
        assert_eq!(alice_info.pending_amount, pool * 100 / 102);
        assert!(alice_info.pending_amount > u64::MAX as Wei);
        let dave_info = ledger.get_reward_info(0, dave).await.unwrap();
        // dividing last keeps the wei a per share floor would drop
        assert_eq!(dave_info.original_amount, pool * 2 / 102);
        assert_eq!(dave_info.original_amount, 592156862745098039);
    }
}
