use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::{Json, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use axum_macros::debug_handler;
use chrono::Utc;
use clap::Parser;
use env_logger::{Builder, WriteStyle};
use log::{debug, error, info, LevelFilter};
use serde::Serialize;
use tokio::task::JoinHandle;

use shadowbet::api::*;
use shadowbet::clock::Clock;
use shadowbet::error::ProtocolError;
use shadowbet::fhe::MockCoprocessor;
use shadowbet::ledger::{DevLedger, Ledger};
use shadowbet::relay::{DecryptionRelay, LocalRelay};
use shadowbet::settings::Settings;
use shadowbet::wallet::{LocalWallet, ReplayGuard, WalletSigner};

struct Devnet {
    ledger: DevLedger,
    relay: LocalRelay,
    requests: ReplayGuard,
}
impl Devnet {
    fn authenticate<T: Serialize>(
        &self,
        request: &PostRequest<T>,
    ) -> Result<Address, (StatusCode, String)> {
        self.requests
            .check(request, Utc::now().timestamp())
            .map_err(|e| (StatusCode::UNAUTHORIZED, map_any_err(e)))
    }
}
fn map_relay_err(e: ProtocolError) -> (StatusCode, String) {
    debug!("Relay error: {}", e);
    let code = match e {
        ProtocolError::AuthorizationDenied(_) => StatusCode::FORBIDDEN,
        ProtocolError::DecryptionUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (code, e.to_string())
}

async fn event_count(
    State(state): State<Arc<Devnet>>,
) -> Result<Json<EventCountResponse>, (StatusCode, String)> {
    let count = state
        .ledger
        .event_count()
        .await
        .map_err(map_any_err_and_code)?;
    Ok(Json(EventCountResponse { count }))
}
async fn get_owner(
    State(state): State<Arc<Devnet>>,
) -> Result<Json<OwnerResponse>, (StatusCode, String)> {
    let owner = state.ledger.owner().await.map_err(map_any_err_and_code)?;
    Ok(Json(OwnerResponse { owner }))
}
#[debug_handler]
async fn get_event(
    State(state): State<Arc<Devnet>>,
    Json(request): Json<EventRequest>,
) -> Result<Json<PredictionEvent>, (StatusCode, String)> {
    let event = state
        .ledger
        .get_event(request.event_id)
        .await
        .map_err(map_any_err_and_code)?;
    Ok(Json(event))
}
async fn get_bet(
    State(state): State<Arc<Devnet>>,
    Json(request): Json<EventUserRequest>,
) -> Result<Json<Bet>, (StatusCode, String)> {
    let bet = state
        .ledger
        .get_bet(request.event_id, request.user)
        .await
        .map_err(map_any_err_and_code)?;
    Ok(Json(bet))
}
async fn get_reward_info(
    State(state): State<Arc<Devnet>>,
    Json(request): Json<EventUserRequest>,
) -> Result<Json<RewardInfo>, (StatusCode, String)> {
    let reward = state
        .ledger
        .get_reward_info(request.event_id, request.user)
        .await
        .map_err(map_any_err_and_code)?;
    Ok(Json(reward))
}
async fn get_last_error(
    State(state): State<Arc<Devnet>>,
    Json(request): Json<UserRequest>,
) -> Result<Json<LastError>, (StatusCode, String)> {
    let last_error = state
        .ledger
        .get_last_error(request.user)
        .await
        .map_err(map_any_err_and_code)?;
    Ok(Json(last_error))
}

#[debug_handler]
async fn create_event(
    State(state): State<Arc<Devnet>>,
    Json(request): Json<PostRequest<CreateEventRequest>>,
) -> Result<Json<TxReceipt>, (StatusCode, String)> {
    let from = state.authenticate(&request)?;
    let receipt = state
        .ledger
        .create_event_from(from, request.data)
        .await
        .map_err(map_any_err_and_code)?;
    Ok(Json(receipt))
}
#[debug_handler]
async fn place_bet(
    State(state): State<Arc<Devnet>>,
    Json(request): Json<PostRequest<PlaceBetRequest>>,
) -> Result<Json<TxReceipt>, (StatusCode, String)> {
    let from = state.authenticate(&request)?;
    debug!(
        "Bet from {} on event {} with {} wei",
        from, request.data.event_id, request.data.value
    );
    let receipt = state
        .ledger
        .place_bet_from(from, request.data)
        .await
        .map_err(map_any_err_and_code)?;
    Ok(Json(receipt))
}
async fn resolve_event(
    State(state): State<Arc<Devnet>>,
    Json(request): Json<PostRequest<ResolveEventRequest>>,
) -> Result<Json<TxReceipt>, (StatusCode, String)> {
    let from = state.authenticate(&request)?;
    let receipt = state
        .ledger
        .resolve_event_from(from, request.data)
        .await
        .map_err(map_any_err_and_code)?;
    Ok(Json(receipt))
}
async fn claim_reward(
    State(state): State<Arc<Devnet>>,
    Json(request): Json<PostRequest<EventRequest>>,
) -> Result<Json<TxReceipt>, (StatusCode, String)> {
    let from = state.authenticate(&request)?;
    let receipt = state
        .ledger
        .claim_reward_from(from, request.data.event_id)
        .await
        .map_err(map_any_err_and_code)?;
    Ok(Json(receipt))
}
async fn withdraw_reward(
    State(state): State<Arc<Devnet>>,
    Json(request): Json<PostRequest<EventRequest>>,
) -> Result<Json<TxReceipt>, (StatusCode, String)> {
    let from = state.authenticate(&request)?;
    let receipt = state
        .ledger
        .withdraw_reward_from(from, request.data.event_id)
        .await
        .map_err(map_any_err_and_code)?;
    Ok(Json(receipt))
}

async fn input_proof(
    State(state): State<Arc<Devnet>>,
    Json(request): Json<InputProofRequest>,
) -> Result<Json<EncryptedInput>, (StatusCode, String)> {
    let input = state
        .ledger
        .coprocessor()
        .encrypt_input(
            request.contract_address,
            request.user_address,
            &request.values,
        )
        .map_err(|e| (StatusCode::BAD_REQUEST, map_any_err(e)))?;
    Ok(Json(input))
}
#[debug_handler]
async fn user_decrypt(
    State(state): State<Arc<Devnet>>,
    Json(request): Json<UserDecryptRequest>,
) -> Result<Json<UserDecryptResponse>, (StatusCode, String)> {
    let response = state
        .relay
        .user_decrypt(request)
        .await
        .map_err(map_relay_err)?;
    Ok(Json(response))
}

#[derive(Parser)]
struct Args {
    #[arg(short, long, default_value_t = 8081)]
    port: u16,
    /// SQLite file for the ledger, in memory if not given
    #[arg(short, long)]
    db: Option<String>,
    #[arg(short, long)]
    config: Option<String>,
    /// Owner address, defaults to the address of the configured key file
    #[arg(short, long)]
    owner: Option<String>,
    #[arg(long, default_value_t = 2000)]
    oracle_interval_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    Builder::default()
        .filter_level(LevelFilter::Debug)
        .write_style(WriteStyle::Always)
        .init();
    let cli = Args::parse();
    let settings = Settings::load(cli.config.as_deref())?;
    let owner = match cli.owner {
        Some(owner) => Address::from_str(&owner)?,
        None => owner_from_key_file(&settings.key_file).await?,
    };
    let (_port, handle) = run_server(
        Some(cli.port),
        cli.db,
        owner,
        &settings,
        Duration::from_millis(cli.oracle_interval_ms),
    )
    .await?;
    handle.await?;
    Ok(())
}

async fn owner_from_key_file(key_file: &str) -> Result<Address> {
    if Path::new(key_file).exists() {
        return Ok(LocalWallet::from_file(key_file).await?.address());
    }
    let wallet = LocalWallet::generate();
    wallet.write_to_file(key_file).await?;
    info!("Generated owner key {} in {}", wallet.address(), key_file);
    Ok(wallet.address())
}

async fn run_server(
    port: Option<u16>,
    db: Option<String>,
    owner: Address,
    settings: &Settings,
    oracle_interval: Duration,
) -> Result<(u16, JoinHandle<()>)> {
    let fhe = MockCoprocessor::default();
    let clock = Clock::default();
    let ledger = DevLedger::new(
        db.as_deref(),
        owner,
        settings.contract_address,
        fhe.clone(),
        clock.clone(),
    )
    .await?;
    let relay = LocalRelay::new(fhe, settings.domain(), settings.chain_id, clock);
    let state = Arc::new(Devnet {
        ledger,
        relay,
        requests: ReplayGuard::default(),
    });
    info!(
        "Devnet ledger {} owned by {}",
        settings.contract_address, owner
    );

    let oracle = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(oracle_interval);
        loop {
            interval.tick().await;
            match oracle.ledger.fulfill_decryptions().await {
                Ok(logs) => {
                    for log in logs {
                        info!("Oracle: {}", log);
                    }
                }
                Err(e) => error!("Oracle failed: {:#}", e),
            }
        }
    });

    let app = Router::new()
        .route("/v1/event_count", get(event_count))
        .route("/v1/owner", get(get_owner))
        .route("/v1/get_event", post(get_event))
        .route("/v1/get_bet", post(get_bet))
        .route("/v1/get_reward_info", post(get_reward_info))
        .route("/v1/get_last_error", post(get_last_error))
        .route("/v1/create_event", post(create_event))
        .route("/v1/place_bet", post(place_bet))
        .route("/v1/resolve_event", post(resolve_event))
        .route("/v1/claim_reward", post(claim_reward))
        .route("/v1/withdraw_reward", post(withdraw_reward))
        .route("/v1/input-proof", post(input_proof))
        .route("/v1/user-decrypt", post(user_decrypt))
        .with_state(state);

    let addr = "127.0.0.1:".to_string() + port.unwrap_or(0).to_string().as_str();
    let server = axum::Server::try_bind(&addr.parse().context("bad listen address")?)?
        .serve(app.into_make_service());
    let port = server.local_addr().port();
    debug!("Listening on {}", server.local_addr());
    let handle = tokio::spawn(async move {
        if let Err(e) = server.await {
            error!("Server stopped: {}", e);
        }
    });
    Ok((port, handle))
}
