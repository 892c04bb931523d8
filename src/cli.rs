use std::sync::Arc;

use anyhow::Result;
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use env_logger::{Builder, WriteStyle};
use log::{info, LevelFilter};

use shadowbet::api::*;
use shadowbet::encoder::{parse_direction, parse_shares};
use shadowbet::fhe::{self, DevnetBackend, SharedBackend};
use shadowbet::market::Market;
use shadowbet::registry::odds;
use shadowbet::rewards::RewardState;
use shadowbet::settings::Settings;
use shadowbet::wallet::{LocalWallet, WalletSigner};

#[derive(Parser)]
struct Args {
    #[command(subcommand)]
    command: Commands,
    /// Devnet url, overrides both ledger and relay url of the settings
    #[arg(short, long)]
    url: Option<String>,
    #[arg(short, long)]
    config: Option<String>,
    /// Key file, overrides the settings
    #[arg(short, long)]
    key: Option<String>,
}
#[derive(Subcommand)]
enum Commands {
    GenerateKeys,
    Owner,
    ListEvents,
    GetEvent {
        #[arg(short, long)]
        event: EventId,
    },
    CreateEvent {
        #[arg(short, long)]
        description: String,
        /// Unix seconds, one minute from now if not given
        #[arg(long)]
        start: Option<UnixSeconds>,
        #[arg(long, default_value_t = 86400)]
        duration_secs: i64,
        /// Price of a yes share in ether
        #[arg(long)]
        price_yes: String,
        #[arg(long)]
        price_no: String,
    },
    PlaceBet {
        #[arg(short, long)]
        event: EventId,
        #[arg(short, long)]
        shares: String,
        /// yes or no
        #[arg(short, long)]
        direction: String,
    },
    RevealBet {
        #[arg(short, long)]
        event: EventId,
    },
    MyBets {
        /// Decrypt shares and direction, one signature for all bets
        #[arg(short, long)]
        reveal: bool,
    },
    ResolveEvent {
        #[arg(short, long)]
        event: EventId,
        /// yes or no
        #[arg(short, long)]
        outcome: String,
    },
    Claim {
        #[arg(short, long)]
        event: EventId,
    },
    Withdraw {
        #[arg(short, long)]
        event: EventId,
    },
    RewardInfo {
        #[arg(short, long)]
        event: EventId,
    },
    LastError,
}

#[tokio::main]
async fn main() -> Result<()> {
    Builder::default()
        .filter_level(LevelFilter::Info)
        .write_style(WriteStyle::Always)
        .init();
    let cli = Args::parse();
    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(url) = cli.url {
        settings.ledger_url = url.clone();
        settings.relay_url = url;
    }
    if let Some(key) = cli.key {
        settings.key_file = key;
    }

    if let Commands::GenerateKeys = cli.command {
        let wallet = LocalWallet::generate();
        wallet.write_to_file(&settings.key_file).await?;
        println!("Address: {}", wallet.address());
        return Ok(());
    }

    let url = settings.ledger_url.clone();
    fhe::initialize(|| async move { Ok(Arc::new(DevnetBackend::new(url)) as SharedBackend) })
        .await?;
    let mut market = Market::new(settings.gateway(), fhe::global(), settings.decryptor()?);
    let wallet = LocalWallet::from_file(&settings.key_file).await?;
    info!("Using wallet {}", wallet.address());
    market.connect(Arc::new(wallet));

    match cli.command {
        Commands::GenerateKeys => {}
        Commands::Owner => {
            println!("Owner: {}", market.owner().await?);
        }
        Commands::ListEvents => {
            let report = market.refresh_events().await?;
            for event in market.events() {
                print_event(&market, event);
            }
            for (event_id, reason) in report.failures {
                println!("Event {} failed to load: {}", event_id, reason);
            }
        }
        Commands::GetEvent { event } => {
            let event = market.gateway().read_event(event).await?;
            print_event(&market, &event);
        }
        Commands::CreateEvent {
            description,
            start,
            duration_secs,
            price_yes,
            price_no,
        } => {
            let start = start.unwrap_or(Utc::now().timestamp() + 60);
            let receipt = market
                .create_event(
                    description,
                    start,
                    start + duration_secs,
                    parse_ether(&price_yes)?,
                    parse_ether(&price_no)?,
                )
                .await?;
            print_receipt(&receipt);
        }
        Commands::PlaceBet {
            event,
            shares,
            direction,
        } => {
            let receipt = market
                .place_bet(event, parse_shares(&shares)?, parse_direction(&direction)?)
                .await?;
            print_receipt(&receipt);
            let (code, _) = market.last_error().await?;
            println!("Result: {}", code);
        }
        Commands::RevealBet { event } => {
            let bet = market.reveal_bet(event).await?;
            println!(
                "Event {}: {} shares on {}",
                event,
                bet.shares,
                if bet.direction { "yes" } else { "no" }
            );
        }
        Commands::MyBets { reveal } => {
            market.refresh_events().await?;
            let bets = market.my_bets().await?;
            if reveal {
                for (bet, revealed) in market.reveal_bets(&bets).await? {
                    println!(
                        "Event {}: {} shares on {}, paid {} ETH{}",
                        bet.event_id,
                        revealed.shares,
                        if revealed.direction { "yes" } else { "no" },
                        format_ether(bet.actual_eth_amount, 4),
                        if bet.claimed { ", claimed" } else { "" }
                    );
                }
            } else {
                for bet in bets {
                    println!(
                        "Event {}: paid {} ETH{}",
                        bet.event_id,
                        format_ether(bet.actual_eth_amount, 4),
                        if bet.claimed { ", claimed" } else { "" }
                    );
                }
            }
        }
        Commands::ResolveEvent { event, outcome } => {
            let receipt = market
                .resolve_event(event, parse_direction(&outcome)?)
                .await?;
            print_receipt(&receipt);
        }
        Commands::Claim { event } => {
            let receipt = market.claim(event).await?;
            print_receipt(&receipt);
            let (code, _) = market.last_error().await?;
            println!("Result: {}", code);
        }
        Commands::Withdraw { event } => {
            let receipt = market.withdraw(event).await?;
            print_receipt(&receipt);
        }
        Commands::RewardInfo { event } => {
            let info = market.reward_info(event).await?;
            match RewardState::from_info(&info) {
                RewardState::Unclaimed => println!("Unclaimed"),
                RewardState::Claimed { pending, original } => println!(
                    "Claimed {} ETH, {} ETH pending",
                    format_ether(original, 4),
                    format_ether(pending, 4)
                ),
                RewardState::Withdrawn { original } => {
                    println!("Withdrawn {} ETH", format_ether(original, 4))
                }
            }
            let actions = market.actions(event).await?;
            if !actions.is_empty() {
                println!("Available: {:?}", actions);
            }
        }
        Commands::LastError => {
            let (code, timestamp) = market.last_error().await?;
            match Utc.timestamp_opt(timestamp, 0).single() {
                Some(at) if timestamp > 0 => println!("{} at {}", code, at),
                _ => println!("{}", code),
            }
        }
    }
    Ok(())
}

fn print_event(market: &Market, event: &PredictionEvent) {
    println!(
        "#{} {} [{}] yes {} ETH / no {} ETH, pool {} ETH",
        event.id,
        event.description,
        market.status(event),
        format_ether(event.price_yes, 4),
        format_ether(event.price_no, 4),
        format_ether(event.total_eth_pool, 4)
    );
    if event.resolved {
        println!("    outcome: {}", if event.outcome { "yes" } else { "no" });
    }
    if let Some((yes, no)) = odds(event) {
        println!(
            "    {} yes / {} no shares ({}% / {}%)",
            event.decrypted_yes, event.decrypted_no, yes, no
        );
    }
}

fn print_receipt(receipt: &TxReceipt) {
    println!("Tx {}", receipt.tx_hash);
    for log in &receipt.logs {
        println!("    {}", log);
    }
}
