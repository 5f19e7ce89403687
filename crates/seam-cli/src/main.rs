//! seam CLI
//!
//! Unified entry point for the seam session relay:
//! - `seam connect` runs a relay in the foreground, printing every inbound
//!   frame to stdout (logs go to stderr so output stays pipeable)
//! - every other subcommand is a one-shot producer that shapes a payload and
//!   publishes it into a running relay's channel

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use seam_relay::{CancellationToken, RelayConfig};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Set up logging. In debug builds, logs additionally go to a file in the
/// temp directory; stdout is never used — it carries relayed frames.
fn setup_logging() {
    let default_level = if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "seam_relay={default_level},seam_cli={default_level}"
        ))
    });

    if cfg!(debug_assertions) {
        let temp_dir = std::env::temp_dir();
        let file_appender = tracing_appender::rolling::never(&temp_dir, "seam-debug.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        std::mem::forget(guard);

        let file_layer = fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true);

        let stderr_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(true)
            .with_target(true);

        tracing_subscriber::registry()
            .with(file_layer)
            .with(stderr_layer)
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(filter)
            .init();
    }
}

/// Parse a `Name: value` handshake header flag.
fn parse_header(raw: &str) -> std::result::Result<(String, String), String> {
    let Some((name, value)) = raw.split_once(':') else {
        return Err(format!("expected `name: value`, got `{raw}`"));
    };
    let name = name.trim();
    let value = value.trim();
    if name.is_empty() {
        return Err("header name is empty".to_string());
    }
    Ok((name.to_string(), value.to_string()))
}

/// seam - session relay for a venue WebSocket
#[derive(Parser)]
#[command(name = "seam")]
#[command(about = "One persistent WebSocket session, driven by one-shot commands")]
#[command(version)]
#[command(after_help = "\
Examples:
  seam connect --channel maker-1 --url wss://venue.example/maker
  seam balances --channel maker-1 --account 0xYourAccount
  seam quote --channel maker-1 --rfq-id rfq-17 ... --signature 0x..
  seam disconnect --channel maker-1

The channel name is the rendezvous point: every producer command finds the
relay purely from `--channel`.
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the venue and run the relay in the foreground
    Connect {
        /// Unique channel id later commands publish into
        #[arg(long)]
        channel: String,

        /// WebSocket URL to connect to
        #[arg(long)]
        url: String,

        /// Extra handshake header as `name: value` (repeatable)
        #[arg(long = "header", value_name = "NAME: VALUE", value_parser = parse_header)]
        headers: Vec<(String, String)>,
    },

    /// Tear down the relay bound to a channel
    Disconnect {
        #[arg(long)]
        channel: String,
    },

    /// Respond to an RFQ with a signed quote
    Quote {
        #[arg(long)]
        channel: String,

        /// RFQ id this quote answers
        #[arg(long)]
        rfq_id: String,

        /// Underlying asset address
        #[arg(long)]
        asset: String,

        #[arg(long)]
        chain_id: u64,

        /// Option expiry, unix seconds
        #[arg(long)]
        expiry: i64,

        #[arg(long)]
        put: bool,

        #[arg(long)]
        taker_buy: bool,

        /// Maker account address
        #[arg(long)]
        maker: String,

        #[arg(long)]
        nonce: String,

        #[arg(long)]
        price: String,

        #[arg(long)]
        quantity: String,

        #[arg(long)]
        strike: String,

        /// Quote validity horizon, unix seconds
        #[arg(long)]
        valid_until: i64,

        /// Externally produced payload signature
        #[arg(long)]
        signature: String,
    },

    /// Request a collateral transfer
    Transfer {
        #[arg(long)]
        channel: String,

        /// Collateral asset address
        #[arg(long)]
        asset: String,

        #[arg(long)]
        chain_id: u64,

        #[arg(long)]
        amount: String,

        /// Deposit into the venue (withdrawal otherwise)
        #[arg(long)]
        deposit: bool,

        #[arg(long)]
        nonce: String,

        /// Externally produced payload signature
        #[arg(long)]
        signature: String,
    },

    /// Query account balances
    Balances {
        #[arg(long)]
        channel: String,

        /// Account address to query
        #[arg(long)]
        account: String,
    },

    /// Query account positions
    Positions {
        #[arg(long)]
        channel: String,

        /// Account address to query
        #[arg(long)]
        account: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Connect {
            channel,
            url,
            headers,
        } => run_connect(channel, url, headers).await,
        Commands::Disconnect { channel } => {
            publish_frame(&channel, seam_relay::DISCONNECT_COMMAND.as_bytes()).await
        }
        Commands::Quote {
            channel,
            rfq_id,
            asset,
            chain_id,
            expiry,
            put,
            taker_buy,
            maker,
            nonce,
            price,
            quantity,
            strike,
            valid_until,
            signature,
        } => {
            let quote = seam_wire::Quote {
                asset_address: asset,
                chain_id,
                expiry,
                is_put: put,
                is_taker_buy: taker_buy,
                maker,
                nonce,
                price,
                quantity,
                strike,
                signature,
                valid_until,
            };
            let envelope = seam_wire::quote_envelope(&rfq_id, &quote)?;
            publish_envelope(&channel, &envelope).await
        }
        Commands::Transfer {
            channel,
            asset,
            chain_id,
            amount,
            deposit,
            nonce,
            signature,
        } => {
            let transfer = seam_wire::Transfer {
                asset,
                chain_id,
                amount,
                is_deposit: deposit,
                nonce,
                signature,
            };
            let envelope = seam_wire::transfer_envelope(&transfer)?;
            publish_envelope(&channel, &envelope).await
        }
        Commands::Balances { channel, account } => {
            let envelope = seam_wire::balances_envelope(&account)?;
            publish_envelope(&channel, &envelope).await
        }
        Commands::Positions { channel, account } => {
            let envelope = seam_wire::positions_envelope(&account)?;
            publish_envelope(&channel, &envelope).await
        }
    }
}

/// Run the relay in the foreground until a terminal event.
async fn run_connect(channel: String, url: String, headers: Vec<(String, String)>) -> Result<()> {
    setup_logging();

    let root = CancellationToken::new();
    let signal_root = root.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            signal_root.cancel();
        }
    });

    let mut config = RelayConfig::new(channel, url);
    config.headers = headers;

    seam_relay::run(
        config,
        root,
        Box::new(|frame| {
            // Inbound frames are the command's output.
            println!("{}", String::from_utf8_lossy(&frame));
        }),
    )
    .await
    .context("relay terminated with an error")?;

    Ok(())
}

async fn publish_envelope(channel: &str, envelope: &seam_wire::Envelope) -> Result<()> {
    let frame = envelope.to_frame()?;
    publish_frame(channel, &frame).await
}

async fn publish_frame(channel: &str, frame: &[u8]) -> Result<()> {
    seam_relay::publish(channel, frame)
        .await
        .with_context(|| format!("failed to publish to channel `{channel}`"))
}
