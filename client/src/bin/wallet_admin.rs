//! Administrative wallet operations from the operator's shell.
//!
//! Publishes credit/debit commands onto the fabric the same way the chat
//! bot does, then polls the persisted profile for confirmation.
//!
//! Usage:
//!   wallet-admin credit --user <USER_ID> --amount 100 --reason "event prize"
//!   wallet-admin debit  --user <USER_ID> --amount 25
//!   wallet-admin balance --user <USER_ID>
//!   wallet-admin audit [--user <USER_ID>] [--limit 20]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use uuid::Uuid;

use walletbridge_client::audit::fetch_log;
use walletbridge_client::confirm::{CONFIRM_INTERVAL, CONFIRM_TIMEOUT};
use walletbridge_client::{await_confirmation, Confirmation, RedisStore, RedisTransport, Transport, WalletStore};
use walletbridge_types::{Envelope, TransactionCommand, TxnSource, COMMANDS_TOPIC};

#[derive(Parser, Debug)]
#[command(author, version, about = "Wallet bridge administrative CLI")]
struct Args {
    /// Fabric connection string.
    #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    redis_url: String,

    /// Audit sink base URL (for `audit`).
    #[arg(long, env = "AUDIT_API_URL", default_value = "http://127.0.0.1:3000")]
    api_url: String,

    /// Actor recorded on issued commands.
    #[arg(long, default_value = "wallet-admin")]
    actor: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Credit a user's balance.
    Credit {
        #[arg(long)]
        user: String,
        #[arg(long)]
        amount: u32,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Debit a user's balance.
    Debit {
        #[arg(long)]
        user: String,
        #[arg(long)]
        amount: u32,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Show a user's current balance.
    Balance {
        #[arg(long)]
        user: String,
    },
    /// List recent audit rows from the sink.
    Audit {
        #[arg(long)]
        user: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .init();

    let args = Args::parse();
    match args.command {
        Command::Credit {
            ref user,
            amount,
            ref reason,
        } => {
            issue(&args, user, i64::from(amount), reason.clone()).await?;
        }
        Command::Debit {
            ref user,
            amount,
            ref reason,
        } => {
            issue(&args, user, -i64::from(amount), reason.clone()).await?;
        }
        Command::Balance { ref user } => {
            let store = RedisStore::new(&args.redis_url).context("connect to fabric")?;
            let versioned = store.read_profile(user).await?;
            let balance = versioned.profile.map(|p| p.balance).unwrap_or(0);
            println!("{user}: {balance}");
        }
        Command::Audit { ref user, limit } => {
            let http = reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .context("build http client")?;
            let rows = fetch_log(&http, &args.api_url, user.as_deref(), limit)
                .await
                .context("query audit log")?;
            if rows.is_empty() {
                println!("no audit rows");
            }
            for row in rows {
                println!(
                    "{} {} {} {:+} ({}) {}",
                    row.created_at,
                    row.txn_id,
                    row.user_id,
                    row.delta,
                    row.actor,
                    row.reason.as_deref().unwrap_or("-")
                );
            }
        }
    }
    Ok(())
}

async fn issue(args: &Args, user: &str, delta: i64, reason: Option<String>) -> Result<()> {
    anyhow::ensure!(delta != 0, "amount must be positive");

    let command = TransactionCommand {
        txn_id: Uuid::new_v4().to_string(),
        user_id: user.to_string(),
        delta,
        actor: args.actor.clone(),
        source: TxnSource::Discord,
        reason,
    };
    let txn_id = command.txn_id.clone();
    let payload = serde_json::to_string(&Envelope::Command(command))?;

    let transport = RedisTransport::new(&args.redis_url).context("connect to fabric")?;
    transport
        .publish(COMMANDS_TOPIC, payload)
        .await
        .context("publish command")?;
    println!("published {txn_id}");

    let store = RedisStore::new(&args.redis_url).context("connect to fabric")?;
    match await_confirmation(&store, user, &txn_id, CONFIRM_TIMEOUT, CONFIRM_INTERVAL).await? {
        Confirmation::Confirmed(record) => {
            println!("confirmed: balance {}", record.balance_after);
        }
        Confirmation::Unconfirmed => {
            println!("unconfirmed after {}s; the ledger may still apply it", CONFIRM_TIMEOUT.as_secs());
        }
    }
    Ok(())
}
