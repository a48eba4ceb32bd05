#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for the subscription user mirror.

use std::sync::Arc;
use std::time::Instant;

use clap::{Parser, Subcommand};
use paddle_mirror_cli_utils::{IndicatifStatusSink, init_logger};
use paddle_mirror_database::{DateRange, UserStore};
use paddle_mirror_ingest::{IngestOutcome, IngestionController, MirrorConfig};
use paddle_mirror_ingest_models::{ApiProfile, IngestionSettings, null_sink};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "paddle_mirror_ingest", about = "Subscription user mirror")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch every configured page and upsert it into the local store
    Sync {
        /// Do not draw a progress bar
        #[arg(long)]
        quiet: bool,
    },
    /// Save the ingestion settings used by `sync` and the server
    Configure {
        /// Vendor id credential
        #[arg(long)]
        vendor_id: String,
        /// Vendor auth code credential
        #[arg(long)]
        vendor_auth_code: String,
        /// First page of every sweep (1-based)
        #[arg(long, default_value = "1")]
        start_page: u32,
        /// Last page of every sweep (inclusive)
        #[arg(long, default_value = "10")]
        max_pages: u32,
        /// Only fetch this subscription
        #[arg(long)]
        subscription_id: Option<i64>,
        /// Only fetch this plan
        #[arg(long)]
        plan_id: Option<i64>,
        /// Endpoint profile (`MOCK` or `LIVE`)
        #[arg(long, default_value = "MOCK")]
        api_profile: ApiProfile,
    },
    /// Print the saved ingestion settings
    Settings,
    /// List stored users, optionally within an inclusive signup date range
    List {
        /// Earliest signup date (yyyy-MM-dd)
        #[arg(long)]
        start_date: Option<String>,
        /// Latest signup date (yyyy-MM-dd)
        #[arg(long)]
        end_date: Option<String>,
    },
    /// Delete every stored user and reset the identity sequence
    Clear,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = init_logger();
    let cli = Cli::parse();

    let config = MirrorConfig::load()?;
    let store = Arc::new(UserStore::open(&config.db_path).await?);

    match cli.command {
        Commands::Sync { quiet } => {
            let start = Instant::now();
            let fetcher = Arc::new(config.build_fetcher()?);
            let sink = if quiet {
                null_sink()
            } else {
                IndicatifStatusSink::ingestion_bar(&multi, "Mirroring subscription users")
            };
            let controller = IngestionController::new(store.clone(), fetcher, sink)
                .with_page_delay(config.page_delay());

            let cancel = CancellationToken::new();
            let ctrl_c = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    log::warn!("Interrupt received, stopping after the current page");
                    ctrl_c.cancel();
                }
            });

            match controller.run(&cancel).await? {
                IngestOutcome::Completed(users) => {
                    log::info!(
                        "Sync complete: {} users stored ({:.1}s)",
                        users.len(),
                        start.elapsed().as_secs_f64()
                    );
                }
                IngestOutcome::Cancelled => {
                    log::warn!(
                        "Sync cancelled; {} users stored so far",
                        store.count_users().await?
                    );
                }
            }
        }
        Commands::Configure {
            vendor_id,
            vendor_auth_code,
            start_page,
            max_pages,
            subscription_id,
            plan_id,
            api_profile,
        } => {
            let settings = IngestionSettings {
                vendor_id,
                vendor_auth_code,
                start_page,
                max_pages,
                subscription_id,
                plan_id,
                api_profile,
            };
            settings.validate()?;
            store.save_settings(&settings).await?;
            println!("Settings saved (key {})", settings.correlation_key());
        }
        Commands::Settings => match store.load_settings().await? {
            Some(settings) => {
                println!("{:<18} {}", "vendor_id", settings.vendor_id);
                println!("{:<18} ***", "vendor_auth_code");
                println!("{:<18} {}", "start_page", settings.start_page);
                println!("{:<18} {}", "max_pages", settings.max_pages);
                println!(
                    "{:<18} {}",
                    "subscription_id",
                    settings
                        .subscription_id
                        .map_or_else(|| "-".to_string(), |id| id.to_string())
                );
                println!(
                    "{:<18} {}",
                    "plan_id",
                    settings
                        .plan_id
                        .map_or_else(|| "-".to_string(), |id| id.to_string())
                );
                println!("{:<18} {}", "api_profile", settings.api_profile);
                println!("{:<18} {}", "correlation_key", settings.correlation_key());
            }
            None => println!("No settings saved. Run `configure` first."),
        },
        Commands::List {
            start_date,
            end_date,
        } => {
            let range = DateRange::parse(start_date, end_date)?;
            let users = store.get_users(&range).await?;

            println!(
                "{:<14} {:<10} {:<32} {:<10} SIGNUP",
                "SUBSCRIPTION", "PLAN", "EMAIL", "STATE"
            );
            println!("{}", "-".repeat(90));
            for user in &users {
                println!(
                    "{:<14} {:<10} {:<32} {:<10} {}",
                    user.subscription_id,
                    user.plan_id,
                    user.email,
                    user.state,
                    user.signup_day()
                );
            }
            println!("{} user(s)", users.len());
        }
        Commands::Clear => {
            let deleted = store.delete_all_users().await?;
            println!("Deleted {deleted} user(s)");
        }
    }

    if let Ok(store) = Arc::try_unwrap(store) {
        store.close();
    }

    Ok(())
}
