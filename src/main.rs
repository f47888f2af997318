use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use herald::feed::parser_by_name;
use herald::{Config, CycleOutcome, Database, Notifier, Subscription};

#[derive(Parser, Debug)]
#[command(name = "herald", about = "Push new feed entries to chat webhooks")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(long, value_name = "FILE", default_value = "herald.toml")]
    config: PathBuf,

    /// Run a single polling round and exit, regardless of poll_interval_minutes
    #[arg(long)]
    once: bool,

    /// Reset the database (delete and recreate), dropping all dedup state
    #[arg(long)]
    reset_db: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config = Config::load(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    if config.subscriptions.is_empty() {
        eprintln!("Error: no subscriptions configured.");
        eprintln!();
        eprintln!("Declare at least one in {}:", args.config.display());
        eprintln!();
        eprintln!("  [[subscriptions]]");
        eprintln!("  name = \"my-feed\"");
        eprintln!("  feed_url = \"https://example.com/feed.xml\"");
        eprintln!("  webhook_url = \"https://discord.com/api/webhooks/...\"");
        std::process::exit(1);
    }

    let subscriptions: Vec<Subscription> = config
        .subscriptions
        .iter()
        .map(|sub| {
            // Config validation already vetted the parser name.
            let parser = parser_by_name(&sub.parser)
                .with_context(|| format!("Unknown parser {:?}", sub.parser))?;
            Ok(Subscription {
                name: sub.name.clone(),
                feed_url: sub.feed_url.clone(),
                webhook_url: sub.webhook_url.clone(),
                parser,
            })
        })
        .collect::<Result<_>>()?;

    if args.reset_db && std::path::Path::new(&config.database_path).exists() {
        std::fs::remove_file(&config.database_path).context("Failed to delete database")?;
        println!("Database reset.");
    }

    let db = Database::open(&config.database_path)
        .await
        .with_context(|| format!("Failed to open database at {}", config.database_path))?;

    let client = reqwest::Client::builder()
        .user_agent(concat!("herald/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")?;

    let notifier = Notifier::new(db, client, config.delivery.to_policy());

    let mut interval = (!args.once && config.poll_interval_minutes > 0)
        .then(|| tokio::time::interval(Duration::from_secs(config.poll_interval_minutes * 60)));

    loop {
        if let Some(interval) = interval.as_mut() {
            interval.tick().await;
        }

        let results = notifier.run_all(&subscriptions).await;
        for (sub, result) in subscriptions.iter().zip(results) {
            match result {
                Ok(CycleOutcome::NoChange) => {
                    tracing::info!(subscription = %sub.name, "No new entries");
                }
                Ok(CycleOutcome::Completed {
                    new_entries,
                    delivered,
                    failed,
                }) => {
                    tracing::info!(
                        subscription = %sub.name,
                        new_entries = new_entries,
                        delivered = delivered,
                        failed = failed,
                        "Cycle completed"
                    );
                }
                Err(e) => {
                    tracing::error!(subscription = %sub.name, error = %e, "Cycle failed");
                }
            }
        }

        if interval.is_none() {
            break;
        }
    }

    Ok(())
}
