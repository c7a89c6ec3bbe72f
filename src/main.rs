use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use formguard::config::{FormguardConfig, LoggingConfig};
use formguard::ratelimit::{Clock, RateLimiter, SystemClock};

/// Inspect and manage contact-form rate limits.
#[derive(Debug, Parser)]
#[command(name = "formguard", version, about)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, env = "FORMGUARD_CONFIG")]
    config: Option<PathBuf>,

    /// Redis URL, overrides the configuration file
    #[arg(long)]
    redis_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Record a submission attempt and print the decision
    Check { key: String },
    /// Print the current quota without recording an attempt
    Status { key: String },
    /// Clear every recorded attempt for a key
    Reset { key: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = FormguardConfig::load(cli.config.as_deref()).with_context(|| match &cli.config {
        Some(path) => format!("loading {}", path.display()),
        None => "loading default configuration".to_string(),
    })?;
    if let Some(url) = cli.redis_url {
        config.store.url = Some(url);
    }

    // The subscriber depends on the configuration, so log its source afterwards.
    init_tracing(&config.logging)?;
    info!(version = env!("CARGO_PKG_VERSION"), "Starting Formguard");
    match &cli.config {
        Some(path) => info!(path = %path.display(), "Configuration loaded"),
        None => info!("Using default configuration"),
    }

    let limiter = RateLimiter::from_config(&config)?;

    match cli.command {
        Command::Check { key } => {
            let result = limiter.check_rate_limit(&key).await;
            if result.limited {
                warn!(
                    key = %key,
                    minutes = result.minutes_until_reset(SystemClock.now_millis()),
                    "Submission would be rejected"
                );
            }
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Status { key } => {
            let result = limiter.get_rate_limit_status(&key).await;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Reset { key } => {
            let reset = limiter.reset_rate_limit(&key).await;
            println!("{}", serde_json::json!({ "reset": reset }));
            if !reset {
                anyhow::bail!("failed to reset rate limit for {:?}", key);
            }
        }
    }

    Ok(())
}

/// Install the global subscriber. Logs go to stderr so stdout stays JSON.
fn init_tracing(logging: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_new(&logging.level)
        .with_context(|| format!("invalid log filter {:?}", logging.level))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}
