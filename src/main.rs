// hubguard - Main Entry Point
//
// Command line front end over the persisted stores:
// - Rate-limit history in <data_dir>/rate_limits.json
// - The session CSRF slot in <data_dir>/session.json
//
// Denied checks and rejected tokens exit with status 2.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, Level};
use tracing_subscriber::EnvFilter;

use hubguard::config::Config;
use hubguard::csrf::CsrfTokenManager;
use hubguard::guard::TrustBoundary;
use hubguard::metrics;
use hubguard::rate_limit::RateLimiter;
use hubguard::storage::{FileStore, KeyValueStore};

/// Exit status for a denied check or a rejected token
const EXIT_DENIED: u8 = 2;

/// hubguard: client-side abuse prevention for the distributor hub
#[derive(Parser, Debug)]
#[command(name = "hubguard")]
#[command(author = "Distributor Hub Contributors")]
#[command(version)]
#[command(about = "Sliding-window rate limiting and CSRF tokens for the distributor hub", long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Print Prometheus metrics after the command
    #[arg(long, global = true)]
    metrics: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Record an attempt at an action if the quota allows it
    Check {
        /// Action key, e.g. "login-attempt"
        action: String,

        /// Configured limiter to use
        #[arg(short, long, default_value = "default")]
        limiter: String,
    },
    /// Show how many attempts are left in the current window
    Remaining {
        action: String,

        #[arg(short, long, default_value = "default")]
        limiter: String,
    },
    /// Show milliseconds until the oldest stored attempt expires
    ResetTime {
        action: String,

        #[arg(short, long, default_value = "default")]
        limiter: String,
    },
    /// Clear the history of one action
    Reset {
        action: String,

        #[arg(short, long, default_value = "default")]
        limiter: String,
    },
    /// Clear every history owned by a limiter
    ResetAll {
        #[arg(short, long, default_value = "default")]
        limiter: String,
    },
    /// Rate-limit and CSRF-check one submission
    Authorize {
        action: String,

        /// Submitted CSRF token
        token: String,

        #[arg(short, long, default_value = "form_submit")]
        limiter: String,
    },
    /// List configured limiters
    Limiters,
    /// Manage the session CSRF token
    Token {
        #[command(subcommand)]
        command: TokenCommand,
    },
}

#[derive(Subcommand, Debug)]
enum TokenCommand {
    /// Print the current token, issuing one if needed
    Get,
    /// Issue a new token unconditionally
    Generate,
    /// Check a submitted token
    Validate { token: String },
    /// Rotate the token
    Refresh,
    /// Remove the token
    Clear,
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };

    init_tracing(&config, args.verbose)?;

    if args.metrics {
        metrics::init().context("Failed to register metrics")?;
    }

    debug!(data_dir = ?config.storage.data_dir, "Using data directory");

    let code = run(&config, args.command)?;

    if args.metrics {
        print!("{}", metrics::gather()?);
    }

    Ok(code)
}

fn init_tracing(config: &Config, verbose: bool) -> Result<()> {
    let level = if verbose {
        Level::DEBUG
    } else {
        config.log_level()?
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr);

    match config.logging.format.to_lowercase().as_str() {
        "json" => builder.json().init(),
        "pretty" => builder.pretty().init(),
        _ => builder.compact().init(),
    }

    Ok(())
}

fn run(config: &Config, command: Commands) -> Result<ExitCode> {
    match command {
        Commands::Check { action, limiter } => {
            let limiter = open_limiter(config, &limiter)?;
            if limiter.check(&action) {
                println!("allowed ({} remaining)", limiter.remaining(&action));
                Ok(ExitCode::SUCCESS)
            } else {
                println!("denied (retry in {}ms)", limiter.fresh_reset_time(&action));
                Ok(ExitCode::from(EXIT_DENIED))
            }
        }
        Commands::Remaining { action, limiter } => {
            let limiter = open_limiter(config, &limiter)?;
            println!("{}", limiter.remaining(&action));
            Ok(ExitCode::SUCCESS)
        }
        Commands::ResetTime { action, limiter } => {
            let limiter = open_limiter(config, &limiter)?;
            println!("{}", limiter.reset_time(&action));
            Ok(ExitCode::SUCCESS)
        }
        Commands::Reset { action, limiter } => {
            let limiter = open_limiter(config, &limiter)?;
            limiter.reset(&action);
            println!("reset '{}'", action);
            Ok(ExitCode::SUCCESS)
        }
        Commands::ResetAll { limiter } => {
            let limiter = open_limiter(config, &limiter)?;
            limiter.reset_all();
            println!("reset all under '{}'", limiter.config().key_prefix);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Authorize {
            action,
            token,
            limiter,
        } => {
            let boundary = TrustBoundary::new(open_limiter(config, &limiter)?, open_csrf(config)?);
            match boundary.authorize(&action, &token) {
                Ok(()) => {
                    println!("authorized");
                    Ok(ExitCode::SUCCESS)
                }
                Err(rejection) => {
                    println!("rejected: {}", rejection);
                    Ok(ExitCode::from(EXIT_DENIED))
                }
            }
        }
        Commands::Limiters => {
            for (name, limiter) in &config.limiters {
                println!(
                    "{}\t{} per {}ms\t{}",
                    name, limiter.max_requests, limiter.window_ms, limiter.key_prefix
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Token { command } => run_token(config, command),
    }
}

fn run_token(config: &Config, command: TokenCommand) -> Result<ExitCode> {
    let csrf = open_csrf(config)?;

    match command {
        TokenCommand::Get => println!("{}", csrf.get_token()),
        TokenCommand::Generate => println!("{}", csrf.generate_token()),
        TokenCommand::Refresh => println!("{}", csrf.refresh_token()),
        TokenCommand::Clear => {
            csrf.clear_token();
            println!("cleared");
        }
        TokenCommand::Validate { token } => {
            if csrf.validate_token(&token) {
                println!("valid");
            } else {
                println!("invalid");
                return Ok(ExitCode::from(EXIT_DENIED));
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn open_limiter(config: &Config, name: &str) -> Result<RateLimiter> {
    let limiter_config = config.limiter(name).cloned().with_context(|| {
        let known: Vec<&str> = config.limiters.keys().map(String::as_str).collect();
        format!("Unknown rate limiter '{}'. Configured: {}", name, known.join(", "))
    })?;

    let path = config.storage.rate_limit_path();
    let store: Arc<dyn KeyValueStore> = Arc::new(
        FileStore::open(&path)
            .with_context(|| format!("Failed to open rate limit store at {:?}", path))?,
    );

    Ok(RateLimiter::new(store, limiter_config))
}

fn open_csrf(config: &Config) -> Result<CsrfTokenManager> {
    let path = config.storage.session_path();
    let store: Arc<dyn KeyValueStore> = Arc::new(
        FileStore::open(&path)
            .with_context(|| format!("Failed to open session store at {:?}", path))?,
    );

    Ok(CsrfTokenManager::new(store, config.csrf.clone()))
}
