use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, EnvFilter};

use crate::clock::{parse_instant, Clock};
use crate::config::ConfigLoader;
use crate::storage;

pub mod commands;

use self::commands::{ActivityArgs, MessageArgs, ProfileArgs, Session};

#[derive(Parser, Debug)]
#[command(
    name = "meetup",
    version,
    about = "Find activities nearby and chat with the people going"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Override the config file location (takes precedence over MEETUP_CONFIG)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override the data directory (takes precedence over MEETUP_DATA)
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Minimum log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Act as this user id instead of `user.id` from the config
    #[arg(long = "as", value_name = "USER")]
    pub acting_user: Option<String>,

    /// Pin "now" to a fixed instant, e.g. 2024-10-19T10:00:00+02:00
    #[arg(long)]
    pub now: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create, browse and join activities
    Activity(ActivityArgs),
    /// Direct messages between users
    Message(MessageArgs),
    /// Manage user profiles
    Profile(ProfileArgs),
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    if let Some(path) = &cli.config {
        env::set_var("MEETUP_CONFIG", path);
    }
    if let Some(path) = &cli.data_dir {
        env::set_var("MEETUP_DATA", path);
    }

    let loader = ConfigLoader::discover()?;
    loader.paths().ensure_directories()?;
    init_tracing(&cli.log_level)
        .with_context(|| format!("initialising logging at level {}", cli.log_level))?;
    let config = loader.load_or_init()?;
    let storage = storage::init(&config.storage)?;

    let clock = match cli.now.as_deref() {
        Some(raw) => {
            let at = parse_instant(raw).with_context(|| format!("invalid --now value '{raw}'"))?;
            Clock::fixed(at.to_offset(config.activities.offset()))
        }
        None => config.clock(),
    };
    let user = cli
        .acting_user
        .or_else(|| config.user.id.clone())
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty());
    tracing::debug!(user = ?user, now = %clock.now(), "session ready");

    let session = Session {
        config: Arc::new(config),
        storage,
        clock,
        user,
    };
    match cli.command {
        Commands::Activity(args) => commands::handle_activity_command(&session, args),
        Commands::Message(args) => commands::handle_message_command(&session, args),
        Commands::Profile(args) => commands::handle_profile_command(&session, args),
    }
}

fn init_tracing(level: &str) -> Result<()> {
    static INIT: OnceCell<()> = OnceCell::new();
    INIT.get_or_try_init(|| {
        let env_filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
        fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
        Ok(())
    })
    .map(|_| ())
}
