//! Gatewatch CLI
//!
//! Command-line client for the gate monitor backend.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use gatewatch::accounts::NewUser;
use gatewatch::{load_config, Config, GatewatchBuilder};
use tracing::Level;

#[derive(Parser)]
#[command(name = "gatewatch")]
#[command(about = "Gate monitor client: session check and live sensor feed")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Backend base URL (overrides config file)
    #[arg(long)]
    base_url: Option<String>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: Level,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate the session and follow the gate feed (default)
    Watch,
    /// Validate the stored session and print the identity
    Whoami,
    /// Log in and store the token
    Login {
        #[arg(short, long)]
        username: String,
        #[arg(short, long)]
        password: String,
    },
    /// Forget the stored token and identity
    Logout,
    /// Manage user accounts
    #[command(subcommand)]
    Users(UsersCommand),
}

#[derive(Subcommand, Debug)]
enum UsersCommand {
    /// List all users
    List,
    /// Create a user
    Add {
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: String,
        #[arg(long)]
        fullname: String,
        #[arg(long)]
        rfid: String,
    },
    /// Delete a user by id
    Delete { id: i64 },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .init();

    tracing::debug!(
        "Parsed command line arguments: config={:?}, base_url={:?}, log_level={:?}, command={:?}",
        args.config,
        args.base_url,
        args.log_level,
        args.command
    );

    let mut config = if let Some(config_path) = &args.config {
        tracing::debug!("Loading configuration from {:?}", config_path);
        load_config(config_path)?
    } else {
        tracing::debug!("Using default configuration");
        Config::default()
    };

    if let Some(base_url) = args.base_url {
        config.backend.base_url = base_url;
    }

    let gatewatch = GatewatchBuilder::new(config).build()?;

    match args.command.unwrap_or(Command::Watch) {
        Command::Watch => {
            let cancel = gatewatch.cancellation_token();
            tokio::spawn(async move {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!("Failed to listen for ctrl-c: {}", e);
                    return;
                }
                tracing::info!("Shutdown signal received");
                cancel.cancel();
            });
            gatewatch.start().await?;
        }
        Command::Whoami => {
            let cancel = gatewatch.cancellation_token();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    cancel.cancel();
                }
            });
            match gatewatch.whoami().await {
                Ok(user) => println!("{} ({}) [{}]", user.fullname, user.username, user.rfid),
                Err(gatewatch::GatewatchError::Cancelled) => {
                    tracing::info!("Cancelled before the session was validated");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Command::Login { username, password } => {
            gatewatch.accounts().login(&username, &password).await?;
            println!("Logged in as {}", username);
        }
        Command::Logout => {
            gatewatch.accounts().logout()?;
            println!("Logged out");
        }
        Command::Users(UsersCommand::List) => {
            for user in gatewatch.accounts().list_users().await? {
                println!(
                    "{}\t{}\t{}\t{}",
                    user.id, user.username, user.fullname, user.rfid
                );
            }
        }
        Command::Users(UsersCommand::Add {
            username,
            password,
            fullname,
            rfid,
        }) => {
            let id = gatewatch
                .accounts()
                .register(&NewUser {
                    username,
                    password,
                    fullname,
                    rfid,
                })
                .await?;
            println!("Created user {}", id);
        }
        Command::Users(UsersCommand::Delete { id }) => {
            let deleted = gatewatch.accounts().delete_user(id).await?;
            println!("Deleted user {}", deleted);
        }
    }

    Ok(())
}
