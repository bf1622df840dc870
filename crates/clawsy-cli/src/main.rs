//! clawsy: node client for the Clawsy agent gateway.
//!
//! Pairs this machine with a gateway as a "node" and serves the agent's
//! clipboard, screen, camera, file and location commands, asking on the
//! terminal before files leave or enter the shared folder.

mod approval;
mod commands;
mod config;
mod provider;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

use crate::commands::send::{SendArgs, AGENT_REQUEST};
use crate::config::{Config, Overrides};

/// clawsy: node client for the agent gateway
#[derive(Parser)]
#[command(name = "clawsy", version, about = "Node client for the Clawsy agent gateway")]
struct Cli {
    /// Config file path (default: ~/.clawsy/config.toml)
    #[arg(long = "config", global = true)]
    config: Option<PathBuf>,

    /// Gateway host
    #[arg(long, global = true)]
    host: Option<String>,

    /// Gateway port
    #[arg(short, long, global = true)]
    port: Option<u16>,

    /// Gateway auth token
    #[arg(long, global = true)]
    token: Option<String>,

    /// SSH user for the tunnel fallback
    #[arg(long = "ssh-user", global = true)]
    ssh_user: Option<String>,

    /// Never fall back to an SSH tunnel
    #[arg(long = "no-ssh-fallback", global = true)]
    no_ssh_fallback: bool,

    /// Use a throwaway device key for this run
    #[arg(long, global = true)]
    ephemeral: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Connect and serve gateway commands until interrupted (default)
    Run,

    /// Send one event to the agent
    Send {
        /// Message text
        message: Option<String>,

        /// Event kind
        #[arg(long, default_value = AGENT_REQUEST)]
        kind: String,

        /// Raw JSON payload instead of a message
        #[arg(long, conflicts_with = "message")]
        json: Option<String>,

        /// Wrap the content in a clawsy envelope
        #[arg(long)]
        envelope: bool,
    },

    /// Print the device id and public key
    Id,

    /// Generate the device key
    Keygen {
        /// Replace an existing key
        #[arg(long)]
        force: bool,
    },

    /// Print the effective configuration (token redacted)
    Config {
        /// Write it to the config file if none exists yet
        #[arg(long)]
        init: bool,
    },
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose {
        "clawsy=debug,clawsy_node=debug,clawsy_core=debug"
    } else {
        "clawsy=info,clawsy_node=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbose)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let mut cfg = match Config::load(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("clawsy: {e:#}");
            std::process::exit(1);
        }
    };

    // CLI flags override the file.
    cfg.apply(&Overrides {
        host: cli.host.clone(),
        port: cli.port,
        token: cli.token.clone(),
        ssh_user: cli.ssh_user.clone(),
        no_ssh_fallback: cli.no_ssh_fallback,
        ephemeral: cli.ephemeral,
    });

    let result = match cli.command.unwrap_or(Command::Run) {
        Command::Run => commands::run::run(&cfg).await,
        Command::Send {
            message,
            kind,
            json,
            envelope,
        } => {
            let args = SendArgs {
                message,
                kind,
                json,
                envelope,
            };
            commands::send::run(&cfg, &args).await
        }
        Command::Id => commands::id::run(&cfg),
        Command::Keygen { force } => commands::keygen::run(&cfg, force),
        Command::Config { init } => commands::show_config::run(&cfg, &config_path, init),
    };

    if let Err(e) = result {
        error!("{:#}", e);
        eprintln!("clawsy: {e:#}");
        std::process::exit(1);
    }
}
