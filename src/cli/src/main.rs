//! Bastion CLI - operator command line for the Bastion policy engine.
//!
//! Connects directly to PostgreSQL through `bastion-core` and provides
//! decision checks, provisioning, role assignment, the role re-cascade and
//! token administration.

mod backend;
mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};

use backend::Backend;
use commands::{migrate, policy, token};
use output::OutputFormat;

/// Bastion - multi-tenant RBAC policy engine CLI
#[derive(Parser)]
#[command(
    name = "bastion",
    version,
    about = "Bastion - multi-tenant RBAC policy engine",
    long_about = "Operator CLI for checking decisions, provisioning domains and managing auth tokens.",
    propagate_version = true
)]
pub struct Cli {
    /// Output format
    #[arg(short, long, global = true, default_value = "table")]
    output: OutputFormat,

    /// Configuration file; the environment (BASTION__*) is used otherwise
    #[arg(short, long, global = true, env = "BASTION_CONFIG")]
    config: Option<String>,

    /// Emit engine logs
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(flatten)]
    Policy(policy::PolicyCommands),

    /// Re-provision every project and cascade organization roles into it
    MigrateRoles,

    /// Auth token management
    #[command(subcommand)]
    Token(token::TokenCommands),

    /// Apply database schema migrations
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    if let Err(e) = run(cli).await {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }

    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let config = backend::load_config(cli.config.as_deref())?;
    if cli.verbose {
        let mut logging = config.logging.clone();
        logging.format = bastion_core::telemetry::LogFormat::Compact;
        bastion_core::telemetry::init(&logging)?;
    }

    let backend = Backend::connect(&config).await?;
    let format = cli.output;

    match cli.command {
        Commands::Policy(cmd) => policy::execute(cmd, &backend, format).await,
        Commands::MigrateRoles => migrate::roles(&backend, format).await,
        Commands::Token(cmd) => token::execute(cmd, &backend, format).await,
        Commands::Migrate => migrate::schema(&backend).await,
    }
}
