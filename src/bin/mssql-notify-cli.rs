//! CLI tool for SQL Server change listeners
//!
//! Renders the listener scripts for review, inspects and cleans up installed
//! listener objects, and runs a listener that prints every change it receives.
//!
//! Configuration comes from an optional file plus `MSSQL_NOTIFY__*`
//! environment variables (see `mssql_notify::config::loader`).

use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use mssql_notify::config::{INSTALL_PROCEDURE_PREFIX, SERVICE_PREFIX, UNINSTALL_PROCEDURE_PREFIX};
use mssql_notify::scripts::forced_cleanup_script;
use mssql_notify::{
    clean_database, list_active_identities, load_listener_config, CallbackHandler,
    ListenerConfig, MssqlExecutor, RawChangeListener, ScriptSynthesizer,
};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "mssql-notify-cli")]
#[command(about = "Manage SQL Server table change listeners")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render install, uninstall and poll scripts
    Scripts(ScriptsArgs),
    /// Validate configuration file
    ValidateConfig(ValidateConfigArgs),
    /// List identities with listener objects installed in the database
    Identities(IdentitiesArgs),
    /// Run and drop every listener procedure in the database
    Cleanup(CleanupArgs),
    /// Start a listener and print received changes until Ctrl-C
    Listen(ConfigArgs),
}

#[derive(Args)]
struct ConfigArgs {
    /// Configuration file path (optional, environment variables also apply)
    #[arg(short, long, env = "MSSQL_NOTIFY_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Args)]
struct ScriptsArgs {
    #[command(flatten)]
    config: ConfigArgs,

    /// Write one file per script into this directory instead of stdout
    #[arg(short, long)]
    output_dir: Option<PathBuf>,
}

#[derive(Args)]
struct ValidateConfigArgs {
    /// Configuration file path
    config: PathBuf,
}

#[derive(Args)]
struct IdentitiesArgs {
    #[command(flatten)]
    config: ConfigArgs,

    /// Service name prefix to match
    #[arg(long, default_value = SERVICE_PREFIX)]
    prefix: String,
}

#[derive(Args)]
struct CleanupArgs {
    #[command(flatten)]
    config: ConfigArgs,

    /// Prefix of uninstall procedures to execute and drop
    #[arg(long, default_value = UNINSTALL_PROCEDURE_PREFIX)]
    uninstall_prefix: String,

    /// Prefix of install procedures to drop
    #[arg(long, default_value = INSTALL_PROCEDURE_PREFIX)]
    install_prefix: String,

    /// Execute the cleanup; without this flag the script is only printed
    #[arg(long)]
    yes: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    mssql_notify::logging::init_structured_logging();
    let cli = Cli::parse();

    match cli.command {
        Commands::Scripts(args) => render_scripts(args)?,
        Commands::ValidateConfig(args) => validate_config(args)?,
        Commands::Identities(args) => identities(args).await?,
        Commands::Cleanup(args) => cleanup(args).await?,
        Commands::Listen(args) => listen(args).await?,
    }

    Ok(())
}

fn load(args: &ConfigArgs) -> anyhow::Result<ListenerConfig> {
    load_listener_config(args.config.as_deref()).context("Failed to load listener configuration")
}

fn render_scripts(args: ScriptsArgs) -> anyhow::Result<()> {
    let config = load(&args.config)?;
    let scripts = ScriptSynthesizer::new(&config);

    let rendered = [
        ("install", scripts.install_procedure()?),
        ("uninstall", scripts.uninstall_procedure()?),
        ("poll", scripts.poll_query(config.poll_wait_ms())?),
    ];

    match args.output_dir {
        Some(output_dir) => {
            fs::create_dir_all(&output_dir)?;
            let timestamp = Utc::now().format("%Y%m%d%H%M%S").to_string();
            for (name, sql) in rendered {
                let filepath =
                    output_dir.join(format!("{timestamp}_{name}_listener_{}.sql", config.identity));
                fs::write(&filepath, sql)
                    .with_context(|| format!("Failed to write {}", filepath.display()))?;
                println!("Generated {}", filepath.display());
            }
        }
        None => {
            for (name, sql) in rendered {
                println!("-- ===== {name} =====");
                println!("{sql}");
            }
        }
    }

    Ok(())
}

fn validate_config(args: ValidateConfigArgs) -> anyhow::Result<()> {
    let config = load_listener_config(Some(args.config.as_path()))?;

    println!("✅ Configuration is valid");
    println!("   Database: {}", config.database_name);
    println!("   Table: {}.{}", config.schema_name, config.table_name);
    println!("   Identity: {}", config.identity);
    println!("   Notification types: {:?}", config.listener_type);
    println!(
        "   Mode: {}",
        if config.manual_configuration {
            "manual"
        } else {
            "automatic"
        }
    );
    println!("   Queue: {}.{}", config.queue_schema_name, config.queue_name());
    println!("   Service: {}", config.service_name());
    println!("   Trigger: {}", config.trigger_name());

    Ok(())
}

async fn identities(args: IdentitiesArgs) -> anyhow::Result<()> {
    let config = load(&args.config)?;
    let executor = MssqlExecutor::from_connection_string(&config.connection_string)?;

    let identities = list_active_identities(
        &executor,
        &config.database_name,
        &args.prefix,
        config.command_timeout(),
    )
    .await?;

    if identities.is_empty() {
        println!("No listener identities installed in {}", config.database_name);
    }
    for identity in identities {
        println!("{identity}");
    }
    Ok(())
}

async fn cleanup(args: CleanupArgs) -> anyhow::Result<()> {
    let config = load(&args.config)?;

    if !args.yes {
        println!(
            "{}",
            forced_cleanup_script(
                &config.database_name,
                &args.uninstall_prefix,
                &args.install_prefix
            )?
        );
        println!("-- Re-run with --yes to execute this script");
        return Ok(());
    }

    let executor = MssqlExecutor::from_connection_string(&config.connection_string)?;
    clean_database(
        &executor,
        &config.database_name,
        &args.uninstall_prefix,
        &args.install_prefix,
        config.command_timeout(),
    )
    .await?;
    println!("Listener procedures removed from {}", config.database_name);
    Ok(())
}

async fn listen(args: ConfigArgs) -> anyhow::Result<()> {
    let config = load(&args)?;
    let executor = Arc::new(MssqlExecutor::from_connection_string(
        &config.connection_string,
    )?);

    let handler = CallbackHandler::<String>::new(|event| {
        println!("{} {}", event.received_at.to_rfc3339(), event.message);
    })
    .on_stopped(|| info!("Receive loop stopped"));

    let listener = RawChangeListener::new(config, executor, handler)?;
    listener.start().await?;
    info!(identity = listener.identity(), "Listening for changes, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;

    let stats = listener.stats();
    listener.stop().await?;
    info!(
        events = stats.events_received,
        polls = stats.polls,
        "Listener stopped"
    );

    if stats.loop_faults > 0 {
        bail!(
            "receive loop stopped after a database error: {}",
            stats.last_error.unwrap_or_default()
        );
    }
    Ok(())
}
