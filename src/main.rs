use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

use bibsync::config::Config;
use bibsync::db::LocalStore;
use commands::{
    try_auto_sync, AttachmentCommand, CollectionCommand, ConfigCommand, ItemCommand, SyncCommand,
};

#[derive(Parser)]
#[command(name = "bibsync")]
#[command(version)]
#[command(about = "Offline cache for a bibliographic reference service", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage items (books, articles, ...)
    Item(ItemCommand),

    /// Manage collections
    Collection(CollectionCommand),

    /// Manage attachments and notes
    Attachment(AttachmentCommand),

    /// Sync with remote server
    Sync(SyncCommand),

    /// Manage configuration
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "bibsync=warn".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let cli_config_path = cli.config.clone();
    let config = Config::load(cli.config)?;

    let command = match cli.command {
        Some(command) => command,
        None => {
            println!("Use --help to see available commands");
            return Ok(());
        }
    };

    if let Commands::Config(cmd) = &command {
        return cmd.run(&config, cli_config_path.as_deref());
    }

    let store = LocalStore::open(&config.database_path.value).await?;

    let result = execute_command(&command, &store, &config).await;

    // Auto-sync AFTER write commands (only if command succeeded)
    if result.is_ok() && is_write_command(&command) {
        try_auto_sync(&config, &store).await;
    }

    result
}

async fn execute_command(
    command: &Commands,
    store: &LocalStore,
    config: &Config,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::Item(cmd) => cmd.run(store).await?,
        Commands::Collection(cmd) => cmd.run(store).await?,
        Commands::Attachment(cmd) => cmd.run(store).await?,
        Commands::Sync(cmd) => cmd.run(store, config).await?,
        Commands::Config(cmd) => cmd.run(config, None)?,
    }
    Ok(())
}

fn is_write_command(command: &Commands) -> bool {
    use commands::{AttachmentSubcommand, CollectionSubcommand, ItemSubcommand};

    match command {
        Commands::Item(cmd) => matches!(
            cmd.command,
            ItemSubcommand::New { .. } | ItemSubcommand::Set { .. } | ItemSubcommand::Tag { .. }
        ),
        Commands::Collection(cmd) => matches!(
            cmd.command,
            CollectionSubcommand::New { .. }
                | CollectionSubcommand::Add { .. }
                | CollectionSubcommand::Remove { .. }
                | CollectionSubcommand::Rename { .. }
        ),
        Commands::Attachment(cmd) => matches!(cmd.command, AttachmentSubcommand::Note { .. }),
        Commands::Sync(_) | Commands::Config(_) => false,
    }
}
