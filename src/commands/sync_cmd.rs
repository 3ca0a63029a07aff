//! Sync CLI commands for synchronizing with the server.

use clap::{Args, Subcommand, ValueEnum};

use bibsync::config::Config;
use bibsync::db::{LocalStore, StoreError};
use bibsync::models::{Attachment, Collection, Entity, EntityKind, Item};
use bibsync::sync::{Fetched, HttpGateway, SyncEngine, SyncError, SyncReport, SyncResult};

/// Sync with remote server
#[derive(Args)]
pub struct SyncCommand {
    #[command(subcommand)]
    command: Option<SyncSubcommand>,

    /// Only sync one kind (item, collection, attachment)
    #[arg(long, short)]
    kind: Option<EntityKind>,

    /// Push local changes without downloading server records
    #[arg(long)]
    no_pull: bool,
}

#[derive(Subcommand)]
enum SyncSubcommand {
    /// Show sync configuration, pending changes and server status
    Status,

    /// Settle a conflicted record
    Resolve {
        /// Record kind (item, collection, attachment)
        kind: EntityKind,

        /// Record key
        key: String,

        /// Which copy wins
        #[arg(long, value_enum)]
        keep: Keep,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Keep {
    /// Keep the local edit and overwrite the server on the next sync
    Local,
    /// Replace the local copy with the server copy
    Remote,
}

impl SyncCommand {
    pub async fn run(&self, store: &LocalStore, config: &Config) -> Result<(), SyncCommandError> {
        match &self.command {
            None => self.sync(store, config).await,
            Some(SyncSubcommand::Status) => self.status(store, config).await,
            Some(SyncSubcommand::Resolve { kind, key, keep }) => {
                self.resolve(store, config, *kind, key, *keep).await
            }
        }
    }

    fn engine(&self, store: &LocalStore, config: &Config) -> SyncResult<SyncEngine<HttpGateway>> {
        let gateway = HttpGateway::from_config(&config.sync)?;
        Ok(SyncEngine::new(store.clone(), gateway)
            .with_pull_remote(config.sync.pull_remote && !self.no_pull))
    }

    async fn sync(&self, store: &LocalStore, config: &Config) -> Result<(), SyncCommandError> {
        let engine = self.engine(store, config)?;

        // Ctrl-C stops the running pass after the record in flight.
        let abort = engine.abort_handle();
        let watcher = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                abort.abort();
            }
        });

        println!("Syncing with server...");
        println!();

        let reports = match self.kind {
            Some(kind) => vec![sync_kind(&engine, kind).await?],
            None => engine.sync_all().await?,
        };
        watcher.abort();

        for report in &reports {
            print_report(report);
        }

        println!();
        let conflicts: usize = reports.iter().map(|r| r.conflicts.len()).sum();
        if reports.iter().any(|r| r.aborted) {
            println!("Sync aborted.");
        } else if reports.iter().all(SyncReport::is_clean) {
            println!("Sync complete.");
        } else if conflicts > 0 {
            println!(
                "Sync finished with {} conflict{}. Use 'bibsync sync resolve' to settle them.",
                conflicts,
                if conflicts == 1 { "" } else { "s" }
            );
        } else {
            println!("Sync finished with errors.");
        }

        Ok(())
    }

    async fn status(&self, store: &LocalStore, config: &Config) -> Result<(), SyncCommandError> {
        println!("Sync Configuration");
        println!("==================");
        println!();

        println!("Pending changes:");
        println!(
            "  collections: {}",
            store.count_pending::<Collection>().await?
        );
        println!("  items:       {}", store.count_pending::<Item>().await?);
        println!(
            "  attachments: {}",
            store.count_pending::<Attachment>().await?
        );
        println!();

        let server_url = match config.sync.server_url.as_deref() {
            Some(url) if config.sync.is_configured() => url,
            _ => {
                println!("Status: Not configured");
                println!();
                println!("To enable sync, add to your config file:");
                println!();
                println!("  sync:");
                println!("    server_url: \"https://refs.example.com/api\"");
                println!();
                println!("Or set environment variable:");
                println!("  BIBSYNC_SYNC_URL");
                return Ok(());
            }
        };

        println!("Server:    {}", server_url);
        println!(
            "Auto-sync: {}",
            if config.sync.auto_sync {
                "enabled"
            } else {
                "disabled"
            }
        );
        println!();

        print!("Server status: ");
        let gateway = HttpGateway::from_config(&config.sync)?;
        match gateway.check_server().await {
            Ok(()) => println!("✓ connected"),
            Err(SyncError::Transport {
                retryable: true, ..
            }) => println!("✗ unreachable"),
            Err(e) => println!("✗ error: {}", e),
        }

        Ok(())
    }

    async fn resolve(
        &self,
        store: &LocalStore,
        config: &Config,
        kind: EntityKind,
        key: &str,
        keep: Keep,
    ) -> Result<(), SyncCommandError> {
        let engine = self.engine(store, config)?;
        let message = match kind {
            EntityKind::Item => resolve_record::<Item>(&engine, key, keep).await?,
            EntityKind::Collection => resolve_record::<Collection>(&engine, key, keep).await?,
            EntityKind::Attachment => resolve_record::<Attachment>(&engine, key, keep).await?,
        };
        println!("{}", message);
        Ok(())
    }
}

async fn sync_kind(engine: &SyncEngine<HttpGateway>, kind: EntityKind) -> SyncResult<SyncReport> {
    match kind {
        EntityKind::Item => engine.sync_pass::<Item>().await,
        EntityKind::Collection => engine.sync_pass::<Collection>().await,
        EntityKind::Attachment => engine.sync_pass::<Attachment>().await,
    }
}

async fn resolve_record<T: Entity>(
    engine: &SyncEngine<HttpGateway>,
    key: &str,
    keep: Keep,
) -> SyncResult<String> {
    let shadow = match engine.fetch_one::<T>(key).await? {
        Fetched::Applied(record) => {
            return Ok(format!(
                "{} '{}' had no local changes; refreshed from server ({})",
                T::KIND,
                record.key(),
                record.etag()
            ))
        }
        Fetched::LocalKept(shadow) => shadow,
    };

    Ok(match keep {
        Keep::Local => {
            let record = engine.resolve_keep_local::<T>(&shadow).await?;
            format!(
                "Kept local {} '{}'; it will overwrite the server on the next sync",
                T::KIND,
                record.key()
            )
        }
        Keep::Remote => {
            let record = engine.resolve_take_remote::<T>(&shadow).await?;
            format!("Replaced local {} '{}' with the server copy", T::KIND, record.key())
        }
    })
}

fn print_report(report: &SyncReport) {
    println!("  {}", report);
    for conflict in &report.conflicts {
        let remote_etag = conflict
            .remote
            .as_ref()
            .map(|r| r.etag.as_str())
            .unwrap_or("unknown");
        println!(
            "      conflict: {} (local {}, server {})",
            conflict.key, conflict.local_etag, remote_etag
        );
    }
    for failure in &report.failures {
        println!("      failed: {} - {}", failure.key, failure.error);
    }
    if let Some(error) = &report.pull_error {
        println!("      download failed: {}", error);
    }
}

/// Errors from sync commands
#[derive(Debug)]
pub enum SyncCommandError {
    Sync(SyncError),
    Store(StoreError),
}

impl std::fmt::Display for SyncCommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncCommandError::Sync(e) => write!(f, "{}", e),
            SyncCommandError::Store(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for SyncCommandError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SyncCommandError::Sync(e) => Some(e),
            SyncCommandError::Store(e) => Some(e),
        }
    }
}

impl From<SyncError> for SyncCommandError {
    fn from(e: SyncError) -> Self {
        SyncCommandError::Sync(e)
    }
}

impl From<StoreError> for SyncCommandError {
    fn from(e: StoreError) -> Self {
        SyncCommandError::Store(e)
    }
}
