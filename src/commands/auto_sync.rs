//! Sync after write commands when `auto_sync` is enabled.

use bibsync::config::Config;
use bibsync::db::LocalStore;
use bibsync::sync::{HttpGateway, SyncEngine};

/// Runs a full sync if auto-sync is enabled and the server answers.
///
/// Failures are reported on stderr and otherwise ignored so the CLI keeps
/// working offline.
pub async fn try_auto_sync(config: &Config, store: &LocalStore) {
    if !config.sync.auto_sync || !config.sync.is_configured() {
        return;
    }

    let gateway = match HttpGateway::from_config(&config.sync) {
        Ok(gateway) => gateway,
        Err(e) => {
            eprintln!("Auto-sync: {}", e);
            return;
        }
    };

    if gateway.check_server().await.is_err() {
        eprintln!("Auto-sync: server unreachable, skipping");
        return;
    }

    let engine = SyncEngine::new(store.clone(), gateway).with_pull_remote(config.sync.pull_remote);
    match engine.sync_all().await {
        Ok(reports) => {
            for report in reports.iter().filter(|r| !r.is_clean()) {
                eprintln!("Auto-sync: {}", report);
            }
        }
        Err(e) => eprintln!("Auto-sync: {}", e),
    }
}
