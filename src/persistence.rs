/// Background persistence of the miner's tree
///
/// Saves based on:
/// - Dirty flag, checked on a fixed interval
/// - Graceful shutdown signal (one last save, then exit)
///
/// The loop only holds a `Weak` handle. Once every `Arc<Miner>` is gone the
/// shutdown sender is dropped with it and the loop exits on its next wakeup.
use crate::miner::Miner;
use std::sync::Weak;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Start the save loop. It runs until `shutdown` flips to true or the miner is dropped.
pub(crate) fn spawn_save_loop(
    miner: Weak<Miner>,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(save_loop(miner, interval, shutdown))
}

async fn save_loop(miner: Weak<Miner>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
    let store_name = miner
        .upgrade()
        .and_then(|m| m.store_name().map(str::to_string))
        .unwrap_or_else(|| "none".to_string());
    info!(
        "Starting background tree saver (interval: {}ms, store: {})",
        interval.as_millis(),
        store_name
    );

    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut save_count: u64 = 0;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(miner) = miner.upgrade() else {
                    break;
                };
                match miner.flush().await {
                    Ok(true) => {
                        save_count = save_count.saturating_add(1);
                        debug!("Saved pattern tree (save #{})", save_count);
                    }
                    Ok(false) => {}
                    // Dirty flag is still set, the next tick retries
                    Err(e) => error!("Failed to save pattern tree: {}", e),
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    match miner.upgrade() {
        Some(miner) => match miner.flush().await {
            Ok(true) => info!("Final pattern tree save complete"),
            Ok(false) => debug!("Pattern tree clean at shutdown, nothing to save"),
            Err(e) => error!("Failed to save pattern tree on shutdown: {}", e),
        },
        None => warn!("Miner dropped without close(), skipping final save"),
    }
    info!("Background tree saver stopped after {} saves", save_count);
}
