use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::analytics::snapshot;
use crate::db::Database;

/// Background snapshot scheduler. Periodically rewrites the current day's
/// analytics rollups so trend views stay fresh without a manual trigger.
#[derive(Clone)]
pub struct SnapshotScheduler {
    db: Arc<Database>,
    tasks: Arc<RwLock<Vec<JoinHandle<()>>>>,
}

impl SnapshotScheduler {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            tasks: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Start the scheduler with the given tick interval. The first snapshot
    /// is written immediately.
    pub async fn start(&self, interval_secs: u64) {
        log::info!("Starting snapshot scheduler (interval: {}s)", interval_secs);

        let db = self.db.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));

            loop {
                interval.tick().await;

                match snapshot::generate_daily_snapshot(&db) {
                    Ok(written) => {
                        log::info!("Snapshot tick complete: {} agent rows", written);
                    }
                    Err(e) => {
                        log::error!("Snapshot tick failed: {}", e);
                    }
                }
            }
        });

        let mut tasks = self.tasks.write().await;
        tasks.push(handle);
    }

    /// Stop all running snapshot tasks.
    pub async fn stop(&self) {
        log::info!("Stopping snapshot scheduler");
        let mut tasks = self.tasks.write().await;

        for task in tasks.drain(..) {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn start_and_stop_round_trip() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let scheduler = SnapshotScheduler::new(db);

        scheduler.start(3_600).await;
        assert_eq!(scheduler.tasks.read().await.len(), 1);

        scheduler.stop().await;
        assert!(scheduler.tasks.read().await.is_empty());
    }
}
