use crate::domain::storage::Storage;
use crate::domain::SnapshotKey;
use crate::error::Result;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{error, info};

pub struct RetentionService {
    store: Arc<dyn Storage>,
}

impl RetentionService {
    pub fn new(store: Arc<dyn Storage + 'static>) -> Self {
        Self { store }
    }

    /// Removes committed snapshots taken before `now - years`. A failure to
    /// remove one snapshot is logged and does not stop the sweep.
    pub fn cleanup(&self, now: DateTime<Utc>, years: u32) -> Result<Vec<SnapshotKey>> {
        let cutoff = now - Duration::days(365 * i64::from(years));
        info!(years, cutoff = %cutoff.to_rfc3339(), "Cleaning up old snapshots");

        let mut removed = Vec::new();
        for key in self.store.list_snapshots()? {
            if key.timestamp() >= cutoff {
                continue;
            }
            match self.store.remove_snapshot(&key) {
                Ok(()) => {
                    info!(snapshot = %key, "Removed old snapshot");
                    removed.push(key);
                }
                Err(e) => error!(snapshot = %key, error = %e, "Failed to remove snapshot"),
            }
        }

        info!(removed = removed.len(), "Cleanup completed");
        Ok(removed)
    }
}
