use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::ledger::Ledger;
use crate::observability::ROOMS_DRIFTED;

/// Background task that periodically compares every room counter with its
/// assignment count. Reports drift; never corrects it.
pub async fn run_auditor(ledger: Arc<Ledger>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        audit_once(&ledger);
    }
}

/// Returns the number of drifted rooms, or `None` if the stores failed.
pub fn audit_once(ledger: &Ledger) -> Option<usize> {
    let drift = match ledger.check_consistency() {
        Ok(drift) => drift,
        Err(e) => {
            warn!("audit skipped: {e}");
            return None;
        }
    };
    metrics::gauge!(ROOMS_DRIFTED).set(drift.len() as f64);
    for d in &drift {
        warn!(
            "room {} counter drift: recorded {}, assigned {}",
            d.room_id, d.recorded, d.actual
        );
    }
    Some(drift.len())
}

/// Background task that rewrites the journal as a snapshot once `threshold`
/// appends have accumulated since the last compaction.
pub async fn run_compactor(ledger: Arc<Ledger>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        compact_if_due(&ledger, threshold).await;
    }
}

/// Returns whether a compaction ran and succeeded.
pub async fn compact_if_due(ledger: &Ledger, threshold: u64) -> bool {
    let appends = ledger.journal_appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    match ledger.compact_journal().await {
        Ok(()) => {
            info!("compacted journal after {appends} appends");
            true
        }
        Err(e) => {
            warn!("journal compaction failed: {e}");
            false
        }
    }
}
