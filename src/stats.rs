//! Read-only rollup of transfer activity
//!
//! Updated alongside every registry mutation. Observability only: nothing in
//! the relay path reads it back.

use crate::transfer::{Transfer, TransferStatus};

use chrono::{DateTime, Utc};
use ethers::types::U256;
use serde::Serialize;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Stats {
    /// Cumulative amount of completed transfers, smallest unit
    #[serde(serialize_with = "serialize_decimal")]
    pub total_bridged: U256,
    pub successful_transfers: u64,
    pub failed_transfers: u64,
    pub pending_transfers: u64,
    pub last_activity: Option<DateTime<Utc>>,
}

/// Render amounts as decimal strings; `U256`'s own serde form is hex
pub(crate) fn serialize_decimal<S: serde::Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.to_string())
}

pub(crate) fn serialize_decimal_opt<S: serde::Serializer>(
    value: &Option<U256>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match value {
        Some(value) => serializer.serialize_some(&value.to_string()),
        None => serializer.serialize_none(),
    }
}

#[derive(Debug, Default)]
pub struct StatsAggregator {
    inner: RwLock<Stats>,
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from stored transfers after a restart
    pub async fn rebuild(&self, transfers: &[Transfer]) {
        let mut stats = Stats::default();
        for transfer in transfers {
            apply(&mut stats, None, transfer);
            stats.last_activity = stats.last_activity.max(Some(transfer.updated_at));
        }
        *self.inner.write().await = stats;
    }

    /// Account for an insertion (`previous == None`) or a status change
    pub async fn record(&self, previous: Option<TransferStatus>, next: &Transfer) {
        let mut stats = self.inner.write().await;
        apply(&mut stats, previous, next);
        stats.last_activity = Some(next.updated_at);
    }

    pub async fn snapshot(&self) -> Stats {
        self.inner.read().await.clone()
    }
}

fn apply(stats: &mut Stats, previous: Option<TransferStatus>, next: &Transfer) {
    let was_pending = previous.map(|s| s.is_pending()).unwrap_or(false);
    match (was_pending, next.status.is_pending()) {
        (false, true) => stats.pending_transfers += 1,
        (true, false) => stats.pending_transfers = stats.pending_transfers.saturating_sub(1),
        _ => {}
    }

    if previous == Some(next.status) {
        return;
    }

    match next.status {
        TransferStatus::Completed => {
            stats.successful_transfers += 1;
            stats.total_bridged = stats.total_bridged.saturating_add(next.amount);
        }
        TransferStatus::Failed => stats.failed_transfers += 1,
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::{sample_transfer, StatusUpdate};
    use TransferStatus::*;

    #[tokio::test]
    async fn test_lifecycle_counts() {
        let aggregator = StatsAggregator::new();
        let detected = sample_transfer(1, 137, 42161, 10);
        aggregator.record(None, &detected).await;
        assert_eq!(aggregator.snapshot().await.pending_transfers, 1);

        let awaiting = StatusUpdate::to(AwaitingFinality).apply(&detected);
        aggregator.record(Some(Detected), &awaiting).await;
        let relaying = StatusUpdate::to(Relaying).apply(&awaiting);
        aggregator.record(Some(AwaitingFinality), &relaying).await;
        assert_eq!(aggregator.snapshot().await.pending_transfers, 1);

        let failed = StatusUpdate::to(Failed).apply(&relaying);
        aggregator.record(Some(Relaying), &failed).await;
        let stats = aggregator.snapshot().await;
        assert_eq!(stats.pending_transfers, 0);
        assert_eq!(stats.failed_transfers, 1);

        let retried = StatusUpdate::to(Relaying).apply(&failed);
        aggregator.record(Some(Failed), &retried).await;
        let completed = StatusUpdate::to(Completed).apply(&retried);
        aggregator.record(Some(Relaying), &completed).await;

        let stats = aggregator.snapshot().await;
        assert_eq!(stats.pending_transfers, 0);
        assert_eq!(stats.successful_transfers, 1);
        assert_eq!(stats.failed_transfers, 1);
        assert_eq!(stats.total_bridged, U256::from(1_000_000u64));
        assert!(stats.last_activity.is_some());
    }

    #[tokio::test]
    async fn test_rebuild_from_store_contents() {
        let mut completed = sample_transfer(1, 137, 42161, 10);
        completed.status = Completed;
        let mut cancelled = sample_transfer(2, 137, 42161, 10);
        cancelled.status = Cancelled;
        let awaiting = StatusUpdate::to(AwaitingFinality).apply(&sample_transfer(3, 137, 42161, 10));

        let aggregator = StatsAggregator::new();
        aggregator.rebuild(&[completed, cancelled, awaiting]).await;

        let stats = aggregator.snapshot().await;
        assert_eq!(stats.successful_transfers, 1);
        assert_eq!(stats.pending_transfers, 1);
        assert_eq!(stats.failed_transfers, 0);
        assert_eq!(stats.total_bridged, U256::from(1_000_000u64));
    }

    #[test]
    fn test_serializes_amount_as_decimal_string() {
        let stats = Stats {
            total_bridged: U256::exp10(18),
            ..Default::default()
        };
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["total_bridged"], "1000000000000000000");
    }
}
