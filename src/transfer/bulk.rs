//! Bulk flush with rejection retry

use crate::cluster::{BulkResponse, Cluster, UpsertOp};
use crate::error::{ClusterError, Result, TransferError};
use crate::transfer::MAX_FLUSH_ATTEMPTS;

use rand::Rng;
use std::time::Duration;

/// Sends one flush worth of upserts until every item is written
pub struct BulkFlusher<'a> {
    destination: &'a dyn Cluster,
    backoff_min: Duration,
    backoff_max: Duration,
}

impl<'a> BulkFlusher<'a> {
    pub fn new(destination: &'a dyn Cluster, backoff_min: Duration, backoff_max: Duration) -> Self {
        Self {
            destination,
            backoff_min,
            backoff_max,
        }
    }

    fn backoff(&self) -> Duration {
        let min = self.backoff_min.as_millis() as u64;
        let max = (self.backoff_max.as_millis() as u64).max(min);
        Duration::from_millis(rand::rng().random_range(min..=max))
    }

    /// Whole-request throttling is treated as every item being rejected
    async fn send(&self, batch: &[UpsertOp]) -> Result<Option<BulkResponse>> {
        match self.destination.bulk(batch).await {
            Ok(response) => Ok(Some(response)),
            Err(ClusterError::Status { status: 429, .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Flush `ops`, returning the number of items written
    ///
    /// Rejected items are resent after a randomized backoff, at most
    /// [`MAX_FLUSH_ATTEMPTS`] bulk requests in total. Any other item error
    /// fails the flush immediately.
    pub async fn flush(&self, ops: Vec<UpsertOp>) -> Result<u64> {
        let mut batch = ops;
        let mut written = 0u64;
        let mut attempts = 0u32;

        while !batch.is_empty() {
            attempts += 1;

            let rejected = match self.send(&batch).await? {
                None => batch,
                Some(response) => {
                    if response.items.len() != batch.len() {
                        return Err(ClusterError::Malformed {
                            host: self.destination.endpoint().host.clone(),
                            reason: format!(
                                "bulk response has {} items for {} operations",
                                response.items.len(),
                                batch.len()
                            ),
                        }
                        .into());
                    }

                    let mut rejected = Vec::new();
                    let mut failures = Vec::new();
                    for (op, item) in batch.into_iter().zip(response.items) {
                        if item.is_ok() {
                            written += 1;
                        } else if item.is_rejection() {
                            rejected.push(op);
                        } else {
                            let (kind, reason) = item
                                .error
                                .map(|e| (e.kind, e.reason))
                                .unwrap_or_else(|| ("status".to_string(), item.status.to_string()));
                            failures.push(format!("{}/{}: {} ({})", op.index, op.id, kind, reason));
                        }
                    }

                    if !failures.is_empty() {
                        return Err(TransferError::UnrecoverableBulk {
                            count: failures.len(),
                            failures,
                        }
                        .into());
                    }
                    rejected
                }
            };

            if rejected.is_empty() {
                break;
            }
            if attempts >= MAX_FLUSH_ATTEMPTS {
                return Err(TransferError::ExceededFlushRetries {
                    attempts,
                    rejected: rejected.len(),
                }
                .into());
            }

            let delay = self.backoff();
            tracing::warn!(
                "{} item(s) rejected by {}, retrying in {:?} (attempt {}/{})",
                rejected.len(),
                self.destination.endpoint().host,
                delay,
                attempts,
                MAX_FLUSH_ATTEMPTS
            );
            tokio::time::sleep(delay).await;
            batch = rejected;
        }

        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::MemoryCluster;
    use crate::error::FerryError;
    use serde_json::json;

    fn ops(n: usize) -> Vec<UpsertOp> {
        (0..n)
            .map(|i| UpsertOp {
                index: "logs".into(),
                doc_type: "event".into(),
                id: i.to_string(),
                doc: json!({"n": i}),
            })
            .collect()
    }

    fn flusher(cluster: &MemoryCluster) -> BulkFlusher<'_> {
        BulkFlusher::new(cluster, Duration::from_millis(1), Duration::from_millis(2))
    }

    #[tokio::test]
    async fn test_flush_writes_everything() {
        let cluster = MemoryCluster::new("mem://dst");
        assert_eq!(flusher(&cluster).flush(ops(3)).await.unwrap(), 3);
        assert_eq!(cluster.documents("logs").len(), 3);
        assert_eq!(cluster.bulk_calls(), 1);
    }

    #[tokio::test]
    async fn test_rejections_retry_then_succeed() {
        let cluster = MemoryCluster::new("mem://dst");
        cluster.reject_next_bulks(MAX_FLUSH_ATTEMPTS - 1);
        assert_eq!(flusher(&cluster).flush(ops(4)).await.unwrap(), 4);
        assert_eq!(cluster.bulk_calls(), MAX_FLUSH_ATTEMPTS);
    }

    #[tokio::test]
    async fn test_rejections_exhaust_attempts() {
        let cluster = MemoryCluster::new("mem://dst");
        cluster.reject_next_bulks(MAX_FLUSH_ATTEMPTS);
        let err = flusher(&cluster).flush(ops(2)).await.unwrap_err();
        assert!(matches!(
            err,
            FerryError::Transfer(TransferError::ExceededFlushRetries { attempts: 5, rejected: 2 })
        ));
        assert_eq!(cluster.bulk_calls(), MAX_FLUSH_ATTEMPTS);
        assert!(err.to_string().contains("exceeded max flush retries"));
    }

    #[tokio::test]
    async fn test_unrecoverable_item_fails_immediately() {
        let cluster = MemoryCluster::new("mem://dst");
        cluster.fail_document("1", "mapper_parsing_exception");
        let err = flusher(&cluster).flush(ops(3)).await.unwrap_err();
        assert!(matches!(
            err,
            FerryError::Transfer(TransferError::UnrecoverableBulk { count: 1, .. })
        ));
        assert_eq!(cluster.bulk_calls(), 1);
    }
}
