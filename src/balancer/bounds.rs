//! Iterative boundary refinement

use crate::balancer::{
    BULK_BYTES_BUDGET, CLOSE_ENOUGH_CHUNKS, MAX_MIDDLE_BOUNDARY, MAX_ROUNDS,
};
use crate::cluster::{Cluster, RangeBucket, SizeStats};
use crate::error::ClusterResult;

use serde::{Deserialize, Serialize};

/// One size range with the flush size its documents need
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeBound {
    /// Inclusive lower edge, -1 when unbounded
    #[serde(rename = "minSize")]
    pub min_size: i64,
    /// Exclusive upper edge, -1 when unbounded
    #[serde(rename = "maxSize")]
    pub max_size: i64,
    #[serde(rename = "flushSize")]
    pub flush_size: u64,
}

impl SizeBound {
    /// No size restriction at all
    pub fn unbounded(flush_size: u64) -> Self {
        Self {
            min_size: -1,
            max_size: -1,
            flush_size,
        }
    }

    pub fn is_bounded(&self) -> bool {
        self.min_size >= 0 && self.max_size >= 0
    }
}

/// Bucket of one refinement round with its derived flush figures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Measured {
    from: i64,
    to: i64,
    docs: u64,
    flush: u64,
    chunks: u64,
}

impl Measured {
    fn new(bucket: &RangeBucket, shards: u32) -> Self {
        let flush = flush_for(bucket.to, shards);
        Self {
            from: bucket.from,
            to: bucket.to,
            docs: bucket.doc_count,
            flush,
            chunks: bucket.doc_count.div_ceil(flush),
        }
    }

    fn bound(&self) -> SizeBound {
        SizeBound {
            min_size: self.from,
            max_size: self.to,
            flush_size: self.flush,
        }
    }
}

/// Documents per flush so one bulk request stays within the byte budget
pub(crate) fn flush_for(upper: i64, shards: u32) -> u64 {
    let largest = (upper - 1).max(1);
    let per_request = largest.saturating_mul(shards.max(1) as i64);
    (BULK_BYTES_BUDGET / per_request).max(1) as u64
}

/// Step factor for a chunk-count difference between neighbours
pub(crate) fn multiplier(delta: u64) -> f64 {
    match delta {
        d if d < 200 => 1.1,
        d if d < 500 => 2.0,
        d if d < 1000 => 3.0,
        d if d < 4000 => 5.0,
        d if d < 10000 => 8.0,
        _ => 10.0,
    }
}

/// Initial boundaries from the size statistics
///
/// The top edge is one past the largest size so it is covered by the
/// exclusive upper bound.
pub(crate) fn seed(stats: &SizeStats) -> (i64, i64, i64) {
    if stats.max <= stats.min + 1 {
        return (stats.max, stats.max, stats.max);
    }

    let upper = stats.max + 1;
    let piece = (upper - stats.min) / 10;
    let mut b1 = stats.min + 6 * piece;
    let b2 = (stats.min + 9 * piece).min(MAX_MIDDLE_BOUNDARY);
    if b1 > b2 {
        b1 = b2 / 2;
    }
    (b1, b2, upper)
}

/// Move the two inner boundaries toward equal chunk counts
pub(crate) fn adjust(b1: i64, b2: i64, b3: i64, chunks: [u64; 3]) -> (i64, i64) {
    let step = |boundary: i64, mine: u64, neighbour: u64| -> i64 {
        let delta = mine.abs_diff(neighbour);
        if delta < CLOSE_ENOUGH_CHUNKS {
            return boundary;
        }
        let m = multiplier(delta);
        if mine < neighbour {
            (boundary as f64 * m).ceil() as i64
        } else {
            (boundary as f64 / m).floor() as i64
        }
    };

    let mut b1 = step(b1, chunks[0], chunks[1]).max(1);
    let mut b2 = step(b2, chunks[1], chunks[2]);

    b2 = b2.max(MAX_MIDDLE_BOUNDARY.min(b3 / 2));
    if b2 >= b3 {
        b2 = b3 - 1;
    }
    if b1 > b2 {
        b1 = b2 / 2;
    }
    (b1, b2)
}

/// Computes size bounds for one (index, type) pair
#[derive(Debug, Clone)]
pub struct BoundsBalancer {
    size_field: String,
    default_flush: u64,
}

impl BoundsBalancer {
    pub fn new(size_field: &str, default_flush: u64) -> Self {
        Self {
            size_field: size_field.to_string(),
            default_flush: default_flush.max(1),
        }
    }

    pub fn size_field(&self) -> &str {
        &self.size_field
    }

    pub fn default_flush(&self) -> u64 {
        self.default_flush
    }

    /// Produce 1-3 bounds for the pair
    pub async fn balance(
        &self,
        cluster: &dyn Cluster,
        index: &str,
        doc_type: &str,
    ) -> ClusterResult<Vec<SizeBound>> {
        let stats = cluster
            .size_stats(index, doc_type, &self.size_field)
            .await?;
        if stats.count == 0 {
            return Ok(vec![SizeBound::unbounded(self.default_flush)]);
        }

        let (mut b1, mut b2, b3) = seed(&stats);

        for round in 1..=MAX_ROUNDS {
            let ranges = cluster
                .size_ranges(index, doc_type, &self.size_field, &[(0, b1), (b1, b2), (b2, b3)])
                .await?;
            let measured: Vec<Measured> = ranges
                .buckets
                .iter()
                .map(|b| Measured::new(b, ranges.shards))
                .collect();

            let covered: u64 = measured.iter().map(|m| m.docs).sum();
            if measured.len() != 3 || covered != ranges.total {
                tracing::debug!(
                    "Bounds for {}/{} cover {} of {} documents, using a single range",
                    index,
                    doc_type,
                    covered,
                    ranges.total
                );
                return Ok(vec![SizeBound::unbounded(self.default_flush)]);
            }

            if measured.iter().all(|m| m.to == measured[0].to) {
                let flush = if measured[0].docs > 0 {
                    measured[0].flush
                } else {
                    self.default_flush
                };
                return Ok(vec![SizeBound::unbounded(flush)]);
            }

            let chunks = [measured[0].chunks, measured[1].chunks, measured[2].chunks];
            let balanced = chunks
                .windows(2)
                .all(|pair| pair[0].abs_diff(pair[1]) < CLOSE_ENOUGH_CHUNKS);

            if balanced || round == MAX_ROUNDS {
                tracing::debug!(
                    "Bounds for {}/{} settled after {} round(s): chunks {:?}",
                    index,
                    doc_type,
                    round,
                    chunks
                );
                return Ok(non_empty(&measured));
            }

            (b1, b2) = adjust(b1, b2, b3, chunks);
            tracing::debug!(
                "Round {} for {}/{}: chunks {:?}, boundaries now {} / {}",
                round,
                index,
                doc_type,
                chunks,
                b1,
                b2
            );
        }

        // The final round always returns above
        Ok(vec![SizeBound::unbounded(self.default_flush)])
    }
}

fn non_empty(measured: &[Measured]) -> Vec<SizeBound> {
    measured
        .iter()
        .filter(|m| m.docs > 0)
        .map(Measured::bound)
        .collect()
}
