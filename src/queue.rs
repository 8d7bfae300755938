//! §4.10 Queue/Dedup. Batch/ops-hash dedupe with TTL+capacity bounds,
//! windowId-partitioned FIFO grouping, consecutive-idempotencyKey
//! collapsing, and a frame coalescer standing in for
//! `requestAnimationFrame`. Concurrent per-partition execution (one
//! future per partition, `futures_util::future::join_all`-polled
//! concurrently, each running its own envelopes sequentially) is the
//! orchestrator's job — this module hands it the grouping and the
//! dedupe verdict rather than owning scheduling itself.

use crate::config::limits::{DEDUP_MAX_ENTRIES, DEDUP_TTL_SECS, FRAME_TICK_MILLIS};
use crate::envelope::Envelope;
use dashmap::DashMap;
use std::time::{Duration, Instant};
use tokio::time::Interval;

/// TTL+capacity-bounded record of recently-seen batch/ops hashes (§4.10:
/// "Check dedupe maps by batchId and by opsHash within TTL window (10
/// min, <= 500 entries)").
pub struct Dedup {
    seen: DashMap<String, Instant>,
    ttl: Duration,
    max_entries: usize,
}

impl Dedup {
    pub fn new() -> Self {
        Dedup {
            seen: DashMap::new(),
            ttl: Duration::from_secs(DEDUP_TTL_SECS),
            max_entries: DEDUP_MAX_ENTRIES,
        }
    }

    fn prune_expired(&self) {
        let now = Instant::now();
        self.seen.retain(|_, inserted| now.duration_since(*inserted) < self.ttl);
    }

    /// Returns `true` (and records the key) the first time it is seen
    /// within the TTL window; `true` again once the TTL has elapsed.
    /// Returns `false` — a duplicate — for a still-fresh repeat.
    pub fn check_and_record(&self, key: &str) -> bool {
        self.prune_expired();
        if let Some(entry) = self.seen.get(key) {
            if Instant::now().duration_since(*entry) < self.ttl {
                return false;
            }
        }
        if self.seen.len() >= self.max_entries {
            if let Some(oldest) = self.seen.iter().min_by_key(|e| *e.value()).map(|e| e.key().clone()) {
                self.seen.remove(&oldest);
            }
        }
        self.seen.insert(key.to_string(), Instant::now());
        true
    }

    pub fn age_ms(&self, key: &str) -> Option<u64> {
        self.seen.get(key).map(|entry| Instant::now().duration_since(*entry).as_millis() as u64)
    }

    /// §4.4 `replayAll`: a replayed row re-derives the same batch/ops hash
    /// it had when first applied live, so the TTL window (10 min) would
    /// otherwise dedupe-skip it as a fresh repeat. Replay starts from a
    /// clean dedupe table the same way it starts from clean runtime state.
    pub fn clear_all(&self) {
        self.seen.clear();
    }
}

impl Default for Dedup {
    fn default() -> Self {
        Self::new()
    }
}

/// Groups a batch's envelopes by `partitionKey` (windowId, or "global"),
/// preserving arrival order within each partition and across the
/// partition list itself (§4.10: "commands are grouped by windowId...
/// Each partition is a FIFO").
pub fn partition(envelopes: Vec<Envelope>) -> Vec<(String, Vec<Envelope>)> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: std::collections::HashMap<String, Vec<Envelope>> = std::collections::HashMap::new();
    for env in envelopes {
        let key = env.partition_key();
        if !groups.contains_key(&key) {
            order.push(key.clone());
        }
        groups.entry(key).or_default().push(env);
    }
    order
        .into_iter()
        .map(|key| {
            let envs = groups.remove(&key).unwrap_or_default();
            (key, envs)
        })
        .collect()
}

/// "Within a partition, identical `idempotencyKey` collapses consecutive
/// duplicates" (§4.10) — only adjacent repeats collapse, not all repeats.
pub fn collapse_consecutive_duplicates(envelopes: Vec<Envelope>) -> Vec<Envelope> {
    let mut out: Vec<Envelope> = Vec::with_capacity(envelopes.len());
    for env in envelopes {
        let duplicate = match (&env.idempotency_key, out.last().and_then(|last: &Envelope| last.idempotency_key.as_ref())) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        };
        if !duplicate {
            out.push(env);
        }
    }
    out
}

/// Stands in for `requestAnimationFrame`: DOM-touching jobs scheduled
/// within one tick run strictly in order (§4.10).
pub struct FrameCoalescer {
    interval: Interval,
}

impl FrameCoalescer {
    pub fn new() -> Self {
        FrameCoalescer {
            interval: tokio::time::interval(Duration::from_millis(FRAME_TICK_MILLIS)),
        }
    }

    pub async fn tick(&mut self) {
        self.interval.tick().await;
    }
}

impl Default for FrameCoalescer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{Op, TxnCancelParams, WindowCreateParams};

    fn env(id: &str, idempotency_key: Option<&str>) -> Envelope {
        let mut e = Envelope::new(Op::WindowCreate(WindowCreateParams {
            id: id.to_string(),
            ..Default::default()
        }));
        e.idempotency_key = idempotency_key.map(str::to_string);
        e
    }

    #[test]
    fn dedup_allows_first_occurrence_and_blocks_fresh_repeat() {
        let dedup = Dedup::new();
        assert!(dedup.check_and_record("batch-1"));
        assert!(!dedup.check_and_record("batch-1"));
    }

    #[test]
    fn partition_groups_by_window_preserving_order() {
        let envs = vec![env("w1", None), env("w2", None), env("w1", None)];
        let groups = partition(envs);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, "w1");
        assert_eq!(groups[0].1.len(), 2);
        assert_eq!(groups[1].0, "w2");
    }

    #[test]
    fn global_partition_used_when_no_window_is_implied() {
        let global_env = Envelope::new(Op::TxnCancel(TxnCancelParams {}));
        let groups = partition(vec![global_env]);
        assert_eq!(groups[0].0, "global");
    }

    #[test]
    fn collapse_only_merges_adjacent_identical_idempotency_keys() {
        let envs = vec![
            env("w1", Some("k1")),
            env("w1", Some("k1")),
            env("w1", Some("k2")),
            env("w1", Some("k1")),
        ];
        let collapsed = collapse_consecutive_duplicates(envs);
        assert_eq!(collapsed.len(), 3);
    }
}
