//! Aggregates lock, access-history, and pending-request signals into the
//! `global_usage_rank` the policy engine orders deletion candidates by
//! (section 4.5 of the spec).
//!
//! The manager holds no I/O of its own: adapters populate it via
//! `set_locks`/`set_access_counts`/`set_pending_requests` after a demand
//! refresh, and the policy engine reads it back through `global_usage_rank`.
//! This mirrors the teacher's separation of "fetch" adapters from the
//! in-memory aggregate they feed.

use std::collections::HashMap;

use dynamo_config::DemandConfig;

/// One `(Δt, weight)` time bin, oldest-first as configured: the bin whose
/// `delta_s` is smallest covers the most recent window `[now - delta_s, now]`;
/// each subsequent bin covers the window further back, up to its own `delta_s`.
#[derive(Debug, Clone, Copy)]
pub struct AccessBin {
    pub delta_s: u64,
    pub weight: f64,
}

/// A normalized `(dataset[, site])` lock entry, already stripped of its
/// source kind (`LIST_OF_DATASETS`, `SITE_TO_DATASETS`,
/// `CMSWEB_LIST_OF_DATASETS` all normalize to this shape per section 4.5).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockEntry {
    pub dataset: String,
    pub site: Option<String>,
}

impl LockEntry {
    pub fn dataset_wide(dataset: impl Into<String>) -> Self {
        LockEntry { dataset: dataset.into(), site: None }
    }

    pub fn at_site(dataset: impl Into<String>, site: impl Into<String>) -> Self {
        LockEntry { dataset: dataset.into(), site: Some(site.into()) }
    }
}

/// Aggregates the three signals of section 4.5 into a per-dataset
/// `global_usage_rank`.
#[derive(Debug, Default)]
pub struct DemandManager {
    bins: Vec<AccessBin>,
    locked_datasets: std::collections::HashSet<String>,
    /// `dataset -> [(bucket_start_epoch, access_count)]`, one bucket per
    /// `access_history.increment_s` of configured width.
    access_counts: HashMap<String, Vec<(i64, u64)>>,
    pending_requests: HashMap<String, u32>,
}

impl DemandManager {
    pub fn new(config: &DemandConfig) -> Self {
        let bins = config
            .weight_time_bins
            .iter()
            .map(|(delta_s, weight)| AccessBin { delta_s: *delta_s, weight: *weight })
            .collect();
        DemandManager {
            bins,
            locked_datasets: Default::default(),
            access_counts: HashMap::new(),
            pending_requests: HashMap::new(),
        }
    }

    /// Replace the lock set wholesale (a demand refresh re-reads every
    /// configured lock source from scratch, per section 4.5).
    pub fn set_locks(&mut self, entries: impl IntoIterator<Item = LockEntry>) {
        self.locked_datasets = entries.into_iter().map(|e| e.dataset).collect();
    }

    pub fn set_access_counts(&mut self, dataset: impl Into<String>, buckets: Vec<(i64, u64)>) {
        self.access_counts.insert(dataset.into(), buckets);
    }

    pub fn set_pending_requests(&mut self, counts: HashMap<String, u32>) {
        self.pending_requests = counts;
    }

    pub fn is_locked(&self, dataset: &str) -> bool {
        self.locked_datasets.contains(dataset)
    }

    /// Weighted sum over configured time bins, evaluated against `now`
    /// (caller-supplied so the aggregation stays a pure function of its
    /// inputs).
    pub fn access_rank(&self, dataset: &str, now: i64) -> f64 {
        let Some(buckets) = self.access_counts.get(dataset) else {
            return 0.0;
        };
        let mut prev_delta = 0i64;
        let mut rank = 0.0;
        for bin in &self.bins {
            let window_start = now - bin.delta_s as i64;
            let window_end = now - prev_delta;
            // The nearest bin's window is `[now - delta_s, now]`, inclusive
            // of `now` itself; older bins stop one tick short of the
            // boundary they share with the bin closer to `now` so a bucket
            // sitting exactly on that shared boundary is counted once.
            let upper_inclusive = prev_delta == 0;
            let count: u64 = buckets
                .iter()
                .filter(|(bucket_start, _)| {
                    *bucket_start >= window_start && if upper_inclusive { *bucket_start <= window_end } else { *bucket_start < window_end }
                })
                .map(|(_, count)| *count)
                .sum();
            rank += bin.weight * count as f64;
            prev_delta = bin.delta_s as i64;
        }
        rank
    }

    pub fn request_rank(&self, dataset: &str) -> f64 {
        self.pending_requests.get(dataset).copied().unwrap_or(0) as f64
    }

    /// The combined rank used by Detox to order deletion candidates
    /// (section 4.6): access rank plus request rank, with locked datasets
    /// pinned to infinity so they sort last and are never popped.
    pub fn global_usage_rank(&self, dataset: &str, now: i64) -> f64 {
        if self.is_locked(dataset) {
            return f64::INFINITY;
        }
        self.access_rank(dataset, now) + self.request_rank(dataset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> DemandManager {
        DemandManager {
            bins: vec![
                AccessBin { delta_s: 86_400, weight: 1.0 },
                AccessBin { delta_s: 604_800, weight: 0.5 },
            ],
            locked_datasets: Default::default(),
            access_counts: HashMap::new(),
            pending_requests: HashMap::new(),
        }
    }

    #[test]
    fn access_rank_weights_recent_bucket_higher() {
        let mut m = manager();
        let now = 1_000_000;
        m.set_access_counts("/A/B/C", vec![(now - 3_600, 10), (now - 500_000, 4)]);
        // recent bucket falls in [now-86400, now] (weight 1.0); the older one
        // falls in [now-604800, now-86400) (weight 0.5).
        let rank = m.access_rank("/A/B/C", now);
        assert_eq!(rank, 10.0 * 1.0 + 4.0 * 0.5);
    }

    #[test]
    fn locked_dataset_ranks_above_everything() {
        let mut m = manager();
        m.set_locks([LockEntry::dataset_wide("/A/B/C")]);
        m.set_access_counts("/X/Y/Z", vec![(0, 1_000_000)]);
        assert!(m.global_usage_rank("/A/B/C", 0).is_infinite());
        assert!(m.global_usage_rank("/A/B/C", 0) > m.global_usage_rank("/X/Y/Z", 0));
    }

    #[test]
    fn unknown_dataset_ranks_zero() {
        let m = manager();
        assert_eq!(m.global_usage_rank("/Unseen/Anywhere/Tier", 0), 0.0);
    }
}
