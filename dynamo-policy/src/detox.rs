//! Detox, the eviction engine (section 4.6): partitions replicas, measures
//! site occupancy against quota, applies a rule stack, and schedules
//! deletions.

use std::collections::HashSet;

use dynamo_demand::DemandManager;
use dynamo_model::{BlockHandle, DatasetHandle, Inventory, SiteHandle};
use tracing::info;

use crate::partition::{self, PartitionDef};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Delete,
    Keep,
    Protect,
}

pub struct RuleOutcome {
    pub decision: Decision,
    pub reason: String,
}

/// One candidate replica within the policy's partition at one site. `blocks
/// == None` means the whole dataset replica is in-partition (section 4.6
/// `applies(dr) == 1`); `Some(set)` is the partial-membership case
/// (`applies(dr) == 2`), and only those block replicas are eligible.
pub struct EvictionCandidate {
    pub dataset: DatasetHandle,
    pub dataset_name: String,
    pub site: SiteHandle,
    pub blocks: Option<HashSet<BlockHandle>>,
    pub size: u64,
    pub touches_custodial_tape: bool,
}

pub type Rule = Box<dyn Fn(&EvictionCandidate, &DemandManager, i64) -> Option<RuleOutcome> + Send + Sync>;

/// A Detox policy: partition, default decision, ordered rule stack, and the
/// per-request/per-iteration deletion caps of section 4.6.
pub struct Policy {
    pub partition: PartitionDef,
    pub default_decision: Decision,
    pub rules: Vec<Rule>,
    /// TB per deletion batch (`deletion_volume_per_request`).
    pub deletion_volume_per_request_bytes: u64,
    /// Fraction of a site's quota that may be freed in one iteration
    /// (`deletion_per_iteration`).
    pub deletion_per_iteration: f64,
}

impl Policy {
    /// Section 4.6, policy evaluation: first non-null rule wins, otherwise
    /// the default decision with reason `"Policy default"`.
    pub fn evaluate(&self, candidate: &EvictionCandidate, demand: &DemandManager, now: i64) -> RuleOutcome {
        for rule in &self.rules {
            if let Some(outcome) = rule(candidate, demand, now) {
                return outcome;
            }
        }
        RuleOutcome {
            decision: self.default_decision,
            reason: "Policy default".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScheduledDeletion {
    pub dataset: DatasetHandle,
    pub dataset_name: String,
    pub site: SiteHandle,
    pub blocks: Option<HashSet<BlockHandle>>,
    pub size: u64,
    pub reason: String,
}

fn candidate_size(inventory: &Inventory, dataset: DatasetHandle, site: SiteHandle, blocks: &Option<HashSet<BlockHandle>>) -> u64 {
    match blocks {
        None => inventory.dataset_replica(dataset, site).map(|_| inventory.dataset(dataset).map(|d| d.size).unwrap_or(0)).unwrap_or(0),
        Some(set) => set.iter().filter_map(|&b| inventory.block_replica(b, site)).map(|br| br.size).sum(),
    }
}

fn touches_custodial_tape(inventory: &Inventory, site: SiteHandle, blocks: &Option<HashSet<BlockHandle>>, dataset: DatasetHandle) -> bool {
    let is_tape_site = inventory.site(site).map(|s| s.storage_type.is_tape()).unwrap_or(false);
    if !is_tape_site {
        return false;
    }
    let custodial_blocks: Vec<BlockHandle> = match blocks {
        Some(set) => set.iter().copied().collect(),
        None => inventory
            .dataset_replica(dataset, site)
            .map(|dr| dr.block_replicas().collect())
            .unwrap_or_default(),
    };
    custodial_blocks.iter().any(|&b| inventory.block_replica(b, site).map(|br| br.is_custodial).unwrap_or(false))
}

/// Runs one eviction iteration for `site`: gathers in-partition replicas,
/// sorts DELETE-eligible candidates by ascending `global_usage_rank` so the
/// least-wanted dataset is evicted first (ties broken by dataset name
/// ascending), and pops candidates until occupancy drops to
/// `target_site_occupancy` or the caps are hit. Never schedules a PROTECT
/// decision or a replica that touches a custodial tape copy (section 4.6,
/// step 4).
pub fn run_eviction(
    inventory: &Inventory,
    demand: &DemandManager,
    policy: &Policy,
    site: SiteHandle,
    quota_bytes: u64,
    target_site_occupancy: f64,
    now: i64,
) -> Vec<ScheduledDeletion> {
    let membership = partition::materialize_leaf(inventory, &policy.partition, site);

    let mut candidates: Vec<EvictionCandidate> = membership
        .into_iter()
        .filter_map(|((dataset, site), blocks)| {
            let dataset_name = inventory.dataset(dataset)?.name.clone();
            let size = candidate_size(inventory, dataset, site, &blocks);
            Some(EvictionCandidate {
                dataset,
                dataset_name,
                site,
                touches_custodial_tape: touches_custodial_tape(inventory, site, &blocks, dataset),
                blocks,
                size,
            })
        })
        .collect();

    let occupied: u64 = candidates.iter().map(|c| c.size).sum();
    if quota_bytes == 0 {
        // section 8 boundary: quota 0 targets any occupancy > 0.
    } else if (occupied as f64) <= quota_bytes as f64 * target_site_occupancy {
        return Vec::new();
    }

    let mut eligible: Vec<(EvictionCandidate, String)> = candidates
        .drain(..)
        .filter_map(|c| {
            if c.touches_custodial_tape {
                return None;
            }
            let outcome = policy.evaluate(&c, demand, now);
            match outcome.decision {
                Decision::Delete => Some((c, outcome.reason)),
                Decision::Keep | Decision::Protect => None,
            }
        })
        .collect();

    eligible.sort_by(|(a, _), (b, _)| {
        demand
            .global_usage_rank(&a.dataset_name, now)
            .partial_cmp(&demand.global_usage_rank(&b.dataset_name, now))
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.dataset_name.cmp(&b.dataset_name))
    });

    let iteration_cap = (quota_bytes as f64 * policy.deletion_per_iteration) as u64;
    let mut scheduled = Vec::new();
    let mut freed: u64 = 0;
    let mut batch: u64 = 0;

    for (candidate, reason) in eligible {
        if quota_bytes > 0 && (occupied.saturating_sub(freed) as f64) <= quota_bytes as f64 * target_site_occupancy {
            break;
        }
        if iteration_cap > 0 && freed + candidate.size > iteration_cap {
            break;
        }
        if batch + candidate.size > policy.deletion_volume_per_request_bytes && batch > 0 {
            break;
        }
        batch += candidate.size;
        freed += candidate.size;
        info!(dataset = candidate.dataset_name, site = ?site, bytes = candidate.size, reason, "scheduling deletion");
        scheduled.push(ScheduledDeletion {
            dataset: candidate.dataset,
            dataset_name: candidate.dataset_name,
            site: candidate.site,
            blocks: candidate.blocks,
            size: candidate.size,
            reason,
        });
    }
    scheduled
}

#[cfg(test)]
mod tests {
    use super::*;
    use dynamo_config::{AccessHistoryConfig, DemandConfig};
    use dynamo_model::{BlockName, BlockReplica, OwnershipLevel};

    fn demand_with_ranks(ranks: &[(&str, f64)]) -> DemandManager {
        let config = DemandConfig {
            access_history: AccessHistoryConfig { increment_s: 86400, max_back_query: 30 },
            weight_time_bins: vec![(86400, 1.0)],
        };
        let mut demand = DemandManager::new(&config);
        for (dataset, rank) in ranks {
            demand.set_access_counts(*dataset, vec![(0, *rank as u64)]);
        }
        demand
    }

    fn build_two_dataset_inventory() -> (Inventory, SiteHandle) {
        let mut inv = Inventory::new();
        let site = inv.get_or_create_site("T2_Disk_Site");
        inv.site_mut(site).unwrap().storage_type = dynamo_model::StorageType::Disk;
        let group = inv.get_or_create_group(Some("AnalysisOps".into()), OwnershipLevel::Block);

        for name in ["/A/B/C", "/D/E/F"] {
            let dataset = inv.get_or_create_dataset(name);
            let block = inv.get_or_create_block(dataset, BlockName::new("b1"));
            inv.block_mut(block).unwrap().size = 60 * 1_000_000_000_000;
            inv.recompute_dataset_totals(dataset);
            let mut br = BlockReplica::new(block, site, 60 * 1_000_000_000_000);
            br.group = Some(group);
            br.is_complete = true;
            inv.link_block_replica(br);
        }
        (inv, site)
    }

    #[test]
    fn deletes_lowest_rank_dataset_first() {
        let (inv, site) = build_two_dataset_inventory();
        let demand = demand_with_ranks(&[("/A/B/C", 3.0), ("/D/E/F", 0.1)]);
        let policy = Policy {
            partition: PartitionDef::new(vec![]),
            default_decision: Decision::Delete,
            rules: vec![],
            deletion_volume_per_request_bytes: 200 * 1_000_000_000_000,
            deletion_per_iteration: 1.0,
        };
        let scheduled = run_eviction(&inv, &demand, &policy, site, 100 * 1_000_000_000_000, 0.5, 0);
        assert_eq!(scheduled[0].dataset_name, "/D/E/F");
    }

    #[test]
    fn quota_zero_targets_any_occupancy() {
        let (inv, site) = build_two_dataset_inventory();
        let demand = demand_with_ranks(&[("/A/B/C", 1.0), ("/D/E/F", 1.0)]);
        let policy = Policy {
            partition: PartitionDef::new(vec![]),
            default_decision: Decision::Delete,
            rules: vec![],
            deletion_volume_per_request_bytes: 200 * 1_000_000_000_000,
            deletion_per_iteration: 1.0,
        };
        let scheduled = run_eviction(&inv, &demand, &policy, site, 0, 0.5, 0);
        assert!(!scheduled.is_empty());
    }
}
