//! Dealer, the demand-driven balancer (section 4.6): schedules additional
//! copies of datasets whose pending-request pressure outruns their replica
//! count, subject to per-site and global volume caps.

use std::collections::{HashMap, HashSet};

use dynamo_config::DealerConfig;
use dynamo_demand::DemandManager;
use dynamo_model::{glob_match, DatasetHandle, Inventory, SiteHandle};
use tracing::debug;

const BYTES_PER_TB: f64 = 1_000_000_000_000.0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DealerReason {
    Demand,
    Balancer(String),
}

#[derive(Debug, Clone)]
pub struct DealerRequest {
    pub dataset: DatasetHandle,
    pub destination: SiteHandle,
    pub reason: DealerReason,
}

fn eligible_destination_sites(inventory: &Inventory, included: &[String]) -> Vec<SiteHandle> {
    inventory
        .sites()
        .filter(|s| included.is_empty() || included.iter().any(|p| glob_match(p, &s.name)))
        .map(|s| s.handle)
        .collect()
}

/// Picks the best candidate destination for one more copy of `dataset`:
/// among sites not already holding a replica, under every cap, the one with
/// the most headroom below `target_site_occupancy * overflow_factor`.
#[allow(clippy::too_many_arguments)]
fn pick_destination(
    inventory: &Inventory,
    dataset: DatasetHandle,
    dataset_size: u64,
    candidates: &[SiteHandle],
    quota_bytes: &HashMap<SiteHandle, u64>,
    occupied_bytes: &HashMap<SiteHandle, u64>,
    per_site_scheduled: &HashMap<SiteHandle, u64>,
    max_copy_per_site_bytes: u64,
    target_site_occupancy: f64,
    overflow_factor: f64,
) -> Option<SiteHandle> {
    candidates
        .iter()
        .copied()
        .filter(|&site| !inventory.dataset(dataset).map(|d| d.has_replica_at(site)).unwrap_or(false))
        .filter(|site| per_site_scheduled.get(site).copied().unwrap_or(0) + dataset_size <= max_copy_per_site_bytes)
        .filter(|site| {
            let quota = quota_bytes.get(site).copied().unwrap_or(0);
            if quota == 0 {
                return false;
            }
            let after = occupied_bytes.get(site).copied().unwrap_or(0) + dataset_size;
            (after as f64) <= quota as f64 * target_site_occupancy * overflow_factor
        })
        .min_by(|a, b| {
            let headroom = |s: &SiteHandle| {
                let quota = quota_bytes.get(s).copied().unwrap_or(1) as f64;
                occupied_bytes.get(s).copied().unwrap_or(0) as f64 / quota
            };
            headroom(a).partial_cmp(&headroom(b)).unwrap_or(std::cmp::Ordering::Equal)
        })
}

/// Runs one Dealer pass. `site_quota_bytes`/`site_occupied_bytes` give the
/// per-site headroom the candidate filter checks against.
pub fn run_dealer(
    inventory: &Inventory,
    demand: &DemandManager,
    config: &DealerConfig,
    site_quota_bytes: &HashMap<SiteHandle, u64>,
    site_occupied_bytes: &HashMap<SiteHandle, u64>,
    now: i64,
) -> Vec<DealerRequest> {
    let max_dataset_size = (config.max_dataset_size_tb * BYTES_PER_TB) as u64;
    let max_copy_per_site = (config.max_copy_per_site_tb * BYTES_PER_TB) as u64;
    let max_copy_total = (config.max_copy_total_tb * BYTES_PER_TB) as u64;

    let destinations = eligible_destination_sites(inventory, &config.included_sites);

    let mut requests = Vec::new();
    let mut per_site_scheduled: HashMap<SiteHandle, u64> = HashMap::new();
    let mut total_scheduled: u64 = 0;

    let mut datasets: Vec<DatasetHandle> = inventory.datasets().map(|d| d.handle).collect();
    datasets.sort_by_key(|&h| inventory.dataset(h).map(|d| d.name.clone()).unwrap_or_default());

    for dataset in datasets {
        let Some(d) = inventory.dataset(dataset) else { continue };
        if d.size == 0 || d.size > max_dataset_size {
            continue;
        }
        let num_existing = d.replica_sites().count();
        if num_existing == 0 || num_existing as u32 >= config.max_replicas {
            continue;
        }

        let weight = demand.request_rank(&d.name);
        let reason = if weight / num_existing as f64 > config.request_to_replica_threshold {
            Some(DealerReason::Demand)
        } else if !config.balancer_target_reasons.is_empty() && lacks_ownership_diversity(inventory, dataset) {
            Some(DealerReason::Balancer(config.balancer_target_reasons[0].clone()))
        } else {
            None
        };
        let Some(reason) = reason else { continue };

        if total_scheduled + d.size > max_copy_total {
            debug!(dataset = d.name, "dealer global copy cap reached, skipping remainder");
            break;
        }

        let candidates: Vec<SiteHandle> = destinations.clone();
        let Some(destination) = pick_destination(
            inventory,
            dataset,
            d.size,
            &candidates,
            site_quota_bytes,
            site_occupied_bytes,
            &per_site_scheduled,
            max_copy_per_site,
            config.target_site_occupancy,
            config.overflow_factor,
        ) else {
            continue;
        };

        *per_site_scheduled.entry(destination).or_insert(0) += d.size;
        total_scheduled += d.size;
        requests.push(DealerRequest { dataset, destination, reason });
    }

    requests
}

/// A crude "diversity" check the balancer path uses to decide whether a
/// dataset's replicas are concentrated under a single owning group: true if
/// every complete replica shares one group.
fn lacks_ownership_diversity(inventory: &Inventory, dataset: DatasetHandle) -> bool {
    let groups: HashSet<Option<dynamo_model::GroupHandle>> = inventory
        .dataset_replicas()
        .filter(|dr| dr.dataset == dataset && dr.is_complete)
        .map(|dr| dr.group)
        .collect();
    groups.len() == 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use dynamo_config::{AccessHistoryConfig, DemandConfig};
    use dynamo_model::{BlockName, BlockReplica, OwnershipLevel};

    fn base_config() -> DealerConfig {
        DealerConfig {
            included_sites: vec![],
            demand_refresh_interval_s: 3600,
            max_dataset_size_tb: 10.0,
            request_to_replica_threshold: 1.0,
            max_copy_per_site_tb: 50.0,
            max_copy_total_tb: 500.0,
            max_replicas: 3,
            target_site_occupancy: 0.9,
            overflow_factor: 1.1,
            balancer_target_reasons: vec![],
        }
    }

    #[test]
    fn schedules_copy_when_demand_exceeds_threshold() {
        let mut inv = Inventory::new();
        let source = inv.get_or_create_site("T1_a");
        let dest = inv.get_or_create_site("T2_b");
        let dataset = inv.get_or_create_dataset("/A/B/C");
        let group = inv.get_or_create_group(Some("G".into()), OwnershipLevel::Block);
        let block = inv.get_or_create_block(dataset, BlockName::new("b1"));
        inv.block_mut(block).unwrap().size = 1_000_000_000;
        inv.recompute_dataset_totals(dataset);
        let mut br = BlockReplica::new(block, source, 1_000_000_000);
        br.is_complete = true;
        br.group = Some(group);
        inv.link_block_replica(br);

        let demand_config = DemandConfig {
            access_history: AccessHistoryConfig { increment_s: 86400, max_back_query: 30 },
            weight_time_bins: vec![(86400, 1.0)],
        };
        let mut demand = DemandManager::new(&demand_config);
        demand.set_pending_requests(HashMap::from([("/A/B/C".to_string(), 5)]));

        let quota = HashMap::from([(dest, 100_000_000_000)]);
        let occupied = HashMap::new();
        let requests = run_dealer(&inv, &demand, &base_config(), &quota, &occupied, 0);
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].destination, dest);
        assert_eq!(requests[0].reason, DealerReason::Demand);
    }
}
