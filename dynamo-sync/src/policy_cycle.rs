//! Wires `dynamo-demand` and `dynamo-policy` into the daemon loop (section
//! 4.6's "inventory + demand -> policy engine -> operation queue -> remote
//! subscription/deletion service" data flow): refreshes demand signals,
//! runs one Detox eviction pass per site plus one Dealer pass, and submits
//! whatever they schedule.
//!
//! Unlike the six-phase synchronizer, a failed demand refresh or policy
//! pass here is logged and skipped rather than treated as a cycle abort:
//! the inventory itself was already committed by the synchronizer, so the
//! worst a bad demand fetch can do is leave this cycle's placement
//! decisions stale, not corrupt what's on disk.

use std::collections::HashMap;

use dynamo_adapters::demand_sources;
use dynamo_adapters::phedex_xml::{CatalogBlock, CatalogFile};
use dynamo_config::Config;
use dynamo_demand::DemandManager;
use dynamo_model::Inventory;
use dynamo_policy::dealer::{self, DealerRequest};
use dynamo_policy::detox::{self, Decision, Policy, ScheduledDeletion};
use dynamo_policy::partition::PartitionDef;
use dynamo_policy::submission::{ReplicaRequest, Submission, SubmissionOptions};
use dynamo_rest::RestClient;
use tracing::{info, info_span, warn};
use tracing_futures::Instrument;

use crate::executor::BoundedExecutor;

const BYTES_PER_TB: f64 = 1_000_000_000_000.0;

/// Rebuilds a [`DemandManager`] from the three sources of section 4.5: lock
/// sources, per-dataset access history, and pending request counts. Each
/// source is best-effort; a source that fails leaves that signal at its
/// zero default for this cycle rather than aborting the refresh.
async fn refresh_demand(
    lock_client: &RestClient,
    history_client: &RestClient,
    request_client: &RestClient,
    config: &Config,
    inventory: &Inventory,
) -> DemandManager {
    let mut demand = DemandManager::new(&config.demand);

    let mut locks = Vec::new();
    for (path, kind) in &config.weblock.sources {
        match demand_sources::fetch_lock_source(lock_client, path, *kind).await {
            Ok(entries) => locks.extend(entries),
            Err(err) => warn!(%err, source = path, "lock source fetch failed, treating as no locks from this source"),
        }
    }
    demand.set_locks(locks);

    let dataset_names: Vec<String> = inventory.datasets().map(|d| d.name.clone()).collect();
    let increment_s = config.demand.access_history.increment_s;
    let max_back_query = config.demand.access_history.max_back_query;
    let executor = BoundedExecutor::new(crate::executor::DEFAULT_WIDTH);
    let histories = executor
        .run(dataset_names, |name| async move {
            let result = demand_sources::fetch_access_history(history_client, &name, increment_s, max_back_query).await;
            (name, result)
        })
        .await;
    for (name, result) in histories {
        match result {
            Ok(bins) => demand.set_access_counts(name, bins),
            Err(err) => warn!(%err, dataset = name, "access history fetch failed, leaving access rank at zero for this cycle"),
        }
    }

    match demand_sources::fetch_pending_request_counts(request_client).await {
        Ok(counts) => demand.set_pending_requests(counts),
        Err(err) => warn!(%err, "pending request count fetch failed, leaving request rank at zero for this cycle"),
    }

    demand
}

/// The whole-inventory partition a minimal Detox pass evaluates against:
/// every site, every replica, rule stack empty so `default_decision` alone
/// governs (section 4.6's rule-stack configuration has no file-based
/// representation yet; see DESIGN.md).
fn whole_inventory_policy(config: &Config) -> Policy {
    Policy {
        partition: PartitionDef::new(vec![]),
        default_decision: Decision::Delete,
        rules: Vec::new(),
        deletion_volume_per_request_bytes: (config.detox.deletion_volume_per_request * BYTES_PER_TB) as u64,
        deletion_per_iteration: config.detox.deletion_per_iteration,
    }
}

fn site_quota_bytes(inventory: &Inventory) -> HashMap<dynamo_model::SiteHandle, u64> {
    inventory
        .sites()
        .map(|s| (s.handle, s.partitions.values().map(|p| p.quota_bytes).sum()))
        .collect()
}

fn site_occupied_bytes(inventory: &Inventory) -> HashMap<dynamo_model::SiteHandle, u64> {
    let mut occupied: HashMap<dynamo_model::SiteHandle, u64> = HashMap::new();
    for dataset in inventory.datasets() {
        for site in dataset.replica_sites() {
            *occupied.entry(site).or_insert(0) += dataset.size;
        }
    }
    occupied
}

fn block_to_catalog(inventory: &Inventory, block: dynamo_model::BlockHandle) -> Option<CatalogBlock> {
    let b = inventory.block(block)?;
    let files = inventory.files_of(block);
    let files = if files.is_empty() {
        vec![CatalogFile { name: format!("{}.blob", b.name.as_str()), bytes: b.size, checksum: None }]
    } else {
        files.iter().map(|f| CatalogFile { name: f.lfn.clone(), bytes: f.size, checksum: None }).collect()
    };
    Some(CatalogBlock { name: b.name.external(&inventory.dataset(b.dataset)?.name).to_string(), is_open: b.is_open, files })
}

fn deletion_to_request(inventory: &Inventory, deletion: &ScheduledDeletion) -> Option<ReplicaRequest> {
    let site_name = inventory.site(deletion.site)?.name.clone();
    let group = inventory
        .dataset_replica(deletion.dataset, deletion.site)
        .and_then(|dr| dr.group)
        .and_then(|g| inventory.group(g))
        .and_then(|g| g.name.clone());
    let block_handles: Vec<dynamo_model::BlockHandle> = match &deletion.blocks {
        Some(set) => set.iter().copied().collect(),
        None => inventory.dataset_replica(deletion.dataset, deletion.site)?.block_replicas().collect(),
    };
    let blocks = block_handles.into_iter().filter_map(|b| block_to_catalog(inventory, b)).collect();
    Some(ReplicaRequest { dataset_name: deletion.dataset_name.clone(), site_name, group, blocks })
}

fn dealer_to_request(inventory: &Inventory, request: &DealerRequest) -> Option<ReplicaRequest> {
    let dataset_name = inventory.dataset(request.dataset)?.name.clone();
    let site_name = inventory.site(request.destination)?.name.clone();
    let blocks = inventory.dataset(request.dataset)?.blocks().filter_map(|b| block_to_catalog(inventory, b)).collect();
    Some(ReplicaRequest { dataset_name, site_name, group: None, blocks })
}

/// Runs one policy cycle: refresh demand, evict from every site under the
/// whole-inventory Detox policy, run one Dealer pass, and submit both sets
/// of decisions. `inventory` is read-only here — no placement is committed
/// locally; every effect goes through `submission` to the remote catalog.
pub async fn run_policy_cycle(
    lock_client: &RestClient,
    history_client: &RestClient,
    request_client: &RestClient,
    config: &Config,
    inventory: &Inventory,
    submission: &Submission<'_>,
    now: i64,
) -> dynamo_errors::DynamoResult<()> {
    let demand = async { refresh_demand(lock_client, history_client, request_client, config, inventory).await }
        .instrument(info_span!("policy_phase", phase = "demand"))
        .await;

    let deletions: Vec<ScheduledDeletion> = async {
        let policy = whole_inventory_policy(config);
        let target_site_occupancy = config.dealer.target_site_occupancy;
        let mut scheduled = Vec::new();
        for site in inventory.sites() {
            let quota = site.partitions.values().map(|p| p.quota_bytes).sum();
            scheduled.extend(detox::run_eviction(inventory, &demand, &policy, site.handle, quota, target_site_occupancy, now));
        }
        scheduled
    }
    .instrument(info_span!("policy_phase", phase = "detox"))
    .await;

    let copies: Vec<DealerRequest> = async {
        let quota = site_quota_bytes(inventory);
        let occupied = site_occupied_bytes(inventory);
        dealer::run_dealer(inventory, &demand, &config.dealer, &quota, &occupied, now)
    }
    .instrument(info_span!("policy_phase", phase = "dealer"))
    .await;

    async {
        let delete_requests: Vec<ReplicaRequest> = deletions.iter().filter_map(|d| deletion_to_request(inventory, d)).collect();
        if !delete_requests.is_empty() {
            let batches = submission.schedule_deletions(&delete_requests, None, "detox eviction").await?;
            info!(batches = batches.len(), replicas = delete_requests.len(), "submitted detox deletions");
        }

        let copy_requests: Vec<ReplicaRequest> = copies.iter().filter_map(|c| dealer_to_request(inventory, c)).collect();
        if !copy_requests.is_empty() {
            let batches = submission.schedule_copies(&copy_requests, "dealer").await?;
            info!(batches = batches.len(), replicas = copy_requests.len(), "submitted dealer copies");
        }
        Ok(())
    }
    .instrument(info_span!("policy_phase", phase = "submit"))
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use dynamo_model::{BlockName, BlockReplica, OwnershipLevel};

    fn sample_inventory() -> (Inventory, dynamo_model::DatasetHandle, dynamo_model::SiteHandle) {
        let mut inv = Inventory::new();
        let site = inv.get_or_create_site("T2_Site");
        let partition = inv.get_or_create_partition("Dynamo");
        inv.site_mut(site).unwrap().partitions.insert(partition, dynamo_model::SitePartition::new(100_000_000_000));
        let group = inv.get_or_create_group(Some("AnalysisOps".into()), OwnershipLevel::Block);
        let dataset = inv.get_or_create_dataset("/A/B/C");
        let block = inv.get_or_create_block(dataset, BlockName::new("b1"));
        inv.block_mut(block).unwrap().size = 10_000_000_000;
        inv.recompute_dataset_totals(dataset);
        let mut br = BlockReplica::new(block, site, 10_000_000_000);
        br.group = Some(group);
        br.is_complete = true;
        inv.link_block_replica(br);
        (inv, dataset, site)
    }

    #[test]
    fn site_quota_bytes_sums_every_partition_at_a_site() {
        let (inv, _, site) = sample_inventory();
        let quota = site_quota_bytes(&inv);
        assert_eq!(quota[&site], 100_000_000_000);
    }

    #[test]
    fn site_occupied_bytes_sums_replicated_dataset_sizes() {
        let (inv, _, site) = sample_inventory();
        let occupied = site_occupied_bytes(&inv);
        assert_eq!(occupied[&site], 10_000_000_000);
    }

    #[test]
    fn block_to_catalog_falls_back_to_a_synthetic_file_with_no_file_list() {
        let (inv, dataset, _) = sample_inventory();
        let block = inv.dataset(dataset).unwrap().blocks().next().unwrap();
        let catalog_block = block_to_catalog(&inv, block).expect("block resolves");
        assert_eq!(catalog_block.files.len(), 1);
        assert_eq!(catalog_block.files[0].bytes, 10_000_000_000);
        assert!(catalog_block.name.starts_with("/A/B/C#"));
    }

    #[test]
    fn deletion_to_request_resolves_full_membership_to_every_block() {
        let (inv, dataset, site) = sample_inventory();
        let deletion = ScheduledDeletion {
            dataset,
            dataset_name: "/A/B/C".to_string(),
            site,
            blocks: None,
            size: 10_000_000_000,
            reason: "test".to_string(),
        };
        let request = deletion_to_request(&inv, &deletion).expect("resolves");
        assert_eq!(request.site_name, "T2_Site");
        assert_eq!(request.group.as_deref(), Some("AnalysisOps"));
        assert_eq!(request.blocks.len(), 1);
    }

    #[test]
    fn detox_tb_to_bytes_conversion_matches_the_shared_constant() {
        let deletion_volume_per_request_tb = 10.0;
        assert_eq!((deletion_volume_per_request_tb * BYTES_PER_TB) as u64, 10_000_000_000_000);
    }
}
