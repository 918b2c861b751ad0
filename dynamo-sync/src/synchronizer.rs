//! The synchronizer (section 4.4): a periodic loop of six ordered phases,
//! each bound to the failure model a careful operator expects — two phases
//! that abort the whole cycle, one whose chunk failures just leave a range
//! untouched, two best-effort phases, and one all-or-nothing save.

use dynamo_adapters::{dataset_detail, group, replica, site, tape};
use dynamo_config::Config;
use dynamo_errors::DynamoResult;
use dynamo_model::{DataType, DatasetStatus, Inventory};
use dynamo_policy::submission::{Submission, SubmissionOptions};
use dynamo_rest::RestClient;
use dynamo_store::Store;
use tracing::{info, info_span, warn};
use tracing_futures::Instrument;

use crate::policy_cycle;

/// The REST endpoints a synchronization cycle talks to (section 6): the
/// data catalog (site/group/replica/tape/subscribe/delete resources), the
/// dataset catalog (block/status/version detail), the site-status feed,
/// and the lock service the policy cycle's demand refresh reads from.
pub struct Synchronizer {
    data_catalog: RestClient,
    dataset_catalog: RestClient,
    site_status: RestClient,
    lock: RestClient,
}

impl Synchronizer {
    pub fn new(config: &Config) -> DynamoResult<Synchronizer> {
        let key = &config.webservice.x509_key;
        let attempts = config.webservice.num_attempts;
        Ok(Synchronizer {
            data_catalog: RestClient::new(&config.phedex.url_base, key, attempts)?,
            dataset_catalog: RestClient::new(&config.dbs.url_base, key, attempts)?,
            site_status: RestClient::new(&config.ssb.url_base, key, attempts)?,
            lock: RestClient::new(&config.weblock.lock, key, attempts)?,
        })
    }

    /// Datasets whose detail the spec's phase 4 restriction covers: status
    /// PRODUCTION or UNKNOWN, data_type UNKNOWN, or no software version yet.
    fn detail_fill_targets(inventory: &Inventory) -> Vec<dynamo_model::DatasetHandle> {
        inventory
            .datasets()
            .filter(|d| {
                matches!(d.status, DatasetStatus::Production | DatasetStatus::Unknown)
                    || d.data_type == DataType::Unknown
                    || d.software_version.is_none()
            })
            .map(|d| d.handle)
            .collect()
    }

    /// Runs one synchronization cycle. Phases 1-2 propagate their error
    /// immediately and commit nothing; phase 3's chunk failures and phases
    /// 4-5's request failures are logged and skipped in place; phase 6 is
    /// the only point at which `inventory` is actually persisted.
    pub async fn run_cycle(&self, config: &Config, inventory: &mut Inventory, store: &mut Store, now: i64) -> DynamoResult<()> {
        let included_sites = &config.inventory.included_sites;
        let excluded_sites = &config.inventory.excluded_sites;
        let included_groups = &config.inventory.included_groups;

        async {
            site::get_site_list(&self.data_catalog, inventory, included_sites, excluded_sites).await?;
            site::set_site_status(&self.site_status, inventory).await
        }
        .instrument(info_span!("sync_phase", phase = "sites"))
        .await?;

        async { group::get_group_list(&self.data_catalog, inventory, included_groups, &[]).await }
            .instrument(info_span!("sync_phase", phase = "groups"))
            .await?;

        async {
            if let Err(err) = replica::make_replica_links(&self.data_catalog, inventory, included_sites, included_groups, None).await {
                warn!(%err, "replica catalog phase failed outright, replicas left as of the last committed cycle");
            }
        }
        .instrument(info_span!("sync_phase", phase = "replicas"))
        .await;

        async {
            let targets = Self::detail_fill_targets(inventory);
            match dataset_detail::constituent_check(&self.dataset_catalog, inventory, &targets, now).await {
                Ok(flagged) => {
                    if let Err(err) = dataset_detail::secondary_open_block_check(&self.dataset_catalog, inventory, &flagged).await {
                        warn!(%err, "secondary open-block check failed, flagged blocks left as reported");
                    }
                }
                Err(err) => warn!(%err, "constituent check failed, dataset detail left as of the last committed cycle"),
            }
            if let Err(err) = dataset_detail::fill_status_type_version(&self.dataset_catalog, inventory, &targets).await {
                warn!(%err, "status/type/version backfill failed for this cycle");
            }
        }
        .instrument(info_span!("sync_phase", phase = "dataset_detail"))
        .await;

        async {
            if let Err(err) = tape::check_tape_presence(&self.data_catalog, inventory).await {
                warn!(%err, "tape presence check failed for this cycle");
            }
        }
        .instrument(info_span!("sync_phase", phase = "tape"))
        .await;

        async { store.save_full(inventory).await }
            .instrument(info_span!("sync_phase", phase = "save"))
            .await?;

        info!("synchronization cycle committed");
        Ok(())
    }

    /// Runs one policy cycle against the inventory the last `run_cycle`
    /// committed (section 4.6): refreshes demand, evicts under Detox, runs
    /// Dealer, and submits both to the data catalog. `inventory` is not
    /// mutated or re-saved here; every effect is remote.
    pub async fn run_policy_cycle(&self, config: &Config, inventory: &Inventory, dry_run: bool, now: i64) -> DynamoResult<()> {
        let submission = Submission::new(
            &self.data_catalog,
            SubmissionOptions {
                read_only: config.read_only,
                test_mode: dry_run,
                subscription_chunk_size_bytes: config.phedex.subscription_chunk_size,
            },
        );
        policy_cycle::run_policy_cycle(&self.lock, &self.site_status, &self.data_catalog, config, inventory, &submission, now).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dynamo_model::{BlockName, Inventory};

    #[test]
    fn detail_fill_targets_includes_unknown_type_regardless_of_status() {
        let mut inv = Inventory::new();
        let dataset = inv.get_or_create_dataset("/A/B/C");
        inv.get_or_create_block(dataset, BlockName::new("b1"));
        if let Some(d) = inv.dataset_mut(dataset) {
            d.status = DatasetStatus::Valid;
            d.data_type = DataType::Unknown;
        }
        let targets = Synchronizer::detail_fill_targets(&inv);
        assert_eq!(targets, vec![dataset]);
    }

    #[test]
    fn detail_fill_targets_excludes_fully_resolved_dataset() {
        let mut inv = Inventory::new();
        let dataset = inv.get_or_create_dataset("/A/B/C");
        if let Some(d) = inv.dataset_mut(dataset) {
            d.status = DatasetStatus::Valid;
            d.data_type = DataType::Mc;
            d.software_version = dynamo_model::SoftwareVersion::parse("CMSSW_10_6_2");
        }
        let targets = Synchronizer::detail_fill_targets(&inv);
        assert!(targets.is_empty());
    }
}
