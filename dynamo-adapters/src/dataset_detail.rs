//! Dataset-detail adapter (section 4.3.4): three phases that fill in block
//! sets, resolve flagged open blocks, and backfill status/type/version.

use dynamo_errors::DynamoResult;
use dynamo_model::{BlockName, DataType, DatasetHandle, DatasetStatus, Inventory, SoftwareVersion};
use dynamo_rest::{Encoding, Method, RequestOptions, RestClient};
use futures::stream::{self, StreamExt};
use tracing::{instrument, warn};

const CONSTITUENT_BATCH: usize = 100;
const STATUS_BATCH: usize = 1000;
const OPEN_BLOCK_AGE_THRESHOLD_S: i64 = 48 * 3600;
const CONCURRENCY: usize = 64;

struct RemoteBlock {
    name: String,
    size: u64,
    num_files: u32,
    is_open: bool,
    last_update: i64,
}

/// Phase 1 (section 4.3.4): overwrite each dataset's block set with the
/// remote one, recompute totals, and flag long-open blocks for the
/// secondary check. Returns the flagged `(dataset, block)` pairs.
#[instrument(skip(client, inventory, datasets))]
pub async fn constituent_check(
    client: &RestClient,
    inventory: &mut Inventory,
    datasets: &[DatasetHandle],
    now: i64,
) -> DynamoResult<Vec<(DatasetHandle, dynamo_model::BlockHandle)>> {
    let mut flagged = Vec::new();
    let mut seen = std::collections::HashSet::new();

    for batch in datasets.chunks(CONSTITUENT_BATCH) {
        let names: Vec<String> = batch
            .iter()
            .filter_map(|h| inventory.dataset(*h).map(|d| d.name.clone()))
            .collect();
        if names.is_empty() {
            continue;
        }
        let fetches = names.iter().map(|name| async move {
            let options = RequestOptions::new().push("dataset", name.clone());
            let result = client.request("blocks", &options, Method::Get, Encoding::Json).await;
            (name.clone(), result)
        });
        let results: Vec<_> = stream::iter(fetches).buffer_unordered(CONCURRENCY.min(names.len().max(1))).collect().await;

        for (name, result) in results {
            let Some(handle) = inventory.find_dataset_by_name(&name) else { continue };
            seen.insert(handle);
            let body = match result {
                Ok(body) => body,
                Err(err) => {
                    warn!(%err, dataset = name, "constituent check request failed, leaving block set as-is");
                    continue;
                }
            };
            let remote_blocks = match parse_blocks(&body) {
                Some(b) => b,
                None => {
                    warn!(dataset = name, "constituent check response malformed, skipping");
                    continue;
                }
            };

            if let Some(dataset) = inventory.dataset_mut(handle) {
                dataset.clear_blocks();
            }
            for remote in remote_blocks {
                let block = inventory.get_or_create_block(handle, BlockName::new(remote.name));
                if let Some(b) = inventory.block_mut(block) {
                    b.size = remote.size;
                    b.num_files = remote.num_files;
                    b.is_open = remote.is_open;
                    b.last_update = remote.last_update;
                }
                if remote.is_open && now - remote.last_update > OPEN_BLOCK_AGE_THRESHOLD_S {
                    flagged.push((handle, block));
                }
            }
            inventory.recompute_dataset_totals(handle);
            if let Some(dataset) = inventory.dataset_mut(handle) {
                dataset.status = DatasetStatus::Valid;
            }
        }
    }

    // Datasets the remote catalog never returned are marked UNKNOWN with
    // totals zeroed (section 4.3.4).
    for handle in datasets {
        if seen.contains(handle) {
            continue;
        }
        if let Some(dataset) = inventory.dataset_mut(*handle) {
            dataset.status = DatasetStatus::Unknown;
            dataset.size = 0;
            dataset.num_files = 0;
        }
    }
    Ok(flagged)
}

fn parse_blocks(body: &serde_json::Value) -> Option<Vec<RemoteBlock>> {
    let blocks = body.get("dbs").and_then(|d| d.get("block")).and_then(|b| b.as_array())?;
    Some(
        blocks
            .iter()
            .filter_map(|b| {
                Some(RemoteBlock {
                    name: b.get("name").and_then(|v| v.as_str())?.to_string(),
                    size: b.get("bytes").and_then(|v| v.as_u64()).unwrap_or(0),
                    num_files: b.get("nfiles").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
                    is_open: b.get("is_open").and_then(|v| v.as_str()).map(|s| s == "y").unwrap_or(false),
                    last_update: b.get("time_update").and_then(|v| v.as_i64()).unwrap_or(0),
                })
            })
            .collect(),
    )
}

/// Phase 2 (section 4.3.4): re-query each flagged block; if unreachable or
/// still reported open, clone it with `is_open = true` and bump the
/// dataset's status to PRODUCTION.
#[instrument(skip(client, inventory, flagged))]
pub async fn secondary_open_block_check(
    client: &RestClient,
    inventory: &mut Inventory,
    flagged: &[(DatasetHandle, dynamo_model::BlockHandle)],
) -> DynamoResult<()> {
    for &(dataset, block) in flagged {
        let Some(name) = inventory.block(block).map(|b| b.name.as_str().to_string()) else { continue };
        let options = RequestOptions::new().push("block_name", name);
        let still_open = match client.request("blocks", &options, Method::Get, Encoding::Json).await {
            Ok(body) => parse_blocks(&body).map(|blocks| blocks.iter().any(|b| b.is_open)).unwrap_or(true),
            Err(err) => {
                warn!(%err, "secondary open-block check unreachable, treating as still open");
                true
            }
        };
        if still_open {
            if let Some(b) = inventory.block(block) {
                let updated = b.cloned_open();
                inventory.replace_block(updated);
            }
            if let Some(d) = inventory.dataset_mut(dataset) {
                d.status = DatasetStatus::Production;
            }
        }
    }
    Ok(())
}

/// Phase 3 (section 4.3.4): backfill `status`/`data_type`/`last_update`
/// (batched up to 1000) and software version for datasets missing one.
#[instrument(skip(client, inventory, datasets))]
pub async fn fill_status_type_version(client: &RestClient, inventory: &mut Inventory, datasets: &[DatasetHandle]) -> DynamoResult<()> {
    let needing_update: Vec<DatasetHandle> = datasets
        .iter()
        .copied()
        .filter(|h| {
            inventory
                .dataset(*h)
                .map(|d| d.status != DatasetStatus::Valid || d.data_type == DataType::Unknown)
                .unwrap_or(false)
        })
        .collect();

    for batch in needing_update.chunks(STATUS_BATCH) {
        let names: Vec<String> = batch.iter().filter_map(|h| inventory.dataset(*h).map(|d| d.name.clone())).collect();
        if names.is_empty() {
            continue;
        }
        let options = RequestOptions::new().push("dataset", names.join(","));
        let body = match client.request("datasetlist", &options, Method::Post, Encoding::Json).await {
            Ok(body) => body,
            Err(err) => {
                warn!(%err, "status/type backfill request failed for this batch");
                continue;
            }
        };
        let Some(entries) = body.get("dbs").and_then(|d| d.get("dataset")).and_then(|v| v.as_array()) else {
            warn!("status/type backfill response malformed, skipping batch");
            continue;
        };
        for entry in entries {
            let (Some(name), Some(status), Some(data_type)) = (
                entry.get("name").and_then(|v| v.as_str()),
                entry.get("status").and_then(|v| v.as_str()),
                entry.get("datatype").and_then(|v| v.as_str()),
            ) else {
                continue;
            };
            let Some(handle) = inventory.find_dataset_by_name(name) else { continue };
            if let Some(d) = inventory.dataset_mut(handle) {
                d.status = DatasetStatus::decode(status);
                d.data_type = DataType::decode(data_type);
                if let Some(ts) = entry.get("last_update").and_then(|v| v.as_i64()) {
                    d.last_update = ts;
                }
            }
        }
    }

    for &handle in datasets {
        let needs_version = inventory.dataset(handle).map(|d| d.software_version.is_none()).unwrap_or(false);
        if !needs_version {
            continue;
        }
        let Some(name) = inventory.dataset(handle).map(|d| d.name.clone()) else { continue };
        let options = RequestOptions::new().push("dataset", name.clone());
        let body = match client.request("releaseversions", &options, Method::Get, Encoding::Json).await {
            Ok(body) => body,
            Err(err) => {
                warn!(%err, dataset = name, "release version lookup failed");
                continue;
            }
        };
        let Some(releases) = body.get("dbs").and_then(|d| d.get("release")).and_then(|v| v.as_array()) else {
            continue;
        };
        let Some(first) = releases.first().and_then(|v| v.as_str()) else { continue };
        if let Some(version) = SoftwareVersion::parse(first) {
            if let Some(d) = inventory.dataset_mut(handle) {
                d.software_version = Some(version);
            }
        }
    }
    Ok(())
}
