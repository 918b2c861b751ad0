//! Tape-presence adapter (section 4.3.5).

use std::collections::HashSet;

use dynamo_errors::DynamoResult;
use dynamo_model::{DatasetHandle, DatasetStatus, Inventory};
use dynamo_rest::{Encoding, Method, RequestOptions, RestClient};
use futures::stream::{self, StreamExt};
use tracing::{instrument, warn};

const BATCH: usize = 1000;
const CONCURRENCY: usize = 64;

/// For every dataset with `on_tape == false` and `status != IGNORED`, checks
/// whether every block name now has a complete custodial replica at a tape
/// site, in batches of 1000 issued in parallel.
#[instrument(skip(client, inventory))]
pub async fn check_tape_presence(client: &RestClient, inventory: &mut Inventory) -> DynamoResult<()> {
    let candidates: Vec<DatasetHandle> = inventory
        .datasets()
        .filter(|d| !d.on_tape && d.status != DatasetStatus::Ignored)
        .map(|d| d.handle)
        .collect();

    for batch in candidates.chunks(BATCH) {
        let names: Vec<(DatasetHandle, String)> = batch
            .iter()
            .filter_map(|h| inventory.dataset(*h).map(|d| (*h, d.name.clone())))
            .collect();
        let fetches = names.iter().map(|(handle, name)| async move {
            let options = RequestOptions::new()
                .push("dataset", name.clone())
                .push("custodial", "y")
                .push("complete", "y");
            let result = client.request("blockreplicasummary", &options, Method::Get, Encoding::Json).await;
            (*handle, result)
        });
        let results: Vec<_> = stream::iter(fetches).buffer_unordered(CONCURRENCY).collect().await;

        for (handle, result) in results {
            let body = match result {
                Ok(body) => body,
                Err(err) => {
                    warn!(%err, "tape presence check failed for this dataset, leaving on_tape unchanged");
                    continue;
                }
            };
            let found: HashSet<String> = body
                .get("phedex")
                .and_then(|p| p.get("block"))
                .and_then(|b| b.as_array())
                .into_iter()
                .flatten()
                .filter_map(|b| b.get("name").and_then(|v| v.as_str()))
                .filter_map(|external| dynamo_model::ExternalBlockName::new(external).split().map(|(_, block)| block.as_str().to_string()))
                .collect();

            let all_blocks: HashSet<String> = inventory
                .dataset(handle)
                .map(|d| d.blocks().collect::<Vec<_>>())
                .unwrap_or_default()
                .iter()
                .filter_map(|b| inventory.block(*b))
                .map(|b| b.name.as_str().to_string())
                .collect();

            if let Some(d) = inventory.dataset_mut(handle) {
                d.on_tape = all_blocks.is_subset(&found);
            }
        }
    }
    Ok(())
}
