//! Demand adapters (section 4.3.6): bounded read-only sources producing the
//! raw per-dataset signals `dynamo-demand`'s `DemandManager` aggregates.

use dynamo_config::LockSourceKind;
use dynamo_demand::LockEntry;
use dynamo_errors::DynamoResult;
use dynamo_rest::{Encoding, Method, RequestOptions, RestClient};
use tracing::{instrument, warn};

/// Fetches one configured lock source and normalizes it to `(dataset[,
/// site])` pairs regardless of its wire shape (section 4.5).
#[instrument(skip(client))]
pub async fn fetch_lock_source(client: &RestClient, url_path: &str, kind: LockSourceKind) -> DynamoResult<Vec<LockEntry>> {
    let body = client.request(url_path, &RequestOptions::new(), Method::Get, Encoding::Json).await?;
    let entries = match kind {
        LockSourceKind::ListOfDatasets => body
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|v| v.as_str())
            .map(LockEntry::dataset_wide)
            .collect(),
        LockSourceKind::CmswebListOfDatasets => body
            .get("result")
            .and_then(|v| v.as_array())
            .into_iter()
            .flatten()
            .filter_map(|v| v.as_str())
            .map(LockEntry::dataset_wide)
            .collect(),
        LockSourceKind::SiteToDatasets => {
            let mut entries = Vec::new();
            if let Some(map) = body.as_object() {
                for (site, datasets) in map {
                    for dataset in datasets.as_array().into_iter().flatten().filter_map(|v| v.as_str()) {
                        entries.push(LockEntry::at_site(dataset, site.clone()));
                    }
                }
            }
            entries
        }
    };
    Ok(entries)
}

/// Fetches the access-history bins for `dataset` over the configured
/// lookback window, returning `(bucket_start_epoch, count)` pairs.
#[instrument(skip(client))]
pub async fn fetch_access_history(client: &RestClient, dataset: &str, increment_s: u32, max_back_query: u32) -> DynamoResult<Vec<(i64, u64)>> {
    let options = RequestOptions::new()
        .push("dataset", dataset)
        .push("binwidth", increment_s.to_string())
        .push("maxback", max_back_query.to_string());
    let body = client.request("data", &options, Method::Get, Encoding::Json).await?;
    let Some(bins) = body.get("bins").and_then(|v| v.as_array()) else {
        warn!(dataset, "access history response missing bins, treating as no history");
        return Ok(Vec::new());
    };
    Ok(bins
        .iter()
        .filter_map(|b| {
            let t = b.get("t").and_then(|v| v.as_i64())?;
            let n = b.get("n").and_then(|v| v.as_u64())?;
            Some((t, n))
        })
        .collect())
}

/// Counts pending (not-yet-created) requests per dataset from the global
/// request queue (section 4.3.6).
#[instrument(skip(client))]
pub async fn fetch_pending_request_counts(client: &RestClient) -> DynamoResult<std::collections::HashMap<String, u32>> {
    let body = client.request("transferrequests", &RequestOptions::new(), Method::Get, Encoding::Json).await?;
    let mut counts = std::collections::HashMap::new();
    let Some(requests) = body.get("phedex").and_then(|p| p.get("request")).and_then(|v| v.as_array()) else {
        return Ok(counts);
    };
    for request in requests {
        if let Some(dataset) = request.get("dataset_name").and_then(|v| v.as_str()) {
            *counts.entry(dataset.to_string()).or_insert(0) += 1;
        }
    }
    Ok(counts)
}
