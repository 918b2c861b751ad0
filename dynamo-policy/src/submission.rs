//! The copy/deletion submission interface (section 4.7): turns Detox and
//! Enforcer/Dealer decisions into `subscribe`/`delete` POSTs against the
//! data-catalog REST service, batched by site up to `subscription_chunk_size`
//! and honoring read-only and test modes (section 9, "Request/approval split
//! for deletions"; "Synthetic negative op-ids in test mode").

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use dynamo_adapters::phedex_xml::{self, CatalogBlock, CatalogDataset};
use dynamo_errors::DynamoResult;
use dynamo_rest::{Encoding, Method, RequestOptions, RestClient};
use tracing::info;

/// One replica to copy or delete: a dataset at a site, optionally restricted
/// to a subset of blocks (partial-membership eviction/enforcement targets
/// the whole dataset replica when `blocks` covers every block).
#[derive(Clone, Debug)]
pub struct ReplicaRequest {
    pub dataset_name: String,
    pub site_name: String,
    pub group: Option<String>,
    pub blocks: Vec<CatalogBlock>,
}

impl ReplicaRequest {
    fn total_bytes(&self) -> u64 {
        self.blocks.iter().map(|b| b.files.iter().map(|f| f.bytes).sum::<u64>()).sum()
    }

    fn to_catalog_dataset(&self) -> CatalogDataset {
        CatalogDataset {
            name: self.dataset_name.clone(),
            is_open: false,
            is_transient: false,
            blocks: self.blocks.clone(),
        }
    }
}

pub struct SubmissionOptions {
    pub read_only: bool,
    pub test_mode: bool,
    pub subscription_chunk_size_bytes: u64,
}

impl Default for SubmissionOptions {
    fn default() -> Self {
        SubmissionOptions {
            read_only: false,
            test_mode: false,
            subscription_chunk_size_bytes: 40 * 1_000_000_000_000,
        }
    }
}

/// One outstanding batch: its synthetic or remote op id and the requests it
/// carried, used both as the `schedule_copies`/`schedule_deletions` return
/// value and as the input to [`Submission::approve`].
#[derive(Debug, Clone)]
pub struct Batch {
    pub op_id: i64,
    pub approved: bool,
    pub replicas: Vec<ReplicaRequest>,
}

pub struct Submission<'a> {
    client: &'a RestClient,
    options: SubmissionOptions,
    next_test_op_id: AtomicI64,
}

impl<'a> Submission<'a> {
    pub fn new(client: &'a RestClient, options: SubmissionOptions) -> Self {
        Submission {
            client,
            options,
            next_test_op_id: AtomicI64::new(-1),
        }
    }

    fn synthetic_op_id(&self) -> i64 {
        self.next_test_op_id.fetch_sub(1, Ordering::Relaxed)
    }

    /// Splits `requests` into per-site batches capped at
    /// `subscription_chunk_size_bytes` of accumulated physical size.
    pub fn chunk_by_site(requests: &[ReplicaRequest], chunk_size_bytes: u64) -> Vec<Vec<ReplicaRequest>> {
        let mut by_site: HashMap<String, Vec<ReplicaRequest>> = HashMap::new();
        for r in requests {
            by_site.entry(r.site_name.clone()).or_default().push(r.clone());
        }
        let mut batches = Vec::new();
        for (_site, mut site_requests) in by_site {
            site_requests.sort_by(|a, b| a.dataset_name.cmp(&b.dataset_name));
            let mut current = Vec::new();
            let mut current_size = 0u64;
            for r in site_requests {
                let size = r.total_bytes();
                if !current.is_empty() && current_size + size > chunk_size_bytes {
                    batches.push(std::mem::take(&mut current));
                    current_size = 0;
                }
                current_size += size;
                current.push(r);
            }
            if !current.is_empty() {
                batches.push(current);
            }
        }
        batches
    }

    async fn submit_batch(&self, resource: &str, batch: &[ReplicaRequest], comments: &str, origin: Option<&str>) -> DynamoResult<i64> {
        let Some(site_name) = batch.first().map(|r| r.site_name.clone()) else {
            return Ok(0);
        };
        let datasets: Vec<CatalogDataset> = batch.iter().map(ReplicaRequest::to_catalog_dataset).collect();
        let xml = phedex_xml::write(&site_name, &datasets)?;

        if self.options.read_only {
            info!(resource, site = site_name, comments, "read-only mode: logging submission payload without remote effect");
            return Ok(0);
        }
        if self.options.test_mode {
            let op_id = self.synthetic_op_id();
            info!(resource, site = site_name, op_id, "test mode: synthetic op id");
            return Ok(op_id);
        }

        let mut options = RequestOptions::new().push("node", site_name.clone()).push("data", xml).push("comments", comments.to_string());
        if let Some(origin) = origin {
            options = options.push("origin", origin.to_string());
        }
        let body = self.client.request(resource, &options, Method::Post, Encoding::Json).await?;
        let op_id = body
            .get("phedex")
            .and_then(|p| p.get("request_created"))
            .and_then(|r| r.as_array())
            .and_then(|a| a.first())
            .and_then(|r| r.get("id"))
            .and_then(|v| v.as_i64())
            .unwrap_or(0);
        Ok(op_id)
    }

    /// One copy request for a single replica; returns its op id.
    pub async fn schedule_copy(&self, replica: &ReplicaRequest, origin: Option<&str>, comments: &str) -> DynamoResult<i64> {
        self.submit_batch("subscribe", std::slice::from_ref(replica), comments, origin).await
    }

    /// Batches `requests` by site up to `subscription_chunk_size`, submits
    /// each batch, and returns `{op_id -> (approved, replicas)}`. Copy
    /// requests are never auto-approved (section 4.7: only deletions are).
    pub async fn schedule_copies(&self, requests: &[ReplicaRequest], comments: &str) -> DynamoResult<HashMap<i64, Batch>> {
        let mut results = HashMap::new();
        for batch in Self::chunk_by_site(requests, self.options.subscription_chunk_size_bytes) {
            let op_id = self.submit_batch("subscribe", &batch, comments, None).await?;
            results.insert(op_id, Batch { op_id, approved: false, replicas: batch });
        }
        Ok(results)
    }

    /// Symmetric with [`Self::schedule_copies`], restricted to blocks owned
    /// by `group_filter` when given, and auto-approves every resulting batch
    /// with a follow-up [`Self::approve`] call (section 4.7, section 9).
    pub async fn schedule_deletions(&self, requests: &[ReplicaRequest], group_filter: Option<&[String]>, comments: &str) -> DynamoResult<HashMap<i64, Batch>> {
        let filtered: Vec<ReplicaRequest> = match group_filter {
            None => requests.to_vec(),
            Some(groups) => requests
                .iter()
                .filter(|r| r.group.as_deref().map(|g| groups.iter().any(|x| x == g)).unwrap_or(false))
                .cloned()
                .collect(),
        };

        let mut results = HashMap::new();
        for batch in Self::chunk_by_site(&filtered, self.options.subscription_chunk_size_bytes) {
            let op_id = self.submit_batch("delete", &batch, comments, None).await?;
            if op_id != 0 {
                self.approve(op_id).await?;
            }
            results.insert(op_id, Batch { op_id, approved: true, replicas: batch });
        }
        Ok(results)
    }

    /// Follow-up approval call (section 9's request/approval split).
    pub async fn approve(&self, op_id: i64) -> DynamoResult<()> {
        if self.options.read_only || self.options.test_mode {
            info!(op_id, "skipping remote approval in read-only/test mode");
            return Ok(());
        }
        let options = RequestOptions::new().push("decision", "approve").push("request", op_id.to_string());
        self.client.request("updaterequest", &options, Method::Post, Encoding::Json).await?;
        Ok(())
    }

    /// `{(site, dataset) -> (total_bytes, done_bytes, last_update_epoch)}`.
    pub async fn status(&self, site: &str, dataset: &str) -> DynamoResult<HashMap<(String, String), (u64, u64, i64)>> {
        let options = RequestOptions::new().push("node", site.to_string()).push("dataset", dataset.to_string());
        let body = self.client.request("subscriptions", &options, Method::Get, Encoding::Json).await?;
        let mut out = HashMap::new();
        let Some(nodes) = body.get("phedex").and_then(|p| p.get("dataset")).and_then(|v| v.as_array()) else {
            return Ok(out);
        };
        for entry in nodes {
            let Some(name) = entry.get("name").and_then(|v| v.as_str()) else { continue };
            for subscription in entry.get("subscription").and_then(|v| v.as_array()).into_iter().flatten() {
                let (Some(node), Some(total), Some(done)) = (
                    subscription.get("node").and_then(|v| v.as_str()),
                    subscription.get("bytes").and_then(|v| v.as_u64()),
                    subscription.get("node_bytes").and_then(|v| v.as_u64()),
                ) else {
                    continue;
                };
                let last_update = subscription.get("time_update").and_then(|v| v.as_i64()).unwrap_or(0);
                out.insert((node.to_string(), name.to_string()), (total, done, last_update));
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_block(name: &str, bytes: u64) -> CatalogBlock {
        CatalogBlock {
            name: name.to_string(),
            is_open: false,
            files: vec![dynamo_adapters::phedex_xml::CatalogFile { name: format!("{name}.root"), bytes, checksum: None }],
        }
    }

    fn request(dataset: &str, site: &str, bytes: u64) -> ReplicaRequest {
        ReplicaRequest {
            dataset_name: dataset.to_string(),
            site_name: site.to_string(),
            group: None,
            blocks: vec![sample_block("b1", bytes)],
        }
    }

    #[test]
    fn chunks_split_once_accumulated_size_exceeds_cap() {
        let requests = vec![request("/A/B/C", "T2_Site", 30_000_000_000_000), request("/D/E/F", "T2_Site", 30_000_000_000_000)];
        let batches = Submission::chunk_by_site(&requests, 40_000_000_000_000);
        assert_eq!(batches.len(), 2);
    }

    #[test]
    fn chunks_group_by_site_independently() {
        let requests = vec![request("/A/B/C", "T2_Site1", 1_000), request("/D/E/F", "T2_Site2", 1_000)];
        let batches = Submission::chunk_by_site(&requests, 40_000_000_000_000);
        assert_eq!(batches.len(), 2);
    }
}
