//! Site catalog adapter (section 4.3.1).

use std::collections::HashMap;

use dynamo_errors::{DynamoError, DynamoResult};
use dynamo_model::{passes_filter, Inventory, SiteStatus, StorageType};
use dynamo_rest::{Encoding, Method, RequestOptions, RestClient};
use tracing::{instrument, warn};

/// `getplotdata` column ids for the two status feeds (section 4.3.1: "two
/// status feeds (WAITROOM-code and MORGUE-code)").
const WAITROOM_COLUMN_ID: &str = "282";
const MORGUE_COLUMN_ID: &str = "283";

/// Upserts every `Site` the data-catalog's `nodes` resource lists, after
/// applying `include`/`exclude` name filters.
#[instrument(skip(client, inventory))]
pub async fn get_site_list(
    client: &RestClient,
    inventory: &mut Inventory,
    include: &[String],
    exclude: &[String],
) -> DynamoResult<()> {
    let body = client.request("nodes", &RequestOptions::new(), Method::Get, Encoding::Json).await?;
    let nodes = body
        .get("phedex")
        .and_then(|p| p.get("node"))
        .and_then(|n| n.as_array())
        .ok_or_else(|| DynamoError::parse("site list", "missing phedex.node array"))?;

    for node in nodes {
        let Some(name) = node.get("name").and_then(|v| v.as_str()) else {
            warn!("site list entry missing name, skipping");
            continue;
        };
        if !passes_filter(name, include, exclude) {
            continue;
        }
        let handle = inventory.get_or_create_site(name);
        let Some(site) = inventory.site_mut(handle) else { continue };
        if let Some(se) = node.get("se").and_then(|v| v.as_str()) {
            site.host = se.to_string();
        }
        if let Some(kind) = node.get("kind").and_then(|v| v.as_str()) {
            site.storage_type = StorageType::decode(kind);
        }
        if let Some(technology) = node.get("technology").and_then(|v| v.as_str()) {
            site.backend = technology.to_string();
        }
    }
    Ok(())
}

/// Marks every known site READY, then overlays the WAITROOM and MORGUE
/// feeds keyed by the most recent timestamp per site. A feed that fails to
/// parse is logged and skipped without touching updates already applied by
/// the other feed (section 4.3.1).
#[instrument(skip(client, inventory))]
pub async fn set_site_status(client: &RestClient, inventory: &mut Inventory) -> DynamoResult<()> {
    for handle in inventory.sites().map(|s| s.handle).collect::<Vec<_>>() {
        if let Some(site) = inventory.site_mut(handle) {
            site.status = SiteStatus::Ready;
        }
    }
    apply_status_feed(client, inventory, WAITROOM_COLUMN_ID, SiteStatus::Waitroom).await;
    apply_status_feed(client, inventory, MORGUE_COLUMN_ID, SiteStatus::Morgue).await;
    Ok(())
}

async fn apply_status_feed(client: &RestClient, inventory: &mut Inventory, column_id: &str, status: SiteStatus) {
    let options = RequestOptions::new().push("columnid", column_id);
    let body = match client.request("getplotdata", &options, Method::Get, Encoding::Json).await {
        Ok(body) => body,
        Err(err) => {
            warn!(%err, column_id, "site status feed request failed, leaving prior updates in place");
            return;
        }
    };
    let Some(rows) = body.get("csvdata").and_then(|v| v.as_array()) else {
        warn!(column_id, "site status feed missing csvdata, skipping");
        return;
    };

    let mut latest: HashMap<String, i64> = HashMap::new();
    for row in rows {
        let (Some(site_name), Some(ts)) = (
            row.get("VALUE").and_then(|v| v.as_str()),
            row.get("TIMESTAMP").and_then(|v| v.as_i64()),
        ) else {
            warn!(column_id, "site status feed row missing fields, skipping");
            continue;
        };
        latest.entry(site_name.to_string()).and_modify(|prev| *prev = (*prev).max(ts)).or_insert(ts);
    }

    for site_name in latest.keys() {
        if let Some(handle) = inventory.find_site_by_name(site_name) {
            if let Some(site) = inventory.site_mut(handle) {
                site.status = status;
            }
        }
    }
}
