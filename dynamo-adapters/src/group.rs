//! Group catalog adapter (section 4.3.2).

use dynamo_errors::{DynamoError, DynamoResult};
use dynamo_model::{passes_filter, Inventory, OwnershipLevel};
use dynamo_rest::{Encoding, Method, RequestOptions, RestClient};
use tracing::{instrument, warn};

#[instrument(skip(client, inventory))]
pub async fn get_group_list(
    client: &RestClient,
    inventory: &mut Inventory,
    include: &[String],
    exclude: &[String],
) -> DynamoResult<()> {
    let body = client.request("groups", &RequestOptions::new(), Method::Get, Encoding::Json).await?;
    let groups = body
        .get("phedex")
        .and_then(|p| p.get("group"))
        .and_then(|g| g.as_array())
        .ok_or_else(|| DynamoError::parse("group list", "missing phedex.group array"))?;

    for group in groups {
        let Some(name) = group.get("name").and_then(|v| v.as_str()) else {
            warn!("group list entry missing name, skipping");
            continue;
        };
        if !passes_filter(name, include, exclude) {
            continue;
        }
        inventory.get_or_create_group(Some(name.to_string()), OwnershipLevel::Block);
    }
    Ok(())
}
