//! The loading algorithm of section 4.1: groups, then sites, then datasets
//! (populating id maps), then blocks ordered by dataset id, then a single
//! streamed join for replicas.

use std::collections::HashMap;

use dynamo_errors::{DynamoError, DynamoResult};
use dynamo_model::{BlockName, DatasetHandle, GroupHandle, Inventory, OwnershipLevel, SiteHandle};
use mysql_async::prelude::*;
use mysql_async::Conn;
use tracing::info;

use crate::filters::LoadFilters;
use crate::schema;
use crate::temp_table::setup_constraint_table;

/// `id -> handle` maps used while walking the streamed joins; population
/// order matters because later queries reference ids loaded earlier
/// (section 4.1, step 1).
#[derive(Default)]
struct IdMaps {
    groups: HashMap<u64, GroupHandle>,
    sites: HashMap<u64, SiteHandle>,
    datasets: HashMap<u64, DatasetHandle>,
}

pub async fn load_data(conn: &mut Conn, inventory: &mut Inventory, filters: &LoadFilters) -> DynamoResult<()> {
    let mut ids = IdMaps::default();
    let mut temp_tables = Vec::new();

    let result = async {
        load_groups(conn, inventory, &mut ids, filters, &mut temp_tables).await?;
        info!(count = ids.groups.len(), "loaded groups");

        load_sites(conn, inventory, &mut ids, filters, &mut temp_tables).await?;
        info!(count = ids.sites.len(), "loaded sites");

        load_datasets(conn, inventory, &mut ids, filters, &mut temp_tables).await?;
        info!(count = ids.datasets.len(), "loaded datasets");

        load_blocks(conn, inventory, &ids).await?;
        load_replicas(conn, inventory, &ids).await?;
        Ok(())
    }
    .await;

    crate::temp_table::drop_constraint_tables(conn, &temp_tables).await?;
    result
}

async fn load_groups(
    conn: &mut Conn,
    inventory: &mut Inventory,
    ids: &mut IdMaps,
    filters: &LoadFilters,
    temp_tables: &mut Vec<String>,
) -> DynamoResult<()> {
    let constraint = setup_constraint_table(conn, "groups", "name", filters.group_names.as_deref()).await?;
    if let Some(tmp) = &constraint {
        temp_tables.push(tmp.clone());
    }
    let sql = match &constraint {
        Some(tmp) => format!(
            "SELECT g.id, g.name, g.olevel FROM `{}` g JOIN `{tmp}` c ON g.name = c.name",
            schema::GROUPS
        ),
        None => format!("SELECT id, name, olevel FROM `{}`", schema::GROUPS),
    };
    let rows: Vec<(u64, String, String)> = conn
        .query(&sql)
        .await
        .map_err(|e| DynamoError::store("load_groups", e))?;
    for (id, name, olevel) in rows {
        let olevel = if olevel.eq_ignore_ascii_case("dataset") {
            OwnershipLevel::Dataset
        } else {
            OwnershipLevel::Block
        };
        let handle = inventory.get_or_create_group(Some(name), olevel);
        ids.groups.insert(id, handle);
    }
    Ok(())
}

async fn load_sites(
    conn: &mut Conn,
    inventory: &mut Inventory,
    ids: &mut IdMaps,
    filters: &LoadFilters,
    temp_tables: &mut Vec<String>,
) -> DynamoResult<()> {
    use dynamo_model::{SiteStatus, StorageType};

    let constraint = setup_constraint_table(conn, "sites", "name", filters.site_names.as_deref()).await?;
    if let Some(tmp) = &constraint {
        temp_tables.push(tmp.clone());
    }
    let sql = match &constraint {
        Some(tmp) => format!(
            "SELECT s.id, s.name, s.host, s.storage_type, s.backend, s.status FROM `{}` s JOIN `{tmp}` c ON s.name = c.name",
            schema::SITES
        ),
        None => format!("SELECT id, name, host, storage_type, backend, status FROM `{}`", schema::SITES),
    };
    let rows: Vec<(u64, String, String, String, String, String)> = conn
        .query(&sql)
        .await
        .map_err(|e| DynamoError::store("load_sites", e))?;
    for (id, name, host, storage_type, backend, status) in rows {
        let handle = inventory.get_or_create_site(&name);
        if let Some(site) = inventory.site_mut(handle) {
            site.host = host;
            site.storage_type = StorageType::decode(&storage_type);
            site.backend = backend;
            site.status = match status.to_ascii_uppercase().as_str() {
                "READY" => SiteStatus::Ready,
                "WAITROOM" => SiteStatus::Waitroom,
                "MORGUE" => SiteStatus::Morgue,
                _ => SiteStatus::Unknown,
            };
        }
        ids.sites.insert(id, handle);
    }
    Ok(())
}

async fn load_datasets(
    conn: &mut Conn,
    inventory: &mut Inventory,
    ids: &mut IdMaps,
    filters: &LoadFilters,
    temp_tables: &mut Vec<String>,
) -> DynamoResult<()> {
    use dynamo_model::{DataType, DatasetStatus};

    let constraint = setup_constraint_table(conn, "datasets", "name", filters.dataset_names.as_deref()).await?;
    if let Some(tmp) = &constraint {
        temp_tables.push(tmp.clone());
    }
    let sql = match &constraint {
        Some(tmp) => format!(
            "SELECT d.id, d.name, d.size, d.num_files, d.status, d.data_type, d.last_update, d.is_open \
             FROM `{}` d JOIN `{tmp}` c ON d.name = c.name",
            schema::DATASETS
        ),
        None => format!(
            "SELECT id, name, size, num_files, status, data_type, last_update, is_open FROM `{}`",
            schema::DATASETS
        ),
    };
    let rows: Vec<(u64, String, u64, u32, String, String, i64, bool)> = conn
        .query(&sql)
        .await
        .map_err(|e| DynamoError::store("load_datasets", e))?;
    for (id, name, size, num_files, status, data_type, last_update, is_open) in rows {
        let handle = inventory.get_or_create_dataset(&name);
        if let Some(dataset) = inventory.dataset_mut(handle) {
            dataset.size = size;
            dataset.num_files = num_files;
            dataset.status = DatasetStatus::decode(&status);
            dataset.data_type = DataType::decode(&data_type);
            dataset.last_update = last_update;
            dataset.is_open = is_open;
        }
        ids.datasets.insert(id, handle);
    }
    Ok(())
}

/// Blocks ordered by dataset id, enabling a single pass grouping (section
/// 4.1, step 2) — we don't strictly need the ordering since the inventory
/// indexes by handle either way, but we still ask the database to sort so
/// the query plan matches the documented algorithm.
async fn load_blocks(conn: &mut Conn, inventory: &mut Inventory, ids: &IdMaps) -> DynamoResult<()> {
    let sql = format!(
        "SELECT id, dataset_id, name, size, num_files, is_open, last_update FROM `{}` ORDER BY dataset_id",
        schema::BLOCKS
    );
    let rows: Vec<(u64, u64, String, u64, u32, bool, i64)> = conn
        .query(&sql)
        .await
        .map_err(|e| DynamoError::store("load_blocks", e))?;
    for (_id, dataset_id, name, size, num_files, is_open, last_update) in rows {
        let Some(&dataset) = ids.datasets.get(&dataset_id) else {
            continue;
        };
        let handle = inventory.get_or_create_block(dataset, BlockName::new(name));
        if let Some(block) = inventory.block_mut(handle) {
            block.size = size;
            block.num_files = num_files;
            block.is_open = is_open;
            block.last_update = last_update;
        }
    }
    Ok(())
}

/// The replica join of section 4.1 step 3:
/// `dataset_replicas ⋈ blocks ⋈ block_replicas (left) ⋈ block_replica_sizes (left)`,
/// ordered by `(dataset_id, site_id)`. We walk the stream and finalize each
/// `DatasetReplica` when the key changes rather than building one query per
/// replica.
async fn load_replicas(conn: &mut Conn, inventory: &mut Inventory, ids: &IdMaps) -> DynamoResult<()> {
    let sql = format!(
        "SELECT dr.dataset_id, dr.site_id, b.id, b.name, br.group_id, br.is_complete, br.is_custodial, \
                br.last_update, brs.size \
         FROM `{dataset_replicas}` dr \
         LEFT JOIN `{block_replicas}` br ON br.site_id = dr.site_id \
         LEFT JOIN `{blocks}` b ON b.id = br.block_id AND b.dataset_id = dr.dataset_id \
         LEFT JOIN `{block_replica_sizes}` brs ON brs.block_id = br.block_id AND brs.site_id = br.site_id \
         ORDER BY dr.dataset_id, dr.site_id",
        dataset_replicas = schema::DATASET_REPLICAS,
        block_replicas = schema::BLOCK_REPLICAS,
        blocks = schema::BLOCKS,
        block_replica_sizes = schema::BLOCK_REPLICA_SIZES,
    );

    type Row = (u64, u64, Option<u64>, Option<String>, Option<u64>, Option<bool>, Option<bool>, Option<i64>, Option<u64>);
    let rows: Vec<Row> = conn.query(&sql).await.map_err(|e| DynamoError::store("load_replicas", e))?;

    for (dataset_id, site_id, block_id, block_name, group_id, is_complete, is_custodial, last_update, override_size) in rows {
        let (Some(&dataset), Some(&site)) = (ids.datasets.get(&dataset_id), ids.sites.get(&site_id)) else {
            continue;
        };
        inventory.ensure_dataset_replica(dataset, site);

        // block_id == NULL denotes an empty DatasetReplica row contributed
        // by the LEFT JOIN; nothing further to link for this row.
        let (Some(_block_id), Some(block_name)) = (block_id, block_name) else {
            continue;
        };
        let block = match inventory.find_block_by_name(dataset, &BlockName::new(block_name)) {
            Some(b) => b,
            None => continue,
        };
        let block_size = inventory.block(block).map(|b| b.size).unwrap_or(0);
        let remote_complete = is_complete.unwrap_or(false);
        let size = override_size.unwrap_or(block_size);

        let mut replica = dynamo_model::BlockReplica::new(block, site, size);
        replica.group = group_id.and_then(|gid| ids.groups.get(&gid).copied());
        replica.is_complete = dynamo_model::BlockReplica::compute_is_complete(remote_complete, size, block_size);
        replica.is_custodial = is_custodial.unwrap_or(false);
        replica.last_update = last_update.unwrap_or(0);
        inventory.link_block_replica(replica);
    }

    for dataset in inventory.datasets().map(|d| d.handle).collect::<Vec<_>>() {
        for site in inventory.dataset(dataset).unwrap().replica_sites().collect::<Vec<_>>() {
            inventory.recompute_is_partial(dataset, site);
            inventory.recompute_is_complete(dataset, site);
            inventory.recompute_replica_group(dataset, site);
        }
        inventory.recompute_on_tape(dataset);
    }
    Ok(())
}
