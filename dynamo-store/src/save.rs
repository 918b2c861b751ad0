//! The swap-table full save and the incremental per-entity save/delete
//! calls of section 4.1. A full save never touches the live tables until
//! every `_tmp` sibling is populated; an incremental save writes straight
//! to the live table and is used by the synchronizer between full saves.

use dynamo_errors::{DynamoError, DynamoResult};
use dynamo_model::{
    Block, BlockReplica, Dataset, DatasetReplica, File, Group, Id, Inventory, Site, SitePartition,
};
use mysql_async::prelude::*;
use mysql_async::{Conn, TxOpts};
use tracing::info;

use crate::schema::{self, bytes_to_tb};

/// Snapshot the whole inventory into `_tmp` siblings of every table in
/// [`schema::ALL_TABLES`], assigning fresh sequential ids to every entity as
/// it is serialized, then swap all tables in behind a single transaction.
/// On any failure the `_tmp` tables are dropped and the live tables are
/// left untouched (section 4.1's "the live tables are never seen mid-update").
pub async fn save_data(conn: &mut Conn, inventory: &mut Inventory) -> DynamoResult<()> {
    for table in schema::ALL_TABLES {
        create_tmp_sibling(conn, table).await?;
    }

    let result = populate_tmp_tables(conn, inventory).await;
    if let Err(err) = result {
        drop_tmp_tables(conn).await?;
        return Err(err);
    }

    let mut tx = conn.start_transaction(TxOpts::new()).await.map_err(|e| DynamoError::store("begin swap", e))?;
    for table in schema::ALL_TABLES {
        commit_swap(&mut tx, table).await?;
    }
    tx.commit().await.map_err(|e| DynamoError::store("commit swap", e))?;
    info!(tables = schema::ALL_TABLES.len(), "full save committed");
    Ok(())
}

async fn create_tmp_sibling(conn: &mut Conn, table: &str) -> DynamoResult<()> {
    conn.query_drop(format!("DROP TABLE IF EXISTS `{table}_tmp`"))
        .await
        .map_err(|e| DynamoError::store(format!("drop stale {table}_tmp"), e))?;
    conn.query_drop(format!("CREATE TABLE `{table}_tmp` LIKE `{table}`"))
        .await
        .map_err(|e| DynamoError::store(format!("create {table}_tmp"), e))?;
    Ok(())
}

async fn commit_swap(tx: &mut mysql_async::Transaction<'_>, table: &str) -> DynamoResult<()> {
    tx.query_drop(format!(
        "RENAME TABLE `{table}` TO `{table}_old`, `{table}_tmp` TO `{table}`"
    ))
    .await
    .map_err(|e| DynamoError::store(format!("swap {table}"), e))?;
    tx.query_drop(format!("DROP TABLE `{table}_old`"))
        .await
        .map_err(|e| DynamoError::store(format!("drop old {table}"), e))?;
    Ok(())
}

async fn drop_tmp_tables(conn: &mut Conn) -> DynamoResult<()> {
    for table in schema::ALL_TABLES {
        conn.query_drop(format!("DROP TABLE IF EXISTS `{table}_tmp`"))
            .await
            .map_err(|e| DynamoError::store(format!("drop {table}_tmp"), e))?;
    }
    Ok(())
}

async fn populate_tmp_tables(conn: &mut Conn, inventory: &mut Inventory) -> DynamoResult<()> {
    let mut next_group_id = 1u64;
    let group_rows: Vec<(u64, Option<String>, &'static str)> = inventory
        .groups()
        .map(|g| (g.handle, g.olevel))
        .collect::<Vec<_>>()
        .into_iter()
        .map(|(handle, olevel)| {
            let id = next_group_id;
            next_group_id += 1;
            let name = inventory.group(handle).and_then(|g| g.name.clone());
            let olevel_str = match olevel {
                dynamo_model::OwnershipLevel::Dataset => "dataset",
                dynamo_model::OwnershipLevel::Block => "block",
            };
            if let Some(g) = inventory.group_mut(handle) {
                g.id = Id(id);
            }
            (id, name, olevel_str)
        })
        .collect();
    conn.exec_batch(
        format!("INSERT INTO `{}_tmp` (id, name, olevel) VALUES (:id, :name, :olevel)", schema::GROUPS),
        group_rows.iter().map(|(id, name, olevel)| {
            mysql_async::params! { "id" => id, "name" => name.clone().unwrap_or_default(), "olevel" => *olevel }
        }),
    )
    .await
    .map_err(|e| DynamoError::store("populate groups_tmp", e))?;

    let site_handles: Vec<_> = inventory.sites().map(|s| s.handle).collect();
    let mut next_site_id = 1u64;
    let mut site_rows = Vec::new();
    let mut partition_rows: Vec<(u64, String)> = Vec::new();
    let mut next_partition_id = 1u64;
    for partition in inventory.partitions().map(|p| p.handle).collect::<Vec<_>>() {
        let id = next_partition_id;
        next_partition_id += 1;
        let name = inventory.partition(partition).map(|p| p.name.clone()).unwrap_or_default();
        partition_rows.push((id, name));
    }
    conn.exec_batch(
        format!("INSERT INTO `{}_tmp` (id, name) VALUES (:id, :name)", schema::PARTITIONS),
        partition_rows.iter().map(|(id, name)| mysql_async::params! { "id" => id, "name" => name }),
    )
    .await
    .map_err(|e| DynamoError::store("populate partitions_tmp", e))?;
    let partition_id_of = |inventory: &Inventory, h: dynamo_model::PartitionHandle| -> Option<u64> {
        inventory.partitions().position(|p| p.handle == h).map(|i| partition_rows[i].0)
    };

    let mut quota_rows: Vec<(u64, u64, f64)> = Vec::new();
    for handle in &site_handles {
        let id = next_site_id;
        next_site_id += 1;
        let site = inventory.site(*handle).expect("just listed");
        site_rows.push((id, site.name.clone(), site.host.clone(), site.storage_type, site.backend.clone(), site.status));
        for (partition_handle, sp) in &site.partitions {
            if let Some(pid) = partition_id_of(inventory, *partition_handle) {
                quota_rows.push((id, pid, bytes_to_tb(sp.quota_bytes)));
            }
        }
        if let Some(s) = inventory.site_mut(*handle) {
            s.id = Id(id);
        }
    }
    conn.exec_batch(
        format!(
            "INSERT INTO `{}_tmp` (id, name, host, storage_type, backend, status) VALUES (:id, :name, :host, :storage_type, :backend, :status)",
            schema::SITES
        ),
        site_rows.iter().map(|(id, name, host, storage_type, backend, status)| {
            mysql_async::params! {
                "id" => id, "name" => name, "host" => host,
                "storage_type" => storage_type_str(*storage_type),
                "backend" => backend,
                "status" => site_status_str(*status),
            }
        }),
    )
    .await
    .map_err(|e| DynamoError::store("populate sites_tmp", e))?;
    conn.exec_batch(
        format!("INSERT INTO `{}_tmp` (site_id, partition_id, quota_tb) VALUES (:site_id, :partition_id, :quota_tb)", schema::QUOTAS),
        quota_rows.iter().map(|(site_id, partition_id, quota_tb)| {
            mysql_async::params! { "site_id" => site_id, "partition_id" => partition_id, "quota_tb" => quota_tb }
        }),
    )
    .await
    .map_err(|e| DynamoError::store("populate quotas_tmp", e))?;

    let dataset_handles: Vec<_> = inventory.datasets().map(|d| d.handle).collect();
    let mut next_dataset_id = 1u64;
    let mut dataset_rows = Vec::new();
    let mut version_rows: Vec<(u64, u32, u32, u32, Option<String>)> = Vec::new();
    for handle in &dataset_handles {
        let id = next_dataset_id;
        next_dataset_id += 1;
        let d = inventory.dataset(*handle).expect("just listed");
        dataset_rows.push((id, d.name.clone(), d.size, d.num_files, d.status, d.data_type, d.last_update, d.is_open));
        if let Some(v) = &d.software_version {
            version_rows.push((id, v.cycle, v.major, v.minor, v.suffix.clone()));
        }
        if let Some(d) = inventory.dataset_mut(*handle) {
            d.id = Id(id);
        }
    }
    conn.exec_batch(
        format!(
            "INSERT INTO `{}_tmp` (id, name, size, num_files, status, data_type, last_update, is_open) \
             VALUES (:id, :name, :size, :num_files, :status, :data_type, :last_update, :is_open)",
            schema::DATASETS
        ),
        dataset_rows.iter().map(|(id, name, size, num_files, status, data_type, last_update, is_open)| {
            mysql_async::params! {
                "id" => id, "name" => name, "size" => size, "num_files" => num_files,
                "status" => dataset_status_str(*status),
                "data_type" => data_type_str(*data_type),
                "last_update" => last_update, "is_open" => is_open,
            }
        }),
    )
    .await
    .map_err(|e| DynamoError::store("populate datasets_tmp", e))?;
    conn.exec_batch(
        format!(
            "INSERT INTO `{}_tmp` (dataset_id, cycle, major, minor, suffix) VALUES (:dataset_id, :cycle, :major, :minor, :suffix)",
            schema::SOFTWARE_VERSIONS
        ),
        version_rows.iter().map(|(dataset_id, cycle, major, minor, suffix)| {
            mysql_async::params! { "dataset_id" => dataset_id, "cycle" => cycle, "major" => major, "minor" => minor, "suffix" => suffix.clone() }
        }),
    )
    .await
    .map_err(|e| DynamoError::store("populate software_versions_tmp", e))?;

    let dataset_id_of = |inventory: &Inventory, h: dynamo_model::DatasetHandle| inventory.dataset(h).map(|d| d.id.0).unwrap_or(0);
    let site_id_of = |inventory: &Inventory, h: dynamo_model::SiteHandle| inventory.site(h).map(|s| s.id.0).unwrap_or(0);

    let mut next_block_id = 1u64;
    let mut block_rows = Vec::new();
    let mut file_rows: Vec<(u64, String, u64)> = Vec::new();
    let mut next_file_id = 1u64;
    for dataset in &dataset_handles {
        let blocks: Vec<_> = inventory.dataset(*dataset).expect("just listed").blocks().collect();
        for block in blocks {
            let id = next_block_id;
            next_block_id += 1;
            let b = inventory.block(block).expect("just listed").clone();
            block_rows.push((id, dataset_id_of(inventory, *dataset), b.name.as_str().to_string(), b.size, b.num_files, b.is_open, b.last_update));
            for file in inventory.files_of_mut(block) {
                let file_id = next_file_id;
                next_file_id += 1;
                file.id = Id(file_id);
                file_rows.push((id, file.lfn.clone(), file.size));
            }
            if let Some(b) = inventory.block_mut(block) {
                b.id = Id(id);
            }
        }
    }
    conn.exec_batch(
        format!(
            "INSERT INTO `{}_tmp` (id, dataset_id, name, size, num_files, is_open, last_update) \
             VALUES (:id, :dataset_id, :name, :size, :num_files, :is_open, :last_update)",
            schema::BLOCKS
        ),
        block_rows.iter().map(|(id, dataset_id, name, size, num_files, is_open, last_update)| {
            mysql_async::params! {
                "id" => id, "dataset_id" => dataset_id, "name" => name, "size" => size,
                "num_files" => num_files, "is_open" => is_open, "last_update" => last_update,
            }
        }),
    )
    .await
    .map_err(|e| DynamoError::store("populate blocks_tmp", e))?;
    conn.exec_batch(
        format!("INSERT INTO `{}_tmp` (block_id, lfn, size) VALUES (:block_id, :lfn, :size)", schema::FILES),
        file_rows.iter().map(|(block_id, lfn, size)| mysql_async::params! { "block_id" => block_id, "lfn" => lfn, "size" => size }),
    )
    .await
    .map_err(|e| DynamoError::store("populate files_tmp", e))?;

    let mut dataset_replica_rows: Vec<(u64, u64, bool, bool, bool, Option<u64>, i64)> = Vec::new();
    let mut block_replica_rows: Vec<(u64, u64, Option<u64>, bool, bool, i64)> = Vec::new();
    let mut block_replica_size_rows: Vec<(u64, u64, u64)> = Vec::new();
    for dr in inventory.dataset_replicas() {
        let dataset_id = dataset_id_of(inventory, dr.dataset);
        let site_id = site_id_of(inventory, dr.site);
        let group_id = dr.group.and_then(|g| inventory.group(g)).map(|g| g.id.0);
        dataset_replica_rows.push((dataset_id, site_id, dr.is_complete, dr.is_partial, dr.is_custodial, group_id, dr.last_block_created));
    }
    for br in inventory.block_replicas() {
        let block_id = inventory.block(br.block).map(|b| b.id.0).unwrap_or(0);
        let site_id = site_id_of(inventory, br.site);
        let group_id = br.group.and_then(|g| inventory.group(g)).map(|g| g.id.0);
        block_replica_rows.push((site_id, block_id, group_id, br.is_complete, br.is_custodial, br.last_update));
        let block_size = inventory.block(br.block).map(|b| b.size).unwrap_or(0);
        if br.size != block_size {
            block_replica_size_rows.push((block_id, site_id, br.size));
        }
    }
    conn.exec_batch(
        format!(
            "INSERT INTO `{}_tmp` (dataset_id, site_id, is_complete, is_partial, is_custodial, group_id, last_block_created) \
             VALUES (:dataset_id, :site_id, :is_complete, :is_partial, :is_custodial, :group_id, :last_block_created)",
            schema::DATASET_REPLICAS
        ),
        dataset_replica_rows.iter().map(|(dataset_id, site_id, is_complete, is_partial, is_custodial, group_id, last_block_created)| {
            mysql_async::params! {
                "dataset_id" => dataset_id, "site_id" => site_id, "is_complete" => is_complete,
                "is_partial" => is_partial, "is_custodial" => is_custodial, "group_id" => group_id,
                "last_block_created" => last_block_created,
            }
        }),
    )
    .await
    .map_err(|e| DynamoError::store("populate dataset_replicas_tmp", e))?;
    conn.exec_batch(
        format!(
            "INSERT INTO `{}_tmp` (site_id, block_id, group_id, is_complete, is_custodial, last_update) \
             VALUES (:site_id, :block_id, :group_id, :is_complete, :is_custodial, :last_update)",
            schema::BLOCK_REPLICAS
        ),
        block_replica_rows.iter().map(|(site_id, block_id, group_id, is_complete, is_custodial, last_update)| {
            mysql_async::params! {
                "site_id" => site_id, "block_id" => block_id, "group_id" => group_id,
                "is_complete" => is_complete, "is_custodial" => is_custodial, "last_update" => last_update,
            }
        }),
    )
    .await
    .map_err(|e| DynamoError::store("populate block_replicas_tmp", e))?;
    conn.exec_batch(
        format!("INSERT INTO `{}_tmp` (block_id, site_id, size) VALUES (:block_id, :site_id, :size)", schema::BLOCK_REPLICA_SIZES),
        block_replica_size_rows.iter().map(|(block_id, site_id, size)| {
            mysql_async::params! { "block_id" => block_id, "site_id" => site_id, "size" => size }
        }),
    )
    .await
    .map_err(|e| DynamoError::store("populate block_replica_sizes_tmp", e))?;

    Ok(())
}

fn storage_type_str(t: dynamo_model::StorageType) -> &'static str {
    match t {
        dynamo_model::StorageType::Disk => "disk",
        dynamo_model::StorageType::Mss => "mss",
        dynamo_model::StorageType::Buffer => "buffer",
        dynamo_model::StorageType::Unknown => "unknown",
    }
}

fn site_status_str(s: dynamo_model::SiteStatus) -> &'static str {
    match s {
        dynamo_model::SiteStatus::Ready => "READY",
        dynamo_model::SiteStatus::Waitroom => "WAITROOM",
        dynamo_model::SiteStatus::Morgue => "MORGUE",
        dynamo_model::SiteStatus::Unknown => "UNKNOWN",
    }
}

fn dataset_status_str(s: dynamo_model::DatasetStatus) -> &'static str {
    match s {
        dynamo_model::DatasetStatus::Valid => "VALID",
        dynamo_model::DatasetStatus::Production => "PRODUCTION",
        dynamo_model::DatasetStatus::Unknown => "UNKNOWN",
        dynamo_model::DatasetStatus::Invalid => "INVALID",
        dynamo_model::DatasetStatus::Deprecated => "DEPRECATED",
        dynamo_model::DatasetStatus::Ignored => "IGNORED",
    }
}

fn data_type_str(t: dynamo_model::DataType) -> &'static str {
    match t {
        dynamo_model::DataType::Unknown => "unknown",
        dynamo_model::DataType::Data => "data",
        dynamo_model::DataType::Mc => "mc",
        dynamo_model::DataType::Test => "test",
    }
}

/// Insert or update one group's row. No-ops silently if `group.id` is
/// `Id::UNSAVED` and the caller hasn't assigned one yet — callers should
/// assign via [`crate::id_cache::IdCache`] or a prior full save before
/// calling this (section 4.1's incremental-save id policy).
pub async fn save_group(conn: &mut Conn, group: &Group) -> DynamoResult<()> {
    if !group.id.is_saved() {
        return Ok(());
    }
    let olevel = match group.olevel {
        dynamo_model::OwnershipLevel::Dataset => "dataset",
        dynamo_model::OwnershipLevel::Block => "block",
    };
    conn.exec_drop(
        format!(
            "INSERT INTO `{}` (id, name, olevel) VALUES (:id, :name, :olevel) \
             ON DUPLICATE KEY UPDATE name = VALUES(name), olevel = VALUES(olevel)",
            schema::GROUPS
        ),
        mysql_async::params! { "id" => group.id.0, "name" => group.name.clone().unwrap_or_default(), "olevel" => olevel },
    )
    .await
    .map_err(|e| DynamoError::store("save_group", e))
}

pub async fn delete_group(conn: &mut Conn, id: Id) -> DynamoResult<()> {
    if !id.is_saved() {
        return Ok(());
    }
    conn.exec_drop(format!("DELETE FROM `{}` WHERE id = :id", schema::GROUPS), mysql_async::params! { "id" => id.0 })
        .await
        .map_err(|e| DynamoError::store("delete_group", e))
}

pub async fn save_site(conn: &mut Conn, site: &Site) -> DynamoResult<()> {
    if !site.id.is_saved() {
        return Ok(());
    }
    conn.exec_drop(
        format!(
            "INSERT INTO `{}` (id, name, host, storage_type, backend, status) \
             VALUES (:id, :name, :host, :storage_type, :backend, :status) \
             ON DUPLICATE KEY UPDATE host = VALUES(host), storage_type = VALUES(storage_type), \
                                     backend = VALUES(backend), status = VALUES(status)",
            schema::SITES
        ),
        mysql_async::params! {
            "id" => site.id.0, "name" => site.name.clone(), "host" => site.host.clone(),
            "storage_type" => storage_type_str(site.storage_type), "backend" => site.backend.clone(),
            "status" => site_status_str(site.status),
        },
    )
    .await
    .map_err(|e| DynamoError::store("save_site", e))
}

pub async fn delete_site(conn: &mut Conn, id: Id) -> DynamoResult<()> {
    if !id.is_saved() {
        return Ok(());
    }
    conn.exec_drop(format!("DELETE FROM `{}` WHERE id = :id", schema::SITES), mysql_async::params! { "id" => id.0 })
        .await
        .map_err(|e| DynamoError::store("delete_site", e))
}

pub async fn save_site_partition(conn: &mut Conn, site_id: Id, partition_id: u64, partition: &SitePartition) -> DynamoResult<()> {
    if !site_id.is_saved() {
        return Ok(());
    }
    conn.exec_drop(
        format!(
            "INSERT INTO `{}` (site_id, partition_id, quota_tb) VALUES (:site_id, :partition_id, :quota_tb) \
             ON DUPLICATE KEY UPDATE quota_tb = VALUES(quota_tb)",
            schema::QUOTAS
        ),
        mysql_async::params! { "site_id" => site_id.0, "partition_id" => partition_id, "quota_tb" => bytes_to_tb(partition.quota_bytes) },
    )
    .await
    .map_err(|e| DynamoError::store("save_site_partition", e))
}

pub async fn save_dataset(conn: &mut Conn, dataset: &Dataset) -> DynamoResult<()> {
    if !dataset.id.is_saved() {
        return Ok(());
    }
    conn.exec_drop(
        format!(
            "INSERT INTO `{}` (id, name, size, num_files, status, data_type, last_update, is_open) \
             VALUES (:id, :name, :size, :num_files, :status, :data_type, :last_update, :is_open) \
             ON DUPLICATE KEY UPDATE size = VALUES(size), num_files = VALUES(num_files), \
                                     status = VALUES(status), data_type = VALUES(data_type), \
                                     last_update = VALUES(last_update), is_open = VALUES(is_open)",
            schema::DATASETS
        ),
        mysql_async::params! {
            "id" => dataset.id.0, "name" => dataset.name.clone(), "size" => dataset.size,
            "num_files" => dataset.num_files, "status" => dataset_status_str(dataset.status),
            "data_type" => data_type_str(dataset.data_type), "last_update" => dataset.last_update,
            "is_open" => dataset.is_open,
        },
    )
    .await
    .map_err(|e| DynamoError::store("save_dataset", e))?;

    if let Some(v) = &dataset.software_version {
        conn.exec_drop(
            format!(
                "INSERT INTO `{}` (dataset_id, cycle, major, minor, suffix) VALUES (:dataset_id, :cycle, :major, :minor, :suffix) \
                 ON DUPLICATE KEY UPDATE cycle = VALUES(cycle), major = VALUES(major), minor = VALUES(minor), suffix = VALUES(suffix)",
                schema::SOFTWARE_VERSIONS
            ),
            mysql_async::params! {
                "dataset_id" => dataset.id.0, "cycle" => v.cycle, "major" => v.major, "minor" => v.minor, "suffix" => v.suffix.clone(),
            },
        )
        .await
        .map_err(|e| DynamoError::store("save_dataset software_version", e))?;
    }
    Ok(())
}

pub async fn delete_dataset(conn: &mut Conn, id: Id) -> DynamoResult<()> {
    if !id.is_saved() {
        return Ok(());
    }
    conn.exec_drop(format!("DELETE FROM `{}` WHERE id = :id", schema::DATASETS), mysql_async::params! { "id" => id.0 })
        .await
        .map_err(|e| DynamoError::store("delete_dataset", e))
}

pub async fn save_block(conn: &mut Conn, block: &Block, dataset_id: Id) -> DynamoResult<()> {
    if !block.id.is_saved() || !dataset_id.is_saved() {
        return Ok(());
    }
    conn.exec_drop(
        format!(
            "INSERT INTO `{}` (id, dataset_id, name, size, num_files, is_open, last_update) \
             VALUES (:id, :dataset_id, :name, :size, :num_files, :is_open, :last_update) \
             ON DUPLICATE KEY UPDATE size = VALUES(size), num_files = VALUES(num_files), \
                                     is_open = VALUES(is_open), last_update = VALUES(last_update)",
            schema::BLOCKS
        ),
        mysql_async::params! {
            "id" => block.id.0, "dataset_id" => dataset_id.0, "name" => block.name.as_str(),
            "size" => block.size, "num_files" => block.num_files, "is_open" => block.is_open,
            "last_update" => block.last_update,
        },
    )
    .await
    .map_err(|e| DynamoError::store("save_block", e))
}

pub async fn delete_block(conn: &mut Conn, id: Id) -> DynamoResult<()> {
    if !id.is_saved() {
        return Ok(());
    }
    conn.exec_drop(format!("DELETE FROM `{}` WHERE id = :id", schema::BLOCKS), mysql_async::params! { "id" => id.0 })
        .await
        .map_err(|e| DynamoError::store("delete_block", e))
}

pub async fn save_file(conn: &mut Conn, file: &File, block_id: Id) -> DynamoResult<()> {
    if !block_id.is_saved() {
        return Ok(());
    }
    if file.id.is_saved() {
        conn.exec_drop(
            format!("UPDATE `{}` SET lfn = :lfn, size = :size WHERE id = :id", schema::FILES),
            mysql_async::params! { "id" => file.id.0, "lfn" => file.lfn.clone(), "size" => file.size },
        )
        .await
        .map_err(|e| DynamoError::store("save_file", e))
    } else {
        conn.exec_drop(
            format!("INSERT INTO `{}` (block_id, lfn, size) VALUES (:block_id, :lfn, :size)", schema::FILES),
            mysql_async::params! { "block_id" => block_id.0, "lfn" => file.lfn.clone(), "size" => file.size },
        )
        .await
        .map_err(|e| DynamoError::store("save_file", e))
    }
}

pub async fn delete_file(conn: &mut Conn, id: Id) -> DynamoResult<()> {
    if !id.is_saved() {
        return Ok(());
    }
    conn.exec_drop(format!("DELETE FROM `{}` WHERE id = :id", schema::FILES), mysql_async::params! { "id" => id.0 })
        .await
        .map_err(|e| DynamoError::store("delete_file", e))
}

pub async fn save_dataset_replica(conn: &mut Conn, replica: &DatasetReplica, dataset_id: Id, site_id: Id, group_id: Option<Id>) -> DynamoResult<()> {
    if !dataset_id.is_saved() || !site_id.is_saved() {
        return Ok(());
    }
    conn.exec_drop(
        format!(
            "INSERT INTO `{}` (dataset_id, site_id, is_complete, is_partial, is_custodial, group_id, last_block_created) \
             VALUES (:dataset_id, :site_id, :is_complete, :is_partial, :is_custodial, :group_id, :last_block_created) \
             ON DUPLICATE KEY UPDATE is_complete = VALUES(is_complete), is_partial = VALUES(is_partial), \
                                     is_custodial = VALUES(is_custodial), group_id = VALUES(group_id), \
                                     last_block_created = VALUES(last_block_created)",
            schema::DATASET_REPLICAS
        ),
        mysql_async::params! {
            "dataset_id" => dataset_id.0, "site_id" => site_id.0, "is_complete" => replica.is_complete,
            "is_partial" => replica.is_partial, "is_custodial" => replica.is_custodial,
            "group_id" => group_id.map(|g| g.0), "last_block_created" => replica.last_block_created,
        },
    )
    .await
    .map_err(|e| DynamoError::store("save_dataset_replica", e))
}

pub async fn delete_dataset_replica(conn: &mut Conn, dataset_id: Id, site_id: Id) -> DynamoResult<()> {
    if !dataset_id.is_saved() || !site_id.is_saved() {
        return Ok(());
    }
    conn.exec_drop(
        format!("DELETE FROM `{}` WHERE dataset_id = :dataset_id AND site_id = :site_id", schema::DATASET_REPLICAS),
        mysql_async::params! { "dataset_id" => dataset_id.0, "site_id" => site_id.0 },
    )
    .await
    .map_err(|e| DynamoError::store("delete_dataset_replica", e))
}

pub async fn save_block_replica(conn: &mut Conn, replica: &BlockReplica, block_id: Id, site_id: Id, group_id: Option<Id>, block_size: u64) -> DynamoResult<()> {
    if !block_id.is_saved() || !site_id.is_saved() {
        return Ok(());
    }
    conn.exec_drop(
        format!(
            "INSERT INTO `{}` (site_id, block_id, group_id, is_complete, is_custodial, last_update) \
             VALUES (:site_id, :block_id, :group_id, :is_complete, :is_custodial, :last_update) \
             ON DUPLICATE KEY UPDATE group_id = VALUES(group_id), is_complete = VALUES(is_complete), \
                                     is_custodial = VALUES(is_custodial), last_update = VALUES(last_update)",
            schema::BLOCK_REPLICAS
        ),
        mysql_async::params! {
            "site_id" => site_id.0, "block_id" => block_id.0, "group_id" => group_id.map(|g| g.0),
            "is_complete" => replica.is_complete, "is_custodial" => replica.is_custodial, "last_update" => replica.last_update,
        },
    )
    .await
    .map_err(|e| DynamoError::store("save_block_replica", e))?;

    if replica.size != block_size {
        conn.exec_drop(
            format!(
                "INSERT INTO `{}` (block_id, site_id, size) VALUES (:block_id, :site_id, :size) \
                 ON DUPLICATE KEY UPDATE size = VALUES(size)",
                schema::BLOCK_REPLICA_SIZES
            ),
            mysql_async::params! { "block_id" => block_id.0, "site_id" => site_id.0, "size" => replica.size },
        )
        .await
        .map_err(|e| DynamoError::store("save_block_replica size override", e))?;
    } else {
        conn.exec_drop(
            format!("DELETE FROM `{}` WHERE block_id = :block_id AND site_id = :site_id", schema::BLOCK_REPLICA_SIZES),
            mysql_async::params! { "block_id" => block_id.0, "site_id" => site_id.0 },
        )
        .await
        .map_err(|e| DynamoError::store("save_block_replica size override cleanup", e))?;
    }
    Ok(())
}

pub async fn delete_block_replica(conn: &mut Conn, block_id: Id, site_id: Id) -> DynamoResult<()> {
    if !block_id.is_saved() || !site_id.is_saved() {
        return Ok(());
    }
    conn.exec_drop(
        format!("DELETE FROM `{}` WHERE block_id = :block_id AND site_id = :site_id", schema::BLOCK_REPLICAS),
        mysql_async::params! { "block_id" => block_id.0, "site_id" => site_id.0 },
    )
    .await
    .map_err(|e| DynamoError::store("delete_block_replica", e))
}
