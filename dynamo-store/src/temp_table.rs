//! Temporary id tables used to apply a name filter to a `load_data` call
//! (section 4.1, step 4). Temporary tables are connection-scoped in MySQL,
//! which is why the whole load must reuse a single connection.

use dynamo_errors::{DynamoError, DynamoResult};
use mysql_async::prelude::*;
use mysql_async::Conn;

static NEXT_TABLE_ID: std::sync::atomic::AtomicU32 = std::sync::atomic::AtomicU32::new(0);

/// Creates `tmp_constraint_<entity>_<n>(name VARCHAR(512))`, populated with
/// `names`, and returns its name — or `None` if `names` is `None` (no
/// restriction, so callers should query the live table unjoined).
pub async fn setup_constraint_table(
    conn: &mut Conn,
    entity: &str,
    _column: &str,
    names: Option<&[String]>,
) -> DynamoResult<Option<String>> {
    let Some(names) = names else {
        return Ok(None);
    };

    let n = NEXT_TABLE_ID.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    let table = format!("tmp_constraint_{entity}_{n}");

    conn.query_drop(format!(
        "CREATE TEMPORARY TABLE `{table}` (name VARCHAR(512) NOT NULL, PRIMARY KEY (name))"
    ))
    .await
    .map_err(|e| DynamoError::store(format!("create constraint table {table}"), e))?;

    if !names.is_empty() {
        let insert = format!("INSERT INTO `{table}` (name) VALUES (:name)");
        let params: Vec<_> = names.iter().map(|n| mysql_async::params! { "name" => n }).collect();
        conn.exec_batch(insert, params)
            .await
            .map_err(|e| DynamoError::store(format!("populate constraint table {table}"), e))?;
    }

    Ok(Some(table))
}

/// Drops every temporary constraint table created during a load. Called
/// once at the end of `load_data`, even on the error path.
pub async fn drop_constraint_tables(conn: &mut Conn, tables: &[String]) -> DynamoResult<()> {
    for table in tables {
        conn.query_drop(format!("DROP TEMPORARY TABLE IF EXISTS `{table}`"))
            .await
            .map_err(|e| DynamoError::store(format!("drop constraint table {table}"), e))?;
    }
    Ok(())
}
