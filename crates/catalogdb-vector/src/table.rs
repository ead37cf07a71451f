//! LanceDB connection and housekeeping helpers.
//!
//! Provides database open functions, an ensure-table helper, and a simple
//! key/value metadata table (used for catalog version records).

use arrow_array::{RecordBatch, RecordBatchIterator, StringArray, TimestampMillisecondArray};
use chrono::Utc;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{connect, Connection};
use std::sync::Arc;

use catalogdb_core::error::{Error, Result};

use crate::schema::{build_meta_schema, sql_literal};

pub async fn open_db(uri: &str) -> Result<Connection> {
    connect(uri).execute().await.map_err(Error::store)
}

pub async fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    let names = conn.table_names().execute().await.map_err(Error::store)?;
    Ok(names.iter().any(|n| n == name))
}

pub async fn ensure_table(conn: &Connection, name: &str, schema: Arc<arrow_schema::Schema>) -> Result<()> {
    if table_exists(conn, name).await? {
        return Ok(());
    }
    // create empty table with 0 rows
    let iter = RecordBatchIterator::new(vec![].into_iter(), schema.clone());
    conn.create_table(name, Box::new(iter)).execute().await.map_err(Error::store)?;
    Ok(())
}

pub async fn ensure_meta_table(conn: &Connection, name: &str) -> Result<()> {
    ensure_table(conn, name, build_meta_schema()).await
}

pub async fn set_meta(conn: &Connection, table: &str, key: &str, value: &str) -> Result<()> {
    ensure_meta_table(conn, table).await?;
    let t = conn.open_table(table).execute().await.map_err(Error::store)?;
    let rb = RecordBatch::try_new(
        build_meta_schema(),
        vec![
            Arc::new(StringArray::from(vec![key.to_string()])),
            Arc::new(StringArray::from(vec![value.to_string()])),
            Arc::new(TimestampMillisecondArray::from(vec![Utc::now().timestamp_millis()])),
        ],
    )
    .map_err(Error::store)?;
    let reader = Box::new(RecordBatchIterator::new(vec![Ok(rb)].into_iter(), build_meta_schema()));
    // Upsert behavior via merge_insert: key is unique
    let mut mi = t.merge_insert(&["key"]);
    mi.when_matched_update_all(None).when_not_matched_insert_all();
    mi.execute(reader).await.map_err(Error::store)?;
    Ok(())
}

pub async fn get_meta(conn: &Connection, table: &str, key: &str) -> Result<Option<String>> {
    Ok(scan_meta(conn, table, Some(format!("key = {}", sql_literal(key)))).await?.into_iter().next().map(|(_, v)| v))
}

/// All `(key, value)` rows whose key starts with `prefix`.
pub async fn list_meta(conn: &Connection, table: &str, prefix: &str) -> Result<Vec<(String, String)>> {
    let mut rows = scan_meta(conn, table, None).await?;
    rows.retain(|(k, _)| k.starts_with(prefix));
    Ok(rows)
}

pub async fn delete_meta(conn: &Connection, table: &str, key: &str) -> Result<()> {
    if !table_exists(conn, table).await? { return Ok(()); }
    let t = conn.open_table(table).execute().await.map_err(Error::store)?;
    t.delete(&format!("key = {}", sql_literal(key))).await.map_err(Error::store)?;
    Ok(())
}

async fn scan_meta(conn: &Connection, table: &str, filter: Option<String>) -> Result<Vec<(String, String)>> {
    if !table_exists(conn, table).await? { return Ok(Vec::new()); }
    let t = conn.open_table(table).execute().await.map_err(Error::store)?;
    let mut query = t.query();
    if let Some(f) = filter { query = query.only_if(f); }
    let mut stream = query.execute().await.map_err(Error::store)?;
    let mut out = Vec::new();
    while let Some(batch) = stream.try_next().await.map_err(Error::store)? {
        let keys = string_column(&batch, "key")?;
        let values = string_column(&batch, "value")?;
        for i in 0..batch.num_rows() {
            out.push((keys.value(i).to_string(), values.value(i).to_string()));
        }
    }
    Ok(out)
}

pub(crate) fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| Error::Store(format!("column '{name}' missing or not utf8")))
}
