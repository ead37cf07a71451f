use arrow_array::{Array, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator, StringArray};
use arrow_schema::DataType;
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase, Select};
use lancedb::{Connection, DistanceType, Table};
use std::sync::Arc;
use tracing::debug;

use catalogdb_core::error::{Error, Result};
use catalogdb_core::types::Product;

use super::{IndexedDocument, Neighbour, VectorStore};
use crate::schema::{build_product_schema, sql_literal, CATEGORY_COLUMNS, COL_ARTICLE_LOWER, COL_VECTOR};
use crate::table::{open_db, string_column, table_exists};

const PRODUCT_COLUMNS: [&str; 10] = [
    "id", "product_name", "description", "category_1", "category_2", "category_3",
    "article", "article_lower", "photo_url", "page_url",
];

/// LanceDB-backed store. One Lance table per collection.
pub struct LanceStore { conn: Connection }

impl LanceStore {
    pub async fn open(uri: &str) -> Result<Self> {
        Ok(Self { conn: open_db(uri).await? })
    }

    pub fn connection(&self) -> &Connection { &self.conn }

    async fn table(&self, name: &str) -> Result<Table> {
        self.conn
            .open_table(name)
            .execute()
            .await
            .map_err(|e| Error::Store(format!("open collection '{name}': {e}")))
    }
}

#[async_trait]
impl VectorStore for LanceStore {
    async fn collection_names(&self) -> Result<Vec<String>> {
        self.conn.table_names().execute().await.map_err(Error::store)
    }

    async fn collection_exists(&self, name: &str) -> Result<bool> {
        table_exists(&self.conn, name).await
    }

    async fn create_collection(&self, name: &str, dim: usize) -> Result<()> {
        if self.collection_exists(name).await? { return Ok(()); }
        let schema = build_product_schema(dim as i32);
        let iter = RecordBatchIterator::new(vec![].into_iter(), schema);
        self.conn.create_table(name, Box::new(iter)).execute().await.map_err(Error::store)?;
        debug!(collection = name, dim, "created collection");
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        if !self.collection_exists(name).await? { return Ok(()); }
        self.conn.drop_table(name, &[]).await.map_err(Error::store)?;
        debug!(collection = name, "dropped collection");
        Ok(())
    }

    async fn add(&self, name: &str, docs: &[IndexedDocument]) -> Result<()> {
        if docs.is_empty() { return Ok(()); }
        let table = self.table(name).await?;
        let dim = vector_dim(&table).await?;
        let rb = docs_to_record_batch(docs, dim)?;
        let schema = rb.schema();
        let reader = Box::new(RecordBatchIterator::new(vec![Ok(rb)].into_iter(), schema));
        table.add(reader).execute().await.map_err(Error::store)?;
        Ok(())
    }

    async fn count(&self, name: &str) -> Result<usize> {
        let table = self.table(name).await?;
        table.count_rows(None).await.map_err(Error::store)
    }

    async fn scan_page(&self, name: &str, offset: usize, limit: usize) -> Result<Vec<IndexedDocument>> {
        let table = self.table(name).await?;
        let stream = table.query().offset(offset).limit(limit).execute().await.map_err(Error::store)?;
        let batches: Vec<RecordBatch> = stream.try_collect().await.map_err(Error::store)?;
        let mut out = Vec::new();
        for batch in &batches {
            let products = batch_to_products(batch)?;
            let texts = string_column(batch, "text")?;
            let vectors = vector_column(batch)?;
            for (i, product) in products.into_iter().enumerate() {
                out.push(IndexedDocument { product, text: texts.value(i).to_string(), vector: row_vector(vectors, i)? });
            }
        }
        Ok(out)
    }

    async fn find_by_article(&self, name: &str, article_lower: &str, category: Option<&str>) -> Result<Vec<Product>> {
        let table = self.table(name).await?;
        let mut filter = format!("{COL_ARTICLE_LOWER} = {}", sql_literal(article_lower));
        if let Some(c) = category { filter = format!("{filter} AND {}", category_filter(c)); }
        let stream = table
            .query()
            .only_if(filter)
            .select(Select::columns(&PRODUCT_COLUMNS))
            .execute()
            .await
            .map_err(Error::store)?;
        let batches: Vec<RecordBatch> = stream.try_collect().await.map_err(Error::store)?;
        let mut out = Vec::new();
        for batch in &batches { out.extend(batch_to_products(batch)?); }
        Ok(out)
    }

    async fn query(&self, name: &str, vector: &[f32], k: usize, category: Option<&str>) -> Result<Vec<Neighbour>> {
        if k == 0 { return Ok(Vec::new()); }
        let table = self.table(name).await?;
        let mut q = table
            .vector_search(vector.to_vec())
            .map_err(Error::store)?
            .distance_type(DistanceType::Cosine)
            .limit(k);
        if let Some(c) = category { q = q.only_if(category_filter(c)); }
        let stream = q.execute().await.map_err(Error::store)?;
        let batches: Vec<RecordBatch> = stream.try_collect().await.map_err(Error::store)?;
        let mut out = Vec::new();
        for batch in &batches {
            let distances = batch
                .column_by_name("_distance")
                .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
                .ok_or_else(|| Error::Store("vector search returned no _distance column".into()))?;
            for (i, product) in batch_to_products(batch)?.into_iter().enumerate() {
                out.push(Neighbour { product, distance: distances.value(i) });
            }
        }
        out.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap_or(std::cmp::Ordering::Equal));
        Ok(out)
    }

    async fn dim(&self, name: &str) -> Result<usize> {
        vector_dim(&self.table(name).await?).await
    }
}

fn category_filter(category: &str) -> String {
    let lit = sql_literal(category);
    let parts: Vec<String> = CATEGORY_COLUMNS.iter().map(|c| format!("{c} = {lit}")).collect();
    format!("({})", parts.join(" OR "))
}

async fn vector_dim(table: &Table) -> Result<usize> {
    let schema = table.schema().await.map_err(Error::store)?;
    match schema.field_with_name(COL_VECTOR).map(|f| f.data_type().clone()) {
        Ok(DataType::FixedSizeList(_, dim)) => Ok(dim as usize),
        _ => Err(Error::Store(format!("collection '{}' has no fixed-size vector column", table.name()))),
    }
}

fn docs_to_record_batch(docs: &[IndexedDocument], dim: usize) -> Result<RecordBatch> {
    if let Some(bad) = docs.iter().find(|d| d.vector.len() != dim) {
        return Err(Error::Store(format!("product {} has a {}-dim vector, collection expects {dim}", bad.product.id, bad.vector.len())));
    }
    let schema = build_product_schema(dim as i32);
    let col = |f: fn(&IndexedDocument) -> Option<&str>| -> Arc<dyn Array> {
        Arc::new(StringArray::from(docs.iter().map(f).collect::<Vec<_>>()))
    };
    let article_lower: Vec<String> = docs.iter().map(|d| d.product.article_lower()).collect();
    let vectors = docs.iter().map(|d| Some(d.vector.iter().map(|&x| Some(x)).collect::<Vec<_>>()));
    RecordBatch::try_new(schema, vec![
        col(|d| Some(d.product.id.as_str())),
        col(|d| Some(d.product.product_name.as_str())),
        col(|d| d.product.description.as_deref()),
        col(|d| Some(d.product.category_1.as_str())),
        col(|d| d.product.category_2.as_deref()),
        col(|d| d.product.category_3.as_deref()),
        col(|d| Some(d.product.article.as_str())),
        Arc::new(StringArray::from(article_lower)),
        col(|d| d.product.photo_url.as_deref()),
        col(|d| d.product.page_url.as_deref()),
        col(|d| Some(d.text.as_str())),
        Arc::new(FixedSizeListArray::from_iter_primitive::<arrow_array::types::Float32Type, _, _>(vectors, dim as i32)),
    ])
    .map_err(Error::store)
}

fn batch_to_products(batch: &RecordBatch) -> Result<Vec<Product>> {
    let ids = string_column(batch, "id")?;
    let names = string_column(batch, "product_name")?;
    let descriptions = string_column(batch, "description")?;
    let cat1 = string_column(batch, "category_1")?;
    let cat2 = string_column(batch, "category_2")?;
    let cat3 = string_column(batch, "category_3")?;
    let articles = string_column(batch, "article")?;
    let photos = string_column(batch, "photo_url")?;
    let pages = string_column(batch, "page_url")?;
    let opt = |a: &StringArray, i: usize| if a.is_null(i) { None } else { Some(a.value(i).to_string()) };
    (0..batch.num_rows())
        .map(|i| {
            Product::new(ids.value(i), names.value(i), cat1.value(i), articles.value(i)).map(|p| Product {
                description: opt(descriptions, i),
                category_2: opt(cat2, i),
                category_3: opt(cat3, i),
                photo_url: opt(photos, i),
                page_url: opt(pages, i),
                ..p
            })
        })
        .collect()
}

fn vector_column(batch: &RecordBatch) -> Result<&FixedSizeListArray> {
    batch
        .column_by_name(COL_VECTOR)
        .and_then(|c| c.as_any().downcast_ref::<FixedSizeListArray>())
        .ok_or_else(|| Error::Store("column 'vector' missing or not a fixed-size list".into()))
}

fn row_vector(vectors: &FixedSizeListArray, i: usize) -> Result<Vec<f32>> {
    let row = vectors.value(i);
    let floats = row
        .as_any()
        .downcast_ref::<Float32Array>()
        .ok_or_else(|| Error::Store("vector items are not f32".into()))?;
    Ok(floats.values().to_vec())
}
