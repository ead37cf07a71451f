use arrow_schema::{DataType, Field, Schema};
use std::sync::Arc;

pub const COL_ID: &str = "id";
pub const COL_ARTICLE_LOWER: &str = "article_lower";
pub const COL_TEXT: &str = "text";
pub const COL_VECTOR: &str = "vector";
pub const CATEGORY_COLUMNS: [&str; 3] = ["category_1", "category_2", "category_3"];

/// Arrow schema of a product collection. `article_lower` backs the exact
/// article filter; `text` is the embedded payload.
pub fn build_product_schema(dim: i32) -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new(COL_ID, DataType::Utf8, false),
        Field::new("product_name", DataType::Utf8, false),
        Field::new("description", DataType::Utf8, true),
        Field::new("category_1", DataType::Utf8, false),
        Field::new("category_2", DataType::Utf8, true),
        Field::new("category_3", DataType::Utf8, true),
        Field::new("article", DataType::Utf8, false),
        Field::new(COL_ARTICLE_LOWER, DataType::Utf8, false),
        Field::new("photo_url", DataType::Utf8, true),
        Field::new("page_url", DataType::Utf8, true),
        Field::new(COL_TEXT, DataType::Utf8, false),
        Field::new(COL_VECTOR, DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), dim), true),
    ]))
}

/// Key/value table used for version records and other small metadata.
pub fn build_meta_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("key", DataType::Utf8, false),
        Field::new("value", DataType::Utf8, false),
        Field::new("updated_at", DataType::Timestamp(arrow_schema::TimeUnit::Millisecond, None), false),
    ]))
}

/// Quote a string literal for a Lance SQL filter.
pub fn sql_literal(s: &str) -> String { format!("'{}'", s.replace('\'', "''")) }
