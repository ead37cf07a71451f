//! Tabular catalog loader.
//!
//! Delimited text (`.csv`, `.tsv`) goes through `csv`; spreadsheets (`.xlsx`,
//! `.xlsm`, `.xlsb`, `.xls`, `.ods`) through `calamine`, reading the first
//! sheet. Both share the same header check and row rules. Header names are
//! matched case-insensitively after trimming; spaces and underscores are
//! interchangeable (`Product Name` == `product_name`).

use calamine::{open_workbook_auto, Data, Reader};
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::types::Product;

const COL_ID: &str = "id";
const COL_NAME: &str = "product name";
const COL_CATEGORY_1: &str = "category 1";
const COL_ARTICLE: &str = "article";
const COL_DESCRIPTION: &str = "description";
const COL_CATEGORY_2: &str = "category 2";
const COL_CATEGORY_3: &str = "category 3";
const COL_PHOTO_URL: &str = "photo url";
const COL_PAGE_URL: &str = "page url";

pub const REQUIRED_COLUMNS: [&str; 4] = [COL_ID, COL_NAME, COL_CATEGORY_1, COL_ARTICLE];

const SPREADSHEET_EXTENSIONS: [&str; 5] = ["xlsx", "xlsm", "xlsb", "xls", "ods"];

#[derive(Debug, Clone, Default)]
pub struct CatalogLoader {
    /// Field delimiter for text files; `None` picks tab for `.tsv` files and
    /// comma otherwise.
    delimiter: Option<u8>,
}

impl CatalogLoader {
    pub fn new() -> Self { Self::default() }

    pub fn with_delimiter(delimiter: u8) -> Self { Self { delimiter: Some(delimiter) } }

    pub fn load(&self, path: &Path) -> Result<Vec<Product>> {
        let ext = path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase);
        let products = match ext.as_deref() {
            Some(e) if SPREADSHEET_EXTENSIONS.contains(&e) => Self::parse_workbook(path)?,
            other => {
                let delimiter = self.delimiter.unwrap_or(match other {
                    Some("tsv") | Some("tab") => b'\t',
                    _ => b',',
                });
                Self::parse(File::open(path)?, delimiter)?
            }
        };
        info!(path = %path.display(), products = products.len(), "catalog file loaded");
        Ok(products)
    }

    pub fn load_from_reader<R: Read>(&self, reader: R) -> Result<Vec<Product>> {
        Self::parse(reader, self.delimiter.unwrap_or(b','))
    }

    fn parse<R: Read>(reader: R, delimiter: u8) -> Result<Vec<Product>> {
        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let columns = ColumnMap::from_headers(rdr.headers()?.iter())?;
        // Header is line 1.
        let rows = rdr
            .records()
            .enumerate()
            .map(|(idx, record)| (idx + 2, record.map_err(|e| Error::RowParsing { row: idx + 2, reason: e.to_string() })));
        collect_products(&columns, rows)
    }

    fn parse_workbook(path: &Path) -> Result<Vec<Product>> {
        let mut workbook = open_workbook_auto(path)?;
        let range = workbook
            .worksheet_range_at(0)
            .ok_or_else(|| Error::Operation(format!("workbook has no sheets: {}", path.display())))??;

        let mut rows = range.rows().map(|cells| cells.iter().map(cell_text).collect::<Vec<_>>());
        let header = rows.next().unwrap_or_default();
        let columns = ColumnMap::from_headers(header.iter().map(String::as_str))?;
        collect_products(&columns, rows.enumerate().map(|(idx, cells)| (idx + 2, Ok(cells))))
    }
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        // Whole numbers (ids, article codes) without a trailing ".0".
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        other => other.to_string(),
    }
}

/// Row access shared by text records and spreadsheet rows.
trait Cells {
    fn cell(&self, i: usize) -> Option<&str>;
}

impl Cells for csv::StringRecord {
    fn cell(&self, i: usize) -> Option<&str> { self.get(i) }
}

impl Cells for Vec<String> {
    fn cell(&self, i: usize) -> Option<&str> { self.get(i).map(String::as_str) }
}

fn collect_products<R: Cells>(columns: &ColumnMap, rows: impl Iterator<Item = (usize, Result<R>)>) -> Result<Vec<Product>> {
    let mut products = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut skipped = 0usize;
    for (row, record) in rows {
        match record.and_then(|r| columns.product(&r, row)) {
            Ok(product) => {
                if !seen.insert(product.id.clone()) {
                    warn!(row, id = %product.id, "duplicate product id, keeping first occurrence");
                    skipped += 1;
                    continue;
                }
                products.push(product);
            }
            Err(e) => {
                warn!(error = %e, "skipping catalog row");
                skipped += 1;
            }
        }
    }
    if skipped > 0 { info!(skipped, kept = products.len(), "catalog rows skipped"); }
    if products.is_empty() { return Err(Error::NoProducts); }
    Ok(products)
}

fn normalize_header(h: &str) -> String {
    h.trim().to_lowercase().replace('_', " ").split_whitespace().collect::<Vec<_>>().join(" ")
}

struct ColumnMap {
    index: HashMap<&'static str, usize>,
}

impl ColumnMap {
    fn from_headers<'a>(headers: impl Iterator<Item = &'a str>) -> Result<Self> {
        let by_name: HashMap<String, usize> = headers
            .enumerate()
            .map(|(i, h)| (normalize_header(h.trim_start_matches('\u{feff}')), i))
            .collect();

        let missing: Vec<String> =
            REQUIRED_COLUMNS.iter().filter(|c| !by_name.contains_key(**c)).map(|c| c.to_string()).collect();
        if !missing.is_empty() {
            return Err(Error::MissingColumns(missing));
        }

        let mut index = HashMap::new();
        for col in REQUIRED_COLUMNS.iter().chain(
            [COL_DESCRIPTION, COL_CATEGORY_2, COL_CATEGORY_3, COL_PHOTO_URL, COL_PAGE_URL].iter(),
        ) {
            if let Some(&i) = by_name.get(*col) { index.insert(*col, i); }
        }
        Ok(Self { index })
    }

    fn value(&self, record: &impl Cells, col: &str) -> Option<String> {
        self.index
            .get(col)
            .and_then(|&i| record.cell(i))
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }

    fn required(&self, record: &impl Cells, col: &str, row: usize) -> Result<String> {
        self.value(record, col)
            .ok_or_else(|| Error::RowParsing { row, reason: format!("missing required value '{col}'") })
    }

    fn product(&self, record: &impl Cells, row: usize) -> Result<Product> {
        let product = Product::new(
            self.required(record, COL_ID, row)?,
            self.required(record, COL_NAME, row)?,
            self.required(record, COL_CATEGORY_1, row)?,
            self.required(record, COL_ARTICLE, row)?,
        )
        .map_err(|e| Error::RowParsing { row, reason: e.to_string() })?;
        let product = match self.value(record, COL_DESCRIPTION) {
            Some(d) => product.with_description(d),
            None => product,
        };
        Ok(product
            .with_subcategories(self.value(record, COL_CATEGORY_2), self.value(record, COL_CATEGORY_3))
            .with_urls(self.value(record, COL_PHOTO_URL), self.value(record, COL_PAGE_URL)))
    }
}
