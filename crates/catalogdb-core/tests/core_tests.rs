use rust_xlsxwriter::Workbook;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

use catalogdb_core::loader::CatalogLoader;
use catalogdb_core::types::{Product, SearchResult, VersionStatus};
use catalogdb_core::Error;

const HEADER: &str = "ID,Product Name,Description,Category 1,Category 2,Category 3,Article,photo_url,page_url,Supplier";

#[test]
fn load_csv_maps_optional_columns_and_ignores_unknown() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("catalog.csv");
    let body = format!(
        "{HEADER}\n\
         p1,Cordless Drill,18V drill,Tools,Power Tools,Drills,ABC-100,http://img/1.jpg,http://shop/1,Acme\n\
         p2,Hammer,,Tools,,,XYZ-1,,,Acme\n"
    );
    fs::write(&path, body).unwrap();

    let products = CatalogLoader::new().load(&path).expect("load");
    assert_eq!(products.len(), 2);
    let drill = &products[0];
    assert_eq!(drill.article, "ABC-100");
    assert_eq!(drill.description.as_deref(), Some("18V drill"));
    assert_eq!(drill.category_3.as_deref(), Some("Drills"));
    assert_eq!(drill.photo_url.as_deref(), Some("http://img/1.jpg"));
    let hammer = &products[1];
    assert_eq!(hammer.description, None);
    assert_eq!(hammer.category_2, None);
    assert_eq!(hammer.categories().collect::<Vec<_>>(), vec!["Tools"]);
}

#[test]
fn missing_article_column_fails_before_rows_are_parsed() {
    // Rows are malformed on purpose: header validation must fire first.
    let data = "id,product name,category 1\n,,\nthis,row,is,broken,too\n";
    let err = CatalogLoader::new().load_from_reader(data.as_bytes()).unwrap_err();
    match err {
        Error::MissingColumns(cols) => assert_eq!(cols, vec!["article".to_string()]),
        other => panic!("expected MissingColumns, got {other:?}"),
    }
}

#[test]
fn all_missing_columns_are_reported_together() {
    let err = CatalogLoader::new().load_from_reader("name,price\nx,1\n".as_bytes()).unwrap_err();
    match err {
        Error::MissingColumns(cols) => {
            assert_eq!(cols, vec!["id", "product name", "category 1", "article"]);
        }
        other => panic!("expected MissingColumns, got {other:?}"),
    }
}

#[test]
fn headers_match_case_insensitively() {
    let data = "ARTICLE,PRODUCT_NAME,Category_1,Id\nA1,Widget,Parts,w1\n";
    let products = CatalogLoader::new().load_from_reader(data.as_bytes()).expect("load");
    assert_eq!(products.len(), 1);
    assert_eq!(products[0].id, "w1");
    assert_eq!(products[0].product_name, "Widget");
}

#[test]
fn rows_with_empty_required_fields_are_skipped() {
    // N = 5 rows, M = 2 with an empty required field.
    let data = "id,product name,category 1,article\n\
                1,A,Cat,A-1\n\
                2,,Cat,A-2\n\
                3,C,Cat,A-3\n\
                4,D,,A-4\n\
                5,E,Cat,A-5\n";
    let products = CatalogLoader::new().load_from_reader(data.as_bytes()).expect("load");
    assert_eq!(products.len(), 3);
    let ids: Vec<&str> = products.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, vec!["1", "3", "5"]);
}

#[test]
fn all_rows_invalid_means_no_products() {
    let data = "id,product name,category 1,article\n1,,Cat,A-1\n2,B,Cat,\n";
    let err = CatalogLoader::new().load_from_reader(data.as_bytes()).unwrap_err();
    assert!(matches!(err, Error::NoProducts));
    assert!(err.to_string().to_lowercase().contains("no products"));
}

#[test]
fn duplicate_ids_keep_first_row() {
    let data = "id,product name,category 1,article\n1,First,Cat,A-1\n1,Second,Cat,A-2\n";
    let products = CatalogLoader::new().load_from_reader(data.as_bytes()).expect("load");
    assert_eq!(products.len(), 1);
    assert_eq!(products[0].product_name, "First");
}

#[test]
fn tsv_extension_selects_tab_delimiter() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("catalog.tsv");
    fs::write(&path, "id\tproduct name\tcategory 1\tarticle\n1\tLamp, desk\tLighting\tL-1\n").unwrap();
    let products = CatalogLoader::new().load(&path).expect("load");
    assert_eq!(products[0].product_name, "Lamp, desk");
}

fn write_xlsx(path: &Path, header: &[&str], rows: &[Vec<&str>]) {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    for (c, h) in header.iter().enumerate() {
        sheet.write_string(0, c as u16, *h).unwrap();
    }
    for (r, row) in rows.iter().enumerate() {
        for (c, v) in row.iter().enumerate() {
            // Numeric-looking cells are stored as numbers, as spreadsheet apps do.
            match v.parse::<f64>() {
                Ok(n) => sheet.write_number(r as u32 + 1, c as u16, n).unwrap(),
                Err(_) => sheet.write_string(r as u32 + 1, c as u16, *v).unwrap(),
            };
        }
    }
    workbook.save(path).unwrap();
}

#[test]
fn xlsx_catalog_uses_same_column_rules() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("catalog.xlsx");
    write_xlsx(
        &path,
        &["Product_Name", "ID", "Category 1", "Article", "Description"],
        &[
            vec!["Cordless Drill", "1001", "Tools", "ABC-100", "18V"],
            vec!["Hammer", "", "Tools", "XYZ-1", ""],
            vec!["Rake", "1002", "Garden", "42", ""],
        ],
    );

    let products = CatalogLoader::new().load(&path).expect("load");
    assert_eq!(products.len(), 2);
    assert_eq!(products[0].id, "1001");
    assert_eq!(products[0].article, "ABC-100");
    assert_eq!(products[0].description.as_deref(), Some("18V"));
    assert_eq!(products[1].article, "42");
    assert_eq!(products[1].description, None);
}

#[test]
fn xlsx_missing_article_column_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("catalog.xlsx");
    write_xlsx(&path, &["id", "product name", "category 1"], &[vec!["1", "Lamp", "Lighting"]]);
    match CatalogLoader::new().load(&path).unwrap_err() {
        Error::MissingColumns(cols) => assert_eq!(cols, vec!["article".to_string()]),
        other => panic!("expected MissingColumns, got {other:?}"),
    }
}

#[test]
fn product_constructor_rejects_empty_required_fields() {
    assert!(Product::new("1", "Name", "Cat", "A-1").is_ok());
    assert!(matches!(Product::new("1", " ", "Cat", "A-1"), Err(Error::InvalidProduct(_))));
    assert!(matches!(Product::new("", "Name", "Cat", ""), Err(Error::InvalidProduct(_))));
}

#[test]
fn search_result_rejects_out_of_range_scores() {
    let p = Product::new("1", "Name", "Cat", "A-1").unwrap();
    assert!(SearchResult::new(p.clone(), 0.0).is_ok());
    assert!(SearchResult::new(p.clone(), 1.0).is_ok());
    assert!(matches!(SearchResult::new(p.clone(), 1.01), Err(Error::ScoreOutOfRange(_))));
    assert!(SearchResult::new(p.clone(), -0.1).is_err());
    assert!(SearchResult::new(p, f32::NAN).is_err());
}

#[test]
fn searchable_text_covers_name_article_description_and_categories() {
    let p = Product::new("1", "Cordless Drill", "Tools", "ABC-100")
        .unwrap()
        .with_description("compact")
        .with_subcategories(Some("Power".into()), None);
    assert_eq!(p.searchable_text(), "Cordless Drill ABC-100 compact Tools Power");
    assert!(p.in_category("Power"));
    assert!(!p.in_category("Garden"));
}

#[test]
fn version_status_transitions() {
    use VersionStatus::*;
    assert!(Uploaded.can_transition_to(Processing));
    assert!(Processing.can_transition_to(Completed));
    assert!(Processing.can_transition_to(Failed));
    assert!(Completed.can_transition_to(Active));
    assert!(Active.can_transition_to(Completed));
    assert!(!Uploaded.can_transition_to(Active));
    assert!(!Failed.can_transition_to(Active));
    assert!(!Completed.can_transition_to(Processing));
    assert_eq!(Active.to_string(), "active");
}
