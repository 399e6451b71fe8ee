//! Build a catalog from a CSV export of the NIC spreadsheet.

use std::path::Path;

use serde::Deserialize;

use super::{clean_cell, Catalog, CatalogError, Document};

#[derive(Debug, Deserialize)]
struct CsvRow {
    #[serde(rename = "_id", default)]
    id: Option<String>,
    #[serde(rename = "Section", default)]
    section: Option<String>,
    #[serde(rename = "Section_Description", default)]
    section_description: Option<String>,
    #[serde(rename = "Division", alias = "Divison", default)]
    division: Option<String>,
    #[serde(rename = "Division_Description", default)]
    division_description: Option<String>,
    #[serde(rename = "Group", default)]
    group: Option<String>,
    #[serde(rename = "Group_Description", default)]
    group_description: Option<String>,
    #[serde(rename = "Class", default)]
    class: Option<String>,
    #[serde(rename = "Class_Description", default)]
    class_description: Option<String>,
    #[serde(rename = "Sub-Class", default)]
    subclass: Option<String>,
    #[serde(rename = "Sub-Class_Description", default)]
    subclass_description: Option<String>,
    #[serde(rename = "Description", default)]
    description: Option<String>,
}

fn cell(value: Option<String>) -> String {
    value.as_deref().map(clean_cell).unwrap_or_default()
}

/// Codes exported from a numeric column come back as "1011.0".
fn code_cell(value: Option<String>) -> String {
    let cleaned = cell(value);
    match cleaned.strip_suffix(".0") {
        Some(int) if !int.is_empty() && int.bytes().all(|b| b.is_ascii_digit()) => int.to_string(),
        _ => cleaned,
    }
}

impl From<CsvRow> for Document {
    fn from(row: CsvRow) -> Self {
        Document {
            id: cell(row.id),
            section: cell(row.section),
            section_description: cell(row.section_description),
            division: code_cell(row.division),
            division_description: cell(row.division_description),
            group: code_cell(row.group),
            group_description: cell(row.group_description),
            class: code_cell(row.class),
            class_description: cell(row.class_description),
            subclass: code_cell(row.subclass),
            subclass_description: cell(row.subclass_description),
            description: cell(row.description),
            ..Default::default()
        }
    }
}

/// Read documents from a CSV file with a header row.
///
/// Rows without any text to embed are skipped. Documents without an `_id`
/// column get their row number as id, unless another row already uses it.
pub fn import_csv(path: &Path) -> Result<Catalog, CatalogError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)?;

    let mut documents = Vec::new();
    for (row_number, row) in reader.deserialize::<CsvRow>().enumerate() {
        let document = Document::from(row?);
        if document.embedding_text().is_none() {
            log::warn!("row {} has no description, skipping", row_number + 1);
            continue;
        }
        documents.push((row_number, document));
    }

    Ok(Catalog::from_numbered(documents))
}
