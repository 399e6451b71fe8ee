//! The NIC code catalog: documents loaded from a JSON export.
//!
//! - `document`: record type and lenient field parsing
//! - `verify`: data quality report over a catalog
//! - `csv_import`: build a catalog from a spreadsheet CSV export

mod csv_import;
mod document;
mod verify;

use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde_json::Value;

pub use csv_import::import_csv;
pub use document::{clean_cell, Document};
pub use verify::verify;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid catalog JSON in {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("catalog in {0} must be a JSON array or object of records")]
    NotACollection(PathBuf),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

/// Ordered document collection with an id lookup.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    documents: Vec<Document>,
    positions: HashMap<String, usize>,
}

impl Catalog {
    /// Build a catalog, assigning the record position as id where `_id` is
    /// missing. Later duplicates of an id are dropped.
    pub fn from_documents(documents: Vec<Document>) -> Self {
        Self::from_numbered(documents.into_iter().enumerate().collect())
    }

    /// Like `from_documents`, with the number used for a missing id given
    /// per record. A fallback id never takes an id some record already has.
    pub(crate) fn from_numbered(records: Vec<(usize, Document)>) -> Self {
        let mut taken: HashSet<String> = records
            .iter()
            .filter(|(_, doc)| !doc.id.is_empty())
            .map(|(_, doc)| doc.id.clone())
            .collect();

        let mut kept = Vec::with_capacity(records.len());
        let mut positions = HashMap::with_capacity(records.len());

        for (number, mut doc) in records {
            if doc.id.is_empty() {
                doc.id = fallback_id(number, &taken);
                taken.insert(doc.id.clone());
            }
            if positions.contains_key(&doc.id) {
                log::warn!("duplicate document id '{}' at record {number}, skipping", doc.id);
                continue;
            }
            positions.insert(doc.id.clone(), kept.len());
            kept.push(doc);
        }

        Self {
            documents: kept,
            positions,
        }
    }

    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let raw = std::fs::read(path).map_err(|source| CatalogError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let parse_err = |source| CatalogError::Parse {
            path: path.to_path_buf(),
            source,
        };

        let value: Value =
            serde_json::from_slice(&replace_non_finite(&raw)).map_err(parse_err)?;
        let records = match value {
            Value::Array(items) => items,
            Value::Object(map) => map.into_iter().map(|(_, v)| v).collect(),
            _ => return Err(CatalogError::NotACollection(path.to_path_buf())),
        };

        let documents = records
            .into_iter()
            .map(serde_json::from_value::<Document>)
            .collect::<Result<Vec<_>, _>>()
            .map_err(parse_err)?;

        let catalog = Self::from_documents(documents);
        log::info!("Loaded {} records from {}", catalog.len(), path.display());
        Ok(catalog)
    }

    pub fn save(&self, path: &Path) -> Result<(), CatalogError> {
        let data = serde_json::to_vec_pretty(&self.documents)?;
        crate::storage::write_atomic(path, &data).map_err(|source| CatalogError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn get(&self, id: &str) -> Option<&Document> {
        self.positions.get(id).map(|&pos| &self.documents[pos])
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    /// Documents carrying a usable precomputed embedding, in catalog order.
    pub fn documents_with_embeddings(&self) -> impl Iterator<Item = (&str, &[f32])> {
        self.documents
            .iter()
            .filter_map(|doc| doc.usable_embedding().map(|e| (doc.id.as_str(), e)))
    }

    /// Replace the embedding of a document. Returns false for unknown ids.
    pub fn set_embedding(&mut self, id: &str, embedding: Vec<f32>) -> bool {
        match self.positions.get(id) {
            Some(&pos) => {
                self.documents[pos].embedding = Some(embedding);
                true
            }
            None => false,
        }
    }
}

fn fallback_id(number: usize, taken: &HashSet<String>) -> String {
    let id = number.to_string();
    if !taken.contains(&id) {
        return id;
    }
    (1..)
        .map(|n| format!("{number}-{n}"))
        .find(|candidate| !taken.contains(candidate))
        .unwrap_or(id)
}

/// Python's `json.dump` writes NaN and infinities as bare tokens. Turn those
/// into `null` so serde_json accepts the file; string contents are untouched.
fn replace_non_finite(raw: &[u8]) -> Cow<'_, [u8]> {
    const TOKENS: [&[u8]; 3] = [b"-Infinity", b"Infinity", b"NaN"];

    let mut out: Option<Vec<u8>> = None;
    let mut in_string = false;
    let mut escaped = false;
    let mut i = 0;

    while i < raw.len() {
        let byte = raw[i];
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
        } else if byte == b'"' {
            in_string = true;
        } else if let Some(token) = TOKENS.iter().find(|t| raw[i..].starts_with(t)) {
            let buf = out.get_or_insert_with(|| raw[..i].to_vec());
            buf.extend_from_slice(b"null");
            i += token.len();
            continue;
        }
        if let Some(buf) = out.as_mut() {
            buf.push(byte);
        }
        i += 1;
    }

    match out {
        Some(buf) => Cow::Owned(buf),
        None => Cow::Borrowed(raw),
    }
}
