//! Data quality checks over a loaded catalog.

use std::collections::BTreeMap;

use serde::Serialize;

use super::Catalog;

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct VerifyReport {
    pub total: usize,
    pub with_embedding: usize,
    pub missing_embedding: usize,
    /// Present but empty, non-numeric, NaN or infinite
    pub invalid_embedding: usize,
    /// Embedding length -> number of documents
    pub dimensions: BTreeMap<usize, usize>,
    pub empty_subclass: usize,
    pub without_text: usize,
    /// Ids of the first problematic documents, for display
    pub samples: Vec<String>,
}

impl VerifyReport {
    /// Embedding lengths disagree across documents.
    pub fn has_mixed_dimensions(&self) -> bool {
        self.dimensions.len() > 1
    }

    pub fn is_clean(&self) -> bool {
        self.missing_embedding == 0 && self.invalid_embedding == 0 && !self.has_mixed_dimensions()
    }
}

pub fn verify(catalog: &Catalog, sample_count: usize) -> VerifyReport {
    let mut report = VerifyReport {
        total: catalog.len(),
        ..Default::default()
    };

    for doc in catalog.documents() {
        let mut problem = false;

        match &doc.embedding {
            None => {
                report.missing_embedding += 1;
                problem = true;
            }
            Some(_) if doc.usable_embedding().is_none() => {
                report.invalid_embedding += 1;
                problem = true;
            }
            Some(embedding) => {
                report.with_embedding += 1;
                *report.dimensions.entry(embedding.len()).or_default() += 1;
            }
        }

        // placeholders such as "nan" were already mapped to ""
        if doc.subclass.is_empty() {
            report.empty_subclass += 1;
        }

        if doc.embedding_text().is_none() {
            report.without_text += 1;
            problem = true;
        }

        if problem && report.samples.len() < sample_count {
            report.samples.push(doc.id.clone());
        }
    }

    report
}
