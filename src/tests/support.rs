use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use crate::config::Language;
use crate::semantic::embeddings::{Embedder, EmbeddingError, EmbeddingKind};
use crate::semantic::{ModeThresholds, SearchService, ServiceSettings};

/// Keyword groups, one vector dimension each. The last dimension is used
/// for text matching none of them.
const CONCEPTS: &[&[&str]] = &[
    &["bread", "bakery", "बेकरी", "रोटी"],
    &["rice", "paddy", "धान", "चावल"],
    &["software", "computer", "सॉफ्टवेयर"],
    &["cotton", "textile", "कपड़ा"],
    &["wheat", "गेहूं"],
];

pub const DIMENSIONS: usize = 6;

/// Deterministic embedder: one dimension per matched keyword group.
pub struct KeywordEmbedder {
    name: String,
    pub calls: AtomicUsize,
}

impl KeywordEmbedder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn vector(text: &str) -> Vec<f32> {
        let text = text.to_lowercase();
        let mut vector = vec![0.0; DIMENSIONS];
        for (dim, keywords) in CONCEPTS.iter().enumerate() {
            if keywords.iter().any(|k| text.contains(k)) {
                vector[dim] = 1.0;
            }
        }
        if vector.iter().all(|v| *v == 0.0) {
            vector[DIMENSIONS - 1] = 1.0;
        }
        vector
    }
}

impl Embedder for KeywordEmbedder {
    fn name(&self) -> &str {
        &self.name
    }

    fn dimensions(&self) -> usize {
        DIMENSIONS
    }

    fn embed(&self, text: &str, _kind: EmbeddingKind) -> Result<Vec<f32>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Self::vector(text))
    }

    fn embed_batch(
        &self,
        texts: &[String],
        kind: EmbeddingKind,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        texts.iter().map(|t| self.embed(t, kind)).collect()
    }
}

fn record(id: &str, section: &str, class: &str, subclass: &str, text: &str, embed: bool) -> Value {
    let mut doc = json!({
        "_id": id,
        "Section": section,
        "Section_Description": format!("Section {section}"),
        "Division": &class[..2],
        "Group": &class[..3],
        "Class": class,
        "Class_Description": format!("Class {class}"),
        "Sub-Class": subclass,
        "Sub-Class_Description": text,
    });
    if embed {
        doc["Vector-Embedding_SubClass"] = json!(KeywordEmbedder::vector(text));
    }
    doc
}

/// English catalog records; embeddings included when `embed` is set.
pub fn english_records(embed: bool) -> Vec<Value> {
    vec![
        record("bread", "C", "1071", "10711", "Manufacture of bread and bakery products", embed),
        record("rice", "A", "0112", "01121", "Growing of paddy rice", embed),
        record("software", "J", "6201", "62011", "Computer software development", embed),
        record("cotton", "C", "1311", "13111", "Cotton textile spinning", embed),
        record("mining", "B", "0510", "05101", "Mining of hard coal", embed),
    ]
}

pub fn hindi_records() -> Vec<Value> {
    let mut records = vec![
        record("h-rice", "A", "0112", "01121", "धान की खेती", true),
        record("h-bread", "C", "1071", "10711", "बेकरी उत्पादों का निर्माण", true),
    ];
    // Hindi export uses the misspelt "Divison" column and "embeddings"
    for doc in &mut records {
        if let Value::Object(map) = doc {
            if let Some(division) = map.remove("Division") {
                map.insert("Divison".into(), division);
            }
            if let Some(embedding) = map.remove("Vector-Embedding_SubClass") {
                map.insert("embeddings".into(), embedding);
            }
        }
    }
    records
}

pub fn write_catalog(path: &Path, records: &[Value]) {
    std::fs::write(path, serde_json::to_vec_pretty(records).unwrap()).unwrap();
}

pub fn settings(dir: &Path, language: Language, model: &str) -> ServiceSettings {
    ServiceSettings {
        language,
        model: model.to_string(),
        catalog_path: dir.join(format!("{language}.json")),
        index_path: dir.join(format!("{language}_index.bin")),
        cache_dir: dir.join("embedding_cache"),
        model_cache_dir: dir.join("models"),
        download_timeout: Duration::from_secs(1),
        batch_size: 2,
        max_result_count: 100,
        thresholds: ModeThresholds::default(),
    }
}

/// Service over the English fixture catalog with the keyword embedder.
pub fn english_service(dir: &Path) -> (SearchService, Arc<KeywordEmbedder>) {
    let settings = settings(dir, Language::English, "keyword-model");
    write_catalog(&settings.catalog_path, &english_records(true));
    let embedder = Arc::new(KeywordEmbedder::new("keyword-model"));
    (
        SearchService::with_embedder(settings, embedder.clone()),
        embedder,
    )
}

pub fn hindi_service(dir: &Path) -> SearchService {
    let settings = settings(dir, Language::Hindi, "keyword-model-hi");
    write_catalog(&settings.catalog_path, &hindi_records());
    SearchService::with_embedder(settings, Arc::new(KeywordEmbedder::new("keyword-model-hi")))
}
