use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::catalog::Catalog;
use crate::config::Language;
use crate::semantic::embeddings::{
    model_id_hash, Embedder, EmbeddingError, EmbeddingKind,
};
use crate::semantic::storage::{VectorStorage, VectorStorageError};
use crate::semantic::{SearchError, SearchRequest, SearchService};

use super::support::{
    english_records, english_service, hindi_service, settings, write_catalog, KeywordEmbedder,
};

fn request(query: &str) -> SearchRequest {
    SearchRequest {
        query: query.to_string(),
        ..Default::default()
    }
}

fn ids(service: &SearchService, req: &SearchRequest) -> Vec<String> {
    service
        .search(req)
        .unwrap()
        .results
        .into_iter()
        .map(|hit| hit.id)
        .collect()
}

#[test]
fn test_initialize_builds_and_saves_index() {
    let tmp = tempfile::tempdir().unwrap();
    let (service, _) = english_service(tmp.path());

    assert!(!service.is_initialized());
    service.initialize().unwrap();

    assert!(service.is_initialized());
    assert!(service.settings().index_path.exists());
}

#[test]
fn test_search_returns_best_match_first() {
    let tmp = tempfile::tempdir().unwrap();
    let (service, _) = english_service(tmp.path());

    let response = service.search(&request("  bakery   shop ")).unwrap();

    assert_eq!(response.count, 1);
    let hit = &response.results[0];
    assert_eq!(hit.id, "bread");
    assert_eq!(hit.rank, 1);
    assert_eq!(hit.class_code, "1071");
    assert_eq!(hit.subclass, "10711");
    assert_eq!(hit.title, "Manufacture of bread and bakery products");
    assert!((hit.similarity_percent - 100.0).abs() < 0.01);
    assert!(response.metrics.is_none());
}

#[test]
fn test_modes_filter_by_threshold() {
    let tmp = tempfile::tempdir().unwrap();
    let (service, _) = english_service(tmp.path());

    // similarity 1/sqrt(3) ~ 0.577 to each of three documents
    let query = "bread rice software";
    let with_mode = |mode: &str| SearchRequest {
        search_mode: mode.to_string(),
        ..request(query)
    };

    assert!(ids(&service, &with_mode("strict")).is_empty());
    assert_eq!(ids(&service, &with_mode("standard")).len(), 3);
    assert_eq!(ids(&service, &with_mode("relaxed")).len(), 3);

    // similarity 1/sqrt(2) ~ 0.707 passes strict
    let strict = SearchRequest {
        search_mode: "strict".into(),
        ..request("bread rice")
    };
    let mut found = ids(&service, &strict);
    found.sort();
    assert_eq!(found, vec!["bread", "rice"]);
}

#[test]
fn test_result_count_truncates() {
    let tmp = tempfile::tempdir().unwrap();
    let (service, _) = english_service(tmp.path());

    let req = SearchRequest {
        result_count: 2,
        ..request("bread rice software")
    };
    let response = service.search(&req).unwrap();

    assert_eq!(response.count, 2);
    assert_eq!(response.results[1].rank, 2);
}

#[test]
fn test_request_validation() {
    let tmp = tempfile::tempdir().unwrap();
    let (service, embedder) = english_service(tmp.path());

    let invalid = [
        request("   "),
        SearchRequest {
            result_count: 0,
            ..request("bread")
        },
        SearchRequest {
            result_count: 101,
            ..request("bread")
        },
        SearchRequest {
            search_mode: "Strict".into(),
            ..request("bread")
        },
    ];

    for req in &invalid {
        assert!(
            matches!(service.search(req), Err(SearchError::InvalidRequest(_))),
            "{req:?} should be rejected"
        );
    }
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    assert!(!service.is_initialized());
}

#[test]
fn test_metrics() {
    let tmp = tempfile::tempdir().unwrap();
    let (service, _) = english_service(tmp.path());

    let req = SearchRequest {
        show_metrics: true,
        ..request("cotton")
    };
    let metrics = service.search(&req).unwrap().metrics.unwrap();

    // all five documents come back raw, only one passes the threshold
    assert_eq!(metrics.results_count, 5);
    assert!(metrics.total_time_ms >= metrics.index_time_ms);
    assert!(metrics.total_time_ms >= metrics.embedding_time_ms);

    for ms in [
        metrics.total_time_ms,
        metrics.embedding_time_ms,
        metrics.index_time_ms,
    ] {
        assert_eq!((ms * 100.0).round() / 100.0, ms);
    }
}

#[test]
fn test_index_reload_keeps_id_mapping() {
    let tmp = tempfile::tempdir().unwrap();
    let (service, _) = english_service(tmp.path());
    let before = service.search(&request("rice")).unwrap().results;

    // a fresh service loads the saved file instead of rebuilding
    let settings = service.settings().clone();
    drop(service);
    let modified = std::fs::metadata(&settings.index_path)
        .unwrap()
        .modified()
        .unwrap();

    let reloaded = SearchService::with_embedder(
        settings.clone(),
        Arc::new(KeywordEmbedder::new("keyword-model")),
    );
    let after = reloaded.search(&request("rice")).unwrap().results;

    assert_eq!(before, after);
    assert_eq!(
        std::fs::metadata(&settings.index_path)
            .unwrap()
            .modified()
            .unwrap(),
        modified
    );
}

#[test]
fn test_model_change_triggers_rebuild() {
    let tmp = tempfile::tempdir().unwrap();
    let (service, _) = english_service(tmp.path());
    service.initialize().unwrap();
    drop(service);

    let mut other = settings(tmp.path(), Language::English, "other-model");
    other.catalog_path = tmp.path().join("english.json");

    let storage = VectorStorage::new(other.index_path.clone());
    assert!(matches!(
        storage.load(&model_id_hash("other-model"), None),
        Err(VectorStorageError::ModelMismatch)
    ));

    let service =
        SearchService::with_embedder(other, Arc::new(KeywordEmbedder::new("other-model")));
    service.initialize().unwrap();

    // rebuilt file now belongs to the new model
    let index = storage
        .load(&model_id_hash("other-model"), None)
        .unwrap();
    assert_eq!(index.len(), 5);
}

#[test]
fn test_corrupt_index_is_rebuilt() {
    let tmp = tempfile::tempdir().unwrap();
    let (service, _) = english_service(tmp.path());
    let index_path = service.settings().index_path.clone();
    std::fs::write(&index_path, b"garbage").unwrap();

    assert_eq!(ids(&service, &request("software")), vec!["software"]);
}

#[test]
fn test_build_index_force_and_load() {
    let tmp = tempfile::tempdir().unwrap();
    let (service, _) = english_service(tmp.path());

    assert_eq!(service.build_index(false).unwrap(), 5);

    // drop a document, an unforced build keeps the existing file
    let mut records = english_records(true);
    records.pop();
    write_catalog(&service.settings().catalog_path, &records);

    let (service, _) = english_service_without_rewrite(&service);
    assert_eq!(service.build_index(false).unwrap(), 5);
    assert_eq!(service.build_index(true).unwrap(), 4);
    assert_eq!(service.load_index().unwrap(), 4);
}

/// A fresh service over the same files, leaving the catalog untouched.
fn english_service_without_rewrite(
    service: &SearchService,
) -> (SearchService, Arc<KeywordEmbedder>) {
    let embedder = Arc::new(KeywordEmbedder::new("keyword-model"));
    (
        SearchService::with_embedder(service.settings().clone(), embedder.clone()),
        embedder,
    )
}

#[test]
fn test_build_skips_wrong_dimensions() {
    let tmp = tempfile::tempdir().unwrap();
    let (service, _) = english_service(tmp.path());

    let mut records = english_records(true);
    records[2]["Vector-Embedding_SubClass"] = serde_json::json!([1.0, 0.0]);
    records[3]["Vector-Embedding_SubClass"] = serde_json::json!("nan");
    write_catalog(&service.settings().catalog_path, &records);

    assert_eq!(service.build_index(true).unwrap(), 3);
}

#[test]
fn test_no_embeddings() {
    let tmp = tempfile::tempdir().unwrap();
    let (service, _) = english_service(tmp.path());
    write_catalog(&service.settings().catalog_path, &english_records(false));

    assert!(matches!(
        service.build_index(true),
        Err(SearchError::NoEmbeddings(_))
    ));
    assert!(matches!(
        service.search(&request("bread")),
        Err(SearchError::NoEmbeddings(_))
    ));
}

#[test]
fn test_load_and_save_without_index() {
    let tmp = tempfile::tempdir().unwrap();
    let (service, _) = english_service(tmp.path());

    assert!(matches!(
        service.load_index(),
        Err(SearchError::IndexUnavailable(_))
    ));
    assert!(matches!(
        service.save_index(),
        Err(SearchError::IndexUnavailable(_))
    ));

    service.initialize().unwrap();
    std::fs::remove_file(&service.settings().index_path).unwrap();
    service.save_index().unwrap();
    assert!(service.settings().index_path.exists());
}

#[test]
fn test_stats_and_cache() {
    let tmp = tempfile::tempdir().unwrap();
    let (service, embedder) = english_service(tmp.path());

    service.search(&request("rice")).unwrap();
    service.search(&request("rice")).unwrap();
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);

    let stats = service.stats().unwrap();
    assert_eq!(stats.vector_count, 5);
    assert_eq!(stats.id_map_size, 5);
    assert_eq!(stats.dimension, super::support::DIMENSIONS);
    assert_eq!(stats.catalog_documents, 5);
    assert!(stats.index_file_exists);
    assert_eq!(stats.embedding_cache_size, 1);
    assert_eq!(stats.embedding_cache_hit_rate, "50.00%");
    assert_eq!(stats.embedding_requests, 2);

    service.clear_embedding_cache().unwrap();
    let stats = service.stats().unwrap();
    assert_eq!(stats.embedding_cache_size, 0);
    assert_eq!(stats.embedding_cache_hit_rate, "0.00%");
}

#[test]
fn test_stats_without_index_file() {
    let tmp = tempfile::tempdir().unwrap();
    let (service, _) = english_service(tmp.path());

    assert!(matches!(
        service.stats(),
        Err(SearchError::IndexUnavailable(_))
    ));
}

#[test]
fn test_embed_documents_fills_catalog() {
    let tmp = tempfile::tempdir().unwrap();
    let (service, embedder) = english_service(tmp.path());
    let mut records = english_records(false);
    records[0] = english_records(true).remove(0);
    write_catalog(&service.settings().catalog_path, &records);

    let report = service.embed_documents(false).unwrap();

    assert_eq!(report.embedded, 4);
    assert_eq!(report.skipped_existing, 1);
    assert_eq!(report.indexed, 5);
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 4);

    let catalog = Catalog::load(&service.settings().catalog_path).unwrap();
    assert_eq!(catalog.documents_with_embeddings().count(), 5);
    assert_eq!(
        catalog.get("cotton").unwrap().embedding,
        Some(KeywordEmbedder::vector("Cotton textile spinning"))
    );

    assert_eq!(ids(&service, &request("textile")), vec!["cotton"]);
}

#[test]
fn test_embed_documents_overwrite() {
    let tmp = tempfile::tempdir().unwrap();
    let (service, _) = english_service(tmp.path());

    let report = service.embed_documents(true).unwrap();

    assert_eq!(report.embedded, 5);
    assert_eq!(report.skipped_existing, 0);
}

#[test]
fn test_hindi_catalog() {
    let tmp = tempfile::tempdir().unwrap();
    let service = hindi_service(tmp.path());

    let response = service.search(&request("धान")).unwrap();

    assert_eq!(response.count, 1);
    assert_eq!(response.results[0].id, "h-rice");
    assert_eq!(response.results[0].division, "01");
    assert_eq!(response.results[0].title, "धान की खेती");
}

#[test]
fn test_missing_catalog() {
    let tmp = tempfile::tempdir().unwrap();
    let service = SearchService::with_embedder(
        settings(tmp.path(), Language::English, "keyword-model"),
        Arc::new(KeywordEmbedder::new("keyword-model")),
    );

    assert!(matches!(
        service.initialize(),
        Err(SearchError::Catalog(_))
    ));
}

/// Embeds every text to the same four-dimension vector.
struct NarrowEmbedder;

impl Embedder for NarrowEmbedder {
    fn name(&self) -> &str {
        "narrow-model"
    }

    fn dimensions(&self) -> usize {
        4
    }

    fn embed(&self, _text: &str, _kind: EmbeddingKind) -> Result<Vec<f32>, EmbeddingError> {
        Ok(vec![1.0, 0.0, 0.0, 0.0])
    }

    fn embed_batch(
        &self,
        texts: &[String],
        kind: EmbeddingKind,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        texts.iter().map(|t| self.embed(t, kind)).collect()
    }
}

#[test]
fn test_model_dimension_must_match_index() {
    let tmp = tempfile::tempdir().unwrap();
    let settings = settings(tmp.path(), Language::English, "narrow-model");
    write_catalog(&settings.catalog_path, &english_records(true));
    let service = SearchService::with_embedder(settings, Arc::new(NarrowEmbedder));

    match service.initialize() {
        Err(SearchError::IndexUnavailable(msg)) => {
            assert!(msg.contains("embed --overwrite"), "{msg}");
        }
        other => panic!("expected IndexUnavailable, got {other:?}"),
    }
    assert!(!service.is_initialized());
    assert!(matches!(
        service.search(&request("bread")),
        Err(SearchError::IndexUnavailable(_))
    ));

    // re-embedding the catalog with the configured model fixes it
    let report = service.embed_documents(true).unwrap();
    assert_eq!(report.indexed, 5);
    assert_eq!(service.search(&request("bread")).unwrap().count, 5);
}
