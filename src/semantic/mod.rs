//! Semantic search over the NIC catalog.
//!
//! Uses fastembed-rs for query embeddings and an exact in-memory
//! inner-product index over normalised document vectors.
//!
//! # Architecture
//!
//! - `embeddings`: Wraps fastembed behind the `Embedder` trait
//! - `cache`: Persistent per-model embedding cache
//! - `index`: Flat vector index with its position -> document id map
//! - `storage`: Binary file I/O for index persistence
//! - `preprocess`: Text preprocessing for embedding input
//! - `ranking`: Search modes, threshold filtering and result ranking
//! - `service`: Per-language search service

mod cache;
pub mod embeddings;
mod index;
mod preprocess;
mod ranking;
mod service;
pub mod storage;

pub use ranking::ModeThresholds;
pub use service::{
    IndexStats, SearchError, SearchRequest, SearchResponse, SearchService, ServiceSettings,
};
