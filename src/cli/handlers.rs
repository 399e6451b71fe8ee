use crate::{
    app::AppService,
    catalog::{self, Catalog},
    config::Language,
    semantic::{SearchRequest, SearchResponse},
};
use anyhow::{Context, Result};
use std::path::PathBuf;

pub fn handle_search(
    app: &AppService,
    language: Language,
    query: Vec<String>,
    count: usize,
    mode: String,
    metrics: bool,
    json: bool,
) -> Result<()> {
    let service = app.service(language)?;

    let request = SearchRequest {
        query: query.join(" "),
        result_count: count,
        search_mode: mode,
        show_metrics: metrics,
    };
    let response = service.search(&request)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        print_results(&response);
    }
    Ok(())
}

fn print_results(response: &SearchResponse) {
    if response.results.is_empty() {
        println!("No matching NIC codes found");
    }

    for hit in &response.results {
        println!(
            "{:>2}. [{}] {} ({:.2}%)",
            hit.rank, hit.subclass, hit.title, hit.similarity_percent
        );
        println!(
            "    Section {}: {}",
            hit.section, hit.section_description
        );
        println!(
            "    Division {} / Group {} / Class {}",
            hit.division, hit.group, hit.class_code
        );
    }

    if let Some(metrics) = &response.metrics {
        println!();
        println!(
            "total {:.1} ms, embedding {:.1} ms, index {:.1} ms, {} raw candidates",
            metrics.total_time_ms,
            metrics.embedding_time_ms,
            metrics.index_time_ms,
            metrics.results_count
        );
    }
}

pub fn handle_build_index(app: &AppService, language: Language, force: bool) -> Result<()> {
    let service = app.service(language)?;
    let count = service.build_index(force)?;
    println!("{language} index ready with {count} vectors");
    Ok(())
}

pub fn handle_stats(app: &AppService, language: Language) -> Result<()> {
    let stats = app.service(language)?.stats()?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

pub fn handle_clear_cache(app: &AppService, language: Language) -> Result<()> {
    app.service(language)?.clear_embedding_cache()?;
    println!("Embedding cache cleared");
    Ok(())
}

pub fn handle_embed(app: &AppService, language: Language, overwrite: bool) -> Result<()> {
    let report = app.service(language)?.embed_documents(overwrite)?;
    println!(
        "{} embedded, {} already embedded, {} without text, {} indexed",
        report.embedded, report.skipped_existing, report.skipped_without_text, report.indexed
    );
    Ok(())
}

pub fn handle_verify(app: &AppService, language: Language, samples: usize) -> Result<()> {
    let settings = app.service(language)?.settings();
    let catalog = Catalog::load(&settings.catalog_path)?;
    let report = catalog::verify(&catalog, samples);

    println!("Catalog: {}", settings.catalog_path.display());
    println!("Total documents: {}", report.total);
    println!("With embeddings: {}", report.with_embedding);
    println!("Missing embeddings: {}", report.missing_embedding);
    println!("Invalid embeddings: {}", report.invalid_embedding);
    println!("Without text: {}", report.without_text);
    println!("Empty Sub-Class: {}", report.empty_subclass);
    for (dimension, count) in &report.dimensions {
        println!("Dimension {dimension}: {count} documents");
    }
    if report.has_mixed_dimensions() {
        println!("WARNING: embeddings have mixed dimensions");
    }
    if !report.samples.is_empty() {
        println!("Problem documents: {}", report.samples.join(", "));
    }

    if !report.is_clean() {
        anyhow::bail!("catalog has problems, run `embed` to fill in missing embeddings");
    }
    Ok(())
}

pub fn handle_import_csv(
    app: &AppService,
    language: Language,
    csv: PathBuf,
    output: Option<PathBuf>,
) -> Result<()> {
    let output = match output {
        Some(output) => output,
        None => app.service(language)?.settings().catalog_path.clone(),
    };

    let catalog = catalog::import_csv(&csv)
        .with_context(|| format!("failed to import {}", csv.display()))?;
    catalog.save(&output)?;

    println!("Wrote {} documents to {}", catalog.len(), output.display());
    Ok(())
}
