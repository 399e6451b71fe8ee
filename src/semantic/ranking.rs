//! Threshold filtering and ranking of raw index results.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::catalog::Catalog;
use crate::semantic::index::{IndexError, VectorIndex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    #[default]
    Standard,
    Strict,
    Relaxed,
}

impl SearchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMode::Standard => "standard",
            SearchMode::Strict => "strict",
            SearchMode::Relaxed => "relaxed",
        }
    }

    /// Minimum similarity a result must reach in this mode.
    pub fn threshold(&self, thresholds: &ModeThresholds) -> f32 {
        match self {
            SearchMode::Standard => thresholds.standard,
            SearchMode::Strict => thresholds.strict,
            SearchMode::Relaxed => thresholds.relaxed,
        }
    }

    /// How many raw candidates to fetch per requested result.
    pub fn multiplier(&self) -> usize {
        match self {
            SearchMode::Standard => 2,
            SearchMode::Strict => 3,
            SearchMode::Relaxed => 4,
        }
    }
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "standard" => Ok(SearchMode::Standard),
            "strict" => Ok(SearchMode::Strict),
            "relaxed" => Ok(SearchMode::Relaxed),
            other => Err(format!(
                "Invalid search mode '{other}', expected standard, strict or relaxed"
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModeThresholds {
    pub standard: f32,
    pub strict: f32,
    pub relaxed: f32,
}

impl Default for ModeThresholds {
    fn default() -> Self {
        Self {
            standard: 0.5,
            strict: 0.7,
            relaxed: 0.3,
        }
    }
}

/// One ranked result with the catalog hierarchy attached.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SearchHit {
    pub rank: usize,
    pub id: String,
    pub title: String,
    pub description: String,
    pub section: String,
    pub section_description: String,
    pub division: String,
    pub division_description: String,
    pub group: String,
    pub group_description: String,
    #[serde(rename = "class")]
    pub class_code: String,
    pub class_description: String,
    pub subclass: String,
    pub subclass_description: String,
    pub similarity: f32,
    pub similarity_percent: f64,
}

/// Result of [`rank`]: the filtered hits plus how many raw candidates the
/// index returned.
#[derive(Debug, Clone)]
pub struct Ranked {
    pub hits: Vec<SearchHit>,
    pub raw_count: usize,
}

fn percent(similarity: f32) -> f64 {
    (similarity as f64 * 10_000.0).round() / 100.0
}

/// Over-fetch `result_count * multiplier` candidates, keep those at or above
/// the mode threshold that exist in the catalog, then truncate to
/// `result_count`.
pub fn rank(
    index: &VectorIndex,
    catalog: &Catalog,
    query: &[f32],
    result_count: usize,
    mode: SearchMode,
    thresholds: &ModeThresholds,
) -> Result<Ranked, IndexError> {
    let raw = index.search(query, result_count.saturating_mul(mode.multiplier()))?;
    let raw_count = raw.len();
    let threshold = mode.threshold(thresholds);

    let mut hits: Vec<SearchHit> = raw
        .into_iter()
        .filter(|r| r.score >= threshold)
        .filter_map(|r| {
            let Some(doc) = catalog.get(&r.id) else {
                log::warn!("Index entry '{}' has no catalog document", r.id);
                return None;
            };
            Some(SearchHit {
                rank: 0,
                id: r.id,
                title: doc.title().to_string(),
                description: doc.display_description().to_string(),
                section: doc.section.clone(),
                section_description: doc.section_description.clone(),
                division: doc.division.clone(),
                division_description: doc.division_description.clone(),
                group: doc.group.clone(),
                group_description: doc.group_description.clone(),
                class_code: doc.class.clone(),
                class_description: doc.class_description.clone(),
                subclass: doc.subclass.clone(),
                subclass_description: doc.subclass_description.clone(),
                similarity: r.score,
                similarity_percent: percent(r.score),
            })
        })
        .collect();

    // index output is already ordered; the stable sort keeps tie order
    hits.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    hits.truncate(result_count);

    for (i, hit) in hits.iter_mut().enumerate() {
        hit.rank = i + 1;
    }

    Ok(Ranked { hits, raw_count })
}
