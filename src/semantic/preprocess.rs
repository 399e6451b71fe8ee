//! Text preprocessing for embedding input.
//!
//! Queries are whitespace-collapsed and trimmed. Catalog descriptions are
//! also truncated to a maximum length with an ellipsis; long queries are
//! left for the model tokenizer to cut.

/// Maximum input length for embedding (characters, not tokens)
const MAX_CONTENT_LENGTH: usize = 512;

/// Ellipsis suffix when content is truncated
const TRUNCATION_SUFFIX: &str = "...";

/// Prepare a search query for embedding. Blank input gives an empty string.
pub fn normalize_query(query: &str) -> String {
    collapse_whitespace(query)
}

/// Prepare a catalog description for embedding.
///
/// Returns `None` when nothing is left after trimming.
pub fn preprocess_passage(text: &str) -> Option<String> {
    let collapsed = collapse_whitespace(text);
    if collapsed.is_empty() {
        return None;
    }
    Some(truncate_content(&collapsed))
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Truncate content to MAX_CONTENT_LENGTH characters, adding ellipsis if truncated.
fn truncate_content(content: &str) -> String {
    if content.chars().count() <= MAX_CONTENT_LENGTH {
        return content.to_string();
    }

    let max_chars = MAX_CONTENT_LENGTH - TRUNCATION_SUFFIX.len();
    let truncated: String = content.chars().take(max_chars).collect();

    format!("{}{}", truncated, TRUNCATION_SUFFIX)
}
