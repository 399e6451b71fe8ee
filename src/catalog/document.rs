//! A single NIC code record as stored in the catalog JSON.
//!
//! The JSON comes from spreadsheet and MongoDB exports, so field values are
//! loosely typed: codes may be strings or numbers, ids may be plain strings or
//! `{"$oid": "..."}` objects, and missing cells show up as `nan`.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Cell values that mean "empty" in the exported data.
const PLACEHOLDERS: [&str; 6] = ["nan", "n/a", "na", "none", "null", "undefined"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(rename = "_id", default, deserialize_with = "de_id")]
    pub id: String,

    #[serde(rename = "Section", default, deserialize_with = "de_code", skip_serializing_if = "String::is_empty")]
    pub section: String,
    #[serde(rename = "Section_Description", default, deserialize_with = "de_code", skip_serializing_if = "String::is_empty")]
    pub section_description: String,

    #[serde(rename = "Division", alias = "Divison", default, deserialize_with = "de_code", skip_serializing_if = "String::is_empty")]
    pub division: String,
    #[serde(rename = "Division_Description", default, deserialize_with = "de_code", skip_serializing_if = "String::is_empty")]
    pub division_description: String,

    #[serde(rename = "Group", default, deserialize_with = "de_code", skip_serializing_if = "String::is_empty")]
    pub group: String,
    #[serde(rename = "Group_Description", default, deserialize_with = "de_code", skip_serializing_if = "String::is_empty")]
    pub group_description: String,

    #[serde(rename = "Class", default, deserialize_with = "de_code", skip_serializing_if = "String::is_empty")]
    pub class: String,
    #[serde(rename = "Class_Description", default, deserialize_with = "de_code", skip_serializing_if = "String::is_empty")]
    pub class_description: String,

    #[serde(rename = "Sub-Class", default, deserialize_with = "de_code", skip_serializing_if = "String::is_empty")]
    pub subclass: String,
    #[serde(rename = "Sub-Class_Description", default, deserialize_with = "de_code", skip_serializing_if = "String::is_empty")]
    pub subclass_description: String,

    /// Free text description (the only text column in the Hindi data)
    #[serde(rename = "Description", default, deserialize_with = "de_code", skip_serializing_if = "String::is_empty")]
    pub description: String,

    /// Precomputed embedding. An empty vector marks a value that was present
    /// but unusable.
    #[serde(
        rename = "Vector-Embedding_SubClass",
        alias = "embeddings",
        default,
        deserialize_with = "de_embedding",
        skip_serializing_if = "Option::is_none"
    )]
    pub embedding: Option<Vec<f32>>,

    /// Columns this crate does not interpret, kept so saving is lossless.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl Document {
    /// Text that gets embedded for this record.
    pub fn embedding_text(&self) -> Option<&str> {
        [
            &self.subclass_description,
            &self.class_description,
            &self.description,
        ]
        .into_iter()
        .map(|s| s.trim())
        .find(|s| !s.is_empty())
    }

    pub fn title(&self) -> &str {
        self.embedding_text().unwrap_or("No Title")
    }

    pub fn display_description(&self) -> &str {
        self.embedding_text()
            .unwrap_or("No description available")
    }

    /// Embedding that can go into the index: non-empty and finite.
    pub fn usable_embedding(&self) -> Option<&[f32]> {
        self.embedding
            .as_deref()
            .filter(|v| !v.is_empty() && v.iter().all(|x| x.is_finite()))
    }
}

/// Normalise a raw cell to a string, mapping placeholders to "".
pub fn clean_cell(raw: &str) -> String {
    if is_placeholder(raw) {
        String::new()
    } else {
        raw.trim().to_string()
    }
}

pub fn is_placeholder(raw: &str) -> bool {
    let trimmed = raw.trim();
    PLACEHOLDERS.iter().any(|p| trimmed.eq_ignore_ascii_case(p))
}

fn value_to_code(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => clean_cell(s),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => match n.as_f64() {
            // spreadsheet exports turn integer codes into floats (1011.0)
            Some(f) if !n.is_i64() && !n.is_u64() && f.is_finite() && f.fract() == 0.0 => {
                format!("{}", f as i64)
            }
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}

fn de_code<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(value_to_code(&value))
}

fn de_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let id = match &value {
        Value::Object(map) => map
            .get("$oid")
            .map(value_to_code)
            .unwrap_or_else(|| value.to_string()),
        other => value_to_code(other),
    };
    Ok(id)
}

fn de_embedding<'de, D>(deserializer: D) -> Result<Option<Vec<f32>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let embedding = match value {
        Value::Null => None,
        Value::Array(items) => {
            let parsed: Option<Vec<f32>> = items
                .iter()
                .map(|item| item.as_f64().map(|f| f as f32))
                .collect();
            Some(parsed.unwrap_or_default())
        }
        _ => Some(Vec::new()),
    };
    Ok(embedding)
}
