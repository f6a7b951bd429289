//! Core data models used throughout codectx.
//!
//! These types represent the projects, documents, chunks, and retrieval
//! results that flow through the ingestion and retrieval pipeline.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Coarse category of a chunk's origin, used to group retrieval results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Code,
    Docs,
    Issues,
    Design,
    Config,
}

impl SourceType {
    pub const ALL: [SourceType; 5] = [
        SourceType::Code,
        SourceType::Docs,
        SourceType::Issues,
        SourceType::Design,
        SourceType::Config,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Code => "code",
            SourceType::Docs => "docs",
            SourceType::Issues => "issues",
            SourceType::Design => "design",
            SourceType::Config => "config",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "code" => Ok(SourceType::Code),
            "docs" => Ok(SourceType::Docs),
            "issues" => Ok(SourceType::Issues),
            "design" => Ok(SourceType::Design),
            "config" => Ok(SourceType::Config),
            other => Err(crate::Error::Configuration(format!(
                "unknown source type '{}'. Must be code, docs, issues, design, or config.",
                other
            ))),
        }
    }
}

/// A stored project. Identity is the unique `name`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub description: String,
    pub tech_stack: Vec<String>,
    pub repo_url: Option<String>,
    /// Open configuration map (always a JSON object).
    pub config: serde_json::Value,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Attributes supplied when creating or updating a project.
///
/// On update, empty/`None` fields leave the stored value untouched and
/// `config` keys are merged into the existing map.
#[derive(Debug, Clone, Default)]
pub struct ProjectSpec {
    pub name: String,
    pub description: Option<String>,
    pub tech_stack: Vec<String>,
    pub repo_url: Option<String>,
    pub config: serde_json::Map<String, serde_json::Value>,
}

impl ProjectSpec {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Apply this spec on top of an existing project, returning the merged
    /// project with a fresh `updated_at`.
    pub fn merge_into(&self, existing: &Project, now: i64) -> Project {
        let mut merged = existing.clone();
        if let Some(desc) = self.description.as_ref().filter(|d| !d.trim().is_empty()) {
            merged.description = desc.clone();
        }
        if !self.tech_stack.is_empty() {
            merged.tech_stack = self.tech_stack.clone();
        }
        if self.repo_url.is_some() {
            merged.repo_url = self.repo_url.clone();
        }
        if !self.config.is_empty() {
            let mut map = merged.config.as_object().cloned().unwrap_or_default();
            for (k, v) in &self.config {
                map.insert(k.clone(), v.clone());
            }
            merged.config = serde_json::Value::Object(map);
        }
        merged.updated_at = now;
        merged
    }
}

/// Raw document produced by a source adapter before chunking.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub source_type: SourceType,
    /// File path or record locator, used as the chunk origin path.
    pub path: String,
    pub text: String,
    pub modified_at: Option<DateTime<Utc>>,
    /// Adapter-specific metadata (extension, record id, ...). A JSON object.
    pub metadata: serde_json::Value,
}

/// A unit of retrievable content.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chunk {
    pub id: String,
    pub project_id: String,
    pub source_type: SourceType,
    /// Origin path, suffixed with `#chunk-<n>` when the source produced
    /// several chunks.
    pub path: String,
    pub content: String,
    /// Reserved enrichment slot; never populated by ingestion.
    pub contextual_content: Option<String>,
    pub metadata: serde_json::Value,
    #[serde(skip)]
    pub embedding: Vec<f32>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A chunk returned by a similarity query with its score.
///
/// The chunk's `embedding` is left empty.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalResult {
    pub chunk: Chunk,
    /// `1 − cosine_distance(query, chunk)`.
    pub similarity: f64,
}

/// An audit record of a rendered context document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextRecord {
    pub title: String,
    pub body: String,
    pub file_path: Option<String>,
    pub tags: Vec<String>,
}
