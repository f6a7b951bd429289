//! Retrieval and context assembly.
//!
//! A query moves through fixed stages, and any failure aborts the whole
//! query without partial output:
//!
//! ```text
//! QUERY_RECEIVED → EMBEDDED → SEARCHED → GROUPED → RENDERED
//!        └──────────┴──────────┴─────────▶ FAILED
//! ```
//!
//! 1. Embed the query through the single-input path of [`EmbeddingClient`].
//! 2. Ask the [`Store`] for results strictly above the threshold, highest
//!    first, capped at the limit.
//! 3. Partition by source type. Groups appear in the order their first
//!    member appears in the ranking; members keep ranking order.
//! 4. Render markdown (see [`crate::render`]).

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::embedding::EmbeddingClient;
use crate::error::{Error, Result};
use crate::models::{RetrievalResult, SourceType};
use crate::render::render_context;
use crate::store::Store;

/// Default similarity threshold for interactive search.
pub const DEFAULT_SEARCH_THRESHOLD: f64 = 0.6;
/// Default similarity threshold for generated context documents.
pub const DEFAULT_CONTEXT_THRESHOLD: f64 = 0.7;
/// Default result cap for interactive search.
pub const DEFAULT_SEARCH_LIMIT: usize = 10;
/// Default result cap for generated context documents.
pub const DEFAULT_CONTEXT_LIMIT: usize = 20;

/// Threshold and cap for one similarity query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrievalParams {
    pub threshold: f64,
    pub limit: usize,
}

impl RetrievalParams {
    /// Defaults for interactive search.
    pub fn search() -> Self {
        Self {
            threshold: DEFAULT_SEARCH_THRESHOLD,
            limit: DEFAULT_SEARCH_LIMIT,
        }
    }

    /// Defaults for generated context documents.
    pub fn context() -> Self {
        Self {
            threshold: DEFAULT_CONTEXT_THRESHOLD,
            limit: DEFAULT_CONTEXT_LIMIT,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(Error::Configuration(format!(
                "similarity threshold must be between 0 and 1, got {}",
                self.threshold
            )));
        }
        if self.limit == 0 {
            return Err(Error::Configuration("result limit must be > 0".to_string()));
        }
        Ok(())
    }
}

/// Inputs for a single retrieval.
#[derive(Debug, Clone)]
pub struct SearchRequest<'a> {
    pub query: &'a str,
    /// Restrict results to this project name.
    pub project: Option<&'a str>,
    pub params: RetrievalParams,
}

/// Results sharing one source type, in ranking order.
#[derive(Debug, Clone, Serialize)]
pub struct SourceGroup {
    pub source_type: SourceType,
    pub results: Vec<RetrievalResult>,
}

/// A rendered context document and the groups it was built from.
#[derive(Debug, Clone)]
pub struct ContextDocument {
    pub query: String,
    pub groups: Vec<SourceGroup>,
    pub markdown: String,
}

impl ContextDocument {
    pub fn result_count(&self) -> usize {
        self.groups.iter().map(|g| g.results.len()).sum()
    }
}

/// Embed the query and run the similarity search.
pub async fn retrieve(
    store: &dyn Store,
    client: &EmbeddingClient,
    req: &SearchRequest<'_>,
) -> Result<Vec<RetrievalResult>> {
    req.params.validate()?;
    if req.query.trim().is_empty() {
        return Err(Error::Configuration("query must not be empty".to_string()));
    }

    let query_vec = client.embed_one(req.query).await?;
    debug!(dims = query_vec.len(), "query embedded");

    let results = store
        .similarity_search(&query_vec, req.project, req.params.threshold, req.params.limit)
        .await
        .map_err(Error::store)?;
    debug!(results = results.len(), threshold = req.params.threshold, "similarity search done");

    Ok(results)
}

/// Partition ranked results by source type, ordering groups by first
/// appearance.
pub fn group_by_source_type(results: Vec<RetrievalResult>) -> Vec<SourceGroup> {
    let mut groups: Vec<SourceGroup> = Vec::new();
    for result in results {
        let st = result.chunk.source_type;
        match groups.iter_mut().find(|g| g.source_type == st) {
            Some(group) => group.results.push(result),
            None => groups.push(SourceGroup {
                source_type: st,
                results: vec![result],
            }),
        }
    }
    groups
}

/// Run the full query pipeline and render a context document.
pub async fn assemble_context(
    store: &dyn Store,
    client: &EmbeddingClient,
    req: &SearchRequest<'_>,
    generated_at: DateTime<Utc>,
) -> Result<ContextDocument> {
    let results = retrieve(store, client, req).await?;
    let groups = group_by_source_type(results);
    debug!(groups = groups.len(), "results grouped");
    let markdown = render_context(req.query, &groups, generated_at);
    Ok(ContextDocument {
        query: req.query.to_string(),
        groups,
        markdown,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::EmbeddingProvider;
    use crate::models::{Chunk, ProjectSpec};
    use crate::store::memory::InMemoryStore;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use serde_json::json;

    /// Every query embeds to `[1, 0]`.
    struct AxisProvider {
        fail: bool,
    }

    #[async_trait]
    impl EmbeddingProvider for AxisProvider {
        fn model_name(&self) -> &str {
            "axis"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            if self.fail {
                anyhow::bail!("quota exceeded");
            }
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    fn at_similarity(sim: f32) -> Vec<f32> {
        vec![sim, (1.0 - sim * sim).sqrt()]
    }

    async fn seeded_store() -> InMemoryStore {
        let store = InMemoryStore::new(2);
        let p = store.create_project(&ProjectSpec::named("atlas")).await.unwrap();
        let rows = [
            ("docs/guide.md", SourceType::Docs, 0.9),
            ("src/lib.rs", SourceType::Code, 0.95),
            ("src/main.rs", SourceType::Code, 0.8),
            ("docs/old.md", SourceType::Docs, 0.65),
            ("notes.txt", SourceType::Docs, 0.3),
        ];
        for (path, st, sim) in rows {
            store
                .upsert_chunk(&Chunk {
                    id: String::new(),
                    project_id: p.id.clone(),
                    source_type: st,
                    path: path.to_string(),
                    content: format!("body of {}", path),
                    contextual_content: None,
                    metadata: json!({}),
                    embedding: at_similarity(sim),
                    created_at: 0,
                    updated_at: 0,
                })
                .await
                .unwrap();
        }
        store
    }

    fn request(query: &str, params: RetrievalParams) -> SearchRequest<'_> {
        SearchRequest {
            query,
            project: Some("atlas"),
            params,
        }
    }

    #[tokio::test]
    async fn test_retrieve_uses_threshold_and_order() {
        let store = seeded_store().await;
        let client = EmbeddingClient::new(Box::new(AxisProvider { fail: false }));

        let results = retrieve(&store, &client, &request("how", RetrievalParams::search()))
            .await
            .unwrap();
        let paths: Vec<&str> = results.iter().map(|r| r.chunk.path.as_str()).collect();
        assert_eq!(paths, vec!["src/lib.rs", "docs/guide.md", "src/main.rs", "docs/old.md"]);
        for pair in results.windows(2) {
            assert!(pair[0].similarity >= pair[1].similarity);
        }
    }

    #[tokio::test]
    async fn test_groups_ordered_by_first_appearance() {
        let store = seeded_store().await;
        let client = EmbeddingClient::new(Box::new(AxisProvider { fail: false }));

        let results = retrieve(&store, &client, &request("how", RetrievalParams::search()))
            .await
            .unwrap();
        let groups = group_by_source_type(results);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].source_type, SourceType::Code);
        assert_eq!(groups[0].results.len(), 2);
        assert_eq!(groups[1].source_type, SourceType::Docs);
        assert_eq!(groups[1].results[0].chunk.path, "docs/guide.md");
        assert_eq!(groups[1].results[1].chunk.path, "docs/old.md");
    }

    #[tokio::test]
    async fn test_assemble_context_renders_sections() {
        let store = seeded_store().await;
        let client = EmbeddingClient::new(Box::new(AxisProvider { fail: false }));
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

        let doc = assemble_context(&store, &client, &request("auth flow", RetrievalParams::context()), at)
            .await
            .unwrap();

        assert_eq!(doc.result_count(), 3);
        assert!(doc.markdown.starts_with("# Context for: \"auth flow\"\n"));
        assert!(doc.markdown.contains("### CODE Sources"));
        assert!(doc.markdown.contains("#### Source 1: src/lib.rs"));
        assert!(doc.markdown.contains("Similarity: 95.0%"));
        assert!(!doc.markdown.contains("docs/old.md"));
    }

    #[tokio::test]
    async fn test_embedding_failure_aborts_query() {
        let store = seeded_store().await;
        let client = EmbeddingClient::new(Box::new(AxisProvider { fail: true }));
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

        let err = assemble_context(&store, &client, &request("auth", RetrievalParams::context()), at)
            .await
            .unwrap_err();
        match err {
            Error::Embedding(f) => assert!(f.message.contains("quota exceeded")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_params_validation() {
        assert!(RetrievalParams::search().validate().is_ok());
        assert!(RetrievalParams { threshold: 1.5, limit: 10 }.validate().is_err());
        assert!(RetrievalParams { threshold: -0.1, limit: 10 }.validate().is_err());
        assert!(RetrievalParams { threshold: 0.5, limit: 0 }.validate().is_err());
    }
}
