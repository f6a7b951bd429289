//! End-to-end ingestion and retrieval over a temporary SQLite database,
//! with a deterministic keyword embedding provider in place of OpenAI.

use std::fs;
use std::path::Path;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tempfile::TempDir;

use codectx::config::Config;
use codectx::connector_git::GitTreeAdapter;
use codectx::context::{generate_context, generate_overview, generate_structure, ContextOptions};
use codectx::projects::project_lines;
use codectx::search::{search_with, SearchOptions};
use codectx::sqlite_store::SqliteStore;
use codectx_core::chunk::chunk_text;
use codectx_core::embedding::{EmbeddingClient, EmbeddingProvider};
use codectx_core::ingest::{ingest_project, IngestReport};
use codectx_core::models::{Chunk, ProjectSpec, SourceType};
use codectx_core::source::SourceAdapter;
use codectx_core::store::Store;

/// Embeds text as `[#"sqlite", #"batch", 0.1]`.
struct KeywordProvider;

#[async_trait]
impl EmbeddingProvider for KeywordProvider {
    fn model_name(&self) -> &str {
        "keyword"
    }

    fn dims(&self) -> usize {
        3
    }

    async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                let lower = t.to_lowercase();
                vec![
                    lower.matches("sqlite").count() as f32,
                    lower.matches("batch").count() as f32,
                    0.1,
                ]
            })
            .collect())
    }
}

fn client() -> EmbeddingClient {
    EmbeddingClient::new(Box::new(KeywordProvider))
}

fn write(root: &Path, rel: &str, body: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, body).unwrap();
}

/// Three code files and two docs.
fn sample_tree(root: &Path) {
    write(root, "src/main.rs", "fn main() {\n    run();\n}\n");
    write(root, "src/store.rs", "// sqlite sqlite\nfn open() {}\n");
    write(root, "src/batch.rs", "fn batch() {}\n");
    write(root, "README.md", "# Notes\n\nProject notes about sqlite.\n");
    write(root, "docs/guide.md", "# Guide\n\nHow requests are sent in a batch.\n");
}

struct Fixture {
    tmp: TempDir,
    config: Config,
    store: SqliteStore,
}

async fn fixture() -> Fixture {
    let tmp = TempDir::new().unwrap();
    let mut config = Config::default();
    config.db.path = tmp.path().join("data/codectx.sqlite");
    config.embedding.dims = 3;
    let store = SqliteStore::open(&config).await.unwrap();
    Fixture { tmp, config, store }
}

async fn ingest(fx: &Fixture, project: &str, root: &Path) -> IngestReport {
    let adapters: Vec<Box<dyn SourceAdapter>> =
        vec![Box::new(GitTreeAdapter::new(root, &fx.config.sources.git).unwrap())];
    let mut spec = ProjectSpec::named(project);
    spec.tech_stack = vec!["rust".to_string()];
    ingest_project(
        &fx.store,
        &client(),
        &spec,
        &adapters,
        &fx.config.chunk_params().unwrap(),
    )
    .await
    .unwrap()
}

async fn context_rows(store: &SqliteStore) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM contexts")
        .fetch_one(store.pool())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_ingest_reports_every_document() {
    let fx = fixture().await;
    let src = fx.tmp.path().join("atlas");
    sample_tree(&src);

    let report = ingest(&fx, "atlas", &src).await;
    assert!(report.is_clean(), "failures: {:?}", report.failures);
    assert_eq!(report.documents_found, 5);
    assert_eq!(report.documents_ingested, 5);
    assert_eq!(report.chunks_written, 5);

    let project = fx.store.get_project("atlas").await.unwrap().unwrap();
    assert_eq!(project.tech_stack, vec!["rust"]);
}

#[tokio::test]
async fn test_search_filters_by_threshold_and_groups_context() {
    let fx = fixture().await;
    let src = fx.tmp.path().join("atlas");
    sample_tree(&src);
    ingest(&fx, "atlas", &src).await;

    let opts = SearchOptions {
        query: "sqlite".to_string(),
        project: Some("atlas".to_string()),
        context: true,
        ..SearchOptions::default()
    };
    let at = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
    let out = search_with(&fx.store, &client(), &fx.config, &opts, at).await.unwrap();

    assert!(out.contains("Found 2 result(s) for \"sqlite\""));
    assert!(out.contains("README.md"));
    assert!(out.contains("src/store.rs"));
    assert!(!out.contains("src/batch.rs"));
    assert!(!out.contains("src/main.rs"));

    // README.md scores 100% and comes first, so its group leads.
    assert!(out.contains("Generated: 2024-01-02 03:04:05 UTC"));
    let docs = out.find("### DOCS Sources").unwrap();
    let code = out.find("### CODE Sources").unwrap();
    assert!(docs < code);
    assert!(out.contains("Similarity: 100.0%"));

    assert_eq!(context_rows(&fx.store).await, 1);
}

#[tokio::test]
async fn test_search_output_implies_context() {
    let fx = fixture().await;
    let src = fx.tmp.path().join("atlas");
    sample_tree(&src);
    ingest(&fx, "atlas", &src).await;

    let output = fx.tmp.path().join("ctx/sqlite.md");
    let opts = SearchOptions {
        query: "sqlite".to_string(),
        output: Some(output.clone()),
        ..SearchOptions::default()
    };
    let out = search_with(&fx.store, &client(), &fx.config, &opts, Utc::now())
        .await
        .unwrap();

    assert!(out.contains(&format!("Context written to {}", output.display())));
    let written = fs::read_to_string(&output).unwrap();
    assert!(written.starts_with("# Context for: \"sqlite\""));
    assert_eq!(context_rows(&fx.store).await, 1);
}

#[tokio::test]
async fn test_search_project_filter() {
    let fx = fixture().await;
    let atlas = fx.tmp.path().join("atlas");
    sample_tree(&atlas);
    ingest(&fx, "atlas", &atlas).await;

    let other = fx.tmp.path().join("other");
    write(&other, "notes.md", "sqlite everywhere\n");
    ingest(&fx, "other", &other).await;

    let query = [1.0f32, 0.0, 0.1];
    let everywhere = fx.store.similarity_search(&query, None, 0.6, 10).await.unwrap();
    assert_eq!(everywhere.len(), 3);

    let scoped = fx
        .store
        .similarity_search(&query, Some("other"), 0.6, 10)
        .await
        .unwrap();
    assert_eq!(scoped.len(), 1);
    assert_eq!(scoped[0].chunk.path, "notes.md");

    let capped = fx.store.similarity_search(&query, None, 0.6, 2).await.unwrap();
    assert_eq!(capped.len(), 2);
    assert!(capped[0].similarity >= capped[1].similarity);

    let missing = fx
        .store
        .similarity_search(&query, Some("nope"), 0.0, 10)
        .await
        .unwrap();
    assert!(missing.is_empty());
}

#[tokio::test]
async fn test_reingest_replaces_chunks_in_place() {
    let fx = fixture().await;
    let src = fx.tmp.path().join("atlas");
    sample_tree(&src);
    ingest(&fx, "atlas", &src).await;
    let project = fx.store.get_project("atlas").await.unwrap().unwrap();
    let before = fx.store.get_chunks(&project.id, None).await.unwrap();

    write(&src, "src/batch.rs", "fn batch_sqlite() {}\n");
    let report = ingest(&fx, "atlas", &src).await;
    assert!(report.is_clean());

    let after = fx.store.get_chunks(&project.id, None).await.unwrap();
    assert_eq!(before.len(), after.len());

    let batch = after.iter().find(|c| c.path == "src/batch.rs").unwrap();
    let old = before.iter().find(|c| c.path == "src/batch.rs").unwrap();
    assert_eq!(batch.id, old.id);
    assert_eq!(batch.content, "fn batch_sqlite() {}\n");
    assert_eq!(batch.embedding, vec![1.0, 1.0, 0.1]);
}

#[tokio::test]
async fn test_reingest_drops_chunks_of_an_earlier_chunking() {
    let fx = fixture().await;
    let src = fx.tmp.path().join("atlas");
    sample_tree(&src);
    ingest(&fx, "atlas", &src).await;
    let project = fx.store.get_project("atlas").await.unwrap().unwrap();

    let batch_paths = |chunks: Vec<Chunk>| {
        chunks
            .into_iter()
            .map(|c| c.path)
            .filter(|p| p.starts_with("src/batch.rs"))
            .collect::<Vec<_>>()
    };

    let long = "fn batch_step() {}\n".repeat(200);
    let total = chunk_text(&long, &fx.config.chunk_params().unwrap()).len();
    assert!(total > 1);
    write(&src, "src/batch.rs", &long);
    assert!(ingest(&fx, "atlas", &src).await.is_clean());

    let grown = batch_paths(fx.store.get_chunks(&project.id, None).await.unwrap());
    assert_eq!(grown.len(), total);
    assert!(!grown.contains(&"src/batch.rs".to_string()));

    write(&src, "src/batch.rs", "fn batch() {}\n");
    assert!(ingest(&fx, "atlas", &src).await.is_clean());
    let shrunk = batch_paths(fx.store.get_chunks(&project.id, None).await.unwrap());
    assert_eq!(shrunk, vec!["src/batch.rs"]);
    assert_eq!(fx.store.get_chunks(&project.id, None).await.unwrap().len(), 5);
}

#[tokio::test]
async fn test_overview_structure_and_audit_log() {
    let fx = fixture().await;
    let src = fx.tmp.path().join("atlas");
    sample_tree(&src);
    ingest(&fx, "atlas", &src).await;
    let at = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();

    let overview = generate_overview(&fx.store, "atlas", None, at).await.unwrap();
    assert!(overview.contains("# Project Overview: atlas"));
    assert!(overview.contains("- code: 3"));
    assert!(overview.contains("- docs: 2"));
    assert!(overview.contains("Total chunks: 5"));
    assert!(overview.contains("- Tech stack: rust"));

    let out = fx.tmp.path().join("reports/structure.md");
    let structure = generate_structure(&fx.store, "atlas", 500, Some(&out), at)
        .await
        .unwrap();
    assert_eq!(fs::read_to_string(&out).unwrap(), structure);
    assert!(structure.contains("Files: 3"));
    assert!(structure.contains("## src/batch.rs"));
    assert!(structure.contains("## src/main.rs"));
    assert!(!structure.contains("README.md"));

    assert_eq!(context_rows(&fx.store).await, 2);
    let stored_path: Option<String> =
        sqlx::query_scalar("SELECT file_path FROM contexts WHERE title LIKE 'Code structure%'")
            .fetch_one(fx.store.pool())
            .await
            .unwrap();
    assert_eq!(stored_path, Some(out.display().to_string()));

    assert!(generate_overview(&fx.store, "missing", None, at).await.is_err());
}

#[tokio::test]
async fn test_generate_context_writes_output() {
    let fx = fixture().await;
    let src = fx.tmp.path().join("atlas");
    sample_tree(&src);
    ingest(&fx, "atlas", &src).await;

    let output = fx.tmp.path().join("ctx/batching.md");
    let opts = ContextOptions {
        query: "batch".to_string(),
        project: Some("atlas".to_string()),
        output: Some(output.clone()),
        ..ContextOptions::default()
    };
    let doc = generate_context(&fx.store, &client(), &fx.config, &opts, Utc::now())
        .await
        .unwrap();

    assert_eq!(doc.result_count(), 2);
    assert!(doc.groups.iter().all(|g| g.results.iter().all(|r| r.similarity > 0.7)));
    assert_eq!(fs::read_to_string(&output).unwrap(), doc.markdown);
    assert!(doc.markdown.starts_with("# Context for: \"batch\""));
    assert_eq!(context_rows(&fx.store).await, 1);
}

#[tokio::test]
async fn test_delete_cascades_to_chunks() {
    let fx = fixture().await;
    let src = fx.tmp.path().join("atlas");
    sample_tree(&src);
    ingest(&fx, "atlas", &src).await;

    let lines = project_lines(&fx.store).await.unwrap();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].starts_with("atlas  5 chunks"));

    assert!(fx.store.delete_project("atlas").await.unwrap());
    assert!(!fx.store.delete_project("atlas").await.unwrap());

    let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
        .fetch_one(fx.store.pool())
        .await
        .unwrap();
    assert_eq!(remaining, 0);
    assert!(project_lines(&fx.store).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_counts_are_per_project() {
    let fx = fixture().await;
    let src = fx.tmp.path().join("atlas");
    sample_tree(&src);
    ingest(&fx, "atlas", &src).await;
    let project = fx.store.get_project("atlas").await.unwrap().unwrap();

    let counts = fx.store.count_chunks_by_source_type(&project.id).await.unwrap();
    assert_eq!(counts.get(&SourceType::Code), Some(&3));
    assert_eq!(counts.get(&SourceType::Docs), Some(&2));
    assert_eq!(counts.get(&SourceType::Design), None);

    let code = fx
        .store
        .get_chunks(&project.id, Some(SourceType::Code))
        .await
        .unwrap();
    let paths: Vec<&str> = code.iter().map(|c| c.path.as_str()).collect();
    assert_eq!(paths, vec!["src/batch.rs", "src/main.rs", "src/store.rs"]);
}

#[tokio::test]
async fn test_store_enforces_one_embedding_dimension() {
    let fx = fixture().await;
    let src = fx.tmp.path().join("atlas");
    sample_tree(&src);
    ingest(&fx, "atlas", &src).await;
    let project = fx.store.get_project("atlas").await.unwrap().unwrap();

    let narrow = Chunk {
        id: String::new(),
        project_id: project.id.clone(),
        source_type: SourceType::Code,
        path: "src/narrow.rs".to_string(),
        content: "fn narrow() {}".to_string(),
        contextual_content: None,
        metadata: serde_json::json!({}),
        embedding: vec![1.0, 0.0],
        created_at: 0,
        updated_at: 0,
    };
    let err = fx.store.upsert_chunk(&narrow).await.unwrap_err();
    assert!(err.to_string().contains("expected 3"), "{}", err);
    assert!(fx
        .store
        .similarity_search(&[1.0, 0.0], None, 0.0, 10)
        .await
        .is_err());

    // Switching the configured width must not silently hide older chunks.
    let resized = SqliteStore::new(fx.store.pool().clone(), 2);
    let err = resized
        .similarity_search(&[1.0, 0.0], Some("atlas"), 0.0, 10)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("different embedding dimension"), "{}", err);
}
