//! Context documents and project reports: `codectx context`, `overview`
//! and `structure`.
//!
//! Every rendered document is printed or written to `--output`, and then
//! recorded in the `contexts` audit table.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use tracing::info;

use codectx_core::embedding::EmbeddingClient;
use codectx_core::models::{ContextRecord, Project, SourceType};
use codectx_core::render::{render_overview, render_structure};
use codectx_core::search::{assemble_context, ContextDocument, RetrievalParams, SearchRequest};
use codectx_core::store::Store;

use crate::config::Config;
use crate::embedding;
use crate::sqlite_store::SqliteStore;

/// Arguments of one context-generation invocation.
#[derive(Debug, Clone, Default)]
pub struct ContextOptions {
    pub query: String,
    pub project: Option<String>,
    pub threshold: Option<f64>,
    pub limit: Option<usize>,
    pub output: Option<PathBuf>,
}

impl ContextOptions {
    pub fn params(&self, config: &Config) -> RetrievalParams {
        let defaults = config.context_params();
        RetrievalParams {
            threshold: self.threshold.unwrap_or(defaults.threshold),
            limit: self.limit.unwrap_or(defaults.limit),
        }
    }
}

/// Write `body` to `path`, creating parent directories.
pub fn write_output(path: &Path, body: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
    }
    std::fs::write(path, body).with_context(|| format!("Failed to write {}", path.display()))?;
    info!(path = %path.display(), bytes = body.len(), "document written");
    Ok(())
}

/// Write `body` to `output` if given, then add it to the audit log.
pub async fn record_document(
    store: &dyn Store,
    title: String,
    body: &str,
    output: Option<&Path>,
    tags: Vec<String>,
) -> Result<()> {
    if let Some(path) = output {
        write_output(path, body)?;
    }
    store
        .record_context(&ContextRecord {
            title,
            body: body.to_string(),
            file_path: output.map(|p| p.display().to_string()),
            tags,
        })
        .await
        .context("recording context document")
}

/// Assemble a context document, write it if requested, and record it.
pub async fn generate_context(
    store: &dyn Store,
    client: &EmbeddingClient,
    config: &Config,
    opts: &ContextOptions,
    generated_at: DateTime<Utc>,
) -> Result<ContextDocument> {
    let req = SearchRequest {
        query: &opts.query,
        project: opts.project.as_deref(),
        params: opts.params(config),
    };
    let doc = assemble_context(store, client, &req, generated_at)
        .await
        .with_context(|| format!("context generation failed for query \"{}\"", opts.query))?;

    record_document(
        store,
        format!("Context: {}", opts.query),
        &doc.markdown,
        opts.output.as_deref(),
        context_tags(opts.project.as_deref()),
    )
    .await?;

    Ok(doc)
}

pub fn context_tags(project: Option<&str>) -> Vec<String> {
    let mut tags = vec!["context".to_string()];
    if let Some(project) = project {
        tags.push(project.to_string());
    }
    tags
}

async fn require_project(store: &dyn Store, name: &str) -> Result<Project> {
    store
        .get_project(name)
        .await?
        .ok_or_else(|| anyhow!("project '{}' not found", name))
}

/// Render and record the overview report for `project`.
pub async fn generate_overview(
    store: &dyn Store,
    project: &str,
    output: Option<&Path>,
    generated_at: DateTime<Utc>,
) -> Result<String> {
    let project = require_project(store, project).await?;
    let counts = store.count_chunks_by_source_type(&project.id).await?;
    let body = render_overview(&project, &counts, generated_at);
    record_document(
        store,
        format!("Overview: {}", project.name),
        &body,
        output,
        vec!["overview".to_string(), project.name.clone()],
    )
    .await?;
    Ok(body)
}

/// Render and record the code-structure report for `project`.
pub async fn generate_structure(
    store: &dyn Store,
    project: &str,
    preview_chars: usize,
    output: Option<&Path>,
    generated_at: DateTime<Utc>,
) -> Result<String> {
    let project = require_project(store, project).await?;
    let chunks = store.get_chunks(&project.id, Some(SourceType::Code)).await?;
    let body = render_structure(&project, &chunks, preview_chars, generated_at);
    record_document(
        store,
        format!("Code structure: {}", project.name),
        &body,
        output,
        vec!["structure".to_string(), project.name.clone()],
    )
    .await?;
    Ok(body)
}

fn print_or_report(body: &str, output: Option<&Path>) {
    match output {
        Some(path) => println!("Written to {}", path.display()),
        None => print!("{}", body),
    }
}

pub async fn run_context(config: &Config, opts: &ContextOptions) -> Result<()> {
    opts.params(config).validate()?;
    let client = embedding::create_client(&config.embedding)?;
    let store = SqliteStore::open(config).await?;
    let doc = generate_context(&store, &client, config, opts, Utc::now()).await;
    store.close().await;
    let doc = doc?;
    print_or_report(&doc.markdown, opts.output.as_deref());
    Ok(())
}

pub async fn run_overview(config: &Config, project: &str, output: Option<&Path>) -> Result<()> {
    let store = SqliteStore::open(config).await?;
    let body = generate_overview(&store, project, output, Utc::now()).await;
    store.close().await;
    print_or_report(&body?, output);
    Ok(())
}

pub async fn run_structure(config: &Config, project: &str, output: Option<&Path>) -> Result<()> {
    let store = SqliteStore::open(config).await?;
    let body = generate_structure(
        &store,
        project,
        config.retrieval.preview_chars,
        output,
        Utc::now(),
    )
    .await;
    store.close().await;
    print_or_report(&body?, output);
    Ok(())
}
