//! `codectx search`: ranked similarity results, optionally rendered as a
//! context document.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use codectx_core::embedding::EmbeddingClient;
use codectx_core::render::{render_context, render_result_list};
use codectx_core::search::{group_by_source_type, retrieve, RetrievalParams, SearchRequest};
use codectx_core::store::Store;

use crate::config::Config;
use crate::context::{context_tags, record_document};
use crate::embedding;
use crate::sqlite_store::SqliteStore;

/// Arguments of one search invocation.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub query: String,
    pub project: Option<String>,
    pub threshold: Option<f64>,
    pub limit: Option<usize>,
    /// Also render (and record) a context document from the same query.
    pub context: bool,
    /// Write the context document here. Implies `context`.
    pub output: Option<PathBuf>,
}

impl SearchOptions {
    pub fn wants_context(&self) -> bool {
        self.context || self.output.is_some()
    }

    pub fn params(&self, config: &Config) -> RetrievalParams {
        let defaults = config.search_params();
        RetrievalParams {
            threshold: self.threshold.unwrap_or(defaults.threshold),
            limit: self.limit.unwrap_or(defaults.limit),
        }
    }
}

/// Run a search against `store` and return the text to print.
pub async fn search_with(
    store: &dyn Store,
    client: &EmbeddingClient,
    config: &Config,
    opts: &SearchOptions,
    generated_at: DateTime<Utc>,
) -> Result<String> {
    let params = opts.params(config);
    let req = SearchRequest {
        query: &opts.query,
        project: opts.project.as_deref(),
        params,
    };
    let results = retrieve(store, client, &req)
        .await
        .with_context(|| format!("search failed for query \"{}\"", opts.query))?;
    let mut out = render_result_list(&opts.query, &results, config.retrieval.preview_chars);

    if opts.wants_context() {
        let groups = group_by_source_type(results);
        let markdown = render_context(&opts.query, &groups, generated_at);
        record_document(
            store,
            format!("Context: {}", opts.query),
            &markdown,
            opts.output.as_deref(),
            context_tags(opts.project.as_deref()),
        )
        .await?;
        match &opts.output {
            Some(path) => out.push_str(&format!("\nContext written to {}\n", path.display())),
            None => {
                out.push('\n');
                out.push_str(&markdown);
            }
        }
    }

    Ok(out)
}

pub async fn run_search(config: &Config, opts: &SearchOptions) -> Result<()> {
    opts.params(config).validate()?;
    let client = embedding::create_client(&config.embedding)?;
    let store = SqliteStore::open(config).await?;
    let out = search_with(&store, &client, config, opts, Utc::now()).await;
    store.close().await;
    print!("{}", out?);
    Ok(())
}
