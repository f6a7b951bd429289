//! `codectx ingest`: wire config, adapters, embedding client and the
//! SQLite store into the core ingestion pipeline.

use std::path::PathBuf;

use anyhow::{bail, Result};
use tracing::info;

use codectx_core::ingest::{ingest_project, survey_project, IngestReport};
use codectx_core::models::ProjectSpec;
use codectx_core::source::SourceAdapter;

use crate::config::Config;
use crate::connector_git::GitTreeAdapter;
use crate::connector_table::AirtableAdapter;
use crate::embedding;
use crate::sqlite_store::SqliteStore;

/// Arguments of one ingest invocation.
#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    pub project: String,
    pub description: Option<String>,
    pub tech_stack: Vec<String>,
    pub path: Option<PathBuf>,
    pub repo_url: Option<String>,
    pub airtable_tables: Vec<String>,
    pub dry_run: bool,
}

impl IngestOptions {
    pub fn project_spec(&self) -> ProjectSpec {
        ProjectSpec {
            name: self.project.clone(),
            description: self.description.clone(),
            tech_stack: self
                .tech_stack
                .iter()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
            repo_url: self.repo_url.clone(),
            config: serde_json::Map::new(),
        }
    }
}

/// Build the source adapters for an ingest run.
///
/// A work-tree path (defaulting to the current directory when no other
/// source is requested) yields the git adapter; Airtable tables from the
/// command line, or else from `[sources.airtable]`, yield the Airtable
/// adapter.
pub fn build_adapters(config: &Config, opts: &IngestOptions) -> Result<Vec<Box<dyn SourceAdapter>>> {
    let mut adapters: Vec<Box<dyn SourceAdapter>> = Vec::new();

    let tables = if opts.airtable_tables.is_empty() {
        config
            .sources
            .airtable
            .as_ref()
            .map(|a| a.tables.clone())
            .unwrap_or_default()
    } else {
        opts.airtable_tables.clone()
    };

    let root = match (&opts.path, tables.is_empty()) {
        (Some(path), _) => Some(path.clone()),
        (None, true) => Some(PathBuf::from(".")),
        (None, false) => None,
    };
    if let Some(root) = root {
        adapters.push(Box::new(GitTreeAdapter::new(root, &config.sources.git)?));
    }

    if !tables.is_empty() {
        let airtable = config.sources.airtable.clone().unwrap_or_default();
        adapters.push(Box::new(AirtableAdapter::from_env(&airtable, tables)?));
    }

    Ok(adapters)
}

pub async fn run_ingest(config: &Config, opts: &IngestOptions) -> Result<()> {
    let chunking = config.chunk_params()?;
    let spec = opts.project_spec();
    let adapters = build_adapters(config, opts)?;
    let client = if opts.dry_run {
        None
    } else {
        Some(embedding::create_client(&config.embedding)?)
    };
    let store = SqliteStore::open(config).await?;

    let report = match &client {
        None => survey_project(&store, &spec, &adapters, &chunking).await?,
        Some(client) => {
            info!(project = %spec.name, model = client.model_name(), "starting ingestion");
            ingest_project(&store, client, &spec, &adapters, &chunking).await?
        }
    };

    print_report(&report);
    store.close().await;

    if !report.is_clean() {
        bail!(
            "ingestion of '{}' finished with {} failure(s)",
            report.project,
            report.failures.len()
        );
    }
    Ok(())
}

pub fn print_report(report: &IngestReport) {
    if report.dry_run {
        println!("ingest {} (dry-run)", report.project);
        println!("  documents found: {}", report.documents_found);
        println!("  estimated chunks: {}", report.chunks_written);
    } else {
        println!("ingest {}", report.project);
        println!("  documents found: {}", report.documents_found);
        println!("  documents ingested: {}", report.documents_ingested);
        println!("  chunks written: {}", report.chunks_written);
    }
    if report.failures.is_empty() {
        println!("ok");
    } else {
        println!("  failures: {}", report.failures.len());
        for failure in &report.failures {
            println!("    {}: {}", failure.path, failure.error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_spec_trims_tech_stack() {
        let opts = IngestOptions {
            project: "atlas".to_string(),
            tech_stack: vec![" rust".to_string(), "".to_string(), "sqlite ".to_string()],
            ..IngestOptions::default()
        };
        let spec = opts.project_spec();
        assert_eq!(spec.tech_stack, vec!["rust".to_string(), "sqlite".to_string()]);
        assert!(spec.description.is_none());
    }

    #[test]
    fn test_default_adapter_is_current_dir() {
        let opts = IngestOptions {
            project: "atlas".to_string(),
            ..IngestOptions::default()
        };
        let adapters = build_adapters(&Config::default(), &opts).unwrap();
        assert_eq!(adapters.len(), 1);
        assert_eq!(adapters[0].name(), "git");
    }

    #[test]
    fn test_airtable_without_base_id_fails_early() {
        let opts = IngestOptions {
            project: "atlas".to_string(),
            airtable_tables: vec!["Issues".to_string()],
            ..IngestOptions::default()
        };
        assert!(build_adapters(&Config::default(), &opts).is_err());
    }
}
