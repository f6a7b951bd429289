//! Ingestion pipeline: source adapters → chunker → embedding client → store.
//!
//! Ingestion runs for one project at a time. Failures never abort the run;
//! each is logged, recorded in the [`IngestReport`], and skipped:
//!
//! | Failure | Effect |
//! |---------|--------|
//! | Adapter-wide error | adapter skipped, others continue |
//! | Document read error | document skipped |
//! | Embedding failure | whole document skipped |
//! | Store error on one chunk | that chunk skipped, siblings continue |
//!
//! Skipped work is not retried within the same run.

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::chunk::{chunk_text, origin_path, ChunkParams};
use crate::embedding::EmbeddingClient;
use crate::error::{Error, Result};
use crate::models::{Chunk, Project, ProjectSpec, SourceDocument};
use crate::source::SourceAdapter;
use crate::store::Store;

/// One recorded ingestion failure.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestFailure {
    /// Document or chunk origin path, or `adapter:<name>` for adapter-wide
    /// failures.
    pub path: String,
    pub error: String,
}

/// Outcome of an ingestion run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestReport {
    pub project: String,
    pub documents_found: usize,
    pub documents_ingested: usize,
    pub chunks_written: usize,
    pub dry_run: bool,
    pub failures: Vec<IngestFailure>,
}

impl IngestReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn fail(&mut self, path: impl Into<String>, error: impl ToString) {
        self.failures.push(IngestFailure {
            path: path.into(),
            error: error.to_string(),
        });
    }
}

/// Return the project named by `spec`, creating it or merging the supplied
/// attributes into the existing one.
pub async fn ensure_project(store: &dyn Store, spec: &ProjectSpec) -> Result<Project> {
    if spec.name.trim().is_empty() {
        return Err(Error::Configuration("project name must not be empty".to_string()));
    }
    let existing = store.get_project(&spec.name).await.map_err(Error::store)?;
    let project = match existing {
        Some(_) => store.update_project(spec).await.map_err(Error::store)?,
        None => {
            info!(project = %spec.name, "creating project");
            store.create_project(spec).await.map_err(Error::store)?
        }
    };
    Ok(project)
}

/// Ingest every document the adapters produce into `spec`'s project.
///
/// Only project resolution errors are returned as `Err`; everything else is
/// recorded in the report.
pub async fn ingest_project(
    store: &dyn Store,
    client: &EmbeddingClient,
    spec: &ProjectSpec,
    adapters: &[Box<dyn SourceAdapter>],
    chunking: &ChunkParams,
) -> Result<IngestReport> {
    let project = ensure_project(store, spec).await?;
    let mut report = IngestReport {
        project: project.name.clone(),
        ..IngestReport::default()
    };

    for adapter in adapters {
        let docs = match adapter.list_documents(&project).await {
            Ok(docs) => docs,
            Err(e) => {
                warn!(adapter = adapter.name(), error = %format!("{:#}", e), "source adapter failed");
                report.fail(format!("adapter:{}", adapter.name()), format!("{:#}", e));
                continue;
            }
        };
        info!(adapter = adapter.name(), documents = docs.len(), "listed documents");
        ingest_documents(store, client, &project, docs, chunking, &mut report).await;
    }

    info!(
        project = %project.name,
        documents = report.documents_ingested,
        chunks = report.chunks_written,
        failures = report.failures.len(),
        "ingestion finished"
    );
    Ok(report)
}

/// List documents and count chunks without embedding or writing anything.
pub async fn survey_project(
    store: &dyn Store,
    spec: &ProjectSpec,
    adapters: &[Box<dyn SourceAdapter>],
    chunking: &ChunkParams,
) -> Result<IngestReport> {
    let project = match store.get_project(&spec.name).await.map_err(Error::store)? {
        Some(p) => p,
        None => spec.merge_into(&unsaved_project(&spec.name), 0),
    };
    let mut report = IngestReport {
        project: project.name.clone(),
        dry_run: true,
        ..IngestReport::default()
    };

    for adapter in adapters {
        let docs = match adapter.list_documents(&project).await {
            Ok(docs) => docs,
            Err(e) => {
                report.fail(format!("adapter:{}", adapter.name()), format!("{:#}", e));
                continue;
            }
        };
        for doc in docs {
            report.documents_found += 1;
            match doc {
                Ok(doc) => {
                    let n = chunk_text(&doc.text, chunking).len();
                    if n > 0 {
                        report.documents_ingested += 1;
                        report.chunks_written += n;
                    }
                }
                Err(e) => report.fail(failure_path(&e, adapter.name()), &e),
            }
        }
    }
    Ok(report)
}

fn unsaved_project(name: &str) -> Project {
    Project {
        id: String::new(),
        name: name.to_string(),
        description: String::new(),
        tech_stack: Vec::new(),
        repo_url: None,
        config: json!({}),
        created_at: 0,
        updated_at: 0,
    }
}

fn failure_path(err: &Error, adapter: &str) -> String {
    match err {
        Error::SourceRead { path, .. } => path.clone(),
        _ => format!("adapter:{}", adapter),
    }
}

/// Chunk, embed, and store a batch of documents for `project`.
pub async fn ingest_documents(
    store: &dyn Store,
    client: &EmbeddingClient,
    project: &Project,
    docs: Vec<Result<SourceDocument>>,
    chunking: &ChunkParams,
    report: &mut IngestReport,
) {
    for doc in docs {
        report.documents_found += 1;
        let doc = match doc {
            Ok(doc) => doc,
            Err(e) => {
                let path = failure_path(&e, "unknown");
                warn!(path = %path, error = %e, "skipping unreadable document");
                report.fail(path, &e);
                continue;
            }
        };

        let pieces = chunk_text(&doc.text, chunking);
        if pieces.is_empty() {
            debug!(path = %doc.path, "empty document, nothing to ingest");
            prune_superseded(store, project, &doc.path, 0, report).await;
            continue;
        }

        let texts: Vec<String> = pieces.iter().map(|p| p.text.clone()).collect();
        let vectors = match client.embed_many(&texts).await {
            Ok(v) => v,
            Err(e) => {
                warn!(path = %doc.path, offset = e.offset, error = %e.message, "embedding failed, document skipped");
                report.fail(doc.path.clone(), Error::from(e));
                continue;
            }
        };

        let total = pieces.len();
        let mut written = 0;
        for (i, (piece, embedding)) in pieces.into_iter().zip(vectors).enumerate() {
            let ordinal = i + 1;
            let chunk = Chunk {
                id: String::new(),
                project_id: project.id.clone(),
                source_type: doc.source_type,
                path: origin_path(&doc.path, ordinal, total),
                content: piece.text,
                contextual_content: None,
                metadata: chunk_metadata(&doc, ordinal, total, piece.start, piece.end),
                embedding,
                created_at: 0,
                updated_at: 0,
            };
            match store.upsert_chunk(&chunk).await {
                Ok(_) => written += 1,
                Err(e) => {
                    let err = Error::store(e);
                    warn!(path = %chunk.path, error = %err, "failed to store chunk");
                    report.fail(chunk.path.clone(), err);
                }
            }
        }

        if written > 0 {
            report.documents_ingested += 1;
            report.chunks_written += written;
        }
        // Only a complete write replaces the previous chunking.
        if written == total {
            prune_superseded(store, project, &doc.path, total, report).await;
        }
        debug!(path = %doc.path, chunks = written, "document ingested");
    }
}

async fn prune_superseded(store: &dyn Store, project: &Project, file: &str, total: usize, report: &mut IngestReport) {
    match store.prune_chunks(&project.id, file, total).await {
        Ok(0) => {}
        Ok(n) => debug!(path = %file, removed = n, "removed superseded chunks"),
        Err(e) => {
            let err = Error::store(e);
            warn!(path = %file, error = %err, "failed to remove superseded chunks");
            report.fail(file.to_string(), err);
        }
    }
}

fn chunk_metadata(doc: &SourceDocument, ordinal: usize, total: usize, start: usize, end: usize) -> Value {
    let mut map = doc.metadata.as_object().cloned().unwrap_or_default();
    if let Some(mtime) = doc.modified_at {
        map.insert("modified_at".to_string(), json!(mtime.to_rfc3339()));
    }
    map.insert("chunk_index".to_string(), json!(ordinal));
    map.insert("chunk_total".to_string(), json!(total));
    map.insert("byte_start".to_string(), json!(start));
    map.insert("byte_end".to_string(), json!(end));
    Value::Object(map)
}
