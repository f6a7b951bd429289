//! Storage abstraction for codectx.
//!
//! The [`Store`] trait defines every persistence and nearest-neighbor
//! operation the ingestion and retrieval pipeline needs, so backends are
//! pluggable (SQLite in the app crate, in-memory here).
//!
//! Implementations must be `Send + Sync` to work with async runtimes.
//! Each call is atomic on its own; callers never rely on multi-call
//! transactions.

pub mod memory;

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Chunk, ContextRecord, Project, ProjectSpec, RetrievalResult, SourceType};

/// Abstract storage backend for codectx.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`get_project`](Store::get_project) | Look up a project by name |
/// | [`create_project`](Store::create_project) | Create a project |
/// | [`update_project`](Store::update_project) | Merge new attributes into a project |
/// | [`list_projects`](Store::list_projects) | All projects, by name |
/// | [`delete_project`](Store::delete_project) | Delete a project and its chunks |
/// | [`upsert_chunk`](Store::upsert_chunk) | Insert or replace the chunk at (project, path) |
/// | [`prune_chunks`](Store::prune_chunks) | Drop a file's chunks left over from an earlier chunking |
/// | [`similarity_search`](Store::similarity_search) | Threshold-filtered nearest neighbors |
/// | [`get_chunks`](Store::get_chunks) | A project's chunks, ordered by path |
/// | [`count_chunks_by_source_type`](Store::count_chunks_by_source_type) | Per-type chunk counts |
/// | [`record_context`](Store::record_context) | Audit a rendered context document |
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_project(&self, name: &str) -> Result<Option<Project>>;

    /// Create a new project. Fails if the name is already taken.
    async fn create_project(&self, spec: &ProjectSpec) -> Result<Project>;

    /// Merge `spec` into the existing project of the same name.
    ///
    /// Fails if no such project exists.
    async fn update_project(&self, spec: &ProjectSpec) -> Result<Project>;

    async fn list_projects(&self) -> Result<Vec<Project>>;

    /// Delete a project and, transitively, all of its chunks.
    ///
    /// Returns `false` if the project did not exist.
    async fn delete_project(&self, name: &str) -> Result<bool>;

    /// Insert a chunk, or replace the chunk already stored at the same
    /// (project, path). Returns the stored chunk id.
    ///
    /// Fails if the embedding does not have the store's dimension.
    async fn upsert_chunk(&self, chunk: &Chunk) -> Result<String>;

    /// Delete the chunks of `file` that a chunking into `total` pieces no
    /// longer produces (see [`crate::chunk::is_superseded`]). Returns the
    /// number deleted.
    async fn prune_chunks(&self, project_id: &str, file: &str, total: usize) -> Result<usize>;

    /// Chunks scoring strictly above `threshold`, highest first, at most
    /// `limit`. `project` filters by project name. Fails if the query
    /// vector does not have the store's dimension.
    async fn similarity_search(
        &self,
        query_vec: &[f32],
        project: Option<&str>,
        threshold: f64,
        limit: usize,
    ) -> Result<Vec<RetrievalResult>>;

    /// A project's chunks ordered by path, optionally of one source type.
    async fn get_chunks(&self, project_id: &str, source_type: Option<SourceType>) -> Result<Vec<Chunk>>;

    async fn count_chunks_by_source_type(&self, project_id: &str) -> Result<BTreeMap<SourceType, usize>>;

    async fn record_context(&self, record: &ContextRecord) -> Result<()>;
}

/// Fail unless a vector has the corpus dimension.
///
/// `what` names the vector in the error (a chunk path or `query`).
pub fn check_dims(expected: usize, actual: usize, what: &str) -> Result<()> {
    if actual != expected {
        anyhow::bail!(
            "embedding for {} has {} dimensions, expected {}",
            what,
            actual,
            expected
        );
    }
    Ok(())
}

/// Apply the retrieval contract to scored candidates: keep scores strictly
/// above `threshold`, order by descending score, cap at `limit`.
///
/// Ties keep candidate order.
pub fn rank_candidates(
    mut candidates: Vec<RetrievalResult>,
    threshold: f64,
    limit: usize,
) -> Vec<RetrievalResult> {
    candidates.retain(|r| r.similarity > threshold);
    candidates.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    candidates.truncate(limit);
    candidates
}
