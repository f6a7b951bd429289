//! Source adapter trait.
//!
//! A source adapter turns some external system (a git work tree, a table of
//! records) into [`SourceDocument`]s for one project. Concrete adapters live
//! in the `codectx` app crate.

use async_trait::async_trait;

use crate::models::{Project, SourceDocument};

/// A producer of raw documents for ingestion.
///
/// The outer `Err` means the adapter as a whole failed (unreachable API,
/// missing root). Per-document failures are returned as inner
/// [`Error::SourceRead`](crate::Error::SourceRead) entries so the pipeline
/// can record them and carry on.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Short adapter name used in logs and reports (e.g. `"git"`).
    fn name(&self) -> &str;

    async fn list_documents(&self, project: &Project) -> anyhow::Result<Vec<crate::Result<SourceDocument>>>;
}
