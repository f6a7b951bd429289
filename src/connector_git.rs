//! Git work-tree source adapter.
//!
//! Lists the files tracked in the index with `git ls-files --cached`;
//! untracked files are never ingested. When the root is not inside a git
//! work tree the adapter falls back to a plain directory walk and logs a
//! warning.
//!
//! Every candidate then passes three filters:
//!
//! | Filter | Default |
//! |--------|---------|
//! | Extension allow-list | common source, doc and config extensions |
//! | Glob deny-list | `node_modules`, `target`, `dist`, `build`, `.git`, lock files, minified assets |
//! | Size ceiling | 1 MiB |
//!
//! Each surviving file becomes one [`SourceDocument`] whose source type is
//! classified from its path (see [`classify_path`]).

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::{debug, warn};
use walkdir::WalkDir;

use codectx_core::models::{Project, SourceDocument, SourceType};
use codectx_core::source::SourceAdapter;
use codectx_core::Error;

use crate::config::GitSourceConfig;

/// Directory names whose contents are design records.
const DESIGN_DIRS: &[&str] = &["design", "designs", "adr", "adrs", "decisions", "rfcs"];
const DOC_EXTENSIONS: &[&str] = &["md", "mdx", "markdown", "txt", "rst", "adoc"];
const CONFIG_EXTENSIONS: &[&str] = &["toml", "yaml", "yml", "json", "ini", "cfg", "conf", "env", "xml"];

/// Source adapter over the files of a local work tree.
pub struct GitTreeAdapter {
    root: PathBuf,
    extensions: Vec<String>,
    exclude: GlobSet,
    max_file_bytes: u64,
}

impl GitTreeAdapter {
    pub fn new(root: impl Into<PathBuf>, config: &GitSourceConfig) -> Result<Self> {
        Ok(Self {
            root: root.into(),
            extensions: config
                .extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            exclude: build_globset(&config.exclude_globs)?,
            max_file_bytes: config.max_file_bytes,
        })
    }

    /// Relative paths (forward slashes) of every file that passes the
    /// filters, sorted.
    pub fn candidate_files(&self) -> Result<Vec<String>> {
        if !self.root.is_dir() {
            bail!("source root '{}' is not a directory", self.root.display());
        }

        let listed = match git_ls_files(&self.root) {
            Ok(files) => files,
            Err(e) => {
                warn!(
                    root = %self.root.display(),
                    error = %format!("{:#}", e),
                    "not a git work tree, walking the directory instead"
                );
                walk_files(&self.root)?
            }
        };

        let mut files: Vec<String> = listed
            .into_iter()
            .filter(|rel| self.is_selected(rel))
            .collect();
        files.sort();
        files.dedup();
        Ok(files)
    }

    fn is_selected(&self, rel: &str) -> bool {
        if self.exclude.is_match(rel) {
            return false;
        }
        let ext = match extension_of(rel) {
            Some(ext) => ext,
            None => return false,
        };
        if !self.extensions.iter().any(|allowed| *allowed == ext) {
            return false;
        }

        let full = self.root.join(rel);
        match std::fs::metadata(&full) {
            Ok(meta) if meta.is_file() => {
                if meta.len() > self.max_file_bytes {
                    debug!(path = rel, bytes = meta.len(), "skipping oversized file");
                    false
                } else {
                    true
                }
            }
            _ => false,
        }
    }

    fn read_document(&self, rel: &str) -> codectx_core::Result<SourceDocument> {
        let full = self.root.join(rel);
        let bytes = std::fs::read(&full).map_err(|e| Error::SourceRead {
            path: rel.to_string(),
            message: e.to_string(),
        })?;
        let text = String::from_utf8(bytes).map_err(|_| Error::SourceRead {
            path: rel.to_string(),
            message: "file is not valid UTF-8".to_string(),
        })?;

        let modified_at: Option<DateTime<Utc>> = std::fs::metadata(&full)
            .and_then(|m| m.modified())
            .ok()
            .map(DateTime::<Utc>::from);

        Ok(SourceDocument {
            source_type: classify_path(rel),
            path: rel.to_string(),
            text,
            modified_at,
            metadata: serde_json::json!({
                "extension": extension_of(rel).unwrap_or_default(),
            }),
        })
    }
}

#[async_trait]
impl SourceAdapter for GitTreeAdapter {
    fn name(&self) -> &str {
        "git"
    }

    async fn list_documents(&self, project: &Project) -> Result<Vec<codectx_core::Result<SourceDocument>>> {
        let files = self.candidate_files()?;
        debug!(project = %project.name, files = files.len(), "git tree scanned");
        Ok(files.iter().map(|rel| self.read_document(rel)).collect())
    }
}

/// Source type of a work-tree path.
///
/// Files under a design-record directory (`design/`, `adr/`, `decisions/`,
/// `rfcs/`, …) or named `adr-*` are `design`; markdown and text are
/// `docs`; configuration formats are `config`; everything else is `code`.
pub fn classify_path(rel: &str) -> SourceType {
    let lower = rel.to_ascii_lowercase();
    let mut segments: Vec<&str> = lower.split('/').collect();
    let file_name = segments.pop().unwrap_or_default();

    if segments.iter().any(|s| DESIGN_DIRS.contains(s)) || file_name.starts_with("adr-") {
        return SourceType::Design;
    }

    match extension_of(file_name).as_deref() {
        Some(ext) if DOC_EXTENSIONS.contains(&ext) => SourceType::Docs,
        Some(ext) if CONFIG_EXTENSIONS.contains(&ext) => SourceType::Config,
        _ => SourceType::Code,
    }
}

fn extension_of(rel: &str) -> Option<String> {
    Path::new(rel)
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
}

fn git_ls_files(root: &Path) -> Result<Vec<String>> {
    let output = Command::new("git")
        .args(["ls-files", "-z", "--cached"])
        .current_dir(root)
        .output()
        .with_context(|| "Failed to execute 'git ls-files'. Is git installed?")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("git ls-files failed: {}", stderr.trim());
    }

    Ok(String::from_utf8_lossy(&output.stdout)
        .split('\0')
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect())
}

fn walk_files(root: &Path) -> Result<Vec<String>> {
    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git");
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
        files.push(relative.to_string_lossy().replace('\\', "/"));
    }
    Ok(files)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob pattern: {}", pattern))?);
    }
    Ok(builder.build()?)
}
