//! Markdown rendering for context documents and project reports.
//!
//! All renderers are pure: the generation timestamp is passed in, so the
//! same inputs always produce the same text.
//!
//! # Context document layout
//!
//! ```text
//! # Context for: "<query>"
//!
//! Generated: 2024-05-01 12:00:00 UTC
//!
//! ### CODE Sources
//!
//! #### Source 1: src/lib.rs
//! Similarity: 95.0%
//!
//! <raw chunk content in a code fence>
//! ```
//!
//! Source numbering restarts at 1 in every group.

use std::collections::BTreeMap;
use std::fmt::Write;

use chrono::{DateTime, Utc};

use crate::chunk::split_chunk_ordinal;
use crate::models::{Chunk, Project, RetrievalResult, SourceType};
use crate::search::SourceGroup;

/// Default preview length for the code-structure report.
pub const DEFAULT_PREVIEW_CHARS: usize = 500;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

fn format_generated(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

fn format_ts(ts: i64) -> String {
    DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format(TIMESTAMP_FORMAT).to_string())
        .unwrap_or_else(|| ts.to_string())
}

/// A code fence longer than any backtick run inside `content`.
fn fence_for(content: &str) -> String {
    let mut longest = 0;
    let mut run = 0;
    for c in content.chars() {
        if c == '`' {
            run += 1;
            longest = longest.max(run);
        } else {
            run = 0;
        }
    }
    "`".repeat(longest.max(2) + 1)
}

fn push_fenced(out: &mut String, content: &str) {
    let fence = fence_for(content);
    out.push_str(&fence);
    out.push('\n');
    out.push_str(content);
    if !content.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(&fence);
    out.push_str("\n\n");
}

/// Truncate to `max_chars` characters, appending `...` when shortened.
pub fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

/// Render grouped retrieval results as a context document.
pub fn render_context(query: &str, groups: &[SourceGroup], generated_at: DateTime<Utc>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Context for: \"{}\"", query);
    out.push('\n');
    let _ = writeln!(out, "Generated: {}", format_generated(generated_at));
    out.push('\n');

    if groups.iter().all(|g| g.results.is_empty()) {
        out.push_str("_No matching sources above the similarity threshold._\n");
        return out;
    }

    for group in groups {
        let _ = writeln!(out, "### {} Sources", group.source_type.as_str().to_uppercase());
        out.push('\n');
        for (i, result) in group.results.iter().enumerate() {
            let _ = writeln!(out, "#### Source {}: {}", i + 1, result.chunk.path);
            let _ = writeln!(out, "Similarity: {:.1}%", result.similarity * 100.0);
            out.push('\n');
            push_fenced(&mut out, &result.chunk.content);
        }
    }

    out
}

/// Render a compact ranked list for interactive search output.
pub fn render_result_list(query: &str, results: &[RetrievalResult], preview_chars: usize) -> String {
    let mut out = String::new();
    if results.is_empty() {
        let _ = writeln!(out, "No results for \"{}\".", query);
        return out;
    }

    let _ = writeln!(out, "Found {} result(s) for \"{}\":", results.len(), query);
    for (i, r) in results.iter().enumerate() {
        out.push('\n');
        let _ = writeln!(
            out,
            "{}. [{}] {} ({:.1}%)",
            i + 1,
            r.chunk.source_type,
            r.chunk.path,
            r.similarity * 100.0
        );
        let snippet = preview(r.chunk.content.trim(), preview_chars).replace('\n', " ");
        let _ = writeln!(out, "   {}", snippet);
    }
    out
}

/// Render project metadata and per-source-type chunk counts.
pub fn render_overview(
    project: &Project,
    counts: &BTreeMap<SourceType, usize>,
    generated_at: DateTime<Utc>,
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Project Overview: {}", project.name);
    out.push('\n');
    let _ = writeln!(out, "Generated: {}", format_generated(generated_at));
    out.push('\n');

    out.push_str("## Details\n\n");
    let description = if project.description.is_empty() {
        "(none)"
    } else {
        project.description.as_str()
    };
    let _ = writeln!(out, "- Description: {}", description);
    let stack = if project.tech_stack.is_empty() {
        "(none)".to_string()
    } else {
        project.tech_stack.join(", ")
    };
    let _ = writeln!(out, "- Tech stack: {}", stack);
    let _ = writeln!(out, "- Repository: {}", project.repo_url.as_deref().unwrap_or("(none)"));
    let _ = writeln!(out, "- Created: {}", format_ts(project.created_at));
    let _ = writeln!(out, "- Updated: {}", format_ts(project.updated_at));
    if let Some(map) = project.config.as_object().filter(|m| !m.is_empty()) {
        let keys: Vec<&str> = map.keys().map(|k| k.as_str()).collect();
        let _ = writeln!(out, "- Configuration keys: {}", keys.join(", "));
    }
    out.push('\n');

    out.push_str("## Statistics\n\n");
    let mut total = 0;
    for (source_type, count) in counts.iter().filter(|(_, c)| **c > 0) {
        let _ = writeln!(out, "- {}: {}", source_type, count);
        total += count;
    }
    if total == 0 {
        out.push_str("- (no chunks)\n");
    }
    out.push('\n');
    let _ = writeln!(out, "Total chunks: {}", total);

    out
}

/// Render the per-file code-structure report.
///
/// `chunks` should be the project's code chunks. They are regrouped by
/// file (chunk ordinal stripped), files are listed by path, and the first
/// chunk of each file is shown as a preview of at most `preview_chars`
/// characters.
pub fn render_structure(
    project: &Project,
    chunks: &[Chunk],
    preview_chars: usize,
    generated_at: DateTime<Utc>,
) -> String {
    let mut files: BTreeMap<&str, Vec<(usize, &Chunk)>> = BTreeMap::new();
    for chunk in chunks {
        let (file, ordinal) = split_chunk_ordinal(&chunk.path);
        files
            .entry(file)
            .or_default()
            .push((ordinal.unwrap_or(1), chunk));
    }

    let mut out = String::new();
    let _ = writeln!(out, "# Code Structure: {}", project.name);
    out.push('\n');
    let _ = writeln!(out, "Generated: {}", format_generated(generated_at));
    out.push('\n');
    let _ = writeln!(out, "Files: {}", files.len());
    out.push('\n');

    for (file, mut members) in files {
        members.sort_by_key(|(ordinal, _)| *ordinal);
        let _ = writeln!(out, "## {}", file);
        out.push('\n');
        let _ = writeln!(out, "Chunks: {}", members.len());
        out.push('\n');
        if let Some((_, first)) = members.first() {
            push_fenced(&mut out, &preview(&first.content, preview_chars));
        }
    }

    out
}

/// Count chunks per source type from an in-hand list.
pub fn count_by_source_type(chunks: &[Chunk]) -> BTreeMap<SourceType, usize> {
    let mut counts = BTreeMap::new();
    for c in chunks {
        *counts.entry(c.source_type).or_insert(0) += 1;
    }
    counts
}
