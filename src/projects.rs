//! `codectx projects` and `codectx delete`.

use anyhow::{bail, Result};
use chrono::DateTime;

use codectx_core::models::Project;
use codectx_core::store::Store;

use crate::config::Config;
use crate::sqlite_store::SqliteStore;

fn format_updated(project: &Project) -> String {
    DateTime::from_timestamp(project.updated_at, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| project.updated_at.to_string())
}

/// One line per project: name, chunk total, last update, description.
pub async fn project_lines(store: &dyn Store) -> Result<Vec<String>> {
    let mut lines = Vec::new();
    for project in store.list_projects().await? {
        let total: usize = store
            .count_chunks_by_source_type(&project.id)
            .await?
            .values()
            .sum();
        let mut line = format!(
            "{}  {} chunks  updated {}",
            project.name,
            total,
            format_updated(&project)
        );
        if !project.description.is_empty() {
            line.push_str("  ");
            line.push_str(&project.description);
        }
        lines.push(line);
    }
    Ok(lines)
}

pub async fn run_projects(config: &Config) -> Result<()> {
    let store = SqliteStore::open(config).await?;
    let lines = project_lines(&store).await;
    store.close().await;
    let lines = lines?;

    if lines.is_empty() {
        println!("No projects.");
    }
    for line in lines {
        println!("{}", line);
    }
    Ok(())
}

pub async fn run_delete(config: &Config, name: &str) -> Result<()> {
    let store = SqliteStore::open(config).await?;
    let deleted = store.delete_project(name).await;
    store.close().await;

    if !deleted? {
        bail!("project '{}' not found", name);
    }
    println!("Deleted project '{}' and its chunks.", name);
    Ok(())
}
