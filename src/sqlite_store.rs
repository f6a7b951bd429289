//! SQLite-backed [`Store`] implementation.
//!
//! Projects, chunks and context records live in three tables (see
//! [`crate::migrate`]). Embeddings are stored as little-endian `f32` BLOBs
//! and scored with cosine similarity in Rust; the `(project_id, path)`
//! unique index is the upsert key. The store is opened for one embedding
//! dimension: chunks and queries of another width are rejected, and a
//! search over chunks written at another width fails instead of scoring
//! them as unrelated.

use std::collections::BTreeMap;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use codectx_core::chunk::{is_superseded, ORDINAL_MARKER};
use codectx_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use codectx_core::models::{Chunk, ContextRecord, Project, ProjectSpec, RetrievalResult, SourceType};
use codectx_core::store::{check_dims, rank_candidates, Store};

use crate::config::Config;
use crate::{db, migrate};

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
    dims: usize,
}

impl SqliteStore {
    /// Wrap a migrated pool holding `dims`-dimensional embeddings.
    pub fn new(pool: SqlitePool, dims: usize) -> Self {
        Self { pool, dims }
    }

    /// Connect to the configured database and apply migrations.
    ///
    /// The store dimension is `embedding.dims`.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::migrate_pool(&pool).await?;
        Ok(Self::new(pool, config.embedding.dims))
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

fn parse_json(raw: &str, fallback: serde_json::Value) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or(fallback)
}

fn row_to_project(row: &SqliteRow) -> Project {
    let tech_stack_json: String = row.get("tech_stack_json");
    let config_json: String = row.get("config_json");
    Project {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
        tech_stack: serde_json::from_str(&tech_stack_json).unwrap_or_default(),
        repo_url: row.get("repo_url"),
        config: parse_json(&config_json, serde_json::json!({})),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn row_to_chunk(row: &SqliteRow, with_embedding: bool) -> Result<Chunk> {
    let source_type: String = row.get("source_type");
    let metadata_json: String = row.get("metadata_json");
    let embedding = if with_embedding {
        let blob: Vec<u8> = row.get("embedding");
        blob_to_vec(&blob)
    } else {
        Vec::new()
    };
    Ok(Chunk {
        id: row.get("id"),
        project_id: row.get("project_id"),
        source_type: source_type
            .parse::<SourceType>()
            .map_err(|e| anyhow!("corrupt chunk row: {}", e))?,
        path: row.get("path"),
        content: row.get("content"),
        contextual_content: row.get("contextual_content"),
        metadata: parse_json(&metadata_json, serde_json::json!({})),
        embedding,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

const PROJECT_COLUMNS: &str =
    "id, name, description, tech_stack_json, repo_url, config_json, created_at, updated_at";

const CHUNK_COLUMNS: &str = "c.id, c.project_id, c.source_type, c.path, c.content, c.contextual_content, \
     c.metadata_json, c.embedding, c.created_at, c.updated_at";

#[async_trait]
impl Store for SqliteStore {
    async fn get_project(&self, name: &str) -> Result<Option<Project>> {
        let row = sqlx::query(&format!("SELECT {} FROM projects WHERE name = ?", PROJECT_COLUMNS))
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_project))
    }

    async fn create_project(&self, spec: &ProjectSpec) -> Result<Project> {
        let now = now_ts();
        let project = Project {
            id: Uuid::new_v4().to_string(),
            name: spec.name.clone(),
            description: spec.description.clone().unwrap_or_default(),
            tech_stack: spec.tech_stack.clone(),
            repo_url: spec.repo_url.clone(),
            config: serde_json::Value::Object(spec.config.clone()),
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO projects (id, name, description, tech_stack_json, repo_url,
                                  config_json, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&project.id)
        .bind(&project.name)
        .bind(&project.description)
        .bind(serde_json::to_string(&project.tech_stack)?)
        .bind(&project.repo_url)
        .bind(project.config.to_string())
        .bind(project.created_at)
        .bind(project.updated_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("creating project '{}'", spec.name))?;

        Ok(project)
    }

    async fn update_project(&self, spec: &ProjectSpec) -> Result<Project> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!("SELECT {} FROM projects WHERE name = ?", PROJECT_COLUMNS))
            .bind(&spec.name)
            .fetch_optional(&mut *tx)
            .await?;
        let existing = match row {
            Some(row) => row_to_project(&row),
            None => bail!("project '{}' not found", spec.name),
        };
        let merged = spec.merge_into(&existing, now_ts());

        sqlx::query(
            r#"
            UPDATE projects
            SET description = ?, tech_stack_json = ?, repo_url = ?, config_json = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&merged.description)
        .bind(serde_json::to_string(&merged.tech_stack)?)
        .bind(&merged.repo_url)
        .bind(merged.config.to_string())
        .bind(merged.updated_at)
        .bind(&merged.id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(merged)
    }

    async fn list_projects(&self) -> Result<Vec<Project>> {
        let rows = sqlx::query(&format!("SELECT {} FROM projects ORDER BY name ASC", PROJECT_COLUMNS))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_project).collect())
    }

    async fn delete_project(&self, name: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM projects WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn upsert_chunk(&self, chunk: &Chunk) -> Result<String> {
        check_dims(self.dims, chunk.embedding.len(), &chunk.path)?;
        let now = now_ts();
        let blob = vec_to_blob(&chunk.embedding);
        let mut tx = self.pool.begin().await?;

        let existing: Option<String> =
            sqlx::query_scalar("SELECT id FROM chunks WHERE project_id = ? AND path = ?")
                .bind(&chunk.project_id)
                .bind(&chunk.path)
                .fetch_optional(&mut *tx)
                .await?;

        let id = match existing {
            Some(id) => {
                sqlx::query(
                    r#"
                    UPDATE chunks
                    SET source_type = ?, content = ?, contextual_content = ?, metadata_json = ?,
                        embedding = ?, dims = ?, updated_at = ?
                    WHERE id = ?
                    "#,
                )
                .bind(chunk.source_type.as_str())
                .bind(&chunk.content)
                .bind(&chunk.contextual_content)
                .bind(chunk.metadata.to_string())
                .bind(&blob)
                .bind(chunk.embedding.len() as i64)
                .bind(now)
                .bind(&id)
                .execute(&mut *tx)
                .await?;
                id
            }
            None => {
                let id = if chunk.id.is_empty() {
                    Uuid::new_v4().to_string()
                } else {
                    chunk.id.clone()
                };
                sqlx::query(
                    r#"
                    INSERT INTO chunks (id, project_id, source_type, path, content, contextual_content,
                                        metadata_json, embedding, dims, created_at, updated_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&id)
                .bind(&chunk.project_id)
                .bind(chunk.source_type.as_str())
                .bind(&chunk.path)
                .bind(&chunk.content)
                .bind(&chunk.contextual_content)
                .bind(chunk.metadata.to_string())
                .bind(&blob)
                .bind(chunk.embedding.len() as i64)
                .bind(now)
                .bind(now)
                .execute(&mut *tx)
                .await?;
                id
            }
        };

        tx.commit().await?;
        Ok(id)
    }

    async fn prune_chunks(&self, project_id: &str, file: &str, total: usize) -> Result<usize> {
        let prefix = format!("{}{}", file, ORDINAL_MARKER);
        let mut tx = self.pool.begin().await?;

        // substr() counts characters, not bytes.
        let rows = sqlx::query(
            "SELECT id, path FROM chunks WHERE project_id = ? AND (path = ? OR substr(path, 1, ?) = ?)",
        )
        .bind(project_id)
        .bind(file)
        .bind(prefix.chars().count() as i64)
        .bind(&prefix)
        .fetch_all(&mut *tx)
        .await?;

        let mut removed = 0;
        for row in rows {
            let path: String = row.get("path");
            if !is_superseded(&path, file, total) {
                continue;
            }
            let id: String = row.get("id");
            sqlx::query("DELETE FROM chunks WHERE id = ?")
                .bind(&id)
                .execute(&mut *tx)
                .await?;
            removed += 1;
        }

        tx.commit().await?;
        Ok(removed)
    }

    async fn similarity_search(
        &self,
        query_vec: &[f32],
        project: Option<&str>,
        threshold: f64,
        limit: usize,
    ) -> Result<Vec<RetrievalResult>> {
        check_dims(self.dims, query_vec.len(), "query")?;

        let rows = sqlx::query(&format!(
            r#"
            SELECT {}, c.dims
            FROM chunks c
            JOIN projects p ON p.id = c.project_id
            WHERE (?1 IS NULL OR p.name = ?1)
            "#,
            CHUNK_COLUMNS
        ))
        .bind(project)
        .fetch_all(&self.pool)
        .await?;

        let stale = rows
            .iter()
            .filter(|row| row.get::<i64, _>("dims") != self.dims as i64)
            .count();
        if stale > 0 {
            bail!(
                "{} stored chunk(s) have a different embedding dimension than the configured {}; \
                 re-ingest them with the current model",
                stale,
                self.dims
            );
        }

        let mut candidates = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.get("embedding");
            let similarity = cosine_similarity(query_vec, &blob_to_vec(&blob));
            if similarity <= threshold {
                continue;
            }
            candidates.push(RetrievalResult {
                chunk: row_to_chunk(row, false)?,
                similarity,
            });
        }

        Ok(rank_candidates(candidates, threshold, limit))
    }

    async fn get_chunks(&self, project_id: &str, source_type: Option<SourceType>) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM chunks c
            WHERE c.project_id = ?1 AND (?2 IS NULL OR c.source_type = ?2)
            ORDER BY c.path ASC
            "#,
            CHUNK_COLUMNS
        ))
        .bind(project_id)
        .bind(source_type.map(|st| st.as_str()))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|row| row_to_chunk(row, true)).collect()
    }

    async fn count_chunks_by_source_type(&self, project_id: &str) -> Result<BTreeMap<SourceType, usize>> {
        let rows = sqlx::query(
            "SELECT source_type, COUNT(*) AS n FROM chunks WHERE project_id = ? GROUP BY source_type",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        let mut counts = BTreeMap::new();
        for row in &rows {
            let source_type: String = row.get("source_type");
            let n: i64 = row.get("n");
            let st = source_type
                .parse::<SourceType>()
                .map_err(|e| anyhow!("corrupt chunk row: {}", e))?;
            counts.insert(st, n as usize);
        }
        Ok(counts)
    }

    async fn record_context(&self, record: &ContextRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO contexts (id, title, body, file_path, tags_json, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&record.title)
        .bind(&record.body)
        .bind(&record.file_path)
        .bind(serde_json::to_string(&record.tags)?)
        .bind(now_ts())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
