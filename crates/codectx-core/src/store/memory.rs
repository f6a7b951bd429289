//! In-memory [`Store`] implementation for tests and embedding in other hosts.
//!
//! Uses `HashMap` behind `std::sync::RwLock` for thread safety. Similarity
//! search is brute-force cosine similarity over every stored vector. The
//! (project, path) upsert key is an explicit map to the chunk id. Every
//! stored and query vector must have the store's fixed dimension.
//!
//! Lock order is `projects` → `keys` → `chunks`.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use anyhow::{bail, Result};
use async_trait::async_trait;
use uuid::Uuid;

use crate::chunk::is_superseded;
use crate::embedding::{cosine_similarity, DEFAULT_DIMS};
use crate::models::{Chunk, ContextRecord, Project, ProjectSpec, RetrievalResult, SourceType};

use super::{check_dims, rank_candidates, Store};

/// In-memory store.
pub struct InMemoryStore {
    dims: usize,
    projects: RwLock<HashMap<String, Project>>,
    keys: RwLock<HashMap<(String, String), String>>,
    chunks: RwLock<HashMap<String, Chunk>>,
    contexts: RwLock<Vec<ContextRecord>>,
}

impl InMemoryStore {
    /// An empty store holding `dims`-dimensional embeddings.
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            projects: RwLock::new(HashMap::new()),
            keys: RwLock::new(HashMap::new()),
            chunks: RwLock::new(HashMap::new()),
            contexts: RwLock::new(Vec::new()),
        }
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    /// Context records written so far, oldest first.
    pub fn recorded_contexts(&self) -> Vec<ContextRecord> {
        self.contexts.read().unwrap().clone()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.read().unwrap().len()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_DIMS)
    }
}

fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get_project(&self, name: &str) -> Result<Option<Project>> {
        Ok(self.projects.read().unwrap().get(name).cloned())
    }

    async fn create_project(&self, spec: &ProjectSpec) -> Result<Project> {
        let mut projects = self.projects.write().unwrap();
        if projects.contains_key(&spec.name) {
            bail!("project '{}' already exists", spec.name);
        }
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
        projects.insert(project.name.clone(), project.clone());
        Ok(project)
    }

    async fn update_project(&self, spec: &ProjectSpec) -> Result<Project> {
        let mut projects = self.projects.write().unwrap();
        let existing = match projects.get(&spec.name) {
            Some(p) => p,
            None => bail!("project '{}' not found", spec.name),
        };
        let merged = spec.merge_into(existing, now_ts());
        projects.insert(merged.name.clone(), merged.clone());
        Ok(merged)
    }

    async fn list_projects(&self) -> Result<Vec<Project>> {
        let mut projects: Vec<Project> = self.projects.read().unwrap().values().cloned().collect();
        projects.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(projects)
    }

    async fn delete_project(&self, name: &str) -> Result<bool> {
        let mut projects = self.projects.write().unwrap();
        let project = match projects.remove(name) {
            Some(p) => p,
            None => return Ok(false),
        };
        let mut keys = self.keys.write().unwrap();
        let mut chunks = self.chunks.write().unwrap();
        keys.retain(|(project_id, _), _| *project_id != project.id);
        chunks.retain(|_, c| c.project_id != project.id);
        Ok(true)
    }

    async fn upsert_chunk(&self, chunk: &Chunk) -> Result<String> {
        let project_known = self
            .projects
            .read()
            .unwrap()
            .values()
            .any(|p| p.id == chunk.project_id);
        if !project_known {
            bail!("unknown project id '{}'", chunk.project_id);
        }
        check_dims(self.dims, chunk.embedding.len(), &chunk.path)?;

        let mut keys = self.keys.write().unwrap();
        let mut chunks = self.chunks.write().unwrap();
        let key = (chunk.project_id.clone(), chunk.path.clone());
        let now = now_ts();

        let mut stored = chunk.clone();
        stored.updated_at = now;
        match keys.get(&key).and_then(|id| chunks.get(id)) {
            Some(existing) => {
                stored.id = existing.id.clone();
                stored.created_at = existing.created_at;
            }
            None => {
                if stored.id.is_empty() {
                    stored.id = Uuid::new_v4().to_string();
                }
                stored.created_at = now;
            }
        }

        let id = stored.id.clone();
        keys.insert(key, id.clone());
        chunks.insert(id.clone(), stored);
        Ok(id)
    }

    async fn prune_chunks(&self, project_id: &str, file: &str, total: usize) -> Result<usize> {
        let mut keys = self.keys.write().unwrap();
        let mut chunks = self.chunks.write().unwrap();
        let stale: Vec<(String, String)> = keys
            .keys()
            .filter(|(pid, path)| pid == project_id && is_superseded(path, file, total))
            .cloned()
            .collect();
        for key in &stale {
            if let Some(id) = keys.remove(key) {
                chunks.remove(&id);
            }
        }
        Ok(stale.len())
    }

    async fn similarity_search(
        &self,
        query_vec: &[f32],
        project: Option<&str>,
        threshold: f64,
        limit: usize,
    ) -> Result<Vec<RetrievalResult>> {
        check_dims(self.dims, query_vec.len(), "query")?;
        let project_id = match project {
            Some(name) => match self.projects.read().unwrap().get(name) {
                Some(p) => Some(p.id.clone()),
                None => return Ok(Vec::new()),
            },
            None => None,
        };

        let chunks = self.chunks.read().unwrap();
        let candidates = chunks
            .values()
            .filter(|c| project_id.as_deref().map_or(true, |id| c.project_id == id))
            .map(|c| {
                let similarity = cosine_similarity(query_vec, &c.embedding);
                let mut chunk = c.clone();
                chunk.embedding = Vec::new();
                RetrievalResult { chunk, similarity }
            })
            .collect();

        Ok(rank_candidates(candidates, threshold, limit))
    }

    async fn get_chunks(&self, project_id: &str, source_type: Option<SourceType>) -> Result<Vec<Chunk>> {
        let mut out: Vec<Chunk> = self
            .chunks
            .read()
            .unwrap()
            .values()
            .filter(|c| c.project_id == project_id)
            .filter(|c| source_type.map_or(true, |st| c.source_type == st))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(out)
    }

    async fn count_chunks_by_source_type(&self, project_id: &str) -> Result<BTreeMap<SourceType, usize>> {
        let mut counts = BTreeMap::new();
        for c in self.chunks.read().unwrap().values() {
            if c.project_id == project_id {
                *counts.entry(c.source_type).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }

    async fn record_context(&self, record: &ContextRecord) -> Result<()> {
        self.contexts.write().unwrap().push(record.clone());
        Ok(())
    }
}
