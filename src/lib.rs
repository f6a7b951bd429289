//! # codectx
//!
//! A personal retrieval-augmented-generation pipeline for project
//! artifacts. Source code, docs and design records are split into
//! overlapping chunks, embedded, stored in SQLite, and retrieved by
//! similarity to assemble markdown context for an AI assistant.
//!
//! The pipeline logic lives in [`codectx_core`]; this crate provides the
//! concrete pieces around it: configuration, the SQLite store, the OpenAI
//! embedding provider, source adapters, and the CLI commands.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌───────────────────┐   ┌──────────┐
//! │  Adapters    │──▶│ Chunk + Embed     │──▶│  SQLite   │
//! │ Git/Airtable │   │ (codectx-core)    │   │ projects  │
//! └──────────────┘   └───────────────────┘   │ chunks    │
//!                                             └────┬─────┘
//!                     ┌────────────────────────────┘
//!                     ▼
//!            ┌────────────────┐
//!            │ search/context │──▶ markdown
//!            └────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! codectx init
//! codectx ingest atlas --path ~/src/atlas --tech-stack rust,sqlite
//! codectx search "how are embeddings batched" --project atlas
//! codectx context "storage layer" --project atlas --output ctx/storage.md
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite [`Store`](codectx_core::store::Store) |
//! | [`embedding`] | OpenAI provider and batch throttle |
//! | [`connector_git`] | Git work-tree source adapter |
//! | [`connector_table`] | Airtable source adapter |
//! | [`ingest`] | `ingest` command |
//! | [`search`] | `search` command |
//! | [`context`] | `context`, `overview` and `structure` commands |
//! | [`projects`] | `projects` and `delete` commands |

pub mod config;
pub mod connector_git;
pub mod connector_table;
pub mod context;
pub mod db;
pub mod embedding;
pub mod ingest;
pub mod migrate;
pub mod projects;
pub mod search;
pub mod sqlite_store;
