//! Airtable source adapter.
//!
//! Pages through `GET {api_url}/{base_id}/{table}` following the `offset`
//! cursor and turns each record into one [`SourceDocument`]:
//!
//! - text: one `field: value` line per string-valued field, in field-name
//!   order
//! - origin path: `airtable/<table>/<record id>`
//! - source type: configurable, `issues` by default
//!
//! A table that fails to load is reported as a single read failure for
//! `airtable/<table>`; the remaining tables are still fetched.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, warn};

use codectx_core::models::{Project, SourceDocument, SourceType};
use codectx_core::source::SourceAdapter;
use codectx_core::Error;

use crate::config::AirtableSourceConfig;

/// Environment variable holding the Airtable API key.
pub const AIRTABLE_API_KEY_ENV: &str = "AIRTABLE_API_KEY";

/// One Airtable record as returned by the list endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct AirtableRecord {
    pub id: String,
    #[serde(default)]
    pub fields: serde_json::Map<String, serde_json::Value>,
    #[serde(rename = "createdTime", default)]
    pub created_time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    records: Vec<AirtableRecord>,
    #[serde(default)]
    offset: Option<String>,
}

/// Source adapter over one or more Airtable tables.
pub struct AirtableAdapter {
    client: reqwest::Client,
    api_key: String,
    api_url: String,
    base_id: String,
    tables: Vec<String>,
    source_type: SourceType,
    page_size: usize,
}

impl AirtableAdapter {
    pub fn new(config: &AirtableSourceConfig, tables: Vec<String>, api_key: String) -> Result<Self> {
        let base_id = config
            .base_id
            .clone()
            .filter(|b| !b.trim().is_empty())
            .ok_or_else(|| Error::Configuration("sources.airtable.base_id is required".to_string()))?;
        if tables.is_empty() {
            return Err(Error::Configuration("no Airtable tables given".to_string()).into());
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_key,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            base_id,
            tables,
            source_type: config.source_type,
            page_size: config.page_size.clamp(1, 100),
        })
    }

    /// Create an adapter using the key from `AIRTABLE_API_KEY`.
    pub fn from_env(config: &AirtableSourceConfig, tables: Vec<String>) -> Result<Self> {
        let api_key = std::env::var(AIRTABLE_API_KEY_ENV)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                Error::Configuration(format!("{} environment variable not set", AIRTABLE_API_KEY_ENV))
            })?;
        Self::new(config, tables, api_key)
    }

    fn table_url(&self, table: &str) -> Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(&self.api_url)
            .with_context(|| format!("Invalid Airtable API URL: {}", self.api_url))?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("Airtable API URL cannot be a base: {}", self.api_url))?
            .push(&self.base_id)
            .push(table);
        Ok(url)
    }

    /// Fetch every record of `table`, following pagination.
    pub async fn fetch_table(&self, table: &str) -> Result<Vec<AirtableRecord>> {
        let url = self.table_url(table)?;
        let mut records = Vec::new();
        let mut offset: Option<String> = None;

        loop {
            let mut request = self
                .client
                .get(url.clone())
                .bearer_auth(&self.api_key)
                .query(&[("pageSize", self.page_size.to_string())]);
            if let Some(cursor) = &offset {
                request = request.query(&[("offset", cursor.as_str())]);
            }

            let response = request
                .send()
                .await
                .with_context(|| format!("Airtable request failed for table '{}'", table))?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                bail!("Airtable API error {}: {}", status, body);
            }

            let page: ListResponse = response
                .json()
                .await
                .with_context(|| format!("Invalid Airtable response for table '{}'", table))?;
            debug!(table, records = page.records.len(), "fetched Airtable page");
            records.extend(page.records);

            match page.offset {
                Some(next) if !next.is_empty() => offset = Some(next),
                _ => break,
            }
        }

        Ok(records)
    }

    fn record_to_document(&self, table: &str, record: &AirtableRecord) -> SourceDocument {
        let modified_at = record
            .created_time
            .as_deref()
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc));
        SourceDocument {
            source_type: self.source_type,
            path: format!("airtable/{}/{}", table, record.id),
            text: record_to_text(record),
            modified_at,
            metadata: serde_json::json!({
                "airtable_base": self.base_id,
                "airtable_table": table,
                "airtable_record_id": record.id,
            }),
        }
    }
}

/// Concatenate a record's string-valued fields as `field: value` lines.
pub fn record_to_text(record: &AirtableRecord) -> String {
    let mut fields: Vec<(&String, &str)> = record
        .fields
        .iter()
        .filter_map(|(name, value)| value.as_str().map(|s| (name, s)))
        .collect();
    fields.sort_by(|a, b| a.0.cmp(b.0));
    fields
        .iter()
        .map(|(name, value)| format!("{}: {}", name, value))
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl SourceAdapter for AirtableAdapter {
    fn name(&self) -> &str {
        "airtable"
    }

    async fn list_documents(&self, project: &Project) -> Result<Vec<codectx_core::Result<SourceDocument>>> {
        let mut docs = Vec::new();
        for table in &self.tables {
            match self.fetch_table(table).await {
                Ok(records) => {
                    debug!(project = %project.name, table = %table, records = records.len(), "Airtable table loaded");
                    docs.extend(records.iter().map(|r| Ok(self.record_to_document(table, r))));
                }
                Err(e) => {
                    let message = format!("{:#}", e);
                    warn!(table = %table, error = %message, "failed to load Airtable table");
                    docs.push(Err(Error::SourceRead {
                        path: format!("airtable/{}", table),
                        message,
                    }));
                }
            }
        }
        Ok(docs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config() -> AirtableSourceConfig {
        AirtableSourceConfig {
            base_id: Some("appBASE".to_string()),
            ..AirtableSourceConfig::default()
        }
    }

    #[test]
    fn test_record_to_text_keeps_string_fields() {
        let record: AirtableRecord = serde_json::from_value(json!({
            "id": "rec1",
            "fields": {
                "Title": "Login fails",
                "Status": "Open",
                "Votes": 3,
                "Tags": ["auth"]
            }
        }))
        .unwrap();
        assert_eq!(record_to_text(&record), "Status: Open\nTitle: Login fails");
    }

    #[test]
    fn test_document_path_and_type() {
        let adapter = AirtableAdapter::new(&config(), vec!["Issues".to_string()], "key".to_string()).unwrap();
        let record: AirtableRecord = serde_json::from_value(json!({
            "id": "recABC",
            "createdTime": "2024-01-02T03:04:05.000Z",
            "fields": {"Name": "Thing"}
        }))
        .unwrap();
        let doc = adapter.record_to_document("Issues", &record);
        assert_eq!(doc.path, "airtable/Issues/recABC");
        assert_eq!(doc.source_type, SourceType::Issues);
        assert!(doc.modified_at.is_some());
        assert_eq!(doc.metadata["airtable_record_id"], "recABC");
    }

    #[test]
    fn test_missing_base_id_is_configuration_error() {
        let err = AirtableAdapter::new(
            &AirtableSourceConfig::default(),
            vec!["Issues".to_string()],
            "key".to_string(),
        )
        .err()
        .unwrap();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::Configuration(_))));
    }

    #[test]
    fn test_table_url_encodes_names() {
        let adapter = AirtableAdapter::new(&config(), vec!["Design Notes".to_string()], "key".to_string()).unwrap();
        let url = adapter.table_url("Design Notes").unwrap();
        assert_eq!(url.as_str(), "https://api.airtable.com/v0/appBASE/Design%20Notes");
    }
}
