mod loader;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};

pub use loader::{load_sop_dir, sop_id_from_title};

pub const DEMO_SOP_ID: &str = "demo_loto";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SopDocument {
    pub id: String,
    pub title: String,
    pub content: String,
    pub updated_at: DateTime<Utc>,
}

impl SopDocument {
    pub fn new(id: impl Into<String>, title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            content: content.into(),
            updated_at: Utc::now(),
        }
    }

    pub fn summary(&self) -> SopSummary {
        SopSummary {
            id: self.id.clone(),
            title: self.title.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SopSummary {
    pub id: String,
    pub title: String,
}

/// Representative energy-control document available on every fresh store.
pub fn demo_sop() -> SopDocument {
    SopDocument::new(
        DEMO_SOP_ID,
        "LOTO Procedure (Demo)",
        "This is a representative example of a Lockout/Tagout procedure.\n\
         Facilities replace it with their actual SOP documents.\n\n\
         This document covers the fundamental safety concepts and rationale behind energy \
         control procedures used to protect workers from hazardous energy during maintenance \
         and servicing activities.",
    )
}

pub trait SopRepository: Send + Sync {
    async fn list_sops(&self) -> Result<Vec<SopSummary>>;
    async fn get_sop(&self, sop_id: &str) -> Result<Option<SopDocument>>;
    async fn upsert_sop(&self, document: SopDocument) -> Result<()>;
    async fn delete_sop(&self, sop_id: &str) -> Result<bool>;

    /// Reference text for the explainer. Empty documents count as missing.
    async fn sop_content(&self, sop_id: &str) -> Result<Option<String>> {
        Ok(self
            .get_sop(sop_id)
            .await?
            .map(|document| document.content)
            .filter(|content| !content.trim().is_empty()))
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    documents: Arc<RwLock<HashMap<String, SopDocument>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seeded() -> Self {
        let store = Self::new();
        let demo = demo_sop();
        store.documents.write().insert(demo.id.clone(), demo);
        store
    }
}

impl SopRepository for MemoryStore {
    async fn list_sops(&self) -> Result<Vec<SopSummary>> {
        let mut summaries = self
            .documents
            .read()
            .values()
            .map(SopDocument::summary)
            .collect::<Vec<_>>();
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(summaries)
    }

    async fn get_sop(&self, sop_id: &str) -> Result<Option<SopDocument>> {
        Ok(self.documents.read().get(sop_id).cloned())
    }

    async fn upsert_sop(&self, document: SopDocument) -> Result<()> {
        self.documents.write().insert(document.id.clone(), document);
        Ok(())
    }

    async fn delete_sop(&self, sop_id: &str) -> Result<bool> {
        Ok(self.documents.write().remove(sop_id).is_some())
    }
}

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let mut options = SqlitePoolOptions::new();
        if is_in_memory(database_url) {
            // The database lives only as long as its last connection.
            options = options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }

        let pool = options
            .connect(database_url)
            .await
            .with_context(|| format!("failed connecting to sqlite at {}", database_url))?;

        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sop_documents (
              sop_id TEXT PRIMARY KEY,
              title TEXT NOT NULL,
              content TEXT NOT NULL,
              updated_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        let demo = demo_sop();
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO sop_documents (sop_id, title, content, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(&demo.id)
        .bind(&demo.title)
        .bind(&demo.content)
        .bind(demo.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn is_in_memory(database_url: &str) -> bool {
    database_url.contains(":memory:") || database_url.contains("mode=memory")
}

impl SopRepository for SqliteStore {
    async fn list_sops(&self) -> Result<Vec<SopSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT sop_id, title
            FROM sop_documents
            ORDER BY sop_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let summaries = rows
            .into_iter()
            .map(|row| SopSummary {
                id: row.get("sop_id"),
                title: row.get("title"),
            })
            .collect();

        Ok(summaries)
    }

    async fn get_sop(&self, sop_id: &str) -> Result<Option<SopDocument>> {
        let row = sqlx::query(
            r#"
            SELECT sop_id, title, content, updated_at
            FROM sop_documents
            WHERE sop_id = ?1
            "#,
        )
        .bind(sop_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(SopDocument {
            id: row.get("sop_id"),
            title: row.get("title"),
            content: row.get("content"),
            updated_at: row
                .get::<String, _>("updated_at")
                .parse()
                .unwrap_or_else(|_| Utc::now()),
        }))
    }

    async fn upsert_sop(&self, document: SopDocument) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sop_documents (sop_id, title, content, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(sop_id) DO UPDATE SET
              title=excluded.title,
              content=excluded.content,
              updated_at=excluded.updated_at
            "#,
        )
        .bind(&document.id)
        .bind(&document.title)
        .bind(&document.content)
        .bind(document.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_sop(&self, sop_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sop_documents WHERE sop_id = ?1")
            .bind(sop_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[derive(Clone)]
pub enum Store {
    Memory(MemoryStore),
    Sqlite(SqliteStore),
}

impl Store {
    pub fn memory() -> Self {
        Self::Memory(MemoryStore::seeded())
    }

    pub async fn sqlite(database_url: &str) -> Result<Self> {
        let sqlite = SqliteStore::connect(database_url).await?;
        Ok(Self::Sqlite(sqlite))
    }

    /// SQLite when a database url is given, the seeded memory store otherwise.
    pub async fn open(database_url: Option<&str>) -> Result<Self> {
        match database_url {
            Some(url) => Self::sqlite(url).await,
            None => Ok(Self::memory()),
        }
    }
}

impl SopRepository for Store {
    async fn list_sops(&self) -> Result<Vec<SopSummary>> {
        match self {
            Store::Memory(store) => store.list_sops().await,
            Store::Sqlite(store) => store.list_sops().await,
        }
    }

    async fn get_sop(&self, sop_id: &str) -> Result<Option<SopDocument>> {
        match self {
            Store::Memory(store) => store.get_sop(sop_id).await,
            Store::Sqlite(store) => store.get_sop(sop_id).await,
        }
    }

    async fn upsert_sop(&self, document: SopDocument) -> Result<()> {
        match self {
            Store::Memory(store) => store.upsert_sop(document).await,
            Store::Sqlite(store) => store.upsert_sop(document).await,
        }
    }

    async fn delete_sop(&self, sop_id: &str) -> Result<bool> {
        match self {
            Store::Memory(store) => store.delete_sop(sop_id).await,
            Store::Sqlite(store) => store.delete_sop(sop_id).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn seeded_store_serves_demo_document() {
        let store = Store::memory();
        let listed = store.list_sops().await.unwrap();
        assert_eq!(
            listed,
            vec![SopSummary {
                id: DEMO_SOP_ID.to_string(),
                title: "LOTO Procedure (Demo)".to_string(),
            }]
        );

        let content = store.sop_content(DEMO_SOP_ID).await.unwrap();
        assert!(content.unwrap().contains("hazardous energy"));
    }

    #[tokio::test]
    async fn unknown_id_has_no_content() {
        let store = Store::memory();
        assert!(store.sop_content("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn blank_document_counts_as_missing_context() {
        let store = MemoryStore::new();
        store
            .upsert_sop(SopDocument::new("blank", "Blank", "   \n"))
            .await
            .unwrap();
        assert!(store.get_sop("blank").await.unwrap().is_some());
        assert!(store.sop_content("blank").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn upsert_replaces_and_delete_removes() {
        let store = MemoryStore::seeded();
        store
            .upsert_sop(SopDocument::new("confined_space", "Confined Space", "v1"))
            .await
            .unwrap();
        store
            .upsert_sop(SopDocument::new("confined_space", "Confined Space Entry", "v2"))
            .await
            .unwrap();

        let document = store.get_sop("confined_space").await.unwrap().unwrap();
        assert_eq!(document.title, "Confined Space Entry");
        assert_eq!(document.content, "v2");

        let ids = store
            .list_sops()
            .await
            .unwrap()
            .into_iter()
            .map(|summary| summary.id)
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["confined_space", DEMO_SOP_ID]);

        assert!(store.delete_sop("confined_space").await.unwrap());
        assert!(!store.delete_sop("confined_space").await.unwrap());
    }

    #[tokio::test]
    async fn sqlite_store_creates_schema_seeds_demo_and_upserts() {
        let store = Store::sqlite("sqlite::memory:").await.unwrap();
        assert_eq!(store.list_sops().await.unwrap(), vec![demo_sop().summary()]);

        store
            .upsert_sop(SopDocument::new("confined_space", "Confined Space", "v1"))
            .await
            .unwrap();
        let second = SopDocument::new("confined_space", "Confined Space Entry", "v2");
        store.upsert_sop(second.clone()).await.unwrap();

        let document = store.get_sop("confined_space").await.unwrap().unwrap();
        assert_eq!(document.title, "Confined Space Entry");
        assert_eq!(document.content, "v2");
        assert_eq!(document.updated_at, second.updated_at);

        let ids = store
            .list_sops()
            .await
            .unwrap()
            .into_iter()
            .map(|summary| summary.id)
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["confined_space", DEMO_SOP_ID]);

        assert!(store.delete_sop("confined_space").await.unwrap());
        assert!(!store.delete_sop("confined_space").await.unwrap());
        assert!(store.get_sop("confined_space").await.unwrap().is_none());

        let content = store.sop_content(DEMO_SOP_ID).await.unwrap();
        assert!(content.unwrap().contains("hazardous energy"));
    }

    #[tokio::test]
    async fn sqlite_reseeding_keeps_a_single_demo_row() {
        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
        store.ensure_schema().await.unwrap();

        let listed = store.list_sops().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, DEMO_SOP_ID);
    }

    #[tokio::test]
    async fn sqlite_unreadable_timestamp_falls_back_to_now() {
        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
        sqlx::query(
            "INSERT INTO sop_documents (sop_id, title, content, updated_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind("legacy")
        .bind("Legacy")
        .bind("Imported before timestamps were recorded.")
        .bind("not a timestamp")
        .execute(&store.pool)
        .await
        .unwrap();

        let before = Utc::now();
        let document = store.get_sop("legacy").await.unwrap().unwrap();
        assert!(document.updated_at >= before);
        assert_eq!(document.title, "Legacy");
    }

    #[test]
    fn in_memory_urls_are_recognized() {
        assert!(is_in_memory("sqlite::memory:"));
        assert!(is_in_memory("sqlite:file:sops?mode=memory&cache=shared"));
        assert!(!is_in_memory("sqlite://data/sops.db"));
    }
}
