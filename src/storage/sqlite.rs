use crate::models::{
    AssociationUpdate, DateRange, EventWindow, LinkAnalyticsSnapshot, LinkEventAssociation,
};
use crate::storage::{AssociationStore, EventStore, SnapshotSource, StorageError, StorageResult};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::sync::Arc;

pub struct SqliteStorage {
    pool: Arc<SqlitePool>,
}

impl SqliteStorage {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    /// Insert or reschedule an event. `event_date` may be missing for events
    /// that have not been scheduled yet.
    pub async fn upsert_event(
        &self,
        event_id: &str,
        event_date: Option<NaiveDate>,
        created_at: DateTime<Utc>,
    ) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO events (event_id, event_date, created_at)
            VALUES (?, ?, ?)
            ON CONFLICT(event_id) DO UPDATE SET event_date = excluded.event_date
            "#,
        )
        .bind(event_id)
        .bind(event_date)
        .bind(created_at)
        .execute(self.pool.as_ref())
        .await
        .map_err(db_err)?;

        Ok(())
    }

    pub async fn delete_event(&self, event_id: &str) -> StorageResult<bool> {
        let result = sqlx::query("DELETE FROM events WHERE event_id = ?")
            .bind(event_id)
            .execute(self.pool.as_ref())
            .await
            .map_err(db_err)?;

        Ok(result.rows_affected() > 0)
    }

    /// Store the latest raw snapshot for a link, replacing the previous one
    pub async fn store_snapshot(&self, snapshot: &LinkAnalyticsSnapshot) -> StorageResult<()> {
        let payload = serde_json::to_string(snapshot).map_err(|e| StorageError::Other(e.into()))?;
        let fetched_at = snapshot.fetched_at.unwrap_or_else(Utc::now);

        sqlx::query(
            r#"
            INSERT INTO link_snapshots (link_id, payload, fetched_at)
            VALUES (?, ?, ?)
            ON CONFLICT(link_id) DO UPDATE SET
                payload = excluded.payload,
                fetched_at = excluded.fetched_at
            "#,
        )
        .bind(&snapshot.link_id)
        .bind(payload)
        .bind(fetched_at)
        .execute(self.pool.as_ref())
        .await
        .map_err(db_err)?;

        Ok(())
    }
}

fn db_err(e: sqlx::Error) -> StorageError {
    StorageError::Other(e.into())
}

#[derive(sqlx::FromRow)]
struct AssociationRow {
    link_id: String,
    event_id: String,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    auto_calculated: bool,
    cached_metrics: String,
    last_synced_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<AssociationRow> for LinkEventAssociation {
    type Error = StorageError;

    fn try_from(row: AssociationRow) -> StorageResult<Self> {
        let cached_metrics = serde_json::from_str(&row.cached_metrics).map_err(|e| {
            StorageError::Invalid(format!(
                "cached metrics for ({}, {}): {}",
                row.link_id, row.event_id, e
            ))
        })?;

        Ok(LinkEventAssociation {
            link_id: row.link_id,
            event_id: row.event_id,
            range: DateRange::new(row.start_date, row.end_date),
            auto_calculated: row.auto_calculated,
            cached_metrics,
            last_synced_at: row.last_synced_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn into_associations(rows: Vec<AssociationRow>) -> StorageResult<Vec<LinkEventAssociation>> {
    rows.into_iter().map(LinkEventAssociation::try_from).collect()
}

const ASSOCIATION_COLUMNS: &str = "link_id, event_id, start_date, end_date, auto_calculated, \
     cached_metrics, last_synced_at, created_at, updated_at";

#[async_trait]
impl AssociationStore for SqliteStorage {
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                event_id TEXT PRIMARY KEY,
                event_date TEXT,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS link_event_associations (
                link_id TEXT NOT NULL,
                event_id TEXT NOT NULL,
                start_date TEXT,
                end_date TEXT,
                auto_calculated INTEGER NOT NULL DEFAULT 1,
                cached_metrics TEXT NOT NULL,
                last_synced_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (link_id, event_id)
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_associations_event_id \
             ON link_event_associations(event_id)",
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS link_snapshots (
                link_id TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                fetched_at TEXT NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn get_association(
        &self,
        link_id: &str,
        event_id: &str,
    ) -> StorageResult<Option<LinkEventAssociation>> {
        let row = sqlx::query_as::<_, AssociationRow>(&format!(
            "SELECT {} FROM link_event_associations WHERE link_id = ? AND event_id = ?",
            ASSOCIATION_COLUMNS
        ))
        .bind(link_id)
        .bind(event_id)
        .fetch_optional(self.pool.as_ref())
        .await
        .map_err(db_err)?;

        row.map(LinkEventAssociation::try_from).transpose()
    }

    async fn insert_association(&self, association: &LinkEventAssociation) -> StorageResult<()> {
        let metrics = serde_json::to_string(&association.cached_metrics)
            .map_err(|e| StorageError::Other(e.into()))?;

        let result = sqlx::query(
            r#"
            INSERT INTO link_event_associations
                (link_id, event_id, start_date, end_date, auto_calculated,
                 cached_metrics, last_synced_at, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(link_id, event_id) DO NOTHING
            "#,
        )
        .bind(&association.link_id)
        .bind(&association.event_id)
        .bind(association.range.start.date())
        .bind(association.range.end.date())
        .bind(association.auto_calculated)
        .bind(metrics)
        .bind(association.last_synced_at)
        .bind(association.created_at)
        .bind(association.updated_at)
        .execute(self.pool.as_ref())
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(StorageError::Conflict);
        }

        Ok(())
    }

    async fn list_for_link(&self, link_id: &str) -> StorageResult<Vec<LinkEventAssociation>> {
        let rows = sqlx::query_as::<_, AssociationRow>(&format!(
            "SELECT {} FROM link_event_associations \
             WHERE link_id = ? ORDER BY created_at, event_id",
            ASSOCIATION_COLUMNS
        ))
        .bind(link_id)
        .fetch_all(self.pool.as_ref())
        .await
        .map_err(db_err)?;

        into_associations(rows)
    }

    async fn list_for_event(&self, event_id: &str) -> StorageResult<Vec<LinkEventAssociation>> {
        let rows = sqlx::query_as::<_, AssociationRow>(&format!(
            "SELECT {} FROM link_event_associations WHERE event_id = ? ORDER BY link_id",
            ASSOCIATION_COLUMNS
        ))
        .bind(event_id)
        .fetch_all(self.pool.as_ref())
        .await
        .map_err(db_err)?;

        into_associations(rows)
    }

    async fn list_link_ids(&self) -> StorageResult<Vec<String>> {
        let ids = sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT link_id FROM link_event_associations ORDER BY link_id",
        )
        .fetch_all(self.pool.as_ref())
        .await
        .map_err(db_err)?;

        Ok(ids)
    }

    async fn replace_link(
        &self,
        link_id: &str,
        updates: &[AssociationUpdate],
    ) -> StorageResult<Vec<LinkEventAssociation>> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        for update in updates {
            let metrics = serde_json::to_string(&update.metrics)
                .map_err(|e| StorageError::Other(e.into()))?;

            let query = match update.range {
                Some(range) => sqlx::query(
                    r#"
                    UPDATE link_event_associations
                    SET start_date = ?, end_date = ?, cached_metrics = ?, auto_calculated = 1,
                        last_synced_at = ?, updated_at = ?
                    WHERE link_id = ? AND event_id = ?
                    "#,
                )
                .bind(range.start.date())
                .bind(range.end.date())
                .bind(metrics),
                None => sqlx::query(
                    r#"
                    UPDATE link_event_associations
                    SET cached_metrics = ?, auto_calculated = 1, last_synced_at = ?, updated_at = ?
                    WHERE link_id = ? AND event_id = ?
                    "#,
                )
                .bind(metrics),
            };

            query
                .bind(update.synced_at)
                .bind(update.synced_at)
                .bind(link_id)
                .bind(&update.event_id)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
        }

        tx.commit().await.map_err(db_err)?;

        self.list_for_link(link_id).await
    }

    async fn delete_association(&self, link_id: &str, event_id: &str) -> StorageResult<bool> {
        let result = sqlx::query(
            "DELETE FROM link_event_associations WHERE link_id = ? AND event_id = ?",
        )
        .bind(link_id)
        .bind(event_id)
        .execute(self.pool.as_ref())
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_for_event(&self, event_id: &str) -> StorageResult<u64> {
        let result = sqlx::query("DELETE FROM link_event_associations WHERE event_id = ?")
            .bind(event_id)
            .execute(self.pool.as_ref())
            .await
            .map_err(db_err)?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl EventStore for SqliteStorage {
    async fn get_event(&self, event_id: &str) -> StorageResult<Option<EventWindow>> {
        let row = sqlx::query_as::<_, (String, Option<NaiveDate>, DateTime<Utc>)>(
            "SELECT event_id, event_date, created_at FROM events WHERE event_id = ?",
        )
        .bind(event_id)
        .fetch_optional(self.pool.as_ref())
        .await
        .map_err(db_err)?;

        match row {
            None => Ok(None),
            Some((event_id, Some(event_date), created_at)) => {
                Ok(Some(EventWindow::new(event_id, event_date, created_at)))
            }
            Some((event_id, None, _)) => Err(StorageError::Invalid(format!(
                "event '{}' has no event date",
                event_id
            ))),
        }
    }
}

#[async_trait]
impl SnapshotSource for SqliteStorage {
    async fn fetch_snapshot(&self, link_id: &str) -> StorageResult<Option<LinkAnalyticsSnapshot>> {
        let payload = sqlx::query_scalar::<_, String>(
            "SELECT payload FROM link_snapshots WHERE link_id = ?",
        )
        .bind(link_id)
        .fetch_optional(self.pool.as_ref())
        .await
        .map_err(db_err)?;

        payload
            .map(|p| {
                serde_json::from_str(&p).map_err(|e| {
                    StorageError::Invalid(format!("snapshot for link '{}': {}", link_id, e))
                })
            })
            .transpose()
    }
}
