//! SQLite storage for import records.
//!
//! One row per `(importer, imported_item_uuid)`. The reconciliation loop reads
//! all rows of an importer before a run and writes the touched ones back in a
//! single transaction at the end, so a failed run leaves no partial state.

use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};

use crate::error::ImportError;
use crate::model::{Bundle, ImportRecord, ImportStatus};

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    /// Create a new storage instance and initialize the schema.
    ///
    /// # Arguments
    ///
    /// * `database_url` - SQLite connection string (e.g., "sqlite:reliefweb-import.db" or "sqlite::memory:")
    pub async fn new(database_url: &str) -> Result<Self, ImportError> {
        // Every connection to an in-memory database opens a new, empty one.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        let storage = Self { pool };
        storage.initialize_schema().await?;

        Ok(storage)
    }

    async fn initialize_schema(&self) -> Result<(), ImportError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS import_records (
                importer TEXT NOT NULL,
                provider_uuid TEXT NOT NULL,
                entity_type TEXT NOT NULL,
                entity_bundle TEXT NOT NULL,
                imported_item_uuid TEXT NOT NULL,
                imported_item_id TEXT NOT NULL,
                imported_item_url TEXT NOT NULL,
                imported_data_hash TEXT NOT NULL,
                status TEXT NOT NULL,
                message TEXT NOT NULL DEFAULT '',
                attempts INTEGER NOT NULL DEFAULT 0,
                entity_id INTEGER,
                entity_revision_id INTEGER,
                changed INTEGER NOT NULL,
                PRIMARY KEY (importer, imported_item_uuid)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_import_records_importer_status
            ON import_records(importer, status)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// All records of an importer, keyed by item UUID.
    pub async fn load_records(
        &self,
        importer: &str,
    ) -> Result<HashMap<String, ImportRecord>, ImportError> {
        let rows = sqlx::query("SELECT * FROM import_records WHERE importer = ?")
            .bind(importer)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                let record = record_from_row(row)?;
                Ok::<_, ImportError>((record.imported_item_uuid.clone(), record))
            })
            .collect()
    }

    /// Records of an importer, optionally filtered by status, most recently
    /// changed first.
    pub async fn list_records(
        &self,
        importer: &str,
        status: Option<ImportStatus>,
    ) -> Result<Vec<ImportRecord>, ImportError> {
        let rows = match status {
            Some(status) => {
                sqlx::query(
                    r#"
                    SELECT * FROM import_records
                    WHERE importer = ? AND status = ?
                    ORDER BY changed DESC, imported_item_id
                    "#,
                )
                .bind(importer)
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT * FROM import_records
                    WHERE importer = ?
                    ORDER BY changed DESC, imported_item_id
                    "#,
                )
                .bind(importer)
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter().map(record_from_row).collect()
    }

    /// Number of records of an importer in the given status.
    pub async fn count_by_status(
        &self,
        importer: &str,
        status: ImportStatus,
    ) -> Result<i64, ImportError> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) as total
            FROM import_records
            WHERE importer = ? AND status = ?
            "#,
        )
        .bind(importer)
        .bind(status.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("total"))
    }

    /// Upsert records in one transaction.
    pub async fn save_records(&self, records: &[ImportRecord]) -> Result<(), ImportError> {
        let mut tx = self.pool.begin().await?;

        for record in records {
            sqlx::query(
                r#"
                INSERT INTO import_records (
                    importer, provider_uuid, entity_type, entity_bundle,
                    imported_item_uuid, imported_item_id, imported_item_url,
                    imported_data_hash, status, message, attempts,
                    entity_id, entity_revision_id, changed
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(importer, imported_item_uuid) DO UPDATE SET
                    provider_uuid = excluded.provider_uuid,
                    entity_type = excluded.entity_type,
                    entity_bundle = excluded.entity_bundle,
                    imported_item_id = excluded.imported_item_id,
                    imported_item_url = excluded.imported_item_url,
                    imported_data_hash = excluded.imported_data_hash,
                    status = excluded.status,
                    message = excluded.message,
                    attempts = excluded.attempts,
                    entity_id = excluded.entity_id,
                    entity_revision_id = excluded.entity_revision_id,
                    changed = excluded.changed
                "#,
            )
            .bind(&record.importer)
            .bind(&record.provider_uuid)
            .bind(&record.entity_type)
            .bind(record.entity_bundle.as_str())
            .bind(&record.imported_item_uuid)
            .bind(&record.imported_item_id)
            .bind(&record.imported_item_url)
            .bind(&record.imported_data_hash)
            .bind(record.status.as_str())
            .bind(&record.message)
            .bind(i64::from(record.attempts))
            .bind(record.entity_id)
            .bind(record.entity_revision_id)
            .bind(record.changed.timestamp())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

fn record_from_row(row: &SqliteRow) -> Result<ImportRecord, ImportError> {
    let bundle: String = row.try_get("entity_bundle")?;
    let status: String = row.try_get("status")?;
    let attempts: i64 = row.try_get("attempts")?;
    let changed: i64 = row.try_get("changed")?;

    Ok(ImportRecord {
        importer: row.try_get("importer")?,
        provider_uuid: row.try_get("provider_uuid")?,
        entity_type: row.try_get("entity_type")?,
        entity_bundle: Bundle::parse(&bundle)
            .ok_or_else(|| corrupt(format!("unknown bundle '{bundle}'")))?,
        imported_item_uuid: row.try_get("imported_item_uuid")?,
        imported_item_id: row.try_get("imported_item_id")?,
        imported_item_url: row.try_get("imported_item_url")?,
        imported_data_hash: row.try_get("imported_data_hash")?,
        status: ImportStatus::parse(&status)
            .ok_or_else(|| corrupt(format!("unknown status '{status}'")))?,
        message: row.try_get("message")?,
        attempts: u32::try_from(attempts).unwrap_or(0),
        entity_id: row.try_get("entity_id")?,
        entity_revision_id: row.try_get("entity_revision_id")?,
        changed: timestamp_to_datetime(changed),
    })
}

fn corrupt(message: String) -> ImportError {
    ImportError::Storage(sqlx::Error::Decode(message.into()))
}

fn timestamp_to_datetime(ts: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(ts, 0).single().unwrap_or_default()
}
