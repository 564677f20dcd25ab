//! SQLite-backed store gateway.
//!
//! Single table keyed on `(PK = USER#{owner_id}, SK = CARD#{card_id})` with
//! a secondary index on `card_id`. Every write is keyed by the owner;
//! updates are conditional on the stored owner, which is the pipeline's
//! only synchronization primitive. Creating a record emits `CardCreated`.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::config::DeleteMode;
use crate::error::{Error, Result};
use crate::events::{CardCreatedDetail, EventBus, EventEnvelope};
use crate::objects::{ObjectRef, ObjectStore};
use crate::reasoning::CardHints;

use super::record::CardRecord;
use super::schema::{initialize_schema, is_initialized, partition_key, sort_key};

/// One page of a listing.
#[derive(Debug, Clone)]
pub struct RecordPage {
    /// Records in `created_at` descending order.
    pub items: Vec<CardRecord>,
    /// Opaque cursor for the next page; `None` when exhausted.
    pub next_cursor: Option<String>,
}

/// Key-scoped reads and writes of card records.
pub struct SqliteCardStore {
    conn: Arc<Mutex<Connection>>,
    events: EventBus,
    objects: Arc<dyn ObjectStore>,
    bucket: String,
}

impl SqliteCardStore {
    /// Open or create a store at the given path.
    pub fn open(
        path: impl AsRef<Path>,
        events: EventBus,
        objects: Arc<dyn ObjectStore>,
        bucket: impl Into<String>,
    ) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| Error::Storage(e.to_string()))?;
        if !is_initialized(&conn) {
            initialize_schema(&conn).map_err(|e| Error::Storage(e.to_string()))?;
        }
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            events,
            objects,
            bucket: bucket.into(),
        })
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory(
        events: EventBus,
        objects: Arc<dyn ObjectStore>,
        bucket: impl Into<String>,
    ) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| Error::Storage(e.to_string()))?;
        initialize_schema(&conn).map_err(|e| Error::Storage(e.to_string()))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            events,
            objects,
            bucket: bucket.into(),
        })
    }

    fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| Error::Internal(format!("failed to lock connection: {}", e)))?;
        f(&conn).map_err(|e| Error::Storage(e.to_string()))
    }

    /// Insert a new record and emit `CardCreated`.
    pub fn create(&self, record: &CardRecord, hints: Option<CardHints>) -> Result<()> {
        let inserted = self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO cards (
                    pk, sk, owner_id, card_id, front_key, back_key,
                    created_at, updated_at, deleted_at,
                    ocr_metadata, pricing, authenticity, last_error
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    partition_key(&record.owner_id),
                    sort_key(&record.card_id),
                    record.owner_id,
                    record.card_id,
                    record.front_key,
                    record.back_key,
                    record.created_at.to_rfc3339(),
                    record.updated_at.to_rfc3339(),
                    record.deleted_at.map(|t| t.to_rfc3339()),
                    to_json_column(&record.ocr_metadata)?,
                    to_json_column(&record.pricing)?,
                    to_json_column(&record.authenticity)?,
                    to_json_column(&record.last_error)?,
                ],
            )
        })?;

        if inserted == 0 {
            return Err(Error::InvalidInput(format!(
                "card '{}' already exists for owner '{}'",
                record.card_id, record.owner_id
            )));
        }

        self.events
            .emit(EventEnvelope::card_created(CardCreatedDetail {
                owner_id: record.owner_id.clone(),
                card_id: record.card_id.clone(),
                front_key: record.front_key.clone(),
                back_key: record.back_key.clone(),
                hints,
                timestamp: record.created_at,
            }));
        Ok(())
    }

    /// Fetch a record by its full key.
    pub fn get(&self, owner_id: &str, card_id: &str) -> Result<CardRecord> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {} FROM cards WHERE pk = ?1 AND sk = ?2", COLUMNS),
                params![partition_key(owner_id), sort_key(card_id)],
                row_to_record,
            )
            .optional()
        })?
        .ok_or_else(|| Error::not_found(format!("card '{}' for owner '{}'", card_id, owner_id)))
    }

    /// Fetch by `card_id` alone via the secondary index, enforcing the
    /// ownership check.
    pub fn get_by_card_id(&self, card_id: &str, owner_id: &str) -> Result<CardRecord> {
        let record = self
            .with_conn(|conn| {
                conn.query_row(
                    &format!("SELECT {} FROM cards WHERE card_id = ?1", COLUMNS),
                    params![card_id],
                    row_to_record,
                )
                .optional()
            })?
            .ok_or_else(|| Error::not_found(format!("card '{}'", card_id)))?;

        if record.owner_id != owner_id {
            return Err(Error::permission_denied(format!(
                "card '{}' does not belong to owner '{}'",
                card_id, owner_id
            )));
        }
        Ok(record)
    }

    /// List an owner's records in `created_at` descending order.
    pub fn list(&self, owner_id: &str, cursor: Option<&str>, limit: usize) -> Result<RecordPage> {
        let limit = limit.clamp(1, 100);
        let after = cursor.map(decode_cursor).transpose()?;

        let items = self.with_conn(|conn| {
            let mut records = Vec::new();
            match &after {
                Some((created_at, card_id)) => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {} FROM cards
                         WHERE owner_id = ?1 AND deleted_at IS NULL
                           AND (created_at < ?2 OR (created_at = ?2 AND card_id < ?3))
                         ORDER BY created_at DESC, card_id DESC LIMIT ?4",
                        COLUMNS
                    ))?;
                    let rows = stmt.query_map(
                        params![owner_id, created_at.to_rfc3339(), card_id, limit as i64 + 1],
                        row_to_record,
                    )?;
                    for row in rows {
                        records.push(row?);
                    }
                }
                None => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {} FROM cards
                         WHERE owner_id = ?1 AND deleted_at IS NULL
                         ORDER BY created_at DESC, card_id DESC LIMIT ?2",
                        COLUMNS
                    ))?;
                    let rows = stmt.query_map(params![owner_id, limit as i64 + 1], row_to_record)?;
                    for row in rows {
                        records.push(row?);
                    }
                }
            }
            Ok(records)
        })?;

        let mut items = items;
        let next_cursor = if items.len() > limit {
            items.truncate(limit);
            items
                .last()
                .map(|last| encode_cursor(last.created_at, &last.card_id))
        } else {
            None
        };

        Ok(RecordPage { items, next_cursor })
    }

    /// Overwrite a record's mutable sections, conditional on the stored
    /// owner still matching. Zero rows affected means the record vanished
    /// or changed hands; the caller escalates, never retries.
    pub fn update(&self, record: &CardRecord) -> Result<()> {
        let updated = self.with_conn(|conn| {
            conn.execute(
                "UPDATE cards SET
                    back_key = ?4, updated_at = ?5, deleted_at = ?6,
                    ocr_metadata = ?7, pricing = ?8, authenticity = ?9, last_error = ?10
                 WHERE pk = ?1 AND sk = ?2 AND owner_id = ?3",
                params![
                    partition_key(&record.owner_id),
                    sort_key(&record.card_id),
                    record.owner_id,
                    record.back_key,
                    record.updated_at.to_rfc3339(),
                    record.deleted_at.map(|t| t.to_rfc3339()),
                    to_json_column(&record.ocr_metadata)?,
                    to_json_column(&record.pricing)?,
                    to_json_column(&record.authenticity)?,
                    to_json_column(&record.last_error)?,
                ],
            )
        })?;

        if updated == 0 {
            return Err(Error::not_found(format!(
                "card '{}' for owner '{}' (conditional write failed)",
                record.card_id, record.owner_id
            )));
        }
        Ok(())
    }

    /// Delete a record. Soft sets `deleted_at`; hard removes the row and
    /// the referenced image objects.
    pub async fn delete(&self, owner_id: &str, card_id: &str, mode: DeleteMode) -> Result<()> {
        match mode {
            DeleteMode::Soft => {
                let updated = self.with_conn(|conn| {
                    conn.execute(
                        "UPDATE cards SET deleted_at = ?3, updated_at = ?3
                         WHERE pk = ?1 AND sk = ?2 AND deleted_at IS NULL",
                        params![
                            partition_key(owner_id),
                            sort_key(card_id),
                            Utc::now().to_rfc3339()
                        ],
                    )
                })?;
                if updated == 0 {
                    return Err(Error::not_found(format!(
                        "card '{}' for owner '{}'",
                        card_id, owner_id
                    )));
                }
                Ok(())
            }
            DeleteMode::Hard => {
                let record = self.get(owner_id, card_id)?;
                self.with_conn(|conn| {
                    conn.execute(
                        "DELETE FROM cards WHERE pk = ?1 AND sk = ?2",
                        params![partition_key(owner_id), sort_key(card_id)],
                    )
                })?;

                self.objects
                    .delete(&ObjectRef::new(&self.bucket, &record.front_key))
                    .await?;
                if let Some(back_key) = &record.back_key {
                    self.objects
                        .delete(&ObjectRef::new(&self.bucket, back_key))
                        .await?;
                }
                tracing::info!(owner_id, card_id, "record and image objects hard-deleted");
                Ok(())
            }
        }
    }
}

const COLUMNS: &str = "owner_id, card_id, front_key, back_key, created_at, updated_at, \
                       deleted_at, ocr_metadata, pricing, authenticity, last_error";

fn to_json_column<T: serde::Serialize>(value: &Option<T>) -> rusqlite::Result<Option<String>> {
    value
        .as_ref()
        .map(|v| {
            serde_json::to_string(v).map_err(|e| {
                rusqlite::Error::ToSqlConversionFailure(Box::new(e))
            })
        })
        .transpose()
}

fn parse_timestamp(raw: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn from_json<T: serde::de::DeserializeOwned>(raw: Option<String>) -> Option<T> {
    raw.and_then(|s| serde_json::from_str(&s).ok())
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<CardRecord> {
    Ok(CardRecord {
        owner_id: row.get(0)?,
        card_id: row.get(1)?,
        front_key: row.get(2)?,
        back_key: row.get(3)?,
        created_at: parse_timestamp(row.get(4)?),
        updated_at: parse_timestamp(row.get(5)?),
        deleted_at: row.get::<_, Option<String>>(6)?.map(parse_timestamp),
        ocr_metadata: from_json(row.get(7)?),
        pricing: from_json(row.get(8)?),
        authenticity: from_json(row.get(9)?),
        last_error: from_json(row.get(10)?),
    })
}

fn encode_cursor(created_at: DateTime<Utc>, card_id: &str) -> String {
    format!("{}|{}", created_at.to_rfc3339(), card_id)
}

fn decode_cursor(cursor: &str) -> Result<(DateTime<Utc>, String)> {
    let (raw_time, card_id) = cursor
        .split_once('|')
        .ok_or_else(|| Error::InvalidInput("malformed pagination cursor".to_string()))?;
    let created_at = DateTime::parse_from_rfc3339(raw_time)
        .map_err(|_| Error::InvalidInput("malformed pagination cursor".to_string()))?
        .with_timezone(&Utc);
    Ok((created_at, card_id.to_string()))
}
