//! SQLite-backed goal store.
//!
//! Ciphertext and IVs are BLOB columns; timestamps are RFC 3339 text.
//! Every mutation is a single statement, so an aborted call commits
//! either all of its columns or none.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, ToSql};
use uuid::Uuid;

use super::{GoalRow, GoalStore, RowPatch};
use crate::error::StoreError;
use crate::goal::{GoalId, GoalStatus};
use crate::vault::codec::EncryptedField;
use crate::vault::{WrappedKey, IV_LEN};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS goals (
    goal_id TEXT NOT NULL,
    owner_id TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'active',
    priority INTEGER NOT NULL,
    title_ct BLOB NOT NULL,
    title_iv BLOB NOT NULL,
    description_ct BLOB,
    description_iv BLOB,
    progress_ct BLOB,
    progress_iv BLOB,
    tips_ct BLOB,
    tips_iv BLOB,
    tips_generated_at TEXT,
    data_key_ct BLOB NOT NULL,
    data_key_iv BLOB NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (owner_id, goal_id)
);";

const SELECT_COLUMNS: &str = "goal_id, owner_id, status, priority, \
     title_ct, title_iv, description_ct, description_iv, \
     progress_ct, progress_iv, tips_ct, tips_iv, tips_generated_at, \
     data_key_ct, data_key_iv, created_at";

/// Default database location under the user's home directory. Embedding
/// applications normally pass their own path to [`SqliteGoalStore::open`].
pub fn default_db_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".goalvault").join("goals.db"))
}

pub struct SqliteGoalStore {
    db: Mutex<Connection>,
}

impl SqliteGoalStore {
    /// Open (or create) the store at the given path.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let db = Connection::open(path)?;
        // WAL mode for concurrent reads
        db.pragma_update(None, "journal_mode", "WAL")?;
        Self::init(db)
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(db: Connection) -> Result<Self, StoreError> {
        db.execute_batch(SCHEMA)?;
        Ok(Self { db: Mutex::new(db) })
    }
}

fn push_field(
    sets: &mut Vec<&'static str>,
    values: &mut Vec<Box<dyn ToSql>>,
    name_ct: &'static str,
    name_iv: &'static str,
    field: &EncryptedField,
) {
    sets.push(name_ct);
    values.push(Box::new(field.ciphertext.clone()));
    sets.push(name_iv);
    values.push(Box::new(field.iv.to_vec()));
}

fn iv_from_blob(idx: usize, blob: Vec<u8>) -> rusqlite::Result<[u8; IV_LEN]> {
    blob.try_into().map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(idx, Type::Blob, "bad IV length".into())
    })
}

fn optional_field(
    idx: usize,
    ciphertext: Option<Vec<u8>>,
    iv: Option<Vec<u8>>,
) -> rusqlite::Result<Option<EncryptedField>> {
    match (ciphertext, iv) {
        (Some(ciphertext), Some(iv)) => Ok(Some(EncryptedField {
            ciphertext,
            iv: iv_from_blob(idx, iv)?,
        })),
        // A half-written pair is treated as absent.
        _ => Ok(None),
    }
}

fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<GoalRow> {
    let goal_id: String = row.get(0)?;
    let goal_id = Uuid::parse_str(&goal_id)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))?;

    Ok(GoalRow {
        goal_id,
        owner_id: row.get(1)?,
        status: GoalStatus::parse(&row.get::<_, String>(2)?),
        priority: row.get(3)?,
        title: EncryptedField {
            ciphertext: row.get(4)?,
            iv: iv_from_blob(5, row.get(5)?)?,
        },
        description: optional_field(7, row.get(6)?, row.get(7)?)?,
        progress: optional_field(9, row.get(8)?, row.get(9)?)?,
        tips: optional_field(11, row.get(10)?, row.get(11)?)?,
        tips_generated_at: row
            .get::<_, Option<String>>(12)?
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc)),
        wrapped_key: WrappedKey {
            ciphertext: row.get(13)?,
            iv: iv_from_blob(14, row.get(14)?)?,
        },
        created_at: row
            .get::<_, String>(15)
            .map(|s| {
                DateTime::parse_from_rfc3339(&s)
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_default()
            })
            .unwrap_or_default(),
    })
}

#[async_trait]
impl GoalStore for SqliteGoalStore {
    async fn fetch_all(&self, owner_id: &str) -> Result<Vec<GoalRow>, StoreError> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM goals WHERE owner_id = ?1 ORDER BY created_at"
        ))?;
        let rows = stmt
            .query_map(params![owner_id], map_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    async fn fetch(&self, owner_id: &str, goal_id: GoalId) -> Result<Option<GoalRow>, StoreError> {
        let db = self.db.lock().unwrap();
        let result = db.query_row(
            &format!("SELECT {SELECT_COLUMNS} FROM goals WHERE owner_id = ?1 AND goal_id = ?2"),
            params![owner_id, goal_id.to_string()],
            map_row,
        );
        match result {
            Ok(row) => Ok(Some(row)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn insert(&self, row: &GoalRow) -> Result<(), StoreError> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO goals (goal_id, owner_id, status, priority,
                title_ct, title_iv, description_ct, description_iv,
                progress_ct, progress_iv, tips_ct, tips_iv, tips_generated_at,
                data_key_ct, data_key_iv, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                row.goal_id.to_string(),
                row.owner_id,
                row.status.as_str(),
                row.priority,
                row.title.ciphertext,
                row.title.iv.to_vec(),
                row.description.as_ref().map(|f| f.ciphertext.clone()),
                row.description.as_ref().map(|f| f.iv.to_vec()),
                row.progress.as_ref().map(|f| f.ciphertext.clone()),
                row.progress.as_ref().map(|f| f.iv.to_vec()),
                row.tips.as_ref().map(|f| f.ciphertext.clone()),
                row.tips.as_ref().map(|f| f.iv.to_vec()),
                row.tips_generated_at.map(|ts| ts.to_rfc3339()),
                row.wrapped_key.ciphertext,
                row.wrapped_key.iv.to_vec(),
                row.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    async fn update_fields(
        &self,
        owner_id: &str,
        goal_id: GoalId,
        patch: RowPatch,
    ) -> Result<bool, StoreError> {
        if patch.is_empty() {
            return self.fetch(owner_id, goal_id).await.map(|r| r.is_some());
        }

        let mut sets: Vec<&'static str> = Vec::new();
        let mut values: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(field) = &patch.title {
            push_field(&mut sets, &mut values, "title_ct = ?", "title_iv = ?", field);
        }
        if let Some(field) = &patch.description {
            push_field(
                &mut sets,
                &mut values,
                "description_ct = ?",
                "description_iv = ?",
                field,
            );
        }
        if let Some(field) = &patch.progress {
            push_field(
                &mut sets,
                &mut values,
                "progress_ct = ?",
                "progress_iv = ?",
                field,
            );
        }
        if let Some((field, generated_at)) = &patch.tips {
            push_field(&mut sets, &mut values, "tips_ct = ?", "tips_iv = ?", field);
            sets.push("tips_generated_at = ?");
            values.push(Box::new(generated_at.to_rfc3339()));
        }

        let sql = format!(
            "UPDATE goals SET {} WHERE owner_id = ? AND goal_id = ?",
            sets.join(", ")
        );
        values.push(Box::new(owner_id.to_string()));
        values.push(Box::new(goal_id.to_string()));

        let db = self.db.lock().unwrap();
        let rows = db.execute(
            &sql,
            params_from_iter(values.iter().map(|v| v.as_ref() as &dyn ToSql)),
        )?;
        Ok(rows > 0)
    }

    async fn update_status(
        &self,
        owner_id: &str,
        goal_id: GoalId,
        status: GoalStatus,
    ) -> Result<bool, StoreError> {
        let db = self.db.lock().unwrap();
        let rows = db.execute(
            "UPDATE goals SET status = ?1 WHERE owner_id = ?2 AND goal_id = ?3",
            params![status.as_str(), owner_id, goal_id.to_string()],
        )?;
        Ok(rows > 0)
    }

    async fn delete(&self, owner_id: &str, goal_id: GoalId) -> Result<bool, StoreError> {
        let db = self.db.lock().unwrap();
        let rows = db.execute(
            "DELETE FROM goals WHERE owner_id = ?1 AND goal_id = ?2",
            params![owner_id, goal_id.to_string()],
        )?;
        Ok(rows > 0)
    }
}
