//! Storage collaborator interface: row-level CRUD for encrypted goal
//! rows, keyed by `(owner_id, goal_id)`.
//!
//! The store never sees plaintext or key material; it moves opaque
//! ciphertext columns. The repository owns all encryption and
//! decryption around it.

pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::goal::{GoalId, GoalStatus};
use crate::vault::codec::EncryptedField;
use crate::vault::WrappedKey;

/// One persisted goal row, exactly as stored.
#[derive(Debug, Clone)]
pub struct GoalRow {
    pub goal_id: GoalId,
    pub owner_id: String,
    pub status: GoalStatus,
    pub priority: u8,
    pub title: EncryptedField,
    pub description: Option<EncryptedField>,
    pub progress: Option<EncryptedField>,
    pub tips: Option<EncryptedField>,
    pub tips_generated_at: Option<DateTime<Utc>>,
    pub wrapped_key: WrappedKey,
    pub created_at: DateTime<Utc>,
}

/// Encrypted field-level changes for one atomic update. `None` leaves
/// the column untouched. A tips change carries its regeneration
/// timestamp so both land in the same statement.
#[derive(Debug, Default)]
pub struct RowPatch {
    pub title: Option<EncryptedField>,
    pub description: Option<EncryptedField>,
    pub progress: Option<EncryptedField>,
    pub tips: Option<(EncryptedField, DateTime<Utc>)>,
}

impl RowPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.progress.is_none()
            && self.tips.is_none()
    }
}

/// Row-level CRUD against the remote store. Assumed to provide
/// read-after-write consistency for a single row.
#[async_trait]
pub trait GoalStore: Send + Sync {
    async fn fetch_all(&self, owner_id: &str) -> Result<Vec<GoalRow>, StoreError>;

    async fn fetch(&self, owner_id: &str, goal_id: GoalId) -> Result<Option<GoalRow>, StoreError>;

    async fn insert(&self, row: &GoalRow) -> Result<(), StoreError>;

    /// Apply a patch in a single atomic statement. Returns `false` when
    /// the row no longer exists (deleted concurrently).
    async fn update_fields(
        &self,
        owner_id: &str,
        goal_id: GoalId,
        patch: RowPatch,
    ) -> Result<bool, StoreError>;

    /// Returns `false` when the row no longer exists.
    async fn update_status(
        &self,
        owner_id: &str,
        goal_id: GoalId,
        status: GoalStatus,
    ) -> Result<bool, StoreError>;

    /// Hard delete: removes the row and every encrypted field with it.
    /// Returns `false` when the row was already gone.
    async fn delete(&self, owner_id: &str, goal_id: GoalId) -> Result<bool, StoreError>;
}
