//! Goal repository: decrypt-on-load, re-encrypt-on-write.
//!
//! The repository owns the envelope protocol. On load it unwraps each
//! record's data key exactly once and decrypts every field with it; on
//! write it re-encrypts only the changed fields, reusing the record's
//! cached data key with fresh IVs. One corrupted record never blocks
//! the rest of the owner's goals.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::error::RepoError;
use crate::goal::{
    Goal, GoalId, GoalStatus, Priority, Progress, Tips, DECRYPTION_FAILED_TITLE,
};
use crate::store::{GoalRow, GoalStore, RowPatch};
use crate::vault::codec::{self, EncryptedField};
use crate::vault::{DataKey, KeyVault};

/// Plaintext-level changes for one atomic `update_fields` call. `None`
/// leaves the field untouched. Setting tips also stamps their
/// regeneration time.
#[derive(Debug, Clone, Default)]
pub struct FieldChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub progress: Option<Progress>,
    pub tips: Option<Vec<String>>,
}

impl FieldChanges {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.progress.is_none()
            && self.tips.is_none()
    }
}

pub struct GoalRepository {
    store: Arc<dyn GoalStore>,
    vault: Arc<KeyVault>,
}

impl GoalRepository {
    pub fn new(store: Arc<dyn GoalStore>, vault: Arc<KeyVault>) -> Self {
        Self { store, vault }
    }

    /// Load and decrypt every goal belonging to `owner_id`.
    ///
    /// A missing session master key is fatal to the whole load. Past
    /// that point failures only degrade: a record whose data key fails
    /// to unwrap surfaces as a "Decryption Failed" placeholder, and a
    /// field that fails to decrypt under a good key comes back empty.
    pub async fn load_all(&self, owner_id: &str) -> Result<Vec<Goal>, RepoError> {
        self.vault.master_key()?;

        let rows = self.store.fetch_all(owner_id).await?;
        let goals: Vec<Goal> = rows.into_iter().map(|row| self.decrypt_row(row)).collect();
        tracing::debug!(owner_id, count = goals.len(), "goals loaded");
        Ok(goals)
    }

    /// Load a single goal, same decrypt path as `load_all`.
    pub async fn load(&self, owner_id: &str, goal_id: GoalId) -> Result<Option<Goal>, RepoError> {
        self.vault.master_key()?;

        let row = self.store.fetch(owner_id, goal_id).await?;
        Ok(row.map(|row| self.decrypt_row(row)))
    }

    /// Create a goal: generate a fresh data key, wrap it, encrypt all
    /// provided fields under it, persist, and return the decrypted
    /// aggregate with the data key cached for later updates.
    pub async fn create(
        &self,
        owner_id: &str,
        title: &str,
        description: Option<&str>,
        priority: Priority,
        initial_progress: Option<Progress>,
    ) -> Result<Goal, RepoError> {
        let data_key = self.vault.generate_data_key();
        let wrapped = self.vault.wrap_data_key(&data_key)?;

        let title_field = codec::encrypt(title, &data_key)?;
        let description_field = description
            .map(|text| codec::encrypt(text, &data_key))
            .transpose()?;
        let progress_field = initial_progress
            .as_ref()
            .map(|progress| encrypt_payload("progress", progress, &data_key))
            .transpose()?;

        let goal_id = Uuid::new_v4();
        let now = Utc::now();
        let row = GoalRow {
            goal_id,
            owner_id: owner_id.to_string(),
            status: GoalStatus::Active,
            priority: priority.get(),
            title: title_field,
            description: description_field,
            progress: progress_field,
            tips: None,
            tips_generated_at: None,
            wrapped_key: wrapped,
            created_at: now,
        };
        self.store.insert(&row).await?;
        tracing::info!(goal_id = %goal_id, owner_id, "goal created");

        Ok(Goal {
            id: goal_id,
            owner_id: owner_id.to_string(),
            title: title.to_string(),
            description: description.map(String::from),
            progress: initial_progress,
            tips: None,
            status: GoalStatus::Active,
            priority,
            created_at: now,
            decryption_failed: false,
            data_key: Some(data_key),
        })
    }

    /// Re-encrypt only the changed fields with the goal's existing data
    /// key and persist them in one atomic statement. The data key is
    /// never regenerated or re-wrapped. Returns the authoritative
    /// updated aggregate.
    pub async fn update_fields(
        &self,
        goal: &Goal,
        changes: FieldChanges,
    ) -> Result<Goal, RepoError> {
        let data_key = goal.data_key.as_ref().ok_or(RepoError::RecordUnreadable)?;
        if changes.is_empty() {
            return Ok(goal.clone());
        }

        let mut patch = RowPatch::default();
        if let Some(title) = &changes.title {
            patch.title = Some(codec::encrypt(title, data_key)?);
        }
        if let Some(description) = &changes.description {
            patch.description = Some(codec::encrypt(description, data_key)?);
        }
        if let Some(progress) = &changes.progress {
            patch.progress = Some(encrypt_payload("progress", progress, data_key)?);
        }
        let mut tips_stamp = None;
        if let Some(items) = &changes.tips {
            let stamp = Utc::now();
            patch.tips = Some((encrypt_payload("tips", items, data_key)?, stamp));
            tips_stamp = Some(stamp);
        }

        let found = self
            .store
            .update_fields(&goal.owner_id, goal.id, patch)
            .await?;
        if !found {
            return Err(RepoError::StaleRecord);
        }
        tracing::info!(goal_id = %goal.id, "goal fields updated");

        let mut updated = goal.clone();
        if let Some(title) = changes.title {
            updated.title = title;
        }
        if let Some(description) = changes.description {
            updated.description = Some(description);
        }
        if let Some(progress) = changes.progress {
            updated.progress = Some(progress);
        }
        if let (Some(items), Some(stamp)) = (changes.tips, tips_stamp) {
            updated.tips = Some(Tips {
                items,
                generated_at: stamp,
            });
        }
        Ok(updated)
    }

    /// Status is stored unencrypted; no crypto on this path.
    pub async fn update_status(
        &self,
        goal: &Goal,
        status: GoalStatus,
    ) -> Result<Goal, RepoError> {
        let found = self
            .store
            .update_status(&goal.owner_id, goal.id, status)
            .await?;
        if !found {
            return Err(RepoError::StaleRecord);
        }
        tracing::info!(goal_id = %goal.id, status = status.as_str(), "goal status updated");

        let mut updated = goal.clone();
        updated.status = status;
        Ok(updated)
    }

    /// Hard delete of the row and every encrypted field with it. No
    /// soft-delete, no tombstone. Deleting an already-deleted row is a
    /// no-op.
    pub async fn delete(&self, goal: &Goal) -> Result<(), RepoError> {
        let removed = self.store.delete(&goal.owner_id, goal.id).await?;
        if removed {
            tracing::info!(goal_id = %goal.id, "goal deleted");
        }
        Ok(())
    }

    /// Unwraps the record's data key once, then decrypts each field
    /// independently. Never fails: corruption degrades the record or
    /// the field, and the caller keeps loading.
    fn decrypt_row(&self, row: GoalRow) -> Goal {
        let data_key = match self.vault.unwrap_data_key(&row.wrapped_key) {
            Ok(key) => key,
            Err(e) => {
                tracing::warn!(
                    goal_id = %row.goal_id,
                    key_fp = %row.wrapped_key.fingerprint(),
                    "data key unwrap failed: {e}"
                );
                return Goal {
                    id: row.goal_id,
                    owner_id: row.owner_id,
                    title: DECRYPTION_FAILED_TITLE.to_string(),
                    description: None,
                    progress: None,
                    tips: None,
                    status: row.status,
                    priority: Priority::clamped(row.priority),
                    created_at: row.created_at,
                    decryption_failed: true,
                    data_key: None,
                };
            }
        };

        let title = decrypt_field(row.goal_id, "title", &row.title, &data_key).unwrap_or_default();
        let description = row
            .description
            .as_ref()
            .and_then(|field| decrypt_field(row.goal_id, "description", field, &data_key));
        let progress = row
            .progress
            .as_ref()
            .and_then(|field| decrypt_field(row.goal_id, "progress", field, &data_key))
            .and_then(|json| parse_payload::<Progress>(row.goal_id, "progress", &json));
        let tips_items = row
            .tips
            .as_ref()
            .and_then(|field| decrypt_field(row.goal_id, "tips", field, &data_key))
            .and_then(|json| parse_payload::<Vec<String>>(row.goal_id, "tips", &json));
        let tips = match (tips_items, row.tips_generated_at) {
            (Some(items), Some(generated_at)) => Some(Tips {
                items,
                generated_at,
            }),
            _ => None,
        };

        tracing::debug!(
            goal_id = %row.goal_id,
            key_fp = %row.wrapped_key.fingerprint(),
            "record decrypted"
        );

        Goal {
            id: row.goal_id,
            owner_id: row.owner_id,
            title,
            description,
            progress,
            tips,
            status: row.status,
            priority: Priority::clamped(row.priority),
            created_at: row.created_at,
            decryption_failed: false,
            data_key: Some(data_key),
        }
    }
}

fn encrypt_payload<T: serde::Serialize>(
    field: &'static str,
    value: &T,
    key: &DataKey,
) -> Result<EncryptedField, RepoError> {
    let json = serde_json::to_string(value).map_err(|source| RepoError::Payload { field, source })?;
    Ok(codec::encrypt(&json, key)?)
}

fn decrypt_field(
    goal_id: GoalId,
    field: &'static str,
    encrypted: &EncryptedField,
    key: &DataKey,
) -> Option<String> {
    match codec::decrypt(encrypted, key) {
        Ok(text) => Some(text),
        Err(e) => {
            tracing::warn!(goal_id = %goal_id, field, "field decrypt failed, treating as empty: {e}");
            None
        }
    }
}

fn parse_payload<T: serde::de::DeserializeOwned>(
    goal_id: GoalId,
    field: &'static str,
    json: &str,
) -> Option<T> {
    match serde_json::from_str(json) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(goal_id = %goal_id, field, "malformed payload, treating as empty: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KeyError;
    use crate::goal::Milestone;
    use crate::store::sqlite::SqliteGoalStore;
    use crate::vault::{MasterKey, NoSession, StaticKeySource, KEY_LEN};

    fn test_vault(byte: u8) -> Arc<KeyVault> {
        Arc::new(KeyVault::new(Box::new(StaticKeySource::new(
            MasterKey::from_bytes([byte; KEY_LEN]),
        ))))
    }

    fn test_repo(byte: u8) -> (GoalRepository, Arc<dyn GoalStore>, Arc<KeyVault>) {
        let store: Arc<dyn GoalStore> = Arc::new(SqliteGoalStore::open_in_memory().unwrap());
        let vault = test_vault(byte);
        (
            GoalRepository::new(Arc::clone(&store), Arc::clone(&vault)),
            store,
            vault,
        )
    }

    fn list_progress(done: usize, total: usize) -> Progress {
        Progress::List {
            milestones: (0..total)
                .map(|i| Milestone {
                    label: format!("step {i}"),
                    completed: i < done,
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_create_then_load_roundtrip() {
        let (repo, _store, _vault) = test_repo(1);
        let created = repo
            .create(
                "ada",
                "Learn piano",
                Some("thirty minutes a day"),
                Priority::new(4).unwrap(),
                Some(list_progress(1, 3)),
            )
            .await
            .unwrap();

        let goals = repo.load_all("ada").await.unwrap();
        assert_eq!(goals.len(), 1);
        let goal = &goals[0];
        assert_eq!(goal.id, created.id);
        assert_eq!(goal.title, "Learn piano");
        assert_eq!(goal.description.as_deref(), Some("thirty minutes a day"));
        assert_eq!(goal.progress, Some(list_progress(1, 3)));
        assert_eq!(goal.priority.get(), 4);
        assert_eq!(goal.status, GoalStatus::Active);
        assert!(!goal.decryption_failed);
    }

    #[tokio::test]
    async fn test_stored_row_is_ciphertext_only() {
        let (repo, store, _vault) = test_repo(1);
        let created = repo
            .create("ada", "Learn piano", Some("practice daily"), Priority::new(3).unwrap(), None)
            .await
            .unwrap();

        let row = store.fetch("ada", created.id).await.unwrap().unwrap();
        assert_ne!(row.title.ciphertext, b"Learn piano".to_vec());
        let description = row.description.unwrap();
        assert_ne!(description.ciphertext, b"practice daily".to_vec());
    }

    #[tokio::test]
    async fn test_load_without_session_is_fatal() {
        let store: Arc<dyn GoalStore> = Arc::new(SqliteGoalStore::open_in_memory().unwrap());
        let vault = Arc::new(KeyVault::new(Box::new(NoSession)));
        let repo = GoalRepository::new(store, vault);
        match repo.load_all("ada").await {
            Err(RepoError::Key(KeyError::Unavailable)) => {}
            other => panic!("expected KeyError::Unavailable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_single_unwrap_per_record_per_load() {
        let (repo, _store, vault) = test_repo(1);
        let goal = repo
            .create(
                "ada",
                "Ship the album",
                Some("ten tracks"),
                Priority::new(5).unwrap(),
                Some(list_progress(2, 4)),
            )
            .await
            .unwrap();
        // Populate the fourth field so all four are present.
        repo.update_fields(
            &goal,
            FieldChanges {
                tips: Some(vec!["book studio time".into()]),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        repo.create("ada", "Run 10k", None, Priority::new(2).unwrap(), None)
            .await
            .unwrap();

        let before = vault.unwrap_count();
        let goals = repo.load_all("ada").await.unwrap();
        assert_eq!(goals.len(), 2);
        // One unwrap per record, regardless of how many fields each has.
        assert_eq!(vault.unwrap_count() - before, 2);
    }

    #[tokio::test]
    async fn test_corrupted_wrap_degrades_only_that_record() {
        let (repo, store, _vault) = test_repo(1);
        repo.create("ada", "Healthy goal", None, Priority::new(3).unwrap(), None)
            .await
            .unwrap();

        // A row whose data key was wrapped under a different master key.
        let foreign_vault = test_vault(2);
        let foreign_key = foreign_vault.generate_data_key();
        let row = GoalRow {
            goal_id: Uuid::new_v4(),
            owner_id: "ada".to_string(),
            status: GoalStatus::Active,
            priority: 2,
            title: codec::encrypt("Unreachable", &foreign_key).unwrap(),
            description: None,
            progress: None,
            tips: None,
            tips_generated_at: None,
            wrapped_key: foreign_vault.wrap_data_key(&foreign_key).unwrap(),
            created_at: Utc::now(),
        };
        store.insert(&row).await.unwrap();

        let goals = repo.load_all("ada").await.unwrap();
        assert_eq!(goals.len(), 2);

        let healthy = goals.iter().find(|g| !g.decryption_failed).unwrap();
        assert_eq!(healthy.title, "Healthy goal");

        let failed = goals.iter().find(|g| g.decryption_failed).unwrap();
        assert_eq!(failed.title, DECRYPTION_FAILED_TITLE);
        assert!(failed.description.is_none());
        assert!(failed.progress.is_none());
        assert!(failed.tips.is_none());
    }

    #[tokio::test]
    async fn test_corrupted_field_degrades_only_that_field() {
        let (repo, store, _vault) = test_repo(1);
        let goal = repo
            .create(
                "ada",
                "Write a novel",
                Some("fantasy trilogy"),
                Priority::new(4).unwrap(),
                None,
            )
            .await
            .unwrap();

        // Corrupt just the title ciphertext; the data key stays intact.
        let row = store.fetch("ada", goal.id).await.unwrap().unwrap();
        let mut corrupted = row.title.clone();
        corrupted.ciphertext[0] ^= 0xff;
        store
            .update_fields(
                "ada",
                goal.id,
                RowPatch {
                    title: Some(corrupted),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let goals = repo.load_all("ada").await.unwrap();
        assert_eq!(goals.len(), 1);
        let loaded = &goals[0];
        assert!(!loaded.decryption_failed);
        assert_eq!(loaded.title, "");
        assert_eq!(loaded.description.as_deref(), Some("fantasy trilogy"));
    }

    #[tokio::test]
    async fn test_update_reuses_data_key_and_wrap() {
        let (repo, store, _vault) = test_repo(1);
        let goal = repo
            .create("ada", "Old title", None, Priority::new(3).unwrap(), None)
            .await
            .unwrap();
        let wrap_before = store
            .fetch("ada", goal.id)
            .await
            .unwrap()
            .unwrap()
            .wrapped_key;

        let updated = repo
            .update_fields(
                &goal,
                FieldChanges {
                    title: Some("New title".into()),
                    progress: Some(list_progress(0, 2)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.title, "New title");

        let row = store.fetch("ada", goal.id).await.unwrap().unwrap();
        // Same wrapped data key, byte for byte.
        assert_eq!(row.wrapped_key, wrap_before);

        // And the reloaded record still decrypts with it.
        let reloaded = repo.load("ada", goal.id).await.unwrap().unwrap();
        assert_eq!(reloaded.title, "New title");
        assert_eq!(reloaded.progress, Some(list_progress(0, 2)));
    }

    #[tokio::test]
    async fn test_reencryption_uses_fresh_iv() {
        let (repo, store, _vault) = test_repo(1);
        let goal = repo
            .create("ada", "Same title", None, Priority::new(3).unwrap(), None)
            .await
            .unwrap();
        let iv_before = store.fetch("ada", goal.id).await.unwrap().unwrap().title.iv;

        repo.update_fields(
            &goal,
            FieldChanges {
                title: Some("Same title".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let iv_after = store.fetch("ada", goal.id).await.unwrap().unwrap().title.iv;
        assert_ne!(iv_before, iv_after);
    }

    #[tokio::test]
    async fn test_tips_update_stamps_generated_at() {
        let (repo, _store, _vault) = test_repo(1);
        let goal = repo
            .create("ada", "Meditate", None, Priority::new(2).unwrap(), None)
            .await
            .unwrap();
        assert!(goal.tips.is_none());

        let updated = repo
            .update_fields(
                &goal,
                FieldChanges {
                    tips: Some(vec!["start with five minutes".into(), "same time daily".into()]),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let tips = updated.tips.unwrap();
        assert_eq!(tips.items.len(), 2);

        let reloaded = repo.load("ada", goal.id).await.unwrap().unwrap();
        let stored = reloaded.tips.unwrap();
        assert_eq!(stored.items, tips.items);
        assert_eq!(stored.generated_at, tips.generated_at);
    }

    #[tokio::test]
    async fn test_concurrent_delete_surfaces_stale_record() {
        let (repo, _store, _vault) = test_repo(1);
        let goal = repo
            .create("ada", "Doomed", None, Priority::new(1).unwrap(), None)
            .await
            .unwrap();
        repo.delete(&goal).await.unwrap();

        let result = repo
            .update_fields(
                &goal,
                FieldChanges {
                    title: Some("too late".into()),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(result, Err(RepoError::StaleRecord)));

        let result = repo.update_status(&goal, GoalStatus::Completed).await;
        assert!(matches!(result, Err(RepoError::StaleRecord)));

        // Delete itself is idempotent.
        repo.delete(&goal).await.unwrap();
    }

    #[tokio::test]
    async fn test_update_on_unreadable_record_is_rejected() {
        let (repo, _store, _vault) = test_repo(1);
        let mut goal = repo
            .create("ada", "Fine", None, Priority::new(3).unwrap(), None)
            .await
            .unwrap();
        goal.data_key = None;
        goal.decryption_failed = true;

        let result = repo
            .update_fields(
                &goal,
                FieldChanges {
                    title: Some("nope".into()),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(result, Err(RepoError::RecordUnreadable)));
    }

    #[tokio::test]
    async fn test_status_update_survives_reload() {
        let (repo, _store, _vault) = test_repo(1);
        let goal = repo
            .create("ada", "Pause me", None, Priority::new(3).unwrap(), None)
            .await
            .unwrap();
        let updated = repo.update_status(&goal, GoalStatus::Paused).await.unwrap();
        assert_eq!(updated.status, GoalStatus::Paused);

        let reloaded = repo.load("ada", goal.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, GoalStatus::Paused);
    }
}
