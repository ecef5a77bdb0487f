//! Goalvault: envelope-encrypted goal records with journal-driven insights.
//!
//! Every goal record is protected with per-record envelope encryption: a
//! fresh data key encrypts all of the record's fields, and the data key is
//! wrapped under a session-bound master key. The analytics layer consumes
//! decrypted records plus a window of journal activity and derives
//! ephemeral insights (plateaus, mood/energy correlations, completion
//! nudges) that are never persisted.
//!
//! Security:
//! - Fields encrypted at rest (AES-256-GCM, fresh IV per operation)
//! - One data key per record, wrapped under the master key
//! - Master key derived once per session (Argon2id) and cached
//! - Key material zeroized on drop, never logged
//! - A corrupted record degrades to a failure marker; it never blocks
//!   the rest of the load

pub mod error;
pub mod goal;
pub mod insights;
pub mod repo;
pub mod store;
pub mod vault;

pub use error::{AnalysisError, CodecError, KeyError, RepoError, StoreError};
pub use goal::{Goal, GoalId, GoalStatus, Milestone, Priority, Progress, Tier, Tips};
pub use insights::{
    compute, ActivityRecord, Insight, InsightKind, InsightPriority, InsightRun, SkippedGoal,
};
pub use repo::{FieldChanges, GoalRepository};
pub use vault::codec::EncryptedField;
pub use vault::{
    DataKey, KeyVault, MasterKey, MasterKeySource, NoSession, SessionKeySource, StaticKeySource,
    WrappedKey,
};
