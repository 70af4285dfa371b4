//! Persistence seam for the engagement core.
//!
//! Every mutation is a closure applied to a single record while the backend
//! holds that record exclusively. The backend persists the result only if the
//! closure returns `Ok`; an `Err` leaves the stored record untouched.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    ApplicationStatus, ContentId, ContentItem, Member, OneTimeSecret, ProgressRecord,
    RewardApplication, RewardBalance, RewardCode, TopicId, UserId,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Returns whether the mutated record should be written back.
pub type ProgressUpdate = Box<dyn FnOnce(&mut ProgressRecord) -> Result<bool> + Send>;
pub type BalanceUpdate = Box<dyn FnOnce(&mut RewardBalance) -> Result<()> + Send>;
/// May mint a code, which is stored in the same unit as the decision.
pub type ApplicationDecision =
    Box<dyn FnOnce(&mut RewardApplication) -> Result<Option<RewardCode>> + Send>;
pub type CodeUpdate = Box<dyn FnOnce(&mut RewardCode) -> Result<()> + Send>;
/// The record is written on any `Ok`; the flag is handed back to the caller.
pub type SecretUpdate = Box<dyn FnOnce(&mut OneTimeSecret) -> Result<bool> + Send>;

/// Identity provider and content catalog, read-only here.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn member(&self, user_id: UserId) -> Result<Option<Member>>;

    async fn content(&self, content_id: ContentId) -> Result<Option<ContentItem>>;
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Inserts `record` unless the pair already exists, then returns the stored row.
    async fn insert_progress_if_absent(&self, record: ProgressRecord) -> Result<ProgressRecord>;

    async fn get_progress(
        &self,
        user_id: UserId,
        content_id: ContentId,
    ) -> Result<Option<ProgressRecord>>;

    /// `NotFound` when the pair has no record. The flag reports whether it was written.
    async fn modify_progress(
        &self,
        user_id: UserId,
        content_id: ContentId,
        update: ProgressUpdate,
    ) -> Result<(ProgressRecord, bool)>;

    /// With `create` an absent balance is started from zero inside the same lock.
    async fn modify_balance(
        &self,
        user_id: UserId,
        topic_id: TopicId,
        create: bool,
        update: BalanceUpdate,
    ) -> Result<RewardBalance>;

    async fn get_balance(&self, user_id: UserId, topic_id: TopicId)
        -> Result<Option<RewardBalance>>;

    /// Highest total first.
    async fn list_balances(&self, user_id: UserId) -> Result<Vec<RewardBalance>>;

    async fn user_total(&self, user_id: UserId) -> Result<i64>;

    /// `Conflict` when the user already holds a pending or approved application.
    async fn insert_application(&self, application: RewardApplication)
        -> Result<RewardApplication>;

    async fn get_application(&self, id: Uuid) -> Result<Option<RewardApplication>>;

    /// Oldest submission first.
    async fn list_applications(&self, status: ApplicationStatus)
        -> Result<Vec<RewardApplication>>;

    async fn decide_application(
        &self,
        id: Uuid,
        decision: ApplicationDecision,
    ) -> Result<(RewardApplication, Option<RewardCode>)>;

    async fn get_code(&self, code: &str) -> Result<Option<RewardCode>>;

    async fn modify_code(&self, code: &str, update: CodeUpdate) -> Result<RewardCode>;

    async fn modify_secret(
        &self,
        identity: &str,
        purpose: &str,
        create: bool,
        update: SecretUpdate,
    ) -> Result<(OneTimeSecret, bool)>;
}
