//! In-process backend.
//!
//! Each record lives in a `DashMap` entry; holding the entry guard is the
//! exclusive lock for that key. Closures run synchronously under the guard and
//! never await, so a key is never held across a suspension point.

use std::collections::BTreeSet;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use super::{
    ApplicationDecision, BalanceUpdate, CodeUpdate, Directory, ProgressUpdate, SecretUpdate, Store,
};
use crate::error::{EngagementError, Result};
use crate::models::{
    ApplicationStatus, CollectionId, ContentId, ContentItem, Member, MembershipTier,
    OneTimeSecret, ProgressRecord, RewardApplication, RewardBalance, RewardCode, TopicId, UserId,
};

#[derive(Default)]
pub struct MemoryStore {
    members: DashMap<UserId, Member>,
    content: DashMap<ContentId, ContentItem>,
    progress: DashMap<(UserId, ContentId), ProgressRecord>,
    balances: DashMap<(UserId, TopicId), RewardBalance>,
    applications: DashMap<Uuid, RewardApplication>,
    /// user -> the application that currently blocks a new submission
    active_applications: DashMap<UserId, Uuid>,
    codes: DashMap<String, RewardCode>,
    secrets: DashMap<(String, String), OneTimeSecret>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_member(&self, user_id: UserId, tier: MembershipTier, unlocked: &[CollectionId]) {
        self.members.insert(
            user_id,
            Member {
                user_id,
                tier,
                unlocked_collection_ids: unlocked.iter().copied().collect::<BTreeSet<_>>(),
            },
        );
    }

    pub fn add_content(
        &self,
        content_id: ContentId,
        collection_id: Option<CollectionId>,
        topic_id: TopicId,
        title: &str,
    ) {
        self.content.insert(
            content_id,
            ContentItem {
                content_id,
                collection_id,
                topic_id,
                title: title.to_string(),
            },
        );
    }
}

#[async_trait]
impl Directory for MemoryStore {
    async fn member(&self, user_id: UserId) -> Result<Option<Member>> {
        Ok(self.members.get(&user_id).map(|m| m.value().clone()))
    }

    async fn content(&self, content_id: ContentId) -> Result<Option<ContentItem>> {
        Ok(self.content.get(&content_id).map(|c| c.value().clone()))
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_progress_if_absent(&self, record: ProgressRecord) -> Result<ProgressRecord> {
        let key = (record.user_id, record.content_id);
        Ok(self.progress.entry(key).or_insert(record).value().clone())
    }

    async fn get_progress(
        &self,
        user_id: UserId,
        content_id: ContentId,
    ) -> Result<Option<ProgressRecord>> {
        Ok(self.progress.get(&(user_id, content_id)).map(|r| r.value().clone()))
    }

    async fn modify_progress(
        &self,
        user_id: UserId,
        content_id: ContentId,
        update: ProgressUpdate,
    ) -> Result<(ProgressRecord, bool)> {
        let mut stored = self.progress.get_mut(&(user_id, content_id)).ok_or_else(|| {
            EngagementError::NotFound(format!("progress for user {user_id} on {content_id}"))
        })?;
        let mut draft = stored.value().clone();
        if update(&mut draft)? {
            *stored = draft.clone();
            Ok((draft, true))
        } else {
            Ok((stored.value().clone(), false))
        }
    }

    async fn modify_balance(
        &self,
        user_id: UserId,
        topic_id: TopicId,
        create: bool,
        update: BalanceUpdate,
    ) -> Result<RewardBalance> {
        let key = (user_id, topic_id);
        match self.balances.entry(key) {
            Entry::Occupied(mut slot) => {
                let mut draft = slot.get().clone();
                update(&mut draft)?;
                slot.insert(draft.clone());
                Ok(draft)
            }
            Entry::Vacant(slot) if create => {
                let mut draft = RewardBalance::new(user_id, topic_id);
                update(&mut draft)?;
                slot.insert(draft.clone());
                Ok(draft)
            }
            Entry::Vacant(_) => Err(EngagementError::NotFound(format!(
                "balance for user {user_id} on topic {topic_id}"
            ))),
        }
    }

    async fn get_balance(
        &self,
        user_id: UserId,
        topic_id: TopicId,
    ) -> Result<Option<RewardBalance>> {
        Ok(self.balances.get(&(user_id, topic_id)).map(|b| b.value().clone()))
    }

    async fn list_balances(&self, user_id: UserId) -> Result<Vec<RewardBalance>> {
        let mut balances: Vec<RewardBalance> = self
            .balances
            .iter()
            .filter(|entry| entry.user_id == user_id)
            .map(|entry| entry.value().clone())
            .collect();
        balances.sort_by(|a, b| {
            b.total_credit
                .cmp(&a.total_credit)
                .then(a.topic_id.cmp(&b.topic_id))
        });
        Ok(balances)
    }

    async fn user_total(&self, user_id: UserId) -> Result<i64> {
        Ok(self
            .balances
            .iter()
            .filter(|entry| entry.user_id == user_id)
            .map(|entry| entry.total_credit)
            .sum())
    }

    async fn insert_application(
        &self,
        application: RewardApplication,
    ) -> Result<RewardApplication> {
        // Lock order: active_applications before applications, never the reverse.
        match self.active_applications.entry(application.user_id) {
            Entry::Occupied(mut slot) => {
                let blocking = self
                    .applications
                    .get(slot.get())
                    .map(|current| current.status.is_active())
                    .unwrap_or(false);
                if blocking {
                    return Err(EngagementError::Conflict(format!(
                        "user {} already has an active application",
                        application.user_id
                    )));
                }
                self.applications.insert(application.id, application.clone());
                slot.insert(application.id);
            }
            Entry::Vacant(slot) => {
                self.applications.insert(application.id, application.clone());
                slot.insert(application.id);
            }
        }
        Ok(application)
    }

    async fn get_application(&self, id: Uuid) -> Result<Option<RewardApplication>> {
        Ok(self.applications.get(&id).map(|a| a.value().clone()))
    }

    async fn list_applications(
        &self,
        status: ApplicationStatus,
    ) -> Result<Vec<RewardApplication>> {
        let mut matching: Vec<RewardApplication> = self
            .applications
            .iter()
            .filter(|entry| entry.status == status)
            .map(|entry| entry.value().clone())
            .collect();
        matching.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at));
        Ok(matching)
    }

    async fn decide_application(
        &self,
        id: Uuid,
        decision: ApplicationDecision,
    ) -> Result<(RewardApplication, Option<RewardCode>)> {
        let (decided, minted) = {
            let mut stored = self
                .applications
                .get_mut(&id)
                .ok_or_else(|| EngagementError::NotFound(format!("application {id}")))?;
            let mut draft = stored.value().clone();
            let minted = decision(&mut draft)?;
            if let Some(code) = &minted {
                match self.codes.entry(code.code.clone()) {
                    Entry::Occupied(_) => {
                        return Err(EngagementError::Conflict(format!(
                            "code {} already issued",
                            code.code
                        )))
                    }
                    Entry::Vacant(slot) => {
                        slot.insert(code.clone());
                    }
                }
            }
            *stored = draft.clone();
            (draft, minted)
        };

        if !decided.status.is_active() {
            self.active_applications
                .remove_if(&decided.user_id, |_, current| *current == decided.id);
        }
        Ok((decided, minted))
    }

    async fn get_code(&self, code: &str) -> Result<Option<RewardCode>> {
        Ok(self.codes.get(code).map(|c| c.value().clone()))
    }

    async fn modify_code(&self, code: &str, update: CodeUpdate) -> Result<RewardCode> {
        let mut stored = self
            .codes
            .get_mut(code)
            .ok_or_else(|| EngagementError::NotFound(format!("code {code}")))?;
        let mut draft = stored.value().clone();
        update(&mut draft)?;
        *stored = draft.clone();
        Ok(draft)
    }

    async fn modify_secret(
        &self,
        identity: &str,
        purpose: &str,
        create: bool,
        update: SecretUpdate,
    ) -> Result<(OneTimeSecret, bool)> {
        let key = (identity.to_string(), purpose.to_string());
        match self.secrets.entry(key) {
            Entry::Occupied(mut slot) => {
                let mut draft = slot.get().clone();
                let flag = update(&mut draft)?;
                slot.insert(draft.clone());
                Ok((draft, flag))
            }
            Entry::Vacant(slot) if create => {
                let mut draft = OneTimeSecret::new(identity, purpose);
                let flag = update(&mut draft)?;
                slot.insert(draft.clone());
                Ok((draft, flag))
            }
            Entry::Vacant(_) => Err(EngagementError::NotFound(format!(
                "secret for {identity} ({purpose})"
            ))),
        }
    }
}
