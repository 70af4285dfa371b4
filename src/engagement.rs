//! Wires the components together and sequences completion with credit.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::access::AccessPolicy;
use crate::codes::RewardCodeManager;
use crate::config::Settings;
use crate::error::{EngagementError, Result};
use crate::ledger::RewardLedger;
use crate::models::{ContentId, RewardBalance, UserId};
use crate::notify::Notifier;
use crate::progress::{Completion, ProgressTracker};
use crate::secrets::OneTimeSecrets;
use crate::store::{Directory, Store};

#[derive(Debug, Clone, Serialize)]
pub struct FinishedReading {
    pub completion: Completion,
    /// Present only when this call granted the credit.
    pub balance: Option<RewardBalance>,
}

pub struct Engagement {
    pub access: AccessPolicy,
    pub progress: ProgressTracker,
    pub ledger: RewardLedger,
    pub codes: RewardCodeManager,
    pub secrets: OneTimeSecrets,
    directory: Arc<dyn Directory>,
    completion_credit: i64,
}

impl Engagement {
    pub fn new<B>(backend: Arc<B>, notifier: Arc<dyn Notifier>, settings: &Settings) -> Self
    where
        B: Store + Directory + 'static,
    {
        let store: Arc<dyn Store> = backend.clone();
        let directory: Arc<dyn Directory> = backend;
        Self {
            access: AccessPolicy::new(directory.clone(), settings.preview_cap_percent),
            progress: ProgressTracker::new(
                store.clone(),
                directory.clone(),
                settings.min_pace_seconds,
            ),
            ledger: RewardLedger::new(store.clone()),
            codes: RewardCodeManager::new(
                store.clone(),
                notifier,
                settings.code_percent_off,
                settings.code_ttl,
            ),
            secrets: OneTimeSecrets::new(
                store,
                settings.secret_ttl,
                settings.secret_sends_per_hour,
                settings.secret_max_attempts,
            ),
            directory,
            completion_credit: settings.completion_credit,
        }
    }

    /// Completes the item and, only if this call won the award, grants credit.
    ///
    /// The two steps are separately locked. A failure after the award flag is
    /// set leaves completion without credit, never credit twice.
    pub async fn finish_reading(
        &self,
        user_id: UserId,
        content_id: ContentId,
    ) -> Result<FinishedReading> {
        let item = self
            .directory
            .content(content_id)
            .await?
            .ok_or_else(|| EngagementError::NotFound(format!("content {content_id}")))?;

        let completion = self.progress.complete(user_id, content_id).await?;
        if !completion.awarded {
            return Ok(FinishedReading {
                completion,
                balance: None,
            });
        }

        self.ledger
            .add_completion_credit(user_id, item.topic_id, self.completion_credit)
            .await?;
        let balance = self
            .ledger
            .mark_topic_completed(user_id, item.topic_id)
            .await?;
        info!(
            user_id,
            content_id,
            topic_id = item.topic_id,
            total = balance.total_credit,
            "completion credited"
        );
        Ok(FinishedReading {
            completion,
            balance: Some(balance),
        })
    }
}
