//! Per-user reading progress and the one-time completion award.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{EngagementError, Result};
use crate::models::{ContentId, ProgressRecord, UserId};
use crate::store::{Directory, ProgressUpdate, Store};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoAwardReason {
    AlreadyAwarded,
    PaceInvalid,
}

#[derive(Debug, Clone, Serialize)]
pub struct Completion {
    pub awarded: bool,
    pub reason: Option<NoAwardReason>,
    pub record: ProgressRecord,
}

/// Elapsed time has to strictly exceed the threshold.
pub fn pace_valid(elapsed_seconds: i64, min_pace_seconds: i64) -> bool {
    elapsed_seconds > min_pace_seconds
}

/// Folds a client measurement into the record. Progress never moves backwards.
pub fn apply_measurement(
    record: &mut ProgressRecord,
    percent_complete: i32,
    elapsed_seconds: i64,
    min_pace_seconds: i64,
) {
    record.percent_complete = record.percent_complete.max(percent_complete);
    record.elapsed_seconds = record.elapsed_seconds.max(elapsed_seconds);
    record.pace_valid = pace_valid(record.elapsed_seconds, min_pace_seconds);
}

/// Flips the award flag if the record is eligible. Returns whether it did.
pub fn try_award(record: &mut ProgressRecord) -> bool {
    if !record.pace_valid || record.credit_awarded {
        return false;
    }
    record.percent_complete = 100;
    record.completed_at = Some(Utc::now());
    record.credit_awarded = true;
    true
}

pub struct ProgressTracker {
    store: Arc<dyn Store>,
    directory: Arc<dyn Directory>,
    min_pace_seconds: i64,
}

impl ProgressTracker {
    pub fn new(store: Arc<dyn Store>, directory: Arc<dyn Directory>, min_pace_seconds: i64) -> Self {
        Self {
            store,
            directory,
            min_pace_seconds,
        }
    }

    /// Returns the single canonical record for the pair, creating it on first read.
    pub async fn begin(&self, user_id: UserId, content_id: ContentId) -> Result<ProgressRecord> {
        if self.directory.content(content_id).await?.is_none() {
            return Err(EngagementError::NotFound(format!("content {content_id}")));
        }
        self.store
            .insert_progress_if_absent(ProgressRecord::new(user_id, content_id))
            .await
    }

    pub async fn get(&self, user_id: UserId, content_id: ContentId) -> Result<Option<ProgressRecord>> {
        self.store.get_progress(user_id, content_id).await
    }

    pub async fn update(
        &self,
        user_id: UserId,
        content_id: ContentId,
        percent_complete: i32,
        elapsed_seconds: i64,
    ) -> Result<ProgressRecord> {
        if !(0..=100).contains(&percent_complete) {
            return Err(EngagementError::InvalidInput(format!(
                "percent complete {percent_complete} outside 0..=100"
            )));
        }
        if elapsed_seconds < 0 {
            return Err(EngagementError::InvalidInput(format!(
                "elapsed seconds {elapsed_seconds} is negative"
            )));
        }

        let min_pace_seconds = self.min_pace_seconds;
        let (record, _) = self
            .modify_or_begin(user_id, content_id, move || -> ProgressUpdate {
                Box::new(move |record: &mut ProgressRecord| -> Result<bool> {
                    apply_measurement(record, percent_complete, elapsed_seconds, min_pace_seconds);
                    Ok(true)
                })
            })
            .await?;
        Ok(record)
    }

    /// At most one caller ever sees `awarded == true` for a given pair.
    pub async fn complete(&self, user_id: UserId, content_id: ContentId) -> Result<Completion> {
        let (record, awarded) = self
            .modify_or_begin(user_id, content_id, || -> ProgressUpdate {
                Box::new(|record: &mut ProgressRecord| -> Result<bool> { Ok(try_award(record)) })
            })
            .await?;

        if awarded {
            info!(user_id, content_id, "completion award granted");
            return Ok(Completion {
                awarded,
                reason: None,
                record,
            });
        }

        let reason = if record.credit_awarded {
            NoAwardReason::AlreadyAwarded
        } else {
            NoAwardReason::PaceInvalid
        };
        debug!(user_id, content_id, ?reason, "completion without award");
        Ok(Completion {
            awarded,
            reason: Some(reason),
            record,
        })
    }

    /// Runs a locked mutation, creating the record through `begin` when absent.
    async fn modify_or_begin<F>(
        &self,
        user_id: UserId,
        content_id: ContentId,
        make_update: F,
    ) -> Result<(ProgressRecord, bool)>
    where
        F: Fn() -> ProgressUpdate,
    {
        match self
            .store
            .modify_progress(user_id, content_id, make_update())
            .await
        {
            Err(EngagementError::NotFound(_)) => {
                self.begin(user_id, content_id).await?;
                self.store
                    .modify_progress(user_id, content_id, make_update())
                    .await
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pace_threshold_is_strict() {
        assert!(!pace_valid(10, 10));
        assert!(pace_valid(11, 10));
        assert!(!pace_valid(2, 10));
    }

    #[test]
    fn measurements_never_regress() {
        let mut record = ProgressRecord::new(1, 2);
        apply_measurement(&mut record, 60, 30, 10);
        apply_measurement(&mut record, 40, 12, 10);
        assert_eq!(record.percent_complete, 60);
        assert_eq!(record.elapsed_seconds, 30);
        assert!(record.pace_valid);
    }

    #[test]
    fn award_requires_valid_pace() {
        let mut record = ProgressRecord::new(1, 2);
        apply_measurement(&mut record, 100, 2, 10);
        assert!(!try_award(&mut record));
        assert!(!record.credit_awarded);
        assert!(record.completed_at.is_none());
    }

    #[test]
    fn award_flag_flips_once() {
        let mut record = ProgressRecord::new(1, 2);
        apply_measurement(&mut record, 70, 15, 10);
        assert!(try_award(&mut record));
        assert_eq!(record.percent_complete, 100);
        assert!(record.completed_at.is_some());
        assert!(!try_award(&mut record));
        assert!(record.credit_awarded);
    }
}
