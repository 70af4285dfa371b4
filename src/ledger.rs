//! Per-user, per-topic reward credit.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use crate::error::{EngagementError, Result};
use crate::models::{CreditKind, RewardBalance, TopicId, UserId};
use crate::store::{BalanceUpdate, Store};

/// Adds `amount` to one component and recomputes the total.
pub fn apply_credit(balance: &mut RewardBalance, kind: CreditKind, amount: i64) -> Result<()> {
    let overflow = || EngagementError::InvalidInput(format!("credit overflow adding {amount}"));
    match kind {
        CreditKind::Reading => {
            balance.reading_credit = balance.reading_credit.checked_add(amount).ok_or_else(overflow)?;
        }
        CreditKind::Completion => {
            balance.completion_credit = balance
                .completion_credit
                .checked_add(amount)
                .ok_or_else(overflow)?;
        }
    }
    balance.total_credit = balance
        .reading_credit
        .checked_add(balance.completion_credit)
        .ok_or_else(overflow)?;
    balance.updated_at = Utc::now();
    Ok(())
}

pub struct RewardLedger {
    store: Arc<dyn Store>,
}

impl RewardLedger {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn add_credit(
        &self,
        user_id: UserId,
        topic_id: TopicId,
        kind: CreditKind,
        amount: i64,
    ) -> Result<RewardBalance> {
        if amount < 0 {
            return Err(EngagementError::InvalidInput(format!(
                "credit amount {amount} is negative"
            )));
        }

        let update: BalanceUpdate =
            Box::new(move |balance: &mut RewardBalance| apply_credit(balance, kind, amount));
        let balance = self
            .store
            .modify_balance(user_id, topic_id, true, update)
            .await?;
        info!(user_id, topic_id, ?kind, amount, total = balance.total_credit, "credit added");
        Ok(balance)
    }

    pub async fn add_reading_credit(
        &self,
        user_id: UserId,
        topic_id: TopicId,
        amount: i64,
    ) -> Result<RewardBalance> {
        self.add_credit(user_id, topic_id, CreditKind::Reading, amount)
            .await
    }

    pub async fn add_completion_credit(
        &self,
        user_id: UserId,
        topic_id: TopicId,
        amount: i64,
    ) -> Result<RewardBalance> {
        self.add_credit(user_id, topic_id, CreditKind::Completion, amount)
            .await
    }

    /// Counts one more completed item. The balance must already exist.
    pub async fn mark_topic_completed(
        &self,
        user_id: UserId,
        topic_id: TopicId,
    ) -> Result<RewardBalance> {
        let update: BalanceUpdate = Box::new(|balance: &mut RewardBalance| -> Result<()> {
            balance.items_completed += 1;
            balance.updated_at = Utc::now();
            Ok(())
        });
        self.store
            .modify_balance(user_id, topic_id, false, update)
            .await
    }

    pub async fn get_balance(
        &self,
        user_id: UserId,
        topic_id: TopicId,
    ) -> Result<Option<RewardBalance>> {
        self.store.get_balance(user_id, topic_id).await
    }

    pub async fn get_user_balances(&self, user_id: UserId) -> Result<Vec<RewardBalance>> {
        self.store.list_balances(user_id).await
    }

    pub async fn get_user_total(&self, user_id: UserId) -> Result<i64> {
        self.store.user_total(user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_tracks_both_components() {
        let mut balance = RewardBalance::new(1, 1);
        apply_credit(&mut balance, CreditKind::Reading, 3).unwrap();
        apply_credit(&mut balance, CreditKind::Completion, 10).unwrap();
        apply_credit(&mut balance, CreditKind::Reading, 2).unwrap();
        assert_eq!(balance.reading_credit, 5);
        assert_eq!(balance.completion_credit, 10);
        assert_eq!(balance.total_credit, 15);
    }

    #[test]
    fn overflow_is_rejected() {
        let mut balance = RewardBalance::new(1, 1);
        balance.reading_credit = i64::MAX;
        balance.total_credit = i64::MAX;
        let err = apply_credit(&mut balance, CreditKind::Reading, 1).unwrap_err();
        assert!(matches!(err, EngagementError::InvalidInput(_)));
    }
}
