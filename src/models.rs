use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::EngagementError;

pub type UserId = i64;
pub type ContentId = i64;
pub type CollectionId = i64;
pub type TopicId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum MembershipTier {
    PreviewOnly,
    Enrolled { collection_id: CollectionId },
    Instructor,
    Curator,
    Moderator,
    Administrator,
}

impl MembershipTier {
    /// Builds a tier from its stored name and the enrolled collection column.
    pub fn from_parts(
        name: &str,
        enrolled_collection_id: Option<CollectionId>,
    ) -> Result<Self, EngagementError> {
        match name {
            "preview-only" => Ok(MembershipTier::PreviewOnly),
            "enrolled" => enrolled_collection_id
                .map(|collection_id| MembershipTier::Enrolled { collection_id })
                .ok_or_else(|| {
                    EngagementError::InvalidInput(
                        "enrolled tier requires an enrolled collection".to_string(),
                    )
                }),
            "instructor" => Ok(MembershipTier::Instructor),
            "curator" => Ok(MembershipTier::Curator),
            "moderator" => Ok(MembershipTier::Moderator),
            "administrator" => Ok(MembershipTier::Administrator),
            other => Err(EngagementError::InvalidInput(format!(
                "unknown membership tier {other}"
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            MembershipTier::PreviewOnly => "preview-only",
            MembershipTier::Enrolled { .. } => "enrolled",
            MembershipTier::Instructor => "instructor",
            MembershipTier::Curator => "curator",
            MembershipTier::Moderator => "moderator",
            MembershipTier::Administrator => "administrator",
        }
    }

    pub fn enrolled_collection(&self) -> Option<CollectionId> {
        match self {
            MembershipTier::Enrolled { collection_id } => Some(*collection_id),
            _ => None,
        }
    }

    pub fn is_staff(&self) -> bool {
        matches!(
            self,
            MembershipTier::Instructor
                | MembershipTier::Curator
                | MembershipTier::Moderator
                | MembershipTier::Administrator
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Member {
    pub user_id: UserId,
    pub tier: MembershipTier,
    pub unlocked_collection_ids: BTreeSet<CollectionId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContentItem {
    pub content_id: ContentId,
    pub collection_id: Option<CollectionId>,
    pub topic_id: TopicId,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressRecord {
    pub user_id: UserId,
    pub content_id: ContentId,
    pub percent_complete: i32,
    pub elapsed_seconds: i64,
    pub pace_valid: bool,
    pub credit_awarded: bool,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ProgressRecord {
    pub fn new(user_id: UserId, content_id: ContentId) -> Self {
        Self {
            user_id,
            content_id,
            percent_complete: 0,
            elapsed_seconds: 0,
            pace_valid: false,
            credit_awarded: false,
            started_at: Utc::now(),
            completed_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditKind {
    Reading,
    Completion,
}

impl FromStr for CreditKind {
    type Err = EngagementError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "reading" => Ok(CreditKind::Reading),
            "completion" => Ok(CreditKind::Completion),
            other => Err(EngagementError::InvalidInput(format!(
                "unknown credit kind {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RewardBalance {
    pub user_id: UserId,
    pub topic_id: TopicId,
    pub reading_credit: i64,
    pub completion_credit: i64,
    pub total_credit: i64,
    pub items_completed: i32,
    pub updated_at: DateTime<Utc>,
}

impl RewardBalance {
    pub fn new(user_id: UserId, topic_id: TopicId) -> Self {
        Self {
            user_id,
            topic_id,
            reading_credit: 0,
            completion_credit: 0,
            total_credit: 0,
            items_completed: 0,
            updated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApplicationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplicationStatus::Pending => "pending",
            ApplicationStatus::Approved => "approved",
            ApplicationStatus::Rejected => "rejected",
        }
    }

    /// Pending and approved applications block a new submission.
    pub fn is_active(&self) -> bool {
        matches!(self, ApplicationStatus::Pending | ApplicationStatus::Approved)
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApplicationStatus {
    type Err = EngagementError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(ApplicationStatus::Pending),
            "approved" => Ok(ApplicationStatus::Approved),
            "rejected" => Ok(ApplicationStatus::Rejected),
            other => Err(EngagementError::InvalidInput(format!(
                "unknown application status {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RewardApplication {
    pub id: Uuid,
    pub user_id: UserId,
    pub contact: String,
    pub justification: String,
    pub status: ApplicationStatus,
    pub issued_code: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RewardCode {
    pub code: String,
    pub application_id: Uuid,
    pub owner_user_id: UserId,
    pub percent_off: i32,
    pub used: bool,
    pub used_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// `now + ttl`, refusing lifetimes that are not positive or run off the calendar.
pub fn expires_after(now: DateTime<Utc>, ttl: Duration) -> Result<DateTime<Utc>, EngagementError> {
    if ttl <= Duration::zero() {
        return Err(EngagementError::InvalidInput(format!(
            "lifetime must be positive, got {ttl}"
        )));
    }
    now.checked_add_signed(ttl)
        .ok_or_else(|| EngagementError::InvalidInput(format!("lifetime {ttl} is out of range")))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OneTimeSecret {
    pub identity: String,
    pub purpose: String,
    #[serde(skip_serializing)]
    pub secret: String,
    pub expires_at: DateTime<Utc>,
    pub sends_in_window: i32,
    pub window_started_at: DateTime<Utc>,
    /// Wrong guesses against the current secret.
    pub failed_attempts: i32,
    pub consumed: bool,
}

impl OneTimeSecret {
    pub fn new(identity: &str, purpose: &str) -> Self {
        let now = Utc::now();
        Self {
            identity: identity.to_string(),
            purpose: purpose.to_string(),
            secret: String::new(),
            expires_at: now,
            sends_in_window: 0,
            window_started_at: now,
            failed_attempts: 0,
            consumed: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_rejects_unusable_lifetimes() {
        let now = Utc::now();
        assert_eq!(expires_after(now, Duration::days(30)).unwrap(), now + Duration::days(30));
        assert!(expires_after(now, Duration::zero()).is_err());
        assert!(expires_after(now, Duration::days(-1)).is_err());
        assert!(expires_after(now, Duration::MAX).is_err());
    }

    #[test]
    fn enrolled_tier_needs_collection() {
        assert!(MembershipTier::from_parts("enrolled", None).is_err());
        assert_eq!(
            MembershipTier::from_parts("enrolled", Some(4)).unwrap(),
            MembershipTier::Enrolled { collection_id: 4 }
        );
    }

    #[test]
    fn staff_tiers_are_recognised() {
        for name in ["instructor", "curator", "moderator", "administrator"] {
            let tier = MembershipTier::from_parts(name, None).unwrap();
            assert!(tier.is_staff());
            assert_eq!(tier.name(), name);
        }
        assert!(!MembershipTier::PreviewOnly.is_staff());
        assert!(MembershipTier::from_parts("guest", None).is_err());
    }

    #[test]
    fn application_status_round_trips_through_text() {
        for status in [
            ApplicationStatus::Pending,
            ApplicationStatus::Approved,
            ApplicationStatus::Rejected,
        ] {
            assert_eq!(status.as_str().parse::<ApplicationStatus>().unwrap(), status);
        }
        assert!(!ApplicationStatus::Rejected.is_active());
    }
}
