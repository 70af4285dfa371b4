use std::sync::Arc;

use serde::Serialize;

use crate::error::{EngagementError, Result};
use crate::models::{ContentId, ContentItem, Member, UserId};
use crate::store::Directory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "tier")]
pub enum AccessTier {
    Full,
    Preview { cap_percent: u8 },
}

impl AccessTier {
    /// How much of a `total_len` long item the reader may see. Never more
    /// than `total_len`, whatever the cap.
    pub fn visible_len(&self, total_len: usize) -> usize {
        match self {
            AccessTier::Full => total_len,
            AccessTier::Preview { cap_percent } => {
                let cap = usize::from((*cap_percent).min(100));
                total_len / 100 * cap + total_len % 100 * cap / 100
            }
        }
    }
}

/// Decides access from already-loaded member and content metadata.
pub fn decide(member: &Member, item: &ContentItem, preview_cap_percent: u8) -> Result<AccessTier> {
    let collection_id = item.collection_id.ok_or_else(|| {
        EngagementError::NotFound(format!(
            "owning collection for content {}",
            item.content_id
        ))
    })?;

    if member.tier.is_staff() {
        return Ok(AccessTier::Full);
    }
    if member.tier.enrolled_collection() == Some(collection_id) {
        return Ok(AccessTier::Full);
    }
    if member.unlocked_collection_ids.contains(&collection_id) {
        return Ok(AccessTier::Full);
    }

    Ok(AccessTier::Preview {
        cap_percent: preview_cap_percent,
    })
}

pub struct AccessPolicy {
    directory: Arc<dyn Directory>,
    preview_cap_percent: u8,
}

impl AccessPolicy {
    pub fn new(directory: Arc<dyn Directory>, preview_cap_percent: u8) -> Self {
        Self {
            directory,
            preview_cap_percent: preview_cap_percent.min(100),
        }
    }

    pub async fn resolve_access(&self, user_id: UserId, content_id: ContentId) -> Result<AccessTier> {
        let member = self
            .directory
            .member(user_id)
            .await?
            .ok_or_else(|| EngagementError::NotFound(format!("user {user_id}")))?;
        let item = self
            .directory
            .content(content_id)
            .await?
            .ok_or_else(|| EngagementError::NotFound(format!("content {content_id}")))?;

        decide(&member, &item, self.preview_cap_percent)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::models::MembershipTier;

    fn member(tier: MembershipTier, unlocked: &[i64]) -> Member {
        Member {
            user_id: 7,
            tier,
            unlocked_collection_ids: unlocked.iter().copied().collect::<BTreeSet<_>>(),
        }
    }

    fn item(collection_id: Option<i64>) -> ContentItem {
        ContentItem {
            content_id: 100,
            collection_id,
            topic_id: 1,
            title: "Intro to tajweed".to_string(),
        }
    }

    #[test]
    fn staff_always_see_everything() {
        let moderator = member(MembershipTier::Moderator, &[]);
        assert_eq!(decide(&moderator, &item(Some(3)), 8).unwrap(), AccessTier::Full);
    }

    #[test]
    fn enrolled_member_sees_own_collection_only() {
        let enrolled = member(MembershipTier::Enrolled { collection_id: 3 }, &[]);
        assert_eq!(decide(&enrolled, &item(Some(3)), 8).unwrap(), AccessTier::Full);
        assert_eq!(
            decide(&enrolled, &item(Some(4)), 8).unwrap(),
            AccessTier::Preview { cap_percent: 8 }
        );
    }

    #[test]
    fn unlocked_collections_grant_full_access() {
        let previewer = member(MembershipTier::PreviewOnly, &[4, 9]);
        assert_eq!(decide(&previewer, &item(Some(9)), 8).unwrap(), AccessTier::Full);
        assert_eq!(
            decide(&previewer, &item(Some(2)), 8).unwrap(),
            AccessTier::Preview { cap_percent: 8 }
        );
    }

    #[test]
    fn missing_collection_is_not_found() {
        let admin = member(MembershipTier::Administrator, &[]);
        let err = decide(&admin, &item(None), 8).unwrap_err();
        assert!(matches!(err, EngagementError::NotFound(_)));
    }

    #[test]
    fn preview_cap_limits_visible_length() {
        assert_eq!(AccessTier::Preview { cap_percent: 8 }.visible_len(1000), 80);
        assert_eq!(AccessTier::Full.visible_len(1000), 1000);
        assert_eq!(AccessTier::Preview { cap_percent: 8 }.visible_len(1234), 98);
    }

    #[test]
    fn preview_never_exceeds_item() {
        assert_eq!(AccessTier::Preview { cap_percent: 250 }.visible_len(1000), 1000);
        assert_eq!(
            AccessTier::Preview { cap_percent: 100 }.visible_len(usize::MAX),
            usize::MAX
        );
        assert!(AccessTier::Preview { cap_percent: 50 }.visible_len(usize::MAX) < usize::MAX);
    }
}
