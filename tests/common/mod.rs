#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use engagement_core::models::MembershipTier;
use engagement_core::notify::{Notification, Notifier};
use engagement_core::{Engagement, MemoryStore, Settings};

pub const ENROLLED: i64 = 1001;
pub const PREVIEWER: i64 = 1002;
pub const CURATOR: i64 = 1003;

pub const FOUNDATIONS: i64 = 10;
pub const ADVANCED: i64 = 20;

pub const CHAPTER_ONE: i64 = 501;
pub const REVIEW: i64 = 502;
pub const COMMENTARY: i64 = 601;
pub const UNFILED: i64 = 701;

pub const FOUNDATIONS_TOPIC: i64 = 1;

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<Notification>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

pub struct FailingNotifier;

#[async_trait]
impl Notifier for FailingNotifier {
    async fn notify(&self, _notification: &Notification) -> anyhow::Result<()> {
        anyhow::bail!("chat gateway unreachable")
    }
}

pub fn catalog() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.add_member(
        ENROLLED,
        MembershipTier::Enrolled {
            collection_id: FOUNDATIONS,
        },
        &[],
    );
    store.add_member(PREVIEWER, MembershipTier::PreviewOnly, &[ADVANCED]);
    store.add_member(CURATOR, MembershipTier::Curator, &[]);

    store.add_content(CHAPTER_ONE, Some(FOUNDATIONS), FOUNDATIONS_TOPIC, "Chapter one");
    store.add_content(REVIEW, Some(FOUNDATIONS), FOUNDATIONS_TOPIC, "Review questions");
    store.add_content(COMMENTARY, Some(ADVANCED), 2, "Commentary");
    store.add_content(UNFILED, None, 3, "Unfiled draft");
    store
}

pub fn engagement_with(notifier: Arc<dyn Notifier>) -> (Arc<MemoryStore>, Arc<Engagement>) {
    let store = catalog();
    let engagement = Engagement::new(store.clone(), notifier, &Settings::default());
    (store, Arc::new(engagement))
}

pub fn engagement() -> (Arc<MemoryStore>, Arc<Engagement>) {
    engagement_with(Arc::new(RecordingNotifier::default()))
}
