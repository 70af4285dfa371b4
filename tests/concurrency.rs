mod common;

use std::collections::HashSet;

use engagement_core::codes::ApplicationDetails;
use engagement_core::models::CreditKind;
use engagement_core::{EngagementError, Store};

use common::*;

const RACERS: usize = 32;

fn details() -> ApplicationDetails {
    ApplicationDetails {
        contact: "@reader".to_string(),
        justification: "finished foundations".to_string(),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_first_reads_share_one_record() {
    let (_, engagement) = engagement();

    let handles: Vec<_> = (0..RACERS)
        .map(|_| {
            let engagement = engagement.clone();
            tokio::spawn(async move { engagement.progress.begin(ENROLLED, CHAPTER_ONE).await })
        })
        .collect();

    let mut started = HashSet::new();
    for handle in handles {
        let record = handle.await.unwrap().unwrap();
        started.insert(record.started_at);
    }
    assert_eq!(started.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_completions_award_exactly_once() {
    let (_, engagement) = engagement();
    engagement
        .progress
        .update(ENROLLED, CHAPTER_ONE, 100, 30)
        .await
        .unwrap();

    let handles: Vec<_> = (0..RACERS)
        .map(|_| {
            let engagement = engagement.clone();
            tokio::spawn(async move { engagement.progress.complete(ENROLLED, CHAPTER_ONE).await })
        })
        .collect();

    let mut awarded = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap().awarded {
            awarded += 1;
        }
    }
    assert_eq!(awarded, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_finish_reading_credits_once() {
    let (_, engagement) = engagement();
    engagement
        .progress
        .update(ENROLLED, CHAPTER_ONE, 90, 45)
        .await
        .unwrap();

    let handles: Vec<_> = (0..RACERS)
        .map(|_| {
            let engagement = engagement.clone();
            tokio::spawn(async move { engagement.finish_reading(ENROLLED, CHAPTER_ONE).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let balance = engagement
        .ledger
        .get_balance(ENROLLED, FOUNDATIONS_TOPIC)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(balance.completion_credit, 10);
    assert_eq!(balance.items_completed, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_grants_are_never_lost() {
    let (_, engagement) = engagement();

    let handles: Vec<_> = (0..RACERS * 4)
        .map(|i| {
            let engagement = engagement.clone();
            let kind = if i % 2 == 0 {
                CreditKind::Reading
            } else {
                CreditKind::Completion
            };
            tokio::spawn(async move {
                engagement
                    .ledger
                    .add_credit(ENROLLED, FOUNDATIONS_TOPIC, kind, 1)
                    .await
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let balance = engagement
        .ledger
        .get_balance(ENROLLED, FOUNDATIONS_TOPIC)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(balance.total_credit, (RACERS * 4) as i64);
    assert_eq!(balance.reading_credit, (RACERS * 2) as i64);
    assert_eq!(
        balance.total_credit,
        balance.reading_credit + balance.completion_credit
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_submissions_leave_one_application() {
    let (_, engagement) = engagement();

    let handles: Vec<_> = (0..RACERS)
        .map(|_| {
            let engagement = engagement.clone();
            tokio::spawn(async move { engagement.codes.submit(PREVIEWER, details()).await })
        })
        .collect();

    let mut accepted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => accepted += 1,
            Err(EngagementError::Conflict(_)) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(accepted, 1);
    assert_eq!(engagement.codes.list_pending().await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_approvals_mint_one_code() {
    let (store, engagement) = engagement();
    let application = engagement.codes.submit(ENROLLED, details()).await.unwrap();

    let handles: Vec<_> = (0..RACERS)
        .map(|_| {
            let engagement = engagement.clone();
            let id = application.id;
            tokio::spawn(async move { engagement.codes.approve(id).await })
        })
        .collect();

    let mut minted = Vec::new();
    for handle in handles {
        match handle.await.unwrap() {
            Ok((_, code)) => minted.push(code),
            Err(EngagementError::InvalidState(_)) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(minted.len(), 1);
    assert_eq!(minted[0].application_id, application.id);

    let stored = engagement.codes.get_application(application.id).await.unwrap();
    assert_eq!(stored.issued_code.as_deref(), Some(minted[0].code.as_str()));
    assert!(store.get_code(&minted[0].code).await.unwrap().is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_redemptions_succeed_once() {
    let (_, engagement) = engagement();
    let application = engagement.codes.submit(ENROLLED, details()).await.unwrap();
    let (_, code) = engagement.codes.approve(application.id).await.unwrap();

    let handles: Vec<_> = (0..RACERS)
        .map(|_| {
            let engagement = engagement.clone();
            let code = code.code.clone();
            tokio::spawn(async move { engagement.codes.redeem(&code).await })
        })
        .collect();

    let mut redeemed = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(code) => {
                assert!(code.used);
                redeemed += 1;
            }
            Err(EngagementError::Conflict(_)) => conflicts += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(redeemed, 1);
    assert_eq!(conflicts, RACERS - 1);
    assert!(!engagement.codes.validate(&code.code).await.unwrap().valid);
}
