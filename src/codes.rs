//! Reward-code applications: submit, decide, validate, redeem.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{EngagementError, Result};
use crate::models::{expires_after, ApplicationStatus, RewardApplication, RewardCode, UserId};
use crate::notify::{Notification, Notifier};
use crate::store::{ApplicationDecision, CodeUpdate, Store};

/// No 0/O or 1/I so codes survive being read aloud.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const CODE_GROUPS: usize = 3;
const CODE_GROUP_LEN: usize = 4;

#[derive(Debug, Clone)]
pub struct ApplicationDetails {
    pub contact: String,
    pub justification: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CodeValidation {
    pub valid: bool,
    pub percent_off: Option<i32>,
}

/// `RW-XXXX-XXXX-XXXX`, about 60 bits of entropy.
pub fn generate_code() -> String {
    let mut rng = rand::thread_rng();
    let groups: Vec<String> = (0..CODE_GROUPS)
        .map(|_| {
            (0..CODE_GROUP_LEN)
                .map(|_| char::from(CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())]))
                .collect::<String>()
        })
        .collect();
    format!("RW-{}", groups.join("-"))
}

/// Moves a pending application to its decided state.
pub fn decide(
    application: &mut RewardApplication,
    to: ApplicationStatus,
    now: DateTime<Utc>,
) -> Result<()> {
    if application.status != ApplicationStatus::Pending {
        return Err(EngagementError::InvalidState(format!(
            "application {} already {}",
            application.id, application.status
        )));
    }
    application.status = to;
    application.decided_at = Some(now);
    Ok(())
}

pub fn is_redeemable(code: &RewardCode, now: DateTime<Utc>) -> bool {
    !code.used && now < code.expires_at
}

pub struct RewardCodeManager {
    store: Arc<dyn Store>,
    notifier: Arc<dyn Notifier>,
    percent_off: i32,
    code_ttl: Duration,
}

impl RewardCodeManager {
    pub fn new(
        store: Arc<dyn Store>,
        notifier: Arc<dyn Notifier>,
        percent_off: i32,
        code_ttl: Duration,
    ) -> Self {
        Self {
            store,
            notifier,
            percent_off,
            code_ttl,
        }
    }

    pub async fn submit(
        &self,
        user_id: UserId,
        details: ApplicationDetails,
    ) -> Result<RewardApplication> {
        if details.contact.trim().is_empty() {
            return Err(EngagementError::InvalidInput(
                "contact details are required".to_string(),
            ));
        }

        let application = RewardApplication {
            id: Uuid::new_v4(),
            user_id,
            contact: details.contact.trim().to_string(),
            justification: details.justification.trim().to_string(),
            status: ApplicationStatus::Pending,
            issued_code: None,
            submitted_at: Utc::now(),
            decided_at: None,
        };
        let stored = self.store.insert_application(application).await?;
        info!(user_id, application_id = %stored.id, "reward application submitted");
        Ok(stored)
    }

    /// Mints exactly one code; a racing second approval sees `InvalidState`.
    pub async fn approve(&self, application_id: Uuid) -> Result<(RewardApplication, RewardCode)> {
        let percent_off = self.percent_off;
        let code_ttl = self.code_ttl;
        let decision: ApplicationDecision = Box::new(
            move |application: &mut RewardApplication| -> Result<Option<RewardCode>> {
                let now = Utc::now();
                let expires_at = expires_after(now, code_ttl)?;
                decide(application, ApplicationStatus::Approved, now)?;
                let code = RewardCode {
                    code: generate_code(),
                    application_id: application.id,
                    owner_user_id: application.user_id,
                    percent_off,
                    used: false,
                    used_at: None,
                    expires_at,
                    created_at: now,
                };
                application.issued_code = Some(code.code.clone());
                Ok(Some(code))
            },
        );

        let (application, minted) = self
            .store
            .decide_application(application_id, decision)
            .await?;
        let code = minted.ok_or_else(|| {
            EngagementError::InvalidState(format!("application {application_id} minted no code"))
        })?;
        info!(%application_id, user_id = application.user_id, "reward application approved");

        self.dispatch(Notification::ApplicationApproved {
            application_id,
            user_id: application.user_id,
            code: code.code.clone(),
            percent_off: code.percent_off,
        })
        .await;
        Ok((application, code))
    }

    pub async fn reject(&self, application_id: Uuid) -> Result<RewardApplication> {
        let decision: ApplicationDecision = Box::new(
            |application: &mut RewardApplication| -> Result<Option<RewardCode>> {
                decide(application, ApplicationStatus::Rejected, Utc::now())?;
                Ok(None)
            },
        );

        let (application, _) = self
            .store
            .decide_application(application_id, decision)
            .await?;
        info!(%application_id, user_id = application.user_id, "reward application rejected");

        self.dispatch(Notification::ApplicationRejected {
            application_id,
            user_id: application.user_id,
        })
        .await;
        Ok(application)
    }

    pub async fn get_application(&self, application_id: Uuid) -> Result<RewardApplication> {
        self.store
            .get_application(application_id)
            .await?
            .ok_or_else(|| EngagementError::NotFound(format!("application {application_id}")))
    }

    pub async fn list_pending(&self) -> Result<Vec<RewardApplication>> {
        self.store
            .list_applications(ApplicationStatus::Pending)
            .await
    }

    pub async fn validate(&self, code: &str) -> Result<CodeValidation> {
        let validation = match self.store.get_code(code).await? {
            Some(stored) if is_redeemable(&stored, Utc::now()) => CodeValidation {
                valid: true,
                percent_off: Some(stored.percent_off),
            },
            _ => CodeValidation {
                valid: false,
                percent_off: None,
            },
        };
        Ok(validation)
    }

    /// Exactly one of any number of concurrent redemptions succeeds.
    pub async fn redeem(&self, code: &str) -> Result<RewardCode> {
        let update: CodeUpdate = Box::new(|stored: &mut RewardCode| -> Result<()> {
            let now = Utc::now();
            if !is_redeemable(stored, now) {
                return Err(EngagementError::Conflict(format!(
                    "code {} already used or invalid",
                    stored.code
                )));
            }
            stored.used = true;
            stored.used_at = Some(now);
            Ok(())
        });

        let redeemed = self.store.modify_code(code, update).await?;
        info!(code = %redeemed.code, owner = redeemed.owner_user_id, "reward code redeemed");
        Ok(redeemed)
    }

    /// The decision is already committed; delivery failure is only logged.
    async fn dispatch(&self, notification: Notification) {
        if let Err(err) = self.notifier.notify(&notification).await {
            warn!(error = %err, ?notification, "notification delivery failed");
        }
    }
}
