//! Persisted, expiring one-time secrets keyed by identity and purpose.
//!
//! Resend limiting reuses a per-record counter with a fixed window start. It is
//! approximate: the counter only resets once the stored window start is an hour
//! old, so bursts straddling a window boundary can exceed the limit. It is not
//! a sliding window.
//!
//! Wrong guesses are counted on the record and committed like any other
//! change. Once the limit is reached the secret is burned and has to be issued
//! again.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use tracing::{info, warn};

use crate::error::{EngagementError, Result};
use crate::models::{expires_after, OneTimeSecret};
use crate::store::{SecretUpdate, Store};

const SECRET_DIGITS: u32 = 6;

fn resend_window() -> Duration {
    Duration::hours(1)
}

pub fn generate_secret() -> String {
    let value = rand::thread_rng().gen_range(0..10u32.pow(SECRET_DIGITS));
    format!("{value:0width$}", width = SECRET_DIGITS as usize)
}

/// Applies the resend counter and installs a fresh secret.
pub fn reissue(
    record: &mut OneTimeSecret,
    secret: String,
    now: DateTime<Utc>,
    ttl: Duration,
    sends_per_hour: i32,
) -> Result<()> {
    if now - record.window_started_at >= resend_window() {
        record.window_started_at = now;
        record.sends_in_window = 0;
    }
    if record.sends_in_window >= sends_per_hour {
        return Err(EngagementError::RateLimited(format!(
            "{} sends for {} in the current window",
            record.sends_in_window, record.identity
        )));
    }
    let expires_at = expires_after(now, ttl)?;
    record.sends_in_window += 1;
    record.secret = secret;
    record.expires_at = expires_at;
    record.failed_attempts = 0;
    record.consumed = false;
    Ok(())
}

/// Checks a presented secret. A match consumes it; a mismatch is counted and
/// burns the secret once `max_attempts` wrong guesses have been made. Returns
/// whether the secret matched. Either way the record must be written back.
pub fn consume(
    record: &mut OneTimeSecret,
    presented: &str,
    now: DateTime<Utc>,
    max_attempts: i32,
) -> Result<bool> {
    if record.consumed {
        return Err(EngagementError::InvalidState(format!(
            "secret for {} already used",
            record.identity
        )));
    }
    if now >= record.expires_at {
        return Err(EngagementError::InvalidState(format!(
            "secret for {} expired",
            record.identity
        )));
    }
    if record.secret != presented {
        record.failed_attempts += 1;
        if record.failed_attempts >= max_attempts {
            record.consumed = true;
        }
        return Ok(false);
    }
    record.consumed = true;
    Ok(true)
}

pub struct OneTimeSecrets {
    store: Arc<dyn Store>,
    ttl: Duration,
    sends_per_hour: i32,
    max_attempts: i32,
}

impl OneTimeSecrets {
    pub fn new(
        store: Arc<dyn Store>,
        ttl: Duration,
        sends_per_hour: i32,
        max_attempts: i32,
    ) -> Self {
        Self {
            store,
            ttl,
            sends_per_hour,
            max_attempts,
        }
    }

    /// Returns the secret so the caller can deliver it.
    pub async fn issue(&self, identity: &str, purpose: &str) -> Result<OneTimeSecret> {
        let ttl = self.ttl;
        let sends_per_hour = self.sends_per_hour;
        let secret = generate_secret();
        let update: SecretUpdate = Box::new(move |record: &mut OneTimeSecret| -> Result<bool> {
            reissue(record, secret, Utc::now(), ttl, sends_per_hour)?;
            Ok(true)
        });

        let (record, _) = self
            .store
            .modify_secret(identity, purpose, true, update)
            .await?;
        info!(identity, purpose, expires_at = %record.expires_at, "one-time secret issued");
        Ok(record)
    }

    pub async fn verify(&self, identity: &str, purpose: &str, presented: &str) -> Result<()> {
        let presented = presented.trim().to_string();
        let max_attempts = self.max_attempts;
        let update: SecretUpdate = Box::new(move |record: &mut OneTimeSecret| -> Result<bool> {
            consume(record, &presented, Utc::now(), max_attempts)
        });
        let (record, matched) = self
            .store
            .modify_secret(identity, purpose, false, update)
            .await?;

        if !matched {
            if record.consumed {
                warn!(
                    identity,
                    purpose,
                    attempts = record.failed_attempts,
                    "one-time secret burned"
                );
                return Err(EngagementError::RateLimited(format!(
                    "too many wrong attempts for {identity}; request a new secret"
                )));
            }
            return Err(EngagementError::Conflict(format!(
                "secret for {identity} does not match"
            )));
        }
        info!(identity, purpose, "one-time secret verified");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secrets_are_zero_padded_digits() {
        for _ in 0..50 {
            let secret = generate_secret();
            assert_eq!(secret.len(), 6);
            assert!(secret.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn resend_limit_resets_only_after_window() {
        let start = Utc::now();
        let mut record = OneTimeSecret::new("reader@example.com", "verify-email");
        record.window_started_at = start;
        for _ in 0..3 {
            reissue(&mut record, generate_secret(), start, Duration::minutes(15), 3).unwrap();
        }
        let err = reissue(
            &mut record,
            generate_secret(),
            start + Duration::minutes(59),
            Duration::minutes(15),
            3,
        )
        .unwrap_err();
        assert!(matches!(err, EngagementError::RateLimited(_)));

        reissue(
            &mut record,
            generate_secret(),
            start + Duration::minutes(61),
            Duration::minutes(15),
            3,
        )
        .unwrap();
        assert_eq!(record.sends_in_window, 1);
    }

    #[test]
    fn expired_secret_is_refused() {
        let now = Utc::now();
        let mut record = OneTimeSecret::new("reader@example.com", "reset");
        reissue(&mut record, "123456".to_string(), now, Duration::minutes(15), 3).unwrap();
        let err = consume(&mut record, "123456", now + Duration::minutes(16), 5).unwrap_err();
        assert!(matches!(err, EngagementError::InvalidState(_)));
    }

    #[test]
    fn secret_is_single_use() {
        let now = Utc::now();
        let mut record = OneTimeSecret::new("reader@example.com", "reset");
        reissue(&mut record, "654321".to_string(), now, Duration::minutes(15), 3).unwrap();
        assert!(!consume(&mut record, "000000", now, 5).unwrap());
        assert_eq!(record.failed_attempts, 1);
        assert!(consume(&mut record, "654321", now, 5).unwrap());
        assert!(matches!(
            consume(&mut record, "654321", now, 5),
            Err(EngagementError::InvalidState(_))
        ));
    }

    #[test]
    fn wrong_guesses_burn_the_secret() {
        let now = Utc::now();
        let mut record = OneTimeSecret::new("reader@example.com", "reset");
        reissue(&mut record, "654321".to_string(), now, Duration::minutes(15), 3).unwrap();
        for attempt in 1..=3 {
            assert!(!consume(&mut record, "000000", now, 3).unwrap());
            assert_eq!(record.failed_attempts, attempt);
        }
        assert!(record.consumed);
        assert!(matches!(
            consume(&mut record, "654321", now, 3),
            Err(EngagementError::InvalidState(_))
        ));

        reissue(&mut record, "111111".to_string(), now, Duration::minutes(15), 3).unwrap();
        assert_eq!(record.failed_attempts, 0);
        assert!(consume(&mut record, "111111", now, 3).unwrap());
    }

    #[test]
    fn unusable_lifetime_leaves_record_untouched() {
        let now = Utc::now();
        let mut record = OneTimeSecret::new("reader@example.com", "reset");
        let err = reissue(&mut record, "123456".to_string(), now, Duration::MAX, 3).unwrap_err();
        assert!(matches!(err, EngagementError::InvalidInput(_)));
        assert_eq!(record.sends_in_window, 0);
        assert!(record.secret.is_empty());
    }
}
