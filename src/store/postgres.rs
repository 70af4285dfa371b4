//! Postgres backend.
//!
//! Every mutation runs in its own transaction: the target row is taken with
//! `SELECT ... FOR UPDATE`, the closure runs, the row is written back and the
//! transaction commits. Any early return drops the transaction, which rolls it
//! back. Create-if-absent is `INSERT ... ON CONFLICT DO NOTHING` followed by
//! the locked read inside the same transaction.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use super::{
    ApplicationDecision, BalanceUpdate, CodeUpdate, Directory, ProgressUpdate, SecretUpdate, Store,
};
use crate::error::{EngagementError, Result};
use crate::models::{
    ApplicationStatus, ContentId, ContentItem, Member, MembershipTier, OneTimeSecret,
    ProgressRecord, RewardApplication, RewardBalance, RewardCode, TopicId, UserId,
};

const PROGRESS_COLUMNS: &str = "user_id, content_id, percent_complete, elapsed_seconds, \
     pace_valid, credit_awarded, started_at, completed_at";
const BALANCE_COLUMNS: &str = "user_id, topic_id, reading_credit, completion_credit, \
     total_credit, items_completed, updated_at";
const APPLICATION_COLUMNS: &str =
    "id, user_id, contact, justification, status, issued_code, submitted_at, decided_at";
const CODE_COLUMNS: &str =
    "code, application_id, owner_user_id, percent_off, used, used_at, expires_at, created_at";
const SECRET_COLUMNS: &str =
    "identity, purpose, secret, expires_at, sends_in_window, window_started_at, \
     failed_attempts, consumed";

/// First key of the two-key advisory lock taken around submissions ("enga").
const SUBMISSION_LOCK_NAMESPACE: i32 = 0x656e_6761;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    lock_timeout_ms: u64,
}

impl PgStore {
    pub fn new(pool: PgPool, lock_timeout_ms: u64) -> Self {
        Self {
            pool,
            lock_timeout_ms,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Starts a transaction whose lock waits give up after the configured budget.
    async fn begin(&self) -> Result<Transaction<'static, Postgres>> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SELECT set_config('lock_timeout', $1, true)")
            .bind(format!("{}ms", self.lock_timeout_ms))
            .execute(&mut *tx)
            .await?;
        Ok(tx)
    }
}

fn conflict_on_unique(err: sqlx::Error, message: String) -> EngagementError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => EngagementError::Conflict(message),
        _ => EngagementError::Storage(err),
    }
}

fn progress_from_row(row: &PgRow) -> Result<ProgressRecord> {
    Ok(ProgressRecord {
        user_id: row.try_get("user_id")?,
        content_id: row.try_get("content_id")?,
        percent_complete: row.try_get("percent_complete")?,
        elapsed_seconds: row.try_get("elapsed_seconds")?,
        pace_valid: row.try_get("pace_valid")?,
        credit_awarded: row.try_get("credit_awarded")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

fn balance_from_row(row: &PgRow) -> Result<RewardBalance> {
    Ok(RewardBalance {
        user_id: row.try_get("user_id")?,
        topic_id: row.try_get("topic_id")?,
        reading_credit: row.try_get("reading_credit")?,
        completion_credit: row.try_get("completion_credit")?,
        total_credit: row.try_get("total_credit")?,
        items_completed: row.try_get("items_completed")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn application_from_row(row: &PgRow) -> Result<RewardApplication> {
    let status: String = row.try_get("status")?;
    Ok(RewardApplication {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        contact: row.try_get("contact")?,
        justification: row.try_get("justification")?,
        status: status.parse()?,
        issued_code: row.try_get("issued_code")?,
        submitted_at: row.try_get("submitted_at")?,
        decided_at: row.try_get("decided_at")?,
    })
}

fn code_from_row(row: &PgRow) -> Result<RewardCode> {
    Ok(RewardCode {
        code: row.try_get("code")?,
        application_id: row.try_get("application_id")?,
        owner_user_id: row.try_get("owner_user_id")?,
        percent_off: row.try_get("percent_off")?,
        used: row.try_get("used")?,
        used_at: row.try_get("used_at")?,
        expires_at: row.try_get("expires_at")?,
        created_at: row.try_get("created_at")?,
    })
}

fn secret_from_row(row: &PgRow) -> Result<OneTimeSecret> {
    Ok(OneTimeSecret {
        identity: row.try_get("identity")?,
        purpose: row.try_get("purpose")?,
        secret: row.try_get("secret")?,
        expires_at: row.try_get("expires_at")?,
        sends_in_window: row.try_get("sends_in_window")?,
        window_started_at: row.try_get("window_started_at")?,
        failed_attempts: row.try_get("failed_attempts")?,
        consumed: row.try_get("consumed")?,
    })
}

#[async_trait]
impl Directory for PgStore {
    async fn member(&self, user_id: UserId) -> Result<Option<Member>> {
        let Some(row) = sqlx::query(
            "SELECT tier, enrolled_collection_id FROM engagement.members WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let tier_name: String = row.try_get("tier")?;
        let tier = MembershipTier::from_parts(&tier_name, row.try_get("enrolled_collection_id")?)?;
        let unlocked: Vec<i64> = sqlx::query_scalar(
            "SELECT collection_id FROM engagement.member_unlocks WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(Member {
            user_id,
            tier,
            unlocked_collection_ids: unlocked.into_iter().collect(),
        }))
    }

    async fn content(&self, content_id: ContentId) -> Result<Option<ContentItem>> {
        let row = sqlx::query(
            "SELECT content_id, collection_id, topic_id, title \
             FROM engagement.content_items WHERE content_id = $1",
        )
        .bind(content_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(ContentItem {
                content_id: row.try_get("content_id")?,
                collection_id: row.try_get("collection_id")?,
                topic_id: row.try_get("topic_id")?,
                title: row.try_get("title")?,
            })
        })
        .transpose()
    }
}

#[async_trait]
impl Store for PgStore {
    async fn insert_progress_if_absent(&self, record: ProgressRecord) -> Result<ProgressRecord> {
        sqlx::query(&format!(
            "INSERT INTO engagement.progress_records ({PROGRESS_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (user_id, content_id) DO NOTHING"
        ))
        .bind(record.user_id)
        .bind(record.content_id)
        .bind(record.percent_complete)
        .bind(record.elapsed_seconds)
        .bind(record.pace_valid)
        .bind(record.credit_awarded)
        .bind(record.started_at)
        .bind(record.completed_at)
        .execute(&self.pool)
        .await?;

        self.get_progress(record.user_id, record.content_id)
            .await?
            .ok_or_else(|| {
                EngagementError::NotFound(format!(
                    "progress for user {} on {}",
                    record.user_id, record.content_id
                ))
            })
    }

    async fn get_progress(
        &self,
        user_id: UserId,
        content_id: ContentId,
    ) -> Result<Option<ProgressRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {PROGRESS_COLUMNS} FROM engagement.progress_records \
             WHERE user_id = $1 AND content_id = $2"
        ))
        .bind(user_id)
        .bind(content_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(progress_from_row).transpose()
    }

    async fn modify_progress(
        &self,
        user_id: UserId,
        content_id: ContentId,
        update: ProgressUpdate,
    ) -> Result<(ProgressRecord, bool)> {
        let mut tx = self.begin().await?;
        let row = sqlx::query(&format!(
            "SELECT {PROGRESS_COLUMNS} FROM engagement.progress_records \
             WHERE user_id = $1 AND content_id = $2 FOR UPDATE"
        ))
        .bind(user_id)
        .bind(content_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| {
            EngagementError::NotFound(format!("progress for user {user_id} on {content_id}"))
        })?;
        let current = progress_from_row(&row)?;

        let mut draft = current.clone();
        if !update(&mut draft)? {
            tx.commit().await?;
            return Ok((current, false));
        }

        sqlx::query(
            r#"
            UPDATE engagement.progress_records
            SET percent_complete = $3, elapsed_seconds = $4, pace_valid = $5,
                credit_awarded = $6, completed_at = $7
            WHERE user_id = $1 AND content_id = $2
            "#,
        )
        .bind(user_id)
        .bind(content_id)
        .bind(draft.percent_complete)
        .bind(draft.elapsed_seconds)
        .bind(draft.pace_valid)
        .bind(draft.credit_awarded)
        .bind(draft.completed_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok((draft, true))
    }

    async fn modify_balance(
        &self,
        user_id: UserId,
        topic_id: TopicId,
        create: bool,
        update: BalanceUpdate,
    ) -> Result<RewardBalance> {
        let mut tx = self.begin().await?;
        if create {
            sqlx::query(
                r#"
                INSERT INTO engagement.reward_balances (user_id, topic_id, updated_at)
                VALUES ($1, $2, now())
                ON CONFLICT (user_id, topic_id) DO NOTHING
                "#,
            )
            .bind(user_id)
            .bind(topic_id)
            .execute(&mut *tx)
            .await?;
        }

        let row = sqlx::query(&format!(
            "SELECT {BALANCE_COLUMNS} FROM engagement.reward_balances \
             WHERE user_id = $1 AND topic_id = $2 FOR UPDATE"
        ))
        .bind(user_id)
        .bind(topic_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| {
            EngagementError::NotFound(format!("balance for user {user_id} on topic {topic_id}"))
        })?;

        let mut draft = balance_from_row(&row)?;
        update(&mut draft)?;

        sqlx::query(
            r#"
            UPDATE engagement.reward_balances
            SET reading_credit = $3, completion_credit = $4, total_credit = $5,
                items_completed = $6, updated_at = $7
            WHERE user_id = $1 AND topic_id = $2
            "#,
        )
        .bind(user_id)
        .bind(topic_id)
        .bind(draft.reading_credit)
        .bind(draft.completion_credit)
        .bind(draft.total_credit)
        .bind(draft.items_completed)
        .bind(draft.updated_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(draft)
    }

    async fn get_balance(
        &self,
        user_id: UserId,
        topic_id: TopicId,
    ) -> Result<Option<RewardBalance>> {
        let row = sqlx::query(&format!(
            "SELECT {BALANCE_COLUMNS} FROM engagement.reward_balances \
             WHERE user_id = $1 AND topic_id = $2"
        ))
        .bind(user_id)
        .bind(topic_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(balance_from_row).transpose()
    }

    async fn list_balances(&self, user_id: UserId) -> Result<Vec<RewardBalance>> {
        let rows = sqlx::query(&format!(
            "SELECT {BALANCE_COLUMNS} FROM engagement.reward_balances \
             WHERE user_id = $1 ORDER BY total_credit DESC, topic_id"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(balance_from_row).collect()
    }

    async fn user_total(&self, user_id: UserId) -> Result<i64> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(total_credit), 0)::BIGINT \
             FROM engagement.reward_balances WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(total)
    }

    async fn insert_application(
        &self,
        application: RewardApplication,
    ) -> Result<RewardApplication> {
        let mut tx = self.begin().await?;
        // Serializes submissions per user; the partial unique index backs it up.
        sqlx::query("SELECT pg_advisory_xact_lock($1, hashtext($2::bigint::text))")
            .bind(SUBMISSION_LOCK_NAMESPACE)
            .bind(application.user_id)
            .execute(&mut *tx)
            .await?;

        let existing: Option<Uuid> = sqlx::query_scalar(
            r#"
            SELECT id FROM engagement.reward_applications
            WHERE user_id = $1 AND status IN ('pending', 'approved')
            LIMIT 1
            "#,
        )
        .bind(application.user_id)
        .fetch_optional(&mut *tx)
        .await?;
        if let Some(existing) = existing {
            return Err(EngagementError::Conflict(format!(
                "user {} already has active application {existing}",
                application.user_id
            )));
        }

        sqlx::query(&format!(
            "INSERT INTO engagement.reward_applications ({APPLICATION_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"
        ))
        .bind(application.id)
        .bind(application.user_id)
        .bind(&application.contact)
        .bind(&application.justification)
        .bind(application.status.as_str())
        .bind(&application.issued_code)
        .bind(application.submitted_at)
        .bind(application.decided_at)
        .execute(&mut *tx)
        .await
        .map_err(|err| {
            conflict_on_unique(
                err,
                format!("user {} already has an active application", application.user_id),
            )
        })?;
        tx.commit().await?;
        Ok(application)
    }

    async fn get_application(&self, id: Uuid) -> Result<Option<RewardApplication>> {
        let row = sqlx::query(&format!(
            "SELECT {APPLICATION_COLUMNS} FROM engagement.reward_applications WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(application_from_row).transpose()
    }

    async fn list_applications(
        &self,
        status: ApplicationStatus,
    ) -> Result<Vec<RewardApplication>> {
        let rows = sqlx::query(&format!(
            "SELECT {APPLICATION_COLUMNS} FROM engagement.reward_applications \
             WHERE status = $1 ORDER BY submitted_at"
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(application_from_row).collect()
    }

    async fn decide_application(
        &self,
        id: Uuid,
        decision: ApplicationDecision,
    ) -> Result<(RewardApplication, Option<RewardCode>)> {
        let mut tx = self.begin().await?;
        let row = sqlx::query(&format!(
            "SELECT {APPLICATION_COLUMNS} FROM engagement.reward_applications \
             WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| EngagementError::NotFound(format!("application {id}")))?;

        let mut draft = application_from_row(&row)?;
        let minted = decision(&mut draft)?;

        if let Some(code) = &minted {
            sqlx::query(&format!(
                "INSERT INTO engagement.reward_codes ({CODE_COLUMNS}) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"
            ))
            .bind(&code.code)
            .bind(code.application_id)
            .bind(code.owner_user_id)
            .bind(code.percent_off)
            .bind(code.used)
            .bind(code.used_at)
            .bind(code.expires_at)
            .bind(code.created_at)
            .execute(&mut *tx)
            .await
            .map_err(|err| conflict_on_unique(err, format!("code for application {id} already issued")))?;
        }

        sqlx::query(
            r#"
            UPDATE engagement.reward_applications
            SET status = $2, issued_code = $3, decided_at = $4
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(draft.status.as_str())
        .bind(&draft.issued_code)
        .bind(draft.decided_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok((draft, minted))
    }

    async fn get_code(&self, code: &str) -> Result<Option<RewardCode>> {
        let row = sqlx::query(&format!(
            "SELECT {CODE_COLUMNS} FROM engagement.reward_codes WHERE code = $1"
        ))
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(code_from_row).transpose()
    }

    async fn modify_code(&self, code: &str, update: CodeUpdate) -> Result<RewardCode> {
        let mut tx = self.begin().await?;
        let row = sqlx::query(&format!(
            "SELECT {CODE_COLUMNS} FROM engagement.reward_codes WHERE code = $1 FOR UPDATE"
        ))
        .bind(code)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| EngagementError::NotFound(format!("code {code}")))?;

        let mut draft = code_from_row(&row)?;
        update(&mut draft)?;

        sqlx::query("UPDATE engagement.reward_codes SET used = $2, used_at = $3 WHERE code = $1")
            .bind(code)
            .bind(draft.used)
            .bind(draft.used_at)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(draft)
    }

    async fn modify_secret(
        &self,
        identity: &str,
        purpose: &str,
        create: bool,
        update: SecretUpdate,
    ) -> Result<(OneTimeSecret, bool)> {
        let mut tx = self.begin().await?;
        if create {
            let placeholder = OneTimeSecret::new(identity, purpose);
            sqlx::query(&format!(
                "INSERT INTO engagement.one_time_secrets ({SECRET_COLUMNS}) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
                 ON CONFLICT (identity, purpose) DO NOTHING"
            ))
            .bind(&placeholder.identity)
            .bind(&placeholder.purpose)
            .bind(&placeholder.secret)
            .bind(placeholder.expires_at)
            .bind(placeholder.sends_in_window)
            .bind(placeholder.window_started_at)
            .bind(placeholder.failed_attempts)
            .bind(placeholder.consumed)
            .execute(&mut *tx)
            .await?;
        }

        let row = sqlx::query(&format!(
            "SELECT {SECRET_COLUMNS} FROM engagement.one_time_secrets \
             WHERE identity = $1 AND purpose = $2 FOR UPDATE"
        ))
        .bind(identity)
        .bind(purpose)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| EngagementError::NotFound(format!("secret for {identity} ({purpose})")))?;

        let mut draft = secret_from_row(&row)?;
        let flag = update(&mut draft)?;

        sqlx::query(
            r#"
            UPDATE engagement.one_time_secrets
            SET secret = $3, expires_at = $4, sends_in_window = $5,
                window_started_at = $6, failed_attempts = $7, consumed = $8
            WHERE identity = $1 AND purpose = $2
            "#,
        )
        .bind(identity)
        .bind(purpose)
        .bind(&draft.secret)
        .bind(draft.expires_at)
        .bind(draft.sends_in_window)
        .bind(draft.window_started_at)
        .bind(draft.failed_attempts)
        .bind(draft.consumed)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok((draft, flag))
    }
}
