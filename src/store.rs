use async_trait::async_trait;
use sqlx::types::time::OffsetDateTime;
use sqlx::{FromRow, Pool, Postgres};
use thiserror::Error;
use uuid::Uuid;

use crate::db_types::{AccountSecret, CallOutcome, CallPatch, CallRecord};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Persistence seam for call records and per-user provider credentials.
#[async_trait]
pub trait CallStore: Send + Sync {
    async fn create_call_record(
        &self,
        user_id: Uuid,
        lead_id: Uuid,
        from_number: &str,
        to_number: &str,
    ) -> Result<CallRecord, StoreError>;

    /// Apply `patch` to record `id`. When `user_id` is given the update only touches a record
    /// owned by that user. Returns `None` when nothing matched.
    async fn update_call_record(
        &self,
        id: Uuid,
        user_id: Option<Uuid>,
        patch: &CallPatch,
    ) -> Result<Option<CallRecord>, StoreError>;

    async fn find_call_record_by_provider_call_id(
        &self,
        provider_call_id: &str,
    ) -> Result<Option<CallRecord>, StoreError>;

    async fn find_account_secret(&self, user_id: Uuid) -> Result<Option<AccountSecret>, StoreError>;

    async fn save_account_secret(&self, secret: &AccountSecret) -> Result<(), StoreError>;
}

#[derive(FromRow)]
struct CallRow {
    id: Uuid,
    user_id: Uuid,
    lead_id: Uuid,
    provider_call_id: Option<String>,
    from_number: String,
    to_number: String,
    status: String,
    started_at: OffsetDateTime,
    ended_at: Option<OffsetDateTime>,
    duration_seconds: Option<i32>,
    recording_url: Option<String>,
    transcription: Option<String>,
    summary: Option<String>,
    outcome: Option<String>,
    notes: Option<String>,
}

impl From<CallRow> for CallRecord {
    fn from(row: CallRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            lead_id: row.lead_id,
            provider_call_id: row.provider_call_id,
            from_number: row.from_number,
            to_number: row.to_number,
            status: row.status.parse().unwrap_or_else(|never| match never {}),
            started_at: row.started_at,
            ended_at: row.ended_at,
            duration_seconds: row.duration_seconds,
            recording_url: row.recording_url,
            transcription: row.transcription,
            summary: row.summary,
            outcome: row.outcome.as_deref().and_then(CallOutcome::parse),
            notes: row.notes,
        }
    }
}

#[derive(FromRow)]
struct SecretRow {
    user_id: Uuid,
    account_sid: String,
    auth_token_encrypted: Option<String>,
    phone_number: Option<String>,
    api_key_sid: Option<String>,
    api_key_secret_encrypted: Option<String>,
    twiml_app_sid: Option<String>,
}

impl From<SecretRow> for AccountSecret {
    fn from(row: SecretRow) -> Self {
        Self {
            user_id: row.user_id,
            account_sid: row.account_sid,
            auth_token_encrypted: row.auth_token_encrypted,
            phone_number: row.phone_number,
            api_key_sid: row.api_key_sid,
            api_key_secret_encrypted: row.api_key_secret_encrypted,
            twiml_app_sid: row.twiml_app_sid,
        }
    }
}

const CALL_COLUMNS: &str = "id, user_id, lead_id, provider_call_id, from_number, to_number, \
    status, started_at, ended_at, duration_seconds, recording_url, transcription, summary, \
    outcome, notes";

pub struct PgCallStore {
    pool: Pool<Postgres>,
}

impl PgCallStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CallStore for PgCallStore {
    async fn create_call_record(
        &self,
        user_id: Uuid,
        lead_id: Uuid,
        from_number: &str,
        to_number: &str,
    ) -> Result<CallRecord, StoreError> {
        let record = CallRecord::new(user_id, lead_id, from_number.to_string(), to_number.to_string());
        let sql = format!(
            "INSERT INTO calls (id, user_id, lead_id, from_number, to_number, status, started_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {CALL_COLUMNS}"
        );
        let row = sqlx::query_as::<_, CallRow>(&sql)
            .bind(record.id)
            .bind(record.user_id)
            .bind(record.lead_id)
            .bind(&record.from_number)
            .bind(&record.to_number)
            .bind(record.status.as_str())
            .bind(record.started_at)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.into())
    }

    async fn update_call_record(
        &self,
        id: Uuid,
        user_id: Option<Uuid>,
        patch: &CallPatch,
    ) -> Result<Option<CallRecord>, StoreError> {
        // Terminal statuses are sticky; provider call id and ended_at are write-once.
        let sql = format!(
            "UPDATE calls SET \
               provider_call_id = COALESCE(provider_call_id, $3), \
               status = CASE WHEN status IN ('completed', 'failed') OR $4::text IS NULL \
                        THEN status ELSE $4::text END, \
               ended_at = COALESCE(ended_at, $5), \
               duration_seconds = COALESCE($6, duration_seconds), \
               recording_url = COALESCE($7, recording_url), \
               transcription = COALESCE($8, transcription), \
               summary = COALESCE($9, summary), \
               outcome = COALESCE($10, outcome), \
               notes = COALESCE($11, notes) \
             WHERE id = $1 AND ($2::uuid IS NULL OR user_id = $2) \
             RETURNING {CALL_COLUMNS}"
        );
        let row = sqlx::query_as::<_, CallRow>(&sql)
            .bind(id)
            .bind(user_id)
            .bind(patch.provider_call_id.as_deref())
            .bind(patch.status.as_ref().map(|s| s.as_str().to_string()))
            .bind(patch.ended_at)
            .bind(patch.duration_seconds)
            .bind(patch.recording_url.as_deref())
            .bind(patch.transcription.as_deref())
            .bind(patch.summary.as_deref())
            .bind(patch.outcome.map(|o| o.as_str()))
            .bind(patch.notes.as_deref())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Into::into))
    }

    async fn find_call_record_by_provider_call_id(
        &self,
        provider_call_id: &str,
    ) -> Result<Option<CallRecord>, StoreError> {
        let sql = format!("SELECT {CALL_COLUMNS} FROM calls WHERE provider_call_id = $1");
        let row = sqlx::query_as::<_, CallRow>(&sql)
            .bind(provider_call_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Into::into))
    }

    async fn find_account_secret(&self, user_id: Uuid) -> Result<Option<AccountSecret>, StoreError> {
        let row = sqlx::query_as::<_, SecretRow>(
            "SELECT user_id, account_sid, auth_token_encrypted, phone_number, api_key_sid, \
             api_key_secret_encrypted, twiml_app_sid FROM twilio_settings WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn save_account_secret(&self, secret: &AccountSecret) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO twilio_settings (user_id, account_sid, auth_token_encrypted, phone_number, \
               api_key_sid, api_key_secret_encrypted, twiml_app_sid) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (user_id) DO UPDATE SET \
               account_sid = EXCLUDED.account_sid, \
               auth_token_encrypted = EXCLUDED.auth_token_encrypted, \
               phone_number = EXCLUDED.phone_number, \
               api_key_sid = EXCLUDED.api_key_sid, \
               api_key_secret_encrypted = EXCLUDED.api_key_secret_encrypted, \
               twiml_app_sid = EXCLUDED.twiml_app_sid, \
               updated_at = now()",
        )
        .bind(secret.user_id)
        .bind(&secret.account_sid)
        .bind(secret.auth_token_encrypted.as_deref())
        .bind(secret.phone_number.as_deref())
        .bind(secret.api_key_sid.as_deref())
        .bind(secret.api_key_secret_encrypted.as_deref())
        .bind(secret.twiml_app_sid.as_deref())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}


#[cfg(test)]
mod pg_tests {
    use super::*;
    use crate::db_types::CallStatus;
    use sqlx::postgres::PgPoolOptions;

    /// Runs against the database in `DATABASE_URL`; skipped when it is not set.
    async fn pg_store() -> Option<PgCallStore> {
        let url = match std::env::var("DATABASE_URL") {
            Ok(url) => url,
            Err(_) => {
                eprintln!("DATABASE_URL not set, skipping postgres store test");
                return None;
            }
        };
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect(&url)
            .await
            .unwrap();
        sqlx::migrate!().run(&pool).await.unwrap();
        Some(PgCallStore::new(pool))
    }

    #[tokio::test]
    async fn completed_then_ringing_stays_completed_in_postgres() {
        let Some(store) = pg_store().await else {
            return;
        };
        let owner = Uuid::new_v4();
        let sid = format!("CA{}", Uuid::new_v4().simple());
        let record = store
            .create_call_record(owner, Uuid::new_v4(), "+15550000000", "+15551234567")
            .await
            .unwrap();

        let ringing = store
            .update_call_record(
                record.id,
                Some(owner),
                &CallPatch {
                    provider_call_id: Some(sid.clone()),
                    status: Some(CallStatus::Ringing),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ringing.provider_call_id.as_deref(), Some(sid.as_str()));

        let completed = store
            .update_call_record(
                record.id,
                None,
                &CallPatch {
                    status: Some(CallStatus::Completed),
                    ended_at: Some(OffsetDateTime::now_utc()),
                    duration_seconds: Some(47),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(completed.status, CallStatus::Completed);
        assert!(completed.ended_at.is_some());

        // late ringing, a second provider id and a later end time change nothing
        let late = store
            .update_call_record(
                record.id,
                None,
                &CallPatch {
                    provider_call_id: Some("CA-other".to_string()),
                    status: Some(CallStatus::Ringing),
                    ended_at: Some(OffsetDateTime::now_utc() + std::time::Duration::from_secs(60)),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(late.status, CallStatus::Completed);
        assert_eq!(late.ended_at, completed.ended_at);
        assert_eq!(late.duration_seconds, Some(47));
        assert_eq!(late.provider_call_id.as_deref(), Some(sid.as_str()));

        let found = store
            .find_call_record_by_provider_call_id(&sid)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, record.id);
        assert_eq!(found.status, CallStatus::Completed);
    }

    #[tokio::test]
    async fn user_scoped_update_ignores_foreign_records_in_postgres() {
        let Some(store) = pg_store().await else {
            return;
        };
        let owner = Uuid::new_v4();
        let sid = format!("CA{}", Uuid::new_v4().simple());
        let record = store
            .create_call_record(owner, Uuid::new_v4(), "+15550000000", "+15551234567")
            .await
            .unwrap();
        let patch = CallPatch {
            provider_call_id: Some(sid.clone()),
            status: Some(CallStatus::Ringing),
            ..Default::default()
        };

        let foreign = store
            .update_call_record(record.id, Some(Uuid::new_v4()), &patch)
            .await
            .unwrap();
        assert!(foreign.is_none());
        assert!(store
            .find_call_record_by_provider_call_id(&sid)
            .await
            .unwrap()
            .is_none());

        let owned = store
            .update_call_record(record.id, Some(owner), &patch)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(owned.status, CallStatus::Ringing);
        assert_eq!(owned.provider_call_id.as_deref(), Some(sid.as_str()));
    }
}
