//! Postgres-backed [`SessionStore`].
//!
//! Both tables are created unlogged by the migrations in `/migrations`;
//! the data is worthless after a session expires, so crash durability is
//! deliberately traded for write latency. Insert triggers opportunistically
//! purge rows whose `expires_at` has passed; correctness never depends on
//! that cleanup because every read filters on `expires_at` itself.

use std::net::IpAddr;
use std::num::NonZeroU32;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret as _, SecretString};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use time::OffsetDateTime;
use tracing::instrument;
use uuid::Uuid;
use wscli_types::session::SessionRecord;
use wscli_types::{OwnerId, SessionId, TokenId};

use crate::{SessionStore, StoreError};

/// The Postgres session store wrapping a [`PgPool`].
pub struct PostgresSessionStore(PgPool);

#[derive(Debug, sqlx::FromRow)]
struct SessionRow {
    session_id: Uuid,
    owner_id: String,
    job_name: String,
    pod_name: Option<String>,
    pod_ip: Option<String>,
    created_at: OffsetDateTime,
    expires_at: OffsetDateTime,
}

impl From<SessionRow> for SessionRecord {
    fn from(row: SessionRow) -> Self {
        SessionRecord {
            session_id: SessionId::new(row.session_id),
            owner_id: OwnerId::new(row.owner_id),
            job_name: row.job_name,
            pod_name: row.pod_name,
            // the controller only ever writes rendered IpAddr values
            pod_ip: row
                .pod_ip
                .map(|ip| ip.parse().expect("stored pod ip is a valid address")),
            created_at: row.created_at,
            expires_at: row.expires_at,
        }
    }
}

impl PostgresSessionStore {
    /// Initializes the store by connecting to the provided
    /// `connection_string` with the given pool sizing.
    #[instrument(level = "info", skip_all)]
    pub async fn init(
        connection_string: &SecretString,
        max_connections: NonZeroU32,
        idle_timeout: Duration,
    ) -> Result<Self, StoreError> {
        tracing::info!("connecting to DB...");
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.get())
            .idle_timeout(idle_timeout)
            .connect(connection_string.expose_secret())
            .await?;
        Ok(Self(pool))
    }

    /// Applies the schema migrations from `/migrations`.
    ///
    /// Run once at controller startup; the gateway only reads and deletes.
    #[instrument(level = "info", skip_all)]
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        tracing::info!("running DB migrations..");
        sqlx::migrate!("../migrations").run(&self.0).await
    }
}

fn map_insert_error(err: sqlx::Error, entity: &'static str) -> StoreError {
    if err
        .as_database_error()
        .is_some_and(|db| db.is_unique_violation())
    {
        StoreError::Duplicate { entity }
    } else {
        StoreError::Backend(err)
    }
}

#[async_trait]
impl SessionStore for PostgresSessionStore {
    #[instrument(level = "debug", skip_all, fields(session_id = %record.session_id))]
    async fn insert_session(&self, record: &SessionRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
                INSERT INTO sessions
                    (session_id, owner_id, job_name, pod_name, pod_ip, created_at, expires_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(record.session_id.into_inner())
        .bind(record.owner_id.as_str())
        .bind(&record.job_name)
        .bind(&record.pod_name)
        .bind(record.pod_ip.map(|ip| ip.to_string()))
        .bind(record.created_at)
        .bind(record.expires_at)
        .execute(&self.0)
        .await
        .map_err(|err| map_insert_error(err, "session"))?;
        Ok(())
    }

    #[instrument(level = "debug", skip_all, fields(session_id = %session_id))]
    async fn update_session_pod(
        &self,
        session_id: SessionId,
        pod_ip: IpAddr,
        pod_name: &str,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
                UPDATE sessions
                SET pod_ip = $2, pod_name = $3
                WHERE session_id = $1 AND pod_ip IS NULL
            "#,
        )
        .bind(session_id.into_inner())
        .bind(pod_ip.to_string())
        .bind(pod_name)
        .execute(&self.0)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    #[instrument(level = "debug", skip_all, fields(session_id = %session_id))]
    async fn get_session(
        &self,
        session_id: SessionId,
    ) -> Result<Option<SessionRecord>, StoreError> {
        let maybe_row: Option<SessionRow> = sqlx::query_as(
            r#"
                SELECT session_id, owner_id, job_name, pod_name, pod_ip, created_at, expires_at
                FROM sessions
                WHERE session_id = $1 AND expires_at > now()
            "#,
        )
        .bind(session_id.into_inner())
        .fetch_optional(&self.0)
        .await?;
        Ok(maybe_row.map(SessionRecord::from))
    }

    #[instrument(level = "debug", skip_all, fields(token_id = %token_id))]
    async fn insert_token_id(
        &self,
        token_id: TokenId,
        session_id: SessionId,
        expires_at: OffsetDateTime,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
                INSERT INTO token_ids (token_id, session_id, expires_at)
                VALUES ($1, $2, $3)
            "#,
        )
        .bind(token_id.into_inner())
        .bind(session_id.into_inner())
        .bind(expires_at)
        .execute(&self.0)
        .await
        .map_err(|err| map_insert_error(err, "token id"))?;
        Ok(())
    }

    #[instrument(level = "debug", skip_all, fields(token_id = %token_id))]
    async fn consume_token_id(&self, token_id: TokenId) -> Result<bool, StoreError> {
        // A single-row DELETE is atomic in Postgres: exactly one of any
        // number of concurrent callers gets rows_affected == 1.
        let result = sqlx::query(
            r#"
                DELETE FROM token_ids
                WHERE token_id = $1 AND expires_at > now()
            "#,
        )
        .bind(token_id.into_inner())
        .execute(&self.0)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    #[instrument(level = "debug", skip_all)]
    async fn purge_expired(&self) -> Result<u64, StoreError> {
        let sessions = sqlx::query("DELETE FROM sessions WHERE expires_at <= now()")
            .execute(&self.0)
            .await?;
        let tokens = sqlx::query("DELETE FROM token_ids WHERE expires_at <= now()")
            .execute(&self.0)
            .await?;
        Ok(sessions.rows_affected() + tokens.rows_affected())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.0).await?;
        Ok(())
    }
}
