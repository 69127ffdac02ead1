//! SQLite-backed [`StateStore`] implementation.
//!
//! Timestamps are stored as fixed-precision RFC 3339 text so that SQL
//! comparisons (lease expiry) order the same way as wall-clock time.
//! Writers are serialized by the engine, so the lease claim executes as a
//! single atomic conditional UPDATE.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};

use crate::error::{GantryError, Result};
use crate::model::{Job, JobStateTransition, JobStatus, Lease, Tenant};
use crate::store::StateStore;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS Tenants (
  TenantId       TEXT PRIMARY KEY,
  UserEmail      TEXT NOT NULL,
  OAuthProvider  TEXT NOT NULL,
  OAuthUserId    TEXT NOT NULL,
  CreatedAt      TEXT NOT NULL,
  UpdatedAt      TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_tenants_identity
  ON Tenants(OAuthProvider, OAuthUserId);

CREATE TABLE IF NOT EXISTS Jobs (
  TenantId           TEXT NOT NULL REFERENCES Tenants(TenantId) ON DELETE CASCADE,
  JobId              TEXT NOT NULL,
  Status             TEXT NOT NULL,
  ImageUri           TEXT NOT NULL,
  CommandsJson       TEXT NOT NULL,
  EnvVarsJson        TEXT,
  Name               TEXT,
  ResourceProfile    TEXT,
  MachineType        TEXT,
  BootDiskSizeGb     INTEGER,
  UseSpotVms         INTEGER,
  ServiceAccount     TEXT,
  CloudResourcePath  TEXT,
  TaskGroup          TEXT,
  RetryCount         INTEGER NOT NULL DEFAULT 0,
  MaxRetries         INTEGER NOT NULL DEFAULT 3,
  ErrorMessage       TEXT,
  CreatedAt          TEXT NOT NULL,
  UpdatedAt          TEXT NOT NULL,
  ScheduledAt        TEXT,
  StartedAt          TEXT,
  CompletedAt        TEXT,
  OwnerWorkerId      TEXT,
  PreferredWorkerId  TEXT,
  LeaseExpiresAt     TEXT,
  LastHeartbeatAt    TEXT,
  PRIMARY KEY (TenantId, JobId)
);
CREATE INDEX IF NOT EXISTS idx_jobs_tenant_status ON Jobs(TenantId, Status);
CREATE INDEX IF NOT EXISTS idx_jobs_status ON Jobs(Status);

CREATE TABLE IF NOT EXISTS JobStateTransitions (
  TenantId       TEXT NOT NULL,
  JobId          TEXT NOT NULL,
  TransitionId   TEXT NOT NULL,
  FromStatus     TEXT,
  ToStatus       TEXT NOT NULL,
  TransitionedAt TEXT NOT NULL,
  Note           TEXT,
  PRIMARY KEY (TenantId, JobId, TransitionId),
  FOREIGN KEY (TenantId, JobId) REFERENCES Jobs(TenantId, JobId) ON DELETE CASCADE
);
CREATE INDEX IF NOT EXISTS idx_transitions_job
  ON JobStateTransitions(TenantId, JobId, TransitionedAt);
"#;

const JOB_COLUMNS: &str = "TenantId, JobId, Status, ImageUri, CommandsJson, EnvVarsJson, Name, \
     ResourceProfile, MachineType, BootDiskSizeGb, UseSpotVms, ServiceAccount, \
     CloudResourcePath, TaskGroup, RetryCount, MaxRetries, ErrorMessage, \
     CreatedAt, UpdatedAt, ScheduledAt, StartedAt, CompletedAt, \
     OwnerWorkerId, PreferredWorkerId, LeaseExpiresAt, LastHeartbeatAt";

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `url` and bootstrap the
    /// schema. `url` is a sqlx SQLite URL, e.g. `sqlite:///var/lib/gantry.db`.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(GantryError::Store)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;

        // WAL improves concurrency for file-backed databases.
        let _ = sqlx::query("PRAGMA journal_mode=WAL;").execute(&pool).await;

        sqlx::raw_sql(SCHEMA).execute(&pool).await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Fixed-precision RFC 3339 so lexicographic text order matches time order.
fn encode_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn encode_ts_opt(ts: Option<DateTime<Utc>>) -> Option<String> {
    ts.map(encode_ts)
}

fn decode_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| GantryError::Internal(format!("invalid timestamp in store: {raw}: {e}")))
}

fn decode_ts_opt(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.as_deref().map(decode_ts).transpose()
}

fn decode_status(raw: &str) -> Result<JobStatus> {
    JobStatus::parse(raw)
        .ok_or_else(|| GantryError::Internal(format!("invalid job status in store: {raw}")))
}

fn persistable(status: JobStatus) -> Result<&'static str> {
    if status == JobStatus::Unknown {
        return Err(GantryError::InvalidArgument(
            "UNKNOWN is not a persistable job status".to_string(),
        ));
    }
    Ok(status.as_str())
}

fn tenant_from_row(row: &SqliteRow) -> Result<Tenant> {
    Ok(Tenant {
        tenant_id: row.try_get("TenantId")?,
        user_email: row.try_get("UserEmail")?,
        oauth_provider: row.try_get("OAuthProvider")?,
        oauth_user_id: row.try_get("OAuthUserId")?,
        created_at: decode_ts(&row.try_get::<String, _>("CreatedAt")?)?,
        updated_at: decode_ts(&row.try_get::<String, _>("UpdatedAt")?)?,
    })
}

fn job_from_row(row: &SqliteRow) -> Result<Job> {
    let commands_json: String = row.try_get("CommandsJson")?;
    let commands: Vec<String> = serde_json::from_str(&commands_json)?;
    let status = decode_status(&row.try_get::<String, _>("Status")?)?;

    Ok(Job {
        tenant_id: row.try_get("TenantId")?,
        job_id: row.try_get("JobId")?,
        image_uri: row.try_get("ImageUri")?,
        commands,
        env_vars_json: row.try_get("EnvVarsJson")?,
        name: row.try_get("Name")?,
        resource_profile: row.try_get("ResourceProfile")?,
        machine_type: row.try_get("MachineType")?,
        boot_disk_size_gb: row.try_get("BootDiskSizeGb")?,
        use_spot_vms: row.try_get("UseSpotVms")?,
        service_account: row.try_get("ServiceAccount")?,
        max_retries: row.try_get("MaxRetries")?,
        created_at: decode_ts(&row.try_get::<String, _>("CreatedAt")?)?,
        status,
        cloud_resource_path: row.try_get("CloudResourcePath")?,
        task_group: row.try_get("TaskGroup")?,
        scheduled_at: decode_ts_opt(row.try_get("ScheduledAt")?)?,
        started_at: decode_ts_opt(row.try_get("StartedAt")?)?,
        completed_at: decode_ts_opt(row.try_get("CompletedAt")?)?,
        retry_count: row.try_get("RetryCount")?,
        error_message: row.try_get("ErrorMessage")?,
        updated_at: decode_ts(&row.try_get::<String, _>("UpdatedAt")?)?,
        lease: Lease {
            owner_worker_id: row.try_get("OwnerWorkerId")?,
            preferred_worker_id: row.try_get("PreferredWorkerId")?,
            lease_expires_at: decode_ts_opt(row.try_get("LeaseExpiresAt")?)?,
            last_heartbeat_at: decode_ts_opt(row.try_get("LastHeartbeatAt")?)?,
        },
    })
}

fn transition_from_row(row: &SqliteRow) -> Result<JobStateTransition> {
    let from_status = row
        .try_get::<Option<String>, _>("FromStatus")?
        .as_deref()
        .map(decode_status)
        .transpose()?;

    Ok(JobStateTransition {
        tenant_id: row.try_get("TenantId")?,
        job_id: row.try_get("JobId")?,
        transition_id: row.try_get("TransitionId")?,
        from_status,
        to_status: decode_status(&row.try_get::<String, _>("ToStatus")?)?,
        transitioned_at: decode_ts(&row.try_get::<String, _>("TransitionedAt")?)?,
        note: row.try_get("Note")?,
    })
}

#[async_trait]
impl StateStore for SqliteStore {
    async fn insert_tenant(&self, tenant: &Tenant) -> Result<()> {
        sqlx::query(
            "INSERT INTO Tenants \
             (TenantId, UserEmail, OAuthProvider, OAuthUserId, CreatedAt, UpdatedAt) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(&tenant.tenant_id)
        .bind(&tenant.user_email)
        .bind(&tenant.oauth_provider)
        .bind(&tenant.oauth_user_id)
        .bind(encode_ts(tenant.created_at))
        .bind(encode_ts(tenant.updated_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_tenant(&self, tenant_id: &str) -> Result<Option<Tenant>> {
        let row = sqlx::query("SELECT * FROM Tenants WHERE TenantId = ?1")
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(tenant_from_row).transpose()
    }

    async fn find_tenant_by_identity(
        &self,
        oauth_provider: &str,
        oauth_user_id: &str,
    ) -> Result<Option<Tenant>> {
        let row = sqlx::query(
            "SELECT * FROM Tenants WHERE OAuthProvider = ?1 AND OAuthUserId = ?2 LIMIT 1",
        )
        .bind(oauth_provider)
        .bind(oauth_user_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(tenant_from_row).transpose()
    }

    async fn list_tenants(&self) -> Result<Vec<Tenant>> {
        let rows = sqlx::query("SELECT * FROM Tenants ORDER BY CreatedAt DESC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(tenant_from_row).collect()
    }

    async fn delete_tenant(&self, tenant_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM Tenants WHERE TenantId = ?1")
            .bind(tenant_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_job(&self, job: &Job) -> Result<()> {
        let status = persistable(job.status)?;
        let commands_json = serde_json::to_string(&job.commands)?;

        sqlx::query(&format!(
            "INSERT INTO Jobs ({JOB_COLUMNS}) VALUES \
             (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, \
              ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26)"
        ))
        .bind(&job.tenant_id)
        .bind(&job.job_id)
        .bind(status)
        .bind(&job.image_uri)
        .bind(commands_json)
        .bind(&job.env_vars_json)
        .bind(&job.name)
        .bind(&job.resource_profile)
        .bind(&job.machine_type)
        .bind(job.boot_disk_size_gb)
        .bind(job.use_spot_vms)
        .bind(&job.service_account)
        .bind(&job.cloud_resource_path)
        .bind(&job.task_group)
        .bind(job.retry_count)
        .bind(job.max_retries)
        .bind(&job.error_message)
        .bind(encode_ts(job.created_at))
        .bind(encode_ts(job.updated_at))
        .bind(encode_ts_opt(job.scheduled_at))
        .bind(encode_ts_opt(job.started_at))
        .bind(encode_ts_opt(job.completed_at))
        .bind(&job.lease.owner_worker_id)
        .bind(&job.lease.preferred_worker_id)
        .bind(encode_ts_opt(job.lease.lease_expires_at))
        .bind(encode_ts_opt(job.lease.last_heartbeat_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_job(&self, tenant_id: &str, job_id: &str) -> Result<Option<Job>> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM Jobs WHERE TenantId = ?1 AND JobId = ?2"
        ))
        .bind(tenant_id)
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn list_jobs(&self, tenant_id: &str) -> Result<Vec<Job>> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM Jobs WHERE TenantId = ?1 ORDER BY CreatedAt DESC"
        ))
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(job_from_row).collect()
    }

    async fn list_jobs_by_status(&self, tenant_id: &str, status: JobStatus) -> Result<Vec<Job>> {
        let status = persistable(status)?;
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM Jobs \
             WHERE TenantId = ?1 AND Status = ?2 ORDER BY CreatedAt DESC"
        ))
        .bind(tenant_id)
        .bind(status)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(job_from_row).collect()
    }

    async fn list_active_jobs(&self) -> Result<Vec<Job>> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM Jobs \
             WHERE Status IN ('PENDING', 'SCHEDULED', 'RUNNING') \
               AND CloudResourcePath IS NOT NULL \
             ORDER BY UpdatedAt DESC"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(job_from_row).collect()
    }

    async fn set_status(&self, tenant_id: &str, job_id: &str, status: JobStatus) -> Result<()> {
        let status = persistable(status)?;
        let now = encode_ts(Utc::now());

        sqlx::query(
            "UPDATE Jobs SET \
               Status = ?3, \
               ScheduledAt = CASE WHEN ?3 = 'SCHEDULED' AND ScheduledAt IS NULL \
                 THEN ?4 ELSE ScheduledAt END, \
               StartedAt = CASE WHEN ?3 = 'RUNNING' AND StartedAt IS NULL \
                 THEN ?4 ELSE StartedAt END, \
               CompletedAt = CASE WHEN ?3 IN ('COMPLETED', 'FAILED', 'CANCELLED') \
                 AND CompletedAt IS NULL THEN ?4 ELSE CompletedAt END, \
               UpdatedAt = ?4 \
             WHERE TenantId = ?1 AND JobId = ?2",
        )
        .bind(tenant_id)
        .bind(job_id)
        .bind(status)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_status_and_cloud_path(
        &self,
        tenant_id: &str,
        job_id: &str,
        status: JobStatus,
        cloud_resource_path: &str,
    ) -> Result<()> {
        let status = persistable(status)?;
        let now = encode_ts(Utc::now());

        sqlx::query(
            "UPDATE Jobs SET \
               Status = ?3, \
               CloudResourcePath = ?4, \
               StartedAt = CASE WHEN ?3 = 'RUNNING' AND StartedAt IS NULL \
                 THEN ?5 ELSE StartedAt END, \
               UpdatedAt = ?5 \
             WHERE TenantId = ?1 AND JobId = ?2",
        )
        .bind(tenant_id)
        .bind(job_id)
        .bind(status)
        .bind(cloud_resource_path)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_failed(&self, tenant_id: &str, job_id: &str, error_message: &str) -> Result<()> {
        let now = encode_ts(Utc::now());
        sqlx::query(
            "UPDATE Jobs SET Status = 'FAILED', ErrorMessage = ?3, \
               CompletedAt = ?4, UpdatedAt = ?4 \
             WHERE TenantId = ?1 AND JobId = ?2",
        )
        .bind(tenant_id)
        .bind(job_id)
        .bind(error_message)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_completed(&self, tenant_id: &str, job_id: &str) -> Result<()> {
        let now = encode_ts(Utc::now());
        sqlx::query(
            "UPDATE Jobs SET Status = 'COMPLETED', CompletedAt = ?3, UpdatedAt = ?3 \
             WHERE TenantId = ?1 AND JobId = ?2",
        )
        .bind(tenant_id)
        .bind(job_id)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_cancelled(&self, tenant_id: &str, job_id: &str) -> Result<()> {
        let now = encode_ts(Utc::now());
        sqlx::query(
            "UPDATE Jobs SET Status = 'CANCELLED', CompletedAt = ?3, UpdatedAt = ?3 \
             WHERE TenantId = ?1 AND JobId = ?2",
        )
        .bind(tenant_id)
        .bind(job_id)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_job(&self, tenant_id: &str, job_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM Jobs WHERE TenantId = ?1 AND JobId = ?2")
            .bind(tenant_id)
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn append_transition(&self, transition: &JobStateTransition) -> Result<()> {
        let from_status = transition.from_status.map(persistable).transpose()?;
        let to_status = persistable(transition.to_status)?;

        sqlx::query(
            "INSERT INTO JobStateTransitions \
             (TenantId, JobId, TransitionId, FromStatus, ToStatus, TransitionedAt, Note) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(&transition.tenant_id)
        .bind(&transition.job_id)
        .bind(&transition.transition_id)
        .bind(from_status)
        .bind(to_status)
        .bind(encode_ts(transition.transitioned_at))
        .bind(&transition.note)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_transitions(
        &self,
        tenant_id: &str,
        job_id: &str,
    ) -> Result<Vec<JobStateTransition>> {
        let rows = sqlx::query(
            "SELECT * FROM JobStateTransitions \
             WHERE TenantId = ?1 AND JobId = ?2 ORDER BY TransitionedAt ASC",
        )
        .bind(tenant_id)
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(transition_from_row).collect()
    }

    async fn try_claim_or_renew(
        &self,
        tenant_id: &str,
        job_id: &str,
        worker_id: &str,
        new_expiry: DateTime<Utc>,
    ) -> Result<bool> {
        let now = encode_ts(Utc::now());

        // One atomic conditional UPDATE; SQLite serializes writers, so two
        // racing claims cannot both transition from non-owning to owning.
        // Terminal rows never match the status predicate.
        let result = sqlx::query(
            "UPDATE Jobs SET \
               OwnerWorkerId = ?3, LeaseExpiresAt = ?4, \
               LastHeartbeatAt = ?5, UpdatedAt = ?5 \
             WHERE TenantId = ?1 AND JobId = ?2 \
               AND Status IN ('PENDING', 'SCHEDULED', 'RUNNING') \
               AND ( \
                 OwnerWorkerId = ?3 \
                 OR OwnerWorkerId IS NULL OR OwnerWorkerId = '' \
                 OR LeaseExpiresAt IS NULL OR LeaseExpiresAt < ?5 \
                 OR PreferredWorkerId = ?3 \
               )",
        )
        .bind(tenant_id)
        .bind(job_id)
        .bind(worker_id)
        .bind(encode_ts(new_expiry))
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}
