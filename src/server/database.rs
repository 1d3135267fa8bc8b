use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqliteConnection, SqlitePool};
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::str::FromStr;
use std::time::Duration;

use crate::common::error::{MarketError, MarketResult};
use crate::common::models::{Contract, Job, Message, Proposal, Suspension, User};
use crate::server::config::RetryPolicy;

#[derive(Debug, Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        info!("[DB] Connecting to {}", database_url);

        // Extract file path from database URL to create directory if needed
        let file_path = database_url
            .strip_prefix("sqlite://")
            .or_else(|| database_url.strip_prefix("sqlite:"))
            .unwrap_or(database_url);
        let file_path = file_path.split('?').next().unwrap_or(file_path);

        if !file_path.starts_with(":memory:") {
            if let Some(parent) = std::path::Path::new(file_path).parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    std::fs::create_dir_all(parent).map_err(|e| sqlx::Error::Configuration(Box::new(e)))?;
                    info!("[DB] Created directory {:?}", parent);
                }
            }
        }

        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        info!("[DB] Connection pool ready (max_connections={})", max_connections);
        Ok(Self { pool })
    }

    /// Single-connection in-memory database with the schema applied.
    ///
    /// The connection is never recycled, since closing it would drop the data.
    pub async fn in_memory() -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        // Users (skills stored as a JSON array)
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT UNIQUE NOT NULL,
                role TEXT NOT NULL,
                name TEXT NOT NULL,
                bio TEXT,
                title TEXT,
                company TEXT,
                hourly_rate REAL,
                skills TEXT NOT NULL DEFAULT '[]',
                location TEXT,
                created_at INTEGER NOT NULL,
                deleted_at INTEGER
            );
        "#).execute(&self.pool).await?;

        // Jobs
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                description TEXT NOT NULL,
                client_id TEXT NOT NULL REFERENCES users(id),
                category TEXT NOT NULL,
                budget_type TEXT NOT NULL,
                budget_min REAL,
                budget_max REAL,
                hourly_rate REAL,
                experience_level TEXT NOT NULL,
                skills TEXT NOT NULL,
                status TEXT NOT NULL,
                proposal_count INTEGER NOT NULL DEFAULT 0,
                remote INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
        "#).execute(&self.pool).await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_client ON jobs(client_id);")
            .execute(&self.pool).await?;

        // Proposals
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS proposals (
                id TEXT PRIMARY KEY,
                job_id TEXT NOT NULL REFERENCES jobs(id),
                freelancer_id TEXT NOT NULL REFERENCES users(id),
                cover_letter TEXT NOT NULL,
                proposed_rate REAL NOT NULL,
                timeline TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
        "#).execute(&self.pool).await?;
        // One live proposal per (job, freelancer), one accepted proposal per job
        sqlx::query("CREATE UNIQUE INDEX IF NOT EXISTS idx_proposals_live ON proposals(job_id, freelancer_id) WHERE status != 'rejected';")
            .execute(&self.pool).await?;
        sqlx::query("CREATE UNIQUE INDEX IF NOT EXISTS idx_proposals_accepted ON proposals(job_id) WHERE status = 'accepted';")
            .execute(&self.pool).await?;

        // Contracts
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS contracts (
                id TEXT PRIMARY KEY,
                job_id TEXT NOT NULL REFERENCES jobs(id),
                freelancer_id TEXT NOT NULL REFERENCES users(id),
                client_id TEXT NOT NULL REFERENCES users(id),
                proposal_id TEXT UNIQUE NOT NULL REFERENCES proposals(id),
                status TEXT NOT NULL,
                total_earnings REAL NOT NULL DEFAULT 0,
                hours_worked REAL NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
        "#).execute(&self.pool).await?;

        // Messages
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                sender_id TEXT NOT NULL REFERENCES users(id),
                receiver_id TEXT NOT NULL REFERENCES users(id),
                content TEXT NOT NULL,
                job_id TEXT,
                proposal_id TEXT,
                is_read INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL
            );
        "#).execute(&self.pool).await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_sender ON messages(sender_id);")
            .execute(&self.pool).await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_receiver ON messages(receiver_id);")
            .execute(&self.pool).await?;

        // Suspensions (append-only audit log)
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS suspensions (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(id),
                admin_id TEXT NOT NULL,
                reason TEXT NOT NULL,
                suspended_until INTEGER,
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at INTEGER NOT NULL
            );
        "#).execute(&self.pool).await?;

        // Admin stats snapshot
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS admin_stats (
                id TEXT PRIMARY KEY,
                total_users INTEGER NOT NULL,
                total_jobs INTEGER NOT NULL,
                total_proposals INTEGER NOT NULL,
                total_contracts INTEGER NOT NULL,
                total_revenue REAL NOT NULL,
                updated_at INTEGER NOT NULL
            );
        "#).execute(&self.pool).await?;

        debug!("[DB] Schema is up to date");
        Ok(())
    }

    /// Open a write transaction with `BEGIN IMMEDIATE`.
    ///
    /// The write lock is taken before the first read, so a competing writer
    /// waits on the busy timeout and then sees the committed state instead of
    /// failing its lock upgrade halfway through.
    pub async fn begin_write(&self) -> MarketResult<WriteTx> {
        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
        Ok(WriteTx { conn: Some(conn) })
    }
}

/// Pooled connection inside an immediate transaction. Dropping it without
/// `commit` rolls back before the connection goes back to the pool.
pub struct WriteTx {
    conn: Option<PoolConnection<Sqlite>>,
}

impl WriteTx {
    pub async fn commit(mut self) -> MarketResult<()> {
        let Some(mut conn) = self.conn.take() else {
            return Ok(());
        };
        match sqlx::query("COMMIT").execute(&mut *conn).await {
            Ok(_) => Ok(()),
            Err(e) => {
                rollback_detached(conn);
                Err(e.into())
            }
        }
    }
}

fn rollback_detached(mut conn: PoolConnection<Sqlite>) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                if let Err(e) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
                    warn!("[DB] Rollback failed, closing connection: {}", e);
                    drop(conn.detach());
                }
            });
        }
        // No runtime to roll back on: closing the connection discards the transaction
        Err(_) => drop(conn.detach()),
    }
}

impl Drop for WriteTx {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            debug!("[DB] Rolling back uncommitted write transaction");
            rollback_detached(conn);
        }
    }
}

impl Deref for WriteTx {
    type Target = SqliteConnection;

    fn deref(&self) -> &SqliteConnection {
        self.conn.as_deref().expect("connection held until commit or drop")
    }
}

impl DerefMut for WriteTx {
    fn deref_mut(&mut self) -> &mut SqliteConnection {
        self.conn.as_deref_mut().expect("connection held until commit or drop")
    }
}

/// Re-run `op` while it fails with a transient storage error.
pub async fn with_retry<T, F, Fut>(policy: RetryPolicy, mut op: F) -> MarketResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = MarketResult<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Err(e) if e.is_retryable() && attempt < policy.max_retries => {
                attempt += 1;
                warn!("[DB] Transient failure (attempt {}/{}): {}", attempt, policy.max_retries, e);
                tokio::time::sleep(policy.backoff * attempt).await;
            }
            other => return other,
        }
    }
}

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

pub fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn parse_column<T: FromStr<Err = MarketError>>(row: &SqliteRow, column: &str) -> MarketResult<T> {
    let raw: String = row.try_get(column)?;
    raw.parse()
}

fn skills_from_json(raw: &str) -> MarketResult<Vec<String>> {
    serde_json::from_str(raw).map_err(|e| MarketError::Transient(format!("corrupt skills column: {}", e)))
}

pub fn skills_to_json(skills: &[String]) -> String {
    serde_json::to_string(skills).unwrap_or_else(|_| "[]".to_string())
}

pub fn user_from_row(row: &SqliteRow) -> MarketResult<User> {
    let skills: String = row.try_get("skills")?;
    Ok(User {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        role: parse_column(row, "role")?,
        name: row.try_get("name")?,
        bio: row.try_get("bio")?,
        title: row.try_get("title")?,
        company: row.try_get("company")?,
        hourly_rate: row.try_get("hourly_rate")?,
        skills: skills_from_json(&skills)?,
        location: row.try_get("location")?,
        created_at: from_millis(row.try_get("created_at")?),
        deleted_at: row.try_get::<Option<i64>, _>("deleted_at")?.map(from_millis),
    })
}

pub fn job_from_row(row: &SqliteRow) -> MarketResult<Job> {
    let skills: String = row.try_get("skills")?;
    Ok(Job {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        client_id: row.try_get("client_id")?,
        category: row.try_get("category")?,
        budget_type: parse_column(row, "budget_type")?,
        budget_min: row.try_get("budget_min")?,
        budget_max: row.try_get("budget_max")?,
        hourly_rate: row.try_get("hourly_rate")?,
        experience_level: parse_column(row, "experience_level")?,
        skills: skills_from_json(&skills)?,
        status: parse_column(row, "status")?,
        proposal_count: row.try_get("proposal_count")?,
        remote: row.try_get("remote")?,
        created_at: from_millis(row.try_get("created_at")?),
        updated_at: from_millis(row.try_get("updated_at")?),
    })
}

pub fn proposal_from_row(row: &SqliteRow) -> MarketResult<Proposal> {
    Ok(Proposal {
        id: row.try_get("id")?,
        job_id: row.try_get("job_id")?,
        freelancer_id: row.try_get("freelancer_id")?,
        cover_letter: row.try_get("cover_letter")?,
        proposed_rate: row.try_get("proposed_rate")?,
        timeline: row.try_get("timeline")?,
        status: parse_column(row, "status")?,
        created_at: from_millis(row.try_get("created_at")?),
        updated_at: from_millis(row.try_get("updated_at")?),
    })
}

pub fn contract_from_row(row: &SqliteRow) -> MarketResult<Contract> {
    Ok(Contract {
        id: row.try_get("id")?,
        job_id: row.try_get("job_id")?,
        freelancer_id: row.try_get("freelancer_id")?,
        client_id: row.try_get("client_id")?,
        proposal_id: row.try_get("proposal_id")?,
        status: parse_column(row, "status")?,
        total_earnings: row.try_get("total_earnings")?,
        hours_worked: row.try_get("hours_worked")?,
        created_at: from_millis(row.try_get("created_at")?),
        updated_at: from_millis(row.try_get("updated_at")?),
    })
}

pub fn message_from_row(row: &SqliteRow) -> MarketResult<Message> {
    Ok(Message {
        id: row.try_get("id")?,
        sender_id: row.try_get("sender_id")?,
        receiver_id: row.try_get("receiver_id")?,
        content: row.try_get("content")?,
        job_id: row.try_get("job_id")?,
        proposal_id: row.try_get("proposal_id")?,
        read: row.try_get("is_read")?,
        created_at: from_millis(row.try_get("created_at")?),
    })
}

pub fn suspension_from_row(row: &SqliteRow) -> MarketResult<Suspension> {
    Ok(Suspension {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        admin_id: row.try_get("admin_id")?,
        reason: row.try_get("reason")?,
        suspended_until: row.try_get::<Option<i64>, _>("suspended_until")?.map(from_millis),
        is_active: row.try_get("is_active")?,
        created_at: from_millis(row.try_get("created_at")?),
    })
}

// Lookups shared by the services. They take a plain connection so the same
// code runs against the pool or inside an open transaction.

/// Any user row, soft-deleted ones included.
pub async fn fetch_user(conn: &mut SqliteConnection, user_id: &str) -> MarketResult<Option<User>> {
    let row = sqlx::query("SELECT * FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(user_from_row).transpose()
}

/// A user that has not been deleted, or `NotFound`.
pub async fn require_user(conn: &mut SqliteConnection, user_id: &str) -> MarketResult<User> {
    match fetch_user(conn, user_id).await? {
        Some(user) if user.deleted_at.is_none() => Ok(user),
        _ => Err(MarketError::NotFound(format!("user {}", user_id))),
    }
}

pub async fn require_job(conn: &mut SqliteConnection, job_id: &str) -> MarketResult<Job> {
    let row = sqlx::query("SELECT * FROM jobs WHERE id = ?")
        .bind(job_id)
        .fetch_optional(&mut *conn)
        .await?;
    match row {
        Some(row) => job_from_row(&row),
        None => Err(MarketError::NotFound(format!("job {}", job_id))),
    }
}

pub async fn require_proposal(conn: &mut SqliteConnection, proposal_id: &str) -> MarketResult<Proposal> {
    let row = sqlx::query("SELECT * FROM proposals WHERE id = ?")
        .bind(proposal_id)
        .fetch_optional(&mut *conn)
        .await?;
    match row {
        Some(row) => proposal_from_row(&row),
        None => Err(MarketError::NotFound(format!("proposal {}", proposal_id))),
    }
}

pub async fn require_contract(conn: &mut SqliteConnection, contract_id: &str) -> MarketResult<Contract> {
    let row = sqlx::query("SELECT * FROM contracts WHERE id = ?")
        .bind(contract_id)
        .fetch_optional(&mut *conn)
        .await?;
    match row {
        Some(row) => contract_from_row(&row),
        None => Err(MarketError::NotFound(format!("contract {}", contract_id))),
    }
}
