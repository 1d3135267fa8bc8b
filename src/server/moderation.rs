use crate::common::error::{MarketError, MarketResult};
use crate::common::models::{Actor, AdminStats, Role, Suspension, User};
use crate::server::database::{self, Database};
use chrono::{DateTime, Utc};
use log::{info, warn};
use sqlx::Row;
use std::sync::Arc;

pub const STATS_ROW_ID: &str = "global";

fn require_admin(admin: &Actor) -> MarketResult<()> {
    admin.require_role(Role::Admin)
}

fn refuse_self(admin: &Actor, user_id: &str, what: &str) -> MarketResult<()> {
    if admin.id == user_id {
        Err(MarketError::Validation(format!("an admin cannot {} their own account", what)))
    } else {
        Ok(())
    }
}

/// Append an active suspension for `user_id`. `until = None` means indefinite.
pub async fn suspend_user(
    db: Arc<Database>,
    admin: &Actor,
    user_id: &str,
    reason: &str,
    until: Option<DateTime<Utc>>,
) -> MarketResult<Suspension> {
    require_admin(admin)?;
    let mut conn = db.pool.acquire().await?;
    database::require_user(&mut conn, user_id).await?;
    if reason.trim().is_empty() {
        return Err(MarketError::Validation("suspension reason is required".to_string()));
    }
    refuse_self(admin, user_id, "suspend")?;

    let suspension = Suspension {
        id: database::new_id(),
        user_id: user_id.to_string(),
        admin_id: admin.id.clone(),
        reason: reason.trim().to_string(),
        suspended_until: until.map(|t| database::from_millis(t.timestamp_millis())),
        is_active: true,
        created_at: database::from_millis(database::now_millis()),
    };
    sqlx::query(
        "INSERT INTO suspensions (id, user_id, admin_id, reason, suspended_until, is_active, created_at) \
         VALUES (?, ?, ?, ?, ?, 1, ?)",
    )
    .bind(&suspension.id)
    .bind(&suspension.user_id)
    .bind(&suspension.admin_id)
    .bind(&suspension.reason)
    .bind(suspension.suspended_until.map(|t| t.timestamp_millis()))
    .bind(suspension.created_at.timestamp_millis())
    .execute(&mut *conn)
    .await?;

    match suspension.suspended_until {
        Some(until) => info!("[MOD] {} suspended {} until {}: {}", admin.id, user_id, until, suspension.reason),
        None => info!("[MOD] {} suspended {} indefinitely: {}", admin.id, user_id, suspension.reason),
    }
    Ok(suspension)
}

/// Deactivate the most recent active suspension. Returns it, or None when there was nothing to lift.
pub async fn reinstate_user(db: Arc<Database>, admin: &Actor, user_id: &str) -> MarketResult<Option<Suspension>> {
    require_admin(admin)?;
    let mut tx = db.begin_write().await?;
    if database::fetch_user(&mut tx, user_id).await?.is_none() {
        return Err(MarketError::NotFound(format!("user {}", user_id)));
    }

    let row = sqlx::query(
        "SELECT * FROM suspensions WHERE user_id = ? AND is_active = 1 ORDER BY created_at DESC, rowid DESC LIMIT 1",
    )
    .bind(user_id)
    .fetch_optional(&mut *tx)
    .await?;
    let Some(row) = row else {
        info!("[MOD] Reinstate of {} by {}: no active suspension", user_id, admin.id);
        return Ok(None);
    };
    let mut suspension = database::suspension_from_row(&row)?;

    sqlx::query("UPDATE suspensions SET is_active = 0 WHERE id = ?")
        .bind(&suspension.id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    suspension.is_active = false;

    info!("[MOD] {} lifted suspension {} on {}", admin.id, suspension.id, user_id);
    Ok(Some(suspension))
}

/// Suspension audit log for a user, newest first.
pub async fn list_suspensions(db: Arc<Database>, admin: &Actor, user_id: &str) -> MarketResult<Vec<Suspension>> {
    require_admin(admin)?;
    let rows = sqlx::query("SELECT * FROM suspensions WHERE user_id = ? ORDER BY created_at DESC, rowid DESC")
        .bind(user_id)
        .fetch_all(&db.pool)
        .await?;
    rows.iter().map(database::suspension_from_row).collect()
}

/// Overwrite a user's role. Existing jobs and proposals are not revalidated.
pub async fn change_role(db: Arc<Database>, admin: &Actor, user_id: &str, new_role: &str) -> MarketResult<User> {
    require_admin(admin)?;
    let role: Role = new_role.parse()?;
    let mut conn = db.pool.acquire().await?;
    let mut user = database::require_user(&mut conn, user_id).await?;
    if role != Role::Admin {
        refuse_self(admin, user_id, "demote")?;
    }

    sqlx::query("UPDATE users SET role = ? WHERE id = ?")
        .bind(role.as_str())
        .bind(user_id)
        .execute(&mut *conn)
        .await?;
    info!("[MOD] {} changed role of {}: {} -> {}", admin.id, user_id, user.role, role);
    user.role = role;
    Ok(user)
}

/// Soft-delete a user by anonymizing the profile.
///
/// Live work attached to the user (proposals on their open jobs, their own
/// live proposals, pending or active contracts) blocks the delete with
/// `Conflict` unless `cascade` is set. Cascading cancels those contracts and
/// jobs and rejects the user's undecided proposals in the same transaction.
/// Active suspensions are closed. Messages are kept.
pub async fn delete_user(db: Arc<Database>, admin: &Actor, user_id: &str, cascade: bool) -> MarketResult<User> {
    require_admin(admin)?;
    refuse_self(admin, user_id, "delete")?;

    let mut tx = db.begin_write().await?;
    database::require_user(&mut tx, user_id).await?;

    let blockers = sqlx::query(
        "SELECT \
           (SELECT COUNT(*) FROM proposals p JOIN jobs j ON p.job_id = j.id \
              WHERE j.client_id = ?1 AND j.status IN ('open', 'in_progress') \
              AND p.status IN ('submitted', 'interviewing', 'accepted')) AS job_proposals, \
           (SELECT COUNT(*) FROM proposals p JOIN jobs j ON p.job_id = j.id \
              WHERE p.freelancer_id = ?1 AND j.status IN ('open', 'in_progress') \
              AND p.status IN ('submitted', 'interviewing', 'accepted')) AS own_proposals, \
           (SELECT COUNT(*) FROM contracts \
              WHERE (client_id = ?1 OR freelancer_id = ?1) AND status IN ('pending', 'active')) AS contracts",
    )
    .bind(user_id)
    .fetch_one(&mut *tx)
    .await?;
    let job_proposals: i64 = blockers.try_get("job_proposals")?;
    let own_proposals: i64 = blockers.try_get("own_proposals")?;
    let live_contracts: i64 = blockers.try_get("contracts")?;
    let blocked = job_proposals + own_proposals + live_contracts > 0;

    if blocked && !cascade {
        warn!("[MOD] Delete of {} refused: live work attached", user_id);
        return Err(MarketError::Conflict(format!(
            "user {} has {} live proposal(s) on owned jobs, {} own live proposal(s) and {} open contract(s); \
             request a cascading delete to proceed",
            user_id, job_proposals, own_proposals, live_contracts
        )));
    }

    let now = database::now_millis();
    // Jobs whose running contract involves the user
    sqlx::query(
        "UPDATE jobs SET status = 'cancelled', updated_at = ?1 WHERE status IN ('open', 'in_progress') AND id IN \
         (SELECT job_id FROM contracts WHERE (client_id = ?2 OR freelancer_id = ?2) AND status IN ('pending', 'active'))",
    )
    .bind(now)
    .bind(user_id)
    .execute(&mut *tx)
    .await?;
    sqlx::query(
        "UPDATE contracts SET status = 'cancelled', updated_at = ?1 \
         WHERE (client_id = ?2 OR freelancer_id = ?2) AND status IN ('pending', 'active')",
    )
    .bind(now)
    .bind(user_id)
    .execute(&mut *tx)
    .await?;
    sqlx::query("UPDATE jobs SET status = 'cancelled', updated_at = ?1 WHERE client_id = ?2 AND status IN ('open', 'in_progress')")
        .bind(now)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query(
        "UPDATE proposals SET status = 'rejected', updated_at = ?1 \
         WHERE freelancer_id = ?2 AND status IN ('submitted', 'interviewing')",
    )
    .bind(now)
    .bind(user_id)
    .execute(&mut *tx)
    .await?;
    sqlx::query("UPDATE suspensions SET is_active = 0 WHERE user_id = ? AND is_active = 1")
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

    sqlx::query(
        "UPDATE users SET email = ?, name = 'Deleted user', bio = NULL, title = NULL, company = NULL, \
         hourly_rate = NULL, skills = '[]', location = NULL, deleted_at = ? WHERE id = ?",
    )
    .bind(format!("deleted+{}@invalid", user_id))
    .bind(now)
    .bind(user_id)
    .execute(&mut *tx)
    .await?;
    let user = database::fetch_user(&mut tx, user_id)
        .await?
        .ok_or_else(|| MarketError::NotFound(format!("user {}", user_id)))?;
    tx.commit().await?;

    info!("[MOD] {} deleted user {} (cascade={}, blocked={})", admin.id, user_id, cascade, blocked);
    Ok(user)
}

/// Recount everything and overwrite the single stats row.
pub async fn recompute_stats(db: Arc<Database>, admin: &Actor) -> MarketResult<AdminStats> {
    require_admin(admin)?;
    let row = sqlx::query(
        "SELECT \
           (SELECT COUNT(*) FROM users WHERE deleted_at IS NULL) AS total_users, \
           (SELECT COUNT(*) FROM jobs) AS total_jobs, \
           (SELECT COUNT(*) FROM proposals) AS total_proposals, \
           (SELECT COUNT(*) FROM contracts) AS total_contracts, \
           (SELECT TOTAL(total_earnings) FROM contracts WHERE status = 'completed') AS total_revenue",
    )
    .fetch_one(&db.pool)
    .await?;

    let stats = AdminStats {
        id: STATS_ROW_ID.to_string(),
        total_users: row.try_get("total_users")?,
        total_jobs: row.try_get("total_jobs")?,
        total_proposals: row.try_get("total_proposals")?,
        total_contracts: row.try_get("total_contracts")?,
        total_revenue: row.try_get("total_revenue")?,
        updated_at: database::from_millis(database::now_millis()),
    };
    sqlx::query(
        "INSERT OR REPLACE INTO admin_stats (id, total_users, total_jobs, total_proposals, total_contracts, total_revenue, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&stats.id)
    .bind(stats.total_users)
    .bind(stats.total_jobs)
    .bind(stats.total_proposals)
    .bind(stats.total_contracts)
    .bind(stats.total_revenue)
    .bind(stats.updated_at.timestamp_millis())
    .execute(&db.pool)
    .await?;

    info!(
        "[MOD] Stats recomputed: users={} jobs={} proposals={} contracts={} revenue={:.2}",
        stats.total_users, stats.total_jobs, stats.total_proposals, stats.total_contracts, stats.total_revenue
    );
    Ok(stats)
}
