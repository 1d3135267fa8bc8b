use crate::common::error::{MarketError, MarketResult};
use crate::common::models::{Actor, NewUser, ProfilePatch, Role, User, UserView};
use crate::server::database::{self, Database};
use chrono::{DateTime, Utc};
use log::info;
use sqlx::SqliteConnection;
use std::sync::Arc;

/// Skills on a profile are a set; keep the first occurrence of each.
fn dedup_skills(skills: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(skills.len());
    for s in skills {
        let s = s.trim();
        if !s.is_empty() && !out.iter().any(|o| o == s) {
            out.push(s.to_string());
        }
    }
    out
}

pub async fn register_user(db: Arc<Database>, draft: NewUser) -> MarketResult<User> {
    draft.validate()?;
    let user_id = database::new_id();
    let now = database::now_millis();
    let email = draft.email.trim().to_lowercase();
    let skills = dedup_skills(&draft.skills);

    sqlx::query(
        "INSERT INTO users (id, email, role, name, bio, title, company, hourly_rate, skills, location, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&user_id)
    .bind(&email)
    .bind(draft.role.as_str())
    .bind(draft.name.trim())
    .bind(&draft.bio)
    .bind(&draft.title)
    .bind(&draft.company)
    .bind(draft.hourly_rate)
    .bind(database::skills_to_json(&skills))
    .bind(&draft.location)
    .bind(now)
    .execute(&db.pool)
    .await
    .map_err(|e| match MarketError::from(e) {
        MarketError::Conflict(_) => MarketError::Conflict(format!("email {} already registered", email)),
        other => other,
    })?;
    info!("[USERS] Registered {} as {} ({})", email, draft.role, user_id);

    let mut conn = db.pool.acquire().await?;
    database::require_user(&mut conn, &user_id).await
}

pub async fn update_profile(db: Arc<Database>, actor: &Actor, user_id: &str, patch: ProfilePatch) -> MarketResult<User> {
    if actor.id != user_id {
        return Err(MarketError::Role("a profile can only be edited by its owner".to_string()));
    }
    patch.validate()?;

    let mut tx = db.begin_write().await?;
    let mut user = database::require_user(&mut tx, user_id).await?;
    if let Some(name) = patch.name {
        user.name = name.trim().to_string();
    }
    if patch.bio.is_some() {
        user.bio = patch.bio;
    }
    if patch.title.is_some() {
        user.title = patch.title;
    }
    if patch.company.is_some() {
        user.company = patch.company;
    }
    if patch.hourly_rate.is_some() {
        user.hourly_rate = patch.hourly_rate;
    }
    if let Some(skills) = patch.skills {
        user.skills = dedup_skills(&skills);
    }
    if patch.location.is_some() {
        user.location = patch.location;
    }

    sqlx::query(
        "UPDATE users SET name = ?, bio = ?, title = ?, company = ?, hourly_rate = ?, skills = ?, location = ? WHERE id = ?",
    )
    .bind(&user.name)
    .bind(&user.bio)
    .bind(&user.title)
    .bind(&user.company)
    .bind(user.hourly_rate)
    .bind(database::skills_to_json(&user.skills))
    .bind(&user.location)
    .bind(user_id)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    info!("[USERS] Profile updated for {}", user_id);
    Ok(user)
}

/// A user is suspended while any active suspension has no end date or ends in the future.
pub async fn is_suspended(conn: &mut SqliteConnection, user_id: &str, now: DateTime<Utc>) -> MarketResult<bool> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM suspensions WHERE user_id = ? AND is_active = 1 \
         AND (suspended_until IS NULL OR suspended_until > ?)",
    )
    .bind(user_id)
    .bind(now.timestamp_millis())
    .fetch_one(&mut *conn)
    .await?;
    Ok(count > 0)
}

/// Refuses actors that are currently suspended.
pub async fn ensure_not_suspended(conn: &mut SqliteConnection, actor: &Actor) -> MarketResult<()> {
    if is_suspended(conn, &actor.id, Utc::now()).await? {
        Err(MarketError::Role("account suspended".to_string()))
    } else {
        Ok(())
    }
}

/// Load the actor's stored account: it must exist, not be deleted, not be
/// suspended and, when `role` is given, currently hold that role.
pub async fn require_active_account(conn: &mut SqliteConnection, actor: &Actor, role: Option<Role>) -> MarketResult<User> {
    let user = database::require_user(conn, &actor.id).await?;
    if let Some(role) = role {
        if user.role != role {
            return Err(MarketError::Role(format!("user {} is not a {}", actor.id, role)));
        }
    }
    ensure_not_suspended(conn, actor).await?;
    Ok(user)
}

pub async fn get_user(db: Arc<Database>, user_id: &str) -> MarketResult<UserView> {
    let mut conn = db.pool.acquire().await?;
    let user = database::require_user(&mut conn, user_id).await?;
    let suspended = is_suspended(&mut conn, user_id, Utc::now()).await?;
    Ok(UserView { user, suspended })
}
