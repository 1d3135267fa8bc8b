use crate::common::error::{MarketError, MarketResult};
use crate::common::models::{Actor, Message, NewMessage};
use crate::server::config::ServerConfig;
use crate::server::database::{self, Database};
use crate::server::users;
use log::info;
use sqlx::SqliteConnection;
use std::sync::Arc;

pub async fn send_message(db: Arc<Database>, actor: &Actor, msg: NewMessage, config: &ServerConfig) -> MarketResult<Message> {
    if msg.content.trim().is_empty() {
        return Err(MarketError::Validation("message content is empty".to_string()));
    }
    if msg.content.chars().count() > config.max_message_length {
        return Err(MarketError::Validation(format!(
            "message too long (max {} chars)",
            config.max_message_length
        )));
    }
    if msg.receiver_id == actor.id {
        return Err(MarketError::Validation("cannot send a message to yourself".to_string()));
    }

    let mut conn = db.pool.acquire().await?;
    users::require_active_account(&mut conn, actor, None).await?;
    database::require_user(&mut conn, &msg.receiver_id).await?;
    if let Some(job_id) = &msg.job_id {
        database::require_job(&mut conn, job_id).await?;
    }
    if let Some(proposal_id) = &msg.proposal_id {
        database::require_proposal(&mut conn, proposal_id).await?;
    }

    let message = Message {
        id: database::new_id(),
        sender_id: actor.id.clone(),
        receiver_id: msg.receiver_id,
        content: msg.content,
        job_id: msg.job_id,
        proposal_id: msg.proposal_id,
        read: false,
        created_at: database::from_millis(database::now_millis()),
    };
    sqlx::query(
        "INSERT INTO messages (id, sender_id, receiver_id, content, job_id, proposal_id, is_read, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, 0, ?)",
    )
    .bind(&message.id)
    .bind(&message.sender_id)
    .bind(&message.receiver_id)
    .bind(&message.content)
    .bind(&message.job_id)
    .bind(&message.proposal_id)
    .bind(message.created_at.timestamp_millis())
    .execute(&mut *conn)
    .await?;

    info!("[MSG] Message {} sent from {} to {}", message.id, message.sender_id, message.receiver_id);
    Ok(message)
}

/// Flip unread messages from `other_user_id` to `user_id` created at or before
/// `through` (unix millis); returns how many changed.
pub async fn mark_read(conn: &mut SqliteConnection, user_id: &str, other_user_id: &str, through: i64) -> MarketResult<u64> {
    let res = sqlx::query(
        "UPDATE messages SET is_read = 1 WHERE receiver_id = ? AND sender_id = ? AND is_read = 0 AND created_at <= ?",
    )
    .bind(user_id)
    .bind(other_user_id)
    .bind(through)
    .execute(&mut *conn)
    .await?;
    Ok(res.rows_affected())
}

pub async fn mark_conversation_read(db: Arc<Database>, actor: &Actor, other_user_id: &str) -> MarketResult<u64> {
    let mut conn = db.pool.acquire().await?;
    let flipped = mark_read(&mut conn, &actor.id, other_user_id, database::now_millis()).await?;
    info!("[MSG] {} message(s) from {} marked read by {}", flipped, other_user_id, actor.id);
    Ok(flipped)
}
