// Conversation views derived from the flat message log; nothing here is persisted.
use crate::common::error::{MarketError, MarketResult};
use crate::common::models::{Conversation, Message};
use crate::server::config::ServerConfig;
use crate::server::database::{self, Database};
use crate::server::messages;
use log::{debug, info};
use sqlx::SqliteConnection;
use std::collections::HashMap;
use std::sync::Arc;

struct Thread {
    other_user_id: String,
    last_message: Message,
    unread_count: i64,
}

/// Fold a newest-first message list into one thread per counterpart, keeping
/// first-seen (most recent) order.
fn group_threads(user_id: &str, newest_first: Vec<Message>) -> Vec<Thread> {
    let mut threads: Vec<Thread> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for msg in newest_first {
        let other = if msg.sender_id == user_id { msg.receiver_id.clone() } else { msg.sender_id.clone() };
        let unread = msg.receiver_id == user_id && !msg.read;
        match index.get(&other) {
            Some(&i) => {
                if unread {
                    threads[i].unread_count += 1;
                }
            }
            None => {
                index.insert(other.clone(), threads.len());
                threads.push(Thread {
                    other_user_id: other,
                    unread_count: if unread { 1 } else { 0 },
                    last_message: msg,
                });
            }
        }
    }
    threads
}

/// Conversations of `user_id`, most recently active first. Recomputed on every call.
pub async fn list_conversations(db: Arc<Database>, user_id: &str) -> MarketResult<Vec<Conversation>> {
    let mut conn = db.pool.acquire().await?;
    let rows = sqlx::query(
        "SELECT * FROM messages WHERE sender_id = ? OR receiver_id = ? ORDER BY created_at DESC, rowid DESC",
    )
    .bind(user_id)
    .bind(user_id)
    .fetch_all(&mut *conn)
    .await?;
    let log: Vec<Message> = rows.iter().map(database::message_from_row).collect::<MarketResult<_>>()?;
    debug!("[CONV] {} message(s) in log for {}", log.len(), user_id);

    let threads = group_threads(user_id, log);
    let mut conversations = Vec::with_capacity(threads.len());
    for thread in threads {
        // Soft-deleted counterparts still show up, with their anonymized profile
        let Some(other_user) = database::fetch_user(&mut conn, &thread.other_user_id).await? else {
            continue;
        };
        conversations.push(Conversation {
            other_user,
            last_message: thread.last_message,
            unread_count: thread.unread_count,
        });
    }
    Ok(conversations)
}

async fn load_thread(conn: &mut SqliteConnection, user_id: &str, other_user_id: &str) -> MarketResult<Vec<Message>> {
    if database::fetch_user(conn, other_user_id).await?.is_none() {
        return Err(MarketError::NotFound(format!("user {}", other_user_id)));
    }
    let rows = sqlx::query(
        "SELECT * FROM messages WHERE (sender_id = ? AND receiver_id = ?) OR (sender_id = ? AND receiver_id = ?) \
         ORDER BY created_at ASC, rowid ASC",
    )
    .bind(user_id)
    .bind(other_user_id)
    .bind(other_user_id)
    .bind(user_id)
    .fetch_all(&mut *conn)
    .await?;
    rows.iter().map(database::message_from_row).collect()
}

/// Messages between the two users, oldest first.
///
/// With `mark_read_on_open` set, the requester's unread messages in the thread
/// are marked read in the same transaction that loads them, and only up to the
/// newest loaded message. The returned copies still show which ones were new.
pub async fn list_messages(
    db: Arc<Database>,
    user_id: &str,
    other_user_id: &str,
    config: &ServerConfig,
) -> MarketResult<Vec<Message>> {
    if !config.mark_read_on_open {
        let mut conn = db.pool.acquire().await?;
        return load_thread(&mut conn, user_id, other_user_id).await;
    }

    let mut tx = db.begin_write().await?;
    let thread = load_thread(&mut tx, user_id, other_user_id).await?;
    if let Some(newest) = thread.last() {
        let through = newest.created_at.timestamp_millis();
        let flipped = messages::mark_read(&mut tx, user_id, other_user_id, through).await?;
        if flipped > 0 {
            info!("[CONV] Opened thread {} <-> {}: {} marked read", user_id, other_user_id, flipped);
        }
    }
    tx.commit().await?;
    Ok(thread)
}
