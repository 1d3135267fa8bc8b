use clap::{Parser, Subcommand};
use gigboard::common::models::{Actor, Role};
use gigboard::server::database::Database;
use gigboard::server::moderation;
use sqlx::Row;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "db_inspect")]
#[command(about = "Inspect a gigboard database")]
struct Args {
    #[arg(short, long, default_value = "sqlite:data/gigboard.db")]
    database: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Recent jobs with their status and proposal counters
    Jobs {
        #[arg(short, long, default_value = "10")]
        limit: i64,
    },
    /// Jobs whose proposal counter disagrees with the proposal rows
    CheckCounters,
    /// Active suspensions
    Suspensions,
    /// Recompute and print the admin stats snapshot
    Stats {
        /// Admin id recorded as the caller
        #[arg(long, default_value = "db_inspect")]
        admin_id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    println!("Connecting to {}", args.database);
    let db = Arc::new(Database::connect(&args.database, 1).await?);
    db.migrate().await?;

    match args.command {
        Commands::Jobs { limit } => {
            let rows = sqlx::query(
                "SELECT id, title, status, proposal_count, created_at FROM jobs ORDER BY created_at DESC LIMIT ?",
            )
            .bind(limit)
            .fetch_all(&db.pool)
            .await?;
            for r in rows.iter() {
                let id: String = r.try_get("id").unwrap_or_default();
                let title: String = r.try_get("title").unwrap_or_default();
                let status: String = r.try_get("status").unwrap_or_default();
                let count: i64 = r.try_get("proposal_count").unwrap_or(0);
                let created_at: i64 = r.try_get("created_at").unwrap_or(0);
                println!("id={} status={} proposals={} created_at={} title={}", id, status, count, created_at, title);
            }
        }
        Commands::CheckCounters => {
            let rows = sqlx::query(
                "SELECT j.id, j.proposal_count, (SELECT COUNT(*) FROM proposals p WHERE p.job_id = j.id) AS actual \
                 FROM jobs j WHERE j.proposal_count != (SELECT COUNT(*) FROM proposals p WHERE p.job_id = j.id)",
            )
            .fetch_all(&db.pool)
            .await?;
            if rows.is_empty() {
                println!("All proposal counters are consistent");
            }
            for r in rows.iter() {
                let id: String = r.try_get("id").unwrap_or_default();
                let stored: i64 = r.try_get("proposal_count").unwrap_or(0);
                let actual: i64 = r.try_get("actual").unwrap_or(0);
                println!("MISMATCH job={} stored={} actual={}", id, stored, actual);
            }
        }
        Commands::Suspensions => {
            let rows = sqlx::query(
                "SELECT id, user_id, admin_id, reason, suspended_until FROM suspensions WHERE is_active = 1 ORDER BY created_at DESC",
            )
            .fetch_all(&db.pool)
            .await?;
            for r in rows.iter() {
                let id: String = r.try_get("id").unwrap_or_default();
                let user_id: String = r.try_get("user_id").unwrap_or_default();
                let admin_id: String = r.try_get("admin_id").unwrap_or_default();
                let reason: String = r.try_get("reason").unwrap_or_default();
                let until: Option<i64> = r.try_get("suspended_until").unwrap_or(None);
                let until = until.map(|u| u.to_string()).unwrap_or_else(|| "indefinite".to_string());
                println!("id={} user={} by={} until={} reason={}", id, user_id, admin_id, until, reason);
            }
        }
        Commands::Stats { admin_id } => {
            let admin = Actor::new(admin_id, Role::Admin);
            let stats = moderation::recompute_stats(db.clone(), &admin).await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }

    Ok(())
}
