#![allow(dead_code)]

use gigboard::common::models::{Actor, BudgetType, ExperienceLevel, JobDraft, NewUser, ProposalDraft, Role};
use gigboard::server::database::Database;
use gigboard::server::users;
use std::sync::Arc;
use tempfile::TempDir;

pub async fn setup() -> Arc<Database> {
    Arc::new(Database::in_memory().await.expect("in-memory database"))
}

/// File-backed database with a real multi-connection pool. Keep the `TempDir`
/// alive for as long as the database is used.
pub async fn setup_file() -> (Arc<Database>, TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!("sqlite:{}", dir.path().join("market.db").display());
    let db = Database::connect(&url, 5).await.expect("file database");
    db.migrate().await.expect("migrate");
    (Arc::new(db), dir)
}

pub async fn register(db: &Arc<Database>, name: &str, role: Role) -> Actor {
    let user = users::register_user(
        db.clone(),
        NewUser {
            email: format!("{}@example.com", name),
            role,
            name: name.to_string(),
            bio: None,
            title: None,
            company: None,
            hourly_rate: None,
            skills: vec![],
            location: None,
        },
    )
    .await
    .expect("register user");
    Actor::new(user.id, user.role)
}

pub fn fixed_job(min: f64, max: f64) -> JobDraft {
    JobDraft {
        title: "Marketing site".to_string(),
        description: "Five page marketing site with CMS".to_string(),
        category: Some("web-development".to_string()),
        budget_type: BudgetType::Fixed,
        budget_min: Some(min),
        budget_max: Some(max),
        hourly_rate: None,
        experience_level: ExperienceLevel::Intermediate,
        skills: vec!["react".to_string(), "css".to_string()],
        remote: true,
    }
}

pub fn hourly_job(rate: f64) -> JobDraft {
    JobDraft {
        title: "Backend maintenance".to_string(),
        description: "Ongoing API maintenance".to_string(),
        category: Some("backend".to_string()),
        budget_type: BudgetType::Hourly,
        budget_min: None,
        budget_max: None,
        hourly_rate: Some(rate),
        experience_level: ExperienceLevel::Expert,
        skills: vec!["rust".to_string()],
        remote: false,
    }
}

pub fn proposal(rate: f64) -> ProposalDraft {
    ProposalDraft {
        cover_letter: "I have shipped a dozen of these.".to_string(),
        proposed_rate: rate,
        timeline: "2 weeks".to_string(),
    }
}

pub async fn proposal_rows(db: &Arc<Database>, job_id: &str) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM proposals WHERE job_id = ?")
        .bind(job_id)
        .fetch_one(&db.pool)
        .await
        .expect("count proposals")
}
