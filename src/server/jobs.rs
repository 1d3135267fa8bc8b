use crate::common::error::{MarketError, MarketResult};
use crate::common::models::{
    Actor, Decision, Job, JobDraft, JobStatus, Proposal, ProposalDecision, ProposalDraft, ProposalStatus, Role,
};
use crate::server::database::{self, Database};
use crate::server::{contracts, users};
use log::{info, warn};
use std::sync::Arc;

pub async fn post_job(db: Arc<Database>, actor: &Actor, draft: JobDraft) -> MarketResult<Job> {
    actor.require_role(Role::Client)?;
    draft.validate()?;

    let job_id = database::new_id();
    let now = database::now_millis();
    let skills: Vec<String> = draft.skills.iter().map(|s| s.trim().to_string()).collect();
    let category = draft.category.as_deref().unwrap_or_default().trim().to_string();

    let mut tx = db.begin_write().await?;
    users::require_active_account(&mut tx, actor, Some(Role::Client)).await?;

    sqlx::query(
        "INSERT INTO jobs (id, title, description, client_id, category, budget_type, budget_min, budget_max, \
         hourly_rate, experience_level, skills, status, proposal_count, remote, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?, ?)",
    )
    .bind(&job_id)
    .bind(draft.title.trim())
    .bind(draft.description.trim())
    .bind(&actor.id)
    .bind(&category)
    .bind(draft.budget_type.as_str())
    .bind(draft.budget_min)
    .bind(draft.budget_max)
    .bind(draft.hourly_rate)
    .bind(draft.experience_level.as_str())
    .bind(database::skills_to_json(&skills))
    .bind(JobStatus::Open.as_str())
    .bind(draft.remote)
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await?;
    let job = database::require_job(&mut tx, &job_id).await?;
    tx.commit().await?;

    info!("[JOBS] Job {} posted by {} ({})", job.id, actor.id, job.budget_type);
    Ok(job)
}

pub async fn get_job(db: Arc<Database>, job_id: &str) -> MarketResult<Job> {
    let mut conn = db.pool.acquire().await?;
    database::require_job(&mut conn, job_id).await
}

/// Open jobs, newest first.
pub async fn list_open_jobs(db: Arc<Database>) -> MarketResult<Vec<Job>> {
    let rows = sqlx::query("SELECT * FROM jobs WHERE status = ? ORDER BY created_at DESC, rowid DESC")
        .bind(JobStatus::Open.as_str())
        .fetch_all(&db.pool)
        .await?;
    rows.iter().map(database::job_from_row).collect()
}

/// Proposals on a job, oldest first. Visible to the job owner and admins.
pub async fn list_proposals(db: Arc<Database>, actor: &Actor, job_id: &str) -> MarketResult<Vec<Proposal>> {
    let mut conn = db.pool.acquire().await?;
    let job = database::require_job(&mut conn, job_id).await?;
    if job.client_id != actor.id && !actor.is_admin() {
        return Err(MarketError::Role("only the job owner can list its proposals".to_string()));
    }
    let rows = sqlx::query("SELECT * FROM proposals WHERE job_id = ? ORDER BY created_at ASC, rowid ASC")
        .bind(job_id)
        .fetch_all(&mut *conn)
        .await?;
    rows.iter().map(database::proposal_from_row).collect()
}

/// Insert the proposal and bump the job's counter in one transaction.
pub async fn submit_proposal(db: Arc<Database>, actor: &Actor, job_id: &str, draft: ProposalDraft) -> MarketResult<Proposal> {
    actor.require_role(Role::Freelancer)?;
    draft.validate()?;

    let mut tx = db.begin_write().await?;
    users::require_active_account(&mut tx, actor, Some(Role::Freelancer)).await?;
    let job = database::require_job(&mut tx, job_id).await?;
    if job.status != JobStatus::Open {
        return Err(MarketError::State(format!("job {} is {}, not open", job_id, job.status)));
    }

    let earlier = sqlx::query("SELECT * FROM proposals WHERE job_id = ? AND freelancer_id = ?")
        .bind(job_id)
        .bind(&actor.id)
        .fetch_all(&mut *tx)
        .await?;
    let earlier: Vec<Proposal> = earlier.iter().map(database::proposal_from_row).collect::<MarketResult<_>>()?;
    if earlier.iter().any(|p| p.status.is_live()) {
        return Err(MarketError::Conflict(format!(
            "freelancer {} already has an active proposal on job {}",
            actor.id, job_id
        )));
    }

    let proposal_id = database::new_id();
    let now = database::now_millis();
    sqlx::query(
        "INSERT INTO proposals (id, job_id, freelancer_id, cover_letter, proposed_rate, timeline, status, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&proposal_id)
    .bind(job_id)
    .bind(&actor.id)
    .bind(draft.cover_letter.trim())
    .bind(draft.proposed_rate)
    .bind(draft.timeline.trim())
    .bind(ProposalStatus::Submitted.as_str())
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    let bumped = sqlx::query(
        "UPDATE jobs SET proposal_count = proposal_count + 1, updated_at = ? WHERE id = ? AND status = ?",
    )
    .bind(now)
    .bind(job_id)
    .bind(JobStatus::Open.as_str())
    .execute(&mut *tx)
    .await?;
    if bumped.rows_affected() != 1 {
        return Err(MarketError::State(format!("job {} closed while submitting", job_id)));
    }

    let proposal = database::require_proposal(&mut tx, &proposal_id).await?;
    tx.commit().await?;

    info!("[JOBS] Proposal {} submitted on job {} by {}", proposal.id, job_id, actor.id);
    Ok(proposal)
}

/// Accept or reject a submitted proposal.
///
/// Accepting moves the job to `in_progress` and forms the contract inside the
/// same transaction. The job must still be open when the transaction runs, so
/// of two racing acceptances on one job only the first commits; the other
/// gets `State`. Sibling proposals are left as they are.
pub async fn decide_proposal(
    db: Arc<Database>,
    actor: &Actor,
    proposal_id: &str,
    decision: Decision,
) -> MarketResult<ProposalDecision> {
    let mut tx = db.begin_write().await?;
    let proposal = database::require_proposal(&mut tx, proposal_id).await?;
    let job = database::require_job(&mut tx, &proposal.job_id).await?;
    if job.client_id != actor.id {
        return Err(MarketError::Role("only the job owner can decide on proposals".to_string()));
    }
    if proposal.status != ProposalStatus::Submitted {
        return Err(MarketError::State(format!("proposal {} is already {}", proposal_id, proposal.status)));
    }

    let now = database::now_millis();
    let decision_result = match decision {
        Decision::Reject => {
            mark_proposal(&mut tx, proposal_id, ProposalStatus::Rejected, now).await?;
            let proposal = database::require_proposal(&mut tx, proposal_id).await?;
            ProposalDecision { proposal, contract: None }
        }
        Decision::Accept => {
            if job.status != JobStatus::Open {
                return Err(MarketError::State(format!("job {} is {}, not open", job.id, job.status)));
            }
            let closed = sqlx::query("UPDATE jobs SET status = ?, updated_at = ? WHERE id = ? AND status = ?")
                .bind(JobStatus::InProgress.as_str())
                .bind(now)
                .bind(&job.id)
                .bind(JobStatus::Open.as_str())
                .execute(&mut *tx)
                .await?;
            if closed.rows_affected() != 1 {
                warn!("[JOBS] Lost acceptance race on job {}", job.id);
                return Err(MarketError::State(format!("job {} is no longer open", job.id)));
            }
            mark_proposal(&mut tx, proposal_id, ProposalStatus::Accepted, now).await?;
            let proposal = database::require_proposal(&mut tx, proposal_id).await?;
            let contract = contracts::form_contract(&mut tx, &proposal).await?;
            ProposalDecision { proposal, contract: Some(contract) }
        }
    };
    tx.commit().await?;

    info!("[JOBS] Proposal {} {} by {}", proposal_id, decision_result.proposal.status, actor.id);
    Ok(decision_result)
}

async fn mark_proposal(
    conn: &mut sqlx::SqliteConnection,
    proposal_id: &str,
    status: ProposalStatus,
    now: i64,
) -> MarketResult<()> {
    let res = sqlx::query("UPDATE proposals SET status = ?, updated_at = ? WHERE id = ? AND status = ?")
        .bind(status.as_str())
        .bind(now)
        .bind(proposal_id)
        .bind(ProposalStatus::Submitted.as_str())
        .execute(&mut *conn)
        .await?;
    if res.rows_affected() != 1 {
        return Err(MarketError::State(format!("proposal {} changed concurrently", proposal_id)));
    }
    Ok(())
}

/// The freelancer pulls back a proposal that has not been decided yet.
pub async fn withdraw_proposal(db: Arc<Database>, actor: &Actor, proposal_id: &str) -> MarketResult<()> {
    let mut tx = db.begin_write().await?;
    let proposal = database::require_proposal(&mut tx, proposal_id).await?;
    if proposal.freelancer_id != actor.id {
        return Err(MarketError::Role("only the author can withdraw a proposal".to_string()));
    }
    if proposal.status != ProposalStatus::Submitted {
        return Err(MarketError::State(format!("proposal {} is already {}", proposal_id, proposal.status)));
    }

    sqlx::query("DELETE FROM proposals WHERE id = ?")
        .bind(proposal_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("UPDATE jobs SET proposal_count = proposal_count - 1, updated_at = ? WHERE id = ?")
        .bind(database::now_millis())
        .bind(&proposal.job_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    info!("[JOBS] Proposal {} withdrawn from job {}", proposal_id, proposal.job_id);
    Ok(())
}

/// Cancel a job from `open` or `in_progress`; a running contract on it is cancelled too.
pub async fn cancel_job(db: Arc<Database>, actor: &Actor, job_id: &str) -> MarketResult<Job> {
    let mut tx = db.begin_write().await?;
    let job = database::require_job(&mut tx, job_id).await?;
    if job.client_id != actor.id && !actor.is_admin() {
        return Err(MarketError::Role("only the job owner can cancel it".to_string()));
    }
    if !job.status.can_transition_to(JobStatus::Cancelled) {
        return Err(MarketError::State(format!("job {} is already {}", job_id, job.status)));
    }

    let now = database::now_millis();
    sqlx::query("UPDATE jobs SET status = ?, updated_at = ? WHERE id = ?")
        .bind(JobStatus::Cancelled.as_str())
        .bind(now)
        .bind(job_id)
        .execute(&mut *tx)
        .await?;
    let contracts = sqlx::query(
        "UPDATE contracts SET status = 'cancelled', updated_at = ? WHERE job_id = ? AND status IN ('pending', 'active')",
    )
    .bind(now)
    .bind(job_id)
    .execute(&mut *tx)
    .await?;
    let job = database::require_job(&mut tx, job_id).await?;
    tx.commit().await?;

    info!(
        "[JOBS] Job {} cancelled by {} ({} contract(s) cancelled)",
        job_id,
        actor.id,
        contracts.rows_affected()
    );
    Ok(job)
}
