use crate::common::error::{MarketError, MarketResult};
use crate::common::models::{Actor, BudgetType, Contract, ContractAction, ContractStatus, JobStatus, Proposal, ProposalStatus};
use crate::server::database::{self, Database};
use log::info;
use sqlx::SqliteConnection;
use std::sync::Arc;

/// Create the pending contract for an accepted proposal.
///
/// Runs on the caller's connection so it joins the acceptance transaction.
/// A second call for the same proposal fails with `Conflict`.
pub async fn form_contract(conn: &mut SqliteConnection, proposal: &Proposal) -> MarketResult<Contract> {
    if proposal.status != ProposalStatus::Accepted {
        return Err(MarketError::State(format!("proposal {} is {}, not accepted", proposal.id, proposal.status)));
    }
    let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM contracts WHERE proposal_id = ?")
        .bind(&proposal.id)
        .fetch_one(&mut *conn)
        .await?;
    if existing > 0 {
        return Err(MarketError::Conflict(format!("proposal {} already has a contract", proposal.id)));
    }
    let job = database::require_job(conn, &proposal.job_id).await?;

    let contract_id = database::new_id();
    let now = database::now_millis();
    sqlx::query(
        "INSERT INTO contracts (id, job_id, freelancer_id, client_id, proposal_id, status, total_earnings, hours_worked, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, 0, 0, ?, ?)",
    )
    .bind(&contract_id)
    .bind(&job.id)
    .bind(&proposal.freelancer_id)
    .bind(&job.client_id)
    .bind(&proposal.id)
    .bind(ContractStatus::Pending.as_str())
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    info!("[CONTRACTS] Contract {} formed from proposal {}", contract_id, proposal.id);
    database::require_contract(conn, &contract_id).await
}

fn authorize(contract: &Contract, actor: &Actor, action: ContractAction) -> MarketResult<()> {
    let allowed = match action {
        ContractAction::Approve | ContractAction::Complete => contract.client_id == actor.id,
        ContractAction::Cancel => contract.is_party(&actor.id),
    };
    if allowed {
        Ok(())
    } else {
        Err(MarketError::Role(format!("not allowed to {} contract {}", action, contract.id)))
    }
}

/// Move a contract along pending -> active -> completed, or cancel it.
///
/// Completing also completes the job; cancelling cancels it. A fixed-price
/// contract books the agreed rate as its earnings on completion.
pub async fn advance_contract(
    db: Arc<Database>,
    actor: &Actor,
    contract_id: &str,
    action: ContractAction,
) -> MarketResult<Contract> {
    let mut tx = db.begin_write().await?;
    let contract = database::require_contract(&mut tx, contract_id).await?;
    authorize(&contract, actor, action)?;
    let next = contract.status.apply(action).ok_or_else(|| {
        MarketError::State(format!("cannot {} a {} contract", action, contract.status))
    })?;

    let now = database::now_millis();
    let mut earnings = contract.total_earnings;
    if next == ContractStatus::Completed {
        let job = database::require_job(&mut tx, &contract.job_id).await?;
        if job.budget_type == BudgetType::Fixed {
            let proposal = database::require_proposal(&mut tx, &contract.proposal_id).await?;
            earnings = proposal.proposed_rate;
        }
    }

    let res = sqlx::query("UPDATE contracts SET status = ?, total_earnings = ?, updated_at = ? WHERE id = ? AND status = ?")
        .bind(next.as_str())
        .bind(earnings)
        .bind(now)
        .bind(contract_id)
        .bind(contract.status.as_str())
        .execute(&mut *tx)
        .await?;
    if res.rows_affected() != 1 {
        return Err(MarketError::State(format!("contract {} changed concurrently", contract_id)));
    }

    match next {
        ContractStatus::Completed => {
            sqlx::query("UPDATE jobs SET status = ?, updated_at = ? WHERE id = ? AND status = ?")
                .bind(JobStatus::Completed.as_str())
                .bind(now)
                .bind(&contract.job_id)
                .bind(JobStatus::InProgress.as_str())
                .execute(&mut *tx)
                .await?;
        }
        ContractStatus::Cancelled => {
            sqlx::query("UPDATE jobs SET status = ?, updated_at = ? WHERE id = ? AND status IN ('open', 'in_progress')")
                .bind(JobStatus::Cancelled.as_str())
                .bind(now)
                .bind(&contract.job_id)
                .execute(&mut *tx)
                .await?;
        }
        _ => {}
    }

    let updated = database::require_contract(&mut tx, contract_id).await?;
    tx.commit().await?;

    info!("[CONTRACTS] Contract {} {} -> {} by {}", contract_id, contract.status, updated.status, actor.id);
    Ok(updated)
}

/// Freelancer books hours on an active contract; hourly contracts accrue earnings at the proposed rate.
pub async fn log_hours(db: Arc<Database>, actor: &Actor, contract_id: &str, hours: f64) -> MarketResult<Contract> {
    if !hours.is_finite() || hours <= 0.0 {
        return Err(MarketError::Validation("hours must be greater than zero".to_string()));
    }
    let mut tx = db.begin_write().await?;
    let contract = database::require_contract(&mut tx, contract_id).await?;
    if contract.freelancer_id != actor.id {
        return Err(MarketError::Role("only the contracted freelancer can log hours".to_string()));
    }
    if contract.status != ContractStatus::Active {
        return Err(MarketError::State(format!("contract {} is {}, not active", contract_id, contract.status)));
    }

    let job = database::require_job(&mut tx, &contract.job_id).await?;
    let earned = match job.budget_type {
        BudgetType::Hourly => {
            let proposal = database::require_proposal(&mut tx, &contract.proposal_id).await?;
            hours * proposal.proposed_rate
        }
        BudgetType::Fixed => 0.0,
    };

    sqlx::query(
        "UPDATE contracts SET hours_worked = hours_worked + ?, total_earnings = total_earnings + ?, updated_at = ? WHERE id = ?",
    )
    .bind(hours)
    .bind(earned)
    .bind(database::now_millis())
    .bind(contract_id)
    .execute(&mut *tx)
    .await?;
    let updated = database::require_contract(&mut tx, contract_id).await?;
    tx.commit().await?;

    info!("[CONTRACTS] {} hour(s) logged on contract {}", hours, contract_id);
    Ok(updated)
}

pub async fn get_contract(db: Arc<Database>, actor: &Actor, contract_id: &str) -> MarketResult<Contract> {
    let mut conn = db.pool.acquire().await?;
    let contract = database::require_contract(&mut conn, contract_id).await?;
    if !contract.is_party(&actor.id) && !actor.is_admin() {
        return Err(MarketError::Role(format!("not a party to contract {}", contract_id)));
    }
    Ok(contract)
}

/// Contracts where the actor is client or freelancer, newest first.
pub async fn list_contracts(db: Arc<Database>, actor: &Actor) -> MarketResult<Vec<Contract>> {
    let rows = sqlx::query(
        "SELECT * FROM contracts WHERE client_id = ? OR freelancer_id = ? ORDER BY created_at DESC, rowid DESC",
    )
    .bind(&actor.id)
    .bind(&actor.id)
    .fetch_all(&db.pool)
    .await?;
    rows.iter().map(database::contract_from_row).collect()
}
