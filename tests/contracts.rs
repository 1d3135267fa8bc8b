mod common;

use common::{fixed_job, hourly_job, proposal, register, setup};
use gigboard::common::models::{Actor, Contract, ContractAction, ContractStatus, Decision, JobDraft, JobStatus, Role};
use gigboard::server::database::{self, Database};
use gigboard::server::{contracts, jobs};
use gigboard::MarketError;
use std::sync::Arc;

async fn hired(db: &Arc<Database>, draft: JobDraft, rate: f64) -> (Actor, Actor, Contract) {
    let client = register(db, "clara", Role::Client).await;
    let freelancer = register(db, "fred", Role::Freelancer).await;
    let job = jobs::post_job(db.clone(), &client, draft).await.unwrap();
    let p = jobs::submit_proposal(db.clone(), &freelancer, &job.id, proposal(rate)).await.unwrap();
    let contract = jobs::decide_proposal(db.clone(), &client, &p.id, Decision::Accept)
        .await
        .unwrap()
        .contract
        .unwrap();
    (client, freelancer, contract)
}

#[tokio::test]
async fn one_contract_per_accepted_proposal() {
    let db = setup().await;
    let (_, _, contract) = hired(&db, fixed_job(100.0, 200.0), 150.0).await;

    let mut conn = db.pool.acquire().await.unwrap();
    let accepted = database::require_proposal(&mut conn, &contract.proposal_id).await.unwrap();
    let err = contracts::form_contract(&mut conn, &accepted).await.unwrap_err();
    assert!(matches!(err, MarketError::Conflict(_)), "got {:?}", err);
}

#[tokio::test]
async fn undecided_proposal_cannot_form_a_contract() {
    let db = setup().await;
    let client = register(&db, "clara", Role::Client).await;
    let freelancer = register(&db, "fred", Role::Freelancer).await;
    let job = jobs::post_job(db.clone(), &client, fixed_job(100.0, 200.0)).await.unwrap();
    let p = jobs::submit_proposal(db.clone(), &freelancer, &job.id, proposal(150.0)).await.unwrap();

    let mut conn = db.pool.acquire().await.unwrap();
    let err = contracts::form_contract(&mut conn, &p).await.unwrap_err();
    assert!(matches!(err, MarketError::State(_)));
}

#[tokio::test]
async fn fixed_contract_books_agreed_rate_on_completion() {
    let db = setup().await;
    let (client, freelancer, contract) = hired(&db, fixed_job(100.0, 200.0), 150.0).await;

    // cannot complete before approval
    let err = contracts::advance_contract(db.clone(), &client, &contract.id, ContractAction::Complete)
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::State(_)));

    let err = contracts::advance_contract(db.clone(), &freelancer, &contract.id, ContractAction::Approve)
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::Role(_)));

    contracts::advance_contract(db.clone(), &client, &contract.id, ContractAction::Approve).await.unwrap();
    let done = contracts::advance_contract(db.clone(), &client, &contract.id, ContractAction::Complete)
        .await
        .unwrap();
    assert_eq!(done.status, ContractStatus::Completed);
    assert_eq!(done.total_earnings, 150.0);

    let job = jobs::get_job(db.clone(), &done.job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);

    // terminal
    let err = contracts::advance_contract(db.clone(), &freelancer, &contract.id, ContractAction::Cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::State(_)));
}

#[tokio::test]
async fn hourly_contract_accrues_logged_hours() {
    let db = setup().await;
    let (client, freelancer, contract) = hired(&db, hourly_job(50.0), 40.0).await;

    let err = contracts::log_hours(db.clone(), &freelancer, &contract.id, 2.0).await.unwrap_err();
    assert!(matches!(err, MarketError::State(_)), "pending contracts take no hours");

    contracts::advance_contract(db.clone(), &client, &contract.id, ContractAction::Approve).await.unwrap();

    let err = contracts::log_hours(db.clone(), &client, &contract.id, 2.0).await.unwrap_err();
    assert!(matches!(err, MarketError::Role(_)));
    let err = contracts::log_hours(db.clone(), &freelancer, &contract.id, 0.0).await.unwrap_err();
    assert!(matches!(err, MarketError::Validation(_)));

    contracts::log_hours(db.clone(), &freelancer, &contract.id, 2.0).await.unwrap();
    let c = contracts::log_hours(db.clone(), &freelancer, &contract.id, 1.5).await.unwrap();
    assert_eq!(c.hours_worked, 3.5);
    assert_eq!(c.total_earnings, 140.0);

    let done = contracts::advance_contract(db.clone(), &client, &contract.id, ContractAction::Complete)
        .await
        .unwrap();
    assert_eq!(done.total_earnings, 140.0);
}

#[tokio::test]
async fn either_party_may_cancel() {
    let db = setup().await;
    let (client, freelancer, contract) = hired(&db, fixed_job(100.0, 200.0), 150.0).await;
    let outsider = register(&db, "olga", Role::Freelancer).await;

    contracts::advance_contract(db.clone(), &client, &contract.id, ContractAction::Approve).await.unwrap();

    let err = contracts::advance_contract(db.clone(), &outsider, &contract.id, ContractAction::Cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::Role(_)));

    let cancelled = contracts::advance_contract(db.clone(), &freelancer, &contract.id, ContractAction::Cancel)
        .await
        .unwrap();
    assert_eq!(cancelled.status, ContractStatus::Cancelled);
    assert_eq!(cancelled.total_earnings, 0.0);

    let job = jobs::get_job(db.clone(), &contract.job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
}

#[tokio::test]
async fn contracts_are_visible_to_parties_only() {
    let db = setup().await;
    let (client, freelancer, contract) = hired(&db, fixed_job(100.0, 200.0), 150.0).await;
    let outsider = register(&db, "olga", Role::Freelancer).await;
    let admin = register(&db, "ada", Role::Admin).await;

    assert_eq!(contracts::get_contract(db.clone(), &client, &contract.id).await.unwrap(), contract);
    assert!(contracts::get_contract(db.clone(), &admin, &contract.id).await.is_ok());
    let err = contracts::get_contract(db.clone(), &outsider, &contract.id).await.unwrap_err();
    assert!(matches!(err, MarketError::Role(_)));

    assert_eq!(contracts::list_contracts(db.clone(), &freelancer).await.unwrap().len(), 1);
    assert!(contracts::list_contracts(db.clone(), &outsider).await.unwrap().is_empty());

    let err = contracts::get_contract(db.clone(), &client, "missing").await.unwrap_err();
    assert!(matches!(err, MarketError::NotFound(_)));
}
