mod common;

use chrono::{Duration, Utc};
use common::{fixed_job, proposal, register, setup};
use gigboard::common::models::{ContractAction, ContractStatus, Decision, JobStatus, ProposalStatus, Role};
use gigboard::server::{contracts, jobs, moderation, users};
use gigboard::MarketError;

#[tokio::test]
async fn expired_suspension_does_not_block() {
    let db = setup().await;
    let admin = register(&db, "ada", Role::Admin).await;
    let client = register(&db, "clara", Role::Client).await;

    let past = Utc::now() - Duration::hours(1);
    let s = moderation::suspend_user(db.clone(), &admin, &client.id, "cool-off", Some(past)).await.unwrap();
    assert!(s.is_active);

    let view = users::get_user(db.clone(), &client.id).await.unwrap();
    assert!(!view.suspended);
    jobs::post_job(db.clone(), &client, fixed_job(100.0, 200.0)).await.unwrap();
}

#[tokio::test]
async fn suspend_and_reinstate() {
    let db = setup().await;
    let admin = register(&db, "ada", Role::Admin).await;
    let client = register(&db, "clara", Role::Client).await;
    let freelancer = register(&db, "fred", Role::Freelancer).await;
    let job = jobs::post_job(db.clone(), &client, fixed_job(100.0, 200.0)).await.unwrap();

    let future = Utc::now() + Duration::days(7);
    moderation::suspend_user(db.clone(), &admin, &freelancer.id, "fake reviews", Some(future)).await.unwrap();
    assert!(users::get_user(db.clone(), &freelancer.id).await.unwrap().suspended);

    let err = jobs::submit_proposal(db.clone(), &freelancer, &job.id, proposal(150.0)).await.unwrap_err();
    assert!(matches!(err, MarketError::Role(_)));

    let lifted = moderation::reinstate_user(db.clone(), &admin, &freelancer.id).await.unwrap();
    assert!(!lifted.expect("an active suspension").is_active);
    assert!(!users::get_user(db.clone(), &freelancer.id).await.unwrap().suspended);
    jobs::submit_proposal(db.clone(), &freelancer, &job.id, proposal(150.0)).await.unwrap();

    // nothing left to lift
    assert!(moderation::reinstate_user(db.clone(), &admin, &freelancer.id).await.unwrap().is_none());

    let log = moderation::list_suspensions(db.clone(), &admin, &freelancer.id).await.unwrap();
    assert_eq!(log.len(), 1);
    assert!(!log[0].is_active);
}

#[tokio::test]
async fn suspension_guards() {
    let db = setup().await;
    let admin = register(&db, "ada", Role::Admin).await;
    let client = register(&db, "clara", Role::Client).await;

    let err = moderation::suspend_user(db.clone(), &client, &admin.id, "payback", None).await.unwrap_err();
    assert!(matches!(err, MarketError::Role(_)));
    let err = moderation::suspend_user(db.clone(), &admin, "ghost", "spam", None).await.unwrap_err();
    assert!(matches!(err, MarketError::NotFound(_)));
    let err = moderation::suspend_user(db.clone(), &admin, &client.id, "  ", None).await.unwrap_err();
    assert!(matches!(err, MarketError::Validation(_)));
    let err = moderation::suspend_user(db.clone(), &admin, &admin.id, "oops", None).await.unwrap_err();
    assert!(matches!(err, MarketError::Validation(_)));
    let err = moderation::list_suspensions(db.clone(), &client, &client.id).await.unwrap_err();
    assert!(matches!(err, MarketError::Role(_)));
}

#[tokio::test]
async fn role_changes() {
    let db = setup().await;
    let admin = register(&db, "ada", Role::Admin).await;
    let client = register(&db, "clara", Role::Client).await;

    let err = moderation::change_role(db.clone(), &admin, &client.id, "superuser").await.unwrap_err();
    assert!(matches!(err, MarketError::Validation(_)));
    let err = moderation::change_role(db.clone(), &client, &client.id, "admin").await.unwrap_err();
    assert!(matches!(err, MarketError::Role(_)));
    let err = moderation::change_role(db.clone(), &admin, &admin.id, "client").await.unwrap_err();
    assert!(matches!(err, MarketError::Validation(_)));

    let user = moderation::change_role(db.clone(), &admin, &client.id, "freelancer").await.unwrap();
    assert_eq!(user.role, Role::Freelancer);
    assert_eq!(users::get_user(db.clone(), &client.id).await.unwrap().user.role, Role::Freelancer);

    // a stale actor claiming the old role no longer gets to post
    let err = jobs::post_job(db.clone(), &client, fixed_job(100.0, 200.0)).await.unwrap_err();
    assert!(matches!(err, MarketError::Role(_)));
}

#[tokio::test]
async fn delete_requires_cascade_when_work_is_live() {
    let db = setup().await;
    let admin = register(&db, "ada", Role::Admin).await;
    let client = register(&db, "clara", Role::Client).await;
    let freelancer = register(&db, "fred", Role::Freelancer).await;
    let job = jobs::post_job(db.clone(), &client, fixed_job(100.0, 200.0)).await.unwrap();
    let p = jobs::submit_proposal(db.clone(), &freelancer, &job.id, proposal(150.0)).await.unwrap();

    let err = moderation::delete_user(db.clone(), &admin, &freelancer.id, false).await.unwrap_err();
    assert!(matches!(err, MarketError::Conflict(_)), "got {:?}", err);
    assert!(users::get_user(db.clone(), &freelancer.id).await.is_ok());

    let deleted = moderation::delete_user(db.clone(), &admin, &freelancer.id, true).await.unwrap();
    assert!(deleted.deleted_at.is_some());
    assert_eq!(deleted.name, "Deleted user");
    assert_ne!(deleted.email, "fred@example.com");

    let err = users::get_user(db.clone(), &freelancer.id).await.unwrap_err();
    assert!(matches!(err, MarketError::NotFound(_)));

    let listed = jobs::list_proposals(db.clone(), &client, &job.id).await.unwrap();
    let p = listed.iter().find(|x| x.id == p.id).unwrap();
    assert_eq!(p.status, ProposalStatus::Rejected);

    // the email is free again
    register(&db, "fred", Role::Freelancer).await;
}

#[tokio::test]
async fn cascading_client_delete_cancels_running_work() {
    let db = setup().await;
    let admin = register(&db, "ada", Role::Admin).await;
    let client = register(&db, "clara", Role::Client).await;
    let freelancer = register(&db, "fred", Role::Freelancer).await;
    let job = jobs::post_job(db.clone(), &client, fixed_job(100.0, 200.0)).await.unwrap();
    let p = jobs::submit_proposal(db.clone(), &freelancer, &job.id, proposal(150.0)).await.unwrap();
    let contract = jobs::decide_proposal(db.clone(), &client, &p.id, Decision::Accept)
        .await
        .unwrap()
        .contract
        .unwrap();
    let other_job = jobs::post_job(db.clone(), &client, fixed_job(300.0, 400.0)).await.unwrap();

    let err = moderation::delete_user(db.clone(), &admin, &client.id, false).await.unwrap_err();
    assert!(matches!(err, MarketError::Conflict(_)));

    moderation::delete_user(db.clone(), &admin, &client.id, true).await.unwrap();

    let contract = contracts::get_contract(db.clone(), &freelancer, &contract.id).await.unwrap();
    assert_eq!(contract.status, ContractStatus::Cancelled);
    assert_eq!(jobs::get_job(db.clone(), &job.id).await.unwrap().status, JobStatus::Cancelled);
    assert_eq!(jobs::get_job(db.clone(), &other_job.id).await.unwrap().status, JobStatus::Cancelled);
}

#[tokio::test]
async fn delete_guards() {
    let db = setup().await;
    let admin = register(&db, "ada", Role::Admin).await;
    let client = register(&db, "clara", Role::Client).await;

    let err = moderation::delete_user(db.clone(), &client, &admin.id, true).await.unwrap_err();
    assert!(matches!(err, MarketError::Role(_)));
    let err = moderation::delete_user(db.clone(), &admin, &admin.id, true).await.unwrap_err();
    assert!(matches!(err, MarketError::Validation(_)));
    let err = moderation::delete_user(db.clone(), &admin, "ghost", false).await.unwrap_err();
    assert!(matches!(err, MarketError::NotFound(_)));

    // an idle account goes without cascade, closing its suspension
    moderation::suspend_user(db.clone(), &admin, &client.id, "chargebacks", None).await.unwrap();
    moderation::delete_user(db.clone(), &admin, &client.id, false).await.unwrap();
    let log = moderation::list_suspensions(db.clone(), &admin, &client.id).await.unwrap();
    assert!(log.iter().all(|s| !s.is_active));
    let err = moderation::delete_user(db.clone(), &admin, &client.id, false).await.unwrap_err();
    assert!(matches!(err, MarketError::NotFound(_)));
}

#[tokio::test]
async fn stats_snapshot() {
    let db = setup().await;
    let admin = register(&db, "ada", Role::Admin).await;
    let client = register(&db, "clara", Role::Client).await;
    let f1 = register(&db, "fred", Role::Freelancer).await;
    let f2 = register(&db, "fiona", Role::Freelancer).await;

    let job = jobs::post_job(db.clone(), &client, fixed_job(100.0, 200.0)).await.unwrap();
    let p1 = jobs::submit_proposal(db.clone(), &f1, &job.id, proposal(150.0)).await.unwrap();
    jobs::submit_proposal(db.clone(), &f2, &job.id, proposal(180.0)).await.unwrap();
    jobs::post_job(db.clone(), &client, fixed_job(500.0, 900.0)).await.unwrap();

    let contract = jobs::decide_proposal(db.clone(), &client, &p1.id, Decision::Accept)
        .await
        .unwrap()
        .contract
        .unwrap();
    contracts::advance_contract(db.clone(), &client, &contract.id, ContractAction::Approve)
        .await
        .unwrap();

    let stats = moderation::recompute_stats(db.clone(), &admin).await.unwrap();
    assert_eq!(stats.total_users, 4);
    assert_eq!(stats.total_jobs, 2);
    assert_eq!(stats.total_proposals, 2);
    assert_eq!(stats.total_contracts, 1);
    assert_eq!(stats.total_revenue, 0.0);

    contracts::advance_contract(db.clone(), &client, &contract.id, ContractAction::Complete)
        .await
        .unwrap();
    let idle = register(&db, "ivan", Role::Freelancer).await;
    moderation::delete_user(db.clone(), &admin, &idle.id, false).await.unwrap();

    let stats = moderation::recompute_stats(db.clone(), &admin).await.unwrap();
    assert_eq!(stats.total_users, 4);
    assert_eq!(stats.total_revenue, 150.0);
    assert_eq!(stats.id, moderation::STATS_ROW_ID);

    let err = moderation::recompute_stats(db.clone(), &client).await.unwrap_err();
    assert!(matches!(err, MarketError::Role(_)));
}

#[tokio::test]
async fn deleted_accounts_cannot_act() {
    let db = setup().await;
    let admin = register(&db, "ada", Role::Admin).await;
    let client = register(&db, "clara", Role::Client).await;
    let f1 = register(&db, "fred", Role::Freelancer).await;
    let job = jobs::post_job(db.clone(), &client, fixed_job(100.0, 200.0)).await.unwrap();

    moderation::delete_user(db.clone(), &admin, &f1.id, true).await.unwrap();
    let err = jobs::submit_proposal(db.clone(), &f1, &job.id, proposal(150.0)).await.unwrap_err();
    assert!(matches!(err, MarketError::NotFound(_)), "got {:?}", err);
    assert_eq!(jobs::get_job(db.clone(), &job.id).await.unwrap().proposal_count, 0);

    moderation::delete_user(db.clone(), &admin, &client.id, true).await.unwrap();
    let err = jobs::post_job(db.clone(), &client, fixed_job(100.0, 200.0)).await.unwrap_err();
    assert!(matches!(err, MarketError::NotFound(_)), "got {:?}", err);
}
