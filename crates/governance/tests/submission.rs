mod common;

use common::*;
use governance::batch::{BatchAction, BatchItem};
use governance::entity::{
    approval_tickets, batch_approval_tickets, domain_events, jobs, BatchStatus,
    DomainEventStatus, TicketStatus,
};
use governance::store;
use governance::GovernanceError;
use governance_trait::Actor;
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};

async fn count_rows(env: &TestEnv) -> (u64, u64, u64) {
    let conn = env.db.connection();
    (
        domain_events::Entity::find().count(conn).await.unwrap(),
        approval_tickets::Entity::find().count(conn).await.unwrap(),
        batch_approval_tickets::Entity::find().count(conn).await.unwrap(),
    )
}

#[tokio::test]
async fn test_delete_batch_submit_replay_and_cancel() {
    let env = setup().await;
    let alice = tester("alice");

    let mut req = delete_request(&["vm-1"]);
    req.request_id = Some("req-1".to_string());
    let submitted = env.engine.submit_batch(&alice, req.clone()).await.unwrap();
    assert_eq!(submitted.status, BatchStatus::PendingApproval);
    assert_eq!(
        submitted.status_url,
        format!("/api/v1/vms/batch/{}", submitted.batch_id)
    );
    assert_eq!(submitted.retry_after_seconds, 2);

    let children = store::list_children(env.db.connection(), &submitted.batch_id)
        .await
        .unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].status, TicketStatus::Pending);

    // Same request id returns the same batch without writing anything
    let rows_before = count_rows(&env).await;
    let replayed = env.engine.submit_batch(&alice, req).await.unwrap();
    assert_eq!(replayed.batch_id, submitted.batch_id);
    assert_eq!(replayed.status, BatchStatus::PendingApproval);
    assert_eq!(count_rows(&env).await, rows_before);
    assert_eq!(
        batch_approval_tickets::Entity::find()
            .filter(batch_approval_tickets::Column::RequestId.eq("req-1"))
            .count(env.db.connection())
            .await
            .unwrap(),
        1
    );

    let cancelled = env
        .engine
        .perform_action(&alice, &submitted.batch_id, BatchAction::Cancel)
        .await
        .unwrap();
    assert_eq!(cancelled.status, BatchStatus::Cancelled);
    assert_eq!(cancelled.affected_count, 1);
    assert_eq!(cancelled.affected_ticket_ids, vec![children[0].id.clone()]);

    let child = store::find_ticket(env.db.connection(), &children[0].id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(child.status, TicketStatus::Cancelled);
    let event = store::find_event(env.db.connection(), &child.event_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.status, DomainEventStatus::Cancelled);
}

#[tokio::test]
async fn test_request_id_is_scoped_to_actor_and_operation() {
    let env = setup().await;

    let mut req = delete_request(&["vm-1"]);
    req.request_id = Some("shared".to_string());
    let first = env.engine.submit_batch(&tester("alice"), req.clone()).await.unwrap();
    let other_user = env.engine.submit_batch(&tester("bob"), req).await.unwrap();
    assert_ne!(first.batch_id, other_user.batch_id);

    let mut power = request("POWER_STOP", vec![vm_item("vm-2")]);
    power.request_id = Some("shared".to_string());
    let other_op = env.engine.submit_batch(&tester("alice"), power).await.unwrap();
    assert_ne!(first.batch_id, other_op.batch_id);

    // Same batch type, different power operation
    let mut start = request("POWER_START", vec![vm_item("vm-3")]);
    start.request_id = Some("shared".to_string());
    let other_power = env.engine.submit_batch(&tester("alice"), start).await.unwrap();
    assert_ne!(other_op.batch_id, other_power.batch_id);

    let mut stop_again = request("POWER_STOP", vec![vm_item("vm-4")]);
    stop_again.request_id = Some("shared".to_string());
    let replayed = env
        .engine
        .submit_batch(&tester("alice"), stop_again)
        .await
        .unwrap();
    assert_eq!(replayed.batch_id, other_op.batch_id);
}

#[tokio::test]
async fn test_failed_child_insert_rolls_back_everything() {
    let env = setup().await;
    env.db
        .execute_raw(
            "CREATE TRIGGER fail_second_child BEFORE INSERT ON approval_tickets \
             WHEN NEW.parent_ticket_id IS NOT NULL \
             AND (SELECT COUNT(*) FROM approval_tickets \
                  WHERE parent_ticket_id = NEW.parent_ticket_id) >= 1 \
             BEGIN SELECT RAISE(ABORT, 'simulated storage failure'); END;",
        )
        .await
        .unwrap();

    let err = env
        .engine
        .submit_batch(&tester("alice"), delete_request(&["vm-1", "vm-2"]))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INTERNAL_ERROR");
    assert_eq!(err.public_message(), "internal error");
    assert_eq!(count_rows(&env).await, (0, 0, 0));
}

#[tokio::test]
async fn test_batch_size_and_operation_validation() {
    let env = setup().await;
    let alice = tester("alice");

    let err = env
        .engine
        .submit_batch(&alice, delete_request(&[]))
        .await
        .unwrap_err();
    assert!(matches!(err, GovernanceError::InvalidBatchSize { count: 0, max: 100 }));

    let items: Vec<BatchItem> = (0..101).map(|_| vm_item("vm-1")).collect();
    let err = env
        .engine
        .submit_batch(&alice, request("DELETE", items))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_BATCH_SIZE");

    let err = env
        .engine
        .submit_batch(&alice, request("MIGRATE", vec![vm_item("vm-1")]))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_BATCH_OPERATION");

    let err = env
        .engine
        .submit_batch(&Actor::new("", &[]), delete_request(&["vm-1"]))
        .await
        .unwrap_err();
    assert!(matches!(err, GovernanceError::Unauthorized));

    assert_eq!(count_rows(&env).await, (0, 0, 0));
}

#[tokio::test]
async fn test_item_validation() {
    let env = setup().await;
    let alice = tester("alice");

    let mut item = create_item(TEST_NAMESPACE);
    item.template_id = Some(0);
    let err = env
        .engine
        .submit_batch(&alice, request("CREATE", vec![create_item(TEST_NAMESPACE), item]))
        .await
        .unwrap_err();
    match err {
        GovernanceError::InvalidBatchItem { index, message } => {
            assert_eq!(index, 1);
            assert!(message.contains("template_id"));
        }
        other => panic!("unexpected error: {:?}", other),
    }

    let err = env
        .engine
        .submit_batch(&alice, delete_request(&["vm-1", "vm-missing"]))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        GovernanceError::VmNotFound { index: 1, ref vm_id } if vm_id == "vm-missing"
    ));

    let err = env
        .engine
        .submit_batch(&alice, delete_request(&["vm-prod"]))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "NAMESPACE_ENV_FORBIDDEN");
    assert_eq!(err.http_status(), 403);

    let err = env
        .engine
        .submit_batch(&alice, request("CREATE", vec![create_item("team-a-staging")]))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "NAMESPACE_ENV_FORBIDDEN");

    // No role bindings at all sees nothing
    let err = env
        .engine
        .submit_batch(&Actor::new("carol", &[]), delete_request(&["vm-1"]))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "NAMESPACE_ENV_FORBIDDEN");

    assert_eq!(count_rows(&env).await, (0, 0, 0));
}

#[tokio::test]
async fn test_create_batch_children_keep_item_order() {
    let env = setup().await;
    let mut first = create_item(TEST_NAMESPACE);
    first.name = Some("first".to_string());
    let mut second = create_item(TEST_NAMESPACE);
    second.name = Some("second".to_string());
    second.reason = Some("own reason".to_string());

    let submitted = env
        .engine
        .submit_batch(&tester("alice"), request("CREATE", vec![first, second]))
        .await
        .unwrap();
    let view = env
        .engine
        .load_batch_view(&tester("alice"), &submitted.batch_id)
        .await
        .unwrap();

    assert_eq!(view.operation, "CREATE");
    assert_eq!(view.child_count, 2);
    assert_eq!(view.pending_count, 2);
    let names: Vec<_> = view
        .children
        .iter()
        .map(|c| c.resource_name.clone().unwrap())
        .collect();
    assert_eq!(names, vec!["first".to_string(), "second".to_string()]);
    assert!(view.children.iter().all(|c| c.attempt_count == 0));

    let children = store::list_children(env.db.connection(), &submitted.batch_id)
        .await
        .unwrap();
    assert_eq!(children[0].reason.as_deref(), Some("maintenance"));
    assert_eq!(children[1].reason.as_deref(), Some("own reason"));
}

#[tokio::test]
async fn test_power_batch_enqueue_failure_fails_only_that_child() {
    let env = setup().await;
    env.jobs.fail_call(1);

    let mut req = request("POWER_RESTART", vec![vm_item("vm-1"), vm_item("vm-2")]);
    req.request_id = Some("power-1".to_string());
    let submitted = env
        .engine
        .submit_batch(&tester("alice"), req.clone())
        .await
        .unwrap();
    assert_eq!(submitted.status, BatchStatus::InProgress);
    assert_eq!(env.jobs.calls(), 2);

    let children = store::list_children(env.db.connection(), &submitted.batch_id)
        .await
        .unwrap();
    assert_eq!(children[0].status, TicketStatus::Executing);
    assert_eq!(children[1].status, TicketStatus::Failed);
    assert!(children[1]
        .reject_reason
        .as_deref()
        .unwrap()
        .starts_with("failed to enqueue vm_power job"));

    let queued = jobs::Entity::find()
        .all(env.db.connection())
        .await
        .unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].event_id, children[0].event_id);
    assert_eq!(queued[0].operation, "vm_power:restart");

    // Replaying a power batch reports its live status
    let replayed = env.engine.submit_batch(&tester("alice"), req).await.unwrap();
    assert_eq!(replayed.batch_id, submitted.batch_id);
    assert_eq!(replayed.status, BatchStatus::InProgress);
    assert_eq!(env.jobs.calls(), 2);
}

#[tokio::test]
async fn test_power_enqueue_continues_when_recording_a_failure_errors() {
    let env = setup().await;
    block_failed_ticket_updates(&env).await;
    env.jobs.fail_call(0);

    let submitted = env
        .engine
        .submit_batch(
            &tester("alice"),
            request(
                "POWER_STOP",
                vec![vm_item("vm-1"), vm_item("vm-2"), vm_item("vm-3")],
            ),
        )
        .await
        .unwrap();
    assert_eq!(submitted.status, BatchStatus::InProgress);
    assert_eq!(env.jobs.calls(), 3);

    let children = store::list_children(env.db.connection(), &submitted.batch_id)
        .await
        .unwrap();
    let queued = jobs::Entity::find()
        .all(env.db.connection())
        .await
        .unwrap();
    assert_eq!(queued.len(), 2);
    assert!(queued.iter().all(|j| j.event_id != children[0].event_id));
    assert_eq!(count_rows(&env).await, (4, 4, 1));
}
