//! Storage engine integration tests.
//!
//! These run against a live PostgreSQL pointed to by
//! `LABTASKER_TEST_DATABASE_URL` and are skipped when it is unset.

use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use labtasker_core::events::EventHub;
use labtasker_core::models::{Priority, TaskLsRequest, TaskStatus, WorkerStatus};
use labtasker_core::security::SecurityManager;
use labtasker_core::ApiError;
use labtasker_db::{FetchOptions, QueueRepository, TaskRepository, WorkerRepository, MIGRATOR};

struct Harness {
    queue_id: Uuid,
    queues: QueueRepository,
    tasks: TaskRepository,
    workers: WorkerRepository,
    pool: PgPool,
}

async fn harness() -> Option<Harness> {
    let url = std::env::var("LABTASKER_TEST_DATABASE_URL").ok()?;
    let pool = PgPool::connect(&url).await.expect("connect test database");
    MIGRATOR.run(&pool).await.expect("run migrations");

    // Low-cost bcrypt keeps test setup fast.
    let security = SecurityManager::new("test-pepper", 4, 8);
    let events = EventHub::new();
    let queues = QueueRepository::new(pool.clone(), security);
    let tasks = TaskRepository::new(pool.clone(), events.clone());
    let workers = WorkerRepository::new(pool.clone(), events);

    let queue_name = format!("test_queue_{}", Uuid::new_v4().simple());
    let queue_id = queues
        .create_queue(&queue_name, "test_password", None)
        .await
        .expect("create queue");

    Some(Harness {
        queue_id,
        queues,
        tasks,
        workers,
        pool,
    })
}

async fn submit(h: &Harness, name: &str, priority: i32, args: serde_json::Value) -> Uuid {
    h.tasks
        .create_task(
            h.queue_id,
            Some(name.to_string()),
            Some(args),
            None,
            None,
            Some(60),
            None,
            Some(3),
            Some(priority),
        )
        .await
        .expect("create task")
}

#[tokio::test]
async fn submit_fetch_report_round_trip() {
    let Some(h) = harness().await else { return };

    let task_id = submit(&h, "t1", Priority::Medium.as_i32(), json!({"param1": 1})).await;

    let fetched = h
        .tasks
        .fetch_task(h.queue_id, FetchOptions::default())
        .await
        .unwrap()
        .expect("task dispatched");
    assert_eq!(fetched.task_id, task_id);
    assert_eq!(fetched.status, TaskStatus::Running);
    assert!(fetched.start_time.is_some());

    let status = h
        .tasks
        .report_task_status(h.queue_id, task_id, "success", Some(json!({"result": "ok"})))
        .await
        .unwrap();
    assert_eq!(status, TaskStatus::Success);

    let listed = h
        .tasks
        .list_tasks(h.queue_id, &TaskLsRequest::default())
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].status, TaskStatus::Success);
    assert_eq!(listed[0].summary["result"], json!("ok"));
}

#[tokio::test]
async fn list_pagination_preserves_submission_order() {
    let Some(h) = harness().await else { return };

    for i in 0..5 {
        submit(&h, &format!("test_task_{i}"), 10, json!({"i": i})).await;
    }

    let page = h
        .tasks
        .list_tasks(
            h.queue_id,
            &TaskLsRequest {
                offset: 0,
                limit: 5,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(page.len(), 5);
    for (i, task) in page.iter().enumerate() {
        assert_eq!(task.task_name.as_deref(), Some(format!("test_task_{i}").as_str()));
    }

    let empty = h
        .tasks
        .list_tasks(
            h.queue_id,
            &TaskLsRequest {
                offset: 5,
                limit: 5,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(empty.is_empty());
}

#[tokio::test]
async fn dispatch_order_is_priority_then_fifo() {
    let Some(h) = harness().await else { return };

    let b1 = submit(&h, "b1", Priority::Medium.as_i32(), json!({})).await;
    let a = submit(&h, "a", Priority::High.as_i32(), json!({})).await;
    let b2 = submit(&h, "b2", Priority::Medium.as_i32(), json!({})).await;
    let c = submit(&h, "c", Priority::Low.as_i32(), json!({})).await;

    let mut order = Vec::new();
    for _ in 0..4 {
        let task = h
            .tasks
            .fetch_task(h.queue_id, FetchOptions::default())
            .await
            .unwrap()
            .expect("task available");
        order.push(task.task_id);
    }
    assert_eq!(order, vec![a, b1, b2, c]);

    assert!(h
        .tasks
        .fetch_task(h.queue_id, FetchOptions::default())
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn required_fields_shape_matching() {
    let Some(h) = harness().await else { return };

    submit(&h, "shallow", 10, json!({"a": 1})).await;
    let deep = submit(&h, "deep", 10, json!({"a": 1, "b": {"c": 2}})).await;

    let options = FetchOptions {
        required_fields: Some(json!({"a": null, "b": {"c": null}})),
        ..Default::default()
    };
    let fetched = h
        .tasks
        .fetch_task(h.queue_id, options.clone())
        .await
        .unwrap()
        .expect("structurally matching task");
    assert_eq!(fetched.task_id, deep);

    // Only the shallow task remains pending and it does not match.
    assert!(h.tasks.fetch_task(h.queue_id, options).await.unwrap().is_none());
}

#[tokio::test]
async fn extra_filter_with_arithmetic_expr() {
    let Some(h) = harness().await else { return };

    submit(&h, "no-match", 10, json!({"foo": 1, "bar": 2})).await;
    let matching = submit(&h, "match", 10, json!({"foo": 5, "bar": 10})).await;

    let filter = labtasker_core::transpiler::transpile_query("args.foo + args.bar == 15").unwrap();
    let fetched = h
        .tasks
        .fetch_task(
            h.queue_id,
            FetchOptions {
                extra_filter: Some(filter),
                ..Default::default()
            },
        )
        .await
        .unwrap()
        .expect("filter-matching task");
    assert_eq!(fetched.task_id, matching);
}

#[tokio::test]
async fn retry_budget_exhaustion_lands_in_failed() {
    let Some(h) = harness().await else { return };

    let task_id = submit(&h, "retry", 10, json!({})).await;

    for expected in [TaskStatus::Pending, TaskStatus::Pending, TaskStatus::Failed] {
        let fetched = h
            .tasks
            .fetch_task(h.queue_id, FetchOptions::default())
            .await
            .unwrap()
            .expect("task still dispatchable");
        assert_eq!(fetched.task_id, task_id);
        let status = h
            .tasks
            .report_task_status(h.queue_id, task_id, "failed", None)
            .await
            .unwrap();
        assert_eq!(status, expected);
    }

    let task = h.tasks.get_task(h.queue_id, task_id).await.unwrap();
    assert_eq!(task.retries, 3);
    assert_eq!(task.status, TaskStatus::Failed);

    // FSM soundness: a terminal task rejects further reports and the
    // stored row is untouched.
    let err = h
        .tasks
        .report_task_status(h.queue_id, task_id, "success", None)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::InvalidStateTransition(_)));
    let task = h.tasks.get_task(h.queue_id, task_id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
}

#[tokio::test]
async fn worker_crashes_after_max_retries_and_blocks_fetch() {
    let Some(h) = harness().await else { return };

    let worker_id = h
        .workers
        .create_worker(h.queue_id, None, None, Some(3))
        .await
        .unwrap();
    for i in 0..5 {
        submit(&h, &format!("w{i}"), 10, json!({})).await;
    }

    for _ in 0..3 {
        let task = h
            .tasks
            .fetch_task(
                h.queue_id,
                FetchOptions {
                    worker_id: Some(worker_id),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .expect("worker can fetch while active");
        h.tasks
            .report_task_status(h.queue_id, task.task_id, "failed", None)
            .await
            .unwrap();
    }

    let worker = h.workers.get_worker(h.queue_id, worker_id).await.unwrap();
    assert_eq!(worker.status, WorkerStatus::Crashed);

    let err = h
        .tasks
        .fetch_task(
            h.queue_id,
            FetchOptions {
                worker_id: Some(worker_id),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Forbidden(_)));

    // Manual reactivation unblocks dispatch.
    h.workers
        .report_worker_status(h.queue_id, worker_id, "active")
        .await
        .unwrap();
    assert!(h
        .tasks
        .fetch_task(
            h.queue_id,
            FetchOptions {
                worker_id: Some(worker_id),
                ..Default::default()
            },
        )
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn timeout_sweep_fails_expired_tasks_and_charges_worker() {
    let Some(h) = harness().await else { return };

    let worker_id = h
        .workers
        .create_worker(h.queue_id, None, None, Some(3))
        .await
        .unwrap();
    let task_id = h
        .tasks
        .create_task(
            h.queue_id,
            Some("sleeper".to_string()),
            None,
            None,
            None,
            Some(120),
            None,
            Some(1),
            None,
        )
        .await
        .unwrap();

    h.tasks
        .fetch_task(
            h.queue_id,
            FetchOptions {
                worker_id: Some(worker_id),
                start_heartbeat: true,
                ..Default::default()
            },
        )
        .await
        .unwrap()
        .expect("task dispatched");

    // Advance virtual time: backdate the heartbeat past its timeout.
    sqlx::query(
        "UPDATE tasks SET last_heartbeat = now() - interval '121 seconds' WHERE task_id = $1",
    )
    .bind(task_id)
    .execute(&h.pool)
    .await
    .unwrap();

    let transitioned = h.tasks.handle_timeouts().await.unwrap();
    assert!(transitioned.contains(&task_id));

    let task = h.tasks.get_task(h.queue_id, task_id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.retries, 1);
    assert!(task.summary["labtasker_error"]
        .as_str()
        .unwrap()
        .contains("timed out"));

    let worker = h.workers.get_worker(h.queue_id, worker_id).await.unwrap();
    assert_eq!(worker.retries, 1);

    // A second sweep is a no-op: the task is no longer RUNNING.
    let transitioned = h.tasks.handle_timeouts().await.unwrap();
    assert!(!transitioned.contains(&task_id));
}

#[tokio::test]
async fn queue_scoping_blocks_cross_queue_access() {
    let Some(h) = harness().await else { return };

    let other_name = format!("other_queue_{}", Uuid::new_v4().simple());
    let other_queue = h
        .queues
        .create_queue(&other_name, "other_password", None)
        .await
        .unwrap();
    let foreign_task = submit(&h, "mine", 10, json!({})).await;

    // Reads, mutations, and dispatch authenticated as the other queue
    // cannot see queue A's task.
    assert!(matches!(
        h.tasks.get_task(other_queue, foreign_task).await.unwrap_err(),
        ApiError::NotFound(_)
    ));
    assert!(matches!(
        h.tasks
            .report_task_status(other_queue, foreign_task, "cancelled", None)
            .await
            .unwrap_err(),
        ApiError::NotFound(_)
    ));

    // Even a matching-looking extra_filter cannot cross the scope.
    let sneaky = FetchOptions {
        extra_filter: Some(json!({"queue_id": h.queue_id.to_string()})),
        ..Default::default()
    };
    assert!(h.tasks.fetch_task(other_queue, sneaky).await.unwrap().is_none());
}

#[tokio::test]
async fn reset_requeues_with_overrides() {
    let Some(h) = harness().await else { return };

    let task_id = submit(&h, "resettable", 10, json!({"x": 1})).await;
    h.tasks
        .fetch_task(h.queue_id, FetchOptions::default())
        .await
        .unwrap()
        .unwrap();
    h.tasks
        .report_task_status(h.queue_id, task_id, "cancelled", None)
        .await
        .unwrap();

    h.tasks
        .reset_task(
            h.queue_id,
            task_id,
            Some(json!({"priority": 20, "args": {"x": 2}})),
        )
        .await
        .unwrap();

    let task = h.tasks.get_task(h.queue_id, task_id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.retries, 0);
    assert_eq!(task.priority, 20);
    assert_eq!(task.args["x"], json!(2));

    // Protected fields stay off-limits.
    let err = h
        .tasks
        .reset_task(h.queue_id, task_id, Some(json!({"queue_id": "evil"})))
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::BadRequest(_)));
}

#[tokio::test]
async fn queue_update_deep_merges_metadata() {
    let Some(h) = harness().await else { return };

    h.queues
        .update_queue(
            h.queue_id,
            None,
            None,
            Some(json!({"lab": {"site": "A", "rack": 1}})),
        )
        .await
        .unwrap();
    h.queues
        .update_queue(h.queue_id, None, None, Some(json!({"lab": {"rack": 2}})))
        .await
        .unwrap();

    let queue = h.queues.get_queue_by_id(h.queue_id).await.unwrap();
    assert_eq!(queue.metadata["lab"]["site"], json!("A"));
    assert_eq!(queue.metadata["lab"]["rack"], json!(2));
}

#[tokio::test]
async fn duplicate_queue_name_conflicts() {
    let Some(h) = harness().await else { return };

    let queue = h.queues.get_queue_by_id(h.queue_id).await.unwrap();
    let err = h
        .queues
        .create_queue(&queue.queue_name, "another_password", None)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Conflict(_)));
}

#[tokio::test]
async fn operator_keys_rejected_in_user_maps() {
    let Some(h) = harness().await else { return };

    let err = h
        .tasks
        .create_task(
            h.queue_id,
            None,
            Some(json!({"$where": "1 == 1"})),
            None,
            None,
            None,
            None,
            None,
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::BadRequest(_)));
}

#[tokio::test]
async fn delete_worker_cascade_clears_task_reference() {
    let Some(h) = harness().await else { return };

    let worker_id = h
        .workers
        .create_worker(h.queue_id, Some("w".to_string()), None, None)
        .await
        .unwrap();
    let task_id = submit(&h, "owned", 10, json!({})).await;
    h.tasks
        .fetch_task(
            h.queue_id,
            FetchOptions {
                worker_id: Some(worker_id),
                ..Default::default()
            },
        )
        .await
        .unwrap()
        .unwrap();

    h.workers
        .delete_worker(h.queue_id, worker_id, true)
        .await
        .unwrap();

    let task = h.tasks.get_task(h.queue_id, task_id).await.unwrap();
    assert!(task.worker_id.is_none());
}
