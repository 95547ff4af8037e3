use std::sync::Arc;
use std::time::Duration;

use balancer_core::{
    Clock, ManualClock, Predictor, RemoteExecutor, SandboxPhase, Scheduler, SchedulerError,
    TaskDuration,
};
use balancer_dispatcher::{LoadBalancer, PredictorChain, SimpleScheduler, TimelineScheduler};
use balancer_testing_utils::{
    endpoints, remote_task, EventLog, FixedResourceQuery, RecordingExecutor,
    RecordingSandboxProvider, TestEnv,
};

const WAIT: Duration = Duration::from_secs(5);

/// Predictor whose first feature is the CPU share and second the duration in ms.
fn predictor() -> PredictorChain {
    let scorer: Arc<dyn Predictor> = Arc::new(|x: &[f64]| x.to_vec());
    let sizer: Arc<dyn Predictor> = Arc::new(|s: &[f64]| {
        let millis = s.get(1).copied().unwrap_or(10.0);
        vec![millis * 1_000_000.0, s[0], 100.0]
    });
    PredictorChain::new(scorer, sizer, 2)
}

fn timeline(workers: &[&str]) -> Arc<dyn Scheduler> {
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(1_000));
    let query = workers
        .iter()
        .fold(FixedResourceQuery::new(clock.clone()), |q, w| {
            q.with_worker(w, vec![1.0, 1000.0])
        });
    Arc::new(TimelineScheduler::new(Arc::new(query), clock))
}

fn simple() -> Arc<dyn Scheduler> {
    Arc::new(SimpleScheduler::new(Arc::new(ManualClock::new(1_000))))
}

fn executor(executor: &RecordingExecutor) -> Arc<dyn RemoteExecutor> {
    Arc::new(executor.clone())
}

#[tokio::test]
async fn test_chained_tasks_run_in_order() {
    let log = EventLog::new();
    let recorder = RecordingExecutor::new()
        .with_log(log.clone())
        .with_delay("a", Duration::from_millis(50))
        .with_delay("b", Duration::from_millis(20));
    let balancer = LoadBalancer::builder(simple(), executor(&recorder))
        .workers(endpoints(&["w1:42043"]))
        .build()
        .unwrap();

    let a = balancer.submit(remote_task("a"), &[]).await.unwrap();
    let b = balancer.submit(remote_task("b"), &[]).await.unwrap();
    let c = balancer.submit(remote_task("c"), &[]).await.unwrap();

    assert!(a.prediction().duration.is_unknown());
    assert_eq!(b.prediction().predecessor, Some(a.prediction().id));
    assert_eq!(c.prediction().predecessor, Some(b.prediction().id));

    for handle in [&a, &b, &c] {
        handle.wait_timeout(WAIT).await.unwrap();
    }

    assert_eq!(
        log.events(),
        vec!["run:a", "done:a", "run:b", "done:b", "run:c", "done:c"]
    );
    assert_eq!(recorder.max_running_per_worker(), 1);
    let balancer = &balancer;
    assert!(TestEnv::wait_for(move || async move { balancer.pending_chains().await == 0 }, WAIT).await);
}

#[tokio::test]
async fn test_result_reaches_the_handle() {
    let recorder = RecordingExecutor::new();
    let balancer = LoadBalancer::builder(simple(), executor(&recorder))
        .workers(endpoints(&["w1:42043"]))
        .build()
        .unwrap();

    let task = balancer_core::RemoteTask::new("sort", serde_json::json!([3, 1, 2]));
    let handle = balancer.submit(task, &[]).await.unwrap();
    let result = handle.wait().await.unwrap();

    assert_eq!(result["task"], "sort");
    assert_eq!(result["worker"], "w1:42043");
    assert_eq!(result["payload"], serde_json::json!([3, 1, 2]));
    assert!(handle.is_done());
    assert_eq!(handle.try_result(), Some(Ok(result)));
}

#[tokio::test]
async fn test_oversubscription_is_serialized_by_timeline() {
    let log = EventLog::new();
    let recorder = RecordingExecutor::new()
        .with_log(log.clone())
        .with_delay("a", Duration::from_millis(50));
    let balancer = LoadBalancer::builder(timeline(&["w1:42043"]), executor(&recorder))
        .workers(endpoints(&["w1:42043"]))
        .predictor(predictor())
        .build()
        .unwrap();

    let a = balancer.submit(remote_task("a"), &[0.5, 50.0]).await.unwrap();
    let b = balancer.submit(remote_task("b"), &[0.6, 10.0]).await.unwrap();

    assert_eq!(a.prediction().duration, TaskDuration::Known(50_000_000));
    assert_eq!(b.prediction().predecessor, Some(a.prediction().id));
    assert!(b.prediction().start_time >= a.prediction().end_time().unwrap());

    b.wait_timeout(WAIT).await.unwrap();
    a.wait_timeout(WAIT).await.unwrap();

    assert!(log.position("done:a").unwrap() < log.position("run:b").unwrap());
}

#[tokio::test]
async fn test_idle_workers_run_in_parallel() {
    let recorder = RecordingExecutor::new()
        .with_delay("a", Duration::from_millis(100))
        .with_delay("b", Duration::from_millis(100));
    let balancer = LoadBalancer::builder(timeline(&["w1:42043", "w2:42043"]), executor(&recorder))
        .workers(endpoints(&["w1:42043", "w2:42043"]))
        .predictor(predictor())
        .build()
        .unwrap();

    let a = balancer.submit(remote_task("a"), &[0.6, 100.0]).await.unwrap();
    let b = balancer.submit(remote_task("b"), &[0.6, 100.0]).await.unwrap();

    assert_ne!(a.prediction().worker, b.prediction().worker);
    assert_eq!(a.prediction().start_time, b.prediction().start_time);

    a.wait_timeout(WAIT).await.unwrap();
    b.wait_timeout(WAIT).await.unwrap();
    assert_eq!(recorder.max_running(), 2);
}

#[tokio::test]
async fn test_max_in_flight_bounds_remote_calls() {
    let recorder = RecordingExecutor::new()
        .with_delay("a", Duration::from_millis(50))
        .with_delay("b", Duration::from_millis(50));
    let balancer = LoadBalancer::builder(timeline(&["w1:42043", "w2:42043"]), executor(&recorder))
        .workers(endpoints(&["w1:42043", "w2:42043"]))
        .predictor(predictor())
        .max_in_flight(1)
        .build()
        .unwrap();

    let a = balancer.submit(remote_task("a"), &[0.6, 50.0]).await.unwrap();
    let b = balancer.submit(remote_task("b"), &[0.6, 50.0]).await.unwrap();

    a.wait_timeout(WAIT).await.unwrap();
    b.wait_timeout(WAIT).await.unwrap();
    assert_eq!(recorder.max_running(), 1);
}

#[tokio::test]
async fn test_rejection_is_synchronous() {
    let recorder = RecordingExecutor::new();
    let balancer = LoadBalancer::builder(timeline(&["w1:42043"]), executor(&recorder))
        .workers(endpoints(&["w1:42043"]))
        .predictor(predictor())
        .build()
        .unwrap();

    let err = balancer
        .submit(remote_task("huge"), &[2.0, 10.0])
        .await
        .unwrap_err();

    assert!(err.is_scheduling_failure());
    assert_eq!(balancer.pending_chains().await, 0);
    assert_eq!(recorder.call_count(), 0);
}

#[tokio::test]
async fn test_failure_is_isolated_to_its_handle() {
    let log = EventLog::new();
    let recorder = RecordingExecutor::new()
        .with_log(log.clone())
        .with_delay("bad", Duration::from_millis(20))
        .failing("bad");
    let balancer = LoadBalancer::builder(simple(), executor(&recorder))
        .workers(endpoints(&["w1:42043"]))
        .build()
        .unwrap();

    let bad = balancer.submit(remote_task("bad"), &[]).await.unwrap();
    let good = balancer.submit(remote_task("good"), &[]).await.unwrap();

    let err = bad.wait_timeout(WAIT).await.unwrap_err();
    assert!(matches!(err, SchedulerError::TaskExecution(_)));

    let result = good.wait_timeout(WAIT).await.unwrap();
    assert_eq!(result["task"], "good");
    assert!(log.position("done:bad").unwrap() < log.position("run:good").unwrap());
}

#[tokio::test]
async fn test_sandbox_brackets_the_remote_call() {
    let log = EventLog::new();
    let recorder = RecordingExecutor::new().with_log(log.clone());
    let sandbox = RecordingSandboxProvider::new(log.clone());
    let balancer = LoadBalancer::builder(timeline(&["w1:42043"]), executor(&recorder))
        .workers(endpoints(&["w1:42043"]))
        .predictor(predictor())
        .sandbox(Arc::new(sandbox.clone()))
        .build()
        .unwrap();

    balancer
        .submit(remote_task("a"), &[0.5, 10.0])
        .await
        .unwrap()
        .wait_timeout(WAIT)
        .await
        .unwrap();

    assert_eq!(
        log.events(),
        vec!["create:a", "attach:a", "run:a", "done:a", "destroy:a"]
    );
    assert_eq!(sandbox.credentials(), vec!["cred-0"; 3]);
}

#[tokio::test]
async fn test_sandbox_create_failure_skips_the_task() {
    let log = EventLog::new();
    let recorder = RecordingExecutor::new().with_log(log.clone());
    let sandbox = RecordingSandboxProvider::new(log.clone()).failing(SandboxPhase::Create);
    let balancer = LoadBalancer::builder(timeline(&["w1:42043"]), executor(&recorder))
        .workers(endpoints(&["w1:42043"]))
        .predictor(predictor())
        .sandbox(Arc::new(sandbox))
        .build()
        .unwrap();

    let handle = balancer.submit(remote_task("a"), &[0.5, 10.0]).await.unwrap();
    let err = handle.wait_timeout(WAIT).await.unwrap_err();

    assert!(matches!(
        err,
        SchedulerError::Sandbox {
            phase: SandboxPhase::Create,
            ..
        }
    ));
    assert_eq!(log.events(), vec!["create:a"]);
    assert_eq!(recorder.call_count(), 0);
}

#[tokio::test]
async fn test_sandbox_attach_failure_destroys_and_skips() {
    let log = EventLog::new();
    let recorder = RecordingExecutor::new().with_log(log.clone());
    let sandbox = RecordingSandboxProvider::new(log.clone()).failing(SandboxPhase::Attach);
    let balancer = LoadBalancer::builder(timeline(&["w1:42043"]), executor(&recorder))
        .workers(endpoints(&["w1:42043"]))
        .predictor(predictor())
        .sandbox(Arc::new(sandbox))
        .build()
        .unwrap();

    let handle = balancer.submit(remote_task("a"), &[0.5, 10.0]).await.unwrap();
    let err = handle.wait_timeout(WAIT).await.unwrap_err();

    assert!(matches!(
        err,
        SchedulerError::Sandbox {
            phase: SandboxPhase::Attach,
            ..
        }
    ));
    assert_eq!(log.events(), vec!["create:a", "attach:a", "destroy:a"]);
}

#[tokio::test]
async fn test_sandbox_destroy_failure_keeps_the_result() {
    let log = EventLog::new();
    let recorder = RecordingExecutor::new().with_log(log.clone());
    let sandbox = RecordingSandboxProvider::new(log.clone()).failing(SandboxPhase::Destroy);
    let balancer = LoadBalancer::builder(timeline(&["w1:42043"]), executor(&recorder))
        .workers(endpoints(&["w1:42043"]))
        .predictor(predictor())
        .sandbox(Arc::new(sandbox))
        .build()
        .unwrap();

    let result = balancer
        .submit(remote_task("a"), &[0.5, 10.0])
        .await
        .unwrap()
        .wait_timeout(WAIT)
        .await
        .unwrap();

    assert_eq!(result["task"], "a");
    assert_eq!(log.events().last().map(String::as_str), Some("destroy:a"));
}

#[tokio::test]
async fn test_no_sandbox_without_predictor() {
    let log = EventLog::new();
    let recorder = RecordingExecutor::new().with_log(log.clone());
    let sandbox = RecordingSandboxProvider::new(log.clone());
    let balancer = LoadBalancer::builder(simple(), executor(&recorder))
        .workers(endpoints(&["w1:42043"]))
        .sandbox(Arc::new(sandbox.clone()))
        .build()
        .unwrap();

    balancer
        .submit(remote_task("a"), &[])
        .await
        .unwrap()
        .wait_timeout(WAIT)
        .await
        .unwrap();

    assert_eq!(sandbox.built(), 0);
    assert_eq!(log.events(), vec!["run:a", "done:a"]);
}

#[tokio::test]
async fn test_cancel_before_start_skips_the_call() {
    let recorder = RecordingExecutor::new().with_delay("a", Duration::from_millis(100));
    let balancer = LoadBalancer::builder(simple(), executor(&recorder))
        .workers(endpoints(&["w1:42043"]))
        .build()
        .unwrap();

    let a = balancer.submit(remote_task("a"), &[]).await.unwrap();
    let b = balancer.submit(remote_task("b"), &[]).await.unwrap();
    let c = balancer.submit(remote_task("c"), &[]).await.unwrap();
    b.cancel();

    let err = b.wait_timeout(WAIT).await.unwrap_err();
    assert_eq!(err, SchedulerError::Cancelled(b.prediction().id));
    assert!(b.execution_times().started_at.is_none());

    // The chain behind the cancelled task still runs.
    a.wait_timeout(WAIT).await.unwrap();
    c.wait_timeout(WAIT).await.unwrap();

    let names: Vec<String> = recorder.calls().into_iter().map(|c| c.task).collect();
    assert_eq!(names, vec!["a", "c"]);
}

#[tokio::test]
async fn test_cancel_parked_task_does_not_wait_for_its_predecessor() {
    let recorder = RecordingExecutor::new().with_delay("a", Duration::from_secs(3));
    let balancer = LoadBalancer::builder(simple(), executor(&recorder))
        .workers(endpoints(&["w1:42043"]))
        .build()
        .unwrap();

    let a = balancer.submit(remote_task("a"), &[]).await.unwrap();
    let b = balancer.submit(remote_task("b"), &[]).await.unwrap();
    b.cancel();

    let err = b.wait_timeout(Duration::from_millis(500)).await.unwrap_err();
    assert_eq!(err, SchedulerError::Cancelled(b.prediction().id));
    assert!(!a.is_done());

    let names: Vec<String> = recorder.calls().into_iter().map(|c| c.task).collect();
    assert_eq!(names, vec!["a"]);
    a.cancel();
}

#[tokio::test]
async fn test_successors_of_a_withdrawn_task_still_follow_the_predecessor() {
    let log = EventLog::new();
    let recorder = RecordingExecutor::new()
        .with_log(log.clone())
        .with_delay("a", Duration::from_millis(500));
    let balancer = LoadBalancer::builder(simple(), executor(&recorder))
        .workers(endpoints(&["w1:42043"]))
        .build()
        .unwrap();

    let a = balancer.submit(remote_task("a"), &[]).await.unwrap();
    let b = balancer.submit(remote_task("b"), &[]).await.unwrap();
    let c = balancer.submit(remote_task("c"), &[]).await.unwrap();
    assert_eq!(c.prediction().predecessor, Some(b.prediction().id));

    b.cancel();
    b.wait_timeout(Duration::from_millis(100)).await.unwrap_err();
    assert!(!c.is_done());

    c.wait_timeout(WAIT).await.unwrap();
    assert!(a.is_done());
    assert_eq!(log.events(), vec!["run:a", "done:a", "run:c", "done:c"]);
    assert_eq!(recorder.max_running_per_worker(), 1);
}

#[tokio::test]
async fn test_panicking_executor_fails_only_its_handle() {
    let recorder = RecordingExecutor::new().panicking("a");
    let balancer = LoadBalancer::builder(simple(), executor(&recorder))
        .workers(endpoints(&["w1:42043"]))
        .build()
        .unwrap();

    let a = balancer.submit(remote_task("a"), &[]).await.unwrap();
    let b = balancer.submit(remote_task("b"), &[]).await.unwrap();
    assert_eq!(b.prediction().predecessor, Some(a.prediction().id));

    match a.wait_timeout(WAIT).await {
        Err(SchedulerError::Internal(message)) => assert!(message.contains("a blew up")),
        other => panic!("unexpected outcome: {other:?}"),
    }
    b.wait_timeout(WAIT).await.unwrap();

    let balancer = &balancer;
    assert!(TestEnv::wait_for(move || async move { balancer.pending_chains().await == 0 }, WAIT).await);
}

#[tokio::test]
async fn test_panic_inside_sandbox_still_destroys_it() {
    let log = EventLog::new();
    let recorder = RecordingExecutor::new().with_log(log.clone()).panicking("a");
    let sandbox = RecordingSandboxProvider::new(log.clone());
    let balancer = LoadBalancer::builder(timeline(&["w1:42043"]), executor(&recorder))
        .workers(endpoints(&["w1:42043"]))
        .predictor(predictor())
        .sandbox(Arc::new(sandbox.clone()))
        .build()
        .unwrap();

    let a = balancer.submit(remote_task("a"), &[0.5, 10.0]).await.unwrap();
    assert!(matches!(
        a.wait_timeout(WAIT).await,
        Err(SchedulerError::Internal(_))
    ));
    assert_eq!(log.events(), vec!["create:a", "attach:a", "run:a", "destroy:a"]);
}

#[tokio::test]
async fn test_cancel_running_task_releases_its_slot() {
    let recorder = RecordingExecutor::new().with_delay("slow", Duration::from_secs(30));
    let balancer = LoadBalancer::builder(timeline(&["w1:42043"]), executor(&recorder))
        .workers(endpoints(&["w1:42043"]))
        .predictor(predictor())
        .build()
        .unwrap();

    let slow = balancer.submit(remote_task("slow"), &[0.6, 30_000.0]).await.unwrap();
    let started = || {
        let calls = recorder.call_count();
        async move { calls == 1 }
    };
    assert!(TestEnv::wait_for(started, WAIT).await);

    slow.cancel();
    let err = slow.wait_timeout(WAIT).await.unwrap_err();
    assert_eq!(err, SchedulerError::Cancelled(slow.prediction().id));
    assert!(slow.execution_times().finished_at.is_some());

    // The abandoned reservation no longer blocks the worker.
    let next = balancer.submit(remote_task("next"), &[0.6, 10.0]).await.unwrap();
    assert_eq!(next.prediction().predecessor, None);
    next.wait_timeout(WAIT).await.unwrap();
}

#[tokio::test]
async fn test_wait_timeout_leaves_task_running() {
    let recorder = RecordingExecutor::new().with_delay("a", Duration::from_millis(200));
    let balancer = LoadBalancer::builder(simple(), executor(&recorder))
        .workers(endpoints(&["w1:42043"]))
        .build()
        .unwrap();

    let handle = balancer.submit(remote_task("a"), &[]).await.unwrap();
    let err = handle
        .wait_timeout(Duration::from_millis(10))
        .await
        .unwrap_err();
    assert_eq!(err, SchedulerError::Timeout(handle.prediction().id));
    assert!(!handle.is_done());

    handle.wait_timeout(WAIT).await.unwrap();
}

#[tokio::test]
async fn test_execution_times_are_recorded() {
    let recorder = RecordingExecutor::new().with_delay("a", Duration::from_millis(50));
    let balancer = LoadBalancer::builder(simple(), executor(&recorder))
        .workers(endpoints(&["w1:42043"]))
        .build()
        .unwrap();

    let handle = balancer.submit(remote_task("a"), &[]).await.unwrap();
    handle.wait_timeout(WAIT).await.unwrap();

    let times = handle.execution_times();
    let processed = times.processed().unwrap();
    assert!(processed >= Duration::from_millis(50));
    assert!(times.retained().unwrap() >= processed);
    assert!(times.waited().unwrap() <= times.retained().unwrap());
}

#[tokio::test]
async fn test_without_predictor_only_first_worker_is_used() {
    let recorder = RecordingExecutor::new();
    let balancer = LoadBalancer::builder(simple(), executor(&recorder))
        .workers(endpoints(&["w1:42043", "w2:42043"]))
        .build()
        .unwrap();

    let handles = futures::future::join_all(
        ["a", "b", "c"].map(|name| balancer.submit(remote_task(name), &[])),
    )
    .await;
    for handle in handles {
        handle.unwrap().wait_timeout(WAIT).await.unwrap();
    }

    assert!(recorder
        .calls()
        .iter()
        .all(|call| call.worker.address() == "w1:42043"));
    assert_eq!(recorder.max_running_per_worker(), 1);
}

#[tokio::test]
async fn test_builder_requires_workers() {
    let err = LoadBalancer::builder(simple(), Arc::new(RecordingExecutor::new()))
        .build()
        .unwrap_err();
    assert!(matches!(err, SchedulerError::Configuration(_)));
}

#[tokio::test]
async fn test_debug_names_scheduler_and_workers() {
    let balancer = LoadBalancer::builder(simple(), executor(&RecordingExecutor::new()))
        .workers(endpoints(&["w1:42043"]))
        .build()
        .unwrap();

    let rendered = format!("{balancer:?}");
    assert!(rendered.contains("Simple"));
    assert!(rendered.contains("w1:42043"));
}
