use std::collections::HashMap;
use std::sync::Arc;

use balancer_core::{
    Clock, ManualClock, ResourceVector, Scheduler, SchedulerError, TaskDuration, TaskPrediction,
    WorkerId,
};
use balancer_dispatcher::TimelineScheduler;
use balancer_testing_utils::{remote_task, worker_ids, FixedResourceQuery, TestAssertions};

const NOW: u64 = 1_000;

fn setup(workers: &[(&str, Vec<f64>)]) -> (TimelineScheduler, FixedResourceQuery, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(NOW));
    let clock_dyn: Arc<dyn Clock> = clock.clone();

    let query = workers
        .iter()
        .fold(FixedResourceQuery::new(clock_dyn.clone()), |q, (w, free)| {
            q.with_worker(w, free.clone())
        });

    (
        TimelineScheduler::new(Arc::new(query.clone()), clock_dyn),
        query,
        clock,
    )
}

async fn schedule(
    scheduler: &TimelineScheduler,
    name: &str,
    duration: u64,
    resources: Vec<f64>,
    workers: &[WorkerId],
) -> Result<Arc<TaskPrediction>, SchedulerError> {
    scheduler
        .schedule(
            Arc::new(remote_task(name)),
            TaskDuration::Known(duration),
            ResourceVector::new(resources),
            workers,
        )
        .await
}

#[tokio::test]
async fn test_oversubscribing_task_waits_for_release() {
    let (scheduler, _, _) = setup(&[("w1:42043", vec![1.0, 1000.0])]);
    let workers = worker_ids(&["w1:42043"]);

    let a = schedule(&scheduler, "a", 100, vec![0.5, 500.0], &workers).await.unwrap();
    let b = schedule(&scheduler, "b", 100, vec![0.6, 600.0], &workers).await.unwrap();

    assert_eq!(a.start_time, NOW + 1);
    assert!(b.start_time >= a.start_time + 100);
    assert_eq!(b.start_time, a.end_time().unwrap());
    assert_eq!(b.predecessor, Some(a.id));
}

#[tokio::test]
async fn test_tasks_that_fit_together_share_a_worker() {
    let (scheduler, _, _) = setup(&[("w1:42043", vec![1.0, 1000.0])]);
    let workers = worker_ids(&["w1:42043"]);

    let a = schedule(&scheduler, "a", 100, vec![0.5, 500.0], &workers).await.unwrap();
    let b = schedule(&scheduler, "b", 100, vec![0.5, 500.0], &workers).await.unwrap();

    assert_eq!(a.start_time, b.start_time);
    assert_eq!(b.predecessor, None);
}

#[tokio::test]
async fn test_exact_halves_pack_onto_the_first_idle_worker() {
    let (scheduler, _, _) = setup(&[
        ("w1:42043", vec![1.0, 1000.0]),
        ("w2:42043", vec![1.0, 1000.0]),
    ]);
    let workers = worker_ids(&["w1:42043", "w2:42043"]);

    let a = schedule(&scheduler, "a", 100, vec![0.5, 500.0], &workers).await.unwrap();
    let b = schedule(&scheduler, "b", 100, vec![0.5, 500.0], &workers).await.unwrap();

    // A request equal to the remaining free share fits.
    assert_eq!(a.worker, workers[0]);
    assert_eq!(b.worker, workers[0]);
    assert_eq!(a.start_time, b.start_time);
    assert_eq!(b.predecessor, None);
}

#[tokio::test]
async fn test_idle_workers_take_one_task_each() {
    let (scheduler, _, _) = setup(&[
        ("w1:42043", vec![1.0, 1000.0]),
        ("w2:42043", vec![1.0, 1000.0]),
    ]);
    let workers = worker_ids(&["w1:42043", "w2:42043"]);

    let a = schedule(&scheduler, "a", 100, vec![0.6, 600.0], &workers).await.unwrap();
    let b = schedule(&scheduler, "b", 100, vec![0.6, 600.0], &workers).await.unwrap();

    assert_eq!(a.worker, workers[0]);
    assert_eq!(b.worker, workers[1]);
    assert_eq!(a.start_time, b.start_time);
    assert_eq!(a.start_time, NOW + 1);
}

#[tokio::test]
async fn test_oversized_vector_is_rejected() {
    let (scheduler, _, _) = setup(&[
        ("w1:42043", vec![1.0, 1000.0]),
        ("w2:42043", vec![2.0, 500.0]),
    ]);
    let workers = worker_ids(&["w1:42043", "w2:42043"]);

    let err = schedule(&scheduler, "huge", 10, vec![1.5, 800.0], &workers)
        .await
        .unwrap_err();

    assert!(err.is_scheduling_failure());
    assert_eq!(scheduler.waiting_count(), 0);
}

#[tokio::test]
async fn test_failing_query_excludes_worker() {
    let (scheduler, query, _) = setup(&[
        ("w1:42043", vec![1.0, 1000.0]),
        ("w2:42043", vec![1.0, 1000.0]),
    ]);
    let workers = worker_ids(&["w1:42043", "w2:42043"]);
    query.fail_worker("w1:42043");

    let a = schedule(&scheduler, "a", 100, vec![0.1, 1.0], &workers).await.unwrap();
    assert_eq!(a.worker, workers[1]);

    query.fail_worker("w2:42043");
    let err = schedule(&scheduler, "b", 100, vec![0.1, 1.0], &workers)
        .await
        .unwrap_err();
    assert!(err.is_scheduling_failure());

    query.recover_worker("w1:42043");
    let c = schedule(&scheduler, "c", 100, vec![0.1, 1.0], &workers).await.unwrap();
    assert_eq!(c.worker, workers[0]);
}

#[tokio::test]
async fn test_lifecycle_transitions() {
    let (scheduler, _, _) = setup(&[("w1:42043", vec![1.0, 1000.0])]);
    let workers = worker_ids(&["w1:42043"]);

    let a = schedule(&scheduler, "a", 100, vec![0.5, 500.0], &workers).await.unwrap();
    assert_eq!((scheduler.waiting_count(), scheduler.processed_count()), (1, 0));

    scheduler.started(&a);
    assert_eq!((scheduler.waiting_count(), scheduler.processed_count()), (0, 1));

    scheduler.finished(&a);
    assert_eq!((scheduler.waiting_count(), scheduler.processed_count()), (0, 0));

    // Idempotent.
    scheduler.finished(&a);
    scheduler.started(&a);
    assert_eq!((scheduler.waiting_count(), scheduler.processed_count()), (0, 0));
}

#[tokio::test]
async fn test_cancelled_before_start_is_forgotten() {
    let (scheduler, _, _) = setup(&[("w1:42043", vec![1.0, 1000.0])]);
    let workers = worker_ids(&["w1:42043"]);

    let a = schedule(&scheduler, "a", 10_000, vec![0.6, 600.0], &workers).await.unwrap();
    scheduler.finished(&a);
    assert!(scheduler.in_flight().is_empty());

    let b = schedule(&scheduler, "b", 100, vec![0.6, 600.0], &workers).await.unwrap();
    assert_eq!(b.start_time, NOW + 1);
    assert_eq!(b.predecessor, None);
}

#[tokio::test]
async fn test_started_task_only_holds_until_its_end() {
    let (scheduler, query, clock) = setup(&[("w1:42043", vec![1.0, 1000.0])]);
    let workers = worker_ids(&["w1:42043"]);

    let a = schedule(&scheduler, "a", 500, vec![0.6, 600.0], &workers).await.unwrap();
    scheduler.started(&a);

    // Once running, a's usage shows up in the measured snapshot.
    clock.advance(100);
    query.set_free("w1:42043", vec![0.4, 400.0]);

    let b = schedule(&scheduler, "b", 100, vec![0.6, 600.0], &workers).await.unwrap();
    assert_eq!(b.start_time, a.end_time().unwrap());
    assert_eq!(b.predecessor, Some(a.id));

    let small = schedule(&scheduler, "small", 100, vec![0.4, 400.0], &workers).await.unwrap();
    assert_eq!(small.start_time, NOW + 101);
}

#[tokio::test]
async fn test_overdue_task_is_still_accounted() {
    let (scheduler, _, clock) = setup(&[("w1:42043", vec![1.0, 1000.0])]);
    let workers = worker_ids(&["w1:42043"]);

    let a = schedule(&scheduler, "a", 100_000, vec![0.6, 600.0], &workers).await.unwrap();

    // a should have started long ago; its start is pushed to now+1.
    clock.set(10_000);
    let b = schedule(&scheduler, "b", 100, vec![0.6, 600.0], &workers).await.unwrap();
    assert_eq!(b.start_time, a.end_time().unwrap());
    assert_eq!(b.predecessor, Some(a.id));
}

#[tokio::test]
async fn test_unknown_duration() {
    let (scheduler, _, _) = setup(&[
        ("w1:42043", vec![1.0, 1000.0]),
        ("w2:42043", vec![1.0, 1000.0]),
    ]);
    let both = worker_ids(&["w1:42043", "w2:42043"]);
    let single = worker_ids(&["w1:42043"]);

    let err = scheduler
        .schedule(
            Arc::new(remote_task("u")),
            TaskDuration::Unknown,
            ResourceVector::new(vec![0.1, 1.0]),
            &both,
        )
        .await
        .unwrap_err();
    assert!(err.is_scheduling_failure());

    let u = scheduler
        .schedule(
            Arc::new(remote_task("u")),
            TaskDuration::Unknown,
            ResourceVector::new(vec![0.6, 600.0]),
            &single,
        )
        .await
        .unwrap();
    assert_eq!(u.start_time, NOW + 1);

    // Never released, so only what is left over can ever be admitted.
    let small = schedule(&scheduler, "small", 100, vec![0.4, 400.0], &single).await.unwrap();
    assert_eq!(small.start_time, NOW + 1);
    assert!(schedule(&scheduler, "big", 100, vec![0.5, 500.0], &single)
        .await
        .unwrap_err()
        .is_scheduling_failure());
}

/// Deterministic pseudo-random source for the property test.
struct Lcg(u64);

impl Lcg {
    fn next_f64(&mut self) -> f64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        (self.0 >> 11) as f64 / (1u64 << 53) as f64
    }
}

#[tokio::test]
async fn test_accepted_schedules_never_overcommit() {
    let capacities = [
        ("w1:42043", vec![1.0, 1000.0]),
        ("w2:42043", vec![2.0, 500.0]),
        ("w3:42043", vec![0.5, 2000.0]),
    ];
    let (scheduler, _, _) = setup(&capacities);
    let workers = worker_ids(&["w1:42043", "w2:42043", "w3:42043"]);

    let mut rng = Lcg(42);
    let mut accepted = Vec::new();
    let mut rejected = 0;

    for i in 0..200 {
        // Binary fractions keep the running sums exact.
        let cpu = (rng.next_f64() * 1.2 * 64.0).round() / 64.0;
        let memory = (rng.next_f64() * 1200.0).round();
        let duration = 1 + (rng.next_f64() * 500.0) as u64;

        match schedule(&scheduler, &format!("t{i}"), duration, vec![cpu, memory], &workers).await {
            Ok(p) => accepted.push(p),
            Err(e) => {
                assert!(e.is_scheduling_failure());
                let fits_somewhere = capacities.iter().any(|(_, cap)| {
                    ResourceVector::new(vec![cpu, memory]).fits_within(&ResourceVector::new(cap.clone()))
                });
                assert!(!fits_somewhere, "t{i} [{cpu}, {memory}] fits an idle worker but was rejected");
                rejected += 1;
            }
        }
    }

    assert!(accepted.len() > 100);
    assert!(rejected > 0);
    assert!(accepted.iter().all(|p| p.start_time > NOW));

    let capacity_map: HashMap<WorkerId, ResourceVector> = capacities
        .iter()
        .map(|(w, cap)| (WorkerId::new(*w), ResourceVector::new(cap.clone())))
        .collect();
    let refs: Vec<&TaskPrediction> = accepted.iter().map(|p| p.as_ref()).collect();
    TestAssertions::assert_resource_safe(&refs, &capacity_map);
}
