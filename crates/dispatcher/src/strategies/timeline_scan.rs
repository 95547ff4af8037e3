//! Free-resource timeline construction and the admission scan.
//!
//! Pure functions over snapshots and predictions so the scan can be tested
//! without a resource source or a clock.

use std::collections::BTreeMap;

use balancer_core::{ResourceVector, TaskDuration, TaskId, TaskPrediction, WorkerSnapshot};

/// Resource change caused by one task starting or ending.
#[derive(Debug, Clone)]
pub(crate) struct ResourceEvent {
    pub timestamp: u64,
    pub delta: ResourceVector,
    pub task: TaskId,
    pub releases: bool,
}

/// Events a committed task will still cause after `now`.
///
/// A started task already holds its resources, so only the release remains.
/// Events never land before `now + 1`, which keeps them after every baseline.
pub(crate) fn task_events(prediction: &TaskPrediction, started: bool, now: u64) -> Vec<ResourceEvent> {
    let earliest = now.saturating_add(1);
    let mut events = Vec::with_capacity(2);

    if !started {
        events.push(ResourceEvent {
            timestamp: prediction.start_time.max(earliest),
            delta: prediction.resources.negated(),
            task: prediction.id,
            releases: false,
        });
    }

    if let Some(end) = prediction.end_time() {
        events.push(ResourceEvent {
            timestamp: end.max(earliest),
            delta: prediction.resources.clone(),
            task: prediction.id,
            releases: true,
        });
    }

    events
}

#[derive(Default)]
struct MergedEvent {
    delta: ResourceVector,
    cause: Option<TaskId>,
    releases: bool,
}

/// Cumulative timeline of one worker: its baseline followed by one entry per
/// distinct event timestamp.
///
/// Events sharing a timestamp are merged. The merged entry names a releasing
/// task as its cause when there is one, since that is the task a newcomer
/// would have to wait for.
pub(crate) fn worker_timeline(
    baseline: &WorkerSnapshot,
    events: impl IntoIterator<Item = ResourceEvent>,
) -> Vec<WorkerSnapshot> {
    let mut merged: BTreeMap<u64, MergedEvent> = BTreeMap::new();
    for event in events {
        let slot = merged.entry(event.timestamp).or_default();
        slot.delta = slot.delta.add(&event.delta);
        if event.releases || !slot.releases {
            slot.cause = Some(event.task);
        }
        slot.releases |= event.releases;
    }

    let mut timeline = Vec::with_capacity(merged.len() + 1);
    timeline.push(baseline.clone());

    let mut free = baseline.free_resources.clone();
    for (timestamp, event) in merged {
        debug_assert!(
            timestamp > baseline.timestamp,
            "timeline event at {timestamp} precedes the baseline of {}",
            baseline.worker
        );
        free = free.add(&event.delta);
        timeline.push(WorkerSnapshot {
            timestamp,
            worker: baseline.worker.clone(),
            free_resources: free.clone(),
            causing_task: event.cause,
        });
    }

    timeline
}

/// Position of one entry inside the per-worker timelines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EntryRef {
    pub worker: usize,
    pub entry: usize,
}

/// All entries ordered by timestamp, then by worker position.
pub(crate) fn flatten(timelines: &[Vec<WorkerSnapshot>]) -> Vec<EntryRef> {
    let mut order: Vec<(u64, EntryRef)> = timelines
        .iter()
        .enumerate()
        .flat_map(|(worker, timeline)| {
            timeline
                .iter()
                .enumerate()
                .map(move |(entry, snapshot)| (snapshot.timestamp, EntryRef { worker, entry }))
        })
        .collect();
    order.sort_by_key(|(timestamp, entry)| (*timestamp, entry.worker, entry.entry));
    order.into_iter().map(|(_, entry)| entry).collect()
}

/// Accepted admission point.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Slot {
    pub at: EntryRef,
    pub start: u64,
    pub predecessor: Option<TaskId>,
}

/// Earliest entry from which `request` fits for the whole `duration`.
///
/// For each candidate entry the worker's following entries are checked in
/// order. An entry without enough free resources abandons the candidate;
/// reaching the worker's last entry, or an entry at or after the task's end,
/// accepts it. Start times are clamped to `now + 1`.
pub(crate) fn find_slot(
    timelines: &[Vec<WorkerSnapshot>],
    request: &ResourceVector,
    duration: TaskDuration,
    now: u64,
) -> Option<Slot> {
    let earliest = now.saturating_add(1);

    for candidate in flatten(timelines) {
        let timeline = &timelines[candidate.worker];
        let start = timeline[candidate.entry].timestamp.max(earliest);

        for j in candidate.entry..timeline.len() {
            if !request.fits_within(&timeline[j].free_resources) {
                break;
            }

            let fits_until_next = match (timeline.get(j + 1), duration) {
                (None, _) => true,
                (Some(next), TaskDuration::Known(d)) => start.saturating_add(d) <= next.timestamp,
                (Some(_), TaskDuration::Unknown) => false,
            };

            if fits_until_next {
                return Some(Slot {
                    at: candidate,
                    start,
                    predecessor: timeline[candidate.entry].causing_task,
                });
            }
        }
    }

    None
}
