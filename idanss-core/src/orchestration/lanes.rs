use std::{collections::VecDeque, fmt, future::Future, panic::AssertUnwindSafe, sync::Arc};

use dashmap::{DashMap, mapref::entry::Entry};
use futures::{FutureExt, future::BoxFuture};
use tokio::sync::{OwnedSemaphorePermit, oneshot};
use tracing::{trace, warn};

struct LaneJob {
    // Mutex only makes the queued future `Sync` so the lane map can be shared.
    task: std::sync::Mutex<BoxFuture<'static, ()>>,
    // Held until the job has run so queued work counts against the pool.
    _permit: Option<OwnedSemaphorePermit>,
}

type Lanes = DashMap<String, VecDeque<LaneJob>>;

/// Runs work for one scan id strictly in submission order while work for
/// different ids proceeds concurrently.
///
/// A lane exists only while it has queued work. The first submission for an
/// idle id spawns a drainer task; later submissions join its queue. Queue
/// pushes and the drainer's final removal both happen under the map entry
/// lock, so a job is never stranded in a lane nobody drains.
#[derive(Clone, Default)]
pub struct ScanLanes {
    lanes: Arc<Lanes>,
}

impl fmt::Debug for ScanLanes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanLanes")
            .field("active", &self.lanes.len())
            .finish()
    }
}

impl ScanLanes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `task` behind earlier work for `scan_id`. Work without an id
    /// has nothing to be ordered against and is spawned directly.
    pub fn submit<F>(&self, scan_id: Option<&str>, permit: Option<OwnedSemaphorePermit>, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let job = LaneJob {
            task: std::sync::Mutex::new(task.boxed()),
            _permit: permit,
        };

        let Some(scan_id) = scan_id else {
            tokio::spawn(async move {
                let LaneJob { task, _permit } = job;
                task.into_inner().unwrap_or_else(|e| e.into_inner()).await;
            });
            return;
        };

        match self.lanes.entry(scan_id.to_string()) {
            Entry::Occupied(mut lane) => {
                lane.get_mut().push_back(job);
                trace!(target: "scan::dispatch", %scan_id, queued = lane.get().len(), "joined scan lane");
            }
            Entry::Vacant(slot) => {
                slot.insert(VecDeque::from([job]));
                tokio::spawn(drain(Arc::clone(&self.lanes), scan_id.to_string()));
            }
        }
    }

    /// Runs `task` in the lane for `scan_id` and waits for its output.
    ///
    /// Returns `None` if the task panicked.
    pub async fn run<F, T>(&self, scan_id: &str, task: F) -> Option<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.submit(Some(scan_id), None, async move {
            let _ = tx.send(task.await);
        });
        rx.await.ok()
    }

    /// Number of scan ids with queued or running work.
    pub fn len(&self) -> usize {
        self.lanes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lanes.is_empty()
    }
}

async fn drain(lanes: Arc<Lanes>, scan_id: String) {
    loop {
        let next = match lanes.entry(scan_id.clone()) {
            Entry::Occupied(mut lane) => match lane.get_mut().pop_front() {
                Some(job) => Some(job),
                None => {
                    lane.remove();
                    None
                }
            },
            Entry::Vacant(_) => None,
        };

        let Some(LaneJob { task, _permit }) = next else {
            break;
        };
        // A popped job keeps the lane alive until the next pop finds it empty.
        if AssertUnwindSafe(task.into_inner().unwrap_or_else(|e| e.into_inner())).catch_unwind().await.is_err() {
            warn!(target: "scan::dispatch", %scan_id, "scan handler panicked, continuing with the next message");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::{Mutex, Semaphore};

    use super::*;

    #[tokio::test]
    async fn same_scan_runs_in_submission_order() {
        let lanes = ScanLanes::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..50u64 {
            let seen = Arc::clone(&seen);
            lanes.submit(Some("s1"), None, async move {
                // Earlier jobs sleep longer; only queueing keeps the order.
                tokio::time::sleep(Duration::from_millis((50 - i) % 7)).await;
                seen.lock().await.push(i);
            });
        }

        let done = lanes.run("s1", async {}).await;
        assert_eq!(done, Some(()));
        assert_eq!(*seen.lock().await, (0..50).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn different_scans_do_not_wait_for_each_other() {
        let lanes = ScanLanes::new();
        let (release, blocked) = oneshot::channel::<()>();
        lanes.submit(Some("slow"), None, async move {
            let _ = blocked.await;
        });

        let other = tokio::time::timeout(Duration::from_millis(200), lanes.run("fast", async { 7 }))
            .await
            .expect("independent lane");
        assert_eq!(other, Some(7));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(lanes.len(), 1);

        release.send(()).unwrap();
        lanes.run("slow", async {}).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(lanes.is_empty());
    }

    #[tokio::test]
    async fn panicking_job_does_not_stall_the_lane() {
        let lanes = ScanLanes::new();
        lanes.submit(Some("s1"), None, async { panic!("handler bug") });

        let after = tokio::time::timeout(Duration::from_secs(1), lanes.run("s1", async { "next" }))
            .await
            .expect("lane keeps draining");
        assert_eq!(after, Some("next"));
    }

    #[tokio::test]
    async fn permits_are_held_until_the_job_ran() {
        let lanes = ScanLanes::new();
        let pool = Arc::new(Semaphore::new(2));
        let (release, blocked) = oneshot::channel::<()>();

        let first = Arc::clone(&pool).acquire_owned().await.unwrap();
        lanes.submit(Some("s1"), Some(first), async move {
            let _ = blocked.await;
        });
        let second = Arc::clone(&pool).acquire_owned().await.unwrap();
        lanes.submit(Some("s1"), Some(second), async {});
        assert_eq!(pool.available_permits(), 0);

        release.send(()).unwrap();
        let all = tokio::time::timeout(Duration::from_secs(1), pool.acquire_many(2))
            .await
            .expect("permits returned");
        assert!(all.is_ok());
    }
}
