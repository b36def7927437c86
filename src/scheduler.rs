//! Live control of the virtual user pool.
//!
//! Every tick the scheduler asks the [`StagePlan`] for the target concurrency
//! at the current elapsed time and converges the pool to it. Surplus users
//! are asked to stop and finish their iteration; they are never cancelled.

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::metrics::VIRTUAL_USERS_TARGET;
use crate::stages::StagePlan;
use crate::worker::StopSignal;

/// Pool state observed at the end of one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickSample {
    pub elapsed: Duration,
    pub target: usize,
    /// Users without a pending stop request
    pub active: usize,
    /// Users told to stop that are still finishing an iteration
    pub draining: usize,
    /// Tasks not yet finished (active + draining)
    pub live: usize,
}

/// What happened during one scheduled run.
#[derive(Debug, Clone, Default)]
pub struct ScheduleSummary {
    pub samples: Vec<TickSample>,
    pub peak_active: usize,
    pub peak_live: usize,
    /// Virtual users started over the whole run
    pub spawned: usize,
    /// Why the run stopped early, if it did
    pub aborted: Option<String>,
    pub elapsed: Duration,
}

struct VirtualUser {
    id: usize,
    stop: StopSignal,
    handle: JoinHandle<()>,
}

/// The live pool. Oldest users first in `active`.
#[derive(Default)]
struct Pool {
    active: Vec<VirtualUser>,
    draining: Vec<VirtualUser>,
    next_id: usize,
}

impl Pool {
    fn live(&self) -> usize {
        self.active.len() + self.draining.len()
    }

    /// Drop users whose task has ended.
    fn reap(&mut self) {
        let before = self.live();
        self.active.retain(|vu| !vu.handle.is_finished());
        self.draining.retain(|vu| !vu.handle.is_finished());
        let reaped = before - self.live();
        if reaped > 0 {
            debug!(reaped, "Reaped finished virtual users");
        }
    }

    /// Converge the number of active users to `target`.
    fn reconcile<F>(&mut self, target: usize, spawn: &mut F) -> (usize, usize, usize)
    where
        F: FnMut(usize, StopSignal) -> JoinHandle<()>,
    {
        let (mut revived, mut spawned, mut stopped) = (0, 0, 0);

        while self.active.len() < target {
            if let Some(vu) = self.draining.pop() {
                vu.stop.resume();
                self.active.push(vu);
                revived += 1;
            } else {
                let id = self.next_id;
                self.next_id += 1;
                let stop = StopSignal::new();
                let handle = spawn(id, stop.clone());
                self.active.push(VirtualUser { id, stop, handle });
                spawned += 1;
            }
        }

        while self.active.len() > target {
            if let Some(vu) = self.active.pop() {
                vu.stop.stop();
                debug!(vu_id = vu.id, "Signalled virtual user to stop");
                self.draining.push(vu);
                stopped += 1;
            }
        }

        (revived, spawned, stopped)
    }

    /// Signal everyone and wait until every task has ended.
    async fn drain(&mut self) {
        for vu in self.active.drain(..) {
            vu.stop.stop();
            self.draining.push(vu);
        }

        info!(
            draining = self.draining.len(),
            "Draining virtual users"
        );

        for vu in self.draining.drain(..) {
            if let Err(e) = vu.handle.await {
                if e.is_panic() {
                    error!(vu_id = vu.id, error = %e, "Virtual user panicked");
                }
            }
        }
    }
}

/// Drives a pool of virtual users along a [`StagePlan`].
#[derive(Debug, Clone)]
pub struct StageScheduler {
    plan: StagePlan,
    tick: Duration,
}

impl StageScheduler {
    pub fn new(plan: StagePlan, tick: Duration) -> Self {
        Self { plan, tick }
    }

    pub fn plan(&self) -> &StagePlan {
        &self.plan
    }

    /// Run the plan to completion, or until a reason arrives on `abort_rx`.
    ///
    /// `spawn` starts one virtual user observing the given stop signal. When
    /// this returns every spawned task has finished.
    pub async fn run<F>(
        &self,
        mut spawn: F,
        mut abort_rx: watch::Receiver<Option<String>>,
    ) -> ScheduleSummary
    where
        F: FnMut(usize, StopSignal) -> JoinHandle<()>,
    {
        let start = Instant::now();
        let total = self.plan.total_duration();
        let mut pool = Pool::default();
        let mut summary = ScheduleSummary::default();

        let mut interval = time::interval(self.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut abort_open = true;
        summary.aborted = abort_rx.borrow_and_update().clone();

        info!(
            stages = self.plan.stages().len(),
            total_secs = total.as_secs_f64(),
            max_target = self.plan.max_target(),
            tick_ms = self.tick.as_millis() as u64,
            "Stage scheduler starting"
        );

        while summary.aborted.is_none() {
            tokio::select! {
                _ = interval.tick() => {}
                changed = abort_rx.changed(), if abort_open => {
                    match changed {
                        Ok(()) => summary.aborted = abort_rx.borrow_and_update().clone(),
                        // Nobody can abort any more.
                        Err(_) => abort_open = false,
                    }
                    continue;
                }
            }

            let elapsed = start.elapsed();
            if elapsed >= total {
                break;
            }

            pool.reap();
            let target = self.plan.target_at(elapsed);
            let (revived, spawned, stopped) = pool.reconcile(target, &mut spawn);
            summary.spawned += spawned;
            VIRTUAL_USERS_TARGET.set(target as i64);

            if revived + spawned + stopped > 0 {
                debug!(
                    elapsed_secs = elapsed.as_secs_f64(),
                    target,
                    revived,
                    spawned,
                    stopped,
                    "Adjusted virtual users"
                );
            }

            let sample = TickSample {
                elapsed,
                target,
                active: pool.active.len(),
                draining: pool.draining.len(),
                live: pool.live(),
            };
            summary.peak_active = summary.peak_active.max(sample.active);
            summary.peak_live = summary.peak_live.max(sample.live);
            summary.samples.push(sample);
        }

        if let Some(reason) = &summary.aborted {
            warn!(
                reason = %reason,
                elapsed_secs = start.elapsed().as_secs_f64(),
                "Run aborted, draining early"
            );
        }

        VIRTUAL_USERS_TARGET.set(0);
        pool.drain().await;
        summary.elapsed = start.elapsed();

        info!(
            spawned = summary.spawned,
            peak_active = summary.peak_active,
            elapsed_secs = summary.elapsed.as_secs_f64(),
            "Stage scheduler finished"
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::{Interpolation, Stage};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Spawns users whose iterations take `iteration` and counts exits.
    fn dummy_spawner(
        iteration: Duration,
        exited: Arc<AtomicUsize>,
    ) -> impl FnMut(usize, StopSignal) -> JoinHandle<()> {
        move |_id, stop| {
            let exited = exited.clone();
            tokio::spawn(async move {
                while !stop.is_stopped() {
                    time::sleep(iteration).await;
                }
                exited.fetch_add(1, Ordering::SeqCst);
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_active_tracks_target_every_tick() {
        let plan = StagePlan::new(vec![
            Stage::new(Duration::from_secs(10), 20),
            Stage::new(Duration::from_secs(5), 20),
            Stage::new(Duration::from_secs(10), 0),
        ]);
        let scheduler = StageScheduler::new(plan.clone(), Duration::from_secs(1));
        let exited = Arc::new(AtomicUsize::new(0));
        let (_tx, rx) = watch::channel(None);

        let summary = scheduler
            .run(dummy_spawner(Duration::from_millis(700), exited.clone()), rx)
            .await;

        assert!(summary.samples.len() >= 24);
        for sample in &summary.samples {
            assert_eq!(sample.active, plan.target_at(sample.elapsed));
            assert!(sample.live <= plan.max_target());
        }
        assert_eq!(summary.peak_active, 20);
        assert!(summary.aborted.is_none());
        assert_eq!(exited.load(Ordering::SeqCst), summary.spawned);
    }

    #[tokio::test(start_paused = true)]
    async fn test_draining_users_are_revived_first() {
        let plan = StagePlan::new(vec![
            Stage::new(Duration::from_secs(10), 10),
            Stage::new(Duration::from_secs(10), 2),
            Stage::new(Duration::from_secs(10), 10),
        ])
        .with_interpolation(Interpolation::Step);
        let scheduler = StageScheduler::new(plan, Duration::from_secs(1));
        let exited = Arc::new(AtomicUsize::new(0));
        let (_tx, rx) = watch::channel(None);

        let summary = scheduler
            .run(dummy_spawner(Duration::from_secs(60), exited.clone()), rx)
            .await;

        assert_eq!(summary.spawned, 10);
        assert_eq!(summary.peak_live, 10);
        assert!(summary.samples.iter().any(|s| s.active == 2 && s.draining == 8));
        assert_eq!(exited.load(Ordering::SeqCst), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_drains_early() {
        let plan = StagePlan::new(vec![Stage::new(Duration::from_secs(600), 5)])
            .with_interpolation(Interpolation::Step);
        let scheduler = StageScheduler::new(plan, Duration::from_secs(1));
        let exited = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = watch::channel(None);

        tokio::spawn(async move {
            time::sleep(Duration::from_secs(5)).await;
            tx.send_replace(Some("threshold failed".to_string()));
        });

        let summary = scheduler
            .run(dummy_spawner(Duration::from_millis(500), exited.clone()), rx)
            .await;

        assert_eq!(summary.aborted.as_deref(), Some("threshold failed"));
        assert!(summary.elapsed < Duration::from_secs(10));
        assert_eq!(exited.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_abort_sender_does_not_stop_run() {
        let plan = StagePlan::new(vec![Stage::new(Duration::from_secs(3), 1)])
            .with_interpolation(Interpolation::Step);
        let scheduler = StageScheduler::new(plan, Duration::from_secs(1));
        let exited = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = watch::channel(None);
        drop(tx);

        let summary = scheduler
            .run(dummy_spawner(Duration::from_millis(100), exited.clone()), rx)
            .await;

        assert!(summary.aborted.is_none());
        assert!(summary.elapsed >= Duration::from_secs(3));
        assert_eq!(summary.spawned, 1);
    }
}
