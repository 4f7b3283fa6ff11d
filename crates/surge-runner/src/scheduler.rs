//! Virtual-user scheduler
//!
//! Every tick the scheduler reads the profile's target concurrency and
//! spawns or retires virtual users to match. Each virtual user is a tokio
//! task repeating the iteration cycle until it is told to stop or the run
//! budget is spent. Retired users finish their in-flight call first and are
//! joined on a later tick.

use rand::rngs::StdRng;
use rand::SeedableRng;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use surge_core::metrics::{ACTIVE_VUS, TARGET_VUS};
use surge_core::{IterationEngine, LoadProfile, ScenarioConfig};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Live view of a running schedule, published once per tick.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Progress {
    pub elapsed: Duration,
    pub budget: Duration,
    pub target_vus: u32,
    pub active_vus: u32,
    pub iterations: u64,
}

/// Why the scheduler stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The whole profile ran
    Completed,
    /// `max_duration` cut the profile short
    Budget,
    /// The shutdown future resolved
    Shutdown,
}

/// What the scheduler did.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerReport {
    pub elapsed: Duration,
    pub iterations: u64,
    pub peak_vus: u32,
    pub spawned_vus: u64,
    /// Virtual users joined before the run ended
    pub reaped_vus: u64,
    pub stop_reason: StopReason,
}

/// Scales virtual users to a [`LoadProfile`].
pub struct VuScheduler {
    engine: Arc<IterationEngine>,
    profile: LoadProfile,
    budget: Duration,
    tick_interval: Duration,
    seed: Option<u64>,
    progress: Option<watch::Sender<Progress>>,
}

impl VuScheduler {
    pub fn new(engine: Arc<IterationEngine>, scenario: &ScenarioConfig) -> Self {
        Self {
            engine,
            profile: scenario.profile.clone(),
            budget: scenario.run_budget(),
            tick_interval: scenario.tick_interval,
            seed: scenario.seed,
            progress: None,
        }
    }

    /// Publish a [`Progress`] snapshot every tick.
    pub fn with_progress(mut self, progress: watch::Sender<Progress>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Drive the profile until the budget is spent or `shutdown` resolves.
    pub async fn run<F>(&self, shutdown: F) -> SchedulerReport
    where
        F: Future<Output = ()>,
    {
        let start = Instant::now();
        let iterations = Arc::new(AtomicU64::new(0));
        let mut ticker = interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut tasks = JoinSet::new();
        let mut active: Vec<watch::Sender<bool>> = Vec::new();
        let mut spawned: u64 = 0;
        let mut reaped: u64 = 0;
        let mut peak: u32 = 0;
        let mut last_target: Option<u32> = None;

        info!(
            budget_secs = self.budget.as_secs_f64(),
            peak_target = self.profile.peak_target(),
            "Scheduler started"
        );

        tokio::pin!(shutdown);

        let stop_reason = loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = &mut shutdown => {
                    info!("Shutdown requested, stopping virtual users");
                    break StopReason::Shutdown;
                }
            }

            let elapsed = start.elapsed();
            if elapsed >= self.budget {
                break self.budget_reason();
            }

            let target = self.profile.target_at(elapsed);
            if last_target != Some(target) {
                debug!(
                    elapsed_secs = elapsed.as_secs_f64(),
                    target,
                    "Target concurrency changed"
                );
                last_target = Some(target);
            }
            TARGET_VUS.set(i64::from(target));

            while active.len() < target as usize {
                let (stop_tx, stop_rx) = watch::channel(false);
                let vu = VirtualUser {
                    engine: Arc::clone(&self.engine),
                    start,
                    budget: self.budget,
                    rng: self.rng_for(spawned),
                    stop: stop_rx,
                    iterations: Arc::clone(&iterations),
                };
                tasks.spawn(vu.run());
                active.push(stop_tx);
                spawned += 1;
            }

            while active.len() > target as usize {
                if let Some(stop) = active.pop() {
                    let _ = stop.send(true);
                }
            }

            while let Some(result) = tasks.try_join_next() {
                reaped += 1;
                if let Err(e) = result {
                    warn!(error = %e, "Virtual user task failed");
                }
            }

            let active_vus = active.len() as u32;
            ACTIVE_VUS.set(i64::from(active_vus));
            peak = peak.max(active_vus);

            if let Some(progress) = &self.progress {
                progress.send_replace(Progress {
                    elapsed,
                    budget: self.budget,
                    target_vus: target,
                    active_vus,
                    iterations: iterations.load(Ordering::Relaxed),
                });
            }
        };

        for stop in active.drain(..) {
            let _ = stop.send(true);
        }
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                warn!(error = %e, "Virtual user task failed");
            }
        }
        ACTIVE_VUS.set(0);
        TARGET_VUS.set(0);

        let report = SchedulerReport {
            elapsed: start.elapsed(),
            iterations: iterations.load(Ordering::Relaxed),
            peak_vus: peak,
            spawned_vus: spawned,
            reaped_vus: reaped,
            stop_reason,
        };

        info!(
            elapsed_secs = report.elapsed.as_secs_f64(),
            iterations = report.iterations,
            peak_vus = report.peak_vus,
            reason = ?report.stop_reason,
            "Scheduler stopped"
        );

        report
    }

    fn budget_reason(&self) -> StopReason {
        if self.budget < self.profile.total_duration() {
            StopReason::Budget
        } else {
            StopReason::Completed
        }
    }

    fn rng_for(&self, vu_index: u64) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(vu_index)),
            None => StdRng::from_entropy(),
        }
    }
}

/// One virtual user: its own RNG, its own stop flag.
struct VirtualUser {
    engine: Arc<IterationEngine>,
    start: Instant,
    budget: Duration,
    rng: StdRng,
    stop: watch::Receiver<bool>,
    iterations: Arc<AtomicU64>,
}

impl VirtualUser {
    async fn run(mut self) {
        let mut iteration: u64 = 0;

        loop {
            if *self.stop.borrow() {
                break;
            }
            let elapsed = self.start.elapsed();
            if elapsed >= self.budget {
                break;
            }

            let report = self
                .engine
                .run_once(elapsed, iteration, &mut self.rng)
                .await;
            self.iterations.fetch_add(1, Ordering::Relaxed);
            iteration += 1;

            if let Some(delay) = report.delay {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = self.stop.changed() => break,
                }
            }
        }
    }
}
