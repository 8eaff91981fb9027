// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Debounced lint scheduling.
//!
//! Edits add their path to a queue and (re)arm a single delayed task.
//! When the task fires it drains the whole queue and hands it to a
//! [`LintPass`]. Open and save use the immediate path, which replaces any
//! pending delayed task with a zero-delay one.
//!
//! The queue, the running pass and the pending task slot live under one
//! mutex. Every armed task and every pass carries a ticket from one
//! increasing counter. A fired task only proceeds if its ticket is still
//! current, so a superseded task that slipped past `abort` is a no-op.
//! A running pass is never aborted; paths queued while it runs are picked
//! up by a follow-up pass armed when it finishes.
//!
//! A ticket is settled once its pass has published, or once its task was
//! superseded or found nothing to do. Tickets settle in order, so waiters
//! only need the highest settled ticket.

use std::collections::BTreeSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Work performed for each drained batch.
pub trait LintPass: Send + Sync + 'static {
    /// Compiles `paths` and publishes the results. Must not return before
    /// publication is complete.
    fn run(&self, paths: Vec<PathBuf>) -> impl Future<Output = ()> + Send;
}

#[derive(Debug)]
struct SchedulerState {
    queue: BTreeSet<PathBuf>,
    /// Ticket of the pass executing right now.
    running: Option<u64>,
    /// Delayed task and its ticket.
    pending: Option<(u64, JoinHandle<()>)>,
    /// Last ticket handed out.
    ticket: u64,
    delay: Duration,
    flush_requested: bool,
}

impl SchedulerState {
    /// Ticket of the armed or running pass, if any.
    fn outstanding(&self) -> Option<u64> {
        self.running
            .or_else(|| self.pending.as_ref().map(|(ticket, _)| *ticket))
    }
}

/// Coalesces lint requests into debounced batch passes.
pub struct LintScheduler<P> {
    state: Mutex<SchedulerState>,
    pass: P,
    settled: watch::Sender<u64>,
    runtime: Handle,
}

impl<P: LintPass> LintScheduler<P> {
    /// Creates a scheduler with the given debounce window.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    #[must_use]
    pub fn new(pass: P, delay: Duration) -> Arc<Self> {
        let (settled, _) = watch::channel(0);
        Arc::new(Self {
            state: Mutex::new(SchedulerState {
                queue: BTreeSet::new(),
                running: None,
                pending: None,
                ticket: 0,
                delay,
                flush_requested: false,
            }),
            pass,
            settled,
            runtime: Handle::current(),
        })
    }

    /// The pass this scheduler drives.
    pub const fn pass(&self) -> &P {
        &self.pass
    }

    /// Queues `path` and restarts the debounce window.
    ///
    /// While a pass is running nothing is armed; the path is picked up by
    /// the follow-up pass scheduled when the running one finishes.
    pub fn enqueue(self: &Arc<Self>, path: PathBuf) {
        let mut state = self.lock();
        trace!("Lint queued: {}", path.display());
        state.queue.insert(path);
        if state.running.is_some() {
            return;
        }
        let delay = if state.flush_requested {
            Duration::ZERO
        } else {
            state.delay
        };
        self.arm(&mut state, delay);
    }

    /// Queues `path` and runs a pass without waiting for the debounce
    /// window, replacing any pending delayed task.
    pub fn enqueue_and_flush_now(self: &Arc<Self>, path: PathBuf) {
        let mut state = self.lock();
        trace!("Lint flush: {}", path.display());
        state.queue.insert(path);
        state.flush_requested = true;
        if state.running.is_some() {
            return;
        }
        self.arm(&mut state, Duration::ZERO);
    }

    /// Waits until the pass that is armed or running at the time of the
    /// call has published, or its armed task was superseded.
    ///
    /// Returns immediately when the scheduler is idle. Passes armed after
    /// the call are not waited for. Never arms or fires anything itself.
    pub async fn wait_for_pending_lint(&self) {
        let mut settled = self.settled.subscribe();
        let Some(ticket) = self.lock().outstanding() else {
            return;
        };
        trace!("Waiting for lint ticket {ticket}");
        // The sender lives as long as `self`, so this cannot fail
        let _ = settled.wait_for(|settled| *settled >= ticket).await;
    }

    /// Drains the queue and runs a pass now, cancelling any pending task.
    ///
    /// Does nothing if a pass is already running or the queue is empty.
    pub async fn drain_and_run(self: &Arc<Self>) {
        self.drain(None).await;
    }

    /// Drops `path` from the queue.
    pub fn forget(&self, path: &Path) {
        if self.lock().queue.remove(path) {
            trace!("Lint dequeued: {}", path.display());
        }
    }

    /// Changes the debounce window. A pending delayed task is re-armed with
    /// the new window; queued paths are kept.
    pub fn set_delay(self: &Arc<Self>, delay: Duration) {
        let mut state = self.lock();
        debug!("Lint debounce set to {delay:?}");
        state.delay = delay;
        if state.pending.is_some() && !state.flush_requested {
            self.arm(&mut state, delay);
        }
    }

    /// Current debounce window.
    #[must_use]
    pub fn delay(&self) -> Duration {
        self.lock().delay
    }

    /// Paths waiting for the next pass, sorted.
    #[must_use]
    pub fn queued(&self) -> Vec<PathBuf> {
        self.lock().queue.iter().cloned().collect()
    }

    /// Whether a pass is executing right now.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.lock().running.is_some()
    }

    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Marks every ticket up to `ticket` as settled. Called with the state
    /// lock held so waiters never read a stale outstanding ticket.
    fn settle(&self, ticket: u64) {
        self.settled.send_if_modified(|settled| {
            if ticket > *settled {
                *settled = ticket;
                true
            } else {
                false
            }
        });
    }

    /// Aborts the pending task, if any, and settles its ticket.
    fn cancel_pending(&self, state: &mut SchedulerState) {
        if let Some((ticket, pending)) = state.pending.take() {
            pending.abort();
            self.settle(ticket);
        }
    }

    /// Replaces the pending task with one that fires after `delay`.
    fn arm(self: &Arc<Self>, state: &mut SchedulerState, delay: Duration) {
        self.cancel_pending(state);
        state.ticket += 1;
        let ticket = state.ticket;
        let this = Arc::clone(self);
        let task = self.runtime.spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            this.drain(Some(ticket)).await;
        });
        state.pending = Some((ticket, task));
    }

    async fn drain(self: &Arc<Self>, fired: Option<u64>) {
        let (paths, ticket) = {
            let mut state = self.lock();
            let ticket = match fired {
                Some(ticket) => {
                    if state.pending.as_ref().map(|(current, _)| *current) != Some(ticket) {
                        trace!("Superseded lint task skipped");
                        return;
                    }
                    // This task owns the slot; drop the handle without aborting
                    state.pending = None;
                    if state.running.is_some() || state.queue.is_empty() {
                        self.settle(ticket);
                        return;
                    }
                    ticket
                }
                None => {
                    self.cancel_pending(&mut state);
                    if state.running.is_some() || state.queue.is_empty() {
                        return;
                    }
                    state.ticket += 1;
                    state.ticket
                }
            };

            state.running = Some(ticket);
            state.flush_requested = false;
            (std::mem::take(&mut state.queue).into_iter().collect::<Vec<_>>(), ticket)
        };

        debug!("Lint pass {ticket} starting for {} file(s)", paths.len());
        let guard = PassGuard {
            scheduler: Arc::clone(self),
            ticket,
        };
        self.pass.run(paths).await;
        drop(guard);
    }

    fn finish_pass(self: &Arc<Self>, ticket: u64) {
        let mut state = self.lock();
        state.running = None;
        self.settle(ticket);
        if !state.queue.is_empty() && state.pending.is_none() {
            let delay = if state.flush_requested {
                Duration::ZERO
            } else {
                state.delay
            };
            debug!("{} file(s) queued during pass, re-arming", state.queue.len());
            self.arm(&mut state, delay);
        }
    }
}

/// Settles a pass's ticket when it ends, including by panic.
struct PassGuard<P: LintPass> {
    scheduler: Arc<LintScheduler<P>>,
    ticket: u64,
}

impl<P: LintPass> Drop for PassGuard<P> {
    fn drop(&mut self) {
        self.scheduler.finish_pass(self.ticket);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Semaphore;
    use tokio::time::{Instant, sleep};

    const DEBOUNCE: Duration = Duration::from_millis(300);

    /// Records every batch; optionally blocks each pass until a permit is added.
    #[derive(Default)]
    struct RecordingPass {
        batches: Mutex<Vec<Vec<PathBuf>>>,
        gate: Option<Arc<Semaphore>>,
    }

    impl RecordingPass {
        fn gated(gate: Arc<Semaphore>) -> Self {
            Self {
                batches: Mutex::default(),
                gate: Some(gate),
            }
        }

        fn batches(&self) -> Vec<Vec<PathBuf>> {
            self.batches
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }
    }

    impl LintPass for RecordingPass {
        #[allow(clippy::panic, reason = "exercises the pass guard on unwind")]
        async fn run(&self, paths: Vec<PathBuf>) {
            if let Some(gate) = &self.gate
                && let Ok(permit) = gate.acquire().await
            {
                permit.forget();
            }
            if paths.iter().any(|p| p.ends_with("boom.sx")) {
                panic!("compiler exploded");
            }
            self.batches
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(paths);
        }
    }

    fn p(name: &str) -> PathBuf {
        PathBuf::from("/ws").join(name)
    }

    #[tokio::test(start_paused = true)]
    async fn test_rapid_edits_coalesce_into_one_pass() {
        let scheduler = LintScheduler::new(RecordingPass::default(), DEBOUNCE);

        scheduler.enqueue(p("a.sx"));
        sleep(Duration::from_millis(200)).await;
        scheduler.enqueue(p("a.sx"));
        scheduler.enqueue(p("b.sx"));
        sleep(Duration::from_millis(200)).await;
        scheduler.enqueue(p("a.sx"));

        // 400ms after the first edit: the window keeps restarting
        assert!(scheduler.pass().batches().is_empty());

        scheduler.wait_for_pending_lint().await;
        assert_eq!(scheduler.pass().batches(), vec![vec![p("a.sx"), p("b.sx")]]);

        sleep(Duration::from_secs(2)).await;
        assert_eq!(scheduler.pass().batches().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_preempts_pending_delayed_task() {
        let scheduler = LintScheduler::new(RecordingPass::default(), DEBOUNCE);
        let start = Instant::now();

        scheduler.enqueue(p("a.sx"));
        scheduler.enqueue_and_flush_now(p("b.sx"));
        scheduler.wait_for_pending_lint().await;

        assert!(start.elapsed() < DEBOUNCE);
        assert_eq!(scheduler.pass().batches(), vec![vec![p("a.sx"), p("b.sx")]]);

        // The superseded delayed task never produces a second pass
        sleep(Duration::from_secs(1)).await;
        assert_eq!(scheduler.pass().batches().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_returns_immediately_when_idle() {
        let scheduler = LintScheduler::new(RecordingPass::default(), Duration::from_secs(60));
        let start = Instant::now();
        scheduler.wait_for_pending_lint().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert!(scheduler.pass().batches().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_blocks_until_running_pass_completes() {
        let gate = Arc::new(Semaphore::new(0));
        let scheduler = LintScheduler::new(RecordingPass::gated(gate.clone()), DEBOUNCE);

        scheduler.enqueue_and_flush_now(p("a.sx"));
        sleep(Duration::from_millis(10)).await;
        assert!(scheduler.is_running());

        let waiter = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.wait_for_pending_lint().await })
        };
        sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        gate.add_permits(1);
        assert!(waiter.await.is_ok());
        assert_eq!(scheduler.pass().batches(), vec![vec![p("a.sx")]]);
        assert!(!scheduler.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_edits_during_pass_run_in_follow_up_pass() {
        let gate = Arc::new(Semaphore::new(0));
        let scheduler = LintScheduler::new(RecordingPass::gated(gate.clone()), DEBOUNCE);

        scheduler.enqueue_and_flush_now(p("a.sx"));
        sleep(Duration::from_millis(10)).await;
        assert!(scheduler.is_running());

        scheduler.enqueue(p("b.sx"));
        scheduler.drain_and_run().await;
        assert_eq!(scheduler.queued(), vec![p("b.sx")]);

        gate.add_permits(2);
        scheduler.wait_for_pending_lint().await;
        assert_eq!(scheduler.pass().batches(), vec![vec![p("a.sx")]]);

        // The follow-up pass is armed once the first one ends
        scheduler.wait_for_pending_lint().await;
        assert_eq!(
            scheduler.pass().batches(),
            vec![vec![p("a.sx")], vec![p("b.sx")]]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_during_pass_runs_follow_up_without_delay() {
        let gate = Arc::new(Semaphore::new(0));
        let scheduler = LintScheduler::new(RecordingPass::gated(gate.clone()), DEBOUNCE);

        scheduler.enqueue_and_flush_now(p("a.sx"));
        sleep(Duration::from_millis(10)).await;
        assert!(scheduler.is_running());

        scheduler.enqueue(p("b.sx"));
        scheduler.enqueue_and_flush_now(p("c.sx"));
        gate.add_permits(2);
        scheduler.wait_for_pending_lint().await;

        let released = Instant::now();
        scheduler.wait_for_pending_lint().await;
        assert!(released.elapsed() < DEBOUNCE);
        assert_eq!(
            scheduler.pass().batches(),
            vec![vec![p("a.sx")], vec![p("b.sx"), p("c.sx")]]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_is_bounded_by_the_pass_it_joined() {
        let gate = Arc::new(Semaphore::new(0));
        let scheduler = LintScheduler::new(RecordingPass::gated(gate.clone()), DEBOUNCE);

        scheduler.enqueue_and_flush_now(p("a.sx"));
        sleep(Duration::from_millis(10)).await;
        assert!(scheduler.is_running());

        let waiter = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.wait_for_pending_lint().await })
        };
        scheduler.enqueue(p("b.sx"));
        gate.add_permits(100);

        // Keep typing well past the first pass
        for _ in 0..15 {
            sleep(Duration::from_millis(200)).await;
            scheduler.enqueue(p("b.sx"));
        }

        assert!(waiter.is_finished());
        assert_eq!(scheduler.pass().batches(), vec![vec![p("a.sx")]]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_returns_when_armed_task_is_superseded() {
        let scheduler = LintScheduler::new(RecordingPass::default(), Duration::from_secs(60));

        scheduler.enqueue(p("a.sx"));
        let waiter = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.wait_for_pending_lint().await })
        };
        sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        scheduler.enqueue(p("a.sx"));
        sleep(Duration::from_millis(10)).await;
        assert!(waiter.is_finished());
        assert!(scheduler.pass().batches().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_pass_still_settles() {
        let scheduler = LintScheduler::new(RecordingPass::default(), DEBOUNCE);

        scheduler.enqueue_and_flush_now(p("boom.sx"));
        scheduler.wait_for_pending_lint().await;
        assert!(!scheduler.is_running());

        scheduler.enqueue_and_flush_now(p("a.sx"));
        scheduler.wait_for_pending_lint().await;
        assert_eq!(scheduler.pass().batches(), vec![vec![p("a.sx")]]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_delay_rearms_without_losing_paths() {
        let scheduler = LintScheduler::new(RecordingPass::default(), DEBOUNCE);

        scheduler.enqueue(p("a.sx"));
        sleep(Duration::from_millis(100)).await;
        scheduler.set_delay(Duration::from_secs(1));
        assert_eq!(scheduler.delay(), Duration::from_secs(1));

        sleep(Duration::from_millis(500)).await;
        assert!(scheduler.pass().batches().is_empty());
        assert_eq!(scheduler.queued(), vec![p("a.sx")]);

        sleep(Duration::from_millis(700)).await;
        assert_eq!(scheduler.pass().batches(), vec![vec![p("a.sx")]]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_forget_removes_queued_path() {
        let scheduler = LintScheduler::new(RecordingPass::default(), DEBOUNCE);

        scheduler.enqueue(p("a.sx"));
        scheduler.enqueue(p("b.sx"));
        scheduler.forget(&p("a.sx"));
        scheduler.wait_for_pending_lint().await;

        assert_eq!(scheduler.pass().batches(), vec![vec![p("b.sx")]]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_and_run_cancels_pending_timer() {
        let scheduler = LintScheduler::new(RecordingPass::default(), DEBOUNCE);

        scheduler.enqueue(p("a.sx"));
        scheduler.drain_and_run().await;
        assert_eq!(scheduler.pass().batches(), vec![vec![p("a.sx")]]);

        scheduler.wait_for_pending_lint().await;
        sleep(Duration::from_secs(1)).await;
        assert_eq!(scheduler.pass().batches().len(), 1);
    }
}
