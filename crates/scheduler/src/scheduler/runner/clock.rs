//! The clock thread: one OS thread per started scheduler, hosting a
//! current-thread tokio runtime that turns an interval timer into dispatch
//! passes.
//!
//! Overrun policy comes from `MissedTickBehavior::Skip`: when a dispatch
//! outlasts the interval, one late tick fires right away and the remaining
//! missed ticks are dropped.

use std::sync::Arc;
use std::sync::mpsc::{SyncSender, sync_channel};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::error::SchedulerError;

use super::core::Shared;

/// Control messages, only observed between dispatch passes.
enum Command {
    /// Fire ticks every `interval`, replacing any current timer.
    Run {
        interval: Duration,
        ack: SyncSender<()>,
    },
    /// Stop firing ticks; the thread stays alive.
    Pause { ack: SyncSender<()> },
}

/// Owning handle to a running clock thread.
pub(super) struct ClockHandle {
    commands: mpsc::UnboundedSender<Command>,
    thread: JoinHandle<()>,
}

impl ClockHandle {
    /// Spawn a paused clock thread named `name`.
    pub(super) fn spawn(shared: Arc<Shared>, name: &str) -> Result<Self, SchedulerError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()?;
        let (commands, rx) = mpsc::unbounded_channel();

        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || runtime.block_on(clock_loop(shared, rx)))?;

        Ok(Self { commands, thread })
    }

    pub(super) fn thread_id(&self) -> ThreadId {
        self.thread.thread().id()
    }

    /// Start (or re-time) ticking. Returns once no dispatch is in flight.
    pub(super) fn run(&self, interval: Duration) -> Result<(), SchedulerError> {
        self.request(|ack| Command::Run { interval, ack })
    }

    /// Stop ticking. Returns once no dispatch is in flight.
    pub(super) fn pause(&self) -> Result<(), SchedulerError> {
        self.request(|ack| Command::Pause { ack })
    }

    /// Drop the command channel so the loop exits, then join the thread
    /// unless called from the clock thread itself.
    pub(super) fn release(self) -> Result<(), SchedulerError> {
        let Self { commands, thread } = self;
        drop(commands);
        if thread.thread().id() == thread::current().id() {
            return Ok(());
        }
        thread.join().map_err(|_| SchedulerError::ClockLost)
    }

    fn request(&self, command: impl FnOnce(SyncSender<()>) -> Command) -> Result<(), SchedulerError> {
        let (ack, done) = sync_channel(1);
        self.commands
            .send(command(ack))
            .map_err(|_| SchedulerError::ClockLost)?;
        done.recv().map_err(|_| SchedulerError::ClockLost)
    }
}

/// Interval timer plus the last scheduled instant, for counting dropped ticks.
struct Ticker {
    interval: Interval,
    period: Duration,
    last: Option<Instant>,
}

impl Ticker {
    fn new(period: Duration) -> Self {
        let mut interval = time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self {
            interval,
            period,
            last: None,
        }
    }

    /// Ticks dropped between the previous scheduled instant and `scheduled`.
    ///
    /// With `Skip`, scheduled instants stay on the `period` grid, so the gap
    /// is a whole number of periods.
    fn skipped_before(&mut self, scheduled: Instant) -> u64 {
        let skipped = self.last.map_or(0, |last| {
            let gap = scheduled.saturating_duration_since(last).as_nanos();
            let periods = gap / self.period.as_nanos().max(1);
            u64::try_from(periods.saturating_sub(1)).unwrap_or(u64::MAX)
        });
        self.last = Some(scheduled);
        skipped
    }
}

async fn next_tick(ticker: &mut Option<Ticker>) -> Instant {
    match ticker {
        Some(t) => t.interval.tick().await,
        None => std::future::pending().await,
    }
}

async fn clock_loop(shared: Arc<Shared>, mut commands: mpsc::UnboundedReceiver<Command>) {
    let mut ticker: Option<Ticker> = None;
    debug!("clock thread started");

    loop {
        // Commands first: a pending pause must not wait behind a buffered tick.
        tokio::select! {
            biased;
            command = commands.recv() => match command {
                Some(Command::Run { interval, ack }) => {
                    ticker = Some(Ticker::new(interval));
                    let _ = ack.send(());
                }
                Some(Command::Pause { ack }) => {
                    ticker = None;
                    let _ = ack.send(());
                }
                None => break,
            },
            scheduled = next_tick(&mut ticker) => {
                if let Some(t) = ticker.as_mut() {
                    let skipped = t.skipped_before(scheduled);
                    if skipped > 0 {
                        shared.record_skipped(skipped);
                    }
                }
                shared.process_tick();
            }
        }
    }

    info!("clock thread exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::registry::TaskRegistry;
    use crate::scheduler::runner::core::read;

    #[tokio::test(start_paused = true)]
    async fn ticker_counts_grid_gaps() {
        let period = Duration::from_millis(10);
        let mut ticker = Ticker::new(period);
        let start = Instant::now();

        assert_eq!(ticker.skipped_before(start), 0);
        assert_eq!(ticker.skipped_before(start + period), 0);
        assert_eq!(ticker.skipped_before(start + period * 4), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn first_tick_waits_one_period() {
        let period = Duration::from_millis(50);
        let mut ticker = Some(Ticker::new(period));
        let start = Instant::now();

        let scheduled = next_tick(&mut ticker).await;
        assert_eq!(scheduled, start + period);
    }

    #[tokio::test(start_paused = true)]
    async fn skip_behavior_drops_missed_ticks() {
        let period = Duration::from_millis(10);
        let mut ticker = Some(Ticker::new(period));

        let first = next_tick(&mut ticker).await;
        assert_eq!(ticker.as_mut().unwrap().skipped_before(first), 0);

        // Simulate a dispatch that overruns by three and a half periods.
        time::advance(Duration::from_millis(35)).await;

        // One late tick is delivered immediately...
        let late = next_tick(&mut ticker).await;
        assert_eq!(late, first + period);
        assert_eq!(ticker.as_mut().unwrap().skipped_before(late), 0);

        // ...and the next lands back on the grid, past the missed instants.
        let resumed = next_tick(&mut ticker).await;
        assert_eq!(resumed, first + period * 4);
        assert_eq!(ticker.as_mut().unwrap().skipped_before(resumed), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn pending_pause_wins_over_due_tick() {
        let period = Duration::from_millis(10);
        let shared = Arc::new(Shared::new(TaskRegistry::new()));
        let (commands, rx) = mpsc::unbounded_channel();
        let clock = tokio::spawn(clock_loop(Arc::clone(&shared), rx));

        let (ack, running) = sync_channel(1);
        commands.send(Command::Run { interval: period, ack }).unwrap();
        tokio::task::yield_now().await;
        running.try_recv().unwrap();

        // Queue the pause before the loop sees the overdue tick.
        let (ack, paused) = sync_channel(1);
        commands.send(Command::Pause { ack }).unwrap();
        time::advance(period * 3).await;
        tokio::task::yield_now().await;
        paused.try_recv().unwrap();

        time::advance(period * 5).await;
        tokio::task::yield_now().await;
        assert_eq!(read(&shared.load).ticks, 0);

        drop(commands);
        clock.await.unwrap();
    }
}
