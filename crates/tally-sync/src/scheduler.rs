//! Background sync loop with a debounced trigger.
//!
//! Local writes call [`Scheduler::sync_soon`]. Triggers arriving within the
//! debounce delay of the first one collapse into a single round. A periodic
//! tick picks up remote changes when nothing happens locally.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep_until};
use tracing::{debug, warn};

use crate::client::Authority;
use crate::engine::{SyncEngine, SyncReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Quiet time after a trigger before the round starts.
    pub debounce: Duration,
    /// Time between rounds when nothing triggers one.
    pub interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_secs(2),
            interval: Duration::from_secs(300),
        }
    }
}

/// Handle to a running sync loop.
#[derive(Debug)]
pub struct Scheduler<A> {
    trigger: Arc<Notify>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<SyncEngine<A>>,
}

impl<A: Authority + 'static> Scheduler<A> {
    /// Moves `engine` onto a background task.
    ///
    /// Successful round reports are sent on the returned channel so the caller
    /// can persist what changed.
    pub fn spawn(
        engine: SyncEngine<A>,
        config: SchedulerConfig,
    ) -> (Self, mpsc::UnboundedReceiver<SyncReport>) {
        let trigger = Arc::new(Notify::new());
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (reports_tx, reports_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(
            engine,
            config,
            Arc::clone(&trigger),
            shutdown_rx,
            reports_tx,
        ));
        (
            Self {
                trigger,
                shutdown,
                task,
            },
            reports_rx,
        )
    }

    /// Requests a round after the debounce delay.
    pub fn sync_soon(&self) {
        self.trigger.notify_one();
    }

    /// Stops the loop after any round in progress and returns the engine.
    pub async fn shutdown(self) -> Result<SyncEngine<A>, JoinError> {
        self.shutdown.send_replace(true);
        self.task.await
    }
}

async fn run<A: Authority>(
    mut engine: SyncEngine<A>,
    config: SchedulerConfig,
    trigger: Arc<Notify>,
    mut shutdown: watch::Receiver<bool>,
    reports: mpsc::UnboundedSender<SyncReport>,
) -> SyncEngine<A> {
    let mut ticker = interval_at(Instant::now() + config.interval, config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            () = trigger.notified() => {
                let deadline = Instant::now() + config.debounce;
                loop {
                    tokio::select! {
                        () = sleep_until(deadline) => break,
                        () = trigger.notified() => {}
                        _ = shutdown.changed() => return engine,
                    }
                }
                debug!("sync triggered");
            }
            _ = ticker.tick() => debug!("periodic sync"),
        }

        match engine.sync_once().await {
            Ok(report) => {
                // The receiver may be gone; the store itself is already updated.
                let _ = reports.send(report);
            }
            Err(err) => warn!(%err, "scheduled sync failed"),
        }
        ticker.reset();
    }
    engine
}
