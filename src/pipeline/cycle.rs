//! # Cycle Loop
//!
//! Repeats scheduler + sink fan-out forever. The loop outlives any single
//! bad cycle: the whole cycle body runs in a spawned task so even a panic
//! escaping the scheduler/fan-out boundary is caught at the join, logged,
//! and followed by the next cycle after the normal delay. The delay is
//! measured from cycle completion - a slow cycle does not eat into the
//! following sleep.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::domain::model::Target;
use crate::pipeline::scheduler::{TargetOutcome, TargetScheduler};
use crate::sinks::{self, Sink};

pub struct CycleLoop {
    scheduler: Arc<TargetScheduler>,
    sinks: Arc<Vec<Arc<dyn Sink>>>,
    targets: Arc<Vec<Target>>,
    delay: Duration,
    cancel: CancellationToken,
}

impl CycleLoop {
    #[must_use]
    pub fn new(
        scheduler: Arc<TargetScheduler>,
        sinks: Vec<Arc<dyn Sink>>,
        targets: Vec<Target>,
        delay: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            scheduler,
            sinks: Arc::new(sinks),
            targets: Arc::new(targets),
            delay,
            cancel,
        }
    }

    /// Run until cancelled. Returns the number of cycles attempted.
    pub async fn run(&self) -> u64 {
        let mut cycle = 0_u64;

        while !self.cancel.is_cancelled() {
            cycle += 1;
            let started = Instant::now();
            info!(cycle, targets = self.targets.len(), "🔄 cycle starting");

            let scheduler = Arc::clone(&self.scheduler);
            let sinks = Arc::clone(&self.sinks);
            let targets = Arc::clone(&self.targets);

            let body = tokio::spawn(async move {
                let outcomes = scheduler.run_cycle(&targets).await;
                let mut persisted = 0_usize;
                let mut failed = 0_usize;

                for outcome in &outcomes {
                    match outcome {
                        TargetOutcome::Completed(reading) => {
                            if !reading.has_data() {
                                warn!(
                                    target = reading.name(),
                                    note = %reading.note,
                                    "persisting degraded reading"
                                );
                            }
                            sinks::persist_all(reading, &sinks).await;
                            persisted += 1;
                        }
                        TargetOutcome::Failed { .. } => failed += 1,
                    }
                }
                (persisted, failed)
            });

            match body.await {
                Ok((persisted, failed)) => {
                    info!(
                        cycle,
                        persisted,
                        failed,
                        elapsed = ?started.elapsed(),
                        "✅ cycle complete"
                    );
                }
                Err(e) => {
                    // Single bad cycle; the process keeps going.
                    error!(cycle, error = %e, "❌ cycle crashed, continuing with next cycle");
                }
            }

            tokio::select! {
                () = self.cancel.cancelled() => break,
                () = sleep(self.delay) => {}
            }
        }

        info!(cycles = cycle, "cycle loop stopped");
        cycle
    }
}
