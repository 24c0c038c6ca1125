//! # Target Scheduler
//!
//! Fans one cycle's target list out to worker slots. At most
//! `max_concurrent_tabs` targets are in flight at any instant; every target
//! gets its own page (tab) which is released on every exit path. A failing
//! target is isolated - the cycle always reaches its join point with one
//! outcome per target.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::browser::{Browser, BrowserError, Page};
use crate::domain::model::{Reading, Target, TaskId};
use crate::pipeline::frame_search::FrameSearcher;
use crate::pipeline::session::{SessionError, SessionManager};

#[derive(Error, Debug)]
pub enum TargetError {
    #[error(transparent)]
    Browser(#[from] BrowserError),

    #[error("session repair failed: {0}")]
    Session(#[from] SessionError),

    #[error("cancelled before completion")]
    Cancelled,

    #[error("worker task aborted: {0}")]
    Aborted(String),
}

/// Per-target result of one cycle.
#[derive(Debug)]
pub enum TargetOutcome {
    /// Extraction finished - possibly with unavailable measurements if
    /// every locate attempt missed.
    Completed(Reading),
    /// The unit of work itself failed (navigation error, unrecoverable
    /// session problem). No reading exists for this target this cycle.
    Failed { target: Target, error: TargetError },
}

impl TargetOutcome {
    #[must_use]
    pub const fn reading(&self) -> Option<&Reading> {
        match self {
            Self::Completed(reading) => Some(reading),
            Self::Failed { .. } => None,
        }
    }
}

/// Scheduler tuning knobs, all sourced from config defaults.
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Concurrency ceiling K: tabs navigating/extracting at once.
    pub max_concurrent_tabs: usize,
    /// Locate attempts per target per cycle before degrading.
    pub locate_attempts: u32,
    /// Delay between locate attempts.
    pub locate_retry_delay: Duration,
    /// How long to wait for the dashboard's frames to appear after
    /// navigation before the first locate attempt.
    pub readiness_timeout: Duration,
    /// URL template pieces: `prefix + target_id + suffix`.
    pub target_url_prefix: String,
    pub target_url_suffix: String,
}

impl SchedulerSettings {
    /// Navigable locator for a target.
    #[must_use]
    pub fn locator(&self, target: &Target) -> String {
        format!(
            "{}{}{}",
            self.target_url_prefix, target.id, self.target_url_suffix
        )
    }
}

/// Bounded-concurrency fan-out over the target list.
pub struct TargetScheduler {
    browser: Arc<dyn Browser>,
    session: Arc<SessionManager>,
    searcher: Arc<FrameSearcher>,
    settings: SchedulerSettings,
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl TargetScheduler {
    #[must_use]
    pub fn new(
        browser: Arc<dyn Browser>,
        session: Arc<SessionManager>,
        searcher: Arc<FrameSearcher>,
        settings: SchedulerSettings,
        cancel: CancellationToken,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(settings.max_concurrent_tabs.max(1)));
        Self {
            browser,
            session,
            searcher,
            settings,
            permits,
            cancel,
        }
    }

    /// Run one full cycle over `targets`. Completes only when every
    /// target's unit of work has completed; outcomes come back in target
    /// order.
    pub async fn run_cycle(&self, targets: &[Target]) -> Vec<TargetOutcome> {
        let mut workers: JoinSet<(usize, Result<Reading, TargetError>)> = JoinSet::new();

        for (index, target) in targets.iter().cloned().enumerate() {
            let browser = Arc::clone(&self.browser);
            let session = Arc::clone(&self.session);
            let searcher = Arc::clone(&self.searcher);
            let settings = self.settings.clone();
            let permits = Arc::clone(&self.permits);
            let cancel = self.cancel.clone();

            workers.spawn(async move {
                let result =
                    scrape_target(browser, session, searcher, settings, permits, cancel, &target)
                        .await;
                (index, result)
            });
        }

        let mut slots: Vec<Option<TargetOutcome>> = Vec::new();
        slots.resize_with(targets.len(), || None);

        // Join point: every worker is drained, panics included, so one bad
        // target can never wedge the cycle.
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok((index, Ok(reading))) => {
                    slots[index] = Some(TargetOutcome::Completed(reading));
                }
                Ok((index, Err(error))) => {
                    let target = targets[index].clone();
                    warn!(target = %target, error = %error, "target failed this cycle");
                    slots[index] = Some(TargetOutcome::Failed { target, error });
                }
                Err(join_error) => {
                    // A panicked worker loses its index; the backfill pass
                    // below attributes the abort to its unfilled slot.
                    warn!(error = %join_error, "scrape worker aborted");
                }
            }
        }

        slots
            .into_iter()
            .enumerate()
            .map(|(index, outcome)| {
                outcome.unwrap_or_else(|| TargetOutcome::Failed {
                    target: targets[index].clone(),
                    error: TargetError::Aborted("worker panicked".to_string()),
                })
            })
            .collect()
    }
}

/// One target's unit of work: permit, page, navigate, session check,
/// readiness wait, bounded locate retries. The page is closed on every
/// exit path.
async fn scrape_target(
    browser: Arc<dyn Browser>,
    session: Arc<SessionManager>,
    searcher: Arc<FrameSearcher>,
    settings: SchedulerSettings,
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
    target: &Target,
) -> Result<Reading, TargetError> {
    let _permit = tokio::select! {
        () = cancel.cancelled() => return Err(TargetError::Cancelled),
        permit = permits.acquire() => permit.map_err(|_| TargetError::Cancelled)?,
    };

    let task_id = TaskId::new();
    debug!(%task_id, target = %target, "scrape starting");

    let page = browser.open_page().await?;
    let result = scrape_on_page(
        page.as_ref(),
        &session,
        &searcher,
        &settings,
        &cancel,
        target,
    )
    .await;

    if let Err(e) = page.close().await {
        debug!(%task_id, error = %e, "page close failed");
    }

    match &result {
        Ok(reading) => info!(
            %task_id,
            target = %target,
            wind = %reading.wind_speed,
            power = %reading.active_power,
            "scrape finished"
        ),
        Err(error) => debug!(%task_id, target = %target, error = %error, "scrape failed"),
    }
    result
}

async fn scrape_on_page(
    page: &dyn Page,
    session: &SessionManager,
    searcher: &FrameSearcher,
    settings: &SchedulerSettings,
    cancel: &CancellationToken,
    target: &Target,
) -> Result<Reading, TargetError> {
    let locator = settings.locator(target);
    page.navigate(&locator).await?;

    // The portal answers expired sessions with a redirect to the login
    // surface; repair and come back.
    if session.ensure_valid(page).await? {
        page.navigate(&locator).await?;
    }

    // Give the dashboard's frames a bounded window to appear. A timeout
    // here is not a failure - the locate retries below may still land.
    if let Err(e) = page.wait_for_frame(settings.readiness_timeout).await {
        debug!(target = %target, error = %e, "no frames yet after readiness wait");
    }

    for attempt in 1..=settings.locate_attempts {
        if cancel.is_cancelled() {
            return Err(TargetError::Cancelled);
        }

        match searcher.locate(page).await? {
            Some(hit) => {
                return Ok(Reading::new(
                    target,
                    hit.display_name,
                    hit.values.wind_speed,
                    hit.values.active_power,
                    hit.values.note,
                ));
            }
            None => {
                debug!(target = %target, attempt, "readings not located");
                if attempt < settings.locate_attempts {
                    tokio::select! {
                        () = cancel.cancelled() => return Err(TargetError::Cancelled),
                        () = tokio::time::sleep(settings.locate_retry_delay) => {}
                    }
                }
            }
        }
    }

    // Retries exhausted: degrade to an unavailable reading instead of
    // failing the target, so the gap is visible downstream.
    Ok(Reading::unavailable(
        target,
        crate::pipeline::frame_search::MISS_DIAGNOSTIC,
    ))
}
