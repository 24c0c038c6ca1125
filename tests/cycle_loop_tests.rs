//! The cycle loop must outlive a bad cycle: anything escaping the
//! scheduler/fan-out boundary - a panic included - is caught, logged and
//! followed by exactly one more cycle after the configured delay.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use enos_harvester::browser::{Browser, BrowserError, Page};
use enos_harvester::domain::model::{Reading, Target};
use enos_harvester::pipeline::frame_search::FrameSearcher;
use enos_harvester::pipeline::scheduler::{SchedulerSettings, TargetScheduler};
use enos_harvester::pipeline::session::{LoginSettings, SessionManager};
use enos_harvester::pipeline::CycleLoop;
use enos_harvester::sinks::{Sink, SinkError};

struct QuietBrowser;

#[async_trait]
impl Browser for QuietBrowser {
    async fn open_page(&self) -> Result<Box<dyn Page>, BrowserError> {
        Ok(Box::new(QuietPage {
            url: Mutex::new(String::new()),
        }))
    }
    async fn shutdown(&self) -> Result<(), BrowserError> {
        Ok(())
    }
}

struct QuietPage {
    url: Mutex<String>,
}

#[async_trait]
impl Page for QuietPage {
    async fn navigate(&self, url: &str) -> Result<(), BrowserError> {
        *self.url.lock().await = url.to_string();
        Ok(())
    }
    async fn current_url(&self) -> Result<String, BrowserError> {
        Ok(self.url.lock().await.clone())
    }
    async fn child_frame_count(&self, path: &[usize]) -> Result<usize, BrowserError> {
        Ok(usize::from(path.is_empty()))
    }
    async fn visible_text(&self, _path: &[usize]) -> Result<String, BrowserError> {
        Ok("Wind Speed 5.0 Active Power 300".to_string())
    }
    async fn type_into(&self, _css: &str, _text: &str) -> Result<(), BrowserError> {
        Ok(())
    }
    async fn click(&self, _css: &str) -> Result<(), BrowserError> {
        Ok(())
    }
    async fn wait_for_url_change(
        &self,
        _from: &str,
        _timeout: Duration,
    ) -> Result<String, BrowserError> {
        self.current_url().await
    }
    async fn wait_for_frame(&self, _timeout: Duration) -> Result<(), BrowserError> {
        Ok(())
    }
    async fn close(&self) -> Result<(), BrowserError> {
        Ok(())
    }
}

/// Panics on the first write, then behaves. Stands in for "anything
/// unexpected escaping the fan-out boundary".
struct PanicOnceSink {
    writes: AtomicUsize,
}

#[async_trait]
impl Sink for PanicOnceSink {
    fn name(&self) -> &'static str {
        "panic-once"
    }
    async fn write(&self, _reading: &Reading) -> Result<(), SinkError> {
        if self.writes.fetch_add(1, Ordering::SeqCst) == 0 {
            panic!("simulated driver crash");
        }
        Ok(())
    }
}

/// Records writes and cancels the loop once `stop_after` have landed.
struct CountingSink {
    writes: Arc<AtomicUsize>,
    stop_after: usize,
    cancel: CancellationToken,
}

#[async_trait]
impl Sink for CountingSink {
    fn name(&self) -> &'static str {
        "counting"
    }
    async fn write(&self, _reading: &Reading) -> Result<(), SinkError> {
        let written = self.writes.fetch_add(1, Ordering::SeqCst) + 1;
        if written >= self.stop_after {
            self.cancel.cancel();
        }
        Ok(())
    }
}

fn scheduler(cancel: CancellationToken) -> Arc<TargetScheduler> {
    let session = Arc::new(SessionManager::new(LoginSettings {
        login_url: "https://portal.example/login".to_string(),
        username: "dev@example.com".to_string(),
        password: "secret".to_string(),
        account_selector: "#account".to_string(),
        password_selector: "#password".to_string(),
        submit_selector: ".login-form-button".to_string(),
        login_surface_marker: "/login".to_string(),
        login_timeout: Duration::from_millis(100),
    }));

    Arc::new(TargetScheduler::new(
        Arc::new(QuietBrowser),
        session,
        Arc::new(FrameSearcher::default()),
        SchedulerSettings {
            max_concurrent_tabs: 2,
            locate_attempts: 1,
            locate_retry_delay: Duration::from_millis(1),
            readiness_timeout: Duration::from_millis(10),
            target_url_prefix: "https://portal.example/turbines/".to_string(),
            target_url_suffix: String::new(),
        },
        cancel,
    ))
}

#[tokio::test]
async fn loop_survives_a_crashing_cycle_and_runs_the_next_one() {
    let cancel = CancellationToken::new();
    let writes = Arc::new(AtomicUsize::new(0));

    // Sink order matters: the panicking sink is polled first, so cycle 1
    // crashes before the counting sink sees the reading. Cycle 2 must then
    // deliver to both.
    let sinks: Vec<Arc<dyn Sink>> = vec![
        Arc::new(PanicOnceSink {
            writes: AtomicUsize::new(0),
        }),
        Arc::new(CountingSink {
            writes: Arc::clone(&writes),
            stop_after: 1,
            cancel: cancel.clone(),
        }),
    ];

    let cycle_loop = CycleLoop::new(
        scheduler(cancel.clone()),
        sinks,
        vec![Target::new("T1")],
        Duration::from_millis(20),
        cancel.clone(),
    );

    let cycles = tokio::time::timeout(Duration::from_secs(5), cycle_loop.run())
        .await
        .expect("loop must stop after cancellation");

    assert_eq!(cycles, 2, "crashed cycle must be followed by exactly one more");
    assert_eq!(writes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn cancellation_stops_the_loop_between_cycles() {
    let cancel = CancellationToken::new();
    let writes = Arc::new(AtomicUsize::new(0));

    let sinks: Vec<Arc<dyn Sink>> = vec![Arc::new(CountingSink {
        writes: Arc::clone(&writes),
        stop_after: 1,
        cancel: cancel.clone(),
    })];

    let cycle_loop = CycleLoop::new(
        scheduler(cancel.clone()),
        sinks,
        vec![Target::new("T1")],
        Duration::from_secs(3600),
        cancel.clone(),
    );

    // The sink cancels during cycle 1; despite the hour-long configured
    // delay the loop must return promptly.
    let cycles = tokio::time::timeout(Duration::from_secs(5), cycle_loop.run())
        .await
        .expect("cancellation must not wait out the inter-cycle delay");

    assert_eq!(cycles, 1);
    assert_eq!(writes.load(Ordering::SeqCst), 1);
}
