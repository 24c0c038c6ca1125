//! Binary entrypoint: wire config, browser, session and sinks together,
//! then run the cycle loop until the operator interrupts.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use enos_harvester::browser::Browser;
use enos_harvester::infrastructure::config::{self, AppConfig, ConfigManager};
use enos_harvester::infrastructure::logging;
use enos_harvester::infrastructure::webdriver::{WebDriverBrowser, WebDriverSettings};
use enos_harvester::pipeline::frame_search::{DeepStopPolicy, FrameSearchConfig, FrameSearcher};
use enos_harvester::pipeline::scheduler::SchedulerSettings;
use enos_harvester::pipeline::session::LoginSettings;
use enos_harvester::pipeline::{CycleLoop, SessionManager, TargetScheduler};
use enos_harvester::sinks::{CsvSink, InfluxSink, Sink, SqliteSink, SupabaseSink};
use enos_harvester::sinks::influx_sink::InfluxSettings;
use enos_harvester::sinks::supabase_sink::SupabaseSettings;

#[tokio::main]
async fn main() -> Result<()> {
    let config_manager = ConfigManager::new()?;
    let config = config_manager.load_config().await?;

    logging::init_logging_with_config(&config.logging)?;
    info!("🚀 enos-harvester starting");

    // Anything wrong here aborts before the cycle loop ever starts.
    config
        .validate()
        .context("configuration is incomplete; edit the config file and restart")?;

    let targets = config::load_targets(&config.scraper.targets_file, config.scraper.max_targets)
        .await
        .context("targets file is required at startup")?;
    info!(targets = targets.len(), "🎯 target list loaded");

    let sinks = build_sinks(&config).await?;
    info!(sinks = sinks.len(), "🗄️ sinks ready");

    let browser: Arc<dyn Browser> = Arc::new(
        WebDriverBrowser::connect(&WebDriverSettings::from(&config.browser))
            .await
            .context("cannot reach the WebDriver endpoint")?,
    );

    let session = Arc::new(SessionManager::new(LoginSettings {
        login_url: config.portal.login_url.clone(),
        username: config.portal.username.clone(),
        password: config.portal.password.clone(),
        account_selector: config.portal.account_selector.clone(),
        password_selector: config.portal.password_selector.clone(),
        submit_selector: config.portal.submit_selector.clone(),
        login_surface_marker: config.portal.login_surface_marker.clone(),
        login_timeout: Duration::from_secs(config.portal.login_timeout_secs),
    }));

    // Initial login is fatal-for-run: without a session there is nothing to
    // scrape, so fail fast rather than looping on a dead portal.
    let login_page = browser.open_page().await?;
    let login_result = session.login(login_page.as_ref()).await;
    if let Err(e) = login_page.close().await {
        warn!(error = %e, "login page close failed");
    }
    if let Err(e) = login_result {
        let _ = browser.shutdown().await;
        error!(error = %e, "initial login failed");
        return Err(e).context("initial portal login failed");
    }

    let searcher = Arc::new(FrameSearcher::new(FrameSearchConfig {
        deep_stop: if config.scraper.deep_stop_requires_value {
            DeepStopPolicy::RequireWindValue
        } else {
            DeepStopPolicy::AcceptUnparsed
        },
        ..FrameSearchConfig::default()
    }));

    let cancel = CancellationToken::new();
    let scheduler = Arc::new(TargetScheduler::new(
        Arc::clone(&browser),
        session,
        searcher,
        SchedulerSettings {
            max_concurrent_tabs: config.scraper.max_concurrent_tabs,
            locate_attempts: config.scraper.locate_attempts,
            locate_retry_delay: Duration::from_millis(config.scraper.locate_retry_delay_ms),
            readiness_timeout: Duration::from_secs(config.scraper.readiness_timeout_secs),
            target_url_prefix: config.portal.target_url_prefix.clone(),
            target_url_suffix: config.portal.target_url_suffix.clone(),
        },
        cancel.clone(),
    ));

    let cycle_loop = CycleLoop::new(
        scheduler,
        sinks,
        targets,
        Duration::from_secs(config.scraper.cycle_delay_secs),
        cancel.clone(),
    );

    // Ctrl-C flips the token; the loop notices between targets and at the
    // inter-cycle sleep, not only when a full cycle has drained.
    let interrupt_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("🛑 interrupt received, stopping after in-flight work");
            interrupt_cancel.cancel();
        }
    });

    let cycles = cycle_loop.run().await;

    if let Err(e) = browser.shutdown().await {
        warn!(error = %e, "browser session release failed");
    }
    info!(cycles, "👋 enos-harvester stopped cleanly");
    Ok(())
}

/// Construct every sink enabled in the config.
async fn build_sinks(config: &AppConfig) -> Result<Vec<Arc<dyn Sink>>> {
    let mut sinks: Vec<Arc<dyn Sink>> = Vec::new();

    if let Some(csv) = &config.sinks.csv {
        sinks.push(Arc::new(CsvSink::new(csv.dir.clone())));
    }
    if let Some(sqlite) = &config.sinks.sqlite {
        let sink = SqliteSink::connect(&sqlite.path)
            .await
            .with_context(|| format!("cannot open sqlite store {:?}", sqlite.path))?;
        sinks.push(Arc::new(sink));
    }
    if let Some(influx) = &config.sinks.influx {
        let sink = InfluxSink::new(InfluxSettings {
            url: influx.url.clone(),
            token: influx.token.clone(),
            org: influx.org.clone(),
            bucket: influx.bucket.clone(),
        })
        .context("influx sink setup failed")?;
        sinks.push(Arc::new(sink));
    }
    if let Some(supabase) = &config.sinks.supabase {
        let sink = SupabaseSink::new(SupabaseSettings {
            url: supabase.url.clone(),
            api_key: supabase.api_key.clone(),
            table: supabase.table.clone(),
        })
        .context("supabase sink setup failed")?;
        sinks.push(Arc::new(sink));
    }

    Ok(sinks)
}
