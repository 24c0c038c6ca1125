//! W3C WebDriver implementation of the browser capability
//!
//! A thin protocol client over plain HTTP - no automation framework, just
//! the handful of endpoints the capability needs: session create/delete,
//! navigate, switch window/frame, find element, element text/value/click,
//! new/close window.
//!
//! One remote session backs all pages. WebDriver focuses one window and
//! one frame at a time for the whole session, so every command batch takes
//! the focus lock, switches to its own window (and frame path) and runs to
//! completion before another tab's batch may interleave. Waits poll in
//! short locked batches instead of holding the lock across the sleep, so a
//! slow page never starves the other tabs.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde_json::{Value, json};
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use crate::browser::{Browser, BrowserError, Page};
use crate::infrastructure::config::BrowserConfig;

/// W3C web element identifier key.
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// Poll cadence for the bounded waits.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Connection settings for the WebDriver server.
#[derive(Debug, Clone)]
pub struct WebDriverSettings {
    pub endpoint: String,
    pub headless: bool,
    pub command_timeout: Duration,
}

impl From<&BrowserConfig> for WebDriverSettings {
    fn from(config: &BrowserConfig) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            headless: config.headless,
            command_timeout: Duration::from_secs(config.command_timeout_secs),
        }
    }
}

/// Session-global focus state; whoever holds the lock owns the remote
/// end's "current browsing context".
#[derive(Debug, Default)]
struct Focus {
    window: Option<String>,
}

struct Remote {
    http: Client,
    session_url: String,
    focus: Mutex<Focus>,
    initial_window: String,
}

impl Remote {
    /// Run one WebDriver command and return its `value` payload.
    async fn command(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, BrowserError> {
        let url = if path.is_empty() {
            self.session_url.clone()
        } else {
            format!("{}/{path}", self.session_url)
        };

        let mut request = self.http.request(method, &url);
        if let Some(body) = body {
            request = request.json(&body);
        } else {
            // chromedriver insists on a JSON body for every POST
            request = request.json(&json!({}));
        }

        let response = request.send().await?;
        let status = response.status();
        let payload: Value = response
            .json()
            .await
            .map_err(|e| BrowserError::InvalidResponse(e.to_string()))?;

        if status.is_success() {
            Ok(payload.get("value").cloned().unwrap_or(Value::Null))
        } else {
            Err(wire_error(status, &payload))
        }
    }

    async fn get(&self, path: &str) -> Result<Value, BrowserError> {
        let url = format!("{}/{path}", self.session_url);
        let response = self.http.get(&url).send().await?;
        let status = response.status();
        let payload: Value = response
            .json()
            .await
            .map_err(|e| BrowserError::InvalidResponse(e.to_string()))?;

        if status.is_success() {
            Ok(payload.get("value").cloned().unwrap_or(Value::Null))
        } else {
            Err(wire_error(status, &payload))
        }
    }

    /// Make `window` the focused top-level browsing context.
    async fn ensure_window(
        &self,
        focus: &mut MutexGuard<'_, Focus>,
        window: &str,
    ) -> Result<(), BrowserError> {
        if focus.window.as_deref() != Some(window) {
            self.command(Method::POST, "window", Some(json!({ "handle": window })))
                .await?;
            focus.window = Some(window.to_string());
        }
        Ok(())
    }

    /// Focus the top-level document, then descend `path` frame by frame.
    async fn focus_frame_path(&self, path: &[usize]) -> Result<(), BrowserError> {
        self.command(Method::POST, "frame", Some(json!({ "id": null })))
            .await?;
        for index in path {
            self.command(Method::POST, "frame", Some(json!({ "id": index })))
                .await?;
        }
        Ok(())
    }

    /// Find one element by CSS selector in the current frame context.
    async fn find_element(&self, css: &str) -> Result<String, BrowserError> {
        let value = self
            .command(
                Method::POST,
                "element",
                Some(json!({ "using": "css selector", "value": css })),
            )
            .await
            .map_err(|e| match e {
                // Re-key on the selector; the driver's message is noise here.
                BrowserError::ElementMissing(_) => BrowserError::ElementMissing(css.to_string()),
                other => other,
            })?;
        element_id(&value)
    }
}

/// The shared browser session. Cloneable via `Arc`; pages borrow it.
pub struct WebDriverBrowser {
    remote: Arc<Remote>,
}

impl WebDriverBrowser {
    /// Create a fresh WebDriver session against `settings.endpoint`.
    pub async fn connect(settings: &WebDriverSettings) -> Result<Self, BrowserError> {
        let http = Client::builder()
            .timeout(settings.command_timeout)
            .build()?;

        let capabilities = new_session_capabilities(settings.headless);
        let response = http
            .post(format!("{}/session", settings.endpoint.trim_end_matches('/')))
            .json(&capabilities)
            .send()
            .await?;

        let status = response.status();
        let payload: Value = response
            .json()
            .await
            .map_err(|e| BrowserError::InvalidResponse(e.to_string()))?;
        if !status.is_success() {
            return Err(wire_error(status, &payload));
        }

        let session_id = payload
            .pointer("/value/sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                BrowserError::InvalidResponse("session response carries no sessionId".to_string())
            })?
            .to_string();

        let session_url = format!(
            "{}/session/{session_id}",
            settings.endpoint.trim_end_matches('/')
        );

        // Remember the bootstrap window; closed tabs hand focus back to it.
        let initial_window = {
            let response = http.get(format!("{session_url}/window")).send().await?;
            let payload: Value = response
                .json()
                .await
                .map_err(|e| BrowserError::InvalidResponse(e.to_string()))?;
            payload
                .get("value")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    BrowserError::InvalidResponse("no current window handle".to_string())
                })?
                .to_string()
        };

        info!(endpoint = %settings.endpoint, headless = settings.headless, "webdriver session created");

        Ok(Self {
            remote: Arc::new(Remote {
                http,
                session_url,
                focus: Mutex::new(Focus {
                    window: Some(initial_window.clone()),
                }),
                initial_window,
            }),
        })
    }
}

#[async_trait]
impl Browser for WebDriverBrowser {
    async fn open_page(&self) -> Result<Box<dyn Page>, BrowserError> {
        // Hold the focus lock so the new-window command cannot interleave
        // with another tab's command batch.
        let guard = self.remote.focus.lock().await;
        let value = self
            .remote
            .command(Method::POST, "window/new", Some(json!({ "type": "tab" })))
            .await?;
        drop(guard);

        let window = value
            .get("handle")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                BrowserError::InvalidResponse("window/new returned no handle".to_string())
            })?
            .to_string();

        debug!(window = %window, "opened tab");
        Ok(Box::new(WebDriverPage {
            remote: Arc::clone(&self.remote),
            window,
        }))
    }

    async fn shutdown(&self) -> Result<(), BrowserError> {
        info!("closing webdriver session");
        let response = self
            .remote
            .http
            .delete(&self.remote.session_url)
            .send()
            .await?;
        if !response.status().is_success() {
            warn!(status = %response.status(), "session delete was rejected");
        }
        Ok(())
    }
}

/// One tab of the shared session.
struct WebDriverPage {
    remote: Arc<Remote>,
    window: String,
}

#[async_trait]
impl Page for WebDriverPage {
    async fn navigate(&self, url: &str) -> Result<(), BrowserError> {
        let mut focus = self.remote.focus.lock().await;
        self.remote.ensure_window(&mut focus, &self.window).await?;
        self.remote
            .command(Method::POST, "url", Some(json!({ "url": url })))
            .await?;
        Ok(())
    }

    async fn current_url(&self) -> Result<String, BrowserError> {
        let mut focus = self.remote.focus.lock().await;
        self.remote.ensure_window(&mut focus, &self.window).await?;
        let value = self.remote.get("url").await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| BrowserError::InvalidResponse("url is not a string".to_string()))
    }

    async fn child_frame_count(&self, path: &[usize]) -> Result<usize, BrowserError> {
        let mut focus = self.remote.focus.lock().await;
        self.remote.ensure_window(&mut focus, &self.window).await?;
        self.remote.focus_frame_path(path).await?;
        let value = self
            .remote
            .command(
                Method::POST,
                "elements",
                Some(json!({ "using": "css selector", "value": "iframe" })),
            )
            .await?;
        Ok(value.as_array().map_or(0, Vec::len))
    }

    async fn visible_text(&self, path: &[usize]) -> Result<String, BrowserError> {
        let mut focus = self.remote.focus.lock().await;
        self.remote.ensure_window(&mut focus, &self.window).await?;
        self.remote.focus_frame_path(path).await?;

        let body = self.remote.find_element("body").await?;
        let value = self.remote.get(&format!("element/{body}/text")).await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| BrowserError::InvalidResponse("element text is not a string".to_string()))
    }

    async fn type_into(&self, css: &str, text: &str) -> Result<(), BrowserError> {
        let mut focus = self.remote.focus.lock().await;
        self.remote.ensure_window(&mut focus, &self.window).await?;
        self.remote.focus_frame_path(&[]).await?;

        let element = self.remote.find_element(css).await?;
        // Clear stale input first; a relogin form may keep the old value.
        self.remote
            .command(Method::POST, &format!("element/{element}/clear"), None)
            .await?;
        self.remote
            .command(
                Method::POST,
                &format!("element/{element}/value"),
                Some(json!({ "text": text })),
            )
            .await?;
        Ok(())
    }

    async fn click(&self, css: &str) -> Result<(), BrowserError> {
        let mut focus = self.remote.focus.lock().await;
        self.remote.ensure_window(&mut focus, &self.window).await?;
        self.remote.focus_frame_path(&[]).await?;

        let element = self.remote.find_element(css).await?;
        self.remote
            .command(Method::POST, &format!("element/{element}/click"), None)
            .await?;
        Ok(())
    }

    async fn wait_for_url_change(
        &self,
        from: &str,
        timeout: Duration,
    ) -> Result<String, BrowserError> {
        let deadline = Instant::now() + timeout;
        loop {
            let url = self.current_url().await?;
            if url != from {
                return Ok(url);
            }
            if Instant::now() >= deadline {
                return Err(BrowserError::Timeout {
                    what: format!("navigation away from {from}"),
                    waited: timeout,
                });
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    async fn wait_for_frame(&self, timeout: Duration) -> Result<(), BrowserError> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.child_frame_count(&[]).await? > 0 {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(BrowserError::Timeout {
                    what: "child frames to appear".to_string(),
                    waited: timeout,
                });
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    async fn close(&self) -> Result<(), BrowserError> {
        let mut focus = self.remote.focus.lock().await;
        match self.remote.ensure_window(&mut focus, &self.window).await {
            Ok(()) => {
                self.remote.command(Method::DELETE, "window", None).await?;
            }
            // Already gone (navigation crash, double close) - nothing to do.
            Err(e) if e.is_transient_frame_error() => {}
            Err(e) => return Err(e),
        }
        focus.window = None;

        // Hand focus back to the bootstrap window so the session always
        // has a live browsing context.
        let initial = self.remote.initial_window.clone();
        self.remote.ensure_window(&mut focus, &initial).await?;
        debug!(window = %self.window, "closed tab");
        Ok(())
    }
}

/// New-session capabilities for a Chrome-family driver.
fn new_session_capabilities(headless: bool) -> Value {
    let mut args = vec![
        "--window-size=1920,1080".to_string(),
        "--no-sandbox".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--disable-gpu".to_string(),
    ];
    if headless {
        args.push("--headless=new".to_string());
    }

    json!({
        "capabilities": {
            "alwaysMatch": {
                "browserName": "chrome",
                "goog:chromeOptions": { "args": args }
            }
        }
    })
}

/// Map a W3C error payload onto [`BrowserError`].
fn wire_error(status: StatusCode, payload: &Value) -> BrowserError {
    let error = payload
        .pointer("/value/error")
        .and_then(Value::as_str)
        .unwrap_or("unknown error");
    let message = payload
        .pointer("/value/message")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();

    match error {
        "no such frame" | "no such window" | "stale element reference" => {
            BrowserError::FrameGone(message)
        }
        "no such element" => BrowserError::ElementMissing(message),
        "invalid session id" => BrowserError::SessionClosed,
        "timeout" | "script timeout" => BrowserError::Timeout {
            what: message,
            waited: Duration::ZERO,
        },
        _ => BrowserError::Protocol {
            error: format!("{error} (http {status})"),
            message,
        },
    }
}

/// Pull the element id out of a find-element response.
fn element_id(value: &Value) -> Result<String, BrowserError> {
    value
        .get(ELEMENT_KEY)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| BrowserError::InvalidResponse("response is not a web element".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_error_maps_frame_and_element_errors() {
        let payload = json!({ "value": { "error": "no such frame", "message": "gone" } });
        assert!(matches!(
            wire_error(StatusCode::NOT_FOUND, &payload),
            BrowserError::FrameGone(_)
        ));

        let payload = json!({ "value": { "error": "no such element", "message": "#nope" } });
        assert!(matches!(
            wire_error(StatusCode::NOT_FOUND, &payload),
            BrowserError::ElementMissing(_)
        ));

        let payload = json!({ "value": { "error": "session not created", "message": "boom" } });
        assert!(matches!(
            wire_error(StatusCode::INTERNAL_SERVER_ERROR, &payload),
            BrowserError::Protocol { .. }
        ));
    }

    #[test]
    fn element_id_requires_w3c_shape() {
        let value = json!({ (ELEMENT_KEY): "abc-123" });
        assert_eq!(element_id(&value).unwrap(), "abc-123");
        assert!(element_id(&json!({ "id": "abc" })).is_err());
    }

    #[test]
    fn headless_flag_toggles_chrome_arg() {
        let caps = new_session_capabilities(true);
        let args = caps
            .pointer("/capabilities/alwaysMatch/goog:chromeOptions/args")
            .unwrap()
            .to_string();
        assert!(args.contains("--headless=new"));

        let caps = new_session_capabilities(false);
        assert!(!caps.to_string().contains("--headless"));
    }
}
