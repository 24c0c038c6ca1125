//! # Session Manager
//!
//! Exclusive owner of the portal login state. Targets never mutate session
//! state themselves - they call [`SessionManager::ensure_valid`] and the
//! manager decides whether a relogin is needed, serializing it so that N
//! workers detecting an expired session at once produce exactly one login
//! sequence.

use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::browser::{BrowserError, Page};

/// Login state machine: `LoggedOut -> LoggingIn -> LoggedIn`, with
/// invalidation sending it back through `LoggingIn`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    LoggedOut,
    LoggingIn,
    LoggedIn,
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("login did not leave the login surface within {0:?}")]
    LoginTimeout(Duration),

    #[error(transparent)]
    Browser(#[from] BrowserError),
}

/// Everything the login flow needs to know about the portal.
#[derive(Debug, Clone)]
pub struct LoginSettings {
    pub login_url: String,
    pub username: String,
    pub password: String,
    /// CSS selectors for the credential form.
    pub account_selector: String,
    pub password_selector: String,
    pub submit_selector: String,
    /// Substring that identifies the login surface in a URL. A target page
    /// resolving to a URL containing this means the session has expired.
    pub login_surface_marker: String,
    pub login_timeout: Duration,
}

#[derive(Debug)]
struct Inner {
    state: SessionState,
    /// Updated on every successful login and every positive validity
    /// check. A worker that queued behind an in-flight relogin compares
    /// this against its own detection time to see the work is done.
    verified_at: Option<DateTime<Utc>>,
}

/// See module docs. Cheap to share: all state sits behind one mutex.
#[derive(Debug)]
pub struct SessionManager {
    settings: LoginSettings,
    inner: Mutex<Inner>,
}

impl SessionManager {
    #[must_use]
    pub fn new(settings: LoginSettings) -> Self {
        Self {
            settings,
            inner: Mutex::new(Inner {
                state: SessionState::LoggedOut,
                verified_at: None,
            }),
        }
    }

    /// Current state snapshot (for logs and tests).
    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.state
    }

    /// When the session was last confirmed valid.
    pub async fn verified_at(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().await.verified_at
    }

    /// True when `url` resolves to the login surface.
    #[must_use]
    pub fn is_login_surface(&self, url: &str) -> bool {
        url.contains(&self.settings.login_surface_marker)
    }

    /// Perform the full login sequence on `page`. Holds the session lock
    /// for the whole sequence, so at most one login runs at a time.
    pub async fn login(&self, page: &dyn Page) -> Result<(), SessionError> {
        let mut inner = self.inner.lock().await;
        self.login_locked(&mut inner, page).await
    }

    /// Confirm the session is usable for the page's current location,
    /// triggering a serialized relogin when the portal bounced us back to
    /// the login surface. Returns `true` when a relogin happened (the
    /// caller must re-navigate to its target afterwards).
    pub async fn ensure_valid(&self, page: &dyn Page) -> Result<bool, SessionError> {
        let detected_at = Utc::now();

        let url = page.current_url().await?;
        if !self.is_login_surface(&url) {
            let mut inner = self.inner.lock().await;
            inner.state = SessionState::LoggedIn;
            inner.verified_at = Some(Utc::now());
            return Ok(false);
        }

        warn!(url = %url, "session invalidated, portal redirected to login");

        let mut inner = self.inner.lock().await;
        if inner.verified_at.is_some_and(|t| t > detected_at) {
            // Another worker re-logged in while we waited for the lock;
            // our page just needs a fresh navigation.
            info!("relogin already performed by a concurrent worker");
            return Ok(true);
        }

        self.login_locked(&mut inner, page).await?;
        Ok(true)
    }

    async fn login_locked(
        &self,
        inner: &mut Inner,
        page: &dyn Page,
    ) -> Result<(), SessionError> {
        inner.state = SessionState::LoggingIn;
        info!(url = %self.settings.login_url, "logging in");

        let attempt = async {
            page.navigate(&self.settings.login_url).await?;
            page.type_into(&self.settings.account_selector, &self.settings.username)
                .await?;
            page.type_into(&self.settings.password_selector, &self.settings.password)
                .await?;
            page.click(&self.settings.submit_selector).await?;

            // Success is signaled by navigation away from the login surface.
            page.wait_for_url_change(&self.settings.login_url, self.settings.login_timeout)
                .await
        };

        match attempt.await {
            Ok(landed_on) => {
                inner.state = SessionState::LoggedIn;
                inner.verified_at = Some(Utc::now());
                info!(url = %landed_on, "login succeeded");
                Ok(())
            }
            Err(BrowserError::Timeout { waited, .. }) => {
                inner.state = SessionState::LoggedOut;
                warn!("login timed out after {waited:?}");
                Err(SessionError::LoginTimeout(waited))
            }
            Err(e) => {
                inner.state = SessionState::LoggedOut;
                warn!(error = %e, "login failed");
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn settings() -> LoginSettings {
        LoginSettings {
            login_url: "https://portal.example/login".to_string(),
            username: "dev@example.com".to_string(),
            password: "secret".to_string(),
            account_selector: "#account".to_string(),
            password_selector: "#password".to_string(),
            submit_selector: ".login-form-button".to_string(),
            login_surface_marker: "login".to_string(),
            login_timeout: Duration::from_millis(200),
        }
    }

    /// Page stub that sits on the login surface until a login is driven
    /// through it, counting login sequences.
    struct LoginPage {
        logins: Arc<AtomicUsize>,
        logged_in: Arc<AtomicUsize>,
    }

    impl LoginPage {
        fn new() -> Self {
            Self {
                logins: Arc::new(AtomicUsize::new(0)),
                logged_in: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl Page for LoginPage {
        async fn navigate(&self, _url: &str) -> Result<(), BrowserError> {
            Ok(())
        }
        async fn current_url(&self) -> Result<String, BrowserError> {
            if self.logged_in.load(Ordering::SeqCst) > 0 {
                Ok("https://portal.example/portal/turbines".to_string())
            } else {
                Ok("https://portal.example/login".to_string())
            }
        }
        async fn child_frame_count(&self, _path: &[usize]) -> Result<usize, BrowserError> {
            Ok(0)
        }
        async fn visible_text(&self, _path: &[usize]) -> Result<String, BrowserError> {
            Ok(String::new())
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
            // Simulate a slow navigation so concurrent detections overlap.
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.logins.fetch_add(1, Ordering::SeqCst);
            self.logged_in.fetch_add(1, Ordering::SeqCst);
            Ok("https://portal.example/portal/turbines".to_string())
        }
        async fn wait_for_frame(&self, _timeout: Duration) -> Result<(), BrowserError> {
            Ok(())
        }
        async fn close(&self) -> Result<(), BrowserError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn concurrent_invalidation_triggers_exactly_one_login() {
        let manager = Arc::new(SessionManager::new(settings()));
        let page = Arc::new(LoginPage::new());

        let a = {
            let (m, p) = (Arc::clone(&manager), Arc::clone(&page));
            tokio::spawn(async move { m.ensure_valid(p.as_ref()).await })
        };
        let b = {
            let (m, p) = (Arc::clone(&manager), Arc::clone(&page));
            tokio::spawn(async move { m.ensure_valid(p.as_ref()).await })
        };

        let relogged_a = a.await.unwrap().unwrap();
        let relogged_b = b.await.unwrap().unwrap();

        assert!(relogged_a && relogged_b);
        assert_eq!(page.logins.load(Ordering::SeqCst), 1);
        assert_eq!(manager.state().await, SessionState::LoggedIn);
    }

    #[tokio::test]
    async fn valid_session_is_touched_not_relogged() {
        let manager = SessionManager::new(settings());
        let page = LoginPage::new();
        page.logged_in.fetch_add(1, Ordering::SeqCst);

        let relogged = manager.ensure_valid(&page).await.unwrap();
        assert!(!relogged);
        assert_eq!(page.logins.load(Ordering::SeqCst), 0);
        assert!(manager.verified_at().await.is_some());
    }

    struct TimeoutPage;

    #[async_trait]
    impl Page for TimeoutPage {
        async fn navigate(&self, _url: &str) -> Result<(), BrowserError> {
            Ok(())
        }
        async fn current_url(&self) -> Result<String, BrowserError> {
            Ok("https://portal.example/login".to_string())
        }
        async fn child_frame_count(&self, _path: &[usize]) -> Result<usize, BrowserError> {
            Ok(0)
        }
        async fn visible_text(&self, _path: &[usize]) -> Result<String, BrowserError> {
            Ok(String::new())
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
            timeout: Duration,
        ) -> Result<String, BrowserError> {
            Err(BrowserError::Timeout {
                what: "url change".to_string(),
                waited: timeout,
            })
        }
        async fn wait_for_frame(&self, _timeout: Duration) -> Result<(), BrowserError> {
            Ok(())
        }
        async fn close(&self) -> Result<(), BrowserError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn failed_login_returns_to_logged_out() {
        let manager = SessionManager::new(settings());
        let err = manager.login(&TimeoutPage).await.unwrap_err();
        assert!(matches!(err, SessionError::LoginTimeout(_)));
        assert_eq!(manager.state().await, SessionState::LoggedOut);
    }
}
