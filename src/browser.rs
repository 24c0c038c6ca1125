//! # Browser Capability
//!
//! The abstract surface the pipeline drives the dashboard through. The
//! extraction core only ever sees these traits; the WebDriver adapter in
//! `infrastructure::webdriver` is one implementation, the test fakes are
//! another. Nothing outside `infrastructure` may assume a concrete engine.
//!
//! Frames are addressed by index path from the top-level document: `[]` is
//! the page itself, `[0]` its first child frame, `[0, 2]` the third frame
//! nested inside that one.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Errors surfaced by the browser capability.
///
/// `FrameGone` and `ElementMissing` are expected during normal operation
/// (the dashboard re-renders constantly); callers skip and move on rather
/// than treating them as fatal.
#[derive(Error, Debug)]
pub enum BrowserError {
    #[error("webdriver transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("webdriver rejected command ({error}): {message}")]
    Protocol { error: String, message: String },

    #[error("frame no longer reachable: {0}")]
    FrameGone(String),

    #[error("no element matching '{0}'")]
    ElementMissing(String),

    #[error("timed out after {waited:?} waiting for {what}")]
    Timeout { what: String, waited: Duration },

    #[error("browser session is closed")]
    SessionClosed,

    #[error("malformed webdriver response: {0}")]
    InvalidResponse(String),
}

impl BrowserError {
    /// True for errors that mean "this frame/element isn't there right
    /// now", which the frame walk treats as skip-and-continue.
    #[must_use]
    pub const fn is_transient_frame_error(&self) -> bool {
        matches!(self, Self::FrameGone(_) | Self::ElementMissing(_))
    }
}

/// One isolated page (tab). Each in-flight target owns exactly one for the
/// duration of its unit of work and must call [`Page::close`] on every exit
/// path.
#[async_trait]
pub trait Page: Send + Sync {
    /// Navigate this page to a URL.
    async fn navigate(&self, url: &str) -> Result<(), BrowserError>;

    /// The URL the page currently resolves to (after any redirects).
    async fn current_url(&self) -> Result<String, BrowserError>;

    /// Number of immediate child frames of the frame at `path`.
    async fn child_frame_count(&self, path: &[usize]) -> Result<usize, BrowserError>;

    /// Visible body text of the frame at `path`.
    async fn visible_text(&self, path: &[usize]) -> Result<String, BrowserError>;

    /// Type text into the first element matching a CSS selector
    /// (top-level document only; used by the login flow).
    async fn type_into(&self, css: &str, text: &str) -> Result<(), BrowserError>;

    /// Click the first element matching a CSS selector.
    async fn click(&self, css: &str) -> Result<(), BrowserError>;

    /// Wait until the page URL differs from `from`, polling up to `timeout`.
    /// Returns the new URL.
    async fn wait_for_url_change(
        &self,
        from: &str,
        timeout: Duration,
    ) -> Result<String, BrowserError>;

    /// Wait until at least one child frame exists, polling up to `timeout`.
    async fn wait_for_frame(&self, timeout: Duration) -> Result<(), BrowserError>;

    /// Release this page/tab. Idempotent.
    async fn close(&self) -> Result<(), BrowserError>;
}

/// The browser session as a whole: a factory for pages plus session-level
/// teardown.
#[async_trait]
pub trait Browser: Send + Sync {
    /// Open a fresh isolated page.
    async fn open_page(&self) -> Result<Box<dyn Page>, BrowserError>;

    /// End the underlying session, releasing all remote resources.
    async fn shutdown(&self) -> Result<(), BrowserError>;
}
