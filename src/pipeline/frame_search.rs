//! # Frame Search Engine
//!
//! The dashboard buries its live readings inside an unknown hierarchy of
//! nested iframes (observed depth 1-2, not guaranteed). This walk is
//! deliberately tolerant: every frame access is fallible and failure means
//! "skip that frame", never "abort the search". It also terminates on the
//! first positive hit instead of scanning exhaustively, to bound per-target
//! latency while several targets are in flight.

use tracing::{debug, trace};

use crate::browser::{BrowserError, Page};
use crate::pipeline::parser::{self, ParsedValues};

/// Diagnostic attached to a miss.
pub const MISS_DIAGNOSTIC: &str = "text not found in any frame";

/// Stop condition for the deepest searched level.
///
/// At depth 1 a frame only counts as found when the wind value actually
/// parsed. The source system accepted depth-2 frames on keyword markers
/// alone, parsed or not; whether that asymmetry is intentional is unknown,
/// so it is a policy here rather than hardwired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeepStopPolicy {
    /// Accept a marker-bearing depth-2 frame even if the numeric parse
    /// failed (matches observed behavior of the source system).
    #[default]
    AcceptUnparsed,
    /// Require a parsed wind value at depth 2 as well.
    RequireWindValue,
}

/// Search configuration. Marker tokens gate which frames are worth parsing
/// at all; they are config so a re-skinned dashboard is a config edit, not
/// a code change.
#[derive(Debug, Clone)]
pub struct FrameSearchConfig {
    /// Token that must appear alongside `power_marker` at depth 1.
    pub wind_marker: String,
    /// Second depth-1 marker token.
    pub power_marker: String,
    /// Depth-2 frames are parsed when either `wind_marker` or this unit
    /// token is present.
    pub deep_unit_marker: String,
    pub deep_stop: DeepStopPolicy,
}

impl Default for FrameSearchConfig {
    fn default() -> Self {
        Self {
            wind_marker: "Wind".to_string(),
            power_marker: "Power".to_string(),
            deep_unit_marker: "kW".to_string(),
            deep_stop: DeepStopPolicy::AcceptUnparsed,
        }
    }
}

/// A positive search result: parsed values plus where they came from.
#[derive(Debug, Clone)]
pub struct FrameHit {
    pub values: ParsedValues,
    pub display_name: Option<String>,
    /// Nesting depth of the frame that produced the hit (1 or 2).
    pub depth: usize,
}

/// Walks the frame tree of a live page looking for the readings panel.
#[derive(Debug, Clone, Default)]
pub struct FrameSearcher {
    config: FrameSearchConfig,
}

impl FrameSearcher {
    #[must_use]
    pub fn new(config: FrameSearchConfig) -> Self {
        Self { config }
    }

    /// One search pass over the page's frame tree.
    ///
    /// `Ok(None)` is a miss ("text not found in any frame" this attempt);
    /// retrying is the caller's decision. `Err` is reserved for page-level
    /// failures (the top document itself unreachable), not individual
    /// frame hiccups.
    pub async fn locate(&self, page: &dyn Page) -> Result<Option<FrameHit>, BrowserError> {
        let top_frames = page.child_frame_count(&[]).await?;
        trace!(top_frames, "scanning frame tree");

        for i in 0..top_frames {
            let text = match page.visible_text(&[i]).await {
                Ok(text) => text,
                Err(e) if e.is_transient_frame_error() => {
                    trace!(frame = i, error = %e, "skipping detached frame");
                    continue;
                }
                Err(e) => {
                    debug!(frame = i, error = %e, "frame read failed, skipping");
                    continue;
                }
            };

            if text.contains(&self.config.wind_marker) && text.contains(&self.config.power_marker)
            {
                let values = parser::parse(&text);
                if values.wind_speed.is_available() {
                    return Ok(Some(FrameHit {
                        display_name: parser::extract_display_name(&text),
                        values,
                        depth: 1,
                    }));
                }
                // Markers present but the numbers haven't rendered; the
                // real panel may sit one level deeper.
            }

            if let Some(hit) = self.descend(page, i).await {
                return Ok(Some(hit));
            }
        }

        debug!("{MISS_DIAGNOSTIC}");
        Ok(None)
    }

    /// Scan the depth-2 frames nested under depth-1 frame `i`. Depth 2 is
    /// the last level attempted.
    async fn descend(&self, page: &dyn Page, i: usize) -> Option<FrameHit> {
        let children = match page.child_frame_count(&[i]).await {
            Ok(n) => n,
            Err(e) => {
                debug!(frame = i, error = %e, "cannot enumerate nested frames, skipping");
                return None;
            }
        };

        for j in 0..children {
            let text = match page.visible_text(&[i, j]).await {
                Ok(text) => text,
                Err(e) => {
                    debug!(frame = i, nested = j, error = %e, "skipping unreadable nested frame");
                    continue;
                }
            };

            if text.contains(&self.config.wind_marker)
                || text.contains(&self.config.deep_unit_marker)
            {
                let values = parser::parse(&text);
                match self.config.deep_stop {
                    DeepStopPolicy::RequireWindValue if !values.wind_speed.is_available() => {
                        continue;
                    }
                    _ => {
                        return Some(FrameHit {
                            display_name: parser::extract_display_name(&text),
                            values,
                            depth: 2,
                        });
                    }
                }
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::MetricValue;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::time::Duration;

    /// In-memory frame tree: path -> body text, with poisoned paths that
    /// fail like a detached frame would.
    #[derive(Default)]
    struct FakePage {
        frames: HashMap<Vec<usize>, String>,
        poisoned: Vec<Vec<usize>>,
    }

    impl FakePage {
        fn with_frame(mut self, path: &[usize], text: &str) -> Self {
            self.frames.insert(path.to_vec(), text.to_string());
            self
        }

        fn with_poisoned(mut self, path: &[usize]) -> Self {
            self.poisoned.push(path.to_vec());
            self
        }

        fn count_children(&self, path: &[usize]) -> usize {
            (0..)
                .take_while(|i| {
                    let mut child = path.to_vec();
                    child.push(*i);
                    self.frames.contains_key(&child) || self.poisoned.contains(&child)
                })
                .count()
        }
    }

    #[async_trait]
    impl Page for FakePage {
        async fn navigate(&self, _url: &str) -> Result<(), BrowserError> {
            Ok(())
        }
        async fn current_url(&self) -> Result<String, BrowserError> {
            Ok("about:blank".to_string())
        }
        async fn child_frame_count(&self, path: &[usize]) -> Result<usize, BrowserError> {
            Ok(self.count_children(path))
        }
        async fn visible_text(&self, path: &[usize]) -> Result<String, BrowserError> {
            if self.poisoned.contains(&path.to_vec()) {
                return Err(BrowserError::FrameGone(format!("{path:?}")));
            }
            self.frames
                .get(path)
                .cloned()
                .ok_or_else(|| BrowserError::FrameGone(format!("{path:?}")))
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
            Ok("about:blank".to_string())
        }
        async fn wait_for_frame(&self, _timeout: Duration) -> Result<(), BrowserError> {
            Ok(())
        }
        async fn close(&self) -> Result<(), BrowserError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn zero_frames_is_a_miss_not_a_crash() {
        let page = FakePage::default();
        let hit = FrameSearcher::default().locate(&page).await.unwrap();
        assert!(hit.is_none());
    }

    #[tokio::test]
    async fn finds_values_at_depth_one() {
        let page = FakePage::default()
            .with_frame(&[0], "navigation chrome")
            .with_frame(&[1], "Turbine WA103 Wind Speed 8.1 Active Power 950");
        let hit = FrameSearcher::default()
            .locate(&page)
            .await
            .unwrap()
            .expect("should find the readings frame");
        assert_eq!(hit.depth, 1);
        assert_eq!(hit.values.wind_speed, MetricValue::Available(8.1));
        assert_eq!(hit.values.active_power, MetricValue::Available(950.0));
        assert_eq!(hit.display_name.as_deref(), Some("WA103"));
    }

    #[tokio::test]
    async fn descends_when_depth_one_has_markers_but_no_values() {
        let page = FakePage::default()
            .with_frame(&[0], "Wind and Power headings, numbers render deeper")
            .with_frame(&[0, 0], "Wind Speed 4.2 Active Power 311");
        let hit = FrameSearcher::default()
            .locate(&page)
            .await
            .unwrap()
            .expect("should find the nested frame");
        assert_eq!(hit.depth, 2);
        assert_eq!(hit.values.wind_speed, MetricValue::Available(4.2));
    }

    #[tokio::test]
    async fn poisoned_frame_is_skipped_not_fatal() {
        let page = FakePage::default()
            .with_poisoned(&[0])
            .with_frame(&[1], "Wind Speed 2.2 Active Power 100");
        let hit = FrameSearcher::default().locate(&page).await.unwrap();
        assert!(hit.is_some());
    }

    #[tokio::test]
    async fn deep_stop_policy_controls_unparsed_acceptance() {
        // Depth-2 frame has the kW marker but no parsable wind value.
        let page = FakePage::default()
            .with_frame(&[0], "nothing useful here")
            .with_frame(&[0, 0], "output in kW pending...");

        let lenient = FrameSearcher::default().locate(&page).await.unwrap();
        let hit = lenient.expect("AcceptUnparsed returns the marker frame");
        assert_eq!(hit.values.wind_speed, MetricValue::Unavailable);

        let strict = FrameSearcher::new(FrameSearchConfig {
            deep_stop: DeepStopPolicy::RequireWindValue,
            ..FrameSearchConfig::default()
        });
        assert!(strict.locate(&page).await.unwrap().is_none());
    }
}
