//! # Value Parser
//!
//! Turns the noisy visible text of a dashboard frame into typed
//! measurements. Pure and total: any input string, including empty or
//! non-ASCII text, produces a [`ParsedValues`] - parse failures degrade to
//! [`MetricValue::Unavailable`], they never escape as errors.
//!
//! Matching is an ordered rule chain per metric, first match wins:
//! a labeled pattern ("Wind Speed ... 12.3") is preferred over a bare
//! number with a unit ("12.3 m/s"), because labels survive layout changes
//! better than positions do.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::domain::model::MetricValue;

/// Diagnostic notes are capped at this many characters so an unparsed page
/// dump never floods logs or sink rows.
pub const NOTE_MAX_CHARS: usize = 100;

/// Note value when every tracked metric parsed.
pub const NOTE_OK: &str = "OK";

static WHITESPACE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("whitespace pattern compiles"));

/// Ordered wind-speed rules. Capture group 1 is the decimal number.
static WIND_RULES: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?i)Wind\s*Speed.*?(\d+(?:\.\d+)?)").expect("wind label pattern compiles"),
        Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*m/s").expect("wind unit pattern compiles"),
    ]
});

/// Ordered active-power rules.
static POWER_RULES: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?i)Active\s*Power.*?(\d+(?:\.\d+)?)").expect("power label pattern compiles"),
        Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*kW").expect("power unit pattern compiles"),
    ]
});

/// Turbine display name, e.g. "Turbine WA101" or "Turbine: North-07".
static NAME_RULE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)Turbine\s*(?:name)?\s*[:#-]?\s*([A-Za-z0-9][A-Za-z0-9_-]*)")
        .expect("name pattern compiles")
});

/// Result of one parse pass over a frame's text.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedValues {
    pub wind_speed: MetricValue,
    pub active_power: MetricValue,
    /// `"OK"` iff both metrics matched; otherwise the normalized source
    /// text truncated to [`NOTE_MAX_CHARS`].
    pub note: String,
}

impl ParsedValues {
    /// True when both tracked metrics resolved to numbers.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.wind_speed.is_available() && self.active_power.is_available()
    }
}

/// Parse wind speed and active power out of arbitrary frame text.
#[must_use]
pub fn parse(text: &str) -> ParsedValues {
    let clean = normalize(text);

    let mut values = ParsedValues {
        wind_speed: first_match(&WIND_RULES, &clean),
        active_power: first_match(&POWER_RULES, &clean),
        note: String::new(),
    };
    values.note = if values.is_complete() {
        NOTE_OK.to_string()
    } else {
        truncate_chars(&clean, NOTE_MAX_CHARS)
    };
    values
}

/// Extract a turbine display name from frame text, when one is labeled.
#[must_use]
pub fn extract_display_name(text: &str) -> Option<String> {
    let clean = normalize(text);
    NAME_RULE
        .captures(&clean)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Collapse whitespace runs to single spaces and trim the ends.
#[must_use]
pub fn normalize(text: &str) -> String {
    WHITESPACE.replace_all(text, " ").trim().to_string()
}

fn first_match(rules: &[Regex], text: &str) -> MetricValue {
    for rule in rules {
        if let Some(caps) = rule.captures(text) {
            if let Some(m) = caps.get(1) {
                // Oversized digit runs can overflow to inf; treat that the
                // same as no match rather than persisting garbage.
                if let Ok(value) = m.as_str().parse::<f64>() {
                    if value.is_finite() {
                        return MetricValue::Available(value);
                    }
                }
            }
        }
    }
    MetricValue::Unavailable
}

/// Truncate on a char boundary; `&s[..n]` would panic on multibyte text.
fn truncate_chars(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}
