//! Time bucketing: map a time range and a pixel width onto a "nice"
//! sampling interval and a rate window.
//!
//! One pixel is treated as one sample, so the raw interval is
//! `range / width`. The raw value is snapped onto a fixed breakpoint table
//! and the rate window is derived from the snapped bucket and the
//! organization's scrape interval.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Scrape interval assumed when the organization leaves it unset.
pub const DEFAULT_SCRAPE_INTERVAL_SECS: u64 = 15;

// ──────────────────────────────────────────────
// IntervalUnit / IntervalSpec
// ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntervalUnit {
    #[serde(rename = "ms")]
    Millis,
    #[serde(rename = "s")]
    Seconds,
    #[serde(rename = "m")]
    Minutes,
    #[serde(rename = "h")]
    Hours,
    #[serde(rename = "d")]
    Days,
    #[serde(rename = "w")]
    Weeks,
    #[serde(rename = "y")]
    Years,
}

impl IntervalUnit {
    pub fn suffix(&self) -> &'static str {
        match self {
            IntervalUnit::Millis => "ms",
            IntervalUnit::Seconds => "s",
            IntervalUnit::Minutes => "m",
            IntervalUnit::Hours => "h",
            IntervalUnit::Days => "d",
            IntervalUnit::Weeks => "w",
            IntervalUnit::Years => "y",
        }
    }

    /// Length of one unit in seconds.
    ///
    /// A year is `60*60*24*7*12` seconds, not a calendar year.
    pub fn seconds(&self) -> f64 {
        match self {
            IntervalUnit::Millis => 0.001,
            IntervalUnit::Seconds => 1.0,
            IntervalUnit::Minutes => 60.0,
            IntervalUnit::Hours => 3_600.0,
            IntervalUnit::Days => 86_400.0,
            IntervalUnit::Weeks => 604_800.0,
            IntervalUnit::Years => 7_257_600.0,
        }
    }

    fn millis(&self) -> u64 {
        match self {
            IntervalUnit::Millis => 1,
            IntervalUnit::Seconds => 1_000,
            IntervalUnit::Minutes => 60_000,
            IntervalUnit::Hours => 3_600_000,
            IntervalUnit::Days => 86_400_000,
            IntervalUnit::Weeks => 604_800_000,
            IntervalUnit::Years => 7_257_600_000,
        }
    }
}

/// A discretized interval such as `5m` or `500ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalSpec {
    pub value: u32,
    pub unit: IntervalUnit,
}

impl IntervalSpec {
    pub const fn new(value: u32, unit: IntervalUnit) -> Self {
        IntervalSpec { value, unit }
    }

    pub fn seconds(&self) -> f64 {
        self.value as f64 * self.unit.seconds()
    }

    pub fn millis(&self) -> u64 {
        self.value as u64 * self.unit.millis()
    }
}

impl fmt::Display for IntervalSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.value, self.unit.suffix())
    }
}

// ──────────────────────────────────────────────
// Breakpoint table
// ──────────────────────────────────────────────

enum UpperBound {
    AtMost(u64),
    Below(u64),
}

impl UpperBound {
    fn admits(&self, raw_millis: f64) -> bool {
        match *self {
            UpperBound::AtMost(limit) => raw_millis <= limit as f64,
            UpperBound::Below(limit) => raw_millis < limit as f64,
        }
    }
}

use IntervalUnit::{Days, Hours, Millis, Minutes, Seconds, Weeks, Years};
use UpperBound::{AtMost, Below};

// 24h is reachable from two consecutive rows; both are intentional.
const BREAKPOINTS: &[(UpperBound, IntervalSpec)] = &[
    (AtMost(10), IntervalSpec::new(1, Millis)),
    (AtMost(15), IntervalSpec::new(10, Millis)),
    (AtMost(35), IntervalSpec::new(20, Millis)),
    (AtMost(75), IntervalSpec::new(50, Millis)),
    (AtMost(150), IntervalSpec::new(100, Millis)),
    (AtMost(350), IntervalSpec::new(200, Millis)),
    (AtMost(750), IntervalSpec::new(500, Millis)),
    (AtMost(1_500), IntervalSpec::new(1, Seconds)),
    (AtMost(3_500), IntervalSpec::new(2, Seconds)),
    (AtMost(7_500), IntervalSpec::new(5, Seconds)),
    (AtMost(12_500), IntervalSpec::new(10, Seconds)),
    (AtMost(17_500), IntervalSpec::new(15, Seconds)),
    (AtMost(25_000), IntervalSpec::new(20, Seconds)),
    (AtMost(45_000), IntervalSpec::new(30, Seconds)),
    (AtMost(90_000), IntervalSpec::new(1, Minutes)),
    (AtMost(210_000), IntervalSpec::new(2, Minutes)),
    (AtMost(450_000), IntervalSpec::new(5, Minutes)),
    (AtMost(750_000), IntervalSpec::new(10, Minutes)),
    (AtMost(1_050_000), IntervalSpec::new(15, Minutes)),
    (AtMost(1_500_000), IntervalSpec::new(20, Minutes)),
    (AtMost(2_700_000), IntervalSpec::new(30, Minutes)),
    (AtMost(5_400_000), IntervalSpec::new(1, Hours)),
    (AtMost(9_000_000), IntervalSpec::new(2, Hours)),
    (AtMost(16_200_000), IntervalSpec::new(3, Hours)),
    (AtMost(32_400_000), IntervalSpec::new(6, Hours)),
    (AtMost(86_400_000), IntervalSpec::new(12, Hours)),
    (AtMost(172_800_000), IntervalSpec::new(24, Hours)),
    (AtMost(604_800_000), IntervalSpec::new(24, Hours)),
    (AtMost(1_814_400_000), IntervalSpec::new(1, Weeks)),
    (Below(3_628_800_000), IntervalSpec::new(30, Days)),
];

const FALLBACK: IntervalSpec = IntervalSpec::new(1, Years);

/// Snap a raw interval (milliseconds) onto the breakpoint table.
pub fn bucket_for(raw_millis: f64) -> IntervalSpec {
    BREAKPOINTS
        .iter()
        .find(|(bound, _)| bound.admits(raw_millis))
        .map(|(_, spec)| *spec)
        .unwrap_or(FALLBACK)
}

// ──────────────────────────────────────────────
// IntervalCalculator
// ──────────────────────────────────────────────

/// Output of [`IntervalCalculator::compute`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalResult {
    pub interval: IntervalSpec,
    pub rate_window_secs: u64,
    pub interval_millis: u64,
}

impl IntervalResult {
    /// The rate window rendered as a compact duration, e.g. `1m15s`.
    pub fn rate_interval(&self) -> String {
        format_rate_interval(self.rate_window_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalCalculator {
    scrape_interval_secs: u64,
}

impl Default for IntervalCalculator {
    fn default() -> Self {
        IntervalCalculator {
            scrape_interval_secs: DEFAULT_SCRAPE_INTERVAL_SECS,
        }
    }
}

impl IntervalCalculator {
    /// `None` falls back to [`DEFAULT_SCRAPE_INTERVAL_SECS`].
    pub fn new(scrape_interval_secs: Option<u64>) -> Self {
        IntervalCalculator {
            scrape_interval_secs: scrape_interval_secs.unwrap_or(DEFAULT_SCRAPE_INTERVAL_SECS),
        }
    }

    pub fn scrape_interval_secs(&self) -> u64 {
        self.scrape_interval_secs
    }

    pub fn compute(&self, range_millis: i64, viewport_pixels: i64) -> IntervalResult {
        let raw_millis = range_millis as f64 / viewport_pixels.max(1) as f64;
        let interval = bucket_for(raw_millis);

        let scrape = self.scrape_interval_secs as f64;
        let window = (interval.seconds() + scrape).max(4.0 * scrape);

        IntervalResult {
            interval,
            // sub-second buckets leave a fractional window
            rate_window_secs: window.ceil() as u64,
            interval_millis: interval.millis(),
        }
    }
}

/// [`IntervalCalculator::compute`] with the default scrape interval.
pub fn compute_interval(range_millis: i64, viewport_pixels: i64) -> IntervalResult {
    IntervalCalculator::default().compute(range_millis, viewport_pixels)
}

/// Render seconds as `<d>d<h>h<m>m<s>s`, omitting zero components.
pub fn format_rate_interval(total_secs: u64) -> String {
    let days = total_secs / 86_400;
    let hours = (total_secs % 86_400) / 3_600;
    let minutes = (total_secs % 3_600) / 60;
    let seconds = total_secs % 60;

    let mut out = String::new();
    for (amount, suffix) in [(days, 'd'), (hours, 'h'), (minutes, 'm'), (seconds, 's')] {
        if amount > 0 {
            out.push_str(&amount.to_string());
            out.push(suffix);
        }
    }
    out
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────
