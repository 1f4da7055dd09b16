//! Bounded sample history for plotting
//!
//! Every tracked `(peer, variable)` pair owns a series that grows by one
//! sample per status report. When a series exceeds its cap it is cut back to
//! the most recent `keep` samples at once, so truncation happens once per
//! `cap - keep` appends rather than on every append.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::status::StatusMap;

// ----------------------------------------------------------------------------
// Constants
// ----------------------------------------------------------------------------

/// Maximum samples kept per series
pub const DEFAULT_HISTORY_CAP: usize = 1000;

/// Samples left after an overflow
pub const DEFAULT_HISTORY_KEEP: usize = 900;

/// Reserved variable recording the wall time of each status report
pub const TIME_VARIABLE: &str = "time";

// ----------------------------------------------------------------------------
// Samples
// ----------------------------------------------------------------------------

/// Value of one sample
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SampleValue {
    Number(f64),
    Text(String),
    Time(DateTime<Utc>),
    /// The peer did not report the variable
    Missing,
}

impl SampleValue {
    /// Numeric when the raw value parses as a float, raw text otherwise
    pub fn coerce(raw: Option<&str>) -> Self {
        match raw {
            None => SampleValue::Missing,
            Some(raw) => raw
                .trim()
                .parse::<f64>()
                .map(SampleValue::Number)
                .unwrap_or_else(|_| SampleValue::Text(raw.to_string())),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SampleValue::Number(value) => Some(*value),
            _ => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, SampleValue::Missing)
    }
}

/// One recorded sample
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sample {
    pub at: DateTime<Utc>,
    pub value: SampleValue,
}

// ----------------------------------------------------------------------------
// Limits
// ----------------------------------------------------------------------------

/// Cap and truncation target for every series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryLimits {
    pub cap: usize,
    pub keep: usize,
}

impl HistoryLimits {
    pub fn new(cap: usize, keep: usize) -> Result<Self, ConfigError> {
        let limits = Self { cap, keep };
        limits.validate()?;
        Ok(limits)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cap == 0 || self.keep >= self.cap {
            return Err(ConfigError::Validation(format!(
                "history keep ({}) must be smaller than a non-zero cap ({})",
                self.keep, self.cap
            )));
        }
        Ok(())
    }
}

impl Default for HistoryLimits {
    fn default() -> Self {
        Self {
            cap: DEFAULT_HISTORY_CAP,
            keep: DEFAULT_HISTORY_KEEP,
        }
    }
}

// ----------------------------------------------------------------------------
// History Store
// ----------------------------------------------------------------------------

/// Sample series per peer and variable
#[derive(Debug, Clone, Default)]
pub struct HistoryStore {
    limits: HistoryLimits,
    series: IndexMap<String, IndexMap<String, Vec<Sample>>>,
}

impl HistoryStore {
    pub fn new(limits: HistoryLimits) -> Self {
        Self {
            limits,
            series: IndexMap::new(),
        }
    }

    pub fn limits(&self) -> HistoryLimits {
        self.limits
    }

    /// Start tracking `variables` for `peer` with empty series
    pub fn track<I, S>(&mut self, peer: &str, variables: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tracked = self.series.entry(peer.to_string()).or_default();
        for variable in variables {
            tracked.entry(variable.into()).or_default();
        }
    }

    pub fn is_tracked(&self, peer: &str) -> bool {
        self.series.contains_key(peer)
    }

    /// Variables tracked for `peer`, in configuration order
    pub fn variables(&self, peer: &str) -> Vec<&str> {
        self.series
            .get(peer)
            .map(|vars| vars.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Append one sample to every tracked series of `peer`
    ///
    /// Returns the number of samples appended; zero for untracked peers.
    pub fn record(&mut self, peer: &str, status: &StatusMap, at: DateTime<Utc>) -> usize {
        let Some(tracked) = self.series.get_mut(peer) else {
            return 0;
        };

        let limits = self.limits;
        for (variable, samples) in tracked.iter_mut() {
            let value = if variable == TIME_VARIABLE {
                SampleValue::Time(at)
            } else {
                SampleValue::coerce(status.get(variable).map(String::as_str))
            };

            samples.push(Sample { at, value });
            if samples.len() > limits.cap {
                let excess = samples.len() - limits.keep;
                samples.drain(..excess);
            }
        }

        tracked.len()
    }

    /// Samples of one series, oldest first
    pub fn samples(&self, peer: &str, variable: &str) -> Option<&[Sample]> {
        self.series
            .get(peer)
            .and_then(|vars| vars.get(variable))
            .map(Vec::as_slice)
    }

    pub fn len(&self, peer: &str, variable: &str) -> usize {
        self.samples(peer, variable).map_or(0, <[Sample]>::len)
    }

    /// Empty every series while keeping the tracked variables
    pub fn reset(&mut self) {
        for samples in self.series.values_mut().flat_map(IndexMap::values_mut) {
            samples.clear();
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
