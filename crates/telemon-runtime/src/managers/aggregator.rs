//! Status aggregation
//!
//! Records tracked variables into history, decides when a status report
//! should be echoed as keywords to the keyword-subscriber role and throttles
//! persistence of the aggregated view. Routing and sink writes stay with the
//! engine; the aggregator only says what to do.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use telemon_core::protocol::quote;
use telemon_core::{HistoryStore, MonitorConfig, PlotConfig, Sample, StatusMap};

/// What one status report asks the engine to do
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusOutcome {
    /// Samples appended to history
    pub samples: usize,
    /// `set_keywords ...` line for the keyword-subscriber role
    pub keywords: Option<String>,
}

/// History samples behind one configured plot
#[derive(Debug, Clone, PartialEq)]
pub struct PlotSeries {
    pub peer: String,
    pub plot: String,
    pub config: PlotConfig,
    pub series: Vec<(String, Vec<Sample>)>,
}

/// Per-peer history and persistence throttle
#[derive(Debug)]
pub struct StatusAggregator {
    history: HistoryStore,
    plots: IndexMap<String, IndexMap<String, PlotConfig>>,
    producer_role: String,
    keyword_role: String,
    status_interval: f64,
    last_persisted: Option<Instant>,
}

impl StatusAggregator {
    pub fn new(config: &MonitorConfig) -> Self {
        let mut history = HistoryStore::new(config.history_limits());
        let mut plots = IndexMap::new();

        for (name, peer) in config.enabled_peers() {
            let tracked = peer.tracked_variables();
            if !tracked.is_empty() {
                history.track(name, tracked);
            }
            if !peer.plots.is_empty() {
                plots.insert(name.clone(), peer.plots.clone());
            }
        }

        Self {
            history,
            plots,
            producer_role: config.producer_role.clone(),
            keyword_role: config.keyword_role.clone(),
            status_interval: config.db_status_interval,
            last_persisted: None,
        }
    }

    /// Handle a status report from the identified peer `name`
    pub fn on_status(
        &mut self,
        name: &str,
        role: Option<&str>,
        status: &StatusMap,
        wall: DateTime<Utc>,
    ) -> StatusOutcome {
        let samples = self.history.record(name, status, wall);

        let keywords = (role != Some(self.producer_role.as_str()) && !status.is_empty())
            .then(|| keywords_line(name, status));

        StatusOutcome { samples, keywords }
    }

    /// True when more than the status interval passed since the last
    /// persisted snapshot; records `now` as the new reference when it is
    pub fn should_persist(&mut self, now: Instant) -> bool {
        let due = self.last_persisted.map_or(true, |last| {
            now.saturating_duration_since(last) > Duration::from_secs_f64(self.status_interval)
        });
        if due {
            self.last_persisted = Some(now);
        }
        due
    }

    pub fn keyword_role(&self) -> &str {
        &self.keyword_role
    }

    pub fn producer_role(&self) -> &str {
        &self.producer_role
    }

    pub fn status_interval(&self) -> f64 {
        self.status_interval
    }

    /// Callers validate the range
    pub fn set_status_interval(&mut self, seconds: f64) {
        self.status_interval = seconds;
    }

    pub fn reset_plots(&mut self) {
        self.history.reset();
    }

    pub fn history(&self, peer: &str, variable: &str) -> Option<&[Sample]> {
        self.history.samples(peer, variable)
    }

    pub fn history_store(&self) -> &HistoryStore {
        &self.history
    }

    pub fn plot_series(&self, peer: &str, plot: &str) -> Option<PlotSeries> {
        let config = self.plots.get(peer)?.get(plot)?;
        let series = config
            .values
            .iter()
            .map(|variable| {
                let samples = self.history(peer, variable).unwrap_or_default().to_vec();
                (variable.clone(), samples)
            })
            .collect();

        Some(PlotSeries {
            peer: peer.to_string(),
            plot: plot.to_string(),
            config: config.clone(),
            series,
        })
    }
}

/// `set_keywords peer.key="value" ...`
pub fn keywords_line(peer: &str, status: &StatusMap) -> String {
    let keywords: Vec<String> = status
        .iter()
        .map(|(key, value)| format!("{peer}.{key}={}", quote(value)))
        .collect();
    format!("set_keywords {}", keywords.join(" "))
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use telemon_core::{PeerConfig, SampleValue};

    fn config() -> MonitorConfig {
        let mut config = MonitorConfig::default();
        let mut weather = PeerConfig {
            track: vec!["time".into(), "temp".into()],
            ..PeerConfig::default()
        };
        weather.plots.insert(
            "temperature".into(),
            PlotConfig {
                values: vec!["time".into(), "temp".into()],
                ..PlotConfig::default()
            },
        );
        config.peers.insert("weather".into(), weather);
        config
    }

    fn status(pairs: &[(&str, &str)]) -> StatusMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_keywords_line_quotes_values() {
        assert_eq!(
            keywords_line("dome", &status(&[("state", "open"), ("az", "12.5")])),
            r#"set_keywords dome.state="open" dome.az="12.5""#
        );
    }

    #[test]
    fn test_producer_reports_are_not_echoed() {
        let mut aggregator = StatusAggregator::new(&config());
        let outcome = aggregator.on_status("ccd1", Some("ccd"), &status(&[("t", "1")]), Utc::now());
        assert!(outcome.keywords.is_none());

        let outcome = aggregator.on_status("dome", Some("dome"), &status(&[("t", "1")]), Utc::now());
        assert_eq!(outcome.keywords.as_deref(), Some(r#"set_keywords dome.t="1""#));
    }

    #[test]
    fn test_persistence_throttle() {
        let mut aggregator = StatusAggregator::new(&config());
        let start = Instant::now();

        assert!(aggregator.should_persist(start));
        assert!(!aggregator.should_persist(start + Duration::from_secs(30)));
        assert!(!aggregator.should_persist(start + Duration::from_secs(60)));
        assert!(aggregator.should_persist(start + Duration::from_secs(61)));
        assert!(!aggregator.should_persist(start + Duration::from_secs(62)));
    }

    #[test]
    fn test_interval_change_applies_to_next_report() {
        let mut aggregator = StatusAggregator::new(&config());
        let start = Instant::now();
        aggregator.should_persist(start);

        aggregator.set_status_interval(5.0);
        assert!(aggregator.should_persist(start + Duration::from_secs(6)));
    }

    #[test]
    fn test_history_and_plot_series() {
        let mut aggregator = StatusAggregator::new(&config());
        let wall = Utc::now();
        let outcome = aggregator.on_status(
            "weather",
            Some("weather"),
            &status(&[("temp", "3.5")]),
            wall,
        );
        assert_eq!(outcome.samples, 2);

        let plot = aggregator.plot_series("weather", "temperature").unwrap();
        assert_eq!(plot.series[0].0, "time");
        assert_eq!(plot.series[0].1[0].value, SampleValue::Time(wall));
        assert_eq!(plot.series[1].1[0].value, SampleValue::Number(3.5));
        assert!(aggregator.plot_series("weather", "humidity").is_none());

        aggregator.reset_plots();
        assert_eq!(aggregator.history("weather", "temp").map(<[Sample]>::len), Some(0));
    }
}
