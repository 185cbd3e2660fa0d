//! Bounded CPU history per service
//!
//! Each run contributes at most one sample. The window keeps the newest
//! samples with FIFO eviction and is persisted as part of the service state.

use crate::models::CpuSample;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, warn};

/// Default number of samples kept per service
pub const DEFAULT_HISTORY_SIZE: usize = 5;

/// Ring of recent CPU samples, oldest first
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricHistory {
    samples: VecDeque<CpuSample>,
}

impl MetricHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sample, evicting the oldest entries beyond `capacity`.
    ///
    /// A sample stamped at the same instant as the last stored one is
    /// dropped, so a repeated run cannot double count. Stored samples dated
    /// after the new one were taken under a clock that has since stepped
    /// back; they are evicted so the window keeps moving.
    pub fn push(&mut self, sample: CpuSample, capacity: usize) {
        let capacity = capacity.max(1);

        if self.samples.back().is_some_and(|last| last.at == sample.at) {
            debug!(sample = %sample.at, "Ignoring repeated CPU sample");
            self.trim(capacity);
            return;
        }

        let mut evicted = 0;
        while self.samples.back().is_some_and(|last| last.at > sample.at) {
            self.samples.pop_back();
            evicted += 1;
        }
        if evicted > 0 {
            warn!(
                event = "history_clock_skew",
                evicted,
                sample = %sample.at,
                "Dropped CPU samples dated after the current run"
            );
        }

        self.samples.push_back(sample);
        self.trim(capacity);
    }

    fn trim(&mut self, capacity: usize) {
        while self.samples.len() > capacity {
            self.samples.pop_front();
        }
    }

    /// Arithmetic mean of the present samples, `None` when there are none
    pub fn smoothed(&self) -> Option<f64> {
        let (sum, count) = self
            .samples
            .iter()
            .filter_map(|s| s.cpu_percent)
            .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));

        if count == 0 {
            None
        } else {
            Some(sum / count as f64)
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CpuSample> {
        self.samples.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn at(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minute)
    }

    fn sample(minute: i64, cpu: Option<f64>) -> CpuSample {
        CpuSample {
            at: at(minute),
            cpu_percent: cpu,
        }
    }

    #[test]
    fn test_empty_history_has_no_data() {
        let history = MetricHistory::new();
        assert!(history.is_empty());
        assert_eq!(history.smoothed(), None);
    }

    #[test]
    fn test_absent_samples_report_no_data_not_zero() {
        let mut history = MetricHistory::new();
        history.push(sample(0, None), 5);
        history.push(sample(1, None), 5);

        assert_eq!(history.len(), 2);
        assert_eq!(history.smoothed(), None);
    }

    #[test]
    fn test_mean_skips_absent_samples() {
        let mut history = MetricHistory::new();
        history.push(sample(0, Some(40.0)), 5);
        history.push(sample(1, None), 5);
        history.push(sample(2, Some(80.0)), 5);

        assert_eq!(history.smoothed(), Some(60.0));
    }

    #[test]
    fn test_fifo_eviction_at_capacity() {
        let mut history = MetricHistory::new();
        for i in 0..8 {
            history.push(sample(i, Some(i as f64 * 10.0)), 3);
        }

        assert_eq!(history.len(), 3);
        let kept: Vec<f64> = history.iter().filter_map(|s| s.cpu_percent).collect();
        assert_eq!(kept, vec![50.0, 60.0, 70.0]);
        assert_eq!(history.smoothed(), Some(60.0));
    }

    #[test]
    fn test_repeated_instant_is_ignored() {
        let mut history = MetricHistory::new();
        history.push(sample(5, Some(10.0)), 5);
        history.push(sample(5, Some(90.0)), 5);

        assert_eq!(history.len(), 1);
        assert_eq!(history.smoothed(), Some(10.0));
    }

    #[test]
    fn test_clock_stepping_back_evicts_future_samples() {
        let mut history = MetricHistory::new();
        history.push(sample(60, Some(50.0)), 5);
        for minute in (0..50).step_by(5) {
            history.push(sample(minute, Some(95.0)), 5);
        }

        assert_eq!(history.len(), 5);
        assert!(history.iter().all(|s| s.at <= at(45)));
        assert_eq!(history.smoothed(), Some(95.0));
    }

    #[test]
    fn test_earlier_sample_replaces_only_newer_entries() {
        let mut history = MetricHistory::new();
        history.push(sample(0, Some(10.0)), 5);
        history.push(sample(10, Some(20.0)), 5);
        history.push(sample(20, Some(30.0)), 5);
        history.push(sample(15, Some(60.0)), 5);

        let kept: Vec<f64> = history.iter().filter_map(|s| s.cpu_percent).collect();
        assert_eq!(kept, vec![10.0, 20.0, 60.0]);
    }

    #[test]
    fn test_shrinking_capacity_trims_oldest() {
        let mut history = MetricHistory::new();
        for i in 0..5 {
            history.push(sample(i, Some(10.0 * (i + 1) as f64)), 5);
        }
        history.push(sample(10, Some(60.0)), 2);

        let kept: Vec<f64> = history.iter().filter_map(|s| s.cpu_percent).collect();
        assert_eq!(kept, vec![50.0, 60.0]);
    }

    #[test]
    fn test_serializes_as_plain_list() {
        let mut history = MetricHistory::new();
        history.push(sample(0, Some(1.5)), 5);
        let json = serde_json::to_value(&history).unwrap();
        assert!(json.is_array());
        assert_eq!(json[0]["cpu_percent"], 1.5);
    }
}
