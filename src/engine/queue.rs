// src/engine/queue.rs
use crate::engine::metrics::{Metric, QCdr};
use crate::models::cdr::Cdr;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tracing::warn;

pub const DEFAULT_QUEUE_ID: &str = "*default";

/// Configuration of one stats queue: the bound (capacity and time
/// window), the metrics to maintain and the admission filter. Empty
/// filter vectors match everything; interval filters carry one or two
/// bounds and are half-open on the upper one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsQueueConfig {
    pub id: String,
    pub queue_length: usize,
    /// Seconds; 0 disables the time window.
    pub time_window_secs: u64,
    pub metrics: Vec<String>,
    pub setup_interval: Vec<DateTime<Utc>>,
    pub tor: Vec<String>,
    pub cdr_host: Vec<String>,
    pub cdr_source: Vec<String>,
    pub req_type: Vec<String>,
    pub direction: Vec<String>,
    pub tenant: Vec<String>,
    pub category: Vec<String>,
    pub account: Vec<String>,
    pub subject: Vec<String>,
    pub destination_prefix: Vec<String>,
    pub usage_interval_secs: Vec<f64>,
    pub supplier: Vec<String>,
    pub disconnect_cause: Vec<String>,
    pub mediation_run_ids: Vec<String>,
    pub rated_account: Vec<String>,
    pub rated_subject: Vec<String>,
    pub cost_interval: Vec<f64>,
}

impl StatsQueueConfig {
    /// Admission predicate over the full CDR.
    pub fn accepts(&self, cdr: &Cdr) -> bool {
        if !self.setup_interval.is_empty() {
            if cdr.setup_time < self.setup_interval[0] {
                return false;
            }
            if self.setup_interval.len() > 1 && cdr.setup_time >= self.setup_interval[1] {
                return false;
            }
        }
        if !member(&self.tor, &cdr.tor)
            || !member(&self.cdr_host, &cdr.cdr_host)
            || !member(&self.cdr_source, &cdr.cdr_source)
            || !member(&self.req_type, &cdr.req_type)
            || !member(&self.direction, &cdr.direction)
            || !member(&self.tenant, &cdr.tenant)
            || !member(&self.category, &cdr.category)
            || !member(&self.account, &cdr.account)
            || !member(&self.subject, &cdr.subject)
        {
            return false;
        }
        if !self.destination_prefix.is_empty()
            && !self
                .destination_prefix
                .iter()
                .any(|p| cdr.destination.starts_with(p.as_str()))
        {
            return false;
        }
        if !self.usage_interval_secs.is_empty() {
            let usage = cdr.usage.as_secs_f64();
            if usage < self.usage_interval_secs[0] {
                return false;
            }
            if self.usage_interval_secs.len() > 1 && usage >= self.usage_interval_secs[1] {
                return false;
            }
        }
        if !member(&self.supplier, &cdr.supplier)
            || !member(&self.disconnect_cause, &cdr.disconnect_cause)
            || !member(&self.mediation_run_ids, &cdr.mediation_run_id)
            || !member(&self.rated_account, &cdr.rated_account)
            || !member(&self.rated_subject, &cdr.rated_subject)
        {
            return false;
        }
        if !self.cost_interval.is_empty() {
            if cdr.cost < self.cost_interval[0] {
                return false;
            }
            if self.cost_interval.len() > 1 && cdr.cost >= self.cost_interval[1] {
                return false;
            }
        }
        true
    }
}

fn member(set: &[String], value: &str) -> bool {
    set.is_empty() || set.iter().any(|s| s == value)
}

/// Time-and-count bounded FIFO of accepted CDR projections, keeping
/// its metric set synchronized with its contents.
#[derive(Debug)]
pub struct StatsQueue {
    conf: StatsQueueConfig,
    cdrs: VecDeque<QCdr>,
    metrics: Vec<(String, Metric)>,
}

impl StatsQueue {
    pub fn new(conf: StatsQueueConfig) -> Self {
        let metrics = conf
            .metrics
            .iter()
            .filter_map(|name| match Metric::create(name) {
                Some(m) => Some((name.clone(), m)),
                None => {
                    warn!("<Stats> unsupported metric {} in queue {}", name, conf.id);
                    None
                }
            })
            .collect();
        Self {
            conf,
            cdrs: VecDeque::new(),
            metrics,
        }
    }

    pub fn id(&self) -> &str {
        &self.conf.id
    }

    pub fn conf(&self) -> &StatsQueueConfig {
        &self.conf
    }

    pub fn len(&self) -> usize {
        self.cdrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cdrs.is_empty()
    }

    /// Admits the CDR when the filter accepts it, then re-establishes
    /// both bounds. Returns whether the CDR was admitted.
    pub fn accept_cdr(&mut self, cdr: &Cdr) -> bool {
        self.accept_cdr_at(cdr, Utc::now())
    }

    pub fn accept_cdr_at(&mut self, cdr: &Cdr, now: DateTime<Utc>) -> bool {
        if !self.conf.accepts(cdr) {
            return false;
        }
        let qcdr = QCdr::from(cdr);
        self.cdrs.push_back(qcdr);
        for (_, metric) in &mut self.metrics {
            metric.add_cdr(&qcdr);
        }
        if self.conf.queue_length > 0 {
            while self.cdrs.len() > self.conf.queue_length {
                self.pop_front();
            }
        }
        self.purge_expired_at(now);
        true
    }

    /// Drops head entries older than the window; idempotent, safe on a
    /// timer or before every read.
    pub fn purge_expired(&mut self) {
        self.purge_expired_at(Utc::now());
    }

    pub fn purge_expired_at(&mut self, now: DateTime<Utc>) {
        if self.conf.time_window_secs == 0 {
            return;
        }
        let oldest = now - ChronoDuration::seconds(self.conf.time_window_secs as i64);
        while matches!(self.cdrs.front(), Some(head) if head.setup_time < oldest) {
            self.pop_front();
        }
    }

    fn pop_front(&mut self) {
        if let Some(old) = self.cdrs.pop_front() {
            for (_, metric) in &mut self.metrics {
                metric.remove_cdr(&old);
            }
        }
    }

    /// Discards all items and returns every metric to its zero state.
    pub fn reset(&mut self) {
        self.cdrs.clear();
        for (name, metric) in &mut self.metrics {
            *metric = Metric::create(name).expect("metric name validated at construction");
        }
    }

    pub fn values(&self) -> HashMap<String, f64> {
        self.metrics
            .iter()
            .map(|(name, metric)| (name.clone(), metric.value()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::metrics::{ACC, ACD, ASR, STATS_NA, TCD};
    use chrono::TimeZone;
    use std::time::Duration;

    fn cdr(answered: bool, usage_secs: u64, cost: f64) -> Cdr {
        let setup = Utc.with_ymd_and_hms(2013, 11, 7, 8, 42, 26).unwrap();
        Cdr {
            tor: "*voice".to_string(),
            acc_id: "dsafdsaf".to_string(),
            tenant: "voxtelecom.org".to_string(),
            category: "call".to_string(),
            account: "1001".to_string(),
            subject: "1001".to_string(),
            destination: "+4986517174963".to_string(),
            setup_time: setup,
            answer_time: answered.then(|| setup + ChronoDuration::seconds(1)),
            usage: Duration::from_secs(usage_secs),
            cost,
            ..Cdr::default()
        }
    }

    fn queue(conf: StatsQueueConfig) -> StatsQueue {
        StatsQueue::new(conf)
    }

    #[test]
    fn test_accept_and_values() {
        let mut q = queue(StatsQueueConfig {
            id: "q1".to_string(),
            queue_length: 10,
            metrics: vec![ASR.to_string(), ACD.to_string(), ACC.to_string()],
            ..StatsQueueConfig::default()
        });
        assert!(q.accept_cdr(&cdr(true, 10, 10.0)));
        assert!(q.accept_cdr(&cdr(true, 5, 5.0)));
        assert!(q.accept_cdr(&cdr(true, 30, 30.0)));
        assert!(q.accept_cdr(&cdr(false, 0, 0.0)));
        let values = q.values();
        assert_eq!(values[ASR], 75.0);
        assert_eq!(values[ACD], 15.0);
        assert_eq!(values[ACC], 15.0);
    }

    #[test]
    fn test_filter_rejects() {
        let mut q = queue(StatsQueueConfig {
            id: "q1".to_string(),
            queue_length: 10,
            metrics: vec![ASR.to_string()],
            tenant: vec!["other.org".to_string()],
            ..StatsQueueConfig::default()
        });
        assert!(!q.accept_cdr(&cdr(true, 10, 1.0)));
        assert!(q.is_empty());
    }

    #[test]
    fn test_destination_prefix_filter() {
        let conf = StatsQueueConfig {
            destination_prefix: vec!["+49".to_string(), "+40".to_string()],
            ..StatsQueueConfig::default()
        };
        assert!(conf.accepts(&cdr(true, 10, 1.0)));
        let mut other = cdr(true, 10, 1.0);
        other.destination = "+33123".to_string();
        assert!(!conf.accepts(&other));
    }

    #[test]
    fn test_interval_filters_half_open() {
        let conf = StatsQueueConfig {
            usage_interval_secs: vec![5.0, 30.0],
            cost_interval: vec![0.0],
            ..StatsQueueConfig::default()
        };
        assert!(conf.accepts(&cdr(true, 5, 1.0)));
        assert!(!conf.accepts(&cdr(true, 30, 1.0)));
        assert!(!conf.accepts(&cdr(true, 4, 1.0)));
        assert!(!conf.accepts(&cdr(true, 10, -1.0)));
    }

    #[test]
    fn test_capacity_bound_evicts_head() {
        let mut q = queue(StatsQueueConfig {
            id: "q1".to_string(),
            queue_length: 2,
            metrics: vec![TCD.to_string()],
            ..StatsQueueConfig::default()
        });
        q.accept_cdr(&cdr(true, 10, 1.0));
        q.accept_cdr(&cdr(true, 5, 1.0));
        q.accept_cdr(&cdr(true, 30, 1.0));
        assert_eq!(q.len(), 2);
        assert_eq!(q.values()[TCD], 35.0);
    }

    #[test]
    fn test_overflow_round_trip_keeps_metrics_consistent() {
        // Admitting then evicting the same CDR leaves values unchanged.
        let mut q = queue(StatsQueueConfig {
            id: "q1".to_string(),
            queue_length: 1,
            metrics: vec![ASR.to_string(), ACD.to_string()],
            ..StatsQueueConfig::default()
        });
        q.accept_cdr(&cdr(true, 30, 1.0));
        let before = q.values();
        q.accept_cdr(&cdr(true, 30, 1.0));
        assert_eq!(q.values(), before);
    }

    #[test]
    fn test_time_window_purge() {
        let setup = Utc.with_ymd_and_hms(2013, 11, 7, 8, 42, 26).unwrap();
        let mut q = queue(StatsQueueConfig {
            id: "q1".to_string(),
            queue_length: 10,
            time_window_secs: 60,
            metrics: vec![ASR.to_string()],
            ..StatsQueueConfig::default()
        });
        q.accept_cdr_at(&cdr(true, 10, 1.0), setup);
        assert_eq!(q.len(), 1);
        // Within the window nothing is purged, afterwards the head goes.
        q.purge_expired_at(setup + ChronoDuration::seconds(59));
        assert_eq!(q.len(), 1);
        q.purge_expired_at(setup + ChronoDuration::seconds(87));
        assert!(q.is_empty());
        assert_eq!(q.values()[ASR], STATS_NA);
    }

    #[test]
    fn test_reset() {
        let mut q = queue(StatsQueueConfig {
            id: "q1".to_string(),
            queue_length: 10,
            metrics: vec![ASR.to_string(), ACD.to_string()],
            ..StatsQueueConfig::default()
        });
        q.accept_cdr(&cdr(true, 10, 1.0));
        q.reset();
        assert!(q.is_empty());
        let values = q.values();
        assert_eq!(values[ASR], STATS_NA);
        assert_eq!(values[ACD], STATS_NA);
    }
}
