// src/engine/metrics.rs
use crate::models::cdr::Cdr;
use crate::rounding::round;
use chrono::{DateTime, Utc};
use std::time::Duration;

pub const ASR: &str = "ASR";
pub const ACD: &str = "ACD";
pub const TCD: &str = "TCD";
pub const ACC: &str = "ACC";
pub const TCC: &str = "TCC";

/// Sentinel returned when no qualifying sample exists; must cross the
/// RPC boundary unchanged.
pub const STATS_NA: f64 = -1.0;

/// Compact projection kept in the stats queues; one entry costs four
/// fields, not a full CDR.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QCdr {
    pub setup_time: DateTime<Utc>,
    pub answer_time: Option<DateTime<Utc>>,
    pub usage: Duration,
    pub cost: f64,
}

impl From<&Cdr> for QCdr {
    fn from(cdr: &Cdr) -> Self {
        Self {
            setup_time: cdr.setup_time,
            answer_time: cdr.answer_time,
            usage: cdr.usage,
            cost: cdr.cost,
        }
    }
}

/// Incremental accumulator; removal mirrors addition exactly so
/// sliding a CDR out of the window reverses its contribution.
#[derive(Debug, Clone)]
pub enum Metric {
    /// Answer-Seizure Ratio: answered / total × 100.
    Asr { answered: f64, count: f64 },
    /// Average Call Duration over answered calls, seconds.
    Acd { sum: Duration, count: f64 },
    /// Total Call Duration over answered calls, seconds.
    Tcd { sum: Duration, count: f64 },
    /// Average Call Cost over answered, non-negative-cost calls.
    Acc { sum: f64, count: f64 },
    /// Total Call Cost over answered, non-negative-cost calls.
    Tcc { sum: f64, count: f64 },
}

impl Metric {
    pub fn create(name: &str) -> Option<Metric> {
        match name {
            ASR => Some(Metric::Asr { answered: 0.0, count: 0.0 }),
            ACD => Some(Metric::Acd { sum: Duration::ZERO, count: 0.0 }),
            TCD => Some(Metric::Tcd { sum: Duration::ZERO, count: 0.0 }),
            ACC => Some(Metric::Acc { sum: 0.0, count: 0.0 }),
            TCC => Some(Metric::Tcc { sum: 0.0, count: 0.0 }),
            _ => None,
        }
    }

    pub fn add_cdr(&mut self, cdr: &QCdr) {
        match self {
            Metric::Asr { answered, count } => {
                if cdr.answer_time.is_some() {
                    *answered += 1.0;
                }
                *count += 1.0;
            }
            Metric::Acd { sum, count } | Metric::Tcd { sum, count } => {
                if cdr.answer_time.is_some() {
                    *sum += cdr.usage;
                    *count += 1.0;
                }
            }
            Metric::Acc { sum, count } | Metric::Tcc { sum, count } => {
                if cdr.answer_time.is_some() && cdr.cost >= 0.0 {
                    *sum += cdr.cost;
                    *count += 1.0;
                }
            }
        }
    }

    pub fn remove_cdr(&mut self, cdr: &QCdr) {
        match self {
            Metric::Asr { answered, count } => {
                if cdr.answer_time.is_some() {
                    *answered -= 1.0;
                }
                *count -= 1.0;
            }
            Metric::Acd { sum, count } | Metric::Tcd { sum, count } => {
                if cdr.answer_time.is_some() {
                    *sum = sum.checked_sub(cdr.usage).unwrap_or(Duration::ZERO);
                    *count -= 1.0;
                }
            }
            Metric::Acc { sum, count } | Metric::Tcc { sum, count } => {
                if cdr.answer_time.is_some() && cdr.cost >= 0.0 {
                    *sum -= cdr.cost;
                    *count -= 1.0;
                }
            }
        }
    }

    pub fn value(&self) -> f64 {
        match self {
            Metric::Asr { answered, count } => {
                if *count == 0.0 {
                    return STATS_NA;
                }
                round(answered / count * 100.0)
            }
            Metric::Acd { sum, count } => {
                if *count == 0.0 {
                    return STATS_NA;
                }
                round(sum.as_secs_f64() / count)
            }
            Metric::Tcd { sum, count } => {
                if *count == 0.0 {
                    return STATS_NA;
                }
                round(sum.as_secs_f64())
            }
            Metric::Acc { sum, count } => {
                if *count == 0.0 {
                    return STATS_NA;
                }
                round(sum / count)
            }
            Metric::Tcc { sum, count } => {
                if *count == 0.0 {
                    return STATS_NA;
                }
                round(*sum)
            }
        }
    }
}
