// src/engine/stats.rs
use crate::engine::metrics::{ACC, ACD, ASR};
use crate::engine::queue::{StatsQueue, StatsQueueConfig, DEFAULT_QUEUE_ID};
use crate::error::EngineError;
use crate::models::cdr::Cdr;
use std::collections::HashMap;
use std::sync::{Mutex, RwLock};
use tracing::{debug, warn};

/// Registry of stats queues keyed by config id. The registry itself is
/// read-mostly; each queue serializes its own mutations so distinct
/// queues update in parallel.
pub struct StatsEngine {
    queues: RwLock<HashMap<String, Mutex<StatsQueue>>>,
    default_queue_length: usize,
}

impl StatsEngine {
    pub fn new(default_queue_length: usize) -> Self {
        let engine = Self {
            queues: RwLock::new(HashMap::new()),
            default_queue_length,
        };
        engine
            .queues
            .write()
            .unwrap()
            .insert(
                DEFAULT_QUEUE_ID.to_string(),
                Mutex::new(StatsQueue::new(engine.default_conf())),
            );
        engine
    }

    fn default_conf(&self) -> StatsQueueConfig {
        StatsQueueConfig {
            id: DEFAULT_QUEUE_ID.to_string(),
            queue_length: self.default_queue_length,
            metrics: vec![ASR.to_string(), ACD.to_string(), ACC.to_string()],
            ..StatsQueueConfig::default()
        }
    }

    pub fn queue_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.queues.read().unwrap().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Forwards the CDR to every queue whose filter accepts it; one CDR
    /// may land in several queues.
    pub fn ingest(&self, cdr: &Cdr) {
        let queues = self.queues.read().unwrap();
        for (id, queue) in queues.iter() {
            if queue.lock().unwrap().accept_cdr(cdr) {
                debug!("<Stats> queue {} accepted cdr {}", id, cdr.id);
            }
        }
    }

    pub fn get_metrics(&self, queue_id: &str) -> Result<HashMap<String, f64>, EngineError> {
        let queues = self.queues.read().unwrap();
        let queue = queues
            .get(queue_id)
            .ok_or_else(|| EngineError::NotFound(queue_id.to_string()))?;
        let mut queue = queue.lock().unwrap();
        queue.purge_expired();
        Ok(queue.values())
    }

    /// Idempotent; unknown ids are reported and skipped. An empty id
    /// list resets every queue.
    pub fn reset_queues(&self, ids: &[String]) {
        let queues = self.queues.read().unwrap();
        if ids.is_empty() {
            for queue in queues.values() {
                queue.lock().unwrap().reset();
            }
            return;
        }
        for id in ids {
            match queues.get(id) {
                Some(queue) => queue.lock().unwrap().reset(),
                None => warn!("<Stats> reset requested for unknown queue {}", id),
            }
        }
    }

    /// Replaces the queue set atomically. Queues that keep their id
    /// keep their history; removed queues are dropped and new ones
    /// start empty. The default queue always survives.
    pub fn reload(&self, confs: Vec<StatsQueueConfig>) {
        let mut queues = self.queues.write().unwrap();
        let mut next: HashMap<String, Mutex<StatsQueue>> = HashMap::new();
        for conf in confs {
            if conf.id.is_empty() {
                warn!("<Stats> skipping queue config without id");
                continue;
            }
            let id = conf.id.clone();
            match queues.remove(&id) {
                Some(existing) => {
                    next.insert(id, existing);
                }
                None => {
                    next.insert(id, Mutex::new(StatsQueue::new(conf)));
                }
            }
        }
        match queues.remove(DEFAULT_QUEUE_ID) {
            Some(default_queue) => {
                next.entry(DEFAULT_QUEUE_ID.to_string())
                    .or_insert(default_queue);
            }
            None => {
                next.entry(DEFAULT_QUEUE_ID.to_string())
                    .or_insert_with(|| Mutex::new(StatsQueue::new(self.default_conf())));
            }
        }
        *queues = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::metrics::{STATS_NA, TCC};
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
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

    fn conf(id: &str, metrics: &[&str]) -> StatsQueueConfig {
        StatsQueueConfig {
            id: id.to_string(),
            queue_length: 50,
            metrics: metrics.iter().map(|m| m.to_string()).collect(),
            ..StatsQueueConfig::default()
        }
    }

    #[test]
    fn test_default_queue_present() {
        let engine = StatsEngine::new(50);
        assert_eq!(engine.queue_ids(), vec![DEFAULT_QUEUE_ID.to_string()]);
    }

    #[test]
    fn test_ingest_lands_in_all_accepting_queues() {
        let engine = StatsEngine::new(50);
        engine.reload(vec![conf("CDRST3", &[TCC]), conf("CDRST4", &[ASR, ACD])]);
        assert_eq!(engine.queue_ids(), vec!["*default", "CDRST3", "CDRST4"]);

        engine.ingest(&cdr(true, 10, 10.0));
        engine.ingest(&cdr(true, 5, 5.0));
        engine.ingest(&cdr(true, 30, 30.0));
        engine.ingest(&cdr(false, 0, 0.0));

        let default_metrics = engine.get_metrics(DEFAULT_QUEUE_ID).unwrap();
        assert_eq!(default_metrics[ASR], 75.0);
        assert_eq!(default_metrics[ACD], 15.0);
        assert_eq!(default_metrics[ACC], 15.0);

        let cdrst4 = engine.get_metrics("CDRST4").unwrap();
        assert_eq!(cdrst4[ASR], 75.0);
        assert_eq!(cdrst4[ACD], 15.0);
    }

    #[test]
    fn test_get_metrics_unknown_queue() {
        let engine = StatsEngine::new(50);
        assert!(matches!(
            engine.get_metrics("CDRST9"),
            Err(EngineError::NotFound(_))
        ));
    }

    #[test]
    fn test_selective_reset() {
        let engine = StatsEngine::new(50);
        engine.reload(vec![conf("CDRST4", &[ASR, ACD])]);
        for c in [cdr(true, 10, 10.0), cdr(false, 0, 0.0)] {
            engine.ingest(&c);
        }
        engine.reset_queues(&["CDRST4".to_string(), "CDRST9".to_string()]);
        let cdrst4 = engine.get_metrics("CDRST4").unwrap();
        assert_eq!(cdrst4[ASR], STATS_NA);
        assert_eq!(cdrst4[ACD], STATS_NA);
        // The default queue is untouched.
        let default_metrics = engine.get_metrics(DEFAULT_QUEUE_ID).unwrap();
        assert_eq!(default_metrics[ASR], 50.0);
    }

    #[test]
    fn test_reload_keeps_history_for_surviving_ids() {
        let engine = StatsEngine::new(50);
        engine.reload(vec![conf("CDRST3", &[ASR]), conf("CDRST4", &[ASR])]);
        engine.ingest(&cdr(true, 10, 1.0));
        engine.reload(vec![conf("CDRST3", &[ASR]), conf("CDRST5", &[ASR])]);
        assert_eq!(engine.queue_ids(), vec!["*default", "CDRST3", "CDRST5"]);
        assert_eq!(engine.get_metrics("CDRST3").unwrap()[ASR], 100.0);
        assert_eq!(engine.get_metrics("CDRST5").unwrap()[ASR], STATS_NA);
        assert!(engine.get_metrics("CDRST4").is_err());
    }
}
