// src/storage/mod.rs
use crate::engine::StatsQueueConfig;
use crate::error::EngineError;
use crate::models::cdr::{parse_time, Cdr};
use crate::models::AttrGetCdrs;
use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::RwLock;
use tracing::{info, warn};

/// Persistence seam for finalized CDRs; the real back-end lives
/// outside this crate.
#[async_trait]
pub trait CdrStorage: Send + Sync {
    async fn store_cdr(&self, cdr: &Cdr) -> Result<(), EngineError>;
    async fn get_cdrs(&self, filter: &AttrGetCdrs) -> Result<Vec<Cdr>, EngineError>;
}

/// Data plane seam: schema is owned externally, this crate only needs
/// startup initialization and the tariff-plan load trigger.
#[async_trait]
pub trait DataDb: Send + Sync {
    async fn init(&self) -> Result<(), EngineError>;
    /// Loads a tariff-plan folder and returns the stats queue
    /// configurations it carries.
    async fn load_tariff_plan(&self, folder: &str) -> Result<Vec<StatsQueueConfig>, EngineError>;
}

/// In-process CDR store. Records are unique per (id, mediation run);
/// storing the same identity again replaces the previous record.
#[derive(Default)]
pub struct MemoryCdrStorage {
    cdrs: RwLock<Vec<Cdr>>,
    order_seq: AtomicI64,
}

impl MemoryCdrStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn matches(filter: &AttrGetCdrs, cdr: &Cdr) -> Result<bool, EngineError> {
        if !filter.accounts.is_empty() && !filter.accounts.contains(&cdr.account) {
            return Ok(false);
        }
        if !filter.tenants.is_empty() && !filter.tenants.contains(&cdr.tenant) {
            return Ok(false);
        }
        if !filter.run_ids.is_empty() && !filter.run_ids.contains(&cdr.mediation_run_id) {
            return Ok(false);
        }
        if let Some(start) = &filter.setup_time_start {
            if let Some(start) = parse_time(start)? {
                if cdr.setup_time < start {
                    return Ok(false);
                }
            }
        }
        if let Some(end) = &filter.setup_time_end {
            if let Some(end) = parse_time(end)? {
                if cdr.setup_time >= end {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }
}

#[async_trait]
impl CdrStorage for MemoryCdrStorage {
    async fn store_cdr(&self, cdr: &Cdr) -> Result<(), EngineError> {
        let mut stored = cdr.clone();
        if stored.order_id == 0 {
            stored.order_id = self.order_seq.fetch_add(1, Ordering::SeqCst) + 1;
        }
        let mut cdrs = self.cdrs.write().unwrap();
        match cdrs
            .iter_mut()
            .find(|c| c.id == stored.id && c.mediation_run_id == stored.mediation_run_id)
        {
            Some(existing) => *existing = stored,
            None => cdrs.push(stored),
        }
        Ok(())
    }

    async fn get_cdrs(&self, filter: &AttrGetCdrs) -> Result<Vec<Cdr>, EngineError> {
        let cdrs = self.cdrs.read().unwrap();
        let mut out = Vec::new();
        for cdr in cdrs.iter() {
            if Self::matches(filter, cdr)? {
                out.push(cdr.clone());
            }
        }
        Ok(out)
    }
}

/// In-process data plane; tariff-plan folders carry the stats queue
/// set as `cdr_stats.json`.
#[derive(Default)]
pub struct MemoryDataDb;

impl MemoryDataDb {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DataDb for MemoryDataDb {
    async fn init(&self) -> Result<(), EngineError> {
        info!("<DataDb> in-memory data plane initialized");
        Ok(())
    }

    async fn load_tariff_plan(&self, folder: &str) -> Result<Vec<StatsQueueConfig>, EngineError> {
        let path = Path::new(folder).join("cdr_stats.json");
        if !path.exists() {
            warn!("<DataDb> no cdr_stats.json under {}", folder);
            return Ok(Vec::new());
        }
        let raw = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| EngineError::Storage(format!("{}: {}", path.display(), e)))?;
        let confs: Vec<StatsQueueConfig> = serde_json::from_str(&raw)?;
        info!(
            "<DataDb> loaded {} stats queue configs from {}",
            confs.len(),
            folder
        );
        Ok(confs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn cdr(account: &str, run: &str) -> Cdr {
        let setup = Utc.with_ymd_and_hms(2013, 11, 7, 8, 42, 26).unwrap();
        Cdr {
            id: Cdr::gen_id(account, setup),
            acc_id: account.to_string(),
            tenant: "voxtelecom.org".to_string(),
            category: "call".to_string(),
            account: account.to_string(),
            subject: account.to_string(),
            destination: "1002".to_string(),
            setup_time: setup,
            mediation_run_id: run.to_string(),
            ..Cdr::default()
        }
    }

    #[tokio::test]
    async fn test_store_and_query() {
        let storage = MemoryCdrStorage::new();
        storage.store_cdr(&cdr("1001", "*default")).await.unwrap();
        storage.store_cdr(&cdr("1002", "*default")).await.unwrap();
        storage.store_cdr(&cdr("1003", "*default")).await.unwrap();

        let all = storage.get_cdrs(&AttrGetCdrs::default()).await.unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.iter().all(|c| c.order_id > 0));

        let filtered = storage
            .get_cdrs(&AttrGetCdrs {
                accounts: vec!["1001".to_string()],
                ..AttrGetCdrs::default()
            })
            .await
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].account, "1001");
    }

    #[tokio::test]
    async fn test_store_same_identity_replaces() {
        let storage = MemoryCdrStorage::new();
        let mut c = cdr("1001", "*default");
        storage.store_cdr(&c).await.unwrap();
        c.cost = 2.5;
        storage.store_cdr(&c).await.unwrap();
        let all = storage.get_cdrs(&AttrGetCdrs::default()).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].cost, 2.5);
    }

    #[tokio::test]
    async fn test_same_id_distinct_runs_coexist() {
        let storage = MemoryCdrStorage::new();
        let base = cdr("1001", "*default");
        let mut derived = base.clone();
        derived.mediation_run_id = "run_wholesale".to_string();
        storage.store_cdr(&base).await.unwrap();
        storage.store_cdr(&derived).await.unwrap();
        let all = storage.get_cdrs(&AttrGetCdrs::default()).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_setup_time_filter() {
        let storage = MemoryCdrStorage::new();
        storage.store_cdr(&cdr("1001", "*default")).await.unwrap();
        let none = storage
            .get_cdrs(&AttrGetCdrs {
                setup_time_start: Some("2014-01-01T00:00:00Z".to_string()),
                ..AttrGetCdrs::default()
            })
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_load_tariff_plan_missing_folder() {
        let db = MemoryDataDb::new();
        let confs = db.load_tariff_plan("/nonexistent").await.unwrap();
        assert!(confs.is_empty());
    }

    #[tokio::test]
    async fn test_load_tariff_plan_from_folder() {
        let dir = std::env::temp_dir().join("charon_tp_test");
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(
            dir.join("cdr_stats.json"),
            r#"[{"id": "CDRST4", "queue_length": 10, "metrics": ["ASR", "ACD"]}]"#,
        )
        .await
        .unwrap();
        let db = MemoryDataDb::new();
        let confs = db.load_tariff_plan(dir.to_str().unwrap()).await.unwrap();
        assert_eq!(confs.len(), 1);
        assert_eq!(confs[0].id, "CDRST4");
        assert_eq!(confs[0].metrics, vec!["ASR", "ACD"]);
    }
}
