// src/services/cdr_server.rs
use crate::engine::StatsEngine;
use crate::error::EngineError;
use crate::models::cdr::{Cdr, ExternalCdr, ForkTemplate};
use crate::models::DEFAULT_RUN_ID;
use crate::storage::CdrStorage;
use std::sync::Arc;
use tracing::{error, info, warn};

/// One re-rating pass: each incoming raw CDR is forked under this run
/// id with the primary fields re-extracted through the template.
#[derive(Debug, Clone, Default)]
pub struct MediationRun {
    pub run_id: String,
    pub template: ForkTemplate,
}

/// Receiving side of the CDR pipeline: persists incoming records,
/// fans them out per mediation run, feeds the stats queues and
/// optionally replicates to a remote CDR server.
pub struct CdrServer {
    storage: Arc<dyn CdrStorage>,
    stats: Arc<StatsEngine>,
    mediation_runs: Vec<MediationRun>,
    replication_url: Option<String>,
    http_client: reqwest::Client,
}

impl CdrServer {
    pub fn new(
        storage: Arc<dyn CdrStorage>,
        stats: Arc<StatsEngine>,
        mediation_runs: Vec<MediationRun>,
        replication_url: Option<String>,
    ) -> Self {
        Self {
            storage,
            stats,
            mediation_runs,
            replication_url,
            http_client: reqwest::Client::new(),
        }
    }

    /// Stores the primary record plus its per-run forks and pushes all
    /// of them through the stats queues. Failures of a single
    /// mediation run do not fail the ingest.
    pub async fn process_cdr(&self, cdr: &Cdr) -> Result<(), EngineError> {
        let mut primary = cdr.clone();
        if primary.mediation_run_id.is_empty() {
            primary.mediation_run_id = DEFAULT_RUN_ID.to_string();
        }
        self.storage.store_cdr(&primary).await?;
        self.stats.ingest(&primary);

        if !primary.rated {
            for run in &self.mediation_runs {
                if run.run_id == primary.mediation_run_id {
                    continue;
                }
                match primary.fork(&run.run_id, &run.template, true) {
                    Ok(forked) => {
                        self.storage.store_cdr(&forked).await?;
                        self.stats.ingest(&forked);
                    }
                    Err(e) => {
                        warn!(
                            "<Cdrs> mediation run {} skipped for cdr {}: {}",
                            run.run_id, primary.id, e
                        );
                    }
                }
            }
        }

        self.replicate(&primary);
        info!("<Cdrs> processed cdr {} run {}", primary.id, primary.mediation_run_id);
        Ok(())
    }

    pub async fn process_external(&self, ext: &ExternalCdr) -> Result<(), EngineError> {
        let cdr = Cdr::from_external(ext)?;
        self.process_cdr(&cdr).await
    }

    // Fire-and-forget replication toward the configured remote CDR
    // server; send errors are logged, never surfaced to the caller.
    fn replicate(&self, cdr: &Cdr) {
        let url = match &self.replication_url {
            Some(url) => url.clone(),
            None => return,
        };
        let client = self.http_client.clone();
        let form = cdr.as_http_form();
        let cdr_id = cdr.id.clone();
        tokio::spawn(async move {
            match client.post(&url).form(&form).send().await {
                Ok(resp) if resp.status().is_success() => {}
                Ok(resp) => {
                    error!("<Cdrs> replication of {} got status {}", cdr_id, resp.status())
                }
                Err(e) => error!("<Cdrs> replication of {} failed: {}", cdr_id, e),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::selector::FieldSelector;
    use crate::models::AttrGetCdrs;
    use crate::storage::MemoryCdrStorage;
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    fn server(runs: Vec<MediationRun>) -> (CdrServer, Arc<MemoryCdrStorage>, Arc<StatsEngine>) {
        let storage = Arc::new(MemoryCdrStorage::new());
        let stats = Arc::new(StatsEngine::new(50));
        let server = CdrServer::new(storage.clone(), stats.clone(), runs, None);
        (server, storage, stats)
    }

    fn cdr(acc_id: &str) -> Cdr {
        let setup = Utc.with_ymd_and_hms(2013, 11, 7, 8, 42, 26).unwrap();
        Cdr {
            id: Cdr::gen_id(acc_id, setup),
            acc_id: acc_id.to_string(),
            tenant: "voxtelecom.org".to_string(),
            category: "call".to_string(),
            account: "1001".to_string(),
            subject: "1001".to_string(),
            destination: "1002".to_string(),
            setup_time: setup,
            answer_time: Some(setup + chrono::Duration::seconds(1)),
            usage: Duration::from_secs(10),
            cost: 1.01,
            ..Cdr::default()
        }
    }

    #[tokio::test]
    async fn test_process_three_cdrs() {
        let (server, storage, _) = server(Vec::new());
        for acc in ["dsafdsaf", "abcdeftg", "aererfddf"] {
            server.process_cdr(&cdr(acc)).await.unwrap();
        }
        let all = storage.get_cdrs(&AttrGetCdrs::default()).await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn test_mediation_fork_per_run() {
        let run = MediationRun {
            run_id: "run_wholesale".to_string(),
            template: ForkTemplate {
                subject: Some(FieldSelector::plain("account")),
                ..ForkTemplate::default()
            },
        };
        let (server, storage, _) = server(vec![run]);
        server.process_cdr(&cdr("dsafdsaf")).await.unwrap();

        let all = storage.get_cdrs(&AttrGetCdrs::default()).await.unwrap();
        assert_eq!(all.len(), 2);
        let forked = all
            .iter()
            .find(|c| c.mediation_run_id == "run_wholesale")
            .unwrap();
        let primary = all
            .iter()
            .find(|c| c.mediation_run_id == DEFAULT_RUN_ID)
            .unwrap();
        assert_eq!(forked.id, primary.id);
        assert_eq!(forked.cost, -1.0);
        assert_eq!(forked.subject, "1001");
    }

    #[tokio::test]
    async fn test_rated_cdr_skips_mediation() {
        let run = MediationRun {
            run_id: "run_wholesale".to_string(),
            template: ForkTemplate::default(),
        };
        let (server, storage, _) = server(vec![run]);
        let mut rated = cdr("dsafdsaf");
        rated.rated = true;
        server.process_cdr(&rated).await.unwrap();
        let all = storage.get_cdrs(&AttrGetCdrs::default()).await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn test_ingest_reaches_stats() {
        let (server, _, stats) = server(Vec::new());
        server.process_cdr(&cdr("dsafdsaf")).await.unwrap();
        let metrics = stats.get_metrics(crate::engine::DEFAULT_QUEUE_ID).unwrap();
        assert_eq!(metrics["ASR"], 100.0);
    }
}
