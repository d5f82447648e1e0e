// src/sessions/session.rs
use crate::error::EngineError;
use crate::models::cdr::Cdr;
use crate::models::event::Event;
use crate::rater::{CallCost, CallDescriptor, Rater};
use crate::storage::CdrStorage;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::manager::{SessionManager, REASON_INSUFFICIENT_FUNDS, REASON_RATER_UNAVAILABLE};

/// Debit failures tolerated before the session is disconnected.
const MAX_DEBIT_ERRORS: u32 = 3;

/// One charged call: the start event's CDR view, the ledger of advance
/// fragments and the cooperative debit-loop task. Owned exclusively by
/// the session manager.
pub struct Session {
    uuid: String,
    start_cdr: Cdr,
    rater: Arc<dyn Rater>,
    cdr_db: Arc<dyn CdrStorage>,
    debit_interval: Duration,
    call_costs: Arc<Mutex<Vec<CallCost>>>,
    stop_tx: watch::Sender<bool>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    pub fn new(
        start_cdr: Cdr,
        rater: Arc<dyn Rater>,
        cdr_db: Arc<dyn CdrStorage>,
        debit_interval: Duration,
    ) -> Arc<Self> {
        let (stop_tx, _) = watch::channel(false);
        Arc::new(Self {
            uuid: start_cdr.acc_id.clone(),
            start_cdr,
            rater,
            cdr_db,
            debit_interval,
            call_costs: Arc::new(Mutex::new(Vec::new())),
            stop_tx,
            loop_handle: Mutex::new(None),
        })
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn debit_fragments(&self) -> Vec<CallCost> {
        self.call_costs.lock().unwrap().clone()
    }

    fn descriptor(
        &self,
        time_start: DateTime<Utc>,
        time_end: DateTime<Utc>,
        duration_index: Duration,
    ) -> CallDescriptor {
        CallDescriptor {
            tor: self.start_cdr.tor.clone(),
            req_type: self.start_cdr.req_type.clone(),
            direction: self.start_cdr.direction.clone(),
            tenant: self.start_cdr.tenant.clone(),
            category: self.start_cdr.category.clone(),
            account: self.start_cdr.account.clone(),
            subject: self.start_cdr.subject.clone(),
            destination: self.start_cdr.destination.clone(),
            time_start,
            time_end,
            duration_index,
        }
    }

    /// Spawns the periodic debit task. The first advance is charged
    /// immediately, then every debit interval until the loop is stopped
    /// or the session runs out of funds or rater retries.
    pub fn start_debit_loop(self: &Arc<Self>, manager: Arc<SessionManager>, conn_id: String) {
        let session = self.clone();
        let mut stop_rx = self.stop_tx.subscribe();
        let handle = tokio::spawn(async move {
            let interval = session.debit_interval;
            let mut ticker = tokio::time::interval(interval);
            let mut consecutive_errors: u32 = 0;
            let mut charged = Duration::ZERO;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let slice_start = session.start_cdr.setup_time
                            + chrono::Duration::from_std(charged).unwrap_or_else(|_| chrono::Duration::zero());
                        let cd = session.descriptor(
                            slice_start,
                            slice_start + chrono::Duration::from_std(interval).unwrap_or_else(|_| chrono::Duration::zero()),
                            charged,
                        );
                        match session.rater.debit(&cd).await {
                            Ok(fragment) => {
                                consecutive_errors = 0;
                                charged += if fragment.duration.is_zero() {
                                    interval
                                } else {
                                    fragment.duration
                                };
                                session.call_costs.lock().unwrap().push(fragment);
                                match session.rater.max_session_time(&cd).await {
                                    Ok(remaining) if remaining < interval.as_secs_f64() => {
                                        info!(
                                            "<SessionManager> session {} out of funds, disconnecting",
                                            session.uuid
                                        );
                                        manager
                                            .disconnect_session(
                                                &session.uuid,
                                                &conn_id,
                                                REASON_INSUFFICIENT_FUNDS,
                                            )
                                            .await;
                                        break;
                                    }
                                    Ok(_) => {}
                                    Err(e) => {
                                        consecutive_errors += 1;
                                        warn!(
                                            "<SessionManager> max session time for {} failed: {}",
                                            session.uuid, e
                                        );
                                    }
                                }
                            }
                            Err(e) => {
                                consecutive_errors += 1;
                                warn!(
                                    "<SessionManager> debit for {} failed ({}/{}): {}",
                                    session.uuid, consecutive_errors, MAX_DEBIT_ERRORS, e
                                );
                            }
                        }
                        if consecutive_errors >= MAX_DEBIT_ERRORS {
                            error!(
                                "<SessionManager> rater unreachable, disconnecting session {}",
                                session.uuid
                            );
                            manager
                                .disconnect_session(
                                    &session.uuid,
                                    &conn_id,
                                    REASON_RATER_UNAVAILABLE,
                                )
                                .await;
                            break;
                        }
                    }
                    _ = stop_rx.changed() => break,
                }
            }
        });
        *self.loop_handle.lock().unwrap() = Some(handle);
    }

    /// Signals the debit loop without waiting; safe to call from the
    /// loop task itself.
    pub fn signal_stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Signals the debit loop and waits for it to drain.
    pub async fn stop(&self) {
        let _ = self.stop_tx.send(true);
        let handle = self.loop_handle.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Hangup reconciliation: stop the loop, price the actual billable
    /// duration, then settle the difference against the advances so
    /// that charged == final cost + refunded. The finalized CDR is
    /// persisted and returned.
    pub async fn close(&self, end_ev: &dyn Event) -> Result<Cdr, EngineError> {
        self.stop().await;

        let fragments = self.debit_fragments();
        let total_charged: f64 = fragments.iter().map(|f| f.cost).sum();
        // A fragment without a duration covered one debit interval;
        // the loop accounts it the same way.
        let charged_span: f64 = fragments
            .iter()
            .map(|f| {
                if f.duration.is_zero() {
                    self.debit_interval.as_secs_f64()
                } else {
                    f.duration.as_secs_f64()
                }
            })
            .sum();

        let answer_time = end_ev.answer_time().unwrap_or(None);
        let billable = if answer_time.is_some() {
            end_ev.usage().unwrap_or(Duration::ZERO)
        } else {
            Duration::ZERO
        };

        let t0 = self.start_cdr.setup_time;
        let billable_end = t0 + chrono::Duration::from_std(billable).unwrap_or_else(|_| chrono::Duration::zero());
        let mut actual_cost = 0.0;
        if !billable.is_zero() {
            actual_cost = self
                .rater
                .get_cost(&self.descriptor(t0, billable_end, billable))
                .await?
                .cost
                .max(0.0);
        }

        let charged_end = t0
            + chrono::Duration::from_std(Duration::from_secs_f64(charged_span))
                .unwrap_or_else(|_| chrono::Duration::zero());
        if total_charged > actual_cost {
            // Any advance surplus goes back, whatever the time split.
            // The descriptor only expresses the amount to the rater:
            // the unused tail when the loop charged past the billable
            // time, the whole charged window otherwise.
            let refund_start = if charged_end > billable_end {
                billable_end
            } else {
                t0
            };
            if let Err(e) = self
                .rater
                .refund_increments(&self.descriptor(refund_start, charged_end, billable))
                .await
            {
                error!("<SessionManager> refund for session {} failed: {}", self.uuid, e);
            }
        } else if actual_cost > total_charged {
            // The advances came up short, settle the remainder.
            let supplement_start = if billable_end > charged_end {
                charged_end
            } else {
                t0
            };
            match self
                .rater
                .debit(&self.descriptor(supplement_start, billable_end, billable))
                .await
            {
                Ok(_) => {}
                Err(e) => {
                    error!(
                        "<SessionManager> supplemental debit for session {} failed: {}",
                        self.uuid, e
                    );
                }
            }
        }

        let mut final_cdr = self.start_cdr.clone();
        final_cdr.answer_time = answer_time;
        final_cdr.usage = billable;
        final_cdr.disconnect_cause = end_ev.disconnect_cause();
        final_cdr.cost = actual_cost;
        final_cdr.rated = true;
        final_cdr.cost_details = Some(CallCost {
            tor: final_cdr.tor.clone(),
            direction: final_cdr.direction.clone(),
            tenant: final_cdr.tenant.clone(),
            category: final_cdr.category.clone(),
            account: final_cdr.account.clone(),
            subject: final_cdr.subject.clone(),
            destination: final_cdr.destination.clone(),
            cost: actual_cost,
            duration: billable,
        });
        self.cdr_db.store_cdr(&final_cdr).await?;

        info!(
            "<SessionManager> session {} closed: charged {:.4}, final {:.4}, refunded {:.4}",
            self.uuid,
            total_charged,
            actual_cost,
            (total_charged - actual_cost).max(0.0)
        );
        Ok(final_cdr)
    }
}
