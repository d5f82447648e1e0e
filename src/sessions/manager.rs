// src/sessions/manager.rs
use crate::error::EngineError;
use crate::models::event::{
    AuthReply, DisconnectRequest, Event, SwitchEvent, AUTH_REQUEST, CALL_END, CALL_START,
    CHANNEL_ANSWER, CHANNEL_HANGUP_COMPLETE, HEARTBEAT,
};
use crate::models::REQTYPE_NONE;
use crate::rater::Rater;
use crate::services::CdrServer;
use crate::sessions::session::Session;
use crate::storage::CdrStorage;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub const REASON_MANDATORY_FIELD_MISSING: &str = "mandatory-field-missing";
pub const REASON_RATER_UNAVAILABLE: &str = "rater-unavailable";
pub const REASON_INSUFFICIENT_FUNDS: &str = "insufficient-funds";

/// Write side of one switch link; the listener owns the read side.
#[async_trait]
pub trait SwitchConnection: Send + Sync {
    fn id(&self) -> &str;
    async fn send(&self, payload: &str) -> Result<(), EngineError>;
}

/// Owns the live sessions and the switch connections, dispatching
/// auth, call-start and call-end events between them and the rater.
pub struct SessionManager {
    rater: Arc<dyn Rater>,
    cdr_server: Option<Arc<CdrServer>>,
    cdr_db: Arc<dyn CdrStorage>,
    debit_interval: Duration,
    host: String,
    conns: RwLock<HashMap<String, Arc<dyn SwitchConnection>>>,
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionManager {
    pub fn new(
        rater: Arc<dyn Rater>,
        cdr_server: Option<Arc<CdrServer>>,
        cdr_db: Arc<dyn CdrStorage>,
        debit_interval: Duration,
    ) -> Arc<Self> {
        let host = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "charon-engine".to_string());
        Arc::new(Self {
            rater,
            cdr_server,
            cdr_db,
            debit_interval,
            host,
            conns: RwLock::new(HashMap::new()),
            sessions: RwLock::new(HashMap::new()),
        })
    }

    pub fn register_connection(&self, conn: Arc<dyn SwitchConnection>) {
        info!("<SessionManager> switch connection registered: {}", conn.id());
        self.conns
            .write()
            .unwrap()
            .insert(conn.id().to_string(), conn);
    }

    pub fn unregister_connection(&self, conn_id: &str) {
        info!("<SessionManager> switch connection removed: {}", conn_id);
        self.conns.write().unwrap().remove(conn_id);
    }

    pub fn active_session_count(&self) -> usize {
        self.sessions.read().unwrap().len()
    }

    pub fn get_session(&self, uuid: &str) -> Option<Arc<Session>> {
        self.sessions.read().unwrap().get(uuid).cloned()
    }

    fn remove_session(&self, uuid: &str) -> Option<Arc<Session>> {
        self.sessions.write().unwrap().remove(uuid)
    }

    /// Per-event-type fan-out for one decoded switch event.
    pub async fn handle_event(self: &Arc<Self>, ev: &SwitchEvent, conn_id: &str) {
        match ev.name().as_str() {
            HEARTBEAT => debug!("<SessionManager> heartbeat from {}", conn_id),
            AUTH_REQUEST => self.on_auth(ev, conn_id).await,
            CALL_START | CHANNEL_ANSWER => self.on_call_start(ev, conn_id).await,
            CALL_END | CHANNEL_HANGUP_COMPLETE => self.on_call_end(ev, conn_id).await,
            other => debug!("<SessionManager> ignoring event {}", other),
        }
    }

    /// Authorization: missing mandatory fields reply with a zero
    /// max-session, otherwise the rater decides.
    pub async fn on_auth(&self, ev: &SwitchEvent, conn_id: &str) {
        if ev.req_type() == REQTYPE_NONE {
            return;
        }
        if ev.missing_parameter() {
            self.send_reply(
                conn_id,
                &AuthReply {
                    uuid: ev.uuid(),
                    max_session_time: 0.0,
                    error: REASON_MANDATORY_FIELD_MISSING.to_string(),
                }
                .to_string(),
            )
            .await;
            return;
        }
        let cdr = ev.as_cdr(&self.host);
        let reply = match self.rater.derived_max_session_time(&cdr).await {
            Ok(max_session_time) => AuthReply {
                uuid: ev.uuid(),
                max_session_time,
                error: String::new(),
            },
            Err(e) => {
                error!(
                    "<SessionManager> could not get max session time for {}: {}",
                    ev.uuid(),
                    e
                );
                AuthReply {
                    uuid: ev.uuid(),
                    max_session_time: 0.0,
                    error: REASON_RATER_UNAVAILABLE.to_string(),
                }
            }
        };
        self.send_reply(conn_id, &reply.to_string()).await;
    }

    /// Call start: reject incomplete events with an immediate
    /// disconnect, otherwise attach a session and start its debit loop.
    pub async fn on_call_start(self: &Arc<Self>, ev: &SwitchEvent, conn_id: &str) {
        if ev.req_type() == REQTYPE_NONE {
            return;
        }
        if ev.missing_parameter() {
            self.disconnect_session(&ev.uuid(), conn_id, REASON_MANDATORY_FIELD_MISSING)
                .await;
            return;
        }
        let session = Session::new(
            ev.as_cdr(&self.host),
            self.rater.clone(),
            self.cdr_db.clone(),
            self.debit_interval,
        );
        self.sessions
            .write()
            .unwrap()
            .insert(session.uuid().to_string(), session.clone());
        session.start_debit_loop(self.clone(), conn_id.to_string());
        info!("<SessionManager> session started: {}", session.uuid());
    }

    /// Call end: forward the CDR asynchronously, then reconcile the
    /// session. The session leaves the active set before close so a
    /// re-delivered hangup cannot race the reconciliation.
    pub async fn on_call_end(&self, ev: &SwitchEvent, _conn_id: &str) {
        if ev.req_type() == REQTYPE_NONE {
            return;
        }
        if ev.missing_parameter() {
            warn!("<SessionManager> mandatory field missing on call end: {}", ev.uuid());
        }
        self.forward_cdr(ev.as_cdr(&self.host));
        let session = match self.remove_session(&ev.uuid()) {
            Some(session) => session,
            None => return, // not handled by us
        };
        if let Err(e) = session.close(ev).await {
            error!("<SessionManager> closing session {} failed: {}", ev.uuid(), e);
        }
    }

    // Fire-and-forget push toward the CDR server.
    fn forward_cdr(&self, cdr: crate::models::cdr::Cdr) {
        let cdr_server = match &self.cdr_server {
            Some(srv) => srv.clone(),
            None => return,
        };
        tokio::spawn(async move {
            if let Err(e) = cdr_server.process_cdr(&cdr).await {
                error!("<SessionManager> failed processing CDR {}: {}", cdr.id, e);
            }
        });
    }

    /// Pushes a disconnect command toward the switch. A send failure is
    /// fatal for the session only: it leaves the active set and its
    /// loop is signalled, the ledger stays as charged.
    pub async fn disconnect_session(&self, uuid: &str, conn_id: &str, reason: &str) {
        let request = DisconnectRequest {
            uuid: uuid.to_string(),
            reason: reason.to_string(),
        };
        let conn = self.conns.read().unwrap().get(conn_id).cloned();
        let send_result = match conn {
            Some(conn) => conn.send(&request.to_string()).await,
            None => Err(EngineError::Transport(format!(
                "unknown switch connection: {}",
                conn_id
            ))),
        };
        if let Err(e) = send_result {
            error!(
                "<SessionManager> failed sending disconnect for {}: {}",
                uuid, e
            );
            if let Some(session) = self.remove_session(uuid) {
                session.signal_stop();
            }
        }
    }

    async fn send_reply(&self, conn_id: &str, payload: &str) {
        let conn = self.conns.read().unwrap().get(conn_id).cloned();
        match conn {
            Some(conn) => {
                if let Err(e) = conn.send(payload).await {
                    error!("<SessionManager> failed sending reply on {}: {}", conn_id, e);
                }
            }
            None => error!("<SessionManager> unknown switch connection: {}", conn_id),
        }
    }

    /// Stops every debit loop; sessions are dropped without
    /// reconciliation, the switch will re-deliver hangups elsewhere.
    pub async fn shutdown(&self) {
        let sessions: Vec<Arc<Session>> = {
            let mut map = self.sessions.write().unwrap();
            map.drain().map(|(_, s)| s).collect()
        };
        for session in sessions {
            session.stop().await;
        }
        info!("<SessionManager> shutdown complete");
    }
}
