// src/models/event.rs
use crate::error::EngineError;
use crate::models::cdr::{parse_duration_secs, parse_time, Cdr};
use crate::models::{REQTYPE_RATED, VOICE};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

// Switch event header names.
pub const EVENT_NAME: &str = "Event-Name";
pub const UNIQUE_ID: &str = "Unique-ID";
pub const CALL_DIRECTION: &str = "Call-Direction";
pub const SIP_CALL_ID: &str = "variable_sip_call_id";
pub const CGR_SUBJECT: &str = "variable_cgr_subject";
pub const CGR_ACCOUNT: &str = "variable_cgr_account";
pub const CGR_DESTINATION: &str = "variable_cgr_destination";
pub const CGR_TOR: &str = "variable_cgr_tor";
pub const CGR_TENANT: &str = "variable_cgr_cstmid";
pub const CGR_CATEGORY: &str = "variable_cgr_category";
pub const CGR_REQTYPE: &str = "variable_cgr_reqtype";
pub const START_TIME: &str = "Event-Date-GMT";
pub const ANSWER_EPOCH: &str = "variable_answer_epoch";
pub const BILLSEC: &str = "variable_billsec";
pub const HANGUP_CAUSE: &str = "Hangup-Cause";

// Recognized event names.
pub const HEARTBEAT: &str = "HEARTBEAT";
pub const CHANNEL_ANSWER: &str = "CHANNEL_ANSWER";
pub const CHANNEL_HANGUP_COMPLETE: &str = "CHANNEL_HANGUP_COMPLETE";
pub const AUTH_REQUEST: &str = "CGR_AUTH_REQUEST";
pub const CALL_START: &str = "CGR_CALL_START";
pub const CALL_END: &str = "CGR_CALL_END";

pub const AUTH_REPLY: &str = "CGR_AUTH_REPLY";
pub const SESSION_DISCONNECT: &str = "CGR_SESSION_DISCONNECT";

const SWITCH_SOURCE: &str = "switch";

/// Seam between the wire shape and the charging core: downstream code
/// sees only this capability set (or the CDR built from it).
pub trait Event: Send + Sync {
    fn name(&self) -> String;
    fn uuid(&self) -> String;
    fn direction(&self) -> String;
    fn tenant(&self) -> String;
    fn category(&self) -> String;
    fn account(&self) -> String;
    fn subject(&self) -> String;
    fn destination(&self) -> String;
    fn tor(&self) -> String;
    fn req_type(&self) -> String;
    fn disconnect_cause(&self) -> String;
    fn setup_time(&self) -> Result<Option<DateTime<Utc>>, EngineError>;
    fn answer_time(&self) -> Result<Option<DateTime<Utc>>, EngineError>;
    fn usage(&self) -> Result<Duration, EngineError>;
    fn missing_parameter(&self) -> bool;
    fn as_cdr(&self, host: &str) -> Cdr;
}

/// Newline-delimited key/value event as emitted by the switch plane.
#[derive(Debug, Clone, Default)]
pub struct SwitchEvent {
    pub fields: HashMap<String, String>,
}

impl SwitchEvent {
    /// Parses a header block; keys and values are separated by the
    /// first colon, blank lines end the block.
    pub fn parse(data: &str) -> Result<Self, EngineError> {
        let mut fields = HashMap::new();
        for line in data.lines() {
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                break;
            }
            if let Some(pos) = line.find(':') {
                let key = line[..pos].trim().to_string();
                let value = line[pos + 1..].trim().to_string();
                fields.insert(key, value);
            }
        }
        if fields.is_empty() {
            return Err(EngineError::Decode("empty switch event".to_string()));
        }
        Ok(Self { fields })
    }

    pub fn get(&self, key: &str) -> String {
        self.fields.get(key).cloned().unwrap_or_default()
    }
}

impl Event for SwitchEvent {
    fn name(&self) -> String {
        self.get(EVENT_NAME)
    }

    fn uuid(&self) -> String {
        self.get(UNIQUE_ID)
    }

    fn direction(&self) -> String {
        let dir = self.get(CALL_DIRECTION);
        if dir.is_empty() {
            "*out".to_string()
        } else {
            dir
        }
    }

    fn tenant(&self) -> String {
        self.get(CGR_TENANT)
    }

    fn category(&self) -> String {
        self.get(CGR_CATEGORY)
    }

    fn account(&self) -> String {
        self.get(CGR_ACCOUNT)
    }

    fn subject(&self) -> String {
        let subj = self.get(CGR_SUBJECT);
        if subj.is_empty() {
            self.account()
        } else {
            subj
        }
    }

    fn destination(&self) -> String {
        self.get(CGR_DESTINATION)
    }

    fn tor(&self) -> String {
        let tor = self.get(CGR_TOR);
        if tor.is_empty() {
            VOICE.to_string()
        } else {
            tor
        }
    }

    fn req_type(&self) -> String {
        let rt = self.get(CGR_REQTYPE);
        if rt.is_empty() {
            REQTYPE_RATED.to_string()
        } else {
            rt
        }
    }

    fn disconnect_cause(&self) -> String {
        self.get(HANGUP_CAUSE)
    }

    fn setup_time(&self) -> Result<Option<DateTime<Utc>>, EngineError> {
        parse_time(&self.get(START_TIME))
    }

    fn answer_time(&self) -> Result<Option<DateTime<Utc>>, EngineError> {
        parse_time(&self.get(ANSWER_EPOCH))
    }

    fn usage(&self) -> Result<Duration, EngineError> {
        parse_duration_secs(&self.get(BILLSEC))
    }

    fn missing_parameter(&self) -> bool {
        self.uuid().is_empty()
            || self.category().is_empty()
            || self.tenant().is_empty()
            || self.account().is_empty()
            || self.destination().is_empty()
    }

    /// Maps the wire event into the canonical record; parse failures on
    /// temporal fields degrade to "not set" rather than dropping the
    /// event at this boundary.
    fn as_cdr(&self, host: &str) -> Cdr {
        let setup_time = self
            .setup_time()
            .ok()
            .flatten()
            .unwrap_or_else(Utc::now);
        Cdr {
            id: Cdr::gen_id(&self.uuid(), setup_time),
            tor: self.tor(),
            acc_id: self.uuid(),
            cdr_host: host.to_string(),
            cdr_source: SWITCH_SOURCE.to_string(),
            req_type: self.req_type(),
            direction: self.direction(),
            tenant: self.tenant(),
            category: self.category(),
            account: self.account(),
            subject: self.subject(),
            destination: self.destination(),
            setup_time,
            answer_time: self.answer_time().ok().flatten(),
            usage: self.usage().unwrap_or(Duration::ZERO),
            disconnect_cause: self.disconnect_cause(),
            extra_fields: HashMap::from([(
                SIP_CALL_ID.to_string(),
                self.get(SIP_CALL_ID),
            )]),
            ..Cdr::default()
        }
    }
}

impl Event for Cdr {
    fn name(&self) -> String {
        self.cdr_source.clone()
    }
    fn uuid(&self) -> String {
        self.acc_id.clone()
    }
    fn direction(&self) -> String {
        self.direction.clone()
    }
    fn tenant(&self) -> String {
        self.tenant.clone()
    }
    fn category(&self) -> String {
        self.category.clone()
    }
    fn account(&self) -> String {
        self.account.clone()
    }
    fn subject(&self) -> String {
        self.subject.clone()
    }
    fn destination(&self) -> String {
        self.destination.clone()
    }
    fn tor(&self) -> String {
        self.tor.clone()
    }
    fn req_type(&self) -> String {
        self.req_type.clone()
    }
    fn disconnect_cause(&self) -> String {
        self.disconnect_cause.clone()
    }
    fn setup_time(&self) -> Result<Option<DateTime<Utc>>, EngineError> {
        Ok(Some(self.setup_time))
    }
    fn answer_time(&self) -> Result<Option<DateTime<Utc>>, EngineError> {
        Ok(self.answer_time)
    }
    fn usage(&self) -> Result<Duration, EngineError> {
        Ok(self.usage)
    }
    fn missing_parameter(&self) -> bool {
        Cdr::missing_parameter(self)
    }
    fn as_cdr(&self, _host: &str) -> Cdr {
        self.clone()
    }
}

/// Authorization verdict pushed back toward the switch.
#[derive(Debug, Clone)]
pub struct AuthReply {
    pub uuid: String,
    pub max_session_time: f64,
    pub error: String,
}

impl fmt::Display for AuthReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}: {}", EVENT_NAME, AUTH_REPLY)?;
        writeln!(f, "{}: {}", UNIQUE_ID, self.uuid)?;
        writeln!(f, "MaxSessionTime: {}", self.max_session_time)?;
        if !self.error.is_empty() {
            writeln!(f, "Error: {}", self.error)?;
        }
        writeln!(f)
    }
}

/// Disconnect command pushed toward the switch.
#[derive(Debug, Clone)]
pub struct DisconnectRequest {
    pub uuid: String,
    pub reason: String,
}

impl fmt::Display for DisconnectRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}: {}", EVENT_NAME, SESSION_DISCONNECT)?;
        writeln!(f, "{}: {}", UNIQUE_ID, self.uuid)?;
        writeln!(f, "Reason: {}", self.reason)?;
        writeln!(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CALL_START_EVENT: &str = "Event-Name: CGR_CALL_START\n\
Unique-ID: a6f2c1e0-9b2d-4c1e-8a7b-1f2e3d4c5b6a\n\
Call-Direction: outbound\n\
variable_sip_call_id: 8c5e@10.0.0.1\n\
variable_cgr_subject: 1001\n\
variable_cgr_account: 1001\n\
variable_cgr_destination: 1002\n\
variable_cgr_tor: *voice\n\
variable_cgr_cstmid: voxtelecom.org\n\
variable_cgr_category: call\n\
variable_cgr_reqtype: *prepaid\n\
Event-Date-GMT: Thu, 07 Nov 2013 08:42:26 GMT\n\n";

    #[test]
    fn test_parse_call_start() {
        let ev = SwitchEvent::parse(CALL_START_EVENT).unwrap();
        assert_eq!(ev.name(), CALL_START);
        assert_eq!(ev.uuid(), "a6f2c1e0-9b2d-4c1e-8a7b-1f2e3d4c5b6a");
        assert_eq!(ev.account(), "1001");
        assert_eq!(ev.destination(), "1002");
        assert_eq!(ev.tenant(), "voxtelecom.org");
        assert_eq!(ev.req_type(), "*prepaid");
        assert!(!ev.missing_parameter());
    }

    #[test]
    fn test_parse_empty_event() {
        assert!(SwitchEvent::parse("\n\n").is_err());
    }

    #[test]
    fn test_missing_parameter_without_account() {
        let data = CALL_START_EVENT.replace("variable_cgr_account: 1001\n", "");
        let ev = SwitchEvent::parse(&data).unwrap();
        assert!(ev.missing_parameter());
    }

    #[test]
    fn test_as_cdr_mapping() {
        let ev = SwitchEvent::parse(CALL_START_EVENT).unwrap();
        let cdr = ev.as_cdr("10.0.0.5");
        assert_eq!(cdr.acc_id, ev.uuid());
        assert_eq!(cdr.cdr_host, "10.0.0.5");
        assert_eq!(cdr.tenant, "voxtelecom.org");
        assert_eq!(cdr.tor, VOICE);
        assert_eq!(cdr.setup_time.to_rfc3339(), "2013-11-07T08:42:26+00:00");
        assert_eq!(cdr.id, Cdr::gen_id(&ev.uuid(), cdr.setup_time));
        assert!(cdr.answer_time.is_none());
    }

    #[test]
    fn test_hangup_usage() {
        let data = "Event-Name: CGR_CALL_END\n\
Unique-ID: u1\n\
variable_answer_epoch: 1383813747\n\
variable_billsec: 32\n\
Hangup-Cause: NORMAL_CLEARING\n\n";
        let ev = SwitchEvent::parse(data).unwrap();
        assert_eq!(ev.usage().unwrap(), Duration::from_secs(32));
        assert!(ev.answer_time().unwrap().is_some());
        assert_eq!(ev.disconnect_cause(), "NORMAL_CLEARING");
    }

    #[test]
    fn test_auth_reply_render() {
        let reply = AuthReply {
            uuid: "u1".to_string(),
            max_session_time: 0.0,
            error: "MANDATORY_IE_MISSING".to_string(),
        };
        let rendered = reply.to_string();
        assert!(rendered.contains("Event-Name: CGR_AUTH_REPLY"));
        assert!(rendered.contains("MaxSessionTime: 0"));
        assert!(rendered.contains("Error: MANDATORY_IE_MISSING"));
        assert!(rendered.ends_with("\n\n"));
    }

    #[test]
    fn test_disconnect_render() {
        let req = DisconnectRequest {
            uuid: "u1".to_string(),
            reason: "rater-unavailable".to_string(),
        };
        let rendered = req.to_string();
        assert!(rendered.contains("Event-Name: CGR_SESSION_DISCONNECT"));
        assert!(rendered.contains("Reason: rater-unavailable"));
    }
}
