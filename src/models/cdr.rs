// src/models/cdr.rs
use crate::error::EngineError;
use crate::models::selector::{FieldFilter, FieldSelector, META_DEFAULT};
use crate::models::{DATA, DEFAULT_RUN_ID, SMS, VOICE};
use crate::rater::CallCost;
use crate::rounding::round_dp;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::Duration;

// Canonical field names, shared by selectors, filters, the HTTP form
// and export templates.
pub const CDRID: &str = "cdrid";
pub const ORDERID: &str = "orderid";
pub const TOR: &str = "tor";
pub const ACCID: &str = "accid";
pub const CDRHOST: &str = "cdrhost";
pub const CDRSOURCE: &str = "cdrsource";
pub const REQTYPE: &str = "reqtype";
pub const DIRECTION: &str = "direction";
pub const TENANT: &str = "tenant";
pub const CATEGORY: &str = "category";
pub const ACCOUNT: &str = "account";
pub const SUBJECT: &str = "subject";
pub const DESTINATION: &str = "destination";
pub const SETUP_TIME: &str = "setup_time";
pub const ANSWER_TIME: &str = "answer_time";
pub const USAGE: &str = "usage";
pub const SUPPLIER: &str = "supplier";
pub const DISCONNECT_CAUSE: &str = "disconnect_cause";
pub const MEDIATION_RUNID: &str = "mediation_runid";
pub const RATED_ACCOUNT: &str = "rated_account";
pub const RATED_SUBJECT: &str = "rated_subject";
pub const COST: &str = "cost";
pub const COST_DETAILS: &str = "cost_details";

/// Canonical in-memory call record. A record is uniquely identified by
/// (id, mediation_run_id); re-rating the same raw record under another
/// run produces a sibling via [`Cdr::fork`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cdr {
    pub id: String,
    pub order_id: i64,
    pub tor: String,
    pub acc_id: String,
    pub cdr_host: String,
    pub cdr_source: String,
    pub req_type: String,
    pub direction: String,
    pub tenant: String,
    pub category: String,
    pub account: String,
    pub subject: String,
    pub destination: String,
    pub setup_time: DateTime<Utc>,
    pub answer_time: Option<DateTime<Utc>>,
    pub usage: Duration,
    pub supplier: String,
    pub disconnect_cause: String,
    pub extra_fields: HashMap<String, String>,
    pub mediation_run_id: String,
    pub rated_account: String,
    pub rated_subject: String,
    pub cost: f64,
    pub cost_details: Option<CallCost>,
    pub rated: bool,
}

impl Default for Cdr {
    fn default() -> Self {
        Self {
            id: String::new(),
            order_id: 0,
            tor: VOICE.to_string(),
            acc_id: String::new(),
            cdr_host: String::new(),
            cdr_source: String::new(),
            req_type: String::new(),
            direction: String::new(),
            tenant: String::new(),
            category: String::new(),
            account: String::new(),
            subject: String::new(),
            destination: String::new(),
            setup_time: Utc.timestamp_opt(0, 0).unwrap(),
            answer_time: None,
            usage: Duration::ZERO,
            supplier: String::new(),
            disconnect_cause: String::new(),
            extra_fields: HashMap::new(),
            mediation_run_id: DEFAULT_RUN_ID.to_string(),
            rated_account: String::new(),
            rated_subject: String::new(),
            cost: -1.0,
            cost_details: None,
            rated: false,
        }
    }
}

impl Cdr {
    /// Content-derived fingerprint over the switch accounting id and the
    /// setup time; stable across re-rating runs.
    pub fn gen_id(acc_id: &str, setup_time: DateTime<Utc>) -> String {
        let mut hasher = Sha256::new();
        hasher.update(acc_id.as_bytes());
        hasher.update(setup_time.to_rfc3339().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Usage rendered as seconds: fractional for voice, whole for
    /// data and sms records.
    pub fn format_usage(&self) -> String {
        let secs = self.usage.as_secs_f64();
        if self.tor == DATA || self.tor == SMS {
            format!("{}", round_dp(secs, 0) as i64)
        } else {
            format!("{}", secs)
        }
    }

    /// Cost rendered with a decimal shift (export unit scaling) and a
    /// fixed number of decimals.
    pub fn format_cost(&self, shift_decimals: i32, round_decimals: usize) -> String {
        let mut cost = self.cost;
        if shift_decimals != 0 {
            cost *= 10f64.powi(shift_decimals);
        }
        format!("{:.*}", round_decimals, cost)
    }

    pub fn cost_details_json(&self) -> String {
        match &self.cost_details {
            Some(cc) => serde_json::to_string(cc).unwrap_or_default(),
            None => String::new(),
        }
    }

    fn format_time(t: Option<DateTime<Utc>>) -> String {
        match t {
            Some(t) => t.to_rfc3339_opts(SecondsFormat::Secs, true),
            None => String::new(),
        }
    }

    /// Field rendered as text through an optional regex transform.
    /// Unknown names fall back to the extension-field mapping.
    pub fn field_as_string(&self, sel: &FieldSelector) -> String {
        let raw = match sel.id.as_str() {
            CDRID => self.id.clone(),
            ORDERID => self.order_id.to_string(),
            TOR => self.tor.clone(),
            ACCID => self.acc_id.clone(),
            CDRHOST => self.cdr_host.clone(),
            CDRSOURCE => self.cdr_source.clone(),
            REQTYPE => self.req_type.clone(),
            DIRECTION => self.direction.clone(),
            TENANT => self.tenant.clone(),
            CATEGORY => self.category.clone(),
            ACCOUNT => self.account.clone(),
            SUBJECT => self.subject.clone(),
            DESTINATION => self.destination.clone(),
            SETUP_TIME => Self::format_time(Some(self.setup_time)),
            ANSWER_TIME => Self::format_time(self.answer_time),
            USAGE => self.format_usage(),
            SUPPLIER => self.supplier.clone(),
            DISCONNECT_CAUSE => self.disconnect_cause.clone(),
            MEDIATION_RUNID => self.mediation_run_id.clone(),
            RATED_ACCOUNT => self.rated_account.clone(),
            RATED_SUBJECT => self.rated_subject.clone(),
            COST => format!("{}", self.cost),
            COST_DETAILS => self.cost_details_json(),
            other => self.extra_fields.get(other).cloned().unwrap_or_default(),
        };
        sel.parse_value(&raw)
    }

    /// Evaluates a field filter, returning the matched rendition so the
    /// caller can reuse it (export templates, derived charging keys).
    pub fn passes_field_filter(&self, filter: &FieldFilter) -> (bool, String) {
        let raw = self.field_as_string(&FieldSelector::plain(&filter.id));
        filter.matches(&raw)
    }

    /// True when any field required for charging is absent.
    pub fn missing_parameter(&self) -> bool {
        self.acc_id.is_empty()
            || self.category.is_empty()
            || self.tenant.is_empty()
            || self.account.is_empty()
            || self.destination.is_empty()
    }

    /// Produces the re-rating sibling for `run_id`: identical identity
    /// and raw fields, primary fields re-extracted through the template
    /// selectors, cost reset to the unrated sentinel.
    pub fn fork(
        &self,
        run_id: &str,
        tpl: &ForkTemplate,
        primary_mandatory: bool,
    ) -> Result<Cdr, EngineError> {
        let mut forked = Cdr {
            id: self.id.clone(),
            tor: self.tor.clone(),
            acc_id: self.acc_id.clone(),
            cdr_host: self.cdr_host.clone(),
            cdr_source: self.cdr_source.clone(),
            mediation_run_id: run_id.to_string(),
            cost: -1.0,
            ..Cdr::default()
        };

        let extract = |field: &str, sel: &Option<FieldSelector>| -> (String, String) {
            let resolved = resolve_selector(field, sel);
            (self.field_as_string(&resolved), resolved.id)
        };
        let mandatory = |field: &str, value: &str, sel_id: &str| -> Result<(), EngineError> {
            if primary_mandatory && value.is_empty() {
                Err(EngineError::mandatory_field_missing(field, sel_id))
            } else {
                Ok(())
            }
        };

        let (req_type, sel_id) = extract(REQTYPE, &tpl.req_type);
        mandatory(REQTYPE, &req_type, &sel_id)?;
        forked.req_type = req_type;

        let (direction, sel_id) = extract(DIRECTION, &tpl.direction);
        mandatory(DIRECTION, &direction, &sel_id)?;
        forked.direction = direction;

        let (tenant, sel_id) = extract(TENANT, &tpl.tenant);
        mandatory(TENANT, &tenant, &sel_id)?;
        forked.tenant = tenant;

        let (category, sel_id) = extract(CATEGORY, &tpl.category);
        mandatory(CATEGORY, &category, &sel_id)?;
        forked.category = category;

        let (account, sel_id) = extract(ACCOUNT, &tpl.account);
        mandatory(ACCOUNT, &account, &sel_id)?;
        forked.account = account;

        let (subject, sel_id) = extract(SUBJECT, &tpl.subject);
        mandatory(SUBJECT, &subject, &sel_id)?;
        forked.subject = subject;

        let (destination, sel_id) = extract(DESTINATION, &tpl.destination);
        if primary_mandatory && destination.is_empty() && forked.tor == VOICE {
            return Err(EngineError::mandatory_field_missing(DESTINATION, &sel_id));
        }
        forked.destination = destination;

        let (setup_str, sel_id) = extract(SETUP_TIME, &tpl.setup_time);
        mandatory(SETUP_TIME, &setup_str, &sel_id)?;
        forked.setup_time = parse_time(&setup_str)?.unwrap_or(self.setup_time);

        // An empty answer time means "not answered", which is a valid
        // record to re-rate, so the mandatory check does not apply.
        let (answer_str, _) = extract(ANSWER_TIME, &tpl.answer_time);
        forked.answer_time = parse_time(&answer_str)?;

        let (usage_str, sel_id) = extract(USAGE, &tpl.usage);
        mandatory(USAGE, &usage_str, &sel_id)?;
        forked.usage = parse_duration_secs(&usage_str)?;

        forked.supplier = extract(SUPPLIER, &tpl.supplier).0;
        forked.disconnect_cause = extract(DISCONNECT_CAUSE, &tpl.disconnect_cause).0;

        for sel in &tpl.extra_fields {
            forked
                .extra_fields
                .insert(sel.id.clone(), self.field_as_string(sel));
        }
        Ok(forked)
    }

    /// Form-encoded projection used when replicating toward a remote
    /// CDR server; rating-run fields stay local.
    pub fn as_http_form(&self) -> Vec<(String, String)> {
        let mut form: Vec<(String, String)> = self
            .extra_fields
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        form.sort();
        form.push((TOR.to_string(), self.tor.clone()));
        form.push((ACCID.to_string(), self.acc_id.clone()));
        form.push((CDRHOST.to_string(), self.cdr_host.clone()));
        form.push((CDRSOURCE.to_string(), self.cdr_source.clone()));
        form.push((REQTYPE.to_string(), self.req_type.clone()));
        form.push((DIRECTION.to_string(), self.direction.clone()));
        form.push((TENANT.to_string(), self.tenant.clone()));
        form.push((CATEGORY.to_string(), self.category.clone()));
        form.push((ACCOUNT.to_string(), self.account.clone()));
        form.push((SUBJECT.to_string(), self.subject.clone()));
        form.push((DESTINATION.to_string(), self.destination.clone()));
        form.push((SETUP_TIME.to_string(), Self::format_time(Some(self.setup_time))));
        form.push((ANSWER_TIME.to_string(), Self::format_time(self.answer_time)));
        form.push((USAGE.to_string(), self.format_usage()));
        form.push((SUPPLIER.to_string(), self.supplier.clone()));
        form.push((DISCONNECT_CAUSE.to_string(), self.disconnect_cause.clone()));
        if self.cost >= 0.0 {
            form.push((COST.to_string(), format!("{}", self.cost)));
        }
        form
    }

    /// Rebuilds the canonical record from a posted form. Unknown keys
    /// land in the extension fields; the fingerprint is derived when
    /// the form does not carry one.
    pub fn from_http_form(pairs: &[(String, String)]) -> Result<Cdr, EngineError> {
        let mut cdr = Cdr::default();
        for (key, value) in pairs {
            match key.as_str() {
                TOR => cdr.tor = value.clone(),
                ACCID => cdr.acc_id = value.clone(),
                CDRHOST => cdr.cdr_host = value.clone(),
                CDRSOURCE => cdr.cdr_source = value.clone(),
                REQTYPE => cdr.req_type = value.clone(),
                DIRECTION => cdr.direction = value.clone(),
                TENANT => cdr.tenant = value.clone(),
                CATEGORY => cdr.category = value.clone(),
                ACCOUNT => cdr.account = value.clone(),
                SUBJECT => cdr.subject = value.clone(),
                DESTINATION => cdr.destination = value.clone(),
                SETUP_TIME => {
                    cdr.setup_time = parse_time(value)?
                        .ok_or_else(|| EngineError::Decode("empty setup_time".to_string()))?
                }
                ANSWER_TIME => cdr.answer_time = parse_time(value)?,
                USAGE => cdr.usage = parse_duration_secs(value)?,
                SUPPLIER => cdr.supplier = value.clone(),
                DISCONNECT_CAUSE => cdr.disconnect_cause = value.clone(),
                COST => {
                    cdr.cost = value
                        .parse()
                        .map_err(|_| EngineError::Decode(format!("bad cost: {}", value)))?
                }
                _ => {
                    cdr.extra_fields.insert(key.clone(), value.clone());
                }
            }
        }
        cdr.id = Cdr::gen_id(&cdr.acc_id, cdr.setup_time);
        Ok(cdr)
    }

    /// JSON-friendly wire shape with stringified times and usage.
    pub fn as_external(&self) -> ExternalCdr {
        ExternalCdr {
            cdr_id: self.id.clone(),
            order_id: self.order_id,
            tor: self.tor.clone(),
            acc_id: self.acc_id.clone(),
            cdr_host: self.cdr_host.clone(),
            cdr_source: self.cdr_source.clone(),
            req_type: self.req_type.clone(),
            direction: self.direction.clone(),
            tenant: self.tenant.clone(),
            category: self.category.clone(),
            account: self.account.clone(),
            subject: self.subject.clone(),
            destination: self.destination.clone(),
            setup_time: Self::format_time(Some(self.setup_time)),
            answer_time: Self::format_time(self.answer_time),
            usage: self.format_usage(),
            supplier: self.supplier.clone(),
            disconnect_cause: self.disconnect_cause.clone(),
            extra_fields: self.extra_fields.clone(),
            mediation_run_id: self.mediation_run_id.clone(),
            rated_account: self.rated_account.clone(),
            rated_subject: self.rated_subject.clone(),
            cost: self.cost,
            cost_details: self.cost_details_json(),
            rated: self.rated,
        }
    }

    pub fn from_external(ext: &ExternalCdr) -> Result<Cdr, EngineError> {
        let setup_time = parse_time(&ext.setup_time)?
            .unwrap_or_else(|| Utc.timestamp_opt(0, 0).unwrap());
        let mut cdr = Cdr {
            id: ext.cdr_id.clone(),
            order_id: ext.order_id,
            tor: ext.tor.clone(),
            acc_id: ext.acc_id.clone(),
            cdr_host: ext.cdr_host.clone(),
            cdr_source: ext.cdr_source.clone(),
            req_type: ext.req_type.clone(),
            direction: ext.direction.clone(),
            tenant: ext.tenant.clone(),
            category: ext.category.clone(),
            account: ext.account.clone(),
            subject: ext.subject.clone(),
            destination: ext.destination.clone(),
            setup_time,
            answer_time: parse_time(&ext.answer_time)?,
            usage: parse_duration_secs(&ext.usage)?,
            supplier: ext.supplier.clone(),
            disconnect_cause: ext.disconnect_cause.clone(),
            extra_fields: ext.extra_fields.clone(),
            mediation_run_id: if ext.mediation_run_id.is_empty() {
                DEFAULT_RUN_ID.to_string()
            } else {
                ext.mediation_run_id.clone()
            },
            rated_account: ext.rated_account.clone(),
            rated_subject: ext.rated_subject.clone(),
            cost: ext.cost,
            cost_details: None,
            rated: ext.rated,
        };
        if !ext.cost_details.is_empty() {
            cdr.cost_details = Some(serde_json::from_str(&ext.cost_details)?);
        }
        if cdr.id.is_empty() {
            cdr.id = Cdr::gen_id(&cdr.acc_id, cdr.setup_time);
        }
        Ok(cdr)
    }
}

/// Selector set used by [`Cdr::fork`]; a missing entry or the
/// `*default` sentinel maps to the primary field of the same name.
#[derive(Debug, Clone, Default)]
pub struct ForkTemplate {
    pub req_type: Option<FieldSelector>,
    pub direction: Option<FieldSelector>,
    pub tenant: Option<FieldSelector>,
    pub category: Option<FieldSelector>,
    pub account: Option<FieldSelector>,
    pub subject: Option<FieldSelector>,
    pub destination: Option<FieldSelector>,
    pub setup_time: Option<FieldSelector>,
    pub answer_time: Option<FieldSelector>,
    pub usage: Option<FieldSelector>,
    pub supplier: Option<FieldSelector>,
    pub disconnect_cause: Option<FieldSelector>,
    pub extra_fields: Vec<FieldSelector>,
}

fn resolve_selector(primary: &str, sel: &Option<FieldSelector>) -> FieldSelector {
    match sel {
        None => FieldSelector::plain(primary),
        Some(s) if s.id == META_DEFAULT => FieldSelector {
            id: primary.to_string(),
            rule: s.rule.clone(),
        },
        Some(s) => s.clone(),
    }
}

/// External CDR shape used across the RPC boundary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExternalCdr {
    #[serde(rename = "CdrId")]
    pub cdr_id: String,
    #[serde(rename = "OrderId")]
    pub order_id: i64,
    #[serde(rename = "TOR")]
    pub tor: String,
    #[serde(rename = "AccId")]
    pub acc_id: String,
    #[serde(rename = "CdrHost")]
    pub cdr_host: String,
    #[serde(rename = "CdrSource")]
    pub cdr_source: String,
    #[serde(rename = "ReqType")]
    pub req_type: String,
    #[serde(rename = "Direction")]
    pub direction: String,
    #[serde(rename = "Tenant")]
    pub tenant: String,
    #[serde(rename = "Category")]
    pub category: String,
    #[serde(rename = "Account")]
    pub account: String,
    #[serde(rename = "Subject")]
    pub subject: String,
    #[serde(rename = "Destination")]
    pub destination: String,
    #[serde(rename = "SetupTime")]
    pub setup_time: String,
    #[serde(rename = "AnswerTime")]
    pub answer_time: String,
    #[serde(rename = "Usage")]
    pub usage: String,
    #[serde(rename = "Supplier")]
    pub supplier: String,
    #[serde(rename = "DisconnectCause")]
    pub disconnect_cause: String,
    #[serde(rename = "ExtraFields")]
    pub extra_fields: HashMap<String, String>,
    #[serde(rename = "MediationRunId")]
    pub mediation_run_id: String,
    #[serde(rename = "RatedAccount")]
    pub rated_account: String,
    #[serde(rename = "RatedSubject")]
    pub rated_subject: String,
    #[serde(rename = "Cost")]
    pub cost: f64,
    #[serde(rename = "CostDetails")]
    pub cost_details: String,
    #[serde(rename = "Rated")]
    pub rated: bool,
}

/// Parses wall-clock text in the formats the switch plane produces:
/// RFC3339, SQL datetime, RFC2822 and unix seconds. Empty and "0"
/// mean "not set".
pub fn parse_time(raw: &str) -> Result<Option<DateTime<Utc>>, EngineError> {
    let raw = raw.trim();
    if raw.is_empty() || raw == "0" {
        return Ok(None);
    }
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Ok(Some(t.with_timezone(&Utc)));
    }
    if let Ok(t) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Ok(Some(Utc.from_utc_datetime(&t)));
    }
    if let Ok(t) = DateTime::parse_from_rfc2822(&raw.replace(" GMT", " +0000")) {
        return Ok(Some(t.with_timezone(&Utc)));
    }
    if let Ok(secs) = raw.parse::<i64>() {
        if let Some(t) = Utc.timestamp_opt(secs, 0).single() {
            return Ok(Some(t));
        }
    }
    Err(EngineError::Decode(format!("unsupported time layout: {}", raw)))
}

/// Parses a duration given in seconds, with optional "s"/"ms" suffix.
pub fn parse_duration_secs(raw: &str) -> Result<Duration, EngineError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Duration::ZERO);
    }
    let (value, scale) = if let Some(v) = raw.strip_suffix("ms") {
        (v, 0.001)
    } else if let Some(v) = raw.strip_suffix('s') {
        (v, 1.0)
    } else {
        (raw, 1.0)
    };
    let secs: f64 = value
        .trim()
        .parse()
        .map_err(|_| EngineError::Decode(format!("bad duration: {}", raw)))?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(EngineError::Decode(format!("bad duration: {}", raw)));
    }
    Ok(Duration::from_secs_f64(secs * scale))
}
