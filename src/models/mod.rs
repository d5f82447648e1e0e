// src/models/mod.rs
pub mod cdr;
pub mod event;
pub mod selector;

pub use cdr::{Cdr, ExternalCdr, ForkTemplate};
pub use event::{AuthReply, DisconnectRequest, Event, SwitchEvent};
pub use selector::{FieldFilter, FieldSelector, SearchReplace, META_DEFAULT};

use serde::{Deserialize, Serialize};

// Type-of-record tags.
pub const VOICE: &str = "*voice";
pub const DATA: &str = "*data";
pub const SMS: &str = "*sms";

// Request types.
pub const REQTYPE_PREPAID: &str = "*prepaid";
pub const REQTYPE_POSTPAID: &str = "*postpaid";
pub const REQTYPE_RATED: &str = "*rated";
pub const REQTYPE_NONE: &str = "*none";

pub const DEFAULT_RUN_ID: &str = "*default";
pub const OK: &str = "OK";

// ==================== RPC attribute types ====================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttrGetMetrics {
    #[serde(rename = "StatsQueueId")]
    pub stats_queue_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttrResetQueues {
    #[serde(rename = "StatsQueueIds", default)]
    pub stats_queue_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttrLoadTpFromFolder {
    #[serde(rename = "FolderPath")]
    pub folder_path: String,
}

/// Filter for CDR queries; empty fields match everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AttrGetCdrs {
    #[serde(rename = "Accounts")]
    pub accounts: Vec<String>,
    #[serde(rename = "Tenants")]
    pub tenants: Vec<String>,
    #[serde(rename = "RunIds")]
    pub run_ids: Vec<String>,
    #[serde(rename = "SetupTimeStart")]
    pub setup_time_start: Option<String>,
    #[serde(rename = "SetupTimeEnd")]
    pub setup_time_end: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}
