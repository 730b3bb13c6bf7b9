use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::backend::{ScanRequest, StartResponse};
use crate::stats::DashboardSnapshot;
use crate::types::{lenient, ResultPatch};

/// `scan_update` / `scan_progress` payload.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct ScanUpdate {
    pub scan_id: String,
    /// Raw progress value; see [`crate::types::parse_progress`].
    #[serde(default)]
    pub progress: Value,
    #[serde(default, deserialize_with = "lenient::opt_u64")]
    pub current: Option<u64>,
    #[serde(default, deserialize_with = "lenient::opt_u64")]
    pub total: Option<u64>,
    #[serde(default)]
    pub current_task: Option<String>,
    /// Free-form status text sent with the first update of a scan.
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, deserialize_with = "lenient::result_patch")]
    pub results: Option<ResultPatch>,
}

/// `scan_complete` payload.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct ScanComplete {
    pub scan_id: String,
    #[serde(default)]
    pub report_path: Option<String>,
    #[serde(default, deserialize_with = "lenient::result_patch")]
    pub results: Option<ResultPatch>,
}

/// `scan_error` payload. Older backends send the text as `error`.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct ScanFailure {
    #[serde(default)]
    pub scan_id: Option<String>,
    #[serde(default, alias = "error")]
    pub message: Option<String>,
}

/// Everything that can change console state. Channel frames, user actions,
/// request completions and the refresh timer all arrive as one of these and
/// go through [`crate::engine::Console::handle`].
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Connected,
    ConnectError { message: String },
    Disconnected,
    ScanUpdate(ScanUpdate),
    ScanComplete(ScanComplete),
    ScanError(ScanFailure),
    ScanStarted {
        request: ScanRequest,
        response: StartResponse,
    },
    StartFailed {
        request: ScanRequest,
        message: String,
    },
    LoadSession { id: String },
    DashboardRefreshed(DashboardSnapshot),
}

impl Event {
    /// Session the event refers to, when it names one.
    pub fn scan_id(&self) -> Option<&str> {
        match self {
            Event::ScanUpdate(u) => Some(&u.scan_id),
            Event::ScanComplete(c) => Some(&c.scan_id),
            Event::ScanError(e) => e.scan_id.as_deref(),
            Event::ScanStarted { response, .. } => response.scan_id.as_deref(),
            Event::LoadSession { id } => Some(id),
            _ => None,
        }
    }
}
