use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConsoleError;
use crate::stats::DashboardSnapshot;
use crate::types::ScanType;

/// Body of a start-scan request.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ScanRequest {
    #[serde(rename = "type")]
    pub scan_type: ScanType,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ports: Option<String>,
}

/// Reply to a start-scan request. Only `status == "started"` with an id means
/// the backend accepted the scan.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct StartResponse {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub scan_id: Option<String>,
}

impl StartResponse {
    pub fn started_id(&self) -> Option<&str> {
        if self.status != "started" {
            return None;
        }
        self.scan_id.as_deref().filter(|id| !id.is_empty())
    }
}

/// The request/response side of the scanning service.
pub trait ScanBackend: Send + Sync {
    fn start_scan(
        &self,
        request: &ScanRequest,
    ) -> impl Future<Output = Result<StartResponse, ConsoleError>> + Send;

    fn dashboard_stats(&self) -> impl Future<Output = Result<DashboardSnapshot, ConsoleError>> + Send;

    /// Where the rendered report for `scan_id` can be fetched.
    fn report_url(&self, scan_id: &str) -> String;
}

/// JSON-over-HTTP client for the scanning service.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ConsoleError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("scan-console/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(transport)?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

fn transport(e: reqwest::Error) -> ConsoleError {
    ConsoleError::Transport(e.to_string())
}

impl ScanBackend for HttpBackend {
    fn start_scan(
        &self,
        request: &ScanRequest,
    ) -> impl Future<Output = Result<StartResponse, ConsoleError>> + Send {
        let url = format!("{}/api/scan", self.base_url);
        let call = self.client.post(url).json(request);
        async move {
            let resp = call.send().await.map_err(transport)?;
            let status = resp.status();
            let body: StartResponse = resp.json().await.map_err(transport)?;
            debug!(%status, reply = ?body, "start-scan reply");
            Ok(body)
        }
    }

    fn dashboard_stats(&self) -> impl Future<Output = Result<DashboardSnapshot, ConsoleError>> + Send {
        let call = self.client.get(format!("{}/api/dashboard/stats", self.base_url));
        async move {
            let resp = call
                .send()
                .await
                .and_then(|r| r.error_for_status())
                .map_err(transport)?;
            resp.json().await.map_err(transport)
        }
    }

    fn report_url(&self, scan_id: &str) -> String {
        format!("{}/api/scan/{scan_id}/report?format=html", self.base_url)
    }
}
