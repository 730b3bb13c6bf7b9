use std::collections::VecDeque;

use serde::Serialize;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::backend::{ScanBackend, ScanRequest, StartResponse};
use crate::error::ConsoleError;
use crate::events::Event;
use crate::history::History;
use crate::render::{self, ResultView};
use crate::session::{self, SessionStore, Transition};
use crate::stats::{self, DashboardSnapshot, DashboardStats, Trends};
use crate::types::{HistoryEntry, ScanSession};

pub const ACTIVITY_LIMIT: usize = 10;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ActivityKind {
    Info,
    Success,
    Error,
    Warning,
    Scan,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Activity {
    pub kind: ActivityKind,
    pub message: String,
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
}

/// Everything a dashboard needs in one value.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct DashboardView {
    pub local: DashboardStats,
    pub remote: Option<DashboardSnapshot>,
    pub trends: Option<Trends>,
    /// Critical+high share shown on the severity bar. Server figures win
    /// once a snapshot has arrived.
    pub severity_bar_width: f64,
}

/// Console state plus the single update path that mutates it.
///
/// Channel events, operator actions, request completions and the refresh
/// timer all go through [`Console::handle`], one event at a time. Derived
/// figures are recomputed after each event instead of being patched.
#[derive(Debug)]
pub struct Console {
    sessions: SessionStore,
    history: History,
    activity: VecDeque<Activity>,
    activity_limit: usize,
    remote: Option<DashboardSnapshot>,
    stats: DashboardStats,
    connected: bool,
}

impl Console {
    pub fn new(history: History) -> Self {
        Self::with_activity_limit(history, ACTIVITY_LIMIT)
    }

    pub fn with_activity_limit(mut history: History, activity_limit: usize) -> Self {
        history.load_all();
        let mut console = Self {
            sessions: SessionStore::new(),
            history,
            activity: VecDeque::new(),
            activity_limit: activity_limit.max(1),
            remote: None,
            stats: DashboardStats::default(),
            connected: false,
        };
        console.recompute();
        console
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn active(&self) -> Option<&ScanSession> {
        self.sessions.active()
    }

    pub fn history(&self) -> &[HistoryEntry] {
        self.history.entries().unwrap_or_default()
    }

    pub fn activity(&self) -> impl Iterator<Item = &Activity> {
        self.activity.iter()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn stats(&self) -> &DashboardStats {
        &self.stats
    }

    pub fn dashboard(&self) -> DashboardView {
        DashboardView {
            local: self.stats.clone(),
            remote: self.remote.clone(),
            trends: self
                .remote
                .as_ref()
                .and_then(|r| stats::trends(&r.scan_history)),
            severity_bar_width: self
                .remote
                .as_ref()
                .map_or(self.stats.severity_bar_width, DashboardSnapshot::severity_bar_width),
        }
    }

    /// View of the active session's results.
    pub fn active_view(&self) -> Option<ResultView> {
        self.active()
            .map(|s| render::render(s.scan_type, s.results.as_ref()))
    }

    /// Release a session's in-memory record. Its history entry stays; a later
    /// load of the id fails with [`ConsoleError::NotFound`].
    pub fn evict(&mut self, id: &str) -> Option<ScanSession> {
        let evicted = self.sessions.evict(id);
        if evicted.is_some() {
            debug!(scan_id = id, "session evicted");
            self.recompute();
        }
        evicted
    }

    /// Validate a start request before anything is sent.
    pub fn prepare_start(&self, mut request: ScanRequest) -> Result<ScanRequest, ConsoleError> {
        request.target = session::validate_target(&request.target)?.to_string();
        request.ports = request
            .ports
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty() && request.scan_type.accepts_ports());
        Ok(request)
    }

    /// Apply one event. Errors are returned for the caller to surface; the
    /// console is consistent either way. A scan that ends in failure is
    /// reported as [`ConsoleError::BackendReported`] once its transition and
    /// history entry are recorded.
    pub fn handle(&mut self, event: Event) -> Result<(), ConsoleError> {
        let now = OffsetDateTime::now_utc();
        let result = match event {
            Event::Connected => {
                self.connected = true;
                self.record(ActivityKind::Info, "Connected to scanning service".into(), now);
                Ok(())
            }
            Event::Disconnected => {
                self.connected = false;
                self.record(ActivityKind::Warning, "Disconnected from scanning service".into(), now);
                Ok(())
            }
            Event::ConnectError { message } => {
                self.connected = false;
                self.record(ActivityKind::Error, format!("Connection error: {message}"), now);
                Err(ConsoleError::Transport(message))
            }
            Event::ScanUpdate(update) => {
                let transition = self.sessions.apply_progress(update);
                self.finish(transition, now)
            }
            Event::ScanComplete(done) => {
                let transition = self.sessions.apply_completion(done, now);
                self.finish(transition, now)
            }
            Event::ScanError(failure) => {
                let transition = self.sessions.apply_error(failure, now);
                self.finish(transition, now)
            }
            Event::ScanStarted { request, response } => self.on_started(request, response, now),
            Event::StartFailed { request, message } => {
                self.record(
                    ActivityKind::Error,
                    format!("Failed to start {} on {}: {message}", request.scan_type.label(), request.target),
                    now,
                );
                Err(ConsoleError::Transport(message))
            }
            Event::LoadSession { id } => self.on_load(&id, now),
            Event::DashboardRefreshed(snapshot) => {
                self.remote = Some(snapshot);
                Ok(())
            }
        };
        self.recompute();
        result
    }

    fn on_started(
        &mut self,
        request: ScanRequest,
        response: StartResponse,
        now: OffsetDateTime,
    ) -> Result<(), ConsoleError> {
        let Some(id) = response.started_id() else {
            warn!(status = %response.status, "backend did not start the scan");
            self.record(
                ActivityKind::Warning,
                format!("Scan not started (backend replied '{}')", response.status),
                now,
            );
            return Ok(());
        };
        let entry = self
            .sessions
            .start(id.to_string(), request.scan_type, &request.target, request.ports.clone(), now)?
            .summary();
        info!(scan_id = %entry.id, scan_type = %entry.scan_type, target = %entry.target, "scan started");
        self.record(
            ActivityKind::Scan,
            format!("Started {} on {}", entry.scan_type.label(), entry.target),
            now,
        );
        self.append_history(entry, now)
    }

    fn on_load(&mut self, id: &str, now: OffsetDateTime) -> Result<(), ConsoleError> {
        let entry = match self.sessions.load(id) {
            Ok(s) => s.summary(),
            Err(e) => {
                self.record(ActivityKind::Warning, "Scan data not found. It may have expired.".into(), now);
                return Err(e);
            }
        };
        debug!(scan_id = id, "session loaded");
        if self.history.contains(id) {
            return Ok(());
        }
        self.append_history(entry, now)
    }

    fn finish(&mut self, transition: Transition, now: OffsetDateTime) -> Result<(), ConsoleError> {
        let entry = match transition {
            Transition::Finished(entry) => entry,
            Transition::Updated | Transition::Ignored(_) => return Ok(()),
        };
        let failure = self
            .sessions
            .get(&entry.id)
            .and_then(|s| s.error.clone());
        let scan_id = entry.id.clone();
        match &failure {
            Some(err) => {
                warn!(scan_id = %scan_id, error = %err, "scan failed");
                self.record(ActivityKind::Error, format!("Scan failed: {err}"), now);
            }
            None => {
                info!(scan_id = %scan_id, "scan completed");
                self.record(ActivityKind::Success, format!("Scan completed: {}", entry.target), now);
            }
        }
        let stored = self.append_history(entry, now);
        match failure {
            Some(message) => Err(ConsoleError::BackendReported { scan_id, message }),
            None => stored,
        }
    }

    /// History write failures are logged and surfaced but never undo the
    /// transition that caused them.
    fn append_history(&mut self, entry: HistoryEntry, now: OffsetDateTime) -> Result<(), ConsoleError> {
        if let Err(e) = self.history.append(entry) {
            warn!(error = %e, "history not persisted");
            self.record(ActivityKind::Warning, "Scan history could not be saved".into(), now);
            return Err(e);
        }
        Ok(())
    }

    fn record(&mut self, kind: ActivityKind, message: String, at: OffsetDateTime) {
        self.activity.push_front(Activity { kind, message, at });
        self.activity.truncate(self.activity_limit);
    }

    fn recompute(&mut self) {
        self.stats = stats::compute(self.history(), self.sessions.sessions());
    }
}

/// Validate, send and record a start-scan request. Returns the new session id,
/// or `None` when the backend declined.
pub async fn start_scan<B: ScanBackend>(
    console: &mut Console,
    backend: &B,
    request: ScanRequest,
) -> Result<Option<String>, ConsoleError> {
    let request = console.prepare_start(request)?;
    let event = match backend.start_scan(&request).await {
        Ok(response) => Event::ScanStarted { request, response },
        Err(e) => Event::StartFailed {
            request,
            message: e.to_string(),
        },
    };
    let id = event.scan_id().map(str::to_string);
    match console.handle(event) {
        Ok(()) | Err(ConsoleError::StorageDegraded(_)) => {}
        Err(e) => return Err(e),
    }
    Ok(id.filter(|id| console.sessions().get(id).is_some()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::MemoryBackend;
    use crate::types::{ScanStatus, ScanType};

    fn started(console: &mut Console, id: &str) {
        console
            .handle(Event::ScanStarted {
                request: ScanRequest {
                    scan_type: ScanType::PortScan,
                    target: "10.0.0.1".into(),
                    ports: None,
                },
                response: StartResponse {
                    status: "started".into(),
                    scan_id: Some(id.into()),
                },
            })
            .unwrap();
    }

    #[test]
    fn declined_start_creates_nothing() {
        let mut console = Console::new(History::new(MemoryBackend::new()));
        console
            .handle(Event::ScanStarted {
                request: ScanRequest {
                    scan_type: ScanType::PortScan,
                    target: "10.0.0.1".into(),
                    ports: None,
                },
                response: StartResponse {
                    status: "queued".into(),
                    scan_id: Some("x".into()),
                },
            })
            .unwrap();
        assert!(console.active().is_none());
        assert!(console.history().is_empty());
        assert_eq!(console.activity().next().unwrap().kind, ActivityKind::Warning);
    }

    #[test]
    fn activity_feed_is_bounded_newest_first() {
        let mut console = Console::new(History::new(MemoryBackend::new()));
        for _ in 0..12 {
            console.handle(Event::Connected).unwrap();
        }
        console.handle(Event::Disconnected).unwrap();
        let feed: Vec<_> = console.activity().collect();
        assert_eq!(feed.len(), ACTIVITY_LIMIT);
        assert_eq!(feed[0].kind, ActivityKind::Warning);
        assert!(!console.is_connected());
    }

    #[test]
    fn prepare_start_drops_ports_for_snmp() {
        let console = Console::new(History::new(MemoryBackend::new()));
        let req = console
            .prepare_start(ScanRequest {
                scan_type: ScanType::SnmpScan,
                target: " 10.0.0.5 ".into(),
                ports: Some("1-1024".into()),
            })
            .unwrap();
        assert_eq!(req.target, "10.0.0.5");
        assert_eq!(req.ports, None);
    }

    #[test]
    fn load_of_session_missing_from_history_touches_history() {
        let mut console = Console::new(History::with_limit(MemoryBackend::new(), 1));
        started(&mut console, "a");
        started(&mut console, "b");
        assert_eq!(console.history()[0].id, "b");

        console.handle(Event::LoadSession { id: "a".into() }).unwrap();
        assert_eq!(console.active().unwrap().id, "a");
        assert_eq!(console.history()[0].id, "a");
        assert_eq!(console.history()[0].status, ScanStatus::Running);
    }

    #[test]
    fn remote_snapshot_drives_severity_bar() {
        let mut console = Console::new(History::new(MemoryBackend::new()));
        assert_eq!(console.dashboard().severity_bar_width, 0.0);

        console
            .handle(Event::DashboardRefreshed(DashboardSnapshot {
                critical_vulnerabilities: 1,
                high_vulnerabilities: 2,
                low_vulnerabilities: 1,
                ..Default::default()
            }))
            .unwrap();
        assert_eq!(console.dashboard().severity_bar_width, 75.0);
    }
}
