use std::collections::HashMap;

use time::OffsetDateTime;
use tracing::debug;

use crate::error::ConsoleError;
use crate::events::{ScanComplete, ScanFailure, ScanUpdate};
use crate::reconcile;
use crate::types::{parse_progress, HistoryEntry, ScanSession, ScanStatus, ScanType};

/// Message stored when a `scan_error` event carries no text.
pub const DEFAULT_ERROR_MESSAGE: &str = "Unknown error";

/// Outcome of feeding one lifecycle event to the store.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// The event did not touch any session.
    Ignored(&'static str),
    /// The active session changed but is still running (or was already terminal).
    Updated,
    /// The active session reached a terminal state; the summary belongs in history.
    Finished(HistoryEntry),
}

/// Trim and reject empty targets. Nothing else about the target is checked.
pub fn validate_target(target: &str) -> Result<&str, ConsoleError> {
    let trimmed = target.trim();
    if trimmed.is_empty() {
        return Err(ConsoleError::Validation("target must not be empty".into()));
    }
    Ok(trimmed)
}

/// In-memory map of scan id → session plus the id currently in focus.
///
/// Only the active session accepts lifecycle events; events for any other id
/// are dropped so a stale scan cannot write into the one the operator is
/// looking at. Nothing here is durable.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: HashMap<String, ScanSession>,
    active: Option<String>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a scan the backend accepted and make it the active session.
    pub fn start(
        &mut self,
        id: String,
        scan_type: ScanType,
        target: &str,
        ports: Option<String>,
        at: OffsetDateTime,
    ) -> Result<&ScanSession, ConsoleError> {
        let target = validate_target(target)?;
        if self.sessions.contains_key(&id) {
            return Err(ConsoleError::InvalidTransition(format!(
                "scan {id} already exists and cannot be restarted"
            )));
        }
        let session = ScanSession {
            id: id.clone(),
            scan_type,
            target: target.to_string(),
            ports: ports.filter(|p| !p.trim().is_empty()),
            status: ScanStatus::Running,
            progress: 0,
            current: None,
            total: None,
            current_task: None,
            results: None,
            start_time: at,
            end_time: None,
            error: None,
            report_path: None,
        };
        self.active = Some(id.clone());
        let session = self.sessions.entry(id).or_insert(session);
        Ok(&*session)
    }

    pub fn active_id(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn active(&self) -> Option<&ScanSession> {
        self.active.as_ref().and_then(|id| self.sessions.get(id))
    }

    pub fn get(&self, id: &str) -> Option<&ScanSession> {
        self.sessions.get(id)
    }

    pub fn sessions(&self) -> impl Iterator<Item = &ScanSession> {
        self.sessions.values()
    }

    /// Drop a session from memory. History is unaffected.
    pub fn evict(&mut self, id: &str) -> Option<ScanSession> {
        if self.active.as_deref() == Some(id) {
            self.active = None;
        }
        self.sessions.remove(id)
    }

    pub fn apply_progress(&mut self, update: ScanUpdate) -> Transition {
        let session = match self.running_active_mut(&update.scan_id) {
            Ok(s) => s,
            Err(reason) => return Transition::Ignored(reason),
        };

        let incoming = parse_progress(&update.progress);
        session.progress = session.progress.max(incoming);
        if let Some(task) = update.current_task.or(update.message) {
            session.current_task = Some(task);
        }
        if update.current.is_some() {
            session.current = update.current;
        }
        if update.total.is_some() {
            session.total = update.total;
        }
        if let Some(patch) = update.results {
            session.results = Some(reconcile::merge(
                session.results.take(),
                patch,
                session.scan_type,
            ));
        }
        Transition::Updated
    }

    pub fn apply_completion(&mut self, event: ScanComplete, at: OffsetDateTime) -> Transition {
        let session = match self.running_active_mut(&event.scan_id) {
            Ok(s) => s,
            Err(reason) => return Transition::Ignored(reason),
        };

        if let Some(patch) = event.results {
            session.results = Some(reconcile::merge(
                session.results.take(),
                patch,
                session.scan_type,
            ));
        }
        session.status = ScanStatus::Completed;
        session.progress = 100;
        session.end_time = Some(at);
        session.report_path = event.report_path;
        Transition::Finished(session.summary())
    }

    /// A `scan_error` without an id is aimed at the active session.
    pub fn apply_error(&mut self, event: ScanFailure, at: OffsetDateTime) -> Transition {
        let Some(active) = self.active.clone() else {
            return Transition::Ignored("no active session");
        };
        if event.scan_id.as_deref().is_some_and(|id| id != active) {
            debug!(scan_id = ?event.scan_id, active = %active, "dropping error for inactive scan");
            return Transition::Ignored("not the active session");
        }
        let Some(session) = self.sessions.get_mut(&active) else {
            return Transition::Ignored("active session evicted");
        };
        let message = event
            .message
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_ERROR_MESSAGE.to_string());

        match session.status {
            ScanStatus::Running => {
                session.status = ScanStatus::Error;
                session.error = Some(message);
                session.end_time = Some(at);
                Transition::Finished(session.summary())
            }
            ScanStatus::Error if session.error.is_none() => {
                session.error = Some(message);
                Transition::Updated
            }
            ScanStatus::Error | ScanStatus::Completed => Transition::Ignored("session already terminal"),
        }
    }

    /// Bring a stored session back into focus. On failure the current focus
    /// is left untouched.
    pub fn load(&mut self, id: &str) -> Result<&ScanSession, ConsoleError> {
        let session = self
            .sessions
            .get(id)
            .ok_or_else(|| ConsoleError::NotFound(id.to_string()))?;
        self.active = Some(session.id.clone());
        Ok(session)
    }

    fn running_active_mut(&mut self, scan_id: &str) -> Result<&mut ScanSession, &'static str> {
        if self.active.as_deref() != Some(scan_id) {
            debug!(scan_id, active = ?self.active, "dropping event for inactive scan");
            return Err("not the active session");
        }
        match self.sessions.get_mut(scan_id) {
            Some(s) if s.status == ScanStatus::Running => Ok(s),
            Some(_) => Err("session already terminal"),
            None => Err("active session evicted"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store_with(id: &str) -> SessionStore {
        let mut store = SessionStore::new();
        store
            .start(id.into(), ScanType::PortScan, " 10.0.0.1 ", None, OffsetDateTime::UNIX_EPOCH)
            .unwrap();
        store
    }

    fn update(id: &str, progress: serde_json::Value) -> ScanUpdate {
        ScanUpdate {
            scan_id: id.into(),
            progress,
            ..ScanUpdate::default()
        }
    }

    #[test]
    fn start_trims_target_and_activates() {
        let store = store_with("a");
        let s = store.active().unwrap();
        assert_eq!(s.target, "10.0.0.1");
        assert_eq!(s.status, ScanStatus::Running);
        assert_eq!(s.progress, 0);
    }

    #[test]
    fn blank_target_is_rejected() {
        let mut store = SessionStore::new();
        let err = store
            .start("a".into(), ScanType::PortScan, "   ", None, OffsetDateTime::UNIX_EPOCH)
            .unwrap_err();
        assert!(matches!(err, ConsoleError::Validation(_)));
        assert!(store.sessions().next().is_none());
        assert!(store.active().is_none());
    }

    #[test]
    fn progress_tracks_latest_value_and_ignores_garbage() {
        let mut store = store_with("a");
        for p in [json!(10), json!("25"), json!(60)] {
            assert_eq!(store.apply_progress(update("a", p)), Transition::Updated);
        }
        assert_eq!(store.active().unwrap().progress, 60);

        store.apply_progress(update("a", json!("n/a")));
        assert_eq!(store.active().unwrap().progress, 60);

        store.apply_progress(update("a", json!(400)));
        assert_eq!(store.active().unwrap().progress, 100);
    }

    #[test]
    fn message_stands_in_for_missing_task() {
        let mut store = store_with("a");
        store.apply_progress(ScanUpdate {
            message: Some("Starting port_scan scan on 10.0.0.1".into()),
            ..update("a", json!(null))
        });
        assert_eq!(
            store.active().unwrap().current_task.as_deref(),
            Some("Starting port_scan scan on 10.0.0.1")
        );
    }

    #[test]
    fn events_for_other_ids_are_dropped() {
        let mut store = store_with("old");
        store
            .start("new".into(), ScanType::PortScan, "10.0.0.2", None, OffsetDateTime::UNIX_EPOCH)
            .unwrap();
        let before_old = store.get("old").cloned();

        assert!(matches!(store.apply_progress(update("old", json!(90))), Transition::Ignored(_)));
        let done = ScanComplete {
            scan_id: "old".into(),
            ..ScanComplete::default()
        };
        assert!(matches!(
            store.apply_completion(done, OffsetDateTime::UNIX_EPOCH),
            Transition::Ignored(_)
        ));
        assert_eq!(store.get("old").cloned(), before_old);
        assert_eq!(store.active().unwrap().progress, 0);
    }

    #[test]
    fn completion_is_terminal() {
        let mut store = store_with("a");
        let done = ScanComplete {
            scan_id: "a".into(),
            report_path: Some("/api/scan/a/report?format=html".into()),
            results: None,
        };
        let Transition::Finished(entry) = store.apply_completion(done.clone(), OffsetDateTime::UNIX_EPOCH)
        else {
            panic!("expected a terminal transition");
        };
        assert_eq!(entry.status, ScanStatus::Completed);
        assert!(entry.end_time.is_some());

        assert!(matches!(store.apply_progress(update("a", json!(5))), Transition::Ignored(_)));
        assert!(matches!(
            store.apply_completion(done, OffsetDateTime::UNIX_EPOCH),
            Transition::Ignored(_)
        ));
        let failure = ScanFailure {
            scan_id: Some("a".into()),
            message: Some("late".into()),
        };
        assert!(matches!(
            store.apply_error(failure, OffsetDateTime::UNIX_EPOCH),
            Transition::Ignored(_)
        ));
        assert_eq!(store.active().unwrap().status, ScanStatus::Completed);
    }

    #[test]
    fn error_without_text_uses_default_message() {
        let mut store = store_with("a");
        let t = store.apply_error(ScanFailure::default(), OffsetDateTime::UNIX_EPOCH);
        assert!(matches!(t, Transition::Finished(_)));
        let s = store.active().unwrap();
        assert_eq!(s.status, ScanStatus::Error);
        assert_eq!(s.error.as_deref(), Some(DEFAULT_ERROR_MESSAGE));
    }

    #[test]
    fn restarting_a_known_id_is_refused() {
        let mut store = store_with("a");
        let err = store
            .start("a".into(), ScanType::PortScan, "10.0.0.1", None, OffsetDateTime::UNIX_EPOCH)
            .unwrap_err();
        assert!(matches!(err, ConsoleError::InvalidTransition(_)));
    }

    #[test]
    fn loading_unknown_id_keeps_focus() {
        let mut store = store_with("a");
        let err = store.load("ghost").unwrap_err();
        assert_eq!(err, ConsoleError::NotFound("ghost".into()));
        assert_eq!(store.active_id(), Some("a"));
    }
}
