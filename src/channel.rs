//! Event channel adapter.
//!
//! The scanning service publishes lifecycle events as newline-delimited JSON
//! frames of the form `{"event": "<name>", "data": {...}}`. This module turns
//! such a stream into [`Event`]s. The transport underneath is any
//! `AsyncBufRead`: a TCP connection, stdin, or a recorded log file.

use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ConsoleError;
use crate::events::Event;

#[derive(Debug, Deserialize)]
struct Frame {
    event: String,
    #[serde(default)]
    data: Value,
}

/// Decode one frame. `Ok(None)` means a well-formed frame for an event the
/// console does not act on.
pub fn decode_frame(line: &str) -> Result<Option<Event>, ConsoleError> {
    let frame: Frame = serde_json::from_str(line)
        .map_err(|e| ConsoleError::Transport(format!("malformed frame: {e}")))?;
    decode_named(&frame.event, frame.data)
}

/// Decode an event by name and payload.
pub fn decode_named(name: &str, data: Value) -> Result<Option<Event>, ConsoleError> {
    let bad = |e: serde_json::Error| ConsoleError::Transport(format!("malformed {name} payload: {e}"));
    let event = match name {
        "scan_update" | "scan_progress" => Event::ScanUpdate(serde_json::from_value(data).map_err(bad)?),
        "scan_complete" => Event::ScanComplete(serde_json::from_value(data).map_err(bad)?),
        "scan_error" => Event::ScanError(serde_json::from_value(data).map_err(bad)?),
        "connect" | "connected" => Event::Connected,
        "disconnect" => Event::Disconnected,
        "connect_error" => Event::ConnectError {
            message: data
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("connection error")
                .to_string(),
        },
        other => {
            debug!(event = other, "ignoring unknown event");
            return Ok(None);
        }
    };
    Ok(Some(event))
}

/// A stream of events read from newline-delimited frames.
pub struct EventChannel<R> {
    lines: Lines<R>,
}

impl<R: AsyncBufRead + Unpin> EventChannel<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
        }
    }

    /// Next decodable event. Malformed frames are logged and skipped.
    /// Returns `None` once the underlying stream ends or fails.
    pub async fn next_event(&mut self) -> Option<Event> {
        loop {
            let line = match self.lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => return None,
                Err(e) => {
                    warn!(error = %e, "event channel read failed");
                    return None;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match decode_frame(&line) {
                Ok(Some(event)) => return Some(event),
                Ok(None) => continue,
                Err(e) => warn!(error = %e, "skipping frame"),
            }
        }
    }
}

/// Open the event channel over TCP.
pub async fn connect_tcp(addr: &str) -> Result<EventChannel<BufReader<TcpStream>>, ConsoleError> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|e| ConsoleError::Transport(format!("connect {addr}: {e}")))?;
    info!(%addr, "event channel connected");
    Ok(EventChannel::new(BufReader::new(stream)))
}

/// Pump events from `channel` into `tx` until the stream ends, the receiver
/// goes away or `cancel` fires. Emits `Connected` first and `Disconnected`
/// when the stream ends on its own.
pub async fn forward<R: AsyncBufRead + Unpin>(
    mut channel: EventChannel<R>,
    tx: mpsc::Sender<Event>,
    cancel: CancellationToken,
) {
    if tx.send(Event::Connected).await.is_err() {
        return;
    }
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return,
            next = channel.next_event() => next,
        };
        let Some(event) = next else {
            let _ = tx.send(Event::Disconnected).await;
            return;
        };
        if tx.send(event).await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_lifecycle_frames() {
        let e = decode_frame(r#"{"event":"scan_progress","data":{"scan_id":"a","progress":"12"}}"#)
            .unwrap()
            .unwrap();
        let Event::ScanUpdate(u) = e else {
            panic!("expected update");
        };
        assert_eq!(u.scan_id, "a");

        let e = decode_frame(r#"{"event":"scan_error","data":{"scan_id":"a","error":"boom"}}"#)
            .unwrap()
            .unwrap();
        let Event::ScanError(f) = e else {
            panic!("expected error");
        };
        assert_eq!(f.message.as_deref(), Some("boom"));

        let e = decode_frame(r#"{"event":"connect_error","data":{"message":"refused"}}"#).unwrap();
        assert_eq!(
            e,
            Some(Event::ConnectError {
                message: "refused".into()
            })
        );
    }

    #[test]
    fn unknown_and_malformed_frames() {
        assert_eq!(decode_frame(r#"{"event":"heartbeat"}"#).unwrap(), None);
        assert!(matches!(decode_frame("not json"), Err(ConsoleError::Transport(_))));
        assert!(matches!(
            decode_frame(r#"{"event":"scan_complete","data":{"report_path":"x"}}"#),
            Err(ConsoleError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn channel_skips_bad_lines() {
        let input = b"garbage\n\n{\"event\":\"scan_complete\",\"data\":{\"scan_id\":\"a\"}}\n";
        let mut ch = EventChannel::new(&input[..]);
        assert!(matches!(ch.next_event().await, Some(Event::ScanComplete(_))));
        assert!(ch.next_event().await.is_none());
    }

    #[tokio::test]
    async fn forward_brackets_stream_with_connection_events() {
        let input = b"{\"event\":\"scan_update\",\"data\":{\"scan_id\":\"a\",\"progress\":5}}\n";
        let (tx, mut rx) = mpsc::channel(8);
        forward(EventChannel::new(&input[..]), tx, CancellationToken::new()).await;
        assert_eq!(rx.recv().await, Some(Event::Connected));
        assert!(matches!(rx.recv().await, Some(Event::ScanUpdate(_))));
        assert_eq!(rx.recv().await, Some(Event::Disconnected));
        assert_eq!(rx.recv().await, None);
    }
}
