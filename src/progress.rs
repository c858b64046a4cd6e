use crate::rate::{estimate_remaining, NotifyThrottle, RateWindow};
use crate::units::{human_bytes, human_duration, human_rate};

/// Shown when the transport fails outright and the server never answered.
/// Nothing is retried; the user runs the command again.
pub const FAILURE_TEXT: &str = "Upload failed: could not reach the server.";

/// One event per transport callback. A tagged variant instead of separate
/// callback slots, so renderers match on a single stream.
#[derive(Debug, Clone)]
pub enum TransferEvent {
    Progress {
        /// Cumulative bytes handed to the transport so far.
        bytes_sent: u64,
        /// None when the transport cannot determine the payload size.
        total_bytes: Option<u64>,
    },
    Completed {
        status: u16,
        body: String,
    },
    Failed {
        message: String,
    },
}

/// Terminal result of a transfer, after the event stream ends.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Completed { message: String },
    /// The server answered with a non-success status.
    Rejected { message: String },
    /// Transport-level failure; the server never answered.
    Failed { message: String },
}

/// What a renderer draws for one transfer.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Percentage when the total is known, raw bytes sent otherwise.
    /// Recomputed on every progress event, never throttled.
    pub headline: String,
    /// 0.0..=1.0 gauge position when the total is known.
    pub ratio: Option<f64>,
    /// Smoothed rate text; refreshed only when the throttle fires.
    pub rate: Option<String>,
    /// "sent / total · ETA" text; refreshed only when the throttle fires.
    pub detail: Option<String>,
}

/// Display state for one transfer.
///
/// The primary indicator (headline, gauge ratio) tracks every progress
/// event; the rate and detail strings refresh at most once per notify
/// interval, so a burst of sub-millisecond events cannot flood a renderer.
/// One tracker per upload attempt; nothing survives across transfers.
pub struct Tracker {
    window: RateWindow,
    throttle: NotifyThrottle,
    bytes_sent: u64,
    total_bytes: Option<u64>,
    rate_text: Option<String>,
    detail_text: Option<String>,
}

impl Tracker {
    pub fn new() -> Self {
        Self {
            window: RateWindow::new(),
            throttle: NotifyThrottle::new(),
            bytes_sent: 0,
            total_bytes: None,
            rate_text: None,
            detail_text: None,
        }
    }

    /// Feed one progress sample. `now` is seconds since the transfer epoch,
    /// supplied by the caller so the tracker stays clock-free. Returns
    /// whether the throttled portion of the display was refreshed.
    pub fn on_progress(&mut self, now: f64, bytes_sent: u64, total_bytes: Option<u64>) -> bool {
        self.bytes_sent = bytes_sent;
        if total_bytes.is_some() {
            self.total_bytes = total_bytes;
        }
        self.window.record(now, bytes_sent);

        if !self.throttle.should_fire(now) {
            return false;
        }
        let rate = self.window.current();
        self.rate_text = rate.map(human_rate);
        self.detail_text = Some(self.detail_line(rate));
        true
    }

    fn detail_line(&self, rate: Option<f64>) -> String {
        let sent = human_bytes(self.bytes_sent);
        match self.total_bytes {
            Some(total) => {
                let mut line = format!("{sent} / {}", human_bytes(total));
                if let Some(eta) = estimate_remaining(rate, self.total_bytes, self.bytes_sent) {
                    line.push_str(&format!(" · ETA {}", human_duration(eta)));
                }
                line
            }
            None => format!("{sent} / ?"),
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        let ratio = self
            .total_bytes
            .filter(|total| *total > 0)
            .map(|total| (self.bytes_sent as f64 / total as f64).min(1.0));
        let headline = match ratio {
            Some(r) => format!("{:.1}%", r * 100.0),
            None => format!("{} sent", human_bytes(self.bytes_sent)),
        };
        Snapshot {
            headline,
            ratio,
            rate: self.rate_text.clone(),
            detail: self.detail_text.clone(),
        }
    }
}

/// Map a terminal event to the message shown to the user. Progress events
/// are not terminal and yield None.
pub fn outcome_for(event: &TransferEvent) -> Option<Outcome> {
    match event {
        TransferEvent::Progress { .. } => None,
        TransferEvent::Completed { status, body } if (200..300).contains(status) => Some(Outcome::Completed {
            message: completion_message(body),
        }),
        TransferEvent::Completed { status, body } => Some(Outcome::Rejected {
            message: format!("Server rejected the upload (HTTP {status}): {}", body.trim()),
        }),
        TransferEvent::Failed { message } => Some(Outcome::Failed {
            message: message.clone(),
        }),
    }
}

/// The server reply names where it stored the payload; fall back to the
/// raw body when it is not JSON or the field is missing.
pub fn completion_message(body: &str) -> String {
    let saved = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("saved_path").and_then(|p| p.as_str()).map(str::to_owned));
    match saved {
        Some(path) => format!("Uploaded: saved to {path}"),
        None if body.trim().is_empty() => "Upload complete.".to_string(),
        None => format!("Uploaded: {}", body.trim()),
    }
}
