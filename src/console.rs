use std::io::{stdout, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use crossbeam_channel::{Receiver, RecvTimeoutError};

use crate::progress::{outcome_for, Outcome, Snapshot, Tracker, TransferEvent, FAILURE_TEXT};

/// Single-line renderer for pipes and dumb terminals. The status line is
/// rewritten in place at the tracker's notify cadence; the terminal
/// message gets its own line from the caller. Returns None when the user
/// quit before a terminal event arrived.
pub fn run(events: Receiver<TransferEvent>, stop: Arc<AtomicBool>) -> Result<Option<Outcome>> {
    let mut tracker = Tracker::new();
    let epoch = Instant::now();
    let mut out = stdout();
    let mut drew = false;

    loop {
        if stop.load(Ordering::Relaxed) {
            finish_line(&mut out, drew)?;
            return Ok(None);
        }
        match events.recv_timeout(Duration::from_millis(200)) {
            Ok(TransferEvent::Progress {
                bytes_sent,
                total_bytes,
            }) => {
                let now = epoch.elapsed().as_secs_f64();
                if tracker.on_progress(now, bytes_sent, total_bytes) {
                    let line = render_line(&tracker.snapshot());
                    out.write_all(b"\r")?;
                    out.write_all(line.as_bytes())?;
                    out.write_all(b"\x1b[K")?; // clear to end of line
                    out.flush()?;
                    drew = true;
                }
            }
            Ok(ev) => {
                if let Some(outcome) = outcome_for(&ev) {
                    finish_line(&mut out, drew)?;
                    return Ok(Some(outcome));
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                finish_line(&mut out, drew)?;
                return Ok(if stop.load(Ordering::Relaxed) {
                    None
                } else {
                    Some(Outcome::Failed {
                        message: FAILURE_TEXT.to_string(),
                    })
                });
            }
        }
    }
}

fn finish_line(out: &mut impl Write, drew: bool) -> Result<()> {
    if drew {
        out.write_all(b"\r\x1b[K")?;
        out.flush()?;
    }
    Ok(())
}

fn render_line(snap: &Snapshot) -> String {
    let mut line = format!("Uploading {}", snap.headline);
    if let Some(rate) = &snap.rate {
        line.push_str(&format!(" · {rate}"));
    }
    if let Some(detail) = &snap.detail {
        line.push_str(&format!(" · {detail}"));
    }
    line
}
