use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use crossbeam_channel::{Receiver, TryRecvError};
use crossterm::{
    event::{self, Event, KeyCode, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout},
    widgets::{Block, Borders, Gauge, Paragraph},
    Terminal,
};

use crate::progress::{outcome_for, Outcome, Tracker, TransferEvent, FAILURE_TEXT};

/// Full-screen renderer. Drains transfer events, feeds the tracker, and
/// draws at the poll cadence; the tracker's throttle bounds how often the
/// rate/ETA text actually changes. Returns None when the user quit before
/// a terminal event arrived.
pub fn run(events: Receiver<TransferEvent>, stop: Arc<AtomicBool>) -> Result<Option<Outcome>> {
    enable_raw_mode()?;
    let mut stdout = std::io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut tracker = Tracker::new();
    let epoch = Instant::now();
    let mut outcome: Option<Outcome> = None;

    while !stop.load(Ordering::Relaxed) {
        loop {
            match events.try_recv() {
                Ok(TransferEvent::Progress {
                    bytes_sent,
                    total_bytes,
                }) => {
                    let now = epoch.elapsed().as_secs_f64();
                    tracker.on_progress(now, bytes_sent, total_bytes);
                }
                Ok(ev) => {
                    outcome = outcome_for(&ev);
                    break;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if !stop.load(Ordering::Relaxed) {
                        outcome = Some(Outcome::Failed {
                            message: FAILURE_TEXT.to_string(),
                        });
                    }
                    break;
                }
            }
        }
        if outcome.is_some() {
            break;
        }

        let snap = tracker.snapshot();
        terminal.draw(|f| {
            let chunks = Layout::default()
                .direction(Direction::Vertical)
                .constraints(
                    [
                        Constraint::Length(3), // Upload gauge
                        Constraint::Length(4), // Throughput
                        Constraint::Min(0),    // spacer
                        Constraint::Length(1), // footer
                    ]
                    .as_ref(),
                )
                .split(f.size());

            match snap.ratio {
                Some(ratio) => {
                    let gauge = Gauge::default()
                        .block(Block::default().title("Upload").borders(Borders::ALL))
                        .ratio(ratio)
                        .label(snap.headline.clone());
                    f.render_widget(gauge, chunks[0]);
                }
                None => {
                    let para = Paragraph::new(snap.headline.clone())
                        .block(Block::default().title("Upload").borders(Borders::ALL));
                    f.render_widget(para, chunks[0]);
                }
            }

            let rate = snap.rate.clone().unwrap_or_else(|| "-".to_string());
            let detail = snap.detail.clone().unwrap_or_else(|| "-".to_string());
            let throughput = Paragraph::new(format!("Rate: {rate}\n{detail}"))
                .block(Block::default().title("Throughput").borders(Borders::ALL));
            f.render_widget(throughput, chunks[1]);

            let footer = Paragraph::new("q: abort upload and quit");
            f.render_widget(footer, chunks[3]);
        })?;

        if event::poll(Duration::from_millis(200))? {
            if let Event::Key(key) = event::read()? {
                if key.code == KeyCode::Char('q')
                    || (key.code == KeyCode::Char('c')
                        && key.modifiers.contains(KeyModifiers::CONTROL))
                {
                    stop.store(true, Ordering::Relaxed);
                }
            }
        }
    }

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(outcome)
}
