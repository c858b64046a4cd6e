use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel as channel;
use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::Client;
use reqwest::Url;
use thiserror::Error;
use tracing::{info, warn};

use crate::cli::Upload;
use crate::progress::{Outcome, TransferEvent, FAILURE_TEXT};
use crate::{console, tui};

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("cannot read {path}: {source}")]
    Source {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("{0}")]
    Transport(String),
    #[error("{0}")]
    Rejected(String),
}

/// Body source for one transfer. Stdin has no length up front, so
/// percentage and ETA stay unavailable for it.
#[derive(Debug)]
pub(crate) enum Source {
    File { file: File, len: u64, name: String },
    Stdin,
}

pub(crate) fn open_source(path: &Path) -> Result<Source, UploadError> {
    if path.as_os_str() == "-" {
        return Ok(Source::Stdin);
    }
    let file = File::open(path).map_err(|e| UploadError::Source {
        path: path.display().to_string(),
        source: e,
    })?;
    let len = file
        .metadata()
        .map_err(|e| UploadError::Source {
            path: path.display().to_string(),
            source: e,
        })?
        .len();
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload.bin".to_string());
    Ok(Source::File { file, len, name })
}

/// Wraps the body source: counts cumulative bytes and reports each chunk
/// as a progress event. Checked against the stop flag so a quit in the
/// renderer aborts the in-flight request at the next read.
pub(crate) struct CountingReader<R> {
    inner: R,
    bytes_sent: u64,
    total_bytes: Option<u64>,
    events: channel::Sender<TransferEvent>,
    stop: Arc<AtomicBool>,
}

impl<R> CountingReader<R> {
    pub(crate) fn new(
        inner: R,
        total_bytes: Option<u64>,
        events: channel::Sender<TransferEvent>,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            inner,
            bytes_sent: 0,
            total_bytes,
            events,
            stop,
        }
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.stop.load(Ordering::Relaxed) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                "upload aborted by user",
            ));
        }
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.bytes_sent += n as u64;
            let _ = self.events.send(TransferEvent::Progress {
                bytes_sent: self.bytes_sent,
                total_bytes: self.total_bytes,
            });
        }
        Ok(n)
    }
}

/// Common audio/video types; anything else ships as octet-stream.
fn guess_mime(name: &str) -> &'static str {
    let ext = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("m4a") => "audio/mp4",
        Some("aac") => "audio/aac",
        Some("flac") => "audio/flac",
        Some("ogg") | Some("opus") => "audio/ogg",
        Some("mp4") => "video/mp4",
        Some("mkv") => "video/x-matroska",
        Some("mov") => "video/quicktime",
        Some("avi") => "video/x-msvideo",
        Some("webm") => "video/webm",
        Some("json") => "application/json",
        _ => "application/octet-stream",
    }
}

pub fn run_upload(args: Upload) -> Result<()> {
    let stop_flag = Arc::new(AtomicBool::new(false));
    {
        let stop = stop_flag.clone();
        let _ = ctrlc::set_handler(move || {
            stop.store(true, Ordering::Relaxed);
        });
    }

    let url = Url::parse(&args.url).map_err(|e| UploadError::InvalidUrl {
        url: args.url.clone(),
        reason: e.to_string(),
    })?;
    let source = open_source(&args.source)?;
    info!(url = %url, source = %args.source.display(), "Starting upload");

    let client = Client::builder()
        .connect_timeout(Duration::from_secs(args.timeout))
        // the 30s default would kill long uploads; progress display covers stalls
        .timeout(None)
        .build()
        .context("Building HTTP client")?;

    let (event_tx, event_rx) = channel::bounded::<TransferEvent>(args.buffer);
    let worker = spawn_transfer(
        client,
        url,
        args.field.clone(),
        source,
        event_tx,
        stop_flag.clone(),
    );

    let outcome = if args.plain {
        console::run(event_rx, stop_flag.clone())?
    } else {
        tui::run(event_rx, stop_flag.clone())?
    };

    match outcome {
        Some(Outcome::Completed { message }) => {
            let _ = worker.join();
            println!("{message}");
            Ok(())
        }
        Some(Outcome::Rejected { message }) => {
            let _ = worker.join();
            Err(UploadError::Rejected(message).into())
        }
        Some(Outcome::Failed { message }) => {
            let _ = worker.join();
            Err(UploadError::Transport(message).into())
        }
        None => {
            // user quit; the worker notices via the stop flag on its next read
            println!("Upload aborted.");
            Ok(())
        }
    }
}

/// Sends the request on a worker thread. Exactly one terminal event is
/// emitted: Completed for any HTTP response, Failed for a transport error.
/// An abort requested through the stop flag emits nothing; the renderer
/// has already decided to quit.
pub(crate) fn spawn_transfer(
    client: Client,
    url: Url,
    field: String,
    source: Source,
    events: channel::Sender<TransferEvent>,
    stop: Arc<AtomicBool>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let part = match source {
            Source::File { file, len, name } => {
                // announce the total before the first chunk so renderers can
                // show 0% instead of raw bytes
                let _ = events.send(TransferEvent::Progress {
                    bytes_sent: 0,
                    total_bytes: Some(len),
                });
                let mime = guess_mime(&name);
                let reader = CountingReader::new(file, Some(len), events.clone(), stop.clone());
                Part::reader_with_length(reader, len)
                    .file_name(name)
                    .mime_str(mime)
            }
            Source::Stdin => {
                let reader =
                    CountingReader::new(std::io::stdin(), None, events.clone(), stop.clone());
                Part::reader(reader)
                    .file_name("stdin")
                    .mime_str("application/octet-stream")
            }
        };
        let part = match part {
            Ok(part) => part,
            Err(e) => {
                warn!(?e, "Invalid multipart metadata");
                let _ = events.send(TransferEvent::Failed {
                    message: FAILURE_TEXT.to_string(),
                });
                return;
            }
        };

        let form = Form::new().part(field, part);
        match client.post(url).multipart(form).send() {
            Ok(resp) => {
                let status = resp.status().as_u16();
                let body = resp.text().unwrap_or_default();
                let _ = events.send(TransferEvent::Completed { status, body });
            }
            Err(e) if stop.load(Ordering::Relaxed) => {
                info!(?e, "Upload aborted");
            }
            Err(e) => {
                warn!(?e, "Transport error");
                let _ = events.send(TransferEvent::Failed {
                    message: FAILURE_TEXT.to_string(),
                });
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn counting_reader_reports_cumulative_bytes() {
        let payload = vec![7u8; 10 * 1024];
        let (tx, rx) = channel::unbounded::<TransferEvent>();
        let stop = Arc::new(AtomicBool::new(false));
        let mut reader =
            CountingReader::new(Cursor::new(payload.clone()), Some(payload.len() as u64), tx, stop);

        let mut out = Vec::new();
        std::io::copy(&mut reader, &mut out).unwrap();
        assert_eq!(out, payload);

        let mut last = 0u64;
        let mut events = 0;
        while let Ok(ev) = rx.try_recv() {
            match ev {
                TransferEvent::Progress {
                    bytes_sent,
                    total_bytes,
                } => {
                    assert!(bytes_sent > last);
                    assert_eq!(total_bytes, Some(payload.len() as u64));
                    last = bytes_sent;
                    events += 1;
                }
                other => panic!("unexpected event: {other:?}"),
            }
        }
        assert!(events >= 1);
        assert_eq!(last, payload.len() as u64);
    }

    #[test]
    fn stop_flag_aborts_the_reader() {
        let (tx, _rx) = channel::unbounded::<TransferEvent>();
        let stop = Arc::new(AtomicBool::new(true));
        let mut reader = CountingReader::new(Cursor::new(vec![1u8; 16]), None, tx, stop);
        let err = reader.read(&mut [0u8; 8]).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::Other);
    }

    #[test]
    fn mime_guess_covers_media_types() {
        assert_eq!(guess_mime("talk.mp3"), "audio/mpeg");
        assert_eq!(guess_mime("clip.MKV"), "video/x-matroska");
        assert_eq!(guess_mime("notes.txt"), "application/octet-stream");
        assert_eq!(guess_mime("no_extension"), "application/octet-stream");
    }

    #[test]
    fn missing_source_is_a_source_error() {
        let err = open_source(Path::new("/definitely/not/here.bin")).unwrap_err();
        assert!(matches!(err, UploadError::Source { .. }));
    }

    #[test]
    fn dash_selects_stdin() {
        assert!(matches!(open_source(Path::new("-")).unwrap(), Source::Stdin));
    }

    #[test]
    fn upload_round_trip_against_local_sink() {
        use crate::progress::{outcome_for, Outcome};

        let port = 7880u16;
        let dir = std::env::temp_dir().join("uplink-upload-e2e");
        std::fs::create_dir_all(&dir).unwrap();
        let sink_args = crate::cli::Sink {
            host: format!("127.0.0.1:{port}").parse().unwrap(),
            dir: Some(dir),
        };
        let sink_stop = Arc::new(AtomicBool::new(false));
        let sink_stop_thread = sink_stop.clone();
        let sink = thread::spawn(move || crate::sink::run_sink_with_shutdown(sink_args, sink_stop_thread));

        // wait for the listener to come up
        for _ in 0..100 {
            if std::net::TcpStream::connect(("127.0.0.1", port)).is_ok() {
                break;
            }
            thread::sleep(Duration::from_millis(50));
        }

        let payload_len = 64u64 * 1024;
        let file_path = std::env::temp_dir().join("uplink-upload-e2e.bin");
        std::fs::write(&file_path, vec![0xAB; payload_len as usize]).unwrap();

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(None)
            .build()
            .unwrap();
        let url = Url::parse(&format!("http://127.0.0.1:{port}/audio/upload")).unwrap();
        let source = open_source(&file_path).unwrap();
        let (tx, rx) = channel::bounded::<TransferEvent>(1024);
        let stop = Arc::new(AtomicBool::new(false));
        let worker = spawn_transfer(client, url, "file".to_string(), source, tx, stop);

        let mut last = 0u64;
        let mut outcome = None;
        for ev in rx.iter() {
            match ev {
                TransferEvent::Progress {
                    bytes_sent,
                    total_bytes,
                } => {
                    assert!(bytes_sent >= last, "progress went backwards");
                    assert_eq!(total_bytes, Some(payload_len));
                    last = bytes_sent;
                }
                other => {
                    outcome = outcome_for(&other);
                    break;
                }
            }
        }
        assert_eq!(last, payload_len);
        match outcome {
            Some(Outcome::Completed { message }) => {
                assert!(message.contains("saved to"), "{message}");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }

        let _ = worker.join();
        sink_stop.store(true, Ordering::Relaxed);
        sink.join().unwrap().unwrap();
    }
}
