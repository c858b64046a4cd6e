use std::fs;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use crate::cli::Sink;

static NEXT_UPLOAD: AtomicU64 = AtomicU64::new(0);

/// Reply shape the upload client's completion path consumes: `saved_path`
/// names where the payload landed.
#[derive(Serialize)]
struct SaveReply {
    ok: bool,
    saved_path: String,
    bytes: u64,
}

pub fn run_sink(args: Sink) -> Result<()> {
    let stop_flag = Arc::new(AtomicBool::new(false));
    {
        let stop = stop_flag.clone();
        let _ = ctrlc::set_handler(move || {
            stop.store(true, Ordering::Relaxed);
        });
    }

    run_sink_with_shutdown(args, stop_flag)
}

pub(crate) fn run_sink_with_shutdown(args: Sink, stop_flag: Arc<AtomicBool>) -> Result<()> {
    let dir = args.dir.clone().unwrap_or_else(std::env::temp_dir);
    fs::create_dir_all(&dir).with_context(|| format!("Creating sink directory {}", dir.display()))?;

    let listener = TcpListener::bind(args.host)
        .with_context(|| format!("Binding sink listener at {}", args.host))?;
    listener
        .set_nonblocking(true)
        .context("Setting sink listener non-blocking mode")?;
    info!(host = %args.host, dir = %dir.display(), "Sink listening");

    loop {
        if stop_flag.load(Ordering::Relaxed) {
            break;
        }
        let (stream, addr) = match listener.accept() {
            Ok(conn) => conn,
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                // avoid busy loop
                thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(e) => {
                warn!(?e, "Accept failed");
                continue;
            }
        };
        info!(%addr, "Accepted upload connection");
        let dir = dir.clone();
        thread::spawn(move || {
            if let Err(e) = handle_connection(stream, &dir) {
                warn!(?e, %addr, "Upload connection failed");
            }
        });
    }

    info!("Shutting down");
    Ok(())
}

struct RequestHead {
    method: String,
    target: String,
    body: BodyKind,
}

enum BodyKind {
    Length(u64),
    Chunked,
}

fn handle_connection(mut stream: TcpStream, dir: &Path) -> Result<()> {
    stream
        .set_read_timeout(Some(Duration::from_secs(30)))
        .context("Setting sink read timeout")?;
    let mut reader = BufReader::new(stream.try_clone().context("Cloning sink stream")?);

    let head = match read_head(&mut reader) {
        Ok(Some(head)) => head,
        // closed before sending anything (e.g. a port probe)
        Ok(None) => return Ok(()),
        Err(e) => {
            let _ = respond(&mut stream, 400, r#"{"ok":false}"#);
            return Err(e);
        }
    };
    if head.method != "POST" && head.method != "PUT" {
        return respond(&mut stream, 405, r#"{"ok":false}"#);
    }

    let seq = NEXT_UPLOAD.fetch_add(1, Ordering::Relaxed);
    let path = dir.join(format!("upload-{}-{seq}.bin", unix_millis()));
    let mut out = fs::File::create(&path).with_context(|| format!("Creating {}", path.display()))?;
    let bytes = match head.body {
        BodyKind::Chunked => copy_chunked(&mut reader, &mut out)?,
        BodyKind::Length(n) => {
            let copied = std::io::copy(&mut reader.by_ref().take(n), &mut out)?;
            if copied != n {
                anyhow::bail!("Short body: expected {n} bytes, got {copied}");
            }
            copied
        }
    };

    info!(path = %path.display(), bytes, target = %head.target, "Stored upload");
    let reply = SaveReply {
        ok: true,
        saved_path: path.display().to_string(),
        bytes,
    };
    respond(&mut stream, 200, &serde_json::to_string(&reply).context("Encoding sink reply")?)
}

fn read_head(reader: &mut impl BufRead) -> Result<Option<RequestHead>> {
    let mut line = String::new();
    if reader.read_line(&mut line).context("Reading request line")? == 0 {
        return Ok(None);
    }
    let mut parts = line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let target = parts.next().unwrap_or_default().to_string();
    if method.is_empty() || target.is_empty() {
        anyhow::bail!("Malformed request line: {line:?}");
    }

    let mut content_length: Option<u64> = None;
    let mut chunked = false;
    loop {
        let mut header = String::new();
        if reader.read_line(&mut header).context("Reading header")? == 0 {
            anyhow::bail!("Connection closed inside headers");
        }
        let header = header.trim_end();
        if header.is_empty() {
            break;
        }
        if let Some((name, value)) = header.split_once(':') {
            let value = value.trim();
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.parse().ok();
            } else if name.eq_ignore_ascii_case("transfer-encoding")
                && value.to_ascii_lowercase().contains("chunked")
            {
                chunked = true;
            }
        }
    }

    let body = if chunked {
        BodyKind::Chunked
    } else {
        BodyKind::Length(content_length.unwrap_or(0))
    };
    Ok(Some(RequestHead { method, target, body }))
}

/// Minimal chunked-transfer decoder: hex size line, chunk bytes, CRLF,
/// terminated by a zero-size chunk. Trailers are read and discarded.
fn copy_chunked(reader: &mut impl BufRead, out: &mut impl Write) -> Result<u64> {
    let mut total = 0u64;
    loop {
        let mut size_line = String::new();
        if reader.read_line(&mut size_line).context("Reading chunk size")? == 0 {
            anyhow::bail!("Connection closed inside chunked body");
        }
        let size_str = size_line.trim().split(';').next().unwrap_or_default();
        let size = u64::from_str_radix(size_str, 16)
            .with_context(|| format!("Bad chunk size line: {size_line:?}"))?;
        if size == 0 {
            loop {
                let mut trailer = String::new();
                if reader.read_line(&mut trailer).context("Reading trailer")? == 0 {
                    break;
                }
                if trailer.trim_end().is_empty() {
                    break;
                }
            }
            return Ok(total);
        }
        let copied = std::io::copy(&mut reader.by_ref().take(size), out)?;
        if copied != size {
            anyhow::bail!("Short chunk: expected {size} bytes, got {copied}");
        }
        total += size;
        let mut crlf = [0u8; 2];
        reader.read_exact(&mut crlf).context("Reading chunk terminator")?;
    }
}

fn respond(stream: &mut TcpStream, status: u16, body: &str) -> Result<()> {
    let reason = match status {
        200 => "OK",
        400 => "Bad Request",
        405 => "Method Not Allowed",
        _ => "Error",
    };
    let reply = format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(reply.as_bytes()).context("Writing sink response")?;
    let _ = stream.flush();
    Ok(())
}

fn unix_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}
