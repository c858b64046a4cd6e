use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Upload a file to an HTTP endpoint with live progress
    Upload(Upload),
    /// Run a loopback upload sink for demos and tests
    Sink(Sink),
}

#[derive(Parser, Clone, Debug)]
pub struct Upload {
    /// File to upload, or '-' to stream stdin (size not known up front)
    pub source: PathBuf,

    /// Endpoint URL, e.g. http://127.0.0.1:8686/audio/upload
    #[arg(long)]
    pub url: String,

    /// Multipart field name the server expects
    #[arg(long, default_value = "file")]
    pub field: String,

    /// Connect timeout in seconds
    #[arg(long, default_value_t = 10)]
    pub timeout: u64,

    /// Plain single-line output instead of the full-screen view
    #[arg(long)]
    pub plain: bool,

    /// Progress event channel capacity
    #[arg(long, default_value_t = 1024)]
    pub buffer: usize,
}

#[derive(Parser, Clone, Debug)]
pub struct Sink {
    /// TCP listen address
    #[arg(long, default_value = "127.0.0.1:8686")]
    pub host: SocketAddr,

    /// Directory received payloads are written to (temp dir by default)
    #[arg(long)]
    pub dir: Option<PathBuf>,
}
