mod cli;
mod console;
mod progress;
mod rate;
mod sink;
mod tui;
mod units;
mod upload;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .try_init()
        .ok();

    let cli = Cli::parse();
    let result: Result<()> = match cli.command {
        Some(Commands::Upload(upload)) => upload::run_upload(upload),
        Some(Commands::Sink(sink)) => sink::run_sink(sink),
        None => {
            Cli::command().print_help().ok();
            println!();
            Ok(())
        }
    };

    if let Err(err) = result {
        // Map to stable exit codes
        let code = exit_code_for_error(&err);
        eprintln!("error: {err:?}");
        std::process::exit(code);
    }
}

pub(crate) fn exit_code_for_error(err: &anyhow::Error) -> i32 {
    // 2: unreadable source, 3: invalid URL, 4: bind failure, 5: transport/server failure, 1: other
    for cause in err.chain() {
        if let Some(up) = cause.downcast_ref::<crate::upload::UploadError>() {
            return match up {
                crate::upload::UploadError::Source { .. } => 2,
                crate::upload::UploadError::InvalidUrl { .. } => 3,
                crate::upload::UploadError::Transport(_) => 5,
                crate::upload::UploadError::Rejected(_) => 5,
            };
        }
        if let Some(ioe) = cause.downcast_ref::<std::io::Error>() {
            use std::io::ErrorKind::*;
            return match ioe.kind() {
                AddrInUse | AddrNotAvailable | PermissionDenied => 4,
                NotFound => 2,
                _ => 1,
            };
        }
    }
    1
}
