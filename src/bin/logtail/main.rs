// SPDX-License-Identifier: Apache-2.0

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio::select;
use tower::BoxError;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use logtail::tailer::{
    Error, FilePositionStore, InitialPosition, StatefulTailer, TailerConfig, TailerListener,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StartAt {
    /// Read the file from its beginning
    Beginning,
    /// Read only content appended after startup
    End,
}

#[derive(Debug, Parser)]
#[command(name = "logtail", about = "Tail a log file with durable checkpoints")]
struct Cli {
    /// File to tail
    #[arg(long, env = "LOGTAIL_FILE")]
    file: PathBuf,

    /// Path of the JSON position store
    #[arg(long, env = "LOGTAIL_POSITIONS", default_value = "logtail-positions.json")]
    positions: PathBuf,

    /// Interval between file polls, in milliseconds
    #[arg(long, env = "LOGTAIL_READ_INTERVAL_MS", default_value = "500")]
    read_interval_ms: u64,

    /// Where to start when no checkpoint matches the file
    #[arg(value_enum, long, env = "LOGTAIL_START_AT", default_value = "beginning")]
    start_at: StartAt,
}

/// Writes each tailed line to stdout and remembers whether the tailer died
/// on a fatal error.
struct StdoutListener {
    failed: Arc<AtomicBool>,
}

impl TailerListener for StdoutListener {
    fn handle_line(&mut self, line: &[u8]) -> Result<(), BoxError> {
        let mut stdout = std::io::stdout().lock();
        stdout.write_all(line)?;
        stdout.write_all(b"\n")?;
        Ok(())
    }

    fn file_not_found(&mut self) {
        info!("file not found; waiting for it to appear");
    }

    fn file_rotated(&mut self) {
        info!("file rotated");
    }

    fn handle_error(&mut self, error: &Error) {
        error!(%error, "tailer failed");
        self.failed.store(true, Ordering::SeqCst);
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let store = match FilePositionStore::open(&cli.positions) {
        Ok(store) => store,
        Err(error) => {
            error!(%error, positions = %cli.positions.display(), "failed to open position store");
            return ExitCode::FAILURE;
        }
    };

    let config = TailerConfig {
        file: cli.file.clone(),
        read_interval: Duration::from_millis(cli.read_interval_ms),
        initial_position: match cli.start_at {
            StartAt::Beginning => InitialPosition::Start,
            StartAt::End => InitialPosition::End,
        },
        ..TailerConfig::default()
    };

    let failed = Arc::new(AtomicBool::new(false));
    let listener = StdoutListener {
        failed: failed.clone(),
    };

    let tailer = match StatefulTailer::new(config, store, listener) {
        Ok(tailer) => tailer,
        Err(error) => {
            error!(%error, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };
    let handle = tailer.handle();

    info!(file = %cli.file.display(), "starting tailer");
    let mut tailer_task = tokio::task::spawn_blocking(move || tailer.run());

    let mut task_done = false;
    select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested");
            handle.stop();
        }
        result = &mut tailer_task => {
            task_done = true;
            if let Err(error) = result {
                error!(%error, "tailer task panicked");
                return ExitCode::FAILURE;
            }
        }
    }

    if !task_done {
        if let Err(error) = tailer_task.await {
            error!(%error, "tailer task panicked");
            return ExitCode::FAILURE;
        }
    }

    info!("tailer stopped");
    if failed.load(Ordering::SeqCst) {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
