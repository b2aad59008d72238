mod cli;
mod config;
mod decoder;
mod error;
mod pipeline;
mod protocol;
mod render;
mod replay;
mod stream;
mod transport;
mod viewer;

use std::sync::mpsc as std_mpsc;
use std::thread;

use anyhow::{Context, Result};
use cli::{Cli, Commands, DisplayArgs};
use config::{expand_path, SessionConfig};
use decoder::platform::PlatformBackends;
use pipeline::{Session, SessionHandle, SessionMode};
use protocol::{InitParams, WorkerCommand, WorkerEvent};
use render::{HeadlessSurface, TerminalSurface};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Recorded units to push through an offline session
struct Recording {
    units: Vec<Vec<u8>>,
    fps: u32,
}

fn main() -> Result<()> {
    let cli = Cli::parse_args();
    let display = cli.command.display().clone();
    init_logging(&display)?;

    let config = cli.command.session_config();
    let (mode, recording) = match &cli.command {
        Commands::Connect { .. } => (SessionMode::Network, None),
        Commands::Replay { file, fps, .. } => {
            let units = replay::load_units(&expand_path(file))?;
            (SessionMode::Offline, Some(Recording { units, fps: *fps }))
        }
    };

    if display.headless {
        run_headless(config, mode, recording)
    } else {
        run_viewer(config, mode, recording, &display)
    }
}

/// Logs go to stderr in headless mode (stdout carries events) and to a file
/// while the viewer owns the terminal.
fn init_logging(display: &DisplayArgs) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if display.headless {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        let path = expand_path(&display.log_file);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open log file {}", path.display()))?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(std::sync::Mutex::new(file))
            .init();
    }
    Ok(())
}

fn init_command(config: &SessionConfig) -> WorkerCommand {
    WorkerCommand::Init(InitParams {
        port: config.port,
        app_version: config.app_version,
        broadway: config.force_software,
        width: config.geometry.width,
        height: config.geometry.height,
    })
}

/// Push the recording, then wait for the queue to settle and stop the session.
async fn play(handle: SessionHandle, recording: Recording) {
    let pictures = replay::feed(&handle, recording.units, recording.fps).await;
    info!(pictures, "replay finished");
    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
    handle.shutdown();
}

fn run_headless(
    config: SessionConfig,
    mode: SessionMode,
    recording: Option<Recording>,
) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build session runtime")?;
    runtime.block_on(headless(config, mode, recording));
    Ok(())
}

/// JSON-lines commands on stdin, JSON-lines events on stdout.
async fn headless(config: SessionConfig, mode: SessionMode, recording: Option<Recording>) {
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let init = init_command(&config);
    let (session, handle) = Session::new(
        config,
        mode,
        HeadlessSurface::default(),
        Box::new(PlatformBackends),
        events_tx,
    );

    tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(event) = events_rx.recv().await {
            let line = match serde_json::to_string(&event) {
                Ok(line) => line,
                Err(e) => {
                    error!(error = %e, "failed to encode worker event");
                    continue;
                }
            };
            if stdout.write_all(format!("{}\n", line).as_bytes()).await.is_err() {
                break;
            }
            let _ = stdout.flush().await;
        }
    });

    handle.command(init);

    match recording {
        Some(recording) => {
            tokio::spawn(play(handle, recording));
        }
        None => {
            tokio::spawn(read_commands(handle));
        }
    }

    session.run().await;
}

async fn read_commands(handle: SessionHandle) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => {}
            Ok(Some(line)) => match WorkerCommand::parse_line(&line) {
                Ok(command) => {
                    if !handle.command(command) {
                        break;
                    }
                }
                Err(e) => warn!(error = %e, "ignoring malformed command"),
            },
            Ok(None) => {
                info!("stdin closed, shutting down");
                handle.shutdown();
                break;
            }
            Err(e) => {
                error!(error = %e, "failed to read stdin");
                handle.shutdown();
                break;
            }
        }
    }
}

/// Session on its own thread, viewer on this one.
fn run_viewer(
    config: SessionConfig,
    mode: SessionMode,
    recording: Option<Recording>,
    display: &DisplayArgs,
) -> Result<()> {
    // Query the terminal before raw mode
    let picker = viewer::create_picker(display.graphics.as_deref());
    let night = config.night;
    let init = init_command(&config);

    let (surface, frames) = TerminalSurface::new();
    let (events_tx, events_rx) = mpsc::unbounded_channel::<WorkerEvent>();
    let (handle_tx, handle_rx) = std_mpsc::channel();

    let worker = thread::Builder::new()
        .name("session".into())
        .spawn(move || -> Result<()> {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .context("Failed to build session runtime")?;
            runtime.block_on(async move {
                let (session, handle) =
                    Session::new(config, mode, surface, Box::new(PlatformBackends), events_tx);
                handle.command(init);
                if let Some(recording) = recording {
                    tokio::spawn(play(handle.clone(), recording));
                }
                let _ = handle_tx.send(handle);
                session.run().await;
            });
            Ok(())
        })
        .context("Failed to spawn session thread")?;

    let handle = handle_rx
        .recv()
        .context("Session thread exited before starting")?;

    let mut viewer = viewer::Viewer::new(picker, frames, events_rx, handle.clone(), night);
    let result = viewer.run();

    handle.shutdown();
    match worker.join() {
        Ok(session_result) => session_result?,
        Err(_) => anyhow::bail!("Session thread panicked"),
    }
    result
}
