//! bowed: bowed string synthesizer host
//!
//! Plays the string live through the default output device (or one named in the
//! config) and reads control commands from stdin. With `--render` it writes a
//! WAV file instead of opening a device.

mod audio;
mod config;
mod console;
mod render;

use anyhow::Result;
use bowed_core::{ModalString, connect};
use clap::Parser;
use crossbeam_channel::RecvTimeoutError;
use parking_lot::Mutex;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use crate::audio::CpalDevice;
use crate::console::{Flow, execute, parse_command};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Bowed string synthesizer
#[derive(Parser)]
#[command(name = "bowed")]
#[command(version)]
struct Cli {
    /// JSON config file; missing fields use defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured sample rate
    #[arg(short = 'r', long)]
    sample_rate: Option<u32>,

    /// Render to this WAV file instead of playing live
    #[arg(long)]
    render: Option<PathBuf>,

    /// Length of the render in seconds
    #[arg(long, default_value = "5")]
    seconds: f32,

    /// Override the device buffer size in frames
    #[arg(long)]
    buffer_size: Option<u32>,

    /// Write the effective config (file plus overrides) to this path and exit
    #[arg(long)]
    save_config: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let mut host_config = config::load_or_default(cli.config.as_deref())?;
    if let Some(rate) = cli.sample_rate {
        host_config.engine.sample_rate = rate;
    }
    if let Some(frames) = cli.buffer_size {
        host_config.device.buffer_size = Some(frames);
    }

    if let Some(path) = &cli.save_config {
        config::save_config(path, &host_config)?;
        println!("Saved config to {}", path.display());
        return Ok(());
    }

    match &cli.render {
        Some(path) => {
            let summary = render::render_to_wav(path, cli.seconds, &host_config.engine)?;
            println!(
                "Wrote {} frames at {} Hz to {}",
                summary.frames,
                summary.sample_rate,
                path.display()
            );
            Ok(())
        }
        None => run_live(host_config),
    }
}

fn run_live(host_config: config::HostConfig) -> Result<()> {
    let mut device = CpalDevice::open(&host_config.device, host_config.engine.sample_rate)?;
    let mut settings = host_config.engine;
    settings.sample_rate = bowed_core::AudioDevice::sample_rate(&device);
    tracing::info!("Output device: {} ({} channels)", device.name(), device.channels());

    let (mut surface, engine) = connect(ModalString::new(settings.sample_rate as f32), &settings)?;
    let engine = Arc::new(Mutex::new(engine));
    device.start(engine.clone())?;

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || running.store(false, Ordering::SeqCst))?;
    }

    // stdin blocks, so it gets its own thread; the main loop keeps polling.
    let (line_tx, line_rx) = crossbeam_channel::unbounded::<String>();
    std::thread::Builder::new()
        .name("bowed-console".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if line_tx.send(line).is_err() {
                    break;
                }
            }
        })?;

    let health = device.health().clone();
    let status_engine = engine.clone();
    let extra_status = move || {
        let snapshot = health.take_snapshot_and_reset();
        format!(
            "audio: {} frames rendered, {} lock misses, {} overruns (max {} us), callback max {} us",
            status_engine.lock().frames_rendered(),
            snapshot.engine_lock_misses,
            snapshot.output_callback_overruns,
            snapshot.output_callback_overrun_max_ns / 1000,
            snapshot.output_callback_duration_max_ns / 1000,
        )
    };

    let mut stdout = std::io::stdout();
    writeln!(stdout, "Type 'help' for commands.")?;

    while running.load(Ordering::SeqCst) {
        match line_rx.recv_timeout(POLL_INTERVAL) {
            Ok(line) => match parse_command(&line) {
                Ok(Some(command)) => {
                    let flow = execute(command, &mut surface, &mut device, &mut stdout, &extra_status)?;
                    if flow == Flow::Quit {
                        break;
                    }
                }
                Ok(None) => {}
                Err(err) => writeln!(stdout, "error: {}", err)?,
            },
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        surface.poll();
        stdout.flush()?;
    }

    tracing::info!("Shutting down");
    Ok(())
}
