use anyhow::Context;
use clap::Parser;
use std::io::BufRead;
use std::path::PathBuf;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::writer::MakeWriterExt;

use deskreel_app::controller::SessionController;
use deskreel_app::session::SessionConfig;

#[derive(Parser, Debug)]
#[command(
    name = "deskreel",
    version,
    about = "Records the primary display and the default microphone, then muxes both into one video"
)]
struct Cli {
    /// Capture cadence in frames per second
    #[arg(long, default_value_t = 30)]
    frame_rate: u32,

    /// Input device name (default input device when omitted)
    #[arg(long)]
    device: Option<String>,

    /// Directory for intermediate artifacts (frames, audio, manifest)
    #[arg(long, default_value = "deskreel-session")]
    work_dir: PathBuf,

    /// Output video path, written when the session stops
    #[arg(long, default_value = "recording.mp4")]
    output: PathBuf,
}

fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    std::fs::create_dir_all("logs")?;
    let file_appender = RollingFileAppender::new(Rotation::DAILY, "logs", "deskreel.log");
    let (non_blocking_file, _guard) = tracing_appender::non_blocking(file_appender);
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr.and(non_blocking_file))
        .with_env_filter(log_level)
        .init();
    std::mem::forget(_guard);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    init_logging().map_err(|e| anyhow::anyhow!("failed to initialize logging: {e}"))?;
    let cli = Cli::parse();

    let config = SessionConfig {
        frame_rate: cli.frame_rate,
        work_dir: cli.work_dir,
        device: cli.device,
    };
    let mut controller = SessionController::new(config)?;
    controller.start().context("failed to start recording")?;

    // Tick counts flow outward once per capture tick; surface them as
    // a once-a-second heartbeat.
    let progress = controller.progress();
    let frame_rate = cli.frame_rate.max(1) as u64;
    std::thread::spawn(move || {
        for ticks in progress.iter() {
            if ticks % frame_rate == 0 {
                tracing::info!(ticks, "capture progress");
            }
        }
    });

    println!("Recording. Commands: p = pause/resume, s = stop and encode, q = abort.");
    let stdin = std::io::stdin();
    let mut abort = false;
    for line in stdin.lock().lines() {
        let line = line.unwrap_or_default();
        match line.trim() {
            "p" => match controller.toggle_pause() {
                Ok(()) => println!("session is now {:?}", controller.state()),
                Err(e) => eprintln!("{e}"),
            },
            "s" => break,
            "q" => {
                abort = true;
                break;
            }
            "" => {}
            other => println!("unknown command: {other}"),
        }
    }

    controller.stop().context("recording failed")?;
    println!(
        "Captured {} frames into {}",
        controller.frames_captured(),
        controller.config().work_dir.display()
    );

    if abort {
        println!("Aborted before encode; intermediate artifacts kept.");
        return Ok(());
    }

    println!("Encoding...");
    let output = controller
        .finalize(&cli.output)
        .context("encode failed; intermediate artifacts kept for inspection")?;
    println!("Wrote {}", output.display());
    Ok(())
}
