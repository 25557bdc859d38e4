//! vigild - surveillance console daemon
//!
//! Drives a session pipeline from the command line:
//! - `live` runs a device feed with detection, optionally recording
//! - `play` plays a saved clip back against the stored timeline
//! - `analyze` runs an offline analysis pass over a clip
//! - `export` / `dates` query the detection event store

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use log::info;

use vigil::session::SessionPipeline;
use vigil::{
    AnalysisOutcome, CancelToken, ConsoleConfig, Detection, Frame, Mode, PipelineError,
    PipelineObserver,
};

#[derive(Parser)]
#[command(name = "vigild", version, about = "surveillance console daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a live session from a device URL until interrupted.
    Live {
        /// Device URL, e.g. stub://cam0?fps=15
        #[arg(long, env = "VIGIL_SOURCE", default_value = "stub://cam0")]
        source: String,
        /// Record the feed while the session runs.
        #[arg(long)]
        record: bool,
        /// Detector strategy to run per frame.
        #[arg(long)]
        detector: Option<String>,
    },
    /// Play a recorded clip back.
    Play {
        /// Clip path or stub:// URL.
        path: String,
    },
    /// Run an offline analysis pass over a clip and print the report.
    Analyze {
        path: String,
        /// Sample every Nth frame.
        #[arg(long)]
        stride: Option<u64>,
    },
    /// Export the detection events as a session report.
    Export,
    /// List dates that have detections.
    Dates,
}

/// Observer that narrates pipeline activity into the log.
struct LogObserver;

impl PipelineObserver for LogObserver {
    fn on_frame(&self, frame: &Frame) {
        log::trace!(
            "frame {} ({}x{})",
            frame.index(),
            frame.width(),
            frame.height()
        );
    }

    fn on_detections(&self, frame_index: u64, detections: &[Detection]) {
        for det in detections {
            info!(
                "frame {}: {} conf={:.2} at ({:.2},{:.2})",
                frame_index, det.label, det.confidence, det.x, det.y
            );
        }
    }

    fn on_mode_changed(&self, mode: Mode) {
        info!("mode: {}", mode.name());
    }

    fn on_error(&self, error: &PipelineError) {
        log::warn!("{}: {}", error.kind(), error);
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let mut config = ConsoleConfig::load()?;

    match cli.command {
        Command::Live {
            source,
            record,
            detector,
        } => {
            if let Some(detector) = detector {
                config.detector.strategy = detector;
            }
            let mut pipeline = SessionPipeline::with_thread_scheduler(config)?;
            pipeline.add_observer(Box::new(LogObserver))?;
            pipeline.start_live(&source)?;
            if record {
                let path = pipeline.start_recording()?;
                info!("recording to {}", path.display());
            }
            wait_for_interrupt()?;
            pipeline.stop()?;
            info!(
                "session over: {} frames, {} events stored",
                pipeline.frames_seen()?,
                pipeline.event_count()?
            );
        }
        Command::Play { path } => {
            let mut pipeline = SessionPipeline::with_thread_scheduler(config)?;
            pipeline.add_observer(Box::new(LogObserver))?;
            pipeline.open_file(&path)?;
            info!("{} timeline marks", pipeline.timeline()?.len());
            pipeline.play()?;
            let interrupted = interrupt_flag()?;
            while pipeline.mode()? != Mode::Idle {
                if interrupted.try_recv().is_ok() {
                    pipeline.stop()?;
                    break;
                }
                thread::sleep(Duration::from_millis(50));
            }
        }
        Command::Analyze { path, stride } => {
            if let Some(stride) = stride {
                config.analysis.stride = stride;
            }
            let mut pipeline = SessionPipeline::with_thread_scheduler(config)?;
            pipeline.add_observer(Box::new(LogObserver))?;
            pipeline.open_file(&path)?;
            let cancel = CancelToken::new();
            let handler_token = cancel.clone();
            ctrlc::set_handler(move || handler_token.cancel())
                .map_err(|e| anyhow!("failed to install interrupt handler: {}", e))?;
            match pipeline.run_analysis(&cancel)? {
                AnalysisOutcome::Completed(report) => {
                    println!("{}", serde_json::to_string_pretty(&report)?);
                }
                AnalysisOutcome::Cancelled => info!("analysis cancelled"),
            }
        }
        Command::Export => {
            let pipeline = SessionPipeline::with_thread_scheduler(config)?;
            let path = pipeline.export_detections()?;
            println!("{}", path.display());
        }
        Command::Dates => {
            let pipeline = SessionPipeline::with_thread_scheduler(config)?;
            for date in pipeline.detection_dates()? {
                println!("{}", date);
            }
        }
    }
    Ok(())
}

fn interrupt_flag() -> Result<mpsc::Receiver<()>> {
    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|e| anyhow!("failed to install interrupt handler: {}", e))?;
    Ok(rx)
}

fn wait_for_interrupt() -> Result<()> {
    let rx = interrupt_flag()?;
    rx.recv()
        .map_err(|_| anyhow!("interrupt channel closed unexpectedly"))?;
    info!("interrupt received, shutting down");
    Ok(())
}
