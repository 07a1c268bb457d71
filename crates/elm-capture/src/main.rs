//! ELM327 capture - main entry point
//!
//! Usage:
//!   elm-capture [config.toml]
//!
//! Capture frames and trouble codes are printed to stdout as JSON lines;
//! logs go to stderr. Ctrl-C stops the capture and resets the adapter.

use anyhow::Context;
use elm_capture::{init_logging, unless_stopped, Capture, CaptureConfig, CaptureFrame};
use std::io::Write;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let path = CaptureConfig::path_from_args(std::env::args());
    let config = CaptureConfig::load(path.as_deref()).context("Failed to load configuration")?;
    init_logging(&config.log_level, config.log_json).context("Failed to install logger")?;

    info!("=== elm-capture v{} ===", env!("CARGO_PKG_VERSION"));

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, stopping");
            let _ = stop_tx.send(true);
        }
    });

    // Port probing can take seconds per candidate; Ctrl-C must still end it.
    let mut capture = match unless_stopped(Capture::connect(&config, None), &stop_rx).await {
        Some(connected) => connected.context("No ELM327 adapter found")?,
        None => {
            info!("Stopped before an adapter was found");
            return Ok(());
        }
    };

    if config.read_codes_on_start {
        match unless_stopped(capture.read_codes(), &stop_rx).await {
            Some(Ok(codes)) => print_json_line(&serde_json::json!({ "codes": codes }))?,
            Some(Err(e)) => warn!("Reading trouble codes failed: {}", e),
            None => {
                capture.close().await;
                return Ok(());
            }
        }
    }

    if let Some(log) = &config.log_sensor {
        let file = std::fs::File::create(&log.path)
            .with_context(|| format!("Cannot create log file {}", log.path.display()))?;
        let written = capture
            .log_sensor(log.index, std::io::BufWriter::new(file), log.samples, &stop_rx)
            .await;
        capture.close().await;
        let written = written?;
        info!("Wrote {} samples to {}", written, log.path.display());
        return Ok(());
    }

    let (frame_tx, mut frame_rx) = mpsc::channel::<CaptureFrame>(16);
    let printer = tokio::spawn(async move {
        while let Some(frame) = frame_rx.recv().await {
            if let Err(e) = print_json_line(&frame) {
                error!("Writing frame failed: {}", e);
            }
        }
    });

    let result = capture.run(frame_tx, stop_rx).await;
    printer.await.context("Frame printer panicked")?;
    result?;

    Ok(())
}

fn print_json_line<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    let line = serde_json::to_string(value)?;
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{}", line)?;
    stdout.flush()?;
    Ok(())
}
