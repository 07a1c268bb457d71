//! Sensor Capture Loop

use crate::config::CaptureConfig;
use crate::error::CaptureResult;
use elm_obd::{
    DiagnosticCodeReader, DtcEntry, MonitorStatus, ObdError, SensorReader, SensorReading,
    SensorRegistry, SerialTransport, Session, SharedSink, SupportedSensors, Transport,
};
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::io::Write;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// One pass over every supported sensor
#[derive(Debug, Clone, Serialize)]
pub struct CaptureFrame {
    /// Wall-clock time the pass started (ms since Unix epoch)
    pub timestamp_ms: u64,
    pub readings: Vec<SensorReading>,
}

impl fmt::Display for CaptureFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.timestamp_ms)?;
        for r in &self.readings {
            writeln!(f, "{} = {} {}", r.name, r.reading, r.unit)?;
        }
        Ok(())
    }
}

/// Capture statistics
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CaptureStats {
    pub frames_sent: u64,
    /// Frames discarded because the receiver lagged
    pub frames_dropped: u64,
    /// Sensor reads skipped on a decode error
    pub decode_errors: u64,
}

/// Periodic capture over one connected session
pub struct Capture<T: Transport = SerialTransport> {
    session: Session<T>,
    registry: SensorRegistry,
    sensors: Option<SupportedSensors>,
    poll_interval: Duration,
    stats: CaptureStats,
}

impl Capture<SerialTransport> {
    /// Connect to the first port whose adapter completes the handshake.
    pub async fn connect(config: &CaptureConfig, sink: Option<SharedSink>) -> CaptureResult<Self> {
        let session =
            Session::connect_any(&config.ports, &config.serial, config.session.clone(), sink)
                .await?;
        info!(
            "Connected to {} ({})",
            session.transport().name(),
            session.version()
        );
        Ok(Self::new(
            session,
            SensorRegistry::standard(),
            config.poll_interval(),
        ))
    }
}

impl<T: Transport> Capture<T> {
    pub fn new(session: Session<T>, registry: SensorRegistry, poll_interval: Duration) -> Self {
        Self {
            session,
            registry,
            sensors: None,
            poll_interval,
            stats: CaptureStats::default(),
        }
    }

    /// Query the supported-PID bitmap and remember the result.
    pub async fn discover(&mut self) -> CaptureResult<&SupportedSensors> {
        let found = SensorReader::new(&mut self.session, &self.registry)
            .supported_sensors()
            .await?;
        for sensor in &found.supported {
            debug!(
                "supported sensor index = {} {}",
                sensor.index, sensor.short_name
            );
        }
        info!(
            "{} supported sensors, {} unsupported",
            found.supported.len(),
            found.unsupported.len()
        );
        Ok(&*self.sensors.insert(found))
    }

    /// Result of the last discovery, if any
    pub fn supported(&self) -> Option<&SupportedSensors> {
        self.sensors.as_ref()
    }

    /// Read every supported sensor once, discovering them first if needed.
    ///
    /// A sensor whose payload fails to decode is left out of the frame;
    /// any other error ends the capture.
    pub async fn capture_once(&mut self) -> CaptureResult<CaptureFrame> {
        if self.sensors.is_none() {
            self.discover().await?;
        }
        let descriptors = self
            .sensors
            .as_ref()
            .map(|s| s.supported.clone())
            .unwrap_or_default();

        let timestamp_ms = now_ms();
        let mut reader = SensorReader::new(&mut self.session, &self.registry);
        let mut readings = Vec::with_capacity(descriptors.len());

        for descriptor in &descriptors {
            match reader.sensor_value(descriptor).await {
                Ok(reading) => readings.push(SensorReading {
                    index: descriptor.index,
                    name: descriptor.name,
                    reading,
                    unit: descriptor.unit,
                }),
                Err(ObdError::Decode(msg)) => {
                    self.stats.decode_errors += 1;
                    warn!("Skipping {}: {}", descriptor.name, msg);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(CaptureFrame {
            timestamp_ms,
            readings,
        })
    }

    /// Capture a frame every poll interval until `shutdown` turns true, the
    /// sender side of `shutdown` is dropped, or the frame receiver goes away.
    ///
    /// Frames are sent without waiting; a full channel drops the frame. The
    /// session is closed when the loop ends, including on error.
    pub async fn run(
        &mut self,
        frame_tx: mpsc::Sender<CaptureFrame>,
        shutdown: watch::Receiver<bool>,
    ) -> CaptureResult<()> {
        info!("Starting capture every {:?}", self.poll_interval);
        let result = self.poll(frame_tx, shutdown).await;
        self.session.close().await;
        info!(
            "Capture stopped ({} frames sent, {} dropped)",
            self.stats.frames_sent, self.stats.frames_dropped
        );
        result
    }

    async fn poll(
        &mut self,
        frame_tx: mpsc::Sender<CaptureFrame>,
        mut shutdown: watch::Receiver<bool>,
    ) -> CaptureResult<()> {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            // Only the wait is raced against shutdown; a transaction is
            // never cancelled halfway.
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
            if *shutdown.borrow() {
                break;
            }

            let frame = self.capture_once().await?;
            match frame_tx.try_send(frame) {
                Ok(()) => self.stats.frames_sent += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.stats.frames_dropped += 1;
                    warn!("Frame receiver lagging, frame dropped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    info!("Frame receiver closed");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Log one sensor as a time series.
    ///
    /// Writes a `Time\t<name>(<unit>)` header, then one
    /// `<seconds since start>,\t<value>` line per sample, flushed as it is
    /// written. Runs for `samples` reads, or until `shutdown` turns true when
    /// `samples` is `None`. Returns the number of samples written.
    pub async fn log_sensor<W: Write>(
        &mut self,
        index: u8,
        mut writer: W,
        samples: Option<usize>,
        shutdown: &watch::Receiver<bool>,
    ) -> CaptureResult<usize> {
        let descriptor = *self
            .registry
            .get(index)
            .ok_or(ObdError::UnknownSensor(index))?;

        writeln!(writer, "Time\t{}({})", descriptor.name, descriptor.unit)?;
        writer.flush()?;

        let start = Instant::now();
        let mut reader = SensorReader::new(&mut self.session, &self.registry);
        let mut written = 0;

        while samples.map_or(true, |n| written < n) && !*shutdown.borrow() {
            let reading = reader.sensor_value(&descriptor).await?;
            writeln!(
                writer,
                "{:.6},\t{}",
                start.elapsed().as_secs_f64(),
                reading
            )?;
            writer.flush()?;
            written += 1;
        }

        debug!("Logged {} samples of {}", written, descriptor.name);
        Ok(written)
    }

    /// Stored and freeze-frame trouble codes
    pub async fn read_codes(&mut self) -> CaptureResult<Vec<DtcEntry>> {
        Ok(DiagnosticCodeReader::new(&mut self.session)
            .stored_codes()
            .await?)
    }

    pub async fn monitor_status(&mut self) -> CaptureResult<MonitorStatus> {
        Ok(DiagnosticCodeReader::new(&mut self.session)
            .monitor_status()
            .await?)
    }

    /// Clear trouble codes, returning the adapter's acknowledgement
    pub async fn clear_codes(&mut self) -> CaptureResult<String> {
        Ok(DiagnosticCodeReader::new(&mut self.session)
            .clear_codes()
            .await?)
    }

    pub fn stats(&self) -> CaptureStats {
        self.stats
    }

    pub fn session(&self) -> &Session<T> {
        &self.session
    }

    pub async fn close(&mut self) {
        self.session.close().await;
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Run `work` unless `shutdown` turns true first.
///
/// Returns `None` when stopped, dropping `work` at its current await point.
/// A dropped shutdown sender never stops the work.
pub async fn unless_stopped<F: Future>(
    work: F,
    shutdown: &watch::Receiver<bool>,
) -> Option<F::Output> {
    let mut shutdown = shutdown.clone();
    let stopped = async move {
        if shutdown.wait_for(|stop| *stop).await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        biased;
        _ = stopped => None,
        output = work => Some(output),
    }
}
