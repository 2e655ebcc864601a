//! Fixed-cadence capture loop on a dedicated thread

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use tracing::{debug, error, info, instrument, warn};

use crate::capture::platform::Platform;
use crate::capture::session::{Acquired, CaptureSession, Frame};
use crate::error::{CaptureError, Result};
use crate::pipeline::double_buffer::DoubleBuffer;
use crate::pipeline::extract::{ColorPipeline, ColorReport, FrameSnapshot};
use crate::sink::ColorSink;
use crate::{CaptureConfig, Config};

/// Requests the capture loop to stop
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: Sender<()>,
}

impl StopHandle {
    pub fn stop(&self) {
        // a full channel already carries a stop request
        let _ = self.tx.try_send(());
    }
}

/// Receiving side of [`StopHandle`]
///
/// Dropping every handle also counts as a stop request.
#[derive(Debug)]
pub struct StopSignal {
    rx: Receiver<()>,
    stopped: bool,
}

impl StopSignal {
    pub fn is_stopped(&mut self) -> bool {
        if !self.stopped {
            match self.rx.try_recv() {
                Ok(()) | Err(TryRecvError::Disconnected) => self.stopped = true,
                Err(TryRecvError::Empty) => {}
            }
        }
        self.stopped
    }

    /// Sleep for `period` or until stopped; returns whether the loop should stop
    pub fn wait(&mut self, period: Duration) -> bool {
        if !self.stopped {
            match self.rx.recv_timeout(period) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => self.stopped = true,
                Err(RecvTimeoutError::Timeout) => {}
            }
        }
        self.stopped
    }
}

pub fn stop_channel() -> (StopHandle, StopSignal) {
    let (tx, rx) = channel::bounded(1);
    (StopHandle { tx }, StopSignal { rx, stopped: false })
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    /// Frames acquired and analysed
    pub frames: u64,
    pub timeouts: u64,
    /// Frames that produced no samples
    pub degenerate: u64,
    pub reopens: u64,
}

/// Handle to a spawned capture thread
pub struct CaptureHandle {
    stop: StopHandle,
    thread: JoinHandle<Result<LoopStats>>,
}

impl CaptureHandle {
    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn stopper(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Wait for the loop to end and return its outcome
    pub fn join(self) -> Result<LoopStats> {
        self.thread.join().map_err(|_| CaptureError::ThreadPanicked)?
    }
}

/// Drives capture sessions at a fixed cadence and feeds the sinks
///
/// Every cycle acquires at most one frame, analyses it, releases it and then sleeps
/// `1000 / fps` milliseconds. Access-lost failures re-open the session up to
/// `max_reopen_attempts` times in a row; any other failure ends the loop.
pub struct CaptureLoop<P: Platform> {
    platform: P,
    capture: CaptureConfig,
    pipeline: ColorPipeline,
    sinks: Vec<Arc<dyn ColorSink>>,
    snapshots: Option<DoubleBuffer<FrameSnapshot>>,
    spare: Option<FrameSnapshot>,
    stats: LoopStats,
}

impl<P: Platform> CaptureLoop<P> {
    pub fn new(platform: P, config: &Config, sinks: Vec<Arc<dyn ColorSink>>) -> Result<Self> {
        config.validate()?;
        let pipeline = ColorPipeline::from_config(&config.sampling, &config.color)?;

        Ok(Self {
            platform,
            capture: config.capture.clone(),
            pipeline,
            sinks,
            snapshots: config.pipeline.keep_snapshot.then(DoubleBuffer::new),
            spare: None,
            stats: LoopStats::default(),
        })
    }

    pub fn stats(&self) -> LoopStats {
        self.stats
    }

    pub fn pipeline(&self) -> &ColorPipeline {
        &self.pipeline
    }

    /// Snapshot of the last analysed frame, when snapshots are enabled
    pub fn latest_snapshot(&self) -> Option<&FrameSnapshot> {
        self.snapshots.as_ref().and_then(DoubleBuffer::published)
    }

    pub fn open_session(&self) -> Result<CaptureSession<P::Duplication>> {
        CaptureSession::open(&self.platform, self.capture.target())
    }

    /// Run one acquire / analyse / release cycle without sleeping
    ///
    /// Returns `Ok(None)` on timeout or when the frame produced no samples.
    pub fn step(
        &mut self,
        session: &mut CaptureSession<P::Duplication>,
    ) -> Result<Option<ColorReport>> {
        let frame = match session.acquire_frame(self.capture.acquire_timeout())? {
            Acquired::Frame(frame) => frame,
            Acquired::Timeout => {
                self.stats.timeouts += 1;
                metrics::counter!("ambiglow_timeouts_total").increment(1);
                return Ok(None);
            }
        };

        let started = Instant::now();
        let analysed = self.analyse(&frame);
        let released = frame.release();

        let report = match (analysed, released) {
            (Ok(report), Ok(())) => report,
            (Ok(_), Err(e)) => return Err(e),
            (Err(e), released) => {
                if let Err(re) = released {
                    warn!(error = %re, "release failed after analysis error");
                }
                return Err(e);
            }
        };

        metrics::histogram!("ambiglow_analysis_time_us")
            .record(started.elapsed().as_micros() as f64);
        metrics::counter!("ambiglow_frames_total").increment(1);
        self.stats.frames += 1;

        match &report {
            Some(report) => {
                debug!(
                    frame = self.stats.frames,
                    samples = report.samples,
                    r = report.output.r,
                    g = report.output.g,
                    b = report.output.b,
                    "color extracted"
                );
                for sink in &self.sinks {
                    sink.set_color(report.output);
                }
            }
            None => {
                self.stats.degenerate += 1;
                debug!(frame = self.stats.frames, "no pixels sampled");
            }
        }

        Ok(report)
    }

    fn analyse(&mut self, frame: &Frame<'_, P::Duplication>) -> Result<Option<ColorReport>> {
        let view = frame.view()?;
        let report = self.pipeline.process(&view);

        if let Some(buffers) = &mut self.snapshots {
            let mut snapshot = self.spare.take().unwrap_or_default();
            snapshot.capture(self.stats.frames + 1, self.pipeline.sampler(), &view);
            self.spare = buffers.publish(snapshot);
        }

        Ok(report)
    }

    /// Loop until stopped or a fatal error
    #[instrument(skip_all, fields(adapter = self.capture.adapter, output = self.capture.output))]
    pub fn run(&mut self, stop: &mut StopSignal) -> Result<LoopStats> {
        let period = self.capture.frame_period();
        let mut session: Option<CaptureSession<P::Duplication>> = None;
        let mut attempts = 0u32;

        info!(period_ms = period.as_millis() as u64, "capture loop started");

        loop {
            if stop.is_stopped() {
                break;
            }

            let mut current = match session.take() {
                Some(s) => s,
                None => match self.open_session() {
                    Ok(s) => s,
                    Err(e) => {
                        if self.recover(e, &mut attempts, stop)? {
                            break;
                        }
                        continue;
                    }
                },
            };

            match self.step(&mut current) {
                Ok(_) => {
                    attempts = 0;
                    session = Some(current);
                }
                Err(e) => {
                    current.close();
                    if self.recover(e, &mut attempts, stop)? {
                        break;
                    }
                    continue;
                }
            }

            if stop.wait(period) {
                break;
            }
        }

        if let Some(s) = session {
            s.close();
        }
        info!(
            frames = self.stats.frames,
            timeouts = self.stats.timeouts,
            reopens = self.stats.reopens,
            "capture loop stopped"
        );
        Ok(self.stats)
    }

    /// Decide whether to retry after `err`; `Ok(true)` means stop was requested meanwhile
    fn recover(
        &mut self,
        err: CaptureError,
        attempts: &mut u32,
        stop: &mut StopSignal,
    ) -> Result<bool> {
        if !err.is_transient() || *attempts >= self.capture.max_reopen_attempts {
            error!(error = %err, "capture loop failed");
            return Err(err);
        }

        *attempts += 1;
        self.stats.reopens += 1;
        metrics::counter!("ambiglow_reopens_total").increment(1);
        warn!(error = %err, attempt = *attempts, "capture session lost, reopening");

        Ok(stop.wait(self.capture.reopen_delay()))
    }

    /// Run on a dedicated thread
    pub fn spawn(mut self) -> std::io::Result<CaptureHandle>
    where
        P: Send + 'static,
    {
        let (stop, mut signal) = stop_channel();
        let core = self.capture.pin_core;

        let thread = std::thread::Builder::new()
            .name("ambiglow-capture".into())
            .spawn(move || {
                if let Some(id) = core {
                    if !core_affinity::set_for_current(core_affinity::CoreId { id }) {
                        warn!(core = id, "failed to pin capture thread");
                    }
                }
                self.run(&mut signal)
            })?;

        Ok(CaptureHandle { stop, thread })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_signal_latches() {
        let (handle, mut signal) = stop_channel();
        assert!(!signal.is_stopped());
        assert!(!signal.wait(Duration::from_millis(1)));

        handle.stop();
        handle.stop();
        assert!(signal.is_stopped());
        assert!(signal.is_stopped());
        assert!(signal.wait(Duration::from_secs(60)));
    }

    #[test]
    fn dropped_handle_stops() {
        let (handle, mut signal) = stop_channel();
        drop(handle);
        assert!(signal.wait(Duration::from_secs(60)));
    }

    #[test]
    fn wait_returns_early_on_stop() {
        let (handle, mut signal) = stop_channel();
        let t = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            handle.stop();
        });
        let started = Instant::now();
        assert!(signal.wait(Duration::from_secs(30)));
        assert!(started.elapsed() < Duration::from_secs(30));
        t.join().unwrap();
    }
}
