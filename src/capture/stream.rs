//! Fixed-interval capture loop.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::convert::PixelBuffer;
use super::sampler::sample_frame;
use super::source::FrameSource;
use super::{Geometry, WireFormat};
use crate::transport::{Channel, SendOutcome};

#[derive(Default)]
struct Counters {
    ticks: AtomicU64,
    conversions: AtomicU64,
    sent: AtomicU64,
    skipped_busy: AtomicU64,
    skipped_no_frame: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub ticks: u64,
    pub conversions: u64,
    pub sent: u64,
    pub skipped_busy: u64,
    pub skipped_no_frame: u64,
    pub dropped: u64,
}

impl fmt::Display for StreamStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ticks {} · sent {} · busy {} · no frame {} · dropped {}",
            self.ticks, self.sent, self.skipped_busy, self.skipped_no_frame, self.dropped
        )
    }
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> StreamStats {
        StreamStats {
            ticks: self.ticks.load(Ordering::Relaxed),
            conversions: self.conversions.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            skipped_busy: self.skipped_busy.load(Ordering::Relaxed),
            skipped_no_frame: self.skipped_no_frame.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// No frame, or nothing to sample at this geometry
    NoFrame,
    /// The channel would not take a send, so nothing was converted
    Busy,
    Sent,
    Dropped,
}

/// Everything one capture tick needs.
struct Pipeline {
    source: Arc<dyn FrameSource>,
    geometry: Geometry,
    buffer: PixelBuffer,
    counters: Arc<Counters>,
}

impl Pipeline {
    fn tick(&mut self, channel: &Channel) -> TickOutcome {
        Counters::bump(&self.counters.ticks);

        let Some(frame) = self.source.latest() else {
            Counters::bump(&self.counters.skipped_no_frame);
            return TickOutcome::NoFrame;
        };
        if !channel.accepting() {
            Counters::bump(&self.counters.skipped_busy);
            return TickOutcome::Busy;
        }
        let Some(sampled) = sample_frame(&frame, self.geometry, self.buffer.format()) else {
            Counters::bump(&self.counters.skipped_no_frame);
            return TickOutcome::NoFrame;
        };

        Counters::bump(&self.counters.conversions);
        if let Err(e) = self.buffer.fill_from_rgba(sampled.as_raw()) {
            warn!(error = %e, "frame conversion failed");
            Counters::bump(&self.counters.skipped_no_frame);
            return TickOutcome::NoFrame;
        }

        match channel.send(self.buffer.to_vec()) {
            SendOutcome::Dispatched => {
                Counters::bump(&self.counters.sent);
                TickOutcome::Sent
            }
            SendOutcome::Dropped => {
                Counters::bump(&self.counters.dropped);
                TickOutcome::Dropped
            }
        }
    }
}

/// Owns the timer task. Stopping cancels the timer only; sends already
/// dispatched run to completion and still release their slot.
pub struct CaptureStream {
    period: Duration,
    task: Option<JoinHandle<()>>,
    counters: Arc<Counters>,
}

impl CaptureStream {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            task: None,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    pub fn stats(&self) -> StreamStats {
        self.counters.snapshot()
    }

    /// First tick fires one period after start.
    pub fn start(
        &mut self,
        source: Arc<dyn FrameSource>,
        geometry: Geometry,
        format: WireFormat,
        channel: watch::Receiver<Arc<Channel>>,
    ) {
        if self.task.is_some() {
            return;
        }

        let mut pipeline = Pipeline {
            source,
            geometry,
            buffer: PixelBuffer::new(format),
            counters: self.counters.clone(),
        };
        let period = self.period;
        info!(?period, %format, width = geometry.width, height = geometry.height, "capture stream started");

        self.task = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let current = channel.borrow().clone();
                let outcome = pipeline.tick(&current);
                debug!(?outcome, "capture tick");
            }
        }));
    }

    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let stats = self.stats();
            info!(
                ticks = stats.ticks,
                sent = stats.sent,
                skipped_busy = stats.skipped_busy,
                skipped_no_frame = stats.skipped_no_frame,
                dropped = stats.dropped,
                "capture stream stopped"
            );
        }
    }
}

impl Drop for CaptureStream {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
