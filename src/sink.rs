//! Color consumers
//!
//! Sinks are called from the capture thread and must not block; anything bound to
//! another thread (a window, a device SDK) marshals on its own side.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use flume::{Receiver, Sender, TrySendError};
use tracing::{debug, trace};

use crate::color::pixel::PixelColor;

pub trait ColorSink: Send + Sync {
    fn set_color(&self, color: PixelColor);

    fn name(&self) -> &str {
        "sink"
    }
}

/// Latest color for a UI thread to poll
#[derive(Debug, Default)]
pub struct PreviewSink {
    latest: ArcSwapOption<PixelColor>,
    updates: AtomicU64,
}

impl PreviewSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self) -> Option<PixelColor> {
        self.latest.load().as_deref().copied()
    }

    pub fn updates(&self) -> u64 {
        self.updates.load(Ordering::Relaxed)
    }
}

impl ColorSink for PreviewSink {
    fn set_color(&self, color: PixelColor) {
        self.latest.store(Some(Arc::new(color)));
        self.updates.fetch_add(1, Ordering::Relaxed);
    }

    fn name(&self) -> &str {
        "preview"
    }
}

/// Forwards colors over a bounded channel, dropping them when the receiver lags
#[derive(Debug)]
pub struct ChannelSink {
    tx: Sender<PixelColor>,
    dropped: AtomicU64,
}

impl ChannelSink {
    pub fn bounded(capacity: usize) -> (Self, Receiver<PixelColor>) {
        let (tx, rx) = flume::bounded(capacity.max(1));
        (
            Self {
                tx,
                dropped: AtomicU64::new(0),
            },
            rx,
        )
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl ColorSink for ChannelSink {
    fn set_color(&self, color: PixelColor) {
        match self.tx.try_send(color) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                trace!("sink channel full, color dropped");
            }
            Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                trace!("sink receiver gone");
            }
        }
    }

    fn name(&self) -> &str {
        "channel"
    }
}

/// Logs every color with a running frame counter
#[derive(Debug, Default)]
pub struct LogSink {
    frames: AtomicU64,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ColorSink for LogSink {
    fn set_color(&self, color: PixelColor) {
        let frame = self.frames.fetch_add(1, Ordering::Relaxed);
        debug!(frame, r = color.r, g = color.g, b = color.b, "color");
    }

    fn name(&self) -> &str {
        "log"
    }
}
