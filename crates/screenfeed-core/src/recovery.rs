//! Lazy recovery of a duplication handle after device access loss.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::CaptureResult;

/// Outcome of one frame acquisition attempt.
#[derive(Debug)]
pub enum Acquire<F> {
    /// A new frame.
    Frame(F),
    /// Nothing new within the timeout.
    Timeout,
    /// The handle is no longer usable and must be recreated.
    AccessLost,
}

/// An OS facility that hands out frames through a recreatable handle.
pub trait DuplicationSource {
    type Handle;
    type Frame;

    /// Create a fresh handle.
    fn open(&mut self) -> CaptureResult<Self::Handle>;

    /// Wait up to `timeout` for the next frame on `handle`.
    fn acquire(
        &mut self,
        handle: &Self::Handle,
        timeout: Duration,
    ) -> CaptureResult<Acquire<Self::Frame>>;
}

/// Drives a [`DuplicationSource`], dropping the handle on access loss and
/// recreating it on the next attempt.
///
/// Each call to [`next_frame`](Self::next_frame) makes at most one open
/// attempt, so a device that keeps failing degrades into a stream of
/// skipped ticks rather than a tight reopen loop.
pub struct DuplicationDriver<S: DuplicationSource> {
    source: S,
    handle: Option<S::Handle>,
    recreations: u64,
}

impl<S: DuplicationSource> DuplicationDriver<S> {
    /// Wrap a source with an already-open handle.
    pub fn new(source: S, handle: S::Handle) -> Self {
        Self {
            source,
            handle: Some(handle),
            recreations: 0,
        }
    }

    /// Number of times the handle has been recreated.
    pub fn recreations(&self) -> u64 {
        self.recreations
    }

    /// Whether a usable handle is currently held.
    pub fn has_handle(&self) -> bool {
        self.handle.is_some()
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Try to get the next frame. `None` means skip this tick.
    pub fn next_frame(&mut self, timeout: Duration) -> Option<S::Frame> {
        if self.handle.is_none() {
            match self.source.open() {
                Ok(handle) => {
                    self.recreations += 1;
                    info!(recreations = self.recreations, "Duplication handle recreated");
                    self.handle = Some(handle);
                }
                Err(e) => {
                    debug!("Duplication handle recreation failed: {}", e);
                    return None;
                }
            }
        }

        let handle = self.handle.as_ref()?;
        match self.source.acquire(handle, timeout) {
            Ok(Acquire::Frame(frame)) => Some(frame),
            Ok(Acquire::Timeout) => None,
            Ok(Acquire::AccessLost) => {
                warn!("Duplication access lost, handle will be recreated");
                self.handle = None;
                None
            }
            Err(e) => {
                warn!("Frame acquisition failed: {}", e);
                None
            }
        }
    }
}
