//! Capture session contract shared by all capturers.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::config::CaptureConfig;
use crate::error::CaptureError;
use crate::CaptureResult;

/// Run state of a capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RunState {
    Uninitialized = 0,
    Initialized = 1,
    Running = 2,
    Stopped = 3,
}

impl RunState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Initialized,
            2 => Self::Running,
            3 => Self::Stopped,
            _ => Self::Uninitialized,
        }
    }
}

/// What `stop()` guarantees when it returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopBehavior {
    /// The worker thread has been joined; the sink will not be called again.
    Quiescent,
    /// The OS callback has been unregistered, but a delivery already in
    /// flight may still reach the sink concurrently with or just after
    /// `stop()`.
    Unsubscribe,
}

/// Kind of source a session captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Display,
    Window,
    SystemAudio,
}

/// One normalized unit handed to the sink.
///
/// For video, `data` is exactly one NV12 frame. For audio, it is one
/// header-tagged packet. The slice borrows a session-owned buffer that is
/// reused for the next unit; copy it to keep it.
#[derive(Debug, Clone, Copy)]
pub struct MediaUnit<'a> {
    pub data: &'a [u8],
    pub timestamp_ms: u64,
}

/// Callback receiving normalized units, invoked on the capture thread.
///
/// A slow sink stalls capture, so sinks should only copy and enqueue.
pub type MediaSink = Box<dyn FnMut(MediaUnit<'_>) + Send + 'static>;

/// A capture source with a uniform lifecycle.
pub trait CaptureSession: Send {
    /// What this session captures.
    fn kind(&self) -> SourceKind;

    /// Shutdown discipline of this session.
    fn stop_behavior(&self) -> StopBehavior;

    /// Negotiate devices and formats. Must succeed before `start`.
    fn initialize(&mut self, config: &CaptureConfig) -> CaptureResult<()>;

    /// Begin delivering units to `sink`.
    fn start(&mut self, sink: MediaSink) -> CaptureResult<()>;

    /// Stop delivering units and release OS capture resources. Safe to call
    /// repeatedly and from any thread that owns the session.
    fn stop(&mut self) -> CaptureResult<()>;

    /// Current run state.
    fn state(&self) -> RunState;

    /// Whether units are still being produced.
    fn is_running(&self) -> bool {
        self.state() == RunState::Running
    }
}

/// Shared, thread-safe run state.
///
/// Clones observe the same state, so a worker thread or OS callback can
/// flag a fatal stream error that the owner sees through `is_running`.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    state: Arc<AtomicU8>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(RunState::Uninitialized as u8)),
        }
    }

    pub fn state(&self) -> RunState {
        RunState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_running(&self) -> bool {
        self.state() == RunState::Running
    }

    /// Enter initialization. Fails while running; otherwise drops back to
    /// `Uninitialized` until [`mark_initialized`](Self::mark_initialized).
    pub fn begin_initialize(&self) -> CaptureResult<()> {
        let current = self.state.load(Ordering::SeqCst);
        if current == RunState::Running as u8 {
            return Err(CaptureError::AlreadyStarted);
        }
        self.state
            .compare_exchange(
                current,
                RunState::Uninitialized as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .map(|_| ())
            .map_err(|_| CaptureError::AlreadyStarted)
    }

    /// [`begin_initialize`](Self::begin_initialize), then hand back the
    /// resources of any previous initialize so the caller releases them
    /// before its own checks can fail. `prepared` is untouched on error.
    pub fn begin_reinitialize<T>(&self, prepared: &mut Option<T>) -> CaptureResult<Option<T>> {
        self.begin_initialize()?;
        Ok(prepared.take())
    }

    pub fn mark_initialized(&self) {
        self.state
            .store(RunState::Initialized as u8, Ordering::SeqCst);
    }

    /// Move `Initialized -> Running`.
    pub fn begin_start(&self) -> CaptureResult<()> {
        match self.state.compare_exchange(
            RunState::Initialized as u8,
            RunState::Running as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) => Ok(()),
            Err(current) if current == RunState::Running as u8 => Err(CaptureError::AlreadyStarted),
            Err(_) => Err(CaptureError::NotInitialized),
        }
    }

    /// Undo [`begin_start`](Self::begin_start) when start failed part way.
    pub fn abort_start(&self) {
        let _ = self.state.compare_exchange(
            RunState::Running as u8,
            RunState::Initialized as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    /// Move to `Stopped` and return the previous state. An uninitialized
    /// session stays uninitialized.
    pub fn stop(&self) -> RunState {
        let previous = self.state();
        if previous != RunState::Uninitialized {
            self.state.store(RunState::Stopped as u8, Ordering::SeqCst);
        }
        previous
    }

    /// Record a fatal stream error from the capture side. Only a running
    /// session is affected; returns whether it was running.
    pub fn fail(&self) -> bool {
        self.state
            .compare_exchange(
                RunState::Running as u8,
                RunState::Stopped as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_start_requires_initialize() {
        let lifecycle = Lifecycle::new();
        assert!(matches!(
            lifecycle.begin_start(),
            Err(CaptureError::NotInitialized)
        ));
        assert_eq!(lifecycle.state(), RunState::Uninitialized);
    }

    #[test]
    fn test_normal_lifecycle() {
        let lifecycle = Lifecycle::new();
        lifecycle.begin_initialize().unwrap();
        lifecycle.mark_initialized();
        lifecycle.begin_start().unwrap();
        assert!(lifecycle.is_running());

        assert!(matches!(
            lifecycle.begin_start(),
            Err(CaptureError::AlreadyStarted)
        ));
        assert!(matches!(
            lifecycle.begin_initialize(),
            Err(CaptureError::AlreadyStarted)
        ));

        assert_eq!(lifecycle.stop(), RunState::Running);
        assert_eq!(lifecycle.stop(), RunState::Stopped);
        assert!(!lifecycle.is_running());

        // Stopped sessions released their resources and must re-initialize.
        assert!(matches!(
            lifecycle.begin_start(),
            Err(CaptureError::NotInitialized)
        ));
        lifecycle.begin_initialize().unwrap();
        lifecycle.mark_initialized();
        assert!(lifecycle.begin_start().is_ok());
    }

    #[test]
    fn test_stop_before_initialize_is_noop() {
        let lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.stop(), RunState::Uninitialized);
        assert_eq!(lifecycle.state(), RunState::Uninitialized);
    }

    #[test]
    fn test_fail_is_visible_through_clones() {
        let lifecycle = Lifecycle::new();
        lifecycle.mark_initialized();
        lifecycle.begin_start().unwrap();

        let worker_view = lifecycle.clone();
        assert!(worker_view.fail());
        assert!(!lifecycle.is_running());
        assert_eq!(lifecycle.state(), RunState::Stopped);

        // A second failure report is ignored.
        assert!(!worker_view.fail());
    }

    #[test]
    fn test_abort_start_returns_to_initialized() {
        let lifecycle = Lifecycle::new();
        lifecycle.mark_initialized();
        lifecycle.begin_start().unwrap();
        lifecycle.abort_start();
        assert_eq!(lifecycle.state(), RunState::Initialized);
    }

    #[test]
    fn test_reinitialize_hands_back_previous_resources() {
        let lifecycle = Lifecycle::new();
        let resource = Arc::new(());
        let mut prepared = Some(Arc::clone(&resource));
        lifecycle.mark_initialized();

        let previous = lifecycle.begin_reinitialize(&mut prepared).unwrap();
        assert!(prepared.is_none());
        assert_eq!(lifecycle.state(), RunState::Uninitialized);
        drop(previous);
        // A check failing after this point leaves nothing behind.
        assert_eq!(Arc::strong_count(&resource), 1);
    }

    #[test]
    fn test_reinitialize_while_running_keeps_resources() {
        let lifecycle = Lifecycle::new();
        let mut prepared = Some(7);
        lifecycle.mark_initialized();
        lifecycle.begin_start().unwrap();

        assert!(matches!(
            lifecycle.begin_reinitialize(&mut prepared),
            Err(CaptureError::AlreadyStarted)
        ));
        assert_eq!(prepared, Some(7));
        assert!(lifecycle.is_running());
    }

    /// Minimal session used to exercise the trait through a box.
    struct CountingSession {
        lifecycle: Lifecycle,
        sink: Option<MediaSink>,
    }

    impl CaptureSession for CountingSession {
        fn kind(&self) -> SourceKind {
            SourceKind::SystemAudio
        }

        fn stop_behavior(&self) -> StopBehavior {
            StopBehavior::Quiescent
        }

        fn initialize(&mut self, config: &CaptureConfig) -> CaptureResult<()> {
            self.lifecycle.begin_initialize()?;
            config.validate()?;
            self.lifecycle.mark_initialized();
            Ok(())
        }

        fn start(&mut self, mut sink: MediaSink) -> CaptureResult<()> {
            self.lifecycle.begin_start()?;
            sink(MediaUnit {
                data: &[1, 2, 3],
                timestamp_ms: 5,
            });
            self.sink = Some(sink);
            Ok(())
        }

        fn stop(&mut self) -> CaptureResult<()> {
            self.lifecycle.stop();
            self.sink = None;
            Ok(())
        }

        fn state(&self) -> RunState {
            self.lifecycle.state()
        }
    }

    #[test]
    fn test_boxed_session_dispatch() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink_received = Arc::clone(&received);

        let mut session: Box<dyn CaptureSession> = Box::new(CountingSession {
            lifecycle: Lifecycle::new(),
            sink: None,
        });

        assert!(session
            .start(Box::new(|_: MediaUnit<'_>| {}))
            .is_err());

        session.initialize(&CaptureConfig::system_audio()).unwrap();
        session
            .start(Box::new(move |unit: MediaUnit<'_>| {
                sink_received
                    .lock()
                    .unwrap()
                    .push((unit.data.to_vec(), unit.timestamp_ms));
            }))
            .unwrap();

        assert!(session.is_running());
        assert_eq!(session.stop_behavior(), StopBehavior::Quiescent);
        session.stop().unwrap();
        session.stop().unwrap();
        assert!(!session.is_running());
        assert_eq!(*received.lock().unwrap(), vec![(vec![1, 2, 3], 5)]);
    }
}
