//! Window capture through Windows.Graphics.Capture.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, instrument, trace, warn};
use windows::core::{factory, IInspectable, Interface};
use windows::Foundation::TypedEventHandler;
use windows::Graphics::Capture::{
    Direct3D11CaptureFramePool, GraphicsCaptureItem, GraphicsCaptureSession,
    IGraphicsCaptureSession2, IGraphicsCaptureSession3,
};
use windows::Graphics::DirectX::DirectXPixelFormat;
use windows::Win32::Foundation::HWND;
use windows::Win32::Graphics::Direct3D11::{ID3D11DeviceContext, ID3D11Texture2D};
use windows::Win32::System::WinRT::Direct3D11::IDirect3DDxgiInterfaceAccess;
use windows::Win32::System::WinRT::Graphics::Capture::IGraphicsCaptureItemInterop;
use windows::Win32::UI::WindowsAndMessaging::IsWindow;

use screenfeed_core::{
    ensure_com_initialized, CaptureConfig, CaptureError, CaptureResult, CaptureSession, Clock,
    Lifecycle, MediaSink, MediaUnit, RunState, SourceKind, SourceSelector, StopBehavior,
};

use crate::converter::GpuColorConverter;
use crate::d3d11::GpuDevice;
use crate::stage::FrameStager;
use crate::FRAME_POOL_BUFFERS;

/// State used from the frame pool's delivery callback.
struct FrameHandler {
    stager: FrameStager,
    converter: GpuColorConverter,
    context: ID3D11DeviceContext,
    clock: Clock,
    sink: Option<MediaSink>,
    frames: u64,
    _gpu: GpuDevice,
}

// SAFETY: the handler is only reached through its mutex, so one delivery
// at a time uses the device context.
unsafe impl Send for FrameHandler {}

impl FrameHandler {
    fn on_frame_arrived(&mut self, pool: &Direct3D11CaptureFramePool) -> CaptureResult<()> {
        let frame = pool.TryGetNextFrame()?;
        let timestamp_ms = self.clock.now_ms();

        let access: IDirect3DDxgiInterfaceAccess = frame.Surface()?.cast()?;
        let texture: ID3D11Texture2D = unsafe { access.GetInterface()? };

        let staged = self.stager.stage(&self.context, &texture);
        let converted = self.converter.convert(&self.context, staged);
        let _ = frame.Close();
        let data = converted?;

        if let Some(sink) = self.sink.as_mut() {
            sink(MediaUnit { data, timestamp_ms });
            self.frames += 1;
            trace!(frames = self.frames, timestamp_ms, "Window frame delivered");
        }
        Ok(())
    }
}

/// Event registrations made at start.
struct Subscriptions {
    frame_arrived: i64,
    closed: i64,
}

/// OS capture objects of an initialized session.
struct WgcCapture {
    item: GraphicsCaptureItem,
    frame_pool: Direct3D11CaptureFramePool,
    session: GraphicsCaptureSession,
    handler: Arc<Mutex<FrameHandler>>,
    subscriptions: Option<Subscriptions>,
}

// SAFETY: the WinRT capture objects are agile; the GPU state they feed is
// behind the handler mutex.
unsafe impl Send for WgcCapture {}

impl WgcCapture {
    fn open(hwnd: HWND, config: &CaptureConfig) -> CaptureResult<Self> {
        let gpu = GpuDevice::new()?;
        let direct3d = gpu.direct3d_device()?;

        let interop = factory::<GraphicsCaptureItem, IGraphicsCaptureItemInterop>()?;
        let item: GraphicsCaptureItem = unsafe { interop.CreateForWindow(hwnd) }.map_err(|e| {
            CaptureError::WindowsApi {
                message: "Failed to create capture item for window".to_string(),
                source: Some(e),
            }
        })?;

        let size = item.Size()?;
        info!(
            native_width = size.Width,
            native_height = size.Height,
            "Window capture item created"
        );

        let target = config.video_target();
        let converter = GpuColorConverter::new(&gpu, target)?;
        debug!(frame_bytes = converter.frame_size(), "Window frames sized");

        let handler = FrameHandler {
            stager: FrameStager::new(&gpu, target)?,
            converter,
            context: gpu.context().clone(),
            clock: Clock::process(),
            sink: None,
            frames: 0,
            _gpu: gpu,
        };

        let frame_pool = Direct3D11CaptureFramePool::CreateFreeThreaded(
            &direct3d,
            DirectXPixelFormat::B8G8R8A8UIntNormalized,
            FRAME_POOL_BUFFERS,
            size,
        )?;
        let session = frame_pool.CreateCaptureSession(&item)?;
        configure_session(&session);

        Ok(Self {
            item,
            frame_pool,
            session,
            handler: Arc::new(Mutex::new(handler)),
            subscriptions: None,
        })
    }

    fn subscribe(&mut self, lifecycle: &Lifecycle) -> CaptureResult<()> {
        let handler = Arc::clone(&self.handler);
        let running = lifecycle.clone();
        let frame_arrived = self.frame_pool.FrameArrived(&TypedEventHandler::new(
            move |pool: &Option<Direct3D11CaptureFramePool>, _: &Option<IInspectable>| {
                if !running.is_running() {
                    return Ok(());
                }
                if let Some(pool) = pool {
                    if let Err(e) = handler.lock().on_frame_arrived(pool) {
                        warn!("Window frame skipped: {}", e);
                    }
                }
                Ok(())
            },
        ))?;

        let closing = lifecycle.clone();
        let closed = match self.item.Closed(&TypedEventHandler::new(
            move |_: &Option<GraphicsCaptureItem>, _: &Option<IInspectable>| {
                if closing.fail() {
                    warn!("Captured window closed, capture ended");
                }
                Ok(())
            },
        )) {
            Ok(token) => token,
            Err(e) => {
                let _ = self.frame_pool.RemoveFrameArrived(frame_arrived);
                return Err(e.into());
            }
        };

        self.subscriptions = Some(Subscriptions {
            frame_arrived,
            closed,
        });
        Ok(())
    }

    fn unsubscribe(&mut self) {
        if let Some(subscriptions) = self.subscriptions.take() {
            let _ = self.frame_pool.RemoveFrameArrived(subscriptions.frame_arrived);
            let _ = self.item.RemoveClosed(subscriptions.closed);
        }
    }

    fn close(mut self) {
        self.unsubscribe();
        if let Err(e) = self.session.Close() {
            debug!("Capture session close failed: {}", e);
        }
        if let Err(e) = self.frame_pool.Close() {
            debug!("Frame pool close failed: {}", e);
        }
    }
}

/// Cursor on, yellow border off. Both need newer Windows builds.
fn configure_session(session: &GraphicsCaptureSession) {
    match session.cast::<IGraphicsCaptureSession2>() {
        Ok(session2) => {
            if let Err(e) = session2.SetIsCursorCaptureEnabled(true) {
                debug!("Cursor capture not enabled: {}", e);
            }
        }
        Err(_) => debug!("Cursor capture option unavailable"),
    }

    match session.cast::<IGraphicsCaptureSession3>() {
        Ok(session3) => {
            if let Err(e) = session3.SetIsBorderRequired(false) {
                debug!("Capture border could not be disabled: {}", e);
            }
        }
        Err(_) => debug!("Capture border option unavailable"),
    }
}

/// Captures one window, driven by OS frame delivery.
///
/// Frames are converted and handed to the sink on the OS callback thread.
/// `stop` only unsubscribes: a delivery already in flight may still reach
/// the sink while or just after `stop` runs.
pub struct WindowCapturer {
    lifecycle: Lifecycle,
    capture: Option<WgcCapture>,
}

impl Default for WindowCapturer {
    fn default() -> Self {
        Self::new()
    }
}

impl WindowCapturer {
    pub fn new() -> Self {
        Self {
            lifecycle: Lifecycle::new(),
            capture: None,
        }
    }

    /// Whether Windows.Graphics.Capture is available on this system.
    pub fn is_supported() -> bool {
        GraphicsCaptureSession::IsSupported().unwrap_or(false)
    }

    fn release(&mut self) {
        if let Some(capture) = self.capture.take() {
            capture.close();
        }
    }
}

impl CaptureSession for WindowCapturer {
    fn kind(&self) -> SourceKind {
        SourceKind::Window
    }

    fn stop_behavior(&self) -> StopBehavior {
        StopBehavior::Unsubscribe
    }

    #[instrument(name = "window_capture_initialize", skip(self, config))]
    fn initialize(&mut self, config: &CaptureConfig) -> CaptureResult<()> {
        if let Some(previous) = self.lifecycle.begin_reinitialize(&mut self.capture)? {
            previous.close();
        }
        config.validate()?;
        let SourceSelector::Window { handle } = config.source else {
            return Err(CaptureError::InvalidConfig(format!(
                "window capture cannot open {:?}",
                config.source
            )));
        };

        ensure_com_initialized()?;
        if !Self::is_supported() {
            return Err(CaptureError::NotSupported);
        }

        let hwnd = HWND(handle as usize as *mut _);
        if !unsafe { IsWindow(hwnd) }.as_bool() {
            return Err(CaptureError::SourceNotFound(format!("window {handle:#x}")));
        }

        self.capture = Some(WgcCapture::open(hwnd, config)?);
        self.lifecycle.mark_initialized();

        info!(
            window = handle,
            width = config.width,
            height = config.height,
            "Window capture initialized"
        );
        Ok(())
    }

    #[instrument(name = "window_capture_start", skip(self, sink))]
    fn start(&mut self, sink: MediaSink) -> CaptureResult<()> {
        self.lifecycle.begin_start()?;

        let Some(capture) = self.capture.as_mut() else {
            self.lifecycle.abort_start();
            return Err(CaptureError::NotInitialized);
        };

        capture.handler.lock().sink = Some(sink);

        let started = capture
            .subscribe(&self.lifecycle)
            .and_then(|()| Ok(capture.session.StartCapture()?));
        if let Err(e) = started {
            capture.unsubscribe();
            capture.handler.lock().sink = None;
            self.lifecycle.abort_start();
            return Err(e);
        }

        info!("Window capture started");
        Ok(())
    }

    #[instrument(name = "window_capture_stop", skip(self))]
    fn stop(&mut self) -> CaptureResult<()> {
        if self.lifecycle.stop() == RunState::Uninitialized {
            return Ok(());
        }

        if self.capture.is_some() {
            self.release();
            info!("Window capture stopped");
        }
        Ok(())
    }

    fn state(&self) -> RunState {
        self.lifecycle.state()
    }
}

impl Drop for WindowCapturer {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
