//! Display capture through DXGI desktop duplication.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, instrument, trace, warn};
use windows::core::{Interface, HRESULT};
use windows::Win32::Foundation::E_ACCESSDENIED;
use windows::Win32::Graphics::Direct3D11::{ID3D11Device, ID3D11DeviceContext, ID3D11Texture2D};
use windows::Win32::Graphics::Dxgi::{
    IDXGIOutput1, IDXGIOutputDuplication, IDXGIResource, DXGI_ERROR_ACCESS_LOST,
    DXGI_ERROR_NOT_CURRENTLY_AVAILABLE, DXGI_ERROR_NOT_FOUND, DXGI_ERROR_WAIT_TIMEOUT,
    DXGI_OUTDUPL_FRAME_INFO,
};

use screenfeed_core::{
    Acquire, CaptureConfig, CaptureError, CaptureResult, CaptureSession, Clock, CropRegion,
    DuplicationDriver, DuplicationSource, FramePacer, Lifecycle, MediaSink, MediaUnit, RunState,
    SourceKind, SourceSelector, StopBehavior,
};

use crate::converter::GpuColorConverter;
use crate::d3d11::GpuDevice;
use crate::stage::FrameStager;
use crate::ACQUIRE_TIMEOUT;

/// Log text for a failed `DuplicateOutput`.
fn duplication_failure(code: HRESULT) -> &'static str {
    if code == DXGI_ERROR_NOT_CURRENTLY_AVAILABLE {
        "Desktop duplication not available (too many applications using it, or a remote session)"
    } else if code == E_ACCESSDENIED {
        "Access denied to desktop duplication"
    } else {
        "DuplicateOutput failed"
    }
}

/// One display output and the texture its frames are staged into.
struct DxgiDuplication {
    output: IDXGIOutput1,
    device: ID3D11Device,
    context: ID3D11DeviceContext,
    stager: FrameStager,
}

impl DuplicationSource for DxgiDuplication {
    type Handle = IDXGIOutputDuplication;
    type Frame = ID3D11Texture2D;

    fn open(&mut self) -> CaptureResult<IDXGIOutputDuplication> {
        unsafe { self.output.DuplicateOutput(&self.device) }.map_err(|e| {
            warn!(hr = ?e.code(), "{}", duplication_failure(e.code()));
            e.into()
        })
    }

    fn acquire(
        &mut self,
        handle: &IDXGIOutputDuplication,
        timeout: Duration,
    ) -> CaptureResult<Acquire<ID3D11Texture2D>> {
        let mut info = DXGI_OUTDUPL_FRAME_INFO::default();
        let mut resource: Option<IDXGIResource> = None;

        let acquired =
            unsafe { handle.AcquireNextFrame(timeout.as_millis() as u32, &mut info, &mut resource) };
        match acquired {
            Ok(()) => {}
            Err(e) if e.code() == DXGI_ERROR_WAIT_TIMEOUT => return Ok(Acquire::Timeout),
            Err(e) if e.code() == DXGI_ERROR_ACCESS_LOST => return Ok(Acquire::AccessLost),
            Err(e) => return Err(e.into()),
        }

        // The desktop image must be copied out before the frame is released.
        let staged = resource
            .ok_or_else(|| CaptureError::api("AcquireNextFrame returned no resource"))
            .and_then(|resource| Ok(resource.cast::<ID3D11Texture2D>()?))
            .map(|desktop| self.stager.stage(&self.context, &desktop).clone());

        unsafe {
            let _ = handle.ReleaseFrame();
        }

        staged.map(Acquire::Frame)
    }
}

/// Everything the capture thread owns.
struct DisplayPipeline {
    driver: DuplicationDriver<DxgiDuplication>,
    converter: GpuColorConverter,
    context: ID3D11DeviceContext,
    fps: u32,
    // Dropped last.
    _gpu: GpuDevice,
}

// SAFETY: the pipeline is built on the caller's thread, then moved to the
// capture thread and used only there.
unsafe impl Send for DisplayPipeline {}

impl DisplayPipeline {
    #[instrument(name = "display_pipeline_open", skip(config))]
    fn open(index: u32, config: &CaptureConfig) -> CaptureResult<Self> {
        let gpu = GpuDevice::new()?;

        let output = unsafe { gpu.adapter()?.EnumOutputs(index) }.map_err(|e| {
            if e.code() == DXGI_ERROR_NOT_FOUND {
                CaptureError::SourceNotFound(format!("display {index}"))
            } else {
                e.into()
            }
        })?;
        let desc = unsafe { output.GetDesc()? };
        let output: IDXGIOutput1 = output.cast()?;

        let bounds = desc.DesktopCoordinates;
        let native = (
            (bounds.right - bounds.left) as u32,
            (bounds.bottom - bounds.top) as u32,
        );
        info!(
            display = index,
            native_width = native.0,
            native_height = native.1,
            "Display found"
        );

        let crop = CropRegion::top_left(native, (config.width, config.height));
        if crop.is_crop {
            info!(
                width = config.width,
                height = config.height,
                "Output size differs from display, frames will be cropped from top-left"
            );
        }

        let mut source = DxgiDuplication {
            output,
            device: gpu.device().clone(),
            context: gpu.context().clone(),
            stager: FrameStager::new(&gpu, config.video_target())?,
        };
        let handle = source.open()?;
        let converter = GpuColorConverter::new(&gpu, config.video_target())?;
        debug!(frame_bytes = converter.frame_size(), "Display frames sized");

        Ok(Self {
            driver: DuplicationDriver::new(source, handle),
            converter,
            context: gpu.context().clone(),
            fps: config.fps,
            _gpu: gpu,
        })
    }

    fn run(mut self, lifecycle: Lifecycle, mut sink: MediaSink) {
        let clock = Clock::process();
        let mut pacer = FramePacer::new(self.fps);
        let mut frames = 0u64;

        debug!(period = ?pacer.period(), "Entering display capture loop");

        while lifecycle.is_running() {
            if let Some(texture) = self.driver.next_frame(ACQUIRE_TIMEOUT) {
                let timestamp_ms = clock.now_ms();
                match self.converter.convert(&self.context, &texture) {
                    Ok(data) => {
                        sink(MediaUnit { data, timestamp_ms });
                        frames += 1;
                        trace!(frames, timestamp_ms, "Display frame delivered");
                    }
                    Err(e) => warn!("Frame conversion failed, skipping tick: {}", e),
                }
            }
            pacer.wait();
        }

        debug!(
            frames,
            recreations = self.driver.recreations(),
            "Display capture loop exited"
        );
    }
}

/// Captures one display output at a fixed frame rate.
///
/// Transient duplication failures never stop the session: a timeout skips
/// the tick and access loss recreates the duplication on the next tick.
pub struct DisplayCapturer {
    lifecycle: Lifecycle,
    pipeline: Option<DisplayPipeline>,
    worker: Option<JoinHandle<()>>,
}

impl Default for DisplayCapturer {
    fn default() -> Self {
        Self::new()
    }
}

impl DisplayCapturer {
    pub fn new() -> Self {
        Self {
            lifecycle: Lifecycle::new(),
            pipeline: None,
            worker: None,
        }
    }
}

impl CaptureSession for DisplayCapturer {
    fn kind(&self) -> SourceKind {
        SourceKind::Display
    }

    fn stop_behavior(&self) -> StopBehavior {
        StopBehavior::Quiescent
    }

    #[instrument(name = "display_capture_initialize", skip(self, config))]
    fn initialize(&mut self, config: &CaptureConfig) -> CaptureResult<()> {
        drop(self.lifecycle.begin_reinitialize(&mut self.pipeline)?);
        config.validate()?;
        let SourceSelector::Display { index } = config.source else {
            return Err(CaptureError::InvalidConfig(format!(
                "display capture cannot open {:?}",
                config.source
            )));
        };

        self.pipeline = Some(DisplayPipeline::open(index, config)?);
        self.lifecycle.mark_initialized();

        info!(
            display = index,
            width = config.width,
            height = config.height,
            fps = config.fps,
            "Display capture initialized"
        );
        Ok(())
    }

    #[instrument(name = "display_capture_start", skip(self, sink))]
    fn start(&mut self, sink: MediaSink) -> CaptureResult<()> {
        self.lifecycle.begin_start()?;

        let Some(pipeline) = self.pipeline.take() else {
            self.lifecycle.abort_start();
            return Err(CaptureError::NotInitialized);
        };

        let lifecycle = self.lifecycle.clone();
        let spawned = thread::Builder::new()
            .name("screenfeed-display".to_string())
            .spawn(move || pipeline.run(lifecycle, sink));

        match spawned {
            Ok(worker) => {
                self.worker = Some(worker);
                info!("Display capture started");
                Ok(())
            }
            Err(e) => {
                self.lifecycle.stop();
                Err(e.into())
            }
        }
    }

    #[instrument(name = "display_capture_stop", skip(self))]
    fn stop(&mut self) -> CaptureResult<()> {
        if self.lifecycle.stop() == RunState::Uninitialized {
            return Ok(());
        }

        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Display capture thread panicked");
            }
            info!("Display capture stopped");
        }

        self.pipeline = None;
        Ok(())
    }

    fn state(&self) -> RunState {
        self.lifecycle.state()
    }
}

impl Drop for DisplayCapturer {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
