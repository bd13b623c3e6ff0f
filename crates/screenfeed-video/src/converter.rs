//! BGRA to NV12 conversion on the D3D11 video processor.

use std::mem::ManuallyDrop;
use std::slice;

use tracing::{debug, instrument};
use windows::core::Interface;
use windows::Win32::Foundation::TRUE;
use windows::Win32::Graphics::Direct3D11::{
    ID3D11DeviceContext, ID3D11Texture2D, ID3D11VideoContext, ID3D11VideoDevice,
    ID3D11VideoProcessor, ID3D11VideoProcessorEnumerator, ID3D11VideoProcessorOutputView,
    D3D11_BIND_RENDER_TARGET, D3D11_CPU_ACCESS_READ, D3D11_MAPPED_SUBRESOURCE, D3D11_MAP_READ,
    D3D11_TEX2D_VPIV, D3D11_TEX2D_VPOV, D3D11_TEXTURE2D_DESC, D3D11_USAGE_DEFAULT,
    D3D11_USAGE_STAGING, D3D11_VIDEO_FRAME_FORMAT_PROGRESSIVE, D3D11_VIDEO_PROCESSOR_COLOR_SPACE,
    D3D11_VIDEO_PROCESSOR_CONTENT_DESC, D3D11_VIDEO_PROCESSOR_FORMAT_SUPPORT_INPUT,
    D3D11_VIDEO_PROCESSOR_FORMAT_SUPPORT_OUTPUT, D3D11_VIDEO_PROCESSOR_INPUT_VIEW_DESC,
    D3D11_VIDEO_PROCESSOR_INPUT_VIEW_DESC_0, D3D11_VIDEO_PROCESSOR_OUTPUT_VIEW_DESC,
    D3D11_VIDEO_PROCESSOR_OUTPUT_VIEW_DESC_0, D3D11_VIDEO_PROCESSOR_STREAM,
    D3D11_VIDEO_USAGE_PLAYBACK_NORMAL, D3D11_VPIV_DIMENSION_TEXTURE2D,
    D3D11_VPOV_DIMENSION_TEXTURE2D,
};
use windows::Win32::Graphics::Dxgi::Common::{
    DXGI_FORMAT, DXGI_FORMAT_B8G8R8A8_UNORM, DXGI_FORMAT_NV12, DXGI_SAMPLE_DESC,
};

use screenfeed_core::{
    copy_nv12_planes, CaptureError, CaptureResult, ColorSpace, VideoTarget,
};

use crate::d3d11::GpuDevice;

/// Converts BGRA textures of a fixed size into packed NV12 bytes.
///
/// The processor is configured for full range BT.709 input and studio
/// range BT.709 output. Output and staging textures are created once.
/// Not reentrant: one `convert` at a time per instance.
pub struct GpuColorConverter {
    output_view: ID3D11VideoProcessorOutputView,
    processor: ID3D11VideoProcessor,
    enumerator: ID3D11VideoProcessorEnumerator,
    staging: ID3D11Texture2D,
    nv12_texture: ID3D11Texture2D,
    video_context: ID3D11VideoContext,
    video_device: ID3D11VideoDevice,
    width: u32,
    height: u32,
    buffer: Vec<u8>,
}

// SAFETY: the converter only touches the device context from the thread
// that calls `convert`, and `convert` takes `&mut self`.
unsafe impl Send for GpuColorConverter {}

impl GpuColorConverter {
    #[instrument(name = "gpu_converter_new", skip(gpu))]
    pub fn new(gpu: &GpuDevice, target: VideoTarget) -> CaptureResult<Self> {
        let VideoTarget { width, height } = target;
        let video_device: ID3D11VideoDevice = gpu.device().cast().map_err(|e| {
            CaptureError::WindowsApi {
                message: "Device does not support video processing".to_string(),
                source: Some(e),
            }
        })?;
        let video_context: ID3D11VideoContext = gpu.context().cast()?;

        let content = D3D11_VIDEO_PROCESSOR_CONTENT_DESC {
            InputFrameFormat: D3D11_VIDEO_FRAME_FORMAT_PROGRESSIVE,
            InputWidth: width,
            InputHeight: height,
            OutputWidth: width,
            OutputHeight: height,
            Usage: D3D11_VIDEO_USAGE_PLAYBACK_NORMAL,
            ..Default::default()
        };
        let enumerator = unsafe { video_device.CreateVideoProcessorEnumerator(&content)? };

        require_format(
            &enumerator,
            DXGI_FORMAT_B8G8R8A8_UNORM,
            D3D11_VIDEO_PROCESSOR_FORMAT_SUPPORT_INPUT.0 as u32,
            "BGRA input",
        )?;
        require_format(
            &enumerator,
            DXGI_FORMAT_NV12,
            D3D11_VIDEO_PROCESSOR_FORMAT_SUPPORT_OUTPUT.0 as u32,
            "NV12 output",
        )?;

        let processor = unsafe { video_device.CreateVideoProcessor(&enumerator, 0)? };

        let input_space = D3D11_VIDEO_PROCESSOR_COLOR_SPACE {
            _bitfield: ColorSpace::FULL_RANGE_INPUT.bits(),
        };
        let output_space = D3D11_VIDEO_PROCESSOR_COLOR_SPACE {
            _bitfield: ColorSpace::STUDIO_BT709_OUTPUT.bits(),
        };
        unsafe {
            video_context.VideoProcessorSetStreamColorSpace(&processor, 0, &input_space);
            video_context.VideoProcessorSetOutputColorSpace(&processor, &output_space);
        }

        let nv12_desc = D3D11_TEXTURE2D_DESC {
            Width: width,
            Height: height,
            MipLevels: 1,
            ArraySize: 1,
            Format: DXGI_FORMAT_NV12,
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            Usage: D3D11_USAGE_DEFAULT,
            BindFlags: D3D11_BIND_RENDER_TARGET.0 as u32,
            CPUAccessFlags: 0,
            MiscFlags: 0,
        };
        let nv12_texture = gpu.create_texture(&nv12_desc)?;

        let view_desc = D3D11_VIDEO_PROCESSOR_OUTPUT_VIEW_DESC {
            ViewDimension: D3D11_VPOV_DIMENSION_TEXTURE2D,
            Anonymous: D3D11_VIDEO_PROCESSOR_OUTPUT_VIEW_DESC_0 {
                Texture2D: D3D11_TEX2D_VPOV { MipSlice: 0 },
            },
        };
        let mut output_view = None;
        unsafe {
            video_device.CreateVideoProcessorOutputView(
                &nv12_texture,
                &enumerator,
                &view_desc,
                Some(&mut output_view),
            )?;
        }
        let output_view =
            output_view.ok_or_else(|| CaptureError::api("Failed to create NV12 output view"))?;

        let staging_desc = D3D11_TEXTURE2D_DESC {
            Usage: D3D11_USAGE_STAGING,
            BindFlags: 0,
            CPUAccessFlags: D3D11_CPU_ACCESS_READ.0 as u32,
            ..nv12_desc
        };
        let staging = gpu.create_texture(&staging_desc)?;

        debug!(width, height, "Video processor ready for BGRA to NV12");

        Ok(Self {
            output_view,
            processor,
            enumerator,
            staging,
            nv12_texture,
            video_context,
            video_device,
            width,
            height,
            buffer: vec![0; target.frame_size()],
        })
    }

    /// Size of every buffer returned by [`convert`](Self::convert).
    pub fn frame_size(&self) -> usize {
        self.buffer.len()
    }

    /// Convert one BGRA texture of the configured size.
    ///
    /// The returned slice is valid until the next call.
    pub fn convert(
        &mut self,
        context: &ID3D11DeviceContext,
        texture: &ID3D11Texture2D,
    ) -> CaptureResult<&[u8]> {
        self.process(texture)?;

        unsafe { context.CopyResource(&self.staging, &self.nv12_texture) };

        let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
        unsafe {
            context.Map(&self.staging, 0, D3D11_MAP_READ, 0, Some(&mut mapped))?;
        }

        let row_pitch = mapped.RowPitch as usize;
        let rows = self.height as usize + self.height as usize / 2;
        // SAFETY: a mapped NV12 staging texture spans `rows` rows of
        // `row_pitch` bytes and stays mapped until Unmap below.
        let src = unsafe { slice::from_raw_parts(mapped.pData as *const u8, row_pitch * rows) };
        let copied = copy_nv12_planes(
            src,
            row_pitch,
            self.width as usize,
            self.height as usize,
            &mut self.buffer,
        );

        unsafe { context.Unmap(&self.staging, 0) };

        if !copied {
            return Err(CaptureError::FrameConversion(format!(
                "mapped NV12 surface too small (row pitch {row_pitch})"
            )));
        }
        Ok(&self.buffer)
    }

    /// Run one video processor pass from `texture` into the NV12 texture.
    fn process(&self, texture: &ID3D11Texture2D) -> CaptureResult<()> {
        let view_desc = D3D11_VIDEO_PROCESSOR_INPUT_VIEW_DESC {
            FourCC: 0,
            ViewDimension: D3D11_VPIV_DIMENSION_TEXTURE2D,
            Anonymous: D3D11_VIDEO_PROCESSOR_INPUT_VIEW_DESC_0 {
                Texture2D: D3D11_TEX2D_VPIV {
                    MipSlice: 0,
                    ArraySlice: 0,
                },
            },
        };

        let mut input_view = None;
        unsafe {
            self.video_device.CreateVideoProcessorInputView(
                texture,
                &self.enumerator,
                &view_desc,
                Some(&mut input_view),
            )?;
        }

        let mut stream = D3D11_VIDEO_PROCESSOR_STREAM {
            Enable: TRUE,
            pInputSurface: ManuallyDrop::new(input_view),
            ..Default::default()
        };

        let result = unsafe {
            self.video_context.VideoProcessorBlt(
                &self.processor,
                &self.output_view,
                0,
                slice::from_ref(&stream),
            )
        };

        unsafe { ManuallyDrop::drop(&mut stream.pInputSurface) };

        result.map_err(|e| CaptureError::WindowsApi {
            message: "VideoProcessorBlt failed".to_string(),
            source: Some(e),
        })
    }
}

fn require_format(
    enumerator: &ID3D11VideoProcessorEnumerator,
    format: DXGI_FORMAT,
    needed: u32,
    what: &str,
) -> CaptureResult<()> {
    let support = unsafe { enumerator.CheckVideoProcessorFormat(format)? };
    if support & needed == 0 {
        return Err(CaptureError::UnsupportedFormat(format!(
            "video processor lacks {what}"
        )));
    }
    Ok(())
}
