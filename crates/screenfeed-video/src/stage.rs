//! Copy of captured textures into a fixed-size conversion input.

use tracing::info;
use windows::Win32::Graphics::Direct3D11::{
    ID3D11DeviceContext, ID3D11Texture2D, D3D11_BIND_RENDER_TARGET, D3D11_BIND_SHADER_RESOURCE,
    D3D11_BOX, D3D11_TEXTURE2D_DESC, D3D11_USAGE_DEFAULT,
};
use windows::Win32::Graphics::Dxgi::Common::{DXGI_FORMAT_B8G8R8A8_UNORM, DXGI_SAMPLE_DESC};

use screenfeed_core::{CaptureResult, CropRegion, VideoTarget};

use crate::d3d11::GpuDevice;

/// Holds a BGRA texture of the requested output size and fills it from
/// each captured frame.
///
/// When the captured surface has a different size, the requested extent
/// is copied from the top-left corner (a crop, never a scale). Parts of
/// the target the source does not cover keep their previous contents.
pub struct FrameStager {
    texture: ID3D11Texture2D,
    width: u32,
    height: u32,
    last_source: Option<(u32, u32)>,
}

impl FrameStager {
    pub fn new(gpu: &GpuDevice, target: VideoTarget) -> CaptureResult<Self> {
        let VideoTarget { width, height } = target;
        let desc = D3D11_TEXTURE2D_DESC {
            Width: width,
            Height: height,
            MipLevels: 1,
            ArraySize: 1,
            Format: DXGI_FORMAT_B8G8R8A8_UNORM,
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            Usage: D3D11_USAGE_DEFAULT,
            BindFlags: (D3D11_BIND_RENDER_TARGET.0 | D3D11_BIND_SHADER_RESOURCE.0) as u32,
            CPUAccessFlags: 0,
            MiscFlags: 0,
        };

        Ok(Self {
            texture: gpu.create_texture(&desc)?,
            width,
            height,
            last_source: None,
        })
    }

    /// Copy `source` into the staged texture and return it.
    pub fn stage(
        &mut self,
        context: &ID3D11DeviceContext,
        source: &ID3D11Texture2D,
    ) -> &ID3D11Texture2D {
        let mut desc = D3D11_TEXTURE2D_DESC::default();
        unsafe { source.GetDesc(&mut desc) };

        let native = (desc.Width, desc.Height);
        let region = CropRegion::top_left(native, (self.width, self.height));

        if self.last_source != Some(native) {
            if region.is_crop {
                info!(
                    native_width = native.0,
                    native_height = native.1,
                    width = self.width,
                    height = self.height,
                    "Captured size differs from output, cropping from top-left"
                );
            }
            self.last_source = Some(native);
        }

        let copy_box = D3D11_BOX {
            left: 0,
            top: 0,
            front: 0,
            right: region.width,
            bottom: region.height,
            back: 1,
        };

        unsafe {
            context.CopySubresourceRegion(&self.texture, 0, 0, 0, 0, source, 0, Some(&copy_box));
        }

        &self.texture
    }
}
