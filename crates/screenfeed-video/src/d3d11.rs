//! Per-session Direct3D 11 device.

use tracing::{debug, instrument};
use windows::core::Interface;
use windows::Graphics::DirectX::Direct3D11::IDirect3DDevice;
use windows::Win32::Graphics::Direct3D::D3D_DRIVER_TYPE_HARDWARE;
use windows::Win32::Graphics::Direct3D11::{
    D3D11CreateDevice, ID3D11Device, ID3D11DeviceContext, ID3D11Texture2D,
    D3D11_CREATE_DEVICE_BGRA_SUPPORT, D3D11_SDK_VERSION, D3D11_TEXTURE2D_DESC,
};
use windows::Win32::Graphics::Dxgi::{IDXGIAdapter, IDXGIDevice};
use windows::Win32::System::WinRT::Direct3D11::CreateDirect3D11DeviceFromDXGIDevice;

use screenfeed_core::{CaptureError, CaptureResult};

/// A hardware D3D11 device and its immediate context.
///
/// Every capture session creates its own; devices are never shared.
pub struct GpuDevice {
    device: ID3D11Device,
    context: ID3D11DeviceContext,
}

// SAFETY: D3D11 devices are free-threaded. The immediate context is not,
// and is only used by whichever single thread currently owns the session's
// capture pipeline.
unsafe impl Send for GpuDevice {}

impl GpuDevice {
    #[instrument(name = "d3d11_create_device")]
    pub fn new() -> CaptureResult<Self> {
        let mut device = None;
        let mut context = None;

        unsafe {
            D3D11CreateDevice(
                None,
                D3D_DRIVER_TYPE_HARDWARE,
                None,
                D3D11_CREATE_DEVICE_BGRA_SUPPORT,
                None,
                D3D11_SDK_VERSION,
                Some(&mut device),
                None,
                Some(&mut context),
            )?;
        }

        let device = device.ok_or_else(|| CaptureError::api("Failed to create D3D11 device"))?;
        let context =
            context.ok_or_else(|| CaptureError::api("Failed to get D3D11 device context"))?;

        debug!("Created D3D11 device for capture");
        Ok(Self { device, context })
    }

    pub fn device(&self) -> &ID3D11Device {
        &self.device
    }

    pub fn context(&self) -> &ID3D11DeviceContext {
        &self.context
    }

    /// The adapter the device was created on.
    pub fn adapter(&self) -> CaptureResult<IDXGIAdapter> {
        let dxgi: IDXGIDevice = self.device.cast()?;
        Ok(unsafe { dxgi.GetAdapter()? })
    }

    /// WinRT wrapper of the device, for Windows.Graphics.Capture.
    pub fn direct3d_device(&self) -> CaptureResult<IDirect3DDevice> {
        let dxgi: IDXGIDevice = self.device.cast()?;
        let inspectable = unsafe { CreateDirect3D11DeviceFromDXGIDevice(&dxgi)? };
        Ok(inspectable.cast()?)
    }

    pub fn create_texture(&self, desc: &D3D11_TEXTURE2D_DESC) -> CaptureResult<ID3D11Texture2D> {
        let mut texture = None;
        unsafe {
            self.device.CreateTexture2D(desc, None, Some(&mut texture))?;
        }
        texture.ok_or_else(|| {
            CaptureError::api(format!(
                "Failed to create {}x{} texture",
                desc.Width, desc.Height
            ))
        })
    }
}
