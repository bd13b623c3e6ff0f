//! Video capture for screenfeed.
//!
//! Two capturers share one GPU pipeline: the captured BGRA texture is
//! cropped into a persistent texture of the requested size, converted to
//! NV12 by the D3D11 video processor and read back into a packed buffer.
//!
//! - [`DisplayCapturer`] polls DXGI desktop duplication on its own thread.
//! - [`WindowCapturer`] receives frames from Windows.Graphics.Capture
//!   callbacks.
//!
//! Everything here is Windows only.

#[cfg(windows)]
mod converter;
#[cfg(windows)]
mod d3d11;
#[cfg(windows)]
mod display;
#[cfg(windows)]
mod stage;
#[cfg(windows)]
mod window;

#[cfg(windows)]
pub use converter::GpuColorConverter;
#[cfg(windows)]
pub use d3d11::GpuDevice;
#[cfg(windows)]
pub use display::DisplayCapturer;
#[cfg(windows)]
pub use stage::FrameStager;
#[cfg(windows)]
pub use window::WindowCapturer;

use std::time::Duration;

/// How long a display tick waits for a new duplicated frame.
pub const ACQUIRE_TIMEOUT: Duration = Duration::from_millis(100);

/// Frames the window capture pool keeps in flight.
pub const FRAME_POOL_BUFFERS: i32 = 2;
