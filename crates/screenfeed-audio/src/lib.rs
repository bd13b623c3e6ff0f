//! System audio capture for screenfeed.
//!
//! On Windows, [`LoopbackCapturer`] records the default render device
//! through WASAPI loopback. The drain loop in [`pump`] is platform
//! independent and turns raw endpoint packets into normalized packets.

pub mod pump;

#[cfg(windows)]
mod device;
#[cfg(windows)]
mod loopback;

#[cfg(windows)]
pub use loopback::LoopbackCapturer;
pub use pump::{AudioPump, PacketSource, RawPacket, POLL_INTERVAL};
