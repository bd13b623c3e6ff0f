//! Core of the screenfeed capture pipeline.
//!
//! This crate holds everything that does not touch an OS capture API:
//! the session contract shared by all capturers, the audio format
//! normalizer, NV12 layout helpers, the audio packet wire format, frame
//! pacing and the device-loss recovery driver.

mod clock;
#[cfg(windows)]
mod com;
mod config;
mod error;
mod format;
mod normalize;
mod nv12;
mod packet;
mod pacing;
mod recovery;
mod registry;
mod session;

pub use clock::Clock;
#[cfg(windows)]
pub use com::ensure_com_initialized;
pub use config::{CaptureConfig, SourceSelector};
pub use error::CaptureError;
pub use format::{
    AudioSourceFormat, SampleLayout, VideoTarget, WAVE_FORMAT_EXTENSIBLE, WAVE_FORMAT_IEEE_FLOAT,
    WAVE_FORMAT_PCM,
};
pub use normalize::{resampled_frame_count, AudioNormalizer};
pub use nv12::{copy_nv12_planes, nv12_buffer_size, ColorSpace, CropRegion, NominalRange};
pub use packet::{AudioPacketHeader, PacketBuilder, AUDIO_PACKET_MAGIC};
pub use pacing::FramePacer;
pub use recovery::{Acquire, DuplicationDriver, DuplicationSource};
pub use registry::{SessionId, SessionRegistry};
pub use session::{
    CaptureSession, Lifecycle, MediaSink, MediaUnit, RunState, SourceKind, StopBehavior,
};

/// Result type for capture operations.
pub type CaptureResult<T> = Result<T, CaptureError>;

/// Output audio sample rate in Hz.
pub const TARGET_SAMPLE_RATE: u32 = 48_000;

/// Output audio channel count.
pub const TARGET_CHANNELS: u16 = 2;

/// Largest accepted output width or height.
pub const MAX_DIMENSION: u32 = 4096;

/// Largest accepted frame rate.
pub const MAX_FPS: u32 = 120;
