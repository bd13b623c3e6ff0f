//! Native source formats and the fixed output contract.

use crate::error::CaptureError;
use crate::nv12::nv12_buffer_size;
use crate::CaptureResult;

/// `WAVEFORMATEX::wFormatTag` for plain PCM.
pub const WAVE_FORMAT_PCM: u16 = 0x0001;

/// `WAVEFORMATEX::wFormatTag` for IEEE float samples.
pub const WAVE_FORMAT_IEEE_FLOAT: u16 = 0x0003;

/// `WAVEFORMATEX::wFormatTag` for `WAVEFORMATEXTENSIBLE`.
pub const WAVE_FORMAT_EXTENSIBLE: u16 = 0xFFFE;

/// How a single native sample is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleLayout {
    /// 32-bit IEEE float.
    F32,
    /// Signed 16-bit integer.
    I16,
    /// Signed 32-bit integer.
    I32,
    /// Signed 24-bit integer, packed into 3 bytes.
    I24,
}

impl SampleLayout {
    /// Bytes occupied by one sample.
    pub fn bytes(self) -> usize {
        match self {
            Self::I16 => 2,
            Self::I24 => 3,
            Self::F32 | Self::I32 => 4,
        }
    }
}

/// Native audio format discovered from the OS mix format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSourceFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    pub is_float: bool,
}

impl AudioSourceFormat {
    /// Describe a mix format from the fields of a `WAVEFORMATEX`.
    ///
    /// `extensible_is_float` is only consulted for `WAVE_FORMAT_EXTENSIBLE`
    /// and reports whether the sub-format is IEEE float.
    pub fn from_wave_format(
        format_tag: u16,
        channels: u16,
        sample_rate: u32,
        bits_per_sample: u16,
        extensible_is_float: bool,
    ) -> Self {
        let is_float = match format_tag {
            WAVE_FORMAT_IEEE_FLOAT => true,
            WAVE_FORMAT_EXTENSIBLE => extensible_is_float,
            _ => false,
        };

        Self {
            sample_rate,
            channels,
            bits_per_sample,
            is_float,
        }
    }

    /// The sample layout, or `UnsupportedFormat` if it cannot be normalized.
    pub fn layout(&self) -> CaptureResult<SampleLayout> {
        if self.channels == 0 || self.sample_rate == 0 {
            return Err(CaptureError::UnsupportedFormat(format!(
                "{} Hz, {} channels",
                self.sample_rate, self.channels
            )));
        }

        match (self.is_float, self.bits_per_sample) {
            (true, 32) => Ok(SampleLayout::F32),
            (false, 16) => Ok(SampleLayout::I16),
            (false, 24) => Ok(SampleLayout::I24),
            (false, 32) => Ok(SampleLayout::I32),
            (is_float, bits) => Err(CaptureError::UnsupportedFormat(format!(
                "{bits}-bit {}",
                if is_float { "float" } else { "integer" }
            ))),
        }
    }

    /// Bytes per native frame (all channels).
    pub fn bytes_per_frame(&self) -> usize {
        (self.bits_per_sample as usize / 8) * self.channels as usize
    }
}

/// Fixed video output contract: NV12 at the size requested at initialize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoTarget {
    pub width: u32,
    pub height: u32,
}

impl VideoTarget {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Size of one emitted frame in bytes.
    pub fn frame_size(&self) -> usize {
        nv12_buffer_size(self.width, self.height)
    }
}
