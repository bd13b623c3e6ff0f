//! Audio format normalization to 48 kHz, 16-bit, interleaved stereo.

use tracing::debug;

use crate::format::{AudioSourceFormat, SampleLayout};
use crate::{CaptureResult, TARGET_CHANNELS, TARGET_SAMPLE_RATE};

const I16_SCALE: f32 = 32_767.0;
const I16_RANGE: f32 = 32_768.0;
const I32_RANGE: f32 = 2_147_483_648.0;

/// Number of 48 kHz frames produced from `native_frames` frames at
/// `native_rate`.
///
/// The silent-buffer path and the real-data path both size their output
/// with this function so a stream never changes length on silence.
pub fn resampled_frame_count(native_frames: usize, native_rate: u32) -> usize {
    if native_rate == TARGET_SAMPLE_RATE || native_rate == 0 {
        return native_frames;
    }
    (native_frames as f64 * TARGET_SAMPLE_RATE as f64 / native_rate as f64).round() as usize
}

/// Converts native audio buffers to interleaved stereo `i16` at 48 kHz.
///
/// Owns its scratch and output buffers; the slice returned by
/// [`normalize`](Self::normalize) or [`silence`](Self::silence) is valid
/// until the next call.
#[derive(Debug)]
pub struct AudioNormalizer {
    format: AudioSourceFormat,
    layout: SampleLayout,
    stereo: Vec<f32>,
    output: Vec<i16>,
}

impl AudioNormalizer {
    /// Create a normalizer for the given native format.
    pub fn new(format: AudioSourceFormat) -> CaptureResult<Self> {
        let layout = format.layout()?;

        debug!(
            sample_rate = format.sample_rate,
            channels = format.channels,
            bits = format.bits_per_sample,
            float = format.is_float,
            "Audio normalizer configured"
        );

        Ok(Self {
            format,
            layout,
            stereo: Vec::new(),
            output: Vec::new(),
        })
    }

    /// Output frame count for `native_frames` input frames.
    pub fn output_frames(&self, native_frames: usize) -> usize {
        resampled_frame_count(native_frames, self.format.sample_rate)
    }

    /// Zero-filled output for a buffer the OS flagged as silent.
    pub fn silence(&mut self, native_frames: usize) -> &[i16] {
        let samples = self.output_frames(native_frames) * TARGET_CHANNELS as usize;
        self.output.clear();
        self.output.resize(samples, 0);
        &self.output
    }

    /// Normalize `native_frames` frames of raw device data.
    ///
    /// Frames that `data` is too short to hold are ignored.
    pub fn normalize(&mut self, data: &[u8], native_frames: usize) -> &[i16] {
        let bytes_per_frame = self.format.bytes_per_frame();
        let frames = if bytes_per_frame == 0 {
            0
        } else {
            native_frames.min(data.len() / bytes_per_frame)
        };

        self.decode_stereo(data, frames);

        self.output.clear();
        if self.format.sample_rate == TARGET_SAMPLE_RATE {
            self.output.extend(self.stereo.iter().map(|&s| to_i16(s)));
        } else {
            let out_frames = self.output_frames(frames);
            resample_linear(&self.stereo, frames, out_frames, &mut self.output);
        }

        &self.output
    }

    /// Decode into interleaved float stereo, duplicating mono into both
    /// channels and dropping channels beyond the second.
    fn decode_stereo(&mut self, data: &[u8], frames: usize) {
        let sample_bytes = self.layout.bytes();
        let bytes_per_frame = self.format.bytes_per_frame();
        let has_right = self.format.channels >= 2;

        self.stereo.clear();
        self.stereo.reserve(frames * 2);

        for frame in data.chunks_exact(bytes_per_frame).take(frames) {
            let left = read_sample(self.layout, &frame[..sample_bytes]);
            let right = if has_right {
                read_sample(self.layout, &frame[sample_bytes..sample_bytes * 2])
            } else {
                left
            };
            self.stereo.push(left);
            self.stereo.push(right);
        }
    }
}

fn read_sample(layout: SampleLayout, bytes: &[u8]) -> f32 {
    match layout {
        SampleLayout::F32 => f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        SampleLayout::I16 => i16::from_le_bytes([bytes[0], bytes[1]]) as f32 / I16_RANGE,
        SampleLayout::I32 => {
            i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f32 / I32_RANGE
        }
        // Shift the 24-bit value into the top of an i32 to sign-extend it.
        SampleLayout::I24 => i32::from_le_bytes([0, bytes[0], bytes[1], bytes[2]]) as f32 / I32_RANGE,
    }
}

fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * I16_SCALE) as i16
}

/// Linear interpolation from `in_frames` to `out_frames` stereo frames.
///
/// Output frame `i` reads source position `i * (in - 1) / (out - 1)`, so
/// the first and last output frames land exactly on the first and last
/// input frames.
fn resample_linear(stereo: &[f32], in_frames: usize, out_frames: usize, output: &mut Vec<i16>) {
    if in_frames == 0 || out_frames == 0 {
        return;
    }

    output.reserve(out_frames * 2);

    if in_frames == 1 || out_frames == 1 {
        for _ in 0..out_frames {
            output.push(to_i16(stereo[0]));
            output.push(to_i16(stereo[1]));
        }
        return;
    }

    let last = in_frames - 1;
    let step = last as f64 / (out_frames - 1) as f64;

    for i in 0..out_frames {
        let pos = i as f64 * step;
        let index = pos as usize;

        let (left, right) = if index >= last {
            (stereo[last * 2], stereo[last * 2 + 1])
        } else {
            let frac = pos - index as f64;
            let blend = |a: f32, b: f32| (a as f64 * (1.0 - frac) + b as f64 * frac) as f32;
            (
                blend(stereo[index * 2], stereo[(index + 1) * 2]),
                blend(stereo[index * 2 + 1], stereo[(index + 1) * 2 + 1]),
            )
        };

        output.push(to_i16(left));
        output.push(to_i16(right));
    }
}
