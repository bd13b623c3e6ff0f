//! NV12 layout, readback and geometry helpers.

/// Size in bytes of an NV12 frame: a full-resolution Y plane followed by
/// an interleaved UV plane at half resolution in both dimensions.
pub fn nv12_buffer_size(width: u32, height: u32) -> usize {
    let y_size = width as usize * height as usize;
    y_size + y_size / 2
}

/// Copy a mapped NV12 surface into a tightly packed buffer.
///
/// `src` is the mapped subresource: `height` Y rows of `row_pitch` bytes,
/// then `height / 2` UV rows of the same pitch. `dst` must hold exactly
/// `nv12_buffer_size(width, height)` bytes. Returns `false` without
/// touching `dst` if `width` is zero or either buffer is too small.
pub fn copy_nv12_planes(
    src: &[u8],
    row_pitch: usize,
    width: usize,
    height: usize,
    dst: &mut [u8],
) -> bool {
    let uv_height = height / 2;
    let needed_src = if height == 0 {
        0
    } else {
        row_pitch * (height + uv_height - 1) + width
    };
    if width == 0
        || row_pitch < width
        || src.len() < needed_src
        || dst.len() < width * (height + uv_height)
    {
        return false;
    }

    let (y_dst, uv_dst) = dst.split_at_mut(width * height);

    for (row, out) in y_dst.chunks_exact_mut(width).enumerate() {
        let start = row * row_pitch;
        out.copy_from_slice(&src[start..start + width]);
    }

    let uv_src = src.get(row_pitch * height..).unwrap_or_default();
    for (row, out) in uv_dst.chunks_exact_mut(width).take(uv_height).enumerate() {
        let start = row * row_pitch;
        out.copy_from_slice(&uv_src[start..start + width]);
    }

    true
}

/// Source region copied out of a captured texture before conversion.
///
/// Size mismatches are resolved by a top-left crop, never a resize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRegion {
    pub width: u32,
    pub height: u32,
    /// Whether the region differs from the full native surface.
    pub is_crop: bool,
}

impl CropRegion {
    /// The region anchored at the origin covering `requested`, clamped to
    /// the `native` extent.
    pub fn top_left(native: (u32, u32), requested: (u32, u32)) -> Self {
        Self {
            width: native.0.min(requested.0),
            height: native.1.min(requested.1),
            is_crop: native != requested,
        }
    }
}

/// Nominal range of a colour space, as the video processor encodes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NominalRange {
    Undefined = 0,
    Studio = 1,
    Full = 2,
}

/// Colour space description for the GPU video processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorSpace {
    /// RGB range: `false` for full (0-255), `true` for studio (16-235).
    pub studio_rgb: bool,
    /// YCbCr matrix: `true` for BT.709, `false` for BT.601.
    pub bt709: bool,
    pub nominal_range: NominalRange,
}

impl ColorSpace {
    /// Desktop BGRA input: full range RGB, BT.709, 0-255.
    pub const FULL_RANGE_INPUT: Self = Self {
        studio_rgb: false,
        bt709: true,
        nominal_range: NominalRange::Full,
    };

    /// NV12 output: studio range, BT.709, 16-235.
    pub const STUDIO_BT709_OUTPUT: Self = Self {
        studio_rgb: true,
        bt709: true,
        nominal_range: NominalRange::Studio,
    };

    /// Pack into the `D3D11_VIDEO_PROCESSOR_COLOR_SPACE` bitfield:
    /// bit 0 usage (always playback), bit 1 RGB range, bit 2 YCbCr matrix,
    /// bit 3 xvYCC (unused), bits 4-5 nominal range.
    pub fn bits(&self) -> u32 {
        ((self.studio_rgb as u32) << 1)
            | ((self.bt709 as u32) << 2)
            | ((self.nominal_range as u32) << 4)
    }
}
