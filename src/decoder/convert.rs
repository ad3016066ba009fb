//! Pixel format conversion for decoded pictures
//!
//! The H.264 backend produces planar I420 with padded strides; the sender
//! expects tightly packed NV12 (stride == width).

/// Borrowed planar YUV 4:2:0 picture
#[derive(Debug, Clone, Copy)]
pub struct I420Planes<'a> {
    pub width: usize,
    pub height: usize,
    pub y: &'a [u8],
    pub u: &'a [u8],
    pub v: &'a [u8],
    pub y_stride: usize,
    pub u_stride: usize,
    pub v_stride: usize,
}

/// Size in bytes of a packed NV12 picture
pub fn nv12_size(width: usize, height: usize) -> usize {
    width * height + width * height.div_ceil(2)
}

/// Pack an I420 picture into NV12: the Y plane, then interleaved U/V
///
/// Odd widths/heights round the chroma dimensions up. Planes shorter than
/// their stride implies leave the remaining output zeroed.
pub fn i420_to_nv12(src: &I420Planes<'_>) -> Vec<u8> {
    let width = src.width;
    let height = src.height;
    let chroma_width = width.div_ceil(2);
    let chroma_height = height.div_ceil(2);

    let mut out = vec![0u8; nv12_size(width, height)];
    let (y_out, uv_out) = out.split_at_mut(width * height);

    for (row, dst) in y_out.chunks_exact_mut(width.max(1)).enumerate().take(height) {
        let start = row * src.y_stride;
        if let Some(line) = src.y.get(start..start + width) {
            dst.copy_from_slice(line);
        }
    }

    // NV12 chroma rows are `width` bytes: chroma_width U/V pairs, padded for odd widths
    for row in 0..chroma_height {
        let u_line = src.u.get(row * src.u_stride..row * src.u_stride + chroma_width);
        let v_line = src.v.get(row * src.v_stride..row * src.v_stride + chroma_width);
        let (Some(u_line), Some(v_line)) = (u_line, v_line) else {
            continue;
        };

        let dst_row = row * width;
        for (col, (u, v)) in u_line.iter().zip(v_line).enumerate() {
            let idx = dst_row + col * 2;
            if idx + 1 < uv_out.len() && col * 2 + 1 < width {
                uv_out[idx] = *u;
                uv_out[idx + 1] = *v;
            } else if idx < uv_out.len() {
                uv_out[idx] = *u;
            }
        }
    }

    out
}
