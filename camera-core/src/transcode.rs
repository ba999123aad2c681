use aligned_vec::{avec, AVec, ConstAlign};

use crate::{align_to, convert::rgb_to_yuv, error::Error, format::PixelFormat, invalid_param_error, unsupported_error, Result, DEFAULT_ALIGNMENT};

pub type AlignedPlane = AVec<u8, ConstAlign<DEFAULT_ALIGNMENT>>;

/// Planar 4:2:0 destination image with encoder-friendly strides.
pub struct Yuv420Image {
    pub width: u32,
    pub height: u32,
    strides: [usize; 3],
    planes: [AlignedPlane; 3],
}

fn validate_dimensions(width: u32, height: u32) -> Result<()> {
    if width == 0 || height == 0 || width % 2 != 0 || height % 2 != 0 {
        return Err(invalid_param_error!((width, height)));
    }
    Ok(())
}

impl Yuv420Image {
    pub fn new(width: u32, height: u32) -> Result<Self> {
        Self::with_alignment(width, height, DEFAULT_ALIGNMENT)
    }

    /// `alignment` applies to the luma stride and must be a power of two.
    pub fn with_alignment(width: u32, height: u32, alignment: usize) -> Result<Self> {
        validate_dimensions(width, height)?;
        if !alignment.is_power_of_two() || alignment < 2 {
            return Err(invalid_param_error!(alignment));
        }

        let y_stride = align_to(width as usize, alignment);
        let uv_stride = y_stride / 2;
        let uv_height = height as usize / 2;

        Ok(Self {
            width,
            height,
            strides: [y_stride, uv_stride, uv_stride],
            planes: [
                avec![[DEFAULT_ALIGNMENT]| 0u8; y_stride * height as usize],
                avec![[DEFAULT_ALIGNMENT]| 0u8; uv_stride * uv_height],
                avec![[DEFAULT_ALIGNMENT]| 0u8; uv_stride * uv_height],
            ],
        })
    }

    pub fn chroma_width(&self) -> usize {
        self.width as usize / 2
    }

    pub fn chroma_height(&self) -> usize {
        self.height as usize / 2
    }

    pub fn stride(&self, index: usize) -> usize {
        self.strides[index]
    }

    pub fn plane(&self, index: usize) -> &[u8] {
        &self.planes[index]
    }

    pub fn planes_mut(&mut self) -> (&mut [u8], &mut [u8], &mut [u8]) {
        let [y, u, v] = &mut self.planes;
        (&mut y[..], &mut u[..], &mut v[..])
    }

    /// Luma rows followed by both chroma planes with the stride padding removed.
    pub fn to_packed(&self) -> Vec<u8> {
        let mut packed = Vec::with_capacity(self.width as usize * self.height as usize * 3 / 2);
        let sizes = [(self.width as usize, self.height as usize), (self.chroma_width(), self.chroma_height()), (self.chroma_width(), self.chroma_height())];

        for (index, (width, height)) in sizes.into_iter().enumerate() {
            let stride = self.strides[index];
            for row in self.planes[index].chunks(stride).take(height) {
                packed.extend_from_slice(&row[..width]);
            }
        }

        packed
    }
}

fn check_source(src: &[u8], stride: usize, dst: &Yuv420Image, bpp: usize) -> Result<()> {
    let row_bytes = dst.width as usize * bpp;
    if stride < row_bytes {
        return Err(invalid_param_error!(stride));
    }
    let needed = stride * (dst.height as usize - 1) + row_bytes;
    if src.len() < needed {
        return Err(Error::Invalid(format!("source too short: {} < {}", src.len(), needed).into()));
    }
    Ok(())
}

// Chroma comes from the top-left pixel of each 2x2 block.
fn packed_to_yuv420<const BPP: usize>(src: &[u8], stride: usize, dst: &mut Yuv420Image, read: impl Fn(&[u8]) -> (u8, u8, u8)) -> Result<()> {
    validate_dimensions(dst.width, dst.height)?;
    check_source(src, stride, dst, BPP)?;

    let width = dst.width as usize;
    let [y_stride, uv_stride, _] = dst.strides;
    let (y_plane, u_plane, v_plane) = dst.planes_mut();

    for row in 0..y_plane.len() / y_stride {
        let src_row = &src[row * stride..row * stride + width * BPP];
        let y_row = &mut y_plane[row * y_stride..row * y_stride + width];
        let chroma_offset = (row / 2) * uv_stride;

        for (x, pixel) in src_row.chunks_exact(BPP).enumerate() {
            let (r, g, b) = read(pixel);
            let (y, u, v) = rgb_to_yuv(r, g, b);
            y_row[x] = y;
            if row % 2 == 0 && x % 2 == 0 {
                u_plane[chroma_offset + x / 2] = u;
                v_plane[chroma_offset + x / 2] = v;
            }
        }
    }

    Ok(())
}

/// Source bytes in R, G, B order (libcamera `BGR888`).
pub fn rgb24_to_yuv420(src: &[u8], stride: usize, dst: &mut Yuv420Image) -> Result<()> {
    packed_to_yuv420::<3>(src, stride, dst, |pixel| (pixel[0], pixel[1], pixel[2]))
}

/// Source bytes in B, G, R order (libcamera `RGB888`).
pub fn bgr24_to_yuv420(src: &[u8], stride: usize, dst: &mut Yuv420Image) -> Result<()> {
    packed_to_yuv420::<3>(src, stride, dst, |pixel| (pixel[2], pixel[1], pixel[0]))
}

/// Little-endian 5:6:5 words.
pub fn rgb565_to_yuv420(src: &[u8], stride: usize, dst: &mut Yuv420Image) -> Result<()> {
    packed_to_yuv420::<2>(src, stride, dst, |pixel| {
        let word = u16::from_le_bytes([pixel[0], pixel[1]]) as u32;
        let r = (word >> 11) & 0x1F;
        let g = (word >> 5) & 0x3F;
        let b = word & 0x1F;
        ((r * 255 / 31) as u8, (g * 255 / 63) as u8, (b * 255 / 31) as u8)
    })
}

/// Copies planar 4:2:0 input given as three planes or one contiguous plane.
/// `stride` is the source luma stride; chroma strides are half of it.
pub fn copy_yuv420(planes: &[&[u8]], stride: usize, dst: &mut Yuv420Image) -> Result<()> {
    validate_dimensions(dst.width, dst.height)?;
    if stride < dst.width as usize {
        return Err(invalid_param_error!(stride));
    }

    let height = dst.height as usize;
    let src_strides = [stride, stride / 2, stride / 2];
    let src_heights = [height, height / 2, height / 2];
    let sources: [&[u8]; 3] = match planes {
        [y, u, v, ..] => [*y, *u, *v],
        [data] => {
            let data = *data;
            let u_offset = stride * height;
            let v_offset = u_offset + src_strides[1] * src_heights[1];
            let end = v_offset + src_strides[2] * src_heights[2];
            if data.len() < end {
                return Err(Error::Invalid(format!("source too short: {} < {}", data.len(), end).into()));
            }
            [&data[..u_offset], &data[u_offset..v_offset], &data[v_offset..end]]
        }
        _ => return Err(Error::Invalid(format!("plane count: {}", planes.len()).into())),
    };

    let widths = [dst.width as usize, dst.chroma_width(), dst.chroma_width()];
    let dst_strides = dst.strides;
    let (y, u, v) = dst.planes_mut();

    for (index, target) in [y, u, v].into_iter().enumerate() {
        let (src, src_stride, dst_stride, width, rows) = (sources[index], src_strides[index], dst_strides[index], widths[index], src_heights[index]);
        let needed = src_stride * (rows - 1) + width;
        if src.len() < needed {
            return Err(Error::Invalid(format!("plane {} too short: {} < {}", index, src.len(), needed).into()));
        }

        if src_stride == dst_stride {
            let len = (src_stride * rows).min(src.len());
            target[..len].copy_from_slice(&src[..len]);
        } else {
            for row in 0..rows {
                target[row * dst_stride..row * dst_stride + width].copy_from_slice(&src[row * src_stride..row * src_stride + width]);
            }
        }
    }

    Ok(())
}

type TranscodeFn = fn(&[&[u8]], usize, &mut Yuv420Image) -> Result<()>;

/// Turns device frames of one fixed format into 4:2:0 encoder input.
#[derive(Debug)]
pub struct Transcoder {
    format: PixelFormat,
    width: u32,
    height: u32,
    stride: usize,
    transcode_fn: TranscodeFn,
}

impl Transcoder {
    pub fn new(format: PixelFormat, width: u32, height: u32, stride: u32) -> Result<Self> {
        validate_dimensions(width, height)?;

        let transcode_fn: TranscodeFn = match format {
            PixelFormat::RGB565 => |planes, stride, dst| rgb565_to_yuv420(planes[0], stride, dst),
            PixelFormat::BGR888 => |planes, stride, dst| rgb24_to_yuv420(planes[0], stride, dst),
            PixelFormat::RGB888 => |planes, stride, dst| bgr24_to_yuv420(planes[0], stride, dst),
            PixelFormat::YUV420 => copy_yuv420,
            _ => return Err(unsupported_error!(format)),
        };

        if (stride as usize) < format.row_bytes(width) {
            return Err(invalid_param_error!(stride));
        }

        Ok(Self {
            format,
            width,
            height,
            stride: stride as usize,
            transcode_fn,
        })
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn new_image(&self) -> Result<Yuv420Image> {
        Yuv420Image::new(self.width, self.height)
    }

    pub fn transcode(&self, planes: &[&[u8]], dst: &mut Yuv420Image) -> Result<()> {
        if planes.is_empty() {
            return Err(Error::Invalid("no planes".into()));
        }
        if dst.width != self.width || dst.height != self.height {
            return Err(invalid_param_error!((dst.width, dst.height)));
        }
        (self.transcode_fn)(planes, self.stride, dst)
    }
}
