use image::ImageFormat;
use log::debug;
use smallvec::SmallVec;

use crate::{
    clamp_u8,
    error::Error,
    format::{ComponentLayout, FormatFamily, FormatFlags, PixelFormat, PlaneLayouts},
    frame::{Frame, Raster, RASTER_BYTES_PER_PIXEL},
    invalid_param_error, unsupported_error, Result,
};

// Full-range BT.601 in 16.16 fixed point.
const FIX_HALF: i32 = 1 << 15;

#[inline]
pub fn yuv_to_rgb(y: u8, u: u8, v: u8) -> (u8, u8, u8) {
    let y = y as i32;
    let d = u as i32 - 128;
    let e = v as i32 - 128;

    let r = y + ((91881 * e + FIX_HALF) >> 16);
    let g = y + ((-22554 * d - 46802 * e + FIX_HALF) >> 16);
    let b = y + ((116130 * d + FIX_HALF) >> 16);

    (clamp_u8(r), clamp_u8(g), clamp_u8(b))
}

#[inline]
pub fn rgb_to_yuv(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let (r, g, b) = (r as i32, g as i32, b as i32);

    let y = (19595 * r + 38470 * g + 7471 * b + FIX_HALF) >> 16;
    let u = ((-11059 * r - 21709 * g + 32768 * b + FIX_HALF) >> 16) + 128;
    let v = ((32768 * r - 27439 * g - 5329 * b + FIX_HALF) >> 16) + 128;

    (clamp_u8(y), clamp_u8(u), clamp_u8(v))
}

#[inline]
fn put_pixel(dst: &mut [u8], (r, g, b): (u8, u8, u8)) {
    dst[0] = b;
    dst[1] = g;
    dst[2] = r;
    dst[3] = 0xFF;
}

#[derive(Clone, Debug)]
struct ConverterParams {
    format: PixelFormat,
    width: usize,
    height: usize,
    stride: usize,
    layouts: PlaneLayouts,
}

type ConvertFn = fn(&ConverterParams, &[&[u8]], &mut [u8]) -> Result<()>;

/// Converts device frames into display rasters.
///
/// The conversion routine is resolved once in `configure`, so the per-frame
/// path does not branch on the pixel format.
#[derive(Default)]
pub struct FormatConverter {
    params: Option<ConverterParams>,
    convert_fn: Option<ConvertFn>,
}

impl FormatConverter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn configure(&mut self, format: PixelFormat, width: u32, height: u32, stride: u32) -> Result<()> {
        self.params = None;
        self.convert_fn = None;

        if width == 0 || height == 0 {
            return Err(invalid_param_error!((width, height)));
        }

        let desc = format.descriptor();
        let convert_fn: ConvertFn = match desc.family {
            FormatFamily::PackedRgb => convert_rgb,
            FormatFamily::PackedYuv => {
                if width % 2 != 0 {
                    return Err(invalid_param_error!(width));
                }
                convert_yuv_packed
            }
            FormatFamily::PlanarYuv => convert_yuv_planar,
            FormatFamily::SemiPlanarYuv => convert_yuv_semi_planar,
            FormatFamily::Compressed => convert_mjpeg,
        };

        let layouts = if desc.family == FormatFamily::Compressed {
            PlaneLayouts::new()
        } else {
            format.plane_layout(width, height, stride)?
        };

        debug!("format converter configured. format: {}, size: {}x{}, stride: {}", format, width, height, stride);

        self.params = Some(ConverterParams {
            format,
            width: width as usize,
            height: height as usize,
            stride: stride as usize,
            layouts,
        });
        self.convert_fn = Some(convert_fn);

        Ok(())
    }

    pub fn is_configured(&self) -> bool {
        self.params.is_some()
    }

    pub fn format(&self) -> Option<PixelFormat> {
        self.params.as_ref().map(|params| params.format)
    }

    /// True when frames can be wrapped as rasters without conversion.
    pub fn is_zero_copy(&self) -> bool {
        self.params.as_ref().is_some_and(|params| params.format.is_displayable() && params.stride % RASTER_BYTES_PER_PIXEL == 0)
    }

    pub fn convert(&self, planes: &[&[u8]]) -> Result<Raster> {
        let params = self.params()?;
        let mut data = vec![0u8; params.width * params.height * RASTER_BYTES_PER_PIXEL];
        self.convert_into(planes, &mut data)?;
        Ok(Raster::from_vec(params.width as u32, params.height as u32, data))
    }

    /// Converts into a caller-provided raster buffer of `width * 4 * height` bytes.
    pub fn convert_into(&self, planes: &[&[u8]], dst: &mut [u8]) -> Result<()> {
        let params = self.params()?;
        let convert_fn = self.convert_fn.ok_or_else(|| Error::NotRunning("format converter".into()))?;

        let expected = params.width * params.height * RASTER_BYTES_PER_PIXEL;
        if dst.len() < expected {
            return Err(Error::Invalid(format!("raster too short: {} < {}", dst.len(), expected).into()));
        }
        if planes.is_empty() {
            return Err(Error::Invalid("no planes".into()));
        }

        convert_fn(params, planes, &mut dst[..expected])
    }

    /// Produces the raster for a frame, sharing the plane when its layout
    /// is already displayable.
    pub fn convert_frame(&self, frame: &Frame) -> Result<Raster> {
        let params = self.params()?;

        let raster = match frame.planes().first() {
            Some(plane) if self.is_zero_copy() => Raster::from_plane(params.width as u32, params.height as u32, params.stride, plane.clone())?,
            _ => self.convert(&frame.plane_slices())?,
        };

        Ok(raster.with_timestamp(frame.timestamp))
    }

    fn params(&self) -> Result<&ConverterParams> {
        self.params.as_ref().ok_or_else(|| Error::NotRunning("format converter".into()))
    }
}

// Splits input into the per-plane slices of the device layout. A single
// contiguous plane is accepted for multi-planar formats.
fn resolve_planes<'a>(params: &ConverterParams, planes: &[&'a [u8]]) -> Result<SmallVec<[&'a [u8]; 3]>> {
    let layouts = &params.layouts;
    let mut resolved = SmallVec::new();

    if planes.len() >= layouts.len() {
        for (plane, layout) in planes.iter().zip(layouts.iter()) {
            if plane.len() < layout.size() {
                return Err(Error::Invalid(format!("plane too short: {} < {}", plane.len(), layout.size()).into()));
            }
            resolved.push(*plane);
        }
    } else if planes.len() == 1 {
        let data = planes[0];
        for layout in layouts.iter() {
            let end = layout.offset + layout.size();
            if data.len() < end {
                return Err(Error::Invalid(format!("frame too short: {} < {}", data.len(), end).into()));
            }
            resolved.push(&data[layout.offset..end]);
        }
    } else {
        return Err(Error::Invalid(format!("plane count: {} for {:?}", planes.len(), params.format).into()));
    }

    Ok(resolved)
}

fn convert_rgb(params: &ConverterParams, planes: &[&[u8]], dst: &mut [u8]) -> Result<()> {
    let desc = params.format.descriptor();
    let ComponentLayout::Rgb {
        r,
        g,
        b,
    } = desc.layout
    else {
        return Err(unsupported_error!(params.format));
    };
    let bpp = desc.bytes_per_pixel as usize;
    let src = resolve_planes(params, planes)?[0];
    let row_bytes = params.width * bpp;

    for (y, out_row) in dst.chunks_exact_mut(params.width * RASTER_BYTES_PER_PIXEL).enumerate() {
        let row = &src[y * params.stride..y * params.stride + row_bytes];
        for (pixel, out) in row.chunks_exact(bpp).zip(out_row.chunks_exact_mut(RASTER_BYTES_PER_PIXEL)) {
            let word = pixel.iter().enumerate().fold(0u32, |word, (i, byte)| word | (*byte as u32) << (8 * i));
            put_pixel(out, (r.extract(word), g.extract(word), b.extract(word)));
        }
    }

    Ok(())
}

fn convert_yuv_packed(params: &ConverterParams, planes: &[&[u8]], dst: &mut [u8]) -> Result<()> {
    let ComponentLayout::Yuv {
        y_pos,
        cb_pos,
    } = params.format.descriptor().layout
    else {
        return Err(unsupported_error!(params.format));
    };
    let (y_pos, cb_pos) = (y_pos as usize, cb_pos as usize);
    let cr_pos = (cb_pos + 2) % 4;
    let src = resolve_planes(params, planes)?[0];
    let row_bytes = params.width * 2;

    for (y, out_row) in dst.chunks_exact_mut(params.width * RASTER_BYTES_PER_PIXEL).enumerate() {
        let row = &src[y * params.stride..y * params.stride + row_bytes];
        for (macro_pixel, out) in row.chunks_exact(4).zip(out_row.chunks_exact_mut(RASTER_BYTES_PER_PIXEL * 2)) {
            let (cb, cr) = (macro_pixel[cb_pos], macro_pixel[cr_pos]);
            put_pixel(&mut out[..4], yuv_to_rgb(macro_pixel[y_pos], cb, cr));
            put_pixel(&mut out[4..], yuv_to_rgb(macro_pixel[y_pos + 2], cb, cr));
        }
    }

    Ok(())
}

fn convert_yuv_planar(params: &ConverterParams, planes: &[&[u8]], dst: &mut [u8]) -> Result<()> {
    let desc = params.format.descriptor();
    let (shift_x, shift_y) = (desc.chroma_shift_x as usize, desc.chroma_shift_y as usize);
    let planes = resolve_planes(params, planes)?;
    let (y_plane, u_plane, v_plane) = if desc.flags.contains(FormatFlags::SwapUV) {
        (planes[0], planes[2], planes[1])
    } else {
        (planes[0], planes[1], planes[2])
    };
    let chroma_stride = params.layouts[1].stride;

    for (y, out_row) in dst.chunks_exact_mut(params.width * RASTER_BYTES_PER_PIXEL).enumerate() {
        let luma = &y_plane[y * params.stride..];
        let chroma_offset = (y >> shift_y) * chroma_stride;
        let u_row = &u_plane[chroma_offset..];
        let v_row = &v_plane[chroma_offset..];
        for (x, out) in out_row.chunks_exact_mut(RASTER_BYTES_PER_PIXEL).enumerate() {
            let cx = x >> shift_x;
            put_pixel(out, yuv_to_rgb(luma[x], u_row[cx], v_row[cx]));
        }
    }

    Ok(())
}

fn convert_yuv_semi_planar(params: &ConverterParams, planes: &[&[u8]], dst: &mut [u8]) -> Result<()> {
    let desc = params.format.descriptor();
    let (shift_x, shift_y) = (desc.chroma_shift_x as usize, desc.chroma_shift_y as usize);
    let swap = desc.flags.contains(FormatFlags::SwapUV);
    let planes = resolve_planes(params, planes)?;
    let chroma_stride = params.layouts[1].stride;

    for (y, out_row) in dst.chunks_exact_mut(params.width * RASTER_BYTES_PER_PIXEL).enumerate() {
        let luma = &planes[0][y * params.stride..];
        let chroma = &planes[1][(y >> shift_y) * chroma_stride..];
        for (x, out) in out_row.chunks_exact_mut(RASTER_BYTES_PER_PIXEL).enumerate() {
            let index = (x >> shift_x) * 2;
            let (cb, cr) = if swap {
                (chroma[index + 1], chroma[index])
            } else {
                (chroma[index], chroma[index + 1])
            };
            put_pixel(out, yuv_to_rgb(luma[x], cb, cr));
        }
    }

    Ok(())
}

fn convert_mjpeg(params: &ConverterParams, planes: &[&[u8]], dst: &mut [u8]) -> Result<()> {
    let image = image::load_from_memory_with_format(planes[0], ImageFormat::Jpeg).map_err(|err| Error::DecodeFailed(err.to_string().into()))?.to_rgb8();

    if image.width() as usize != params.width || image.height() as usize != params.height {
        return Err(Error::Invalid(format!("jpeg size: {}x{}", image.width(), image.height()).into()));
    }

    for (pixel, out) in image.pixels().zip(dst.chunks_exact_mut(RASTER_BYTES_PER_PIXEL)) {
        put_pixel(out, (pixel[0], pixel[1], pixel[2]));
    }

    Ok(())
}
