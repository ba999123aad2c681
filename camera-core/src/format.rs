use std::fmt;

use bitflags::bitflags;
use num_enum::TryFromPrimitive;
use smallvec::SmallVec;
use strum::{EnumCount, EnumIter};

use crate::{ceil_rshift, error::Error, invalid_param_error, unsupported_error, Result};

pub const fn fourcc(code: &[u8; 4]) -> u32 {
    u32::from_le_bytes(*code)
}

/// Pixel encodings a capture device can deliver. Multi-byte RGB words are
/// little-endian, so `XRGB8888` is stored as B, G, R, X in memory.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, EnumCount, EnumIter, Eq, Hash, PartialEq, TryFromPrimitive)]
#[allow(clippy::upper_case_acronyms)]
pub enum PixelFormat {
    #[default]
    RGB565 = 0,
    RGB888,
    BGR888,
    XRGB8888,
    ARGB8888,
    XBGR8888,
    ABGR8888,
    RGBA8888,
    BGRA8888,
    YUYV,
    YVYU,
    UYVY,
    VYUY,
    NV12,
    NV21,
    NV16,
    NV61,
    NV24,
    NV42,
    YUV420,
    YVU420,
    YUV422,
    MJPEG,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FormatFamily {
    PackedRgb,
    PackedYuv,
    PlanarYuv,
    SemiPlanarYuv,
    Compressed,
}

bitflags! {
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct FormatFlags: u32 {
        const Alpha = 1 << 0;
        // chroma planes or interleaved chroma pairs are stored Cr first
        const SwapUV = 1 << 1;
    }
}

macro_rules! fmt_flags {
    () => {
        FormatFlags::empty()
    };
    ($($flag:ident)|+) => {
        FormatFlags::from_bits_truncate(0 $(| FormatFlags::$flag.bits())+)
    };
}

/// Bit position of one colour channel inside a little-endian pixel word.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Channel {
    pub shift: u8,
    pub bits: u8,
}

impl Channel {
    const fn new(shift: u8, bits: u8) -> Self {
        Self {
            shift,
            bits,
        }
    }

    #[inline]
    pub fn max(&self) -> u32 {
        (1u32 << self.bits) - 1
    }

    /// Extracts the channel from `word` and scales it to 8 bits.
    #[inline]
    pub fn extract(&self, word: u32) -> u8 {
        let max = self.max();
        let value = (word >> self.shift) & max;
        (value * 255 / max) as u8
    }

    /// Inverse of `extract`, used to synthesize pixels.
    #[inline]
    pub fn encode(&self, value: u8) -> u32 {
        let max = self.max();
        ((value as u32 * max + 127) / 255) << self.shift
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ComponentLayout {
    None,
    Rgb {
        r: Channel,
        g: Channel,
        b: Channel,
    },
    // byte offsets of the first luma sample and of Cb in a 4-byte macropixel
    Yuv {
        y_pos: u8,
        cb_pos: u8,
    },
}

#[derive(Clone, Copy, Debug)]
pub struct FormatDescriptor {
    pub fourcc: u32,
    pub family: FormatFamily,
    pub planes: u8,
    pub bytes_per_pixel: u8,
    pub chroma_shift_x: u8,
    pub chroma_shift_y: u8,
    pub flags: FormatFlags,
    pub layout: ComponentLayout,
}

impl FormatDescriptor {
    const fn packed_rgb(code: &[u8; 4], bpp: u8, r: Channel, g: Channel, b: Channel, flags: FormatFlags) -> Self {
        Self {
            fourcc: fourcc(code),
            family: FormatFamily::PackedRgb,
            planes: 1,
            bytes_per_pixel: bpp,
            chroma_shift_x: 0,
            chroma_shift_y: 0,
            flags,
            layout: ComponentLayout::Rgb {
                r,
                g,
                b,
            },
        }
    }

    const fn packed_yuv(code: &[u8; 4], y_pos: u8, cb_pos: u8) -> Self {
        Self {
            fourcc: fourcc(code),
            family: FormatFamily::PackedYuv,
            planes: 1,
            bytes_per_pixel: 2,
            chroma_shift_x: 1,
            chroma_shift_y: 0,
            flags: fmt_flags!(),
            layout: ComponentLayout::Yuv {
                y_pos,
                cb_pos,
            },
        }
    }

    const fn semi_planar(code: &[u8; 4], shift_x: u8, shift_y: u8, flags: FormatFlags) -> Self {
        Self {
            fourcc: fourcc(code),
            family: FormatFamily::SemiPlanarYuv,
            planes: 2,
            bytes_per_pixel: 1,
            chroma_shift_x: shift_x,
            chroma_shift_y: shift_y,
            flags,
            layout: ComponentLayout::None,
        }
    }

    const fn planar(code: &[u8; 4], shift_x: u8, shift_y: u8, flags: FormatFlags) -> Self {
        Self {
            fourcc: fourcc(code),
            family: FormatFamily::PlanarYuv,
            planes: 3,
            bytes_per_pixel: 1,
            chroma_shift_x: shift_x,
            chroma_shift_y: shift_y,
            flags,
            layout: ComponentLayout::None,
        }
    }

    const fn compressed(code: &[u8; 4]) -> Self {
        Self {
            fourcc: fourcc(code),
            family: FormatFamily::Compressed,
            planes: 1,
            bytes_per_pixel: 0,
            chroma_shift_x: 0,
            chroma_shift_y: 0,
            flags: fmt_flags!(),
            layout: ComponentLayout::None,
        }
    }
}

const R8_16: Channel = Channel::new(16, 8);
const G8_8: Channel = Channel::new(8, 8);
const B8_0: Channel = Channel::new(0, 8);
const R8_0: Channel = Channel::new(0, 8);
const B8_16: Channel = Channel::new(16, 8);

static FORMAT_DESC: [FormatDescriptor; PixelFormat::COUNT] = [
    // RGB565
    FormatDescriptor::packed_rgb(b"RG16", 2, Channel::new(11, 5), Channel::new(5, 6), Channel::new(0, 5), fmt_flags!()),
    // RGB888
    FormatDescriptor::packed_rgb(b"RG24", 3, R8_16, G8_8, B8_0, fmt_flags!()),
    // BGR888
    FormatDescriptor::packed_rgb(b"BG24", 3, R8_0, G8_8, B8_16, fmt_flags!()),
    // XRGB8888
    FormatDescriptor::packed_rgb(b"XR24", 4, R8_16, G8_8, B8_0, fmt_flags!()),
    // ARGB8888
    FormatDescriptor::packed_rgb(b"AR24", 4, R8_16, G8_8, B8_0, fmt_flags!(Alpha)),
    // XBGR8888
    FormatDescriptor::packed_rgb(b"XB24", 4, R8_0, G8_8, B8_16, fmt_flags!()),
    // ABGR8888
    FormatDescriptor::packed_rgb(b"AB24", 4, R8_0, G8_8, B8_16, fmt_flags!(Alpha)),
    // RGBA8888
    FormatDescriptor::packed_rgb(b"RA24", 4, Channel::new(24, 8), Channel::new(16, 8), Channel::new(8, 8), fmt_flags!(Alpha)),
    // BGRA8888
    FormatDescriptor::packed_rgb(b"BA24", 4, Channel::new(8, 8), Channel::new(16, 8), Channel::new(24, 8), fmt_flags!(Alpha)),
    // YUYV
    FormatDescriptor::packed_yuv(b"YUYV", 0, 1),
    // YVYU
    FormatDescriptor::packed_yuv(b"YVYU", 0, 3),
    // UYVY
    FormatDescriptor::packed_yuv(b"UYVY", 1, 0),
    // VYUY
    FormatDescriptor::packed_yuv(b"VYUY", 1, 2),
    // NV12
    FormatDescriptor::semi_planar(b"NV12", 1, 1, fmt_flags!()),
    // NV21
    FormatDescriptor::semi_planar(b"NV21", 1, 1, fmt_flags!(SwapUV)),
    // NV16
    FormatDescriptor::semi_planar(b"NV16", 1, 0, fmt_flags!()),
    // NV61
    FormatDescriptor::semi_planar(b"NV61", 1, 0, fmt_flags!(SwapUV)),
    // NV24
    FormatDescriptor::semi_planar(b"NV24", 0, 0, fmt_flags!()),
    // NV42
    FormatDescriptor::semi_planar(b"NV42", 0, 0, fmt_flags!(SwapUV)),
    // YUV420
    FormatDescriptor::planar(b"YU12", 1, 1, fmt_flags!()),
    // YVU420
    FormatDescriptor::planar(b"YV12", 1, 1, fmt_flags!(SwapUV)),
    // YUV422
    FormatDescriptor::planar(b"YU16", 1, 0, fmt_flags!()),
    // MJPEG
    FormatDescriptor::compressed(b"MJPG"),
];

/// Geometry of one plane as laid out by the device.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PlaneLayout {
    pub stride: usize,
    pub height: usize,
    pub offset: usize,
}

impl PlaneLayout {
    pub fn size(&self) -> usize {
        self.stride * self.height
    }
}

pub type PlaneLayouts = SmallVec<[PlaneLayout; 3]>;

impl PixelFormat {
    pub fn descriptor(&self) -> &'static FormatDescriptor {
        &FORMAT_DESC[*self as usize]
    }

    pub fn from_fourcc(code: u32) -> Result<Self> {
        FORMAT_DESC
            .iter()
            .position(|desc| desc.fourcc == code)
            .and_then(|index| PixelFormat::try_from_primitive(index as u8).ok())
            .ok_or_else(|| unsupported_error!(format!("fourcc: {:#010x}", code)))
    }

    pub fn fourcc(&self) -> u32 {
        self.descriptor().fourcc
    }

    pub fn family(&self) -> FormatFamily {
        self.descriptor().family
    }

    pub fn planes(&self) -> usize {
        self.descriptor().planes as usize
    }

    pub fn is_yuv(&self) -> bool {
        matches!(self.family(), FormatFamily::PackedYuv | FormatFamily::PlanarYuv | FormatFamily::SemiPlanarYuv)
    }

    pub fn has_alpha(&self) -> bool {
        self.descriptor().flags.contains(FormatFlags::Alpha)
    }

    /// Formats whose memory layout already matches the display raster.
    pub fn is_displayable(&self) -> bool {
        matches!(self, PixelFormat::XRGB8888 | PixelFormat::ARGB8888)
    }

    /// Smallest valid stride of the first plane.
    pub fn row_bytes(&self, width: u32) -> usize {
        width as usize * self.descriptor().bytes_per_pixel as usize
    }

    /// Plane geometry for a device buffer with the given first-plane stride.
    pub fn plane_layout(&self, width: u32, height: u32, stride: u32) -> Result<PlaneLayouts> {
        if width == 0 || height == 0 {
            return Err(invalid_param_error!((width, height)));
        }
        if (stride as usize) < self.row_bytes(width) {
            return Err(invalid_param_error!(stride));
        }

        let desc = self.descriptor();
        let stride = stride as usize;
        let height = height as usize;
        let chroma_height = ceil_rshift(height, desc.chroma_shift_y as usize);
        let chroma_width = ceil_rshift(width as usize, desc.chroma_shift_x as usize);
        let mut layouts = PlaneLayouts::new();

        layouts.push(PlaneLayout {
            stride,
            height,
            offset: 0,
        });

        match desc.family {
            FormatFamily::PlanarYuv => {
                let chroma_stride = stride >> desc.chroma_shift_x;
                if chroma_stride < chroma_width {
                    return Err(invalid_param_error!(stride));
                }
                let chroma_size = chroma_stride * chroma_height;
                layouts.push(PlaneLayout {
                    stride: chroma_stride,
                    height: chroma_height,
                    offset: stride * height,
                });
                layouts.push(PlaneLayout {
                    stride: chroma_stride,
                    height: chroma_height,
                    offset: stride * height + chroma_size,
                });
            }
            FormatFamily::SemiPlanarYuv => {
                // interleaved Cb/Cr pairs
                let chroma_stride = (stride >> desc.chroma_shift_x) * 2;
                if chroma_stride < chroma_width * 2 {
                    return Err(invalid_param_error!(stride));
                }
                layouts.push(PlaneLayout {
                    stride: chroma_stride,
                    height: chroma_height,
                    offset: stride * height,
                });
            }
            _ => {}
        }

        Ok(layouts)
    }

    /// Total bytes of a contiguous frame in this format.
    pub fn frame_size(&self, width: u32, height: u32, stride: u32) -> Result<usize> {
        Ok(self.plane_layout(width, height, stride)?.iter().map(PlaneLayout::size).sum())
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = self.fourcc().to_le_bytes();
        write!(f, "{:?} ({})", self, String::from_utf8_lossy(&code))
    }
}

impl TryFrom<u32> for PixelFormat {
    type Error = Error;

    /// Accepts a format index or a fourcc code.
    fn try_from(value: u32) -> Result<Self> {
        if value <= u8::MAX as u32 {
            PixelFormat::try_from_primitive(value as u8).map_err(|_| invalid_param_error!(value))
        } else {
            PixelFormat::from_fourcc(value)
        }
    }
}
