use std::sync::Arc;

use smallvec::SmallVec;

use crate::{error::Error, invalid_param_error, Result};

pub type Planes = SmallVec<[Arc<[u8]>; 3]>;

/// An owned, immutable copy of one completed capture buffer.
///
/// Cloning a frame shares the plane storage, so every consumer that
/// receives a clone observes the same bytes.
#[derive(Clone, Debug)]
pub struct Frame {
    pub sequence: u64,
    // microseconds
    pub timestamp: u64,
    planes: Planes,
}

impl Frame {
    pub fn new(sequence: u64, timestamp: u64, planes: Planes) -> Self {
        Self {
            sequence,
            timestamp,
            planes,
        }
    }

    pub fn from_slices(sequence: u64, timestamp: u64, planes: &[&[u8]]) -> Self {
        Self::new(sequence, timestamp, planes.iter().map(|plane| Arc::from(*plane)).collect())
    }

    pub fn planes(&self) -> &[Arc<[u8]>] {
        &self.planes
    }

    pub fn plane(&self, index: usize) -> Option<&[u8]> {
        self.planes.get(index).map(|plane| plane.as_ref())
    }

    pub fn plane_slices(&self) -> SmallVec<[&[u8]; 3]> {
        self.planes.iter().map(|plane| plane.as_ref()).collect()
    }

    pub fn size(&self) -> usize {
        self.planes.iter().map(|plane| plane.len()).sum()
    }
}

pub const RASTER_BYTES_PER_PIXEL: usize = 4;

/// A 32-bit interleaved RGB image ready for display.
///
/// Pixels are stored as B, G, R, 0xFF, which is `XRGB8888` read as a
/// little-endian word.
#[derive(Clone, Debug)]
pub struct Raster {
    pub width: u32,
    pub height: u32,
    pub stride: usize,
    pub timestamp: u64,
    data: Arc<[u8]>,
}

impl Raster {
    pub fn new(width: u32, height: u32) -> Self {
        let stride = width as usize * RASTER_BYTES_PER_PIXEL;
        Self {
            width,
            height,
            stride,
            timestamp: 0,
            data: Arc::from(vec![0u8; stride * height as usize]),
        }
    }

    pub(crate) fn from_vec(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            stride: width as usize * RASTER_BYTES_PER_PIXEL,
            timestamp: 0,
            data: Arc::from(data),
        }
    }

    /// Wraps a plane that is already laid out as a raster without copying it.
    pub fn from_plane(width: u32, height: u32, stride: usize, plane: Arc<[u8]>) -> Result<Self> {
        if stride < width as usize * RASTER_BYTES_PER_PIXEL || stride % RASTER_BYTES_PER_PIXEL != 0 {
            return Err(invalid_param_error!(stride));
        }
        if plane.len() < stride * height as usize {
            return Err(Error::Invalid(format!("plane too short: {} < {}", plane.len(), stride * height as usize).into()));
        }

        Ok(Self {
            width,
            height,
            stride,
            timestamp: 0,
            data: plane,
        })
    }

    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn shared_data(&self) -> &Arc<[u8]> {
        &self.data
    }

    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.stride;
        &self.data[start..start + self.width as usize * RASTER_BYTES_PER_PIXEL]
    }

    /// Pixels of one row as `[B, G, R, X]` quads.
    pub fn row_pixels(&self, y: u32) -> &[[u8; 4]] {
        bytemuck::cast_slice(self.row(y))
    }

    pub fn rgb_at(&self, x: u32, y: u32) -> (u8, u8, u8) {
        let [b, g, r, _] = self.row_pixels(y)[x as usize];
        (r, g, b)
    }

    /// Packs the image as tightly laid out R, G, B bytes.
    pub fn to_rgb(&self) -> Vec<u8> {
        let mut rgb = Vec::with_capacity(self.width as usize * self.height as usize * 3);
        for y in 0..self.height {
            for [b, g, r, _] in self.row_pixels(y) {
                rgb.extend_from_slice(&[*r, *g, *b]);
            }
        }
        rgb
    }

    /// True when both rasters share the same storage.
    pub fn shares_storage(&self, plane: &Arc<[u8]>) -> bool {
        Arc::ptr_eq(&self.data, plane)
    }
}
