use std::{fmt, sync::Arc};

use camera_core::{format::PixelFormat, Result};

use crate::request::Request;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum StreamRole {
    Viewfinder,
    RawCapture,
}

/// What the session asks the device for.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StreamRequest {
    pub role: StreamRole,
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
}

/// What the device agreed to deliver.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StreamConfiguration {
    pub role: StreamRole,
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub frame_size: usize,
}

/// Device-owned frame memory, readable once mapped.
pub trait FrameBuffer: Send + Sync {
    /// Opaque device handle of the buffer.
    fn cookie(&self) -> u64;
    fn plane_count(&self) -> usize;
    fn plane_len(&self, index: usize) -> usize;
    /// Runs `reader` over the mapped bytes of a plane, returns false for an
    /// unknown plane.
    fn read_plane(&self, index: usize, reader: &mut dyn FnMut(&[u8])) -> bool;
}

impl fmt::Debug for dyn FrameBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameBuffer").field("cookie", &self.cookie()).field("planes", &self.plane_count()).finish()
    }
}

/// Called from the device's completion context for every finished or
/// cancelled request.
pub type CompletionHandler = Arc<dyn Fn(Request) + Send + Sync>;

pub trait Device: Send {
    fn id(&self) -> &str;
    fn configure(&mut self, streams: &[StreamRequest]) -> Result<Vec<StreamConfiguration>>;
    fn allocate(&mut self, stream: &StreamConfiguration, count: usize) -> Result<Vec<Arc<dyn FrameBuffer>>>;
    /// Frees all allocated buffers.
    fn release(&mut self);
    fn start(&mut self, handler: CompletionHandler) -> Result<()>;
    /// Stops capturing. Requests still queued complete as cancelled.
    fn stop(&mut self) -> Result<()>;
    fn queue_request(&mut self, request: Request) -> Result<()>;
    fn running(&self) -> bool;
}
