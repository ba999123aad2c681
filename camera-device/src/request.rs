use std::sync::Arc;

use bitflags::bitflags;
use camera_core::{error::Error, Result};
use smallvec::SmallVec;

use crate::device::{FrameBuffer, StreamRole};

#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct RequestId(pub u64);

/// Index of a buffer in the pool arena.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct BufferId(pub usize);

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum RequestStatus {
    #[default]
    Pending,
    Complete,
    Cancelled,
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct ReuseFlag: u32 {
        const REUSE_BUFFERS = 1 << 0;
    }
}

/// Filled in by the device when the buffer completes.
#[derive(Clone, Debug, Default)]
pub struct FrameMetadata {
    pub sequence: u64,
    // nanoseconds
    pub timestamp: u64,
    pub bytes_used: SmallVec<[usize; 3]>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Controls {
    // (min, max) in microseconds
    pub frame_duration_limits: Option<(u64, u64)>,
}

impl Controls {
    pub fn is_empty(&self) -> bool {
        self.frame_duration_limits.is_none()
    }

    pub fn clear(&mut self) {
        *self = Controls::default();
    }
}

#[derive(Clone, Debug)]
pub struct RequestBuffer {
    pub stream: StreamRole,
    pub id: BufferId,
    pub buffer: Arc<dyn FrameBuffer>,
    pub metadata: FrameMetadata,
}

/// One capture submission: at most one buffer per stream plus controls.
#[derive(Debug)]
pub struct Request {
    id: RequestId,
    status: RequestStatus,
    buffers: SmallVec<[RequestBuffer; 2]>,
    controls: Controls,
    queued: bool,
}

impl Request {
    pub fn new(id: RequestId) -> Self {
        Self {
            id,
            status: RequestStatus::Pending,
            buffers: SmallVec::new(),
            controls: Controls::default(),
            queued: false,
        }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn status(&self) -> RequestStatus {
        self.status
    }

    /// Device side: marks the request finished.
    pub fn set_status(&mut self, status: RequestStatus) {
        self.status = status;
    }

    pub fn add_buffer(&mut self, stream: StreamRole, id: BufferId, buffer: Arc<dyn FrameBuffer>) -> Result<()> {
        if self.buffer(stream).is_some() {
            return Err(Error::Invalid(format!("request {:?} already has a {:?} buffer", self.id, stream).into()));
        }

        self.buffers.push(RequestBuffer {
            stream,
            id,
            buffer,
            metadata: FrameMetadata::default(),
        });

        Ok(())
    }

    pub fn buffer(&self, stream: StreamRole) -> Option<&RequestBuffer> {
        self.buffers.iter().find(|buffer| buffer.stream == stream)
    }

    pub fn buffers(&self) -> &[RequestBuffer] {
        &self.buffers
    }

    pub fn buffers_mut(&mut self) -> &mut [RequestBuffer] {
        &mut self.buffers
    }

    pub fn controls(&self) -> &Controls {
        &self.controls
    }

    pub fn controls_mut(&mut self) -> &mut Controls {
        &mut self.controls
    }

    pub fn is_queued(&self) -> bool {
        self.queued
    }

    pub(crate) fn mark_queued(&mut self) -> Result<()> {
        if self.queued {
            return Err(Error::Invalid(format!("request {:?} queued twice", self.id).into()));
        }
        self.queued = true;
        Ok(())
    }

    /// Makes the request ready for another submission and hands back the
    /// buffers it carried, unless `REUSE_BUFFERS` keeps them attached.
    pub fn reuse(&mut self, flags: ReuseFlag) -> SmallVec<[RequestBuffer; 2]> {
        self.status = RequestStatus::Pending;
        self.queued = false;
        self.controls.clear();

        if flags.contains(ReuseFlag::REUSE_BUFFERS) {
            for buffer in self.buffers.iter_mut() {
                buffer.metadata = FrameMetadata::default();
            }
            SmallVec::new()
        } else {
            std::mem::take(&mut self.buffers)
        }
    }
}
