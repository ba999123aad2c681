use std::{collections::HashMap, sync::Arc};

use camera_core::{
    frame::{Frame, Planes},
    time::nsec_to_usec,
    Result,
};
use log::{debug, trace};
use smallvec::SmallVec;

use crate::{
    device::StreamRole,
    request::{Request, RequestBuffer},
};

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Route {
    Preview,
    Recording,
    Snapshot,
    Raw,
}

pub type FrameHandler = Arc<dyn Fn(Frame) -> Result<()> + Send + Sync>;

/// Copies completed buffers and hands the copies to the consumers.
///
/// Every viewfinder frame goes to preview and recording, and to snapshot
/// once per `request_snapshot`. Raw frames only go to the raw consumer.
#[derive(Default)]
pub struct FanOut {
    handlers: HashMap<Route, FrameHandler>,
    snapshot_requested: bool,
}

impl FanOut {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_handler(&mut self, route: Route, handler: FrameHandler) {
        self.handlers.insert(route, handler);
    }

    pub fn remove_handler(&mut self, route: Route) -> Option<FrameHandler> {
        self.handlers.remove(&route)
    }

    pub fn request_snapshot(&mut self) {
        self.snapshot_requested = true;
    }

    pub fn snapshot_pending(&self) -> bool {
        self.snapshot_requested
    }

    /// Copies the used bytes of every buffer in the request, one frame per
    /// stream. Device buffers can be recycled once this returns.
    pub fn collect(request: &Request) -> SmallVec<[(StreamRole, Frame); 2]> {
        request.buffers().iter().map(|buffer| (buffer.stream, copy_buffer(buffer))).collect()
    }

    /// Delivers one frame. Returns how many consumers received it.
    pub fn route(&mut self, stream: StreamRole, frame: Frame) -> usize {
        let routes: SmallVec<[Route; 3]> = match stream {
            StreamRole::Viewfinder => {
                let mut routes = SmallVec::from_slice(&[Route::Preview, Route::Recording]);
                if std::mem::take(&mut self.snapshot_requested) {
                    routes.push(Route::Snapshot);
                }
                routes
            }
            StreamRole::RawCapture => SmallVec::from_slice(&[Route::Raw]),
        };

        let mut delivered = 0;
        for route in routes {
            let Some(handler) = self.handlers.get(&route) else {
                trace!("no consumer. route: {:?}, sequence: {}", route, frame.sequence);
                continue;
            };
            match handler(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(err) => debug!("frame not delivered. route: {:?}, sequence: {}, error: {}", route, frame.sequence, err),
            }
        }

        delivered
    }

    pub fn dispatch(&mut self, request: &Request) -> usize {
        Self::collect(request).into_iter().map(|(stream, frame)| self.route(stream, frame)).sum()
    }
}

fn copy_buffer(buffer: &RequestBuffer) -> Frame {
    let metadata = &buffer.metadata;
    let mut planes = Planes::new();

    for index in 0..buffer.buffer.plane_count() {
        let used = metadata.bytes_used.get(index).copied();
        buffer.buffer.read_plane(index, &mut |data| {
            let len = used.map_or(data.len(), |used| used.min(data.len()));
            planes.push(Arc::from(&data[..len]));
        });
    }

    Frame::new(metadata.sequence, nsec_to_usec(metadata.timestamp), planes)
}
