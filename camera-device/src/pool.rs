use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use camera_core::{error::Error, invalid_param_error, Result};
use log::{debug, info, trace, warn};
use smallvec::SmallVec;

use crate::{
    device::{Device, FrameBuffer, StreamConfiguration, StreamRole},
    request::{BufferId, Controls, Request, RequestBuffer, RequestId, ReuseFlag},
};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BufferState {
    /// Waiting in its stream's free-queue.
    Free,
    /// Attached to a request owned by the device.
    InFlight(RequestId),
    /// Completed, waiting for the control loop.
    Done,
}

/// What `BufferPool::recycle` did with a buffer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Recycled {
    Free,
    Submitted(RequestId),
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct BufferCensus {
    pub total: usize,
    pub free: usize,
    pub in_flight: usize,
    pub done: usize,
}

struct BufferSlot {
    stream: StreamRole,
    state: BufferState,
    buffer: Arc<dyn FrameBuffer>,
}

#[derive(Default)]
struct PoolState {
    running: bool,
    slots: Vec<BufferSlot>,
    free_buffers: HashMap<StreamRole, VecDeque<BufferId>>,
    free_requests: VecDeque<Request>,
    done_queue: VecDeque<Request>,
    streams: HashMap<StreamRole, StreamConfiguration>,
    next_request_id: u64,
    raw_requested: bool,
}

impl PoolState {
    fn release(&mut self, ids: &[BufferId]) {
        for id in ids {
            if let Some(slot) = self.slots.get_mut(id.0) {
                slot.state = BufferState::Free;
                self.free_buffers.entry(slot.stream).or_default().push_back(*id);
            }
        }
    }
}

/// Owns every buffer of a running capture and tracks where each one is.
///
/// A single lock guards the buffer states, the per-stream free-queues, the
/// done-queue and the free-request queue. The device is never called with
/// the lock held since its completion handler takes the same lock.
#[derive(Default)]
pub struct BufferPool {
    state: Mutex<PoolState>,
}

impl BufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    /// Allocates `buffers_per_stream` buffers for each stream and returns one
    /// request per viewfinder buffer, ready to be queued.
    ///
    /// Any allocation failure releases what was allocated and leaves the pool
    /// stopped.
    pub fn start(&self, device: &mut dyn Device, streams: &[StreamConfiguration], buffers_per_stream: usize, controls: &Controls) -> Result<Vec<Request>> {
        if buffers_per_stream == 0 {
            return Err(invalid_param_error!(buffers_per_stream));
        }
        if self.lock().running {
            return Err(Error::StartFailed("buffer pool already started".into()));
        }
        if !streams.iter().any(|stream| stream.role == StreamRole::Viewfinder) {
            return Err(Error::Invalid("no viewfinder stream".into()));
        }

        let mut slots = Vec::new();
        let mut free_buffers: HashMap<StreamRole, VecDeque<BufferId>> = HashMap::new();

        for stream in streams {
            let buffers = match device.allocate(stream, buffers_per_stream) {
                Ok(buffers) if !buffers.is_empty() => buffers,
                Ok(_) => {
                    device.release();
                    return Err(Error::Exhausted(format!("no buffers for {:?} stream", stream.role).into()));
                }
                Err(err) => {
                    warn!("buffer allocation failed. stream: {:?}, error: {}", stream.role, err);
                    device.release();
                    return Err(err);
                }
            };

            debug!("allocated {} buffers. stream: {:?}, size: {}", buffers.len(), stream.role, stream.frame_size);

            let queue = free_buffers.entry(stream.role).or_default();
            for buffer in buffers {
                queue.push_back(BufferId(slots.len()));
                slots.push(BufferSlot {
                    stream: stream.role,
                    state: BufferState::Free,
                    buffer,
                });
            }
        }

        let mut state = self.lock();
        let mut requests = Vec::new();

        if let Some(queue) = free_buffers.get_mut(&StreamRole::Viewfinder) {
            while let Some(id) = queue.pop_front() {
                let request_id = RequestId(state.next_request_id);
                state.next_request_id += 1;

                let mut request = Request::new(request_id);
                *request.controls_mut() = controls.clone();
                request.add_buffer(StreamRole::Viewfinder, id, slots[id.0].buffer.clone())?;
                slots[id.0].state = BufferState::InFlight(request_id);
                requests.push(request);
            }
        }

        info!("buffer pool started. streams: {}, buffers: {}, requests: {}", streams.len(), slots.len(), requests.len());

        state.running = true;
        state.slots = slots;
        state.free_buffers = free_buffers;
        state.free_requests = VecDeque::with_capacity(requests.len());
        state.done_queue = VecDeque::with_capacity(requests.len());
        state.streams = streams.iter().map(|stream| (stream.role, *stream)).collect();
        state.raw_requested = false;

        Ok(requests)
    }

    /// Forgets every buffer and request. Returns the number of completed
    /// requests that were never processed. Safe to call repeatedly.
    pub fn stop(&self) -> usize {
        let mut state = self.lock();
        if !state.running {
            return 0;
        }

        let discarded = state.done_queue.len();
        let next_request_id = state.next_request_id;
        *state = PoolState {
            next_request_id,
            ..Default::default()
        };

        info!("buffer pool stopped. discarded: {}", discarded);

        discarded
    }

    pub fn stream(&self, role: StreamRole) -> Option<StreamConfiguration> {
        self.lock().streams.get(&role).copied()
    }

    /// Hands a request to the device.
    ///
    /// A request can be queued once per reuse. If the device refuses it, its
    /// buffers go back to their free-queues and the request is dropped.
    pub fn queue(&self, device: &mut dyn Device, mut request: Request) -> Result<()> {
        if !self.lock().running {
            return Err(Error::NotRunning("buffer pool".into()));
        }

        let ids: SmallVec<[BufferId; 2]> = request.buffers().iter().map(|buffer| buffer.id).collect();
        let request_id = request.id();

        if let Err(err) = request.mark_queued() {
            self.return_buffers(&ids);
            return Err(err);
        }

        if let Err(err) = device.queue_request(request) {
            warn!("failed to queue request. id: {:?}, error: {}", request_id, err);
            self.return_buffers(&ids);
            return Err(match err {
                Error::SubmitFailed(_) => err,
                err => Error::SubmitFailed(err.to_string().into()),
            });
        }

        trace!("request queued. id: {:?}, buffers: {}", request_id, ids.len());

        Ok(())
    }

    fn return_buffers(&self, ids: &[BufferId]) {
        let mut state = self.lock();
        if state.running {
            state.release(ids);
        }
    }

    /// Completion side: marks the request's buffers done and appends it to
    /// the done-queue. Returns false when the request was dropped because
    /// the pool is stopped or the request belongs to an earlier run.
    pub fn complete(&self, request: Request) -> bool {
        let mut state = self.lock();
        if !state.running {
            return false;
        }

        let expected = BufferState::InFlight(request.id());
        if request.buffers().iter().any(|buffer| state.slots.get(buffer.id.0).map(|slot| slot.state) != Some(expected)) {
            debug!("stale request dropped. id: {:?}", request.id());
            return false;
        }

        for buffer in request.buffers() {
            state.slots[buffer.id.0].state = BufferState::Done;
        }
        state.done_queue.push_back(request);

        true
    }

    pub fn pop_done(&self) -> Option<Request> {
        self.lock().done_queue.pop_front()
    }

    pub fn done_count(&self) -> usize {
        self.lock().done_queue.len()
    }

    /// Detaches the buffers of a processed request and parks the request in
    /// the free-request queue. The returned buffers stay `Done` until they
    /// are recycled.
    pub fn reuse(&self, mut request: Request) -> SmallVec<[RequestBuffer; 2]> {
        let buffers = request.reuse(ReuseFlag::empty());

        let mut state = self.lock();
        if state.running {
            state.free_requests.push_back(request);
        }

        buffers
    }

    /// Gives a processed buffer back.
    ///
    /// A viewfinder buffer is attached to a waiting free request which is
    /// queued right away, together with a raw buffer if raw capture was
    /// requested. Otherwise the buffer joins its stream's free-queue.
    pub fn recycle(&self, device: &mut dyn Device, buffer: RequestBuffer) -> Result<Recycled> {
        let request = {
            let mut guard = self.lock();
            let state = &mut *guard;
            if !state.running {
                return Err(Error::NotRunning("buffer pool".into()));
            }

            let slot = state.slots.get_mut(buffer.id.0).ok_or_else(|| invalid_param_error!(buffer.id))?;
            if slot.state != BufferState::Done {
                return Err(Error::Invalid(format!("buffer {:?} recycled while {:?}", buffer.id, slot.state).into()));
            }

            match state.free_requests.pop_front() {
                Some(request) if buffer.stream == StreamRole::Viewfinder => {
                    slot.state = BufferState::InFlight(request.id());
                    request
                }
                request => {
                    if let Some(request) = request {
                        state.free_requests.push_front(request);
                    }
                    slot.state = BufferState::Free;
                    state.free_buffers.entry(buffer.stream).or_default().push_back(buffer.id);
                    return Ok(Recycled::Free);
                }
            }
        };

        let mut request = request;
        request.add_buffer(buffer.stream, buffer.id, buffer.buffer)?;

        if let Err(err) = self.attach_raw(&mut request) {
            warn!("raw capture postponed. error: {}", err);
        }

        let request_id = request.id();
        self.queue(device, request)?;

        Ok(Recycled::Submitted(request_id))
    }

    /// Asks for a raw buffer to ride along with the next viewfinder request.
    pub fn request_raw_capture(&self) -> Result<()> {
        let mut state = self.lock();
        if !state.running {
            return Err(Error::NotRunning("buffer pool".into()));
        }
        if !state.streams.contains_key(&StreamRole::RawCapture) {
            return Err(Error::NotFound("raw stream not configured".into()));
        }
        state.raw_requested = true;
        Ok(())
    }

    pub fn is_raw_requested(&self) -> bool {
        self.lock().raw_requested
    }

    pub fn cancel_raw_capture(&self) {
        self.lock().raw_requested = false;
    }

    /// Attaches a free raw buffer if raw capture was requested. The request
    /// flag stays set when no raw buffer is free.
    pub fn attach_raw(&self, request: &mut Request) -> Result<()> {
        if request.buffer(StreamRole::RawCapture).is_some() {
            return Ok(());
        }

        let (id, buffer) = {
            let mut guard = self.lock();
            let state = &mut *guard;
            if !state.raw_requested {
                return Ok(());
            }

            let id = state
                .free_buffers
                .get_mut(&StreamRole::RawCapture)
                .and_then(VecDeque::pop_front)
                .ok_or_else(|| Error::Exhausted("no free raw buffer".into()))?;
            let slot = &mut state.slots[id.0];
            slot.state = BufferState::InFlight(request.id());
            state.raw_requested = false;
            (id, slot.buffer.clone())
        };

        request.add_buffer(StreamRole::RawCapture, id, buffer)
    }

    pub fn state_of(&self, id: BufferId) -> Option<BufferState> {
        self.lock().slots.get(id.0).map(|slot| slot.state)
    }

    pub fn free_request_count(&self) -> usize {
        self.lock().free_requests.len()
    }

    /// Counts the buffers of one stream by state.
    pub fn census(&self, stream: StreamRole) -> BufferCensus {
        let state = self.lock();
        let mut census = BufferCensus::default();

        for slot in state.slots.iter().filter(|slot| slot.stream == stream) {
            census.total += 1;
            match slot.state {
                BufferState::Free => census.free += 1,
                BufferState::InFlight(_) => census.in_flight += 1,
                BufferState::Done => census.done += 1,
            }
        }

        census
    }
}
