#![allow(dead_code)]

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use camera_core::{error::Error, format::PixelFormat, Result};
use camera_device::{
    pool::BufferPool,
    request::{Controls, Request, RequestStatus},
    CompletionHandler, Device, FrameBuffer, StreamConfiguration, StreamRequest, StreamRole,
};

pub const WIDTH: u32 = 8;
pub const HEIGHT: u32 = 4;

pub struct MockBuffer {
    cookie: u64,
    data: Vec<u8>,
}

impl FrameBuffer for MockBuffer {
    fn cookie(&self) -> u64 {
        self.cookie
    }

    fn plane_count(&self) -> usize {
        1
    }

    fn plane_len(&self, _index: usize) -> usize {
        self.data.len()
    }

    fn read_plane(&self, index: usize, reader: &mut dyn FnMut(&[u8])) -> bool {
        if index != 0 {
            return false;
        }
        reader(&self.data);
        true
    }
}

#[derive(Default)]
pub struct MockState {
    pub queued: VecDeque<Request>,
    pub allocations: usize,
    pub releases: usize,
}

/// Device that keeps queued requests until the test completes them.
#[derive(Default)]
pub struct MockDevice {
    pub state: Arc<Mutex<MockState>>,
    pub fail_allocation_for: Option<StreamRole>,
    pub fail_submissions: usize,
    next_cookie: u64,
    running: bool,
}

impl MockDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take_queued(&self) -> Vec<Request> {
        self.state.lock().unwrap().queued.drain(..).collect()
    }

    pub fn queued_count(&self) -> usize {
        self.state.lock().unwrap().queued.len()
    }

    pub fn releases(&self) -> usize {
        self.state.lock().unwrap().releases
    }
}

impl Device for MockDevice {
    fn id(&self) -> &str {
        "mock"
    }

    fn configure(&mut self, streams: &[StreamRequest]) -> Result<Vec<StreamConfiguration>> {
        Ok(streams.iter().map(|request| stream(request.role)).collect())
    }

    fn allocate(&mut self, stream: &StreamConfiguration, count: usize) -> Result<Vec<Arc<dyn FrameBuffer>>> {
        if self.fail_allocation_for == Some(stream.role) {
            return Err(Error::Exhausted("out of buffer memory".into()));
        }
        self.state.lock().unwrap().allocations += count;

        Ok((0..count)
            .map(|_| {
                self.next_cookie += 1;
                Arc::new(MockBuffer {
                    cookie: self.next_cookie,
                    data: vec![self.next_cookie as u8; stream.frame_size],
                }) as Arc<dyn FrameBuffer>
            })
            .collect())
    }

    fn release(&mut self) {
        self.state.lock().unwrap().releases += 1;
    }

    fn start(&mut self, _handler: CompletionHandler) -> Result<()> {
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.running = false;
        Ok(())
    }

    fn queue_request(&mut self, request: Request) -> Result<()> {
        if self.fail_submissions > 0 {
            self.fail_submissions -= 1;
            return Err(Error::Failed("device busy".into()));
        }
        self.state.lock().unwrap().queued.push_back(request);
        Ok(())
    }

    fn running(&self) -> bool {
        self.running
    }
}

pub fn stream(role: StreamRole) -> StreamConfiguration {
    StreamConfiguration {
        role,
        format: PixelFormat::RGB565,
        width: WIDTH,
        height: HEIGHT,
        stride: WIDTH * 2,
        frame_size: (WIDTH * HEIGHT * 2) as usize,
    }
}

pub fn streams(raw: bool) -> Vec<StreamConfiguration> {
    let mut streams = vec![stream(StreamRole::Viewfinder)];
    if raw {
        streams.push(stream(StreamRole::RawCapture));
    }
    streams
}

/// Starts the pool and queues every initial request.
pub fn start(pool: &BufferPool, device: &mut MockDevice, raw: bool, buffers: usize) {
    let requests = pool.start(device, &streams(raw), buffers, &Controls::default()).unwrap();
    for request in requests {
        pool.queue(device, request).unwrap();
    }
}

pub fn completed(mut request: Request) -> Request {
    request.set_status(RequestStatus::Complete);
    request
}

/// Processes one done request the way the control loop does.
pub fn process(pool: &BufferPool, device: &mut MockDevice, request: Request) {
    let mut buffers = pool.reuse(request);
    buffers.sort_by_key(|buffer| buffer.stream != StreamRole::RawCapture);
    for buffer in buffers {
        pool.recycle(device, buffer).unwrap();
    }
}

pub fn assert_conserved(pool: &BufferPool, role: StreamRole, total: usize) {
    let census = pool.census(role);
    assert_eq!(census.total, total);
    assert_eq!(census.free + census.in_flight + census.done, total);
}
