use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex, PoisonError,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use aligned_vec::{avec, AVec, ConstAlign};
use camera_core::{
    align_to,
    convert::rgb_to_yuv,
    error::Error,
    format::{ComponentLayout, FormatFamily, FormatFlags, PixelFormat, PlaneLayouts},
    invalid_param_error, not_found_error,
    time::frame_duration_usec,
    unsupported_error, Result,
};
use crossbeam_queue::ArrayQueue;
use log::{debug, error, info, trace};
use smallvec::SmallVec;

use crate::{
    device::{CompletionHandler, Device, FrameBuffer, StreamConfiguration, StreamRequest, StreamRole},
    request::{FrameMetadata, Request, RequestStatus},
};

const PAGE_SIZE: usize = 4096;
const DEFAULT_FRAME_RATE: u32 = 30;
const IDLE_WAIT: Duration = Duration::from_millis(5);

type PagePlane = AVec<u8, ConstAlign<PAGE_SIZE>>;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TestPattern {
    Solid(u8, u8, u8),
    /// Eight vertical bars that scroll with the frame sequence.
    ColorBars,
}

const BARS: [(u8, u8, u8); 8] = [
    (255, 255, 255),
    (255, 255, 0),
    (0, 255, 255),
    (0, 255, 0),
    (255, 0, 255),
    (255, 0, 0),
    (0, 0, 255),
    (0, 0, 0),
];

impl TestPattern {
    fn color_at(&self, x: u32, width: u32, sequence: u64) -> (u8, u8, u8) {
        match *self {
            TestPattern::Solid(r, g, b) => (r, g, b),
            TestPattern::ColorBars => {
                let bar_width = (width / BARS.len() as u32).max(1) as u64;
                let index = ((x as u64 + sequence * 4) / bar_width) as usize % BARS.len();
                BARS[index]
            }
        }
    }
}

pub struct VirtualBuffer {
    cookie: u64,
    planes: Vec<Mutex<PagePlane>>,
}

impl VirtualBuffer {
    fn new(cookie: u64, layouts: &PlaneLayouts) -> Self {
        Self {
            cookie,
            planes: layouts.iter().map(|layout| Mutex::new(avec![[PAGE_SIZE]| 0u8; layout.size()])).collect(),
        }
    }
}

impl FrameBuffer for VirtualBuffer {
    fn cookie(&self) -> u64 {
        self.cookie
    }

    fn plane_count(&self) -> usize {
        self.planes.len()
    }

    fn plane_len(&self, index: usize) -> usize {
        self.planes.get(index).map_or(0, |plane| plane.lock().unwrap_or_else(PoisonError::into_inner).len())
    }

    fn read_plane(&self, index: usize, reader: &mut dyn FnMut(&[u8])) -> bool {
        let Some(plane) = self.planes.get(index) else {
            return false;
        };
        reader(&plane.lock().unwrap_or_else(PoisonError::into_inner));
        true
    }
}

struct VirtualStream {
    config: StreamConfiguration,
    layouts: PlaneLayouts,
}

#[derive(Default)]
struct DriverShared {
    running: AtomicBool,
    failures: AtomicUsize,
}

struct Driver {
    queue: Arc<ArrayQueue<Request>>,
    shared: Arc<DriverShared>,
    handler: CompletionHandler,
    buffers: HashMap<u64, Arc<VirtualBuffer>>,
    streams: HashMap<StreamRole, VirtualStream>,
    pattern: TestPattern,
    frame_interval: Duration,
}

impl Driver {
    fn run(mut self) {
        let started = Instant::now();
        let mut next_frame_at = Instant::now();
        let mut sequences: HashMap<StreamRole, u64> = HashMap::new();

        while self.shared.running.load(Ordering::Acquire) {
            let Some(mut request) = self.queue.pop() else {
                thread::park_timeout(IDLE_WAIT);
                continue;
            };

            // frame duration limits are sticky until the next request that carries them
            if let Some((min, _)) = request.controls().frame_duration_limits {
                self.frame_interval = Duration::from_micros(min);
            }

            next_frame_at += self.frame_interval;
            let now = Instant::now();
            if now > next_frame_at {
                next_frame_at = now;
            } else {
                thread::sleep(next_frame_at - now);
            }

            if !self.shared.running.load(Ordering::Acquire) {
                request.set_status(RequestStatus::Cancelled);
                (self.handler)(request);
                break;
            }

            let timestamp = started.elapsed().as_nanos() as u64;
            for buffer in request.buffers_mut() {
                let sequence = sequences.entry(buffer.stream).or_insert(0);
                let bytes_used = match (self.buffers.get(&buffer.buffer.cookie()), self.streams.get(&buffer.stream)) {
                    (Some(memory), Some(stream)) => paint(memory, stream, self.pattern, *sequence),
                    _ => {
                        error!("unknown buffer in request. buffer: {:?}, cookie: {}", buffer.id, buffer.buffer.cookie());
                        Default::default()
                    }
                };
                buffer.metadata = FrameMetadata {
                    sequence: *sequence,
                    timestamp,
                    bytes_used,
                };
                *sequence += 1;
            }

            trace!("request completed. id: {:?}", request.id());
            request.set_status(RequestStatus::Complete);
            (self.handler)(request);
        }

        let mut cancelled = 0;
        while let Some(mut request) = self.queue.pop() {
            request.set_status(RequestStatus::Cancelled);
            (self.handler)(request);
            cancelled += 1;
        }

        debug!("virtual camera stopped. cancelled: {}", cancelled);
    }
}

fn paint(memory: &VirtualBuffer, stream: &VirtualStream, pattern: TestPattern, sequence: u64) -> SmallVec<[usize; 3]> {
    let mut guards: Vec<_> = memory.planes.iter().map(|plane| plane.lock().unwrap_or_else(PoisonError::into_inner)).collect();
    let mut planes: Vec<&mut [u8]> = guards.iter_mut().map(|guard| &mut guard[..]).collect();
    let config = &stream.config;

    fill(&mut planes, &stream.layouts, config.format, config.width, config.height, |x| pattern.color_at(x, config.width, sequence));

    stream.layouts.iter().map(|layout| layout.size()).collect()
}

// Writes one frame whose colour only depends on the column.
fn fill(planes: &mut [&mut [u8]], layouts: &PlaneLayouts, format: PixelFormat, width: u32, height: u32, color_at: impl Fn(u32) -> (u8, u8, u8)) {
    let desc = format.descriptor();
    let width = width as usize;
    let height = height as usize;

    match (desc.family, desc.layout) {
        (FormatFamily::PackedRgb, ComponentLayout::Rgb { r, g, b }) => {
            let bpp = desc.bytes_per_pixel as usize;
            let alpha = if desc.flags.contains(FormatFlags::Alpha) {
                // remaining bits of the word
                let used = r.max() << r.shift | g.max() << g.shift | b.max() << b.shift;
                !used & (u32::MAX >> (32 - bpp * 8))
            } else {
                0
            };
            let stride = layouts[0].stride;
            for row in 0..height {
                let line = &mut planes[0][row * stride..row * stride + width * bpp];
                for (x, pixel) in line.chunks_exact_mut(bpp).enumerate() {
                    let (red, green, blue) = color_at(x as u32);
                    let word = r.encode(red) | g.encode(green) | b.encode(blue) | alpha;
                    pixel.copy_from_slice(&word.to_le_bytes()[..bpp]);
                }
            }
        }
        (FormatFamily::PackedYuv, ComponentLayout::Yuv { y_pos, cb_pos }) => {
            let (y_pos, cb_pos) = (y_pos as usize, cb_pos as usize);
            let cr_pos = (cb_pos + 2) % 4;
            let stride = layouts[0].stride;
            for row in 0..height {
                let line = &mut planes[0][row * stride..row * stride + width * 2];
                for (pair, macropixel) in line.chunks_exact_mut(4).enumerate() {
                    let x = pair as u32 * 2;
                    let (y0, u, v) = yuv_at(&color_at, x);
                    let (y1, _, _) = yuv_at(&color_at, x + 1);
                    macropixel[y_pos] = y0;
                    macropixel[y_pos + 2] = y1;
                    macropixel[cb_pos] = u;
                    macropixel[cr_pos] = v;
                }
            }
        }
        (FormatFamily::PlanarYuv | FormatFamily::SemiPlanarYuv, _) => {
            let shift_x = desc.chroma_shift_x as usize;
            let shift_y = desc.chroma_shift_y as usize;
            let swap = desc.flags.contains(FormatFlags::SwapUV);
            let semi_planar = desc.family == FormatFamily::SemiPlanarYuv;

            for row in 0..height {
                for x in 0..width {
                    let (y, u, v) = yuv_at(&color_at, x as u32);
                    planes[0][row * layouts[0].stride + x] = y;

                    if x % (1 << shift_x) != 0 || row % (1 << shift_y) != 0 {
                        continue;
                    }
                    let (first, second) = if swap { (v, u) } else { (u, v) };
                    let (cx, cy) = (x >> shift_x, row >> shift_y);
                    if semi_planar {
                        let offset = cy * layouts[1].stride + cx * 2;
                        planes[1][offset] = first;
                        planes[1][offset + 1] = second;
                    } else {
                        planes[1][cy * layouts[1].stride + cx] = first;
                        planes[2][cy * layouts[2].stride + cx] = second;
                    }
                }
            }
        }
        _ => {}
    }
}

fn yuv_at(color_at: &impl Fn(u32) -> (u8, u8, u8), x: u32) -> (u8, u8, u8) {
    let (r, g, b) = color_at(x);
    rgb_to_yuv(r, g, b)
}

/// Software capture device producing test patterns at a paced frame rate.
///
/// Completions are delivered from a dedicated driver thread, like a real
/// camera stack delivers them from its own event context.
pub struct VirtualDevice {
    id: String,
    pattern: TestPattern,
    frame_rate: u32,
    raw_supported: bool,
    streams: HashMap<StreamRole, VirtualStream>,
    buffers: HashMap<u64, Arc<VirtualBuffer>>,
    next_cookie: u64,
    queue: Arc<ArrayQueue<Request>>,
    shared: Arc<DriverShared>,
    worker: Option<JoinHandle<()>>,
}

impl VirtualDevice {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            pattern: TestPattern::ColorBars,
            frame_rate: DEFAULT_FRAME_RATE,
            raw_supported: true,
            streams: HashMap::new(),
            buffers: HashMap::new(),
            next_cookie: 1,
            queue: Arc::new(ArrayQueue::new(1)),
            shared: Arc::new(DriverShared::default()),
            worker: None,
        }
    }

    pub fn with_pattern(mut self, pattern: TestPattern) -> Self {
        self.pattern = pattern;
        self
    }

    /// Pace used until a request carries frame duration limits.
    pub fn with_frame_rate(mut self, frame_rate: u32) -> Self {
        self.frame_rate = frame_rate;
        self
    }

    pub fn with_raw_stream(mut self, supported: bool) -> Self {
        self.raw_supported = supported;
        self
    }

    /// Makes the next `count` calls to `queue_request` fail.
    pub fn fail_next_submissions(&self, count: usize) {
        self.shared.failures.store(count, Ordering::Release);
    }

    fn configure_stream(&self, request: &StreamRequest) -> Result<VirtualStream> {
        if request.role == StreamRole::RawCapture && !self.raw_supported {
            return Err(not_found_error!(request.role));
        }
        if request.format.family() == FormatFamily::Compressed {
            return Err(unsupported_error!(request.format));
        }
        if request.width == 0 || request.height == 0 {
            return Err(invalid_param_error!((request.width, request.height)));
        }

        let stride = align_to(request.format.row_bytes(request.width), 8) as u32;
        let layouts = request.format.plane_layout(request.width, request.height, stride)?;
        let frame_size = layouts.iter().map(|layout| layout.size()).sum();

        Ok(VirtualStream {
            config: StreamConfiguration {
                role: request.role,
                format: request.format,
                width: request.width,
                height: request.height,
                stride,
                frame_size,
            },
            layouts,
        })
    }
}

impl Device for VirtualDevice {
    fn id(&self) -> &str {
        &self.id
    }

    fn configure(&mut self, streams: &[StreamRequest]) -> Result<Vec<StreamConfiguration>> {
        if self.running() {
            return Err(Error::Invalid("device is running".into()));
        }

        let mut configured = HashMap::new();
        for request in streams {
            if configured.contains_key(&request.role) {
                return Err(Error::Invalid(format!("duplicate {:?} stream", request.role).into()));
            }
            configured.insert(request.role, self.configure_stream(request)?);
        }

        let configs = streams.iter().filter_map(|request| configured.get(&request.role).map(|stream| stream.config)).collect();
        info!("virtual camera configured. id: {}, streams: {:?}", self.id, configs);
        self.streams = configured;

        Ok(configs)
    }

    fn allocate(&mut self, stream: &StreamConfiguration, count: usize) -> Result<Vec<Arc<dyn FrameBuffer>>> {
        if self.running() {
            return Err(Error::Invalid("device is running".into()));
        }
        let layouts = self.streams.get(&stream.role).map(|configured| configured.layouts.clone()).ok_or_else(|| not_found_error!(stream.role))?;

        let mut buffers: Vec<Arc<dyn FrameBuffer>> = Vec::with_capacity(count);
        for _ in 0..count {
            let buffer = Arc::new(VirtualBuffer::new(self.next_cookie, &layouts));
            self.buffers.insert(self.next_cookie, buffer.clone());
            self.next_cookie += 1;
            buffers.push(buffer);
        }

        Ok(buffers)
    }

    fn release(&mut self) {
        if self.running() {
            error!("buffers released while running. id: {}", self.id);
            return;
        }
        self.buffers.clear();
    }

    fn start(&mut self, handler: CompletionHandler) -> Result<()> {
        if self.running() {
            return Err(Error::StartFailed("device already started".into()));
        }
        if self.buffers.is_empty() {
            return Err(Error::StartFailed("no buffers allocated".into()));
        }

        self.queue = Arc::new(ArrayQueue::new(self.buffers.len()));
        self.shared.running.store(true, Ordering::Release);

        let driver = Driver {
            queue: self.queue.clone(),
            shared: self.shared.clone(),
            handler,
            buffers: self.buffers.clone(),
            streams: self
                .streams
                .iter()
                .map(|(role, stream)| {
                    (*role, VirtualStream {
                        config: stream.config,
                        layouts: stream.layouts.clone(),
                    })
                })
                .collect(),
            pattern: self.pattern,
            frame_interval: Duration::from_micros(frame_duration_usec(self.frame_rate)),
        };

        let worker = thread::Builder::new().name("virtual-camera".to_string()).spawn(move || driver.run()).map_err(|err| {
            self.shared.running.store(false, Ordering::Release);
            Error::StartFailed(err.to_string().into())
        })?;
        self.worker = Some(worker);

        info!("virtual camera started. id: {}, pattern: {:?}", self.id, self.pattern);

        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };

        self.shared.running.store(false, Ordering::Release);
        worker.thread().unpark();
        worker.join().map_err(|_| Error::StopFailed("driver thread panicked".into()))?;

        info!("virtual camera stopped. id: {}", self.id);

        Ok(())
    }

    fn queue_request(&mut self, request: Request) -> Result<()> {
        let Some(worker) = self.worker.as_ref() else {
            return Err(Error::NotRunning(self.id.clone().into()));
        };

        if self.shared.failures.fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| count.checked_sub(1)).is_ok() {
            return Err(Error::SubmitFailed("injected failure".into()));
        }
        if let Some(buffer) = request.buffers().iter().find(|buffer| !self.buffers.contains_key(&buffer.buffer.cookie())) {
            return Err(Error::Invalid(format!("foreign buffer: {}", buffer.buffer.cookie()).into()));
        }

        self.queue.push(request).map_err(|request| Error::SubmitFailed(format!("queue full, request {:?}", request.id()).into()))?;
        worker.thread().unpark();

        Ok(())
    }

    fn running(&self) -> bool {
        self.worker.is_some()
    }
}

impl Drop for VirtualDevice {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            error!("failed to stop virtual camera. error: {}", err);
        }
    }
}
