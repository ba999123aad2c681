use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        mpsc::Receiver,
        Arc,
    },
    time::Duration,
};

use camera_core::{error::Error, format::PixelFormat};
use camera_device::{
    dispatch::{wake_channel, Dispatcher},
    fanout::FanOut,
    pool::BufferPool,
    request::{Controls, Request, RequestStatus},
    virtual_camera::{TestPattern, VirtualDevice},
    Device, StreamRequest, StreamRole,
};

const TIMEOUT: Duration = Duration::from_secs(5);

fn viewfinder(format: PixelFormat) -> StreamRequest {
    StreamRequest {
        role: StreamRole::Viewfinder,
        format,
        width: 16,
        height: 8,
    }
}

struct Capture {
    device: VirtualDevice,
    dispatcher: Arc<Dispatcher>,
    wake_rx: Receiver<()>,
}

impl Capture {
    fn start(mut device: VirtualDevice, streams: &[StreamRequest]) -> Self {
        let configs = device.configure(streams).unwrap();
        let pool = Arc::new(BufferPool::new());
        let requests = pool.start(&mut device, &configs, 3, &Controls::default()).unwrap();
        let (waker, wake_rx) = wake_channel();
        let dispatcher = Arc::new(Dispatcher::new(pool.clone(), waker));

        device.start(dispatcher.completion_handler()).unwrap();
        for request in requests {
            pool.queue(&mut device, request).unwrap();
        }

        Self {
            device,
            dispatcher,
            wake_rx,
        }
    }

    // Runs the control loop until `count` frames of `role` were collected.
    fn collect(&mut self, role: StreamRole, count: usize) -> Vec<camera_core::frame::Frame> {
        let mut frames = Vec::new();
        while frames.len() < count {
            self.wake_rx.recv_timeout(TIMEOUT).unwrap();
            while let Some(request) = self.dispatcher.drain() {
                frames.extend(FanOut::collect(&request).into_iter().filter(|(stream, _)| *stream == role).map(|(_, frame)| frame));

                let mut buffers = self.dispatcher.pool().reuse(request);
                buffers.sort_by_key(|buffer| buffer.stream != StreamRole::RawCapture);
                for buffer in buffers {
                    self.dispatcher.pool().recycle(&mut self.device, buffer).unwrap();
                }
            }
        }
        frames
    }

    fn stop(mut self) {
        self.device.stop().unwrap();
        self.dispatcher.pool().stop();
        self.device.release();
    }
}

#[test]
fn test_sequences_increase_by_one() {
    let device = VirtualDevice::new("virtual:0").with_pattern(TestPattern::Solid(255, 0, 0)).with_frame_rate(200);
    let mut capture = Capture::start(device, &[viewfinder(PixelFormat::RGB565)]);

    let frames = capture.collect(StreamRole::Viewfinder, 10);
    for pair in frames.windows(2) {
        assert_eq!(pair[1].sequence, pair[0].sequence + 1);
        assert!(pair[1].timestamp >= pair[0].timestamp);
    }

    let plane = frames[0].plane(0).unwrap();
    assert_eq!(plane.len(), 16 * 2 * 8);
    assert_eq!(&plane[..2], &[0x00, 0xF8]);

    capture.stop();
}

#[test]
fn test_raw_stream_rides_along() {
    let device = VirtualDevice::new("virtual:0").with_frame_rate(200);
    let raw = StreamRequest {
        role: StreamRole::RawCapture,
        ..viewfinder(PixelFormat::NV12)
    };
    let mut capture = Capture::start(device, &[viewfinder(PixelFormat::NV12), raw]);

    capture.dispatcher.pool().request_raw_capture().unwrap();
    let frames = capture.collect(StreamRole::RawCapture, 1);
    assert_eq!(frames[0].planes().len(), 2);
    assert_eq!(frames[0].size(), 16 * 8 * 3 / 2);
    assert!(!capture.dispatcher.pool().is_raw_requested());

    capture.stop();
}

#[test]
fn test_stop_cancels_pending_requests() {
    let mut device = VirtualDevice::new("virtual:0").with_frame_rate(1);
    let configs = device.configure(&[viewfinder(PixelFormat::YUYV)]).unwrap();
    let pool = Arc::new(BufferPool::new());
    let requests = pool.start(&mut device, &configs, 4, &Controls::default()).unwrap();

    let cancelled = Arc::new(AtomicUsize::new(0));
    let counter = cancelled.clone();
    device
        .start(Arc::new(move |request: Request| {
            if request.status() == RequestStatus::Cancelled {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }))
        .unwrap();
    for request in requests {
        pool.queue(&mut device, request).unwrap();
    }

    device.stop().unwrap();
    device.stop().unwrap();
    assert!(!device.running());
    assert_eq!(cancelled.load(Ordering::SeqCst), 4);
    assert_eq!(pool.stop(), 0);
}

#[test]
fn test_configure_rejects_unsupported_streams() {
    let mut device = VirtualDevice::new("virtual:0").with_raw_stream(false);

    let err = device.configure(&[viewfinder(PixelFormat::MJPEG)]).unwrap_err();
    assert!(matches!(err, Error::Unsupported(_)));
    assert!(err.is_configuration());

    let raw = StreamRequest {
        role: StreamRole::RawCapture,
        ..viewfinder(PixelFormat::RGB565)
    };
    assert!(matches!(device.configure(&[viewfinder(PixelFormat::RGB565), raw]), Err(Error::NotFound(_))));

    let configs = device.configure(&[viewfinder(PixelFormat::RGB888)]).unwrap();
    assert_eq!(configs[0].stride, 48);
    assert_eq!(configs[0].frame_size, 48 * 8);
}

#[test]
fn test_failed_submission_is_reported() {
    let mut device = VirtualDevice::new("virtual:0");
    let configs = device.configure(&[viewfinder(PixelFormat::RGB565)]).unwrap();
    let pool = Arc::new(BufferPool::new());
    let mut requests = pool.start(&mut device, &configs, 2, &Controls::default()).unwrap();

    assert!(matches!(device.queue_request(requests.remove(0)), Err(Error::NotRunning(_))));

    device.start(Arc::new(|_: Request| {})).unwrap();
    device.fail_next_submissions(1);
    assert!(matches!(pool.queue(&mut device, requests.remove(0)), Err(Error::SubmitFailed(_))));
    assert_eq!(pool.census(StreamRole::Viewfinder).free, 1);

    device.stop().unwrap();
}
