use std::{
    fs,
    path::PathBuf,
    process,
    sync::mpsc::Receiver,
    thread,
    time::{Duration, Instant},
};

use camera::{
    codec::sink::END_OF_STREAM_MARKER,
    device::virtual_camera::{TestPattern, VirtualDevice},
    error::Error,
    format::PixelFormat,
    variant::Variant,
    CaptureConfig, CaptureSession, SessionEvent,
};

const TIMEOUT: Duration = Duration::from_secs(5);

fn output_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("camera-session-{}-{}", name, process::id()));
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn config(name: &str) -> CaptureConfig {
    let _ = env_logger::builder().is_test(true).try_init();

    CaptureConfig {
        width: 32,
        height: 16,
        frame_rate: 60,
        buffer_count: 3,
        output_dir: output_dir(name),
        ..CaptureConfig::default()
    }
}

fn red_device() -> Box<VirtualDevice> {
    Box::new(VirtualDevice::new("virtual0").with_pattern(TestPattern::Solid(255, 0, 0)))
}

fn wait_for<T>(events: &Receiver<SessionEvent>, mut matches: impl FnMut(SessionEvent) -> Option<T>) -> T {
    let deadline = Instant::now() + TIMEOUT;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let event = events.recv_timeout(remaining).expect("timed out waiting for event");
        if let Some(value) = matches(event) {
            return value;
        }
    }
}

#[test]
fn test_preview_delivers_converted_frames() {
    let (session, events) = CaptureSession::new(red_device(), config("preview")).unwrap();
    session.start().unwrap();
    assert!(session.is_running());

    let (format, width, height) = wait_for(&events, |event| match event {
        SessionEvent::FormatChanged {
            format,
            width,
            height,
            ..
        } => Some((format, width, height)),
        _ => None,
    });
    assert_eq!((format, width, height), (PixelFormat::RGB565, 32, 16));

    let raster = wait_for(&events, |event| match event {
        SessionEvent::ProcessedImageReady(raster) => Some(raster),
        _ => None,
    });
    assert_eq!((raster.width, raster.height), (32, 16));
    assert_eq!(raster.rgb_at(0, 0), (255, 0, 0));
    assert_eq!(raster.rgb_at(31, 15), (255, 0, 0));

    let mut last = None;
    for _ in 0..5 {
        let frame = wait_for(&events, |event| match event {
            SessionEvent::FrameReady(frame) => Some(frame),
            _ => None,
        });
        // 32x16 RGB565, rows already 8-byte aligned
        let plane = frame.plane(0).unwrap();
        assert_eq!(plane.len(), 32 * 2 * 16);
        assert!(plane.chunks_exact(2).all(|pixel| pixel == [0x00, 0xF8]));
        if let Some(last) = last {
            assert!(frame.sequence > last);
        }
        last = Some(frame.sequence);
    }

    let stats = session.stats().unwrap();
    assert!(stats.running);
    assert!(stats.frames_captured >= 5);
}

#[test]
fn test_snapshot_writes_jpeg() {
    let (session, events) = CaptureSession::new(red_device(), config("snapshot")).unwrap();
    assert!(matches!(session.snapshot(), Err(Error::NotRunning(_))));

    session.start().unwrap();
    session.snapshot().unwrap();

    let path = wait_for(&events, |event| match event {
        SessionEvent::SnapshotCompleted(path) => Some(path),
        _ => None,
    });
    assert_eq!(path.extension().unwrap(), "jpg");
    let data = fs::read(&path).unwrap();
    assert_eq!(&data[..2], &[0xFF, 0xD8]);
    fs::remove_file(path).unwrap();
}

#[test]
fn test_recording_lifecycle() {
    let (session, events) = CaptureSession::new(red_device(), config("recording")).unwrap();
    assert!(matches!(session.start_recording(), Err(Error::NotRunning(_))));

    session.start().unwrap();
    let filename = session.start_recording().unwrap();
    assert!(session.start_recording().is_err());

    wait_for(&events, |event| match event {
        SessionEvent::FrameRecorded(count) if count >= 5 => Some(()),
        _ => None,
    });
    assert!(session.stats().unwrap().recording);
    session.end_recording().unwrap();

    let (completed, frame_count) = wait_for(&events, |event| match event {
        SessionEvent::RecordingCompleted {
            filename,
            frame_count,
        } => Some((filename, frame_count)),
        _ => None,
    });
    assert_eq!(completed, filename);
    assert!(frame_count >= 5);
    assert!(!session.stats().unwrap().recording);

    let data = fs::read(&filename).unwrap();
    assert!(data.ends_with(&END_OF_STREAM_MARKER));
    fs::remove_file(filename).unwrap();
}

#[test]
fn test_stop_is_idempotent() {
    let (session, events) = CaptureSession::new(red_device(), config("stop")).unwrap();
    session.stop().unwrap();

    session.start().unwrap();
    wait_for(&events, |event| matches!(event, SessionEvent::FrameReady(_)).then_some(()));

    session.stop().unwrap();
    session.stop().unwrap();
    assert!(!session.is_running());

    session.start().unwrap();
    assert!(session.is_running());
}

#[test]
fn test_reconfigure_is_debounced() {
    let mut config = config("debounce");
    config.debounce = Duration::from_millis(100);
    let (session, events) = CaptureSession::new(red_device(), config).unwrap();
    session.start().unwrap();

    for width in [16, 24, 32, 40, 48] {
        let mut options = Variant::new_dict();
        options["width"] = Variant::UInt32(width);
        session.reconfigure(&options).unwrap();
    }

    let width = wait_for(&events, |event| match event {
        SessionEvent::FormatChanged {
            width,
            ..
        } if width != 32 => Some(width),
        _ => None,
    });
    assert_eq!(width, 48);

    thread::sleep(Duration::from_millis(250));
    let stats = session.stats().unwrap();
    assert_eq!(stats.reconfigurations, 1);
    assert!(stats.running);
}

#[test]
fn test_invalid_reconfiguration_is_rejected() {
    let (session, _events) = CaptureSession::new(red_device(), config("invalid")).unwrap();
    session.start().unwrap();

    let mut options = Variant::new_dict();
    options["frame-rate"] = Variant::UInt32(0);
    assert!(matches!(session.reconfigure(&options), Err(Error::InvalidParameter(..))));

    thread::sleep(Duration::from_millis(150));
    assert_eq!(session.stats().unwrap().reconfigurations, 0);
}

#[test]
fn test_disabled_session_does_not_start() {
    let mut config = config("disabled");
    config.enabled = false;
    let (session, _events) = CaptureSession::new(red_device(), config).unwrap();
    assert!(session.start().is_err());
    assert!(!session.is_running());

    let mut options = Variant::new_dict();
    options["enabled"] = Variant::from(true);
    session.reconfigure(&options).unwrap();

    let deadline = Instant::now() + TIMEOUT;
    while !session.is_running() {
        assert!(Instant::now() < deadline, "session never resumed");
        thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn test_raw_capture() {
    let (session, _events) = CaptureSession::new(red_device(), config("no-raw")).unwrap();
    session.start().unwrap();
    assert!(matches!(session.capture_raw(), Err(Error::NotFound(_))));

    let mut config = config("raw");
    config.raw = true;
    config.format = PixelFormat::NV12;
    let (session, events) = CaptureSession::new(red_device(), config).unwrap();
    session.start().unwrap();
    session.capture_raw().unwrap();

    let frame = wait_for(&events, |event| match event {
        SessionEvent::RawFrameReady(frame) => Some(frame),
        _ => None,
    });
    assert_eq!(frame.planes().len(), 2);
    assert_eq!(frame.plane(0).unwrap().len(), 32 * 16);
}

#[test]
fn test_unsupported_format_fails_start() {
    let mut config = config("mjpeg");
    config.format = PixelFormat::MJPEG;
    let (session, _events) = CaptureSession::new(red_device(), config).unwrap();

    let err = session.start().unwrap_err();
    assert!(err.is_configuration());
    assert!(!session.is_running());
}
