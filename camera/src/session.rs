use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Instant,
};

use camera_codec::pipeline::RecordingParameters;
use camera_core::{convert::FormatConverter, error::Error, frame::Frame, variant::Variant, Result};
use camera_device::{
    dispatch::{channel_waker, Dispatcher},
    fanout::{FanOut, Route},
    pool::BufferPool,
    Device, StreamConfiguration, StreamRequest, StreamRole,
};
use log::{debug, error, info, warn};

use crate::{
    config::CaptureConfig,
    events::{EventSender, SessionEvent},
    worker::{offer, run_preview, run_snapshot, Recorder, RecorderMessage, Worker, WorkerMessage},
};

const CONTROL_CAPACITY: usize = 32;
const PREVIEW_CAPACITY: usize = 2;
const SNAPSHOT_CAPACITY: usize = 2;
const RECORDING_CAPACITY: usize = 8;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CaptureStats {
    pub running: bool,
    pub recording: bool,
    pub frames_captured: u64,
    pub frames_recorded: u64,
    /// Instantaneous rate from the last two sensor timestamps.
    pub fps: f64,
    /// Debounced reconfigurations applied so far.
    pub reconfigurations: u64,
}

enum Command {
    Start,
    Stop,
    Reconfigure(Variant),
    Snapshot,
    CaptureRaw,
    StartRecording,
    EndRecording,
    Stats,
    Shutdown,
}

enum Response {
    Done,
    Recording(PathBuf),
    Stats(CaptureStats),
}

enum ControlMessage {
    Wake,
    Command(Command, Sender<Result<Response>>),
}

/// Owns the device, the buffer pool and the fan-out. Runs on its own
/// thread and drains completions after every message it receives.
struct Controller {
    device: Box<dyn Device>,
    config: CaptureConfig,
    pool: Arc<BufferPool>,
    dispatcher: Arc<Dispatcher>,
    fanout: FanOut,
    events: EventSender,
    preview: Worker<WorkerMessage>,
    snapshot: Worker<WorkerMessage>,
    recorder: Worker<RecorderMessage>,
    recording: Arc<AtomicBool>,
    frames_recorded: Arc<AtomicU64>,
    viewfinder: Option<StreamConfiguration>,
    pending: Option<(CaptureConfig, Instant)>,
    frames_captured: u64,
    fps: f64,
    last_timestamp: Option<u64>,
    reconfigurations: u64,
}

impl Controller {
    fn new(device: Box<dyn Device>, config: CaptureConfig, events: EventSender, control_tx: SyncSender<ControlMessage>) -> Result<Self> {
        let pool = Arc::new(BufferPool::new());
        let dispatcher = Arc::new(Dispatcher::new(pool.clone(), channel_waker(control_tx, || ControlMessage::Wake)));

        let preview_events = events.clone();
        let preview = Worker::spawn("camera-preview", PREVIEW_CAPACITY, move |receiver| run_preview(receiver, preview_events))?;

        let snapshot_events = events.clone();
        let output_dir = config.output_dir.clone();
        let snapshot = Worker::spawn("camera-snapshot", SNAPSHOT_CAPACITY, move |receiver| run_snapshot(receiver, snapshot_events, output_dir))?;

        let recording = Arc::new(AtomicBool::new(false));
        let frames_recorded = Arc::new(AtomicU64::new(0));
        let recorder = Recorder::new(events.clone(), recording.clone(), frames_recorded.clone());
        let recorder = Worker::spawn("camera-recording", RECORDING_CAPACITY, move |receiver| recorder.run(receiver))?;

        let mut controller = Self {
            device,
            config,
            pool,
            dispatcher,
            fanout: FanOut::new(),
            events,
            preview,
            snapshot,
            recorder,
            recording,
            frames_recorded,
            viewfinder: None,
            pending: None,
            frames_captured: 0,
            fps: 0.0,
            last_timestamp: None,
            reconfigurations: 0,
        };
        controller.connect_consumers();

        Ok(controller)
    }

    fn connect_consumers(&mut self) {
        if let Some(sender) = self.preview.sender() {
            self.fanout.set_handler(Route::Preview, Arc::new(move |frame: Frame| -> Result<()> { offer(&sender, WorkerMessage::Frame(frame), "preview") }));
        }

        if let Some(sender) = self.snapshot.sender() {
            self.fanout.set_handler(Route::Snapshot, Arc::new(move |frame: Frame| -> Result<()> { offer(&sender, WorkerMessage::Frame(frame), "snapshot") }));
        }

        if let Some(sender) = self.recorder.sender() {
            let active = self.recording.clone();
            self.fanout.set_handler(
                Route::Recording,
                Arc::new(move |frame: Frame| -> Result<()> {
                    if !active.load(Ordering::Acquire) {
                        return Ok(());
                    }
                    offer(&sender, RecorderMessage::Frame(frame), "recording")
                }),
            );
        }

        let events = self.events.clone();
        self.fanout.set_handler(
            Route::Raw,
            Arc::new(move |frame: Frame| -> Result<()> {
                events.send(SessionEvent::RawFrameReady(frame));
                Ok(())
            }),
        );
    }

    fn run(mut self, receiver: Receiver<ControlMessage>) {
        loop {
            let message = match self.pending.as_ref().map(|(_, deadline)| *deadline) {
                Some(deadline) => receiver.recv_timeout(deadline.saturating_duration_since(Instant::now())),
                None => receiver.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };

            match message {
                Ok(ControlMessage::Wake) | Err(RecvTimeoutError::Timeout) => {}
                Ok(ControlMessage::Command(Command::Shutdown, reply)) => {
                    self.shutdown();
                    let _ = reply.send(Ok(Response::Done));
                    return;
                }
                Ok(ControlMessage::Command(command, reply)) => {
                    let result = self.handle(command);
                    if reply.send(result).is_err() {
                        debug!("command reply dropped");
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    self.shutdown();
                    return;
                }
            }

            self.process_completions();
            self.restart_if_settled();
        }
    }

    fn handle(&mut self, command: Command) -> Result<Response> {
        match command {
            Command::Start => self.start().map(|_| Response::Done),
            Command::Stop => {
                self.stop();
                Ok(Response::Done)
            }
            Command::Reconfigure(options) => self.reconfigure(&options).map(|_| Response::Done),
            Command::Snapshot => {
                if self.viewfinder.is_none() {
                    return Err(Error::NotRunning("capture".into()));
                }
                self.fanout.request_snapshot();
                Ok(Response::Done)
            }
            Command::CaptureRaw => self.pool.request_raw_capture().map(|_| Response::Done),
            Command::StartRecording => self.start_recording().map(Response::Recording),
            Command::EndRecording => {
                self.end_recording();
                Ok(Response::Done)
            }
            Command::Stats => Ok(Response::Stats(self.stats())),
            Command::Shutdown => Ok(Response::Done),
        }
    }

    fn start(&mut self) -> Result<()> {
        if self.viewfinder.is_some() {
            return Ok(());
        }
        if !self.config.enabled {
            return Err(Error::Invalid("capture disabled".into()));
        }
        self.config.validate()?;

        let viewfinder = StreamRequest {
            role: StreamRole::Viewfinder,
            format: self.config.format,
            width: self.config.width,
            height: self.config.height,
        };
        let mut requests = vec![viewfinder];
        if self.config.raw {
            requests.push(StreamRequest {
                role: StreamRole::RawCapture,
                ..viewfinder
            });
        }

        let streams = self.device.configure(&requests)?;
        let viewfinder = streams
            .iter()
            .copied()
            .find(|stream| stream.role == StreamRole::Viewfinder)
            .ok_or_else(|| Error::Invalid("device returned no viewfinder stream".into()))?;
        FormatConverter::new().configure(viewfinder.format, viewfinder.width, viewfinder.height, viewfinder.stride)?;

        self.preview.send(WorkerMessage::Configure(viewfinder))?;
        self.snapshot.send(WorkerMessage::Configure(viewfinder))?;

        let requests = self.pool.start(self.device.as_mut(), &streams, self.config.buffer_count, &self.config.controls())?;

        if let Err(err) = self.device.start(self.dispatcher.completion_handler()) {
            self.pool.stop();
            self.device.release();
            return Err(err);
        }

        for request in requests {
            if let Err(err) = self.pool.queue(self.device.as_mut(), request) {
                error!("initial request rejected, capture aborted. error: {}", err);
                self.teardown();
                return Err(err);
            }
        }

        self.viewfinder = Some(viewfinder);
        self.frames_captured = 0;
        self.fps = 0.0;
        self.last_timestamp = None;

        info!(
            "capture started. device: {}, format: {}, size: {}x{}, stride: {}, streams: {}",
            self.device.id(),
            viewfinder.format,
            viewfinder.width,
            viewfinder.height,
            viewfinder.stride,
            streams.len()
        );

        self.events.send(SessionEvent::FormatChanged {
            format: viewfinder.format,
            width: viewfinder.width,
            height: viewfinder.height,
            stride: viewfinder.stride,
        });

        Ok(())
    }

    fn teardown(&mut self) -> usize {
        if let Err(err) = self.device.stop() {
            error!("device stop failed. error: {}", err);
        }
        let discarded = self.pool.stop();
        self.device.release();
        discarded
    }

    fn stop(&mut self) {
        if self.viewfinder.is_none() {
            return;
        }

        self.end_recording();
        self.viewfinder = None;
        self.pool.cancel_raw_capture();
        let discarded = self.teardown();

        info!("capture stopped. frames: {}, discarded: {}", self.frames_captured, discarded);
    }

    fn reconfigure(&mut self, options: &Variant) -> Result<()> {
        let mut next = self.pending.as_ref().map_or(&self.config, |(config, _)| config).clone();
        next.apply(options)?;

        let deadline = Instant::now() + next.debounce;
        debug!("restart scheduled. delay: {:?}", next.debounce);
        self.pending = Some((next, deadline));

        Ok(())
    }

    fn restart_if_settled(&mut self) {
        match self.pending.as_ref() {
            Some((_, deadline)) if Instant::now() >= *deadline => {}
            _ => return,
        }
        let Some((config, _)) = self.pending.take() else {
            return;
        };

        let resume = config.enabled && (self.viewfinder.is_some() || !self.config.enabled);
        self.stop();
        self.config = config;
        self.reconfigurations += 1;

        if resume {
            if let Err(err) = self.start() {
                error!("restart after reconfiguration failed. error: {}", err);
            }
        }
    }

    fn start_recording(&mut self) -> Result<PathBuf> {
        let viewfinder = self.viewfinder.ok_or_else(|| Error::NotRunning("capture".into()))?;
        if self.recording.load(Ordering::Acquire) {
            return Err(Error::Invalid("recording already active".into()));
        }

        let mut params = RecordingParameters::new(viewfinder.format, viewfinder.width, viewfinder.height, viewfinder.stride);
        params.frame_rate = self.config.frame_rate;
        params.bit_rate = self.config.bit_rate;
        params.codec = self.config.codec.clone();

        let (reply, response) = mpsc::channel();
        self.recorder.send(RecorderMessage::Start {
            params,
            output_dir: self.config.output_dir.clone(),
            reply,
        })?;

        response.recv().map_err(|_| Error::NotRunning("recording worker".into()))?
    }

    fn end_recording(&mut self) {
        if !self.recording.load(Ordering::Acquire) {
            return;
        }
        if let Err(err) = self.recorder.send(RecorderMessage::End) {
            warn!("failed to end recording. error: {}", err);
        }
    }

    fn process_completions(&mut self) {
        while let Some(request) = self.dispatcher.drain() {
            for (stream, frame) in FanOut::collect(&request) {
                if stream == StreamRole::Viewfinder {
                    self.count_frame(&frame);
                }
                self.fanout.route(stream, frame);
            }

            let mut buffers = self.pool.reuse(request);
            // raw first so the next viewfinder request can take it along
            buffers.sort_by_key(|buffer| buffer.stream != StreamRole::RawCapture);
            for buffer in buffers {
                if let Err(err) = self.pool.recycle(self.device.as_mut(), buffer) {
                    warn!("buffer not recycled. error: {}", err);
                }
            }
        }
    }

    fn count_frame(&mut self, frame: &Frame) {
        self.frames_captured += 1;

        if let Some(last) = self.last_timestamp {
            if frame.timestamp > last {
                self.fps = 1_000_000.0 / (frame.timestamp - last) as f64;
            }
        }
        self.last_timestamp = Some(frame.timestamp);

        self.events.send(SessionEvent::FrameReady(frame.clone()));
    }

    fn stats(&self) -> CaptureStats {
        CaptureStats {
            running: self.viewfinder.is_some(),
            recording: self.recording.load(Ordering::Acquire),
            frames_captured: self.frames_captured,
            frames_recorded: self.frames_recorded.load(Ordering::Acquire),
            fps: self.fps,
            reconfigurations: self.reconfigurations,
        }
    }

    fn shutdown(&mut self) {
        self.stop();
        // handlers hold the worker senders
        self.fanout = FanOut::new();
        self.preview.shutdown();
        self.snapshot.shutdown();
        self.recorder.shutdown();
        debug!("capture session shut down");
    }
}

/// Handle to a capture pipeline running on its own control thread.
///
/// Every call is a synchronous round trip to the control thread. Frames and
/// results flow back through the event receiver returned by `new`.
pub struct CaptureSession {
    control_tx: SyncSender<ControlMessage>,
    join: Option<JoinHandle<()>>,
}

impl CaptureSession {
    pub fn new(device: Box<dyn Device>, config: CaptureConfig) -> Result<(Self, Receiver<SessionEvent>)> {
        config.validate()?;

        let (events, event_rx) = EventSender::channel();
        let (control_tx, control_rx) = mpsc::sync_channel(CONTROL_CAPACITY);
        let controller = Controller::new(device, config, events, control_tx.clone())?;

        let join = thread::Builder::new()
            .name("camera-control".to_string())
            .spawn(move || controller.run(control_rx))
            .map_err(|err| Error::CreationFailed(err.to_string().into()))?;

        Ok((
            Self {
                control_tx,
                join: Some(join),
            },
            event_rx,
        ))
    }

    fn execute(&self, command: Command) -> Result<Response> {
        let (reply, response) = mpsc::channel();
        self.control_tx.send(ControlMessage::Command(command, reply)).map_err(|_| Error::NotRunning("capture session".into()))?;
        response.recv().map_err(|_| Error::NotRunning("capture session".into()))?
    }

    /// Configures the device, allocates buffers and queues the first
    /// requests. Configuration errors are returned before anything starts.
    pub fn start(&self) -> Result<()> {
        self.execute(Command::Start).map(|_| ())
    }

    /// Stops capture and ends any recording. Safe to call repeatedly.
    pub fn stop(&self) -> Result<()> {
        self.execute(Command::Stop).map(|_| ())
    }

    /// Validates `options` now and restarts capture with them once no
    /// further reconfiguration arrived for the debounce period.
    pub fn reconfigure(&self, options: &Variant) -> Result<()> {
        self.execute(Command::Reconfigure(options.clone())).map(|_| ())
    }

    pub fn snapshot(&self) -> Result<()> {
        self.execute(Command::Snapshot).map(|_| ())
    }

    /// Attaches a raw buffer to one of the next requests.
    pub fn capture_raw(&self) -> Result<()> {
        self.execute(Command::CaptureRaw).map(|_| ())
    }

    /// Returns the file the recording is written to.
    pub fn start_recording(&self) -> Result<PathBuf> {
        match self.execute(Command::StartRecording)? {
            Response::Recording(path) => Ok(path),
            _ => Err(Error::Failed("unexpected response".into())),
        }
    }

    pub fn end_recording(&self) -> Result<()> {
        self.execute(Command::EndRecording).map(|_| ())
    }

    pub fn stats(&self) -> Result<CaptureStats> {
        match self.execute(Command::Stats)? {
            Response::Stats(stats) => Ok(stats),
            _ => Err(Error::Failed("unexpected response".into())),
        }
    }

    pub fn is_running(&self) -> bool {
        self.stats().is_ok_and(|stats| stats.running)
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        if let Err(err) = self.execute(Command::Shutdown) {
            debug!("capture session already shut down. error: {}", err);
        }
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                error!("capture control thread panicked");
            }
        }
    }
}
