use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        mpsc::{self, Receiver, Sender, SyncSender, TrySendError},
        Arc,
    },
    thread::{self, JoinHandle},
};

use camera_codec::{
    encoder::find_encoder_by_name,
    pipeline::{EncodingPipeline, RecordingParameters},
    sink::StreamWriter,
};
use camera_core::{
    convert::FormatConverter,
    error::Error,
    frame::{Frame, Raster},
    time::unix_timestamp_msec,
    Result,
};
use camera_device::StreamConfiguration;
use image::{codecs::jpeg::JpegEncoder, ExtendedColorType};
use log::{debug, error, info, warn};

use crate::events::{EventSender, SessionEvent};

pub(crate) const SNAPSHOT_QUALITY: u8 = 95;

pub(crate) enum WorkerMessage {
    Configure(StreamConfiguration),
    Frame(Frame),
}

pub(crate) enum RecorderMessage {
    Start {
        params: RecordingParameters,
        output_dir: PathBuf,
        reply: Sender<Result<PathBuf>>,
    },
    Frame(Frame),
    End,
}

/// A consumer thread fed through a bounded channel.
pub(crate) struct Worker<T> {
    name: &'static str,
    sender: Option<SyncSender<T>>,
    join: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> Worker<T> {
    pub fn spawn<F>(name: &'static str, capacity: usize, run: F) -> Result<Self>
    where
        F: FnOnce(Receiver<T>) + Send + 'static,
    {
        let (sender, receiver) = mpsc::sync_channel(capacity);
        let join = thread::Builder::new().name(name.to_string()).spawn(move || run(receiver)).map_err(|err| Error::CreationFailed(err.to_string().into()))?;

        Ok(Self {
            name,
            sender: Some(sender),
            join: Some(join),
        })
    }

    pub fn sender(&self) -> Option<SyncSender<T>> {
        self.sender.clone()
    }

    /// Blocks while the channel is full. Used for control messages that
    /// must not be lost.
    pub fn send(&self, message: T) -> Result<()> {
        let sender = self.sender.as_ref().ok_or_else(|| Error::NotRunning(self.name.into()))?;
        sender.send(message).map_err(|_| Error::NotRunning(self.name.into()))
    }
}

impl<T> Worker<T> {
    pub fn shutdown(&mut self) {
        self.sender.take();
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                error!("worker panicked. name: {}", self.name);
            }
        }
    }
}

impl<T> Drop for Worker<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Frame hand-off that never blocks the caller.
pub(crate) fn offer<T>(sender: &SyncSender<T>, message: T, name: &str) -> Result<()> {
    match sender.try_send(message) {
        Ok(()) => Ok(()),
        Err(TrySendError::Full(_)) => Err(Error::Again(format!("{} busy, frame dropped", name).into())),
        Err(TrySendError::Disconnected(_)) => Err(Error::NotRunning(name.to_string().into())),
    }
}

fn configure_converter(converter: &mut FormatConverter, stream: &StreamConfiguration, name: &str) {
    match converter.configure(stream.format, stream.width, stream.height, stream.stride) {
        Ok(()) if converter.is_zero_copy() => debug!("{}: zero-copy enabled. format: {}", name, stream.format),
        Ok(()) => debug!("{}: converting from {}, {}x{}", name, stream.format, stream.width, stream.height),
        Err(err) => warn!("{}: unsupported stream. format: {}, error: {}", name, stream.format, err),
    }
}

pub(crate) fn run_preview(receiver: Receiver<WorkerMessage>, events: EventSender) {
    let mut converter = FormatConverter::new();

    for message in receiver {
        match message {
            WorkerMessage::Configure(stream) => configure_converter(&mut converter, &stream, "preview"),
            WorkerMessage::Frame(frame) => match converter.convert_frame(&frame) {
                Ok(raster) => events.send(SessionEvent::ProcessedImageReady(raster)),
                Err(err) => debug!("preview conversion failed. sequence: {}, error: {}", frame.sequence, err),
            },
        }
    }

    debug!("preview worker exited");
}

fn write_snapshot(raster: &Raster, output_dir: &Path) -> Result<PathBuf> {
    let path = output_dir.join(format!("{}.jpg", raster.timestamp));
    let file = File::create(&path).map_err(|err| Error::CreationFailed(format!("{}: {}", path.display(), err).into()))?;
    let mut writer = BufWriter::new(file);

    JpegEncoder::new_with_quality(&mut writer, SNAPSHOT_QUALITY)
        .encode(&raster.to_rgb(), raster.width, raster.height, ExtendedColorType::Rgb8)
        .map_err(|err| Error::EncodeFailed(err.to_string().into()))?;
    writer.flush()?;

    Ok(path)
}

pub(crate) fn run_snapshot(receiver: Receiver<WorkerMessage>, events: EventSender, output_dir: PathBuf) {
    let mut converter = FormatConverter::new();

    for message in receiver {
        match message {
            WorkerMessage::Configure(stream) => configure_converter(&mut converter, &stream, "snapshot"),
            WorkerMessage::Frame(frame) => match converter.convert_frame(&frame).and_then(|raster| write_snapshot(&raster, &output_dir)) {
                Ok(path) => {
                    info!("snapshot saved. path: {}", path.display());
                    events.send(SessionEvent::SnapshotCompleted(path));
                }
                Err(err) => error!("snapshot failed. sequence: {}, error: {}", frame.sequence, err),
            },
        }
    }

    debug!("snapshot worker exited");
}

pub(crate) struct Recorder {
    pipeline: EncodingPipeline,
    filename: Option<PathBuf>,
    events: EventSender,
    active: Arc<AtomicBool>,
    frames_recorded: Arc<AtomicU64>,
}

impl Recorder {
    pub fn new(events: EventSender, active: Arc<AtomicBool>, frames_recorded: Arc<AtomicU64>) -> Self {
        Self {
            pipeline: EncodingPipeline::new(),
            filename: None,
            events,
            active,
            frames_recorded,
        }
    }

    pub fn run(mut self, receiver: Receiver<RecorderMessage>) {
        for message in receiver {
            match message {
                RecorderMessage::Start {
                    params,
                    output_dir,
                    reply,
                } => {
                    let result = self.begin(&params, &output_dir);
                    if reply.send(result).is_err() {
                        warn!("recording start reply dropped");
                    }
                }
                RecorderMessage::Frame(frame) => self.record(frame),
                RecorderMessage::End => self.end(),
            }
        }

        self.end();
        debug!("recording worker exited");
    }

    fn begin(&mut self, params: &RecordingParameters, output_dir: &Path) -> Result<PathBuf> {
        if self.pipeline.is_active() {
            return Err(Error::Invalid("recording already active".into()));
        }

        let builder = find_encoder_by_name(&params.codec)?;
        let path = output_dir.join(format!("{}.{}", unix_timestamp_msec(), builder.extension()));
        let sink = StreamWriter::create(&path)?;

        if let Err(err) = self.pipeline.begin(params, Box::new(sink)) {
            if let Err(err) = fs::remove_file(&path) {
                debug!("failed to remove unused recording. path: {}, error: {}", path.display(), err);
            }
            return Err(err);
        }

        self.frames_recorded.store(0, Ordering::Release);
        self.active.store(true, Ordering::Release);
        self.filename = Some(path.clone());
        self.events.send(SessionEvent::RecordingStarted(path.clone()));

        Ok(path)
    }

    fn record(&mut self, frame: Frame) {
        if !self.pipeline.is_active() {
            return;
        }

        match self.pipeline.submit(&frame.plane_slices(), frame.sequence) {
            Ok(count) => {
                self.frames_recorded.store(count, Ordering::Release);
                self.events.send(SessionEvent::FrameRecorded(count));
            }
            Err(err) if self.pipeline.is_active() => debug!("frame not recorded. sequence: {}, error: {}", frame.sequence, err),
            Err(err) => {
                self.active.store(false, Ordering::Release);
                self.filename = None;
                self.events.send(SessionEvent::RecordingFailed(err));
            }
        }
    }

    fn end(&mut self) {
        self.active.store(false, Ordering::Release);
        let filename = self.filename.take();

        match self.pipeline.end() {
            Ok(Some(summary)) => {
                if let Some(filename) = filename {
                    self.events.send(SessionEvent::RecordingCompleted {
                        filename,
                        frame_count: summary.frame_count,
                    });
                }
            }
            Ok(None) => {}
            Err(err) => self.events.send(SessionEvent::RecordingFailed(err)),
        }
    }
}
