use std::{
    path::PathBuf,
    sync::mpsc::{self, Receiver, SyncSender, TrySendError},
};

use camera_core::{
    error::Error,
    format::PixelFormat,
    frame::{Frame, Raster},
};
use log::{debug, warn};

pub(crate) const EVENT_CAPACITY: usize = 256;

#[derive(Clone, Debug)]
pub enum SessionEvent {
    /// Sent once per successful (re)configuration, before any frame.
    FormatChanged {
        format: PixelFormat,
        width: u32,
        height: u32,
        stride: u32,
    },
    /// A captured viewfinder frame; planes are shared, not copied.
    FrameReady(Frame),
    ProcessedImageReady(Raster),
    SnapshotCompleted(PathBuf),
    RawFrameReady(Frame),
    RecordingStarted(PathBuf),
    FrameRecorded(u64),
    RecordingCompleted {
        filename: PathBuf,
        frame_count: u64,
    },
    RecordingFailed(Error),
}

/// Never blocks: events are dropped while the receiver lags behind.
#[derive(Clone)]
pub(crate) struct EventSender {
    sender: SyncSender<SessionEvent>,
}

impl EventSender {
    pub fn channel() -> (Self, Receiver<SessionEvent>) {
        let (sender, receiver) = mpsc::sync_channel(EVENT_CAPACITY);
        (
            Self {
                sender,
            },
            receiver,
        )
    }

    pub fn send(&self, event: SessionEvent) {
        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => warn!("event dropped, receiver lagging. event: {}", event.name()),
            Err(TrySendError::Disconnected(_)) => debug!("event receiver gone"),
        }
    }
}

impl SessionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::FormatChanged {
                ..
            } => "FormatChanged",
            SessionEvent::FrameReady(_) => "FrameReady",
            SessionEvent::ProcessedImageReady(_) => "ProcessedImageReady",
            SessionEvent::SnapshotCompleted(_) => "SnapshotCompleted",
            SessionEvent::RawFrameReady(_) => "RawFrameReady",
            SessionEvent::RecordingStarted(_) => "RecordingStarted",
            SessionEvent::FrameRecorded(_) => "FrameRecorded",
            SessionEvent::RecordingCompleted {
                ..
            } => "RecordingCompleted",
            SessionEvent::RecordingFailed(_) => "RecordingFailed",
        }
    }
}
