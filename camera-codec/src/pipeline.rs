use camera_core::{error::Error, format::PixelFormat, invalid_param_error, transcode::Transcoder, transcode::Yuv420Image, Result};
use log::{debug, error, info, warn};

use crate::{
    encoder::{find_encoder_by_name, Encoder, VideoEncoderParameters},
    sink::OutputSink,
};

pub const DEFAULT_CODEC_NAME: &str = "rawvideo";

#[derive(Clone, Debug)]
pub struct RecordingParameters {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub frame_rate: u32,
    pub bit_rate: u64,
    pub codec: String,
}

impl RecordingParameters {
    pub fn new(format: PixelFormat, width: u32, height: u32, stride: u32) -> Self {
        Self {
            format,
            width,
            height,
            stride,
            frame_rate: 15,
            bit_rate: 300_000,
            codec: DEFAULT_CODEC_NAME.to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RecordingSummary {
    pub frame_count: u64,
    pub packet_count: u64,
}

struct EncodingSession {
    encoder: Box<dyn Encoder>,
    sink: Box<dyn OutputSink>,
    transcoder: Transcoder,
    image: Yuv420Image,
    next_pts: i64,
    last_sequence: Option<u64>,
    summary: RecordingSummary,
}

fn encode_error(err: Error) -> Error {
    match err {
        Error::EncodeFailed(_) | Error::WriteFailed(_) => err,
        err => Error::EncodeFailed(err.to_string().into()),
    }
}

impl EncodingSession {
    fn encode(&mut self) -> Result<()> {
        let pts = self.next_pts;

        match self.encoder.send_frame(&self.image, pts) {
            Ok(()) => {}
            Err(Error::Again(_)) => {
                self.drain()?;
                self.encoder.send_frame(&self.image, pts).map_err(encode_error)?;
            }
            Err(err) => return Err(encode_error(err)),
        }

        self.next_pts += 1;
        self.summary.frame_count += 1;

        self.drain()
    }

    // Writes every packet the encoder is ready to emit.
    fn drain(&mut self) -> Result<()> {
        loop {
            match self.encoder.receive_packet() {
                Ok(packet) => {
                    self.sink.write_packet(&packet)?;
                    self.summary.packet_count += 1;
                }
                Err(Error::Again(_)) | Err(Error::Eof) => return Ok(()),
                Err(err) => return Err(encode_error(err)),
            }
        }
    }

    /// The sink is finalized even when flushing fails, so the output stays
    /// terminated and the file handle is released.
    fn finish(&mut self) -> Result<()> {
        let flushed = self.encoder.flush().map_err(encode_error).and_then(|_| self.drain());
        let finalized = self.sink.finalize();

        match flushed {
            Ok(()) => finalized,
            Err(err) => {
                if let Err(finalize_err) = finalized {
                    warn!("failed to finalize recording after flush error. error: {}", finalize_err);
                }
                Err(err)
            }
        }
    }
}

/// Turns submitted frames into an encoded stream written to an output sink.
#[derive(Default)]
pub struct EncodingPipeline {
    session: Option<EncodingSession>,
}

impl EncodingPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    pub fn frame_count(&self) -> u64 {
        self.session.as_ref().map_or(0, |session| session.summary.frame_count)
    }

    pub fn begin(&mut self, params: &RecordingParameters, sink: Box<dyn OutputSink>) -> Result<()> {
        if self.session.is_some() {
            return Err(Error::Invalid("recording already active".into()));
        }
        if params.frame_rate == 0 {
            return Err(invalid_param_error!(params.frame_rate));
        }
        if params.bit_rate == 0 {
            return Err(invalid_param_error!(params.bit_rate));
        }

        let transcoder = Transcoder::new(params.format, params.width, params.height, params.stride)?;
        let builder = find_encoder_by_name(&params.codec)?;
        let encoder_params = VideoEncoderParameters::new(params.width, params.height, params.frame_rate, params.bit_rate);
        let encoder = builder.new_encoder(builder.id(), &encoder_params, None)?;
        let image = transcoder.new_image()?;

        info!(
            "recording started. codec: {}, format: {}, size: {}x{}, fps: {}, bit rate: {}",
            encoder.name(),
            params.format,
            params.width,
            params.height,
            params.frame_rate,
            params.bit_rate
        );

        self.session = Some(EncodingSession {
            encoder,
            sink,
            transcoder,
            image,
            next_pts: 0,
            last_sequence: None,
            summary: RecordingSummary::default(),
        });

        Ok(())
    }

    /// Encodes one frame and returns the number of frames submitted so far.
    ///
    /// Input that does not match the configured layout is rejected without
    /// ending the recording. Encoder or sink faults abort it.
    pub fn submit(&mut self, planes: &[&[u8]], sequence: u64) -> Result<u64> {
        let session = self.session.as_mut().ok_or_else(|| Error::NotRunning("recording".into()))?;

        session.transcoder.transcode(planes, &mut session.image)?;

        if let Some(last) = session.last_sequence {
            if sequence > last + 1 {
                debug!("frames skipped while recording. last: {}, sequence: {}", last, sequence);
            }
        }
        session.last_sequence = Some(sequence);

        match session.encode() {
            Ok(()) => Ok(session.summary.frame_count),
            Err(err) => {
                error!("recording aborted. error: {}", err);
                self.abort();
                Err(err)
            }
        }
    }

    /// Flushes and finalizes the output. Calling it without an active
    /// recording returns `Ok(None)`.
    pub fn end(&mut self) -> Result<Option<RecordingSummary>> {
        let Some(mut session) = self.session.take() else {
            return Ok(None);
        };

        session.finish().inspect_err(|err| error!("recording finalization failed. error: {}", err))?;

        info!("recording completed. frames: {}, packets: {}", session.summary.frame_count, session.summary.packet_count);

        Ok(Some(session.summary))
    }

    fn abort(&mut self) {
        if let Some(mut session) = self.session.take() {
            if let Err(err) = session.sink.finalize() {
                warn!("failed to finalize aborted recording. error: {}", err);
            }
        }
    }
}
