use std::collections::VecDeque;

use camera_core::{error::Error, invalid_error, invalid_param_error, rational::Rational64, transcode::Yuv420Image, variant::Variant, Result};

use crate::{
    codec::{CodecBuilder, CodecID},
    encoder::{Encoder, EncoderBuilder, VideoEncoderParameters},
    packet::{Packet, PacketFlags},
};

const CODEC_NAME: &str = "rawvideo";
const DEFAULT_DELAY: usize = 1;

/// Emits every frame as one tightly packed I420 key packet.
///
/// Packets are held back by `delay` frames, the way reordering encoders
/// keep frames queued until later input arrives.
pub struct RawVideoEncoder {
    width: u32,
    height: u32,
    time_base: Option<Rational64>,
    delay: usize,
    pending: VecDeque<Packet>,
    flushing: bool,
}

impl RawVideoEncoder {
    pub fn new(params: &VideoEncoderParameters, options: Option<&Variant>) -> Result<Self> {
        let (width, height) = params.dimensions()?;

        let mut encoder = Self {
            width,
            height,
            time_base: params.time_base(),
            delay: DEFAULT_DELAY,
            pending: VecDeque::new(),
            flushing: false,
        };

        if let Some(delay) = options.and_then(|options| options["delay"].get_uint32()) {
            encoder.delay = delay as usize;
        }

        Ok(encoder)
    }

    pub fn delay(&self) -> usize {
        self.delay
    }
}

impl Encoder for RawVideoEncoder {
    fn id(&self) -> CodecID {
        CodecID::RawVideo
    }

    fn name(&self) -> &'static str {
        CODEC_NAME
    }

    fn set_option(&mut self, key: &str, value: &Variant) -> Result<()> {
        match key {
            "delay" => {
                self.delay = value.get_uint32().ok_or_else(|| invalid_param_error!(key))? as usize;
                Ok(())
            }
            _ => Err(Error::Unsupported(format!("option: {}", key).into())),
        }
    }

    fn send_frame(&mut self, frame: &Yuv420Image, pts: i64) -> Result<()> {
        if self.flushing {
            return Err(invalid_error!("encoder flushed"));
        }
        if frame.width != self.width || frame.height != self.height {
            return Err(invalid_param_error!((frame.width, frame.height)));
        }
        if self.pending.len() > self.delay {
            return Err(Error::Again("receive pending packets first".into()));
        }

        let mut packet = Packet::from_vec(frame.to_packed());
        packet.pts = Some(pts);
        packet.dts = Some(pts);
        packet.duration = Some(1);
        packet.time_base = self.time_base;
        packet.flags = PacketFlags::Key;
        self.pending.push_back(packet);

        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.flushing = true;
        Ok(())
    }

    fn receive_packet(&mut self) -> Result<Packet> {
        if self.pending.len() > self.delay || self.flushing {
            if let Some(packet) = self.pending.pop_front() {
                return Ok(packet);
            }
        }

        if self.flushing {
            Err(Error::Eof)
        } else {
            Err(Error::Again("more input needed".into()))
        }
    }
}

pub struct RawVideoEncoderBuilder;

impl CodecBuilder for RawVideoEncoderBuilder {
    fn id(&self) -> CodecID {
        CodecID::RawVideo
    }

    fn name(&self) -> &'static str {
        CODEC_NAME
    }
}

impl EncoderBuilder for RawVideoEncoderBuilder {
    fn extension(&self) -> &'static str {
        "yuv"
    }

    fn new_encoder(&self, id: CodecID, params: &VideoEncoderParameters, options: Option<&Variant>) -> Result<Box<dyn Encoder>> {
        if id != CodecID::RawVideo {
            return Err(invalid_param_error!(id));
        }
        Ok(Box::new(RawVideoEncoder::new(params, options)?))
    }
}
