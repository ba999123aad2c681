//! libavcodec encoders for compressed recordings.
//!
//! Input is always planar 4:2:0, so no scaler sits between the transcoder
//! and the codec context.

use camera_core::{error::Error, invalid_error, invalid_param_error, rational::Rational64, transcode::Yuv420Image, variant::Variant, Result};
use ffmpeg_next::{
    codec::{self, Id},
    encoder,
    error::Error as FfmpegError,
    frame::Video as VideoFrame,
    packet::Packet as FfmpegPacket,
    util::{error::EAGAIN, format::pixel::Pixel},
};
use log::{debug, warn};

use crate::{
    codec::{CodecBuilder, CodecID},
    encoder::{Encoder, EncoderBuilder, VideoEncoderParameters},
    packet::{Packet, PacketFlags},
};

const PIXEL_FORMAT: Pixel = Pixel::YUV420P;
const DEFAULT_GOP_SIZE: u32 = 10;

fn creation_error(err: FfmpegError) -> Error {
    Error::CreationFailed(err.to_string().into())
}

fn encode_error(err: FfmpegError) -> Error {
    match err {
        FfmpegError::Other {
            errno,
        } if errno == EAGAIN => Error::Again("encoder queue full".into()),
        FfmpegError::Eof => Error::Eof,
        err => Error::EncodeFailed(err.to_string().into()),
    }
}

pub struct FfmpegEncoder {
    id: CodecID,
    name: &'static str,
    width: u32,
    height: u32,
    encoder: encoder::video::Encoder,
    time_base: Option<Rational64>,
    flushing: bool,
}

// SAFETY: the codec context is owned by this value and only reached through
// `&mut self`, so it is never used from two threads at once.
unsafe impl Send for FfmpegEncoder {}

impl FfmpegEncoder {
    fn new(builder: &FfmpegEncoderBuilder, params: &VideoEncoderParameters) -> Result<Self> {
        let (width, height) = params.dimensions()?;
        let frame_rate = params.video.frame_rate.ok_or_else(|| invalid_param_error!(params.video.frame_rate))?;
        let bit_rate = params.encoder.bit_rate.ok_or_else(|| invalid_param_error!(params.encoder.bit_rate))?;
        let (Ok(num), Ok(den)) = (i32::try_from(*frame_rate.numer()), i32::try_from(*frame_rate.denom())) else {
            return Err(invalid_param_error!(frame_rate));
        };

        ffmpeg_next::init().map_err(creation_error)?;
        let codec = codec::encoder::find(builder.ffmpeg_id()).ok_or_else(|| Error::NotFound(format!("encoder: {}", builder.name).into()))?;

        let mut context = codec::Context::new_with_codec(codec).encoder().video().map_err(creation_error)?;
        context.set_width(width);
        context.set_height(height);
        context.set_format(PIXEL_FORMAT);
        context.set_time_base((den, num));
        context.set_frame_rate(Some((num, den)));
        context.set_bit_rate(usize::try_from(bit_rate).unwrap_or(usize::MAX));
        context.set_gop(params.encoder.gop_size.unwrap_or(DEFAULT_GOP_SIZE));
        context.set_max_b_frames(params.encoder.max_b_frames.unwrap_or(0) as usize);
        let encoder = context.open_as(codec).map_err(creation_error)?;

        debug!("ffmpeg encoder opened. codec: {}, size: {}x{}, fps: {}/{}, bit rate: {}", builder.name, width, height, num, den, bit_rate);

        Ok(Self {
            id: builder.id,
            name: builder.name,
            width,
            height,
            encoder,
            time_base: params.time_base(),
            flushing: false,
        })
    }

    // A fresh frame per call: libavcodec keeps a reference to queued input.
    fn picture(&self, image: &Yuv420Image, pts: i64) -> VideoFrame {
        let mut picture = VideoFrame::new(PIXEL_FORMAT, self.width, self.height);

        for index in 0..3 {
            let (row_bytes, rows) = if index == 0 {
                (image.width as usize, image.height as usize)
            } else {
                (image.chroma_width(), image.chroma_height())
            };
            let src_stride = image.stride(index);
            let dst_stride = picture.stride(index);
            let src = image.plane(index);
            let dst = picture.data_mut(index);
            for (dst_row, src_row) in dst.chunks_mut(dst_stride).zip(src.chunks(src_stride)).take(rows) {
                dst_row[..row_bytes].copy_from_slice(&src_row[..row_bytes]);
            }
        }

        picture.set_pts(Some(pts));
        picture
    }
}

impl Encoder for FfmpegEncoder {
    fn id(&self) -> CodecID {
        self.id
    }

    fn name(&self) -> &'static str {
        self.name
    }

    fn set_option(&mut self, key: &str, _value: &Variant) -> Result<()> {
        // the context is already open
        Err(Error::Unsupported(format!("option: {}", key).into()))
    }

    fn send_frame(&mut self, frame: &Yuv420Image, pts: i64) -> Result<()> {
        if self.flushing {
            return Err(invalid_error!("encoder flushed"));
        }
        if frame.width != self.width || frame.height != self.height {
            return Err(invalid_param_error!((frame.width, frame.height)));
        }

        let picture = self.picture(frame, pts);
        self.encoder.send_frame(&picture).map_err(encode_error)
    }

    fn flush(&mut self) -> Result<()> {
        if self.flushing {
            return Ok(());
        }
        self.flushing = true;
        self.encoder.send_eof().map_err(encode_error)
    }

    fn receive_packet(&mut self) -> Result<Packet> {
        let mut encoded = FfmpegPacket::empty();
        self.encoder.receive_packet(&mut encoded).map_err(encode_error)?;

        let mut packet = Packet::from_vec(encoded.data().map(<[u8]>::to_vec).unwrap_or_default());
        packet.pts = encoded.pts();
        packet.dts = encoded.dts();
        packet.duration = Some(encoded.duration()).filter(|duration| *duration > 0);
        packet.time_base = self.time_base;
        packet.flags.set(PacketFlags::Key, encoded.is_key());
        packet.flags.set(PacketFlags::Corrupt, encoded.is_corrupt());

        Ok(packet)
    }
}

/// Builds libavcodec encoders for one codec.
#[derive(Clone, Copy, Debug)]
pub struct FfmpegEncoderBuilder {
    id: CodecID,
    name: &'static str,
    extension: &'static str,
}

impl FfmpegEncoderBuilder {
    pub const H264: Self = Self {
        id: CodecID::H264,
        name: "h264",
        extension: "h264",
    };

    pub const MPEG1_VIDEO: Self = Self {
        id: CodecID::MPEG1Video,
        name: "mpeg1video",
        extension: "mpg",
    };

    /// The builders whose codec the linked libavcodec can encode.
    pub fn available() -> Vec<Self> {
        if let Err(err) = ffmpeg_next::init() {
            warn!("ffmpeg initialization failed. error: {}", err);
            return Vec::new();
        }

        [Self::H264, Self::MPEG1_VIDEO]
            .into_iter()
            .filter(|builder| {
                let found = codec::encoder::find(builder.ffmpeg_id()).is_some();
                if !found {
                    debug!("ffmpeg encoder not built in. codec: {}", builder.name);
                }
                found
            })
            .collect()
    }

    fn ffmpeg_id(&self) -> Id {
        match self.id {
            CodecID::MPEG1Video => Id::MPEG1VIDEO,
            CodecID::H264 => Id::H264,
            CodecID::RawVideo => Id::RAWVIDEO,
        }
    }
}

impl CodecBuilder for FfmpegEncoderBuilder {
    fn id(&self) -> CodecID {
        self.id
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

impl EncoderBuilder for FfmpegEncoderBuilder {
    fn extension(&self) -> &'static str {
        self.extension
    }

    fn new_encoder(&self, id: CodecID, params: &VideoEncoderParameters, options: Option<&Variant>) -> Result<Box<dyn Encoder>> {
        if id != self.id {
            return Err(invalid_param_error!(id));
        }

        let mut params = params.clone();
        if let Some(options) = options {
            for key in ["gop_size", "max_b_frames"] {
                if options[key].get_uint32().is_some() {
                    params.update_with_option(key, &options[key]);
                }
            }
        }

        Ok(Box::new(FfmpegEncoder::new(self, &params)?))
    }
}
