use std::{
    collections::HashMap,
    num::NonZeroU32,
    sync::{Arc, LazyLock, PoisonError, RwLock},
};

use camera_core::{error::Error, invalid_param_error, rational::Rational64, transcode::Yuv420Image, variant::Variant, Result};
use log::debug;

#[cfg(feature = "ffmpeg")]
use crate::ffmpeg::FfmpegEncoderBuilder;
use crate::{
    codec::{CodecBuilder, CodecID},
    packet::Packet,
    raw::RawVideoEncoderBuilder,
};

#[derive(Clone, Debug, Default)]
pub struct VideoParameters {
    pub width: Option<NonZeroU32>,
    pub height: Option<NonZeroU32>,
    pub frame_rate: Option<Rational64>,
}

impl VideoParameters {
    pub(crate) fn update_with_option(&mut self, key: &str, value: &Variant) {
        match key {
            "width" => self.width = value.get_uint32().and_then(NonZeroU32::new),
            "height" => self.height = value.get_uint32().and_then(NonZeroU32::new),
            "frame_rate" => self.frame_rate = value.get_uint32().map(|rate| Rational64::from_integer(rate as i64)),
            _ => {}
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct EncoderParameters {
    pub bit_rate: Option<u64>,
    pub gop_size: Option<u32>,
    pub max_b_frames: Option<u32>,
}

impl EncoderParameters {
    pub(crate) fn update_with_option(&mut self, key: &str, value: &Variant) {
        match key {
            "bit_rate" => self.bit_rate = value.get_uint64(),
            "gop_size" => self.gop_size = value.get_uint32(),
            "max_b_frames" => self.max_b_frames = value.get_uint32(),
            _ => {}
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct VideoEncoderParameters {
    pub video: VideoParameters,
    pub encoder: EncoderParameters,
}

impl VideoEncoderParameters {
    pub fn new(width: u32, height: u32, frame_rate: u32, bit_rate: u64) -> Self {
        Self {
            video: VideoParameters {
                width: NonZeroU32::new(width),
                height: NonZeroU32::new(height),
                frame_rate: (frame_rate > 0).then(|| Rational64::from_integer(frame_rate as i64)),
            },
            encoder: EncoderParameters {
                bit_rate: (bit_rate > 0).then_some(bit_rate),
                gop_size: Some(10),
                max_b_frames: Some(1),
            },
        }
    }

    pub fn update_with_option(&mut self, key: &str, value: &Variant) {
        self.video.update_with_option(key, value);
        self.encoder.update_with_option(key, value);
    }

    /// One tick per frame.
    pub fn time_base(&self) -> Option<Rational64> {
        self.video.frame_rate.filter(|rate| *rate.numer() > 0).map(|rate| rate.recip())
    }

    /// Validated (width, height) of a 4:2:0 encoder input.
    pub fn dimensions(&self) -> Result<(u32, u32)> {
        let width = self.video.width.ok_or_else(|| invalid_param_error!(self.video.width))?.get();
        let height = self.video.height.ok_or_else(|| invalid_param_error!(self.video.height))?.get();
        if width % 2 != 0 || height % 2 != 0 {
            return Err(invalid_param_error!((width, height)));
        }
        Ok((width, height))
    }
}

/// Frames go in with `send_frame`, packets come out with `receive_packet`.
///
/// `receive_packet` returns `Error::Again` while the encoder needs more
/// input and `Error::Eof` once it has been flushed and fully drained.
pub trait Encoder: Send {
    fn id(&self) -> CodecID;
    fn name(&self) -> &'static str;
    fn set_option(&mut self, key: &str, value: &Variant) -> Result<()>;
    fn send_frame(&mut self, frame: &Yuv420Image, pts: i64) -> Result<()>;
    fn flush(&mut self) -> Result<()>;
    fn receive_packet(&mut self) -> Result<Packet>;
}

pub trait EncoderBuilder: CodecBuilder {
    fn extension(&self) -> &'static str;
    fn new_encoder(&self, id: CodecID, params: &VideoEncoderParameters, options: Option<&Variant>) -> Result<Box<dyn Encoder>>;
}

type BuilderRef = Arc<dyn EncoderBuilder>;

/// Encoder builders grouped by codec. The head of each group is what
/// `find_encoder` hands out for that codec.
struct EncoderRegistry {
    builders: RwLock<HashMap<CodecID, Vec<BuilderRef>>>,
}

impl EncoderRegistry {
    fn with_builtin() -> Self {
        let registry = Self {
            builders: RwLock::new(HashMap::new()),
        };
        registry.insert(Arc::new(RawVideoEncoderBuilder), true);
        #[cfg(feature = "ffmpeg")]
        for builder in FfmpegEncoderBuilder::available() {
            registry.insert(Arc::new(builder), true);
        }
        registry
    }

    // A builder registered again under its name replaces the earlier one.
    fn insert(&self, builder: BuilderRef, default: bool) {
        let mut builders = self.builders.write().unwrap_or_else(PoisonError::into_inner);
        let group = builders.entry(builder.id()).or_default();
        group.retain(|registered| registered.name() != builder.name());

        debug!("encoder registered. codec: {:?}, name: {}, default: {}", builder.id(), builder.name(), default);

        if default {
            group.insert(0, builder);
        } else {
            group.push(builder);
        }
    }

    fn get(&self, id: CodecID) -> Result<BuilderRef> {
        let builders = self.builders.read().unwrap_or_else(PoisonError::into_inner);
        builders.get(&id).and_then(|group| group.first()).cloned().ok_or_else(|| Error::NotFound(format!("encoder: {:?}", id).into()))
    }

    fn get_by_name(&self, name: &str) -> Result<BuilderRef> {
        let builders = self.builders.read().unwrap_or_else(PoisonError::into_inner);
        builders.values().flatten().find(|builder| builder.name() == name).cloned().ok_or_else(|| Error::NotFound(format!("encoder: {}", name).into()))
    }
}

static ENCODERS: LazyLock<EncoderRegistry> = LazyLock::new(EncoderRegistry::with_builtin);

/// Makes `builder` available to `find_encoder_by_name`, and to `find_encoder`
/// as well when `default` is set or it is the first one for its codec.
pub fn register_encoder(builder: Arc<dyn EncoderBuilder>, default: bool) -> Result<()> {
    ENCODERS.insert(builder, default);
    Ok(())
}

pub fn find_encoder(id: CodecID) -> Result<Arc<dyn EncoderBuilder>> {
    ENCODERS.get(id)
}

pub fn find_encoder_by_name(name: &str) -> Result<Arc<dyn EncoderBuilder>> {
    ENCODERS.get_by_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NamedBuilder(&'static str);

    impl CodecBuilder for NamedBuilder {
        fn id(&self) -> CodecID {
            CodecID::H264
        }

        fn name(&self) -> &'static str {
            self.0
        }
    }

    impl EncoderBuilder for NamedBuilder {
        fn extension(&self) -> &'static str {
            "h264"
        }

        fn new_encoder(&self, _id: CodecID, _params: &VideoEncoderParameters, _options: Option<&Variant>) -> Result<Box<dyn Encoder>> {
            Err(Error::Unsupported(self.0.into()))
        }
    }

    #[test]
    fn test_registry_order() {
        let registry = EncoderRegistry {
            builders: RwLock::new(HashMap::new()),
        };
        assert!(matches!(registry.get(CodecID::H264), Err(Error::NotFound(_))));

        registry.insert(Arc::new(NamedBuilder("first")), false);
        registry.insert(Arc::new(NamedBuilder("second")), false);
        assert_eq!(registry.get(CodecID::H264).unwrap().name(), "first");

        registry.insert(Arc::new(NamedBuilder("preferred")), true);
        assert_eq!(registry.get(CodecID::H264).unwrap().name(), "preferred");

        // same name, new position
        registry.insert(Arc::new(NamedBuilder("first")), true);
        assert_eq!(registry.get(CodecID::H264).unwrap().name(), "first");
        assert_eq!(registry.builders.read().unwrap()[&CodecID::H264].len(), 3);

        assert_eq!(registry.get_by_name("second").unwrap().name(), "second");
        assert!(matches!(registry.get_by_name("rawvideo"), Err(Error::NotFound(_))));
    }
}
