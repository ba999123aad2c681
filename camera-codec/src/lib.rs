pub mod codec;
pub mod encoder;
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;
pub mod packet;
pub mod pipeline;
pub mod raw;
pub mod sink;

pub use codec::*;
