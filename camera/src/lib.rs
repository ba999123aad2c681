pub use camera_codec as codec;
pub use camera_core::*;
pub use camera_device as device;

pub mod config;
pub mod events;
pub mod session;

mod worker;

pub use config::CaptureConfig;
pub use events::SessionEvent;
pub use session::{CaptureSession, CaptureStats};
