pub mod device;
pub mod dispatch;
pub mod fanout;
pub mod pool;
pub mod request;
pub mod virtual_camera;

pub use device::*;
