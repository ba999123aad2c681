pub use x_variant as variant;

pub mod convert;
pub mod error;
pub mod format;
pub mod frame;
pub mod time;
pub mod transcode;

pub mod rational {
    pub use num_rational::Rational64;
}

mod utils;

pub use utils::*;

use crate::error::Error;

pub type Result<T> = std::result::Result<T, Error>;
