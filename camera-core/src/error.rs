use std::borrow::Cow;

use thiserror::Error;

#[derive(Clone, Debug, Error)]
pub enum Error {
    #[error("Failed: {0}")]
    Failed(Cow<'static, str>),
    #[error("Invalid: {0}")]
    Invalid(Cow<'static, str>),
    #[error("Again: {0}")]
    Again(Cow<'static, str>),
    #[error("End of stream")]
    Eof,
    #[error("Creation failed: {0}")]
    CreationFailed(Cow<'static, str>),
    #[error("Invalid parameter: {0} {1}")]
    InvalidParameter(Cow<'static, str>, Cow<'static, str>),
    #[error("Not found: {0}")]
    NotFound(Cow<'static, str>),
    #[error("Unsupported: {0}")]
    Unsupported(Cow<'static, str>),
    #[error("Exhausted: {0}")]
    Exhausted(Cow<'static, str>),
    #[error("Start failed: {0}")]
    StartFailed(Cow<'static, str>),
    #[error("Stop failed: {0}")]
    StopFailed(Cow<'static, str>),
    #[error("Not running: {0}")]
    NotRunning(Cow<'static, str>),
    #[error("Submit failed: {0}")]
    SubmitFailed(Cow<'static, str>),
    #[error("Encode failed: {0}")]
    EncodeFailed(Cow<'static, str>),
    #[error("Decode failed: {0}")]
    DecodeFailed(Cow<'static, str>),
    #[error("Write failed: {0}")]
    WriteFailed(Cow<'static, str>),
}

impl Error {
    /// Errors caused by a bad setup rather than by a runtime fault.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Error::Invalid(_) | Error::InvalidParameter(_, _) | Error::NotFound(_) | Error::Unsupported(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::WriteFailed(err.to_string().into())
    }
}

#[macro_export]
macro_rules! invalid_error {
    ($param:literal) => {
        $crate::error::Error::Invalid($param.into())
    };
    ($param:expr) => {
        $crate::error::Error::Invalid(format!("{:?}", $param).into())
    };
}

#[macro_export]
macro_rules! failed_error {
    ($param:literal) => {
        $crate::error::Error::Failed($param.into())
    };
    ($param:expr) => {
        $crate::error::Error::Failed(format!("{:?}", $param).into())
    };
}

#[macro_export]
macro_rules! invalid_param_error {
    ($param:expr) => {
        $crate::error::Error::InvalidParameter(stringify!($param).into(), format!("{:?}", $param).into())
    };
}

#[macro_export]
macro_rules! not_found_error {
    ($param:literal) => {
        $crate::error::Error::NotFound($param.into())
    };
    ($param:expr) => {
        $crate::error::Error::NotFound(format!("{:?}", $param).into())
    };
}

#[macro_export]
macro_rules! unsupported_error {
    ($param:literal) => {
        $crate::error::Error::Unsupported($param.into())
    };
    ($param:expr) => {
        $crate::error::Error::Unsupported(format!("{:?}", $param).into())
    };
}
