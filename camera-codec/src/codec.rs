#[allow(non_camel_case_types, clippy::upper_case_acronyms)]
#[repr(u32)]
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum CodecID {
    RawVideo = 1,
    MPEG1Video,
    H264,
}

pub trait CodecBuilder: Send + Sync {
    fn id(&self) -> CodecID;
    fn name(&self) -> &'static str;
}
