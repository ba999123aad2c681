use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

use camera_core::{error::Error, Result};
use log::debug;

use crate::packet::{Packet, WritePacket};

/// MPEG sequence end code, appended once when an elementary stream is finalized.
pub const END_OF_STREAM_MARKER: [u8; 4] = [0x00, 0x00, 0x01, 0xB7];

pub trait OutputSink: Send {
    fn write_packet(&mut self, packet: &Packet) -> Result<()>;
    fn finalize(&mut self) -> Result<()>;
}

/// Writes packets back to back, as an elementary stream.
pub struct StreamWriter<W: Write + Send> {
    writer: W,
    bytes_written: u64,
    finalized: bool,
}

impl<W: Write + Send> StreamWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            bytes_written: 0,
            finalized: false,
        }
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl StreamWriter<BufWriter<File>> {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path.as_ref()).map_err(|err| Error::CreationFailed(format!("{}: {}", path.as_ref().display(), err).into()))?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write + Send> OutputSink for StreamWriter<W> {
    fn write_packet(&mut self, packet: &Packet) -> Result<()> {
        if self.finalized {
            return Err(Error::WriteFailed("stream finalized".into()));
        }
        self.writer.write_packet(packet)?;
        self.bytes_written += packet.len() as u64;
        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        if self.finalized {
            return Ok(());
        }
        self.finalized = true;
        self.writer.write_all(&END_OF_STREAM_MARKER)?;
        self.writer.flush()?;
        self.bytes_written += END_OF_STREAM_MARKER.len() as u64;
        debug!("stream finalized. bytes: {}", self.bytes_written);
        Ok(())
    }
}
