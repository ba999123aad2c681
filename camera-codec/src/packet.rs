use std::io::{self, Write};

use bitflags::bitflags;
use camera_core::{invalid_param_error, rational::Rational64, Result};

bitflags! {
    #[repr(transparent)]
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct PacketFlags: u32 {
        const Key = 1;
        const Corrupt = 2;
    }
}

#[derive(Clone, Debug, Default)]
pub struct Packet {
    pub pts: Option<i64>,
    pub dts: Option<i64>,
    pub duration: Option<i64>,
    pub time_base: Option<Rational64>,
    pub flags: PacketFlags,
    data: Vec<u8>,
}

impl Packet {
    pub fn new(size: usize) -> Self {
        Self::from_vec(vec![0; size])
    }

    pub fn from_vec(data: Vec<u8>) -> Self {
        Self {
            data,
            ..Default::default()
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn is_key(&self) -> bool {
        self.flags.contains(PacketFlags::Key)
    }

    pub fn truncate(&mut self, len: usize) -> Result<()> {
        if len > self.data.len() {
            return Err(invalid_param_error!(len));
        }
        self.data.truncate(len);
        Ok(())
    }
}

pub trait WritePacket: Write {
    fn write_packet(&mut self, packet: &Packet) -> io::Result<()> {
        self.write_all(packet.data())
    }
}

impl<T: Write + ?Sized> WritePacket for T {}
