use std::{path::PathBuf, time::Duration};

use camera_codec::pipeline::DEFAULT_CODEC_NAME;
use camera_core::{format::PixelFormat, invalid_param_error, time::frame_duration_usec, variant::Variant, Result};
use camera_device::request::Controls;
use log::debug;

const OPTION_KEYS: [&str; 9] = ["format", "width", "height", "frame-rate", "bit-rate", "buffer-count", "raw", "enabled", "debounce-ms"];

#[derive(Clone, Debug, PartialEq)]
pub struct CaptureConfig {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub bit_rate: u64,
    /// Buffers allocated per stream.
    pub buffer_count: usize,
    /// Configure a raw capture stream next to the viewfinder.
    pub raw: bool,
    /// Where snapshots and recordings are written.
    pub output_dir: PathBuf,
    pub codec: String,
    /// Quiet period before a reconfiguration restarts capture.
    pub debounce: Duration,
    pub enabled: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            format: PixelFormat::RGB565,
            width: 640,
            height: 480,
            frame_rate: 15,
            bit_rate: 300_000,
            buffer_count: 4,
            raw: false,
            output_dir: PathBuf::from("."),
            codec: DEFAULT_CODEC_NAME.to_string(),
            debounce: Duration::from_millis(50),
            enabled: true,
        }
    }
}

impl CaptureConfig {
    /// `format` takes a fourcc or a `PixelFormat` index.
    pub fn update_with_option(&mut self, key: &str, value: &Variant) -> Result<()> {
        match key {
            "format" => {
                if let Some(code) = value.get_uint32() {
                    self.format = PixelFormat::try_from(code)?;
                }
            }
            "width" => self.width = value.get_uint32().unwrap_or(self.width),
            "height" => self.height = value.get_uint32().unwrap_or(self.height),
            "frame-rate" => {
                if let Some(rate) = value.get_uint32().or_else(|| value.get_float().map(|rate| rate.round() as u32)) {
                    self.frame_rate = rate;
                }
            }
            "bit-rate" => self.bit_rate = value.get_uint64().unwrap_or(self.bit_rate),
            "buffer-count" => self.buffer_count = value.get_uint32().map_or(self.buffer_count, |count| count as usize),
            "raw" => self.raw = value.get_bool().unwrap_or(self.raw),
            "enabled" => self.enabled = value.get_bool().unwrap_or(self.enabled),
            "debounce-ms" => self.debounce = value.get_uint64().map_or(self.debounce, Duration::from_millis),
            _ => debug!("unknown capture option ignored. key: {}", key),
        }
        Ok(())
    }

    /// Applies every known key of an option dictionary. Nothing changes if
    /// the result does not validate.
    pub fn apply(&mut self, options: &Variant) -> Result<()> {
        let mut updated = self.clone();
        for key in OPTION_KEYS {
            updated.update_with_option(key, &options[key])?;
        }
        updated.validate()?;
        *self = updated;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(invalid_param_error!((self.width, self.height)));
        }
        if self.frame_rate == 0 {
            return Err(invalid_param_error!(self.frame_rate));
        }
        if self.bit_rate == 0 {
            return Err(invalid_param_error!(self.bit_rate));
        }
        if self.buffer_count == 0 {
            return Err(invalid_param_error!(self.buffer_count));
        }
        Ok(())
    }

    /// Fixed frame duration matching the configured rate.
    pub fn controls(&self) -> Controls {
        let duration = frame_duration_usec(self.frame_rate);
        Controls {
            frame_duration_limits: (duration > 0).then_some((duration, duration)),
        }
    }
}
