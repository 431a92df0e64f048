//! Audio format description and validation.

use serde::{Deserialize, Serialize};

use crate::error::{AudioError, Result};

/// Sample rates accepted by [`AudioFormat::validate`].
pub const MIN_SAMPLE_RATE: u32 = 8_000;
pub const MAX_SAMPLE_RATE: u32 = 192_000;
/// Channel counts accepted by [`AudioFormat::validate`].
pub const MAX_CHANNELS: u16 = 8;
/// Buffer sizes accepted by [`AudioFormat::validate`], in frames.
pub const MIN_BUFFER_FRAMES: u32 = 64;
pub const MAX_BUFFER_FRAMES: u32 = 8_192;

/// Stream format negotiated with an endpoint.
///
/// Samples are always `f32` internally; `bit_depth` describes the wire
/// format the endpoint converts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    /// Samples per second per channel.
    pub sample_rate: u32,
    /// Interleaved channel count.
    pub channels: u16,
    /// Endpoint-side sample width in bits (16, 24 or 32).
    pub bit_depth: u16,
    /// Hardware buffer size in frames.
    pub buffer_frames: u32,
}

impl Default for AudioFormat {
    fn default() -> Self {
        AudioFormat {
            sample_rate: 44_100,
            channels: 1,
            bit_depth: 32,
            buffer_frames: 1_024,
        }
    }
}

impl AudioFormat {
    pub fn new(sample_rate: u32, channels: u16, buffer_frames: u32) -> Self {
        AudioFormat {
            sample_rate,
            channels,
            bit_depth: 32,
            buffer_frames,
        }
    }

    /// Checks every field against the supported ranges.
    pub fn validate(&self) -> Result<()> {
        if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&self.sample_rate) {
            return Err(AudioError::invalid_format(format!(
                "sample rate {} outside {}..={}",
                self.sample_rate, MIN_SAMPLE_RATE, MAX_SAMPLE_RATE
            )));
        }
        if self.channels == 0 || self.channels > MAX_CHANNELS {
            return Err(AudioError::invalid_format(format!(
                "channel count {} outside 1..={}",
                self.channels, MAX_CHANNELS
            )));
        }
        if !matches!(self.bit_depth, 16 | 24 | 32) {
            return Err(AudioError::invalid_format(format!(
                "bit depth {} not one of 16, 24, 32",
                self.bit_depth
            )));
        }
        if !(MIN_BUFFER_FRAMES..=MAX_BUFFER_FRAMES).contains(&self.buffer_frames) {
            return Err(AudioError::invalid_format(format!(
                "buffer size {} frames outside {}..={}",
                self.buffer_frames, MIN_BUFFER_FRAMES, MAX_BUFFER_FRAMES
            )));
        }
        Ok(())
    }

    /// Samples per hardware buffer across all channels.
    pub fn buffer_samples(&self) -> usize {
        self.buffer_frames as usize * self.channels as usize
    }

    /// Duration of one hardware buffer in milliseconds.
    pub fn buffer_duration_ms(&self) -> f64 {
        self.buffer_frames as f64 * 1_000.0 / self.sample_rate as f64
    }

    /// Frames covering `ms` milliseconds at this sample rate.
    pub fn frames_for_ms(&self, ms: u32) -> u32 {
        (self.sample_rate as u64 * ms as u64 / 1_000) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_format_is_valid() {
        assert!(AudioFormat::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_out_of_range_fields() {
        let mut format = AudioFormat::default();
        format.sample_rate = 4_000;
        assert!(format.validate().is_err());

        let mut format = AudioFormat::default();
        format.channels = 9;
        assert!(format.validate().is_err());

        let mut format = AudioFormat::default();
        format.bit_depth = 12;
        assert!(format.validate().is_err());

        let mut format = AudioFormat::default();
        format.buffer_frames = 32;
        assert!(format.validate().is_err());
    }

    #[test]
    fn test_boundary_values_accepted() {
        let format = AudioFormat {
            sample_rate: MIN_SAMPLE_RATE,
            channels: MAX_CHANNELS,
            bit_depth: 16,
            buffer_frames: MAX_BUFFER_FRAMES,
        };
        assert!(format.validate().is_ok());
    }

    #[test]
    fn test_durations() {
        let format = AudioFormat::new(48_000, 2, 480);
        assert!((format.buffer_duration_ms() - 10.0).abs() < 1e-9);
        assert_eq!(format.frames_for_ms(200), 9_600);
        assert_eq!(format.buffer_samples(), 960);
    }
}
