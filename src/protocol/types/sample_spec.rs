//! Sample specification data type.

use byteorder::{NetworkEndian, ReadBytesExt, WriteBytesExt};
use enum_primitive_derive::Primitive;
use num_traits::FromPrimitive;

use super::super::tagstruct::{Tag, TagStructRead, TagStructReader, TagStructWrite, TagStructWriter};
use crate::protocol::ProtocolError;

/// Maximum number of channels.
pub const CHANNELS_MAX: u8 = 32;

const USEC_PER_SEC: u64 = 1_000_000;

/// How individual samples are encoded. The numeric values are part of the
/// wire format.
#[derive(Debug, Copy, Clone, Primitive, PartialEq, Eq, Default)]
pub enum SampleFormat {
    /// Unsigned 8 bit PCM.
    U8 = 0,
    /// 8 bit a-Law.
    Alaw = 1,
    /// 8 bit mu-Law.
    Ulaw = 2,
    /// Signed 16 bit PCM, little endian.
    #[default]
    S16Le = 3,
    /// Signed 16 bit PCM, big endian.
    S16Be = 4,
    /// 32 bit IEEE floating point, little endian, range -1.0 to 1.0.
    Float32Le = 5,
    /// 32 bit IEEE floating point, big endian, range -1.0 to 1.0.
    Float32Be = 6,
    /// Signed 32 bit PCM, little endian.
    S32Le = 7,
    /// Signed 32 bit PCM, big endian.
    S32Be = 8,
    /// Signed 24 bit PCM packed, little endian.
    S24Le = 9,
    /// Signed 24 bit PCM packed, big endian.
    S24Be = 10,
    /// Signed 24 bit PCM in the LSB of 32 bit words, little endian.
    S24In32Le = 11,
    /// Signed 24 bit PCM in the LSB of 32 bit words, big endian.
    S24In32Be = 12,
}

impl SampleFormat {
    /// Returns the number of bytes used to store a single sample.
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            SampleFormat::U8 | SampleFormat::Alaw | SampleFormat::Ulaw => 1,
            SampleFormat::S16Le | SampleFormat::S16Be => 2,
            SampleFormat::S24Le | SampleFormat::S24Be => 3,
            SampleFormat::Float32Le
            | SampleFormat::Float32Be
            | SampleFormat::S32Le
            | SampleFormat::S32Be
            | SampleFormat::S24In32Le
            | SampleFormat::S24In32Be => 4,
        }
    }

    /// The byte value that encodes silence in this format.
    pub fn silence_byte(&self) -> u8 {
        match self {
            SampleFormat::U8 => 0x80,
            SampleFormat::Alaw => 0xd5,
            SampleFormat::Ulaw => 0xff,
            _ => 0x00,
        }
    }
}

/// Fully describes the format of a sample stream between two endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleSpec {
    /// Format / encoding of individual samples.
    pub format: SampleFormat,
    /// Number of independent channels.
    pub channels: u8,
    /// Number of samples per second (and per channel).
    pub rate: u32,
}

impl SampleSpec {
    /// Whether the spec describes a stream audio can actually flow through.
    pub fn is_valid(&self) -> bool {
        self.rate > 0 && self.channels > 0 && self.channels <= CHANNELS_MAX
    }

    /// The size of one frame (one sample for every channel), in bytes.
    pub fn frame_size(&self) -> usize {
        self.format.bytes_per_sample() * self.channels as usize
    }

    /// The number of bytes streamed per second.
    pub fn bytes_per_second(&self) -> usize {
        self.frame_size() * self.rate as usize
    }

    /// Converts a byte count into the stream duration it covers.
    pub fn bytes_to_usec(&self, bytes: u64) -> u64 {
        let bps = self.bytes_per_second() as u64;
        if bps == 0 {
            return 0;
        }

        (bytes / self.frame_size() as u64) * USEC_PER_SEC / self.rate as u64
    }

    /// Converts a duration into a byte count, rounded down to a frame.
    pub fn usec_to_bytes(&self, usec: u64) -> usize {
        let frames = usec * self.rate as u64 / USEC_PER_SEC;
        frames as usize * self.frame_size()
    }

    /// Converts a duration into a byte count, rounded up to a frame.
    pub fn usec_to_bytes_round_up(&self, usec: u64) -> usize {
        let frames = (usec * self.rate as u64).div_ceil(USEC_PER_SEC);
        frames as usize * self.frame_size()
    }

    /// Maps a `SampleSpec` to one an older client can understand.
    ///
    /// S32 formats predate version 12 and S24 formats predate version 15;
    /// both are reported as floats of matching endianness to older peers.
    pub fn protocol_downgrade(self, protocol_version: u16) -> SampleSpec {
        use self::SampleFormat::*;

        let mut fixed = self;

        if protocol_version < 12 {
            match fixed.format {
                S32Le => fixed.format = Float32Le,
                S32Be => fixed.format = Float32Be,
                _ => {}
            }
        }

        if protocol_version < 15 {
            match fixed.format {
                S24Le | S24In32Le => fixed.format = Float32Le,
                S24Be | S24In32Be => fixed.format = Float32Be,
                _ => {}
            }
        }

        fixed
    }
}

impl Default for SampleSpec {
    fn default() -> Self {
        Self {
            format: SampleFormat::default(),
            channels: 1,
            rate: 44100,
        }
    }
}

impl TagStructRead for SampleSpec {
    fn read(ts: &mut TagStructReader<'_>, _protocol_version: u16) -> Result<Self, ProtocolError> {
        ts.expect_tag(Tag::SampleSpec)?;
        let format = ts.inner.read_u8()?;
        let format = SampleFormat::from_u8(format)
            .ok_or_else(|| ProtocolError::Invalid(format!("invalid sample format {}", format)))?;
        let channels = ts.inner.read_u8()?;
        let rate = ts.inner.read_u32::<NetworkEndian>()?;

        Ok(Self {
            format,
            channels,
            rate,
        })
    }
}

impl TagStructWrite for SampleSpec {
    fn write(
        &self,
        w: &mut TagStructWriter<'_>,
        _protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        w.inner.write_u8(Tag::SampleSpec as u8)?;
        w.inner.write_u8(self.format as u8)?;
        w.inner.write_u8(self.channels)?;
        w.inner.write_u32::<NetworkEndian>(self.rate)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::protocol::tagstruct::test_util::test_serde;

    use super::*;

    #[test]
    fn sample_spec_serde() -> anyhow::Result<()> {
        let spec = SampleSpec {
            format: SampleFormat::S16Le,
            channels: 2,
            rate: 44100,
        };

        test_serde(&spec)
    }

    #[test]
    fn downgrade_rewrites_wide_formats() {
        let spec = SampleSpec {
            format: SampleFormat::S24Le,
            channels: 2,
            rate: 48000,
        };

        assert_eq!(spec.protocol_downgrade(14).format, SampleFormat::Float32Le);
        assert_eq!(spec.protocol_downgrade(15).format, SampleFormat::S24Le);

        let spec = SampleSpec {
            format: SampleFormat::S32Be,
            ..spec
        };

        assert_eq!(spec.protocol_downgrade(11).format, SampleFormat::Float32Be);
        assert_eq!(spec.protocol_downgrade(12).format, SampleFormat::S32Be);
    }

    #[test]
    fn duration_conversions() {
        let spec = SampleSpec {
            format: SampleFormat::S16Le,
            channels: 2,
            rate: 48000,
        };

        assert_eq!(spec.frame_size(), 4);
        assert_eq!(spec.usec_to_bytes(1_000_000), 192000);
        assert_eq!(spec.bytes_to_usec(192000), 1_000_000);
        assert_eq!(spec.usec_to_bytes_round_up(1), 4);
    }
}
