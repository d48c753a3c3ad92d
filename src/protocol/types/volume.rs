//! Volume data types.

use std::fmt;

use byteorder::{NetworkEndian, ReadBytesExt, WriteBytesExt};

use super::super::tagstruct::{Tag, TagStructRead, TagStructReader, TagStructWrite, TagStructWriter};
use super::sample_spec::CHANNELS_MAX;
use crate::protocol::ProtocolError;

const VOLUME_NORM: u32 = 0x10000;
const VOLUME_MUTED: u32 = 0;
const VOLUME_MAX: u32 = u32::MAX / 2;

/// Volume of a single channel, on the cubic scale the wire uses.
#[derive(Copy, Clone, Default, PartialEq, Eq)]
pub struct Volume(u32);

impl Volume {
    /// The normal volume (100%, 0 dB).
    pub const NORM: Self = Volume(VOLUME_NORM);

    /// The muted volume (0%, -Inf dB).
    pub const MUTED: Self = Volume(VOLUME_MUTED);

    /// The raw wire value.
    pub fn as_u32(&self) -> u32 {
        self.0
    }

    /// Creates a volume from a raw wire value, clamping out-of-range values.
    pub fn from_u32_clamped(raw: u32) -> Self {
        Volume(raw.min(VOLUME_MAX))
    }

    /// The amplification/attenuation in decibel corresponding to this volume.
    pub fn to_db(&self) -> f32 {
        self.to_linear().log10() * 20.0
    }

    /// Converts to a linear factor, 0.0 (mute) over 1.0 (0 dB) and beyond.
    pub fn to_linear(&self) -> f32 {
        let f = self.0 as f32 / VOLUME_NORM as f32;
        f * f * f
    }

    /// Converts from a linear factor, clamping out-of-range values.
    pub fn from_linear(linear: f32) -> Self {
        let raw = (linear.cbrt() * VOLUME_NORM as f32) as u32;
        Volume(raw.min(VOLUME_MAX))
    }
}

impl fmt::Display for Volume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1} dB", self.to_db())
    }
}

impl fmt::Debug for Volume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Volume").field(&self.0).finish()
    }
}

impl TagStructRead for Volume {
    fn read(ts: &mut TagStructReader<'_>, _protocol_version: u16) -> Result<Self, ProtocolError> {
        ts.expect_tag(Tag::Volume)?;
        Ok(Volume::from_u32_clamped(
            ts.inner.read_u32::<NetworkEndian>()?,
        ))
    }
}

impl TagStructWrite for Volume {
    fn write(
        &self,
        w: &mut TagStructWriter<'_>,
        _protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        w.inner.write_u8(Tag::Volume as u8)?;
        w.inner.write_u32::<NetworkEndian>(self.0)?;
        Ok(())
    }
}

/// Per-channel volume.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ChannelVolume {
    channels: u8,
    volumes: [Volume; CHANNELS_MAX as usize],
}

impl ChannelVolume {
    /// A volume set with no channels.
    pub fn empty() -> Self {
        Self {
            channels: 0,
            volumes: [Volume::MUTED; CHANNELS_MAX as usize],
        }
    }

    /// `channels` channels, all at the normal volume.
    pub fn norm(channels: u8) -> Self {
        Self {
            channels: channels.min(CHANNELS_MAX),
            volumes: [Volume::NORM; CHANNELS_MAX as usize],
        }
    }

    /// `channels` channels, all muted.
    pub fn muted(channels: u8) -> Self {
        Self {
            channels: channels.min(CHANNELS_MAX),
            volumes: [Volume::MUTED; CHANNELS_MAX as usize],
        }
    }

    /// Appends a channel volume.
    ///
    /// Panics when the set is full.
    pub fn push(&mut self, volume: Volume) {
        assert!(self.channels < CHANNELS_MAX, "channel volume full");
        self.volumes[self.channels as usize] = volume;
        self.channels += 1;
    }

    pub fn num_channels(&self) -> u8 {
        self.channels
    }

    pub fn channels(&self) -> &[Volume] {
        &self.volumes[..self.channels as usize]
    }

    /// The largest single-channel volume in the set.
    pub fn max(&self) -> Volume {
        self.channels()
            .iter()
            .copied()
            .max_by_key(Volume::as_u32)
            .unwrap_or(Volume::MUTED)
    }
}

impl Default for ChannelVolume {
    fn default() -> Self {
        Self::norm(1)
    }
}

impl fmt::Debug for ChannelVolume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.channels().fmt(f)
    }
}

impl TagStructRead for ChannelVolume {
    fn read(ts: &mut TagStructReader<'_>, _protocol_version: u16) -> Result<Self, ProtocolError> {
        ts.expect_tag(Tag::CVolume)?;

        let n_channels = ts.inner.read_u8()?;
        if n_channels == 0 || n_channels > CHANNELS_MAX {
            return Err(ProtocolError::Invalid(format!(
                "invalid cvolume channel count {}, must be between 1 and {}",
                n_channels, CHANNELS_MAX
            )));
        }

        let mut cvolume = ChannelVolume::empty();
        for _ in 0..n_channels {
            let raw = ts.inner.read_u32::<NetworkEndian>()?;
            cvolume.push(Volume::from_u32_clamped(raw))
        }

        Ok(cvolume)
    }
}

impl TagStructWrite for ChannelVolume {
    fn write(
        &self,
        w: &mut TagStructWriter<'_>,
        _protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        w.inner.write_u8(Tag::CVolume as u8)?;
        w.inner.write_u8(self.channels)?;
        for volume in self.channels() {
            w.inner.write_u32::<NetworkEndian>(volume.as_u32())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::protocol::tagstruct::test_util::test_serde;

    use super::*;

    #[test]
    fn volume_serde() -> anyhow::Result<()> {
        test_serde(&Volume::NORM)
    }

    #[test]
    fn cvolume_serde() -> anyhow::Result<()> {
        let mut v = ChannelVolume::norm(2);
        v.push(Volume::from_linear(0.5));

        test_serde(&v)
    }

    #[test]
    fn linear_conversion_clamps() {
        assert_eq!(Volume::from_linear(0.0), Volume::MUTED);
        assert_eq!(Volume::from_linear(1.0), Volume::NORM);
        assert!(Volume::from_linear(f32::MAX).as_u32() <= VOLUME_MAX);
    }
}
