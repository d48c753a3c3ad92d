//! Channel position maps.

use std::fmt;

use byteorder::ReadBytesExt;
use byteorder::WriteBytesExt;
use enum_primitive_derive::Primitive;
use num_traits::FromPrimitive;

use super::super::tagstruct::{Tag, TagStructRead, TagStructReader, TagStructWrite, TagStructWriter};
use super::sample_spec::CHANNELS_MAX;
use crate::protocol::ProtocolError;

/// A speaker position. The numeric values are part of the wire format.
#[allow(missing_docs)]
#[derive(Default, Debug, Copy, Clone, Eq, PartialEq, Primitive)]
pub enum ChannelPosition {
    #[default]
    Mono = 0,
    FrontLeft = 1,
    FrontRight = 2,
    FrontCenter = 3,
    RearCenter = 4,
    RearLeft = 5,
    RearRight = 6,
    Lfe = 7,
    FrontLeftOfCenter = 8,
    FrontRightOfCenter = 9,
    SideLeft = 10,
    SideRight = 11,
    Aux0 = 12,
    Aux1 = 13,
    Aux2 = 14,
    Aux3 = 15,
    Aux4 = 16,
    Aux5 = 17,
    Aux6 = 18,
    Aux7 = 19,
    Aux8 = 20,
    Aux9 = 21,
    Aux10 = 22,
    Aux11 = 23,
    Aux12 = 24,
    Aux13 = 25,
    Aux14 = 26,
    Aux15 = 27,
    Aux16 = 28,
    Aux17 = 29,
    Aux18 = 30,
    Aux19 = 31,
    Aux20 = 32,
    Aux21 = 33,
    Aux22 = 34,
    Aux23 = 35,
    Aux24 = 36,
    Aux25 = 37,
    Aux26 = 38,
    Aux27 = 39,
    Aux28 = 40,
    Aux29 = 41,
    Aux30 = 42,
    Aux31 = 43,
    TopCenter = 44,
    TopFrontLeft = 45,
    TopFrontRight = 46,
    TopFrontCenter = 47,
    TopRearLeft = 48,
    TopRearRight = 49,
    TopRearCenter = 50,
}

/// An ordered assignment of channels to speaker positions.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ChannelMap {
    channels: u8,
    map: [ChannelPosition; CHANNELS_MAX as usize],
}

impl Default for ChannelMap {
    fn default() -> Self {
        Self::mono()
    }
}

impl ChannelMap {
    /// A map with no channels at all.
    pub fn empty() -> Self {
        ChannelMap {
            channels: 0,
            map: [Default::default(); CHANNELS_MAX as usize],
        }
    }

    /// A single mono channel.
    pub fn mono() -> Self {
        Self {
            channels: 1,
            map: [Default::default(); CHANNELS_MAX as usize],
        }
    }

    /// Standard front left/right stereo.
    pub fn stereo() -> Self {
        let mut map = Self::empty();
        map.push(ChannelPosition::FrontLeft);
        map.push(ChannelPosition::FrontRight);
        map
    }

    /// A default map for `channels` channels: mono, stereo, or aux positions.
    pub fn with_channels(channels: u8) -> Self {
        match channels {
            1 => Self::mono(),
            2 => Self::stereo(),
            n => {
                let mut map = Self::empty();
                for i in 0..n.min(CHANNELS_MAX) {
                    map.push(ChannelPosition::from_u8(ChannelPosition::Aux0 as u8 + i)
                        .unwrap_or(ChannelPosition::Mono));
                }
                map
            }
        }
    }

    /// Appends a position to the map.
    ///
    /// Panics when the map is full.
    pub fn push(&mut self, position: ChannelPosition) {
        assert!(self.channels < CHANNELS_MAX, "channel map full");
        self.map[self.channels as usize] = position;
        self.channels += 1;
    }

    pub fn num_channels(&self) -> u8 {
        self.channels
    }

    pub fn positions(&self) -> &[ChannelPosition] {
        &self.map[..self.channels as usize]
    }
}

impl fmt::Debug for ChannelMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.positions().fmt(f)
    }
}

impl TagStructRead for ChannelMap {
    fn read(ts: &mut TagStructReader<'_>, _protocol_version: u16) -> Result<Self, ProtocolError> {
        ts.expect_tag(Tag::ChannelMap)?;

        let channels = ts.inner.read_u8()?;
        if channels > CHANNELS_MAX {
            return Err(ProtocolError::Invalid(format!(
                "channel map too large (max is {} channels, got {})",
                CHANNELS_MAX, channels
            )));
        }

        let mut map = ChannelMap::empty();
        for _ in 0..channels {
            let raw = ts.inner.read_u8()?;
            map.push(ChannelPosition::from_u8(raw).ok_or_else(|| {
                ProtocolError::Invalid(format!("invalid channel position {}", raw))
            })?)
        }

        Ok(map)
    }
}

impl TagStructWrite for ChannelMap {
    fn write(
        &self,
        w: &mut TagStructWriter<'_>,
        _protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        w.inner.write_u8(Tag::ChannelMap as u8)?;
        w.inner.write_u8(self.channels)?;
        for position in self.positions() {
            w.inner.write_u8(*position as u8)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::protocol::tagstruct::test_util::test_serde;

    use super::*;

    #[test]
    fn channel_map_serde() -> anyhow::Result<()> {
        test_serde(&ChannelMap::stereo())?;
        test_serde(&ChannelMap::with_channels(6))
    }
}
