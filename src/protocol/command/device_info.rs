//! Sink and source introspection replies.

use std::ffi::CString;

use bitflags::bitflags;
use enum_primitive_derive::Primitive;

use crate::protocol::{tagstruct::*, ProtocolError};
use crate::protocol::{
    ChannelMap, ChannelVolume, FormatEncoding, FormatInfo, PortAvailable, PortDirection, PortInfo,
    PortType, Props, SampleFormat, SampleSpec, Volume,
};

use super::CommandReply;

bitflags! {
    /// Sink capability flags.
    #[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
    pub struct SinkFlags: u32 {
        /// The sink supports hardware volume control.
        const HW_VOLUME_CTRL = 0x0001;
        /// The sink supports latency querying.
        const LATENCY = 0x0002;
        /// The sink is backed by hardware, not another piece of software.
        const HARDWARE = 0x0004;
        /// The sink is a networked sink.
        const NETWORK = 0x0008;
        /// The sink supports hardware mute control.
        const HW_MUTE_CTRL = 0x0010;
        /// The volume can be translated to decibels.
        const DECIBEL_VOLUME = 0x0020;
        /// The sink is in flat-volume mode.
        const FLAT_VOLUME = 0x0040;
        /// The latency of the sink can be adjusted dynamically.
        const DYNAMIC_LATENCY = 0x0080;
        /// The supported formats of the sink can be changed.
        const SET_FORMATS = 0x0100;
    }
}

bitflags! {
    /// Source capability flags.
    #[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
    pub struct SourceFlags: u32 {
        /// The source supports hardware volume control.
        const HW_VOLUME_CTRL = 0x0001;
        /// The source supports latency querying.
        const LATENCY = 0x0002;
        /// The source is backed by hardware.
        const HARDWARE = 0x0004;
        /// The source is a networked source.
        const NETWORK = 0x0008;
        /// The source supports hardware mute control.
        const HW_MUTE_CTRL = 0x0010;
        /// The volume can be translated to decibels.
        const DECIBEL_VOLUME = 0x0020;
        /// The latency of the source can be adjusted dynamically.
        const DYNAMIC_LATENCY = 0x0040;
        /// The source is in flat-volume mode.
        const FLAT_VOLUME = 0x0080;
    }
}

/// Activity state of a device. The numeric values are part of the wire
/// format.
#[derive(Default, Debug, Copy, Clone, Eq, PartialEq, Primitive)]
pub enum DeviceState {
    /// The device is in use by at least one non-corked stream.
    Running = 0,
    /// The device is open but no stream is feeding or draining it.
    Idle = 1,
    /// The device is suspended and can be closed.
    #[default]
    Suspended = 2,
}

/// Parameters addressing a device by index or name, never both.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct GetDeviceInfo {
    /// The index of the device to query.
    pub index: Option<u32>,

    /// The name of the device to query.
    pub name: Option<CString>,
}

impl TagStructRead for GetDeviceInfo {
    fn read(ts: &mut TagStructReader<'_>, _protocol_version: u16) -> Result<Self, ProtocolError> {
        Ok(Self {
            index: ts.read_index()?,
            name: ts.read_string()?,
        })
    }
}

impl TagStructWrite for GetDeviceInfo {
    fn write(
        &self,
        w: &mut TagStructWriter<'_>,
        _protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        w.write_index(self.index)?;
        w.write_string(self.name.as_ref())?;
        Ok(())
    }
}

fn read_ports(
    ts: &mut TagStructReader<'_>,
    protocol_version: u16,
    dir: PortDirection,
) -> Result<(Vec<PortInfo>, usize), ProtocolError> {
    let mut ports = Vec::new();
    for _ in 0..ts.read_u32()? {
        let name = ts.read_string_non_null()?;
        let description = ts.read_string()?;
        let priority = ts.read_u32()?;

        let available = if protocol_version >= 24 {
            ts.read_enum()?
        } else {
            PortAvailable::Unknown
        };

        let (availability_group, port_type) = if protocol_version >= 34 {
            (ts.read_string()?, ts.read_enum()?)
        } else {
            (None, PortType::Unknown)
        };

        ports.push(PortInfo {
            name,
            description,
            dir,
            priority,
            available,
            port_type,
            availability_group,
        });
    }

    let mut active_port = 0;
    if let Some(active) = ts.read_string()? {
        active_port = ports
            .iter()
            .position(|p| active.as_bytes() == p.name.as_bytes())
            .unwrap_or(0);
    }

    Ok((ports, active_port))
}

fn write_ports(
    w: &mut TagStructWriter<'_>,
    protocol_version: u16,
    ports: &[PortInfo],
    active_port: usize,
) -> Result<(), ProtocolError> {
    w.write_u32(ports.len() as u32)?;
    for port in ports {
        w.write_string(Some(&port.name))?;
        w.write_string(port.description.as_ref())?;
        w.write_u32(port.priority)?;
        if protocol_version >= 24 {
            w.write_u32(port.available as u32)?;
        }
        if protocol_version >= 34 {
            w.write_string(port.availability_group.as_ref())?;
            w.write_u32(port.port_type as u32)?;
        }
    }

    w.write_string(ports.get(active_port).map(|p| &p.name))?;
    Ok(())
}

/// Everything the server reports about a sink.
#[derive(Default, Debug, Clone, PartialEq)]
pub struct SinkInfo {
    /// Server-wide sink index.
    pub index: u32,

    /// The name of the sink.
    pub name: CString,

    /// A description of the sink.
    pub description: Option<CString>,

    /// Sink properties (v13+).
    pub props: Props,

    /// The current state of the sink (v15+).
    pub state: DeviceState,

    /// The sample format the sink mixes in.
    pub sample_spec: SampleSpec,

    /// The channel map of the sink.
    pub channel_map: ChannelMap,

    /// The module that owns this sink.
    pub owner_module_index: Option<u32>,

    /// The volume of the sink.
    pub volume: ChannelVolume,

    /// Whether the sink is muted.
    pub muted: bool,

    /// The index of the sink's monitor source.
    pub monitor_source_index: Option<u32>,

    /// The name of the sink's monitor source.
    pub monitor_source_name: Option<CString>,

    /// The length of queued audio, in microseconds.
    pub actual_latency: u64,

    /// The latency the sink has been configured to, in microseconds (v13+).
    pub configured_latency: u64,

    /// The name of the driver backing this sink.
    pub driver: Option<CString>,

    /// Capability flags.
    pub flags: SinkFlags,

    /// The base volume of the sink (v15+).
    pub base_volume: Volume,

    /// The number of discrete volume steps, for sinks that have them (v15+).
    pub volume_steps: Option<u32>,

    /// The card this sink belongs to (v15+).
    pub card_index: Option<u32>,

    /// The ports of the sink (v16+).
    pub ports: Vec<PortInfo>,

    /// The index of the active port into `ports` (v16+).
    pub active_port: usize,

    /// The sample formats the sink supports (v21+).
    pub formats: Vec<FormatInfo>,
}

impl SinkInfo {
    /// A placeholder sink, reported when a server has no real devices.
    pub fn new_dummy(index: u32) -> Self {
        Self {
            index,
            name: CString::new("auto_null").unwrap(),
            description: Some(CString::new("Dummy Output").unwrap()),
            state: DeviceState::Idle,
            sample_spec: SampleSpec {
                format: SampleFormat::S16Le,
                channels: 2,
                rate: 44100,
            },
            channel_map: ChannelMap::stereo(),
            volume: ChannelVolume::norm(2),
            monitor_source_index: Some(index),
            monitor_source_name: Some(CString::new("auto_null.monitor").unwrap()),
            flags: SinkFlags::LATENCY | SinkFlags::DECIBEL_VOLUME,
            formats: vec![FormatInfo::new(FormatEncoding::Pcm)],
            ..Default::default()
        }
    }
}

impl CommandReply for SinkInfo {}

impl TagStructRead for SinkInfo {
    fn read(ts: &mut TagStructReader<'_>, protocol_version: u16) -> Result<Self, ProtocolError> {
        let mut sink = SinkInfo {
            index: ts
                .read_index()?
                .ok_or_else(|| ProtocolError::Invalid("invalid sink index".into()))?,
            name: ts.read_string_non_null()?,
            description: ts.read_string()?,
            sample_spec: ts.read()?,
            channel_map: ts.read()?,
            owner_module_index: ts.read_index()?,
            volume: ts.read()?,
            muted: ts.read_bool()?,
            monitor_source_index: ts.read_index()?,
            monitor_source_name: ts.read_string()?,
            actual_latency: ts.read_usec()?,
            driver: ts.read_string()?,
            flags: SinkFlags::from_bits_truncate(ts.read_u32()?),
            ..Default::default()
        };

        if protocol_version >= 13 {
            sink.props = ts.read()?;
            sink.configured_latency = ts.read_usec()?;
        }

        if protocol_version >= 15 {
            sink.base_volume = ts.read()?;
            sink.state = ts.read_enum()?;
            sink.volume_steps = match ts.read_u32()? {
                0 => None,
                n => Some(n),
            };
            sink.card_index = ts.read_index()?;
        }

        if protocol_version >= 16 {
            let (ports, active_port) = read_ports(ts, protocol_version, PortDirection::Output)?;
            sink.ports = ports;
            sink.active_port = active_port;
        }

        if protocol_version >= 21 {
            for _ in 0..ts.read_u8()? {
                sink.formats.push(ts.read()?);
            }
        }

        Ok(sink)
    }
}

impl TagStructWrite for SinkInfo {
    fn write(
        &self,
        w: &mut TagStructWriter<'_>,
        protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        w.write_u32(self.index)?;
        w.write_string(Some(&self.name))?;
        w.write_string(self.description.as_ref())?;
        w.write(self.sample_spec.protocol_downgrade(protocol_version))?;
        w.write(self.channel_map)?;
        w.write_index(self.owner_module_index)?;
        w.write(self.volume)?;
        w.write_bool(self.muted)?;
        w.write_index(self.monitor_source_index)?;
        w.write_string(self.monitor_source_name.as_ref())?;
        w.write_usec(self.actual_latency)?;
        w.write_string(self.driver.as_ref())?;
        w.write_u32(self.flags.bits())?;

        if protocol_version >= 13 {
            w.write(&self.props)?;
            w.write_usec(self.configured_latency)?;
        }

        if protocol_version >= 15 {
            w.write(self.base_volume)?;
            w.write_u32(self.state as u32)?;
            w.write_u32(self.volume_steps.unwrap_or_default())?;
            w.write_index(self.card_index)?;
        }

        if protocol_version >= 16 {
            write_ports(w, protocol_version, &self.ports, self.active_port)?;
        }

        if protocol_version >= 21 {
            w.write_u8(self.formats.len() as u8)?;
            for format in &self.formats {
                w.write(format)?;
            }
        }

        Ok(())
    }
}

/// The server reply to [`super::Command::GetSinkInfoList`].
pub type SinkInfoList = Vec<SinkInfo>;

impl CommandReply for SinkInfoList {}

impl TagStructRead for SinkInfoList {
    fn read(ts: &mut TagStructReader<'_>, _protocol_version: u16) -> Result<Self, ProtocolError> {
        let mut sinks = Vec::new();
        while ts.has_data_left()? {
            sinks.push(ts.read()?);
        }

        Ok(sinks)
    }
}

impl TagStructWrite for SinkInfoList {
    fn write(
        &self,
        w: &mut TagStructWriter<'_>,
        _protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        for sink in self {
            w.write(sink)?;
        }
        Ok(())
    }
}

/// Everything the server reports about a source.
#[derive(Default, Debug, Clone, PartialEq)]
pub struct SourceInfo {
    /// Server-wide source index.
    pub index: u32,

    /// The name of the source.
    pub name: CString,

    /// A description of the source.
    pub description: Option<CString>,

    /// Source properties (v13+).
    pub props: Props,

    /// The current state of the source (v15+).
    pub state: DeviceState,

    /// The sample format the source captures in.
    pub sample_spec: SampleSpec,

    /// The channel map of the source.
    pub channel_map: ChannelMap,

    /// The module that owns this source.
    pub owner_module_index: Option<u32>,

    /// The volume of the source.
    pub volume: ChannelVolume,

    /// Whether the source is muted.
    pub muted: bool,

    /// For monitor sources, the sink this source observes.
    pub monitor_of_sink_index: Option<u32>,

    /// For monitor sources, the name of the observed sink.
    pub monitor_of_sink_name: Option<CString>,

    /// The length of queued audio, in microseconds.
    pub actual_latency: u64,

    /// The latency the source has been configured to, in microseconds
    /// (v13+).
    pub configured_latency: u64,

    /// The name of the driver backing this source.
    pub driver: Option<CString>,

    /// Capability flags.
    pub flags: SourceFlags,

    /// The base volume of the source (v15+).
    pub base_volume: Volume,

    /// The number of discrete volume steps (v15+).
    pub volume_steps: Option<u32>,

    /// The card this source belongs to (v15+).
    pub card_index: Option<u32>,

    /// The ports of the source (v16+).
    pub ports: Vec<PortInfo>,

    /// The index of the active port into `ports` (v16+).
    pub active_port: usize,

    /// The sample formats the source supports (v21+).
    pub formats: Vec<FormatInfo>,
}

impl SourceInfo {
    /// A placeholder source, reported when a server has no real devices.
    pub fn new_dummy(index: u32) -> Self {
        Self {
            index,
            name: CString::new("auto_null.monitor").unwrap(),
            description: Some(CString::new("Monitor of Dummy Output").unwrap()),
            state: DeviceState::Idle,
            sample_spec: SampleSpec {
                format: SampleFormat::S16Le,
                channels: 2,
                rate: 44100,
            },
            channel_map: ChannelMap::stereo(),
            volume: ChannelVolume::norm(2),
            flags: SourceFlags::LATENCY | SourceFlags::DECIBEL_VOLUME,
            formats: vec![FormatInfo::new(FormatEncoding::Pcm)],
            ..Default::default()
        }
    }
}

impl CommandReply for SourceInfo {}

impl TagStructRead for SourceInfo {
    fn read(ts: &mut TagStructReader<'_>, protocol_version: u16) -> Result<Self, ProtocolError> {
        let mut source = SourceInfo {
            index: ts
                .read_index()?
                .ok_or_else(|| ProtocolError::Invalid("invalid source index".into()))?,
            name: ts.read_string_non_null()?,
            description: ts.read_string()?,
            sample_spec: ts.read()?,
            channel_map: ts.read()?,
            owner_module_index: ts.read_index()?,
            volume: ts.read()?,
            muted: ts.read_bool()?,
            monitor_of_sink_index: ts.read_index()?,
            monitor_of_sink_name: ts.read_string()?,
            actual_latency: ts.read_usec()?,
            driver: ts.read_string()?,
            flags: SourceFlags::from_bits_truncate(ts.read_u32()?),
            ..Default::default()
        };

        if protocol_version >= 13 {
            source.props = ts.read()?;
            source.configured_latency = ts.read_usec()?;
        }

        if protocol_version >= 15 {
            source.base_volume = ts.read()?;
            source.state = ts.read_enum()?;
            source.volume_steps = match ts.read_u32()? {
                0 => None,
                n => Some(n),
            };
            source.card_index = ts.read_index()?;
        }

        if protocol_version >= 16 {
            let (ports, active_port) = read_ports(ts, protocol_version, PortDirection::Input)?;
            source.ports = ports;
            source.active_port = active_port;
        }

        if protocol_version >= 21 {
            for _ in 0..ts.read_u8()? {
                source.formats.push(ts.read()?);
            }
        }

        Ok(source)
    }
}

impl TagStructWrite for SourceInfo {
    fn write(
        &self,
        w: &mut TagStructWriter<'_>,
        protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        w.write_u32(self.index)?;
        w.write_string(Some(&self.name))?;
        w.write_string(self.description.as_ref())?;
        w.write(self.sample_spec.protocol_downgrade(protocol_version))?;
        w.write(self.channel_map)?;
        w.write_index(self.owner_module_index)?;
        w.write(self.volume)?;
        w.write_bool(self.muted)?;
        w.write_index(self.monitor_of_sink_index)?;
        w.write_string(self.monitor_of_sink_name.as_ref())?;
        w.write_usec(self.actual_latency)?;
        w.write_string(self.driver.as_ref())?;
        w.write_u32(self.flags.bits())?;

        if protocol_version >= 13 {
            w.write(&self.props)?;
            w.write_usec(self.configured_latency)?;
        }

        if protocol_version >= 15 {
            w.write(self.base_volume)?;
            w.write_u32(self.state as u32)?;
            w.write_u32(self.volume_steps.unwrap_or_default())?;
            w.write_index(self.card_index)?;
        }

        if protocol_version >= 16 {
            write_ports(w, protocol_version, &self.ports, self.active_port)?;
        }

        if protocol_version >= 21 {
            w.write_u8(self.formats.len() as u8)?;
            for format in &self.formats {
                w.write(format)?;
            }
        }

        Ok(())
    }
}

/// The server reply to [`super::Command::GetSourceInfoList`].
pub type SourceInfoList = Vec<SourceInfo>;

impl CommandReply for SourceInfoList {}

impl TagStructRead for SourceInfoList {
    fn read(ts: &mut TagStructReader<'_>, _protocol_version: u16) -> Result<Self, ProtocolError> {
        let mut sources = Vec::new();
        while ts.has_data_left()? {
            sources.push(ts.read()?);
        }

        Ok(sources)
    }
}

impl TagStructWrite for SourceInfoList {
    fn write(
        &self,
        w: &mut TagStructWriter<'_>,
        _protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        for source in self {
            w.write(source)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::protocol::tagstruct::test_util::{test_serde, test_serde_version};
    use crate::protocol::MAX_VERSION;

    use super::*;

    #[test]
    fn sink_info_serde_all_versions() -> anyhow::Result<()> {
        // Keep version-gated fields at their defaults so the sweep over
        // old versions stays lossless.
        let sink = SinkInfo {
            index: 3,
            name: CString::new("alsa_output.analog-stereo")?,
            description: Some(CString::new("Built-in Audio")?),
            volume: ChannelVolume::norm(2),
            muted: false,
            actual_latency: 20_000,
            flags: SinkFlags::LATENCY,
            ..Default::default()
        };

        test_serde(&sink)
    }

    // The dummies carry ports and format lists, which only exist on the
    // current protocol.
    #[test]
    fn sink_info_list_serde() -> anyhow::Result<()> {
        test_serde_version(
            &vec![SinkInfo::new_dummy(0), SinkInfo::new_dummy(1)],
            MAX_VERSION,
        )
    }

    #[test]
    fn source_info_serde() -> anyhow::Result<()> {
        test_serde_version(&SourceInfo::new_dummy(0), MAX_VERSION)
    }

    #[test]
    fn sink_info_with_ports_serde() -> anyhow::Result<()> {
        let mut sink = SinkInfo::new_dummy(0);
        sink.ports = vec![PortInfo {
            name: CString::new("analog-output")?,
            description: Some(CString::new("Analog Output")?),
            dir: PortDirection::Output,
            priority: 9900,
            available: PortAvailable::Yes,
            port_type: PortType::Speaker,
            availability_group: None,
        }];
        sink.active_port = 0;

        test_serde_version(&sink, MAX_VERSION)
    }
}
