//! Server, client, module, sample, and card introspection replies.

use std::ffi::CString;

use crate::protocol::{tagstruct::*, ProtocolError};
use crate::protocol::{
    CardPortInfo, ChannelMap, ChannelVolume, PortDirection, PortType, Props, SampleSpec,
};

use super::CommandReply;

/// The server reply to [`super::Command::GetServerInfo`].
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    /// The server package name.
    pub server_name: Option<CString>,

    /// The server version string.
    pub server_version: Option<CString>,

    /// User name the daemon runs as.
    pub user_name: Option<CString>,

    /// Host name the daemon runs on.
    pub host_name: Option<CString>,

    /// Default sample specification.
    pub sample_spec: SampleSpec,

    /// A random id identifying this server instance.
    pub cookie: u32,

    /// Name of the current default sink.
    pub default_sink_name: Option<CString>,

    /// Name of the current default source.
    pub default_source_name: Option<CString>,

    /// Default channel map (v15+).
    pub channel_map: ChannelMap,
}

impl CommandReply for ServerInfo {}

impl TagStructRead for ServerInfo {
    fn read(ts: &mut TagStructReader<'_>, protocol_version: u16) -> Result<Self, ProtocolError> {
        let mut info = Self {
            server_name: ts.read_string()?,
            server_version: ts.read_string()?,
            user_name: ts.read_string()?,
            host_name: ts.read_string()?,
            sample_spec: ts.read()?,
            default_sink_name: ts.read_string()?,
            default_source_name: ts.read_string()?,
            cookie: ts.read_u32()?,
            ..Default::default()
        };

        if protocol_version >= 15 {
            info.channel_map = ts.read()?;
        }

        Ok(info)
    }
}

impl TagStructWrite for ServerInfo {
    fn write(
        &self,
        w: &mut TagStructWriter<'_>,
        protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        w.write_string(self.server_name.as_ref())?;
        w.write_string(self.server_version.as_ref())?;
        w.write_string(self.user_name.as_ref())?;
        w.write_string(self.host_name.as_ref())?;
        w.write(self.sample_spec.protocol_downgrade(protocol_version))?;
        w.write_string(self.default_sink_name.as_ref())?;
        w.write_string(self.default_source_name.as_ref())?;
        w.write_u32(self.cookie)?;

        if protocol_version >= 15 {
            w.write(self.channel_map)?;
        }

        Ok(())
    }
}

/// The server reply to [`super::Command::Stat`].
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatInfo {
    /// Currently allocated memory blocks.
    pub memblock_total: u32,
    /// Current total size of allocated memory blocks.
    pub memblock_total_size: u32,
    /// Memory blocks allocated over the lifetime of the daemon.
    pub memblock_allocated: u32,
    /// Total size of memory blocks allocated over the lifetime of the
    /// daemon.
    pub memblock_allocated_size: u32,
    /// Total size of the sample cache.
    pub sample_cache_size: u32,
}

impl CommandReply for StatInfo {}

impl TagStructRead for StatInfo {
    fn read(ts: &mut TagStructReader<'_>, _protocol_version: u16) -> Result<Self, ProtocolError> {
        Ok(Self {
            memblock_total: ts.read_u32()?,
            memblock_total_size: ts.read_u32()?,
            memblock_allocated: ts.read_u32()?,
            memblock_allocated_size: ts.read_u32()?,
            sample_cache_size: ts.read_u32()?,
        })
    }
}

impl TagStructWrite for StatInfo {
    fn write(
        &self,
        w: &mut TagStructWriter<'_>,
        _protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        w.write_u32(self.memblock_total)?;
        w.write_u32(self.memblock_total_size)?;
        w.write_u32(self.memblock_allocated)?;
        w.write_u32(self.memblock_allocated_size)?;
        w.write_u32(self.sample_cache_size)?;
        Ok(())
    }
}

/// The server reply to [`super::Command::LookupSink`] and
/// [`super::Command::LookupSource`]: the index the name resolved to.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct LookupReply(pub u32);

impl CommandReply for LookupReply {}

impl TagStructRead for LookupReply {
    fn read(ts: &mut TagStructReader<'_>, _protocol_version: u16) -> Result<Self, ProtocolError> {
        Ok(Self(ts.read_u32()?))
    }
}

impl TagStructWrite for LookupReply {
    fn write(
        &self,
        w: &mut TagStructWriter<'_>,
        _protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        w.write_u32(self.0)?;
        Ok(())
    }
}

/// Everything the server reports about a client.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClientInfo {
    /// Server-wide index of the client.
    pub index: u32,

    /// The name of the client.
    pub name: CString,

    /// The module that created this client, if any.
    pub owner_module_index: Option<u32>,

    /// The driver name.
    pub driver: Option<CString>,

    /// Client properties (v13+).
    pub props: Props,
}

impl CommandReply for ClientInfo {}

impl TagStructRead for ClientInfo {
    fn read(ts: &mut TagStructReader<'_>, protocol_version: u16) -> Result<Self, ProtocolError> {
        Ok(Self {
            index: ts.read_u32()?,
            name: ts.read_string_non_null()?,
            owner_module_index: ts.read_index()?,
            driver: ts.read_string()?,
            props: if protocol_version >= 13 {
                ts.read()?
            } else {
                Default::default()
            },
        })
    }
}

impl TagStructWrite for ClientInfo {
    fn write(
        &self,
        w: &mut TagStructWriter<'_>,
        protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        w.write_u32(self.index)?;
        w.write_string(Some(&self.name))?;
        w.write_index(self.owner_module_index)?;
        w.write_string(self.driver.as_ref())?;

        if protocol_version >= 13 {
            w.write(&self.props)?;
        }

        Ok(())
    }
}

/// The server reply to [`super::Command::GetClientInfoList`].
pub type ClientInfoList = Vec<ClientInfo>;

impl CommandReply for ClientInfoList {}

impl TagStructRead for ClientInfoList {
    fn read(ts: &mut TagStructReader<'_>, _protocol_version: u16) -> Result<Self, ProtocolError> {
        let mut clients = Vec::new();
        while ts.has_data_left()? {
            clients.push(ts.read()?);
        }

        Ok(clients)
    }
}

impl TagStructWrite for ClientInfoList {
    fn write(
        &self,
        w: &mut TagStructWriter<'_>,
        _protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        for client in self {
            w.write(client)?;
        }
        Ok(())
    }
}

/// Everything the server reports about a loaded module.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct ModuleInfo {
    /// Server-wide index of the module.
    pub index: u32,

    /// The name of the module.
    pub name: CString,

    /// The argument string the module was loaded with.
    pub argument: Option<CString>,

    /// Usage counter, if the module exposes one.
    pub n_used: Option<u32>,

    /// Module properties (v15+).
    pub props: Props,
}

impl CommandReply for ModuleInfo {}

impl TagStructRead for ModuleInfo {
    fn read(ts: &mut TagStructReader<'_>, protocol_version: u16) -> Result<Self, ProtocolError> {
        let index = ts.read_u32()?;
        let name = ts.read_string_non_null()?;
        let argument = ts.read_string()?;
        let n_used = ts.read_index()?;

        // Below v15 there is an auto-unload flag here instead of properties;
        // it is obsolete and dropped on read.
        let props = if protocol_version < 15 {
            let _auto_unload = ts.read_bool()?;
            Default::default()
        } else {
            ts.read()?
        };

        Ok(Self {
            index,
            name,
            argument,
            n_used,
            props,
        })
    }
}

impl TagStructWrite for ModuleInfo {
    fn write(
        &self,
        w: &mut TagStructWriter<'_>,
        protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        w.write_u32(self.index)?;
        w.write_string(Some(&self.name))?;
        w.write_string(self.argument.as_ref())?;
        w.write_index(self.n_used)?;

        if protocol_version < 15 {
            w.write_bool(false)?;
        } else {
            w.write(&self.props)?;
        }

        Ok(())
    }
}

/// The server reply to [`super::Command::GetModuleInfoList`].
pub type ModuleInfoList = Vec<ModuleInfo>;

impl CommandReply for ModuleInfoList {}

impl TagStructRead for ModuleInfoList {
    fn read(ts: &mut TagStructReader<'_>, _protocol_version: u16) -> Result<Self, ProtocolError> {
        let mut modules = Vec::new();
        while ts.has_data_left()? {
            modules.push(ts.read()?);
        }
        Ok(modules)
    }
}

impl TagStructWrite for ModuleInfoList {
    fn write(
        &self,
        w: &mut TagStructWriter<'_>,
        _protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        for module in self {
            w.write(module)?;
        }
        Ok(())
    }
}

/// Everything the server reports about a sample cache entry.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct SampleInfo {
    /// Server-wide index of the entry.
    pub index: u32,

    /// The name of the entry.
    pub name: CString,

    /// The default volume of the entry.
    pub volume: ChannelVolume,

    /// The sample format of the entry.
    pub sample_spec: SampleSpec,

    /// The channel map of the entry.
    pub channel_map: ChannelMap,

    /// Duration of the sample, in microseconds.
    pub duration: u64,

    /// Length of the sample, in bytes.
    pub length: u32,

    /// For lazy entries, the file the data is loaded from on demand.
    pub lazy_filename: Option<CString>,

    /// Entry properties (v13+).
    pub props: Props,
}

impl CommandReply for SampleInfo {}

impl TagStructRead for SampleInfo {
    fn read(ts: &mut TagStructReader<'_>, protocol_version: u16) -> Result<Self, ProtocolError> {
        let index = ts.read_u32()?;
        let name = ts.read_string_non_null()?;
        let volume = ts.read()?;
        let duration = ts.read_usec()?;
        let sample_spec = ts.read()?;
        let channel_map = ts.read()?;
        let length = ts.read_u32()?;
        let lazy = ts.read_bool()?;
        let lazy_filename = ts.read_string()?;
        let props = if protocol_version >= 13 {
            ts.read()?
        } else {
            Default::default()
        };

        Ok(Self {
            index,
            name,
            volume,
            sample_spec,
            channel_map,
            duration,
            length,
            lazy_filename: if lazy { lazy_filename } else { None },
            props,
        })
    }
}

impl TagStructWrite for SampleInfo {
    fn write(
        &self,
        w: &mut TagStructWriter<'_>,
        protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        w.write_u32(self.index)?;
        w.write_string(Some(&self.name))?;
        w.write(self.volume)?;
        w.write_usec(self.duration)?;
        w.write(self.sample_spec.protocol_downgrade(protocol_version))?;
        w.write(self.channel_map)?;
        w.write_u32(self.length)?;
        w.write_bool(self.lazy_filename.is_some())?;
        w.write_string(self.lazy_filename.as_ref())?;

        if protocol_version >= 13 {
            w.write(&self.props)?;
        }

        Ok(())
    }
}

/// The server reply to [`super::Command::GetSampleInfoList`].
pub type SampleInfoList = Vec<SampleInfo>;

impl CommandReply for SampleInfoList {}

impl TagStructRead for SampleInfoList {
    fn read(ts: &mut TagStructReader<'_>, _protocol_version: u16) -> Result<Self, ProtocolError> {
        let mut samples = Vec::new();
        while ts.has_data_left()? {
            samples.push(ts.read()?);
        }
        Ok(samples)
    }
}

impl TagStructWrite for SampleInfoList {
    fn write(
        &self,
        w: &mut TagStructWriter<'_>,
        _protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        for sample in self {
            w.write(sample)?;
        }
        Ok(())
    }
}

/// A profile a card can be switched to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardProfileInfo {
    /// The name of the profile.
    pub name: CString,

    /// A description of the profile.
    pub description: Option<CString>,

    /// The number of sinks this profile would create.
    pub n_sinks: u32,

    /// The number of sources this profile would create.
    pub n_sources: u32,

    /// The priority of the profile.
    pub priority: u32,

    /// Whether the profile is available (v29+).
    pub available: u32,
}

/// Everything the server reports about a card.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct CardInfo {
    /// Server-wide index of the card.
    pub index: u32,

    /// The name of the card.
    pub name: CString,

    /// The module that owns this card, if any.
    pub owner_module_index: Option<u32>,

    /// The name of the driver backing this card.
    pub driver: Option<CString>,

    /// The profiles the card offers.
    pub profiles: Vec<CardProfileInfo>,

    /// The name of the active profile.
    pub active_profile: Option<CString>,

    /// Card properties.
    pub props: Props,

    /// The ports of the card (v26+).
    pub ports: Vec<CardPortInfo>,
}

impl CommandReply for CardInfo {}

impl TagStructRead for CardInfo {
    fn read(ts: &mut TagStructReader<'_>, protocol_version: u16) -> Result<Self, ProtocolError> {
        let index = ts
            .read_index()?
            .ok_or_else(|| ProtocolError::Invalid("invalid card index".into()))?;
        let name = ts.read_string_non_null()?;
        let owner_module_index = ts.read_index()?;
        let driver = ts.read_string()?;

        let mut profiles = Vec::new();
        for _ in 0..ts.read_u32()? {
            profiles.push(CardProfileInfo {
                name: ts.read_string_non_null()?,
                description: ts.read_string()?,
                n_sinks: ts.read_u32()?,
                n_sources: ts.read_u32()?,
                priority: ts.read_u32()?,
                available: if protocol_version >= 29 {
                    ts.read_u32()?
                } else {
                    1
                },
            });
        }

        let active_profile = ts.read_string()?;
        let props = ts.read()?;

        let mut ports = Vec::new();
        if protocol_version >= 26 {
            for _ in 0..ts.read_u32()? {
                let name = ts.read_string_non_null()?;
                let description = ts.read_string()?;
                let priority = ts.read_u32()?;
                let available = ts.read_enum()?;
                let dir = match ts.read_u8()? {
                    1 => PortDirection::Output,
                    2 => PortDirection::Input,
                    n => {
                        return Err(ProtocolError::Invalid(format!(
                            "invalid port direction {}",
                            n
                        )))
                    }
                };
                let props = ts.read()?;

                let mut port_profiles = Vec::new();
                for _ in 0..ts.read_u32()? {
                    port_profiles.push(ts.read_string_non_null()?);
                }

                let latency_offset = if protocol_version >= 27 {
                    ts.read_i64()?
                } else {
                    0
                };

                let (availability_group, port_type) = if protocol_version >= 34 {
                    (ts.read_string()?, ts.read_enum()?)
                } else {
                    (None, PortType::Unknown)
                };

                ports.push(CardPortInfo {
                    name,
                    description,
                    props,
                    dir,
                    priority,
                    available,
                    port_type,
                    availability_group,
                    profiles: port_profiles,
                    latency_offset,
                });
            }
        }

        Ok(Self {
            index,
            name,
            owner_module_index,
            driver,
            profiles,
            active_profile,
            props,
            ports,
        })
    }
}

impl TagStructWrite for CardInfo {
    fn write(
        &self,
        w: &mut TagStructWriter<'_>,
        protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        w.write_index(Some(self.index))?;
        w.write_string(Some(&self.name))?;
        w.write_index(self.owner_module_index)?;
        w.write_string(self.driver.as_ref())?;

        w.write_u32(self.profiles.len() as u32)?;
        for profile in &self.profiles {
            w.write_string(Some(&profile.name))?;
            w.write_string(profile.description.as_ref())?;
            w.write_u32(profile.n_sinks)?;
            w.write_u32(profile.n_sources)?;
            w.write_u32(profile.priority)?;
            if protocol_version >= 29 {
                w.write_u32(profile.available)?;
            }
        }

        w.write_string(self.active_profile.as_ref())?;
        w.write(&self.props)?;

        if protocol_version >= 26 {
            w.write_u32(self.ports.len() as u32)?;
            for port in &self.ports {
                w.write_string(Some(&port.name))?;
                w.write_string(port.description.as_ref())?;
                w.write_u32(port.priority)?;
                w.write_u32(port.available as u32)?;
                w.write_u8(match port.dir {
                    PortDirection::Output => 1,
                    PortDirection::Input => 2,
                })?;
                w.write(&port.props)?;
                w.write_u32(port.profiles.len() as u32)?;
                for profile in &port.profiles {
                    w.write_string(Some(profile))?;
                }
                if protocol_version >= 27 {
                    w.write_i64(port.latency_offset)?;
                }
                if protocol_version >= 34 {
                    w.write_string(port.availability_group.as_ref())?;
                    w.write_u32(port.port_type as u32)?;
                }
            }
        }

        Ok(())
    }
}

/// The server reply to [`super::Command::GetCardInfoList`].
pub type CardInfoList = Vec<CardInfo>;

impl CommandReply for CardInfoList {}

impl TagStructRead for CardInfoList {
    fn read(ts: &mut TagStructReader<'_>, _protocol_version: u16) -> Result<Self, ProtocolError> {
        let mut cards = Vec::new();
        while ts.has_data_left()? {
            cards.push(ts.read()?);
        }
        Ok(cards)
    }
}

impl TagStructWrite for CardInfoList {
    fn write(
        &self,
        w: &mut TagStructWriter<'_>,
        _protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        for card in self {
            w.write(card)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::protocol::tagstruct::test_util::{test_serde, test_serde_version};
    use crate::protocol::{PortAvailable, Prop};

    use super::*;

    #[test]
    fn server_info_serde() -> anyhow::Result<()> {
        test_serde(&ServerInfo {
            server_name: Some(CString::new("pavane")?),
            server_version: Some(CString::new("0.1.0")?),
            user_name: Some(CString::new("nobody")?),
            host_name: Some(CString::new("localhost")?),
            sample_spec: SampleSpec::default(),
            cookie: 0xdeadbeef,
            default_sink_name: Some(CString::new("auto_null")?),
            default_source_name: Some(CString::new("auto_null.monitor")?),
            channel_map: ChannelMap::default(),
        })
    }

    #[test]
    fn stat_serde() -> anyhow::Result<()> {
        test_serde(&StatInfo {
            memblock_total: 1,
            memblock_total_size: 2,
            memblock_allocated: 3,
            memblock_allocated_size: 4,
            sample_cache_size: 5,
        })
    }

    #[test]
    fn client_info_serde() -> anyhow::Result<()> {
        let mut props = Props::new();
        props.set(Prop::ApplicationName, CString::new("pactl")?);

        test_serde(&ClientInfo {
            index: 0,
            name: CString::new("pactl")?,
            props,
            ..Default::default()
        })
    }

    #[test]
    fn module_info_list_serde() -> anyhow::Result<()> {
        test_serde(&vec![
            ModuleInfo {
                index: 0,
                name: CString::new("module-native-protocol-unix")?,
                ..Default::default()
            },
            ModuleInfo {
                index: 1,
                name: CString::new("module-null-sink")?,
                argument: Some(CString::new("sink_name=auto_null")?),
                ..Default::default()
            },
        ])
    }

    #[test]
    fn sample_info_serde() -> anyhow::Result<()> {
        test_serde(&SampleInfo {
            index: 0,
            name: CString::new("bell")?,
            length: 9600,
            duration: 50_000,
            ..Default::default()
        })
    }

    #[test]
    fn card_info_serde() -> anyhow::Result<()> {
        // Card ports only exist on newer protocols.
        test_serde_version(&card_with_ports()?, crate::protocol::MAX_VERSION)
    }

    #[test]
    fn card_info_serde_all_versions() -> anyhow::Result<()> {
        let mut card = card_with_ports()?;
        card.ports.clear();

        test_serde(&card)
    }

    fn card_with_ports() -> anyhow::Result<CardInfo> {
        Ok(CardInfo {
            index: 0,
            name: CString::new("alsa_card.pci-0000_00_1f.3")?,
            profiles: vec![CardProfileInfo {
                name: CString::new("output:analog-stereo")?,
                description: Some(CString::new("Analog Stereo Output")?),
                n_sinks: 1,
                n_sources: 0,
                priority: 6500,
                available: 1,
            }],
            active_profile: Some(CString::new("output:analog-stereo")?),
            ports: vec![CardPortInfo {
                name: CString::new("analog-output")?,
                description: None,
                props: Props::new(),
                dir: PortDirection::Output,
                priority: 100,
                available: PortAvailable::Unknown,
                port_type: PortType::Speaker,
                availability_group: None,
                profiles: vec![CString::new("output:analog-stereo")?],
                latency_offset: 0,
            }],
            ..Default::default()
        })
    }
}
