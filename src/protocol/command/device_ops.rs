//! Device and stream mutations: volume, mute, suspend, defaults, modules.

use std::ffi::CString;
use std::io::Write as _;

use crate::protocol::{tagstruct::*, ChannelVolume, ProtocolError};

use super::CommandReply;

/// Parameters for the sink/source volume commands. The device is addressed
/// by index or name, never both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetDeviceVolumeParams {
    pub device_index: Option<u32>,
    pub device_name: Option<CString>,
    pub volume: ChannelVolume,
}

impl TagStructRead for SetDeviceVolumeParams {
    fn read(ts: &mut TagStructReader<'_>, _protocol_version: u16) -> Result<Self, ProtocolError> {
        Ok(Self {
            device_index: ts.read_index()?,
            device_name: ts.read_string()?,
            volume: ts.read()?,
        })
    }
}

impl TagStructWrite for SetDeviceVolumeParams {
    fn write(
        &self,
        ts: &mut TagStructWriter<'_>,
        _protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        ts.write_index(self.device_index)?;
        ts.write_string(self.device_name.as_ref())?;
        ts.write(self.volume)?;
        Ok(())
    }
}

/// Parameters for the sink-input/source-output volume commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetStreamVolumeParams {
    /// The server-wide index of the stream.
    pub index: u32,
    pub volume: ChannelVolume,
}

impl TagStructRead for SetStreamVolumeParams {
    fn read(ts: &mut TagStructReader<'_>, _protocol_version: u16) -> Result<Self, ProtocolError> {
        Ok(Self {
            index: ts
                .read_index()?
                .ok_or_else(|| ProtocolError::Invalid("invalid index".into()))?,
            volume: ts.read()?,
        })
    }
}

impl TagStructWrite for SetStreamVolumeParams {
    fn write(
        &self,
        ts: &mut TagStructWriter<'_>,
        _protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        ts.write_index(Some(self.index))?;
        ts.write(self.volume)?;
        Ok(())
    }
}

/// Parameters for the sink/source mute commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetDeviceMuteParams {
    pub device_index: Option<u32>,
    pub device_name: Option<CString>,
    pub mute: bool,
}

impl TagStructRead for SetDeviceMuteParams {
    fn read(ts: &mut TagStructReader<'_>, _protocol_version: u16) -> Result<Self, ProtocolError> {
        Ok(Self {
            device_index: ts.read_index()?,
            device_name: ts.read_string()?,
            mute: ts.read_bool()?,
        })
    }
}

impl TagStructWrite for SetDeviceMuteParams {
    fn write(
        &self,
        ts: &mut TagStructWriter<'_>,
        _protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        ts.write_index(self.device_index)?;
        ts.write_string(self.device_name.as_ref())?;
        ts.write_bool(self.mute)?;
        Ok(())
    }
}

/// Parameters for the sink-input/source-output mute commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetStreamMuteParams {
    /// The server-wide index of the stream.
    pub index: u32,
    pub mute: bool,
}

impl TagStructRead for SetStreamMuteParams {
    fn read(ts: &mut TagStructReader<'_>, _protocol_version: u16) -> Result<Self, ProtocolError> {
        Ok(Self {
            index: ts
                .read_index()?
                .ok_or_else(|| ProtocolError::Invalid("invalid index".into()))?,
            mute: ts.read_bool()?,
        })
    }
}

impl TagStructWrite for SetStreamMuteParams {
    fn write(
        &self,
        ts: &mut TagStructWriter<'_>,
        _protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        ts.write_index(Some(self.index))?;
        ts.write_bool(self.mute)?;
        Ok(())
    }
}

/// Parameters for the suspend commands. The invalid index (or a null name)
/// suspends every device at once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuspendDeviceParams {
    pub device_index: Option<u32>,
    pub device_name: Option<CString>,
    pub suspend: bool,
}

impl TagStructRead for SuspendDeviceParams {
    fn read(ts: &mut TagStructReader<'_>, _protocol_version: u16) -> Result<Self, ProtocolError> {
        Ok(Self {
            device_index: ts.read_index()?,
            device_name: ts.read_string()?,
            suspend: ts.read_bool()?,
        })
    }
}

impl TagStructWrite for SuspendDeviceParams {
    fn write(
        &self,
        ts: &mut TagStructWriter<'_>,
        _protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        ts.write_index(self.device_index)?;
        ts.write_string(self.device_name.as_ref())?;
        ts.write_bool(self.suspend)?;
        Ok(())
    }
}

/// Parameters for [`super::Command::LoadModule`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadModuleParams {
    pub name: CString,
    pub argument: Option<CString>,
}

impl TagStructRead for LoadModuleParams {
    fn read(ts: &mut TagStructReader<'_>, _protocol_version: u16) -> Result<Self, ProtocolError> {
        Ok(Self {
            name: ts.read_string_non_null()?,
            argument: ts.read_string()?,
        })
    }
}

impl TagStructWrite for LoadModuleParams {
    fn write(
        &self,
        ts: &mut TagStructWriter<'_>,
        _protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        ts.write_string(Some(&self.name))?;
        ts.write_string(self.argument.as_ref())?;
        Ok(())
    }
}

/// The server reply to [`super::Command::LoadModule`].
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadModuleReply {
    pub index: u32,
}

impl CommandReply for LoadModuleReply {}

impl TagStructRead for LoadModuleReply {
    fn read(ts: &mut TagStructReader<'_>, _protocol_version: u16) -> Result<Self, ProtocolError> {
        Ok(Self {
            index: ts.read_u32()?,
        })
    }
}

impl TagStructWrite for LoadModuleReply {
    fn write(
        &self,
        w: &mut TagStructWriter<'_>,
        _protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        w.write_u32(self.index)?;
        Ok(())
    }
}

/// Parameters for [`super::Command::Extension`]: the module the message is
/// addressed to, plus an opaque payload only that module understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionParams {
    pub module_index: Option<u32>,
    pub module_name: Option<CString>,
    pub payload: Vec<u8>,
}

impl TagStructRead for ExtensionParams {
    fn read(ts: &mut TagStructReader<'_>, _protocol_version: u16) -> Result<Self, ProtocolError> {
        Ok(Self {
            module_index: ts.read_index()?,
            module_name: ts.read_string()?,
            payload: ts.read_rest()?,
        })
    }
}

impl TagStructWrite for ExtensionParams {
    fn write(
        &self,
        ts: &mut TagStructWriter<'_>,
        _protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        ts.write_index(self.module_index)?;
        ts.write_string(self.module_name.as_ref())?;
        ts.inner.write_all(&self.payload)?;
        Ok(())
    }
}

/// Parameters for [`super::Command::SetCardProfile`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetCardProfileParams {
    pub card_index: Option<u32>,
    pub card_name: Option<CString>,
    pub profile_name: CString,
}

impl TagStructRead for SetCardProfileParams {
    fn read(ts: &mut TagStructReader<'_>, _protocol_version: u16) -> Result<Self, ProtocolError> {
        Ok(Self {
            card_index: ts.read_index()?,
            card_name: ts.read_string()?,
            profile_name: ts.read_string_non_null()?,
        })
    }
}

impl TagStructWrite for SetCardProfileParams {
    fn write(
        &self,
        ts: &mut TagStructWriter<'_>,
        _protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        ts.write_index(self.card_index)?;
        ts.write_string(self.card_name.as_ref())?;
        ts.write_string(Some(&self.profile_name))?;
        Ok(())
    }
}

/// Parameters for the sink/source port selection commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetPortParams {
    pub device_index: Option<u32>,
    pub device_name: Option<CString>,
    pub port_name: CString,
}

impl TagStructRead for SetPortParams {
    fn read(ts: &mut TagStructReader<'_>, _protocol_version: u16) -> Result<Self, ProtocolError> {
        Ok(Self {
            device_index: ts.read_index()?,
            device_name: ts.read_string()?,
            port_name: ts.read_string_non_null()?,
        })
    }
}

impl TagStructWrite for SetPortParams {
    fn write(
        &self,
        ts: &mut TagStructWriter<'_>,
        _protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        ts.write_index(self.device_index)?;
        ts.write_string(self.device_name.as_ref())?;
        ts.write_string(Some(&self.port_name))?;
        Ok(())
    }
}

/// Parameters for [`super::Command::SetPortLatencyOffset`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetPortLatencyOffsetParams {
    pub card_index: Option<u32>,
    pub card_name: Option<CString>,
    pub port_name: CString,
    pub offset: i64,
}

impl TagStructRead for SetPortLatencyOffsetParams {
    fn read(ts: &mut TagStructReader<'_>, _protocol_version: u16) -> Result<Self, ProtocolError> {
        Ok(Self {
            card_index: ts.read_index()?,
            card_name: ts.read_string()?,
            port_name: ts.read_string_non_null()?,
            offset: ts.read_i64()?,
        })
    }
}

impl TagStructWrite for SetPortLatencyOffsetParams {
    fn write(
        &self,
        ts: &mut TagStructWriter<'_>,
        _protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        ts.write_index(self.card_index)?;
        ts.write_string(self.card_name.as_ref())?;
        ts.write_string(Some(&self.port_name))?;
        ts.write_i64(self.offset)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::protocol::tagstruct::test_util::test_serde;
    use crate::protocol::Volume;

    use super::*;

    #[test]
    fn volume_params_serde() -> anyhow::Result<()> {
        test_serde(&SetDeviceVolumeParams {
            device_index: None,
            device_name: Some(CString::new("auto_null")?),
            volume: ChannelVolume::norm(2),
        })?;

        let mut volume = ChannelVolume::empty();
        volume.push(Volume::from_linear(0.5));

        test_serde(&SetStreamVolumeParams { index: 1, volume })
    }

    #[test]
    fn mute_params_serde() -> anyhow::Result<()> {
        test_serde(&SetDeviceMuteParams {
            device_index: Some(0),
            device_name: None,
            mute: true,
        })?;

        test_serde(&SetStreamMuteParams {
            index: 2,
            mute: false,
        })
    }

    #[test]
    fn suspend_params_serde() -> anyhow::Result<()> {
        test_serde(&SuspendDeviceParams {
            device_index: None,
            device_name: None,
            suspend: true,
        })
    }

    #[test]
    fn extension_params_serde() -> anyhow::Result<()> {
        test_serde(&ExtensionParams {
            module_index: None,
            module_name: Some(CString::new("module-stream-restore")?),
            payload: vec![],
        })
    }
}
