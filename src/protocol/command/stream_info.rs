//! Sink-input and source-output introspection replies.

use std::ffi::CString;

use crate::protocol::{tagstruct::*, ProtocolError};
use crate::protocol::{ChannelMap, ChannelVolume, FormatInfo, Props, SampleSpec};

use super::CommandReply;

/// Everything the server reports about a sink input.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct SinkInputInfo {
    /// Server-wide index of the sink input.
    pub index: u32,

    /// The name of the sink input.
    pub name: CString,

    /// The module that owns this stream, if any.
    pub owner_module_index: Option<u32>,

    /// The client that owns this stream, if any.
    pub client_index: Option<u32>,

    /// The sink the stream plays into.
    pub sink_index: u32,

    /// The sample format of the stream.
    pub sample_spec: SampleSpec,

    /// The channel map of the stream.
    pub channel_map: ChannelMap,

    /// The volume of the stream.
    pub volume: ChannelVolume,

    /// Latency due to buffering, in microseconds.
    pub buffer_latency: u64,

    /// Latency of the device, in microseconds.
    pub sink_latency: u64,

    /// The resampling method in use, if any.
    pub resample_method: Option<CString>,

    /// The name of the driver backing the stream.
    pub driver: Option<CString>,

    /// Whether the stream is muted (v11+).
    pub muted: bool,

    /// Stream properties (v13+).
    pub props: Props,

    /// Whether the stream is corked (v19+).
    pub corked: bool,

    /// Whether the volume field is meaningful (v20+).
    pub has_volume: bool,

    /// Whether the client may change the volume (v20+).
    pub volume_writable: bool,

    /// The negotiated stream format (v21+).
    pub format: FormatInfo,
}

impl CommandReply for SinkInputInfo {}

impl TagStructRead for SinkInputInfo {
    fn read(ts: &mut TagStructReader<'_>, protocol_version: u16) -> Result<Self, ProtocolError> {
        let mut info = Self {
            index: ts.read_u32()?,
            name: ts.read_string_non_null()?,
            owner_module_index: ts.read_index()?,
            client_index: ts.read_index()?,
            sink_index: ts.read_u32()?,
            sample_spec: ts.read()?,
            channel_map: ts.read()?,
            volume: ts.read()?,
            buffer_latency: ts.read_usec()?,
            sink_latency: ts.read_usec()?,
            resample_method: ts.read_string()?,
            driver: ts.read_string()?,
            ..Default::default()
        };

        if protocol_version >= 11 {
            info.muted = ts.read_bool()?;
        }

        if protocol_version >= 13 {
            info.props = ts.read()?;
        }

        if protocol_version >= 19 {
            info.corked = ts.read_bool()?;
        }

        if protocol_version >= 20 {
            info.has_volume = ts.read_bool()?;
            info.volume_writable = ts.read_bool()?;
        }

        if protocol_version >= 21 {
            info.format = ts.read()?;
        }

        Ok(info)
    }
}

impl TagStructWrite for SinkInputInfo {
    fn write(
        &self,
        w: &mut TagStructWriter<'_>,
        protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        w.write_u32(self.index)?;
        w.write_string(Some(&self.name))?;
        w.write_index(self.owner_module_index)?;
        w.write_index(self.client_index)?;
        w.write_u32(self.sink_index)?;
        w.write(self.sample_spec.protocol_downgrade(protocol_version))?;
        w.write(self.channel_map)?;
        w.write(self.volume)?;
        w.write_usec(self.buffer_latency)?;
        w.write_usec(self.sink_latency)?;
        w.write_string(self.resample_method.as_ref())?;
        w.write_string(self.driver.as_ref())?;

        if protocol_version >= 11 {
            w.write_bool(self.muted)?;
        }

        if protocol_version >= 13 {
            w.write(&self.props)?;
        }

        if protocol_version >= 19 {
            w.write_bool(self.corked)?;
        }

        if protocol_version >= 20 {
            w.write_bool(self.has_volume)?;
            w.write_bool(self.volume_writable)?;
        }

        if protocol_version >= 21 {
            w.write(&self.format)?;
        }

        Ok(())
    }
}

/// The server reply to [`super::Command::GetSinkInputInfoList`].
pub type SinkInputInfoList = Vec<SinkInputInfo>;

impl CommandReply for SinkInputInfoList {}

impl TagStructRead for SinkInputInfoList {
    fn read(ts: &mut TagStructReader<'_>, _protocol_version: u16) -> Result<Self, ProtocolError> {
        let mut inputs = Vec::new();
        while ts.has_data_left()? {
            inputs.push(ts.read()?);
        }

        Ok(inputs)
    }
}

impl TagStructWrite for SinkInputInfoList {
    fn write(
        &self,
        w: &mut TagStructWriter<'_>,
        _protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        for input in self {
            w.write(input)?;
        }
        Ok(())
    }
}

/// Everything the server reports about a source output.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct SourceOutputInfo {
    /// Server-wide index of the source output.
    pub index: u32,

    /// The name of the source output.
    pub name: CString,

    /// The module that owns this stream, if any.
    pub owner_module_index: Option<u32>,

    /// The client that owns this stream, if any.
    pub client_index: Option<u32>,

    /// The source the stream captures from.
    pub source_index: u32,

    /// The sample format of the stream.
    pub sample_spec: SampleSpec,

    /// The channel map of the stream.
    pub channel_map: ChannelMap,

    /// Latency due to buffering, in microseconds.
    pub buffer_latency: u64,

    /// Latency of the device, in microseconds.
    pub source_latency: u64,

    /// The resampling method in use, if any.
    pub resample_method: Option<CString>,

    /// The name of the driver backing the stream.
    pub driver: Option<CString>,

    /// Stream properties (v13+).
    pub props: Props,

    /// Whether the stream is corked (v19+).
    pub corked: bool,

    /// The volume of the stream (v22+).
    pub volume: ChannelVolume,

    /// Whether the stream is muted (v22+).
    pub muted: bool,

    /// Whether the volume field is meaningful (v22+).
    pub has_volume: bool,

    /// Whether the client may change the volume (v22+).
    pub volume_writable: bool,

    /// The negotiated stream format (v22+).
    pub format: FormatInfo,
}

impl CommandReply for SourceOutputInfo {}

impl TagStructRead for SourceOutputInfo {
    fn read(ts: &mut TagStructReader<'_>, protocol_version: u16) -> Result<Self, ProtocolError> {
        let mut info = Self {
            index: ts.read_u32()?,
            name: ts.read_string_non_null()?,
            owner_module_index: ts.read_index()?,
            client_index: ts.read_index()?,
            source_index: ts.read_u32()?,
            sample_spec: ts.read()?,
            channel_map: ts.read()?,
            buffer_latency: ts.read_usec()?,
            source_latency: ts.read_usec()?,
            resample_method: ts.read_string()?,
            driver: ts.read_string()?,
            ..Default::default()
        };

        if protocol_version >= 13 {
            info.props = ts.read()?;
        }

        if protocol_version >= 19 {
            info.corked = ts.read_bool()?;
        }

        if protocol_version >= 22 {
            info.volume = ts.read()?;
            info.muted = ts.read_bool()?;
            info.has_volume = ts.read_bool()?;
            info.volume_writable = ts.read_bool()?;
            info.format = ts.read()?;
        }

        Ok(info)
    }
}

impl TagStructWrite for SourceOutputInfo {
    fn write(
        &self,
        w: &mut TagStructWriter<'_>,
        protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        w.write_u32(self.index)?;
        w.write_string(Some(&self.name))?;
        w.write_index(self.owner_module_index)?;
        w.write_index(self.client_index)?;
        w.write_u32(self.source_index)?;
        w.write(self.sample_spec.protocol_downgrade(protocol_version))?;
        w.write(self.channel_map)?;
        w.write_usec(self.buffer_latency)?;
        w.write_usec(self.source_latency)?;
        w.write_string(self.resample_method.as_ref())?;
        w.write_string(self.driver.as_ref())?;

        if protocol_version >= 13 {
            w.write(&self.props)?;
        }

        if protocol_version >= 19 {
            w.write_bool(self.corked)?;
        }

        if protocol_version >= 22 {
            w.write(self.volume)?;
            w.write_bool(self.muted)?;
            w.write_bool(self.has_volume)?;
            w.write_bool(self.volume_writable)?;
            w.write(&self.format)?;
        }

        Ok(())
    }
}

/// The server reply to [`super::Command::GetSourceOutputInfoList`].
pub type SourceOutputInfoList = Vec<SourceOutputInfo>;

impl CommandReply for SourceOutputInfoList {}

impl TagStructRead for SourceOutputInfoList {
    fn read(ts: &mut TagStructReader<'_>, _protocol_version: u16) -> Result<Self, ProtocolError> {
        let mut outputs = Vec::new();
        while ts.has_data_left()? {
            outputs.push(ts.read()?);
        }

        Ok(outputs)
    }
}

impl TagStructWrite for SourceOutputInfoList {
    fn write(
        &self,
        w: &mut TagStructWriter<'_>,
        _protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        for output in self {
            w.write(output)?;
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
    fn sink_input_info_serde_all_versions() -> anyhow::Result<()> {
        test_serde(&SinkInputInfo {
            index: 1,
            name: CString::new("music")?,
            volume: ChannelVolume::norm(2),
            buffer_latency: 12_000,
            sink_latency: 40_000,
            muted: true,
            ..Default::default()
        })
    }

    // Corked/volume flags only exist on newer protocols, so sweeping them
    // across old versions would lose them.
    #[test]
    fn sink_input_info_list_serde() -> anyhow::Result<()> {
        test_serde_version(
            &vec![
                SinkInputInfo {
                    index: 1,
                    name: CString::new("stream 1")?,
                    volume: ChannelVolume::norm(2),
                    ..Default::default()
                },
                SinkInputInfo {
                    index: 5,
                    name: CString::new("stream 2")?,
                    volume: ChannelVolume::norm(1),
                    corked: true,
                    has_volume: true,
                    volume_writable: true,
                    ..Default::default()
                },
            ],
            MAX_VERSION,
        )
    }

    #[test]
    fn source_output_info_serde() -> anyhow::Result<()> {
        test_serde_version(
            &SourceOutputInfo {
                index: 2,
                name: CString::new("capture")?,
                source_index: 0,
                volume: ChannelVolume::norm(2),
                has_volume: true,
                volume_writable: true,
                ..Default::default()
            },
            MAX_VERSION,
        )
    }
}
