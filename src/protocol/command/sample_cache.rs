//! Sample-cache commands: uploads and cached-sample playback.

use std::ffi::CString;

use crate::protocol::{tagstruct::*, ProtocolError};
use crate::protocol::{ChannelMap, Props, SampleSpec};

use super::CommandReply;

/// Parameters for [`super::Command::CreateUploadStream`].
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct UploadStreamParams {
    /// The name the sample will be cached under.
    pub name: Option<CString>,

    /// The sample format of the upload.
    pub sample_spec: SampleSpec,

    /// The channel map of the upload.
    pub channel_map: ChannelMap,

    /// Total upload size, in bytes.
    pub length: u32,

    /// Properties of the cache entry.
    pub props: Props,
}

impl TagStructRead for UploadStreamParams {
    fn read(ts: &mut TagStructReader<'_>, _protocol_version: u16) -> Result<Self, ProtocolError> {
        Ok(Self {
            name: ts.read_string()?,
            sample_spec: ts.read()?,
            channel_map: ts.read()?,
            length: ts.read_u32()?,
            props: ts.read()?,
        })
    }
}

impl TagStructWrite for UploadStreamParams {
    fn write(
        &self,
        ts: &mut TagStructWriter<'_>,
        _protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        ts.write_string(self.name.as_ref())?;
        ts.write(self.sample_spec)?;
        ts.write(self.channel_map)?;
        ts.write_u32(self.length)?;
        ts.write(&self.props)?;
        Ok(())
    }
}

/// The server reply to [`super::Command::CreateUploadStream`].
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateUploadStreamReply {
    /// The connection-scoped channel the client should write the data to.
    pub channel: u32,

    /// The accepted upload size, in bytes.
    pub length: u32,
}

impl CommandReply for CreateUploadStreamReply {}

impl TagStructRead for CreateUploadStreamReply {
    fn read(ts: &mut TagStructReader<'_>, _protocol_version: u16) -> Result<Self, ProtocolError> {
        Ok(Self {
            channel: ts.read_u32()?,
            length: ts.read_u32()?,
        })
    }
}

impl TagStructWrite for CreateUploadStreamReply {
    fn write(
        &self,
        w: &mut TagStructWriter<'_>,
        _protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        w.write_u32(self.channel)?;
        w.write_u32(self.length)?;
        Ok(())
    }
}

/// Parameters for [`super::Command::PlaySample`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaySampleParams {
    /// The index of the sink to play on.
    pub sink_index: Option<u32>,

    /// The name of the sink to play on. Ignored if `sink_index` is set.
    pub sink_name: Option<CString>,

    /// The raw volume to play at.
    pub volume: u32,

    /// The name of the cached sample.
    pub name: CString,

    /// Properties for the playback stream.
    pub props: Props,
}

impl TagStructRead for PlaySampleParams {
    fn read(ts: &mut TagStructReader<'_>, _protocol_version: u16) -> Result<Self, ProtocolError> {
        Ok(Self {
            sink_index: ts.read_index()?,
            sink_name: ts.read_string()?,
            volume: ts.read_u32()?,
            name: ts.read_string_non_null()?,
            props: ts.read()?,
        })
    }
}

impl TagStructWrite for PlaySampleParams {
    fn write(
        &self,
        ts: &mut TagStructWriter<'_>,
        _protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        ts.write_index(self.sink_index)?;
        ts.write_string(self.sink_name.as_ref())?;
        ts.write_u32(self.volume)?;
        ts.write_string(Some(&self.name))?;
        ts.write(&self.props)?;
        Ok(())
    }
}

/// The server reply to [`super::Command::PlaySample`]: the index of the
/// transient playback (v13+; older versions get a plain ack).
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaySampleReply {
    pub index: u32,
}

impl CommandReply for PlaySampleReply {}

impl TagStructRead for PlaySampleReply {
    fn read(ts: &mut TagStructReader<'_>, _protocol_version: u16) -> Result<Self, ProtocolError> {
        Ok(Self {
            index: ts.read_u32()?,
        })
    }
}

impl TagStructWrite for PlaySampleReply {
    fn write(
        &self,
        w: &mut TagStructWriter<'_>,
        _protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        w.write_u32(self.index)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::protocol::tagstruct::test_util::test_serde;
    use crate::protocol::SampleFormat;

    use super::*;

    #[test]
    fn upload_params_serde() -> anyhow::Result<()> {
        test_serde(&UploadStreamParams {
            name: Some(CString::new("bell")?),
            sample_spec: SampleSpec {
                format: SampleFormat::S16Le,
                rate: 44100,
                channels: 2,
            },
            channel_map: ChannelMap::stereo(),
            length: 1024,
            props: Props::new(),
        })
    }

    #[test]
    fn upload_reply_serde() -> anyhow::Result<()> {
        test_serde(&CreateUploadStreamReply {
            channel: 0,
            length: 1024,
        })
    }

    #[test]
    fn play_sample_serde() -> anyhow::Result<()> {
        test_serde(&PlaySampleParams {
            sink_index: None,
            sink_name: Some(CString::new("auto_null")?),
            volume: 0x10000,
            name: CString::new("bell")?,
            props: Props::new(),
        })
    }
}
