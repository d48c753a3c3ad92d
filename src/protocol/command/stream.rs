//! Stream lifecycle commands: creation, buffer metrics, renames, moves.

use std::ffi::CString;

use crate::protocol::types::stream::{BufferAttr, StreamFlags};
use crate::protocol::{tagstruct::*, ProtocolError};
use crate::protocol::{ChannelMap, ChannelVolume, FormatInfo, Props, SampleSpec};

use super::CommandReply;

/// Parameters for [`super::Command::CreatePlaybackStream`].
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct PlaybackStreamParams {
    /// Sample format for the stream.
    pub sample_spec: SampleSpec,

    /// Channel map for the stream; its length should match
    /// `sample_spec.channels`.
    pub channel_map: ChannelMap,

    /// Index of the sink to connect to.
    pub sink_index: Option<u32>,

    /// Name of the sink to connect to. Ignored if `sink_index` is set.
    pub sink_name: Option<CString>,

    /// Requested buffer metrics.
    pub buffer_attr: BufferAttr,

    /// Groups this stream with others carrying the same id, phase-locking
    /// their timelines.
    pub sync_id: u32,

    /// Initial volume, if the client picked one.
    pub volume: Option<ChannelVolume>,

    /// Stream properties.
    pub props: Props,

    /// Formats the client offers.
    pub formats: Vec<FormatInfo>,

    /// Stream flags.
    pub flags: StreamFlags,
}

impl TagStructRead for PlaybackStreamParams {
    fn read(ts: &mut TagStructReader<'_>, protocol_version: u16) -> Result<Self, ProtocolError> {
        let sample_spec = ts.read()?;
        let channel_map = ts.read()?;
        let sink_index = ts.read_index()?;
        let sink_name = ts.read_string()?;

        let maxlength = ts.read_u32()?;

        let mut flags = StreamFlags {
            start_corked: ts.read_bool()?,
            ..Default::default()
        };

        let buffer_attr = BufferAttr {
            maxlength,
            tlength: ts.read_u32()?,
            prebuf: ts.read_u32()?,
            minreq: ts.read_u32()?,
            ..Default::default()
        };

        let sync_id = ts.read_u32()?;
        let mut volume = Some(ts.read()?);

        flags.no_remap_channels = ts.read_bool()?;
        flags.no_remix_channels = ts.read_bool()?;
        flags.fix_format = ts.read_bool()?;
        flags.fix_rate = ts.read_bool()?;
        flags.fix_channels = ts.read_bool()?;
        flags.no_move = ts.read_bool()?;
        flags.variable_rate = ts.read_bool()?;

        flags.start_muted = Some(ts.read_bool()?);
        flags.adjust_latency = ts.read_bool()?;
        let props = ts.read()?;

        let mut formats = Vec::new();

        if protocol_version >= 14 {
            // A false here means the cvolume above is just a placeholder.
            if !ts.read_bool()? {
                volume = None;
            }

            flags.early_requests = ts.read_bool()?;
        }

        if protocol_version >= 15 {
            // Likewise for the muted flag.
            if !ts.read_bool()? {
                flags.start_muted = None;
            }

            flags.no_inhibit_auto_suspend = ts.read_bool()?;
            flags.fail_on_suspend = ts.read_bool()?;
        }

        if protocol_version >= 17 {
            flags.relative_volume = ts.read_bool()?;
        }

        if protocol_version >= 18 {
            flags.passthrough = ts.read_bool()?;
        }

        if protocol_version >= 21 {
            for _ in 0..ts.read_u8()? {
                formats.push(ts.read()?);
            }
        }

        Ok(Self {
            sample_spec,
            channel_map,
            sink_index,
            sink_name,
            buffer_attr,
            sync_id,
            volume,
            props,
            formats,
            flags,
        })
    }
}

impl TagStructWrite for PlaybackStreamParams {
    fn write(
        &self,
        ts: &mut TagStructWriter<'_>,
        protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        ts.write(self.sample_spec)?;
        ts.write(self.channel_map)?;
        ts.write_index(self.sink_index)?;
        ts.write_string(self.sink_name.as_ref())?;
        ts.write_u32(self.buffer_attr.maxlength)?;
        ts.write_bool(self.flags.start_corked)?;
        ts.write_u32(self.buffer_attr.tlength)?;
        ts.write_u32(self.buffer_attr.prebuf)?;
        ts.write_u32(self.buffer_attr.minreq)?;
        ts.write_u32(self.sync_id)?;
        ts.write(
            self.volume
                .unwrap_or_else(|| ChannelVolume::muted(self.sample_spec.channels)),
        )?;
        ts.write_bool(self.flags.no_remap_channels)?;
        ts.write_bool(self.flags.no_remix_channels)?;
        ts.write_bool(self.flags.fix_format)?;
        ts.write_bool(self.flags.fix_rate)?;
        ts.write_bool(self.flags.fix_channels)?;
        ts.write_bool(self.flags.no_move)?;
        ts.write_bool(self.flags.variable_rate)?;
        ts.write_bool(self.flags.start_muted.unwrap_or_default())?;
        ts.write_bool(self.flags.adjust_latency)?;
        ts.write(&self.props)?;

        if protocol_version >= 14 {
            ts.write_bool(self.volume.is_some())?;
            ts.write_bool(self.flags.early_requests)?;
        }

        if protocol_version >= 15 {
            ts.write_bool(self.flags.start_muted.is_some())?;
            ts.write_bool(self.flags.no_inhibit_auto_suspend)?;
            ts.write_bool(self.flags.fail_on_suspend)?;
        }

        if protocol_version >= 17 {
            ts.write_bool(self.flags.relative_volume)?;
        }

        if protocol_version >= 18 {
            ts.write_bool(self.flags.passthrough)?;
        }

        if protocol_version >= 21 {
            ts.write_u8(self.formats.len() as u8)?;
            for format in &self.formats {
                ts.write(format)?;
            }
        }

        Ok(())
    }
}

/// The server reply to [`super::Command::CreatePlaybackStream`].
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct CreatePlaybackStreamReply {
    /// The connection-scoped channel id used to refer to this stream in
    /// other commands and in memblock frames.
    pub channel: u32,

    /// Server-wide index of the created sink input.
    pub sink_input_index: u32,

    /// The number of bytes the server wants immediately.
    pub requested_bytes: u32,

    /// Buffer metrics as negotiated (v9+).
    pub buffer_attr: BufferAttr,

    /// The negotiated sample format (v12+).
    pub sample_spec: SampleSpec,

    /// The negotiated channel map (v12+).
    pub channel_map: ChannelMap,

    /// The index of the sink the stream landed on (v12+).
    pub sink_index: u32,

    /// The name of the sink the stream landed on (v12+).
    pub sink_name: Option<CString>,

    /// Whether that sink is suspended (v12+).
    pub suspended: bool,

    /// The configured device latency, in microseconds (v13+).
    pub sink_latency: u64,

    /// The negotiated stream format (v21+).
    pub format: FormatInfo,
}

impl CommandReply for CreatePlaybackStreamReply {}

impl TagStructRead for CreatePlaybackStreamReply {
    fn read(ts: &mut TagStructReader<'_>, protocol_version: u16) -> Result<Self, ProtocolError> {
        let mut reply = Self {
            channel: ts
                .read_index()?
                .ok_or_else(|| ProtocolError::Invalid("invalid channel".into()))?,
            sink_input_index: ts
                .read_index()?
                .ok_or_else(|| ProtocolError::Invalid("invalid sink input index".into()))?,
            requested_bytes: ts.read_u32()?,
            ..Default::default()
        };

        if protocol_version >= 9 {
            reply.buffer_attr = BufferAttr {
                maxlength: ts.read_u32()?,
                tlength: ts.read_u32()?,
                prebuf: ts.read_u32()?,
                minreq: ts.read_u32()?,
                ..Default::default()
            };
        }

        if protocol_version >= 12 {
            reply.sample_spec = ts.read()?;
            reply.channel_map = ts.read()?;
            reply.sink_index = ts
                .read_index()?
                .ok_or_else(|| ProtocolError::Invalid("invalid sink index".into()))?;
            reply.sink_name = ts.read_string()?;
            reply.suspended = ts.read_bool()?;
        }

        if protocol_version >= 13 {
            reply.sink_latency = ts.read_usec()?;
        }

        if protocol_version >= 21 {
            reply.format = ts.read()?;
        }

        Ok(reply)
    }
}

impl TagStructWrite for CreatePlaybackStreamReply {
    fn write(
        &self,
        w: &mut TagStructWriter<'_>,
        protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        w.write_u32(self.channel)?;
        w.write_u32(self.sink_input_index)?;
        w.write_u32(self.requested_bytes)?;

        if protocol_version >= 9 {
            w.write_u32(self.buffer_attr.maxlength)?;
            w.write_u32(self.buffer_attr.tlength)?;
            w.write_u32(self.buffer_attr.prebuf)?;
            w.write_u32(self.buffer_attr.minreq)?;
        }

        if protocol_version >= 12 {
            w.write(self.sample_spec.protocol_downgrade(protocol_version))?;
            w.write(self.channel_map)?;
            w.write_u32(self.sink_index)?;
            w.write_string(self.sink_name.as_ref())?;
            w.write_bool(self.suspended)?;
        }

        if protocol_version >= 13 {
            w.write_usec(self.sink_latency)?;
        }

        if protocol_version >= 21 {
            w.write(&self.format)?;
        }

        Ok(())
    }
}

/// Parameters for [`super::Command::CreateRecordStream`].
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct RecordStreamParams {
    /// Sample format for the stream.
    pub sample_spec: SampleSpec,

    /// Channel map for the stream.
    pub channel_map: ChannelMap,

    /// Index of the source to connect to.
    pub source_index: Option<u32>,

    /// Name of the source to connect to. Ignored if `source_index` is set.
    pub source_name: Option<CString>,

    /// Requested buffer metrics; only `maxlength` and `fragsize` apply.
    pub buffer_attr: BufferAttr,

    /// Record directly from this sink input's stream, bypassing the source.
    pub direct_on_input: Option<u32>,

    /// Initial volume, if the client picked one (v22+).
    pub volume: Option<ChannelVolume>,

    /// Stream properties.
    pub props: Props,

    /// Formats the client offers (v22+).
    pub formats: Vec<FormatInfo>,

    /// Stream flags.
    pub flags: StreamFlags,
}

impl TagStructRead for RecordStreamParams {
    fn read(ts: &mut TagStructReader<'_>, protocol_version: u16) -> Result<Self, ProtocolError> {
        let sample_spec = ts.read()?;
        let channel_map = ts.read()?;
        let source_index = ts.read_index()?;
        let source_name = ts.read_string()?;

        let maxlength = ts.read_u32()?;

        let mut flags = StreamFlags {
            start_corked: ts.read_bool()?,
            ..Default::default()
        };

        let buffer_attr = BufferAttr {
            maxlength,
            fragsize: ts.read_u32()?,
            ..Default::default()
        };

        flags.no_remap_channels = ts.read_bool()?;
        flags.no_remix_channels = ts.read_bool()?;
        flags.fix_format = ts.read_bool()?;
        flags.fix_rate = ts.read_bool()?;
        flags.fix_channels = ts.read_bool()?;
        flags.no_move = ts.read_bool()?;
        flags.variable_rate = ts.read_bool()?;

        flags.peak_detect = ts.read_bool()?;
        flags.adjust_latency = ts.read_bool()?;
        let props = ts.read()?;

        let direct_on_input = ts.read_index()?;

        let mut volume = None;
        let mut formats = Vec::new();

        if protocol_version >= 14 {
            flags.early_requests = ts.read_bool()?;
        }

        if protocol_version >= 15 {
            flags.no_inhibit_auto_suspend = ts.read_bool()?;
            flags.fail_on_suspend = ts.read_bool()?;
        }

        if protocol_version >= 22 {
            for _ in 0..ts.read_u8()? {
                formats.push(ts.read()?);
            }

            let cvolume = ts.read()?;
            let start_muted = ts.read_bool()?;

            if ts.read_bool()? {
                volume = Some(cvolume);
            }

            if ts.read_bool()? {
                flags.start_muted = Some(start_muted);
            }

            flags.relative_volume = ts.read_bool()?;
            flags.passthrough = ts.read_bool()?;
        }

        Ok(Self {
            sample_spec,
            channel_map,
            source_index,
            source_name,
            buffer_attr,
            direct_on_input,
            volume,
            props,
            formats,
            flags,
        })
    }
}

impl TagStructWrite for RecordStreamParams {
    fn write(
        &self,
        ts: &mut TagStructWriter<'_>,
        protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        ts.write(self.sample_spec)?;
        ts.write(self.channel_map)?;
        ts.write_index(self.source_index)?;
        ts.write_string(self.source_name.as_ref())?;
        ts.write_u32(self.buffer_attr.maxlength)?;
        ts.write_bool(self.flags.start_corked)?;
        ts.write_u32(self.buffer_attr.fragsize)?;
        ts.write_bool(self.flags.no_remap_channels)?;
        ts.write_bool(self.flags.no_remix_channels)?;
        ts.write_bool(self.flags.fix_format)?;
        ts.write_bool(self.flags.fix_rate)?;
        ts.write_bool(self.flags.fix_channels)?;
        ts.write_bool(self.flags.no_move)?;
        ts.write_bool(self.flags.variable_rate)?;
        ts.write_bool(self.flags.peak_detect)?;
        ts.write_bool(self.flags.adjust_latency)?;
        ts.write(&self.props)?;
        ts.write_index(self.direct_on_input)?;

        if protocol_version >= 14 {
            ts.write_bool(self.flags.early_requests)?;
        }

        if protocol_version >= 15 {
            ts.write_bool(self.flags.no_inhibit_auto_suspend)?;
            ts.write_bool(self.flags.fail_on_suspend)?;
        }

        if protocol_version >= 22 {
            ts.write_u8(self.formats.len() as u8)?;
            for format in &self.formats {
                ts.write(format)?;
            }

            ts.write(self.volume.unwrap_or_default())?;
            ts.write_bool(self.flags.start_muted.unwrap_or_default())?;
            ts.write_bool(self.volume.is_some())?;
            ts.write_bool(self.flags.start_muted.is_some())?;
            ts.write_bool(self.flags.relative_volume)?;
            ts.write_bool(self.flags.passthrough)?;
        }

        Ok(())
    }
}

/// The server reply to [`super::Command::CreateRecordStream`].
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct CreateRecordStreamReply {
    /// The connection-scoped channel id of the stream.
    pub channel: u32,

    /// Server-wide index of the created source output.
    pub source_output_index: u32,

    /// Buffer metrics as negotiated (v9+).
    pub buffer_attr: BufferAttr,

    /// The negotiated sample format (v12+).
    pub sample_spec: SampleSpec,

    /// The negotiated channel map (v12+).
    pub channel_map: ChannelMap,

    /// The index of the source the stream landed on (v12+).
    pub source_index: u32,

    /// The name of the source the stream landed on (v12+).
    pub source_name: Option<CString>,

    /// Whether that source is suspended (v12+).
    pub suspended: bool,

    /// The configured device latency, in microseconds (v13+).
    pub source_latency: u64,

    /// The negotiated stream format (v22+).
    pub format: FormatInfo,
}

impl CommandReply for CreateRecordStreamReply {}

impl TagStructRead for CreateRecordStreamReply {
    fn read(ts: &mut TagStructReader<'_>, protocol_version: u16) -> Result<Self, ProtocolError> {
        let mut reply = Self {
            channel: ts
                .read_index()?
                .ok_or_else(|| ProtocolError::Invalid("invalid channel".into()))?,
            source_output_index: ts
                .read_index()?
                .ok_or_else(|| ProtocolError::Invalid("invalid source output index".into()))?,
            ..Default::default()
        };

        if protocol_version >= 9 {
            reply.buffer_attr = BufferAttr {
                maxlength: ts.read_u32()?,
                fragsize: ts.read_u32()?,
                ..Default::default()
            };
        }

        if protocol_version >= 12 {
            reply.sample_spec = ts.read()?;
            reply.channel_map = ts.read()?;
            reply.source_index = ts
                .read_index()?
                .ok_or_else(|| ProtocolError::Invalid("invalid source index".into()))?;
            reply.source_name = ts.read_string()?;
            reply.suspended = ts.read_bool()?;
        }

        if protocol_version >= 13 {
            reply.source_latency = ts.read_usec()?;
        }

        if protocol_version >= 22 {
            reply.format = ts.read()?;
        }

        Ok(reply)
    }
}

impl TagStructWrite for CreateRecordStreamReply {
    fn write(
        &self,
        w: &mut TagStructWriter<'_>,
        protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        w.write_u32(self.channel)?;
        w.write_u32(self.source_output_index)?;

        if protocol_version >= 9 {
            w.write_u32(self.buffer_attr.maxlength)?;
            w.write_u32(self.buffer_attr.fragsize)?;
        }

        if protocol_version >= 12 {
            w.write(self.sample_spec.protocol_downgrade(protocol_version))?;
            w.write(self.channel_map)?;
            w.write_u32(self.source_index)?;
            w.write_string(self.source_name.as_ref())?;
            w.write_bool(self.suspended)?;
        }

        if protocol_version >= 13 {
            w.write_usec(self.source_latency)?;
        }

        if protocol_version >= 22 {
            w.write(&self.format)?;
        }

        Ok(())
    }
}

/// Parameters for the cork/uncork commands.
#[derive(Default, Debug, Clone, Copy, Eq, PartialEq)]
pub struct CorkStreamParams {
    /// The channel to cork or uncork.
    pub channel: u32,

    /// Whether to cork (pause) or uncork (resume) the stream.
    pub cork: bool,
}

impl TagStructRead for CorkStreamParams {
    fn read(ts: &mut TagStructReader<'_>, _protocol_version: u16) -> Result<Self, ProtocolError> {
        Ok(Self {
            channel: ts
                .read_index()?
                .ok_or_else(|| ProtocolError::Invalid("invalid channel".to_string()))?,
            cork: ts.read_bool()?,
        })
    }
}

impl TagStructWrite for CorkStreamParams {
    fn write(
        &self,
        ts: &mut TagStructWriter<'_>,
        _protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        ts.write_index(Some(self.channel))?;
        ts.write_bool(self.cork)?;
        Ok(())
    }
}

/// Parameters for the stream rename commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetStreamNameParams {
    /// The channel of the stream to rename.
    pub channel: u32,
    pub name: CString,
}

impl TagStructRead for SetStreamNameParams {
    fn read(ts: &mut TagStructReader<'_>, _protocol_version: u16) -> Result<Self, ProtocolError> {
        Ok(Self {
            channel: ts.read_u32()?,
            name: ts.read_string_non_null()?,
        })
    }
}

impl TagStructWrite for SetStreamNameParams {
    fn write(
        &self,
        w: &mut TagStructWriter<'_>,
        _protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        w.write_u32(self.channel)?;
        w.write_string(Some(&self.name))?;
        Ok(())
    }
}

/// Parameters for [`super::Command::SetPlaybackStreamBufferAttr`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetPlaybackStreamBufferAttrParams {
    /// The channel of the stream to update.
    pub channel: u32,
    pub buffer_attr: BufferAttr,
    pub adjust_latency: bool,
    pub early_requests: bool,
}

impl TagStructRead for SetPlaybackStreamBufferAttrParams {
    fn read(ts: &mut TagStructReader<'_>, protocol_version: u16) -> Result<Self, ProtocolError> {
        Ok(Self {
            channel: ts
                .read_index()?
                .ok_or_else(|| ProtocolError::Invalid("invalid channel".into()))?,
            buffer_attr: BufferAttr {
                maxlength: ts.read_u32()?,
                tlength: ts.read_u32()?,
                prebuf: ts.read_u32()?,
                minreq: ts.read_u32()?,
                fragsize: 0,
            },
            adjust_latency: ts.read_bool()?,
            early_requests: if protocol_version >= 14 {
                ts.read_bool()?
            } else {
                false
            },
        })
    }
}

impl TagStructWrite for SetPlaybackStreamBufferAttrParams {
    fn write(
        &self,
        w: &mut TagStructWriter<'_>,
        protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        w.write_index(Some(self.channel))?;
        w.write_u32(self.buffer_attr.maxlength)?;
        w.write_u32(self.buffer_attr.tlength)?;
        w.write_u32(self.buffer_attr.prebuf)?;
        w.write_u32(self.buffer_attr.minreq)?;
        w.write_bool(self.adjust_latency)?;
        if protocol_version >= 14 {
            w.write_bool(self.early_requests)?;
        }
        Ok(())
    }
}

/// The server reply to [`super::Command::SetPlaybackStreamBufferAttr`].
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetPlaybackStreamBufferAttrReply {
    pub buffer_attr: BufferAttr,
    pub sink_latency: u64,
}

impl CommandReply for SetPlaybackStreamBufferAttrReply {}

impl TagStructRead for SetPlaybackStreamBufferAttrReply {
    fn read(ts: &mut TagStructReader<'_>, _protocol_version: u16) -> Result<Self, ProtocolError> {
        Ok(Self {
            buffer_attr: BufferAttr {
                maxlength: ts.read_u32()?,
                tlength: ts.read_u32()?,
                prebuf: ts.read_u32()?,
                minreq: ts.read_u32()?,
                fragsize: 0,
            },
            sink_latency: ts.read_usec()?,
        })
    }
}

impl TagStructWrite for SetPlaybackStreamBufferAttrReply {
    fn write(
        &self,
        w: &mut TagStructWriter<'_>,
        _protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        w.write_u32(self.buffer_attr.maxlength)?;
        w.write_u32(self.buffer_attr.tlength)?;
        w.write_u32(self.buffer_attr.prebuf)?;
        w.write_u32(self.buffer_attr.minreq)?;
        w.write_usec(self.sink_latency)?;
        Ok(())
    }
}

/// Parameters for [`super::Command::SetRecordStreamBufferAttr`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetRecordStreamBufferAttrParams {
    /// The channel of the stream to update.
    pub channel: u32,
    pub buffer_attr: BufferAttr,
    pub adjust_latency: bool,
    pub early_requests: bool,
}

impl TagStructRead for SetRecordStreamBufferAttrParams {
    fn read(ts: &mut TagStructReader<'_>, protocol_version: u16) -> Result<Self, ProtocolError> {
        Ok(Self {
            channel: ts
                .read_index()?
                .ok_or_else(|| ProtocolError::Invalid("invalid channel".into()))?,
            buffer_attr: BufferAttr {
                maxlength: ts.read_u32()?,
                tlength: 0,
                prebuf: 0,
                minreq: 0,
                fragsize: ts.read_u32()?,
            },
            adjust_latency: ts.read_bool()?,
            early_requests: if protocol_version >= 14 {
                ts.read_bool()?
            } else {
                false
            },
        })
    }
}

impl TagStructWrite for SetRecordStreamBufferAttrParams {
    fn write(
        &self,
        w: &mut TagStructWriter<'_>,
        protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        w.write_index(Some(self.channel))?;
        w.write_u32(self.buffer_attr.maxlength)?;
        w.write_u32(self.buffer_attr.fragsize)?;
        w.write_bool(self.adjust_latency)?;
        if protocol_version >= 14 {
            w.write_bool(self.early_requests)?;
        }
        Ok(())
    }
}

/// The server reply to [`super::Command::SetRecordStreamBufferAttr`].
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetRecordStreamBufferAttrReply {
    pub buffer_attr: BufferAttr,
    pub source_latency: u64,
}

impl CommandReply for SetRecordStreamBufferAttrReply {}

impl TagStructRead for SetRecordStreamBufferAttrReply {
    fn read(ts: &mut TagStructReader<'_>, _protocol_version: u16) -> Result<Self, ProtocolError> {
        Ok(Self {
            buffer_attr: BufferAttr {
                maxlength: ts.read_u32()?,
                tlength: 0,
                prebuf: 0,
                minreq: 0,
                fragsize: ts.read_u32()?,
            },
            source_latency: ts.read_usec()?,
        })
    }
}

impl TagStructWrite for SetRecordStreamBufferAttrReply {
    fn write(
        &self,
        w: &mut TagStructWriter<'_>,
        _protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        w.write_u32(self.buffer_attr.maxlength)?;
        w.write_u32(self.buffer_attr.fragsize)?;
        w.write_usec(self.source_latency)?;
        Ok(())
    }
}

/// Parameters for the sample-rate update commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateStreamSampleRateParams {
    /// The channel of the stream to update.
    pub channel: u32,
    pub rate: u32,
}

impl TagStructRead for UpdateStreamSampleRateParams {
    fn read(ts: &mut TagStructReader<'_>, _protocol_version: u16) -> Result<Self, ProtocolError> {
        Ok(Self {
            channel: ts
                .read_index()?
                .ok_or_else(|| ProtocolError::Invalid("invalid channel".into()))?,
            rate: ts.read_u32()?,
        })
    }
}

impl TagStructWrite for UpdateStreamSampleRateParams {
    fn write(
        &self,
        w: &mut TagStructWriter<'_>,
        _protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        w.write_index(Some(self.channel))?;
        w.write_u32(self.rate)?;
        Ok(())
    }
}

/// Parameters for the stream move commands. The stream is addressed by its
/// server-wide index; the destination by index or name, never both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveStreamParams {
    /// The server-wide index of the sink input or source output to move.
    pub index: Option<u32>,

    /// The index of the destination device.
    pub device_index: Option<u32>,

    /// The name of the destination device.
    pub device_name: Option<CString>,
}

impl TagStructRead for MoveStreamParams {
    fn read(ts: &mut TagStructReader<'_>, _protocol_version: u16) -> Result<Self, ProtocolError> {
        Ok(Self {
            index: ts.read_index()?,
            device_index: ts.read_index()?,
            device_name: ts.read_string()?,
        })
    }
}

impl TagStructWrite for MoveStreamParams {
    fn write(
        &self,
        ts: &mut TagStructWriter<'_>,
        _protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        ts.write_index(self.index)?;
        ts.write_index(self.device_index)?;
        ts.write_string(self.device_name.as_ref())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::protocol::tagstruct::test_util::test_serde;
    use crate::protocol::SampleFormat;

    use super::*;

    #[test]
    fn playback_params_serde() -> anyhow::Result<()> {
        let params = PlaybackStreamParams {
            sample_spec: SampleSpec {
                format: SampleFormat::S16Le,
                rate: 44100,
                channels: 2,
            },
            channel_map: ChannelMap::stereo(),
            volume: Some(ChannelVolume::norm(2)),
            flags: StreamFlags {
                start_corked: true,
                start_muted: Some(true),
                ..Default::default()
            },
            ..Default::default()
        };

        test_serde(&params)
    }

    #[test]
    fn record_params_serde() -> anyhow::Result<()> {
        let params = RecordStreamParams {
            sample_spec: SampleSpec {
                format: SampleFormat::Float32Le,
                rate: 48000,
                channels: 2,
            },
            channel_map: ChannelMap::stereo(),
            flags: StreamFlags {
                adjust_latency: true,
                ..Default::default()
            },
            ..Default::default()
        };

        test_serde(&params)
    }

    #[test]
    fn create_replies_serde() -> anyhow::Result<()> {
        test_serde(&CreatePlaybackStreamReply {
            channel: 0,
            sink_input_index: 1,
            sink_index: 2,
            requested_bytes: 65536,
            ..Default::default()
        })?;

        test_serde(&CreateRecordStreamReply {
            channel: 0,
            source_output_index: 1,
            source_index: 2,
            ..Default::default()
        })
    }

    #[test]
    fn buffer_attr_commands_serde() -> anyhow::Result<()> {
        test_serde(&SetPlaybackStreamBufferAttrParams {
            channel: 1,
            buffer_attr: BufferAttr {
                fragsize: 0,
                ..Default::default()
            },
            adjust_latency: true,
            early_requests: false,
        })?;

        test_serde(&SetRecordStreamBufferAttrParams {
            channel: 1,
            buffer_attr: BufferAttr {
                tlength: 0,
                prebuf: 0,
                minreq: 0,
                ..Default::default()
            },
            adjust_latency: true,
            early_requests: false,
        })
    }

    #[test]
    fn cork_params_serde() -> anyhow::Result<()> {
        test_serde(&CorkStreamParams {
            channel: 0,
            cork: true,
        })
    }
}
