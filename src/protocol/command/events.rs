//! Asynchronous server-to-client stream notifications.

use std::ffi::CString;

use crate::protocol::tagstruct::*;
use crate::protocol::types::stream::BufferAttr;
use crate::protocol::{Props, ProtocolError};

/// Asks the client for more playback data.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request {
    /// The channel of the stream.
    pub channel: u32,

    /// The number of bytes the server wants.
    pub length: u32,
}

impl TagStructRead for Request {
    fn read(ts: &mut TagStructReader<'_>, _protocol_version: u16) -> Result<Self, ProtocolError> {
        Ok(Self {
            channel: ts.read_u32()?,
            length: ts.read_u32()?,
        })
    }
}

impl TagStructWrite for Request {
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

/// Reports that a playback stream ran dry.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Underflow {
    /// The channel of the stream.
    pub channel: u32,

    /// The read position at which the underrun happened (v23+).
    pub offset: i64,
}

impl TagStructRead for Underflow {
    fn read(ts: &mut TagStructReader<'_>, protocol_version: u16) -> Result<Self, ProtocolError> {
        Ok(Self {
            channel: ts.read_u32()?,
            offset: if protocol_version >= 23 {
                ts.read_i64()?
            } else {
                0
            },
        })
    }
}

impl TagStructWrite for Underflow {
    fn write(
        &self,
        w: &mut TagStructWriter<'_>,
        protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        w.write_u32(self.channel)?;

        if protocol_version >= 23 {
            w.write_i64(self.offset)?;
        }

        Ok(())
    }
}

/// Reports new buffer metrics for a playback stream after a server-side
/// change (e.g. a move).
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackBufferAttrChanged {
    /// The channel of the stream.
    pub channel: u32,

    /// The new buffer metrics; `fragsize` does not apply.
    pub buffer_attr: BufferAttr,

    /// The new configured device latency, in microseconds.
    pub sink_latency: u64,
}

impl TagStructRead for PlaybackBufferAttrChanged {
    fn read(ts: &mut TagStructReader<'_>, _protocol_version: u16) -> Result<Self, ProtocolError> {
        Ok(Self {
            channel: ts.read_u32()?,
            buffer_attr: BufferAttr {
                maxlength: ts.read_u32()?,
                tlength: ts.read_u32()?,
                prebuf: ts.read_u32()?,
                minreq: ts.read_u32()?,
                ..Default::default()
            },
            sink_latency: ts.read_usec()?,
        })
    }
}

impl TagStructWrite for PlaybackBufferAttrChanged {
    fn write(
        &self,
        w: &mut TagStructWriter<'_>,
        _protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        w.write_u32(self.channel)?;
        w.write_u32(self.buffer_attr.maxlength)?;
        w.write_u32(self.buffer_attr.tlength)?;
        w.write_u32(self.buffer_attr.prebuf)?;
        w.write_u32(self.buffer_attr.minreq)?;
        w.write_usec(self.sink_latency)?;
        Ok(())
    }
}

/// Reports that a playback stream was moved to another sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackStreamMoved {
    /// The channel of the stream.
    pub channel: u32,

    /// The index of the destination device.
    pub device_index: u32,

    /// The name of the destination device.
    pub device_name: CString,

    /// Whether the destination device is suspended.
    pub device_suspended: bool,

    /// The buffer metrics after the move; `fragsize` does not apply.
    pub buffer_attr: BufferAttr,

    /// The configured device latency after the move, in microseconds.
    pub sink_latency: u64,
}

impl TagStructRead for PlaybackStreamMoved {
    fn read(ts: &mut TagStructReader<'_>, _protocol_version: u16) -> Result<Self, ProtocolError> {
        Ok(Self {
            channel: ts
                .read_index()?
                .ok_or_else(|| ProtocolError::Invalid("invalid channel".into()))?,
            device_index: ts
                .read_index()?
                .ok_or_else(|| ProtocolError::Invalid("invalid device index".into()))?,
            device_name: ts.read_string_non_null()?,
            device_suspended: ts.read_bool()?,
            buffer_attr: BufferAttr {
                maxlength: ts.read_u32()?,
                tlength: ts.read_u32()?,
                prebuf: ts.read_u32()?,
                minreq: ts.read_u32()?,
                ..Default::default()
            },
            sink_latency: ts.read_usec()?,
        })
    }
}

impl TagStructWrite for PlaybackStreamMoved {
    fn write(
        &self,
        ts: &mut TagStructWriter<'_>,
        _protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        ts.write_index(Some(self.channel))?;
        ts.write_index(Some(self.device_index))?;
        ts.write_string(Some(&self.device_name))?;
        ts.write_bool(self.device_suspended)?;
        ts.write_u32(self.buffer_attr.maxlength)?;
        ts.write_u32(self.buffer_attr.tlength)?;
        ts.write_u32(self.buffer_attr.prebuf)?;
        ts.write_u32(self.buffer_attr.minreq)?;
        ts.write_usec(self.sink_latency)?;
        Ok(())
    }
}

/// Reports that a record stream was moved to another source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordStreamMoved {
    /// The channel of the stream.
    pub channel: u32,

    /// The index of the destination device.
    pub device_index: u32,

    /// The name of the destination device.
    pub device_name: CString,

    /// Whether the destination device is suspended.
    pub device_suspended: bool,

    /// The buffer metrics after the move; only `maxlength` and `fragsize`
    /// apply.
    pub buffer_attr: BufferAttr,

    /// The configured device latency after the move, in microseconds.
    pub source_latency: u64,
}

impl TagStructRead for RecordStreamMoved {
    fn read(ts: &mut TagStructReader<'_>, _protocol_version: u16) -> Result<Self, ProtocolError> {
        Ok(Self {
            channel: ts
                .read_index()?
                .ok_or_else(|| ProtocolError::Invalid("invalid channel".into()))?,
            device_index: ts
                .read_index()?
                .ok_or_else(|| ProtocolError::Invalid("invalid device index".into()))?,
            device_name: ts.read_string_non_null()?,
            device_suspended: ts.read_bool()?,
            buffer_attr: BufferAttr {
                maxlength: ts.read_u32()?,
                fragsize: ts.read_u32()?,
                ..Default::default()
            },
            source_latency: ts.read_usec()?,
        })
    }
}

impl TagStructWrite for RecordStreamMoved {
    fn write(
        &self,
        ts: &mut TagStructWriter<'_>,
        _protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        ts.write_index(Some(self.channel))?;
        ts.write_index(Some(self.device_index))?;
        ts.write_string(Some(&self.device_name))?;
        ts.write_bool(self.device_suspended)?;
        ts.write_u32(self.buffer_attr.maxlength)?;
        ts.write_u32(self.buffer_attr.fragsize)?;
        ts.write_usec(self.source_latency)?;
        Ok(())
    }
}

/// Reports that the device under a stream was suspended or resumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSuspended {
    /// The channel of the stream.
    pub channel: u32,

    /// The new suspend state.
    pub suspended: bool,
}

impl TagStructRead for StreamSuspended {
    fn read(ts: &mut TagStructReader<'_>, _protocol_version: u16) -> Result<Self, ProtocolError> {
        Ok(Self {
            channel: ts
                .read_index()?
                .ok_or_else(|| ProtocolError::Invalid("invalid channel".into()))?,
            suspended: ts.read_bool()?,
        })
    }
}

impl TagStructWrite for StreamSuspended {
    fn write(
        &self,
        ts: &mut TagStructWriter<'_>,
        _protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        ts.write_index(Some(self.channel))?;
        ts.write_bool(self.suspended)?;
        Ok(())
    }
}

/// A named stream event with properties attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEvent {
    /// The channel of the stream.
    pub channel: u32,

    /// The event name.
    pub name: CString,

    /// The event properties.
    pub props: Props,
}

impl TagStructRead for StreamEvent {
    fn read(ts: &mut TagStructReader<'_>, _protocol_version: u16) -> Result<Self, ProtocolError> {
        Ok(Self {
            channel: ts
                .read_index()?
                .ok_or_else(|| ProtocolError::Invalid("invalid channel".into()))?,
            name: ts.read_string_non_null()?,
            props: ts.read()?,
        })
    }
}

impl TagStructWrite for StreamEvent {
    fn write(
        &self,
        ts: &mut TagStructWriter<'_>,
        _protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        ts.write_index(Some(self.channel))?;
        ts.write_string(Some(&self.name))?;
        ts.write(&self.props)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::protocol::tagstruct::test_util::{test_serde, test_serde_version};
    use crate::protocol::MAX_VERSION;

    use super::*;

    #[test]
    fn request_serde() -> anyhow::Result<()> {
        test_serde_version(
            &Request {
                channel: 1,
                length: 2,
            },
            MAX_VERSION,
        )
    }

    #[test]
    fn underflow_serde() -> anyhow::Result<()> {
        test_serde(&Underflow {
            channel: 1,
            offset: 0,
        })
    }

    #[test]
    fn buffer_attr_changed_serde() -> anyhow::Result<()> {
        test_serde_version(
            &PlaybackBufferAttrChanged {
                channel: 1,
                buffer_attr: Default::default(),
                sink_latency: 2,
            },
            MAX_VERSION,
        )
    }

    #[test]
    fn stream_moved_serde() -> anyhow::Result<()> {
        test_serde_version(
            &PlaybackStreamMoved {
                channel: 1,
                device_index: 2,
                device_name: CString::new("sink1")?,
                device_suspended: false,
                buffer_attr: Default::default(),
                sink_latency: 3000,
            },
            MAX_VERSION,
        )?;

        test_serde_version(
            &RecordStreamMoved {
                channel: 1,
                device_index: 2,
                device_name: CString::new("source1")?,
                device_suspended: true,
                buffer_attr: Default::default(),
                source_latency: 3000,
            },
            MAX_VERSION,
        )
    }

    #[test]
    fn stream_suspended_serde() -> anyhow::Result<()> {
        test_serde(&StreamSuspended {
            channel: 0,
            suspended: true,
        })
    }

    #[test]
    fn stream_event_serde() -> anyhow::Result<()> {
        test_serde(&StreamEvent {
            channel: 0,
            name: CString::new("event")?,
            props: Props::new(),
        })
    }
}
