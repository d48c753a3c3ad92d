//! Stream timing queries.

use std::time::SystemTime;

use crate::protocol::{tagstruct::*, ProtocolError};

use super::CommandReply;

/// Parameters for [`super::Command::GetPlaybackLatency`] and
/// [`super::Command::GetRecordLatency`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencyParams {
    /// The channel to get timing for.
    pub channel: u32,

    /// The client's transmit timestamp, echoed back for RTT estimation.
    pub now: SystemTime,
}

impl TagStructRead for LatencyParams {
    fn read(ts: &mut TagStructReader<'_>, _protocol_version: u16) -> Result<Self, ProtocolError> {
        Ok(Self {
            channel: ts.read_u32()?,
            now: ts.read_timeval()?,
        })
    }
}

impl TagStructWrite for LatencyParams {
    fn write(
        &self,
        w: &mut TagStructWriter<'_>,
        _protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        w.write_u32(self.channel)?;
        w.write_timeval(self.now)?;
        Ok(())
    }
}

/// The server reply to [`super::Command::GetPlaybackLatency`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackLatency {
    /// The device-side latency, in microseconds.
    pub sink_usec: u64,

    /// Unused for playback; always zero.
    pub source_usec: u64,

    /// Whether the stream is actively playing.
    pub playing: bool,

    /// The client timestamp from the request.
    pub local_time: SystemTime,

    /// The server timestamp at reply time.
    pub remote_time: SystemTime,

    /// The stream's write position, in bytes.
    pub write_index: i64,

    /// The stream's read position, in bytes.
    pub read_index: i64,

    /// How long the stream has rendered silence due to underrun (v13+).
    pub underrun_for: u64,

    /// How long the stream has rendered audio since the last underrun
    /// (v13+).
    pub playing_for: u64,
}

impl CommandReply for PlaybackLatency {}

impl TagStructRead for PlaybackLatency {
    fn read(ts: &mut TagStructReader<'_>, protocol_version: u16) -> Result<Self, ProtocolError> {
        Ok(Self {
            sink_usec: ts.read_usec()?,
            source_usec: ts.read_usec()?,
            playing: ts.read_bool()?,
            local_time: ts.read_timeval()?,
            remote_time: ts.read_timeval()?,
            write_index: ts.read_i64()?,
            read_index: ts.read_i64()?,
            underrun_for: if protocol_version >= 13 {
                ts.read_u64()?
            } else {
                0
            },
            playing_for: if protocol_version >= 13 {
                ts.read_u64()?
            } else {
                0
            },
        })
    }
}

impl TagStructWrite for PlaybackLatency {
    fn write(
        &self,
        w: &mut TagStructWriter<'_>,
        protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        w.write_usec(self.sink_usec)?;
        w.write_usec(self.source_usec)?;
        w.write_bool(self.playing)?;
        w.write_timeval(self.local_time)?;
        w.write_timeval(self.remote_time)?;
        w.write_i64(self.write_index)?;
        w.write_i64(self.read_index)?;

        if protocol_version >= 13 {
            w.write_u64(self.underrun_for)?;
            w.write_u64(self.playing_for)?;
        }

        Ok(())
    }
}

/// The server reply to [`super::Command::GetRecordLatency`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordLatency {
    /// For monitor streams, the latency of the monitored sink, in
    /// microseconds.
    pub monitor_usec: u64,

    /// The device-side latency, in microseconds.
    pub source_usec: u64,

    /// Whether the stream is actively capturing.
    pub running: bool,

    /// The client timestamp from the request.
    pub local_time: SystemTime,

    /// The server timestamp at reply time.
    pub remote_time: SystemTime,

    /// The stream's write position, in bytes.
    pub write_index: i64,

    /// The stream's read position, in bytes.
    pub read_index: i64,
}

impl CommandReply for RecordLatency {}

impl TagStructRead for RecordLatency {
    fn read(ts: &mut TagStructReader<'_>, _protocol_version: u16) -> Result<Self, ProtocolError> {
        Ok(Self {
            monitor_usec: ts.read_usec()?,
            source_usec: ts.read_usec()?,
            running: ts.read_bool()?,
            local_time: ts.read_timeval()?,
            remote_time: ts.read_timeval()?,
            write_index: ts.read_i64()?,
            read_index: ts.read_i64()?,
        })
    }
}

impl TagStructWrite for RecordLatency {
    fn write(
        &self,
        w: &mut TagStructWriter<'_>,
        _protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        w.write_usec(self.monitor_usec)?;
        w.write_usec(self.source_usec)?;
        w.write_bool(self.running)?;
        w.write_timeval(self.local_time)?;
        w.write_timeval(self.remote_time)?;
        w.write_i64(self.write_index)?;
        w.write_i64(self.read_index)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, UNIX_EPOCH};

    use crate::protocol::tagstruct::test_util::test_serde;

    use super::*;

    #[test]
    fn latency_serde() -> anyhow::Result<()> {
        let now = UNIX_EPOCH + Duration::new(1234, 567000);

        test_serde(&LatencyParams { channel: 1, now })?;

        test_serde(&PlaybackLatency {
            sink_usec: 40_000,
            source_usec: 0,
            playing: true,
            local_time: now,
            remote_time: now,
            write_index: 96000,
            read_index: 48000,
            underrun_for: 0,
            playing_for: 48000,
        })?;

        test_serde(&RecordLatency {
            monitor_usec: 0,
            source_usec: 20_000,
            running: true,
            local_time: now,
            remote_time: now,
            write_index: 4096,
            read_index: 1024,
        })
    }
}
