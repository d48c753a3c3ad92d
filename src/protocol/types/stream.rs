//! Stream-level negotiated types: buffer metrics, creation flags, seek modes.

use enum_primitive_derive::Primitive;

use super::super::tagstruct::{TagStructRead, TagStructReader, TagStructWrite, TagStructWriter};
use crate::protocol::ProtocolError;

/// How a write repositions the stream's write pointer. The numeric values
/// are part of the wire format (the low byte of a memblock frame's flags).
#[derive(Default, Debug, Copy, Clone, Eq, PartialEq, Primitive)]
pub enum SeekMode {
    /// Seek relative to the current write pointer.
    #[default]
    Relative = 0,
    /// Seek to an absolute position.
    Absolute = 1,
    /// Seek relative to the current read pointer.
    RelativeOnRead = 2,
    /// Seek relative to the end of the queued data.
    RelativeEnd = 3,
}

/// Per-stream buffer metrics.
///
/// Any field may be set to `u32::MAX` ("unspecified") to let the server pick
/// a value; the negotiated result is echoed back in the stream-creation
/// reply.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct BufferAttr {
    /// Hard cap on the per-stream buffer, in bytes.
    pub maxlength: u32,

    /// Playback only: the fill level the server tries to keep the buffer at.
    /// The server only requests more data while the buffer holds less than
    /// this many bytes.
    pub tlength: u32,

    /// Playback only: playback does not start before this many bytes are
    /// buffered, and stalls again when the buffer drains below it after an
    /// underrun. Zero disables prebuffering.
    pub prebuf: u32,

    /// Playback only: the server never asks for less than this many bytes in
    /// one request.
    pub minreq: u32,

    /// Record only: the granularity of deliveries to the client.
    pub fragsize: u32,
}

impl BufferAttr {
    /// The wire marker for "let the server decide".
    pub const UNSET: u32 = u32::MAX;
}

impl Default for BufferAttr {
    fn default() -> Self {
        Self {
            maxlength: Self::UNSET,
            tlength: Self::UNSET,
            prebuf: Self::UNSET,
            minreq: Self::UNSET,
            fragsize: Self::UNSET,
        }
    }
}

/// Stream creation flags, transmitted as individual booleans.
#[derive(Default, Debug, Clone, Copy, Eq, PartialEq)]
pub struct StreamFlags {
    /// Create the stream in the corked state.
    pub start_corked: bool,

    /// Map channels by index instead of by name. Implies `no_remix_channels`.
    pub no_remap_channels: bool,

    /// When remapping channels by name, never up- or downmix to related
    /// channels; copy matching channels 1:1.
    pub no_remix_channels: bool,

    /// Use the device's sample format and ignore the one in the request.
    pub fix_format: bool,

    /// Use the device's sample rate and ignore the one in the request.
    pub fix_rate: bool,

    /// Use the device's channel count and map, ignoring the requested ones.
    pub fix_channels: bool,

    /// Never move this stream to another device.
    pub no_move: bool,

    /// Allow changing the sample rate while the stream is live.
    pub variable_rate: bool,

    /// Record only: deliver peaks instead of resampled audio.
    pub peak_detect: bool,

    /// Create the stream muted or unmuted. `None` leaves the choice to the
    /// server.
    pub start_muted: Option<bool>,

    /// Adjust the device latency to the requested buffer metrics, instead of
    /// sizing only the per-stream buffer. Mutually exclusive with
    /// `early_requests`.
    pub adjust_latency: bool,

    /// Emulate a fragment-style playback model: issue data requests as soon
    /// as `minreq` bytes are missing, rather than as late as possible.
    /// Mutually exclusive with `adjust_latency`.
    pub early_requests: bool,

    /// Leave this stream out of the device auto-suspend decision.
    pub no_inhibit_auto_suspend: bool,

    /// Fail stream creation (or kill the stream) when the device is or
    /// becomes suspended.
    pub fail_on_suspend: bool,

    /// Interpret a creation-time volume as relative to the device volume.
    pub relative_volume: bool,

    /// Passthrough content; don't reformat or resample.
    pub passthrough: bool,
}

impl TagStructRead for SeekMode {
    fn read(ts: &mut TagStructReader<'_>, _protocol_version: u16) -> Result<Self, ProtocolError> {
        ts.read_enum()
    }
}

impl TagStructWrite for SeekMode {
    fn write(
        &self,
        w: &mut TagStructWriter<'_>,
        _protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        w.write_u32(*self as u32)
    }
}
