//! The message vocabulary between the main domain and the device I/O
//! domains.

use futures::channel::oneshot;

use crate::protocol::{BufferAttr, SeekMode};
use crate::server::memblock::MemChunk;

/// Messages posted from an I/O domain to the main loop.
///
/// Streams are addressed by `(connection, channel)`; the main loop drops
/// messages for streams that have since been unlinked.
#[derive(Debug)]
pub enum MainMessage {
    /// A playback stream wants more data from its client.
    RequestData { conn: u32, channel: u32 },

    /// A playback stream ran dry.
    Underflow { conn: u32, channel: u32, offset: i64 },

    /// A playback stream's queue overflowed and the excess was skipped.
    Overflow { conn: u32, channel: u32 },

    /// A playback stream produced its first audio after start or underrun.
    Started { conn: u32, channel: u32 },

    /// A drain completed; acknowledge `tag` to the client.
    DrainAck { conn: u32, channel: u32, tag: u32 },

    /// Captured audio for a record stream.
    RecordData {
        conn: u32,
        channel: u32,
        chunk: MemChunk,
    },

    /// A transient sample-cache playback finished; detach `index`.
    SampleDone { sink_index: u32, index: u32 },
}

/// Messages addressed to one playback stream's I/O half.
#[derive(Debug)]
pub enum StreamIoMessage {
    /// Audio arriving at the current write position.
    Post { chunk: MemChunk },

    /// A repositioned write, optionally carrying audio.
    Seek {
        offset: i64,
        mode: SeekMode,
        chunk: Option<MemChunk>,
    },

    /// Acknowledge `tag` once the queue has played out.
    Drain { tag: u32 },

    /// Throw queued audio away.
    Flush,

    /// Start playback even if the prebuffer has not filled.
    Trigger,

    /// Re-arm prebuffering.
    PrebufForce,

    /// Synchronous: snapshot the timing state.
    UpdateLatency {
        reply: oneshot::Sender<PlaybackTimingSnapshot>,
    },

    /// Synchronous: apply new buffer metrics; answers with the metrics as
    /// realised by the queue.
    UpdateBufferAttr {
        attr: BufferAttr,
        reply: oneshot::Sender<BufferAttr>,
    },

    /// Synchronous: cork or uncork.
    SetState {
        corked: bool,
        reply: oneshot::Sender<()>,
    },
}

/// Messages addressed to one record stream's I/O half.
#[derive(Debug)]
pub enum RecordIoMessage {
    /// Synchronous: snapshot the timing state.
    UpdateLatency {
        reply: oneshot::Sender<RecordTimingSnapshot>,
    },

    /// Synchronous: cork or uncork.
    SetState {
        corked: bool,
        reply: oneshot::Sender<()>,
    },
}

/// Timing state captured atomically while the playback I/O domain is
/// parked in a synchronous round-trip.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaybackTimingSnapshot {
    pub read_index: i64,
    pub write_index: i64,
    pub sink_latency_usec: u64,
    pub render_queue_len: usize,
    pub underrun_for: u64,
    pub playing_for: u64,
    pub is_playing: bool,
}

/// Timing state for a record stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordTimingSnapshot {
    pub source_latency_usec: u64,
    pub monitor_latency_usec: u64,
    pub on_the_fly: usize,
}

/// The group-wide queue operations that fan out across a sync group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupOp {
    /// Discard queued audio without write-credit accounting.
    Flush,
    /// Re-arm prebuffering.
    PrebufForce,
    /// Disable prebuffering so queued audio plays out.
    PrebufDisable,
}
