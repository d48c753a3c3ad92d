//! The record stream engine: the device pushes, the client is fed in
//! round-robin fragments.
//!
//! Unlike playback, the buffer queue of a record stream lives in the main
//! domain: the I/O half only counts what is in flight and forwards the
//! captured chunks. The connection drains the queues of all its record
//! streams one fragment at a time, rotating between them, paced by the
//! packet stream running dry.

use std::ffi::CString;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::protocol::{
    BufferAttr, ChannelMap, ChannelVolume, FormatInfo, Props, SampleSpec,
};

use super::memblock::MemChunk;
use super::memblockq::MemBlockQueue;
use super::mixer::{
    MainHandle, MainMessage, OutputCtx, RecordIoMessage, RecordTimingSnapshot, Source,
    SourceOutput,
};

const DEFAULT_FRAGSIZE_MSEC: u64 = 2000;
const USEC_PER_MSEC: u64 = 1000;

/// State shared between the two halves of a record stream.
#[derive(Debug, Default)]
pub struct RecordShared {
    /// Bytes posted by the I/O half and not yet pushed into the queue.
    pub on_the_fly: AtomicUsize,
}

/// The main-domain half of a record stream, including its buffer queue.
#[derive(Debug)]
pub struct RecordStream {
    /// Connection-scoped channel id.
    pub channel: u32,

    /// Server-wide source-output index.
    pub source_output_index: u32,

    /// The source the stream is attached to.
    pub source_index: u32,

    pub spec: SampleSpec,
    pub map: ChannelMap,
    pub format: FormatInfo,
    pub props: Props,

    pub volume: ChannelVolume,
    pub volume_set: bool,
    pub muted: bool,
    pub corked: bool,

    pub adjust_latency: bool,
    pub early_requests: bool,

    /// Buffer metrics as the client requested them.
    pub buffer_attr_req: BufferAttr,

    /// Buffer metrics as realised.
    pub buffer_attr: BufferAttr,

    /// The device latency configured for this stream, in microseconds.
    pub configured_source_latency: u64,

    /// The delivery queue towards the client.
    pub q: MemBlockQueue,

    pub shared: Arc<RecordShared>,
}

impl RecordStream {
    /// The stream's display name, from its properties.
    pub fn media_name(&self) -> Option<CString> {
        self.props
            .get(crate::protocol::Prop::MediaName)
            .and_then(|bytes| CString::from_vec_with_nul(bytes.to_vec()).ok())
    }

    /// Captured audio arrived from the I/O domain. A full queue silently
    /// drops; record clients that fall behind lose the oldest gap, not the
    /// connection.
    pub fn post_data(&mut self, chunk: MemChunk) {
        let _ = self
            .shared
            .on_the_fly
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
                Some(v.saturating_sub(chunk.length))
            });

        if self.q.push(chunk).is_err() {
            log::debug!("record stream {} overran its queue", self.channel);
        }
    }

    /// The next fragment to deliver, if any: at most `fragsize` bytes off
    /// the front of the queue.
    pub fn pop_fragment(&mut self) -> Option<MemChunk> {
        let fragsize = (self.buffer_attr.fragsize as usize).max(self.q.base());

        match self.q.peek(fragsize) {
            super::memblockq::Peek::Data(chunk) => {
                self.q.drop_bytes(chunk.length);
                Some(chunk)
            }
            super::memblockq::Peek::Silence(n) => {
                let chunk = self.q.silence(n);
                self.q.drop_bytes(n);
                Some(chunk)
            }
            super::memblockq::Peek::Empty => None,
        }
    }
}

/// Resolves requested record buffer metrics against the device.
///
/// The mirror of the playback resolution: only `maxlength` and `fragsize`
/// participate, and both latency policies configure the device to the
/// fragment interval.
pub fn resolve_buffer_attr(
    req: &BufferAttr,
    spec: &SampleSpec,
    adjust_latency: bool,
    early_requests: bool,
    source: &mut Source,
    source_output_index: u32,
) -> (BufferAttr, u64) {
    let frame = spec.frame_size() as u32;
    let mut attr = *req;

    if attr.maxlength == BufferAttr::UNSET
        || attr.maxlength > super::playback::MAX_QUEUE_LENGTH as u32
    {
        attr.maxlength = super::playback::MAX_QUEUE_LENGTH as u32;
    }
    if attr.maxlength == 0 {
        attr.maxlength = frame;
    }

    if attr.fragsize == BufferAttr::UNSET {
        attr.fragsize =
            spec.usec_to_bytes_round_up(DEFAULT_FRAGSIZE_MSEC * USEC_PER_MSEC) as u32;
    }
    if attr.fragsize == 0 {
        attr.fragsize = frame;
    }

    let orig_fragsize_usec = spec.bytes_to_usec(attr.fragsize as u64);
    let mut fragsize_usec = orig_fragsize_usec;

    // In both early-request and adjust-latency modes the fragment interval
    // is the closest thing we have to a device wakeup period.
    let configured = if early_requests || adjust_latency {
        source.set_requested_latency(source_output_index, fragsize_usec)
    } else {
        0
    };

    if early_requests {
        if fragsize_usec != configured {
            log::debug!(
                "could not configure a sufficiently low latency, early requests may be late"
            );
        }
    } else if adjust_latency {
        fragsize_usec = configured;
    }

    if spec.usec_to_bytes(orig_fragsize_usec) != spec.usec_to_bytes(fragsize_usec) {
        attr.fragsize = spec.usec_to_bytes(fragsize_usec) as u32;
    }

    if attr.fragsize == 0 {
        attr.fragsize = frame;
    }

    attr.fragsize = attr.fragsize / frame * frame;
    if attr.fragsize == 0 {
        attr.fragsize = frame;
    }
    if attr.fragsize > attr.maxlength {
        attr.fragsize = attr.maxlength;
    }

    log::debug!(
        "negotiated record metrics: maxlength={} fragsize={} latency={}us",
        attr.maxlength,
        attr.fragsize,
        configured,
    );

    (attr, configured)
}

/// The I/O-domain half of a record stream. Lives inside the source worker.
pub struct RecordIo {
    conn: u32,
    channel: u32,
    shared: Arc<RecordShared>,
    main: MainHandle,
}

impl std::fmt::Debug for RecordIo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordIo")
            .field("conn", &self.conn)
            .field("channel", &self.channel)
            .finish()
    }
}

impl RecordIo {
    pub fn new(conn: u32, channel: u32, shared: Arc<RecordShared>, main: MainHandle) -> Self {
        Self {
            conn,
            channel,
            shared,
            main,
        }
    }
}

impl SourceOutput for RecordIo {
    fn push(&mut self, _ctx: &mut OutputCtx, chunk: &MemChunk) {
        self.shared
            .on_the_fly
            .fetch_add(chunk.length, Ordering::SeqCst);

        self.main.post(MainMessage::RecordData {
            conn: self.conn,
            channel: self.channel,
            chunk: chunk.clone(),
        });
    }

    fn handle(&mut self, ctx: &mut OutputCtx, msg: RecordIoMessage) {
        match msg {
            RecordIoMessage::UpdateLatency { reply } => {
                let _ = reply.send(RecordTimingSnapshot {
                    source_latency_usec: ctx.source_latency_usec,
                    monitor_latency_usec: ctx.monitor_latency_usec,
                    on_the_fly: self.shared.on_the_fly.load(Ordering::SeqCst),
                });
            }
            RecordIoMessage::SetState { corked, reply } => {
                ctx.corked = corked;
                let _ = reply.send(());
            }
        }
    }

    fn into_any(self: Box<Self>) -> Box<dyn std::any::Any + Send> {
        self
    }
}

#[cfg(test)]
mod tests {
    use crate::protocol::SampleFormat;
    use crate::server::memblock::{MemPool, PoolBacking};
    use crate::server::memblockq::QueueParams;
    use crate::server::mixer::SourceConfig;

    use super::*;

    fn spec() -> SampleSpec {
        SampleSpec {
            format: SampleFormat::S16Le,
            channels: 2,
            rate: 48000,
        }
    }

    fn stream(maxlength: usize, fragsize: u32) -> RecordStream {
        let pool = MemPool::new(PoolBacking::Private).unwrap();
        let q = MemBlockQueue::new(
            pool,
            QueueParams {
                spec: spec(),
                start_index: 0,
                maxlength,
                tlength: 0,
                prebuf: 0,
                minreq: 0,
                maxrewind: 0,
            },
        );

        RecordStream {
            channel: 0,
            source_output_index: 0,
            source_index: 0,
            spec: spec(),
            map: ChannelMap::stereo(),
            format: FormatInfo::default(),
            props: Props::new(),
            volume: ChannelVolume::norm(2),
            volume_set: false,
            muted: false,
            corked: false,
            adjust_latency: false,
            early_requests: false,
            buffer_attr_req: BufferAttr::default(),
            buffer_attr: BufferAttr {
                maxlength: maxlength as u32,
                fragsize,
                ..Default::default()
            },
            configured_source_latency: 0,
            q,
            shared: Arc::new(RecordShared::default()),
        }
    }

    fn chunk(len: usize, fill: u8) -> MemChunk {
        let pool = MemPool::new(PoolBacking::Private).unwrap();
        MemChunk::from_block(pool.wrap(vec![fill; len], false))
    }

    #[test]
    fn fragments_are_capped_to_fragsize() {
        let mut s = stream(65536, 1024);

        s.shared.on_the_fly.fetch_add(4096, Ordering::SeqCst);
        s.post_data(chunk(4096, 1));
        assert_eq!(s.shared.on_the_fly.load(Ordering::SeqCst), 0);

        for _ in 0..4 {
            let frag = s.pop_fragment().expect("queued audio");
            assert_eq!(frag.length, 1024);
        }
        assert!(s.pop_fragment().is_none());
    }

    #[test]
    fn overrun_drops_silently() {
        let mut s = stream(2048, 1024);

        s.post_data(chunk(2048, 1));
        s.post_data(chunk(1024, 2));

        // The second chunk vanished; the first is intact.
        let mut total = 0;
        while let Some(frag) = s.pop_fragment() {
            assert_eq!(frag.bytes()[0], 1);
            total += frag.length;
        }
        assert_eq!(total, 2048);
    }

    #[test]
    fn resolve_attr_defaults_fragsize() {
        let mut source = Source::new(SourceConfig::null(0, "test"));

        let (attr, _) = resolve_buffer_attr(
            &BufferAttr::default(),
            &spec(),
            false,
            false,
            &mut source,
            0,
        );

        // Two seconds at 48kHz stereo S16.
        assert_eq!(attr.fragsize, 384_000);
        assert_eq!(attr.fragsize % spec().frame_size() as u32, 0);
    }

    #[test]
    fn resolve_attr_adjust_latency_follows_device() {
        let mut source = Source::new(SourceConfig::null(0, "test"));

        let req = BufferAttr {
            fragsize: spec().usec_to_bytes(10_000) as u32,
            ..Default::default()
        };

        let (attr, latency) = resolve_buffer_attr(&req, &spec(), true, false, &mut source, 0);

        assert_eq!(latency, 10_000);
        assert_eq!(attr.fragsize, spec().usec_to_bytes(10_000) as u32);
    }
}
