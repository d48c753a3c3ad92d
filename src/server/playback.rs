//! The playback stream engine: client pushes, the device pulls.
//!
//! The stream is split across the two domains. The main half holds the
//! negotiated metadata and talks to the client; the I/O half owns the
//! buffer queue and runs inside the sink's domain. They share exactly two
//! atomics: the outstanding request credit and the count of queued
//! seek/post messages, used to coalesce rewinds across bursts of writes.

use std::ffi::CString;
use std::sync::atomic::{AtomicI32, AtomicI64, Ordering};
use std::sync::Arc;

use crate::protocol::{
    BufferAttr, ChannelMap, ChannelVolume, FormatInfo, Props, SampleSpec, SeekMode,
};

use super::memblock::MemChunk;
use super::memblockq::{MemBlockQueue, Peek};
use super::mixer::{
    GroupOp, InputCtx, MainHandle, MainMessage, PlaybackTimingSnapshot, Sink, SinkInput,
    StreamIoMessage,
};

/// Queue cap and the default metrics used when a client leaves fields
/// unspecified.
pub const MAX_QUEUE_LENGTH: usize = 4 * 1024 * 1024;
const DEFAULT_TLENGTH_MSEC: u64 = 2000;
const DEFAULT_PROCESS_MSEC: u64 = 20;
const USEC_PER_MSEC: u64 = 1000;

/// State shared between the two halves of a playback stream.
#[derive(Debug, Default)]
pub struct PlaybackShared {
    /// Bytes of client credit accumulated by the I/O half and not yet
    /// turned into a `REQUEST` by the main half.
    pub missing: AtomicI64,

    /// Seek/post messages currently in flight towards the I/O half; only
    /// the last one of a burst acts on the coalesced write index.
    pub seek_or_post_in_queue: AtomicI32,
}

/// The main-domain half of a playback stream.
#[derive(Debug)]
pub struct PlaybackStream {
    /// Connection-scoped channel id.
    pub channel: u32,

    /// Server-wide sink-input index.
    pub sink_input_index: u32,

    /// The sink the stream is attached to.
    pub sink_index: u32,

    pub spec: SampleSpec,
    pub map: ChannelMap,
    pub format: FormatInfo,
    pub props: Props,

    pub volume: ChannelVolume,
    pub volume_set: bool,
    pub muted: bool,
    pub corked: bool,

    pub sync_id: u32,
    pub adjust_latency: bool,
    pub early_requests: bool,

    /// Buffer metrics as the client requested them.
    pub buffer_attr_req: BufferAttr,

    /// Buffer metrics as realised.
    pub buffer_attr: BufferAttr,

    /// The device latency configured for this stream, in microseconds.
    pub configured_sink_latency: u64,

    pub shared: Arc<PlaybackShared>,
}

impl PlaybackStream {
    /// The stream's display name, from its properties.
    pub fn media_name(&self) -> Option<CString> {
        self.props
            .get(crate::protocol::Prop::MediaName)
            .and_then(|bytes| CString::from_vec_with_nul(bytes.to_vec()).ok())
    }

    /// Drains the request-credit atomic; the caller turns a positive value
    /// into a `REQUEST` to the client.
    pub fn take_missing(&self) -> u32 {
        let missing = self.shared.missing.swap(0, Ordering::SeqCst);
        missing.clamp(0, u32::MAX as i64) as u32
    }
}

/// Resolves requested playback buffer metrics against the device.
///
/// Works in bytes and microseconds side by side: the metrics are clamped
/// and defaulted, the target device latency derived from the latency
/// policy, the device asked to realise it, and the metrics re-derived from
/// what the device actually configured.
pub fn resolve_buffer_attr(
    req: &BufferAttr,
    spec: &SampleSpec,
    adjust_latency: bool,
    early_requests: bool,
    sink: &mut Sink,
    sink_input_index: u32,
) -> (BufferAttr, u64) {
    let frame = spec.frame_size() as u32;
    let mut attr = *req;

    if attr.maxlength == BufferAttr::UNSET || attr.maxlength > MAX_QUEUE_LENGTH as u32 {
        attr.maxlength = MAX_QUEUE_LENGTH as u32;
    }
    if attr.maxlength == 0 {
        attr.maxlength = frame;
    }

    if attr.tlength == BufferAttr::UNSET {
        attr.tlength =
            spec.usec_to_bytes_round_up(DEFAULT_TLENGTH_MSEC * USEC_PER_MSEC) as u32;
    }
    if attr.tlength == 0 {
        attr.tlength = frame;
    }
    if attr.tlength > attr.maxlength {
        attr.tlength = attr.maxlength;
    }

    if attr.minreq == BufferAttr::UNSET {
        let process = spec.usec_to_bytes_round_up(DEFAULT_PROCESS_MSEC * USEC_PER_MSEC) as u32;
        // A quarter of the target keeps the default sane for low-latency
        // streams too.
        let quarter = (attr.tlength / 4) / frame * frame;
        attr.minreq = process.min(quarter);
    }
    if attr.minreq == 0 {
        attr.minreq = frame;
    }

    if attr.tlength < attr.minreq + frame {
        attr.tlength = attr.minreq + frame;
    }

    let orig_tlength_usec = spec.bytes_to_usec(attr.tlength as u64);
    let orig_minreq_usec = spec.bytes_to_usec(attr.minreq as u64);
    let mut tlength_usec = orig_tlength_usec;
    let minreq_usec = orig_minreq_usec;

    let sink_usec = if early_requests {
        // Emulate the classic fragment model: the device buffer is one
        // fragment, so it has to come back for data that often.
        minreq_usec
    } else if adjust_latency {
        // Half the overall latency in the device, half in our queue, with
        // 2*minreq of slack to survive a full device refill.
        tlength_usec.saturating_sub(minreq_usec * 2) / 2
    } else {
        tlength_usec.saturating_sub(minreq_usec * 2)
    };

    let configured = sink.set_requested_latency(sink_input_index, sink_usec);

    if early_requests {
        if configured != minreq_usec {
            log::debug!(
                "could not configure a sufficiently low latency, early requests may be late"
            );
        }
    } else if adjust_latency {
        tlength_usec = tlength_usec.saturating_sub(configured);
    }

    if tlength_usec < configured + 2 * minreq_usec {
        tlength_usec = configured + 2 * minreq_usec;
    }

    if spec.usec_to_bytes_round_up(orig_tlength_usec) != spec.usec_to_bytes_round_up(tlength_usec)
    {
        attr.tlength = spec.usec_to_bytes_round_up(tlength_usec) as u32;
    }

    if attr.minreq == 0 {
        attr.minreq = frame;
        attr.tlength += frame * 2;
    }

    if attr.tlength <= attr.minreq {
        attr.tlength = attr.minreq * 2 + frame;
    }

    let max_prebuf = attr.tlength + frame - attr.minreq;
    if attr.prebuf == BufferAttr::UNSET || attr.prebuf > max_prebuf {
        attr.prebuf = max_prebuf;
    }

    log::debug!(
        "negotiated playback metrics: maxlength={} tlength={} prebuf={} minreq={} latency={}us",
        attr.maxlength,
        attr.tlength,
        attr.prebuf,
        attr.minreq,
        configured,
    );

    (attr, configured)
}

/// The I/O-domain half of a playback stream. Lives inside the sink worker
/// and implements its pull interface.
pub struct PlaybackIo {
    conn: u32,
    channel: u32,

    q: MemBlockQueue,
    shared: Arc<PlaybackShared>,
    main: MainHandle,

    is_underrun: bool,
    drain_request: Option<u32>,

    // Coalesced earliest write index of an in-flight burst of writes.
    seek_windex: Option<i64>,
}

impl std::fmt::Debug for PlaybackIo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackIo")
            .field("conn", &self.conn)
            .field("channel", &self.channel)
            .field("is_underrun", &self.is_underrun)
            .finish()
    }
}

impl PlaybackIo {
    pub fn new(
        conn: u32,
        channel: u32,
        q: MemBlockQueue,
        shared: Arc<PlaybackShared>,
        main: MainHandle,
    ) -> Self {
        Self {
            conn,
            channel,
            q,
            shared,
            main,
            is_underrun: true,
            drain_request: None,
            seek_windex: None,
        }
    }

    /// Direct queue access, for moves and tests.
    pub fn queue_mut(&mut self) -> &mut MemBlockQueue {
        &mut self.q
    }

    fn post(&self, msg: MainMessage) {
        self.main.post(msg);
    }

    // Turns fresh queue credit into at most one pending REQUEST message.
    fn request_bytes(&mut self) {
        let m = self.q.pop_missing();
        if m == 0 {
            return;
        }

        if self.shared.missing.fetch_add(m as i64, Ordering::SeqCst) <= 0 {
            self.post(MainMessage::RequestData {
                conn: self.conn,
                channel: self.channel,
            });
        }
    }

    // Reacts to a (coalesced) change of the write index at `windex`.
    fn handle_seek(&mut self, ctx: &mut InputCtx, windex: i64) {
        if ctx.underrun_for > 0 {
            if self.q.is_readable() {
                // The underrun just ended; have the device rewind the
                // silence it rendered meanwhile and replay from us.
                log::debug!("requesting rewind due to end of underrun");
                let nbytes = if ctx.underrun_for == u64::MAX {
                    0
                } else {
                    ctx.underrun_for as usize
                };
                ctx.request_rewind(nbytes, true);
            }
        } else if windex < self.q.read_index() {
            // The client rewrote audio the device already consumed.
            log::debug!("requesting rewind due to rewrite");
            ctx.request_rewind((self.q.read_index() - windex) as usize, true);
        }

        self.request_bytes();
    }

    // Queue went unreadable at pop time. Returns true if the pop should
    // yield silence.
    fn handle_underrun(&mut self, want: usize, ctx: &mut InputCtx) -> bool {
        if self.q.is_readable() {
            return false;
        }

        if !self.is_underrun {
            log::debug!(
                "{} of playback stream {}:{}",
                if self.drain_request.is_some() {
                    "drain"
                } else {
                    "underrun"
                },
                self.conn,
                self.channel
            );
        }

        if let Some(tag) = self.drain_request.take() {
            self.post(MainMessage::DrainAck {
                conn: self.conn,
                channel: self.channel,
                tag,
            });
        } else if !self.is_underrun {
            self.post(MainMessage::Underflow {
                conn: self.conn,
                channel: self.channel,
                offset: self.q.read_index(),
            });
        }

        self.is_underrun = true;

        if ctx.underrun_for != u64::MAX {
            ctx.underrun_for += want as u64;
        }

        self.request_bytes();
        true
    }

    // A write (with or without data) arrived; coalesce the effective write
    // index so a burst triggers one rewind, not many.
    fn after_write(&mut self, ctx: &mut InputCtx, mut windex: i64) {
        if let Some(sw) = self.seek_windex {
            windex = windex.min(sw);
        }

        if self.shared.seek_or_post_in_queue.fetch_sub(1, Ordering::SeqCst) > 1 {
            self.seek_windex = Some(windex);
        } else {
            self.seek_windex = None;
            self.handle_seek(ctx, windex);
        }
    }

    fn push_chunk(&mut self, chunk: MemChunk) {
        if self.q.push(chunk.clone()).is_err() {
            log::warn!("failed to push data into playback queue");
            self.post(MainMessage::Overflow {
                conn: self.conn,
                channel: self.channel,
            });
            self.q.seek(chunk.length as i64, SeekMode::Relative, true);
        }
    }
}

impl SinkInput for PlaybackIo {
    fn pop(&mut self, ctx: &mut InputCtx, want: usize) -> Option<MemChunk> {
        if self.handle_underrun(want, ctx) {
            return None;
        }
        self.is_underrun = false;

        let chunk = match self.q.peek(want) {
            Peek::Data(chunk) => chunk,
            Peek::Silence(n) => self.q.silence(n),
            Peek::Empty => return None,
        };

        if ctx.underrun_for > 0 {
            self.post(MainMessage::Started {
                conn: self.conn,
                channel: self.channel,
            });
        }

        self.q.drop_bytes(chunk.length);

        ctx.underrun_for = 0;
        ctx.playing_for += chunk.length as u64;

        self.request_bytes();

        Some(chunk)
    }

    fn process_rewind(&mut self, ctx: &mut InputCtx, nbytes: usize) {
        // Nothing to replay while underrunning; the rewound span was
        // silence anyway.
        if ctx.underrun_for > 0 {
            return;
        }

        let rewound = self.q.rewind(nbytes);
        if rewound > 0 {
            ctx.playing_for = ctx.playing_for.saturating_sub(rewound as u64);
        }
    }

    fn update_max_rewind(&mut self, _ctx: &mut InputCtx, nbytes: usize) {
        self.q.set_maxrewind(nbytes);
    }

    fn handle(&mut self, ctx: &mut InputCtx, msg: StreamIoMessage) {
        match msg {
            StreamIoMessage::Post { chunk } => {
                let windex = self.q.write_index();
                self.push_chunk(chunk);
                self.after_write(ctx, windex.min(self.q.write_index()));
            }

            StreamIoMessage::Seek {
                offset,
                mode,
                chunk,
            } => {
                let mut windex = self.q.write_index();

                // Only relative seeks are accounted: the client cannot
                // track its own credit across absolute repositioning.
                self.q.seek(offset, mode, mode == SeekMode::Relative);

                if let Some(chunk) = chunk {
                    self.push_chunk(chunk);
                }

                windex = windex.min(self.q.write_index());
                self.after_write(ctx, windex);
            }

            StreamIoMessage::Drain { tag } => {
                let windex = self.q.write_index();
                self.q.prebuf_disable();
                self.handle_seek(ctx, windex);

                if !self.q.is_readable() {
                    self.post(MainMessage::DrainAck {
                        conn: self.conn,
                        channel: self.channel,
                        tag,
                    });
                } else {
                    self.drain_request = Some(tag);
                }
            }

            StreamIoMessage::Flush => {
                let windex = self.q.write_index();
                self.q.flush_write(false);
                self.handle_seek(ctx, windex);
            }

            StreamIoMessage::Trigger => {
                let windex = self.q.write_index();
                self.q.prebuf_disable();
                self.handle_seek(ctx, windex);
            }

            StreamIoMessage::PrebufForce => {
                let windex = self.q.write_index();
                self.q.prebuf_force();
                self.handle_seek(ctx, windex);
            }

            StreamIoMessage::UpdateLatency { reply } => {
                let _ = reply.send(PlaybackTimingSnapshot {
                    read_index: self.q.read_index(),
                    write_index: self.q.write_index(),
                    sink_latency_usec: ctx.sink_latency_usec,
                    render_queue_len: ctx.render_queue_len,
                    underrun_for: ctx.underrun_for,
                    playing_for: ctx.playing_for,
                    is_playing: !ctx.corked && !self.is_underrun,
                });
            }

            StreamIoMessage::UpdateBufferAttr { attr, reply } => {
                self.q.apply_attr(&attr);
                let _ = reply.send(self.q.attr());
            }

            StreamIoMessage::SetState { corked, reply } => {
                let windex = self.q.write_index();
                ctx.corked = corked;

                // Re-arm prebuffering across state changes so an uncork
                // with a near-empty queue doesn't stutter; never while a
                // drain is waiting, or the drain would stall forever.
                if self.drain_request.is_none() {
                    self.q.prebuf_force();
                }

                self.handle_seek(ctx, windex);
                let _ = reply.send(());
            }
        }
    }

    fn group_op(&mut self, ctx: &mut InputCtx, op: GroupOp) {
        let windex = self.q.write_index();

        match op {
            GroupOp::Flush => self.q.flush_write(false),
            GroupOp::PrebufForce => self.q.prebuf_force(),
            GroupOp::PrebufDisable => self.q.prebuf_disable(),
        }

        self.handle_seek(ctx, windex);
    }

    fn into_any(self: Box<Self>) -> Box<dyn std::any::Any + Send> {
        self
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use crate::protocol::SampleFormat;
    use crate::server::memblock::{MemPool, PoolBacking};
    use crate::server::memblockq::QueueParams;

    use super::*;

    fn spec() -> SampleSpec {
        SampleSpec {
            format: SampleFormat::S16Le,
            channels: 2,
            rate: 48000,
        }
    }

    fn test_ctx() -> InputCtx {
        // Tests drive the callbacks directly the way a sink worker would.
        let mut ctx = InputCtx::new(0, 0, false, spec());
        ctx.max_rewind = 65536;
        ctx.sink_latency_usec = 20_000;
        ctx
    }

    struct Harness {
        io: PlaybackIo,
        ctx: InputCtx,
        rx: mpsc::Receiver<MainMessage>,
        shared: Arc<PlaybackShared>,
    }

    fn harness(maxlength: usize, tlength: usize, prebuf: usize, minreq: usize) -> Harness {
        let pool = MemPool::new(PoolBacking::Private).unwrap();
        let q = MemBlockQueue::new(
            pool,
            QueueParams {
                spec: spec(),
                start_index: 0,
                maxlength,
                tlength,
                prebuf,
                minreq,
                maxrewind: 65536,
            },
        );

        let (tx, rx) = mpsc::channel();
        let poll = mio::Poll::new().unwrap();
        let waker = Arc::new(mio::Waker::new(poll.registry(), mio::Token(0)).unwrap());
        let shared = Arc::new(PlaybackShared::default());

        Harness {
            io: PlaybackIo::new(1, 0, q, shared.clone(), MainHandle::new(tx, waker)),
            ctx: test_ctx(),
            rx,
            shared,
        }
    }

    fn chunk(len: usize, fill: u8) -> MemChunk {
        let pool = MemPool::new(PoolBacking::Private).unwrap();
        MemChunk::from_block(pool.wrap(vec![fill; len], false))
    }

    fn post(h: &mut Harness, data: MemChunk) {
        h.shared
            .seek_or_post_in_queue
            .fetch_add(1, Ordering::SeqCst);
        h.io.handle(&mut h.ctx, StreamIoMessage::Post { chunk: data });
    }

    fn drain_messages(h: &Harness) -> Vec<MainMessage> {
        h.rx.try_iter().collect()
    }

    #[test]
    fn prebuffering_holds_pop_and_reports_started_once_filled() {
        let mut h = harness(65536, 8192, 4096, 1024);

        // Half the prebuffer: still silent, no events.
        post(&mut h, chunk(2048, 1));
        assert!(h.io.pop(&mut h.ctx, 1024).is_none());
        let msgs = drain_messages(&h);
        assert!(!msgs
            .iter()
            .any(|m| matches!(m, MainMessage::Started { .. })));
        assert!(!msgs
            .iter()
            .any(|m| matches!(m, MainMessage::Underflow { .. })));

        // The other half: playback starts.
        post(&mut h, chunk(2048, 2));
        let popped = h.io.pop(&mut h.ctx, 1024).expect("audio after prebuf");
        assert_eq!(popped.length, 1024);
        assert!(drain_messages(&h)
            .iter()
            .any(|m| matches!(m, MainMessage::Started { .. })));
        assert_eq!(h.ctx.underrun_for, 0);
    }

    #[test]
    fn underflow_fires_once_after_playing() {
        let mut h = harness(65536, 8192, 0, 1024);

        post(&mut h, chunk(1024, 1));
        assert!(h.io.pop(&mut h.ctx, 1024).is_some());

        // Dry queue: exactly one UNDERFLOW, at the current read index.
        assert!(h.io.pop(&mut h.ctx, 1024).is_none());
        assert!(h.io.pop(&mut h.ctx, 1024).is_none());

        let underflows: Vec<_> = drain_messages(&h)
            .into_iter()
            .filter(|m| matches!(m, MainMessage::Underflow { .. }))
            .collect();
        assert_eq!(underflows.len(), 1);
        match &underflows[0] {
            MainMessage::Underflow { offset, .. } => assert_eq!(*offset, 1024),
            _ => unreachable!(),
        }
    }

    #[test]
    fn request_credit_is_posted_once_per_accumulation() {
        let mut h = harness(65536, 8192, 0, 1024);

        h.io.request_bytes();
        let requests = drain_messages(&h)
            .iter()
            .filter(|m| matches!(m, MainMessage::RequestData { .. }))
            .count();
        assert_eq!(requests, 1);

        // More credit accumulates silently while the first message is
        // un-collected.
        h.io.request_bytes();
        assert_eq!(h.shared.missing.load(Ordering::SeqCst), 8192);
        let requests = drain_messages(&h)
            .iter()
            .filter(|m| matches!(m, MainMessage::RequestData { .. }))
            .count();
        assert_eq!(requests, 0);
    }

    #[test]
    fn late_write_requests_rewind() {
        let mut h = harness(65536, 8192, 0, 1024);

        post(&mut h, chunk(4096, 1));
        assert!(h.io.pop(&mut h.ctx, 2048).is_some());

        // Rewrite 1024 bytes before the read index.
        h.shared
            .seek_or_post_in_queue
            .fetch_add(1, Ordering::SeqCst);
        h.io.handle(
            &mut h.ctx,
            StreamIoMessage::Seek {
                offset: 1024,
                mode: SeekMode::Absolute,
                chunk: Some(chunk(2048, 2)),
            },
        );

        let (nbytes, rewrite) = h.ctx.pending_rewind().expect("rewind requested");
        assert!(rewrite);
        assert!(nbytes >= 1024);
    }

    #[test]
    fn burst_of_writes_coalesces_seek_handling() {
        let mut h = harness(65536, 8192, 0, 1024);

        // Three writes queued before the worker runs: only the last one
        // may act, on the smallest write index of the burst.
        h.shared.seek_or_post_in_queue.store(3, Ordering::SeqCst);

        h.io.handle(&mut h.ctx, StreamIoMessage::Post { chunk: chunk(1024, 1) });
        assert!(h.io.seek_windex.is_some());

        h.io.handle(&mut h.ctx, StreamIoMessage::Post { chunk: chunk(1024, 2) });
        assert!(h.io.seek_windex.is_some());

        h.io.handle(&mut h.ctx, StreamIoMessage::Post { chunk: chunk(1024, 3) });
        assert!(h.io.seek_windex.is_none());
        assert_eq!(h.shared.seek_or_post_in_queue.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn drain_acks_when_queue_empties() {
        let mut h = harness(65536, 8192, 4096, 1024);

        post(&mut h, chunk(1024, 1));
        h.io.handle(&mut h.ctx, StreamIoMessage::Drain { tag: 77 });

        // Queued audio still readable: no ack yet.
        assert!(!drain_messages(&h)
            .iter()
            .any(|m| matches!(m, MainMessage::DrainAck { .. })));

        // Prebuffering was disabled by the drain, so the audio plays out.
        assert!(h.io.pop(&mut h.ctx, 1024).is_some());
        assert!(h.io.pop(&mut h.ctx, 1024).is_none());

        let acks: Vec<_> = drain_messages(&h)
            .into_iter()
            .filter(|m| matches!(m, MainMessage::DrainAck { tag: 77, .. }))
            .collect();
        assert_eq!(acks.len(), 1);
    }

    #[test]
    fn overflow_reports_and_skips_forward() {
        let mut h = harness(4096, 4096, 0, 1024);

        post(&mut h, chunk(4096, 1));
        post(&mut h, chunk(1024, 2));

        assert!(drain_messages(&h)
            .iter()
            .any(|m| matches!(m, MainMessage::Overflow { .. })));

        // The write index skipped past the rejected write.
        assert_eq!(h.io.q.write_index(), 5120);
    }

    #[test]
    fn resolve_attr_fills_unset_fields() {
        let mut sink = Sink::new(crate::server::mixer::SinkConfig::null(0, "test"));

        let (attr, latency) = resolve_buffer_attr(
            &BufferAttr::default(),
            &spec(),
            false,
            false,
            &mut sink,
            0,
        );

        let frame = spec().frame_size() as u32;
        assert_eq!(attr.maxlength, MAX_QUEUE_LENGTH as u32);
        assert!(attr.tlength >= attr.minreq + frame);
        assert!(attr.minreq >= frame);
        assert!(attr.prebuf <= attr.tlength + frame - attr.minreq);
        assert!(latency > 0);
    }

    #[test]
    fn resolve_attr_adjust_latency_splits_target() {
        let mut sink = Sink::new(crate::server::mixer::SinkConfig::null(0, "test"));

        let req = BufferAttr {
            maxlength: BufferAttr::UNSET,
            tlength: spec().usec_to_bytes(200_000) as u32,
            prebuf: BufferAttr::UNSET,
            minreq: spec().usec_to_bytes(10_000) as u32,
            fragsize: BufferAttr::UNSET,
        };

        let (attr, latency) = resolve_buffer_attr(&req, &spec(), true, false, &mut sink, 0);

        // Half the overall latency lands in the device.
        assert_eq!(latency, 90_000);
        assert!(attr.tlength > 0);
    }
}
