//! A rewindable, seekable byte queue over [`MemChunk`]s.
//!
//! The queue tracks two monotonically increasing 64-bit byte counters, the
//! read index `r` and write index `w`. Data segments hang off arbitrary
//! positions of that timeline; gaps play back as silence. Reads may be
//! rewound by up to `maxrewind` bytes, and writes may seek, so neither index
//! is tied to what has physically been pushed.

use std::collections::VecDeque;

use crate::protocol::{BufferAttr, SampleSpec, SeekMode};

use super::memblock::{MemChunk, MemPool};

/// Pushing would grow the queue beyond `maxlength`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Overflow;

/// What the read side finds at the current read index.
#[derive(Debug, Clone)]
pub enum Peek {
    /// Audio data at the read index.
    Data(MemChunk),
    /// A gap or prebuffering; render this many bytes of silence.
    Silence(usize),
    /// The queue is drained and prebuffering is off.
    Empty,
}

#[derive(Debug)]
struct Segment {
    index: i64,
    chunk: MemChunk,
}

impl Segment {
    fn end(&self) -> i64 {
        self.index + self.chunk.length as i64
    }
}

/// Construction parameters for a [`MemBlockQueue`].
#[derive(Debug, Clone)]
pub struct QueueParams {
    pub spec: SampleSpec,
    pub start_index: i64,
    pub maxlength: usize,
    pub tlength: usize,
    pub prebuf: usize,
    pub minreq: usize,
    pub maxrewind: usize,
}

/// The per-stream buffer queue described in the module docs.
#[derive(Debug)]
pub struct MemBlockQueue {
    read_index: i64,
    write_index: i64,

    base: usize,
    maxlength: usize,
    tlength: usize,
    prebuf: usize,
    minreq: usize,
    maxrewind: usize,

    in_prebuf: bool,

    // Flow-control accounting: `missing` is what we should ask the writer
    // for, `requested` what we have asked for and not yet received.
    missing: i64,
    requested: i64,

    segments: VecDeque<Segment>,

    spec: SampleSpec,
    pool: MemPool,
}

impl MemBlockQueue {
    pub fn new(pool: MemPool, params: QueueParams) -> Self {
        let base = params.spec.frame_size().max(1);

        let mut q = Self {
            read_index: params.start_index,
            write_index: params.start_index,
            base,
            maxlength: 0,
            tlength: 0,
            prebuf: 0,
            minreq: base,
            maxrewind: 0,
            in_prebuf: true,
            missing: 0,
            requested: 0,
            segments: VecDeque::new(),
            spec: params.spec,
            pool,
        };

        q.set_maxlength(params.maxlength);
        q.set_tlength(params.tlength);
        q.set_minreq(params.minreq);
        q.set_prebuf(params.prebuf);
        q.set_maxrewind(params.maxrewind);
        q.in_prebuf = q.prebuf > 0;

        q
    }

    pub fn read_index(&self) -> i64 {
        self.read_index
    }

    pub fn write_index(&self) -> i64 {
        self.write_index
    }

    /// Bytes between the read and write indices, clamped at zero.
    pub fn len(&self) -> usize {
        (self.write_index - self.read_index).max(0) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn base(&self) -> usize {
        self.base
    }

    pub fn prebuf(&self) -> usize {
        self.prebuf
    }

    pub fn minreq(&self) -> usize {
        self.minreq
    }

    pub fn tlength(&self) -> usize {
        self.tlength
    }

    pub fn maxrewind(&self) -> usize {
        self.maxrewind
    }

    fn read_index_changed(&mut self, old: i64) {
        self.missing += self.read_index - old;
    }

    fn write_index_changed(&mut self, old: i64, account: bool) {
        let delta = self.write_index - old;

        if account {
            self.requested -= delta;
            if self.requested < 0 {
                // The writer sent more than we asked for; shrink what we
                // still want by the excess.
                self.missing += self.requested;
                self.requested = 0;
            }
        } else {
            self.missing -= delta;
        }
    }

    /// Whether the queue is held back waiting for the prebuffer to fill.
    pub fn prebuf_active(&self) -> bool {
        if self.in_prebuf {
            self.len() < self.prebuf
        } else {
            self.prebuf > 0 && self.read_index >= self.write_index
        }
    }

    // Re-evaluates the prebuffer state, latching transitions in both
    // directions. Returns whether reads are currently held back.
    fn update_prebuf(&mut self) -> bool {
        if self.in_prebuf {
            if self.len() < self.prebuf {
                return true;
            }
            self.in_prebuf = false;
            false
        } else {
            if self.prebuf > 0 && self.read_index >= self.write_index {
                self.in_prebuf = true;
                return true;
            }
            false
        }
    }

    /// Whether a read would produce audio right now.
    pub fn is_readable(&self) -> bool {
        !self.prebuf_active() && self.len() > 0
    }

    /// Appends frame-aligned audio at the write index.
    ///
    /// Data previously queued beyond the write index (after a backward
    /// seek) is overwritten.
    pub fn push(&mut self, chunk: MemChunk) -> Result<(), Overflow> {
        debug_assert_eq!(chunk.length % self.base, 0);
        debug_assert_eq!(chunk.index % self.base, 0);

        if self.write_index + chunk.length as i64 - self.read_index > self.maxlength as i64 {
            return Err(Overflow);
        }

        let start = self.write_index;
        let end = start + chunk.length as i64;

        // Carve the overlap with already-queued segments out of the list,
        // keeping the head and tail pieces of anything we write into.
        let mut pieces: Vec<Segment> = Vec::with_capacity(self.segments.len() + 1);
        for seg in self.segments.drain(..) {
            if seg.end() <= start || seg.index >= end {
                pieces.push(seg);
                continue;
            }

            if seg.index < start {
                let keep = (start - seg.index) as usize;
                pieces.push(Segment {
                    index: seg.index,
                    chunk: seg.chunk.truncated(keep),
                });
            }

            if seg.end() > end {
                let cut = (end - seg.index) as usize;
                pieces.push(Segment {
                    index: end,
                    chunk: seg.chunk.advanced(cut),
                });
            }
        }

        pieces.push(Segment {
            index: start,
            chunk,
        });
        pieces.sort_by_key(|s| s.index);
        self.segments = pieces.into();

        let old = self.write_index;
        self.write_index = end;
        self.write_index_changed(old, true);

        Ok(())
    }

    /// Returns what the read index currently points at, without advancing.
    /// Data chunks and silence runs are capped to `want` bytes.
    pub fn peek(&mut self, want: usize) -> Peek {
        if self.update_prebuf() {
            return Peek::Silence(want);
        }

        if self.len() == 0 {
            return Peek::Empty;
        }

        for seg in &self.segments {
            if seg.end() <= self.read_index {
                continue;
            }

            if seg.index > self.read_index {
                // A hole the writer seeked over; it plays as silence.
                let hole = (seg.index - self.read_index) as usize;
                return Peek::Silence(hole.min(want));
            }

            let offset = (self.read_index - seg.index) as usize;
            let available = seg.chunk.length - offset;
            return Peek::Data(seg.chunk.advanced(offset).truncated(available.min(want)));
        }

        // Write index ahead of every segment; the tail is silence.
        Peek::Silence(self.len().min(want))
    }

    /// Advances the read index by `n` bytes.
    pub fn drop_bytes(&mut self, n: usize) {
        debug_assert_eq!(n % self.base, 0);

        let old = self.read_index;
        self.read_index += n as i64;
        self.read_index_changed(old);

        self.gc();
    }

    /// Moves the read index back by up to `min(n, maxrewind)` bytes and
    /// returns the actual rewind. Data older than `maxrewind` is gone and
    /// replays as silence.
    pub fn rewind(&mut self, n: usize) -> usize {
        debug_assert_eq!(n % self.base, 0);

        let actual = n.min(self.maxrewind);

        let old = self.read_index;
        self.read_index -= actual as i64;
        self.read_index_changed(old);

        actual
    }

    /// Repositions the write index. With `account`, the move is charged
    /// against previously granted write credit.
    pub fn seek(&mut self, offset: i64, mode: SeekMode, account: bool) {
        let old = self.write_index;

        self.write_index = match mode {
            SeekMode::Relative => self.write_index + offset,
            SeekMode::Absolute => offset,
            SeekMode::RelativeOnRead => self.read_index + offset,
            SeekMode::RelativeEnd => {
                let end = self
                    .segments
                    .back()
                    .map(Segment::end)
                    .unwrap_or(self.read_index);
                end + offset
            }
        };

        self.write_index_changed(old, account);
        self.gc();
    }

    /// Returns how many bytes the writer should be asked for, remembering
    /// the answer so repeated calls do not double-count until data arrives
    /// or the indices move.
    pub fn pop_missing(&mut self) -> usize {
        if self.missing <= 0 {
            return 0;
        }

        if (self.missing as usize) < self.minreq && !self.prebuf_active() {
            return 0;
        }

        let m = self.missing;
        self.requested += m;
        self.missing = 0;

        m as usize
    }

    /// Discards everything queued ahead of the read index.
    pub fn flush_write(&mut self, account: bool) {
        self.segments.clear();

        let old = self.write_index;
        self.write_index = self.read_index;
        self.write_index_changed(old, account);
    }

    /// Skips the read index ahead over everything queued.
    pub fn flush_read(&mut self) {
        self.segments.clear();

        let old = self.read_index;
        self.read_index = self.write_index;
        self.read_index_changed(old);
    }

    /// Re-arms prebuffering, so that reads stall until the buffer fills
    /// up to `prebuf` again.
    pub fn prebuf_force(&mut self) {
        if self.prebuf > 0 {
            self.in_prebuf = true;
        }
    }

    /// Disarms prebuffering; queued audio plays out unconditionally.
    pub fn prebuf_disable(&mut self) {
        self.in_prebuf = false;
    }

    pub fn set_maxlength(&mut self, maxlength: usize) {
        self.maxlength = (maxlength / self.base).max(1) * self.base;

        if self.tlength > self.maxlength {
            self.set_tlength(self.maxlength);
        }
    }

    pub fn set_tlength(&mut self, tlength: usize) {
        let tlength = if tlength == 0 {
            self.maxlength
        } else {
            tlength.min(self.maxlength)
        };
        let old = self.tlength;
        self.tlength = (tlength / self.base).max(1) * self.base;

        // The request window tracks the target length.
        self.missing += self.tlength as i64 - old as i64;

        if self.minreq > self.tlength {
            self.set_minreq(self.tlength);
        }
    }

    pub fn set_minreq(&mut self, minreq: usize) {
        self.minreq = ((minreq / self.base) * self.base)
            .clamp(self.base, self.tlength.max(self.base));
    }

    pub fn set_prebuf(&mut self, prebuf: usize) {
        let cap = self.tlength + self.base - self.minreq;
        self.prebuf = prebuf.div_ceil(self.base) * self.base;

        if self.prebuf > cap {
            self.prebuf = cap / self.base * self.base;
        }

        if self.prebuf == 0 {
            self.in_prebuf = false;
        }
    }

    pub fn set_maxrewind(&mut self, maxrewind: usize) {
        self.maxrewind = maxrewind / self.base * self.base;
        self.gc();
    }

    /// Applies negotiated buffer metrics wholesale.
    pub fn apply_attr(&mut self, attr: &BufferAttr) {
        self.set_maxlength(attr.maxlength as usize);
        self.set_tlength(attr.tlength as usize);
        self.set_minreq(attr.minreq as usize);
        self.set_prebuf(attr.prebuf as usize);
    }

    /// Reads the current metrics back out.
    pub fn attr(&self) -> BufferAttr {
        BufferAttr {
            maxlength: self.maxlength as u32,
            tlength: self.tlength as u32,
            prebuf: self.prebuf as u32,
            minreq: self.minreq as u32,
            fragsize: 0,
        }
    }

    /// A silence chunk of `len` bytes matching the queue's sample spec.
    pub fn silence(&self, len: usize) -> MemChunk {
        MemChunk::from_block(self.pool.silence(len, &self.spec))
    }

    // Frees segments that have fallen out of the rewind window.
    fn gc(&mut self) {
        let horizon = self.read_index - self.maxrewind as i64;
        while let Some(seg) = self.segments.front() {
            if seg.end() <= horizon {
                self.segments.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::protocol::SampleFormat;
    use crate::server::memblock::PoolBacking;

    use super::*;

    fn spec() -> SampleSpec {
        SampleSpec {
            format: SampleFormat::S16Le,
            channels: 2,
            rate: 48000,
        }
    }

    fn queue(maxlength: usize, tlength: usize, prebuf: usize, minreq: usize) -> MemBlockQueue {
        let pool = MemPool::new(PoolBacking::Private).unwrap();
        MemBlockQueue::new(
            pool,
            QueueParams {
                spec: spec(),
                start_index: 0,
                maxlength,
                tlength,
                prebuf,
                minreq,
                maxrewind: 1024,
            },
        )
    }

    fn data(len: usize, fill: u8) -> MemChunk {
        let pool = MemPool::new(PoolBacking::Private).unwrap();
        MemChunk::from_block(pool.wrap(vec![fill; len], false))
    }

    #[test]
    fn push_peek_drop() {
        let mut q = queue(4096, 2048, 0, 4);

        q.push(data(64, 1)).unwrap();
        assert_eq!(q.len(), 64);

        match q.peek(64) {
            Peek::Data(chunk) => assert_eq!(chunk.bytes(), &[1; 64][..]),
            other => panic!("expected data, got {:?}", other),
        }

        q.drop_bytes(64);
        assert_eq!(q.len(), 0);
        assert!(matches!(q.peek(64), Peek::Empty));
        assert_eq!(q.read_index() % q.base() as i64, 0);
    }

    #[test]
    fn overflow_is_reported() {
        let mut q = queue(128, 128, 0, 4);

        q.push(data(128, 1)).unwrap();
        assert_eq!(q.push(data(4, 2)), Err(Overflow));

        // The failed push must not move the write index.
        assert_eq!(q.write_index(), 128);
    }

    #[test]
    fn prebuf_holds_back_reads() {
        let mut q = queue(4096, 2048, 128, 4);

        q.push(data(64, 1)).unwrap();
        assert!(!q.is_readable());
        assert!(matches!(q.peek(64), Peek::Silence(64)));

        q.push(data(64, 2)).unwrap();
        assert!(q.is_readable());
        assert!(matches!(q.peek(64), Peek::Data(_)));

        // Draining completely re-arms the prebuffer.
        q.drop_bytes(128);
        assert!(!q.is_readable());
        assert!(q.prebuf_active());
    }

    #[test]
    fn prebuf_disable_allows_partial_reads() {
        let mut q = queue(4096, 2048, 128, 4);

        q.push(data(64, 1)).unwrap();
        q.prebuf_disable();
        assert!(q.is_readable());

        q.drop_bytes(64);
        assert!(matches!(q.peek(64), Peek::Empty));
    }

    #[test]
    fn rewind_then_drop_is_identity() {
        let mut q = queue(4096, 2048, 0, 4);

        q.push(data(256, 1)).unwrap();
        q.drop_bytes(128);

        let r = q.read_index();
        assert_eq!(q.rewind(64), 64);
        assert_eq!(q.read_index(), r - 64);

        match q.peek(64) {
            Peek::Data(chunk) => assert_eq!(chunk.length, 64),
            other => panic!("expected data, got {:?}", other),
        }

        q.drop_bytes(64);
        assert_eq!(q.read_index(), r);
    }

    #[test]
    fn consecutive_rewinds_are_capped() {
        let pool = MemPool::new(PoolBacking::Private).unwrap();
        let mut q = MemBlockQueue::new(
            pool,
            QueueParams {
                spec: spec(),
                start_index: 0,
                maxlength: 4096,
                tlength: 2048,
                prebuf: 0,
                minreq: 4,
                maxrewind: 64,
            },
        );

        q.push(data(256, 1)).unwrap();
        q.drop_bytes(256);

        // Two rewinds never exceed the rewind window combined.
        assert_eq!(q.rewind(48), 48);
        assert_eq!(q.rewind(48), 48);
        assert!(q.read_index() >= 256 - 64);
    }

    #[test]
    fn seek_forward_leaves_a_silent_hole() {
        let mut q = queue(4096, 2048, 0, 4);

        q.push(data(64, 1)).unwrap();
        q.seek(64, SeekMode::Relative, false);
        q.push(data(64, 2)).unwrap();

        q.drop_bytes(64);
        match q.peek(4096) {
            Peek::Silence(n) => assert_eq!(n, 64),
            other => panic!("expected silence, got {:?}", other),
        }

        q.drop_bytes(64);
        match q.peek(4096) {
            Peek::Data(chunk) => assert_eq!(chunk.bytes()[0], 2),
            other => panic!("expected data, got {:?}", other),
        }
    }

    #[test]
    fn seek_backward_overwrites() {
        let mut q = queue(4096, 2048, 0, 4);

        q.push(data(128, 1)).unwrap();
        q.seek(-64, SeekMode::Relative, false);
        q.push(data(32, 2)).unwrap();

        // 64 bytes old, then 32 rewritten, then 32 of the old tail.
        match q.peek(4096) {
            Peek::Data(chunk) => assert_eq!(chunk.bytes(), &[1; 64][..]),
            other => panic!("expected data, got {:?}", other),
        }
        q.drop_bytes(64);

        match q.peek(4096) {
            Peek::Data(chunk) => assert_eq!(chunk.bytes(), &[2; 32][..]),
            other => panic!("expected data, got {:?}", other),
        }
        q.drop_bytes(32);

        match q.peek(4096) {
            Peek::Data(chunk) => assert_eq!(chunk.bytes(), &[1; 32][..]),
            other => panic!("expected data, got {:?}", other),
        }
    }

    #[test]
    fn absolute_seek_and_read_seek() {
        let mut q = queue(4096, 2048, 0, 4);

        q.seek(256, SeekMode::Absolute, false);
        assert_eq!(q.write_index(), 256);

        q.seek(64, SeekMode::RelativeOnRead, false);
        assert_eq!(q.write_index(), q.read_index() + 64);

        q.push(data(64, 1)).unwrap();
        q.seek(0, SeekMode::RelativeEnd, false);
        assert_eq!(q.write_index(), 128);
    }

    #[test]
    fn pop_missing_does_not_double_count() {
        let mut q = queue(4096, 1024, 0, 64);

        // The full target is missing up front.
        assert_eq!(q.pop_missing(), 1024);
        assert_eq!(q.pop_missing(), 0);

        q.push(data(512, 1)).unwrap();
        assert_eq!(q.pop_missing(), 0);

        q.drop_bytes(256);
        assert_eq!(q.pop_missing(), 256);
        assert_eq!(q.pop_missing(), 0);

        // Small drops accumulate until they reach minreq.
        q.drop_bytes(32);
        assert_eq!(q.pop_missing(), 0);
        q.drop_bytes(32);
        assert_eq!(q.pop_missing(), 64);
    }

    #[test]
    fn pop_missing_balances_with_pushes() {
        let mut q = queue(8192, 1024, 0, 64);

        let mut granted: i64 = 0;
        let mut pushed: i64 = 0;

        granted += q.pop_missing() as i64;

        for _ in 0..10 {
            let n = 256.min((granted - pushed) as usize);
            q.push(data(n, 1)).unwrap();
            pushed += n as i64;

            q.drop_bytes(n);
            granted += q.pop_missing() as i64;
        }

        // Everything granted was either pushed or is still pending push.
        assert!(granted >= pushed);
        assert!(granted - pushed <= 1024);
    }

    #[test]
    fn flush_write_discards_queued_audio() {
        let mut q = queue(4096, 2048, 0, 4);

        q.push(data(256, 1)).unwrap();
        q.flush_write(false);

        assert_eq!(q.len(), 0);
        assert_eq!(q.write_index(), q.read_index());
        assert!(matches!(q.peek(64), Peek::Empty));
    }

    #[test]
    fn attr_updates_round_to_frames() {
        let mut q = queue(4096, 2048, 0, 4);

        q.apply_attr(&BufferAttr {
            maxlength: 1000,
            tlength: 500,
            prebuf: 100,
            minreq: 50,
            fragsize: 0,
        });

        let attr = q.attr();
        assert_eq!(attr.maxlength % 4, 0);
        assert_eq!(attr.tlength % 4, 0);
        assert_eq!(attr.prebuf % 4, 0);
        assert_eq!(attr.minreq % 4, 0);
        assert!(attr.prebuf <= attr.tlength + 4 - attr.minreq);
    }
}
