//! Sample uploads and the in-memory sample cache.

use std::collections::HashMap;
use std::ffi::CString;
use std::sync::Arc;

use crate::protocol::{ChannelMap, ChannelVolume, Props, SampleSpec};

use super::memblock::{MemChunk, MemPool};
use super::mixer::{InputCtx, MainHandle, MainMessage, SinkInput, StreamIoMessage};

/// Hard cap on one cache entry.
pub const SCACHE_ENTRY_SIZE_MAX: usize = 16 * 1024 * 1024;

/// A one-shot stream accumulating a named sample until the client finishes
/// the upload.
#[derive(Debug)]
pub struct UploadStream {
    /// Connection-scoped channel id.
    pub channel: u32,

    /// The name the sample will be cached under.
    pub name: CString,

    pub spec: SampleSpec,
    pub map: ChannelMap,
    pub props: Props,

    /// Bytes still expected from the client.
    pub length_left: usize,

    data: Vec<u8>,
}

impl UploadStream {
    pub fn new(
        channel: u32,
        name: CString,
        spec: SampleSpec,
        map: ChannelMap,
        props: Props,
        length: usize,
    ) -> Self {
        Self {
            channel,
            name,
            spec,
            map,
            props,
            length_left: length,
            data: Vec::with_capacity(length),
        }
    }

    /// Appends uploaded audio; `None` fills with silence (a chunk-less
    /// write). Anything beyond the announced length is ignored.
    pub fn write(&mut self, chunk: Option<&MemChunk>) {
        let take = match chunk {
            Some(chunk) => {
                let take = chunk.length.min(self.length_left);
                self.data.extend_from_slice(&chunk.bytes()[..take]);
                take
            }
            None => {
                let take = self.length_left;
                self.data
                    .resize(self.data.len() + take, self.spec.format.silence_byte());
                take
            }
        };

        self.length_left -= take;
    }

    /// Consumes the stream into the bytes to cache.
    pub fn finish(self) -> (CString, Vec<u8>, SampleSpec, ChannelMap, Props) {
        (self.name, self.data, self.spec, self.map, self.props)
    }
}

/// A finished cache entry.
#[derive(Debug, Clone)]
pub struct CachedSample {
    pub index: u32,
    pub name: CString,
    pub spec: SampleSpec,
    pub map: ChannelMap,
    pub props: Props,
    pub volume: ChannelVolume,
    pub chunk: MemChunk,
}

impl CachedSample {
    /// Duration of the cached audio, in microseconds.
    pub fn duration_usec(&self) -> u64 {
        self.spec.bytes_to_usec(self.chunk.length as u64)
    }
}

/// The server-wide sample cache.
#[derive(Debug, Default)]
pub struct SampleCache {
    next_index: u32,
    by_name: HashMap<CString, CachedSample>,
}

impl SampleCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces an entry. Fails when the sample is oversized.
    pub fn insert(
        &mut self,
        pool: &MemPool,
        name: CString,
        data: Vec<u8>,
        spec: SampleSpec,
        map: ChannelMap,
        props: Props,
    ) -> Result<u32, ()> {
        if data.len() > SCACHE_ENTRY_SIZE_MAX {
            return Err(());
        }

        let index = match self.by_name.get(&name) {
            Some(existing) => existing.index,
            None => {
                let index = self.next_index;
                self.next_index += 1;
                index
            }
        };

        let sample = CachedSample {
            index,
            name: name.clone(),
            spec,
            map,
            props,
            volume: ChannelVolume::norm(spec.channels),
            chunk: MemChunk::from_block(pool.wrap(data, false)),
        };

        self.by_name.insert(name, sample);
        Ok(index)
    }

    pub fn get(&self, name: &CString) -> Option<&CachedSample> {
        self.by_name.get(name)
    }

    pub fn get_by_index(&self, index: u32) -> Option<&CachedSample> {
        self.by_name.values().find(|s| s.index == index)
    }

    pub fn remove(&mut self, name: &CString) -> bool {
        self.by_name.remove(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CachedSample> {
        self.by_name.values()
    }

    /// Total bytes cached, for the `STAT` command.
    pub fn total_size(&self) -> usize {
        self.by_name.values().map(|s| s.chunk.length).sum()
    }
}

/// A transient sink input that plays one cached sample and reports back
/// when it is done.
pub struct SamplePlayback {
    sink_index: u32,
    chunk: MemChunk,
    pos: usize,
    done_sent: bool,
    main: MainHandle,
}

impl std::fmt::Debug for SamplePlayback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SamplePlayback")
            .field("pos", &self.pos)
            .field("len", &self.chunk.length)
            .finish()
    }
}

impl SamplePlayback {
    pub fn new(sink_index: u32, sample: &CachedSample, main: MainHandle) -> Self {
        Self {
            sink_index,
            chunk: sample.chunk.clone(),
            pos: 0,
            done_sent: false,
            main,
        }
    }
}

impl SinkInput for SamplePlayback {
    fn pop(&mut self, ctx: &mut InputCtx, want: usize) -> Option<MemChunk> {
        let left = self.chunk.length - self.pos;
        if left == 0 {
            if !self.done_sent {
                self.done_sent = true;
                self.main.post(MainMessage::SampleDone {
                    sink_index: self.sink_index,
                    index: ctx.index,
                });
            }
            return None;
        }

        let take = left.min(want);
        let out = self.chunk.advanced(self.pos).truncated(take);
        self.pos += take;

        ctx.underrun_for = 0;
        ctx.playing_for += take as u64;

        Some(out)
    }

    fn process_rewind(&mut self, _ctx: &mut InputCtx, nbytes: usize) {
        self.pos = self.pos.saturating_sub(nbytes);
    }

    fn update_max_rewind(&mut self, _ctx: &mut InputCtx, _nbytes: usize) {}

    fn handle(&mut self, _ctx: &mut InputCtx, _msg: StreamIoMessage) {}

    fn group_op(&mut self, _ctx: &mut InputCtx, _op: super::mixer::GroupOp) {}

    fn into_any(self: Box<Self>) -> Box<dyn std::any::Any + Send> {
        self
    }
}

/// Shared ownership alias used by the service when scheduling playback.
pub type SharedSampleCache = Arc<std::sync::Mutex<SampleCache>>;

#[cfg(test)]
mod tests {
    use crate::protocol::SampleFormat;
    use crate::server::memblock::PoolBacking;

    use super::*;

    fn spec() -> SampleSpec {
        SampleSpec {
            format: SampleFormat::S16Le,
            channels: 2,
            rate: 44100,
        }
    }

    #[test]
    fn upload_accumulates_and_caps() {
        let pool = MemPool::new(PoolBacking::Private).unwrap();
        let mut upload = UploadStream::new(
            0,
            CString::new("bell").unwrap(),
            spec(),
            ChannelMap::stereo(),
            Props::new(),
            8,
        );

        let chunk = MemChunk::from_block(pool.wrap(vec![1; 6], false));
        upload.write(Some(&chunk));
        assert_eq!(upload.length_left, 2);

        // Overlong writes are clipped to the announced length.
        let chunk = MemChunk::from_block(pool.wrap(vec![2; 6], false));
        upload.write(Some(&chunk));
        assert_eq!(upload.length_left, 0);

        let (_, data, ..) = upload.finish();
        assert_eq!(data, vec![1, 1, 1, 1, 1, 1, 2, 2]);
    }

    #[test]
    fn chunkless_write_fills_silence() {
        let mut upload = UploadStream::new(
            0,
            CString::new("quiet").unwrap(),
            spec(),
            ChannelMap::stereo(),
            Props::new(),
            4,
        );

        upload.write(None);
        assert_eq!(upload.length_left, 0);

        let (_, data, ..) = upload.finish();
        assert_eq!(data, vec![0; 4]);
    }

    #[test]
    fn cache_rejects_oversized_entries() {
        let pool = MemPool::new(PoolBacking::Private).unwrap();
        let mut cache = SampleCache::new();

        let err = cache.insert(
            &pool,
            CString::new("huge").unwrap(),
            vec![0; SCACHE_ENTRY_SIZE_MAX + 1],
            spec(),
            ChannelMap::stereo(),
            Props::new(),
        );
        assert!(err.is_err());
    }

    #[test]
    fn cache_replaces_by_name_and_keeps_index() {
        let pool = MemPool::new(PoolBacking::Private).unwrap();
        let mut cache = SampleCache::new();

        let name = CString::new("bell").unwrap();
        let first = cache
            .insert(&pool, name.clone(), vec![0; 4], spec(), ChannelMap::stereo(), Props::new())
            .unwrap();
        let second = cache
            .insert(&pool, name.clone(), vec![1; 8], spec(), ChannelMap::stereo(), Props::new())
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(cache.get(&name).unwrap().chunk.length, 8);
        assert_eq!(cache.total_size(), 8);

        assert!(cache.remove(&name));
        assert!(!cache.remove(&name));
    }
}
