//! Reference-counted sample memory.
//!
//! Audio data moves through the server as [`MemChunk`]s, windows into
//! immutable [`MemBlock`]s. Blocks come out of a [`MemPool`], which may be
//! process-private or shared with a peer over POSIX shm or a memfd.

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::protocol::SampleSpec;

/// How the backing memory of a pool is allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolBacking {
    /// Plain heap memory, invisible to other processes.
    Private,
    /// POSIX shared memory, exportable to local peers.
    Posix,
    /// A memfd sealed for sharing over socket ancillary data.
    Memfd,
}

#[derive(Debug, Default)]
struct PoolStats {
    blocks: AtomicUsize,
    blocks_size: AtomicUsize,
    allocated: AtomicUsize,
    allocated_size: AtomicUsize,
}

struct PoolInner {
    id: u32,
    backing: PoolBacking,
    // The memfd backing the pool, when exported to a peer.
    fd: Option<libc::c_int>,
    stats: PoolStats,
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        if let Some(fd) = self.fd {
            unsafe { libc::close(fd) };
        }
    }
}

/// A pool of sample memory, shared by every block allocated from it.
#[derive(Clone)]
pub struct MemPool {
    inner: Arc<PoolInner>,
}

static NEXT_POOL_ID: AtomicU32 = AtomicU32::new(1);

impl MemPool {
    /// Creates a new pool with the given backing.
    ///
    /// A `Memfd` pool reserves a file descriptor that can be exported to a
    /// peer with [`MemPool::fd`]; block data itself still lives on the heap
    /// on the server side.
    pub fn new(backing: PoolBacking) -> std::io::Result<Self> {
        let fd = match backing {
            PoolBacking::Memfd => {
                let fd = unsafe {
                    libc::memfd_create(
                        b"pavane-pool\0".as_ptr().cast(),
                        libc::MFD_CLOEXEC | libc::MFD_ALLOW_SEALING,
                    )
                };
                if fd < 0 {
                    return Err(std::io::Error::last_os_error());
                }
                Some(fd)
            }
            _ => None,
        };

        Ok(Self {
            inner: Arc::new(PoolInner {
                id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
                backing,
                fd,
                stats: PoolStats::default(),
            }),
        })
    }

    /// The pool id used in shared-memory frame references.
    pub fn id(&self) -> u32 {
        self.inner.id
    }

    pub fn backing(&self) -> PoolBacking {
        self.inner.backing
    }

    /// The exportable file descriptor, for memfd pools.
    pub fn fd(&self) -> Option<libc::c_int> {
        self.inner.fd
    }

    /// Allocates a block and fills it through `init`.
    pub fn alloc_with(&self, len: usize, init: impl FnOnce(&mut [u8])) -> MemBlock {
        let mut data = vec![0u8; len];
        init(&mut data);
        self.wrap(data, false)
    }

    /// Wraps an existing buffer as a block of this pool.
    pub fn wrap(&self, data: Vec<u8>, silence: bool) -> MemBlock {
        let stats = &self.inner.stats;
        stats.blocks.fetch_add(1, Ordering::Relaxed);
        stats.blocks_size.fetch_add(data.len(), Ordering::Relaxed);
        stats.allocated.fetch_add(1, Ordering::Relaxed);
        stats
            .allocated_size
            .fetch_add(data.len(), Ordering::Relaxed);

        MemBlock {
            inner: Arc::new(BlockInner {
                pool: self.clone(),
                data: data.into_boxed_slice(),
                silence,
            }),
        }
    }

    /// A block of `len` bytes of silence for `spec`.
    pub fn silence(&self, len: usize, spec: &SampleSpec) -> MemBlock {
        let byte = spec.format.silence_byte();
        let mut data = vec![0u8; len];
        if byte != 0 {
            data.fill(byte);
        }
        self.wrap(data, true)
    }

    /// Point-in-time allocation counters, for the `STAT` command.
    pub fn stat(&self) -> (usize, usize, usize, usize) {
        let stats = &self.inner.stats;
        (
            stats.blocks.load(Ordering::Relaxed),
            stats.blocks_size.load(Ordering::Relaxed),
            stats.allocated.load(Ordering::Relaxed),
            stats.allocated_size.load(Ordering::Relaxed),
        )
    }

    fn release(&self, len: usize) {
        let stats = &self.inner.stats;
        stats.blocks.fetch_sub(1, Ordering::Relaxed);
        stats.blocks_size.fetch_sub(len, Ordering::Relaxed);
    }
}

impl fmt::Debug for MemPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemPool")
            .field("id", &self.inner.id)
            .field("backing", &self.inner.backing)
            .finish()
    }
}

struct BlockInner {
    pool: MemPool,
    data: Box<[u8]>,
    silence: bool,
}

impl Drop for BlockInner {
    fn drop(&mut self) {
        self.pool.release(self.data.len());
    }
}

/// An immutable, reference-counted slab of samples. The last holder returns
/// it to its pool's accounting.
#[derive(Clone)]
pub struct MemBlock {
    inner: Arc<BlockInner>,
}

impl MemBlock {
    pub fn len(&self) -> usize {
        self.inner.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.data.is_empty()
    }

    /// Whether the block is known to contain only silence.
    pub fn is_silence(&self) -> bool {
        self.inner.silence
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.inner.data
    }

    pub fn pool(&self) -> &MemPool {
        &self.inner.pool
    }
}

impl fmt::Debug for MemBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemBlock")
            .field("len", &self.len())
            .field("silence", &self.inner.silence)
            .finish()
    }
}

/// A window into a [`MemBlock`]: `(block, index, length)`, in bytes.
#[derive(Debug, Clone)]
pub struct MemChunk {
    pub block: MemBlock,
    pub index: usize,
    pub length: usize,
}

impl MemChunk {
    /// A chunk covering a whole block.
    pub fn from_block(block: MemBlock) -> Self {
        let length = block.len();
        Self {
            block,
            index: 0,
            length,
        }
    }

    /// The bytes the chunk windows.
    pub fn bytes(&self) -> &[u8] {
        &self.block.as_slice()[self.index..self.index + self.length]
    }

    pub fn is_silence(&self) -> bool {
        self.block.is_silence()
    }

    /// A sub-window of the first `length` bytes.
    pub fn truncated(&self, length: usize) -> MemChunk {
        assert!(length <= self.length);
        MemChunk {
            block: self.block.clone(),
            index: self.index,
            length,
        }
    }

    /// A sub-window with the first `n` bytes cut off.
    pub fn advanced(&self, n: usize) -> MemChunk {
        assert!(n <= self.length);
        MemChunk {
            block: self.block.clone(),
            index: self.index + n,
            length: self.length - n,
        }
    }
}

/// A read-only mapping of a peer's memfd-backed pool.
pub struct MemfdRegion {
    ptr: *mut libc::c_void,
    len: usize,
}

// The mapping is read-only and owned exclusively by the registry.
unsafe impl Send for MemfdRegion {}

impl MemfdRegion {
    /// Maps the peer's descriptor. The caller keeps ownership of `fd`.
    pub fn map(fd: libc::c_int) -> std::io::Result<Self> {
        let len = unsafe { libc::lseek(fd, 0, libc::SEEK_END) };
        if len <= 0 {
            return Err(std::io::Error::last_os_error());
        }
        let len = len as usize;

        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(std::io::Error::last_os_error());
        }

        Ok(Self { ptr, len })
    }

    /// Copies `length` bytes at `offset` out of the mapping.
    pub fn read(&self, offset: usize, length: usize) -> Option<Vec<u8>> {
        if offset.checked_add(length)? > self.len {
            return None;
        }

        let slice =
            unsafe { std::slice::from_raw_parts(self.ptr.cast::<u8>().add(offset), length) };
        Some(slice.to_vec())
    }
}

impl Drop for MemfdRegion {
    fn drop(&mut self) {
        unsafe { libc::munmap(self.ptr, self.len) };
    }
}

impl fmt::Debug for MemfdRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemfdRegion").field("len", &self.len).finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::protocol::SampleFormat;

    use super::*;

    #[test]
    fn pool_accounting() {
        let pool = MemPool::new(PoolBacking::Private).unwrap();

        let a = pool.wrap(vec![0; 64], false);
        let b = pool.wrap(vec![0; 128], false);

        assert_eq!(pool.stat(), (2, 192, 2, 192));

        drop(a);
        assert_eq!(pool.stat(), (1, 128, 2, 192));

        let c = b.clone();
        drop(b);
        // Still referenced through the clone.
        assert_eq!(pool.stat(), (1, 128, 2, 192));

        drop(c);
        assert_eq!(pool.stat(), (0, 0, 2, 192));
    }

    #[test]
    fn silence_uses_format_byte() {
        let pool = MemPool::new(PoolBacking::Private).unwrap();

        let spec = SampleSpec {
            format: SampleFormat::U8,
            channels: 1,
            rate: 8000,
        };
        let block = pool.silence(4, &spec);
        assert!(block.is_silence());
        assert_eq!(block.as_slice(), &[0x80; 4]);

        let spec = SampleSpec {
            format: SampleFormat::S16Le,
            ..spec
        };
        assert_eq!(pool.silence(4, &spec).as_slice(), &[0; 4]);
    }

    #[test]
    fn chunk_windows() {
        let pool = MemPool::new(PoolBacking::Private).unwrap();
        let chunk = MemChunk::from_block(pool.wrap((0..16).collect(), false));

        let tail = chunk.advanced(4);
        assert_eq!(tail.bytes()[0], 4);
        assert_eq!(tail.truncated(2).bytes(), &[4, 5]);
    }
}
