//! The shared-ringbuffer channel offered to v30+ clients.
//!
//! The channel itself is two eventfd-based doorbells plus a ring held in a
//! shared memory block; the lock-free data path over the ring belongs to
//! the memory collaborator. This module carries what the negotiation
//! needs: allocating the ring, exporting the descriptor pair, and tearing
//! everything down when the client never acknowledges.

use std::io;
use std::os::unix::io::RawFd;

use crate::protocol::SampleSpec;

use super::memblock::{MemBlock, MemPool};

/// Size of the ring, matching what mainline servers allocate.
const RING_SIZE: usize = 64 * 1024;

/// A pending or established shared-ringbuffer channel.
pub struct SrbChannel {
    ring: MemBlock,
    read_fd: RawFd,
    write_fd: RawFd,
}

impl std::fmt::Debug for SrbChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SrbChannel")
            .field("ring_len", &self.ring.len())
            .field("read_fd", &self.read_fd)
            .field("write_fd", &self.write_fd)
            .finish()
    }
}

impl SrbChannel {
    /// Allocates the ring out of `pool` and creates the doorbell pair.
    pub fn new(pool: &MemPool) -> io::Result<Self> {
        let read_fd = eventfd()?;
        let write_fd = match eventfd() {
            Ok(fd) => fd,
            Err(e) => {
                unsafe { libc::close(read_fd) };
                return Err(e);
            }
        };

        let spec = SampleSpec::default();
        let ring = pool.silence(RING_SIZE, &spec);

        Ok(Self {
            ring,
            read_fd,
            write_fd,
        })
    }

    /// The descriptors to hand to the client, reader first.
    pub fn fds(&self) -> [RawFd; 2] {
        [self.read_fd, self.write_fd]
    }

    /// The ring memory backing the channel.
    pub fn ring(&self) -> &MemBlock {
        &self.ring
    }

    /// A tag identifying this channel in the enable handshake.
    pub fn tag(&self) -> u32 {
        self.read_fd as u32
    }
}

impl Drop for SrbChannel {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.read_fd);
            libc::close(self.write_fd);
        }
    }
}

fn eventfd() -> io::Result<RawFd> {
    let fd = unsafe { libc::eventfd(0, libc::EFD_CLOEXEC | libc::EFD_NONBLOCK) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(fd)
}

#[cfg(test)]
mod tests {
    use crate::server::memblock::PoolBacking;

    use super::*;

    #[test]
    fn allocates_ring_and_doorbells() -> anyhow::Result<()> {
        let pool = MemPool::new(PoolBacking::Private)?;
        let srb = SrbChannel::new(&pool)?;

        let [r, w] = srb.fds();
        assert!(r >= 0 && w >= 0 && r != w);
        assert_eq!(srb.ring().len(), RING_SIZE);

        Ok(())
    }
}
