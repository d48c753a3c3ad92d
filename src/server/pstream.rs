//! The framed packet stream multiplexing command packets, memblock frames,
//! and shared-memory control frames over one byte channel.

use std::collections::VecDeque;
use std::io;
use std::os::unix::io::RawFd;

use crate::protocol::{
    read_frame_header, write_frame_header, FrameFlags, FrameHeader, ProtocolError, SeekMode,
    ShmFrameKind, FRAME_HEADER_SIZE, INVALID_INDEX,
};

use super::memblock::{MemChunk, MemPool};

/// Hard cap on a single inbound frame.
const FRAME_SIZE_MAX: u32 = 4 * 1024 * 1024;

/// Resolves shared-memory block references to sample bytes.
///
/// Mapping a peer's pools is the business of the memory collaborator; the
/// stream only hands the reference over and revokes blocks nobody can map.
pub trait ShmResolver: Send {
    fn resolve(&mut self, memfd: bool, block_id: u32, shm_id: u32, offset: u32, length: u32)
        -> Option<Vec<u8>>;
}

/// One decoded inbound frame.
#[derive(Debug)]
pub enum Inbound {
    /// A control packet: the raw tagstruct payload, plus any file
    /// descriptors that arrived alongside it.
    Packet { payload: Vec<u8>, fds: Vec<RawFd> },
    /// An audio write addressed to a stream.
    MemBlock {
        channel: u32,
        offset: i64,
        seek: SeekMode,
        chunk: Option<MemChunk>,
    },
    /// The peer is done with a block we exported.
    ShmRelease { block_id: u32 },
    /// The peer reclaims a block it exported to us.
    ShmRevoke { block_id: u32 },
}

/// Abstracts the byte channel under the stream: a Unix or TCP socket.
pub trait FrameTransport {
    /// Nonblocking read; collects any ancillary descriptors into `fds`.
    fn read_bytes(&mut self, buf: &mut [u8], fds: &mut Vec<RawFd>) -> io::Result<usize>;

    /// Nonblocking write; `fds` accompany the first byte written.
    fn write_bytes(&mut self, buf: &[u8], fds: &[RawFd]) -> io::Result<usize>;
}

enum ReadState {
    Header,
    Payload { header: FrameHeader },
}

struct OutFrame {
    bytes: Vec<u8>,
    fds: Vec<RawFd>,
}

/// The framing layer for one connection.
///
/// Reading is driven by readiness events and yields complete frames;
/// writing drains an ordered queue, reporting when it runs empty so the
/// owner can pace record deliveries.
pub struct PacketStream {
    read_state: ReadState,
    read_buf: Vec<u8>,
    read_got: usize,
    read_fds: Vec<RawFd>,

    write_queue: VecDeque<OutFrame>,
    write_cursor: usize,

    shm_resolver: Option<Box<dyn ShmResolver>>,

    eof: bool,

    pool: MemPool,
}

impl std::fmt::Debug for PacketStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketStream")
            .field("queued_frames", &self.write_queue.len())
            .finish()
    }
}

/// Outcome of a write pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The send queue ran dry.
    Drained,
    /// The socket stopped accepting data before the queue emptied.
    Blocked,
}

impl PacketStream {
    pub fn new(pool: MemPool) -> Self {
        Self {
            read_state: ReadState::Header,
            read_buf: vec![0; FRAME_HEADER_SIZE],
            read_got: 0,
            read_fds: Vec::new(),
            write_queue: VecDeque::new(),
            write_cursor: 0,
            shm_resolver: None,
            eof: false,
            pool: MemPool::clone(&pool),
        }
    }

    /// Whether the peer has hung up its sending side.
    pub fn saw_eof(&self) -> bool {
        self.eof
    }

    /// Installs the collaborator that maps peer shared-memory references.
    pub fn set_shm_resolver(&mut self, resolver: Box<dyn ShmResolver>) {
        self.shm_resolver = Some(resolver);
    }

    /// Whether frames are waiting to be written out.
    pub fn is_pending(&self) -> bool {
        !self.write_queue.is_empty()
    }

    /// Queues a control packet.
    pub fn send_packet(&mut self, payload: Vec<u8>) {
        self.send_packet_with_fds(payload, Vec::new())
    }

    /// Queues a control packet with ancillary descriptors attached.
    pub fn send_packet_with_fds(&mut self, payload: Vec<u8>, fds: Vec<RawFd>) {
        debug_assert!(payload.len() >= FRAME_HEADER_SIZE);
        self.write_queue.push_back(OutFrame {
            bytes: payload,
            fds,
        });
    }

    /// Queues an audio frame for `channel`.
    pub fn send_memblock(&mut self, channel: u32, offset: i64, seek: SeekMode, chunk: &MemChunk) {
        let mut bytes = Vec::with_capacity(FRAME_HEADER_SIZE + chunk.length);
        write_frame_header(
            &mut bytes,
            FrameHeader {
                length: chunk.length as u32,
                channel,
                offset,
                flags: FrameFlags::for_memblock(seek),
            },
        )
        .expect("header encoding cannot fail on a Vec");
        bytes.extend_from_slice(chunk.bytes());

        self.write_queue.push_back(OutFrame {
            bytes,
            fds: Vec::new(),
        });
    }

    /// Queues a release notification for a peer-exported block.
    pub fn send_release(&mut self, block_id: u32) {
        self.send_shm_control(block_id, FrameFlags::SHM_RELEASE)
    }

    /// Queues a revoke notification for a block we exported.
    pub fn send_revoke(&mut self, block_id: u32) {
        self.send_shm_control(block_id, FrameFlags::SHM_REVOKE)
    }

    fn send_shm_control(&mut self, block_id: u32, flags: u32) {
        let mut bytes = Vec::with_capacity(FRAME_HEADER_SIZE);
        write_frame_header(
            &mut bytes,
            FrameHeader {
                length: 0,
                channel: block_id,
                offset: 0,
                flags: FrameFlags(flags),
            },
        )
        .expect("header encoding cannot fail on a Vec");

        self.write_queue.push_back(OutFrame {
            bytes,
            fds: Vec::new(),
        });
    }

    /// Drives the write queue. Returns `Drained` when the queue emptied
    /// during this pass.
    pub fn write_some(&mut self, io: &mut dyn FrameTransport) -> io::Result<WriteOutcome> {
        while let Some(frame) = self.write_queue.front() {
            let fds = if self.write_cursor == 0 {
                frame.fds.clone()
            } else {
                Vec::new()
            };

            match io.write_bytes(&frame.bytes[self.write_cursor..], &fds) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => {
                    self.write_cursor += n;
                    if self.write_cursor == frame.bytes.len() {
                        self.write_queue.pop_front();
                        self.write_cursor = 0;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(WriteOutcome::Blocked)
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        Ok(WriteOutcome::Drained)
    }

    /// Drives the read side until the socket runs dry, returning every
    /// complete frame that arrived.
    ///
    /// An EOF from the transport is latched; see [`PacketStream::saw_eof`].
    pub fn read_some(&mut self, io: &mut dyn FrameTransport) -> Result<Vec<Inbound>, ProtocolError> {
        let mut frames = Vec::new();

        if self.eof {
            return Ok(frames);
        }

        loop {
            match io.read_bytes(&mut self.read_buf[self.read_got..], &mut self.read_fds) {
                Ok(0) => {
                    self.eof = true;
                    return Ok(frames);
                }
                Ok(n) => {
                    self.read_got += n;
                    if self.read_got == self.read_buf.len() {
                        if let Some(frame) = self.finish_read_stage()? {
                            frames.push(frame);
                        }
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(frames),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(ProtocolError::Io(e)),
            }
        }
    }

    // A read stage (header or payload) completed; advance the state
    // machine, possibly producing a finished frame.
    fn finish_read_stage(&mut self) -> Result<Option<Inbound>, ProtocolError> {
        match self.read_state {
            ReadState::Header => {
                let header = read_frame_header(&mut &self.read_buf[..])?;

                if header.length > FRAME_SIZE_MAX {
                    return Err(ProtocolError::Invalid(format!(
                        "frame of {} bytes exceeds the maximum of {}",
                        header.length, FRAME_SIZE_MAX
                    )));
                }

                // Zero-length frames (shm control) complete immediately.
                if header.length == 0 {
                    self.reset_read();
                    return self.classify(header, Vec::new()).map(Some);
                }

                self.read_state = ReadState::Payload { header };
                self.read_buf = vec![0; header.length as usize];
                self.read_got = 0;
                Ok(None)
            }
            ReadState::Payload { header } => {
                let payload = std::mem::take(&mut self.read_buf);
                self.reset_read();
                self.classify(header, payload).map(Some)
            }
        }
    }

    fn reset_read(&mut self) {
        self.read_state = ReadState::Header;
        self.read_buf = vec![0; FRAME_HEADER_SIZE];
        self.read_got = 0;
    }

    fn classify(&mut self, header: FrameHeader, payload: Vec<u8>) -> Result<Inbound, ProtocolError> {
        match header.flags.shm_kind() {
            ShmFrameKind::Revoke => {
                return Ok(Inbound::ShmRevoke {
                    block_id: header.channel,
                })
            }
            ShmFrameKind::Release => {
                return Ok(Inbound::ShmRelease {
                    block_id: header.channel,
                })
            }
            ShmFrameKind::Data { memfd, .. } => {
                return self.resolve_shm(header, memfd, &payload);
            }
            ShmFrameKind::None => {}
        }

        if header.channel == INVALID_INDEX {
            return Ok(Inbound::Packet {
                payload,
                fds: std::mem::take(&mut self.read_fds),
            });
        }

        let seek = header.flags.seek().ok_or_else(|| {
            ProtocolError::Invalid(format!("invalid seek mode 0x{:02x}", header.flags.0))
        })?;

        let chunk = if payload.is_empty() {
            None
        } else {
            Some(MemChunk::from_block(self.pool.wrap(payload, false)))
        };

        Ok(Inbound::MemBlock {
            channel: header.channel,
            offset: header.offset,
            seek,
            chunk,
        })
    }

    fn resolve_shm(
        &mut self,
        header: FrameHeader,
        memfd: bool,
        payload: &[u8],
    ) -> Result<Inbound, ProtocolError> {
        use byteorder::{NetworkEndian, ReadBytesExt};

        if payload.len() != 4 * 4 {
            return Err(ProtocolError::Invalid(
                "malformed shared-memory reference".into(),
            ));
        }

        let mut r = payload;
        let block_id = r.read_u32::<NetworkEndian>()?;
        let shm_id = r.read_u32::<NetworkEndian>()?;
        let offset = r.read_u32::<NetworkEndian>()?;
        let length = r.read_u32::<NetworkEndian>()?;

        let seek = header.flags.seek().ok_or_else(|| {
            ProtocolError::Invalid(format!("invalid seek mode 0x{:02x}", header.flags.0))
        })?;

        let data = self
            .shm_resolver
            .as_mut()
            .and_then(|r| r.resolve(memfd, block_id, shm_id, offset, length));

        match data {
            Some(data) => Ok(Inbound::MemBlock {
                channel: header.channel,
                offset: header.offset,
                seek,
                chunk: Some(MemChunk::from_block(self.pool.wrap(data, false))),
            }),
            None => {
                // We can't map the pool; hand the peer its block back and
                // substitute silence so the stream timeline stays intact.
                log::warn!("failed to resolve shm block {}, releasing it", block_id);
                self.send_release(block_id);

                let silence = vec![0u8; length as usize];
                Ok(Inbound::MemBlock {
                    channel: header.channel,
                    offset: header.offset,
                    seek,
                    chunk: Some(MemChunk::from_block(self.pool.wrap(silence, true))),
                })
            }
        }
    }
}

/// [`FrameTransport`] over a nonblocking Unix socket, with full ancillary
/// support.
#[derive(Debug)]
pub struct UnixTransport {
    fd: RawFd,
}

impl UnixTransport {
    /// Wraps a nonblocking socket. The caller retains ownership of the fd.
    pub fn new(fd: RawFd) -> Self {
        Self { fd }
    }
}

impl FrameTransport for UnixTransport {
    fn read_bytes(&mut self, buf: &mut [u8], fds: &mut Vec<RawFd>) -> io::Result<usize> {
        super::ancil::recv_with_fds(self.fd, buf, fds)
    }

    fn write_bytes(&mut self, buf: &[u8], fds: &[RawFd]) -> io::Result<usize> {
        if fds.is_empty() {
            let n = unsafe {
                libc::send(
                    self.fd,
                    buf.as_ptr().cast(),
                    buf.len(),
                    libc::MSG_NOSIGNAL,
                )
            };
            if n < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(n as usize)
        } else {
            super::ancil::send_with_fds(self.fd, buf, fds)
        }
    }
}

/// [`FrameTransport`] over a TCP socket. Ancillary data does not exist
/// here; attempting to attach descriptors is a programming error upstream.
#[derive(Debug)]
pub struct TcpTransport<'a> {
    pub stream: &'a mut mio::net::TcpStream,
}

impl FrameTransport for TcpTransport<'_> {
    fn read_bytes(&mut self, buf: &mut [u8], _fds: &mut Vec<RawFd>) -> io::Result<usize> {
        use std::io::Read;
        self.stream.read(buf)
    }

    fn write_bytes(&mut self, buf: &[u8], fds: &[RawFd]) -> io::Result<usize> {
        use std::io::Write;
        debug_assert!(fds.is_empty());
        self.stream.write(buf)
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::io::AsRawFd;
    use std::os::unix::net::UnixStream;

    use assert_matches::assert_matches;

    use crate::server::memblock::PoolBacking;

    use super::*;

    fn pair() -> (UnixStream, UnixStream) {
        let (a, b) = UnixStream::pair().unwrap();
        a.set_nonblocking(true).unwrap();
        b.set_nonblocking(true).unwrap();
        (a, b)
    }

    fn pstream() -> PacketStream {
        PacketStream::new(MemPool::new(PoolBacking::Private).unwrap())
    }

    #[test]
    fn memblock_frame_roundtrip() -> anyhow::Result<()> {
        let (a, b) = pair();
        let mut tx = UnixTransport::new(a.as_raw_fd());
        let mut rx = UnixTransport::new(b.as_raw_fd());

        let mut sender = pstream();
        let mut receiver = pstream();

        let pool = MemPool::new(PoolBacking::Private)?;
        let chunk = MemChunk::from_block(pool.wrap(vec![7; 64], false));
        sender.send_memblock(3, -128, SeekMode::Relative, &chunk);

        assert_eq!(sender.write_some(&mut tx)?, WriteOutcome::Drained);
        assert!(!sender.is_pending());

        let frames = receiver.read_some(&mut rx)?;
        assert_eq!(frames.len(), 1);
        assert_matches!(
            &frames[0],
            Inbound::MemBlock {
                channel: 3,
                offset: -128,
                seek: SeekMode::Relative,
                chunk: Some(chunk),
            } if chunk.bytes() == [7; 64]
        );

        Ok(())
    }

    #[test]
    fn shm_control_frames() -> anyhow::Result<()> {
        let (a, b) = pair();
        let mut tx = UnixTransport::new(a.as_raw_fd());
        let mut rx = UnixTransport::new(b.as_raw_fd());

        let mut sender = pstream();
        let mut receiver = pstream();

        sender.send_release(17);
        sender.send_revoke(23);
        sender.write_some(&mut tx)?;

        let frames = receiver.read_some(&mut rx)?;
        assert_matches!(frames[0], Inbound::ShmRelease { block_id: 17 });
        assert_matches!(frames[1], Inbound::ShmRevoke { block_id: 23 });

        Ok(())
    }

    #[test]
    fn oversized_frame_is_rejected() -> anyhow::Result<()> {
        let (a, b) = pair();
        let mut rx = UnixTransport::new(b.as_raw_fd());

        let mut receiver = pstream();

        let mut header = Vec::new();
        write_frame_header(
            &mut header,
            FrameHeader {
                length: FRAME_SIZE_MAX + 1,
                channel: INVALID_INDEX,
                offset: 0,
                flags: FrameFlags::default(),
            },
        )?;
        super::super::ancil::send_with_fds(a.as_raw_fd(), &header, &[])?;

        assert!(receiver.read_some(&mut rx).is_err());

        Ok(())
    }

    #[test]
    fn partial_writes_resume() -> anyhow::Result<()> {
        let (a, b) = pair();
        let mut tx = UnixTransport::new(a.as_raw_fd());
        let mut rx = UnixTransport::new(b.as_raw_fd());

        let mut sender = pstream();
        let mut receiver = pstream();

        // Enough data to overrun the socket buffer and force `Blocked`.
        let pool = MemPool::new(PoolBacking::Private)?;
        for _ in 0..64 {
            let chunk = MemChunk::from_block(pool.wrap(vec![1; 32 * 1024], false));
            sender.send_memblock(0, 0, SeekMode::Relative, &chunk);
        }

        let mut received = 0;
        loop {
            let outcome = sender.write_some(&mut tx)?;

            for frame in receiver.read_some(&mut rx)? {
                if let Inbound::MemBlock {
                    chunk: Some(chunk), ..
                } = frame
                {
                    received += chunk.length;
                }
            }

            if outcome == WriteOutcome::Drained {
                break;
            }
        }

        for frame in receiver.read_some(&mut rx)? {
            if let Inbound::MemBlock {
                chunk: Some(chunk), ..
            } = frame
            {
                received += chunk.length;
            }
        }

        assert_eq!(received, 64 * 32 * 1024);

        Ok(())
    }
}
