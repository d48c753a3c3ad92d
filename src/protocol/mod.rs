//! The native wire protocol: framing, the tagstruct codec, and the typed
//! command set.

pub mod command;
pub mod tagstruct;
pub mod types;

mod error;

use std::io::{BufRead, Cursor, Read, Write};

use byteorder::{NetworkEndian, ReadBytesExt, WriteBytesExt};

pub use command::*;
pub use error::*;
pub use tagstruct::{Tag, TagStructRead, TagStructReader, TagStructWrite, TagStructWriter};
pub use types::*;

/// The lowest peer protocol version we interoperate with.
pub const MIN_VERSION: u16 = 8;

/// The protocol version implemented by this library.
pub const MAX_VERSION: u16 = 34;

/// The wire marker for "no such object" in index fields.
pub const INVALID_INDEX: u32 = u32::MAX;

/// Size of the frame header on the wire.
pub const FRAME_HEADER_SIZE: usize = 5 * 4;

/// Flag bits in a frame header.
///
/// The low byte of a memblock frame's flags carries the seek mode; the high
/// byte selects the frame kind for shared-memory traffic.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct FrameFlags(pub u32);

impl FrameFlags {
    pub const SEEK_MASK: u32 = 0x0000_00ff;
    pub const SHM_DATA: u32 = 0x8000_0000;
    pub const SHM_DATA_MEMFD: u32 = 0x2000_0000;
    pub const SHM_WRITABLE: u32 = 0x0080_0000;
    pub const SHM_RELEASE: u32 = 0x4000_0000;
    pub const SHM_REVOKE: u32 = 0xc000_0000;
    pub const SHM_MASK: u32 = 0xff00_0000;

    /// Flags for a plain memblock frame carrying `seek`.
    pub fn for_memblock(seek: SeekMode) -> Self {
        FrameFlags(seek as u32)
    }

    /// The seek mode encoded in the low byte, if valid.
    pub fn seek(&self) -> Option<SeekMode> {
        use num_traits::FromPrimitive;
        SeekMode::from_u32(self.0 & Self::SEEK_MASK)
    }

    /// The shared-memory frame kind encoded in the high byte.
    pub fn shm_kind(&self) -> ShmFrameKind {
        // Revoke is release plus the data bit, so test it first.
        if self.0 & Self::SHM_REVOKE == Self::SHM_REVOKE {
            ShmFrameKind::Revoke
        } else if self.0 & Self::SHM_RELEASE != 0 {
            ShmFrameKind::Release
        } else if self.0 & Self::SHM_DATA != 0 {
            ShmFrameKind::Data {
                memfd: self.0 & Self::SHM_DATA_MEMFD != 0,
                writable: self.0 & Self::SHM_WRITABLE != 0,
            }
        } else {
            ShmFrameKind::None
        }
    }
}

/// What the SHM bits of a frame header announce.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ShmFrameKind {
    /// An ordinary frame; the payload is inline.
    None,
    /// The payload is a reference into a shared-memory pool.
    Data {
        /// The pool is memfd-backed.
        memfd: bool,
        /// The referenced block is writable by the receiver.
        writable: bool,
    },
    /// The peer is done with a block we exported.
    Release,
    /// We are reclaiming a block the peer still references.
    Revoke,
}

/// The fixed-size header preceding every frame.
///
/// `channel == INVALID_INDEX` marks a command packet; any other value
/// addresses a memblock frame to that stream.
#[derive(Debug, Clone, Copy)]
pub struct FrameHeader {
    /// Payload length in bytes.
    pub length: u32,
    /// The stream this frame belongs to, or `INVALID_INDEX` for commands.
    pub channel: u32,
    /// For memblock frames, the seek offset.
    pub offset: i64,
    /// Seek mode and SHM bits.
    pub flags: FrameFlags,
}

impl FrameHeader {
    /// Header for a command packet of `length` payload bytes.
    pub fn for_packet(length: u32) -> Self {
        Self {
            length,
            channel: INVALID_INDEX,
            offset: 0,
            flags: FrameFlags::default(),
        }
    }

    pub fn is_command(&self) -> bool {
        self.channel == INVALID_INDEX && self.flags.shm_kind() == ShmFrameKind::None
    }
}

/// Reads a frame header from an input stream.
pub fn read_frame_header<R: Read>(r: &mut R) -> Result<FrameHeader, ProtocolError> {
    let length = r.read_u32::<NetworkEndian>()?;
    let channel = r.read_u32::<NetworkEndian>()?;
    let offset = r.read_u64::<NetworkEndian>()? as i64;
    let flags = r.read_u32::<NetworkEndian>()?;

    Ok(FrameHeader {
        length,
        channel,
        offset,
        flags: FrameFlags(flags),
    })
}

/// Writes a frame header to an output stream.
pub fn write_frame_header<W: Write>(w: &mut W, header: FrameHeader) -> Result<(), ProtocolError> {
    w.write_u32::<NetworkEndian>(header.length)?;
    w.write_u32::<NetworkEndian>(header.channel)?;
    w.write_u64::<NetworkEndian>(header.offset as u64)?;
    w.write_u32::<NetworkEndian>(header.flags.0)?;

    Ok(())
}

/// Encodes a command message (header plus tagstruct payload) into a buffer.
pub fn encode_command_message(
    command: &Command,
    seq: u32,
    protocol_version: u16,
) -> Result<Vec<u8>, ProtocolError> {
    let mut payload = Cursor::new(Vec::new());
    command.write_tag_prefixed(seq, &mut payload, protocol_version)?;
    let payload = payload.into_inner();

    let length = payload
        .len()
        .try_into()
        .map_err(|_| ProtocolError::Invalid("message payload greater than 4gb".to_string()))?;

    let mut buf = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    write_frame_header(&mut buf, FrameHeader::for_packet(length))?;
    buf.extend_from_slice(&payload);

    Ok(buf)
}

/// Writes a command message to an output stream.
pub fn write_command_message<W: Write>(
    w: &mut W,
    seq: u32,
    command: &Command,
    protocol_version: u16,
) -> Result<(), ProtocolError> {
    w.write_all(&encode_command_message(command, seq, protocol_version)?)?;
    Ok(())
}

/// Writes a `REPLY` message carrying `reply` to an output stream.
pub fn write_reply_message<W: Write, T: CommandReply>(
    w: &mut W,
    seq: u32,
    reply: &T,
    protocol_version: u16,
) -> Result<(), ProtocolError> {
    w.write_all(&encode_reply_message(seq, reply, protocol_version)?)?;
    Ok(())
}

/// Encodes a `REPLY` message carrying `reply` into a buffer.
pub fn encode_reply_message<T: CommandReply>(
    seq: u32,
    reply: &T,
    protocol_version: u16,
) -> Result<Vec<u8>, ProtocolError> {
    let mut payload = Vec::new();
    {
        let mut ts = TagStructWriter::new(&mut payload, protocol_version);
        ts.write_u32(CommandTag::Reply as u32)?;
        ts.write_u32(seq)?;
        ts.write(reply)?;
    }

    let mut buf = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    write_frame_header(&mut buf, FrameHeader::for_packet(payload.len() as u32))?;
    buf.extend_from_slice(&payload);

    Ok(buf)
}

/// Writes an empty `REPLY` (a simple acknowledgement) to an output stream.
pub fn write_ack_message<W: Write>(w: &mut W, seq: u32) -> Result<(), ProtocolError> {
    let mut payload = Vec::new();
    {
        let mut ts = TagStructWriter::new(&mut payload, 0);
        ts.write_u32(CommandTag::Reply as u32)?;
        ts.write_u32(seq)?;
    }

    write_frame_header(w, FrameHeader::for_packet(payload.len() as u32))?;
    w.write_all(&payload)?;
    Ok(())
}

/// Writes an `ERROR` message to an output stream.
pub fn write_error_message<W: Write>(
    w: &mut W,
    seq: u32,
    code: PulseError,
) -> Result<(), ProtocolError> {
    let mut payload = Vec::new();
    {
        let mut ts = TagStructWriter::new(&mut payload, 0);
        ts.write_u32(CommandTag::Error as u32)?;
        ts.write_u32(seq)?;
        ts.write_u32(code as u32)?;
    }

    write_frame_header(w, FrameHeader::for_packet(payload.len() as u32))?;
    w.write_all(&payload)?;
    Ok(())
}

/// Reads a command message (header plus payload) from an input stream,
/// always consuming the whole frame.
pub fn read_command_message<R: BufRead>(
    r: &mut R,
    protocol_version: u16,
) -> Result<(u32, Command), ProtocolError> {
    let header = read_frame_header(r)?;

    let mut r = r.take(header.length as u64);
    let result = Command::read_tag_prefixed(&mut r, protocol_version);
    std::io::copy(&mut r, &mut std::io::sink())?;

    result
}

/// Reads a `REPLY` carrying a `T` from an input stream, or maps an `ERROR`
/// message to the error code it carries.
///
/// The whole frame is consumed either way, so an unexpected message never
/// leaves the stream misaligned.
pub fn read_reply_message<T: CommandReply>(
    r: &mut impl BufRead,
    protocol_version: u16,
) -> Result<(u32, T), ProtocolError> {
    let header = read_frame_header(r)?;

    let mut r = r.take(header.length as u64);
    let result = (|| {
        let mut ts = TagStructReader::new(&mut r, protocol_version);
        let (cmd, seq) = (ts.read_enum()?, ts.read_u32()?);

        match cmd {
            CommandTag::Error => Err(ProtocolError::PeerError(ts.read_enum()?)),
            CommandTag::Reply => Ok((seq, T::read(&mut ts, protocol_version)?)),
            other => Err(ProtocolError::UnexpectedCommand(other)),
        }
    })();

    std::io::copy(&mut r, &mut std::io::sink())?;
    result
}

/// Reads an empty `REPLY` from an input stream. Like
/// [`read_reply_message`], always consumes the whole frame.
pub fn read_ack_message(r: &mut impl BufRead) -> Result<u32, ProtocolError> {
    let header = read_frame_header(r)?;

    let mut r = r.take(header.length as u64);
    let result = (|| {
        let mut ts = TagStructReader::new(&mut r, 0);
        let (cmd, seq) = (ts.read_enum()?, ts.read_u32()?);

        match cmd {
            CommandTag::Error => Err(ProtocolError::PeerError(ts.read_enum()?)),
            CommandTag::Reply => Ok(seq),
            other => Err(ProtocolError::UnexpectedCommand(other)),
        }
    })();

    std::io::copy(&mut r, &mut std::io::sink())?;
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_flags_shm_kinds() {
        assert_eq!(FrameFlags(0).shm_kind(), ShmFrameKind::None);
        assert_eq!(
            FrameFlags(FrameFlags::SHM_RELEASE).shm_kind(),
            ShmFrameKind::Release
        );
        assert_eq!(
            FrameFlags(FrameFlags::SHM_REVOKE).shm_kind(),
            ShmFrameKind::Revoke
        );
        assert_eq!(
            FrameFlags(FrameFlags::SHM_DATA | FrameFlags::SHM_DATA_MEMFD).shm_kind(),
            ShmFrameKind::Data {
                memfd: true,
                writable: false
            }
        );
    }

    #[test]
    fn frame_flags_seek() {
        assert_eq!(
            FrameFlags::for_memblock(SeekMode::RelativeEnd).seek(),
            Some(SeekMode::RelativeEnd)
        );
        assert_eq!(FrameFlags(0x7).seek(), None);
    }

    #[test]
    fn header_roundtrip() -> anyhow::Result<()> {
        let header = FrameHeader {
            length: 17,
            channel: 3,
            offset: -1024,
            flags: FrameFlags::for_memblock(SeekMode::Absolute),
        };

        let mut buf = Vec::new();
        write_frame_header(&mut buf, header)?;
        assert_eq!(buf.len(), FRAME_HEADER_SIZE);

        let got = read_frame_header(&mut &buf[..])?;
        assert_eq!(got.length, header.length);
        assert_eq!(got.channel, header.channel);
        assert_eq!(got.offset, header.offset);
        assert_eq!(got.flags, header.flags);

        Ok(())
    }
}
