//! The handshake command and its reply.

use crate::protocol::{tagstruct::*, ProtocolError};

use super::CommandReply;

const VERSION_MASK: u32 = 0x0000_ffff;

/// Capability bit: the peer can map POSIX shared memory.
pub const FLAG_SHM: u32 = 0x8000_0000;

/// Capability bit: the peer can accept memfd-backed pools.
pub const FLAG_MEMFD: u32 = 0x4000_0000;

/// The first command on every connection: protocol version, capability bits,
/// and the authentication cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthParams {
    pub version: u16,
    pub supports_shm: bool,
    pub supports_memfd: bool,
    pub cookie: Vec<u8>,
}

impl TagStructRead for AuthParams {
    fn read(ts: &mut TagStructReader<'_>, _version: u16) -> Result<Self, ProtocolError> {
        let (flags_and_version, cookie) = (ts.read_u32()?, ts.read_arbitrary()?);

        Ok(Self {
            version: (flags_and_version & VERSION_MASK) as u16,
            supports_shm: flags_and_version & FLAG_SHM != 0,
            supports_memfd: flags_and_version & FLAG_MEMFD != 0,
            cookie,
        })
    }
}

impl TagStructWrite for AuthParams {
    fn write(&self, w: &mut TagStructWriter<'_>, _version: u16) -> Result<(), ProtocolError> {
        let flags_and_version: u32 = (self.version as u32 & VERSION_MASK)
            | if self.supports_shm { FLAG_SHM } else { 0 }
            | if self.supports_memfd { FLAG_MEMFD } else { 0 };

        w.write_u32(flags_and_version)?;
        w.write_arbitrary(self.cookie.as_slice())?;
        Ok(())
    }
}

/// The server's answer: its own version, ORed with the capability bits that
/// survived negotiation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AuthReply {
    pub version: u16,
    pub use_shm: bool,
    pub use_memfd: bool,
}

impl CommandReply for AuthReply {}

impl TagStructRead for AuthReply {
    fn read(ts: &mut TagStructReader<'_>, _version: u16) -> Result<Self, ProtocolError> {
        let reply = ts.read_u32()?;

        Ok(Self {
            version: (reply & VERSION_MASK) as u16,
            use_shm: reply & FLAG_SHM != 0,
            use_memfd: reply & FLAG_MEMFD != 0,
        })
    }
}

impl TagStructWrite for AuthReply {
    fn write(&self, w: &mut TagStructWriter<'_>, _version: u16) -> Result<(), ProtocolError> {
        let reply: u32 = self.version as u32
            | if self.use_shm { FLAG_SHM } else { 0 }
            | if self.use_memfd { FLAG_MEMFD } else { 0 };

        w.write_u32(reply)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::protocol::tagstruct::test_util::test_serde;

    use super::*;

    #[test]
    fn auth_serde() -> anyhow::Result<()> {
        test_serde(&AuthParams {
            version: 34,
            supports_shm: true,
            supports_memfd: false,
            cookie: vec![1, 2, 3, 4],
        })
    }

    #[test]
    fn auth_reply_serde() -> anyhow::Result<()> {
        test_serde(&AuthReply {
            version: 34,
            use_shm: true,
            use_memfd: true,
        })
    }
}
