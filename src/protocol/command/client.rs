//! Client-level commands: naming, property updates, events.

use std::ffi::CString;

use crate::protocol::{tagstruct::*, Props, PropsUpdateMode, ProtocolError};

use super::CommandReply;

/// The server reply to [`super::Command::SetClientName`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SetClientNameReply {
    /// The server-side index of the client (v13+; a plain ack before
    /// that).
    pub client_index: u32,
}

impl CommandReply for SetClientNameReply {}

impl TagStructRead for SetClientNameReply {
    fn read(ts: &mut TagStructReader<'_>, protocol_version: u16) -> Result<Self, ProtocolError> {
        Ok(Self {
            client_index: if protocol_version >= 13 {
                ts.read_u32()?
            } else {
                0
            },
        })
    }
}

impl TagStructWrite for SetClientNameReply {
    fn write(
        &self,
        w: &mut TagStructWriter<'_>,
        protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        if protocol_version >= 13 {
            w.write_u32(self.client_index)?;
        }
        Ok(())
    }
}

/// Parameters for the client-proplist update command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateClientProplistParams {
    pub mode: PropsUpdateMode,
    pub props: Props,
}

impl TagStructRead for UpdateClientProplistParams {
    fn read(ts: &mut TagStructReader<'_>, _protocol_version: u16) -> Result<Self, ProtocolError> {
        Ok(Self {
            mode: ts.read_enum()?,
            props: ts.read()?,
        })
    }
}

impl TagStructWrite for UpdateClientProplistParams {
    fn write(
        &self,
        ts: &mut TagStructWriter<'_>,
        _protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        ts.write_u32(self.mode as u32)?;
        ts.write(&self.props)?;
        Ok(())
    }
}

/// Parameters for the stream-proplist update commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateStreamProplistParams {
    /// The channel of the stream to update.
    pub channel: u32,
    pub mode: PropsUpdateMode,
    pub props: Props,
}

impl TagStructRead for UpdateStreamProplistParams {
    fn read(ts: &mut TagStructReader<'_>, _protocol_version: u16) -> Result<Self, ProtocolError> {
        Ok(Self {
            channel: ts.read_u32()?,
            mode: ts.read_enum()?,
            props: ts.read()?,
        })
    }
}

impl TagStructWrite for UpdateStreamProplistParams {
    fn write(
        &self,
        ts: &mut TagStructWriter<'_>,
        _protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        ts.write_u32(self.channel)?;
        ts.write_u32(self.mode as u32)?;
        ts.write(&self.props)?;
        Ok(())
    }
}

/// Parameters for the client-proplist removal command: the keys to drop.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RemoveClientProplistParams {
    pub keys: Vec<CString>,
}

impl TagStructRead for RemoveClientProplistParams {
    fn read(ts: &mut TagStructReader<'_>, _protocol_version: u16) -> Result<Self, ProtocolError> {
        let mut keys = Vec::new();
        while let Some(key) = ts.read_string()? {
            keys.push(key);
        }

        Ok(Self { keys })
    }
}

impl TagStructWrite for RemoveClientProplistParams {
    fn write(
        &self,
        ts: &mut TagStructWriter<'_>,
        _protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        for key in &self.keys {
            ts.write_string(Some(key))?;
        }
        ts.write_null_string()?;
        Ok(())
    }
}

/// Parameters for the stream-proplist removal commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoveStreamProplistParams {
    /// The channel of the stream to update.
    pub channel: u32,
    pub keys: Vec<CString>,
}

impl TagStructRead for RemoveStreamProplistParams {
    fn read(ts: &mut TagStructReader<'_>, _protocol_version: u16) -> Result<Self, ProtocolError> {
        let channel = ts.read_u32()?;

        let mut keys = Vec::new();
        while let Some(key) = ts.read_string()? {
            keys.push(key);
        }

        Ok(Self { channel, keys })
    }
}

impl TagStructWrite for RemoveStreamProplistParams {
    fn write(
        &self,
        ts: &mut TagStructWriter<'_>,
        _protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        ts.write_u32(self.channel)?;
        for key in &self.keys {
            ts.write_string(Some(key))?;
        }
        ts.write_null_string()?;
        Ok(())
    }
}

/// An out-of-band event delivered to a client, with a name and properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientEvent {
    pub name: CString,
    pub props: Props,
}

impl TagStructRead for ClientEvent {
    fn read(ts: &mut TagStructReader<'_>, _protocol_version: u16) -> Result<Self, ProtocolError> {
        Ok(Self {
            name: ts.read_string_non_null()?,
            props: ts.read()?,
        })
    }
}

impl TagStructWrite for ClientEvent {
    fn write(
        &self,
        ts: &mut TagStructWriter<'_>,
        _protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        ts.write_string(Some(&self.name))?;
        ts.write(&self.props)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::protocol::tagstruct::test_util::test_serde;
    use crate::protocol::Prop;

    use super::*;

    #[test]
    fn update_proplist_serde() -> anyhow::Result<()> {
        let mut props = Props::new();
        props.set(Prop::MediaName, CString::new("news")?);

        test_serde(&UpdateClientProplistParams {
            mode: PropsUpdateMode::Replace,
            props: props.clone(),
        })?;

        test_serde(&UpdateStreamProplistParams {
            channel: 3,
            mode: PropsUpdateMode::Merge,
            props,
        })
    }

    #[test]
    fn remove_proplist_serde() -> anyhow::Result<()> {
        test_serde(&RemoveClientProplistParams {
            keys: vec![CString::new("a.b")?, CString::new("c.d")?],
        })?;

        test_serde(&RemoveStreamProplistParams {
            channel: 1,
            keys: vec![CString::new("media.name")?],
        })
    }
}
