//! Property lists, the free-form key-value metadata attached to clients,
//! streams, and devices.

use std::{
    collections::BTreeMap,
    ffi::{CStr, CString},
};

use byteorder::WriteBytesExt;
use enum_primitive_derive::Primitive;

use super::super::tagstruct::{Tag, TagStructRead, TagStructReader, TagStructWrite, TagStructWriter};
use crate::protocol::ProtocolError;

/// Max. size of a single property value in bytes.
const MAX_PROP_SIZE: u32 = 64 * 1024;

/// A list of key-value pairs. Keys are NUL-terminated strings and values
/// arbitrary blobs, though by convention both are usually ASCII strings.
#[derive(Default, Clone, PartialEq, Eq)]
pub struct Props(BTreeMap<Box<CStr>, Box<[u8]>>);

impl Props {
    /// Creates a new, empty property list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a well-known property, overwriting any existing value.
    pub fn set<T>(&mut self, prop: Prop, value: T)
    where
        T: AsRef<CStr>,
    {
        self.set_bytes(prop.to_c_str(), value.as_ref().to_bytes_with_nul());
    }

    /// Sets a property, overwriting any existing value.
    pub fn set_bytes<K, V>(&mut self, key: K, value: V)
    where
        K: AsRef<CStr>,
        V: AsRef<[u8]>,
    {
        self.0.insert(key.as_ref().into(), value.as_ref().into());
    }

    /// Gets the value of a well-known property.
    pub fn get(&self, prop: Prop) -> Option<&[u8]> {
        self.get_bytes(prop.to_c_str())
    }

    /// Gets a property by key.
    pub fn get_bytes<K>(&self, key: K) -> Option<&[u8]>
    where
        K: AsRef<CStr>,
    {
        self.0.get(key.as_ref()).map(|r| &r[..])
    }

    /// Removes a property by key, returning whether it was present.
    pub fn remove<K>(&mut self, key: K) -> bool
    where
        K: AsRef<CStr>,
    {
        self.0.remove(key.as_ref()).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::collections::btree_map::Iter<'_, Box<CStr>, Box<[u8]>> {
        self.0.iter()
    }

    /// Merges `other` into `self` according to `mode`.
    pub fn update(&mut self, mode: PropsUpdateMode, other: &Props) {
        match mode {
            PropsUpdateMode::Set => {
                self.0.clear();
                self.0.extend(other.0.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
            PropsUpdateMode::Merge => {
                for (k, v) in other.iter() {
                    self.0.entry(k.clone()).or_insert_with(|| v.clone());
                }
            }
            PropsUpdateMode::Replace => {
                self.0.extend(other.0.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
        }
    }
}

impl std::fmt::Debug for Props {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut dm = f.debug_map();
        let raw = CString::new("<bytes>").unwrap();

        for (k, v) in self.0.iter() {
            match CStr::from_bytes_with_nul(v) {
                Ok(s) => dm.entry(k, &s),
                Err(_) => dm.entry(k, &raw),
            };
        }

        dm.finish()
    }
}

/// Well-known property list keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[non_exhaustive]
pub enum Prop {
    /// For streams: localized media name, e.g. "Civil War".
    MediaName,
    /// For streams: source filename, e.g. "/home/user/music/foo.ogg".
    MediaFilename,
    /// For streams: a general role, e.g. "music" or "phone".
    MediaRole,
    /// For clients/streams: localized application name, e.g. "Totem".
    ApplicationName,
    /// For clients/streams: application process id.
    ApplicationProcessId,
    /// For clients/streams: application user name.
    ApplicationProcessUser,
    /// For clients/streams: application host name.
    ApplicationProcessHost,
    /// For devices: device string, e.g. "front:0".
    DeviceString,
    /// For devices: localized device description.
    DeviceDescription,
    /// For devices: device class, e.g. "sound" or "monitor".
    DeviceClass,
}

impl Prop {
    /// The canonical key string for the property.
    pub fn to_c_str(&self) -> &'static CStr {
        let s: &'static [u8] = match self {
            Prop::MediaName => b"media.name\0",
            Prop::MediaFilename => b"media.filename\0",
            Prop::MediaRole => b"media.role\0",
            Prop::ApplicationName => b"application.name\0",
            Prop::ApplicationProcessId => b"application.process.id\0",
            Prop::ApplicationProcessUser => b"application.process.user\0",
            Prop::ApplicationProcessHost => b"application.process.host\0",
            Prop::DeviceString => b"device.string\0",
            Prop::DeviceDescription => b"device.description\0",
            Prop::DeviceClass => b"device.class\0",
        };

        CStr::from_bytes_with_nul(s).unwrap()
    }
}

/// How a property-list update applies on top of the existing list. The
/// numeric values are part of the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Primitive)]
pub enum PropsUpdateMode {
    /// Replace the entire list with the new one.
    Set = 0,
    /// Add new entries, keeping existing values.
    Merge = 1,
    /// Add new entries, overwriting existing values.
    Replace = 2,
}

impl TagStructRead for Props {
    fn read(ts: &mut TagStructReader<'_>, _protocol_version: u16) -> Result<Self, ProtocolError> {
        ts.expect_tag(Tag::PropList)?;

        let mut props = Props::new();
        while let Some(key) = ts.read_string()? {
            if key.to_bytes().is_empty() {
                return Err(ProtocolError::Invalid("proplist key is empty".into()));
            }

            let len = ts.read_u32()?;
            if len > MAX_PROP_SIZE {
                return Err(ProtocolError::Invalid(format!(
                    "proplist value size {} exceeds hard limit of {} bytes",
                    len, MAX_PROP_SIZE
                )));
            }

            let value = ts.read_arbitrary()?;
            if len != value.len() as u32 {
                return Err(ProtocolError::Invalid(format!(
                    "proplist expected value size {} does not match actual size {}",
                    len,
                    value.len()
                )));
            }

            props.set_bytes(key, value.into_boxed_slice());
        }

        Ok(props)
    }
}

impl TagStructWrite for Props {
    fn write(
        &self,
        w: &mut TagStructWriter<'_>,
        _protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        w.inner.write_u8(Tag::PropList as u8)?;

        for (k, v) in self.iter() {
            w.write_string(Some(k))?;
            w.write_u32(v.len() as u32)?;
            w.write_arbitrary(v)?;
        }

        w.write_null_string()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::protocol::tagstruct::test_util::test_serde;

    use super::*;

    #[test]
    fn props_serde() -> anyhow::Result<()> {
        let mut props = Props::new();
        props.set(Prop::ApplicationName, CString::new("totem")?);
        props.set_bytes(CString::new("x.custom")?, b"blob\xff");

        test_serde(&props)
    }

    #[test]
    fn update_modes() -> anyhow::Result<()> {
        let mut base = Props::new();
        base.set(Prop::MediaName, CString::new("a")?);

        let mut new = Props::new();
        new.set(Prop::MediaName, CString::new("b")?);
        new.set(Prop::MediaRole, CString::new("music")?);

        let mut merged = base.clone();
        merged.update(PropsUpdateMode::Merge, &new);
        assert_eq!(merged.get(Prop::MediaName), Some(&b"a\0"[..]));
        assert_eq!(merged.get(Prop::MediaRole), Some(&b"music\0"[..]));

        let mut replaced = base.clone();
        replaced.update(PropsUpdateMode::Replace, &new);
        assert_eq!(replaced.get(Prop::MediaName), Some(&b"b\0"[..]));

        let mut set = base;
        set.update(PropsUpdateMode::Set, &new);
        assert_eq!(set.iter().count(), 2);

        Ok(())
    }
}
