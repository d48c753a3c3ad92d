//! Event subscription.

use bitflags::bitflags;
use enum_primitive_derive::Primitive;
use num_traits::FromPrimitive as _;

use crate::protocol::{tagstruct::*, ProtocolError};

bitflags! {
    /// A mask of object kinds to receive change events for.
    #[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
    pub struct SubscriptionMask: u32 {
        const SINK = 0x0001;
        const SOURCE = 0x0002;
        const SINK_INPUT = 0x0004;
        const SOURCE_OUTPUT = 0x0008;
        const MODULE = 0x0010;
        const CLIENT = 0x0020;
        const SAMPLE_CACHE = 0x0040;
        const SERVER = 0x0080;
        const AUTOLOAD = 0x0100;
        const CARD = 0x0200;
        const ALL = 0x02ff;
    }
}

impl TagStructRead for SubscriptionMask {
    fn read(ts: &mut TagStructReader<'_>, _protocol_version: u16) -> Result<Self, ProtocolError> {
        Ok(Self::from_bits_truncate(ts.read_u32()?))
    }
}

impl TagStructWrite for SubscriptionMask {
    fn write(
        &self,
        w: &mut TagStructWriter<'_>,
        _protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        w.write_u32(self.bits())?;
        Ok(())
    }
}

/// The kind of object a subscription event refers to.
#[allow(missing_docs)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Primitive)]
pub enum SubscriptionEventFacility {
    Sink = 0,
    Source = 1,
    SinkInput = 2,
    SourceOutput = 3,
    Module = 4,
    Client = 5,
    SampleCache = 6,
    Server = 7,
    Autoload = 8,
    Card = 9,
}

impl SubscriptionEventFacility {
    /// The mask bit that selects events of this facility.
    pub fn mask_bit(&self) -> SubscriptionMask {
        SubscriptionMask::from_bits_truncate(1 << (*self as u32))
    }
}

/// What happened to the object.
#[allow(missing_docs)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Primitive)]
pub enum SubscriptionEventType {
    New = 0x00,
    Changed = 0x10,
    Removed = 0x20,
}

const FACILITY_MASK: u32 = 0x0f;
const EVENT_TYPE_MASK: u32 = 0x30;

/// A change notification pushed to subscribed clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionEvent {
    /// The kind of object the event is about.
    pub facility: SubscriptionEventFacility,

    /// What happened to the object.
    pub event_type: SubscriptionEventType,

    /// The index of the object.
    pub index: Option<u32>,
}

impl TagStructRead for SubscriptionEvent {
    fn read(ts: &mut TagStructReader<'_>, _protocol_version: u16) -> Result<Self, ProtocolError> {
        let raw = ts.read_u32()?;
        let facility = SubscriptionEventFacility::from_u32(raw & FACILITY_MASK)
            .ok_or_else(|| ProtocolError::Invalid(format!("invalid event facility: {}", raw)))?;
        let event_type = SubscriptionEventType::from_u32(raw & EVENT_TYPE_MASK)
            .ok_or_else(|| ProtocolError::Invalid(format!("invalid event type: {}", raw)))?;

        Ok(Self {
            facility,
            event_type,
            index: ts.read_index()?,
        })
    }
}

impl TagStructWrite for SubscriptionEvent {
    fn write(
        &self,
        w: &mut TagStructWriter<'_>,
        _protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        w.write_u32((self.facility as u32) | (self.event_type as u32))?;
        w.write_index(self.index)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::protocol::tagstruct::test_util::test_serde;

    use super::*;

    #[test]
    fn mask_serde() -> anyhow::Result<()> {
        test_serde(&(SubscriptionMask::SINK | SubscriptionMask::SINK_INPUT))
    }

    #[test]
    fn event_serde() -> anyhow::Result<()> {
        test_serde(&SubscriptionEvent {
            facility: SubscriptionEventFacility::SinkInput,
            event_type: SubscriptionEventType::Removed,
            index: Some(3),
        })
    }

    #[test]
    fn facility_mask_bits() {
        assert_eq!(
            SubscriptionEventFacility::Sink.mask_bit(),
            SubscriptionMask::SINK
        );
        assert_eq!(
            SubscriptionEventFacility::Card.mask_bit(),
            SubscriptionMask::CARD
        );
    }
}
