//! Port types shared by the device and card info replies.

use std::ffi::CString;

use enum_primitive_derive::Primitive;

use super::props::Props;

/// Which way audio flows through a port.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PortDirection {
    /// The port is an input, i.e. part of a source.
    Input,
    /// The port is an output, i.e. part of a sink.
    Output,
}

/// Jack-detection status of a port.
#[derive(Default, Debug, Copy, Clone, Eq, PartialEq, Primitive)]
pub enum PortAvailable {
    /// This port does not support jack detection.
    #[default]
    Unknown = 0,
    /// This port is not available, likely because the jack is not plugged in.
    No = 1,
    /// This port is available, likely because the jack is plugged in.
    Yes = 2,
}

/// The kind of connector behind a port.
#[allow(missing_docs)]
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq, Primitive)]
pub enum PortType {
    #[default]
    Unknown = 0,
    Aux = 1,
    Speaker = 2,
    Headphones = 3,
    Line = 4,
    Mic = 5,
    Headset = 6,
    Handset = 7,
    Earpiece = 8,
    Spdif = 9,
    Hdmi = 10,
    Tv = 11,
    Radio = 12,
    Video = 13,
    Usb = 14,
    Bluetooth = 15,
    Portable = 16,
    Handsfree = 17,
    Car = 18,
    Hifi = 19,
    Phone = 20,
    Network = 21,
    Analog = 22,
}

/// A port on a sink or source.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PortInfo {
    /// The name of the port.
    pub name: CString,

    /// A description of the port.
    pub description: Option<CString>,

    /// The direction of the port.
    pub dir: PortDirection,

    /// The priority of the port.
    pub priority: u32,

    /// Whether the port is available.
    pub available: PortAvailable,

    /// The kind of connector behind the port.
    pub port_type: PortType,

    /// Ports in the same group share availability with each other.
    pub availability_group: Option<CString>,
}

/// A port on a card, which carries more detail than a device port.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct CardPortInfo {
    /// The name of the port.
    pub name: CString,

    /// A description of the port.
    pub description: Option<CString>,

    /// The properties of the port.
    pub props: Props,

    /// The direction of the port.
    pub dir: PortDirection,

    /// The priority of the port.
    pub priority: u32,

    /// Whether the port is available.
    pub available: PortAvailable,

    /// The kind of connector behind the port.
    pub port_type: PortType,

    /// Ports in the same group share availability with each other.
    pub availability_group: Option<CString>,

    /// The profile names that apply to the port.
    pub profiles: Vec<CString>,

    /// The latency offset of the port, added to the device latency.
    pub latency_offset: i64,
}
