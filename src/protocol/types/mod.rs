//! The typed values carried inside tagstructs.

pub mod channel_map;
pub mod format_info;
pub mod port;
pub mod props;
pub mod sample_spec;
pub mod stream;
pub mod volume;

pub use channel_map::{ChannelMap, ChannelPosition};
pub use format_info::{FormatEncoding, FormatInfo};
pub use port::{CardPortInfo, PortAvailable, PortDirection, PortInfo, PortType};
pub use props::{Prop, Props, PropsUpdateMode};
pub use sample_spec::{SampleFormat, SampleSpec, CHANNELS_MAX};
pub use stream::{BufferAttr, SeekMode, StreamFlags};
pub use volume::{ChannelVolume, Volume};
