//! The typed command set carried in control packets.

use std::ffi::CString;
use std::io::{BufRead, Cursor, Write};

use enum_primitive_derive::Primitive;
use num_traits::FromPrimitive as _;

mod auth;
mod client;
mod device_info;
mod device_ops;
mod events;
mod latency;
mod misc_info;
mod sample_cache;
mod stream;
mod stream_info;
mod subscribe;

pub use auth::{AuthParams, AuthReply, FLAG_MEMFD, FLAG_SHM};
pub use client::*;
pub use device_info::*;
pub use device_ops::*;
pub use events::*;
pub use latency::*;
pub use misc_info::*;
pub use sample_cache::*;
pub use stream::*;
pub use stream_info::*;
pub use subscribe::*;

use super::{tagstruct::*, Props, ProtocolError};

/// The opcode of a command. The numeric values are part of the wire format.
#[allow(missing_docs)]
#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Primitive)]
pub enum CommandTag {
    /* Generic */
    Error = 0,
    Timeout = 1, /* pseudo command */
    Reply = 2,

    /* client -> server */
    CreatePlaybackStream = 3,
    DeletePlaybackStream = 4,
    CreateRecordStream = 5,
    DeleteRecordStream = 6,
    Exit = 7,
    Auth = 8,
    SetClientName = 9,
    LookupSink = 10,
    LookupSource = 11,
    DrainPlaybackStream = 12,
    Stat = 13,
    GetPlaybackLatency = 14,
    CreateUploadStream = 15,
    DeleteUploadStream = 16,
    FinishUploadStream = 17,
    PlaySample = 18,
    RemoveSample = 19,

    GetServerInfo = 20,
    GetSinkInfo = 21,
    GetSinkInfoList = 22,
    GetSourceInfo = 23,
    GetSourceInfoList = 24,
    GetModuleInfo = 25,
    GetModuleInfoList = 26,
    GetClientInfo = 27,
    GetClientInfoList = 28,
    GetSinkInputInfo = 29,
    GetSinkInputInfoList = 30,
    GetSourceOutputInfo = 31,
    GetSourceOutputInfoList = 32,
    GetSampleInfo = 33,
    GetSampleInfoList = 34,
    Subscribe = 35,

    SetSinkVolume = 36,
    SetSinkInputVolume = 37,
    SetSourceVolume = 38,

    SetSinkMute = 39,
    SetSourceMute = 40,

    CorkPlaybackStream = 41,
    FlushPlaybackStream = 42,
    TriggerPlaybackStream = 43,

    SetDefaultSink = 44,
    SetDefaultSource = 45,

    SetPlaybackStreamName = 46,
    SetRecordStreamName = 47,

    KillClient = 48,
    KillSinkInput = 49,
    KillSourceOutput = 50,

    LoadModule = 51,
    UnloadModule = 52,

    /* obsolete autoload commands; decoded but answered with an error */
    AddAutoloadObsolete = 53,
    RemoveAutoloadObsolete = 54,
    GetAutoloadInfoObsolete = 55,
    GetAutoloadInfoListObsolete = 56,

    GetRecordLatency = 57,
    CorkRecordStream = 58,
    FlushRecordStream = 59,
    PrebufPlaybackStream = 60,

    /* server -> client */
    Request = 61,
    Overflow = 62,
    Underflow = 63,
    PlaybackStreamKilled = 64,
    RecordStreamKilled = 65,
    SubscribeEvent = 66,

    /* since v10 */
    MoveSinkInput = 67,
    MoveSourceOutput = 68,

    /* since v11 */
    SetSinkInputMute = 69,

    SuspendSink = 70,
    SuspendSource = 71,

    /* since v12 */
    SetPlaybackStreamBufferAttr = 72,
    SetRecordStreamBufferAttr = 73,

    UpdatePlaybackStreamSampleRate = 74,
    UpdateRecordStreamSampleRate = 75,

    /* server -> client */
    PlaybackStreamSuspended = 76,
    RecordStreamSuspended = 77,
    PlaybackStreamMoved = 78,
    RecordStreamMoved = 79,

    /* since v13 */
    UpdateRecordStreamProplist = 80,
    UpdatePlaybackStreamProplist = 81,
    UpdateClientProplist = 82,
    RemoveRecordStreamProplist = 83,
    RemovePlaybackStreamProplist = 84,
    RemoveClientProplist = 85,

    /* server -> client */
    Started = 86,

    /* since v14 */
    Extension = 87,

    /* since v15 */
    GetCardInfo = 88,
    GetCardInfoList = 89,
    SetCardProfile = 90,

    ClientEvent = 91,
    PlaybackStreamEvent = 92,
    RecordStreamEvent = 93,

    /* server -> client */
    PlaybackBufferAttrChanged = 94,
    RecordBufferAttrChanged = 95,

    /* since v16 */
    SetSinkPort = 96,
    SetSourcePort = 97,

    /* since v22 */
    SetSourceOutputVolume = 98,
    SetSourceOutputMute = 99,

    /* since v27 */
    SetPortLatencyOffset = 100,

    /* since v30; both directions */
    EnableSrbchannel = 101,
    DisableSrbchannel = 102,

    /* since v31; both directions */
    RegisterMemfdShmid = 103,
}

impl TagStructRead for CommandTag {
    fn read(r: &mut TagStructReader<'_>, _protocol_version: u16) -> Result<Self, ProtocolError> {
        let v = r.read_u32()?;

        CommandTag::from_u32(v)
            .ok_or_else(|| ProtocolError::Invalid(format!("invalid command opcode: {}", v)))
    }
}

impl TagStructWrite for CommandTag {
    fn write(
        &self,
        w: &mut TagStructWriter<'_>,
        _protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        w.write_u32(*self as u32)?;
        Ok(())
    }
}

/// A marker trait for reply payloads.
pub trait CommandReply: TagStructRead + TagStructWrite {}

/// A decoded command with its typed arguments.
#[allow(missing_docs)]
#[derive(Debug)]
pub enum Command {
    /// A reply to some other command. The payload has yet to be read when
    /// this is returned by [`Command::read_tag_prefixed`].
    Reply,

    /* session */
    Auth(AuthParams),
    SetClientName(Props),
    Exit,

    /* streams */
    CreatePlaybackStream(PlaybackStreamParams),
    DeletePlaybackStream(u32),
    CreateRecordStream(RecordStreamParams),
    DeleteRecordStream(u32),
    DrainPlaybackStream(u32),
    GetPlaybackLatency(LatencyParams),
    GetRecordLatency(LatencyParams),
    CorkPlaybackStream(CorkStreamParams),
    CorkRecordStream(CorkStreamParams),
    FlushPlaybackStream(u32),
    FlushRecordStream(u32),
    TriggerPlaybackStream(u32),
    PrebufPlaybackStream(u32),
    SetPlaybackStreamName(SetStreamNameParams),
    SetRecordStreamName(SetStreamNameParams),
    SetPlaybackStreamBufferAttr(SetPlaybackStreamBufferAttrParams),
    SetRecordStreamBufferAttr(SetRecordStreamBufferAttrParams),
    UpdatePlaybackStreamSampleRate(UpdateStreamSampleRateParams),
    UpdateRecordStreamSampleRate(UpdateStreamSampleRateParams),
    UpdatePlaybackStreamProplist(UpdateStreamProplistParams),
    UpdateRecordStreamProplist(UpdateStreamProplistParams),
    RemovePlaybackStreamProplist(RemoveStreamProplistParams),
    RemoveRecordStreamProplist(RemoveStreamProplistParams),
    MoveSinkInput(MoveStreamParams),
    MoveSourceOutput(MoveStreamParams),

    /* sample cache */
    CreateUploadStream(UploadStreamParams),
    DeleteUploadStream(u32),
    FinishUploadStream(u32),
    PlaySample(PlaySampleParams),
    RemoveSample(CString),

    /* introspection */
    GetServerInfo,
    Stat,
    LookupSink(CString),
    LookupSource(CString),
    GetSinkInfo(GetDeviceInfo),
    GetSinkInfoList,
    GetSourceInfo(GetDeviceInfo),
    GetSourceInfoList,
    GetModuleInfo(u32),
    GetModuleInfoList,
    GetClientInfo(u32),
    GetClientInfoList,
    GetSinkInputInfo(u32),
    GetSinkInputInfoList,
    GetSourceOutputInfo(u32),
    GetSourceOutputInfoList,
    GetSampleInfo(u32),
    GetSampleInfoList,
    GetCardInfo(GetDeviceInfo),
    GetCardInfoList,
    Subscribe(SubscriptionMask),

    /* device and stream mutations */
    SetSinkVolume(SetDeviceVolumeParams),
    SetSourceVolume(SetDeviceVolumeParams),
    SetSinkInputVolume(SetStreamVolumeParams),
    SetSourceOutputVolume(SetStreamVolumeParams),
    SetSinkMute(SetDeviceMuteParams),
    SetSourceMute(SetDeviceMuteParams),
    SetSinkInputMute(SetStreamMuteParams),
    SetSourceOutputMute(SetStreamMuteParams),
    SuspendSink(SuspendDeviceParams),
    SuspendSource(SuspendDeviceParams),
    SetDefaultSink(Option<CString>),
    SetDefaultSource(Option<CString>),
    KillClient(u32),
    KillSinkInput(u32),
    KillSourceOutput(u32),
    LoadModule(LoadModuleParams),
    UnloadModule(u32),
    SetCardProfile(SetCardProfileParams),
    SetSinkPort(SetPortParams),
    SetSourcePort(SetPortParams),
    SetPortLatencyOffset(SetPortLatencyOffsetParams),

    /* client proplist */
    UpdateClientProplist(UpdateClientProplistParams),
    RemoveClientProplist(RemoveClientProplistParams),

    /* extensions */
    Extension(ExtensionParams),

    /* shared memory negotiation; both directions */
    EnableSrbchannel,
    DisableSrbchannel,
    RegisterMemfdShmid(u32),

    /* server -> client notifications */
    Request(Request),
    Overflow(u32),
    Underflow(Underflow),
    PlaybackStreamKilled(u32),
    RecordStreamKilled(u32),
    Started(u32),
    SubscribeEvent(SubscriptionEvent),
    PlaybackStreamSuspended(StreamSuspended),
    RecordStreamSuspended(StreamSuspended),
    PlaybackStreamMoved(PlaybackStreamMoved),
    RecordStreamMoved(RecordStreamMoved),
    PlaybackBufferAttrChanged(PlaybackBufferAttrChanged),
    ClientEvent(ClientEvent),
    PlaybackStreamEvent(StreamEvent),
    RecordStreamEvent(StreamEvent),
}

/// Parses the opcode and sequence number off the front of a control packet
/// payload without decoding the arguments.
pub fn peek_command_header(payload: &[u8]) -> Option<(u32, u32)> {
    let mut cursor = Cursor::new(payload);
    let mut ts = TagStructReader::new(&mut cursor, 0);
    let opcode = ts.read_u32().ok()?;
    let seq = ts.read_u32().ok()?;
    Some((opcode, seq))
}

impl Command {
    /// Reads a `(seq, command)` pair from a control packet payload.
    pub fn read_tag_prefixed<R: BufRead>(
        r: &mut R,
        protocol_version: u16,
    ) -> Result<(u32, Self), ProtocolError> {
        let mut ts = TagStructReader::new(r, protocol_version);
        let (opcode, seq) = (ts.read_enum()?, ts.read_u32()?);

        let cmd = match opcode {
            CommandTag::Error => Err(ProtocolError::PeerError(ts.read_enum()?)),
            CommandTag::Timeout => Err(ProtocolError::Timeout),
            CommandTag::Reply => Ok(Command::Reply),

            CommandTag::Auth => Ok(Command::Auth(ts.read()?)),
            CommandTag::SetClientName => Ok(Command::SetClientName(ts.read()?)),
            CommandTag::Exit => Ok(Command::Exit),

            CommandTag::CreatePlaybackStream => Ok(Command::CreatePlaybackStream(ts.read()?)),
            CommandTag::DeletePlaybackStream => Ok(Command::DeletePlaybackStream(ts.read_u32()?)),
            CommandTag::CreateRecordStream => Ok(Command::CreateRecordStream(ts.read()?)),
            CommandTag::DeleteRecordStream => Ok(Command::DeleteRecordStream(ts.read_u32()?)),
            CommandTag::DrainPlaybackStream => Ok(Command::DrainPlaybackStream(ts.read_u32()?)),
            CommandTag::GetPlaybackLatency => Ok(Command::GetPlaybackLatency(ts.read()?)),
            CommandTag::GetRecordLatency => Ok(Command::GetRecordLatency(ts.read()?)),
            CommandTag::CorkPlaybackStream => Ok(Command::CorkPlaybackStream(ts.read()?)),
            CommandTag::CorkRecordStream => Ok(Command::CorkRecordStream(ts.read()?)),
            CommandTag::FlushPlaybackStream => Ok(Command::FlushPlaybackStream(ts.read_u32()?)),
            CommandTag::FlushRecordStream => Ok(Command::FlushRecordStream(ts.read_u32()?)),
            CommandTag::TriggerPlaybackStream => Ok(Command::TriggerPlaybackStream(ts.read_u32()?)),
            CommandTag::PrebufPlaybackStream => Ok(Command::PrebufPlaybackStream(ts.read_u32()?)),
            CommandTag::SetPlaybackStreamName => Ok(Command::SetPlaybackStreamName(ts.read()?)),
            CommandTag::SetRecordStreamName => Ok(Command::SetRecordStreamName(ts.read()?)),
            CommandTag::SetPlaybackStreamBufferAttr => {
                Ok(Command::SetPlaybackStreamBufferAttr(ts.read()?))
            }
            CommandTag::SetRecordStreamBufferAttr => {
                Ok(Command::SetRecordStreamBufferAttr(ts.read()?))
            }
            CommandTag::UpdatePlaybackStreamSampleRate => {
                Ok(Command::UpdatePlaybackStreamSampleRate(ts.read()?))
            }
            CommandTag::UpdateRecordStreamSampleRate => {
                Ok(Command::UpdateRecordStreamSampleRate(ts.read()?))
            }
            CommandTag::UpdatePlaybackStreamProplist => {
                Ok(Command::UpdatePlaybackStreamProplist(ts.read()?))
            }
            CommandTag::UpdateRecordStreamProplist => {
                Ok(Command::UpdateRecordStreamProplist(ts.read()?))
            }
            CommandTag::RemovePlaybackStreamProplist => {
                Ok(Command::RemovePlaybackStreamProplist(ts.read()?))
            }
            CommandTag::RemoveRecordStreamProplist => {
                Ok(Command::RemoveRecordStreamProplist(ts.read()?))
            }
            CommandTag::MoveSinkInput => Ok(Command::MoveSinkInput(ts.read()?)),
            CommandTag::MoveSourceOutput => Ok(Command::MoveSourceOutput(ts.read()?)),

            CommandTag::CreateUploadStream => Ok(Command::CreateUploadStream(ts.read()?)),
            CommandTag::DeleteUploadStream => Ok(Command::DeleteUploadStream(ts.read_u32()?)),
            CommandTag::FinishUploadStream => Ok(Command::FinishUploadStream(ts.read_u32()?)),
            CommandTag::PlaySample => Ok(Command::PlaySample(ts.read()?)),
            CommandTag::RemoveSample => Ok(Command::RemoveSample(ts.read_string_non_null()?)),

            CommandTag::GetServerInfo => Ok(Command::GetServerInfo),
            CommandTag::Stat => Ok(Command::Stat),
            CommandTag::LookupSink => Ok(Command::LookupSink(ts.read_string_non_null()?)),
            CommandTag::LookupSource => Ok(Command::LookupSource(ts.read_string_non_null()?)),
            CommandTag::GetSinkInfo => Ok(Command::GetSinkInfo(ts.read()?)),
            CommandTag::GetSinkInfoList => Ok(Command::GetSinkInfoList),
            CommandTag::GetSourceInfo => Ok(Command::GetSourceInfo(ts.read()?)),
            CommandTag::GetSourceInfoList => Ok(Command::GetSourceInfoList),
            CommandTag::GetModuleInfo => Ok(Command::GetModuleInfo(ts.read_u32()?)),
            CommandTag::GetModuleInfoList => Ok(Command::GetModuleInfoList),
            CommandTag::GetClientInfo => Ok(Command::GetClientInfo(ts.read_u32()?)),
            CommandTag::GetClientInfoList => Ok(Command::GetClientInfoList),
            CommandTag::GetSinkInputInfo => Ok(Command::GetSinkInputInfo(ts.read_u32()?)),
            CommandTag::GetSinkInputInfoList => Ok(Command::GetSinkInputInfoList),
            CommandTag::GetSourceOutputInfo => Ok(Command::GetSourceOutputInfo(ts.read_u32()?)),
            CommandTag::GetSourceOutputInfoList => Ok(Command::GetSourceOutputInfoList),
            CommandTag::GetSampleInfo => Ok(Command::GetSampleInfo(ts.read_u32()?)),
            CommandTag::GetSampleInfoList => Ok(Command::GetSampleInfoList),
            CommandTag::GetCardInfo => Ok(Command::GetCardInfo(ts.read()?)),
            CommandTag::GetCardInfoList => Ok(Command::GetCardInfoList),
            CommandTag::Subscribe => Ok(Command::Subscribe(ts.read()?)),

            CommandTag::SetSinkVolume => Ok(Command::SetSinkVolume(ts.read()?)),
            CommandTag::SetSourceVolume => Ok(Command::SetSourceVolume(ts.read()?)),
            CommandTag::SetSinkInputVolume => Ok(Command::SetSinkInputVolume(ts.read()?)),
            CommandTag::SetSourceOutputVolume => Ok(Command::SetSourceOutputVolume(ts.read()?)),
            CommandTag::SetSinkMute => Ok(Command::SetSinkMute(ts.read()?)),
            CommandTag::SetSourceMute => Ok(Command::SetSourceMute(ts.read()?)),
            CommandTag::SetSinkInputMute => Ok(Command::SetSinkInputMute(ts.read()?)),
            CommandTag::SetSourceOutputMute => Ok(Command::SetSourceOutputMute(ts.read()?)),
            CommandTag::SuspendSink => Ok(Command::SuspendSink(ts.read()?)),
            CommandTag::SuspendSource => Ok(Command::SuspendSource(ts.read()?)),
            CommandTag::SetDefaultSink => Ok(Command::SetDefaultSink(ts.read_string()?)),
            CommandTag::SetDefaultSource => Ok(Command::SetDefaultSource(ts.read_string()?)),
            CommandTag::KillClient => Ok(Command::KillClient(ts.read_u32()?)),
            CommandTag::KillSinkInput => Ok(Command::KillSinkInput(ts.read_u32()?)),
            CommandTag::KillSourceOutput => Ok(Command::KillSourceOutput(ts.read_u32()?)),
            CommandTag::LoadModule => Ok(Command::LoadModule(ts.read()?)),
            CommandTag::UnloadModule => Ok(Command::UnloadModule(ts.read_u32()?)),
            CommandTag::SetCardProfile => Ok(Command::SetCardProfile(ts.read()?)),
            CommandTag::SetSinkPort => Ok(Command::SetSinkPort(ts.read()?)),
            CommandTag::SetSourcePort => Ok(Command::SetSourcePort(ts.read()?)),
            CommandTag::SetPortLatencyOffset => Ok(Command::SetPortLatencyOffset(ts.read()?)),

            CommandTag::UpdateClientProplist => Ok(Command::UpdateClientProplist(ts.read()?)),
            CommandTag::RemoveClientProplist => Ok(Command::RemoveClientProplist(ts.read()?)),

            CommandTag::Extension => Ok(Command::Extension(ts.read()?)),

            CommandTag::EnableSrbchannel => Ok(Command::EnableSrbchannel),
            CommandTag::DisableSrbchannel => Ok(Command::DisableSrbchannel),
            CommandTag::RegisterMemfdShmid => Ok(Command::RegisterMemfdShmid(ts.read_u32()?)),

            CommandTag::Request => Ok(Command::Request(ts.read()?)),
            CommandTag::Overflow => Ok(Command::Overflow(ts.read_u32()?)),
            CommandTag::Underflow => Ok(Command::Underflow(ts.read()?)),
            CommandTag::PlaybackStreamKilled => Ok(Command::PlaybackStreamKilled(ts.read_u32()?)),
            CommandTag::RecordStreamKilled => Ok(Command::RecordStreamKilled(ts.read_u32()?)),
            CommandTag::Started => Ok(Command::Started(ts.read_u32()?)),
            CommandTag::SubscribeEvent => Ok(Command::SubscribeEvent(ts.read()?)),
            CommandTag::PlaybackStreamSuspended => Ok(Command::PlaybackStreamSuspended(ts.read()?)),
            CommandTag::RecordStreamSuspended => Ok(Command::RecordStreamSuspended(ts.read()?)),
            CommandTag::PlaybackStreamMoved => Ok(Command::PlaybackStreamMoved(ts.read()?)),
            CommandTag::RecordStreamMoved => Ok(Command::RecordStreamMoved(ts.read()?)),
            CommandTag::PlaybackBufferAttrChanged => {
                Ok(Command::PlaybackBufferAttrChanged(ts.read()?))
            }
            CommandTag::ClientEvent => Ok(Command::ClientEvent(ts.read()?)),
            CommandTag::PlaybackStreamEvent => Ok(Command::PlaybackStreamEvent(ts.read()?)),
            CommandTag::RecordStreamEvent => Ok(Command::RecordStreamEvent(ts.read()?)),

            CommandTag::AddAutoloadObsolete
            | CommandTag::RemoveAutoloadObsolete
            | CommandTag::GetAutoloadInfoObsolete
            | CommandTag::GetAutoloadInfoListObsolete
            | CommandTag::RecordBufferAttrChanged => Err(ProtocolError::Unimplemented(opcode)),
        }?;

        Ok((seq, cmd))
    }

    /// Writes the command as a `(opcode, seq, args)` tagstruct.
    pub fn write_tag_prefixed<W: Write>(
        &self,
        seq: u32,
        w: &mut W,
        protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        let mut ts = TagStructWriter::new(w, protocol_version);

        ts.write_u32(self.tag() as u32)?;
        ts.write_u32(seq)?;
        ts.write(self)?;

        Ok(())
    }

    /// The opcode for this command.
    pub fn tag(&self) -> CommandTag {
        match self {
            Command::Reply => CommandTag::Reply,

            Command::Auth(_) => CommandTag::Auth,
            Command::SetClientName(_) => CommandTag::SetClientName,
            Command::Exit => CommandTag::Exit,

            Command::CreatePlaybackStream(_) => CommandTag::CreatePlaybackStream,
            Command::DeletePlaybackStream(_) => CommandTag::DeletePlaybackStream,
            Command::CreateRecordStream(_) => CommandTag::CreateRecordStream,
            Command::DeleteRecordStream(_) => CommandTag::DeleteRecordStream,
            Command::DrainPlaybackStream(_) => CommandTag::DrainPlaybackStream,
            Command::GetPlaybackLatency(_) => CommandTag::GetPlaybackLatency,
            Command::GetRecordLatency(_) => CommandTag::GetRecordLatency,
            Command::CorkPlaybackStream(_) => CommandTag::CorkPlaybackStream,
            Command::CorkRecordStream(_) => CommandTag::CorkRecordStream,
            Command::FlushPlaybackStream(_) => CommandTag::FlushPlaybackStream,
            Command::FlushRecordStream(_) => CommandTag::FlushRecordStream,
            Command::TriggerPlaybackStream(_) => CommandTag::TriggerPlaybackStream,
            Command::PrebufPlaybackStream(_) => CommandTag::PrebufPlaybackStream,
            Command::SetPlaybackStreamName(_) => CommandTag::SetPlaybackStreamName,
            Command::SetRecordStreamName(_) => CommandTag::SetRecordStreamName,
            Command::SetPlaybackStreamBufferAttr(_) => CommandTag::SetPlaybackStreamBufferAttr,
            Command::SetRecordStreamBufferAttr(_) => CommandTag::SetRecordStreamBufferAttr,
            Command::UpdatePlaybackStreamSampleRate(_) => {
                CommandTag::UpdatePlaybackStreamSampleRate
            }
            Command::UpdateRecordStreamSampleRate(_) => CommandTag::UpdateRecordStreamSampleRate,
            Command::UpdatePlaybackStreamProplist(_) => CommandTag::UpdatePlaybackStreamProplist,
            Command::UpdateRecordStreamProplist(_) => CommandTag::UpdateRecordStreamProplist,
            Command::RemovePlaybackStreamProplist(_) => CommandTag::RemovePlaybackStreamProplist,
            Command::RemoveRecordStreamProplist(_) => CommandTag::RemoveRecordStreamProplist,
            Command::MoveSinkInput(_) => CommandTag::MoveSinkInput,
            Command::MoveSourceOutput(_) => CommandTag::MoveSourceOutput,

            Command::CreateUploadStream(_) => CommandTag::CreateUploadStream,
            Command::DeleteUploadStream(_) => CommandTag::DeleteUploadStream,
            Command::FinishUploadStream(_) => CommandTag::FinishUploadStream,
            Command::PlaySample(_) => CommandTag::PlaySample,
            Command::RemoveSample(_) => CommandTag::RemoveSample,

            Command::GetServerInfo => CommandTag::GetServerInfo,
            Command::Stat => CommandTag::Stat,
            Command::LookupSink(_) => CommandTag::LookupSink,
            Command::LookupSource(_) => CommandTag::LookupSource,
            Command::GetSinkInfo(_) => CommandTag::GetSinkInfo,
            Command::GetSinkInfoList => CommandTag::GetSinkInfoList,
            Command::GetSourceInfo(_) => CommandTag::GetSourceInfo,
            Command::GetSourceInfoList => CommandTag::GetSourceInfoList,
            Command::GetModuleInfo(_) => CommandTag::GetModuleInfo,
            Command::GetModuleInfoList => CommandTag::GetModuleInfoList,
            Command::GetClientInfo(_) => CommandTag::GetClientInfo,
            Command::GetClientInfoList => CommandTag::GetClientInfoList,
            Command::GetSinkInputInfo(_) => CommandTag::GetSinkInputInfo,
            Command::GetSinkInputInfoList => CommandTag::GetSinkInputInfoList,
            Command::GetSourceOutputInfo(_) => CommandTag::GetSourceOutputInfo,
            Command::GetSourceOutputInfoList => CommandTag::GetSourceOutputInfoList,
            Command::GetSampleInfo(_) => CommandTag::GetSampleInfo,
            Command::GetSampleInfoList => CommandTag::GetSampleInfoList,
            Command::GetCardInfo(_) => CommandTag::GetCardInfo,
            Command::GetCardInfoList => CommandTag::GetCardInfoList,
            Command::Subscribe(_) => CommandTag::Subscribe,

            Command::SetSinkVolume(_) => CommandTag::SetSinkVolume,
            Command::SetSourceVolume(_) => CommandTag::SetSourceVolume,
            Command::SetSinkInputVolume(_) => CommandTag::SetSinkInputVolume,
            Command::SetSourceOutputVolume(_) => CommandTag::SetSourceOutputVolume,
            Command::SetSinkMute(_) => CommandTag::SetSinkMute,
            Command::SetSourceMute(_) => CommandTag::SetSourceMute,
            Command::SetSinkInputMute(_) => CommandTag::SetSinkInputMute,
            Command::SetSourceOutputMute(_) => CommandTag::SetSourceOutputMute,
            Command::SuspendSink(_) => CommandTag::SuspendSink,
            Command::SuspendSource(_) => CommandTag::SuspendSource,
            Command::SetDefaultSink(_) => CommandTag::SetDefaultSink,
            Command::SetDefaultSource(_) => CommandTag::SetDefaultSource,
            Command::KillClient(_) => CommandTag::KillClient,
            Command::KillSinkInput(_) => CommandTag::KillSinkInput,
            Command::KillSourceOutput(_) => CommandTag::KillSourceOutput,
            Command::LoadModule(_) => CommandTag::LoadModule,
            Command::UnloadModule(_) => CommandTag::UnloadModule,
            Command::SetCardProfile(_) => CommandTag::SetCardProfile,
            Command::SetSinkPort(_) => CommandTag::SetSinkPort,
            Command::SetSourcePort(_) => CommandTag::SetSourcePort,
            Command::SetPortLatencyOffset(_) => CommandTag::SetPortLatencyOffset,

            Command::UpdateClientProplist(_) => CommandTag::UpdateClientProplist,
            Command::RemoveClientProplist(_) => CommandTag::RemoveClientProplist,

            Command::Extension(_) => CommandTag::Extension,

            Command::EnableSrbchannel => CommandTag::EnableSrbchannel,
            Command::DisableSrbchannel => CommandTag::DisableSrbchannel,
            Command::RegisterMemfdShmid(_) => CommandTag::RegisterMemfdShmid,

            Command::Request(_) => CommandTag::Request,
            Command::Overflow(_) => CommandTag::Overflow,
            Command::Underflow(_) => CommandTag::Underflow,
            Command::PlaybackStreamKilled(_) => CommandTag::PlaybackStreamKilled,
            Command::RecordStreamKilled(_) => CommandTag::RecordStreamKilled,
            Command::Started(_) => CommandTag::Started,
            Command::SubscribeEvent(_) => CommandTag::SubscribeEvent,
            Command::PlaybackStreamSuspended(_) => CommandTag::PlaybackStreamSuspended,
            Command::RecordStreamSuspended(_) => CommandTag::RecordStreamSuspended,
            Command::PlaybackStreamMoved(_) => CommandTag::PlaybackStreamMoved,
            Command::RecordStreamMoved(_) => CommandTag::RecordStreamMoved,
            Command::PlaybackBufferAttrChanged(_) => CommandTag::PlaybackBufferAttrChanged,
            Command::ClientEvent(_) => CommandTag::ClientEvent,
            Command::PlaybackStreamEvent(_) => CommandTag::PlaybackStreamEvent,
            Command::RecordStreamEvent(_) => CommandTag::RecordStreamEvent,
        }
    }
}

impl TagStructWrite for Command {
    fn write(
        &self,
        w: &mut TagStructWriter<'_>,
        _protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        match self {
            Command::Reply
            | Command::Exit
            | Command::GetServerInfo
            | Command::Stat
            | Command::GetSinkInfoList
            | Command::GetSourceInfoList
            | Command::GetModuleInfoList
            | Command::GetClientInfoList
            | Command::GetSinkInputInfoList
            | Command::GetSourceOutputInfoList
            | Command::GetSampleInfoList
            | Command::GetCardInfoList
            | Command::EnableSrbchannel
            | Command::DisableSrbchannel => Ok(()),

            Command::Auth(p) => w.write(p),
            Command::SetClientName(p) => w.write(p),

            Command::CreatePlaybackStream(p) => w.write(p),
            Command::DeletePlaybackStream(chan) => w.write_u32(*chan),
            Command::CreateRecordStream(p) => w.write(p),
            Command::DeleteRecordStream(chan) => w.write_u32(*chan),
            Command::DrainPlaybackStream(chan) => w.write_u32(*chan),
            Command::GetPlaybackLatency(p) => w.write(p),
            Command::GetRecordLatency(p) => w.write(p),
            Command::CorkPlaybackStream(p) => w.write(p),
            Command::CorkRecordStream(p) => w.write(p),
            Command::FlushPlaybackStream(chan) => w.write_u32(*chan),
            Command::FlushRecordStream(chan) => w.write_u32(*chan),
            Command::TriggerPlaybackStream(chan) => w.write_u32(*chan),
            Command::PrebufPlaybackStream(chan) => w.write_u32(*chan),
            Command::SetPlaybackStreamName(p) => w.write(p),
            Command::SetRecordStreamName(p) => w.write(p),
            Command::SetPlaybackStreamBufferAttr(p) => w.write(p),
            Command::SetRecordStreamBufferAttr(p) => w.write(p),
            Command::UpdatePlaybackStreamSampleRate(p) => w.write(p),
            Command::UpdateRecordStreamSampleRate(p) => w.write(p),
            Command::UpdatePlaybackStreamProplist(p) => w.write(p),
            Command::UpdateRecordStreamProplist(p) => w.write(p),
            Command::RemovePlaybackStreamProplist(p) => w.write(p),
            Command::RemoveRecordStreamProplist(p) => w.write(p),
            Command::MoveSinkInput(p) => w.write(p),
            Command::MoveSourceOutput(p) => w.write(p),

            Command::CreateUploadStream(p) => w.write(p),
            Command::DeleteUploadStream(chan) => w.write_u32(*chan),
            Command::FinishUploadStream(chan) => w.write_u32(*chan),
            Command::PlaySample(p) => w.write(p),
            Command::RemoveSample(name) => w.write_string(Some(name)),

            Command::LookupSink(name) => w.write_string(Some(name)),
            Command::LookupSource(name) => w.write_string(Some(name)),
            Command::GetSinkInfo(p) => w.write(p),
            Command::GetSourceInfo(p) => w.write(p),
            Command::GetModuleInfo(id) => w.write_u32(*id),
            Command::GetClientInfo(id) => w.write_u32(*id),
            Command::GetSinkInputInfo(id) => w.write_u32(*id),
            Command::GetSourceOutputInfo(id) => w.write_u32(*id),
            Command::GetSampleInfo(id) => w.write_u32(*id),
            Command::GetCardInfo(p) => w.write(p),
            Command::Subscribe(mask) => w.write(mask),

            Command::SetSinkVolume(p) => w.write(p),
            Command::SetSourceVolume(p) => w.write(p),
            Command::SetSinkInputVolume(p) => w.write(p),
            Command::SetSourceOutputVolume(p) => w.write(p),
            Command::SetSinkMute(p) => w.write(p),
            Command::SetSourceMute(p) => w.write(p),
            Command::SetSinkInputMute(p) => w.write(p),
            Command::SetSourceOutputMute(p) => w.write(p),
            Command::SuspendSink(p) => w.write(p),
            Command::SuspendSource(p) => w.write(p),
            Command::SetDefaultSink(name) => w.write_string(name.as_ref()),
            Command::SetDefaultSource(name) => w.write_string(name.as_ref()),
            Command::KillClient(id) => w.write_u32(*id),
            Command::KillSinkInput(id) => w.write_u32(*id),
            Command::KillSourceOutput(id) => w.write_u32(*id),
            Command::LoadModule(p) => w.write(p),
            Command::UnloadModule(id) => w.write_u32(*id),
            Command::SetCardProfile(p) => w.write(p),
            Command::SetSinkPort(p) => w.write(p),
            Command::SetSourcePort(p) => w.write(p),
            Command::SetPortLatencyOffset(p) => w.write(p),

            Command::UpdateClientProplist(p) => w.write(p),
            Command::RemoveClientProplist(p) => w.write(p),

            Command::Extension(p) => w.write(p),

            Command::RegisterMemfdShmid(id) => w.write_u32(*id),

            Command::Request(p) => w.write(p),
            Command::Overflow(chan) => w.write_u32(*chan),
            Command::Underflow(p) => w.write(p),
            Command::PlaybackStreamKilled(chan) => w.write_u32(*chan),
            Command::RecordStreamKilled(chan) => w.write_u32(*chan),
            Command::Started(chan) => w.write_u32(*chan),
            Command::SubscribeEvent(p) => w.write(p),
            Command::PlaybackStreamSuspended(p) => w.write(p),
            Command::RecordStreamSuspended(p) => w.write(p),
            Command::PlaybackStreamMoved(p) => w.write(p),
            Command::RecordStreamMoved(p) => w.write(p),
            Command::PlaybackBufferAttrChanged(p) => w.write(p),
            Command::ClientEvent(p) => w.write(p),
            Command::PlaybackStreamEvent(p) => w.write(p),
            Command::RecordStreamEvent(p) => w.write(p),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use assert_matches::assert_matches;

    use crate::protocol::MAX_VERSION;

    use super::*;

    fn roundtrip(cmd: &Command) -> anyhow::Result<(u32, Command)> {
        let mut buf = Vec::new();
        cmd.write_tag_prefixed(99, &mut buf, MAX_VERSION)?;

        Ok(Command::read_tag_prefixed(
            &mut Cursor::new(buf),
            MAX_VERSION,
        )?)
    }

    #[test]
    fn command_roundtrip() -> anyhow::Result<()> {
        let (seq, cmd) = roundtrip(&Command::DeletePlaybackStream(7))?;
        assert_eq!(seq, 99);
        assert_matches!(cmd, Command::DeletePlaybackStream(7));

        let (_, cmd) = roundtrip(&Command::GetSinkInfoList)?;
        assert_matches!(cmd, Command::GetSinkInfoList);

        let (_, cmd) = roundtrip(&Command::Request(Request {
            channel: 1,
            length: 4096,
        }))?;
        assert_matches!(
            cmd,
            Command::Request(Request {
                channel: 1,
                length: 4096
            })
        );

        Ok(())
    }

    #[test]
    fn peek_header() -> anyhow::Result<()> {
        let mut buf = Vec::new();
        Command::Exit.write_tag_prefixed(42, &mut buf, MAX_VERSION)?;

        assert_eq!(
            peek_command_header(&buf),
            Some((CommandTag::Exit as u32, 42))
        );

        Ok(())
    }

    #[test]
    fn obsolete_opcodes_are_rejected() -> anyhow::Result<()> {
        let mut buf = Vec::new();
        {
            let mut ts = TagStructWriter::new(&mut buf, MAX_VERSION);
            ts.write_u32(CommandTag::AddAutoloadObsolete as u32)?;
            ts.write_u32(0)?;
        }

        let err = Command::read_tag_prefixed(&mut Cursor::new(buf), MAX_VERSION).unwrap_err();
        assert_matches!(
            err,
            ProtocolError::Unimplemented(CommandTag::AddAutoloadObsolete)
        );

        Ok(())
    }
}
