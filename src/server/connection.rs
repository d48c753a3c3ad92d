//! One client connection: the session state machine, command routing, and
//! the glue between the packet stream and the stream engines.

use std::collections::HashMap;
use std::ffi::CString;
use std::io;
use std::net::IpAddr;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::protocol::{self, *};

use super::ancil::{peer_creds, PeerCreds};
use super::dispatcher::Dispatcher;
use super::memblock::{MemChunk, MemfdRegion};
use super::mixer::{
    reply_channel, roundtrip, MainHandle, PlaybackTimingSnapshot, RecordIoMessage,
    RecordTimingSnapshot, StreamIoMessage,
};
use super::options::NativeOptions;
use super::playback::{PlaybackIo, PlaybackShared, PlaybackStream};
use super::pstream::{
    FrameTransport, Inbound, PacketStream, ShmResolver, TcpTransport, UnixTransport, WriteOutcome,
};
use super::record::{RecordIo, RecordShared, RecordStream};
use super::srbchannel::SrbChannel;
use super::upload::{SamplePlayback, UploadStream};
use super::{Core, Peers};

/// Connections must authenticate within this window.
pub const AUTH_TIMEOUT: Duration = Duration::from_secs(60);

/// Where a connection stands in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the `AUTH` command.
    HandshakePending,
    /// Handshake done; the full command set is available.
    Authorized,
    /// Tear-down has been requested; the service unlinks the connection.
    Closed,
}

/// The byte channel under a connection.
#[derive(Debug)]
pub enum Transport {
    Unix(mio::net::UnixStream),
    Tcp(mio::net::TcpStream),
}

impl Transport {
    pub fn is_local(&self) -> bool {
        matches!(self, Transport::Unix(_))
    }

    pub fn peer_ip(&self) -> Option<IpAddr> {
        match self {
            Transport::Unix(_) => None,
            Transport::Tcp(stream) => stream.peer_addr().ok().map(|a| a.ip()),
        }
    }

    pub fn creds(&self) -> Option<PeerCreds> {
        match self {
            Transport::Unix(stream) => peer_creds(stream.as_raw_fd()).ok(),
            Transport::Tcp(_) => None,
        }
    }

    pub fn register(
        &mut self,
        registry: &mio::Registry,
        token: mio::Token,
    ) -> io::Result<()> {
        let interest = mio::Interest::READABLE | mio::Interest::WRITABLE;
        match self {
            Transport::Unix(stream) => registry.register(stream, token, interest),
            Transport::Tcp(stream) => registry.register(stream, token, interest),
        }
    }

    pub fn deregister(&mut self, registry: &mio::Registry) -> io::Result<()> {
        match self {
            Transport::Unix(stream) => registry.deregister(stream),
            Transport::Tcp(stream) => registry.deregister(stream),
        }
    }

    fn with_frame_transport<R>(&mut self, f: impl FnOnce(&mut dyn FrameTransport) -> R) -> R {
        match self {
            Transport::Unix(stream) => f(&mut UnixTransport::new(stream.as_raw_fd())),
            Transport::Tcp(stream) => f(&mut TcpTransport { stream }),
        }
    }
}

/// A stream the client writes into: playback audio or a sample upload.
#[derive(Debug)]
pub enum OutputStream {
    Playback(PlaybackStream),
    Upload(UploadStream),
}

/// The peer's registered memfd pools, shared with the packet stream's
/// shared-memory resolver.
#[derive(Debug, Default)]
pub struct ShmRegistry {
    pools: Mutex<HashMap<u32, MemfdRegion>>,
}

impl ShmRegistry {
    pub fn register(&self, shm_id: u32, fd: RawFd) -> io::Result<()> {
        let region = MemfdRegion::map(fd)?;
        self.pools.lock().unwrap().insert(shm_id, region);
        Ok(())
    }
}

struct RegistryResolver(Arc<ShmRegistry>);

impl ShmResolver for RegistryResolver {
    fn resolve(
        &mut self,
        _memfd: bool,
        _block_id: u32,
        shm_id: u32,
        offset: u32,
        length: u32,
    ) -> Option<Vec<u8>> {
        self.0
            .pools
            .lock()
            .unwrap()
            .get(&shm_id)
            .and_then(|region| region.read(offset as usize, length as usize))
    }
}

/// One connected client.
#[derive(Debug)]
pub struct Connection {
    /// Server-wide client index.
    pub index: u32,

    pub state: SessionState,
    pub version: u16,
    pub use_shm: bool,
    pub use_memfd: bool,
    pub props: Props,
    pub subscription: SubscriptionMask,

    pub transport: Transport,
    pub pstream: PacketStream,
    pub dispatcher: Dispatcher,

    pub output_streams: HashMap<u32, OutputStream>,
    pub record_streams: HashMap<u32, RecordStream>,
    next_channel: u32,

    // Round-robin position over the record streams.
    rrobin: usize,

    pub options: NativeOptions,
    pub auth_deadline: Option<Instant>,

    shm_registry: Arc<ShmRegistry>,
    rw_pool: Option<super::memblock::MemPool>,
    srb_pending: Option<SrbChannel>,
    pub srb_enabled: bool,

    main: MainHandle,
}

impl Connection {
    pub fn new(
        index: u32,
        mut transport: Transport,
        options: NativeOptions,
        pool: super::memblock::MemPool,
        main: MainHandle,
    ) -> Self {
        let mut pstream = PacketStream::new(pool);

        let shm_registry = Arc::new(ShmRegistry::default());
        pstream.set_shm_resolver(Box::new(RegistryResolver(shm_registry.clone())));

        Self {
            index,
            state: SessionState::HandshakePending,
            version: protocol::MAX_VERSION,
            use_shm: false,
            use_memfd: false,
            props: Props::new(),
            subscription: SubscriptionMask::empty(),
            transport,
            pstream,
            dispatcher: Dispatcher::new(),
            output_streams: HashMap::new(),
            record_streams: HashMap::new(),
            next_channel: 0,
            rrobin: 0,
            options,
            auth_deadline: Some(Instant::now() + AUTH_TIMEOUT),
            shm_registry,
            rw_pool: None,
            srb_pending: None,
            srb_enabled: false,
            main,
        }
    }

    pub fn authorized(&self) -> bool {
        self.state == SessionState::Authorized
    }

    /// Marks the connection for removal by the service. Idempotent.
    pub fn request_close(&mut self) {
        self.state = SessionState::Closed;
    }

    pub fn wants_close(&self) -> bool {
        self.state == SessionState::Closed
    }

    fn alloc_channel(&mut self) -> u32 {
        let channel = self.next_channel;
        self.next_channel += 1;
        channel
    }

    pub fn playback(&self, channel: u32) -> Option<&PlaybackStream> {
        match self.output_streams.get(&channel) {
            Some(OutputStream::Playback(s)) => Some(s),
            _ => None,
        }
    }

    pub fn playback_mut(&mut self, channel: u32) -> Option<&mut PlaybackStream> {
        match self.output_streams.get_mut(&channel) {
            Some(OutputStream::Playback(s)) => Some(s),
            _ => None,
        }
    }

    pub fn sink_input_channel(&self, index: u32) -> Option<u32> {
        self.output_streams.iter().find_map(|(channel, s)| match s {
            OutputStream::Playback(p) if p.sink_input_index == index => Some(*channel),
            _ => None,
        })
    }

    pub fn source_output_channel(&self, index: u32) -> Option<u32> {
        self.record_streams.iter().find_map(|(channel, s)| {
            (s.source_output_index == index).then_some(*channel)
        })
    }

    /// The client's display name, from its properties.
    pub fn client_name(&self) -> CString {
        self.props
            .get(Prop::ApplicationName)
            .and_then(|bytes| CString::from_vec_with_nul(bytes.to_vec()).ok())
            .unwrap_or_else(|| CString::new("client").unwrap())
    }

    // -- outbound helpers ---------------------------------------------------

    pub fn send_command(&mut self, command: &Command) {
        match protocol::encode_command_message(command, INVALID_INDEX, self.version) {
            Ok(bytes) => self.pstream.send_packet(bytes),
            Err(e) => log::error!("encoding command failed: {}", e),
        }
    }

    pub fn send_reply<T: CommandReply>(&mut self, seq: u32, reply: &T) {
        match protocol::encode_reply_message(seq, reply, self.version) {
            Ok(bytes) => self.pstream.send_packet(bytes),
            Err(e) => log::error!("encoding reply failed: {}", e),
        }
    }

    pub fn send_ack(&mut self, seq: u32) {
        let mut bytes = Vec::new();
        if protocol::write_ack_message(&mut bytes, seq).is_ok() {
            self.pstream.send_packet(bytes);
        }
    }

    pub fn send_error(&mut self, seq: u32, code: PulseError) {
        let mut bytes = Vec::new();
        if protocol::write_error_message(&mut bytes, seq, code).is_ok() {
            self.pstream.send_packet(bytes);
        }
    }

    /// Forwards a subscription event if the client asked for the facility.
    pub fn notify_event(&mut self, event: SubscriptionEvent) {
        if !self.authorized() {
            return;
        }

        if self.subscription.contains(event.facility.mask_bit()) {
            self.send_command(&Command::SubscribeEvent(event));
        }
    }

    /// Flushes queued frames; on the queue running dry, feeds the next
    /// record fragment into it, which keeps deliveries paced by the socket.
    pub fn flush(&mut self) {
        loop {
            let outcome = {
                let pstream = &mut self.pstream;
                self.transport.with_frame_transport(|t| pstream.write_some(t))
            };

            match outcome {
                Ok(WriteOutcome::Drained) => {
                    if !self.send_one_memblock() {
                        return;
                    }
                    // Sent something; loop to push it into the socket.
                }
                Ok(WriteOutcome::Blocked) => return,
                Err(e) => {
                    log::info!("connection {}: write failed: {}", self.index, e);
                    self.request_close();
                    return;
                }
            }
        }
    }

    /// Delivers at most one fragment from the record streams, rotating
    /// fairly between them. Returns whether anything was queued.
    fn send_one_memblock(&mut self) -> bool {
        if self.record_streams.is_empty() {
            return false;
        }

        let mut channels: Vec<u32> = self.record_streams.keys().copied().collect();
        channels.sort_unstable();

        let n = channels.len();
        let start = self.rrobin % n;

        for i in 0..n {
            let channel = channels[(start + i) % n];
            let stream = self.record_streams.get_mut(&channel).unwrap();

            if let Some(frag) = stream.pop_fragment() {
                self.pstream
                    .send_memblock(channel, 0, SeekMode::Relative, &frag);
                self.rrobin = (start + i + 1) % n;
                return true;
            }
        }

        false
    }

    // -- inbound ------------------------------------------------------------

    /// Reads everything available off the socket. A framing or transport
    /// error closes the connection.
    pub fn read_frames(&mut self) -> Vec<Inbound> {
        let result = {
            let pstream = &mut self.pstream;
            self.transport.with_frame_transport(|t| pstream.read_some(t))
        };

        match result {
            Ok(frames) => frames,
            Err(e) => {
                log::info!("connection {}: {}", self.index, e);
                self.request_close();
                Vec::new()
            }
        }
    }

    /// Whether the peer has hung up; the service closes the connection
    /// after the remaining frames are handled.
    pub fn peer_gone(&self) -> bool {
        self.pstream.saw_eof()
    }

    /// Routes an audio frame to the stream it addresses.
    pub fn handle_memblock(
        &mut self,
        core: &mut Core,
        channel: u32,
        offset: i64,
        seek: SeekMode,
        chunk: Option<MemChunk>,
    ) {
        match self.output_streams.get_mut(&channel) {
            Some(OutputStream::Playback(stream)) => {
                let frame = stream.spec.frame_size();

                if let Some(chunk) = &chunk {
                    if chunk.index % frame != 0 || chunk.length % frame != 0 {
                        log::warn!(
                            "client sent misaligned audio: index {}, length {}, frame size {}",
                            chunk.index,
                            chunk.length,
                            frame
                        );
                        return;
                    }
                }

                let Some(sink) = core.sink_by_index(stream.sink_index) else {
                    return;
                };

                stream
                    .shared
                    .seek_or_post_in_queue
                    .fetch_add(1, Ordering::SeqCst);

                let msg = match chunk {
                    Some(chunk) if seek == SeekMode::Relative && offset == 0 => {
                        StreamIoMessage::Post { chunk }
                    }
                    Some(chunk) => StreamIoMessage::Seek {
                        offset,
                        mode: seek,
                        chunk: Some(chunk),
                    },
                    None => StreamIoMessage::Seek {
                        offset,
                        mode: seek,
                        chunk: None,
                    },
                };

                sink.post(stream.sink_input_index, msg);
            }

            Some(OutputStream::Upload(upload)) => {
                upload.write(chunk.as_ref());
            }

            None => {
                log::debug!("client sent block for invalid stream {}", channel);
            }
        }
    }

    /// Handles one control packet. Any tagstruct-level failure closes the
    /// connection with a protocol error.
    pub(crate) fn handle_packet(
        &mut self,
        core: &mut Core,
        peers: &mut Peers,
        payload: Vec<u8>,
        fds: Vec<RawFd>,
    ) {
        let Some((_, seq)) = peek_command_header(&payload) else {
            log::info!("connection {}: malformed packet", self.index);
            self.request_close();
            return;
        };

        let mut cursor = io::Cursor::new(payload);
        let command = match Command::read_tag_prefixed(&mut cursor, self.version) {
            Ok((_, command)) => command,
            Err(ProtocolError::Unimplemented(tag)) => {
                let code = match tag {
                    CommandTag::AddAutoloadObsolete
                    | CommandTag::RemoveAutoloadObsolete
                    | CommandTag::GetAutoloadInfoObsolete
                    | CommandTag::GetAutoloadInfoListObsolete => PulseError::Obsolete,
                    _ => PulseError::NotImplemented,
                };
                self.send_error(seq, code);
                return;
            }
            Err(e) => {
                log::info!("connection {}: invalid command: {}", self.index, e);
                self.send_error(seq, PulseError::Protocol);
                self.request_close();
                return;
            }
        };

        if let Command::Reply = command {
            // Reply payloads are handed over raw; the registered callback
            // knows the shape.
            let pos = cursor.position() as usize;
            let rest = cursor.into_inner()[pos..].to_vec();
            if !self.dispatcher.dispatch(seq, Ok(rest)) {
                log::info!("connection {}: reply for unknown tag {}", self.index, seq);
                self.send_error(seq, PulseError::Protocol);
                self.request_close();
            }
            return;
        }

        if !self.authorized() && !matches!(command, Command::Auth(_)) {
            close_fds(&fds);
            self.send_error(seq, PulseError::AccessDenied);
            return;
        }

        // Only the memfd registration consumes descriptors; anything else
        // arriving with some would leak them.
        let fds = if matches!(command, Command::RegisterMemfdShmid(_)) {
            fds
        } else {
            close_fds(&fds);
            Vec::new()
        };

        if let Err(code) = self.dispatch_command(core, peers, seq, command, fds) {
            self.send_error(seq, code);
        }
    }

    // -- handshake ----------------------------------------------------------

    fn command_auth(&mut self, core: &mut Core, seq: u32, params: AuthParams) -> Result<(), PulseError> {
        if self.authorized() {
            // A repeated AUTH just re-answers; it must not reset shm state.
            self.send_reply(
                seq,
                &AuthReply {
                    version: self.version,
                    use_shm: self.use_shm,
                    use_memfd: self.use_memfd,
                },
            );
            return Ok(());
        }

        if params.version < MIN_VERSION {
            log::info!(
                "connection {}: protocol version {} too old",
                self.index,
                params.version
            );
            self.send_error(seq, PulseError::Version);
            self.request_close();
            return Ok(());
        }

        let creds = self.transport.creds();
        let mut granted = false;

        if self.options.auth_anonymous {
            granted = true;
        }

        if !granted {
            if let Some(creds) = creds {
                if creds.uid == core.uid {
                    granted = true;
                } else if self.options.auth_group_enabled {
                    if let Some(group) = &self.options.auth_group {
                        granted = super::usergroup::uid_in_group(creds.uid, group);
                    }
                }
            }
        }

        if !granted {
            if let Some(ip) = self.transport.peer_ip() {
                granted = self.options.auth_ip_acl.check(ip);
            }
        }

        if !granted && self.options.auth_cookie_enabled {
            if let Some(cookie) = &self.options.cookie {
                granted = cookie.matches(&params.cookie);
            }
        }

        if !granted {
            log::info!("connection {}: authentication failed", self.index);
            self.send_error(seq, PulseError::AccessDenied);
            self.request_close();
            return Ok(());
        }

        self.version = params.version.min(MAX_VERSION);
        self.state = SessionState::Authorized;
        self.auth_deadline = None;

        // Shared memory needs a local peer running as the same user; memfd
        // pools additionally need a recent protocol.
        let same_user = creds.is_some_and(|c| c.uid == core.uid);
        self.use_shm = params.supports_shm && self.transport.is_local() && same_user;
        self.use_memfd = self.use_shm && params.supports_memfd && self.version >= 32;

        log::debug!(
            "connection {} authorized: version={} shm={} memfd={}",
            self.index,
            self.version,
            self.use_shm,
            self.use_memfd
        );

        self.send_reply(
            seq,
            &AuthReply {
                version: self.version,
                use_shm: self.use_shm,
                use_memfd: self.use_memfd,
            },
        );

        // Pool registration goes out strictly after the reply.
        if self.use_memfd {
            let pool = super::memblock::MemPool::new(super::memblock::PoolBacking::Memfd)
                .map_err(|_| PulseError::Internal)?;

            if let Some(fd) = pool.fd() {
                match protocol::encode_command_message(
                    &Command::RegisterMemfdShmid(pool.id()),
                    INVALID_INDEX,
                    self.version,
                ) {
                    Ok(bytes) => self.pstream.send_packet_with_fds(bytes, vec![fd]),
                    Err(e) => log::error!("encoding memfd registration failed: {}", e),
                }
            }

            self.rw_pool = Some(pool);
        }

        self.setup_srbchannel();

        Ok(())
    }

    fn setup_srbchannel(&mut self) {
        if !self.options.srbchannel {
            log::debug!("disabling srbchannel: not enabled by module option");
            return;
        }
        if self.version < 30 {
            log::debug!("disabling srbchannel: protocol too old");
            return;
        }
        if !self.use_shm {
            log::debug!("disabling srbchannel: no shm support");
            return;
        }

        let pool = match &self.rw_pool {
            Some(pool) => pool.clone(),
            None => match super::memblock::MemPool::new(super::memblock::PoolBacking::Posix) {
                Ok(pool) => {
                    self.rw_pool = Some(pool.clone());
                    pool
                }
                Err(e) => {
                    log::warn!("disabling srbchannel: pool allocation failed: {}", e);
                    return;
                }
            },
        };

        let srb = match SrbChannel::new(&pool) {
            Ok(srb) => srb,
            Err(e) => {
                log::warn!("disabling srbchannel: {}", e);
                return;
            }
        };

        // The enable command carries the doorbell pair; the ring travels
        // as an ordinary memblock frame right behind it.
        match protocol::encode_command_message(&Command::EnableSrbchannel, srb.tag(), self.version)
        {
            Ok(bytes) => {
                let fds = srb.fds().to_vec();
                self.pstream.send_packet_with_fds(bytes, fds);
            }
            Err(e) => {
                log::error!("encoding srbchannel setup failed: {}", e);
                return;
            }
        }

        let ring = MemChunk::from_block(srb.ring().clone());
        self.pstream.send_memblock(0, 0, SeekMode::Relative, &ring);

        self.srb_pending = Some(srb);
    }

    // -- command dispatch ---------------------------------------------------

    fn dispatch_command(
        &mut self,
        core: &mut Core,
        peers: &mut Peers,
        seq: u32,
        command: Command,
        fds: Vec<RawFd>,
    ) -> Result<(), PulseError> {
        match command {
            Command::Auth(params) => self.command_auth(core, seq, params),

            Command::SetClientName(props) => {
                self.props.update(PropsUpdateMode::Replace, &props);
                if let Some(name) = props.get(Prop::ApplicationName) {
                    log::info!(
                        "client {} is {}",
                        self.index,
                        String::from_utf8_lossy(name)
                    );
                }

                core.queue_event(
                    SubscriptionEventFacility::Client,
                    SubscriptionEventType::Changed,
                    self.index,
                );
                self.send_reply(
                    seq,
                    &SetClientNameReply {
                        client_index: self.index,
                    },
                );
                Ok(())
            }

            Command::Exit => {
                core.exit_requested = true;
                self.send_ack(seq);
                Ok(())
            }

            Command::Subscribe(mask) => {
                self.subscription = mask;
                self.send_ack(seq);
                Ok(())
            }

            Command::CreatePlaybackStream(params) => {
                self.command_create_playback_stream(core, seq, params)
            }
            Command::DeletePlaybackStream(channel) => {
                self.command_delete_playback_stream(core, seq, channel)
            }
            Command::CreateRecordStream(params) => {
                self.command_create_record_stream(core, seq, params)
            }
            Command::DeleteRecordStream(channel) => {
                self.command_delete_record_stream(core, seq, channel)
            }

            Command::DrainPlaybackStream(channel) => {
                let stream = self.playback(channel).ok_or(PulseError::NoEntity)?;
                let sink = core
                    .sink_by_index(stream.sink_index)
                    .ok_or(PulseError::NoEntity)?;
                sink.post(stream.sink_input_index, StreamIoMessage::Drain { tag: seq });
                Ok(())
            }

            Command::FlushPlaybackStream(channel) => {
                let stream = self.playback(channel).ok_or(PulseError::NoEntity)?;
                let sink = core
                    .sink_by_index(stream.sink_index)
                    .ok_or(PulseError::NoEntity)?;
                sink.post(stream.sink_input_index, StreamIoMessage::Flush);
                self.send_ack(seq);
                Ok(())
            }

            Command::TriggerPlaybackStream(channel) => {
                let stream = self.playback(channel).ok_or(PulseError::NoEntity)?;
                let sink = core
                    .sink_by_index(stream.sink_index)
                    .ok_or(PulseError::NoEntity)?;
                sink.post(stream.sink_input_index, StreamIoMessage::Trigger);
                self.send_ack(seq);
                Ok(())
            }

            Command::PrebufPlaybackStream(channel) => {
                let stream = self.playback(channel).ok_or(PulseError::NoEntity)?;
                let sink = core
                    .sink_by_index(stream.sink_index)
                    .ok_or(PulseError::NoEntity)?;
                sink.post(stream.sink_input_index, StreamIoMessage::PrebufForce);
                self.send_ack(seq);
                Ok(())
            }

            Command::CorkPlaybackStream(params) => {
                let stream = self
                    .playback_mut(params.channel)
                    .ok_or(PulseError::NoEntity)?;
                stream.corked = params.cork;
                let index = stream.sink_input_index;
                let sink_index = stream.sink_index;

                let sink = core.sink_by_index(sink_index).ok_or(PulseError::NoEntity)?;
                let (reply, rx) = reply_channel();
                sink.post(
                    index,
                    StreamIoMessage::SetState {
                        corked: params.cork,
                        reply,
                    },
                );
                roundtrip(rx);

                core.queue_event(
                    SubscriptionEventFacility::SinkInput,
                    SubscriptionEventType::Changed,
                    index,
                );
                self.send_ack(seq);
                Ok(())
            }

            Command::CorkRecordStream(params) => {
                let stream = self
                    .record_streams
                    .get_mut(&params.channel)
                    .ok_or(PulseError::NoEntity)?;
                stream.corked = params.cork;
                let index = stream.source_output_index;
                let source_index = stream.source_index;

                let source = core
                    .source_by_index(source_index)
                    .ok_or(PulseError::NoEntity)?;
                let (reply, rx) = reply_channel();
                source.post(
                    index,
                    RecordIoMessage::SetState {
                        corked: params.cork,
                        reply,
                    },
                );
                roundtrip(rx);

                core.queue_event(
                    SubscriptionEventFacility::SourceOutput,
                    SubscriptionEventType::Changed,
                    index,
                );
                self.send_ack(seq);
                Ok(())
            }

            Command::FlushRecordStream(channel) => {
                let stream = self
                    .record_streams
                    .get_mut(&channel)
                    .ok_or(PulseError::NoEntity)?;
                stream.q.flush_read();
                self.send_ack(seq);
                Ok(())
            }

            Command::GetPlaybackLatency(params) => {
                let stream = self
                    .playback(params.channel)
                    .ok_or(PulseError::NoEntity)?;
                let snapshot = playback_snapshot(core, stream).ok_or(PulseError::NoEntity)?;
                let sink_spec = core
                    .sink_by_index(stream.sink_index)
                    .map(|s| s.spec)
                    .unwrap_or(stream.spec);

                self.send_reply(
                    seq,
                    &PlaybackLatency {
                        sink_usec: snapshot.sink_latency_usec
                            + sink_spec.bytes_to_usec(snapshot.render_queue_len as u64),
                        source_usec: 0,
                        playing: snapshot.is_playing,
                        local_time: params.now,
                        remote_time: std::time::SystemTime::now(),
                        write_index: snapshot.write_index,
                        read_index: snapshot.read_index,
                        underrun_for: snapshot.underrun_for,
                        playing_for: snapshot.playing_for,
                    },
                );
                Ok(())
            }

            Command::GetRecordLatency(params) => {
                let stream = self
                    .record_streams
                    .get(&params.channel)
                    .ok_or(PulseError::NoEntity)?;
                let snapshot = record_snapshot(core, stream).ok_or(PulseError::NoEntity)?;

                let running = !stream.corked;
                let write_index = stream.q.write_index() + snapshot.on_the_fly as i64;
                let read_index = stream.q.read_index();

                self.send_reply(
                    seq,
                    &RecordLatency {
                        monitor_usec: snapshot.monitor_latency_usec,
                        source_usec: snapshot.source_latency_usec,
                        running,
                        local_time: params.now,
                        remote_time: std::time::SystemTime::now(),
                        write_index,
                        read_index,
                    },
                );
                Ok(())
            }

            Command::SetPlaybackStreamName(params) => {
                let stream = self
                    .playback_mut(params.channel)
                    .ok_or(PulseError::NoEntity)?;
                stream
                    .props
                    .set(Prop::MediaName, params.name.as_c_str());
                let index = stream.sink_input_index;

                core.queue_event(
                    SubscriptionEventFacility::SinkInput,
                    SubscriptionEventType::Changed,
                    index,
                );
                self.send_ack(seq);
                Ok(())
            }

            Command::SetRecordStreamName(params) => {
                let stream = self
                    .record_streams
                    .get_mut(&params.channel)
                    .ok_or(PulseError::NoEntity)?;
                stream
                    .props
                    .set(Prop::MediaName, params.name.as_c_str());
                let index = stream.source_output_index;

                core.queue_event(
                    SubscriptionEventFacility::SourceOutput,
                    SubscriptionEventType::Changed,
                    index,
                );
                self.send_ack(seq);
                Ok(())
            }

            Command::SetPlaybackStreamBufferAttr(params) => {
                self.command_set_playback_buffer_attr(core, seq, params)
            }

            Command::SetRecordStreamBufferAttr(params) => {
                let stream = self
                    .record_streams
                    .get_mut(&params.channel)
                    .ok_or(PulseError::NoEntity)?;

                stream.buffer_attr_req = params.buffer_attr;
                stream.adjust_latency = params.adjust_latency;
                stream.early_requests = params.early_requests;

                let source_index = stream.source_index;
                let source_output_index = stream.source_output_index;
                let spec = stream.spec;
                let adjust_latency = stream.adjust_latency;
                let early_requests = stream.early_requests;
                let req = stream.buffer_attr_req;

                let source = core
                    .source_by_index_mut(source_index)
                    .ok_or(PulseError::NoEntity)?;
                let (attr, latency) = super::record::resolve_buffer_attr(
                    &req,
                    &spec,
                    adjust_latency,
                    early_requests,
                    source,
                    source_output_index,
                );

                let stream = self.record_streams.get_mut(&params.channel).unwrap();
                stream.buffer_attr = attr;
                stream.configured_source_latency = latency;
                stream.q.set_maxlength(attr.maxlength as usize);

                self.send_reply(
                    seq,
                    &SetRecordStreamBufferAttrReply {
                        buffer_attr: attr,
                        source_latency: latency,
                    },
                );
                Ok(())
            }

            Command::UpdatePlaybackStreamSampleRate(params) => {
                let stream = self
                    .playback_mut(params.channel)
                    .ok_or(PulseError::NoEntity)?;
                if params.rate == 0 {
                    return Err(PulseError::Invalid);
                }
                stream.spec.rate = params.rate;
                self.send_ack(seq);
                Ok(())
            }

            Command::UpdateRecordStreamSampleRate(params) => {
                let stream = self
                    .record_streams
                    .get_mut(&params.channel)
                    .ok_or(PulseError::NoEntity)?;
                if params.rate == 0 {
                    return Err(PulseError::Invalid);
                }
                stream.spec.rate = params.rate;
                self.send_ack(seq);
                Ok(())
            }

            Command::UpdatePlaybackStreamProplist(params) => {
                let stream = self
                    .playback_mut(params.channel)
                    .ok_or(PulseError::NoEntity)?;
                stream.props.update(params.mode, &params.props);
                let index = stream.sink_input_index;

                core.queue_event(
                    SubscriptionEventFacility::SinkInput,
                    SubscriptionEventType::Changed,
                    index,
                );
                self.send_ack(seq);
                Ok(())
            }

            Command::UpdateRecordStreamProplist(params) => {
                let stream = self
                    .record_streams
                    .get_mut(&params.channel)
                    .ok_or(PulseError::NoEntity)?;
                stream.props.update(params.mode, &params.props);
                let index = stream.source_output_index;

                core.queue_event(
                    SubscriptionEventFacility::SourceOutput,
                    SubscriptionEventType::Changed,
                    index,
                );
                self.send_ack(seq);
                Ok(())
            }

            Command::UpdateClientProplist(params) => {
                self.props.update(params.mode, &params.props);
                core.queue_event(
                    SubscriptionEventFacility::Client,
                    SubscriptionEventType::Changed,
                    self.index,
                );
                self.send_ack(seq);
                Ok(())
            }

            Command::RemovePlaybackStreamProplist(params) => {
                let stream = self
                    .playback_mut(params.channel)
                    .ok_or(PulseError::NoEntity)?;
                for key in &params.keys {
                    stream.props.remove(key);
                }
                self.send_ack(seq);
                Ok(())
            }

            Command::RemoveRecordStreamProplist(params) => {
                let stream = self
                    .record_streams
                    .get_mut(&params.channel)
                    .ok_or(PulseError::NoEntity)?;
                for key in &params.keys {
                    stream.props.remove(key);
                }
                self.send_ack(seq);
                Ok(())
            }

            Command::RemoveClientProplist(params) => {
                for key in &params.keys {
                    self.props.remove(key);
                }
                self.send_ack(seq);
                Ok(())
            }

            Command::MoveSinkInput(params) => self.command_move_sink_input(core, peers, seq, params),
            Command::MoveSourceOutput(params) => {
                self.command_move_source_output(core, peers, seq, params)
            }

            Command::CreateUploadStream(params) => {
                let length = params.length as usize;
                if length == 0 || length > super::upload::SCACHE_ENTRY_SIZE_MAX {
                    return Err(PulseError::TooLarge);
                }
                if !params.sample_spec.is_valid() {
                    return Err(PulseError::Invalid);
                }

                let name = params
                    .name
                    .clone()
                    .filter(|n| !n.to_bytes().is_empty())
                    .ok_or(PulseError::Invalid)?;

                let channel = self.alloc_channel();
                self.output_streams.insert(
                    channel,
                    OutputStream::Upload(UploadStream::new(
                        channel,
                        name,
                        params.sample_spec,
                        params.channel_map,
                        params.props,
                        length,
                    )),
                );

                self.send_reply(
                    seq,
                    &CreateUploadStreamReply {
                        channel,
                        length: length as u32,
                    },
                );
                Ok(())
            }

            Command::DeleteUploadStream(channel) => {
                match self.output_streams.remove(&channel) {
                    Some(OutputStream::Upload(_)) => {
                        self.send_ack(seq);
                        Ok(())
                    }
                    Some(other) => {
                        self.output_streams.insert(channel, other);
                        Err(PulseError::NoEntity)
                    }
                    None => Err(PulseError::NoEntity),
                }
            }

            Command::FinishUploadStream(channel) => {
                let upload = match self.output_streams.remove(&channel) {
                    Some(OutputStream::Upload(upload)) => upload,
                    Some(other) => {
                        self.output_streams.insert(channel, other);
                        return Err(PulseError::NoEntity);
                    }
                    None => return Err(PulseError::NoEntity),
                };

                let (name, data, spec, map, props) = upload.finish();
                let pool = core.mempool.clone();
                let index = core
                    .scache
                    .insert(&pool, name, data, spec, map, props)
                    .map_err(|_| PulseError::Internal)?;

                core.queue_event(
                    SubscriptionEventFacility::SampleCache,
                    SubscriptionEventType::New,
                    index,
                );
                self.send_ack(seq);
                Ok(())
            }

            Command::PlaySample(params) => self.command_play_sample(core, seq, params),

            Command::RemoveSample(name) => {
                let index = core
                    .scache
                    .get(&name)
                    .map(|s| s.index)
                    .ok_or(PulseError::NoEntity)?;

                core.scache.remove(&name);
                core.queue_event(
                    SubscriptionEventFacility::SampleCache,
                    SubscriptionEventType::Removed,
                    index,
                );
                self.send_ack(seq);
                Ok(())
            }

            Command::GetServerInfo => {
                let info = core.server_info();
                self.send_reply(seq, &info);
                Ok(())
            }

            Command::Stat => {
                let (total, total_size, allocated, allocated_size) = core.mempool.stat();
                self.send_reply(
                    seq,
                    &StatInfo {
                        memblock_total: total as u32,
                        memblock_total_size: total_size as u32,
                        memblock_allocated: allocated as u32,
                        memblock_allocated_size: allocated_size as u32,
                        sample_cache_size: core.scache.total_size() as u32,
                    },
                );
                Ok(())
            }

            Command::LookupSink(name) => {
                let sink = core.sink_by_selector(None, Some(&name)).ok_or(PulseError::NoEntity)?;
                let index = sink.index;
                self.send_reply(seq, &LookupReply(index));
                Ok(())
            }

            Command::LookupSource(name) => {
                let source = core
                    .source_by_selector(None, Some(&name))
                    .ok_or(PulseError::NoEntity)?;
                let index = source.index;
                self.send_reply(seq, &LookupReply(index));
                Ok(())
            }

            Command::GetSinkInfo(params) => {
                check_selector(&params.index, &params.name)?;
                let sink = core
                    .sink_by_selector(params.index, params.name.as_ref())
                    .ok_or(PulseError::NoEntity)?;
                let info = core.sink_info(sink.index).ok_or(PulseError::NoEntity)?;
                self.send_reply(seq, &info);
                Ok(())
            }

            Command::GetSinkInfoList => {
                let infos: SinkInfoList = core
                    .sinks
                    .iter()
                    .map(|s| s.index)
                    .collect::<Vec<_>>()
                    .into_iter()
                    .filter_map(|i| core.sink_info(i))
                    .collect();
                self.send_reply(seq, &infos);
                Ok(())
            }

            Command::GetSourceInfo(params) => {
                check_selector(&params.index, &params.name)?;
                let source = core
                    .source_by_selector(params.index, params.name.as_ref())
                    .ok_or(PulseError::NoEntity)?;
                let info = core.source_info(source.index).ok_or(PulseError::NoEntity)?;
                self.send_reply(seq, &info);
                Ok(())
            }

            Command::GetSourceInfoList => {
                let infos: SourceInfoList = core
                    .sources
                    .iter()
                    .map(|s| s.index)
                    .collect::<Vec<_>>()
                    .into_iter()
                    .filter_map(|i| core.source_info(i))
                    .collect();
                self.send_reply(seq, &infos);
                Ok(())
            }

            Command::GetModuleInfo(index) => {
                let info = core.module_info(index).ok_or(PulseError::NoEntity)?;
                self.send_reply(seq, &info);
                Ok(())
            }

            Command::GetModuleInfoList => {
                let infos: ModuleInfoList = core.module_list();
                self.send_reply(seq, &infos);
                Ok(())
            }

            Command::GetClientInfo(index) => {
                let info = client_info_for(self, peers, index).ok_or(PulseError::NoEntity)?;
                self.send_reply(seq, &info);
                Ok(())
            }

            Command::GetClientInfoList => {
                let mut infos: ClientInfoList = vec![client_info(self)];
                infos.extend(peers.values().map(client_info));
                infos.sort_by_key(|i| i.index);
                self.send_reply(seq, &infos);
                Ok(())
            }

            Command::GetSinkInputInfo(index) => {
                let info = sink_input_info_for(core, self, peers, index)
                    .ok_or(PulseError::NoEntity)?;
                self.send_reply(seq, &info);
                Ok(())
            }

            Command::GetSinkInputInfoList => {
                let mut infos: SinkInputInfoList = Vec::new();
                collect_sink_input_infos(core, self, &mut infos);
                for peer in peers.values() {
                    collect_sink_input_infos(core, peer, &mut infos);
                }
                infos.sort_by_key(|i| i.index);
                self.send_reply(seq, &infos);
                Ok(())
            }

            Command::GetSourceOutputInfo(index) => {
                let info = source_output_info_for(core, self, peers, index)
                    .ok_or(PulseError::NoEntity)?;
                self.send_reply(seq, &info);
                Ok(())
            }

            Command::GetSourceOutputInfoList => {
                let mut infos: SourceOutputInfoList = Vec::new();
                collect_source_output_infos(core, self, &mut infos);
                for peer in peers.values() {
                    collect_source_output_infos(core, peer, &mut infos);
                }
                infos.sort_by_key(|i| i.index);
                self.send_reply(seq, &infos);
                Ok(())
            }

            Command::GetSampleInfo(index) => {
                let sample = core
                    .scache
                    .get_by_index(index)
                    .ok_or(PulseError::NoEntity)?;
                let info = sample_info(sample);
                self.send_reply(seq, &info);
                Ok(())
            }

            Command::GetSampleInfoList => {
                let infos: SampleInfoList = core.scache.iter().map(sample_info).collect();
                self.send_reply(seq, &infos);
                Ok(())
            }

            Command::GetCardInfo(params) => {
                check_selector(&params.index, &params.name)?;
                Err(PulseError::NoEntity)
            }

            Command::GetCardInfoList => {
                let infos: CardInfoList = Vec::new();
                self.send_reply(seq, &infos);
                Ok(())
            }

            Command::SetSinkVolume(params) => {
                check_selector(&params.device_index, &params.device_name)?;
                let sink = core
                    .sink_by_selector_mut(params.device_index, params.device_name.as_ref())
                    .ok_or(PulseError::NoEntity)?;
                sink.volume = params.volume;
                let index = sink.index;

                core.queue_event(
                    SubscriptionEventFacility::Sink,
                    SubscriptionEventType::Changed,
                    index,
                );
                self.send_ack(seq);
                Ok(())
            }

            Command::SetSourceVolume(params) => {
                check_selector(&params.device_index, &params.device_name)?;
                let source = core
                    .source_by_selector_mut(params.device_index, params.device_name.as_ref())
                    .ok_or(PulseError::NoEntity)?;
                source.volume = params.volume;
                let index = source.index;

                core.queue_event(
                    SubscriptionEventFacility::Source,
                    SubscriptionEventType::Changed,
                    index,
                );
                self.send_ack(seq);
                Ok(())
            }

            Command::SetSinkMute(params) => {
                check_selector(&params.device_index, &params.device_name)?;
                let sink = core
                    .sink_by_selector_mut(params.device_index, params.device_name.as_ref())
                    .ok_or(PulseError::NoEntity)?;
                sink.muted = params.mute;
                let index = sink.index;

                core.queue_event(
                    SubscriptionEventFacility::Sink,
                    SubscriptionEventType::Changed,
                    index,
                );
                self.send_ack(seq);
                Ok(())
            }

            Command::SetSourceMute(params) => {
                check_selector(&params.device_index, &params.device_name)?;
                let source = core
                    .source_by_selector_mut(params.device_index, params.device_name.as_ref())
                    .ok_or(PulseError::NoEntity)?;
                source.muted = params.mute;
                let index = source.index;

                core.queue_event(
                    SubscriptionEventFacility::Source,
                    SubscriptionEventType::Changed,
                    index,
                );
                self.send_ack(seq);
                Ok(())
            }

            Command::SetSinkInputVolume(params) => {
                let conn = owner_of_sink_input(self, peers, params.index)
                    .ok_or(PulseError::NoEntity)?;
                let channel = conn.sink_input_channel(params.index).unwrap();
                let stream = conn.playback_mut(channel).unwrap();
                stream.volume = params.volume;
                stream.volume_set = true;

                core.queue_event(
                    SubscriptionEventFacility::SinkInput,
                    SubscriptionEventType::Changed,
                    params.index,
                );
                self.send_ack(seq);
                Ok(())
            }

            Command::SetSinkInputMute(params) => {
                let conn = owner_of_sink_input(self, peers, params.index)
                    .ok_or(PulseError::NoEntity)?;
                let channel = conn.sink_input_channel(params.index).unwrap();
                let stream = conn.playback_mut(channel).unwrap();
                stream.muted = params.mute;

                core.queue_event(
                    SubscriptionEventFacility::SinkInput,
                    SubscriptionEventType::Changed,
                    params.index,
                );
                self.send_ack(seq);
                Ok(())
            }

            Command::SetSourceOutputVolume(params) => {
                let conn = owner_of_source_output(self, peers, params.index)
                    .ok_or(PulseError::NoEntity)?;
                let channel = conn.source_output_channel(params.index).unwrap();
                let stream = conn.record_streams.get_mut(&channel).unwrap();
                stream.volume = params.volume;
                stream.volume_set = true;

                core.queue_event(
                    SubscriptionEventFacility::SourceOutput,
                    SubscriptionEventType::Changed,
                    params.index,
                );
                self.send_ack(seq);
                Ok(())
            }

            Command::SetSourceOutputMute(params) => {
                let conn = owner_of_source_output(self, peers, params.index)
                    .ok_or(PulseError::NoEntity)?;
                let channel = conn.source_output_channel(params.index).unwrap();
                let stream = conn.record_streams.get_mut(&channel).unwrap();
                stream.muted = params.mute;

                core.queue_event(
                    SubscriptionEventFacility::SourceOutput,
                    SubscriptionEventType::Changed,
                    params.index,
                );
                self.send_ack(seq);
                Ok(())
            }

            Command::SuspendSink(params) => {
                let all = params.device_index.is_none() && params.device_name.is_none();
                if all {
                    for sink in &mut core.sinks {
                        sink.set_suspended(params.suspend);
                    }
                } else {
                    let sink = core
                        .sink_by_selector_mut(params.device_index, params.device_name.as_ref())
                        .ok_or(PulseError::NoEntity)?;
                    sink.set_suspended(params.suspend);
                }

                self.notify_suspend_state(core, peers, params.suspend, true);
                self.send_ack(seq);
                Ok(())
            }

            Command::SuspendSource(params) => {
                let all = params.device_index.is_none() && params.device_name.is_none();
                if all {
                    for source in &mut core.sources {
                        source.set_suspended(params.suspend);
                    }
                } else {
                    let source = core
                        .source_by_selector_mut(params.device_index, params.device_name.as_ref())
                        .ok_or(PulseError::NoEntity)?;
                    source.set_suspended(params.suspend);
                }

                self.notify_suspend_state(core, peers, params.suspend, false);
                self.send_ack(seq);
                Ok(())
            }

            Command::SetDefaultSink(name) => {
                let name = name.ok_or(PulseError::Invalid)?;
                let sink = core
                    .sink_by_selector(None, Some(&name))
                    .ok_or(PulseError::NoEntity)?;
                core.default_sink = sink.index;

                core.queue_event(
                    SubscriptionEventFacility::Server,
                    SubscriptionEventType::Changed,
                    INVALID_INDEX,
                );
                self.send_ack(seq);
                Ok(())
            }

            Command::SetDefaultSource(name) => {
                let name = name.ok_or(PulseError::Invalid)?;
                let source = core
                    .source_by_selector(None, Some(&name))
                    .ok_or(PulseError::NoEntity)?;
                core.default_source = source.index;

                core.queue_event(
                    SubscriptionEventFacility::Server,
                    SubscriptionEventType::Changed,
                    INVALID_INDEX,
                );
                self.send_ack(seq);
                Ok(())
            }

            Command::KillClient(index) => {
                if index == self.index {
                    self.send_ack(seq);
                    self.request_close();
                    return Ok(());
                }

                let peer = peers
                    .values_mut()
                    .find(|c| c.index == index)
                    .ok_or(PulseError::NoEntity)?;
                peer.request_close();

                self.send_ack(seq);
                Ok(())
            }

            Command::KillSinkInput(index) => {
                let conn = owner_of_sink_input(self, peers, index).ok_or(PulseError::NoEntity)?;
                let channel = conn.sink_input_channel(index).unwrap();

                conn.send_command(&Command::PlaybackStreamKilled(channel));
                conn.teardown_playback_stream(core, channel);

                self.send_ack(seq);
                Ok(())
            }

            Command::KillSourceOutput(index) => {
                let conn =
                    owner_of_source_output(self, peers, index).ok_or(PulseError::NoEntity)?;
                let channel = conn.source_output_channel(index).unwrap();

                conn.send_command(&Command::RecordStreamKilled(channel));
                conn.teardown_record_stream(core, channel);

                self.send_ack(seq);
                Ok(())
            }

            Command::LoadModule(_) => {
                // The endpoint hosts no module loader.
                Err(PulseError::ModInitFailed)
            }
            Command::UnloadModule(_) => Err(PulseError::NoEntity),

            Command::SetCardProfile(_) | Command::SetPortLatencyOffset(_) => {
                Err(PulseError::NoEntity)
            }
            Command::SetSinkPort(_) | Command::SetSourcePort(_) => Err(PulseError::NoEntity),

            Command::Extension(params) => {
                let name = params.module_name.ok_or(PulseError::NoExtension)?;
                match core.extensions.get_mut(&name) {
                    Some(handler) => {
                        let reply = handler(self.index, &params.payload);
                        match reply {
                            Ok(payload) => {
                                let mut bytes = Vec::new();
                                {
                                    let mut ts =
                                        TagStructWriter::new(&mut bytes, self.version);
                                    ts.write_u32(CommandTag::Reply as u32)
                                        .and_then(|_| ts.write_u32(seq))
                                        .map_err(|_| PulseError::Internal)?;
                                }
                                bytes.extend_from_slice(&payload);

                                let mut framed = Vec::new();
                                protocol::write_frame_header(
                                    &mut framed,
                                    protocol::FrameHeader::for_packet(bytes.len() as u32),
                                )
                                .map_err(|_| PulseError::Internal)?;
                                framed.extend_from_slice(&bytes);
                                self.pstream.send_packet(framed);
                                Ok(())
                            }
                            Err(code) => Err(code),
                        }
                    }
                    None => Err(PulseError::NoExtension),
                }
            }

            Command::EnableSrbchannel => {
                // The client acknowledges with the tag we sent.
                match &self.srb_pending {
                    Some(srb) if srb.tag() == seq => {
                        log::debug!("connection {}: srbchannel enabled", self.index);
                        self.srb_enabled = true;
                        self.srb_pending = None;
                        Ok(())
                    }
                    _ => {
                        log::info!(
                            "connection {}: srbchannel ack with unknown tag",
                            self.index
                        );
                        self.request_close();
                        Ok(())
                    }
                }
            }

            Command::DisableSrbchannel => {
                self.srb_enabled = false;
                self.srb_pending = None;
                self.send_ack(seq);
                Ok(())
            }

            Command::RegisterMemfdShmid(shm_id) => {
                let fd = fds.first().copied().ok_or(PulseError::Protocol)?;
                self.shm_registry
                    .register(shm_id, fd)
                    .map_err(|_| PulseError::Invalid)?;
                unsafe { libc::close(fd) };
                Ok(())
            }

            // The remaining opcodes only ever travel server-to-client.
            Command::Reply
            | Command::Request(_)
            | Command::Overflow(_)
            | Command::Underflow(_)
            | Command::PlaybackStreamKilled(_)
            | Command::RecordStreamKilled(_)
            | Command::Started(_)
            | Command::SubscribeEvent(_)
            | Command::PlaybackStreamSuspended(_)
            | Command::RecordStreamSuspended(_)
            | Command::PlaybackStreamMoved(_)
            | Command::RecordStreamMoved(_)
            | Command::PlaybackBufferAttrChanged(_)
            | Command::ClientEvent(_)
            | Command::PlaybackStreamEvent(_)
            | Command::RecordStreamEvent(_) => Err(PulseError::Protocol),
        }
    }

    fn notify_suspend_state(
        &mut self,
        _core: &mut Core,
        peers: &mut Peers,
        suspended: bool,
        playback: bool,
    ) {
        // v12 grew per-stream suspend notifications.
        let mut notify = |conn: &mut Connection| {
            if conn.version < 12 {
                return;
            }

            if playback {
                let channels: Vec<u32> = conn
                    .output_streams
                    .iter()
                    .filter(|(_, s)| matches!(s, OutputStream::Playback(_)))
                    .map(|(c, _)| *c)
                    .collect();
                for channel in channels {
                    conn.send_command(&Command::PlaybackStreamSuspended(StreamSuspended {
                        channel,
                        suspended,
                    }));
                }
            } else {
                let channels: Vec<u32> = conn.record_streams.keys().copied().collect();
                for channel in channels {
                    conn.send_command(&Command::RecordStreamSuspended(StreamSuspended {
                        channel,
                        suspended,
                    }));
                }
            }
        };

        notify(self);
        for peer in peers.values_mut() {
            notify(peer);
        }
    }

    // -- stream creation and teardown ---------------------------------------

    fn command_create_playback_stream(
        &mut self,
        core: &mut Core,
        seq: u32,
        params: PlaybackStreamParams,
    ) -> Result<(), PulseError> {
        if !params.sample_spec.is_valid() {
            return Err(PulseError::Invalid);
        }
        if params.channel_map.num_channels() != params.sample_spec.channels {
            return Err(PulseError::Invalid);
        }
        if params.flags.adjust_latency && params.flags.early_requests {
            return Err(PulseError::Invalid);
        }
        if params.sink_index.is_some() && params.sink_name.is_some() {
            return Err(PulseError::Invalid);
        }

        // A non-default sync id joins an existing group, which must live on
        // the same sink.
        let sync_partner = self.output_streams.values().find_map(|s| match s {
            OutputStream::Playback(p) if params.sync_id != 0 && p.sync_id == params.sync_id => {
                Some((p.sink_index, p.sink_input_index))
            }
            _ => None,
        });

        let sink_index = {
            let sink = core
                .sink_by_selector(params.sink_index, params.sink_name.as_ref())
                .ok_or(PulseError::NoEntity)?;
            sink.index
        };

        let start_index = match sync_partner {
            Some((partner_sink, partner_input)) => {
                if partner_sink != sink_index {
                    return Err(PulseError::Invalid);
                }

                // Phase-lock to the group by starting at the partner's read
                // position.
                let sink = core.sink_by_index(partner_sink).unwrap();
                let (reply, rx) = reply_channel();
                sink.post(partner_input, StreamIoMessage::UpdateLatency { reply });
                roundtrip(rx).map(|s| s.read_index).unwrap_or(0)
            }
            None => 0,
        };

        let sink_input_index = core.alloc_index();
        let spec = params.sample_spec;

        let (attr, configured_latency) = {
            let sink = core.sink_by_index_mut(sink_index).unwrap();
            super::playback::resolve_buffer_attr(
                &params.buffer_attr,
                &spec,
                params.flags.adjust_latency,
                params.flags.early_requests,
                sink,
                sink_input_index,
            )
        };

        let mut q = super::memblockq::MemBlockQueue::new(
            core.mempool.clone(),
            super::memblockq::QueueParams {
                spec,
                start_index,
                maxlength: attr.maxlength as usize,
                tlength: attr.tlength as usize,
                prebuf: attr.prebuf as usize,
                minreq: attr.minreq as usize,
                maxrewind: 0,
            },
        );

        let missing = q.pop_missing() as u32;

        let channel = self.alloc_channel();
        let shared = Arc::new(PlaybackShared::default());

        let io = PlaybackIo::new(self.index, channel, q, shared.clone(), self.main.clone());

        let format = params
            .formats
            .first()
            .cloned()
            .unwrap_or_else(|| FormatInfo::new(FormatEncoding::Pcm));

        let stream = PlaybackStream {
            channel,
            sink_input_index,
            sink_index,
            spec,
            map: params.channel_map,
            format: format.clone(),
            props: params.props,
            volume: params
                .volume
                .unwrap_or_else(|| ChannelVolume::norm(spec.channels)),
            volume_set: params.volume.is_some(),
            muted: params.flags.start_muted.unwrap_or(false),
            corked: params.flags.start_corked,
            sync_id: params.sync_id,
            adjust_latency: params.flags.adjust_latency,
            early_requests: params.flags.early_requests,
            buffer_attr_req: params.buffer_attr,
            buffer_attr: attr,
            configured_sink_latency: configured_latency,
            shared,
        };

        let (sink_name, suspended) = {
            let sink = core.sink_by_index(sink_index).unwrap();
            sink.attach(
                sink_input_index,
                params.sync_id,
                params.flags.start_corked,
                Box::new(io),
            );
            (sink.name.clone(), sink.suspended)
        };

        log::info!(
            "connection {}: playback stream {} on sink {} (missing={})",
            self.index,
            channel,
            sink_index,
            missing
        );

        self.output_streams
            .insert(channel, OutputStream::Playback(stream));

        core.queue_event(
            SubscriptionEventFacility::SinkInput,
            SubscriptionEventType::New,
            sink_input_index,
        );

        self.send_reply(
            seq,
            &CreatePlaybackStreamReply {
                channel,
                sink_input_index,
                requested_bytes: missing,
                buffer_attr: attr,
                sample_spec: spec,
                channel_map: params.channel_map,
                sink_index,
                sink_name: Some(sink_name),
                suspended,
                sink_latency: configured_latency,
                format,
            },
        );
        Ok(())
    }

    fn command_create_record_stream(
        &mut self,
        core: &mut Core,
        seq: u32,
        params: RecordStreamParams,
    ) -> Result<(), PulseError> {
        if !params.sample_spec.is_valid() {
            return Err(PulseError::Invalid);
        }
        if params.channel_map.num_channels() != params.sample_spec.channels {
            return Err(PulseError::Invalid);
        }
        if params.flags.adjust_latency && params.flags.early_requests {
            return Err(PulseError::Invalid);
        }
        if params.source_index.is_some() && params.source_name.is_some() {
            return Err(PulseError::Invalid);
        }

        let source_index = {
            let source = core
                .source_by_selector(params.source_index, params.source_name.as_ref())
                .ok_or(PulseError::NoEntity)?;
            source.index
        };

        let source_output_index = core.alloc_index();
        let spec = params.sample_spec;

        let (attr, configured_latency) = {
            let source = core.source_by_index_mut(source_index).unwrap();
            super::record::resolve_buffer_attr(
                &params.buffer_attr,
                &spec,
                params.flags.adjust_latency,
                params.flags.early_requests,
                source,
                source_output_index,
            )
        };

        let q = super::memblockq::MemBlockQueue::new(
            core.mempool.clone(),
            super::memblockq::QueueParams {
                spec,
                start_index: 0,
                maxlength: attr.maxlength as usize,
                tlength: 0,
                prebuf: 0,
                minreq: 0,
                maxrewind: 0,
            },
        );

        let channel = self.alloc_channel();
        let shared = Arc::new(RecordShared::default());

        let io = RecordIo::new(self.index, channel, shared.clone(), self.main.clone());

        let format = params
            .formats
            .first()
            .cloned()
            .unwrap_or_else(|| FormatInfo::new(FormatEncoding::Pcm));

        let stream = RecordStream {
            channel,
            source_output_index,
            source_index,
            spec,
            map: params.channel_map,
            format: format.clone(),
            props: params.props,
            volume: params
                .volume
                .unwrap_or_else(|| ChannelVolume::norm(spec.channels)),
            volume_set: params.volume.is_some(),
            muted: params.flags.start_muted.unwrap_or(false),
            corked: params.flags.start_corked,
            adjust_latency: params.flags.adjust_latency,
            early_requests: params.flags.early_requests,
            buffer_attr_req: params.buffer_attr,
            buffer_attr: attr,
            configured_source_latency: configured_latency,
            q,
            shared,
        };

        let (source_name, suspended) = {
            let source = core.source_by_index(source_index).unwrap();
            source.attach(
                source_output_index,
                params.flags.start_corked,
                Box::new(io),
            );
            (source.name.clone(), source.suspended)
        };

        log::info!(
            "connection {}: record stream {} on source {}",
            self.index,
            channel,
            source_index
        );

        self.record_streams.insert(channel, stream);

        core.queue_event(
            SubscriptionEventFacility::SourceOutput,
            SubscriptionEventType::New,
            source_output_index,
        );

        self.send_reply(
            seq,
            &CreateRecordStreamReply {
                channel,
                source_output_index,
                buffer_attr: attr,
                sample_spec: spec,
                channel_map: params.channel_map,
                source_index,
                source_name: Some(source_name),
                suspended,
                source_latency: configured_latency,
                format,
            },
        );
        Ok(())
    }

    fn command_delete_playback_stream(
        &mut self,
        core: &mut Core,
        seq: u32,
        channel: u32,
    ) -> Result<(), PulseError> {
        if self.playback(channel).is_none() {
            return Err(PulseError::NoEntity);
        }

        self.teardown_playback_stream(core, channel);
        self.send_ack(seq);
        Ok(())
    }

    fn command_delete_record_stream(
        &mut self,
        core: &mut Core,
        seq: u32,
        channel: u32,
    ) -> Result<(), PulseError> {
        if !self.record_streams.contains_key(&channel) {
            return Err(PulseError::NoEntity);
        }

        self.teardown_record_stream(core, channel);
        self.send_ack(seq);
        Ok(())
    }

    /// Detaches a playback stream from the mixer and forgets it.
    /// Idempotent: a second call for the same channel is a no-op.
    pub fn teardown_playback_stream(&mut self, core: &mut Core, channel: u32) {
        let Some(OutputStream::Playback(stream)) = self.output_streams.remove(&channel) else {
            return;
        };

        if let Some(sink) = core.sink_by_index(stream.sink_index) {
            let _ = sink.detach(stream.sink_input_index);
        }

        core.queue_event(
            SubscriptionEventFacility::SinkInput,
            SubscriptionEventType::Removed,
            stream.sink_input_index,
        );
    }

    /// Detaches a record stream from the mixer and forgets it. Idempotent.
    pub fn teardown_record_stream(&mut self, core: &mut Core, channel: u32) {
        let Some(stream) = self.record_streams.remove(&channel) else {
            return;
        };

        if let Some(source) = core.source_by_index(stream.source_index) {
            let _ = source.detach(stream.source_output_index);
        }

        core.queue_event(
            SubscriptionEventFacility::SourceOutput,
            SubscriptionEventType::Removed,
            stream.source_output_index,
        );
    }

    /// Tears down every stream; the service calls this exactly once while
    /// unlinking.
    pub fn unlink(&mut self, core: &mut Core) {
        let channels: Vec<u32> = self.output_streams.keys().copied().collect();
        for channel in channels {
            match self.output_streams.get(&channel) {
                Some(OutputStream::Playback(_)) => self.teardown_playback_stream(core, channel),
                Some(OutputStream::Upload(_)) => {
                    self.output_streams.remove(&channel);
                }
                None => {}
            }
        }

        let channels: Vec<u32> = self.record_streams.keys().copied().collect();
        for channel in channels {
            self.teardown_record_stream(core, channel);
        }

        self.state = SessionState::Closed;
    }

    fn command_set_playback_buffer_attr(
        &mut self,
        core: &mut Core,
        seq: u32,
        params: SetPlaybackStreamBufferAttrParams,
    ) -> Result<(), PulseError> {
        let stream = self
            .playback_mut(params.channel)
            .ok_or(PulseError::NoEntity)?;

        stream.buffer_attr_req = params.buffer_attr;
        stream.adjust_latency = params.adjust_latency;
        stream.early_requests = params.early_requests;

        let spec = stream.spec;
        let sink_index = stream.sink_index;
        let sink_input_index = stream.sink_input_index;
        let adjust_latency = stream.adjust_latency;
        let early_requests = stream.early_requests;
        let req = stream.buffer_attr_req;

        let (attr, latency) = {
            let sink = core.sink_by_index_mut(sink_index).ok_or(PulseError::NoEntity)?;
            super::playback::resolve_buffer_attr(
                &req,
                &spec,
                adjust_latency,
                early_requests,
                sink,
                sink_input_index,
            )
        };

        // Apply on the I/O side and read back what the queue realised.
        let realised = {
            let sink = core.sink_by_index(sink_index).ok_or(PulseError::NoEntity)?;
            let (reply, rx) = reply_channel();
            sink.post(
                sink_input_index,
                StreamIoMessage::UpdateBufferAttr { attr, reply },
            );
            roundtrip(rx).unwrap_or(attr)
        };

        let stream = self.playback_mut(params.channel).unwrap();
        stream.buffer_attr = BufferAttr {
            fragsize: 0,
            ..realised
        };
        stream.configured_sink_latency = latency;

        self.send_reply(
            seq,
            &SetPlaybackStreamBufferAttrReply {
                buffer_attr: realised,
                sink_latency: latency,
            },
        );
        Ok(())
    }

    fn command_play_sample(
        &mut self,
        core: &mut Core,
        seq: u32,
        params: PlaySampleParams,
    ) -> Result<(), PulseError> {
        if params.sink_index.is_some() && params.sink_name.is_some() {
            return Err(PulseError::Invalid);
        }

        let sink_index = {
            let sink = core
                .sink_by_selector(params.sink_index, params.sink_name.as_ref())
                .ok_or(PulseError::NoEntity)?;
            sink.index
        };

        if core.scache.get(&params.name).is_none() {
            return Err(PulseError::NoEntity);
        }

        let index = core.alloc_index();
        {
            let sample = core.scache.get(&params.name).unwrap();
            let playback = SamplePlayback::new(sink_index, sample, self.main.clone());

            let sink = core.sink_by_index(sink_index).unwrap();
            sink.attach(index, 0, false, Box::new(playback));
        }
        core.sample_playbacks.insert(index, sink_index);

        if self.version >= 13 {
            self.send_reply(seq, &PlaySampleReply { index });
        } else {
            self.send_ack(seq);
        }
        Ok(())
    }

    fn command_move_sink_input(
        &mut self,
        core: &mut Core,
        peers: &mut Peers,
        seq: u32,
        params: MoveStreamParams,
    ) -> Result<(), PulseError> {
        let index = params.index.ok_or(PulseError::Invalid)?;
        if params.device_index.is_some() && params.device_name.is_some() {
            return Err(PulseError::Invalid);
        }

        let dest_index = {
            let sink = core
                .sink_by_selector(params.device_index, params.device_name.as_ref())
                .ok_or(PulseError::NoEntity)?;
            sink.index
        };

        {
            let conn = owner_of_sink_input(self, peers, index).ok_or(PulseError::NoEntity)?;
            let channel = conn.sink_input_channel(index).unwrap();
            move_playback_stream(core, conn, channel, dest_index)?;
        }

        core.queue_event(
            SubscriptionEventFacility::SinkInput,
            SubscriptionEventType::Changed,
            index,
        );
        self.send_ack(seq);
        Ok(())
    }

    fn command_move_source_output(
        &mut self,
        core: &mut Core,
        peers: &mut Peers,
        seq: u32,
        params: MoveStreamParams,
    ) -> Result<(), PulseError> {
        let index = params.index.ok_or(PulseError::Invalid)?;
        if params.device_index.is_some() && params.device_name.is_some() {
            return Err(PulseError::Invalid);
        }

        let dest_index = {
            let source = core
                .source_by_selector(params.device_index, params.device_name.as_ref())
                .ok_or(PulseError::NoEntity)?;
            source.index
        };

        {
            let conn = owner_of_source_output(self, peers, index).ok_or(PulseError::NoEntity)?;
            let channel = conn.source_output_channel(index).unwrap();
            move_record_stream(core, conn, channel, dest_index)?;
        }

        core.queue_event(
            SubscriptionEventFacility::SourceOutput,
            SubscriptionEventType::Changed,
            index,
        );
        self.send_ack(seq);
        Ok(())
    }
}

// -- move machinery ---------------------------------------------------------

/// Moves a playback stream to another sink: detach, best-effort rewind of
/// what the old device had buffered, re-negotiate metrics, re-attach.
fn move_playback_stream(
    core: &mut Core,
    conn: &mut Connection,
    channel: u32,
    dest_index: u32,
) -> Result<(), PulseError> {
    let (old_sink, sink_input_index, spec, adjust_latency, early_requests, req, sync_id, corked) = {
        let stream = conn.playback(channel).ok_or(PulseError::NoEntity)?;
        (
            stream.sink_index,
            stream.sink_input_index,
            stream.spec,
            stream.adjust_latency,
            stream.early_requests,
            stream.buffer_attr_req,
            stream.sync_id,
            stream.corked,
        )
    };

    if old_sink == dest_index {
        return Ok(());
    }

    let detached = {
        let sink = core.sink_by_index(old_sink).ok_or(PulseError::NoEntity)?;
        sink.detach(sink_input_index).ok_or(PulseError::NoEntity)?
    };

    let mut io = detached
        .input
        .into_any()
        .downcast::<PlaybackIo>()
        .map_err(|_| PulseError::Internal)?;

    // Back up over what the old device had rendered of us. The estimate
    // deliberately overshoots: a short double-play beats a gap.
    let spec_bytes = spec.usec_to_bytes(detached.sink_latency_usec);
    let frame = spec.frame_size();
    let rewind = (spec_bytes + detached.render_queue_len) / frame * frame;
    io.queue_mut().rewind(rewind);

    let (attr, latency) = {
        let sink = core
            .sink_by_index_mut(dest_index)
            .ok_or(PulseError::NoEntity)?;
        super::playback::resolve_buffer_attr(
            &req,
            &spec,
            adjust_latency,
            early_requests,
            sink,
            sink_input_index,
        )
    };

    io.queue_mut().apply_attr(&attr);

    // Skip exactly the new device's latency so the timeline never runs
    // backwards, at the price of a small gap.
    let skip = spec.usec_to_bytes(latency) / frame * frame;
    io.queue_mut().drop_bytes(skip);

    let (dest_name, dest_suspended) = {
        let sink = core.sink_by_index(dest_index).unwrap();
        sink.attach(sink_input_index, sync_id, corked, io);
        (sink.name.clone(), sink.suspended)
    };

    let stream = conn.playback_mut(channel).unwrap();
    stream.sink_index = dest_index;
    stream.buffer_attr = attr;
    stream.configured_sink_latency = latency;

    if conn.version >= 12 {
        conn.send_command(&Command::PlaybackStreamMoved(PlaybackStreamMoved {
            channel,
            device_index: dest_index,
            device_name: dest_name,
            device_suspended: dest_suspended,
            buffer_attr: attr,
            sink_latency: latency,
        }));
    }

    Ok(())
}

/// Moves a record stream to another source.
fn move_record_stream(
    core: &mut Core,
    conn: &mut Connection,
    channel: u32,
    dest_index: u32,
) -> Result<(), PulseError> {
    let (old_source, source_output_index, spec, adjust_latency, early_requests, req, corked) = {
        let stream = conn
            .record_streams
            .get(&channel)
            .ok_or(PulseError::NoEntity)?;
        (
            stream.source_index,
            stream.source_output_index,
            stream.spec,
            stream.adjust_latency,
            stream.early_requests,
            stream.buffer_attr_req,
            stream.corked,
        )
    };

    if old_source == dest_index {
        return Ok(());
    }

    let detached = {
        let source = core
            .source_by_index(old_source)
            .ok_or(PulseError::NoEntity)?;
        source
            .detach(source_output_index)
            .ok_or(PulseError::NoEntity)?
    };

    let io = detached
        .into_any()
        .downcast::<RecordIo>()
        .map_err(|_| PulseError::Internal)?;

    let (attr, latency) = {
        let source = core
            .source_by_index_mut(dest_index)
            .ok_or(PulseError::NoEntity)?;
        super::record::resolve_buffer_attr(
            &req,
            &spec,
            adjust_latency,
            early_requests,
            source,
            source_output_index,
        )
    };

    let (dest_name, dest_suspended) = {
        let source = core.source_by_index(dest_index).unwrap();
        source.attach(source_output_index, corked, io);
        (source.name.clone(), source.suspended)
    };

    let stream = conn.record_streams.get_mut(&channel).unwrap();
    stream.source_index = dest_index;
    stream.buffer_attr = attr;
    stream.configured_source_latency = latency;
    stream.q.set_maxlength(attr.maxlength as usize);

    if conn.version >= 12 {
        conn.send_command(&Command::RecordStreamMoved(RecordStreamMoved {
            channel,
            device_index: dest_index,
            device_name: dest_name,
            device_suspended: dest_suspended,
            buffer_attr: attr,
            source_latency: latency,
        }));
    }

    Ok(())
}

// -- lookup and info helpers ------------------------------------------------

fn close_fds(fds: &[RawFd]) {
    for fd in fds {
        unsafe { libc::close(*fd) };
    }
}

fn check_selector(index: &Option<u32>, name: &Option<CString>) -> Result<(), PulseError> {
    // Objects are addressed by index or name, never both, never neither.
    match (index, name) {
        (Some(_), None) | (None, Some(_)) => Ok(()),
        _ => Err(PulseError::Invalid),
    }
}

fn owner_of_sink_input<'a>(
    me: &'a mut Connection,
    peers: &'a mut Peers,
    index: u32,
) -> Option<&'a mut Connection> {
    if me.sink_input_channel(index).is_some() {
        return Some(me);
    }
    peers
        .values_mut()
        .find(|c| c.sink_input_channel(index).is_some())
}

fn owner_of_source_output<'a>(
    me: &'a mut Connection,
    peers: &'a mut Peers,
    index: u32,
) -> Option<&'a mut Connection> {
    if me.source_output_channel(index).is_some() {
        return Some(me);
    }
    peers
        .values_mut()
        .find(|c| c.source_output_channel(index).is_some())
}

fn playback_snapshot(core: &Core, stream: &PlaybackStream) -> Option<PlaybackTimingSnapshot> {
    let sink = core.sink_by_index(stream.sink_index)?;
    let (reply, rx) = reply_channel();
    sink.post(
        stream.sink_input_index,
        StreamIoMessage::UpdateLatency { reply },
    );
    roundtrip(rx)
}

fn record_snapshot(core: &Core, stream: &RecordStream) -> Option<RecordTimingSnapshot> {
    let source = core.source_by_index(stream.source_index)?;
    let (reply, rx) = reply_channel();
    source.post(
        stream.source_output_index,
        RecordIoMessage::UpdateLatency { reply },
    );
    roundtrip(rx)
}

fn client_info(conn: &Connection) -> ClientInfo {
    ClientInfo {
        index: conn.index,
        name: conn.client_name(),
        owner_module_index: Some(0),
        driver: Some(CString::new("pavane").unwrap()),
        props: conn.props.clone(),
    }
}

fn client_info_for(me: &Connection, peers: &Peers, index: u32) -> Option<ClientInfo> {
    if me.index == index {
        return Some(client_info(me));
    }
    peers
        .values()
        .find(|c| c.index == index)
        .map(client_info)
}

fn sink_input_info(core: &Core, conn: &Connection, stream: &PlaybackStream) -> SinkInputInfo {
    let snapshot = playback_snapshot(core, stream).unwrap_or_default();
    let buffered = (snapshot.write_index - snapshot.read_index).max(0) as u64;

    SinkInputInfo {
        index: stream.sink_input_index,
        name: stream
            .media_name()
            .unwrap_or_else(|| CString::new("Playback Stream").unwrap()),
        owner_module_index: Some(0),
        client_index: Some(conn.index),
        sink_index: stream.sink_index,
        sample_spec: stream.spec,
        channel_map: stream.map,
        volume: stream.volume,
        buffer_latency: stream.spec.bytes_to_usec(buffered),
        sink_latency: snapshot.sink_latency_usec,
        resample_method: None,
        driver: Some(CString::new("pavane").unwrap()),
        muted: stream.muted,
        props: stream.props.clone(),
        corked: stream.corked,
        has_volume: stream.volume_set,
        volume_writable: true,
        format: stream.format.clone(),
    }
}

fn collect_sink_input_infos(core: &Core, conn: &Connection, out: &mut Vec<SinkInputInfo>) {
    for stream in conn.output_streams.values() {
        if let OutputStream::Playback(p) = stream {
            out.push(sink_input_info(core, conn, p));
        }
    }
}

fn sink_input_info_for(
    core: &Core,
    me: &Connection,
    peers: &Peers,
    index: u32,
) -> Option<SinkInputInfo> {
    let find = |conn: &Connection| {
        conn.output_streams.values().find_map(|s| match s {
            OutputStream::Playback(p) if p.sink_input_index == index => {
                Some(sink_input_info(core, conn, p))
            }
            _ => None,
        })
    };

    find(me).or_else(|| peers.values().find_map(|c| find(c)))
}

fn source_output_info(core: &Core, conn: &Connection, stream: &RecordStream) -> SourceOutputInfo {
    let snapshot = record_snapshot(core, stream).unwrap_or_default();
    let buffered = stream.q.len() as u64 + snapshot.on_the_fly as u64;

    SourceOutputInfo {
        index: stream.source_output_index,
        name: stream
            .media_name()
            .unwrap_or_else(|| CString::new("Record Stream").unwrap()),
        owner_module_index: Some(0),
        client_index: Some(conn.index),
        source_index: stream.source_index,
        sample_spec: stream.spec,
        channel_map: stream.map,
        buffer_latency: stream.spec.bytes_to_usec(buffered),
        source_latency: snapshot.source_latency_usec,
        resample_method: None,
        driver: Some(CString::new("pavane").unwrap()),
        props: stream.props.clone(),
        corked: stream.corked,
        volume: stream.volume,
        muted: stream.muted,
        has_volume: stream.volume_set,
        volume_writable: true,
        format: stream.format.clone(),
    }
}

fn collect_source_output_infos(core: &Core, conn: &Connection, out: &mut Vec<SourceOutputInfo>) {
    for stream in conn.record_streams.values() {
        out.push(source_output_info(core, conn, stream));
    }
}

fn source_output_info_for(
    core: &Core,
    me: &Connection,
    peers: &Peers,
    index: u32,
) -> Option<SourceOutputInfo> {
    let find = |conn: &Connection| {
        conn.record_streams
            .values()
            .find(|s| s.source_output_index == index)
            .map(|s| source_output_info(core, conn, s))
    };

    find(me).or_else(|| peers.values().find_map(|c| find(c)))
}

fn sample_info(sample: &super::upload::CachedSample) -> SampleInfo {
    SampleInfo {
        index: sample.index,
        name: sample.name.clone(),
        volume: sample.volume,
        sample_spec: sample.spec,
        channel_map: sample.map,
        duration: sample.duration_usec(),
        length: sample.chunk.length as u32,
        lazy_filename: None,
        props: sample.props.clone(),
    }
}
