//! The server side of the native protocol: a service accepting client
//! connections and wiring them to the mixer.

pub mod ancil;
pub mod connection;
pub mod cookie;
pub mod dispatcher;
pub mod ip_acl;
pub mod memblock;
pub mod memblockq;
pub mod mixer;
pub mod options;
pub mod playback;
pub mod pstream;
pub mod record;
pub mod srbchannel;
pub mod upload;
pub mod usergroup;

use std::collections::HashMap;
use std::ffi::CString;
use std::io;
use std::path::Path;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use mio::{Events, Interest, Poll, Token};

use crate::protocol::{
    ChannelMap, Command, ModuleInfo, ModuleInfoList, Props, PulseError, SampleSpec, ServerInfo,
    SubscriptionEvent, SubscriptionEventFacility, SubscriptionEventType, INVALID_INDEX,
};

use connection::{Connection, Transport};
use memblock::{MemPool, PoolBacking};
use mixer::{MainHandle, MainMessage, Sink, Source};
use options::NativeOptions;
use upload::SampleCache;

pub use connection::AUTH_TIMEOUT;

/// Hard cap on simultaneously connected clients.
pub const MAX_CONNECTIONS: usize = 64;

/// The connection set, keyed by poll token.
pub(crate) type Peers = HashMap<Token, Connection>;

/// An opcode handler a loadable extension registers for its module name.
pub type ExtensionHandler = Box<dyn FnMut(u32, &[u8]) -> Result<Vec<u8>, PulseError>>;

/// Lifecycle notifications fired by the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceEvent {
    /// A connection finished setup, with its client index.
    ConnectionPut(u32),
    /// A connection was unlinked, with its client index.
    ConnectionUnlink(u32),
    /// The advertised server-address list changed.
    ServersChanged,
}

type HookFn = Box<dyn FnMut(&ServiceEvent)>;

/// The global state the connections operate on: devices, the sample
/// cache, and the event fan-out.
pub struct Core {
    pub mempool: MemPool,

    pub sinks: Vec<Sink>,
    pub sources: Vec<Source>,
    pub default_sink: u32,
    pub default_source: u32,

    pub scache: SampleCache,

    /// Active transient sample playbacks: stream index to sink index.
    pub sample_playbacks: HashMap<u32, u32>,

    /// Extension handlers keyed by module name.
    pub extensions: HashMap<CString, ExtensionHandler>,

    /// The uid the server runs as; local peers matching it are trusted.
    pub uid: u32,

    /// A random id identifying this server instance.
    pub server_cookie: u32,

    /// Set by the `EXIT` command; the daemon loop observes it.
    pub exit_requested: bool,

    next_index: u32,
    pending_events: Vec<SubscriptionEvent>,
}

impl std::fmt::Debug for Core {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Core")
            .field("sinks", &self.sinks.len())
            .field("sources", &self.sources.len())
            .finish()
    }
}

impl Core {
    fn new(mempool: MemPool) -> Self {
        use rand::RngCore as _;

        Self {
            mempool,
            sinks: Vec::new(),
            sources: Vec::new(),
            default_sink: INVALID_INDEX,
            default_source: INVALID_INDEX,
            scache: SampleCache::new(),
            sample_playbacks: HashMap::new(),
            extensions: HashMap::new(),
            uid: unsafe { libc::geteuid() },
            server_cookie: rand::rng().next_u32(),
            exit_requested: false,
            next_index: 0,
            pending_events: Vec::new(),
        }
    }

    /// Allocates a server-wide object index.
    pub fn alloc_index(&mut self) -> u32 {
        let index = self.next_index;
        self.next_index += 1;
        index
    }

    /// Registers a sink; the first one becomes the default.
    pub fn add_sink(&mut self, sink: Sink) {
        if self.default_sink == INVALID_INDEX {
            self.default_sink = sink.index;
        }
        self.queue_event(
            SubscriptionEventFacility::Sink,
            SubscriptionEventType::New,
            sink.index,
        );
        self.sinks.push(sink);
    }

    /// Registers a source; the first one becomes the default.
    pub fn add_source(&mut self, source: Source) {
        if self.default_source == INVALID_INDEX {
            self.default_source = source.index;
        }
        self.queue_event(
            SubscriptionEventFacility::Source,
            SubscriptionEventType::New,
            source.index,
        );
        self.sources.push(source);
    }

    pub fn sink_by_index(&self, index: u32) -> Option<&Sink> {
        self.sinks.iter().find(|s| s.index == index)
    }

    pub fn sink_by_index_mut(&mut self, index: u32) -> Option<&mut Sink> {
        self.sinks.iter_mut().find(|s| s.index == index)
    }

    pub fn source_by_index(&self, index: u32) -> Option<&Source> {
        self.sources.iter().find(|s| s.index == index)
    }

    pub fn source_by_index_mut(&mut self, index: u32) -> Option<&mut Source> {
        self.sources.iter_mut().find(|s| s.index == index)
    }

    /// Resolves a sink by index, name, or wildcard; with neither given,
    /// the default sink.
    pub fn sink_by_selector(&self, index: Option<u32>, name: Option<&CString>) -> Option<&Sink> {
        match (index, name) {
            (Some(index), _) => self.sink_by_index(index),
            (None, Some(name)) => {
                if name.to_bytes() == b"@DEFAULT_SINK@" {
                    self.sink_by_index(self.default_sink)
                } else {
                    self.sinks.iter().find(|s| s.name.as_c_str() == name.as_c_str())
                }
            }
            (None, None) => self.sink_by_index(self.default_sink),
        }
    }

    pub fn sink_by_selector_mut(
        &mut self,
        index: Option<u32>,
        name: Option<&CString>,
    ) -> Option<&mut Sink> {
        let found = self.sink_by_selector(index, name)?.index;
        self.sink_by_index_mut(found)
    }

    /// Resolves a source by index, name, or wildcard; with neither given,
    /// the default source.
    pub fn source_by_selector(
        &self,
        index: Option<u32>,
        name: Option<&CString>,
    ) -> Option<&Source> {
        match (index, name) {
            (Some(index), _) => self.source_by_index(index),
            (None, Some(name)) => match name.to_bytes() {
                b"@DEFAULT_SOURCE@" => self.source_by_index(self.default_source),
                b"@DEFAULT_MONITOR@" => self
                    .sources
                    .iter()
                    .find(|s| s.monitor_of == Some(self.default_sink))
                    .or_else(|| self.source_by_index(self.default_source)),
                _ => self
                    .sources
                    .iter()
                    .find(|s| s.name.as_c_str() == name.as_c_str()),
            },
            (None, None) => self.source_by_index(self.default_source),
        }
    }

    pub fn source_by_selector_mut(
        &mut self,
        index: Option<u32>,
        name: Option<&CString>,
    ) -> Option<&mut Source> {
        let found = self.source_by_selector(index, name)?.index;
        self.source_by_index_mut(found)
    }

    /// Queues a subscription event for broadcast at the end of the current
    /// service pass.
    pub fn queue_event(
        &mut self,
        facility: SubscriptionEventFacility,
        event_type: SubscriptionEventType,
        index: u32,
    ) {
        self.pending_events.push(SubscriptionEvent {
            facility,
            event_type,
            index: if index == INVALID_INDEX {
                None
            } else {
                Some(index)
            },
        });
    }

    pub(crate) fn take_events(&mut self) -> Vec<SubscriptionEvent> {
        std::mem::take(&mut self.pending_events)
    }

    pub fn server_info(&self) -> ServerInfo {
        let default_sink = self.sink_by_index(self.default_sink);
        let default_source = self.source_by_index(self.default_source);

        ServerInfo {
            server_name: Some(CString::new("pavane").unwrap()),
            server_version: Some(CString::new(env!("CARGO_PKG_VERSION")).unwrap()),
            user_name: usergroup::user_name(self.uid),
            host_name: host_name(),
            sample_spec: default_sink.map(|s| s.spec).unwrap_or_default(),
            cookie: self.server_cookie,
            default_sink_name: default_sink.map(|s| s.name.clone()),
            default_source_name: default_source.map(|s| s.name.clone()),
            channel_map: default_sink.map(|s| s.map).unwrap_or_else(ChannelMap::default),
        }
    }

    pub fn sink_info(&self, index: u32) -> Option<crate::protocol::SinkInfo> {
        use crate::protocol::{DeviceState, FormatEncoding, FormatInfo, SinkFlags, Volume};

        let sink = self.sink_by_index(index)?;
        let monitor = self.sources.iter().find(|s| s.monitor_of == Some(index));

        Some(crate::protocol::SinkInfo {
            index: sink.index,
            name: sink.name.clone(),
            description: sink.description.clone(),
            props: sink.props.clone(),
            state: if sink.suspended {
                DeviceState::Suspended
            } else {
                DeviceState::Idle
            },
            sample_spec: sink.spec,
            channel_map: sink.map,
            owner_module_index: Some(0),
            volume: sink.volume,
            muted: sink.muted,
            monitor_source_index: monitor.map(|s| s.index),
            monitor_source_name: monitor.map(|s| s.name.clone()),
            actual_latency: sink.latency_usec(),
            configured_latency: sink.latency_usec(),
            driver: Some(CString::new("pavane").unwrap()),
            flags: SinkFlags::LATENCY | SinkFlags::DECIBEL_VOLUME | SinkFlags::DYNAMIC_LATENCY,
            base_volume: Volume::NORM,
            volume_steps: None,
            card_index: None,
            ports: Vec::new(),
            active_port: 0,
            formats: vec![FormatInfo::new(FormatEncoding::Pcm)],
        })
    }

    pub fn source_info(&self, index: u32) -> Option<crate::protocol::SourceInfo> {
        use crate::protocol::{DeviceState, FormatEncoding, FormatInfo, SourceFlags, Volume};

        let source = self.source_by_index(index)?;
        let monitored = source
            .monitor_of
            .and_then(|sink_index| self.sink_by_index(sink_index));

        Some(crate::protocol::SourceInfo {
            index: source.index,
            name: source.name.clone(),
            description: source.description.clone(),
            props: source.props.clone(),
            state: if source.suspended {
                DeviceState::Suspended
            } else {
                DeviceState::Idle
            },
            sample_spec: source.spec,
            channel_map: source.map,
            owner_module_index: Some(0),
            volume: source.volume,
            muted: source.muted,
            monitor_of_sink_index: monitored.map(|s| s.index),
            monitor_of_sink_name: monitored.map(|s| s.name.clone()),
            actual_latency: source.latency_usec(),
            configured_latency: source.latency_usec(),
            driver: Some(CString::new("pavane").unwrap()),
            flags: SourceFlags::LATENCY | SourceFlags::DECIBEL_VOLUME | SourceFlags::DYNAMIC_LATENCY,
            base_volume: Volume::NORM,
            volume_steps: None,
            card_index: None,
            ports: Vec::new(),
            active_port: 0,
            formats: vec![FormatInfo::new(FormatEncoding::Pcm)],
        })
    }

    /// The module facade: the endpoint itself is module 0.
    pub fn module_list(&self) -> ModuleInfoList {
        vec![ModuleInfo {
            index: 0,
            name: CString::new("module-native-protocol-unix").unwrap(),
            argument: None,
            n_used: None,
            props: Props::new(),
        }]
    }

    pub fn module_info(&self, index: u32) -> Option<ModuleInfo> {
        self.module_list().into_iter().find(|m| m.index == index)
    }
}

fn host_name() -> Option<CString> {
    let mut buf = [0u8; 256];
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast(), buf.len() - 1) };
    if rc != 0 {
        return None;
    }

    let len = buf.iter().position(|b| *b == 0)?;
    CString::new(&buf[..len]).ok()
}

const WAKER_TOKEN: Token = Token(0);
const FIRST_LISTENER_TOKEN: usize = 1;
const FIRST_CONNECTION_TOKEN: usize = 64;

enum Listener {
    Unix(mio::net::UnixListener),
    Tcp(mio::net::TcpListener),
}

/// The native-protocol service: accepts connections, runs the main loop
/// pass, owns the global state.
pub struct ProtocolService {
    poll: Poll,
    events: Events,

    main_rx: mpsc::Receiver<MainMessage>,
    main_handle: MainHandle,

    listeners: HashMap<Token, Listener>,
    connections: Peers,
    next_token: usize,
    next_client_index: u32,

    /// Options applied to newly accepted connections.
    pub options: NativeOptions,

    pub core: Core,

    hooks: Vec<HookFn>,
    server_strings: Vec<String>,
}

impl std::fmt::Debug for ProtocolService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolService")
            .field("connections", &self.connections.len())
            .finish()
    }
}

impl ProtocolService {
    pub fn new(options: NativeOptions) -> io::Result<Self> {
        let poll = Poll::new()?;
        let waker = Arc::new(mio::Waker::new(poll.registry(), WAKER_TOKEN)?);
        let (main_tx, main_rx) = mpsc::channel();

        let mempool = MemPool::new(PoolBacking::Private)?;

        Ok(Self {
            poll,
            events: Events::with_capacity(256),
            main_rx,
            main_handle: MainHandle::new(main_tx, waker),
            listeners: HashMap::new(),
            connections: HashMap::new(),
            next_token: FIRST_CONNECTION_TOKEN,
            next_client_index: 0,
            options,
            core: Core::new(mempool),
            hooks: Vec::new(),
            server_strings: Vec::new(),
        })
    }

    /// The handle I/O domains use to reach this service's loop.
    pub fn main_handle(&self) -> MainHandle {
        self.main_handle.clone()
    }

    /// Registers a lifecycle hook.
    pub fn add_hook(&mut self, hook: impl FnMut(&ServiceEvent) + 'static) {
        self.hooks.push(Box::new(hook));
    }

    fn fire(&mut self, event: ServiceEvent) {
        for hook in &mut self.hooks {
            hook(&event);
        }
    }

    /// The advertised server addresses.
    pub fn server_strings(&self) -> &[String] {
        &self.server_strings
    }

    pub fn add_server_string(&mut self, s: String) {
        self.server_strings.push(s);
        self.fire(ServiceEvent::ServersChanged);
    }

    pub fn remove_server_string(&mut self, s: &str) {
        let before = self.server_strings.len();
        self.server_strings.retain(|x| x != s);
        if self.server_strings.len() != before {
            self.fire(ServiceEvent::ServersChanged);
        }
    }

    /// Registers an extension handler for the given module name.
    pub fn register_extension(&mut self, name: CString, handler: ExtensionHandler) {
        self.core.extensions.insert(name, handler);
    }

    /// Starts listening on a Unix socket at `path`.
    pub fn listen_unix<P: AsRef<Path>>(&mut self, path: P) -> io::Result<()> {
        let mut listener = mio::net::UnixListener::bind(path.as_ref())?;

        let token = Token(FIRST_LISTENER_TOKEN + self.listeners.len());
        self.poll
            .registry()
            .register(&mut listener, token, Interest::READABLE)?;
        self.listeners.insert(token, Listener::Unix(listener));

        self.add_server_string(format!("unix:{}", path.as_ref().display()));
        Ok(())
    }

    /// Starts listening on a TCP address.
    pub fn listen_tcp(&mut self, addr: std::net::SocketAddr) -> io::Result<()> {
        let mut listener = mio::net::TcpListener::bind(addr)?;

        let token = Token(FIRST_LISTENER_TOKEN + self.listeners.len());
        self.poll
            .registry()
            .register(&mut listener, token, Interest::READABLE)?;
        self.listeners.insert(token, Listener::Tcp(listener));

        self.add_server_string(format!("tcp:{}", addr));
        Ok(())
    }

    /// Adopts an already-connected byte channel as a client connection.
    /// This is also how tests hand one end of a socketpair to the service.
    pub fn accept_connection(&mut self, mut transport: Transport) -> io::Result<()> {
        if self.connections.len() >= MAX_CONNECTIONS {
            log::warn!("refusing connection: limit of {} reached", MAX_CONNECTIONS);
            return Err(io::ErrorKind::ConnectionRefused.into());
        }

        let token = Token(self.next_token);
        self.next_token += 1;

        transport.register(self.poll.registry(), token)?;

        let index = self.next_client_index;
        self.next_client_index += 1;

        log::info!("new client connection {}", index);

        let connection = Connection::new(
            index,
            transport,
            self.options.clone(),
            self.core.mempool.clone(),
            self.main_handle.clone(),
        );

        self.connections.insert(token, connection);
        self.fire(ServiceEvent::ConnectionPut(index));

        Ok(())
    }

    /// Runs the loop until an `EXIT` command arrives.
    pub fn run(&mut self) -> io::Result<()> {
        while !self.core.exit_requested {
            self.run_once(None)?;
        }
        Ok(())
    }

    /// One pass of the main loop: waits for activity (bounded by `timeout`
    /// and the earliest internal deadline), then handles everything that
    /// is ready.
    pub fn run_once(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        let now = Instant::now();
        let deadline = self.next_deadline();

        let poll_timeout = match (timeout, deadline) {
            (None, None) => None,
            (t, d) => {
                let by_deadline = d.map(|d| d.saturating_duration_since(now));
                Some(match (t, by_deadline) {
                    (Some(t), Some(d)) => t.min(d),
                    (Some(t), None) => t,
                    (None, Some(d)) => d,
                    (None, None) => unreachable!(),
                })
            }
        };

        match self.poll.poll(&mut self.events, poll_timeout) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e),
        }

        let mut ready: Vec<Token> = Vec::new();
        let mut woke = false;
        let mut listeners: Vec<Token> = Vec::new();

        for event in self.events.iter() {
            match event.token() {
                WAKER_TOKEN => woke = true,
                token if self.listeners.contains_key(&token) => listeners.push(token),
                token => ready.push(token),
            }
        }

        for token in listeners {
            self.accept_ready(token);
        }

        if woke {
            self.process_main_messages();
        }

        for token in ready {
            self.process_connection_io(token);
        }

        self.sweep_deadlines();
        self.broadcast_events();
        self.reap_closed();

        Ok(())
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.connections
            .values()
            .flat_map(|c| {
                c.auth_deadline
                    .into_iter()
                    .chain(c.dispatcher.next_deadline())
            })
            .min()
    }

    fn accept_ready(&mut self, token: Token) {
        loop {
            let transport = match self.listeners.get_mut(&token) {
                Some(Listener::Unix(listener)) => match listener.accept() {
                    Ok((stream, _)) => Transport::Unix(stream),
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                    Err(e) => {
                        log::warn!("accept failed: {}", e);
                        return;
                    }
                },
                Some(Listener::Tcp(listener)) => match listener.accept() {
                    Ok((stream, _)) => Transport::Tcp(stream),
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                    Err(e) => {
                        log::warn!("accept failed: {}", e);
                        return;
                    }
                },
                None => return,
            };

            let _ = self.accept_connection(transport);
        }
    }

    fn process_connection_io(&mut self, token: Token) {
        let Some(mut conn) = self.connections.remove(&token) else {
            return;
        };

        for frame in conn.read_frames() {
            match frame {
                pstream::Inbound::Packet { payload, fds } => {
                    conn.handle_packet(&mut self.core, &mut self.connections, payload, fds);
                }
                pstream::Inbound::MemBlock {
                    channel,
                    offset,
                    seek,
                    chunk,
                } => {
                    conn.handle_memblock(&mut self.core, channel, offset, seek, chunk);
                }
                pstream::Inbound::ShmRelease { block_id } => {
                    log::debug!("peer released block {}", block_id);
                }
                pstream::Inbound::ShmRevoke { block_id } => {
                    log::debug!("peer revoked block {}", block_id);
                }
            }

            if conn.wants_close() {
                break;
            }
        }

        if conn.peer_gone() {
            log::info!("connection {}: peer disconnected", conn.index);
            conn.request_close();
        }

        conn.flush();
        self.connections.insert(token, conn);
    }

    fn process_main_messages(&mut self) {
        while let Ok(msg) = self.main_rx.try_recv() {
            match msg {
                MainMessage::RequestData { conn, channel } => {
                    if let Some(c) = self.connection_by_index(conn) {
                        if let Some(stream) = c.playback(channel) {
                            let length = stream.take_missing();
                            if length > 0 {
                                c.send_command(&Command::Request(crate::protocol::Request {
                                    channel,
                                    length,
                                }));
                                c.flush();
                            }
                        }
                    }
                }

                MainMessage::Underflow { conn, channel, offset } => {
                    if let Some(c) = self.connection_by_index(conn) {
                        c.send_command(&Command::Underflow(crate::protocol::Underflow {
                            channel,
                            offset,
                        }));
                        c.flush();
                    }
                }

                MainMessage::Overflow { conn, channel } => {
                    if let Some(c) = self.connection_by_index(conn) {
                        c.send_command(&Command::Overflow(channel));
                        c.flush();
                    }
                }

                MainMessage::Started { conn, channel } => {
                    if let Some(c) = self.connection_by_index(conn) {
                        c.send_command(&Command::Started(channel));
                        c.flush();
                    }
                }

                MainMessage::DrainAck { conn, channel, tag } => {
                    let _ = channel;
                    if let Some(c) = self.connection_by_index(conn) {
                        c.send_ack(tag);
                        c.flush();
                    }
                }

                MainMessage::RecordData {
                    conn,
                    channel,
                    chunk,
                } => {
                    if let Some(c) = self.connection_by_index(conn) {
                        if let Some(stream) = c.record_streams.get_mut(&channel) {
                            stream.post_data(chunk);
                        }
                        // An idle packet stream starts the delivery chain.
                        c.flush();
                    }
                }

                MainMessage::SampleDone { sink_index, index } => {
                    self.core.sample_playbacks.remove(&index);
                    if let Some(sink) = self.core.sink_by_index(sink_index) {
                        let _ = sink.detach(index);
                    }
                }
            }
        }
    }

    fn connection_by_index(&mut self, index: u32) -> Option<&mut Connection> {
        self.connections.values_mut().find(|c| c.index == index)
    }

    fn sweep_deadlines(&mut self) {
        let now = Instant::now();

        for conn in self.connections.values_mut() {
            if conn
                .auth_deadline
                .is_some_and(|deadline| deadline <= now)
            {
                log::info!("connection {}: authentication timed out", conn.index);
                conn.auth_deadline = None;
                conn.request_close();
            }

            conn.dispatcher.sweep_timeouts(now);
        }
    }

    fn broadcast_events(&mut self) {
        let events = self.core.take_events();
        if events.is_empty() {
            return;
        }

        for conn in self.connections.values_mut() {
            for event in &events {
                conn.notify_event(*event);
            }
            conn.flush();
        }
    }

    fn reap_closed(&mut self) {
        let closed: Vec<Token> = self
            .connections
            .iter()
            .filter(|(_, c)| c.wants_close())
            .map(|(t, _)| *t)
            .collect();

        for token in closed {
            if let Some(mut conn) = self.connections.remove(&token) {
                // Push out anything still queued (error replies mostly)
                // before the socket goes away.
                conn.flush();

                log::info!("unlinking connection {}", conn.index);
                conn.unlink(&mut self.core);

                let _ = conn.transport.deregister(self.poll.registry());
                let index = conn.index;
                drop(conn);

                self.fire(ServiceEvent::ConnectionUnlink(index));
            }
        }

        // Stream teardown queues removal events; deliver them in the same
        // pass so the unlink is observable.
        self.broadcast_events();
    }
}

impl Drop for ProtocolService {
    fn drop(&mut self) {
        for (_, listener) in self.listeners.drain() {
            if let Listener::Unix(listener) = listener {
                if let Ok(addr) = listener.local_addr() {
                    if let Some(path) = addr.as_pathname() {
                        let _ = std::fs::remove_file(path);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::net::UnixStream;

    use super::*;

    fn service() -> ProtocolService {
        service_with_null_devices(NativeOptions::default(), SampleSpec::default(), false).unwrap()
    }

    fn adopt(service: &mut ProtocolService) -> UnixStream {
        let (ours, theirs) = UnixStream::pair().unwrap();
        theirs.set_nonblocking(true).unwrap();
        service
            .accept_connection(Transport::Unix(mio::net::UnixStream::from_std(theirs)))
            .unwrap();
        ours
    }

    #[test]
    fn auth_timeout_reaps_silent_connections() {
        use std::io::Read as _;

        let mut service = service();
        let unlinked = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
        let counter = unlinked.clone();
        service.add_hook(move |event| {
            if matches!(event, ServiceEvent::ConnectionUnlink(_)) {
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }
        });

        let mut sock = adopt(&mut service);
        assert_eq!(service.connections.len(), 1);

        // Backdate the deadline instead of waiting a minute.
        for conn in service.connections.values_mut() {
            conn.auth_deadline = Some(Instant::now() - Duration::from_secs(1));
        }

        service.run_once(Some(Duration::from_millis(1))).unwrap();
        assert!(service.connections.is_empty());

        // Exactly one unlink, and the client observes EOF.
        service.run_once(Some(Duration::from_millis(1))).unwrap();
        assert_eq!(unlinked.load(std::sync::atomic::Ordering::SeqCst), 1);

        sock.set_read_timeout(Some(Duration::from_millis(500)))
            .unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(sock.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn connection_limit_is_enforced() {
        let mut service = service();

        let mut held = Vec::new();
        for _ in 0..MAX_CONNECTIONS {
            held.push(adopt(&mut service));
        }

        let (_ours, theirs) = UnixStream::pair().unwrap();
        theirs.set_nonblocking(true).unwrap();
        let result =
            service.accept_connection(Transport::Unix(mio::net::UnixStream::from_std(theirs)));
        assert!(result.is_err());
    }

    #[test]
    fn server_strings_fire_hooks() {
        let mut service = service();

        let changed = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
        let counter = changed.clone();
        service.add_hook(move |event| {
            if matches!(event, ServiceEvent::ServersChanged) {
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }
        });

        service.add_server_string("unix:/tmp/test".into());
        service.remove_server_string("unix:/tmp/test");
        service.remove_server_string("unix:/tmp/test");

        assert_eq!(changed.load(std::sync::atomic::Ordering::SeqCst), 2);
        assert!(service.server_strings().is_empty());
    }
}

/// Convenience constructor used by the daemon and tests: a service with a
/// null sink and null source already registered.
pub fn service_with_null_devices(
    options: NativeOptions,
    spec: SampleSpec,
    paced: bool,
) -> io::Result<ProtocolService> {
    use mixer::{SinkConfig, SourceConfig};

    let mut service = ProtocolService::new(options)?;

    let period = paced.then(|| Duration::from_millis(10));

    let mut sink_config = SinkConfig::null(0, "auto_null");
    sink_config.description = Some(CString::new("Null Output").unwrap());
    sink_config.spec = spec;
    sink_config.map = ChannelMap::with_channels(spec.channels);
    sink_config.period = period;
    service.core.add_sink(Sink::new(sink_config));

    let mut source_config = SourceConfig::null(1, "auto_null.monitor");
    source_config.description = Some(CString::new("Monitor of Null Output").unwrap());
    source_config.spec = spec;
    source_config.map = ChannelMap::with_channels(spec.channels);
    source_config.period = period;
    source_config.monitor_of = Some(0);
    service.core.add_source(Source::new(source_config));

    Ok(service)
}
