//! End-to-end tests driving a real service through the wire format, the
//! way a native client would.

use std::io::{BufReader, Write};
use std::os::unix::net::UnixStream;
use std::time::Duration;

use anyhow::Context as _;
use assert_matches::assert_matches;

use pavane::protocol::*;
use pavane::server::connection::Transport;
use pavane::server::options::NativeOptions;
use pavane::server::{service_with_null_devices, ProtocolService};

const SPEC: SampleSpec = SampleSpec {
    format: SampleFormat::S16Le,
    channels: 2,
    rate: 48000,
};

struct Client {
    sock: BufReader<UnixStream>,
    version: u16,
    next_seq: u32,
}

impl Client {
    fn new(sock: UnixStream) -> Self {
        sock.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        Self {
            sock: BufReader::new(sock),
            version: MAX_VERSION,
            next_seq: 0,
        }
    }

    fn send(&mut self, command: &Command) -> anyhow::Result<u32> {
        let seq = self.next_seq;
        self.next_seq += 1;
        write_command_message(self.sock.get_mut(), seq, command, self.version)?;
        Ok(seq)
    }

    fn reply<T: CommandReply>(&mut self) -> anyhow::Result<(u32, T)> {
        Ok(read_reply_message(&mut self.sock, self.version)?)
    }

    fn ack(&mut self) -> anyhow::Result<u32> {
        Ok(read_ack_message(&mut self.sock)?)
    }

    fn event(&mut self) -> anyhow::Result<Command> {
        let (_, command) = read_command_message(&mut self.sock, self.version)?;
        Ok(command)
    }

    fn write_audio(&mut self, channel: u32, data: &[u8]) -> anyhow::Result<()> {
        self.write_audio_at(channel, 0, SeekMode::Relative, data)
    }

    fn write_audio_at(
        &mut self,
        channel: u32,
        offset: i64,
        seek: SeekMode,
        data: &[u8],
    ) -> anyhow::Result<()> {
        let sock = self.sock.get_mut();
        write_frame_header(
            sock,
            FrameHeader {
                length: data.len() as u32,
                channel,
                offset,
                flags: FrameFlags::for_memblock(seek),
            },
        )?;
        sock.write_all(data)?;
        Ok(())
    }

    /// Reads the next frame; either a command packet or an audio frame.
    fn frame(&mut self) -> anyhow::Result<(FrameHeader, Vec<u8>)> {
        use std::io::Read;

        let header = read_frame_header(&mut self.sock)?;
        let mut payload = vec![0; header.length as usize];
        self.sock.read_exact(&mut payload)?;
        Ok((header, payload))
    }
}

fn pump(service: &mut ProtocolService, passes: usize) {
    for _ in 0..passes {
        service
            .run_once(Some(Duration::from_millis(20)))
            .expect("service pass");
    }
}

fn connect(service: &mut ProtocolService) -> Client {
    let (ours, theirs) = UnixStream::pair().unwrap();
    theirs.set_nonblocking(true).unwrap();

    service
        .accept_connection(Transport::Unix(mio::net::UnixStream::from_std(theirs)))
        .unwrap();

    Client::new(ours)
}

fn server() -> ProtocolService {
    service_with_null_devices(NativeOptions::default(), SPEC, false).unwrap()
}

fn handshake(service: &mut ProtocolService, client: &mut Client, version: u16) -> anyhow::Result<()> {
    client.version = version;
    client.send(&Command::Auth(AuthParams {
        version,
        supports_shm: false,
        supports_memfd: false,
        cookie: vec![0; 256],
    }))?;
    pump(service, 2);

    let (_, reply): (_, AuthReply) = client.reply()?;
    assert_eq!(reply.version, version.min(MAX_VERSION));
    client.version = reply.version;

    let mut props = Props::new();
    props.set(Prop::ApplicationName, std::ffi::CString::new("test")?);
    client.send(&Command::SetClientName(props))?;
    pump(service, 2);
    let (_, reply): (_, SetClientNameReply) = client.reply()?;
    let _ = reply.client_index;

    Ok(())
}

fn create_playback(
    service: &mut ProtocolService,
    client: &mut Client,
    attr: BufferAttr,
) -> anyhow::Result<CreatePlaybackStreamReply> {
    client.send(&Command::CreatePlaybackStream(PlaybackStreamParams {
        sample_spec: SPEC,
        channel_map: ChannelMap::stereo(),
        buffer_attr: attr,
        volume: Some(ChannelVolume::norm(2)),
        ..Default::default()
    }))?;
    pump(service, 2);

    let (_, reply) = client.reply()?;
    Ok(reply)
}

/// Collects the commands queued for the client without blocking on an
/// empty socket.
fn drain_events(client: &mut Client) -> Vec<Command> {
    let sock = client.sock.get_mut();
    sock.set_read_timeout(Some(Duration::from_millis(200))).unwrap();

    let mut events = Vec::new();
    while let Ok(command) = client.event() {
        events.push(command);
    }

    client
        .sock
        .get_mut()
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    events
}

#[test]
fn happy_playback_flow() -> anyhow::Result<()> {
    let mut service = server();
    let mut client = connect(&mut service);

    handshake(&mut service, &mut client, MAX_VERSION)?;

    let reply = create_playback(
        &mut service,
        &mut client,
        BufferAttr {
            tlength: 96000,
            ..Default::default()
        },
    )?;

    assert!(reply.requested_bytes > 0);
    assert_eq!(reply.sample_spec, SPEC);
    assert_eq!(reply.buffer_attr.tlength, 96000);

    // Write exactly what was asked for.
    client.write_audio(reply.channel, &vec![0x11; reply.requested_bytes as usize])?;
    pump(&mut service, 3);

    // Play some of it out.
    for _ in 0..4 {
        service.core.sinks[0].render(4800);
        pump(&mut service, 2);
    }

    let events = drain_events(&mut client);

    assert!(
        !events.iter().any(|c| matches!(c, Command::Overflow(_))),
        "no overflow expected, got {:?}",
        events
    );
    assert!(
        events.iter().any(|c| matches!(c, Command::Started(_))),
        "expected STARTED, got {:?}",
        events
    );
    assert!(
        events
            .iter()
            .any(|c| matches!(c, Command::Request(Request { .. }))),
        "expected at least one REQUEST, got {:?}",
        events
    );

    Ok(())
}

#[test]
fn underrun_and_recovery() -> anyhow::Result<()> {
    let mut service = server();
    let mut client = connect(&mut service);

    handshake(&mut service, &mut client, MAX_VERSION)?;

    let reply = create_playback(
        &mut service,
        &mut client,
        BufferAttr {
            tlength: 96000,
            prebuf: 48000,
            minreq: 4800,
            ..Default::default()
        },
    )?;
    assert_eq!(reply.buffer_attr.prebuf, 48000);

    // Half the prebuffer, then stall: silence, no STARTED.
    client.write_audio(reply.channel, &vec![0x22; 24000])?;
    pump(&mut service, 3);

    for _ in 0..3 {
        service.core.sinks[0].render(4800);
        pump(&mut service, 2);
    }

    let events = drain_events(&mut client);
    assert!(
        !events.iter().any(|c| matches!(c, Command::Started(_))),
        "no STARTED while prebuffering, got {:?}",
        events
    );
    assert!(
        !events.iter().any(|c| matches!(c, Command::Underflow(_))),
        "no UNDERFLOW while prebuffering, got {:?}",
        events
    );

    // Fill the prebuffer: playback starts.
    client.write_audio(reply.channel, &vec![0x33; 24000])?;
    pump(&mut service, 3);

    service.core.sinks[0].render(4800);
    pump(&mut service, 2);

    let events = drain_events(&mut client);
    assert!(
        events.iter().any(|c| matches!(c, Command::Started(_))),
        "expected STARTED after prebuf filled, got {:?}",
        events
    );

    // Stall the client and drain the queue dry.
    for _ in 0..12 {
        service.core.sinks[0].render(4800);
        pump(&mut service, 2);
    }

    let events = drain_events(&mut client);
    let underflows: Vec<_> = events
        .iter()
        .filter_map(|c| match c {
            Command::Underflow(u) => Some(*u),
            _ => None,
        })
        .collect();

    assert_eq!(underflows.len(), 1, "exactly one UNDERFLOW: {:?}", events);
    assert_eq!(underflows[0].offset, 48000);

    Ok(())
}

#[test]
fn late_seek_rewrites_without_errors() -> anyhow::Result<()> {
    let mut service = server();
    let mut client = connect(&mut service);

    handshake(&mut service, &mut client, MAX_VERSION)?;

    let reply = create_playback(
        &mut service,
        &mut client,
        BufferAttr {
            tlength: 96000,
            prebuf: 0,
            minreq: 4800,
            ..Default::default()
        },
    )?;

    client.write_audio(reply.channel, &vec![0x44; 9600])?;
    pump(&mut service, 3);

    service.core.sinks[0].render(4800);
    pump(&mut service, 3);

    // Rewrite starting 480 bytes before what the device already consumed.
    client.write_audio_at(reply.channel, 4320, SeekMode::Absolute, &vec![0x55; 960])?;
    pump(&mut service, 3);

    service.core.sinks[0].render(960);
    pump(&mut service, 3);

    let events = drain_events(&mut client);
    assert!(
        !events.iter().any(|c| matches!(c, Command::Overflow(_))),
        "no OVERFLOW expected, got {:?}",
        events
    );
    assert!(
        !events.iter().any(|c| matches!(c, Command::Underflow(_))),
        "no UNDERFLOW expected, got {:?}",
        events
    );

    // The write pointer reflects the rewrite, and the device went back for
    // the new audio.
    client.send(&Command::GetPlaybackLatency(LatencyParams {
        channel: reply.channel,
        now: std::time::SystemTime::now(),
    }))?;
    pump(&mut service, 2);

    let (_, latency): (_, PlaybackLatency) = client.reply()?;
    assert_eq!(latency.write_index, 4320 + 960);
    assert!(latency.read_index <= latency.write_index);

    Ok(())
}

#[test]
fn record_round_robin_is_fair() -> anyhow::Result<()> {
    let mut service = server();
    let mut client = connect(&mut service);

    handshake(&mut service, &mut client, MAX_VERSION)?;

    let mut channels = Vec::new();
    for _ in 0..2 {
        client.send(&Command::CreateRecordStream(RecordStreamParams {
            sample_spec: SPEC,
            channel_map: ChannelMap::stereo(),
            source_index: Some(1),
            buffer_attr: BufferAttr {
                fragsize: 1024,
                ..Default::default()
            },
            ..Default::default()
        }))?;
        pump(&mut service, 2);

        let (_, reply): (_, CreateRecordStreamReply) = client.reply()?;
        assert_eq!(reply.buffer_attr.fragsize, 1024);
        channels.push(reply.channel);
    }

    // Ten capture periods of a fragment each, for two streams.
    for _ in 0..5 {
        service.core.sources[0].capture(1024);
        pump(&mut service, 2);
    }

    let mut per_stream = std::collections::HashMap::new();
    let mut order = Vec::new();

    client
        .sock
        .get_mut()
        .set_read_timeout(Some(Duration::from_millis(200)))?;

    while let Ok((header, payload)) = client.frame() {
        assert_eq!(payload.len(), 1024);
        *per_stream.entry(header.channel).or_insert(0u32) += 1;
        order.push(header.channel);
    }

    assert_eq!(per_stream.get(&channels[0]), Some(&5));
    assert_eq!(per_stream.get(&channels[1]), Some(&5));

    // Deliveries strictly alternate.
    for pair in order.windows(2) {
        assert_ne!(pair[0], pair[1], "deliveries did not alternate: {:?}", order);
    }

    Ok(())
}

#[test]
fn bad_credentials_are_rejected_over_tcp() -> anyhow::Result<()> {
    use std::net::{TcpListener, TcpStream};

    let mut options = NativeOptions::default();
    options.cookie = Some(std::sync::Arc::new(
        pavane::server::cookie::AuthCookie::random(),
    ));

    let mut service = service_with_null_devices(options, SPEC, false).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;
    let client_sock = TcpStream::connect(addr)?;
    client_sock.set_read_timeout(Some(Duration::from_secs(5)))?;
    let (server_sock, _) = listener.accept()?;
    server_sock.set_nonblocking(true)?;

    service.accept_connection(Transport::Tcp(mio::net::TcpStream::from_std(server_sock)))?;

    let mut reader = BufReader::new(client_sock.try_clone()?);
    write_command_message(
        &mut &client_sock,
        0,
        &Command::Auth(AuthParams {
            version: MAX_VERSION,
            supports_shm: false,
            supports_memfd: false,
            cookie: vec![0xab; 256],
        }),
        MAX_VERSION,
    )?;
    pump(&mut service, 3);

    let result = read_ack_message(&mut reader);
    assert_matches!(
        result,
        Err(ProtocolError::PeerError(PulseError::AccessDenied))
    );

    // And the server hangs up afterwards.
    pump(&mut service, 2);
    let eof = read_ack_message(&mut reader);
    assert!(eof.is_err());

    Ok(())
}

#[test]
fn old_clients_get_downgraded_formats() -> anyhow::Result<()> {
    let spec = SampleSpec {
        format: SampleFormat::S24Le,
        channels: 2,
        rate: 48000,
    };
    let mut service = service_with_null_devices(NativeOptions::default(), spec, false).unwrap();
    let mut client = connect(&mut service);

    handshake(&mut service, &mut client, 11)?;
    assert_eq!(client.version, 11);

    client.send(&Command::GetSinkInfoList)?;
    pump(&mut service, 2);

    let (_, sinks): (_, SinkInfoList) = client.reply()?;
    assert_eq!(sinks.len(), 1);
    assert_eq!(sinks[0].sample_spec.format, SampleFormat::Float32Le);

    Ok(())
}

#[test]
fn drain_is_acknowledged_when_playback_ends() -> anyhow::Result<()> {
    let mut service = server();
    let mut client = connect(&mut service);

    handshake(&mut service, &mut client, MAX_VERSION)?;

    let reply = create_playback(
        &mut service,
        &mut client,
        BufferAttr {
            tlength: 19200,
            prebuf: 0,
            minreq: 4800,
            ..Default::default()
        },
    )?;

    client.write_audio(reply.channel, &vec![0x66; 9600])?;
    pump(&mut service, 3);

    let drain_seq = client.send(&Command::DrainPlaybackStream(reply.channel))?;
    pump(&mut service, 3);

    // The drain may not complete while audio is still queued.
    for _ in 0..4 {
        service.core.sinks[0].render(4800);
        pump(&mut service, 2);
    }

    // Skim events until the drain ack arrives.
    client
        .sock
        .get_mut()
        .set_read_timeout(Some(Duration::from_millis(500)))?;

    let mut acked = false;
    for _ in 0..16 {
        match read_ack_message(&mut client.sock) {
            Ok(seq) if seq == drain_seq => {
                acked = true;
                break;
            }
            Ok(_) => continue,
            Err(ProtocolError::UnexpectedCommand(_)) => continue,
            Err(_) => break,
        }
    }

    assert!(acked, "drain was never acknowledged");

    Ok(())
}

#[test]
fn introspection_reports_streams_and_server() -> anyhow::Result<()> {
    let mut service = server();
    let mut client = connect(&mut service);

    handshake(&mut service, &mut client, MAX_VERSION)?;

    client.send(&Command::GetServerInfo)?;
    pump(&mut service, 2);
    let (_, info): (_, ServerInfo) = client.reply()?;
    assert_eq!(
        info.default_sink_name.as_deref(),
        Some(std::ffi::CString::new("auto_null")?.as_c_str())
    );

    let reply = create_playback(&mut service, &mut client, BufferAttr::default())?;

    client.send(&Command::GetSinkInputInfoList)?;
    pump(&mut service, 2);
    let (_, inputs): (_, SinkInputInfoList) = client.reply()?;
    assert_eq!(inputs.len(), 1);
    assert_eq!(inputs[0].index, reply.sink_input_index);
    assert_eq!(inputs[0].sink_index, reply.sink_index);

    client.send(&Command::DeletePlaybackStream(reply.channel))?;
    pump(&mut service, 2);
    client.ack()?;

    client.send(&Command::GetSinkInputInfoList)?;
    pump(&mut service, 2);
    let (_, inputs): (_, SinkInputInfoList) = client.reply()?;
    assert!(inputs.is_empty());

    Ok(())
}

#[test]
fn unauthorized_commands_are_refused() -> anyhow::Result<()> {
    let mut service = server();
    let mut client = connect(&mut service);

    client.send(&Command::GetSinkInfoList)?;
    pump(&mut service, 2);

    let result = client.reply::<SinkInfoList>();
    assert!(matches!(
        result,
        Err(e) if matches!(
            e.downcast_ref::<ProtocolError>(),
            Some(ProtocolError::PeerError(PulseError::AccessDenied))
        )
    ));

    Ok(())
}

#[test]
fn sample_upload_and_playback() -> anyhow::Result<()> {
    let mut service = server();
    let mut client = connect(&mut service);

    handshake(&mut service, &mut client, MAX_VERSION)?;

    let name = std::ffi::CString::new("bell")?;
    client.send(&Command::CreateUploadStream(UploadStreamParams {
        name: Some(name.clone()),
        sample_spec: SPEC,
        channel_map: ChannelMap::stereo(),
        length: 4096,
        props: Props::new(),
    }))?;
    pump(&mut service, 2);

    let (_, reply): (_, CreateUploadStreamReply) = client.reply()?;
    assert_eq!(reply.length, 4096);

    client.write_audio(reply.channel, &vec![0x77; 4096])?;
    client.send(&Command::FinishUploadStream(reply.channel))?;
    pump(&mut service, 3);
    client.ack()?;

    client.send(&Command::GetSampleInfoList)?;
    pump(&mut service, 2);
    let (_, samples): (_, SampleInfoList) = client.reply()?;
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].name, name);
    assert_eq!(samples[0].length, 4096);

    client.send(&Command::PlaySample(PlaySampleParams {
        sink_index: None,
        sink_name: None,
        volume: 0,
        name: name.clone(),
        props: Props::new(),
    }))?;
    pump(&mut service, 2);
    let (_, played): (_, PlaySampleReply) = client.reply()?;
    let _ = played.index;

    // Play the sample out and let the transient stream detach itself.
    for _ in 0..3 {
        service.core.sinks[0].render(2048);
        pump(&mut service, 2);
    }
    assert!(service.core.sample_playbacks.is_empty());

    client.send(&Command::RemoveSample(name))?;
    pump(&mut service, 2);
    client.ack()?;

    Ok(())
}

#[test]
fn subscribers_see_stream_lifecycle() -> anyhow::Result<()> {
    let mut service = server();
    let mut watcher = connect(&mut service);
    let mut player = connect(&mut service);

    handshake(&mut service, &mut watcher, MAX_VERSION)?;
    handshake(&mut service, &mut player, MAX_VERSION)?;

    watcher.send(&Command::Subscribe(SubscriptionMask::SINK_INPUT))?;
    pump(&mut service, 2);
    watcher.ack()?;

    let reply = create_playback(&mut service, &mut player, BufferAttr::default())?;
    pump(&mut service, 2);

    let events = drain_events(&mut watcher);
    assert!(
        events.iter().any(|c| matches!(
            c,
            Command::SubscribeEvent(SubscriptionEvent {
                facility: SubscriptionEventFacility::SinkInput,
                event_type: SubscriptionEventType::New,
                index: Some(i),
            }) if *i == reply.sink_input_index
        )),
        "expected sink-input new event, got {:?}",
        events
    );

    Ok(())
}
