//! The record-side device: a source and the I/O domain behind it.

use std::collections::BTreeMap;
use std::ffi::CString;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use crate::protocol::{ChannelMap, ChannelVolume, Props, SampleSpec};
use crate::server::memblock::{MemChunk, MemPool, PoolBacking};

use super::messages::RecordIoMessage;
use super::{reply_channel, roundtrip};

use futures::channel::oneshot;

/// The real-time half of a record stream, as seen by the source's I/O
/// domain.
pub trait SourceOutput: Send {
    /// Captured audio for this output. The implementation forwards it
    /// towards the main domain; it must not block.
    fn push(&mut self, ctx: &mut OutputCtx, chunk: &MemChunk);

    /// A control message from the main domain.
    fn handle(&mut self, ctx: &mut OutputCtx, msg: RecordIoMessage);

    /// Recovers the concrete type after a detach, for device moves.
    fn into_any(self: Box<Self>) -> Box<dyn std::any::Any + Send>;
}

/// Per-output state owned by the I/O domain.
#[derive(Debug)]
pub struct OutputCtx {
    /// Server-wide source-output index.
    pub index: u32,

    /// Corked outputs receive no audio.
    pub corked: bool,

    /// The device latency currently configured for this output.
    pub source_latency_usec: u64,

    /// For monitor streams, the latency of the monitored sink.
    pub monitor_latency_usec: u64,

    /// The device's sample spec.
    pub spec: SampleSpec,
}

/// Synthesizes the capture signal of a null source.
pub type SignalGen = Box<dyn FnMut(&mut [u8]) + Send>;

enum SourceMsg {
    Attach {
        index: u32,
        corked: bool,
        output: Box<dyn SourceOutput>,
        reply: oneshot::Sender<()>,
    },
    Detach {
        index: u32,
        reply: oneshot::Sender<Option<Box<dyn SourceOutput>>>,
    },
    ForOutput {
        index: u32,
        msg: RecordIoMessage,
    },
    SetRequestedLatency {
        index: u32,
        usec: u64,
        reply: oneshot::Sender<u64>,
    },
    Capture {
        bytes: usize,
    },
    SetSuspended {
        suspended: bool,
        reply: oneshot::Sender<()>,
    },
    Shutdown,
}

/// Construction parameters for a [`Source`].
pub struct SourceConfig {
    pub index: u32,
    pub name: CString,
    pub description: Option<CString>,
    pub spec: SampleSpec,
    pub map: ChannelMap,

    /// The latency window the device can realise, in microseconds.
    pub latency_range_usec: (u64, u64),

    /// With a period, the device clocks itself and captures one period of
    /// audio per tick; without one it captures on explicit request.
    pub period: Option<Duration>,

    /// Synthesizes the captured signal; silence when absent.
    pub signal: Option<SignalGen>,

    /// For monitor sources, the sink this source observes.
    pub monitor_of: Option<u32>,
}

impl std::fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceConfig")
            .field("index", &self.index)
            .field("name", &self.name)
            .finish()
    }
}

impl SourceConfig {
    /// A null device named `name`, externally clocked, capturing silence.
    pub fn null(index: u32, name: &str) -> Self {
        Self {
            index,
            name: CString::new(name).unwrap(),
            description: None,
            spec: SampleSpec::default(),
            map: ChannelMap::default(),
            latency_range_usec: (500, 2_000_000),
            period: None,
            signal: None,
            monitor_of: None,
        }
    }
}

/// The main-domain handle for a record device.
pub struct Source {
    pub index: u32,
    pub name: CString,
    pub description: Option<CString>,
    pub spec: SampleSpec,
    pub map: ChannelMap,

    pub volume: ChannelVolume,
    pub muted: bool,
    pub suspended: bool,
    pub props: Props,

    /// For monitor sources, the sink this source observes.
    pub monitor_of: Option<u32>,

    latency_range_usec: (u64, u64),
    configured_latency_usec: u64,

    tx: mpsc::Sender<SourceMsg>,
    worker: Option<thread::JoinHandle<()>>,
}

impl std::fmt::Debug for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Source")
            .field("index", &self.index)
            .field("name", &self.name)
            .finish()
    }
}

impl Source {
    pub fn new(config: SourceConfig) -> Self {
        let (tx, rx) = mpsc::channel();

        let worker_state = Worker {
            spec: config.spec,
            latency_range_usec: config.latency_range_usec,
            configured_latency_usec: config.latency_range_usec.1,
            suspended: false,
            signal: config.signal,
            pool: MemPool::new(PoolBacking::Private).expect("private pools cannot fail"),
            outputs: BTreeMap::new(),
        };
        let period = config.period;

        let worker = thread::Builder::new()
            .name(format!("source-{}", config.name.to_string_lossy()))
            .spawn(move || run_worker(rx, worker_state, period))
            .expect("spawning a source worker");

        Self {
            index: config.index,
            name: config.name,
            description: config.description,
            spec: config.spec,
            map: config.map,
            volume: ChannelVolume::norm(config.spec.channels),
            muted: false,
            suspended: false,
            props: Props::new(),
            monitor_of: config.monitor_of,
            latency_range_usec: config.latency_range_usec,
            configured_latency_usec: config.latency_range_usec.1,
            tx,
            worker: Some(worker),
        }
    }

    /// Attaches a stream's real-time half. Synchronous.
    pub fn attach(&self, index: u32, corked: bool, output: Box<dyn SourceOutput>) {
        let (reply, rx) = reply_channel();
        let _ = self.tx.send(SourceMsg::Attach {
            index,
            corked,
            output,
            reply,
        });
        roundtrip(rx);
    }

    /// Detaches a stream. Synchronous.
    pub fn detach(&self, index: u32) -> Option<Box<dyn SourceOutput>> {
        let (reply, rx) = reply_channel();
        let _ = self.tx.send(SourceMsg::Detach { index, reply });
        roundtrip(rx).flatten()
    }

    /// Posts a control message to a stream's real-time half.
    pub fn post(&self, index: u32, msg: RecordIoMessage) {
        let _ = self.tx.send(SourceMsg::ForOutput { index, msg });
    }

    /// Asks the device to realise `usec` of latency; returns what it
    /// actually configured.
    pub fn set_requested_latency(&mut self, index: u32, usec: u64) -> u64 {
        let (reply, rx) = reply_channel();
        let _ = self
            .tx
            .send(SourceMsg::SetRequestedLatency { index, usec, reply });

        let configured = roundtrip(rx).unwrap_or(self.latency_range_usec.1);
        self.configured_latency_usec = configured;
        configured
    }

    /// The device latency currently configured.
    pub fn latency_usec(&self) -> u64 {
        self.configured_latency_usec
    }

    /// Captures `bytes` of audio into every running output. The clock for
    /// externally-driven devices.
    pub fn capture(&self, bytes: usize) {
        let _ = self.tx.send(SourceMsg::Capture { bytes });
    }

    /// Suspends or resumes the device. Synchronous.
    pub fn set_suspended(&mut self, suspended: bool) {
        let (reply, rx) = reply_channel();
        let _ = self.tx.send(SourceMsg::SetSuspended { suspended, reply });
        roundtrip(rx);
        self.suspended = suspended;
    }
}

impl Drop for Source {
    fn drop(&mut self) {
        let _ = self.tx.send(SourceMsg::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

struct Worker {
    spec: SampleSpec,
    latency_range_usec: (u64, u64),
    configured_latency_usec: u64,
    suspended: bool,
    signal: Option<SignalGen>,
    pool: MemPool,
    outputs: BTreeMap<u32, (OutputCtx, Box<dyn SourceOutput>)>,
}

fn run_worker(rx: mpsc::Receiver<SourceMsg>, mut state: Worker, period: Option<Duration>) {
    let period_bytes = period.map(|p| {
        state
            .spec
            .usec_to_bytes(p.as_micros() as u64)
            .max(state.spec.frame_size())
    });
    let mut next_tick = period.map(|p| Instant::now() + p);

    loop {
        let msg = match next_tick {
            Some(tick) => {
                let now = Instant::now();
                if now >= tick {
                    state.capture(period_bytes.unwrap_or(0));
                    next_tick = Some(tick + period.unwrap());
                    continue;
                }
                match rx.recv_timeout(tick - now) {
                    Ok(msg) => msg,
                    Err(mpsc::RecvTimeoutError::Timeout) => continue,
                    Err(mpsc::RecvTimeoutError::Disconnected) => return,
                }
            }
            None => match rx.recv() {
                Ok(msg) => msg,
                Err(_) => return,
            },
        };

        match msg {
            SourceMsg::Attach {
                index,
                corked,
                output,
                reply,
            } => {
                let ctx = OutputCtx {
                    index,
                    corked,
                    source_latency_usec: state.configured_latency_usec,
                    monitor_latency_usec: 0,
                    spec: state.spec,
                };

                state.outputs.insert(index, (ctx, output));
                let _ = reply.send(());
            }

            SourceMsg::Detach { index, reply } => {
                let detached = state.outputs.remove(&index).map(|(_, output)| output);
                let _ = reply.send(detached);
            }

            SourceMsg::ForOutput { index, msg } => {
                if let Some((ctx, output)) = state.outputs.get_mut(&index) {
                    output.handle(ctx, msg);
                }
            }

            SourceMsg::SetRequestedLatency { index, usec, reply } => {
                let (lo, hi) = state.latency_range_usec;
                state.configured_latency_usec = usec.clamp(lo, hi);

                for (ctx, _) in state.outputs.values_mut() {
                    ctx.source_latency_usec = state.configured_latency_usec;
                }

                let _ = index;
                let _ = reply.send(state.configured_latency_usec);
            }

            SourceMsg::Capture { bytes } => state.capture(bytes),

            SourceMsg::SetSuspended { suspended, reply } => {
                state.suspended = suspended;
                let _ = reply.send(());
            }

            SourceMsg::Shutdown => return,
        }
    }
}

impl Worker {
    fn capture(&mut self, bytes: usize) {
        if self.suspended || bytes == 0 || self.outputs.is_empty() {
            return;
        }

        let bytes = bytes / self.spec.frame_size().max(1) * self.spec.frame_size().max(1);
        if bytes == 0 {
            return;
        }

        let block = match &mut self.signal {
            Some(gen) => self.pool.alloc_with(bytes, |buf| gen(buf)),
            None => self.pool.silence(bytes, &self.spec),
        };
        let chunk = MemChunk::from_block(block);

        for (ctx, output) in self.outputs.values_mut() {
            if !ctx.corked {
                output.push(ctx, &chunk);
            }
        }
    }
}
