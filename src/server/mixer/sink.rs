//! The playback-side device: a sink and the I/O domain behind it.

use std::collections::BTreeMap;
use std::ffi::CString;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use crate::protocol::{ChannelMap, ChannelVolume, Props, SampleSpec};
use crate::server::memblock::MemChunk;

use super::messages::{GroupOp, StreamIoMessage};
use super::{reply_channel, roundtrip};

use futures::channel::oneshot;

/// The real-time half of a playback stream, as seen by the sink's I/O
/// domain. The device drives it; the implementation owns the buffer queue
/// and does all client-facing signalling itself.
pub trait SinkInput: Send {
    /// Produce up to `want` bytes of audio. `None` means the stream has
    /// nothing to play and the device renders silence.
    fn pop(&mut self, ctx: &mut InputCtx, want: usize) -> Option<MemChunk>;

    /// `nbytes` of already-rendered audio were taken back; replay from
    /// that point.
    fn process_rewind(&mut self, ctx: &mut InputCtx, nbytes: usize);

    /// The device's rewindable window changed.
    fn update_max_rewind(&mut self, ctx: &mut InputCtx, nbytes: usize);

    /// The device's preferred request granularity changed.
    fn update_max_request(&mut self, _nbytes: usize) {}

    /// A control message from the main domain.
    fn handle(&mut self, ctx: &mut InputCtx, msg: StreamIoMessage);

    /// A queue operation fanned out across the stream's sync group.
    fn group_op(&mut self, ctx: &mut InputCtx, op: GroupOp);

    /// Recovers the concrete type after a detach, for device moves.
    fn into_any(self: Box<Self>) -> Box<dyn std::any::Any + Send>;
}

/// Pending rewind request, coalesced until the next render cycle.
#[derive(Debug, Clone, Copy)]
struct PendingRewind {
    nbytes: usize,
    rewrite: bool,
}

/// Per-input state owned by the I/O domain and shared with the input's
/// callbacks.
#[derive(Debug)]
pub struct InputCtx {
    /// Server-wide sink-input index.
    pub index: u32,

    /// Sync-group label; equal labels share queue operations.
    pub sync_id: u32,

    /// Corked inputs are not popped.
    pub corked: bool,

    /// Bytes of silence rendered since audio last ran out. `u64::MAX`
    /// until the stream has played for the first time.
    pub underrun_for: u64,

    /// Bytes rendered since the last underrun.
    pub playing_for: u64,

    /// How far back the device lets this input rewrite audio.
    pub max_rewind: usize,

    /// Rendered-but-unplayed bytes held by the device for this input.
    pub render_queue_len: usize,

    /// The device latency currently configured for this input.
    pub sink_latency_usec: u64,

    /// The device's sample spec.
    pub spec: SampleSpec,

    pending_rewind: Option<PendingRewind>,
}

impl InputCtx {
    /// A fresh context for an input that has not played yet.
    pub fn new(index: u32, sync_id: u32, corked: bool, spec: SampleSpec) -> Self {
        Self {
            index,
            sync_id,
            corked,
            underrun_for: u64::MAX,
            playing_for: 0,
            max_rewind: 0,
            render_queue_len: 0,
            sink_latency_usec: 0,
            spec,
            pending_rewind: None,
        }
    }

    /// Schedules a rewind of up to `nbytes`, applied at the top of the next
    /// render cycle. Requests in one cycle coalesce to the largest.
    pub fn request_rewind(&mut self, nbytes: usize, rewrite: bool) {
        let merged = match self.pending_rewind {
            Some(prev) => PendingRewind {
                nbytes: prev.nbytes.max(nbytes),
                rewrite: prev.rewrite || rewrite,
            },
            None => PendingRewind { nbytes, rewrite },
        };
        self.pending_rewind = Some(merged);
    }

    /// The rewind currently scheduled, as `(nbytes, rewrite)`.
    pub fn pending_rewind(&self) -> Option<(usize, bool)> {
        self.pending_rewind.map(|p| (p.nbytes, p.rewrite))
    }
}

/// The state handed back by a detach, so the stream can move devices.
pub struct DetachedInput {
    pub input: Box<dyn SinkInput>,
    pub underrun_for: u64,
    pub render_queue_len: usize,
    pub sink_latency_usec: u64,
}

impl std::fmt::Debug for DetachedInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetachedInput")
            .field("underrun_for", &self.underrun_for)
            .finish()
    }
}

enum SinkMsg {
    Attach {
        index: u32,
        sync_id: u32,
        corked: bool,
        input: Box<dyn SinkInput>,
        reply: oneshot::Sender<()>,
    },
    Detach {
        index: u32,
        reply: oneshot::Sender<Option<DetachedInput>>,
    },
    ForInput {
        index: u32,
        msg: StreamIoMessage,
    },
    SetRequestedLatency {
        index: u32,
        usec: u64,
        reply: oneshot::Sender<u64>,
    },
    Render {
        bytes: usize,
    },
    SetSuspended {
        suspended: bool,
        reply: oneshot::Sender<()>,
    },
    Shutdown,
}

/// Construction parameters for a [`Sink`].
#[derive(Debug, Clone)]
pub struct SinkConfig {
    pub index: u32,
    pub name: CString,
    pub description: Option<CString>,
    pub spec: SampleSpec,
    pub map: ChannelMap,

    /// The latency window the device can realise, in microseconds.
    pub latency_range_usec: (u64, u64),

    /// With a period, the device clocks itself and renders one period of
    /// audio per tick. Without one, it renders only on explicit request
    /// (the mode tests use).
    pub period: Option<Duration>,
}

impl SinkConfig {
    /// A null device named `name`, externally clocked.
    pub fn null(index: u32, name: &str) -> Self {
        Self {
            index,
            name: CString::new(name).unwrap(),
            description: None,
            spec: SampleSpec::default(),
            map: ChannelMap::default(),
            latency_range_usec: (500, 2_000_000),
            period: None,
        }
    }
}

/// The main-domain handle for a playback device.
///
/// Mixing-policy state (volume, mute, props) lives here and is only ever
/// touched by the main domain; everything real-time happens on the worker.
pub struct Sink {
    pub index: u32,
    pub name: CString,
    pub description: Option<CString>,
    pub spec: SampleSpec,
    pub map: ChannelMap,

    pub volume: ChannelVolume,
    pub muted: bool,
    pub suspended: bool,
    pub props: Props,

    latency_range_usec: (u64, u64),
    configured_latency_usec: u64,

    tx: mpsc::Sender<SinkMsg>,
    worker: Option<thread::JoinHandle<()>>,
}

impl std::fmt::Debug for Sink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sink")
            .field("index", &self.index)
            .field("name", &self.name)
            .finish()
    }
}

impl Sink {
    pub fn new(config: SinkConfig) -> Self {
        let (tx, rx) = mpsc::channel();

        let worker_state = Worker {
            spec: config.spec,
            latency_range_usec: config.latency_range_usec,
            configured_latency_usec: config.latency_range_usec.1,
            suspended: false,
            inputs: BTreeMap::new(),
        };
        let period = config.period;

        let worker = thread::Builder::new()
            .name(format!("sink-{}", config.name.to_string_lossy()))
            .spawn(move || run_worker(rx, worker_state, period))
            .expect("spawning a sink worker");

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
            latency_range_usec: config.latency_range_usec,
            configured_latency_usec: config.latency_range_usec.1,
            tx: tx.clone(),
            worker: Some(worker),
        }
    }

    /// Attaches a stream's real-time half to the device. Synchronous; when
    /// this returns the input is live.
    pub fn attach(&self, index: u32, sync_id: u32, corked: bool, input: Box<dyn SinkInput>) {
        let (reply, rx) = reply_channel();
        let _ = self.tx.send(SinkMsg::Attach {
            index,
            sync_id,
            corked,
            input,
            reply,
        });
        roundtrip(rx);
    }

    /// Detaches a stream, handing its real-time half back for teardown or
    /// a move.
    pub fn detach(&self, index: u32) -> Option<DetachedInput> {
        let (reply, rx) = reply_channel();
        let _ = self.tx.send(SinkMsg::Detach { index, reply });
        roundtrip(rx).flatten()
    }

    /// Posts a control message to a stream's real-time half.
    pub fn post(&self, index: u32, msg: StreamIoMessage) {
        let _ = self.tx.send(SinkMsg::ForInput { index, msg });
    }

    /// Asks the device to realise `usec` of latency for `index`; returns
    /// what it actually configured.
    pub fn set_requested_latency(&mut self, index: u32, usec: u64) -> u64 {
        let (reply, rx) = reply_channel();
        let _ = self.tx.send(SinkMsg::SetRequestedLatency { index, usec, reply });

        let configured = roundtrip(rx).unwrap_or(self.latency_range_usec.1);
        self.configured_latency_usec = configured;
        configured
    }

    /// The device latency currently configured.
    pub fn latency_usec(&self) -> u64 {
        self.configured_latency_usec
    }

    /// Renders `bytes` of audio out of every running input. The clock for
    /// externally-driven devices.
    pub fn render(&self, bytes: usize) {
        let _ = self.tx.send(SinkMsg::Render { bytes });
    }

    /// Suspends or resumes the device. Synchronous.
    pub fn set_suspended(&mut self, suspended: bool) {
        let (reply, rx) = reply_channel();
        let _ = self.tx.send(SinkMsg::SetSuspended { suspended, reply });
        roundtrip(rx);
        self.suspended = suspended;
    }
}

impl Drop for Sink {
    fn drop(&mut self) {
        let _ = self.tx.send(SinkMsg::Shutdown);
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
    inputs: BTreeMap<u32, (InputCtx, Box<dyn SinkInput>)>,
}

fn run_worker(rx: mpsc::Receiver<SinkMsg>, mut state: Worker, period: Option<Duration>) {
    let period_bytes = period.map(|p| state.spec.usec_to_bytes(p.as_micros() as u64).max(state.spec.frame_size()));
    let mut next_tick = period.map(|p| Instant::now() + p);

    loop {
        let msg = match next_tick {
            Some(tick) => {
                let now = Instant::now();
                if now >= tick {
                    state.render(period_bytes.unwrap_or(0));
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
            SinkMsg::Attach {
                index,
                sync_id,
                corked,
                mut input,
                reply,
            } => {
                let mut ctx = InputCtx::new(index, sync_id, corked, state.spec);
                ctx.sink_latency_usec = state.configured_latency_usec;

                let rewind = state.spec.usec_to_bytes(state.configured_latency_usec);
                input.update_max_rewind(&mut ctx, rewind);
                input.update_max_request(period_bytes.unwrap_or_else(|| {
                    state.spec.usec_to_bytes(state.configured_latency_usec)
                }));

                state.inputs.insert(index, (ctx, input));
                let _ = reply.send(());
            }

            SinkMsg::Detach { index, reply } => {
                let detached = state.inputs.remove(&index).map(|(ctx, input)| DetachedInput {
                    input,
                    underrun_for: ctx.underrun_for,
                    render_queue_len: ctx.render_queue_len,
                    sink_latency_usec: ctx.sink_latency_usec,
                });
                let _ = reply.send(detached);
            }

            SinkMsg::ForInput { index, msg } => state.for_input(index, msg),

            SinkMsg::SetRequestedLatency { index, usec, reply } => {
                let (lo, hi) = state.latency_range_usec;
                state.configured_latency_usec = usec.clamp(lo, hi);

                let rewind = state.spec.usec_to_bytes(state.configured_latency_usec);
                for (ctx, input) in state.inputs.values_mut() {
                    ctx.sink_latency_usec = state.configured_latency_usec;
                    input.update_max_rewind(ctx, rewind);
                }

                let _ = index;
                let _ = reply.send(state.configured_latency_usec);
            }

            SinkMsg::Render { bytes } => state.render(bytes),

            SinkMsg::SetSuspended { suspended, reply } => {
                state.suspended = suspended;
                let _ = reply.send(());
            }

            SinkMsg::Shutdown => return,
        }
    }
}

impl Worker {
    fn render(&mut self, bytes: usize) {
        let frame = self.spec.frame_size().max(1);
        let bytes = bytes / frame * frame;

        if self.suspended || bytes == 0 {
            return;
        }

        for (ctx, input) in self.inputs.values_mut() {
            if let Some(rewind) = ctx.pending_rewind.take() {
                let actual = rewind.nbytes.min(ctx.max_rewind);
                if actual > 0 && rewind.rewrite {
                    input.process_rewind(ctx, actual);
                }
            }

            if ctx.corked {
                continue;
            }

            // A null device: pop and discard. `pop` does the stream-side
            // accounting and signalling.
            let _ = input.pop(ctx, bytes);
        }
    }

    fn for_input(&mut self, index: u32, msg: StreamIoMessage) {
        // Queue operations fan out to the whole sync group.
        let fanout = match &msg {
            StreamIoMessage::Flush => Some(GroupOp::Flush),
            StreamIoMessage::PrebufForce => Some(GroupOp::PrebufForce),
            StreamIoMessage::Drain { .. } | StreamIoMessage::Trigger => {
                Some(GroupOp::PrebufDisable)
            }
            _ => None,
        };

        let sync_id = match self.inputs.get_mut(&index) {
            Some((ctx, input)) => {
                let sync_id = ctx.sync_id;
                input.handle(ctx, msg);
                sync_id
            }
            None => return,
        };

        if let Some(op) = fanout {
            for (ctx, input) in self.inputs.values_mut() {
                if ctx.index != index && ctx.sync_id == sync_id {
                    input.group_op(ctx, op);
                }
            }
        }
    }
}
