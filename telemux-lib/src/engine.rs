//! The conversion engine.
//!
//! Owns exactly one active input channel (plus, optionally, a failover
//! sibling held as a descriptor until it is needed) and an ordered,
//! non-empty set of output channels. Drives the read, unwrap, decode,
//! render, write loop on the calling thread; a separate heartbeat thread
//! supervises forward progress.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{bounded, tick, Receiver, Sender};
use crossbeam::select;
use serde::Serialize;
use tracing::{debug, info, warn};
use typed_builder::TypedBuilder;

use crate::channel::{self, InputChannel, OutputChannel, Poll, WriteState, MAX_OUTPUT_CHANNELS};
use crate::descriptor::{ChannelDescriptor, FormatTag};
use crate::envelope::{EnvelopeDecoder, Unwrapped};
use crate::record::{DecodedRecord, RecordDecoder};
use crate::{Error, Result};

/// Everything the engine needs to run, gathered in one explicit value.
#[derive(Debug, Clone, TypedBuilder)]
pub struct EngineConfig {
    /// Input channel descriptor.
    #[builder(setter(into))]
    pub input: String,
    /// Failover sibling descriptor, switched to after the active input
    /// accumulates `failure_threshold` consecutive transport errors.
    #[builder(default, setter(strip_option, into))]
    pub failover: Option<String>,
    /// Output channel descriptors, in fan-out order.
    pub outputs: Vec<String>,
    /// Consecutive transport failures that trigger the failover switch.
    #[builder(default = 1)]
    pub failure_threshold: u32,
    /// Liveness supervision interval. `None` disables the heartbeat thread.
    #[builder(default, setter(strip_option))]
    pub heartbeat: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EngineState {
    Initializing,
    Running,
    Draining,
    Stopped,
}

/// Liveness signal emitted every heartbeat interval.
#[derive(Debug, Clone, Copy)]
pub struct Heartbeat {
    /// Input byte cursor at the time of the signal.
    pub cursor: u64,
    /// Whether the cursor moved since the previous signal. A stalled cursor
    /// is diagnostic, not fatal.
    pub advanced: bool,
}

/// Requests engine shutdown at the next loop iteration boundary.
#[derive(Clone)]
pub struct ShutdownHandle(Arc<AtomicBool>);

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

/// Accounting for one engine run, reported after the drain.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub frames: u64,
    pub payloads: u64,
    pub records: u64,
    pub framing_faults: u64,
    pub decode_faults: u64,
    pub failovers: u32,
    pub outputs: Vec<OutputSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutputSummary {
    pub descriptor: String,
    pub delivered: u64,
    pub failed: bool,
    pub error: Option<String>,
}

pub struct Engine {
    state: EngineState,
    input: InputChannel,
    standby: Option<ChannelDescriptor>,
    envelope: EnvelopeDecoder,
    outputs: Vec<OutputChannel>,
    decoder: Box<dyn RecordDecoder>,
    failure_threshold: u32,
    heartbeat: Option<Duration>,
    /// Input byte cursor mirrored for the heartbeat thread. The single
    /// piece of cross-thread state in the engine.
    progress: Arc<AtomicU64>,
    stop: Arc<AtomicBool>,
    monitor: Option<Sender<Heartbeat>>,
}

impl Engine {
    /// Construct the engine: parse every descriptor and acquire every
    /// channel resource. Any failure here is fatal and the engine never
    /// starts; a partially constructed channel set is released on return.
    pub fn new(config: EngineConfig, decoder: Box<dyn RecordDecoder>) -> Result<Engine> {
        debug!(state = ?EngineState::Initializing, input = %config.input, "initializing engine");

        if config.outputs.is_empty() {
            return Err(Error::NoOutputs);
        }
        if config.outputs.len() > MAX_OUTPUT_CHANNELS {
            return Err(Error::TooManyOutputs {
                count: config.outputs.len(),
                max: MAX_OUTPUT_CHANNELS,
            });
        }

        let mut input_desc = ChannelDescriptor::parse(&config.input)?;
        let mut standby = match &config.failover {
            Some(s) => {
                let desc = ChannelDescriptor::parse(s)?;
                if !matches!(desc.format, FormatTag::Encap(_)) {
                    return Err(Error::UnknownFormat(format!(
                        "{} is not an input encapsulation",
                        desc.format.tag()
                    )));
                }
                Some(desc)
            }
            None => None,
        };
        if let Some(desc) = standby.as_mut() {
            desc.failover_group = Some(0);
            input_desc.failover_group = Some(0);
        }

        let input = channel::build_input(&input_desc)?;
        let mut outputs = Vec::with_capacity(config.outputs.len());
        for s in &config.outputs {
            let desc = ChannelDescriptor::parse(s)?;
            outputs.push(channel::build_output(&desc)?);
        }

        let envelope = EnvelopeDecoder::new(input.encap());
        Ok(Engine {
            state: EngineState::Running,
            input,
            standby,
            envelope,
            outputs,
            decoder,
            failure_threshold: config.failure_threshold.max(1),
            heartbeat: config.heartbeat,
            progress: Arc::new(AtomicU64::new(0)),
            stop: Arc::new(AtomicBool::new(false)),
            monitor: None,
        })
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// A handle that stops the engine at the next loop iteration boundary,
    /// never mid-read. Safe to trigger from a signal handler.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(self.stop.clone())
    }

    /// Subscribe to heartbeat signals. Call before [Engine::run]; signals
    /// are only produced while the engine runs with a heartbeat interval
    /// configured.
    pub fn heartbeat_monitor(&mut self) -> Receiver<Heartbeat> {
        let (tx, rx) = bounded(64);
        self.monitor = Some(tx);
        rx
    }

    /// Drive the stream until it ends, the input fails beyond recovery, or
    /// shutdown is requested, then drain and stop. The engine cannot be run
    /// again afterwards.
    ///
    /// # Errors
    /// [Error::Stopped] if the engine already ran; [Error::InputFailed] or
    /// [Error::OutputsFailed] for fatal runtime failures. Output channels
    /// are drained in every case.
    pub fn run(&mut self) -> Result<RunSummary> {
        if self.state != EngineState::Running {
            return Err(Error::Stopped);
        }

        let supervisor = self
            .heartbeat
            .map(|interval| Supervisor::start(interval, self.progress.clone(), self.monitor.clone()));

        let mut summary = RunSummary::default();
        let zult = self.pump(&mut summary);

        self.state = EngineState::Draining;
        debug!("draining output channels");
        for output in &mut self.outputs {
            if let Err(err) = output.finish() {
                warn!(descriptor = %output.descriptor(), %err, "error closing output channel");
            }
            summary.outputs.push(OutputSummary {
                descriptor: output.descriptor().to_string(),
                delivered: output.delivered(),
                failed: output.state() == WriteState::Errored,
                error: output.last_error().map(String::from),
            });
        }
        self.input.close();
        self.state = EngineState::Stopped;

        if let Some(supervisor) = supervisor {
            supervisor.stop();
        }

        zult.map(|()| {
            info!(
                frames = summary.frames,
                records = summary.records,
                "stream drained"
            );
            summary
        })
    }

    fn pump(&mut self, summary: &mut RunSummary) -> Result<()> {
        let mut consecutive_failures = 0u32;
        loop {
            if self.stop.load(Ordering::Relaxed) {
                info!("shutdown requested");
                return Ok(());
            }

            match self.input.next_frame() {
                Ok(Poll::Idle) => continue,
                Ok(Poll::End) => {
                    debug!(cursor = self.input.cursor(), "end of input stream");
                    let tail = self.envelope.flush(self.input.cursor());
                    self.dispatch(tail, summary)?;
                    return Ok(());
                }
                Ok(Poll::Frame(frame)) => {
                    consecutive_failures = 0;
                    summary.frames += 1;
                    let cursor = self.input.cursor();
                    self.progress.store(cursor, Ordering::Relaxed);
                    let unwrapped = self.envelope.unwrap(&frame, cursor);
                    self.dispatch(unwrapped, summary)?;
                }
                Err(err) => {
                    consecutive_failures += 1;
                    warn!(%err, consecutive_failures, "input transport error");
                    if consecutive_failures < self.failure_threshold {
                        continue;
                    }
                    match self.standby.take() {
                        Some(desc) => {
                            self.switch_input(desc)?;
                            summary.failovers += 1;
                            consecutive_failures = 0;
                        }
                        None => return Err(Error::InputFailed(err.to_string())),
                    }
                }
            }
        }
    }

    /// The engine's whole failover algorithm: close the failed input, open
    /// the sibling, resume. The sibling is consumed; a second failure on
    /// the new input is fatal.
    fn switch_input(&mut self, descriptor: ChannelDescriptor) -> Result<()> {
        info!(from = %self.input.descriptor(), to = %descriptor, "switching to failover input");
        self.input.close();
        let input = channel::build_input(&descriptor)
            .map_err(|err| Error::InputFailed(format!("failover {descriptor}: {err}")))?;
        // No envelope state crosses the switch boundary.
        self.envelope = EnvelopeDecoder::new(input.encap());
        self.input = input;
        Ok(())
    }

    fn dispatch(&mut self, unwrapped: Unwrapped, summary: &mut RunSummary) -> Result<()> {
        for fault in &unwrapped.faults {
            summary.framing_faults += 1;
            warn!(%fault, cursor = self.input.cursor(), "framing fault, resynchronized");
        }
        for block in &unwrapped.blocks {
            summary.payloads += 1;
            match self.decoder.decode(block) {
                Ok(record) => {
                    summary.records += 1;
                    self.fan_out(&record)?;
                }
                Err(err) => {
                    summary.decode_faults += 1;
                    debug!(%err, resync_offset = block.resync_offset, "skipping undecodable payload");
                }
            }
        }
        Ok(())
    }

    /// Deliver one record to every healthy output, registration order. A
    /// failing sink is excluded from the rest of the run but never stops
    /// delivery to its peers within the same step.
    fn fan_out(&mut self, record: &DecodedRecord) -> Result<()> {
        let mut healthy = 0usize;
        for output in &mut self.outputs {
            if output.state() != WriteState::Open {
                continue;
            }
            match output.write_record(record) {
                Ok(()) => healthy += 1,
                Err(err) => {
                    warn!(descriptor = %output.descriptor(), %err, "output write failed, channel excluded from fan-out");
                }
            }
        }
        if healthy == 0 {
            return Err(Error::OutputsFailed);
        }
        Ok(())
    }
}

/// Heartbeat thread: samples the progress counter every interval and emits
/// a liveness signal for an external monitor.
struct Supervisor {
    done: Sender<()>,
    handle: JoinHandle<()>,
}

impl Supervisor {
    fn start(
        interval: Duration,
        progress: Arc<AtomicU64>,
        monitor: Option<Sender<Heartbeat>>,
    ) -> Supervisor {
        let (done_tx, done_rx) = bounded::<()>(0);
        let handle = thread::Builder::new()
            .name("heartbeat".into())
            .spawn(move || {
                let ticker = tick(interval);
                let mut last = progress.load(Ordering::Relaxed);
                loop {
                    select! {
                        recv(ticker) -> _ => {
                            let cursor = progress.load(Ordering::Relaxed);
                            let advanced = cursor != last;
                            if advanced {
                                debug!(cursor, "heartbeat");
                            } else {
                                warn!(cursor, "heartbeat: no forward progress this interval");
                            }
                            if let Some(tx) = &monitor {
                                let _ = tx.try_send(Heartbeat { cursor, advanced });
                            }
                            last = cursor;
                        }
                        recv(done_rx) -> _ => break,
                    }
                }
            })
            .expect("failed to spawn heartbeat thread");
        Supervisor {
            done: done_tx,
            handle,
        }
    }

    fn stop(self) {
        drop(self.done);
        let _ = self.handle.join();
    }
}
