//! Routing zone worker: the thread that ticks a base zone's pipeline (and
//! any derived zones piggy-backing on it) once per period.
//!
//! Mirrors `gecko_core::engine::AudioEngine`'s thread lifecycle almost
//! exactly: a named, `thread::Builder`-spawned thread, a command channel
//! for control, a shutdown flag checked every iteration, and a `Drop` impl
//! that signals shutdown and joins. The difference is *what* the thread
//! does each iteration (tick a pipeline instead of pump a cpal stream)
//! and that it also drives the zone's `Inactive -> ActivePending ->
//! Active -> StopPending -> Inactive` state machine.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use smartx_model::clock::{ClockType, DataFormat};
use smartx_model::handle::{PinHandle, ZoneHandle};
use smartx_model::properties::Properties;
use smartx_model::zone::ZoneState;
use tracing::{debug, info, warn};

use crate::error::{RuntimeError, RuntimeResult};
use crate::pipeline_engine::PipelineEngine;
use crate::ring_buffer::{copy_audio_areas, RingBufferConsumer, RingBufferProducer};
use crate::sched_shim::SchedulerShim;
use crate::switch_matrix::SwitchMatrix;

/// Where a tick's pipeline output pin gets delivered: the sink device's
/// (or, for a derived zone, its own sink's) ring buffer producer, format
/// converted on the way in.
pub struct SinkDelivery {
    pub output_pin: PinHandle,
    pub producer: RingBufferProducer,
    pub format: DataFormat,
}

fn deliver_to_sink(samples: &[f32], delivery: &mut SinkDelivery, period_frames: u32) -> RuntimeResult<()> {
    let channels = delivery.producer.channels().max(1) as usize;
    let mut access = delivery.producer.begin_access(period_frames);
    let granted = access.frames_granted() as usize;
    let frame_bytes = channels * delivery.format.bytes_per_sample();
    let n = granted.min(samples.len() / channels);
    {
        let bytes = access.bytes_mut();
        for frame in 0..n {
            for ch in 0..channels {
                let value = samples[frame * channels + ch];
                let offset = frame * frame_bytes + ch * delivery.format.bytes_per_sample();
                crate::ring_buffer::write_sample_normalized(delivery.format, bytes, offset, value);
            }
        }
    }
    access.end_access(n as u32)
}

/// A zone with no pipeline attached still ticks: §4.3 step 4's
/// no-pipeline path copies the zone's single input port's conversion
/// buffer straight into the sink device ring buffer, with format
/// conversion, instead of running it through a `PipelineEngine`.
pub struct PassthroughDelivery {
    pub consumer: RingBufferConsumer,
    pub producer: RingBufferProducer,
    pub sink_format: DataFormat,
}

fn run_passthrough(delivery: &mut PassthroughDelivery, period_frames: u32) -> RuntimeResult<()> {
    let consumer_format = delivery.consumer.format();
    let read = delivery.consumer.begin_access(period_frames)?;
    let granted = read.frames_granted();
    let mut write = delivery.producer.begin_access(granted);
    let to_process = write.frames_granted();
    copy_audio_areas(
        write.areas(),
        delivery.sink_format,
        write.bytes_mut(),
        read.areas(),
        consumer_format,
        read.bytes(),
        to_process,
    )?;
    write.end_access(to_process)?;
    read.end_access(granted);
    Ok(())
}

/// The other half of the tick: a zone input port's conversion buffer
/// (written by the switch matrix's `run()` this same tick) drained into
/// one of the zone's pipeline input pins before `process()` runs.
pub struct InputFeed {
    pub input_pin: PinHandle,
    pub consumer: RingBufferConsumer,
}

fn feed_from_input(engine: &PipelineEngine, feed: &mut InputFeed, period_frames: u32) -> RuntimeResult<()> {
    let format = feed.consumer.format();
    let access = feed.consumer.begin_access(period_frames)?;
    let bytes = access.bytes();
    let granted = access.frames_granted();
    let areas = access.areas();
    let mut samples = Vec::with_capacity((granted as usize) * areas.len());
    for frame in 0..granted {
        for area in areas {
            samples.push(crate::ring_buffer::read_sample_normalized(
                format,
                bytes,
                area.frame_offset_bytes(frame),
            ));
        }
    }
    access.end_access(granted);
    engine.provide_input_data(feed.input_pin, &samples)
}

/// A derived pipeline co-scheduled with the base zone's pipeline. §4.3's
/// period-compatibility invariant (`base_period × base_rate ==
/// derived_period × derived_rate × k`, integer k ≥ 1) always puts the
/// derived zone at an equal-or-faster rate than its base, so co-scheduling
/// means running the derived pipeline `runs_per_tick` (= k) times for
/// every one base tick, never the other way around.
pub struct DerivedSchedule {
    pub zone: ZoneHandle,
    pub engine: PipelineEngine,
    pub runs_per_tick: u32,
    pub delivery: Option<SinkDelivery>,
    pub inputs: Vec<InputFeed>,
}

impl DerivedSchedule {
    pub fn new(
        zone: ZoneHandle,
        engine: PipelineEngine,
        runs_per_tick: u32,
        delivery: Option<SinkDelivery>,
        inputs: Vec<InputFeed>,
    ) -> Self {
        Self {
            zone,
            engine,
            runs_per_tick: runs_per_tick.max(1),
            delivery,
            inputs,
        }
    }
}

enum WorkerCommand {
    Stop,
    /// A command-plane dispatch to a named module instance, serviced
    /// between ticks so it never competes with `process()` for the
    /// module's state. `reply` carries back whatever engine (base or
    /// derived) actually owns the instance, or `NotFound` if none does.
    SendModuleCommand {
        instance_name: String,
        cmd: Properties,
        reply: Sender<RuntimeResult<Properties>>,
    },
    /// The sink's own period-complete signal, for `Received`/`ReceivedAsync`
    /// sinks whose tick isn't driven by a monotonic timer (§4.3's "Clock
    /// source").
    SignalTick,
}

/// What to do after one wait on the command channel.
enum WaitOutcome {
    Stop,
    Tick,
    SendModuleCommand {
        instance_name: String,
        cmd: Properties,
        reply: Sender<RuntimeResult<Properties>>,
    },
    Disconnected,
}

/// `Provided` sinks tick off a monotonic timer (`recv_timeout(period)`
/// doubling as the wait); `Received`/`ReceivedAsync` sinks block
/// indefinitely for an external `SignalTick` instead, since nothing about
/// their own clock lets the worker predict when the next period is ready.
fn wait_for_next(command_rx: &Receiver<WorkerCommand>, period: Duration, sink_clock: ClockType) -> WaitOutcome {
    let command = if sink_clock == ClockType::Provided {
        match command_rx.recv_timeout(period) {
            Ok(cmd) => cmd,
            Err(RecvTimeoutError::Timeout) => return WaitOutcome::Tick,
            Err(RecvTimeoutError::Disconnected) => return WaitOutcome::Disconnected,
        }
    } else {
        match command_rx.recv() {
            Ok(cmd) => cmd,
            Err(_) => return WaitOutcome::Disconnected,
        }
    };
    match command {
        WorkerCommand::Stop => WaitOutcome::Stop,
        WorkerCommand::SignalTick => WaitOutcome::Tick,
        WorkerCommand::SendModuleCommand { instance_name, cmd, reply } => {
            WaitOutcome::SendModuleCommand { instance_name, cmd, reply }
        }
    }
}

fn encode_state(state: ZoneState) -> u8 {
    match state {
        ZoneState::Inactive => 0,
        ZoneState::ActivePending => 1,
        ZoneState::Active => 2,
        ZoneState::StopPending => 3,
    }
}

fn decode_state(value: u8) -> ZoneState {
    match value {
        0 => ZoneState::Inactive,
        1 => ZoneState::ActivePending,
        2 => ZoneState::Active,
        _ => ZoneState::StopPending,
    }
}

/// Owns the base zone's worker thread. Constructing one does not start
/// it; call [`ZoneWorker::start`].
pub struct ZoneWorker {
    zone: ZoneHandle,
    state: Arc<AtomicU8>,
    command_tx: Sender<WorkerCommand>,
    command_rx: Option<Receiver<WorkerCommand>>,
    shutdown: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl ZoneWorker {
    pub fn new(zone: ZoneHandle) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self {
            zone,
            state: Arc::new(AtomicU8::new(encode_state(ZoneState::Inactive))),
            command_tx: tx,
            command_rx: Some(rx),
            shutdown: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }

    pub fn state(&self) -> ZoneState {
        decode_state(self.state.load(Ordering::Acquire))
    }

    /// Spins up the worker thread, which immediately moves the zone into
    /// `ActivePending` and then `Active` once the first tick completes.
    /// `base_engine` is `None` for a zone with no pipeline attached, in
    /// which case `base_passthrough` carries the direct zone-input-to-sink
    /// copy path instead.
    #[allow(clippy::too_many_arguments)]
    pub fn start(
        &mut self,
        base_engine: Option<PipelineEngine>,
        base_delivery: Option<SinkDelivery>,
        base_passthrough: Option<PassthroughDelivery>,
        base_inputs: Vec<InputFeed>,
        base_period_frames: u32,
        sink_clock: ClockType,
        switch_matrix: Arc<SwitchMatrix>,
        derived: Vec<DerivedSchedule>,
        period: Duration,
        scheduler: Arc<dyn SchedulerShim>,
        rt_priority: Option<i32>,
    ) {
        if self.thread.is_some() {
            warn!(zone = %self.zone, "zone worker already running");
            return;
        }
        self.state.store(encode_state(ZoneState::ActivePending), Ordering::Release);
        self.shutdown.store(false, Ordering::Release);
        let command_rx = self.command_rx.take().expect("command_rx taken once");
        let state = self.state.clone();
        let shutdown = self.shutdown.clone();
        let zone = self.zone;

        let thread = thread::Builder::new()
            .name(format!("smartx-zone-{}", zone.raw()))
            .spawn(move || {
                if let Some(priority) = rt_priority {
                    if let Err(err) = scheduler.apply_realtime_priority(priority) {
                        warn!(zone = %zone, %err, "falling back to default scheduling");
                    }
                }
                state.store(encode_state(ZoneState::Active), Ordering::Release);
                info!(zone = %zone, "zone worker active");
                run_tick_loop(
                    base_engine,
                    base_delivery,
                    base_passthrough,
                    base_inputs,
                    base_period_frames,
                    sink_clock,
                    switch_matrix,
                    derived,
                    period,
                    &command_rx,
                    &shutdown,
                );
                state.store(encode_state(ZoneState::Inactive), Ordering::Release);
                info!(zone = %zone, "zone worker stopped");
            })
            .expect("failed to spawn zone worker thread");
        self.thread = Some(thread);
    }

    /// Delivers the sink's period-complete signal to the worker thread,
    /// for `Received`/`ReceivedAsync` sinks that tick on an external
    /// signal rather than a timer. A no-op if the worker isn't running.
    pub fn signal_tick(&self) {
        let _ = self.command_tx.send(WorkerCommand::SignalTick);
    }

    /// Dispatches a command to a module instance owned by this zone's
    /// base or derived engines, blocking for at most one period for the
    /// reply. The module's `process()` and `send_cmd()` never run
    /// concurrently, since both are only ever invoked from the worker
    /// thread's tick loop.
    pub fn send_module_command(&self, instance_name: &str, cmd: Properties) -> RuntimeResult<Properties> {
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        self.command_tx
            .send(WorkerCommand::SendModuleCommand {
                instance_name: instance_name.to_string(),
                cmd,
                reply: reply_tx,
            })
            .map_err(|_| RuntimeError::WorkerFailed("zone worker is not running".into()))?;
        reply_rx
            .recv_timeout(Duration::from_millis(500))
            .map_err(|_| RuntimeError::WorkerFailed("module command timed out".into()))?
    }

    /// Requests a stop and blocks until the worker thread has drained and
    /// exited, matching `AudioEngine::stop`'s join-on-stop behaviour.
    pub fn stop(&mut self) {
        if self.thread.is_none() {
            return;
        }
        self.state.store(encode_state(ZoneState::StopPending), Ordering::Release);
        let _ = self.command_tx.send(WorkerCommand::Stop);
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
        // Restore a receiver so the worker can be started again.
        let (tx, rx) = crossbeam_channel::unbounded();
        self.command_tx = tx;
        self.command_rx = Some(rx);
    }
}

impl Drop for ZoneWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[allow(clippy::too_many_arguments)]
fn run_tick_loop(
    mut base_engine: Option<PipelineEngine>,
    mut base_delivery: Option<SinkDelivery>,
    mut base_passthrough: Option<PassthroughDelivery>,
    mut base_inputs: Vec<InputFeed>,
    base_period_frames: u32,
    sink_clock: ClockType,
    switch_matrix: Arc<SwitchMatrix>,
    mut derived: Vec<DerivedSchedule>,
    period: Duration,
    command_rx: &Receiver<WorkerCommand>,
    shutdown: &AtomicBool,
) {
    loop {
        if shutdown.load(Ordering::Acquire) {
            break;
        }
        match wait_for_next(command_rx, period, sink_clock) {
            WaitOutcome::Stop => break,
            WaitOutcome::Disconnected => {
                debug!("zone worker command channel disconnected, stopping");
                break;
            }
            WaitOutcome::SendModuleCommand { instance_name, cmd, reply } => {
                let result = match &mut base_engine {
                    Some(engine) => engine.send_cmd(&instance_name, &cmd).or_else(|err| {
                        find_in_derived(&mut derived, &instance_name, &cmd).unwrap_or(Err(err))
                    }),
                    None => find_in_derived(&mut derived, &instance_name, &cmd).unwrap_or_else(|| {
                        Err(RuntimeError::Model(smartx_model::ModelError::NotFound(format!(
                            "module instance '{instance_name}'"
                        ))))
                    }),
                };
                let _ = reply.send(result);
            }
            WaitOutcome::Tick => {
                if let Err(err) = switch_matrix.run(base_period_frames) {
                    warn!(%err, "switch matrix job failed this period");
                }
                match &mut base_engine {
                    Some(engine) => {
                        for feed in &mut base_inputs {
                            if let Err(err) = feed_from_input(engine, feed, base_period_frames) {
                                warn!(%err, "base input feed failed this period");
                            }
                        }
                        if let Err(err) = engine.process() {
                            warn!(%err, "base pipeline process failed this period");
                        } else if let Some(delivery) = &mut base_delivery {
                            if let Err(err) = engine
                                .retrieve_output_data(delivery.output_pin)
                                .and_then(|samples| deliver_to_sink(&samples, delivery, base_period_frames))
                            {
                                warn!(%err, "base sink delivery failed this period");
                            }
                        }
                    }
                    None => {
                        if let Some(passthrough) = &mut base_passthrough {
                            if let Err(err) = run_passthrough(passthrough, base_period_frames) {
                                warn!(%err, "base passthrough delivery failed this period");
                            }
                        }
                    }
                }
                for schedule in &mut derived {
                    let derived_period_frames = schedule.engine.period_frames();
                    for _ in 0..schedule.runs_per_tick {
                        for feed in &mut schedule.inputs {
                            if let Err(err) = feed_from_input(&schedule.engine, feed, derived_period_frames) {
                                warn!(zone = %schedule.zone, %err, "derived input feed failed this period");
                            }
                        }
                        if let Err(err) = schedule.engine.process() {
                            warn!(zone = %schedule.zone, %err, "derived pipeline process failed this period");
                            continue;
                        }
                        if let Some(delivery) = &mut schedule.delivery {
                            let result = schedule
                                .engine
                                .retrieve_output_data(delivery.output_pin)
                                .and_then(|samples| deliver_to_sink(&samples, delivery, derived_period_frames));
                            if let Err(err) = result {
                                warn!(zone = %schedule.zone, %err, "derived sink delivery failed this period");
                            }
                        }
                    }
                }
            }
        }
    }
}

fn find_in_derived(
    derived: &mut [DerivedSchedule],
    instance_name: &str,
    cmd: &Properties,
) -> Option<RuntimeResult<Properties>> {
    derived.iter_mut().find_map(|schedule| match schedule.engine.send_cmd(instance_name, cmd) {
        Err(RuntimeError::Model(smartx_model::ModelError::NotFound(_))) => None,
        other => Some(other),
    })
}
