//! `SmartXbar`: the top-level handle an application constructs. Owns the
//! configuration registry, the event bus, the module factory table, and
//! every base zone's live runtime state (switch matrix, worker thread,
//! device ring buffers). Plays the role `gecko_core::AudioEngine` plays in
//! the teacher workspace: the one object wired together at startup and
//! handed to the façades, which each contribute an `impl SmartXbar` block.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use smartx_dsp::module::ModuleEventPayload;
use smartx_dsp::ModuleFactory;
use smartx_model::event::ModelEvent;
use smartx_model::handle::{PinHandle, PipelineHandle, PortHandle, ZoneHandle};
use smartx_model::pin::PinDirection;
use smartx_model::registry::Registry;

use smartx_runtime::ring_buffer::{RingBufferConsumer, RingBufferProducer};
use smartx_runtime::sched_shim::{get_scheduler, SchedulerShim};
use smartx_runtime::switch_matrix::SwitchMatrix;
use smartx_runtime::zone_worker::ZoneWorker;

use crate::config::SchedulingConfig;
use crate::event_bus::EventBus;

/// The two ring-buffer halves allocated for one port the moment it is
/// created (a device port sized from its device's `DeviceParams`, a zone
/// input port sized from its zone's pipeline rate — always `Float32`,
/// since it only ever feeds the pipeline engine internally). Each half is
/// handed out (taken, not cloned — both sides are strictly SPSC) the
/// first time something needs to read or write it: a source port's
/// consumer goes to the switch matrix at `connect()` time, a sink port's
/// producer goes to the owning zone's `SinkDelivery` at `start_zone()`
/// time, a zone input port's producer goes to the switch matrix at
/// `connect()` time and its consumer becomes an `InputFeed`. Whichever
/// half isn't claimed stays available for a Debug-façade probe to tap.
///
/// One ring buffer per port rather than per device: a strictly SPSC ring
/// can only ever serve one connection, so fanning a single source out to
/// several zones needs one buffer per destination port, not one shared
/// buffer at the device. A device with more than one port just gets more
/// than one entry here.
#[derive(Default)]
pub(crate) struct PortRing {
    pub producer: Option<RingBufferProducer>,
    pub consumer: Option<RingBufferConsumer>,
}

/// Live runtime state for one base zone. Created (empty, unstarted) the
/// moment a zone is created, and torn down if the zone is later folded
/// into another zone's derived-zone list, since only base zones own a
/// matrix or a worker thread.
pub(crate) struct BaseZoneRuntime {
    pub switch_matrix: Arc<SwitchMatrix>,
    pub worker: ZoneWorker,
    /// The pipeline pin this zone's probes and sink delivery resolve
    /// against, cached from the last successful pipeline attachment.
    pub pipeline: Option<PipelineHandle>,
}

/// An active Debug-façade probe: a background thread draining (record) or
/// feeding (inject) one port's still-unclaimed `PortRing` half into/out of
/// a per-channel WAV file, independent of the zone worker's own tick rate.
/// Taps the port's ring buffer rather than a pipeline pin's `AudioStream`
/// directly, since the engine that owns pin-level streams is moved into
/// the worker thread's closure once a zone starts and isn't reachable
/// from here.
pub(crate) struct ActiveProbe {
    pub stop: Arc<std::sync::atomic::AtomicBool>,
    pub thread: Option<std::thread::JoinHandle<()>>,
}

pub struct SmartXbar {
    pub(crate) registry: Mutex<Registry>,
    pub(crate) event_bus: EventBus,
    pub(crate) factories: Mutex<HashMap<String, Arc<dyn ModuleFactory>>>,
    pub(crate) port_rings: Mutex<HashMap<PortHandle, PortRing>>,
    pub(crate) base_zones: Mutex<HashMap<ZoneHandle, BaseZoneRuntime>>,
    pub(crate) source_groups: Mutex<HashMap<String, Vec<i32>>>,
    pub(crate) probes: Mutex<HashMap<String, ActiveProbe>>,
    pub(crate) scheduling_config: SchedulingConfig,
    pub(crate) scheduler: Arc<dyn SchedulerShim>,
    module_event_tx: crossbeam_channel::Sender<ModuleEventPayload>,
}

impl SmartXbar {
    /// Builds a bar with the scheduling config loaded from
    /// `$SMARTX_CFG_DIR`/the platform config directory (see
    /// [`SchedulingConfig::load`]).
    pub fn new() -> Self {
        Self::with_config(SchedulingConfig::load())
    }

    /// Builds a bar with an explicit scheduling config, bypassing the
    /// filesystem search — what tests and embedders that already parsed
    /// their own config use.
    pub fn with_config(scheduling_config: SchedulingConfig) -> Self {
        let event_bus = EventBus::new();
        let (module_event_tx, module_event_rx) = crossbeam_channel::unbounded::<ModuleEventPayload>();
        let bus_sender = event_bus.sender();
        std::thread::Builder::new()
            .name("smartx-module-events".into())
            .spawn(move || {
                while let Ok(payload) = module_event_rx.recv() {
                    let _ = bus_sender.send(ModelEvent::ModuleEvent {
                        instance_name: payload.instance_name,
                        type_name: payload.type_name,
                        properties: payload.properties,
                    });
                }
            })
            .expect("failed to spawn module-event forwarding thread");

        info!(policy = ?scheduling_config.sched_policy, priority = scheduling_config.sched_priority, "smartxbar constructed");
        Self {
            registry: Mutex::new(Registry::new()),
            event_bus,
            factories: Mutex::new(HashMap::new()),
            port_rings: Mutex::new(HashMap::new()),
            base_zones: Mutex::new(HashMap::new()),
            source_groups: Mutex::new(HashMap::new()),
            probes: Mutex::new(HashMap::new()),
            scheduling_config,
            scheduler: get_scheduler(),
            module_event_tx,
        }
    }

    /// Registers a DSP module type so the pipeline engine can instantiate
    /// it by name when a pipeline is built. Plug-in *loading* (discovering
    /// a shared library and resolving its factory symbol) is out of
    /// scope; the application links its module factories in and calls
    /// this once per type at startup.
    pub fn register_module_factory(&self, factory: Arc<dyn ModuleFactory>) {
        let type_name = factory.type_name().to_string();
        self.factories.lock().insert(type_name, factory);
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub(crate) fn module_event_sender(&self) -> crossbeam_channel::Sender<ModuleEventPayload> {
        self.module_event_tx.clone()
    }
}

impl Default for SmartXbar {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves `port_name` against a pipeline's boundary pins using the same
/// name-match-then-positional-fallback convention
/// `smartx_dsp::passthrough` uses for its own pin binding: an exact name
/// match wins, and if nothing matches but the pipeline has exactly one
/// boundary pin of the requested direction, that one is used.
pub(crate) fn resolve_boundary_pin(
    registry: &Registry,
    pipeline: PipelineHandle,
    port_name: &str,
    direction: PinDirection,
) -> Option<PinHandle> {
    let pipeline = registry.pipeline(pipeline).ok()?;
    let mut candidates = Vec::new();
    for pin_handle in &pipeline.pins {
        let Ok(pin) = registry.pin(*pin_handle) else {
            continue;
        };
        if pin.direction != direction {
            continue;
        }
        if pin.name == port_name {
            return Some(*pin_handle);
        }
        candidates.push(*pin_handle);
    }
    match candidates.as_slice() {
        [only] => Some(*only),
        _ => None,
    }
}
