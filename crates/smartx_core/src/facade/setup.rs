//! Setup façade (§4.5): create/destroy/link every model object, and
//! start/stop a base zone's worker.
//!
//! Every mutation that touches a zone's own topology — its input ports,
//! its pipeline's pins/modules/links — is rejected with `InvalidState`
//! while that zone is `Active`/`ActivePending`, exactly the list spec.md
//! §4.3 gives: "adding/removing derived zones, attaching/detaching
//! pipelines, adding/removing ports, creating/destroying pins or modules
//! inside its pipeline, linking or unlinking pins that belong to its
//! pipeline, and destroying its sink device."

use std::sync::Arc;

use smartx_model::device::{DeviceDirection, DeviceParams};
use smartx_model::event::ModelEvent;
use smartx_model::handle::{DeviceHandle, LinkHandle, ModuleHandle, PinHandle, PipelineHandle, PortHandle, ZoneHandle};
use smartx_model::link::LinkType;
use smartx_model::pin::{PinDirection, PinOwner};
use smartx_model::pipeline::PipelineBuildState;
use smartx_model::port::{PortDirection, PortOwner};
use smartx_model::properties::Properties;
use smartx_model::registry::Registry;
use smartx_model::ModelError;
use tracing::{info, warn};

use smartx_runtime::pipeline_engine::PipelineEngine;
use smartx_runtime::ring_buffer::{new_ring_buffer, AreaLayout};
use smartx_runtime::switch_matrix::SwitchMatrix;
use smartx_runtime::zone_worker::{DerivedSchedule, InputFeed, PassthroughDelivery, SinkDelivery, ZoneWorker};

use crate::bar::{resolve_boundary_pin, BaseZoneRuntime, PortRing, SmartXbar};
use crate::error::{BarError, BarResult};

/// Per-device ring buffers are capped the way §7's `NoResources` taxonomy
/// entry describes ("would exceed per-device buffer budget"); a generous
/// fixed cap rather than a configurable one, since nothing in the spec
/// ties it to anything else.
const MAX_DEVICE_BUFFER_BYTES: usize = 16 * 1024 * 1024;

fn pipeline_owning_module(registry: &Registry, module: ModuleHandle) -> Option<PipelineHandle> {
    registry.pipelines().find(|p| p.modules.contains(&module)).map(|p| p.handle)
}

fn zone_owning_pipeline(registry: &Registry, pipeline: PipelineHandle) -> Option<ZoneHandle> {
    registry.zones().find(|z| z.pipeline == Some(pipeline)).map(|z| z.handle)
}

fn zone_for_pin(registry: &Registry, pin: PinHandle) -> BarResult<Option<ZoneHandle>> {
    let pin = registry.pin(pin)?;
    let pipeline = match pin.owner {
        PinOwner::Pipeline(p) => p,
        PinOwner::Module(m) => match pipeline_owning_module(registry, m) {
            Some(p) => p,
            None => return Ok(None),
        },
    };
    Ok(zone_owning_pipeline(registry, pipeline))
}

fn check_zone_not_locked(registry: &Registry, zone: ZoneHandle) -> BarResult<()> {
    if registry.zone(zone)?.is_mutation_locked() {
        return Err(BarError::Model(ModelError::InvalidState(format!(
            "zone {zone} is active; stop it before mutating its topology"
        ))));
    }
    Ok(())
}

fn check_pipeline_mutable(registry: &Registry, pipeline: PipelineHandle) -> BarResult<()> {
    if let Some(zone) = zone_owning_pipeline(registry, pipeline) {
        check_zone_not_locked(registry, zone)?;
    }
    if !registry.pipeline(pipeline)?.is_building() {
        return Err(BarError::Model(ModelError::InvalidState(format!(
            "pipeline {pipeline} is already initialized; destroy and rebuild it to change its topology"
        ))));
    }
    Ok(())
}

impl SmartXbar {
    // ---- devices ------------------------------------------------------

    pub fn create_source_device(&self, name: &str, params: DeviceParams) -> BarResult<DeviceHandle> {
        check_buffer_budget(&params)?;
        let handle = self.registry.lock().create_device(name, DeviceDirection::Source, params)?;
        info!(device = %handle, %name, "source device created");
        Ok(handle)
    }

    pub fn create_sink_device(&self, name: &str, params: DeviceParams) -> BarResult<DeviceHandle> {
        check_buffer_budget(&params)?;
        let handle = self.registry.lock().create_device(name, DeviceDirection::Sink, params)?;
        info!(device = %handle, %name, "sink device created");
        Ok(handle)
    }

    pub fn destroy_device(&self, handle: DeviceHandle) -> BarResult<()> {
        let registry = self.registry.lock();
        let ports = registry.device(handle)?.ports.clone();
        for port in &ports {
            self.drop_port_connections(&registry, *port);
        }
        drop(registry);
        self.registry.lock().destroy_device(handle)?;
        for port in ports {
            self.port_rings.lock().remove(&port);
        }
        info!(device = %handle, "device destroyed");
        Ok(())
    }

    /// Adds a channel-addressable port to a device. Direction is derived
    /// from the device's own direction, per the data model ("a source
    /// device's ports are output ports; a sink device's ports are input
    /// ports"). Allocates the port's ring buffer immediately, sized from
    /// the owning device's parameters.
    pub fn create_device_port(
        &self,
        device: DeviceHandle,
        name: &str,
        id: i32,
        channel_count: u16,
        base_index: u16,
    ) -> BarResult<PortHandle> {
        let mut registry = self.registry.lock();
        let dev = registry.device(device)?;
        let direction = match dev.direction {
            DeviceDirection::Source => PortDirection::Output,
            DeviceDirection::Sink => PortDirection::Input,
        };
        let params = dev.params;
        let handle = registry.create_port(PortOwner::Device(device), name, id, channel_count, direction, base_index)?;
        drop(registry);
        let (producer, consumer) = new_ring_buffer(
            channel_count,
            params.format,
            AreaLayout::Interleaved,
            params.period_frames,
            params.num_periods,
        );
        self.port_rings.lock().insert(
            handle,
            PortRing {
                producer: Some(producer),
                consumer: Some(consumer),
            },
        );
        Ok(handle)
    }

    /// Adds one of a zone's own input ports — the addressable endpoint
    /// the switch matrix writes a connection's converted PCM into. Base
    /// index is always 0 (the data model's "one buffer per zone input
    /// port" invariant). Requires a pipeline to already be attached, so
    /// the conversion buffer can be sized at the zone's rate; format is
    /// fixed `Float32` since this buffer only ever feeds the pipeline
    /// engine internally.
    pub fn add_zone_input_port(&self, zone: ZoneHandle, name: &str, id: i32, channel_count: u16) -> BarResult<PortHandle> {
        let mut registry = self.registry.lock();
        check_zone_not_locked(&registry, zone)?;
        // The conversion buffer is sized off the zone's own rate/period
        // (§3's glossary entry for "Conversion buffer"), which comes from
        // the attached pipeline when there is one, or the sink device's
        // own params for a zone that runs in no-pipeline passthrough mode.
        let zone_data = registry.zone(zone)?;
        let (sample_rate, period_frames) = match zone_data.pipeline {
            Some(p) => {
                let pipeline = registry.pipeline(p)?;
                (pipeline.sample_rate, pipeline.period_frames)
            }
            None => {
                let sink = zone_data
                    .sink_device
                    .ok_or_else(|| ModelError::InvalidState("zone has neither a pipeline nor a sink device attached yet".into()))?;
                let dev = registry.device(sink)?;
                (dev.params.sample_rate, dev.params.period_frames)
            }
        };
        let handle = registry.create_port(
            PortOwner::Zone(zone),
            name,
            id,
            channel_count,
            PortDirection::Input,
            0,
        )?;
        drop(registry);
        let _ = sample_rate;
        let (producer, consumer) = new_ring_buffer(
            channel_count,
            smartx_model::clock::DataFormat::Float32,
            AreaLayout::Interleaved,
            period_frames,
            2,
        );
        self.port_rings.lock().insert(
            handle,
            PortRing {
                producer: Some(producer),
                consumer: Some(consumer),
            },
        );
        Ok(handle)
    }

    pub fn destroy_port(&self, handle: PortHandle) -> BarResult<()> {
        {
            let registry = self.registry.lock();
            let port = registry.port(handle)?;
            if let PortOwner::Zone(zone) = port.owner {
                check_zone_not_locked(&registry, zone)?;
            }
            self.drop_port_connections(&registry, handle);
        }
        self.port_rings.lock().remove(&handle);
        self.registry.lock().destroy_port(handle)?;
        Ok(())
    }

    /// Tears down every active connection touching `port` and emits one
    /// `SourceRemoved`/`SinkRemoved` per connection before removing it from
    /// the switch matrix, per §7's "destroying a source with active
    /// connections tears them down, emits one `SourceRemoved` per
    /// connection" (and, symmetrically, `SinkRemoved` when the destroyed
    /// port is the connection's sink side). Must run while `port` is still
    /// resolvable in `registry`, since the caller destroys it right after.
    fn drop_port_connections(&self, registry: &Registry, port: PortHandle) {
        for runtime in self.base_zones.lock().values() {
            for (source, sink) in runtime.switch_matrix.active_connections() {
                if source != port && sink != port {
                    continue;
                }
                let (Ok(source_id), Ok(sink_id)) = (registry.port(source).map(|p| p.id), registry.port(sink).map(|p| p.id)) else {
                    continue;
                };
                if source == port {
                    self.event_bus.push(ModelEvent::SourceRemoved {
                        source_port: source_id,
                        sink_port: sink_id,
                    });
                } else {
                    self.event_bus.push(ModelEvent::SinkRemoved { sink_port: sink_id });
                }
            }
            runtime.switch_matrix.remove_connections(port);
        }
    }

    // ---- zones ----------------------------------------------------------

    pub fn create_zone(&self, name: &str) -> BarResult<ZoneHandle> {
        let handle = self.registry.lock().create_zone(name)?;
        self.base_zones.lock().insert(
            handle,
            BaseZoneRuntime {
                switch_matrix: Arc::new(SwitchMatrix::new()),
                worker: ZoneWorker::new(handle),
                pipeline: None,
            },
        );
        info!(zone = %handle, %name, "zone created");
        Ok(handle)
    }

    pub fn destroy_zone(&self, handle: ZoneHandle) -> BarResult<()> {
        self.registry.lock().destroy_zone(handle)?;
        self.base_zones.lock().remove(&handle);
        Ok(())
    }

    pub fn link_sink_to_zone(&self, zone: ZoneHandle, sink: DeviceHandle) -> BarResult<()> {
        let mut registry = self.registry.lock();
        check_zone_not_locked(&registry, zone)?;
        if registry.device(sink)?.direction != DeviceDirection::Sink {
            return Err(BarError::Model(ModelError::InvalidParameter(
                "only a sink device can be linked to a zone".into(),
            )));
        }
        if registry.device(sink)?.linked_zone.is_some() {
            return Err(BarError::Model(ModelError::AlreadyExists(
                "sink device is already linked to a zone".into(),
            )));
        }
        registry.device_mut(sink)?.linked_zone = Some(zone);
        registry.zone_mut(zone)?.sink_device = Some(sink);
        Ok(())
    }

    /// Registers `derived` as co-scheduled off `base`'s worker. Validated
    /// here rather than in the registry, since only the setup façade
    /// knows about sample rates (both zones must already have a pipeline
    /// attached): `base.period_frames * derived.sample_rate` must equal
    /// `derived.period_frames * base.sample_rate * k` for an integer
    /// `k >= 1` (spec.md §8's testable property).
    pub fn add_derived_zone(&self, base: ZoneHandle, derived: ZoneHandle) -> BarResult<()> {
        let mut registry = self.registry.lock();
        check_zone_not_locked(&registry, base)?;
        check_zone_not_locked(&registry, derived)?;
        let base_pipeline = registry
            .zone(base)?
            .pipeline
            .ok_or_else(|| ModelError::InvalidState("base zone has no pipeline attached yet".into()))?;
        let derived_pipeline = registry
            .zone(derived)?
            .pipeline
            .ok_or_else(|| ModelError::InvalidState("derived zone has no pipeline attached yet".into()))?;
        let (base_period_frames, base_sample_rate) = {
            let p = registry.pipeline(base_pipeline)?;
            (p.period_frames, p.sample_rate)
        };
        period_ratio(&registry, base_period_frames, base_sample_rate, derived_pipeline)?;
        registry.add_derived_zone(base, derived)?;
        drop(registry);
        self.base_zones.lock().remove(&derived);
        Ok(())
    }

    // ---- pipelines/pins/modules/links ------------------------------------

    pub fn create_pipeline(
        &self,
        zone: ZoneHandle,
        name: &str,
        sample_rate: u32,
        period_frames: u32,
    ) -> BarResult<PipelineHandle> {
        let mut registry = self.registry.lock();
        check_zone_not_locked(&registry, zone)?;
        if registry.zone(zone)?.pipeline.is_some() {
            return Err(BarError::Model(ModelError::AlreadyExists(
                "zone already has a pipeline attached".into(),
            )));
        }
        let handle = registry.create_pipeline(name, sample_rate, period_frames)?;
        registry.zone_mut(zone)?.pipeline = Some(handle);
        drop(registry);
        if let Some(runtime) = self.base_zones.lock().get_mut(&zone) {
            runtime.pipeline = Some(handle);
        }
        Ok(handle)
    }

    pub fn destroy_pipeline(&self, zone: ZoneHandle, pipeline: PipelineHandle) -> BarResult<()> {
        let mut registry = self.registry.lock();
        check_zone_not_locked(&registry, zone)?;
        registry.destroy_pipeline(pipeline)?;
        registry.zone_mut(zone)?.pipeline = None;
        drop(registry);
        if let Some(runtime) = self.base_zones.lock().get_mut(&zone) {
            runtime.pipeline = None;
        }
        Ok(())
    }

    pub fn create_pipeline_pin(
        &self,
        pipeline: PipelineHandle,
        name: &str,
        channel_count: u16,
        direction: PinDirection,
    ) -> BarResult<PinHandle> {
        let mut registry = self.registry.lock();
        check_pipeline_mutable(&registry, pipeline)?;
        Ok(registry.create_pin(PinOwner::Pipeline(pipeline), name, channel_count, direction)?)
    }

    pub fn create_module(
        &self,
        pipeline: PipelineHandle,
        instance_name: &str,
        type_name: &str,
        properties: Properties,
    ) -> BarResult<ModuleHandle> {
        let mut registry = self.registry.lock();
        check_pipeline_mutable(&registry, pipeline)?;
        Ok(registry.create_module(pipeline, instance_name, type_name, properties)?)
    }

    pub fn create_module_pin(
        &self,
        module: ModuleHandle,
        name: &str,
        channel_count: u16,
        direction: PinDirection,
    ) -> BarResult<PinHandle> {
        let mut registry = self.registry.lock();
        if let Some(pipeline) = pipeline_owning_module(&registry, module) {
            check_pipeline_mutable(&registry, pipeline)?;
        }
        Ok(registry.create_pin(PinOwner::Module(module), name, channel_count, direction)?)
    }

    pub fn add_mapping(&self, module: ModuleHandle, input: PinHandle, output: PinHandle) -> BarResult<()> {
        let mut registry = self.registry.lock();
        if let Some(pipeline) = pipeline_owning_module(&registry, module) {
            check_pipeline_mutable(&registry, pipeline)?;
        }
        registry.add_mapping(module, input, output)?;
        Ok(())
    }

    pub fn create_link(
        &self,
        pipeline: PipelineHandle,
        source_pin: PinHandle,
        sink_pin: PinHandle,
        link_type: LinkType,
    ) -> BarResult<LinkHandle> {
        let mut registry = self.registry.lock();
        check_pipeline_mutable(&registry, pipeline)?;
        Ok(registry.create_link(pipeline, source_pin, sink_pin, link_type)?)
    }

    pub fn destroy_link(&self, pipeline: PipelineHandle, handle: LinkHandle) -> BarResult<()> {
        let mut registry = self.registry.lock();
        check_pipeline_mutable(&registry, pipeline)?;
        registry.destroy_link(pipeline, handle)?;
        Ok(())
    }

    pub fn destroy_pin(&self, handle: PinHandle) -> BarResult<()> {
        let mut registry = self.registry.lock();
        if let Some(zone) = zone_for_pin(&registry, handle)? {
            check_zone_not_locked(&registry, zone)?;
        }
        registry.destroy_pin(handle)?;
        Ok(())
    }

    pub fn destroy_module(&self, handle: ModuleHandle) -> BarResult<()> {
        let mut registry = self.registry.lock();
        if let Some(pipeline) = pipeline_owning_module(&registry, handle) {
            check_pipeline_mutable(&registry, pipeline)?;
        }
        registry.destroy_module(handle)?;
        Ok(())
    }

    // ---- zone activation --------------------------------------------------

    /// Builds the base zone's (and every derived zone's) `PipelineEngine`,
    /// resolves `SinkDelivery`/`InputFeed` wiring from the device/zone
    /// port ring buffers allocated at creation time, and starts the
    /// worker thread. A base zone with no pipeline attached still starts:
    /// per spec.md §4.3 step 4, each tick then copies the zone's single
    /// input port straight into the sink device's ring buffer instead of
    /// running a `PipelineEngine` (see `build_passthrough_delivery`).
    pub fn start_zone(&self, zone: ZoneHandle) -> BarResult<()> {
        let registry = self.registry.lock();
        let zone_data = registry.zone(zone)?;
        if !zone_data.is_base() {
            return Err(BarError::Model(ModelError::InvalidState(
                "only a base zone can be started directly; its derived zones start with it".into(),
            )));
        }
        if zone_data.is_mutation_locked() || zone_data.is_active() {
            return Err(BarError::Model(ModelError::InvalidState(format!(
                "zone {zone} is already active"
            ))));
        }
        let sink_device = zone_data
            .sink_device
            .ok_or_else(|| ModelError::InvalidState("zone has no linked sink device".into()))?;
        let pipeline = zone_data.pipeline;
        let input_ports = zone_data.input_ports.clone();
        let derived_zones = zone_data.derived_zones.clone();
        let sink_clock = registry.device(sink_device)?.params.clock;
        let (base_period_frames, base_sample_rate) = match pipeline {
            Some(p) => {
                let pl = registry.pipeline(p)?;
                (pl.period_frames, pl.sample_rate)
            }
            None => {
                let dev = registry.device(sink_device)?;
                (dev.params.period_frames, dev.params.sample_rate)
            }
        };

        let factories = self.factories.lock().clone();
        let (base_engine, base_delivery, base_passthrough, base_inputs) = match pipeline {
            Some(p) => {
                let engine = PipelineEngine::initialize(p, &registry, &factories, self.module_event_sender())?;
                let delivery = self.build_sink_delivery(&registry, p, sink_device)?;
                let inputs = self.build_input_feeds(&registry, p, &input_ports)?;
                (Some(engine), delivery, None, inputs)
            }
            None => {
                let passthrough = self.build_passthrough_delivery(&registry, &input_ports, sink_device)?;
                (None, None, Some(passthrough), Vec::new())
            }
        };

        let mut derived_schedules = Vec::with_capacity(derived_zones.len());
        for derived_zone in &derived_zones {
            let derived_data = registry.zone(*derived_zone)?;
            let derived_pipeline = derived_data
                .pipeline
                .ok_or_else(|| ModelError::InvalidState("derived zone has no pipeline attached".into()))?;
            let derived_sink = derived_data.sink_device;
            let derived_inputs_ports = derived_data.input_ports.clone();
            let runs_per_tick = period_ratio(&registry, base_period_frames, base_sample_rate, derived_pipeline)?;
            let engine = PipelineEngine::initialize(derived_pipeline, &registry, &factories, self.module_event_sender())?;
            let delivery = match derived_sink {
                Some(dev) => self.build_sink_delivery(&registry, derived_pipeline, dev)?,
                None => None,
            };
            let inputs = self.build_input_feeds(&registry, derived_pipeline, &derived_inputs_ports)?;
            derived_schedules.push(DerivedSchedule::new(*derived_zone, engine, runs_per_tick, delivery, inputs));
        }
        drop(registry);

        let mut registry = self.registry.lock();
        if let Some(p) = pipeline {
            registry.pipeline_mut(p)?.state = PipelineBuildState::Initialized;
        }
        for derived_zone in &derived_zones {
            if let Some(p) = registry.zone(*derived_zone)?.pipeline {
                registry.pipeline_mut(p)?.state = PipelineBuildState::Initialized;
            }
        }
        // The worker tracks its own Inactive -> ActivePending -> Active
        // transition on a lock-free atomic once its thread actually runs;
        // the registry's copy only needs to reflect "started" vs "stopped"
        // for mutation-locking purposes, so it goes to Active directly.
        registry.zone_mut(zone)?.state = smartx_model::zone::ZoneState::Active;
        for derived_zone in &derived_zones {
            registry.zone_mut(*derived_zone)?.state = smartx_model::zone::ZoneState::Active;
        }
        drop(registry);

        let period = std::time::Duration::from_micros(
            (base_period_frames as u64 * 1_000_000) / base_sample_rate.max(1) as u64,
        );
        let scheduling = &self.scheduling_config;
        let rt_priority = Some(scheduling.sched_priority);

        let mut base_zones = self.base_zones.lock();
        let runtime = base_zones
            .get_mut(&zone)
            .ok_or_else(|| ModelError::NotFound(format!("base zone runtime {zone}")))?;
        let switch_matrix = runtime.switch_matrix.clone();
        runtime.worker.start(
            base_engine,
            base_delivery,
            base_passthrough,
            base_inputs,
            base_period_frames,
            sink_clock,
            switch_matrix,
            derived_schedules,
            period,
            self.scheduler.clone(),
            rt_priority,
        );
        info!(zone = %zone, "zone started");
        Ok(())
    }

    /// Delivers the sink's period-complete signal to an active base zone's
    /// worker, for `Received`/`ReceivedAsync` sinks that tick on an
    /// external signal rather than a timer (§4.3 "Clock source"). A no-op
    /// if the zone isn't running.
    pub fn signal_tick(&self, zone: ZoneHandle) -> BarResult<()> {
        let base_zones = self.base_zones.lock();
        let runtime = base_zones
            .get(&zone)
            .ok_or_else(|| ModelError::NotFound(format!("base zone runtime {zone}")))?;
        runtime.worker.signal_tick();
        Ok(())
    }

    pub fn stop_zone(&self, zone: ZoneHandle) -> BarResult<()> {
        {
            let registry = self.registry.lock();
            if !registry.zone(zone)?.is_base() {
                return Err(BarError::Model(ModelError::InvalidState(
                    "only a base zone can be stopped directly".into(),
                )));
            }
        }
        self.registry.lock().zone_mut(zone)?.state = smartx_model::zone::ZoneState::StopPending;
        {
            let mut base_zones = self.base_zones.lock();
            if let Some(runtime) = base_zones.get_mut(&zone) {
                runtime.worker.stop();
            }
        }
        let mut registry = self.registry.lock();
        let derived = registry.zone(zone)?.derived_zones.clone();
        registry.zone_mut(zone)?.state = smartx_model::zone::ZoneState::Inactive;
        for derived_zone in derived {
            if let Ok(z) = registry.zone_mut(derived_zone) {
                z.state = smartx_model::zone::ZoneState::Inactive;
            }
        }
        info!(zone = %zone, "zone stopped");
        Ok(())
    }

    fn build_sink_delivery(
        &self,
        registry: &Registry,
        pipeline: PipelineHandle,
        sink_device: DeviceHandle,
    ) -> BarResult<Option<SinkDelivery>> {
        let device = registry.device(sink_device)?;
        let Some(sink_port) = device.ports.first().copied() else {
            warn!(device = %sink_device, "sink device has no port; zone will not deliver audio");
            return Ok(None);
        };
        let port = registry.port(sink_port)?;
        let Some(output_pin) = resolve_boundary_pin(registry, pipeline, &port.name, PinDirection::PipelineOutput) else {
            warn!(device = %sink_device, "could not resolve a pipeline output pin for the sink port");
            return Ok(None);
        };
        let producer = self
            .port_rings
            .lock()
            .get_mut(&sink_port)
            .and_then(|ring| ring.producer.take());
        let Some(producer) = producer else {
            return Err(BarError::Model(ModelError::NoResources(
                "sink port's ring buffer producer is already claimed".into(),
            )));
        };
        Ok(Some(SinkDelivery {
            output_pin,
            format: device.params.format,
            producer,
        }))
    }

    fn build_input_feeds(
        &self,
        registry: &Registry,
        pipeline: PipelineHandle,
        input_ports: &[PortHandle],
    ) -> BarResult<Vec<InputFeed>> {
        let mut feeds = Vec::with_capacity(input_ports.len());
        for port_handle in input_ports {
            let port = registry.port(*port_handle)?;
            let Some(input_pin) = resolve_boundary_pin(registry, pipeline, &port.name, PinDirection::PipelineInput) else {
                warn!(port = %port_handle, "could not resolve a pipeline input pin for this zone input port");
                continue;
            };
            let consumer = self
                .port_rings
                .lock()
                .get_mut(port_handle)
                .and_then(|ring| ring.consumer.take());
            if let Some(consumer) = consumer {
                feeds.push(InputFeed { input_pin, consumer });
            }
        }
        Ok(feeds)
    }

    /// Resolves the direct zone-input-to-sink copy path used when a base
    /// zone has no pipeline attached. There's no pin graph to walk here,
    /// so a pipeline-less zone must have exactly one input port — the
    /// thing the sink's ring buffer gets fed from.
    fn build_passthrough_delivery(
        &self,
        registry: &Registry,
        input_ports: &[PortHandle],
        sink_device: DeviceHandle,
    ) -> BarResult<PassthroughDelivery> {
        let input_port = match input_ports {
            [only] => *only,
            _ => {
                return Err(BarError::Model(ModelError::InvalidState(
                    "a zone with no pipeline must have exactly one input port to pass through".into(),
                )))
            }
        };
        let consumer = self
            .port_rings
            .lock()
            .get_mut(&input_port)
            .and_then(|ring| ring.consumer.take());
        let Some(consumer) = consumer else {
            return Err(BarError::Model(ModelError::NoResources(
                "zone input port's ring buffer consumer is already claimed".into(),
            )));
        };

        let device = registry.device(sink_device)?;
        let Some(sink_port) = device.ports.first().copied() else {
            return Err(BarError::Model(ModelError::InvalidState(
                "sink device has no port to deliver to".into(),
            )));
        };
        let producer = self
            .port_rings
            .lock()
            .get_mut(&sink_port)
            .and_then(|ring| ring.producer.take());
        let Some(producer) = producer else {
            return Err(BarError::Model(ModelError::NoResources(
                "sink port's ring buffer producer is already claimed".into(),
            )));
        };

        Ok(PassthroughDelivery {
            consumer,
            producer,
            sink_format: device.params.format,
        })
    }
}

fn check_buffer_budget(params: &DeviceParams) -> BarResult<()> {
    let bytes = params.buffer_capacity_bytes();
    if bytes > MAX_DEVICE_BUFFER_BYTES {
        return Err(BarError::Model(ModelError::NoResources(format!(
            "device buffer of {bytes} bytes exceeds the per-device cap of {MAX_DEVICE_BUFFER_BYTES} bytes"
        ))));
    }
    Ok(())
}

/// Computes `k` in `base.period_frames * derived.sample_rate ==
/// derived.period_frames * base.sample_rate * k`, failing with
/// `InvalidParameter` unless `k` is a positive integer. Takes the base
/// side as raw numbers rather than a `PipelineHandle`: a base zone in
/// no-pipeline passthrough mode has no pipeline to look them up from, so
/// its period/rate come from its sink device instead (see `start_zone`).
fn period_ratio(
    registry: &Registry,
    base_period_frames: u32,
    base_sample_rate: u32,
    derived_pipeline: PipelineHandle,
) -> BarResult<u32> {
    let derived = registry.pipeline(derived_pipeline)?;
    let lhs = base_period_frames as u64 * derived.sample_rate as u64;
    let rhs_unit = derived.period_frames as u64 * base_sample_rate as u64;
    if rhs_unit == 0 || lhs % rhs_unit != 0 {
        return Err(BarError::Model(ModelError::InvalidParameter(
            "derived zone period/rate is not an integer multiple of the base zone's".into(),
        )));
    }
    let k = lhs / rhs_unit;
    if k < 1 {
        return Err(BarError::Model(ModelError::InvalidParameter(
            "derived zone must run at least once per base tick".into(),
        )));
    }
    Ok(k as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use smartx_model::clock::{ClockType, DataFormat};

    fn params(sample_rate: u32, period_frames: u32, channels: u16) -> DeviceParams {
        DeviceParams {
            sample_rate,
            period_frames,
            num_periods: 4,
            format: DataFormat::Float32,
            channels,
            clock: ClockType::Provided,
        }
    }

    #[test]
    fn test_create_destroy_device_roundtrip() {
        let bar = SmartXbar::with_config(crate::config::SchedulingConfig::default());
        let handle = bar.create_sink_device("spk", params(48_000, 256, 2)).unwrap();
        bar.destroy_device(handle).unwrap();
    }

    #[test]
    fn test_oversized_device_buffer_rejected() {
        let bar = SmartXbar::with_config(crate::config::SchedulingConfig::default());
        let huge = params(48_000, 1_000_000, 64);
        let err = bar.create_sink_device("huge", huge).unwrap_err();
        assert!(matches!(err, BarError::Model(ModelError::NoResources(_))));
    }

    #[test]
    fn test_pipeline_attach_requires_unlocked_zone() {
        let bar = SmartXbar::with_config(crate::config::SchedulingConfig::default());
        let zone = bar.create_zone("z").unwrap();
        let pipeline = bar.create_pipeline(zone, "p", 48_000, 256).unwrap();
        let err = bar.create_pipeline(zone, "p2", 48_000, 256).unwrap_err();
        assert!(matches!(err, BarError::Model(ModelError::AlreadyExists(_))));
        bar.destroy_pipeline(zone, pipeline).unwrap();
    }

    #[test]
    fn test_add_zone_input_port_requires_pipeline_or_sink_device() {
        let bar = SmartXbar::with_config(crate::config::SchedulingConfig::default());
        let zone = bar.create_zone("z").unwrap();
        let err = bar.add_zone_input_port(zone, "in", 1, 2).unwrap_err();
        assert!(matches!(err, BarError::Model(ModelError::InvalidState(_))));
    }

    #[test]
    fn test_start_zone_with_no_pipeline_passes_through() {
        let bar = SmartXbar::with_config(crate::config::SchedulingConfig::default());
        let src = bar.create_source_device("mic", params(48_000, 32, 1)).unwrap();
        bar.create_device_port(src, "mic:0", 1, 1, 0).unwrap();

        let sink = bar.create_sink_device("spk", params(48_000, 32, 1)).unwrap();
        let zone = bar.create_zone("z").unwrap();
        bar.link_sink_to_zone(zone, sink).unwrap();
        bar.add_zone_input_port(zone, "in", 2, 1).unwrap();
        bar.connect(1, 2).unwrap();

        bar.start_zone(zone).unwrap();
        assert!(bar.registry.lock().zone(zone).unwrap().is_active());
        bar.stop_zone(zone).unwrap();
    }

    #[test]
    fn test_period_ratio_rejects_non_integer_k() {
        let bar = SmartXbar::with_config(crate::config::SchedulingConfig::default());
        let base = bar.create_zone("base").unwrap();
        let derived = bar.create_zone("derived").unwrap();
        bar.create_pipeline(base, "bp", 48_000, 200).unwrap();
        bar.create_pipeline(derived, "dp", 48_000, 300).unwrap();
        let err = bar.add_derived_zone(base, derived).unwrap_err();
        assert!(matches!(err, BarError::Model(ModelError::InvalidParameter(_))));
    }

    #[test]
    fn test_destroy_source_with_active_connections_emits_source_removed() {
        use crate::event_bus::PollOutcome;
        use smartx_model::event::ModelEvent;

        let bar = SmartXbar::with_config(crate::config::SchedulingConfig::default());
        let src = bar.create_source_device("mic", params(48_000, 32, 1)).unwrap();
        bar.create_device_port(src, "mic:0", 1, 1, 0).unwrap();

        let zone1 = bar.create_zone("z1").unwrap();
        bar.create_pipeline(zone1, "p1", 48_000, 32).unwrap();
        bar.add_zone_input_port(zone1, "in", 1, 1).unwrap();

        let zone2 = bar.create_zone("z2").unwrap();
        bar.create_pipeline(zone2, "p2", 48_000, 32).unwrap();
        bar.add_zone_input_port(zone2, "in", 2, 1).unwrap();

        bar.connect(1, 1).unwrap();
        bar.connect(1, 2).unwrap();
        // Drain the two ConnectionEstablished events from setup so only
        // the destroy-time events remain.
        let _ = bar.event_bus.get_next_event();
        let _ = bar.event_bus.get_next_event();

        bar.destroy_device(src).unwrap();
        assert!(bar.get_active_connections().unwrap().is_empty());

        let mut seen = Vec::new();
        while let PollOutcome::Event(event) = bar.event_bus.get_next_event() {
            seen.push(event);
        }
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().any(|e| matches!(
            e,
            ModelEvent::SourceRemoved { source_port: 1, sink_port: 1 }
        )));
        assert!(seen.iter().any(|e| matches!(
            e,
            ModelEvent::SourceRemoved { source_port: 1, sink_port: 2 }
        )));
    }

    #[test]
    fn test_period_ratio_accepts_integer_k() {
        let bar = SmartXbar::with_config(crate::config::SchedulingConfig::default());
        let base = bar.create_zone("base").unwrap();
        let derived = bar.create_zone("derived").unwrap();
        bar.create_pipeline(base, "bp", 48_000, 192).unwrap();
        bar.create_pipeline(derived, "dp", 48_000, 96).unwrap();
        bar.add_derived_zone(base, derived).unwrap();
    }
}
