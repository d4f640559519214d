//! The configuration registry: the single arena that owns every topology
//! object. Everything outside this module refers to objects by handle;
//! the registry is where handles get resolved back into data.
//!
//! Mutating calls validate the invariants the setup facade relies on
//! (unique names, unique positive port ids, channel ranges that fit
//! within their owner, pin role compatibility for links) so that a
//! successful `create_*`/`connect` call is one the runtime can trust
//! without re-checking.

use std::collections::HashMap;

use tracing::debug;

use crate::device::AudioDevice;
use crate::error::{ModelError, ModelResult};
use crate::handle::{DeviceHandle, LinkHandle, ModuleHandle, PinHandle, PipelineHandle, PortHandle, ZoneHandle};
use crate::link::Link;
use crate::module::ProcessingModule;
use crate::pin::AudioPin;
use crate::pipeline::{Pipeline, PipelineBuildState};
use crate::port::{AudioPort, PortDirection, PortOwner};
use crate::zone::{RoutingZone, ZoneState};

#[derive(Debug, Default)]
pub struct Registry {
    next_handle: u64,

    devices: HashMap<DeviceHandle, AudioDevice>,
    device_by_name: HashMap<String, DeviceHandle>,

    ports: HashMap<PortHandle, AudioPort>,
    port_by_positive_id: HashMap<(PortDirection, i32), PortHandle>,
    port_by_name: HashMap<String, PortHandle>,

    zones: HashMap<ZoneHandle, RoutingZone>,
    zone_by_name: HashMap<String, ZoneHandle>,

    pipelines: HashMap<PipelineHandle, Pipeline>,
    pipeline_by_name: HashMap<String, PipelineHandle>,

    pins: HashMap<PinHandle, AudioPin>,

    modules: HashMap<ModuleHandle, ProcessingModule>,
    module_by_name: HashMap<String, ModuleHandle>,

    links: HashMap<LinkHandle, Link>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn alloc(&mut self) -> u64 {
        let h = self.next_handle;
        self.next_handle += 1;
        h
    }

    // ---- devices ----------------------------------------------------

    pub fn create_device(
        &mut self,
        name: impl Into<String>,
        direction: crate::device::DeviceDirection,
        params: crate::device::DeviceParams,
    ) -> ModelResult<DeviceHandle> {
        let name = name.into();
        if self.device_by_name.contains_key(&name) {
            return Err(ModelError::AlreadyExists(format!("device '{name}'")));
        }
        let handle = DeviceHandle(self.alloc());
        let device = AudioDevice {
            handle,
            name: name.clone(),
            direction,
            params,
            ports: Vec::new(),
            linked_zone: None,
        };
        self.devices.insert(handle, device);
        self.device_by_name.insert(name, handle);
        debug!(?handle, "device created");
        Ok(handle)
    }

    pub fn destroy_device(&mut self, handle: DeviceHandle) -> ModelResult<()> {
        let device = self
            .devices
            .remove(&handle)
            .ok_or_else(|| ModelError::NotFound(handle.to_string()))?;
        if device.linked_zone.is_some() {
            // Put it back; can't destroy a sink still owned by a zone.
            self.devices.insert(handle, device);
            return Err(ModelError::InvalidState(
                "device is still linked to a routing zone".into(),
            ));
        }
        for port in &device.ports {
            self.ports.remove(port);
        }
        self.device_by_name.remove(&device.name);
        Ok(())
    }

    pub fn device(&self, handle: DeviceHandle) -> ModelResult<&AudioDevice> {
        self.devices
            .get(&handle)
            .ok_or_else(|| ModelError::NotFound(handle.to_string()))
    }

    pub fn device_mut(&mut self, handle: DeviceHandle) -> ModelResult<&mut AudioDevice> {
        self.devices
            .get_mut(&handle)
            .ok_or_else(|| ModelError::NotFound(handle.to_string()))
    }

    pub fn find_device_by_name(&self, name: &str) -> Option<DeviceHandle> {
        self.device_by_name.get(name).copied()
    }

    pub fn devices(&self) -> impl Iterator<Item = &AudioDevice> {
        self.devices.values()
    }

    // ---- ports --------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub fn create_port(
        &mut self,
        owner: PortOwner,
        name: impl Into<String>,
        id: i32,
        channel_count: u16,
        direction: PortDirection,
        base_index: u16,
    ) -> ModelResult<PortHandle> {
        let name = name.into();
        let owner_channels = match owner {
            PortOwner::Device(d) => self.device(d)?.params.channels,
            PortOwner::Zone(_) => u16::MAX, // zone input ports aren't bounded by a device here
        };
        if base_index as u32 + channel_count as u32 > owner_channels as u32 {
            return Err(ModelError::InvalidParameter(format!(
                "port '{name}' channel range [{base_index}, {}) exceeds owner capacity {owner_channels}",
                base_index as u32 + channel_count as u32
            )));
        }
        if id > 0 && self.port_by_positive_id.contains_key(&(direction, id)) {
            return Err(ModelError::AlreadyExists(format!(
                "port id {id} already in use for direction {direction:?}"
            )));
        }
        let handle = PortHandle(self.alloc());
        let port = AudioPort {
            handle,
            name,
            id,
            channel_count,
            direction,
            base_index,
            owner,
        };
        if id > 0 {
            self.port_by_positive_id.insert((direction, id), handle);
        }
        self.port_by_name.insert(port.name.clone(), handle);
        self.ports.insert(handle, port);
        match owner {
            PortOwner::Device(d) => self.device_mut(d)?.ports.push(handle),
            PortOwner::Zone(z) => self.zone_mut(z)?.input_ports.push(handle),
        }
        Ok(handle)
    }

    pub fn destroy_port(&mut self, handle: PortHandle) -> ModelResult<()> {
        let port = self
            .ports
            .remove(&handle)
            .ok_or_else(|| ModelError::NotFound(handle.to_string()))?;
        if port.id > 0 {
            self.port_by_positive_id.remove(&(port.direction, port.id));
        }
        self.port_by_name.remove(&port.name);
        match port.owner {
            PortOwner::Device(d) => {
                if let Ok(dev) = self.device_mut(d) {
                    dev.ports.retain(|p| *p != handle);
                }
            }
            PortOwner::Zone(z) => {
                if let Ok(zone) = self.zone_mut(z) {
                    zone.input_ports.retain(|p| *p != handle);
                }
            }
        }
        Ok(())
    }

    pub fn port(&self, handle: PortHandle) -> ModelResult<&AudioPort> {
        self.ports
            .get(&handle)
            .ok_or_else(|| ModelError::NotFound(handle.to_string()))
    }

    pub fn find_port_by_id(&self, direction: PortDirection, id: i32) -> Option<PortHandle> {
        self.port_by_positive_id.get(&(direction, id)).copied()
    }

    pub fn find_port_by_name(&self, name: &str) -> Option<PortHandle> {
        self.port_by_name.get(name).copied()
    }

    pub fn ports(&self) -> impl Iterator<Item = &AudioPort> {
        self.ports.values()
    }

    // ---- zones ----------------------------------------------------------

    pub fn create_zone(&mut self, name: impl Into<String>) -> ModelResult<ZoneHandle> {
        let name = name.into();
        if self.zone_by_name.contains_key(&name) {
            return Err(ModelError::AlreadyExists(format!("zone '{name}'")));
        }
        let handle = ZoneHandle(self.alloc());
        let zone = RoutingZone {
            handle,
            name: name.clone(),
            sink_device: None,
            input_ports: Vec::new(),
            pipeline: None,
            derived_zones: Vec::new(),
            base_zone: None,
            state: ZoneState::Inactive,
        };
        self.zones.insert(handle, zone);
        self.zone_by_name.insert(name, handle);
        Ok(handle)
    }

    pub fn destroy_zone(&mut self, handle: ZoneHandle) -> ModelResult<()> {
        let zone = self.zone(handle)?;
        if zone.is_mutation_locked() {
            return Err(ModelError::InvalidState("zone is active".into()));
        }
        if !zone.derived_zones.is_empty() {
            return Err(ModelError::InvalidState(
                "zone still has derived zones".into(),
            ));
        }
        let zone = self.zones.remove(&handle).expect("checked above");
        self.zone_by_name.remove(&zone.name);
        if let Some(base) = zone.base_zone {
            if let Ok(b) = self.zone_mut(base) {
                b.derived_zones.retain(|z| *z != handle);
            }
        }
        Ok(())
    }

    pub fn zone(&self, handle: ZoneHandle) -> ModelResult<&RoutingZone> {
        self.zones
            .get(&handle)
            .ok_or_else(|| ModelError::NotFound(handle.to_string()))
    }

    pub fn zone_mut(&mut self, handle: ZoneHandle) -> ModelResult<&mut RoutingZone> {
        self.zones
            .get_mut(&handle)
            .ok_or_else(|| ModelError::NotFound(handle.to_string()))
    }

    pub fn find_zone_by_name(&self, name: &str) -> Option<ZoneHandle> {
        self.zone_by_name.get(name).copied()
    }

    pub fn zones(&self) -> impl Iterator<Item = &RoutingZone> {
        self.zones.values()
    }

    /// Registers `derived` as a derived zone of base zone `base`. Period
    /// compatibility (derived period is a rational multiple of the base
    /// period) is checked once both zones have pipelines attached, by the
    /// setup facade, since this registry does not know about sample rates
    /// until a pipeline is assigned.
    pub fn add_derived_zone(&mut self, base: ZoneHandle, derived: ZoneHandle) -> ModelResult<()> {
        if base == derived {
            return Err(ModelError::InvalidParameter(
                "a zone cannot derive from itself".into(),
            ));
        }
        if !self.zone(base)?.is_base() {
            return Err(ModelError::InvalidParameter(
                "base zone of a derived zone must itself be a base zone".into(),
            ));
        }
        if self.zone(derived)?.base_zone.is_some() {
            return Err(ModelError::InvalidState(
                "zone is already derived from another zone".into(),
            ));
        }
        self.zone_mut(derived)?.base_zone = Some(base);
        self.zone_mut(base)?.derived_zones.push(derived);
        Ok(())
    }

    // ---- pipelines --------------------------------------------------------

    pub fn create_pipeline(
        &mut self,
        name: impl Into<String>,
        sample_rate: u32,
        period_frames: u32,
    ) -> ModelResult<PipelineHandle> {
        let name = name.into();
        if self.pipeline_by_name.contains_key(&name) {
            return Err(ModelError::AlreadyExists(format!("pipeline '{name}'")));
        }
        let handle = PipelineHandle(self.alloc());
        let pipeline = Pipeline {
            handle,
            name: name.clone(),
            sample_rate,
            period_frames,
            pins: Vec::new(),
            modules: Vec::new(),
            links: Vec::new(),
            state: PipelineBuildState::Building,
        };
        self.pipelines.insert(handle, pipeline);
        self.pipeline_by_name.insert(name, handle);
        Ok(handle)
    }

    pub fn destroy_pipeline(&mut self, handle: PipelineHandle) -> ModelResult<()> {
        let pipeline = self
            .pipelines
            .remove(&handle)
            .ok_or_else(|| ModelError::NotFound(handle.to_string()))?;
        for pin in &pipeline.pins {
            self.pins.remove(pin);
        }
        for module in &pipeline.modules {
            if let Some(m) = self.modules.remove(module) {
                self.module_by_name.remove(&m.instance_name);
            }
        }
        for link in &pipeline.links {
            self.links.remove(link);
        }
        self.pipeline_by_name.remove(&pipeline.name);
        Ok(())
    }

    pub fn pipeline(&self, handle: PipelineHandle) -> ModelResult<&Pipeline> {
        self.pipelines
            .get(&handle)
            .ok_or_else(|| ModelError::NotFound(handle.to_string()))
    }

    pub fn pipeline_mut(&mut self, handle: PipelineHandle) -> ModelResult<&mut Pipeline> {
        self.pipelines
            .get_mut(&handle)
            .ok_or_else(|| ModelError::NotFound(handle.to_string()))
    }

    pub fn find_pipeline_by_name(&self, name: &str) -> Option<PipelineHandle> {
        self.pipeline_by_name.get(name).copied()
    }

    pub fn pipelines(&self) -> impl Iterator<Item = &Pipeline> {
        self.pipelines.values()
    }

    // ---- pins -----------------------------------------------------------

    pub fn create_pin(
        &mut self,
        owner: crate::pin::PinOwner,
        name: impl Into<String>,
        channel_count: u16,
        direction: crate::pin::PinDirection,
    ) -> ModelResult<PinHandle> {
        let handle = PinHandle(self.alloc());
        let pin = AudioPin {
            handle,
            name: name.into(),
            channel_count,
            direction,
            owner,
        };
        self.pins.insert(handle, pin);
        match owner {
            crate::pin::PinOwner::Pipeline(p) => self.pipeline_mut(p)?.pins.push(handle),
            crate::pin::PinOwner::Module(m) => self.module_mut(m)?.pins.push(handle),
        }
        Ok(handle)
    }

    pub fn destroy_pin(&mut self, handle: PinHandle) -> ModelResult<()> {
        let pin = self
            .pins
            .remove(&handle)
            .ok_or_else(|| ModelError::NotFound(handle.to_string()))?;
        match pin.owner {
            crate::pin::PinOwner::Pipeline(p) => {
                if let Ok(pipeline) = self.pipeline_mut(p) {
                    pipeline.pins.retain(|h| *h != handle);
                }
            }
            crate::pin::PinOwner::Module(m) => {
                if let Ok(module) = self.module_mut(m) {
                    module.pins.retain(|h| *h != handle);
                }
            }
        }
        Ok(())
    }

    pub fn pin(&self, handle: PinHandle) -> ModelResult<&AudioPin> {
        self.pins
            .get(&handle)
            .ok_or_else(|| ModelError::NotFound(handle.to_string()))
    }

    // ---- modules ----------------------------------------------------------

    pub fn create_module(
        &mut self,
        pipeline: PipelineHandle,
        instance_name: impl Into<String>,
        type_name: impl Into<String>,
        properties: crate::properties::Properties,
    ) -> ModelResult<ModuleHandle> {
        let instance_name = instance_name.into();
        if self.module_by_name.contains_key(&instance_name) {
            return Err(ModelError::AlreadyExists(format!(
                "module instance '{instance_name}'"
            )));
        }
        let handle = ModuleHandle(self.alloc());
        let module = ProcessingModule {
            handle,
            instance_name: instance_name.clone(),
            type_name: type_name.into(),
            pins: Vec::new(),
            mappings: Vec::new(),
            properties,
        };
        self.modules.insert(handle, module);
        self.module_by_name.insert(instance_name, handle);
        self.pipeline_mut(pipeline)?.modules.push(handle);
        Ok(handle)
    }

    pub fn destroy_module(&mut self, handle: ModuleHandle) -> ModelResult<()> {
        let module = self
            .modules
            .remove(&handle)
            .ok_or_else(|| ModelError::NotFound(handle.to_string()))?;
        for pin in &module.pins {
            self.pins.remove(pin);
        }
        self.module_by_name.remove(&module.instance_name);
        Ok(())
    }

    pub fn module(&self, handle: ModuleHandle) -> ModelResult<&ProcessingModule> {
        self.modules
            .get(&handle)
            .ok_or_else(|| ModelError::NotFound(handle.to_string()))
    }

    pub fn module_mut(&mut self, handle: ModuleHandle) -> ModelResult<&mut ProcessingModule> {
        self.modules
            .get_mut(&handle)
            .ok_or_else(|| ModelError::NotFound(handle.to_string()))
    }

    pub fn find_module_by_name(&self, name: &str) -> Option<ModuleHandle> {
        self.module_by_name.get(name).copied()
    }

    pub fn add_mapping(
        &mut self,
        module: ModuleHandle,
        input: PinHandle,
        output: PinHandle,
    ) -> ModelResult<()> {
        let input_pin = self.pin(input)?;
        let output_pin = self.pin(output)?;
        if input_pin.direction != crate::pin::PinDirection::ModuleInput {
            return Err(ModelError::InvalidParameter(
                "mapping input must be a ModuleInput pin".into(),
            ));
        }
        if output_pin.direction != crate::pin::PinDirection::ModuleOutput {
            return Err(ModelError::InvalidParameter(
                "mapping output must be a ModuleOutput pin".into(),
            ));
        }
        self.module_mut(module)?.mappings.push((input, output));
        Ok(())
    }

    // ---- links --------------------------------------------------------

    pub fn create_link(
        &mut self,
        pipeline: PipelineHandle,
        source_pin: PinHandle,
        sink_pin: PinHandle,
        link_type: crate::link::LinkType,
    ) -> ModelResult<LinkHandle> {
        {
            let src = self.pin(source_pin)?;
            if !src.can_be_link_source() {
                return Err(ModelError::InvalidParameter(format!(
                    "pin '{}' cannot act as a link source",
                    src.name
                )));
            }
            let sink = self.pin(sink_pin)?;
            if !sink.can_be_link_sink() {
                return Err(ModelError::InvalidParameter(format!(
                    "pin '{}' cannot act as a link sink",
                    sink.name
                )));
            }
            if src.channel_count != sink.channel_count {
                return Err(ModelError::InvalidParameter(
                    "link source/sink channel counts differ".into(),
                ));
            }
        }
        let sink_already_linked = self
            .pipeline(pipeline)?
            .links
            .iter()
            .filter_map(|h| self.links.get(h))
            .any(|l| l.sink_pin == sink_pin);
        if sink_already_linked {
            return Err(ModelError::AlreadyExists(
                "sink pin already has an incoming link".into(),
            ));
        }
        let source_already_linked = self
            .pipeline(pipeline)?
            .links
            .iter()
            .filter_map(|h| self.links.get(h))
            .any(|l| l.source_pin == source_pin);
        if source_already_linked {
            return Err(ModelError::AlreadyExists(
                "source pin already has an outgoing link".into(),
            ));
        }
        let handle = LinkHandle(self.alloc());
        let link = Link {
            handle,
            source_pin,
            sink_pin,
            link_type,
        };
        self.links.insert(handle, link);
        self.pipeline_mut(pipeline)?.links.push(handle);
        Ok(handle)
    }

    pub fn destroy_link(&mut self, pipeline: PipelineHandle, handle: LinkHandle) -> ModelResult<()> {
        self.links
            .remove(&handle)
            .ok_or_else(|| ModelError::NotFound(handle.to_string()))?;
        self.pipeline_mut(pipeline)?.links.retain(|h| *h != handle);
        Ok(())
    }

    pub fn link(&self, handle: LinkHandle) -> ModelResult<&Link> {
        self.links
            .get(&handle)
            .ok_or_else(|| ModelError::NotFound(handle.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ClockType, DataFormat};
    use crate::device::{DeviceDirection, DeviceParams};
    use crate::link::LinkType;
    use crate::pin::PinDirection;

    fn params() -> DeviceParams {
        DeviceParams {
            sample_rate: 48_000,
            period_frames: 256,
            num_periods: 4,
            format: DataFormat::Float32,
            channels: 2,
            clock: ClockType::Provided,
        }
    }

    #[test]
    fn test_duplicate_device_name_rejected() {
        let mut reg = Registry::new();
        reg.create_device("spk", DeviceDirection::Sink, params())
            .unwrap();
        let err = reg
            .create_device("spk", DeviceDirection::Sink, params())
            .unwrap_err();
        assert!(matches!(err, ModelError::AlreadyExists(_)));
    }

    #[test]
    fn test_port_channel_range_validated() {
        let mut reg = Registry::new();
        let dev = reg
            .create_device("spk", DeviceDirection::Sink, params())
            .unwrap();
        let err = reg
            .create_port(
                PortOwner::Device(dev),
                "bad",
                -1,
                4,
                PortDirection::Input,
                0,
            )
            .unwrap_err();
        assert!(matches!(err, ModelError::InvalidParameter(_)));
    }

    #[test]
    fn test_duplicate_positive_port_id_rejected() {
        let mut reg = Registry::new();
        let dev = reg
            .create_device("spk", DeviceDirection::Sink, params())
            .unwrap();
        reg.create_port(PortOwner::Device(dev), "p1", 7, 2, PortDirection::Input, 0)
            .unwrap();
        let err = reg
            .create_port(PortOwner::Device(dev), "p2", 7, 2, PortDirection::Input, 0)
            .unwrap_err();
        assert!(matches!(err, ModelError::AlreadyExists(_)));
    }

    #[test]
    fn test_derived_zone_requires_base() {
        let mut reg = Registry::new();
        let a = reg.create_zone("a").unwrap();
        let b = reg.create_zone("b").unwrap();
        let c = reg.create_zone("c").unwrap();
        reg.add_derived_zone(a, b).unwrap();
        let err = reg.add_derived_zone(b, c).unwrap_err();
        assert!(matches!(err, ModelError::InvalidParameter(_)));
    }

    #[test]
    fn test_link_requires_compatible_pin_roles() {
        let mut reg = Registry::new();
        let pipeline = reg.create_pipeline("p", 48_000, 256).unwrap();
        let a = reg
            .create_pin(
                crate::pin::PinOwner::Pipeline(pipeline),
                "in",
                2,
                PinDirection::PipelineInput,
            )
            .unwrap();
        let b = reg
            .create_pin(
                crate::pin::PinOwner::Pipeline(pipeline),
                "in2",
                2,
                PinDirection::PipelineInput,
            )
            .unwrap();
        let err = reg
            .create_link(pipeline, a, b, LinkType::Immediate)
            .unwrap_err();
        assert!(matches!(err, ModelError::InvalidParameter(_)));
    }

    #[test]
    fn test_sink_pin_accepts_only_one_link() {
        let mut reg = Registry::new();
        let pipeline = reg.create_pipeline("p", 48_000, 256).unwrap();
        let src1 = reg
            .create_pin(
                crate::pin::PinOwner::Pipeline(pipeline),
                "in1",
                2,
                PinDirection::PipelineInput,
            )
            .unwrap();
        let src2 = reg
            .create_pin(
                crate::pin::PinOwner::Pipeline(pipeline),
                "in2",
                2,
                PinDirection::PipelineInput,
            )
            .unwrap();
        let sink = reg
            .create_pin(
                crate::pin::PinOwner::Pipeline(pipeline),
                "out",
                2,
                PinDirection::PipelineOutput,
            )
            .unwrap();
        reg.create_link(pipeline, src1, sink, LinkType::Immediate)
            .unwrap();
        let err = reg
            .create_link(pipeline, src2, sink, LinkType::Immediate)
            .unwrap_err();
        assert!(matches!(err, ModelError::AlreadyExists(_)));
    }

    #[test]
    fn test_source_pin_accepts_only_one_link() {
        let mut reg = Registry::new();
        let pipeline = reg.create_pipeline("p", 48_000, 256).unwrap();
        let source = reg
            .create_pin(
                crate::pin::PinOwner::Pipeline(pipeline),
                "in",
                2,
                PinDirection::PipelineInput,
            )
            .unwrap();
        let sink1 = reg
            .create_pin(
                crate::pin::PinOwner::Pipeline(pipeline),
                "out1",
                2,
                PinDirection::PipelineOutput,
            )
            .unwrap();
        let sink2 = reg
            .create_pin(
                crate::pin::PinOwner::Pipeline(pipeline),
                "out2",
                2,
                PinDirection::PipelineOutput,
            )
            .unwrap();
        reg.create_link(pipeline, source, sink1, LinkType::Immediate)
            .unwrap();
        let err = reg
            .create_link(pipeline, source, sink2, LinkType::Immediate)
            .unwrap_err();
        assert!(matches!(err, ModelError::AlreadyExists(_)));
    }
}
