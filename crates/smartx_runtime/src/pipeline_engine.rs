//! The pipeline engine: compiles a pipeline's pin/module/link topology
//! into a processing order and a set of shared audio streams, then runs
//! one period at a time.
//!
//! Two build-time decisions carry the pipeline's semantics:
//!
//! - An immediate link doesn't copy data between its source and sink
//!   pin each period — it unions them onto the *same* [`AudioStream`],
//!   so the sink module simply reads what the source module already
//!   wrote this tick. Processing order is computed from these links so
//!   that, by the time a module runs, everything upstream of it already
//!   has this period's data.
//! - A delayed link keeps its sink pin on its own distinct stream (a
//!   staging buffer) and doesn't constrain processing order at all; once
//!   every module has run for the period, the engine copies the source
//!   pin's now-finished value into the staging buffer so the *next*
//!   period's consumers see it. This is how a pipeline can contain a
//!   cycle without a processing-order deadlock.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use smartx_model::handle::{ModuleHandle, PinHandle, PipelineHandle};
use smartx_model::link::LinkType;
use smartx_model::pin::{PinDirection, PinOwner};
use smartx_model::registry::Registry;

use smartx_dsp::module::{AudioStream, ModuleBinding, ModuleConfig, ModuleCore, ModuleEventEmitter, ModuleEventPayload, ModuleFactory};

use crate::error::{RuntimeError, RuntimeResult};

struct UnionFind {
    parent: HashMap<PinHandle, PinHandle>,
}

impl UnionFind {
    fn new() -> Self {
        Self {
            parent: HashMap::new(),
        }
    }

    fn find(&mut self, x: PinHandle) -> PinHandle {
        let p = *self.parent.entry(x).or_insert(x);
        if p == x {
            x
        } else {
            let root = self.find(p);
            self.parent.insert(x, root);
            root
        }
    }

    fn union(&mut self, a: PinHandle, b: PinHandle) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            self.parent.insert(ra, rb);
        }
    }
}

pub struct PipelineEngine {
    #[allow(dead_code)]
    pipeline: PipelineHandle,
    modules: Vec<(ModuleHandle, Box<dyn ModuleCore>)>,
    /// (source stream, staging/sink stream) pairs copied after every
    /// period so delayed links see last tick's value next tick.
    delayed: Vec<(AudioStream, AudioStream)>,
    input_streams: HashMap<PinHandle, AudioStream>,
    output_streams: HashMap<PinHandle, AudioStream>,
    period_frames: u32,
    pipeline_name: String,
    /// `period_frames / sample_rate`: `process()` raises a `ModuleEvent`
    /// through `event_sender` when a period's modules take longer than
    /// this to run, mirroring the original's per-period overrun tracking.
    period_budget: Duration,
    event_sender: Sender<ModuleEventPayload>,
}

impl PipelineEngine {
    pub fn initialize(
        pipeline_handle: PipelineHandle,
        registry: &Registry,
        factories: &HashMap<String, Arc<dyn ModuleFactory>>,
        event_sender: Sender<ModuleEventPayload>,
    ) -> RuntimeResult<Self> {
        let pipeline = registry.pipeline(pipeline_handle)?;
        let period_frames = pipeline.period_frames;
        let pipeline_name = pipeline.name.clone();
        let period_budget = Duration::from_secs_f64(period_frames as f64 / pipeline.sample_rate.max(1) as f64);

        let mut uf = UnionFind::new();
        let mut delayed_edges = Vec::new();
        for link_handle in &pipeline.links {
            let link = registry.link(*link_handle)?;
            match link.link_type {
                LinkType::Immediate => uf.union(link.source_pin, link.sink_pin),
                LinkType::Delayed => delayed_edges.push((link.source_pin, link.sink_pin)),
            }
        }

        // Build step 1 (§4.4): every pipeline boundary pin must carry
        // exactly one immediate link in the role its direction requires.
        // `Registry::create_link` already enforces at most one link per
        // pin in either role, so this only needs to catch the zero case
        // (an unlinked boundary pin) and the wrong-link-type case (a
        // boundary pin's only link is Delayed).
        let mut outgoing_immediate: HashMap<PinHandle, u32> = HashMap::new();
        let mut incoming_immediate: HashMap<PinHandle, u32> = HashMap::new();
        for link_handle in &pipeline.links {
            let link = registry.link(*link_handle)?;
            if link.link_type == LinkType::Immediate {
                *outgoing_immediate.entry(link.source_pin).or_insert(0) += 1;
                *incoming_immediate.entry(link.sink_pin).or_insert(0) += 1;
            }
        }
        for pin_handle in &pipeline.pins {
            let pin = registry.pin(*pin_handle)?;
            match pin.direction {
                PinDirection::PipelineInput => {
                    let count = outgoing_immediate.get(pin_handle).copied().unwrap_or(0);
                    if count != 1 {
                        return Err(RuntimeError::IllFormedPipeline(format!(
                            "pipeline input pin '{}' must have exactly one outgoing immediate link, has {count}",
                            pin.name
                        )));
                    }
                }
                PinDirection::PipelineOutput => {
                    let count = incoming_immediate.get(pin_handle).copied().unwrap_or(0);
                    if count != 1 {
                        return Err(RuntimeError::IllFormedPipeline(format!(
                            "pipeline output pin '{}' must have exactly one incoming immediate link, has {count}",
                            pin.name
                        )));
                    }
                }
                _ => {}
            }
        }

        // One fresh stream per union-find group, created lazily as pins
        // are visited so every pin in a group shares the same Arc.
        let mut stream_map: HashMap<PinHandle, AudioStream> = HashMap::new();
        let mut group_streams: HashMap<PinHandle, AudioStream> = HashMap::new();
        for pin_handle in &pipeline.pins {
            let root = uf.find(*pin_handle);
            let pin = registry.pin(*pin_handle)?;
            let stream = group_streams
                .entry(root)
                .or_insert_with(|| AudioStream::new(pin.channel_count, period_frames))
                .clone();
            stream_map.insert(*pin_handle, stream);
        }

        // Module-level dependency edges: a link from a module's output
        // pin to another module's input pin orders the producer before
        // the consumer. Pipeline-boundary pins don't participate.
        let mut in_degree: HashMap<ModuleHandle, usize> = HashMap::new();
        let mut adjacency: HashMap<ModuleHandle, Vec<ModuleHandle>> = HashMap::new();
        for module_handle in &pipeline.modules {
            in_degree.entry(*module_handle).or_insert(0);
            adjacency.entry(*module_handle).or_default();
        }
        for link_handle in &pipeline.links {
            let link = registry.link(*link_handle)?;
            if link.link_type != LinkType::Immediate {
                continue;
            }
            let source_pin = registry.pin(link.source_pin)?;
            let sink_pin = registry.pin(link.sink_pin)?;
            if let (PinOwner::Module(from), PinOwner::Module(to)) = (source_pin.owner, sink_pin.owner) {
                if from != to {
                    adjacency.entry(from).or_default().push(to);
                    *in_degree.entry(to).or_insert(0) += 1;
                }
            }
        }

        let mut processing_order = Vec::new();
        let mut remaining_in_degree = in_degree.clone();
        let mut visited: HashSet<ModuleHandle> = HashSet::new();
        // Deterministic order: sort the initial ready set by handle.
        let mut initial_ready: Vec<ModuleHandle> = in_degree
            .iter()
            .filter(|(_, deg)| **deg == 0)
            .map(|(m, _)| *m)
            .collect();
        initial_ready.sort_by_key(|h| h.raw());
        let mut ready: VecDeque<ModuleHandle> = initial_ready.into();

        while let Some(module) = ready.pop_front() {
            if !visited.insert(module) {
                continue;
            }
            processing_order.push(module);
            let mut newly_ready = Vec::new();
            for next in adjacency.get(&module).cloned().unwrap_or_default() {
                let deg = remaining_in_degree.entry(next).or_insert(0);
                *deg = deg.saturating_sub(1);
                if *deg == 0 && !visited.contains(&next) {
                    newly_ready.push(next);
                }
            }
            newly_ready.sort_by_key(|h| h.raw());
            for m in newly_ready {
                ready.push_back(m);
            }
        }

        if processing_order.len() != pipeline.modules.len() {
            return Err(RuntimeError::PipelineCycle);
        }

        let mut modules = Vec::with_capacity(processing_order.len());
        for module_handle in processing_order {
            let module_data = registry.module(module_handle)?;
            let factory = factories.get(&module_data.type_name).ok_or_else(|| {
                RuntimeError::Model(smartx_model::ModelError::NotFound(format!(
                    "module type '{}'",
                    module_data.type_name
                )))
            })?;
            let mut binding = ModuleBinding::default();
            for pin_handle in &module_data.pins {
                let pin = registry.pin(*pin_handle)?;
                let stream = stream_map
                    .get(pin_handle)
                    .expect("every pin has an assigned stream")
                    .clone();
                match pin.direction {
                    PinDirection::ModuleInput => {
                        binding.input_streams.insert(pin.name.clone(), stream);
                    }
                    PinDirection::ModuleOutput => {
                        binding.output_streams.insert(pin.name.clone(), stream);
                    }
                    PinDirection::ModuleInOut => {
                        binding.input_streams.insert(pin.name.clone(), stream.clone());
                        binding.output_streams.insert(pin.name.clone(), stream);
                    }
                    PinDirection::PipelineInput | PinDirection::PipelineOutput => {}
                }
            }
            let emitter = ModuleEventEmitter::new(
                module_data.instance_name.clone(),
                module_data.type_name.clone(),
                event_sender.clone(),
            );
            let config = ModuleConfig {
                instance_name: module_data.instance_name.clone(),
                type_name: module_data.type_name.clone(),
                properties: module_data.properties.clone(),
                binding,
                emitter,
            };
            let core = factory.create(config)?;
            modules.push((module_handle, core));
        }

        let mut input_streams = HashMap::new();
        let mut output_streams = HashMap::new();
        for pin_handle in &pipeline.pins {
            let pin = registry.pin(*pin_handle)?;
            match pin.direction {
                PinDirection::PipelineInput => {
                    input_streams.insert(*pin_handle, stream_map[pin_handle].clone());
                }
                PinDirection::PipelineOutput => {
                    output_streams.insert(*pin_handle, stream_map[pin_handle].clone());
                }
                _ => {}
            }
        }

        let mut delayed = Vec::new();
        for (source, sink) in delayed_edges {
            delayed.push((stream_map[&source].clone(), stream_map[&sink].clone()));
        }

        Ok(Self {
            pipeline: pipeline_handle,
            modules,
            delayed,
            input_streams,
            output_streams,
            period_frames,
            pipeline_name,
            period_budget,
            event_sender,
        })
    }

    pub fn provide_input_data(&self, pin: PinHandle, samples: &[f32]) -> RuntimeResult<()> {
        let stream = self.input_streams.get(&pin).ok_or_else(|| {
            RuntimeError::Model(smartx_model::ModelError::NotFound(format!(
                "pipeline input pin {pin}"
            )))
        })?;
        stream.with_samples_mut(|s| {
            let n = s.len().min(samples.len());
            s[..n].copy_from_slice(&samples[..n]);
        });
        Ok(())
    }

    pub fn retrieve_output_data(&self, pin: PinHandle) -> RuntimeResult<Vec<f32>> {
        let stream = self.output_streams.get(&pin).ok_or_else(|| {
            RuntimeError::Model(smartx_model::ModelError::NotFound(format!(
                "pipeline output pin {pin}"
            )))
        })?;
        Ok(stream.with_samples(|s| s.to_vec()))
    }

    pub fn period_frames(&self) -> u32 {
        self.period_frames
    }

    /// Dispatches a command to the named module instance, if this engine
    /// owns it. Returns `RuntimeError::Model(ModelError::NotFound(_))`
    /// when no module in this engine has that instance name, so a caller
    /// holding several engines (base plus derived) can try each in turn.
    pub fn send_cmd(
        &mut self,
        instance_name: &str,
        cmd: &smartx_model::properties::Properties,
    ) -> RuntimeResult<smartx_model::properties::Properties> {
        for (_, module) in &mut self.modules {
            if module.name() == instance_name {
                return Ok(module.send_cmd(cmd)?);
            }
        }
        Err(RuntimeError::Model(smartx_model::ModelError::NotFound(format!(
            "module instance '{instance_name}'"
        ))))
    }

    /// Runs every module once, in dependency order, then refreshes every
    /// delayed link's staging buffer for next period. Raises a
    /// `ModuleEvent` (instance `<pipeline name>`, type `pipeline`) if the
    /// wall-clock time this took exceeds the pipeline's period budget.
    pub fn process(&mut self) -> RuntimeResult<()> {
        let started = Instant::now();
        for (_, module) in &mut self.modules {
            module.process();
        }
        for (source, sink) in &self.delayed {
            sink.copy_from(source);
        }
        let elapsed = started.elapsed();
        if elapsed > self.period_budget {
            let mut properties = smartx_model::properties::Properties::new();
            properties.set("period_budget_us", self.period_budget.as_micros() as i32);
            properties.set("elapsed_us", elapsed.as_micros() as i32);
            let _ = self.event_sender.send(ModuleEventPayload {
                instance_name: self.pipeline_name.clone(),
                type_name: "pipeline".to_string(),
                properties,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smartx_model::clock::{ClockType, DataFormat};
    use smartx_model::link::LinkType;
    use smartx_model::pin::PinOwner;
    use smartx_model::properties::Properties;
    use smartx_model::registry::Registry;

    fn factories() -> HashMap<String, Arc<dyn ModuleFactory>> {
        let mut map: HashMap<String, Arc<dyn ModuleFactory>> = HashMap::new();
        map.insert("passthrough".into(), Arc::new(smartx_dsp::PassthroughFactory));
        map.insert("volume".into(), Arc::new(smartx_dsp::VolumeFactory));
        map
    }

    #[test]
    fn test_simple_chain_processes_in_order() {
        let mut registry = Registry::new();
        let pipeline = registry.create_pipeline("p", 48_000, 4).unwrap();
        let pipeline_in = registry
            .create_pin(PinOwner::Pipeline(pipeline), "in", 1, PinDirection::PipelineInput)
            .unwrap();
        let module = registry
            .create_module(pipeline, "vol1", "volume", Properties::new())
            .unwrap();
        let module_in = registry
            .create_pin(PinOwner::Module(module), "in", 1, PinDirection::ModuleInOut)
            .unwrap();
        let pipeline_out = registry
            .create_pin(PinOwner::Pipeline(pipeline), "out", 1, PinDirection::PipelineOutput)
            .unwrap();
        registry
            .create_link(pipeline, pipeline_in, module_in, LinkType::Immediate)
            .unwrap();
        registry
            .create_link(pipeline, module_in, pipeline_out, LinkType::Immediate)
            .unwrap();

        let (tx, _rx) = crossbeam_channel::unbounded();
        let mut engine =
            PipelineEngine::initialize(pipeline, &registry, &factories(), tx).unwrap();
        engine.provide_input_data(pipeline_in, &[1.0, 1.0, 1.0, 1.0]).unwrap();
        engine.process().unwrap();
        let out = engine.retrieve_output_data(pipeline_out).unwrap();
        assert_eq!(out, vec![1.0, 1.0, 1.0, 1.0]);
        let _ = (ClockType::Provided, DataFormat::Float32);
    }

    #[test]
    fn test_delayed_cycle_does_not_deadlock_ordering() {
        let mut registry = Registry::new();
        let pipeline = registry.create_pipeline("p", 48_000, 4).unwrap();
        let a = registry
            .create_module(pipeline, "a", "passthrough", Properties::new())
            .unwrap();
        let b = registry
            .create_module(pipeline, "b", "passthrough", Properties::new())
            .unwrap();
        let a_pin = registry
            .create_pin(PinOwner::Module(a), "io", 1, PinDirection::ModuleInOut)
            .unwrap();
        let b_pin = registry
            .create_pin(PinOwner::Module(b), "io", 1, PinDirection::ModuleInOut)
            .unwrap();
        // a -> b immediate, b -> a delayed: closes the cycle without a
        // processing-order conflict, since the delayed edge contributes
        // no dependency edge.
        registry
            .create_link(pipeline, a_pin, b_pin, LinkType::Immediate)
            .unwrap();
        registry
            .create_link(pipeline, b_pin, a_pin, LinkType::Delayed)
            .unwrap();

        let (tx, _rx) = crossbeam_channel::unbounded();
        let mut engine =
            PipelineEngine::initialize(pipeline, &registry, &factories(), tx).unwrap();
        // First period: a's input (the delayed staging buffer) starts at
        // zero since b hasn't produced anything yet.
        engine.process().unwrap();
    }

    #[test]
    fn test_overrun_raises_module_event() {
        let mut registry = Registry::new();
        // An absurdly high sample rate gives a near-zero period budget,
        // so even a trivial passthrough process() call overruns it.
        let pipeline = registry.create_pipeline("p", 1_000_000_000, 1).unwrap();
        let module = registry
            .create_module(pipeline, "pass1", "passthrough", Properties::new())
            .unwrap();
        let pin_in = registry
            .create_pin(PinOwner::Module(module), "in", 1, PinDirection::ModuleInput)
            .unwrap();
        let pin_out = registry
            .create_pin(PinOwner::Module(module), "out", 1, PinDirection::ModuleOutput)
            .unwrap();
        let _ = (pin_in, pin_out);

        let (tx, rx) = crossbeam_channel::unbounded();
        let mut engine = PipelineEngine::initialize(pipeline, &registry, &factories(), tx).unwrap();
        engine.process().unwrap();
        let payload = rx.try_recv().expect("expected an overrun event");
        assert_eq!(payload.instance_name, "p");
        assert_eq!(payload.type_name, "pipeline");
        assert!(payload.properties.get_int32("elapsed_us").is_ok());
    }

    #[test]
    fn test_immediate_only_cycle_is_rejected() {
        let mut registry = Registry::new();
        let pipeline = registry.create_pipeline("p", 48_000, 4).unwrap();
        let a = registry
            .create_module(pipeline, "a", "passthrough", Properties::new())
            .unwrap();
        let b = registry
            .create_module(pipeline, "b", "passthrough", Properties::new())
            .unwrap();
        let a_in = registry
            .create_pin(PinOwner::Module(a), "in", 1, PinDirection::ModuleInput)
            .unwrap();
        let a_out = registry
            .create_pin(PinOwner::Module(a), "out", 1, PinDirection::ModuleOutput)
            .unwrap();
        let b_in = registry
            .create_pin(PinOwner::Module(b), "in", 1, PinDirection::ModuleInput)
            .unwrap();
        let b_out = registry
            .create_pin(PinOwner::Module(b), "out", 1, PinDirection::ModuleOutput)
            .unwrap();
        registry
            .create_link(pipeline, a_out, b_in, LinkType::Immediate)
            .unwrap();
        registry
            .create_link(pipeline, b_out, a_in, LinkType::Immediate)
            .unwrap();

        let (tx, _rx) = crossbeam_channel::unbounded();
        let result = PipelineEngine::initialize(pipeline, &registry, &factories(), tx);
        assert!(matches!(result, Err(RuntimeError::PipelineCycle)));
    }

    #[test]
    fn test_unlinked_pipeline_output_pin_is_rejected() {
        let mut registry = Registry::new();
        let pipeline = registry.create_pipeline("p", 48_000, 4).unwrap();
        let pipeline_in = registry
            .create_pin(PinOwner::Pipeline(pipeline), "in", 1, PinDirection::PipelineInput)
            .unwrap();
        let module = registry
            .create_module(pipeline, "pass1", "passthrough", Properties::new())
            .unwrap();
        let module_io = registry
            .create_pin(PinOwner::Module(module), "io", 1, PinDirection::ModuleInOut)
            .unwrap();
        // Pipeline output pin is created but never linked.
        registry
            .create_pin(PinOwner::Pipeline(pipeline), "out", 1, PinDirection::PipelineOutput)
            .unwrap();
        registry
            .create_link(pipeline, pipeline_in, module_io, LinkType::Immediate)
            .unwrap();

        let (tx, _rx) = crossbeam_channel::unbounded();
        let result = PipelineEngine::initialize(pipeline, &registry, &factories(), tx);
        assert!(matches!(result, Err(RuntimeError::IllFormedPipeline(_))));
    }
}
