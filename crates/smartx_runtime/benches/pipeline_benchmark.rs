use std::collections::HashMap;
use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use smartx_dsp::ModuleFactory;
use smartx_model::pin::{PinDirection, PinOwner};
use smartx_model::properties::Properties;
use smartx_model::registry::Registry;
use smartx_runtime::PipelineEngine;

fn build_engine() -> PipelineEngine {
    let mut registry = Registry::new();
    let pipeline = registry.create_pipeline("bench-pipeline", 48_000, 256).unwrap();
    let pipeline_in = registry
        .create_pin(PinOwner::Pipeline(pipeline), "in", 8, PinDirection::PipelineInput)
        .unwrap();
    let volume = registry
        .create_module(pipeline, "vol1", "volume", Properties::new())
        .unwrap();
    let volume_io = registry
        .create_pin(PinOwner::Module(volume), "io", 8, PinDirection::ModuleInOut)
        .unwrap();
    let pipeline_out = registry
        .create_pin(PinOwner::Pipeline(pipeline), "out", 8, PinDirection::PipelineOutput)
        .unwrap();
    registry
        .create_link(pipeline, pipeline_in, volume_io, smartx_model::link::LinkType::Immediate)
        .unwrap();
    registry
        .create_link(pipeline, volume_io, pipeline_out, smartx_model::link::LinkType::Immediate)
        .unwrap();

    let mut factories: HashMap<String, Arc<dyn ModuleFactory>> = HashMap::new();
    factories.insert("volume".into(), Arc::new(smartx_dsp::VolumeFactory));
    let (tx, _rx) = crossbeam_channel::unbounded();
    PipelineEngine::initialize(pipeline, &registry, &factories, tx).unwrap()
}

fn bench_pipeline_process(c: &mut Criterion) {
    let mut engine = build_engine();
    let frame_samples = vec![0.5f32; 8 * 256];
    c.bench_function("pipeline_engine_process_256_frames_1_module", |b| {
        b.iter(|| {
            engine.process().unwrap();
            black_box(&frame_samples);
        });
    });
}

criterion_group!(benches, bench_pipeline_process);
criterion_main!(benches);
