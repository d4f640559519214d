use criterion::{black_box, criterion_group, criterion_main, Criterion};
use smartx_dsp::module::{AudioStream, ModuleBinding, ModuleConfig, ModuleCore, ModuleEventEmitter, ModuleFactory};
use smartx_dsp::{PassthroughFactory, VolumeFactory};
use smartx_model::properties::Properties;

fn make_config(instance_name: &str, type_name: &str) -> (ModuleConfig, crossbeam_channel::Receiver<smartx_dsp::ModuleEventPayload>) {
    let (tx, rx) = crossbeam_channel::unbounded();
    let stream = AudioStream::new(2, 256);
    let mut binding = ModuleBinding::default();
    binding.input_streams.insert("io".into(), stream.clone());
    binding.output_streams.insert("io".into(), stream);
    let emitter = ModuleEventEmitter::new(instance_name.into(), type_name.into(), tx);
    (
        ModuleConfig {
            instance_name: instance_name.into(),
            type_name: type_name.into(),
            properties: Properties::new(),
            binding,
            emitter,
        },
        rx,
    )
}

fn bench_passthrough_process(c: &mut Criterion) {
    let (config, _rx) = make_config("pt", "passthrough");
    let mut module = PassthroughFactory.create(config).unwrap();
    c.bench_function("passthrough_process_256_frames", |b| {
        b.iter(|| {
            module.process();
            black_box(());
        });
    });
}

fn bench_volume_process(c: &mut Criterion) {
    let (config, _rx) = make_config("vol", "volume");
    let mut module = VolumeFactory.create(config).unwrap();
    c.bench_function("volume_process_256_frames", |b| {
        b.iter(|| {
            module.process();
            black_box(());
        });
    });
}

criterion_group!(benches, bench_passthrough_process, bench_volume_process);
criterion_main!(benches);
