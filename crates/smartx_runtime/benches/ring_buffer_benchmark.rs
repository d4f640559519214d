use criterion::{black_box, criterion_group, criterion_main, Criterion};
use smartx_model::clock::DataFormat;
use smartx_runtime::{new_ring_buffer, AreaLayout};

fn bench_write_then_read_period(c: &mut Criterion) {
    let (mut producer, mut consumer) =
        new_ring_buffer(8, DataFormat::Float32, AreaLayout::Interleaved, 256, 4);
    c.bench_function("ring_buffer_write_then_read_256_frames", |b| {
        b.iter(|| {
            {
                let mut access = producer.begin_access(256);
                let bytes = access.bytes_mut();
                for byte in bytes.iter_mut() {
                    *byte = 0;
                }
                access.end_access(256).unwrap();
            }
            let access = consumer.begin_access(256).unwrap();
            black_box(access.frames_granted());
            access.end_access(256);
        });
    });
}

fn bench_copy_audio_areas(c: &mut Criterion) {
    use smartx_runtime::ring_buffer::copy_audio_areas;

    let channels = 8u16;
    let period_frames = 256u32;
    let src_areas: Vec<_> = (0..channels)
        .map(|ch| smartx_runtime::AudioArea {
            offset_bytes: ch as usize * 2,
            first_bit_offset: 0,
            stride_bits: 2 * 8 * channels as u32,
            channel_index: ch,
        })
        .collect();
    let dst_areas: Vec<_> = (0..channels)
        .map(|ch| smartx_runtime::AudioArea {
            offset_bytes: ch as usize * 4,
            first_bit_offset: 0,
            stride_bits: 4 * 8 * channels as u32,
            channel_index: ch,
        })
        .collect();
    let src_bytes = vec![0u8; channels as usize * 2 * period_frames as usize];
    let mut dst_bytes = vec![0u8; channels as usize * 4 * period_frames as usize];

    c.bench_function("copy_audio_areas_int16_to_float32_256_frames", |b| {
        b.iter(|| {
            copy_audio_areas(
                &dst_areas,
                DataFormat::Float32,
                &mut dst_bytes,
                &src_areas,
                DataFormat::Int16,
                &src_bytes,
                period_frames,
            )
            .unwrap();
            black_box(&dst_bytes);
        });
    });
}

criterion_group!(benches, bench_write_then_read_period, bench_copy_audio_areas);
criterion_main!(benches);
