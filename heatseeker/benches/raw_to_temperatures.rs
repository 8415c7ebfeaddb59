use criterion::{black_box, criterion_group, criterion_main, Criterion};

use heatseeker::{
    AcquireStatus, Camera, CameraConfig, FrameAcquirer, HotspotConfig, HotspotLocator,
    RegisterBus,
};
use heatseeker_test_data::datasheet_sensor;

pub fn criterion_benchmark(c: &mut Criterion) {
    let config = CameraConfig::default();
    let mut camera = Camera::new(datasheet_sensor(), || 0u64, &config).unwrap();

    // A raw frame straight off the simulated bus
    let mut bus = RegisterBus::new(datasheet_sensor(), config.address, || 0u64);
    let mut acquirer = FrameAcquirer::new(config.pattern, config.max_polls);
    while acquirer.poll(&mut bus).unwrap() != AcquireStatus::Ready {}
    let raw = acquirer.take_frame().unwrap();

    let mut group = c.benchmark_group("Pixels to Temperatures");

    group.bench_function("convert", |b| {
        b.iter(|| camera.converter().convert(black_box(&raw), camera.calibration()))
    });

    let frame = camera.converter().convert(&raw, camera.calibration());
    let locator = HotspotLocator::new(&HotspotConfig::default());
    group.bench_function("locate", |b| b.iter(|| locator.locate(black_box(&frame))));

    group.bench_function("poll both sub-pages", |b| {
        b.iter(|| loop {
            if let Some(frame) = camera.poll().unwrap() {
                break frame;
            }
        })
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
