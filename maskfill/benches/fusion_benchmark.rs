use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use image::{GrayImage, Luma, Rgb, RgbImage};
use maskfill::{Detection, DetectionRule, fuse_detections};

fn instance(offset: u32) -> GrayImage {
    GrayImage::from_fn(160, 160, |x, y| {
        let inside = x >= offset && x < offset + 40 && y >= offset / 2 && y < offset / 2 + 60;
        Luma([if inside { 255 } else { 0 }])
    })
}

/// Benchmark suite for mask fusion and structural fill
pub fn fusion_benchmarks(c: &mut Criterion) {
    let detections: Vec<Detection> = (0..8)
        .map(|i| Detection {
            class_id: 14,
            confidence: 0.5 + i as f32 * 0.05,
            instance_mask: Some(instance(i * 15)),
        })
        .collect();
    let rule = DetectionRule::new(14, 0.5);

    let mut group = c.benchmark_group("fusion");
    group.throughput(Throughput::Elements(detections.len() as u64));
    group.bench_function("fuse_8_instances_1024x768", |b| {
        b.iter(|| black_box(fuse_detections((1024, 768), black_box(&detections), &rule)));
    });
    group.finish();

    let image = RgbImage::from_fn(256, 256, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 90]));
    let mask = GrayImage::from_fn(256, 256, |x, y| {
        let inside = (108..148).contains(&x) && (108..148).contains(&y);
        Luma([if inside { 255 } else { 0 }])
    });

    let mut group = c.benchmark_group("structural_fill");
    group.sample_size(20);
    group.bench_function("telea_256x256_hole_40", |b| {
        b.iter(|| black_box(telea::inpaint(&image, &mask, 3)));
    });
    group.finish();
}

criterion_group!(benches, fusion_benchmarks);
criterion_main!(benches);
