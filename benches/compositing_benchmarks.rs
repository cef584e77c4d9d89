use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use image::{Rgba, RgbaImage};
use selfie_compose::{
    AffineTransform, CompositionInput, Compositor, Mask, MaskApplicator, RasterImage,
    ResampleFilter,
};

fn gradient_photo(width: u32, height: u32) -> RasterImage {
    let mut pixels = RgbaImage::new(width, height);
    for (x, y, pixel) in pixels.enumerate_pixels_mut() {
        *pixel = Rgba([(x % 256) as u8, (y % 256) as u8, 128, 255]);
    }
    RasterImage::new(pixels)
}

fn radial_mask(size: u32) -> Mask {
    let centre = size as f32 / 2.0;
    let data = (0..size * size)
        .map(|i| {
            let dx = (i % size) as f32 - centre;
            let dy = (i / size) as f32 - centre;
            (1.0 - (dx * dx + dy * dy).sqrt() / centre).clamp(0.0, 1.0)
        })
        .collect();
    Mask::new(size, size, data).expect("valid mask")
}

fn benchmark_mask_application(c: &mut Criterion) {
    let mask = radial_mask(320);
    let mut group = c.benchmark_group("mask_application");
    group.sample_size(20);

    for (width, height) in [(640, 480), (1280, 960)] {
        let photo = gradient_photo(width, height);
        for filter in [ResampleFilter::Nearest, ResampleFilter::Triangle] {
            let applicator = MaskApplicator::new(filter);
            group.bench_with_input(
                BenchmarkId::new(format!("{:?}", filter), format!("{width}x{height}")),
                &photo,
                |b, photo| b.iter(|| applicator.apply(black_box(photo), black_box(&mask))),
            );
        }
    }

    group.finish();
}

fn benchmark_composition(c: &mut Criterion) {
    let background = gradient_photo(1280, 960);
    let foreground = MaskApplicator::default().apply(&gradient_photo(640, 480), &radial_mask(320));

    let mut scaled = AffineTransform::IDENTITY;
    scaled.post_scale(1.5, 1.5, 320.0, 240.0);

    let cases = [
        ("identity", AffineTransform::IDENTITY),
        ("integer_translation", AffineTransform::from_translation(200.0, 120.0)),
        ("scaled", scaled),
        ("rotated", AffineTransform::from_rotation(15.0, 320.0, 240.0)),
    ];

    let mut group = c.benchmark_group("composition");
    group.sample_size(20);

    for (name, transform) in cases {
        group.bench_function(name, |b| {
            b.iter(|| {
                let input = CompositionInput::new(&foreground, (1280, 960))
                    .with_background(Some(&background))
                    .with_transform(transform)
                    .with_opacity(0.9);
                Compositor::compose(black_box(&input))
            });
        });
    }

    group.finish();
}

criterion_group!(
    compositing_benches,
    benchmark_mask_application,
    benchmark_composition
);
criterion_main!(compositing_benches);
