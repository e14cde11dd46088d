//! Benchmarks for per-frame crop rendering.
//!
//! Run with: `cargo bench --bench compositor`

use std::path::PathBuf;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use video_cropper::composition::{CompositionPlan, CropJob, TransformPlanner};
use video_cropper::config::{Interpolation, RenderConfig};
use video_cropper::geometry::{AffineTransform, Rect, Size};
use video_cropper::video::{
    Frame, FrameCompositor, RenderContext, SourceAsset, SourceFrames, SourceTrack, TimeRange, TrackKind,
};

fn hd_plan(angle: f64) -> CompositionPlan {
    let asset = SourceAsset {
        path: PathBuf::from("bench.mov"),
        duration: 1.0,
        tracks: vec![SourceTrack {
            index: 0,
            codec: "h264".to_string(),
            kind: TrackKind::Video {
                natural_size: Size::new(1920.0, 1080.0),
                frame_rate: 30.0,
                orientation: AffineTransform::IDENTITY,
            },
            time_range: TimeRange::from_duration(1.0),
        }],
    };
    let job = CropJob::new("bench.mov", Rect::new(240.0, 135.0, 1280.0, 720.0), angle);
    CompositionPlan::build(&job, &asset, &TransformPlanner::default()).expect("bench plan")
}

fn gradient_frame(width: u32, height: u32) -> Frame {
    let mut frame = Frame::new_black(width, height);
    for y in 0..height {
        for x in 0..width {
            frame.set_pixel(x, y, [(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8]);
        }
    }
    frame
}

fn bench_render(c: &mut Criterion) {
    let source = gradient_frame(1920, 1080);
    let mut group = c.benchmark_group("render_720p_crop");

    let cases = [
        ("straight", 0.0, Interpolation::Nearest),
        ("straight", 0.0, Interpolation::Bilinear),
        ("quarter_turn", std::f64::consts::FRAC_PI_2, Interpolation::Bilinear),
        ("tilted", 0.2, Interpolation::Bilinear),
    ];

    for (name, angle, interpolation) in cases {
        let plan = hd_plan(angle);
        let (width, height) = plan.render_size();
        group.throughput(Throughput::Elements(width as u64 * height as u64));

        let config = RenderConfig { interpolation, ..RenderConfig::default() };
        let compositor = FrameCompositor::new(&plan, RenderContext::new(&config).expect("render pool"))
            .expect("compositor");
        let mut destination = compositor.new_destination();
        let sources = SourceFrames::single(plan.primary_video_track(), &source);

        group.bench_with_input(
            BenchmarkId::new(name, format!("{:?}", interpolation)),
            &sources,
            |b, sources| {
                b.iter(|| {
                    compositor
                        .render(black_box(sources), &mut destination)
                        .expect("render");
                })
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_render);
criterion_main!(benches);
