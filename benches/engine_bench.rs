//! Per-frame analysis cost.
//!
//! Run: cargo bench --bench engine_bench

use card_capture::capture::{render_scene, CaptureConfig, Frame, SceneSegment};
use card_capture::engine::{BackgroundModel, CaptureEngine, EngineEvent, NoiseParams};
use card_capture::validation::{LumaImage, PhotoValidator};
use card_capture::CaptureStep;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

fn scene(width: u32, height: u32, segment: &SceneSegment, seq: u64) -> Frame {
    Frame::new(render_scene(width, height, segment), width, height, seq).with_timestamp_ms(seq * 33)
}

fn ready_engine(config: CaptureConfig) -> CaptureEngine {
    let cells = config.grid_size * config.grid_size;
    let params = NoiseParams::from_config(&config);
    let model = BackgroundModel::from_cells(&vec![100u8; cells], config.grid_size, 0.5, 0.1, &params);
    let mut engine = CaptureEngine::new(config);
    engine.install_background(model);
    engine
}

/// Full `analyze` pass on a card scene at common preview sizes.
fn bench_analyze(c: &mut Criterion) {
    let mut group = c.benchmark_group("analyze_frame");

    for (width, height) in [(640, 480), (1280, 720), (1920, 1080)] {
        group.throughput(Throughput::Elements(u64::from(width * height)));
        let frames: Vec<Frame> = (0..8)
            .map(|i| scene(width, height, &SceneSegment::card(1), i))
            .collect();

        group.bench_with_input(
            BenchmarkId::new("card", format!("{}x{}", width, height)),
            &frames,
            |b, frames| {
                let mut engine = ready_engine(CaptureConfig {
                    need_present_frames: u32::MAX,
                    ..CaptureConfig::default()
                });
                let mut events = Vec::<EngineEvent>::new();
                let mut i = 0usize;
                b.iter(|| {
                    engine.analyze(black_box(&frames[i % frames.len()]), &mut events);
                    events.clear();
                    i += 1;
                });
            },
        );
    }

    group.finish();
}

/// Validator on a decoded still.
fn bench_validate(c: &mut Criterion) {
    let pixels = render_scene(640, 480, &SceneSegment::card(1));
    let img = LumaImage::new(640, 480, pixels).unwrap();
    let validator = PhotoValidator::default();

    c.bench_function("validate_back_640x480", |b| {
        b.iter(|| black_box(validator.validate_luma(black_box(&img), CaptureStep::Back)));
    });
}

criterion_group!(benches, bench_analyze, bench_validate);
criterion_main!(benches);
