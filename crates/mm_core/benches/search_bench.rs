//! Benchmarks for candidate search over synthetic datasets.
//!
//! Run with: cargo bench -p mm_core --features test-support

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use mm_core::dataset::testing::{locomotion_dataset, SyntheticOptions};
use mm_core::dataset::SearchParams;
use mm_core::math::{Pos3, Vec3};
use mm_core::trajectory::{Trajectory, TrajectorySample};

fn straight(speed: f32) -> Trajectory {
    Trajectory::from_samples((-3..=10).map(|i| {
        let t = i as f32 * 0.1;
        TrajectorySample {
            time: t,
            pos: Pos3::new(0.0, 0.0, speed * t),
            velocity: Vec3::new(0.0, 0.0, speed),
            facing: Vec3::z(),
            yaw_speed: 0.0,
        }
    }))
}

fn bench_find_closest(c: &mut Criterion) {
    let mut group = c.benchmark_group("find_closest");
    let trajectory = straight(2.5);

    for copies in [1, 10, 100] {
        let dataset = locomotion_dataset(&SyntheticOptions {
            copies,
            ..Default::default()
        });
        let query = dataset.query_from_trajectory(&trajectory, 0);
        let scales = dataset.scales(&query.filter);

        for (name, threshold) in [("serial", usize::MAX), ("parallel", 1)] {
            let params = SearchParams {
                parallel_threshold: threshold,
                ..Default::default()
            };
            group.bench_with_input(BenchmarkId::new(name, dataset.len()), &dataset, |b, ds| {
                b.iter(|| black_box(ds.find_closest(black_box(&query), &scales, &params)));
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_find_closest);
criterion_main!(benches);
