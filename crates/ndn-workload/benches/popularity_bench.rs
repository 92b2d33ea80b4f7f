use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ndn_workload::popularity::PopularityModel;
use rand::rngs::StdRng;
use rand::SeedableRng;

fn bench_configure(c: &mut Criterion) {
    let mut group = c.benchmark_group("popularity_configure");
    for &n in &[1_000u32, 100_000] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            let mut model = PopularityModel::new(1, 0.8, 0.0).unwrap();
            b.iter(|| model.configure(black_box(n), 0.8, 0.0).unwrap());
        });
    }
    group.finish();
}

fn bench_sample(c: &mut Criterion) {
    let mut group = c.benchmark_group("popularity_sample");
    for &n in &[1_000u32, 100_000] {
        let model = PopularityModel::new(n, 0.8, 0.0).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        group.bench_with_input(BenchmarkId::from_parameter(n), &model, |b, model| {
            b.iter(|| black_box(model.sample_with(&mut rng)));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_configure, bench_sample);
criterion_main!(benches);
