
use criterion::{BatchSize, BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use rand_distr::{Distribution, Normal};

use claimstat::aggregate::agg_by_group;
use claimstat::config::TwoSampleConfig;
use claimstat::hypothesis::{chi2_test_frequency, kruskal_test_numeric, ttest_or_mannwhitney};
use claimstat::kpi::prepare_kpis;
use claimstat::overview::summary_statistics;
use claimstat::stats::{mann_whitney_u, shapiro_wilk};
use claimstat::types::GroupKey;

use fixtures::{LARGE, MEDIUM, SMALL, kpi_portfolio, raw_portfolio};

// ── Group 1: kpi_pipeline — portfolio size scaling ───────────────────────────

fn bench_kpi_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("kpi_pipeline");
    for (label, p) in [("small", &SMALL), ("medium", &MEDIUM), ("large", &LARGE)] {
        group.throughput(Throughput::Elements(p.policies as u64));
        group.bench_with_input(BenchmarkId::new("prepare_kpis", label), p, |b, p| {
            b.iter_batched(|| raw_portfolio(p, 42), |raw| prepare_kpis(&raw).unwrap(), BatchSize::LargeInput)
        });
        let table = kpi_portfolio(p, 42);
        group.bench_with_input(BenchmarkId::new("agg_by_group", label), &table, |b, t| {
            b.iter(|| agg_by_group(t, "Province", 30).unwrap())
        });
        group.bench_with_input(BenchmarkId::new("summary_statistics", label), &table, |b, t| {
            b.iter(|| summary_statistics(t, None).unwrap())
        });
    }
    group.finish();
}

// ── Group 2: table_tests — the group-level hypothesis tests ──────────────────

fn bench_table_tests(c: &mut Criterion) {
    let mut group = c.benchmark_group("table_tests");
    let table = kpi_portfolio(&MEDIUM, 7);
    let gauteng = GroupKey::from("Gauteng");
    let western_cape = GroupKey::from("Western Cape");
    let config = TwoSampleConfig::default();

    group.bench_function("chi2_test_frequency", |b| b.iter(|| chi2_test_frequency(&table, "Province", 30)));
    group.bench_function("kruskal_margin", |b| b.iter(|| kruskal_test_numeric(&table, "Province", "Margin", 30)));
    group.bench_function("ttest_or_mannwhitney_margin", |b| {
        b.iter(|| ttest_or_mannwhitney(&table, "Province", &gauteng, &western_cape, "Margin", &config))
    });
    group.finish();
}

// ── Group 3: statistics — sample size scaling ────────────────────────────────

fn bench_statistics(c: &mut Criterion) {
    let mut group = c.benchmark_group("statistics");
    let normal = Normal::new(0.0, 1.0).unwrap();
    for &n in &[50usize, 500, 5_000] {
        let mut rng = ChaCha20Rng::seed_from_u64(n as u64);
        let a: Vec<f64> = (0..n).map(|_| normal.sample(&mut rng)).collect();
        let b: Vec<f64> = (0..n).map(|_| normal.sample(&mut rng) + 0.1).collect();

        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::new("shapiro_wilk", n), &a, |bench, a| {
            bench.iter(|| shapiro_wilk(a).unwrap())
        });
        group.bench_with_input(BenchmarkId::new("mann_whitney_u", n), &(a, b), |bench, (a, b)| {
            bench.iter(|| mann_whitney_u(a, b).unwrap())
        });
    }
    group.finish();
}

criterion_group!(benches, bench_kpi_pipeline, bench_table_tests, bench_statistics);
criterion_main!(benches);
