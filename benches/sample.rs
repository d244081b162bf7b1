use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use gibbs_rs::{chain_rng, sample, Dataset, GibbsChain, GrowthModel, SamplerConfig};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, StandardNormal};

fn make_data(n_subjects: i64, n_times: usize) -> Dataset {
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let mut data = Dataset::new(&["dose", "bmi"]);
    for subject in 0..n_subjects {
        let b0: f64 = StandardNormal.sample(&mut rng);
        let dose = [15., 30., 45., 60.][subject as usize % 4];
        for k in 0..n_times {
            let t = 3. * k as f64;
            let noise: f64 = StandardNormal.sample(&mut rng);
            let y = 2. + b0 + 0.3 * t + 0.01 * dose + 0.3 * noise;
            data.push(subject, t, &[dose, 24.], y).unwrap();
        }
    }
    data
}

fn criterion_benchmark(c: &mut Criterion) {
    let config = SamplerConfig {
        n_chains: 1,
        n_burnin: 0,
        n_iter: 1000,
        thin: 1,
        ..Default::default()
    };

    for (n_subjects, n_times) in [(10, 5), (100, 5)] {
        let data = make_data(n_subjects, n_times);
        for model in [
            GrowthModel::linear_quadratic(&["dose", "bmi"]),
            GrowthModel::logistic(&["dose"]),
        ] {
            let spec = model.spec(&data).unwrap();
            let name = format!("{:?} sweep {}x{}", model.curve(), n_subjects, n_times);
            c.bench_function(&name, |b| {
                b.iter_batched(
                    || {
                        let mut chain = GibbsChain::new(&spec, &data, config, 0, chain_rng(1, 0));
                        chain.initialize().unwrap();
                        chain
                    },
                    |mut chain| black_box(chain.step().unwrap()),
                    BatchSize::SmallInput,
                )
            });
        }
    }

    let data = make_data(10, 5);
    let spec = GrowthModel::linear_quadratic(&["dose"]).spec(&data).unwrap();
    let config = SamplerConfig {
        n_chains: 3,
        n_burnin: 200,
        n_iter: 2000,
        thin: 5,
        ..Default::default()
    };
    c.bench_function("three chains linear-quadratic 10x5", |b| {
        b.iter(|| sample(black_box(&spec), black_box(&data), config).unwrap())
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
