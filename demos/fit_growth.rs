//! Fit both growth curves to a simulated dose-response study.
//!
//! Usage: `cargo run --release --example fit_growth [draws.csv]`

use anyhow::{Context, Result};
use gibbs_rs::{
    sample, summarize, Dataset, GridPoint, GrowthModel, PosteriorMeans, SamplerConfig,
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};

const DOSES: [f64; 4] = [0., 15., 30., 60.];
const MONTHS: [f64; 5] = [0., 3., 6., 9., 12.];

fn simulate_study(n_subjects: i64, seed: u64) -> Result<Dataset> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let intercept = Normal::new(1.8, 0.4)?;
    let noise = Normal::new(0., 0.25)?;
    let mut data = Dataset::new(&["dose"]);
    for subject in 0..n_subjects {
        let b0 = intercept.sample(&mut rng);
        let dose = DOSES[subject as usize % DOSES.len()];
        for month in MONTHS {
            let response = b0
                + 0.04 * dose * (1. - (-0.4 * month).exp())
                + noise.sample(&mut rng);
            data.push(100 + subject, month, &[dose], response)?;
        }
    }
    Ok(data)
}

fn main() -> Result<()> {
    let data = simulate_study(24, 12)?;
    let config = SamplerConfig {
        n_iter: 10_000,
        ..Default::default()
    };

    for model in [
        GrowthModel::linear_quadratic(&["dose"]),
        GrowthModel::logistic(&["dose"]),
    ] {
        let spec = model.spec(&data)?;
        let samples = sample(&spec, &data, config)?;

        println!("{:?}: {} draws", model.curve(), samples.len());
        println!(
            "{:>10} {:>10} {:>10} {:>10} {:>10} {:>7}",
            "param", "mean", "sd", "2.5%", "97.5%", "rhat"
        );
        for s in summarize(&samples)
            .iter()
            .filter(|s| !s.name.starts_with("b0["))
        {
            println!(
                "{:>10} {:>10.4} {:>10.4} {:>10.4} {:>10.4} {:>7.3}",
                s.name, s.mean, s.sd, s.q2_5, s.q97_5, s.rhat
            );
        }

        let means = PosteriorMeans::from_samples(&samples);
        for dose in DOSES {
            let grid: Vec<GridPoint> = MONTHS
                .iter()
                .map(|&time| GridPoint {
                    time,
                    covariates: vec![dose],
                    subject: None,
                })
                .collect();
            let curve = model.predict(&means, &grid)?;
            let curve: Vec<String> = curve.iter().map(|v| format!("{:.3}", v)).collect();
            println!("dose {:>4}: {}", dose, curve.join(" "));
        }
        println!();

        if let Some(path) = std::env::args().nth(1) {
            let path = format!("{:?}-{}", model.curve(), path).to_lowercase();
            samples
                .write_csv_file(&path)
                .with_context(|| format!("Could not export draws of {:?}", model.curve()))?;
            println!("draws written to {}", path);
        }
    }
    Ok(())
}
