//! Monte Carlo estimate of π.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use computegrid_core::{DistributedTask, ErasedTask, TaskError, TaskProvider};

/// Task type served by this module.
pub const MONTE_CARLO_PI: &str = "monte_carlo_pi";

/// Largest batch a single task may sample.
pub const MAX_SAMPLES: u64 = 100_000_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PiArgs {
    pub samples: u64,
    /// Fixed seed for reproducible batches.
    #[serde(default)]
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PiEstimate {
    pub samples: u64,
    pub inside: u64,
    pub estimate: f64,
}

impl PiEstimate {
    /// Combine independent batches into one estimate.
    pub fn merge<'a>(batches: impl IntoIterator<Item = &'a PiEstimate>) -> PiEstimate {
        let (samples, inside) = batches
            .into_iter()
            .fold((0u64, 0u64), |(s, i), b| (s + b.samples, i + b.inside));
        PiEstimate {
            samples,
            inside,
            estimate: estimate(samples, inside),
        }
    }
}

fn estimate(samples: u64, inside: u64) -> f64 {
    if samples == 0 {
        0.0
    } else {
        4.0 * inside as f64 / samples as f64
    }
}

/// Samples uniform points in the unit square and counts hits in the circle.
#[derive(Debug, Default, Clone, Copy)]
pub struct MonteCarloPiTask;

impl DistributedTask for MonteCarloPiTask {
    type Input = PiArgs;
    type Output = PiEstimate;

    fn task_type(&self) -> &str {
        MONTE_CARLO_PI
    }

    fn execute(&self, args: PiArgs) -> Result<PiEstimate, TaskError> {
        if args.samples == 0 || args.samples > MAX_SAMPLES {
            return Err(TaskError::Execution(format!(
                "samples must be in 1..={}",
                MAX_SAMPLES
            )));
        }

        let mut rng = match args.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut inside = 0u64;
        for _ in 0..args.samples {
            let x: f64 = rng.gen();
            let y: f64 = rng.gen();
            if x * x + y * y <= 1.0 {
                inside += 1;
            }
        }

        debug!(samples = args.samples, inside, "Sampled pi batch");
        Ok(PiEstimate {
            samples: args.samples,
            inside,
            estimate: estimate(args.samples, inside),
        })
    }
}

/// Provider for the `monte_carlo_pi` task type.
#[derive(Debug, Default, Clone, Copy)]
pub struct MonteCarloPiProvider;

impl TaskProvider for MonteCarloPiProvider {
    fn task_type(&self) -> &str {
        MONTE_CARLO_PI
    }

    fn create(&self) -> Box<dyn ErasedTask> {
        Box::new(MonteCarloPiTask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_batches_are_reproducible() {
        let args = PiArgs {
            samples: 10_000,
            seed: Some(7),
        };
        let a = MonteCarloPiTask.execute(args.clone()).unwrap();
        let b = MonteCarloPiTask.execute(args).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_estimate_is_roughly_pi() {
        let result = MonteCarloPiTask
            .execute(PiArgs {
                samples: 200_000,
                seed: Some(42),
            })
            .unwrap();
        assert!((result.estimate - std::f64::consts::PI).abs() < 0.05);
    }

    #[test]
    fn test_merge_weights_by_samples() {
        let merged = PiEstimate::merge(&[
            PiEstimate {
                samples: 100,
                inside: 80,
                estimate: 3.2,
            },
            PiEstimate {
                samples: 300,
                inside: 234,
                estimate: 3.12,
            },
        ]);
        assert_eq!(merged.samples, 400);
        assert_eq!(merged.inside, 314);
        assert!((merged.estimate - 4.0 * 314.0 / 400.0).abs() < 1e-9);
    }

    #[test]
    fn test_rejects_zero_samples() {
        let err = MonteCarloPiTask
            .execute(PiArgs {
                samples: 0,
                seed: None,
            })
            .unwrap_err();
        assert!(matches!(err, TaskError::Execution(_)));
    }
}
