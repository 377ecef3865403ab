
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use tracing::{debug, warn};

use super::Projector;
use crate::config::ProjectionConfig;
use crate::{RecsError, Result};

const EARLY_EXAGGERATION: f64 = 12.0;
const EXAGGERATION_ITERATIONS: u32 = 250;
const INITIAL_MOMENTUM: f64 = 0.5;
const FINAL_MOMENTUM: f64 = 0.8;
const MIN_GAIN: f64 = 0.01;
const PERPLEXITY_TOLERANCE: f64 = 1e-5;
const MAX_BINARY_SEARCH_STEPS: usize = 100;
const MIN_PROBABILITY: f64 = 1e-12;

/// Exact t-SNE, quadratic in the number of points
#[derive(Debug, Clone)]
pub struct TsneProjector {
    config: ProjectionConfig,
}

impl TsneProjector {
    #[inline]
    pub fn new(config: ProjectionConfig) -> Self {
        Self { config }
    }

    /// Perplexity must stay below the neighbour count; small batches lower it
    fn effective_perplexity(&self, n: usize) -> f64 {
        let requested = f64::from(self.config.perplexity);
        let ceiling = ((n - 1) as f64 / 3.0).max(1.0);
        if requested > ceiling {
            warn!(
                "Perplexity {} is too large for {} points, using {:.2}",
                requested, n, ceiling
            );
            ceiling
        } else {
            requested
        }
    }
}

impl Projector for TsneProjector {
    fn project(&self, vectors: &[Vec<f32>]) -> Result<Vec<[f32; 2]>> {
        let n = vectors.len();
        let Some(first) = vectors.first() else {
            return Ok(Vec::new());
        };

        let dim = first.len();
        if let Some(bad) = vectors.iter().position(|v| v.len() != dim) {
            return Err(RecsError::Projection(format!(
                "vector {} has {} dimensions, expected {}",
                bad,
                vectors[bad].len(),
                dim
            )));
        }
        if vectors.iter().flatten().any(|v| !v.is_finite()) {
            return Err(RecsError::Projection(
                "cannot project vectors containing NaN or infinite values".to_string(),
            ));
        }

        if n == 1 {
            return Ok(vec![[0.0, 0.0]]);
        }

        let perplexity = self.effective_perplexity(n);
        debug!(
            "Running t-SNE on {} points, perplexity {:.2}, {} iterations",
            n, perplexity, self.config.iterations
        );

        let distances = squared_distances(vectors);
        let p = joint_probabilities(&distances, n, perplexity);
        let embedding = self.optimize(&p, n);

        Ok(embedding
            .chunks_exact(2)
            .map(|point| [point[0] as f32, point[1] as f32])
            .collect())
    }
}

impl TsneProjector {
    fn optimize(&self, p: &[f64], n: usize) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let mut y: Vec<f64> = (0..n * 2)
            .map(|_| (rng.random::<f64>() - 0.5) * 1e-4)
            .collect();
        let mut velocity = vec![0.0_f64; n * 2];
        let mut gains = vec![1.0_f64; n * 2];
        let learning_rate = f64::from(self.config.learning_rate);

        for iteration in 0..self.config.iterations {
            let (exaggeration, momentum) = if iteration < EXAGGERATION_ITERATIONS {
                (EARLY_EXAGGERATION, INITIAL_MOMENTUM)
            } else {
                (1.0, FINAL_MOMENTUM)
            };

            let grad = gradient(p, &y, n, exaggeration);
            for k in 0..n * 2 {
                let same_direction = (grad[k] > 0.0) == (velocity[k] > 0.0);
                gains[k] = if same_direction {
                    gains[k] * 0.8
                } else {
                    gains[k] + 0.2
                }
                .max(MIN_GAIN);
                velocity[k] = momentum * velocity[k] - learning_rate * gains[k] * grad[k];
                y[k] += velocity[k];
            }
            center(&mut y, n);
        }

        y
    }
}

fn squared_distances(vectors: &[Vec<f32>]) -> Vec<f64> {
    let n = vectors.len();
    let mut distances = vec![0.0_f64; n * n];
    distances
        .par_chunks_mut(n)
        .enumerate()
        .for_each(|(i, row)| {
            for (j, slot) in row.iter_mut().enumerate() {
                *slot = vectors[i]
                    .iter()
                    .zip(&vectors[j])
                    .map(|(a, b)| {
                        let d = f64::from(*a) - f64::from(*b);
                        d * d
                    })
                    .sum();
            }
        });
    distances
}

/// Symmetrised affinities, each row calibrated to the target perplexity
fn joint_probabilities(distances: &[f64], n: usize, perplexity: f64) -> Vec<f64> {
    let mut conditional = vec![0.0_f64; n * n];
    conditional
        .par_chunks_mut(n)
        .enumerate()
        .for_each(|(i, row)| calibrate_row(&distances[i * n..(i + 1) * n], i, perplexity, row));

    let scale = 2.0 * n as f64;
    let mut joint = vec![0.0_f64; n * n];
    for i in 0..n {
        for j in 0..n {
            if i != j {
                joint[i * n + j] =
                    ((conditional[i * n + j] + conditional[j * n + i]) / scale).max(MIN_PROBABILITY);
            }
        }
    }
    joint
}

/// Binary search the Gaussian precision so the row entropy matches `ln(perplexity)`
fn calibrate_row(distances: &[f64], i: usize, perplexity: f64, out: &mut [f64]) {
    let target = perplexity.ln();
    let nearest = distances
        .iter()
        .enumerate()
        .filter(|(j, _)| *j != i)
        .map(|(_, d)| *d)
        .fold(f64::INFINITY, f64::min);

    let mut beta = 1.0_f64;
    let mut beta_min = f64::NEG_INFINITY;
    let mut beta_max = f64::INFINITY;

    for _ in 0..MAX_BINARY_SEARCH_STEPS {
        let mut sum = 0.0;
        let mut weighted = 0.0;
        for (j, (slot, d)) in out.iter_mut().zip(distances).enumerate() {
            if j == i {
                *slot = 0.0;
                continue;
            }
            let shifted = d - nearest;
            let value = (-shifted * beta).exp();
            *slot = value;
            sum += value;
            weighted += shifted * value;
        }
        let sum = sum.max(f64::MIN_POSITIVE);
        let entropy = sum.ln() + beta * weighted / sum;
        let diff = entropy - target;

        if diff.abs() < PERPLEXITY_TOLERANCE {
            break;
        }

        if diff > 0.0 {
            beta_min = beta;
            beta = if beta_max.is_infinite() {
                beta * 2.0
            } else {
                (beta + beta_max) / 2.0
            };
        } else {
            beta_max = beta;
            beta = if beta_min.is_infinite() {
                beta / 2.0
            } else {
                (beta + beta_min) / 2.0
            };
        }
    }

    let total: f64 = out.iter().sum();
    if total > 0.0 {
        out.iter_mut().for_each(|v| *v /= total);
    }
}

fn student_t(y: &[f64], i: usize, j: usize) -> f64 {
    let dx = y[i * 2] - y[j * 2];
    let dy = y[i * 2 + 1] - y[j * 2 + 1];
    1.0 / (1.0 + dx * dx + dy * dy)
}

fn gradient(p: &[f64], y: &[f64], n: usize, exaggeration: f64) -> Vec<f64> {
    let normalizer: f64 = (0..n)
        .into_par_iter()
        .map(|i| {
            (0..n)
                .filter(|&j| j != i)
                .map(|j| student_t(y, i, j))
                .sum::<f64>()
        })
        .sum::<f64>()
        .max(f64::MIN_POSITIVE);

    let mut grad = vec![0.0_f64; n * 2];
    grad.par_chunks_mut(2).enumerate().for_each(|(i, g)| {
        for j in 0..n {
            if j == i {
                continue;
            }
            let num = student_t(y, i, j);
            let strength = 4.0 * (exaggeration * p[i * n + j] - num / normalizer) * num;
            g[0] += strength * (y[i * 2] - y[j * 2]);
            g[1] += strength * (y[i * 2 + 1] - y[j * 2 + 1]);
        }
    });
    grad
}

fn center(y: &mut [f64], n: usize) {
    let (sx, sy) = y
        .chunks_exact(2)
        .fold((0.0, 0.0), |(sx, sy), point| (sx + point[0], sy + point[1]));
    let (mx, my) = (sx / n as f64, sy / n as f64);
    for point in y.chunks_exact_mut(2) {
        point[0] -= mx;
        point[1] -= my;
    }
}
