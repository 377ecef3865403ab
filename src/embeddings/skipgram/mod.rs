#[cfg(test)]
mod tests;

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use super::{EmbeddingModel, SequenceEmbedder};
use crate::config::EmbeddingConfig;
use crate::pipeline::models::{PlaylistSequence, TrackId};
use crate::{RecsError, Result};

/// Smallest learning rate reached at the end of training, relative to the start
const MIN_LEARNING_RATE_RATIO: f32 = 1e-4;

/// Skip-gram with negative sampling over track sequences.
///
/// Each epoch is split into one shard per worker; shards train independent
/// copies of the weights on a rayon pool and the copies are averaged
/// before the next epoch. Seeding is per epoch and shard, so a given
/// configuration always produces the same vectors.
#[derive(Debug, Clone)]
pub struct SkipGramTrainer {
    config: EmbeddingConfig,
}

#[derive(Debug, Clone)]
struct Vocabulary {
    tokens: Vec<TrackId>,
    counts: Vec<u64>,
}

impl Vocabulary {
    /// Tokens with at least `min_count` occurrences, most frequent first
    fn build(corpus: &[PlaylistSequence], min_count: u64) -> Self {
        let mut counts: HashMap<&str, u64> = HashMap::new();
        for sequence in corpus {
            for track_id in &sequence.track_ids {
                *counts.entry(track_id.as_str()).or_default() += 1;
            }
        }

        let mut kept: Vec<(&str, u64)> = counts
            .into_iter()
            .filter(|(_, count)| *count >= min_count)
            .collect();
        kept.sort_unstable_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

        Self {
            tokens: kept.iter().map(|(token, _)| (*token).to_string()).collect(),
            counts: kept.iter().map(|(_, count)| *count).collect(),
        }
    }

    fn len(&self) -> usize {
        self.tokens.len()
    }

    fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    fn encode(&self, corpus: &[PlaylistSequence]) -> Vec<Vec<usize>> {
        let index: HashMap<&str, usize> = self
            .tokens
            .iter()
            .enumerate()
            .map(|(i, token)| (token.as_str(), i))
            .collect();

        corpus
            .iter()
            .map(|sequence| {
                sequence
                    .track_ids
                    .iter()
                    .filter_map(|track_id| index.get(track_id.as_str()).copied())
                    .collect::<Vec<_>>()
            })
            .filter(|encoded| encoded.len() > 1)
            .collect()
    }
}

/// Draws negative samples from the unigram distribution raised to 3/4
#[derive(Debug, Clone)]
struct NegativeSampler {
    cumulative: Vec<f64>,
}

impl NegativeSampler {
    fn new(counts: &[u64]) -> Self {
        let mut total = 0.0;
        let cumulative = counts
            .iter()
            .map(|&count| {
                total += (count as f64).powf(0.75);
                total
            })
            .collect();
        Self { cumulative }
    }

    fn sample(&self, rng: &mut StdRng) -> usize {
        let total = self.cumulative.last().copied().unwrap_or(0.0);
        let r = rng.random::<f64>() * total;
        self.cumulative
            .partition_point(|&c| c <= r)
            .min(self.cumulative.len().saturating_sub(1))
    }
}

#[derive(Debug, Clone)]
struct Weights {
    input: Vec<f32>,
    output: Vec<f32>,
}

impl Weights {
    fn initialize(vocab_size: usize, dimension: usize, rng: &mut StdRng) -> Self {
        let scale = 1.0 / dimension as f32;
        let input = (0..vocab_size * dimension)
            .map(|_| (rng.random::<f32>() - 0.5) * scale)
            .collect();
        Self {
            input,
            output: vec![0.0; vocab_size * dimension],
        }
    }

    fn average(shards: Vec<Self>) -> Option<Self> {
        let count = shards.len() as f32;
        let mut iter = shards.into_iter();
        let mut sum = iter.next()?;
        for shard in iter {
            for (acc, value) in sum.input.iter_mut().zip(&shard.input) {
                *acc += value;
            }
            for (acc, value) in sum.output.iter_mut().zip(&shard.output) {
                *acc += value;
            }
        }
        if count > 1.0 {
            sum.input.iter_mut().for_each(|v| *v /= count);
            sum.output.iter_mut().for_each(|v| *v /= count);
        }
        Some(sum)
    }
}

struct ShardParams<'a> {
    dimension: usize,
    window: usize,
    negative: usize,
    lr_start: f32,
    lr_end: f32,
    sampler: &'a NegativeSampler,
}

impl SkipGramTrainer {
    #[inline]
    pub fn new(config: EmbeddingConfig) -> Self {
        Self { config }
    }

    #[inline]
    pub fn config(&self) -> &EmbeddingConfig {
        &self.config
    }

    fn learning_rate_at(&self, progress: f32) -> f32 {
        let lr = self.config.learning_rate;
        (lr * (1.0 - progress)).max(lr * MIN_LEARNING_RATE_RATIO)
    }

    fn shard_seed(&self, epoch: usize, shard: usize) -> u64 {
        self.config
            .seed
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(((epoch as u64) << 32) | shard as u64)
    }
}

impl SequenceEmbedder for SkipGramTrainer {
    fn train(&self, corpus: &[PlaylistSequence]) -> Result<EmbeddingModel> {
        let dimension = self.config.vector_size as usize;
        let vocabulary = Vocabulary::build(corpus, u64::from(self.config.min_count));
        info!(
            "Training embedding model: {} tokens meet min_count={}",
            vocabulary.len(),
            self.config.min_count
        );

        if vocabulary.is_empty() {
            warn!("No track reaches the minimum frequency, returning an empty model");
            return Ok(EmbeddingModel::new(dimension));
        }

        let encoded = vocabulary.encode(corpus);
        let sampler = NegativeSampler::new(&vocabulary.counts);
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let mut weights = Weights::initialize(vocabulary.len(), dimension, &mut rng);

        let workers = (self.config.workers as usize).clamp(1, encoded.len().max(1));
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .map_err(|e| RecsError::Embedding(format!("Failed to build worker pool: {}", e)))?;
        let shard_size = encoded.len().div_ceil(workers).max(1);
        let epochs = self.config.epochs.max(1) as usize;

        for epoch in 0..epochs {
            let params = ShardParams {
                dimension,
                window: self.config.window as usize,
                negative: self.config.negative as usize,
                lr_start: self.learning_rate_at(epoch as f32 / epochs as f32),
                lr_end: self.learning_rate_at((epoch + 1) as f32 / epochs as f32),
                sampler: &sampler,
            };

            let shared = &weights;
            let trained: Vec<Weights> = pool.install(|| {
                encoded
                    .par_chunks(shard_size)
                    .enumerate()
                    .map(|(shard, sentences)| {
                        let mut rng = StdRng::seed_from_u64(self.shard_seed(epoch, shard));
                        train_shard(shared.clone(), sentences, &params, &mut rng)
                    })
                    .collect()
            });

            if let Some(averaged) = Weights::average(trained) {
                weights = averaged;
            }
            debug!("Finished epoch {}/{}", epoch + 1, epochs);
        }

        EmbeddingModel::from_parts(dimension, vocabulary.tokens, weights.input)
    }
}

fn train_shard(
    mut weights: Weights,
    sentences: &[Vec<usize>],
    params: &ShardParams<'_>,
    rng: &mut StdRng,
) -> Weights {
    let total_words: usize = sentences.iter().map(Vec::len).sum();
    let mut seen = 0_usize;
    let mut gradient = vec![0.0_f32; params.dimension];

    for sentence in sentences {
        for (position, &center) in sentence.iter().enumerate() {
            let progress = seen as f32 / total_words.max(1) as f32;
            let lr = (params.lr_end - params.lr_start).mul_add(progress, params.lr_start);
            seen += 1;

            // Reduced window, as in word2vec
            let reduce = rng.random_range(0..params.window.max(1));
            let span = params.window.saturating_sub(reduce).max(1);
            let start = position.saturating_sub(span);
            let end = (position + span + 1).min(sentence.len());

            for (offset, &context) in sentence[start..end].iter().enumerate() {
                if start + offset == position {
                    continue;
                }
                train_pair(&mut weights, center, context, params, lr, rng, &mut gradient);
            }
        }
    }

    weights
}

fn train_pair(
    weights: &mut Weights,
    center: usize,
    target: usize,
    params: &ShardParams<'_>,
    lr: f32,
    rng: &mut StdRng,
    gradient: &mut [f32],
) {
    let dim = params.dimension;
    let Weights { input, output } = weights;
    let l1 = center * dim;
    gradient.fill(0.0);

    for draw in 0..=params.negative {
        let (word, label) = if draw == 0 {
            (target, 1.0_f32)
        } else {
            let sample = params.sampler.sample(rng);
            if sample == target {
                continue;
            }
            (sample, 0.0_f32)
        };

        let l2 = word * dim;
        let score: f32 = input[l1..l1 + dim]
            .iter()
            .zip(&output[l2..l2 + dim])
            .map(|(a, b)| a * b)
            .sum();
        let g = (label - sigmoid(score)) * lr;

        for k in 0..dim {
            gradient[k] = g.mul_add(output[l2 + k], gradient[k]);
            output[l2 + k] = g.mul_add(input[l1 + k], output[l2 + k]);
        }
    }

    for (value, delta) in input[l1..l1 + dim].iter_mut().zip(gradient.iter()) {
        *value += delta;
    }
}

fn sigmoid(x: f32) -> f32 {
    if x > 6.0 {
        1.0
    } else if x < -6.0 {
        0.0
    } else {
        1.0 / (1.0 + (-x).exp())
    }
}
