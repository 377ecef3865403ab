use super::*;
use crate::embeddings::cosine_similarity;

fn corpus(lists: &[Vec<&str>]) -> Vec<PlaylistSequence> {
    lists
        .iter()
        .enumerate()
        .map(|(i, tracks)| PlaylistSequence {
            playlist_id: i as i64,
            track_ids: tracks.iter().map(|t| (*t).to_string()).collect(),
        })
        .collect()
}

fn test_config() -> EmbeddingConfig {
    EmbeddingConfig {
        vector_size: 16,
        window: 3,
        min_count: 2,
        workers: 1,
        epochs: 30,
        negative: 5,
        learning_rate: 0.05,
        seed: 7,
    }
}

/// Two groups of tracks that never share a playlist
fn clustered_corpus() -> Vec<PlaylistSequence> {
    let rock = ["r1", "r2", "r3", "r4", "r5"];
    let jazz = ["j1", "j2", "j3", "j4", "j5"];
    let mut lists = Vec::new();
    for i in 0..120 {
        let group = if i % 2 == 0 { &rock } else { &jazz };
        let rotated: Vec<&str> = (0..group.len())
            .map(|k| group[(k + i) % group.len()])
            .collect();
        lists.push(rotated);
    }
    corpus(&lists)
}

#[test]
fn vectors_have_configured_dimension() {
    let trainer = SkipGramTrainer::new(test_config());
    let model = trainer
        .train(&clustered_corpus())
        .expect("training succeeds");

    assert_eq!(model.len(), 10);
    assert_eq!(model.dimension(), 16);
    let vector = model.get("r1").expect("r1 is frequent");
    assert_eq!(vector.len(), 16);
    assert!(vector.iter().all(|v| v.is_finite()));
}

#[test]
fn rare_tracks_get_no_vector() {
    let input = corpus(&[vec!["a", "b", "rare"], vec!["a", "b"], vec!["b", "a"]]);
    let trainer = SkipGramTrainer::new(test_config());
    let model = trainer.train(&input).expect("training succeeds");

    assert!(model.contains("a"));
    assert!(model.contains("b"));
    assert!(model.get("rare").is_none());
}

#[test]
fn nothing_frequent_yields_empty_model() {
    let input = corpus(&[vec!["a", "b"], vec!["c", "d"]]);
    let trainer = SkipGramTrainer::new(test_config());
    let model = trainer.train(&input).expect("training succeeds");
    assert!(model.is_empty());
    assert_eq!(model.dimension(), 16);
}

#[test]
fn co_occurring_tracks_are_closer() {
    let trainer = SkipGramTrainer::new(test_config());
    let model = trainer
        .train(&clustered_corpus())
        .expect("training succeeds");

    let vec_of = |id: &str| model.get(id).expect("track is in vocabulary").to_vec();
    let rock: Vec<Vec<f32>> = ["r1", "r2", "r3", "r4", "r5"].map(vec_of).to_vec();
    let jazz: Vec<Vec<f32>> = ["j1", "j2", "j3", "j4", "j5"].map(vec_of).to_vec();

    let mut within = Vec::new();
    let mut across = Vec::new();
    for (i, a) in rock.iter().enumerate() {
        for b in rock.iter().skip(i + 1) {
            within.push(cosine_similarity(a, b));
        }
        for b in &jazz {
            across.push(cosine_similarity(a, b));
        }
    }

    let mean = |values: &[f32]| values.iter().sum::<f32>() / values.len() as f32;
    assert!(
        mean(&within) > mean(&across),
        "within {} should exceed across {}",
        mean(&within),
        mean(&across)
    );
}

#[test]
fn training_is_deterministic_with_multiple_workers() {
    let config = EmbeddingConfig {
        workers: 4,
        epochs: 3,
        ..test_config()
    };
    let first = SkipGramTrainer::new(config.clone())
        .train(&clustered_corpus())
        .expect("training succeeds");
    let second = SkipGramTrainer::new(config)
        .train(&clustered_corpus())
        .expect("training succeeds");

    for id in ["r1", "j3", "r5"] {
        assert_eq!(first.get(id), second.get(id));
    }
}

#[test]
fn vocabulary_orders_by_frequency_then_token() {
    let input = corpus(&[vec!["b", "a", "c"], vec!["c", "b"], vec!["c"]]);
    let vocabulary = Vocabulary::build(&input, 1);
    assert_eq!(vocabulary.tokens, vec!["c", "b", "a"]);
    assert_eq!(vocabulary.counts, vec![3, 2, 1]);
}

#[test]
fn negative_sampler_stays_in_range() {
    let sampler = NegativeSampler::new(&[10, 1, 1]);
    let mut rng = StdRng::seed_from_u64(1);
    let mut hits = [0_usize; 3];
    for _ in 0..1000 {
        hits[sampler.sample(&mut rng)] += 1;
    }
    assert!(hits[0] > hits[1]);
    assert!(hits[0] > hits[2]);
}
