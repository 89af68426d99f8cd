//! Seeded synthetic catalogs and sessions.
//!
//! A fixed subset of "liked" items is rated 4-5 and everything else 1-3, so a
//! policy trained on the sessions should move probability mass towards the
//! liked items.

use crate::catalog::{EmbeddingTable, Interaction, Session};
use crate::{Result, TreePgError};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

/// First synthetic item id.
pub const ITEM_ID_OFFSET: u64 = 1000;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticConfig {
    pub num_items: usize,
    pub embedding_dim: usize,
    pub num_sessions: usize,
    pub session_length: usize,
    /// Fraction of the catalog that users like
    pub liked_fraction: f64,
    /// Probability that a session step picks a liked item
    pub liked_probability: f64,
    pub seed: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            num_items: 16,
            embedding_dim: 8,
            num_sessions: 64,
            session_length: 40,
            liked_fraction: 0.25,
            liked_probability: 0.8,
            seed: 7,
        }
    }
}

impl SyntheticConfig {
    pub fn validate(&self) -> Result<()> {
        if self.num_items == 0 || self.embedding_dim == 0 || self.session_length < 2 {
            return Err(TreePgError::InvalidConfig(
                "synthetic data needs items, embeddings and sessions of length >= 2".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.liked_fraction)
            || !(0.0..=1.0).contains(&self.liked_probability)
        {
            return Err(TreePgError::InvalidConfig(
                "synthetic fractions must lie in [0, 1]".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct SyntheticData {
    pub embeddings: EmbeddingTable,
    pub sessions: Vec<Session>,
    /// Ids of the liked items
    pub liked: Vec<u64>,
}

impl SyntheticData {
    pub fn generate(config: &SyntheticConfig) -> Result<Self> {
        config.validate()?;
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);

        let items: Vec<u64> = (0..config.num_items as u64)
            .map(|i| ITEM_ID_OFFSET + i)
            .collect();

        let mut embeddings = EmbeddingTable::new(config.embedding_dim);
        for &item in &items {
            let row: Vec<f32> = (0..config.embedding_dim)
                .map(|_| rng.sample::<f32, _>(StandardNormal))
                .collect();
            embeddings.insert(item, row)?;
        }

        let liked_count = ((config.num_items as f64 * config.liked_fraction).round() as usize)
            .clamp(1, config.num_items);
        let mut shuffled = items.clone();
        shuffled.shuffle(&mut rng);
        let mut liked = shuffled[..liked_count].to_vec();
        liked.sort_unstable();
        let disliked: Vec<u64> = items
            .iter()
            .copied()
            .filter(|item| !liked.contains(item))
            .collect();

        let sessions = (0..config.num_sessions as u64)
            .map(|user_id| {
                let events = (0..config.session_length)
                    .map(|_| {
                        let pick_liked =
                            disliked.is_empty() || rng.gen_bool(config.liked_probability);
                        if pick_liked {
                            Interaction {
                                item_id: liked[rng.gen_range(0..liked.len())],
                                rating: rng.gen_range(4..=5) as f32,
                            }
                        } else {
                            Interaction {
                                item_id: disliked[rng.gen_range(0..disliked.len())],
                                rating: rng.gen_range(1..=3) as f32,
                            }
                        }
                    })
                    .collect();
                Session::new(user_id, events)
            })
            .collect();

        Ok(Self {
            embeddings,
            sessions,
            liked,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_is_seeded() {
        let config = SyntheticConfig::default();
        let a = SyntheticData::generate(&config).unwrap();
        let b = SyntheticData::generate(&config).unwrap();
        assert_eq!(a.sessions, b.sessions);
        assert_eq!(a.liked, b.liked);
        assert_eq!(a.embeddings.len(), config.num_items);
        assert_eq!(a.liked.len(), 4);
    }

    #[test]
    fn test_liked_items_rate_high() {
        let data = SyntheticData::generate(&SyntheticConfig::default()).unwrap();
        for event in data.sessions.iter().flat_map(|s| &s.events) {
            if data.liked.contains(&event.item_id) {
                assert!(event.rating >= 4.0);
            } else {
                assert!(event.rating <= 3.0);
            }
        }
    }
}
