//! Item catalog: sessions, item-id to leaf mapping, and item embeddings.

use crate::{Result, TreePgError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One rated item in a session.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub item_id: u64,
    pub rating: f32,
}

/// Chronological interactions of one user.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: u64,
    pub events: Vec<Interaction>,
}

impl Session {
    pub fn new(user_id: u64, events: Vec<Interaction>) -> Self {
        Self { user_id, events }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Maps item ids to policy leaves in order of first registration.
#[derive(Clone, Debug, Default)]
pub struct ItemIndex {
    capacity: usize,
    items: Vec<u64>,
    leaves: HashMap<u64, usize>,
}

impl ItemIndex {
    /// An empty index holding at most `capacity` items (the policy's action space).
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            items: Vec::new(),
            leaves: HashMap::new(),
        }
    }

    /// Register every item of `sessions`, in session order.
    pub fn from_sessions(capacity: usize, sessions: &[Session]) -> Result<Self> {
        let mut index = Self::new(capacity);
        for event in sessions.iter().flat_map(|s| &s.events) {
            index.insert(event.item_id)?;
        }
        Ok(index)
    }

    /// Leaf of `item_id`, registering it if new.
    pub fn insert(&mut self, item_id: u64) -> Result<usize> {
        if let Some(&leaf) = self.leaves.get(&item_id) {
            return Ok(leaf);
        }
        if self.items.len() >= self.capacity {
            return Err(TreePgError::InvalidInput(format!(
                "catalog exceeds the {} available leaves",
                self.capacity
            )));
        }
        let leaf = self.items.len();
        self.items.push(item_id);
        self.leaves.insert(item_id, leaf);
        Ok(leaf)
    }

    pub fn leaf(&self, item_id: u64) -> Option<usize> {
        self.leaves.get(&item_id).copied()
    }

    pub fn item(&self, leaf: usize) -> Option<u64> {
        self.items.get(leaf).copied()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Fixed-width item embeddings, assumed static during policy training.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmbeddingTable {
    dim: usize,
    rows: HashMap<u64, Vec<f32>>,
}

impl EmbeddingTable {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            rows: HashMap::new(),
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn insert(&mut self, item_id: u64, embedding: Vec<f32>) -> Result<()> {
        if embedding.len() != self.dim {
            return Err(TreePgError::InvalidInput(format!(
                "embedding for item {} has width {}, expected {}",
                item_id,
                embedding.len(),
                self.dim
            )));
        }
        self.rows.insert(item_id, embedding);
        Ok(())
    }

    pub fn get(&self, item_id: u64) -> Option<&[f32]> {
        self.rows.get(&item_id).map(Vec::as_slice)
    }

    /// History step for an interaction: the item embedding followed by the rating.
    pub fn step(&self, event: &Interaction) -> Result<Vec<f32>> {
        let embedding = self.get(event.item_id).ok_or_else(|| {
            TreePgError::InvalidInput(format!("no embedding for item {}", event.item_id))
        })?;
        let mut step = Vec::with_capacity(self.dim + 1);
        step.extend_from_slice(embedding);
        step.push(event.rating);
        Ok(step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(user_id: u64, items: &[u64]) -> Session {
        Session::new(
            user_id,
            items
                .iter()
                .map(|&item_id| Interaction {
                    item_id,
                    rating: 4.0,
                })
                .collect(),
        )
    }

    #[test]
    fn test_index_assigns_leaves_in_first_seen_order() {
        let sessions = vec![session(1, &[30, 10, 30]), session(2, &[20, 10])];
        let index = ItemIndex::from_sessions(8, &sessions).unwrap();

        assert_eq!(index.len(), 3);
        assert_eq!(index.leaf(30), Some(0));
        assert_eq!(index.leaf(10), Some(1));
        assert_eq!(index.leaf(20), Some(2));
        assert_eq!(index.item(2), Some(20));
        assert_eq!(index.leaf(99), None);
    }

    #[test]
    fn test_index_rejects_overflow() {
        let mut index = ItemIndex::new(2);
        index.insert(1).unwrap();
        index.insert(2).unwrap();
        assert_eq!(index.insert(1).unwrap(), 0);
        assert!(matches!(index.insert(3), Err(TreePgError::InvalidInput(_))));
    }

    #[test]
    fn test_embedding_step() {
        let mut table = EmbeddingTable::new(2);
        table.insert(5, vec![0.1, 0.2]).unwrap();
        assert!(table.insert(6, vec![0.1]).is_err());

        let step = table
            .step(&Interaction {
                item_id: 5,
                rating: 3.0,
            })
            .unwrap();
        assert_eq!(step, vec![0.1, 0.2, 3.0]);
        assert!(table
            .step(&Interaction {
                item_id: 6,
                rating: 1.0
            })
            .is_err());
    }
}
