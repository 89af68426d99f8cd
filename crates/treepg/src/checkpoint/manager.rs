//! Checkpoint manager for periodic saves, rotation and best-score tracking.

use super::state::Checkpointable;
use crate::Result;
use std::fs;
use std::path::{Path, PathBuf};

const PREFIX: &str = "checkpoint_update_";
const EXTENSION: &str = "json";
const BEST: &str = "checkpoint_best.json";

/// Configuration for checkpoint management.
#[derive(Clone, Debug)]
pub struct CheckpointConfig {
    /// Directory to store checkpoints
    pub checkpoint_dir: PathBuf,
    /// Save every N policy updates
    pub save_every: u64,
    /// Keep only the last N checkpoints (0 = keep all)
    pub keep_last: usize,
    /// Also keep a copy of the highest-scoring checkpoint
    pub save_best: bool,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            checkpoint_dir: PathBuf::from("checkpoints"),
            save_every: 100,
            keep_last: 3,
            save_best: true,
        }
    }
}

impl CheckpointConfig {
    pub fn new(checkpoint_dir: impl Into<PathBuf>) -> Self {
        Self {
            checkpoint_dir: checkpoint_dir.into(),
            ..Default::default()
        }
    }

    pub fn save_every(mut self, updates: u64) -> Self {
        self.save_every = updates;
        self
    }

    pub fn keep_last(mut self, n: usize) -> Self {
        self.keep_last = n;
        self
    }

    pub fn save_best(mut self, enabled: bool) -> Self {
        self.save_best = enabled;
        self
    }
}

/// Writes `Checkpointable` snapshots to `checkpoint_update_<n>.json` files.
///
/// ```ignore
/// let mut manager = CheckpointManager::new(CheckpointConfig::new("./ckpt").save_every(50))?;
/// manager.maybe_save(&policy, update, -loss)?;
/// manager.load_latest(&mut policy)?;
/// ```
pub struct CheckpointManager {
    config: CheckpointConfig,
    best_score: f64,
}

impl CheckpointManager {
    pub fn new(config: CheckpointConfig) -> Result<Self> {
        fs::create_dir_all(&config.checkpoint_dir)?;
        Ok(Self {
            config,
            best_score: f64::NEG_INFINITY,
        })
    }

    pub fn checkpoint_dir(&self) -> &Path {
        &self.config.checkpoint_dir
    }

    /// Save when `update` is a positive multiple of `save_every`.
    pub fn maybe_save<T: Checkpointable>(
        &mut self,
        component: &T,
        update: u64,
        score: f64,
    ) -> Result<Option<PathBuf>> {
        if update == 0 || self.config.save_every == 0 || update % self.config.save_every != 0 {
            return Ok(None);
        }
        self.save(component, update, score).map(Some)
    }

    pub fn save<T: Checkpointable>(
        &mut self,
        component: &T,
        update: u64,
        score: f64,
    ) -> Result<PathBuf> {
        let path = self
            .config
            .checkpoint_dir
            .join(format!("{}{:08}.{}", PREFIX, update, EXTENSION));
        fs::write(&path, component.save_state()?)?;
        tracing::info!(path = %path.display(), update, "Saved checkpoint");

        if self.config.save_best && score > self.best_score {
            self.best_score = score;
            fs::copy(&path, self.config.checkpoint_dir.join(BEST))?;
            tracing::info!(score, "New best checkpoint");
        }

        if self.config.keep_last > 0 {
            let checkpoints = self.list_checkpoints()?;
            let excess = checkpoints.len().saturating_sub(self.config.keep_last);
            for old in &checkpoints[..excess] {
                if let Err(e) = fs::remove_file(old) {
                    tracing::warn!(path = %old.display(), "Failed to remove old checkpoint: {}", e);
                }
            }
        }

        Ok(path)
    }

    /// Restore the most recent checkpoint, returning its update number.
    pub fn load_latest<T: Checkpointable>(&self, component: &mut T) -> Result<Option<u64>> {
        let Some(path) = self.list_checkpoints()?.pop() else {
            return Ok(None);
        };
        component.load_state(&fs::read(&path)?)?;
        let update = update_of(&path).unwrap_or(0);
        tracing::info!(path = %path.display(), update, "Loaded checkpoint");
        Ok(Some(update))
    }

    /// Restore the best checkpoint, if one was written.
    pub fn load_best<T: Checkpointable>(&self, component: &mut T) -> Result<bool> {
        let path = self.config.checkpoint_dir.join(BEST);
        if !path.exists() {
            return Ok(false);
        }
        component.load_state(&fs::read(&path)?)?;
        Ok(true)
    }

    /// Periodic checkpoints, oldest first.
    pub fn list_checkpoints(&self) -> Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(&self.config.checkpoint_dir) {
            Ok(entries) => entries,
            Err(_) => return Ok(Vec::new()),
        };
        let mut checkpoints: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| update_of(p).is_some())
            .collect();
        checkpoints.sort();
        Ok(checkpoints)
    }
}

fn update_of(path: &Path) -> Option<u64> {
    if path.extension()?.to_str()? != EXTENSION {
        return None;
    }
    path.file_stem()?
        .to_str()?
        .strip_prefix(PREFIX)?
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    struct Blob(Vec<u8>);

    impl Checkpointable for Blob {
        fn save_state(&self) -> Result<Vec<u8>> {
            Ok(self.0.clone())
        }

        fn load_state(&mut self, data: &[u8]) -> Result<()> {
            self.0 = data.to_vec();
            Ok(())
        }
    }

    #[test]
    fn test_maybe_save_respects_interval() {
        let dir = tempdir().unwrap();
        let mut manager =
            CheckpointManager::new(CheckpointConfig::new(dir.path()).save_every(4)).unwrap();
        let blob = Blob(vec![1]);

        assert!(manager.maybe_save(&blob, 0, 0.0).unwrap().is_none());
        assert!(manager.maybe_save(&blob, 3, 0.0).unwrap().is_none());
        assert!(manager.maybe_save(&blob, 4, 0.0).unwrap().is_some());
        assert!(manager.maybe_save(&blob, 8, 0.0).unwrap().is_some());
    }

    #[test]
    fn test_rotation_and_latest() {
        let dir = tempdir().unwrap();
        let config = CheckpointConfig::new(dir.path()).keep_last(2).save_best(false);
        let mut manager = CheckpointManager::new(config).unwrap();

        for update in 1..=4u8 {
            manager.save(&Blob(vec![update]), update as u64, 0.0).unwrap();
        }

        let kept = manager.list_checkpoints().unwrap();
        assert_eq!(kept.len(), 2);
        assert!(kept[0].to_string_lossy().ends_with("checkpoint_update_00000003.json"));

        let mut restored = Blob(vec![]);
        assert_eq!(manager.load_latest(&mut restored).unwrap(), Some(4));
        assert_eq!(restored.0, vec![4]);
    }

    #[test]
    fn test_best_tracks_highest_score() {
        let dir = tempdir().unwrap();
        let mut manager = CheckpointManager::new(CheckpointConfig::new(dir.path())).unwrap();

        manager.save(&Blob(vec![1]), 1, -2.0).unwrap();
        manager.save(&Blob(vec![2]), 2, -0.5).unwrap();
        manager.save(&Blob(vec![3]), 3, -1.0).unwrap();

        let mut best = Blob(vec![]);
        assert!(manager.load_best(&mut best).unwrap());
        assert_eq!(best.0, vec![2]);
    }

    #[test]
    fn test_empty_directory() {
        let dir = tempdir().unwrap();
        let manager = CheckpointManager::new(CheckpointConfig::new(dir.path())).unwrap();
        let mut blob = Blob(vec![7]);
        assert_eq!(manager.load_latest(&mut blob).unwrap(), None);
        assert!(!manager.load_best(&mut blob).unwrap());
        assert_eq!(blob.0, vec![7]);
    }
}
