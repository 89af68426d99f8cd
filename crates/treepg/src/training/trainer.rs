//! Session replay training loop.

use super::batch::TransitionBatch;
use super::config::{ExperimentConfig, TrainerConfig};
use crate::catalog::{EmbeddingTable, Interaction, ItemIndex, Session};
use crate::checkpoint::{CheckpointConfig, CheckpointManager};
use crate::eval::{evaluate_session, SessionMetrics};
use crate::log::{MetricLogger, NoOpLogger};
use crate::policy::{LstmEncoder, StateEncoder, TreePolicy};
use crate::synthetic::SyntheticData;
use crate::utils::moving_average;
use crate::{Result, TreePgError};
use candle_core::{Device, Tensor};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Instant;

/// Outcome of a training run
#[derive(Clone, Debug, Default)]
pub struct TrainingReport {
    /// Encoder pre-training losses, one per session
    pub pretrain_losses: Vec<f32>,
    /// Policy losses, one per update
    pub losses: Vec<f32>,
    /// Transitions fed to the policy
    pub transitions: usize,
    /// Transitions discarded at session ends
    pub dropped: usize,
    pub elapsed_secs: f64,
}

impl TrainingReport {
    pub fn updates(&self) -> usize {
        self.losses.len()
    }

    /// Mean of the last `window` policy losses.
    pub fn recent_loss(&self, window: usize) -> Option<f32> {
        moving_average(&self.losses, window).last().copied()
    }
}

/// Replays sessions through a state encoder and trains a [`TreePolicy`].
///
/// Step `t >= 1` of a session yields the state of history `[0, t)`, the leaf
/// of item `t`, and the normalized rating of item `t` as reward. A policy
/// update happens whenever `batch_size` transitions have accumulated.
pub struct SessionTrainer<E: StateEncoder> {
    config: TrainerConfig,
    policy: TreePolicy,
    encoder: E,
    embeddings: EmbeddingTable,
    index: ItemIndex,
    batch: TransitionBatch,
    logger: Box<dyn MetricLogger>,
    checkpoints: Option<CheckpointManager>,
    updates: u64,
}

impl<E: StateEncoder> SessionTrainer<E> {
    pub fn new(
        policy: TreePolicy,
        encoder: E,
        embeddings: EmbeddingTable,
        index: ItemIndex,
        config: TrainerConfig,
    ) -> Result<Self> {
        config.validate()?;
        if encoder.state_dim() != policy.config().state_dim {
            return Err(TreePgError::InvalidConfig(format!(
                "encoder produces {}-wide states, policy expects {}",
                encoder.state_dim(),
                policy.config().state_dim
            )));
        }
        if embeddings.dim() + 1 != encoder.input_dim() {
            return Err(TreePgError::InvalidConfig(format!(
                "encoder input width {} does not fit {}-wide embeddings plus rating",
                encoder.input_dim(),
                embeddings.dim()
            )));
        }
        if index.capacity() > policy.action_space() {
            return Err(TreePgError::InvalidConfig(format!(
                "item index capacity {} exceeds the {} policy leaves",
                index.capacity(),
                policy.action_space()
            )));
        }

        let checkpoints = if config.checkpoint_interval > 0 {
            Some(CheckpointManager::new(
                CheckpointConfig::new(&config.checkpoint_dir).save_every(config.checkpoint_interval),
            )?)
        } else {
            None
        };

        let batch = TransitionBatch::new(encoder.state_dim());
        Ok(Self {
            config,
            policy,
            encoder,
            embeddings,
            index,
            batch,
            logger: Box::new(NoOpLogger),
            checkpoints,
            updates: 0,
        })
    }

    pub fn with_logger(mut self, logger: Box<dyn MetricLogger>) -> Self {
        self.logger = logger;
        self
    }

    /// Replace the checkpoint manager derived from `checkpoint_interval`.
    pub fn with_checkpoints(mut self, manager: CheckpointManager) -> Self {
        self.checkpoints = Some(manager);
        self
    }

    pub fn policy(&self) -> &TreePolicy {
        &self.policy
    }

    pub fn encoder(&self) -> &E {
        &self.encoder
    }

    pub fn index(&self) -> &ItemIndex {
        &self.index
    }

    pub fn updates(&self) -> u64 {
        self.updates
    }

    /// Flush and close the metric logger once training is over.
    pub fn close(&self) {
        self.logger.close();
    }

    pub fn into_parts(self) -> (TreePolicy, E) {
        (self.policy, self.encoder)
    }

    /// Pre-train the encoder on next-rating prediction over the first
    /// `pretrain_sessions` sessions, then train the policy on all of them.
    pub fn run(&mut self, sessions: &[Session]) -> Result<TrainingReport> {
        let pretrain = &sessions[..self.config.pretrain_sessions.min(sessions.len())];
        let pretrain_losses = self.pretrain(pretrain)?;
        let mut report = self.train(sessions)?;
        report.pretrain_losses = pretrain_losses;
        Ok(report)
    }

    /// One encoder fitting step per session.
    pub fn pretrain(&mut self, sessions: &[Session]) -> Result<Vec<f32>> {
        let mut losses = Vec::new();
        for session in sessions.iter().filter(|s| s.len() >= 2) {
            let steps = self.steps(&session.events)?;
            let histories: Vec<&[Vec<f32>]> = (1..steps.len()).map(|t| &steps[..t]).collect();
            let targets: Vec<f32> = session.events[1..].iter().map(|e| e.rating).collect();
            let (padded, lengths) = self.encoder.pad_batch(&histories)?;

            if let Some(loss) = self.encoder.fit(&padded, &lengths, &targets)? {
                tracing::debug!(user = session.user_id, mse = loss, "Pre-trained encoder");
                losses.push(loss);
            }
        }
        if let Some(last) = losses.last() {
            tracing::info!(sessions = losses.len(), mse = *last, "Encoder pre-training done");
        }
        Ok(losses)
    }

    /// Train the policy over `sessions`.
    pub fn train(&mut self, sessions: &[Session]) -> Result<TrainingReport> {
        let start = Instant::now();
        let mut report = TrainingReport::default();
        let progress = self.progress_bar(sessions.len() as u64);

        for session in sessions {
            if session.len() < 2 {
                continue;
            }
            let states = self.session_states(&session.events)?;

            for (event, state) in session.events[1..].iter().zip(&states) {
                let action = self.leaf(event.item_id)?;
                let reward = self.config.rating_scale.normalize(event.rating);
                self.batch.push(state, action, reward)?;

                if self.batch.len() >= self.config.batch_size {
                    report.transitions += self.batch.len();
                    report.losses.push(self.flush()?);
                }
            }

            if !self.batch.is_empty() {
                if self.config.drop_partial {
                    report.dropped += self.batch.len();
                    self.batch.clear();
                } else {
                    report.transitions += self.batch.len();
                    report.losses.push(self.flush()?);
                }
            }

            if let Some(pb) = &progress {
                pb.inc(1);
                if let Some(loss) = report.losses.last() {
                    pb.set_message(format!("Loss: {:.4} Updates: {}", loss, self.updates));
                }
            }
        }

        if let Some(pb) = progress {
            pb.finish_and_clear();
        }

        report.elapsed_secs = start.elapsed().as_secs_f64();
        tracing::info!(
            updates = report.updates(),
            transitions = report.transitions,
            dropped = report.dropped,
            "Policy training done"
        );
        Ok(report)
    }

    /// Apply one policy update on the accumulated transitions.
    fn flush(&mut self) -> Result<f32> {
        let returns = self.batch.returns(self.config.gamma);
        let returns = returns.to_vec();
        let states = self.batch.states_tensor(self.policy.device())?;
        let loss = self.policy.train(&states, self.batch.actions(), &returns)?;

        self.updates += 1;
        let mean_return = returns.iter().sum::<f32>() / returns.len() as f32;
        self.logger.log_scalar("policy_loss", loss as f64, self.updates);
        self.logger.log_scalar("mean_return", mean_return as f64, self.updates);

        if let Some(manager) = self.checkpoints.as_mut() {
            manager.maybe_save(&self.policy, self.updates, -(loss as f64))?;
        }

        self.batch.clear();
        Ok(loss)
    }

    /// Item ids of the `k` most probable catalog leaves after `history`.
    pub fn recommend(&self, history: &[Interaction], k: usize) -> Result<Vec<u64>> {
        let steps = self.steps(history)?;
        let (padded, lengths) = self.encoder.pad_batch(&[steps.as_slice()])?;
        let state = self.encoder.encode(&padded, &lengths)?;
        let leaves = self.policy.top_k(&state, k, self.index.len())?;
        Ok(leaves
            .into_iter()
            .filter_map(|leaf| self.index.item(leaf))
            .collect())
    }

    /// Replay one held-out session, recommending before every step `t >= 1`,
    /// and score the recommendations at `top_n`.
    pub fn evaluate(&self, session: &Session, top_n: usize) -> Result<SessionMetrics> {
        if session.len() < 2 {
            return Ok(SessionMetrics::default());
        }
        let states = self.session_states(&session.events)?;

        let mut recommendations = Vec::with_capacity(states.len());
        for row in &states {
            let state = Tensor::new(row.as_slice(), self.policy.device())?;
            let leaves = self.policy.top_k(&state, top_n, self.index.len())?;
            recommendations.push(
                leaves
                    .into_iter()
                    .filter_map(|leaf| self.index.item(leaf))
                    .collect::<Vec<_>>(),
            );
        }

        let items: Vec<u64> = session.events[1..].iter().map(|e| e.item_id).collect();
        let ratings: Vec<f32> = session.events[1..].iter().map(|e| e.rating).collect();
        evaluate_session(
            &recommendations,
            &items,
            &ratings,
            top_n,
            &self.config.rating_scale,
        )
    }

    fn steps(&self, events: &[Interaction]) -> Result<Vec<Vec<f32>>> {
        events.iter().map(|e| self.embeddings.step(e)).collect()
    }

    fn leaf(&self, item_id: u64) -> Result<usize> {
        self.index.leaf(item_id).ok_or_else(|| {
            TreePgError::InvalidInput(format!("item {} is not in the index", item_id))
        })
    }

    /// Encoded states of every prefix `[0, t)` for `t` in `1..len`.
    fn session_states(&self, events: &[Interaction]) -> Result<Vec<Vec<f32>>> {
        let steps = self.steps(events)?;
        let histories: Vec<&[Vec<f32>]> = (1..steps.len()).map(|t| &steps[..t]).collect();
        let (padded, lengths) = self.encoder.pad_batch(&histories)?;
        Ok(self.encoder.encode(&padded, &lengths)?.to_vec2::<f32>()?)
    }

    fn progress_bar(&self, sessions: u64) -> Option<ProgressBar> {
        if !self.config.show_progress || sessions == 0 {
            return None;
        }
        let pb = ProgressBar::new(sessions);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
        {
            pb.set_style(style.progress_chars("#>-"));
        }
        Some(pb)
    }
}

impl SessionTrainer<LstmEncoder> {
    /// Build the policy, encoder and item index of a synthetic experiment.
    pub fn from_experiment(
        config: &ExperimentConfig,
        data: &SyntheticData,
        device: Device,
    ) -> Result<Self> {
        config.validate()?;
        let policy = TreePolicy::new(config.policy.clone(), device.clone())?;
        let encoder = LstmEncoder::new(config.encoder.clone(), device)?;
        let index = ItemIndex::from_sessions(policy.action_space(), &data.sessions)?;
        Self::new(
            policy,
            encoder,
            data.embeddings.clone(),
            index,
            config.trainer.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::MemoryLogger;
    use crate::policy::{EncoderConfig, TreePolicyConfig};
    use crate::synthetic::SyntheticConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct CloseCounter {
        scalars: AtomicUsize,
        closes: AtomicUsize,
    }

    impl MetricLogger for CloseCounter {
        fn log_scalar(&self, _name: &str, _value: f64, _step: u64) {
            self.scalars.fetch_add(1, Ordering::SeqCst);
        }

        fn close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn experiment(sessions: usize) -> (ExperimentConfig, SyntheticData) {
        let config = ExperimentConfig {
            policy: TreePolicyConfig {
                layer: 2,
                branch: 4,
                hidden_size: 8,
                learning_rate: 1e-2,
                ..Default::default()
            },
            encoder: EncoderConfig {
                max_seq_length: 8,
                hidden_size: 6,
                ..Default::default()
            },
            trainer: TrainerConfig {
                batch_size: 4,
                pretrain_sessions: 2,
                ..Default::default()
            },
            synthetic: SyntheticConfig {
                num_items: 16,
                embedding_dim: 4,
                num_sessions: sessions,
                session_length: 12,
                ..Default::default()
            },
        }
        .aligned();
        let data = SyntheticData::generate(&config.synthetic).unwrap();
        (config, data)
    }

    #[test]
    fn test_batches_flush_at_batch_size() {
        let (config, data) = experiment(4);
        let logger = Arc::new(MemoryLogger::new());
        let mut trainer = SessionTrainer::from_experiment(&config, &data, Device::Cpu)
            .unwrap()
            .with_logger(Box::new(logger.clone()));

        let report = trainer.run(&data.sessions).unwrap();
        // 11 transitions per session: two full batches, three left over
        assert_eq!(report.updates(), 8);
        assert_eq!(report.transitions, 32);
        assert_eq!(report.dropped, 12);
        assert_eq!(report.pretrain_losses.len(), 2);
        assert_eq!(trainer.updates(), 8);
        assert_eq!(trainer.policy().steps(), 8);
        assert_eq!(logger.series("policy_loss").len(), 8);
        assert!(report.losses.iter().all(|l| l.is_finite()));
    }

    #[test]
    fn test_logger_closed_only_by_owner() {
        let (config, data) = experiment(2);
        let logger = Arc::new(CloseCounter::default());
        let mut trainer = SessionTrainer::from_experiment(&config, &data, Device::Cpu)
            .unwrap()
            .with_logger(Box::new(logger.clone()));

        trainer.run(&data.sessions).unwrap();
        trainer.train(&data.sessions).unwrap();
        assert_eq!(logger.closes.load(Ordering::SeqCst), 0);
        assert!(logger.scalars.load(Ordering::SeqCst) > 0);

        trainer.close();
        assert_eq!(logger.closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_partial_batches_can_be_kept() {
        let (mut config, data) = experiment(2);
        config.trainer.drop_partial = false;
        let mut trainer = SessionTrainer::from_experiment(&config, &data, Device::Cpu).unwrap();

        let report = trainer.train(&data.sessions).unwrap();
        assert_eq!(report.updates(), 6);
        assert_eq!(report.transitions, 22);
        assert_eq!(report.dropped, 0);
    }

    #[test]
    fn test_rejects_mismatched_encoder() {
        let (config, data) = experiment(1);
        let policy = TreePolicy::new(config.policy.clone(), Device::Cpu).unwrap();
        let encoder = LstmEncoder::new(
            EncoderConfig {
                hidden_size: config.encoder.hidden_size + 1,
                ..config.encoder.clone()
            },
            Device::Cpu,
        )
        .unwrap();
        let index = ItemIndex::new(policy.action_space());
        let result = SessionTrainer::new(
            policy,
            encoder,
            data.embeddings.clone(),
            index,
            config.trainer.clone(),
        );
        assert!(matches!(result, Err(TreePgError::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_unknown_items() {
        let (config, data) = experiment(1);
        let policy = TreePolicy::new(config.policy.clone(), Device::Cpu).unwrap();
        let encoder = LstmEncoder::new(config.encoder.clone(), Device::Cpu).unwrap();
        let mut trainer = SessionTrainer::new(
            policy,
            encoder,
            data.embeddings.clone(),
            ItemIndex::new(16),
            config.trainer.clone(),
        )
        .unwrap();
        assert!(trainer.train(&data.sessions).is_err());
    }

    #[test]
    fn test_recommend_and_evaluate() {
        let (config, data) = experiment(2);
        let trainer = SessionTrainer::from_experiment(&config, &data, Device::Cpu).unwrap();
        let session = &data.sessions[0];

        let items = trainer.recommend(&session.events[..3], 3).unwrap();
        assert_eq!(items.len(), 3.min(trainer.index().len()));
        assert!(items.iter().all(|item| trainer.index().leaf(*item).is_some()));

        let metrics = trainer.evaluate(session, 5).unwrap();
        assert!((0.0..=1.0).contains(&metrics.precision));
        assert!((0.0..=1.0).contains(&metrics.recall));
        assert!((0.0..=1.0).contains(&metrics.mrr));
    }

    #[test]
    fn test_checkpoint_interval_writes_files() {
        let dir = tempfile::tempdir().unwrap();
        let (mut config, data) = experiment(2);
        config.trainer.checkpoint_interval = 2;
        config.trainer.checkpoint_dir = dir.path().to_path_buf();
        let mut trainer = SessionTrainer::from_experiment(&config, &data, Device::Cpu).unwrap();

        trainer.train(&data.sessions).unwrap();
        let saved = std::fs::read_dir(dir.path()).unwrap().count();
        // updates 2 and 4, plus the best copy
        assert_eq!(saved, 3);
    }
}
