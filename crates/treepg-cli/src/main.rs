//! treepg CLI
//!
//! Command-line interface for tree policy gradient experiments on synthetic
//! sessions.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use treepg::prelude::*;
use treepg::utils::{abbreviate, format_duration};

#[derive(Parser)]
#[command(name = "treepg")]
#[command(version, about = "treepg - Hierarchical policy gradient for recommendation", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a tree policy on synthetic sessions
    Train {
        /// JSON experiment config; flags override its fields
        #[arg(long)]
        config: Option<PathBuf>,

        /// Tree depth
        #[arg(long)]
        layer: Option<usize>,

        /// Children per internal node
        #[arg(long)]
        branch: Option<usize>,

        /// Parameter sharing mode (see `treepg modes`)
        #[arg(long)]
        sharing: Option<SharingMode>,

        /// Number of synthetic sessions
        #[arg(long)]
        sessions: Option<usize>,

        /// Policy learning rate
        #[arg(long)]
        lr: Option<f64>,

        /// Seed for data, encoder and policy
        #[arg(long)]
        seed: Option<u64>,

        /// Save policy checkpoints to this directory
        #[arg(long)]
        checkpoint_dir: Option<PathBuf>,

        /// Checkpoint every N policy updates
        #[arg(long, default_value = "10")]
        checkpoint_every: u64,

        /// Write the final policy parameters as safetensors
        #[arg(long)]
        save: Option<PathBuf>,

        /// Show a progress bar
        #[arg(long)]
        progress: bool,
    },

    /// Show action space and parameter counts for a tree shape
    Info {
        /// Tree depth
        #[arg(long, default_value = "3")]
        layer: usize,

        /// Children per internal node
        #[arg(long, default_value = "32")]
        branch: usize,

        /// State width
        #[arg(long, default_value = "64")]
        state_dim: usize,

        /// Hidden width of node networks
        #[arg(long, default_value = "64")]
        hidden: usize,
    },

    /// List parameter sharing modes
    Modes,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Train {
            config,
            layer,
            branch,
            sharing,
            sessions,
            lr,
            seed,
            checkpoint_dir,
            checkpoint_every,
            save,
            progress,
        } => {
            let mut experiment = match config {
                Some(path) => ExperimentConfig::from_json_file(&path)
                    .with_context(|| format!("reading config {}", path.display()))?,
                None => ExperimentConfig::default(),
            };
            if let Some(layer) = layer {
                experiment.policy.layer = layer;
            }
            if let Some(branch) = branch {
                experiment.policy.branch = branch;
            }
            if let Some(sharing) = sharing {
                experiment.policy.sharing = sharing;
            }
            if let Some(sessions) = sessions {
                experiment.synthetic.num_sessions = sessions;
            }
            if let Some(lr) = lr {
                experiment.policy.learning_rate = lr;
            }
            if let Some(seed) = seed {
                experiment.policy.seed = seed;
                experiment.encoder.seed = seed;
                experiment.synthetic.seed = seed;
            }
            if let Some(dir) = checkpoint_dir {
                experiment.trainer.checkpoint_dir = dir;
                experiment.trainer.checkpoint_interval = checkpoint_every;
            }
            experiment.trainer.show_progress |= progress;

            train(experiment.aligned(), save)?;
        }
        Commands::Info {
            layer,
            branch,
            state_dim,
            hidden,
        } => {
            info(layer, branch, state_dim, hidden)?;
        }
        Commands::Modes => {
            list_modes();
        }
    }

    Ok(())
}

fn train(experiment: ExperimentConfig, save: Option<PathBuf>) -> Result<()> {
    experiment.validate()?;
    tracing::info!(
        layer = experiment.policy.layer,
        branch = experiment.policy.branch,
        sharing = %experiment.policy.sharing,
        sessions = experiment.synthetic.num_sessions,
        lr = experiment.policy.learning_rate,
        "Starting training"
    );

    let data = SyntheticData::generate(&experiment.synthetic)?;
    let mut trainer = SessionTrainer::from_experiment(&experiment, &data, Device::Cpu)?
        .with_logger(Box::new(ConsoleLogger::new()));

    let report = trainer.run(&data.sessions)?;
    let precision = data
        .sessions
        .iter()
        .map(|session| trainer.evaluate(session, 5).map(|m| m.precision))
        .collect::<treepg::Result<Vec<_>>>()?;
    trainer.close();
    let mean_precision = if precision.is_empty() {
        0.0
    } else {
        precision.iter().sum::<f32>() / precision.len() as f32
    };

    println!("Training complete:");
    println!("  Updates: {}", report.updates());
    println!("  Transitions: {}", report.transitions);
    if let Some(loss) = report.recent_loss(10) {
        println!("  Final loss: {:.4}", loss);
    }
    println!("  Precision@5 (training sessions): {:.3}", mean_precision);
    println!("  Time: {}", format_duration(report.elapsed_secs));

    if let Some(path) = save {
        trainer.policy().save(&path)?;
        println!("  Saved policy to {}", path.display());
    }
    Ok(())
}

fn info(layer: usize, branch: usize, state_dim: usize, hidden: usize) -> Result<()> {
    let base = TreePolicyConfig {
        layer,
        branch,
        state_dim,
        hidden_size: hidden,
        ..Default::default()
    };
    base.validate()?;
    let actions = base
        .action_space()
        .context("action space overflows usize")?;

    println!("Tree: layer {} x branch {}", layer, branch);
    println!("  Action space: {} ({})", actions, abbreviate(actions as u64));
    println!("  Parameters per sharing mode:");
    for sharing in SharingMode::ALL {
        let policy = TreePolicy::new(TreePolicyConfig { sharing, ..base.clone() }, Device::Cpu)?;
        let params = policy.num_parameters();
        println!("    {:<18} {:>10} ({})", sharing.name(), params, abbreviate(params as u64));
    }
    Ok(())
}

fn list_modes() {
    println!("Sharing modes:");
    for sharing in SharingMode::ALL {
        let default = if sharing == SharingMode::default() {
            " (default)"
        } else {
            ""
        };
        println!("  {:<18} - {}{}", sharing.name(), sharing.description(), default);
    }
}
