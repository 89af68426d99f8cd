//! Tree node networks and their arrangement per sharing mode.

use super::config::{SharingMode, TreePolicyConfig};
use crate::Result;
use candle_core::{DType, Module, Tensor, D};
use candle_nn::{linear, Linear, VarBuilder};

/// `dense(state -> hidden, relu) -> dense(hidden -> branch)`, producing logits.
pub(crate) struct NodeNet {
    hidden: Linear,
    head: Linear,
}

impl NodeNet {
    fn new(vb: VarBuilder, state_dim: usize, hidden_size: usize, branch: usize) -> Result<Self> {
        Ok(Self {
            hidden: linear(state_dim, hidden_size, vb.pp("hidden"))?,
            head: linear(hidden_size, branch, vb.pp("head"))?,
        })
    }

    fn logits(&self, xs: &Tensor) -> Result<Tensor> {
        let hidden = self.hidden.forward(xs)?.relu()?;
        Ok(self.head.forward(&hidden)?)
    }
}

/// Per-position head turning base logits into a local distribution.
pub(crate) struct Refiner {
    dense: Linear,
    head: Linear,
}

impl Refiner {
    fn new(vb: VarBuilder, branch: usize) -> Result<Self> {
        Ok(Self {
            dense: linear(branch, branch, vb.pp("dense"))?,
            head: linear(branch, branch, vb.pp("head"))?,
        })
    }

    fn forward(&self, logits: &Tensor) -> Result<Tensor> {
        let hidden = self.dense.forward(logits)?.relu()?;
        local_softmax(&self.head.forward(&hidden)?)
    }
}

fn local_softmax(logits: &Tensor) -> Result<Tensor> {
    Ok(candle_nn::ops::softmax(logits, D::Minus1)?)
}

/// Which node networks feed one depth.
enum Base {
    /// One network evaluated once and used for every position.
    Shared(usize),
    /// One network per position, in position order.
    PerPosition(Vec<usize>),
}

struct Level {
    base: Base,
    /// Empty, or one refiner per position.
    refiners: Vec<Refiner>,
}

/// Owned parameter blocks of a tree policy, resolved from the sharing mode.
pub(crate) struct TreeLayout {
    nets: Vec<NodeNet>,
    levels: Vec<Level>,
}

impl TreeLayout {
    pub(crate) fn build(config: &TreePolicyConfig, vb: VarBuilder) -> Result<Self> {
        let TreePolicyConfig {
            layer,
            branch,
            state_dim,
            hidden_size,
            sharing,
            ..
        } = *config;
        let node = |name: String| NodeNet::new(vb.pp(name), state_dim, hidden_size, branch);

        let mut nets = Vec::new();
        let mut levels = Vec::with_capacity(layer);

        match sharing {
            SharingMode::Global | SharingMode::GlobalRefined => {
                nets.push(node("node".to_string())?);
            }
            SharingMode::PerDepth | SharingMode::PerDepthRefined => {
                for depth in 0..layer {
                    nets.push(node(format!("node_{}", depth))?);
                }
            }
            SharingMode::PerNode => {}
        }

        let mut positions = 1usize;
        for depth in 0..layer {
            let base = match sharing {
                SharingMode::Global | SharingMode::GlobalRefined => Base::Shared(0),
                SharingMode::PerDepth | SharingMode::PerDepthRefined => Base::Shared(depth),
                SharingMode::PerNode => {
                    let first = nets.len();
                    for position in 0..positions {
                        nets.push(node(format!("node_{}_{}", depth, position))?);
                    }
                    Base::PerPosition((first..nets.len()).collect())
                }
            };

            let refiners = if sharing.is_refined() && depth > 0 {
                (0..positions)
                    .map(|position| {
                        Refiner::new(vb.pp(format!("refine_{}_{}", depth, position)), branch)
                    })
                    .collect::<Result<Vec<_>>>()?
            } else {
                Vec::new()
            };

            levels.push(Level { base, refiners });
            positions *= branch;
        }

        Ok(Self { nets, levels })
    }

    /// Joint leaf distribution `[N, branch^layer]` for a validated `[N, D]` batch.
    pub(crate) fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let n = xs.dim(0)?;
        let mut shared_logits: Vec<Option<Tensor>> = vec![None; self.nets.len()];
        let mut joint = Tensor::ones((n, 1), DType::F32, xs.device())?;

        for level in &self.levels {
            // [N, P, B] or [N, 1, B] when every position shares one distribution
            let local = match &level.base {
                Base::Shared(idx) => {
                    let logits = match &shared_logits[*idx] {
                        Some(logits) => logits.clone(),
                        None => {
                            let logits = self.nets[*idx].logits(xs)?;
                            shared_logits[*idx] = Some(logits.clone());
                            logits
                        }
                    };
                    if level.refiners.is_empty() {
                        local_softmax(&logits)?.unsqueeze(1)?
                    } else {
                        let blocks = level
                            .refiners
                            .iter()
                            .map(|refiner| refiner.forward(&logits))
                            .collect::<Result<Vec<_>>>()?;
                        Tensor::stack(&blocks, 1)?
                    }
                }
                Base::PerPosition(idxs) => {
                    let blocks = idxs
                        .iter()
                        .map(|&idx| local_softmax(&self.nets[idx].logits(xs)?))
                        .collect::<Result<Vec<_>>>()?;
                    Tensor::stack(&blocks, 1)?
                }
            };

            let (positions, branch) = (joint.dim(1)?, local.dim(2)?);
            joint = joint
                .unsqueeze(2)?
                .broadcast_mul(&local)?
                .reshape((n, positions * branch))?;
        }

        Ok(joint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use candle_nn::VarMap;

    fn build_layout(sharing: SharingMode, branch: usize, layer: usize) -> (VarMap, TreeLayout) {
        let config = TreePolicyConfig {
            layer,
            branch,
            state_dim: 3,
            hidden_size: 4,
            sharing,
            ..Default::default()
        };
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let layout = TreeLayout::build(&config, vb).unwrap();
        (varmap, layout)
    }

    #[test]
    fn test_network_counts_per_mode() {
        assert_eq!(build_layout(SharingMode::Global, 3, 3).1.nets.len(), 1);
        assert_eq!(build_layout(SharingMode::PerDepth, 3, 3).1.nets.len(), 3);
        // 1 + 3 + 9 internal nodes
        assert_eq!(build_layout(SharingMode::PerNode, 3, 3).1.nets.len(), 13);

        let (_, refined) = build_layout(SharingMode::PerDepthRefined, 3, 3);
        let refiners: Vec<usize> = refined.levels.iter().map(|l| l.refiners.len()).collect();
        assert_eq!(refiners, vec![0, 3, 9]);
    }

    #[test]
    fn test_refined_modes_register_refiner_parameters() {
        let (varmap, _) = build_layout(SharingMode::GlobalRefined, 2, 2);
        let names: Vec<String> = varmap.data().lock().unwrap().keys().cloned().collect();
        assert!(names.iter().any(|n| n.starts_with("refine_1_1.")));
        assert!(!names.iter().any(|n| n.starts_with("refine_0_")));
    }

    #[test]
    fn test_forward_width() {
        for mode in SharingMode::ALL {
            let (_, layout) = build_layout(mode, 3, 2);
            let xs = Tensor::ones((5, 3), DType::F32, &Device::Cpu).unwrap();
            let joint = layout.forward(&xs).unwrap();
            assert_eq!(joint.dims(), &[5, 9], "mode {}", mode);
        }
    }
}
