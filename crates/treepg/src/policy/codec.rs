//! Leaf index <-> branch digit conversion.
//!
//! Leaf `k` takes digit `(k / branch^(layer - 1 - depth)) % branch` at each
//! depth, so the root decision is the most significant digit. The composition
//! order in [`TreePolicy`](super::TreePolicy) relies on this layout.

use crate::{Result, TreePgError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ActionCodec {
    branch: usize,
    layer: usize,
    num_leaves: usize,
}

impl ActionCodec {
    pub fn new(branch: usize, layer: usize) -> Result<Self> {
        if branch < 2 || layer == 0 {
            return Err(TreePgError::InvalidConfig(format!(
                "codec needs branch >= 2 and layer >= 1, got {}^{}",
                branch, layer
            )));
        }
        let num_leaves = u32::try_from(layer)
            .ok()
            .and_then(|l| branch.checked_pow(l))
            .ok_or_else(|| {
                TreePgError::InvalidConfig(format!("action space {}^{} overflows", branch, layer))
            })?;
        Ok(Self {
            branch,
            layer,
            num_leaves,
        })
    }

    pub fn branch(&self) -> usize {
        self.branch
    }

    pub fn layer(&self) -> usize {
        self.layer
    }

    pub fn num_leaves(&self) -> usize {
        self.num_leaves
    }

    pub fn check(&self, leaf: usize) -> Result<()> {
        if leaf >= self.num_leaves {
            return Err(TreePgError::InvalidInput(format!(
                "action index {} outside [0, {})",
                leaf, self.num_leaves
            )));
        }
        Ok(())
    }

    /// Branch digits from the root down.
    pub fn decode(&self, leaf: usize) -> Result<Vec<usize>> {
        self.check(leaf)?;
        let mut digits = vec![0; self.layer];
        let mut rest = leaf;
        for digit in digits.iter_mut().rev() {
            *digit = rest % self.branch;
            rest /= self.branch;
        }
        Ok(digits)
    }

    pub fn encode(&self, digits: &[usize]) -> Result<usize> {
        if digits.len() != self.layer {
            return Err(TreePgError::InvalidInput(format!(
                "expected {} digits, got {}",
                self.layer,
                digits.len()
            )));
        }
        digits.iter().try_fold(0usize, |acc, &d| {
            if d >= self.branch {
                return Err(TreePgError::InvalidInput(format!(
                    "digit {} outside [0, {})",
                    d, self.branch
                )));
            }
            Ok(acc * self.branch + d)
        })
    }
}
