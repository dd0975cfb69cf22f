use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::Shape;

/// A split test comparing two sampled feature pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Split {
    pub idx1: u32,
    pub idx2: u32,
    pub threshold: f32,
}

/// A complete binary regression tree stored breadth-first.
///
/// Split `i` has children `2i + 1` and `2i + 2`; indices past the last split
/// address leaves. Traversal goes left when
/// `pixels[idx1] - pixels[idx2] > threshold`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegressionTree {
    splits: Vec<Split>,
    leaves: Vec<Shape>,
}

impl RegressionTree {
    pub fn new(splits: Vec<Split>, leaves: Vec<Shape>) -> Result<Self> {
        if leaves.len() != splits.len() + 1 {
            return Err(Error::InvalidModel(format!(
                "tree with {} splits needs {} leaves, got {}",
                splits.len(),
                splits.len() + 1,
                leaves.len()
            )));
        }
        Ok(Self { splits, leaves })
    }

    /// A tree with no splits, always predicting `delta`.
    pub fn leaf(delta: Shape) -> Self {
        Self {
            splits: Vec::new(),
            leaves: vec![delta],
        }
    }

    /// Largest feature index referenced by any split.
    pub fn max_feature_index(&self) -> Option<u32> {
        self.splits.iter().map(|s| s.idx1.max(s.idx2)).max()
    }

    /// Walk the tree with the stage's sampled pixels and return the leaf.
    pub fn predict(&self, pixels: &[f32]) -> &Shape {
        let mut i = 0usize;
        while i < self.splits.len() {
            let split = &self.splits[i];
            let diff = pixels[split.idx1 as usize] - pixels[split.idx2 as usize];
            i = if diff > split.threshold {
                2 * i + 1
            } else {
                2 * i + 2
            };
        }
        &self.leaves[i - self.splits.len()]
    }
}

/// Trees of one cascade stage; their leaf deltas are summed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeEnsemble {
    pub trees: Vec<RegressionTree>,
    pub num_landmarks: usize,
}

impl TreeEnsemble {
    pub fn new(trees: Vec<RegressionTree>, num_landmarks: usize) -> Self {
        Self {
            trees,
            num_landmarks,
        }
    }

    pub fn predict(&self, pixels: &[f32]) -> Shape {
        let mut delta = Shape::zeros(self.num_landmarks);
        for tree in &self.trees {
            delta.add_delta(tree.predict(pixels));
        }
        delta
    }

    pub fn max_feature_index(&self) -> Option<u32> {
        self.trees.iter().filter_map(|t| t.max_feature_index()).max()
    }
}
