use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};

use crate::binning::BinnedMatrix;

/// A node in a regression tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) enum Node {
    Split {
        feature: usize,
        /// Go left when `value <= threshold` (NaN goes left).
        threshold: f64,
        /// Same decision expressed on the binned training matrix.
        bin: u8,
        left: usize,
        right: usize,
    },
    Leaf {
        value: f64,
    },
}

/// A regression tree predicting a raw (pre-sigmoid) score contribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    pub(crate) nodes: Vec<Node>,
    /// Multiplier applied to every leaf value (shrinkage, dart normalisation).
    pub(crate) weight: f64,
}

impl Tree {
    #[cfg(test)]
    pub(crate) fn single_leaf(value: f64) -> Self {
        Self {
            nodes: vec![Node::Leaf { value }],
            weight: 1.0,
        }
    }

    pub fn num_leaves(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n, Node::Leaf { .. }))
            .count()
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], idx: usize) -> usize {
            match &nodes[idx] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(nodes, *left).max(walk(nodes, *right)),
            }
        }
        walk(&self.nodes, 0)
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    /// Unweighted leaf value for one raw feature row.
    pub(crate) fn leaf_value(&self, row: ArrayView1<'_, f64>) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                    ..
                } => {
                    let v = row[*feature];
                    idx = if v.is_nan() || v <= *threshold { *left } else { *right };
                }
            }
        }
    }

    /// Unweighted leaf value for one row of the binned training matrix.
    pub(crate) fn leaf_value_binned(&self, bins: &BinnedMatrix, row: usize) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    bin,
                    left,
                    right,
                    ..
                } => {
                    idx = if bins.column(*feature)[row] <= *bin { *left } else { *right };
                }
            }
        }
    }

    /// Weighted contribution for one raw feature row.
    pub fn predict_row(&self, row: ArrayView1<'_, f64>) -> f64 {
        self.weight * self.leaf_value(row)
    }
}
