//! Leaf-wise (best-first) tree growth over histogram bins.

use rayon::prelude::*;

use crate::binning::BinnedMatrix;
use crate::params::BoosterParams;
use crate::tree::{Node, Tree};

/// Limits and regularisation for a single tree.
#[derive(Debug, Clone)]
pub(crate) struct GrowerConfig {
    pub num_leaves: usize,
    pub max_depth: Option<usize>,
    pub min_data_in_leaf: usize,
    pub min_sum_hessian: f64,
    pub min_gain_to_split: f64,
    pub lambda_l1: f64,
    pub lambda_l2: f64,
}

impl From<&BoosterParams> for GrowerConfig {
    fn from(params: &BoosterParams) -> Self {
        Self {
            num_leaves: params.num_leaves,
            max_depth: params.depth_limit(),
            min_data_in_leaf: params.min_child_samples.max(1),
            min_sum_hessian: params.min_sum_hessian_in_leaf,
            min_gain_to_split: params.min_gain_to_split,
            lambda_l1: params.lambda_l1,
            lambda_l2: params.lambda_l2,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct SplitInfo {
    feature: usize,
    bin: u8,
    gain: f64,
    left_grad: f64,
    left_hess: f64,
}

struct LeafCandidate {
    node: usize,
    rows: Vec<u32>,
    sum_grad: f64,
    sum_hess: f64,
    depth: usize,
    split: Option<SplitInfo>,
}

pub(crate) struct TreeGrower<'a> {
    config: &'a GrowerConfig,
    bins: &'a BinnedMatrix,
    grad: &'a [f64],
    hess: &'a [f64],
}

impl<'a> TreeGrower<'a> {
    pub(crate) fn new(
        config: &'a GrowerConfig,
        bins: &'a BinnedMatrix,
        grad: &'a [f64],
        hess: &'a [f64],
    ) -> Self {
        Self {
            config,
            bins,
            grad,
            hess,
        }
    }

    fn threshold_l1(&self, g: f64) -> f64 {
        g.signum() * (g.abs() - self.config.lambda_l1).max(0.0)
    }

    fn leaf_gain(&self, g: f64, h: f64) -> f64 {
        let t = self.threshold_l1(g);
        t * t / (h + self.config.lambda_l2).max(f64::EPSILON)
    }

    fn leaf_output(&self, g: f64, h: f64) -> f64 {
        -self.threshold_l1(g) / (h + self.config.lambda_l2).max(f64::EPSILON)
    }

    /// Grow one tree on `rows` using only `features`.
    pub(crate) fn grow(&self, rows: Vec<u32>, features: &[usize]) -> Tree {
        let (sum_grad, sum_hess) = rows.iter().fold((0.0, 0.0), |(g, h), &r| {
            (g + self.grad[r as usize], h + self.hess[r as usize])
        });

        let mut nodes = vec![Node::Leaf {
            value: self.leaf_output(sum_grad, sum_hess),
        }];
        let mut leaves = vec![self.candidate(0, rows, sum_grad, sum_hess, 0, features)];
        let mut n_leaves = 1;

        while n_leaves < self.config.num_leaves {
            let best = leaves
                .iter()
                .enumerate()
                .filter_map(|(i, leaf)| leaf.split.map(|s| (i, s.gain)))
                .max_by(|a, b| a.1.total_cmp(&b.1))
                .map(|(i, _)| i);
            let Some(best) = best else {
                break;
            };

            let leaf = leaves.swap_remove(best);
            let Some(split) = leaf.split else {
                continue;
            };

            let column = self.bins.column(split.feature);
            let (left_rows, right_rows): (Vec<u32>, Vec<u32>) = leaf
                .rows
                .into_iter()
                .partition(|&r| column[r as usize] <= split.bin);

            let right_grad = leaf.sum_grad - split.left_grad;
            let right_hess = leaf.sum_hess - split.left_hess;

            let left = nodes.len();
            let right = left + 1;
            nodes.push(Node::Leaf {
                value: self.leaf_output(split.left_grad, split.left_hess),
            });
            nodes.push(Node::Leaf {
                value: self.leaf_output(right_grad, right_hess),
            });
            nodes[leaf.node] = Node::Split {
                feature: split.feature,
                threshold: self.bins.mapper(split.feature).threshold(split.bin as usize),
                bin: split.bin,
                left,
                right,
            };
            n_leaves += 1;

            let depth = leaf.depth + 1;
            leaves.push(self.candidate(
                left,
                left_rows,
                split.left_grad,
                split.left_hess,
                depth,
                features,
            ));
            leaves.push(self.candidate(right, right_rows, right_grad, right_hess, depth, features));
        }

        Tree { nodes, weight: 1.0 }
    }

    fn candidate(
        &self,
        node: usize,
        rows: Vec<u32>,
        sum_grad: f64,
        sum_hess: f64,
        depth: usize,
        features: &[usize],
    ) -> LeafCandidate {
        let depth_ok = self.config.max_depth.map_or(true, |limit| depth < limit);
        let split = if depth_ok && rows.len() >= 2 * self.config.min_data_in_leaf {
            self.find_best_split(&rows, sum_grad, sum_hess, features)
        } else {
            None
        };
        LeafCandidate {
            node,
            rows,
            sum_grad,
            sum_hess,
            depth,
            split,
        }
    }

    fn find_best_split(
        &self,
        rows: &[u32],
        sum_grad: f64,
        sum_hess: f64,
        features: &[usize],
    ) -> Option<SplitInfo> {
        let parent_gain = self.leaf_gain(sum_grad, sum_hess);
        features
            .par_iter()
            .filter_map(|&f| self.best_split_for_feature(f, rows, sum_grad, sum_hess, parent_gain))
            .reduce_with(|a, b| {
                if b.gain > a.gain || (b.gain == a.gain && b.feature < a.feature) {
                    b
                } else {
                    a
                }
            })
    }

    fn best_split_for_feature(
        &self,
        feature: usize,
        rows: &[u32],
        sum_grad: f64,
        sum_hess: f64,
        parent_gain: f64,
    ) -> Option<SplitInfo> {
        let n_bins = self.bins.mapper(feature).n_bins();
        if n_bins < 2 {
            return None;
        }

        let column = self.bins.column(feature);
        let mut hist = vec![(0.0f64, 0.0f64, 0usize); n_bins];
        for &r in rows {
            let r = r as usize;
            let slot = &mut hist[column[r] as usize];
            slot.0 += self.grad[r];
            slot.1 += self.hess[r];
            slot.2 += 1;
        }

        let total = rows.len();
        let min_data = self.config.min_data_in_leaf;
        let min_hess = self.config.min_sum_hessian;
        let (mut left_grad, mut left_hess, mut left_count) = (0.0, 0.0, 0usize);
        let mut best: Option<SplitInfo> = None;

        for (bin, &(g, h, c)) in hist.iter().enumerate().take(n_bins - 1) {
            left_grad += g;
            left_hess += h;
            left_count += c;
            if c == 0 {
                continue;
            }

            let right_count = total - left_count;
            if left_count < min_data || left_hess < min_hess {
                continue;
            }
            if right_count < min_data {
                break;
            }
            let right_grad = sum_grad - left_grad;
            let right_hess = sum_hess - left_hess;
            if right_hess < min_hess {
                break;
            }

            let gain = self.leaf_gain(left_grad, left_hess) + self.leaf_gain(right_grad, right_hess)
                - parent_gain;
            if gain > self.config.min_gain_to_split && best.map_or(true, |b| gain > b.gain) {
                best = Some(SplitInfo {
                    feature,
                    bin: bin as u8,
                    gain,
                    left_grad,
                    left_hess,
                });
            }
        }
        best
    }
}
