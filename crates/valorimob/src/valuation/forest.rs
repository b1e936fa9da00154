//! Random-forest regressor: bagged CART trees with variance-reduction splits.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestParams {
    pub n_estimators: usize,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub seed: u64,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ForestError {
    #[error("cannot fit a forest on an empty training set")]
    EmptyTrainingSet,
    #[error("feature matrix has {rows} rows but the target has {targets}")]
    LengthMismatch { rows: usize, targets: usize },
    #[error("row {row} has {found} features, expected {expected}")]
    FeatureWidth {
        row: usize,
        expected: usize,
        found: usize,
    },
    #[error("invalid forest parameters: {0}")]
    InvalidParams(&'static str),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// Flat arena of nodes; index 0 is the root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<Node>,
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    impurity: f64,
}

struct TreeBuilder<'a> {
    features: &'a [Vec<f64>],
    targets: &'a [f64],
    params: &'a ForestParams,
    nodes: Vec<Node>,
}

impl TreeBuilder<'_> {
    fn grow(&mut self, samples: Vec<usize>, depth: usize) -> usize {
        let value = mean_of(self.targets, &samples);
        let id = self.nodes.len();
        self.nodes.push(Node::Leaf { value });

        let depth_allows = self.params.max_depth.map_or(true, |max| depth < max);
        if !depth_allows || samples.len() < self.params.min_samples_split {
            return id;
        }
        let Some(split) = self.best_split(&samples) else {
            return id;
        };

        let (left_samples, right_samples): (Vec<usize>, Vec<usize>) = samples
            .iter()
            .partition(|&&sample| self.features[sample][split.feature] <= split.threshold);
        let left = self.grow(left_samples, depth + 1);
        let right = self.grow(right_samples, depth + 1);
        self.nodes[id] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        id
    }

    fn best_split(&self, samples: &[usize]) -> Option<SplitCandidate> {
        let n = samples.len();
        let min_leaf = self.params.min_samples_leaf.max(1);
        if n < 2 * min_leaf {
            return None;
        }

        let (lowest, highest) = samples.iter().fold((f64::MAX, f64::MIN), |(lo, hi), &s| {
            (lo.min(self.targets[s]), hi.max(self.targets[s]))
        });
        if lowest == highest {
            return None;
        }

        let total_sum: f64 = samples.iter().map(|&s| self.targets[s]).sum();
        let total_sq: f64 = samples.iter().map(|&s| self.targets[s].powi(2)).sum();
        let mut best: Option<SplitCandidate> = None;
        let mut best_impurity = total_sq - total_sum * total_sum / n as f64;

        let width = self.features[samples[0]].len();
        let mut ordered = samples.to_vec();
        for feature in 0..width {
            ordered.sort_by(|&a, &b| self.features[a][feature].total_cmp(&self.features[b][feature]));

            let mut left_sum = 0.0;
            let mut left_sq = 0.0;
            for position in 1..n {
                let previous = ordered[position - 1];
                left_sum += self.targets[previous];
                left_sq += self.targets[previous].powi(2);

                if position < min_leaf || n - position < min_leaf {
                    continue;
                }
                let below = self.features[previous][feature];
                let above = self.features[ordered[position]][feature];
                if below >= above {
                    continue;
                }

                let left_n = position as f64;
                let right_n = (n - position) as f64;
                let right_sum = total_sum - left_sum;
                let right_sq = total_sq - left_sq;
                let impurity = (left_sq - left_sum * left_sum / left_n)
                    + (right_sq - right_sum * right_sum / right_n);

                if impurity < best_impurity {
                    best_impurity = impurity;
                    best = Some(SplitCandidate {
                        feature,
                        threshold: midpoint(below, above),
                        impurity,
                    });
                }
            }
        }

        best.filter(|candidate| candidate.impurity.is_finite())
    }
}

fn midpoint(below: f64, above: f64) -> f64 {
    let middle = below + (above - below) / 2.0;
    // Adjacent floats can round the midpoint up onto `above`.
    if middle >= above {
        below
    } else {
        middle
    }
}

fn mean_of(targets: &[f64], samples: &[usize]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().map(|&s| targets[s]).sum::<f64>() / samples.len() as f64
}

impl RegressionTree {
    fn fit(features: &[Vec<f64>], targets: &[f64], samples: Vec<usize>, params: &ForestParams) -> Self {
        let mut builder = TreeBuilder {
            features,
            targets,
            params,
            nodes: Vec::new(),
        };
        builder.grow(samples, 0);
        Self {
            nodes: builder.nodes,
        }
    }

    pub fn predict(&self, row: &[f64]) -> f64 {
        let mut index = 0;
        loop {
            match &self.nodes[index] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    index = if row[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], index: usize) -> usize {
            match &nodes[index] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(nodes, *left).max(walk(nodes, *right)),
            }
        }
        walk(&self.nodes, 0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForestRegressor {
    n_features: usize,
    trees: Vec<RegressionTree>,
}

impl RandomForestRegressor {
    /// Fits `params.n_estimators` trees, each on its own bootstrap sample.
    /// Identical inputs and seed always produce an identical forest.
    pub fn fit(features: &[Vec<f64>], targets: &[f64], params: &ForestParams) -> Result<Self, ForestError> {
        if params.n_estimators == 0 {
            return Err(ForestError::InvalidParams("n_estimators must be at least 1"));
        }
        if params.min_samples_split < 2 {
            return Err(ForestError::InvalidParams("min_samples_split must be at least 2"));
        }
        if params.min_samples_leaf == 0 {
            return Err(ForestError::InvalidParams("min_samples_leaf must be at least 1"));
        }
        if features.len() != targets.len() {
            return Err(ForestError::LengthMismatch {
                rows: features.len(),
                targets: targets.len(),
            });
        }
        let Some(first) = features.first() else {
            return Err(ForestError::EmptyTrainingSet);
        };
        let n_features = first.len();
        if let Some((row, found)) = features
            .iter()
            .map(Vec::len)
            .enumerate()
            .find(|(_, len)| *len != n_features)
        {
            return Err(ForestError::FeatureWidth {
                row,
                expected: n_features,
                found,
            });
        }

        let n = features.len();
        let mut master = StdRng::seed_from_u64(params.seed);
        let tree_seeds: Vec<u64> = (0..params.n_estimators).map(|_| master.gen()).collect();

        let trees = tree_seeds
            .into_iter()
            .map(|seed| {
                let mut rng = StdRng::seed_from_u64(seed);
                let bootstrap = (0..n).map(|_| rng.gen_range(0..n)).collect();
                RegressionTree::fit(features, targets, bootstrap, params)
            })
            .collect();

        Ok(Self { n_features, trees })
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn trees(&self) -> &[RegressionTree] {
        &self.trees
    }

    /// Mean prediction over all trees. `row` must carry exactly the features
    /// the forest was fitted on.
    pub fn predict(&self, row: &[f64]) -> Result<f64, ForestError> {
        if row.len() != self.n_features {
            return Err(ForestError::FeatureWidth {
                row: 0,
                expected: self.n_features,
                found: row.len(),
            });
        }
        let total: f64 = self.trees.iter().map(|tree| tree.predict(row)).sum();
        Ok(total / self.trees.len() as f64)
    }
}
