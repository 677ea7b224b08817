//! Random forests of CART trees over small dense feature matrices.
//!
//! Each tree is grown to purity on a bootstrap sample. Regression trees split
//! on squared error, classification trees on Gini impurity. Trees are stored
//! as flat node arrays so a fitted forest serializes without recursion.

use ndarray::{Array2, ArrayView2};
use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ForestError {
    #[error("cannot fit a forest on zero samples")]
    Empty,
    #[error("{rows} feature rows but {targets} targets")]
    LengthMismatch { rows: usize, targets: usize },
    #[error("feature rows have inconsistent widths: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

/// How many features each split considers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaxFeatures {
    All,
    Sqrt,
}

impl MaxFeatures {
    fn count(self, n_features: usize) -> usize {
        match self {
            Self::All => n_features,
            Self::Sqrt => ((n_features as f64).sqrt() as usize).max(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestConfig {
    pub n_estimators: usize,
    pub seed: u64,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            seed: 42,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    /// Regression: `[mean]`. Classification: per-class probabilities.
    Leaf { value: Vec<f32> },
    /// Samples with `x[feature] <= threshold` go left.
    Split {
        feature: usize,
        threshold: f32,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    pub fn leaf(value: Vec<f32>) -> Self {
        Self { nodes: vec![Node::Leaf { value }] }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn predict(&self, x: &[f32]) -> &[f32] {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { value } => return value,
                Node::Split { feature, threshold, left, right } => {
                    let v = x.get(*feature).copied().unwrap_or(0.0);
                    idx = if v <= *threshold { *left } else { *right };
                }
            }
        }
    }

    /// Children must sit after their parent and inside the node array, so
    /// traversal always terminates.
    fn is_well_formed(&self) -> bool {
        let n = self.nodes.len();
        n > 0
            && self.nodes.iter().enumerate().all(|(i, node)| match node {
                Node::Leaf { value } => !value.is_empty(),
                Node::Split { left, right, .. } => (i + 1..n).contains(left) && (i + 1..n).contains(right),
            })
    }
}

/// Forest regressor: prediction is the mean of the trees' leaf means.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForestRegressor {
    pub n_features: usize,
    trees: Vec<Tree>,
}

impl RandomForestRegressor {
    pub fn fit(x: ArrayView2<f32>, y: &[f32], config: &ForestConfig) -> Result<Self, ForestError> {
        check_shape(x, y.len())?;
        let mut rng = StdRng::seed_from_u64(config.seed);
        let target = Target::Regression(y);
        let trees = (0..config.n_estimators.max(1))
            .map(|_| grow_tree(x, &target, config, MaxFeatures::All, &mut rng))
            .collect();
        Ok(Self { n_features: x.ncols(), trees })
    }

    pub fn from_trees(n_features: usize, trees: Vec<Tree>) -> Self {
        Self { n_features, trees }
    }

    pub fn predict(&self, x: &[f32]) -> f32 {
        if self.trees.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.trees.iter().map(|t| t.predict(x)[0] as f64).sum();
        (sum / self.trees.len() as f64) as f32
    }

    pub fn is_well_formed(&self) -> bool {
        !self.trees.is_empty() && self.trees.iter().all(Tree::is_well_formed)
    }
}

/// Class decision plus the averaged probability of that class.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassPrediction {
    pub label: String,
    pub confidence: f32,
}

/// Forest classifier: averages per-tree class probabilities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForestClassifier {
    pub n_features: usize,
    /// Class labels in sorted order; leaf probability vectors follow this order.
    pub classes: Vec<String>,
    trees: Vec<Tree>,
}

impl RandomForestClassifier {
    pub fn fit(
        x: ArrayView2<f32>,
        labels: &[String],
        config: &ForestConfig,
    ) -> Result<Self, ForestError> {
        check_shape(x, labels.len())?;
        let mut classes: Vec<String> = labels.to_vec();
        classes.sort();
        classes.dedup();
        let encoded: Vec<usize> = labels
            .iter()
            .map(|l| classes.binary_search(l).unwrap_or(0))
            .collect();

        let mut rng = StdRng::seed_from_u64(config.seed);
        let target = Target::Classification { labels: &encoded, n_classes: classes.len() };
        let trees = (0..config.n_estimators.max(1))
            .map(|_| grow_tree(x, &target, config, MaxFeatures::Sqrt, &mut rng))
            .collect();
        Ok(Self { n_features: x.ncols(), classes, trees })
    }

    pub fn from_trees(n_features: usize, classes: Vec<String>, trees: Vec<Tree>) -> Self {
        Self { n_features, classes, trees }
    }

    pub fn predict_proba(&self, x: &[f32]) -> Vec<f32> {
        let mut acc = vec![0.0f64; self.classes.len()];
        for tree in &self.trees {
            for (a, p) in acc.iter_mut().zip(tree.predict(x)) {
                *a += *p as f64;
            }
        }
        let n = self.trees.len().max(1) as f64;
        acc.into_iter().map(|a| (a / n) as f32).collect()
    }

    pub fn predict(&self, x: &[f32]) -> Option<ClassPrediction> {
        let proba = self.predict_proba(x);
        let (best, confidence) = proba
            .iter()
            .copied()
            .enumerate()
            .fold(None, |best: Option<(usize, f32)>, (i, p)| match best {
                Some((_, bp)) if bp >= p => best,
                _ => Some((i, p)),
            })?;
        Some(ClassPrediction { label: self.classes.get(best)?.clone(), confidence })
    }

    pub fn is_well_formed(&self) -> bool {
        !self.classes.is_empty()
            && !self.trees.is_empty()
            && self.trees.iter().all(|t| {
                t.is_well_formed()
                    && t.nodes.iter().all(|n| match n {
                        Node::Leaf { value } => value.len() == self.classes.len(),
                        Node::Split { .. } => true,
                    })
            })
    }
}

/// Stack feature rows into a dense matrix.
pub fn to_matrix(rows: &[Vec<f32>]) -> Result<Array2<f32>, ForestError> {
    let n_features = rows.first().map_or(0, Vec::len);
    let flat: Vec<f32> = rows.iter().flatten().copied().collect();
    Ok(Array2::from_shape_vec((rows.len(), n_features), flat)?)
}

fn check_shape(x: ArrayView2<f32>, targets: usize) -> Result<(), ForestError> {
    if x.nrows() == 0 {
        return Err(ForestError::Empty);
    }
    if x.nrows() != targets {
        return Err(ForestError::LengthMismatch { rows: x.nrows(), targets });
    }
    Ok(())
}

enum Target<'a> {
    Regression(&'a [f32]),
    Classification { labels: &'a [usize], n_classes: usize },
}

impl Target<'_> {
    fn leaf_value(&self, samples: &[usize]) -> Vec<f32> {
        match self {
            Target::Regression(y) => {
                let sum: f64 = samples.iter().map(|&i| y[i] as f64).sum();
                vec![(sum / samples.len() as f64) as f32]
            }
            Target::Classification { labels, n_classes } => {
                let mut counts = vec![0.0f32; *n_classes];
                for &i in samples {
                    counts[labels[i]] += 1.0;
                }
                let n = samples.len() as f32;
                counts.iter_mut().for_each(|c| *c /= n);
                counts
            }
        }
    }

    /// Node impurity scaled by sample count (SSE, or n * Gini).
    fn impurity(&self, samples: &[usize]) -> f64 {
        match self {
            Target::Regression(y) => {
                let mut acc = SseAccumulator::default();
                samples.iter().for_each(|&i| acc.add(y[i]));
                acc.sse()
            }
            Target::Classification { labels, n_classes } => {
                let mut acc = GiniAccumulator::new(*n_classes);
                samples.iter().for_each(|&i| acc.add(labels[i]));
                acc.weighted_gini()
            }
        }
    }
}

#[derive(Default, Clone)]
struct SseAccumulator {
    n: f64,
    sum: f64,
    sq: f64,
}

impl SseAccumulator {
    fn add(&mut self, v: f32) {
        let v = v as f64;
        self.n += 1.0;
        self.sum += v;
        self.sq += v * v;
    }

    fn remove(&mut self, v: f32) {
        let v = v as f64;
        self.n -= 1.0;
        self.sum -= v;
        self.sq -= v * v;
    }

    fn sse(&self) -> f64 {
        if self.n <= 0.0 {
            return 0.0;
        }
        (self.sq - self.sum * self.sum / self.n).max(0.0)
    }
}

#[derive(Clone)]
struct GiniAccumulator {
    n: f64,
    counts: Vec<f64>,
}

impl GiniAccumulator {
    fn new(n_classes: usize) -> Self {
        Self { n: 0.0, counts: vec![0.0; n_classes] }
    }

    fn add(&mut self, class: usize) {
        self.n += 1.0;
        self.counts[class] += 1.0;
    }

    fn remove(&mut self, class: usize) {
        self.n -= 1.0;
        self.counts[class] -= 1.0;
    }

    /// n * (1 - Σ p²)
    fn weighted_gini(&self) -> f64 {
        if self.n <= 0.0 {
            return 0.0;
        }
        let sum_sq: f64 = self.counts.iter().map(|c| c * c).sum();
        self.n - sum_sq / self.n
    }
}

struct SplitCandidate {
    feature: usize,
    threshold: f32,
    impurity: f64,
}

const IMPURITY_EPSILON: f64 = 1e-9;

fn grow_tree(
    x: ArrayView2<f32>,
    target: &Target,
    config: &ForestConfig,
    max_features: MaxFeatures,
    rng: &mut StdRng,
) -> Tree {
    let n = x.nrows();
    let bootstrap: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();

    let mut nodes: Vec<Node> = vec![Node::Leaf { value: Vec::new() }];
    let mut stack = vec![(0usize, bootstrap, 0usize)];

    while let Some((slot, samples, depth)) = stack.pop() {
        let value = target.leaf_value(&samples);
        let impurity = target.impurity(&samples);

        let can_split = samples.len() >= config.min_samples_split.max(2)
            && config.max_depth.map_or(true, |d| depth < d)
            && impurity > IMPURITY_EPSILON;

        let split = if can_split {
            best_split(x, target, &samples, config, max_features, rng)
        } else {
            None
        };

        let Some(split) = split else {
            nodes[slot] = Node::Leaf { value };
            continue;
        };

        let (left, right): (Vec<usize>, Vec<usize>) = samples
            .iter()
            .copied()
            .partition(|&i| x[[i, split.feature]] <= split.threshold);

        let left_slot = nodes.len();
        nodes.push(Node::Leaf { value: Vec::new() });
        let right_slot = nodes.len();
        nodes.push(Node::Leaf { value: Vec::new() });
        nodes[slot] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left: left_slot,
            right: right_slot,
        };
        stack.push((right_slot, right, depth + 1));
        stack.push((left_slot, left, depth + 1));
    }

    Tree { nodes }
}

/// Visit features in random order until `max_features` non-constant ones
/// have been evaluated, returning the lowest-impurity split among them.
fn best_split(
    x: ArrayView2<f32>,
    target: &Target,
    samples: &[usize],
    config: &ForestConfig,
    max_features: MaxFeatures,
    rng: &mut StdRng,
) -> Option<SplitCandidate> {
    let n_features = x.ncols();
    let budget = max_features.count(n_features);
    let min_leaf = config.min_samples_leaf.max(1);

    let mut best: Option<SplitCandidate> = None;
    let mut evaluated = 0;
    let mut sorted = samples.to_vec();

    for feature in index::sample(rng, n_features, n_features) {
        if evaluated >= budget {
            break;
        }
        sorted.sort_by(|&a, &b| x[[a, feature]].total_cmp(&x[[b, feature]]));
        let first = x[[sorted[0], feature]];
        let last = x[[sorted[sorted.len() - 1], feature]];
        if first == last {
            continue;
        }
        evaluated += 1;

        let candidate = match target {
            Target::Regression(y) => scan_regression(x, y, &sorted, feature, min_leaf),
            Target::Classification { labels, n_classes } => {
                scan_classification(x, labels, *n_classes, &sorted, feature, min_leaf)
            }
        };

        if let Some(c) = candidate {
            if best.as_ref().map_or(true, |b| c.impurity < b.impurity) {
                best = Some(c);
            }
        }
    }

    best
}

fn midpoint(a: f32, b: f32) -> f32 {
    let mid = a + (b - a) / 2.0;
    if mid >= b { a } else { mid }
}

fn scan_regression(
    x: ArrayView2<f32>,
    y: &[f32],
    sorted: &[usize],
    feature: usize,
    min_leaf: usize,
) -> Option<SplitCandidate> {
    let mut left = SseAccumulator::default();
    let mut right = SseAccumulator::default();
    sorted.iter().for_each(|&i| right.add(y[i]));

    let mut best: Option<SplitCandidate> = None;
    for pos in 0..sorted.len() - 1 {
        let i = sorted[pos];
        left.add(y[i]);
        right.remove(y[i]);

        let here = x[[i, feature]];
        let next = x[[sorted[pos + 1], feature]];
        if here == next || pos + 1 < min_leaf || sorted.len() - pos - 1 < min_leaf {
            continue;
        }
        let impurity = left.sse() + right.sse();
        if best.as_ref().map_or(true, |b| impurity < b.impurity) {
            best = Some(SplitCandidate { feature, threshold: midpoint(here, next), impurity });
        }
    }
    best
}

fn scan_classification(
    x: ArrayView2<f32>,
    labels: &[usize],
    n_classes: usize,
    sorted: &[usize],
    feature: usize,
    min_leaf: usize,
) -> Option<SplitCandidate> {
    let mut left = GiniAccumulator::new(n_classes);
    let mut right = GiniAccumulator::new(n_classes);
    sorted.iter().for_each(|&i| right.add(labels[i]));

    let mut best: Option<SplitCandidate> = None;
    for pos in 0..sorted.len() - 1 {
        let i = sorted[pos];
        left.add(labels[i]);
        right.remove(labels[i]);

        let here = x[[i, feature]];
        let next = x[[sorted[pos + 1], feature]];
        if here == next || pos + 1 < min_leaf || sorted.len() - pos - 1 < min_leaf {
            continue;
        }
        let impurity = left.weighted_gini() + right.weighted_gini();
        if best.as_ref().map_or(true, |b| impurity < b.impurity) {
            best = Some(SplitCandidate { feature, threshold: midpoint(here, next), impurity });
        }
    }
    best
}

/// Mean squared error.
pub fn mean_squared_error(truth: &[f32], predicted: &[f32]) -> f64 {
    if truth.is_empty() {
        return 0.0;
    }
    truth
        .iter()
        .zip(predicted)
        .map(|(t, p)| (*t as f64 - *p as f64).powi(2))
        .sum::<f64>()
        / truth.len() as f64
}

/// Mean absolute error.
pub fn mean_absolute_error(truth: &[f32], predicted: &[f32]) -> f64 {
    if truth.is_empty() {
        return 0.0;
    }
    truth
        .iter()
        .zip(predicted)
        .map(|(t, p)| (*t as f64 - *p as f64).abs())
        .sum::<f64>()
        / truth.len() as f64
}

/// Coefficient of determination. A constant target scores 1.0 when predicted
/// exactly and 0.0 otherwise.
pub fn r2_score(truth: &[f32], predicted: &[f32]) -> f64 {
    if truth.is_empty() {
        return 0.0;
    }
    let mean = truth.iter().map(|&t| t as f64).sum::<f64>() / truth.len() as f64;
    let ss_tot: f64 = truth.iter().map(|&t| (t as f64 - mean).powi(2)).sum();
    let ss_res: f64 = truth
        .iter()
        .zip(predicted)
        .map(|(t, p)| (*t as f64 - *p as f64).powi(2))
        .sum();
    if ss_tot == 0.0 {
        return if ss_res == 0.0 { 1.0 } else { 0.0 };
    }
    1.0 - ss_res / ss_tot
}

/// Fraction of exact label matches.
pub fn accuracy(truth: &[String], predicted: &[String]) -> f64 {
    if truth.is_empty() {
        return 0.0;
    }
    let hits = truth.iter().zip(predicted).filter(|(t, p)| t == p).count();
    hits as f64 / truth.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> ForestConfig {
        ForestConfig { n_estimators: 20, ..Default::default() }
    }

    #[test]
    fn test_regressor_learns_step() {
        // y = 10 when x0 < 0.5 else 50; x1 is noise.
        let rows: Vec<Vec<f32>> = (0..40)
            .map(|i| vec![(i % 10) as f32 / 10.0, ((i * 7) % 3) as f32])
            .collect();
        let y: Vec<f32> = rows.iter().map(|r| if r[0] < 0.5 { 10.0 } else { 50.0 }).collect();
        let x = to_matrix(&rows).unwrap();

        let model = RandomForestRegressor::fit(x.view(), &y, &small_config()).unwrap();
        assert!(model.is_well_formed());
        assert_eq!(model.n_features, 2);
        assert!((model.predict(&[0.1, 0.0]) - 10.0).abs() < 1.0);
        assert!((model.predict(&[0.9, 2.0]) - 50.0).abs() < 1.0);
    }

    #[test]
    fn test_constant_target_predicts_constant() {
        let rows: Vec<Vec<f32>> = (0..12).map(|i| vec![i as f32, 0.0]).collect();
        let y = vec![20.0; 12];
        let x = to_matrix(&rows).unwrap();
        let model = RandomForestRegressor::fit(x.view(), &y, &small_config()).unwrap();
        for i in 0..12 {
            assert_eq!(model.predict(&[i as f32, 0.0]), 20.0);
        }
    }

    #[test]
    fn test_fit_is_deterministic() {
        let rows: Vec<Vec<f32>> = (0..30).map(|i| vec![(i % 7) as f32, (i % 4) as f32]).collect();
        let y: Vec<f32> = rows.iter().map(|r| r[0] * 2.0 + r[1]).collect();
        let x = to_matrix(&rows).unwrap();
        let a = RandomForestRegressor::fit(x.view(), &y, &small_config()).unwrap();
        let b = RandomForestRegressor::fit(x.view(), &y, &small_config()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_classifier_separates_classes() {
        let rows: Vec<Vec<f32>> = (0..40).map(|i| vec![(i % 2) as f32, (i % 5) as f32]).collect();
        let labels: Vec<String> = rows
            .iter()
            .map(|r| if r[0] == 0.0 { "male".to_string() } else { "female".to_string() })
            .collect();
        let x = to_matrix(&rows).unwrap();
        let model = RandomForestClassifier::fit(x.view(), &labels, &small_config()).unwrap();
        assert!(model.is_well_formed());
        assert_eq!(model.classes, vec!["female".to_string(), "male".to_string()]);

        let p = model.predict(&[1.0, 3.0]).unwrap();
        assert_eq!(p.label, "female");
        assert!(p.confidence > 0.8);
        let proba = model.predict_proba(&[0.0, 3.0]);
        assert!((proba.iter().sum::<f32>() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_classifier_from_fixed_leaf() {
        let model = RandomForestClassifier::from_trees(
            3,
            vec!["female".into(), "male".into()],
            vec![Tree::leaf(vec![0.81, 0.19])],
        );
        let p = model.predict(&[0.0, 0.0, 0.0]).unwrap();
        assert_eq!(p.label, "female");
        assert_eq!(p.confidence, 0.81);
    }

    #[test]
    fn test_fit_rejects_bad_shapes() {
        let x = to_matrix(&[vec![1.0], vec![2.0]]).unwrap();
        assert!(matches!(
            RandomForestRegressor::fit(x.view(), &[1.0], &small_config()),
            Err(ForestError::LengthMismatch { rows: 2, targets: 1 })
        ));
        let empty = to_matrix(&[]).unwrap();
        assert!(matches!(
            RandomForestRegressor::fit(empty.view(), &[], &small_config()),
            Err(ForestError::Empty)
        ));
        assert!(to_matrix(&[vec![1.0, 2.0], vec![3.0]]).is_err());
    }

    #[test]
    fn test_max_depth_limits_growth() {
        let rows: Vec<Vec<f32>> = (0..64).map(|i| vec![i as f32]).collect();
        let y: Vec<f32> = (0..64).map(|i| i as f32).collect();
        let x = to_matrix(&rows).unwrap();
        let config = ForestConfig { n_estimators: 1, max_depth: Some(1), ..Default::default() };
        let model = RandomForestRegressor::fit(x.view(), &y, &config).unwrap();
        assert_eq!(model.trees[0].node_count(), 3);
    }

    #[test]
    fn test_serde_round_trip() {
        let rows: Vec<Vec<f32>> = (0..20).map(|i| vec![(i % 4) as f32]).collect();
        let y: Vec<f32> = rows.iter().map(|r| r[0] * 3.0).collect();
        let x = to_matrix(&rows).unwrap();
        let model = RandomForestRegressor::fit(x.view(), &y, &small_config()).unwrap();
        let json = serde_json::to_string(&model).unwrap();
        let back: RandomForestRegressor = serde_json::from_str(&json).unwrap();
        assert_eq!(back, model);
    }

    #[test]
    fn test_metrics() {
        assert_eq!(mean_squared_error(&[1.0, 3.0], &[2.0, 3.0]), 0.5);
        assert_eq!(mean_absolute_error(&[1.0, 3.0], &[2.0, 5.0]), 1.5);
        assert_eq!(r2_score(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]), 1.0);
        assert_eq!(r2_score(&[2.0, 2.0], &[2.0, 2.0]), 1.0);
        assert_eq!(r2_score(&[2.0, 2.0], &[1.0, 2.0]), 0.0);
        let t = vec!["a".to_string(), "b".to_string()];
        let p = vec!["a".to_string(), "a".to_string()];
        assert_eq!(accuracy(&t, &p), 0.5);
    }
}
