//! Native scorer for gradient-boosted tree ensembles in the LightGBM text format
//!
//! Only the pieces needed for single-output prediction are read: the header
//! (objective, feature names, averaging flag) and the per-tree node arrays.
//! Everything after `end of trees` (importances, parameters) is ignored.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Model file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read model file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed model: {0}")]
    Parse(String),

    #[error("Unsupported model: {0}")]
    Unsupported(String),
}

/// Values closer to zero than this count as zero for the "zero is missing" rule
const ZERO_THRESHOLD: f64 = 1e-35;

const CATEGORICAL_MASK: u8 = 1;
const DEFAULT_LEFT_MASK: u8 = 2;

/// How a split treats missing inputs (bits 2-3 of `decision_type`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MissingType {
    None,
    Zero,
    NaN,
}

impl MissingType {
    fn from_decision_type(decision_type: u8) -> Self {
        match (decision_type >> 2) & 3 {
            1 => MissingType::Zero,
            2 => MissingType::NaN,
            _ => MissingType::None,
        }
    }
}

/// Transform from the raw ensemble sum to the reported score
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OutputTransform {
    Sigmoid(f64),
    Identity,
    Exp,
}

impl OutputTransform {
    fn from_objective(objective: &str) -> Result<Self, ModelError> {
        let mut tokens = objective.split_whitespace();
        let name = tokens.next().unwrap_or("");
        let sigmoid = tokens
            .find_map(|t| t.strip_prefix("sigmoid:"))
            .map(|s| {
                s.parse::<f64>()
                    .map_err(|_| ModelError::Parse(format!("bad sigmoid scale {:?}", s)))
            })
            .transpose()?
            .unwrap_or(1.0);

        match name {
            "binary" | "cross_entropy" | "xentropy" => Ok(OutputTransform::Sigmoid(sigmoid)),
            "poisson" | "gamma" | "tweedie" => Ok(OutputTransform::Exp),
            "" | "regression" | "regression_l1" | "regression_l2" | "l1" | "l2" | "mse"
            | "mae" | "huber" | "fair" | "quantile" | "mape" | "lambdarank"
            | "rank_xendcg" | "custom" => Ok(OutputTransform::Identity),
            other => Err(ModelError::Unsupported(format!("objective {:?}", other))),
        }
    }

    fn apply(&self, raw: f64) -> f64 {
        match *self {
            OutputTransform::Sigmoid(scale) => 1.0 / (1.0 + (-scale * raw).exp()),
            OutputTransform::Identity => raw,
            OutputTransform::Exp => raw.exp(),
        }
    }
}

/// One decision tree in array form.
///
/// Child indices follow the LightGBM convention: non-negative values point at
/// internal nodes, a negative value `c` points at leaf `!c`.
#[derive(Debug, Clone)]
struct Tree {
    split_feature: Vec<usize>,
    threshold: Vec<f64>,
    decision_type: Vec<u8>,
    left_child: Vec<i32>,
    right_child: Vec<i32>,
    leaf_value: Vec<f64>,
    cat_boundaries: Vec<usize>,
    cat_threshold: Vec<u32>,
}

impl Tree {
    fn from_fields(index: usize, fields: &HashMap<&str, &str>) -> Result<Self, ModelError> {
        let num_leaves: usize = required_value(fields, "num_leaves", index)?;
        if num_leaves == 0 {
            return Err(ModelError::Parse(format!("tree {} has no leaves", index)));
        }
        if optional_value::<u8>(fields, "is_linear", index)?.unwrap_or(0) != 0 {
            return Err(ModelError::Unsupported("linear trees".to_string()));
        }

        let leaf_value: Vec<f64> = list(fields, "leaf_value", index)?;
        if leaf_value.len() != num_leaves {
            return Err(ModelError::Parse(format!(
                "tree {}: {} leaf values for {} leaves",
                index,
                leaf_value.len(),
                num_leaves
            )));
        }

        let mut tree = Tree {
            split_feature: Vec::new(),
            threshold: Vec::new(),
            decision_type: Vec::new(),
            left_child: Vec::new(),
            right_child: Vec::new(),
            leaf_value,
            cat_boundaries: Vec::new(),
            cat_threshold: Vec::new(),
        };
        if num_leaves == 1 {
            return Ok(tree);
        }

        tree.split_feature = list(fields, "split_feature", index)?;
        tree.threshold = list(fields, "threshold", index)?;
        tree.decision_type = list(fields, "decision_type", index)?;
        tree.left_child = list(fields, "left_child", index)?;
        tree.right_child = list(fields, "right_child", index)?;
        if optional_value::<usize>(fields, "num_cat", index)?.unwrap_or(0) > 0 {
            tree.cat_boundaries = list(fields, "cat_boundaries", index)?;
            tree.cat_threshold = list(fields, "cat_threshold", index)?;
        }

        tree.validate(index, num_leaves)?;
        Ok(tree)
    }

    /// Check array shapes and that traversal always moves forward
    fn validate(&self, index: usize, num_leaves: usize) -> Result<(), ModelError> {
        let internal = num_leaves - 1;
        let lengths = [
            self.split_feature.len(),
            self.threshold.len(),
            self.decision_type.len(),
            self.left_child.len(),
            self.right_child.len(),
        ];
        if lengths.iter().any(|&len| len != internal) {
            return Err(ModelError::Parse(format!(
                "tree {}: node arrays do not match {} leaves",
                index, num_leaves
            )));
        }

        for node in 0..internal {
            for child in [self.left_child[node], self.right_child[node]] {
                let ok = if child < 0 {
                    (!child as usize) < num_leaves
                } else {
                    (child as usize) > node && (child as usize) < internal
                };
                if !ok {
                    return Err(ModelError::Parse(format!(
                        "tree {}: node {} has invalid child {}",
                        index, node, child
                    )));
                }
            }
            if self.decision_type[node] & CATEGORICAL_MASK != 0 {
                let cat_idx = self.threshold[node] as usize;
                let bounds_ok = cat_idx + 1 < self.cat_boundaries.len()
                    && self.cat_boundaries[cat_idx + 1] <= self.cat_threshold.len()
                    && self.cat_boundaries[cat_idx] <= self.cat_boundaries[cat_idx + 1];
                if !bounds_ok {
                    return Err(ModelError::Parse(format!(
                        "tree {}: node {} has invalid category set",
                        index, node
                    )));
                }
            }
        }
        Ok(())
    }

    fn predict(&self, row: &[f64]) -> f64 {
        if self.left_child.is_empty() {
            return self.leaf_value[0];
        }
        let mut node: i32 = 0;
        while node >= 0 {
            node = self.decide(node as usize, row);
        }
        self.leaf_value[!node as usize]
    }

    fn decide(&self, node: usize, row: &[f64]) -> i32 {
        let value = row
            .get(self.split_feature[node])
            .copied()
            .unwrap_or(f64::NAN);
        let decision_type = self.decision_type[node];

        if decision_type & CATEGORICAL_MASK != 0 {
            self.categorical_decision(node, value)
        } else {
            self.numerical_decision(node, value, decision_type)
        }
    }

    fn numerical_decision(&self, node: usize, mut value: f64, decision_type: u8) -> i32 {
        let missing = MissingType::from_decision_type(decision_type);
        if value.is_nan() && missing != MissingType::NaN {
            value = 0.0;
        }
        let is_missing = match missing {
            MissingType::Zero => value.abs() <= ZERO_THRESHOLD,
            MissingType::NaN => value.is_nan(),
            MissingType::None => false,
        };
        if is_missing {
            return if decision_type & DEFAULT_LEFT_MASK != 0 {
                self.left_child[node]
            } else {
                self.right_child[node]
            };
        }
        if value <= self.threshold[node] {
            self.left_child[node]
        } else {
            self.right_child[node]
        }
    }

    fn categorical_decision(&self, node: usize, value: f64) -> i32 {
        if value.is_nan() {
            return self.right_child[node];
        }
        // Categories are the value truncated toward zero, so -0.5 is category 0
        let category = value.trunc();
        if category < 0.0 {
            return self.right_child[node];
        }
        let category = category as usize;
        let cat_idx = self.threshold[node] as usize;
        let start = self.cat_boundaries[cat_idx];
        let end = self.cat_boundaries[cat_idx + 1];
        let word = category / 32;
        let in_set = word < end - start && (self.cat_threshold[start + word] >> (category % 32)) & 1 == 1;
        if in_set {
            self.left_child[node]
        } else {
            self.right_child[node]
        }
    }
}

/// A loaded tree ensemble
#[derive(Debug, Clone)]
pub struct Booster {
    feature_names: Vec<String>,
    trees: Vec<Tree>,
    transform: OutputTransform,
    average_output: bool,
}

impl Booster {
    /// Load an ensemble from a text dump on disk
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ModelError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ModelError::NotFound(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path).map_err(|source| ModelError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let booster = Self::parse(&text)?;
        info!(
            "Loaded model {:?} ({} trees, {} features)",
            path,
            booster.num_trees(),
            booster.num_features()
        );
        Ok(booster)
    }

    /// Parse an ensemble from its text dump
    pub fn parse(text: &str) -> Result<Self, ModelError> {
        let mut header: HashMap<&str, &str> = HashMap::new();
        let mut average_output = false;
        let mut tree_blocks: Vec<HashMap<&str, &str>> = Vec::new();
        let mut current: Option<HashMap<&str, &str>> = None;

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if line == "end of trees" {
                break;
            }
            if line.starts_with("Tree=") {
                if let Some(block) = current.take() {
                    tree_blocks.push(block);
                }
                current = Some(HashMap::new());
                continue;
            }
            match line.split_once('=') {
                Some((key, value)) => match current {
                    Some(ref mut block) => {
                        block.insert(key, value);
                    }
                    None => {
                        header.insert(key, value);
                    }
                },
                None if line == "average_output" => average_output = true,
                None => {}
            }
        }
        if let Some(block) = current.take() {
            tree_blocks.push(block);
        }

        let num_class: usize = match header.get("num_class") {
            Some(v) => v
                .trim()
                .parse()
                .map_err(|_| ModelError::Parse(format!("bad num_class {:?}", v)))?,
            None => 1,
        };
        if num_class != 1 {
            return Err(ModelError::Unsupported(format!(
                "{} output classes",
                num_class
            )));
        }

        let transform = OutputTransform::from_objective(header.get("objective").copied().unwrap_or(""))?;

        let feature_names: Vec<String> = header
            .get("feature_names")
            .ok_or_else(|| ModelError::Parse("missing feature_names".to_string()))?
            .split_whitespace()
            .map(|s| s.to_string())
            .collect();
        if let Some(max_idx) = header.get("max_feature_idx") {
            let max_idx: usize = max_idx
                .trim()
                .parse()
                .map_err(|_| ModelError::Parse(format!("bad max_feature_idx {:?}", max_idx)))?;
            if max_idx + 1 != feature_names.len() {
                return Err(ModelError::Parse(format!(
                    "{} feature names for max_feature_idx {}",
                    feature_names.len(),
                    max_idx
                )));
            }
        }

        if tree_blocks.is_empty() {
            return Err(ModelError::Parse("no trees".to_string()));
        }
        let trees = tree_blocks
            .iter()
            .enumerate()
            .map(|(i, fields)| Tree::from_fields(i, fields))
            .collect::<Result<Vec<_>, _>>()?;

        if let Some(bad) = trees
            .iter()
            .flat_map(|t| t.split_feature.iter())
            .find(|&&f| f >= feature_names.len())
        {
            return Err(ModelError::Parse(format!(
                "split on feature {} beyond {} names",
                bad,
                feature_names.len()
            )));
        }

        debug!(
            "Parsed ensemble: {} trees, transform {:?}, average_output {}",
            trees.len(),
            transform,
            average_output
        );

        Ok(Self {
            feature_names,
            trees,
            transform,
            average_output,
        })
    }

    /// Feature names in the column order the model expects
    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn num_features(&self) -> usize {
        self.feature_names.len()
    }

    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }

    /// Untransformed ensemble output for one row in model column order
    pub fn predict_raw(&self, row: &[f64]) -> f64 {
        let sum: f64 = self.trees.iter().map(|tree| tree.predict(row)).sum();
        if self.average_output {
            sum / self.trees.len() as f64
        } else {
            sum
        }
    }

    /// Score for one row in model column order
    pub fn predict(&self, row: &[f64]) -> f64 {
        self.transform.apply(self.predict_raw(row))
    }
}

fn required_value<T: FromStr>(
    fields: &HashMap<&str, &str>,
    key: &str,
    tree: usize,
) -> Result<T, ModelError> {
    optional_value(fields, key, tree)?
        .ok_or_else(|| ModelError::Parse(format!("tree {}: missing {}", tree, key)))
}

fn optional_value<T: FromStr>(
    fields: &HashMap<&str, &str>,
    key: &str,
    tree: usize,
) -> Result<Option<T>, ModelError> {
    fields
        .get(key)
        .map(|v| {
            v.trim()
                .parse::<T>()
                .map_err(|_| ModelError::Parse(format!("tree {}: bad {} {:?}", tree, key, v)))
        })
        .transpose()
}

fn list<T: FromStr>(
    fields: &HashMap<&str, &str>,
    key: &str,
    tree: usize,
) -> Result<Vec<T>, ModelError> {
    let raw = fields
        .get(key)
        .ok_or_else(|| ModelError::Parse(format!("tree {}: missing {}", tree, key)))?;
    raw.split_whitespace()
        .map(|token| {
            token
                .parse::<T>()
                .map_err(|_| ModelError::Parse(format!("tree {}: bad {} entry {:?}", tree, key, token)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(objective: &str, decision_types: &str, extra_header: &str) -> String {
        format!(
            "tree
version=v3
num_class=1
num_tree_per_iteration=1
label_index=0
max_feature_idx=1
objective={}
feature_names=a b
feature_infos=[0:10] [0:10]
tree_sizes=300
{}

Tree=0
num_leaves=3
num_cat=0
split_feature=0 1
split_gain=1 1
threshold=5 2
decision_type={}
left_child=1 -1
right_child=-2 -3
leaf_value=0.5 -0.5 1
leaf_weight=1 1 1
leaf_count=1 1 1
internal_value=0 0
internal_weight=0 0
internal_count=3 2
is_linear=0
shrinkage=1


end of trees

feature_importances:
a=1
b=1

parameters:
[boosting: gbdt]
end of parameters
",
            objective, extra_header, decision_types
        )
    }

    fn sigmoid(x: f64) -> f64 {
        1.0 / (1.0 + (-x).exp())
    }

    #[test]
    fn test_parse_header() {
        let booster = Booster::parse(&model("binary sigmoid:1", "2 2", "")).unwrap();
        assert_eq!(booster.feature_names(), &["a".to_string(), "b".to_string()]);
        assert_eq!(booster.num_trees(), 1);
        assert_eq!(booster.num_features(), 2);
    }

    #[test]
    fn test_numerical_routing() {
        let booster = Booster::parse(&model("regression", "2 2", "")).unwrap();
        assert_eq!(booster.predict(&[3.0, 1.0]), 0.5);
        assert_eq!(booster.predict(&[3.0, 4.0]), 1.0);
        assert_eq!(booster.predict(&[7.0, 1.0]), -0.5);
        // Threshold is inclusive on the left
        assert_eq!(booster.predict(&[5.0, 2.0]), 0.5);
    }

    #[test]
    fn test_nan_without_missing_type_is_zero() {
        let booster = Booster::parse(&model("regression", "0 0", "")).unwrap();
        assert_eq!(booster.predict(&[f64::NAN, 1.0]), 0.5);
        assert_eq!(booster.predict(&[f64::NAN, f64::NAN]), 0.5);
        // Short rows read as missing
        assert_eq!(booster.predict(&[3.0]), 0.5);
    }

    #[test]
    fn test_nan_missing_type_uses_default_direction() {
        // 8: missing type NaN, default right; 10: missing type NaN, default left
        let right = Booster::parse(&model("regression", "8 8", "")).unwrap();
        assert_eq!(right.predict(&[f64::NAN, 1.0]), -0.5);

        let left = Booster::parse(&model("regression", "10 10", "")).unwrap();
        assert_eq!(left.predict(&[f64::NAN, f64::NAN]), 0.5);
        assert_eq!(left.predict(&[3.0, f64::NAN]), 0.5);
    }

    #[test]
    fn test_zero_missing_type() {
        // 4: missing type Zero, default right
        let booster = Booster::parse(&model("regression", "4 4", "")).unwrap();
        assert_eq!(booster.predict(&[0.0, 1.0]), -0.5);
        assert_eq!(booster.predict(&[f64::NAN, 1.0]), -0.5);
        assert_eq!(booster.predict(&[1.0, 1.0]), 0.5);
    }

    #[test]
    fn test_sigmoid_transform() {
        let booster = Booster::parse(&model("binary sigmoid:1", "2 2", "")).unwrap();
        assert!((booster.predict(&[3.0, 1.0]) - sigmoid(0.5)).abs() < 1e-12);
        assert!((booster.predict_raw(&[3.0, 1.0]) - 0.5).abs() < 1e-12);

        let scaled = Booster::parse(&model("binary sigmoid:2", "2 2", "")).unwrap();
        assert!((scaled.predict(&[3.0, 1.0]) - sigmoid(1.0)).abs() < 1e-12);
    }

    #[test]
    fn test_exp_transform() {
        let booster = Booster::parse(&model("poisson", "2 2", "")).unwrap();
        assert!((booster.predict(&[3.0, 4.0]) - 1f64.exp()).abs() < 1e-12);
    }

    #[test]
    fn test_average_output() {
        let text = model("regression", "2 2", "average_output").replace(
            "\nend of trees",
            "Tree=1\nnum_leaves=1\nnum_cat=0\nleaf_value=1.5\nis_linear=0\nshrinkage=1\n\nend of trees",
        );
        let booster = Booster::parse(&text).unwrap();
        assert_eq!(booster.num_trees(), 2);
        assert!((booster.predict(&[3.0, 4.0]) - 1.25).abs() < 1e-12);
    }

    #[test]
    fn test_categorical_split() {
        let text = "tree
num_class=1
max_feature_idx=0
objective=regression
feature_names=cat

Tree=0
num_leaves=2
num_cat=1
split_feature=0
threshold=0
decision_type=1
left_child=-1
right_child=-2
leaf_value=1 2
cat_boundaries=0 1
cat_threshold=10
is_linear=0
shrinkage=1

end of trees
";
        let booster = Booster::parse(text).unwrap();
        // 10 = 0b1010: categories 1 and 3 go left
        assert_eq!(booster.predict(&[1.0]), 1.0);
        assert_eq!(booster.predict(&[3.0]), 1.0);
        assert_eq!(booster.predict(&[0.0]), 2.0);
        assert_eq!(booster.predict(&[2.0]), 2.0);
        assert_eq!(booster.predict(&[40.0]), 2.0);
        assert_eq!(booster.predict(&[-1.0]), 2.0);
        assert_eq!(booster.predict(&[f64::NAN]), 2.0);
    }

    #[test]
    fn test_categorical_truncates_toward_zero() {
        let text = "tree
num_class=1
max_feature_idx=0
objective=regression
feature_names=チルト

Tree=0
num_leaves=2
num_cat=1
split_feature=0
threshold=0
decision_type=1
left_child=-1
right_child=-2
leaf_value=1 2
cat_boundaries=0 1
cat_threshold=1
is_linear=0
shrinkage=1

end of trees
";
        let booster = Booster::parse(text).unwrap();
        // Only category 0 goes left
        assert_eq!(booster.predict(&[0.0]), 1.0);
        assert_eq!(booster.predict(&[-0.5]), 1.0);
        assert_eq!(booster.predict(&[0.5]), 1.0);
        assert_eq!(booster.predict(&[1.5]), 2.0);
        assert_eq!(booster.predict(&[-1.0]), 2.0);
    }

    #[test]
    fn test_rejects_multiclass() {
        let text = model("multiclass num_class:3", "2 2", "").replace("num_class=1", "num_class=3");
        assert!(matches!(Booster::parse(&text), Err(ModelError::Unsupported(_))));
    }

    #[test]
    fn test_rejects_linear_trees() {
        let text = model("regression", "2 2", "").replace("is_linear=0", "is_linear=1");
        assert!(matches!(Booster::parse(&text), Err(ModelError::Unsupported(_))));
    }

    #[test]
    fn test_rejects_malformed() {
        let text = model("regression", "2 2", "").replace("leaf_value=0.5 -0.5 1", "leaf_value=0.5 -0.5");
        assert!(matches!(Booster::parse(&text), Err(ModelError::Parse(_))));

        let text = model("regression", "2 2", "").replace("right_child=-2 -3", "right_child=0 -3");
        assert!(matches!(Booster::parse(&text), Err(ModelError::Parse(_))));

        assert!(matches!(Booster::parse("tree\nfeature_names=a\n"), Err(ModelError::Parse(_))));
    }

    #[test]
    fn test_load_missing_file() {
        let result = Booster::load("/nonexistent/model_0.5.txt");
        assert!(matches!(result, Err(ModelError::NotFound(_))));
    }
}
