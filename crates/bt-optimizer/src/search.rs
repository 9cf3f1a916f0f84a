//! Search space definitions and concrete parameter values.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A single parameter dimension in the search space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDef {
    /// Parameter name (e.g. "learning_rate").
    pub name: String,
    /// The kind of search range.
    pub kind: ParameterKind,
}

/// Describes how a parameter is sampled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParameterKind {
    /// Continuous uniform range [low, high].
    FloatRange { low: f64, high: f64 },
    /// Integer range [low, high] inclusive.
    IntRange { low: i64, high: i64 },
    /// Log-uniform range (sampled in log-space then exponentiated).
    LogUniform { low: f64, high: f64 },
    /// Categorical choices.
    Choice { values: Vec<String> },
}

impl ParameterKind {
    /// Whether `value` lies inside this dimension.
    pub fn contains(&self, value: &ParameterValue) -> bool {
        match (self, value) {
            (Self::FloatRange { low, high }, ParameterValue::Float(v))
            | (Self::LogUniform { low, high }, ParameterValue::Float(v)) => {
                v.is_finite() && *v >= *low && *v <= *high
            }
            (Self::IntRange { low, high }, ParameterValue::Int(v)) => v >= low && v <= high,
            (Self::Choice { values }, ParameterValue::Categorical(v)) => values.contains(v),
            _ => false,
        }
    }
}

/// A concrete parameter value produced by a sampler.
///
/// Untagged so stored params read as plain JSON: integers stay integers,
/// floats stay floats, choices are strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Int(i64),
    Float(f64),
    Categorical(String),
}

impl ParameterValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Categorical(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Categorical(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Categorical(v) => write!(f, "{v}"),
        }
    }
}

/// The full search space: an ordered list of parameter definitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSpace {
    pub parameters: Vec<ParameterDef>,
}

impl SearchSpace {
    pub fn new() -> Self {
        Self {
            parameters: Vec::new(),
        }
    }

    pub fn add_float(mut self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::FloatRange { low, high },
        });
        self
    }

    pub fn add_int(mut self, name: impl Into<String>, low: i64, high: i64) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::IntRange { low, high },
        });
        self
    }

    pub fn add_log_uniform(mut self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::LogUniform { low, high },
        });
        self
    }

    pub fn add_choice<S: Into<String>>(
        mut self,
        name: impl Into<String>,
        values: impl IntoIterator<Item = S>,
    ) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::Choice {
                values: values.into_iter().map(Into::into).collect(),
            },
        });
        self
    }

    pub fn get(&self, name: &str) -> Option<&ParameterDef> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    /// Whether `params` assigns an in-range value to every dimension.
    pub fn contains(&self, params: &BTreeMap<String, ParameterValue>) -> bool {
        self.parameters.iter().all(|def| {
            params
                .get(&def.name)
                .map_or(false, |value| def.kind.contains(value))
        })
    }
}

impl Default for SearchSpace {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_space() -> SearchSpace {
        SearchSpace::new()
            .add_int("max_depth", 3, 15)
            .add_log_uniform("learning_rate", 1e-5, 1e-1)
            .add_float("subsample", 0.5, 1.0)
            .add_choice("boosting_type", ["gbdt", "dart", "rf"])
    }

    #[test]
    fn search_space_builder_chain() {
        let space = sample_space();
        assert_eq!(space.len(), 4);
        assert!(matches!(
            space.get("boosting_type").map(|p| &p.kind),
            Some(ParameterKind::Choice { values }) if values.len() == 3
        ));
        assert!(space.get("missing").is_none());
    }

    #[test]
    fn contains_checks_every_dimension() {
        let space = sample_space();
        let mut params = BTreeMap::new();
        params.insert("max_depth".to_string(), ParameterValue::Int(7));
        params.insert("learning_rate".to_string(), ParameterValue::Float(0.01));
        params.insert("subsample".to_string(), ParameterValue::Float(0.75));
        params.insert(
            "boosting_type".to_string(),
            ParameterValue::Categorical("dart".to_string()),
        );
        assert!(space.contains(&params));

        params.insert("max_depth".to_string(), ParameterValue::Int(0));
        assert!(!space.contains(&params));

        params.insert("max_depth".to_string(), ParameterValue::Float(7.0));
        assert!(!space.contains(&params));

        params.remove("max_depth");
        assert!(!space.contains(&params));
    }

    #[test]
    fn parameter_values_round_trip_as_plain_json() {
        let mut params = BTreeMap::new();
        params.insert("a".to_string(), ParameterValue::Int(3));
        params.insert("b".to_string(), ParameterValue::Float(0.5));
        params.insert("c".to_string(), ParameterValue::Categorical("rf".to_string()));

        let json = serde_json::to_string(&params).unwrap();
        assert_eq!(json, r#"{"a":3,"b":0.5,"c":"rf"}"#);
        let back: BTreeMap<String, ParameterValue> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, params);
    }

    #[test]
    fn accessors_and_display() {
        assert_eq!(ParameterValue::Int(4).as_f64(), Some(4.0));
        assert_eq!(ParameterValue::Int(4).as_i64(), Some(4));
        assert_eq!(ParameterValue::Float(0.5).as_i64(), None);
        assert_eq!(ParameterValue::Categorical("gbdt".into()).as_str(), Some("gbdt"));
        assert_eq!(ParameterValue::Float(0.25).to_string(), "0.25");
    }
}
