//! Typed strategy parameters and their declared schema.
//!
//! - `ParamValue`: one integer, float or categorical value.
//! - `ParamSet`: name → value, `BTreeMap`-backed so iteration, hashing and the
//!   BLAKE3 fingerprint are independent of insertion order.
//! - `ParamSpec` / `ParamSchema`: what a strategy accepts (type, range, step,
//!   default). Search enumerates and samples from specs without knowing the strategy.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::error::ConfigError;

/// Float grids tolerate this much accumulated rounding at the upper bound.
const GRID_EPSILON: f64 = 1e-9;

// ─── Values ──────────────────────────────────────────────────────────

/// A single parameter value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Choice(String),
}

impl ParamValue {
    /// Numeric view of the value (`None` for choices).
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Int(v) => Some(*v as f64),
            ParamValue::Float(v) => Some(*v),
            ParamValue::Choice(_) => None,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            ParamValue::Int(_) => "int",
            ParamValue::Float(_) => "float",
            ParamValue::Choice(_) => "choice",
        }
    }
}

impl PartialEq for ParamValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ParamValue::Int(a), ParamValue::Int(b)) => a == b,
            (ParamValue::Float(a), ParamValue::Float(b)) => a.to_bits() == b.to_bits(),
            (ParamValue::Choice(a), ParamValue::Choice(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for ParamValue {}

impl Hash for ParamValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            ParamValue::Int(v) => {
                0u8.hash(state);
                v.hash(state);
            }
            ParamValue::Float(v) => {
                1u8.hash(state);
                v.to_bits().hash(state);
            }
            ParamValue::Choice(v) => {
                2u8.hash(state);
                v.hash(state);
            }
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Int(v) => write!(f, "{v}"),
            ParamValue::Float(v) => write!(f, "{v}"),
            ParamValue::Choice(v) => f.write_str(v),
        }
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Choice(v.to_string())
    }
}

// ─── ParamSet ────────────────────────────────────────────────────────

/// Parameter set for one strategy run.
///
/// May be partial: parameters it omits resolve to schema defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParamSet {
    values: BTreeMap<String, ParamValue>,
}

impl ParamSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<ParamValue>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Number of explicitly set parameters. Lower means a simpler model.
    pub fn cardinality(&self) -> usize {
        self.values.len()
    }

    /// Integer parameter (integral floats are accepted).
    pub fn get_int(&self, name: &str) -> Result<i64, ConfigError> {
        match self.values.get(name) {
            Some(ParamValue::Int(v)) => Ok(*v),
            Some(ParamValue::Float(v)) if v.fract() == 0.0 && v.is_finite() => Ok(*v as i64),
            Some(other) => Err(mismatch(name, "int", other)),
            None => Err(ConfigError::UnknownParam(name.to_string())),
        }
    }

    /// Integer parameter as a non-negative count (periods, lookbacks).
    pub fn get_usize(&self, name: &str) -> Result<usize, ConfigError> {
        let v = self.get_int(name)?;
        usize::try_from(v).map_err(|_| ConfigError::OutOfRange {
            name: name.to_string(),
            value: v as f64,
            min: 0.0,
            max: usize::MAX as f64,
        })
    }

    /// Float parameter (integers are widened).
    pub fn get_float(&self, name: &str) -> Result<f64, ConfigError> {
        match self.values.get(name) {
            Some(ParamValue::Float(v)) => Ok(*v),
            Some(ParamValue::Int(v)) => Ok(*v as f64),
            Some(other) => Err(mismatch(name, "float", other)),
            None => Err(ConfigError::UnknownParam(name.to_string())),
        }
    }

    pub fn get_choice(&self, name: &str) -> Result<&str, ConfigError> {
        match self.values.get(name) {
            Some(ParamValue::Choice(v)) => Ok(v.as_str()),
            Some(other) => Err(mismatch(name, "choice", other)),
            None => Err(ConfigError::UnknownParam(name.to_string())),
        }
    }

    /// Deterministic BLAKE3 fingerprint (hex) of names and values.
    ///
    /// Key order is fixed by the `BTreeMap`, so equal sets always produce the
    /// same fingerprint.
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for (name, value) in &self.values {
            hasher.update(name.as_bytes());
            hasher.update(&[0xff]);
            match value {
                ParamValue::Int(v) => {
                    hasher.update(&[0]);
                    hasher.update(&v.to_le_bytes());
                }
                ParamValue::Float(v) => {
                    hasher.update(&[1]);
                    hasher.update(&v.to_bits().to_le_bytes());
                }
                ParamValue::Choice(v) => {
                    hasher.update(&[2]);
                    hasher.update(v.as_bytes());
                }
            }
            hasher.update(&[0xfe]);
        }
        hasher.finalize().to_hex().to_string()
    }

    /// Flatten to `name → display string`, for flat record export.
    pub fn to_string_map(&self) -> BTreeMap<String, String> {
        self.values
            .iter()
            .map(|(k, v)| (k.clone(), v.to_string()))
            .collect()
    }
}

impl fmt::Display for ParamSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (name, value) in &self.values {
            if !first {
                f.write_str(", ")?;
            }
            write!(f, "{name}={value}")?;
            first = false;
        }
        Ok(())
    }
}

impl FromIterator<(String, ParamValue)> for ParamSet {
    fn from_iter<I: IntoIterator<Item = (String, ParamValue)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

fn mismatch(name: &str, expected: &'static str, actual: &ParamValue) -> ConfigError {
    ConfigError::TypeMismatch {
        name: name.to_string(),
        expected,
        actual: format!("{} {}", actual.type_name(), actual),
    }
}

// ─── Specs ───────────────────────────────────────────────────────────

/// Declared type and range of a parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParamKind {
    Int {
        min: i64,
        max: i64,
        step: i64,
        default: i64,
    },
    Float {
        min: f64,
        max: f64,
        step: f64,
        default: f64,
    },
    Choice {
        options: Vec<String>,
        default: String,
    },
}

/// A named parameter declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    #[serde(flatten)]
    pub kind: ParamKind,
}

impl ParamSpec {
    pub fn int(name: &str, min: i64, max: i64, step: i64, default: i64) -> Self {
        Self {
            name: name.to_string(),
            kind: ParamKind::Int {
                min,
                max,
                step,
                default,
            },
        }
    }

    pub fn float(name: &str, min: f64, max: f64, step: f64, default: f64) -> Self {
        Self {
            name: name.to_string(),
            kind: ParamKind::Float {
                min,
                max,
                step,
                default,
            },
        }
    }

    pub fn choice(name: &str, options: &[&str], default: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: ParamKind::Choice {
                options: options.iter().map(|s| s.to_string()).collect(),
                default: default.to_string(),
            },
        }
    }

    /// Check the declaration itself: ordered bounds, positive step, default inside.
    pub fn check(&self) -> Result<(), ConfigError> {
        let bad = |reason: String| ConfigError::InvalidRange {
            name: self.name.clone(),
            reason,
        };
        match &self.kind {
            ParamKind::Int {
                min,
                max,
                step,
                default,
            } => {
                if min > max {
                    return Err(bad(format!("min {min} > max {max}")));
                }
                if *step <= 0 {
                    return Err(bad(format!("step must be positive, got {step}")));
                }
                if default < min || default > max {
                    return Err(bad(format!("default {default} outside [{min}, {max}]")));
                }
            }
            ParamKind::Float {
                min,
                max,
                step,
                default,
            } => {
                if !(min.is_finite() && max.is_finite() && step.is_finite()) {
                    return Err(bad("bounds and step must be finite".into()));
                }
                if min > max {
                    return Err(bad(format!("min {min} > max {max}")));
                }
                if *step <= 0.0 {
                    return Err(bad(format!("step must be positive, got {step}")));
                }
                if default < min || default > max {
                    return Err(bad(format!("default {default} outside [{min}, {max}]")));
                }
            }
            ParamKind::Choice { options, default } => {
                if options.is_empty() {
                    return Err(bad("no options".into()));
                }
                if !options.contains(default) {
                    return Err(bad(format!("default '{default}' is not an option")));
                }
            }
        }
        Ok(())
    }

    pub fn default_value(&self) -> ParamValue {
        match &self.kind {
            ParamKind::Int { default, .. } => ParamValue::Int(*default),
            ParamKind::Float { default, .. } => ParamValue::Float(*default),
            ParamKind::Choice { default, .. } => ParamValue::Choice(default.clone()),
        }
    }

    /// Validate and normalize a value against this declaration.
    ///
    /// Ints accept integral floats; floats accept ints. The returned value has
    /// the declared type.
    pub fn normalize(&self, value: &ParamValue) -> Result<ParamValue, ConfigError> {
        match (&self.kind, value) {
            (ParamKind::Int { min, max, .. }, _) => {
                let v = match value {
                    ParamValue::Int(v) => *v,
                    ParamValue::Float(f) if f.is_finite() && f.fract() == 0.0 => *f as i64,
                    other => return Err(mismatch(&self.name, "int", other)),
                };
                if v < *min || v > *max {
                    return Err(ConfigError::OutOfRange {
                        name: self.name.clone(),
                        value: v as f64,
                        min: *min as f64,
                        max: *max as f64,
                    });
                }
                Ok(ParamValue::Int(v))
            }
            (ParamKind::Float { min, max, .. }, _) => {
                let v = match value.as_f64() {
                    Some(v) if !v.is_nan() => v,
                    _ => return Err(mismatch(&self.name, "float", value)),
                };
                if v < *min || v > *max {
                    return Err(ConfigError::OutOfRange {
                        name: self.name.clone(),
                        value: v,
                        min: *min,
                        max: *max,
                    });
                }
                Ok(ParamValue::Float(v))
            }
            (ParamKind::Choice { options, .. }, ParamValue::Choice(v)) => {
                if options.contains(v) {
                    Ok(ParamValue::Choice(v.clone()))
                } else {
                    Err(ConfigError::InvalidChoice {
                        name: self.name.clone(),
                        value: v.clone(),
                        options: options.clone(),
                    })
                }
            }
            (ParamKind::Choice { .. }, other) => Err(mismatch(&self.name, "choice", other)),
        }
    }

    /// Number of grid points this parameter contributes to a Cartesian product.
    pub fn grid_len(&self) -> usize {
        match &self.kind {
            ParamKind::Int { min, max, step, .. } => {
                if max < min || *step <= 0 {
                    return 0;
                }
                ((max - min) / step) as usize + 1
            }
            ParamKind::Float { min, max, step, .. } => {
                if max < min || *step <= 0.0 {
                    return 0;
                }
                ((max - min) / step + GRID_EPSILON).floor() as usize + 1
            }
            ParamKind::Choice { options, .. } => options.len(),
        }
    }

    /// The `i`-th grid point (`i < grid_len()`).
    pub fn grid_value(&self, i: usize) -> ParamValue {
        match &self.kind {
            ParamKind::Int { min, step, .. } => ParamValue::Int(min + step * i as i64),
            ParamKind::Float { min, max, step, .. } => {
                ParamValue::Float((min + step * i as f64).min(*max))
            }
            ParamKind::Choice { options, .. } => ParamValue::Choice(options[i].clone()),
        }
    }

    /// All grid points in enumeration order.
    pub fn grid_values(&self) -> Vec<ParamValue> {
        (0..self.grid_len()).map(|i| self.grid_value(i)).collect()
    }

    /// One draw from the declared distribution.
    ///
    /// Ints are uniform over the stepped grid, floats uniform over `[min, max]`,
    /// choices uniform over the options.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> ParamValue {
        match &self.kind {
            ParamKind::Int { .. } => {
                let n = self.grid_len().max(1);
                self.grid_value(rng.gen_range(0..n))
            }
            ParamKind::Float { min, max, .. } => {
                if min < max {
                    ParamValue::Float(rng.gen_range(*min..=*max))
                } else {
                    ParamValue::Float(*min)
                }
            }
            ParamKind::Choice { options, default } => ParamValue::Choice(
                options.choose(rng).cloned().unwrap_or_else(|| default.clone()),
            ),
        }
    }
}

// ─── Schema ──────────────────────────────────────────────────────────

/// The parameters a strategy declares, in enumeration order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamSchema {
    pub params: Vec<ParamSpec>,
}

impl ParamSchema {
    pub fn new(params: Vec<ParamSpec>) -> Self {
        Self { params }
    }

    pub fn get(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.params.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Schema defaults as a full ParamSet.
    pub fn defaults(&self) -> ParamSet {
        self.params
            .iter()
            .map(|p| (p.name.clone(), p.default_value()))
            .collect()
    }

    /// Reject unknown names and invalid values.
    pub fn validate(&self, params: &ParamSet) -> Result<(), ConfigError> {
        for (name, value) in params.iter() {
            let spec = self
                .get(name)
                .ok_or_else(|| ConfigError::UnknownParam(name.clone()))?;
            spec.normalize(value)?;
        }
        Ok(())
    }

    /// Validate, normalize, and fill every missing parameter with its default.
    pub fn resolve(&self, params: &ParamSet) -> Result<ParamSet, ConfigError> {
        self.validate(params)?;
        self.params
            .iter()
            .map(|spec| {
                let value = match params.get(&spec.name) {
                    Some(v) => spec.normalize(v)?,
                    None => spec.default_value(),
                };
                Ok((spec.name.clone(), value))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    fn schema() -> ParamSchema {
        ParamSchema::new(vec![
            ParamSpec::int("fast", 5, 20, 5, 10),
            ParamSpec::float("threshold", 0.0, 0.1, 0.05, 0.0),
            ParamSpec::choice("ma_type", &["sma", "ema"], "sma"),
        ])
    }

    #[test]
    fn param_set_hash_ignores_insertion_order() {
        let a = ParamSet::new().with("fast", 10).with("ma_type", "sma");
        let b = ParamSet::new().with("ma_type", "sma").with("fast", 10);
        assert_eq!(a, b);
        assert_eq!(a.fingerprint(), b.fingerprint());

        let mut set = HashSet::new();
        set.insert(a);
        assert!(!set.insert(b));
    }

    #[test]
    fn fingerprint_changes_with_values() {
        let a = ParamSet::new().with("fast", 10);
        let b = ParamSet::new().with("fast", 11);
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn int_and_float_are_distinct_values() {
        assert_ne!(ParamValue::Int(1), ParamValue::Float(1.0));
    }

    #[test]
    fn typed_getters_coerce_compatible_values() {
        let params = ParamSet::new().with("a", 3.0).with("b", 2).with("c", "ema");
        assert_eq!(params.get_int("a").unwrap(), 3);
        assert_eq!(params.get_float("b").unwrap(), 2.0);
        assert_eq!(params.get_choice("c").unwrap(), "ema");
        assert!(params.get_int("c").is_err());
        assert!(matches!(
            params.get_float("missing"),
            Err(ConfigError::UnknownParam(_))
        ));
    }

    #[test]
    fn resolve_fills_defaults_and_normalizes() {
        let resolved = schema()
            .resolve(&ParamSet::new().with("threshold", 0))
            .unwrap();
        assert_eq!(resolved.get("fast"), Some(&ParamValue::Int(10)));
        assert_eq!(resolved.get("threshold"), Some(&ParamValue::Float(0.0)));
        assert_eq!(
            resolved.get("ma_type"),
            Some(&ParamValue::Choice("sma".into()))
        );
    }

    #[test]
    fn validate_rejects_unknown_and_out_of_range() {
        let s = schema();
        assert!(matches!(
            s.validate(&ParamSet::new().with("slow", 50)),
            Err(ConfigError::UnknownParam(_))
        ));
        assert!(matches!(
            s.validate(&ParamSet::new().with("fast", 50)),
            Err(ConfigError::OutOfRange { .. })
        ));
        assert!(matches!(
            s.validate(&ParamSet::new().with("ma_type", "wma")),
            Err(ConfigError::InvalidChoice { .. })
        ));
        assert!(matches!(
            s.validate(&ParamSet::new().with("fast", "ten")),
            Err(ConfigError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn grid_values_follow_step() {
        let s = schema();
        assert_eq!(
            s.get("fast").unwrap().grid_values(),
            vec![
                ParamValue::Int(5),
                ParamValue::Int(10),
                ParamValue::Int(15),
                ParamValue::Int(20)
            ]
        );
        assert_eq!(s.get("threshold").unwrap().grid_len(), 3);
        assert_eq!(s.get("ma_type").unwrap().grid_len(), 2);
    }

    #[test]
    fn float_grid_does_not_overshoot_max() {
        let spec = ParamSpec::float("x", 0.0, 0.3, 0.1, 0.0);
        let values = spec.grid_values();
        assert_eq!(values.len(), 4);
        let last = values.last().and_then(|v| v.as_f64()).unwrap();
        assert!(last <= 0.3);
    }

    #[test]
    fn sampling_stays_in_range() {
        let s = schema();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            for spec in &s.params {
                let v = spec.sample(&mut rng);
                assert!(spec.normalize(&v).is_ok(), "{} sampled {v}", spec.name);
            }
        }
    }

    #[test]
    fn spec_check_rejects_bad_declarations() {
        assert!(ParamSpec::int("x", 10, 5, 1, 7).check().is_err());
        assert!(ParamSpec::int("x", 1, 5, 0, 3).check().is_err());
        assert!(ParamSpec::float("x", 0.0, 1.0, 0.1, 2.0).check().is_err());
        assert!(ParamSpec::choice("x", &[], "a").check().is_err());
        assert!(ParamSpec::choice("x", &["a"], "a").check().is_ok());
    }

    #[test]
    fn param_set_json_is_flat_map() {
        let params = ParamSet::new().with("fast", 10).with("ma_type", "ema");
        let json = serde_json::to_string(&params).unwrap();
        assert_eq!(json, r#"{"fast":10,"ma_type":"ema"}"#);
        let back: ParamSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, params);
    }

    #[test]
    fn display_lists_sorted_pairs() {
        let params = ParamSet::new().with("slow", 30).with("fast", 10);
        assert_eq!(params.to_string(), "fast=10, slow=30");
    }
}
