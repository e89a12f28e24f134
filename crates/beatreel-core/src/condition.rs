//! Mood rule conditions
//!
//! Conditions are a small tagged union evaluated against the analysis
//! features. Config files may express them in three shapes, all of which
//! compile to [`Condition`]:
//!
//! ```text
//! { "bpm_min": 110, "energy_min": 0.6, "key_mode": "major" }      bounds
//! { "type": "threshold", "metric": "bpm", "op": "gt", "value": 120 } tagged
//! "bpm 90-120 AND minor_key AND genre == 'lofi' OR genre == 'jazz'" string
//! ```

use crate::types::KeyMode;
use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_while1},
    character::complete::{char, multispace0, multispace1},
    combinator::{all_consuming, map, value},
    multi::separated_list1,
    number::complete::double,
    sequence::{delimited, preceded},
    IResult, Parser,
};
use serde::{Deserialize, Serialize};

/// Numeric feature a condition can test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Bpm,
    Energy,
}

/// Comparison operator for thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Gt,
    Ge,
    Lt,
    Le,
}

impl Comparison {
    fn holds(&self, lhs: f64, rhs: f64) -> bool {
        match self {
            Comparison::Gt => lhs > rhs,
            Comparison::Ge => lhs >= rhs,
            Comparison::Lt => lhs < rhs,
            Comparison::Le => lhs <= rhs,
        }
    }
}

/// Categorical feature a condition can test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    KeyMode,
    EnergyLevel,
    Genre,
}

/// Coarse loudness bucket derived from the energy scalar
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnergyLevel {
    High,
    Medium,
    Low,
}

impl EnergyLevel {
    /// Bucket `energy` with the given cut points
    pub fn classify(energy: f64, high: f64, medium: f64) -> Self {
        if energy >= high {
            EnergyLevel::High
        } else if energy >= medium {
            EnergyLevel::Medium
        } else {
            EnergyLevel::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EnergyLevel::High => "high",
            EnergyLevel::Medium => "medium",
            EnergyLevel::Low => "low",
        }
    }
}

/// Features a condition is evaluated against
#[derive(Debug, Clone)]
pub struct Features<'a> {
    pub bpm: f64,
    pub energy: f64,
    pub mode: KeyMode,
    pub energy_level: EnergyLevel,
    pub genre: &'a str,
}

impl Features<'_> {
    fn metric(&self, metric: Metric) -> f64 {
        match metric {
            Metric::Bpm => self.bpm,
            Metric::Energy => self.energy,
        }
    }

    fn category(&self, category: Category) -> String {
        match category {
            Category::KeyMode => self.mode.to_string(),
            Category::EnergyLevel => self.energy_level.as_str().to_string(),
            Category::Genre => self.genre.to_lowercase(),
        }
    }
}

/// A mood rule predicate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    /// `min <= metric < max`; either bound may be absent
    Range {
        metric: Metric,
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
        #[serde(default)]
        max_inclusive: bool,
    },
    Threshold {
        metric: Metric,
        op: Comparison,
        value: f64,
    },
    /// Case-insensitive membership test
    Categorical {
        field: Category,
        one_of: Vec<String>,
    },
    /// Conjunction; an empty list always holds
    All { conditions: Vec<Condition> },
}

impl Condition {
    /// Evaluate against analysis features
    pub fn matches(&self, features: &Features<'_>) -> bool {
        match self {
            Condition::Range {
                metric,
                min,
                max,
                max_inclusive,
            } => {
                let v = features.metric(*metric);
                let above = min.map_or(true, |lo| v >= lo);
                let below = max.map_or(true, |hi| if *max_inclusive { v <= hi } else { v < hi });
                above && below
            }
            Condition::Threshold { metric, op, value } => op.holds(features.metric(*metric), *value),
            Condition::Categorical { field, one_of } => {
                let actual = features.category(*field);
                one_of.iter().any(|c| c.eq_ignore_ascii_case(&actual))
            }
            Condition::All { conditions } => conditions.iter().all(|c| c.matches(features)),
        }
    }
}

/// Bounds-object form of a condition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Bounds {
    #[serde(default)]
    pub bpm_min: Option<f64>,
    #[serde(default)]
    pub bpm_max: Option<f64>,
    #[serde(default)]
    pub energy_min: Option<f64>,
    #[serde(default)]
    pub energy_max: Option<f64>,
    #[serde(default)]
    pub key_mode: Option<KeyMode>,
}

impl From<Bounds> for Condition {
    fn from(b: Bounds) -> Self {
        let mut conditions = Vec::new();
        if b.bpm_min.is_some() || b.bpm_max.is_some() {
            conditions.push(Condition::Range {
                metric: Metric::Bpm,
                min: b.bpm_min,
                max: b.bpm_max,
                max_inclusive: false,
            });
        }
        if b.energy_min.is_some() || b.energy_max.is_some() {
            conditions.push(Condition::Range {
                metric: Metric::Energy,
                min: b.energy_min,
                max: b.energy_max,
                max_inclusive: false,
            });
        }
        if let Some(mode) = b.key_mode {
            conditions.push(Condition::Categorical {
                field: Category::KeyMode,
                one_of: vec![mode.to_string()],
            });
        }
        Condition::All { conditions }
    }
}

/// Any accepted on-disk form of a condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionSpec {
    Expression(String),
    Tagged(Condition),
    Bounds(Bounds),
}

impl ConditionSpec {
    /// Compile to a [`Condition`]; only the string form can fail
    pub fn compile(&self) -> Result<Condition, String> {
        match self {
            ConditionSpec::Expression(s) => parse_condition(s),
            ConditionSpec::Tagged(c) => Ok(c.clone()),
            ConditionSpec::Bounds(b) => Ok(b.clone().into()),
        }
    }
}

impl Default for ConditionSpec {
    fn default() -> Self {
        ConditionSpec::Bounds(Bounds::default())
    }
}

// ============================================================================
// Condition string grammar
// ============================================================================

fn metric(input: &str) -> IResult<&str, Metric> {
    alt((
        value(Metric::Bpm, tag_no_case("bpm")),
        value(Metric::Energy, tag_no_case("energy")),
    ))
    .parse(input)
}

fn comparison(input: &str) -> IResult<&str, Comparison> {
    alt((
        value(Comparison::Ge, tag(">=")),
        value(Comparison::Le, tag("<=")),
        value(Comparison::Gt, tag(">")),
        value(Comparison::Lt, tag("<")),
    ))
    .parse(input)
}

fn flag(input: &str) -> IResult<&str, Condition> {
    let categorical = |field: Category, v: &str| Condition::Categorical {
        field,
        one_of: vec![v.to_string()],
    };
    alt((
        value(categorical(Category::KeyMode, "major"), tag_no_case("major_key")),
        value(categorical(Category::KeyMode, "minor"), tag_no_case("minor_key")),
        value(categorical(Category::EnergyLevel, "high"), tag_no_case("energy_high")),
        value(categorical(Category::EnergyLevel, "medium"), tag_no_case("energy_medium")),
        value(categorical(Category::EnergyLevel, "low"), tag_no_case("energy_low")),
    ))
    .parse(input)
}

fn threshold(input: &str) -> IResult<&str, Condition> {
    map(
        (metric, multispace0, comparison, multispace0, double),
        |(metric, _, op, _, value)| Condition::Threshold { metric, op, value },
    )
    .parse(input)
}

/// `bpm 90-120`, inclusive on both ends
fn span(input: &str) -> IResult<&str, Condition> {
    map(
        (metric, multispace1, double, multispace0, char('-'), multispace0, double),
        |(metric, _, lo, _, _, _, hi)| Condition::Range {
            metric,
            min: Some(lo),
            max: Some(hi),
            max_inclusive: true,
        },
    )
    .parse(input)
}

fn quoted(input: &str) -> IResult<&str, &str> {
    alt((
        delimited(char('\''), take_while1(|c: char| c != '\''), char('\'')),
        delimited(char('"'), take_while1(|c: char| c != '"'), char('"')),
    ))
    .parse(input)
}

fn genre_eq(input: &str) -> IResult<&str, &str> {
    preceded((tag_no_case("genre"), multispace0, tag("=="), multispace0), quoted).parse(input)
}

fn genre_any(input: &str) -> IResult<&str, Condition> {
    map(
        separated_list1((multispace1, tag_no_case("OR"), multispace1), genre_eq),
        |genres| Condition::Categorical {
            field: Category::Genre,
            one_of: genres.into_iter().map(|g| g.to_lowercase()).collect(),
        },
    )
    .parse(input)
}

fn term(input: &str) -> IResult<&str, Condition> {
    alt((flag, genre_any, threshold, span)).parse(input)
}

fn conjunction(input: &str) -> IResult<&str, Vec<Condition>> {
    separated_list1((multispace1, tag_no_case("AND"), multispace1), term).parse(input)
}

/// Parse an `AND`-joined condition string
pub fn parse_condition(input: &str) -> Result<Condition, String> {
    let (_, mut terms) = all_consuming(delimited(multispace0, conjunction, multispace0))
        .parse(input)
        .map_err(|e| format!("invalid condition {:?}: {}", input, e))?;

    Ok(if terms.len() == 1 {
        terms.remove(0)
    } else {
        Condition::All { conditions: terms }
    })
}
