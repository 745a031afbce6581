use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};

use crate::error::GradebookError;

/// Goal name that carries the final-exam grade.
pub const FINAL_GOAL: &str = "Final";

/// Averages at or above this are exempt from the final exam.
pub const APPROVAL_THRESHOLD: f64 = 7.0;

const DEFAULT_GOALS: [&str; 6] = [
    "Requirements",
    "Configuration Management",
    "Project Management",
    "Design",
    "Refactoring",
    "Tests",
];

/// VB6-compatible 1-decimal rounding used across the gradebook:
/// `Int(10*x + 0.5) / 10`
pub fn round_off_1_decimal(x: f64) -> f64 {
    ((10.0 * x) + 0.5).floor() / 10.0
}

/// Qualitative grade. Ordered MANA < MPA < MA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Conceito {
    #[serde(rename = "MANA")]
    Mana,
    #[serde(rename = "MPA")]
    Mpa,
    #[serde(rename = "MA")]
    Ma,
}

impl Conceito {
    pub const ALL: [Conceito; 3] = [Conceito::Mana, Conceito::Mpa, Conceito::Ma];

    pub fn as_str(self) -> &'static str {
        match self {
            Conceito::Mana => "MANA",
            Conceito::Mpa => "MPA",
            Conceito::Ma => "MA",
        }
    }
}

impl fmt::Display for Conceito {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Conceito {
    type Err = GradebookError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "MANA" => Ok(Conceito::Mana),
            "MPA" => Ok(Conceito::Mpa),
            "MA" => Ok(Conceito::Ma),
            other => Err(GradebookError::validation(format!(
                "Invalid grade '{}': expected one of MANA, MPA, MA",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalWeight {
    pub goal: String,
    pub weight: f64,
}

/// Wire/persisted shape of a specification, validated into
/// [`GradeSpecification`] on the way in.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecificationDef {
    pub goals: Vec<GoalWeight>,
    pub concept_values: HashMap<Conceito, f64>,
}

/// Weight tables for goals and conceitos. Immutable after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SpecificationDef", into = "SpecificationDef")]
pub struct GradeSpecification {
    goals: Vec<GoalWeight>,
    values: [f64; 3],
}

impl GradeSpecification {
    pub fn new(
        goals: Vec<GoalWeight>,
        concept_values: &HashMap<Conceito, f64>,
    ) -> Result<Self, GradebookError> {
        if goals.is_empty() {
            return Err(GradebookError::validation(
                "grade specification needs at least one goal",
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for g in &goals {
            let name = g.goal.trim();
            if name.is_empty() || name == FINAL_GOAL {
                return Err(GradebookError::validation(format!(
                    "invalid goal name '{}'",
                    g.goal
                )));
            }
            if !seen.insert(name.to_string()) {
                return Err(GradebookError::validation(format!(
                    "duplicate goal '{}'",
                    name
                )));
            }
            if !(g.weight.is_finite() && g.weight > 0.0) {
                return Err(GradebookError::validation(format!(
                    "goal '{}' must have a positive weight",
                    name
                )));
            }
        }

        let mut values = [0.0; 3];
        for (i, c) in Conceito::ALL.iter().enumerate() {
            let Some(v) = concept_values.get(c).copied() else {
                return Err(GradebookError::validation(format!(
                    "missing value for conceito {}",
                    c
                )));
            };
            if !v.is_finite() {
                return Err(GradebookError::validation(format!(
                    "value for conceito {} must be finite",
                    c
                )));
            }
            values[i] = v;
        }

        let goals = goals
            .into_iter()
            .map(|g| GoalWeight {
                goal: g.goal.trim().to_string(),
                weight: g.weight,
            })
            .collect();
        Ok(Self { goals, values })
    }

    /// Goals a student must be graded on before an average exists.
    pub fn required_goals(&self) -> impl Iterator<Item = &str> {
        self.goals.iter().map(|g| g.goal.as_str())
    }

    pub fn knows_goal(&self, goal: &str) -> bool {
        self.goals.iter().any(|g| g.goal == goal)
    }

    pub fn weight_of(&self, goal: &str) -> Option<f64> {
        self.goals.iter().find(|g| g.goal == goal).map(|g| g.weight)
    }

    pub fn value_of(&self, grade: Conceito) -> f64 {
        match grade {
            Conceito::Mana => self.values[0],
            Conceito::Mpa => self.values[1],
            Conceito::Ma => self.values[2],
        }
    }

    /// Weighted average over the goals in `grades` that this specification
    /// knows. `None` when none of them is known.
    pub fn calc<'a, I>(&self, grades: I) -> Option<f64>
    where
        I: IntoIterator<Item = (&'a str, Conceito)>,
    {
        let mut sum = 0.0;
        let mut weights = 0.0;
        for (goal, grade) in grades {
            let Some(w) = self.weight_of(goal) else {
                continue;
            };
            sum += w * self.value_of(grade);
            weights += w;
        }
        if weights > 0.0 {
            Some(sum / weights)
        } else {
            None
        }
    }
}

impl TryFrom<SpecificationDef> for GradeSpecification {
    type Error = GradebookError;

    fn try_from(def: SpecificationDef) -> Result<Self, Self::Error> {
        GradeSpecification::new(def.goals, &def.concept_values)
    }
}

impl From<GradeSpecification> for SpecificationDef {
    fn from(spec: GradeSpecification) -> Self {
        let concept_values = Conceito::ALL
            .iter()
            .map(|c| (*c, spec.value_of(*c)))
            .collect();
        SpecificationDef {
            goals: spec.goals,
            concept_values,
        }
    }
}

fn build_default_specification() -> GradeSpecification {
    let goals = DEFAULT_GOALS
        .iter()
        .map(|g| GoalWeight {
            goal: (*g).to_string(),
            weight: 1.0,
        })
        .collect();
    GradeSpecification {
        goals,
        values: [0.0, 7.0, 10.0],
    }
}

/// The process-wide specification used by classes without an override.
pub fn default_specification() -> Arc<GradeSpecification> {
    static DEFAULT: OnceLock<Arc<GradeSpecification>> = OnceLock::new();
    DEFAULT
        .get_or_init(|| Arc::new(build_default_specification()))
        .clone()
}
