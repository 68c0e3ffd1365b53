use serde::{Deserialize, Serialize};

/// Percentage at or above which a report card is a pass.
pub const PASS_PERCENTAGE: f64 = 33.0;

/// Grade shown when nothing in the scale matches.
pub const NO_GRADE: &str = "-";

/// One row of a school's grading scale.
///
/// A band is matched on its percentage bounds when present, otherwise on its
/// marks bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeBand {
    pub grade: String,
    pub min_marks: Option<f64>,
    pub max_marks: Option<f64>,
    pub min_percentage: Option<f64>,
    pub max_percentage: Option<f64>,
}

impl GradeBand {
    pub fn percent(grade: &str, min: f64, max: f64) -> Self {
        Self {
            grade: grade.to_string(),
            min_marks: None,
            max_marks: None,
            min_percentage: Some(min),
            max_percentage: Some(max),
        }
    }

    /// Effective `(min, max)` used for matching.
    pub fn bounds(&self) -> (f64, f64) {
        let min = self.min_percentage.or(self.min_marks).unwrap_or(0.0);
        let max = self.max_percentage.or(self.max_marks).unwrap_or(100.0);
        (min, max)
    }

    fn contains(&self, percentage: f64) -> bool {
        let (min, max) = self.bounds();
        min <= percentage && percentage <= max
    }
}

/// The 8-band scale used when a school has configured nothing.
pub fn default_bands() -> Vec<GradeBand> {
    vec![
        GradeBand::percent("A1", 91.0, 100.0),
        GradeBand::percent("A2", 81.0, 90.0),
        GradeBand::percent("B1", 71.0, 80.0),
        GradeBand::percent("B2", 61.0, 70.0),
        GradeBand::percent("C1", 51.0, 60.0),
        GradeBand::percent("C2", 41.0, 50.0),
        GradeBand::percent("D", 33.0, 40.0),
        GradeBand::percent("E", 0.0, 32.0),
    ]
}

pub fn bands_or_default(configured: Vec<GradeBand>) -> Vec<GradeBand> {
    if configured.is_empty() {
        default_bands()
    } else {
        configured
    }
}

/// First band (in the given order) whose bounds contain `percentage`.
///
/// The slice is not re-sorted: callers pass bands in precedence order.
pub fn resolve_grade(percentage: f64, bands: &[GradeBand]) -> String {
    bands
        .iter()
        .find(|b| b.contains(percentage))
        .map(|b| b.grade.clone())
        .unwrap_or_else(|| NO_GRADE.to_string())
}

/// `obtained / max * 100`, or 0 when `max` is not positive.
pub fn safe_percentage(obtained: f64, max: f64) -> f64 {
    if max > 0.0 {
        obtained / max * 100.0
    } else {
        0.0
    }
}

/// Stored percentage if present, otherwise derived from marks. `None` when
/// neither yields a number.
pub fn percent_or_from_marks(
    percentage: Option<f64>,
    marks_obtained: Option<f64>,
    max_marks: Option<f64>,
) -> Option<f64> {
    if percentage.is_some() {
        return percentage;
    }
    match (marks_obtained, max_marks) {
        (Some(obtained), Some(max)) if max > 0.0 => Some(obtained / max * 100.0),
        _ => None,
    }
}

/// Stored grade when non-blank, else resolved from `percentage`.
pub fn grade_or_resolved(
    stored: Option<&str>,
    percentage: Option<f64>,
    bands: &[GradeBand],
) -> String {
    match stored.map(str::trim) {
        Some(g) if !g.is_empty() => g.to_string(),
        _ => match percentage {
            Some(p) => resolve_grade(p, bands),
            None => NO_GRADE.to_string(),
        },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PassFail {
    Pass,
    Fail,
}

pub fn pass_fail(percentage: f64) -> PassFail {
    if percentage >= PASS_PERCENTAGE {
        PassFail::Pass
    } else {
        PassFail::Fail
    }
}
