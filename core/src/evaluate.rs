//! Accuracy of a predicted trajectory against ground truth.
//!
//! Predicted points and ground-truth fixes are compared pairwise, so the prediction should be
//! resampled onto the fix times first (see [`crate::pdr::resample_trajectory`]).
use log::{info, warn};
use std::fmt::{self, Display};

use crate::dataset::LocationRecord;
use crate::direction_diff;
use crate::earth::geodesic_distance;
use crate::pdr::GeodeticPoint;

/// Summary metrics of one evaluation. Every metric is `None` without ground truth.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct EvaluationReport {
    /// Mean absolute heading error in degrees
    pub mean_heading_error: Option<f64>,
    /// Fraction of samples whose heading error is within the threshold
    pub heading_ratio: Option<f64>,
    /// Mean geodesic distance between predicted and true positions in meters
    pub mean_distance_error: Option<f64>,
    /// Number of compared samples
    pub samples: usize,
}
impl Display for EvaluationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |v: Option<f64>, unit: &str| match v {
            Some(v) => format!("{v:.3}{unit}"),
            None => "n/a".to_string(),
        };
        write!(
            f,
            "samples: {}, mean heading error: {}, heading ratio: {}, mean distance error: {}",
            self.samples,
            show(self.mean_heading_error, " deg"),
            show(self.heading_ratio.map(|r| r * 100.0), "%"),
            show(self.mean_distance_error, " m"),
        )
    }
}

/// Per-sample heading errors in degrees, each in [0, 180].
pub fn heading_errors(predicted: &[f64], truth: &[f64]) -> Vec<f64> {
    predicted
        .iter()
        .zip(truth)
        .map(|(&p, &t)| direction_diff(p, t))
        .collect()
}

/// Fraction of `errors` at or below `threshold`; 0 for no samples.
pub fn heading_ratio(errors: &[f64], threshold: f64) -> f64 {
    if errors.is_empty() {
        return 0.0;
    }
    errors.iter().filter(|&&e| e <= threshold).count() as f64 / errors.len() as f64
}

/// Per-sample geodesic distances in meters between predicted and true positions.
pub fn distance_errors(predicted: &[GeodeticPoint], truth: &[LocationRecord]) -> Vec<f64> {
    predicted
        .iter()
        .zip(truth)
        .map(|(p, t)| geodesic_distance(p.latitude, p.longitude, t.latitude, t.longitude))
        .collect()
}

fn mean(values: &[f64]) -> Option<f64> {
    (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
}

/// Compare a prediction with ground truth.
///
/// Missing ground truth is not an error: the report comes back empty and a warning is logged.
pub fn evaluate(
    predicted: &[GeodeticPoint],
    truth: Option<&[LocationRecord]>,
    heading_threshold: f64,
) -> EvaluationReport {
    let Some(truth) = truth else {
        warn!("No ground truth; skipping evaluation");
        return EvaluationReport::default();
    };
    if predicted.len() != truth.len() {
        warn!(
            "Comparing {} predicted points with {} ground-truth fixes",
            predicted.len(),
            truth.len()
        );
    }
    let headings: Vec<f64> = predicted.iter().map(|p| p.heading).collect();
    let directions: Vec<f64> = truth.iter().map(|t| t.direction).collect();
    let heading = heading_errors(&headings, &directions);
    let distance = distance_errors(predicted, truth);
    let report = EvaluationReport {
        mean_heading_error: mean(&heading),
        heading_ratio: (!heading.is_empty()).then(|| heading_ratio(&heading, heading_threshold)),
        mean_distance_error: mean(&distance),
        samples: heading.len(),
    };
    info!("Evaluation: {report}");
    report
}
