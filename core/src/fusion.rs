//! Merging detected steps and headings into displacement.
//!
//! Every pair of consecutive accepted peaks is one step. Its length comes from the step model and
//! its direction is the mean heading between the two peaks; the last step of a segment averages
//! the heading up to the end of the segment instead. The walker then moves by
//! $(\Delta x, \Delta y) = L (\cos \psi, \sin \psi)$ from the position left by the previous step.
//!
//! The mean heading is taken along the shorter arcs, so it matches the plain arithmetic mean of the
//! samples except when they straddle north.
use log::debug;

use crate::TrajectoryPoint;
use crate::align::SensorSeries;
use crate::config::PdrConfig;
use crate::error::Result;
use crate::heading::{HeadingEstimator, StartInfo};
use crate::step::{PeakDetection, StepModel, step_features};
use crate::{shortest_arc, wrap_to_360};

/// Mean of headings in degrees, taken along the shorter arcs from the first one.
///
/// Away from north this is the plain arithmetic mean; across the 0/360 wrap it does not jump to
/// the opposite direction.
pub fn mean_heading(headings: &[f64]) -> f64 {
    match headings.first() {
        None => 0.0,
        Some(&first) => {
            let offset: f64 = headings.iter().map(|&h| shortest_arc(first, h)).sum();
            wrap_to_360(first + offset / headings.len() as f64)
        }
    }
}

/// Output of one [`Fuser::merge`] call.
#[derive(Clone, Debug, Default)]
pub struct MergeOutcome {
    /// One point per detected step.
    pub points: Vec<TrajectoryPoint>,
    /// Peak detection over the merged segment.
    pub detection: PeakDetection,
}

/// Turns aligned segments into trajectory points with a trained step model.
#[derive(Clone, Debug)]
pub struct Fuser {
    config: PdrConfig,
    model: StepModel,
    heading: HeadingEstimator,
}
impl Fuser {
    pub fn new(config: &PdrConfig, model: StepModel) -> Self {
        Fuser {
            config: config.clone(),
            model,
            heading: HeadingEstimator::new(config),
        }
    }
    pub fn model(&self) -> &StepModel {
        &self.model
    }
    pub fn heading(&self) -> &HeadingEstimator {
        &self.heading
    }
    /// Process one segment and advance `start.last_x`/`start.last_y`.
    ///
    /// A segment with fewer than two accepted peaks yields no points and leaves `start` unchanged.
    pub fn merge(&self, start: &mut StartInfo, segment: &SensorSeries) -> Result<MergeOutcome> {
        let detection = self.model.detect(segment, &self.config);
        if detection.peaks.len() < 2 {
            debug!(
                "{} peak(s) in a segment of {} samples; no step",
                detection.peaks.len(),
                segment.len()
            );
            return Ok(MergeOutcome {
                points: Vec::new(),
                detection,
            });
        }
        let headings = self.heading.predict(start, segment)?;
        let peaks = &detection.peaks;
        let mut points = Vec::with_capacity(peaks.len() - 1);
        for i in 1..peaks.len() {
            let from = peaks[i - 1].index;
            let to = if i == peaks.len() - 1 {
                segment.len()
            } else {
                peaks[i].index
            };
            let features = step_features(&segment.time, &detection.filtered, peaks, i - 1, i);
            let length = self.model.predict(&features);
            let heading = mean_heading(&headings[from..to]);
            let rad = heading.to_radians();
            start.last_x += length * rad.cos();
            start.last_y += length * rad.sin();
            points.push(TrajectoryPoint::new(
                segment.time[peaks[i].index],
                start.last_x,
                start.last_y,
                heading,
            ));
        }
        debug!(
            "Merged {} steps, now at ({:.2}, {:.2})",
            points.len(),
            start.last_x,
            start.last_y
        );
        Ok(MergeOutcome { points, detection })
    }
}
