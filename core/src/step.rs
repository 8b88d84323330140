//! Footfall detection and step-length models.
//!
//! A footfall shows up as a maximum of the acceleration magnitude. The magnitude is smoothed with
//! a centered [`moving_average`] and every strict local maximum is a candidate. Candidates closer
//! than `min_distance` samples to the previously accepted peak compete with it: the new candidate
//! replaces the old peak only if it is strictly larger, otherwise it is dropped. This leaves one
//! peak per footfall even when the smoothed signal wobbles around its maximum.
//!
//! Peaks at or below `valid_peak_value` are discarded. The threshold is learned once during
//! training as 80% of the mean candidate peak and persisted with the step model.
//!
//! # Step length
//!
//! For two accepted peaks $p_i$ and $p_j$ ($i < j$) the features are
//!
//! $$
//! f = \frac{j - i}{t_{p_j} - t_{p_i}}, \qquad \sigma = \operatorname{var}(\bar a_{p_i}, \dots, \bar a_{p_j - 1})
//! $$
//!
//! and the step length is either a constant mean or $L = w_0 + w_1 f + w_2 \sigma$ fitted by least
//! squares on ground-truth segments.
use log::{debug, info, warn};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::TrajectoryPoint;
use crate::align::SensorSeries;
use crate::config::{LINEAR_MODEL, MEAN_MODEL, PdrConfig};
use crate::error::{PdrError, Result};
use crate::filter::{mean, moving_average, variance};

/// Fraction of the mean candidate peak used as the acceptance threshold.
pub const PEAK_THRESHOLD_RATIO: f64 = 0.8;

/// An accepted footfall: index into the aligned grid and the smoothed magnitude there.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StepEvent {
    pub index: usize,
    pub value: f64,
}

/// Output of [`detect_peaks`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PeakDetection {
    /// Smoothed acceleration magnitude.
    pub filtered: Vec<f64>,
    /// Accepted peaks in increasing index order.
    pub peaks: Vec<StepEvent>,
    /// Threshold the accepted peaks exceed.
    pub valid_peak_value: f64,
}
impl PeakDetection {
    pub fn indices(&self) -> Vec<usize> {
        self.peaks.iter().map(|p| p.index).collect()
    }
}

/// Smooth `magnitude`, find footfall peaks, and keep those above the threshold.
///
/// Without a `threshold` one is derived from the candidates (training); with one it is reused
/// as-is (prediction).
pub fn detect_peaks(
    magnitude: &[f64],
    window: usize,
    min_distance: usize,
    threshold: Option<f64>,
) -> PeakDetection {
    let filtered = moving_average(magnitude, window);
    let candidates = candidate_peaks(&filtered, min_distance);
    let valid_peak_value = threshold.unwrap_or_else(|| {
        let values: Vec<f64> = candidates.iter().map(|p| p.value).collect();
        PEAK_THRESHOLD_RATIO * mean(&values)
    });
    let peaks: Vec<StepEvent> = candidates
        .into_iter()
        .filter(|p| p.value > valid_peak_value)
        .collect();
    PeakDetection {
        filtered,
        peaks,
        valid_peak_value,
    }
}

/// Strict local maxima with the replace-or-reject minimum-distance rule.
fn candidate_peaks(signal: &[f64], min_distance: usize) -> Vec<StepEvent> {
    let mut peaks: Vec<StepEvent> = Vec::new();
    for i in 1..signal.len().saturating_sub(1) {
        let value = signal[i];
        if !(value > signal[i - 1] && value > signal[i + 1]) {
            continue;
        }
        match peaks.last_mut() {
            Some(last) if i - last.index < min_distance => {
                // ties keep the earlier peak
                if value > last.value {
                    *last = StepEvent { index: i, value };
                }
            }
            _ => peaks.push(StepEvent { index: i, value }),
        }
    }
    peaks
}

/// Features of the walk between two accepted peaks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StepFeatures {
    /// Steps per second
    pub frequency: f64,
    /// Variance of the smoothed magnitude between the peaks
    pub variance: f64,
}

/// Features over accepted peaks `i < j`.
///
/// `time` and `filtered` are indexed by the peaks' grid indices.
pub fn step_features(time: &[f64], filtered: &[f64], peaks: &[StepEvent], i: usize, j: usize) -> StepFeatures {
    let (a, b) = (peaks[i].index, peaks[j].index);
    let dt = time[b] - time[a];
    StepFeatures {
        frequency: if dt > 0.0 { (j - i) as f64 / dt } else { 0.0 },
        variance: variance(&filtered[a..b]),
    }
}

/// How a step length is predicted.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum StepLength {
    /// Every step has the same length in meters.
    Mean(f64),
    /// `w0 + w1 * frequency + w2 * variance`
    Linear([f64; 3]),
}
impl StepLength {
    pub fn kind(&self) -> &'static str {
        match self {
            StepLength::Mean(_) => MEAN_MODEL,
            StepLength::Linear(_) => LINEAR_MODEL,
        }
    }
}

/// A trained step-length model together with its peak threshold.
///
/// Both parts are persisted and loaded as one unit.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepModel {
    pub length: StepLength,
    pub valid_peak_value: f64,
}
impl StepModel {
    pub fn mean(step_length: f64, valid_peak_value: f64) -> Self {
        StepModel {
            length: StepLength::Mean(step_length),
            valid_peak_value,
        }
    }
    pub fn linear(weights: [f64; 3], valid_peak_value: f64) -> Self {
        StepModel {
            length: StepLength::Linear(weights),
            valid_peak_value,
        }
    }
    pub fn kind(&self) -> &'static str {
        self.length.kind()
    }
    /// Predicted step length in meters, never negative.
    pub fn predict(&self, features: &StepFeatures) -> f64 {
        let length = match self.length {
            StepLength::Mean(length) => length,
            StepLength::Linear([w0, w1, w2]) => w0 + w1 * features.frequency + w2 * features.variance,
        };
        length.max(0.0)
    }
    /// Detect footfalls in `series` with this model's threshold.
    pub fn detect(&self, series: &SensorSeries, config: &PdrConfig) -> PeakDetection {
        detect_peaks(
            &series.accel_magnitude,
            config.move_average,
            config.min_distance,
            Some(self.valid_peak_value),
        )
    }
    /// Write the model to a binary file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let bytes = bincode::serialize(self)?;
        fs::write(path, bytes)?;
        info!("Saved {} step model to {}", self.kind(), path.display());
        Ok(())
    }
    /// Read a model written by [`StepModel::save`], checking it is of the `expected` kind.
    pub fn load<P: AsRef<Path>>(path: P, expected: &'static str) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path)?;
        let model: StepModel = bincode::deserialize(&bytes)?;
        if model.kind() != expected {
            return Err(PdrError::ModelMismatch {
                expected,
                found: model.kind(),
            });
        }
        info!(
            "Loaded {} step model from {} (valid peak value {:.4})",
            model.kind(),
            path.display(),
            model.valid_peak_value
        );
        Ok(model)
    }
}

/// Train the configured step model.
///
/// `series` must be the full aligned recording, so that grid sample `k * sample_rate` is
/// ground-truth tick `k` of `truth`. `clean_start`/`clean_end` samples are excluded at the edges.
pub fn train(config: &PdrConfig, series: &SensorSeries, truth: &[TrajectoryPoint]) -> Result<StepModel> {
    let start = config.clean_start;
    let end = series.len().saturating_sub(config.clean_end);
    if start >= end {
        return Err(PdrError::InsufficientTrainingData(format!(
            "trimming {} + {} samples leaves nothing of {}",
            config.clean_start,
            config.clean_end,
            series.len()
        )));
    }
    let detection = detect_peaks(
        &series.accel_magnitude[start..end],
        config.move_average,
        config.min_distance,
        None,
    );
    debug!(
        "Training window [{start}, {end}): {} peaks above {:.4}",
        detection.peaks.len(),
        detection.valid_peak_value
    );
    let model = if config.uses_mean_model() {
        train_mean(config, start, end, &detection, truth)?
    } else {
        train_regression(config, &series.time[start..end], start, &detection, truth)?
    };
    info!("Trained step model: {:?}", model.length);
    Ok(model)
}

/// Walked ground-truth distance over consecutive points.
pub fn path_length(points: &[TrajectoryPoint]) -> f64 {
    points.windows(2).map(|w| w[0].distance_to(&w[1])).sum()
}

fn train_mean(
    config: &PdrConfig,
    start: usize,
    end: usize,
    detection: &PeakDetection,
    truth: &[TrajectoryPoint],
) -> Result<StepModel> {
    let steps = detection.peaks.len();
    if steps == 0 {
        return Err(PdrError::InsufficientTrainingData(
            "no steps detected in the training window".into(),
        ));
    }
    let sr = config.sample_rate;
    let first = start.div_ceil(sr).min(truth.len());
    let last = (end / sr).min(truth.len().saturating_sub(1));
    let distance = if first < last {
        path_length(&truth[first..=last])
    } else {
        0.0
    };
    debug!("Mean model: {distance:.2} m over {steps} steps");
    Ok(StepModel::mean(distance / steps as f64, detection.valid_peak_value))
}

fn train_regression(
    config: &PdrConfig,
    time: &[f64],
    offset: usize,
    detection: &PeakDetection,
    truth: &[TrajectoryPoint],
) -> Result<StepModel> {
    let ticks = config.distance_frac_step;
    let seg_len = ticks * config.sample_rate;
    let end = offset + time.len();
    let mut features = Vec::new();
    let mut labels = Vec::new();
    for s in 0.. {
        let (s0, s1) = (s * seg_len, (s + 1) * seg_len);
        if s1 > end || (s + 1) * ticks >= truth.len() {
            break;
        }
        if s0 < offset {
            continue;
        }
        let inside: Vec<usize> = detection
            .peaks
            .iter()
            .enumerate()
            .filter(|(_, p)| (s0..s1).contains(&(p.index + offset)))
            .map(|(k, _)| k)
            .collect();
        if inside.len() < 2 {
            debug!("Skipping training segment {s}: {} step(s)", inside.len());
            continue;
        }
        let distance = path_length(&truth[s * ticks..=(s + 1) * ticks]);
        let (i, j) = (inside[0], inside[inside.len() - 1]);
        features.push(step_features(time, &detection.filtered, &detection.peaks, i, j));
        labels.push(distance / inside.len() as f64);
    }
    let weights = fit_linear(&features, &labels)?;
    Ok(StepModel::linear(weights, detection.valid_peak_value))
}

/// Least-squares fit of `label = w0 + w1 * frequency + w2 * variance`.
pub fn fit_linear(features: &[StepFeatures], labels: &[f64]) -> Result<[f64; 3]> {
    if features.is_empty() || features.len() != labels.len() {
        return Err(PdrError::InsufficientTrainingData(format!(
            "{} labeled segments",
            features.len()
        )));
    }
    if features.len() < 3 {
        warn!(
            "Only {} labeled segments for a three-parameter regression",
            features.len()
        );
    }
    let x = DMatrix::from_fn(features.len(), 3, |r, c| match c {
        0 => 1.0,
        1 => features[r].frequency,
        _ => features[r].variance,
    });
    let y = DVector::from_column_slice(labels);
    let w = x
        .svd(true, true)
        .solve(&y, 1e-12)
        .map_err(|e| PdrError::InsufficientTrainingData(e.to_string()))?;
    Ok([w[0], w[1], w[2]])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::earth::STANDARD_GRAVITY;
    use assert_approx_eq::assert_approx_eq;
    use nalgebra::Vector3;
    use std::f64::consts::PI;

    #[test]
    fn close_peaks_keep_the_larger() {
        // two bumps 4 samples apart, the second one larger
        let mut signal = vec![0.0; 40];
        signal[10] = 5.0;
        signal[14] = 7.0;
        signal[30] = 6.0;
        let detection = detect_peaks(&signal, 1, 10, Some(0.0));
        assert_eq!(detection.indices(), vec![14, 30]);
        assert_eq!(detection.peaks[0].value, 7.0);
    }
    #[test]
    fn close_peaks_reject_the_smaller_newcomer() {
        let mut signal = vec![0.0; 40];
        signal[10] = 7.0;
        signal[14] = 5.0;
        let detection = detect_peaks(&signal, 1, 10, Some(0.0));
        assert_eq!(detection.indices(), vec![10]);
    }
    #[test]
    fn equal_peaks_keep_the_first() {
        let mut signal = vec![0.0; 30];
        signal[10] = 6.0;
        signal[12] = 6.0;
        let detection = detect_peaks(&signal, 1, 10, Some(0.0));
        assert_eq!(detection.indices(), vec![10]);
    }
    #[test]
    fn plateaus_are_not_peaks() {
        let signal = vec![9.8; 100];
        let detection = detect_peaks(&signal, 9, 15, None);
        assert!(detection.peaks.is_empty());
        assert_eq!(detection.valid_peak_value, 0.0);
    }
    #[test]
    fn threshold_drops_small_peaks() {
        let mut signal = vec![0.0; 100];
        for (i, v) in [(10, 10.0), (30, 10.0), (50, 10.0), (70, 2.0)] {
            signal[i] = v;
        }
        let detection = detect_peaks(&signal, 1, 5, None);
        assert_approx_eq!(detection.valid_peak_value, 0.8 * 8.0);
        assert_eq!(detection.indices(), vec![10, 30, 50]);
        // reusing the threshold on a new signal
        let again = detect_peaks(&signal, 1, 5, Some(1.0));
        assert_eq!(again.peaks.len(), 4);
    }
    #[test]
    fn features_between_peaks() {
        let time: Vec<f64> = (0..50).map(|i| i as f64 * 0.02).collect();
        let filtered: Vec<f64> = (0..50).map(|i| (i % 2) as f64).collect();
        let peaks = [
            StepEvent { index: 10, value: 1.0 },
            StepEvent { index: 35, value: 1.0 },
            StepEvent { index: 45, value: 1.0 },
        ];
        let f = step_features(&time, &filtered, &peaks, 0, 1);
        assert_approx_eq!(f.frequency, 2.0);
        assert_approx_eq!(f.variance, 0.48 * 0.52, 1e-12);
        let f = step_features(&time, &filtered, &peaks, 0, 2);
        assert_approx_eq!(f.frequency, 2.0 / 0.7);
    }
    #[test]
    fn regression_recovers_exact_weights() {
        let features: Vec<StepFeatures> = (0..12)
            .map(|k| StepFeatures {
                frequency: 1.5 + 0.1 * k as f64,
                variance: 0.5 + ((k * 7) % 5) as f64 * 0.2,
            })
            .collect();
        let labels: Vec<f64> = features
            .iter()
            .map(|f| 0.2 + 0.3 * f.frequency + 0.1 * f.variance)
            .collect();
        let w = fit_linear(&features, &labels).unwrap();
        assert_approx_eq!(w[0], 0.2, 1e-9);
        assert_approx_eq!(w[1], 0.3, 1e-9);
        assert_approx_eq!(w[2], 0.1, 1e-9);
        assert!(fit_linear(&[], &[]).is_err());
    }
    #[test]
    fn predict_by_kind() {
        let f = StepFeatures {
            frequency: 2.0,
            variance: 1.0,
        };
        assert_eq!(StepModel::mean(0.7, 1.0).predict(&f), 0.7);
        assert_approx_eq!(StepModel::linear([0.1, 0.2, 0.3], 1.0).predict(&f), 0.8);
        assert_eq!(StepModel::linear([-5.0, 0.0, 0.0], 1.0).predict(&f), 0.0);
    }
    #[test]
    fn model_file_round_trip_and_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.bin");
        let model = StepModel::linear([0.31, 0.12, -0.05], 10.4);
        model.save(&path).unwrap();
        assert_eq!(StepModel::load(&path, LINEAR_MODEL).unwrap(), model);
        assert!(matches!(
            StepModel::load(&path, MEAN_MODEL),
            Err(PdrError::ModelMismatch {
                expected: "Mean",
                found: "Linear"
            })
        ));
        fs::write(&path, [1u8, 2, 3]).unwrap();
        assert!(StepModel::load(&path, LINEAR_MODEL).is_err());
        assert!(matches!(
            StepModel::load(dir.path().join("missing.bin"), MEAN_MODEL),
            Err(PdrError::Io(_))
        ));
    }
    /// Footfall every 25 samples at 50 Hz for the whole series.
    fn walk(n: usize) -> SensorSeries {
        let up = Vector3::new(0.0, 0.0, STANDARD_GRAVITY);
        SensorSeries::new(
            (0..n).map(|i| i as f64 * 0.02).collect(),
            (0..n)
                .map(|i| up * (1.0 + 0.2 * (2.0 * PI * i as f64 / 25.0).sin()))
                .collect(),
            vec![Vector3::zeros(); n],
            vec![Vector3::new(20.0, 0.0, -40.0); n],
            None,
            vec![up; n],
        )
        .unwrap()
    }
    #[test]
    fn mean_training_skips_cleaned_edges() {
        // one bad fix at the start: 10 m off, then 1.6 m per second (two 0.8 m steps)
        let truth: Vec<TrajectoryPoint> = (0..=10)
            .map(|k| {
                let x = if k == 0 { -10.0 } else { 1.6 * k as f64 };
                TrajectoryPoint::new(k as f64, x, 0.0, 0.0)
            })
            .collect();
        let series = walk(500);
        let config = PdrConfig {
            step_model: MEAN_MODEL.to_string(),
            ..Default::default()
        };
        let everything = train(&config, &series, &truth).unwrap();
        assert_approx_eq!(everything.predict(&StepFeatures::default()), 26.0 / 20.0, 1e-9);

        let cleaned = PdrConfig {
            clean_start: 100,
            clean_end: 100,
            ..config
        };
        // samples [100, 400) hold 12 footfalls over ticks 2..=8
        let model = train(&cleaned, &series, &truth).unwrap();
        assert_approx_eq!(model.predict(&StepFeatures::default()), 0.8, 1e-9);
    }
    #[test]
    fn cleaning_everything_is_an_error() {
        let truth: Vec<TrajectoryPoint> = (0..=10)
            .map(|k| TrajectoryPoint::new(k as f64, k as f64, 0.0, 0.0))
            .collect();
        let series = walk(500);
        for (clean_start, clean_end) in [(250, 250), (300, 250), (0, 500)] {
            let config = PdrConfig {
                clean_start,
                clean_end,
                ..Default::default()
            };
            assert!(matches!(
                train(&config, &series, &truth),
                Err(PdrError::InsufficientTrainingData(_))
            ));
        }
    }
    #[test]
    fn walked_distance() {
        let points = [
            TrajectoryPoint::new(0.0, 0.0, 0.0, 0.0),
            TrajectoryPoint::new(1.0, 3.0, 4.0, 0.0),
            TrajectoryPoint::new(2.0, 3.0, 5.0, 0.0),
        ];
        assert_eq!(path_length(&points), 6.0);
        assert_eq!(path_length(&points[..1]), 0.0);
    }
}
