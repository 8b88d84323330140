//! Time alignment of independently sampled sensor channels.
//!
//! Every channel of a [`Recording`] carries its own timestamps. The [`SensorAligner`] puts all of
//! them on one grid and derives the gravity vector, producing a [`SensorSeries`] that every later
//! stage reads.
//!
//! # Time grid
//!
//! With ground truth, the grid spans the location fixes: each interval between two consecutive
//! fixes $t_k$ and $t_{k+1}$ is divided into `sample_rate` equal sub-steps,
//!
//! $$
//! t_{k \cdot r + j} = t_k + \frac{j}{r} (t_{k+1} - t_k), \qquad j = 0, \dots, r - 1
//! $$
//!
//! so grid sample $k \cdot r$ falls exactly on fix $k$. Without ground truth the grid is the
//! accelerometer's own timestamps.
//!
//! # Resampling
//!
//! Channels are resampled by nearest-past interpolation: the value at grid time $t$ is the last
//! source row with timestamp $\le t$. Grid times before the first source row take the first row;
//! grid times after the last row keep the last row.
//!
//! # Gravity
//!
//! With a linear-accelerometer channel, gravity is `accelerometer - linear_accelerometer`.
//! Otherwise a [`GravityEstimator`] is fed every aligned sample once, in order, with
//! $\Delta t = 1 / r$.
use log::{debug, info, warn};
use nalgebra::Vector3;
use std::path::{Path, PathBuf};

use crate::TrajectoryPoint;
use crate::ahrs::{ComplementaryAhrs, GravityEstimator};
use crate::calibration::MagnetometerCorrection;
use crate::config::PdrConfig;
use crate::dataset::{LocationRecord, Recording, SensorRecord};
use crate::earth::LocalFrame;
use crate::error::{PdrError, Result};

/// Aligned sensor channels on one shared time grid.
///
/// All vectors have the same length. Magnitudes are derived from the vector channels whenever a
/// series is built or sliced.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SensorSeries {
    pub time: Vec<f64>,
    pub accelerometer: Vec<Vector3<f64>>,
    pub gyroscope: Vec<Vector3<f64>>,
    pub magnetometer: Vec<Vector3<f64>>,
    pub linear_accelerometer: Option<Vec<Vector3<f64>>>,
    pub gravity: Vec<Vector3<f64>>,
    pub accel_magnitude: Vec<f64>,
    pub gyro_magnitude: Vec<f64>,
    pub mag_magnitude: Vec<f64>,
}
impl SensorSeries {
    /// Assemble a series from already aligned channels.
    pub fn new(
        time: Vec<f64>,
        accelerometer: Vec<Vector3<f64>>,
        gyroscope: Vec<Vector3<f64>>,
        magnetometer: Vec<Vector3<f64>>,
        linear_accelerometer: Option<Vec<Vector3<f64>>>,
        gravity: Vec<Vector3<f64>>,
    ) -> Result<Self> {
        let n = time.len();
        let lengths = [
            ("accelerometer", accelerometer.len()),
            ("gyroscope", gyroscope.len()),
            ("magnetometer", magnetometer.len()),
            ("gravity", gravity.len()),
            (
                "linear accelerometer",
                linear_accelerometer.as_ref().map_or(n, Vec::len),
            ),
        ];
        if let Some(&(channel, len)) = lengths.iter().find(|(_, len)| *len != n) {
            return Err(PdrError::LengthMismatch {
                channel,
                len,
                expected: n,
            });
        }
        if let Some(index) = first_decrease(&time) {
            return Err(PdrError::NonMonotonicTime {
                channel: "time grid",
                index,
            });
        }
        Ok(SensorSeries {
            accel_magnitude: magnitudes(&accelerometer),
            gyro_magnitude: magnitudes(&gyroscope),
            mag_magnitude: magnitudes(&magnetometer),
            time,
            accelerometer,
            gyroscope,
            magnetometer,
            linear_accelerometer,
            gravity,
        })
    }
    pub fn len(&self) -> usize {
        self.time.len()
    }
    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }
    /// Copy of the samples in `[start, end)`. Indices beyond the end are clamped.
    pub fn range(&self, start: usize, end: usize) -> SensorSeries {
        let end = end.min(self.len());
        let start = start.min(end);
        SensorSeries {
            time: self.time[start..end].to_vec(),
            accelerometer: self.accelerometer[start..end].to_vec(),
            gyroscope: self.gyroscope[start..end].to_vec(),
            magnetometer: self.magnetometer[start..end].to_vec(),
            linear_accelerometer: self
                .linear_accelerometer
                .as_ref()
                .map(|l| l[start..end].to_vec()),
            gravity: self.gravity[start..end].to_vec(),
            accel_magnitude: magnitudes(&self.accelerometer[start..end]),
            gyro_magnitude: magnitudes(&self.gyroscope[start..end]),
            mag_magnitude: magnitudes(&self.magnetometer[start..end]),
        }
    }
    /// Append another series recorded directly after this one.
    pub fn extend(&mut self, other: &SensorSeries) {
        self.linear_accelerometer = match (self.linear_accelerometer.take(), &other.linear_accelerometer) {
            (Some(mut mine), Some(theirs)) => {
                mine.extend_from_slice(theirs);
                Some(mine)
            }
            (None, Some(theirs)) if self.is_empty() => Some(theirs.clone()),
            _ => None,
        };
        self.time.extend_from_slice(&other.time);
        self.accelerometer.extend_from_slice(&other.accelerometer);
        self.gyroscope.extend_from_slice(&other.gyroscope);
        self.magnetometer.extend_from_slice(&other.magnetometer);
        self.gravity.extend_from_slice(&other.gravity);
        self.accel_magnitude.extend_from_slice(&other.accel_magnitude);
        self.gyro_magnitude.extend_from_slice(&other.gyro_magnitude);
        self.mag_magnitude.extend_from_slice(&other.mag_magnitude);
    }
}

fn magnitudes(vectors: &[Vector3<f64>]) -> Vec<f64> {
    vectors.iter().map(|v| v.norm()).collect()
}

fn first_decrease(times: &[f64]) -> Option<usize> {
    times.windows(2).position(|w| w[1] < w[0]).map(|i| i + 1)
}

/// Where the aligned data came from.
#[derive(Clone, Debug, PartialEq)]
pub enum Source {
    /// Read from a recording directory of CSV files.
    FileBacked(PathBuf),
    /// Handed over as in-memory record buffers.
    BufferBacked,
}

/// Owns one aligned recording and hands out slices of it.
#[derive(Clone, Debug)]
pub struct SensorAligner {
    source: Source,
    sample_rate: usize,
    series: SensorSeries,
    location: Option<Vec<LocationRecord>>,
}
impl SensorAligner {
    /// Load and align a recording directory.
    pub fn from_directory<P: AsRef<Path>>(dir: P, config: &PdrConfig) -> Result<Self> {
        let dir = dir.as_ref();
        let recording = Recording::from_directory(dir)?;
        let mut ahrs = ComplementaryAhrs::default();
        SensorAligner::new(
            recording,
            config,
            Source::FileBacked(dir.to_path_buf()),
            None,
            &mut ahrs,
        )
    }
    /// Align in-memory record buffers.
    pub fn from_buffers(recording: Recording, config: &PdrConfig) -> Result<Self> {
        let mut ahrs = ComplementaryAhrs::default();
        SensorAligner::new(recording, config, Source::BufferBacked, None, &mut ahrs)
    }
    /// Align a recording with an optional magnetometer correction and a caller-supplied gravity
    /// estimator. The estimator is only used when the recording has no linear-accelerometer
    /// channel, and is fed each aligned sample exactly once.
    pub fn new(
        recording: Recording,
        config: &PdrConfig,
        source: Source,
        correction: Option<&dyn MagnetometerCorrection>,
        estimator: &mut dyn GravityEstimator,
    ) -> Result<Self> {
        let Recording {
            accelerometer,
            gyroscope,
            mut magnetometer,
            linear_accelerometer,
            location,
        } = recording;
        check_channel("accelerometer", &accelerometer)?;
        check_channel("gyroscope", &gyroscope)?;
        check_channel("magnetometer", &magnetometer)?;
        if let Some(linear) = &linear_accelerometer {
            check_channel("linear accelerometer", linear)?;
        }
        let location = match location {
            Some(fixes) if fixes.len() >= 2 => {
                let times: Vec<f64> = fixes.iter().map(|f| f.time).collect();
                if let Some(index) = first_decrease(&times) {
                    return Err(PdrError::NonMonotonicTime {
                        channel: "location",
                        index,
                    });
                }
                Some(fixes)
            }
            Some(fixes) => {
                warn!(
                    "Ground truth has {} fix(es), at least two are needed; ignoring it",
                    fixes.len()
                );
                None
            }
            None => None,
        };

        if let Some(correction) = correction {
            for record in magnetometer.iter_mut() {
                *record = SensorRecord::from_vector(record.time, correction.correct(record.vector()));
            }
        }

        let time = match &location {
            Some(fixes) => location_grid(fixes, config.sample_rate),
            None => accelerometer.iter().map(|r| r.time).collect(),
        };
        let accel = match &location {
            Some(_) => resample(&accelerometer, &time),
            None => accelerometer.iter().map(SensorRecord::vector).collect(),
        };
        let gyro = resample(&gyroscope, &time);
        let mag = resample(&magnetometer, &time);
        let linear = linear_accelerometer.as_ref().map(|l| resample(l, &time));

        let gravity: Vec<Vector3<f64>> = match &linear {
            Some(linear) => accel.iter().zip(linear).map(|(a, l)| a - l).collect(),
            None => {
                info!("No linear accelerometer channel; estimating gravity with the attitude filter");
                let dt = config.sample_period();
                accel
                    .iter()
                    .zip(&gyro)
                    .zip(&mag)
                    .map(|((a, g), m)| estimator.update(*a, *g, *m, dt))
                    .collect()
            }
        };

        let series = SensorSeries::new(time, accel, gyro, mag, linear, gravity)?;
        info!(
            "Aligned {} samples ({:?}), ground truth: {}",
            series.len(),
            source,
            location.as_ref().map_or(0, Vec::len)
        );
        Ok(SensorAligner {
            source,
            sample_rate: config.sample_rate,
            series,
            location,
        })
    }
    pub fn source(&self) -> &Source {
        &self.source
    }
    pub fn sample_rate(&self) -> usize {
        self.sample_rate
    }
    /// The full aligned series.
    pub fn series(&self) -> &SensorSeries {
        &self.series
    }
    pub fn len(&self) -> usize {
        self.series.len()
    }
    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }
    pub fn has_ground_truth(&self) -> bool {
        self.location.is_some()
    }
    /// Ground-truth fixes, required by training and evaluation.
    pub fn ground_truth(&self) -> Result<&[LocationRecord]> {
        self.location
            .as_deref()
            .ok_or(PdrError::MissingGroundTruth("cannot determine time axis"))
    }
    /// Local frame anchored at the first ground-truth fix.
    pub fn frame(&self) -> Option<LocalFrame> {
        self.location
            .as_ref()
            .and_then(|fixes| fixes.first())
            .map(|first| LocalFrame::new(first.latitude, first.longitude))
    }
    /// Ground truth as local trajectory points (heading taken from the `Direction` column).
    pub fn ground_truth_local(&self) -> Result<Vec<TrajectoryPoint>> {
        let fixes = self.ground_truth()?;
        let frame = LocalFrame::new(fixes[0].latitude, fixes[0].longitude);
        Ok(fixes
            .iter()
            .map(|f| {
                let (x, y) = frame.to_local(f.latitude, f.longitude);
                TrajectoryPoint::new(f.time, x, y, f.direction)
            })
            .collect())
    }
    /// Slice `[start, end)` of the aligned data, failing if it exceeds what is available.
    ///
    /// Explicit training windows use this: silently training on less data than requested
    /// would hide a configuration error.
    pub fn slice(&self, start: usize, end: usize) -> Result<SensorSeries> {
        if start > end || end > self.len() {
            return Err(PdrError::SliceOutOfRange {
                start,
                end,
                available: self.len(),
            });
        }
        Ok(self.series.range(start, end))
    }
    /// Slice `[start, end)` of the aligned data, clamping to what is available.
    ///
    /// Prediction uses this: the final segment of a recording is usually shorter.
    pub fn slice_clamped(&self, start: usize, end: usize) -> SensorSeries {
        if end > self.len() {
            debug!(
                "Clamping slice [{start}, {end}) to {} available samples",
                self.len()
            );
        }
        self.series.range(start, end)
    }
}

fn check_channel(name: &'static str, records: &[SensorRecord]) -> Result<()> {
    if records.is_empty() {
        return Err(PdrError::EmptyChannel(name));
    }
    let times: Vec<f64> = records.iter().map(|r| r.time).collect();
    match first_decrease(&times) {
        Some(index) => Err(PdrError::NonMonotonicTime {
            channel: name,
            index,
        }),
        None => Ok(()),
    }
}

/// Subdivide each interval between consecutive fixes into `sample_rate` sub-steps.
fn location_grid(fixes: &[LocationRecord], sample_rate: usize) -> Vec<f64> {
    let mut grid = Vec::with_capacity((fixes.len() - 1) * sample_rate);
    for pair in fixes.windows(2) {
        let (t0, t1) = (pair[0].time, pair[1].time);
        for j in 0..sample_rate {
            grid.push(t0 + (t1 - t0) * j as f64 / sample_rate as f64);
        }
    }
    grid
}

/// Nearest-past resampling of `records` onto the sorted `grid`.
fn resample(records: &[SensorRecord], grid: &[f64]) -> Vec<Vector3<f64>> {
    let mut out = Vec::with_capacity(grid.len());
    let mut idx = 0;
    for &t in grid {
        while idx + 1 < records.len() && records[idx + 1].time <= t {
            idx += 1;
        }
        out.push(records[idx].vector());
    }
    out
}
