//! The PDR orchestrator: training, streaming prediction, and trajectory resampling.
//!
//! A [`PdrOrchestrator`] moves through
//!
//! ```text
//! Uninitialized --train/load--> Trained | Loaded --start--> Running --stop--> Stopped
//!                                                              ^  |             |
//!                                                              +--+ advance     +--start--> Running
//! ```
//!
//! While running, every [`PdrOrchestrator::advance`] call merges one segment of aligned samples.
//! The samples from just before the last detected peak are carried over to the next call, so a
//! step that straddles two segments is still measured from peak to peak.
//! [`PdrOrchestrator::stop`] processes what is left over as a final, possibly short, segment.
//!
//! The fused trajectory has one point per step. [`resample_trajectory`] maps it onto any output
//! time grid by interpolating positions linearly and headings along the shorter arc.
use log::{debug, info, warn};
use std::fmt::{self, Display};
use std::ops::Range;

use crate::TrajectoryPoint;
use crate::align::{SensorAligner, SensorSeries};
use crate::config::{LINEAR_MODEL, MEAN_MODEL, PdrConfig};
use crate::earth::LocalFrame;
use crate::error::{PdrError, Result};
use crate::fusion::Fuser;
use crate::heading::StartInfo;
use crate::interpolate_heading;
use crate::step::{self, StepModel};

/// Lifecycle state of a [`PdrOrchestrator`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Uninitialized,
    Trained,
    Loaded,
    Running,
    Stopped,
}
impl State {
    pub fn name(&self) -> &'static str {
        match self {
            State::Uninitialized => "uninitialized",
            State::Trained => "trained",
            State::Loaded => "loaded",
            State::Running => "running",
            State::Stopped => "stopped",
        }
    }
}
impl Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of one [`PdrOrchestrator::advance`] call.
#[derive(Clone, Debug, PartialEq)]
pub enum Advance {
    /// Steps were detected; one point per step.
    Progressing(Vec<TrajectoryPoint>),
    /// No step was detected in the segment.
    Stopped,
}
impl Advance {
    pub fn points(&self) -> &[TrajectoryPoint] {
        match self {
            Advance::Progressing(points) => points,
            Advance::Stopped => &[],
        }
    }
}

/// A trajectory point mapped to WGS84.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GeodeticPoint {
    pub time: f64,
    /// Latitude in degrees
    pub latitude: f64,
    /// Longitude in degrees
    pub longitude: f64,
    /// Heading in degrees
    pub heading: f64,
}

/// Owns the step model and heading reference of one walk.
#[derive(Clone, Debug)]
pub struct PdrOrchestrator {
    config: PdrConfig,
    state: State,
    fuser: Option<Fuser>,
    start: Option<StartInfo>,
    pending: SensorSeries,
}
impl PdrOrchestrator {
    /// An orchestrator without a step model.
    pub fn new(config: PdrConfig) -> Result<Self> {
        config.validate()?;
        Ok(PdrOrchestrator {
            config,
            state: State::Uninitialized,
            fuser: None,
            start: None,
            pending: SensorSeries::default(),
        })
    }
    /// Train on a whole recording with ground truth.
    ///
    /// Returns the orchestrator and the training trajectory resampled onto the ground-truth ticks.
    pub fn train(config: PdrConfig, aligner: &SensorAligner) -> Result<(Self, Vec<TrajectoryPoint>)> {
        let ticks = aligner.ground_truth()?.len() - 1;
        let mut orchestrator = PdrOrchestrator::new(config)?;
        let trajectory = orchestrator.fit(aligner, 0..ticks)?;
        Ok((orchestrator, trajectory))
    }
    /// Build from the persisted step model at `config.model_path`.
    pub fn load(config: PdrConfig) -> Result<Self> {
        let mut orchestrator = PdrOrchestrator::new(config)?;
        orchestrator.load_model()?;
        Ok(orchestrator)
    }
    /// Build from an in-memory step model.
    pub fn with_model(config: PdrConfig, model: StepModel) -> Result<Self> {
        let mut orchestrator = PdrOrchestrator::new(config)?;
        orchestrator.fuser = Some(Fuser::new(&orchestrator.config, model));
        orchestrator.state = State::Loaded;
        Ok(orchestrator)
    }
    pub fn config(&self) -> &PdrConfig {
        &self.config
    }
    pub fn state(&self) -> State {
        self.state
    }
    pub fn model(&self) -> Option<&StepModel> {
        self.fuser.as_ref().map(Fuser::model)
    }
    /// Current heading reference and position cursor, once started.
    pub fn start_info(&self) -> Option<&StartInfo> {
        self.start.as_ref()
    }
    fn expected_kind(&self) -> &'static str {
        if self.config.uses_mean_model() {
            MEAN_MODEL
        } else {
            LINEAR_MODEL
        }
    }
    fn invalid(&self, action: &'static str) -> PdrError {
        PdrError::InvalidState {
            action,
            state: self.state.name(),
        }
    }
    /// Train the step model on ground-truth ticks `ticks` of `aligner`.
    ///
    /// The window is an explicit request, so it must lie inside the recording; a window past the
    /// end is an error rather than silently shortened. The new model replaces the current one, and
    /// is saved to `model_path` when one is configured, only once the training trajectory has been
    /// reconstructed. On failure the orchestrator keeps its previous model and state.
    pub fn fit(&mut self, aligner: &SensorAligner, ticks: Range<usize>) -> Result<Vec<TrajectoryPoint>> {
        if self.state == State::Running {
            return Err(self.invalid("train"));
        }
        let truth = aligner.ground_truth_local()?;
        let sr = self.config.sample_rate;
        if ticks.is_empty() || ticks.end >= truth.len() {
            return Err(PdrError::SliceOutOfRange {
                start: ticks.start * sr,
                end: ticks.end * sr,
                available: aligner.len(),
            });
        }
        let series = aligner.slice(ticks.start * sr, ticks.end * sr)?;
        let model = step::train(&self.config, &series, &truth[ticks.start..=ticks.end])?;

        let reference = aligner.ground_truth()?.first().map(|f| f.direction);
        let previous_fuser = self.fuser.replace(Fuser::new(&self.config, model));
        let previous_state = std::mem::replace(&mut self.state, State::Trained);
        let outcome = self
            .predict_all(aligner, (0.0, 0.0), reference)
            .and_then(|trajectory| match &self.config.model_path {
                Some(path) => model.save(path).map(|_| trajectory),
                None => Ok(trajectory),
            });
        match outcome {
            Ok(trajectory) => {
                self.state = State::Trained;
                info!("Orchestrator trained on ticks {ticks:?}");
                Ok(trajectory)
            }
            Err(err) => {
                warn!("Training on ticks {ticks:?} failed, keeping the previous model: {err}");
                self.fuser = previous_fuser;
                self.state = previous_state;
                self.start = None;
                self.pending = SensorSeries::default();
                Err(err)
            }
        }
    }
    /// Load the step model from `config.model_path`.
    pub fn load_model(&mut self) -> Result<()> {
        if self.state == State::Running {
            return Err(self.invalid("load"));
        }
        let path = self
            .config
            .model_path
            .clone()
            .ok_or_else(|| PdrError::InvalidConfig("model_path is not set".into()))?;
        let model = StepModel::load(path, self.expected_kind())?;
        self.fuser = Some(Fuser::new(&self.config, model));
        self.state = State::Loaded;
        Ok(())
    }
    /// Bootstrap the heading reference and begin a walk at `initial_position` (local meters).
    pub fn start(
        &mut self,
        initial_position: (f64, f64),
        bootstrap: &SensorSeries,
        reference_direction: Option<f64>,
    ) -> Result<()> {
        let fuser = match (&self.fuser, self.state) {
            (Some(fuser), State::Trained | State::Loaded | State::Stopped) => fuser,
            _ => return Err(self.invalid("start")),
        };
        let start = fuser
            .heading()
            .start(bootstrap, initial_position, reference_direction)?;
        self.start = Some(start);
        self.pending = SensorSeries::default();
        self.state = State::Running;
        info!("Orchestrator running from {initial_position:?}");
        Ok(())
    }
    /// Merge the next segment of a running walk.
    pub fn advance(&mut self, segment: &SensorSeries) -> Result<Advance> {
        if self.state != State::Running {
            return Err(self.invalid("advance"));
        }
        let mut buffer = std::mem::take(&mut self.pending);
        buffer.extend(segment);
        let points = self.merge_buffer(&buffer, false)?;
        Ok(if points.is_empty() {
            Advance::Stopped
        } else {
            Advance::Progressing(points)
        })
    }
    /// Process the carried-over samples as a final segment and stop the walk.
    pub fn stop(&mut self) -> Result<Vec<TrajectoryPoint>> {
        if self.state != State::Running {
            return Err(self.invalid("stop"));
        }
        let buffer = std::mem::take(&mut self.pending);
        let points = if buffer.is_empty() {
            Vec::new()
        } else {
            self.merge_buffer(&buffer, true)?
        };
        self.state = State::Stopped;
        info!("Orchestrator stopped");
        Ok(points)
    }
    fn merge_buffer(&mut self, buffer: &SensorSeries, last: bool) -> Result<Vec<TrajectoryPoint>> {
        let (Some(fuser), Some(start)) = (&self.fuser, self.start.as_mut()) else {
            return Err(PdrError::InvalidState {
                action: "merge",
                state: self.state.name(),
            });
        };
        let outcome = fuser.merge(start, buffer)?;
        if !last {
            let keep_from = match outcome.detection.peaks.last() {
                Some(peak) => peak.index.saturating_sub(self.config.move_average),
                None => buffer
                    .len()
                    .saturating_sub(self.config.move_average + self.config.min_distance),
            };
            self.pending = buffer.range(keep_from, buffer.len());
            debug!("Carrying {} samples into the next segment", self.pending.len());
        }
        if outcome.points.is_empty() {
            warn!("No step detected in {} samples", buffer.len());
        }
        Ok(outcome.points)
    }
    /// Run a whole recording: start, fixed-size segments, stop, resample.
    ///
    /// The output grid is the ground-truth ticks when the recording has them, otherwise one point
    /// per second. The sparse trajectory begins with the start position so the walk is anchored
    /// before the first step.
    pub fn predict_all(
        &mut self,
        aligner: &SensorAligner,
        initial_position: (f64, f64),
        reference_direction: Option<f64>,
    ) -> Result<Vec<TrajectoryPoint>> {
        let series = aligner.series();
        let bootstrap = aligner.slice_clamped(0, self.config.least_start_point + 1);
        self.start(initial_position, &bootstrap, reference_direction)?;
        let direction0 = self.start.as_ref().map_or(0.0, |s| s.direction0);
        let t0 = series.time.first().copied().unwrap_or(0.0);
        let mut sparse = vec![TrajectoryPoint::new(
            t0,
            initial_position.0,
            initial_position.1,
            direction0,
        )];

        let segment_len = self.config.distance_frac_step * self.config.sample_rate;
        let mut offset = 0;
        while offset < aligner.len() {
            // the last segment of a recording is usually shorter than the rest
            let segment = aligner.slice_clamped(offset, offset + segment_len);
            match self.advance(&segment)? {
                Advance::Progressing(points) => sparse.extend(points),
                Advance::Stopped => debug!("Stationary segment at sample {offset}"),
            }
            offset += segment_len;
        }
        sparse.extend(self.stop()?);
        info!("Fused {} steps", sparse.len() - 1);

        let grid: Vec<f64> = match aligner.ground_truth() {
            Ok(fixes) => fixes.iter().map(|f| f.time).collect(),
            Err(_) => {
                let t_end = series.time.last().copied().unwrap_or(t0);
                (0..=(t_end - t0).floor() as usize)
                    .map(|s| t0 + s as f64)
                    .collect()
            }
        };
        Ok(resample_trajectory(&sparse, &grid))
    }
}

/// Resample a trajectory onto `times`.
///
/// Positions are interpolated linearly, headings along the shorter arc. Times before the first
/// point or after the last take that point's position and heading.
pub fn resample_trajectory(points: &[TrajectoryPoint], times: &[f64]) -> Vec<TrajectoryPoint> {
    let (Some(first), Some(last)) = (points.first(), points.last()) else {
        return Vec::new();
    };
    times
        .iter()
        .map(|&t| {
            if t <= first.time {
                return TrajectoryPoint { time: t, ..*first };
            }
            if t >= last.time {
                return TrajectoryPoint { time: t, ..*last };
            }
            let k = points.partition_point(|p| p.time <= t);
            let (a, b) = (&points[k - 1], &points[k]);
            let span = b.time - a.time;
            let fraction = if span > 0.0 { (t - a.time) / span } else { 1.0 };
            TrajectoryPoint::new(
                t,
                a.x + fraction * (b.x - a.x),
                a.y + fraction * (b.y - a.y),
                interpolate_heading(a.heading, b.heading, fraction),
            )
        })
        .collect()
}

/// Map local trajectory points to latitude and longitude.
pub fn to_geodetic(points: &[TrajectoryPoint], frame: &LocalFrame) -> Vec<GeodeticPoint> {
    points
        .iter()
        .map(|p| {
            let (latitude, longitude) = frame.to_geodetic(p.x, p.y);
            GeodeticPoint {
                time: p.time,
                latitude,
                longitude,
                heading: p.heading,
            }
        })
        .collect()
}
