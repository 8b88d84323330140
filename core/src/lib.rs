//! Pedestrian dead reckoning (PDR) toolbox
//!
//! This crate estimates a pedestrian's 2-D trajectory (position and heading over time) from the inertial and magnetic
//! sensor streams of a phone or wearable. Instead of integrating acceleration twice, as a strapdown mechanization would,
//! pedestrian dead reckoning counts footfalls, predicts the length of each step, and walks that length along a magnetic
//! heading. This keeps the drift bounded by the step-length and heading error rather than growing quadratically in time,
//! which is what makes low-grade MEMS sensors usable for navigation when GNSS is unavailable or noisy.
//!
//! The crate does not provide drivers for the sensors, nor does it compute the hard/soft-iron calibration of the
//! magnetometer. Sensor samples are assumed to arrive as plain time-stamped `{time, x, y, z}` records per channel, with
//! the magnetometer already corrected (or corrected through the [calibration] hook).
//!
//! Primarily built off of two crate dependencies:
//! - [`nalgebra`](https://crates.io/crates/nalgebra): vectors for the sensor channels and the least-squares solver behind
//!   the step-length regression.
//! - [`nav-types`](https://crates.io/crates/nav-types): WGS84/ECEF coordinate conversions used by the geodesy helpers.
//!
//! # Modules
//! - [align]: time alignment of the independently-sampled channels onto a common grid, and gravity derivation.
//! - [ahrs]: attitude filter used as the gravity estimator when no linear-accelerometer channel exists.
//! - [calibration]: magnetometer correction hook applied before alignment.
//! - [config]: the immutable run parameters.
//! - [dataset]: CSV loading of recordings and CSV export of trajectories.
//! - [earth]: WGS84 constants, the local planar frame, and geodesic distance.
//! - [filter]: moving average, Butterworth design, and zero-phase filtering.
//! - [step]: footfall detection, step features, and the step-length models.
//! - [heading]: magnetic heading estimation from the east vector.
//! - [fusion]: merging steps and heading into incremental displacement.
//! - [pdr]: the orchestrator with its training, streaming, and resampling APIs.
//! - [evaluate]: heading and distance error against ground truth.
//! - [logging]: timestamped `env_logger` setup for front-ends.
//!
//! # Pipeline
//!
//! The acceleration magnitude $|a|$ is smoothed with a centered moving average and every strict local maximum that
//! survives the minimum-distance rule and the trained threshold is a footfall. For two consecutive footfalls $p_{i-1}$
//! and $p_i$ the step features are the instantaneous step frequency and the variance of the smoothed magnitude between
//! them:
//!
//! $$
//! f = \frac{1}{t_{p_i} - t_{p_{i-1}}}, \qquad \sigma = \operatorname{var}\left(|a|_{p_{i-1}..p_i}\right)
//! $$
//!
//! The step length $L$ is either a trained constant or $L = w_0 + w_1 f + w_2 \sigma$. The heading comes from the
//! east vector $e = g \times m$ of the low-passed gravity $g$ and magnetic field $m$, measured as a signed angle
//! against a reference east vector $e_0$ captured at start-up. Each step then moves the walker by
//!
//! $$
//! \Delta x = L \cos \psi, \qquad \Delta y = L \sin \psi
//! $$
//!
//! where $\psi$ is the mean heading over the step, $x$ points north and $y$ points east.

pub mod ahrs;
pub mod align;
pub mod calibration;
pub mod config;
pub mod dataset;
pub mod earth;
pub mod error;
pub mod evaluate;
pub mod filter;
pub mod fusion;
pub mod heading;
pub mod logging;
pub mod pdr;
pub mod step;

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

pub use crate::config::PdrConfig;
pub use crate::dataset::{LocationRecord, SensorRecord};
pub use crate::error::{PdrError, Result};

/// One point of an estimated trajectory.
///
/// `x` and `y` are meters north and east of the origin of the run's [`earth::LocalFrame`]; `heading` is in degrees,
/// clockwise from north, normalized to [0, 360).
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryPoint {
    /// Time in seconds
    pub time: f64,
    /// North offset in meters
    pub x: f64,
    /// East offset in meters
    pub y: f64,
    /// Heading in degrees
    pub heading: f64,
}
impl TrajectoryPoint {
    pub fn new(time: f64, x: f64, y: f64, heading: f64) -> Self {
        TrajectoryPoint {
            time,
            x,
            y,
            heading: wrap_to_360(heading),
        }
    }
    /// Planar distance to another point in meters.
    pub fn distance_to(&self, other: &TrajectoryPoint) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}
impl Display for TrajectoryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TrajectoryPoint {{ t: {:.3}, x: {:.3}, y: {:.3}, heading: {:.2} }}",
            self.time, self.x, self.y, self.heading
        )
    }
}

// --- Miscellaneous functions for wrapping angles ---
/// Wrap an angle to the range -180 to 180 degrees
///
/// # Example
/// ```rust
/// use pdr::wrap_to_180;
/// assert_eq!(wrap_to_180(190.0), -170.0);
/// ```
pub fn wrap_to_180(angle: f64) -> f64 {
    if (-180.0..=180.0).contains(&angle) {
        return angle;
    }
    // non-finite input falls through as NaN
    let wrapped = (angle + 180.0).rem_euclid(360.0) - 180.0;
    if wrapped == -180.0 && angle > 0.0 { 180.0 } else { wrapped }
}
/// Wrap an angle to the half-open range [0, 360) degrees
///
/// # Example
/// ```rust
/// use pdr::wrap_to_360;
/// assert_eq!(wrap_to_360(370.0), 10.0);
/// assert_eq!(wrap_to_360(-10.0), 350.0);
/// assert_eq!(wrap_to_360(360.0), 0.0);
/// ```
pub fn wrap_to_360(angle: f64) -> f64 {
    let wrapped = angle.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360.0 for tiny negative inputs
    if wrapped >= 360.0 { 0.0 } else { wrapped }
}
/// Absolute angular difference between two headings in degrees, in [0, 180].
///
/// # Example
/// ```rust
/// use pdr::direction_diff;
/// assert_eq!(direction_diff(350.0, 10.0), 20.0);
/// ```
pub fn direction_diff(a: f64, b: f64) -> f64 {
    let diff = (wrap_to_360(a) - wrap_to_360(b)).abs();
    diff.min(360.0 - diff)
}
/// Signed shortest rotation from `from` to `to` in degrees, in [-180, 180].
///
/// Positive values are clockwise (towards increasing heading).
pub fn shortest_arc(from: f64, to: f64) -> f64 {
    wrap_to_180(wrap_to_360(to) - wrap_to_360(from))
}
/// Interpolate between two headings along the shorter of the two arcs.
///
/// `fraction` = 0 returns `from`, 1 returns `to`; the result is normalized to [0, 360).
pub fn interpolate_heading(from: f64, to: f64, fraction: f64) -> f64 {
    wrap_to_360(from + fraction * shortest_arc(from, to))
}
