//! Magnetic heading from the east vector.
//!
//! The magnetometer and gravity channels are low-passed with the zero-phase Butterworth filter.
//! Their cross product $e = g \times m$ is horizontal and points east (in the sensor frame) no
//! matter how the device is held, so the rotation of $e$ about the gravity axis tracks the
//! walker's heading. The reference $e_0$ is the mean east vector at start-up and the heading of a
//! sample is the signed angle from $e_0$ to $e$ added to the initial heading $\psi_0$:
//!
//! $$
//! \theta = \arccos \frac{e \cdot e_0}{|e| |e_0|}, \qquad
//! s = \operatorname{sgn}\left(-(e \times e_0) \cdot g\right), \qquad
//! \psi = (s \theta + \psi_0) \bmod 360
//! $$
use log::{debug, info};
use nalgebra::Vector3;

use crate::align::SensorSeries;
use crate::config::PdrConfig;
use crate::error::{PdrError, Result};
use crate::filter::ButterworthLowPass;
use crate::{wrap_to_180, wrap_to_360};

/// Samples averaged into the reference east vector.
pub const REFERENCE_SAMPLES: usize = 50;
/// Norm under which an east or gravity vector is considered degenerate.
pub const DEGENERATE_NORM: f64 = 1e-9;

/// Heading reference and position cursor of a run.
///
/// Created by [`HeadingEstimator::start`]; the fuser moves `last_x`/`last_y` forward as segments
/// are merged.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StartInfo {
    /// Mean east vector over the start window
    pub reference_east: Vector3<f64>,
    /// Heading at the start in degrees, [0, 360)
    pub direction0: f64,
    pub x0: f64,
    pub y0: f64,
    pub last_x: f64,
    pub last_y: f64,
}

/// Per-sample heading estimation.
#[derive(Clone, Copy, Debug)]
pub struct HeadingEstimator {
    filter: ButterworthLowPass,
    least_start_point: usize,
    optimized_mode_ratio: f64,
}
impl HeadingEstimator {
    pub fn new(config: &PdrConfig) -> Self {
        HeadingEstimator {
            filter: ButterworthLowPass::new(config.butter_wn),
            least_start_point: config.least_start_point,
            optimized_mode_ratio: config.optimized_mode_ratio,
        }
    }
    /// Low-passed gravity and magnetometer, and the east vector of every sample.
    fn east_vectors(&self, series: &SensorSeries) -> (Vec<Vector3<f64>>, Vec<Vector3<f64>>) {
        let gravity = self.filter.filtfilt_vectors(&series.gravity);
        let magnetic = self.filter.filtfilt_vectors(&series.magnetometer);
        let east = gravity
            .iter()
            .zip(&magnetic)
            .map(|(g, m)| g.cross(m))
            .collect();
        (gravity, east)
    }
    /// Bootstrap the heading reference from the start of a walk.
    ///
    /// With a `reference_direction` (e.g. a GNSS course) the initial heading moves from the
    /// magnetic estimate towards it by `optimized_mode_ratio` along the shorter arc.
    pub fn start(
        &self,
        bootstrap: &SensorSeries,
        initial_position: (f64, f64),
        reference_direction: Option<f64>,
    ) -> Result<StartInfo> {
        if let Some(reference) = reference_direction.filter(|r| !r.is_finite()) {
            return Err(PdrError::DegenerateBootstrap(format!(
                "reference direction {reference} is not finite"
            )));
        }
        let n = bootstrap.len();
        let required = (self.least_start_point + 1).max(2);
        if n < required {
            return Err(PdrError::DegenerateBootstrap(format!(
                "{n} samples, at least {required} required"
            )));
        }
        let (_, east) = self.east_vectors(bootstrap);
        let count = REFERENCE_SAMPLES.min(n);
        let reference_east = east[..count].iter().sum::<Vector3<f64>>() / count as f64;
        if reference_east.norm() < DEGENERATE_NORM {
            return Err(PdrError::DegenerateBootstrap(
                "gravity and magnetic field are parallel or zero".into(),
            ));
        }

        let magnetic = &bootstrap.magnetometer;
        let steps = self.least_start_point.max(1);
        let mean_dx = (magnetic[steps][0] - magnetic[0][0]) / steps as f64;
        let mean_dy = (magnetic[steps][1] - magnetic[0][1]) / steps as f64;
        let magnetic_heading = wrap_to_360(mean_dx.atan2(mean_dy).to_degrees());
        let direction0 = match reference_direction {
            Some(reference) => wrap_to_360(
                magnetic_heading + self.optimized_mode_ratio * wrap_to_180(reference - magnetic_heading),
            ),
            None => magnetic_heading,
        };
        info!(
            "Heading started at {direction0:.2} deg (magnetic {magnetic_heading:.2}, reference {reference_direction:?})"
        );
        let (x0, y0) = initial_position;
        Ok(StartInfo {
            reference_east,
            direction0,
            x0,
            y0,
            last_x: x0,
            last_y: y0,
        })
    }
    /// Heading in degrees for every sample of `series`.
    pub fn predict(&self, start: &StartInfo, series: &SensorSeries) -> Result<Vec<f64>> {
        let (gravity, east) = self.east_vectors(series);
        let e0 = start.reference_east;
        let e0_norm = e0.norm();
        let mut headings = Vec::with_capacity(series.len());
        for (index, (e, g)) in east.iter().zip(&gravity).enumerate() {
            let e_norm = e.norm();
            if e_norm < DEGENERATE_NORM {
                return Err(PdrError::DegenerateVector { kind: "east", index });
            }
            if g.norm() < DEGENERATE_NORM {
                return Err(PdrError::DegenerateVector {
                    kind: "gravity",
                    index,
                });
            }
            let cos = (e.dot(&e0) / (e_norm * e0_norm)).clamp(-1.0, 1.0);
            let angle = cos.acos().to_degrees();
            let side = -(e.cross(&e0)).dot(g);
            let sign = if side > 0.0 {
                1.0
            } else if side < 0.0 {
                -1.0
            } else {
                0.0
            };
            headings.push(wrap_to_360(sign * angle + start.direction0));
        }
        debug!("Predicted {} headings", headings.len());
        Ok(headings)
    }
}
