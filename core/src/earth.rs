//! Earth-related constants and functions
//!
//! This module contains the WGS84 ellipsoid constants and the two pieces of geodesy the PDR pipeline needs: a local
//! planar frame in which trajectories are accumulated, and the geodesic distance used to score predicted positions
//! against ground truth.
//!
//! # Local planar frame
//! Trajectories are accumulated in meters in a tangent plane anchored at an origin latitude/longitude. The $x$ axis
//! points north and the $y$ axis points east, which makes a compass heading $\psi$ (clockwise from north) map onto
//! the plane as $(\cos\psi, \sin\psi)$. Offsets are converted with the principal radii of curvature at the origin:
//!
//! $$
//! x = R_M \Delta\phi, \qquad y = R_N \cos(\phi_0) \Delta\lambda
//! $$
//!
//! which is accurate to well below a meter over the few kilometers a pedestrian covers in one run.
//!
//! # Geodesic distance
//! Distances between two WGS84 positions are computed with Vincenty's inverse formula. The iteration fails to
//! converge only for nearly antipodal points; there the ECEF chord (via [`nav-types`](https://crates.io/crates/nav-types))
//! is used instead.
use ::nav_types::{ECEF, WGS84};
use log::debug;

use crate::wrap_to_180;

// Earth constants (WGS84)
/// Earth's equitorial radius in meters
pub const EQUATORIAL_RADIUS: f64 = 6378137.0; // meters
/// Earth's polar radius in meters
pub const POLAR_RADIUS: f64 = 6356752.31425; // meters
/// Earth's eccentricity ($e$)
pub const ECCENTRICITY: f64 = 0.0818191908425; // unit-less
/// Earth's eccentricity squared ($e^2$)
pub const ECCENTRICITY_SQUARED: f64 = ECCENTRICITY * ECCENTRICITY;
/// Earth's flattening factor ($f$)
pub const F: f64 = 1.0 / 298.257223563; // Flattening factor
/// Standard gravity in $m/s^2$
pub const STANDARD_GRAVITY: f64 = 9.80665;

const VINCENTY_TOLERANCE: f64 = 1e-12;
const VINCENTY_MAX_ITERATIONS: usize = 200;

/// Calculate the principal radii of curvature of the Earth at a given latitude
///
/// # Parameters
/// - `latitude` - The WGS84 latitude in degrees
/// - `altitude` - The WGS84 altitude in meters
///
/// # Returns
/// A tuple `(r_m, r_n, r_p)` in meters: the meridian radius of curvature, the radius of curvature in the prime
/// vertical, and the radius of the parallel at that latitude and altitude.
///
/// # Example
/// ```rust
/// use pdr::earth;
/// let (r_m, r_n, r_p) = earth::principal_radii(&45.0, &0.0);
/// assert!(r_m < r_n);
/// ```
pub fn principal_radii(latitude: &f64, altitude: &f64) -> (f64, f64, f64) {
    let latitude_rad: f64 = (latitude).to_radians();
    let sin_lat: f64 = latitude_rad.sin();
    let sin_lat_sq: f64 = sin_lat * sin_lat;
    let r_m: f64 = (EQUATORIAL_RADIUS * (1.0 - ECCENTRICITY_SQUARED))
        / (1.0 - ECCENTRICITY_SQUARED * sin_lat_sq).powf(3.0 / 2.0);
    let r_n: f64 = EQUATORIAL_RADIUS / (1.0 - ECCENTRICITY_SQUARED * sin_lat_sq).sqrt();
    let r_p: f64 = (r_n + altitude) * latitude_rad.cos();
    (r_m, r_n, r_p)
}

/// A tangent-plane frame anchored at an origin position.
///
/// `x` is meters north of the origin and `y` meters east of it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LocalFrame {
    /// Origin latitude in degrees
    pub origin_latitude: f64,
    /// Origin longitude in degrees
    pub origin_longitude: f64,
    meters_per_radian_north: f64,
    meters_per_radian_east: f64,
}
impl LocalFrame {
    pub fn new(origin_latitude: f64, origin_longitude: f64) -> Self {
        let (r_m, _, r_p) = principal_radii(&origin_latitude, &0.0);
        LocalFrame {
            origin_latitude,
            origin_longitude,
            meters_per_radian_north: r_m,
            meters_per_radian_east: r_p,
        }
    }
    /// Convert a WGS84 position (degrees) to local `(x, y)` meters.
    pub fn to_local(&self, latitude: f64, longitude: f64) -> (f64, f64) {
        let d_lat = (latitude - self.origin_latitude).to_radians();
        let d_lon = wrap_to_180(longitude - self.origin_longitude).to_radians();
        (
            d_lat * self.meters_per_radian_north,
            d_lon * self.meters_per_radian_east,
        )
    }
    /// Convert local `(x, y)` meters back to a WGS84 position `(latitude, longitude)` in degrees.
    pub fn to_geodetic(&self, x: f64, y: f64) -> (f64, f64) {
        let latitude = self.origin_latitude + (x / self.meters_per_radian_north).to_degrees();
        let longitude =
            wrap_to_180(self.origin_longitude + (y / self.meters_per_radian_east).to_degrees());
        (latitude, longitude)
    }
}

/// Geodesic distance in meters between two WGS84 positions given in degrees.
///
/// Uses Vincenty's inverse solution on the WGS84 ellipsoid.
///
/// # Example
/// ```rust
/// use pdr::earth;
/// let d = earth::geodesic_distance(0.0, 0.0, 0.0, 1.0);
/// assert!((d - 111_319.49).abs() < 0.01);
/// ```
pub fn geodesic_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    match vincenty_inverse(lat1, lon1, lat2, lon2) {
        Some(distance) => distance,
        None => {
            debug!(
                "Vincenty did not converge for ({lat1}, {lon1}) -> ({lat2}, {lon2}), using ECEF chord"
            );
            ecef_chord_distance(lat1, lon1, lat2, lon2)
        }
    }
}

/// Straight-line distance through the ellipsoid between two surface positions.
pub fn ecef_chord_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let a: ECEF<f64> = ECEF::from(WGS84::from_degrees_and_meters(lat1, lon1, 0.0));
    let b: ECEF<f64> = ECEF::from(WGS84::from_degrees_and_meters(lat2, lon2, 0.0));
    let dx = a.x() - b.x();
    let dy = a.y() - b.y();
    let dz = a.z() - b.z();
    (dx * dx + dy * dy + dz * dz).sqrt()
}

fn vincenty_inverse(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> Option<f64> {
    let a = EQUATORIAL_RADIUS;
    let b = (1.0 - F) * a;
    let l = wrap_to_180(lon2 - lon1).to_radians();
    let u1 = ((1.0 - F) * lat1.to_radians().tan()).atan();
    let u2 = ((1.0 - F) * lat2.to_radians().tan()).atan();
    let (sin_u1, cos_u1) = u1.sin_cos();
    let (sin_u2, cos_u2) = u2.sin_cos();

    let mut lambda = l;
    for _ in 0..VINCENTY_MAX_ITERATIONS {
        let (sin_lambda, cos_lambda) = lambda.sin_cos();
        let sin_sigma = ((cos_u2 * sin_lambda).powi(2)
            + (cos_u1 * sin_u2 - sin_u1 * cos_u2 * cos_lambda).powi(2))
        .sqrt();
        if sin_sigma == 0.0 {
            return Some(0.0); // coincident points
        }
        let cos_sigma = sin_u1 * sin_u2 + cos_u1 * cos_u2 * cos_lambda;
        let sigma = sin_sigma.atan2(cos_sigma);
        let sin_alpha = cos_u1 * cos_u2 * sin_lambda / sin_sigma;
        let cos_sq_alpha = 1.0 - sin_alpha * sin_alpha;
        // equatorial line: cos_sq_alpha = 0
        let cos_2sigma_m = if cos_sq_alpha != 0.0 {
            cos_sigma - 2.0 * sin_u1 * sin_u2 / cos_sq_alpha
        } else {
            0.0
        };
        let c = F / 16.0 * cos_sq_alpha * (4.0 + F * (4.0 - 3.0 * cos_sq_alpha));
        let previous = lambda;
        lambda = l
            + (1.0 - c)
                * F
                * sin_alpha
                * (sigma
                    + c * sin_sigma
                        * (cos_2sigma_m + c * cos_sigma * (-1.0 + 2.0 * cos_2sigma_m.powi(2))));
        if (lambda - previous).abs() < VINCENTY_TOLERANCE {
            let u_sq = cos_sq_alpha * (a * a - b * b) / (b * b);
            let big_a =
                1.0 + u_sq / 16384.0 * (4096.0 + u_sq * (-768.0 + u_sq * (320.0 - 175.0 * u_sq)));
            let big_b = u_sq / 1024.0 * (256.0 + u_sq * (-128.0 + u_sq * (74.0 - 47.0 * u_sq)));
            let delta_sigma = big_b
                * sin_sigma
                * (cos_2sigma_m
                    + big_b / 4.0
                        * (cos_sigma * (-1.0 + 2.0 * cos_2sigma_m.powi(2))
                            - big_b / 6.0
                                * cos_2sigma_m
                                * (-3.0 + 4.0 * sin_sigma.powi(2))
                                * (-3.0 + 4.0 * cos_2sigma_m.powi(2))));
            return Some(b * big_a * (sigma - delta_sigma));
        }
    }
    None
}
