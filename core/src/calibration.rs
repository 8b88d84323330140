//! Magnetometer correction hook.
//!
//! Computing a hard/soft-iron calibration (for example by fitting an ellipsoid to a figure-eight
//! recording) is left to an external tool. The aligner only needs to apply the resulting transform
//! to each raw sample before resampling, which is what [`MagnetometerCorrection`] abstracts.
use nalgebra::{Matrix3, Vector3};

/// A transform from raw to corrected magnetometer readings.
pub trait MagnetometerCorrection {
    fn correct(&self, raw: Vector3<f64>) -> Vector3<f64>;
}

/// Hard-iron offset plus soft-iron matrix correction: `soft_iron * (raw - hard_iron)`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HardSoftIronCorrection {
    pub soft_iron: Matrix3<f64>,
    pub hard_iron: Vector3<f64>,
}
impl HardSoftIronCorrection {
    pub fn new(soft_iron: Matrix3<f64>, hard_iron: Vector3<f64>) -> Self {
        HardSoftIronCorrection {
            soft_iron,
            hard_iron,
        }
    }
    /// Only subtract a constant offset.
    pub fn hard_iron_only(hard_iron: Vector3<f64>) -> Self {
        HardSoftIronCorrection::new(Matrix3::identity(), hard_iron)
    }
}
impl Default for HardSoftIronCorrection {
    fn default() -> Self {
        HardSoftIronCorrection::new(Matrix3::identity(), Vector3::zeros())
    }
}
impl MagnetometerCorrection for HardSoftIronCorrection {
    fn correct(&self, raw: Vector3<f64>) -> Vector3<f64> {
        self.soft_iron * (raw - self.hard_iron)
    }
}
impl<F> MagnetometerCorrection for F
where
    F: Fn(Vector3<f64>) -> Vector3<f64>,
{
    fn correct(&self, raw: Vector3<f64>) -> Vector3<f64> {
        self(raw)
    }
}
