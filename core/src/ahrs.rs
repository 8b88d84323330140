//! Attitude filter used to estimate gravity when a recording has no linear-accelerometer channel.
//!
//! The estimator is a quaternion complementary filter in the North-West-Up convention. The
//! gyroscope is integrated every sample and corrected towards the accelerometer (tilt) and
//! magnetometer (heading) directions with a proportional gain. During the first few seconds the
//! gain is ramped down from a large value so the attitude converges quickly from the identity.
//! Accelerometer or magnetometer feedback whose error exceeds a rejection angle is ignored,
//! unless it has been rejected for long enough that the filter is more likely wrong than the
//! sensor (the recovery trigger).
//!
//! The filter is sequential: every update depends on the state left by the previous one, so one
//! estimator instance must be fed one stream in order and never shared between streams.
use nalgebra::{Quaternion, UnitQuaternion, Vector3};

use crate::earth::STANDARD_GRAVITY;

const INITIAL_GAIN: f64 = 10.0;
/// Seconds over which the gain ramps down to its nominal value.
const INITIALISATION_PERIOD: f64 = 3.0;
const GYROSCOPE_RANGE_FACTOR: f64 = 0.98;
const RECOVERY_DECREMENT: i64 = 9;

/// Source of a per-sample gravity vector in the sensor frame.
pub trait GravityEstimator {
    /// Feed one sample and return the gravity estimate after it.
    ///
    /// `accel` is in m/s², `gyro` in rad/s, `mag` in any consistent unit, `dt` in seconds.
    /// The returned vector is in m/s² and points up, matching what an accelerometer at rest reads.
    fn update(
        &mut self,
        accel: Vector3<f64>,
        gyro: Vector3<f64>,
        mag: Vector3<f64>,
        dt: f64,
    ) -> Vector3<f64>;
}

/// Tuning of [`ComplementaryAhrs`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AhrsSettings {
    /// Proportional feedback gain after initialization.
    pub gain: f64,
    /// Gyroscope full-scale range in deg/s; 0 disables the overflow check.
    pub gyroscope_range: f64,
    /// Accelerometer rejection threshold in degrees; 0 disables rejection.
    pub acceleration_rejection: f64,
    /// Magnetometer rejection threshold in degrees; 0 disables rejection.
    pub magnetic_rejection: f64,
    /// Samples of continuous rejection before a sensor is trusted again.
    pub recovery_trigger_period: u32,
}
impl Default for AhrsSettings {
    fn default() -> Self {
        AhrsSettings {
            gain: 0.5,
            gyroscope_range: 2000.0,
            acceleration_rejection: 10.0,
            magnetic_rejection: 10.0,
            recovery_trigger_period: 5 * 50,
        }
    }
}

/// Rejection bookkeeping for one aiding sensor.
#[derive(Clone, Copy, Debug, Default)]
struct Rejection {
    threshold_squared: f64,
    trigger: i64,
    timeout: i64,
    ignored: bool,
}
impl Rejection {
    fn new(angle_deg: f64, period: u32, disabled: bool) -> Self {
        let threshold_squared = if angle_deg == 0.0 || disabled {
            f64::MAX
        } else {
            (0.5 * angle_deg.to_radians().sin()).powi(2)
        };
        Rejection {
            threshold_squared,
            trigger: 0,
            timeout: period as i64,
            ignored: false,
        }
    }
    /// Decide whether `half_feedback` is applied this sample and return the scaled feedback.
    fn gate(&mut self, half_feedback: Vector3<f64>, initialising: bool, period: u32) -> Vector3<f64> {
        self.ignored = true;
        if initialising || half_feedback.norm_squared() <= self.threshold_squared {
            self.ignored = false;
            self.trigger -= RECOVERY_DECREMENT;
        } else {
            self.trigger += 1;
        }
        if self.trigger > self.timeout {
            self.timeout = 0;
            self.ignored = false;
        } else {
            self.timeout = period as i64;
        }
        self.trigger = self.trigger.clamp(0, period as i64);
        if self.ignored {
            Vector3::zeros()
        } else {
            half_feedback * 0.5
        }
    }
}

/// Quaternion complementary filter that tracks the sensor attitude and reports gravity.
#[derive(Clone, Debug)]
pub struct ComplementaryAhrs {
    settings: AhrsSettings,
    quaternion: UnitQuaternion<f64>,
    initialising: bool,
    ramped_gain: f64,
    ramped_gain_step: f64,
    gyroscope_range_threshold: f64,
    acceleration: Rejection,
    magnetic: Rejection,
}
impl ComplementaryAhrs {
    pub fn new(settings: AhrsSettings) -> Self {
        let disabled = settings.gain == 0.0 || settings.recovery_trigger_period == 0;
        ComplementaryAhrs {
            settings,
            quaternion: UnitQuaternion::identity(),
            initialising: true,
            ramped_gain: INITIAL_GAIN,
            ramped_gain_step: (INITIAL_GAIN - settings.gain) / INITIALISATION_PERIOD,
            gyroscope_range_threshold: if settings.gyroscope_range == 0.0 {
                f64::MAX
            } else {
                settings.gyroscope_range * GYROSCOPE_RANGE_FACTOR
            },
            acceleration: Rejection::new(
                settings.acceleration_rejection,
                settings.recovery_trigger_period,
                disabled,
            ),
            magnetic: Rejection::new(
                settings.magnetic_rejection,
                settings.recovery_trigger_period,
                disabled,
            ),
        }
    }
    pub fn settings(&self) -> &AhrsSettings {
        &self.settings
    }
    pub fn quaternion(&self) -> UnitQuaternion<f64> {
        self.quaternion
    }
    pub fn is_initialising(&self) -> bool {
        self.initialising
    }
    pub fn accelerometer_ignored(&self) -> bool {
        self.acceleration.ignored
    }
    /// Unit gravity direction in the sensor frame.
    pub fn gravity_direction(&self) -> Vector3<f64> {
        self.half_gravity() * 2.0
    }
    fn half_gravity(&self) -> Vector3<f64> {
        let q = self.quaternion.as_ref();
        Vector3::new(
            q.i * q.k - q.w * q.j,
            q.j * q.k + q.w * q.i,
            q.w * q.w - 0.5 + q.k * q.k,
        )
    }
    /// Half of the west direction (second column of the rotation matrix) in the sensor frame.
    fn half_magnetic(&self) -> Vector3<f64> {
        let q = self.quaternion.as_ref();
        Vector3::new(
            q.w * q.k + q.i * q.j,
            0.5 - q.i * q.i - q.k * q.k,
            q.j * q.k - q.w * q.i,
        )
    }
    fn feedback(sensor: Vector3<f64>, reference: Vector3<f64>) -> Vector3<f64> {
        let cross = sensor.cross(&reference);
        if sensor.dot(&reference) < 0.0 {
            cross.try_normalize(f64::EPSILON).unwrap_or(cross)
        } else {
            cross
        }
    }
    /// Advance the attitude by one sample.
    ///
    /// `gyro_dps` is in deg/s, `accel_g` in units of g.
    pub fn step(&mut self, gyro_dps: Vector3<f64>, accel_g: Vector3<f64>, mag: Vector3<f64>, dt: f64) {
        if gyro_dps.iter().any(|w| w.abs() > self.gyroscope_range_threshold) {
            let quaternion = self.quaternion;
            *self = ComplementaryAhrs::new(self.settings);
            self.quaternion = quaternion;
        }

        if self.initialising {
            self.ramped_gain -= self.ramped_gain_step * dt;
            if self.ramped_gain < self.settings.gain || self.settings.gain == 0.0 {
                self.ramped_gain = self.settings.gain;
                self.initialising = false;
            }
        }

        let half_gravity = self.half_gravity();
        let period = self.settings.recovery_trigger_period;

        let mut half_accel_feedback = Vector3::zeros();
        if let Some(accel) = accel_g.try_normalize(f64::EPSILON) {
            let feedback = Self::feedback(accel, half_gravity);
            half_accel_feedback = self.acceleration.gate(feedback, self.initialising, period);
        } else {
            self.acceleration.ignored = true;
        }

        let mut half_mag_feedback = Vector3::zeros();
        if mag.norm() > 0.0 {
            let half_magnetic = self.half_magnetic();
            let west = half_gravity.cross(&mag);
            if let Some(west) = west.try_normalize(f64::EPSILON) {
                let feedback = Self::feedback(west, half_magnetic);
                half_mag_feedback = self.magnetic.gate(feedback, self.initialising, period);
            }
        } else {
            self.magnetic.ignored = true;
        }

        let half_gyro = gyro_dps * (std::f64::consts::PI / 180.0 * 0.5);
        let adjusted = half_gyro + (half_accel_feedback + half_mag_feedback) * self.ramped_gain;

        let q = self.quaternion.into_inner();
        let derivative = q * Quaternion::from_parts(0.0, adjusted);
        self.quaternion = UnitQuaternion::from_quaternion(q + derivative * dt);
    }
}
impl Default for ComplementaryAhrs {
    fn default() -> Self {
        ComplementaryAhrs::new(AhrsSettings::default())
    }
}
impl GravityEstimator for ComplementaryAhrs {
    fn update(
        &mut self,
        accel: Vector3<f64>,
        gyro: Vector3<f64>,
        mag: Vector3<f64>,
        dt: f64,
    ) -> Vector3<f64> {
        self.step(gyro.map(f64::to_degrees), accel / STANDARD_GRAVITY, mag, dt);
        self.gravity_direction() * STANDARD_GRAVITY
    }
}
