//! CSV loading of sensor recordings and CSV export of trajectories.
//!
//! This module provides:
//! - Record structs ([`SensorRecord`], [`LocationRecord`]) matching the column layout of the recording CSV files
//! - [`Recording`], the set of per-channel record vectors that feeds the [`crate::align::SensorAligner`]
//! - [`Recording::from_directory`], which reads one recording directory
//! - [`write_trajectory_csv`] for exporting an estimated trajectory
//!
//! A recording directory holds one CSV file per sensor type:
//!
//! | File                        | Required | Columns                                           |
//! |-----------------------------|----------|---------------------------------------------------|
//! | `Accelerometer.csv`         | yes      | `Time (s), X, Y, Z`                               |
//! | `Gyroscope.csv`             | yes      | `Time (s), X, Y, Z`                               |
//! | `Magnetometer.csv`          | yes      | `Time (s), X, Y, Z`                               |
//! | `Linear Accelerometer.csv`  | no       | `Time (s), X, Y, Z`                               |
//! | `Location.csv`              | no       | `Time (s), Latitude (°), Longitude (°), Height (m), Velocity (m/s), Direction (°), Horizontal Accuracy (m), Vertical Accuracy (°)` |
use log::{debug, info};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::path::Path;

use crate::TrajectoryPoint;
use crate::earth::LocalFrame;
use crate::error::{PdrError, Result};

/// File name of the accelerometer channel in a recording directory.
pub const ACCELEROMETER_FILE: &str = "Accelerometer.csv";
/// File name of the gyroscope channel in a recording directory.
pub const GYROSCOPE_FILE: &str = "Gyroscope.csv";
/// File name of the magnetometer channel in a recording directory.
pub const MAGNETOMETER_FILE: &str = "Magnetometer.csv";
/// File name of the optional linear-accelerometer channel in a recording directory.
pub const LINEAR_ACCELEROMETER_FILE: &str = "Linear Accelerometer.csv";
/// File name of the optional ground-truth location track in a recording directory.
pub const LOCATION_FILE: &str = "Location.csv";

/// One time-stamped three-axis sensor sample.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorRecord {
    /// Time in seconds
    #[serde(rename = "Time (s)")]
    pub time: f64,
    #[serde(rename = "X")]
    pub x: f64,
    #[serde(rename = "Y")]
    pub y: f64,
    #[serde(rename = "Z")]
    pub z: f64,
}
impl SensorRecord {
    pub fn new(time: f64, x: f64, y: f64, z: f64) -> Self {
        SensorRecord { time, x, y, z }
    }
    pub fn from_vector(time: f64, v: Vector3<f64>) -> Self {
        SensorRecord {
            time,
            x: v[0],
            y: v[1],
            z: v[2],
        }
    }
    pub fn vector(&self) -> Vector3<f64> {
        Vector3::new(self.x, self.y, self.z)
    }
}
impl Display for SensorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SensorRecord {{ t: {:.3}, [{:.4}, {:.4}, {:.4}] }}",
            self.time, self.x, self.y, self.z
        )
    }
}

/// One ground-truth location fix.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LocationRecord {
    /// Time in seconds
    #[serde(rename = "Time (s)")]
    pub time: f64,
    /// Latitude in degrees
    #[serde(rename = "Latitude (°)")]
    pub latitude: f64,
    /// Longitude in degrees
    #[serde(rename = "Longitude (°)")]
    pub longitude: f64,
    /// Height in meters
    #[serde(rename = "Height (m)")]
    pub height: f64,
    /// Speed in m/s
    #[serde(rename = "Velocity (m/s)")]
    pub velocity: f64,
    /// Course over ground in degrees, clockwise from north
    #[serde(rename = "Direction (°)")]
    pub direction: f64,
    /// Horizontal accuracy in meters
    #[serde(rename = "Horizontal Accuracy (m)")]
    pub horizontal_accuracy: f64,
    /// Vertical accuracy
    #[serde(rename = "Vertical Accuracy (°)")]
    pub vertical_accuracy: f64,
}
impl LocationRecord {
    /// A fix with only time and position filled in.
    pub fn at(time: f64, latitude: f64, longitude: f64) -> Self {
        LocationRecord {
            time,
            latitude,
            longitude,
            ..Default::default()
        }
    }
}

/// Reads a CSV file and returns a vector of records of type `T`.
///
/// # Arguments
/// * `path` - Path to the CSV file to read.
///
/// # Returns
/// * `Ok(Vec<T>)` if successful.
/// * `Err` if the file cannot be read or parsed.
pub fn read_csv<T, P>(path: P) -> Result<Vec<T>>
where
    T: for<'de> Deserialize<'de>,
    P: AsRef<Path>,
{
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)?;
    let mut records = Vec::new();
    for result in rdr.deserialize() {
        let record: T = result?;
        records.push(record);
    }
    Ok(records)
}

/// Writes a slice of serializable records to a CSV file.
pub fn write_csv<T: Serialize, P: AsRef<Path>>(records: &[T], path: P) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

/// The per-channel records of one recording, each with its own time base.
///
/// All vectors are owned; a recording is consumed by the aligner that resamples it.
#[derive(Clone, Debug, Default)]
pub struct Recording {
    pub accelerometer: Vec<SensorRecord>,
    pub gyroscope: Vec<SensorRecord>,
    pub magnetometer: Vec<SensorRecord>,
    pub linear_accelerometer: Option<Vec<SensorRecord>>,
    pub location: Option<Vec<LocationRecord>>,
}
impl Recording {
    /// Read all channels of a recording directory.
    ///
    /// A missing required channel file is reported as [`PdrError::MissingChannel`]; missing optional files leave the
    /// corresponding field `None`.
    pub fn from_directory<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let required = |file: &'static str, name: &'static str| -> Result<Vec<SensorRecord>> {
            let path = dir.join(file);
            if !path.is_file() {
                return Err(PdrError::MissingChannel(name));
            }
            read_csv(path)
        };
        let optional = |file: &str| dir.join(file).is_file();

        let recording = Recording {
            accelerometer: required(ACCELEROMETER_FILE, "accelerometer")?,
            gyroscope: required(GYROSCOPE_FILE, "gyroscope")?,
            magnetometer: required(MAGNETOMETER_FILE, "magnetometer")?,
            linear_accelerometer: if optional(LINEAR_ACCELEROMETER_FILE) {
                Some(read_csv(dir.join(LINEAR_ACCELEROMETER_FILE))?)
            } else {
                None
            },
            location: if optional(LOCATION_FILE) {
                Some(read_csv(dir.join(LOCATION_FILE))?)
            } else {
                None
            },
        };
        info!(
            "Loaded recording {}: {} accelerometer, {} gyroscope, {} magnetometer samples",
            dir.display(),
            recording.accelerometer.len(),
            recording.gyroscope.len(),
            recording.magnetometer.len()
        );
        debug!(
            "Linear accelerometer: {}, ground truth fixes: {}",
            recording.linear_accelerometer.as_ref().map_or(0, Vec::len),
            recording.location.as_ref().map_or(0, Vec::len)
        );
        Ok(recording)
    }
    /// Write all channels into a recording directory using the standard file names.
    pub fn to_directory<P: AsRef<Path>>(&self, dir: P) -> Result<()> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        write_csv(&self.accelerometer, dir.join(ACCELEROMETER_FILE))?;
        write_csv(&self.gyroscope, dir.join(GYROSCOPE_FILE))?;
        write_csv(&self.magnetometer, dir.join(MAGNETOMETER_FILE))?;
        if let Some(linear) = &self.linear_accelerometer {
            write_csv(linear, dir.join(LINEAR_ACCELEROMETER_FILE))?;
        }
        if let Some(location) = &self.location {
            write_csv(location, dir.join(LOCATION_FILE))?;
        }
        Ok(())
    }
}

/// Row layout of an exported trajectory.
#[derive(Debug, Serialize, Deserialize)]
struct TrajectoryRow {
    time: f64,
    latitude: f64,
    longitude: f64,
    x: f64,
    y: f64,
    heading: f64,
}

/// Writes a trajectory to a CSV file with columns `time,latitude,longitude,x,y,heading`.
///
/// The local `x`/`y` coordinates are mapped back to WGS84 with `frame`.
pub fn write_trajectory_csv<P: AsRef<Path>>(
    points: &[TrajectoryPoint],
    frame: &LocalFrame,
    path: P,
) -> Result<()> {
    let rows: Vec<TrajectoryRow> = points
        .iter()
        .map(|p| {
            let (latitude, longitude) = frame.to_geodetic(p.x, p.y);
            TrajectoryRow {
                time: p.time,
                latitude,
                longitude,
                x: p.x,
                y: p.y,
                heading: p.heading,
            }
        })
        .collect();
    write_csv(&rows, path)
}

/// Reads a trajectory previously written by [`write_trajectory_csv`].
pub fn read_trajectory_csv<P: AsRef<Path>>(path: P) -> Result<Vec<TrajectoryPoint>> {
    let rows: Vec<TrajectoryRow> = read_csv(path)?;
    Ok(rows
        .into_iter()
        .map(|r| TrajectoryPoint::new(r.time, r.x, r.y, r.heading))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use std::fs;

    #[test]
    fn parses_sensor_csv_headers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(ACCELEROMETER_FILE);
        fs::write(&path, "Time (s),X,Y,Z\n0.00,0.1,0.2,9.8\n0.02,0.0,-0.1,9.7\n").unwrap();
        let records: Vec<SensorRecord> = read_csv(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1], SensorRecord::new(0.02, 0.0, -0.1, 9.7));
        assert_eq!(records[0].vector(), Vector3::new(0.1, 0.2, 9.8));
    }
    #[test]
    fn parses_location_csv_headers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LOCATION_FILE);
        fs::write(
            &path,
            "Time (s),Latitude (°),Longitude (°),Height (m),Velocity (m/s),Direction (°),Horizontal Accuracy (m),Vertical Accuracy (°)\n\
             1.0,39.95,-75.19,12.0,1.4,90.0,3.5,2.0\n",
        )
        .unwrap();
        let records: Vec<LocationRecord> = read_csv(&path).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].latitude, 39.95);
        assert_eq!(records[0].direction, 90.0);
        assert_eq!(records[0].vertical_accuracy, 2.0);
    }
    #[test]
    fn recording_requires_core_channels() {
        let dir = tempfile::tempdir().unwrap();
        let recording = Recording {
            accelerometer: vec![SensorRecord::new(0.0, 0.0, 0.0, 9.8)],
            gyroscope: vec![SensorRecord::new(0.0, 0.0, 0.0, 0.0)],
            magnetometer: vec![SensorRecord::new(0.0, 20.0, 0.0, -40.0)],
            linear_accelerometer: None,
            location: None,
        };
        recording.to_directory(dir.path()).unwrap();
        let loaded = Recording::from_directory(dir.path()).unwrap();
        assert_eq!(loaded.magnetometer, recording.magnetometer);
        assert!(loaded.linear_accelerometer.is_none());
        assert!(loaded.location.is_none());

        fs::remove_file(dir.path().join(GYROSCOPE_FILE)).unwrap();
        let err = Recording::from_directory(dir.path()).unwrap_err();
        assert!(matches!(err, PdrError::MissingChannel("gyroscope")));
    }
    #[test]
    fn trajectory_csv_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trajectory.csv");
        let frame = LocalFrame::new(10.0, 20.0);
        let points = vec![
            TrajectoryPoint::new(0.0, 0.0, 0.0, 0.0),
            TrajectoryPoint::new(1.0, 0.7, 0.1, 8.0),
        ];
        write_trajectory_csv(&points, &frame, &path).unwrap();
        let loaded = read_trajectory_csv(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_approx_eq!(loaded[1].x, 0.7);
        assert_approx_eq!(loaded[1].heading, 8.0);
    }
}
