//! End-to-end tests of the PDR pipeline on synthetic walks
//!
//! Each test builds a recording the way a phone would log it: an accelerometer whose magnitude
//! swings once per footfall, a linear-accelerometer channel (so gravity is exactly known), a
//! constant magnetic field, and a 1 Hz ground-truth track. The walker always heads due north, so
//! the whole displacement should end up on the local `x` axis.
//!
//! ## Synthetic walk
//!
//! - Sensors run at 50 Hz; one footfall every 25 samples (2 steps per second).
//! - The acceleration magnitude is $g (1 + 0.2 \sin(2 \pi i / 25))$ while walking and $g$ at rest,
//!   so with a 9-sample moving average every footfall gives exactly one peak, six samples after
//!   the start of its cycle.
//! - Ground truth moves linearly north over a chosen time span.
use assert_approx_eq::assert_approx_eq;
use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Uniform};
use std::f64::consts::PI;

use pdr::align::{SensorAligner, Source};
use pdr::dataset::{Recording, read_trajectory_csv, write_trajectory_csv};
use pdr::earth::{LocalFrame, STANDARD_GRAVITY};
use pdr::evaluate::evaluate;
use pdr::pdr::{Advance, PdrOrchestrator, State, to_geodetic};
use pdr::step::{StepFeatures, StepModel, detect_peaks, step_features};
use pdr::{LocationRecord, PdrConfig, PdrError, SensorRecord, direction_diff};

const RATE: usize = 50;
const CYCLE: usize = 25;
const ORIGIN: (f64, f64) = (39.9566, -75.1899);

/// Same arithmetic as the aligner's grid, so sensor rows land exactly on grid samples.
fn grid_time(i: usize) -> f64 {
    (i / RATE) as f64 + 1.0 * (i % RATE) as f64 / RATE as f64
}

struct Walk {
    /// Length of the ground-truth track in seconds (one fix per second)
    seconds: usize,
    /// Sample at which the first footfall cycle begins
    walk_start: usize,
    footfalls: usize,
    /// Ground truth moves `distance` meters north between these two times
    truth_span: (f64, f64),
    distance: f64,
}
impl Walk {
    fn first_peak(&self) -> usize {
        self.walk_start + 6
    }
    fn last_peak(&self) -> usize {
        self.first_peak() + CYCLE * (self.footfalls - 1)
    }
    fn magnitude(&self, i: usize) -> f64 {
        let walking = self.walk_start..self.walk_start + CYCLE * self.footfalls;
        if walking.contains(&i) {
            let phase = 2.0 * PI * (i - self.walk_start) as f64 / CYCLE as f64;
            STANDARD_GRAVITY * (1.0 + 0.2 * phase.sin())
        } else {
            STANDARD_GRAVITY
        }
    }
    fn recording(&self) -> Recording {
        let n = (self.seconds + 1) * RATE;
        let up = Vector3::new(0.0, 0.0, 1.0);
        let mut accelerometer = Vec::with_capacity(n);
        let mut linear = Vec::with_capacity(n);
        for i in 0..n {
            let a = up * self.magnitude(i);
            accelerometer.push(SensorRecord::from_vector(grid_time(i), a));
            linear.push(SensorRecord::from_vector(grid_time(i), a - up * STANDARD_GRAVITY));
        }
        let frame = LocalFrame::new(ORIGIN.0, ORIGIN.1);
        let (ta, tb) = self.truth_span;
        let location = (0..=self.seconds)
            .map(|k| {
                let t = k as f64;
                let d = self.distance * ((t - ta) / (tb - ta)).clamp(0.0, 1.0);
                let (latitude, longitude) = frame.to_geodetic(d, 0.0);
                LocationRecord::at(t, latitude, longitude)
            })
            .collect();
        Recording {
            accelerometer,
            gyroscope: (0..n)
                .map(|i| SensorRecord::new(grid_time(i), 0.0, 0.0, 0.0))
                .collect(),
            magnetometer: (0..n)
                .map(|i| SensorRecord::new(grid_time(i), 20.0, 0.0, -40.0))
                .collect(),
            linear_accelerometer: Some(linear),
            location: Some(location),
        }
    }
}

fn config() -> PdrConfig {
    PdrConfig {
        sample_rate: RATE,
        move_average: 9,
        min_distance: 15,
        least_start_point: 100,
        distance_frac_step: 5,
        ..Default::default()
    }
}

#[test]
fn straight_walk_north() {
    // 21 footfalls are 20 steps of 0.75 m
    let walk = Walk {
        seconds: 17,
        walk_start: 150,
        footfalls: 21,
        truth_span: (grid_time(156), grid_time(656)),
        distance: 15.0,
    };
    assert_eq!(walk.last_peak(), 656);
    let config = PdrConfig {
        step_model: "Mean".to_string(),
        ..config()
    };
    let aligner = SensorAligner::from_buffers(walk.recording(), &config).unwrap();
    let mut orchestrator =
        PdrOrchestrator::with_model(config.clone(), StepModel::mean(0.75, STANDARD_GRAVITY))
            .unwrap();
    let truth = aligner.ground_truth().unwrap();
    let trajectory = orchestrator
        .predict_all(&aligner, (0.0, 0.0), Some(truth[0].direction))
        .unwrap();
    assert_eq!(orchestrator.state(), State::Stopped);
    assert_eq!(trajectory.len(), 18);

    let first = trajectory.first().unwrap();
    let last = trajectory.last().unwrap();
    let north = last.x - first.x;
    let east = last.y - first.y;
    assert!((north - 15.0).abs() < 0.75, "north displacement {north}");
    assert!(east.abs() < 0.1, "east displacement {east}");
    for point in &trajectory {
        assert!(direction_diff(point.heading, 0.0) < 0.5);
    }

    let frame = aligner.frame().unwrap();
    let report = evaluate(
        &to_geodetic(&trajectory, &frame),
        Some(truth),
        config.heading_ratio_threshold,
    );
    assert_eq!(report.samples, 18);
    assert!(report.mean_heading_error.unwrap() < 0.5);
    assert_eq!(report.heading_ratio, Some(1.0));
    assert!(report.mean_distance_error.unwrap() < 1.0);
}

#[test]
fn mean_model_round_trip() {
    let step_length = 0.7;
    let walk = Walk {
        seconds: 10,
        walk_start: 120,
        footfalls: 10,
        truth_span: (grid_time(120), grid_time(120 + 10 * CYCLE)),
        distance: 10.0 * step_length,
    };
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mean.model");
    let config = PdrConfig {
        step_model: "Mean".to_string(),
        model_path: Some(path.clone()),
        ..config()
    };
    let aligner = SensorAligner::from_buffers(walk.recording(), &config).unwrap();
    let (orchestrator, trajectory) = PdrOrchestrator::train(config.clone(), &aligner).unwrap();
    assert_eq!(orchestrator.state(), State::Trained);
    assert_eq!(trajectory.len(), 11);

    let loaded = StepModel::load(&path, "Mean").unwrap();
    assert_eq!(&loaded, orchestrator.model().unwrap());
    let predicted = loaded.predict(&StepFeatures::default());
    assert!((predicted - step_length).abs() < 0.01 * step_length);

    let reloaded = PdrOrchestrator::load(config).unwrap();
    assert_eq!(reloaded.state(), State::Loaded);
    assert!(matches!(
        PdrOrchestrator::load(PdrConfig {
            step_model: "Linear".to_string(),
            model_path: Some(path),
            ..Default::default()
        }),
        Err(PdrError::ModelMismatch { .. })
    ));
}

#[test]
fn linear_model_learns_uniform_steps() {
    let step_length = 0.8;
    let walk = Walk {
        seconds: 10,
        walk_start: 0,
        footfalls: 20,
        truth_span: (0.0, 10.0),
        distance: 20.0 * step_length,
    };
    let config = config();
    let aligner = SensorAligner::from_buffers(walk.recording(), &config).unwrap();
    let (orchestrator, _) = PdrOrchestrator::train(config.clone(), &aligner).unwrap();
    let model = orchestrator.model().unwrap();
    assert_eq!(model.kind(), "Linear");

    let detection = detect_peaks(
        &aligner.series().accel_magnitude,
        config.move_average,
        config.min_distance,
        Some(model.valid_peak_value),
    );
    assert_eq!(detection.peaks.len(), 20);
    let features = step_features(
        &aligner.series().time,
        &detection.filtered,
        &detection.peaks,
        0,
        1,
    );
    assert_approx_eq!(features.frequency, 2.0, 1e-9);
    let predicted = model.predict(&features);
    assert!((predicted - step_length).abs() < 0.01 * step_length, "{predicted}");
}

#[test]
fn training_window_past_the_end_is_an_error() {
    let walk = Walk {
        seconds: 6,
        walk_start: 120,
        footfalls: 6,
        truth_span: (2.0, 5.0),
        distance: 4.0,
    };
    let config = config();
    let aligner = SensorAligner::from_buffers(walk.recording(), &config).unwrap();
    let mut orchestrator = PdrOrchestrator::new(config).unwrap();
    assert!(matches!(
        orchestrator.fit(&aligner, 0..9),
        Err(PdrError::SliceOutOfRange { .. })
    ));
    assert_eq!(orchestrator.state(), State::Uninitialized);
}

#[test]
fn training_requires_ground_truth() {
    let walk = Walk {
        seconds: 6,
        walk_start: 100,
        footfalls: 8,
        truth_span: (2.0, 6.0),
        distance: 5.0,
    };
    let dir = tempfile::tempdir().unwrap();
    let mut recording = walk.recording();
    recording.location = None;
    recording.to_directory(dir.path()).unwrap();

    let config = config();
    let aligner = SensorAligner::from_directory(dir.path(), &config).unwrap();
    assert!(!aligner.has_ground_truth());
    assert!(matches!(
        PdrOrchestrator::train(config.clone(), &aligner),
        Err(PdrError::MissingGroundTruth(_))
    ));
    let mut orchestrator = PdrOrchestrator::new(config).unwrap();
    assert!(matches!(
        orchestrator.fit(&aligner, 0..2),
        Err(PdrError::MissingGroundTruth(_))
    ));
    assert_eq!(orchestrator.state(), State::Uninitialized);
}

#[test]
fn failed_training_keeps_the_previous_state() {
    let walk = Walk {
        seconds: 4,
        walk_start: 20,
        footfalls: 6,
        truth_span: (0.0, 4.0),
        distance: 4.0,
    };
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.bin");
    // 200 aligned samples cannot bootstrap the heading
    let config = PdrConfig {
        step_model: "Mean".to_string(),
        model_path: Some(path.clone()),
        least_start_point: 1000,
        ..config()
    };
    let aligner = SensorAligner::from_buffers(walk.recording(), &config).unwrap();
    assert_eq!(aligner.len(), 200);

    let mut fresh = PdrOrchestrator::new(config.clone()).unwrap();
    assert!(matches!(
        fresh.fit(&aligner, 0..4),
        Err(PdrError::DegenerateBootstrap(_))
    ));
    assert_eq!(fresh.state(), State::Uninitialized);
    assert!(fresh.model().is_none());
    assert!(fresh.start_info().is_none());
    assert!(!path.exists());

    let previous = StepModel::mean(0.5, STANDARD_GRAVITY);
    let mut loaded = PdrOrchestrator::with_model(config, previous).unwrap();
    assert!(loaded.fit(&aligner, 0..4).is_err());
    assert_eq!(loaded.state(), State::Loaded);
    assert_eq!(loaded.model(), Some(&previous));
    assert!(!path.exists());
}

#[test]
fn standing_still_is_distinct_from_walking() {
    let walk = Walk {
        seconds: 8,
        walk_start: 150,
        footfalls: 10,
        truth_span: (3.0, 8.0),
        distance: 7.0,
    };
    let config = config();
    let aligner = SensorAligner::from_buffers(walk.recording(), &config).unwrap();
    let mut orchestrator =
        PdrOrchestrator::with_model(config, StepModel::mean(0.7, STANDARD_GRAVITY)).unwrap();
    orchestrator
        .start((0.0, 0.0), &aligner.slice(0, 101).unwrap(), None)
        .unwrap();

    let still = orchestrator.advance(&aligner.slice(0, 150).unwrap()).unwrap();
    assert_eq!(still, Advance::Stopped);
    assert!(still.points().is_empty());

    // the segment ends in the trough after the ninth footfall, whose peak (356) is carried over
    // with the tenth (381) into the flush
    let moving = orchestrator.advance(&aligner.slice(150, 372).unwrap()).unwrap();
    match &moving {
        Advance::Progressing(points) => {
            assert_eq!(points.len(), 8);
            assert!(points.iter().all(|p| p.x > 0.0));
        }
        Advance::Stopped => panic!("walking segment reported as stopped"),
    }
    let tail = orchestrator.stop().unwrap();
    assert_eq!(tail.len(), 1);
    assert_eq!(tail[0].time, grid_time(381));
    assert_approx_eq!(tail[0].x, 9.0 * 0.7, 1e-6);
    // 10 footfalls are 9 steps
    assert_eq!(moving.points().len() + tail.len(), 9);
    assert_eq!(orchestrator.state(), State::Stopped);
    assert!(orchestrator.advance(&aligner.slice(0, 10).unwrap()).is_err());
}

#[test]
fn heading_difference_is_symmetric_and_bounded() {
    let mut rng = StdRng::seed_from_u64(42);
    let angles = Uniform::new(-720.0, 720.0).unwrap();
    for _ in 0..10_000 {
        let a: f64 = angles.sample(&mut rng);
        let b: f64 = if rng.random_bool(0.1) { a } else { angles.sample(&mut rng) };
        let ab = direction_diff(a, b);
        let ba = direction_diff(b, a);
        assert_eq!(ab, ba);
        assert!((0.0..=180.0).contains(&ab), "direction_diff({a}, {b}) = {ab}");
    }
}

#[test]
fn train_and_predict_from_files() {
    let walk = Walk {
        seconds: 10,
        walk_start: 120,
        footfalls: 12,
        truth_span: (grid_time(126), grid_time(126 + 11 * CYCLE)),
        distance: 8.0,
    };
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path().join("walk");
    walk.recording().to_directory(&data).unwrap();
    let config = PdrConfig {
        step_model: "Mean".to_string(),
        model_path: Some(dir.path().join("model.bin")),
        ..config()
    };
    let config_path = dir.path().join("pdr.yaml");
    config.to_file(&config_path).unwrap();
    let config = PdrConfig::from_file(&config_path).unwrap();

    let aligner = SensorAligner::from_directory(&data, &config).unwrap();
    assert_eq!(aligner.source(), &Source::FileBacked(data.clone()));
    let buffered = SensorAligner::from_buffers(walk.recording(), &config).unwrap();
    assert_eq!(aligner.series(), buffered.series());

    PdrOrchestrator::train(config.clone(), &aligner).unwrap();
    let mut orchestrator = PdrOrchestrator::load(config).unwrap();
    let trajectory = orchestrator.predict_all(&aligner, (0.0, 0.0), None).unwrap();

    let frame = aligner.frame().unwrap();
    let output = dir.path().join("trajectory.csv");
    write_trajectory_csv(&trajectory, &frame, &output).unwrap();
    let written = read_trajectory_csv(&output).unwrap();
    assert_eq!(written.len(), trajectory.len());
    let end = written.last().unwrap();
    assert!((end.x - 8.0).abs() < 1.0, "ended at {end}");
}
