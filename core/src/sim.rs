//! Simulation utilities for exercising the particle filter on synthetic scenarios.
//!
//! This module provides:
//! - `SimulationConfig`, a serializable description of a complete run (JSON, YAML or TOML)
//! - Scenario generation: a random landmark field and noisy landmark observations of a
//!   ground-truth vehicle following a constant turn rate and velocity trajectory
//! - `run_simulation`, a closed-loop runner producing one `NavigationResult` per step
//! - CSV import/export of results and summary error statistics
use log::{debug, info};
use nalgebra::{Vector2, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;

use crate::geometry::{dist, map_to_vehicle, wrap_to_pi};
use crate::map::{Map, MapLandmark};
use crate::measurements::{LandmarkMeasurement, LandmarkObs};
use crate::motion::{propagate, sample_pose};
use crate::particle::{
    DEFAULT_NUM_PARTICLES, ParticleAveragingStrategy, ParticleFilter, ParticleResamplingStrategy,
    SenseAxis,
};
use crate::{ControlInput, NavigationFilter, Pose2D};

/// GPS-grade initial uncertainty `[sigma_x (m), sigma_y (m), sigma_theta (rad)]`
pub const DEFAULT_GPS_STD: [f64; 3] = [0.3, 0.3, 0.01];
/// Landmark measurement uncertainty `[sigma_x (m), sigma_y (m)]`
pub const DEFAULT_LANDMARK_STD: [f64; 2] = [0.3, 0.3];

fn default_num_particles() -> usize {
    DEFAULT_NUM_PARTICLES
}
fn default_seed() -> u64 {
    42
}
fn default_steps() -> usize {
    500
}
fn default_dt() -> f64 {
    0.1
}
fn default_velocity() -> f64 {
    10.0
}
fn default_yaw_rate() -> f64 {
    0.1
}
fn default_initial_pose() -> [f64; 3] {
    [0.0, -100.0, 0.0]
}
fn default_gps_std() -> [f64; 3] {
    DEFAULT_GPS_STD
}
fn default_process_std() -> [f64; 3] {
    DEFAULT_GPS_STD
}
fn default_landmark_std() -> [f64; 2] {
    DEFAULT_LANDMARK_STD
}
fn default_sensor_range() -> f64 {
    50.0
}
fn default_num_landmarks() -> usize {
    80
}
fn default_map_half_extent() -> f64 {
    150.0
}

/// Complete description of a synthetic localization run.
///
/// ```
/// use landmark_pf::sim::SimulationConfig;
///
/// let cfg = SimulationConfig {
///     steps: 50,
///     sensor_range: 30.0,
///     ..Default::default()
/// };
/// assert_eq!(cfg.num_particles, 100);
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(default = "default_num_particles")]
    pub num_particles: usize,
    /// Seed for the filter's random stream. The simulated world uses a stream derived from it.
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_steps")]
    pub steps: usize,
    /// Time between filter steps (s)
    #[serde(default = "default_dt")]
    pub dt: f64,
    /// Commanded linear velocity (m/s)
    #[serde(default = "default_velocity")]
    pub velocity: f64,
    /// Commanded yaw rate (rad/s)
    #[serde(default = "default_yaw_rate")]
    pub yaw_rate: f64,
    /// Ground-truth starting pose `[x, y, theta]`
    #[serde(default = "default_initial_pose")]
    pub initial_pose: [f64; 3],
    /// Uncertainty of the initial pose estimate
    #[serde(default = "default_gps_std")]
    pub gps_std: [f64; 3],
    /// Process noise added to every particle on prediction
    #[serde(default = "default_process_std")]
    pub process_std: [f64; 3],
    #[serde(default = "default_landmark_std")]
    pub landmark_std: [f64; 2],
    #[serde(default = "default_sensor_range")]
    pub sensor_range: f64,
    /// Noise on the logged control input `[sigma_v (m/s), sigma_omega (rad/s)]`
    #[serde(default)]
    pub odometry_noise: [f64; 2],
    #[serde(default = "default_num_landmarks")]
    pub num_landmarks: usize,
    /// Landmarks are spread uniformly over `[-half_extent, half_extent]` on both axes
    #[serde(default = "default_map_half_extent")]
    pub map_half_extent: f64,
    #[serde(default)]
    pub resampling_strategy: ParticleResamplingStrategy,
    #[serde(default)]
    pub averaging_strategy: ParticleAveragingStrategy,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            num_particles: default_num_particles(),
            seed: default_seed(),
            steps: default_steps(),
            dt: default_dt(),
            velocity: default_velocity(),
            yaw_rate: default_yaw_rate(),
            initial_pose: default_initial_pose(),
            gps_std: default_gps_std(),
            process_std: default_process_std(),
            landmark_std: default_landmark_std(),
            sensor_range: default_sensor_range(),
            odometry_noise: [0.0, 0.0],
            num_landmarks: default_num_landmarks(),
            map_half_extent: default_map_half_extent(),
            resampling_strategy: ParticleResamplingStrategy::default(),
            averaging_strategy: ParticleAveragingStrategy::default(),
        }
    }
}

/// On-disk encodings accepted for a [`SimulationConfig`], picked from the file extension.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Yaml,
    Toml,
}
impl ConfigFormat {
    /// `.json`, `.yaml`/`.yml` or `.toml`, case-insensitive
    pub fn from_path(path: &Path) -> io::Result<Self> {
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_ascii_lowercase());
        match ext.as_deref() {
            Some("json") => Ok(ConfigFormat::Json),
            Some("yaml") | Some("yml") => Ok(ConfigFormat::Yaml),
            Some("toml") => Ok(ConfigFormat::Toml),
            _ => Err(invalid_input(format!(
                "unsupported config extension for '{}', expected .json, .yaml, .yml or .toml",
                path.display()
            ))),
        }
    }
}

fn invalid_input(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, message)
}

fn check_non_negative(field: &str, values: &[f64]) -> io::Result<()> {
    if values.iter().all(|v| v.is_finite() && *v >= 0.0) {
        Ok(())
    } else {
        Err(invalid_input(format!(
            "{} must be finite and non-negative, got {:?}",
            field, values
        )))
    }
}

impl SimulationConfig {
    /// Encode the configuration as text in the given format.
    pub fn to_string_as(&self, format: ConfigFormat) -> io::Result<String> {
        match format {
            ConfigFormat::Json => serde_json::to_string_pretty(self).map_err(io::Error::other),
            ConfigFormat::Yaml => serde_yaml::to_string(self).map_err(io::Error::other),
            ConfigFormat::Toml => toml::to_string(self).map_err(io::Error::other),
        }
    }

    /// Decode a configuration from text. Missing fields take their defaults; the result is
    /// not validated.
    pub fn from_str_as(text: &str, format: ConfigFormat) -> io::Result<Self> {
        match format {
            ConfigFormat::Json => serde_json::from_str(text).map_err(io::Error::other),
            ConfigFormat::Yaml => serde_yaml::from_str(text).map_err(io::Error::other),
            ConfigFormat::Toml => toml::from_str(text).map_err(io::Error::other),
        }
    }

    /// Write the configuration, choosing the format from the extension of `path`.
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let path = path.as_ref();
        let text = self.to_string_as(ConfigFormat::from_path(path)?)?;
        fs::write(path, text)
    }

    /// Read and validate a configuration, choosing the format from the extension of `path`.
    pub fn from_file<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref();
        let format = ConfigFormat::from_path(path)?;
        let config = Self::from_str_as(&fs::read_to_string(path)?, format)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every parameter the filter and the scenario generator rely on.
    ///
    /// Errors are `io::ErrorKind::InvalidInput` naming the offending field.
    pub fn validate(&self) -> io::Result<()> {
        if self.num_particles == 0 {
            return Err(invalid_input("num_particles must be positive".to_string()));
        }
        if !(self.dt.is_finite() && self.dt > 0.0) {
            return Err(invalid_input(format!(
                "dt must be finite and positive, got {}",
                self.dt
            )));
        }
        if !self.landmark_std.iter().all(|s| s.is_finite() && *s > 0.0) {
            return Err(invalid_input(format!(
                "landmark_std must be finite and positive, got {:?}",
                self.landmark_std
            )));
        }
        check_non_negative("gps_std", &self.gps_std)?;
        check_non_negative("process_std", &self.process_std)?;
        check_non_negative("odometry_noise", &self.odometry_noise)?;
        check_non_negative("map_half_extent", &[self.map_half_extent])?;
        check_non_negative("sensor_range", &[self.sensor_range])?;
        let finite = [self.velocity, self.yaw_rate]
            .iter()
            .chain(self.initial_pose.iter())
            .all(|v| v.is_finite());
        if !finite {
            return Err(invalid_input(
                "velocity, yaw_rate and initial_pose must be finite".to_string(),
            ));
        }
        Ok(())
    }

    pub fn initial_pose(&self) -> Pose2D {
        Pose2D::new(self.initial_pose[0], self.initial_pose[1], self.initial_pose[2])
    }
    pub fn control(&self) -> ControlInput {
        ControlInput::new(self.velocity, self.yaw_rate)
    }
}

/// Scatter `num_landmarks` landmarks uniformly over a square centred on the origin.
///
/// Landmark ids run from 1 to `num_landmarks`.
pub fn generate_map<R: Rng + ?Sized>(num_landmarks: usize, half_extent: f64, rng: &mut R) -> Map {
    (1..=num_landmarks)
        .map(|id| {
            let x = rng.random_range(-half_extent..=half_extent);
            let y = rng.random_range(-half_extent..=half_extent);
            MapLandmark::new(id as i32, x as f32, y as f32)
        })
        .collect()
}

/// Noisy vehicle-frame detections of every landmark within `sensor_range` of `truth`.
///
/// The range check is circular, unlike the filter's square gating window. Detections are
/// returned unlabelled.
pub fn simulate_observations<R: Rng + ?Sized>(
    truth: &Pose2D,
    map: &Map,
    sensor_range: f64,
    std_landmark: &Vector2<f64>,
    rng: &mut R,
) -> Vec<LandmarkObs> {
    let mut observations = Vec::new();
    for lm in &map.landmark_list {
        let (lx, ly) = (lm.x as f64, lm.y as f64);
        if dist(truth.x, truth.y, lx, ly) > sensor_range {
            continue;
        }
        let (xo, yo) = map_to_vehicle(truth.x, truth.y, truth.theta, lx, ly);
        let nx: f64 = StandardNormal.sample(&mut *rng);
        let ny: f64 = StandardNormal.sample(&mut *rng);
        observations.push(LandmarkObs::new(
            xo + std_landmark[0] * nx,
            yo + std_landmark[1] * ny,
        ));
    }
    observations
}

/// Absolute per-axis error between a ground-truth pose and an estimate.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PoseError {
    pub x: f64,
    pub y: f64,
    /// Heading error wrapped to `[0, pi]`
    pub yaw: f64,
}

pub fn pose_error(truth: &Pose2D, estimate: &Pose2D) -> PoseError {
    PoseError {
        x: (truth.x - estimate.x).abs(),
        y: (truth.y - estimate.y).abs(),
        yaw: wrap_to_pi(truth.theta - estimate.theta).abs(),
    }
}

/// One row of simulation output.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NavigationResult {
    pub step: usize,
    /// Simulation time (s)
    pub time: f64,
    pub true_x: f64,
    pub true_y: f64,
    pub true_theta: f64,
    pub est_x: f64,
    pub est_y: f64,
    pub est_theta: f64,
    pub error_x: f64,
    pub error_y: f64,
    pub error_yaw: f64,
    pub num_observations: usize,
    pub effective_sample_size: f64,
    pub best_weight: f64,
    /// Landmark ids matched by the best particle, space separated
    pub associations: String,
}

impl NavigationResult {
    /// Write a run to a CSV file with a header row.
    pub fn to_csv<P: AsRef<Path>>(results: &[Self], path: P) -> io::Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        for result in results {
            writer.serialize(result)?;
        }
        writer.flush()?;
        Ok(())
    }
    /// Read a run previously written by [`NavigationResult::to_csv`].
    pub fn from_csv<P: AsRef<Path>>(path: P) -> io::Result<Vec<Self>> {
        let mut reader = csv::Reader::from_path(path)?;
        let mut results = Vec::new();
        for record in reader.deserialize() {
            results.push(record?);
        }
        Ok(results)
    }
}

/// Mean and maximum errors over a run.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RunSummary {
    pub steps: usize,
    pub mean_error: PoseError,
    pub max_error: PoseError,
}

pub fn summarize(results: &[NavigationResult]) -> RunSummary {
    let mut summary = RunSummary {
        steps: results.len(),
        ..Default::default()
    };
    if results.is_empty() {
        return summary;
    }
    let n = results.len() as f64;
    for r in results {
        summary.mean_error.x += r.error_x / n;
        summary.mean_error.y += r.error_y / n;
        summary.mean_error.yaw += r.error_yaw / n;
        summary.max_error.x = summary.max_error.x.max(r.error_x);
        summary.max_error.y = summary.max_error.y.max(r.error_y);
        summary.max_error.yaw = summary.max_error.yaw.max(r.error_yaw);
    }
    summary
}

/// Run the filter in closed loop against a synthetic world described by `config`.
///
/// The world (map, initial GPS fix, control noise, observations) is drawn from its own stream
/// so that changing filter settings does not change the scenario.
///
/// # Panics
///
/// On parameters rejected by [`SimulationConfig::validate`]; configurations loaded with
/// [`SimulationConfig::from_file`] are already validated.
pub fn run_simulation(config: &SimulationConfig) -> Vec<NavigationResult> {
    let mut world_rng = StdRng::seed_from_u64(config.seed ^ 0x5eed_0f_3a9);
    let map = generate_map(config.num_landmarks, config.map_half_extent, &mut world_rng);
    let gps_std = Vector3::from(config.gps_std);
    let std_landmark = Vector2::from(config.landmark_std);
    let control = config.control();

    let mut truth = config.initial_pose();
    let gps = sample_pose(&truth, &gps_std, &mut world_rng);

    let mut pf = ParticleFilter::new_with_seed(config.num_particles, config.seed)
        .with_process_noise(Vector3::from(config.process_std))
        .with_strategies(config.resampling_strategy, config.averaging_strategy);
    pf.init(gps.x, gps.y, gps.theta, &gps_std);
    info!(
        "Running {} steps with {} particles over {} landmarks",
        config.steps,
        config.num_particles,
        map.len()
    );

    let mut results = Vec::with_capacity(config.steps);
    for step in 0..config.steps {
        truth = propagate(&truth, &control, config.dt);
        let nv: f64 = StandardNormal.sample(&mut world_rng);
        let nw: f64 = StandardNormal.sample(&mut world_rng);
        let logged = ControlInput::new(
            control.velocity + config.odometry_noise[0] * nv,
            control.yaw_rate + config.odometry_noise[1] * nw,
        );
        pf.predict(&logged, config.dt);

        let observations = simulate_observations(
            &truth,
            &map,
            config.sensor_range,
            &std_landmark,
            &mut world_rng,
        );
        let measurement = LandmarkMeasurement::new(
            observations,
            config.sensor_range,
            std_landmark,
            &map,
        );
        pf.update(&measurement);

        let best = pf.annotate_best(config.sensor_range, &measurement.observations, &map);
        let estimate = Pose2D::from(&pf.get_estimate());
        let error = pose_error(&truth, &estimate);
        let (best_weight, associations) = match best {
            Some(i) => {
                let particle = &pf.particles()[i];
                (particle.weight, particle.get_associations())
            }
            None => (0.0, String::new()),
        };
        if let Some(i) = best {
            debug!(
                "Step {}: best particle {} sense_x [{}] sense_y [{}]",
                step,
                pf.particles()[i].id,
                pf.particles()[i].get_sense_coord(SenseAxis::X),
                pf.particles()[i].get_sense_coord(SenseAxis::Y)
            );
        }
        results.push(NavigationResult {
            step,
            time: (step + 1) as f64 * config.dt,
            true_x: truth.x,
            true_y: truth.y,
            true_theta: truth.theta,
            est_x: estimate.x,
            est_y: estimate.y,
            est_theta: estimate.theta,
            error_x: error.x,
            error_y: error.y,
            error_yaw: error.yaw,
            num_observations: measurement.observations.len(),
            effective_sample_size: pf.effective_sample_size(),
            best_weight,
            associations,
        });

        pf.resample();
    }
    let summary = summarize(&results);
    info!(
        "Finished {} steps: mean error ({:.3} m, {:.3} m, {:.4} rad), max error ({:.3} m, {:.3} m, {:.4} rad)",
        summary.steps,
        summary.mean_error.x,
        summary.mean_error.y,
        summary.mean_error.yaw,
        summary.max_error.x,
        summary.max_error.y,
        summary.max_error.yaw
    );
    results
}
