//! Particle filter for landmark-based 2-D localization.
//!
//! The filter owns a fixed-size set of weighted pose hypotheses and a single seeded random
//! stream. Initialization, prediction and resampling all draw from that stream, so two filters
//! built with the same seed and fed the same inputs produce identical particle sets.
//!
//! # Usage
//!
//! ```rust
//! use landmark_pf::map::{Map, MapLandmark};
//! use landmark_pf::measurements::LandmarkObs;
//! use landmark_pf::particle::ParticleFilter;
//! use nalgebra::{Vector2, Vector3};
//!
//! let map = Map::new(vec![MapLandmark::new(1, 5.0, 0.0), MapLandmark::new(2, 0.0, 5.0)]);
//! let mut pf = ParticleFilter::new_with_seed(100, 42);
//! pf.init(0.0, 0.0, 0.0, &Vector3::new(0.3, 0.3, 0.01));
//!
//! pf.prediction(0.1, &Vector3::new(0.3, 0.3, 0.01), 1.0, 0.0);
//! let observations = vec![LandmarkObs::new(4.9, 0.0), LandmarkObs::new(-0.1, 5.0)];
//! pf.update_weights(50.0, &Vector2::new(0.3, 0.3), &observations, &map);
//! pf.resample();
//!
//! assert_eq!(pf.particles().len(), 100);
//! let best = pf.best_particle().expect("filter is initialized");
//! assert!(best.x.abs() < 2.0);
//! ```
use log::{debug, trace, warn};
use nalgebra::{DMatrix, DVector, Vector2, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug, Display};

use crate::geometry::wrap_to_pi;
use crate::map::Map;
use crate::measurements::{
    LandmarkMeasurement, LandmarkObs, data_association, observation_likelihood,
    transform_observations,
};
use crate::motion::{propagate_with_noise, sample_pose};
use crate::{ControlInput, NavigationFilter, Pose2D};

/// Particle count used by the reference configuration.
pub const DEFAULT_NUM_PARTICLES: usize = 100;

/// One weighted pose hypothesis.
///
/// `associations`, `sense_x` and `sense_y` are diagnostic payload attached through
/// [`Particle::set_associations`]; the filter itself never reads them.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Particle {
    /// Index of the particle this one was copied from at initialization
    pub id: usize,
    pub x: f64,
    pub y: f64,
    pub theta: f64,
    /// Unnormalized relative likelihood
    pub weight: f64,
    pub associations: Vec<i32>,
    pub sense_x: Vec<f64>,
    pub sense_y: Vec<f64>,
}
impl Display for Particle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Particle")
            .field("id", &self.id)
            .field("x", &self.x)
            .field("y", &self.y)
            .field("theta", &self.theta)
            .field("weight", &self.weight)
            .field("associations", &self.associations.len())
            .finish()
    }
}
impl Particle {
    pub fn new(id: usize, pose: Pose2D, weight: f64) -> Particle {
        Particle {
            id,
            x: pose.x,
            y: pose.y,
            theta: pose.theta,
            weight,
            ..Default::default()
        }
    }
    pub fn pose(&self) -> Pose2D {
        Pose2D::new(self.x, self.y, self.theta)
    }
    pub fn set_pose(&mut self, pose: Pose2D) {
        self.x = pose.x;
        self.y = pose.y;
        self.theta = pose.theta;
    }
    /// Attach association diagnostics. The three sequences are stored as given; keeping them
    /// the same length is up to the caller.
    pub fn set_associations(&mut self, associations: Vec<i32>, sense_x: Vec<f64>, sense_y: Vec<f64>) {
        self.associations = associations;
        self.sense_x = sense_x;
        self.sense_y = sense_y;
    }
    /// Associated landmark ids as space-separated text
    pub fn get_associations(&self) -> String {
        join_tokens(&self.associations)
    }
    /// Map-frame coordinates of the associated landmarks along `axis` as space-separated text.
    ///
    /// Values are printed with six significant digits, switching to exponent notation for very
    /// large or small magnitudes (`10.1235`, `1e-07`).
    pub fn get_sense_coord(&self, axis: SenseAxis) -> String {
        let values = match axis {
            SenseAxis::X => &self.sense_x,
            SenseAxis::Y => &self.sense_y,
        };
        let tokens: Vec<SignificantDigits> = values.iter().map(|v| SignificantDigits(*v)).collect();
        join_tokens(&tokens)
    }
}

/// Coordinate selector for [`Particle::get_sense_coord`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SenseAxis {
    X,
    Y,
}

/// Shortest rendering of a value with [`SignificantDigits::PRECISION`] significant digits.
struct SignificantDigits(f64);

impl SignificantDigits {
    const PRECISION: i32 = 6;
}

impl Display for SignificantDigits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = self.0;
        if value == 0.0 || !value.is_finite() {
            return write!(f, "{}", if value == 0.0 { 0.0 } else { value });
        }
        // Rounding to the target precision decides the exponent, e.g. 999999.7 -> 1e+06.
        let scientific = format!("{:.*e}", (Self::PRECISION - 1) as usize, value);
        let Some((mantissa, exponent)) = scientific.split_once('e') else {
            return write!(f, "{}", value);
        };
        let exponent: i32 = exponent.parse().map_err(|_| fmt::Error)?;
        if exponent < -4 || exponent >= Self::PRECISION {
            let sign = if exponent < 0 { '-' } else { '+' };
            write!(
                f,
                "{}e{}{:02}",
                trim_fraction(mantissa),
                sign,
                exponent.abs()
            )
        } else {
            let decimals = (Self::PRECISION - 1 - exponent) as usize;
            write!(f, "{}", trim_fraction(&format!("{:.*}", decimals, value)))
        }
    }
}

/// Drop trailing zeros after the decimal point, and the point itself if nothing is left.
fn trim_fraction(text: &str) -> &str {
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.')
    } else {
        text
    }
}

fn join_tokens<T: Display>(values: &[T]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

/// How the particle set is collapsed into a single state estimate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[serde(rename_all = "snake_case")]
pub enum ParticleAveragingStrategy {
    #[default]
    HighestWeight,
    WeightedAverage,
    UnweightedAverage,
}

/// Resampling scheme used by [`ParticleFilter::resample`].
///
/// Every strategy draws `n` particles with replacement with probability proportional to weight
/// and only differs in how the draws are correlated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[serde(rename_all = "snake_case")]
pub enum ParticleResamplingStrategy {
    /// Resampling wheel: random start index, cumulative random steps in `[0, 2 * max_weight)`
    #[default]
    Wheel,
    Systematic,
    Stratified,
    Multinomial,
    Residual,
}
impl ParticleResamplingStrategy {
    /// Indices of the particles to copy into the next generation.
    pub fn resample_indices<R: Rng + ?Sized>(&self, weights: &[f64], rng: &mut R) -> Vec<usize> {
        match self {
            ParticleResamplingStrategy::Wheel => wheel_resample(weights, rng),
            ParticleResamplingStrategy::Systematic => systematic_resample(weights, rng),
            ParticleResamplingStrategy::Stratified => stratified_resample(weights, rng),
            ParticleResamplingStrategy::Multinomial => multinomial_resample(weights, rng),
            ParticleResamplingStrategy::Residual => residual_resample(weights, rng),
        }
    }
}

/// Resampling wheel over unnormalized weights.
pub fn wheel_resample<R: Rng + ?Sized>(weights: &[f64], rng: &mut R) -> Vec<usize> {
    let n = weights.len();
    if n == 0 {
        return Vec::new();
    }
    let max_weight = weights.iter().cloned().fold(0.0, f64::max);
    let mut index = rng.random_range(0..n);
    let mut beta = 0.0;
    let mut indices = Vec::with_capacity(n);
    for _ in 0..n {
        beta += rng.random::<f64>() * 2.0 * max_weight;
        while beta > weights[index] {
            beta -= weights[index];
            index = (index + 1) % n;
        }
        indices.push(index);
    }
    indices
}

/// Cumulative normalized weights, or `None` when the weights cannot be normalized.
fn normalized_cumsum(weights: &[f64]) -> Option<Vec<f64>> {
    let total: f64 = weights.iter().sum();
    if !(total > 0.0 && total.is_finite()) {
        return None;
    }
    let mut acc = 0.0;
    Some(
        weights
            .iter()
            .map(|w| {
                acc += w / total;
                acc
            })
            .collect(),
    )
}

/// Walk sorted positions in `[0, 1)` along the cumulative weights.
///
/// Particle `i` owns the half-open interval `[cumsum[i - 1], cumsum[i])`, so a zero-weight
/// particle is never selected, even at position 0.
fn select_by_positions(cumsum: &[f64], positions: impl Iterator<Item = f64>) -> Vec<usize> {
    let last = cumsum.len() - 1;
    let mut i = 0;
    positions
        .map(|u| {
            while i < last && u >= cumsum[i] {
                i += 1;
            }
            i
        })
        .collect()
}

pub fn systematic_resample<R: Rng + ?Sized>(weights: &[f64], rng: &mut R) -> Vec<usize> {
    let n = weights.len();
    let Some(cumsum) = normalized_cumsum(weights) else {
        return (0..n).collect();
    };
    let step = 1.0 / n as f64;
    let u0 = rng.random::<f64>() * step;
    select_by_positions(&cumsum, (0..n).map(|i| u0 + i as f64 * step))
}

pub fn stratified_resample<R: Rng + ?Sized>(weights: &[f64], rng: &mut R) -> Vec<usize> {
    let n = weights.len();
    let Some(cumsum) = normalized_cumsum(weights) else {
        return (0..n).collect();
    };
    let positions: Vec<f64> = (0..n)
        .map(|i| (i as f64 + rng.random::<f64>()) / n as f64)
        .collect();
    select_by_positions(&cumsum, positions.into_iter())
}

pub fn multinomial_resample<R: Rng + ?Sized>(weights: &[f64], rng: &mut R) -> Vec<usize> {
    let n = weights.len();
    let Some(cumsum) = normalized_cumsum(weights) else {
        return (0..n).collect();
    };
    (0..n)
        .map(|_| {
            let u = rng.random::<f64>();
            cumsum.partition_point(|&c| c <= u).min(n - 1)
        })
        .collect()
}

pub fn residual_resample<R: Rng + ?Sized>(weights: &[f64], rng: &mut R) -> Vec<usize> {
    let n = weights.len();
    let total: f64 = weights.iter().sum();
    if !(total > 0.0 && total.is_finite()) {
        return (0..n).collect();
    }
    let mut indices = Vec::with_capacity(n);
    let mut residual = vec![0.0; n];
    for (i, &w) in weights.iter().enumerate() {
        let expected = w / total * n as f64;
        let copies = expected.floor() as usize;
        indices.extend(std::iter::repeat_n(i, copies));
        residual[i] = expected - copies as f64;
    }
    let remaining = n.saturating_sub(indices.len());
    if remaining > 0 {
        let Some(cumsum) = normalized_cumsum(&residual) else {
            indices.resize(n, indices.last().copied().unwrap_or(0));
            return indices;
        };
        let step = 1.0 / remaining as f64;
        let u0 = rng.random::<f64>() * step;
        indices.extend(select_by_positions(
            &cumsum,
            (0..remaining).map(|j| u0 + j as f64 * step),
        ));
    }
    indices.truncate(n);
    indices
}

/// Sequential Monte Carlo estimator for a planar vehicle pose.
#[derive(Clone)]
pub struct ParticleFilter {
    num_particles: usize,
    particles: Vec<Particle>,
    is_initialized: bool,
    /// Process noise `[sigma_x, sigma_y, sigma_theta]` used by [`NavigationFilter::predict`]
    pub process_noise_std: Vector3<f64>,
    pub averaging_strategy: ParticleAveragingStrategy,
    pub resampling_strategy: ParticleResamplingStrategy,
    rng: StdRng,
}
impl Debug for ParticleFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (min_weight, max_weight) = self.weight_range();
        let mean = self.get_estimate();
        f.debug_struct("ParticleFilter")
            .field("num_particles", &self.num_particles)
            .field("is_initialized", &self.is_initialized)
            .field("effective_particles", &self.effective_sample_size())
            .field(
                "weight_range",
                &format_args!("[{:.4e}, {:.4e}]", min_weight, max_weight),
            )
            .field(
                "estimate",
                &format_args!("({:.4}, {:.4}, {:.4} rad)", mean[0], mean[1], mean[2]),
            )
            .finish()
    }
}
impl ParticleFilter {
    /// Create an uninitialized filter seeded from the thread-local generator.
    pub fn new(num_particles: usize) -> Self {
        Self::new_with_seed(num_particles, rand::random())
    }

    /// Create an uninitialized filter with a specific random seed.
    ///
    /// This is useful for reproducible tests.
    pub fn new_with_seed(num_particles: usize, seed: u64) -> Self {
        assert!(num_particles > 0, "Number of particles must be positive");
        ParticleFilter {
            num_particles,
            particles: Vec::with_capacity(num_particles),
            is_initialized: false,
            process_noise_std: Vector3::zeros(),
            averaging_strategy: ParticleAveragingStrategy::default(),
            resampling_strategy: ParticleResamplingStrategy::default(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn with_process_noise(mut self, process_noise_std: Vector3<f64>) -> Self {
        assert_non_negative(&process_noise_std);
        self.process_noise_std = process_noise_std;
        self
    }

    pub fn with_strategies(
        mut self,
        resampling_strategy: ParticleResamplingStrategy,
        averaging_strategy: ParticleAveragingStrategy,
    ) -> Self {
        self.resampling_strategy = resampling_strategy;
        self.averaging_strategy = averaging_strategy;
        self
    }

    /// Seed the particle set around an initial pose estimate.
    ///
    /// Each of `x`, `y`, `theta` is drawn independently from a Gaussian centred on the estimate
    /// with the matching entry of `std` as standard deviation. Weights start at 1 and ids at
    /// the particle's index. Any previous particle set is discarded.
    pub fn init(&mut self, x: f64, y: f64, theta: f64, std: &Vector3<f64>) {
        assert_non_negative(std);
        let mean = Pose2D::new(x, y, theta);
        let mut particles = Vec::with_capacity(self.num_particles);
        for i in 0..self.num_particles {
            particles.push(Particle::new(i, sample_pose(&mean, std, &mut self.rng), 1.0));
        }
        self.particles = particles;
        self.is_initialized = true;
        debug!(
            "Initialized {} particles around {} with std {:?}",
            self.num_particles,
            mean,
            std.as_slice()
        );
    }

    pub fn is_initialized(&self) -> bool {
        self.is_initialized
    }

    pub fn num_particles(&self) -> usize {
        self.num_particles
    }

    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    pub fn particles_mut(&mut self) -> &mut [Particle] {
        &mut self.particles
    }

    /// Propagate every particle through the motion model and add process noise.
    ///
    /// # Arguments
    ///
    /// * `delta_t` - Elapsed time in seconds
    /// * `std_pos` - Process noise standard deviations `[sigma_x, sigma_y, sigma_theta]`
    /// * `velocity` - Commanded linear velocity (m/s)
    /// * `yaw_rate` - Commanded yaw rate (rad/s)
    pub fn prediction(&mut self, delta_t: f64, std_pos: &Vector3<f64>, velocity: f64, yaw_rate: f64) {
        assert!(delta_t > 0.0, "Time step must be positive");
        let control = ControlInput::new(velocity, yaw_rate);
        for particle in self.particles.iter_mut() {
            let pose =
                propagate_with_noise(&particle.pose(), &control, delta_t, std_pos, &mut self.rng);
            particle.set_pose(pose);
        }
        trace!(
            "Predicted {} particles over {} s (v = {}, yaw rate = {})",
            self.particles.len(),
            delta_t,
            velocity,
            yaw_rate
        );
    }

    /// Recompute every particle's weight from the current observation set.
    ///
    /// For each particle the landmarks inside the square gating window are the association
    /// candidates, the vehicle-frame observations are moved into the map frame using the
    /// particle's pose, associated with their nearest candidate, and scored with a bivariate
    /// Gaussian. Weights are left unnormalized. A particle with no candidates keeps weight 1.
    pub fn update_weights(
        &mut self,
        sensor_range: f64,
        std_landmark: &Vector2<f64>,
        observations: &[LandmarkObs],
        map: &Map,
    ) {
        for particle in self.particles.iter_mut() {
            let predicted = map.landmarks_in_range(particle.x, particle.y, sensor_range);
            let mut map_observations = transform_observations(&particle.pose(), observations);
            data_association(&predicted, &mut map_observations);
            particle.weight = observation_likelihood(&predicted, &map_observations, std_landmark);
        }
        let (min_weight, max_weight) = self.weight_range();
        debug!(
            "Updated weights from {} observations: range [{:.4e}, {:.4e}]",
            observations.len(),
            min_weight,
            max_weight
        );
        if max_weight <= 0.0 {
            warn!("All particle weights are zero after the measurement update");
        }
    }

    /// Draw a new particle set with replacement, proportional to weight.
    ///
    /// The previous generation is replaced wholesale. Copies keep the id and weight of the
    /// particle they were drawn from.
    pub fn resample(&mut self) {
        let weights = self.weights();
        let indices = self
            .resampling_strategy
            .resample_indices(&weights, &mut self.rng);
        let resampled: Vec<Particle> = indices.iter().map(|&i| self.particles[i].clone()).collect();
        self.particles = resampled;
        trace!("Resampled {} particles", self.particles.len());
    }

    /// Resample only when the effective sample size drops below `threshold_ratio * N`.
    ///
    /// Returns true if resampling was performed.
    pub fn resample_if_needed(&mut self, threshold_ratio: f64) -> bool {
        let n_eff = self.effective_sample_size();
        if n_eff < threshold_ratio * self.num_particles as f64 {
            self.resample();
            true
        } else {
            false
        }
    }

    pub fn weights(&self) -> Vec<f64> {
        self.particles.iter().map(|p| p.weight).collect()
    }

    pub fn set_weights(&mut self, weights: &[f64]) {
        assert_eq!(weights.len(), self.particles.len());
        for (particle, &w) in self.particles.iter_mut().zip(weights.iter()) {
            particle.weight = w;
        }
    }

    /// Scale weights to sum to one, falling back to uniform weights when that is impossible.
    pub fn normalize_weights(&mut self) {
        let sum: f64 = self.particles.iter().map(|p| p.weight).sum();
        if sum > 0.0 && sum.is_finite() {
            for particle in &mut self.particles {
                particle.weight /= sum;
            }
        } else {
            let uniform = 1.0 / self.particles.len() as f64;
            for particle in &mut self.particles {
                particle.weight = uniform;
            }
        }
    }

    /// N_eff = (sum w)^2 / sum(w^2), i.e. 1 / sum(w_i^2) on normalized weights
    pub fn effective_sample_size(&self) -> f64 {
        let sum: f64 = self.particles.iter().map(|p| p.weight).sum();
        let sum_of_squares: f64 = self.particles.iter().map(|p| p.weight * p.weight).sum();
        if sum_of_squares > 0.0 {
            sum * sum / sum_of_squares
        } else {
            0.0
        }
    }

    fn weight_range(&self) -> (f64, f64) {
        self.particles
            .iter()
            .map(|p| p.weight)
            .fold((f64::INFINITY, 0.0), |(lo, hi), w| (lo.min(w), hi.max(w)))
    }

    /// Index of the highest-weight particle; the first one wins ties.
    pub fn best_index(&self) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for (i, p) in self.particles.iter().enumerate() {
            if best.is_none_or(|(_, w)| p.weight > w) {
                best = Some((i, p.weight));
            }
        }
        best.map(|(i, _)| i)
    }

    pub fn best_particle(&self) -> Option<&Particle> {
        self.best_index().map(|i| &self.particles[i])
    }

    /// Attach the best particle's current landmark associations as diagnostics.
    ///
    /// Repeats the gating, transform and association of [`Self::update_weights`] for the
    /// highest-weight particle and stores the matched landmark ids with the map-frame
    /// coordinates of the observations. Returns the annotated particle's index.
    pub fn annotate_best(
        &mut self,
        sensor_range: f64,
        observations: &[LandmarkObs],
        map: &Map,
    ) -> Option<usize> {
        let index = self.best_index()?;
        let particle = &mut self.particles[index];
        let predicted = map.landmarks_in_range(particle.x, particle.y, sensor_range);
        let mut map_observations = transform_observations(&particle.pose(), observations);
        data_association(&predicted, &mut map_observations);
        let matched: Vec<&LandmarkObs> = map_observations.iter().filter(|o| o.is_matched()).collect();
        particle.set_associations(
            matched.iter().filter_map(|o| o.id).collect(),
            matched.iter().map(|o| o.x).collect(),
            matched.iter().map(|o| o.y).collect(),
        );
        Some(index)
    }

    fn weighted_average_state(&self, uniform: bool) -> (DVector<f64>, DMatrix<f64>) {
        let mut mean = DVector::<f64>::zeros(3);
        let mut cov = DMatrix::<f64>::zeros(3, 3);
        let total: f64 = self.particles.iter().map(|p| p.weight).sum();
        let use_uniform = uniform || !(total > 0.0 && total.is_finite());
        let n = self.particles.len() as f64;
        if self.particles.is_empty() {
            return (mean, cov);
        }
        let weight_of = |p: &Particle| if use_uniform { 1.0 / n } else { p.weight / total };
        let (mut sin_sum, mut cos_sum) = (0.0, 0.0);
        for p in &self.particles {
            let w = weight_of(p);
            mean[0] += w * p.x;
            mean[1] += w * p.y;
            sin_sum += w * p.theta.sin();
            cos_sum += w * p.theta.cos();
        }
        mean[2] = sin_sum.atan2(cos_sum);
        for p in &self.particles {
            let diff = DVector::from_vec(vec![
                p.x - mean[0],
                p.y - mean[1],
                wrap_to_pi(p.theta - mean[2]),
            ]);
            cov += weight_of(p) * &diff * &diff.transpose();
        }
        (mean, cov)
    }

    fn highest_weight_state(&self) -> (DVector<f64>, DMatrix<f64>) {
        let mean = match self.best_particle() {
            Some(best) => DVector::from_vec(vec![best.x, best.y, best.theta]),
            None => DVector::zeros(3),
        };
        (mean, DMatrix::zeros(3, 3))
    }

    fn state_and_covariance(&self) -> (DVector<f64>, DMatrix<f64>) {
        match self.averaging_strategy {
            ParticleAveragingStrategy::HighestWeight => self.highest_weight_state(),
            ParticleAveragingStrategy::WeightedAverage => self.weighted_average_state(false),
            ParticleAveragingStrategy::UnweightedAverage => self.weighted_average_state(true),
        }
    }
}
impl NavigationFilter for ParticleFilter {
    fn predict(&mut self, control_input: &ControlInput, dt: f64) {
        let std_pos = self.process_noise_std;
        self.prediction(dt, &std_pos, control_input.velocity, control_input.yaw_rate);
    }
    fn update(&mut self, measurement: &LandmarkMeasurement<'_>) {
        self.update_weights(
            measurement.sensor_range,
            &measurement.std_landmark,
            &measurement.observations,
            measurement.map,
        );
    }
    fn get_estimate(&self) -> DVector<f64> {
        self.state_and_covariance().0
    }
    fn get_certainty(&self) -> DMatrix<f64> {
        self.state_and_covariance().1
    }
}

fn assert_non_negative(std: &Vector3<f64>) {
    assert!(
        std.iter().all(|s| *s >= 0.0),
        "Standard deviations must be non-negative"
    );
}
