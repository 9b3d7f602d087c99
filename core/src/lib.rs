//! Landmark particle filter toolbox for 2-D vehicle localization
//!
//! This crate implements a Sequential Monte Carlo (particle filter) estimator for the planar pose of a
//! vehicle, $(x, y, \theta)$, fused from noisy motion commands and noisy landmark detections against a
//! known map. The filter is implemented as a struct that is initialized once from a prior pose estimate
//! (typically GPS) and then cycled with new control inputs and observation sets. It does not read sensor
//! logs or map files; those are expected to be produced by the caller and handed over as the data types
//! defined here.
//!
//! This crate is primarily built off of three additional dependencies:
//! - [`nalgebra`](https://crates.io/crates/nalgebra): Provides the rigid transforms and the estimate/covariance containers.
//! - [`rand`](https://crates.io/crates/rand) and [`rand_distr`](https://crates.io/crates/rand_distr): Provides the seeded random stream used for every draw the filter makes.
//! - [`serde`](https://crates.io/crates/serde): Provides (de)serialization of simulation configuration and results.
//!
//! ## Crate overview
//!
//! - [geometry]: Euclidean distance, vehicle/map frame transforms and angle helpers.
//! - [map]: The read-only landmark map and the sensor-range gating used by the weight update.
//! - [measurements]: Landmark observations, nearest-neighbour data association and the measurement likelihood.
//! - [motion]: The bicycle (constant turn rate and velocity) motion model used for prediction.
//! - [particle]: The particle set and the particle filter itself.
//! - [sim]: Synthetic scenario generation and a closed-loop runner for testing filters.
//!
//! ## Filter cycle
//!
//! The filter runs a four-stage recursion. Initialization happens once, the other three run every step:
//!
//! 1. **Initialization**: each particle is drawn from $\mathcal{N}(\hat{x}_0, \sigma_0^2)$ independently per axis.
//! 2. **Prediction**: each particle is propagated through the motion model and perturbed by process noise.
//! 3. **Weight update**: observations are transformed into the map frame using the particle's own pose,
//!    associated with the nearest in-range landmark, and scored with a bivariate Gaussian.
//! 4. **Resampling**: a new particle set is drawn with replacement, proportional to weight.
//!
//! ### Motion model
//!
//! For a yaw rate $\omega$ that is not negligible the vehicle travels along an arc:
//!
//! $$
//! x(+) = x(-) + \frac{v}{\omega} \left( \sin(\theta + \omega t) - \sin\theta \right)
//! $$
//!
//! $$
//! y(+) = y(-) + \frac{v}{\omega} \left( \cos\theta - \cos(\theta + \omega t) \right)
//! $$
//!
//! $$
//! \theta(+) = \theta(-) + \omega t
//! $$
//!
//! When $|\omega| < 10^{-5}$ the straight-line limit is used instead to avoid the division.
//!
//! ### Measurement model
//!
//! An observation $(x_o, y_o)$ in the vehicle frame is moved into the map frame with the particle pose:
//!
//! $$
//! \begin{bmatrix} x_m \\\\ y_m \end{bmatrix} = \begin{bmatrix} x_p \\\\ y_p \end{bmatrix} + \begin{bmatrix} \cos\theta & -\sin\theta \\\\ \sin\theta & \cos\theta \end{bmatrix} \begin{bmatrix} x_o \\\\ y_o \end{bmatrix}
//! $$
//!
//! and, once matched to landmark $(\mu_x, \mu_y)$, contributes a factor of
//!
//! $$
//! p = \frac{1}{2 \pi \sigma_x \sigma_y} \exp\left( -\left( \frac{(x_m - \mu_x)^2}{2 \sigma_x^2} + \frac{(y_m - \mu_y)^2}{2 \sigma_y^2} \right) \right)
//! $$
//!
//! to the particle weight.
pub mod geometry;
pub mod map;
pub mod measurements;
pub mod motion;
pub mod particle;
pub mod sim;

use nalgebra::{DMatrix, DVector, Vector3};
use serde::{Deserialize, Serialize};

use std::fmt::{self, Display};

/// Planar vehicle pose in the map frame.
///
/// `theta` is in radians and is not required to be normalized; the motion model accumulates
/// heading without wrapping.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose2D {
    pub x: f64,
    pub y: f64,
    pub theta: f64,
}
impl Pose2D {
    pub fn new(x: f64, y: f64, theta: f64) -> Self {
        Pose2D { x, y, theta }
    }
    /// Pose as a state vector `[x, y, theta]`
    pub fn to_vector(&self) -> Vector3<f64> {
        Vector3::new(self.x, self.y, self.theta)
    }
}
impl From<Vector3<f64>> for Pose2D {
    fn from(v: Vector3<f64>) -> Self {
        Pose2D::new(v[0], v[1], v[2])
    }
}
impl From<&DVector<f64>> for Pose2D {
    fn from(v: &DVector<f64>) -> Self {
        assert!(v.len() >= 3, "Pose vector must have at least 3 elements");
        Pose2D::new(v[0], v[1], v[2])
    }
}
impl Display for Pose2D {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.4}, {:.4}, {:.4} rad)", self.x, self.y, self.theta)
    }
}

/// Commanded motion for one prediction step.
///
/// Control inputs are really just measurements that are used to propagate the state estimate
/// rather than to constrain error. Here they are the vehicle's linear velocity (m/s) and yaw
/// rate (rad/s) as logged by odometry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlInput {
    pub velocity: f64,
    pub yaw_rate: f64,
}
impl ControlInput {
    pub fn new(velocity: f64, yaw_rate: f64) -> Self {
        ControlInput { velocity, yaw_rate }
    }
}

/// Generic Bayesian navigation filter trait.
///
/// Provides the predict/update interface a simulation loop drives without knowing the filter's
/// internals. The estimate is the state vector `[x, y, theta]` and the certainty is its 3x3
/// covariance.
pub trait NavigationFilter {
    fn predict(&mut self, control_input: &ControlInput, dt: f64);
    fn update(&mut self, measurement: &measurements::LandmarkMeasurement<'_>);
    fn get_estimate(&self) -> DVector<f64>;
    fn get_certainty(&self) -> DMatrix<f64>;
}
