//! Planar geometry helpers shared by the motion and measurement models.
//!
//! Transforms are expressed with nalgebra's [`Isometry2`], i.e. a rotation by the vehicle
//! heading followed by a translation to the vehicle position.
use nalgebra::{Isometry2, Point2, Vector2};
use std::f64::consts::PI;

/// Euclidean distance between two points.
pub fn dist(x1: f64, y1: f64, x2: f64, y2: f64) -> f64 {
    ((x2 - x1).powi(2) + (y2 - y1).powi(2)).sqrt()
}

/// Rigid transform taking vehicle-frame coordinates into the map frame for a vehicle at
/// `(x, y)` with heading `theta`.
pub fn vehicle_to_map_isometry(x: f64, y: f64, theta: f64) -> Isometry2<f64> {
    Isometry2::new(Vector2::new(x, y), theta)
}

/// Transform a vehicle-frame point into the map frame.
///
/// ```
/// use landmark_pf::geometry::vehicle_to_map;
///
/// // Vehicle at (4, 5) facing -90 degrees sees a landmark 2 m ahead and 2 m to the left.
/// let (x, y) = vehicle_to_map(4.0, 5.0, -std::f64::consts::FRAC_PI_2, 2.0, 2.0);
/// assert!((x - 6.0).abs() < 1e-9);
/// assert!((y - 3.0).abs() < 1e-9);
/// ```
pub fn vehicle_to_map(x: f64, y: f64, theta: f64, x_obs: f64, y_obs: f64) -> (f64, f64) {
    let p = vehicle_to_map_isometry(x, y, theta) * Point2::new(x_obs, y_obs);
    (p.x, p.y)
}

/// Transform a map-frame point into the frame of a vehicle at `(x, y, theta)`.
pub fn map_to_vehicle(x: f64, y: f64, theta: f64, x_map: f64, y_map: f64) -> (f64, f64) {
    let p = vehicle_to_map_isometry(x, y, theta).inverse_transform_point(&Point2::new(x_map, y_map));
    (p.x, p.y)
}

/// Wrap an angle to `[-pi, pi)`.
pub fn wrap_to_pi(angle: f64) -> f64 {
    (angle + PI).rem_euclid(2.0 * PI) - PI
}
