//! Landmark observations and the measurement model used to weight particles.
//!
//! A [`LandmarkObs`] is used both for raw detections in the vehicle frame and for predicted
//! landmark positions in the map frame; which one it is follows from where it came from. Raw
//! detections carry no identity until [`data_association`] labels them.
use nalgebra::Vector2;
use std::f64::consts::PI;

use crate::Pose2D;
use crate::geometry::{dist, vehicle_to_map};
use crate::map::Map;

/// A landmark detection or predicted landmark position.
///
/// `id` is `None` for a raw detection and for a detection that could not be matched to any
/// landmark.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LandmarkObs {
    pub id: Option<i32>,
    pub x: f64,
    pub y: f64,
}
impl LandmarkObs {
    /// Unlabelled observation
    pub fn new(x: f64, y: f64) -> Self {
        LandmarkObs { id: None, x, y }
    }
    pub fn with_id(id: i32, x: f64, y: f64) -> Self {
        LandmarkObs { id: Some(id), x, y }
    }
    pub fn is_matched(&self) -> bool {
        self.id.is_some()
    }
}

/// One landmark measurement update: the raw observation set for this step together with the
/// sensor configuration and the map it is scored against.
#[derive(Clone, Debug)]
pub struct LandmarkMeasurement<'a> {
    /// Vehicle-frame detections, shared by every particle
    pub observations: Vec<LandmarkObs>,
    /// Half-width of the square landmark gating window (m)
    pub sensor_range: f64,
    /// Measurement noise standard deviations `[sigma_x, sigma_y]` (m)
    pub std_landmark: Vector2<f64>,
    pub map: &'a Map,
}
impl<'a> LandmarkMeasurement<'a> {
    pub fn new(
        observations: Vec<LandmarkObs>,
        sensor_range: f64,
        std_landmark: Vector2<f64>,
        map: &'a Map,
    ) -> Self {
        assert!(
            std_landmark[0] > 0.0 && std_landmark[1] > 0.0,
            "Landmark measurement standard deviations must be positive"
        );
        LandmarkMeasurement {
            observations,
            sensor_range,
            std_landmark,
            map,
        }
    }
}

/// Label each observation with the id of the nearest predicted landmark.
///
/// Positions are left untouched. Ties keep the first landmark encountered. When `predicted` is
/// empty every observation ends up unmatched (`id == None`).
pub fn data_association(predicted: &[LandmarkObs], observations: &mut [LandmarkObs]) {
    for obs in observations.iter_mut() {
        let mut min_dist = f64::MAX;
        let mut map_id = None;
        for pred in predicted {
            let current = dist(obs.x, obs.y, pred.x, pred.y);
            if current < min_dist {
                min_dist = current;
                map_id = pred.id;
            }
        }
        obs.id = map_id;
    }
}

/// Transform vehicle-frame observations into the map frame as seen from `pose`.
///
/// Ids are carried over unchanged.
pub fn transform_observations(pose: &Pose2D, observations: &[LandmarkObs]) -> Vec<LandmarkObs> {
    observations
        .iter()
        .map(|obs| {
            let (x_map, y_map) = vehicle_to_map(pose.x, pose.y, pose.theta, obs.x, obs.y);
            LandmarkObs {
                id: obs.id,
                x: x_map,
                y: y_map,
            }
        })
        .collect()
}

/// Bivariate Gaussian density with diagonal covariance evaluated at `(x, y)`.
pub fn bivariate_gaussian(x: f64, y: f64, mu_x: f64, mu_y: f64, sigma_x: f64, sigma_y: f64) -> f64 {
    let gauss_norm = 1.0 / (2.0 * PI * sigma_x * sigma_y);
    let exponent = (x - mu_x).powi(2) / (2.0 * sigma_x.powi(2))
        + (y - mu_y).powi(2) / (2.0 * sigma_y.powi(2));
    gauss_norm * (-exponent).exp()
}

/// Likelihood of a set of associated map-frame observations.
///
/// Product of per-observation densities against their matched landmark. Unmatched observations,
/// and ids that do not appear in `predicted`, contribute a neutral factor of 1.
pub fn observation_likelihood(
    predicted: &[LandmarkObs],
    associated: &[LandmarkObs],
    std_landmark: &Vector2<f64>,
) -> f64 {
    let mut weight = 1.0;
    for obs in associated {
        let Some(landmark_id) = obs.id else {
            continue;
        };
        if let Some(pred) = predicted.iter().find(|p| p.id == Some(landmark_id)) {
            weight *= bivariate_gaussian(
                obs.x,
                obs.y,
                pred.x,
                pred.y,
                std_landmark[0],
                std_landmark[1],
            );
        }
    }
    weight
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::MapLandmark;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_associates_nearest_landmark() {
        let predicted = vec![
            LandmarkObs::with_id(1, 5.0, 5.0),
            LandmarkObs::with_id(2, 0.0, 0.0),
        ];
        let mut observations = vec![LandmarkObs::new(0.1, 0.1)];
        data_association(&predicted, &mut observations);
        assert_eq!(observations[0].id, Some(2));
        // positions are untouched
        assert_eq!(observations[0].x, 0.1);
        assert_eq!(observations[0].y, 0.1);
    }

    #[test]
    fn test_association_tie_keeps_first() {
        let predicted = vec![
            LandmarkObs::with_id(10, 1.0, 0.0),
            LandmarkObs::with_id(11, -1.0, 0.0),
        ];
        let mut observations = vec![LandmarkObs::new(0.0, 0.0)];
        data_association(&predicted, &mut observations);
        assert_eq!(observations[0].id, Some(10));
    }

    #[test]
    fn test_association_with_no_candidates_is_unmatched() {
        let mut observations = vec![LandmarkObs::with_id(3, 1.0, 1.0), LandmarkObs::new(2.0, 2.0)];
        data_association(&[], &mut observations);
        assert!(observations.iter().all(|obs| !obs.is_matched()));
    }

    #[test]
    fn test_several_observations_share_a_landmark() {
        let predicted = vec![LandmarkObs::with_id(4, 10.0, 10.0)];
        let mut observations = vec![LandmarkObs::new(9.0, 9.0), LandmarkObs::new(-3.0, 2.0)];
        data_association(&predicted, &mut observations);
        assert_eq!(observations[0].id, Some(4));
        assert_eq!(observations[1].id, Some(4));
    }

    #[test]
    fn test_gaussian_peak_and_falloff() {
        let peak = bivariate_gaussian(1.0, 2.0, 1.0, 2.0, 0.3, 0.3);
        assert_approx_eq!(peak, 1.0 / (2.0 * PI * 0.09), 1e-12);
        let off = bivariate_gaussian(1.3, 2.0, 1.0, 2.0, 0.3, 0.3);
        assert_approx_eq!(off, peak * (-0.5_f64).exp(), 1e-12);
    }

    #[test]
    fn test_likelihood_skips_unmatched_observations() {
        let predicted = vec![LandmarkObs::with_id(1, 0.0, 0.0)];
        let associated = vec![LandmarkObs::with_id(1, 0.0, 0.0), LandmarkObs::new(50.0, 50.0)];
        let std = Vector2::new(0.3, 0.3);
        let w = observation_likelihood(&predicted, &associated, &std);
        assert_approx_eq!(w, bivariate_gaussian(0.0, 0.0, 0.0, 0.0, 0.3, 0.3), 1e-12);
        assert_eq!(observation_likelihood(&[], &[LandmarkObs::new(1.0, 1.0)], &std), 1.0);
    }

    #[test]
    fn test_transform_keeps_ids() {
        let pose = Pose2D::new(4.0, 5.0, -std::f64::consts::FRAC_PI_2);
        let obs = vec![LandmarkObs::new(2.0, 2.0), LandmarkObs::with_id(9, 0.0, 0.0)];
        let mapped = transform_observations(&pose, &obs);
        assert_approx_eq!(mapped[0].x, 6.0, 1e-9);
        assert_approx_eq!(mapped[0].y, 3.0, 1e-9);
        assert_eq!(mapped[0].id, None);
        assert_eq!(mapped[1].id, Some(9));
        assert_approx_eq!(mapped[1].x, 4.0, 1e-9);
    }

    #[test]
    #[should_panic(expected = "Landmark measurement standard deviations must be positive")]
    fn test_measurement_rejects_zero_noise() {
        let map = Map::new(vec![MapLandmark::new(1, 0.0, 0.0)]);
        let _ = LandmarkMeasurement::new(vec![], 50.0, Vector2::new(0.0, 0.3), &map);
    }
}
