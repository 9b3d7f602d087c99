//! End-to-end checks of the particle filter cycle through the public API.
//!
//! These drive `init`, `prediction`, `update_weights` and `resample` on small hand-built maps
//! so that expected poses and weights can be computed in closed form.
use assert_approx_eq::assert_approx_eq;
use nalgebra::{Vector2, Vector3};
use std::f64::consts::{FRAC_PI_2, FRAC_PI_4};

use landmark_pf::map::{Map, MapLandmark};
use landmark_pf::measurements::{LandmarkMeasurement, LandmarkObs, bivariate_gaussian};
use landmark_pf::particle::{ParticleFilter, ParticleResamplingStrategy, SenseAxis};
use landmark_pf::{ControlInput, NavigationFilter, Pose2D};

fn square_map() -> Map {
    Map::new(vec![
        MapLandmark::new(1, 10.0, 0.0),
        MapLandmark::new(2, 0.0, 10.0),
        MapLandmark::new(3, -10.0, 0.0),
        MapLandmark::new(4, 0.0, -10.0),
    ])
}

const ALL_STRATEGIES: [ParticleResamplingStrategy; 5] = [
    ParticleResamplingStrategy::Wheel,
    ParticleResamplingStrategy::Systematic,
    ParticleResamplingStrategy::Stratified,
    ParticleResamplingStrategy::Multinomial,
    ParticleResamplingStrategy::Residual,
];

#[test]
fn test_particle_count_is_preserved_through_cycles() {
    let map = square_map();
    let std_landmark = Vector2::new(0.3, 0.3);
    for strategy in ALL_STRATEGIES {
        let mut pf = ParticleFilter::new_with_seed(64, 3).with_strategies(strategy, Default::default());
        pf.init(0.0, 0.0, 0.0, &Vector3::new(0.3, 0.3, 0.01));
        assert_eq!(pf.particles().len(), 64);
        for _ in 0..10 {
            pf.prediction(0.1, &Vector3::new(0.3, 0.3, 0.01), 1.0, 0.1);
            assert_eq!(pf.particles().len(), 64);
            let observations = vec![LandmarkObs::new(10.0, 0.0), LandmarkObs::new(0.0, 10.0)];
            pf.update_weights(50.0, &std_landmark, &observations, &map);
            assert_eq!(pf.particles().len(), 64);
            assert!(pf.particles().iter().all(|p| p.weight >= 0.0));
            pf.resample();
            assert_eq!(pf.particles().len(), pf.num_particles(), "{:?}", strategy);
        }
    }
}

#[test]
fn test_noiseless_straight_prediction_is_exact() {
    let mut pf = ParticleFilter::new_with_seed(10, 0);
    pf.init(0.0, 0.0, 0.0, &Vector3::zeros());
    pf.prediction(1.0, &Vector3::zeros(), 2.0, 0.0);
    for p in pf.particles() {
        assert_approx_eq!(p.x, 2.0, 1e-12);
        assert_approx_eq!(p.y, 0.0, 1e-12);
        assert_approx_eq!(p.theta, 0.0, 1e-12);
    }
}

#[test]
fn test_noiseless_curved_prediction_matches_arc() {
    let mut pf = ParticleFilter::new_with_seed(10, 0);
    pf.init(0.0, 0.0, 0.0, &Vector3::zeros());
    pf.prediction(1.0, &Vector3::zeros(), 1.0, FRAC_PI_4);
    let r = 1.0 / FRAC_PI_4;
    for p in pf.particles() {
        assert_approx_eq!(p.x, r * FRAC_PI_4.sin(), 1e-9);
        assert_approx_eq!(p.y, r * (1.0 - FRAC_PI_4.cos()), 1e-9);
        assert_approx_eq!(p.theta, FRAC_PI_4, 1e-9);
    }
}

#[test]
fn test_noiseless_prediction_is_repeatable() {
    let run = |seed: u64| {
        let mut pf = ParticleFilter::new_with_seed(20, seed);
        pf.init(1.0, 2.0, 0.5, &Vector3::zeros());
        for _ in 0..5 {
            pf.prediction(0.1, &Vector3::zeros(), 3.0, -0.4);
        }
        pf.particles().to_vec()
    };
    // no noise, so even the seed does not matter
    assert_eq!(run(1), run(1));
    assert_eq!(run(1), run(2));
}

#[test]
fn test_perfect_observation_gets_peak_weight() {
    let map = square_map();
    let mut pf = ParticleFilter::new_with_seed(5, 11);
    pf.init(0.0, 0.0, FRAC_PI_2, &Vector3::zeros());
    // facing +y, landmark 2 is straight ahead and landmark 1 is to the right
    let observations = vec![LandmarkObs::new(10.0, 0.0), LandmarkObs::new(0.0, -10.0)];
    let std_landmark = Vector2::new(0.3, 0.5);
    pf.update_weights(20.0, &std_landmark, &observations, &map);
    let peak = bivariate_gaussian(0.0, 0.0, 0.0, 0.0, 0.3, 0.5);
    for p in pf.particles() {
        assert_approx_eq!(p.weight, peak * peak, 1e-9);
    }
}

#[test]
fn test_particles_closer_to_truth_weigh_more() {
    let map = square_map();
    let mut pf = ParticleFilter::new_with_seed(2, 5);
    pf.init(0.0, 0.0, 0.0, &Vector3::zeros());
    pf.particles_mut()[1].set_pose(Pose2D::new(0.4, -0.2, 0.05));
    let observations = vec![LandmarkObs::new(10.0, 0.0), LandmarkObs::new(0.0, 10.0)];
    pf.update_weights(50.0, &Vector2::new(0.3, 0.3), &observations, &map);
    let particles = pf.particles();
    assert!(particles[0].weight > particles[1].weight);
    assert_eq!(pf.best_index(), Some(0));
}

#[test]
fn test_nothing_in_range_leaves_uniform_weights() {
    let map = square_map();
    let mut pf = ParticleFilter::new_with_seed(8, 5);
    pf.init(100.0, 100.0, 0.0, &Vector3::new(1.0, 1.0, 0.1));
    pf.update_weights(5.0, &Vector2::new(0.3, 0.3), &[LandmarkObs::new(1.0, 1.0)], &map);
    assert!(pf.weights().iter().all(|&w| w == 1.0));
}

#[test]
fn test_degenerate_weights_collapse_onto_one_particle() {
    for strategy in ALL_STRATEGIES {
        for seed in 0..5 {
            let mut pf = ParticleFilter::new_with_seed(3, seed).with_strategies(strategy, Default::default());
            pf.init(0.0, 0.0, 0.0, &Vector3::new(5.0, 5.0, 1.0));
            pf.set_weights(&[0.0, 0.0, 1.0]);
            let survivor = pf.particles()[2].clone();
            pf.resample();
            assert!(
                pf.particles().iter().all(|p| *p == survivor),
                "{:?} seed {}",
                strategy,
                seed
            );
        }
    }
}

#[test]
fn test_seeded_cycles_are_reproducible() {
    let map = square_map();
    let run = || {
        let mut pf = ParticleFilter::new_with_seed(50, 1234);
        pf.init(0.0, 0.0, 0.0, &Vector3::new(0.3, 0.3, 0.01));
        for _ in 0..5 {
            pf.prediction(0.1, &Vector3::new(0.3, 0.3, 0.01), 2.0, 0.2);
            pf.update_weights(
                30.0,
                &Vector2::new(0.3, 0.3),
                &[LandmarkObs::new(9.8, 0.1)],
                &map,
            );
            pf.resample();
        }
        pf.particles().to_vec()
    };
    assert_eq!(run(), run());
}

#[test]
fn test_fresh_particles_format_as_empty_strings() {
    let mut pf = ParticleFilter::new_with_seed(4, 0);
    pf.init(0.0, 0.0, 0.0, &Vector3::zeros());
    for p in pf.particles() {
        assert_eq!(p.get_associations(), "");
        assert_eq!(p.get_sense_coord(SenseAxis::X), "");
        assert_eq!(p.get_sense_coord(SenseAxis::Y), "");
    }
}

#[test]
fn test_trait_cycle_converges_on_landmarks() {
    let map = square_map();
    let truth = Pose2D::new(0.0, 0.0, 0.0);
    let mut pf = ParticleFilter::new_with_seed(500, 77).with_process_noise(Vector3::new(0.05, 0.05, 0.005));
    pf.init(0.5, -0.5, 0.05, &Vector3::new(1.0, 1.0, 0.1));
    let observations = vec![
        LandmarkObs::new(10.0, 0.0),
        LandmarkObs::new(0.0, 10.0),
        LandmarkObs::new(-10.0, 0.0),
        LandmarkObs::new(0.0, -10.0),
    ];
    let measurement = LandmarkMeasurement::new(observations, 20.0, Vector2::new(0.3, 0.3), &map);
    for _ in 0..5 {
        pf.predict(&ControlInput::new(0.0, 0.0), 0.1);
        pf.update(&measurement);
        pf.resample();
    }
    pf.update(&measurement);
    let estimate = Pose2D::from(&pf.get_estimate());
    assert!((estimate.x - truth.x).abs() < 0.3, "{}", estimate);
    assert!((estimate.y - truth.y).abs() < 0.3, "{}", estimate);
    assert!(estimate.theta.abs() < 0.05, "{}", estimate);
    let cov = pf.get_certainty();
    assert_eq!(cov.shape(), (3, 3));
}
