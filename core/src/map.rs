//! Read-only landmark map.
//!
//! The map is an external input: the filter borrows it during the weight update and never
//! mutates it. Landmark coordinates are stored in single precision, as delivered by the world
//! model, and widened to `f64` when they are turned into predicted observations.
use crate::measurements::LandmarkObs;

/// A single known landmark.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MapLandmark {
    pub id: i32,
    pub x: f32,
    pub y: f32,
}
impl MapLandmark {
    pub fn new(id: i32, x: f32, y: f32) -> Self {
        MapLandmark { id, x, y }
    }
}

/// Ordered collection of map landmarks.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Map {
    pub landmark_list: Vec<MapLandmark>,
}
impl Map {
    pub fn new(landmark_list: Vec<MapLandmark>) -> Self {
        Map { landmark_list }
    }
    pub fn len(&self) -> usize {
        self.landmark_list.len()
    }
    pub fn is_empty(&self) -> bool {
        self.landmark_list.is_empty()
    }
    /// Landmarks that fall inside the square gating window of half-width `sensor_range`
    /// centred on `(x, y)`, as map-frame predicted observations.
    ///
    /// The window is axis aligned, so corners up to `sqrt(2) * sensor_range` away are kept.
    pub fn landmarks_in_range(&self, x: f64, y: f64, sensor_range: f64) -> Vec<LandmarkObs> {
        self.landmark_list
            .iter()
            .filter(|lm| {
                (x - lm.x as f64).abs() <= sensor_range && (y - lm.y as f64).abs() <= sensor_range
            })
            .map(|lm| LandmarkObs::with_id(lm.id, lm.x as f64, lm.y as f64))
            .collect()
    }
}
impl FromIterator<MapLandmark> for Map {
    fn from_iter<I: IntoIterator<Item = MapLandmark>>(iter: I) -> Self {
        Map::new(iter.into_iter().collect())
    }
}
