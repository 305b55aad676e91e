use itertools::Itertools;

use super::PositionSample;

/// Mean Earth radius used by the spherical approximation.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance in kilometers between two points given in degrees.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();
    let a = (dlat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_KM * c
}

pub fn distance_between(from: &PositionSample, to: &PositionSample) -> f64 {
    haversine_km(from.latitude, from.longitude, to.latitude, to.longitude)
}

/// Length of the path through `samples`, in order.
pub fn path_distance_km<'a>(samples: impl IntoIterator<Item = &'a PositionSample>) -> f64 {
    samples
        .into_iter()
        .tuple_windows()
        .map(|(from, to)| distance_between(from, to))
        .filter(|d| d.is_finite())
        .sum()
}

/// Running total of distance travelled. Only ever grows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DistanceAccumulator {
    total_km: f64,
    legs: u64,
}

impl DistanceAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the leg `from -> to` and returns the kilometers added. Legs that
    /// cannot be measured (non-finite coordinates) add nothing.
    pub fn add_leg(&mut self, from: &PositionSample, to: &PositionSample) -> f64 {
        let leg = distance_between(from, to);
        if !leg.is_finite() {
            return 0.;
        }
        self.total_km += leg;
        self.legs += 1;
        leg
    }

    pub fn total_km(&self) -> f64 {
        self.total_km
    }

    pub fn legs(&self) -> u64 {
        self.legs
    }
}
