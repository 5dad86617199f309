//! Distances on the earth's surface.
//!
//! Distances are computed with the haversine formula on a sphere with the
//! mean earth radius, which is also what Elasticsearch uses for its
//! `geo_distance` filter.

use crate::model::location::Location;
use std::{
    fmt::{Display, Formatter},
    str::FromStr,
};
use thiserror::Error;

/// Mean earth radius in kilometres.
pub const EARTH_RADIUS_KM: f64 = 6_371.008_771_4;

pub const DEFAULT_RADIUS_KM: f64 = 200.0;

/// Great-circle distance between two locations in kilometres.
#[must_use]
pub fn distance_km(from: Location, to: Location) -> f64 {
    let from_lat = from.lat.to_radians();
    let to_lat = to.lat.to_radians();
    let delta_lat = (to.lat - from.lat).to_radians();
    let delta_lon = (to.lon - from.lon).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + from_lat.cos() * to_lat.cos() * (delta_lon / 2.0).sin().powi(2);

    2.0 * EARTH_RADIUS_KM * a.sqrt().clamp(0.0, 1.0).asin()
}

/// A positive, finite search radius in kilometres.
#[derive(Copy, Clone, PartialEq, PartialOrd, Debug)]
pub struct Radius(f64);

impl Radius {
    #[must_use]
    pub fn from_km(km: f64) -> Option<Self> {
        (km.is_finite() && km > 0.0).then_some(Self(km))
    }

    #[must_use]
    pub fn from_km_unchecked(km: f64) -> Self {
        Self::from_km(km).expect("Radius was not positive and finite.")
    }

    #[must_use]
    pub fn km(self) -> f64 {
        self.0
    }

    /// Whether `point` lies within this radius around `center`. A point at
    /// exactly the radius is included.
    #[must_use]
    pub fn contains(self, center: Location, point: Location) -> bool {
        distance_km(center, point) <= self.0
    }
}

impl Default for Radius {
    fn default() -> Self {
        Self(DEFAULT_RADIUS_KM)
    }
}

/// Renders the radius as an Elasticsearch distance, e.g. `"200km"`.
impl Display for Radius {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}km", self.0)
    }
}

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Error)]
#[error("The radius is not a positive number of kilometres: {0:?}")]
pub struct InvalidRadiusError(String);

/// Parses a bare number of kilometres, e.g. `"15"` or `"2.5"`.
impl FromStr for Radius {
    type Err = InvalidRadiusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse()
            .ok()
            .and_then(Self::from_km)
            .ok_or_else(|| InvalidRadiusError(s.to_owned()))
    }
}

impl TryFrom<f64> for Radius {
    type Error = InvalidRadiusError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::from_km(value).ok_or_else(|| InvalidRadiusError(value.to_string()))
    }
}
