//! Parsing of the coordinates and range sent by clients.

use geopost_common::{
    geo::{InvalidRadiusError, Radius},
    model::location::{InvalidLocationError, Location},
};
use serde::Deserialize;
use thiserror::Error;

/// How unparsable coordinates are treated.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoordinatePolicy {
    /// Missing, non-numeric and out-of-range coordinates are rejected.
    #[default]
    Strict,
    /// Missing or non-numeric coordinates silently become `0.0`.
    Lenient,
}

#[derive(Clone, PartialEq, Debug, Error)]
pub enum InvalidCoordinateError {
    #[error("{0} is missing")]
    Missing(&'static str),
    #[error("{name} is not a number: {value:?}")]
    NotANumber { name: &'static str, value: String },
    #[error(transparent)]
    OutOfRange(#[from] InvalidLocationError),
}

impl CoordinatePolicy {
    pub fn location(
        self,
        lat: Option<&str>,
        lon: Option<&str>,
    ) -> Result<Location, InvalidCoordinateError> {
        match self {
            CoordinatePolicy::Strict => {
                let lat = strict_coordinate("lat", lat)?;
                let lon = strict_coordinate("lon", lon)?;
                Ok(Location::new(lat, lon)?)
            }
            CoordinatePolicy::Lenient => Ok(Location {
                lat: lenient_coordinate(lat),
                lon: lenient_coordinate(lon),
            }),
        }
    }
}

fn strict_coordinate(name: &'static str, value: Option<&str>) -> Result<f64, InvalidCoordinateError> {
    let value = value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or(InvalidCoordinateError::Missing(name))?;

    value
        .parse::<f64>()
        .ok()
        .filter(|coordinate| coordinate.is_finite())
        .ok_or_else(|| InvalidCoordinateError::NotANumber {
            name,
            value: value.to_owned(),
        })
}

fn lenient_coordinate(value: Option<&str>) -> f64 {
    value
        .and_then(|value| value.trim().parse::<f64>().ok())
        .filter(|coordinate| coordinate.is_finite())
        .unwrap_or(0.0)
}

/// Request parsing settings shared by the handlers.
#[derive(Copy, Clone, PartialEq, Debug, Default)]
pub struct ParamSettings {
    pub coordinates: CoordinatePolicy,
    pub default_radius: Radius,
}

impl ParamSettings {
    /// The radius for a `range` parameter; absent or empty means the default.
    pub fn radius(self, range: Option<&str>) -> Result<Radius, InvalidRadiusError> {
        match range.filter(|range| !range.is_empty()) {
            Some(range) => range.parse(),
            None => Ok(self.default_radius),
        }
    }
}
