use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use thiserror::Error;

pub const LATITUDE_RANGE: RangeInclusive<f64> = -90.0..=90.0;
pub const LONGITUDE_RANGE: RangeInclusive<f64> = -180.0..=180.0;

/// A latitude/longitude pair in degrees, serialized in the geo-point object
/// form `{"lat": .., "lon": ..}`.
#[derive(Copy, Clone, PartialEq, Debug, Default, Deserialize, Serialize)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Copy, Clone, PartialEq, Debug, Error)]
pub enum InvalidLocationError {
    #[error("Latitude {0} is outside of [-90, 90]")]
    Latitude(f64),
    #[error("Longitude {0} is outside of [-180, 180]")]
    Longitude(f64),
}

impl Location {
    /// Creates a location, rejecting coordinates outside the valid ranges.
    /// NaN is never in range.
    pub fn new(lat: f64, lon: f64) -> Result<Self, InvalidLocationError> {
        if !LATITUDE_RANGE.contains(&lat) {
            return Err(InvalidLocationError::Latitude(lat));
        }
        if !LONGITUDE_RANGE.contains(&lon) {
            return Err(InvalidLocationError::Longitude(lon));
        }

        Ok(Self { lat, lon })
    }
}

#[cfg(test)]
mod tests {
    use crate::model::location::{InvalidLocationError, Location};

    #[test]
    fn legal_values() {
        let legal = [(0.0, 0.0), (90.0, 180.0), (-90.0, -180.0), (37.0, -122.0)];
        for (lat, lon) in legal {
            let location = Location::new(lat, lon).unwrap();
            assert_eq!((location.lat, location.lon), (lat, lon));
        }

        assert_eq!(
            Location::new(90.5, 0.0),
            Err(InvalidLocationError::Latitude(90.5))
        );
        assert_eq!(
            Location::new(0.0, -180.1),
            Err(InvalidLocationError::Longitude(-180.1))
        );
        assert!(Location::new(f64::NAN, 0.0).is_err());
    }
}
