//! Wire encoding of a location update.
//!
//! Payload: UTF-8 JSON object `{"lon": <number>, "lat": <number>}`.

use serde::{Deserialize, Serialize};

use crate::coordinates::Coordinate;

/// Errors that can occur while encoding or decoding a location event.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("Coordinate ({lon}, {lat}) is not finite")]
    NonFinite { lon: f64, lat: f64 },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// One location update as sent to the broker.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationEvent {
    pub lon: f64,
    pub lat: f64,
}

impl LocationEvent {
    /// Serde writes NaN and infinity as `null`, so they are rejected here.
    pub fn from_coordinate(coordinate: Coordinate) -> Result<Self, EncodeError> {
        if !coordinate.is_finite() {
            return Err(EncodeError::NonFinite {
                lon: coordinate.lon,
                lat: coordinate.lat,
            });
        }
        Ok(Self {
            lon: coordinate.lon,
            lat: coordinate.lat,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(payload: &[u8]) -> Result<Self, EncodeError> {
        Ok(serde_json::from_slice(payload)?)
    }

    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.lon, self.lat)
    }
}
