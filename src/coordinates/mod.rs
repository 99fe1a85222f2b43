//! Coordinate source.
//!
//! Turns the geometry of a GeoJSON document into an ordered, validated
//! sequence of `Coordinate` values. Only the first feature of a
//! `FeatureCollection` is consumed; a bare `Feature` or a bare geometry
//! object is accepted as well.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Result type for coordinate loading.
pub type Result<T> = std::result::Result<T, GeometryError>;

/// Errors that can occur while reading a geometry.
#[derive(Debug, thiserror::Error)]
pub enum GeometryError {
    #[error("Malformed geometry: {0}")]
    Malformed(String),

    #[error("Geometry contains no coordinates")]
    Empty,

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// A (longitude, latitude) point in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lon: f64,
    pub lat: f64,
}

impl Coordinate {
    pub const fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }

    /// Build a coordinate, rejecting non-finite or out-of-range values.
    pub fn checked(lon: f64, lat: f64) -> std::result::Result<Self, String> {
        if !lon.is_finite() || !lat.is_finite() {
            return Err(format!("non-finite coordinate ({}, {})", lon, lat));
        }
        if !(-180.0..=180.0).contains(&lon) {
            return Err(format!("longitude {} outside [-180, 180]", lon));
        }
        if !(-90.0..=90.0).contains(&lat) {
            return Err(format!("latitude {} outside [-90, 90]", lat));
        }
        Ok(Self { lon, lat })
    }

    pub fn is_finite(&self) -> bool {
        self.lon.is_finite() && self.lat.is_finite()
    }
}

/// Geometry object as it appears in the input document.
///
/// Entries are kept as raw JSON so that validation can report which
/// position is malformed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub coordinates: Vec<Value>,
}

impl Geometry {
    /// Build a `LineString` geometry from coordinates.
    pub fn line_string(coordinates: &[Coordinate]) -> Self {
        Self {
            kind: Some("LineString".to_string()),
            coordinates: coordinates
                .iter()
                .map(|c| serde_json::json!([c.lon, c.lat]))
                .collect(),
        }
    }

    /// Extract the geometry from a GeoJSON document.
    ///
    /// Accepts a `FeatureCollection` (first feature), a `Feature`, or a bare
    /// geometry object.
    pub fn from_document(document: &Value) -> Result<Self> {
        let geometry = if let Some(features) = document.get("features") {
            let first = features
                .as_array()
                .ok_or_else(|| GeometryError::Malformed("features is not an array".to_string()))?
                .first()
                .ok_or_else(|| GeometryError::Malformed("no features".to_string()))?;
            first
                .get("geometry")
                .ok_or_else(|| GeometryError::Malformed("first feature has no geometry".to_string()))?
        } else if let Some(geometry) = document.get("geometry") {
            geometry
        } else if document.get("coordinates").is_some() {
            document
        } else {
            return Err(GeometryError::Malformed(
                "document has no features, geometry or coordinates".to_string(),
            ));
        };

        if !geometry.get("coordinates").is_some_and(Value::is_array) {
            return Err(GeometryError::Malformed(
                "geometry coordinates is not an array".to_string(),
            ));
        }

        Ok(Geometry::deserialize(geometry)?)
    }
}

/// Parse one `[lon, lat]` entry.
fn parse_position(index: usize, entry: &Value) -> Result<Coordinate> {
    let pair = entry
        .as_array()
        .filter(|pair| pair.len() == 2)
        .ok_or_else(|| {
            GeometryError::Malformed(format!(
                "position {} is not a [longitude, latitude] pair: {}",
                index, entry
            ))
        })?;

    let (Some(lon), Some(lat)) = (pair[0].as_f64(), pair[1].as_f64()) else {
        return Err(GeometryError::Malformed(format!(
            "position {} has a non-numeric element: {}",
            index, entry
        )));
    };

    Coordinate::checked(lon, lat)
        .map_err(|reason| GeometryError::Malformed(format!("position {}: {}", index, reason)))
}

/// Ordered, validated coordinates of one route.
///
/// Validation happens up front, so a malformed geometry yields nothing.
/// Iteration is restartable: every `iter()` starts from the first point.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinateSource {
    coordinates: Vec<Coordinate>,
}

impl CoordinateSource {
    pub fn from_geometry(geometry: &Geometry) -> Result<Self> {
        if geometry.coordinates.is_empty() {
            return Err(GeometryError::Empty);
        }

        let coordinates = geometry
            .coordinates
            .iter()
            .enumerate()
            .map(|(index, entry)| parse_position(index, entry))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { coordinates })
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let document: Value = serde_json::from_str(text)?;
        Self::from_geometry(&Geometry::from_document(&document)?)
    }

    /// Load the route from a GeoJSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| GeometryError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let source = Self::from_json_str(&text)?;
        debug!(path = %path.display(), points = source.len(), "Loaded route");
        Ok(source)
    }

    pub fn len(&self) -> usize {
        self.coordinates.len()
    }

    /// A source built from a geometry holds at least one coordinate.
    pub fn is_empty(&self) -> bool {
        self.coordinates.is_empty()
    }

    pub fn iter(&self) -> std::iter::Copied<std::slice::Iter<'_, Coordinate>> {
        self.coordinates.iter().copied()
    }

    pub fn as_slice(&self) -> &[Coordinate] {
        &self.coordinates
    }
}

impl<'a> IntoIterator for &'a CoordinateSource {
    type Item = Coordinate;
    type IntoIter = std::iter::Copied<std::slice::Iter<'a, Coordinate>>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
