//! Ingestion and validation of administrative-boundary vector data.
//!
//! The on-disk format is GeoJSON: a `FeatureCollection` where every feature
//! carries exactly one `MultiPolygon` geometry. Validation is fail-fast —
//! a malformed feature aborts the whole load, since there is no meaningful
//! partial render of a corrupt dataset.

use std::fs;
use std::path::Path;

use serde::Deserialize;

/// A 2D geographic point. Both coordinates are finite and in range by the
/// time a [`Point`] exists; validation happens during ingestion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub longitude: f64,
    pub latitude: f64,
}

/// A polygon with holes. `rings[0]` is the exterior boundary; any further
/// rings are holes cut out of its interior.
#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    pub rings: Vec<Vec<Point>>,
}

#[derive(Debug, thiserror::Error)]
pub enum GeometryError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid GeoJSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("feature {feature} has no geometry")]
    MissingGeometry { feature: usize },
    #[error("feature {feature}: expected MultiPolygon geometry, got {found}")]
    NotMultiPolygon { feature: usize, found: String },
    #[error("feature {feature}: multipolygon contains no polygons")]
    EmptyMultiPolygon { feature: usize },
    #[error("feature {feature}: polygon has no exterior ring")]
    MissingExteriorRing { feature: usize },
    #[error("feature {feature}: ring has no points")]
    EmptyRing { feature: usize },
    #[error("feature {feature}: position has {len} coordinates, expected 2")]
    NotTwoDimensional { feature: usize, len: usize },
    #[error("feature {feature}: longitude {value} outside [-180, 180]")]
    LongitudeOutOfRange { feature: usize, value: f64 },
    #[error("feature {feature}: latitude {value} outside [-90, 90]")]
    LatitudeOutOfRange { feature: usize, value: f64 },
}

#[derive(Deserialize)]
struct RawCollection {
    features: Vec<RawFeature>,
}

#[derive(Deserialize)]
struct RawFeature {
    geometry: Option<RawGeometry>,
}

#[derive(Deserialize)]
struct RawGeometry {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    coordinates: serde_json::Value,
}

/// Read a GeoJSON file and produce one polygon list per feature.
pub fn read_features(path: &Path) -> Result<Vec<Vec<Polygon>>, GeometryError> {
    let text = fs::read_to_string(path).map_err(|source| GeometryError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_features(&text)
}

/// Parse and validate a GeoJSON FeatureCollection from text.
pub fn parse_features(text: &str) -> Result<Vec<Vec<Polygon>>, GeometryError> {
    let collection: RawCollection = serde_json::from_str(text)?;

    let mut features = Vec::with_capacity(collection.features.len());
    for (feature, raw) in collection.features.into_iter().enumerate() {
        let geometry = raw
            .geometry
            .ok_or(GeometryError::MissingGeometry { feature })?;

        if geometry.kind != "MultiPolygon" {
            return Err(GeometryError::NotMultiPolygon {
                feature,
                found: geometry.kind,
            });
        }

        // MultiPolygon coordinates: polygons -> rings -> positions.
        let polygons: Vec<Vec<Vec<Vec<f64>>>> = serde_json::from_value(geometry.coordinates)?;
        if polygons.is_empty() {
            return Err(GeometryError::EmptyMultiPolygon { feature });
        }

        let mut validated = Vec::with_capacity(polygons.len());
        for rings in polygons {
            if rings.is_empty() {
                return Err(GeometryError::MissingExteriorRing { feature });
            }

            let mut polygon = Polygon {
                rings: Vec::with_capacity(rings.len()),
            };
            for ring in rings {
                if ring.is_empty() {
                    return Err(GeometryError::EmptyRing { feature });
                }

                let mut points = Vec::with_capacity(ring.len());
                for position in ring {
                    if position.len() != 2 {
                        return Err(GeometryError::NotTwoDimensional {
                            feature,
                            len: position.len(),
                        });
                    }
                    let (longitude, latitude) = (position[0], position[1]);
                    // Written so NaN fails the check as well.
                    if !(longitude >= -180.0 && longitude <= 180.0) {
                        return Err(GeometryError::LongitudeOutOfRange {
                            feature,
                            value: longitude,
                        });
                    }
                    if !(latitude >= -90.0 && latitude <= 90.0) {
                        return Err(GeometryError::LatitudeOutOfRange {
                            feature,
                            value: latitude,
                        });
                    }
                    points.push(Point {
                        longitude,
                        latitude,
                    });
                }
                polygon.rings.push(points);
            }
            validated.push(polygon);
        }
        features.push(validated);
    }

    Ok(features)
}
