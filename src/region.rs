use serde::{Deserialize, Serialize};

use crate::error::CmipError;

/// (longitude, latitude) in degrees, -180..180 convention.
pub type Vertex = (f64, f64);

/// Region entry as it appears in configuration: a predefined name or an
/// explicit vertex list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RegionSpec {
    Named(String),
    Polygon(Vec<Vertex>),
}

/// Resolved crop region. The name is embedded in cropped file names.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub name: String,
    pub polygon: Vec<Vertex>,
}

impl Region {
    pub fn resolve(spec: &RegionSpec) -> Result<Region, CmipError> {
        match spec {
            RegionSpec::Named(name) => {
                let polygon = named_region(name)
                    .ok_or_else(|| CmipError::UnknownRegion(name.clone()))?;
                Ok(Region {
                    name: name.clone(),
                    polygon,
                })
            }
            RegionSpec::Polygon(vertices) => {
                if vertices.len() < 3 {
                    return Err(CmipError::InvalidRegion(format!(
                        "polygon needs at least 3 vertices, got {}",
                        vertices.len()
                    )));
                }
                Ok(Region {
                    name: "custom".to_string(),
                    polygon: vertices.clone(),
                })
            }
        }
    }

    /// Polygon with longitudes normalized to the -180..180 convention.
    pub fn normalized_polygon(&self) -> Vec<Vertex> {
        self.polygon
            .iter()
            .map(|&(lon, lat)| (normalize_lon(lon), lat))
            .collect()
    }
}

pub fn named_region(name: &str) -> Option<Vec<Vertex>> {
    match name {
        "med" => Some(vec![
            (-6.0, 30.0),
            (-5.31, 41.0),
            (13.66, 47.29),
            (39.0, 38.2),
            (36.0, 30.0),
        ]),
        _ => None,
    }
}

/// Maps 0..360 longitudes onto the -180..180 convention.
pub fn normalize_lon(lon: f64) -> f64 {
    if lon > 180.0 { lon - 360.0 } else { lon }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    pub fn of(polygon: &[Vertex]) -> Option<BoundingBox> {
        let (&(first_lon, first_lat), rest) = polygon.split_first()?;
        let mut bbox = BoundingBox {
            min_lon: first_lon,
            max_lon: first_lon,
            min_lat: first_lat,
            max_lat: first_lat,
        };
        for &(lon, lat) in rest {
            bbox.min_lon = bbox.min_lon.min(lon);
            bbox.max_lon = bbox.max_lon.max(lon);
            bbox.min_lat = bbox.min_lat.min(lat);
            bbox.max_lat = bbox.max_lat.max(lat);
        }
        Some(bbox)
    }

    /// Inclusive on all four edges.
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        lon >= self.min_lon && lon <= self.max_lon && lat >= self.min_lat && lat <= self.max_lat
    }
}

/// Crossing-number point-in-polygon test over a single coordinate pair.
/// The polygon is treated as closed (last vertex connects back to the
/// first). Edges use a half-open latitude interval `[min, max)`, so a point
/// exactly on a horizontal edge chain is counted by the edge whose lower
/// endpoint it matches; points on the polygon boundary are therefore
/// classified deterministically but not always as inside.
pub fn point_in_polygon(lon: f64, lat: f64, polygon: &[Vertex]) -> bool {
    if polygon.len() < 3 {
        return false;
    }
    let mut inside = false;
    for i in 0..polygon.len() {
        let (x_i, y_i) = polygon[i];
        let (x_j, y_j) = polygon[(i + 1) % polygon.len()];
        let crosses = (y_i <= lat && lat < y_j) || (y_j <= lat && lat < y_i);
        if crosses && lon < (x_j - x_i) * (lat - y_i) / (y_j - y_i) + x_i {
            inside = !inside;
        }
    }
    inside
}
