//! District boundaries and spatial filtering of GeoJSON features.

use anyhow::{Context, Result};
use geo::{BoundingRect, Contains, Geometry, MultiPolygon, Rect};
use geojson::{Feature, FeatureCollection, GeoJson};
use std::path::Path;
use tracing::{debug, warn};

use crate::projection::{ProjectionError, utm33_to_wgs84};

/// Property holding a district's name in the Berlin boundary files.
pub const DISTRICT_NAME_PROPERTY: &str = "Gemeinde_name";

#[derive(Debug, thiserror::Error)]
pub enum GeometryError {
    #[error("invalid GeoJSON: {0}")]
    GeoJson(#[from] geojson::Error),
    #[error("expected a FeatureCollection")]
    NotACollection,
    #[error("feature {index} has no '{property}' property")]
    MissingName { index: usize, property: String },
    #[error("district '{0}' has no polygon geometry")]
    NotAPolygon(String),
    #[error("unknown district '{0}'")]
    UnknownDistrict(String),
    #[error("feature {index}: {source}")]
    Projection {
        index: usize,
        source: ProjectionError,
    },
}

/// An administrative boundary used for containment tests.
#[derive(Debug, Clone)]
pub struct District {
    pub name: String,
    pub boundary: MultiPolygon<f64>,
}

impl District {
    pub fn bounds(&self) -> Option<Rect<f64>> {
        self.boundary.bounding_rect()
    }

    /// Whether `geometry` lies inside the boundary.
    ///
    /// Points and lines touching only the boundary are outside. A
    /// multi-polygon or geometry collection is inside when every member is;
    /// empty ones are never contained. Rects, triangles and bare lines are
    /// not produced from GeoJSON and count as outside.
    pub fn contains(&self, geometry: &Geometry<f64>) -> bool {
        match geometry {
            Geometry::Point(p) => self.boundary.contains(p),
            Geometry::MultiPoint(mp) => self.boundary.contains(mp),
            Geometry::LineString(ls) => self.boundary.contains(ls),
            Geometry::MultiLineString(mls) => self.boundary.contains(mls),
            Geometry::Polygon(poly) => self.boundary.contains(poly),
            Geometry::MultiPolygon(mp) => {
                !mp.0.is_empty() && mp.0.iter().all(|poly| self.boundary.contains(poly))
            }
            Geometry::GeometryCollection(gc) => {
                !gc.0.is_empty() && gc.0.iter().all(|member| self.contains(member))
            }
            _ => false,
        }
    }

    /// Keeps the features of `collection` whose geometry lies inside the district.
    pub fn filter(&self, collection: &FeatureCollection) -> FeatureCollection {
        let features = collection
            .features
            .iter()
            .filter(|feature| {
                feature_geometry(feature).is_some_and(|geometry| self.contains(&geometry))
            })
            .cloned()
            .collect();

        FeatureCollection {
            bbox: None,
            features,
            foreign_members: None,
        }
    }
}

fn feature_geometry(feature: &Feature) -> Option<Geometry<f64>> {
    let geometry = feature.geometry.as_ref()?;
    Geometry::<f64>::try_from(geometry.value.clone()).ok()
}

/// All districts of a boundary file, in file order.
#[derive(Debug, Clone, Default)]
pub struct DistrictSet {
    districts: Vec<District>,
}

impl DistrictSet {
    /// Parses districts from a GeoJSON feature collection, naming each
    /// by its `Gemeinde_name` property.
    pub fn from_geojson(text: &str) -> Result<Self, GeometryError> {
        let collection = parse_collection(text)?;
        let mut districts = Vec::with_capacity(collection.features.len());

        for (index, feature) in collection.features.iter().enumerate() {
            let name = feature
                .property(DISTRICT_NAME_PROPERTY)
                .and_then(|v| v.as_str())
                .ok_or_else(|| GeometryError::MissingName {
                    index,
                    property: DISTRICT_NAME_PROPERTY.to_string(),
                })?
                .to_string();

            let boundary = match feature_geometry(feature) {
                Some(Geometry::Polygon(p)) => MultiPolygon::new(vec![p]),
                Some(Geometry::MultiPolygon(mp)) => mp,
                _ => return Err(GeometryError::NotAPolygon(name)),
            };

            districts.push(District { name, boundary });
        }

        debug!(count = districts.len(), "Districts parsed");
        Ok(Self { districts })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_geojson(&text).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn get(&self, name: &str) -> Result<&District, GeometryError> {
        self.districts
            .iter()
            .find(|d| d.name == name)
            .ok_or_else(|| GeometryError::UnknownDistrict(name.to_string()))
    }

    /// Distinct district names in file order.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for d in &self.districts {
            if !names.contains(&d.name.as_str()) {
                names.push(&d.name);
            }
        }
        names
    }

    pub fn iter(&self) -> impl Iterator<Item = &District> {
        self.districts.iter()
    }

    pub fn len(&self) -> usize {
        self.districts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.districts.is_empty()
    }
}

pub fn parse_collection(text: &str) -> Result<FeatureCollection, GeometryError> {
    match text.parse::<GeoJson>()? {
        GeoJson::FeatureCollection(fc) => Ok(fc),
        _ => Err(GeometryError::NotACollection),
    }
}

/// Rewrites every Point geometry of `collection` from EPSG:25833 to
/// EPSG:4326 in place. Other geometry types are left untouched.
///
/// Returns the number of points converted.
pub fn reproject_points(collection: &mut FeatureCollection) -> Result<usize, GeometryError> {
    let mut converted = 0;

    for (index, feature) in collection.features.iter_mut().enumerate() {
        let Some(geometry) = feature.geometry.as_mut() else {
            continue;
        };
        match &mut geometry.value {
            geojson::Value::Point(position) if position.len() >= 2 => {
                let (lon, lat) = utm33_to_wgs84(position[0], position[1])
                    .map_err(|source| GeometryError::Projection { index, source })?;
                *position = vec![lon, lat];
                converted += 1;
            }
            geojson::Value::Point(_) => {
                warn!(index, "Skipping point with fewer than two coordinates");
            }
            _ => {}
        }
    }

    Ok(converted)
}
