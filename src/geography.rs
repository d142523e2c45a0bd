use std::path::Path;

use geo::Centroid;
use geojson::{Feature, GeoJson};
use polars::prelude::*;
use tracing::{info, warn};

use crate::error::PesticideError;
use crate::schema::geometry;

/// A department boundary reduced to the point used for map rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct DepartmentGeometry {
    pub code: String,
    pub name: Option<String>,
    pub longitude: f64,
    pub latitude: f64,
}

pub fn load_department_geometries(path: &Path) -> Result<Vec<DepartmentGeometry>, PesticideError> {
    if !path.is_file() {
        return Err(PesticideError::MissingReference(path.to_path_buf()));
    }
    let text = std::fs::read_to_string(path)?;
    let departments = parse_department_geometries(&text)?;
    info!(file = %path.display(), departments = departments.len(), "loaded department geometries");
    Ok(departments)
}

/// Parse a FeatureCollection whose features carry a `code` property.
///
/// Features without a code or without a usable geometry are skipped.
pub fn parse_department_geometries(text: &str) -> Result<Vec<DepartmentGeometry>, PesticideError> {
    let features = match text.parse::<GeoJson>()? {
        GeoJson::FeatureCollection(collection) => collection.features,
        GeoJson::Feature(feature) => vec![feature],
        GeoJson::Geometry(_) => {
            return Err(PesticideError::InvalidGeometry(
                "expected a FeatureCollection of departments, found a bare geometry".into(),
            ))
        }
    };

    let mut departments = Vec::with_capacity(features.len());
    for (index, feature) in features.into_iter().enumerate() {
        let Some(code) = string_property(&feature, geometry::CODE) else {
            warn!(feature = index, "department feature without a code; skipping");
            continue;
        };
        let name = string_property(&feature, geometry::NAME);

        let Some(shape) = feature.geometry else {
            warn!(code = %code, "department feature without geometry; skipping");
            continue;
        };
        let shape = geo::Geometry::<f64>::try_from(&shape.value)?;
        let Some(centroid) = shape.centroid() else {
            warn!(code = %code, "department geometry is empty; skipping");
            continue;
        };

        departments.push(DepartmentGeometry {
            code,
            name,
            longitude: centroid.x(),
            latitude: centroid.y(),
        });
    }
    Ok(departments)
}

fn string_property(feature: &Feature, key: &str) -> Option<String> {
    let value = feature.property(key)?;
    match value.as_str() {
        Some(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        None if value.is_null() => None,
        None => Some(value.to_string()),
    }
}

pub fn geometries_to_frame(departments: &[DepartmentGeometry]) -> Result<DataFrame, PesticideError> {
    let codes: Vec<&str> = departments.iter().map(|d| d.code.as_str()).collect();
    let names: Vec<Option<&str>> = departments.iter().map(|d| d.name.as_deref()).collect();
    let lons: Vec<f64> = departments.iter().map(|d| d.longitude).collect();
    let lats: Vec<f64> = departments.iter().map(|d| d.latitude).collect();

    let df = DataFrame::new(vec![
        Column::new(geometry::CODE.into(), &codes),
        Column::new(geometry::NAME.into(), &names),
        Column::new(geometry::LONGITUDE.into(), &lons),
        Column::new(geometry::LATITUDE.into(), &lats),
    ])?;
    Ok(df)
}
